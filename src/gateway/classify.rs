//! Error classification for backend HTTP failures.
//!
//! Local backends report failures as HTTP 400 with machine-readable
//! substrings in the body. The classifier maps status + body onto
//! [`GatewayError`] variants so callers can distinguish retriable failures
//! from ones that need operator action.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::GatewayError;

/// Extra context-length headroom suggested when reporting input overflow.
const OVERFLOW_HEADROOM_TOKENS: usize = 5000;

/// Classifies an HTTP error response from the completion endpoint.
///
/// `approx_prompt_tokens` is the caller's estimate of the prompt size, used
/// to phrase actionable overflow messages.
#[must_use]
pub fn classify_completion_error(
    status: u16,
    body: &str,
    model: &str,
    approx_prompt_tokens: usize,
) -> GatewayError {
    if status == 404 {
        return GatewayError::ModelNotLoaded {
            model: model.to_string(),
        };
    }
    if status != 400 {
        return GatewayError::Http {
            status,
            detail: body.to_string(),
        };
    }

    let lower = body.to_lowercase();

    if lower.contains("has crashed") || lower.contains("exit code:") {
        return GatewayError::ModelCrashed {
            model: model.to_string(),
            detail: body.to_string(),
        };
    }

    if lower.contains("failed to process regex") {
        return GatewayError::RegexEngineFailure;
    }

    if lower.contains("mid-generation")
        || (lower.contains("context length") && lower.contains("does not support"))
    {
        return GatewayError::MidGenerationOverflow;
    }

    let is_input_overflow = (lower.contains("prompt") && lower.contains("too"))
        || (lower.contains("input") && lower.contains("exceeds"))
        || lower.contains("prompt exceeds");
    if is_input_overflow {
        let required = parse_context_limit(&lower)
            .map_or(approx_prompt_tokens + OVERFLOW_HEADROOM_TOKENS, |limit| {
                limit.max(approx_prompt_tokens + OVERFLOW_HEADROOM_TOKENS)
            });
        return GatewayError::InputOverflow {
            prompt_tokens: approx_prompt_tokens,
            required,
        };
    }

    GatewayError::Http {
        status,
        detail: body.to_string(),
    }
}

/// Pulls the backend's reported context limit out of an overflow body.
fn parse_context_limit(lower_body: &str) -> Option<usize> {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let re = RE.get_or_init(|| Regex::new(r"context\D*?(\d+)").unwrap());
    re.captures(lower_body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Whether a dense-index error message matches the transient race signature
/// seen during concurrent index writes.
#[must_use]
pub fn is_transient_index_error(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("hnsw")
        || lower.contains("nothing found on disk")
        || lower.contains("segment reader")
}
