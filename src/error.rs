//! Error types for pipeline operations.
//!
//! One enum per subsystem, collected under a top-level [`Error`] via
//! `thiserror`. Agents never let these cross the scheduler: at the agent
//! boundary every failure is converted into a rejection result so the
//! coordinator loop can proceed.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for all pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM gateway errors (completions, embeddings, probes).
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// JSON contract errors (extraction, repair, schema).
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),

    /// Retrieval engine errors.
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// State store errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Context allocation errors.
    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// Paper compilation errors.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Workflow coordination errors.
    #[error("workflow error: {message}")]
    Workflow {
        /// Description of the workflow failure.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Errors from the LLM gateway.
///
/// The classifier maps backend HTTP failures onto these variants by
/// pattern-matching status codes and response bodies. `ModelCrashed` and
/// `ModelNotLoaded` bubble up to the user; the overflow variants are
/// converted into rejection results for the current submission.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The backend reported the model process crashed.
    #[error("model '{model}' crashed; reload it in the backend ({detail})")]
    ModelCrashed {
        /// Model identity that crashed.
        model: String,
        /// Backend-reported detail.
        detail: String,
    },

    /// The requested model is not loaded (HTTP 404).
    #[error("model '{model}' is not loaded; load it in the backend")]
    ModelNotLoaded {
        /// Model identity that was requested.
        model: String,
    },

    /// The backend's internal regex engine failed. Transient from the
    /// caller's perspective: the submitter retries on its next iteration.
    #[error("backend regex engine failed; this may be transient")]
    RegexEngineFailure,

    /// The prompt exceeds the model's context window.
    #[error(
        "prompt (~{prompt_tokens} tokens) exceeds the model's context window; \
         reload the model with a context length of at least {required} tokens"
    )]
    InputOverflow {
        /// Approximate prompt size in tokens.
        prompt_tokens: usize,
        /// Context length required to fit the prompt plus output headroom.
        required: usize,
    },

    /// The model exhausted context mid-generation. `max_tokens` is always
    /// set precisely to prevent this, so it indicates an internal bug.
    #[error("model ran out of context during generation; max_tokens should prevent this")]
    MidGenerationOverflow,

    /// Non-classified HTTP failure.
    #[error("backend HTTP {status}: {detail}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or error detail.
        detail: String,
    },

    /// Connection-level failure (refused, reset, timeout).
    #[error("backend connection failed: {0}")]
    Connection(String),

    /// The backend returned no choices.
    #[error("backend returned an empty response")]
    EmptyResponse,

    /// Retries were exhausted without success.
    #[error("request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final error message.
        last: String,
    },
}

impl GatewayError {
    /// Whether the caller may retry this failure on the same backend.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::Connection(_))
    }
}

/// Errors from the JSON contract layer.
#[derive(Error, Debug)]
pub enum ContractError {
    /// No JSON object could be located in the LLM output.
    #[error("no JSON found in LLM output")]
    NoJsonFound,

    /// Extraction or repair produced text that still fails to parse.
    #[error("invalid JSON after '{stage}' repair: {detail}")]
    Parse {
        /// The last repair stage that was attempted.
        stage: String,
        /// Parser error detail.
        detail: String,
    },

    /// A required field is missing or has the wrong primitive type.
    #[error("field '{field}': expected {expected}, got {actual}")]
    SchemaViolation {
        /// Field name.
        field: String,
        /// Expected type or value set.
        expected: String,
        /// What was actually present.
        actual: String,
    },
}

/// Errors from the retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Transient index inconsistency during a concurrent write. Retried
    /// internally with exponential backoff; surfaces only after exhaustion.
    #[error("index temporarily unavailable: {detail}")]
    IndexTransient {
        /// Underlying index error text.
        detail: String,
    },

    /// A chunk size class that is not configured.
    #[error("unknown chunk size class: {size}")]
    UnknownSizeClass {
        /// The requested size class.
        size: usize,
    },

    /// Embedding generation failed.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Errors from state stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read a store file.
    #[error("failed to read {path}: {reason}")]
    ReadFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to write a store file.
    #[error("failed to write {path}: {reason}")]
    WriteFailed {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// A section placeholder expected in the paper was not present.
    #[error("placeholder not found in paper: {placeholder}")]
    PlaceholderMissing {
        /// Placeholder text (truncated preview).
        placeholder: String,
    },

    /// A numbered entry was not found.
    #[error("entry #{number} not found")]
    EntryNotFound {
        /// Entry number.
        number: u64,
    },

    /// Persisted state could not be deserialized.
    #[error("corrupt state in {path}: {reason}")]
    Corrupt {
        /// Path to the file.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Errors from context allocation.
#[derive(Error, Debug)]
pub enum AllocationError {
    /// The user prompt alone exceeds the input budget. Non-retriable;
    /// surfaced to the user.
    #[error(
        "user prompt ({prompt_tokens} tokens) exceeds maximum allowed \
         ({max_tokens} tokens); shorten the prompt"
    )]
    PromptTooLarge {
        /// Token count of the user prompt.
        prompt_tokens: usize,
        /// Maximum allowed prompt tokens.
        max_tokens: usize,
    },
}

/// Errors from paper compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Placement pre-validation failed: `old_string` does not occur
    /// exactly once in the document.
    #[error("old_string matched {count_found} time(s); exactly one match is required")]
    PlacementMatch {
        /// Preview of the `old_string` that failed to match uniquely.
        old_string: String,
        /// Number of verbatim occurrences found.
        count_found: usize,
    },

    /// An edit operation the compiler does not recognize.
    #[error("unknown edit operation: {operation}")]
    UnknownOperation {
        /// Operation name from the LLM output.
        operation: String,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Store(StoreError::ReadFailed {
            path: String::new(),
            reason: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt {
            path: String::new(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::ModelNotLoaded {
            model: "qwen3-32b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "model 'qwen3-32b' is not loaded; load it in the backend"
        );

        let err = GatewayError::InputOverflow {
            prompt_tokens: 40_000,
            required: 45_000,
        };
        assert!(err.to_string().contains("40000"));
        assert!(err.to_string().contains("45000"));
    }

    #[test]
    fn test_gateway_retriable() {
        assert!(
            GatewayError::Connection("refused".to_string()).is_retriable()
        );
        assert!(
            GatewayError::Http {
                status: 500,
                detail: "oops".to_string()
            }
            .is_retriable()
        );
        assert!(!GatewayError::MidGenerationOverflow.is_retriable());
        assert!(
            !GatewayError::ModelCrashed {
                model: "m".to_string(),
                detail: "exit code: 1".to_string()
            }
            .is_retriable()
        );
    }

    #[test]
    fn test_contract_error_display() {
        let err = ContractError::SchemaViolation {
            field: "decision".to_string(),
            expected: "one of accept, reject".to_string(),
            actual: "\"maybe\"".to_string(),
        };
        assert!(err.to_string().contains("decision"));
        assert!(err.to_string().contains("maybe"));
    }

    #[test]
    fn test_allocation_error_display() {
        let err = AllocationError::PromptTooLarge {
            prompt_tokens: 200_000,
            max_tokens: 120_000,
        };
        assert!(err.to_string().contains("shorten the prompt"));
    }

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::PlacementMatch {
            old_string: "The results".to_string(),
            count_found: 2,
        };
        assert!(err.to_string().contains("2 time(s)"));
    }

    #[test]
    fn test_error_from_subsystems() {
        let err: Error = GatewayError::EmptyResponse.into();
        assert!(matches!(err, Error::Gateway(_)));

        let err: Error = ContractError::NoJsonFound.into();
        assert!(matches!(err, Error::Contract(_)));

        let err: Error = RetrievalError::UnknownSizeClass { size: 99 }.into();
        assert!(matches!(err, Error::Retrieval(_)));

        let err: Error = AllocationError::PromptTooLarge {
            prompt_tokens: 1,
            max_tokens: 0,
        }
        .into();
        assert!(matches!(err, Error::Allocation(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Store(_)));
    }
}
