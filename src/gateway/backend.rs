//! Backend seam: the trait every LLM server implementation satisfies,
//! plus the HTTP implementation for OpenAI-compatible servers.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::classify::classify_completion_error;
use super::message::{
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse,
};
use crate::error::GatewayError;
use crate::tokens::count_tokens;

/// Timeout for the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for the loaded-model subprocess.
const LOADED_MODELS_TIMEOUT: Duration = Duration::from_secs(10);

/// A chat-completion + embedding backend.
///
/// Implemented by [`HttpBackend`] for real servers and by in-memory fakes in
/// tests. The gateway composes a primary and an optional fallback backend
/// behind this trait.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logging and route tables.
    fn name(&self) -> &str;

    /// Executes a chat completion.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError>;

    /// Generates embeddings for a batch of inputs, ordered by input index.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, GatewayError>;

    /// Probes whether the backend is reachable.
    async fn is_available(&self) -> bool;
}

/// Availability probe outcome.
#[derive(Debug, Clone, Default)]
pub struct Availability {
    /// Whether the server answered the probe.
    pub available: bool,
    /// Loaded model ids (with instance suffixes) when enumerable.
    pub models: Vec<String>,
    /// Error message when unavailable.
    pub error: Option<String>,
}

/// OpenAI-compatible HTTP backend.
///
/// Uses a keep-alive connection pool with no global request timeout: long
/// completions are expected, so only the availability probe is bounded.
pub struct HttpBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Creates a backend for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Connection`] if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            name: name.into(),
            base_url,
            api_key,
            client,
        })
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Enumerates loaded models (with instance suffixes) via `lms ps`.
    ///
    /// The probe endpoint lists downloaded models; only the out-of-band
    /// subprocess reports what is actually loaded. Returns an empty list
    /// when the command is missing, times out, or fails.
    pub async fn loaded_models() -> Vec<String> {
        let child = match tokio::process::Command::new("lms")
            .arg("ps")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "'lms' command not found in PATH");
                return Vec::new();
            }
        };

        let output = match tokio::time::timeout(LOADED_MODELS_TIMEOUT, child.wait_with_output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "'lms ps' failed");
                return Vec::new();
            }
            Err(_) => {
                warn!("'lms ps' timed out after {}s", LOADED_MODELS_TIMEOUT.as_secs());
                return Vec::new();
            }
        };

        if !output.status.success() {
            warn!(code = ?output.status.code(), "'lms ps' returned non-zero");
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_loaded_models(&stdout)
    }

    /// Full availability check: probe plus loaded-model enumeration.
    pub async fn check_availability(&self) -> Availability {
        if !self.is_available().await {
            return Availability {
                available: false,
                models: Vec::new(),
                error: Some(format!(
                    "cannot reach backend at {}; ensure the server is running",
                    self.base_url
                )),
            };
        }
        let models = Self::loaded_models().await;
        Availability {
            available: true,
            models,
            error: None,
        }
    }
}

/// Parses the human-oriented `lms ps` table: the first whitespace-delimited
/// column of every non-header, non-separator line is a loaded model id.
fn parse_loaded_models(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| {
            let line = line.trim();
            !line.is_empty()
                && !line.starts_with('-')
                && !line.starts_with("ID")
                && !line.starts_with("Model")
        })
        .filter_map(|line| line.split_whitespace().next())
        .map(ToString::to_string)
        .collect()
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let approx_tokens: usize = request
            .messages
            .iter()
            .map(|m| count_tokens(&m.content))
            .sum();
        debug!(
            backend = %self.name,
            model = %request.model,
            approx_tokens,
            "sending completion request"
        );

        let response = self
            .request(format!("{}/v1/chat/completions", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_completion_error(
                status.as_u16(),
                &body,
                &request.model,
                approx_tokens,
            ));
        }

        response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| GatewayError::Connection(format!("malformed completion body: {e}")))
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: inputs.to_vec(),
        };

        let response = self
            .request(format!("{}/v1/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                detail: body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Connection(format!("malformed embedding body: {e}")))?;
        Ok(parsed.ordered())
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match probe {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loaded_models_skips_headers() {
        let stdout = "\
ID                         SIZE     STATUS
--------------------------------------------
openai/gpt-oss-20b:2       12 GB    loaded
qwen3-32b                  19 GB    loaded
";
        let models = parse_loaded_models(stdout);
        assert_eq!(models, vec!["openai/gpt-oss-20b:2", "qwen3-32b"]);
    }

    #[test]
    fn test_parse_loaded_models_empty() {
        assert!(parse_loaded_models("").is_empty());
        assert!(parse_loaded_models("ID STATUS\n----\n").is_empty());
    }

    #[test]
    fn test_backend_trims_trailing_slash() {
        let backend = HttpBackend::new("primary", "http://localhost:1234/", None).unwrap();
        assert_eq!(backend.base_url, "http://localhost:1234");
    }

    #[tokio::test]
    async fn test_unreachable_backend_probe() {
        // Reserved TEST-NET address: connections fail fast or time out.
        let backend = HttpBackend::new("primary", "http://192.0.2.1:9", None).unwrap();
        assert!(!backend.is_available().await);
    }
}
