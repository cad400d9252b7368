//! The LLM gateway: single-flight discipline, batching, retry, fallback.
//!
//! All agents share one gateway. A per-model semaphore of capacity 1
//! serializes completion calls for a given model identity while different
//! models run in parallel; a small fixed semaphore caps embedding
//! concurrency. A `task_id` flows through every call so the caller can
//! drive started/completed telemetry around it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use super::backend::LlmBackend;
use super::message::{ChatMessage, CompletionRequest, CompletionResponse};
use crate::error::GatewayError;

/// Default max_tokens substituted when a caller omits it. Generous enough
/// for reasoning models with extensive thinking; prevents mid-generation
/// context overflow.
pub const DEFAULT_COMPLETION_MAX_TOKENS: u32 = 25_000;
/// Embedding inputs per request.
const EMBEDDING_BATCH_SIZE: usize = 100;
/// Concurrent embedding requests.
const EMBEDDING_CONCURRENCY: usize = 2;
/// Retries per embedding batch.
const EMBEDDING_RETRIES: u32 = 1;
/// Fixed delay between embedding retries.
const EMBEDDING_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Retries for transient completion failures.
const COMPLETION_RETRIES: u32 = 2;

/// Which backend a role's calls start on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteTarget {
    /// The primary (local) backend.
    #[default]
    Primary,
    /// The secondary (OpenRouter-style) backend.
    Fallback,
}

/// A completion call descriptor.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    /// Caller-chosen task id, threaded through for telemetry.
    pub task_id: String,
    /// Role identity used for fallback routing.
    pub role_id: String,
    /// Model identity; single-flight is keyed on this.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Max output tokens; `None` substitutes the gateway default.
    pub max_tokens: Option<u32>,
}

/// Cached per-model load configuration observed at runtime.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Context length the model was loaded with.
    pub context_length: usize,
}

/// Backend-agnostic completion/embedding client shared by all agents.
pub struct LlmGateway {
    primary: Arc<dyn LlmBackend>,
    fallback: Option<Arc<dyn LlmBackend>>,
    embedding_model: String,
    routes: Mutex<HashMap<String, RouteTarget>>,
    model_semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    embedding_semaphore: Semaphore,
    model_configs: Mutex<HashMap<String, ModelConfig>>,
}

impl LlmGateway {
    /// Creates a gateway over a primary backend and an optional fallback.
    #[must_use]
    pub fn new(
        primary: Arc<dyn LlmBackend>,
        fallback: Option<Arc<dyn LlmBackend>>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            primary,
            fallback,
            embedding_model: embedding_model.into(),
            routes: Mutex::new(HashMap::new()),
            model_semaphores: Mutex::new(HashMap::new()),
            embedding_semaphore: Semaphore::new(EMBEDDING_CONCURRENCY),
            model_configs: Mutex::new(HashMap::new()),
        }
    }

    /// Routes a role's calls to the given backend target.
    pub async fn set_route(&self, role_id: &str, target: RouteTarget) {
        self.routes.lock().await.insert(role_id.to_string(), target);
    }

    /// Lazily creates the single-flight semaphore for a model identity.
    async fn model_semaphore(&self, model: &str) -> Arc<Semaphore> {
        let mut semaphores = self.model_semaphores.lock().await;
        Arc::clone(
            semaphores
                .entry(model.to_string())
                .or_insert_with(|| {
                    debug!(model, "created single-flight semaphore");
                    Arc::new(Semaphore::new(1))
                }),
        )
    }

    /// Records a model's observed load configuration.
    pub async fn record_model_config(&self, model: &str, context_length: usize) {
        self.model_configs
            .lock()
            .await
            .insert(model.to_string(), ModelConfig { context_length });
    }

    /// The cached load configuration for a model, when observed.
    pub async fn cached_model_config(&self, model: &str) -> Option<ModelConfig> {
        self.model_configs.lock().await.get(model).cloned()
    }

    /// Executes a completion under per-model single-flight discipline.
    ///
    /// Transient failures retry with linear backoff. A non-retriable
    /// failure on the primary is reissued once on the fallback backend when
    /// the caller's role is routed there.
    ///
    /// # Errors
    ///
    /// Returns the classified [`GatewayError`] after retries and fallback
    /// are exhausted.
    pub async fn completion(
        &self,
        call: CompletionCall,
    ) -> Result<CompletionResponse, GatewayError> {
        let request = CompletionRequest {
            model: call.model.clone(),
            messages: call.messages,
            temperature: call.temperature,
            max_tokens: call.max_tokens.unwrap_or(DEFAULT_COMPLETION_MAX_TOKENS),
            response_format: None,
        };

        let start_target = self
            .routes
            .lock()
            .await
            .get(&call.role_id)
            .copied()
            .unwrap_or_default();

        let semaphore = self.model_semaphore(&call.model).await;
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| GatewayError::Connection(format!("semaphore closed: {e}")))?;

        debug!(
            task_id = %call.task_id,
            role_id = %call.role_id,
            model = %call.model,
            "completion slot acquired"
        );

        let (first, second) = match (start_target, &self.fallback) {
            (RouteTarget::Fallback, Some(fallback)) => {
                (Arc::clone(fallback), Some(Arc::clone(&self.primary)))
            }
            _ => (Arc::clone(&self.primary), self.fallback.clone()),
        };

        match self.complete_with_retry(&*first, &request, &call.task_id).await {
            Ok(response) => Ok(response),
            Err(e) if !e.is_retriable() => {
                if let Some(second) = second {
                    warn!(
                        task_id = %call.task_id,
                        backend = second.name(),
                        error = %e,
                        "primary failed non-retriably; reissuing on fallback"
                    );
                    self.complete_with_retry(&*second, &request, &call.task_id)
                        .await
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn complete_with_retry(
        &self,
        backend: &dyn LlmBackend,
        request: &CompletionRequest,
        task_id: &str,
    ) -> Result<CompletionResponse, GatewayError> {
        let mut last_error: Option<GatewayError> = None;
        for attempt in 0..=COMPLETION_RETRIES {
            match backend.complete(request).await {
                Ok(response) => {
                    if response.choices.is_empty() {
                        return Err(GatewayError::EmptyResponse);
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retriable() && attempt < COMPLETION_RETRIES => {
                    let delay = Duration::from_secs(u64::from(attempt) + 1);
                    warn!(
                        task_id,
                        backend = backend.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "transient completion failure, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    if !e.is_retriable() {
                        error!(task_id, backend = backend.name(), error = %e, "completion failed");
                        return Err(e);
                    }
                    return Err(GatewayError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: e.to_string(),
                    });
                }
            }
        }
        Err(GatewayError::RetriesExhausted {
            attempts: COMPLETION_RETRIES + 1,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Generates embeddings, batching inputs and capping concurrency.
    ///
    /// Batches run sequentially within one embedding slot; each batch has
    /// its own bounded retry with a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns the last [`GatewayError`] once a batch exhausts its retries.
    pub async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let _permit = self
            .embedding_semaphore
            .acquire()
            .await
            .map_err(|e| GatewayError::Connection(format!("semaphore closed: {e}")))?;

        let total_batches = texts.len().div_ceil(EMBEDDING_BATCH_SIZE);
        let mut all = Vec::with_capacity(texts.len());
        for (batch_idx, batch) in texts.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
            debug!(
                batch = batch_idx + 1,
                total_batches,
                size = batch.len(),
                "embedding batch"
            );
            let vectors = self.embed_batch_with_retry(batch).await?;
            all.extend(vectors);
        }

        info!(count = texts.len(), batches = total_batches, "embeddings complete");
        Ok(all)
    }

    async fn embed_batch_with_retry(
        &self,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut last_error: Option<GatewayError> = None;
        for attempt in 0..=EMBEDDING_RETRIES {
            match self.primary.embed(&self.embedding_model, batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if attempt < EMBEDDING_RETRIES {
                        warn!(
                            attempt = attempt + 1,
                            error = %e,
                            "embedding batch failed, retrying in {EMBEDDING_RETRY_DELAY:?}"
                        );
                        tokio::time::sleep(EMBEDDING_RETRY_DELAY).await;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(GatewayError::EmptyResponse))
    }

    /// Whether the primary backend is reachable.
    pub async fn is_available(&self) -> bool {
        self.primary.is_available().await
    }
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|b| b.name()))
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::message::{user_message, Choice, ChoiceMessage, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Backend that tracks per-model in-flight counts and fails on demand.
    struct FakeBackend {
        name: String,
        delay: Duration,
        in_flight: StdMutex<HashMap<String, usize>>,
        max_in_flight: StdMutex<HashMap<String, usize>>,
        global_max: AtomicUsize,
        global_current: AtomicUsize,
        failures: StdMutex<Vec<GatewayError>>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &str, delay: Duration) -> Self {
            Self {
                name: name.to_string(),
                delay,
                in_flight: StdMutex::new(HashMap::new()),
                max_in_flight: StdMutex::new(HashMap::new()),
                global_max: AtomicUsize::new(0),
                global_current: AtomicUsize::new(0),
                failures: StdMutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn fail_next(&self, error: GatewayError) {
            self.failures.lock().unwrap().push(error);
        }

        fn ok_response() -> CompletionResponse {
            CompletionResponse {
                choices: vec![Choice {
                    message: ChoiceMessage {
                        content: Some("{\"ok\": true}".to_string()),
                        reasoning: None,
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: TokenUsage::default(),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for FakeBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }

            {
                let mut in_flight = self.in_flight.lock().unwrap();
                let count = in_flight.entry(request.model.clone()).or_insert(0);
                *count += 1;
                let mut max = self.max_in_flight.lock().unwrap();
                let entry = max.entry(request.model.clone()).or_insert(0);
                *entry = (*entry).max(*count);
            }
            let current = self.global_current.fetch_add(1, Ordering::SeqCst) + 1;
            self.global_max.fetch_max(current, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.global_current.fetch_sub(1, Ordering::SeqCst);
            if let Some(count) = self.in_flight.lock().unwrap().get_mut(&request.model) {
                *count -= 1;
            }

            Ok(Self::ok_response())
        }

        async fn embed(
            &self,
            _model: &str,
            inputs: &[String],
        ) -> Result<Vec<Vec<f32>>, GatewayError> {
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn call(model: &str) -> CompletionCall {
        CompletionCall {
            task_id: "t1".to_string(),
            role_id: "submitter_0".to_string(),
            model: model.to_string(),
            messages: vec![user_message("hi")],
            temperature: 0.0,
            max_tokens: Some(64),
        }
    }

    #[tokio::test]
    async fn test_per_model_single_flight() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::from_millis(30)));
        let gateway = Arc::new(LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        ));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let gw = Arc::clone(&gateway);
            handles.push(tokio::spawn(async move { gw.completion(call("model-x")).await }));
        }
        let gw = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move { gw.completion(call("model-y")).await }));

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        // Same-model calls never overlapped; cross-model calls did.
        let max = backend.max_in_flight.lock().unwrap();
        assert_eq!(max.get("model-x"), Some(&1));
        assert_eq!(max.get("model-y"), Some(&1));
        assert!(backend.global_max.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_default_max_tokens_substituted() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        let gateway = LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        );
        let mut c = call("m");
        c.max_tokens = None;
        assert!(gateway.completion(c).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_retry_then_success() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        backend.fail_next(GatewayError::Connection("reset".to_string()));
        let gateway = LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        );
        let result = gateway.completion(call("m")).await;
        assert!(result.is_ok());
        assert!(backend.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_non_retriable_without_fallback_surfaces() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        backend.fail_next(GatewayError::ModelCrashed {
            model: "m".to_string(),
            detail: "exit code: 6".to_string(),
        });
        let gateway = LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        );
        let result = gateway.completion(call("m")).await;
        assert!(matches!(result, Err(GatewayError::ModelCrashed { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retriable_reissues_on_fallback() {
        let primary = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        primary.fail_next(GatewayError::MidGenerationOverflow);
        let fallback = Arc::new(FakeBackend::new("fallback", Duration::ZERO));
        let gateway = LlmGateway::new(
            Arc::clone(&primary) as Arc<dyn LlmBackend>,
            Some(Arc::clone(&fallback) as Arc<dyn LlmBackend>),
            "embed-model",
        );
        let result = gateway.completion(call("m")).await;
        assert!(result.is_ok());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_role_routed_to_fallback_first() {
        let primary = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        let fallback = Arc::new(FakeBackend::new("fallback", Duration::ZERO));
        let gateway = LlmGateway::new(
            Arc::clone(&primary) as Arc<dyn LlmBackend>,
            Some(Arc::clone(&fallback) as Arc<dyn LlmBackend>),
            "embed-model",
        );
        gateway.set_route("submitter_0", RouteTarget::Fallback).await;
        assert!(gateway.completion(call("m")).await.is_ok());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embeddings_batching_and_order() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        let gateway = LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        );
        let texts: Vec<String> = (0..250).map(|i| format!("text {i}")).collect();
        let vectors = gateway.embeddings(&texts).await.unwrap();
        assert_eq!(vectors.len(), 250);
    }

    #[tokio::test]
    async fn test_embeddings_retry_exhaustion() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        backend.fail_next(GatewayError::Connection("down".to_string()));
        backend.fail_next(GatewayError::Connection("down".to_string()));
        let gateway = LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        );
        let result = gateway.embeddings(&["a".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_model_config_cache() {
        let backend = Arc::new(FakeBackend::new("primary", Duration::ZERO));
        let gateway = LlmGateway::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        );
        assert!(gateway.cached_model_config("m").await.is_none());
        gateway.record_model_config("m", 131_072).await;
        assert_eq!(
            gateway.cached_model_config("m").await.map(|c| c.context_length),
            Some(131_072)
        );
    }
}
