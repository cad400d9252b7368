//! Pipeline configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;

use crate::error::Error;

/// Default chunk size classes indexed for submitters (cycled per submitter).
pub const DEFAULT_CHUNK_INTERVALS: [usize; 4] = [256, 512, 768, 1024];
/// Default constant chunk size used by validators and the compiler.
pub const DEFAULT_VALIDATOR_CHUNK_SIZE: usize = 512;
/// Default sentence-boundary-aware chunk overlap ratio.
pub const DEFAULT_CHUNK_OVERLAP: f32 = 0.20;
/// Default LRU cap on indexed sources.
const DEFAULT_MAX_DOCUMENTS: usize = 50;
/// Default recall depth per retrieval modality.
const DEFAULT_HYBRID_RECALL_TOP_K: usize = 10;
/// Default number of query rewrite variants.
const DEFAULT_QUERY_REWRITE_VARIANTS: usize = 3;
/// Default rewrite cache capacity.
const DEFAULT_REWRITE_CACHE_SIZE: usize = 128;
/// Default dense-score weight in hybrid fusion.
const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;
/// Default BM25-score weight in hybrid fusion.
const DEFAULT_BM25_WEIGHT: f32 = 0.4;
/// Default MMR relevance/diversity balance.
const DEFAULT_MMR_LAMBDA: f32 = 0.7;
/// Default near-duplicate cosine similarity cutoff.
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.95;
/// Default query-term coverage below which more context is flagged.
const DEFAULT_COVERAGE_THRESHOLD: f32 = 0.3;
/// Default minimum token reserve kept free for RAG retrieval.
const DEFAULT_MIN_RAG_RESERVE: usize = 5000;
/// Default safety margin subtracted from every context window.
const DEFAULT_SAFETY_MARGIN: usize = 2000;
/// Default context window for submitter-class roles.
const DEFAULT_WIDE_CONTEXT_WINDOW: usize = 131_072;
/// Default context window for the low-context rigor/review roles.
const DEFAULT_NARROW_CONTEXT_WINDOW: usize = 10_000;
/// Default max output tokens for generation-heavy roles.
const DEFAULT_WIDE_MAX_OUTPUT: usize = 25_000;
/// Default max output tokens for validation-class roles.
const DEFAULT_NARROW_MAX_OUTPUT: usize = 15_000;
/// Default number of concurrent tier-1 submitters.
const DEFAULT_SUBMITTER_COUNT: usize = 3;
/// Default bound on validator accept/reject loops.
const DEFAULT_MAX_RETRIES: u32 = 10;
/// Default number of acceptances between cleanup reviews.
const DEFAULT_CLEANUP_REVIEW_INTERVAL: u64 = 5;
/// Default number of acceptances between completion reviews.
const DEFAULT_COMPLETION_REVIEW_INTERVAL: u64 = 10;
/// Safety cap on shared-training entries. Exceeding it logs but never truncates.
const DEFAULT_MAX_SHARED_TRAINING_INSIGHTS: usize = 1000;
/// Default backend base URL (LM Studio convention).
const DEFAULT_BASE_URL: &str = "http://localhost:1234";
/// Default secondary backend base URL.
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
/// Default allowed CORS origins for the outer API surface.
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Process-wide pipeline configuration.
///
/// Covers the retrieval engine, context allocator, gateway routing, and
/// workflow pacing. Constructed once at startup and shared by reference
/// through the [`crate::app::App`] record.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Primary backend base URL (OpenAI-compatible).
    pub base_url: String,
    /// Optional API key for the primary backend.
    pub api_key: Option<String>,
    /// Whether the secondary (OpenRouter-style) backend is enabled.
    pub openrouter_enabled: bool,
    /// Secondary backend base URL.
    pub openrouter_base_url: String,
    /// API key for the secondary backend.
    pub openrouter_api_key: Option<String>,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Model for tier-1 submitters.
    pub submitter_model: String,
    /// Model for validators.
    pub validator_model: String,
    /// Model for the tier-2 high-context compiler submitter.
    pub high_context_model: String,
    /// Model for the low-context rigor/review agents.
    pub high_param_model: String,
    /// Chunk size classes indexed for submitters (cycled per submitter).
    pub submitter_chunk_intervals: Vec<usize>,
    /// Constant chunk size used by validators and the compiler.
    pub validator_chunk_size: usize,
    /// Sentence-boundary-aware chunk overlap ratio.
    pub chunk_overlap_percentage: f32,
    /// LRU cap on indexed sources.
    pub max_documents: usize,
    /// Recall depth per retrieval modality.
    pub hybrid_recall_top_k: usize,
    /// Maximum query rewrite variants.
    pub query_rewrite_variants: usize,
    /// Rewrite cache capacity.
    pub rewrite_cache_size: usize,
    /// Dense-score weight in hybrid fusion.
    pub vector_weight: f32,
    /// BM25-score weight in hybrid fusion.
    pub bm25_weight: f32,
    /// MMR relevance/diversity balance (λ).
    pub mmr_lambda: f32,
    /// Near-duplicate cosine similarity cutoff.
    pub similarity_threshold: f32,
    /// Query-term coverage below which `needs_more` is flagged.
    pub coverage_threshold: f32,
    /// Minimum token reserve kept free for RAG retrieval.
    pub min_rag_reserve: usize,
    /// Safety margin subtracted from every context window.
    pub safety_margin: usize,
    /// Context window for submitters.
    pub submitter_context_window: usize,
    /// Context window for validators.
    pub validator_context_window: usize,
    /// Context window for the high-context compiler submitter.
    pub high_context_window: usize,
    /// Context window for the low-context rigor/review agents.
    pub high_param_context_window: usize,
    /// Max output tokens for submitters.
    pub submitter_max_output_tokens: usize,
    /// Max output tokens for validators.
    pub validator_max_output_tokens: usize,
    /// Max output tokens for the high-context compiler submitter.
    pub high_context_max_output_tokens: usize,
    /// Max output tokens for the low-context rigor/review agents.
    pub high_param_max_output_tokens: usize,
    /// Number of concurrent tier-1 submitters.
    pub submitter_count: usize,
    /// Bound on validator accept/reject loops.
    pub max_retries: u32,
    /// Acceptances between cleanup reviews.
    pub cleanup_review_interval: u64,
    /// Acceptances between completion reviews.
    pub completion_review_interval: u64,
    /// Safety cap on shared-training entries (logs, never truncates).
    pub max_shared_training_insights: usize,
    /// Session directory holding all persisted state.
    pub session_dir: PathBuf,
    /// Allowed CORS origins for the outer API surface.
    pub cors_origins: Vec<String>,
}

impl PipelineConfig {
    /// Creates a new builder for `PipelineConfig`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a configured value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::builder().from_env().build()
    }

    /// Usable input tokens for a role: window minus output reservation and
    /// safety margin.
    #[must_use]
    pub fn available_input_tokens(&self, context_window: usize, max_output: usize) -> usize {
        context_window
            .saturating_sub(max_output)
            .saturating_sub(self.safety_margin)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    openrouter_enabled: Option<bool>,
    openrouter_base_url: Option<String>,
    openrouter_api_key: Option<String>,
    embedding_model: Option<String>,
    submitter_model: Option<String>,
    validator_model: Option<String>,
    high_context_model: Option<String>,
    high_param_model: Option<String>,
    submitter_chunk_intervals: Option<Vec<usize>>,
    validator_chunk_size: Option<usize>,
    chunk_overlap_percentage: Option<f32>,
    max_documents: Option<usize>,
    hybrid_recall_top_k: Option<usize>,
    query_rewrite_variants: Option<usize>,
    rewrite_cache_size: Option<usize>,
    vector_weight: Option<f32>,
    bm25_weight: Option<f32>,
    mmr_lambda: Option<f32>,
    similarity_threshold: Option<f32>,
    coverage_threshold: Option<f32>,
    min_rag_reserve: Option<usize>,
    safety_margin: Option<usize>,
    submitter_context_window: Option<usize>,
    validator_context_window: Option<usize>,
    high_context_window: Option<usize>,
    high_param_context_window: Option<usize>,
    submitter_max_output_tokens: Option<usize>,
    validator_max_output_tokens: Option<usize>,
    high_context_max_output_tokens: Option<usize>,
    high_param_max_output_tokens: Option<usize>,
    submitter_count: Option<usize>,
    max_retries: Option<u32>,
    cleanup_review_interval: Option<u64>,
    completion_review_interval: Option<u64>,
    max_shared_training_insights: Option<usize>,
    session_dir: Option<PathBuf>,
    cors_origins: Option<Vec<String>>,
}

impl PipelineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.base_url.is_none() {
            self.base_url = std::env::var("PAPERFORGE_BASE_URL").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("PAPERFORGE_API_KEY").ok();
        }
        if self.openrouter_api_key.is_none() {
            self.openrouter_api_key = std::env::var("OPENROUTER_API_KEY").ok();
        }
        if self.openrouter_enabled.is_none() {
            self.openrouter_enabled = std::env::var("OPENROUTER_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.embedding_model.is_none() {
            self.embedding_model = std::env::var("PAPERFORGE_EMBEDDING_MODEL").ok();
        }
        if self.session_dir.is_none() {
            self.session_dir = std::env::var("PAPERFORGE_SESSION_DIR")
                .ok()
                .map(PathBuf::from);
        }
        if self.cors_origins.is_none() {
            self.cors_origins = std::env::var("CORS_ORIGINS")
                .ok()
                .map(|csv| csv.split(',').map(|s| s.trim().to_string()).collect());
        }
        self
    }

    /// Sets the primary backend base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the primary backend API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Enables the secondary backend and sets its API key.
    #[must_use]
    pub fn openrouter(mut self, api_key: impl Into<String>) -> Self {
        self.openrouter_enabled = Some(true);
        self.openrouter_api_key = Some(api_key.into());
        self
    }

    /// Sets the embedding model.
    #[must_use]
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Sets the submitter model.
    #[must_use]
    pub fn submitter_model(mut self, model: impl Into<String>) -> Self {
        self.submitter_model = Some(model.into());
        self
    }

    /// Sets the validator model.
    #[must_use]
    pub fn validator_model(mut self, model: impl Into<String>) -> Self {
        self.validator_model = Some(model.into());
        self
    }

    /// Sets the high-context compiler model.
    #[must_use]
    pub fn high_context_model(mut self, model: impl Into<String>) -> Self {
        self.high_context_model = Some(model.into());
        self
    }

    /// Sets the low-context rigor/review model.
    #[must_use]
    pub fn high_param_model(mut self, model: impl Into<String>) -> Self {
        self.high_param_model = Some(model.into());
        self
    }

    /// Sets the chunk size classes.
    #[must_use]
    pub fn submitter_chunk_intervals(mut self, sizes: Vec<usize>) -> Self {
        self.submitter_chunk_intervals = Some(sizes);
        self
    }

    /// Sets the validator chunk size.
    #[must_use]
    pub const fn validator_chunk_size(mut self, size: usize) -> Self {
        self.validator_chunk_size = Some(size);
        self
    }

    /// Sets the chunk overlap ratio.
    #[must_use]
    pub const fn chunk_overlap_percentage(mut self, overlap: f32) -> Self {
        self.chunk_overlap_percentage = Some(overlap);
        self
    }

    /// Sets the LRU document cap.
    #[must_use]
    pub const fn max_documents(mut self, n: usize) -> Self {
        self.max_documents = Some(n);
        self
    }

    /// Sets the hybrid recall depth.
    #[must_use]
    pub const fn hybrid_recall_top_k(mut self, k: usize) -> Self {
        self.hybrid_recall_top_k = Some(k);
        self
    }

    /// Sets the MMR λ.
    #[must_use]
    pub const fn mmr_lambda(mut self, lambda: f32) -> Self {
        self.mmr_lambda = Some(lambda);
        self
    }

    /// Sets the near-duplicate similarity cutoff.
    #[must_use]
    pub const fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    /// Sets the coverage threshold.
    #[must_use]
    pub const fn coverage_threshold(mut self, threshold: f32) -> Self {
        self.coverage_threshold = Some(threshold);
        self
    }

    /// Sets the minimum RAG reserve.
    #[must_use]
    pub const fn min_rag_reserve(mut self, tokens: usize) -> Self {
        self.min_rag_reserve = Some(tokens);
        self
    }

    /// Sets the context-window safety margin.
    #[must_use]
    pub const fn safety_margin(mut self, tokens: usize) -> Self {
        self.safety_margin = Some(tokens);
        self
    }

    /// Sets the submitter context window.
    #[must_use]
    pub const fn submitter_context_window(mut self, tokens: usize) -> Self {
        self.submitter_context_window = Some(tokens);
        self
    }

    /// Sets the validator context window.
    #[must_use]
    pub const fn validator_context_window(mut self, tokens: usize) -> Self {
        self.validator_context_window = Some(tokens);
        self
    }

    /// Sets the high-context window.
    #[must_use]
    pub const fn high_context_window(mut self, tokens: usize) -> Self {
        self.high_context_window = Some(tokens);
        self
    }

    /// Sets the submitter max output tokens.
    #[must_use]
    pub const fn submitter_max_output_tokens(mut self, tokens: usize) -> Self {
        self.submitter_max_output_tokens = Some(tokens);
        self
    }

    /// Sets the validator max output tokens.
    #[must_use]
    pub const fn validator_max_output_tokens(mut self, tokens: usize) -> Self {
        self.validator_max_output_tokens = Some(tokens);
        self
    }

    /// Sets the number of concurrent submitters.
    #[must_use]
    pub const fn submitter_count(mut self, n: usize) -> Self {
        self.submitter_count = Some(n);
        self
    }

    /// Sets the accept/reject loop bound.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the cleanup review interval.
    #[must_use]
    pub const fn cleanup_review_interval(mut self, n: u64) -> Self {
        self.cleanup_review_interval = Some(n);
        self
    }

    /// Sets the completion review interval.
    #[must_use]
    pub const fn completion_review_interval(mut self, n: u64) -> Self {
        self.completion_review_interval = Some(n);
        self
    }

    /// Sets the session directory.
    #[must_use]
    pub fn session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }

    /// Builds the [`PipelineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the chunk interval list is empty or a
    /// weight/ratio is out of range.
    pub fn build(self) -> Result<PipelineConfig, Error> {
        let submitter_chunk_intervals = self
            .submitter_chunk_intervals
            .unwrap_or_else(|| DEFAULT_CHUNK_INTERVALS.to_vec());
        if submitter_chunk_intervals.is_empty() {
            return Err(Error::Config {
                message: "submitter_chunk_intervals must not be empty".to_string(),
            });
        }

        let chunk_overlap_percentage = self.chunk_overlap_percentage.unwrap_or(DEFAULT_CHUNK_OVERLAP);
        if !(0.0..1.0).contains(&chunk_overlap_percentage) {
            return Err(Error::Config {
                message: format!("chunk_overlap_percentage {chunk_overlap_percentage} out of [0,1)"),
            });
        }

        let mmr_lambda = self.mmr_lambda.unwrap_or(DEFAULT_MMR_LAMBDA);
        if !(0.0..=1.0).contains(&mmr_lambda) {
            return Err(Error::Config {
                message: format!("mmr_lambda {mmr_lambda} out of [0,1]"),
            });
        }

        Ok(PipelineConfig {
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: self.api_key,
            openrouter_enabled: self.openrouter_enabled.unwrap_or(false),
            openrouter_base_url: self
                .openrouter_base_url
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            openrouter_api_key: self.openrouter_api_key,
            embedding_model: self
                .embedding_model
                .unwrap_or_else(|| "text-embedding-nomic-embed-text-v1.5".to_string()),
            submitter_model: self
                .submitter_model
                .unwrap_or_else(|| "qwen3-14b".to_string()),
            validator_model: self
                .validator_model
                .unwrap_or_else(|| "qwen3-32b".to_string()),
            high_context_model: self
                .high_context_model
                .unwrap_or_else(|| "qwen3-32b".to_string()),
            high_param_model: self
                .high_param_model
                .unwrap_or_else(|| "qwen3-14b".to_string()),
            submitter_chunk_intervals,
            validator_chunk_size: self
                .validator_chunk_size
                .unwrap_or(DEFAULT_VALIDATOR_CHUNK_SIZE),
            chunk_overlap_percentage,
            max_documents: self.max_documents.unwrap_or(DEFAULT_MAX_DOCUMENTS),
            hybrid_recall_top_k: self
                .hybrid_recall_top_k
                .unwrap_or(DEFAULT_HYBRID_RECALL_TOP_K),
            query_rewrite_variants: self
                .query_rewrite_variants
                .unwrap_or(DEFAULT_QUERY_REWRITE_VARIANTS),
            rewrite_cache_size: self.rewrite_cache_size.unwrap_or(DEFAULT_REWRITE_CACHE_SIZE),
            vector_weight: self.vector_weight.unwrap_or(DEFAULT_VECTOR_WEIGHT),
            bm25_weight: self.bm25_weight.unwrap_or(DEFAULT_BM25_WEIGHT),
            mmr_lambda,
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            coverage_threshold: self
                .coverage_threshold
                .unwrap_or(DEFAULT_COVERAGE_THRESHOLD),
            min_rag_reserve: self.min_rag_reserve.unwrap_or(DEFAULT_MIN_RAG_RESERVE),
            safety_margin: self.safety_margin.unwrap_or(DEFAULT_SAFETY_MARGIN),
            submitter_context_window: self
                .submitter_context_window
                .unwrap_or(DEFAULT_WIDE_CONTEXT_WINDOW),
            validator_context_window: self
                .validator_context_window
                .unwrap_or(DEFAULT_WIDE_CONTEXT_WINDOW),
            high_context_window: self.high_context_window.unwrap_or(DEFAULT_WIDE_CONTEXT_WINDOW),
            high_param_context_window: self
                .high_param_context_window
                .unwrap_or(DEFAULT_NARROW_CONTEXT_WINDOW),
            submitter_max_output_tokens: self
                .submitter_max_output_tokens
                .unwrap_or(DEFAULT_WIDE_MAX_OUTPUT),
            validator_max_output_tokens: self
                .validator_max_output_tokens
                .unwrap_or(DEFAULT_NARROW_MAX_OUTPUT),
            high_context_max_output_tokens: self
                .high_context_max_output_tokens
                .unwrap_or(DEFAULT_WIDE_MAX_OUTPUT),
            high_param_max_output_tokens: self
                .high_param_max_output_tokens
                .unwrap_or(DEFAULT_NARROW_MAX_OUTPUT),
            submitter_count: self.submitter_count.unwrap_or(DEFAULT_SUBMITTER_COUNT),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            cleanup_review_interval: self
                .cleanup_review_interval
                .unwrap_or(DEFAULT_CLEANUP_REVIEW_INTERVAL),
            completion_review_interval: self
                .completion_review_interval
                .unwrap_or(DEFAULT_COMPLETION_REVIEW_INTERVAL),
            max_shared_training_insights: self
                .max_shared_training_insights
                .unwrap_or(DEFAULT_MAX_SHARED_TRAINING_INSIGHTS),
            session_dir: self
                .session_dir
                .unwrap_or_else(|| PathBuf::from("./session_data")),
            cors_origins: self.cors_origins.unwrap_or_else(|| {
                DEFAULT_CORS_ORIGINS
                    .split(',')
                    .map(ToString::to_string)
                    .collect()
            }),
        })
    }
}
