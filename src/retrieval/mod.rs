//! Retrieval engine: hybrid dense/lexical recall with diversification and
//! strict token-budget packing.
//!
//! Per chunk size class the engine maintains one in-memory dense index
//! (cosine) and one BM25 index over the same corpus. Retrieval runs four
//! stages: query rewrite → hybrid recall → rerank+MMR → pack.
//!
//! Writes (ingest, remove, re-chunk) hold a global retrieval lock across
//! all size classes together so readers never observe interleaved partial
//! indices. Embedding calls are allowed inside the held lock; the gateway's
//! embedding semaphore is orthogonal. Reads take the shared side and retry
//! dense queries on the transient index-race signature.

pub mod bm25;
pub mod chunk;
pub mod chunker;
pub mod normalize;
pub mod rank;

pub use chunk::{Chunk, ChunkKind, ChunkMetadata, ContextPack, Evidence};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::RetrievalError;
use crate::gateway::{LlmGateway, is_transient_index_error};
use crate::tokens::count_tokens;
use bm25::Bm25Index;
use rank::{cosine_similarity, drop_near_duplicates, mmr_select};

/// Dense-query retry attempts on the transient index signature.
const INDEX_RETRY_ATTEMPTS: u32 = 3;
/// Initial dense-query retry delay; doubles per attempt (500ms → 1s → 2s).
const INDEX_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Retrieval tuning knobs, extracted from the pipeline config.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Chunk size classes to index.
    pub sizes: Vec<usize>,
    /// Chunk overlap ratio.
    pub overlap_percentage: f32,
    /// Recall depth per modality.
    pub top_k: usize,
    /// Maximum query rewrite variants.
    pub query_rewrite_variants: usize,
    /// Rewrite cache capacity.
    pub rewrite_cache_size: usize,
    /// Dense-score fusion weight.
    pub vector_weight: f32,
    /// BM25-score fusion weight.
    pub bm25_weight: f32,
    /// MMR λ.
    pub mmr_lambda: f32,
    /// Near-duplicate similarity cutoff.
    pub similarity_threshold: f32,
    /// Coverage threshold below which `needs_more_context` is set.
    pub coverage_threshold: f32,
    /// LRU cap on indexed sources.
    pub max_documents: usize,
}

impl RetrievalConfig {
    /// Extracts retrieval settings from the pipeline config.
    #[must_use]
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            sizes: config.submitter_chunk_intervals.clone(),
            overlap_percentage: config.chunk_overlap_percentage,
            top_k: config.hybrid_recall_top_k,
            query_rewrite_variants: config.query_rewrite_variants,
            rewrite_cache_size: config.rewrite_cache_size,
            vector_weight: config.vector_weight,
            bm25_weight: config.bm25_weight,
            mmr_lambda: config.mmr_lambda,
            similarity_threshold: config.similarity_threshold,
            coverage_threshold: config.coverage_threshold,
            max_documents: config.max_documents,
        }
    }
}

/// One size class: the chunk corpus plus its lazily rebuilt BM25 index.
#[derive(Default)]
struct SizeClassIndex {
    chunks: Vec<Arc<Chunk>>,
    bm25: Option<Bm25Index>,
}

/// Engine state guarded by the global retrieval lock (the write side).
#[derive(Default)]
struct EngineState {
    by_size: HashMap<usize, SizeClassIndex>,
    document_count: usize,
    permanent: HashSet<String>,
}

/// Per-source access table for LRU eviction. Separate from the engine
/// state so packing (a read path) can bump access times without the
/// retrieval lock.
#[derive(Default)]
struct AccessTable {
    counter: u64,
    last_access: HashMap<String, u64>,
}

impl AccessTable {
    fn touch(&mut self, source: &str) {
        self.counter += 1;
        self.last_access.insert(source.to_string(), self.counter);
    }

    fn forget(&mut self, source: &str) {
        self.last_access.remove(source);
    }

    fn oldest_excluding(&self, permanent: &HashSet<String>) -> Option<String> {
        self.last_access
            .iter()
            .filter(|(source, _)| !permanent.contains(*source))
            .min_by_key(|&(_, &at)| at)
            .map(|(source, _)| source.clone())
    }
}

/// The retrieval engine shared by all agents.
pub struct RetrievalEngine {
    gateway: Arc<LlmGateway>,
    config: RetrievalConfig,
    state: RwLock<EngineState>,
    rewrite_cache: StdMutex<Vec<(String, Vec<String>)>>,
    access: StdMutex<AccessTable>,
}

impl RetrievalEngine {
    /// Creates an engine with empty indices for every configured size class.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: RetrievalConfig) -> Self {
        let mut by_size = HashMap::with_capacity(config.sizes.len());
        for &size in &config.sizes {
            by_size.insert(size, SizeClassIndex::default());
        }
        Self {
            gateway,
            config,
            state: RwLock::new(EngineState {
                by_size,
                document_count: 0,
                permanent: HashSet::new(),
            }),
            rewrite_cache: StdMutex::new(Vec::new()),
            access: StdMutex::new(AccessTable::default()),
        }
    }

    /// Number of indexed sources.
    pub async fn document_count(&self) -> usize {
        self.state.read().await.document_count
    }

    /// Adds (or replaces) a text source at the given size classes.
    ///
    /// Normalizes, chunks every size, embeds, and swaps the source's chunk
    /// sets atomically under the global retrieval lock. Adding past
    /// `max_documents` evicts the least recently used non-permanent source.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Embedding`] when embedding generation fails.
    pub async fn add_text(
        &self,
        text: &str,
        source: &str,
        sizes: Option<&[usize]>,
        is_permanent: bool,
    ) -> Result<(), RetrievalError> {
        let sizes: Vec<usize> = sizes.map_or_else(|| self.config.sizes.clone(), <[usize]>::to_vec);
        let normalized = normalize::normalize_text(text);
        let mut by_size = chunker::chunk_text(
            &normalized,
            source,
            &sizes,
            self.config.overlap_percentage,
            is_permanent,
        );

        // Global retrieval lock: held across every size class so readers
        // never see a partially re-indexed source.
        let mut state = self.state.write().await;

        let existed = state
            .by_size
            .values()
            .any(|index| index.chunks.iter().any(|c| c.source == source));

        for (&size, index) in &mut state.by_size {
            if let Some(chunks) = by_size.remove(&size) {
                index.chunks.retain(|c| c.source != source);

                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let embeddings = self
                    .gateway
                    .embeddings(&texts)
                    .await
                    .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

                for (mut chunk, embedding) in chunks.into_iter().zip(embeddings) {
                    chunk.embedding = embedding;
                    index.chunks.push(Arc::new(chunk));
                }
                index.bm25 = None;
            }
        }

        if !existed {
            state.document_count += 1;
        }
        if is_permanent {
            state.permanent.insert(source.to_string());
        }
        self.lock_access().touch(source);

        if state.document_count > self.config.max_documents {
            self.evict_lru_locked(&mut state);
        }

        info!(source, sizes = ?sizes, "indexed source");
        Ok(())
    }

    /// Removes a source from every size class.
    ///
    /// Returns whether any chunks were removed.
    pub async fn remove_source(&self, source: &str) -> bool {
        let mut state = self.state.write().await;
        Self::remove_source_locked(&mut state, source, &self.access)
    }

    fn remove_source_locked(
        state: &mut EngineState,
        source: &str,
        access: &StdMutex<AccessTable>,
    ) -> bool {
        let mut removed = false;
        for index in state.by_size.values_mut() {
            let before = index.chunks.len();
            index.chunks.retain(|c| c.source != source);
            if index.chunks.len() != before {
                index.bm25 = None;
                removed = true;
            }
        }
        if removed {
            state.document_count = state.document_count.saturating_sub(1);
            state.permanent.remove(source);
            if let Ok(mut access) = access.lock() {
                access.forget(source);
            }
            info!(source, "removed source");
        }
        removed
    }

    fn evict_lru_locked(&self, state: &mut EngineState) {
        let oldest = self.lock_access().oldest_excluding(&state.permanent);
        match oldest {
            Some(source) => {
                info!(source = %source, "LRU eviction");
                Self::remove_source_locked(state, &source, &self.access);
            }
            None => {
                warn!("document limit reached but every source is permanent; nothing evicted");
            }
        }
    }

    /// Clears all indexed content and caches.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        for index in state.by_size.values_mut() {
            index.chunks.clear();
            index.bm25 = None;
        }
        state.document_count = 0;
        state.permanent.clear();
        if let Ok(mut cache) = self.rewrite_cache.lock() {
            cache.clear();
        }
        if let Ok(mut access) = self.access.lock() {
            *access = AccessTable::default();
        }
        info!("cleared all retrieval state");
    }

    /// Four-stage retrieval into a token-bounded [`ContextPack`].
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::UnknownSizeClass`] for an unconfigured size
    /// and [`RetrievalError::Embedding`] when the query cannot be embedded.
    pub async fn retrieve(
        &self,
        query: &str,
        size_class: usize,
        max_tokens: usize,
    ) -> Result<ContextPack, RetrievalError> {
        if !self.config.sizes.contains(&size_class) {
            return Err(RetrievalError::UnknownSizeClass { size: size_class });
        }

        // Stage 1: query rewriting (cached).
        let variants = self.rewrite_query(query);
        debug!(variants = variants.len(), "retrieval stage 1/4: rewrite");

        // Stage 2: hybrid recall.
        let candidates = self.hybrid_recall(&variants, size_class).await?;
        debug!(candidates = candidates.len(), "retrieval stage 2/4: recall");
        if candidates.is_empty() {
            return Ok(ContextPack::empty());
        }

        // Stage 3: rerank + MMR + near-duplicate drop.
        let ranked = mmr_select(&candidates, self.config.mmr_lambda, self.config.top_k);
        let ranked = drop_near_duplicates(ranked, self.config.similarity_threshold);
        debug!(ranked = ranked.len(), "retrieval stage 3/4: rerank");

        // Stage 4: pack under the token budget.
        let pack = self.pack(&ranked, query, max_tokens);
        debug!(
            evidence = pack.evidence.len(),
            tokens = pack.token_count,
            coverage = pack.coverage,
            "retrieval stage 4/4: pack"
        );
        Ok(pack)
    }

    /// Stage 1: expand the query into surface variants so the dense and
    /// lexical views see different forms. Intentionally simple: original,
    /// minus first word, minus last word.
    fn rewrite_query(&self, query: &str) -> Vec<String> {
        if let Ok(cache) = self.rewrite_cache.lock()
            && let Some((_, cached)) = cache.iter().find(|(key, _)| key == query)
        {
            return cached.clone();
        }

        let words: Vec<&str> = query.split_whitespace().collect();
        let mut variants = vec![query.to_string()];
        if words.len() > 3 {
            variants.push(words[1..].join(" "));
            variants.push(words[..words.len() - 1].join(" "));
        }
        variants.truncate(self.config.query_rewrite_variants);

        if let Ok(mut cache) = self.rewrite_cache.lock() {
            cache.push((query.to_string(), variants.clone()));
            if cache.len() > self.config.rewrite_cache_size {
                cache.remove(0);
            }
        }
        variants
    }

    /// Stage 2: per-variant dense and BM25 recall, fused by weighted sum
    /// and deduplicated by chunk id. Returns up to 2×top-k candidates,
    /// best first.
    async fn hybrid_recall(
        &self,
        variants: &[String],
        size_class: usize,
    ) -> Result<Vec<(Arc<Chunk>, f64)>, RetrievalError> {
        {
            let state = self.state.read().await;
            let Some(index) = state.by_size.get(&size_class) else {
                return Err(RetrievalError::UnknownSizeClass { size: size_class });
            };
            if index.chunks.is_empty() {
                return Ok(Vec::new());
            }
        }

        let variant_embeddings = self
            .gateway
            .embeddings(variants)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let dense = with_index_retry(|| async {
            self.dense_search(&variant_embeddings, size_class).await
        })
        .await?;

        self.ensure_bm25(size_class).await;
        let lexical = self.bm25_search(variants, size_class).await;

        let mut combined: HashMap<String, (Arc<Chunk>, f64)> = HashMap::new();
        for (chunk, sim) in dense {
            combined.insert(
                chunk.id.clone(),
                (chunk, f64::from(self.config.vector_weight) * sim),
            );
        }
        for (chunk, score) in lexical {
            let weighted = f64::from(self.config.bm25_weight) * score;
            combined
                .entry(chunk.id.clone())
                .and_modify(|(_, s)| *s += weighted)
                .or_insert((chunk, weighted));
        }

        let mut fused: Vec<(Arc<Chunk>, f64)> = combined.into_values().collect();
        fused.sort_by(|a, b| b.1.total_cmp(&a.1));
        fused.truncate(self.config.top_k * 2);
        Ok(fused)
    }

    /// Dense top-k per variant, unioned and deduplicated by chunk id
    /// keeping the best similarity.
    async fn dense_search(
        &self,
        variant_embeddings: &[Vec<f32>],
        size_class: usize,
    ) -> Result<Vec<(Arc<Chunk>, f64)>, RetrievalError> {
        let state = self.state.read().await;
        let Some(index) = state.by_size.get(&size_class) else {
            return Err(RetrievalError::UnknownSizeClass { size: size_class });
        };

        let mut best: HashMap<String, (Arc<Chunk>, f64)> = HashMap::new();
        for embedding in variant_embeddings {
            let mut scored: Vec<(Arc<Chunk>, f64)> = index
                .chunks
                .iter()
                .map(|chunk| {
                    let sim = f64::from(cosine_similarity(embedding, &chunk.embedding));
                    (Arc::clone(chunk), sim)
                })
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            for (chunk, sim) in scored.into_iter().take(self.config.top_k) {
                best.entry(chunk.id.clone())
                    .and_modify(|(_, s)| {
                        if sim > *s {
                            *s = sim;
                        }
                    })
                    .or_insert((chunk, sim));
            }
        }

        let mut results: Vec<(Arc<Chunk>, f64)> = best.into_values().collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        results.truncate(self.config.top_k);
        Ok(results)
    }

    /// Rebuilds the BM25 index for a size class if it was invalidated.
    async fn ensure_bm25(&self, size_class: usize) {
        {
            let state = self.state.read().await;
            if state
                .by_size
                .get(&size_class)
                .is_none_or(|index| index.bm25.is_some())
            {
                return;
            }
        }
        let mut state = self.state.write().await;
        if let Some(index) = state.by_size.get_mut(&size_class)
            && index.bm25.is_none()
        {
            let corpus: Vec<Vec<String>> =
                index.chunks.iter().map(|c| c.tokens.clone()).collect();
            debug!(size_class, docs = corpus.len(), "rebuilding BM25 index");
            index.bm25 = Some(Bm25Index::build(&corpus));
        }
    }

    /// BM25 scores summed across variants, max-normalized, top-k positive.
    async fn bm25_search(&self, variants: &[String], size_class: usize) -> Vec<(Arc<Chunk>, f64)> {
        let state = self.state.read().await;
        let Some(index) = state.by_size.get(&size_class) else {
            return Vec::new();
        };
        let Some(bm25) = &index.bm25 else {
            return Vec::new();
        };

        let mut all_scores = vec![0.0f64; index.chunks.len()];
        for variant in variants {
            let tokens: Vec<String> = variant
                .to_lowercase()
                .split_whitespace()
                .map(ToString::to_string)
                .collect();
            for (i, score) in bm25.scores(&tokens).into_iter().enumerate() {
                all_scores[i] += score;
            }
        }

        let max = all_scores.iter().copied().fold(0.0f64, f64::max);
        if max > 0.0 {
            for score in &mut all_scores {
                *score /= max;
            }
        }

        let mut scored: Vec<(Arc<Chunk>, f64)> = index
            .chunks
            .iter()
            .zip(all_scores)
            .filter(|(_, score)| *score > 0.0)
            .map(|(chunk, score)| (Arc::clone(chunk), score))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.top_k);
        scored
    }

    /// Stage 4: append formatted evidence entries in rank order, stopping
    /// the moment the next entry would cross the budget.
    fn pack(&self, ranked: &[Arc<Chunk>], query: &str, max_tokens: usize) -> ContextPack {
        if ranked.is_empty() {
            return ContextPack::empty();
        }

        let mut evidence = Vec::new();
        let mut source_map = HashMap::new();
        let mut assembled: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;

        for (idx, chunk) in ranked.iter().enumerate() {
            let number = idx + 1;
            let entry = format!("[Evidence {number} from {}]\n{}\n", chunk.source, chunk.text);
            let entry_tokens = count_tokens(&entry);
            if current_tokens + entry_tokens > max_tokens {
                debug!(
                    packed = number - 1,
                    ranked = ranked.len(),
                    current_tokens,
                    max_tokens,
                    "packing stopped at budget"
                );
                break;
            }

            evidence.push(Evidence {
                id: number,
                source: chunk.source.clone(),
                text: chunk.text.clone(),
                position: chunk.position,
            });
            source_map.insert(format!("E{number}"), chunk.source.clone());
            assembled.push(entry);
            current_tokens += entry_tokens;

            self.lock_access().touch(&chunk.source);
        }

        let text = assembled.join("\n");

        let query_terms: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(ToString::to_string)
            .collect();
        let text_terms: HashSet<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(ToString::to_string)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let coverage = if query_terms.is_empty() {
            0.0
        } else {
            query_terms.intersection(&text_terms).count() as f32 / query_terms.len() as f32
        };
        #[allow(clippy::cast_precision_loss)]
        let answerability = (ranked.len() as f32 / 10.0 * coverage).min(1.0);

        ContextPack {
            text,
            evidence,
            source_map,
            coverage,
            answerability,
            needs_more_context: coverage < self.config.coverage_threshold,
            chunk_count: ranked.len(),
            token_count: current_tokens,
        }
    }

    #[allow(clippy::missing_panics_doc)]
    fn lock_access(&self) -> std::sync::MutexGuard<'_, AccessTable> {
        match self.access.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("sizes", &self.config.sizes)
            .finish_non_exhaustive()
    }
}

/// Retries an index read on the transient index-race signature with
/// exponential backoff (500ms → 1s → 2s). Other errors surface immediately.
async fn with_index_retry<T, F, Fut>(mut op: F) -> Result<T, RetrievalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetrievalError>>,
{
    let mut delay = INDEX_RETRY_DELAY;
    let mut last: Option<RetrievalError> = None;
    for attempt in 0..INDEX_RETRY_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetrievalError::IndexTransient { detail })
                if is_transient_index_error(&detail) && attempt < INDEX_RETRY_ATTEMPTS - 1 =>
            {
                warn!(
                    attempt = attempt + 1,
                    "index temporarily unavailable, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                last = Some(RetrievalError::IndexTransient { detail });
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(RetrievalError::IndexTransient {
        detail: "retries exhausted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LlmBackend;
    use crate::gateway::message::{CompletionRequest, CompletionResponse};
    use async_trait::async_trait;

    /// Deterministic embedding fake: maps keywords to fixed directions so
    /// similar texts get similar vectors.
    struct KeywordEmbedder;

    fn keyword_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let axes = ["rust", "fox", "learning", "paper"];
        let mut v: Vec<f32> = axes
            .iter()
            .map(|kw| if lower.contains(kw) { 1.0 } else { 0.0 })
            .collect();
        if v.iter().all(|&x| x == 0.0) {
            v[0] = 0.1;
        }
        v
    }

    #[async_trait]
    impl LlmBackend for KeywordEmbedder {
        fn name(&self) -> &str {
            "fake"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, crate::error::GatewayError> {
            Err(crate::error::GatewayError::EmptyResponse)
        }

        async fn embed(
            &self,
            _model: &str,
            inputs: &[String],
        ) -> Result<Vec<Vec<f32>>, crate::error::GatewayError> {
            Ok(inputs.iter().map(|t| keyword_vector(t)).collect())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn test_config() -> RetrievalConfig {
        RetrievalConfig {
            sizes: vec![256, 512],
            overlap_percentage: 0.20,
            top_k: 5,
            query_rewrite_variants: 3,
            rewrite_cache_size: 4,
            vector_weight: 0.6,
            bm25_weight: 0.4,
            mmr_lambda: 0.7,
            similarity_threshold: 0.97,
            coverage_threshold: 0.3,
            max_documents: 3,
        }
    }

    fn engine() -> RetrievalEngine {
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(KeywordEmbedder) as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        ));
        RetrievalEngine::new(gateway, test_config())
    }

    #[tokio::test]
    async fn test_add_and_retrieve() {
        let engine = engine();
        engine
            .add_text(
                "Rust is a systems programming language. The fox jumps quickly. \
                 Machine learning models need data.",
                "notes.txt",
                None,
                false,
            )
            .await
            .unwrap();
        assert_eq!(engine.document_count().await, 1);

        let pack = engine.retrieve("rust programming", 512, 1000).await.unwrap();
        assert!(!pack.is_empty());
        assert!(pack.text.contains("Rust"));
        assert!(pack.token_count <= 1000);
    }

    #[tokio::test]
    async fn test_retrieve_unknown_size_class() {
        let engine = engine();
        let result = engine.retrieve("query", 999, 1000).await;
        assert!(matches!(
            result,
            Err(RetrievalError::UnknownSizeClass { size: 999 })
        ));
    }

    #[tokio::test]
    async fn test_retrieve_empty_corpus() {
        let engine = engine();
        let pack = engine.retrieve("anything", 512, 1000).await.unwrap();
        assert!(pack.is_empty());
        assert!(pack.needs_more_context);
    }

    #[tokio::test]
    async fn test_packing_respects_budget() {
        let engine = engine();
        let long_text: String = (0..200)
            .map(|i| format!("Rust sentence number {i} about systems and safety."))
            .collect::<Vec<_>>()
            .join(" ");
        engine
            .add_text(&long_text, "big.txt", None, false)
            .await
            .unwrap();

        let tight = engine.retrieve("rust systems", 256, 60).await.unwrap();
        assert!(tight.token_count <= 60);

        let loose = engine.retrieve("rust systems", 256, 5000).await.unwrap();
        assert!(loose.evidence.len() >= tight.evidence.len());
    }

    #[tokio::test]
    async fn test_packing_deterministic() {
        let engine = engine();
        engine
            .add_text(
                "Rust is fast. Rust is safe. The fox is quick. Learning is continuous.",
                "a.txt",
                None,
                false,
            )
            .await
            .unwrap();
        let p1 = engine.retrieve("rust fox", 512, 500).await.unwrap();
        let p2 = engine.retrieve("rust fox", 512, 500).await.unwrap();
        assert_eq!(p1.text, p2.text);
        assert_eq!(p1.token_count, p2.token_count);
    }

    #[tokio::test]
    async fn test_replace_source_regenerates_chunks() {
        let engine = engine();
        engine
            .add_text("Old rust content here.", "doc.txt", None, false)
            .await
            .unwrap();
        engine
            .add_text("New fox content here.", "doc.txt", None, false)
            .await
            .unwrap();
        assert_eq!(engine.document_count().await, 1);

        let pack = engine.retrieve("fox content", 512, 1000).await.unwrap();
        assert!(pack.text.contains("New fox"));
        assert!(!pack.text.contains("Old rust"));
    }

    #[tokio::test]
    async fn test_lru_evicts_exactly_one_non_permanent() {
        let engine = engine();
        engine
            .add_text("Permanent rust file.", "user.txt", None, true)
            .await
            .unwrap();
        engine.add_text("Doc one fox.", "d1.txt", None, false).await.unwrap();
        engine.add_text("Doc two fox.", "d2.txt", None, false).await.unwrap();
        assert_eq!(engine.document_count().await, 3);

        // Fourth source crosses max_documents=3: exactly one non-permanent
        // source (the oldest, d1) is evicted.
        engine.add_text("Doc three fox.", "d3.txt", None, false).await.unwrap();
        assert_eq!(engine.document_count().await, 3);

        let pack = engine.retrieve("fox doc", 512, 2000).await.unwrap();
        assert!(!pack.text.contains("Doc one"));
        assert!(pack.text.contains("Doc two") || pack.text.contains("Doc three"));

        // The permanent source is still retrievable.
        let pack = engine.retrieve("rust permanent file", 512, 2000).await.unwrap();
        assert!(pack.text.contains("Permanent"));
    }

    #[tokio::test]
    async fn test_remove_source() {
        let engine = engine();
        engine.add_text("Some rust text.", "doc.txt", None, false).await.unwrap();
        assert!(engine.remove_source("doc.txt").await);
        assert!(!engine.remove_source("doc.txt").await);
        assert_eq!(engine.document_count().await, 0);
    }

    #[tokio::test]
    async fn test_rewrite_variants() {
        let engine = engine();
        let variants = engine.rewrite_query("how does rust ownership work");
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0], "how does rust ownership work");
        assert_eq!(variants[1], "does rust ownership work");
        assert_eq!(variants[2], "how does rust ownership");

        // Short queries stay as-is.
        let variants = engine.rewrite_query("rust ownership");
        assert_eq!(variants, vec!["rust ownership"]);
    }

    #[tokio::test]
    async fn test_rewrite_cache_hit() {
        let engine = engine();
        let first = engine.rewrite_query("one two three four five");
        let second = engine.rewrite_query("one two three four five");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_index_retry_recovers_from_transient() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<u32, RetrievalError> = with_index_retry(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                    Err(RetrievalError::IndexTransient {
                        detail: "hnsw segment reader failure".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_index_retry_gives_up_after_three() {
        let result: Result<(), RetrievalError> = with_index_retry(|| async {
            Err(RetrievalError::IndexTransient {
                detail: "nothing found on disk".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(RetrievalError::IndexTransient { .. })));
    }

    #[tokio::test]
    async fn test_index_retry_passes_other_errors_through() {
        let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: Result<(), RetrievalError> = with_index_retry(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(RetrievalError::Embedding("backend down".to_string()))
            }
        })
        .await;
        assert!(matches!(result, Err(RetrievalError::Embedding(_))));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coverage_and_answerability() {
        let engine = engine();
        engine
            .add_text("The rust borrow checker enforces ownership.", "doc.txt", None, false)
            .await
            .unwrap();
        let pack = engine.retrieve("rust ownership", 512, 1000).await.unwrap();
        assert!(pack.coverage > 0.0);
        assert!(pack.answerability <= 1.0);
    }
}
