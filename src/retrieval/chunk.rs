//! Chunk and retrieval-output types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Detected content kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Plain prose.
    Text,
    /// Primarily source code.
    Code,
    /// Tabular content.
    Table,
    /// Mathematical notation.
    Equation,
    /// A section header.
    Section,
}

/// Metadata extracted from a chunk at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Character count.
    pub char_count: usize,
    /// Word count.
    pub word_count: usize,
    /// Sentence count.
    pub sentence_count: usize,
    /// Detected content kind.
    pub kind: ChunkKind,
}

/// An immutable indexed chunk.
///
/// Created by the chunker, destroyed on source removal. The `tokens` field
/// is the lowercased whitespace token bag consumed by the BM25 index.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Unique id: `source::position::size_class`.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Source name this chunk came from.
    pub source: String,
    /// Sequential position within the source at this size class.
    pub position: usize,
    /// Target size class this chunk was produced for.
    pub size_class: usize,
    /// Dense embedding, filled at index time.
    pub embedding: Vec<f32>,
    /// Lowercased whitespace tokens for the lexical index.
    pub tokens: Vec<String>,
    /// Extracted metadata.
    pub metadata: ChunkMetadata,
    /// Permanent chunks (user uploads) are never evicted by the LRU.
    pub is_permanent: bool,
}

impl Chunk {
    /// Builds the canonical chunk id.
    #[must_use]
    pub fn make_id(source: &str, position: usize, size_class: usize) -> String {
        format!("{source}::{position}::{size_class}")
    }
}

/// One evidence entry inside a [`ContextPack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// 1-based evidence number in pack order.
    pub id: usize,
    /// Source name.
    pub source: String,
    /// Chunk text.
    pub text: String,
    /// Chunk position within its source.
    pub position: usize,
}

/// Structured retrieval output: packed evidence with quality signals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPack {
    /// Assembled evidence text ready for prompt injection.
    pub text: String,
    /// Ordered evidence entries.
    pub evidence: Vec<Evidence>,
    /// Map of `E{n}` labels to source names.
    pub source_map: HashMap<String, String>,
    /// Fraction of query terms present in the packed text.
    pub coverage: f32,
    /// Heuristic combining selected-chunk count with coverage.
    pub answerability: f32,
    /// Whether coverage fell below the configured threshold.
    pub needs_more_context: bool,
    /// Number of chunks that survived ranking (not all may be packed).
    pub chunk_count: usize,
    /// Token count of the packed text.
    pub token_count: usize,
}

impl ContextPack {
    /// An empty pack flagged as needing more context.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            needs_more_context: true,
            ..Self::default()
        }
    }

    /// Whether the pack carries any evidence text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
