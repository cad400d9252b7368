//! # paperforge
//!
//! A multi-agent, multi-tier research pipeline over OpenAI-compatible
//! local LLM backends. The pipeline iteratively builds a knowledge base
//! (tier 1), compiles research papers through a phased state machine
//! (tier 2), and synthesizes a final answer from completed papers
//! (tier 3).
//!
//! ## Architecture
//!
//! - **JSON contract layer**: extraction and multi-strategy repair of LLM
//!   JSON output with schema validation per consumer.
//! - **LLM gateway**: per-model single-flight completions, batched
//!   embeddings, error classification, and optional fallback routing.
//! - **Retrieval engine**: hybrid dense/BM25 recall with MMR
//!   diversification and strict token-budget packing, at multiple chunk
//!   size classes.
//! - **Context allocator**: priority-based splitting of content between
//!   direct prompt injection and RAG offload.
//! - **State stores**: crash-safe session files (training logs, outline
//!   and paper streams with anchor/placeholder discipline, workflow
//!   checkpoints) with re-chunk hooks into the retrieval engine.
//! - **Coordinator**: the tier sequence with bounded acceptance loops and
//!   resumable checkpoints.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod agents;
pub mod allocator;
pub mod app;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod prompts;
pub mod retrieval;
pub mod store;
pub mod tokens;

pub mod cli;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use app::App;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use coordinator::Coordinator;

// Re-export gateway types
pub use gateway::{CompletionCall, HttpBackend, LlmBackend, LlmGateway};

// Re-export retrieval types
pub use retrieval::{Chunk, ContextPack, Evidence, RetrievalConfig, RetrievalEngine};

// Re-export contract types
pub use contract::{RepairStrategy, parse_llm_json};
