//! LLM gateway: backend-agnostic completion and embedding client.
//!
//! Exposes two operations — completion and embeddings — over any
//! OpenAI-compatible server, with per-model single-flight discipline,
//! embedding batching, retry with error classification, and optional
//! secondary-backend fallback per role.

mod backend;
mod classify;
pub mod message;

mod client;

pub use backend::{Availability, HttpBackend, LlmBackend};
pub use classify::{classify_completion_error, is_transient_index_error};
pub use client::{
    CompletionCall, DEFAULT_COMPLETION_MAX_TOKENS, LlmGateway, ModelConfig, RouteTarget,
};
