//! Backend-agnostic message types for LLM communication.
//!
//! These mirror the OpenAI chat-completion wire shape that every supported
//! backend consumes, decoupling agent logic from any specific server.

use serde::{Deserialize, Serialize};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// Creates an assistant message.
#[must_use]
pub fn assistant_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.to_string(),
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature. Defaults to 0.0: the pipeline's evolving
    /// context is the sole diversity source, and determinism keeps JSON
    /// output and validation decisions stable.
    pub temperature: f32,
    /// Maximum tokens to generate. Never unset on the wire.
    pub max_tokens: u32,
    /// Optional response format hint (e.g. `{"type": "json_object"}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens used.
    #[serde(default)]
    pub total_tokens: u32,
}

/// The message inside a completion choice.
///
/// Some reasoning models place their JSON in `reasoning` and leave
/// `content` empty; [`ChoiceMessage::text`] applies the fallback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    /// Primary generated text.
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning-channel text from reasoning models.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ChoiceMessage {
    /// The usable text: `content`, falling back to `reasoning` when
    /// `content` is empty.
    #[must_use]
    pub fn text(&self) -> &str {
        match self.content.as_deref() {
            Some(content) if !content.is_empty() => content,
            _ => self.reasoning.as_deref().unwrap_or_default(),
        }
    }
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// The generated message.
    pub message: ChoiceMessage,
    /// Why the model stopped (e.g. `"stop"`, `"length"`).
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    /// Generated choices.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// Text of the first choice, with the reasoning fallback applied.
    #[must_use]
    pub fn first_text(&self) -> &str {
        self.choices.first().map_or("", |c| c.message.text())
    }
}

/// An embeddings request.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    /// Embedding model identifier.
    pub model: String,
    /// Input texts.
    pub input: Vec<String>,
}

/// One embedding datum with its input index.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingDatum {
    /// Index of the corresponding input.
    pub index: usize,
    /// The embedding vector.
    pub embedding: Vec<f32>,
}

/// An embeddings response.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    /// Embedding data, in arbitrary order; reorder by `index`.
    pub data: Vec<EmbeddingDatum>,
}

impl EmbeddingResponse {
    /// Returns the vectors ordered by input index.
    #[must_use]
    pub fn ordered(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}
