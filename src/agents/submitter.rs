//! Tier-1 submitter: generates candidate submissions against the evolving
//! knowledge base.
//!
//! Each submitter cycles its retrieval chunk size (256 → 512 → 768 → 1024
//! by default) so consecutive submissions see the corpus at different
//! granularities; starts are staggered by submitter id.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info};

use super::retry::complete_and_parse_json;
use super::Submission;
use crate::allocator::{ContextAllocator, SubmitterContext};
use crate::config::PipelineConfig;
use crate::contract::schema::SubmissionReply;
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;

/// Inputs gathered by the coordinator for one submission attempt.
#[derive(Debug, Clone, Default)]
pub struct SubmitterInputs {
    /// The topic prompt driving this attempt.
    pub topic_prompt: String,
    /// Shared training content.
    pub shared_training: String,
    /// Per-submitter rejection log content.
    pub local_training: String,
    /// Topic-level rejection log content.
    pub rejection_log: String,
    /// User files.
    pub user_files: Vec<(String, String)>,
}

/// A tier-1 submitter agent.
pub struct SubmitterAgent {
    id: usize,
    gateway: Arc<LlmGateway>,
    allocator: Arc<ContextAllocator>,
    config: Arc<PipelineConfig>,
    cycle: AtomicUsize,
}

impl SubmitterAgent {
    /// Creates a submitter; the chunk-size cycle starts staggered by id.
    #[must_use]
    pub fn new(
        id: usize,
        gateway: Arc<LlmGateway>,
        allocator: Arc<ContextAllocator>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        let start = id % config.submitter_chunk_intervals.len().max(1);
        Self {
            id,
            gateway,
            allocator,
            config,
            cycle: AtomicUsize::new(start),
        }
    }

    /// Submitter id.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Role id used for gateway routing.
    #[must_use]
    pub fn role_id(&self) -> String {
        format!("submitter_{}", self.id)
    }

    /// Advances the chunk-size cycle and returns the size for this attempt.
    fn next_chunk_size(&self) -> usize {
        let sizes = &self.config.submitter_chunk_intervals;
        let idx = self.cycle.fetch_add(1, Ordering::Relaxed) % sizes.len();
        sizes[idx]
    }

    /// Generates one candidate submission.
    ///
    /// # Errors
    ///
    /// Returns allocation, gateway, or contract errors; the coordinator
    /// converts these into recorded rejections rather than propagating.
    pub async fn submit(&self, task_id: &str, inputs: &SubmitterInputs) -> Result<Submission, Error> {
        let chunk_size = self.next_chunk_size();
        debug!(submitter = self.id, chunk_size, "preparing submission");

        let allocation = self
            .allocator
            .allocate_submitter(&SubmitterContext {
                user_prompt: inputs.topic_prompt.clone(),
                json_schema: prompts::SUBMITTER_SCHEMA.to_string(),
                system_prompt: prompts::SUBMITTER_SYSTEM_PROMPT.to_string(),
                shared_training: inputs.shared_training.clone(),
                local_training: inputs.local_training.clone(),
                rejection_log: inputs.rejection_log.clone(),
                user_files: inputs.user_files.clone(),
                chunk_size,
                context_window: None,
                max_output_tokens: None,
            })
            .await?;

        let rag_text = allocation.rag.as_ref().map(|p| p.text.as_str()).unwrap_or("");
        let prompt = prompts::build_submitter_prompt(
            prompts::SUBMITTER_SYSTEM_PROMPT,
            prompts::SUBMITTER_SCHEMA,
            &inputs.topic_prompt,
            &allocation.direct,
            rag_text,
        );

        let available_input = self.config.available_input_tokens(
            self.config.submitter_context_window,
            self.config.submitter_max_output_tokens,
        );

        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: self.role_id(),
            model: self.config.submitter_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(u32::try_from(self.config.submitter_max_output_tokens).unwrap_or(u32::MAX)),
        };

        let (value, _) = complete_and_parse_json(&self.gateway, call, available_input).await?;
        let reply = SubmissionReply::from_value(&value)?;

        if reply.is_decline {
            info!(submitter = self.id, "submitter declined (exhaustion signal)");
        }

        Ok(Submission::new(
            self.id,
            reply.submission,
            reply.reasoning,
            chunk_size,
            reply.is_decline,
        ))
    }
}

impl std::fmt::Debug for SubmitterAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitterAgent")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
