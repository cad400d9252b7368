//! Post-compilation polish agents: rigor enhancement and standalone
//! review.
//!
//! Both are low-context roles running on the high-param model. The review
//! agent sees ONLY the paper, never tier-1 data, so it judges the paper as
//! a standalone document.

use std::sync::Arc;

use tracing::debug;

use super::retry::complete_and_parse_json;
use crate::config::PipelineConfig;
use crate::contract::schema::{ReviewReply, RigorReply};
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;

/// The rigor enhancement agent.
pub struct RigorAgent {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl RigorAgent {
    /// Creates the agent.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Proposes one rigor enhancement anchored on verbatim paper text.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn propose(
        &self,
        task_id: &str,
        user_prompt: &str,
        paper: &str,
        knowledge_context: &str,
    ) -> Result<RigorReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::RIGOR_ENHANCE_SYSTEM_PROMPT,
            prompts::RIGOR_ENHANCE_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("PAPER", paper),
                ("KNOWLEDGE BASE", knowledge_context),
            ],
            "Propose your enhancement as JSON:",
        );

        let call = low_context_call(
            &self.config,
            task_id,
            "rigor",
            &self.config.high_param_model,
            &prompt,
        );
        let available = self.config.available_input_tokens(
            self.config.high_param_context_window,
            self.config.high_param_max_output_tokens,
        );
        let (value, _) = complete_and_parse_json(&self.gateway, call, available).await?;
        let reply = RigorReply::from_value(&value)?;
        debug!(needs_enhancement = reply.needs_enhancement, "rigor proposal");
        Ok(reply)
    }
}

/// The standalone review agent. Has no access to tier-1 data.
pub struct ReviewAgent {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl ReviewAgent {
    /// Creates the agent.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Proposes at most one exposition edit over the paper alone.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn propose(&self, task_id: &str, paper: &str) -> Result<ReviewReply, Error> {
        // Only the paper: review judges the document standalone.
        let prompt = prompts::build_sectioned_prompt(
            prompts::REVIEW_SYSTEM_PROMPT,
            prompts::REVIEW_SCHEMA,
            &[("PAPER", paper)],
            "Propose your edit as JSON:",
        );

        let call = low_context_call(
            &self.config,
            task_id,
            "review",
            &self.config.high_param_model,
            &prompt,
        );
        let available = self.config.available_input_tokens(
            self.config.high_param_context_window,
            self.config.high_param_max_output_tokens,
        );
        let (value, _) = complete_and_parse_json(&self.gateway, call, available).await?;
        let reply = ReviewReply::from_value(&value)?;
        debug!(needs_edit = reply.needs_edit, edit_type = %reply.edit_type, "review proposal");
        Ok(reply)
    }
}

fn low_context_call(
    config: &PipelineConfig,
    task_id: &str,
    role_id: &str,
    model: &str,
    prompt: &str,
) -> CompletionCall {
    CompletionCall {
        task_id: task_id.to_string(),
        role_id: role_id.to_string(),
        model: model.to_string(),
        messages: vec![user_message(prompt)],
        temperature: 0.0,
        max_tokens: Some(u32::try_from(config.high_param_max_output_tokens).unwrap_or(u32::MAX)),
    }
}

impl std::fmt::Debug for RigorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigorAgent").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ReviewAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewAgent").finish_non_exhaustive()
    }
}
