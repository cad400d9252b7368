//! Critique subphase: peer review of the completed body, the revision
//! decision, and the iterative one-edit-per-turn revision loop.

use std::sync::Arc;

use tracing::{debug, info};

use super::retry::complete_and_parse_json;
use crate::config::PipelineConfig;
use crate::contract::schema::{
    RevisionDecisionReply, RevisionEditReply, ValidationReply,
};
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;

/// Maximum critique attempts per paper.
pub const MAX_CRITIQUE_ATTEMPTS: usize = 5;

/// An accepted critique carried into the revision decision.
#[derive(Debug, Clone)]
pub struct AcceptedCritique {
    /// Full critique reasoning.
    pub reasoning: String,
    /// Brief summary.
    pub summary: String,
}

/// The critique agent.
pub struct CritiqueAgent {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl CritiqueAgent {
    /// Creates the agent.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    fn call(&self, task_id: &str, prompt: &str) -> CompletionCall {
        CompletionCall {
            task_id: task_id.to_string(),
            role_id: "critique".to_string(),
            model: self.config.high_context_model.clone(),
            messages: vec![user_message(prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.high_context_max_output_tokens).unwrap_or(u32::MAX),
            ),
        }
    }

    fn available_input(&self) -> usize {
        self.config.available_input_tokens(
            self.config.high_context_window,
            self.config.high_context_max_output_tokens,
        )
    }

    /// One critique attempt. An `accept` decision means the critique found
    /// substantive weaknesses worth acting on.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn critique(
        &self,
        task_id: &str,
        user_prompt: &str,
        paper: &str,
        prior_critiques: &str,
    ) -> Result<ValidationReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::CRITIQUE_SYSTEM_PROMPT,
            prompts::VALIDATOR_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("PAPER", paper),
                ("PRIOR CRITIQUES", prior_critiques),
            ],
            "Provide your critique as JSON:",
        );
        let (value, _) =
            complete_and_parse_json(&self.gateway, self.call(task_id, &prompt), self.available_input())
                .await?;
        let reply = ValidationReply::from_value(&value)?;
        debug!(accepted = reply.decision.is_accept(), "critique attempt");
        Ok(reply)
    }

    /// The submitter's revision decision over the accepted critiques.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn revision_decision(
        &self,
        task_id: &str,
        user_prompt: &str,
        paper: &str,
        critiques: &[AcceptedCritique],
    ) -> Result<RevisionDecisionReply, Error> {
        let critique_text = critiques
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[CRITIQUE {}]\n{}\n{}", i + 1, c.summary, c.reasoning))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::build_sectioned_prompt(
            prompts::REVISION_DECISION_SYSTEM_PROMPT,
            prompts::REVISION_DECISION_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("PAPER", paper),
                ("ACCEPTED CRITIQUES", &critique_text),
            ],
            "Decide and reply as JSON:",
        );
        let (value, _) =
            complete_and_parse_json(&self.gateway, self.call(task_id, &prompt), self.available_input())
                .await?;
        let reply = RevisionDecisionReply::from_value(&value)?;
        info!(action = ?reply.action, "revision decision");
        Ok(reply)
    }

    /// One edit proposal in the partial-revision loop. The loop ends when
    /// the reply carries `more_edits_needed = false`.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn revision_edit(
        &self,
        task_id: &str,
        user_prompt: &str,
        paper: &str,
        critiques: &[AcceptedCritique],
        edits_applied: usize,
    ) -> Result<RevisionEditReply, Error> {
        let critique_text = critiques
            .iter()
            .map(|c| c.summary.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let progress = format!("{edits_applied} edits applied so far");

        let prompt = prompts::build_sectioned_prompt(
            prompts::REVISION_EDIT_SYSTEM_PROMPT,
            prompts::REVISION_EDIT_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("CURRENT PAPER", paper),
                ("CRITIQUES TO ADDRESS", &critique_text),
                ("PROGRESS", &progress),
            ],
            "Propose exactly one edit as JSON:",
        );
        let (value, _) =
            complete_and_parse_json(&self.gateway, self.call(task_id, &prompt), self.available_input())
                .await?;
        Ok(RevisionEditReply::from_value(&value)?)
    }
}

impl std::fmt::Debug for CritiqueAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CritiqueAgent").finish_non_exhaustive()
    }
}
