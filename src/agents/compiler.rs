//! High-context compiler submitter: outline creation and phased paper
//! construction.
//!
//! Construction proceeds body → conclusion → introduction → abstract with
//! a phase-specific prompt and one operation per turn. Targeted operations
//! anchor on verbatim `old_string` text; [`apply_edit`] enforces the
//! exactly-once match before any mutation.

use std::sync::Arc;

use tracing::{debug, info};

use super::retry::complete_and_parse_json;
use crate::config::PipelineConfig;
use crate::contract::schema::{ConstructionReply, EditOperation, OutlineCreateReply};
use crate::error::{CompileError, Error};
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;
use crate::store::workflow::PaperPhase;
use crate::tokens::truncate_with_ellipsis;

/// Applies an edit operation to a document.
///
/// Targeted operations (`replace`, `insert_after`, `delete`) require
/// `old_string` to occur exactly once, verbatim.
///
/// # Errors
///
/// Returns [`CompileError::PlacementMatch`] when the anchor text matches
/// zero or more than one time.
pub fn apply_edit(
    document: &str,
    operation: EditOperation,
    old_string: &str,
    new_string: &str,
    content: &str,
) -> Result<String, CompileError> {
    if operation == EditOperation::FullContent {
        return Ok(content.to_string());
    }

    let count_found = if old_string.is_empty() {
        0
    } else {
        document.matches(old_string).count()
    };
    if count_found != 1 {
        return Err(CompileError::PlacementMatch {
            old_string: truncate_with_ellipsis(old_string, 120),
            count_found,
        });
    }

    Ok(match operation {
        EditOperation::FullContent => content.to_string(),
        EditOperation::Replace => document.replacen(old_string, new_string, 1),
        EditOperation::InsertAfter => {
            document.replacen(old_string, &format!("{old_string}{new_string}"), 1)
        }
        EditOperation::Delete => document.replacen(old_string, "", 1),
    })
}

/// Phase-specific construction system prompt.
#[must_use]
pub const fn construction_system_prompt(phase: PaperPhase) -> &'static str {
    match phase {
        PaperPhase::Body => prompts::CONSTRUCTION_BODY_SYSTEM_PROMPT,
        PaperPhase::Conclusion => prompts::CONSTRUCTION_CONCLUSION_SYSTEM_PROMPT,
        PaperPhase::Introduction => prompts::CONSTRUCTION_INTRODUCTION_SYSTEM_PROMPT,
        PaperPhase::Abstract => prompts::CONSTRUCTION_ABSTRACT_SYSTEM_PROMPT,
    }
}

/// Inputs for one construction turn, gathered by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ConstructionInputs {
    /// The user's research prompt.
    pub user_prompt: String,
    /// Locked outline body.
    pub outline: String,
    /// Current paper content (markers included).
    pub paper: String,
    /// Knowledge-base context, already budget-reduced by the allocator.
    pub knowledge_context: String,
    /// Recent compiler decisions for pattern learning.
    pub decision_context: String,
    /// For body rewrites, the pre-critique paper state.
    pub pre_critique_paper: String,
}

/// The high-context compiler submitter.
pub struct HighContextSubmitter {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl HighContextSubmitter {
    /// Creates the submitter.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    fn call(&self, task_id: &str, prompt: &str) -> CompletionCall {
        CompletionCall {
            task_id: task_id.to_string(),
            role_id: "high_context".to_string(),
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

    /// One outline-create iteration: proposes an outline given the
    /// feedback history and the last accepted outline.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn submit_outline_create(
        &self,
        task_id: &str,
        user_prompt: &str,
        knowledge_context: &str,
        feedback: &str,
        last_accepted_outline: Option<&str>,
    ) -> Result<OutlineCreateReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::OUTLINE_CREATE_SYSTEM_PROMPT,
            prompts::OUTLINE_CREATE_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("KNOWLEDGE BASE", knowledge_context),
                ("FEEDBACK HISTORY", feedback),
                (
                    "YOUR LAST ACCEPTED OUTLINE",
                    last_accepted_outline.unwrap_or(""),
                ),
            ],
            "Propose the outline as JSON:",
        );

        let (value, _) =
            complete_and_parse_json(&self.gateway, self.call(task_id, &prompt), self.available_input())
                .await?;
        let reply = OutlineCreateReply::from_value(&value)?;
        debug!(
            outline_complete = reply.outline_complete,
            "outline-create iteration"
        );
        Ok(reply)
    }

    /// One construction turn for the given phase.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn submit_construction(
        &self,
        task_id: &str,
        phase: PaperPhase,
        inputs: &ConstructionInputs,
    ) -> Result<ConstructionReply, Error> {
        let system_prompt = construction_system_prompt(phase);
        let prompt = prompts::build_sectioned_prompt(
            system_prompt,
            prompts::CONSTRUCTION_SCHEMA,
            &[
                ("USER PROMPT", &inputs.user_prompt),
                ("OUTLINE", &inputs.outline),
                ("CURRENT PAPER", &inputs.paper),
                ("KNOWLEDGE BASE", &inputs.knowledge_context),
                ("RECENT DECISIONS", &inputs.decision_context),
                ("PRE-CRITIQUE PAPER", &inputs.pre_critique_paper),
            ],
            "Produce this turn's construction as JSON:",
        );

        let (value, _) =
            complete_and_parse_json(&self.gateway, self.call(task_id, &prompt), self.available_input())
                .await?;
        let reply = ConstructionReply::from_value(&value)?;
        info!(
            ?phase,
            needs_construction = reply.needs_construction,
            section_complete = reply.section_complete,
            operation = ?reply.operation,
            "construction turn"
        );
        Ok(reply)
    }
}

impl std::fmt::Debug for HighContextSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighContextSubmitter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{scripted_setup, ScriptedBackend};

    #[test]
    fn test_apply_full_content() {
        let result = apply_edit("old doc", EditOperation::FullContent, "", "", "new doc");
        assert_eq!(result.unwrap(), "new doc");
    }

    #[test]
    fn test_apply_replace_unique() {
        let doc = "alpha beta gamma";
        let result = apply_edit(doc, EditOperation::Replace, "beta", "BETA", "");
        assert_eq!(result.unwrap(), "alpha BETA gamma");
    }

    #[test]
    fn test_apply_insert_after() {
        let doc = "first line.\nsecond line.";
        let result = apply_edit(doc, EditOperation::InsertAfter, "first line.", "\ninserted.", "");
        assert_eq!(result.unwrap(), "first line.\ninserted.\nsecond line.");
    }

    #[test]
    fn test_apply_delete() {
        let doc = "keep remove keep2";
        let result = apply_edit(doc, EditOperation::Delete, " remove", "", "");
        assert_eq!(result.unwrap(), "keep keep2");
    }

    #[test]
    fn test_placement_fails_on_zero_matches() {
        let result = apply_edit("document", EditOperation::Replace, "absent", "x", "");
        match result {
            Err(CompileError::PlacementMatch { count_found, .. }) => assert_eq!(count_found, 0),
            other => panic!("expected PlacementMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_placement_fails_on_multiple_matches() {
        let result = apply_edit("dup text dup", EditOperation::Replace, "dup", "x", "");
        match result {
            Err(CompileError::PlacementMatch { count_found, .. }) => assert_eq!(count_found, 2),
            other => panic!("expected PlacementMatch, got {other:?}"),
        }
    }

    #[test]
    fn test_placement_fails_on_empty_anchor() {
        let result = apply_edit("doc", EditOperation::Delete, "", "", "");
        assert!(matches!(
            result,
            Err(CompileError::PlacementMatch { count_found: 0, .. })
        ));
    }

    #[test]
    fn test_construction_prompts_per_phase() {
        assert!(construction_system_prompt(PaperPhase::Body).contains("BODY"));
        assert!(construction_system_prompt(PaperPhase::Conclusion).contains("CONCLUSION"));
        assert!(construction_system_prompt(PaperPhase::Introduction).contains("INTRODUCTION"));
        assert!(construction_system_prompt(PaperPhase::Abstract).contains("ABSTRACT"));
    }

    #[tokio::test]
    async fn test_submit_outline_create() {
        let backend = ScriptedBackend::reply_forever(
            "{\"content\": \"I. Intro\\nII. Body\", \"reasoning\": \"structure\", \"outline_complete\": false}",
        );
        let (gateway, _, config) = scripted_setup(backend);
        let submitter = HighContextSubmitter::new(gateway, config);
        let reply = submitter
            .submit_outline_create("t", "goal", "kb", "", None)
            .await
            .unwrap();
        assert!(reply.content.contains("I. Intro"));
        assert!(!reply.outline_complete);
    }

    #[tokio::test]
    async fn test_submit_construction_turn() {
        let backend = ScriptedBackend::reply_forever(
            "{\"needs_construction\": true, \"operation\": \"full_content\", \"content\": \"The body.\", \"section_complete\": false, \"reasoning\": \"first portion\"}",
        );
        let (gateway, _, config) = scripted_setup(backend);
        let submitter = HighContextSubmitter::new(gateway, config);
        let reply = submitter
            .submit_construction(
                "t",
                PaperPhase::Body,
                &ConstructionInputs {
                    user_prompt: "goal".to_string(),
                    outline: "I. Intro".to_string(),
                    ..ConstructionInputs::default()
                },
            )
            .await
            .unwrap();
        assert!(reply.needs_construction);
        assert_eq!(reply.operation, EditOperation::FullContent);
        assert_eq!(reply.content, "The body.");
    }
}
