//! Compiler validator: coherence, rigor, and placement checks over a
//! proposed construction turn.
//!
//! Placement is two-stage. Pre-validation verifies the edit's `old_string`
//! occurs exactly once verbatim in the paper before any LLM call; only
//! then does the LLM judge contextual appropriateness. All three checks
//! must pass for acceptance.

use std::sync::Arc;

use tracing::{info, warn};

use super::retry::complete_and_parse_json;
use super::format_rejection_summary;
use crate::config::PipelineConfig;
use crate::contract::schema::{ConstructionReply, Decision, EditOperation, ValidationReply};
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;
use crate::tokens::truncate_with_ellipsis;

/// Validation stage labels recorded on verdicts.
pub const STAGE_PRE_VALIDATION: &str = "pre-validation";
/// LLM-check stage label.
pub const STAGE_LLM: &str = "llm";

/// The compiler validator's verdict over one construction turn.
#[derive(Debug, Clone)]
pub struct CompilerVerdict {
    /// Accept or reject.
    pub decision: Decision,
    /// Coherence check outcome.
    pub coherence_passed: bool,
    /// Rigor check outcome.
    pub rigor_passed: bool,
    /// Placement check outcome.
    pub placement_passed: bool,
    /// Which stage decided: `pre-validation` or `llm`.
    pub validation_stage: &'static str,
    /// Combined reasoning.
    pub reasoning: String,
    /// Brief summary for decision logs.
    pub summary: String,
}

impl CompilerVerdict {
    /// Whether the turn was accepted.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.decision.is_accept()
    }
}

/// The compiler validator agent.
pub struct CompilerValidator {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl CompilerValidator {
    /// Creates the validator.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Validates a construction turn against the current paper and outline.
    /// Never returns an error across the scheduler.
    pub async fn validate(
        &self,
        task_id: &str,
        reply: &ConstructionReply,
        paper: &str,
        outline: &str,
    ) -> CompilerVerdict {
        // Stage 1: placement pre-validation for targeted operations.
        if reply.operation != EditOperation::FullContent {
            let count_found = if reply.old_string.is_empty() {
                0
            } else {
                paper.matches(reply.old_string.as_str()).count()
            };
            if count_found != 1 {
                info!(count_found, "placement pre-validation failed");
                return Self::pre_validation_reject(&reply.old_string, count_found);
            }
        }

        // Stage 2: three independent LLM checks; all must pass.
        let edit_description = describe_edit(reply);
        let checks = [
            ("coherence", prompts::COHERENCE_SYSTEM_PROMPT),
            ("rigor", prompts::RIGOR_CHECK_SYSTEM_PROMPT),
            ("placement", prompts::PLACEMENT_SYSTEM_PROMPT),
        ];

        let mut passed = [false; 3];
        let mut reasonings: Vec<String> = Vec::with_capacity(3);
        for (idx, &(name, system_prompt)) in checks.iter().enumerate() {
            match self
                .run_check(task_id, system_prompt, &edit_description, paper, outline)
                .await
            {
                Ok(reply) => {
                    passed[idx] = reply.decision.is_accept();
                    reasonings.push(format!("[{name}] {}", reply.reasoning));
                    if !passed[idx] {
                        info!(check = name, "compiler check rejected the edit");
                    }
                }
                Err(e) => {
                    warn!(check = name, error = %e, "compiler check failed; treating as reject");
                    reasonings.push(format!("[{name}] check error: {e}"));
                }
            }
        }

        let all_passed = passed.iter().all(|&p| p);
        CompilerVerdict {
            decision: if all_passed {
                Decision::Accept
            } else {
                Decision::Reject
            },
            coherence_passed: passed[0],
            rigor_passed: passed[1],
            placement_passed: passed[2],
            validation_stage: STAGE_LLM,
            reasoning: reasonings.join("\n"),
            summary: if all_passed {
                "All three checks passed".to_string()
            } else {
                format!(
                    "Checks failed: {}",
                    checks
                        .iter()
                        .zip(passed)
                        .filter(|(_, p)| !p)
                        .map(|((name, _), _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            },
        }
    }

    fn pre_validation_reject(old_string: &str, count_found: usize) -> CompilerVerdict {
        let preview = truncate_with_ellipsis(old_string, 120);
        CompilerVerdict {
            decision: Decision::Reject,
            coherence_passed: false,
            rigor_passed: false,
            placement_passed: false,
            validation_stage: STAGE_PRE_VALIDATION,
            reasoning: format!(
                "Exact String Match failed: old_string occurred {count_found} time(s); exactly one verbatim occurrence is required."
            ),
            summary: format_rejection_summary(
                "Exact String Match failure",
                &format!("old_string matched {count_found} time(s)"),
                &preview,
                "Targeted edits must anchor on text that appears exactly once in the paper",
                "Include more surrounding context in old_string so it is unique, copied verbatim",
                "Extend old_string with the preceding sentence to disambiguate",
            ),
        }
    }

    async fn run_check(
        &self,
        task_id: &str,
        system_prompt: &str,
        edit_description: &str,
        paper: &str,
        outline: &str,
    ) -> Result<ValidationReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            system_prompt,
            prompts::VALIDATOR_SCHEMA,
            &[
                ("PROPOSED EDIT", edit_description),
                ("CURRENT PAPER", paper),
                ("OUTLINE", outline),
            ],
            "Provide your decision as JSON:",
        );

        let available_input = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );
        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: "compiler_validator".to_string(),
            model: self.config.validator_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.validator_max_output_tokens).unwrap_or(u32::MAX),
            ),
        };

        let (value, _) = complete_and_parse_json(&self.gateway, call, available_input).await?;
        Ok(ValidationReply::from_value(&value)?)
    }
}

impl std::fmt::Debug for CompilerValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerValidator").finish_non_exhaustive()
    }
}

fn describe_edit(reply: &ConstructionReply) -> String {
    match reply.operation {
        EditOperation::FullContent => format!("operation: full_content\ncontent:\n{}", reply.content),
        EditOperation::Replace => format!(
            "operation: replace\nold_string:\n{}\nnew_string:\n{}",
            reply.old_string, reply.new_string
        ),
        EditOperation::InsertAfter => format!(
            "operation: insert_after\nold_string:\n{}\nnew_string:\n{}",
            reply.old_string, reply.new_string
        ),
        EditOperation::Delete => format!("operation: delete\nold_string:\n{}", reply.old_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{scripted_setup, ScriptedBackend};

    fn construction(operation: EditOperation, old_string: &str) -> ConstructionReply {
        ConstructionReply {
            needs_construction: true,
            content: "full".to_string(),
            operation,
            old_string: old_string.to_string(),
            new_string: "new".to_string(),
            section_complete: false,
            reasoning: "r".to_string(),
        }
    }

    const ACCEPT: &str = "{\"decision\": \"accept\", \"reasoning\": \"fine\", \"summary\": \"ok\"}";
    const REJECT: &str = "{\"decision\": \"reject\", \"reasoning\": \"weak\", \"summary\": \"no\"}";

    #[tokio::test]
    async fn test_pre_validation_rejects_duplicate_anchor() {
        let backend = ScriptedBackend::reply_forever(ACCEPT);
        let (gateway, _, config) = scripted_setup(Arc::clone(&backend));
        let validator = CompilerValidator::new(gateway, config);

        let verdict = validator
            .validate(
                "t",
                &construction(EditOperation::Replace, "the result"),
                "the result appears here and the result appears there",
                "outline",
            )
            .await;
        assert!(!verdict.accepted());
        assert!(!verdict.placement_passed);
        assert_eq!(verdict.validation_stage, STAGE_PRE_VALIDATION);
        assert!(verdict.reasoning.contains("Exact String Match"));
        assert!(verdict.summary.contains("Exact String Match"));
        assert!(verdict.summary.contains("more surrounding context"));
        // No LLM call was made.
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_pre_validation_rejects_missing_anchor() {
        let backend = ScriptedBackend::reply_forever(ACCEPT);
        let (gateway, _, config) = scripted_setup(Arc::clone(&backend));
        let validator = CompilerValidator::new(gateway, config);

        let verdict = validator
            .validate(
                "t",
                &construction(EditOperation::Delete, "absent text"),
                "paper without the anchor",
                "outline",
            )
            .await;
        assert!(!verdict.accepted());
        assert_eq!(verdict.validation_stage, STAGE_PRE_VALIDATION);
    }

    #[tokio::test]
    async fn test_all_three_checks_pass() {
        let backend = ScriptedBackend::script([ACCEPT, ACCEPT, ACCEPT]);
        let (gateway, _, config) = scripted_setup(Arc::clone(&backend));
        let validator = CompilerValidator::new(gateway, config);

        let verdict = validator
            .validate(
                "t",
                &construction(EditOperation::Replace, "unique anchor"),
                "paper with a unique anchor inside",
                "outline",
            )
            .await;
        assert!(verdict.accepted());
        assert!(verdict.coherence_passed && verdict.rigor_passed && verdict.placement_passed);
        assert_eq!(verdict.validation_stage, STAGE_LLM);
        assert_eq!(backend.request_count(), 3);
    }

    #[tokio::test]
    async fn test_single_failing_check_rejects() {
        // Coherence accepts, rigor rejects, placement accepts.
        let backend = ScriptedBackend::script([ACCEPT, REJECT, ACCEPT]);
        let (gateway, _, config) = scripted_setup(backend);
        let validator = CompilerValidator::new(gateway, config);

        let verdict = validator
            .validate(
                "t",
                &construction(EditOperation::Replace, "unique anchor"),
                "paper with a unique anchor inside",
                "outline",
            )
            .await;
        assert!(!verdict.accepted());
        assert!(verdict.coherence_passed);
        assert!(!verdict.rigor_passed);
        assert!(verdict.placement_passed);
        assert!(verdict.summary.contains("rigor"));
    }

    #[tokio::test]
    async fn test_full_content_skips_pre_validation() {
        let backend = ScriptedBackend::script([ACCEPT, ACCEPT, ACCEPT]);
        let (gateway, _, config) = scripted_setup(Arc::clone(&backend));
        let validator = CompilerValidator::new(gateway, config);

        let verdict = validator
            .validate(
                "t",
                &construction(EditOperation::FullContent, ""),
                "any paper",
                "outline",
            )
            .await;
        assert!(verdict.accepted());
        assert_eq!(backend.request_count(), 3);
    }
}
