//! Completion reviewer: decides whether a topic keeps aggregating or moves
//! to paper writing, in self-validation mode.
//!
//! The same model first produces the assessment, then re-examines it,
//! upholding it unless a concrete specific error is named. When the
//! self-validation pass itself fails, the reviewer defaults to continuing
//! aggregation.

use std::sync::Arc;

use tracing::{info, warn};

use super::retry::complete_and_parse_json;
use crate::config::PipelineConfig;
use crate::contract::schema::{CompletionReply, SelfValidationReply};
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;

/// Consecutive rejections that force an early completion review.
pub const EARLY_TRIGGER_REJECTIONS: u64 = 10;
/// Exhaustion signals (submitter declines) that force an early review.
pub const EARLY_TRIGGER_EXHAUSTION: u64 = 2;

/// Reasoning substrings that mark the remaining work as miniscule.
/// Derived by string search and recorded only; never short-circuits.
const MINISCULE_MARKERS: [&str; 3] = ["miniscule", "minuscule", "only trivial"];

/// The reviewer's final decision.
#[derive(Debug, Clone)]
pub struct CompletionDecision {
    /// Whether to move the topic to paper writing.
    pub write_paper: bool,
    /// Assessment reasoning.
    pub reasoning: String,
    /// Whether self-validation upheld the assessment.
    pub self_validated: bool,
    /// Whether the reasoning flagged remaining work as miniscule.
    pub is_miniscule: bool,
}

/// The completion reviewer agent.
pub struct CompletionReviewer {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl CompletionReviewer {
    /// Creates a reviewer.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Whether progress counters force a completion review early.
    #[must_use]
    pub const fn early_trigger(consecutive_rejections: u64, exhaustion_signals: u64) -> bool {
        consecutive_rejections >= EARLY_TRIGGER_REJECTIONS
            || exhaustion_signals >= EARLY_TRIGGER_EXHAUSTION
    }

    /// Runs the two-pass review.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors from the first pass; the
    /// self-validation pass degrades to continue on failure.
    pub async fn review(
        &self,
        task_id: &str,
        user_prompt: &str,
        topic_summary: &str,
        database_content: &str,
        prior_feedback: &str,
    ) -> Result<CompletionDecision, Error> {
        let assessment_prompt = prompts::build_sectioned_prompt(
            prompts::COMPLETION_SYSTEM_PROMPT,
            prompts::COMPLETION_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("TOPIC", topic_summary),
                ("ACCEPTED DATABASE", database_content),
                ("PREVIOUS COMPLETION REVIEWS", prior_feedback),
            ],
            "Assess this topic and provide your decision as JSON:",
        );

        let available_input = self.available_input();
        let (value, _) = complete_and_parse_json(
            &self.gateway,
            self.call(task_id, &assessment_prompt),
            available_input,
        )
        .await?;
        let assessment = CompletionReply::from_value(&value)?;
        let is_miniscule = detect_miniscule(&assessment.reasoning);

        info!(
            write_paper = assessment.write_paper,
            is_miniscule, "completion assessment generated"
        );

        // Self-validation: the same model re-examines its own assessment.
        let self_validation_prompt = prompts::build_sectioned_prompt(
            prompts::SELF_VALIDATION_SYSTEM_PROMPT,
            prompts::SELF_VALIDATION_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("TOPIC", topic_summary),
                (
                    "YOUR PRIOR ASSESSMENT",
                    &format!(
                        "decision: {}\nreasoning: {}",
                        if assessment.write_paper {
                            "write_paper"
                        } else {
                            "continue_brainstorm"
                        },
                        assessment.reasoning
                    ),
                ),
            ],
            "Re-examine the assessment and reply as JSON:",
        );

        let self_check = match complete_and_parse_json(
            &self.gateway,
            self.call(task_id, &self_validation_prompt),
            available_input,
        )
        .await
        {
            Ok((value, _)) => SelfValidationReply::from_value(&value).ok(),
            Err(e) => {
                warn!(error = %e, "self-validation call failed");
                None
            }
        };

        match self_check {
            Some(check) if check.assessment_valid || check.error_found.trim().is_empty() => {
                // Upheld: no concrete, specific error was named.
                Ok(CompletionDecision {
                    write_paper: assessment.write_paper,
                    reasoning: assessment.reasoning,
                    self_validated: true,
                    is_miniscule,
                })
            }
            Some(check) => {
                info!(error = %check.error_found, "self-validation found a concrete error; defaulting to continue");
                Ok(CompletionDecision {
                    write_paper: false,
                    reasoning: format!(
                        "{}\n[self-validation overturned: {}]",
                        assessment.reasoning, check.error_found
                    ),
                    self_validated: false,
                    is_miniscule,
                })
            }
            None => {
                warn!("self-validation failed; defaulting to continue");
                Ok(CompletionDecision {
                    write_paper: false,
                    reasoning: assessment.reasoning,
                    self_validated: false,
                    is_miniscule,
                })
            }
        }
    }

    fn call(&self, task_id: &str, prompt: &str) -> CompletionCall {
        CompletionCall {
            task_id: task_id.to_string(),
            role_id: "completion_reviewer".to_string(),
            model: self.config.validator_model.clone(),
            messages: vec![user_message(prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.validator_max_output_tokens).unwrap_or(u32::MAX),
            ),
        }
    }

    fn available_input(&self) -> usize {
        self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        )
    }
}

impl std::fmt::Debug for CompletionReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionReviewer").finish_non_exhaustive()
    }
}

fn detect_miniscule(reasoning: &str) -> bool {
    let lower = reasoning.to_lowercase();
    MINISCULE_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{scripted_setup, ScriptedBackend};

    #[test]
    fn test_early_trigger_thresholds() {
        assert!(CompletionReviewer::early_trigger(10, 0));
        assert!(CompletionReviewer::early_trigger(0, 2));
        assert!(CompletionReviewer::early_trigger(12, 3));
        assert!(!CompletionReviewer::early_trigger(9, 1));
        assert!(!CompletionReviewer::early_trigger(0, 0));
    }

    #[test]
    fn test_detect_miniscule() {
        assert!(detect_miniscule("Remaining additions would be miniscule."));
        assert!(detect_miniscule("Only trivial extensions remain"));
        assert!(!detect_miniscule("Substantial gaps remain in coverage"));
    }

    #[tokio::test]
    async fn test_assessment_upheld() {
        let backend = ScriptedBackend::script([
            "{\"decision\": \"write_paper\", \"reasoning\": \"topic is thoroughly covered\"}",
            "{\"assessment_valid\": true, \"error_found\": \"\"}",
        ]);
        let (gateway, _, config) = scripted_setup(backend);
        let reviewer = CompletionReviewer::new(gateway, config);

        let decision = reviewer
            .review("t", "goal", "topic", "db content", "")
            .await
            .unwrap();
        assert!(decision.write_paper);
        assert!(decision.self_validated);
        assert!(!decision.is_miniscule);
    }

    #[tokio::test]
    async fn test_vague_doubt_still_upholds() {
        // assessment_valid=false but no concrete error named: upheld.
        let backend = ScriptedBackend::script([
            "{\"decision\": \"write_paper\", \"reasoning\": \"covered\"}",
            "{\"assessment_valid\": false, \"error_found\": \"  \"}",
        ]);
        let (gateway, _, config) = scripted_setup(backend);
        let reviewer = CompletionReviewer::new(gateway, config);

        let decision = reviewer.review("t", "g", "t", "db", "").await.unwrap();
        assert!(decision.write_paper);
        assert!(decision.self_validated);
    }

    #[tokio::test]
    async fn test_concrete_error_overturns_to_continue() {
        let backend = ScriptedBackend::script([
            "{\"decision\": \"write_paper\", \"reasoning\": \"covered\"}",
            "{\"assessment_valid\": false, \"error_found\": \"section on boundary conditions has zero accepted entries\"}",
        ]);
        let (gateway, _, config) = scripted_setup(backend);
        let reviewer = CompletionReviewer::new(gateway, config);

        let decision = reviewer.review("t", "g", "t", "db", "").await.unwrap();
        assert!(!decision.write_paper);
        assert!(!decision.self_validated);
        assert!(decision.reasoning.contains("boundary conditions"));
    }

    #[tokio::test]
    async fn test_self_validation_parse_failure_defaults_continue() {
        let backend = ScriptedBackend::script([
            "{\"decision\": \"write_paper\", \"reasoning\": \"covered\"}",
            "garbage",
            "more garbage",
        ]);
        let (gateway, _, config) = scripted_setup(backend);
        let reviewer = CompletionReviewer::new(gateway, config);

        let decision = reviewer.review("t", "g", "t", "db", "").await.unwrap();
        assert!(!decision.write_paper);
        assert!(!decision.self_validated);
    }

    #[tokio::test]
    async fn test_miniscule_recorded_from_reasoning() {
        let backend = ScriptedBackend::script([
            "{\"decision\": \"continue_brainstorm\", \"reasoning\": \"remaining gains are miniscule\"}",
            "{\"assessment_valid\": true, \"error_found\": \"\"}",
        ]);
        let (gateway, _, config) = scripted_setup(backend);
        let reviewer = CompletionReviewer::new(gateway, config);

        let decision = reviewer.review("t", "g", "t", "db", "").await.unwrap();
        assert!(decision.is_miniscule);
        // Record-only: the decision itself is unchanged.
        assert!(!decision.write_paper);
    }
}
