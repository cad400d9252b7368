//! Tier-1 validator: two-phase submission validation plus periodic cleanup
//! review of the accepted database.
//!
//! Phase one is a cheap contradiction heuristic; phase two is an LLM
//! quality assessment. Every failure path degrades into a rejection result
//! so the coordinator loop proceeds.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, info, warn};

use super::retry::complete_and_parse_json;
use super::{format_rejection_summary, Submission, ValidationResult};
use crate::allocator::{CleanupContext, ContextAllocator, ValidatorContext};
use crate::config::PipelineConfig;
use crate::contract::schema::{CleanupReply, Decision, ValidationReply};
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;
use crate::store::shared_training::SharedTrainingLog;
use crate::tokens::truncate_with_ellipsis;

/// Keywords that flag an explicit contradiction.
const CONTRADICTION_KEYWORDS: [&str; 6] = [
    "contradicts",
    "conflicts with",
    "does not support",
    "inconsistent with",
    "opposes",
    "disputes",
];

fn negation_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"\b(evidence|data|research)\s+(does not|doesn't|cannot|can't)\s+support",
            r"\b(this|that)\s+is\s+not\s+(correct|accurate|true|valid)",
            r"\bnot\s+supported\s+by",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Heuristic contradiction scan over submission text.
///
/// Returns `Ok(())` when clean, or the triggering pattern description.
pub fn check_contradictions(text: &str) -> Result<(), String> {
    let lower = text.to_lowercase();
    for keyword in CONTRADICTION_KEYWORDS {
        if lower.contains(keyword) {
            return Err(format!("contains '{keyword}'"));
        }
    }
    for re in negation_res() {
        if re.is_match(&lower) {
            return Err(format!("negation pattern '{}'", re.as_str()));
        }
    }
    Ok(())
}

/// Outcome of a cleanup review.
#[derive(Debug, Clone)]
pub enum CleanupOutcome {
    /// Nothing redundant was found.
    NothingToRemove,
    /// A removal was proposed but the second validator vetoed it.
    RemovalVetoed {
        /// The entry that was spared.
        submission_number: u64,
    },
    /// An entry was removed.
    Removed {
        /// The archived entry number.
        submission_number: u64,
    },
}

/// The tier-1 validator agent.
pub struct ValidatorAgent {
    gateway: Arc<LlmGateway>,
    allocator: Arc<ContextAllocator>,
    config: Arc<PipelineConfig>,
}

impl ValidatorAgent {
    /// Creates a validator.
    #[must_use]
    pub fn new(
        gateway: Arc<LlmGateway>,
        allocator: Arc<ContextAllocator>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            gateway,
            allocator,
            config,
        }
    }

    /// Validates one submission: contradiction heuristics, then LLM quality
    /// assessment. Never returns an error across the scheduler.
    pub async fn validate(
        &self,
        task_id: &str,
        submission: &Submission,
        user_prompt: &str,
        shared_training: &str,
        user_files: &[(String, String)],
    ) -> ValidationResult {
        if let Err(reason) = check_contradictions(&submission.content) {
            info!(submission = %submission.id, reason, "contradiction check failed");
            return ValidationResult {
                submission_id: submission.id.clone(),
                decision: Decision::Reject,
                reasoning: format!("Contradiction check failed: {reason}"),
                summary: format_rejection_summary(
                    "Contradiction detected",
                    &reason,
                    &truncate_with_ellipsis(&submission.content, 200),
                    "Submissions must be internally consistent with the knowledge base",
                    "Remove or reconcile the contradicting claim",
                    "State the supported claim without negating established evidence",
                ),
                json_valid: true,
                contradiction_check_passed: false,
            };
        }

        match self
            .assess_quality(task_id, submission, user_prompt, shared_training, user_files)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // Unclassified failures become synthetic rejections so the
                // acceptance loop keeps moving.
                error!(submission = %submission.id, error = %e, "validation failed");
                ValidationResult::synthetic_reject(
                    &submission.id,
                    format!("Quality assessment error: {e}"),
                    "Internal validation error".to_string(),
                )
            }
        }
    }

    async fn assess_quality(
        &self,
        task_id: &str,
        submission: &Submission,
        user_prompt: &str,
        shared_training: &str,
        user_files: &[(String, String)],
    ) -> Result<ValidationResult, Error> {
        let allocation = self
            .allocator
            .allocate_validator(&ValidatorContext {
                user_prompt: user_prompt.to_string(),
                json_schema: prompts::VALIDATOR_SCHEMA.to_string(),
                system_prompt: prompts::VALIDATOR_SYSTEM_PROMPT.to_string(),
                shared_training: shared_training.to_string(),
                user_files: user_files.to_vec(),
                submission: submission.content.clone(),
                chunk_size: self.config.validator_chunk_size,
            })
            .await?;

        let rag_text = allocation.rag.as_ref().map(|p| p.text.as_str()).unwrap_or("");
        let prompt = prompts::build_validator_prompt(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            prompts::VALIDATOR_SCHEMA,
            user_prompt,
            &submission.content,
            &allocation.direct,
            rag_text,
        );

        let available_input = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );

        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: "validator".to_string(),
            model: self.config.validator_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.validator_max_output_tokens).unwrap_or(u32::MAX),
            ),
        };

        match complete_and_parse_json(&self.gateway, call, available_input).await {
            Ok((value, _)) => {
                let reply = ValidationReply::from_value(&value)?;
                Ok(ValidationResult {
                    submission_id: submission.id.clone(),
                    decision: reply.decision,
                    reasoning: reply.reasoning,
                    summary: reply.summary,
                    json_valid: true,
                    contradiction_check_passed: true,
                })
            }
            Err(Error::Contract(e)) => Ok(ValidationResult::synthetic_reject(
                &submission.id,
                format!("Validator JSON invalid after retry: {e}"),
                "Validator produced unparseable output".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Periodic cleanup review: identify at most one redundant accepted
    /// entry, then have a second LLM pass validate the specific removal
    /// before archiving it.
    ///
    /// # Errors
    ///
    /// Returns store errors from the removal itself; LLM failures degrade
    /// to [`CleanupOutcome::NothingToRemove`].
    pub async fn perform_cleanup_review(
        &self,
        task_id: &str,
        shared: &SharedTrainingLog,
        user_prompt: &str,
        user_files: &[(String, String)],
    ) -> Result<CleanupOutcome, Error> {
        let count = shared.count().await;
        if count < 2 {
            return Ok(CleanupOutcome::NothingToRemove);
        }
        info!(submissions = count, "cleanup review starting");

        let formatted = shared.formatted().await;
        let reply = match self
            .cleanup_call(
                task_id,
                user_prompt,
                &formatted,
                user_files,
                None,
                prompts::CLEANUP_SYSTEM_PROMPT,
            )
            .await
        {
            Ok(value) => CleanupReply::from_value(&value)?,
            Err(e) => {
                warn!(error = %e, "cleanup review failed; skipping this round");
                return Ok(CleanupOutcome::NothingToRemove);
            }
        };

        if !reply.removal_needed {
            return Ok(CleanupOutcome::NothingToRemove);
        }
        let Some(number) = reply.submission_number else {
            warn!("cleanup proposed removal without a submission number");
            return Ok(CleanupOutcome::NothingToRemove);
        };
        let Some(candidate) = shared.entry_content(number).await else {
            warn!(number, "cleanup proposed removing a nonexistent entry");
            return Ok(CleanupOutcome::NothingToRemove);
        };

        // Second opinion on the specific removal.
        let verdict = match self
            .cleanup_call(
                task_id,
                user_prompt,
                &formatted,
                user_files,
                Some(&candidate),
                prompts::REMOVAL_VALIDATION_SYSTEM_PROMPT,
            )
            .await
        {
            Ok(value) => ValidationReply::from_value(&value)?,
            Err(e) => {
                warn!(error = %e, "removal validation failed; keeping entry");
                return Ok(CleanupOutcome::RemovalVetoed {
                    submission_number: number,
                });
            }
        };

        if verdict.decision.is_accept() {
            shared.remove(number).await?;
            info!(number, "cleanup removed redundant entry");
            Ok(CleanupOutcome::Removed {
                submission_number: number,
            })
        } else {
            info!(number, "removal vetoed by second validator");
            Ok(CleanupOutcome::RemovalVetoed {
                submission_number: number,
            })
        }
    }

    async fn cleanup_call(
        &self,
        task_id: &str,
        user_prompt: &str,
        all_submissions: &str,
        user_files: &[(String, String)],
        removal_candidate: Option<&str>,
        system_prompt: &str,
    ) -> Result<serde_json::Value, Error> {
        let schema = if removal_candidate.is_some() {
            prompts::VALIDATOR_SCHEMA
        } else {
            prompts::CLEANUP_SCHEMA
        };

        let allocation = self
            .allocator
            .allocate_cleanup(&CleanupContext {
                user_prompt: user_prompt.to_string(),
                json_schema: schema.to_string(),
                system_prompt: system_prompt.to_string(),
                all_submissions: all_submissions.to_string(),
                user_files: user_files.to_vec(),
                removal_candidate: removal_candidate.map(ToString::to_string),
            })
            .await?;

        let rag_text = allocation.rag.as_ref().map(|p| p.text.as_str()).unwrap_or("");
        let prompt = prompts::build_cleanup_prompt(
            system_prompt,
            schema,
            user_prompt,
            &allocation.direct,
            rag_text,
            removal_candidate,
        );

        let available_input = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );

        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: "validator".to_string(),
            model: self.config.validator_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.validator_max_output_tokens).unwrap_or(u32::MAX),
            ),
        };

        let (value, _) = complete_and_parse_json(&self.gateway, call, available_input).await?;
        Ok(value)
    }
}

impl std::fmt::Debug for ValidatorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorAgent").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{scripted_setup, ScriptedBackend};
    use std::sync::Arc;
    use tempfile::TempDir;
    use test_case::test_case;

    fn submission(content: &str) -> Submission {
        Submission::new(0, content.to_string(), "r".to_string(), 512, false)
    }

    #[test_case("This insight conflicts with the earlier finding" => false; "keyword")]
    #[test_case("The evidence does not support the hypothesis" => false; "negation")]
    #[test_case("Black holes radiate thermally via pair production" => true; "clean")]
    fn test_contradiction_checker(text: &str) -> bool {
        check_contradictions(text).is_ok()
    }

    #[tokio::test]
    async fn test_contradiction_rejects_without_llm() {
        let backend = ScriptedBackend::reply_forever("{}");
        let (gateway, allocator, config) = scripted_setup(Arc::clone(&backend));
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let result = validator
            .validate(
                "t",
                &submission("this disputes everything we know"),
                "goal",
                "",
                &[],
            )
            .await;
        assert!(!result.accepted());
        assert!(!result.contradiction_check_passed);
        assert!(result.summary.contains("REJECTION REASON"));
        // No LLM call was made.
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_accept_path() {
        let backend = ScriptedBackend::reply_forever(
            "{\"decision\": \"accept\", \"reasoning\": \"novel\", \"summary\": \"good\"}",
        );
        let (gateway, allocator, config) = scripted_setup(backend);
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let result = validator
            .validate("t", &submission("a clean novel insight"), "goal", "", &[])
            .await;
        assert!(result.accepted());
        assert!(result.json_valid);
        assert!(result.contradiction_check_passed);
    }

    #[tokio::test]
    async fn test_unparseable_validator_output_becomes_reject() {
        let backend = ScriptedBackend::reply_forever("no json at all");
        let (gateway, allocator, config) = scripted_setup(backend);
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let result = validator
            .validate("t", &submission("fine content"), "goal", "", &[])
            .await;
        assert!(!result.accepted());
        assert!(!result.json_valid);
    }

    #[tokio::test]
    async fn test_cleanup_nothing_to_remove() {
        let backend = ScriptedBackend::reply_forever(
            "{\"removal_needed\": false, \"submission_number\": null, \"reasoning\": \"all unique\"}",
        );
        let (gateway, allocator, config) = scripted_setup(backend);
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let dir = TempDir::new().unwrap();
        let shared = SharedTrainingLog::open(dir.path().join("s.txt"), 100).await.unwrap();
        shared.append("one").await.unwrap();
        shared.append("two").await.unwrap();

        let outcome = validator
            .perform_cleanup_review("t", &shared, "goal", &[])
            .await
            .unwrap();
        assert!(matches!(outcome, CleanupOutcome::NothingToRemove));
        assert_eq!(shared.count().await, 2);
    }

    #[tokio::test]
    async fn test_cleanup_removal_approved() {
        let backend = ScriptedBackend::script([
            "{\"removal_needed\": true, \"submission_number\": 2, \"reasoning\": \"duplicate of 1\"}",
            "{\"decision\": \"accept\", \"reasoning\": \"fully covered\", \"summary\": \"remove\"}",
        ]);
        let (gateway, allocator, config) = scripted_setup(backend);
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let dir = TempDir::new().unwrap();
        let shared = SharedTrainingLog::open(dir.path().join("s.txt"), 100).await.unwrap();
        shared.append("original insight").await.unwrap();
        shared.append("the same insight restated").await.unwrap();

        let outcome = validator
            .perform_cleanup_review("t", &shared, "goal", &[])
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CleanupOutcome::Removed {
                submission_number: 2
            }
        ));
        assert_eq!(shared.count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removal_vetoed() {
        let backend = ScriptedBackend::script([
            "{\"removal_needed\": true, \"submission_number\": 1, \"reasoning\": \"maybe dup\"}",
            "{\"decision\": \"reject\", \"reasoning\": \"unique detail\", \"summary\": \"keep\"}",
        ]);
        let (gateway, allocator, config) = scripted_setup(backend);
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let dir = TempDir::new().unwrap();
        let shared = SharedTrainingLog::open(dir.path().join("s.txt"), 100).await.unwrap();
        shared.append("one").await.unwrap();
        shared.append("two").await.unwrap();

        let outcome = validator
            .perform_cleanup_review("t", &shared, "goal", &[])
            .await
            .unwrap();
        assert!(matches!(outcome, CleanupOutcome::RemovalVetoed { .. }));
        assert_eq!(shared.count().await, 2);
    }

    #[tokio::test]
    async fn test_cleanup_skips_tiny_database() {
        let backend = ScriptedBackend::reply_forever("{}");
        let (gateway, allocator, config) = scripted_setup(Arc::clone(&backend));
        let validator = ValidatorAgent::new(gateway, allocator, config);

        let dir = TempDir::new().unwrap();
        let shared = SharedTrainingLog::open(dir.path().join("s.txt"), 100).await.unwrap();
        shared.append("only one").await.unwrap();

        let outcome = validator
            .perform_cleanup_review("t", &shared, "goal", &[])
            .await
            .unwrap();
        assert!(matches!(outcome, CleanupOutcome::NothingToRemove));
        assert_eq!(backend.request_count(), 0);
    }
}
