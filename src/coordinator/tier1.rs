//! Tier 1 — aggregation: concurrent submitters feed a sequential
//! validator over a bounded channel; accepted submissions grow the topic's
//! brainstorm database.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::Coordinator;
use crate::agents::completion::CompletionReviewer;
use crate::agents::submitter::SubmitterInputs;
use crate::agents::validator::CleanupOutcome;
use crate::error::Error;
use crate::tokens::truncate_with_ellipsis;

/// How tier 1 ended for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier1Outcome {
    /// The completion review (or the forced-complete path) moved the topic
    /// to paper writing.
    WritePaper,
}

impl Coordinator {
    /// Runs aggregation rounds for a topic until a completion review moves
    /// it to paper writing. Bounded: retry exhaustion forces completion
    /// rather than hanging.
    pub(crate) async fn run_tier1(&self, topic_id: &str) -> Result<Tier1Outcome, Error> {
        let shared = self.open_brainstorm(topic_id).await?;
        let topic_prompt = match self
            .session
            .brainstorms()
            .await
            .iter()
            .find(|b| b.topic_id == topic_id)
        {
            Some(b) => b.description.clone(),
            None => self.session.user_prompt().await,
        };

        info!(topic_id, "tier 1 aggregation starting");

        loop {
            self.run_submission_round(topic_id, &topic_prompt, &shared)
                .await?;

            let state = self.workflow.snapshot().await;

            // Cleanup review every N completed acceptances.
            if state.acceptance_count.saturating_sub(state.last_redundancy_check_at)
                >= self.config.cleanup_review_interval
            {
                let task_id = self.next_task_id("cleanup");
                match self
                    .validator
                    .perform_cleanup_review(&task_id, &shared, &topic_prompt, &self.user_files)
                    .await
                {
                    Ok(CleanupOutcome::Removed { submission_number }) => {
                        info!(submission_number, "cleanup archived a redundant entry");
                        self.session.increment_stat("cleanup_removals", 1).await?;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cleanup review errored"),
                }
                self.workflow
                    .update(|s| s.last_redundancy_check_at = s.acceptance_count)
                    .await?;
            }

            // Completion review: periodic, or early on stall signals.
            let state = self.workflow.snapshot().await;
            let periodic = state
                .acceptance_count
                .saturating_sub(state.last_completion_check_at)
                >= self.config.completion_review_interval;
            let early = CompletionReviewer::early_trigger(
                state.consecutive_rejections,
                state.exhaustion_signals,
            );
            if !(periodic || early) {
                continue;
            }

            let task_id = self.next_task_id("completion");
            let database_content = shared.all_content().await;
            let prior_feedback = self
                .rejections
                .completion_feedback_for_context(topic_id)
                .await;
            let decision = self
                .completion_reviewer
                .review(
                    &task_id,
                    &self.session.user_prompt().await,
                    &topic_prompt,
                    &database_content,
                    &prior_feedback,
                )
                .await?;

            self.rejections
                .add_completion_feedback(topic_id, !decision.write_paper, &decision.reasoning)
                .await?;
            if decision.is_miniscule {
                // Record-only: the flag never short-circuits the decision.
                self.session.increment_stat("miniscule_flags", 1).await?;
            }
            self.workflow
                .update(|s| {
                    s.last_completion_check_at = s.acceptance_count;
                    s.exhaustion_signals = 0;
                })
                .await?;

            if decision.write_paper {
                info!(topic_id, "completion review: moving to paper writing");
                return Ok(Tier1Outcome::WritePaper);
            }

            // Forced-complete path: the review wants to continue but the
            // acceptance loop has exhausted its retries.
            if early && state.consecutive_rejections >= u64::from(self.config.max_retries) {
                warn!(
                    topic_id,
                    consecutive = state.consecutive_rejections,
                    "retries exhausted; forcing completion"
                );
                return Ok(Tier1Outcome::WritePaper);
            }
        }
    }

    /// One round: all submitters generate concurrently, the validator
    /// consumes sequentially from a bounded channel.
    async fn run_submission_round(
        &self,
        topic_id: &str,
        topic_prompt: &str,
        shared: &Arc<crate::store::shared_training::SharedTrainingLog>,
    ) -> Result<(), Error> {
        let shared_content = shared.all_content().await;
        let (tx, mut rx) = mpsc::channel(self.submitters.len().max(1));

        for submitter in &self.submitters {
            let id = submitter.id();
            let inputs = SubmitterInputs {
                topic_prompt: topic_prompt.to_string(),
                shared_training: shared_content.clone(),
                local_training: match self.local_training.get(id) {
                    Some(local) => local.format_for_context().await,
                    None => String::new(),
                },
                rejection_log: self
                    .rejections
                    .submitter_rejections_for_context(topic_id, id)
                    .await,
                user_files: self.user_files.clone(),
            };
            let task_id = self.next_task_id(&format!("submit_{id}"));
            let submitter = Arc::clone(submitter);
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = submitter.submit(&task_id, &inputs).await;
                let _ = tx.send((id, result)).await;
            });
        }
        drop(tx);

        while let Some((submitter_id, result)) = rx.recv().await {
            match result {
                Err(e) => {
                    // Agent-level try boundary: unclassified errors become
                    // recorded rejections so the loop proceeds.
                    warn!(submitter_id, error = %e, "submission attempt failed");
                    self.workflow
                        .update(|s| {
                            s.rejection_count += 1;
                            s.consecutive_rejections += 1;
                        })
                        .await?;
                }
                Ok(submission) if submission.is_decline => {
                    info!(submitter_id, "submitter declined; exhaustion signal");
                    self.workflow
                        .update(|s| s.exhaustion_signals += 1)
                        .await?;
                }
                Ok(submission) => {
                    let task_id = self.next_task_id("validate");
                    let result = self
                        .validator
                        .validate(
                            &task_id,
                            &submission,
                            topic_prompt,
                            &shared_content,
                            &self.user_files,
                        )
                        .await;

                    if result.accepted() {
                        let number = shared.append(&submission.content).await?;
                        info!(submitter_id, number, "submission accepted");
                        self.session.increment_stat("total_acceptances", 1).await?;
                        self.workflow
                            .update(|s| {
                                s.acceptance_count += 1;
                                s.consecutive_rejections = 0;
                            })
                            .await?;
                    } else {
                        info!(submitter_id, summary = %result.summary, "submission rejected");
                        if let Some(local) = self.local_training.get(submitter_id) {
                            local
                                .add_rejection(&result.summary, &submission.content)
                                .await?;
                        }
                        self.rejections
                            .add_submitter_rejection(
                                topic_id,
                                submitter_id,
                                &result.summary,
                                &truncate_with_ellipsis(&submission.content, 750),
                            )
                            .await?;
                        self.session.increment_stat("total_rejections", 1).await?;
                        self.workflow
                            .update(|s| {
                                s.rejection_count += 1;
                                s.consecutive_rejections += 1;
                            })
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }
}
