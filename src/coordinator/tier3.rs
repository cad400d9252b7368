//! Tier 3 — final answer synthesis over completed papers.
//!
//! Operates only on the completed-paper registry, never on brainstorm
//! databases. Phases: certainty assessment (with optional paper
//! expansion) → format selection → volume organization for long form.

use std::sync::Arc;

use tracing::{info, warn};

use super::Coordinator;
use crate::agents::final_answer::PaperSummary;
use crate::contract::schema::AnswerFormat;
use crate::error::Error;

impl Coordinator {
    /// Runs the three tier-3 phases and writes `final_answer.txt` into the
    /// session directory.
    pub(crate) async fn run_tier3(&self) -> Result<(), Error> {
        let user_prompt = self.session.user_prompt().await;
        let records = self.session.completed_papers().await;
        if records.is_empty() {
            warn!("tier 3 invoked with no completed papers");
            return Ok(());
        }

        info!(papers = records.len(), "tier 3 final answer starting");

        let mut summaries = Vec::with_capacity(records.len());
        for record in &records {
            let content = self.session.paper_content(&record.paper_id).await?;
            summaries.push(PaperSummary::from_content(record, &content));
        }

        // Phase 1: certainty assessment over abstracts, expanding specific
        // papers to full content when the assessor asks.
        self.workflow
            .update(|s| s.tier3_phase = Some("phase1_assessment".to_string()))
            .await?;
        let session = Arc::clone(&self.session);
        let outcome = self
            .certainty_assessor
            .assess(
                &self.next_task_id("certainty"),
                &user_prompt,
                &summaries,
                move |paper_id| {
                    let session = Arc::clone(&session);
                    async move { session.paper_content(&paper_id).await.ok() }
                },
            )
            .await?;

        // Phase 2: format selection.
        self.workflow
            .update(|s| s.tier3_phase = Some("phase2_format".to_string()))
            .await?;
        let format = self
            .format_selector
            .select(
                &self.next_task_id("format"),
                &user_prompt,
                &outcome.reply.known_certainties,
                summaries.len(),
            )
            .await?;
        self.workflow
            .update(|s| {
                s.tier3_format = Some(
                    match format.format {
                        AnswerFormat::ShortForm => "short_form",
                        AnswerFormat::LongForm => "long_form",
                    }
                    .to_string(),
                );
            })
            .await?;

        // Phase 3: volume organization (long form only).
        let mut answer = String::new();
        answer.push_str(&format!(
            "ANSWER LEVEL: {:?}\n\nKNOWN CERTAINTIES:\n{}\n\n",
            outcome.reply.answer_level, outcome.reply.known_certainties
        ));

        match format.format {
            AnswerFormat::ShortForm => {
                // A single paper carries the answer; point at the newest.
                if let Some(record) = records.last() {
                    answer.push_str(&format!(
                        "FORMAT: short_form\nANSWER PAPER: {} ({})\n",
                        record.paper_id, record.title
                    ));
                }
            }
            AnswerFormat::LongForm => {
                self.workflow
                    .update(|s| s.tier3_phase = Some("phase3_volume".to_string()))
                    .await?;
                let plan = self
                    .volume_organizer
                    .organize(&self.next_task_id("volume"), &user_prompt, &summaries)
                    .await?;
                answer.push_str("FORMAT: long_form\nCHAPTER PLAN:\n");
                for (idx, chapter) in plan.chapters.iter().enumerate() {
                    answer.push_str(&format!(
                        "{}. [{}] {}{}\n",
                        idx + 1,
                        chapter.kind,
                        chapter.title,
                        chapter
                            .paper_id
                            .as_ref()
                            .map(|id| format!(" ({id})"))
                            .unwrap_or_default()
                    ));
                }
            }
        }

        let answer_path = self.session.dir().join("final_answer.txt");
        tokio::fs::write(&answer_path, &answer)
            .await
            .map_err(|e| crate::error::StoreError::WriteFailed {
                path: answer_path.display().to_string(),
                reason: e.to_string(),
            })?;
        self.session.increment_stat("final_answers", 1).await?;
        info!(path = %answer_path.display(), "final answer written");
        Ok(())
    }
}
