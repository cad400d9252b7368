//! Tier 2 — paper compilation: outline lock, phased construction,
//! critique, revision, and polish as an explicit state machine.
//!
//! States: outline_create → body → critique (→ partial_revision_loop |
//! total rewrite back to body) → conclusion → introduction → abstract →
//! rigor → review → done. Phases are strict-ordered; each transition
//! checkpoints `paper_phase` before the next phase begins.

use tracing::{info, warn};

use super::Coordinator;
use crate::agents::compiler::{apply_edit, ConstructionInputs};
use crate::agents::critique::{AcceptedCritique, MAX_CRITIQUE_ATTEMPTS};
use crate::agents::Submission;
use crate::contract::schema::{
    ConstructionReply, EditOperation, RevisionAction,
};
use crate::error::Error;
use crate::store::decisions::DecisionKind;
use crate::store::paper::{
    ABSTRACT_PLACEHOLDER, CONCLUSION_PLACEHOLDER, INTRO_PLACEHOLDER, PAPER_ANCHOR,
};
use crate::store::workflow::PaperPhase;

/// Consecutive declines after which a phase is considered finished.
const PHASE_DECLINE_LIMIT: u32 = 2;

const fn placeholder_for(phase: PaperPhase) -> Option<&'static str> {
    match phase {
        PaperPhase::Body => None,
        PaperPhase::Conclusion => Some(CONCLUSION_PLACEHOLDER),
        PaperPhase::Introduction => Some(INTRO_PLACEHOLDER),
        PaperPhase::Abstract => Some(ABSTRACT_PLACEHOLDER),
    }
}

impl Coordinator {
    /// Compiles the paper for a topic. Resumes from the checkpointed
    /// `paper_phase` when present.
    pub(crate) async fn run_tier2(&self, topic_id: &str, paper_id: &str) -> Result<(), Error> {
        let shared = self.open_brainstorm(topic_id).await?;
        let knowledge = shared.all_content().await;
        let user_prompt = self.session.user_prompt().await;
        let kb_context = self.knowledge_context(&user_prompt, &knowledge).await?;

        info!(topic_id, paper_id, "tier 2 paper compilation starting");

        let state = self.workflow.snapshot().await;
        let mut phase = match state.paper_phase {
            Some(phase) => phase,
            None => {
                self.run_outline_create(&user_prompt, &kb_context).await?;
                self.workflow
                    .update(|s| s.paper_phase = Some(PaperPhase::Body))
                    .await?;
                PaperPhase::Body
            }
        };

        let mut rewrites_done = 0u32;
        loop {
            self.run_construction_phase(phase, &user_prompt, &kb_context)
                .await?;

            if phase == PaperPhase::Body {
                // Peer-review subphase between body and conclusion.
                let rewrite = self
                    .run_critique_subphase(&user_prompt, rewrites_done)
                    .await?;
                if rewrite {
                    rewrites_done += 1;
                    // Body cleared: rebuild it before moving on.
                    continue;
                }
            }

            match phase.next() {
                Some(next) => {
                    self.workflow
                        .update(|s| s.paper_phase = Some(next))
                        .await?;
                    phase = next;
                }
                None => break,
            }
        }

        self.run_polish_passes(&user_prompt, &kb_context).await?;
        self.finish_paper(topic_id, paper_id).await
    }

    /// Outline-create loop: propose → validate → feed back, until the
    /// submitter locks an accepted outline or the retry cap forces a lock.
    async fn run_outline_create(&self, user_prompt: &str, kb_context: &str) -> Result<(), Error> {
        let mut last_content = String::new();
        for iteration in 1..=self.config.max_retries {
            let feedback = self.outline.creation_feedback().await?;
            let last_accepted = self.outline.last_accepted_outline().await?;

            let task_id = self.next_task_id("outline");
            let reply = self
                .compiler
                .submit_outline_create(
                    &task_id,
                    user_prompt,
                    kb_context,
                    &feedback,
                    last_accepted.as_deref(),
                )
                .await?;
            last_content = reply.content.clone();

            // The outline is reviewed by the tier-1 validator machinery:
            // same acceptance contract, different content.
            let outline_submission = Submission::new(
                usize::MAX,
                reply.content.clone(),
                reply.reasoning.clone(),
                self.config.validator_chunk_size,
                false,
            );
            let verdict = self
                .validator
                .validate(
                    &self.next_task_id("outline_validate"),
                    &outline_submission,
                    user_prompt,
                    kb_context,
                    &self.user_files,
                )
                .await;

            self.outline
                .add_creation_feedback(
                    &verdict.summary,
                    verdict.accepted(),
                    if verdict.accepted() { &reply.content } else { "" },
                )
                .await?;

            if verdict.accepted() && reply.outline_complete {
                info!(iteration, "outline locked");
                self.outline.update_outline(&reply.content).await?;
                self.outline.clear_creation_feedback().await?;
                return Ok(());
            }
        }

        // Retry cap: lock the best outline we have rather than hanging.
        let forced = self
            .outline
            .last_accepted_outline()
            .await?
            .unwrap_or(last_content);
        warn!("outline iterations exhausted; forcing lock");
        self.outline.update_outline(&forced).await?;
        self.outline.clear_creation_feedback().await?;
        Ok(())
    }

    /// One construction phase: turns until the submitter declares the
    /// section complete, declines repeatedly, or retries are exhausted.
    async fn run_construction_phase(
        &self,
        phase: PaperPhase,
        user_prompt: &str,
        kb_context: &str,
    ) -> Result<(), Error> {
        let outline_body = self.outline.outline_body().await?;
        let mut retries = 0u32;
        let mut declines = 0u32;

        info!(?phase, "construction phase starting");
        loop {
            self.paper.ensure_markers_intact().await?;
            let paper_text = self.paper.get_paper().await?;
            let decision_context = self
                .decisions
                .format_for_context(DecisionKind::Rejection)
                .await;

            let task_id = self.next_task_id("construct");
            let reply = match self
                .compiler
                .submit_construction(
                    &task_id,
                    phase,
                    &ConstructionInputs {
                        user_prompt: user_prompt.to_string(),
                        outline: outline_body.clone(),
                        paper: paper_text.clone(),
                        knowledge_context: kb_context.to_string(),
                        decision_context,
                        pre_critique_paper: String::new(),
                    },
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(?phase, error = %e, "construction turn failed");
                    retries += 1;
                    if retries >= self.config.max_retries {
                        warn!(?phase, "construction retries exhausted; advancing phase");
                        return Ok(());
                    }
                    continue;
                }
            };

            if !reply.needs_construction {
                declines += 1;
                self.decisions
                    .record(DecisionKind::Decline, &reply.reasoning)
                    .await?;
                if declines >= PHASE_DECLINE_LIMIT {
                    info!(?phase, "repeated declines; treating section as complete");
                    return Ok(());
                }
                continue;
            }

            let verdict = self
                .compiler_validator
                .validate(&self.next_task_id("compile_validate"), &reply, &paper_text, &outline_body)
                .await;

            if !verdict.accepted() {
                self.decisions
                    .record(DecisionKind::Rejection, &verdict.summary)
                    .await?;
                retries += 1;
                if retries >= self.config.max_retries {
                    warn!(?phase, "validation retries exhausted; advancing phase");
                    return Ok(());
                }
                continue;
            }

            self.apply_accepted_turn(phase, &reply, &paper_text).await?;
            self.decisions
                .record(DecisionKind::Acceptance, &verdict.summary)
                .await?;
            retries = 0;

            if reply.section_complete {
                info!(?phase, "section complete");
                return Ok(());
            }
        }
    }

    /// Applies an accepted construction turn to the paper store.
    async fn apply_accepted_turn(
        &self,
        phase: PaperPhase,
        reply: &ConstructionReply,
        paper_text: &str,
    ) -> Result<(), Error> {
        match (phase, reply.operation) {
            (PaperPhase::Body, EditOperation::FullContent) => {
                if paper_text.trim().is_empty() {
                    // First accepted body portion frames the paper with
                    // placeholders and the anchor.
                    self.paper.initialize_with_placeholders(&reply.content).await?;
                } else {
                    self.paper.update_paper(&reply.content).await?;
                }
            }
            (phase, EditOperation::FullContent) => {
                let Some(placeholder) = placeholder_for(phase) else {
                    return Ok(());
                };
                if !self.paper.replace_placeholder(placeholder, &reply.content).await? {
                    // Placeholder already consumed: fall back to a targeted
                    // whole-document update.
                    warn!(?phase, "placeholder already replaced; updating document");
                    self.paper.update_paper(&reply.content).await?;
                }
            }
            (_, operation) => {
                let updated = apply_edit(
                    paper_text,
                    operation,
                    &reply.old_string,
                    &reply.new_string,
                    &reply.content,
                )?;
                self.paper.update_paper(&updated).await?;
            }
        }
        Ok(())
    }

    /// Critique subphase after the body completes. Returns whether a total
    /// rewrite cleared the body (the caller re-runs the body phase).
    async fn run_critique_subphase(
        &self,
        user_prompt: &str,
        rewrites_done: u32,
    ) -> Result<bool, Error> {
        let paper_text = self.paper.get_paper().await?;
        let mut accepted: Vec<AcceptedCritique> = Vec::new();
        let mut prior = String::new();

        for attempt in 1..=MAX_CRITIQUE_ATTEMPTS {
            let task_id = self.next_task_id("critique");
            match self
                .critique
                .critique(&task_id, user_prompt, &paper_text, &prior)
                .await
            {
                Ok(reply) => {
                    prior.push_str(&format!("[{attempt}] {}\n", reply.summary));
                    if reply.decision.is_accept() {
                        accepted.push(AcceptedCritique {
                            reasoning: reply.reasoning,
                            summary: reply.summary,
                        });
                    }
                }
                Err(e) => warn!(attempt, error = %e, "critique attempt failed"),
            }
        }

        if accepted.is_empty() {
            info!("no critiques accepted; body stands");
            return Ok(false);
        }
        info!(count = accepted.len(), "critiques accepted");

        let decision = self
            .critique
            .revision_decision(&self.next_task_id("revision"), user_prompt, &paper_text, &accepted)
            .await?;

        match decision.action {
            RevisionAction::Continue => Ok(false),
            RevisionAction::PartialRevision => {
                self.run_partial_revision_loop(user_prompt, &accepted).await?;
                Ok(false)
            }
            RevisionAction::TotalRewrite => {
                if rewrites_done >= 1 {
                    warn!("rewrite already performed once; keeping body");
                    return Ok(false);
                }
                let critique_feedback = accepted
                    .iter()
                    .map(|c| c.summary.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let title = paper_title(&paper_text);
                self.paper
                    .store_previous_version(&title, &paper_text, &critique_feedback)
                    .await?;
                self.paper.clear_body_section().await?;
                info!("total rewrite: body archived and cleared");
                Ok(true)
            }
        }
    }

    /// Iterative edit loop: ONE edit per turn, each validated and applied,
    /// the updated paper shown next turn, until the agent stops asking.
    async fn run_partial_revision_loop(
        &self,
        user_prompt: &str,
        critiques: &[AcceptedCritique],
    ) -> Result<(), Error> {
        let mut edits_applied = 0usize;

        for _ in 0..self.config.max_retries {
            let paper_text = self.paper.get_paper().await?;
            let task_id = self.next_task_id("revise");
            let edit = match self
                .critique
                .revision_edit(&task_id, user_prompt, &paper_text, critiques, edits_applied)
                .await
            {
                Ok(edit) => edit,
                Err(e) => {
                    warn!(error = %e, "revision edit failed; ending loop");
                    return Ok(());
                }
            };

            let as_construction = ConstructionReply {
                needs_construction: true,
                content: String::new(),
                operation: edit.operation,
                old_string: edit.old_string.clone(),
                new_string: edit.new_string.clone(),
                section_complete: false,
                reasoning: edit.reasoning.clone(),
            };
            let outline_body = self.outline.outline_body().await?;
            let verdict = self
                .compiler_validator
                .validate(
                    &self.next_task_id("revise_validate"),
                    &as_construction,
                    &paper_text,
                    &outline_body,
                )
                .await;

            if verdict.accepted() {
                let updated = apply_edit(
                    &paper_text,
                    edit.operation,
                    &edit.old_string,
                    &edit.new_string,
                    "",
                )?;
                self.paper.update_paper(&updated).await?;
                edits_applied += 1;
                self.decisions
                    .record(DecisionKind::Acceptance, &edit.reasoning)
                    .await?;
            } else {
                self.decisions
                    .record(DecisionKind::Rejection, &verdict.summary)
                    .await?;
            }

            if !edit.more_edits_needed {
                info!(edits_applied, "partial revision complete");
                return Ok(());
            }
        }
        warn!("partial revision loop hit retry cap");
        Ok(())
    }

    /// Post-compilation polish: one rigor enhancement and one standalone
    /// review edit, each placement-checked before application.
    async fn run_polish_passes(&self, user_prompt: &str, kb_context: &str) -> Result<(), Error> {
        let paper_text = self.paper.get_paper().await?;
        let task_id = self.next_task_id("rigor");
        match self
            .rigor
            .propose(&task_id, user_prompt, &paper_text, kb_context)
            .await
        {
            Ok(reply) if reply.needs_enhancement => {
                match apply_edit(
                    &paper_text,
                    EditOperation::InsertAfter,
                    &reply.placement_context,
                    &format!("\n{}", reply.content),
                    "",
                ) {
                    Ok(updated) => {
                        self.paper.update_paper(&updated).await?;
                        info!("rigor enhancement applied");
                    }
                    Err(e) => warn!(error = %e, "rigor enhancement placement failed"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "rigor agent failed"),
        }

        // Review sees only the paper, never tier-1 data.
        let paper_text = self.paper.get_paper().await?;
        let task_id = self.next_task_id("review");
        match self.review.propose(&task_id, &paper_text).await {
            Ok(reply) if reply.needs_edit && reply.edit_type != "none" => {
                let operation = if reply.edit_type == "delete" {
                    EditOperation::Delete
                } else {
                    EditOperation::Replace
                };
                match apply_edit(
                    &paper_text,
                    operation,
                    &reply.placement_context,
                    &reply.content,
                    "",
                ) {
                    Ok(updated) => {
                        self.paper.update_paper(&updated).await?;
                        info!("review edit applied");
                    }
                    Err(e) => warn!(error = %e, "review edit placement failed"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "review agent failed"),
        }

        Ok(())
    }

    /// Registers the finished paper in the session.
    async fn finish_paper(&self, topic_id: &str, paper_id: &str) -> Result<(), Error> {
        let content = self.paper.get_paper().await?;
        let title = paper_title(&content);
        self.session
            .register_paper(paper_id, topic_id, &title, &content)
            .await?;
        self.session.increment_stat("papers_completed", 1).await?;
        info!(paper_id, title = %title, "paper completed");
        Ok(())
    }
}

/// First contentful line of the paper, skipping markers.
fn paper_title(paper: &str) -> String {
    paper
        .lines()
        .map(str::trim)
        .find(|line| {
            !line.is_empty()
                && !line.contains(PAPER_ANCHOR)
                && !line.contains(ABSTRACT_PLACEHOLDER)
                && !line.contains(INTRO_PLACEHOLDER)
                && !line.contains(CONCLUSION_PLACEHOLDER)
        })
        .unwrap_or("Untitled")
        .to_string()
}
