//! Tier-3 final answer agents: certainty assessor, format selector, and
//! volume organizer.
//!
//! Tier 3 operates only on completed papers, never on brainstorm
//! databases. The organizer loops until a validator accepts the chapter
//! plan AND the organizer locks it, force-completing at the iteration cap.

use std::sync::Arc;

use tracing::{info, warn};

use super::retry::complete_and_parse_json;
use crate::config::PipelineConfig;
use crate::contract::schema::{CertaintyReply, FormatReply, ValidationReply, VolumePlanReply};
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;
use crate::store::session::PaperRecord;

/// Iteration cap on the volume-organizer loop; completion is forced after.
pub const MAX_VOLUME_ITERATIONS: usize = 15;

/// A paper summary shown to the certainty assessor.
#[derive(Debug, Clone)]
pub struct PaperSummary {
    /// Paper id.
    pub paper_id: String,
    /// Paper title.
    pub title: String,
    /// Abstract text (or leading content when no abstract section parses).
    pub abstract_text: String,
}

impl PaperSummary {
    /// Builds a summary from a registry record and the paper content,
    /// extracting the abstract section best-effort.
    #[must_use]
    pub fn from_content(record: &PaperRecord, content: &str) -> Self {
        Self {
            paper_id: record.paper_id.clone(),
            title: record.title.clone(),
            abstract_text: extract_abstract(content),
        }
    }
}

/// Best-effort abstract extraction: the text between an `Abstract` header
/// and the next blank-line-separated section, else the leading 800 chars.
fn extract_abstract(content: &str) -> String {
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        if line.trim().eq_ignore_ascii_case("abstract") {
            let collected: Vec<&str> = lines
                .by_ref()
                .take_while(|l| !l.trim().is_empty())
                .collect();
            if !collected.is_empty() {
                return collected.join(" ");
            }
        }
    }
    crate::tokens::truncate_with_ellipsis(content, 800)
}

/// Tier-3 outcome of the certainty assessment, including any expansions
/// that were performed.
#[derive(Debug, Clone)]
pub struct CertaintyOutcome {
    /// The final assessment.
    pub reply: CertaintyReply,
    /// Papers whose full content was expanded into the second pass.
    pub expanded: Vec<String>,
}

/// The certainty assessor.
pub struct CertaintyAssessor {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl CertaintyAssessor {
    /// Creates the assessor.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Assesses the achievable answer level over paper abstracts,
    /// expanding requested papers into a second pass when asked.
    ///
    /// `full_content` resolves a paper id to its full text for expansion.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn assess<F, Fut>(
        &self,
        task_id: &str,
        user_prompt: &str,
        papers: &[PaperSummary],
        full_content: F,
    ) -> Result<CertaintyOutcome, Error>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        let abstracts = papers
            .iter()
            .map(|p| format!("[{}] {}\nABSTRACT: {}", p.paper_id, p.title, p.abstract_text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let first = self.assess_call(task_id, user_prompt, &abstracts, "").await?;
        if first.expand_requests.is_empty() {
            return Ok(CertaintyOutcome {
                reply: first,
                expanded: Vec::new(),
            });
        }

        // Expansion pass: include full content for the requested papers.
        let mut expanded = Vec::new();
        let mut expansions = String::new();
        for paper_id in &first.expand_requests {
            if let Some(content) = full_content(paper_id.clone()).await {
                expansions.push_str(&format!("[{paper_id} FULL CONTENT]\n{content}\n\n"));
                expanded.push(paper_id.clone());
            } else {
                warn!(paper_id = %paper_id, "expansion requested for unknown paper");
            }
        }

        let reply = self
            .assess_call(task_id, user_prompt, &abstracts, &expansions)
            .await?;
        info!(level = ?reply.answer_level, expanded = expanded.len(), "certainty assessed");
        Ok(CertaintyOutcome { reply, expanded })
    }

    async fn assess_call(
        &self,
        task_id: &str,
        user_prompt: &str,
        abstracts: &str,
        expansions: &str,
    ) -> Result<CertaintyReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::CERTAINTY_SYSTEM_PROMPT,
            prompts::CERTAINTY_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("COMPLETED PAPERS", abstracts),
                ("EXPANDED PAPERS", expansions),
            ],
            "Classify the achievable answer level as JSON:",
        );

        let available = self.config.available_input_tokens(
            self.config.high_context_window,
            self.config.high_context_max_output_tokens,
        );
        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: "certainty_assessor".to_string(),
            model: self.config.high_context_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.high_context_max_output_tokens).unwrap_or(u32::MAX),
            ),
        };
        let (value, _) = complete_and_parse_json(&self.gateway, call, available).await?;
        Ok(CertaintyReply::from_value(&value)?)
    }
}

/// The answer format selector.
pub struct FormatSelector {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl FormatSelector {
    /// Creates the selector.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Chooses short-form vs long-form for the final answer.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn select(
        &self,
        task_id: &str,
        user_prompt: &str,
        certainty_summary: &str,
        paper_count: usize,
    ) -> Result<FormatReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::FORMAT_SYSTEM_PROMPT,
            prompts::FORMAT_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("KNOWN CERTAINTIES", certainty_summary),
                ("COMPLETED PAPER COUNT", &paper_count.to_string()),
            ],
            "Choose the format as JSON:",
        );

        let available = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );
        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: "format_selector".to_string(),
            model: self.config.validator_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.validator_max_output_tokens).unwrap_or(u32::MAX),
            ),
        };
        let (value, _) = complete_and_parse_json(&self.gateway, call, available).await?;
        let reply = FormatReply::from_value(&value)?;
        info!(format = ?reply.format, "answer format selected");
        Ok(reply)
    }
}

/// The volume organizer (long form only).
pub struct VolumeOrganizer {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl VolumeOrganizer {
    /// Creates the organizer.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Iterates chapter plans until a validator accepts AND the organizer
    /// locks the plan; after [`MAX_VOLUME_ITERATIONS`] completion is forced
    /// with the last plan.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors when no plan is ever produced.
    pub async fn organize(
        &self,
        task_id: &str,
        user_prompt: &str,
        papers: &[PaperSummary],
    ) -> Result<VolumePlanReply, Error> {
        let paper_listing = papers
            .iter()
            .map(|p| format!("[{}] {}", p.paper_id, p.title))
            .collect::<Vec<_>>()
            .join("\n");

        let mut last_plan: Option<VolumePlanReply> = None;
        let mut feedback = String::new();

        for iteration in 1..=MAX_VOLUME_ITERATIONS {
            let plan = self
                .plan_call(task_id, user_prompt, &paper_listing, &feedback)
                .await?;
            let verdict = self
                .validate_plan(task_id, user_prompt, &plan)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "plan validation failed; treating as reject");
                    ValidationReply {
                        decision: crate::contract::schema::Decision::Reject,
                        reasoning: format!("validation error: {e}"),
                        summary: "validation error".to_string(),
                    }
                });

            let accepted = verdict.decision.is_accept();
            if accepted && plan.outline_complete {
                info!(iteration, "volume plan locked");
                return Ok(plan);
            }

            feedback = format!(
                "Iteration {iteration}: validator {}\n{}",
                if accepted { "accepted (plan not locked)" } else { "rejected" },
                verdict.summary
            );
            last_plan = Some(plan);
        }

        warn!(
            iterations = MAX_VOLUME_ITERATIONS,
            "volume organizer cap reached; forcing completion with last plan"
        );
        last_plan.ok_or_else(|| crate::error::Error::Workflow {
            message: "volume organizer produced no plan".to_string(),
        })
    }

    async fn plan_call(
        &self,
        task_id: &str,
        user_prompt: &str,
        paper_listing: &str,
        feedback: &str,
    ) -> Result<VolumePlanReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::VOLUME_SYSTEM_PROMPT,
            prompts::VOLUME_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("AVAILABLE PAPERS", paper_listing),
                ("VALIDATOR FEEDBACK", feedback),
            ],
            "Produce the chapter plan as JSON:",
        );
        let (value, _) = complete_and_parse_json(
            &self.gateway,
            self.organizer_call(task_id, &prompt),
            self.available_input(),
        )
        .await?;
        Ok(VolumePlanReply::from_value(&value)?)
    }

    async fn validate_plan(
        &self,
        task_id: &str,
        user_prompt: &str,
        plan: &VolumePlanReply,
    ) -> Result<ValidationReply, Error> {
        let plan_text = plan
            .chapters
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{}. [{}] {}{}",
                    i + 1,
                    c.kind,
                    c.title,
                    c.paper_id
                        .as_ref()
                        .map(|id| format!(" ({id})"))
                        .unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = prompts::build_sectioned_prompt(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            prompts::VALIDATOR_SCHEMA,
            &[("USER PROMPT", user_prompt), ("CHAPTER PLAN", &plan_text)],
            "Evaluate this chapter plan and provide your decision as JSON:",
        );
        let (value, _) = complete_and_parse_json(
            &self.gateway,
            self.organizer_call(task_id, &prompt),
            self.available_input(),
        )
        .await?;
        Ok(ValidationReply::from_value(&value)?)
    }

    fn organizer_call(&self, task_id: &str, prompt: &str) -> CompletionCall {
        CompletionCall {
            task_id: task_id.to_string(),
            role_id: "volume_organizer".to_string(),
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
}

impl std::fmt::Debug for CertaintyAssessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertaintyAssessor").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FormatSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatSelector").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for VolumeOrganizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeOrganizer").finish_non_exhaustive()
    }
}
