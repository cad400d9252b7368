//! Context allocation: direct injection vs RAG offload per content slot.
//!
//! For each optional slot, in role-specific priority order, the allocator
//! direct-injects when the slot fits the remaining budget (and leaves a
//! minimum reserve for retrieval); otherwise the slot is offloaded and a
//! single RAG retrieval fills whatever budget remains. Only an oversized
//! user prompt is a hard failure.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{AllocationError, Error};
use crate::retrieval::{ContextPack, RetrievalEngine};
use crate::tokens::count_tokens;

/// Token buffer absorbing final prompt-assembly slack.
const SAFETY_BUFFER: usize = 500;
/// RAG budget below which a warning is logged.
const LOW_RAG_SPACE: usize = 1000;

/// Submitter prompt assembly overhead: separators, headers, final instruction.
const SUBMITTER_ASSEMBLY: &str =
    "\n---\n\n---\n\n---\n\n---\n\n---\nUSER PROMPT:\nRETRIEVED EVIDENCE:\nNow generate your submission as JSON:";
/// Validator prompt assembly overhead.
const VALIDATOR_ASSEMBLY: &str =
    "\n---\n\n---\n\n---\n\n---\n\n---\n\n---\nUSER PROMPT:\nSUBMISSION TO VALIDATE:\nEXISTING KNOWLEDGE BASE (Retrieved):\nEvaluate this submission and provide your decision as JSON:";
/// Cleanup-review prompt assembly overhead.
const CLEANUP_ASSEMBLY: &str =
    "\n---\n\n---\n\n---\n\n---\n\n---\n\n---\nUSER PROMPT (the goal this database is solving):\nCURRENT ACCEPTED SUBMISSIONS DATABASE:\nUSER PROVIDED FILES:\nADDITIONAL CONTEXT (Retrieved):\nReview the database and provide your cleanup decision as JSON:";

/// RAG wrapping header for submitter prompts.
const SUBMITTER_RAG_WRAP: &str = "\n---\nRETRIEVED EVIDENCE:\n";
/// RAG wrapping header for validator prompts.
const VALIDATOR_RAG_WRAP: &str = "\n---\nEXISTING KNOWLEDGE BASE (Retrieved):\n";
/// RAG wrapping header for cleanup prompts.
const CLEANUP_RAG_WRAP: &str = "\n---\nADDITIONAL CONTEXT (Retrieved):\n";

/// Inputs for a submitter-role allocation.
#[derive(Debug, Clone, Default)]
pub struct SubmitterContext {
    /// The user's research prompt (mandatory).
    pub user_prompt: String,
    /// JSON schema text (mandatory).
    pub json_schema: String,
    /// System prompt (mandatory).
    pub system_prompt: String,
    /// Shared training content.
    pub shared_training: String,
    /// Local training content.
    pub local_training: String,
    /// Rejection log content.
    pub rejection_log: String,
    /// User files as (name, content) pairs in upload order.
    pub user_files: Vec<(String, String)>,
    /// Chunk size class for RAG retrieval.
    pub chunk_size: usize,
    /// Per-submitter context window override.
    pub context_window: Option<usize>,
    /// Per-submitter max output override.
    pub max_output_tokens: Option<usize>,
}

/// Inputs for a validator-role allocation.
#[derive(Debug, Clone, Default)]
pub struct ValidatorContext {
    /// The user's research prompt (mandatory).
    pub user_prompt: String,
    /// JSON schema text (mandatory).
    pub json_schema: String,
    /// System prompt (mandatory).
    pub system_prompt: String,
    /// Shared training content.
    pub shared_training: String,
    /// User files as (name, content) pairs.
    pub user_files: Vec<(String, String)>,
    /// The submission under review (mandatory).
    pub submission: String,
    /// Chunk size class for RAG retrieval.
    pub chunk_size: usize,
}

/// Inputs for a cleanup-review allocation.
#[derive(Debug, Clone, Default)]
pub struct CleanupContext {
    /// The user's research prompt.
    pub user_prompt: String,
    /// JSON schema text.
    pub json_schema: String,
    /// System prompt.
    pub system_prompt: String,
    /// Full accepted-submissions dump with numbers.
    pub all_submissions: String,
    /// User files as (name, content) pairs.
    pub user_files: Vec<(String, String)>,
    /// For removal validation, the entry proposed for removal.
    pub removal_candidate: Option<String>,
}

/// Allocation result: direct-injection text plus an optional retrieval pack.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    /// Concatenated direct-injection blocks.
    pub direct: String,
    /// Retrieval pack for offloaded slots, when any were offloaded.
    pub rag: Option<ContextPack>,
    /// Cleanup only: whether the submissions dump itself was offloaded.
    pub submissions_ragged: bool,
}

/// Priority-based budget splitter shared by all agents.
#[derive(Debug)]
pub struct ContextAllocator {
    config: Arc<PipelineConfig>,
    engine: Arc<RetrievalEngine>,
}

impl ContextAllocator {
    /// Creates an allocator over the shared retrieval engine.
    #[must_use]
    pub fn new(config: Arc<PipelineConfig>, engine: Arc<RetrievalEngine>) -> Self {
        Self { config, engine }
    }

    fn format_user_files(files: &[(String, String)]) -> String {
        let mut out = String::new();
        for (name, content) in files {
            out.push_str(&format!("[FILE: {name}]\n{content}\n"));
        }
        out
    }

    /// Allocates context for a submitter.
    ///
    /// Slot priority: shared training → local training → rejection log →
    /// user files.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::PromptTooLarge`] when the user prompt
    /// alone exceeds the input budget, or a retrieval error when the RAG
    /// call fails.
    pub async fn allocate_submitter(&self, ctx: &SubmitterContext) -> Result<Allocation, Error> {
        let window = ctx
            .context_window
            .unwrap_or(self.config.submitter_context_window);
        let max_output = ctx
            .max_output_tokens
            .unwrap_or(self.config.submitter_max_output_tokens);
        let available = self.config.available_input_tokens(window, max_output);
        let reserve = self.config.min_rag_reserve;

        let user_prompt_tokens = count_tokens(&ctx.user_prompt);
        let mandatory = user_prompt_tokens
            + count_tokens(&ctx.json_schema)
            + count_tokens(&ctx.system_prompt)
            + count_tokens(SUBMITTER_ASSEMBLY);

        if user_prompt_tokens > available.saturating_sub(reserve) {
            return Err(AllocationError::PromptTooLarge {
                prompt_tokens: user_prompt_tokens,
                max_tokens: available.saturating_sub(reserve),
            }
            .into());
        }

        let mut remaining = available.saturating_sub(mandatory);
        debug!(
            window,
            available, mandatory, remaining, "submitter context allocation"
        );

        let mut direct_parts: Vec<String> = Vec::new();
        let mut offloaded = false;

        // Highest-priority slot also guards the RAG reserve: inject only if
        // doing so still leaves meaningful retrieval space.
        if !ctx.shared_training.is_empty() {
            let formatted = format!("[SHARED TRAINING]\n{}", ctx.shared_training);
            let tokens = count_tokens(&formatted);
            if tokens <= remaining && tokens < remaining.saturating_sub(reserve) {
                remaining -= tokens;
                direct_parts.push(formatted);
                debug!(tokens, "shared training direct injected");
            } else {
                offloaded = true;
                info!(tokens, remaining, "shared training offloaded to RAG");
            }
        }

        if !ctx.local_training.is_empty() {
            let formatted = format!("[LOCAL TRAINING]\n{}", ctx.local_training);
            let tokens = count_tokens(&formatted);
            if tokens <= remaining {
                remaining -= tokens;
                direct_parts.push(formatted);
            } else {
                offloaded = true;
                info!(tokens, remaining, "local training offloaded to RAG");
            }
        }

        if !ctx.rejection_log.is_empty() {
            let formatted = format!("[REJECTION LOG]\n{}", ctx.rejection_log);
            let tokens = count_tokens(&formatted);
            if tokens <= remaining {
                remaining -= tokens;
                direct_parts.push(formatted);
            } else {
                offloaded = true;
                info!(tokens, remaining, "rejection log offloaded to RAG");
            }
        }

        let user_files = Self::format_user_files(&ctx.user_files);
        if !user_files.is_empty() {
            let tokens = count_tokens(&user_files);
            if tokens <= remaining {
                remaining -= tokens;
                direct_parts.push(user_files);
            } else {
                offloaded = true;
                info!(tokens, remaining, "user files offloaded to RAG");
            }
        }

        let direct = direct_parts.join("\n\n");
        let rag = if offloaded {
            self.retrieve_for_offload(
                &ctx.user_prompt,
                ctx.chunk_size,
                available,
                mandatory,
                &direct,
                SUBMITTER_RAG_WRAP,
            )
            .await?
        } else {
            debug!("all submitter content fits in direct injection");
            None
        };

        Ok(Allocation {
            direct,
            rag,
            submissions_ragged: false,
        })
    }

    /// Allocates context for a validator.
    ///
    /// The submission under review is mandatory; slot priority is shared
    /// training → user files.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::PromptTooLarge`] when the user prompt
    /// alone exceeds the input budget, or a retrieval error when the RAG
    /// call fails.
    pub async fn allocate_validator(&self, ctx: &ValidatorContext) -> Result<Allocation, Error> {
        let available = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );
        let reserve = self.config.min_rag_reserve;

        let user_prompt_tokens = count_tokens(&ctx.user_prompt);
        let mandatory = user_prompt_tokens
            + count_tokens(&ctx.json_schema)
            + count_tokens(&ctx.system_prompt)
            + count_tokens(&ctx.submission)
            + count_tokens(VALIDATOR_ASSEMBLY);

        if user_prompt_tokens > available.saturating_sub(reserve) {
            return Err(AllocationError::PromptTooLarge {
                prompt_tokens: user_prompt_tokens,
                max_tokens: available.saturating_sub(reserve),
            }
            .into());
        }

        let mut remaining = available.saturating_sub(mandatory);
        debug!(available, mandatory, remaining, "validator context allocation");

        let mut direct_parts: Vec<String> = Vec::new();
        let mut offloaded = false;

        if !ctx.shared_training.is_empty() {
            let formatted = format!("[SHARED TRAINING]\n{}", ctx.shared_training);
            let tokens = count_tokens(&formatted);
            if tokens <= remaining && tokens < remaining.saturating_sub(reserve) {
                remaining -= tokens;
                direct_parts.push(formatted);
                debug!(tokens, "validator: shared training direct injected");
            } else {
                offloaded = true;
                info!(tokens, remaining, "validator: shared training offloaded to RAG");
            }
        }

        let user_files = Self::format_user_files(&ctx.user_files);
        if !user_files.is_empty() {
            let tokens = count_tokens(&user_files);
            if tokens <= remaining {
                remaining -= tokens;
                direct_parts.push(user_files);
            } else {
                offloaded = true;
                info!(tokens, remaining, "validator: user files offloaded to RAG");
            }
        }

        let direct = direct_parts.join("\n\n");
        let rag = if offloaded {
            self.retrieve_for_offload(
                &ctx.user_prompt,
                ctx.chunk_size,
                available,
                mandatory,
                &direct,
                VALIDATOR_RAG_WRAP,
            )
            .await?
        } else {
            None
        };

        Ok(Allocation {
            direct,
            rag,
            submissions_ragged: false,
        })
    }

    /// Allocates context for a cleanup review or removal validation.
    ///
    /// Unlike the other allocators this never fails on size: when the full
    /// accepted-submissions dump does not fit, it is offloaded to RAG
    /// rather than skipped.
    ///
    /// # Errors
    ///
    /// Returns a retrieval error when the RAG call fails.
    pub async fn allocate_cleanup(&self, ctx: &CleanupContext) -> Result<Allocation, Error> {
        let available = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );
        let reserve = self.config.min_rag_reserve;

        let mut mandatory = count_tokens(&ctx.user_prompt)
            + count_tokens(&ctx.json_schema)
            + count_tokens(&ctx.system_prompt)
            + count_tokens(CLEANUP_ASSEMBLY);
        if let Some(candidate) = &ctx.removal_candidate {
            mandatory += count_tokens(candidate) + count_tokens("SUBMISSION PROPOSED FOR REMOVAL:\n");
        }

        let mut remaining = available.saturating_sub(mandatory);
        debug!(available, mandatory, remaining, "cleanup context allocation");

        let mut direct_parts: Vec<String> = Vec::new();
        let mut submissions_ragged = false;
        let mut offloaded = false;

        if !ctx.all_submissions.is_empty() {
            let tokens = count_tokens(&ctx.all_submissions);
            if tokens <= remaining && tokens < remaining.saturating_sub(reserve) {
                remaining -= tokens;
                direct_parts.push(format!("[ALL SUBMISSIONS]\n{}", ctx.all_submissions));
                info!(tokens, "cleanup: all submissions direct injected");
            } else {
                submissions_ragged = true;
                offloaded = true;
                info!(
                    tokens,
                    remaining, "cleanup: submissions exceed space; using RAG instead of skipping"
                );
            }
        }

        let user_files = Self::format_user_files(&ctx.user_files);
        if !user_files.is_empty() {
            let tokens = count_tokens(&user_files);
            if tokens <= remaining {
                remaining -= tokens;
                direct_parts.push(user_files);
            } else {
                offloaded = true;
                info!(tokens, remaining, "cleanup: user files offloaded to RAG");
            }
        }

        let direct = direct_parts.join("\n\n");
        let rag = if offloaded {
            self.retrieve_for_offload(
                &ctx.user_prompt,
                self.config.validator_chunk_size,
                available,
                mandatory,
                &direct,
                CLEANUP_RAG_WRAP,
            )
            .await?
        } else {
            info!("cleanup: all content fits in direct injection");
            None
        };

        Ok(Allocation {
            direct,
            rag,
            submissions_ragged,
        })
    }

    /// Computes the RAG budget from the space left after direct injection
    /// and runs the retrieval.
    async fn retrieve_for_offload(
        &self,
        query: &str,
        chunk_size: usize,
        available: usize,
        mandatory: usize,
        direct: &str,
        rag_wrap: &str,
    ) -> Result<Option<ContextPack>, Error> {
        let already_allocated = mandatory + count_tokens(direct);
        let rag_overhead = count_tokens(rag_wrap);
        let rag_budget = available
            .saturating_sub(already_allocated)
            .saturating_sub(SAFETY_BUFFER)
            .saturating_sub(rag_overhead);

        info!(
            rag_budget,
            available, mandatory, "performing RAG retrieval for offloaded content"
        );
        if rag_budget < LOW_RAG_SPACE {
            warn!(
                rag_budget,
                "very limited RAG space; consider a larger context window"
            );
        }

        let pack = self.engine.retrieve(query, chunk_size, rag_budget).await?;
        if pack.is_empty() {
            warn!("RAG retrieval returned empty despite offloaded content");
            Ok(None)
        } else {
            info!(
                evidence = pack.evidence.len(),
                coverage = pack.coverage,
                answerability = pack.answerability,
                "RAG retrieval complete"
            );
            Ok(Some(pack))
        }
    }
}
