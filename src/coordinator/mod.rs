//! Agent coordinator: runs the three pipeline tiers in sequence with
//! crash-recoverable checkpoints.
//!
//! Tier 1 aggregates a knowledge base per topic, tier 2 compiles a paper
//! through an explicit phase state machine, tier 3 synthesizes the final
//! answer from completed papers. Every workflow operation checkpoints to
//! the workflow store before it commits, so a restart resumes from the
//! same tier, topic, paper, and phase.

mod tier1;
mod tier2;
mod tier3;

pub use tier1::Tier1Outcome;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::agents::compiler::HighContextSubmitter;
use crate::agents::compiler_validator::CompilerValidator;
use crate::agents::completion::CompletionReviewer;
use crate::agents::critique::CritiqueAgent;
use crate::agents::final_answer::{CertaintyAssessor, FormatSelector, VolumeOrganizer};
use crate::agents::polish::{ReviewAgent, RigorAgent};
use crate::agents::submitter::SubmitterAgent;
use crate::agents::topic::TopicSelector;
use crate::agents::validator::ValidatorAgent;
use crate::allocator::{ContextAllocator, SubmitterContext};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::gateway::LlmGateway;
use crate::retrieval::RetrievalEngine;
use crate::store::decisions::DecisionLogs;
use crate::store::local_training::LocalTrainingMemory;
use crate::store::outline::OutlineMemory;
use crate::store::paper::PaperMemory;
use crate::store::rejection::RejectionMemory;
use crate::store::session::SessionStore;
use crate::store::shared_training::SharedTrainingLog;
use crate::store::workflow::{ModelConfigSnapshot, Tier, WorkflowStore};

/// The coordinator owning the tier sequence.
pub struct Coordinator {
    pub(crate) config: Arc<PipelineConfig>,
    pub(crate) gateway: Arc<LlmGateway>,
    pub(crate) engine: Arc<RetrievalEngine>,
    pub(crate) allocator: Arc<ContextAllocator>,
    pub(crate) session: Arc<SessionStore>,
    pub(crate) workflow: Arc<WorkflowStore>,
    pub(crate) rejections: Arc<RejectionMemory>,
    pub(crate) outline: Arc<OutlineMemory>,
    pub(crate) paper: Arc<PaperMemory>,
    pub(crate) decisions: Arc<DecisionLogs>,
    pub(crate) submitters: Vec<Arc<SubmitterAgent>>,
    pub(crate) local_training: Vec<Arc<LocalTrainingMemory>>,
    pub(crate) validator: ValidatorAgent,
    pub(crate) completion_reviewer: CompletionReviewer,
    pub(crate) compiler: HighContextSubmitter,
    pub(crate) compiler_validator: CompilerValidator,
    pub(crate) critique: CritiqueAgent,
    pub(crate) rigor: RigorAgent,
    pub(crate) review: ReviewAgent,
    pub(crate) topic_selector: TopicSelector,
    pub(crate) certainty_assessor: CertaintyAssessor,
    pub(crate) format_selector: FormatSelector,
    pub(crate) volume_organizer: VolumeOrganizer,
    pub(crate) user_files: Vec<(String, String)>,
    task_counter: AtomicU64,
}

/// Everything the coordinator needs, wired by [`crate::app::App`].
pub struct CoordinatorDeps {
    /// Pipeline configuration.
    pub config: Arc<PipelineConfig>,
    /// Shared gateway.
    pub gateway: Arc<LlmGateway>,
    /// Shared retrieval engine.
    pub engine: Arc<RetrievalEngine>,
    /// Shared allocator.
    pub allocator: Arc<ContextAllocator>,
    /// Session store.
    pub session: Arc<SessionStore>,
    /// Workflow checkpoint store.
    pub workflow: Arc<WorkflowStore>,
    /// Rejection memory.
    pub rejections: Arc<RejectionMemory>,
    /// Outline store.
    pub outline: Arc<OutlineMemory>,
    /// Paper store.
    pub paper: Arc<PaperMemory>,
    /// Decision logs.
    pub decisions: Arc<DecisionLogs>,
    /// Per-submitter local training memories.
    pub local_training: Vec<Arc<LocalTrainingMemory>>,
    /// User files injected into agent prompts.
    pub user_files: Vec<(String, String)>,
}

impl Coordinator {
    /// Builds the coordinator and its agents from wired dependencies.
    #[must_use]
    pub fn new(deps: CoordinatorDeps) -> Self {
        let CoordinatorDeps {
            config,
            gateway,
            engine,
            allocator,
            session,
            workflow,
            rejections,
            outline,
            paper,
            decisions,
            local_training,
            user_files,
        } = deps;

        let submitters = (0..config.submitter_count)
            .map(|id| {
                Arc::new(SubmitterAgent::new(
                    id,
                    Arc::clone(&gateway),
                    Arc::clone(&allocator),
                    Arc::clone(&config),
                ))
            })
            .collect();

        Self {
            validator: ValidatorAgent::new(
                Arc::clone(&gateway),
                Arc::clone(&allocator),
                Arc::clone(&config),
            ),
            completion_reviewer: CompletionReviewer::new(Arc::clone(&gateway), Arc::clone(&config)),
            compiler: HighContextSubmitter::new(Arc::clone(&gateway), Arc::clone(&config)),
            compiler_validator: CompilerValidator::new(Arc::clone(&gateway), Arc::clone(&config)),
            critique: CritiqueAgent::new(Arc::clone(&gateway), Arc::clone(&config)),
            rigor: RigorAgent::new(Arc::clone(&gateway), Arc::clone(&config)),
            review: ReviewAgent::new(Arc::clone(&gateway), Arc::clone(&config)),
            topic_selector: TopicSelector::new(Arc::clone(&gateway), Arc::clone(&config)),
            certainty_assessor: CertaintyAssessor::new(Arc::clone(&gateway), Arc::clone(&config)),
            format_selector: FormatSelector::new(Arc::clone(&gateway), Arc::clone(&config)),
            volume_organizer: VolumeOrganizer::new(Arc::clone(&gateway), Arc::clone(&config)),
            submitters,
            config,
            gateway,
            engine,
            allocator,
            session,
            workflow,
            rejections,
            outline,
            paper,
            decisions,
            local_training,
            user_files,
            task_counter: AtomicU64::new(0),
        }
    }

    /// Issues the next task id for telemetry.
    pub(crate) fn next_task_id(&self, role: &str) -> String {
        let n = self.task_counter.fetch_add(1, Ordering::Relaxed);
        format!("{role}_{n}")
    }

    /// Whether a resumable workflow checkpoint exists.
    pub async fn has_interrupted_workflow(&self) -> bool {
        self.workflow.has_interrupted_workflow().await
    }

    /// Runs the workflow to completion: tier 1 per topic until the
    /// completion review moves to a paper, tier 2 until the paper is done,
    /// then tier 3 over completed papers. Resumes from an interrupted
    /// checkpoint when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] on unrecoverable failures (backend gone, store
    /// corruption); per-submission failures are absorbed as rejections.
    pub async fn run(&self, user_prompt: &str) -> Result<(), Error> {
        let state = self.workflow.snapshot().await;
        if state.is_resumable() {
            info!(tier = ?state.current_tier, phase = ?state.paper_phase, "resuming interrupted workflow");
        } else {
            self.session.set_user_prompt(user_prompt).await?;
            self.workflow
                .update(|s| {
                    s.is_running = true;
                    s.model_config = ModelConfigSnapshot::capture(&self.config);
                })
                .await?;
        }

        loop {
            let state = self.workflow.snapshot().await;
            match state.current_tier {
                None => {
                    let (topic_id, topic_prompt) = self.select_topic().await?;
                    self.workflow
                        .update(|s| {
                            s.is_running = true;
                            s.current_tier = Some(Tier::Aggregation);
                            s.current_topic_id = Some(topic_id.clone());
                            s.acceptance_count = 0;
                            s.rejection_count = 0;
                            s.consecutive_rejections = 0;
                            s.exhaustion_signals = 0;
                            s.last_redundancy_check_at = 0;
                            s.last_completion_check_at = 0;
                        })
                        .await?;
                    self.session
                        .register_brainstorm(&topic_id, &topic_prompt)
                        .await?;
                }
                Some(Tier::Aggregation) => {
                    let topic_id = state.current_topic_id.clone().ok_or_else(|| {
                        Error::Workflow {
                            message: "tier 1 active without a topic".to_string(),
                        }
                    })?;
                    match self.run_tier1(&topic_id).await? {
                        Tier1Outcome::WritePaper => {
                            let paper_id = self.session.generate_paper_id().await?;
                            self.workflow
                                .update(|s| {
                                    s.current_tier = Some(Tier::PaperWriting);
                                    s.current_paper_id = Some(paper_id.clone());
                                    s.paper_phase = None;
                                })
                                .await?;
                        }
                    }
                }
                Some(Tier::PaperWriting) => {
                    let topic_id = state.current_topic_id.clone().ok_or_else(|| {
                        Error::Workflow {
                            message: "tier 2 active without a topic".to_string(),
                        }
                    })?;
                    let paper_id = state.current_paper_id.clone().ok_or_else(|| {
                        Error::Workflow {
                            message: "tier 2 active without a paper id".to_string(),
                        }
                    })?;
                    self.run_tier2(&topic_id, &paper_id).await?;
                    self.session.mark_brainstorm_complete(&topic_id).await?;
                    self.workflow
                        .update(|s| {
                            s.papers_completed_count += 1;
                            s.current_tier = Some(Tier::FinalAnswer);
                            s.current_topic_id = None;
                            s.current_paper_id = None;
                            s.paper_phase = None;
                            s.tier3_active = true;
                        })
                        .await?;
                }
                Some(Tier::FinalAnswer) => {
                    self.run_tier3().await?;
                    self.stop_clean().await?;
                    return Ok(());
                }
            }
        }
    }

    /// Clean stop: clears the workflow checkpoint.
    ///
    /// # Errors
    ///
    /// Returns store errors from the clear.
    pub async fn stop_clean(&self) -> Result<(), Error> {
        self.workflow.clear().await?;
        info!("workflow stopped cleanly");
        Ok(())
    }

    /// Selects the next topic via the topic selector, falling back to the
    /// user prompt itself when selection fails.
    async fn select_topic(&self) -> Result<(String, String), Error> {
        let user_prompt = self.session.user_prompt().await;
        let existing: String = self
            .session
            .brainstorms()
            .await
            .iter()
            .map(|b| format!("[{}] {} (completed: {})", b.topic_id, b.description, b.completed))
            .collect::<Vec<_>>()
            .join("\n");
        let rejection_context = self.rejections.topic_rejections_for_context().await;

        let task_id = self.next_task_id("topic");
        let topic_prompt = match self
            .topic_selector
            .select(&task_id, &user_prompt, &existing, &rejection_context)
            .await
        {
            Ok(reply) => reply.topic,
            Err(e) => {
                warn!(error = %e, "topic selection failed; using user prompt as topic");
                user_prompt.clone()
            }
        };

        let topic_id = self.session.generate_topic_id().await?;
        info!(topic_id = %topic_id, topic = %topic_prompt, "topic selected");
        Ok((topic_id, topic_prompt))
    }

    /// Opens a topic's brainstorm database and wires its re-chunk hook to
    /// the retrieval engine.
    pub(crate) async fn open_brainstorm(
        &self,
        topic_id: &str,
    ) -> Result<Arc<SharedTrainingLog>, Error> {
        let path = self.session.brainstorm_path(topic_id);
        let shared = Arc::new(
            SharedTrainingLog::open(path, self.config.max_shared_training_insights).await?,
        );

        let engine = Arc::clone(&self.engine);
        let source = format!("brainstorm_{topic_id}.txt");
        shared.set_rechunk_hook(crate::store::rechunk_hook(move |content| {
            let engine = Arc::clone(&engine);
            let source = source.clone();
            async move {
                if let Err(e) = engine.add_text(&content, &source, None, false).await {
                    warn!(source, error = %e, "re-chunk after state change failed");
                }
            }
        }));

        Ok(shared)
    }

    /// Budget-reduced knowledge-base context for the high-context roles:
    /// runs the submitter allocator against the compiler's window and
    /// concatenates direct text with retrieved evidence.
    pub(crate) async fn knowledge_context(
        &self,
        query: &str,
        knowledge: &str,
    ) -> Result<String, Error> {
        let allocation = self
            .allocator
            .allocate_submitter(&SubmitterContext {
                user_prompt: query.to_string(),
                json_schema: String::new(),
                system_prompt: String::new(),
                shared_training: knowledge.to_string(),
                local_training: String::new(),
                rejection_log: String::new(),
                user_files: self.user_files.clone(),
                chunk_size: self.config.validator_chunk_size,
                context_window: Some(self.config.high_context_window),
                max_output_tokens: Some(self.config.high_context_max_output_tokens),
            })
            .await?;

        let mut context = allocation.direct;
        if let Some(pack) = allocation.rag
            && !pack.is_empty()
        {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&pack.text);
        }
        Ok(context)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("submitters", &self.submitters.len())
            .finish_non_exhaustive()
    }
}
