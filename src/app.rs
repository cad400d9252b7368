//! Application wiring: constructs the gateway, retrieval engine, stores,
//! and coordinator as explicit dependencies on a single record.
//!
//! There are no module-level singletons; everything is owned here and
//! passed down by `Arc`. Re-chunk hooks are wired at bootstrap so paper
//! and outline writes re-index their content at all configured sizes.

use std::sync::Arc;

use tracing::warn;

use crate::allocator::ContextAllocator;
use crate::config::PipelineConfig;
use crate::coordinator::{Coordinator, CoordinatorDeps};
use crate::error::Error;
use crate::gateway::{HttpBackend, LlmBackend, LlmGateway};
use crate::retrieval::{RetrievalConfig, RetrievalEngine};
use crate::store::decisions::DecisionLogs;
use crate::store::local_training::LocalTrainingMemory;
use crate::store::outline::OutlineMemory;
use crate::store::paper::PaperMemory;
use crate::store::rechunk_hook;
use crate::store::rejection::RejectionMemory;
use crate::store::session::SessionStore;
use crate::store::workflow::WorkflowStore;

/// The fully wired application.
pub struct App {
    /// Pipeline configuration.
    pub config: Arc<PipelineConfig>,
    /// Shared LLM gateway.
    pub gateway: Arc<LlmGateway>,
    /// Shared retrieval engine.
    pub engine: Arc<RetrievalEngine>,
    /// Shared context allocator.
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
    /// Compiler decision logs.
    pub decisions: Arc<DecisionLogs>,
    /// Per-submitter local training memories.
    pub local_training: Vec<Arc<LocalTrainingMemory>>,
}

impl App {
    /// Bootstraps the application from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] when the HTTP client cannot be built or a store
    /// fails to open.
    pub async fn bootstrap(config: PipelineConfig) -> Result<Self, Error> {
        let config = Arc::new(config);

        let primary: Arc<dyn LlmBackend> = Arc::new(HttpBackend::new(
            "primary",
            config.base_url.clone(),
            config.api_key.clone(),
        )?);
        let fallback: Option<Arc<dyn LlmBackend>> = if config.openrouter_enabled {
            Some(Arc::new(HttpBackend::new(
                "openrouter",
                config.openrouter_base_url.clone(),
                config.openrouter_api_key.clone(),
            )?))
        } else {
            None
        };
        let gateway = Arc::new(LlmGateway::new(
            primary,
            fallback,
            config.embedding_model.clone(),
        ));

        let engine = Arc::new(RetrievalEngine::new(
            Arc::clone(&gateway),
            RetrievalConfig::from_pipeline(&config),
        ));
        let allocator = Arc::new(ContextAllocator::new(
            Arc::clone(&config),
            Arc::clone(&engine),
        ));

        let session_dir = config.session_dir.clone();
        let session = Arc::new(SessionStore::open(&session_dir).await?);
        let workflow = Arc::new(WorkflowStore::open(&session_dir).await?);
        let rejections = Arc::new(RejectionMemory::new(&session_dir));
        let outline = Arc::new(OutlineMemory::open(&session_dir).await?);
        let paper = Arc::new(PaperMemory::open(&session_dir).await?);
        let decisions = Arc::new(DecisionLogs::new(&session_dir));

        let mut local_training = Vec::with_capacity(config.submitter_count);
        for id in 0..config.submitter_count {
            local_training.push(Arc::new(LocalTrainingMemory::open(&session_dir, id).await?));
        }

        // Paper and outline writes re-index their content at all sizes.
        let paper_engine = Arc::clone(&engine);
        paper.set_rechunk_hook(rechunk_hook(move |content| {
            let engine = Arc::clone(&paper_engine);
            async move {
                if let Err(e) = engine
                    .add_text(&content, "compiler_paper.txt", None, false)
                    .await
                {
                    warn!(error = %e, "paper re-chunk failed");
                }
            }
        }));
        let outline_engine = Arc::clone(&engine);
        outline.set_rechunk_hook(rechunk_hook(move |content| {
            let engine = Arc::clone(&outline_engine);
            async move {
                if let Err(e) = engine
                    .add_text(&content, "compiler_outline.txt", None, false)
                    .await
                {
                    warn!(error = %e, "outline re-chunk failed");
                }
            }
        }));

        Ok(Self {
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
        })
    }

    /// Builds a coordinator over this application.
    ///
    /// `user_files` are user-uploaded (name, content) pairs; they are also
    /// indexed as permanent retrieval sources.
    pub async fn coordinator(&self, user_files: Vec<(String, String)>) -> Coordinator {
        for (name, content) in &user_files {
            if let Err(e) = self.engine.add_text(content, name, None, true).await {
                warn!(file = %name, error = %e, "failed to index user file");
            }
        }

        Coordinator::new(CoordinatorDeps {
            config: Arc::clone(&self.config),
            gateway: Arc::clone(&self.gateway),
            engine: Arc::clone(&self.engine),
            allocator: Arc::clone(&self.allocator),
            session: Arc::clone(&self.session),
            workflow: Arc::clone(&self.workflow),
            rejections: Arc::clone(&self.rejections),
            outline: Arc::clone(&self.outline),
            paper: Arc::clone(&self.paper),
            decisions: Arc::clone(&self.decisions),
            local_training: self.local_training.clone(),
            user_files,
        })
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("session_dir", &self.config.session_dir)
            .finish_non_exhaustive()
    }
}
