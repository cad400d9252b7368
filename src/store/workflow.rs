//! Workflow state checkpoint: the on-disk blob enabling crash recovery
//! and pause/resume.
//!
//! Persisted on every state transition BEFORE the operation commits, so a
//! crash leaves a resumable checkpoint. A clean stop deletes the blob.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::StoreError;

/// Pipeline tier currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 1: knowledge-base aggregation.
    #[serde(rename = "tier1_aggregation")]
    Aggregation,
    /// Tier 2: paper compilation.
    #[serde(rename = "tier2_paper_writing")]
    PaperWriting,
    /// Tier 3: final answer synthesis.
    #[serde(rename = "tier3_final_answer")]
    FinalAnswer,
}

/// Paper compilation phase, in strict order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperPhase {
    /// Body construction.
    Body,
    /// Conclusion, written after the body.
    Conclusion,
    /// Introduction, written after the conclusion.
    Introduction,
    /// Abstract, written last.
    Abstract,
}

impl PaperPhase {
    /// The next phase, or `None` after the abstract.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Body => Some(Self::Conclusion),
            Self::Conclusion => Some(Self::Introduction),
            Self::Introduction => Some(Self::Abstract),
            Self::Abstract => None,
        }
    }
}

/// Snapshot of model settings so a resumed workflow keeps its configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelConfigSnapshot {
    /// Submitter model identity.
    pub submitter_model: Option<String>,
    /// Validator model identity.
    pub validator_model: Option<String>,
    /// High-context compiler model identity.
    pub high_context_model: Option<String>,
    /// Low-context rigor/review model identity.
    pub high_param_model: Option<String>,
    /// Submitter context window.
    pub submitter_context_window: usize,
    /// Validator context window.
    pub validator_context_window: usize,
    /// High-context window.
    pub high_context_context_window: usize,
    /// Low-context window.
    pub high_param_context_window: usize,
}

impl ModelConfigSnapshot {
    /// Captures the current model configuration.
    #[must_use]
    pub fn capture(config: &PipelineConfig) -> Self {
        Self {
            submitter_model: Some(config.submitter_model.clone()),
            validator_model: Some(config.validator_model.clone()),
            high_context_model: Some(config.high_context_model.clone()),
            high_param_model: Some(config.high_param_model.clone()),
            submitter_context_window: config.submitter_context_window,
            validator_context_window: config.validator_context_window,
            high_context_context_window: config.high_context_window,
            high_param_context_window: config.high_param_context_window,
        }
    }
}

/// The full workflow checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowState {
    /// Whether the workflow loop is running.
    pub is_running: bool,
    /// Current tier, when one is active or paused.
    pub current_tier: Option<Tier>,
    /// Topic being aggregated or written about.
    pub current_topic_id: Option<String>,
    /// Paper being compiled.
    pub current_paper_id: Option<String>,
    /// Current tier-2 phase.
    pub paper_phase: Option<PaperPhase>,
    /// Acceptances in the current topic.
    pub acceptance_count: u64,
    /// Rejections in the current topic.
    pub rejection_count: u64,
    /// Consecutive rejections since the last acceptance.
    pub consecutive_rejections: u64,
    /// Exhaustion signals (submitter declines) observed.
    pub exhaustion_signals: u64,
    /// Papers completed this session.
    pub papers_completed_count: u64,
    /// Acceptance count at the last cleanup review.
    pub last_redundancy_check_at: u64,
    /// Acceptance count at the last completion review.
    pub last_completion_check_at: u64,
    /// Whether tier 3 is active.
    pub tier3_active: bool,
    /// Tier-3 answer format, once selected.
    pub tier3_format: Option<String>,
    /// Tier-3 phase label.
    pub tier3_phase: Option<String>,
    /// Model configuration snapshot.
    pub model_config: ModelConfigSnapshot,
    /// Timestamp of the last transition.
    pub last_updated: String,
}

impl WorkflowState {
    /// Whether this checkpoint represents a resumable workflow: a tier is
    /// set AND a topic is in progress, papers have completed, or tier 3 is
    /// active. Covers both crash recovery (`is_running` still true) and
    /// pause/resume.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        let has_tier = self.current_tier.is_some();
        let has_topic = self.current_topic_id.is_some();
        let has_papers = self.papers_completed_count > 0;
        has_tier && (has_topic || has_papers || self.tier3_active)
    }
}

/// The checkpoint store, exclusively owned by the coordinator task.
pub struct WorkflowStore {
    path: PathBuf,
    state: Mutex<WorkflowState>,
}

impl WorkflowStore {
    /// Opens the checkpoint inside `session_dir`, loading any existing blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] when an existing blob fails to parse.
    pub async fn open(session_dir: &Path) -> Result<Self, StoreError> {
        let path = session_dir.join("workflow_state.json");
        tokio::fs::create_dir_all(session_dir)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let state = if path.exists() {
            let content =
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| StoreError::ReadFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            let state: WorkflowState =
                serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            info!(tier = ?state.current_tier, "workflow state loaded");
            state
        } else {
            WorkflowState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> WorkflowState {
        self.state.lock().await.clone()
    }

    /// Applies a transition and persists the blob before returning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the checkpoint save fails.
    pub async fn update<F>(&self, transition: F) -> Result<WorkflowState, StoreError>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let mut state = self.state.lock().await;
        transition(&mut state);
        state.last_updated = Utc::now().to_rfc3339();

        let json =
            serde_json::to_string_pretty(&*state).map_err(|e| StoreError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(tier = ?state.current_tier, phase = ?state.paper_phase, "workflow checkpoint saved");
        Ok(state.clone())
    }

    /// Whether a resumable workflow exists.
    pub async fn has_interrupted_workflow(&self) -> bool {
        self.state.lock().await.is_resumable()
    }

    /// Clears the checkpoint (clean stop): resets state and deletes the blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the blob cannot be removed.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        *state = WorkflowState::default();
        if self.path.exists() {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| StoreError::WriteFailed {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })?;
        }
        info!("workflow state cleared");
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fresh_store_not_resumable() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::open(dir.path()).await.unwrap();
        assert!(!store.has_interrupted_workflow().await);
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        {
            let store = WorkflowStore::open(dir.path()).await.unwrap();
            store
                .update(|state| {
                    state.is_running = true;
                    state.current_tier = Some(Tier::PaperWriting);
                    state.current_topic_id = Some("topic_3".to_string());
                    state.current_paper_id = Some("paper_1".to_string());
                    state.paper_phase = Some(PaperPhase::Body);
                })
                .await
                .unwrap();
        }

        // Simulated crash: a fresh store sees the same checkpoint.
        let store = WorkflowStore::open(dir.path()).await.unwrap();
        assert!(store.has_interrupted_workflow().await);
        let state = store.snapshot().await;
        assert_eq!(state.current_tier, Some(Tier::PaperWriting));
        assert_eq!(state.current_topic_id.as_deref(), Some("topic_3"));
        assert_eq!(state.current_paper_id.as_deref(), Some("paper_1"));
        assert_eq!(state.paper_phase, Some(PaperPhase::Body));
    }

    #[tokio::test]
    async fn test_resumable_via_completed_papers() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::open(dir.path()).await.unwrap();
        store
            .update(|state| {
                state.current_tier = Some(Tier::Aggregation);
                state.papers_completed_count = 2;
            })
            .await
            .unwrap();
        assert!(store.has_interrupted_workflow().await);
    }

    #[tokio::test]
    async fn test_resumable_via_tier3() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::open(dir.path()).await.unwrap();
        store
            .update(|state| {
                state.current_tier = Some(Tier::FinalAnswer);
                state.tier3_active = true;
            })
            .await
            .unwrap();
        assert!(store.has_interrupted_workflow().await);
    }

    #[tokio::test]
    async fn test_tier_without_progress_not_resumable() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::open(dir.path()).await.unwrap();
        store
            .update(|state| state.current_tier = Some(Tier::Aggregation))
            .await
            .unwrap();
        assert!(!store.has_interrupted_workflow().await);
    }

    #[tokio::test]
    async fn test_clear_removes_blob() {
        let dir = TempDir::new().unwrap();
        let store = WorkflowStore::open(dir.path()).await.unwrap();
        store
            .update(|state| {
                state.current_tier = Some(Tier::Aggregation);
                state.current_topic_id = Some("t".to_string());
            })
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(!store.has_interrupted_workflow().await);
        assert!(!dir.path().join("workflow_state.json").exists());
    }

    #[tokio::test]
    async fn test_tier_serialization_labels() {
        let json = serde_json::to_string(&Tier::Aggregation).unwrap();
        assert_eq!(json, "\"tier1_aggregation\"");
        let json = serde_json::to_string(&PaperPhase::Abstract).unwrap();
        assert_eq!(json, "\"abstract\"");
    }

    #[test]
    fn test_paper_phase_order() {
        assert_eq!(PaperPhase::Body.next(), Some(PaperPhase::Conclusion));
        assert_eq!(PaperPhase::Conclusion.next(), Some(PaperPhase::Introduction));
        assert_eq!(PaperPhase::Introduction.next(), Some(PaperPhase::Abstract));
        assert_eq!(PaperPhase::Abstract.next(), None);
    }
}
