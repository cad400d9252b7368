//! Workflow-level rejection memory.
//!
//! Three bounded rings, persisted as JSON per session: topic-selection
//! rejections, per-topic completion feedback, and per-(topic, submitter)
//! brainstorm rejections. Each keeps the last five records with 750-char
//! field caps and serializes a "learn from these" block for prompts.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::tokens::truncate_with_ellipsis;

/// Records kept per ring.
const RING_SIZE: usize = 5;
/// Character cap on stored text fields.
const FIELD_CAP: usize = 750;

/// One stored rejection record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRejection {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Validator summary, capped at 750 chars.
    pub summary: String,
    /// Submission preview, capped at 750 chars.
    pub submission_preview: String,
}

/// One completion-feedback record for a topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionFeedback {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Whether the review decided to continue aggregating.
    pub continued: bool,
    /// Reviewer reasoning, capped at 750 chars.
    pub reasoning: String,
}

/// Workflow rejection memory rooted at the session directory.
pub struct RejectionMemory {
    session_dir: PathBuf,
    lock: Mutex<()>,
}

impl RejectionMemory {
    /// Creates the memory over a session directory.
    #[must_use]
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn topic_selection_path(&self) -> PathBuf {
        self.session_dir.join("topic_selection_rejections.json")
    }

    fn completion_feedback_path(&self, topic_id: &str) -> PathBuf {
        self.session_dir
            .join(format!("completion_feedback_{topic_id}.json"))
    }

    fn submitter_path(&self, topic_id: &str, submitter_id: usize) -> PathBuf {
        self.session_dir
            .join(format!("rejections_{topic_id}_submitter_{submitter_id}.json"))
    }

    /// Records a topic-selection rejection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn add_topic_rejection(&self, reasoning: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.topic_selection_path();
        let mut ring: Vec<StoredRejection> = load_ring(&path).await;
        ring.push(StoredRejection {
            timestamp: Utc::now().to_rfc3339(),
            summary: truncate_with_ellipsis(reasoning, FIELD_CAP),
            submission_preview: String::new(),
        });
        trim_ring(&mut ring);
        save_ring(&path, &ring).await
    }

    /// Topic-selection rejections formatted for prompt injection.
    pub async fn topic_rejections_for_context(&self) -> String {
        let _guard = self.lock.lock().await;
        let ring: Vec<StoredRejection> = load_ring(&self.topic_selection_path()).await;
        if ring.is_empty() {
            return String::new();
        }
        let mut out =
            String::from("Previous topic selections were rejected. Learn from these:\n\n");
        for (idx, record) in ring.iter().enumerate() {
            out.push_str(&format!(
                "[{idx}] {}\n{}\n\n",
                record.timestamp,
                record.summary,
                idx = idx + 1
            ));
        }
        out.trim_end().to_string()
    }

    /// Clears topic-selection rejections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn clear_topic_rejections(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        save_ring::<StoredRejection>(&self.topic_selection_path(), &[]).await
    }

    /// Records completion-review feedback for a topic.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn add_completion_feedback(
        &self,
        topic_id: &str,
        continued: bool,
        reasoning: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.completion_feedback_path(topic_id);
        let mut ring: Vec<CompletionFeedback> = load_ring(&path).await;
        ring.push(CompletionFeedback {
            timestamp: Utc::now().to_rfc3339(),
            continued,
            reasoning: truncate_with_ellipsis(reasoning, FIELD_CAP),
        });
        trim_ring(&mut ring);
        save_ring(&path, &ring).await
    }

    /// Completion feedback for a topic, formatted for prompt injection.
    pub async fn completion_feedback_for_context(&self, topic_id: &str) -> String {
        let _guard = self.lock.lock().await;
        let ring: Vec<CompletionFeedback> = load_ring(&self.completion_feedback_path(topic_id)).await;
        if ring.is_empty() {
            return String::new();
        }
        let mut out = String::from("Previous completion reviews for this topic:\n\n");
        for record in &ring {
            let verdict = if record.continued {
                "CONTINUED"
            } else {
                "MOVED TO PAPER"
            };
            out.push_str(&format!(
                "[{}] {verdict}\n{}\n\n",
                record.timestamp, record.reasoning
            ));
        }
        out.trim_end().to_string()
    }

    /// Records a brainstorm submitter rejection for a topic.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn add_submitter_rejection(
        &self,
        topic_id: &str,
        submitter_id: usize,
        summary: &str,
        submission_preview: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.submitter_path(topic_id, submitter_id);
        let mut ring: Vec<StoredRejection> = load_ring(&path).await;
        ring.push(StoredRejection {
            timestamp: Utc::now().to_rfc3339(),
            summary: truncate_with_ellipsis(summary, FIELD_CAP),
            submission_preview: truncate_with_ellipsis(submission_preview, FIELD_CAP),
        });
        trim_ring(&mut ring);
        save_ring(&path, &ring).await
    }

    /// Submitter rejections for a topic, formatted for prompt injection.
    pub async fn submitter_rejections_for_context(
        &self,
        topic_id: &str,
        submitter_id: usize,
    ) -> String {
        let _guard = self.lock.lock().await;
        let ring: Vec<StoredRejection> = load_ring(&self.submitter_path(topic_id, submitter_id)).await;
        if ring.is_empty() {
            return String::new();
        }
        let mut out = String::from("Your recent submissions were rejected. Learn from these:\n\n");
        for (idx, record) in ring.iter().enumerate() {
            out.push_str(&format!(
                "[REJECTION {n}]\n{}\n[YOUR SUBMISSION WAS]\n{}\n\n",
                record.summary,
                record.submission_preview,
                n = idx + 1
            ));
        }
        out.trim_end().to_string()
    }

    /// Removes every ring belonging to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when a file cannot be removed.
    pub async fn clear_topic(&self, topic_id: &str, submitter_count: usize) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut paths = vec![self.completion_feedback_path(topic_id)];
        for submitter_id in 0..submitter_count {
            paths.push(self.submitter_path(topic_id, submitter_id));
        }
        for path in paths {
            if path.exists() {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StoreError::WriteFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }
        info!(topic_id, "cleared topic rejection memory");
        Ok(())
    }
}

impl std::fmt::Debug for RejectionMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RejectionMemory")
            .field("session_dir", &self.session_dir)
            .finish_non_exhaustive()
    }
}

fn trim_ring<T>(ring: &mut Vec<T>) {
    while ring.len() > RING_SIZE {
        ring.remove(0);
    }
}

async fn load_ring<T: for<'de> Deserialize<'de>>(path: &Path) -> Vec<T> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if !content.trim().is_empty() => {
            serde_json::from_str(&content).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

async fn save_ring<T: Serialize>(path: &Path, ring: &[T]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
    }
    let json = serde_json::to_string_pretty(ring).map_err(|e| StoreError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    debug!(path = %path.display(), "saved rejection ring");
    Ok(())
}
