//! Per-submitter rejection log.
//!
//! A rolling window of the last five validator rejections, persisted as
//! `Summary_Of_Last_5_Validator_Rejections_For_Submitter_{N}.txt`, injected
//! into the submitter's prompt so it learns from its mistakes.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::tokens::truncate_with_ellipsis;

/// Maximum rejections kept per submitter.
const MAX_REJECTIONS: usize = 5;
/// Character cap on each stored field.
const FIELD_CAP: usize = 750;

/// One recorded rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionRecord {
    /// Validator's summary, capped at 750 chars.
    pub validator_summary: String,
    /// First 750 chars of the rejected submission.
    pub submission_preview: String,
}

/// The per-submitter rejection log.
pub struct LocalTrainingMemory {
    submitter_id: usize,
    path: PathBuf,
    rejections: Mutex<Vec<RejectionRecord>>,
}

impl LocalTrainingMemory {
    /// Opens (or creates) the log for a submitter inside `session_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`] / [`StoreError::WriteFailed`] on I/O failures.
    pub async fn open(session_dir: &Path, submitter_id: usize) -> Result<Self, StoreError> {
        let path = session_dir.join(format!(
            "Summary_Of_Last_5_Validator_Rejections_For_Submitter_{submitter_id}.txt"
        ));
        tokio::fs::create_dir_all(session_dir)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let rejections = if path.exists() {
            let content =
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| StoreError::ReadFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            let parsed = parse_entries(&content);
            info!(
                submitter_id,
                rejections = parsed.len(),
                "loaded submitter rejection log"
            );
            parsed
        } else {
            tokio::fs::write(&path, "")
                .await
                .map_err(|e| StoreError::WriteFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            Vec::new()
        };

        Ok(Self {
            submitter_id,
            path,
            rejections: Mutex::new(rejections),
        })
    }

    /// Records a rejection, dropping the oldest past the window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn add_rejection(
        &self,
        validator_summary: &str,
        submission_content: &str,
    ) -> Result<(), StoreError> {
        let mut rejections = self.rejections.lock().await;
        rejections.push(RejectionRecord {
            validator_summary: truncate_with_ellipsis(validator_summary, FIELD_CAP),
            submission_preview: truncate_with_ellipsis(submission_content, FIELD_CAP),
        });
        if rejections.len() > MAX_REJECTIONS {
            rejections.remove(0);
        }
        self.save(&rejections).await
    }

    /// Clears all rejections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut rejections = self.rejections.lock().await;
        rejections.clear();
        info!(submitter_id = self.submitter_id, "cleared submitter rejection log");
        self.save(&rejections).await
    }

    /// Number of recorded rejections.
    pub async fn count(&self) -> usize {
        self.rejections.lock().await.len()
    }

    /// Formats the rejections for prompt injection.
    pub async fn format_for_context(&self) -> String {
        let rejections = self.rejections.lock().await;
        if rejections.is_empty() {
            return "No rejections yet.".to_string();
        }
        let entries: Vec<String> = rejections
            .iter()
            .enumerate()
            .map(|(idx, r)| {
                format!(
                    "[REJECTION {}]\n[VALIDATOR SUMMARY]\n{}\n\n[SUBMISSION PREVIEW]\n{}",
                    idx + 1,
                    r.validator_summary,
                    r.submission_preview
                )
            })
            .collect();
        entries.join("\n\n---\n\n")
    }

    async fn save(&self, rejections: &[RejectionRecord]) -> Result<(), StoreError> {
        let entries: Vec<String> = rejections
            .iter()
            .map(|r| {
                format!(
                    "[VALIDATOR SUMMARY]\n{}\n[SUBMISSION PREVIEW]\n{}",
                    r.validator_summary, r.submission_preview
                )
            })
            .collect();
        tokio::fs::write(&self.path, entries.join("\n---\n"))
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(
            submitter_id = self.submitter_id,
            rejections = rejections.len(),
            "saved submitter rejection log"
        );
        Ok(())
    }
}

fn parse_entries(content: &str) -> Vec<RejectionRecord> {
    content
        .split("\n---\n")
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let (summary, preview) = entry.split_once("\n[SUBMISSION PREVIEW]\n")?;
            Some(RejectionRecord {
                validator_summary: summary.replace("[VALIDATOR SUMMARY]\n", "").trim().to_string(),
                submission_preview: preview.trim().to_string(),
            })
        })
        .collect()
}

impl std::fmt::Debug for LocalTrainingMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrainingMemory")
            .field("submitter_id", &self.submitter_id)
            .finish_non_exhaustive()
    }
}
