//! Compiler decision logs: last ten rejections, acceptances, and declines.
//!
//! Appended as text so the high-context submitter can learn decision
//! patterns; one file per log in the session directory.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

/// Entries kept per log.
const MAX_ENTRIES: usize = 10;
/// Separator between entries on disk.
const ENTRY_SEPARATOR: &str = "\n\n---ENTRY---\n\n";

/// Which decision log an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    /// Validator rejections.
    Rejection,
    /// Validator acceptances.
    Acceptance,
    /// Submitter declines (nothing to construct this turn).
    Decline,
}

impl DecisionKind {
    const fn file_name(self) -> &'static str {
        match self {
            Self::Rejection => "compiler_rejections.txt",
            Self::Acceptance => "compiler_acceptances.txt",
            Self::Decline => "compiler_declines.txt",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Rejection => "REJECTION",
            Self::Acceptance => "ACCEPTANCE",
            Self::Decline => "DECLINE",
        }
    }
}

/// The three compiler decision logs.
pub struct DecisionLogs {
    session_dir: PathBuf,
    lock: Mutex<()>,
}

impl DecisionLogs {
    /// Creates the logs over a session directory.
    #[must_use]
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, kind: DecisionKind) -> PathBuf {
        self.session_dir.join(kind.file_name())
    }

    /// Appends an entry to a log, dropping the oldest past ten.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn record(&self, kind: DecisionKind, summary: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path(kind);
        let mut entries = load_entries(&path).await;
        entries.push(format!(
            "[{}] {}\n{summary}",
            Utc::now().to_rfc3339(),
            kind.label()
        ));
        while entries.len() > MAX_ENTRIES {
            entries.remove(0);
        }
        save_entries(&path, &entries).await?;
        info!(kind = kind.label(), "recorded compiler decision");
        Ok(())
    }

    /// A log's entries formatted for prompt injection.
    pub async fn format_for_context(&self, kind: DecisionKind) -> String {
        let _guard = self.lock.lock().await;
        let entries = load_entries(&self.path(kind)).await;
        if entries.is_empty() {
            return String::new();
        }
        entries.join(ENTRY_SEPARATOR)
    }

    /// Number of entries in a log.
    pub async fn count(&self, kind: DecisionKind) -> usize {
        let _guard = self.lock.lock().await;
        load_entries(&self.path(kind)).await.len()
    }
}

impl std::fmt::Debug for DecisionLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionLogs")
            .field("session_dir", &self.session_dir)
            .finish_non_exhaustive()
    }
}

async fn load_entries(path: &Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if !content.trim().is_empty() => content
            .split(ENTRY_SEPARATOR)
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

async fn save_entries(path: &Path, entries: &[String]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
    }
    tokio::fs::write(path, entries.join(ENTRY_SEPARATOR))
        .await
        .map_err(|e| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    debug!(path = %path.display(), entries = entries.len(), "saved decision log");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_format() {
        let dir = TempDir::new().unwrap();
        let logs = DecisionLogs::new(dir.path());
        logs.record(DecisionKind::Rejection, "placement check failed")
            .await
            .unwrap();
        logs.record(DecisionKind::Acceptance, "coherent and rigorous")
            .await
            .unwrap();

        let rejections = logs.format_for_context(DecisionKind::Rejection).await;
        assert!(rejections.contains("REJECTION"));
        assert!(rejections.contains("placement check failed"));
        assert!(!rejections.contains("coherent"));
    }

    #[tokio::test]
    async fn test_ring_bounded_at_ten() {
        let dir = TempDir::new().unwrap();
        let logs = DecisionLogs::new(dir.path());
        for i in 0..13 {
            logs.record(DecisionKind::Decline, &format!("decline {i}"))
                .await
                .unwrap();
        }
        assert_eq!(logs.count(DecisionKind::Decline).await, 10);
        let context = logs.format_for_context(DecisionKind::Decline).await;
        assert!(!context.contains("decline 0"));
        assert!(!context.contains("decline 2"));
        assert!(context.contains("decline 12"));
    }

    #[tokio::test]
    async fn test_logs_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let logs = DecisionLogs::new(dir.path());
            logs.record(DecisionKind::Acceptance, "kept").await.unwrap();
        }
        let logs = DecisionLogs::new(dir.path());
        assert_eq!(logs.count(DecisionKind::Acceptance).await, 1);
    }

    #[tokio::test]
    async fn test_empty_log_formats_empty() {
        let dir = TempDir::new().unwrap();
        let logs = DecisionLogs::new(dir.path());
        assert!(logs.format_for_context(DecisionKind::Rejection).await.is_empty());
    }
}
