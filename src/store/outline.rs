//! Outline memory: the compiler's outline stream plus the creation
//! feedback log that drives iterative outline refinement.
//!
//! Every write strips all anchor occurrences and re-appends exactly one
//! `OUTLINE_ANCHOR` at the end. The feedback log keeps the last five
//! validator verdicts; accepted entries carry a copy of the outline so the
//! submitter can see its last accepted version and decide whether to lock.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::RechunkHook;
use crate::error::StoreError;

/// End-of-outline sentinel; always the last line when the file is non-empty.
pub const OUTLINE_ANCHOR: &str =
    "[HARD CODED END-OF-OUTLINE MARK -- ALL OUTLINE CONTENT SHOULD BE ABOVE THIS LINE]";

/// Separator between feedback entries.
const FEEDBACK_SEPARATOR: &str = "\n\n---FEEDBACK SEPARATOR---\n\n";
/// Marker preceding the outline copy inside an accepted feedback entry.
const OUTLINE_COPY_MARKER: &str = "\n\n---YOUR OUTLINE---\n";
/// Feedback entries kept.
const MAX_FEEDBACK: usize = 5;

/// The outline store.
pub struct OutlineMemory {
    path: PathBuf,
    feedback_path: PathBuf,
    lock: Mutex<()>,
    hook: std::sync::RwLock<Option<RechunkHook>>,
}

impl OutlineMemory {
    /// Opens (or creates) the outline files inside `session_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the files cannot be created.
    pub async fn open(session_dir: &Path) -> Result<Self, StoreError> {
        let path = session_dir.join("compiler_outline.txt");
        let feedback_path = session_dir.join("compiler_outline_creation_feedback.txt");
        tokio::fs::create_dir_all(session_dir)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        for file in [&path, &feedback_path] {
            if !file.exists() {
                tokio::fs::write(file, "")
                    .await
                    .map_err(|e| StoreError::WriteFailed {
                        path: file.display().to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(Self {
            path,
            feedback_path,
            lock: Mutex::new(()),
            hook: std::sync::RwLock::new(None),
        })
    }

    /// Registers the re-chunk hook fired after outline writes.
    pub fn set_rechunk_hook(&self, hook: RechunkHook) {
        if let Ok(mut slot) = self.hook.write() {
            *slot = Some(hook);
        }
    }

    /// Current outline content (with anchor, as persisted).
    pub async fn get_outline(&self) -> Result<String, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_outline().await
    }

    /// Outline content with the anchor stripped, for prompt injection.
    pub async fn outline_body(&self) -> Result<String, StoreError> {
        Ok(strip_anchors(&self.get_outline().await?))
    }

    /// Replaces the outline, enforcing the single-anchor discipline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn update_outline(&self, new_outline: &str) -> Result<(), StoreError> {
        let final_content = {
            let _guard = self.lock.lock().await;
            let cleaned = strip_anchors(new_outline);
            let final_content = ensure_anchor(&cleaned);
            self.write_outline(&final_content).await?;
            info!(chars = final_content.len(), "outline updated");
            final_content
        };
        self.fire_hook(strip_anchors(&final_content)).await;
        Ok(())
    }

    /// Lightweight check-and-repair: guarantees a single trailing anchor.
    ///
    /// Returns whether a repair was performed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the repair save fails.
    pub async fn ensure_anchor_intact(&self) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let outline = self.read_outline().await?;
        if outline.trim().is_empty() {
            return Ok(false);
        }
        let stripped = strip_anchors(&outline);
        let repaired = ensure_anchor(&stripped);
        if repaired == outline.trim_end() {
            return Ok(false);
        }
        self.write_outline(&repaired).await?;
        info!("repaired outline anchor");
        Ok(true)
    }

    /// Appends a validator verdict to the creation feedback log.
    ///
    /// Accepted verdicts store a copy of the outline for later iterations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn add_creation_feedback(
        &self,
        reasoning: &str,
        accepted: bool,
        outline_content: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_feedback_entries().await;

        let status = if accepted { "ACCEPTED" } else { "REJECTED" };
        let timestamp = Utc::now().to_rfc3339();
        let entry = if accepted && !outline_content.is_empty() {
            format!("[{timestamp}] {status}\n{reasoning}{OUTLINE_COPY_MARKER}{outline_content}")
        } else {
            format!("[{timestamp}] {status}\n{reasoning}")
        };
        entries.push(entry);
        while entries.len() > MAX_FEEDBACK {
            entries.remove(0);
        }

        self.write_feedback(&entries).await?;
        debug!(status, "added outline creation feedback");
        Ok(())
    }

    /// The feedback log formatted for the outline-create prompt.
    pub async fn creation_feedback(&self) -> Result<String, StoreError> {
        let _guard = self.lock.lock().await;
        let entries = self.read_feedback_entries().await;
        if entries.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "Previous outline feedback (most recent last):\n\n{}",
            entries.join(FEEDBACK_SEPARATOR)
        ))
    }

    /// The outline copy stored with the most recent accepted feedback.
    pub async fn last_accepted_outline(&self) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let entries = self.read_feedback_entries().await;
        Ok(entries.iter().rev().find_map(|entry| {
            entry
                .split_once(OUTLINE_COPY_MARKER)
                .map(|(_, outline)| outline.trim().to_string())
        }))
    }

    /// Clears the creation feedback log (called when the outline is locked).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn clear_creation_feedback(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.write_feedback(&[]).await?;
        info!("cleared outline creation feedback");
        Ok(())
    }

    async fn read_outline(&self) -> Result<String, StoreError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::ReadFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_outline(&self, content: &str) -> Result<(), StoreError> {
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn read_feedback_entries(&self) -> Vec<String> {
        match tokio::fs::read_to_string(&self.feedback_path).await {
            Ok(content) if !content.trim().is_empty() => content
                .split(FEEDBACK_SEPARATOR)
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn write_feedback(&self, entries: &[String]) -> Result<(), StoreError> {
        tokio::fs::write(&self.feedback_path, entries.join(FEEDBACK_SEPARATOR))
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: self.feedback_path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn fire_hook(&self, content: String) {
        let hook = self.hook.read().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(content).await;
        }
    }
}

impl std::fmt::Debug for OutlineMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlineMemory")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Removes every anchor occurrence.
fn strip_anchors(content: &str) -> String {
    content.replace(OUTLINE_ANCHOR, "").trim().to_string()
}

/// Appends a single anchor to non-empty content.
fn ensure_anchor(content: &str) -> String {
    let trimmed = content.trim_end();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n\n{OUTLINE_ANCHOR}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> OutlineMemory {
        OutlineMemory::open(dir.path()).await.unwrap()
    }

    fn anchor_count(text: &str) -> usize {
        text.matches(OUTLINE_ANCHOR).count()
    }

    #[tokio::test]
    async fn test_update_appends_single_anchor() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        outline.update_outline("I. Introduction\nII. Methods").await.unwrap();
        let content = outline.get_outline().await.unwrap();
        assert_eq!(anchor_count(&content), 1);
        assert!(content.ends_with(OUTLINE_ANCHOR));
        assert!(content.starts_with("I. Introduction"));
    }

    #[tokio::test]
    async fn test_update_strips_duplicate_anchors() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        let dirty = format!("{OUTLINE_ANCHOR}\nI. Intro\n{OUTLINE_ANCHOR}\nII. More\n{OUTLINE_ANCHOR}");
        outline.update_outline(&dirty).await.unwrap();
        let content = outline.get_outline().await.unwrap();
        assert_eq!(anchor_count(&content), 1);
        assert!(content.contains("I. Intro"));
        assert!(content.contains("II. More"));
    }

    #[tokio::test]
    async fn test_ensure_anchor_intact_repairs_missing() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        tokio::fs::write(dir.path().join("compiler_outline.txt"), "raw outline text")
            .await
            .unwrap();
        assert!(outline.ensure_anchor_intact().await.unwrap());
        let content = outline.get_outline().await.unwrap();
        assert_eq!(anchor_count(&content), 1);

        // Second call is a no-op: the repair is a fixed point.
        assert!(!outline.ensure_anchor_intact().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_anchor_intact_empty_file() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        assert!(!outline.ensure_anchor_intact().await.unwrap());
    }

    #[tokio::test]
    async fn test_feedback_ring_and_last_accepted() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        outline
            .add_creation_feedback("too shallow", false, "")
            .await
            .unwrap();
        outline
            .add_creation_feedback("good structure", true, "I. Intro\nII. Body")
            .await
            .unwrap();
        outline
            .add_creation_feedback("still missing methods", false, "")
            .await
            .unwrap();

        let feedback = outline.creation_feedback().await.unwrap();
        assert!(feedback.contains("REJECTED"));
        assert!(feedback.contains("ACCEPTED"));
        assert!(feedback.contains("too shallow"));

        let last = outline.last_accepted_outline().await.unwrap();
        assert_eq!(last.as_deref(), Some("I. Intro\nII. Body"));
    }

    #[tokio::test]
    async fn test_feedback_bounded_at_five() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        for i in 0..7 {
            outline
                .add_creation_feedback(&format!("feedback {i}"), false, "")
                .await
                .unwrap();
        }
        let feedback = outline.creation_feedback().await.unwrap();
        assert!(!feedback.contains("feedback 0"));
        assert!(!feedback.contains("feedback 1"));
        assert!(feedback.contains("feedback 6"));
    }

    #[tokio::test]
    async fn test_clear_feedback() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        outline.add_creation_feedback("r", true, "o").await.unwrap();
        outline.clear_creation_feedback().await.unwrap();
        assert!(outline.creation_feedback().await.unwrap().is_empty());
        assert!(outline.last_accepted_outline().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_outline_body_strips_anchor() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        outline.update_outline("The outline").await.unwrap();
        assert_eq!(outline.outline_body().await.unwrap(), "The outline");
    }

    #[tokio::test]
    async fn test_rechunk_hook_fires() {
        let dir = TempDir::new().unwrap();
        let outline = open(&dir).await;
        let fired = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let fired_clone = std::sync::Arc::clone(&fired);
        outline.set_rechunk_hook(super::super::rechunk_hook(move |content| {
            let fired = std::sync::Arc::clone(&fired_clone);
            async move {
                fired.lock().await.push(content);
            }
        }));
        outline.update_outline("content").await.unwrap();
        let seen = fired.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "content");
    }
}
