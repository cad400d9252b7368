//! Shared training log: the validator-distributed database of accepted
//! submissions.
//!
//! Log-structured plain text with a canonical delimiter form. Entry
//! numbers are monotonic and gap-free modulo removals; entry content is
//! NEVER truncated. Per-topic brainstorm databases are separate instances
//! of this store pointed at `brainstorm_{topic_id}.txt`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::RechunkHook;
use crate::error::StoreError;

/// Delimiter line: eighty equals signs.
fn separator() -> String {
    "=".repeat(80)
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"={80}\s*\nSUBMISSION #(\d+)\s*\|\s*Accepted:\s*([^\n]+)\n={80}\s*\n").unwrap()
    })
}

/// One accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedEntry {
    /// Monotonic entry number; identity.
    pub number: u64,
    /// ISO-8601 acceptance timestamp.
    pub timestamp: String,
    /// Full submission content, never truncated.
    pub content: String,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<AcceptedEntry>,
    submission_count: u64,
}

/// The shared training log.
pub struct SharedTrainingLog {
    path: PathBuf,
    max_insights: usize,
    inner: Mutex<Inner>,
    hook: std::sync::RwLock<Option<RechunkHook>>,
}

impl SharedTrainingLog {
    /// Opens (or creates) a log at `path`, parsing any existing entries.
    ///
    /// `submission_count` is restored as the highest entry number found.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`] / [`StoreError::WriteFailed`] on I/O failures.
    pub async fn open(path: impl Into<PathBuf>, max_insights: usize) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::WriteFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
        }

        let inner = if path.exists() {
            let content =
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| StoreError::ReadFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            let entries = parse_formatted(&content);
            let submission_count = entries.iter().map(|e| e.number).max().unwrap_or(0);
            info!(
                path = %path.display(),
                entries = entries.len(),
                submission_count,
                "loaded shared training log"
            );
            Inner {
                entries,
                submission_count,
            }
        } else {
            tokio::fs::write(&path, "")
                .await
                .map_err(|e| StoreError::WriteFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            info!(path = %path.display(), "created new shared training log");
            Inner::default()
        };

        Ok(Self {
            path,
            max_insights,
            inner: Mutex::new(inner),
            hook: std::sync::RwLock::new(None),
        })
    }

    /// Registers the re-chunk hook fired after every append and removal.
    pub fn set_rechunk_hook(&self, hook: RechunkHook) {
        if let Ok(mut slot) = self.hook.write() {
            *slot = Some(hook);
        }
    }

    /// File path backing this log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends an accepted submission, assigning the next number.
    ///
    /// Content is stored verbatim. Exceeding the safety cap logs loudly but
    /// never prunes. The re-chunk hook fires after the lock is released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn append(&self, content: &str) -> Result<u64, StoreError> {
        let (number, full_content) = {
            let mut inner = self.inner.lock().await;
            inner.submission_count += 1;
            let number = inner.submission_count;
            inner.entries.push(AcceptedEntry {
                number,
                timestamp: Utc::now().to_rfc3339(),
                content: content.to_string(),
            });

            if inner.entries.len() > self.max_insights {
                // Accepted content is never pruned; the cap exists only as
                // an overflow alarm.
                warn!(
                    entries = inner.entries.len(),
                    cap = self.max_insights,
                    "shared training exceeds safety cap; NOT pruning"
                );
            }

            self.save_locked(&inner).await?;
            (number, join_content(&inner.entries))
        };

        info!(number, "accepted submission appended to shared training");
        self.fire_hook(full_content).await;
        Ok(number)
    }

    /// All entry content joined for prompt injection (no metadata).
    pub async fn all_content(&self) -> String {
        let inner = self.inner.lock().await;
        join_content(&inner.entries)
    }

    /// The canonical delimited form with numbers and timestamps.
    pub async fn formatted(&self) -> String {
        let inner = self.inner.lock().await;
        format_entries(&inner.entries)
    }

    /// Number of entries currently in the log.
    pub async fn count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Highest number issued so far.
    pub async fn submission_count(&self) -> u64 {
        self.inner.lock().await.submission_count
    }

    /// Content of a specific entry.
    pub async fn entry_content(&self, number: u64) -> Option<String> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .find(|e| e.number == number)
            .map(|e| e.content.clone())
    }

    /// All entries (copied out under the lock).
    pub async fn entries(&self) -> Vec<AcceptedEntry> {
        self.inner.lock().await.entries.clone()
    }

    /// Removes an entry by number, rewriting the file.
    ///
    /// Used by cleanup reviews after removal validation approves a specific
    /// archival. Returns whether the entry existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn remove(&self, number: u64) -> Result<bool, StoreError> {
        let (removed, full_content) = {
            let mut inner = self.inner.lock().await;
            let before = inner.entries.len();
            inner.entries.retain(|e| e.number != number);
            let removed = inner.entries.len() < before;
            if removed {
                self.save_locked(&inner).await?;
            }
            (removed, join_content(&inner.entries))
        };

        if removed {
            info!(number, "removed submission from shared training");
            self.fire_hook(full_content).await;
        } else {
            warn!(number, "submission not found for removal");
        }
        Ok(removed)
    }

    async fn save_locked(&self, inner: &Inner) -> Result<(), StoreError> {
        let content = format_entries(&inner.entries);
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(entries = inner.entries.len(), "saved shared training log");
        Ok(())
    }

    async fn fire_hook(&self, content: String) {
        let hook = self.hook.read().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(content).await;
        }
    }
}

impl std::fmt::Debug for SharedTrainingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTrainingLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn join_content(entries: &[AcceptedEntry]) -> String {
    entries
        .iter()
        .map(|e| e.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_entries(entries: &[AcceptedEntry]) -> String {
    let sep = separator();
    let sections: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "{sep}\nSUBMISSION #{} | Accepted: {}\n{sep}\n\n{}\n",
                e.number, e.timestamp, e.content
            )
        })
        .collect();
    sections.join("\n\n")
}

/// Parses the delimited file form. When no delimiter matches but the file
/// has content, the whole file becomes a single entry numbered 1.
fn parse_formatted(content: &str) -> Vec<AcceptedEntry> {
    let mut entries = Vec::new();
    let headers: Vec<(u64, String, usize, usize)> = header_re()
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse().ok()?;
            let timestamp = caps.get(2)?.as_str().trim().to_string();
            Some((number, timestamp, whole.start(), whole.end()))
        })
        .collect();

    for (idx, (number, timestamp, _, body_start)) in headers.iter().enumerate() {
        let body_end = headers
            .get(idx + 1)
            .map_or(content.len(), |(_, _, next_start, _)| *next_start);
        let body = content[*body_start..body_end].trim();
        if !body.is_empty() {
            entries.push(AcceptedEntry {
                number: *number,
                timestamp: timestamp.clone(),
                content: body.to_string(),
            });
        }
    }

    if entries.is_empty() && !content.trim().is_empty() {
        // Unformatted content: accept it whole rather than losing it.
        entries.push(AcceptedEntry {
            number: 1,
            timestamp: Utc::now().to_rfc3339(),
            content: content.trim().to_string(),
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_log(dir: &TempDir) -> SharedTrainingLog {
        SharedTrainingLog::open(dir.path().join("rag_shared_training.txt"), 1000)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_numbers() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;
        assert_eq!(log.append("first insight").await.unwrap(), 1);
        assert_eq!(log.append("second insight").await.unwrap(), 2);
        assert_eq!(log.count().await, 2);
        assert_eq!(log.submission_count().await, 2);
    }

    #[tokio::test]
    async fn test_round_trip_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rag_shared_training.txt");
        {
            let log = SharedTrainingLog::open(&path, 1000).await.unwrap();
            for i in 1..=5 {
                log.append(&format!("insight number {i}\nwith a second line"))
                    .await
                    .unwrap();
            }
        }

        let reloaded = SharedTrainingLog::open(&path, 1000).await.unwrap();
        assert_eq!(reloaded.count().await, 5);
        assert_eq!(reloaded.submission_count().await, 5);
        let entries = reloaded.entries().await;
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.number, (i + 1) as u64);
            assert_eq!(
                entry.content,
                format!("insight number {}\nwith a second line", i + 1)
            );
        }
    }

    #[tokio::test]
    async fn test_count_equals_max_number() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;
        for i in 0..4 {
            log.append(&format!("entry {i}")).await.unwrap();
        }
        let entries = log.entries().await;
        let max_number = entries.iter().map(|e| e.number).max().unwrap();
        assert_eq!(entries.len() as u64, max_number);
        assert_eq!(log.submission_count().await, max_number);
    }

    #[tokio::test]
    async fn test_remove_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rag_shared_training.txt");
        let log = SharedTrainingLog::open(&path, 1000).await.unwrap();
        log.append("keep one").await.unwrap();
        log.append("remove me").await.unwrap();
        log.append("keep two").await.unwrap();

        assert!(log.remove(2).await.unwrap());
        assert!(!log.remove(2).await.unwrap());
        assert_eq!(log.count().await, 2);
        // Numbering is preserved for survivors; the counter does not rewind.
        assert_eq!(log.submission_count().await, 3);

        let reloaded = SharedTrainingLog::open(&path, 1000).await.unwrap();
        let numbers: Vec<u64> = reloaded.entries().await.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_never_truncates_content() {
        let dir = TempDir::new().unwrap();
        let log = SharedTrainingLog::open(dir.path().join("t.txt"), 2).await.unwrap();
        let long = "x".repeat(50_000);
        log.append(&long).await.unwrap();
        log.append("a").await.unwrap();
        log.append("b").await.unwrap(); // exceeds cap of 2: logs, keeps all
        assert_eq!(log.count().await, 3);
        assert_eq!(log.entry_content(1).await.unwrap().len(), 50_000);
    }

    #[tokio::test]
    async fn test_unformatted_file_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.txt");
        tokio::fs::write(&path, "just some legacy content\nwithout delimiters")
            .await
            .unwrap();
        let log = SharedTrainingLog::open(&path, 1000).await.unwrap();
        assert_eq!(log.count().await, 1);
        let entries = log.entries().await;
        assert_eq!(entries[0].number, 1);
        assert!(entries[0].content.contains("legacy content"));
    }

    #[tokio::test]
    async fn test_rechunk_hook_fires_with_full_content() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_clone = Arc::clone(&seen);
        log.set_rechunk_hook(super::super::rechunk_hook(move |content| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().await.push(content);
            }
        }));

        log.append("alpha").await.unwrap();
        log.append("beta").await.unwrap();

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], "alpha\n\nbeta");
    }

    #[tokio::test]
    async fn test_all_content_joins_without_metadata() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;
        log.append("one").await.unwrap();
        log.append("two").await.unwrap();
        let content = log.all_content().await;
        assert_eq!(content, "one\n\ntwo");
        assert!(!content.contains("SUBMISSION #"));
    }

    #[tokio::test]
    async fn test_formatted_contains_delimiters() {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir).await;
        log.append("entry").await.unwrap();
        let formatted = log.formatted().await;
        assert!(formatted.contains(&"=".repeat(80)));
        assert!(formatted.contains("SUBMISSION #1 | Accepted: "));
    }
}
