//! Session store: metadata, stats, id generation, and the completed-paper
//! registry.
//!
//! One session directory holds everything the pipeline persists. This
//! store owns `session_metadata.json` and `session_stats.json` and the
//! archived copies of completed papers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

/// A brainstorm topic registered in the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainstormRecord {
    /// Topic id (`topic_N`).
    pub topic_id: String,
    /// Topic description from the selector.
    pub description: String,
    /// Whether aggregation for this topic finished.
    pub completed: bool,
}

/// A completed paper registered in the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Paper id (`paper_N`).
    pub paper_id: String,
    /// Topic the paper came from.
    pub topic_id: String,
    /// Paper title.
    pub title: String,
    /// Completion timestamp.
    pub completed_at: String,
    /// Whether the paper was archived (superseded).
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SessionMetadata {
    user_prompt: String,
    created_at: String,
    topic_counter: u64,
    paper_counter: u64,
    brainstorms: Vec<BrainstormRecord>,
    papers: Vec<PaperRecord>,
}

/// The session store.
pub struct SessionStore {
    dir: PathBuf,
    metadata: Mutex<SessionMetadata>,
    stats: Mutex<HashMap<String, i64>>,
}

impl SessionStore {
    /// Opens (or creates) the session at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] variants on I/O or corrupt JSON.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;

        let metadata_path = dir.join("session_metadata.json");
        let metadata = if metadata_path.exists() {
            let content = tokio::fs::read_to_string(&metadata_path).await.map_err(|e| {
                StoreError::ReadFailed {
                    path: metadata_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: metadata_path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            SessionMetadata {
                created_at: Utc::now().to_rfc3339(),
                ..SessionMetadata::default()
            }
        };

        let stats_path = dir.join("session_stats.json");
        let stats = if stats_path.exists() {
            let content =
                tokio::fs::read_to_string(&stats_path)
                    .await
                    .map_err(|e| StoreError::ReadFailed {
                        path: stats_path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            HashMap::new()
        };

        info!(dir = %dir.display(), "session opened");
        Ok(Self {
            dir,
            metadata: Mutex::new(metadata),
            stats: Mutex::new(stats),
        })
    }

    /// The session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a topic's brainstorm database.
    #[must_use]
    pub fn brainstorm_path(&self, topic_id: &str) -> PathBuf {
        self.dir.join(format!("brainstorm_{topic_id}.txt"))
    }

    /// The user's research prompt.
    pub async fn user_prompt(&self) -> String {
        self.metadata.lock().await.user_prompt.clone()
    }

    /// Sets the user's research prompt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn set_user_prompt(&self, prompt: &str) -> Result<(), StoreError> {
        let mut metadata = self.metadata.lock().await;
        metadata.user_prompt = prompt.to_string();
        self.save_metadata(&metadata).await
    }

    /// Generates the next topic id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn generate_topic_id(&self) -> Result<String, StoreError> {
        let mut metadata = self.metadata.lock().await;
        metadata.topic_counter += 1;
        let id = format!("topic_{}", metadata.topic_counter);
        self.save_metadata(&metadata).await?;
        Ok(id)
    }

    /// Generates the next paper id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn generate_paper_id(&self) -> Result<String, StoreError> {
        let mut metadata = self.metadata.lock().await;
        metadata.paper_counter += 1;
        let id = format!("paper_{}", metadata.paper_counter);
        self.save_metadata(&metadata).await?;
        Ok(id)
    }

    /// Registers a brainstorm topic.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn register_brainstorm(
        &self,
        topic_id: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        let mut metadata = self.metadata.lock().await;
        metadata.brainstorms.push(BrainstormRecord {
            topic_id: topic_id.to_string(),
            description: description.to_string(),
            completed: false,
        });
        self.save_metadata(&metadata).await
    }

    /// Marks a brainstorm complete.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn mark_brainstorm_complete(&self, topic_id: &str) -> Result<(), StoreError> {
        let mut metadata = self.metadata.lock().await;
        for record in &mut metadata.brainstorms {
            if record.topic_id == topic_id {
                record.completed = true;
            }
        }
        self.save_metadata(&metadata).await
    }

    /// Registered brainstorms.
    pub async fn brainstorms(&self) -> Vec<BrainstormRecord> {
        self.metadata.lock().await.brainstorms.clone()
    }

    /// Registers a completed paper and archives its content to
    /// `{paper_id}.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn register_paper(
        &self,
        paper_id: &str,
        topic_id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let paper_path = self.dir.join(format!("{paper_id}.txt"));
        tokio::fs::write(&paper_path, content)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: paper_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut metadata = self.metadata.lock().await;
        metadata.papers.push(PaperRecord {
            paper_id: paper_id.to_string(),
            topic_id: topic_id.to_string(),
            title: title.to_string(),
            completed_at: Utc::now().to_rfc3339(),
            archived: false,
        });
        self.save_metadata(&metadata).await?;
        info!(paper_id, title, "registered completed paper");
        Ok(())
    }

    /// Marks a paper archived.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn archive_paper(&self, paper_id: &str) -> Result<(), StoreError> {
        let mut metadata = self.metadata.lock().await;
        for record in &mut metadata.papers {
            if record.paper_id == paper_id {
                record.archived = true;
            }
        }
        self.save_metadata(&metadata).await
    }

    /// Non-archived completed papers.
    pub async fn completed_papers(&self) -> Vec<PaperRecord> {
        self.metadata
            .lock()
            .await
            .papers
            .iter()
            .filter(|p| !p.archived)
            .cloned()
            .collect()
    }

    /// Full content of a completed paper.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`] when the archive is missing.
    pub async fn paper_content(&self, paper_id: &str) -> Result<String, StoreError> {
        let path = self.dir.join(format!("{paper_id}.txt"));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Increments a named stat counter and persists the stats file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn increment_stat(&self, name: &str, amount: i64) -> Result<(), StoreError> {
        let mut stats = self.stats.lock().await;
        *stats.entry(name.to_string()).or_insert(0) += amount;
        self.save_stats(&stats).await
    }

    /// Current value of a stat counter.
    pub async fn stat(&self, name: &str) -> i64 {
        self.stats.lock().await.get(name).copied().unwrap_or(0)
    }

    /// All stat counters.
    pub async fn stats(&self) -> HashMap<String, i64> {
        self.stats.lock().await.clone()
    }

    async fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), StoreError> {
        let path = self.dir.join("session_metadata.json");
        let json = serde_json::to_string_pretty(metadata).map_err(|e| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!("saved session metadata");
        Ok(())
    }

    async fn save_stats(&self, stats: &HashMap<String, i64>) -> Result<(), StoreError> {
        let path = self.dir.join("session_stats.json");
        let json = serde_json::to_string_pretty(stats).map_err(|e| StoreError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
