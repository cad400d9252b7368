//! Paper memory: the compiler's paper stream with anchor and placeholder
//! discipline.
//!
//! Every non-empty paper ends with exactly one `PAPER_ANCHOR`; duplicates
//! are stripped on every write. The three section placeholders frame the
//! body when the first body portion is accepted, and each is replaced
//! exactly once when its section is written. `ensure_markers_intact()` runs
//! before every string-match edit and reconstructs missing markers without
//! duplicating existing ones.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::RechunkHook;
use crate::error::StoreError;

/// End-of-paper sentinel; always the last line when the paper is non-empty.
pub const PAPER_ANCHOR: &str =
    "[HARD CODED END-OF-PAPER MARK -- ALL CONTENT SHOULD BE ABOVE THIS LINE]";
/// Placeholder for the abstract section, written last.
pub const ABSTRACT_PLACEHOLDER: &str =
    "[HARD CODED PLACEHOLDER FOR THE ABSTRACT SECTION - TO BE WRITTEN AFTER THE INTRODUCTION IS COMPLETE]";
/// Placeholder for the introduction section.
pub const INTRO_PLACEHOLDER: &str =
    "[HARD CODED PLACEHOLDER FOR INTRODUCTION SECTION - TO BE WRITTEN AFTER THE CONCLUSION SECTION IS COMPLETE]";
/// Placeholder for the conclusion section.
pub const CONCLUSION_PLACEHOLDER: &str =
    "[HARD CODED PLACEHOLDER FOR THE CONCLUSION SECTION - TO BE WRITTEN AFTER THE BODY SECTION IS COMPLETE]";

/// Substrings marking model-invented placeholder text as fake content.
const FAKE_PLACEHOLDER_INDICATORS: [&str; 4] = [
    "will be replaced",
    "to be written",
    "placeholder",
    "this placeholder",
];

fn abstract_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?im)^Abstract\s*$").unwrap()
    })
}

fn intro_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?im)^I\.?\s+Introduction|^Introduction\s*$").unwrap()
    })
}

fn conclusion_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?im)^(?:[IVXLCDM]+\.?\s+)?Conclusion\s*$|^\d+\.?\s+Conclusion\s*$").unwrap()
    })
}

/// An archived body version, kept after a total rewrite.
#[derive(Debug, Clone)]
pub struct PaperVersion {
    /// Version number at archival time.
    pub version: u64,
    /// Paper title for this version.
    pub title: String,
    /// Body content.
    pub body: String,
    /// The critique feedback that triggered the rewrite.
    pub critique_feedback: String,
}

#[derive(Debug, Default)]
struct Inner {
    version: u64,
    previous_versions: Vec<PaperVersion>,
}

/// The paper store.
pub struct PaperMemory {
    path: PathBuf,
    session_dir: PathBuf,
    inner: Mutex<Inner>,
    hook: std::sync::RwLock<Option<RechunkHook>>,
}

impl PaperMemory {
    /// Opens (or creates) the paper file inside `session_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the file cannot be created.
    pub async fn open(session_dir: &Path) -> Result<Self, StoreError> {
        let path = session_dir.join("compiler_paper.txt");
        tokio::fs::create_dir_all(session_dir)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if !path.exists() {
            tokio::fs::write(&path, "")
                .await
                .map_err(|e| StoreError::WriteFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(Self {
            path,
            session_dir: session_dir.to_path_buf(),
            inner: Mutex::new(Inner::default()),
            hook: std::sync::RwLock::new(None),
        })
    }

    /// Registers the re-chunk hook fired after paper writes.
    pub fn set_rechunk_hook(&self, hook: RechunkHook) {
        if let Ok(mut slot) = self.hook.write() {
            *slot = Some(hook);
        }
    }

    /// Current paper content.
    pub async fn get_paper(&self) -> Result<String, StoreError> {
        let _guard = self.inner.lock().await;
        self.read_paper().await
    }

    /// Whether the paper is empty.
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.get_paper().await?.trim().is_empty())
    }

    /// Current paper word count.
    pub async fn word_count(&self) -> Result<usize, StoreError> {
        Ok(self.get_paper().await?.split_whitespace().count())
    }

    /// Current version counter.
    pub async fn version(&self) -> u64 {
        self.inner.lock().await.version
    }

    /// Replaces the paper, enforcing the single-anchor discipline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn update_paper(&self, new_paper: &str) -> Result<(), StoreError> {
        let final_content = {
            let mut inner = self.inner.lock().await;
            let cleaned = strip_anchors(new_paper);
            let final_content = ensure_anchor(&cleaned);
            self.write_paper(&final_content).await?;
            inner.version += 1;
            info!(
                version = inner.version,
                words = final_content.split_whitespace().count(),
                "paper updated"
            );
            final_content
        };
        self.fire_hook(final_content).await;
        Ok(())
    }

    /// Initializes the paper with the first accepted body portion framed by
    /// all three section placeholders and the anchor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn initialize_with_placeholders(
        &self,
        first_body_content: &str,
    ) -> Result<(), StoreError> {
        let paper = format!(
            "{ABSTRACT_PLACEHOLDER}\n\n{INTRO_PLACEHOLDER}\n\n{first_body_content}\n\n{CONCLUSION_PLACEHOLDER}\n\n{PAPER_ANCHOR}"
        );
        let final_content = {
            let mut inner = self.inner.lock().await;
            self.write_paper(&paper).await?;
            inner.version += 1;
            info!(version = inner.version, "paper initialized with placeholders");
            paper
        };
        self.fire_hook(final_content).await;
        Ok(())
    }

    /// Replaces a placeholder with validated section content, exactly once.
    ///
    /// Returns `false` when the placeholder is not present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn replace_placeholder(
        &self,
        placeholder: &str,
        content: &str,
    ) -> Result<bool, StoreError> {
        let final_content = {
            let mut inner = self.inner.lock().await;
            let paper = self.read_paper().await?;
            if !paper.contains(placeholder) {
                warn!(
                    placeholder = &placeholder[..placeholder.len().min(50)],
                    "placeholder not found in paper"
                );
                return Ok(false);
            }
            let new_paper = paper.replacen(placeholder, content, 1);
            self.write_paper(&new_paper).await?;
            inner.version += 1;
            info!(version = inner.version, "placeholder replaced");
            new_paper
        };
        self.fire_hook(final_content).await;
        Ok(true)
    }

    /// Clears the body section while preserving placeholders and anchor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the save fails.
    pub async fn clear_body_section(&self) -> Result<(), StoreError> {
        let final_content = {
            let mut inner = self.inner.lock().await;
            let paper = self.read_paper().await?;
            if paper.trim().is_empty() {
                warn!("cannot clear body: paper is empty");
                return Ok(());
            }

            let kept: Vec<&str> = paper
                .lines()
                .filter(|line| {
                    line.contains(ABSTRACT_PLACEHOLDER)
                        || line.contains(INTRO_PLACEHOLDER)
                        || line.contains(CONCLUSION_PLACEHOLDER)
                        || line.contains(PAPER_ANCHOR)
                })
                .collect();
            let new_paper = ensure_anchor(&strip_anchors(&kept.join("\n\n")));
            self.write_paper(&new_paper).await?;
            inner.version += 1;
            info!(version = inner.version, "cleared body section");
            new_paper
        };
        self.fire_hook(final_content).await;
        Ok(())
    }

    /// Archives a body version to `paper_version_{N}.txt` before a rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the archive save fails.
    pub async fn store_previous_version(
        &self,
        title: &str,
        body: &str,
        critique_feedback: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let version = inner.version;
        inner.previous_versions.push(PaperVersion {
            version,
            title: title.to_string(),
            body: body.to_string(),
            critique_feedback: critique_feedback.to_string(),
        });

        let sep = "=".repeat(80);
        let archive = format!(
            "VERSION {version}: {title}\n{sep}\n\nBODY SECTION:\n{body}\n\n{sep}\n\nCRITIQUE FEEDBACK THAT TRIGGERED REWRITE:\n{critique_feedback}\n"
        );
        let archive_path = self.session_dir.join(format!("paper_version_{version}.txt"));
        tokio::fs::write(&archive_path, archive)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: archive_path.display().to_string(),
                reason: e.to_string(),
            })?;
        info!(version, "stored previous paper version");
        Ok(version)
    }

    /// Archived body versions.
    pub async fn previous_versions(&self) -> Vec<PaperVersion> {
        self.inner.lock().await.previous_versions.clone()
    }

    /// Checks all required markers and reconstructs any missing ones
    /// without duplicating existing markers or inventing placeholders for
    /// sections that already have real content.
    ///
    /// Returns whether a repair was performed. Calling it again right after
    /// a repair reports "no repair needed".
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] when the repair save fails.
    pub async fn ensure_markers_intact(&self) -> Result<bool, StoreError> {
        let final_content = {
            let mut inner = self.inner.lock().await;
            let paper = self.read_paper().await?;
            if paper.trim().is_empty() {
                return Ok(false);
            }

            let has_abstract = paper.contains(ABSTRACT_PLACEHOLDER)
                || has_real_section_content(abstract_header_re(), &paper);
            let has_intro = paper.contains(INTRO_PLACEHOLDER)
                || has_real_section_content(intro_header_re(), &paper);
            let has_conclusion = paper.contains(CONCLUSION_PLACEHOLDER)
                || has_real_section_content(conclusion_header_re(), &paper);
            let has_anchor = paper.contains(PAPER_ANCHOR);

            if has_abstract && has_intro && has_conclusion && has_anchor {
                return Ok(false);
            }

            // Extract body content: everything that is not a marker line.
            let body_lines: Vec<&str> = paper
                .lines()
                .filter(|line| {
                    !line.contains(ABSTRACT_PLACEHOLDER)
                        && !line.contains(INTRO_PLACEHOLDER)
                        && !line.contains(CONCLUSION_PLACEHOLDER)
                        && !line.contains(PAPER_ANCHOR)
                })
                .collect();
            let body = body_lines.join("\n").trim().to_string();

            if body.is_empty() {
                if has_anchor {
                    return Ok(false);
                }
                self.write_paper(PAPER_ANCHOR).await?;
                inner.version += 1;
                return Ok(true);
            }

            // A placeholder is reinstated only for sections not yet written,
            // so repair never shadows real content.
            let abstract_written = has_real_section_content(abstract_header_re(), &paper);
            let intro_written = has_real_section_content(intro_header_re(), &paper);
            let conclusion_written = has_real_section_content(conclusion_header_re(), &paper);

            let mut parts: Vec<&str> = Vec::new();
            if !abstract_written {
                parts.push(ABSTRACT_PLACEHOLDER);
            }
            if !intro_written {
                parts.push(INTRO_PLACEHOLDER);
            }
            parts.push(&body);
            if !conclusion_written {
                parts.push(CONCLUSION_PLACEHOLDER);
            }
            parts.push(PAPER_ANCHOR);

            let new_paper = parts.join("\n\n");
            self.write_paper(&new_paper).await?;
            inner.version += 1;
            info!(version = inner.version, "repaired missing paper markers");
            new_paper
        };
        self.fire_hook(final_content).await;
        Ok(true)
    }

    async fn read_paper(&self) -> Result<String, StoreError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::ReadFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_paper(&self, content: &str) -> Result<(), StoreError> {
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| StoreError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(chars = content.len(), "paper written");
        Ok(())
    }

    async fn fire_hook(&self, content: String) {
        let hook = self.hook.read().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(content).await;
        }
    }
}

impl std::fmt::Debug for PaperMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperMemory")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Removes every anchor occurrence.
fn strip_anchors(content: &str) -> String {
    content.replace(PAPER_ANCHOR, "").trim().to_string()
}

/// Appends a single anchor to non-empty content.
fn ensure_anchor(content: &str) -> String {
    let trimmed = content.trim_end();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with(PAPER_ANCHOR) {
        return trimmed.to_string();
    }
    format!("{trimmed}\n\n{PAPER_ANCHOR}")
}

/// Whether a section header is followed by REAL content rather than
/// model-invented placeholder text.
///
/// Best-effort detector: content longer than 300 chars after the header is
/// always real; shorter content containing placeholder keywords is fake;
/// otherwise anything over 50 chars counts as real. Callers must not depend
/// on these thresholds for correctness.
fn has_real_section_content(header_re: &Regex, paper: &str) -> bool {
    let Some(m) = header_re.find(paper) else {
        return false;
    };

    let after = paper[m.end()..].trim();
    let sample = char_safe_head(after, 300).trim();

    let sample_lower = sample.to_lowercase();
    let has_placeholder_keywords = FAKE_PLACEHOLDER_INDICATORS
        .iter()
        .any(|phrase| sample_lower.contains(phrase));

    if after.len() > 300 {
        true
    } else if has_placeholder_keywords {
        false
    } else {
        sample.len() > 50
    }
}

/// The first `max_bytes` of `s`, adjusted back to a char boundary.
fn char_safe_head(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> PaperMemory {
        PaperMemory::open(dir.path()).await.unwrap()
    }

    fn anchor_count(text: &str) -> usize {
        text.matches(PAPER_ANCHOR).count()
    }

    #[tokio::test]
    async fn test_update_single_anchor() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        paper
            .update_paper(&format!("Body text.\n{PAPER_ANCHOR}\nMore.\n{PAPER_ANCHOR}"))
            .await
            .unwrap();
        let content = paper.get_paper().await.unwrap();
        assert_eq!(anchor_count(&content), 1);
        assert!(content.ends_with(PAPER_ANCHOR));
    }

    #[tokio::test]
    async fn test_initialize_with_placeholders() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        paper
            .initialize_with_placeholders("First body portion with results.")
            .await
            .unwrap();
        let content = paper.get_paper().await.unwrap();
        assert_eq!(content.matches(ABSTRACT_PLACEHOLDER).count(), 1);
        assert_eq!(content.matches(INTRO_PLACEHOLDER).count(), 1);
        assert_eq!(content.matches(CONCLUSION_PLACEHOLDER).count(), 1);
        assert_eq!(anchor_count(&content), 1);
        assert!(content.contains("First body portion"));
        assert_eq!(paper.version().await, 1);
    }

    #[tokio::test]
    async fn test_replace_placeholder_exactly_once() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        paper.initialize_with_placeholders("Body.").await.unwrap();

        assert!(
            paper
                .replace_placeholder(CONCLUSION_PLACEHOLDER, "Conclusion\nWe conclude things.")
                .await
                .unwrap()
        );
        let content = paper.get_paper().await.unwrap();
        assert!(!content.contains(CONCLUSION_PLACEHOLDER));
        assert!(content.contains("We conclude things."));

        // A second replacement of the same placeholder is a no-op.
        assert!(
            !paper
                .replace_placeholder(CONCLUSION_PLACEHOLDER, "again")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_clear_body_preserves_markers() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        paper
            .initialize_with_placeholders("Long body that failed critique.")
            .await
            .unwrap();
        paper.clear_body_section().await.unwrap();
        let content = paper.get_paper().await.unwrap();
        assert!(!content.contains("failed critique"));
        assert!(content.contains(ABSTRACT_PLACEHOLDER));
        assert!(content.contains(INTRO_PLACEHOLDER));
        assert!(content.contains(CONCLUSION_PLACEHOLDER));
        assert_eq!(anchor_count(&content), 1);
    }

    #[tokio::test]
    async fn test_store_previous_version_archives() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        paper.update_paper("v1 body").await.unwrap();
        let version = paper
            .store_previous_version("Entropy Bounds", "v1 body", "too shallow")
            .await
            .unwrap();
        let archive = tokio::fs::read_to_string(dir.path().join(format!(
            "paper_version_{version}.txt"
        )))
        .await
        .unwrap();
        assert!(archive.contains("VERSION"));
        assert!(archive.contains("Entropy Bounds"));
        assert!(archive.contains("too shallow"));
        assert_eq!(paper.previous_versions().await.len(), 1);
    }

    #[test]
    fn test_detector_real_long_content() {
        let prose = "x".repeat(400);
        let paper = format!("Abstract\n{prose}");
        assert!(has_real_section_content(abstract_header_re(), &paper));
    }

    #[test]
    fn test_detector_fake_placeholder_text() {
        let paper = "Abstract\nThis placeholder will be replaced with the abstract later.";
        assert!(!has_real_section_content(abstract_header_re(), paper));
    }

    #[test]
    fn test_detector_short_real_content() {
        let paper = "Abstract\nA concise abstract of sixty characters or thereabouts here.";
        assert!(has_real_section_content(abstract_header_re(), paper));
    }

    #[test]
    fn test_detector_no_header() {
        assert!(!has_real_section_content(abstract_header_re(), "no sections at all"));
    }

    #[test]
    fn test_detector_conclusion_variants() {
        let long = "y".repeat(400);
        for header in ["Conclusion", "IV. Conclusion", "7. Conclusion"] {
            let paper = format!("body\n{header}\n{long}");
            assert!(
                has_real_section_content(conclusion_header_re(), &paper),
                "header {header} not detected"
            );
        }
    }

    #[tokio::test]
    async fn test_ensure_markers_repairs_bare_body() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        tokio::fs::write(
            dir.path().join("compiler_paper.txt"),
            "Just body prose without any markers at all.",
        )
        .await
        .unwrap();

        assert!(paper.ensure_markers_intact().await.unwrap());
        let content = paper.get_paper().await.unwrap();
        assert_eq!(content.matches(ABSTRACT_PLACEHOLDER).count(), 1);
        assert_eq!(content.matches(INTRO_PLACEHOLDER).count(), 1);
        assert_eq!(content.matches(CONCLUSION_PLACEHOLDER).count(), 1);
        assert_eq!(anchor_count(&content), 1);
        assert!(content.contains("Just body prose"));

        // Fixed point: a second call reports no repair needed.
        assert!(!paper.ensure_markers_intact().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_markers_keeps_written_sections() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        let conclusion = "z".repeat(400);
        tokio::fs::write(
            dir.path().join("compiler_paper.txt"),
            format!("Body prose here.\n\nConclusion\n{conclusion}"),
        )
        .await
        .unwrap();

        assert!(paper.ensure_markers_intact().await.unwrap());
        let content = paper.get_paper().await.unwrap();
        // Conclusion has real content: no conclusion placeholder invented.
        assert!(!content.contains(CONCLUSION_PLACEHOLDER));
        assert!(content.contains(ABSTRACT_PLACEHOLDER));
        assert!(content.contains(INTRO_PLACEHOLDER));
        assert!(!paper.ensure_markers_intact().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_markers_intact_noop_when_complete() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        paper.initialize_with_placeholders("Body.").await.unwrap();
        assert!(!paper.ensure_markers_intact().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_markers_empty_paper() {
        let dir = TempDir::new().unwrap();
        let paper = open(&dir).await;
        assert!(!paper.ensure_markers_intact().await.unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// For any body prose plus subset of markers, one repair pass is a
        /// fixed point: the second call reports "no repair needed".
        #[test]
        fn prop_marker_repair_fixed_point(
            with_abstract in any::<bool>(),
            with_intro in any::<bool>(),
            with_conclusion in any::<bool>(),
            with_anchor in any::<bool>(),
            body in "[A-Za-z ,.]{20,200}",
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            rt.block_on(async {
                let dir = TempDir::new().map_err(|e| TestCaseError::fail(e.to_string()))?;
                let paper = PaperMemory::open(dir.path())
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;

                let mut parts = Vec::new();
                if with_abstract {
                    parts.push(ABSTRACT_PLACEHOLDER.to_string());
                }
                if with_intro {
                    parts.push(INTRO_PLACEHOLDER.to_string());
                }
                parts.push(body.clone());
                if with_conclusion {
                    parts.push(CONCLUSION_PLACEHOLDER.to_string());
                }
                if with_anchor {
                    parts.push(PAPER_ANCHOR.to_string());
                }
                tokio::fs::write(dir.path().join("compiler_paper.txt"), parts.join("\n\n"))
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;

                paper
                    .ensure_markers_intact()
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let repaired_again = paper
                    .ensure_markers_intact()
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert!(!repaired_again, "repair was not a fixed point");

                let content = paper
                    .get_paper()
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(content.matches(PAPER_ANCHOR).count(), 1);
                prop_assert!(content.matches(ABSTRACT_PLACEHOLDER).count() <= 1);
                prop_assert!(content.matches(INTRO_PLACEHOLDER).count() <= 1);
                prop_assert!(content.matches(CONCLUSION_PLACEHOLDER).count() <= 1);
                Ok(())
            })?;
        }
    }
}
