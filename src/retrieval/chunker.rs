//! Sentence-boundary-aware chunking at multiple size classes.
//!
//! Each target size accumulates whole sentences up to the size budget with
//! a 20% (configurable) character overlap between consecutive chunks, re-cut
//! at sentence boundaries where possible. The same normalized text is
//! chunked independently at every configured size class.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use super::chunk::{Chunk, ChunkKind, ChunkMetadata};

/// Splits text into sentence runs.
#[must_use]
pub fn split_into_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Chunks `text` at every requested size class.
///
/// Returns a map of size class to chunk list. Embeddings are left empty;
/// the engine fills them in batch at index time.
#[must_use]
pub fn chunk_text(
    text: &str,
    source: &str,
    sizes: &[usize],
    overlap_percentage: f32,
    is_permanent: bool,
) -> HashMap<usize, Vec<Chunk>> {
    let mut result = HashMap::with_capacity(sizes.len());
    for &size in sizes {
        result.insert(
            size,
            chunk_at_size(text, source, size, overlap_percentage, is_permanent),
        );
    }
    result
}

/// Chunks text at a specific size class.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn chunk_at_size(
    text: &str,
    source: &str,
    size: usize,
    overlap_percentage: f32,
    is_permanent: bool,
) -> Vec<Chunk> {
    let overlap = (size as f32 * overlap_percentage) as usize;
    let sentences = split_into_sentences(text);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut position = 0usize;

    for sentence in sentences {
        if !current.is_empty() && current.len() + sentence.len() + 1 > size {
            chunks.push(build_chunk(current.trim(), source, position, size, is_permanent));

            // Carry the tail forward, preferring whole sentences inside
            // the overlap window.
            if overlap > 0 && current.len() > overlap {
                let tail = char_safe_tail(&current, overlap);
                let overlap_sentences = split_into_sentences(tail);
                current = if overlap_sentences.is_empty() {
                    tail.to_string()
                } else {
                    overlap_sentences.join(" ")
                };
            } else {
                current.clear();
            }

            position += 1;
        }

        if current.is_empty() {
            current.push_str(sentence);
        } else {
            current.push(' ');
            current.push_str(sentence);
        }
    }

    if !current.trim().is_empty() {
        chunks.push(build_chunk(current.trim(), source, position, size, is_permanent));
    }

    chunks
}

/// The last `max_bytes` of `s`, adjusted back to a char boundary.
fn char_safe_tail(s: &str, max_bytes: usize) -> &str {
    let mut start = s.len().saturating_sub(max_bytes);
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

fn build_chunk(
    text: &str,
    source: &str,
    position: usize,
    size: usize,
    is_permanent: bool,
) -> Chunk {
    let tokens = text
        .to_lowercase()
        .split_whitespace()
        .map(ToString::to_string)
        .collect();
    Chunk {
        id: Chunk::make_id(source, position, size),
        text: text.to_string(),
        source: source.to_string(),
        position,
        size_class: size,
        embedding: Vec::new(),
        tokens,
        metadata: extract_metadata(text),
        is_permanent,
    }
}

fn sentence_terminator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"[.!?]+").unwrap()
    })
}

/// Extracts chunk metadata: counts plus the detected content kind.
#[must_use]
pub fn extract_metadata(text: &str) -> ChunkMetadata {
    let kind = if is_code_chunk(text) {
        ChunkKind::Code
    } else if is_table_chunk(text) {
        ChunkKind::Table
    } else if is_equation_chunk(text) {
        ChunkKind::Equation
    } else if is_section_header(text) {
        ChunkKind::Section
    } else {
        ChunkKind::Text
    };

    ChunkMetadata {
        char_count: text.len(),
        word_count: text.split_whitespace().count(),
        sentence_count: sentence_terminator_re().split(text).count(),
        kind,
    }
}

fn code_indicator_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"def\s+\w+\s*\(",
            r"class\s+\w+",
            r"function\s+\w+\s*\(",
            r"import\s+\w+",
            r"=>",
            r"\{\s*$",
            r"\}\s*$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn is_code_chunk(text: &str) -> bool {
    let matches = code_indicator_res()
        .iter()
        .filter(|re| re.is_match(text))
        .count();
    matches >= 2
}

fn is_table_chunk(text: &str) -> bool {
    let table_lines = text
        .lines()
        .filter(|line| line.contains('|') || line.contains('\t'))
        .count();
    table_lines >= 3
}

fn equation_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"\$.*\$",
            r"\\\[.*\\\]",
            r"\\begin\{equation\}",
            r"\\frac\{",
            r"\\sum",
            r"\\int",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn is_equation_chunk(text: &str) -> bool {
    equation_res().iter().any(|re| re.is_match(text))
}

fn numbered_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^\d+\.?\s+[A-Z]").unwrap()
    })
}

fn markdown_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^#{1,6}\s+").unwrap()
    })
}

fn is_section_header(text: &str) -> bool {
    if markdown_header_re().is_match(text) {
        return true;
    }
    let has_upper = text.chars().any(char::is_uppercase);
    if text.len() < 100 && has_upper && !text.chars().any(char::is_lowercase) {
        return true;
    }
    text.len() < 100 && numbered_header_re().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(n: usize) -> String {
        format!("This is test sentence number {n} with some padding words.")
    }

    #[test]
    fn test_split_into_sentences() {
        let sentences = split_into_sentences("First one. Second one! Third one?");
        assert_eq!(sentences.len(), 3);
        assert!(sentences[0].starts_with("First"));
    }

    #[test]
    fn test_chunks_respect_size_budget() {
        let text: String = (0..50).map(sentence).collect::<Vec<_>>().join(" ");
        let chunks = chunk_at_size(&text, "doc.txt", 256, 0.20, false);
        assert!(chunks.len() > 1);
        // A chunk may exceed the budget only when a single sentence does.
        for chunk in &chunks {
            assert!(chunk.text.len() <= 256 + sentence(0).len());
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text: String = (0..50).map(sentence).collect::<Vec<_>>().join(" ");
        let chunks = chunk_at_size(&text, "doc.txt", 512, 0.20, false);
        assert!(chunks.len() > 2);
        // The overlap carries tail sentences forward: some words at the end
        // of chunk N reappear at the start of chunk N+1.
        let first_tail: Vec<&str> = chunks[0].text.split_whitespace().rev().take(3).collect();
        assert!(first_tail.iter().any(|w| chunks[1].text.contains(w)));
    }

    #[test]
    fn test_positions_are_sequential() {
        let text: String = (0..30).map(sentence).collect::<Vec<_>>().join(" ");
        let chunks = chunk_at_size(&text, "doc.txt", 256, 0.20, false);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
            assert_eq!(chunk.id, Chunk::make_id("doc.txt", i, 256));
        }
    }

    #[test]
    fn test_chunk_text_all_sizes() {
        let text: String = (0..40).map(sentence).collect::<Vec<_>>().join(" ");
        let by_size = chunk_text(&text, "doc.txt", &[256, 512, 768, 1024], 0.20, true);
        assert_eq!(by_size.len(), 4);
        assert!(by_size[&256].len() >= by_size[&1024].len());
        assert!(by_size[&256].iter().all(|c| c.is_permanent));
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_at_size("One short sentence.", "doc.txt", 512, 0.20, false);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One short sentence.");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_at_size("", "doc.txt", 512, 0.20, false).is_empty());
    }

    #[test]
    fn test_tokens_lowercased() {
        let chunks = chunk_at_size("Hello World AGAIN.", "doc.txt", 512, 0.20, false);
        assert_eq!(chunks[0].tokens, vec!["hello", "world", "again."]);
    }

    #[test]
    fn test_char_safe_tail_multibyte() {
        let s = "αβγδε";
        let tail = char_safe_tail(s, 3);
        assert!(s.ends_with(tail));
        assert!(!tail.is_empty());
    }

    #[test]
    fn test_metadata_kind_detection() {
        assert_eq!(extract_metadata("def foo(x):\n    import os").kind, ChunkKind::Code);
        assert_eq!(
            extract_metadata("| a | b |\n| c | d |\n| e | f |").kind,
            ChunkKind::Table
        );
        assert_eq!(extract_metadata("the sum \\sum_i x_i converges").kind, ChunkKind::Equation);
        assert_eq!(extract_metadata("## Methods").kind, ChunkKind::Section);
        assert_eq!(extract_metadata("Ordinary prose goes here.").kind, ChunkKind::Text);
    }

    #[test]
    fn test_metadata_counts() {
        let meta = extract_metadata("One two. Three four!");
        assert_eq!(meta.word_count, 4);
        assert_eq!(meta.char_count, 20);
    }
}
