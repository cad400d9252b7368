//! Text normalization for document ingestion.
//!
//! Documents pass through here once before chunking so every size class
//! sees identical text: NFC unicode, LF line endings, standardized
//! quotes/dashes, collapsed intra-line whitespace with paragraph breaks
//! preserved.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

fn zero_width_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new("[\u{200b}\u{200c}\u{200d}\u{feff}]").unwrap()
    })
}

fn multi_newline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\n{3,}").unwrap()
    })
}

fn intra_line_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"[ \t]+").unwrap()
    })
}

/// Normalizes text for consistent chunking and indexing.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text: String = text.nfc().collect();
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let text = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{2013}', '\u{2014}'], "-");

    let text = zero_width_re().replace_all(&text, "");

    let lines: Vec<String> = text
        .split('\n')
        .map(|line| intra_line_space_re().replace_all(line, " ").trim().to_string())
        .collect();
    let text = lines.join("\n");

    multi_newline_re()
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_crlf_to_lf() {
        assert_eq!(normalize_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_smart_quotes_and_dashes() {
        assert_eq!(
            normalize_text("\u{201c}hi\u{201d} \u{2018}yo\u{2019} a\u{2013}b c\u{2014}d"),
            "\"hi\" 'yo' a-b c-d"
        );
    }

    #[test]
    fn test_collapses_spaces_preserves_paragraphs() {
        let input = "one   two\t three\n\n\n\nnext  paragraph";
        assert_eq!(normalize_text(input), "one two three\n\nnext paragraph");
    }

    #[test]
    fn test_strips_zero_width() {
        assert_eq!(normalize_text("a\u{200b}b\u{feff}c"), "abc");
    }

    #[test]
    fn test_nfc_normalization() {
        // e + combining acute composes to é
        let decomposed = "cafe\u{0301}";
        assert_eq!(normalize_text(decomposed), "café");
    }

    #[test]
    fn test_trims_edges() {
        assert_eq!(normalize_text("  \n hello \n  "), "hello");
    }
}
