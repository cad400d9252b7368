//! Token counting for budget arithmetic.
//!
//! The backend's exact tokenizer is not available client-side, so every
//! budget in the pipeline uses the same 4-characters-per-token
//! approximation. Internal consistency is what matters: packing, allocation,
//! and conversational-retry checks all compare numbers produced here, and
//! the allocator's safety margins absorb the approximation error.

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Approximates the token count of `text`.
///
/// Rounds up so that budget comparisons err on the conservative side.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Approximates the combined token count of several message contents.
#[must_use]
pub fn count_message_tokens<'a, I>(contents: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    contents.into_iter().map(count_tokens).sum()
}

/// Truncates `text` to at most `max_chars` bytes on a char boundary,
/// appending an ellipsis when content was dropped.
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(3);
    let mut end = budget;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_count_tokens_rounds_up() {
        assert_eq!(count_tokens("abc"), 1);
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
    }

    #[test]
    fn test_count_message_tokens() {
        let total = count_message_tokens(["abcd", "efgh"]);
        assert_eq!(total, 2);
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_text() {
        let out = truncate_with_ellipsis("hello world", 8);
        assert_eq!(out, "hello...");
        assert!(out.len() <= 8);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let out = truncate_with_ellipsis("aé€漢字漢字漢字", 9);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 9);
    }
}
