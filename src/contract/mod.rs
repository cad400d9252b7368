//! JSON contract layer: extraction, multi-strategy repair, schema checks.
//!
//! LLM output should contain exactly one JSON object, possibly wrapped in a
//! fenced code block or followed by stray prose. Extraction finds it; the
//! repair pipeline then tries progressively more invasive fixes until a
//! parser accepts the result:
//!
//! 1. strict parse (return unchanged)
//! 2. malformed-unicode normalization
//! 3. LaTeX escape doubling
//! 4. safe-placeholder rewrite of string literals
//! 5. aggressive per-character escape stripping
//!
//! All stages preserve valid JSON escape sequences
//! (`\"`, `\\`, `\/`, `\b`, `\f`, `\n`, `\r`, `\t`, `\uXXXX`).

pub mod schema;

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ContractError;

/// Which repair stages modified the text before a parse succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStrategy {
    /// Malformed `\u` escapes were normalized.
    pub unicode: bool,
    /// LaTeX delimiters or commands were re-escaped.
    pub latex: bool,
    /// The placeholder rewrite changed string literals.
    pub placeholders: bool,
    /// The aggressive last-resort pass was used.
    pub aggressive: bool,
}

impl RepairStrategy {
    /// Whether any repair was applied at all.
    #[must_use]
    pub const fn repaired(&self) -> bool {
        self.unicode || self.latex || self.placeholders || self.aggressive
    }
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.aggressive {
            return f.write_str("aggressive");
        }
        let mut parts = Vec::new();
        if self.unicode {
            parts.push("unicode");
        }
        if self.latex {
            parts.push("latex");
        }
        if self.placeholders {
            parts.push("placeholders");
        }
        if parts.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&parts.join("+"))
        }
    }
}

/// Placeholder tokens substituted for valid escapes during the
/// safe-placeholder rewrite. The `<<<NAME>>>` form contains no backslashes,
/// so the escape-doubling step cannot corrupt protected sequences.
const PLACEHOLDERS: &[(&str, &str)] = &[
    ("DBLSLASH", "\\\\"),
    ("QUOTE", "\\\""),
    ("SLASH", "\\/"),
    ("NEWLINE", "\\n"),
    ("RETURN", "\\r"),
    ("TAB", "\\t"),
    ("BACKSPACE", "\\b"),
    ("FORMFEED", "\\f"),
    ("LPAREN", "\\\\("),
    ("RPAREN", "\\\\)"),
    ("LBRACK", "\\\\["),
    ("RBRACK", "\\\\]"),
    ("LBRACE", "\\\\{"),
    ("RBRACE", "\\\\}"),
];

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap()
    })
}

fn raw_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?s)\{.*\}").unwrap()
    })
}

fn raw_array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?s)\[.*\]").unwrap()
    })
}

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap()
    })
}

/// Extracts the JSON text from raw LLM output.
///
/// Prefers a fenced ```` ```json ```` block; otherwise takes the first
/// `{`-to-last-`}` span, falling back to a bare array span.
///
/// # Errors
///
/// Returns [`ContractError::NoJsonFound`] when neither is present.
pub fn extract_json(llm_output: &str) -> Result<&str, ContractError> {
    if let Some(caps) = fenced_block_re().captures(llm_output)
        && let Some(m) = caps.get(1)
    {
        return Ok(m.as_str());
    }
    raw_object_re()
        .find(llm_output)
        .or_else(|| raw_array_re().find(llm_output))
        .map(|m| m.as_str())
        .ok_or(ContractError::NoJsonFound)
}

/// Stage 2: fix malformed `\u` escape sequences.
///
/// Five-plus hex digits keep the first four and literalize the tail
/// (`\u20101` → `\u2010` + `1`); one-to-three hex digits escape the
/// backslash (`\u12` → `\\u12`).
fn fix_malformed_unicode(text: &str) -> (String, bool) {
    static LONG_RE: OnceLock<Regex> = OnceLock::new();
    static SHORT_RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let long_re = LONG_RE.get_or_init(|| Regex::new(r"\\u([0-9a-fA-F]{5,})").unwrap());
    #[allow(clippy::unwrap_used)]
    let short_re = SHORT_RE.get_or_init(|| Regex::new(r"\\u([0-9a-fA-F]{1,4})").unwrap());

    let mut modified = false;

    let fixed = long_re.replace_all(text, |caps: &regex::Captures<'_>| {
        modified = true;
        let hex = &caps[1];
        format!("\\u{}{}", &hex[..4], &hex[4..])
    });

    // The long-form pass left at most four hex digits after any `\u`; a
    // maximal match shorter than four is an incomplete escape.
    let fixed = short_re.replace_all(&fixed, |caps: &regex::Captures<'_>| {
        let hex = &caps[1];
        if hex.len() == 4 {
            caps[0].to_string()
        } else {
            modified = true;
            format!("\\\\u{hex}")
        }
    });

    (fixed.into_owned(), modified)
}

/// Stage 3: escape LaTeX notation to valid JSON.
///
/// Delimiters (`\(`, `\)`, `\[`, `\]`, `\{`, `\}`) and commands (`\word`,
/// `\word{`) are doubled, skipping valid `\uXXXX` escapes and sequences
/// whose backslash is already escaped.
fn escape_latex_notation(text: &str) -> (String, bool) {
    static CMD_RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let cmd_re = CMD_RE.get_or_init(|| Regex::new(r"\\([a-zA-Z]+\{?)").unwrap());

    let mut modified = false;
    let mut text = text.to_string();

    for delim in ["\\(", "\\)", "\\[", "\\]", "\\{", "\\}"] {
        if text.contains(delim) {
            text = text.replace(delim, &format!("\\{delim}"));
            modified = true;
        }
    }

    let snapshot = text.clone();
    let replaced = cmd_re.replace_all(&snapshot, |caps: &regex::Captures<'_>| {
        let whole = &caps[0];
        let command = &caps[1];

        // A valid unicode escape body is 'u' plus four hex digits.
        if command.len() == 5
            && command.starts_with('u')
            && command[1..].chars().all(|c| c.is_ascii_hexdigit())
        {
            return whole.to_string();
        }

        // Skip when the backslash is itself escaped.
        let start = caps.get(0).map_or(0, |m| m.start());
        if start > 0 && snapshot.as_bytes()[start - 1] == b'\\' {
            return whole.to_string();
        }

        modified = true;
        format!("\\{whole}")
    });

    (replaced.into_owned(), modified)
}

/// Stage 4: rewrite string literals through safe placeholder tokens.
///
/// Valid escapes become `<<<NAME>>>` tokens, any surviving raw backslash is
/// doubled, then the tokens are restored.
fn rewrite_with_placeholders(json_str: &str) -> (String, bool) {
    static UNICODE_RE: OnceLock<Regex> = OnceLock::new();
    static UNICODE_RESTORE_RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    let unicode_re = UNICODE_RE.get_or_init(|| Regex::new(r"\\u([0-9a-fA-F]{4})").unwrap());
    #[allow(clippy::unwrap_used)]
    let unicode_restore_re =
        UNICODE_RESTORE_RE.get_or_init(|| Regex::new(r"<<<UNICODE([0-9a-fA-F]{4})>>>").unwrap());

    let mut modified = false;

    let result = string_literal_re().replace_all(json_str, |caps: &regex::Captures<'_>| {
        let content = &caps[1];
        let mut temp = content.to_string();

        for (name, escape) in PLACEHOLDERS.iter().take(8) {
            temp = temp.replace(escape, &format!("<<<{name}>>>"));
        }
        temp = unicode_re
            .replace_all(&temp, "<<<UNICODE$1>>>")
            .into_owned();
        for (name, escape) in PLACEHOLDERS.iter().skip(8) {
            temp = temp.replace(escape, &format!("<<<{name}>>>"));
        }

        if temp.contains('\\') {
            temp = temp.replace('\\', "\\\\");
            modified = true;
        }

        for (name, escape) in PLACEHOLDERS {
            temp = temp.replace(&format!("<<<{name}>>>"), escape);
        }
        temp = unicode_restore_re.replace_all(&temp, "\\u$1").into_owned();

        if temp != content {
            modified = true;
        }
        format!("\"{temp}\"")
    });

    (result.into_owned(), modified)
}

/// Stage 5: aggressive last-resort repair.
///
/// Walks each string literal keeping only backslash sequences that form a
/// recognized JSON escape; every other backslash is dropped. May lose
/// information but produces parseable output.
fn repair_aggressive(json_str: &str) -> String {
    string_literal_re()
        .replace_all(json_str, |caps: &regex::Captures<'_>| {
            let content = &caps[1];
            let bytes: Vec<char> = content.chars().collect();
            let mut result = String::with_capacity(content.len());
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i] == '\\' && i + 1 < bytes.len() {
                    let next = bytes[i + 1];
                    if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') {
                        result.push('\\');
                        result.push(next);
                        i += 2;
                    } else if next == 'u' && i + 5 < bytes.len() {
                        let hex: String = bytes[i + 2..i + 6].iter().collect();
                        if hex.chars().all(|c| c.is_ascii_hexdigit()) {
                            result.push_str("\\u");
                            result.push_str(&hex);
                            i += 6;
                        } else {
                            i += 1;
                        }
                    } else {
                        i += 1;
                    }
                } else {
                    result.push(bytes[i]);
                    i += 1;
                }
            }
            format!("\"{result}\"")
        })
        .into_owned()
}

/// Runs the repair pipeline over extracted JSON text.
///
/// Valid input passes through unchanged (the pipeline is idempotent on
/// already-valid JSON).
///
/// # Errors
///
/// Returns [`ContractError::Parse`] naming the last stage attempted when no
/// strategy yields parseable JSON.
pub fn repair_and_parse(json_str: &str) -> Result<(Value, RepairStrategy), ContractError> {
    if let Ok(value) = serde_json::from_str::<Value>(json_str) {
        return Ok((value, RepairStrategy::default()));
    }

    let (result, unicode) = fix_malformed_unicode(json_str);
    let (result, latex) = escape_latex_notation(&result);
    let (result, placeholders) = rewrite_with_placeholders(&result);

    let strategy = RepairStrategy {
        unicode,
        latex,
        placeholders,
        aggressive: false,
    };

    match serde_json::from_str::<Value>(&result) {
        Ok(value) => {
            debug!(strategy = %strategy, "JSON repair succeeded");
            return Ok((value, strategy));
        }
        Err(staged_err) => {
            warn!(
                strategy = %strategy,
                error = %staged_err,
                "standard repair strategies failed, attempting aggressive mode"
            );
        }
    }

    let aggressive = repair_aggressive(json_str);
    match serde_json::from_str::<Value>(&aggressive) {
        Ok(value) => {
            debug!("JSON repair succeeded using aggressive strategy");
            Ok((
                value,
                RepairStrategy {
                    aggressive: true,
                    ..RepairStrategy::default()
                },
            ))
        }
        Err(e) => Err(ContractError::Parse {
            stage: "aggressive".to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Extracts and parses the JSON object in raw LLM output.
///
/// An array where an object was expected is accepted by taking its first
/// element with a logged warning.
///
/// # Errors
///
/// Returns [`ContractError::NoJsonFound`] or [`ContractError::Parse`].
pub fn parse_llm_json(llm_output: &str) -> Result<(Value, RepairStrategy), ContractError> {
    let json_str = extract_json(llm_output)?;
    let (value, strategy) = repair_and_parse(json_str)?;

    let value = match value {
        Value::Array(mut items) if !items.is_empty() => {
            warn!("LLM returned a JSON array where an object was expected; taking first element");
            items.remove(0)
        }
        other => other,
    };

    Ok((value, strategy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_block() {
        let output = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json(output).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_raw_object_with_prose() {
        let output = "Sure. {\"a\": 1} Hope that helps!";
        assert_eq!(extract_json(output).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_none() {
        assert!(matches!(
            extract_json("no json here"),
            Err(ContractError::NoJsonFound)
        ));
    }

    #[test]
    fn test_repair_valid_json_unchanged() {
        let input = r#"{"a": "line\nbreak", "b": 2}"#;
        let (value, strategy) = repair_and_parse(input).unwrap();
        assert!(!strategy.repaired());
        assert_eq!(value["b"], 2);
        // Idempotence: repairing valid JSON parses to the same value
        let direct: Value = serde_json::from_str(input).unwrap();
        assert_eq!(value, direct);
    }

    #[test]
    fn test_repair_long_unicode() {
        // \u20101 = five hex digits: keep \u2010, literalize the trailing 1
        let input = "{\"a\": \"x\\u20101y\"}";
        let (value, strategy) = repair_and_parse(input).unwrap();
        assert!(strategy.unicode || strategy.placeholders || !strategy.repaired());
        let s = value["a"].as_str().unwrap();
        assert!(s.contains('\u{2010}'));
        assert!(s.contains('1'));
    }

    #[test]
    fn test_repair_short_unicode() {
        let input = "{\"a\": \"bad \\u12 escape\"}";
        let (value, _) = repair_and_parse(input).unwrap();
        assert!(value["a"].as_str().unwrap().contains("u12"));
    }

    #[test]
    fn test_repair_latex_delimiters() {
        let input = "{\"eq\": \"\\(x^2\\)\"}";
        let (value, strategy) = repair_and_parse(input).unwrap();
        assert!(strategy.repaired());
        assert_eq!(value["eq"].as_str().unwrap(), "\\(x^2\\)");
    }

    #[test]
    fn test_repair_latex_command() {
        let input = "{\"eq\": \"\\Delta t and \\mathcal{H}\"}";
        let (value, strategy) = repair_and_parse(input).unwrap();
        assert!(strategy.repaired());
        let s = value["eq"].as_str().unwrap();
        assert!(s.contains("\\Delta"));
        assert!(s.contains("\\mathcal{H}"));
    }

    #[test]
    fn test_repair_windows_path() {
        // \p and \t-followed-by-letters are LaTeX-command-shaped; they get
        // doubled and survive as literal backslashes.
        let input = "{\"a\": \"C:\\path\\to\"}";
        let (value, strategy) = repair_and_parse(input).unwrap();
        assert!(strategy.repaired());
        assert_eq!(value["a"].as_str().unwrap(), "C:\\path\\to");
    }

    #[test]
    fn test_repair_mixed_invalid_escapes() {
        // Once repair runs, command-shaped sequences (here `\n` before a
        // space) are literalized by the LaTeX stage; escaped quotes survive
        // and the bare `\9` backslash is doubled by the placeholder stage.
        let input = "{\"a\": \"line\\n break \\\"q\\\" and \\9\"}";
        let (value, strategy) = repair_and_parse(input).unwrap();
        assert!(strategy.repaired());
        let s = value["a"].as_str().unwrap();
        assert!(s.contains("line\\n break"));
        assert!(s.contains("\"q\""));
        assert!(s.contains("\\9"));
    }

    #[test]
    fn test_aggressive_strips_invalid_escape() {
        let repaired = repair_aggressive("{\"a\": \"bad \\9 and \\q here\"}");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"].as_str().unwrap(), "bad 9 and q here");
    }

    #[test]
    fn test_aggressive_keeps_valid_escapes() {
        let repaired = repair_aggressive("{\"a\": \"ok \\n \\\"x\\\" \\u0041\"}");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"].as_str().unwrap(), "ok \n \"x\" A");
    }

    #[test]
    fn test_parse_llm_json_fenced() {
        let output = "```json\n{\"decision\": \"accept\"}\n```";
        let (value, _) = parse_llm_json(output).unwrap();
        assert_eq!(value["decision"], "accept");
    }

    #[test]
    fn test_parse_llm_json_array_takes_first() {
        let output = "[{\"decision\": \"reject\"}, {\"decision\": \"accept\"}]";
        let (value, _) = parse_llm_json(output).unwrap();
        assert_eq!(value["decision"], "reject");
    }

    #[test]
    fn test_parse_llm_json_all_stages_fail() {
        let result = parse_llm_json("{\"a\": }");
        assert!(matches!(result, Err(ContractError::Parse { .. })));
        if let Err(ContractError::Parse { stage, .. }) = result {
            assert_eq!(stage, "aggressive");
        }
    }

    #[test]
    fn test_strategy_display() {
        let s = RepairStrategy {
            unicode: true,
            latex: true,
            placeholders: false,
            aggressive: false,
        };
        assert_eq!(s.to_string(), "unicode+latex");
        assert_eq!(RepairStrategy::default().to_string(), "none");
        let s = RepairStrategy {
            aggressive: true,
            ..RepairStrategy::default()
        };
        assert_eq!(s.to_string(), "aggressive");
    }
}
