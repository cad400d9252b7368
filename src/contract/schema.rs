//! Schema validation for parsed LLM replies.
//!
//! Field presence and primitive types are checked per consumer; enumerated
//! values reject on mismatch. Optional string fields default to empty, the
//! way the construction contract tolerates omitted edit parameters.

use serde_json::Value;

use crate::error::ContractError;

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Requires a string field.
///
/// # Errors
///
/// Returns [`ContractError::SchemaViolation`] if absent or not a string.
pub fn require_str<'a>(obj: &'a Value, field: &str) -> Result<&'a str, ContractError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: "string".to_string(),
            actual: type_name(other).to_string(),
        }),
        None => Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: "string".to_string(),
            actual: "missing".to_string(),
        }),
    }
}

/// Requires a boolean field.
///
/// # Errors
///
/// Returns [`ContractError::SchemaViolation`] if absent or not a bool.
pub fn require_bool(obj: &Value, field: &str) -> Result<bool, ContractError> {
    match obj.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: "bool".to_string(),
            actual: type_name(other).to_string(),
        }),
        None => Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: "bool".to_string(),
            actual: "missing".to_string(),
        }),
    }
}

/// Requires a string field whose value is one of `allowed`.
///
/// # Errors
///
/// Returns [`ContractError::SchemaViolation`] on absence, wrong type, or a
/// value outside the allowed set.
pub fn require_enum<'a>(
    obj: &'a Value,
    field: &str,
    allowed: &[&str],
) -> Result<&'a str, ContractError> {
    let value = require_str(obj, field)?;
    if allowed.contains(&value) {
        Ok(value)
    } else {
        Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: format!("one of {allowed:?}"),
            actual: format!("\"{value}\""),
        })
    }
}

/// An optional string field defaulting to empty.
///
/// # Errors
///
/// Returns [`ContractError::SchemaViolation`] if present but not a string.
pub fn optional_str(obj: &Value, field: &str) -> Result<String, ContractError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: "string".to_string(),
            actual: type_name(other).to_string(),
        }),
        None => Ok(String::new()),
    }
}

/// An optional boolean field defaulting to `false`.
///
/// # Errors
///
/// Returns [`ContractError::SchemaViolation`] if present but not a bool.
pub fn optional_bool(obj: &Value, field: &str) -> Result<bool, ContractError> {
    match obj.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ContractError::SchemaViolation {
            field: field.to_string(),
            expected: "bool".to_string(),
            actual: type_name(other).to_string(),
        }),
        None => Ok(false),
    }
}

/// Accept/reject decision shared by all validator contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The submission is accepted.
    Accept,
    /// The submission is rejected.
    Reject,
}

impl Decision {
    fn parse(obj: &Value) -> Result<Self, ContractError> {
        match require_enum(obj, "decision", &["accept", "reject"])? {
            "accept" => Ok(Self::Accept),
            _ => Ok(Self::Reject),
        }
    }

    /// Whether this is an accept.
    #[must_use]
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Submitter reply: `{submission, reasoning}` with an optional decline flag.
#[derive(Debug, Clone)]
pub struct SubmissionReply {
    /// The submitted content.
    pub submission: String,
    /// The submitter's reasoning.
    pub reasoning: String,
    /// Whether the submitter declined to add anything new.
    pub is_decline: bool,
}

impl SubmissionReply {
    /// Validates a parsed reply against the submission schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            submission: require_str(obj, "submission")?.to_string(),
            reasoning: require_str(obj, "reasoning")?.to_string(),
            is_decline: optional_bool(obj, "is_decline")?,
        })
    }
}

/// Validator reply: `{decision, reasoning, summary}`.
#[derive(Debug, Clone)]
pub struct ValidationReply {
    /// Accept or reject.
    pub decision: Decision,
    /// Full reasoning.
    pub reasoning: String,
    /// Brief summary for logs and rejection memory.
    pub summary: String,
}

impl ValidationReply {
    /// Validates a parsed reply against the validation schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or a decision outside `{accept, reject}`.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            decision: Decision::parse(obj)?,
            reasoning: require_str(obj, "reasoning")?.to_string(),
            summary: require_str(obj, "summary")?.to_string(),
        })
    }
}

/// Paper edit operations the compiler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation {
    /// Replace the entire document.
    FullContent,
    /// Replace `old_string` with `new_string`.
    Replace,
    /// Insert `new_string` after `old_string`.
    InsertAfter,
    /// Delete `old_string`.
    Delete,
}

impl EditOperation {
    /// Parses an operation name.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on an unknown name.
    pub fn parse(name: &str) -> Result<Self, ContractError> {
        match name {
            "full_content" => Ok(Self::FullContent),
            "replace" => Ok(Self::Replace),
            "insert_after" => Ok(Self::InsertAfter),
            "delete" => Ok(Self::Delete),
            other => Err(ContractError::SchemaViolation {
                field: "operation".to_string(),
                expected: "one of [\"full_content\", \"replace\", \"insert_after\", \"delete\"]"
                    .to_string(),
                actual: format!("\"{other}\""),
            }),
        }
    }
}

/// Construction reply from the high-context compiler submitter.
///
/// Minimal required schema is `{needs_construction, reasoning}`; the edit
/// parameters default to empty / `replace` / incomplete when omitted.
#[derive(Debug, Clone)]
pub struct ConstructionReply {
    /// Whether the submitter produced content this turn.
    pub needs_construction: bool,
    /// Content for `full_content` operations.
    pub content: String,
    /// Edit operation for this turn.
    pub operation: EditOperation,
    /// Verbatim anchor text for targeted operations.
    pub old_string: String,
    /// Replacement or inserted text.
    pub new_string: String,
    /// Whether the submitter declares the current section complete.
    pub section_complete: bool,
    /// The submitter's reasoning.
    pub reasoning: String,
}

impl ConstructionReply {
    /// Validates a parsed reply against the construction schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let operation = match obj.get("operation") {
            Some(Value::String(name)) => EditOperation::parse(name)?,
            Some(other) => {
                return Err(ContractError::SchemaViolation {
                    field: "operation".to_string(),
                    expected: "string".to_string(),
                    actual: type_name(other).to_string(),
                });
            }
            None => EditOperation::Replace,
        };
        Ok(Self {
            needs_construction: require_bool(obj, "needs_construction")?,
            content: optional_str(obj, "content")?,
            operation,
            old_string: optional_str(obj, "old_string")?,
            new_string: optional_str(obj, "new_string")?,
            section_complete: optional_bool(obj, "section_complete")?,
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Outline creation reply: `{content, reasoning}` plus the lock flag.
#[derive(Debug, Clone)]
pub struct OutlineCreateReply {
    /// Proposed outline text.
    pub content: String,
    /// The submitter's reasoning.
    pub reasoning: String,
    /// Whether the submitter locks the outline as final.
    pub outline_complete: bool,
}

impl OutlineCreateReply {
    /// Validates a parsed reply against the outline-create schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            content: require_str(obj, "content")?.to_string(),
            reasoning: require_str(obj, "reasoning")?.to_string(),
            outline_complete: optional_bool(obj, "outline_complete")?,
        })
    }
}

/// Review-mode reply: `{needs_edit, edit_type, content, placement_context, reasoning}`.
#[derive(Debug, Clone)]
pub struct ReviewReply {
    /// Whether the reviewer proposes an edit.
    pub needs_edit: bool,
    /// `replace`, `delete`, or `none`.
    pub edit_type: String,
    /// Replacement content.
    pub content: String,
    /// Verbatim context locating the edit.
    pub placement_context: String,
    /// The reviewer's reasoning.
    pub reasoning: String,
}

impl ReviewReply {
    /// Validates a parsed reply against the review schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or an `edit_type` outside `{replace, delete, none}`.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            needs_edit: require_bool(obj, "needs_edit")?,
            edit_type: require_enum(obj, "edit_type", &["replace", "delete", "none"])?.to_string(),
            content: require_str(obj, "content")?.to_string(),
            placement_context: require_str(obj, "placement_context")?.to_string(),
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Rigor-enhancement reply.
#[derive(Debug, Clone)]
pub struct RigorReply {
    /// Whether an enhancement is proposed.
    pub needs_enhancement: bool,
    /// Enhancement content.
    pub content: String,
    /// Verbatim context locating the enhancement.
    pub placement_context: String,
    /// The agent's reasoning.
    pub reasoning: String,
}

impl RigorReply {
    /// Validates a parsed reply against the rigor schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            needs_enhancement: require_bool(obj, "needs_enhancement")?,
            content: require_str(obj, "content")?.to_string(),
            placement_context: require_str(obj, "placement_context")?.to_string(),
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Cleanup-review reply proposing at most one removal.
#[derive(Debug, Clone)]
pub struct CleanupReply {
    /// Whether a redundant entry was identified.
    pub removal_needed: bool,
    /// Number of the entry proposed for removal.
    pub submission_number: Option<u64>,
    /// The reviewer's reasoning.
    pub reasoning: String,
}

impl CleanupReply {
    /// Validates a parsed reply against the cleanup schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let submission_number = match obj.get("submission_number") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(ContractError::SchemaViolation {
                    field: "submission_number".to_string(),
                    expected: "number".to_string(),
                    actual: type_name(other).to_string(),
                });
            }
        };
        Ok(Self {
            removal_needed: require_bool(obj, "removal_needed")?,
            submission_number,
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Completion-review reply: continue aggregating or write the paper.
#[derive(Debug, Clone)]
pub struct CompletionReply {
    /// `true` when the reviewer decides the topic is ready for a paper.
    pub write_paper: bool,
    /// The reviewer's reasoning.
    pub reasoning: String,
}

impl CompletionReply {
    /// Validates a parsed reply against the completion schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or a decision outside the allowed set.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let decision = require_enum(obj, "decision", &["continue_brainstorm", "write_paper"])?;
        Ok(Self {
            write_paper: decision == "write_paper",
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Self-validation reply over a prior assessment.
#[derive(Debug, Clone)]
pub struct SelfValidationReply {
    /// Whether the prior assessment stands.
    pub assessment_valid: bool,
    /// The concrete error found, when any.
    pub error_found: String,
}

impl SelfValidationReply {
    /// Validates a parsed reply against the self-validation schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            assessment_valid: require_bool(obj, "assessment_valid")?,
            error_found: optional_str(obj, "error_found")?,
        })
    }
}

/// Revision decision after the critique subphase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionAction {
    /// Keep the body as-is.
    Continue,
    /// Enter the iterative edit loop.
    PartialRevision,
    /// Archive the body and rewrite from scratch.
    TotalRewrite,
}

/// Revision-decision reply.
#[derive(Debug, Clone)]
pub struct RevisionDecisionReply {
    /// Chosen action.
    pub action: RevisionAction,
    /// The submitter's reasoning.
    pub reasoning: String,
}

impl RevisionDecisionReply {
    /// Validates a parsed reply against the revision-decision schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or an action outside the allowed set.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let action = match require_enum(
            obj,
            "action",
            &["continue", "partial_revision", "total_rewrite"],
        )? {
            "continue" => RevisionAction::Continue,
            "partial_revision" => RevisionAction::PartialRevision,
            _ => RevisionAction::TotalRewrite,
        };
        Ok(Self {
            action,
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// One edit in the partial-revision loop.
#[derive(Debug, Clone)]
pub struct RevisionEditReply {
    /// Edit operation.
    pub operation: EditOperation,
    /// Verbatim anchor text.
    pub old_string: String,
    /// Replacement or inserted text.
    pub new_string: String,
    /// Whether further edits are needed after this one.
    pub more_edits_needed: bool,
    /// The submitter's reasoning.
    pub reasoning: String,
}

impl RevisionEditReply {
    /// Validates a parsed reply against the revision-edit schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped fields.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            operation: EditOperation::parse(require_str(obj, "operation")?)?,
            old_string: optional_str(obj, "old_string")?,
            new_string: optional_str(obj, "new_string")?,
            more_edits_needed: require_bool(obj, "more_edits_needed")?,
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Achievable answer level classified by the certainty assessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerLevel {
    /// The corpus fully answers the research prompt.
    FullAnswer,
    /// A partial answer is achievable.
    PartialAnswer,
    /// No answer is known.
    NoAnswerKnown,
    /// None of the above.
    Other,
}

/// Certainty-assessment reply.
#[derive(Debug, Clone)]
pub struct CertaintyReply {
    /// Classified answer level.
    pub answer_level: AnswerLevel,
    /// Summary of known certainties.
    pub known_certainties: String,
    /// Paper ids whose full content the assessor wants expanded.
    pub expand_requests: Vec<String>,
}

impl CertaintyReply {
    /// Validates a parsed reply against the certainty schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or a level outside the allowed set.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let answer_level = match require_enum(
            obj,
            "answer_level",
            &["full_answer", "partial_answer", "no_answer_known", "other"],
        )? {
            "full_answer" => AnswerLevel::FullAnswer,
            "partial_answer" => AnswerLevel::PartialAnswer,
            "no_answer_known" => AnswerLevel::NoAnswerKnown,
            _ => AnswerLevel::Other,
        };
        let expand_requests = match obj.get("expand_requests") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            answer_level,
            known_certainties: optional_str(obj, "known_certainties")?,
            expand_requests,
        })
    }
}

/// Answer format selected for the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerFormat {
    /// A single paper suffices.
    ShortForm,
    /// A multi-chapter volume is required.
    LongForm,
}

/// Format-selection reply.
#[derive(Debug, Clone)]
pub struct FormatReply {
    /// Chosen format.
    pub format: AnswerFormat,
    /// The selector's reasoning.
    pub reasoning: String,
}

impl FormatReply {
    /// Validates a parsed reply against the format schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or a format outside the allowed set.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let format = match require_enum(obj, "format", &["short_form", "long_form"])? {
            "short_form" => AnswerFormat::ShortForm,
            _ => AnswerFormat::LongForm,
        };
        Ok(Self {
            format,
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// One chapter in a volume plan: an existing paper or a gap placeholder.
#[derive(Debug, Clone)]
pub struct ChapterPlan {
    /// `introduction`, `conclusion`, `paper`, or `gap_paper`.
    pub kind: String,
    /// Referenced paper id for `paper` chapters.
    pub paper_id: Option<String>,
    /// Chapter title.
    pub title: String,
}

/// Volume-organizer reply: an ordered chapter plan plus the lock flag.
#[derive(Debug, Clone)]
pub struct VolumePlanReply {
    /// Ordered chapters.
    pub chapters: Vec<ChapterPlan>,
    /// Whether the organizer locks the plan as final.
    pub outline_complete: bool,
    /// The organizer's reasoning.
    pub reasoning: String,
}

impl VolumePlanReply {
    /// Validates a parsed reply against the volume-plan schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or a chapter kind outside the allowed set.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        let raw_chapters = match obj.get("chapters") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ContractError::SchemaViolation {
                    field: "chapters".to_string(),
                    expected: "array".to_string(),
                    actual: type_name(other).to_string(),
                });
            }
            None => {
                return Err(ContractError::SchemaViolation {
                    field: "chapters".to_string(),
                    expected: "array".to_string(),
                    actual: "missing".to_string(),
                });
            }
        };

        let mut chapters = Vec::with_capacity(raw_chapters.len());
        for chapter in raw_chapters {
            let kind = require_enum(
                chapter,
                "kind",
                &["introduction", "conclusion", "paper", "gap_paper"],
            )?
            .to_string();
            let paper_id = match chapter.get("paper_id") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            };
            chapters.push(ChapterPlan {
                kind,
                paper_id,
                title: optional_str(chapter, "title")?,
            });
        }

        Ok(Self {
            chapters,
            outline_complete: optional_bool(obj, "outline_complete")?,
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

/// Topic-selection reply.
#[derive(Debug, Clone)]
pub struct TopicReply {
    /// `new_topic`, `continue_existing`, or `combine_topics`.
    pub action: String,
    /// Topic description or existing topic id.
    pub topic: String,
    /// The selector's reasoning.
    pub reasoning: String,
}

impl TopicReply {
    /// Validates a parsed reply against the topic-selection schema.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::SchemaViolation`] on missing or mistyped
    /// fields, or an action outside the allowed set.
    pub fn from_value(obj: &Value) -> Result<Self, ContractError> {
        Ok(Self {
            action: require_enum(
                obj,
                "action",
                &["new_topic", "continue_existing", "combine_topics"],
            )?
            .to_string(),
            topic: require_str(obj, "topic")?.to_string(),
            reasoning: require_str(obj, "reasoning")?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_reply_accept() {
        let value = json!({"decision": "accept", "reasoning": "good", "summary": "ok"});
        let reply = ValidationReply::from_value(&value).unwrap();
        assert!(reply.decision.is_accept());
        assert_eq!(reply.summary, "ok");
    }

    #[test]
    fn test_validation_reply_bad_decision() {
        let value = json!({"decision": "maybe", "reasoning": "r", "summary": "s"});
        let err = ValidationReply::from_value(&value).unwrap_err();
        assert!(matches!(err, ContractError::SchemaViolation { .. }));
    }

    #[test]
    fn test_validation_reply_missing_field() {
        let value = json!({"decision": "accept", "reasoning": "r"});
        assert!(ValidationReply::from_value(&value).is_err());
    }

    #[test]
    fn test_submission_reply_defaults_decline() {
        let value = json!({"submission": "content", "reasoning": "r"});
        let reply = SubmissionReply::from_value(&value).unwrap();
        assert!(!reply.is_decline);
    }

    #[test]
    fn test_construction_reply_defaults() {
        let value = json!({"needs_construction": true, "reasoning": "r"});
        let reply = ConstructionReply::from_value(&value).unwrap();
        assert_eq!(reply.operation, EditOperation::Replace);
        assert!(reply.content.is_empty());
        assert!(!reply.section_complete);
    }

    #[test]
    fn test_construction_reply_bad_operation() {
        let value = json!({"needs_construction": true, "reasoning": "r", "operation": "append"});
        assert!(ConstructionReply::from_value(&value).is_err());
    }

    #[test]
    fn test_construction_reply_full() {
        let value = json!({
            "needs_construction": true,
            "operation": "insert_after",
            "old_string": "anchor",
            "new_string": "inserted",
            "section_complete": true,
            "reasoning": "r"
        });
        let reply = ConstructionReply::from_value(&value).unwrap();
        assert_eq!(reply.operation, EditOperation::InsertAfter);
        assert!(reply.section_complete);
    }

    #[test]
    fn test_review_reply_edit_type_enum() {
        let value = json!({
            "needs_edit": true, "edit_type": "rewrite",
            "content": "", "placement_context": "", "reasoning": "r"
        });
        assert!(ReviewReply::from_value(&value).is_err());
    }

    #[test]
    fn test_completion_reply() {
        let value = json!({"decision": "write_paper", "reasoning": "done"});
        let reply = CompletionReply::from_value(&value).unwrap();
        assert!(reply.write_paper);

        let value = json!({"decision": "continue_brainstorm", "reasoning": "more"});
        assert!(!CompletionReply::from_value(&value).unwrap().write_paper);
    }

    #[test]
    fn test_revision_decision_reply() {
        let value = json!({"action": "partial_revision", "reasoning": "r"});
        let reply = RevisionDecisionReply::from_value(&value).unwrap();
        assert_eq!(reply.action, RevisionAction::PartialRevision);
    }

    #[test]
    fn test_certainty_reply() {
        let value = json!({
            "answer_level": "partial_answer",
            "known_certainties": "some facts",
            "expand_requests": ["paper_1", "paper_3"]
        });
        let reply = CertaintyReply::from_value(&value).unwrap();
        assert_eq!(reply.answer_level, AnswerLevel::PartialAnswer);
        assert_eq!(reply.expand_requests.len(), 2);
    }

    #[test]
    fn test_volume_plan_reply() {
        let value = json!({
            "chapters": [
                {"kind": "introduction", "title": "Intro"},
                {"kind": "paper", "paper_id": "paper_2", "title": "Results"},
                {"kind": "gap_paper", "title": "Missing link"},
                {"kind": "conclusion", "title": "Conclusion"}
            ],
            "outline_complete": true,
            "reasoning": "r"
        });
        let reply = VolumePlanReply::from_value(&value).unwrap();
        assert_eq!(reply.chapters.len(), 4);
        assert!(reply.outline_complete);
        assert_eq!(reply.chapters[1].paper_id.as_deref(), Some("paper_2"));
    }

    #[test]
    fn test_volume_plan_bad_kind() {
        let value = json!({
            "chapters": [{"kind": "appendix", "title": "x"}],
            "reasoning": "r"
        });
        assert!(VolumePlanReply::from_value(&value).is_err());
    }

    #[test]
    fn test_topic_reply_action_enum() {
        let value = json!({"action": "combine_topics", "topic": "t", "reasoning": "r"});
        assert!(TopicReply::from_value(&value).is_ok());

        let value = json!({"action": "abandon", "topic": "t", "reasoning": "r"});
        assert!(TopicReply::from_value(&value).is_err());
    }

    #[test]
    fn test_cleanup_reply_number_optional() {
        let value = json!({"removal_needed": false, "reasoning": "all unique"});
        let reply = CleanupReply::from_value(&value).unwrap();
        assert!(reply.submission_number.is_none());

        let value = json!({"removal_needed": true, "submission_number": 4, "reasoning": "dup"});
        assert_eq!(
            CleanupReply::from_value(&value).unwrap().submission_number,
            Some(4)
        );
    }
}
