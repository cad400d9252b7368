//! System prompts, JSON schema texts, and prompt builders for all agents.
//!
//! The builders assemble prompts with the exact separator and header
//! strings the context allocator measures, so budget arithmetic and the
//! final prompt agree.

use std::fmt::Write;

/// Section separator used throughout prompt assembly.
pub const SEPARATOR: &str = "\n---\n";

/// System prompt for tier-1 submitters.
pub const SUBMITTER_SYSTEM_PROMPT: &str = "You are a research submitter in a multi-agent \
pipeline. Study the knowledge base and evidence, then contribute ONE new, well-supported \
insight that advances the research goal. Do not repeat existing insights. If the topic is \
genuinely exhausted, decline. Respond with only JSON.";

/// JSON schema text for submitter output.
pub const SUBMITTER_SCHEMA: &str = r#"{
  "submission": "your new insight (string)",
  "reasoning": "why this advances the research goal (string)",
  "is_decline": "true only if the topic is exhausted (boolean, optional)"
}"#;

/// System prompt for the tier-1 validator.
pub const VALIDATOR_SYSTEM_PROMPT: &str = "You are a strict research validator. Accept a \
submission only if it is novel relative to the knowledge base, logically consistent, and \
well-supported. Reject redundancy, speculation presented as fact, and contradictions. \
Respond with only JSON.";

/// JSON schema text for validator output.
pub const VALIDATOR_SCHEMA: &str = r#"{
  "decision": "accept" or "reject",
  "reasoning": "full reasoning (string)",
  "summary": "brief summary of the decision (string)"
}"#;

/// System prompt for cleanup review.
pub const CLEANUP_SYSTEM_PROMPT: &str = "You are reviewing an accepted-submissions database \
for redundancy. Identify AT MOST ONE entry that is fully redundant with the others. Most \
reviews should find nothing. Respond with only JSON.";

/// JSON schema text for cleanup review output.
pub const CLEANUP_SCHEMA: &str = r#"{
  "removal_needed": "whether a redundant entry exists (boolean)",
  "submission_number": "number of the redundant entry, or null",
  "reasoning": "why it is redundant (string)"
}"#;

/// System prompt for removal validation (the second opinion).
pub const REMOVAL_VALIDATION_SYSTEM_PROMPT: &str = "Another reviewer proposed removing one \
entry from the accepted-submissions database. Approve the removal ONLY if the entry is \
fully covered by the remaining entries. Respond with only JSON.";

/// System prompt for the completion reviewer.
pub const COMPLETION_SYSTEM_PROMPT: &str = "You decide whether this research topic needs \
more aggregation or is ready to be written up as a paper. Consider depth, coverage, and \
recent rejection patterns. Respond with only JSON.";

/// JSON schema text for completion review output.
pub const COMPLETION_SCHEMA: &str = r#"{
  "decision": "continue_brainstorm" or "write_paper",
  "reasoning": "your assessment (string)"
}"#;

/// System prompt for completion self-validation.
pub const SELF_VALIDATION_SYSTEM_PROMPT: &str = "Re-examine your own prior assessment. \
Uphold it unless you can name a concrete, specific error in its reasoning. Vague doubts \
are not errors. Respond with only JSON.";

/// JSON schema text for self-validation output.
pub const SELF_VALIDATION_SCHEMA: &str = r#"{
  "assessment_valid": "whether the assessment stands (boolean)",
  "error_found": "the concrete error, or empty string (string)"
}"#;

/// System prompt for outline creation.
pub const OUTLINE_CREATE_SYSTEM_PROMPT: &str = "You are drafting the outline for a research \
paper from the accepted knowledge base. Refine the outline across iterations using the \
validator feedback shown. Set outline_complete to true only when the outline is final. \
Respond with only JSON.";

/// JSON schema text for outline creation output.
pub const OUTLINE_CREATE_SCHEMA: &str = r#"{
  "content": "the full outline (string)",
  "reasoning": "what changed and why (string)",
  "outline_complete": "true to lock the outline (boolean)"
}"#;

/// Construction system prompts, one per paper phase.
pub const CONSTRUCTION_BODY_SYSTEM_PROMPT: &str = "You are writing the BODY of a research \
paper, one portion per turn, following the locked outline. Use full_content for the first \
portion and targeted edits afterwards. old_string must be copied verbatim from the paper \
and unique. Set section_complete when the body is finished. Respond with only JSON.";

/// Conclusion-phase construction prompt.
pub const CONSTRUCTION_CONCLUSION_SYSTEM_PROMPT: &str = "The body is complete. Write the \
CONCLUSION section, replacing its placeholder. Set section_complete when the conclusion is \
finished. Respond with only JSON.";

/// Introduction-phase construction prompt.
pub const CONSTRUCTION_INTRODUCTION_SYSTEM_PROMPT: &str = "The body and conclusion are \
complete. Write the INTRODUCTION section, replacing its placeholder. Set section_complete \
when the introduction is finished. Respond with only JSON.";

/// Abstract-phase construction prompt.
pub const CONSTRUCTION_ABSTRACT_SYSTEM_PROMPT: &str = "The paper is complete except for the \
ABSTRACT. Write it, replacing its placeholder. Set section_complete when the abstract is \
finished. Respond with only JSON.";

/// JSON schema text for construction output.
pub const CONSTRUCTION_SCHEMA: &str = r#"{
  "needs_construction": "whether you produced content this turn (boolean)",
  "operation": "full_content" or "replace" or "insert_after" or "delete",
  "content": "full document text for full_content (string)",
  "old_string": "verbatim unique anchor text for targeted operations (string)",
  "new_string": "replacement or inserted text (string)",
  "section_complete": "whether the current section is finished (boolean)",
  "reasoning": "what this turn does (string)"
}"#;

/// System prompt for the compiler validator's coherence check.
pub const COHERENCE_SYSTEM_PROMPT: &str = "Check ONLY coherence: does the proposed edit \
keep the paper logically connected and consistent with the outline? Respond with only JSON.";

/// System prompt for the compiler validator's rigor check.
pub const RIGOR_CHECK_SYSTEM_PROMPT: &str = "Check ONLY rigor: is the proposed edit \
precise, well-supported by the knowledge base, and free of hand-waving? Respond with only JSON.";

/// System prompt for the compiler validator's placement check.
pub const PLACEMENT_SYSTEM_PROMPT: &str = "Check ONLY placement: given where old_string \
sits in the paper, is this edit contextually appropriate at that location? Respond with \
only JSON.";

/// System prompt for critique (peer review).
pub const CRITIQUE_SYSTEM_PROMPT: &str = "You are a peer reviewer. Critique the paper body \
harshly but fairly: accept the critique only if it identifies substantive weaknesses. \
Respond with only JSON.";

/// System prompt for the revision decision after critique.
pub const REVISION_DECISION_SYSTEM_PROMPT: &str = "Given the accepted critiques, decide: \
continue (body stands), partial_revision (targeted edits), or total_rewrite. Respond with \
only JSON.";

/// JSON schema text for the revision decision.
pub const REVISION_DECISION_SCHEMA: &str = r#"{
  "action": "continue" or "partial_revision" or "total_rewrite",
  "reasoning": "why (string)"
}"#;

/// System prompt for the iterative revision edit loop.
pub const REVISION_EDIT_SYSTEM_PROMPT: &str = "Propose EXACTLY ONE edit addressing the \
critiques. old_string must be copied verbatim from the paper and unique. Set \
more_edits_needed to false when the revision is complete. Respond with only JSON.";

/// JSON schema text for a revision edit.
pub const REVISION_EDIT_SCHEMA: &str = r#"{
  "operation": "replace" or "insert_after" or "delete",
  "old_string": "verbatim unique anchor text (string)",
  "new_string": "replacement or inserted text (string)",
  "more_edits_needed": "whether further edits remain (boolean)",
  "reasoning": "what this edit fixes (string)"
}"#;

/// System prompt for the rigor enhancement agent.
pub const RIGOR_ENHANCE_SYSTEM_PROMPT: &str = "Strengthen the paper's rigor with one \
targeted enhancement: tighter claims, explicit assumptions, or precise quantities. \
placement_context must be verbatim text from the paper. Respond with only JSON.";

/// JSON schema text for rigor enhancement.
pub const RIGOR_ENHANCE_SCHEMA: &str = r#"{
  "needs_enhancement": "whether an enhancement is proposed (boolean)",
  "content": "the enhancement text (string)",
  "placement_context": "verbatim paper text to anchor the enhancement (string)",
  "reasoning": "why (string)"
}"#;

/// System prompt for the review agent (no tier-1 data access).
pub const REVIEW_SYSTEM_PROMPT: &str = "Review the paper as a standalone document for \
clarity and correctness of exposition. Propose at most one edit. placement_context must \
be verbatim text from the paper. Respond with only JSON.";

/// JSON schema text for review output.
pub const REVIEW_SCHEMA: &str = r#"{
  "needs_edit": "whether an edit is proposed (boolean)",
  "edit_type": "replace" or "delete" or "none",
  "content": "replacement text (string)",
  "placement_context": "verbatim paper text to anchor the edit (string)",
  "reasoning": "why (string)"
}"#;

/// System prompt for the certainty assessor.
pub const CERTAINTY_SYSTEM_PROMPT: &str = "Scan the completed papers' abstracts and \
classify what answer level the corpus supports for the research prompt. Request expansion \
of specific papers if abstracts are insufficient. Respond with only JSON.";

/// JSON schema text for certainty assessment.
pub const CERTAINTY_SCHEMA: &str = r#"{
  "answer_level": "full_answer" or "partial_answer" or "no_answer_known" or "other",
  "known_certainties": "summary of what is established (string)",
  "expand_requests": ["paper ids needing full content (array of strings)"]
}"#;

/// System prompt for the answer format selector.
pub const FORMAT_SYSTEM_PROMPT: &str = "Choose the final answer format: short_form (a \
single paper answers the prompt) or long_form (a multi-chapter volume is required). \
Respond with only JSON.";

/// JSON schema text for format selection.
pub const FORMAT_SCHEMA: &str = r#"{
  "format": "short_form" or "long_form",
  "reasoning": "why (string)"
}"#;

/// System prompt for the volume organizer.
pub const VOLUME_SYSTEM_PROMPT: &str = "Build an ordered chapter plan for the answer \
volume: an introduction, body chapters referencing existing papers or gap_paper \
placeholders for missing ones, and a conclusion. Set outline_complete to true only when \
the plan is final. Respond with only JSON.";

/// JSON schema text for the volume plan.
pub const VOLUME_SCHEMA: &str = r#"{
  "chapters": [{"kind": "introduction|paper|gap_paper|conclusion", "paper_id": "for paper chapters", "title": "chapter title"}],
  "outline_complete": "true to lock the plan (boolean)",
  "reasoning": "why this ordering (string)"
}"#;

/// System prompt for the topic selector.
pub const TOPIC_SYSTEM_PROMPT: &str = "Select the next research topic toward the user's \
prompt: a new topic, continuation of an existing one, or a combination of existing \
topics. Respond with only JSON.";

/// JSON schema text for topic selection.
pub const TOPIC_SCHEMA: &str = r#"{
  "action": "new_topic" or "continue_existing" or "combine_topics",
  "topic": "topic description, or the existing topic id (string)",
  "reasoning": "why (string)"
}"#;

/// Assembles a submitter prompt from allocated parts.
#[must_use]
pub fn build_submitter_prompt(
    system_prompt: &str,
    json_schema: &str,
    user_prompt: &str,
    direct_context: &str,
    rag_evidence: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(system_prompt);
    prompt.push_str(SEPARATOR);
    prompt.push_str(json_schema);
    prompt.push_str(SEPARATOR);
    let _ = write!(prompt, "USER PROMPT:\n{user_prompt}");
    if !direct_context.is_empty() {
        prompt.push_str(SEPARATOR);
        prompt.push_str(direct_context);
    }
    if !rag_evidence.is_empty() {
        let _ = write!(prompt, "{SEPARATOR}RETRIEVED EVIDENCE:\n{rag_evidence}");
    }
    prompt.push_str(SEPARATOR);
    prompt.push_str("Now generate your submission as JSON:");
    prompt
}

/// Assembles a validator prompt from allocated parts.
#[must_use]
pub fn build_validator_prompt(
    system_prompt: &str,
    json_schema: &str,
    user_prompt: &str,
    submission: &str,
    direct_context: &str,
    rag_evidence: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(system_prompt);
    prompt.push_str(SEPARATOR);
    prompt.push_str(json_schema);
    prompt.push_str(SEPARATOR);
    let _ = write!(prompt, "USER PROMPT:\n{user_prompt}");
    prompt.push_str(SEPARATOR);
    let _ = write!(prompt, "SUBMISSION TO VALIDATE:\n{submission}");
    if !direct_context.is_empty() {
        prompt.push_str(SEPARATOR);
        prompt.push_str(direct_context);
    }
    if !rag_evidence.is_empty() {
        let _ = write!(
            prompt,
            "{SEPARATOR}EXISTING KNOWLEDGE BASE (Retrieved):\n{rag_evidence}"
        );
    }
    prompt.push_str(SEPARATOR);
    prompt.push_str("Evaluate this submission and provide your decision as JSON:");
    prompt
}

/// Assembles a cleanup-review prompt from allocated parts.
#[must_use]
pub fn build_cleanup_prompt(
    system_prompt: &str,
    json_schema: &str,
    user_prompt: &str,
    direct_context: &str,
    rag_evidence: &str,
    removal_candidate: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(system_prompt);
    prompt.push_str(SEPARATOR);
    prompt.push_str(json_schema);
    prompt.push_str(SEPARATOR);
    let _ = write!(
        prompt,
        "USER PROMPT (the goal this database is solving):\n{user_prompt}"
    );
    if let Some(candidate) = removal_candidate {
        let _ = write!(prompt, "{SEPARATOR}SUBMISSION PROPOSED FOR REMOVAL:\n{candidate}");
    }
    if !direct_context.is_empty() {
        prompt.push_str(SEPARATOR);
        prompt.push_str(direct_context);
    }
    if !rag_evidence.is_empty() {
        let _ = write!(
            prompt,
            "{SEPARATOR}ADDITIONAL CONTEXT (Retrieved):\n{rag_evidence}"
        );
    }
    prompt.push_str(SEPARATOR);
    prompt.push_str("Review the database and provide your cleanup decision as JSON:");
    prompt
}

/// Assembles a generic sectioned prompt: system, schema, then labeled
/// sections in order.
#[must_use]
pub fn build_sectioned_prompt(
    system_prompt: &str,
    json_schema: &str,
    sections: &[(&str, &str)],
    final_instruction: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(system_prompt);
    prompt.push_str(SEPARATOR);
    prompt.push_str(json_schema);
    for (label, content) in sections {
        if content.is_empty() {
            continue;
        }
        let _ = write!(prompt, "{SEPARATOR}{label}:\n{content}");
    }
    prompt.push_str(SEPARATOR);
    prompt.push_str(final_instruction);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_submitter_prompt_ordering() {
        let prompt = build_submitter_prompt(
            "SYS",
            "{\"s\": 1}",
            "find the answer",
            "[SHARED TRAINING]\ninsights",
            "[Evidence 1 from db]\ntext",
        );
        let sys_pos = prompt.find("SYS").unwrap();
        let user_pos = prompt.find("USER PROMPT:").unwrap();
        let ctx_pos = prompt.find("[SHARED TRAINING]").unwrap();
        let rag_pos = prompt.find("RETRIEVED EVIDENCE:").unwrap();
        let final_pos = prompt.find("Now generate").unwrap();
        assert!(sys_pos < user_pos && user_pos < ctx_pos && ctx_pos < rag_pos && rag_pos < final_pos);
    }

    #[test]
    fn test_build_submitter_prompt_omits_empty_sections() {
        let prompt = build_submitter_prompt("SYS", "{}", "q", "", "");
        assert!(!prompt.contains("RETRIEVED EVIDENCE:"));
    }

    #[test]
    fn test_build_validator_prompt_contains_submission() {
        let prompt = build_validator_prompt("SYS", "{}", "goal", "the submission", "", "");
        assert!(prompt.contains("SUBMISSION TO VALIDATE:\nthe submission"));
        assert!(prompt.contains("Evaluate this submission"));
    }

    #[test]
    fn test_build_cleanup_prompt_with_candidate() {
        let prompt = build_cleanup_prompt("SYS", "{}", "goal", "", "", Some("entry #4"));
        assert!(prompt.contains("SUBMISSION PROPOSED FOR REMOVAL:\nentry #4"));
    }

    #[test]
    fn test_build_sectioned_prompt_skips_empty() {
        let prompt = build_sectioned_prompt(
            "SYS",
            "{}",
            &[("PAPER", "body"), ("OUTLINE", "")],
            "Go:",
        );
        assert!(prompt.contains("PAPER:\nbody"));
        assert!(!prompt.contains("OUTLINE:"));
        assert!(prompt.ends_with("Go:"));
    }

    #[test]
    fn test_prompts_not_empty() {
        for prompt in [
            SUBMITTER_SYSTEM_PROMPT,
            VALIDATOR_SYSTEM_PROMPT,
            CLEANUP_SYSTEM_PROMPT,
            COMPLETION_SYSTEM_PROMPT,
            OUTLINE_CREATE_SYSTEM_PROMPT,
            CONSTRUCTION_BODY_SYSTEM_PROMPT,
            CRITIQUE_SYSTEM_PROMPT,
            CERTAINTY_SYSTEM_PROMPT,
            VOLUME_SYSTEM_PROMPT,
        ] {
            assert!(!prompt.is_empty());
        }
    }
}
