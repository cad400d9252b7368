//! Agents: the LLM-facing roles of the pipeline.
//!
//! Every agent assembles its prompt through the context allocator, calls
//! the gateway, and parses the reply through the JSON contract layer.
//! Agents never propagate errors across the scheduler: failure paths
//! degrade into rejection results so the coordinator loop always proceeds.

pub mod compiler;
pub mod compiler_validator;
pub mod completion;
pub mod critique;
pub mod final_answer;
pub mod polish;
pub mod retry;
pub mod submitter;
pub mod topic;
pub mod validator;

use chrono::Utc;

use crate::contract::schema::Decision;

/// Which allocator priority list an agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitterKind {
    /// Submitter-like roles: shared training → local training → rejection
    /// log → user files.
    Submitter,
    /// Validator-like roles: submission under review is mandatory; shared
    /// training → user files.
    Validator,
    /// Cleanup review: never fails on size, offloads the dump to RAG.
    CleanupReview,
}

/// A candidate submission emitted by a submitter, consumed once by a
/// validator.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Unique submission id.
    pub id: String,
    /// Emitting submitter.
    pub submitter_id: usize,
    /// Submission content.
    pub content: String,
    /// Submitter's reasoning.
    pub reasoning: String,
    /// Emission timestamp.
    pub timestamp: String,
    /// Chunk size class the submitter retrieved with.
    pub chunk_size_used: usize,
    /// Whether the submitter declined (exhaustion signal).
    pub is_decline: bool,
}

impl Submission {
    /// Creates a submission with a fresh id and timestamp.
    #[must_use]
    pub fn new(
        submitter_id: usize,
        content: String,
        reasoning: String,
        chunk_size_used: usize,
        is_decline: bool,
    ) -> Self {
        let timestamp = Utc::now().to_rfc3339();
        Self {
            id: format!("sub_{submitter_id}_{}", Utc::now().timestamp_micros()),
            submitter_id,
            content,
            reasoning,
            timestamp,
            chunk_size_used,
            is_decline,
        }
    }
}

/// A validator's verdict on one submission.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// The submission this verdict applies to.
    pub submission_id: String,
    /// Accept or reject.
    pub decision: Decision,
    /// Full reasoning.
    pub reasoning: String,
    /// Brief summary for logs and rejection memory.
    pub summary: String,
    /// Whether the validator's JSON parsed.
    pub json_valid: bool,
    /// Whether the contradiction heuristics passed.
    pub contradiction_check_passed: bool,
}

impl ValidationResult {
    /// A synthetic rejection used when validation itself failed; keeps the
    /// coordinator loop moving instead of propagating the error.
    #[must_use]
    pub fn synthetic_reject(submission_id: &str, reasoning: String, summary: String) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            decision: Decision::Reject,
            reasoning,
            summary,
            json_valid: false,
            contradiction_check_passed: true,
        }
    }

    /// Whether the submission was accepted.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.decision.is_accept()
    }
}

/// Formats the structured human-readable rejection summary carried by
/// every rejection.
#[must_use]
pub fn format_rejection_summary(
    reason: &str,
    issue: &str,
    submitted_preview: &str,
    why: &str,
    fix_required: &str,
    example: &str,
) -> String {
    format!(
        "REJECTION REASON: {reason}\nISSUE: {issue}\nWHAT YOU SUBMITTED: {submitted_preview}\nWHY: {why}\nFIX REQUIRED: {fix_required}\nEXAMPLE: {example}"
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted gateway/allocator fixtures shared by agent tests.

    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::allocator::ContextAllocator;
    use crate::config::PipelineConfig;
    use crate::error::GatewayError;
    use crate::gateway::message::{
        Choice, ChoiceMessage, CompletionRequest, CompletionResponse, TokenUsage,
    };
    use crate::gateway::{LlmBackend, LlmGateway};
    use crate::retrieval::{RetrievalConfig, RetrievalEngine};

    /// Backend that replays scripted completion outputs in order, then
    /// repeats the last one. Embeddings are deterministic byte-hash vectors.
    pub(crate) struct ScriptedBackend {
        outputs: StdMutex<Vec<String>>,
        pub(crate) requests: StdMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        pub(crate) fn script<I, S>(outputs: I) -> Arc<Self>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Arc::new(Self {
                outputs: StdMutex::new(outputs.into_iter().map(Into::into).collect()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        pub(crate) fn reply_forever(output: &str) -> Arc<Self> {
            Self::script([output])
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            let output = {
                let mut outputs = self.outputs.lock().unwrap();
                if outputs.len() > 1 {
                    outputs.remove(0)
                } else {
                    outputs.first().cloned().unwrap_or_else(|| "{}".to_string())
                }
            };
            Ok(CompletionResponse {
                choices: vec![Choice {
                    message: ChoiceMessage {
                        content: Some(output),
                        reasoning: None,
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: TokenUsage::default(),
            })
        }

        async fn embed(
            &self,
            _model: &str,
            inputs: &[String],
        ) -> Result<Vec<Vec<f32>>, GatewayError> {
            Ok(inputs
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 8];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % 8] += f32::from(b) / 255.0;
                    }
                    v
                })
                .collect())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    /// Builds a gateway + allocator + config over a scripted backend.
    pub(crate) fn scripted_setup(
        backend: Arc<ScriptedBackend>,
    ) -> (Arc<LlmGateway>, Arc<ContextAllocator>, Arc<PipelineConfig>) {
        let config = Arc::new(
            PipelineConfig::builder()
                .build()
                .unwrap_or_else(|_| unreachable!()),
        );
        let gateway = Arc::new(LlmGateway::new(
            backend as Arc<dyn LlmBackend>,
            None,
            "embed-model",
        ));
        let engine = Arc::new(RetrievalEngine::new(
            Arc::clone(&gateway),
            RetrievalConfig::from_pipeline(&config),
        ));
        let allocator = Arc::new(ContextAllocator::new(Arc::clone(&config), engine));
        (gateway, allocator, config)
    }
}
