//! Completion + JSON parse with conversational retry.
//!
//! When an agent's reply fails JSON parsing, it is reprompted with its own
//! truncated failed output and the parse error, asking for only JSON. The
//! assistant turn is included only when the augmented conversation still
//! fits the measured input budget; otherwise the original prompt is resent
//! without history.

use serde_json::Value;

use crate::contract::{RepairStrategy, parse_llm_json};
use crate::error::{ContractError, Error};
use crate::gateway::message::{assistant_message, user_message};
use crate::gateway::{CompletionCall, LlmGateway};
use crate::tokens::count_tokens;
use tracing::{debug, info, warn};

/// Character cap on the failed output included in the retry conversation.
const MAX_FAILED_OUTPUT_CHARS: usize = 2000;

/// Instruction template appended on conversational retry.
fn retry_instruction(parse_error: &str) -> String {
    format!(
        "Your previous response could not be parsed as valid JSON.\n\n\
         PARSE ERROR: {parse_error}\n\n\
         Provide the same answer in valid JSON matching the required schema.\n\
         CRITICAL: Properly escape all backslashes (use \\\\) and quotes (use \\\").\n\
         Respond with ONLY the JSON object, no markdown, no explanation."
    )
}

/// Runs a completion and parses its JSON reply, retrying conversationally
/// once on parse failure.
///
/// `available_input` is the role's measured input budget; the retry
/// conversation is only augmented with the failed output when it fits.
///
/// # Errors
///
/// Returns the gateway error, or the final [`ContractError`] when the
/// retry also fails to parse.
pub async fn complete_and_parse_json(
    gateway: &LlmGateway,
    call: CompletionCall,
    available_input: usize,
) -> Result<(Value, RepairStrategy), Error> {
    let original_messages = call.messages.clone();
    let response = gateway.completion(call.clone()).await?;
    let output = response.first_text().to_string();

    match parse_llm_json(&output) {
        Ok((value, strategy)) => {
            if strategy.repaired() {
                info!(strategy = %strategy, "agent JSON required repair");
            }
            return Ok((value, strategy));
        }
        Err(parse_error) => {
            info!(error = %parse_error, "initial JSON parse failed, attempting conversational retry");
            let retried =
                conversational_retry(gateway, call, original_messages, &output, &parse_error, available_input)
                    .await?;
            Ok(retried)
        }
    }
}

async fn conversational_retry(
    gateway: &LlmGateway,
    mut call: CompletionCall,
    original_messages: Vec<crate::gateway::message::ChatMessage>,
    failed_output: &str,
    parse_error: &ContractError,
    available_input: usize,
) -> Result<(Value, RepairStrategy), Error> {
    let preview = if failed_output.len() > MAX_FAILED_OUTPUT_CHARS {
        let mut end = MAX_FAILED_OUTPUT_CHARS;
        while end > 0 && !failed_output.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}\n[...output truncated for retry...]",
            &failed_output[..end]
        )
    } else {
        failed_output.to_string()
    };

    let instruction = retry_instruction(&parse_error.to_string());

    let original_tokens: usize = original_messages
        .iter()
        .map(|m| count_tokens(&m.content))
        .sum();
    let conversation_tokens =
        original_tokens + count_tokens(&preview) + count_tokens(&instruction);

    if conversation_tokens <= available_input {
        let mut messages = original_messages;
        messages.push(assistant_message(&preview));
        messages.push(user_message(&instruction));
        call.messages = messages;
        debug!(conversation_tokens, "retrying with conversation history");
    } else {
        // Measured, not guessed: the augmented conversation would overflow
        // the input budget, so resend the original prompt alone.
        warn!(
            conversation_tokens,
            available_input, "retry conversation exceeds budget; resending original prompt"
        );
        call.messages = original_messages;
    }

    let response = gateway.completion(call).await?;
    let output = response.first_text().to_string();
    parse_llm_json(&output).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LlmBackend;
    use crate::gateway::message::{
        Choice, ChoiceMessage, CompletionRequest, CompletionResponse, TokenUsage,
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    /// Backend returning scripted outputs and recording request shapes.
    struct ScriptedBackend {
        outputs: StdMutex<Vec<&'static str>>,
        requests: StdMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(mut outputs: Vec<&'static str>) -> Self {
            outputs.reverse();
            Self {
                outputs: StdMutex::new(outputs),
                requests: StdMutex::new(Vec::new()),
            }
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
        ) -> Result<CompletionResponse, crate::error::GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            let output = self.outputs.lock().unwrap().pop().unwrap_or("{}");
            Ok(CompletionResponse {
                choices: vec![Choice {
                    message: ChoiceMessage {
                        content: Some(output.to_string()),
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
            _inputs: &[String],
        ) -> Result<Vec<Vec<f32>>, crate::error::GatewayError> {
            Ok(Vec::new())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn call_with(prompt: &str) -> CompletionCall {
        CompletionCall {
            task_id: "t".to_string(),
            role_id: "r".to_string(),
            model: "m".to_string(),
            messages: vec![user_message(prompt)],
            temperature: 0.0,
            max_tokens: Some(256),
        }
    }

    #[tokio::test]
    async fn test_valid_json_no_retry() {
        let backend = Arc::new(ScriptedBackend::new(vec!["{\"decision\": \"accept\"}"]));
        let gateway = LlmGateway::new(Arc::clone(&backend) as Arc<dyn LlmBackend>, None, "e");
        let (value, strategy) = complete_and_parse_json(&gateway, call_with("go"), 100_000)
            .await
            .unwrap();
        assert_eq!(value["decision"], "accept");
        assert!(!strategy.repaired());
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_includes_history_when_it_fits() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            "definitely not json",
            "{\"decision\": \"reject\"}",
        ]));
        let gateway = LlmGateway::new(Arc::clone(&backend) as Arc<dyn LlmBackend>, None, "e");
        let (value, _) = complete_and_parse_json(&gateway, call_with("go"), 100_000)
            .await
            .unwrap();
        assert_eq!(value["decision"], "reject");

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // The retry conversation carries the failed output and instruction.
        assert_eq!(requests[1].messages.len(), 3);
        assert!(requests[1].messages[1].content.contains("definitely not json"));
        assert!(requests[1].messages[2].content.contains("PARSE ERROR"));
    }

    #[tokio::test]
    async fn test_retry_skips_history_when_over_budget() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            "still not json",
            "{\"ok\": true}",
        ]));
        let gateway = LlmGateway::new(Arc::clone(&backend) as Arc<dyn LlmBackend>, None, "e");
        // Budget too small for prompt + preview + instruction.
        let (value, _) = complete_and_parse_json(&gateway, call_with("go"), 10)
            .await
            .unwrap();
        assert_eq!(value["ok"], true);

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // Original prompt resent without history.
        assert_eq!(requests[1].messages.len(), 1);
        assert_eq!(requests[1].messages[0].content, "go");
    }

    #[tokio::test]
    async fn test_retry_failure_surfaces_contract_error() {
        let backend = Arc::new(ScriptedBackend::new(vec!["nope", "still nope"]));
        let gateway = LlmGateway::new(Arc::clone(&backend) as Arc<dyn LlmBackend>, None, "e");
        let result = complete_and_parse_json(&gateway, call_with("go"), 100_000).await;
        assert!(matches!(result, Err(Error::Contract(_))));
    }

    #[tokio::test]
    async fn test_truncates_long_failed_output() {
        let long_output: &'static str =
            Box::leak(format!("not json {}", "x".repeat(5000)).into_boxed_str());
        let backend = Arc::new(ScriptedBackend::new(vec![long_output, "{\"ok\": 1}"]));
        let gateway = LlmGateway::new(Arc::clone(&backend) as Arc<dyn LlmBackend>, None, "e");
        complete_and_parse_json(&gateway, call_with("go"), 100_000)
            .await
            .unwrap();
        let requests = backend.requests.lock().unwrap();
        let assistant_turn = &requests[1].messages[1].content;
        assert!(assistant_turn.contains("[...output truncated for retry...]"));
        assert!(assistant_turn.len() < 2100);
    }
}
