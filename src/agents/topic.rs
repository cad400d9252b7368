//! Topic selector: picks the next research topic for tier 1.

use std::sync::Arc;

use tracing::info;

use super::retry::complete_and_parse_json;
use crate::config::PipelineConfig;
use crate::contract::schema::TopicReply;
use crate::error::Error;
use crate::gateway::message::user_message;
use crate::gateway::{CompletionCall, LlmGateway};
use crate::prompts;

/// The topic selector agent.
pub struct TopicSelector {
    gateway: Arc<LlmGateway>,
    config: Arc<PipelineConfig>,
}

impl TopicSelector {
    /// Creates the selector.
    #[must_use]
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<PipelineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Selects the next topic given existing brainstorms and past
    /// selection rejections.
    ///
    /// # Errors
    ///
    /// Returns gateway or contract errors.
    pub async fn select(
        &self,
        task_id: &str,
        user_prompt: &str,
        existing_topics: &str,
        rejection_context: &str,
    ) -> Result<TopicReply, Error> {
        let prompt = prompts::build_sectioned_prompt(
            prompts::TOPIC_SYSTEM_PROMPT,
            prompts::TOPIC_SCHEMA,
            &[
                ("USER PROMPT", user_prompt),
                ("EXISTING TOPICS", existing_topics),
                ("PAST SELECTION REJECTIONS", rejection_context),
            ],
            "Select the next topic as JSON:",
        );

        let available = self.config.available_input_tokens(
            self.config.validator_context_window,
            self.config.validator_max_output_tokens,
        );
        let call = CompletionCall {
            task_id: task_id.to_string(),
            role_id: "topic_selector".to_string(),
            model: self.config.validator_model.clone(),
            messages: vec![user_message(&prompt)],
            temperature: 0.0,
            max_tokens: Some(
                u32::try_from(self.config.validator_max_output_tokens).unwrap_or(u32::MAX),
            ),
        };
        let (value, _) = complete_and_parse_json(&self.gateway, call, available).await?;
        let reply = TopicReply::from_value(&value)?;
        info!(action = %reply.action, "topic selected");
        Ok(reply)
    }
}

impl std::fmt::Debug for TopicSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSelector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::{scripted_setup, ScriptedBackend};

    #[tokio::test]
    async fn test_select_new_topic() {
        let backend = ScriptedBackend::reply_forever(
            "{\"action\": \"new_topic\", \"topic\": \"horizon thermodynamics\", \"reasoning\": \"unexplored\"}",
        );
        let (gateway, _, config) = scripted_setup(backend);
        let selector = TopicSelector::new(gateway, config);
        let reply = selector.select("t", "goal", "", "").await.unwrap();
        assert_eq!(reply.action, "new_topic");
        assert_eq!(reply.topic, "horizon thermodynamics");
    }

    #[tokio::test]
    async fn test_invalid_action_errors() {
        let backend = ScriptedBackend::reply_forever(
            "{\"action\": \"give_up\", \"topic\": \"x\", \"reasoning\": \"r\"}",
        );
        let (gateway, _, config) = scripted_setup(backend);
        let selector = TopicSelector::new(gateway, config);
        assert!(selector.select("t", "goal", "", "").await.is_err());
    }
}
