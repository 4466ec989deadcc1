//! services/api/src/adapters/suggestions_llm.rs
//!
//! This module contains the adapter for the quick-reply suggestion LLM.
//! It implements the `ChatSuggestionService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    error::OpenAIError,
    Client,
};
use async_trait::async_trait;

use crate::config::ApiKeyStore;
use storyflow_core::ports::{ChatSuggestionService, PortError, PortResult};
use storyflow_core::stage::Stage;
use storyflow_core::suggestions::MAX_SUGGESTIONS;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatSuggestionService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiSuggestionAdapter {
    keys: ApiKeyStore,
    model: String,
}

impl OpenAiSuggestionAdapter {
    /// Creates a new `OpenAiSuggestionAdapter`.
    pub fn new(keys: ApiKeyStore, model: String) -> Self {
        Self { keys, model }
    }

    /// Pulls a JSON string array out of the model output, tolerating the
    /// common code-fence wrapping.
    fn parse_suggestions(raw: &str) -> PortResult<Vec<String>> {
        let trimmed = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let items: Vec<String> = serde_json::from_str(trimmed).map_err(|e| {
            PortError::Unexpected(format!("Suggestion LLM returned unparseable output: {}", e))
        })?;

        Ok(items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_SUGGESTIONS)
            .collect())
    }
}

//=========================================================================================
// `ChatSuggestionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatSuggestionService for OpenAiSuggestionAdapter {
    /// Proposes short reply chips for the user's next conversational turn.
    async fn chat_suggestions(
        &self,
        stage: Stage,
        last_user: &str,
        last_assistant: &str,
    ) -> PortResult<Vec<String>> {
        let key = self
            .keys
            .openai()
            .await
            .ok_or_else(|| PortError::MissingApiKey("openai".to_string()))?;
        let client = Client::with_config(OpenAIConfig::new().with_api_key(key));

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(
                    "You suggest quick replies for a writer in a story-creation chat. \
                     Given the conversation phase and the last exchange, propose 2 to 4 \
                     replies the writer might tap next. Each reply must be under eight \
                     words, phrased in the writer's voice, and directly usable as-is. \
                     If the assistant offered explicit options, the options themselves \
                     come first. Respond with ONLY a JSON array of strings, no prose, \
                     no code fences.",
                )
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!(
                    "PHASE: {}\n\nASSISTANT SAID:\n{}\n\nWRITER LAST SAID:\n{}",
                    stage, last_assistant, last_user
                ))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Suggestion LLM response contained no text.".to_string())
            })?;

        Self::parse_suggestions(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_json_array() {
        let parsed = OpenAiSuggestionAdapter::parse_suggestions(
            r#"["A haunted port city", "Somewhere colder", "Surprise me"]"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec!["A haunted port city", "Somewhere colder", "Surprise me"]
        );
    }

    #[test]
    fn strips_code_fences_and_caps_the_count() {
        let parsed = OpenAiSuggestionAdapter::parse_suggestions(
            "```json\n[\"One\", \"Two\", \"Three\", \"Four\", \"Five\"]\n```",
        )
        .unwrap();
        assert_eq!(parsed.len(), MAX_SUGGESTIONS);
        assert_eq!(parsed[0], "One");
    }

    #[test]
    fn prose_output_is_an_error() {
        assert!(OpenAiSuggestionAdapter::parse_suggestions("Here are some ideas!").is_err());
    }
}
