//! services/api/src/adapters/story_qa_llm.rs
//!
//! This module contains the adapter for the read-aloud Question-Answering LLM.
//! It implements the `StoryQaService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are the storyteller's voice, answering a listener's questions about a story being read aloud.

The context you receive can include:
- STORY CONTEXT: the chapter text around the listener's current position.
- PREVIOUS Q&A: the listener's last question and your last answer.

Your role:
- ALWAYS answer in a natural, spoken, conversational way. Your answer will be read aloud.
- Stay inside the story's world: characters, places, events, and what they might mean.
- It's fine to speculate about what could happen next, as long as you present it as speculation.
- Keep answers to a few sentences; go longer only when the question truly needs it.
- Never use markdown, headings, or bullet points. Plain spoken sentences only.

How to decide if your ANSWER is RELATED:
- RELATED = about this story: its characters, places, plot, themes, or a follow-up to the PREVIOUS Q&A.
- UNRELATED = clearly about something else entirely (the listener's errands, other media, current events).
- When in doubt, classify as RELATED.

Classification output:
- At the VERY END of your response, on a new final line, write EXACTLY ONE of:
  RELATEDNESS: RELATED
  or
  RELATEDNESS: UNRELATED

IMPORTANT:
- Do NOT output any special rejection message for unrelated questions. Always give your best answer first.
- The caller will handle unrelated questions by looking at your final RELATEDNESS line."#;

const USER_INPUT_TEMPLATE: &str = r#"CONTEXT:
---
{context}
---

QUESTION:
{question}

Answer the QUESTION in a natural spoken voice using the CONTEXT, then on the FINAL line write EXACTLY:
RELATEDNESS: RELATED
or
RELATEDNESS: UNRELATED"#;

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
use regex::Regex;

use crate::config::ApiKeyStore;
use storyflow_core::ports::{PortError, PortResult, StoryQaService};

/// The spoken reply used in place of an answer that wandered off-story.
const OFF_STORY_REPLY: &str = "I'm sorry, I didn't catch how that relates to the story \
we're reading. Could you ask that again?";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `StoryQaService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiStoryQaAdapter {
    keys: ApiKeyStore,
    model: String,
}

impl OpenAiStoryQaAdapter {
    /// Creates a new `OpenAiStoryQaAdapter`.
    pub fn new(keys: ApiKeyStore, model: String) -> Self {
        Self { keys, model }
    }

    /// Strips markdown the model sometimes emits despite instructions, so
    /// the text reads cleanly through TTS.
    fn strip_markdown(text: &str) -> String {
        let emphasis = Regex::new(r"[*_#`]+").unwrap();
        let flattened = emphasis.replace_all(text, "");
        flattened
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

//=========================================================================================
// `StoryQaService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryQaService for OpenAiStoryQaAdapter {
    /// Answers a listener's question using the chapter text as context.
    async fn answer_story_question(&self, question: &str, context: &str) -> PortResult<String> {
        let key = self
            .keys
            .openai()
            .await
            .ok_or_else(|| PortError::MissingApiKey("openai".to_string()))?;
        let client = Client::with_config(OpenAIConfig::new().with_api_key(key));

        let user_input = USER_INPUT_TEMPLATE
            .replace("{context}", context)
            .replace("{question}", question);

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_input)
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

        let raw_answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let mut lines: Vec<&str> = raw_answer.lines().collect();

        let (classification, answer_body) = match lines.last() {
            Some(last) if last.trim().starts_with("RELATEDNESS:") => {
                let classification = last
                    .trim()
                    .trim_start_matches("RELATEDNESS:")
                    .trim()
                    .to_string();

                // remove the classification line
                lines.pop();

                let answer_body = lines.join(" ").trim().to_string();
                (classification, answer_body)
            }
            _ => {
                // Fallback: no classification line means RELATED and the full answer stands.
                ("RELATED".to_string(), raw_answer.trim().to_string())
            }
        };

        let final_answer = if classification.eq_ignore_ascii_case("UNRELATED") {
            OFF_STORY_REPLY.to_string()
        } else {
            answer_body
        };

        Ok(Self::strip_markdown(&final_answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_is_flattened_for_speech() {
        let cleaned = OpenAiStoryQaAdapter::strip_markdown(
            "**Issa** is the ferry pilot.\n\n## Why it matters\nShe owes the harbor guild.",
        );
        assert_eq!(
            cleaned,
            "Issa is the ferry pilot. Why it matters She owes the harbor guild."
        );
    }
}
