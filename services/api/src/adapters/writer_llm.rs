//! services/api/src/adapters/writer_llm.rs
//!
//! This module contains the adapter for the chapter-writing LLM.
//! It implements the `StoryWriterService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a novelist drafting the next chapter of an ongoing story.

You receive a STORY BRIEF describing the genre, the world, the cast, what happened in the previous chapter, and optionally a direction from the author.

Rules for your draft:
- Write immersive prose in the genre's voice. Show, don't summarize.
- Stay consistent with every fact in the brief: names, places, tone, and what already happened.
- If the author gave a DIRECTION, honor it; otherwise continue naturally from where the story left off.
- Aim for a complete scene or two, roughly 600 to 1200 words.
- Do not write "The End" and do not resolve the whole story; this is one chapter of many.

Output format:
- First line: TITLE: <a short evocative chapter title>
- Then a blank line, then the chapter prose. No other headers, no markdown."#;

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
use storyflow_core::ports::{
    ChapterBrief, DraftedChapter, PortError, PortResult, StoryWriterService,
};

/// How much of the previous chapter rides along in the brief.
const PREVIOUS_CHAPTER_TAIL_CHARS: usize = 2000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `StoryWriterService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiWriterAdapter {
    keys: ApiKeyStore,
    model: String,
}

impl OpenAiWriterAdapter {
    /// Creates a new `OpenAiWriterAdapter`.
    pub fn new(keys: ApiKeyStore, model: String) -> Self {
        Self { keys, model }
    }

    fn render_brief(brief: &ChapterBrief) -> String {
        let mut sections = vec![format!("STORY: {}", brief.story_title)];

        if let Some(premise) = &brief.premise {
            sections.push(format!("PREMISE: {}", premise));
        }

        if let Some(genre) = &brief.genre {
            let name = genre.name.as_deref().unwrap_or("unspecified");
            let tone = genre.tone.as_deref().unwrap_or("unspecified");
            sections.push(format!(
                "GENRE: {} (tone: {}, themes: {})",
                name,
                tone,
                genre.themes.join(", ")
            ));
        }

        if let Some(world) = &brief.world {
            let name = world.name.as_deref().unwrap_or("the world");
            let description = world.description.as_deref().unwrap_or("");
            sections.push(format!("WORLD: {} - {}", name, description));
        }

        if !brief.characters.is_empty() {
            let cast = brief
                .characters
                .iter()
                .map(|c| {
                    format!(
                        "- {} ({}): {}",
                        c.name,
                        c.role.as_deref().unwrap_or("unspecified role"),
                        c.description.as_deref().unwrap_or("no description yet")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("CAST:\n{}", cast));
        }

        if let Some(previous) = &brief.previous_chapter {
            let tail_start = previous
                .len()
                .saturating_sub(PREVIOUS_CHAPTER_TAIL_CHARS);
            // Avoid slicing through a multi-byte character.
            let boundary = previous
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| i >= tail_start)
                .unwrap_or(0);
            sections.push(format!("PREVIOUS CHAPTER (ending):\n{}", &previous[boundary..]));
        }

        if let Some(direction) = &brief.direction {
            sections.push(format!("DIRECTION FROM THE AUTHOR: {}", direction));
        }

        sections.join("\n\n")
    }

    /// Splits the model output into its title line and prose body.
    fn parse_draft(raw: &str) -> DraftedChapter {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("TITLE:") {
            let mut parts = rest.splitn(2, '\n');
            let title = parts.next().unwrap_or("").trim().to_string();
            let content = parts.next().unwrap_or("").trim().to_string();
            if !title.is_empty() && !content.is_empty() {
                return DraftedChapter { title, content };
            }
        }

        DraftedChapter {
            title: "A New Chapter".to_string(),
            content: trimmed.to_string(),
        }
    }
}

//=========================================================================================
// `StoryWriterService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryWriterService for OpenAiWriterAdapter {
    /// Drafts the next chapter of a story from the assembled brief.
    async fn draft_chapter(&self, brief: &ChapterBrief) -> PortResult<DraftedChapter> {
        let key = self
            .keys
            .openai()
            .await
            .ok_or_else(|| PortError::MissingApiKey("openai".to_string()))?;
        let client = Client::with_config(OpenAIConfig::new().with_api_key(key));

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(Self::render_brief(brief))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.9)
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
                PortError::Unexpected("Writer LLM returned no text content.".to_string())
            })?;

        Ok(Self::parse_draft(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titled_output_splits_cleanly() {
        let draft = OpenAiWriterAdapter::parse_draft(
            "TITLE: The Harbor Bell\n\nThe bell rang twice before dawn.",
        );
        assert_eq!(draft.title, "The Harbor Bell");
        assert_eq!(draft.content, "The bell rang twice before dawn.");
    }

    #[test]
    fn untitled_output_falls_back_to_a_default_title() {
        let draft = OpenAiWriterAdapter::parse_draft("The bell rang twice before dawn.");
        assert_eq!(draft.title, "A New Chapter");
        assert_eq!(draft.content, "The bell rang twice before dawn.");
    }

    #[test]
    fn brief_lists_the_cast_and_direction() {
        let brief = ChapterBrief {
            story_title: "Saltwater Crown".to_string(),
            direction: Some("introduce the rival captain".to_string()),
            ..Default::default()
        };
        let rendered = OpenAiWriterAdapter::render_brief(&brief);
        assert!(rendered.contains("STORY: Saltwater Crown"));
        assert!(rendered.contains("DIRECTION FROM THE AUTHOR: introduce the rival captain"));
    }
}
