//! services/api/src/adapters/interview_llm.rs
//!
//! This module contains the adapter for the guided-interview LLM.
//! It implements the `InterviewService` port from the `core` crate.

const BASE_INSTRUCTIONS: &str = r#"You are a story-world creation guide helping a writer build the foundation for their story through a friendly interview.

Your style:
- Sound like an enthusiastic collaborator, not a form to fill in.
- Ask ONE focused question at a time and build on what the writer already told you.
- Keep replies to a short paragraph or two; this is a conversation, not an essay.
- Use contractions and a warm, encouraging tone.
- Never mention stages, trackers, or any internal mechanics. The writer only sees a conversation.

Finishing a phase:
- When the writer has given you enough for the current phase, wrap it up in one reply: summarize what you captured, then confirm with the EXACT wording the phase instructions give you (for example "I've created your genre profile.").
- Only use that wording when the phase is genuinely done. Never use it while you are still asking questions."#;

const GENRE_STAGE: &str = r#"CURRENT PHASE: Genre.
Help the writer settle on the kind of story they want to tell: genre, tone, major themes, and who the story is for. Offer two or three concrete genre directions if they seem stuck.
When you have a genre, a tone, and at least one theme, wrap up with: "I've created your genre profile. Your genre is set." Then invite them to start picturing the world."#;

const WORLD_STAGE: &str = r#"CURRENT PHASE: World.
Help the writer describe the world the story lives in: its name if they want one, the broad setting, notable regions, the time period, and how much magic or technology exists. One or two vivid specifics beat a long inventory.
When the world has a description and a feel, wrap up with: "I've created your world. Your world is set." Then ask who lives in it."#;

const CHARACTERS_STAGE: &str = r#"CURRENT PHASE: Characters.
Help the writer invent the people of the story: a protagonist first, then any companions or antagonists they want. For each character draw out a name, a role, and a line or two of description or backstory.
When there is at least a protagonist with a role and a description, wrap up with: "I've created your cast of characters." Then ask what stories or works inspire them."#;

const INFLUENCES_STAGE: &str = r#"CURRENT PHASE: Influences.
Ask which books, films, games, or authors the writer wants this story to feel like, and what specifically they love about each. Reflect back how those influences could shape the story.
When you have a sense of their influences, wrap up with: "I've put together your influences." Then offer to fine-tune the remaining details."#;

const DETAILS_STAGE: &str = r#"CURRENT PHASE: Details.
Tighten the remaining specifics: plot seeds, conflicts, stakes, pacing preferences, or anything the writer wants to pin down before the story begins. Keep it light; this phase is optional polish.
When the writer seems satisfied, wrap up with: "I've crafted the final details." Then let them know the story can begin whenever they're ready."#;

const READY_STAGE: &str = r#"CURRENT PHASE: Ready.
The foundation is complete. Answer any remaining questions about the world, celebrate what the writer built, and encourage them to begin their story. Do not reopen earlier phases unless they ask."#;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    error::OpenAIError,
    Client,
};
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::ApiKeyStore;
use storyflow_core::domain::MessageRole;
use storyflow_core::ports::{InterviewContext, InterviewReply, InterviewService, PortError, PortResult};
use storyflow_core::stage::Stage;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `InterviewService` using an OpenAI-compatible LLM.
///
/// The upstream chat API is stateless, so the conversation handle this
/// adapter reports is minted locally; continuity comes from the transcript
/// tail included in every request.
#[derive(Clone)]
pub struct OpenAiInterviewAdapter {
    keys: ApiKeyStore,
    model: String,
}

impl OpenAiInterviewAdapter {
    /// Creates a new `OpenAiInterviewAdapter`.
    pub fn new(keys: ApiKeyStore, model: String) -> Self {
        Self { keys, model }
    }

    /// Builds a client from the current key. Keys can change at runtime,
    /// so this happens on every call rather than at startup.
    async fn client(&self) -> PortResult<Client<OpenAIConfig>> {
        let key = self
            .keys
            .openai()
            .await
            .ok_or_else(|| PortError::MissingApiKey("openai".to_string()))?;
        Ok(Client::with_config(OpenAIConfig::new().with_api_key(key)))
    }

    fn stage_instructions(stage: Stage) -> &'static str {
        match stage {
            Stage::Genre => GENRE_STAGE,
            Stage::World => WORLD_STAGE,
            Stage::Characters => CHARACTERS_STAGE,
            Stage::Influences => INFLUENCES_STAGE,
            Stage::Details => DETAILS_STAGE,
            Stage::Ready => READY_STAGE,
        }
    }

    fn context_block(context: &InterviewContext) -> String {
        let genre = context.genre.as_deref().unwrap_or("not chosen yet");
        let world = context.world.as_deref().unwrap_or("not described yet");
        let characters = if context.character_names.is_empty() {
            "none yet".to_string()
        } else {
            context.character_names.join(", ")
        };
        format!(
            "WORLD SO FAR:\nFoundation: {}\nGenre: {}\nWorld: {}\nCharacters: {}",
            context.foundation_name, genre, world, characters
        )
    }
}

//=========================================================================================
// `InterviewService` Trait Implementation
//=========================================================================================

#[async_trait]
impl InterviewService for OpenAiInterviewAdapter {
    /// Produces the assistant's next conversational turn for the given stage.
    async fn stage_reply(
        &self,
        stage: Stage,
        thread_id: Option<&str>,
        context: &InterviewContext,
        user_text: &str,
    ) -> PortResult<InterviewReply> {
        let client = self.client().await?;

        let system_content = format!(
            "{}\n\n{}\n\n{}",
            BASE_INSTRUCTIONS,
            Self::stage_instructions(stage),
            Self::context_block(context)
        );

        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_content)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        for (role, text) in &context.transcript_tail {
            let message = match role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(text.as_str())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
            };
            messages.push(message);
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_text)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.8)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Interview LLM returned no text content.".to_string())
            })?;

        // Continue the bound thread when one exists; otherwise mint a fresh
        // handle so the caller can bind it.
        let thread_id = thread_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("thread_{}", Uuid::new_v4().simple()));

        Ok(InterviewReply {
            text,
            thread_id: Some(thread_id),
        })
    }
}
