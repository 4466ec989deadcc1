//! crates/storyflow_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    CharacterEvent, CharacterProfile, CharacterRelationship, Chapter, ChapterVersion,
    EnvironmentDetails, Foundation, FoundationMessage, GenreDetails, MessageRole,
    NarrativeVector, NewFoundationMessage, Story, User, UserCredentials, WorldDetails,
};
use crate::stage::{Stage, StageStatus};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Missing API key for {0}")]
    MissingApiKey(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth Methods ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Foundation Management ---
    async fn create_foundation(&self, user_id: Uuid, name: &str) -> PortResult<Foundation>;

    async fn get_foundation(&self, foundation_id: Uuid) -> PortResult<Foundation>;

    async fn list_foundations(&self, user_id: Uuid) -> PortResult<Vec<Foundation>>;

    async fn update_foundation_profile(
        &self,
        foundation_id: Uuid,
        name: Option<&str>,
        genre: Option<&str>,
        description: Option<&str>,
    ) -> PortResult<Foundation>;

    /// Persists the interview's position in one shot: current stage,
    /// per-stage completion flags, component visibility and the bound
    /// conversation handle (last write wins).
    async fn update_foundation_progress(
        &self,
        foundation_id: Uuid,
        stage: Stage,
        stages: StageStatus,
        show_components: bool,
        thread_id: Option<&str>,
    ) -> PortResult<()>;

    /// Deletes a foundation and its satellite records. When `cascade` is
    /// set, stories grown from the foundation go with it; otherwise those
    /// stories survive as orphans.
    async fn delete_foundation(&self, foundation_id: Uuid, cascade: bool) -> PortResult<()>;

    // --- Message Management ---
    /// Inserts one chat turn. Returns `false` when a row with the same
    /// `client_key` already exists (the insert was a redelivery).
    async fn insert_message(&self, message: &NewFoundationMessage) -> PortResult<bool>;

    async fn list_messages(&self, foundation_id: Uuid) -> PortResult<Vec<FoundationMessage>>;

    // --- Stage Detail Records ---
    async fn get_genre_details(&self, foundation_id: Uuid) -> PortResult<Option<GenreDetails>>;

    async fn upsert_genre_details(
        &self,
        foundation_id: Uuid,
        details: &GenreDetails,
    ) -> PortResult<()>;

    async fn get_world_details(&self, foundation_id: Uuid) -> PortResult<Option<WorldDetails>>;

    async fn upsert_world_details(
        &self,
        foundation_id: Uuid,
        details: &WorldDetails,
    ) -> PortResult<()>;

    async fn get_environment_details(
        &self,
        foundation_id: Uuid,
    ) -> PortResult<Option<EnvironmentDetails>>;

    async fn upsert_environment_details(
        &self,
        foundation_id: Uuid,
        details: &EnvironmentDetails,
    ) -> PortResult<()>;

    // --- Character Management ---
    async fn create_character(&self, foundation_id: Uuid, name: &str)
        -> PortResult<CharacterProfile>;

    async fn get_character(&self, character_id: Uuid) -> PortResult<CharacterProfile>;

    async fn list_characters(&self, foundation_id: Uuid) -> PortResult<Vec<CharacterProfile>>;

    async fn update_character(&self, character: &CharacterProfile) -> PortResult<()>;

    async fn delete_character(&self, character_id: Uuid) -> PortResult<()>;

    async fn add_character_relationship(
        &self,
        from_character: Uuid,
        to_character: Uuid,
        relation: &str,
    ) -> PortResult<CharacterRelationship>;

    async fn list_character_relationships(
        &self,
        foundation_id: Uuid,
    ) -> PortResult<Vec<CharacterRelationship>>;

    async fn record_character_event(
        &self,
        character_id: Uuid,
        chapter_id: Option<Uuid>,
        description: &str,
    ) -> PortResult<()>;

    async fn list_character_events(&self, character_id: Uuid)
        -> PortResult<Vec<CharacterEvent>>;

    // --- Story Management ---
    async fn create_story(
        &self,
        foundation_id: Uuid,
        user_id: Uuid,
        title: &str,
        premise: Option<&str>,
    ) -> PortResult<Story>;

    async fn get_story(&self, story_id: Uuid) -> PortResult<Story>;

    async fn list_stories(&self, user_id: Uuid) -> PortResult<Vec<Story>>;

    async fn delete_story(&self, story_id: Uuid) -> PortResult<()>;

    async fn link_story_characters(
        &self,
        story_id: Uuid,
        character_ids: &[Uuid],
    ) -> PortResult<()>;

    /// Seeds the default steering sliders for a fresh story.
    async fn seed_narrative_vectors(&self, story_id: Uuid) -> PortResult<Vec<NarrativeVector>>;

    async fn list_narrative_vectors(&self, story_id: Uuid) -> PortResult<Vec<NarrativeVector>>;

    /// Adjusts one steering slider. Scoped to `user_id` so a caller can
    /// only move sliders on their own stories.
    async fn update_narrative_vector(
        &self,
        vector_id: Uuid,
        user_id: Uuid,
        intensity: f32,
    ) -> PortResult<()>;

    // --- Chapter Management ---
    async fn insert_chapter(
        &self,
        story_id: Uuid,
        title: &str,
        content: &str,
    ) -> PortResult<Chapter>;

    async fn get_chapter(&self, chapter_id: Uuid) -> PortResult<Chapter>;

    async fn list_chapters(&self, story_id: Uuid) -> PortResult<Vec<Chapter>>;

    /// Replaces a chapter's title and body, archiving the superseded body
    /// as a version row first.
    async fn update_chapter(
        &self,
        chapter_id: Uuid,
        title: &str,
        content: &str,
    ) -> PortResult<Chapter>;

    async fn update_chapter_progress(
        &self,
        chapter_id: Uuid,
        new_progress_index: usize,
    ) -> PortResult<()>;

    async fn list_chapter_versions(&self, chapter_id: Uuid) -> PortResult<Vec<ChapterVersion>>;

    // --- Suggestion Audit Trail ---
    async fn record_suggestions(
        &self,
        foundation_id: Uuid,
        stage: Stage,
        suggestions: &[String],
    ) -> PortResult<()>;
}

//=========================================================================================
// AI Service Ports
//=========================================================================================

/// Conversation state handed to the interview model alongside each turn.
#[derive(Debug, Clone, Default)]
pub struct InterviewContext {
    pub foundation_name: String,
    pub genre: Option<String>,
    pub world: Option<String>,
    pub character_names: Vec<String>,
    /// The most recent turns, oldest first, for models without their own
    /// thread memory.
    pub transcript_tail: Vec<(MessageRole, String)>,
}

/// What the interview model returned for one turn.
#[derive(Debug, Clone)]
pub struct InterviewReply {
    pub text: String,
    /// Conversation handle reported by the upstream service, when it
    /// opened or continued one.
    pub thread_id: Option<String>,
}

#[async_trait]
pub trait InterviewService: Send + Sync {
    /// Produces the assistant's next conversational turn for the given
    /// stage, continuing `thread_id` when one is already bound.
    async fn stage_reply(
        &self,
        stage: Stage,
        thread_id: Option<&str>,
        context: &InterviewContext,
        user_text: &str,
    ) -> PortResult<InterviewReply>;
}

#[async_trait]
pub trait ChatSuggestionService: Send + Sync {
    /// Proposes short reply chips the user could tap for their next turn.
    async fn chat_suggestions(
        &self,
        stage: Stage,
        last_user: &str,
        last_assistant: &str,
    ) -> PortResult<Vec<String>>;
}

#[async_trait]
pub trait StoryQaService: Send + Sync {
    /// Answers a reader's question using the chapter text as context.
    async fn answer_story_question(&self, question: &str, context: &str) -> PortResult<String>;
}

/// Everything the chapter writer needs to draft prose.
#[derive(Debug, Clone, Default)]
pub struct ChapterBrief {
    pub story_title: String,
    pub premise: Option<String>,
    pub genre: Option<GenreDetails>,
    pub world: Option<WorldDetails>,
    pub characters: Vec<CharacterProfile>,
    pub previous_chapter: Option<String>,
    /// Free-text steering from the user ("make it darker", "introduce the
    /// rival here").
    pub direction: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DraftedChapter {
    pub title: String,
    pub content: String,
}

#[async_trait]
pub trait StoryWriterService: Send + Sync {
    /// Drafts the next chapter of a story from the assembled brief.
    async fn draft_chapter(&self, brief: &ChapterBrief) -> PortResult<DraftedChapter>;
}

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes a slice of audio data into text.
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String>;
}

#[async_trait]
pub trait TextToSpeechService: Send + Sync {
    /// Generates audio data from a string of text.
    async fn generate_audio(&self, text: &str) -> PortResult<Vec<u8>>;
}
