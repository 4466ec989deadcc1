//! services/api/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::{ApiKeyStore, Config};
use crate::persistence::MessageSaveQueue;
use std::sync::Arc;
use storyflow_core::ports::{
    ChatSuggestionService, DatabaseService, InterviewService, PortResult, SpeechToTextService,
    StoryQaService, StoryWriterService, TextToSpeechService,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub keys: ApiKeyStore,
    pub save_queue: Arc<MessageSaveQueue>,
    pub interview_adapter: Arc<dyn InterviewService>,
    pub suggestion_adapter: Arc<dyn ChatSuggestionService>,
    pub story_qa_adapter: Arc<dyn StoryQaService>,
    pub writer_adapter: Arc<dyn StoryWriterService>,
    pub stt_adapter: Arc<dyn SpeechToTextService>,
    pub tts_adapter: Arc<dyn TextToSpeechService>,
}

//=========================================================================================
// VoiceSessionState (Specific to One Voice-Creation WebSocket Connection)
//=========================================================================================

/// The state for a single voice-guided creation connection. Audio frames
/// accumulate only between `UtteranceStarted` and `UtteranceEnded`.
pub struct VoiceSessionState {
    pub user_id: Uuid,
    pub foundation_id: Uuid,
    pub capturing: bool,
    pub audio_buffer: Vec<u8>,
}

impl VoiceSessionState {
    pub fn new(user_id: Uuid, foundation_id: Uuid) -> Self {
        Self {
            user_id,
            foundation_id,
            capturing: false,
            audio_buffer: Vec::new(),
        }
    }
}

//=========================================================================================
// ReaderSessionState (Specific to One Story-Reader WebSocket Connection)
//=========================================================================================

/// An enum representing the current mode of the user's reader session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderMode {
    Reading,
    InterruptedListening,
    ProcessingQuestion,
    Paused,
}

/// The state for a single, active story-reader WebSocket connection.
pub struct ReaderSessionState {
    pub user_id: Uuid,
    pub story_id: Uuid,
    pub chapter_id: Uuid,
    pub sentences: Vec<String>,
    pub reading_progress_index: usize,
    pub current_mode: ReaderMode,
    pub audio_buffer: Vec<u8>,
    pub last_question: Option<String>,
    pub last_answer: Option<String>,
    /// A token to gracefully cancel the current narration task.
    pub cancellation_token: CancellationToken,
}

impl ReaderSessionState {
    /// Creates a new `ReaderSessionState` by fetching the required data from the database.
    pub async fn new(app_state: Arc<AppState>, chapter_id: Uuid) -> PortResult<Self> {
        let chapter = app_state.db.get_chapter(chapter_id).await?;
        let story = app_state.db.get_story(chapter.story_id).await?;

        let sentences = chunk_into_sentences(&chapter.content);

        Ok(Self {
            user_id: story.user_id,
            story_id: story.id,
            chapter_id,
            sentences,
            reading_progress_index: chapter.reading_progress_index,
            current_mode: ReaderMode::Reading,
            audio_buffer: Vec::new(),
            last_question: None,
            last_answer: None,
            // The token is initialized here for the first narration task.
            cancellation_token: CancellationToken::new(),
        })
    }
}

/// A helper function to split a block of text into sentences.
fn chunk_into_sentences(text: &str) -> Vec<String> {
    text.split(|c: char| c == '.' || c == '?' || c == '!')
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("{}.", s.trim()))
        .collect()
}
