//! services/api/src/test_support.rs
//!
//! Shared fakes for exercising the web layer without a database or any
//! upstream AI service. The mocks record what they are asked so tests
//! can assert on the calls, and only the methods the code under test
//! actually reaches are given behavior.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storyflow_core::domain::{
    CharacterEvent, CharacterProfile, CharacterRelationship, Chapter, ChapterVersion,
    EnvironmentDetails, Foundation, FoundationMessage, GenreDetails, NarrativeVector,
    NewFoundationMessage, Story, User, UserCredentials, WorldDetails,
};
use storyflow_core::ports::{
    ChapterBrief, ChatSuggestionService, DatabaseService, DraftedChapter, InterviewContext,
    InterviewReply, InterviewService, PortResult, SpeechToTextService, StoryQaService,
    StoryWriterService, TextToSpeechService,
};
use storyflow_core::stage::{Stage, StageStatus};
use tracing::Level;
use uuid::Uuid;

use crate::config::{ApiKeyStore, Config};
use crate::persistence::MessageSaveQueue;
use crate::web::state::AppState;

//=========================================================================================
// Database Mock
//=========================================================================================

/// Captured arguments of one `update_foundation_progress` call.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub foundation_id: Uuid,
    pub stage: Stage,
    pub stages: StageStatus,
    pub show_components: bool,
    pub thread_id: Option<String>,
}

/// In-memory `DatabaseService` that records what gets written to it.
#[derive(Default)]
pub struct MockDb {
    pub messages: Mutex<Vec<NewFoundationMessage>>,
    pub progress_updates: Mutex<Vec<ProgressUpdate>>,
    pub suggestion_rows: Mutex<Vec<(Uuid, Stage, Vec<String>)>>,
    /// Seed turns returned ahead of any queued saves by `list_messages`.
    pub transcript: Mutex<Vec<FoundationMessage>>,
    pub genre: Mutex<Option<GenreDetails>>,
    pub world: Mutex<Option<WorldDetails>>,
    pub characters: Mutex<Vec<CharacterProfile>>,
}

#[async_trait]
impl DatabaseService for MockDb {
    async fn create_user_with_email(
        &self,
        _email: &str,
        _hashed_password: &str,
    ) -> PortResult<User> {
        unimplemented!()
    }

    async fn get_user_by_email(&self, _email: &str) -> PortResult<UserCredentials> {
        unimplemented!()
    }

    async fn create_auth_session(
        &self,
        _session_id: &str,
        _user_id: Uuid,
        _expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn validate_auth_session(&self, _session_id: &str) -> PortResult<Uuid> {
        unimplemented!()
    }

    async fn delete_auth_session(&self, _session_id: &str) -> PortResult<()> {
        unimplemented!()
    }

    async fn create_foundation(&self, _user_id: Uuid, _name: &str) -> PortResult<Foundation> {
        unimplemented!()
    }

    async fn get_foundation(&self, _foundation_id: Uuid) -> PortResult<Foundation> {
        unimplemented!()
    }

    async fn list_foundations(&self, _user_id: Uuid) -> PortResult<Vec<Foundation>> {
        unimplemented!()
    }

    async fn update_foundation_profile(
        &self,
        _foundation_id: Uuid,
        _name: Option<&str>,
        _genre: Option<&str>,
        _description: Option<&str>,
    ) -> PortResult<Foundation> {
        unimplemented!()
    }

    async fn update_foundation_progress(
        &self,
        foundation_id: Uuid,
        stage: Stage,
        stages: StageStatus,
        show_components: bool,
        thread_id: Option<&str>,
    ) -> PortResult<()> {
        self.progress_updates.lock().unwrap().push(ProgressUpdate {
            foundation_id,
            stage,
            stages,
            show_components,
            thread_id: thread_id.map(String::from),
        });
        Ok(())
    }

    async fn delete_foundation(&self, _foundation_id: Uuid, _cascade: bool) -> PortResult<()> {
        unimplemented!()
    }

    async fn insert_message(&self, message: &NewFoundationMessage) -> PortResult<bool> {
        let mut messages = self.messages.lock().unwrap();
        if messages.iter().any(|m| m.client_key == message.client_key) {
            return Ok(false);
        }
        messages.push(message.clone());
        Ok(true)
    }

    async fn list_messages(&self, _foundation_id: Uuid) -> PortResult<Vec<FoundationMessage>> {
        let mut all = self.transcript.lock().unwrap().clone();
        let saved = self.messages.lock().unwrap().clone();
        all.extend(saved.into_iter().map(|m| FoundationMessage {
            id: Uuid::new_v4(),
            foundation_id: m.foundation_id,
            client_key: m.client_key,
            role: m.role,
            content: m.content,
            created_at: Utc::now(),
        }));
        Ok(all)
    }

    async fn get_genre_details(&self, _foundation_id: Uuid) -> PortResult<Option<GenreDetails>> {
        Ok(self.genre.lock().unwrap().clone())
    }

    async fn upsert_genre_details(
        &self,
        _foundation_id: Uuid,
        _details: &GenreDetails,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn get_world_details(&self, _foundation_id: Uuid) -> PortResult<Option<WorldDetails>> {
        Ok(self.world.lock().unwrap().clone())
    }

    async fn upsert_world_details(
        &self,
        _foundation_id: Uuid,
        _details: &WorldDetails,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn get_environment_details(
        &self,
        _foundation_id: Uuid,
    ) -> PortResult<Option<EnvironmentDetails>> {
        unimplemented!()
    }

    async fn upsert_environment_details(
        &self,
        _foundation_id: Uuid,
        _details: &EnvironmentDetails,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn create_character(
        &self,
        _foundation_id: Uuid,
        _name: &str,
    ) -> PortResult<CharacterProfile> {
        unimplemented!()
    }

    async fn get_character(&self, _character_id: Uuid) -> PortResult<CharacterProfile> {
        unimplemented!()
    }

    async fn list_characters(&self, _foundation_id: Uuid) -> PortResult<Vec<CharacterProfile>> {
        Ok(self.characters.lock().unwrap().clone())
    }

    async fn update_character(&self, _character: &CharacterProfile) -> PortResult<()> {
        unimplemented!()
    }

    async fn delete_character(&self, _character_id: Uuid) -> PortResult<()> {
        unimplemented!()
    }

    async fn add_character_relationship(
        &self,
        _from_character: Uuid,
        _to_character: Uuid,
        _relation: &str,
    ) -> PortResult<CharacterRelationship> {
        unimplemented!()
    }

    async fn list_character_relationships(
        &self,
        _foundation_id: Uuid,
    ) -> PortResult<Vec<CharacterRelationship>> {
        unimplemented!()
    }

    async fn record_character_event(
        &self,
        _character_id: Uuid,
        _chapter_id: Option<Uuid>,
        _description: &str,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn list_character_events(
        &self,
        _character_id: Uuid,
    ) -> PortResult<Vec<CharacterEvent>> {
        unimplemented!()
    }

    async fn create_story(
        &self,
        _foundation_id: Uuid,
        _user_id: Uuid,
        _title: &str,
        _premise: Option<&str>,
    ) -> PortResult<Story> {
        unimplemented!()
    }

    async fn get_story(&self, _story_id: Uuid) -> PortResult<Story> {
        unimplemented!()
    }

    async fn list_stories(&self, _user_id: Uuid) -> PortResult<Vec<Story>> {
        unimplemented!()
    }

    async fn delete_story(&self, _story_id: Uuid) -> PortResult<()> {
        unimplemented!()
    }

    async fn link_story_characters(
        &self,
        _story_id: Uuid,
        _character_ids: &[Uuid],
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn seed_narrative_vectors(&self, _story_id: Uuid) -> PortResult<Vec<NarrativeVector>> {
        unimplemented!()
    }

    async fn list_narrative_vectors(&self, _story_id: Uuid) -> PortResult<Vec<NarrativeVector>> {
        unimplemented!()
    }

    async fn update_narrative_vector(
        &self,
        _vector_id: Uuid,
        _user_id: Uuid,
        _intensity: f32,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn insert_chapter(
        &self,
        _story_id: Uuid,
        _title: &str,
        _content: &str,
    ) -> PortResult<Chapter> {
        unimplemented!()
    }

    async fn get_chapter(&self, _chapter_id: Uuid) -> PortResult<Chapter> {
        unimplemented!()
    }

    async fn list_chapters(&self, _story_id: Uuid) -> PortResult<Vec<Chapter>> {
        unimplemented!()
    }

    async fn update_chapter(
        &self,
        _chapter_id: Uuid,
        _title: &str,
        _content: &str,
    ) -> PortResult<Chapter> {
        unimplemented!()
    }

    async fn update_chapter_progress(
        &self,
        _chapter_id: Uuid,
        _new_progress_index: usize,
    ) -> PortResult<()> {
        unimplemented!()
    }

    async fn list_chapter_versions(
        &self,
        _chapter_id: Uuid,
    ) -> PortResult<Vec<ChapterVersion>> {
        unimplemented!()
    }

    async fn record_suggestions(
        &self,
        foundation_id: Uuid,
        stage: Stage,
        suggestions: &[String],
    ) -> PortResult<()> {
        self.suggestion_rows
            .lock()
            .unwrap()
            .push((foundation_id, stage, suggestions.to_vec()));
        Ok(())
    }
}

//=========================================================================================
// AI Service Mocks
//=========================================================================================

/// Captured arguments of one `stage_reply` call.
#[derive(Debug, Clone)]
pub struct RecordedInterviewCall {
    pub stage: Stage,
    pub thread_id: Option<String>,
    pub transcript_len: usize,
    pub user_text: String,
}

/// Scripted `InterviewService`. Replies are consumed front to back; an
/// exhausted script falls back to a bland prompt.
#[derive(Default)]
pub struct MockInterview {
    pub replies: Mutex<VecDeque<PortResult<InterviewReply>>>,
    pub calls: Mutex<Vec<RecordedInterviewCall>>,
}

impl MockInterview {
    pub fn scripted(replies: Vec<PortResult<InterviewReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl InterviewService for MockInterview {
    async fn stage_reply(
        &self,
        stage: Stage,
        thread_id: Option<&str>,
        context: &InterviewContext,
        user_text: &str,
    ) -> PortResult<InterviewReply> {
        self.calls.lock().unwrap().push(RecordedInterviewCall {
            stage,
            thread_id: thread_id.map(String::from),
            transcript_len: context.transcript_tail.len(),
            user_text: user_text.to_string(),
        });
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(InterviewReply {
                text: "Tell me more.".to_string(),
                thread_id: None,
            })
        })
    }
}

/// One-shot `ChatSuggestionService`. With nothing staged it returns an
/// empty list, which sends callers to the heuristic fallback.
#[derive(Default)]
pub struct MockSuggestions {
    pub response: Mutex<Option<PortResult<Vec<String>>>>,
}

#[async_trait]
impl ChatSuggestionService for MockSuggestions {
    async fn chat_suggestions(
        &self,
        _stage: Stage,
        _last_user: &str,
        _last_assistant: &str,
    ) -> PortResult<Vec<String>> {
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct StubStoryQa;

#[async_trait]
impl StoryQaService for StubStoryQa {
    async fn answer_story_question(&self, _question: &str, _context: &str) -> PortResult<String> {
        unimplemented!()
    }
}

pub struct StubWriter;

#[async_trait]
impl StoryWriterService for StubWriter {
    async fn draft_chapter(&self, _brief: &ChapterBrief) -> PortResult<DraftedChapter> {
        unimplemented!()
    }
}

pub struct StubStt;

#[async_trait]
impl SpeechToTextService for StubStt {
    async fn transcribe_audio(&self, _audio_data: &[u8]) -> PortResult<String> {
        unimplemented!()
    }
}

pub struct StubTts;

#[async_trait]
impl TextToSpeechService for StubTts {
    async fn generate_audio(&self, _text: &str) -> PortResult<Vec<u8>> {
        unimplemented!()
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://localhost/storyflow_test".to_string(),
        log_level: Level::WARN,
        frontend_origin: "http://localhost:5173".to_string(),
        openai_api_key: None,
        elevenlabs_api_key: None,
        tts_provider: "openai".to_string(),
        tts_voice: "nova".to_string(),
        elevenlabs_voice_id: "test-voice".to_string(),
        stt_model: "whisper-1".to_string(),
        interview_model: "gpt-4o".to_string(),
        suggestion_model: "gpt-4o-mini".to_string(),
        qa_model: "gpt-4o-mini".to_string(),
        writer_model: "gpt-4o".to_string(),
        message_retry_base_ms: 1,
        message_max_retries: 2,
        message_drain_secs: 1,
    }
}

/// A fresh foundation at the opening stage with nothing completed.
pub fn test_foundation() -> Foundation {
    Foundation {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        name: "Emberfall".to_string(),
        genre: None,
        description: None,
        thread_id: None,
        current_stage: Stage::Genre,
        show_components: false,
        stages: StageStatus::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Wires the fakes into a full `AppState`.
pub fn test_app_state(
    db: Arc<MockDb>,
    interview: Arc<MockInterview>,
    suggestions: Arc<MockSuggestions>,
) -> Arc<AppState> {
    let save_queue = MessageSaveQueue::new(
        db.clone(),
        Duration::from_millis(1),
        2,
        Duration::from_millis(20),
    );
    Arc::new(AppState {
        db,
        config: Arc::new(test_config()),
        keys: ApiKeyStore::new(None, None),
        save_queue,
        interview_adapter: interview,
        suggestion_adapter: suggestions,
        story_qa_adapter: Arc::new(StubStoryQa),
        writer_adapter: Arc::new(StubWriter),
        stt_adapter: Arc::new(StubStt),
        tts_adapter: Arc::new(StubTts),
    })
}
