//! crates/storyflow_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP framework;
//! detail records additionally guarantee a lossless serde round-trip
//! because creation progress is persisted as JSON on the client side.

use crate::stage::{Stage, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Users and Auth
//=========================================================================================

// Represents a user - used throughout the app.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie).
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Foundation (the creation-session container)
//=========================================================================================

/// The top-level container for one story world's guided creation
/// session: genre summary, world description, the bound AI thread and
/// the interview's stage progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Foundation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub genre: Option<String>,
    pub description: Option<String>,
    /// Opaque conversation handle from the upstream AI service.
    /// Last-write-wins; see the thread-binding rules in the interview
    /// engine.
    pub thread_id: Option<String>,
    pub current_stage: Stage,
    pub show_components: bool,
    pub stages: StageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role: '{other}'")),
        }
    }
}

/// One persisted chat turn. Append-only; transcript order is
/// `created_at` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundationMessage {
    pub id: Uuid,
    pub foundation_id: Uuid,
    /// Client-generated idempotency key: redelivery of the same logical
    /// message can never produce a second row.
    pub client_key: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A chat turn on its way to storage. The `client_key` is fixed at
/// creation and reused across every retry of the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFoundationMessage {
    pub foundation_id: Uuid,
    pub client_key: Uuid,
    pub role: MessageRole,
    pub content: String,
}

impl NewFoundationMessage {
    pub fn new(foundation_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            foundation_id,
            client_key: Uuid::new_v4(),
            role,
            content: content.into(),
        }
    }
}

//=========================================================================================
// Detail Records (progressively filled, defaulted on completion)
//=========================================================================================

/// Genre profile built up during the genre stage. Fields stay optional
/// while the conversation is in flight; `with_defaults` fills the gaps
/// before the record is handed to the story experience.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenreDetails {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    pub tone: Option<String>,
    pub audience: Option<String>,
    pub thread_id: Option<String>,
}

impl GenreDetails {
    pub fn is_complete(&self) -> bool {
        required_present(&self.name) && required_present(&self.description)
    }

    pub fn with_defaults(mut self) -> Self {
        default_field(&mut self.name, "Untitled genre");
        default_field(&mut self.description, "A genre still finding its shape.");
        default_field(&mut self.tone, "Balanced");
        default_field(&mut self.audience, "General");
        self
    }
}

/// World summary: the broad strokes of the setting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldDetails {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    pub time_period: Option<String>,
    pub magic_level: Option<String>,
    pub technology_level: Option<String>,
    pub thread_id: Option<String>,
}

impl WorldDetails {
    pub fn is_complete(&self) -> bool {
        required_present(&self.name) && required_present(&self.description)
    }

    pub fn with_defaults(mut self) -> Self {
        default_field(&mut self.name, "Unnamed world");
        default_field(&mut self.description, "A world waiting to be described.");
        default_field(&mut self.time_period, "Timeless");
        default_field(&mut self.magic_level, "None");
        default_field(&mut self.technology_level, "Pre-industrial");
        self
    }
}

/// Environment texture layered on top of the world record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentDetails {
    pub name: Option<String>,
    pub description: Option<String>,
    pub climate: Option<String>,
    #[serde(default)]
    pub landmarks: Vec<String>,
    pub atmosphere: Option<String>,
    pub thread_id: Option<String>,
}

impl EnvironmentDetails {
    pub fn is_complete(&self) -> bool {
        required_present(&self.name) && required_present(&self.description)
    }

    pub fn with_defaults(mut self) -> Self {
        default_field(&mut self.name, "Unnamed environment");
        default_field(&mut self.description, "An environment not yet explored.");
        default_field(&mut self.climate, "Temperate");
        default_field(&mut self.atmosphere, "Calm");
        self
    }
}

/// A character and the progressively-filled profile behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub id: Uuid,
    pub foundation_id: Uuid,
    pub name: String,
    pub role: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub personality: Vec<String>,
    pub backstory: Option<String>,
    /// Preferred narration voice for read-aloud, when the user picked one.
    pub voice: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CharacterProfile {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty()
            && required_present(&self.role)
            && required_present(&self.description)
    }

    pub fn with_defaults(mut self) -> Self {
        default_field(&mut self.role, "Supporting character");
        default_field(&mut self.description, "A figure whose story is still unwritten.");
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRelationship {
    pub id: Uuid,
    pub from_character: Uuid,
    pub to_character: Uuid,
    pub relation: String,
}

fn required_present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn default_field(field: &mut Option<String>, default: &str) {
    let missing = field.as_deref().map_or(true, |s| s.trim().is_empty());
    if missing {
        *field = Some(default.to_string());
    }
}

//=========================================================================================
// Stories, Chapters and their satellites
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Draft,
    Active,
    Archived,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Active => "active",
            StoryStatus::Archived => "archived",
        }
    }
}

impl FromStr for StoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(StoryStatus::Draft),
            "active" => Ok(StoryStatus::Active),
            "archived" => Ok(StoryStatus::Archived),
            other => Err(format!("unknown story status: '{other}'")),
        }
    }
}

/// A story grown out of a completed foundation. References (does not
/// own) the foundation's detail records; the reference is severed when
/// the foundation is deleted without cascading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub foundation_id: Option<Uuid>,
    pub user_id: Uuid,
    pub title: String,
    pub premise: Option<String>,
    pub status: StoryStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub story_id: Uuid,
    pub chapter_index: usize,
    pub title: String,
    pub content: String,
    /// How far the read-aloud session has narrated, in sentences.
    pub reading_progress_index: usize,
    pub created_at: DateTime<Utc>,
}

/// A superseded chapter body, archived whenever a chapter is edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterVersion {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A steering slider for the story's direction, seeded with defaults at
/// story creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeVector {
    pub id: Uuid,
    pub story_id: Uuid,
    pub name: String,
    pub intensity: f32,
}

/// Sliders every fresh story starts with. Intensity runs 0.0..=1.0.
pub const DEFAULT_NARRATIVE_VECTORS: &[(&str, f32)] = &[
    ("pacing", 0.5),
    ("tension", 0.5),
    ("humor", 0.3),
    ("romance", 0.2),
    ("darkness", 0.4),
];

/// Something that happened to a character in the course of a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterEvent {
    pub id: Uuid,
    pub character_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_details_round_trip_through_json_unchanged() {
        let world = WorldDetails {
            name: Some("Meridia".to_string()),
            description: Some("Twin continents under a shattered moon.".to_string()),
            regions: vec!["The Shales".to_string(), "Low Meridia".to_string()],
            time_period: Some("Late bronze".to_string()),
            magic_level: None,
            technology_level: Some("Sail and forge".to_string()),
            thread_id: Some("thread_abc123".to_string()),
        };

        let json = serde_json::to_string(&world).unwrap();
        let parsed: WorldDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, world);
    }

    #[test]
    fn defaults_fill_only_the_missing_fields() {
        let genre = GenreDetails {
            name: Some("Mythic western".to_string()),
            description: None,
            themes: vec!["debt".to_string()],
            tone: Some("  ".to_string()),
            audience: None,
            thread_id: None,
        };
        assert!(!genre.is_complete());

        let filled = genre.with_defaults();
        assert_eq!(filled.name.as_deref(), Some("Mythic western"));
        assert_eq!(
            filled.description.as_deref(),
            Some("A genre still finding its shape.")
        );
        // Whitespace-only counts as missing.
        assert_eq!(filled.tone.as_deref(), Some("Balanced"));
        assert_eq!(filled.themes, vec!["debt".to_string()]);
        assert!(filled.is_complete());
    }

    #[test]
    fn character_completion_requires_name_role_and_description() {
        let mut profile = CharacterProfile {
            id: Uuid::new_v4(),
            foundation_id: Uuid::new_v4(),
            name: "Issa".to_string(),
            role: None,
            description: Some("A ferry pilot with debts.".to_string()),
            personality: vec![],
            backstory: None,
            voice: None,
            created_at: Utc::now(),
        };
        assert!(!profile.is_complete());

        profile.role = Some("Protagonist".to_string());
        assert!(profile.is_complete());
    }
}
