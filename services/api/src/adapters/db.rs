//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use storyflow_core::domain::{
    CharacterEvent, CharacterProfile, CharacterRelationship, Chapter, ChapterVersion,
    EnvironmentDetails, Foundation, FoundationMessage, GenreDetails, MessageRole,
    NarrativeVector, NewFoundationMessage, Story, User, UserCredentials, WorldDetails,
    DEFAULT_NARRATIVE_VECTORS,
};
use storyflow_core::ports::{DatabaseService, PortError, PortResult};
use storyflow_core::stage::{Stage, StageStatus};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or(e: sqlx::Error, what: &str, id: impl std::fmt::Display) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} {} not found", what, id)),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct UserCredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}
impl UserCredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            id: self.id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct FoundationRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    genre: Option<String>,
    description: Option<String>,
    thread_id: Option<String>,
    current_stage: String,
    show_components: bool,
    genre_complete: bool,
    world_complete: bool,
    characters_complete: bool,
    influences_complete: bool,
    details_complete: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl FoundationRecord {
    fn to_domain(self) -> PortResult<Foundation> {
        let current_stage = self
            .current_stage
            .parse::<Stage>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Foundation {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            genre: self.genre,
            description: self.description,
            thread_id: self.thread_id,
            current_stage,
            show_components: self.show_components,
            stages: StageStatus {
                genre: self.genre_complete,
                world: self.world_complete,
                characters: self.characters_complete,
                influences: self.influences_complete,
                details: self.details_complete,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const FOUNDATION_COLUMNS: &str = "id, user_id, name, genre, description, thread_id, \
     current_stage, show_components, genre_complete, world_complete, characters_complete, \
     influences_complete, details_complete, created_at, updated_at";

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    foundation_id: Uuid,
    client_key: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<FoundationMessage> {
        let role = self
            .role
            .parse::<MessageRole>()
            .map_err(PortError::Unexpected)?;
        Ok(FoundationMessage {
            id: self.id,
            foundation_id: self.foundation_id,
            client_key: self.client_key,
            role,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct GenreDetailsRecord {
    name: Option<String>,
    description: Option<String>,
    themes: Vec<String>,
    tone: Option<String>,
    audience: Option<String>,
    thread_id: Option<String>,
}
impl GenreDetailsRecord {
    fn to_domain(self) -> GenreDetails {
        GenreDetails {
            name: self.name,
            description: self.description,
            themes: self.themes,
            tone: self.tone,
            audience: self.audience,
            thread_id: self.thread_id,
        }
    }
}

#[derive(FromRow)]
struct WorldDetailsRecord {
    name: Option<String>,
    description: Option<String>,
    regions: Vec<String>,
    time_period: Option<String>,
    magic_level: Option<String>,
    technology_level: Option<String>,
    thread_id: Option<String>,
}
impl WorldDetailsRecord {
    fn to_domain(self) -> WorldDetails {
        WorldDetails {
            name: self.name,
            description: self.description,
            regions: self.regions,
            time_period: self.time_period,
            magic_level: self.magic_level,
            technology_level: self.technology_level,
            thread_id: self.thread_id,
        }
    }
}

#[derive(FromRow)]
struct EnvironmentDetailsRecord {
    name: Option<String>,
    description: Option<String>,
    climate: Option<String>,
    landmarks: Vec<String>,
    atmosphere: Option<String>,
    thread_id: Option<String>,
}
impl EnvironmentDetailsRecord {
    fn to_domain(self) -> EnvironmentDetails {
        EnvironmentDetails {
            name: self.name,
            description: self.description,
            climate: self.climate,
            landmarks: self.landmarks,
            atmosphere: self.atmosphere,
            thread_id: self.thread_id,
        }
    }
}

#[derive(FromRow)]
struct CharacterRecord {
    id: Uuid,
    foundation_id: Uuid,
    name: String,
    role: Option<String>,
    description: Option<String>,
    personality: Vec<String>,
    backstory: Option<String>,
    voice: Option<String>,
    created_at: DateTime<Utc>,
}
impl CharacterRecord {
    fn to_domain(self) -> CharacterProfile {
        CharacterProfile {
            id: self.id,
            foundation_id: self.foundation_id,
            name: self.name,
            role: self.role,
            description: self.description,
            personality: self.personality,
            backstory: self.backstory,
            voice: self.voice,
            created_at: self.created_at,
        }
    }
}

/// Base-table row alone, for inserts that happen before any detail
/// satellite exists.
#[derive(FromRow)]
struct CharacterRowRecord {
    id: Uuid,
    foundation_id: Uuid,
    name: String,
    role: Option<String>,
    created_at: DateTime<Utc>,
}
impl CharacterRowRecord {
    fn to_domain(self) -> CharacterProfile {
        CharacterProfile {
            id: self.id,
            foundation_id: self.foundation_id,
            name: self.name,
            role: self.role,
            description: None,
            personality: Vec::new(),
            backstory: None,
            voice: None,
            created_at: self.created_at,
        }
    }
}

// The domain profile is the base row joined with its lazily created
// detail satellite; COALESCE keeps `personality` non-null for rows
// that have no satellite yet.
const CHARACTER_COLUMNS: &str = "c.id, c.foundation_id, c.name, c.role, d.description, \
     COALESCE(d.personality, '{}') AS personality, d.backstory, d.voice, c.created_at";
const CHARACTER_FROM: &str =
    "characters c LEFT JOIN character_details d ON d.character_id = c.id";

#[derive(FromRow)]
struct RelationshipRecord {
    id: Uuid,
    from_character: Uuid,
    to_character: Uuid,
    relation: String,
}
impl RelationshipRecord {
    fn to_domain(self) -> CharacterRelationship {
        CharacterRelationship {
            id: self.id,
            from_character: self.from_character,
            to_character: self.to_character,
            relation: self.relation,
        }
    }
}

#[derive(FromRow)]
struct CharacterEventRecord {
    id: Uuid,
    character_id: Uuid,
    chapter_id: Option<Uuid>,
    description: String,
    created_at: DateTime<Utc>,
}
impl CharacterEventRecord {
    fn to_domain(self) -> CharacterEvent {
        CharacterEvent {
            id: self.id,
            character_id: self.character_id,
            chapter_id: self.chapter_id,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct StoryRecord {
    id: Uuid,
    foundation_id: Option<Uuid>,
    user_id: Uuid,
    title: String,
    premise: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}
impl StoryRecord {
    fn to_domain(self) -> PortResult<Story> {
        let status = self.status.parse().map_err(PortError::Unexpected)?;
        Ok(Story {
            id: self.id,
            foundation_id: self.foundation_id,
            user_id: self.user_id,
            title: self.title,
            premise: self.premise,
            status,
            created_at: self.created_at,
        })
    }
}

const STORY_COLUMNS: &str = "id, foundation_id, user_id, title, premise, status, created_at";

#[derive(FromRow)]
struct ChapterRecord {
    id: Uuid,
    story_id: Uuid,
    chapter_index: i32,
    title: String,
    content: String,
    reading_progress_index: i32,
    created_at: DateTime<Utc>,
}
impl ChapterRecord {
    fn to_domain(self) -> Chapter {
        Chapter {
            id: self.id,
            story_id: self.story_id,
            chapter_index: self.chapter_index as usize,
            title: self.title,
            content: self.content,
            reading_progress_index: self.reading_progress_index as usize,
            created_at: self.created_at,
        }
    }
}

const CHAPTER_COLUMNS: &str =
    "id, story_id, chapter_index, title, content, reading_progress_index, created_at";

#[derive(FromRow)]
struct ChapterVersionRecord {
    id: Uuid,
    chapter_id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
}
impl ChapterVersionRecord {
    fn to_domain(self) -> ChapterVersion {
        ChapterVersion {
            id: self.id,
            chapter_id: self.chapter_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct NarrativeVectorRecord {
    id: Uuid,
    story_id: Uuid,
    name: String,
    intensity: f32,
}
impl NarrativeVectorRecord {
    fn to_domain(self) -> NarrativeVector {
        NarrativeVector {
            id: self.id,
            story_id: self.story_id,
            name: self.name,
            intensity: self.intensity,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (email, hashed_password) VALUES ($1, $2) RETURNING id, email",
        )
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, UserCredentialsRecord>(
            "SELECT id, email, hashed_password FROM users WHERE email = $1 AND hashed_password IS NOT NULL",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or(e, "User", email))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_foundation(&self, user_id: Uuid, name: &str) -> PortResult<Foundation> {
        let sql = format!(
            "INSERT INTO foundations (user_id, name) VALUES ($1, $2) RETURNING {}",
            FOUNDATION_COLUMNS
        );
        let record = sqlx::query_as::<_, FoundationRecord>(&sql)
            .bind(user_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_foundation(&self, foundation_id: Uuid) -> PortResult<Foundation> {
        let sql = format!("SELECT {} FROM foundations WHERE id = $1", FOUNDATION_COLUMNS);
        let record = sqlx::query_as::<_, FoundationRecord>(&sql)
            .bind(foundation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or(e, "Foundation", foundation_id))?;
        record.to_domain()
    }

    async fn list_foundations(&self, user_id: Uuid) -> PortResult<Vec<Foundation>> {
        let sql = format!(
            "SELECT {} FROM foundations WHERE user_id = $1 ORDER BY updated_at DESC",
            FOUNDATION_COLUMNS
        );
        let records = sqlx::query_as::<_, FoundationRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn update_foundation_profile(
        &self,
        foundation_id: Uuid,
        name: Option<&str>,
        genre: Option<&str>,
        description: Option<&str>,
    ) -> PortResult<Foundation> {
        let sql = format!(
            "UPDATE foundations SET name = COALESCE($1, name), genre = COALESCE($2, genre), \
             description = COALESCE($3, description), updated_at = now() \
             WHERE id = $4 RETURNING {}",
            FOUNDATION_COLUMNS
        );
        let record = sqlx::query_as::<_, FoundationRecord>(&sql)
            .bind(name)
            .bind(genre)
            .bind(description)
            .bind(foundation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or(e, "Foundation", foundation_id))?;
        record.to_domain()
    }

    async fn update_foundation_progress(
        &self,
        foundation_id: Uuid,
        stage: Stage,
        stages: StageStatus,
        show_components: bool,
        thread_id: Option<&str>,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE foundations SET current_stage = $1, show_components = $2, \
             genre_complete = $3, world_complete = $4, characters_complete = $5, \
             influences_complete = $6, details_complete = $7, thread_id = $8, \
             updated_at = now() \
             WHERE id = $9",
        )
        .bind(stage.as_str())
        .bind(show_components)
        .bind(stages.genre)
        .bind(stages.world)
        .bind(stages.characters)
        .bind(stages.influences)
        .bind(stages.details)
        .bind(thread_id)
        .bind(foundation_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_foundation(&self, foundation_id: Uuid, cascade: bool) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        if cascade {
            sqlx::query("DELETE FROM stories WHERE foundation_id = $1")
                .bind(foundation_id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        let result = sqlx::query("DELETE FROM foundations WHERE id = $1")
            .bind(foundation_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Foundation {} not found",
                foundation_id
            )));
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn insert_message(&self, message: &NewFoundationMessage) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO foundation_messages (foundation_id, client_key, role, content) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (client_key) DO NOTHING",
        )
        .bind(message.foundation_id)
        .bind(message.client_key)
        .bind(message.role.as_str())
        .bind(&message.content)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_messages(&self, foundation_id: Uuid) -> PortResult<Vec<FoundationMessage>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, foundation_id, client_key, role, content, created_at \
             FROM foundation_messages WHERE foundation_id = $1 ORDER BY created_at ASC",
        )
        .bind(foundation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_genre_details(&self, foundation_id: Uuid) -> PortResult<Option<GenreDetails>> {
        let record = sqlx::query_as::<_, GenreDetailsRecord>(
            "SELECT name, description, themes, tone, audience, thread_id \
             FROM genre_details WHERE foundation_id = $1",
        )
        .bind(foundation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn upsert_genre_details(
        &self,
        foundation_id: Uuid,
        details: &GenreDetails,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO genre_details (foundation_id, name, description, themes, tone, audience, thread_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (foundation_id) DO UPDATE SET \
                 name = EXCLUDED.name, description = EXCLUDED.description, \
                 themes = EXCLUDED.themes, tone = EXCLUDED.tone, \
                 audience = EXCLUDED.audience, thread_id = EXCLUDED.thread_id, \
                 updated_at = now()",
        )
        .bind(foundation_id)
        .bind(&details.name)
        .bind(&details.description)
        .bind(&details.themes)
        .bind(&details.tone)
        .bind(&details.audience)
        .bind(&details.thread_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_world_details(&self, foundation_id: Uuid) -> PortResult<Option<WorldDetails>> {
        let record = sqlx::query_as::<_, WorldDetailsRecord>(
            "SELECT name, description, regions, time_period, magic_level, technology_level, thread_id \
             FROM world_details WHERE foundation_id = $1",
        )
        .bind(foundation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn upsert_world_details(
        &self,
        foundation_id: Uuid,
        details: &WorldDetails,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO world_details (foundation_id, name, description, regions, time_period, magic_level, technology_level, thread_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (foundation_id) DO UPDATE SET \
                 name = EXCLUDED.name, description = EXCLUDED.description, \
                 regions = EXCLUDED.regions, time_period = EXCLUDED.time_period, \
                 magic_level = EXCLUDED.magic_level, technology_level = EXCLUDED.technology_level, \
                 thread_id = EXCLUDED.thread_id, updated_at = now()",
        )
        .bind(foundation_id)
        .bind(&details.name)
        .bind(&details.description)
        .bind(&details.regions)
        .bind(&details.time_period)
        .bind(&details.magic_level)
        .bind(&details.technology_level)
        .bind(&details.thread_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_environment_details(
        &self,
        foundation_id: Uuid,
    ) -> PortResult<Option<EnvironmentDetails>> {
        let record = sqlx::query_as::<_, EnvironmentDetailsRecord>(
            "SELECT name, description, climate, landmarks, atmosphere, thread_id \
             FROM environment_details WHERE foundation_id = $1",
        )
        .bind(foundation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn upsert_environment_details(
        &self,
        foundation_id: Uuid,
        details: &EnvironmentDetails,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO environment_details (foundation_id, name, description, climate, landmarks, atmosphere, thread_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (foundation_id) DO UPDATE SET \
                 name = EXCLUDED.name, description = EXCLUDED.description, \
                 climate = EXCLUDED.climate, landmarks = EXCLUDED.landmarks, \
                 atmosphere = EXCLUDED.atmosphere, thread_id = EXCLUDED.thread_id, \
                 updated_at = now()",
        )
        .bind(foundation_id)
        .bind(&details.name)
        .bind(&details.description)
        .bind(&details.climate)
        .bind(&details.landmarks)
        .bind(&details.atmosphere)
        .bind(&details.thread_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn create_character(
        &self,
        foundation_id: Uuid,
        name: &str,
    ) -> PortResult<CharacterProfile> {
        // No satellite row yet, so the profile starts with empty details.
        let record = sqlx::query_as::<_, CharacterRowRecord>(
            "INSERT INTO characters (foundation_id, name) VALUES ($1, $2) \
             RETURNING id, foundation_id, name, role, created_at",
        )
        .bind(foundation_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_character(&self, character_id: Uuid) -> PortResult<CharacterProfile> {
        let sql = format!(
            "SELECT {} FROM {} WHERE c.id = $1",
            CHARACTER_COLUMNS, CHARACTER_FROM
        );
        let record = sqlx::query_as::<_, CharacterRecord>(&sql)
            .bind(character_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or(e, "Character", character_id))?;
        Ok(record.to_domain())
    }

    async fn list_characters(&self, foundation_id: Uuid) -> PortResult<Vec<CharacterProfile>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE c.foundation_id = $1 ORDER BY c.created_at ASC",
            CHARACTER_COLUMNS, CHARACTER_FROM
        );
        let records = sqlx::query_as::<_, CharacterRecord>(&sql)
            .bind(foundation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn update_character(&self, character: &CharacterProfile) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let result = sqlx::query("UPDATE characters SET name = $1, role = $2 WHERE id = $3")
            .bind(&character.name)
            .bind(&character.role)
            .bind(character.id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Character {} not found",
                character.id
            )));
        }

        sqlx::query(
            "INSERT INTO character_details (character_id, description, personality, backstory, voice) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (character_id) DO UPDATE SET \
                 description = EXCLUDED.description, \
                 personality = EXCLUDED.personality, \
                 backstory = EXCLUDED.backstory, \
                 voice = EXCLUDED.voice, \
                 updated_at = now()",
        )
        .bind(character.id)
        .bind(&character.description)
        .bind(&character.personality)
        .bind(&character.backstory)
        .bind(&character.voice)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn delete_character(&self, character_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM characters WHERE id = $1")
            .bind(character_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Character {} not found",
                character_id
            )));
        }
        Ok(())
    }

    async fn add_character_relationship(
        &self,
        from_character: Uuid,
        to_character: Uuid,
        relation: &str,
    ) -> PortResult<CharacterRelationship> {
        let record = sqlx::query_as::<_, RelationshipRecord>(
            "INSERT INTO character_relationships (from_character, to_character, relation) \
             VALUES ($1, $2, $3) RETURNING id, from_character, to_character, relation",
        )
        .bind(from_character)
        .bind(to_character)
        .bind(relation)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn list_character_relationships(
        &self,
        foundation_id: Uuid,
    ) -> PortResult<Vec<CharacterRelationship>> {
        let records = sqlx::query_as::<_, RelationshipRecord>(
            "SELECT cr.id, cr.from_character, cr.to_character, cr.relation \
             FROM character_relationships cr \
             JOIN characters c ON c.id = cr.from_character \
             WHERE c.foundation_id = $1",
        )
        .bind(foundation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn record_character_event(
        &self,
        character_id: Uuid,
        chapter_id: Option<Uuid>,
        description: &str,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO character_events (character_id, chapter_id, description) \
             VALUES ($1, $2, $3)",
        )
        .bind(character_id)
        .bind(chapter_id)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn list_character_events(
        &self,
        character_id: Uuid,
    ) -> PortResult<Vec<CharacterEvent>> {
        let records = sqlx::query_as::<_, CharacterEventRecord>(
            "SELECT id, character_id, chapter_id, description, created_at \
             FROM character_events WHERE character_id = $1 ORDER BY created_at ASC",
        )
        .bind(character_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn create_story(
        &self,
        foundation_id: Uuid,
        user_id: Uuid,
        title: &str,
        premise: Option<&str>,
    ) -> PortResult<Story> {
        let sql = format!(
            "INSERT INTO stories (foundation_id, user_id, title, premise) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            STORY_COLUMNS
        );
        let record = sqlx::query_as::<_, StoryRecord>(&sql)
            .bind(foundation_id)
            .bind(user_id)
            .bind(title)
            .bind(premise)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_story(&self, story_id: Uuid) -> PortResult<Story> {
        let sql = format!("SELECT {} FROM stories WHERE id = $1", STORY_COLUMNS);
        let record = sqlx::query_as::<_, StoryRecord>(&sql)
            .bind(story_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or(e, "Story", story_id))?;
        record.to_domain()
    }

    async fn list_stories(&self, user_id: Uuid) -> PortResult<Vec<Story>> {
        let sql = format!(
            "SELECT {} FROM stories WHERE user_id = $1 ORDER BY created_at DESC",
            STORY_COLUMNS
        );
        let records = sqlx::query_as::<_, StoryRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn delete_story(&self, story_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM stories WHERE id = $1")
            .bind(story_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Story {} not found", story_id)));
        }
        Ok(())
    }

    async fn link_story_characters(
        &self,
        story_id: Uuid,
        character_ids: &[Uuid],
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for character_id in character_ids {
            sqlx::query(
                "INSERT INTO story_characters (story_id, character_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(story_id)
            .bind(character_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn seed_narrative_vectors(&self, story_id: Uuid) -> PortResult<Vec<NarrativeVector>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for (name, intensity) in DEFAULT_NARRATIVE_VECTORS.iter().copied() {
            sqlx::query(
                "INSERT INTO narrative_vectors (story_id, name, intensity) VALUES ($1, $2, $3) \
                 ON CONFLICT (story_id, name) DO NOTHING",
            )
            .bind(story_id)
            .bind(name)
            .bind(intensity)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;

        self.list_narrative_vectors(story_id).await
    }

    async fn list_narrative_vectors(&self, story_id: Uuid) -> PortResult<Vec<NarrativeVector>> {
        let records = sqlx::query_as::<_, NarrativeVectorRecord>(
            "SELECT id, story_id, name, intensity FROM narrative_vectors \
             WHERE story_id = $1 ORDER BY name ASC",
        )
        .bind(story_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn update_narrative_vector(
        &self,
        vector_id: Uuid,
        user_id: Uuid,
        intensity: f32,
    ) -> PortResult<()> {
        // The join scopes the write to the caller's own stories, so a
        // guessed vector id cannot touch anyone else's sliders.
        let result = sqlx::query(
            "UPDATE narrative_vectors v SET intensity = $1 \
             FROM stories s \
             WHERE v.id = $2 AND s.id = v.story_id AND s.user_id = $3",
        )
        .bind(intensity)
        .bind(vector_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Narrative vector {} not found",
                vector_id
            )));
        }
        Ok(())
    }

    async fn insert_chapter(
        &self,
        story_id: Uuid,
        title: &str,
        content: &str,
    ) -> PortResult<Chapter> {
        let sql = format!(
            "INSERT INTO chapters (story_id, chapter_index, title, content) \
             VALUES ($1, (SELECT COALESCE(MAX(chapter_index), 0) + 1 FROM chapters WHERE story_id = $1), $2, $3) \
             RETURNING {}",
            CHAPTER_COLUMNS
        );
        let record = sqlx::query_as::<_, ChapterRecord>(&sql)
            .bind(story_id)
            .bind(title)
            .bind(content)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_chapter(&self, chapter_id: Uuid) -> PortResult<Chapter> {
        let sql = format!("SELECT {} FROM chapters WHERE id = $1", CHAPTER_COLUMNS);
        let record = sqlx::query_as::<_, ChapterRecord>(&sql)
            .bind(chapter_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or(e, "Chapter", chapter_id))?;
        Ok(record.to_domain())
    }

    async fn list_chapters(&self, story_id: Uuid) -> PortResult<Vec<Chapter>> {
        let sql = format!(
            "SELECT {} FROM chapters WHERE story_id = $1 ORDER BY chapter_index ASC",
            CHAPTER_COLUMNS
        );
        let records = sqlx::query_as::<_, ChapterRecord>(&sql)
            .bind(story_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn update_chapter(
        &self,
        chapter_id: Uuid,
        title: &str,
        content: &str,
    ) -> PortResult<Chapter> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Archive the body being replaced before touching the row.
        sqlx::query(
            "INSERT INTO versions (chapter_id, content) \
             SELECT id, content FROM chapters WHERE id = $1",
        )
        .bind(chapter_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let sql = format!(
            "UPDATE chapters SET title = $1, content = $2 WHERE id = $3 RETURNING {}",
            CHAPTER_COLUMNS
        );
        let record = sqlx::query_as::<_, ChapterRecord>(&sql)
            .bind(title)
            .bind(content)
            .bind(chapter_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| not_found_or(e, "Chapter", chapter_id))?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update_chapter_progress(
        &self,
        chapter_id: Uuid,
        new_progress_index: usize,
    ) -> PortResult<()> {
        sqlx::query("UPDATE chapters SET reading_progress_index = $1 WHERE id = $2")
            .bind(new_progress_index as i32)
            .bind(chapter_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn list_chapter_versions(&self, chapter_id: Uuid) -> PortResult<Vec<ChapterVersion>> {
        let records = sqlx::query_as::<_, ChapterVersionRecord>(
            "SELECT id, chapter_id, content, created_at FROM versions \
             WHERE chapter_id = $1 ORDER BY created_at DESC",
        )
        .bind(chapter_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn record_suggestions(
        &self,
        foundation_id: Uuid,
        stage: Stage,
        suggestions: &[String],
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO suggestions (foundation_id, stage, items) VALUES ($1, $2, $3)")
            .bind(foundation_id)
            .bind(stage.as_str())
            .bind(suggestions)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
