//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use storyflow_core::domain::{
    Chapter, CharacterProfile, EnvironmentDetails, Foundation, GenreDetails, MessageRole,
    NarrativeVector, NewFoundationMessage, Story, WorldDetails,
};
use storyflow_core::ports::{ChapterBrief, PortError};
use storyflow_core::stage::Stage;

use crate::error::ApiError;
use crate::web::interview::{resolve_suggestions, run_interview_turn, TurnOutcome};
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        list_foundations_handler,
        create_foundation_handler,
        get_foundation_handler,
        update_foundation_handler,
        delete_foundation_handler,
        list_messages_handler,
        save_message_handler,
        dynamic_assistant_handler,
        set_stage_handler,
        get_genre_details_handler,
        put_genre_details_handler,
        get_world_details_handler,
        put_world_details_handler,
        get_environment_details_handler,
        put_environment_details_handler,
        list_characters_handler,
        create_character_handler,
        get_character_handler,
        update_character_handler,
        delete_character_handler,
        add_relationship_handler,
        list_relationships_handler,
        list_character_events_handler,
        list_stories_handler,
        create_story_handler,
        get_story_handler,
        delete_story_handler,
        list_chapters_handler,
        list_vectors_handler,
        update_vector_handler,
        draft_chapter_handler,
        get_chapter_handler,
        update_chapter_handler,
        list_chapter_versions_handler,
        get_api_key_status_handler,
        set_api_key_handler,
        chat_suggestions_handler,
    ),
    components(
        schemas(
            crate::web::auth::SignupRequest,
            crate::web::auth::LoginRequest,
            crate::web::auth::AuthResponse,
            CreateFoundationRequest,
            UpdateFoundationRequest,
            SaveMessageRequest,
            SaveMessageResponse,
            DynamicAssistantRequest,
            DynamicAssistantResponse,
            SetStageRequest,
            CreateCharacterRequest,
            UpdateCharacterRequest,
            AddRelationshipRequest,
            CreateStoryRequest,
            DraftChapterRequest,
            UpdateChapterRequest,
            UpdateVectorRequest,
            ApiKeyStatusResponse,
            SetApiKeyRequest,
            ChatSuggestionsRequest,
            ChatSuggestionsResponse,
        )
    ),
    tags(
        (name = "StoryFlow API", description = "API endpoints for guided story-world creation and reading.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateFoundationRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateFoundationRequest {
    pub name: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteFoundationQuery {
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct SaveMessageRequest {
    pub role: String,
    pub content: String,
    /// Idempotency key; reuse it when retrying so redelivery cannot
    /// duplicate the row. Minted server-side when absent.
    pub client_key: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct SaveMessageResponse {
    /// False when the save was parked for the background drain.
    pub accepted: bool,
    pub pending_saves: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct DynamicAssistantRequest {
    pub message: String,
}

/// The full outcome of one interview turn.
#[derive(Serialize, ToSchema)]
pub struct DynamicAssistantResponse {
    pub reply: String,
    pub previous_stage: String,
    pub current_stage: String,
    pub is_auto_transition: bool,
    pub completed_stages: Vec<String>,
    pub ready_for_story: bool,
    pub show_foundation_components: bool,
    pub suggestions: Vec<String>,
    pub pending_saves: usize,
}

impl From<TurnOutcome> for DynamicAssistantResponse {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            reply: outcome.reply,
            previous_stage: outcome.previous_stage.as_str().to_string(),
            current_stage: outcome.current_stage.as_str().to_string(),
            is_auto_transition: outcome.is_auto_transition,
            completed_stages: outcome
                .completed_stages
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            ready_for_story: outcome.ready_for_story,
            show_foundation_components: outcome.show_foundation_components,
            suggestions: outcome.suggestions,
            pending_saves: outcome.pending_saves,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SetStageRequest {
    pub stage: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateCharacterRequest {
    pub name: String,
    pub role: Option<String>,
    pub description: Option<String>,
    pub personality: Option<Vec<String>>,
    pub backstory: Option<String>,
    pub voice: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateCharacterRequest {
    pub name: Option<String>,
    pub role: Option<String>,
    pub description: Option<String>,
    pub personality: Option<Vec<String>>,
    pub backstory: Option<String>,
    pub voice: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct AddRelationshipRequest {
    pub to_character: Uuid,
    pub relation: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateStoryRequest {
    pub foundation_id: Uuid,
    pub title: Option<String>,
    pub premise: Option<String>,
}

#[derive(Deserialize)]
pub struct StoriesQuery {
    pub foundation_id: Option<Uuid>,
}

#[derive(Deserialize, ToSchema)]
pub struct DraftChapterRequest {
    pub story_id: Uuid,
    /// Free-text steering for this chapter.
    pub direction: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateChapterRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateVectorRequest {
    pub intensity: f32,
}

#[derive(Serialize, ToSchema)]
pub struct ApiKeyStatusResponse {
    pub openai_configured: bool,
    pub elevenlabs_configured: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct SetApiKeyRequest {
    pub provider: String,
    pub api_key: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ChatSuggestionsRequest {
    pub stage: String,
    pub user_message: String,
    pub assistant_message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ChatSuggestionsResponse {
    pub suggestions: Vec<String>,
}

//=========================================================================================
// Ownership Helpers
//=========================================================================================

/// Fetches a foundation and checks it belongs to the caller. Rows owned
/// by someone else answer exactly like missing rows.
async fn owned_foundation(
    app_state: &AppState,
    user_id: Uuid,
    foundation_id: Uuid,
) -> Result<Foundation, ApiError> {
    let foundation = app_state.db.get_foundation(foundation_id).await?;
    if foundation.user_id != user_id {
        return Err(PortError::NotFound(format!("Foundation {} not found", foundation_id)).into());
    }
    Ok(foundation)
}

async fn owned_story(app_state: &AppState, user_id: Uuid, story_id: Uuid) -> Result<Story, ApiError> {
    let story = app_state.db.get_story(story_id).await?;
    if story.user_id != user_id {
        return Err(PortError::NotFound(format!("Story {} not found", story_id)).into());
    }
    Ok(story)
}

async fn owned_character(
    app_state: &AppState,
    user_id: Uuid,
    character_id: Uuid,
) -> Result<(Foundation, CharacterProfile), ApiError> {
    let character = app_state.db.get_character(character_id).await?;
    let foundation = owned_foundation(app_state, user_id, character.foundation_id).await?;
    Ok((foundation, character))
}

async fn owned_chapter(
    app_state: &AppState,
    user_id: Uuid,
    chapter_id: Uuid,
) -> Result<Chapter, ApiError> {
    let chapter = app_state.db.get_chapter(chapter_id).await?;
    owned_story(app_state, user_id, chapter.story_id).await?;
    Ok(chapter)
}

/// Marks `stage` complete on the foundation, leaving every other
/// progress field as it was. Flags are monotonic, so an already-set
/// stage is a no-op without a database round trip.
async fn mark_stage_complete(
    app_state: &AppState,
    foundation: &Foundation,
    stage: Stage,
) -> Result<(), ApiError> {
    if foundation.stages.is_complete(stage) {
        return Ok(());
    }
    let mut stages = foundation.stages;
    stages.mark_complete(stage);
    app_state
        .db
        .update_foundation_progress(
            foundation.id,
            foundation.current_stage,
            stages,
            foundation.show_components,
            foundation.thread_id.as_deref(),
        )
        .await?;
    Ok(())
}

//=========================================================================================
// Foundation Handlers
//=========================================================================================

/// List the caller's foundations.
#[utoipa::path(
    get,
    path = "/api/foundations",
    responses(
        (status = 200, description = "The caller's foundations"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn list_foundations_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let foundations = app_state.db.list_foundations(user_id).await?;
    Ok(Json(foundations))
}

/// Create a foundation at the opening stage.
#[utoipa::path(
    post,
    path = "/api/foundations",
    request_body = CreateFoundationRequest,
    responses(
        (status = 201, description = "Foundation created"),
        (status = 400, description = "Empty name")
    )
)]
pub async fn create_foundation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateFoundationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Foundation name must not be empty".to_string(),
        ));
    }
    let foundation = app_state
        .db
        .create_foundation(user_id, req.name.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(foundation)))
}

#[utoipa::path(
    get,
    path = "/api/foundations/{id}",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "The foundation"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_foundation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, foundation_id).await?;
    Ok(Json(foundation))
}

/// Partial update of the foundation's profile fields.
#[utoipa::path(
    put,
    path = "/api/foundations/{id}",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body = UpdateFoundationRequest,
    responses(
        (status = 200, description = "Updated foundation"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn update_foundation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(req): Json<UpdateFoundationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let updated = app_state
        .db
        .update_foundation_profile(
            foundation_id,
            req.name.as_deref(),
            req.genre.as_deref(),
            req.description.as_deref(),
        )
        .await?;
    Ok(Json(updated))
}

/// Delete a foundation. With `cascade=true` its stories go too;
/// without it they survive with the foundation reference severed.
#[utoipa::path(
    delete,
    path = "/api/foundations/{id}",
    params(
        ("id" = Uuid, Path, description = "Foundation id"),
        ("cascade" = Option<bool>, Query, description = "Also delete dependent stories")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn delete_foundation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Query(query): Query<DeleteFoundationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    app_state
        .db
        .delete_foundation(foundation_id, query.cascade)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Message and Interview Handlers
//=========================================================================================

/// Full transcript of the foundation's interview, oldest first.
#[utoipa::path(
    get,
    path = "/api/foundations/{id}/messages",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "Transcript in created_at order"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let messages = app_state.db.list_messages(foundation_id).await?;
    Ok(Json(messages))
}

/// Persist one chat turn through the retrying save queue. The request
/// is acknowledged even when the database is down; parked saves are
/// replayed in order by the background drain.
#[utoipa::path(
    post,
    path = "/api/foundations/{id}/messages",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body = SaveMessageRequest,
    responses(
        (status = 202, description = "Accepted for storage", body = SaveMessageResponse),
        (status = 400, description = "Unknown role"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn save_message_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(req): Json<SaveMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let role = MessageRole::from_str(&req.role).map_err(ApiError::BadRequest)?;

    let mut message = NewFoundationMessage::new(foundation_id, role, req.content);
    if let Some(client_key) = req.client_key {
        message.client_key = client_key;
    }

    let accepted = app_state.save_queue.save_message(message).await;
    let pending_saves = app_state.save_queue.pending_len().await;
    Ok((
        StatusCode::ACCEPTED,
        Json(SaveMessageResponse {
            accepted,
            pending_saves,
        }),
    ))
}

/// One interview turn: message in, assistant reply and stage
/// bookkeeping out.
#[utoipa::path(
    post,
    path = "/api/foundations/{id}/dynamic-assistant",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body = DynamicAssistantRequest,
    responses(
        (status = 200, description = "The turn outcome", body = DynamicAssistantResponse),
        (status = 400, description = "Empty message"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn dynamic_assistant_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(req): Json<DynamicAssistantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, foundation_id).await?;
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    let outcome = run_interview_turn(&app_state, foundation, &req.message).await?;
    Ok(Json(DynamicAssistantResponse::from(outcome)))
}

/// Manual sidebar jump to a named stage, bypassing the policy.
#[utoipa::path(
    post,
    path = "/api/foundations/{id}/stage",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body = SetStageRequest,
    responses(
        (status = 200, description = "Updated foundation"),
        (status = 400, description = "Unknown stage name"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn set_stage_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(req): Json<SetStageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, foundation_id).await?;
    let stage = Stage::from_str(&req.stage).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let show_components = foundation.show_components || stage != foundation.current_stage;
    app_state
        .db
        .update_foundation_progress(
            foundation.id,
            stage,
            foundation.stages,
            show_components,
            foundation.thread_id.as_deref(),
        )
        .await?;

    let updated = app_state.db.get_foundation(foundation.id).await?;
    Ok(Json(updated))
}

//=========================================================================================
// Stage Detail Record Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/foundations/{id}/genre",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "The genre record, or null when none exists"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_genre_details_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let details = app_state.db.get_genre_details(foundation_id).await?;
    Ok(Json(details))
}

/// Upsert the genre record. A record that is complete after the write
/// marks the genre stage complete.
#[utoipa::path(
    put,
    path = "/api/foundations/{id}/genre",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body(content_type = "application/json", description = "The genre record"),
    responses(
        (status = 200, description = "Stored record"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn put_genre_details_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(details): Json<GenreDetails>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, foundation_id).await?;
    app_state
        .db
        .upsert_genre_details(foundation_id, &details)
        .await?;
    if details.is_complete() {
        mark_stage_complete(&app_state, &foundation, Stage::Genre).await?;
    }
    Ok(Json(details))
}

#[utoipa::path(
    get,
    path = "/api/foundations/{id}/world",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "The world record, or null when none exists"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_world_details_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let details = app_state.db.get_world_details(foundation_id).await?;
    Ok(Json(details))
}

/// Upsert the world record, marking the world stage complete when the
/// record is complete after the write.
#[utoipa::path(
    put,
    path = "/api/foundations/{id}/world",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body(content_type = "application/json", description = "The world record"),
    responses(
        (status = 200, description = "Stored record"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn put_world_details_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(details): Json<WorldDetails>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, foundation_id).await?;
    app_state
        .db
        .upsert_world_details(foundation_id, &details)
        .await?;
    if details.is_complete() {
        mark_stage_complete(&app_state, &foundation, Stage::World).await?;
    }
    Ok(Json(details))
}

#[utoipa::path(
    get,
    path = "/api/foundations/{id}/environment",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "The environment record, or null when none exists"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_environment_details_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let details = app_state.db.get_environment_details(foundation_id).await?;
    Ok(Json(details))
}

/// Upsert the environment record. Environment texture does not gate
/// any stage on its own.
#[utoipa::path(
    put,
    path = "/api/foundations/{id}/environment",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body(content_type = "application/json", description = "The environment record"),
    responses(
        (status = 200, description = "Stored record"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn put_environment_details_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(details): Json<EnvironmentDetails>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    app_state
        .db
        .upsert_environment_details(foundation_id, &details)
        .await?;
    Ok(Json(details))
}

//=========================================================================================
// Character Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/foundations/{id}/characters",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "The foundation's characters"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_characters_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let characters = app_state.db.list_characters(foundation_id).await?;
    Ok(Json(characters))
}

/// Create a character, optionally with a full profile in one shot. A
/// profile complete on arrival marks the characters stage complete.
#[utoipa::path(
    post,
    path = "/api/foundations/{id}/characters",
    params(("id" = Uuid, Path, description = "Foundation id")),
    request_body = CreateCharacterRequest,
    responses(
        (status = 201, description = "Created character"),
        (status = 400, description = "Empty name"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn create_character_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
    Json(req): Json<CreateCharacterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, foundation_id).await?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Character name must not be empty".to_string(),
        ));
    }

    let mut character = app_state
        .db
        .create_character(foundation_id, req.name.trim())
        .await?;

    let has_details = req.role.is_some()
        || req.description.is_some()
        || req.personality.is_some()
        || req.backstory.is_some()
        || req.voice.is_some();
    if has_details {
        character.role = req.role;
        character.description = req.description;
        character.personality = req.personality.unwrap_or_default();
        character.backstory = req.backstory;
        character.voice = req.voice;
        app_state.db.update_character(&character).await?;
    }

    if character.is_complete() {
        mark_stage_complete(&app_state, &foundation, Stage::Characters).await?;
    }

    Ok((StatusCode::CREATED, Json(character)))
}

#[utoipa::path(
    get,
    path = "/api/characters/{id}",
    params(("id" = Uuid, Path, description = "Character id")),
    responses(
        (status = 200, description = "The character profile"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_character_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(character_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, character) = owned_character(&app_state, user_id, character_id).await?;
    Ok(Json(character))
}

/// Partial update of a character's profile. A profile complete after
/// the write marks the characters stage complete.
#[utoipa::path(
    put,
    path = "/api/characters/{id}",
    params(("id" = Uuid, Path, description = "Character id")),
    request_body = UpdateCharacterRequest,
    responses(
        (status = 200, description = "Updated character"),
        (status = 400, description = "Empty name"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn update_character_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(character_id): Path<Uuid>,
    Json(req): Json<UpdateCharacterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (foundation, mut character) = owned_character(&app_state, user_id, character_id).await?;

    if let Some(name) = req.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Character name must not be empty".to_string(),
            ));
        }
        character.name = name;
    }
    if req.role.is_some() {
        character.role = req.role;
    }
    if req.description.is_some() {
        character.description = req.description;
    }
    if let Some(personality) = req.personality {
        character.personality = personality;
    }
    if req.backstory.is_some() {
        character.backstory = req.backstory;
    }
    if req.voice.is_some() {
        character.voice = req.voice;
    }

    app_state.db.update_character(&character).await?;

    if character.is_complete() {
        mark_stage_complete(&app_state, &foundation, Stage::Characters).await?;
    }

    Ok(Json(character))
}

#[utoipa::path(
    delete,
    path = "/api/characters/{id}",
    params(("id" = Uuid, Path, description = "Character id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn delete_character_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(character_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_character(&app_state, user_id, character_id).await?;
    app_state.db.delete_character(character_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Relate two characters of the same foundation.
#[utoipa::path(
    post,
    path = "/api/characters/{id}/relationships",
    params(("id" = Uuid, Path, description = "Character id the relation starts from")),
    request_body = AddRelationshipRequest,
    responses(
        (status = 201, description = "Created relationship"),
        (status = 400, description = "Characters belong to different foundations"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn add_relationship_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(character_id): Path<Uuid>,
    Json(req): Json<AddRelationshipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, from) = owned_character(&app_state, user_id, character_id).await?;
    let (_, to) = owned_character(&app_state, user_id, req.to_character).await?;

    if from.id == to.id {
        return Err(ApiError::BadRequest(
            "A character cannot relate to itself".to_string(),
        ));
    }
    if from.foundation_id != to.foundation_id {
        return Err(ApiError::BadRequest(
            "Characters belong to different foundations".to_string(),
        ));
    }

    let relationship = app_state
        .db
        .add_character_relationship(from.id, to.id, &req.relation)
        .await?;
    Ok((StatusCode::CREATED, Json(relationship)))
}

#[utoipa::path(
    get,
    path = "/api/foundations/{id}/relationships",
    params(("id" = Uuid, Path, description = "Foundation id")),
    responses(
        (status = 200, description = "All relationships among the foundation's characters"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_relationships_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(foundation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_foundation(&app_state, user_id, foundation_id).await?;
    let relationships = app_state
        .db
        .list_character_relationships(foundation_id)
        .await?;
    Ok(Json(relationships))
}

/// The character's appearance log, written as chapters are drafted.
#[utoipa::path(
    get,
    path = "/api/characters/{id}/events",
    params(("id" = Uuid, Path, description = "Character id")),
    responses(
        (status = 200, description = "Events, newest first"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_character_events_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(character_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_character(&app_state, user_id, character_id).await?;
    let events = app_state.db.list_character_events(character_id).await?;
    Ok(Json(events))
}

//=========================================================================================
// Story Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/stories",
    params(("foundation_id" = Option<Uuid>, Query, description = "Only stories grown from this foundation")),
    responses(
        (status = 200, description = "The caller's stories")
    )
)]
pub async fn list_stories_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<StoriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut stories = app_state.db.list_stories(user_id).await?;
    if let Some(foundation_id) = query.foundation_id {
        stories.retain(|s| s.foundation_id == Some(foundation_id));
    }
    Ok(Json(stories))
}

/// Grow a story from a completed foundation. Links the foundation's
/// characters and seeds the steering sliders.
#[utoipa::path(
    post,
    path = "/api/stories",
    request_body = CreateStoryRequest,
    responses(
        (status = 201, description = "Created story"),
        (status = 404, description = "Unknown or not owned foundation"),
        (status = 409, description = "Foundation not ready for a story")
    )
)]
pub async fn create_story_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateStoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let foundation = owned_foundation(&app_state, user_id, req.foundation_id).await?;
    if !foundation.stages.ready_for_story() {
        return Err(ApiError::Conflict(
            "Foundation is not ready for a story yet".to_string(),
        ));
    }

    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| foundation.name.clone());

    let story = app_state
        .db
        .create_story(foundation.id, user_id, &title, req.premise.as_deref())
        .await?;

    let characters = app_state.db.list_characters(foundation.id).await?;
    let character_ids: Vec<Uuid> = characters.iter().map(|c| c.id).collect();
    app_state
        .db
        .link_story_characters(story.id, &character_ids)
        .await?;
    app_state.db.seed_narrative_vectors(story.id).await?;

    Ok((StatusCode::CREATED, Json(story)))
}

#[utoipa::path(
    get,
    path = "/api/stories/{id}",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "The story"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_story_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let story = owned_story(&app_state, user_id, story_id).await?;
    Ok(Json(story))
}

#[utoipa::path(
    delete,
    path = "/api/stories/{id}",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn delete_story_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_story(&app_state, user_id, story_id).await?;
    app_state.db.delete_story(story_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/stories/{id}/chapters",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "Chapters in reading order"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_chapters_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_story(&app_state, user_id, story_id).await?;
    let chapters = app_state.db.list_chapters(story_id).await?;
    Ok(Json(chapters))
}

/// The story's steering sliders.
#[utoipa::path(
    get,
    path = "/api/stories/{id}/vectors",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "The narrative vectors"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_vectors_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_story(&app_state, user_id, story_id).await?;
    let vectors = app_state.db.list_narrative_vectors(story_id).await?;
    Ok(Json(vectors))
}

/// Move one steering slider. Intensity is clamped to the 0..=1 scale
/// by validation rather than silently.
#[utoipa::path(
    put,
    path = "/api/vectors/{id}",
    params(("id" = Uuid, Path, description = "Narrative vector id")),
    request_body = UpdateVectorRequest,
    responses(
        (status = 204, description = "Updated"),
        (status = 400, description = "Intensity out of range"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn update_vector_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(vector_id): Path<Uuid>,
    Json(req): Json<UpdateVectorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !(0.0..=1.0).contains(&req.intensity) {
        return Err(ApiError::BadRequest(
            "Intensity must be between 0.0 and 1.0".to_string(),
        ));
    }
    app_state
        .db
        .update_narrative_vector(vector_id, user_id, req.intensity)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Chapter Handlers
//=========================================================================================

/// Draft the story's next chapter through the writer model.
#[utoipa::path(
    post,
    path = "/api/chapters",
    request_body = DraftChapterRequest,
    responses(
        (status = 201, description = "The drafted chapter"),
        (status = 404, description = "Unknown or not owned story"),
        (status = 503, description = "No API key configured for the writer")
    )
)]
pub async fn draft_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<DraftChapterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let story = owned_story(&app_state, user_id, req.story_id).await?;
    let brief = build_chapter_brief(&app_state, &story, req.direction).await?;

    let drafted = app_state.writer_adapter.draft_chapter(&brief).await?;
    let chapter = app_state
        .db
        .insert_chapter(story.id, &drafted.title, &drafted.content)
        .await?;

    record_appearances(&app_state, &brief.characters, &chapter);

    Ok((StatusCode::CREATED, Json(chapter)))
}

#[utoipa::path(
    get,
    path = "/api/chapters/{id}",
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "The chapter"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn get_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let chapter = owned_chapter(&app_state, user_id, chapter_id).await?;
    Ok(Json(chapter))
}

/// Replace a chapter's title or body. The superseded body is archived
/// as a version row before the write.
#[utoipa::path(
    put,
    path = "/api/chapters/{id}",
    params(("id" = Uuid, Path, description = "Chapter id")),
    request_body = UpdateChapterRequest,
    responses(
        (status = 200, description = "Updated chapter"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn update_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(chapter_id): Path<Uuid>,
    Json(req): Json<UpdateChapterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chapter = owned_chapter(&app_state, user_id, chapter_id).await?;
    let title = req.title.unwrap_or(chapter.title);
    let content = req.content.unwrap_or(chapter.content);
    let updated = app_state
        .db
        .update_chapter(chapter_id, &title, &content)
        .await?;
    Ok(Json(updated))
}

#[utoipa::path(
    get,
    path = "/api/chapters/{id}/versions",
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Archived prior bodies, newest first"),
        (status = 404, description = "Unknown or not owned")
    )
)]
pub async fn list_chapter_versions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    owned_chapter(&app_state, user_id, chapter_id).await?;
    let versions = app_state.db.list_chapter_versions(chapter_id).await?;
    Ok(Json(versions))
}

/// Assembles everything the writer model needs for the next chapter.
/// A story whose foundation was deleted drafts from the story row
/// alone.
async fn build_chapter_brief(
    app_state: &AppState,
    story: &Story,
    direction: Option<String>,
) -> Result<ChapterBrief, ApiError> {
    let (genre, world, characters) = match story.foundation_id {
        Some(foundation_id) => {
            let genre = app_state
                .db
                .get_genre_details(foundation_id)
                .await?
                .map(|d| d.with_defaults());
            let world = app_state
                .db
                .get_world_details(foundation_id)
                .await?
                .map(|d| d.with_defaults());
            let characters = app_state
                .db
                .list_characters(foundation_id)
                .await?
                .into_iter()
                .map(|c| c.with_defaults())
                .collect();
            (genre, world, characters)
        }
        None => (None, None, Vec::new()),
    };

    let previous_chapter = app_state
        .db
        .list_chapters(story.id)
        .await?
        .into_iter()
        .last()
        .map(|c| c.content);

    let vectors = app_state.db.list_narrative_vectors(story.id).await?;
    let direction = fold_vectors_into_direction(direction, &vectors);

    Ok(ChapterBrief {
        story_title: story.title.clone(),
        premise: story.premise.clone(),
        genre,
        world,
        characters,
        previous_chapter,
        direction,
    })
}

/// Renders the steering sliders into prose the writer model can act
/// on, then appends the user's free-text direction.
fn fold_vectors_into_direction(
    direction: Option<String>,
    vectors: &[NarrativeVector],
) -> Option<String> {
    let mut parts = Vec::new();
    if !vectors.is_empty() {
        let sliders = vectors
            .iter()
            .map(|v| format!("{} {:.0}%", v.name, v.intensity * 100.0))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("Steering levels: {}.", sliders));
    }
    if let Some(text) = direction {
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Logs one appearance event per character handed to the writer,
/// without holding up the response.
fn record_appearances(app_state: &Arc<AppState>, characters: &[CharacterProfile], chapter: &Chapter) {
    for character in characters {
        let db = app_state.db.clone();
        let character_id = character.id;
        let chapter_id = chapter.id;
        let description = format!(
            "Appeared in chapter {}: {}",
            chapter.chapter_index, chapter.title
        );
        tokio::spawn(async move {
            if let Err(e) = db
                .record_character_event(character_id, Some(chapter_id), &description)
                .await
            {
                warn!("Failed to record character appearance: {}", e);
            }
        });
    }
}

//=========================================================================================
// Settings and AI Utility Handlers
//=========================================================================================

/// Which speech/LLM providers have a key configured. Key material is
/// never echoed back.
#[utoipa::path(
    get,
    path = "/api/settings/api-key",
    responses(
        (status = 200, description = "Configured-provider flags", body = ApiKeyStatusResponse)
    )
)]
pub async fn get_api_key_status_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(ApiKeyStatusResponse {
        openai_configured: app_state.keys.openai().await.is_some(),
        elevenlabs_configured: app_state.keys.elevenlabs().await.is_some(),
    }))
}

/// Store an API key at runtime. An empty key clears the provider.
#[utoipa::path(
    post,
    path = "/api/settings/api-key",
    request_body = SetApiKeyRequest,
    responses(
        (status = 204, description = "Stored"),
        (status = 400, description = "Unknown provider")
    )
)]
pub async fn set_api_key_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<SetApiKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let api_key = Some(req.api_key).filter(|k| !k.trim().is_empty());
    match req.provider.as_str() {
        "openai" => app_state.keys.set_openai(api_key).await,
        "elevenlabs" => app_state.keys.set_elevenlabs(api_key).await,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown provider: '{}'",
                other
            )))
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Standalone suggestion chips for a turn that already happened.
#[utoipa::path(
    post,
    path = "/api/ai/chat-suggestions",
    request_body = ChatSuggestionsRequest,
    responses(
        (status = 200, description = "Suggested replies", body = ChatSuggestionsResponse),
        (status = 400, description = "Unknown stage name")
    )
)]
pub async fn chat_suggestions_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<ChatSuggestionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stage = Stage::from_str(&req.stage).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let suggestions =
        resolve_suggestions(&app_state, stage, &req.user_message, &req.assistant_message).await;
    Ok(Json(ChatSuggestionsResponse { suggestions }))
}
