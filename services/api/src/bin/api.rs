//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, ElevenLabsTtsAdapter, OpenAiInterviewAdapter, OpenAiStoryQaAdapter,
        OpenAiSttAdapter, OpenAiSuggestionAdapter, OpenAiTtsAdapter, OpenAiWriterAdapter,
    },
    config::{ApiKeyStore, Config},
    error::ApiError,
    persistence::MessageSaveQueue,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        middleware::require_auth,
        reader_session::reader_ws_handler,
        rest::{self, ApiDoc},
        state::AppState,
        voice_session::voice_ws_handler,
    },
};
use async_openai::types::audio::{SpeechModel, Voice};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use storyflow_core::ports::TextToSpeechService;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    // Keys live in a shared store so the settings endpoint can replace them
    // without a restart; adapters read the current key on every call.
    let keys = ApiKeyStore::new(
        config.openai_api_key.clone(),
        config.elevenlabs_api_key.clone(),
    );

    let stt_adapter = Arc::new(OpenAiSttAdapter::new(keys.clone(), config.stt_model.clone()));

    let tts_adapter: Arc<dyn TextToSpeechService> = match config.tts_provider.as_str() {
        "openai" => {
            let tts_voice = match config.tts_voice.to_lowercase().as_str() {
                "alloy" => Voice::Alloy,
                "echo" => Voice::Echo,
                "fable" => Voice::Fable,
                "onyx" => Voice::Onyx,
                "nova" => Voice::Nova,
                "shimmer" => Voice::Shimmer,
                _ => {
                    return Err(ApiError::Internal(format!(
                        "Invalid TTS voice specified in config: '{}'",
                        config.tts_voice
                    )))
                }
            };
            Arc::new(OpenAiTtsAdapter::new(
                keys.clone(),
                SpeechModel::Tts1Hd,
                tts_voice,
            ))
        }
        "elevenlabs" => Arc::new(ElevenLabsTtsAdapter::new(
            keys.clone(),
            config.elevenlabs_voice_id.clone(),
        )),
        other => {
            return Err(ApiError::Internal(format!(
                "Invalid TTS provider specified in config: '{}'",
                other
            )))
        }
    };

    let interview_adapter = Arc::new(OpenAiInterviewAdapter::new(
        keys.clone(),
        config.interview_model.clone(),
    ));
    let suggestion_adapter = Arc::new(OpenAiSuggestionAdapter::new(
        keys.clone(),
        config.suggestion_model.clone(),
    ));
    let story_qa_adapter = Arc::new(OpenAiStoryQaAdapter::new(
        keys.clone(),
        config.qa_model.clone(),
    ));
    let writer_adapter = Arc::new(OpenAiWriterAdapter::new(
        keys.clone(),
        config.writer_model.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let save_queue = MessageSaveQueue::new(
        db_adapter.clone(),
        Duration::from_millis(config.message_retry_base_ms),
        config.message_max_retries,
        Duration::from_secs(config.message_drain_secs),
    );

    let app_state = Arc::new(AppState {
        db: db_adapter,
        config: config.clone(),
        keys,
        save_queue,
        interview_adapter,
        suggestion_adapter,
        story_qa_adapter,
        writer_adapter,
        stt_adapter,
        tts_adapter,
    });

    // --- 5. Configure CORS ---
    let frontend_origin = config.frontend_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!(
            "Invalid FRONTEND_ORIGIN '{}': {}",
            config.frontend_origin, e
        ))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(frontend_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/foundations",
            get(rest::list_foundations_handler).post(rest::create_foundation_handler),
        )
        .route(
            "/foundations/{id}",
            get(rest::get_foundation_handler)
                .put(rest::update_foundation_handler)
                .delete(rest::delete_foundation_handler),
        )
        .route(
            "/foundations/{id}/messages",
            get(rest::list_messages_handler).post(rest::save_message_handler),
        )
        .route(
            "/foundations/{id}/dynamic-assistant",
            post(rest::dynamic_assistant_handler),
        )
        .route("/foundations/{id}/stage", post(rest::set_stage_handler))
        .route(
            "/foundations/{id}/genre",
            get(rest::get_genre_details_handler).put(rest::put_genre_details_handler),
        )
        .route(
            "/foundations/{id}/world",
            get(rest::get_world_details_handler).put(rest::put_world_details_handler),
        )
        .route(
            "/foundations/{id}/environment",
            get(rest::get_environment_details_handler).put(rest::put_environment_details_handler),
        )
        .route(
            "/foundations/{id}/characters",
            get(rest::list_characters_handler).post(rest::create_character_handler),
        )
        .route(
            "/foundations/{id}/relationships",
            get(rest::list_relationships_handler),
        )
        .route("/foundations/{id}/voice", get(voice_ws_handler))
        .route(
            "/characters/{id}",
            get(rest::get_character_handler)
                .put(rest::update_character_handler)
                .delete(rest::delete_character_handler),
        )
        .route(
            "/characters/{id}/relationships",
            post(rest::add_relationship_handler),
        )
        .route(
            "/characters/{id}/events",
            get(rest::list_character_events_handler),
        )
        .route(
            "/stories",
            get(rest::list_stories_handler).post(rest::create_story_handler),
        )
        .route(
            "/stories/{id}",
            get(rest::get_story_handler).delete(rest::delete_story_handler),
        )
        .route("/stories/{id}/chapters", get(rest::list_chapters_handler))
        .route("/stories/{id}/vectors", get(rest::list_vectors_handler))
        .route("/stories/{id}/reader", get(reader_ws_handler))
        .route("/chapters", post(rest::draft_chapter_handler))
        .route(
            "/chapters/{id}",
            get(rest::get_chapter_handler).put(rest::update_chapter_handler),
        )
        .route(
            "/chapters/{id}/versions",
            get(rest::list_chapter_versions_handler),
        )
        .route("/vectors/{id}", put(rest::update_vector_handler))
        .route(
            "/settings/api-key",
            get(rest::get_api_key_status_handler).post(rest::set_api_key_handler),
        )
        .route(
            "/ai/chat-suggestions",
            post(rest::chat_suggestions_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .nest("/api", protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
