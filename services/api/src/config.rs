//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub frontend_origin: String,
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub tts_provider: String,
    pub tts_voice: String,
    pub elevenlabs_voice_id: String,
    pub stt_model: String,
    pub interview_model: String,
    pub suggestion_model: String,
    pub qa_model: String,
    pub writer_model: String,
    pub message_retry_base_ms: u64,
    pub message_max_retries: usize,
    pub message_drain_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let frontend_origin = std::env::var("FRONTEND_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let elevenlabs_api_key = std::env::var("ELEVENLABS_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let tts_provider =
            std::env::var("TTS_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let elevenlabs_voice_id = std::env::var("ELEVENLABS_VOICE_ID")
            .unwrap_or_else(|_| "21m00Tcm4TlvDq8ikWAM".to_string());
        let stt_model =
            std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let interview_model =
            std::env::var("INTERVIEW_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let suggestion_model =
            std::env::var("SUGGESTION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let qa_model = std::env::var("QA_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let writer_model =
            std::env::var("WRITER_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        // --- Load Message Persistence Tuning ---
        let message_retry_base_ms = parse_numeric_var("MESSAGE_RETRY_BASE_MS", 250u64)?;
        let message_max_retries = parse_numeric_var("MESSAGE_MAX_RETRIES", 3usize)?;
        let message_drain_secs = parse_numeric_var("MESSAGE_DRAIN_SECS", 5u64)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            frontend_origin,
            openai_api_key,
            elevenlabs_api_key,
            tts_provider,
            tts_voice,
            elevenlabs_voice_id,
            stt_model,
            interview_model,
            suggestion_model,
            qa_model,
            writer_model,
            message_retry_base_ms,
            message_max_retries,
            message_drain_secs,
        })
    }
}

/// Parses an optional numeric environment variable, falling back to a default.
fn parse_numeric_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

//=========================================================================================
// Runtime-updatable Provider Keys
//=========================================================================================

/// Credentials for the upstream AI providers, shared across all adapters.
///
/// Seeded from the environment at startup; the settings endpoint can replace
/// a key without a restart, so adapters read the current key on every call.
#[derive(Clone, Default)]
pub struct ApiKeyStore {
    inner: Arc<RwLock<ProviderKeys>>,
}

#[derive(Default)]
struct ProviderKeys {
    openai: Option<String>,
    elevenlabs: Option<String>,
}

impl ApiKeyStore {
    pub fn new(openai: Option<String>, elevenlabs: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProviderKeys { openai, elevenlabs })),
        }
    }

    pub async fn openai(&self) -> Option<String> {
        self.inner.read().await.openai.clone()
    }

    pub async fn elevenlabs(&self) -> Option<String> {
        self.inner.read().await.elevenlabs.clone()
    }

    /// Replaces the OpenAI key. `None` clears it.
    pub async fn set_openai(&self, key: Option<String>) {
        self.inner.write().await.openai = key;
    }

    /// Replaces the ElevenLabs key. `None` clears it.
    pub async fn set_elevenlabs(&self, key: Option<String>) {
        self.inner.write().await.elevenlabs = key;
    }
}
