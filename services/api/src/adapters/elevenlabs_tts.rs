//! services/api/src/adapters/elevenlabs_tts.rs
//!
//! This module contains the adapter for the ElevenLabs Text-to-Speech service.
//! It implements the `TextToSpeechService` port from the `core` crate.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::error;

use crate::config::ApiKeyStore;
use storyflow_core::ports::{PortError, PortResult, TextToSpeechService};

const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const ELEVENLABS_MODEL_ID: &str = "eleven_multilingual_v2";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextToSpeechService` port using the ElevenLabs API.
#[derive(Clone)]
pub struct ElevenLabsTtsAdapter {
    client: Client,
    keys: ApiKeyStore,
    voice_id: String,
}

impl ElevenLabsTtsAdapter {
    /// Creates a new `ElevenLabsTtsAdapter`.
    pub fn new(keys: ApiKeyStore, voice_id: String) -> Self {
        Self {
            client: Client::new(),
            keys,
            voice_id,
        }
    }
}

//=========================================================================================
// `TextToSpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextToSpeechService for ElevenLabsTtsAdapter {
    /// Generates a vector of audio data (`Vec<u8>`) from the given text.
    async fn generate_audio(&self, text: &str) -> PortResult<Vec<u8>> {
        let key = self
            .keys
            .elevenlabs()
            .await
            .ok_or_else(|| PortError::MissingApiKey("elevenlabs".to_string()))?;

        let url = format!("{}/{}", ELEVENLABS_API_URL, self.voice_id);
        let body = json!({
            "text": text,
            "model_id": ELEVENLABS_MODEL_ID,
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &key)
            .header("accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("ElevenLabs request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(status = %status, body = %detail, "ElevenLabs API returned error");
            return Err(PortError::Unexpected(format!(
                "ElevenLabs API error ({})",
                status
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to read audio body: {}", e)))?;

        Ok(audio.to_vec())
    }
}
