//! services/api/src/adapters/tts.rs
//!
//! This module contains the adapter for OpenAI's Text-to-Speech (TTS) service.
//! It implements the `TextToSpeechService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{CreateSpeechRequest, SpeechModel, Voice},
    Client,
};
use async_trait::async_trait;

use crate::config::ApiKeyStore;
use storyflow_core::ports::{PortError, PortResult, TextToSpeechService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `TextToSpeechService` port using the OpenAI TTS API.
#[derive(Clone)]
pub struct OpenAiTtsAdapter {
    keys: ApiKeyStore,
    model: SpeechModel,
    voice: Voice,
}

impl OpenAiTtsAdapter {
    /// Creates a new `OpenAiTtsAdapter`.
    pub fn new(keys: ApiKeyStore, model: SpeechModel, voice: Voice) -> Self {
        Self { keys, model, voice }
    }
}

//=========================================================================================
// `TextToSpeechService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextToSpeechService for OpenAiTtsAdapter {
    /// Generates a vector of audio data (`Vec<u8>`) from the given text.
    async fn generate_audio(&self, text: &str) -> PortResult<Vec<u8>> {
        let key = self
            .keys
            .openai()
            .await
            .ok_or_else(|| PortError::MissingApiKey("openai".to_string()))?;
        let client = Client::with_config(OpenAIConfig::new().with_api_key(key));

        let request = CreateSpeechRequest {
            model: self.model.clone(),
            input: text.to_string(),
            voice: self.voice.clone(),
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = client
            .audio()
            .speech()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // The response contains a `bytes` field. We call `.to_vec()` on that field.
        Ok(response.bytes.to_vec())
    }
}
