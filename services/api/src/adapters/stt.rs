//! services/api/src/adapters/stt.rs
//!
//! This module contains the adapter for OpenAI's Speech-to-Text (Whisper) service.
//! It implements the `SpeechToTextService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::audio::{AudioInput, CreateTranscriptionRequest},
    Client,
};
use async_trait::async_trait;
use hound::{WavSpec, WavWriter};

use crate::config::ApiKeyStore;
use storyflow_core::ports::{PortError, PortResult, SpeechToTextService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `SpeechToTextService` port using the OpenAI Whisper API.
#[derive(Clone)]
pub struct OpenAiSttAdapter {
    keys: ApiKeyStore,
    model: String,
}

impl OpenAiSttAdapter {
    /// Creates a new `OpenAiSttAdapter`.
    pub fn new(keys: ApiKeyStore, model: String) -> Self {
        Self { keys, model }
    }

    fn pcm16_to_wav(pcm_data: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = std::io::Cursor::new(Vec::new());

        let spec = WavSpec {
            channels: 1, // Mono
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = WavWriter::new(&mut cursor, spec)?;

        // Convert byte array to i16 samples
        for chunk in pcm_data.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer.write_sample(sample)?;
        }

        writer.finalize()?;
        Ok(cursor.into_inner())
    }
}

//=========================================================================================
// `SpeechToTextService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SpeechToTextService for OpenAiSttAdapter {
    /// Transcribes a slice of audio data into text using the configured Whisper model.
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String> {
        let key = self
            .keys
            .openai()
            .await
            .ok_or_else(|| PortError::MissingApiKey("openai".to_string()))?;
        let client = Client::with_config(OpenAIConfig::new().with_api_key(key));

        let wav_data = Self::pcm16_to_wav(audio_data, 48000)
            .map_err(|e| PortError::Unexpected(format!("Failed to encode WAV: {}", e)))?;

        let input = AudioInput::from_vec_u8("user_audio.wav".into(), wav_data);

        let request = CreateTranscriptionRequest {
            file: input,
            model: self.model.clone(),
            ..Default::default()
        };

        // Call the API and manually map the error, which respects the orphan rule.
        let response = client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        Ok(response.text)
    }
}
