//! services/api/src/web/qa_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! handling a single question-and-answer cycle during narration.

use crate::web::{
    protocol::ReaderServerMessage,
    state::{AppState, ReaderSessionState},
};
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt};
use std::sync::Arc;
use std::time::Instant;
use storyflow_core::ports::{PortError, PortResult};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Represents the outcome of the `qa_process` task.
/// This tells the main handler what action to take next.
#[derive(Debug, PartialEq, Eq)]
pub enum QaOutcome {
    /// The user's speech was a command to resume reading.
    ResumeReading,
    /// The user's question was successfully answered.
    QuestionAnswered,
}

/// The main asynchronous task for handling a single reader question.
pub async fn qa_process(
    app_state: Arc<AppState>,
    session_state_lock: Arc<Mutex<ReaderSessionState>>,
    ws_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
) -> PortResult<QaOutcome> {
    let start_time = Instant::now();
    info!("QA process started.");

    let start_msg = ReaderServerMessage::AnsweringStarted;
    let start_json = serde_json::to_string(&start_msg).unwrap();
    if ws_sender
        .lock()
        .await
        .send(Message::Text(start_json.into()))
        .await
        .is_err()
    {
        return Err(PortError::Unexpected(
            "Failed to send AnsweringStarted message.".to_string(),
        ));
    }

    let (audio_buffer, context) = {
        let mut session = session_state_lock.lock().await;
        let audio_buffer = std::mem::take(&mut session.audio_buffer);

        let chapter_context = get_context_from_chapter(&session);
        let context = if let (Some(prev_q), Some(prev_a)) =
            (&session.last_question, &session.last_answer)
        {
            format!(
                "STORY CONTEXT:\n{}\n\nPREVIOUS Q&A:\nQ: {}\nA: {}",
                chapter_context, prev_q, prev_a
            )
        } else {
            chapter_context
        };

        (audio_buffer, context)
    };

    let stt_start = Instant::now();
    let question_text = app_state.stt_adapter.transcribe_audio(&audio_buffer).await?;
    info!("STT took: {:?}", stt_start.elapsed());
    info!("Transcribed question: '{}'", question_text);

    let lowercased_question = question_text.to_lowercase();
    if lowercased_question.contains("continue reading")
        || lowercased_question.contains("resume reading")
        || lowercased_question.contains("go on")
    {
        info!("'Resume reading' command detected.");
        return Ok(QaOutcome::ResumeReading);
    }

    let llm_start = Instant::now();
    let answer_text = app_state
        .story_qa_adapter
        .answer_story_question(&question_text, &context)
        .await?;
    info!("Answer model took: {:?}", llm_start.elapsed());
    info!("Generated answer: '{}'", answer_text);

    {
        let mut session = session_state_lock.lock().await;
        session.last_question = Some(question_text);
        session.last_answer = Some(answer_text.clone());
    }

    // Sentence-level TTS runs in parallel; the chunks are still sent in
    // their original order.
    let tts_start = Instant::now();
    let sentences = split_into_sentences(&answer_text);

    let mut tts_tasks = Vec::new();
    for sentence in sentences.iter() {
        let tts_adapter = app_state.tts_adapter.clone();
        let sentence = sentence.clone();
        tts_tasks.push(tokio::spawn(
            async move { tts_adapter.generate_audio(&sentence).await },
        ));
    }

    let mut audio_chunks = Vec::new();
    for (i, task) in tts_tasks.into_iter().enumerate() {
        match task.await {
            Ok(Ok(audio_data)) => {
                audio_chunks.push(audio_data);
            }
            Ok(Err(e)) => {
                error!("TTS generation failed for sentence {}: {:?}", i + 1, e);
                return Err(e);
            }
            Err(e) => {
                error!("Task join error for sentence {}: {:?}", i + 1, e);
                return Err(PortError::Unexpected(e.to_string()));
            }
        }
    }

    for audio_data in audio_chunks {
        if ws_sender
            .lock()
            .await
            .send(Message::Binary(audio_data.into()))
            .await
            .is_err()
        {
            return Err(PortError::Unexpected(
                "Failed to send answer audio chunk to client.".to_string(),
            ));
        }
    }

    info!("TTS (parallel) took: {:?}", tts_start.elapsed());
    info!("Total QA process took: {:?}", start_time.elapsed());
    info!("Finished sending answer audio.");

    let end_msg = ReaderServerMessage::AnsweringEnded;
    let end_json = serde_json::to_string(&end_msg).unwrap();
    if ws_sender
        .lock()
        .await
        .send(Message::Text(end_json.into()))
        .await
        .is_err()
    {
        warn!("Failed to send AnsweringEnded message. Client may have disconnected.");
    }

    Ok(QaOutcome::QuestionAnswered)
}

fn split_into_sentences(text: &str) -> Vec<String> {
    text.split(". ")
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let trimmed = s.trim();
            if trimmed.ends_with('.') {
                trimmed.to_string()
            } else {
                format!("{}.", trimmed)
            }
        })
        .collect()
}

/// A helper function to extract a window of narration context around the
/// reader's current position.
fn get_context_from_chapter(session: &ReaderSessionState) -> String {
    let current_index = session.reading_progress_index;
    let total_sentences = session.sentences.len();

    // A 10-sentence window centered on the current position, shifted
    // inward at either edge of the chapter.
    let start_index = if current_index < 5 {
        0
    } else if current_index + 5 >= total_sentences {
        total_sentences.saturating_sub(10)
    } else {
        current_index - 5
    };

    let end_index = (start_index + 10).min(total_sentences);

    session.sentences[start_index..end_index].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_splitting_restores_terminal_periods() {
        let sentences = split_into_sentences("The gate opened. Nobody moved. Then the bell rang");
        assert_eq!(
            sentences,
            vec![
                "The gate opened.".to_string(),
                "Nobody moved.".to_string(),
                "Then the bell rang.".to_string(),
            ]
        );
    }

    #[test]
    fn context_window_tracks_the_reading_position() {
        let sentences: Vec<String> = (0..30).map(|i| format!("Sentence {}.", i)).collect();

        let near_start = window_for(&sentences, 2);
        assert!(near_start.starts_with("Sentence 0."));
        assert!(near_start.contains("Sentence 9."));
        assert!(!near_start.contains("Sentence 10."));

        let middle = window_for(&sentences, 15);
        assert!(middle.starts_with("Sentence 10."));
        assert!(middle.contains("Sentence 19."));

        let near_end = window_for(&sentences, 29);
        assert!(near_end.starts_with("Sentence 20."));
        assert!(near_end.contains("Sentence 29."));
    }

    fn window_for(sentences: &[String], position: usize) -> String {
        let session = ReaderSessionState {
            user_id: uuid::Uuid::new_v4(),
            story_id: uuid::Uuid::new_v4(),
            chapter_id: uuid::Uuid::new_v4(),
            sentences: sentences.to_vec(),
            reading_progress_index: position,
            current_mode: crate::web::state::ReaderMode::ProcessingQuestion,
            audio_buffer: Vec::new(),
            last_question: None,
            last_answer: None,
            cancellation_token: tokio_util::sync::CancellationToken::new(),
        };
        get_context_from_chapter(&session)
    }
}
