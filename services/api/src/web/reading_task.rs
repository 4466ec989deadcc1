//! services/api/src/web/reading_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! narrating a chapter aloud.

use crate::web::{
    protocol::ReaderServerMessage,
    state::{AppState, ReaderSessionState},
};
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt};
use std::sync::Arc;
use storyflow_core::ports::{PortError, PortResult};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The main asynchronous task for reading a chapter aloud.
///
/// This is a long-running task that loops through the chapter's sentences,
/// generates audio for each one, and streams it to the client.
/// It is designed to be gracefully cancelled via a `CancellationToken`.
pub async fn reading_process(
    app_state: Arc<AppState>,
    session_state_lock: Arc<Mutex<ReaderSessionState>>,
    ws_sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    cancellation_token: CancellationToken,
) -> PortResult<()> {
    info!("Reading process started.");

    let start_msg = ReaderServerMessage::ReadingStarted;
    let start_json = serde_json::to_string(&start_msg).unwrap();
    if ws_sender
        .lock()
        .await
        .send(Message::Text(start_json.into()))
        .await
        .is_err()
    {
        return Err(PortError::Unexpected(
            "Failed to send ReadingStarted message.".to_string(),
        ));
    }

    loop {
        if cancellation_token.is_cancelled() {
            info!("Reading process cancelled.");
            return Ok(());
        }

        let (current_index, sentence_to_read, chapter_id) = {
            let session = session_state_lock.lock().await;
            let current_index = session.reading_progress_index;
            if current_index >= session.sentences.len() {
                break;
            }
            let sentence_to_read = session.sentences[current_index].clone();
            let chapter_id = session.chapter_id;
            (current_index, sentence_to_read, chapter_id)
        };

        let audio_data = app_state
            .tts_adapter
            .generate_audio(&sentence_to_read)
            .await?;

        if ws_sender
            .lock()
            .await
            .send(Message::Binary(audio_data.into()))
            .await
            .is_err()
        {
            error!("Failed to send audio chunk to client. Ending reading task.");
            break;
        }

        {
            let mut session = session_state_lock.lock().await;
            session.reading_progress_index += 1;
        }

        app_state
            .db
            .update_chapter_progress(chapter_id, current_index + 1)
            .await?;
    }

    info!("Chapter narration finished.");
    let end_msg = ReaderServerMessage::ReadingEnded;
    let end_json = serde_json::to_string(&end_msg).unwrap();
    if ws_sender
        .lock()
        .await
        .send(Message::Text(end_json.into()))
        .await
        .is_err()
    {
        error!("Failed to send ReadingEnded message.");
    }

    Ok(())
}
