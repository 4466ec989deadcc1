//! services/api/src/web/reader_session.rs
//!
//! This is the main entry point and control loop for a story-reader WebSocket
//! connection. It manages the session's state machine and delegates the
//! narration and question-answering work to task modules.

use crate::web::{
    protocol::{ReaderClientMessage, ReaderServerMessage},
    qa_task::{qa_process, QaOutcome},
    reading_task::reading_process,
    state::{AppState, ReaderMode, ReaderSessionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to story-reader WebSocket connections.
pub async fn reader_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_reader_socket(socket, app_state, user_id))
}

async fn handle_reader_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New reader WebSocket connection established for user: {}", user_id);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable
    // access across the narration and QA tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender = Arc::new(Mutex::new(sender));

    let session_state_lock: Arc<Mutex<ReaderSessionState>>;

    // --- 1. Initialization Phase ---
    if let Some(Ok(Message::Text(init_json))) = receiver.next().await {
        match serde_json::from_str::<ReaderClientMessage>(&init_json) {
            Ok(ReaderClientMessage::Init { chapter_id }) => {
                info!("Initializing reader session for chapter: {}", chapter_id);

                match ReaderSessionState::new(app_state.clone(), chapter_id).await {
                    // A chapter owned by someone else answers exactly like a
                    // missing one.
                    Ok(state) if state.user_id == user_id => {
                        let init_msg = ReaderServerMessage::SessionInitialized {
                            chapter_id,
                            total_sentences: state.sentences.len(),
                            resume_index: state.reading_progress_index,
                        };
                        session_state_lock = Arc::new(Mutex::new(state));
                        if !send_frame(&ws_sender, &init_msg).await {
                            error!("Failed to send session initialized message.");
                            return;
                        }
                    }
                    Ok(_) => {
                        error!(
                            "Chapter {} does not belong to user {}",
                            chapter_id, user_id
                        );
                        send_frame(
                            &ws_sender,
                            &ReaderServerMessage::Error {
                                message: "Chapter not found.".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                    Err(e) => {
                        error!("Failed to initialize reader session state: {}", e);
                        send_frame(
                            &ws_sender,
                            &ReaderServerMessage::Error {
                                message: "Chapter not found.".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                }
            }
            _ => {
                error!("First message was not a valid Init message.");
                return;
            }
        }
    } else {
        error!("Client disconnected before sending Init message.");
        return;
    }

    // --- 2. Main Message Loop ---
    // Narration starts immediately; the client interrupts, pauses, and
    // resumes it from here.
    let mut reading_task_handle: Option<JoinHandle<()>> = {
        let session = session_state_lock.lock().await;
        let token = session.cancellation_token.clone();
        Some(spawn_reading_task(
            &app_state,
            &session_state_lock,
            &ws_sender,
            token,
        ))
    };

    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_reader_text(
                        text.to_string(),
                        &app_state,
                        &session_state_lock,
                        &ws_sender,
                        &mut reading_task_handle,
                    )
                    .await;
                }
                Message::Binary(data) => {
                    let mut session = session_state_lock.lock().await;
                    if session.current_mode == ReaderMode::InterruptedListening {
                        session.audio_buffer.extend_from_slice(&data);
                    }
                }
                Message::Close(_) => {
                    info!("Client sent close message.");
                    break;
                }
                _ => {}
            }
        } else {
            info!("Client disconnected.");
            break;
        }
    }

    // --- 3. Cleanup ---
    if let Some(handle) = reading_task_handle {
        handle.abort();
    }
    info!("Reader WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ReaderClientMessage` variants.
async fn handle_reader_text(
    text: String,
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<ReaderSessionState>>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    reading_task_handle: &mut Option<JoinHandle<()>>,
) {
    match serde_json::from_str::<ReaderClientMessage>(&text) {
        Ok(client_msg) => match client_msg {
            ReaderClientMessage::InterruptStarted => {
                info!("InterruptStarted message received. Cancelling reading task.");
                let mut session = session_state_lock.lock().await;
                session.cancellation_token.cancel();
                session.current_mode = ReaderMode::InterruptedListening;
                session.audio_buffer.clear();
            }
            ReaderClientMessage::InterruptEnded => {
                info!("InterruptEnded message received.");
                {
                    let mut session = session_state_lock.lock().await;
                    session.current_mode = ReaderMode::ProcessingQuestion;
                }

                match qa_process(
                    app_state.clone(),
                    session_state_lock.clone(),
                    ws_sender.clone(),
                )
                .await
                {
                    Ok(QaOutcome::ResumeReading) => {
                        info!("QA process resulted in ResumeReading. Restarting reading task.");
                        resume_narration(
                            app_state,
                            session_state_lock,
                            ws_sender,
                            reading_task_handle,
                        )
                        .await;
                    }
                    Ok(QaOutcome::QuestionAnswered) => {
                        info!("QA process resulted in QuestionAnswered. Awaiting next interrupt.");
                        let mut session = session_state_lock.lock().await;
                        session.current_mode = ReaderMode::InterruptedListening;
                    }
                    Err(e) => {
                        error!("Error in QA process: {:?}", e);
                        let mut session = session_state_lock.lock().await;
                        session.current_mode = ReaderMode::InterruptedListening;
                    }
                }
            }
            ReaderClientMessage::PauseReading => {
                info!("PauseReading message received.");
                {
                    let mut session = session_state_lock.lock().await;
                    session.cancellation_token.cancel();
                    session.current_mode = ReaderMode::Paused;
                }
                send_frame(ws_sender, &ReaderServerMessage::ReadingPaused).await;
            }
            ReaderClientMessage::ResumeReading => {
                info!("ResumeReading message received.");
                let is_paused = {
                    let session = session_state_lock.lock().await;
                    session.current_mode == ReaderMode::Paused
                };
                if is_paused {
                    resume_narration(app_state, session_state_lock, ws_sender, reading_task_handle)
                        .await;
                }
            }
            ReaderClientMessage::UpdateProgress { sentence_index } => {
                let (chapter_id, clamped_index) = {
                    let mut session = session_state_lock.lock().await;
                    let clamped_index = sentence_index.min(session.sentences.len());
                    session.reading_progress_index = clamped_index;
                    (session.chapter_id, clamped_index)
                };
                if let Err(e) = app_state
                    .db
                    .update_chapter_progress(chapter_id, clamped_index)
                    .await
                {
                    warn!("Failed to persist reading progress: {}", e);
                }
            }
            ReaderClientMessage::Init { .. } => {
                warn!("Received subsequent Init message, which is ignored.");
            }
        },
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
        }
    }
}

/// Restarts narration from the current progress index. A chapter whose
/// audio has all been generated only needs the client to restart playback.
async fn resume_narration(
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<ReaderSessionState>>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    reading_task_handle: &mut Option<JoinHandle<()>>,
) {
    let mut session = session_state_lock.lock().await;
    if session.reading_progress_index >= session.sentences.len() {
        info!("All audio already generated, just resuming frontend playback");
        if !send_frame(ws_sender, &ReaderServerMessage::ReadingStarted).await {
            error!("Failed to send ReadingStarted message.");
        }
        if ws_sender
            .lock()
            .await
            .send(Message::Binary(Vec::new().into()))
            .await
            .is_err()
        {
            error!("Failed to send empty audio trigger.");
        }
        return;
    }

    session.current_mode = ReaderMode::Reading;
    session.cancellation_token = CancellationToken::new();
    let token = session.cancellation_token.clone();
    *reading_task_handle = Some(spawn_reading_task(
        app_state,
        session_state_lock,
        ws_sender,
        token,
    ));
}

fn spawn_reading_task(
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<ReaderSessionState>>,
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    token: CancellationToken,
) -> JoinHandle<()> {
    let app_state = app_state.clone();
    let session_state_lock = session_state_lock.clone();
    let ws_sender = ws_sender.clone();
    tokio::spawn(async move {
        if let Err(e) = reading_process(app_state, session_state_lock, ws_sender, token).await {
            error!("Reading process failed: {:?}", e);
        }
    })
}

async fn send_frame(
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    msg: &ReaderServerMessage,
) -> bool {
    let json = serde_json::to_string(msg).unwrap();
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}
