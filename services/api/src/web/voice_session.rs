//! services/api/src/web/voice_session.rs
//!
//! The control loop for a voice-guided creation WebSocket connection. The
//! client streams utterance audio up, the server answers with the interview
//! turn outcome and the assistant's spoken reply.

use crate::web::{
    interview::run_interview_turn,
    protocol::{VoiceClientMessage, VoiceServerMessage},
    state::{AppState, VoiceSessionState},
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
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to voice WebSocket connections.
pub async fn voice_ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_voice_socket(socket, app_state, user_id))
}

async fn handle_voice_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New voice WebSocket connection established for user: {}", user_id);

    let (mut sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let mut session = if let Some(Ok(Message::Text(init_json))) = receiver.next().await {
        match serde_json::from_str::<VoiceClientMessage>(&init_json) {
            Ok(VoiceClientMessage::Init { foundation_id }) => {
                // A foundation owned by someone else answers exactly like a
                // missing one.
                match app_state.db.get_foundation(foundation_id).await {
                    Ok(foundation) if foundation.user_id == user_id => {
                        VoiceSessionState::new(user_id, foundation_id)
                    }
                    Ok(_) => {
                        error!(
                            "Foundation {} does not belong to user {}",
                            foundation_id, user_id
                        );
                        send_frame(
                            &mut sender,
                            &VoiceServerMessage::Error {
                                message: "Foundation not found.".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                    Err(e) => {
                        error!("Failed to load foundation {}: {}", foundation_id, e);
                        send_frame(
                            &mut sender,
                            &VoiceServerMessage::Error {
                                message: "Foundation not found.".to_string(),
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
    };

    let init_msg = VoiceServerMessage::SessionInitialized {
        foundation_id: session.foundation_id,
    };
    if !send_frame(&mut sender, &init_msg).await {
        error!("Failed to send session initialized message.");
        return;
    }

    // --- 2. Main Message Loop ---
    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_voice_text(text.to_string(), &app_state, &mut session, &mut sender)
                        .await;
                }
                Message::Binary(data) => {
                    if session.capturing {
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

    info!("Voice WebSocket connection closed.");
}

/// Helper function to handle the logic for different `VoiceClientMessage` variants.
async fn handle_voice_text(
    text: String,
    app_state: &Arc<AppState>,
    session: &mut VoiceSessionState,
    sender: &mut SplitSink<WebSocket, Message>,
) {
    match serde_json::from_str::<VoiceClientMessage>(&text) {
        Ok(VoiceClientMessage::UtteranceStarted) => {
            session.capturing = true;
            session.audio_buffer.clear();
        }
        Ok(VoiceClientMessage::UtteranceEnded) => {
            session.capturing = false;
            let audio = std::mem::take(&mut session.audio_buffer);
            if audio.is_empty() {
                warn!("Utterance ended with no audio captured.");
                return;
            }

            let transcript = match app_state.stt_adapter.transcribe_audio(&audio).await {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to transcribe utterance: {}", e);
                    send_frame(
                        sender,
                        &VoiceServerMessage::Error {
                            message: "Could not understand the recording. Please try again."
                                .to_string(),
                        },
                    )
                    .await;
                    return;
                }
            };
            if transcript.trim().is_empty() {
                warn!("Transcription produced no text. Skipping the turn.");
                return;
            }

            let processing_msg = VoiceServerMessage::Processing {
                transcript: transcript.clone(),
            };
            send_frame(sender, &processing_msg).await;

            run_voice_turn(app_state, session, sender, &transcript).await;
        }
        Ok(VoiceClientMessage::Text { content }) => {
            if content.trim().is_empty() {
                warn!("Received an empty text turn. Skipping.");
                return;
            }
            run_voice_turn(app_state, session, sender, &content).await;
        }
        Ok(VoiceClientMessage::Init { .. }) => {
            warn!("Received subsequent Init message, which is ignored.");
        }
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
        }
    }
}

/// Runs one interview turn and streams its outcome back: the structured
/// turn message, a stage-change notice when the interview moved, then the
/// spoken reply as a Binary frame.
async fn run_voice_turn(
    app_state: &Arc<AppState>,
    session: &VoiceSessionState,
    sender: &mut SplitSink<WebSocket, Message>,
    user_text: &str,
) {
    // Re-fetched each turn; the previous turn may have advanced the stage.
    let foundation = match app_state.db.get_foundation(session.foundation_id).await {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to load foundation {}: {}", session.foundation_id, e);
            send_frame(
                sender,
                &VoiceServerMessage::Error {
                    message: "Failed to load foundation data.".to_string(),
                },
            )
            .await;
            return;
        }
    };

    let outcome = match run_interview_turn(app_state, foundation, user_text).await {
        Ok(o) => o,
        Err(e) => {
            error!("Interview turn failed: {}", e);
            send_frame(
                sender,
                &VoiceServerMessage::Error {
                    message: "The assistant hit a problem with that turn. Please try again."
                        .to_string(),
                },
            )
            .await;
            return;
        }
    };

    let stage_moved = outcome.previous_stage != outcome.current_stage;
    let turn_msg = VoiceServerMessage::AssistantTurn {
        reply: outcome.reply.clone(),
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
        suggestions: outcome.suggestions.clone(),
        pending_saves: outcome.pending_saves,
    };
    if !send_frame(sender, &turn_msg).await {
        error!("Failed to send assistant turn message.");
        return;
    }

    if stage_moved {
        let stage_msg = VoiceServerMessage::StageChanged {
            from: outcome.previous_stage.as_str().to_string(),
            to: outcome.current_stage.as_str().to_string(),
            is_auto_transition: outcome.is_auto_transition,
        };
        send_frame(sender, &stage_msg).await;
    }

    match app_state.tts_adapter.generate_audio(&outcome.reply).await {
        Ok(audio) => {
            if sender.send(Message::Binary(audio.into())).await.is_err() {
                error!("Failed to send reply audio to client.");
            }
        }
        Err(e) => {
            warn!("Text-to-speech failed for the reply, sending text only: {}", e);
        }
    }
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, msg: &VoiceServerMessage) -> bool {
    let json = serde_json::to_string(msg).unwrap();
    sender.send(Message::Text(json.into())).await.is_ok()
}
