//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocols between the browser client and the
//! API server. Two endpoints speak WebSocket: the voice-guided creation
//! session and the interactive story reader.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Voice-Guided Creation: Messages Sent FROM the Client TO the Server
//=========================================================================================
// NOTE: The user's spoken utterance is sent as raw Binary PCM16 frames between
// `UtteranceStarted` and `UtteranceEnded`, not as part of this enum.
//=========================================================================================

/// Structured text messages a client can send on the voice-creation socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceClientMessage {
    /// Initializes the session. This must be the first message sent on the connection.
    Init { foundation_id: Uuid },

    /// Signals that the user has started speaking.
    /// The server should clear its buffer and start collecting audio frames.
    UtteranceStarted,

    /// Signals that the user has finished speaking.
    /// The server should transcribe the buffer and run the interview turn.
    UtteranceEnded,

    /// A typed chat turn, bypassing speech-to-text entirely.
    Text { content: String },
}

//=========================================================================================
// Voice-Guided Creation: Messages Sent FROM the Server TO the Client
//=========================================================================================
// NOTE: The assistant's spoken reply is sent as a raw Binary frame following
// the `AssistantTurn` message that describes it.
//=========================================================================================

/// Structured text messages the server can send on the voice-creation socket.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceServerMessage {
    /// Confirms successful session initialization.
    SessionInitialized { foundation_id: Uuid },

    /// Reports a fatal error to the client, which should display an error message.
    Error { message: String },

    /// Signals that the utterance was received and the interview turn is running.
    /// The UI can update to a "thinking..." state.
    Processing { transcript: String },

    /// The full outcome of one interview turn.
    AssistantTurn {
        reply: String,
        previous_stage: String,
        current_stage: String,
        is_auto_transition: bool,
        completed_stages: Vec<String>,
        ready_for_story: bool,
        show_foundation_components: bool,
        suggestions: Vec<String>,
        pending_saves: usize,
    },

    /// Sent after any turn that moved the interview to a new stage.
    StageChanged {
        from: String,
        to: String,
        is_auto_transition: bool,
    },
}

//=========================================================================================
// Story Reader: Messages Sent FROM the Client TO the Server
//=========================================================================================
// NOTE: The user's question audio is sent as raw Binary frames, not as part
// of this enum.
//=========================================================================================

/// Structured text messages a client can send on the story-reader socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReaderClientMessage {
    /// Initializes a session. This must be the first message sent on the connection.
    Init { chapter_id: Uuid },

    /// Signals that the user has started speaking, interrupting the narration.
    /// The server should cancel the narration task and prepare to receive audio.
    InterruptStarted,

    /// Signals that the user has finished speaking their question.
    /// The server should now process the buffered audio.
    InterruptEnded,

    /// A user-initiated command to continue narration from the last position.
    ResumeReading,

    /// A user-initiated command to pause the narration.
    PauseReading,

    /// Reports the sentence the client's playback has actually reached.
    UpdateProgress { sentence_index: usize },
}

//=========================================================================================
// Story Reader: Messages Sent FROM the Server TO the Client
//=========================================================================================
// NOTE: The narrator's voice (both chapter prose and answers) is sent as raw
// Binary frames, not as part of this enum. These messages provide context for
// that audio.
//=========================================================================================

/// Structured text messages the server can send on the story-reader socket.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReaderServerMessage {
    /// Confirms successful session initialization.
    SessionInitialized {
        chapter_id: Uuid,
        total_sentences: usize,
        resume_index: usize,
    },

    /// Reports a fatal error to the client, which should display an error message.
    Error { message: String },

    /// Signals that the server is now streaming audio for the chapter narration.
    /// The UI can update to a "playing" state.
    ReadingStarted,

    /// Signals that the narration has been paused.
    ReadingPaused,

    /// Signals that the entire chapter has been narrated successfully.
    ReadingEnded,

    /// Signals that the server is processing the user's question and generating an answer.
    /// The UI can update to a "thinking..." or "listening..." state.
    AnsweringStarted,

    /// Signals that the narrator has finished speaking its answer.
    /// The UI can transition back to an idle/listening state.
    AnsweringEnded,
}
