//! services/api/src/web/interview.rs
//!
//! The interview turn engine. One user utterance goes in, one assistant
//! turn comes out, with the stage policy, completion heuristics and all
//! persistence folded around the upstream model call. Both the REST
//! endpoint and the voice websocket drive their turns through here so
//! the two surfaces can never disagree about stage bookkeeping.

use std::sync::Arc;

use storyflow_core::domain::{Foundation, MessageRole, NewFoundationMessage};
use storyflow_core::ports::{InterviewContext, PortResult};
use storyflow_core::stage::{
    classify_intent, determine_next_stage, reply_marks_stage_complete, Stage, UtteranceIntent,
};
use storyflow_core::suggestions::suggest_replies;
use tracing::{error, warn};
use uuid::Uuid;

use crate::web::state::AppState;

/// Served in place of the model's reply when the upstream call fails.
/// The turn still completes so the conversation can continue.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I lost my train of thought for a moment there. Could you say that again?";

/// How many recent turns ride along as context for models without their
/// own thread memory.
const TRANSCRIPT_TAIL_TURNS: usize = 12;

/// Everything one interview turn produced, ready for the HTTP or
/// websocket boundary to serialize.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub previous_stage: Stage,
    pub current_stage: Stage,
    pub is_auto_transition: bool,
    pub completed_stages: Vec<Stage>,
    pub ready_for_story: bool,
    pub show_foundation_components: bool,
    pub suggestions: Vec<String>,
    pub pending_saves: usize,
}

/// Runs one full interview turn against the given foundation snapshot.
///
/// Failures along the way degrade rather than abort: a failed model
/// call serves [`FALLBACK_REPLY`], a failed progress write is logged
/// and the outcome still describes what the turn decided. Once the
/// upstream call is issued it is never cancelled; a caller that goes
/// away mid-turn simply never sees the outcome.
pub async fn run_interview_turn(
    app_state: &Arc<AppState>,
    foundation: Foundation,
    user_text: &str,
) -> PortResult<TurnOutcome> {
    let previous_stage = foundation.current_stage;

    // Visibility commands are handled without a model call: flip the
    // flag, persist it and acknowledge.
    match classify_intent(user_text) {
        UtteranceIntent::ShowComponents => {
            return toggle_components(app_state, foundation, true).await;
        }
        UtteranceIntent::HideComponents => {
            return toggle_components(app_state, foundation, false).await;
        }
        _ => {}
    }

    let user_message = NewFoundationMessage::new(foundation.id, MessageRole::User, user_text);
    app_state.save_queue.save_message(user_message).await;

    // The policy runs on the user's words alone, before the model sees
    // them, so the reply is generated for the stage the turn lands on.
    let policy_stage = determine_next_stage(previous_stage, user_text);

    let context = build_context(app_state, &foundation, user_text).await;

    let (reply, reply_thread) = match app_state
        .interview_adapter
        .stage_reply(
            policy_stage,
            foundation.thread_id.as_deref(),
            &context,
            user_text,
        )
        .await
    {
        Ok(reply) => (reply.text, reply.thread_id),
        Err(e) => {
            error!("Interview model call failed, serving the fallback reply: {}", e);
            (FALLBACK_REPLY.to_string(), None)
        }
    };

    // Last write wins: a reply carrying a thread handle rebinds the
    // conversation, one without leaves the existing binding alone.
    let thread_id = reply_thread.or_else(|| foundation.thread_id.clone());

    let mut stages = foundation.stages;
    let mut current_stage = policy_stage;
    let mut is_auto_transition = false;
    if reply_marks_stage_complete(policy_stage, &reply) {
        stages.mark_complete(policy_stage);
        if !policy_stage.is_terminal() {
            current_stage = policy_stage.next();
            is_auto_transition = true;
        }
    }

    // The first movement away from the opening stage brings the
    // component panels into view; they stay up after that.
    let show_components = foundation.show_components || current_stage != previous_stage;

    let assistant_message =
        NewFoundationMessage::new(foundation.id, MessageRole::Assistant, reply.clone());
    app_state.save_queue.save_message(assistant_message).await;

    if let Err(e) = app_state
        .db
        .update_foundation_progress(
            foundation.id,
            current_stage,
            stages,
            show_components,
            thread_id.as_deref(),
        )
        .await
    {
        warn!("Failed to persist interview progress: {}", e);
    }

    let suggestions = resolve_suggestions(app_state, current_stage, user_text, &reply).await;
    audit_suggestions(app_state, foundation.id, current_stage, suggestions.clone());

    Ok(TurnOutcome {
        reply,
        previous_stage,
        current_stage,
        is_auto_transition,
        completed_stages: stages.completed(),
        ready_for_story: stages.ready_for_story(),
        show_foundation_components: show_components,
        suggestions,
        pending_saves: app_state.save_queue.pending_len().await,
    })
}

/// Flips the component panels and acknowledges without consuming a
/// model turn. The acknowledgement is not written to the transcript.
async fn toggle_components(
    app_state: &Arc<AppState>,
    foundation: Foundation,
    show: bool,
) -> PortResult<TurnOutcome> {
    if let Err(e) = app_state
        .db
        .update_foundation_progress(
            foundation.id,
            foundation.current_stage,
            foundation.stages,
            show,
            foundation.thread_id.as_deref(),
        )
        .await
    {
        warn!("Failed to persist component visibility: {}", e);
    }

    let reply = if show {
        "Alright, I've brought the foundation panels up for you."
    } else {
        "Okay, I've tucked the foundation panels away."
    };

    Ok(TurnOutcome {
        reply: reply.to_string(),
        previous_stage: foundation.current_stage,
        current_stage: foundation.current_stage,
        is_auto_transition: false,
        completed_stages: foundation.stages.completed(),
        ready_for_story: foundation.stages.ready_for_story(),
        show_foundation_components: show,
        suggestions: Vec::new(),
        pending_saves: app_state.save_queue.pending_len().await,
    })
}

/// Assembles the conversation state that rides along with the model
/// call. Lookup failures degrade to a thinner context rather than
/// failing the turn.
async fn build_context(
    app_state: &Arc<AppState>,
    foundation: &Foundation,
    user_text: &str,
) -> InterviewContext {
    let genre = match app_state.db.get_genre_details(foundation.id).await {
        Ok(Some(details)) => details.name.or_else(|| foundation.genre.clone()),
        Ok(None) => foundation.genre.clone(),
        Err(e) => {
            warn!("Failed to load genre details for context: {}", e);
            foundation.genre.clone()
        }
    };

    let world = match app_state.db.get_world_details(foundation.id).await {
        Ok(Some(details)) => details.description.or_else(|| foundation.description.clone()),
        Ok(None) => foundation.description.clone(),
        Err(e) => {
            warn!("Failed to load world details for context: {}", e);
            foundation.description.clone()
        }
    };

    let character_names = match app_state.db.list_characters(foundation.id).await {
        Ok(characters) => characters.into_iter().map(|c| c.name).collect(),
        Err(e) => {
            warn!("Failed to list characters for context: {}", e);
            Vec::new()
        }
    };

    let transcript_tail = match app_state.db.list_messages(foundation.id).await {
        Ok(mut messages) => {
            // The user turn now in flight may already have landed via
            // the save queue; drop it from the tail so the model does
            // not see the utterance twice.
            if messages
                .last()
                .is_some_and(|m| m.role == MessageRole::User && m.content == user_text)
            {
                messages.pop();
            }
            let skip = messages.len().saturating_sub(TRANSCRIPT_TAIL_TURNS);
            messages
                .into_iter()
                .skip(skip)
                .map(|m| (m.role, m.content))
                .collect()
        }
        Err(e) => {
            warn!("Failed to load the transcript for context: {}", e);
            Vec::new()
        }
    };

    InterviewContext {
        foundation_name: foundation.name.clone(),
        genre,
        world,
        character_names,
        transcript_tail,
    }
}

/// Suggestion chips for the user's next turn: the model first, the
/// heuristic fallback when it fails or comes back empty.
pub(crate) async fn resolve_suggestions(
    app_state: &Arc<AppState>,
    stage: Stage,
    last_user: &str,
    last_assistant: &str,
) -> Vec<String> {
    match app_state
        .suggestion_adapter
        .chat_suggestions(stage, last_user, last_assistant)
        .await
    {
        Ok(suggestions) if !suggestions.is_empty() => suggestions,
        Ok(_) => suggest_replies(stage, last_user, last_assistant),
        Err(e) => {
            warn!("Suggestion model failed, using heuristics: {}", e);
            suggest_replies(stage, last_user, last_assistant)
        }
    }
}

/// Writes the suggestion audit row without holding up the response.
fn audit_suggestions(
    app_state: &Arc<AppState>,
    foundation_id: Uuid,
    stage: Stage,
    suggestions: Vec<String>,
) {
    let db = app_state.db.clone();
    tokio::spawn(async move {
        if let Err(e) = db
            .record_suggestions(foundation_id, stage, &suggestions)
            .await
        {
            error!("Failed to record the suggestion audit row: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        test_app_state, test_foundation, MockDb, MockInterview, MockSuggestions,
    };
    use storyflow_core::ports::{InterviewReply, PortError};

    fn reply(text: &str, thread_id: Option<&str>) -> PortResult<InterviewReply> {
        Ok(InterviewReply {
            text: text.to_string(),
            thread_id: thread_id.map(String::from),
        })
    }

    #[tokio::test]
    async fn advance_phrase_moves_the_stage_and_reveals_components() {
        let db = Arc::new(MockDb::default());
        let interview =
            MockInterview::scripted(vec![reply("What kind of world should we build?", None)]);
        let state = test_app_state(
            db.clone(),
            interview.clone(),
            Arc::new(MockSuggestions::default()),
        );

        let outcome = run_interview_turn(&state, test_foundation(), "let's move on")
            .await
            .unwrap();

        assert_eq!(outcome.previous_stage, Stage::Genre);
        assert_eq!(outcome.current_stage, Stage::World);
        assert!(!outcome.is_auto_transition);
        assert!(outcome.show_foundation_components);

        let updates = db.progress_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].stage, Stage::World);
        assert!(updates[0].show_components);
        // The model was asked for the stage the policy landed on.
        assert_eq!(interview.calls.lock().unwrap()[0].stage, Stage::World);
    }

    #[tokio::test]
    async fn completion_phrase_marks_the_stage_and_auto_advances() {
        let db = Arc::new(MockDb::default());
        let interview = MockInterview::scripted(vec![reply(
            "I've created your genre profile. Your genre is set.",
            None,
        )]);
        let state = test_app_state(db.clone(), interview, Arc::new(MockSuggestions::default()));

        let outcome = run_interview_turn(&state, test_foundation(), "that sounds perfect")
            .await
            .unwrap();

        assert_eq!(outcome.previous_stage, Stage::Genre);
        assert_eq!(outcome.current_stage, Stage::World);
        assert!(outcome.is_auto_transition);
        assert_eq!(outcome.completed_stages, vec![Stage::Genre]);
        assert!(!outcome.ready_for_story);
    }

    #[tokio::test]
    async fn completion_flags_survive_later_turns() {
        let db = Arc::new(MockDb::default());
        let interview = MockInterview::scripted(vec![reply("Tell me about the details.", None)]);
        let state = test_app_state(db.clone(), interview, Arc::new(MockSuggestions::default()));

        let mut foundation = test_foundation();
        foundation.stages.mark_complete(Stage::Genre);
        foundation.current_stage = Stage::World;

        let outcome = run_interview_turn(&state, foundation, "go to details")
            .await
            .unwrap();

        assert_eq!(outcome.current_stage, Stage::Details);
        assert!(outcome.completed_stages.contains(&Stage::Genre));
        let updates = db.progress_updates.lock().unwrap();
        assert!(updates[0].stages.is_complete(Stage::Genre));
    }

    #[tokio::test]
    async fn a_new_thread_handle_rides_into_the_next_request() {
        let db = Arc::new(MockDb::default());
        let interview = MockInterview::scripted(vec![
            reply("Let's talk genre.", Some("thread_42")),
            reply("Still talking genre.", None),
        ]);
        let state = test_app_state(
            db.clone(),
            interview.clone(),
            Arc::new(MockSuggestions::default()),
        );

        run_interview_turn(&state, test_foundation(), "hello")
            .await
            .unwrap();

        let bound = {
            let updates = db.progress_updates.lock().unwrap();
            updates[0].thread_id.clone()
        };
        assert_eq!(bound.as_deref(), Some("thread_42"));

        // The next turn carries the handle back upstream.
        let mut foundation = test_foundation();
        foundation.thread_id = bound;
        run_interview_turn(&state, foundation, "hello again")
            .await
            .unwrap();

        let calls = interview.calls.lock().unwrap();
        assert_eq!(calls[0].thread_id, None);
        assert_eq!(calls[1].thread_id.as_deref(), Some("thread_42"));
        // A reply without a handle leaves the binding alone.
        let updates = db.progress_updates.lock().unwrap();
        assert_eq!(updates[1].thread_id.as_deref(), Some("thread_42"));
    }

    #[tokio::test]
    async fn model_failure_degrades_to_the_fallback_reply() {
        let db = Arc::new(MockDb::default());
        let interview =
            MockInterview::scripted(vec![Err(PortError::Unexpected("model offline".into()))]);
        let state = test_app_state(db.clone(), interview, Arc::new(MockSuggestions::default()));

        let outcome = run_interview_turn(&state, test_foundation(), "hello there")
            .await
            .unwrap();

        assert_eq!(outcome.reply, FALLBACK_REPLY);
        assert_eq!(outcome.current_stage, Stage::Genre);
        assert!(outcome.completed_stages.is_empty());

        // Both turns still reach the transcript, and no thread is bound.
        let messages = db.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, FALLBACK_REPLY);
        assert_eq!(db.progress_updates.lock().unwrap()[0].thread_id, None);
    }

    #[tokio::test]
    async fn visibility_commands_skip_the_model_entirely() {
        let db = Arc::new(MockDb::default());
        let interview = Arc::new(MockInterview::default());
        let state = test_app_state(
            db.clone(),
            interview.clone(),
            Arc::new(MockSuggestions::default()),
        );

        let shown = run_interview_turn(&state, test_foundation(), "show components please")
            .await
            .unwrap();
        assert!(shown.show_foundation_components);

        let mut foundation = test_foundation();
        foundation.show_components = true;
        let hidden = run_interview_turn(&state, foundation, "hide the components")
            .await
            .unwrap();
        assert!(!hidden.show_foundation_components);

        assert!(interview.calls.lock().unwrap().is_empty());
        assert!(db.messages.lock().unwrap().is_empty());
        assert_eq!(db.progress_updates.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_suggestion_model_falls_back_to_heuristics() {
        let db = Arc::new(MockDb::default());
        let interview = MockInterview::scripted(vec![reply(
            "Would you prefer high fantasy or urban fantasy?",
            None,
        )]);
        let suggestions = Arc::new(MockSuggestions::default());
        *suggestions.response.lock().unwrap() =
            Some(Err(PortError::Unexpected("offline".into())));
        let state = test_app_state(db.clone(), interview, suggestions);

        let outcome = run_interview_turn(&state, test_foundation(), "hi")
            .await
            .unwrap();

        let expected = suggest_replies(
            Stage::Genre,
            "hi",
            "Would you prefer high fantasy or urban fantasy?",
        );
        assert!(!outcome.suggestions.is_empty());
        assert_eq!(outcome.suggestions, expected);
    }
}
