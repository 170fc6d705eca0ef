//! Pure state transition function
//!
//! Given the same state, context and event this always yields the same new
//! state and effects. All I/O happens in the runtime that executes effects.

use super::{ChatContext, ChatState, Effect, Event};
use crate::message::MessageDraft;
use crate::transport::{BotReply, TransportFailure};
use std::time::Duration;
use thiserror::Error;

/// Delay between the expiry notice and the reload request
pub const RELOAD_DELAY: Duration = Duration::from_secs(2);

pub const SESSION_EXPIRED_NOTICE: &str = "Deine Sitzung ist abgelaufen. Die Seite wird neu geladen...";
pub const GENERIC_ERROR_TEXT: &str = "Ein Fehler ist aufgetreten.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Reasons an event is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error("A request is already in progress")]
    Busy,
    #[error("No active session")]
    NoSession,
    #[error("Conversation is closed, reset to start over")]
    Closed,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    state: &ChatState,
    context: &ChatContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Reset is accepted everywhere
        // ============================================================
        (_, Event::Reset) => Ok(TransitionResult::new(ChatState::Initializing).with_effects([
            Effect::CancelScheduled,
            Effect::ClearTranscript,
            Effect::ClearSession,
            Effect::StartConversation,
        ])),

        // ============================================================
        // Initialization
        // ============================================================
        (ChatState::Initializing, Event::StartSucceeded { session_id, reply }) => {
            let session = Effect::SetSession {
                session_id,
                session_token: reply.session_token.clone(),
            };
            Ok(ingest_reply(reply, ChatState::Initializing).with_effects_first([session]))
        }

        // No automatic retry, not even for a start lost to another caller's
        // pending one: the user resets
        (ChatState::Initializing, Event::StartFailed { failure }) => {
            Ok(TransitionResult::new(ChatState::Error {
                error: failure.code(),
            })
            .with_effect(Effect::append(error_bubble(&failure))))
        }

        // ============================================================
        // User messages
        // ============================================================
        (s, Event::UserMessage { text }) if s.accepts_input() => {
            let text = text.trim();
            if text.is_empty() {
                return Err(TransitionError::EmptyMessage);
            }
            let Some(session_id) = context.session_id.clone() else {
                return Err(TransitionError::NoSession);
            };
            Ok(TransitionResult::new(ChatState::Sending)
                .with_effect(Effect::append(MessageDraft::user(text)))
                .with_effect(Effect::SendMessage {
                    session_id,
                    text: text.to_string(),
                }))
        }

        (ChatState::Initializing | ChatState::Sending, Event::UserMessage { .. }) => {
            Err(TransitionError::Busy)
        }

        (ChatState::SessionExpired | ChatState::Completed, Event::UserMessage { .. }) => {
            Err(TransitionError::Closed)
        }

        (s, Event::SessionLost) if s.accepts_input() => Ok(session_expired()),

        // ============================================================
        // Replies
        // ============================================================
        (ChatState::Sending, Event::SendSucceeded { reply }) => {
            Ok(ingest_reply(reply, ChatState::Sending))
        }

        // Session gone on the backend, whatever we were doing
        (_, Event::SendFailed { failure }) if failure.requires_reload() => Ok(session_expired()),

        (ChatState::Sending, Event::SendFailed { failure }) => Ok(TransitionResult::new(
            ChatState::Error {
                error: failure.code(),
            },
        )
        .with_effect(Effect::append(error_bubble(&failure)))),

        (
            ChatState::Initializing | ChatState::Sending,
            Event::PlaybackFinished { conversation_done },
        ) => Ok(settle(conversation_done)),

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{} in state {}",
            event.name(),
            state.name()
        ))),
    }
}

/// Land a bot reply. One fragment is shown at once; several are handed to
/// the sequencer and the machine stays in `busy` until playback finishes.
fn ingest_reply(reply: BotReply, busy: ChatState) -> TransitionResult {
    let BotReply {
        fragments,
        metadata,
        phase,
        done,
        ..
    } = reply;
    let meta = Effect::RecordReplyMeta { metadata, phase };

    if fragments.len() > 1 {
        return TransitionResult::new(busy)
            .with_effect(meta)
            .with_effect(Effect::PlayReply {
                fragments,
                conversation_done: done,
            });
    }

    let appended = fragments
        .first()
        .map(|fragment| Effect::append(fragment.to_draft()));
    let settled = settle(done);
    TransitionResult::new(settled.new_state)
        .with_effect(meta)
        .with_effects(appended)
        .with_effects(settled.effects)
}

fn settle(conversation_done: bool) -> TransitionResult {
    if conversation_done {
        TransitionResult::new(ChatState::Completed).with_effect(Effect::ClearSession)
    } else {
        TransitionResult::new(ChatState::Ready)
    }
}

fn session_expired() -> TransitionResult {
    TransitionResult::new(ChatState::SessionExpired).with_effects([
        Effect::CancelScheduled,
        Effect::ClearSession,
        Effect::append(MessageDraft::system(SESSION_EXPIRED_NOTICE)),
        Effect::ScheduleReload {
            delay: RELOAD_DELAY,
        },
    ])
}

fn error_bubble(failure: &TransportFailure) -> MessageDraft {
    MessageDraft::error(
        failure
            .fallback_message
            .as_deref()
            .unwrap_or(GENERIC_ERROR_TEXT),
    )
}

impl TransitionResult {
    fn with_effects_first(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        let rest = std::mem::take(&mut self.effects);
        self.effects = effects.into_iter().chain(rest).collect();
        self
    }
}
