//! Events that can occur in a conversation

use crate::transport::{BotReply, TransportFailure};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Backend events
    StartSucceeded {
        session_id: String,
        reply: BotReply,
    },
    StartFailed {
        failure: TransportFailure,
    },
    SendSucceeded {
        reply: BotReply,
    },
    SendFailed {
        failure: TransportFailure,
    },

    // User events
    UserMessage {
        text: String,
    },
    Reset,

    /// Submit found the locally stored session expired
    SessionLost,

    /// Sequencer showed the last fragment of a reply
    PlaybackFinished {
        conversation_done: bool,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StartSucceeded { .. } => "start_succeeded",
            Event::StartFailed { .. } => "start_failed",
            Event::SendSucceeded { .. } => "send_succeeded",
            Event::SendFailed { .. } => "send_failed",
            Event::UserMessage { .. } => "user_message",
            Event::Reset => "reset",
            Event::SessionLost => "session_lost",
            Event::PlaybackFinished { .. } => "playback_finished",
        }
    }
}
