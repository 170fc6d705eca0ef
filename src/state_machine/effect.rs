//! Effects produced by state transitions

use crate::message::MessageDraft;
use crate::transport::ReplyFragment;
use serde_json::Value;
use std::time::Duration;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the backend for a conversation (skipped if one is already pending)
    StartConversation,

    /// Submit a user message (spawns as background task)
    SendMessage { session_id: String, text: String },

    /// Append an entry to the transcript
    AppendMessage(MessageDraft),

    /// Pace several fragments into the transcript
    PlayReply {
        fragments: Vec<ReplyFragment>,
        conversation_done: bool,
    },

    /// Replace the metadata and phase of the latest reply
    RecordReplyMeta {
        metadata: Option<Value>,
        phase: Option<String>,
    },

    /// Remember the session the backend handed out
    SetSession {
        session_id: String,
        session_token: Option<String>,
    },

    /// Forget the session, locally and in the store
    ClearSession,

    ClearTranscript,

    /// Cancel pending playback and reload timers
    CancelScheduled,

    /// Ask the UI for a full reload after `delay`
    ScheduleReload { delay: Duration },
}

impl Effect {
    pub fn append(draft: MessageDraft) -> Self {
        Effect::AppendMessage(draft)
    }
}
