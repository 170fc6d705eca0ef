//! Conversation state types

use serde::{Deserialize, Serialize};

/// Conversation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatState {
    /// Waiting for the backend to open a conversation
    #[default]
    Initializing,

    /// Ready for user input
    Ready,

    /// A user message is in flight, or its reply is still being played back
    Sending,

    /// Last request failed; retryable by sending again or resetting
    Error { error: String },

    /// Backend dropped the session; a reload is pending
    SessionExpired,

    /// Legacy backend closed the conversation
    Completed,
}

impl ChatState {
    pub fn name(&self) -> &'static str {
        match self {
            ChatState::Initializing => "initializing",
            ChatState::Ready => "ready",
            ChatState::Sending => "sending",
            ChatState::Error { .. } => "error",
            ChatState::SessionExpired => "session_expired",
            ChatState::Completed => "completed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ChatState::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ChatState::Initializing | ChatState::Sending)
    }

    pub fn has_error(&self) -> bool {
        matches!(self, ChatState::Error { .. })
    }

    /// States from which a new user message may be submitted
    pub fn accepts_input(&self) -> bool {
        matches!(self, ChatState::Ready | ChatState::Error { .. })
    }
}

/// Data the transition function reads besides the state itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatContext {
    /// Session the machine believes is active
    pub session_id: Option<String>,
}

impl ChatContext {
    #[cfg(test)]
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}
