//! Wire types and the canonical reply they normalise into

use crate::message::{MessageDraft, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct StartRequest<'a> {
    /// Serialised as `null` when no session is being resumed
    pub session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StepRequest<'a> {
    pub session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<&'a str>,
    pub message: &'a str,
}

// ============================================================================
// Responses
// ============================================================================

/// Response body exactly as the backend sends it, for either protocol
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawReply {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub done: bool,
}

/// Reply in the legacy (`messages` array) protocol
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyReply {
    pub session_id: Option<String>,
    pub session_token: Option<String>,
    pub messages: Vec<Value>,
    pub metadata: Option<Value>,
    /// Backend ended the conversation
    pub done: bool,
}

/// Reply in the current (single `message`) protocol
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentReply {
    pub session_id: Option<String>,
    pub message: Option<Value>,
    pub message_type: Option<String>,
    pub metadata: Option<Value>,
    pub state: Option<String>,
}

/// The two response shapes the backend can produce
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolReply {
    Legacy(LegacyReply),
    Current(CurrentReply),
}

impl From<RawReply> for ProtocolReply {
    fn from(raw: RawReply) -> Self {
        match raw.messages {
            Some(messages) => ProtocolReply::Legacy(LegacyReply {
                session_id: raw.session_id,
                session_token: raw.session_token,
                messages,
                metadata: raw.metadata,
                done: raw.done,
            }),
            None => ProtocolReply::Current(CurrentReply {
                session_id: raw.session_id,
                message: raw.message.or(raw.response),
                message_type: raw.message_type,
                metadata: raw.metadata,
                state: raw.state,
            }),
        }
    }
}

impl ProtocolReply {
    /// Collapse either shape into the canonical reply
    pub fn normalize(self) -> BotReply {
        match self {
            ProtocolReply::Legacy(legacy) => BotReply {
                session_id: legacy.session_id.filter(|s| !s.is_empty()),
                session_token: legacy.session_token.filter(|s| !s.is_empty()),
                fragments: legacy
                    .messages
                    .iter()
                    .map(|m| ReplyFragment::from_value(m, &Sender::Agent))
                    .collect(),
                message_type: Sender::Agent,
                phase: phase_of(legacy.metadata.as_ref(), None),
                metadata: legacy.metadata,
                done: legacy.done,
            },
            ProtocolReply::Current(current) => {
                let sender = Sender::from_message_type(current.message_type.as_deref());
                let fragment = match &current.message {
                    Some(value) => ReplyFragment::from_value(value, &sender),
                    None => ReplyFragment::new(sender.clone(), ""),
                }
                .with_metadata(current.metadata.clone());
                BotReply {
                    session_id: current.session_id.filter(|s| !s.is_empty()),
                    session_token: None,
                    fragments: vec![fragment],
                    message_type: sender,
                    phase: phase_of(current.metadata.as_ref(), current.state),
                    metadata: current.metadata,
                    done: false,
                }
            }
        }
    }
}

fn phase_of(metadata: Option<&Value>, state: Option<String>) -> Option<String> {
    metadata
        .and_then(|m| m.get("phase"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or(state)
}

// ============================================================================
// Canonical reply
// ============================================================================

/// One unit of bot output within a turn
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFragment {
    pub text: String,
    pub sender: Sender,
    pub metadata: Option<Value>,
}

impl ReplyFragment {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build from a plain string or an object with `text`/`content`.
    /// Anything else yields empty text.
    pub fn from_value(value: &Value, default_sender: &Sender) -> Self {
        match value {
            Value::String(text) => Self::new(default_sender.clone(), text.clone()),
            Value::Object(fields) => {
                let text = fields
                    .get("text")
                    .and_then(Value::as_str)
                    .or_else(|| fields.get("content").and_then(Value::as_str))
                    .unwrap_or_default();
                let sender = fields
                    .get("sender")
                    .and_then(Value::as_str)
                    .map_or_else(|| default_sender.clone(), |s| Sender::from(s.to_string()));
                Self::new(sender, text).with_metadata(fields.get("metadata").cloned())
            }
            _ => Self::new(default_sender.clone(), ""),
        }
    }

    pub fn to_draft(&self) -> MessageDraft {
        MessageDraft::new(self.sender.clone(), self.text.clone()).with_metadata(self.metadata.clone())
    }
}

/// Protocol-independent reply to a start or step request
#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub session_id: Option<String>,
    pub session_token: Option<String>,
    pub fragments: Vec<ReplyFragment>,
    pub message_type: Sender,
    pub metadata: Option<Value>,
    pub phase: Option<String>,
    /// Legacy end-of-conversation flag
    pub done: bool,
}

impl BotReply {
    /// Reply carrying a single agent fragment
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            session_id: None,
            session_token: None,
            fragments: vec![ReplyFragment::new(Sender::Agent, text)],
            message_type: Sender::Agent,
            metadata: None,
            phase: None,
            done: false,
        }
    }

    /// Text of the first fragment, the "message" of the current protocol
    pub fn message(&self) -> &str {
        self.fragments.first().map_or("", |f| f.text.as_str())
    }
}

/// Normalised successful start
#[derive(Debug, Clone, PartialEq)]
pub struct StartReply {
    pub session_id: String,
    pub reply: BotReply,
}

/// Result of the health probe
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub data: Value,
}
