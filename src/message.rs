//! Transcript message types

use crate::clock::Clock;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Role of a transcript entry
///
/// The set is open: any role string the backend sends that is not one of
/// the known ones is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    User,
    Agent,
    System,
    Error,
    /// Transient "bot is typing" placeholder, never stored in a transcript
    Typing,
    Other(String),
}

impl Sender {
    pub fn as_str(&self) -> &str {
        match self {
            Sender::User => "user",
            Sender::Agent => "agent",
            Sender::System => "system",
            Sender::Error => "error",
            Sender::Typing => "typing",
            Sender::Other(role) => role,
        }
    }

    /// Map a backend `message_type` / `sender` value to a role.
    /// Missing or blank values mean the bot.
    pub fn from_message_type(message_type: Option<&str>) -> Self {
        match message_type.map(str::trim) {
            None | Some("") => Sender::Agent,
            Some(role) => Sender::from(role.to_string()),
        }
    }
}

impl From<String> for Sender {
    fn from(role: String) -> Self {
        match role.as_str() {
            "user" => Sender::User,
            "agent" | "bot" => Sender::Agent,
            "system" => Sender::System,
            "error" => Sender::Error,
            "typing" => Sender::Typing,
            _ => Sender::Other(role),
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        sender.as_str().to_string()
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the visible transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Hands out strictly increasing message ids.
///
/// Ids are millisecond timestamps; when two messages land in the same
/// millisecond (or the clock steps back) the previous id plus one is used.
#[derive(Debug, Default)]
pub struct MessageIdGen {
    last: i64,
}

impl MessageIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, now_millis: i64) -> i64 {
        let id = now_millis.max(self.last + 1);
        self.last = id;
        id
    }

    /// Build a message stamped with the clock's current time
    pub fn stamp(&mut self, clock: &dyn Clock, draft: MessageDraft) -> Message {
        let now = clock.now_millis();
        let id = self.next_id(now);
        let timestamp = Utc
            .timestamp_millis_opt(now)
            .single()
            .unwrap_or_else(Utc::now);
        Message {
            id,
            text: draft.text,
            sender: draft.sender,
            timestamp,
            metadata: draft.metadata,
        }
    }
}

/// A message before it is given an id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub text: String,
    pub sender: Sender,
    pub metadata: Option<Value>,
}

impl MessageDraft {
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

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Sender::System, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Sender::Error, text)
    }
}
