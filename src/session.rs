//! Session store
//!
//! Holds the identity of the one active backend conversation together with
//! the time it was created or last refreshed. Expiry is lazy: every read
//! checks the age and purges a stale record, there is no background timer.

mod storage;

pub use storage::{KeyValueStore, MemoryStore};

use crate::clock::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Idle time after which a stored session is considered gone
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const SESSION_ID_KEY: &str = "wuffchat_session_id";
const SESSION_TOKEN_KEY: &str = "wuffchat_session_token";
const TIMESTAMP_KEY: &str = "wuffchat_session_timestamp";

/// A live session as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    /// Only the legacy protocol hands out tokens
    pub session_token: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session id must not be empty")]
    EmptySessionId,
    #[error("no valid session to refresh")]
    NoActiveSession,
    #[error("session storage failed: {0}")]
    Storage(String),
}

pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    /// Serialises read-modify-write sequences against `storage`
    guard: Mutex<()>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            timeout: SESSION_TIMEOUT,
            guard: Mutex::new(()),
        }
    }

    /// Store a freshly established session. Empty ids are refused.
    pub fn set(&self, session_id: &str, session_token: Option<&str>) -> Result<(), SessionError> {
        if session_id.is_empty() {
            tracing::warn!("Refusing to store empty session id");
            return Err(SessionError::EmptySessionId);
        }

        let _guard = self.lock();
        let now = self.clock.now_millis();
        self.write_record(session_id, session_token, now).map_err(|e| {
            tracing::warn!(error = %e, "Failed to store session");
            SessionError::Storage(e)
        })
    }

    /// Current session, or `None` if absent or expired.
    /// An expired record is removed as a side effect.
    pub fn get(&self) -> Option<Session> {
        let _guard = self.lock();
        self.get_locked()
    }

    /// Push the expiry window forward. Fails if no valid session exists.
    pub fn refresh(&self) -> Result<(), SessionError> {
        let _guard = self.lock();
        if self.get_locked().is_none() {
            return Err(SessionError::NoActiveSession);
        }
        let now = self.clock.now_millis();
        self.storage
            .set(TIMESTAMP_KEY, &now.to_string())
            .map_err(|e| {
                tracing::warn!(error = %e, "Failed to refresh session");
                SessionError::Storage(e)
            })
    }

    /// Drop every stored field. Idempotent.
    pub fn clear(&self) {
        let _guard = self.lock();
        self.clear_locked();
    }

    /// Drop the stored session only if it is still `session_id`.
    /// Returns whether anything was removed.
    pub fn clear_if_current(&self, session_id: &str) -> bool {
        let _guard = self.lock();
        match self.storage.get(SESSION_ID_KEY) {
            Ok(Some(stored)) if stored == session_id => {
                self.clear_locked();
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session");
                false
            }
        }
    }

    pub fn has_valid(&self) -> bool {
        self.get().is_some()
    }

    fn write_record(
        &self,
        session_id: &str,
        session_token: Option<&str>,
        now: i64,
    ) -> Result<(), String> {
        self.storage.set(SESSION_ID_KEY, session_id)?;
        match session_token.filter(|t| !t.is_empty()) {
            Some(token) => self.storage.set(SESSION_TOKEN_KEY, token)?,
            None => self.storage.remove(SESSION_TOKEN_KEY)?,
        }
        self.storage.set(TIMESTAMP_KEY, &now.to_string())
    }

    /// Raw (id, token, timestamp) triple, `None` if id or timestamp is missing
    fn read_record(&self) -> Result<Option<(String, Option<String>, String)>, String> {
        let Some(session_id) = self.storage.get(SESSION_ID_KEY)? else {
            return Ok(None);
        };
        let Some(timestamp) = self.storage.get(TIMESTAMP_KEY)? else {
            return Ok(None);
        };
        let token = self.storage.get(SESSION_TOKEN_KEY)?;
        Ok(Some((session_id, token, timestamp)))
    }

    fn get_locked(&self) -> Option<Session> {
        let (session_id, session_token, timestamp) = match self.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session");
                return None;
            }
        };

        let Ok(stamped_at) = timestamp.parse::<i64>() else {
            tracing::warn!(timestamp = %timestamp, "Discarding session with unreadable timestamp");
            self.clear_locked();
            return None;
        };

        let elapsed = self.clock.now_millis().saturating_sub(stamped_at);
        let timeout = i64::try_from(self.timeout.as_millis()).unwrap_or(i64::MAX);
        if elapsed >= timeout {
            tracing::info!(elapsed_ms = elapsed, "Session expired");
            self.clear_locked();
            return None;
        }

        Some(Session {
            session_id,
            session_token,
        })
    }

    fn clear_locked(&self) {
        for key in [SESSION_ID_KEY, SESSION_TOKEN_KEY, TIMESTAMP_KEY] {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(key, error = %e, "Failed to remove session key");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state
        self.guard
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
