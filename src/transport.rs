//! Transport client for the conversation backend
//!
//! Turns conversation intents into API calls and folds every outcome into
//! `Result<_, TransportFailure>`. Nothing past this boundary has to deal with
//! HTTP status codes, protocol variants or panics.

mod error;
mod http;
mod types;

pub use error::{
    ApiError, ApiErrorKind, FailureKind, TransportFailure, SEND_FALLBACK, START_FALLBACK,
};
pub use http::HttpApi;
pub use types::{BotReply, HealthStatus, ProtocolReply, RawReply, ReplyFragment, StartReply};

use crate::session::SessionStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raw calls against the backend, one per endpoint
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// `POST /{version}/start`, or `/flow_intro` on the flow protocol
    async fn start(&self, session_id: Option<&str>) -> Result<RawReply, ApiError>;

    /// `POST /{version}/message`, or `/flow_step` on the flow protocol
    async fn step(
        &self,
        session_id: &str,
        session_token: Option<&str>,
        message: &str,
    ) -> Result<RawReply, ApiError>;

    /// `GET /{version}/session/{id}`
    async fn session_info(&self, session_id: &str) -> Result<Value, ApiError>;

    /// `GET /health`
    async fn health(&self) -> Result<Value, ApiError>;

    /// `GET /v3/health`, succeeds iff the current protocol is served
    async fn current_protocol_health(&self) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: ConversationApi + ?Sized> ConversationApi for Arc<T> {
    async fn start(&self, session_id: Option<&str>) -> Result<RawReply, ApiError> {
        (**self).start(session_id).await
    }

    async fn step(
        &self,
        session_id: &str,
        session_token: Option<&str>,
        message: &str,
    ) -> Result<RawReply, ApiError> {
        (**self).step(session_id, session_token, message).await
    }

    async fn session_info(&self, session_id: &str) -> Result<Value, ApiError> {
        (**self).session_info(session_id).await
    }

    async fn health(&self) -> Result<Value, ApiError> {
        (**self).health().await
    }

    async fn current_protocol_health(&self) -> Result<(), ApiError> {
        (**self).current_protocol_health().await
    }
}

/// Releases the single-flight flag on every exit path
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Conversation client with single-flight start and session bookkeeping
pub struct TransportClient<A: ConversationApi> {
    api: A,
    sessions: Arc<SessionStore>,
    starting: AtomicBool,
}

impl<A: ConversationApi> TransportClient<A> {
    pub fn new(api: A, sessions: Arc<SessionStore>) -> Self {
        Self {
            api,
            sessions,
            starting: AtomicBool::new(false),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Open (or resume) a conversation.
    ///
    /// A second call while one is pending is rejected with
    /// `DUPLICATE_REQUEST` without touching the network.
    pub async fn start_conversation(
        &self,
        existing_session_id: Option<&str>,
    ) -> Result<StartReply, TransportFailure> {
        if self
            .starting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("start_conversation already in progress, ignoring duplicate request");
            return Err(TransportFailure::duplicate_request());
        }
        let _guard = StartGuard(&self.starting);

        let raw = self.api.start(existing_session_id).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to start conversation");
            TransportFailure::new(e.into(), Some(START_FALLBACK))
        })?;

        let reply = ProtocolReply::from(raw).normalize();
        let Some(session_id) = reply.session_id.clone() else {
            tracing::error!("Start response carried no session id");
            return Err(TransportFailure::new(
                FailureKind::Decode("start response without session_id".to_string()),
                Some(START_FALLBACK),
            ));
        };

        if let Err(e) = self.sessions.set(&session_id, reply.session_token.as_deref()) {
            tracing::warn!(error = %e, "Could not persist session");
        }

        tracing::info!(session_id = %session_id, fragments = reply.fragments.len(), "Conversation started");
        Ok(StartReply { session_id, reply })
    }

    /// Submit one user message.
    ///
    /// An empty `session_id` fails locally with `NO_SESSION`. A backend that
    /// no longer knows the session yields `SESSION_EXPIRED`, which requires a
    /// reload, and clears the store if it still holds that session.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<BotReply, TransportFailure> {
        if session_id.is_empty() {
            return Err(TransportFailure::no_session());
        }

        let session_token = self
            .sessions
            .get()
            .filter(|s| s.session_id == session_id)
            .and_then(|s| s.session_token);

        match self.api.step(session_id, session_token.as_deref(), text).await {
            Ok(raw) => {
                if let Err(e) = self.sessions.refresh() {
                    tracing::debug!(error = %e, "Session not refreshed after reply");
                }
                Ok(ProtocolReply::from(raw).normalize())
            }
            Err(e) if e.kind == ApiErrorKind::SessionNotFound => {
                tracing::warn!(session_id = %session_id, "Backend rejected session");
                // A newer conversation may already own the store
                if !self.sessions.clear_if_current(session_id) {
                    tracing::debug!(session_id = %session_id, "Stored session is newer, kept");
                }
                Err(TransportFailure::session_expired())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send message");
                Err(TransportFailure::new(e.into(), Some(SEND_FALLBACK)))
            }
        }
    }

    /// Backend's view of a session, passed through untouched
    pub async fn get_session_info(&self, session_id: &str) -> Result<Value, TransportFailure> {
        if session_id.is_empty() {
            return Err(TransportFailure::new(FailureKind::NoSession, None));
        }
        self.api.session_info(session_id).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get session info");
            TransportFailure::new(e.into(), None)
        })
    }

    pub async fn check_health(&self) -> Result<HealthStatus, TransportFailure> {
        let data = self.api.health().await.map_err(|e| {
            tracing::error!(error = %e, "Health check failed");
            TransportFailure::new(e.into(), None)
        })?;
        let healthy = data.get("status").and_then(Value::as_str) == Some("healthy");
        Ok(HealthStatus { healthy, data })
    }

    pub async fn is_current_protocol_available(&self) -> bool {
        match self.api.current_protocol_health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Current protocol not available");
                false
            }
        }
    }
}
