//! Transport error types

use thiserror::Error;

pub const START_FALLBACK: &str = "Willkommen! Leider konnte ich die Verbindung nicht herstellen.";
pub const SEND_FALLBACK: &str = "Entschuldigung, ich konnte deine Nachricht nicht verarbeiten.";
pub const DUPLICATE_FALLBACK: &str = "Ein anderer Verbindungsaufbau ist bereits in Gange...";

/// Wire-level failure from one HTTP exchange
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Decode, message)
    }

    /// Classify a non-2xx status
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            // 401 is how the legacy backend reports an unknown session
            401 | 404 => ApiErrorKind::SessionNotFound,
            500 => ApiErrorKind::ServerError,
            other => ApiErrorKind::Status(other),
        };
        Self::new(kind, format!("HTTP {status}: {body}"))
    }
}

/// Error classification at the wire level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Backend does not know the session (401 legacy, 404 current)
    SessionNotFound,
    /// HTTP 500
    ServerError,
    /// Any other non-2xx status
    Status(u16),
    /// Connect failure, timeout, broken body
    Network,
    /// 2xx with a body we could not understand
    Decode,
}

/// Normalised failure returned by the transport client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .kind.code())]
pub struct TransportFailure {
    pub kind: FailureKind,
    /// Text fit for direct display in the transcript
    pub fallback_message: Option<String>,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, fallback_message: Option<&str>) -> Self {
        Self {
            kind,
            fallback_message: fallback_message.map(str::to_string),
        }
    }

    pub fn duplicate_request() -> Self {
        Self::new(FailureKind::DuplicateRequest, Some(DUPLICATE_FALLBACK))
    }

    pub fn no_session() -> Self {
        Self::new(FailureKind::NoSession, Some(SEND_FALLBACK))
    }

    pub fn session_expired() -> Self {
        Self::new(FailureKind::SessionExpired, None)
    }

    /// The session is gone on the backend; the UI must start over
    pub fn requires_reload(&self) -> bool {
        self.kind == FailureKind::SessionExpired
    }

    /// Code string, e.g. `API_ERROR_503`
    pub fn code(&self) -> String {
        self.kind.code()
    }
}

/// Normalised failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    DuplicateRequest,
    NoSession,
    SessionExpired,
    ServerError,
    Api(u16),
    Network(String),
    Decode(String),
}

impl FailureKind {
    pub fn code(&self) -> String {
        match self {
            FailureKind::DuplicateRequest => "DUPLICATE_REQUEST".to_string(),
            FailureKind::NoSession => "NO_SESSION".to_string(),
            FailureKind::SessionExpired => "SESSION_EXPIRED".to_string(),
            FailureKind::ServerError => "SERVER_ERROR".to_string(),
            FailureKind::Api(status) => format!("API_ERROR_{status}"),
            FailureKind::Network(message) => format!("NETWORK_ERROR: {message}"),
            FailureKind::Decode(message) => format!("INVALID_RESPONSE: {message}"),
        }
    }
}

impl From<ApiError> for FailureKind {
    fn from(err: ApiError) -> Self {
        match err.kind {
            ApiErrorKind::SessionNotFound => FailureKind::SessionExpired,
            ApiErrorKind::ServerError => FailureKind::ServerError,
            ApiErrorKind::Status(status) => FailureKind::Api(status),
            ApiErrorKind::Network => FailureKind::Network(err.message),
            ApiErrorKind::Decode => FailureKind::Decode(err.message),
        }
    }
}
