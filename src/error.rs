//! Canonical error and result types for the crate.
//!
//! Every completion delivered by a [`Session`](crate::Session) carries at most
//! one [`SessionError`]. The variants separate retryable transport conditions
//! from terminal protocol and availability conditions so callers can decide
//! whether to reconnect and retry or give up on a resource.

use std::{fmt, io, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::{
    hermes::{HermesMethod, StatusClass},
    schema::SchemaError,
    session::State,
};

/// Socket-level failures.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection closed before the request could complete.
    #[error("connection closed")]
    ConnectionClosed,
    /// The transport could not be opened.
    #[error("failed to open transport to {address}: {reason}")]
    Open {
        /// Address passed to the connector.
        address: String,
        /// Human readable cause reported by the connector.
        reason: String,
    },
    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self { Self::Io(Arc::new(error)) }
}

/// Malformed or unexpected traffic from the server.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// A frame could not be parsed or produced as JSON.
    #[error("JSON frame error: {0}")]
    Json(String),
    /// A frame parsed but matched no known shape.
    #[error("unhandled frame: {0}")]
    UnhandledFrame(String),
    /// A Hermes reply did not carry the expected argument list.
    #[error("malformed Hermes reply: {0}")]
    MalformedReply(&'static str),
    /// A base64 argument could not be decoded.
    #[error("invalid base64 in Hermes argument: {0}")]
    Base64(String),
    /// Encoding or decoding through the schema codec failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A multi-get parent received a reply that is not a multi-get reply.
    #[error("Server Error: server didn't send a multi-get reply for a multi-get request")]
    NotMultiGetReply {
        /// Content type the server actually returned.
        content_type: String,
    },
}

/// Kind of non-success Hermes status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusErrorKind {
    /// 3xx.
    Redirect,
    /// 4xx.
    Client,
    /// 5xx.
    Server,
    /// Any other non-200 code, including 2xx codes other than 200.
    Other,
}

impl From<StatusClass> for StatusErrorKind {
    fn from(class: StatusClass) -> Self {
        match class {
            StatusClass::Redirect => Self::Redirect,
            StatusClass::ClientError => Self::Client,
            StatusClass::ServerError => Self::Server,
            StatusClass::Success | StatusClass::Other => Self::Other,
        }
    }
}

impl StatusErrorKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Redirect => "Redirect ",
            Self::Client => "Client ",
            Self::Server => "Server ",
            Self::Other => "",
        }
    }
}

/// A Hermes reply whose status code was not 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HermesStatusError {
    /// URI the failed request targeted.
    pub uri: String,
    /// Status code returned by the server.
    pub status_code: i32,
    /// Explicit status message or the standard reason phrase.
    pub message: String,
    /// Classification of the status code.
    pub kind: StatusErrorKind,
}

impl fmt::Display for HermesStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Error: {} ({})",
            self.kind.prefix(),
            self.message,
            self.status_code
        )
    }
}

impl std::error::Error for HermesStatusError {}

/// The `connect` command did not return `"ok"`.
#[derive(Debug, Clone, Error)]
#[error("handshake rejected: {result}")]
pub struct HandshakeError {
    /// The `result` (or `error`) value returned for the handshake.
    pub result: Value,
}

/// A wire SUB or UNSUB request failed.
#[derive(Debug, Clone, Error)]
#[error("{method} for {uri} failed")]
pub struct SubscriptionError {
    /// Wire URI of the subscription.
    pub uri: String,
    /// Either [`HermesMethod::Sub`] or [`HermesMethod::Unsub`].
    pub method: HermesMethod,
    /// Failure reported for the wire request.
    #[source]
    pub source: Box<SessionError>,
}

/// Error object returned by the server for a correlated command.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Raw `error` member of the failure frame.
    pub error: Value,
}

impl RemoteError {
    /// Numeric error code when the server sent `[code, message, ...]`.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match &self.error {
            Value::Array(items) => items.first().and_then(Value::as_i64),
            Value::Object(map) => map.get("code").and_then(Value::as_i64),
            _ => None,
        }
    }

    /// Human readable message, if the error object carries one.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.error {
            Value::Array(items) => items.get(1).and_then(Value::as_str),
            Value::Object(map) => map.get("message").and_then(Value::as_str),
            Value::String(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code(), self.message()) {
            (Some(code), Some(message)) => write!(f, "server error {code}: {message}"),
            (None, Some(message)) => write!(f, "server error: {message}"),
            _ => write!(f, "server error: {}", self.error),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Top-level error type delivered to request issuers and error hooks.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Retryable network condition.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Malformed traffic or codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Non-success Hermes status.
    #[error(transparent)]
    Status(#[from] HermesStatusError),
    /// The handshake was rejected.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// A subscription wire request failed.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// The server returned an error object for a command.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The completion slot was dropped without an outcome.
    #[error("request was abandoned without a reply")]
    Abandoned,
    /// The operation is not valid in the current session state.
    #[error("operation not valid while session is {0:?}")]
    InvalidState(State),
}

impl SessionError {
    /// Returns `true` for network conditions worth a reconnect and retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool { matches!(self, Self::Transport(_)) }

    /// Returns the Hermes status error, if this is one.
    #[must_use]
    pub fn as_status(&self) -> Option<&HermesStatusError> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl From<SchemaError> for SessionError {
    fn from(error: SchemaError) -> Self { Self::Protocol(ProtocolError::Schema(error)) }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SessionError>;
