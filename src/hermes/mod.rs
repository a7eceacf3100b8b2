//! Hermes (Mercury) request/response sub-protocol.
//!
//! Hermes requests travel as arguments of a single command, `sp/hm_b64`:
//! a numeric method code, a base64 schema-encoded header, and an optional
//! base64 payload. Replies carry a base64 header and an optional base64 body.
//! Several GET requests may be folded into one multi-get request whose reply
//! lists one entry per child, in order.

use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::schema::SchemaName;

mod codec;
mod header;
mod response;

pub use codec::HermesCodec;
pub use header::{
    MULTI_GET_REPLY_SCHEMA,
    MULTI_GET_REQUEST_SCHEMA,
    MercuryHeader,
    MercuryReply,
    MultiGetReply,
    MultiGetRequest,
    REQUEST_HEADER_SCHEMA,
    UserField,
};
pub use response::{HermesBody, HermesResponse, StatusClass, reason_phrase};

/// Command carrying all Hermes requests.
pub const HERMES_COMMAND: &str = "sp/hm_b64";
/// Push command carrying server-initiated Hermes bodies.
pub const HERMES_PUSH_COMMAND: &str = "hm_b64";
/// Content type of a multi-get request.
pub const MULTI_GET_REQUEST_TYPE: &str = "vnd.spotify/mercury-mget-request";
/// Content type of a multi-get reply.
pub const MULTI_GET_REPLY_TYPE: &str = "vnd.spotify/mercury-mget-reply";

/// Hermes request method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HermesMethod {
    /// Read a resource.
    #[default]
    Get,
    /// Replace a resource.
    Put,
    /// Create a resource.
    Post,
    /// Apply changes to a resource.
    Modify,
    /// Fetch changes since a revision.
    Diff,
    /// Subscribe to pushes for a resource.
    Sub,
    /// Cancel a subscription.
    Unsub,
}

impl HermesMethod {
    /// Wire spelling of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Modify => "MODIFY",
            Self::Diff => "DIFF",
            Self::Sub => "SUB",
            Self::Unsub => "UNSUB",
        }
    }

    /// Numeric code placed before the header argument.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Sub => 1,
            Self::Unsub => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for HermesMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Body sent with a Hermes request.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Bytes sent as-is (base64 on the wire).
    Raw(Bytes),
    /// A record encoded with the session's schema codec.
    Record {
        /// Schema used to encode the record.
        schema: SchemaName,
        /// Record contents.
        record: Value,
    },
}

/// A single Hermes request as built by a caller.
///
/// # Examples
///
/// ```
/// use hermes_session::{
///     hermes::{HermesMethod, HermesRequest},
///     schema::SchemaName,
/// };
///
/// let request = HermesRequest::get("hm://metadata/track/0a1b")
///     .response_schema(SchemaName::new("metadata", "Track"));
/// assert_eq!(request.method(), HermesMethod::Get);
/// assert_eq!(request.uri(), "hm://metadata/track/0a1b");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct HermesRequest {
    pub(crate) method: HermesMethod,
    pub(crate) uri: String,
    pub(crate) content_type: String,
    pub(crate) source: String,
    pub(crate) payload: Option<Payload>,
    pub(crate) response_schema: Option<SchemaName>,
}

impl HermesRequest {
    /// Create a request for `uri` with `method`.
    pub fn new(method: HermesMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            content_type: String::new(),
            source: String::new(),
            payload: None,
            response_schema: None,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(uri: impl Into<String>) -> Self { Self::new(HermesMethod::Get, uri) }

    /// Set the request content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Set the request source field.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Schema used to decode the reply body.
    #[must_use]
    pub fn response_schema(mut self, schema: SchemaName) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> HermesMethod { self.method }

    /// Target URI.
    #[must_use]
    pub fn uri(&self) -> &str { &self.uri }

    /// Whether a payload is attached.
    #[must_use]
    pub fn has_payload(&self) -> bool { self.payload.is_some() }

    pub(crate) fn header(&self) -> MercuryHeader {
        MercuryHeader {
            uri: Some(self.uri.clone()),
            content_type: non_empty(&self.content_type),
            method: Some(self.method.as_str().to_owned()),
            source: non_empty(&self.source),
            ..MercuryHeader::default()
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}
