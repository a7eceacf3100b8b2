//! Parsed Hermes replies and status classification.

use bytes::Bytes;
use serde_json::Value;

use super::header::UserField;
use crate::error::HermesStatusError;

const UNKNOWN_STATUS: &str = "Unknown Status Code";

/// Classification of a Hermes status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    /// Exactly 200.
    Success,
    /// 300 to 399.
    Redirect,
    /// 400 to 499.
    ClientError,
    /// 500 to 599.
    ServerError,
    /// Anything else, including 2xx codes other than 200.
    Other,
}

impl StatusClass {
    /// Classify `code`.
    #[must_use]
    pub fn of(code: i32) -> Self {
        match code {
            200 => Self::Success,
            300..=399 => Self::Redirect,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

/// Standard reason phrase for an HTTP-style status code.
///
/// # Examples
///
/// ```
/// use hermes_session::hermes::reason_phrase;
///
/// assert_eq!(reason_phrase(404), Some("Not Found"));
/// assert_eq!(reason_phrase(42), None);
/// ```
#[must_use]
pub fn reason_phrase(code: i32) -> Option<&'static str> {
    let code = u16::try_from(code).ok()?;
    http::StatusCode::from_u16(code).ok()?.canonical_reason()
}

/// Decoded body of a Hermes reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum HermesBody {
    /// No body was sent.
    #[default]
    Empty,
    /// Body bytes, kept raw because no response schema was declared.
    Raw(Bytes),
    /// Body decoded with the declared response schema.
    Record(Value),
}

impl HermesBody {
    /// Borrow the decoded record, if any.
    #[must_use]
    pub fn as_record(&self) -> Option<&Value> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Borrow the raw bytes, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// A Hermes reply or push.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HermesResponse {
    /// Resource URI.
    pub uri: String,
    /// Status code.
    pub status_code: i32,
    /// Explicit status message, when the server sent one.
    pub explicit_status_message: Option<String>,
    /// Body content type.
    pub content_type: String,
    /// Cache policy. Multi-get children report it lower-cased without the
    /// `CACHE_` prefix.
    pub cache_policy: Option<String>,
    /// Cache time-to-live in seconds.
    pub ttl: Option<i64>,
    /// Entity tag.
    pub etag: Option<Bytes>,
    /// All header user fields, in header order.
    pub user_fields: Vec<UserField>,
    /// Decoded body.
    pub body: HermesBody,
}

impl HermesResponse {
    /// Classification of [`Self::status_code`].
    #[must_use]
    pub fn status_class(&self) -> StatusClass { StatusClass::of(self.status_code) }

    /// `true` only for status 200.
    #[must_use]
    pub fn is_success(&self) -> bool { self.status_class() == StatusClass::Success }

    /// `true` for 3xx.
    #[must_use]
    pub fn is_redirect(&self) -> bool { self.status_class() == StatusClass::Redirect }

    /// `true` for 4xx.
    #[must_use]
    pub fn is_client_error(&self) -> bool { self.status_class() == StatusClass::ClientError }

    /// `true` for 5xx.
    #[must_use]
    pub fn is_server_error(&self) -> bool { self.status_class() == StatusClass::ServerError }

    /// Explicit message, else the standard reason phrase, else
    /// `"Unknown Status Code"`.
    #[must_use]
    pub fn status_message(&self) -> &str {
        match self.explicit_status_message.as_deref() {
            Some(message) if !message.is_empty() => message,
            _ => reason_phrase(self.status_code).unwrap_or(UNKNOWN_STATUS),
        }
    }

    /// Look up a user field by name.
    #[must_use]
    pub fn user_field(&self, name: &str) -> Option<&[u8]> {
        self.user_fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_slice())
    }

    /// Turn a non-200 response into a [`HermesStatusError`].
    ///
    /// # Errors
    ///
    /// Returns the classified status error for every code other than 200.
    pub fn into_result(self) -> Result<Self, HermesStatusError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(HermesStatusError {
            uri: self.uri.clone(),
            status_code: self.status_code,
            message: self.status_message().to_owned(),
            kind: self.status_class().into(),
        })
    }
}
