//! Schema codec capability injected into a session.
//!
//! Hermes headers and payloads are binary records whose layout is owned by an
//! external schema collaborator. The session only knows schemas by their
//! `(package, message)` name and exchanges records as [`serde_json::Value`].

use std::{borrow::Cow, fmt};

use serde_json::Value;
use thiserror::Error;

/// Name of a schema message, e.g. `mercury.MercuryRequest`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaName {
    package: Cow<'static, str>,
    message: Cow<'static, str>,
}

impl SchemaName {
    /// Create a schema name from static strings.
    #[must_use]
    pub const fn new(package: &'static str, message: &'static str) -> Self {
        Self {
            package: Cow::Borrowed(package),
            message: Cow::Borrowed(message),
        }
    }

    /// Create a schema name from owned strings.
    #[must_use]
    pub fn owned(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            package: Cow::Owned(package.into()),
            message: Cow::Owned(message.into()),
        }
    }

    /// The schema package, e.g. `mercury`.
    #[must_use]
    pub fn package(&self) -> &str { &self.package }

    /// The message name within the package.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.package, self.message)
    }
}

/// Failure reported by a [`SchemaCodec`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("schema {schema}: {message}")]
pub struct SchemaError {
    /// Schema being encoded or decoded.
    pub schema: SchemaName,
    /// Description of the failure.
    pub message: String,
}

impl SchemaError {
    /// Build an error for `schema`.
    pub fn new(schema: &SchemaName, message: impl fmt::Display) -> Self {
        Self {
            schema: schema.clone(),
            message: message.to_string(),
        }
    }
}

/// Encode and decode records for named schemas.
pub trait SchemaCodec: Send + Sync {
    /// Serialize `record` using `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the record does not fit the schema.
    fn encode(&self, schema: &SchemaName, record: &Value) -> Result<Vec<u8>, SchemaError>;

    /// Parse `bytes` as a `schema` record.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the bytes are not a valid record.
    fn decode(&self, schema: &SchemaName, bytes: &[u8]) -> Result<Value, SchemaError>;
}

/// Codec that stores every record as JSON text.
///
/// Useful against peers that speak JSON bodies and as the default codec in
/// tests. Production servers expect the binary schema collaborator.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSchemaCodec;

impl SchemaCodec for JsonSchemaCodec {
    fn encode(&self, schema: &SchemaName, record: &Value) -> Result<Vec<u8>, SchemaError> {
        serde_json::to_vec(record).map_err(|e| SchemaError::new(schema, e))
    }

    fn decode(&self, schema: &SchemaName, bytes: &[u8]) -> Result<Value, SchemaError> {
        serde_json::from_slice(bytes).map_err(|e| SchemaError::new(schema, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK: SchemaName = SchemaName::new("metadata", "Track");

    #[test]
    fn schema_name_displays_dotted() {
        assert_eq!(TRACK.to_string(), "metadata.Track");
        assert_eq!(SchemaName::owned("metadata", "Track"), TRACK);
    }

    #[test]
    fn json_codec_reports_schema_on_failure() {
        let err = JsonSchemaCodec
            .decode(&TRACK, b"not json")
            .expect_err("invalid JSON must fail");
        assert_eq!(err.schema, TRACK);
    }
}
