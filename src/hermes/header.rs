//! Header and multi-get records exchanged through the schema codec.

use serde::{Deserialize, Serialize};

use crate::schema::SchemaName;

/// Schema of the request/response header.
pub const REQUEST_HEADER_SCHEMA: SchemaName = SchemaName::new("mercury", "MercuryRequest");
/// Schema of a multi-get request body.
pub const MULTI_GET_REQUEST_SCHEMA: SchemaName =
    SchemaName::new("mercury", "MercuryMultiGetRequest");
/// Schema of a multi-get reply body.
pub const MULTI_GET_REPLY_SCHEMA: SchemaName = SchemaName::new("mercury", "MercuryMultiGetReply");

/// Hermes header, used for both requests and replies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MercuryHeader {
    /// Resource URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Content type of the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Request method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Reply status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    /// Optional reply status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Request source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Extension fields such as `MC-Cache-Policy`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_fields: Vec<UserField>,
}

impl MercuryHeader {
    /// Look up a user field by name.
    #[must_use]
    pub fn user_field(&self, name: &str) -> Option<&[u8]> {
        self.user_fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_slice())
    }
}

/// Named extension field on a header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserField {
    /// Field name.
    pub name: String,
    /// Raw field value.
    #[serde(default)]
    pub value: Vec<u8>,
}

/// Body of a multi-get request: the ordered child headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiGetRequest {
    /// Child request headers in child order.
    #[serde(default)]
    pub request: Vec<MercuryHeader>,
}

/// Body of a multi-get reply: one entry per child, in child order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiGetReply {
    /// Per-child replies.
    #[serde(default)]
    pub reply: Vec<MercuryReply>,
}

/// A single child reply inside a multi-get reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MercuryReply {
    /// Status code for this child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    /// Optional status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Cache policy enum name, e.g. `CACHE_PUBLIC`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_policy: Option<String>,
    /// Cache time-to-live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// Entity tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Vec<u8>>,
    /// Content type of the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Encoded child body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}
