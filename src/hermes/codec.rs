//! Base64 and schema framing of Hermes arguments.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::{
    HermesMethod,
    HermesRequest,
    MULTI_GET_REPLY_TYPE,
    MULTI_GET_REQUEST_TYPE,
    Payload,
    header::{
        MULTI_GET_REPLY_SCHEMA,
        MULTI_GET_REQUEST_SCHEMA,
        MercuryHeader,
        MercuryReply,
        MultiGetReply,
        MultiGetRequest,
        REQUEST_HEADER_SCHEMA,
    },
    response::{HermesBody, HermesResponse},
};
use crate::{
    error::{ProtocolError, SessionError},
    schema::{SchemaCodec, SchemaError, SchemaName},
};

const CACHE_POLICY_FIELD: &str = "MC-Cache-Policy";
const ETAG_FIELD: &str = "MC-ETag";
const TTL_FIELD: &str = "MC-TTL";
const CACHE_POLICY_PREFIX: &str = "CACHE_";

/// Builds and parses Hermes command arguments using an injected
/// [`SchemaCodec`].
#[derive(Clone)]
pub struct HermesCodec {
    schemas: Arc<dyn SchemaCodec>,
}

impl std::fmt::Debug for HermesCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HermesCodec").finish_non_exhaustive()
    }
}

impl HermesCodec {
    /// Wrap a schema codec.
    pub fn new(schemas: Arc<dyn SchemaCodec>) -> Self { Self { schemas } }

    /// Arguments for a single request: method code, header, optional payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Schema`] if the header or payload does not
    /// encode.
    pub fn encode_request(&self, request: &HermesRequest) -> Result<Vec<Value>, ProtocolError> {
        let header = self.encode_record(&REQUEST_HEADER_SCHEMA, &request.header())?;
        let mut args = vec![json!(request.method.code()), Value::String(header)];
        if let Some(payload) = &request.payload {
            let bytes = match payload {
                Payload::Raw(bytes) => bytes.to_vec(),
                Payload::Record { schema, record } => self.schemas.encode(schema, record)?,
            };
            args.push(Value::String(STANDARD.encode(bytes)));
        }
        Ok(args)
    }

    /// Arguments for a multi-get parent carrying `children` in order.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Schema`] if a header or the request list does
    /// not encode.
    pub fn encode_multi_get<'a>(
        &self,
        uri: &str,
        children: impl IntoIterator<Item = &'a HermesRequest>,
    ) -> Result<Vec<Value>, ProtocolError> {
        let header = MercuryHeader {
            uri: Some(uri.to_owned()),
            content_type: Some(MULTI_GET_REQUEST_TYPE.to_owned()),
            method: Some(HermesMethod::Get.as_str().to_owned()),
            ..MercuryHeader::default()
        };
        let body = MultiGetRequest {
            request: children.into_iter().map(HermesRequest::header).collect(),
        };
        Ok(vec![
            json!(HermesMethod::Get.code()),
            Value::String(self.encode_record(&REQUEST_HEADER_SCHEMA, &header)?),
            Value::String(self.encode_record(&MULTI_GET_REQUEST_SCHEMA, &body)?),
        ])
    }

    /// Parse a reply `result` (or push arguments) of the form
    /// `[header, body?]`.
    ///
    /// The body is decoded with `schema` when given and kept raw otherwise.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the header is missing or either
    /// element fails to decode.
    pub fn decode_response(
        &self,
        parts: &[Value],
        schema: Option<&SchemaName>,
    ) -> Result<HermesResponse, ProtocolError> {
        let Some(encoded_header) = parts.first() else {
            return Err(ProtocolError::MalformedReply("missing header"));
        };
        let header: MercuryHeader =
            self.decode_record(&REQUEST_HEADER_SCHEMA, &base64_arg(encoded_header)?)?;
        let body = match parts.get(1) {
            Some(Value::Null) | None => Bytes::new(),
            Some(encoded) => Bytes::from(base64_arg(encoded)?),
        };

        let cache_policy = header
            .user_field(CACHE_POLICY_FIELD)
            .map(|value| String::from_utf8_lossy(value).into_owned());
        let etag = header.user_field(ETAG_FIELD).map(Bytes::copy_from_slice);
        let ttl = header
            .user_field(TTL_FIELD)
            .and_then(|value| String::from_utf8_lossy(value).trim().parse().ok());

        Ok(HermesResponse {
            uri: header.uri.unwrap_or_default(),
            status_code: header.status_code.unwrap_or_default(),
            explicit_status_message: header.status_message,
            content_type: header.content_type.unwrap_or_default(),
            cache_policy,
            ttl,
            etag,
            user_fields: header.user_fields,
            body: self.decode_body(body, schema)?,
        })
    }

    /// Parse a multi-get parent reply into its per-child entries.
    ///
    /// A reply with the wrong content type is a protocol error even when its
    /// status is also a failure; otherwise a non-200 status fails every child.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotMultiGetReply`], a status error, or a
    /// decoding failure.
    pub fn decode_multi_get(&self, parts: &[Value]) -> Result<Vec<MercuryReply>, SessionError> {
        let response = self.decode_response(parts, None)?;
        if response.content_type != MULTI_GET_REPLY_TYPE {
            return Err(ProtocolError::NotMultiGetReply {
                content_type: response.content_type,
            }
            .into());
        }
        let response = response.into_result()?;
        let body = match response.body {
            HermesBody::Raw(bytes) => bytes,
            _ => Bytes::new(),
        };
        let reply: MultiGetReply = self.decode_record(&MULTI_GET_REPLY_SCHEMA, &body)?;
        Ok(reply.reply)
    }

    /// Build the response delivered to a multi-get child.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Schema`] if the child body does not decode
    /// with the child's response schema.
    pub fn child_response(
        &self,
        request: &HermesRequest,
        reply: MercuryReply,
    ) -> Result<HermesResponse, ProtocolError> {
        let body = Bytes::from(reply.body.unwrap_or_default());
        Ok(HermesResponse {
            uri: request.uri.clone(),
            status_code: reply.status_code.unwrap_or_default(),
            explicit_status_message: reply.status_message,
            content_type: reply.content_type.unwrap_or_default(),
            cache_policy: reply.cache_policy.map(|policy| normalize_cache_policy(&policy)),
            ttl: reply.ttl,
            etag: reply.etag.map(Bytes::from),
            user_fields: Vec::new(),
            body: self.decode_body(body, request.response_schema.as_ref())?,
        })
    }

    fn decode_body(
        &self,
        body: Bytes,
        schema: Option<&SchemaName>,
    ) -> Result<HermesBody, ProtocolError> {
        if body.is_empty() {
            return Ok(HermesBody::Empty);
        }
        match schema {
            Some(schema) => Ok(HermesBody::Record(self.schemas.decode(schema, &body)?)),
            None => Ok(HermesBody::Raw(body)),
        }
    }

    fn encode_record<T: Serialize>(
        &self,
        schema: &SchemaName,
        record: &T,
    ) -> Result<String, ProtocolError> {
        let value = serde_json::to_value(record).map_err(|e| SchemaError::new(schema, e))?;
        Ok(STANDARD.encode(self.schemas.encode(schema, &value)?))
    }

    fn decode_record<T: DeserializeOwned>(
        &self,
        schema: &SchemaName,
        bytes: &[u8],
    ) -> Result<T, ProtocolError> {
        let value = self.schemas.decode(schema, bytes)?;
        serde_json::from_value(value).map_err(|e| SchemaError::new(schema, e).into())
    }
}

fn base64_arg(value: &Value) -> Result<Vec<u8>, ProtocolError> {
    let Value::String(text) = value else {
        return Err(ProtocolError::MalformedReply("Hermes argument is not a string"));
    };
    STANDARD
        .decode(text)
        .map_err(|e| ProtocolError::Base64(e.to_string()))
}

/// `CACHE_PUBLIC` becomes `public`.
fn normalize_cache_policy(policy: &str) -> String {
    policy.replacen(CACHE_POLICY_PREFIX, "", 1).to_lowercase()
}
