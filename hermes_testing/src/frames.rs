//! Builders for the Hermes arguments a scripted server sends back.
//!
//! Records are encoded the way [`JsonSchemaCodec`] expects them: JSON text,
//! base64 on the wire.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hermes_session::{
    JsonSchemaCodec,
    SchemaCodec,
    hermes::{
        HERMES_PUSH_COMMAND,
        MULTI_GET_REPLY_SCHEMA,
        MULTI_GET_REPLY_TYPE,
        MercuryHeader,
        MercuryReply,
        MultiGetReply,
    },
};
use serde_json::{Value, json};

use crate::TestResult;

/// Base64 of `value` serialized as JSON.
///
/// # Panics
///
/// Panics if `value` cannot be serialized, which never happens for a
/// [`Value`].
#[must_use]
pub fn b64_json(value: &Value) -> Value {
    Value::String(STANDARD.encode(serde_json::to_vec(value).expect("serialize JSON value")))
}

/// Decode a base64 JSON argument written by the session.
///
/// # Errors
///
/// Returns an error if the argument is not a base64 JSON string.
pub fn decode_b64_json(arg: &Value) -> TestResult<Value> {
    let text = arg.as_str().ok_or("argument is not a string")?;
    Ok(serde_json::from_slice(&STANDARD.decode(text)?)?)
}

/// Reply header for `uri` with `status_code` and a JSON content type.
#[must_use]
pub fn header(uri: &str, status_code: i32) -> MercuryHeader {
    MercuryHeader {
        uri: Some(uri.to_owned()),
        status_code: Some(status_code),
        content_type: Some("application/json".to_owned()),
        ..MercuryHeader::default()
    }
}

/// `result` of a Hermes reply: `[header, body?]`.
///
/// # Panics
///
/// Panics if the header does not serialize.
#[must_use]
pub fn hermes_result(header: &MercuryHeader, body: Option<&Value>) -> Value {
    let header = serde_json::to_value(header).expect("serialize header");
    let mut parts = vec![b64_json(&header)];
    parts.extend(body.map(b64_json));
    Value::Array(parts)
}

/// `result` of a successful Hermes reply carrying `body`.
#[must_use]
pub fn ok_result(uri: &str, body: &Value) -> Value { hermes_result(&header(uri, 200), Some(body)) }

/// `result` of a multi-get parent reply listing `replies`.
///
/// # Panics
///
/// Panics if the reply records do not serialize.
#[must_use]
pub fn multi_get_result(uri: &str, replies: Vec<MercuryReply>) -> Value {
    let header = MercuryHeader {
        content_type: Some(MULTI_GET_REPLY_TYPE.to_owned()),
        ..header(uri, 200)
    };
    let record = serde_json::to_value(MultiGetReply { reply: replies }).expect("serialize reply");
    let body = JsonSchemaCodec
        .encode(&MULTI_GET_REPLY_SCHEMA, &record)
        .expect("encode multi-get reply");
    json!([
        b64_json(&serde_json::to_value(header).expect("serialize header")),
        STANDARD.encode(body),
    ])
}

/// One entry of a multi-get reply.
///
/// # Panics
///
/// Panics if `body` does not serialize.
#[must_use]
pub fn child_reply(status_code: i32, body: Option<&Value>) -> MercuryReply {
    MercuryReply {
        status_code: Some(status_code),
        content_type: Some("application/json".to_owned()),
        body: body.map(|body| serde_json::to_vec(body).expect("serialize child body")),
        ..MercuryReply::default()
    }
}

/// `message` array of an `hm_b64` push for `uri`.
///
/// # Panics
///
/// Panics if the header does not serialize.
#[must_use]
pub fn push_message(uri: &str, body: &Value) -> Vec<Value> {
    let encoded = serde_json::to_value(header(uri, 200)).expect("serialize header");
    vec![
        Value::from(HERMES_PUSH_COMMAND),
        Value::from(0),
        b64_json(&encoded),
        b64_json(body),
    ]
}
