//! Wire envelope shared by every command frame.
//!
//! Outbound requests are flat JSON records `{name, id, args}`. Inbound frames
//! take one of three shapes: a correlated reply carrying `id`, a failure
//! carrying `error` (with or without `id`), or an uncorrelated push carrying
//! `message: [command, ...args]`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Command name of the handshake, sent without a namespace prefix.
pub const HANDSHAKE_COMMAND: &str = "connect";
/// Namespace prefix carried by every other command.
pub const COMMAND_NAMESPACE: &str = "sp/";
/// Liveness command sent while connected.
pub const HEARTBEAT_COMMAND: &str = "sp/echo";
/// Fixed payload of the liveness command.
pub const HEARTBEAT_PAYLOAD: &str = "h";

/// A command name with the protocol namespace applied.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommandName(String);

impl CommandName {
    /// Build a command name, prefixing `sp/` unless the name already carries
    /// it or is the handshake command.
    ///
    /// # Examples
    ///
    /// ```
    /// use hermes_session::envelope::CommandName;
    ///
    /// assert_eq!(CommandName::new("echo").as_str(), "sp/echo");
    /// assert_eq!(CommandName::new("sp/echo").as_str(), "sp/echo");
    /// assert_eq!(CommandName::new("connect").as_str(), "connect");
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == HANDSHAKE_COMMAND || name.starts_with(COMMAND_NAMESPACE) {
            Self(name)
        } else {
            Self(format!("{COMMAND_NAMESPACE}{name}"))
        }
    }

    /// The handshake command name.
    #[must_use]
    pub fn handshake() -> Self { Self(HANDSHAKE_COMMAND.to_owned()) }

    /// Borrow the wire form of the name.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// Serialized form of an outbound command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Namespaced command name.
    pub name: String,
    /// Decimal request id.
    pub id: Option<String>,
    /// Ordered command arguments.
    pub args: Vec<Value>,
}

impl CommandFrame {
    /// Encode the frame as a single line of JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Json(e.to_string()))
    }
}

/// Classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Server-side failure, correlated when `id` is present.
    Failure {
        /// Request id the failure belongs to.
        id: Option<String>,
        /// Raw error member.
        error: Value,
    },
    /// Uncorrelated server push.
    Push {
        /// Push command, e.g. `hm_b64`.
        command: String,
        /// Remaining elements of the `message` array.
        args: Vec<Value>,
    },
    /// Correlated reply.
    Reply {
        /// Request id the reply belongs to.
        id: Option<String>,
        /// The `result` member, or `null` when absent.
        result: Value,
    },
}

impl InboundFrame {
    /// Parse and classify a text frame.
    ///
    /// Failures take precedence over pushes, and pushes over replies.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] for text that is not a JSON object and
    /// [`ProtocolError::UnhandledFrame`] for objects matching no known shape.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::Json("frame is not an object".to_owned()));
        };

        if let Some(error) = map.remove("error") {
            return Ok(Self::Failure {
                id: take_id(&mut map),
                error,
            });
        }
        if let Some(message) = map.remove("message") {
            let Value::Array(mut items) = message else {
                return Err(ProtocolError::UnhandledFrame(text.to_owned()));
            };
            if items.is_empty() {
                return Err(ProtocolError::UnhandledFrame(text.to_owned()));
            }
            let command = match items.remove(0) {
                Value::String(command) => command,
                other => other.to_string(),
            };
            return Ok(Self::Push {
                command,
                args: items,
            });
        }
        if map.contains_key("id") {
            return Ok(Self::Reply {
                id: take_id(&mut map),
                result: map.remove("result").unwrap_or(Value::Null),
            });
        }
        Err(ProtocolError::UnhandledFrame(text.to_owned()))
    }
}

fn take_id(map: &mut Map<String, Value>) -> Option<String> {
    match map.remove("id")? {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
