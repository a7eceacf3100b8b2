//! Session multiplexing for Hermes RPC clients.
//!
//! A [`Session`] holds one persistent connection, performs the `connect`
//! handshake, correlates concurrent requests by id, merges eligible metadata
//! reads into multi-get requests and fans push notifications out to
//! refcounted [`Subscription`] handles.

mod batch;
pub mod config;
mod dispatch;
pub mod envelope;
pub mod error;
pub mod hermes;
pub mod hooks;
pub mod metrics;
pub mod request;
pub mod schema;
pub mod session;
pub mod subscription;
pub mod transport;

pub use config::{Credentials, SessionConfig};
pub use error::{
    HandshakeError,
    HermesStatusError,
    ProtocolError,
    RemoteError,
    Result,
    SessionError,
    StatusErrorKind,
    SubscriptionError,
    TransportError,
};
pub use hermes::{HermesBody, HermesMethod, HermesRequest, HermesResponse, Payload};
pub use request::{Interest, PendingReply, RequestId};
pub use schema::{JsonSchemaCodec, SchemaCodec, SchemaError, SchemaName};
pub use session::{Session, SessionBuilder, State};
pub use subscription::{Subscription, SubscriptionId};
