//! Utilities for driving a [`Session`](hermes_session::Session) against a
//! scripted in-memory server during tests.
//!
//! ```rust
//! use hermes_session::Session;
//! use hermes_testing::{TestResult, connect, memory_session};
//!
//! # async fn example() -> TestResult {
//! let (session, mut server) = memory_session(Session::builder());
//! let mut peer = connect(&session, &mut server).await?;
//! let reply = session.request("echo", vec!["h".into()]);
//! # let _ = (&mut peer, reply);
//! # Ok(())
//! # }
//! ```

pub mod frames;
mod logging;
pub mod metrics;
pub mod server;

pub use frames::{
    b64_json,
    child_reply,
    decode_b64_json,
    header,
    hermes_result,
    multi_get_result,
    ok_result,
    push_message,
};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, debugging_recorder_setup};
pub use server::{
    ADDRESS,
    CREDENTIALS,
    ScriptedServer,
    answer_handshake,
    connect,
    frame_id,
    memory_session,
    next_frame,
};

/// Shared result type for tests and helpers.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
