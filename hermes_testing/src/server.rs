//! A scripted server on the far side of a [`MemoryConnector`].

use std::time::Duration;

use hermes_session::{
    Credentials,
    Session,
    SessionBuilder,
    transport::{MemoryConnector, MemoryListener, MemoryPeer},
};
use serde_json::{Value, json};
use tokio::time::timeout;

use crate::TestResult;

/// Address sessions under test connect to.
pub const ADDRESS: &str = "memory://hermes";
/// Credentials sessions under test present.
pub const CREDENTIALS: &str = "alice:t0k3n:rest:of:it";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts the connections a session opens.
#[derive(Debug)]
pub struct ScriptedServer {
    listener: MemoryListener,
}

impl ScriptedServer {
    /// Wait for the session to open a transport.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection arrives in time.
    pub async fn accept(&mut self) -> TestResult<MemoryPeer> {
        timeout(RECV_TIMEOUT, self.listener.accept())
            .await?
            .ok_or_else(|| "connector dropped".into())
    }
}

/// Build a session from `builder` wired to a fresh scripted server.
#[must_use]
pub fn memory_session(builder: SessionBuilder) -> (Session, ScriptedServer) {
    let (connector, listener) = MemoryConnector::pair();
    (builder.connector(connector).build(), ScriptedServer { listener })
}

/// Next frame the session wrote to `peer`.
///
/// # Errors
///
/// Returns an error if nothing arrives in time or the session hung up.
pub async fn next_frame(peer: &mut MemoryPeer) -> TestResult<Value> {
    timeout(RECV_TIMEOUT, peer.recv())
        .await?
        .ok_or_else(|| "session hung up".into())
}

/// The `id` of a frame written by the session.
///
/// # Errors
///
/// Returns an error if the frame carries no string id.
pub fn frame_id(frame: &Value) -> TestResult<String> {
    frame["id"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| format!("frame without id: {frame}").into())
}

/// Read the `connect` frame from `peer` and answer it with `result`.
///
/// Returns the handshake frame.
///
/// # Errors
///
/// Returns an error if the first frame is not a handshake.
pub async fn answer_handshake(peer: &mut MemoryPeer, result: Value) -> TestResult<Value> {
    let frame = next_frame(peer).await?;
    if frame["name"] != "connect" {
        return Err(format!("expected handshake, got {frame}").into());
    }
    peer.reply(&frame_id(&frame)?, result);
    Ok(frame)
}

/// Connect `session` and accept its handshake.
///
/// # Errors
///
/// Returns an error if the handshake does not complete.
pub async fn connect(session: &Session, server: &mut ScriptedServer) -> TestResult<MemoryPeer> {
    let connecting = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .connect(ADDRESS, Credentials::parse(CREDENTIALS))
                .await
        })
    };
    let mut peer = server.accept().await?;
    answer_handshake(&mut peer, json!("ok")).await?;
    connecting.await??;
    Ok(peer)
}
