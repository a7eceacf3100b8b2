//! In-process transport used to script a server in tests.
//!
//! Each call to [`MemoryConnector::open`] hands a [`MemoryPeer`] to the
//! paired [`MemoryListener`]. The peer sees every frame the session sends and
//! can inject replies, pushes, failures or a close.
//!
//! ```
//! use hermes_session::transport::MemoryConnector;
//!
//! let (connector, listener) = MemoryConnector::pair();
//! # let _ = (connector, listener);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Connector, Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

/// Connector whose connections terminate at a [`MemoryListener`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the listener receiving its peers.
    #[must_use]
    pub fn pair() -> (Self, MemoryListener) {
        let (peers, incoming) = mpsc::unbounded_channel();
        (Self { peers }, MemoryListener { incoming })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            address: address.to_owned(),
            outbound: outbound_rx,
            events: events_tx.clone(),
        };
        self.peers.send(peer).map_err(|_| TransportError::Open {
            address: address.to_owned(),
            reason: "no listener".to_owned(),
        })?;
        let _ = events_tx.send(TransportEvent::Opened);
        let transport = MemoryTransport {
            outbound: outbound_tx,
            events: events_tx,
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), events_rx))
    }
}

struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

impl Transport for MemoryTransport {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(TransportEvent::Closed);
        }
    }
}

/// Receives the server end of every connection opened by a
/// [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> { self.incoming.recv().await }
}

/// Server end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    address: String,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    /// Address the session connected to.
    #[must_use]
    pub fn address(&self) -> &str { &self.address }

    /// Next raw frame sent by the session, or `None` once it hung up.
    pub async fn recv_text(&mut self) -> Option<String> { self.outbound.recv().await }

    /// Next frame sent by the session, parsed as JSON.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// A frame already sent by the session, without waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        let text = self.outbound.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Deliver a raw text frame to the session.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Frame(text.into())).is_ok()
    }

    /// Reply to request `id` with `result`.
    pub fn reply(&self, id: &str, result: Value) -> bool {
        self.send_text(json!({ "id": id, "result": result }).to_string())
    }

    /// Fail request `id`, or send an uncorrelated failure when `id` is `None`.
    pub fn fail(&self, id: Option<&str>, error: Value) -> bool {
        let frame = match id {
            Some(id) => json!({ "id": id, "error": error }),
            None => json!({ "error": error }),
        };
        self.send_text(frame.to_string())
    }

    /// Send a push whose `message` array is `message`.
    pub fn push(&self, message: Vec<Value>) -> bool {
        self.send_text(json!({ "message": message }).to_string())
    }

    /// Close the connection from the server side.
    pub fn close(&self) { let _ = self.events.send(TransportEvent::Closed); }
}

impl Drop for MemoryPeer {
    fn drop(&mut self) { self.close(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_emits_opened_and_carries_frames() {
        let (connector, mut listener) = MemoryConnector::pair();
        let (transport, mut events) = connector.open("mem://a").await.expect("open");
        let mut peer = listener.accept().await.expect("peer");

        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(peer.address(), "mem://a");

        transport.send("{\"id\":\"0\"}".to_owned()).expect("send");
        assert_eq!(peer.recv().await, Some(json!({"id": "0"})));

        peer.reply("0", json!("ok"));
        assert!(matches!(events.recv().await, Some(TransportEvent::Frame(_))));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (connector, _listener) = MemoryConnector::pair();
        let (transport, mut events) = connector.open("mem://b").await.expect("open");
        transport.close();
        transport.close();

        assert!(matches!(
            transport.send(String::new()),
            Err(TransportError::ConnectionClosed)
        ));
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn open_without_listener_fails() {
        let (connector, listener) = MemoryConnector::pair();
        drop(listener);
        assert!(matches!(
            connector.open("mem://c").await,
            Err(TransportError::Open { .. })
        ));
    }
}
