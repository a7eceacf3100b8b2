//! Full-duplex text-frame transports.
//!
//! A [`Connector`] opens one connection and returns the sending half as a
//! [`Transport`] together with a channel of [`TransportEvent`]s. The first
//! event is always [`TransportEvent::Opened`]; the channel ends after
//! [`TransportEvent::Closed`] or when the connection is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Event emitted by an open transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is ready for traffic.
    Opened,
    /// A complete text frame arrived.
    Frame(String),
    /// The connection closed.
    Closed,
}

/// Receiving half of an open transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of an open transport.
pub trait Transport: Send + Sync {
    /// Queue `frame` for sending.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection is
    /// gone.
    fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&self);
}

/// Opens transports to an address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] if the connection cannot be
    /// established.
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError>;
}
