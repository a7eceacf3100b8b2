//! WebSocket transport built on `tokio-tungstenite`.
//!
//! The socket is split into a writer task fed by an unbounded channel and a
//! reader task that forwards text frames as [`TransportEvent::Frame`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{Connector, Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

enum Outbound {
    Text(String),
    Close,
}

/// Opens `ws://` and `wss://` connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
        let (socket, _response) =
            tokio_tungstenite::connect_async(address)
                .await
                .map_err(|e| TransportError::Open {
                    address: address.to_owned(),
                    reason: e.to_string(),
                })?;
        debug!(address, "websocket connected");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let _ = events_tx.send(TransportEvent::Opened);

        let writer_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    Outbound::Text(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!(error = %e, "websocket write failed");
                            writer_closed.store(true, Ordering::Release);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sink.close().await;
                        writer_closed.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        });

        let reader_closed = Arc::clone(&closed);
        let reader_events = events_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        if reader_events
                            .send(TransportEvent::Frame(text.as_str().to_owned()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::Release);
            let _ = reader_events.send(TransportEvent::Closed);
        });

        let transport = WebSocketTransport {
            outbound: outbound_tx,
            closed,
        };
        Ok((Arc::new(transport), events_rx))
    }
}

struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl Transport for WebSocketTransport {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(Outbound::Text(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}
