//! Receive task: one per live transport.
//!
//! The driver consumes transport events in order, sends the handshake once the
//! transport opens, routes replies to the request table and fans pushes out to
//! subscription handles. It only holds a weak reference to the session.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{mpsc::error::TrySendError, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Session, SessionInner, State, heartbeat};
use crate::{
    envelope::{CommandFrame, CommandName, InboundFrame},
    error::{HandshakeError, RemoteError, Result, SessionError, TransportError},
    hermes::HERMES_PUSH_COMMAND,
    metrics,
    request::{Pending, RequestId},
    transport::{TransportEvent, TransportEvents},
};

/// Process events of the transport opened as `generation` until it closes
/// or `shutdown` fires.
pub(super) async fn run(
    weak: Weak<SessionInner>,
    mut events: TransportEvents,
    shutdown: CancellationToken,
    generation: u64,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = Session::from_inner(inner);
        match event {
            Some(TransportEvent::Opened) => session.send_handshake(generation).await,
            Some(TransportEvent::Frame(text)) => session.handle_frame(&text).await,
            Some(TransportEvent::Closed) | None => {
                session.teardown(Some(generation)).await;
                break;
            }
        }
    }
    trace!(generation, "receive task stopped");
}

impl Session {
    /// Write the `connect` command straight to the transport.
    async fn send_handshake(&self, generation: u64) {
        let id = self.inner.sequencer.next_id();
        let (transport, frame, reply) = {
            let mut shared = self.inner.lock();
            let transport = match &shared.link {
                Some(link) if link.generation == generation => Arc::clone(&link.transport),
                _ => return,
            };
            let Some(slot) = shared.handshake.take() else {
                debug!(generation, "transport reopened without a pending handshake");
                return;
            };
            shared.state = State::HandshakeSent;
            let frame = CommandFrame {
                name: CommandName::handshake().as_str().to_owned(),
                id: Some(id.to_string()),
                args: slot.credentials.handshake_args(),
            };
            (transport, frame, slot.reply)
        };

        let sent = frame
            .to_text()
            .map_err(SessionError::from)
            .and_then(|text| {
                self.inner.table.insert(id, Pending::Handshake(reply));
                transport.send(text).map_err(SessionError::from)
            });
        match sent {
            Ok(()) => {
                debug!(%id, "handshake sent");
                metrics::inc_requests_sent();
            }
            Err(error) => {
                warn!(%id, error = %error, "failed to send handshake");
                let pending = self.inner.table.remove(id);
                self.teardown(Some(generation)).await;
                if let Some(pending) = pending {
                    pending.fail(&error);
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        trace!(frame = text, "frame received");
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Reply { id, result }) => self.handle_reply(id, result).await,
            Ok(InboundFrame::Failure { id, error }) => self.handle_failure(id, error).await,
            Ok(InboundFrame::Push { command, args }) => self.handle_push(&command, &args),
            Err(error) => self.report_now(vec![error.into()]).await,
        }
    }

    fn take_pending(&self, id: Option<&str>) -> Option<(RequestId, Pending)> {
        let id: RequestId = id?.parse().ok()?;
        self.inner.table.remove(id).map(|pending| (id, pending))
    }

    async fn handle_reply(&self, id: Option<String>, result: Value) {
        let Some((id, pending)) = self.take_pending(id.as_deref()) else {
            debug!(id = ?id, "reply for unknown request");
            return;
        };
        metrics::inc_replies();
        let unrouted = match pending {
            Pending::Handshake(reply) => {
                self.finish_handshake(id, result, reply).await;
                return;
            }
            Pending::Command(call) => call.complete(Ok(result)).into_iter().collect(),
            Pending::Hermes(call) => {
                trace!(%id, uri = call.uri(), "hermes reply");
                call.resolve(&result, &self.inner.codec)
            }
        };
        if !unrouted.is_empty() {
            self.report_now(unrouted).await;
        }
    }

    async fn handle_failure(&self, id: Option<String>, error: Value) {
        let remote = RemoteError { error };
        let Some((id, pending)) = self.take_pending(id.as_deref()) else {
            self.report_now(vec![remote.into()]).await;
            return;
        };
        metrics::inc_replies();
        match pending {
            Pending::Handshake(reply) => {
                warn!(%id, error = %remote, "handshake failed");
                self.teardown(None).await;
                let _ = reply.send(Err(HandshakeError { result: remote.error }.into()));
            }
            pending => {
                let unrouted = pending.fail(&remote.into());
                if !unrouted.is_empty() {
                    self.report_now(unrouted).await;
                }
            }
        }
    }

    /// Enter `Connected` on `"ok"`, otherwise close and reject.
    async fn finish_handshake(
        &self,
        id: RequestId,
        result: Value,
        reply: oneshot::Sender<Result<()>>,
    ) {
        if result != Value::from("ok") {
            warn!(%id, result = %result, "handshake rejected");
            self.teardown(None).await;
            let _ = reply.send(Err(HandshakeError { result }.into()));
            return;
        }

        let (shutdown, flush) = {
            let mut shared = self.inner.lock();
            let Some(shutdown) = shared.link.as_ref().map(|link| link.shutdown.child_token())
            else {
                let _ = reply.send(Err(TransportError::ConnectionClosed.into()));
                return;
            };
            shared.state = State::Connected;
            (shutdown, shared.queue.arm())
        };
        info!("session connected");
        heartbeat::spawn(Arc::downgrade(&self.inner), shutdown, self.heartbeat_period());
        if flush {
            self.schedule_flush();
        }
        self.inner.hooks.connected().await;
        let _ = reply.send(Ok(()));
    }

    /// Deliver an `hm_b64` push to every handle subscribed to its URI.
    fn handle_push(&self, command: &str, args: &[Value]) {
        if command != HERMES_PUSH_COMMAND {
            debug!(command, "ignoring push");
            return;
        }
        let parts = args.get(1..).unwrap_or_default();
        let uri = match self.inner.codec.decode_response(parts, None) {
            Ok(response) => response.uri,
            Err(error) => {
                self.report(vec![error.into()]);
                return;
            }
        };
        let targets = self.inner.lock().subscriptions.targets(&uri);
        if targets.is_empty() {
            debug!(uri, "push without subscribers");
            return;
        }
        for target in targets {
            match self.inner.codec.decode_response(parts, target.schema.as_ref()) {
                Ok(response) => match target.sink.try_send(response) {
                    Ok(()) => metrics::inc_pushes(),
                    Err(TrySendError::Full(_)) => {
                        warn!(subscription = %target.id, uri, "push buffer full, dropping push");
                    }
                    Err(TrySendError::Closed(_)) => {}
                },
                Err(error) => {
                    warn!(subscription = %target.id, uri, error = %error, "failed to decode push");
                    self.report(vec![error.into()]);
                }
            }
        }
    }
}
