//! The session: one persistent connection multiplexing many requests.
//!
//! A [`Session`] owns the request sequencer, the in-flight request table, the
//! outbound queue and the subscription registry. Requests issued while the
//! session is not yet connected wait in the queue and are flushed, batched
//! where possible, once the handshake succeeds. A single driver task per
//! transport classifies inbound frames and completes requests by id.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde_json::Value;
use tokio::{runtime::Handle, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod builder;
mod driver;
mod heartbeat;
mod state;

pub use builder::SessionBuilder;
pub use state::State;

use crate::{
    batch::merge_multi_gets,
    config::{Credentials, SessionConfig},
    dispatch::{DispatchQueue, Queued},
    envelope::{CommandFrame, CommandName},
    error::{Result, SessionError, TransportError},
    hermes::{HERMES_COMMAND, HermesCodec, HermesRequest, HermesResponse},
    hooks::LifecycleHooks,
    metrics,
    request::{
        CommandCall,
        HermesCall,
        HermesLeaf,
        Pending,
        PendingReply,
        RequestId,
        RequestTable,
        Route,
        Sequencer,
    },
    schema::SchemaName,
    subscription::{Adoption, Subscription, SubscriptionRegistry},
    transport::{Connector, Transport},
};

/// The live transport and the token stopping its tasks.
pub(crate) struct Link {
    generation: u64,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
}

/// Handshake waiting for the transport to open.
pub(crate) struct HandshakeSlot {
    credentials: Credentials,
    reply: oneshot::Sender<Result<()>>,
}

/// State guarded by the session mutex. Never held across an await.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) state: State,
    opening: bool,
    generation: u64,
    pub(crate) queue: DispatchQueue,
    pub(crate) subscriptions: SubscriptionRegistry,
    link: Option<Link>,
    handshake: Option<HandshakeSlot>,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    codec: HermesCodec,
    connector: Option<Arc<dyn Connector>>,
    hooks: LifecycleHooks,
    sequencer: Sequencer,
    table: RequestTable,
    shared: Mutex<Shared>,
}

impl SessionInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn config(&self) -> SessionConfig { self.config }
}

/// Clears [`Shared::opening`] if `connect` stops before installing a link,
/// including when its future is dropped mid-open.
struct OpeningGuard<'a> {
    inner: &'a SessionInner,
    armed: bool,
}

impl OpeningGuard<'_> {
    /// The caller has cleared the flag itself.
    fn disarm(mut self) { self.armed = false; }
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().opening = false;
        }
    }
}

/// Client session multiplexing commands and Hermes requests over one
/// connection.
///
/// `Session` is a cheap handle; clones share the same connection.
///
/// # Examples
///
/// ```no_run
/// use hermes_session::{Credentials, Session, hermes::HermesRequest};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), hermes_session::SessionError> {
/// let session = Session::builder().build();
/// session
///     .connect("wss://example.invalid/", Credentials::parse("user:token:extra"))
///     .await?;
/// let album = session
///     .hermes(HermesRequest::get("hm://metadata/album/0a1b2c"))
///     .await?;
/// println!("{}", album.status_message());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self { Self::builder().build() }
}

impl Session {
    /// Start configuring a new session.
    #[must_use]
    pub fn builder() -> SessionBuilder { SessionBuilder::new() }

    pub(crate) fn from_builder(builder: SessionBuilder) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config: builder.config,
                codec: HermesCodec::new(builder.schemas),
                connector: builder.connector,
                hooks: builder.hooks,
                sequencer: Sequencer::new(),
                table: RequestTable::default(),
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self { Self { inner } }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> State { self.inner.lock().state }

    /// Configuration the session was built with.
    #[must_use]
    pub fn config(&self) -> SessionConfig { self.inner.config }

    /// Requests transmitted and still awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.inner.table.len() }

    /// Requests waiting in the outbound queue.
    #[must_use]
    pub fn queued(&self) -> usize { self.inner.lock().queue.len() }

    /// Open a transport to `address` and perform the handshake.
    ///
    /// Resolves once the server accepts the handshake and the `on_connect`
    /// hook has run. Requests queued before or during the handshake are
    /// flushed afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] if the session is not
    /// disconnected, a [`TransportError`] if the transport cannot be opened or
    /// closes early, and a [`HandshakeError`](crate::HandshakeError) if the
    /// server rejects the credentials.
    pub async fn connect(&self, address: &str, credentials: Credentials) -> Result<()> {
        let Some(connector) = self.inner.connector.clone() else {
            return Err(TransportError::Open {
                address: address.to_owned(),
                reason: "no connector configured".to_owned(),
            }
            .into());
        };
        {
            let mut shared = self.inner.lock();
            if shared.state != State::Disconnected || shared.opening || shared.link.is_some() {
                return Err(SessionError::InvalidState(shared.state));
            }
            shared.opening = true;
        }
        let opening = OpeningGuard {
            inner: &self.inner,
            armed: true,
        };

        info!(address, user = credentials.user(), "opening transport");
        let (transport, events) = match connector.open(address).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(address, error = %e, "failed to open transport");
                return Err(e.into());
            }
        };

        let (reply, outcome) = oneshot::channel();
        let shutdown = CancellationToken::new();
        let generation = {
            let mut shared = self.inner.lock();
            shared.opening = false;
            opening.disarm();
            shared.generation += 1;
            shared.link = Some(Link {
                generation: shared.generation,
                transport,
                shutdown: shutdown.clone(),
            });
            shared.handshake = Some(HandshakeSlot { credentials, reply });
            shared.generation
        };
        tokio::spawn(driver::run(
            Arc::downgrade(&self.inner),
            events,
            shutdown,
            generation,
        ));

        outcome.await.unwrap_or(Err(SessionError::Abandoned))
    }

    /// Close the transport and fail every in-flight request.
    ///
    /// Queued requests are kept for the next [`connect`](Self::connect).
    /// Calling this while already disconnected does nothing.
    pub async fn disconnect(&self) { self.teardown(None).await; }

    /// Send a named command and wait for its `result`.
    ///
    /// The name is placed in the `sp/` namespace unless it already is.
    pub fn request(&self, name: impl Into<String>, args: Vec<Value>) -> PendingReply<Value> {
        let id = self.inner.sequencer.next_id();
        let (reply, tx) = PendingReply::channel(id);
        self.enqueue(Queued::Command(CommandCall {
            id,
            name: CommandName::new(name),
            args,
            route: Route::Caller(tx),
        }));
        reply
    }

    /// Send a named command without waiting for the outcome.
    ///
    /// Failures are reported through the `on_error` hook.
    pub fn request_unobserved(&self, name: impl Into<String>, args: Vec<Value>) -> RequestId {
        let id = self.inner.sequencer.next_id();
        self.enqueue(Queued::Command(CommandCall {
            id,
            name: CommandName::new(name),
            args,
            route: Route::Ignored,
        }));
        id
    }

    /// Send a Hermes request and wait for its response.
    ///
    /// Non-200 responses resolve to [`SessionError::Status`].
    pub fn hermes(&self, request: HermesRequest) -> PendingReply<HermesResponse> {
        let id = self.inner.sequencer.next_id();
        let (reply, tx) = PendingReply::channel(id);
        self.enqueue_hermes(id, request, Route::Caller(tx));
        reply
    }

    /// Send a Hermes request without waiting for the outcome.
    pub fn hermes_unobserved(&self, request: HermesRequest) -> RequestId {
        let id = self.inner.sequencer.next_id();
        self.enqueue_hermes(id, request, Route::Ignored);
        id
    }

    /// GET each URI, decoding bodies with `schema`.
    ///
    /// Issued together, eligible metadata URIs travel as one multi-get.
    pub fn get_all<I, S>(&self, uris: I, schema: Option<&SchemaName>) -> Vec<PendingReply<HermesResponse>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        uris.into_iter()
            .map(|uri| {
                let request = HermesRequest::get(uri);
                self.hermes(match schema {
                    Some(schema) => request.response_schema(schema.clone()),
                    None => request,
                })
            })
            .collect()
    }

    /// Create an unsubscribed handle for `uri`.
    ///
    /// Pushes delivered to the handle are decoded with `schema`.
    #[must_use]
    pub fn subscription(&self, uri: &str, schema: Option<SchemaName>) -> Subscription {
        Subscription::new(&self.inner, uri, schema)
    }

    /// Create a handle for `uri` and subscribe it.
    ///
    /// # Errors
    ///
    /// Propagates [`Subscription::subscribe`] errors.
    pub fn subscribe(&self, uri: &str, schema: Option<SchemaName>) -> Result<Subscription> {
        let mut subscription = self.subscription(uri, schema);
        subscription.subscribe()?;
        Ok(subscription)
    }

    /// Number of handles subscribed to `uri`.
    #[must_use]
    pub fn subscriber_count(&self, uri: &str) -> usize {
        self.inner.lock().subscriptions.refcount(uri)
    }

    pub(crate) fn subscription_request(
        &self,
        request: HermesRequest,
        adoption: Option<Adoption>,
    ) {
        let id = self.inner.sequencer.next_id();
        self.enqueue_hermes(id, request, Route::Subscription(adoption));
    }

    fn enqueue_hermes(&self, id: RequestId, request: HermesRequest, route: Route<HermesResponse>) {
        self.enqueue(Queued::Hermes(HermesCall::Leaf(HermesLeaf { id, request, route })));
    }

    fn enqueue(&self, entry: Queued) {
        let schedule = self.inner.lock().queue.push(entry);
        if schedule {
            self.schedule_flush();
        }
    }

    /// Flush on the next scheduler tick so a burst of requests leaves as one
    /// batch.
    fn schedule_flush(&self) {
        let Ok(handle) = Handle::try_current() else {
            debug!("no runtime to flush on; waiting for the next request");
            self.inner.lock().queue.disarm();
            return;
        };
        let session = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::task::yield_now().await;
            if let Some(inner) = session.upgrade() {
                Session::from_inner(inner).flush();
            }
        });
    }

    /// Transmit the whole queue if connected; otherwise defer.
    fn flush(&self) {
        let unrouted = {
            let mut shared = self.inner.lock();
            let live = match shared.state {
                State::Connected => shared.link.as_ref().map(|link| Arc::clone(&link.transport)),
                State::Disconnected | State::HandshakeSent => None,
            };
            let Some(transport) = live else {
                debug!(state = %shared.state, queued = shared.queue.len(), "flush deferred");
                shared.queue.disarm();
                return;
            };
            let entries = merge_multi_gets(
                shared.queue.take(),
                self.inner.config.multi_get_limit(),
                &self.inner.sequencer,
            );
            entries
                .into_iter()
                .flat_map(|entry| self.transmit(transport.as_ref(), entry))
                .collect::<Vec<_>>()
        };
        self.report(unrouted);
    }

    /// Register `entry` in the request table and write it.
    fn transmit(&self, transport: &dyn Transport, entry: Queued) -> Vec<SessionError> {
        let id = entry.id();
        let (frame, pending) = match entry {
            Queued::Command(mut call) => {
                let frame = CommandFrame {
                    name: call.name.as_str().to_owned(),
                    id: Some(id.to_string()),
                    args: std::mem::take(&mut call.args),
                };
                (frame, Pending::Command(call))
            }
            Queued::Hermes(call) => match call.encode(&self.inner.codec) {
                Ok(args) => {
                    let frame = CommandFrame {
                        name: HERMES_COMMAND.to_owned(),
                        id: Some(id.to_string()),
                        args,
                    };
                    (frame, Pending::Hermes(call))
                }
                Err(e) => return call.fail(&e.into()),
            },
        };
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => return pending.fail(&e.into()),
        };

        debug!(%id, name = %frame.name, interest = ?pending.interest(), "sending request");
        self.inner.table.insert(id, pending);
        match transport.send(text) {
            Ok(()) => {
                metrics::inc_requests_sent();
                Vec::new()
            }
            Err(e) => {
                let error = SessionError::from(e);
                self.inner
                    .table
                    .remove(id)
                    .map(|pending| pending.fail(&error))
                    .unwrap_or_default()
            }
        }
    }

    /// Close the link identified by `generation`, or any link for `None`.
    ///
    /// Every in-flight request fails with a connection-closed error. Errors
    /// of unobserved requests swept here are only logged.
    async fn teardown(&self, generation: Option<u64>) {
        let (link, handshake, was_connected) = {
            let mut shared = self.inner.lock();
            let current = shared.link.as_ref().map(|link| link.generation);
            if current.is_none() || generation.is_some_and(|g| current != Some(g)) {
                return;
            }
            let was_connected = shared.state == State::Connected;
            shared.state = State::Disconnected;
            (shared.link.take(), shared.handshake.take(), was_connected)
        };
        let Some(link) = link else {
            return;
        };
        link.shutdown.cancel();
        link.transport.close();

        let error = SessionError::from(TransportError::ConnectionClosed);
        if let Some(slot) = handshake {
            let _ = slot.reply.send(Err(error.clone()));
        }
        let swept = self.inner.table.drain();
        for (id, pending) in swept {
            for unrouted in pending.fail(&error) {
                debug!(%id, error = %unrouted, "dropped unobserved request on teardown");
            }
        }
        info!(generation = link.generation, "session disconnected");
        // A session that never reached Connected has nothing to announce.
        if was_connected {
            self.inner.hooks.disconnected().await;
        }
    }

    fn log_unrouted(errors: &[SessionError]) {
        for error in errors {
            warn!(error = %error, "unobserved session error");
            metrics::inc_errors();
        }
    }

    /// Report unobserved errors from synchronous code.
    fn report(&self, errors: Vec<SessionError>) {
        if errors.is_empty() {
            return;
        }
        Self::log_unrouted(&errors);
        if self.inner.hooks.on_error.is_none() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let hooks = self.inner.hooks.clone();
        handle.spawn(async move {
            for error in errors {
                hooks.error(error).await;
            }
        });
    }

    /// Report unobserved errors and wait for the hook.
    async fn report_now(&self, errors: Vec<SessionError>) {
        Self::log_unrouted(&errors);
        for error in errors {
            self.inner.hooks.error(error).await;
        }
    }

    fn heartbeat_period(&self) -> Duration { self.inner.config.heartbeat() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_wait_while_disconnected() {
        let session = Session::builder().build();
        let reply = session.request("echo", vec![Value::from("x")]);
        assert_eq!(reply.id(), RequestId::new(0));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(session.queued(), 1);
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let session = Session::builder().build();
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), State::Disconnected);
    }

    #[test]
    fn builder_settings_reach_config() {
        let config = Session::builder()
            .heartbeat_interval(Duration::from_secs(5))
            .max_multi_get(7)
            .push_buffer(0)
            .build()
            .config();
        assert_eq!(config.heartbeat(), Duration::from_secs(5));
        assert_eq!(config.multi_get_limit(), 7);
        assert_eq!(config.push_capacity(), 1);
    }

    #[test]
    fn requests_outside_runtime_are_queued() {
        let session = Session::builder().build();
        let first = session.request_unobserved("echo", vec![]);
        let second = session.request_unobserved("echo", vec![]);
        assert!(first < second);
        assert_eq!(session.queued(), 2);
    }
}
