//! Push subscriptions with per-URI reference counting.
//!
//! Any number of [`Subscription`] handles may watch the same resource. Only
//! the first handle to subscribe to a URI sends a wire SUB, and only the last
//! one to leave sends the UNSUB. URIs are compared after stripping one
//! trailing slash; on the wire they always carry exactly one.
//!
//! A handle may replace the bare SUB and UNSUB with its own requests, for
//! services that subscribe through a shared endpoint with a payload naming
//! the resources. When the SUB reply body is a record carrying a `uri`, the
//! handle moves to that URI and receives pushes addressed to it.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    error::{Result, TransportError},
    hermes::{HermesMethod, HermesRequest, HermesResponse},
    schema::SchemaName,
    session::{Session, SessionInner},
};

/// Strip at most one trailing slash.
///
/// ```
/// use hermes_session::subscription::normalize_uri;
///
/// assert_eq!(normalize_uri("hm://pl/user/x/"), "hm://pl/user/x");
/// assert_eq!(normalize_uri("hm://pl/user/x"), "hm://pl/user/x");
/// ```
#[must_use]
pub fn normalize_uri(uri: &str) -> &str { uri.strip_suffix('/').unwrap_or(uri) }

fn wire_uri(uri: &str) -> String { format!("{}/", normalize_uri(uri)) }

/// Identifier of a subscription handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

#[derive(Debug)]
struct Registration {
    id: SubscriptionId,
    uri: String,
    schema: Option<SchemaName>,
    sink: mpsc::Sender<HermesResponse>,
}

/// Push target resolved for one registration.
#[derive(Debug)]
pub(crate) struct PushTarget {
    pub(crate) id: SubscriptionId,
    pub(crate) schema: Option<SchemaName>,
    pub(crate) sink: mpsc::Sender<HermesResponse>,
}

/// Moves a handle to the URI reported in its SUB reply.
#[derive(Debug)]
pub(crate) struct Adoption {
    session: Weak<SessionInner>,
    id: SubscriptionId,
}

impl Adoption {
    pub(crate) fn apply(&self, response: &HermesResponse) {
        let Some(uri) = response
            .body
            .as_record()
            .and_then(|record| record.get("uri"))
            .and_then(Value::as_str)
        else {
            return;
        };
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        if inner.lock().subscriptions.rekey(self.id, uri) {
            debug!(id = %self.id, uri, "subscription moved to server uri");
        }
    }
}

/// Registered handles in registration order plus per-URI refcounts.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    entries: Vec<Registration>,
    refcounts: HashMap<String, usize>,
}

impl SubscriptionRegistry {
    fn allocate(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Returns `true` on the 0→1 transition for the URI.
    fn register(&mut self, registration: Registration) -> bool {
        let count = self
            .refcounts
            .entry(registration.uri.clone())
            .or_insert(0);
        *count += 1;
        let first = *count == 1;
        self.entries.push(registration);
        first
    }

    /// Returns the handle's URI and whether it left the URI unwatched.
    fn deregister(&mut self, id: SubscriptionId) -> Option<(String, bool)> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let registration = self.entries.remove(index);
        let last = self.release(&registration.uri);
        Some((registration.uri, last))
    }

    /// Drop one reference to `uri`, returning `true` on the 1→0 transition.
    fn release(&mut self, uri: &str) -> bool {
        let Some(count) = self.refcounts.get_mut(uri) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }
        self.refcounts.remove(uri);
        true
    }

    /// Move a registered handle to `uri` without any wire traffic.
    fn rekey(&mut self, id: SubscriptionId, uri: &str) -> bool {
        let uri = normalize_uri(uri);
        let Some(index) = self.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        if self.entries[index].uri == uri {
            return false;
        }
        let previous = std::mem::replace(&mut self.entries[index].uri, uri.to_owned());
        self.release(&previous);
        *self.refcounts.entry(uri.to_owned()).or_insert(0) += 1;
        true
    }

    fn uri_of(&self, id: SubscriptionId) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.uri.clone())
    }

    /// Handles watching `uri`, in registration order.
    pub(crate) fn targets(&self, uri: &str) -> Vec<PushTarget> {
        let uri = normalize_uri(uri);
        self.entries
            .iter()
            .filter(|entry| entry.uri == uri)
            .map(|entry| PushTarget {
                id: entry.id,
                schema: entry.schema.clone(),
                sink: entry.sink.clone(),
            })
            .collect()
    }

    /// Number of handles subscribed to `uri`.
    pub(crate) fn refcount(&self, uri: &str) -> usize {
        self.refcounts
            .get(normalize_uri(uri))
            .copied()
            .unwrap_or_default()
    }
}

/// Handle receiving pushes for one resource.
///
/// Dropping a subscribed handle unsubscribes it. Each handle buffers up to
/// [`SessionConfig::push_capacity`](crate::config::SessionConfig::push_capacity)
/// pushes; further pushes are dropped until it is polled.
pub struct Subscription {
    id: SubscriptionId,
    uri: String,
    schema: Option<SchemaName>,
    sub_request: Option<HermesRequest>,
    unsub_request: Option<HermesRequest>,
    session: Weak<SessionInner>,
    pushes: Option<mpsc::Receiver<HermesResponse>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("subscribed", &self.is_subscribed())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(
        session: &Arc<SessionInner>,
        uri: &str,
        schema: Option<SchemaName>,
    ) -> Self {
        let id = session.lock().subscriptions.allocate();
        Self {
            id,
            uri: normalize_uri(uri).to_owned(),
            schema,
            sub_request: None,
            unsub_request: None,
            session: Arc::downgrade(session),
            pushes: None,
        }
    }

    /// Send `request` as the wire SUB instead of a bare SUB to
    /// [`wire_uri`](Self::wire_uri). The method is always SUB.
    #[must_use]
    pub fn with_subscribe_request(mut self, mut request: HermesRequest) -> Self {
        request.method = HermesMethod::Sub;
        self.sub_request = Some(request);
        self
    }

    /// Send `request` as the wire UNSUB instead of a bare UNSUB. The method
    /// is always UNSUB.
    #[must_use]
    pub fn with_unsubscribe_request(mut self, mut request: HermesRequest) -> Self {
        request.method = HermesMethod::Unsub;
        self.unsub_request = Some(request);
        self
    }

    /// Identifier of this handle.
    #[must_use]
    pub fn id(&self) -> SubscriptionId { self.id }

    /// Normalized URI, without a trailing slash.
    ///
    /// Reflects the URI adopted from the SUB reply once it has arrived.
    #[must_use]
    pub fn uri(&self) -> String {
        let adopted = match self.session.upgrade() {
            Some(inner) if self.is_subscribed() => inner.lock().subscriptions.uri_of(self.id),
            _ => None,
        };
        adopted.unwrap_or_else(|| self.uri.clone())
    }

    /// URI sent in bare SUB and UNSUB requests, with one trailing slash.
    #[must_use]
    pub fn wire_uri(&self) -> String { wire_uri(&self.uri()) }

    /// Whether this handle is currently registered.
    #[must_use]
    pub fn is_subscribed(&self) -> bool { self.pushes.is_some() }

    /// Register for pushes. Sends a wire SUB if no other handle watches the
    /// URI. Subscribing twice is a no-op.
    ///
    /// Wire failures are reported through the session error hook.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the session no longer
    /// exists.
    pub fn subscribe(&mut self) -> Result<()> {
        if self.is_subscribed() {
            return Ok(());
        }
        let Some(inner) = self.session.upgrade() else {
            return Err(TransportError::ConnectionClosed.into());
        };
        let (sink, pushes) = mpsc::channel(inner.config().push_capacity());
        let first = inner.lock().subscriptions.register(Registration {
            id: self.id,
            uri: self.uri.clone(),
            schema: self.schema.clone(),
            sink,
        });
        self.pushes = Some(pushes);
        debug!(id = %self.id, uri = %self.uri, first, "subscribed");
        if first {
            let request = self
                .sub_request
                .clone()
                .unwrap_or_else(|| HermesRequest::new(HermesMethod::Sub, wire_uri(&self.uri)));
            let adoption = Adoption {
                session: self.session.clone(),
                id: self.id,
            };
            Session::from_inner(inner).subscription_request(request, Some(adoption));
        }
        Ok(())
    }

    /// Stop receiving pushes. Sends a wire UNSUB when this was the last
    /// handle for the URI. Unsubscribing twice is a no-op.
    pub fn unsubscribe(&mut self) {
        if self.pushes.take().is_none() {
            return;
        }
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        let Some((uri, last)) = inner.lock().subscriptions.deregister(self.id) else {
            return;
        };
        self.uri = uri;
        debug!(id = %self.id, uri = %self.uri, last, "unsubscribed");
        if last {
            let request = self
                .unsub_request
                .clone()
                .unwrap_or_else(|| HermesRequest::new(HermesMethod::Unsub, wire_uri(&self.uri)));
            Session::from_inner(inner).subscription_request(request, None);
        }
    }

    /// Wait for the next push. Returns `None` when not subscribed.
    ///
    /// Pushes that arrive while the buffer is full are dropped, so poll
    /// subscribed handles regularly.
    pub async fn next(&mut self) -> Option<HermesResponse> {
        match &mut self.pushes {
            Some(pushes) => pushes.recv().await,
            None => None,
        }
    }

    /// A push that has already arrived, without waiting.
    pub fn try_next(&mut self) -> Option<HermesResponse> {
        self.pushes.as_mut()?.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.unsubscribe(); }
}
