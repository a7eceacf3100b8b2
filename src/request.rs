//! Request identifiers, completion slots and the in-flight request table.
//!
//! Every request receives a [`RequestId`] from the session's [`Sequencer`] at
//! the moment it is issued. Once transmitted it is parked in the
//! [`RequestTable`] until the matching reply, a send failure, or the teardown
//! sweep completes it. Each completion fires at most once because the pending
//! entry is moved out of the table before it is resolved.

use std::{
    fmt,
    future::Future,
    num::ParseIntError,
    pin::Pin,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    envelope::CommandName,
    error::{ProtocolError, Result, SessionError, SubscriptionError},
    hermes::{HermesCodec, HermesRequest, HermesResponse, MercuryReply},
    subscription::Adoption,
};

/// Identifier of a request, unique within one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw sequence number.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the raw sequence number.
    #[must_use]
    pub const fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for RequestId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> { s.parse().map(Self) }
}

/// Monotonic source of [`RequestId`]s, starting at zero.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    /// Create a sequencer whose first id is `0`.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Allocate the next id.
    pub fn next_id(&self) -> RequestId { RequestId(self.next.fetch_add(1, Ordering::Relaxed)) }
}

/// Whether an issuer waits on the outcome of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    /// A caller holds a [`PendingReply`].
    Observed,
    /// Nobody waits; failures go to the session error hook.
    Ignored,
}

/// Future resolving to the outcome of one request.
///
/// Dropping it discards the outcome. If the session drops the completion slot
/// without delivering anything, the future resolves to
/// [`SessionError::Abandoned`].
#[derive(Debug)]
#[must_use = "a PendingReply does nothing unless awaited"]
pub struct PendingReply<T> {
    id: RequestId,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingReply<T> {
    pub(crate) fn channel(id: RequestId) -> (Self, oneshot::Sender<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    /// Id assigned when the request was issued.
    #[must_use]
    pub fn id(&self) -> RequestId { self.id }
}

impl<T> Future for PendingReply<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(SessionError::Abandoned)))
    }
}

/// Where the outcome of a request goes.
#[derive(Debug)]
pub(crate) enum Route<T> {
    /// Back to the caller's [`PendingReply`].
    Caller(oneshot::Sender<Result<T>>),
    /// Nowhere; errors surface through the error hook.
    Ignored,
    /// A wire SUB/UNSUB; errors surface as [`SubscriptionError`]. A SUB
    /// reply may move its handle to another URI.
    Subscription(Option<Adoption>),
}

impl<T> Route<T> {
    pub(crate) fn interest(&self) -> Interest {
        match self {
            Self::Caller(_) => Interest::Observed,
            Self::Ignored | Self::Subscription(_) => Interest::Ignored,
        }
    }
}

/// Deliver `outcome` along `route`, returning any error nobody observes.
fn deliver<T>(
    route: Route<T>,
    outcome: Result<T>,
    subject: &RouteSubject<'_>,
) -> Option<SessionError> {
    match (route, outcome) {
        (Route::Caller(tx), outcome) => {
            // A dropped receiver means the caller no longer cares.
            let _ = tx.send(outcome);
            None
        }
        (_, Ok(_)) => None,
        (Route::Ignored, Err(error)) => Some(error),
        (Route::Subscription(_), Err(error)) => Some(match subject {
            RouteSubject::Hermes(request) => SubscriptionError {
                uri: request.uri.clone(),
                method: request.method,
                source: Box::new(error),
            }
            .into(),
            RouteSubject::Command => error,
        }),
    }
}

enum RouteSubject<'a> {
    Command,
    Hermes(&'a HermesRequest),
}

/// A named command waiting to be sent.
#[derive(Debug)]
pub(crate) struct CommandCall {
    pub(crate) id: RequestId,
    pub(crate) name: CommandName,
    pub(crate) args: Vec<Value>,
    pub(crate) route: Route<Value>,
}

impl CommandCall {
    pub(crate) fn complete(self, outcome: Result<Value>) -> Option<SessionError> {
        deliver(self.route, outcome, &RouteSubject::Command)
    }
}

/// One Hermes request together with its completion route.
#[derive(Debug)]
pub(crate) struct HermesLeaf {
    pub(crate) id: RequestId,
    pub(crate) request: HermesRequest,
    pub(crate) route: Route<HermesResponse>,
}

impl HermesLeaf {
    pub(crate) fn complete(self, outcome: Result<HermesResponse>) -> Option<SessionError> {
        if let (Route::Subscription(Some(adoption)), Ok(response)) = (&self.route, &outcome) {
            adoption.apply(response);
        }
        deliver(self.route, outcome, &RouteSubject::Hermes(&self.request))
    }
}

/// A Hermes request on the wire.
///
/// Children of a multi-get are plain leaves, so a parent can never become a
/// child.
#[derive(Debug)]
pub(crate) enum HermesCall {
    /// A single request.
    Leaf(HermesLeaf),
    /// Several GETs folded into one multi-get request.
    MultiGet {
        id: RequestId,
        uri: String,
        children: Vec<HermesLeaf>,
    },
}

impl HermesCall {
    pub(crate) fn id(&self) -> RequestId {
        match self {
            Self::Leaf(leaf) => leaf.id,
            Self::MultiGet { id, .. } => *id,
        }
    }

    pub(crate) fn uri(&self) -> &str {
        match self {
            Self::Leaf(leaf) => &leaf.request.uri,
            Self::MultiGet { uri, .. } => uri,
        }
    }

    /// Observed if any member is observed.
    pub(crate) fn interest(&self) -> Interest {
        match self {
            Self::Leaf(leaf) => leaf.route.interest(),
            Self::MultiGet { children, .. } => {
                if children
                    .iter()
                    .any(|child| child.route.interest() == Interest::Observed)
                {
                    Interest::Observed
                } else {
                    Interest::Ignored
                }
            }
        }
    }

    /// Arguments of the `sp/hm_b64` command for this call.
    pub(crate) fn encode(
        &self,
        codec: &HermesCodec,
    ) -> std::result::Result<Vec<Value>, ProtocolError> {
        match self {
            Self::Leaf(leaf) => codec.encode_request(&leaf.request),
            Self::MultiGet { uri, children, .. } => {
                codec.encode_multi_get(uri, children.iter().map(|child| &child.request))
            }
        }
    }

    /// Fail every member with `error`.
    ///
    /// A multi-get with no observed child reports the error once rather than
    /// per child. Otherwise every ignored child reports its own copy.
    pub(crate) fn fail(self, error: &SessionError) -> Vec<SessionError> {
        match self {
            Self::Leaf(leaf) => leaf.complete(Err(error.clone())).into_iter().collect(),
            call @ Self::MultiGet { .. } if call.interest() == Interest::Ignored => {
                vec![error.clone()]
            }
            Self::MultiGet { children, .. } => children
                .into_iter()
                .filter_map(|child| child.complete(Err(error.clone())))
                .collect(),
        }
    }

    /// Resolve the call from a reply `result`.
    pub(crate) fn resolve(self, result: &Value, codec: &HermesCodec) -> Vec<SessionError> {
        let Value::Array(parts) = result else {
            return self.fail(&ProtocolError::MalformedReply("result is not an array").into());
        };
        match self {
            Self::Leaf(leaf) => {
                let outcome = codec
                    .decode_response(parts, leaf.request.response_schema.as_ref())
                    .map_err(SessionError::from)
                    .and_then(|response| response.into_result().map_err(SessionError::from));
                leaf.complete(outcome).into_iter().collect()
            }
            Self::MultiGet { id, uri, children } => match codec.decode_multi_get(parts) {
                Err(error) => Self::MultiGet { id, uri, children }.fail(&error),
                Ok(replies) => demultiplex(&uri, children, replies, codec),
            },
        }
    }
}

/// Pair children with replies by position.
///
/// Children beyond the last reply are dropped, so their callers observe
/// [`SessionError::Abandoned`].
fn demultiplex(
    uri: &str,
    children: Vec<HermesLeaf>,
    replies: Vec<MercuryReply>,
    codec: &HermesCodec,
) -> Vec<SessionError> {
    if replies.len() != children.len() {
        warn!(
            uri,
            children = children.len(),
            replies = replies.len(),
            "multi-get reply count does not match request count"
        );
    }
    children
        .into_iter()
        .zip(replies)
        .filter_map(|(child, reply)| {
            let outcome = codec
                .child_response(&child.request, reply)
                .map_err(SessionError::from)
                .and_then(|response| response.into_result().map_err(SessionError::from));
            child.complete(outcome)
        })
        .collect()
}

/// An entry in the request table.
#[derive(Debug)]
pub(crate) enum Pending {
    /// The `connect` command of the current transport.
    Handshake(oneshot::Sender<Result<()>>),
    /// A plain named command.
    Command(CommandCall),
    /// A Hermes request or multi-get.
    Hermes(HermesCall),
}

impl Pending {
    /// Fail the entry, returning errors nobody observes.
    pub(crate) fn fail(self, error: &SessionError) -> Vec<SessionError> {
        match self {
            Self::Handshake(tx) => {
                let _ = tx.send(Err(error.clone()));
                Vec::new()
            }
            Self::Command(call) => call.complete(Err(error.clone())).into_iter().collect(),
            Self::Hermes(call) => call.fail(error),
        }
    }

    pub(crate) fn interest(&self) -> Interest {
        match self {
            Self::Handshake(_) => Interest::Observed,
            Self::Command(call) => call.route.interest(),
            Self::Hermes(call) => call.interest(),
        }
    }
}

/// In-flight requests keyed by id.
#[derive(Debug, Default)]
pub(crate) struct RequestTable(DashMap<RequestId, Pending>);

impl RequestTable {
    pub(crate) fn insert(&self, id: RequestId, pending: Pending) { self.0.insert(id, pending); }

    pub(crate) fn remove(&self, id: RequestId) -> Option<Pending> {
        self.0.remove(&id).map(|(_, pending)| pending)
    }

    pub(crate) fn len(&self) -> usize { self.0.len() }

    /// Remove every entry, lowest id first.
    pub(crate) fn drain(&self) -> Vec<(RequestId, Pending)> {
        let mut ids: Vec<RequestId> = self.0.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|pending| (id, pending)))
            .collect()
    }
}
