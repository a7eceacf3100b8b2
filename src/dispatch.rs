//! Outbound request queue.
//!
//! Requests wait here until the session is connected. The queue only tracks
//! whether a flush is already scheduled; the session owns the flush itself.

use crate::{
    batch::Batchable,
    request::{CommandCall, HermesCall, HermesLeaf, RequestId},
};

/// A request waiting for transmission.
#[derive(Debug)]
pub(crate) enum Queued {
    Command(CommandCall),
    Hermes(HermesCall),
}

impl Queued {
    pub(crate) fn id(&self) -> RequestId {
        match self {
            Self::Command(call) => call.id,
            Self::Hermes(call) => call.id(),
        }
    }
}

impl Batchable for Queued {
    fn as_leaf(&self) -> Option<&HermesLeaf> {
        match self {
            Self::Hermes(HermesCall::Leaf(leaf)) => Some(leaf),
            _ => None,
        }
    }

    fn into_leaf(self) -> Option<HermesLeaf> {
        match self {
            Self::Hermes(HermesCall::Leaf(leaf)) => Some(leaf),
            _ => None,
        }
    }

    fn from_call(call: HermesCall) -> Self { Self::Hermes(call) }
}

/// FIFO of queued requests plus the flush-scheduled flag.
#[derive(Debug, Default)]
pub(crate) struct DispatchQueue {
    entries: Vec<Queued>,
    flush_scheduled: bool,
}

impl DispatchQueue {
    /// Append `entry`. Returns `true` when the caller must schedule a flush.
    pub(crate) fn push(&mut self, entry: Queued) -> bool {
        self.entries.push(entry);
        self.arm()
    }

    /// Mark a flush as scheduled if the queue is non-empty and none is
    /// pending. Returns `true` when the caller must schedule it.
    pub(crate) fn arm(&mut self) -> bool {
        if self.flush_scheduled || self.entries.is_empty() {
            return false;
        }
        self.flush_scheduled = true;
        true
    }

    /// Clear the scheduled flag without draining, e.g. when a flush is
    /// deferred.
    pub(crate) fn disarm(&mut self) { self.flush_scheduled = false; }

    /// Take every queued entry and clear the scheduled flag.
    pub(crate) fn take(&mut self) -> Vec<Queued> {
        self.flush_scheduled = false;
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize { self.entries.len() }
}
