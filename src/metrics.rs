//! Metric helpers for `hermes_session`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking frames written to the transport.
pub const REQUESTS_SENT: &str = "hermes_session_requests_sent_total";
/// Name of the counter tracking correlated replies and failures.
pub const REPLIES_RECEIVED: &str = "hermes_session_replies_received_total";
/// Name of the counter tracking pushes delivered to subscriptions.
pub const PUSHES_DELIVERED: &str = "hermes_session_pushes_delivered_total";
/// Name of the counter tracking requests folded into multi-gets.
pub const MULTI_GET_CHILDREN: &str = "hermes_session_multi_get_children_total";
/// Name of the counter tracking errors no caller observed.
pub const ERRORS_TOTAL: &str = "hermes_session_errors_total";

/// Record a frame written to the transport.
#[cfg(feature = "metrics")]
pub fn inc_requests_sent() { counter!(REQUESTS_SENT).increment(1); }

/// Record a correlated reply or failure.
#[cfg(feature = "metrics")]
pub fn inc_replies() { counter!(REPLIES_RECEIVED).increment(1); }

/// Record a push delivered to one subscription.
#[cfg(feature = "metrics")]
pub fn inc_pushes() { counter!(PUSHES_DELIVERED).increment(1); }

/// Record `count` requests merged into a multi-get.
#[cfg(feature = "metrics")]
pub fn inc_merged_children(count: usize) {
    counter!(MULTI_GET_CHILDREN).increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record an error routed to the error hook.
#[cfg(feature = "metrics")]
pub fn inc_errors() { counter!(ERRORS_TOTAL).increment(1); }

#[cfg(not(feature = "metrics"))]
pub fn inc_requests_sent() {}

#[cfg(not(feature = "metrics"))]
pub fn inc_replies() {}

#[cfg(not(feature = "metrics"))]
pub fn inc_pushes() {}

#[cfg(not(feature = "metrics"))]
pub fn inc_merged_children(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn inc_errors() {}
