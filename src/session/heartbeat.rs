//! Liveness echo while connected.

use std::{sync::Weak, time::Duration};

use serde_json::Value;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Session, SessionInner};
use crate::envelope::{HEARTBEAT_COMMAND, HEARTBEAT_PAYLOAD};

/// Send an unobserved `sp/echo` every `period` until `shutdown` fires.
///
/// The first echo goes out one full period after the handshake.
pub(super) fn spawn(session: Weak<SessionInner>, shutdown: CancellationToken, period: Duration) {
    if period.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = session.upgrade() else {
                        break;
                    };
                    let id = Session::from_inner(inner).request_unobserved(
                        HEARTBEAT_COMMAND,
                        vec![Value::from(HEARTBEAT_PAYLOAD)],
                    );
                    trace!(%id, "heartbeat queued");
                }
            }
        }
    });
}
