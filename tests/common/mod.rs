//! Shared fixtures for integration tests.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::time::Duration;

pub use hermes_testing::TestResult;
use hermes_session::{Session, SessionBuilder, SessionError};
use rstest::fixture;
use tokio::sync::mpsc;

/// Builder with the heartbeat disabled so only test traffic reaches the peer.
#[fixture]
pub fn quiet_builder() -> SessionBuilder { Session::builder().heartbeat_interval(Duration::ZERO) }

/// Builder whose `on_error` hook forwards every error to the returned channel.
pub fn reporting_builder() -> (SessionBuilder, mpsc::UnboundedReceiver<SessionError>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let builder = quiet_builder().on_error(move |error| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(error);
        }
    });
    (builder, rx)
}

/// Wait for the next error reported through the hook.
pub async fn next_error(errors: &mut mpsc::UnboundedReceiver<SessionError>) -> TestResult<SessionError> {
    tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await?
        .ok_or_else(|| "error hook dropped".into())
}

/// Yield until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> TestResult {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    Ok(())
}
