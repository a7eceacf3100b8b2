//! Tests for the connect handshake, teardown and heartbeat.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use hermes_session::{
    Credentials,
    Session,
    SessionBuilder,
    SessionError,
    State,
    TransportError,
    transport::{Connector, MemoryConnector, Transport, TransportEvents},
};
use hermes_testing::{
    ADDRESS,
    CREDENTIALS,
    answer_handshake,
    connect,
    frame_id,
    memory_session,
    next_frame,
};
use rstest::rstest;
use serde_json::json;

mod common;
use common::{TestResult, eventually, next_error, quiet_builder, reporting_builder};

fn counting_hooks(builder: SessionBuilder) -> (SessionBuilder, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let builder = {
        let connects = connects.clone();
        let disconnects = disconnects.clone();
        builder
            .on_connect(move || {
                let connects = connects.clone();
                async move {
                    connects.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_disconnect(move || {
                let disconnects = disconnects.clone();
                async move {
                    disconnects.fetch_add(1, Ordering::SeqCst);
                }
            })
    };
    (builder, connects, disconnects)
}

#[rstest]
#[tokio::test]
async fn handshake_presents_credentials(quiet_builder: SessionBuilder) -> TestResult {
    let (builder, connects, _) = counting_hooks(quiet_builder);
    let (session, mut server) = memory_session(builder);

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(ADDRESS, Credentials::parse(CREDENTIALS)).await })
    };
    let mut peer = server.accept().await?;
    assert_eq!(peer.address(), ADDRESS);
    let handshake = answer_handshake(&mut peer, json!("ok")).await?;
    connecting.await??;

    assert_eq!(handshake["name"], "connect");
    assert_eq!(handshake["args"], json!(["alice", "t0k3n", "rest:of:it"]));
    assert_eq!(session.state(), State::Connected);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn rejected_handshake_is_not_retried(quiet_builder: SessionBuilder) -> TestResult {
    let (builder, connects, disconnects) = counting_hooks(quiet_builder);
    let (session, mut server) = memory_session(builder);

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(ADDRESS, Credentials::parse(CREDENTIALS)).await })
    };
    let mut peer = server.accept().await?;
    answer_handshake(&mut peer, json!("denied")).await?;

    let err = connecting.await?.expect_err("handshake must fail");
    assert!(matches!(err, SessionError::Handshake(ref e) if e.result == json!("denied")));
    assert!(!err.is_retryable());
    assert_eq!(session.state(), State::Disconnected);
    assert!(peer.recv().await.is_none(), "transport must be closed");
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0, "never connected, nothing to announce");
    Ok(())
}

#[rstest]
#[tokio::test]
async fn handshake_error_frame_fails_connect(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(ADDRESS, Credentials::parse(CREDENTIALS)).await })
    };
    let mut peer = server.accept().await?;
    let handshake = next_frame(&mut peer).await?;
    peer.fail(Some(&frame_id(&handshake)?), json!([401, "bad token"]));

    let err = connecting.await?.expect_err("handshake must fail");
    assert!(matches!(err, SessionError::Handshake(_)));
    assert_eq!(session.state(), State::Disconnected);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn connect_twice_is_invalid(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let _peer = connect(&session, &mut server).await?;

    let err = session
        .connect(ADDRESS, Credentials::parse(CREDENTIALS))
        .await
        .expect_err("second connect must fail");
    assert!(matches!(err, SessionError::InvalidState(State::Connected)));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unreachable_server_fails_connect(quiet_builder: SessionBuilder) {
    let (session, server) = memory_session(quiet_builder);
    drop(server);
    let err = session
        .connect(ADDRESS, Credentials::parse(CREDENTIALS))
        .await
        .expect_err("connect must fail");
    assert!(matches!(err, SessionError::Transport(TransportError::Open { .. })));
    assert!(err.is_retryable());
    assert_eq!(session.state(), State::Disconnected);
}

/// Connector whose first open never completes.
struct StallFirstOpen {
    stalled: AtomicBool,
    inner: MemoryConnector,
}

#[async_trait]
impl Connector for StallFirstOpen {
    async fn open(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), TransportError> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.open(address).await
    }
}

#[rstest]
#[tokio::test]
async fn abandoned_connect_can_be_retried(quiet_builder: SessionBuilder) -> TestResult {
    let (inner, mut listener) = MemoryConnector::pair();
    let session = quiet_builder
        .connector(StallFirstOpen {
            stalled: AtomicBool::new(false),
            inner,
        })
        .build();

    let attempt = tokio::time::timeout(
        Duration::from_millis(20),
        session.connect(ADDRESS, Credentials::parse(CREDENTIALS)),
    )
    .await;
    assert!(attempt.is_err(), "first open must stall");
    assert_eq!(session.state(), State::Disconnected);

    let connecting = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(ADDRESS, Credentials::parse(CREDENTIALS)).await })
    };
    let mut peer = listener.accept().await.ok_or("connector dropped")?;
    answer_handshake(&mut peer, json!("ok")).await?;
    connecting.await??;
    assert_eq!(session.state(), State::Connected);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn queued_requests_flush_in_order_after_handshake(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let first = session.request("first", vec![json!(1)]);
    let second = session.request("sp/second", vec![json!(2)]);
    tokio::task::yield_now().await;
    assert_eq!(session.queued(), 2);

    let mut peer = connect(&session, &mut server).await?;

    let a = next_frame(&mut peer).await?;
    let b = next_frame(&mut peer).await?;
    assert_eq!(a["name"], "sp/first");
    assert_eq!(a["id"], first.id().to_string());
    assert_eq!(b["name"], "sp/second");
    assert_eq!(b["id"], second.id().to_string());
    assert_eq!(session.queued(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn disconnect_fails_in_flight_requests(quiet_builder: SessionBuilder) -> TestResult {
    let (builder, _, disconnects) = counting_hooks(quiet_builder);
    let (session, mut server) = memory_session(builder);
    let mut peer = connect(&session, &mut server).await?;

    let pending = session.request("slow", vec![]);
    next_frame(&mut peer).await?;
    assert_eq!(session.in_flight(), 1);

    session.disconnect().await;
    session.disconnect().await;

    let err = pending.await.expect_err("in-flight request must fail");
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::ConnectionClosed)
    ));
    assert!(err.is_retryable());
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn server_close_runs_teardown(quiet_builder: SessionBuilder) -> TestResult {
    let (builder, _, disconnects) = counting_hooks(quiet_builder);
    let (session, mut server) = memory_session(builder);
    let mut peer = connect(&session, &mut server).await?;

    let pending = session.request("slow", vec![]);
    next_frame(&mut peer).await?;
    drop(peer);

    let err = pending.await.expect_err("in-flight request must fail");
    assert!(err.is_retryable());
    assert_eq!(session.state(), State::Disconnected);
    eventually(|| disconnects.load(Ordering::SeqCst) == 1).await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn requests_queued_while_disconnected_survive_reconnect(
    quiet_builder: SessionBuilder,
) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let peer = connect(&session, &mut server).await?;
    session.disconnect().await;
    drop(peer);

    let later = session.request("later", vec![]);
    tokio::task::yield_now().await;
    assert_eq!(session.queued(), 1);

    let mut peer = connect(&session, &mut server).await?;
    let frame = next_frame(&mut peer).await?;
    assert_eq!(frame["name"], "sp/later");
    peer.reply(&frame_id(&frame)?, json!("done"));
    assert_eq!(later.await?, json!("done"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn heartbeat_echoes_while_connected() -> TestResult {
    let (session, mut server) =
        memory_session(Session::builder().heartbeat_interval(Duration::from_secs(1)));
    let mut peer = connect(&session, &mut server).await?;

    for _ in 0..2 {
        let frame = next_frame(&mut peer).await?;
        assert_eq!(frame["name"], "sp/echo");
        assert_eq!(frame["args"], json!(["h"]));
        peer.reply(&frame_id(&frame)?, json!("h"));
    }

    session.disconnect().await;
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(peer.try_recv().is_none(), "heartbeat must stop on teardown");
    Ok(())
}

#[tokio::test]
async fn uncorrelated_errors_reach_the_hook() -> TestResult {
    let (builder, mut errors) = reporting_builder();
    let (session, mut server) = memory_session(builder);
    let peer = connect(&session, &mut server).await?;

    peer.fail(None, json!([500, "boom"]));
    let err = next_error(&mut errors).await?;
    assert!(matches!(err, SessionError::Remote(ref remote) if remote.code() == Some(500)));

    peer.send_text(r#"{"unexpected":true}"#);
    let err = next_error(&mut errors).await?;
    assert!(matches!(err, SessionError::Protocol(_)));
    Ok(())
}
