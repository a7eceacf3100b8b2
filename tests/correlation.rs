//! Tests for id correlation of commands and Hermes requests.

use std::collections::HashSet;

use hermes_session::{
    HermesRequest,
    SchemaName,
    SessionBuilder,
    SessionError,
    StatusErrorKind,
    hermes::HermesMethod,
};
use hermes_testing::{
    connect,
    decode_b64_json,
    frame_id,
    header,
    hermes_result,
    memory_session,
    next_frame,
    ok_result,
};
use rstest::rstest;
use serde_json::json;

mod common;
use common::{TestResult, next_error, quiet_builder, reporting_builder};

const PLAYLIST: SchemaName = SchemaName::new("playlist4", "SelectedListContent");

#[rstest]
#[tokio::test]
async fn replies_correlate_by_id_in_any_order(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let first = session.request("echo", vec![json!("a")]);
    let second = session.request("echo", vec![json!("b")]);
    let a = next_frame(&mut peer).await?;
    let b = next_frame(&mut peer).await?;
    assert_ne!(a["id"], b["id"]);

    peer.reply(&frame_id(&b)?, json!("B"));
    peer.reply(&frame_id(&a)?, json!("A"));

    assert_eq!(second.await?, json!("B"));
    assert_eq!(first.await?, json!("A"));
    assert_eq!(session.in_flight(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn error_frames_fail_their_request(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let pending = session.request("work", vec![]);
    let frame = next_frame(&mut peer).await?;
    peer.fail(Some(&frame_id(&frame)?), json!([404, "no such thing"]));

    let err = pending.await.expect_err("request must fail");
    let SessionError::Remote(remote) = err else {
        return Err(format!("unexpected error: {err}").into());
    };
    assert_eq!(remote.code(), Some(404));
    assert_eq!(remote.message(), Some("no such thing"));
    Ok(())
}

#[tokio::test]
async fn unobserved_failures_reach_the_hook() -> TestResult {
    let (builder, mut errors) = reporting_builder();
    let (session, mut server) = memory_session(builder);
    let mut peer = connect(&session, &mut server).await?;

    let id = session.request_unobserved("fire", vec![]);
    let frame = next_frame(&mut peer).await?;
    assert_eq!(frame["id"], id.to_string());
    peer.fail(Some(&id.to_string()), json!([500, "oops"]));

    let err = next_error(&mut errors).await?;
    assert!(matches!(err, SessionError::Remote(_)));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn hermes_request_is_framed_and_decoded(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;
    let uri = "hm://playlist/user/alice/rootlist";

    let pending = session.hermes(
        HermesRequest::get(uri)
            .source("client")
            .response_schema(PLAYLIST),
    );
    let frame = next_frame(&mut peer).await?;
    assert_eq!(frame["name"], "sp/hm_b64");
    assert_eq!(frame["args"][0], json!(0));
    let sent = decode_b64_json(&frame["args"][1])?;
    assert_eq!(sent["uri"], uri);
    assert_eq!(sent["method"], "GET");
    assert_eq!(sent["source"], "client");

    peer.reply(&frame_id(&frame)?, ok_result(uri, &json!({"length": 3})));

    let response = pending.await?;
    assert!(response.is_success());
    assert_eq!(response.status_message(), "OK");
    assert_eq!(response.body.as_record(), Some(&json!({"length": 3})));
    Ok(())
}

#[rstest]
#[case(404, StatusErrorKind::Client, "Client Error: Not Found (404)")]
#[case(503, StatusErrorKind::Server, "Server Error: Service Unavailable (503)")]
#[case(301, StatusErrorKind::Redirect, "Redirect Error: Moved Permanently (301)")]
#[case(201, StatusErrorKind::Other, "Error: Created (201)")]
#[tokio::test]
async fn non_200_replies_are_status_errors(
    quiet_builder: SessionBuilder,
    #[case] status: i32,
    #[case] kind: StatusErrorKind,
    #[case] display: &str,
) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;
    let uri = "hm://metadata/track/0a1b2c";

    let pending = session.hermes(HermesRequest::get(uri));
    let frame = next_frame(&mut peer).await?;
    peer.reply(&frame_id(&frame)?, hermes_result(&header(uri, status), None));

    let err = pending.await.expect_err("non-200 must fail");
    assert!(!err.is_retryable());
    let status_error = err.as_status().ok_or("not a status error")?;
    assert_eq!(status_error.status_code, status);
    assert_eq!(status_error.kind, kind);
    assert_eq!(status_error.uri, uri);
    assert_eq!(err.to_string(), display);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn sub_and_unsub_carry_method_codes(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let _sub = session.hermes(HermesRequest::new(HermesMethod::Sub, "hm://pl/x/"));
    let _unsub = session.hermes(HermesRequest::new(HermesMethod::Unsub, "hm://pl/x/"));
    let sub = next_frame(&mut peer).await?;
    let unsub = next_frame(&mut peer).await?;
    assert_eq!(sub["args"][0], json!(1));
    assert_eq!(unsub["args"][0], json!(2));
    assert_eq!(decode_b64_json(&unsub["args"][1])?["method"], "UNSUB");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_receive_distinct_ids() -> TestResult {
    const CALLERS: u64 = 32;
    let (session, mut server) = memory_session(quiet_builder());
    let mut peer = connect(&session, &mut server).await?;

    let callers: Vec<_> = (0..CALLERS)
        .map(|n| {
            let session = session.clone();
            tokio::spawn(async move {
                let reply = session.request("echo", vec![json!(n)]);
                let id = reply.id();
                (n, id, reply.await)
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for _ in 0..CALLERS {
        let frame = next_frame(&mut peer).await?;
        let id = frame_id(&frame)?;
        assert!(seen.insert(id.parse::<u64>()?), "id {id} sent twice");
        peer.reply(&id, frame["args"][0].clone());
    }
    // The handshake took id 0.
    assert_eq!(seen, (1..=CALLERS).collect::<HashSet<_>>());

    for caller in callers {
        let (n, id, outcome) = caller.await?;
        assert_eq!(outcome?, json!(n), "reply for {id} went astray");
    }
    assert_eq!(session.in_flight(), 0);
    Ok(())
}
