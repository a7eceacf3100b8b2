//! Tests for refcounted subscriptions and push fan-out.

use hermes_session::{
    HermesRequest,
    Payload,
    SchemaName,
    SessionBuilder,
    SessionError,
    SubscriptionError,
    hermes::HermesMethod,
};
use hermes_testing::{
    connect,
    decode_b64_json,
    frame_id,
    memory_session,
    next_frame,
    ok_result,
    push_message,
};
use rstest::rstest;
use serde_json::json;

mod common;
use common::{TestResult, eventually, next_error, quiet_builder, reporting_builder};

const PLAYLIST: SchemaName = SchemaName::new("playlist4", "Op");

/// Send a marker command and assert it is the next frame, proving nothing was
/// written in between.
async fn assert_quiet(
    session: &hermes_session::Session,
    peer: &mut hermes_session::transport::MemoryPeer,
) -> TestResult {
    let _marker = session.request("marker", vec![]);
    let frame = next_frame(peer).await?;
    assert_eq!(frame["name"], "sp/marker", "unexpected frame {frame}");
    Ok(())
}

#[rstest]
#[tokio::test]
async fn one_sub_and_one_unsub_per_uri(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let mut first = session.subscribe("hm://pl/user/x/", None)?;
    let second = session.subscribe("hm://pl/user/x", None)?;
    let third = session.subscribe("hm://pl/user/x/", None)?;
    assert_eq!(session.subscriber_count("hm://pl/user/x"), 3);

    let sub = next_frame(&mut peer).await?;
    assert_eq!(sub["args"][0], json!(1));
    let sub_header = decode_b64_json(&sub["args"][1])?;
    assert_eq!(sub_header["uri"], "hm://pl/user/x/");
    assert_eq!(sub_header["method"], "SUB");
    peer.reply(&frame_id(&sub)?, ok_result("hm://pl/user/x/", &json!({})));
    assert_quiet(&session, &mut peer).await?;

    first.unsubscribe();
    first.unsubscribe();
    drop(second);
    assert_quiet(&session, &mut peer).await?;
    assert_eq!(session.subscriber_count("hm://pl/user/x/"), 1);

    drop(third);
    let unsub = next_frame(&mut peer).await?;
    assert_eq!(unsub["args"][0], json!(2));
    assert_eq!(decode_b64_json(&unsub["args"][1])?["uri"], "hm://pl/user/x/");
    assert_eq!(session.subscriber_count("hm://pl/user/x"), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn resubscribing_a_handle_is_a_no_op(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let mut handle = session.subscription("hm://pl/y", None);
    assert!(!handle.is_subscribed());
    handle.subscribe()?;
    handle.subscribe()?;
    assert_eq!(handle.wire_uri(), "hm://pl/y/");

    next_frame(&mut peer).await?;
    assert_quiet(&session, &mut peer).await?;
    assert_eq!(session.subscriber_count("hm://pl/y"), 1);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn pushes_fan_out_across_trailing_slash_variants(
    quiet_builder: SessionBuilder,
) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let peer = connect(&session, &mut server).await?;

    let mut decoded = session.subscribe("hm://pl/a/", Some(PLAYLIST))?;
    let mut raw = session.subscribe("hm://pl/a", None)?;
    let mut other = session.subscribe("hm://pl/b", None)?;

    peer.push(push_message("hm://pl/a/", &json!({"op": "add"})));
    peer.push(push_message("hm://pl/a//", &json!({"op": "ignored"})));
    peer.push(push_message("hm://pl/a", &json!({"op": "remove"})));

    let first = decoded.next().await.ok_or("push missing")?;
    assert_eq!(first.uri, "hm://pl/a/");
    assert_eq!(first.body.as_record(), Some(&json!({"op": "add"})));
    let second = decoded.next().await.ok_or("push missing")?;
    assert_eq!(second.body.as_record(), Some(&json!({"op": "remove"})));

    let raw_first = raw.next().await.ok_or("push missing")?;
    assert_eq!(
        raw_first.body.as_bytes().map(|b| b.to_vec()),
        Some(br#"{"op":"add"}"#.to_vec())
    );
    assert!(raw.next().await.is_some());
    assert!(raw.try_next().is_none());
    assert!(other.try_next().is_none());
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unsubscribed_handles_receive_nothing(quiet_builder: SessionBuilder) -> TestResult {
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let mut keep = session.subscribe("hm://pl/c", None)?;
    let mut leave = session.subscribe("hm://pl/c", None)?;
    leave.unsubscribe();
    next_frame(&mut peer).await?;

    peer.push(push_message("hm://pl/c/", &json!({})));
    assert!(keep.next().await.is_some());
    assert!(leave.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn failed_sub_reaches_the_hook() -> TestResult {
    let (builder, mut errors) = reporting_builder();
    let (session, mut server) = memory_session(builder);
    let mut peer = connect(&session, &mut server).await?;

    let _handle = session.subscribe("hm://pl/denied", None)?;
    let sub = next_frame(&mut peer).await?;
    peer.fail(Some(&frame_id(&sub)?), json!([403, "forbidden"]));

    let err = next_error(&mut errors).await?;
    let SessionError::Subscription(SubscriptionError { uri, method, source }) = err else {
        return Err(format!("unexpected error: {err}").into());
    };
    assert_eq!(uri, "hm://pl/denied/");
    assert_eq!(method, HermesMethod::Sub);
    assert!(matches!(*source, SessionError::Remote(_)));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn shared_endpoint_subscription_follows_server_uri(
    quiet_builder: SessionBuilder,
) -> TestResult {
    const ROOTLIST: &str = "hm://playlist/user/x/rootlist";
    let (session, mut server) = memory_session(quiet_builder);
    let mut peer = connect(&session, &mut server).await?;

    let uris = json!({ "uris": [ROOTLIST] });
    let mut handle = session
        .subscription(ROOTLIST, Some(PLAYLIST))
        .with_subscribe_request(
            HermesRequest::get("hm://playlist/")
                .payload(Payload::Record {
                    schema: SchemaName::new("playlist4", "SubscribeRequest"),
                    record: uris.clone(),
                })
                .response_schema(SchemaName::new("hermes.pubsub", "Subscription")),
        )
        .with_unsubscribe_request(HermesRequest::get("hm://playlist/").payload(
            Payload::Record {
                schema: SchemaName::new("playlist4", "UnsubscribeRequest"),
                record: uris.clone(),
            },
        ));
    handle.subscribe()?;

    let sub = next_frame(&mut peer).await?;
    assert_eq!(sub["args"][0], json!(1));
    let sub_header = decode_b64_json(&sub["args"][1])?;
    assert_eq!(sub_header["uri"], "hm://playlist/");
    assert_eq!(sub_header["method"], "SUB");
    assert_eq!(decode_b64_json(&sub["args"][2])?, uris);
    peer.reply(
        &frame_id(&sub)?,
        ok_result("hm://playlist/", &json!({ "uri": format!("{ROOTLIST}/") })),
    );

    eventually(|| handle.uri() == ROOTLIST).await?;
    assert_eq!(session.subscriber_count(ROOTLIST), 1);
    assert_eq!(session.subscriber_count("hm://playlist/"), 0);

    peer.push(push_message(&format!("{ROOTLIST}/"), &json!({"newRevision": "02"})));
    let push = handle.next().await.ok_or("push missing")?;
    assert_eq!(push.body.as_record(), Some(&json!({"newRevision": "02"})));

    drop(handle);
    let unsub = next_frame(&mut peer).await?;
    assert_eq!(unsub["args"][0], json!(2));
    let unsub_header = decode_b64_json(&unsub["args"][1])?;
    assert_eq!(unsub_header["uri"], "hm://playlist/");
    assert_eq!(unsub_header["method"], "UNSUB");
    assert_eq!(decode_b64_json(&unsub["args"][2])?, uris);
    Ok(())
}

#[tokio::test]
async fn full_push_buffer_drops_newer_pushes() -> TestResult {
    let (session, mut server) = memory_session(quiet_builder().push_buffer(2));
    let mut peer = connect(&session, &mut server).await?;

    let mut slow = session.subscribe("hm://pl/busy", Some(PLAYLIST))?;
    next_frame(&mut peer).await?;
    for n in 0..3 {
        peer.push(push_message("hm://pl/busy", &json!({ "n": n })));
    }

    // The driver handles frames in order, so the reply to this marker
    // arrives after every push above.
    let marker = session.request("marker", vec![]);
    let frame = next_frame(&mut peer).await?;
    peer.reply(&frame_id(&frame)?, json!("ok"));
    marker.await?;

    for n in 0..2 {
        let push = slow.try_next().ok_or("buffered push missing")?;
        assert_eq!(push.body.as_record(), Some(&json!({ "n": n })));
    }
    assert!(slow.try_next().is_none(), "third push must be dropped");
    Ok(())
}
