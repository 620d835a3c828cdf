//! Long-poll event listener against a scripted bridge.

use std::time::Duration;

use tokio::sync::mpsc;

use wa_relay::whatsapp::events::{spawn_event_listener, SessionEvent};

use crate::support::{FakeServer, Scripted};

#[tokio::test]
async fn listener_forwards_polled_events_in_order() {
    let server = FakeServer::start(|index, _| {
        if index == 0 {
            Scripted::ok(
                r#"[{"type":"qr","code":"2@abc"},{"type":"ready"},{"type":"message","from":"a@c.us","to":"b@c.us","body":"oi","from_me":false}]"#,
            )
        } else {
            Scripted::ok("[]").after(Duration::from_millis(100))
        }
    })
    .await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_event_listener(server.base_url.clone(), Duration::from_secs(5), tx);

    let mut received = Vec::new();
    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(event)) => received.push(event),
            other => panic!("expected an event, got: {other:?}"),
        }
    }

    assert_eq!(
        received[0],
        SessionEvent::Qr {
            code: "2@abc".to_owned()
        }
    );
    assert_eq!(received[1], SessionEvent::Ready);
    assert!(matches!(
        &received[2],
        SessionEvent::Message { from, body, .. } if from == "a@c.us" && body == "oi"
    ));

    let requests = server.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/events/poll");

    drop(rx);
    handle.abort();
}

#[tokio::test]
async fn listener_skips_undecodable_batches() {
    let server = FakeServer::start(|index, _| match index {
        0 => Scripted::ok("not json"),
        1 => Scripted::ok(r#"[{"type":"ready"}]"#),
        _ => Scripted::ok("[]").after(Duration::from_millis(100)),
    })
    .await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_event_listener(server.base_url.clone(), Duration::from_secs(5), tx);

    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(event)) => assert_eq!(event, SessionEvent::Ready),
        other => panic!("expected ready event, got: {other:?}"),
    }

    drop(rx);
    handle.abort();
}

#[tokio::test]
async fn listener_keeps_messages_next_to_unknown_events() {
    let server = FakeServer::start(|index, _| match index {
        0 => Scripted::ok(
            r#"[{"type":"message_ack","id":"M0","ack":2},{"type":"message","from":"a@c.us","to":"b@c.us","body":"oi","from_me":false,"message_id":"M1"}]"#,
        ),
        _ => Scripted::ok("[]").after(Duration::from_millis(100)),
    })
    .await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_event_listener(server.base_url.clone(), Duration::from_secs(5), tx);

    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(SessionEvent::Message {
            from, message_id, ..
        })) => {
            assert_eq!(from, "a@c.us");
            assert_eq!(message_id.as_deref(), Some("M1"));
        }
        other => panic!("expected the message event, got: {other:?}"),
    }

    drop(rx);
    handle.abort();
}
