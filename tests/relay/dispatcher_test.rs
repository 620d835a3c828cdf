//! Dispatcher behavior: filtering, per-message tasks, bootstrap events, shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use wa_relay::config::WebhookConfig;
use wa_relay::relay::dispatcher::{DispatchStats, Dispatcher};
use wa_relay::relay::forwarder::WebhookForwarder;
use wa_relay::session::{Session, SessionBootstrap, SessionState};
use wa_relay::whatsapp::events::SessionEvent;

use crate::support::{FakeServer, RecordingSession, Scripted};

fn dispatcher(url: String, session: Arc<RecordingSession>) -> Dispatcher {
    let config = WebhookConfig {
        url,
        ..WebhookConfig::default()
    };
    let forwarder = match WebhookForwarder::new(&config) {
        Ok(forwarder) => Arc::new(forwarder),
        Err(err) => panic!("forwarder should build: {err}"),
    };
    let session: Arc<dyn Session> = session;
    Dispatcher::new(forwarder, session, SessionBootstrap::new(false))
}

fn message(from: &str, body: &str, from_me: bool) -> SessionEvent {
    SessionEvent::Message {
        from: from.to_owned(),
        to: "5511888880000@c.us".to_owned(),
        body: body.to_owned(),
        from_me,
        message_id: None,
    }
}

/// Feed `events`, close the channel and wait for every task to finish.
async fn run_to_completion(dispatcher: Dispatcher, events: Vec<SessionEvent>) -> DispatchStats {
    let (tx, rx) = mpsc::channel(16);
    for event in events {
        tx.send(event).await.expect("channel open");
    }
    drop(tx);
    dispatcher
        .run(rx, std::future::pending(), Duration::from_secs(10))
        .await
}

#[tokio::test]
async fn own_messages_never_reach_webhook() {
    let server = FakeServer::always(Scripted::ok(r#"{"reply":"OK"}"#)).await;
    let session = Arc::new(RecordingSession::new());
    let dispatcher = dispatcher(server.url("/webhook"), Arc::clone(&session));

    let stats = run_to_completion(
        dispatcher,
        vec![message("5511888880000@c.us", "sent from my phone", true)],
    )
    .await;

    assert_eq!(stats.received, 1);
    assert_eq!(stats.ignored, 1);
    assert!(server.requests().is_empty());
    assert!(session.sent().is_empty());
}

#[tokio::test]
async fn each_accepted_message_posts_once() {
    let server = FakeServer::always(Scripted::ok(r#"{"reply":"OK"}"#)).await;
    let session = Arc::new(RecordingSession::new());
    let dispatcher = dispatcher(server.url("/webhook"), Arc::clone(&session));

    let stats = run_to_completion(
        dispatcher,
        vec![
            message("a@c.us", "one", false),
            message("b@c.us", "two", false),
            message("5511888880000@c.us", "mine", true),
        ],
    )
    .await;

    assert_eq!(stats.replied, 2);
    assert_eq!(stats.ignored, 1);

    let texts: HashSet<String> = server
        .requests()
        .into_iter()
        .filter_map(|r| r.body["text"].as_str().map(str::to_owned))
        .collect();
    assert_eq!(texts, HashSet::from(["one".to_owned(), "two".to_owned()]));

    let recipients: HashSet<String> = session.sent().into_iter().map(|(c, _)| c.jid).collect();
    assert_eq!(recipients, HashSet::from(["a@c.us".to_owned(), "b@c.us".to_owned()]));
}

#[tokio::test]
async fn overlapping_messages_both_get_replies_in_any_order() {
    // The first message's webhook call is slow; the second one overtakes it.
    let server = FakeServer::start(|_, request| {
        let text = request.body["text"].as_str().unwrap_or_default().to_owned();
        let answer = Scripted::ok(&format!(r#"{{"reply":"re: {text}"}}"#));
        if text == "M1" {
            answer.after(Duration::from_millis(300))
        } else {
            answer
        }
    })
    .await;
    let session = Arc::new(RecordingSession::new());
    let dispatcher = dispatcher(server.url("/webhook"), Arc::clone(&session));

    let stats = run_to_completion(
        dispatcher,
        vec![
            message("a@c.us", "M1", false),
            message("a@c.us", "M2", false),
        ],
    )
    .await;

    assert_eq!(stats.replied, 2);
    // Delivery order is not guaranteed, only that both arrive.
    let replies: HashSet<String> = session.sent_texts().into_iter().collect();
    assert_eq!(
        replies,
        HashSet::from(["re: M1".to_owned(), "re: M2".to_owned()])
    );
}

#[tokio::test]
async fn undeliverable_fallback_is_counted_not_fatal() {
    let server = FakeServer::always(Scripted::status("500 Internal Server Error", "")).await;
    let session = Arc::new(RecordingSession::offline());
    let dispatcher = dispatcher(server.url("/webhook"), Arc::clone(&session));

    let stats = run_to_completion(
        dispatcher,
        vec![
            message("a@c.us", "first", false),
            message("b@c.us", "second", false),
        ],
    )
    .await;

    assert_eq!(stats.failed, 2);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn lifecycle_events_drive_session_state() {
    let session = Arc::new(RecordingSession::new());
    let mut dispatcher = dispatcher("http://127.0.0.1:9/webhook".to_owned(), session);
    assert_eq!(dispatcher.session_state(), SessionState::Unauthenticated);

    dispatcher.handle_event(SessionEvent::Qr {
        code: "2@pairing".to_owned(),
    });
    assert_eq!(dispatcher.session_state(), SessionState::AwaitingPairing);

    dispatcher.handle_event(SessionEvent::Ready);
    assert_eq!(dispatcher.session_state(), SessionState::Ready);

    dispatcher.handle_event(SessionEvent::Disconnected {
        reason: Some("logout".to_owned()),
    });
    assert_eq!(dispatcher.session_state(), SessionState::Unauthenticated);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_messages() {
    let server =
        FakeServer::always(Scripted::ok(r#"{"reply":"OK"}"#).after(Duration::from_millis(200)))
            .await;
    let session = Arc::new(RecordingSession::new());
    let dispatcher = dispatcher(server.url("/webhook"), Arc::clone(&session));

    let (tx, rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(dispatcher.run(
        rx,
        async {
            let _ = stop_rx.await;
        },
        Duration::from_secs(5),
    ));

    tx.send(message("a@c.us", "hello", false))
        .await
        .expect("channel open");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = stop_tx.send(());

    let stats = run.await.expect("dispatcher task should not panic");
    assert_eq!(stats.replied, 1);
    assert_eq!(stats.abandoned, 0);
    assert_eq!(session.sent_texts(), vec!["OK".to_owned()]);
}

#[tokio::test]
async fn shutdown_timeout_abandons_slow_messages() {
    let server =
        FakeServer::always(Scripted::ok(r#"{"reply":"OK"}"#).after(Duration::from_secs(5)))
            .await;
    let session = Arc::new(RecordingSession::new());
    let dispatcher = dispatcher(server.url("/webhook"), Arc::clone(&session));

    let (tx, rx) = mpsc::channel(16);
    tx.send(message("a@c.us", "hello", false))
        .await
        .expect("channel open");
    drop(tx);

    let stats = dispatcher
        .run(rx, std::future::pending(), Duration::from_millis(100))
        .await;

    assert_eq!(stats.abandoned, 1);
    assert!(session.sent().is_empty());
}
