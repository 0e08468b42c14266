//! End-to-end integration test for confy-transport with confy-relay.

use std::sync::Arc;
use std::time::Duration;

use confy_relay::{run_relay, PEER_LEFT_NOTICE};
use confy_transport::{
    ChatConfig, ChatSession, ConnectionStatus, EventSender, SessionEvent, SessionState,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(10);

async fn start_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        run_relay(listener).await;
    });
    format!("http://{}", addr)
}

fn start(url: &str, user: &str, recipient: &str) -> (ChatSession, UnboundedReceiver<SessionEvent>) {
    let (events, rx) = EventSender::channel();
    let config = ChatConfig::new(url, user, recipient).with_poll_interval(Duration::from_millis(50));
    let session = ChatSession::start(config, Arc::new(events)).expect("start failed");
    (session, rx)
}

async fn wait_for(
    rx: &mut UnboundedReceiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if wanted(&event) {
            return event;
        }
    }
}

/// Waits for the establishment notice and returns its fingerprint.
async fn established(rx: &mut UnboundedReceiver<SessionEvent>) -> String {
    let event = wait_for(rx, |e| {
        matches!(e, SessionEvent::System(t) if t.starts_with("Secure channel established"))
    })
    .await;
    match event {
        SessionEvent::System(text) => text.rsplit(' ').next().unwrap_or_default().to_owned(),
        _ => unreachable!(),
    }
}

fn message(sender: &str, text: &str) -> SessionEvent {
    SessionEvent::Message {
        sender: sender.into(),
        text: text.into(),
    }
}

/// Full end-to-end test: connect, handshake, exchange messages.
#[tokio::test]
async fn test_full_session_e2e() {
    let _ = tracing_subscriber::fmt::try_init();
    let url = start_relay().await;

    let (alice, mut alice_rx) = start(&url, "alice", "bob");
    let (bob, mut bob_rx) = start(&url, "bob", "alice");

    let alice_fp = established(&mut alice_rx).await;
    let bob_fp = established(&mut bob_rx).await;
    assert_eq!(alice_fp.len(), 16);
    assert_eq!(alice_fp, bob_fp, "Fingerprints must match");

    for text in ["one", "two", "three", "done"] {
        alice.send_text(text).unwrap();
    }
    for text in ["one", "two", "three"] {
        let got = wait_for(&mut bob_rx, |e| matches!(e, SessionEvent::Message { .. })).await;
        assert_eq!(got, message("alice", text));
    }
    // Each message is delivered exactly once.
    let got = wait_for(&mut bob_rx, |e| matches!(e, SessionEvent::Message { .. })).await;
    assert_eq!(got, message("alice", "done"));

    bob.send_text("Hello back!").unwrap();
    let got = wait_for(&mut alice_rx, |e| matches!(e, SessionEvent::Message { .. })).await;
    assert_eq!(got, message("bob", "Hello back!"));

    alice.shutdown(WAIT).await;
    bob.shutdown(WAIT).await;
}

/// The session whose peer leaves keeps running and hears about it.
#[tokio::test]
async fn test_peer_departure_is_announced() {
    let _ = tracing_subscriber::fmt::try_init();
    let url = start_relay().await;

    let (alice, mut alice_rx) = start(&url, "alice", "bob");
    let (bob, mut bob_rx) = start(&url, "bob", "alice");
    established(&mut alice_rx).await;
    established(&mut bob_rx).await;

    bob.shutdown(WAIT).await;
    let got = wait_for(&mut bob_rx, |e| matches!(e, SessionEvent::Status(_))).await;
    assert_eq!(got, SessionEvent::Status(ConnectionStatus::Disconnected));

    let notice = wait_for(&mut alice_rx, |e| matches!(e, SessionEvent::System(_))).await;
    assert_eq!(notice, SessionEvent::System(PEER_LEFT_NOTICE.into()));
    assert_eq!(alice.state(), SessionState::Open);

    alice.stop();
    let mut state = alice.state_watch();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == SessionState::Closed))
        .await
        .expect("session did not close")
        .expect("state channel closed");
    assert!(alice.send_text("late").is_err());
}

/// A peer that leaves and comes back gets a fresh secure channel.
#[tokio::test]
async fn test_reconnecting_peer_establishes_new_session() {
    let _ = tracing_subscriber::fmt::try_init();
    let url = start_relay().await;

    let (alice, mut alice_rx) = start(&url, "alice", "bob");
    let (bob, mut bob_rx) = start(&url, "bob", "alice");
    let first_fp = established(&mut alice_rx).await;
    established(&mut bob_rx).await;

    bob.shutdown(WAIT).await;
    let notice = wait_for(&mut alice_rx, |e| matches!(e, SessionEvent::System(_))).await;
    assert_eq!(notice, SessionEvent::System(PEER_LEFT_NOTICE.into()));

    let (bob, mut bob_rx) = start(&url, "bob", "alice");
    let alice_fp = established(&mut alice_rx).await;
    let bob_fp = established(&mut bob_rx).await;
    assert_eq!(alice_fp, bob_fp, "Fingerprints must match");
    assert_ne!(alice_fp, first_fp, "New identity, new fingerprint");

    alice.send_text("welcome back").unwrap();
    let got = wait_for(&mut bob_rx, |e| matches!(e, SessionEvent::Message { .. })).await;
    assert_eq!(got, message("alice", "welcome back"));

    bob.send_text("glad to be here").unwrap();
    let got = wait_for(&mut alice_rx, |e| matches!(e, SessionEvent::Message { .. })).await;
    assert_eq!(got, message("bob", "glad to be here"));

    alice.shutdown(WAIT).await;
    bob.shutdown(WAIT).await;
}
