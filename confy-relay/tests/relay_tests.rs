use confy_relay::{run_relay, DUPLICATE_NOTICE, PEER_ABSENT_NOTICE, PEER_LEFT_NOTICE};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECTED: &str = "[SYSTEM] The recipient user is now connected.";

async fn start_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        run_relay(listener).await;
    });
    format!("ws://{}", addr)
}

async fn join(url: &str, route: &str) -> Ws {
    let (ws, _) = connect_async(format!("{url}/ws/{route}")).await.unwrap();
    ws
}

async fn recv_text(ws: &mut Ws) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("unexpected: {:?}", other),
        }
    }
}

fn system(text: &str) -> String {
    format!("[SYSTEM] {text}")
}

/// Round-trip a frame with no peer, proving the relay registered us.
async fn wait_registered(ws: &mut Ws) {
    ws.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(recv_text(ws).await, system(PEER_ABSENT_NOTICE));
}

#[tokio::test]
async fn test_pairing_notifies_both_sides() {
    let url = start_relay().await;

    let mut alice = join(&url, "alice@bob").await;
    wait_registered(&mut alice).await;
    let mut bob = join(&url, "bob@alice").await;

    assert_eq!(recv_text(&mut alice).await, CONNECTED);
    assert_eq!(recv_text(&mut bob).await, CONNECTED);
}

#[tokio::test]
async fn test_frames_forwarded_verbatim() {
    let url = start_relay().await;

    let mut alice = join(&url, "alice@bob").await;
    wait_registered(&mut alice).await;
    let mut bob = join(&url, "bob@alice").await;
    recv_text(&mut alice).await;
    recv_text(&mut bob).await;

    alice.send(Message::Text("[AES]abc::ZGVm".into())).await.unwrap();
    assert_eq!(recv_text(&mut bob).await, "[AES]abc::ZGVm");

    bob.send(Message::Text("[KEY_EXCHANGE]xyz".into())).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, "[KEY_EXCHANGE]xyz");
}

#[tokio::test]
async fn test_unmatched_routes_not_paired() {
    let url = start_relay().await;

    let mut alice = join(&url, "alice@bob").await;
    wait_registered(&mut alice).await;
    let mut carol = join(&url, "carol@alice").await;

    // carol wants alice, but alice wants bob.
    wait_registered(&mut carol).await;
    wait_registered(&mut alice).await;
}

#[tokio::test]
async fn test_duplicate_id_refused() {
    let url = start_relay().await;

    let mut first = join(&url, "alice@bob").await;
    wait_registered(&mut first).await;

    let mut second = join(&url, "alice@bob").await;
    assert_eq!(recv_text(&mut second).await, system(DUPLICATE_NOTICE));

    // The original connection is untouched.
    wait_registered(&mut first).await;
}

#[tokio::test]
async fn test_bad_routes_refused() {
    let url = start_relay().await;

    let mut own = join(&url, "alice@alice").await;
    assert_eq!(recv_text(&mut own).await, system("You cannot chat with yourself."));

    let (mut bad, _) = connect_async(format!("{url}/chat")).await.unwrap();
    assert_eq!(
        recv_text(&mut bad).await,
        system("Invalid route. Expected /ws/<user>@<recipient>.")
    );
}

#[tokio::test]
async fn test_slow_reader_loses_no_frames() {
    const FRAMES: usize = 300;
    let url = start_relay().await;

    let mut alice = join(&url, "alice@bob").await;
    wait_registered(&mut alice).await;
    let mut bob = join(&url, "bob@alice").await;
    recv_text(&mut alice).await;
    recv_text(&mut bob).await;

    // Far more than the relay queues; bob reads nothing until alice is stalled.
    let padding = "x".repeat(32 * 1024);
    let sender = tokio::spawn(async move {
        for i in 0..FRAMES {
            let frame = format!("[AES]{i:04}{padding}");
            alice.send(Message::Text(frame)).await.unwrap();
        }
        alice
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    for i in 0..FRAMES {
        let text = recv_text(&mut bob).await;
        assert_eq!(&text[..9], format!("[AES]{i:04}"), "frame {i} out of order or lost");
    }

    let mut alice = tokio::time::timeout(Duration::from_secs(5), sender)
        .await
        .expect("sender stalled")
        .unwrap();

    // Every frame had a peer, so alice was never told otherwise.
    bob.send(Message::Text("[AES]done".into())).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, "[AES]done");
}

#[tokio::test]
async fn test_departure_notifies_peer() {
    let url = start_relay().await;

    let mut alice = join(&url, "alice@bob").await;
    wait_registered(&mut alice).await;
    let mut bob = join(&url, "bob@alice").await;
    recv_text(&mut alice).await;
    recv_text(&mut bob).await;

    bob.close(None).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, system(PEER_LEFT_NOTICE));

    // The identifier is free again.
    let mut bob = join(&url, "bob@alice").await;
    assert_eq!(recv_text(&mut alice).await, CONNECTED);
    assert_eq!(recv_text(&mut bob).await, CONNECTED);
}
