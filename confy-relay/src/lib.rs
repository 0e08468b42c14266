//! Confy relay.
//!
//! Pairs two clients by route and forwards their text frames verbatim. The
//! relay never looks inside a frame; it only sees public keys, wrapped keys
//! and ciphertext.
//!
//! ```text
//! GET /ws/alice@bob   ─┐
//!                      ├─▶ paired ─▶ "[SYSTEM] The recipient user is now connected." to both
//! GET /ws/bob@alice   ─┘
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use confy_core::frame::{self, MAX_FRAME_LEN};
use confy_core::Frame;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info};

/// Environment variable holding the listen address.
pub const ADDR_ENV: &str = "CONFY_RELAY_ADDR";

/// Listen address when `CONFY_RELAY_ADDR` is unset.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";

/// Sent to a client whose identifier is already connected.
pub const DUPLICATE_NOTICE: &str = "This user id is already connected.";

/// Sent to the remaining side when its peer leaves.
pub const PEER_LEFT_NOTICE: &str = frame::PEER_LEFT_NOTICE;

/// Sent when a frame has nowhere to go.
pub const PEER_ABSENT_NOTICE: &str = "The recipient user is not connected.";

/// Sent when a frame exceeds the size limit.
pub const TOO_LARGE_NOTICE: &str = "Message too large.";

const ROUTE_PREFIX: &str = "/ws/";
const MAX_QUEUE_DEPTH: usize = 32;

/// A parsed `/ws/<own>@<recipient>` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Connecting user.
    pub own: String,
    /// Who they want to talk to.
    pub recipient: String,
}

/// Why a route was refused. The display text is sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// Not `/ws/<own>@<recipient>` with two valid identifiers.
    #[error("Invalid route. Expected /ws/<user>@<recipient>.")]
    Malformed,
    /// Both identifiers are the same.
    #[error("You cannot chat with yourself.")]
    SelfChat,
}

/// Parse a request path into a route.
pub fn parse_route(path: &str) -> Result<Route, RouteError> {
    let rest = path.strip_prefix(ROUTE_PREFIX).ok_or(RouteError::Malformed)?;
    let (own, recipient) = rest.split_once('@').ok_or(RouteError::Malformed)?;
    if !valid_id(own) || !valid_id(recipient) {
        return Err(RouteError::Malformed);
    }
    if own == recipient {
        return Err(RouteError::SelfChat);
    }
    Ok(Route {
        own: own.to_owned(),
        recipient: recipient.to_owned(),
    })
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['@', '/']) && !id.chars().any(char::is_whitespace)
}

struct Peer {
    conn_id: u64,
    recipient: String,
    tx: mpsc::Sender<Message>,
}

#[derive(Default)]
struct Relay {
    peers: DashMap<String, Peer>,
    // Held across register + pair lookup.
    joins: Mutex<()>,
}

impl Relay {
    /// Register `route.own`. Returns `None` if the id is taken, otherwise the
    /// paired peer's sender if the pair is now complete.
    fn join(
        &self,
        route: &Route,
        conn_id: u64,
        tx: mpsc::Sender<Message>,
    ) -> Option<Option<mpsc::Sender<Message>>> {
        let _joining = self.joins.lock().unwrap_or_else(PoisonError::into_inner);

        let registered = match self.peers.entry(route.own.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Peer {
                    conn_id,
                    recipient: route.recipient.clone(),
                    tx,
                });
                true
            }
        };

        registered.then(|| self.paired_tx(route))
    }

    /// Sender half of `route.recipient`, if it is connected and talking to `route.own`.
    fn paired_tx(&self, route: &Route) -> Option<mpsc::Sender<Message>> {
        self.peers
            .get(&route.recipient)
            .filter(|p| p.recipient == route.own)
            .map(|p| p.tx.clone())
    }

    fn leave(&self, route: &Route, conn_id: u64) {
        self.peers.remove_if(&route.own, |_, p| p.conn_id == conn_id);
    }
}

fn notice(text: &str) -> Message {
    Message::Text(Frame::system(text).to_wire())
}

/// Accept connections until the listener fails.
pub async fn run_relay(listener: TcpListener) {
    let relay = Arc::new(Relay::default());
    let next_id = AtomicU64::new(0);

    while let Ok((stream, remote)) = listener.accept().await {
        let relay = relay.clone();
        let conn_id = next_id.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, relay, conn_id).await {
                debug!(%remote, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    relay: Arc<Relay>,
    conn_id: u64,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut path = String::new();
    let callback = |req: &Request, response: Response| {
        path = req.uri().path().to_owned();
        Ok(response)
    };
    let mut ws = accept_hdr_async(stream, callback).await?;

    let route = match parse_route(&path) {
        Ok(route) => route,
        Err(e) => {
            debug!(%path, error = %e, "route refused");
            ws.send(notice(&e.to_string())).await?;
            return ws.close(None).await;
        }
    };

    let (tx, mut rx) = mpsc::channel::<Message>(MAX_QUEUE_DEPTH);

    let Some(paired) = relay.join(&route, conn_id, tx.clone()) else {
        debug!(user = %route.own, "duplicate user id refused");
        ws.send(notice(DUPLICATE_NOTICE)).await?;
        return ws.close(None).await;
    };
    info!(user = %route.own, recipient = %route.recipient, "joined");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Writer task - owns ws_tx
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    if let Some(peer_tx) = paired {
        info!(user = %route.own, recipient = %route.recipient, "paired");
        let connected = Message::Text(Frame::peer_connected().to_wire());
        let _ = peer_tx.send(connected.clone()).await;
        let _ = tx.send(connected).await;
    }

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if text.len() > MAX_FRAME_LEN {
                    let _ = tx.try_send(notice(TOO_LARGE_NOTICE));
                    continue;
                }
                // A full peer queue stalls this reader, which pushes back on
                // the sender's socket. Frames are never dropped.
                let delivered = match relay.paired_tx(&route) {
                    Some(peer_tx) => peer_tx.send(Message::Text(text)).await.is_ok(),
                    None => false,
                };
                if !delivered {
                    let _ = tx.try_send(notice(PEER_ABSENT_NOTICE));
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    // Cleanup on disconnect
    relay.leave(&route, conn_id);
    info!(user = %route.own, "left");

    if let Some(peer_tx) = relay.paired_tx(&route) {
        let _ = peer_tx.send(notice(PEER_LEFT_NOTICE)).await;
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}
