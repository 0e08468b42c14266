//! Key exchange state machine.
//!
//! States: INIT → AWAITING_PEER_KEY → PUBLIC_KEY_SENT → AWAITING_SESSION_KEY → ESTABLISHED
//!
//! The generating side skips AWAITING_SESSION_KEY: it stores the key it
//! wrapped and moves straight to ESTABLISHED.
//!
//! The relay's "peer left" notice resets the machine to AWAITING_PEER_KEY:
//! peer key and session key are forgotten so a reconnecting peer, with a
//! fresh identity, can run a new handshake on the same channel.
//!
//! Unlike the transport, nothing here is fatal. A bad frame produces an
//! [`Action::Fault`] and leaves the state exactly as it was.
//!
//! The machine does no I/O. [`KeyExchange::on_frame`] returns the actions to
//! execute, in order.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cipher::SessionKey;
use crate::error::{CoreError, CryptoError, ProtocolError};
use crate::frame::{Frame, SignedCiphertext};
use crate::identity::{IdentityKey, LocalIdentity};

/// Notice for ciphertext that arrives before the handshake completes.
pub const KEY_NOT_ESTABLISHED: &str =
    "Encrypted message received, but no session key is established yet.";

/// Notice for an outbound message dropped before the handshake completes.
pub const SEND_BEFORE_ESTABLISHED: &str =
    "Session key not established yet. Wait for the handshake to finish.";

/// Whether the side named `local_id` generates the session key.
///
/// Plain byte-wise string comparison; the strictly greater identifier wins.
/// Equal identifiers never generate, so self-chat never completes.
pub fn generates_session_key(local_id: &str, peer_id: &str) -> bool {
    local_id > peer_id
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Created, channel not open yet.
    Init,
    /// Channel open, nothing sent.
    AwaitingPeerKey,
    /// Our public key is out, peer's key not seen yet.
    PublicKeySent,
    /// Both public keys known, waiting for the peer's wrapped key.
    AwaitingSessionKey,
    /// Session key in place. Data frames flow.
    Established,
}

/// What we know about the peer.
#[derive(Debug, Default)]
pub struct PeerState {
    peer_public_key: Option<IdentityKey>,
    session_key: Option<SessionKey>,
    handshake_sent: bool,
}

impl PeerState {
    /// Peer's public key, once received.
    pub fn peer_public_key(&self) -> Option<&IdentityKey> {
        self.peer_public_key.as_ref()
    }

    /// Shared session key, once established.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Whether our public key has been sent.
    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent
    }
}

/// Something the session loop must do after a frame was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write this frame to the channel.
    Send(Frame),
    /// Hand a message to the application.
    Deliver {
        /// Peer identifier.
        sender: String,
        /// Message text.
        text: String,
    },
    /// Informational notice for the application.
    Notice(String),
    /// The frame was rejected. The session continues.
    Fault(CoreError),
}

/// Handshake coordinator for one peer pair.
#[derive(Debug)]
pub struct KeyExchange {
    local_id: String,
    peer_id: String,
    identity: Arc<LocalIdentity>,
    peer: PeerState,
    state: HandshakeState,
    allow_plaintext: bool,
}

impl KeyExchange {
    /// Create a coordinator for `local_id` talking to `peer_id`.
    pub fn new(
        local_id: impl Into<String>,
        peer_id: impl Into<String>,
        identity: Arc<LocalIdentity>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            peer_id: peer_id.into(),
            identity,
            peer: PeerState::default(),
            state: HandshakeState::Init,
            allow_plaintext: false,
        }
    }

    /// Deliver unprefixed frames as messages instead of rejecting them.
    pub fn with_plaintext_fallback(mut self, allow: bool) -> Self {
        self.allow_plaintext = allow;
        self
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Peer knowledge.
    pub fn peer_state(&self) -> &PeerState {
        &self.peer
    }

    /// Session key, once established.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.peer.session_key.as_ref()
    }

    /// Our identity.
    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.identity
    }

    /// Our identifier.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Peer identifier.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Mark the channel as open.
    ///
    /// Transitions: Init → AwaitingPeerKey
    pub fn on_open(&mut self) {
        if self.state == HandshakeState::Init {
            self.state = HandshakeState::AwaitingPeerKey;
        }
    }

    /// Process one inbound frame.
    pub fn on_frame(&mut self, frame: Frame) -> Vec<Action> {
        let mut out = Vec::new();
        match frame {
            Frame::System(text) => self.on_system(text, &mut out),
            Frame::PublicKeyExchange(payload) => self.on_public_key(&payload, &mut out),
            Frame::WrappedSessionKey(payload) => self.on_wrapped_key(&payload, &mut out),
            Frame::Ciphertext(payload) => self.on_ciphertext(&payload, &mut out),
            Frame::PlainFallback(text) => {
                if self.allow_plaintext {
                    out.push(Action::Deliver {
                        sender: self.peer_id.clone(),
                        text,
                    });
                } else {
                    out.push(Action::Fault(ProtocolError::PlaintextRejected.into()));
                }
            }
        }
        out
    }

    /// Session fingerprint for out-of-band comparison.
    ///
    /// First 8 bytes of SHA256(lower_id_pub || higher_id_pub) as hex. Both
    /// peers compute the same value. `None` until the peer key is known.
    pub fn fingerprint(&self) -> Option<String> {
        let peer = self.peer.peer_public_key.as_ref()?;
        let local = self.identity.public_key();

        let (first, second) = if self.local_id < self.peer_id {
            (local, peer)
        } else {
            (peer, local)
        };

        let mut hasher = Sha256::new();
        hasher.update(first.to_bytes());
        hasher.update(second.to_bytes());
        let digest = hasher.finalize();

        Some(hex::encode(&digest[..8]))
    }

    fn on_system(&mut self, text: String, out: &mut Vec<Action>) {
        if text == crate::frame::PEER_LEFT_NOTICE {
            self.reset();
        }
        let connected = text == crate::frame::PEER_CONNECTED_NOTICE;
        if connected && !self.peer.handshake_sent {
            self.send_public_key(out);
            self.maybe_generate(out);
        }
        out.push(Action::Notice(text));
    }

    /// Forget everything learned from the departed peer.
    fn reset(&mut self) {
        if self.state == HandshakeState::Init {
            return;
        }
        if self.peer.handshake_sent || self.peer.peer_public_key.is_some() {
            info!(peer = %self.peer_id, "peer left, handshake reset");
        }
        self.peer = PeerState::default();
        self.state = HandshakeState::AwaitingPeerKey;
    }

    fn on_public_key(&mut self, payload: &str, out: &mut Vec<Action>) {
        let key = match IdentityKey::deserialize(payload) {
            Ok(key) => key,
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "rejected peer public key");
                out.push(Action::Fault(e.into()));
                return;
            }
        };

        match &self.peer.peer_public_key {
            Some(existing) if *existing != key => {
                warn!(peer = %self.peer_id, "peer announced a different public key");
                out.push(Action::Fault(ProtocolError::PeerKeyChanged.into()));
                return;
            }
            Some(_) => debug!(peer = %self.peer_id, "duplicate public key ignored"),
            None => {
                debug!(peer = %self.peer_id, "peer public key accepted");
                self.peer.peer_public_key = Some(key);
                if self.peer.handshake_sent && self.state != HandshakeState::Established {
                    self.state = HandshakeState::AwaitingSessionKey;
                }
            }
        }

        if !self.peer.handshake_sent {
            self.send_public_key(out);
        }
        self.maybe_generate(out);
    }

    fn send_public_key(&mut self, out: &mut Vec<Action>) {
        out.push(Action::Send(Frame::public_key(&self.identity)));
        self.peer.handshake_sent = true;
        self.state = if self.peer.peer_public_key.is_some() {
            HandshakeState::AwaitingSessionKey
        } else {
            HandshakeState::PublicKeySent
        };
        debug!(peer = %self.peer_id, "public key sent");
    }

    /// Tie-break: generate and wrap the session key if it is our turn.
    fn maybe_generate(&mut self, out: &mut Vec<Action>) {
        if self.peer.session_key.is_some() || !self.peer.handshake_sent {
            return;
        }
        let Some(peer_key) = self.peer.peer_public_key else {
            return;
        };
        if !generates_session_key(&self.local_id, &self.peer_id) {
            return;
        }

        let key = SessionKey::generate();
        match peer_key.wrap_key(&key) {
            Ok(wrapped) => {
                out.push(Action::Send(Frame::wrapped_key(&wrapped)));
                self.establish(key, out);
            }
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "could not wrap session key");
                out.push(Action::Fault(e.into()));
            }
        }
    }

    fn on_wrapped_key(&mut self, payload: &str, out: &mut Vec<Action>) {
        if self.peer.session_key.is_some() {
            out.push(Action::Fault(
                ProtocolError::UnexpectedFrame("session key already established").into(),
            ));
            return;
        }
        if generates_session_key(&self.local_id, &self.peer_id) {
            out.push(Action::Fault(
                ProtocolError::UnexpectedFrame("peer is not the session key generator").into(),
            ));
            return;
        }
        if self.peer.peer_public_key.is_none() {
            out.push(Action::Fault(
                ProtocolError::UnexpectedFrame("peer public key not received").into(),
            ));
            return;
        }

        let unwrapped = STANDARD
            .decode(payload)
            .map_err(|_| CryptoError::KeyUnwrapFailed)
            .and_then(|wrapped| self.identity.unwrap_key(&wrapped));

        match unwrapped {
            Ok(key) => self.establish(key, out),
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "could not unwrap session key");
                out.push(Action::Fault(e.into()));
            }
        }
    }

    fn establish(&mut self, key: SessionKey, out: &mut Vec<Action>) {
        self.peer.session_key = Some(key);
        self.state = HandshakeState::Established;
        info!(peer = %self.peer_id, "session key established");

        let notice = match self.fingerprint() {
            Some(fp) => format!("Secure channel established. Fingerprint: {fp}"),
            None => "Secure channel established.".to_owned(),
        };
        out.push(Action::Notice(notice));
    }

    fn on_ciphertext(&mut self, payload: &str, out: &mut Vec<Action>) {
        let (Some(key), Some(sender)) = (&self.peer.session_key, &self.peer.peer_public_key) else {
            out.push(Action::Notice(KEY_NOT_ESTABLISHED.to_owned()));
            return;
        };

        let opened = SignedCiphertext::parse(payload)
            .map_err(CoreError::from)
            .and_then(|sealed| sealed.open(key, sender).map_err(CoreError::from));

        match opened {
            Ok(text) => out.push(Action::Deliver {
                sender: self.peer_id.clone(),
                text,
            }),
            Err(e) => {
                warn!(peer = %self.peer_id, error = %e, "dropped data frame");
                out.push(Action::Fault(e));
            }
        }
    }
}
