//! Confy Protocol Core
//!
//! End-to-end encrypted one-to-one chat over an untrusted relay.
//!
//! This crate provides:
//! - Symmetric session encryption ([`cipher`])
//! - Long-term identity keys: signing, verification, key wrapping ([`identity`])
//! - Prefix-tagged wire framing ([`frame`])
//! - The key exchange state machine ([`handshake`])
//!
//! Everything here is synchronous and performs no I/O. The async session
//! loop lives in `confy-transport`.
//!
//! # Security Invariants
//!
//! - The relay only ever sees public keys, wrapped keys and ciphertext
//! - Every data frame is signed over its plaintext and verified before delivery
//! - Exactly one peer generates the session key (strict identifier order)
//! - Malformed or forged frames are reported and dropped, never delivered
//! - Session keys and private keys are zeroized on drop
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod cipher;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod identity;

pub use cipher::SessionKey;
pub use error::{CoreError, CryptoError, ProtocolError};
pub use frame::{Frame, SignedCiphertext};
pub use handshake::{generates_session_key, Action, HandshakeState, KeyExchange, PeerState};
pub use identity::{IdentityKey, LocalIdentity};
