//! Confy Transport
//!
//! Async session runtime for the Confy end-to-end encrypted chat protocol.
//!
//! This crate wraps `confy-core` and drives one WebSocket channel per
//! conversation: it runs the key exchange, seals queued messages, and opens
//! and verifies incoming ones.
//!
//! # Security Invariants
//!
//! - A bad frame is reported through `on_error` and dropped; the session
//!   continues. Only transport failures end a session.
//! - **No Early Sends**: messages queued before the session key exists are
//!   reported and dropped, never sent in the clear.
//! - **No Duplication**: `ChatSession` and `OutboundItem` do not implement `Clone`.
//! - **Implicit Cleanup**: `Drop` stops the session if it hasn't been
//!   stopped explicitly via `stop()` or `shutdown()`.
//! - **Zeroization**: queued plaintext and session keys are zeroized on drop.
//! - **Strict Framing**: one WebSocket text message is one frame. No buffering.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod queue;
pub mod session;

pub use config::ChatConfig;
pub use error::{QueueError, TransportError};
pub use events::{ConnectionStatus, EventSender, SessionEvent, SessionEvents};
pub use message::OutboundItem;
pub use queue::{OutboundQueue, OutboundReceiver};
pub use session::{ChatSession, SessionLoop, SessionState};
