//! Transport errors.
//!
//! Unlike `confy_core` errors, a `TransportError` ends the session.

use thiserror::Error;

/// Connection-level failures. Always terminal.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket handshake with the server failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel did not open within the configured timeout.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Read or write on an open channel failed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Configuration rejected before connecting.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// `ChatSession::start` called outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

/// Failure to hand a message to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The session has stopped; the message was not queued.
    #[error("session stopped")]
    SessionStopped,
}
