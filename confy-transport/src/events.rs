//! Session events.
//!
//! The session reports everything it observes through [`SessionEvents`].
//! Callbacks fire from the session task, one at a time, in the order the
//! events occurred. Implementations must not block.

use std::fmt;

use tokio::sync::mpsc;

/// Channel status reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Channel is open.
    Connected,
    /// Session ended. Always the last status of a session.
    Disconnected,
    /// Peer or server closed the channel.
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Callback interface for a front end.
pub trait SessionEvents: Send + Sync {
    /// A verified, decrypted message from the peer.
    fn on_message(&self, sender_id: &str, text: &str);

    /// Channel status change.
    fn on_connection_status(&self, status: ConnectionStatus);

    /// Relay notice or local informational notice.
    fn on_system_message(&self, text: &str);

    /// A frame or connection failure, already described for display.
    fn on_error(&self, description: &str);
}

/// One reported event, as delivered by [`EventSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// See [`SessionEvents::on_message`].
    Message {
        /// Peer identifier.
        sender: String,
        /// Message text.
        text: String,
    },
    /// See [`SessionEvents::on_connection_status`].
    Status(ConnectionStatus),
    /// See [`SessionEvents::on_system_message`].
    System(String),
    /// See [`SessionEvents::on_error`].
    Error(String),
}

/// Forwards every callback into an unbounded channel for polling front ends.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<SessionEvent>);

impl EventSender {
    /// Create a sender and the receiver the front end polls.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.0.send(event);
    }
}

impl SessionEvents for EventSender {
    fn on_message(&self, sender_id: &str, text: &str) {
        self.emit(SessionEvent::Message {
            sender: sender_id.to_owned(),
            text: text.to_owned(),
        });
    }

    fn on_connection_status(&self, status: ConnectionStatus) {
        self.emit(SessionEvent::Status(status));
    }

    fn on_system_message(&self, text: &str) {
        self.emit(SessionEvent::System(text.to_owned()));
    }

    fn on_error(&self, description: &str) {
        self.emit(SessionEvent::Error(description.to_owned()));
    }
}
