//! Outbound message queue.
//!
//! The only boundary crossed by other threads. Producers call
//! [`OutboundQueue::enqueue`] from anywhere, without blocking; the session's
//! send activity is the single consumer. FIFO.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::message::OutboundItem;

/// Consumer end, owned by the send activity.
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundItem>;

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundItem>,
    cancel: CancellationToken,
}

impl OutboundQueue {
    /// Create a queue tied to a session's cancellation token.
    pub fn channel(cancel: CancellationToken) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    /// Queue a message for encryption and sending.
    ///
    /// # Errors
    ///
    /// Returns `SessionStopped` if the session was stopped or its send
    /// activity is gone.
    pub fn enqueue(&self, item: impl Into<OutboundItem>) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::SessionStopped);
        }
        self.tx
            .send(item.into())
            .map_err(|_| QueueError::SessionStopped)
    }

    /// Whether messages can no longer be queued.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}
