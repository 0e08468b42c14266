//! Zeroizing outbound message wrapper.
//!
//! Plaintext waits in the outbound queue until the send activity seals it.
//! The buffer is wiped once the item is dropped, whether it was sent or not.

use zeroize::Zeroizing;

/// A queued plaintext message. Zeroizes on drop.
///
/// This type does not implement `Clone` to prevent accidental plaintext duplication.
#[derive(Debug)]
pub struct OutboundItem(Zeroizing<String>);

impl OutboundItem {
    /// Wrap a message.
    pub fn new(text: impl Into<String>) -> Self {
        Self(Zeroizing::new(text.into()))
    }

    /// Message text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for OutboundItem {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for OutboundItem {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}
