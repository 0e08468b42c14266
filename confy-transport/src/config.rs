//! Session configuration.

use std::time::Duration;

use crate::error::TransportError;

/// How long the send activity waits on the queue before re-checking for stop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on opening the WebSocket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Server address, e.g. "https://chat.example.org" or "localhost:8000".
    pub server_address: String,
    /// Our identifier.
    pub user_id: String,
    /// Peer identifier.
    pub recipient_id: String,
    /// Bounded wait of the send activity.
    pub poll_interval: Duration,
    /// Bounded wait for the channel to open.
    pub connect_timeout: Duration,
    /// Deliver unprefixed frames instead of rejecting them.
    pub allow_plaintext_fallback: bool,
}

impl ChatConfig {
    /// Create a configuration with default timings and strict framing.
    pub fn new(
        server_address: impl Into<String>,
        user_id: impl Into<String>,
        recipient_id: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            user_id: user_id.into(),
            recipient_id: recipient_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            allow_plaintext_fallback: false,
        }
    }

    /// Override the send activity's bounded wait.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Accept unencrypted frames from legacy peers.
    ///
    /// # Security Warning
    ///
    /// Such messages are neither confidential nor authenticated.
    pub fn with_plaintext_fallback(mut self, allow: bool) -> Self {
        self.allow_plaintext_fallback = allow;
        self
    }

    /// Check identifiers and timings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if an identifier is empty or contains `@`, `/`
    /// or whitespace, if both identifiers are equal, if the server address is
    /// empty, or if a duration is zero.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.server_address.trim().is_empty() {
            return Err(TransportError::InvalidConfig("server address is empty"));
        }
        check_id(&self.user_id)?;
        check_id(&self.recipient_id)?;
        if self.user_id == self.recipient_id {
            return Err(TransportError::InvalidConfig("cannot chat with yourself"));
        }
        if self.poll_interval.is_zero() || self.connect_timeout.is_zero() {
            return Err(TransportError::InvalidConfig("durations must be non-zero"));
        }
        Ok(())
    }

    /// WebSocket URI: `ws(s)://<host>/ws/<user>@<recipient>`.
    ///
    /// `https` and `wss` addresses map to `wss`; anything else, including a
    /// bare host, maps to `ws`.
    pub fn channel_uri(&self) -> String {
        let address = self.server_address.trim();
        let (scheme, host) = match address.split_once("://") {
            Some(("https" | "wss", host)) => ("wss", host),
            Some((_, host)) => ("ws", host),
            None => ("ws", address),
        };
        format!(
            "{scheme}://{}/ws/{}@{}",
            host.trim_end_matches('/'),
            self.user_id,
            self.recipient_id
        )
    }
}

fn check_id(id: &str) -> Result<(), TransportError> {
    if id.is_empty() {
        return Err(TransportError::InvalidConfig("identifier is empty"));
    }
    if id.contains(['@', '/']) || id.chars().any(char::is_whitespace) {
        return Err(TransportError::InvalidConfig(
            "identifier contains '@', '/' or whitespace",
        ));
    }
    Ok(())
}
