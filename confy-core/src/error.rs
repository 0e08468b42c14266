//! Protocol and crypto errors.
//!
//! None of these are fatal to a session. A failing frame is reported and
//! discarded; the channel stays open. Only transport-level errors (see
//! `confy-transport`) end a session.

use thiserror::Error;

/// Cryptographic failures.
///
/// Display strings are deliberately terse. They never include key material
/// or plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Peer public key could not be decoded.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Wrapped session key could not be opened with our private key.
    #[error("failed to unwrap session key")]
    KeyUnwrapFailed,

    /// Session key could not be wrapped for the peer.
    #[error("failed to wrap session key")]
    KeyWrapFailed,

    /// Ciphertext could not be decoded, authenticated or decrypted.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Plaintext could not be encrypted.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Signature did not verify against the peer's public key.
    #[error("signature invalid")]
    SignatureInvalid,
}

/// Framing and handshake-sequencing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Data frame payload is not `<ciphertext>::<signature>`.
    #[error("malformed message payload")]
    MalformedPayload,

    /// Peer announced a second, different public key.
    #[error("peer public key changed mid-session")]
    PeerKeyChanged,

    /// Frame is valid but not acceptable in the current handshake state.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(&'static str),

    /// Unprefixed frame received while plaintext fallback is disabled.
    #[error("unencrypted message rejected")]
    PlaintextRejected,
}

/// Any failure raised while processing a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Framing or sequencing failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_terse() {
        assert_eq!(CryptoError::SignatureInvalid.to_string(), "signature invalid");
        assert_eq!(
            ProtocolError::UnexpectedFrame("session key already set").to_string(),
            "unexpected frame: session key already set"
        );
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: CoreError = ProtocolError::MalformedPayload.into();
        assert_eq!(err.to_string(), "malformed message payload");
        assert_eq!(err, CoreError::Protocol(ProtocolError::MalformedPayload));
    }
}
