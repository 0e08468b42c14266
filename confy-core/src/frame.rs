//! Wire framing.
//!
//! One WebSocket text message is one frame:
//!
//! ```text
//! +----------------+------------------------------+
//! | PREFIX         | PAYLOAD                      |
//! +----------------+------------------------------+
//! | [SYSTEM]       | " " + notice text            |
//! | [KEY_EXCHANGE] | base64 public key            |
//! | [AES_KEY]      | base64 wrapped session key   |
//! | [AES]          | ciphertext "::" base64 sig   |
//! | (none)         | plaintext fallback           |
//! +----------------+------------------------------+
//! ```
//!
//! No prefix is a prefix of another, so matching order does not matter.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::cipher::{self, SessionKey};
use crate::error::{CryptoError, ProtocolError};
use crate::identity::{IdentityKey, LocalIdentity};

/// Server notices.
pub const SYSTEM_PREFIX: &str = "[SYSTEM]";

/// Serialized public key.
pub const KEY_EXCHANGE_PREFIX: &str = "[KEY_EXCHANGE]";

/// Session key wrapped for the recipient.
pub const WRAPPED_KEY_PREFIX: &str = "[AES_KEY]";

/// Signed ciphertext.
pub const CIPHERTEXT_PREFIX: &str = "[AES]";

/// Separates ciphertext from signature in a data frame.
pub const SIGNATURE_SEPARATOR: &str = "::";

/// Notice the relay sends once both ends of a conversation are connected.
pub const PEER_CONNECTED_NOTICE: &str = "The recipient user is now connected.";

/// Notice the relay sends to the remaining side when its peer leaves.
pub const PEER_LEFT_NOTICE: &str = "The recipient user has disconnected.";

/// Largest frame the relay forwards, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// A classified wire frame, prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Relay notice.
    System(String),
    /// Peer's serialized public key.
    PublicKeyExchange(String),
    /// Session key wrapped under our public key, base64.
    WrappedSessionKey(String),
    /// `ciphertext::signature` payload.
    Ciphertext(String),
    /// Unprefixed input, kept verbatim.
    PlainFallback(String),
}

impl Frame {
    /// Classify a raw wire string. Never fails: unknown input is `PlainFallback`.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(SYSTEM_PREFIX) {
            Self::System(rest.trim_start().to_owned())
        } else if let Some(rest) = raw.strip_prefix(KEY_EXCHANGE_PREFIX) {
            Self::PublicKeyExchange(rest.to_owned())
        } else if let Some(rest) = raw.strip_prefix(WRAPPED_KEY_PREFIX) {
            Self::WrappedSessionKey(rest.to_owned())
        } else if let Some(rest) = raw.strip_prefix(CIPHERTEXT_PREFIX) {
            Self::Ciphertext(rest.to_owned())
        } else {
            Self::PlainFallback(raw.to_owned())
        }
    }

    /// A system notice frame.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System(text.into())
    }

    /// The relay's "peer connected" notice.
    pub fn peer_connected() -> Self {
        Self::system(PEER_CONNECTED_NOTICE)
    }

    /// Public key announcement for `identity`.
    pub fn public_key(identity: &LocalIdentity) -> Self {
        Self::PublicKeyExchange(identity.serialize_public_key())
    }

    /// Wrapped session key frame.
    pub fn wrapped_key(wrapped: &[u8]) -> Self {
        Self::WrappedSessionKey(STANDARD.encode(wrapped))
    }

    /// The relay's "peer left" notice.
    pub fn peer_left() -> Self {
        Self::system(PEER_LEFT_NOTICE)
    }

    /// Whether this is the relay's "peer connected" notice.
    pub fn is_peer_connected(&self) -> bool {
        matches!(self, Self::System(text) if text == PEER_CONNECTED_NOTICE)
    }

    /// Payload with the prefix stripped.
    pub fn payload(&self) -> &str {
        match self {
            Self::System(p)
            | Self::PublicKeyExchange(p)
            | Self::WrappedSessionKey(p)
            | Self::Ciphertext(p)
            | Self::PlainFallback(p) => p,
        }
    }

    /// Serialize to the wire string.
    pub fn to_wire(&self) -> String {
        match self {
            Self::System(p) => format!("{SYSTEM_PREFIX} {p}"),
            Self::PublicKeyExchange(p) => format!("{KEY_EXCHANGE_PREFIX}{p}"),
            Self::WrappedSessionKey(p) => format!("{WRAPPED_KEY_PREFIX}{p}"),
            Self::Ciphertext(p) => format!("{CIPHERTEXT_PREFIX}{p}"),
            Self::PlainFallback(p) => p.clone(),
        }
    }
}

/// Encrypted message plus the sender's signature over the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCiphertext {
    ciphertext: String,
    signature: Vec<u8>,
}

impl SignedCiphertext {
    /// Encrypt `text` under `key` and sign the plaintext with `identity`.
    ///
    /// # Errors
    ///
    /// Returns `EncryptionFailed` if the cipher rejects the input.
    pub fn seal(
        key: &SessionKey,
        identity: &LocalIdentity,
        text: &str,
    ) -> Result<Self, CryptoError> {
        let ciphertext = cipher::encrypt(key, text)?;
        let signature = identity.sign(text.as_bytes()).to_vec();
        Ok(Self {
            ciphertext,
            signature,
        })
    }

    /// Split a data frame payload into ciphertext and signature.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` unless the payload splits on `::` into
    /// exactly two non-empty parts and the signature part is base64.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let mut parts = payload.split(SIGNATURE_SEPARATOR);
        let (ciphertext, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(s), None) if !c.is_empty() && !s.is_empty() => (c, s),
            _ => return Err(ProtocolError::MalformedPayload),
        };

        let signature = STANDARD
            .decode(signature)
            .map_err(|_| ProtocolError::MalformedPayload)?;

        Ok(Self {
            ciphertext: ciphertext.to_owned(),
            signature,
        })
    }

    /// Decrypt and verify against the sender's public key.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionFailed` if the ciphertext does not open, or
    /// `SignatureInvalid` if the signature does not cover the plaintext.
    pub fn open(&self, key: &SessionKey, sender: &IdentityKey) -> Result<String, CryptoError> {
        let plaintext = cipher::decrypt(key, &self.ciphertext)?;
        if !sender.verify(plaintext.as_bytes(), &self.signature) {
            return Err(CryptoError::SignatureInvalid);
        }
        Ok(plaintext)
    }

    /// Transport-encoded ciphertext.
    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }

    /// Raw signature bytes.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// `ciphertext::base64(signature)`.
    pub fn encode(&self) -> String {
        format!(
            "{}{SIGNATURE_SEPARATOR}{}",
            self.ciphertext,
            STANDARD.encode(&self.signature)
        )
    }

    /// Wrap into a data frame.
    pub fn into_frame(self) -> Frame {
        Frame::Ciphertext(self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_not_nested() {
        let prefixes = [
            SYSTEM_PREFIX,
            KEY_EXCHANGE_PREFIX,
            WRAPPED_KEY_PREFIX,
            CIPHERTEXT_PREFIX,
        ];
        for a in prefixes {
            for b in prefixes {
                if a != b {
                    assert!(!a.starts_with(b), "{a} starts with {b}");
                }
            }
        }
    }

    #[test]
    fn test_parse_classifies_by_prefix() {
        assert_eq!(
            Frame::parse("[SYSTEM] hello"),
            Frame::System("hello".into())
        );
        assert_eq!(
            Frame::parse("[KEY_EXCHANGE]abc"),
            Frame::PublicKeyExchange("abc".into())
        );
        assert_eq!(
            Frame::parse("[AES_KEY]abc"),
            Frame::WrappedSessionKey("abc".into())
        );
        assert_eq!(Frame::parse("[AES]x::y"), Frame::Ciphertext("x::y".into()));
        assert_eq!(Frame::parse("hi there"), Frame::PlainFallback("hi there".into()));
    }

    #[test]
    fn test_prefixes_are_case_sensitive() {
        assert_eq!(Frame::parse("[aes]x::y"), Frame::PlainFallback("[aes]x::y".into()));
        assert_eq!(Frame::parse("[System] x"), Frame::PlainFallback("[System] x".into()));
    }

    #[test]
    fn test_wire_form_reparses() {
        let frames = [
            Frame::peer_connected(),
            Frame::PublicKeyExchange("k".into()),
            Frame::wrapped_key(&[1, 2, 3]),
            Frame::Ciphertext("c::s".into()),
        ];
        for frame in frames {
            assert_eq!(Frame::parse(&frame.to_wire()), frame);
        }
        assert_eq!(
            Frame::peer_connected().to_wire(),
            "[SYSTEM] The recipient user is now connected."
        );
    }

    #[test]
    fn test_peer_connected_detection() {
        assert!(Frame::parse("[SYSTEM] The recipient user is now connected.").is_peer_connected());
        assert!(!Frame::parse("[SYSTEM] something else").is_peer_connected());
        assert!(!Frame::parse("The recipient user is now connected.").is_peer_connected());
    }

    #[test]
    fn test_signed_ciphertext_requires_two_parts() {
        for payload in ["", "abc", "::", "abc::", "::c2ln", "a::b::c"] {
            assert_eq!(
                SignedCiphertext::parse(payload),
                Err(ProtocolError::MalformedPayload),
                "payload {payload:?}"
            );
        }
    }

    #[test]
    fn test_signed_ciphertext_rejects_bad_signature_encoding() {
        assert_eq!(
            SignedCiphertext::parse("abc::not base64!"),
            Err(ProtocolError::MalformedPayload)
        );
    }

    #[test]
    fn test_seal_open() {
        let key = SessionKey::generate();
        let alice = LocalIdentity::generate();

        let sealed = SignedCiphertext::seal(&key, &alice, "hello").unwrap();
        let frame = sealed.clone().into_frame();
        let wire = frame.to_wire();
        assert!(wire.starts_with(CIPHERTEXT_PREFIX));

        let parsed = SignedCiphertext::parse(Frame::parse(&wire).payload()).unwrap();
        assert_eq!(parsed, sealed);
        assert_eq!(parsed.open(&key, alice.public_key()).unwrap(), "hello");
    }

    #[test]
    fn test_open_rejects_forged_signature() {
        let key = SessionKey::generate();
        let alice = LocalIdentity::generate();
        let mallory = LocalIdentity::generate();

        let forged = SignedCiphertext::seal(&key, &mallory, "pay mallory").unwrap();
        assert_eq!(
            forged.open(&key, alice.public_key()),
            Err(CryptoError::SignatureInvalid)
        );
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let alice = LocalIdentity::generate();
        let sealed = SignedCiphertext::seal(&SessionKey::generate(), &alice, "x").unwrap();
        assert_eq!(
            sealed.open(&SessionKey::generate(), alice.public_key()),
            Err(CryptoError::DecryptionFailed)
        );
    }
}
