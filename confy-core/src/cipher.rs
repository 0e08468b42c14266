//! Symmetric message encryption.
//!
//! ChaCha20-Poly1305 with a fresh random nonce per message. The transport
//! encoding is
//!
//! ```text
//! base64( NONCE (12B) | CIPHERTEXT + TAG (N + 16B) )
//! ```
//!
//! Standard base64 alphabet with padding, so the encoding never contains the
//! `::` separator used by data frames.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Session key length in bytes (256 bits).
pub const SESSION_KEY_LEN: usize = 32;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Symmetric session key shared by both peers after the handshake.
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Generate a fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyUnwrapFailed` unless exactly 32 bytes are given; raw key
    /// bytes only ever come out of an unwrap.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; SESSION_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::KeyUnwrapFailed)?;
        Ok(Self(raw))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Encrypt `plaintext` under `key` and return the transport encoding.
///
/// # Errors
///
/// Returns `EncryptionFailed` if the AEAD rejects the input.
pub fn encrypt(key: &SessionKey, plaintext: &str) -> Result<String, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);

    Ok(STANDARD.encode(out))
}

/// Decode and decrypt a transport-encoded ciphertext.
///
/// # Errors
///
/// Returns `DecryptionFailed` if the input is not base64, is too short to
/// hold a nonce and tag, fails authentication, or is not UTF-8.
pub fn decrypt(key: &SessionKey, encoded: &str) -> Result<String, CryptoError> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, sealed) = raw.split_at(NONCE_LEN);

    let plaintext = Zeroizing::new(
        key.cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );

    std::str::from_utf8(&plaintext)
        .map(str::to_owned)
        .map_err(|_| CryptoError::DecryptionFailed)
}
