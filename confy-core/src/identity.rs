//! Session identity: signing and session-key wrapping.
//!
//! Each session generates a fresh identity made of two keys:
//!
//! - an Ed25519 signing key, used to sign every outbound plaintext;
//! - an X25519 static secret, used by the peer to wrap the session key for us.
//!
//! # Security Properties
//!
//! - Keys are session-scoped. They are never persisted.
//! - Secret halves are zeroized on drop (`SigningKey` and `StaticSecret` both
//!   implement `ZeroizeOnDrop`).
//! - Key wrapping is ECIES-style: ephemeral X25519, HKDF-SHA256,
//!   ChaCha20-Poly1305. A low-order peer key is refused.
//!
//! Public key wire encoding:
//!
//! ```text
//! base64( ED25519 VERIFYING KEY (32B) | X25519 PUBLIC KEY (32B) )
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::cipher::{SessionKey, NONCE_LEN, SESSION_KEY_LEN, TAG_LEN};
use crate::error::CryptoError;

/// HKDF info string for key wrapping.
const WRAP_INFO: &[u8] = b"confy-session-key-wrap-v1";

/// Serialized public key length (verifying key + exchange key).
pub const PUBLIC_KEY_LEN: usize = 64;

/// Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Wrapped session key length: ephemeral public, nonce, sealed key.
pub const WRAPPED_KEY_LEN: usize = 32 + NONCE_LEN + SESSION_KEY_LEN + TAG_LEN;

/// Our keypair for one session.
pub struct LocalIdentity {
    signing: SigningKey,
    exchange: StaticSecret,
    public: IdentityKey,
}

impl LocalIdentity {
    /// Generate a new random identity from the OS CSPRNG.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let exchange = StaticSecret::random_from_rng(OsRng);
        let public = IdentityKey {
            verifying: signing.verifying_key(),
            exchange: PublicKey::from(&exchange),
        };
        Self {
            signing,
            exchange,
            public,
        }
    }

    /// Our public half.
    pub fn public_key(&self) -> &IdentityKey {
        &self.public
    }

    /// Transport encoding of our public half.
    pub fn serialize_public_key(&self) -> String {
        self.public.serialize()
    }

    /// Sign `message` with our Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }

    /// Open a session key the peer wrapped for us with [`IdentityKey::wrap_key`].
    ///
    /// # Errors
    ///
    /// Returns `KeyUnwrapFailed` on a wrong length, a blob sealed for another
    /// key, or any corruption.
    pub fn unwrap_key(&self, wrapped: &[u8]) -> Result<SessionKey, CryptoError> {
        if wrapped.len() != WRAPPED_KEY_LEN {
            return Err(CryptoError::KeyUnwrapFailed);
        }
        let (ephemeral, rest) = wrapped.split_at(32);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let mut ephemeral_bytes = [0u8; 32];
        ephemeral_bytes.copy_from_slice(ephemeral);
        let ephemeral_public = PublicKey::from(ephemeral_bytes);

        let shared = self.exchange.diffie_hellman(&ephemeral_public);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyUnwrapFailed);
        }

        let cipher = wrap_cipher(shared.as_bytes()).ok_or(CryptoError::KeyUnwrapFailed)?;
        let aad = wrap_aad(&ephemeral_bytes, self.public.exchange.as_bytes());
        let raw = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
                .map_err(|_| CryptoError::KeyUnwrapFailed)?,
        );

        SessionKey::from_bytes(&raw)
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("public", &self.public.serialize())
            .finish_non_exhaustive()
    }
}

/// A peer's public identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityKey {
    verifying: VerifyingKey,
    exchange: PublicKey,
}

impl IdentityKey {
    /// Raw 64-byte form: verifying key then exchange key.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out[..32].copy_from_slice(self.verifying.as_bytes());
        out[32..].copy_from_slice(self.exchange.as_bytes());
        out
    }

    /// Transport encoding (standard base64).
    pub fn serialize(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decode a transport-encoded public key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPublicKey` on bad base64, a wrong length, or a
    /// verifying key that is not a valid curve point.
    pub fn deserialize(encoded: &str) -> Result<Self, CryptoError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let raw: [u8; PUBLIC_KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let mut verifying = [0u8; 32];
        let mut exchange = [0u8; 32];
        verifying.copy_from_slice(&raw[..32]);
        exchange.copy_from_slice(&raw[32..]);

        Ok(Self {
            verifying: VerifyingKey::from_bytes(&verifying)
                .map_err(|_| CryptoError::InvalidPublicKey)?,
            exchange: PublicKey::from(exchange),
        })
    }

    /// Check an Ed25519 signature over `message`.
    ///
    /// Returns `false` for any mismatch, including a malformed signature.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match Signature::from_slice(signature) {
            Ok(sig) => self.verifying.verify_strict(message, &sig).is_ok(),
            Err(_) => false,
        }
    }

    /// Wrap `key` so only the holder of this identity can open it.
    ///
    /// # Errors
    ///
    /// Returns `KeyWrapFailed` if the exchange key is a low-order point or
    /// sealing fails.
    pub fn wrap_key(&self, key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);

        let shared = ephemeral.diffie_hellman(&self.exchange);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyWrapFailed);
        }

        let cipher = wrap_cipher(shared.as_bytes()).ok_or(CryptoError::KeyWrapFailed)?;
        let aad = wrap_aad(ephemeral_public.as_bytes(), self.exchange.as_bytes());

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: key.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::KeyWrapFailed)?;

        let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

fn wrap_cipher(shared: &[u8; 32]) -> Option<ChaCha20Poly1305> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(WRAP_INFO, &mut okm[..]).ok()?;
    Some(ChaCha20Poly1305::new(Key::from_slice(&okm[..])))
}

fn wrap_aad(ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 64] {
    let mut aad = [0u8; 64];
    aad[..32].copy_from_slice(ephemeral);
    aad[32..].copy_from_slice(recipient);
    aad
}
