//! Low-level cryptographic capabilities.
//!
//! This module is one of exactly two places in the crate that import `ring`
//! directly (the other is `keys`). Every other module reaches randomness and
//! the AEAD primitive through the two capability traits defined here, so a
//! caller can inject a deterministic double in tests.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption, detached 128-bit tag)
//! - **Nonce**: 96-bit (12 bytes)
//! - **Key size**: 256 bits (32 bytes)

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::VaultkeyError;

/// Size of a payload or wrap key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of an AES-GCM nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of an AES-GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Entropy
// ---------------------------------------------------------------------------

/// A source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    /// Fill `dest` entirely or fail with [`VaultkeyError::Entropy`].
    fn fill(&self, dest: &mut [u8]) -> Result<(), VaultkeyError>;
}

/// The operating system CSPRNG, via `ring::rand::SystemRandom`.
///
/// There is no nonce caching or counter-based generation: every call draws
/// fresh bytes.
#[derive(Debug)]
pub struct SystemEntropy {
    rng: SystemRandom,
}

impl SystemEntropy {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for SystemEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), VaultkeyError> {
        self.rng.fill(dest).map_err(|_| VaultkeyError::Entropy)
    }
}

/// Draw a fixed-size array from an entropy source.
pub(crate) fn random_array<const N: usize>(
    entropy: &dyn EntropySource,
) -> Result<[u8; N], VaultkeyError> {
    let mut buf = [0u8; N];
    entropy.fill(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// AEAD
// ---------------------------------------------------------------------------

/// An AEAD primitive with a 256-bit key, 96-bit nonce and 128-bit tag,
/// operating with a detached tag and no associated data.
pub trait AeadCipher: Send + Sync {
    /// Encrypt `in_out` in place and return the authentication tag.
    fn seal_detached(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        in_out: &mut [u8],
    ) -> Result<[u8; TAG_LEN], VaultkeyError>;

    /// Verify `tag` over `ciphertext` and return the plaintext.
    ///
    /// Fails with [`VaultkeyError::Authentication`] on tag mismatch. No
    /// partial plaintext is ever returned.
    fn open_detached(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, VaultkeyError>;
}

/// AES-256-GCM backed by `ring`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes256Gcm;

impl Aes256Gcm {
    fn key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey, VaultkeyError> {
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).map_err(|_| VaultkeyError::InvalidKey {
            expected: KEY_LEN,
            actual: key_bytes.len(),
        })?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl AeadCipher for Aes256Gcm {
    fn seal_detached(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        in_out: &mut [u8],
    ) -> Result<[u8; TAG_LEN], VaultkeyError> {
        let key = Self::key(key).map_err(|_| VaultkeyError::Encryption)?;
        let nonce = Nonce::assume_unique_for_key(*nonce);

        let tag = key
            .seal_in_place_separate_tag(nonce, Aad::empty(), in_out)
            .map_err(|_| VaultkeyError::Encryption)?;

        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(tag.as_ref());
        Ok(out)
    }

    fn open_detached(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, VaultkeyError> {
        let key = Self::key(key)?;
        let nonce = Nonce::assume_unique_for_key(*nonce);

        // ring expects `ciphertext || tag` in one buffer.
        let mut buf = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        buf.extend_from_slice(ciphertext);
        buf.extend_from_slice(tag);

        let plaintext_len = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| VaultkeyError::Authentication)?
            .len();
        buf.truncate(plaintext_len);
        Ok(buf)
    }
}
