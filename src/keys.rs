//! Key generation and ownership.
//!
//! This module owns two responsibilities:
//! 1. Producing payload keys (seeded or random) and wrap keys.
//! 2. Holding key material in types that are opaque, non-cloneable, and
//!    zeroised on drop.
//!
//! This is one of exactly two modules permitted to import `ring` directly
//! (the other is `crypto`). Seeded derivation lives here because it operates
//! on key material itself, not on ciphertexts.
//!
//! ## Seeded derivation
//!
//! ```text
//! payload_key = SHA-256(seed_material)
//! ```
//!
//! The same seed always yields the same key, which lets a client re-derive
//! an upload key from (collection address, user input) without storing it.
//!
//! ## Stream subkeys
//!
//! ```text
//! stream_key = HKDF-SHA256(salt = stream_salt, ikm = payload_key, info = "vaultkey/stream/v1")
//! ```
//!
//! Each media stream draws its own 32-byte salt, so chunk nonces only need to
//! be unique within one stream even when a seeded payload key is reused.

use std::fmt;
use std::sync::Arc;

use ring::digest::{digest, SHA256};
use ring::hkdf;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, EntropySource, SystemEntropy, KEY_LEN};
use crate::error::VaultkeyError;

// ---------------------------------------------------------------------------
// Payload key
// ---------------------------------------------------------------------------

/// The symmetric key that encrypts one upload's media.
///
/// - Not `Clone`. One upload, one key value.
/// - Zeroised on drop.
/// - `Debug` never prints the bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PayloadKey {
    bytes: [u8; KEY_LEN],
}

impl PayloadKey {
    /// Wrap raw key bytes the caller already holds.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, rejecting anything but 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultkeyError> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| VaultkeyError::InvalidKey {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(array))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadKey").field("bytes", &"[REDACTED]").finish()
    }
}

// ---------------------------------------------------------------------------
// Wrap key
// ---------------------------------------------------------------------------

/// A single-envelope key that encrypts a payload key.
///
/// Only the encoder creates these. It lives for one `encode` call before its
/// bytes are copied into the envelope and the value is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WrapKey {
    bytes: [u8; KEY_LEN],
}

impl WrapKey {
    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for WrapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapKey").field("bytes", &"[REDACTED]").finish()
    }
}

// ---------------------------------------------------------------------------
// Unwrapped key
// ---------------------------------------------------------------------------

/// The plaintext recovered from an envelope.
///
/// The envelope format carries no payload-key length, so the decoder returns
/// whatever the ciphertext region decrypted to. Convert to a [`PayloadKey`]
/// with [`UnwrappedKey::into_payload_key`] once the length is known good.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct UnwrappedKey {
    bytes: Vec<u8>,
}

impl UnwrappedKey {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True when the recovered key has the protocol length of 32 bytes.
    pub fn has_expected_len(&self) -> bool {
        self.bytes.len() == KEY_LEN
    }

    pub fn into_payload_key(self) -> Result<PayloadKey, VaultkeyError> {
        PayloadKey::from_slice(&self.bytes)
    }
}

impl fmt::Debug for UnwrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnwrappedKey")
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Produces payload keys and wrap keys from an injected entropy source.
#[derive(Clone)]
pub struct KeyGenerator {
    entropy: Arc<dyn EntropySource>,
}

impl KeyGenerator {
    pub fn new(entropy: Arc<dyn EntropySource>) -> Self {
        Self { entropy }
    }

    /// Generate a payload key.
    ///
    /// With `seed` the key is `SHA-256(seed)` and fully deterministic. An
    /// empty seed is still a seed. Without one the key is 32 fresh random
    /// bytes.
    pub fn generate_payload_key(&self, seed: Option<&[u8]>) -> Result<PayloadKey, VaultkeyError> {
        match seed {
            Some(material) => Ok(derive_payload_key(material)),
            None => {
                let bytes = crypto::random_array::<KEY_LEN>(self.entropy.as_ref())?;
                Ok(PayloadKey::from_bytes(bytes))
            }
        }
    }

    /// Generate a fresh random wrap key. Never deterministic.
    pub fn generate_wrap_key(&self) -> Result<WrapKey, VaultkeyError> {
        let bytes = crypto::random_array::<KEY_LEN>(self.entropy.as_ref())?;
        Ok(WrapKey { bytes })
    }

    pub(crate) fn entropy(&self) -> &dyn EntropySource {
        self.entropy.as_ref()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemEntropy::new()))
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

/// Length of the random salt that scopes a stream subkey.
pub const STREAM_SALT_LEN: usize = 32;

const STREAM_KEY_INFO: &[u8] = b"vaultkey/stream/v1";

/// Derive the key that seals the chunks of one media stream.
pub(crate) fn derive_stream_key(
    payload_key: &PayloadKey,
    salt: &[u8; STREAM_SALT_LEN],
) -> Result<PayloadKey, VaultkeyError> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(payload_key.as_bytes());
    let info = [STREAM_KEY_INFO];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| VaultkeyError::Cipher("stream key derivation failed".into()))?;

    let mut bytes = [0u8; KEY_LEN];
    okm.fill(&mut bytes)
        .map_err(|_| VaultkeyError::Cipher("stream key derivation failed".into()))?;
    Ok(PayloadKey::from_bytes(bytes))
}

/// SHA-256 of the seed material.
fn derive_payload_key(seed: &[u8]) -> PayloadKey {
    let hash = digest(&SHA256, seed);
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(hash.as_ref());
    PayloadKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::{BrokenEntropy, FixedEntropy};

    #[test]
    fn test_seeded_key_is_deterministic() {
        let generator = KeyGenerator::default();
        let a = generator.generate_payload_key(Some(b"0xabc:my-moment")).unwrap();
        let b = generator.generate_payload_key(Some(b"0xabc:my-moment")).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_different_seeds_differ() {
        let generator = KeyGenerator::default();
        let a = generator.generate_payload_key(Some(b"seed-a")).unwrap();
        let b = generator.generate_payload_key(Some(b"seed-b")).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_seeded_key_is_sha256() {
        // SHA-256("abc"), FIPS 180-2 appendix B.1.
        let expected = hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").unwrap();
        let key = KeyGenerator::default().generate_payload_key(Some(b"abc")).unwrap();
        assert_eq!(&key.as_bytes()[..], &expected[..]);
    }

    #[test]
    fn test_seed_ignores_entropy_source() {
        let generator = KeyGenerator::new(Arc::new(BrokenEntropy));
        assert!(generator.generate_payload_key(Some(b"seed")).is_ok());
    }

    #[test]
    fn test_random_keys_differ() {
        let generator = KeyGenerator::default();
        let a = generator.generate_payload_key(None).unwrap();
        let b = generator.generate_payload_key(None).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_entropy_failure_surfaces() {
        let generator = KeyGenerator::new(Arc::new(BrokenEntropy));
        assert!(matches!(generator.generate_payload_key(None), Err(VaultkeyError::Entropy)));
        assert!(matches!(generator.generate_wrap_key(), Err(VaultkeyError::Entropy)));
    }

    #[test]
    fn test_wrap_key_uses_injected_entropy() {
        let generator = KeyGenerator::new(Arc::new(FixedEntropy(9)));
        assert_eq!(generator.generate_wrap_key().unwrap().as_bytes(), &[9u8; KEY_LEN]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = PayloadKey::from_bytes([0x41; KEY_LEN]);
        let printed = format!("{:?}", key);
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("65"));
    }

    #[test]
    fn test_stream_key_depends_on_salt() {
        let key = PayloadKey::from_bytes([5u8; KEY_LEN]);
        let a = derive_stream_key(&key, &[1u8; STREAM_SALT_LEN]).unwrap();
        let b = derive_stream_key(&key, &[2u8; STREAM_SALT_LEN]).unwrap();
        let again = derive_stream_key(&key, &[1u8; STREAM_SALT_LEN]).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), key.as_bytes());
        assert_eq!(a.as_bytes(), again.as_bytes());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let result = PayloadKey::from_slice(&[0u8; 31]);
        assert!(matches!(
            result,
            Err(VaultkeyError::InvalidKey { expected: 32, actual: 31 })
        ));
    }
}
