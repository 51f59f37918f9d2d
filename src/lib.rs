//! # vaultkey
//!
//! Envelope encryption for confidential media uploads.
//!
//! Media is encrypted under a per-upload payload key and published to public
//! storage. The payload key itself is wrapped with AES-256-GCM into a compact
//! 92-byte envelope that can travel in a metadata record. Recovering the
//! media needs only the envelope and the encrypted bytes.
//!
//! ```text
//! encrypt:  payload key -> encrypt media -> encode envelope -> publish both
//! decrypt:  decode envelope -> payload key -> fetch media -> decrypt
//! ```
//!
//! ## Public API
//!
//! The free functions below cover the common case on the system CSPRNG.
//! [`Vault`] runs the whole upload flow with an audit log. The component
//! types ([`EnvelopeCodec`], [`FileCipher`], [`StreamEncryptor`]) accept
//! injected entropy and AEAD capabilities for testing and alternate
//! backends.

// Module declarations.
pub mod audit;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod media;
pub mod stream;
pub mod transport;
pub mod vault;

pub use config::VaultConfig;
pub use envelope::{Envelope, EnvelopeCodec, EnvelopeDecoder, ENVELOPE_LEN, MIN_ENVELOPE_LEN};
pub use error::VaultkeyError;
pub use keys::{KeyGenerator, PayloadKey, UnwrappedKey, WrapKey};
pub use media::FileCipher;
pub use stream::{StreamDecryptor, StreamEncryptor};
pub use vault::{SealedUpload, Vault};

// ---------------------------------------------------------------------------
// Public API: defaults on the system CSPRNG and ring AES-256-GCM
// ---------------------------------------------------------------------------

/// Generate a payload key.
///
/// With seed material (for example a collection address joined with user
/// input) the key is `SHA-256(seed)` and can be re-derived later without
/// storing it. Without a seed it is 32 random bytes.
pub fn generate_payload_key(seed: Option<&[u8]>) -> Result<PayloadKey, VaultkeyError> {
    KeyGenerator::default().generate_payload_key(seed)
}

/// Generate a fresh random wrap key.
pub fn generate_wrap_key() -> Result<WrapKey, VaultkeyError> {
    KeyGenerator::default().generate_wrap_key()
}

/// Wrap a payload key into a 92-byte envelope.
pub fn encode(payload_key: &PayloadKey) -> Result<Envelope, VaultkeyError> {
    EnvelopeCodec::default().encode(payload_key)
}

/// Authenticate an envelope and recover the key it wraps.
pub fn decode(envelope: &[u8]) -> Result<UnwrappedKey, VaultkeyError> {
    EnvelopeCodec::default().decode(envelope)
}

/// Encrypt media bytes under a payload key.
pub fn encrypt_file(plaintext: &[u8], key: &PayloadKey) -> Result<Vec<u8>, VaultkeyError> {
    FileCipher::default().encrypt_file(plaintext, key)
}

/// Decrypt media bytes produced by [`encrypt_file`].
pub fn decrypt_file(encrypted: &[u8], key: &PayloadKey) -> Result<Vec<u8>, VaultkeyError> {
    FileCipher::default().decrypt_file(encrypted, key)
}
