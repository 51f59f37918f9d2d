//! Envelope encoding and decoding.
//!
//! An envelope is the single artifact that carries a wrapped payload key
//! between the encrypting client and whoever later recovers the key.
//!
//! # Wire format
//! ```text
//! offset  length  field
//! 0       32      wrap key
//! 32      12      nonce
//! 44      16      AES-GCM tag
//! 60      N       ciphertext of the payload key (N = 32 in practice)
//! ```
//!
//! There are no length prefixes. Every field but the ciphertext has a fixed
//! width and the ciphertext is everything remaining.
//!
//! # Security note
//! The wrap key travels inside the envelope next to its own ciphertext.
//! Anyone holding the envelope can recover the payload key, so the envelope
//! gives integrity and a fixed transport shape, not confidentiality. The
//! confidentiality boundary is whoever is allowed to call the decoder. The
//! layout is kept as-is for compatibility with existing envelopes.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{self, AeadCipher, Aes256Gcm, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::VaultkeyError;
use crate::keys::{KeyGenerator, PayloadKey, UnwrappedKey};

/// Offset of the nonce field.
pub const NONCE_OFFSET: usize = KEY_LEN;

/// Offset of the tag field.
pub const TAG_OFFSET: usize = NONCE_OFFSET + NONCE_LEN;

/// Offset of the ciphertext field.
pub const CIPHERTEXT_OFFSET: usize = TAG_OFFSET + TAG_LEN;

/// Shortest accepted envelope: all fixed fields plus one ciphertext byte.
pub const MIN_ENVELOPE_LEN: usize = CIPHERTEXT_OFFSET + 1;

/// Length of an envelope wrapping a 32-byte payload key.
pub const ENVELOPE_LEN: usize = CIPHERTEXT_OFFSET + KEY_LEN;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An immutable encoded envelope.
///
/// Holding an `Envelope` only guarantees the length is at least
/// [`MIN_ENVELOPE_LEN`]. Authenticity is checked by decoding it.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Vec<u8>,
}

impl Envelope {
    /// Accept raw bytes from a transport, checking only the minimum length.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, VaultkeyError> {
        if bytes.len() < MIN_ENVELOPE_LEN {
            return Err(VaultkeyError::MalformedEnvelope { len: bytes.len() });
        }
        Ok(Self { bytes })
    }

    /// Parse the hex form used in metadata records. A leading `0x` is
    /// accepted.
    pub fn from_hex(text: &str) -> Result<Self, VaultkeyError> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        Self::from_bytes(hex::decode(digits)?)
    }

    /// Lowercase hex, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes `[0, 32)`.
    pub fn wrap_key(&self) -> &[u8] {
        &self.bytes[..NONCE_OFFSET]
    }

    /// Bytes `[32, 44)`.
    pub fn nonce(&self) -> &[u8] {
        &self.bytes[NONCE_OFFSET..TAG_OFFSET]
    }

    /// Bytes `[44, 60)`.
    pub fn tag(&self) -> &[u8] {
        &self.bytes[TAG_OFFSET..CIPHERTEXT_OFFSET]
    }

    /// Bytes `[60, len)`.
    pub fn ciphertext(&self) -> &[u8] {
        &self.bytes[CIPHERTEXT_OFFSET..]
    }

    fn fields(&self) -> ([u8; KEY_LEN], [u8; NONCE_LEN], [u8; TAG_LEN], &[u8]) {
        let mut wrap_key = [0u8; KEY_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut tag = [0u8; TAG_LEN];
        wrap_key.copy_from_slice(self.wrap_key());
        nonce.copy_from_slice(self.nonce());
        tag.copy_from_slice(self.tag());
        (wrap_key, nonce, tag, self.ciphertext())
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The wrap key is in here, so never print the bytes.
        f.debug_struct("Envelope").field("len", &self.bytes.len()).finish()
    }
}

impl AsRef<[u8]> for Envelope {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// Decoder capability
// ---------------------------------------------------------------------------

/// Anything that can turn envelope bytes back into a payload key.
///
/// Implemented in-process by [`EnvelopeCodec`] and over a request/response
/// boundary by [`crate::transport::RemoteDecoder`].
pub trait EnvelopeDecoder {
    fn decode(&self, envelope: &[u8]) -> Result<UnwrappedKey, VaultkeyError>;
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encodes and decodes envelopes with injected entropy and AEAD.
///
/// Stateless between calls: each `encode` draws its own wrap key and nonce
/// and keeps neither.
#[derive(Clone)]
pub struct EnvelopeCodec {
    keys: KeyGenerator,
    aead: Arc<dyn AeadCipher>,
}

impl EnvelopeCodec {
    pub fn new(keys: KeyGenerator, aead: Arc<dyn AeadCipher>) -> Self {
        Self { keys, aead }
    }

    /// Wrap `payload_key` into a fresh 92-byte envelope.
    pub fn encode(&self, payload_key: &PayloadKey) -> Result<Envelope, VaultkeyError> {
        self.encode_bytes(payload_key.as_bytes())
    }

    /// Wrap arbitrary key bytes. Used by [`EnvelopeCodec::encode`]; exposed
    /// for callers interoperating with non-standard key lengths.
    pub fn encode_bytes(&self, payload_key: &[u8]) -> Result<Envelope, VaultkeyError> {
        if payload_key.is_empty() {
            return Err(VaultkeyError::InvalidKey {
                expected: KEY_LEN,
                actual: 0,
            });
        }

        let wrap_key = self.keys.generate_wrap_key()?;
        let nonce: [u8; NONCE_LEN] = crypto::random_array(self.keys.entropy())?;

        // Holds the plaintext key until sealed; wiped if sealing fails.
        let mut bytes = Zeroizing::new(Vec::with_capacity(CIPHERTEXT_OFFSET + payload_key.len()));
        bytes.extend_from_slice(wrap_key.as_bytes());
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(&[0u8; TAG_LEN]);
        bytes.extend_from_slice(payload_key);

        // Encrypt the ciphertext region in place, then fill in the tag slot.
        let tag = self
            .aead
            .seal_detached(wrap_key.as_bytes(), &nonce, &mut bytes[CIPHERTEXT_OFFSET..])?;
        bytes[TAG_OFFSET..CIPHERTEXT_OFFSET].copy_from_slice(&tag);

        debug!(envelope_len = bytes.len(), "encoded envelope");
        Ok(Envelope {
            bytes: std::mem::take(&mut *bytes),
        })
    }

    /// Authenticate and unwrap an envelope.
    ///
    /// A tag mismatch is terminal: the same input will fail again, and no
    /// default key is substituted.
    pub fn decode_envelope(&self, envelope: &Envelope) -> Result<UnwrappedKey, VaultkeyError> {
        let (mut wrap_key, nonce, tag, ciphertext) = envelope.fields();
        let result = self.aead.open_detached(&wrap_key, &nonce, ciphertext, &tag);
        wrap_key.zeroize();

        let plaintext = match result {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(envelope_len = envelope.len(), "envelope failed authentication");
                return Err(VaultkeyError::Authentication);
            }
        };

        let key = UnwrappedKey::new(plaintext);
        if !key.has_expected_len() {
            warn!(
                key_len = key.len(),
                expected = KEY_LEN,
                "unwrapped payload key has unexpected length"
            );
        }
        debug!(envelope_len = envelope.len(), "decoded envelope");
        Ok(key)
    }
}

impl EnvelopeDecoder for EnvelopeCodec {
    fn decode(&self, envelope: &[u8]) -> Result<UnwrappedKey, VaultkeyError> {
        // Checked before any copy so short input is rejected without work.
        if envelope.len() < MIN_ENVELOPE_LEN {
            return Err(VaultkeyError::MalformedEnvelope { len: envelope.len() });
        }
        self.decode_envelope(&Envelope::from_bytes(envelope.to_vec())?)
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(KeyGenerator::default(), Arc::new(Aes256Gcm))
    }
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::{BrokenEntropy, FixedEntropy, RejectingAead};

    fn sequential_key() -> PayloadKey {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        PayloadKey::from_bytes(bytes)
    }

    fn fixed_codec() -> EnvelopeCodec {
        EnvelopeCodec::new(KeyGenerator::new(Arc::new(FixedEntropy(0x11))), Arc::new(Aes256Gcm))
    }

    #[test]
    fn test_encode_layout() {
        let codec = fixed_codec();
        let envelope = codec.encode(&sequential_key()).unwrap();

        assert_eq!(envelope.len(), ENVELOPE_LEN);
        assert_eq!(envelope.len(), 92);
        assert_eq!(envelope.wrap_key(), &[0x11; KEY_LEN]);
        assert_eq!(envelope.nonce(), &[0x11; NONCE_LEN]);
        assert_eq!(envelope.tag().len(), TAG_LEN);
        assert_eq!(envelope.ciphertext().len(), KEY_LEN);
        assert_ne!(envelope.ciphertext(), sequential_key().as_bytes());
    }

    #[test]
    fn test_fixed_entropy_is_reproducible() {
        let a = fixed_codec().encode(&sequential_key()).unwrap();
        let b = fixed_codec().encode(&sequential_key()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_roundtrip() {
        let codec = EnvelopeCodec::default();
        let envelope = codec.encode(&sequential_key()).unwrap();
        let recovered = codec.decode(envelope.as_bytes()).unwrap();
        assert_eq!(recovered.as_bytes(), sequential_key().as_bytes());
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let codec = EnvelopeCodec::default();
        for len in [0, 1, 59, 60] {
            let result = codec.decode(&vec![0u8; len]);
            assert!(matches!(result, Err(VaultkeyError::MalformedEnvelope { len: l }) if l == len));
        }
    }

    #[test]
    fn test_minimum_length_envelope_is_parsed() {
        // 61 bytes passes the length check and then fails authentication.
        let result = EnvelopeCodec::default().decode(&[0u8; MIN_ENVELOPE_LEN]);
        assert!(matches!(result, Err(VaultkeyError::Authentication)));
    }

    #[test]
    fn test_corrupted_tag_fails() {
        let codec = EnvelopeCodec::default();
        let mut bytes = codec.encode(&sequential_key()).unwrap().into_bytes();
        bytes[50] ^= 0x01;
        assert!(matches!(codec.decode(&bytes), Err(VaultkeyError::Authentication)));
    }

    #[test]
    fn test_non_standard_key_length_is_returned() {
        let codec = EnvelopeCodec::default();
        let envelope = codec.encode_bytes(&[0xAB; 16]).unwrap();
        assert_eq!(envelope.len(), CIPHERTEXT_OFFSET + 16);

        let recovered = codec.decode(envelope.as_bytes()).unwrap();
        assert_eq!(recovered.as_bytes(), &[0xAB; 16]);
        assert!(!recovered.has_expected_len());
        assert!(recovered.into_payload_key().is_err());
    }

    #[test]
    fn test_encode_surfaces_entropy_failure() {
        let codec = EnvelopeCodec::new(KeyGenerator::new(Arc::new(BrokenEntropy)), Arc::new(Aes256Gcm));
        assert!(matches!(codec.encode(&sequential_key()), Err(VaultkeyError::Entropy)));
    }

    #[test]
    fn test_encode_surfaces_aead_rejection() {
        let codec = EnvelopeCodec::new(KeyGenerator::new(Arc::new(FixedEntropy(0x11))), Arc::new(RejectingAead));
        assert!(matches!(codec.encode(&sequential_key()), Err(VaultkeyError::Encryption)));
        assert!(matches!(codec.encode_bytes(&[1u8; 16]), Err(VaultkeyError::Encryption)));
    }

    #[test]
    fn test_hex_roundtrip_with_prefix() {
        let envelope = fixed_codec().encode(&sequential_key()).unwrap();
        let text = format!("0x{}", envelope.to_hex());
        assert_eq!(Envelope::from_hex(&text).unwrap(), envelope);
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(matches!(Envelope::from_hex("zz"), Err(VaultkeyError::InvalidEncoding(_))));
        assert!(matches!(
            Envelope::from_hex("00ff"),
            Err(VaultkeyError::MalformedEnvelope { len: 2 })
        ));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let envelope = fixed_codec().encode(&sequential_key()).unwrap();
        assert_eq!(format!("{:?}", envelope), "Envelope { len: 92 }");
    }
}
