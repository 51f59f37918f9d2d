//! The upload pipeline facade.
//!
//! `Vault` wires the key generator, envelope codec, and media ciphers to one
//! entropy source and one AEAD, and audits every operation:
//!
//! ```text
//! seal:  payload key -> encrypt media -> wrap key into envelope
//! open:  decode envelope -> payload key -> decrypt media
//! ```
//!
//! This is the only public path that records audit entries. The lower-level
//! types stay usable on their own for callers that do not want an audit log.

use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditLog, AuditRecord, AuditSink, FileAuditSink};
use crate::config::VaultConfig;
use crate::crypto::{AeadCipher, Aes256Gcm, EntropySource, SystemEntropy, KEY_LEN};
use crate::envelope::{Envelope, EnvelopeCodec, EnvelopeDecoder};
use crate::error::VaultkeyError;
use crate::keys::{KeyGenerator, PayloadKey, UnwrappedKey};
use crate::media::FileCipher;
use crate::stream::{StreamDecryptor, StreamEncryptor};

/// What an encrypting client publishes: the envelope goes into the metadata
/// record, the media goes to content-addressed storage.
///
/// Serialises both fields as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedUpload {
    #[serde(with = "envelope_hex")]
    pub envelope: Envelope,
    #[serde(with = "hex::serde")]
    pub media: Vec<u8>,
}

mod envelope_hex {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::envelope::Envelope;

    pub fn serialize<S: Serializer>(envelope: &Envelope, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&envelope.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Envelope, D::Error> {
        let text = String::deserialize(deserializer)?;
        Envelope::from_hex(&text).map_err(D::Error::custom)
    }
}

/// The single entry point for the sealed-upload flow.
pub struct Vault {
    entropy: Arc<dyn EntropySource>,
    aead: Arc<dyn AeadCipher>,
    keys: KeyGenerator,
    codec: EnvelopeCodec,
    media: FileCipher,
    stream_decryptor: StreamDecryptor,
    config: VaultConfig,
    audit: AuditLog,
}

impl Vault {
    /// A vault on the system CSPRNG and `ring` AES-256-GCM.
    pub fn new() -> Self {
        Self::assemble(
            Arc::new(SystemEntropy::new()),
            Arc::new(Aes256Gcm),
            VaultConfig::default(),
        )
    }

    /// Build from a validated configuration, attaching the file audit sink
    /// when one is configured.
    pub fn from_config(config: VaultConfig) -> Result<Self, VaultkeyError> {
        let path = config.audit_log_path.clone();
        let mut vault = Self::with_primitives(Arc::new(SystemEntropy::new()), Arc::new(Aes256Gcm), config)?;
        if let Some(path) = path {
            vault.add_audit_sink(Box::new(FileAuditSink::new(path)?));
        }
        Ok(vault)
    }

    /// Build with injected primitives, e.g. a fixed entropy source in tests.
    pub fn with_primitives(
        entropy: Arc<dyn EntropySource>,
        aead: Arc<dyn AeadCipher>,
        config: VaultConfig,
    ) -> Result<Self, VaultkeyError> {
        config.validate()?;
        Ok(Self::assemble(entropy, aead, config))
    }

    fn assemble(entropy: Arc<dyn EntropySource>, aead: Arc<dyn AeadCipher>, config: VaultConfig) -> Self {
        let keys = KeyGenerator::new(Arc::clone(&entropy));
        Self {
            codec: EnvelopeCodec::new(keys.clone(), Arc::clone(&aead)),
            media: FileCipher::new(Arc::clone(&entropy), Arc::clone(&aead)),
            stream_decryptor: StreamDecryptor::new(Arc::clone(&aead)),
            entropy,
            aead,
            keys,
            config,
            audit: AuditLog::new(),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Generate a payload key, seeded or random.
    pub fn generate_payload_key(&mut self, seed: Option<&[u8]>) -> Result<PayloadKey, VaultkeyError> {
        let key = self.keys.generate_payload_key(seed)?;
        let event = if seed.is_some() {
            AuditEvent::PayloadKeyDerived
        } else {
            AuditEvent::PayloadKeyGenerated
        };
        self.record(event, KEY_LEN);
        Ok(key)
    }

    /// Wrap a payload key into an envelope.
    pub fn encode_key(&mut self, key: &PayloadKey) -> Result<Envelope, VaultkeyError> {
        let envelope = self.codec.encode(key)?;
        self.record(AuditEvent::EnvelopeEncoded, envelope.len());
        Ok(envelope)
    }

    /// Unwrap an envelope into a payload key.
    ///
    /// A key that is not 32 bytes fails conversion to [`PayloadKey`] with
    /// `InvalidKey` and is audited as a rejection, whatever the strict
    /// setting. Use [`Vault::decode_raw`] to see non-standard keys.
    pub fn decode_key(&mut self, envelope: &[u8]) -> Result<PayloadKey, VaultkeyError> {
        let result = self.codec.decode(envelope).and_then(UnwrappedKey::into_payload_key);
        self.audit_decode(envelope.len(), result)
    }

    /// Unwrap an envelope without requiring the 32-byte protocol length,
    /// unless strict mode is on.
    pub fn decode_raw(&mut self, envelope: &[u8]) -> Result<UnwrappedKey, VaultkeyError> {
        let strict = self.config.strict_payload_key_length;
        let result = self.codec.decode(envelope).and_then(|key| {
            if strict && !key.has_expected_len() {
                return Err(VaultkeyError::InvalidKey {
                    expected: KEY_LEN,
                    actual: key.len(),
                });
            }
            Ok(key)
        });
        self.audit_decode(envelope.len(), result)
    }

    pub fn encrypt_media(&mut self, media: &[u8], key: &PayloadKey) -> Result<Vec<u8>, VaultkeyError> {
        let encrypted = self.media.encrypt_file(media, key)?;
        self.record(AuditEvent::MediaEncrypted, encrypted.len());
        Ok(encrypted)
    }

    pub fn decrypt_media(&mut self, encrypted: &[u8], key: &PayloadKey) -> Result<Vec<u8>, VaultkeyError> {
        match self.media.decrypt_file(encrypted, key) {
            Ok(plain) => {
                self.record(AuditEvent::MediaDecrypted, encrypted.len());
                Ok(plain)
            }
            Err(err) => {
                self.record_failure(AuditEvent::MediaRejected, encrypted.len(), &err);
                Err(err)
            }
        }
    }

    /// Encrypting side of the upload flow.
    ///
    /// Generates the payload key (from `seed` when given), encrypts `media`,
    /// wraps the key. The key is dropped, and zeroised, before returning.
    pub fn seal_upload(&mut self, media: &[u8], seed: Option<&[u8]>) -> Result<SealedUpload, VaultkeyError> {
        let key = self.generate_payload_key(seed)?;
        let encrypted = self.encrypt_media(media, &key)?;
        let envelope = self.encode_key(&key)?;
        Ok(SealedUpload {
            envelope,
            media: encrypted,
        })
    }

    /// Decrypting side of the upload flow.
    pub fn open_upload(&mut self, upload: &SealedUpload) -> Result<Vec<u8>, VaultkeyError> {
        self.open_parts(upload.envelope.as_bytes(), &upload.media)
    }

    /// Decrypt media fetched separately from its envelope.
    pub fn open_parts(&mut self, envelope: &[u8], media: &[u8]) -> Result<Vec<u8>, VaultkeyError> {
        let key = self.decode_key(envelope)?;
        self.decrypt_media(media, &key)
    }

    /// Like [`Vault::open_parts`] but the envelope is decoded by `decoder`,
    /// typically a [`crate::transport::RemoteDecoder`].
    pub fn open_with<D: EnvelopeDecoder>(
        &mut self,
        decoder: &D,
        envelope: &[u8],
        media: &[u8],
    ) -> Result<Vec<u8>, VaultkeyError> {
        let result = decoder.decode(envelope).and_then(UnwrappedKey::into_payload_key);
        let key = self.audit_decode(envelope.len(), result)?;
        self.decrypt_media(media, &key)
    }

    /// Stream-encrypt media with the configured chunk size.
    pub fn encrypt_media_stream<R: Read, W: Write>(
        &mut self,
        key: &PayloadKey,
        reader: R,
        writer: W,
    ) -> Result<u64, VaultkeyError> {
        let encryptor = StreamEncryptor::new(
            Arc::clone(&self.entropy),
            Arc::clone(&self.aead),
            self.config.stream_chunk_size,
        )?;
        let written = encryptor.encrypt(key, reader, writer)?;
        self.record(AuditEvent::MediaEncrypted, written as usize);
        Ok(written)
    }

    pub fn decrypt_media_stream<R: Read, W: Write>(
        &mut self,
        key: &PayloadKey,
        reader: R,
        writer: W,
    ) -> Result<u64, VaultkeyError> {
        match self.stream_decryptor.decrypt(key, reader, writer) {
            Ok(read) => {
                self.record(AuditEvent::MediaDecrypted, read as usize);
                Ok(read)
            }
            Err(err) => {
                self.record_failure(AuditEvent::MediaRejected, 0, &err);
                Err(err)
            }
        }
    }

    /// Borrow the envelope codec, e.g. to serve a [`crate::transport::DecryptService`].
    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Return a reference to the audit log.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Add a sink to receive a copy of every audit record.
    pub fn add_audit_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.audit.add_forward_sink(sink);
    }

    fn record(&mut self, event: AuditEvent, byte_len: usize) {
        self.audit.append(AuditRecord::now(event, byte_len));
    }

    fn record_failure(&mut self, event: AuditEvent, byte_len: usize, err: &VaultkeyError) {
        self.audit
            .append(AuditRecord::now(event, byte_len).with_detail(err.kind()));
    }

    /// Records `EnvelopeDecoded` only once the key is fully usable.
    fn audit_decode<T>(
        &mut self,
        envelope_len: usize,
        result: Result<T, VaultkeyError>,
    ) -> Result<T, VaultkeyError> {
        match &result {
            Ok(_) => self.record(AuditEvent::EnvelopeDecoded, envelope_len),
            Err(err) => self.record_failure(AuditEvent::EnvelopeRejected, envelope_len, err),
        }
        result
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("config", &self.config)
            .field("audit_records", &self.audit.len())
            .finish_non_exhaustive()
    }
}
