//! Single-shot media encryption with a payload key.
//!
//! Media is encrypted fully buffered with AES-256-GCM under the payload key
//! and a fresh nonce. The nonce travels with the output, so decryption needs
//! only the encrypted bytes and the key.
//!
//! # Layout of encrypted media
//! ```text
//! [ nonce (12 bytes) ][ ciphertext ][ GCM tag (16 bytes) ]
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::crypto::{self, AeadCipher, Aes256Gcm, EntropySource, SystemEntropy, NONCE_LEN, TAG_LEN};
use crate::error::VaultkeyError;
use crate::keys::PayloadKey;

/// Shortest well-formed encrypted media: nonce plus tag, empty body.
pub const MIN_MEDIA_LEN: usize = NONCE_LEN + TAG_LEN;

/// Encrypts and decrypts media buffers.
#[derive(Clone)]
pub struct FileCipher {
    entropy: Arc<dyn EntropySource>,
    aead: Arc<dyn AeadCipher>,
}

impl FileCipher {
    pub fn new(entropy: Arc<dyn EntropySource>, aead: Arc<dyn AeadCipher>) -> Self {
        Self { entropy, aead }
    }

    /// Encrypt `plaintext` under `key`.
    pub fn encrypt_file(&self, plaintext: &[u8], key: &PayloadKey) -> Result<Vec<u8>, VaultkeyError> {
        let nonce: [u8; NONCE_LEN] = crypto::random_array(self.entropy.as_ref())?;

        let mut output = Vec::with_capacity(MIN_MEDIA_LEN + plaintext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(plaintext);

        let tag = self
            .aead
            .seal_detached(key.as_bytes(), &nonce, &mut output[NONCE_LEN..])?;
        output.extend_from_slice(&tag);

        debug!(plaintext_len = plaintext.len(), "encrypted media");
        Ok(output)
    }

    /// Decrypt media produced by [`FileCipher::encrypt_file`].
    ///
    /// Wrong key or tampered bytes fail with [`VaultkeyError::Decryption`].
    /// The caller receives no partial plaintext.
    pub fn decrypt_file(&self, encrypted: &[u8], key: &PayloadKey) -> Result<Vec<u8>, VaultkeyError> {
        if encrypted.len() < MIN_MEDIA_LEN {
            return Err(VaultkeyError::Cipher(format!(
                "encrypted media too short: {} bytes (minimum {})",
                encrypted.len(),
                MIN_MEDIA_LEN
            )));
        }

        let (nonce_bytes, rest) = encrypted.split_at(NONCE_LEN);
        let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        let plaintext = self
            .aead
            .open_detached(key.as_bytes(), &nonce, ciphertext, &tag)
            .map_err(|_| VaultkeyError::Decryption)?;

        debug!(plaintext_len = plaintext.len(), "decrypted media");
        Ok(plaintext)
    }
}

impl Default for FileCipher {
    fn default() -> Self {
        Self::new(Arc::new(SystemEntropy::new()), Arc::new(Aes256Gcm))
    }
}

impl fmt::Debug for FileCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCipher").finish_non_exhaustive()
    }
}
