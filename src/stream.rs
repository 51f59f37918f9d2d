//! Chunked media encryption over `Read`/`Write`.
//!
//! For media too large to buffer comfortably. Each stream draws a random
//! salt and seals its chunks with AES-256-GCM under a subkey derived from the
//! payload key and that salt. The chunk nonce is the chunk counter plus a
//! final-chunk flag, unique within the stream and so unique per subkey.
//!
//! # Stream layout
//! ```text
//! header : "VKS1" | chunk_size (u32 BE) | salt (32 bytes)
//! frame  : final (u8, 0 or 1) | len (u32 BE) | ciphertext + tag (len bytes)
//! nonce  : zero (7) | counter (u32 BE) | final (u8)
//! ```
//!
//! Binding the final flag and the counter into the nonce means truncation,
//! reordering, and flag flipping all fail authentication. A stream that ends
//! before its final frame is rejected as malformed.
//!
//! Frames are authenticated one at a time: if decryption fails partway,
//! frames that already verified have been written to the sink.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use tracing::debug;

use crate::crypto::{self, AeadCipher, Aes256Gcm, EntropySource, SystemEntropy, NONCE_LEN, TAG_LEN};
use crate::error::VaultkeyError;
use crate::keys::{self, PayloadKey, STREAM_SALT_LEN};

/// Stream format magic.
pub const STREAM_MAGIC: &[u8; 4] = b"VKS1";

/// Magic, chunk size, salt.
pub const HEADER_LEN: usize = 4 + 4 + STREAM_SALT_LEN;

const COUNTER_OFFSET: usize = NONCE_LEN - 1 - 4;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

const FRAME_HEADER_LEN: usize = 1 + 4;

fn check_chunk_size(chunk_size: usize) -> Result<(), VaultkeyError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(VaultkeyError::Config(format!(
            "chunk size must be 1..={} bytes, got {}",
            MAX_CHUNK_SIZE, chunk_size
        )));
    }
    Ok(())
}

fn chunk_nonce(counter: u32, last: bool) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[COUNTER_OFFSET..NONCE_LEN - 1].copy_from_slice(&counter.to_be_bytes());
    nonce[NONCE_LEN - 1] = last as u8;
    nonce
}

/// Read until `buf` is full or the reader is exhausted. Returns bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, VaultkeyError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), VaultkeyError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            VaultkeyError::Cipher("truncated stream".into())
        } else {
            VaultkeyError::Io(e)
        }
    })
}

// ---------------------------------------------------------------------------
// Encryptor
// ---------------------------------------------------------------------------

/// Writes the chunked stream format.
#[derive(Clone)]
pub struct StreamEncryptor {
    entropy: Arc<dyn EntropySource>,
    aead: Arc<dyn AeadCipher>,
    chunk_size: usize,
}

impl StreamEncryptor {
    pub fn new(
        entropy: Arc<dyn EntropySource>,
        aead: Arc<dyn AeadCipher>,
        chunk_size: usize,
    ) -> Result<Self, VaultkeyError> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            entropy,
            aead,
            chunk_size,
        })
    }

    /// Default primitives with the given chunk size.
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self, VaultkeyError> {
        Self::new(Arc::new(SystemEntropy::new()), Arc::new(Aes256Gcm), chunk_size)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt everything `reader` yields into `writer`.
    ///
    /// Returns the number of plaintext bytes consumed. Empty input still
    /// produces one (empty) final frame.
    pub fn encrypt<R: Read, W: Write>(
        &self,
        key: &PayloadKey,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64, VaultkeyError> {
        let salt: [u8; STREAM_SALT_LEN] = crypto::random_array(self.entropy.as_ref())?;
        let stream_key = keys::derive_stream_key(key, &salt)?;

        writer.write_all(STREAM_MAGIC)?;
        writer.write_all(&(self.chunk_size as u32).to_be_bytes())?;
        writer.write_all(&salt)?;

        let mut current = vec![0u8; self.chunk_size];
        let mut current_len = read_up_to(&mut reader, &mut current)?;
        let mut next = vec![0u8; self.chunk_size];
        let mut counter: u32 = 0;
        let mut total: u64 = 0;

        loop {
            // A short read means the reader is exhausted; otherwise look ahead
            // one chunk to learn whether this one is last.
            let next_len = if current_len < self.chunk_size {
                0
            } else {
                read_up_to(&mut reader, &mut next)?
            };
            let last = next_len == 0;

            let nonce = chunk_nonce(counter, last);
            let body = &mut current[..current_len];
            let tag = self.aead.seal_detached(stream_key.as_bytes(), &nonce, body)?;

            writer.write_all(&[last as u8])?;
            writer.write_all(&((current_len + TAG_LEN) as u32).to_be_bytes())?;
            writer.write_all(body)?;
            writer.write_all(&tag)?;
            total += current_len as u64;

            if last {
                break;
            }
            counter = counter
                .checked_add(1)
                .ok_or_else(|| VaultkeyError::Cipher("stream exceeds chunk counter".into()))?;
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }

        writer.flush()?;
        debug!(plaintext_len = total, chunks = u64::from(counter) + 1, "encrypted media stream");
        Ok(total)
    }
}

impl fmt::Debug for StreamEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEncryptor")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Decryptor
// ---------------------------------------------------------------------------

/// Reads the chunked stream format.
#[derive(Clone)]
pub struct StreamDecryptor {
    aead: Arc<dyn AeadCipher>,
}

impl StreamDecryptor {
    pub fn new(aead: Arc<dyn AeadCipher>) -> Self {
        Self { aead }
    }

    /// Decrypt a whole stream from `reader` into `writer`.
    ///
    /// Returns the number of plaintext bytes written.
    pub fn decrypt<R: Read, W: Write>(
        &self,
        key: &PayloadKey,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64, VaultkeyError> {
        let mut header = [0u8; HEADER_LEN];
        read_exact_or_truncated(&mut reader, &mut header)?;

        if header[..4] != STREAM_MAGIC[..] {
            return Err(VaultkeyError::Cipher("not a vaultkey stream".into()));
        }
        let mut size_bytes = [0u8; 4];
        size_bytes.copy_from_slice(&header[4..8]);
        let chunk_size = u32::from_be_bytes(size_bytes) as usize;
        check_chunk_size(chunk_size).map_err(|_| VaultkeyError::Cipher("invalid chunk size".into()))?;
        let mut salt = [0u8; STREAM_SALT_LEN];
        salt.copy_from_slice(&header[8..]);
        let stream_key = keys::derive_stream_key(key, &salt)?;

        let mut frame = Vec::with_capacity(chunk_size + TAG_LEN);
        let mut counter: u32 = 0;
        let mut total: u64 = 0;

        loop {
            let mut frame_header = [0u8; FRAME_HEADER_LEN];
            read_exact_or_truncated(&mut reader, &mut frame_header)?;

            let last = match frame_header[0] {
                0 => false,
                1 => true,
                other => return Err(VaultkeyError::Cipher(format!("invalid frame flag {}", other))),
            };
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&frame_header[1..]);
            let len = u32::from_be_bytes(len_bytes) as usize;

            let full = chunk_size + TAG_LEN;
            if len < TAG_LEN || len > full || (!last && len != full) {
                return Err(VaultkeyError::Cipher(format!("invalid frame length {}", len)));
            }

            frame.resize(len, 0);
            read_exact_or_truncated(&mut reader, &mut frame)?;

            let (ciphertext, tag_bytes) = frame.split_at(len - TAG_LEN);
            let mut tag = [0u8; TAG_LEN];
            tag.copy_from_slice(tag_bytes);

            let nonce = chunk_nonce(counter, last);
            let plaintext = self
                .aead
                .open_detached(stream_key.as_bytes(), &nonce, ciphertext, &tag)
                .map_err(|_| VaultkeyError::Decryption)?;
            writer.write_all(&plaintext)?;
            total += plaintext.len() as u64;

            if last {
                break;
            }
            counter = counter
                .checked_add(1)
                .ok_or_else(|| VaultkeyError::Cipher("stream exceeds chunk counter".into()))?;
        }

        let mut trailing = [0u8; 1];
        if read_up_to(&mut reader, &mut trailing)? != 0 {
            return Err(VaultkeyError::Cipher("trailing data after final frame".into()));
        }

        writer.flush()?;
        debug!(plaintext_len = total, chunks = u64::from(counter) + 1, "decrypted media stream");
        Ok(total)
    }
}

impl Default for StreamDecryptor {
    fn default() -> Self {
        Self::new(Arc::new(Aes256Gcm))
    }
}

impl fmt::Debug for StreamDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDecryptor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::{BrokenEntropy, FixedEntropy, RejectingAead};

    fn key(byte: u8) -> PayloadKey {
        PayloadKey::from_bytes([byte; 32])
    }

    fn encrypt(chunk_size: usize, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        StreamEncryptor::with_chunk_size(chunk_size)
            .unwrap()
            .encrypt(&key(3), data, &mut out)
            .unwrap();
        out
    }

    fn decrypt(data: &[u8]) -> Result<Vec<u8>, VaultkeyError> {
        let mut out = Vec::new();
        StreamDecryptor::default().decrypt(&key(3), data, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_various_sizes() {
        for len in [0usize, 1, 15, 16, 17, 64, 100] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let sealed = encrypt(16, &data);
            assert_eq!(decrypt(&sealed).unwrap(), data, "len {}", len);
        }
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let sealed = encrypt(16, &[7u8; 32]);
        // header + two full frames, no trailing empty frame
        assert_eq!(sealed.len(), HEADER_LEN + 2 * (FRAME_HEADER_LEN + 16 + TAG_LEN));
    }

    #[test]
    fn test_empty_input_has_one_frame() {
        let sealed = encrypt(16, b"");
        assert_eq!(sealed.len(), HEADER_LEN + FRAME_HEADER_LEN + TAG_LEN);
    }

    #[test]
    fn test_truncated_stream_is_rejected() {
        let sealed = encrypt(16, &[1u8; 40]);
        // Drop the final frame entirely.
        let cut = HEADER_LEN + 2 * (FRAME_HEADER_LEN + 16 + TAG_LEN);
        assert!(matches!(decrypt(&sealed[..cut]), Err(VaultkeyError::Cipher(_))));
    }

    #[test]
    fn test_forged_final_flag_fails_authentication() {
        let data = [1u8; 40];
        let mut sealed = encrypt(16, &data);
        // Mark the first full frame as final and cut the rest off.
        sealed[HEADER_LEN] = 1;
        let cut = HEADER_LEN + FRAME_HEADER_LEN + 16 + TAG_LEN;
        assert!(matches!(decrypt(&sealed[..cut]), Err(VaultkeyError::Decryption)));
    }

    #[test]
    fn test_swapped_frames_fail() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[1u8; 16]);
        data.extend_from_slice(&[2u8; 4]);
        let sealed = encrypt(16, &data);

        let frame = FRAME_HEADER_LEN + 16 + TAG_LEN;
        let mut swapped = sealed[..HEADER_LEN].to_vec();
        swapped.extend_from_slice(&sealed[HEADER_LEN + frame..HEADER_LEN + 2 * frame]);
        swapped.extend_from_slice(&sealed[HEADER_LEN..HEADER_LEN + frame]);
        swapped.extend_from_slice(&sealed[HEADER_LEN + 2 * frame..]);

        assert!(matches!(decrypt(&swapped), Err(VaultkeyError::Decryption)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(16, b"frame data");
        let mut out = Vec::new();
        let result = StreamDecryptor::default().decrypt(&key(4), &sealed[..], &mut out);
        assert!(matches!(result, Err(VaultkeyError::Decryption)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut sealed = encrypt(16, b"frame data");
        sealed[0] = b'X';
        assert!(matches!(decrypt(&sealed), Err(VaultkeyError::Cipher(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut sealed = encrypt(16, b"frame data");
        sealed.push(0);
        assert!(matches!(decrypt(&sealed), Err(VaultkeyError::Cipher(_))));
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert!(matches!(StreamEncryptor::with_chunk_size(0), Err(VaultkeyError::Config(_))));
        assert!(StreamEncryptor::with_chunk_size(MAX_CHUNK_SIZE + 1).is_err());
        assert!(StreamEncryptor::with_chunk_size(MAX_CHUNK_SIZE).is_ok());
    }

    #[test]
    fn test_same_key_streams_use_distinct_subkeys() {
        // Identical key and input: only the per-stream salt differs.
        let data = [9u8; 20];
        let a = encrypt(16, &data);
        let b = encrypt(16, &data);
        assert_ne!(a[8..HEADER_LEN], b[8..HEADER_LEN]);
        assert_ne!(a[HEADER_LEN..], b[HEADER_LEN..]);
    }

    #[test]
    fn test_tampered_salt_fails() {
        let mut sealed = encrypt(16, b"frame data");
        sealed[8] ^= 0x01;
        assert!(matches!(decrypt(&sealed), Err(VaultkeyError::Decryption)));
    }

    #[test]
    fn test_encrypt_surfaces_entropy_failure() {
        let encryptor = StreamEncryptor::new(Arc::new(BrokenEntropy), Arc::new(Aes256Gcm), 16).unwrap();
        let mut out = Vec::new();
        let result = encryptor.encrypt(&key(3), &b"frame data"[..], &mut out);
        assert!(matches!(result, Err(VaultkeyError::Entropy)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_encrypt_surfaces_aead_rejection() {
        let encryptor = StreamEncryptor::new(Arc::new(FixedEntropy(1)), Arc::new(RejectingAead), 16).unwrap();
        let mut out = Vec::new();
        let result = encryptor.encrypt(&key(3), &b"frame data"[..], &mut out);
        assert!(matches!(result, Err(VaultkeyError::Encryption)));
    }
}
