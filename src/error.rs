//! Error types for vaultkey.
//!
//! Every error variant is a distinct failure mode of the key-wrapping layer.
//! Error messages are intentionally minimal. They signal *what* failed
//! without revealing key material, nonces, or partial plaintext.

use std::fmt;

/// The single error type for all vaultkey operations.
#[derive(Debug)]
pub enum VaultkeyError {
    /// The secure random source failed to produce bytes.
    Entropy,

    /// An envelope was shorter than the fixed-field minimum.
    MalformedEnvelope {
        /// Length of the rejected input.
        len: usize,
    },

    /// The AEAD tag of an envelope did not verify. The envelope is
    /// tampered, corrupted, or was never produced by an encoder.
    Authentication,

    /// The AEAD primitive rejected an encryption (bad key or nonce length).
    Encryption,

    /// Media decryption failed: wrong payload key or tampered ciphertext.
    Decryption,

    /// Encrypted media was structurally invalid (too short, bad header,
    /// truncated stream).
    Cipher(String),

    /// Key material had the wrong length.
    InvalidKey {
        /// Length that was expected.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A hex or JSON transport encoding could not be parsed.
    InvalidEncoding(String),

    /// A remote decoder could not be reached or answered with an error.
    Transport(String),

    /// A configuration value was missing or out of range.
    Config(String),

    /// An I/O error from a stream or an audit sink.
    Io(std::io::Error),
}

impl VaultkeyError {
    /// Short, stable name of the failure mode. Safe to log: carries no
    /// lengths, reasons, or key material.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Entropy => "entropy",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::Authentication => "authentication",
            Self::Encryption => "encryption",
            Self::Decryption => "decryption",
            Self::Cipher(_) => "cipher",
            Self::InvalidKey { .. } => "invalid_key",
            Self::InvalidEncoding(_) => "invalid_encoding",
            Self::Transport(_) => "transport",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

impl fmt::Display for VaultkeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entropy => write!(f, "randomness source failed"),
            Self::MalformedEnvelope { len } => {
                write!(f, "malformed envelope: {} bytes (minimum {})", len, crate::envelope::MIN_ENVELOPE_LEN)
            }
            Self::Authentication => write!(f, "envelope authentication failed"),
            Self::Encryption => write!(f, "encryption failed"),
            Self::Decryption => write!(f, "decryption failed"),
            Self::Cipher(reason) => write!(f, "malformed ciphertext: {}", reason),
            Self::InvalidKey { expected, actual } => {
                write!(f, "invalid key length: {} bytes (expected {})", actual, expected)
            }
            Self::InvalidEncoding(reason) => write!(f, "invalid encoding: {}", reason),
            Self::Transport(reason) => write!(f, "transport failure: {}", reason),
            Self::Config(reason) => write!(f, "invalid configuration: {}", reason),
            Self::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for VaultkeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VaultkeyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<hex::FromHexError> for VaultkeyError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidEncoding(err.to_string())
    }
}

impl From<serde_json::Error> for VaultkeyError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding(err.to_string())
    }
}
