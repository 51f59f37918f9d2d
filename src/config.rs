//! Vault configuration.
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VaultkeyError;
use crate::stream::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Plaintext bytes per frame for streamed media.
    pub stream_chunk_size: usize,

    /// Reject unwrapped keys that are not exactly 32 bytes instead of only
    /// logging a warning.
    pub strict_payload_key_length: bool,

    /// Append audit records as JSON lines to this file.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            stream_chunk_size: DEFAULT_CHUNK_SIZE,
            strict_payload_key_length: false,
            audit_log_path: None,
        }
    }
}

impl VaultConfig {
    pub fn from_json_str(text: &str) -> Result<Self, VaultkeyError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| VaultkeyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VaultkeyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), VaultkeyError> {
        if self.stream_chunk_size == 0 || self.stream_chunk_size > MAX_CHUNK_SIZE {
            return Err(VaultkeyError::Config(format!(
                "stream_chunk_size must be 1..={}, got {}",
                MAX_CHUNK_SIZE, self.stream_chunk_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(VaultConfig::from_json_str("{}").unwrap(), VaultConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = VaultConfig::from_json_str(
            r#"{"stream_chunk_size": 4096, "strict_payload_key_length": true, "audit_log_path": "/tmp/a.jsonl"}"#,
        )
        .unwrap();
        assert_eq!(config.stream_chunk_size, 4096);
        assert!(config.strict_payload_key_length);
        assert_eq!(config.audit_log_path, Some(PathBuf::from("/tmp/a.jsonl")));
    }

    #[test]
    fn test_rejects_zero_chunk() {
        let result = VaultConfig::from_json_str(r#"{"stream_chunk_size": 0}"#);
        assert!(matches!(result, Err(VaultkeyError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let result = VaultConfig::from_json_str(r#"{"chunk": 1}"#);
        assert!(matches!(result, Err(VaultkeyError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        std::fs::write(&path, r#"{"stream_chunk_size": 1024}"#).unwrap();
        assert_eq!(VaultConfig::from_file(&path).unwrap().stream_chunk_size, 1024);
    }
}
