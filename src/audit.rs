//! Immutable audit logging.
//!
//! Records every key-lifecycle operation the [`crate::Vault`] performs. The
//! log is append-only and never holds key material, nonces, or plaintext:
//! only what happened, why it failed, how many bytes were involved, and when.
//! Supports pluggable sinks for forwarding records to files or other stores.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A sink that receives audit records. Implement this to forward records
/// to a file, database, or remote collector.
pub trait AuditSink: Send {
    /// Append a record. Called for every audited operation.
    fn append(&mut self, record: AuditRecord);
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// A random payload key was generated.
    PayloadKeyGenerated,
    /// A payload key was derived from seed material.
    PayloadKeyDerived,
    /// A payload key was wrapped into an envelope.
    EnvelopeEncoded,
    /// An envelope authenticated and yielded a payload key.
    EnvelopeDecoded,
    /// An envelope was malformed or failed authentication.
    EnvelopeRejected,
    /// Media was encrypted under a payload key.
    MediaEncrypted,
    /// Media decrypted successfully.
    MediaDecrypted,
    /// Media failed to decrypt.
    MediaRejected,
}

/// A permanent record of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event: AuditEvent,
    /// Error kind for rejected operations, see [`crate::VaultkeyError::kind`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Size of the artifact the operation produced or consumed.
    pub byte_len: usize,
    /// When the operation completed.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn now(event: AuditEvent, byte_len: usize) -> Self {
        Self {
            event,
            detail: None,
            byte_len,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An append-only log of audited operations.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Default, Serialize, Deserialize)]
pub struct AuditLog {
    records: Vec<AuditRecord>,
    #[serde(skip)]
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.records)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl Clone for AuditLog {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            forward_sinks: Vec::new(), // Forward sinks are not cloned
        }
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record, alongside the
    /// in-memory log.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a new record to the log and forward to any attached sinks.
    pub fn append(&mut self, record: AuditRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(record.clone());
        }
        self.records.push(record);
    }

    /// Return the number of records in the log.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, AuditRecord> {
        self.records.iter()
    }

    /// Count records of one kind.
    pub fn count(&self, event: AuditEvent) -> usize {
        self.records.iter().filter(|r| r.event == event).count()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    /// Open or create a file for append-only audit logging.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: AuditRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialise audit record");
                return;
            }
        };
        if let Err(err) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
            warn!(error = %err, "failed to write audit record");
        }
    }
}
