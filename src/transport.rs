//! Request/response seam for the remote decrypt endpoint.
//!
//! The deployed decoder sits behind a network call: the client posts the
//! envelope as hex and receives the payload key as hex. This module defines
//! those JSON bodies, a server-side handler, and a client that implements
//! [`EnvelopeDecoder`] over any [`DecryptTransport`]. Moving bytes (HTTP,
//! IPC, in-memory) is the transport's job; it must not alter them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::{Envelope, EnvelopeDecoder};
use crate::error::VaultkeyError;
use crate::keys::UnwrappedKey;

/// Body sent to the decrypt endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptRequest {
    /// Envelope bytes, hex encoded.
    pub envelope: String,
}

impl DecryptRequest {
    pub fn new(envelope: &Envelope) -> Self {
        Self {
            envelope: envelope.to_hex(),
        }
    }
}

/// Body returned by the decrypt endpoint.
#[derive(Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Recovered payload key, hex encoded.
    pub key: String,
}

impl std::fmt::Debug for DecryptResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptResponse").field("key", &"[REDACTED]").finish()
    }
}

/// Carries a request to a decrypt endpoint and brings back its response.
pub trait DecryptTransport {
    fn send(&self, request: &DecryptRequest) -> Result<DecryptResponse, VaultkeyError>;
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Handles decrypt requests with an in-process decoder.
#[derive(Debug)]
pub struct DecryptService<D> {
    decoder: D,
}

impl<D: EnvelopeDecoder> DecryptService<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn handle(&self, request: &DecryptRequest) -> Result<DecryptResponse, VaultkeyError> {
        let envelope = Envelope::from_hex(&request.envelope)?;
        let key = self.decoder.decode(envelope.as_bytes())?;
        Ok(DecryptResponse {
            key: hex::encode(key.as_bytes()),
        })
    }

    /// Handle a raw JSON body, as a route handler would.
    pub fn handle_json(&self, body: &str) -> Result<String, VaultkeyError> {
        let request: DecryptRequest = serde_json::from_str(body)?;
        let response = self.handle(&request)?;
        Ok(serde_json::to_string(&response)?)
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// An [`EnvelopeDecoder`] that asks a remote endpoint to do the work.
///
/// Failures reported by the transport surface as
/// [`VaultkeyError::Transport`] unless the transport already returned a more
/// specific kind.
#[derive(Debug)]
pub struct RemoteDecoder<T> {
    transport: T,
}

impl<T: DecryptTransport> RemoteDecoder<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: DecryptTransport> EnvelopeDecoder for RemoteDecoder<T> {
    fn decode(&self, envelope: &[u8]) -> Result<UnwrappedKey, VaultkeyError> {
        // Reject locally what the server would reject anyway.
        let envelope = Envelope::from_bytes(envelope.to_vec())?;
        let response = self.transport.send(&DecryptRequest::new(&envelope))?;
        let bytes = hex::decode(response.key.trim())
            .map_err(|e| VaultkeyError::Transport(format!("bad key encoding in response: {}", e)))?;
        debug!(key_len = bytes.len(), "remote decoder returned key");
        Ok(UnwrappedKey::new(bytes))
    }
}
