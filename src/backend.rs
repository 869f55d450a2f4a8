//! Network boundary for the consultation data core.
//!
//! The relational backend, the authentication provider, and the
//! transcription service are external collaborators. This module defines
//! the narrow traits the sync engine and audio uploader drive, plus the
//! wire types that cross the boundary. Implementations live elsewhere
//! (`backend_http` for the portal's REST API, scripted mocks in tests).

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{EntityKind, MutationKind};

/// Errors crossing the network boundary.
///
/// `Network` is transient (retried on the next drain); `Rejected` means the
/// server refused the mutation itself and counts toward the retry cap.
#[derive(Debug, Clone)]
pub enum BackendError {
    Network(String),
    Rejected(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Network(msg) => write!(f, "Network error: {}", msg),
            BackendError::Rejected(msg) => write!(f, "Server rejected: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// One mutation submitted to the server.
#[derive(Debug, Clone, Serialize)]
pub struct MutationRequest {
    pub operation: MutationKind,
    pub entity: EntityKind,
    pub payload: Value,
    pub user_id: String,
    /// Client-generated key; the server deduplicates retried submissions
    /// on it, so a lost response never double-applies a create.
    pub idempotency_key: String,
}

/// Server acknowledgement of a mutation.
#[derive(Debug, Clone, Deserialize)]
pub struct MutationAck {
    /// Server-assigned ID; always present for creates
    pub server_id: Option<String>,
}

/// Submission endpoint for queued JSON mutations.
pub trait SyncBackend: Send + Sync {
    /// Submit one mutation. Resolves with the acknowledgement or a
    /// transient/permanent error.
    fn submit(
        &self,
        request: &MutationRequest,
    ) -> impl Future<Output = Result<MutationAck, BackendError>> + Send;
}

/// Upload endpoint for captured audio chunks.
///
/// Separate from `SyncBackend` because payloads are large binary blobs
/// with their own channel and retry cadence.
pub trait AudioUploadBackend: Send + Sync {
    /// Upload one self-contained audio chunk.
    fn upload_chunk(
        &self,
        appointment_id: &str,
        chunk_index: u32,
        bytes: &[u8],
        language: Option<&str>,
        timestamp: i64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
