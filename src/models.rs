//! Data models for the consultation data core.
//!
//! This module defines the cached entity snapshots (patient, appointment,
//! consultation), the sync queue entry, the audio chunk record, and the
//! local-ID scheme for entities created while offline.
//!
//! Cached entities are denormalized server snapshots: every non-key field
//! is optional so a partial server response never fails to round-trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix distinguishing client-generated placeholder IDs from server IDs.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Generate a local ID of the form `local_<millis>_<suffix>`.
///
/// Any entity keyed by a local ID has not yet been created on the server.
/// Once the corresponding create mutation succeeds, every reference to the
/// local ID is rewritten to the server's ID (see `SyncQueue::remap_local_id`).
pub fn generate_local_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = &Uuid::now_v7().simple().to_string()[..8];
    format!("{}{}_{}", LOCAL_ID_PREFIX, millis, suffix)
}

/// Check whether an ID is a client-generated local ID.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Cached snapshot of a patient record.
///
/// Written on every successful fetch or optimistic local write; deleted on
/// explicit removal or full cache wipe (logout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPatient {
    /// Server ID, or a local ID when created offline and not yet synced
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Cached snapshot of an appointment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAppointment {
    pub id: String,
    pub patient_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Calendar date ("YYYY-MM-DD"), indexed for day-view lookups
    pub scheduled_date: Option<String>,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Cached snapshot of a consultation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedConsultation {
    pub id: String,
    pub appointment_id: Option<String>,
    pub notes: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// The kind of mutation a queue entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

/// The entity a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Appointment,
    Consultation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Patient => "patient",
            EntityKind::Appointment => "appointment",
            EntityKind::Consultation => "consultation",
        }
    }
}

/// Queue entry lifecycle status.
///
/// `Abandoned` is terminal: the entry exhausted its retry budget and is
/// excluded from drains, kept only for UI surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Abandoned,
}

/// One pending mutation awaiting submission to the server.
///
/// Entries for the same user are processed in `(created_at, seq)` order.
/// An entry is removed only after the server confirms success; the
/// idempotency key makes the retried submission safe to deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Entry ID (UUID7 hex)
    pub id: String,
    pub user_id: String,
    pub operation: MutationKind,
    pub entity: EntityKind,
    pub payload: serde_json::Value,
    /// Set on create entries for entities keyed by a local ID
    pub local_id: Option<String>,
    /// Unix milliseconds at enqueue time
    pub created_at: i64,
    /// Monotonic tie-breaker for same-millisecond enqueues
    pub seq: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub status: QueueStatus,
    /// Unix milliseconds before which the entry is not retried
    pub next_retry_at: Option<i64>,
    /// Client-generated key the backend deduplicates retried submissions on
    pub idempotency_key: String,
}

impl SyncQueueEntry {
    /// Create a fresh pending entry.
    pub fn new(
        user_id: impl Into<String>,
        operation: MutationKind,
        entity: EntityKind,
        payload: serde_json::Value,
        local_id: Option<String>,
        seq: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            user_id: user_id.into(),
            operation,
            entity,
            payload,
            local_id,
            created_at: Utc::now().timestamp_millis(),
            seq,
            retry_count: 0,
            last_error: None,
            status: QueueStatus::Pending,
            next_retry_at: None,
            idempotency_key: Uuid::now_v7().simple().to_string(),
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.status == QueueStatus::Abandoned
    }

    /// Whether the entry may be attempted at the given time (unix millis).
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.status == QueueStatus::Pending
            && self.next_retry_at.map_or(true, |at| at <= now_millis)
    }
}

/// Metadata for one captured audio chunk awaiting upload.
///
/// The binary payload lives in the store's blob column, not in this record.
/// `uploaded` is the only mutable field; chunks are deleted in bulk once the
/// owning consultation is finalized and saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunkEntry {
    /// Record ID (UUID7 hex)
    pub id: String,
    pub appointment_id: String,
    pub chunk_index: u32,
    /// Unix milliseconds at capture time
    pub timestamp: i64,
    pub transcription_language: Option<String>,
    pub uploaded: bool,
}

impl AudioChunkEntry {
    pub fn new(
        appointment_id: impl Into<String>,
        chunk_index: u32,
        transcription_language: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().simple().to_string(),
            appointment_id: appointment_id.into(),
            chunk_index,
            timestamp: Utc::now().timestamp_millis(),
            transcription_language,
            uploaded: false,
        }
    }
}

/// Ephemeral progress of an in-flight drain; discarded on completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}
