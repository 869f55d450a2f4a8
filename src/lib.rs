//! ConsultCore - offline-first data core for the consultation portal.
//!
//! This library provides the client-side data layer for the portal:
//! - Local store (SQLite) caching patients, appointments and consultations
//! - Offline mutation queue with local-ID remapping
//! - Sequential sync engine draining the queue against the portal API
//! - Audio chunk upload queue for recorded consultations
//! - Overlapping-window chunk extraction from live recordings
//!
//! This is a pure Rust library designed to be embedded by the portal's
//! native shells; it owns persistence and sync, not UI or capture.
//!
//! # Feature Flags
//!
//! - `desktop`: Include desktop-specific features (hostname detection, config dir detection).

pub mod backend;
pub mod backend_http;
pub mod chunking;
pub mod config;
pub mod error;
pub mod models;
pub mod network;
pub mod store;
pub mod sync_engine;
pub mod sync_queue;
pub mod uploader;

// Re-export commonly used types
pub use backend::{AudioUploadBackend, BackendError, MutationAck, MutationRequest, SyncBackend};
pub use backend_http::HttpBackend;
pub use chunking::{AudioChunk, FragmentBuffer};
pub use config::Config;
pub use error::{ConsultError, ConsultResult};
pub use models::{
    generate_local_id, is_local_id, AudioChunkEntry, CachedAppointment, CachedConsultation,
    CachedPatient, EntityKind, MutationKind, QueueStatus, SyncProgress, SyncQueueEntry,
};
pub use network::NetworkMonitor;
pub use store::{Collection, LocalStore};
pub use sync_engine::{SyncEngine, SyncEvent, SyncOutcome};
pub use sync_queue::{RetryPolicy, SyncQueue};
pub use uploader::{AudioUploadEvent, AudioUploader};
