//! Pending-mutation queue for offline writes.
//!
//! Every write performed while the client cannot reach the server is
//! captured here, in enqueue order, and drained later by the sync engine.
//! The queue also owns local-ID bookkeeping: entities created offline are
//! keyed by a `local_*` placeholder, and once the server assigns a real ID
//! the queue rewrites every still-pending reference to it.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::error::{ConsultError, ConsultResult};
use crate::models::{is_local_id, EntityKind, MutationKind, QueueStatus, SyncQueueEntry};
use crate::store::{Collection, LocalStore};

/// Metadata key holding the monotonic enqueue counter.
const SEQ_METADATA_KEY: &str = "sync_queue_seq";

/// Backoff never exceeds one hour between attempts.
const MAX_BACKOFF_SECS: u64 = 3600;

/// Bounded-retry policy applied when an entry fails.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before an entry becomes `Abandoned`
    pub max_retries: u32,
    /// Base for exponential backoff between attempts
    pub backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            backoff_secs: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given (post-increment) retry count.
    fn backoff_millis(&self, retry_count: u32) -> i64 {
        let exp = retry_count.saturating_sub(1).min(20);
        let secs = self
            .backoff_secs
            .saturating_mul(1u64 << exp)
            .min(MAX_BACKOFF_SECS);
        (secs * 1000) as i64
    }
}

/// Ordered log of pending mutations, built on the local store.
pub struct SyncQueue {
    store: Arc<Mutex<LocalStore>>,
}

impl SyncQueue {
    pub fn new(store: Arc<Mutex<LocalStore>>) -> Self {
        Self { store }
    }

    /// Append a mutation to the queue.
    ///
    /// Assigns `created_at = now`, a monotonic sequence number, a zero retry
    /// count, and a fresh idempotency key.
    pub fn enqueue(
        &self,
        user_id: &str,
        operation: MutationKind,
        entity: EntityKind,
        payload: Value,
        local_id: Option<String>,
    ) -> ConsultResult<SyncQueueEntry> {
        let mut store = self.store.lock().unwrap();
        let seq = next_seq(&mut store)?;
        let entry = SyncQueueEntry::new(user_id, operation, entity, payload, local_id, seq);

        store.put(Collection::SyncQueue, &serde_json::to_value(&entry)?)?;
        tracing::debug!(
            entry_id = %entry.id,
            operation = operation.as_str(),
            entity = entity.as_str(),
            seq,
            "Enqueued sync mutation"
        );
        Ok(entry)
    }

    /// Pending entries in `(created_at, seq)` order, excluding abandoned
    /// ones. `user_id = None` lists every user's entries.
    pub fn list_pending(&self, user_id: Option<&str>) -> ConsultResult<Vec<SyncQueueEntry>> {
        let store = self.store.lock().unwrap();
        let raw = match user_id {
            Some(uid) => store.get_by_index(Collection::SyncQueue, "user_id", uid)?,
            None => store.get_all(Collection::SyncQueue)?,
        };
        drop(store);

        let mut entries = parse_entries(raw)?;
        entries.retain(|e| e.status == QueueStatus::Pending);
        entries.sort_by_key(|e| (e.created_at, e.seq));
        Ok(entries)
    }

    /// Entries that exhausted their retry budget, for UI surfacing.
    pub fn abandoned(&self, user_id: Option<&str>) -> ConsultResult<Vec<SyncQueueEntry>> {
        let store = self.store.lock().unwrap();
        let raw = match user_id {
            Some(uid) => store.get_by_index(Collection::SyncQueue, "user_id", uid)?,
            None => store.get_all(Collection::SyncQueue)?,
        };
        drop(store);

        let mut entries = parse_entries(raw)?;
        entries.retain(|e| e.status == QueueStatus::Abandoned);
        entries.sort_by_key(|e| (e.created_at, e.seq));
        Ok(entries)
    }

    /// Number of pending entries.
    pub fn pending_count(&self, user_id: Option<&str>) -> ConsultResult<usize> {
        Ok(self.list_pending(user_id)?.len())
    }

    /// Look up one entry by ID.
    pub fn get(&self, entry_id: &str) -> ConsultResult<Option<SyncQueueEntry>> {
        let store = self.store.lock().unwrap();
        match store.get(Collection::SyncQueue, entry_id)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Remove an entry. Called only after the server confirms success.
    pub fn remove(&self, entry_id: &str) -> ConsultResult<bool> {
        let mut store = self.store.lock().unwrap();
        store.delete(Collection::SyncQueue, entry_id)
    }

    /// Record a failed attempt: increments `retry_count`, stores the error,
    /// schedules the next attempt with exponential backoff, and flips the
    /// entry to `Abandoned` once the retry cap is reached.
    pub fn mark_failed(
        &self,
        entry_id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> ConsultResult<SyncQueueEntry> {
        let mut entry = self
            .get(entry_id)?
            .ok_or_else(|| ConsultError::NotFound(format!("sync queue entry {}", entry_id)))?;

        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());

        if entry.retry_count >= policy.max_retries {
            entry.status = QueueStatus::Abandoned;
            entry.next_retry_at = None;
            tracing::warn!(
                entry_id,
                retry_count = entry.retry_count,
                error,
                "Sync entry abandoned after exhausting retries"
            );
        } else {
            entry.next_retry_at =
                Some(Utc::now().timestamp_millis() + policy.backoff_millis(entry.retry_count));
            tracing::debug!(
                entry_id,
                retry_count = entry.retry_count,
                error,
                "Sync entry failed; will retry"
            );
        }

        let mut store = self.store.lock().unwrap();
        store.put(Collection::SyncQueue, &serde_json::to_value(&entry)?)?;
        Ok(entry)
    }

    /// Rewrite every reference to a local ID with the server-assigned ID.
    ///
    /// Covers the payload (and `local_id` field) of every still-queued
    /// entry, plus the cached entity's own primary key in the store. Must
    /// run inside the success handler of the create that produced the ID,
    /// before the next entry is submitted. Returns the number of queue
    /// entries rewritten.
    pub fn remap_local_id(&self, old_local: &str, server_id: &str) -> ConsultResult<usize> {
        if !is_local_id(old_local) {
            return Err(ConsultError::Other(format!(
                "Not a local ID: {}",
                old_local
            )));
        }

        let mut store = self.store.lock().unwrap();
        let raw = store.get_all(Collection::SyncQueue)?;
        let mut rewritten = 0usize;

        for value in raw {
            let mut entry: SyncQueueEntry = serde_json::from_value(value)?;
            let mut changed = rewrite_refs(&mut entry.payload, old_local, server_id) > 0;
            if entry.local_id.as_deref() == Some(old_local) {
                entry.local_id = Some(server_id.to_string());
                changed = true;
            }
            if changed {
                store.put(Collection::SyncQueue, &serde_json::to_value(&entry)?)?;
                rewritten += 1;
            }
        }

        // The cached entity itself is keyed by the local ID in exactly one
        // of the entity collections.
        for collection in [
            Collection::Patients,
            Collection::Appointments,
            Collection::Consultations,
        ] {
            if store.rename_key(collection, old_local, server_id)? {
                break;
            }
        }

        tracing::info!(
            old_local,
            server_id,
            rewritten,
            "Remapped local ID to server ID"
        );
        Ok(rewritten)
    }
}

fn parse_entries(raw: Vec<Value>) -> ConsultResult<Vec<SyncQueueEntry>> {
    raw.into_iter()
        .map(|v| serde_json::from_value(v).map_err(ConsultError::from))
        .collect()
}

/// Allocate the next enqueue sequence number, persisted in metadata so
/// ordering survives restarts.
fn next_seq(store: &mut LocalStore) -> ConsultResult<i64> {
    let current = store
        .get(Collection::Metadata, SEQ_METADATA_KEY)?
        .and_then(|v| v.get("value").and_then(Value::as_i64))
        .unwrap_or(0);
    let next = current + 1;
    store.put(
        Collection::Metadata,
        &serde_json::json!({ "key": SEQ_METADATA_KEY, "value": next }),
    )?;
    Ok(next)
}

/// Replace every string equal to `old` inside a JSON value. Returns the
/// number of replacements.
fn rewrite_refs(value: &mut Value, old: &str, new: &str) -> usize {
    match value {
        Value::String(s) if s == old => {
            *s = new.to_string();
            1
        }
        Value::Array(items) => items.iter_mut().map(|v| rewrite_refs(v, old, new)).sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|v| rewrite_refs(v, old, new))
            .sum(),
        _ => 0,
    }
}

/// Collect every local-ID string appearing in a JSON value. Used by the
/// engine to detect entries about to be submitted with dangling references.
pub fn find_local_refs(value: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) if is_local_id(s) => {
                if !out.iter().any(|existing| existing == s) {
                    out.push(s.clone());
                }
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut refs = Vec::new();
    walk(value, &mut refs);
    refs
}
