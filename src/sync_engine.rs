//! Sync engine: drains the mutation queue against the network.
//!
//! The engine is the single authority moving queue entries to the server.
//! Entries are submitted sequentially in enqueue order (a later entry may
//! reference a server ID produced by an earlier create), failures are
//! recorded and retried on a later drain, and lifecycle events are emitted
//! for the status-bar UI.
//!
//! State machine: Idle -> Draining -> Idle. A second trigger while
//! draining is a no-op; there is exactly one in-flight drain per engine.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::backend::{BackendError, MutationRequest, SyncBackend};
use crate::error::{ConsultError, ConsultResult};
use crate::models::{
    is_local_id, EntityKind, MutationKind, SyncProgress, SyncQueueEntry,
};
use crate::network::NetworkMonitor;
use crate::store::LocalStore;
use crate::sync_queue::{find_local_refs, RetryPolicy, SyncQueue};

/// Engine lifecycle state. Owned per instance; never a process global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
}

/// Events delivered synchronously to subscribers, at most once per
/// transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    QueueUpdated { count: usize },
    SyncStarted { total: usize },
    SyncProgress(SyncProgress),
    SyncCompleted,
    SyncFailed { failed: usize },
}

/// Handle returned by `subscribe`, used to unsubscribe.
pub type SubscriptionId = u64;

type Listener = Box<dyn Fn(&SyncEvent) + Send>;

struct Listeners {
    next_id: SubscriptionId,
    entries: Vec<(SubscriptionId, Listener)>,
}

/// Aggregate result of one `trigger_sync` call.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Whether a drain actually ran (false for offline/busy/empty no-ops)
    pub ran: bool,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SyncOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

/// Releases the draining flag even when a submit path errors out, so a
/// thrown error never leaves the engine stuck in Draining.
struct StateGuard<'a> {
    state: &'a Mutex<EngineState>,
    progress: &'a Mutex<Option<SyncProgress>>,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap() = EngineState::Idle;
        *self.progress.lock().unwrap() = None;
    }
}

/// The sync engine. One instance per store; independent instances (e.g. in
/// tests) share no state.
pub struct SyncEngine<B: SyncBackend> {
    store: Arc<Mutex<LocalStore>>,
    queue: SyncQueue,
    backend: B,
    network: Arc<NetworkMonitor>,
    policy: RetryPolicy,
    state: Mutex<EngineState>,
    listeners: Mutex<Listeners>,
    progress: Mutex<Option<SyncProgress>>,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    sync_error: Mutex<Option<String>>,
}

impl<B: SyncBackend> SyncEngine<B> {
    pub fn new(
        store: Arc<Mutex<LocalStore>>,
        backend: B,
        network: Arc<NetworkMonitor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue: SyncQueue::new(store.clone()),
            store,
            backend,
            network,
            policy,
            state: Mutex::new(EngineState::Idle),
            listeners: Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            }),
            progress: Mutex::new(None),
            last_sync_time: Mutex::new(None),
            sync_error: Mutex::new(None),
        }
    }

    /// The underlying mutation queue.
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Register a lifecycle event listener. Dispatch is synchronous.
    pub fn subscribe(&self, listener: impl Fn(&SyncEvent) + Send + 'static) -> SubscriptionId {
        let mut listeners = self.listeners.lock().unwrap();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.entries.retain(|(existing, _)| *existing != id);
    }

    fn emit(&self, event: &SyncEvent) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in &listeners.entries {
            listener(event);
        }
    }

    /// Enqueue a mutation through the engine so subscribers observe the
    /// queue growing.
    pub fn enqueue_mutation(
        &self,
        user_id: &str,
        operation: MutationKind,
        entity: EntityKind,
        payload: serde_json::Value,
        local_id: Option<String>,
    ) -> ConsultResult<SyncQueueEntry> {
        let entry = self
            .queue
            .enqueue(user_id, operation, entity, payload, local_id)?;
        let count = self.queue.pending_count(None)?;
        self.emit(&SyncEvent::QueueUpdated { count });
        Ok(entry)
    }

    /// Drain the queue. No-op when offline, already draining, or nothing
    /// is currently attemptable; otherwise returns once the pass completes.
    pub async fn trigger_sync(&self) -> ConsultResult<SyncOutcome> {
        if !self.network.is_online() {
            return Ok(SyncOutcome::skipped());
        }

        {
            let mut state = self.state.lock().unwrap();
            if *state == EngineState::Draining {
                return Ok(SyncOutcome::skipped());
            }
            *state = EngineState::Draining;
        }
        let _guard = StateGuard {
            state: &self.state,
            progress: &self.progress,
        };

        let mut attempted: HashSet<String> = HashSet::new();
        let now = Utc::now().timestamp_millis();
        let first_batch = attemptable(self.queue.list_pending(None)?, &attempted, now);
        if first_batch.is_empty() {
            return Ok(SyncOutcome::skipped());
        }

        let mut total = first_batch.len();
        let mut success = 0usize;
        let mut failed = 0usize;
        let mut errors: Vec<String> = Vec::new();
        let mut stopped_offline = false;

        self.emit(&SyncEvent::SyncStarted { total });
        tracing::info!(total, "Sync drain started");

        'drain: loop {
            // Re-read each pass: entries enqueued mid-drain join the tail.
            let now = Utc::now().timestamp_millis();
            let batch = attemptable(self.queue.list_pending(None)?, &attempted, now);
            if batch.is_empty() {
                break;
            }
            total = attempted.len() + batch.len();

            for entry in batch {
                if !self.network.is_online() {
                    tracing::warn!("Network lost mid-drain; stopping this pass");
                    stopped_offline = true;
                    break 'drain;
                }

                attempted.insert(entry.id.clone());
                match self.submit_entry(&entry).await {
                    Ok(()) => success += 1,
                    Err(err) => {
                        // One bad entry never aborts the whole drain.
                        failed += 1;
                        errors.push(err.to_string());
                        self.queue
                            .mark_failed(&entry.id, &err.to_string(), &self.policy)?;
                    }
                }

                let progress = SyncProgress {
                    current: attempted.len(),
                    total,
                    success,
                    failed,
                };
                *self.progress.lock().unwrap() = Some(progress);
                self.emit(&SyncEvent::SyncProgress(progress));
            }
        }

        let pending = self.queue.pending_count(None)?;
        self.emit(&SyncEvent::QueueUpdated { count: pending });

        if failed == 0 && !stopped_offline {
            *self.last_sync_time.lock().unwrap() = Some(Utc::now());
            *self.sync_error.lock().unwrap() = None;
            self.emit(&SyncEvent::SyncCompleted);
            tracing::info!(success, "Sync drain completed");
        } else {
            let message = if stopped_offline {
                "network lost during sync".to_string()
            } else {
                errors.join("; ")
            };
            *self.sync_error.lock().unwrap() = Some(message);
            self.emit(&SyncEvent::SyncFailed { failed });
            tracing::warn!(success, failed, stopped_offline, "Sync drain finished with failures");
        }

        Ok(SyncOutcome {
            ran: true,
            success,
            failed,
            errors,
        })
    }

    async fn submit_entry(&self, entry: &SyncQueueEntry) -> ConsultResult<()> {
        // Any local reference other than this entry's own create target
        // should have been remapped before we got here.
        let refs = find_local_refs(&entry.payload);
        let own_create = (entry.operation == MutationKind::Create)
            .then(|| entry.local_id.as_deref())
            .flatten();
        let dangling: Vec<&String> = refs
            .iter()
            .filter(|r| Some(r.as_str()) != own_create)
            .collect();
        if !dangling.is_empty() {
            return Err(ConsultError::remap(format!(
                "entry {} still references local IDs: {}",
                entry.id,
                dangling
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let request = MutationRequest {
            operation: entry.operation,
            entity: entry.entity,
            payload: entry.payload.clone(),
            user_id: entry.user_id.clone(),
            idempotency_key: entry.idempotency_key.clone(),
        };

        let ack = self.backend.submit(&request).await.map_err(|e| match e {
            BackendError::Network(msg) => ConsultError::Network(msg),
            BackendError::Rejected(msg) => ConsultError::ServerRejected(msg),
        })?;

        // Remap before the entry is removed and before any later entry is
        // submitted, so no dependent payload ever carries the local ID out.
        if entry.operation == MutationKind::Create {
            if let Some(local) = entry.local_id.as_deref().filter(|l| is_local_id(l)) {
                let server_id = ack.server_id.as_deref().ok_or_else(|| {
                    ConsultError::sync(format!("create ack for entry {} missing server id", entry.id))
                })?;
                self.queue.remap_local_id(local, server_id)?;
            }
        }

        self.queue.remove(&entry.id)?;
        tracing::debug!(
            entry_id = %entry.id,
            operation = entry.operation.as_str(),
            entity = entry.entity.as_str(),
            "Sync entry confirmed by server"
        );
        Ok(())
    }

    /// Re-trigger draining whenever connectivity returns. Runs until the
    /// network monitor is dropped.
    pub async fn watch_connectivity(&self) -> ConsultResult<()> {
        let mut rx = self.network.subscribe();
        let mut was_online = self.network.is_online();

        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            if online && !was_online {
                // The queue may have been drained by a manual trigger that
                // raced this reconnection event.
                if self.queue.pending_count(None)? > 0 {
                    self.trigger_sync().await?;
                }
            }
            was_online = online;
        }
        Ok(())
    }

    // UI read accessors

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    pub fn is_syncing(&self) -> bool {
        *self.state.lock().unwrap() == EngineState::Draining
    }

    pub fn pending_sync_count(&self) -> ConsultResult<usize> {
        self.queue.pending_count(None)
    }

    pub fn sync_progress(&self) -> Option<SyncProgress> {
        *self.progress.lock().unwrap()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_time.lock().unwrap()
    }

    pub fn sync_error(&self) -> Option<String> {
        self.sync_error.lock().unwrap().clone()
    }

    /// Logout path: wipe every local collection.
    pub fn clear_offline_data(&self) -> ConsultResult<()> {
        self.store.lock().unwrap().clear_all()?;
        *self.last_sync_time.lock().unwrap() = None;
        *self.sync_error.lock().unwrap() = None;
        self.emit(&SyncEvent::QueueUpdated { count: 0 });
        Ok(())
    }
}

fn attemptable(
    pending: Vec<SyncQueueEntry>,
    attempted: &HashSet<String>,
    now_millis: i64,
) -> Vec<SyncQueueEntry> {
    pending
        .into_iter()
        .filter(|e| !attempted.contains(&e.id) && e.is_due(now_millis))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MutationAck;
    use crate::store::Collection;
    use serde_json::json;
    use std::collections::HashMap;

    /// Scripted backend: records every submission, fails configured payload
    /// IDs, and acks creates with `srv-<n>` server IDs.
    #[derive(Default)]
    struct MockBackend {
        submissions: Mutex<Vec<MutationRequest>>,
        failures: Mutex<HashMap<String, BackendError>>,
        create_counter: Mutex<u32>,
        /// When set, the monitor is flipped offline after the next submit,
        /// simulating a connection dropping mid-drain.
        offline_after_submit: Mutex<Option<Arc<NetworkMonitor>>>,
    }

    impl MockBackend {
        fn fail(&self, payload_id: &str, error: BackendError) {
            self.failures
                .lock()
                .unwrap()
                .insert(payload_id.to_string(), error);
        }

        fn heal(&self, payload_id: &str) {
            self.failures.lock().unwrap().remove(payload_id);
        }

        fn submitted(&self) -> Vec<MutationRequest> {
            self.submissions.lock().unwrap().clone()
        }
    }

    impl SyncBackend for &MockBackend {
        async fn submit(&self, request: &MutationRequest) -> Result<MutationAck, BackendError> {
            // Suspension point so a concurrent trigger can observe Draining.
            tokio::task::yield_now().await;

            self.submissions.lock().unwrap().push(request.clone());
            if let Some(network) = self.offline_after_submit.lock().unwrap().take() {
                network.set_online(false);
            }
            let payload_id = request.payload["id"].as_str().unwrap_or("").to_string();
            if let Some(err) = self.failures.lock().unwrap().get(&payload_id) {
                return Err(err.clone());
            }

            let server_id = if request.operation == MutationKind::Create {
                let mut counter = self.create_counter.lock().unwrap();
                *counter += 1;
                Some(format!("srv-{}", counter))
            } else {
                None
            };
            Ok(MutationAck { server_id })
        }
    }

    fn engine<'a>(
        backend: &'a MockBackend,
        online: bool,
        policy: RetryPolicy,
    ) -> SyncEngine<&'a MockBackend> {
        let store = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let network = Arc::new(NetworkMonitor::new(online));
        SyncEngine::new(store, backend, network, policy)
    }

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            max_retries: 8,
            backoff_secs: 0,
        }
    }

    fn collect_events(engine: &SyncEngine<&MockBackend>) -> Arc<Mutex<Vec<SyncEvent>>> {
        let events: Arc<Mutex<Vec<SyncEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        engine.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[tokio::test]
    async fn test_drain_submits_in_order_and_empties_queue() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());

        for i in 0..3 {
            engine
                .enqueue_mutation(
                    "user-1",
                    MutationKind::Update,
                    EntityKind::Patient,
                    json!({"id": format!("p{}", i)}),
                    None,
                )
                .unwrap();
        }

        let outcome = engine.trigger_sync().await.unwrap();
        assert!(outcome.ran);
        assert_eq!(outcome.success, 3);
        assert_eq!(outcome.failed, 0);
        assert_eq!(engine.pending_sync_count().unwrap(), 0);

        let ids: Vec<String> = backend
            .submitted()
            .iter()
            .map(|r| r.payload["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["p0", "p1", "p2"]);
        assert!(engine.last_sync_time().is_some());
        assert!(engine.sync_error().is_none());
    }

    #[tokio::test]
    async fn test_offline_trigger_is_noop() {
        let backend = MockBackend::default();
        let engine = engine(&backend, false, no_backoff());
        let events = collect_events(&engine);

        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "p"}), None)
            .unwrap();
        let outcome = engine.trigger_sync().await.unwrap();

        assert!(!outcome.ran);
        assert_eq!(engine.pending_sync_count().unwrap(), 1);
        assert!(backend.submitted().is_empty());
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SyncEvent::SyncStarted { .. })));
    }

    #[tokio::test]
    async fn test_create_remaps_before_dependent_submission() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());
        let local_apt = crate::models::generate_local_id();

        engine
            .enqueue_mutation(
                "user-1",
                MutationKind::Create,
                EntityKind::Appointment,
                json!({"id": local_apt, "patient_id": "p1"}),
                Some(local_apt.clone()),
            )
            .unwrap();
        engine
            .enqueue_mutation(
                "user-1",
                MutationKind::Update,
                EntityKind::Consultation,
                json!({"id": "c1", "appointment_id": local_apt}),
                None,
            )
            .unwrap();

        let outcome = engine.trigger_sync().await.unwrap();
        assert_eq!(outcome.success, 2);

        let submitted = backend.submitted();
        assert_eq!(submitted.len(), 2);
        // The dependent update crossed the wire with the server ID.
        assert_eq!(submitted[1].payload["appointment_id"], "srv-1");
    }

    #[tokio::test]
    async fn test_failed_entry_retained_and_retried_next_drain() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());

        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "p1"}), None)
            .unwrap();
        backend.fail("p1", BackendError::Network("timeout".to_string()));

        let outcome = engine.trigger_sync().await.unwrap();
        assert_eq!(outcome.failed, 1);

        let pending = engine.queue().list_pending(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.as_deref().unwrap().contains("timeout"));
        let first_key = pending[0].idempotency_key.clone();
        assert!(engine.sync_error().is_some());

        backend.heal("p1");
        let outcome = engine.trigger_sync().await.unwrap();
        assert_eq!(outcome.success, 1);
        assert_eq!(engine.pending_sync_count().unwrap(), 0);

        // The retry reused the same idempotency key.
        let submitted = backend.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].idempotency_key, first_key);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_entries() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());

        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "bad"}), None)
            .unwrap();
        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "good"}), None)
            .unwrap();
        backend.fail("bad", BackendError::Rejected("invalid".to_string()));

        let outcome = engine.trigger_sync().await.unwrap();
        assert_eq!(outcome.success, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(backend.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_one_drain() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());
        let events = collect_events(&engine);

        for i in 0..4 {
            engine
                .enqueue_mutation(
                    "u",
                    MutationKind::Update,
                    EntityKind::Patient,
                    json!({"id": format!("p{}", i)}),
                    None,
                )
                .unwrap();
        }

        let (a, b) = tokio::join!(engine.trigger_sync(), engine.trigger_sync());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.ran ^ b.ran, "exactly one of the two calls must drain");

        let started = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SyncEvent::SyncStarted { .. }))
            .count();
        assert_eq!(started, 1);
        assert_eq!(backend.submitted().len(), 4);
        assert!(!engine.is_syncing());
    }

    #[tokio::test]
    async fn test_network_loss_mid_drain_stops_pass() {
        let backend = MockBackend::default();
        let store = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let network = Arc::new(NetworkMonitor::new(true));
        let engine = SyncEngine::new(store, &backend, network.clone(), no_backoff());
        let events = collect_events(&engine);

        for i in 0..3 {
            engine
                .enqueue_mutation(
                    "u",
                    MutationKind::Update,
                    EntityKind::Patient,
                    json!({"id": format!("p{}", i)}),
                    None,
                )
                .unwrap();
        }

        // The connection drops right after the first entry is confirmed.
        *backend.offline_after_submit.lock().unwrap() = Some(network.clone());
        let outcome = engine.trigger_sync().await.unwrap();

        assert!(outcome.ran);
        assert_eq!(outcome.success, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(backend.submitted().len(), 1);

        // The untouched tail stays pending, with no retries charged.
        let pending = engine.queue().list_pending(None).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.retry_count == 0));

        assert!(!engine.is_syncing());
        assert_eq!(
            engine.sync_error().as_deref(),
            Some("network lost during sync")
        );
        assert!(engine.last_sync_time().is_none());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SyncEvent::SyncFailed { failed: 0 })));
    }

    #[tokio::test]
    async fn test_unmapped_reference_is_remap_inconsistency() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());

        // An update referencing a local ID with no preceding create: the
        // remap-before-submit invariant cannot hold, so the entry fails
        // without touching the network.
        engine
            .enqueue_mutation(
                "u",
                MutationKind::Update,
                EntityKind::Consultation,
                json!({"id": "c1", "appointment_id": "local_1_deadbeef"}),
                None,
            )
            .unwrap();

        let outcome = engine.trigger_sync().await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert!(backend.submitted().is_empty());

        let pending = engine.queue().list_pending(None).unwrap();
        assert!(pending[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("local IDs"));
    }

    #[tokio::test]
    async fn test_rejected_entry_abandoned_at_cap() {
        let backend = MockBackend::default();
        let engine = engine(
            &backend,
            true,
            RetryPolicy {
                max_retries: 1,
                backoff_secs: 0,
            },
        );

        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "p1"}), None)
            .unwrap();
        backend.fail("p1", BackendError::Rejected("schema mismatch".to_string()));

        engine.trigger_sync().await.unwrap();

        assert_eq!(engine.pending_sync_count().unwrap(), 0);
        let abandoned = engine.queue().abandoned(None).unwrap();
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("schema mismatch"));

        // A further trigger has nothing attemptable.
        let outcome = engine.trigger_sync().await.unwrap();
        assert!(!outcome.ran);
    }

    #[tokio::test]
    async fn test_clear_offline_data_wipes_everything() {
        let backend = MockBackend::default();
        let engine = engine(&backend, true, no_backoff());

        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "p1"}), None)
            .unwrap();
        {
            let mut store = engine.store.lock().unwrap();
            store
                .put(Collection::Patients, &json!({"id": "p1", "first_name": "Ada"}))
                .unwrap();
            store
                .put(Collection::AudioChunks, &json!({"id": "c1", "appointment_id": "a1", "uploaded": false}))
                .unwrap();
        }

        engine.clear_offline_data().unwrap();

        assert_eq!(engine.pending_sync_count().unwrap(), 0);
        let store = engine.store.lock().unwrap();
        assert!(store.get_all(Collection::Patients).unwrap().is_empty());
        assert!(store.get_all(Collection::AudioChunks).unwrap().is_empty());
        assert!(store.get_all(Collection::SyncQueue).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconnection_triggers_drain() {
        let backend: &'static MockBackend = Box::leak(Box::new(MockBackend::default()));
        let store = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let network = Arc::new(NetworkMonitor::new(false));
        let engine = Arc::new(SyncEngine::new(store, backend, network.clone(), no_backoff()));

        engine
            .enqueue_mutation("u", MutationKind::Update, EntityKind::Patient, json!({"id": "p1"}), None)
            .unwrap();

        let watcher = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.watch_connectivity().await })
        };

        network.set_online(true);
        for _ in 0..100 {
            if engine.pending_sync_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(engine.pending_sync_count().unwrap(), 0);
        assert_eq!(backend.submitted().len(), 1);
        watcher.abort();
    }
}
