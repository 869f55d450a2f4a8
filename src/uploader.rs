//! Upload queue for captured audio chunks.
//!
//! Kept separate from the generic mutation queue because payloads are
//! large binary blobs uploaded over their own channel. Chunks are grouped
//! by appointment and uploaded in chunk-index order within a group, so the
//! server can reconstruct the stream; a failed chunk stays queued with
//! `uploaded = false` and is retried on the next drain. Chunks are only
//! ever deleted in bulk once the owning consultation has been finalized
//! and saved, so a crash mid-save can never lose unsent audio.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::backend::AudioUploadBackend;
use crate::error::{ConsultError, ConsultResult};
use crate::models::AudioChunkEntry;
use crate::network::NetworkMonitor;
use crate::store::{Collection, LocalStore};

/// Lifecycle events mirroring the sync engine's shape, so the UI can
/// render one unified status bar.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioUploadEvent {
    Started { total: usize },
    Progress { current: usize, total: usize, success: usize, failed: usize },
    Completed,
    Failed { failed: usize },
}

pub type SubscriptionId = u64;

type Listener = Box<dyn Fn(&AudioUploadEvent) + Send>;

struct Listeners {
    next_id: SubscriptionId,
    entries: Vec<(SubscriptionId, Listener)>,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Queue of captured audio chunks awaiting upload.
pub struct AudioUploader<B: AudioUploadBackend> {
    store: Arc<Mutex<LocalStore>>,
    backend: B,
    network: Arc<NetworkMonitor>,
    listeners: Mutex<Listeners>,
}

impl<B: AudioUploadBackend> AudioUploader<B> {
    pub fn new(store: Arc<Mutex<LocalStore>>, backend: B, network: Arc<NetworkMonitor>) -> Self {
        Self {
            store,
            backend,
            network,
            listeners: Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&AudioUploadEvent) + Send + 'static,
    ) -> SubscriptionId {
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

    fn emit(&self, event: &AudioUploadEvent) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in &listeners.entries {
            listener(event);
        }
    }

    /// Persist a captured chunk for later upload.
    pub fn enqueue(
        &self,
        appointment_id: &str,
        chunk_index: u32,
        bytes: &[u8],
        language: Option<String>,
    ) -> ConsultResult<AudioChunkEntry> {
        let entry = AudioChunkEntry::new(appointment_id, chunk_index, language);
        let mut store = self.store.lock().unwrap();
        store.put_with_blob(
            Collection::AudioChunks,
            &serde_json::to_value(&entry)?,
            bytes,
        )?;
        tracing::debug!(
            appointment_id,
            chunk_index,
            size_bytes = bytes.len(),
            "Queued audio chunk for upload"
        );
        Ok(entry)
    }

    /// Number of chunks not yet uploaded.
    pub fn pending_count(&self) -> ConsultResult<usize> {
        Ok(self.pending_by_appointment()?.values().map(Vec::len).sum())
    }

    /// Unuploaded chunks grouped by appointment, chunk-index order within
    /// each group.
    fn pending_by_appointment(&self) -> ConsultResult<BTreeMap<String, Vec<AudioChunkEntry>>> {
        let store = self.store.lock().unwrap();
        let raw = store.get_by_index(Collection::AudioChunks, "uploaded", "false")?;
        drop(store);

        let mut groups: BTreeMap<String, Vec<AudioChunkEntry>> = BTreeMap::new();
        for value in raw {
            let entry: AudioChunkEntry = serde_json::from_value(value)?;
            groups.entry(entry.appointment_id.clone()).or_default().push(entry);
        }
        for chunks in groups.values_mut() {
            chunks.sort_by_key(|c| c.chunk_index);
        }
        Ok(groups)
    }

    /// Attempt to upload every pending chunk. Failures leave the chunk
    /// queued and move on to the next; network loss stops the pass.
    pub async fn drain(&self) -> ConsultResult<UploadSummary> {
        let groups = self.pending_by_appointment()?;
        let total: usize = groups.values().map(Vec::len).sum();
        if total == 0 {
            return Ok(UploadSummary::default());
        }

        self.emit(&AudioUploadEvent::Started { total });
        tracing::info!(total, "Audio upload drain started");

        let mut summary = UploadSummary::default();
        let mut current = 0usize;
        let mut stopped_offline = false;

        'drain: for (appointment_id, chunks) in groups {
            for entry in chunks {
                if !self.network.is_online() {
                    tracing::warn!("Network lost during audio upload; stopping this pass");
                    stopped_offline = true;
                    break 'drain;
                }
                current += 1;

                let blob = {
                    let store = self.store.lock().unwrap();
                    store.get_blob(Collection::AudioChunks, &entry.id)?
                };
                let blob = match blob {
                    Some(bytes) => bytes,
                    None => {
                        summary.failed += 1;
                        summary.errors.push(
                            ConsultError::NotFound(format!(
                                "audio payload for chunk {}",
                                entry.id
                            ))
                            .to_string(),
                        );
                        continue;
                    }
                };

                match self
                    .backend
                    .upload_chunk(
                        &appointment_id,
                        entry.chunk_index,
                        &blob,
                        entry.transcription_language.as_deref(),
                        entry.timestamp,
                    )
                    .await
                {
                    Ok(()) => {
                        let mut uploaded = entry.clone();
                        uploaded.uploaded = true;
                        self.store
                            .lock()
                            .unwrap()
                            .put(Collection::AudioChunks, &serde_json::to_value(&uploaded)?)?;
                        summary.uploaded += 1;
                        tracing::debug!(
                            appointment_id = %appointment_id,
                            chunk_index = entry.chunk_index,
                            "Uploaded audio chunk"
                        );
                    }
                    Err(e) => {
                        summary.failed += 1;
                        summary.errors.push(format!(
                            "chunk {} of {}: {}",
                            entry.chunk_index, appointment_id, e
                        ));
                        tracing::warn!(
                            appointment_id = %appointment_id,
                            chunk_index = entry.chunk_index,
                            error = %e,
                            "Audio chunk upload failed; will retry"
                        );
                    }
                }

                self.emit(&AudioUploadEvent::Progress {
                    current,
                    total,
                    success: summary.uploaded,
                    failed: summary.failed,
                });
            }
        }

        if summary.failed == 0 && !stopped_offline {
            self.emit(&AudioUploadEvent::Completed);
            tracing::info!(uploaded = summary.uploaded, "Audio upload drain completed");
        } else {
            self.emit(&AudioUploadEvent::Failed {
                failed: summary.failed,
            });
        }
        Ok(summary)
    }

    /// Delete every chunk for a finalized appointment. This is the only
    /// deletion path; chunks are never discarded before a successful save.
    pub fn clear(&self, appointment_id: &str) -> ConsultResult<usize> {
        let mut store = self.store.lock().unwrap();
        let chunks = store.get_by_index(Collection::AudioChunks, "appointment_id", appointment_id)?;
        let mut removed = 0usize;
        for value in &chunks {
            if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                if store.delete(Collection::AudioChunks, id)? {
                    removed += 1;
                }
            }
        }
        tracing::info!(appointment_id, removed, "Cleared audio chunks for finalized appointment");
        Ok(removed)
    }
}
