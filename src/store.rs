//! Durable local store for the consultation data core.
//!
//! This module provides the persistent, collection-oriented key-value layer
//! using SQLite. Entities are JSON documents partitioned into named
//! collections, each with a primary-key path and zero or more non-unique
//! secondary indexes. Binary audio payloads are kept in a dedicated blob
//! column rather than inside the JSON.
//!
//! The store guarantees per-call atomicity (every write runs in its own
//! transaction) but no cross-call transactions.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{ConsultError, ConsultResult};

/// Schema version recorded in the metadata collection.
const SCHEMA_VERSION: i64 = 1;

/// A named partition of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Patients,
    Appointments,
    Consultations,
    SyncQueue,
    AudioChunks,
    Metadata,
}

impl Collection {
    /// All collections, in wipe order.
    pub const ALL: &'static [Collection] = &[
        Collection::Patients,
        Collection::Appointments,
        Collection::Consultations,
        Collection::SyncQueue,
        Collection::AudioChunks,
        Collection::Metadata,
    ];

    pub fn name(&self) -> &'static str {
        self.spec().name
    }

    pub fn spec(&self) -> &'static CollectionSpec {
        // Registry and enum are kept in the same order.
        &COLLECTION_REGISTRY[*self as usize]
    }
}

/// Describes one collection: its name, primary-key path, and indexes.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub collection: Collection,
    pub name: &'static str,
    /// JSON field holding the primary key
    pub key_path: &'static str,
    /// JSON fields with secondary (non-unique, multi-valued) indexes
    pub indexes: &'static [&'static str],
}

/// Registry of all collections and their index layout.
/// When adding a collection, add it here and to `Collection::ALL`.
pub static COLLECTION_REGISTRY: &[CollectionSpec] = &[
    CollectionSpec {
        collection: Collection::Patients,
        name: "patients",
        key_path: "id",
        indexes: &[],
    },
    CollectionSpec {
        collection: Collection::Appointments,
        name: "appointments",
        key_path: "id",
        indexes: &["patient_id", "scheduled_date"],
    },
    CollectionSpec {
        collection: Collection::Consultations,
        name: "consultations",
        key_path: "id",
        indexes: &["appointment_id"],
    },
    CollectionSpec {
        collection: Collection::SyncQueue,
        name: "sync_queue",
        key_path: "id",
        indexes: &["user_id", "status"],
    },
    CollectionSpec {
        collection: Collection::AudioChunks,
        name: "audio_chunks",
        key_path: "id",
        indexes: &["appointment_id", "uploaded"],
    },
    CollectionSpec {
        collection: Collection::Metadata,
        name: "metadata",
        key_path: "key",
        indexes: &[],
    },
];

/// Extract the index values for a field. Arrays index each scalar element;
/// null and missing fields produce no index rows.
fn index_values(entity: &Value, field: &str) -> Vec<String> {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    match entity.get(field) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar).collect(),
        Some(value) => scalar(value).into_iter().collect(),
        None => Vec::new(),
    }
}

fn primary_key(spec: &CollectionSpec, entity: &Value) -> ConsultResult<String> {
    entity
        .get(spec.key_path)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| {
            ConsultError::Other(format!(
                "Entity for collection '{}' missing string primary key '{}'",
                spec.name, spec.key_path
            ))
        })
}

/// SQLite-backed local store.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    ///
    /// Idempotent: schema initialization is `IF NOT EXISTS` and safe to run
    /// on every open. Fails with `StorageUnavailable` when the platform
    /// denies persistent storage.
    pub fn open<P: AsRef<Path>>(path: P) -> ConsultResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ConsultError::StorageUnavailable(e.to_string()))?;

        // WAL for better concurrent access from UI and sync paths
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| ConsultError::StorageUnavailable(e.to_string()))?;

        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing and the documented fallback
    /// when persistent storage is unavailable).
    pub fn open_in_memory() -> ConsultResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&mut self) -> ConsultResult<()> {
        self.conn.execute_batch(
            r#"
            -- One row per entity. JSON document in data, binary payloads
            -- (audio chunks) in blob.
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                blob BLOB,
                PRIMARY KEY (collection, id)
            );

            -- Secondary index rows, maintained on every put/delete.
            CREATE TABLE IF NOT EXISTS record_index (
                collection TEXT NOT NULL,
                idx TEXT NOT NULL,
                value TEXT NOT NULL,
                id TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_record_index_lookup
                ON record_index(collection, idx, value);
            CREATE INDEX IF NOT EXISTS idx_record_index_id
                ON record_index(collection, id);
            "#,
        )?;

        self.write_schema_version()?;
        Ok(())
    }

    fn write_schema_version(&mut self) -> ConsultResult<()> {
        let existing = self.get(Collection::Metadata, "schema_version")?;
        if existing.is_none() {
            self.put(
                Collection::Metadata,
                &serde_json::json!({ "key": "schema_version", "value": SCHEMA_VERSION }),
            )?;
        }
        Ok(())
    }

    /// Get one entity by primary key.
    pub fn get(&self, collection: Collection, key: &str) -> ConsultResult<Option<Value>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ? AND id = ?",
                params![collection.name(), key],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Get every entity in a collection.
    pub fn get_all(&self, collection: Collection) -> ConsultResult<Vec<Value>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM records WHERE collection = ? ORDER BY id")?;
        let rows = stmt.query_map(params![collection.name()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(serde_json::from_str(&row?)?);
        }
        Ok(entities)
    }

    /// Get entities by secondary index value. Unordered; callers sort when
    /// order matters.
    pub fn get_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &str,
    ) -> ConsultResult<Vec<Value>> {
        let spec = collection.spec();
        if !spec.indexes.contains(&index) {
            return Err(ConsultError::Other(format!(
                "Collection '{}' has no index '{}'",
                spec.name, index
            )));
        }

        let mut stmt = self.conn.prepare(
            "SELECT r.data FROM records r
             JOIN record_index i ON i.collection = r.collection AND i.id = r.id
             WHERE i.collection = ? AND i.idx = ? AND i.value = ?",
        )?;
        let rows = stmt.query_map(params![spec.name, index, value], |row| {
            row.get::<_, String>(0)
        })?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(serde_json::from_str(&row?)?);
        }
        Ok(entities)
    }

    /// Number of entities in a collection.
    pub fn count(&self, collection: Collection) -> ConsultResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?",
            params![collection.name()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Upsert one entity by primary key. Returns the key.
    pub fn put(&mut self, collection: Collection, entity: &Value) -> ConsultResult<String> {
        let tx = self.conn.transaction()?;
        let key = put_in_tx(&tx, collection.spec(), entity, None)?;
        tx.commit()?;
        Ok(key)
    }

    /// Upsert many entities in one transaction.
    pub fn put_many(&mut self, collection: Collection, entities: &[Value]) -> ConsultResult<()> {
        let tx = self.conn.transaction()?;
        for entity in entities {
            put_in_tx(&tx, collection.spec(), entity, None)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert an entity together with its binary payload.
    pub fn put_with_blob(
        &mut self,
        collection: Collection,
        entity: &Value,
        blob: &[u8],
    ) -> ConsultResult<String> {
        let tx = self.conn.transaction()?;
        let key = put_in_tx(&tx, collection.spec(), entity, Some(blob))?;
        tx.commit()?;
        Ok(key)
    }

    /// Get the binary payload stored alongside an entity.
    pub fn get_blob(&self, collection: Collection, key: &str) -> ConsultResult<Option<Vec<u8>>> {
        let blob: Option<Option<Vec<u8>>> = self
            .conn
            .query_row(
                "SELECT blob FROM records WHERE collection = ? AND id = ?",
                params![collection.name(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.flatten())
    }

    /// Delete one entity by primary key. Returns whether it existed.
    pub fn delete(&mut self, collection: Collection, key: &str) -> ConsultResult<bool> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ? AND id = ?",
            params![collection.name(), key],
        )?;
        let deleted = tx.execute(
            "DELETE FROM records WHERE collection = ? AND id = ?",
            params![collection.name(), key],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Delete every entity in a collection. Returns the number removed.
    pub fn clear(&mut self, collection: Collection) -> ConsultResult<usize> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?",
            params![collection.name()],
        )?;
        let removed = tx.execute(
            "DELETE FROM records WHERE collection = ?",
            params![collection.name()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    /// Wipe every collection. Used on logout.
    pub fn clear_all(&mut self) -> ConsultResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM record_index", [])?;
        tx.execute("DELETE FROM records", [])?;
        tx.commit()?;

        tracing::info!("Cleared all offline collections");
        self.write_schema_version()?;
        Ok(())
    }

    /// Rewrite an entity's primary key, keeping its payload, blob, and index
    /// rows consistent. Used when a local ID is remapped to a server ID.
    /// Returns false when no record exists under the old key.
    pub fn rename_key(
        &mut self,
        collection: Collection,
        old_key: &str,
        new_key: &str,
    ) -> ConsultResult<bool> {
        let spec = collection.spec();
        let tx = self.conn.transaction()?;

        let row: Option<(String, Option<Vec<u8>>)> = tx
            .query_row(
                "SELECT data, blob FROM records WHERE collection = ? AND id = ?",
                params![spec.name, old_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (data, blob) = match row {
            Some(r) => r,
            None => return Ok(false),
        };

        let mut entity: Value = serde_json::from_str(&data)?;
        if let Some(obj) = entity.as_object_mut() {
            obj.insert(spec.key_path.to_string(), Value::String(new_key.to_string()));
        }

        tx.execute(
            "DELETE FROM record_index WHERE collection = ? AND id = ?",
            params![spec.name, old_key],
        )?;
        tx.execute(
            "DELETE FROM records WHERE collection = ? AND id = ?",
            params![spec.name, old_key],
        )?;
        put_in_tx(&tx, spec, &entity, blob.as_deref())?;
        tx.commit()?;

        tracing::debug!(
            collection = spec.name,
            old_key,
            new_key,
            "Renamed record primary key"
        );
        Ok(true)
    }
}

/// Insert or replace one record and rebuild its index rows.
fn put_in_tx(
    tx: &rusqlite::Transaction<'_>,
    spec: &CollectionSpec,
    entity: &Value,
    blob: Option<&[u8]>,
) -> ConsultResult<String> {
    let key = primary_key(spec, entity)?;
    let data = serde_json::to_string(entity)?;

    tx.execute(
        "INSERT INTO records (collection, id, data, blob) VALUES (?, ?, ?, ?)
         ON CONFLICT (collection, id) DO UPDATE SET
             data = excluded.data,
             blob = COALESCE(excluded.blob, records.blob)",
        params![spec.name, key, data, blob],
    )?;

    tx.execute(
        "DELETE FROM record_index WHERE collection = ? AND id = ?",
        params![spec.name, key],
    )?;
    for index in spec.indexes {
        for value in index_values(entity, index) {
            tx.execute(
                "INSERT INTO record_index (collection, idx, value, id) VALUES (?, ?, ?, ?)",
                params![spec.name, index, value, key],
            )?;
        }
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_registry_matches_enum_order() {
        for (i, spec) in COLLECTION_REGISTRY.iter().enumerate() {
            assert_eq!(spec.collection as usize, i);
            assert_eq!(Collection::ALL[i].name(), spec.name);
        }
    }

    #[test]
    fn test_put_and_get() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let patient = json!({"id": "p1", "first_name": "Ada", "last_name": "Lovelace"});

        store.put(Collection::Patients, &patient).unwrap();

        let loaded = store.get(Collection::Patients, "p1").unwrap().unwrap();
        assert_eq!(loaded["first_name"], "Ada");
        assert!(store.get(Collection::Patients, "p2").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put(Collection::Patients, &json!({"id": "p1", "email": "a@b.c"}))
            .unwrap();
        store
            .put(Collection::Patients, &json!({"id": "p1", "email": "x@y.z"}))
            .unwrap();

        assert_eq!(store.count(Collection::Patients).unwrap(), 1);
        let loaded = store.get(Collection::Patients, "p1").unwrap().unwrap();
        assert_eq!(loaded["email"], "x@y.z");
    }

    #[test]
    fn test_missing_primary_key_rejected() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let result = store.put(Collection::Patients, &json!({"first_name": "Ada"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_get_by_index() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put_many(
                Collection::Appointments,
                &[
                    json!({"id": "a1", "patient_id": "p1", "scheduled_date": "2026-01-10"}),
                    json!({"id": "a2", "patient_id": "p1", "scheduled_date": "2026-01-11"}),
                    json!({"id": "a3", "patient_id": "p2", "scheduled_date": "2026-01-10"}),
                ],
            )
            .unwrap();

        let for_p1 = store
            .get_by_index(Collection::Appointments, "patient_id", "p1")
            .unwrap();
        assert_eq!(for_p1.len(), 2);

        let on_day = store
            .get_by_index(Collection::Appointments, "scheduled_date", "2026-01-10")
            .unwrap();
        assert_eq!(on_day.len(), 2);
    }

    #[test]
    fn test_unknown_index_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let result = store.get_by_index(Collection::Patients, "no_such_index", "x");
        assert!(result.is_err());
    }

    #[test]
    fn test_index_updated_on_overwrite() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put(
                Collection::Appointments,
                &json!({"id": "a1", "patient_id": "p1"}),
            )
            .unwrap();
        store
            .put(
                Collection::Appointments,
                &json!({"id": "a1", "patient_id": "p9"}),
            )
            .unwrap();

        assert!(store
            .get_by_index(Collection::Appointments, "patient_id", "p1")
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .get_by_index(Collection::Appointments, "patient_id", "p9")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_bool_index_values() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put(
                Collection::AudioChunks,
                &json!({"id": "c1", "appointment_id": "a1", "uploaded": false}),
            )
            .unwrap();

        let pending = store
            .get_by_index(Collection::AudioChunks, "uploaded", "false")
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_delete_removes_index_rows() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put(
                Collection::Consultations,
                &json!({"id": "c1", "appointment_id": "a1"}),
            )
            .unwrap();

        assert!(store.delete(Collection::Consultations, "c1").unwrap());
        assert!(!store.delete(Collection::Consultations, "c1").unwrap());
        assert!(store
            .get_by_index(Collection::Consultations, "appointment_id", "a1")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_blob_roundtrip() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let chunk = json!({"id": "c1", "appointment_id": "a1", "uploaded": false});
        store
            .put_with_blob(Collection::AudioChunks, &chunk, &[1u8, 2, 3, 4])
            .unwrap();

        let blob = store.get_blob(Collection::AudioChunks, "c1").unwrap();
        assert_eq!(blob, Some(vec![1, 2, 3, 4]));
        assert!(store.get_blob(Collection::AudioChunks, "missing").unwrap().is_none());
    }

    #[test]
    fn test_blob_survives_metadata_update() {
        // Flipping the uploaded flag with a plain put must not drop the blob.
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put_with_blob(
                Collection::AudioChunks,
                &json!({"id": "c1", "appointment_id": "a1", "uploaded": false}),
                &[9u8, 9, 9],
            )
            .unwrap();
        store
            .put(
                Collection::AudioChunks,
                &json!({"id": "c1", "appointment_id": "a1", "uploaded": true}),
            )
            .unwrap();

        assert_eq!(
            store.get_blob(Collection::AudioChunks, "c1").unwrap(),
            Some(vec![9, 9, 9])
        );
    }

    #[test]
    fn test_clear_all_wipes_every_collection() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put(Collection::Patients, &json!({"id": "p1"}))
            .unwrap();
        store
            .put(Collection::Appointments, &json!({"id": "a1", "patient_id": "p1"}))
            .unwrap();
        store
            .put(Collection::SyncQueue, &json!({"id": "q1", "user_id": "u1", "status": "pending"}))
            .unwrap();

        store.clear_all().unwrap();

        for collection in Collection::ALL {
            if *collection == Collection::Metadata {
                continue; // holds only the fresh schema_version row
            }
            assert!(
                store.get_all(*collection).unwrap().is_empty(),
                "collection {} not empty after wipe",
                collection.name()
            );
        }
    }

    #[test]
    fn test_rename_key_rewrites_record_and_indexes() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .put(
                Collection::Appointments,
                &json!({"id": "local_1_abc", "patient_id": "p1"}),
            )
            .unwrap();

        let renamed = store
            .rename_key(Collection::Appointments, "local_1_abc", "srv-42")
            .unwrap();
        assert!(renamed);

        assert!(store.get(Collection::Appointments, "local_1_abc").unwrap().is_none());
        let entity = store.get(Collection::Appointments, "srv-42").unwrap().unwrap();
        assert_eq!(entity["id"], "srv-42");

        let by_patient = store
            .get_by_index(Collection::Appointments, "patient_id", "p1")
            .unwrap();
        assert_eq!(by_patient.len(), 1);
        assert_eq!(by_patient[0]["id"], "srv-42");

        assert!(!store
            .rename_key(Collection::Appointments, "local_1_abc", "srv-43")
            .unwrap());
    }

    #[test]
    fn test_open_is_idempotent_and_persistent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("consult.db");

        {
            let mut store = LocalStore::open(&path).unwrap();
            store
                .put(Collection::Patients, &json!({"id": "p1", "first_name": "Ada"}))
                .unwrap();
        }

        {
            let store = LocalStore::open(&path).unwrap();
            let loaded = store.get(Collection::Patients, "p1").unwrap().unwrap();
            assert_eq!(loaded["first_name"], "Ada");
        }
    }
}
