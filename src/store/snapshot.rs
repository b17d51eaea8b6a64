//! JSON snapshot format for [`MemStore`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{MemStore, Store};
use crate::types::{HKey, Record};

/// Errors raised while reading or writing a snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// File could not be read.
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// File could not be written.
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// File contents are not a valid snapshot document.
    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),
    /// A key did not have the `<index>:<id>` shape.
    #[error("invalid hkey '{0}'")]
    InvalidKey(String),
    /// A reference joined two keys of the same index.
    #[error("reference '{0}' -> '{1}' stays within one index")]
    SelfReference(String, String),
}

/// Serialized form of a whole store.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Declared fields per index.
    #[serde(default)]
    pub indexes: BTreeMap<String, Vec<String>>,
    /// Record payloads keyed by hkey.
    #[serde(default)]
    pub records: BTreeMap<String, Record>,
    /// Reference pairs.
    #[serde(default)]
    pub refs: Vec<(String, String)>,
    /// Keys that are index members without a record.
    #[serde(default)]
    pub tombstones: Vec<String>,
}

impl StoreSnapshot {
    /// Reads a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let contents = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes the snapshot as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized).map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Captures the full contents of a store.
    pub fn capture(store: &MemStore) -> Self {
        let mut snapshot = Self::default();
        for name in store.index_names() {
            snapshot
                .indexes
                .insert(name.to_owned(), store.index_fields(name).into_iter().collect());
            for key in store.index_keys(name) {
                if let Some(record) = store.read(&key) {
                    snapshot.records.insert(key.to_string(), record.clone());
                }
            }
        }
        snapshot.refs = store
            .reference_pairs()
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        snapshot.tombstones = store.tombstones().iter().map(HKey::to_string).collect();
        snapshot
    }

    /// Builds a store from this snapshot.
    pub fn into_store(self) -> Result<MemStore, SnapshotError> {
        let mut store = MemStore::new();
        for (name, fields) in &self.indexes {
            store.create_index(name, fields.iter().cloned());
        }
        for (raw, record) in self.records {
            let key = parse_key(&raw)?;
            store.insert(key, record);
        }
        for raw in &self.tombstones {
            let key = parse_key(raw)?;
            store.insert(key.clone(), Record::new());
            store.tombstone(&key);
        }
        for (a, b) in &self.refs {
            let (ka, kb) = (parse_key(a)?, parse_key(b)?);
            if ka.index() == kb.index() {
                return Err(SnapshotError::SelfReference(a.clone(), b.clone()));
            }
            store.link(&ka, &kb);
        }
        debug!(
            indexes = self.indexes.len(),
            keys = store.key_count(),
            "store.snapshot.loaded"
        );
        Ok(store)
    }
}

fn parse_key(raw: &str) -> Result<HKey, SnapshotError> {
    HKey::parse(raw).ok_or_else(|| SnapshotError::InvalidKey(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_then_restore_preserves_queries() {
        let mut store = MemStore::new();
        let u1 = HKey::parse("users:u1").unwrap();
        let o1 = HKey::parse("orders:o1").unwrap();
        let o2 = HKey::parse("orders:o2").unwrap();
        store
            .insert(u1.clone(), [("name", "ada")])
            .insert(o1.clone(), [("amount", "10")])
            .insert(o2.clone(), [("amount", "20")])
            .link(&o1, &u1);
        store.tombstone(&o2);

        let restored = StoreSnapshot::capture(&store).into_store().unwrap();
        assert_eq!(restored.index_len("orders"), 2);
        assert!(restored.read(&o2).is_none());
        assert_eq!(restored.refs(&u1, "orders").len(), 1);
        assert!(restored.index_fields("orders").contains("amount"));
    }

    #[test]
    fn rejects_malformed_keys() {
        let snapshot: StoreSnapshot =
            serde_json::from_str(r#"{"records": {"nocolon": {"a": "1"}}}"#).unwrap();
        assert!(matches!(
            snapshot.into_store(),
            Err(SnapshotError::InvalidKey(_))
        ));
    }

    #[test]
    fn save_and_load_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let snapshot = StoreSnapshot {
            indexes: BTreeMap::from([("users".to_owned(), vec!["name".to_owned()])]),
            ..StoreSnapshot::default()
        };
        snapshot.save(&path).unwrap();
        assert_eq!(StoreSnapshot::load(&path).unwrap(), snapshot);
    }
}
