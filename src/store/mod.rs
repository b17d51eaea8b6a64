#![forbid(unsafe_code)]

//! Storage collaborator consumed by the query engine.
//!
//! The engine never mutates storage. It only asks membership, enumeration,
//! record and reference questions through [`Store`], so any backend that can
//! answer them (the bundled [`MemStore`], a persistent engine, a test double)
//! can be queried.

mod memory;
mod snapshot;

use std::collections::BTreeSet;

use crate::types::{HKey, Record};

pub use memory::MemStore;
pub use snapshot::{SnapshotError, StoreSnapshot};

/// Read interface over indexes, records and references.
pub trait Store {
    /// Returns true when `name` is a known index.
    fn is_index(&self, name: &str) -> bool;

    /// Returns true when `token` names an existing key (record or tombstone).
    fn key_exists(&self, token: &str) -> bool;

    /// Resolves a specific key to its owning index, or `None` if the key is unknown.
    fn index_of(&self, token: &str) -> Option<String>;

    /// Enumerates every key of `index`.
    fn index_keys(&self, index: &str) -> BTreeSet<HKey>;

    /// Number of keys in `index`.
    fn index_len(&self, index: &str) -> usize;

    /// Declared field names of `index`.
    fn index_fields(&self, index: &str) -> BTreeSet<String>;

    /// Reads a record. Tombstoned keys return `None`.
    fn read(&self, key: &HKey) -> Option<&Record>;

    /// Keys referenced from `key` toward `target`.
    ///
    /// When `target` is the key's own index the result is `{key}`.
    fn refs(&self, key: &HKey, target: &str) -> BTreeSet<HKey>;

    /// Returns true when `key` belongs to `index`.
    fn is_index_of(&self, key: &HKey, index: &str) -> bool {
        key.belongs_to(index)
    }

    /// Returns true when a path exists from `from` to `to` in the index-level
    /// reference graph. Always true for `from == to`.
    fn has_path(&self, from: &str, to: &str) -> bool;
}
