//! In-memory [`Store`] used by tests, fixtures and the command-line front end.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::trace;

use super::Store;
use crate::types::{HKey, Record};

#[derive(Debug, Default, Clone)]
struct IndexEntry {
    keys: BTreeSet<HKey>,
    fields: BTreeSet<String>,
}

/// Hash-map backed store with symmetric references.
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    indexes: BTreeMap<String, IndexEntry>,
    records: HashMap<HKey, Record>,
    refs: HashMap<HKey, HashMap<String, BTreeSet<HKey>>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an index with the given field names. Re-declaring extends the field set.
    pub fn create_index<I, F>(&mut self, name: &str, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let entry = self.indexes.entry(name.to_owned()).or_default();
        entry.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Inserts or replaces a record. The owning index is created on demand and its
    /// declared fields grow to cover the record's fields.
    pub fn insert<I, K, V>(&mut self, key: HKey, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record: Record = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let entry = self.indexes.entry(key.index().to_owned()).or_default();
        entry.fields.extend(record.keys().cloned());
        entry.keys.insert(key.clone());
        self.records.insert(key, record);
        self
    }

    /// Adds a reference between two keys of different indexes. Both directions
    /// become visible through [`Store::refs`].
    pub fn link(&mut self, a: &HKey, b: &HKey) -> &mut Self {
        self.refs
            .entry(a.clone())
            .or_default()
            .entry(b.index().to_owned())
            .or_default()
            .insert(b.clone());
        self.refs
            .entry(b.clone())
            .or_default()
            .entry(a.index().to_owned())
            .or_default()
            .insert(a.clone());
        self
    }

    /// Drops the record payload while keeping index membership and references.
    pub fn tombstone(&mut self, key: &HKey) -> bool {
        self.records.remove(key).is_some()
    }

    /// Names of all indexes in lexical order.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    /// Total number of keys across all indexes.
    pub fn key_count(&self) -> usize {
        self.indexes.values().map(|entry| entry.keys.len()).sum()
    }

    /// Every reference pair once, ordered, with the smaller key first.
    pub fn reference_pairs(&self) -> Vec<(HKey, HKey)> {
        let mut pairs = BTreeSet::new();
        for (from, targets) in &self.refs {
            for to in targets.values().flatten() {
                if from < to {
                    pairs.insert((from.clone(), to.clone()));
                } else {
                    pairs.insert((to.clone(), from.clone()));
                }
            }
        }
        pairs.into_iter().collect()
    }

    /// Keys that are members of an index but carry no record.
    pub fn tombstones(&self) -> Vec<HKey> {
        self.indexes
            .values()
            .flat_map(|entry| entry.keys.iter())
            .filter(|key| !self.records.contains_key(*key))
            .cloned()
            .collect()
    }

    fn neighbours(&self, index: &str) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        if let Some(entry) = self.indexes.get(index) {
            for key in &entry.keys {
                if let Some(targets) = self.refs.get(key) {
                    out.extend(
                        targets
                            .iter()
                            .filter(|(_, keys)| !keys.is_empty())
                            .map(|(name, _)| name.as_str()),
                    );
                }
            }
        }
        out
    }
}

impl Store for MemStore {
    fn is_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    fn key_exists(&self, token: &str) -> bool {
        match HKey::parse(token) {
            Some(key) => self
                .indexes
                .get(key.index())
                .is_some_and(|entry| entry.keys.contains(&key)),
            None => false,
        }
    }

    fn index_of(&self, token: &str) -> Option<String> {
        if self.key_exists(token) {
            HKey::parse(token).map(|key| key.index().to_owned())
        } else {
            None
        }
    }

    fn index_keys(&self, index: &str) -> BTreeSet<HKey> {
        self.indexes
            .get(index)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default()
    }

    fn index_len(&self, index: &str) -> usize {
        self.indexes.get(index).map_or(0, |entry| entry.keys.len())
    }

    fn index_fields(&self, index: &str) -> BTreeSet<String> {
        self.indexes
            .get(index)
            .map(|entry| entry.fields.clone())
            .unwrap_or_default()
    }

    fn read(&self, key: &HKey) -> Option<&Record> {
        self.records.get(key)
    }

    fn refs(&self, key: &HKey, target: &str) -> BTreeSet<HKey> {
        if key.belongs_to(target) {
            return BTreeSet::from([key.clone()]);
        }
        self.refs
            .get(key)
            .and_then(|targets| targets.get(target))
            .cloned()
            .unwrap_or_default()
    }

    fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for next in self.neighbours(current) {
                if next == to {
                    trace!(from, to, "store.has_path.found");
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> HKey {
        HKey::parse(raw).unwrap()
    }

    fn chain() -> MemStore {
        let mut store = MemStore::new();
        store
            .insert(key("users:u1"), [("name", "ada")])
            .insert(key("orders:o1"), [("amount", "10")])
            .insert(key("items:i1"), [("sku", "x")])
            .create_index("orphans", ["note"]);
        store
            .link(&key("orders:o1"), &key("users:u1"))
            .link(&key("items:i1"), &key("orders:o1"));
        store
    }

    #[test]
    fn refs_are_symmetric() {
        let store = chain();
        assert_eq!(
            store.refs(&key("users:u1"), "orders"),
            BTreeSet::from([key("orders:o1")])
        );
        assert_eq!(
            store.refs(&key("orders:o1"), "users"),
            BTreeSet::from([key("users:u1")])
        );
        assert!(store.refs(&key("users:u1"), "items").is_empty());
    }

    #[test]
    fn refs_toward_own_index_is_identity() {
        let store = chain();
        assert_eq!(
            store.refs(&key("users:u1"), "users"),
            BTreeSet::from([key("users:u1")])
        );
    }

    #[test]
    fn path_search_is_transitive() {
        let store = chain();
        assert!(store.has_path("users", "items"));
        assert!(store.has_path("items", "users"));
        assert!(store.has_path("orphans", "orphans"));
        assert!(!store.has_path("users", "orphans"));
    }

    #[test]
    fn tombstone_keeps_membership() {
        let mut store = chain();
        assert!(store.tombstone(&key("orders:o1")));
        assert!(store.key_exists("orders:o1"));
        assert!(store.read(&key("orders:o1")).is_none());
        assert_eq!(store.index_len("orders"), 1);
        assert_eq!(store.tombstones(), vec![key("orders:o1")]);
    }

    #[test]
    fn resolves_owning_index() {
        let store = chain();
        assert_eq!(store.index_of("orders:o1").as_deref(), Some("orders"));
        assert_eq!(store.index_of("orders:o9"), None);
        assert_eq!(store.index_of("orders"), None);
        assert!(store.index_fields("orphans").contains("note"));
    }
}
