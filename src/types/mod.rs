#![forbid(unsafe_code)]

//! Identifier and record types shared by the storage and query layers.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the index prefix and the record id inside an [`HKey`].
pub const HKEY_SEPARATOR: char = ':';

/// Field values of a single record, keyed by field name.
pub type Record = BTreeMap<String, String>;

/// Globally unique record identifier of the form `<index>:<id>`.
///
/// The prefix before the first separator names the owning index.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HKey(String);

impl HKey {
    /// Builds a key from its index and id parts.
    pub fn new(index: &str, id: &str) -> Self {
        Self(format!("{index}{HKEY_SEPARATOR}{id}"))
    }

    /// Parses a raw `<index>:<id>` token. Both parts must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let (index, id) = raw.split_once(HKEY_SEPARATOR)?;
        if index.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self(raw.to_owned()))
    }

    /// Name of the owning index.
    pub fn index(&self) -> &str {
        self.0
            .split_once(HKEY_SEPARATOR)
            .map(|(index, _)| index)
            .unwrap_or(&self.0)
    }

    /// Record id within the owning index.
    pub fn id(&self) -> &str {
        self.0
            .split_once(HKEY_SEPARATOR)
            .map(|(_, id)| id)
            .unwrap_or("")
    }

    /// Returns true when the key belongs to `index`.
    pub fn belongs_to(&self, index: &str) -> bool {
        self.index() == index
    }

    /// Full key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for HKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for HKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_index_and_id() {
        let key = HKey::parse("orders:o-17").unwrap();
        assert_eq!(key.index(), "orders");
        assert_eq!(key.id(), "o-17");
        assert!(key.belongs_to("orders"));
        assert!(!key.belongs_to("order"));
    }

    #[test]
    fn id_may_contain_separator() {
        let key = HKey::parse("files:/tmp:a").unwrap();
        assert_eq!(key.index(), "files");
        assert_eq!(key.id(), "/tmp:a");
    }

    #[test]
    fn rejects_bare_tokens() {
        assert!(HKey::parse("orders").is_none());
        assert!(HKey::parse(":x").is_none());
        assert!(HKey::parse("x:").is_none());
    }
}
