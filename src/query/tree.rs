//! Result tree and its construction from per-key reference maps.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::types::HKey;

/// Reserved key of aggregation nodes in the serialized tree.
pub const AGGREGATE_MARKER: &str = "@[aggregate]";

/// One reduced aggregate: its `index:op[:field]` label and rendered value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateValue {
    /// `index:op[:field]`.
    pub label: String,
    /// Rendered result, `None` when nothing could be reduced.
    pub value: Option<String>,
}

/// Nested query result.
///
/// Branch levels alternate between index names and record keys. An
/// aggregated index holds either the keys still to be reduced
/// ([`ResultTree::Marked`]) or the reduction itself.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultTree {
    /// Ordered children. An empty branch is a leaf.
    Branch(Vec<(String, ResultTree)>),
    /// Keys waiting under the aggregation marker.
    Marked(BTreeSet<HKey>),
    /// Reduced values of one group.
    Aggregate(Vec<AggregateValue>),
    /// One group-by level: `field -> value -> subtree`.
    Group {
        /// Group-by field name.
        field: String,
        /// Subtree per distinct value. `None` collects missing values.
        buckets: Vec<(Option<String>, ResultTree)>,
    },
}

impl ResultTree {
    /// Empty leaf.
    pub fn leaf() -> Self {
        ResultTree::Branch(Vec::new())
    }

    /// Branch whose children are all leaves.
    pub fn listing<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: ToString,
    {
        ResultTree::Branch(keys.into_iter().map(|k| (k.to_string(), Self::leaf())).collect())
    }

    /// Child named `name` of a branch.
    pub fn get(&self, name: &str) -> Option<&ResultTree> {
        match self {
            ResultTree::Branch(children) => children
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, child)| child),
            _ => None,
        }
    }

    /// Child names of a branch, in order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            ResultTree::Branch(children) => children.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns true for an empty branch.
    pub fn is_leaf(&self) -> bool {
        matches!(self, ResultTree::Branch(children) if children.is_empty())
    }

    /// Reduced values of an ungrouped aggregate node.
    pub fn aggregate(&self) -> Option<&[AggregateValue]> {
        match self {
            ResultTree::Aggregate(values) => Some(values),
            _ => None,
        }
    }

    /// Value rendered for `label` in an ungrouped aggregate node.
    pub fn aggregate_value(&self, label: &str) -> Option<Option<&str>> {
        self.aggregate()?
            .iter()
            .find(|v| v.label == label)
            .map(|v| v.value.as_deref())
    }
}

impl Serialize for ResultTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResultTree::Branch(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for (key, child) in children {
                    map.serialize_entry(key, child)?;
                }
                map.end()
            }
            ResultTree::Marked(keys) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(AGGREGATE_MARKER, &Self::listing(keys))?;
                map.end()
            }
            ResultTree::Aggregate(values) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(AGGREGATE_MARKER, &ReducedValues(values))?;
                map.end()
            }
            ResultTree::Group { field, buckets } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(field, &Buckets(buckets))?;
                map.end()
            }
        }
    }
}

struct ReducedValues<'a>(&'a [AggregateValue]);

impl Serialize for ReducedValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in self.0 {
            match &entry.value {
                Some(value) => {
                    map.serialize_entry(&entry.label, &ResultTree::listing([value]))?
                }
                None => map.serialize_entry(&entry.label, &())?,
            }
        }
        map.end()
    }
}

struct Buckets<'a>(&'a [(Option<String>, ResultTree)]);

impl Serialize for Buckets<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (value, subtree) in self.0 {
            map.serialize_entry(value.as_deref().unwrap_or("null"), subtree)?;
        }
        map.end()
    }
}

/// References of one key, grouped by related index in insertion order.
pub(crate) type Links = Vec<(String, RefMap)>;

/// Related keys of one index: a plain set, or keys carrying further links.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum RefMap {
    Keys(BTreeSet<HKey>),
    Nested(BTreeMap<HKey, Links>),
}

/// Returns the entry for `index`, inserting `init` when absent.
pub(crate) fn link_entry<'a>(links: &'a mut Links, index: &str, init: RefMap) -> &'a mut RefMap {
    let pos = match links.iter().position(|(name, _)| name == index) {
        Some(pos) => pos,
        None => {
            links.push((index.to_owned(), init));
            links.len() - 1
        }
    };
    &mut links[pos].1
}

/// Builds the subtree of one primary key from its links.
///
/// Links toward an aggregated index collapse under the marker. Plain links
/// nest each related key as its own subtree.
pub(crate) fn build_subtree(links: &Links, agg_indexes: &[&str], flat: bool) -> ResultTree {
    if flat {
        return ResultTree::leaf();
    }
    let children = links
        .iter()
        .map(|(index, refs)| {
            let node = if agg_indexes.contains(&index.as_str()) {
                ResultTree::Marked(match refs {
                    RefMap::Keys(keys) => keys.clone(),
                    RefMap::Nested(nested) => nested.keys().cloned().collect(),
                })
            } else {
                match refs {
                    RefMap::Keys(keys) => ResultTree::listing(keys),
                    RefMap::Nested(nested) => ResultTree::Branch(
                        nested
                            .iter()
                            .map(|(key, sub)| {
                                (key.to_string(), build_subtree(sub, agg_indexes, false))
                            })
                            .collect(),
                    ),
                }
            };
            (index.clone(), node)
        })
        .collect();
    ResultTree::Branch(children)
}
