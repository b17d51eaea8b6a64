//! Sampled relationship classification between two indexes.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use crate::store::Store;

/// Default number of keys sampled from each index.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

const TOLERANCE: f64 = 0.1;

/// Relationship between an ordered pair of indexes `(A, B)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    /// No consistent relationship in the sample.
    Unknown,
    /// Each `A` references one `B` and the reverse.
    OneToOne,
    /// Each `A` references many `B`.
    OneToMany,
    /// Many `A` share one `B`.
    ManyToOne,
    /// Both sides reference many.
    ManyToMany,
}

impl Cardinality {
    /// Classification of the reversed pair.
    pub fn inverse(self) -> Self {
        match self {
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToOne => Cardinality::OneToMany,
            other => other,
        }
    }
}

/// Memoized classifications, always written for both orders of a pair.
/// Unknown pairs are never stored.
///
/// Entries are never invalidated automatically. Mutating indexes or
/// references after a pair was classified leaves a stale entry until
/// [`CardinalityCache::clear`] is called.
#[derive(Debug, Default, Clone)]
pub struct CardinalityCache {
    entries: HashMap<(String, String), Cardinality>,
}

impl CardinalityCache {
    /// Cached classification of `(a, b)`.
    pub fn get(&self, a: &str, b: &str) -> Option<Cardinality> {
        self.entries.get(&(a.to_owned(), b.to_owned())).copied()
    }

    /// Stores `(a, b)` and its inverse together.
    pub fn insert_pair(&mut self, a: &str, b: &str, value: Cardinality) {
        self.entries.insert((a.to_owned(), b.to_owned()), value);
        self.entries.insert((b.to_owned(), a.to_owned()), value.inverse());
    }

    /// Number of ordered pairs held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Samples reference counts to classify index pairs.
pub struct CardinalityEstimator<'a, S: Store + ?Sized> {
    store: &'a S,
    sample_size: usize,
}

impl<'a, S: Store + ?Sized> CardinalityEstimator<'a, S> {
    /// Estimator sampling at most `sample_size` keys per index.
    pub fn new(store: &'a S, sample_size: usize) -> Self {
        Self { store, sample_size }
    }

    /// Classifies `(a, b)`, consulting and filling `cache`.
    pub fn classify(&self, cache: &mut CardinalityCache, a: &str, b: &str) -> Cardinality {
        if let Some(hit) = cache.get(a, b) {
            return hit;
        }

        let a_keys = self.store.index_keys(a);
        let b_keys = self.store.index_keys(b);
        let sample = self.sample_size.min(a_keys.len()).min(b_keys.len());

        let a_to_b = rounded_mean(a_keys.iter().take(sample).map(|k| self.store.refs(k, b).len()));
        let b_to_a = rounded_mean(b_keys.iter().take(sample).map(|k| self.store.refs(k, a).len()));

        let singular = |mean: f64| (1.0 - TOLERANCE..=1.0 + TOLERANCE).contains(&mean);
        let plural = |mean: f64| mean > 1.0 + TOLERANCE;

        let value = if singular(a_to_b) && plural(b_to_a) {
            Cardinality::ManyToOne
        } else if plural(a_to_b) && singular(b_to_a) {
            Cardinality::OneToMany
        } else if plural(a_to_b) && plural(b_to_a) {
            Cardinality::ManyToMany
        } else if singular(a_to_b) && singular(b_to_a) {
            Cardinality::OneToOne
        } else {
            Cardinality::Unknown
        };

        trace!(a, b, sample, a_to_b, b_to_a, ?value, "query.cardinality");
        if value != Cardinality::Unknown {
            cache.insert_pair(a, b, value);
        }
        value
    }
}

/// Mean of `counts`, rounded half to even. Zero for an empty sample.
fn rounded_mean(counts: impl Iterator<Item = usize>) -> f64 {
    let (total, n) = counts.fold((0usize, 0usize), |(total, n), c| (total + c, n + 1));
    if n == 0 {
        return 0.0;
    }
    (total as f64 / n as f64).round_ties_even()
}
