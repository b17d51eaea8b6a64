//! Primary-index selection.
//!
//! The primary index anchors key-set resolution and the outer level of the
//! result tree. Two strategies exist: plain reachability for filter-only
//! queries, and cardinality scoring once aggregations are involved.

use serde::Serialize;

use crate::query::cardinality::{Cardinality, CardinalityCache, CardinalityEstimator};
use crate::store::Store;

/// How the primary index was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Root index used as is.
    Root,
    /// Largest index reaching every other candidate.
    Reachability,
    /// Highest cardinality score.
    Scored,
}

/// Outcome of primary-index selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrimaryChoice {
    /// Index driving key resolution.
    pub index: String,
    /// Rule that picked it.
    pub strategy: Strategy,
}

impl PrimaryChoice {
    pub(crate) fn root(index: &str) -> Self {
        Self {
            index: index.to_owned(),
            strategy: Strategy::Root,
        }
    }
}

/// Returns the largest candidate from which every other candidate is reachable.
///
/// Candidates of equal size are tried last-listed first.
pub fn select_by_reachability<S: Store + ?Sized>(store: &S, candidates: &[String]) -> Option<String> {
    let mut ordered: Vec<&String> = candidates.iter().collect();
    ordered.sort_by_key(|idx| store.index_len(idx));
    ordered
        .into_iter()
        .rev()
        .find(|idx| {
            candidates
                .iter()
                .all(|other| *idx == other || store.has_path(idx, other))
        })
        .cloned()
}

/// Picks the candidate with the greatest `(one-to-many, many-to-one,
/// many-to-many)` score. Ties go to the lexically greatest index name.
pub fn select_by_cardinality<S: Store + ?Sized>(
    estimator: &CardinalityEstimator<'_, S>,
    cache: &mut CardinalityCache,
    candidates: &[String],
) -> Option<String> {
    if candidates.len() == 1 {
        return candidates.first().cloned();
    }

    let mut scored: Vec<((usize, usize, usize), &String)> = candidates
        .iter()
        .map(|a| {
            let mut score = (0, 0, 0);
            for b in candidates.iter().filter(|b| *b != a) {
                match estimator.classify(cache, a, b) {
                    Cardinality::OneToMany => score.0 += 1,
                    Cardinality::ManyToOne => score.1 += 1,
                    Cardinality::ManyToMany => score.2 += 1,
                    Cardinality::OneToOne | Cardinality::Unknown => {}
                }
            }
            (score, a)
        })
        .collect();

    scored.sort_by(|lhs, rhs| rhs.cmp(lhs));
    scored.first().map(|(_, name)| (*name).clone())
}
