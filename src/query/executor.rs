//! Query engine entry point.
//!
//! A call runs to completion synchronously: parse and dispatch expressions,
//! validate fields, pick the primary index, resolve key sets, build the
//! result tree and reduce aggregations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::aggregate::Aggregator;
use crate::query::ast::{Expression, SortSpec};
use crate::query::cardinality::{
    Cardinality, CardinalityCache, CardinalityEstimator, DEFAULT_SAMPLE_SIZE,
};
use crate::query::dispatch::dispatch;
use crate::query::errors::{QueryError, Result};
use crate::query::parser::{DslParser, ExpressionParser};
use crate::query::planner::{select_by_cardinality, select_by_reachability, PrimaryChoice, Strategy};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::resolver::{ConditionMatcher, ConditionMatches, RootSpec};
use crate::query::tree::{build_subtree, link_entry, Links, RefMap, ResultTree};
use crate::query::validate::{aggregations_of, validate_fields, AggMap, GroupFields};
use crate::query::value::FIELD_HKEY;
use crate::store::Store;
use crate::types::HKey;

/// Engine tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Keys sampled per index by the cardinality estimator.
    pub sample_size: usize,
    /// Seed for random ordering. `None` seeds from entropy.
    pub random_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            random_seed: None,
        }
    }
}

/// Fields and sort requested for one index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldSelection {
    /// Index the selection applies to.
    pub index: String,
    /// Field names in order of first appearance.
    pub fields: Vec<String>,
    /// Sort of the first expression naming the index.
    pub sort: Option<SortSpec>,
}

/// Field selections per index, in order of first appearance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldSelections(Vec<FieldSelection>);

impl FieldSelections {
    /// Selection for `index`.
    pub fn get(&self, index: &str) -> Option<&FieldSelection> {
        self.0.iter().find(|s| s.index == index)
    }

    /// Iterates selections in order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldSelection> {
        self.0.iter()
    }

    /// Returns true when nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn entry(&mut self, index: &str) -> &mut FieldSelection {
        let pos = match self.0.iter().position(|s| s.index == index) {
            Some(pos) => pos,
            None => {
                self.0.push(FieldSelection {
                    index: index.to_owned(),
                    fields: Vec::new(),
                    sort: None,
                });
                self.0.len() - 1
            }
        };
        &mut self.0[pos]
    }
}

/// Result tree with its presentation metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryTree {
    /// Nested result.
    pub tree: ResultTree,
    /// Fields to show per index when rendering.
    pub fields: FieldSelections,
    /// Single index, no conditions, no aggregations.
    pub flat: bool,
}

/// Outcome of [`QueryEngine::query`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    /// Bare key listing.
    Keys(Vec<HKey>),
    /// Full result tree.
    Tree(QueryTree),
}

impl QueryOutput {
    /// Keys of a bare listing.
    pub fn keys(&self) -> Option<&[HKey]> {
        match self {
            QueryOutput::Keys(keys) => Some(keys),
            QueryOutput::Tree(_) => None,
        }
    }

    /// Tree of a full result.
    pub fn tree(&self) -> Option<&QueryTree> {
        match self {
            QueryOutput::Tree(tree) => Some(tree),
            QueryOutput::Keys(_) => None,
        }
    }
}

/// Per-call view over the parsed expressions.
struct Plan<'e> {
    exprs: &'e [Expression],
    conditions: Vec<&'e Expression>,
    aggs: AggMap,
    selected: Vec<String>,
    fields: FieldSelections,
}

impl<'e> Plan<'e> {
    fn new(exprs: &'e [Expression], root: &str) -> Self {
        let conditions = exprs.iter().filter(|e| e.has_conditions()).collect();

        let mut aggs = AggMap::new();
        for expr in exprs.iter().filter(|e| !e.aggregations.is_empty()) {
            let pos = match aggs.iter().position(|(name, _)| *name == expr.index) {
                Some(pos) => pos,
                None => {
                    aggs.push((expr.index.clone(), Vec::new()));
                    aggs.len() - 1
                }
            };
            for descriptor in &expr.aggregations {
                if !aggs[pos].1.contains(descriptor) {
                    aggs[pos].1.push(descriptor.clone());
                }
            }
        }

        let mut selected: Vec<String> = Vec::new();
        for expr in exprs {
            if !selected.contains(&expr.index) {
                selected.push(expr.index.clone());
            }
        }

        let mut fields = FieldSelections::default();
        if !selected.iter().any(|i| i == root) {
            fields.entry(root).fields.push(FIELD_HKEY.to_owned());
            selected.push(root.to_owned());
        }
        for expr in exprs {
            let first = fields.get(&expr.index).is_none();
            let entry = fields.entry(&expr.index);
            if first {
                entry.sort = expr.sort.clone();
            }
            for f in &expr.fields {
                if !entry.fields.contains(f) {
                    entry.fields.push(f.clone());
                }
            }
        }

        Self {
            exprs,
            conditions,
            aggs,
            selected,
            fields,
        }
    }

    fn is_aggregated(&self, index: &str) -> bool {
        aggregations_of(&self.aggs, index).is_some()
    }

    fn agg_indexes(&self) -> Vec<&str> {
        self.aggs.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Field selections without the filter fields of aggregated indexes,
    /// group-by fields excepted.
    fn fields_without_agg_filters(&self, groups: &GroupFields) -> FieldSelections {
        let mut fields = self.fields.clone();
        for expr in self.conditions.iter().filter(|e| self.is_aggregated(&e.index)) {
            let grouped = groups.get(&expr.index);
            for f in expr.condition_fields() {
                if grouped.is_some_and(|g| g.iter().any(|x| x == f)) {
                    continue;
                }
                fields.entry(&expr.index).fields.retain(|x| x != f);
            }
        }
        fields
    }
}

/// Query planner and executor bound to one store.
///
/// The engine owns the cardinality cache, which persists across calls and is
/// only dropped through [`QueryEngine::invalidate_cardinality`].
pub struct QueryEngine<'s, S: Store + ?Sized, P: ExpressionParser = DslParser> {
    store: &'s S,
    parser: P,
    config: EngineConfig,
    cardinality: CardinalityCache,
    rng: StdRng,
}

impl<'s, S: Store + ?Sized> QueryEngine<'s, S> {
    /// Engine with the default parser and configuration.
    pub fn new(store: &'s S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Engine with the default parser.
    pub fn with_config(store: &'s S, config: EngineConfig) -> Self {
        Self::with_parser(store, DslParser, config)
    }
}

impl<'s, S: Store + ?Sized, P: ExpressionParser> QueryEngine<'s, S, P> {
    /// Engine with a custom expression parser.
    pub fn with_parser(store: &'s S, parser: P, config: EngineConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            parser,
            config,
            cardinality: CardinalityCache::default(),
            rng,
        }
    }

    /// Store the engine reads from.
    pub fn store(&self) -> &'s S {
        self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classifications memoized so far.
    pub fn cardinality_cache(&self) -> &CardinalityCache {
        &self.cardinality
    }

    /// Forgets every cached classification. Call after mutating the store.
    pub fn invalidate_cardinality(&mut self) {
        self.cardinality.clear();
    }

    /// Classifies the relationship of `a` toward `b`.
    pub fn cardinality(&mut self, a: &str, b: &str) -> Cardinality {
        CardinalityEstimator::new(self.store, self.config.sample_size).classify(
            &mut self.cardinality,
            a,
            b,
        )
    }

    /// Runs a query.
    ///
    /// `root` is an index name or a key, optionally suffixed with `?!N`, `??`
    /// or `!N`. With `only_root_hkeys` the resolved root keys are returned
    /// instead of a tree.
    pub fn query(&mut self, root: &str, exprs: &[&str], only_root_hkeys: bool) -> Result<QueryOutput> {
        let started = Instant::now();
        let result = self.run(root, exprs, only_root_hkeys);
        debug!(
            root,
            exprs = exprs.len(),
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "query.fetched"
        );
        result
    }

    fn run(&mut self, root: &str, exprs: &[&str], only_root_hkeys: bool) -> Result<QueryOutput> {
        let store = self.store;
        let spec = RootSpec::parse(root)?;
        let root_index = if store.is_index(&spec.token) {
            spec.token.clone()
        } else {
            store
                .index_of(&spec.token)
                .ok_or_else(|| QueryError::UnknownRoot {
                    token: spec.token.clone(),
                })?
        };
        let root_key = HKey::parse(&spec.token).filter(|_| store.key_exists(&spec.token));

        let timer = profile_timer();
        let parsed = dispatch(store, &self.parser, &root_index, exprs)?;
        record_profile_timer(QueryProfileKind::Parse, timer);

        let plan = Plan::new(&parsed, &root_index);
        if only_root_hkeys && !plan.aggs.is_empty() {
            return Err(QueryError::AggregationWithKeys);
        }

        let declared: HashMap<String, BTreeSet<String>> = plan
            .selected
            .iter()
            .map(|index| (index.clone(), store.index_fields(index)))
            .collect();
        let groups = validate_fields(&parsed, &plan.aggs, &declared)?;

        let timer = profile_timer();
        let primary = self.choose_primary(&plan, &root_index);
        debug!(
            root = %root_index,
            primary = %primary.index,
            strategy = ?primary.strategy,
            "query.primary_index"
        );
        let prm = primary.index.as_str();

        let matches = ConditionMatcher::new(store).matches(&plan.conditions)?;

        let mut all: BTreeSet<HKey> = match &root_key {
            Some(key) if root_index != prm => store.refs(key, prm),
            Some(key) => BTreeSet::from([key.clone()]),
            None => store.index_keys(prm),
        };

        let mut by_size = plan.conditions.clone();
        by_size.sort_by_key(|expr| store.index_len(&expr.index));
        for expr in by_size {
            if all.is_empty() {
                break;
            }
            let projected = project_to_primary(store, matches.get(&expr.index), prm);
            all.retain(|key| projected.contains(key));
        }
        if all.is_empty() {
            record_profile_timer(QueryProfileKind::Resolve, timer);
            return Err(QueryError::no_data());
        }

        let mut root_keys: Option<BTreeSet<HKey>> = None;
        if root_index != prm {
            let mut base = match &root_key {
                Some(key) => BTreeSet::from([key.clone()]),
                None => store.index_keys(&root_index),
            };
            if !plan.aggs.is_empty() {
                if let Some(matched) = matches.get(&root_index) {
                    base.retain(|key| matched.contains(key));
                }
                let limited = self.order_and_limit(base.into_iter().collect(), &spec);
                let derived: BTreeSet<HKey> = limited
                    .iter()
                    .flat_map(|key| store.refs(key, prm))
                    .collect();
                all.retain(|key| derived.contains(key));
                base = limited.into_iter().collect();
            }
            root_keys = Some(base);
        }

        let keys: Vec<HKey> = if plan.aggs.is_empty() || root_index == prm {
            self.order_and_limit(all.into_iter().collect(), &spec)
        } else {
            all.into_iter().collect()
        };
        record_profile_timer(QueryProfileKind::Resolve, timer);
        debug!(primary = %prm, keys = keys.len(), "query.key_set");

        if plan.exprs.is_empty() {
            if only_root_hkeys {
                return Ok(QueryOutput::Keys(keys));
            }
            return Ok(QueryOutput::Tree(QueryTree {
                tree: ResultTree::Branch(vec![(root_index, ResultTree::listing(&keys))]),
                fields: FieldSelections::default(),
                flat: false,
            }));
        }

        if !plan.aggs.is_empty() && plan.selected.len() == 1 {
            let timer = profile_timer();
            let tree = ResultTree::Branch(vec![(
                root_index,
                ResultTree::Marked(keys.into_iter().collect()),
            )]);
            let tree = aggregate_tree(store, &plan.aggs, &groups, tree);
            record_profile_timer(QueryProfileKind::Aggregate, timer);
            return Ok(QueryOutput::Tree(QueryTree {
                tree,
                fields: plan.fields_without_agg_filters(&groups),
                flat: false,
            }));
        }

        let timer = profile_timer();
        let mut links_by_key: Vec<(HKey, Links)> = Vec::with_capacity(keys.len());
        if !plan.aggs.is_empty() {
            let context = AggregateContext {
                store,
                plan: &plan,
                matches: &matches,
                root: &root_index,
                primary: prm,
                root_keys: root_keys.as_ref(),
                single: keys.len() == 1,
            };
            for key in &keys {
                if let Some(links) = context.links(key)? {
                    links_by_key.push((key.clone(), links));
                }
            }
        } else {
            let mut root_refs = BTreeSet::new();
            for key in &keys {
                let mut links = Links::new();
                for index in plan.selected.iter().filter(|i| *i != prm) {
                    let refs = store.refs(key, index);
                    if refs.is_empty() {
                        return Err(QueryError::MissingReferences {
                            from: prm.to_owned(),
                            to: index.clone(),
                        });
                    }
                    if only_root_hkeys {
                        if *index == root_index {
                            root_refs.extend(refs);
                        }
                        continue;
                    }
                    links.push((index.clone(), RefMap::Keys(refs)));
                }
                links_by_key.push((key.clone(), links));
            }
            if only_root_hkeys {
                let out = if prm == root_index {
                    keys
                } else {
                    root_refs.into_iter().collect()
                };
                return Ok(QueryOutput::Keys(out));
            }
            if links_by_key.iter().all(|(_, links)| links.is_empty()) {
                for (key, links) in &mut links_by_key {
                    links.push((
                        root_index.clone(),
                        RefMap::Keys(BTreeSet::from([key.clone()])),
                    ));
                }
            }
        }

        if links_by_key.is_empty() {
            return Err(QueryError::no_data());
        }

        let flat = plan.conditions.is_empty() && plan.aggs.is_empty() && plan.selected.len() == 1;
        links_by_key.sort_by(|a, b| a.0.cmp(&b.0));
        let agg_indexes = plan.agg_indexes();
        let children = links_by_key
            .iter()
            .map(|(key, links)| (key.to_string(), build_subtree(links, &agg_indexes, flat)))
            .collect();
        let tree = ResultTree::Branch(vec![(prm.to_owned(), ResultTree::Branch(children))]);
        record_profile_timer(QueryProfileKind::Build, timer);

        if plan.aggs.is_empty() {
            return Ok(QueryOutput::Tree(QueryTree {
                tree,
                fields: plan.fields.clone(),
                flat,
            }));
        }

        let timer = profile_timer();
        let tree = aggregate_tree(store, &plan.aggs, &groups, tree);
        record_profile_timer(QueryProfileKind::Aggregate, timer);
        Ok(QueryOutput::Tree(QueryTree {
            tree,
            fields: plan.fields_without_agg_filters(&groups),
            flat,
        }))
    }

    fn choose_primary(&mut self, plan: &Plan<'_>, root: &str) -> PrimaryChoice {
        if plan.exprs.is_empty() {
            return PrimaryChoice::root(root);
        }
        if plan.aggs.is_empty() {
            return match select_by_reachability(self.store, &plan.selected) {
                Some(index) => PrimaryChoice {
                    index,
                    strategy: Strategy::Reachability,
                },
                None => PrimaryChoice::root(root),
            };
        }
        if plan.is_aggregated(root) || self.looks_grouped(plan, root) {
            return PrimaryChoice::root(root);
        }
        let estimator = CardinalityEstimator::new(self.store, self.config.sample_size);
        match select_by_cardinality(&estimator, &mut self.cardinality, &plan.selected) {
            Some(index) => PrimaryChoice {
                index,
                strategy: Strategy::Scored,
            },
            None => PrimaryChoice::root(root),
        }
    }

    /// True when the first aggregated index other than `root` has a known
    /// relationship with it.
    fn looks_grouped(&mut self, plan: &Plan<'_>, root: &str) -> bool {
        let target = plan
            .exprs
            .iter()
            .map(|e| e.index.as_str())
            .find(|index| *index != root && plan.is_aggregated(index));
        match target {
            Some(index) => self.cardinality(root, index) != Cardinality::Unknown,
            None => false,
        }
    }

    /// Shuffles or keeps the ascending order, then truncates to the limit.
    fn order_and_limit(&mut self, mut keys: Vec<HKey>, spec: &RootSpec) -> Vec<HKey> {
        if spec.is_random() {
            keys.shuffle(&mut self.rng);
        }
        if let Some(limit) = spec.limit {
            keys.truncate(limit);
        }
        keys
    }
}

/// Maps the matches of one index into the primary index's key space.
fn project_to_primary<S: Store + ?Sized>(
    store: &S,
    matched: Option<&BTreeSet<HKey>>,
    primary: &str,
) -> BTreeSet<HKey> {
    let mut out = BTreeSet::new();
    for key in matched.into_iter().flatten() {
        if store.is_index_of(key, primary) {
            out.insert(key.clone());
        } else {
            out.extend(store.refs(key, primary));
        }
    }
    out
}

fn aggregate_tree<S: Store + ?Sized>(
    store: &S,
    aggs: &AggMap,
    groups: &GroupFields,
    tree: ResultTree,
) -> ResultTree {
    let aggregator = Aggregator::new(store, aggs, groups);
    match tree {
        ResultTree::Branch(children) => ResultTree::Branch(
            children
                .into_iter()
                .map(|(index, node)| {
                    let walked = aggregator.walk(node, &index);
                    (index, walked)
                })
                .collect(),
        ),
        other => other,
    }
}

/// Inputs to reference-map construction for aggregated queries.
struct AggregateContext<'a, S: Store + ?Sized> {
    store: &'a S,
    plan: &'a Plan<'a>,
    matches: &'a ConditionMatches,
    root: &'a str,
    primary: &'a str,
    root_keys: Option<&'a BTreeSet<HKey>>,
    single: bool,
}

impl<S: Store + ?Sized> AggregateContext<'_, S> {
    /// Links of one primary key, or `None` when the key has no data for some
    /// aggregated index and is dropped.
    fn links(&self, key: &HKey) -> Result<Option<Links>> {
        let store = self.store;
        let mut links = Links::new();

        for (agg_index, descriptors) in &self.plan.aggs {
            let mut base = store.refs(key, agg_index);
            if let Some(matched) = self.matches.get(agg_index) {
                base.retain(|k| matched.contains(k));
            }
            if let Some(root_keys) = self.root_keys {
                base.retain(|r| !store.refs(r, self.root).is_disjoint(root_keys));
            }

            if base.is_empty() {
                if self.single {
                    if store.has_path(key.index(), agg_index) {
                        return Err(QueryError::no_aggregate_data(agg_index));
                    }
                    if self.primary == self.root {
                        return Err(QueryError::UnresolvedAggregate {
                            index: agg_index.clone(),
                            aggregates: descriptors
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join(", "),
                            root: self.root.to_owned(),
                            alternatives: self
                                .plan
                                .selected
                                .iter()
                                .filter(|i| *i != self.root)
                                .cloned()
                                .collect(),
                        });
                    }
                }
                debug!(key = %key, index = %agg_index, "query.aggregate.key_dropped");
                return Ok(None);
            }

            let others: Vec<&String> = self
                .plan
                .selected
                .iter()
                .filter(|i| *i != self.primary && *i != agg_index)
                .collect();
            if others.is_empty() {
                links.push((agg_index.clone(), RefMap::Keys(base)));
                continue;
            }

            for index in others {
                let candidates = match self.matches.get(index) {
                    Some(matched) => matched.clone(),
                    None => store.refs(key, index),
                };
                for related in candidates {
                    let dataset: BTreeSet<HKey> = store
                        .refs(&related, agg_index)
                        .intersection(&base)
                        .cloned()
                        .collect();
                    if dataset.is_empty() {
                        continue;
                    }
                    let RefMap::Nested(nested) =
                        link_entry(&mut links, index, RefMap::Nested(BTreeMap::new()))
                    else {
                        continue;
                    };
                    let sub = nested.entry(related).or_default();
                    *link_entry(sub, agg_index, RefMap::Keys(BTreeSet::new())) =
                        RefMap::Keys(dataset);
                }
            }
        }
        Ok(Some(links))
    }
}
