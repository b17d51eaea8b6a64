//! Group-by and reduction of aggregated tree nodes.

use std::collections::{BTreeSet, HashSet};

use crate::query::ast::{AggOp, AggregateDescriptor};
use crate::query::tree::{AggregateValue, ResultTree};
use crate::query::validate::{aggregations_of, AggMap, GroupFields};
use crate::query::value::{coerce_for, Scalar, FIELD_HKEY, FIELD_ID};
use crate::store::Store;
use crate::types::{HKey, Record};

/// Replaces every [`ResultTree::Marked`] node under an aggregated index with
/// its reduced values, interposing group-by levels where requested.
pub(crate) struct Aggregator<'a, S: Store + ?Sized> {
    store: &'a S,
    aggs: &'a AggMap,
    groups: &'a GroupFields,
}

impl<'a, S: Store + ?Sized> Aggregator<'a, S> {
    pub(crate) fn new(store: &'a S, aggs: &'a AggMap, groups: &'a GroupFields) -> Self {
        Self {
            store,
            aggs,
            groups,
        }
    }

    /// Walks a node sitting under index `index`.
    pub(crate) fn walk(&self, node: ResultTree, index: &str) -> ResultTree {
        match node {
            ResultTree::Marked(keys) => match aggregations_of(self.aggs, index) {
                Some(descriptors) => self.reduce(&keys, index, descriptors),
                None => ResultTree::Marked(keys),
            },
            ResultTree::Branch(children) => ResultTree::Branch(
                children
                    .into_iter()
                    .map(|(key, sub)| (key, self.walk_key(sub)))
                    .collect(),
            ),
            other => other,
        }
    }

    fn walk_key(&self, node: ResultTree) -> ResultTree {
        match node {
            ResultTree::Branch(children) => ResultTree::Branch(
                children
                    .into_iter()
                    .map(|(index, sub)| {
                        let walked = self.walk(sub, &index);
                        (index, walked)
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn reduce(&self, keys: &BTreeSet<HKey>, index: &str, descriptors: &[AggregateDescriptor]) -> ResultTree {
        let group_fields: &[String] = self
            .groups
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut groups: Vec<(Vec<Option<String>>, Accumulator)> = Vec::new();

        for key in keys {
            let Some(record) = self.store.read(key) else {
                continue;
            };
            let group_key: Vec<Option<String>> = group_fields
                .iter()
                .map(|f| field_value(record, key, f))
                .collect();
            let slot = match groups.iter().position(|(k, _)| *k == group_key) {
                Some(pos) => pos,
                None => {
                    groups.push((group_key, Accumulator::new(descriptors.len())));
                    groups.len() - 1
                }
            };
            groups[slot].1.add(record, key, descriptors);
        }

        if group_fields.is_empty() {
            let acc = groups
                .pop()
                .map(|(_, acc)| acc)
                .unwrap_or_else(|| Accumulator::new(descriptors.len()));
            return ResultTree::Aggregate(acc.finish(index, descriptors));
        }

        let rows = groups
            .into_iter()
            .map(|(values, acc)| (values, acc.finish(index, descriptors)))
            .collect();
        nest_groups(group_fields, rows)
    }
}

fn field_value(record: &Record, key: &HKey, field: &str) -> Option<String> {
    match field {
        FIELD_ID => Some(key.id().to_owned()),
        FIELD_HKEY => Some(key.to_string()),
        _ => record.get(field).cloned(),
    }
}

fn nest_groups(fields: &[String], rows: Vec<(Vec<Option<String>>, Vec<AggregateValue>)>) -> ResultTree {
    let Some((field, rest)) = fields.split_first() else {
        let values = rows.into_iter().next().map(|(_, v)| v).unwrap_or_default();
        return ResultTree::Aggregate(values);
    };

    let mut buckets: Vec<(Option<String>, Vec<(Vec<Option<String>>, Vec<AggregateValue>)>)> = Vec::new();
    for (mut values, reduced) in rows {
        let head = if values.is_empty() { None } else { values.remove(0) };
        match buckets.iter_mut().find(|(v, _)| *v == head) {
            Some((_, bucket)) => bucket.push((values, reduced)),
            None => buckets.push((head, vec![(values, reduced)])),
        }
    }

    ResultTree::Group {
        field: field.clone(),
        buckets: buckets
            .into_iter()
            .map(|(value, rows)| (value, nest_groups(rest, rows)))
            .collect(),
    }
}

/// Collected values of one group.
struct Accumulator {
    entries: usize,
    values: Vec<Vec<Scalar>>,
}

impl Accumulator {
    fn new(slots: usize) -> Self {
        Self {
            entries: 0,
            values: vec![Vec::new(); slots],
        }
    }

    fn add(&mut self, record: &Record, key: &HKey, descriptors: &[AggregateDescriptor]) {
        self.entries += 1;
        for (slot, descriptor) in descriptors.iter().enumerate() {
            if descriptor.is_wildcard() {
                continue;
            }
            if let Some(raw) = field_value(record, key, &descriptor.field) {
                self.values[slot].push(coerce_for(&descriptor.field, &raw));
            }
        }
    }

    fn finish(self, index: &str, descriptors: &[AggregateDescriptor]) -> Vec<AggregateValue> {
        descriptors
            .iter()
            .zip(&self.values)
            .map(|(descriptor, values)| AggregateValue {
                label: descriptor.label(index),
                value: if descriptor.is_wildcard() {
                    Some(self.entries.to_string())
                } else {
                    reduce_values(descriptor.op, values)
                },
            })
            .collect()
    }
}

/// Reduces non-null values. `None` when nothing applicable was collected.
pub(crate) fn reduce_values(op: AggOp, values: &[Scalar]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    match op {
        AggOp::Count => {
            let distinct: HashSet<String> = values.iter().map(Scalar::distinct_key).collect();
            Some(distinct.len().to_string())
        }
        AggOp::Sum => sum(values).map(|s| s.to_string()),
        AggOp::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(Scalar::as_f64).collect();
            if numbers.is_empty() {
                return None;
            }
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            Some(format!("{mean:.2}"))
        }
        AggOp::Min => extreme(values, |a, b| a.total_cmp(b).is_lt()),
        AggOp::Max => extreme(values, |a, b| a.total_cmp(b).is_gt()),
    }
}

fn sum(values: &[Scalar]) -> Option<Scalar> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut seen = false;
    for value in values {
        match value {
            Scalar::Int(v) => {
                seen = true;
                int_total = int_total.and_then(|t| t.checked_add(*v));
                float_total += *v as f64;
            }
            Scalar::Float(v) => {
                seen = true;
                int_total = None;
                float_total += v;
            }
            Scalar::Str(_) => {}
        }
    }
    if !seen {
        return None;
    }
    Some(match int_total {
        Some(total) => Scalar::Int(total),
        None => Scalar::Float(float_total),
    })
}

fn extreme(values: &[Scalar], better: impl Fn(&Scalar, &Scalar) -> bool) -> Option<String> {
    let any_number = values.iter().any(Scalar::is_number);
    values
        .iter()
        .filter(|v| v.is_number() == any_number)
        .fold(None::<&Scalar>, |best, v| match best {
            Some(b) if !better(v, b) => Some(b),
            _ => Some(v),
        })
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::value::coerce_number;
    use crate::store::MemStore;

    fn scalars(raw: &[&str]) -> Vec<Scalar> {
        raw.iter().map(|r| coerce_number(r)).collect()
    }

    #[test]
    fn reductions_over_numbers() {
        let values = scalars(&["10", "20", "30"]);
        assert_eq!(reduce_values(AggOp::Sum, &values).as_deref(), Some("60"));
        assert_eq!(reduce_values(AggOp::Avg, &values).as_deref(), Some("20.00"));
        assert_eq!(reduce_values(AggOp::Min, &values).as_deref(), Some("10"));
        assert_eq!(reduce_values(AggOp::Max, &values).as_deref(), Some("30"));
        assert_eq!(reduce_values(AggOp::Count, &values).as_deref(), Some("3"));
    }

    #[test]
    fn count_is_distinct() {
        let values = scalars(&["10", "10.0", "20"]);
        assert_eq!(reduce_values(AggOp::Count, &values).as_deref(), Some("2"));
    }

    #[test]
    fn floats_and_strings() {
        assert_eq!(
            reduce_values(AggOp::Sum, &scalars(&["1.5", "2"])).as_deref(),
            Some("3.5")
        );
        assert_eq!(
            reduce_values(AggOp::Max, &scalars(&["pear", "apple"])).as_deref(),
            Some("pear")
        );
        assert_eq!(
            reduce_values(AggOp::Min, &scalars(&["pear", "3"])).as_deref(),
            Some("3")
        );
        assert_eq!(reduce_values(AggOp::Sum, &scalars(&["pear"])), None);
        assert_eq!(reduce_values(AggOp::Avg, &[]), None);
    }

    #[test]
    fn groups_nest_by_field_value() {
        let mut store = MemStore::new();
        for (id, status, amount) in [("o1", "paid", "10"), ("o2", "paid", "5"), ("o3", "open", "1")] {
            store.insert(HKey::new("orders", id), [("status", status), ("amount", amount)]);
        }
        let aggs: AggMap = vec![(
            "orders".into(),
            vec![AggregateDescriptor::new(AggOp::Sum, "amount")],
        )];
        let groups = GroupFields::from([("orders".to_owned(), vec!["status".to_owned()])]);
        let aggregator = Aggregator::new(&store, &aggs, &groups);
        let tree = aggregator.walk(ResultTree::Marked(store.index_keys("orders")), "orders");

        let ResultTree::Group { field, buckets } = tree else {
            panic!("expected group node");
        };
        assert_eq!(field, "status");
        let paid = buckets
            .iter()
            .find(|(v, _)| v.as_deref() == Some("paid"))
            .map(|(_, t)| t)
            .unwrap();
        assert_eq!(paid.aggregate_value("orders:sum:amount"), Some(Some("15")));
    }
}
