//! Field justification and group-by derivation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::query::ast::{AggOp, AggregateDescriptor, Expression};
use crate::query::errors::{QueryError, Result};
use crate::query::value::is_virtual;

/// Aggregation descriptors per index, in order of first appearance.
pub type AggMap = Vec<(String, Vec<AggregateDescriptor>)>;

/// Group-by fields per aggregated index.
pub type GroupFields = BTreeMap<String, Vec<String>>;

pub(crate) fn aggregations_of<'a>(aggs: &'a AggMap, index: &str) -> Option<&'a [AggregateDescriptor]> {
    aggs.iter()
        .find(|(name, _)| name == index)
        .map(|(_, list)| list.as_slice())
}

/// Checks that every explicitly selected field is justified and derives the
/// group-by fields of aggregated indexes.
///
/// A field is explicit when no condition of its expression references it. On
/// a grouped index an explicit field becomes a group-by key and may be
/// undeclared. Elsewhere it must be declared, `*`, or virtual. An index is
/// grouped by any reduction except a lone `count:<field>`.
pub fn validate_fields(
    exprs: &[Expression],
    aggs: &AggMap,
    declared: &HashMap<String, BTreeSet<String>>,
) -> Result<GroupFields> {
    let condition_fields: BTreeSet<(&str, &str)> = exprs
        .iter()
        .flat_map(|e| e.condition_fields().into_iter().map(move |f| (e.index.as_str(), f)))
        .collect();

    let mut grouped = GroupFields::new();
    for expr in exprs {
        let index = expr.index.as_str();
        let is_grouped = aggregations_of(aggs, index).is_some_and(|list| {
            list.iter().any(|d| d.op != AggOp::Count || d.is_wildcard())
        });
        let fields = declared.get(index);
        let is_declared = |f: &str| fields.is_some_and(|set| set.contains(f));

        for field in &expr.fields {
            if condition_fields.contains(&(index, field.as_str())) {
                continue;
            }
            if is_grouped {
                let entry = grouped.entry(index.to_owned()).or_default();
                if !entry.contains(field) {
                    entry.push(field.clone());
                }
                if !is_declared(field) {
                    continue;
                }
            }
            if !is_declared(field) && field != "*" && !is_virtual(field) {
                return Err(QueryError::UnusedField {
                    index: index.to_owned(),
                    field: field.clone(),
                });
            }
        }
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::{DslParser, ExpressionParser};

    fn declared() -> HashMap<String, BTreeSet<String>> {
        HashMap::from([
            ("users".to_owned(), BTreeSet::from(["name".to_owned()])),
            (
                "orders".to_owned(),
                BTreeSet::from(["amount".to_owned(), "status".to_owned()]),
            ),
        ])
    }

    fn exprs(raw: &[&str]) -> Vec<Expression> {
        raw.iter().map(|r| DslParser.parse(r, None).unwrap()).collect()
    }

    #[test]
    fn undeclared_field_names_index_and_field() {
        let err = validate_fields(&exprs(&["users:nickname"]), &AggMap::new(), &declared())
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnusedField {
                index: "users".into(),
                field: "nickname".into()
            }
        );
        assert!(err.to_string().contains("users:nickname"));
    }

    #[test]
    fn condition_fields_are_not_explicit() {
        let grouped = validate_fields(
            &exprs(&["users:ghost=1", "users:name,*,@id"]),
            &AggMap::new(),
            &declared(),
        )
        .unwrap();
        assert!(grouped.is_empty());
    }

    #[test]
    fn grouped_index_collects_group_fields() {
        let aggs: AggMap = vec![(
            "orders".to_owned(),
            vec![AggregateDescriptor::new(AggOp::Sum, "amount")],
        )];
        let grouped = validate_fields(
            &exprs(&["orders:status,label,status"]),
            &aggs,
            &declared(),
        )
        .unwrap();
        assert_eq!(
            grouped.get("orders"),
            Some(&vec!["status".to_owned(), "label".to_owned()])
        );
    }

    #[test]
    fn field_count_alone_does_not_group() {
        let count_field: AggMap = vec![(
            "orders".to_owned(),
            vec![AggregateDescriptor::new(AggOp::Count, "amount")],
        )];
        let grouped = validate_fields(&exprs(&["orders:status"]), &count_field, &declared()).unwrap();
        assert!(grouped.is_empty());

        let err = validate_fields(&exprs(&["orders:label"]), &count_field, &declared()).unwrap_err();
        assert!(matches!(err, QueryError::UnusedField { .. }));

        let count_all: AggMap = vec![(
            "orders".to_owned(),
            vec![AggregateDescriptor::new(AggOp::Count, "*")],
        )];
        let grouped = validate_fields(&exprs(&["orders:status"]), &count_all, &declared()).unwrap();
        assert_eq!(grouped.get("orders"), Some(&vec!["status".to_owned()]));
    }
}
