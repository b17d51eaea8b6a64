//! Root token parsing and condition-driven key-set resolution.

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::query::ast::{CondOp, CondValue, Condition, Expression};
use crate::query::errors::{QueryError, Result};
use crate::query::eval::eval_condition;
use crate::query::value::{is_virtual, FIELD_HKEY, FIELD_ID};
use crate::store::Store;
use crate::types::HKey;

/// Ordering requested by the root token suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootOrder {
    /// Ascending by key.
    Sorted,
    /// Shuffled.
    Random,
}

/// Root token with its `?!N`, `??` or `!N` suffix split off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootSpec {
    /// Index name or key without the suffix.
    pub token: String,
    /// Key ordering before the limit applies.
    pub order: RootOrder,
    /// Maximum number of root keys.
    pub limit: Option<usize>,
}

impl RootSpec {
    /// Splits the ordering and limit suffix off `raw`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (token, order, limit) = if let Some((token, limit)) = raw.split_once("?!") {
            (token.to_owned(), RootOrder::Random, Some(limit))
        } else if raw.contains("??") {
            (raw.replace("??", ""), RootOrder::Random, None)
        } else if let Some((token, limit)) = raw.split_once('!') {
            (token.to_owned(), RootOrder::Sorted, Some(limit))
        } else {
            (raw.to_owned(), RootOrder::Sorted, None)
        };

        let limit = match limit {
            None => None,
            Some(text) => match text.trim().parse::<usize>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(QueryError::InvalidLimit {
                        token: if text.is_empty() { " ".to_owned() } else { text.to_owned() },
                    })
                }
            },
        };
        Ok(Self {
            token,
            order,
            limit,
        })
    }

    /// Returns true for `?!N` and `??`.
    pub fn is_random(&self) -> bool {
        self.order == RootOrder::Random
    }
}

/// Matching keys per index.
pub type ConditionMatches = HashMap<String, BTreeSet<HKey>>;

/// Evaluates conditions against the store, one index at a time.
pub(crate) struct ConditionMatcher<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> ConditionMatcher<'a, S> {
    pub(crate) fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Intersects every condition of every expression within its index.
    pub(crate) fn matches(&self, exprs: &[&Expression]) -> Result<ConditionMatches> {
        let mut matches = ConditionMatches::new();
        for expr in exprs {
            for cond in &expr.conditions {
                let found = match matches.get(&expr.index) {
                    Some(base) => self.filter(&expr.index, cond, base)?,
                    None => self.filter(&expr.index, cond, &self.store.index_keys(&expr.index))?,
                };
                trace!(index = %expr.index, matched = found.len(), "query.condition");
                matches.insert(expr.index.clone(), found);
            }
        }
        Ok(matches)
    }

    /// Keys of `base` satisfying `cond`.
    pub(crate) fn filter(&self, index: &str, cond: &Condition, base: &BTreeSet<HKey>) -> Result<BTreeSet<HKey>> {
        if base.is_empty() {
            return Ok(BTreeSet::new());
        }
        match cond {
            Condition::Leaf { field, op, value } if is_virtual(field) => {
                self.filter_virtual(index, field, *op, value, base)
            }
            Condition::Leaf { field, op, value } => Ok(base
                .iter()
                .filter(|key| {
                    self.store.read(key).is_some_and(|record| {
                        eval_condition(*op, record.get(field).map(String::as_str), value, field)
                    })
                })
                .cloned()
                .collect()),
            Condition::All { conditions } => {
                let mut current = base.clone();
                for child in conditions {
                    current = self.filter(index, child, &current)?;
                }
                Ok(current)
            }
            Condition::Any { conditions } => {
                let mut union = BTreeSet::new();
                for child in conditions {
                    union.extend(self.filter(index, child, base)?);
                }
                Ok(union)
            }
        }
    }

    fn filter_virtual(
        &self,
        index: &str,
        field: &str,
        op: CondOp,
        value: &CondValue,
        base: &BTreeSet<HKey>,
    ) -> Result<BTreeSet<HKey>> {
        let keeps = match (op, value) {
            (CondOp::Eq, _) | (CondOp::In, CondValue::List(_)) => true,
            (CondOp::Ne, _) | (CondOp::NotIn, CondValue::List(_)) => false,
            (other, _) => {
                return Err(QueryError::VirtualFieldOperator {
                    op: other.symbol(),
                    field: field.to_owned(),
                })
            }
        };
        let mut listed = BTreeSet::new();
        for value in value.values() {
            let raw = match field {
                FIELD_ID => HKey::new(index, value).to_string(),
                FIELD_HKEY => value.clone(),
                _ => {
                    return Err(QueryError::UnknownVirtualField {
                        field: field.to_owned(),
                    })
                }
            };
            let key = HKey::parse(&raw)
                .filter(|_| self.store.key_exists(&raw))
                .ok_or_else(|| QueryError::UnknownKey { key: raw.clone() })?;
            listed.insert(key);
        }

        if keeps {
            Ok(base.intersection(&listed).cloned().collect())
        } else {
            Ok(base.difference(&listed).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::{DslParser, ExpressionParser};
    use crate::store::MemStore;

    fn store() -> MemStore {
        let mut store = MemStore::new();
        for (id, name, age) in [("u1", "ada", "36"), ("u2", "alan", "41"), ("u3", "grace", "85")] {
            store.insert(HKey::new("users", id), [("name", name), ("age", age)]);
        }
        store
    }

    fn matched(store: &MemStore, raw: &str) -> Result<Vec<String>> {
        let expr = DslParser.parse(raw, None).unwrap();
        let matches = ConditionMatcher::new(store).matches(&[&expr])?;
        Ok(matches
            .get("users")
            .map(|keys| keys.iter().map(|k| k.id().to_owned()).collect())
            .unwrap_or_default())
    }

    #[test]
    fn root_suffixes() {
        let spec = RootSpec::parse("orders!5").unwrap();
        assert_eq!((spec.token.as_str(), spec.order, spec.limit), ("orders", RootOrder::Sorted, Some(5)));
        let spec = RootSpec::parse("orders?!5").unwrap();
        assert_eq!((spec.order, spec.limit), (RootOrder::Random, Some(5)));
        let spec = RootSpec::parse("orders??").unwrap();
        assert_eq!((spec.token.as_str(), spec.order, spec.limit), ("orders", RootOrder::Random, None));
        assert_eq!(RootSpec::parse("users:u1").unwrap().limit, None);
    }

    #[test]
    fn rejects_bad_limits() {
        for raw in ["orders!0", "orders!x", "orders?!-1", "orders!"] {
            assert!(matches!(
                RootSpec::parse(raw),
                Err(QueryError::InvalidLimit { .. })
            ));
        }
        assert_eq!(
            RootSpec::parse("orders!abc").unwrap_err().to_string(),
            "invalid limit: `abc`"
        );
    }

    #[test]
    fn conditions_intersect_within_index() {
        let s = store();
        assert_eq!(matched(&s, "users:name^a,age>40").unwrap(), vec!["u2"]);
        assert_eq!(matched(&s, "users:name=ada|age>=85").unwrap(), vec!["u1", "u3"]);
    }

    #[test]
    fn virtual_fields_resolve_keys() {
        let s = store();
        assert_eq!(matched(&s, "users:@id=[u1,u3]").unwrap(), vec!["u1", "u3"]);
        assert_eq!(matched(&s, "users:@hkey!=users:u1").unwrap(), vec!["u2", "u3"]);
        assert!(matches!(
            matched(&s, "users:@id=u9"),
            Err(QueryError::UnknownKey { .. })
        ));
        assert!(matches!(
            matched(&s, "users:@id^u"),
            Err(QueryError::VirtualFieldOperator { op: "^", .. })
        ));
        assert!(matches!(
            matched(&s, "users:@id%u1u2"),
            Err(QueryError::VirtualFieldOperator { op: "%", .. })
        ));
    }

    #[test]
    fn value_inside_operand_text() {
        let s = store();
        assert_eq!(matched(&s, "users:name%ada lovelace").unwrap(), vec!["u1"]);
        assert_eq!(matched(&s, "users:name%grace hopper").unwrap(), vec!["u3"]);
        assert_eq!(matched(&s, "users:name!%grace hopper").unwrap(), vec!["u1", "u2"]);
    }

    #[test]
    fn tombstoned_records_never_match() {
        let mut s = store();
        s.tombstone(&HKey::new("users", "u1"));
        assert_eq!(matched(&s, "users:name!=zzz").unwrap(), vec!["u2", "u3"]);
    }
}
