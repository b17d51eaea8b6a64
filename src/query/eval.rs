//! Leaf predicate evaluation.

use crate::query::ast::{CondOp, CondValue};
use crate::query::value::{coerce_for, is_numeric, Scalar};

/// Evaluates one leaf predicate against a record's field value.
///
/// Ordering operators require numeric text on both sides and are false
/// otherwise. Equality coerces both sides to numbers unless `field` is virtual.
/// String operators look at the raw stored text. A missing field satisfies
/// only the negated operators.
pub fn eval_condition(op: CondOp, field_value: Option<&str>, value: &CondValue, field: &str) -> bool {
    let Some(raw) = field_value else {
        return op.is_negated();
    };

    match (op, value) {
        (CondOp::Gt | CondOp::Ge | CondOp::Lt | CondOp::Le, CondValue::Scalar(cond)) => {
            compare_numbers(op, raw, cond)
        }
        (CondOp::Eq, CondValue::Scalar(cond)) => coerce_for(field, raw) == coerce_for(field, cond),
        (CondOp::Ne, CondValue::Scalar(cond)) => coerce_for(field, raw) != coerce_for(field, cond),
        (CondOp::StartsWith, CondValue::Scalar(cond)) => raw.starts_with(cond.as_str()),
        (CondOp::NotStartsWith, CondValue::Scalar(cond)) => !raw.starts_with(cond.as_str()),
        (CondOp::EndsWith, CondValue::Scalar(cond)) => raw.ends_with(cond.as_str()),
        (CondOp::NotEndsWith, CondValue::Scalar(cond)) => !raw.ends_with(cond.as_str()),
        (CondOp::Contains, CondValue::Scalar(cond)) => raw.contains(cond.as_str()),
        (CondOp::NotContains, CondValue::Scalar(cond)) => !raw.contains(cond.as_str()),
        (CondOp::In, CondValue::Scalar(cond)) => cond.contains(raw),
        (CondOp::NotIn, CondValue::Scalar(cond)) => !cond.contains(raw),
        (CondOp::In, CondValue::List(values)) => is_member(raw, values, field),
        (CondOp::NotIn, CondValue::List(values)) => !is_member(raw, values, field),
        (_, CondValue::List(_)) => false,
    }
}

fn compare_numbers(op: CondOp, raw: &str, cond: &str) -> bool {
    if !is_numeric(raw) || !is_numeric(cond) {
        return false;
    }
    let (Ok(lhs), Ok(rhs)) = (raw.trim().parse::<f64>(), cond.trim().parse::<f64>()) else {
        return false;
    };
    match op {
        CondOp::Gt => lhs > rhs,
        CondOp::Ge => lhs >= rhs,
        CondOp::Lt => lhs < rhs,
        CondOp::Le => lhs <= rhs,
        _ => false,
    }
}

fn is_member(raw: &str, candidates: &[String], field: &str) -> bool {
    let needle: Scalar = coerce_for(field, raw);
    candidates
        .iter()
        .any(|candidate| coerce_for(field, candidate) == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(v: &str) -> CondValue {
        CondValue::Scalar(v.to_owned())
    }

    #[test]
    fn ordering_requires_numbers() {
        assert!(eval_condition(CondOp::Gt, Some("20"), &scalar("10"), "amount"));
        assert!(eval_condition(CondOp::Le, Some("10.0"), &scalar("10"), "amount"));
        assert!(!eval_condition(CondOp::Gt, Some("abc"), &scalar("10"), "amount"));
        assert!(!eval_condition(CondOp::Lt, Some("5"), &scalar("ten"), "amount"));
    }

    #[test]
    fn equality_coerces_numbers() {
        assert!(eval_condition(CondOp::Eq, Some("100"), &scalar("100.0"), "amount"));
        assert!(eval_condition(CondOp::Ne, Some("100"), &scalar("101"), "amount"));
        assert!(eval_condition(CondOp::Eq, Some("ada"), &scalar("ada"), "name"));
    }

    #[test]
    fn virtual_fields_compare_raw_text() {
        assert!(!eval_condition(CondOp::Eq, Some("007"), &scalar("7"), "@id"));
        assert!(eval_condition(CondOp::Eq, Some("007"), &scalar("7"), "code"));
    }

    #[test]
    fn string_operators() {
        let name = Some("grace hopper");
        assert!(eval_condition(CondOp::StartsWith, name, &scalar("grace"), "name"));
        assert!(eval_condition(CondOp::NotStartsWith, name, &scalar("ada"), "name"));
        assert!(eval_condition(CondOp::EndsWith, name, &scalar("hopper"), "name"));
        assert!(!eval_condition(CondOp::NotEndsWith, name, &scalar("hopper"), "name"));
        assert!(eval_condition(CondOp::Contains, name, &scalar("ce ho"), "name"));
        assert!(eval_condition(CondOp::NotContains, name, &scalar("xyz"), "name"));
    }

    #[test]
    fn scalar_in_tests_containment_in_operand() {
        let text = scalar("ada lovelace");
        assert!(eval_condition(CondOp::In, Some("ada"), &text, "name"));
        assert!(eval_condition(CondOp::In, Some("love"), &text, "name"));
        assert!(!eval_condition(CondOp::In, Some("grace"), &text, "name"));
        assert!(eval_condition(CondOp::NotIn, Some("grace"), &text, "name"));
        assert!(!eval_condition(CondOp::NotIn, Some("lace"), &text, "name"));
    }

    #[test]
    fn membership() {
        let list = CondValue::List(vec!["10".into(), "red".into()]);
        assert!(eval_condition(CondOp::In, Some("10.0"), &list, "v"));
        assert!(eval_condition(CondOp::In, Some("red"), &list, "v"));
        assert!(eval_condition(CondOp::NotIn, Some("blue"), &list, "v"));
    }

    #[test]
    fn missing_field_only_satisfies_negations() {
        assert!(!eval_condition(CondOp::Eq, None, &scalar("x"), "f"));
        assert!(!eval_condition(CondOp::Contains, None, &scalar("x"), "f"));
        assert!(eval_condition(CondOp::Ne, None, &scalar("x"), "f"));
        assert!(eval_condition(
            CondOp::NotIn,
            None,
            &CondValue::List(vec!["x".into()]),
            "f"
        ));
    }
}
