//! Scalar coercion shared by the condition evaluator and the aggregation engine.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// Prefix marking pseudo-fields such as `@id` and `@hkey`.
pub const VIRTUAL_PREFIX: char = '@';

/// Record id pseudo-field.
pub const FIELD_ID: &str = "@id";

/// Full key pseudo-field.
pub const FIELD_HKEY: &str = "@hkey";

/// Record value after numeric coercion.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Anything that did not parse as a number.
    Str(String),
}

impl Scalar {
    /// Numeric view of the value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Str(_) => None,
        }
    }

    /// Returns true for `Int` and `Float`.
    pub fn is_number(&self) -> bool {
        !matches!(self, Scalar::Str(_))
    }

    /// Key that collapses numerically equal values (`10` and `10.0`).
    pub(crate) fn distinct_key(&self) -> String {
        match self {
            Scalar::Int(v) => format!("n:{v}"),
            Scalar::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                format!("n:{}", *v as i64)
            }
            Scalar::Float(v) => format!("n:{v:?}"),
            Scalar::Str(s) => format!("s:{s}"),
        }
    }

    /// Total order used by `min`/`max`: numbers before strings.
    pub(crate) fn total_cmp(&self, other: &Scalar) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            (Scalar::Str(_), _) | (_, Scalar::Str(_)) => false,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v:?}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

/// Returns true when `raw` parses as a number.
pub fn is_numeric(raw: &str) -> bool {
    raw.trim().parse::<f64>().is_ok()
}

/// Converts `raw` to its natural numeric type, falling back to a string.
pub fn coerce_number(raw: &str) -> Scalar {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Scalar::Int(v);
    }
    match trimmed.parse::<f64>() {
        Ok(v) => Scalar::Float(v),
        Err(_) => Scalar::Str(raw.to_owned()),
    }
}

/// Returns true for pseudo-fields that are never coerced.
pub fn is_virtual(field: &str) -> bool {
    field.starts_with(VIRTUAL_PREFIX)
}

/// Coerces `raw` unless `field` is virtual.
pub fn coerce_for(field: &str, raw: &str) -> Scalar {
    if is_virtual(field) {
        Scalar::Str(raw.to_owned())
    } else {
        coerce_number(raw)
    }
}
