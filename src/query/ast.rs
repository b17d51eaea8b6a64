//! Parsed expression descriptors consumed by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One parsed expression, bound to a single index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Index the expression belongs to.
    pub index: String,
    /// Selected field names in order of appearance, `*` included.
    pub fields: Vec<String>,
    /// Filter conditions, combined with AND.
    pub conditions: Vec<Condition>,
    /// Aggregation descriptors.
    pub aggregations: Vec<AggregateDescriptor>,
    /// Optional sort request.
    pub sort: Option<SortSpec>,
}

impl Expression {
    /// Creates an empty expression for `index`.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..Self::default()
        }
    }

    /// Returns true when any condition is present.
    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Field names referenced by conditions, flattened through combinators.
    pub fn condition_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for cond in &self.conditions {
            cond.collect_fields(&mut out);
        }
        out
    }
}

/// Filter predicate tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Single field comparison.
    Leaf {
        /// Compared field, possibly virtual.
        field: String,
        /// Comparison operator.
        op: CondOp,
        /// Right-hand operand.
        value: CondValue,
    },
    /// Every child must match.
    All { conditions: Vec<Condition> },
    /// At least one child must match.
    Any { conditions: Vec<Condition> },
}

impl Condition {
    /// Builds a leaf with a scalar operand.
    pub fn leaf(field: impl Into<String>, op: CondOp, value: impl Into<String>) -> Self {
        Condition::Leaf {
            field: field.into(),
            op,
            value: CondValue::Scalar(value.into()),
        }
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Leaf { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Condition::All { conditions } | Condition::Any { conditions } => {
                for cond in conditions {
                    cond.collect_fields(out);
                }
            }
        }
    }
}

/// Comparison operators.
///
/// `In`/`NotIn` test membership in a list operand. With a scalar operand they
/// test whether the field value occurs inside the operand text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `^`
    StartsWith,
    /// `!^`
    NotStartsWith,
    /// `$`
    EndsWith,
    /// `!$`
    NotEndsWith,
    /// `~`, operand occurs in the field value.
    Contains,
    /// `!~`
    NotContains,
    /// `%` or `=[..]`.
    In,
    /// `!%` or `!=[..]`.
    NotIn,
}

impl CondOp {
    /// Surface syntax of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            CondOp::Eq => "=",
            CondOp::Ne => "!=",
            CondOp::Gt => ">",
            CondOp::Ge => ">=",
            CondOp::Lt => "<",
            CondOp::Le => "<=",
            CondOp::StartsWith => "^",
            CondOp::NotStartsWith => "!^",
            CondOp::EndsWith => "$",
            CondOp::NotEndsWith => "!$",
            CondOp::Contains => "~",
            CondOp::NotContains => "!~",
            CondOp::In => "%",
            CondOp::NotIn => "!%",
        }
    }

    /// True for the excluding operators.
    pub fn is_negated(self) -> bool {
        matches!(
            self,
            CondOp::Ne
                | CondOp::NotStartsWith
                | CondOp::NotEndsWith
                | CondOp::NotContains
                | CondOp::NotIn
        )
    }

    /// True for `>`, `>=`, `<`, `<=`.
    pub fn is_ordering(self) -> bool {
        matches!(self, CondOp::Gt | CondOp::Ge | CondOp::Lt | CondOp::Le)
    }
}

impl fmt::Display for CondOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand operand of a leaf condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CondValue {
    /// Single value.
    Scalar(String),
    /// Bracketed value list.
    List(Vec<String>),
}

impl CondValue {
    /// Operand values as a slice.
    pub fn values(&self) -> &[String] {
        match self {
            CondValue::Scalar(v) => std::slice::from_ref(v),
            CondValue::List(vs) => vs,
        }
    }
}

/// Reduction functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggOp {
    /// Non-null values, or entries for `*`.
    Count,
    /// Numeric total.
    Sum,
    /// Numeric mean.
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
}

impl AggOp {
    /// Parses an operator name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggOp::Count),
            "sum" => Some(AggOp::Sum),
            "avg" => Some(AggOp::Avg),
            "min" => Some(AggOp::Min),
            "max" => Some(AggOp::Max),
            _ => None,
        }
    }

    /// Operator name.
    pub fn name(self) -> &'static str {
        match self {
            AggOp::Count => "count",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Min => "min",
            AggOp::Max => "max",
        }
    }
}

/// `op:field` aggregation request. `field == "*"` is only valid for `count`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateDescriptor {
    /// Reduction.
    pub op: AggOp,
    /// Reduced field, `*` for a plain count.
    pub field: String,
}

impl AggregateDescriptor {
    /// Descriptor reducing `field` with `op`.
    pub fn new(op: AggOp, field: impl Into<String>) -> Self {
        Self {
            op,
            field: field.into(),
        }
    }

    /// Returns true for `count:*`.
    pub fn is_wildcard(&self) -> bool {
        self.field == "*"
    }

    /// Result label, `index:op[:field]`.
    pub fn label(&self, index: &str) -> String {
        if self.is_wildcard() {
            format!("{index}:{}", self.op.name())
        } else {
            format!("{index}:{}:{}", self.op.name(), self.field)
        }
    }
}

impl fmt::Display for AggregateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op.name(), self.field)
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

/// Field used to order sibling keys when rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field compared between siblings.
    pub field: String,
    /// Ordering direction.
    pub direction: SortDirection,
}
