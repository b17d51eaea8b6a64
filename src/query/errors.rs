#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the query engine.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Syntax error raised by an expression parser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error in `{input}` at {position}: {reason}")]
pub struct ParseError {
    /// Raw expression text.
    pub input: String,
    /// Byte offset of the offending item.
    pub position: usize,
    /// Human readable reason.
    pub reason: String,
}

impl ParseError {
    /// Error at byte `position` of `input`.
    pub fn new(input: &str, position: usize, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_owned(),
            position,
            reason: reason.into(),
        }
    }
}

/// Coarse classification of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed expression syntax.
    Parse,
    /// The query itself is invalid.
    Definition,
    /// The query is valid but nothing matched.
    NoData,
}

/// Errors terminating a query call.
///
/// Definition errors carry enough context to name the offending token, field
/// or index. [`QueryError::NoData`] is not a malfunction: it signals a
/// structurally valid query with an empty result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Surfaced unchanged from the parser.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Root suffix carried a non-numeric or non-positive limit.
    #[error("invalid limit: `{token}`")]
    InvalidLimit { token: String },
    /// Root token is neither an index nor an existing key.
    #[error("`{token}`, no such index or hkey")]
    UnknownRoot { token: String },
    /// A virtual-field condition named a key that does not exist.
    #[error("`{key}`, no such hkey")]
    UnknownKey { key: String },
    /// Selected field is neither declared nor justified by a filter or grouping.
    #[error(
        "field `{index}:{field}` is not used in any condition or aggregation; \
         remove it from the query or use it as a filter like `{index}:{field}=value`"
    )]
    UnusedField { index: String, field: String },
    /// Condition on an unknown pseudo-field.
    #[error("unknown virtual field `{field}`")]
    UnknownVirtualField { field: String },
    /// Virtual fields only support inclusion and exclusion.
    #[error("`{op}` not supported for virtual field `{field}`")]
    VirtualFieldOperator { op: &'static str, field: String },
    /// The aggregation target cannot be reached from the root index.
    #[error("{}", unresolved_message(.index, .aggregates, .root, .alternatives))]
    UnresolvedAggregate {
        index: String,
        aggregates: String,
        root: String,
        alternatives: Vec<String>,
    },
    /// A primary key lacks references toward a selected index.
    #[error("no references: `{from}` → `{to}`")]
    MissingReferences { from: String, to: String },
    /// Root key listing cannot be combined with aggregations.
    #[error("aggregation not supported when listing root keys")]
    AggregationWithKeys,
    /// Valid query, empty result.
    #[error("{message}")]
    NoData { message: String },
}

fn unresolved_message(index: &str, aggregates: &str, root: &str, alternatives: &[String]) -> String {
    let mut msg = format!("`{index}:@[{aggregates}]` cannot be resolved from root index `{root}`.");
    if alternatives.is_empty() {
        msg.push_str("\nNo alternative root index could resolve the aggregate target.");
        if aggregates.contains("count") {
            msg.push_str(
                "\nHint: aggregations like `@[count:*]` require traversing a valid path from the root index.",
            );
        }
    } else {
        msg.push_str(&format!(
            "\nTry using one of the following as the root index: {}.",
            alternatives.join(", ")
        ));
    }
    msg
}

impl QueryError {
    /// Builds the generic "nothing matched" signal.
    pub fn no_data() -> Self {
        QueryError::NoData {
            message: "No data.".to_owned(),
        }
    }

    /// Builds the no-data signal for an aggregation target without matches.
    pub fn no_aggregate_data(index: &str) -> Self {
        QueryError::NoData {
            message: format!("No `{index}` data found."),
        }
    }

    /// Coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Parse(_) => ErrorKind::Parse,
            QueryError::NoData { .. } => ErrorKind::NoData,
            _ => ErrorKind::Definition,
        }
    }

    /// Returns true for the empty-result signal.
    pub fn is_no_data(&self) -> bool {
        self.kind() == ErrorKind::NoData
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Parse(_) => "ParseError",
            QueryError::InvalidLimit { .. } => "InvalidLimit",
            QueryError::UnknownRoot { .. } => "UnknownRoot",
            QueryError::UnknownKey { .. } => "UnknownKey",
            QueryError::UnusedField { .. } => "UnusedField",
            QueryError::UnknownVirtualField { .. } => "UnknownVirtualField",
            QueryError::VirtualFieldOperator { .. } => "UnsupportedOperator",
            QueryError::UnresolvedAggregate { .. } => "UnresolvedAggregate",
            QueryError::MissingReferences { .. } => "MissingReferences",
            QueryError::AggregationWithKeys => "AggregationWithKeys",
            QueryError::NoData { .. } => "NoData",
        }
    }
}

/// Formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
