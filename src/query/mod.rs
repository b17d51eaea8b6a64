#![forbid(unsafe_code)]

//! Query engine over an indexed record store.
//!
//! A query names a root (index or key) and a list of compact expressions.
//! The engine parses them, picks a primary index to drive resolution,
//! intersects condition matches, and returns either the resolved root keys or
//! a nested result tree with optional aggregations.

/// Group-by and reduction of aggregated result nodes.
pub(crate) mod aggregate;

/// Parsed expression representation.
///
/// Conditions form a tree of `All`/`Any` groups over leaf comparisons.
pub mod ast;

/// Index-pair relationship classification by sampling.
pub mod cardinality;

/// Routing of raw expressions to their index context.
pub mod dispatch;

/// Error types surfaced by parsing and execution.
pub mod errors;

/// Leaf condition evaluation against stored text values.
pub mod eval;

/// Query execution engine.
pub mod executor;

/// Compact expression grammar.
pub mod parser;

/// Primary-index selection heuristics.
pub mod planner;

/// Per-phase timing counters.
pub mod profile;

/// Root token suffixes and condition-driven key resolution.
pub mod resolver;

/// Result tree and its serialized shape.
pub mod tree;

/// Field justification checks.
pub mod validate;

/// Scalar coercion and comparison of stored text.
pub mod value;

pub use ast::{AggOp, AggregateDescriptor, CondOp, CondValue, Condition, Expression, SortDirection, SortSpec};
pub use cardinality::{Cardinality, CardinalityCache};
pub use errors::{ErrorKind, ParseError, QueryError, QueryErrorWithCode, Result};
pub use executor::{EngineConfig, FieldSelection, FieldSelections, QueryEngine, QueryOutput, QueryTree};
pub use parser::{DslParser, ExpressionParser};
pub use tree::{AggregateValue, ResultTree, AGGREGATE_MARKER};
