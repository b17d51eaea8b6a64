//! Query engine for an indexed record store.
//!
//! Records live in named indexes and reference each other across indexes.
//! [`query::QueryEngine`] resolves compact filter, projection and aggregation
//! expressions against any [`store::Store`] and returns nested result trees.

#![warn(missing_docs)]

pub mod cli;
pub mod query;
pub mod store;
pub mod types;

pub use query::{EngineConfig, QueryEngine, QueryError, QueryOutput, ResultTree};
pub use store::{MemStore, Store, StoreSnapshot};
pub use types::{HKey, Record};
