//! Profile Query Backend
//!
//! Execution core of a distributed query backend for profiling data stored
//! in partitioned, columnar blocks.
//!
//! A query is answered independently against each block by the executor
//! registered for its kind, producing a partial report; an aggregator merges
//! the partial reports of every block into the final answer. The reference
//! query kind builds a weighted call tree from raw samples.
//!
//! ## Getting Started
//!
//! ```ignore
//! use profile_query_backend::{InvokeRequest, Query, QueryBackend, QueryRegistry, TreeQuery};
//!
//! let registry = Arc::new(QueryRegistry::with_defaults());
//! let backend = QueryBackend::new(registry, BackendConfig::default());
//! let request = InvokeRequest::new(vec![Query::Tree(TreeQuery::default())]);
//! let response = backend.invoke(&request, &[&block_a, &block_b])?;
//! ```
//!
//! The `profile-query` binary wraps the same flow over JSON block fixtures.

pub mod backend;
pub mod block;
pub mod commands;
pub mod flamegraph;
pub mod model;
pub mod output;
pub mod query;
pub mod storage;
pub mod symbols;
pub mod utils;

pub use backend::{BlockFailure, InvokeResponse, QueryBackend};
pub use block::{BlockDataset, BlockFixture, MemoryBlock, Section};
pub use model::{
    InvokeRequest, LabelMatcher, Query, QueryKind, Report, ReportKind, Tree, TreeMerger, TreeQuery,
};
pub use query::{Aggregator, ExecContext, QueryContext, QueryRegistry};
pub use utils::config::BackendConfig;
