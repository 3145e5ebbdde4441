//! Query execution and report aggregation.
//!
//! This module provides:
//! - The query type registry
//! - Execution contexts with cancellation and deadlines
//! - Local executors answering one query against one block
//! - Aggregators merging per-block reports

pub mod aggregator;
pub mod context;
pub mod labels;
pub mod registry;
pub mod tree;

// Re-export main types
pub use aggregator::Aggregator;
pub use context::{ExecContext, QueryContext};
pub use labels::{
    new_label_names_aggregator, new_label_values_aggregator, query_label_names, query_label_values,
    LabelNamesAggregator, LabelValuesAggregator,
};
pub use registry::{AggregatorFactory, QueryDescriptor, QueryFn, QueryRegistry};
pub use tree::{new_tree_aggregator, query_tree, TreeAggregator};
