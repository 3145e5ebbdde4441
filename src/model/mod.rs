//! Query/report data model and the stack trace tree.
//!
//! This module defines:
//! - The closed set of query and report kinds
//! - The weighted call tree with its wire form and merger
//! - Collapsed stack views used for output

pub mod collapsed;
pub mod query;
pub mod tree;

// Re-export main types
pub use collapsed::{build_collapsed_stacks, CollapsedStack};
pub use query::{
    InvokeRequest, LabelMatcher, LabelNamesQuery, LabelNamesReport, LabelValuesQuery,
    LabelValuesReport, MatchOp, Query, QueryKind, Report, ReportKind, TreeQuery, TreeReport,
};
pub use tree::{Node, Tree, TreeMerger};
