//! Query and report model.
//!
//! Every supported analytical query has one `Query` variant and one matching
//! `Report` variant. The set is closed: adding a query kind means adding a
//! variant here and registering it with the
//! [`QueryRegistry`](crate::query::QueryRegistry).

use crate::utils::config::DEFAULT_MAX_NODES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discriminant of a [`Query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Tree,
    LabelNames,
    LabelValues,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Tree => "QUERY_TREE",
            QueryKind::LabelNames => "QUERY_LABEL_NAMES",
            QueryKind::LabelValues => "QUERY_LABEL_VALUES",
        };
        f.write_str(name)
    }
}

/// Discriminant of a [`Report`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Tree,
    LabelNames,
    LabelValues,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportKind::Tree => "REPORT_TREE",
            ReportKind::LabelNames => "REPORT_LABEL_NAMES",
            ReportKind::LabelValues => "REPORT_LABEL_VALUES",
        };
        f.write_str(name)
    }
}

/// Weighted call tree query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeQuery {
    /// Maximum number of nodes in the returned tree (0 = unbounded)
    pub max_nodes: u64,
}

impl Default for TreeQuery {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelNamesQuery {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValuesQuery {
    pub label_name: String,
}

/// One analytical query of an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    Tree(TreeQuery),
    LabelNames(LabelNamesQuery),
    LabelValues(LabelValuesQuery),
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Tree(_) => QueryKind::Tree,
            Query::LabelNames(_) => QueryKind::LabelNames,
            Query::LabelValues(_) => QueryKind::LabelValues,
        }
    }
}

/// Partial (per block) or final tree result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeReport {
    /// Echo of the query that produced this report
    pub query: TreeQuery,

    /// Serialized tree, truncated to `query.max_nodes`
    pub tree: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelNamesReport {
    pub query: LabelNamesQuery,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValuesReport {
    pub query: LabelValuesQuery,
    pub values: Vec<String>,
}

/// Result of one query, either for one block or for the whole invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Tree(TreeReport),
    LabelNames(LabelNamesReport),
    LabelValues(LabelValuesReport),
}

impl Report {
    pub fn kind(&self) -> ReportKind {
        match self {
            Report::Tree(_) => ReportKind::Tree,
            Report::LabelNames(_) => ReportKind::LabelNames,
            Report::LabelValues(_) => ReportKind::LabelValues,
        }
    }
}

/// Label matching operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    Eq,
    NotEq,
}

/// Single label selector term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub name: String,
    pub value: String,
    pub op: MatchOp,
}

impl LabelMatcher {
    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            op: MatchOp::Eq,
        }
    }

    pub fn not_eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            op: MatchOp::NotEq,
        }
    }

    /// A missing label matches as the empty string
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(&self.name).map(String::as_str).unwrap_or("");
        match self.op {
            MatchOp::Eq => actual == self.value,
            MatchOp::NotEq => actual != self.value,
        }
    }
}

/// A batch of queries sharing one set of block filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub queries: Vec<Query>,

    /// Inclusive lower bound, unix milliseconds
    #[serde(default = "min_time")]
    pub start_time: i64,

    /// Exclusive upper bound, unix milliseconds
    #[serde(default = "max_time")]
    pub end_time: i64,

    #[serde(default)]
    pub label_selector: Vec<LabelMatcher>,
}

fn min_time() -> i64 {
    i64::MIN
}

fn max_time() -> i64 {
    i64::MAX
}

impl InvokeRequest {
    /// Request over the whole time range with no selector
    pub fn new(queries: Vec<Query>) -> Self {
        Self {
            queries,
            start_time: min_time(),
            end_time: max_time(),
            label_selector: Vec::new(),
        }
    }

    pub fn with_time_range(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.label_selector.push(matcher);
        self
    }

    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.label_selector.iter().all(|m| m.matches(labels))
    }

    /// `timestamp` is in nanoseconds, the range in milliseconds
    pub fn contains_nanos(&self, timestamp: i64) -> bool {
        let millis = timestamp.div_euclid(1_000_000);
        millis >= self.start_time && millis < self.end_time
    }
}
