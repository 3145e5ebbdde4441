//! Query type registry.
//!
//! Binds each query kind to its report kind, the local executor that answers
//! it against one block, the aggregator factory that merges per-block
//! reports, and the block sections the executor reads. The registry is built
//! once at start-up and is read-only afterwards, so it can be shared across
//! threads behind an `Arc` without locking.

use super::aggregator::Aggregator;
use super::context::QueryContext;
use super::{labels, tree};
use crate::block::Section;
use crate::model::{InvokeRequest, Query, QueryKind, Report, ReportKind};
use crate::utils::error::{QueryError, RegistryError};
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// Local executor: answers one query against the block of a context
pub type QueryFn = fn(&QueryContext<'_>, &Query) -> Result<Report, QueryError>;

/// Creates an empty aggregator for one invocation
pub type AggregatorFactory = fn(&InvokeRequest) -> Box<dyn Aggregator>;

/// Everything registered for one query kind
#[derive(Clone)]
pub struct QueryDescriptor {
    pub query_kind: QueryKind,
    pub report_kind: ReportKind,
    pub execute: QueryFn,
    pub new_aggregator: AggregatorFactory,
    sections: Vec<Section>,
}

impl QueryDescriptor {
    /// Block sections the executor reads, without duplicates
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}

impl fmt::Debug for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDescriptor")
            .field("query_kind", &self.query_kind)
            .field("report_kind", &self.report_kind)
            .field("sections", &self.sections)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: HashMap<QueryKind, QueryDescriptor>,
    reports: HashMap<ReportKind, QueryKind>,
}

impl QueryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// **Public** - Registry with every built-in query kind
    ///
    /// | Query | Report | Sections |
    /// |-------|--------|----------|
    /// | `QUERY_TREE` | `REPORT_TREE` | tsdb, profiles, symbols |
    /// | `QUERY_LABEL_NAMES` | `REPORT_LABEL_NAMES` | tsdb |
    /// | `QUERY_LABEL_VALUES` | `REPORT_LABEL_VALUES` | tsdb |
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert(
            QueryKind::Tree,
            ReportKind::Tree,
            tree::query_tree,
            tree::new_tree_aggregator,
            &[Section::Tsdb, Section::Profiles, Section::Symbols],
        );
        registry.insert(
            QueryKind::LabelNames,
            ReportKind::LabelNames,
            labels::query_label_names,
            labels::new_label_names_aggregator,
            &[Section::Tsdb],
        );
        registry.insert(
            QueryKind::LabelValues,
            ReportKind::LabelValues,
            labels::query_label_values,
            labels::new_label_values_aggregator,
            &[Section::Tsdb],
        );
        registry
    }

    /// **Public** - Register a query kind
    ///
    /// # Arguments
    /// * `query_kind` - Kind of query handled
    /// * `report_kind` - Kind of report the executor produces
    /// * `execute` - Local executor
    /// * `new_aggregator` - Aggregator factory
    /// * `sections` - Block sections the executor reads (duplicates are dropped)
    ///
    /// # Errors
    /// * `RegistryError::DuplicateQuery` - `query_kind` is already registered
    /// * `RegistryError::DuplicateReport` - another query already produces `report_kind`
    ///
    /// # Example
    /// ```ignore
    /// let mut registry = QueryRegistry::new();
    /// registry.register(
    ///     QueryKind::Tree,
    ///     ReportKind::Tree,
    ///     query_tree,
    ///     new_tree_aggregator,
    ///     &[Section::Tsdb, Section::Profiles, Section::Symbols],
    /// )?;
    /// ```
    pub fn register(
        &mut self,
        query_kind: QueryKind,
        report_kind: ReportKind,
        execute: QueryFn,
        new_aggregator: AggregatorFactory,
        sections: &[Section],
    ) -> Result<(), RegistryError> {
        if self.queries.contains_key(&query_kind) {
            return Err(RegistryError::DuplicateQuery(query_kind));
        }
        if self.reports.contains_key(&report_kind) {
            return Err(RegistryError::DuplicateReport(report_kind));
        }
        self.insert(query_kind, report_kind, execute, new_aggregator, sections);
        Ok(())
    }

    fn insert(
        &mut self,
        query_kind: QueryKind,
        report_kind: ReportKind,
        execute: QueryFn,
        new_aggregator: AggregatorFactory,
        sections: &[Section],
    ) {
        let mut unique = Vec::with_capacity(sections.len());
        for section in sections {
            if !unique.contains(section) {
                unique.push(*section);
            }
        }
        debug!(
            "Registered {} -> {} (sections: {:?})",
            query_kind, report_kind, unique
        );
        self.reports.insert(report_kind, query_kind);
        self.queries.insert(
            query_kind,
            QueryDescriptor {
                query_kind,
                report_kind,
                execute,
                new_aggregator,
                sections: unique,
            },
        );
    }

    /// # Errors
    /// * `RegistryError::Unsupported` - `kind` was never registered
    pub fn lookup(&self, kind: QueryKind) -> Result<&QueryDescriptor, RegistryError> {
        self.queries.get(&kind).ok_or(RegistryError::Unsupported(kind))
    }

    /// Descriptor of the query that produces `kind`
    pub fn lookup_report(&self, kind: ReportKind) -> Result<&QueryDescriptor, RegistryError> {
        self.reports
            .get(&kind)
            .and_then(|query| self.queries.get(query))
            .ok_or(RegistryError::UnsupportedReport(kind))
    }

    /// Union of the sections needed by `queries`, in catalog order
    ///
    /// # Errors
    /// * `RegistryError::Unsupported` - one of the queries is not registered
    pub fn required_sections(&self, queries: &[Query]) -> Result<Vec<Section>, RegistryError> {
        let mut needed = Vec::new();
        for query in queries {
            needed.extend_from_slice(self.lookup(query.kind())?.sections());
        }
        needed.sort();
        needed.dedup();
        Ok(needed)
    }

    /// Registered query kinds, sorted
    pub fn query_kinds(&self) -> Vec<QueryKind> {
        let mut kinds: Vec<QueryKind> = self.queries.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
