//! `QUERY_TREE`: weighted call tree of the selected samples.

use super::aggregator::{expect_kind, Aggregator};
use super::context::QueryContext;
use crate::model::{
    InvokeRequest, Query, QueryKind, Report, ReportKind, Tree, TreeMerger, TreeQuery, TreeReport,
};
use crate::storage::{
    capture_close_error, profile_entry_iterator, RepeatedRow, RepeatedRowIterator, SampleColumns,
};
use crate::symbols::Resolver;
use crate::utils::error::{AggregateError, QueryError};
use log::debug;
use parking_lot::Mutex;
use std::sync::OnceLock;

/// **Public** - Answer a tree query against the block of `ctx`
///
/// Selects the profile rows matching the request, streams their
/// `(stack trace id, value)` samples into a [`Resolver`], resolves the
/// stacks against the symbol section and serializes the tree truncated to
/// `max_nodes`.
///
/// Every row group reader and symbol partition acquired along the way is
/// released before returning, on success and on error alike.
///
/// # Errors
/// * `QueryError::UnexpectedQuery` - `query` is not a tree query
/// * `QueryError::SchemaMismatch` - a required column is missing
/// * `QueryError::Storage` - a section is not loaded or a row group is unreadable
/// * `QueryError::Resolve` - a sampled stack cannot be symbolized
/// * `QueryError::Cancelled` / `QueryError::DeadlineExceeded`
pub fn query_tree(ctx: &QueryContext<'_>, query: &Query) -> Result<Report, QueryError> {
    let Query::Tree(tree_query) = query else {
        return Err(QueryError::UnexpectedQuery {
            expected: QueryKind::Tree,
            actual: query.kind(),
        });
    };

    // Step 1: Select matching rows
    let entries = profile_entry_iterator(ctx)?;

    // Step 2: Resolve sample columns
    let table = ctx.block.profiles()?;
    let columns = SampleColumns::resolve(table.schema())?;
    let symbols = ctx.block.symbols()?;

    // Step 3: Stream samples into the resolver
    let mut rows = RepeatedRowIterator::new(ctx.exec.clone(), entries, table, columns);
    let mut resolver = Resolver::new(ctx.exec.clone(), symbols);
    let ingested = ingest(&mut rows, &mut resolver);
    let closed = rows.close();
    let rows_read = capture_close_error(ingested, closed, "profile rows")?;

    // Step 4: Build and serialize the tree
    let tree = resolver.tree()?;
    resolver.release();

    debug!(
        "Block {}: {} rows -> {} nodes (total {})",
        ctx.block.meta().id,
        rows_read,
        tree.node_count(),
        tree.total()
    );

    Ok(Report::Tree(TreeReport {
        tree: tree.bytes(tree_query.max_nodes),
        query: tree_query.clone(),
    }))
}

fn ingest<I>(rows: &mut I, resolver: &mut Resolver<'_>) -> Result<usize, QueryError>
where
    I: Iterator<Item = Result<RepeatedRow, QueryError>>,
{
    let mut count = 0;
    for row in rows {
        let row = row?;
        resolver.add_samples(row.entry.partition, &row.stacktrace_ids, &row.values);
        count += 1;
    }
    Ok(count)
}

/// Merges tree reports
///
/// The first accepted report fixes `max_nodes` for the final tree. Reports
/// are decoded outside the lock; only the merge itself is serialized.
#[derive(Debug, Default)]
pub struct TreeAggregator {
    query: OnceLock<TreeQuery>,
    tree: Mutex<TreeMerger>,
}

impl TreeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query parameters captured from the first accepted report
    pub fn captured_query(&self) -> Option<&TreeQuery> {
        self.query.get()
    }
}

pub fn new_tree_aggregator(_request: &InvokeRequest) -> Box<dyn Aggregator> {
    Box::new(TreeAggregator::new())
}

impl Aggregator for TreeAggregator {
    fn aggregate(&self, report: &Report) -> Result<(), AggregateError> {
        let Report::Tree(report) = report else {
            return Err(AggregateError::UnexpectedReport {
                expected: ReportKind::Tree,
                actual: report.kind(),
            });
        };
        let tree = Tree::from_bytes(&report.tree)?;
        self.query.get_or_init(|| report.query.clone());
        self.tree.lock().merge_tree(tree);
        Ok(())
    }

    fn validate(&self, report: &Report) -> Result<(), AggregateError> {
        expect_kind(report, ReportKind::Tree)?;
        if let Report::Tree(report) = report {
            Tree::from_bytes(&report.tree)?;
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Report {
        let TreeAggregator { query, tree } = *self;
        let query = query.into_inner().unwrap_or_default();
        let tree = tree.into_inner().into_tree();
        Report::Tree(TreeReport {
            tree: tree.bytes(query.max_nodes),
            query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabelNamesQuery, LabelNamesReport};

    fn tree_report(frames: &[&str], value: u64, max_nodes: u64) -> Report {
        let mut tree = Tree::new();
        tree.insert_stack(frames, value);
        Report::Tree(TreeReport {
            query: TreeQuery { max_nodes },
            tree: tree.bytes(0),
        })
    }

    fn decode(report: Report) -> (TreeQuery, Tree) {
        match report {
            Report::Tree(r) => (r.query, Tree::from_bytes(&r.tree).unwrap()),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_build_without_reports_is_empty_tree() {
        let aggregator = new_tree_aggregator(&InvokeRequest::new(vec![]));
        let (query, tree) = decode(aggregator.build());
        assert_eq!(query, TreeQuery::default());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_first_report_parameters_win() {
        let aggregator = TreeAggregator::new();
        aggregator.aggregate(&tree_report(&["a"], 1, 5)).unwrap();
        aggregator.aggregate(&tree_report(&["b"], 1, 1)).unwrap();
        assert_eq!(aggregator.captured_query(), Some(&TreeQuery { max_nodes: 5 }));

        let (query, tree) = decode(Box::new(aggregator).build());
        assert_eq!(query.max_nodes, 5);
        assert_eq!(tree.total(), 2);
    }

    #[test]
    fn test_wrong_report_kind_rejected() {
        let aggregator = TreeAggregator::new();
        let result = aggregator.aggregate(&Report::LabelNames(LabelNamesReport {
            query: LabelNamesQuery {},
            names: vec![],
        }));
        assert!(matches!(
            result,
            Err(AggregateError::UnexpectedReport {
                expected: ReportKind::Tree,
                actual: ReportKind::LabelNames
            })
        ));
        assert!(aggregator.captured_query().is_none());
    }

    #[test]
    fn test_validate_matches_aggregate() {
        let aggregator = TreeAggregator::new();
        let garbage = Report::Tree(TreeReport {
            query: TreeQuery { max_nodes: 1 },
            tree: vec![0xff, 0xff],
        });
        let names = Report::LabelNames(LabelNamesReport {
            query: LabelNamesQuery {},
            names: vec![],
        });

        assert!(aggregator.validate(&tree_report(&["a"], 3, 0)).is_ok());
        assert!(matches!(aggregator.validate(&garbage), Err(AggregateError::Merge(_))));
        assert!(matches!(
            aggregator.validate(&names),
            Err(AggregateError::UnexpectedReport { .. })
        ));
        assert!(aggregator.captured_query().is_none());
        assert!(decode(Box::new(aggregator).build()).1.is_empty());
    }

    #[test]
    fn test_malformed_report_leaves_state_unchanged() {
        let aggregator = TreeAggregator::new();
        aggregator.aggregate(&tree_report(&["a"], 3, 0)).unwrap();
        let garbage = Report::Tree(TreeReport {
            query: TreeQuery { max_nodes: 1 },
            tree: vec![0xff, 0xff],
        });
        assert!(matches!(aggregator.aggregate(&garbage), Err(AggregateError::Merge(_))));

        let (query, tree) = decode(Box::new(aggregator).build());
        assert_eq!(query.max_nodes, 0);
        assert_eq!(tree.total(), 3);
    }
}
