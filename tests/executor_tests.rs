use pretty_assertions::assert_eq;
use profile_query_backend::block::Section;
use profile_query_backend::model::{LabelNamesQuery, TreeReport};
use profile_query_backend::query::{new_tree_aggregator, query_tree};
use profile_query_backend::utils::config::{COLUMN_STACKTRACE_ID, COLUMN_VALUE, MAX_STACK_DEPTH};
use profile_query_backend::utils::error::{QueryError, ResolveError, StorageError};
use profile_query_backend::{
    BlockFixture, ExecContext, InvokeRequest, LabelMatcher, MemoryBlock, Query, QueryContext,
    Report, Tree, TreeQuery,
};

const SECOND: i64 = 1_000_000_000;

fn block() -> MemoryBlock {
    BlockFixture::new("block-a")
        .series(&[("service_name", "api"), ("region", "eu")])
        .series(&[("service_name", "worker")])
        .profile(0, SECOND, 0, &[(1, 10), (2, 5)])
        .profile(1, 2 * SECOND, 0, &[(1, 4)])
        .profile(0, 3 * SECOND, 1, &[(1, 2)])
        .profile(0, 4 * SECOND, 0, &[(3, 1)])
        .stack(0, 1, &["main", "handle", "parse"])
        .stack(0, 2, &["main", "handle", "render"])
        .stack(0, 3, &["main", "gc"])
        .stack(1, 1, &["main", "idle"])
        .row_group_size(2)
        .build()
        .unwrap()
}

fn tree_request(max_nodes: u64) -> InvokeRequest {
    InvokeRequest::new(vec![Query::Tree(TreeQuery { max_nodes })])
}

fn run(
    block: &MemoryBlock,
    request: &InvokeRequest,
    exec: ExecContext,
) -> Result<TreeReport, QueryError> {
    let ctx = QueryContext::new(exec, request, block);
    match query_tree(&ctx, &request.queries[0])? {
        Report::Tree(report) => Ok(report),
        other => panic!("unexpected report: {:?}", other),
    }
}

#[test]
fn test_tree_of_whole_block() {
    let block = block();
    let report = run(&block, &tree_request(0), ExecContext::new()).unwrap();
    let tree = Tree::from_bytes(&report.tree).unwrap();

    assert_eq!(report.query, TreeQuery { max_nodes: 0 });
    assert_eq!(tree.total(), 22);
    let handle = tree.root().child("main").unwrap().child("handle").unwrap();
    assert_eq!(handle.child("parse").unwrap().total(), 14);
    assert_eq!(handle.child("render").unwrap().total(), 5);
    assert_eq!(tree.root().child("main").unwrap().child("idle").unwrap().total(), 2);

    assert_eq!(block.open_readers(), 0);
    assert_eq!(block.symbol_stats().outstanding(), 0);
}

#[test]
fn test_executor_is_deterministic() {
    let block = block();
    let request = tree_request(4);

    let first = run(&block, &request, ExecContext::new()).unwrap();
    let second = run(&block, &request, ExecContext::new()).unwrap();

    assert_eq!(first, second);
    assert_eq!(Tree::from_bytes(&first.tree).unwrap().node_count(), 4);
}

#[test]
fn test_selector_and_time_range_filter_rows() {
    let block = block();
    let request = tree_request(0)
        .with_matcher(LabelMatcher::eq("service_name", "api"))
        .with_time_range(0, 3_000);

    let report = run(&block, &request, ExecContext::new()).unwrap();
    let tree = Tree::from_bytes(&report.tree).unwrap();

    assert_eq!(tree.total(), 15);
    assert!(tree.root().child("main").unwrap().child("idle").is_none());
}

#[test]
fn test_no_matching_rows_yields_empty_tree() {
    let block = block();
    let request = tree_request(0).with_matcher(LabelMatcher::eq("service_name", "db"));

    let report = run(&block, &request, ExecContext::new()).unwrap();

    assert!(Tree::from_bytes(&report.tree).unwrap().is_empty());
    assert_eq!(block.symbol_stats().acquired, 0);
}

#[test]
fn test_corrupt_row_group_releases_resources_once() {
    let block = block().with_corrupt_row_group(1);

    let result = run(&block, &tree_request(0), ExecContext::new());

    assert!(matches!(
        result,
        Err(QueryError::Storage(StorageError::ColumnRead { row_group: 1, .. }))
    ));
    let stats = block.symbol_stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(block.open_readers(), 0);
}

#[test]
fn test_close_failure_does_not_mask_primary_error() {
    let block = block().with_corrupt_row_group(1).with_failing_close(1);

    let result = run(&block, &tree_request(0), ExecContext::new());

    assert!(matches!(
        result,
        Err(QueryError::Storage(StorageError::ColumnRead { .. }))
    ));
    assert_eq!(block.open_readers(), 0);
}

#[test]
fn test_missing_sample_column_is_schema_mismatch() {
    for column in [COLUMN_STACKTRACE_ID, COLUMN_VALUE] {
        let block = block().without_column(column);
        match run(&block, &tree_request(0), ExecContext::new()) {
            Err(QueryError::SchemaMismatch { column: missing }) => assert_eq!(missing, column),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(block.readers_opened(), 0);
    }
}

#[test]
fn test_unknown_stack_is_resolution_error() {
    let block = BlockFixture::new("block-b")
        .series(&[("service_name", "api")])
        .profile(0, SECOND, 0, &[(42, 1)])
        .stack(0, 1, &["main"])
        .build()
        .unwrap();

    let result = run(&block, &tree_request(0), ExecContext::new());

    assert!(matches!(
        result,
        Err(QueryError::Resolve(ResolveError::MissingStack {
            partition: 0,
            stack_id: 42
        }))
    ));
    assert_eq!(block.symbol_stats().outstanding(), 0);
}

#[test]
fn test_cancelled_context() {
    let block = block();
    let exec = ExecContext::new();
    exec.cancel();

    let result = run(&block, &tree_request(0), exec);

    assert!(matches!(result, Err(QueryError::Cancelled)));
    assert_eq!(block.open_readers(), 0);
}

#[test]
fn test_unloaded_symbols_section() {
    let block = block().with_sections(&[Section::Tsdb, Section::Profiles]);

    let result = run(&block, &tree_request(0), ExecContext::new());

    assert!(matches!(
        result,
        Err(QueryError::Storage(StorageError::SectionNotLoaded(Section::Symbols)))
    ));
}

#[test]
fn test_wrong_query_kind() {
    let block = block();
    let request = InvokeRequest::new(vec![Query::LabelNames(LabelNamesQuery {})]);
    let ctx = QueryContext::new(ExecContext::new(), &request, &block);

    assert!(matches!(
        query_tree(&ctx, &request.queries[0]),
        Err(QueryError::UnexpectedQuery { .. })
    ));
}

#[test]
fn test_cancel_between_row_groups_releases_everything() {
    let exec = ExecContext::new();
    let block = block().with_cancel_on_open(1, &exec);

    let result = run(&block, &tree_request(0), exec);

    assert!(matches!(result, Err(QueryError::Cancelled)));
    assert_eq!(block.open_readers(), 0);
    let stats = block.symbol_stats();
    assert!(stats.acquired >= 1);
    assert_eq!(stats.acquired, stats.released);
}

fn frames(depth: usize) -> Vec<String> {
    (0..depth).map(|i| format!("frame_{}", i)).collect()
}

fn single_stack_block(frames: &[String], value: u64) -> MemoryBlock {
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    BlockFixture::new("block-deep")
        .series(&[("service_name", "api")])
        .profile(0, SECOND, 0, &[(1, value)])
        .stack(0, 1, &frames)
        .build()
        .unwrap()
}

#[test]
fn test_stack_at_depth_limit_is_served() {
    let block = single_stack_block(&frames(MAX_STACK_DEPTH), 7);

    let report = run(&block, &tree_request(0), ExecContext::new()).unwrap();
    let tree = Tree::from_bytes(&report.tree).unwrap();

    assert_eq!(tree.depth(), MAX_STACK_DEPTH);
    assert_eq!(tree.total(), 7);
}

#[test]
fn test_stack_past_depth_limit_is_rejected() {
    let block = single_stack_block(&frames(5_000), 1);

    let result = run(&block, &tree_request(0), ExecContext::new());

    match result {
        Err(QueryError::Resolve(ResolveError::StackTooDeep {
            partition,
            stack_id,
            depth,
            max,
        })) => {
            assert_eq!((partition, stack_id), (0, 1));
            assert_eq!(depth, 5_000);
            assert_eq!(max, MAX_STACK_DEPTH);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(block.open_readers(), 0);
    assert_eq!(block.symbol_stats().outstanding(), 0);
}

#[test]
fn test_heavy_samples_saturate_and_aggregate() {
    let heavy = 1u64 << 63;
    let block = BlockFixture::new("block-heavy")
        .series(&[("service_name", "api")])
        .profile(0, SECOND, 0, &[(1, heavy), (2, heavy)])
        .stack(0, 1, &["main", "f1"])
        .stack(0, 2, &["main", "f2"])
        .build()
        .unwrap();

    let report = run(&block, &tree_request(0), ExecContext::new()).unwrap();
    let aggregator = new_tree_aggregator(&tree_request(0));
    aggregator.aggregate(&Report::Tree(report)).unwrap();

    let tree = match aggregator.build() {
        Report::Tree(r) => Tree::from_bytes(&r.tree).unwrap(),
        other => panic!("unexpected report: {:?}", other),
    };
    assert_eq!(tree.total(), u64::MAX);
    assert_eq!(tree.root().child("main").unwrap().child("f2").unwrap().total(), heavy);
}
