use pretty_assertions::assert_eq;
use profile_query_backend::model::{LabelNamesQuery, LabelNamesReport, TreeReport};
use profile_query_backend::query::{new_tree_aggregator, Aggregator};
use profile_query_backend::utils::error::AggregateError;
use profile_query_backend::{InvokeRequest, Report, Tree, TreeQuery};
use std::thread;

fn tree_report(stacks: &[(Vec<&str>, u64)], max_nodes: u64) -> Report {
    let mut tree = Tree::new();
    for (frames, value) in stacks {
        tree.insert_stack(frames, *value);
    }
    Report::Tree(TreeReport {
        query: TreeQuery { max_nodes },
        tree: tree.bytes(0),
    })
}

fn aggregate_all(reports: &[&Report]) -> Report {
    let aggregator = new_tree_aggregator(&InvokeRequest::new(vec![]));
    for report in reports {
        aggregator.aggregate(report).unwrap();
    }
    aggregator.build()
}

fn tree_of(report: &Report) -> Tree {
    match report {
        Report::Tree(r) => Tree::from_bytes(&r.tree).unwrap(),
        other => panic!("unexpected report: {:?}", other),
    }
}

fn permutations<T: Copy>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

#[test]
fn test_two_block_scenario() {
    let a = tree_report(&[(vec!["f1"], 10)], 100);
    let b = tree_report(&[(vec!["f2"], 5)], 100);

    let tree = tree_of(&aggregate_all(&[&a, &b]));

    assert_eq!(tree.node_count(), 3);
    assert_eq!(tree.total(), 15);
    assert_eq!(tree.root().child("f1").unwrap().total(), 10);
    assert_eq!(tree.root().child("f2").unwrap().total(), 5);
}

#[test]
fn test_output_is_permutation_invariant() {
    let reports = [
        tree_report(&[(vec!["main", "a"], 3), (vec!["main"], 1)], 4),
        tree_report(&[(vec!["main", "b"], 7)], 4),
        tree_report(&[(vec!["main", "a", "x"], 2), (vec!["other"], 9)], 4),
        tree_report(&[(vec!["main", "b"], 1), (vec!["main", "c"], 1)], 4),
    ];
    let refs: Vec<&Report> = reports.iter().collect();

    let expected = aggregate_all(&refs);
    for order in permutations(&refs) {
        assert_eq!(aggregate_all(&order), expected);
    }
}

#[test]
fn test_build_without_reports() {
    let first = new_tree_aggregator(&InvokeRequest::new(vec![])).build();
    let second = new_tree_aggregator(&InvokeRequest::new(vec![])).build();

    assert_eq!(first, second);
    match &first {
        Report::Tree(r) => assert_eq!(r.query, TreeQuery::default()),
        other => panic!("unexpected report: {:?}", other),
    }
    assert!(tree_of(&first).is_empty());
}

#[test]
fn test_first_query_is_captured() {
    let first = tree_report(&[(vec!["a"], 5), (vec!["b"], 4), (vec!["c"], 3)], 2);
    let second = tree_report(&[(vec!["d"], 1)], 100);

    let report = aggregate_all(&[&first, &second]);

    match &report {
        Report::Tree(r) => assert_eq!(r.query.max_nodes, 2),
        other => panic!("unexpected report: {:?}", other),
    }
    let tree = tree_of(&report);
    assert_eq!(tree.node_count(), 2);
    assert_eq!(tree.total(), 13);
}

#[test]
fn test_failed_merge_keeps_aggregator_usable() {
    let aggregator = new_tree_aggregator(&InvokeRequest::new(vec![]));
    aggregator.aggregate(&tree_report(&[(vec!["a"], 2)], 0)).unwrap();

    let wrong_kind = Report::LabelNames(LabelNamesReport {
        query: LabelNamesQuery {},
        names: vec!["x".to_string()],
    });
    assert!(matches!(
        aggregator.aggregate(&wrong_kind),
        Err(AggregateError::UnexpectedReport { .. })
    ));
    let truncated = Report::Tree(TreeReport {
        query: TreeQuery::default(),
        tree: vec![4, b'r', b'o'],
    });
    assert!(matches!(aggregator.aggregate(&truncated), Err(AggregateError::Merge(_))));

    aggregator.aggregate(&tree_report(&[(vec!["b"], 3)], 0)).unwrap();

    let tree = tree_of(&aggregator.build());
    assert_eq!(tree.total(), 5);
    assert_eq!(tree.node_count(), 3);
}

#[test]
fn test_concurrent_aggregation_matches_sequential() {
    let reports: Vec<Report> = (0..64u64)
        .map(|i| {
            let leaf = format!("f{}", i % 7);
            tree_report(&[(vec!["main", leaf.as_str()], i + 1)], 0)
        })
        .collect();
    let refs: Vec<&Report> = reports.iter().collect();
    let sequential = aggregate_all(&refs);

    let aggregator = new_tree_aggregator(&InvokeRequest::new(vec![]));
    thread::scope(|scope| {
        for chunk in reports.chunks(8) {
            let aggregator = &aggregator;
            scope.spawn(move || {
                for report in chunk {
                    aggregator.aggregate(report).unwrap();
                }
            });
        }
    });

    assert_eq!(aggregator.build(), sequential);
}

#[test]
fn test_weights_past_u64_saturate() {
    let heavy = 1u64 << 63;
    let a = tree_report(&[(vec!["main", "f1"], heavy)], 0);
    let b = tree_report(&[(vec!["main", "f2"], heavy)], 0);

    let tree = tree_of(&aggregate_all(&[&a, &b]));

    assert_eq!(tree.total(), u64::MAX);
    let main = tree.root().child("main").unwrap();
    assert_eq!(main.total(), u64::MAX);
    assert_eq!(main.child("f1").unwrap().total(), heavy);
    assert_eq!(main.child("f2").unwrap().total(), heavy);
}

#[test]
fn test_validate_rejects_what_aggregate_rejects() {
    let aggregator = new_tree_aggregator(&InvokeRequest::new(vec![]));
    let good = tree_report(&[(vec!["a"], 2)], 0);
    let truncated = Report::Tree(TreeReport {
        query: TreeQuery { max_nodes: 9 },
        tree: vec![4, b'r', b'o'],
    });

    aggregator.validate(&good).unwrap();
    assert!(matches!(aggregator.validate(&truncated), Err(AggregateError::Merge(_))));

    let report = aggregator.build();
    match &report {
        Report::Tree(r) => assert_eq!(r.query, TreeQuery::default()),
        other => panic!("unexpected report: {:?}", other),
    }
    assert!(tree_of(&report).is_empty());
}
