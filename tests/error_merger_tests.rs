// Error interval merging tests: per-source coalescing, cross-source grouping

mod common;

use std::collections::BTreeMap;

use common::*;
use rollup_engine::error_merger::{
    ErrorIntervalCollector, MultiErrorIntervalMerger, group_error_intervals,
};

#[test]
fn touching_same_message_intervals_coalesce() {
    let mut collector = ErrorIntervalCollector::default();
    collector.add(error_interval(BASE + MINUTE, BASE + 2 * MINUTE, 2, "timeout"));
    collector.add(error_interval(BASE, BASE + MINUTE, 1, "timeout"));
    collector.add(error_interval(BASE + 5 * MINUTE, BASE + 6 * MINUTE, 1, "timeout"));
    assert_eq!(
        collector.into_merged(),
        vec![
            error_interval(BASE, BASE + 2 * MINUTE, 3, "timeout"),
            error_interval(BASE + 5 * MINUTE, BASE + 6 * MINUTE, 1, "timeout"),
        ]
    );
}

#[test]
fn different_messages_stay_separate() {
    let mut collector = ErrorIntervalCollector::default();
    collector.add_all(&[
        error_interval(BASE, BASE + 2 * MINUTE, 1, "timeout"),
        error_interval(BASE + MINUTE, BASE + 3 * MINUTE, 1, "http 500"),
    ]);
    let merged = collector.into_merged();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].message, "timeout");
    assert_eq!(merged[1].message, "http 500");
}

#[test]
fn nested_interval_from_another_source_is_kept() {
    let mut merger = MultiErrorIntervalMerger::default();
    merger.add_error_intervals("a", &[error_interval(BASE, BASE + 10 * MINUTE, 5, "down")]);
    merger.add_error_intervals(
        "b",
        &[error_interval(BASE + 2 * MINUTE, BASE + 3 * MINUTE, 1, "timeout")],
    );
    let grouped = merger.into_grouped();
    assert_eq!(grouped.len(), 1);
    assert_eq!((grouped[0].from, grouped[0].to), (BASE, BASE + 10 * MINUTE));
    assert_eq!(
        grouped[0].error_intervals["b"],
        vec![error_interval(BASE + 2 * MINUTE, BASE + 3 * MINUTE, 1, "timeout")]
    );
}

#[test]
fn chained_overlaps_form_one_group_and_gaps_split_groups() {
    let by_source = BTreeMap::from([
        (
            "a".to_string(),
            vec![
                error_interval(BASE, BASE + 2 * MINUTE, 1, "down"),
                error_interval(BASE + 30 * MINUTE, BASE + 31 * MINUTE, 1, "down"),
            ],
        ),
        (
            "b".to_string(),
            vec![error_interval(BASE + MINUTE, BASE + 4 * MINUTE, 1, "down")],
        ),
        (
            "c".to_string(),
            vec![error_interval(BASE + 4 * MINUTE, BASE + 5 * MINUTE, 1, "down")],
        ),
    ]);
    let grouped = group_error_intervals(&by_source);
    assert_eq!(grouped.len(), 2);
    assert_eq!((grouped[0].from, grouped[0].to), (BASE, BASE + 5 * MINUTE));
    assert_eq!(grouped[0].error_intervals.len(), 3);
    assert_eq!(
        (grouped[1].from, grouped[1].to),
        (BASE + 30 * MINUTE, BASE + 31 * MINUTE)
    );
    assert_eq!(
        grouped[1].error_intervals.keys().collect::<Vec<_>>(),
        vec!["a"]
    );
}

#[test]
fn no_intervals_no_groups() {
    assert!(MultiErrorIntervalMerger::default().into_grouped().is_empty());
    assert!(ErrorIntervalCollector::default().into_merged().is_empty());
}
