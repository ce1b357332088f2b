// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end matching on a single thread: stock ticks through the
//! metastock formatter and small JSON streams for the operators.

mod common;

use std::time::Duration;

use common::{identities, init_logging, json_event, run_single, seqs, tick, tick_millis};
use patternflux_rust::core::config::StatisticsConfig;
use patternflux_rust::prelude::*;

type S = PatternStructure;

fn five_minutes() -> Duration {
    Duration::from_secs(5 * 60)
}

fn names(pairs: &[(&str, u64)]) -> Vec<(String, u64)> {
    pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect()
}

#[test]
fn test_single_event_pattern_with_peak_price_filter() {
    init_logging();
    let pattern = Pattern::new(
        S::seq(vec![S::primitive("AAPL", "a")]),
        Condition::greater(Operand::attr("a", "PeakPrice"), Operand::constant(135)),
        five_minutes(),
    );
    let records = vec![tick("AAPL", 0, 139.0, 140.0), tick("AAPL", 1, 99.0, 100.0)];

    let matches = run_single(
        vec![pattern],
        EvaluationConfig::default(),
        &records,
        &CsvDataFormatter::metastock(),
    )
    .unwrap();

    assert_eq!(matches.len(), 1);
    let a = matches[0].event("a").unwrap();
    assert_eq!(a.seq, 0);
    assert_eq!(a.timestamp, tick_millis(0));
    assert_eq!(a.attribute("PeakPrice"), Some(&AttributeValue::Long(140)));
}

#[test]
fn test_ordered_three_stock_sequence() {
    init_logging();
    let condition = Condition::greater(
        Operand::attr("a", "OpeningPrice"),
        Operand::attr("b", "OpeningPrice"),
    )
    .and(Condition::smaller(
        Operand::attr("b", "OpeningPrice"),
        Operand::attr("c", "OpeningPrice"),
    ));
    let pattern = Pattern::new(
        S::seq(vec![
            S::primitive("AAPL", "a"),
            S::primitive("AMZN", "b"),
            S::primitive("GOOG", "c"),
        ]),
        condition,
        five_minutes(),
    );
    let records = vec![
        tick("AAPL", 0, 100.0, 101.0),
        tick("AMZN", 1, 90.0, 91.0),
        tick("GOOG", 2, 95.0, 96.0),
        tick("AMZN", 3, 120.0, 121.0),
        tick("GOOG", 4, 130.0, 131.0),
        tick("AAPL", 5, 150.0, 151.0),
        tick("AMZN", 6, 140.0, 141.0),
        // Fails b.Open < c.Open for b = 140 and is out of the window of a = 100
        tick("GOOG", 7, 91.0, 92.0),
        tick("GOOG", 8, 145.0, 146.0),
    ];

    let matches = run_single(
        vec![pattern],
        EvaluationConfig::default(),
        &records,
        &CsvDataFormatter::metastock(),
    )
    .unwrap();

    let found: Vec<Vec<(String, u64)>> = identities(&matches).into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        found,
        vec![
            names(&[("a", 0), ("b", 1), ("c", 2)]),
            names(&[("a", 0), ("b", 1), ("c", 4)]),
            names(&[("a", 5), ("b", 6), ("c", 8)]),
        ]
    );
    for m in &matches {
        let (a, b, c) = (
            m.event("a").unwrap(),
            m.event("b").unwrap(),
            m.event("c").unwrap(),
        );
        assert!(a.precedes(b) && b.precedes(c));
        assert!(c.timestamp - a.timestamp <= 5 * 60 * 1000);
    }
}

#[test]
fn test_sorted_storage_finds_the_same_matches() {
    let pattern = || {
        Pattern::with_window_millis(
            S::seq(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
            Condition::smaller(Operand::attr("a", "v"), Operand::attr("b", "v")),
            50,
        )
    };
    let records = common::synthetic_workload(7, 300, &["A", "B"], 10, 4);
    let formatter = JsonDataFormatter::default();

    let plain = run_single(vec![pattern()], EvaluationConfig::default(), &records, &formatter)
        .unwrap();
    let mut config = EvaluationConfig::default();
    config.storage.sort_storage = true;
    let sorted = run_single(vec![pattern()], config, &records, &formatter).unwrap();

    assert!(!plain.is_empty());
    assert_eq!(identities(&plain), identities(&sorted));
}

#[test]
fn test_negation_between_sequence_events() {
    let pattern = Pattern::with_window_millis(
        S::seq(vec![
            S::primitive("A", "a"),
            S::not(S::primitive("N", "n")),
            S::primitive("B", "b"),
        ]),
        Condition::True,
        10,
    );
    let records = vec![
        json_event("A", 1, 0, 0),
        json_event("N", 2, 0, 0),
        json_event("B", 3, 0, 0),
        json_event("A", 4, 0, 0),
        json_event("B", 5, 0, 0),
    ];
    let matches = run_single(
        vec![pattern],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(seqs(&matches[0]), names(&[("a", 3), ("b", 4)]));
}

#[test]
fn test_trailing_negation_waits_for_the_window() {
    let pattern = Pattern::with_window_millis(
        S::seq(vec![
            S::primitive("A", "a"),
            S::primitive("B", "b"),
            S::not(S::primitive("N", "n")),
        ]),
        Condition::True,
        10,
    );
    let records = vec![
        json_event("A", 1, 0, 0),
        json_event("B", 2, 0, 0),
        // Inside [a, a + 10]: rules out (0, 1)
        json_event("N", 5, 0, 0),
        json_event("A", 20, 0, 0),
        json_event("B", 22, 0, 0),
        json_event("A", 40, 0, 0),
        json_event("B", 41, 0, 0),
        // Past 40 + 10: too late to rule out (5, 6)
        json_event("N", 52, 0, 0),
    ];
    let matches = run_single(
        vec![pattern],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    let found: Vec<_> = identities(&matches).into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        found,
        vec![names(&[("a", 3), ("b", 4)]), names(&[("a", 5), ("b", 6)])]
    );
}

#[test]
fn test_negation_condition_limits_the_blocker() {
    // Only an N carrying the same id as a blocks the match.
    let pattern = Pattern::with_window_millis(
        S::seq(vec![
            S::primitive("A", "a"),
            S::not(S::primitive("N", "n")),
            S::primitive("B", "b"),
        ]),
        Condition::equal(Operand::attr("a", "id"), Operand::attr("n", "id")),
        10,
    );
    let records = vec![
        json_event("A", 1, 1, 0),
        json_event("N", 2, 2, 0),
        json_event("B", 3, 0, 0),
        json_event("N", 4, 1, 0),
        json_event("B", 5, 0, 0),
    ];
    let matches = run_single(
        vec![pattern],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(seqs(&matches[0]), names(&[("a", 0), ("b", 2)]));
}

#[test]
fn test_disjunction_and_conjunction() {
    let or_pattern = Pattern::with_window_millis(
        S::seq(vec![
            S::primitive("A", "a"),
            S::or(vec![S::primitive("B", "b"), S::primitive("C", "c")]),
        ]),
        Condition::True,
        10,
    );
    let records = vec![
        json_event("A", 1, 0, 0),
        json_event("C", 2, 0, 0),
        json_event("B", 3, 0, 0),
    ];
    let matches = run_single(
        vec![or_pattern],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    let found: Vec<_> = identities(&matches).into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        found,
        vec![names(&[("a", 0), ("b", 2)]), names(&[("a", 0), ("c", 1)])]
    );

    // And ignores arrival order.
    let and_pattern = Pattern::with_window_millis(
        S::and(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
        Condition::True,
        10,
    );
    let records = vec![json_event("B", 1, 0, 0), json_event("A", 2, 0, 0)];
    let matches = run_single(
        vec![and_pattern],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(seqs(&matches[0]), names(&[("a", 1), ("b", 0)]));
}

#[test]
fn test_window_is_inclusive_and_bounded() {
    let pattern = Pattern::with_window_millis(
        S::seq(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
        Condition::True,
        10,
    );
    let records = vec![
        json_event("A", 0, 0, 0),
        json_event("B", 10, 0, 0),
        json_event("B", 11, 0, 0),
    ];
    let matches = run_single(
        vec![pattern],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(seqs(&matches[0]), names(&[("a", 0), ("b", 1)]));
}

#[test]
fn test_multi_pattern_forest_tags_pattern_index() {
    let ab = Pattern::with_window_millis(
        S::seq(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
        Condition::True,
        10,
    );
    let bc = Pattern::with_window_millis(
        S::seq(vec![S::primitive("B", "b"), S::primitive("C", "c")]),
        Condition::True,
        10,
    );
    let records = vec![
        json_event("A", 1, 0, 0),
        json_event("B", 2, 0, 0),
        json_event("C", 3, 0, 0),
    ];
    let mut mechanism = MechanismFactory::new(vec![ab, bc], EvaluationConfig::default())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(mechanism.structure_summary(), "Seq(a, b); Seq(b, c)");

    let input = InputStream::from_items("input", records);
    let output = OutputStream::new("output");
    mechanism
        .evaluate(&input, &output, &JsonDataFormatter::default())
        .unwrap();
    let matches: Vec<PatternMatch> = output.iter().collect();
    assert_eq!(
        identities(&matches),
        vec![
            (0, names(&[("a", 0), ("b", 1)])),
            (1, names(&[("b", 1), ("c", 2)])),
        ]
    );
    assert_eq!(mechanism.events_processed(), 3);
}

#[test]
fn test_malformed_record_fails_and_closes_output() {
    let pattern = Pattern::with_window_millis(S::primitive("A", "a"), Condition::True, 10);
    let records = vec![json_event("A", 1, 0, 0), "{not json".to_string()];
    let mut mechanism = MechanismFactory::single(pattern, EvaluationConfig::default())
        .unwrap()
        .build()
        .unwrap();
    let input = InputStream::from_items("input", records);
    let output = OutputStream::new("output");
    let err = mechanism
        .evaluate(&input, &output, &JsonDataFormatter::default())
        .unwrap_err();
    assert!(matches!(err, CepError::Format { .. }));
    assert!(output.is_closed());
    // The match completed before the bad record was still delivered.
    assert_eq!(output.iter().count(), 1);
}

#[test]
fn test_empty_input_closes_output() {
    let pattern = Pattern::with_window_millis(S::primitive("A", "a"), Condition::True, 10);
    let matches = run_single(
        vec![pattern],
        EvaluationConfig {
            statistics: StatisticsConfig {
                update_window_ms: 5,
                ..StatisticsConfig::default()
            },
            ..EvaluationConfig::default()
        },
        &[],
        &JsonDataFormatter::default(),
    )
    .unwrap();
    assert!(matches.is_empty());
}
