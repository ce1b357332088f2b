// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adaptive evaluation against a statically planned baseline.

mod common;

use std::collections::BTreeSet;

use common::{identities, init_logging, json_event, run_single, synthetic_workload};
use patternflux_rust::core::config::{OptimizerConfig, StatisticsConfig};
use patternflux_rust::core::evaluation::EvaluationVariant;
use patternflux_rust::core::tree::MatchIdentity;
use patternflux_rust::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type S = PatternStructure;

const WINDOW: Timestamp = 1_000;
const UPDATE_WINDOW: Timestamp = 3 * WINDOW;
const MAX_GAP: Timestamp = 100;

fn pattern() -> Pattern {
    Pattern::with_window_millis(
        S::seq(vec![
            S::primitive("A", "a"),
            S::primitive("B", "b"),
            S::primitive("C", "c"),
        ]),
        Condition::smaller(Operand::attr("a", "v"), Operand::attr("b", "v")),
        WINDOW,
    )
}

fn adaptive_config(kind: OptimizerKind, swap_policy: SwapPolicy) -> EvaluationConfig {
    EvaluationConfig {
        swap_policy,
        statistics: StatisticsConfig {
            update_window_ms: UPDATE_WINDOW,
            ..StatisticsConfig::default()
        },
        optimizer: OptimizerConfig {
            kind,
            plan_builder: PlanBuilderKind::AscendingFrequency,
            deviation_threshold: 1e9,
        },
        ..EvaluationConfig::default()
    }
}

/// A dominates the first half, C the second.
fn drifting_workload(seed: u64, events: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut timestamp = 1_000;
    (0..events)
        .map(|i| {
            timestamp += rng.gen_range(0..=MAX_GAP);
            let roll: u32 = rng.gen_range(0..10);
            let event_type = match (i < events / 2, roll) {
                (true, 0..=6) | (false, 0) => "A",
                (_, 7..=8) | (false, 1..=2) => "B",
                _ => "C",
            };
            json_event(event_type, timestamp, 0, rng.gen_range(0..100))
        })
        .collect()
}

fn run_adaptive(config: EvaluationConfig, records: &[String]) -> (Vec<PatternMatch>, usize) {
    let mut mechanism = MechanismFactory::single(pattern(), config)
        .unwrap()
        .build()
        .unwrap();
    let input = InputStream::from_items("input", records.to_vec());
    let output = OutputStream::new("output");
    mechanism
        .evaluate(&input, &output, &JsonDataFormatter::default())
        .unwrap();
    let swaps = match mechanism.variant() {
        EvaluationVariant::AdaptiveSinglePattern(adaptive) => adaptive.swap_count(),
        other => panic!("expected adaptive evaluation, got {other:?}"),
    };
    (output.iter().collect(), swaps)
}

#[test]
fn test_draining_swaps_keep_every_match() {
    init_logging();
    let records = drifting_workload(11, 800);
    let baseline = run_single(
        vec![pattern()],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    let (adaptive, swaps) = run_adaptive(
        adaptive_config(OptimizerKind::Trivial, SwapPolicy::DrainOldTree),
        &records,
    );

    assert!(swaps >= 1, "the drift should change the join order");
    assert!(!baseline.is_empty());
    assert_eq!(identities(&adaptive), identities(&baseline));
}

#[test]
fn test_drop_on_swap_matches_baseline_after_stabilization() {
    init_logging();
    let records = synthetic_workload(5, 600, &["A", "B", "C"], MAX_GAP, 1);
    let baseline = run_single(
        vec![pattern()],
        EvaluationConfig::default(),
        &records,
        &JsonDataFormatter::default(),
    )
    .unwrap();
    // With a huge threshold only the first statistics cycle may swap.
    let (adaptive, swaps) = run_adaptive(
        adaptive_config(OptimizerKind::StatisticsDeviation, SwapPolicy::DropOnSwap),
        &records,
    );
    assert!(swaps <= 1);

    let adaptive_ids: BTreeSet<MatchIdentity> = identities(&adaptive).into_iter().collect();
    let baseline_ids: BTreeSet<MatchIdentity> = identities(&baseline).into_iter().collect();
    assert!(adaptive_ids.is_subset(&baseline_ids));
    assert!(adaptive.len() <= baseline.len());

    // The first cycle fires at most UPDATE_WINDOW + MAX_GAP after the first
    // event, itself at most MAX_GAP after 1000.
    let stable_from = 1_000 + UPDATE_WINDOW + 2 * MAX_GAP;
    let stable = |matches: &[PatternMatch]| -> BTreeSet<MatchIdentity> {
        matches
            .iter()
            .filter(|m| m.first_timestamp() > stable_from)
            .map(PatternMatch::identity)
            .collect()
    };
    assert!(!stable(&baseline).is_empty());
    assert_eq!(stable(&adaptive), stable(&baseline));
}

#[test]
fn test_trivial_optimizer_without_drain_never_invents_matches() {
    let records = drifting_workload(3, 600);
    let baseline: BTreeSet<MatchIdentity> = identities(
        &run_single(
            vec![pattern()],
            EvaluationConfig::default(),
            &records,
            &JsonDataFormatter::default(),
        )
        .unwrap(),
    )
    .into_iter()
    .collect();
    let (adaptive, swaps) = run_adaptive(
        adaptive_config(OptimizerKind::Trivial, SwapPolicy::DropOnSwap),
        &records,
    );
    assert!(swaps >= 1);
    for m in &adaptive {
        assert!(baseline.contains(&m.identity()));
    }
}
