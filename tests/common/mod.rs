// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use patternflux_rust::core::tree::MatchIdentity;
use patternflux_rust::prelude::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn market_open() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2018, 2, 1)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .expect("valid base date")
}

/// One metastock row `minutes` after 2018-02-01 09:00.
pub fn tick(ticker: &str, minutes: i64, open: f64, peak: f64) -> String {
    let date = market_open() + ChronoDuration::minutes(minutes);
    format!(
        "{},{},{},{},{},{},{}",
        ticker,
        date.format("%Y%m%d%H%M"),
        open,
        peak,
        open.min(peak) - 1.0,
        (open + peak) / 2.0,
        1000
    )
}

/// Epoch milliseconds of the row written by [`tick`].
pub fn tick_millis(minutes: i64) -> Timestamp {
    (market_open() + ChronoDuration::minutes(minutes))
        .and_utc()
        .timestamp_millis()
}

pub fn json_event(event_type: &str, timestamp: Timestamp, id: i64, v: i64) -> String {
    json!({
        "type": event_type,
        "timestamp": timestamp,
        "id": id,
        "v": v,
    })
    .to_string()
}

/// Seeded synthetic workload of JSON records over `types`, with
/// non-decreasing timestamps.
pub fn synthetic_workload(
    seed: u64,
    events: usize,
    types: &[&str],
    max_gap: Timestamp,
    ids: i64,
) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut timestamp = 1_000;
    (0..events)
        .map(|_| {
            timestamp += rng.gen_range(0..=max_gap);
            let event_type = types[rng.gen_range(0..types.len())];
            let id = rng.gen_range(0..ids);
            let v = rng.gen_range(0..100);
            json_event(event_type, timestamp, id, v)
        })
        .collect()
}

pub fn run_single(
    patterns: Vec<Pattern>,
    config: EvaluationConfig,
    records: &[String],
    formatter: &dyn DataFormatter,
) -> CepResult<Vec<PatternMatch>> {
    let mut mechanism = MechanismFactory::new(patterns, config)?.build()?;
    let input = InputStream::from_items("input", records.to_vec());
    let output = OutputStream::new("output");
    mechanism.evaluate(&input, &output, formatter)?;
    assert!(output.is_closed());
    Ok(output.iter().collect())
}

pub fn run_parallel(
    patterns: Vec<Pattern>,
    config: EvaluationConfig,
    records: &[String],
    formatter: &dyn DataFormatter,
) -> CepResult<Vec<PatternMatch>> {
    let mut evaluation = DataParallelEvaluation::from_patterns(patterns, config)?;
    let input = InputStream::from_items("input", records.to_vec());
    let output = OutputStream::new("output");
    let result = evaluation.evaluate(&input, &output, formatter);
    assert!(output.is_closed());
    result?;
    Ok(output.iter().collect())
}

pub fn identities(matches: &[PatternMatch]) -> Vec<MatchIdentity> {
    let mut ids: Vec<MatchIdentity> = matches.iter().map(PatternMatch::identity).collect();
    ids.sort();
    ids
}

/// Binding name to arrival index, sorted by name.
pub fn seqs(m: &PatternMatch) -> Vec<(String, u64)> {
    m.identity().1
}

pub fn parallel_config(units: usize, strategy: PartitionStrategyConfig) -> EvaluationConfig {
    let mut config = EvaluationConfig::default();
    config.parallel = ParallelConfig {
        units,
        inbox_capacity: 16,
        strategy: Some(strategy),
    };
    config
}
