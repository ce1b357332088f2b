// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data-parallel evaluation
//!
//! One dispatcher thread parses the input, assigns arrival sequence numbers
//! and routes events through the configured [`EventClassifier`] into the
//! bounded inboxes of N unit threads. Units report tagged matches into a
//! shared stream; the calling thread is the only reader of that stream and
//! writes deduplicated matches to the output.
//!
//! Shutdown: the dispatcher closes every inbox when the input ends or the run
//! aborts, waits for all units on a [`WaitGroup`] and then closes the match
//! stream, which ends the merge loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use crossbeam_utils::sync::WaitGroup;

use super::classifier::{EventClassifier, UnitMessage};
use super::dedup::{MergeSummary, TaggedMatch, ToggleDeduplicator};
use super::execution_unit::{
    panic_message, AbortSignal, ExecutionUnit, UnitMetrics, UnitMetricsSnapshot,
};
use super::grouping::GroupingClassifier;
use super::interval::IntervalClassifier;
use super::key_hash::KeyHashClassifier;
use crate::core::config::{EvaluationConfig, PartitionStrategyConfig};
use crate::core::error::{CepError, CepResult};
use crate::core::evaluation::MechanismFactory;
use crate::core::event::{DataFormatter, Event};
use crate::core::stream::{InputStream, OutputStream, Stream};
use crate::query_api::pattern::Pattern;

#[derive(Debug)]
pub struct DataParallelEvaluation {
    factory: Arc<MechanismFactory>,
    strategy: PartitionStrategyConfig,
    units: usize,
    inbox_capacity: usize,
    metrics: Vec<Arc<UnitMetrics>>,
    summaries: Vec<String>,
    merge: MergeSummary,
}

impl DataParallelEvaluation {
    pub fn new(factory: MechanismFactory) -> CepResult<Self> {
        let parallel = factory.config().parallel.clone();
        parallel.validate()?;
        let strategy = parallel.strategy.ok_or_else(|| {
            CepError::configuration_with_key(
                "data-parallel evaluation needs a partition strategy",
                "parallel.strategy",
            )
        })?;
        // Fails fast on patterns no unit could evaluate.
        let initial = factory.build()?.structure_summary();
        if !factory.patterns().iter().all(|p| p.freeze_names().is_empty()) {
            log::warn!("Consumption policies are applied per unit under data-parallel evaluation");
        }
        Ok(Self {
            factory: Arc::new(factory),
            strategy,
            units: parallel.units,
            inbox_capacity: parallel.inbox_capacity,
            metrics: (0..parallel.units).map(|_| Arc::default()).collect(),
            summaries: vec![initial; parallel.units],
            merge: MergeSummary::default(),
        })
    }

    pub fn from_patterns(patterns: Vec<Pattern>, config: EvaluationConfig) -> CepResult<Self> {
        Self::new(MechanismFactory::new(patterns, config)?)
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn strategy(&self) -> &PartitionStrategyConfig {
        &self.strategy
    }

    /// One summary per unit: the tree of the last slot it completed, or the
    /// initial tree before any run.
    pub fn structure_summary(&self) -> Vec<String> {
        self.summaries.clone()
    }

    /// Counters of the latest run.
    pub fn unit_metrics(&self) -> Vec<UnitMetricsSnapshot> {
        self.metrics
            .iter()
            .enumerate()
            .map(|(unit, metrics)| metrics.snapshot(unit))
            .collect()
    }

    /// Deduplication counters of the latest run.
    pub fn merge_summary(&self) -> MergeSummary {
        self.merge
    }

    /// Evaluate `input` on all units and write the merged matches to
    /// `output`. The output is closed on return, including on error.
    pub fn evaluate(
        &mut self,
        input: &InputStream,
        output: &OutputStream,
        formatter: &dyn DataFormatter,
    ) -> CepResult<()> {
        let result = self.run(input, output, formatter);
        output.close();
        if let Err(e) = &result {
            log::error!("Data-parallel evaluation failed: {e}");
        }
        result
    }

    fn classifier(
        &self,
        first: &Event,
    ) -> CepResult<(Box<dyn EventClassifier>, Option<Sender<usize>>)> {
        match &self.strategy {
            PartitionStrategyConfig::KeyHash { key } => Ok((
                Box::new(KeyHashClassifier::new(key.clone(), self.units, first)?),
                None,
            )),
            PartitionStrategyConfig::Interval {
                interval_ms,
                assignment,
            } => {
                let window = self.factory.max_window();
                let lookahead = if self
                    .factory
                    .patterns()
                    .iter()
                    .any(Pattern::has_trailing_negation)
                {
                    window
                } else {
                    0
                };
                let shared = self.factory.patterns().iter().all(|p| {
                    !p.has_leading_negation() && p.freeze_names().is_empty()
                });
                let classifier = IntervalClassifier::new(
                    *interval_ms,
                    *assignment,
                    self.units,
                    window,
                    lookahead,
                    first.timestamp,
                )?
                .with_shared_overlaps(shared);
                let release = classifier.release_handle();
                Ok((Box::new(classifier), release))
            }
            PartitionStrategyConfig::Grouping { attributes } => Ok((
                Box::new(GroupingClassifier::new(attributes.clone(), self.units)?),
                None,
            )),
        }
    }

    fn run(
        &mut self,
        input: &InputStream,
        output: &OutputStream,
        formatter: &dyn DataFormatter,
    ) -> CepResult<()> {
        let raw = input
            .get_item()
            .ok_or_else(|| CepError::empty_stream(input.name()))?;
        let first = Event::from_raw(&raw, formatter, 0)?;
        let (classifier, release) = self.classifier(&first)?;

        let units = self.units;
        self.metrics = (0..units).map(|_| Arc::default()).collect();
        let inboxes: Vec<Stream<UnitMessage>> = (0..units)
            .map(|unit| Stream::bounded(format!("unit-{unit}-inbox"), self.inbox_capacity))
            .collect();
        let matches: Stream<TaggedMatch> = Stream::new("unit-matches");
        let abort = AbortSignal::new();
        let mut dedup = ToggleDeduplicator::new();
        log::info!(
            "Starting data-parallel evaluation on {} units with {:?}",
            units,
            self.strategy
        );

        let summaries = thread::scope(|scope| {
            let wait_group = WaitGroup::new();
            let mut workers = Vec::with_capacity(units);
            for (unit, inbox) in inboxes.iter().enumerate() {
                let worker = ExecutionUnit::new(
                    unit,
                    Arc::clone(&self.factory),
                    matches.clone(),
                    Arc::clone(&self.metrics[unit]),
                    release.clone(),
                );
                let done = wait_group.clone();
                let abort = &abort;
                let spawned = thread::Builder::new()
                    .name(format!("patternflux-unit-{unit}"))
                    .spawn_scoped(scope, move || {
                        let summary = worker.run(inbox, abort);
                        drop(done);
                        summary
                    });
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        abort.record(CepError::runtime(format!("cannot start unit {unit}: {e}")));
                        break;
                    }
                }
            }

            let dispatcher = if abort.is_aborted() {
                None
            } else {
                let all_done = wait_group.clone();
                let inboxes = &inboxes;
                let matches = matches.clone();
                let abort = &abort;
                let mut classifier = classifier;
                thread::Builder::new()
                    .name("patternflux-dispatcher".to_string())
                    .spawn_scoped(scope, move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            dispatch(classifier.as_mut(), first, input, formatter, inboxes, abort)
                        }));
                        match outcome {
                            Ok(Ok(events)) => log::debug!("Dispatcher routed {events} events"),
                            Ok(Err(e)) => abort.record(e),
                            Err(payload) => abort.record(CepError::runtime(format!(
                                "dispatcher panicked: {}",
                                panic_message(payload)
                            ))),
                        }
                        close_all(inboxes);
                        all_done.wait();
                        matches.close();
                    })
                    .map_err(|e| {
                        abort.record(CepError::runtime(format!("cannot start dispatcher: {e}")))
                    })
                    .ok()
            };
            if dispatcher.is_none() {
                close_all(&inboxes);
                wait_group.wait();
                matches.close();
            } else {
                drop(wait_group);
            }

            let mut output_open = true;
            for tagged in &matches {
                if let Some(m) = dedup.offer(tagged) {
                    if output_open {
                        if let Err(e) = output.add_item(m) {
                            abort.record(e);
                            output_open = false;
                        }
                    }
                }
            }

            if let Some(handle) = dispatcher {
                if handle.join().is_err() {
                    abort.record(CepError::runtime("dispatcher thread panicked"));
                }
            }
            workers
                .into_iter()
                .enumerate()
                .map(|(unit, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        abort.record(CepError::runtime(format!("unit {unit} thread panicked")));
                        None
                    })
                })
                .collect::<Vec<_>>()
        });

        for (unit, summary) in summaries.into_iter().enumerate() {
            if let Some(summary) = summary {
                self.summaries[unit] = summary;
            }
        }
        self.merge = dedup.summary();
        log::info!(
            "Merged unit output: {} forwarded, {} duplicates suppressed",
            self.merge.forwarded,
            self.merge.suppressed
        );
        if self.merge.unpaired > 0 {
            log::warn!(
                "{} overlap matches were reported by one slot only",
                self.merge.unpaired
            );
        }
        match abort.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn dispatch(
    classifier: &mut dyn EventClassifier,
    first: Arc<Event>,
    input: &InputStream,
    formatter: &dyn DataFormatter,
    inboxes: &[Stream<UnitMessage>],
    abort: &AbortSignal,
) -> CepResult<u64> {
    let mut deliver = |unit: usize, message: UnitMessage| -> CepResult<()> {
        let inbox = inboxes.get(unit).ok_or_else(|| {
            CepError::partition(format!("no unit {unit} among {}", inboxes.len()))
        })?;
        inbox.add_item(message)
    };
    classifier.classify(&first, &mut deliver)?;
    let mut seq = 1;
    for raw in input {
        if abort.is_aborted() {
            break;
        }
        let event = Event::from_raw(&raw, formatter, seq)?;
        seq += 1;
        classifier.classify(&event, &mut deliver)?;
    }
    Ok(seq)
}

fn close_all(inboxes: &[Stream<UnitMessage>]) {
    for inbox in inboxes {
        inbox.close();
    }
}
