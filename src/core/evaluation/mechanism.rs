// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree-based evaluation mechanism
//!
//! Drives a matching tree over a stream of events. Two variants exist:
//!
//! - [`AdaptiveSinglePattern`]: one pattern, freeze policy, online statistics
//!   and optimizer-driven tree swaps
//! - [`StaticMultiPattern`]: several patterns with fixed plans
//!
//! Both are reached through [`EvaluationVariant`] with the same three
//! operations: `play_event`, `on_statistics_cycle` and `flush`.

use std::sync::Arc;

use super::freeze::FreezeGuard;
use crate::core::config::SwapPolicy;
use crate::core::error::{CepError, CepResult};
use crate::core::event::{DataFormatter, Event, Timestamp};
use crate::core::optimizer::Optimizer;
use crate::core::statistics::StatisticsCollector;
use crate::core::stream::{InputStream, OutputStream};
use crate::core::tree::{MultiPatternTree, PatternMatch, StorageParams, Tree};
use crate::query_api::pattern::Pattern;

/// A replaced tree kept alive until the matches started before the swap can
/// no longer complete.
#[derive(Debug)]
struct DrainingTree {
    tree: Tree,
    /// `(timestamp, seq)` of the first event played on the replacement.
    swap_point: (Timestamp, u64),
    until: Timestamp,
}

impl DrainingTree {
    fn started_before_swap(&self, m: &PatternMatch) -> bool {
        m.events()
            .any(|e| (e.timestamp, e.seq) < self.swap_point)
    }

    fn take_matches(&mut self, last: bool) -> Vec<PatternMatch> {
        let matches = if last {
            self.tree.get_last_matches()
        } else {
            self.tree.get_matches()
        };
        matches
            .into_iter()
            .filter(|m| self.started_before_swap(m))
            .collect()
    }
}

/// Single pattern with freeze policy and adaptive plan swapping.
#[derive(Debug)]
pub struct AdaptiveSinglePattern {
    pattern: Pattern,
    tree: Tree,
    draining: Option<DrainingTree>,
    collector: Box<dyn StatisticsCollector>,
    optimizer: Box<dyn Optimizer>,
    swap_policy: SwapPolicy,
    storage: StorageParams,
    freeze: FreezeGuard,
    update_window: Timestamp,
    cycle_start: Option<Timestamp>,
    swaps: usize,
}

impl AdaptiveSinglePattern {
    pub fn new(
        pattern: Pattern,
        mut optimizer: Box<dyn Optimizer>,
        collector: Box<dyn StatisticsCollector>,
        swap_policy: SwapPolicy,
        storage: StorageParams,
        update_window: Timestamp,
    ) -> CepResult<Self> {
        if update_window <= 0 {
            return Err(CepError::configuration_with_key(
                "statistics update window must be positive",
                "statistics.update_window_ms",
            ));
        }
        let plan = optimizer.build_initial_plan(&pattern)?;
        let tree = Tree::new(&pattern, &plan, 0, &storage)?;
        let freeze = FreezeGuard::new(&pattern);
        Ok(Self {
            pattern,
            tree,
            draining: None,
            collector,
            optimizer,
            swap_policy,
            storage,
            freeze,
            update_window,
            cycle_start: None,
            swaps: 0,
        })
    }

    /// Number of tree swaps performed so far.
    pub fn swap_count(&self) -> usize {
        self.swaps
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn freeze_guard(&self) -> &FreezeGuard {
        &self.freeze
    }

    fn play_event(&mut self, event: &Arc<Event>, out: &mut Vec<PatternMatch>) -> CepResult<()> {
        let now = event.timestamp;
        self.freeze.expire(now);
        self.collector.record_event(event)?;

        match self.cycle_start {
            None => self.cycle_start = Some(now),
            Some(start) if now - start >= self.update_window => {
                self.on_statistics_cycle(event, out)?;
                self.cycle_start = Some(now);
            }
            Some(_) => {}
        }

        if let Some(mut draining) = self.draining.take() {
            if now <= draining.until {
                let freeze = &self.freeze;
                draining
                    .tree
                    .handle_event_with(event, |name| freeze.is_suppressed(name))?;
                out.extend(draining.take_matches(false));
                self.draining = Some(draining);
            } else {
                draining.tree.advance_time(now);
                out.extend(draining.take_matches(true));
                log::debug!("Retired the tree replaced at {:?}", draining.swap_point);
            }
        }

        self.tree.advance_time(now);
        self.tree.play_negative(event)?;
        for leaf in self.tree.leaves_for_type(&event.event_type) {
            let name = self.tree.leaf_name(leaf).to_string();
            if self.freeze.is_suppressed(&name) {
                continue;
            }
            self.freeze.register(&name, event);
            self.tree.play_on_leaf(leaf, event)?;
        }
        out.extend(self.tree.get_matches());
        self.freeze.on_matches(out);
        Ok(())
    }

    fn on_statistics_cycle(
        &mut self,
        trigger: &Arc<Event>,
        out: &mut Vec<PatternMatch>,
    ) -> CepResult<()> {
        let snapshot = match self.collector.snapshot() {
            Ok(snapshot) => snapshot,
            Err(CepError::StatisticsUnavailable { message }) => {
                log::debug!("Skipping statistics cycle: {message}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.pattern.set_statistics(snapshot.clone());
        if !self.optimizer.needs_optimize(&snapshot, &self.pattern) {
            return Ok(());
        }
        let plan = self.optimizer.build_tree_plan(&snapshot, &self.pattern)?;
        if &plan == self.tree.plan() {
            log::debug!("Optimizer kept plan {plan}");
            return Ok(());
        }

        let new_tree = Tree::new(&self.pattern, &plan, 0, &self.storage)?;
        let old_tree = std::mem::replace(&mut self.tree, new_tree);
        self.swaps += 1;
        log::info!(
            "Swapped tree at {}: {} -> {}",
            trigger.timestamp,
            old_tree.plan(),
            plan
        );

        match self.swap_policy {
            SwapPolicy::DropOnSwap => {
                if old_tree.partial_match_count() > 0 {
                    log::debug!(
                        "Dropped {} partial matches with the replaced tree",
                        old_tree.partial_match_count()
                    );
                }
                let mut old_tree = old_tree;
                out.extend(old_tree.get_matches());
            }
            SwapPolicy::DrainOldTree => {
                if let Some(mut previous) = self.draining.take() {
                    previous.tree.advance_time(trigger.timestamp);
                    out.extend(previous.take_matches(true));
                }
                self.draining = Some(DrainingTree {
                    tree: old_tree,
                    swap_point: (trigger.timestamp, trigger.seq),
                    until: trigger.timestamp + self.pattern.window,
                });
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Vec<PatternMatch> {
        let mut out = Vec::new();
        if let Some(mut draining) = self.draining.take() {
            out.extend(draining.take_matches(true));
        }
        out.extend(self.tree.get_last_matches());
        out
    }
}

/// Several patterns, each with a plan fixed at construction.
#[derive(Debug)]
pub struct StaticMultiPattern {
    forest: MultiPatternTree,
}

impl StaticMultiPattern {
    pub fn new(forest: MultiPatternTree) -> Self {
        Self { forest }
    }

    fn play_event(&mut self, event: &Arc<Event>, out: &mut Vec<PatternMatch>) -> CepResult<()> {
        self.forest.handle_event(event)?;
        out.extend(self.forest.get_matches());
        Ok(())
    }

    fn flush(&mut self) -> Vec<PatternMatch> {
        self.forest.get_last_matches()
    }
}

#[derive(Debug)]
pub enum EvaluationVariant {
    AdaptiveSinglePattern(AdaptiveSinglePattern),
    StaticMultiPattern(StaticMultiPattern),
}

impl EvaluationVariant {
    pub fn play_event(&mut self, event: &Arc<Event>, out: &mut Vec<PatternMatch>) -> CepResult<()> {
        match self {
            EvaluationVariant::AdaptiveSinglePattern(v) => v.play_event(event, out),
            EvaluationVariant::StaticMultiPattern(v) => v.play_event(event, out),
        }
    }

    /// Consult statistics and optimizer now. Static evaluation ignores it.
    pub fn on_statistics_cycle(
        &mut self,
        trigger: &Arc<Event>,
        out: &mut Vec<PatternMatch>,
    ) -> CepResult<()> {
        match self {
            EvaluationVariant::AdaptiveSinglePattern(v) => v.on_statistics_cycle(trigger, out),
            EvaluationVariant::StaticMultiPattern(_) => Ok(()),
        }
    }

    pub fn flush(&mut self) -> Vec<PatternMatch> {
        match self {
            EvaluationVariant::AdaptiveSinglePattern(v) => v.flush(),
            EvaluationVariant::StaticMultiPattern(v) => v.flush(),
        }
    }

    pub fn structure_summary(&self) -> String {
        match self {
            EvaluationVariant::AdaptiveSinglePattern(v) => v.tree.structure_summary(),
            EvaluationVariant::StaticMultiPattern(v) => v.forest.structure_summary(),
        }
    }
}

/// Evaluation of one or more patterns on a single thread.
#[derive(Debug)]
pub struct TreeBasedEvaluationMechanism {
    variant: EvaluationVariant,
    next_seq: u64,
    events_processed: u64,
}

impl TreeBasedEvaluationMechanism {
    pub fn new(variant: EvaluationVariant) -> Self {
        Self {
            variant,
            next_seq: 0,
            events_processed: 0,
        }
    }

    pub fn variant(&self) -> &EvaluationVariant {
        &self.variant
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Play one event whose `seq` is already assigned; returns the matches
    /// it completed.
    pub fn process_event(&mut self, event: &Arc<Event>) -> CepResult<Vec<PatternMatch>> {
        let mut out = Vec::new();
        self.variant.play_event(event, &mut out)?;
        self.events_processed += 1;
        Ok(out)
    }

    /// Flush pending matches as if every window expired.
    pub fn finish(&mut self) -> Vec<PatternMatch> {
        self.variant.flush()
    }

    /// Parse and evaluate every record of `input`, writing matches to
    /// `output`. The output is closed on return, including on error.
    pub fn evaluate(
        &mut self,
        input: &InputStream,
        output: &OutputStream,
        formatter: &dyn DataFormatter,
    ) -> CepResult<()> {
        let result = self.evaluate_inner(input, output, formatter);
        output.close();
        match &result {
            Ok(()) => log::info!(
                "Evaluation finished after {} events",
                self.events_processed
            ),
            Err(e) => log::error!("Evaluation failed: {e}"),
        }
        result
    }

    fn evaluate_inner(
        &mut self,
        input: &InputStream,
        output: &OutputStream,
        formatter: &dyn DataFormatter,
    ) -> CepResult<()> {
        for raw in input {
            let event = Event::from_raw(&raw, formatter, self.next_seq)?;
            self.next_seq += 1;
            for m in self.process_event(&event)? {
                output.add_item(m)?;
            }
        }
        for m in self.finish() {
            output.add_item(m)?;
        }
        Ok(())
    }

    pub fn structure_summary(&self) -> String {
        self.variant.structure_summary()
    }
}
