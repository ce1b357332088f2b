// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree plan optimizers
//!
//! An [`Optimizer`] decides, from a statistics snapshot, whether the running
//! tree should be rebuilt and produces the new plan through a
//! [`TreePlanBuilder`].

use std::fmt::Debug;

use crate::core::error::{CepError, CepResult};
use crate::core::statistics::StatisticsSnapshot;
use crate::core::tree::plan::{AscendingFrequencyBuilder, TreePlan, TreePlanBuilder};
use crate::query_api::pattern::Pattern;

pub trait Optimizer: Send + Debug {
    fn needs_optimize(&mut self, snapshot: &StatisticsSnapshot, pattern: &Pattern) -> bool;

    fn build_tree_plan(
        &mut self,
        snapshot: &StatisticsSnapshot,
        pattern: &Pattern,
    ) -> CepResult<TreePlan>;

    /// Plan for the tree built before any statistics exist.
    fn build_initial_plan(&mut self, pattern: &Pattern) -> CepResult<TreePlan>;
}

/// Never re-optimizes.
#[derive(Debug)]
pub struct StaticOptimizer {
    builder: Box<dyn TreePlanBuilder>,
}

impl StaticOptimizer {
    pub fn new(builder: Box<dyn TreePlanBuilder>) -> Self {
        Self { builder }
    }
}

impl Default for StaticOptimizer {
    fn default() -> Self {
        Self::new(Box::new(AscendingFrequencyBuilder))
    }
}

impl Optimizer for StaticOptimizer {
    fn needs_optimize(&mut self, _snapshot: &StatisticsSnapshot, _pattern: &Pattern) -> bool {
        false
    }

    fn build_tree_plan(
        &mut self,
        snapshot: &StatisticsSnapshot,
        pattern: &Pattern,
    ) -> CepResult<TreePlan> {
        self.builder.build_plan(pattern, Some(snapshot))
    }

    fn build_initial_plan(&mut self, pattern: &Pattern) -> CepResult<TreePlan> {
        self.builder.build_plan(pattern, pattern.statistics())
    }
}

/// Re-optimizes on every statistics cycle.
#[derive(Debug)]
pub struct TrivialOptimizer {
    builder: Box<dyn TreePlanBuilder>,
}

impl TrivialOptimizer {
    pub fn new(builder: Box<dyn TreePlanBuilder>) -> Self {
        Self { builder }
    }
}

impl Default for TrivialOptimizer {
    fn default() -> Self {
        Self::new(Box::new(AscendingFrequencyBuilder))
    }
}

impl Optimizer for TrivialOptimizer {
    fn needs_optimize(&mut self, _snapshot: &StatisticsSnapshot, _pattern: &Pattern) -> bool {
        true
    }

    fn build_tree_plan(
        &mut self,
        snapshot: &StatisticsSnapshot,
        pattern: &Pattern,
    ) -> CepResult<TreePlan> {
        self.builder.build_plan(pattern, Some(snapshot))
    }

    fn build_initial_plan(&mut self, pattern: &Pattern) -> CepResult<TreePlan> {
        self.builder.build_plan(pattern, pattern.statistics())
    }
}

/// Re-optimizes when any statistic moved by more than `threshold` (relative)
/// since the snapshot the current plan was built from.
#[derive(Debug)]
pub struct StatisticsDeviationOptimizer {
    builder: Box<dyn TreePlanBuilder>,
    threshold: f64,
    baseline: Option<StatisticsSnapshot>,
}

impl StatisticsDeviationOptimizer {
    pub fn new(builder: Box<dyn TreePlanBuilder>, threshold: f64) -> CepResult<Self> {
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(CepError::configuration_with_key(
                format!("deviation threshold must be a non-negative number, got {threshold}"),
                "optimizer.deviation_threshold",
            ));
        }
        Ok(Self {
            builder,
            threshold,
            baseline: None,
        })
    }
}

impl Optimizer for StatisticsDeviationOptimizer {
    fn needs_optimize(&mut self, snapshot: &StatisticsSnapshot, _pattern: &Pattern) -> bool {
        match &self.baseline {
            None => true,
            Some(baseline) => snapshot.deviation_from(baseline) > self.threshold,
        }
    }

    fn build_tree_plan(
        &mut self,
        snapshot: &StatisticsSnapshot,
        pattern: &Pattern,
    ) -> CepResult<TreePlan> {
        let plan = self.builder.build_plan(pattern, Some(snapshot))?;
        self.baseline = Some(snapshot.clone());
        Ok(plan)
    }

    fn build_initial_plan(&mut self, pattern: &Pattern) -> CepResult<TreePlan> {
        self.baseline = pattern.statistics().cloned();
        self.builder.build_plan(pattern, pattern.statistics())
    }
}
