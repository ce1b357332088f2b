// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use super::mechanism::{
    AdaptiveSinglePattern, EvaluationVariant, StaticMultiPattern, TreeBasedEvaluationMechanism,
};
use crate::core::config::{EvaluationConfig, OptimizerKind, PlanBuilderKind};
use crate::core::error::{CepError, CepResult};
use crate::core::event::Timestamp;
use crate::core::optimizer::{
    Optimizer, StaticOptimizer, StatisticsDeviationOptimizer, TrivialOptimizer,
};
use crate::core::statistics::PatternStatisticsCollector;
use crate::core::tree::{
    AscendingFrequencyBuilder, MultiPatternTree, TreePlanBuilder, TrivialLeftDeepBuilder,
};
use crate::query_api::pattern::{Pattern, PatternStructure};
use crate::query_api::transformation::PatternTransformation;

/// Builds evaluation mechanisms for a fixed pattern set.
///
/// Patterns are validated and rewritten once, at construction; every call to
/// [`MechanismFactory::build`] then yields an independent mechanism, which is
/// how each parallel unit gets its own copy. A pattern set that is a single
/// pattern after rewriting runs adaptively; anything else runs as a static
/// multi-pattern forest whose match indices follow the rewritten order.
#[derive(Debug, Clone)]
pub struct MechanismFactory {
    patterns: Vec<Pattern>,
    config: EvaluationConfig,
}

impl MechanismFactory {
    pub fn new(patterns: Vec<Pattern>, config: EvaluationConfig) -> CepResult<Self> {
        config.validate()?;
        if patterns.is_empty() {
            return Err(CepError::configuration("no pattern to evaluate"));
        }
        let transformation = PatternTransformation::new(config.pattern_rules.clone());
        let mut rewritten = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            // Structure is checked after rewriting, which removes double
            // and compound negations.
            pattern.validate_window()?;
            for transformed in transformation.transform(pattern) {
                rewritten.extend(split_shared_root_or(transformed));
            }
        }
        if rewritten.len() != patterns.len() {
            log::info!(
                "Pattern rules turned {} patterns into {}",
                patterns.len(),
                rewritten.len()
            );
        }
        if rewritten.len() > 1 && rewritten.iter().any(|p| !p.freeze_names().is_empty()) {
            return Err(CepError::configuration_with_key(
                format!(
                    "consumption policies need a single pattern, got {} after rewriting",
                    rewritten.len()
                ),
                "pattern.consumption_policy",
            ));
        }
        for pattern in &rewritten {
            pattern.validate()?;
        }
        Ok(Self {
            patterns: rewritten,
            config,
        })
    }

    pub fn single(pattern: Pattern, config: EvaluationConfig) -> CepResult<Self> {
        Self::new(vec![pattern], config)
    }

    /// Patterns after rewriting.
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Largest window among the patterns.
    pub fn max_window(&self) -> Timestamp {
        self.patterns.iter().map(|p| p.window).max().unwrap_or(0)
    }

    pub fn is_adaptive(&self) -> bool {
        self.patterns.len() == 1
    }

    pub fn build(&self) -> CepResult<TreeBasedEvaluationMechanism> {
        let variant = if let [pattern] = self.patterns.as_slice() {
            let statistics = &self.config.statistics;
            EvaluationVariant::AdaptiveSinglePattern(AdaptiveSinglePattern::new(
                pattern.clone(),
                self.optimizer()?,
                Box::new(PatternStatisticsCollector::new(
                    pattern,
                    statistics.horizon(),
                    statistics.sample_size,
                )),
                self.config.swap_policy,
                self.config.storage.clone(),
                statistics.update_window_ms,
            )?)
        } else {
            let forest = MultiPatternTree::new(
                &self.patterns,
                self.plan_builder().as_ref(),
                &self.config.storage,
            )?;
            EvaluationVariant::StaticMultiPattern(StaticMultiPattern::new(forest))
        };
        Ok(TreeBasedEvaluationMechanism::new(variant))
    }

    fn plan_builder(&self) -> Box<dyn TreePlanBuilder> {
        match self.config.optimizer.plan_builder {
            PlanBuilderKind::TrivialLeftDeep => Box::new(TrivialLeftDeepBuilder),
            PlanBuilderKind::AscendingFrequency => Box::new(AscendingFrequencyBuilder),
        }
    }

    fn optimizer(&self) -> CepResult<Box<dyn Optimizer>> {
        let builder = self.plan_builder();
        Ok(match self.config.optimizer.kind {
            OptimizerKind::Static => Box::new(StaticOptimizer::new(builder)),
            OptimizerKind::Trivial => Box::new(TrivialOptimizer::new(builder)),
            OptimizerKind::StatisticsDeviation => Box::new(StatisticsDeviationOptimizer::new(
                builder,
                self.config.optimizer.deviation_threshold,
            )?),
        })
    }
}

/// A root disjunction whose alternatives reuse binding names (as lifted by
/// `TopmostOr`) cannot share one tree; it becomes one pattern per alternative.
fn split_shared_root_or(pattern: Pattern) -> Vec<Pattern> {
    let PatternStructure::Or(alternatives) = &pattern.structure else {
        return vec![pattern];
    };
    let mut seen = BTreeSet::new();
    let shared = alternatives
        .iter()
        .flat_map(|alt| alt.positive_leaves().into_iter().chain(alt.negative_leaves()))
        .any(|leaf| !seen.insert(leaf.name));
    if !shared {
        return vec![pattern];
    }
    alternatives
        .iter()
        .map(|alt| {
            let names: BTreeSet<String> = alt
                .positive_leaves()
                .into_iter()
                .chain(alt.negative_leaves())
                .map(|l| l.name)
                .collect();
            let mut split = pattern.clone();
            split.condition = pattern.condition.condition_of(&names);
            split.structure = alt.clone();
            split
        })
        .collect()
}
