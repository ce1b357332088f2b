// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree plans
//!
//! A [`TreePlan`] fixes the join shape of a matching tree over the positive
//! leaves of a pattern. Matching semantics do not depend on the shape: every
//! join re-checks precedence, window and the conditions it can decide, so any
//! plan that covers each leaf exactly once yields the same matches. Plans only
//! differ in how many partial matches they materialize.

use std::cmp::Ordering;
use std::fmt::{self, Debug};

use crate::core::error::{CepError, CepResult};
use crate::core::statistics::StatisticsSnapshot;
use crate::query_api::pattern::{Pattern, PatternStructure};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TreePlan {
    /// Positive leaf index
    Leaf(usize),
    Join(Box<TreePlan>, Box<TreePlan>),
    Union(Box<TreePlan>, Box<TreePlan>),
}

impl TreePlan {
    pub fn join(left: TreePlan, right: TreePlan) -> Self {
        TreePlan::Join(Box::new(left), Box::new(right))
    }

    pub fn union(left: TreePlan, right: TreePlan) -> Self {
        TreePlan::Union(Box::new(left), Box::new(right))
    }

    /// Leaf indices, left to right.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<usize>) {
        match self {
            TreePlan::Leaf(i) => out.push(*i),
            TreePlan::Join(l, r) | TreePlan::Union(l, r) => {
                l.collect_leaves(out);
                r.collect_leaves(out);
            }
        }
    }

    /// Check the plan covers leaves `0..leaf_count` exactly once.
    pub fn validate(&self, leaf_count: usize) -> CepResult<()> {
        let mut leaves = self.leaves();
        leaves.sort_unstable();
        if leaves != (0..leaf_count).collect::<Vec<_>>() {
            return Err(CepError::configuration(format!(
                "tree plan {self} does not cover leaves 0..{leaf_count} exactly once"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TreePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreePlan::Leaf(i) => write!(f, "{i}"),
            TreePlan::Join(l, r) => write!(f, "Join({l}, {r})"),
            TreePlan::Union(l, r) => write!(f, "Union({l}, {r})"),
        }
    }
}

/// Produces a tree plan for a pattern. Statistics are optional; builders
/// that need them fall back to the pattern's attached statistics and then to
/// declaration order.
pub trait TreePlanBuilder: Send + Sync + Debug {
    fn build_plan(
        &self,
        pattern: &Pattern,
        statistics: Option<&StatisticsSnapshot>,
    ) -> CepResult<TreePlan>;
}

/// Left-deep joins in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialLeftDeepBuilder;

impl TreePlanBuilder for TrivialLeftDeepBuilder {
    fn build_plan(
        &self,
        pattern: &Pattern,
        _statistics: Option<&StatisticsSnapshot>,
    ) -> CepResult<TreePlan> {
        plan_for(pattern, None)
    }
}

/// Left-deep joins with the rarest operand of every Seq/And group first.
#[derive(Debug, Clone, Copy, Default)]
pub struct AscendingFrequencyBuilder;

impl TreePlanBuilder for AscendingFrequencyBuilder {
    fn build_plan(
        &self,
        pattern: &Pattern,
        statistics: Option<&StatisticsSnapshot>,
    ) -> CepResult<TreePlan> {
        let rates = statistics
            .or_else(|| pattern.statistics())
            .map(|s| s.arrival_rates.as_slice());
        plan_for(pattern, rates)
    }
}

fn plan_for(pattern: &Pattern, rates: Option<&[f64]>) -> CepResult<TreePlan> {
    let positive = pattern.structure.positive_structure().ok_or_else(|| {
        CepError::unsupported_pattern(format!(
            "pattern has no positive event: {}",
            pattern.structure
        ))
    })?;
    let mut next = 0usize;
    let (plan, _) = build(&positive, &mut next, rates);
    Ok(plan)
}

// Returns the plan and an estimated arrival rate used to order siblings.
fn build(structure: &PatternStructure, next: &mut usize, rates: Option<&[f64]>) -> (TreePlan, f64) {
    match structure {
        PatternStructure::Primitive { .. } => {
            let index = *next;
            *next += 1;
            let rate = rates.and_then(|r| r.get(index).copied()).unwrap_or(0.0);
            (TreePlan::Leaf(index), rate)
        }
        // Removed by `positive_structure`
        PatternStructure::Not(_) => unreachable!("negation in positive structure"),
        PatternStructure::Seq(args) | PatternStructure::And(args) => {
            let mut operands: Vec<(TreePlan, f64)> =
                args.iter().map(|a| build(a, next, rates)).collect();
            if rates.is_some() {
                operands.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            }
            fold(operands, TreePlan::join, f64::min)
        }
        PatternStructure::Or(args) => {
            let operands: Vec<(TreePlan, f64)> =
                args.iter().map(|a| build(a, next, rates)).collect();
            fold(operands, TreePlan::union, |a, b| a + b)
        }
    }
}

fn fold(
    operands: Vec<(TreePlan, f64)>,
    combine: fn(TreePlan, TreePlan) -> TreePlan,
    rate: fn(f64, f64) -> f64,
) -> (TreePlan, f64) {
    let mut iter = operands.into_iter();
    // Containers always have at least one operand after negation removal
    let first = iter.next().unwrap_or((TreePlan::Leaf(0), 0.0));
    iter.fold(first, |(acc, acc_rate), (plan, r)| {
        (combine(acc, plan), rate(acc_rate, r))
    })
}
