// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use super::node::{conjuncts_hold, NodeCondition};
use super::partial_match::{MatchBindings, PartialMatch};
use crate::core::error::CepResult;
use crate::core::event::{Event, Timestamp};
use crate::query_api::condition::Condition;
use crate::query_api::pattern::NegationRange;

/// Filter stacked above the positive root for one negated primitive.
///
/// Keeps the recent events of the negated type. A match is invalidated by an
/// event inside its [`NegationRange`] that satisfies every conjunct reading
/// the negated name.
#[derive(Debug)]
pub(crate) struct NegationNode {
    range: NegationRange,
    conditions: Vec<NodeCondition>,
    history: VecDeque<Arc<Event>>,
}

impl NegationNode {
    pub(crate) fn new(
        range: NegationRange,
        condition: &Condition,
        positive_names: &BTreeSet<String>,
    ) -> Self {
        let name = range.leaf.name.clone();
        let conditions = condition
            .conjuncts()
            .into_iter()
            .filter_map(|c| {
                let names = c.names();
                let relevant = names.contains(&name)
                    && names.iter().all(|n| n == &name || positive_names.contains(n));
                relevant.then(|| NodeCondition {
                    condition: c.clone(),
                    names,
                })
            })
            .collect();
        Self {
            range,
            conditions,
            history: VecDeque::new(),
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.range.leaf.name
    }

    #[inline]
    pub(crate) fn is_trailing(&self) -> bool {
        self.range.is_trailing()
    }

    pub(crate) fn record(&mut self, event: Arc<Event>) {
        self.history.push_back(event);
    }

    /// Forget events no longer able to fall inside any live match's range.
    pub(crate) fn prune(&mut self, now: Timestamp, window: Timestamp) {
        self.history.retain(|e| e.timestamp >= now - window);
    }

    fn in_range(&self, pm: &PartialMatch, event: &Event, window: Timestamp) -> bool {
        let key = (event.timestamp, event.seq);
        let after = self
            .range
            .after
            .iter()
            .filter_map(|l| pm.event_for(*l))
            .map(|e| (e.timestamp, e.seq))
            .max();
        let before = self
            .range
            .before
            .iter()
            .filter_map(|l| pm.event_for(*l))
            .map(|e| (e.timestamp, e.seq))
            .min();
        let lower = match after {
            Some(bound) => bound < key,
            None => event.timestamp >= pm.last_timestamp() - window,
        };
        let upper = match before {
            Some(bound) => key < bound,
            None => event.timestamp <= pm.first_timestamp() + window,
        };
        lower && upper
    }

    /// Whether `event` rules out `pm`.
    pub(crate) fn invalidates(
        &self,
        pm: &PartialMatch,
        event: &Event,
        names: &HashMap<String, usize>,
        window: Timestamp,
    ) -> CepResult<bool> {
        if pm.contains_seq(event.seq) || !self.in_range(pm, event, window) {
            return Ok(false);
        }
        let bindings = MatchBindings {
            names,
            partial: pm,
            extra: Some((self.name(), event)),
        };
        conjuncts_hold(&self.conditions, &bindings)
    }

    /// Whether any already observed event rules out `pm`.
    pub(crate) fn invalidated_by_history(
        &self,
        pm: &PartialMatch,
        names: &HashMap<String, usize>,
        window: Timestamp,
    ) -> CepResult<bool> {
        for event in &self.history {
            if self.invalidates(pm, event, names, window)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
