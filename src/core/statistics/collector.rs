// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;

use super::StatisticsSnapshot;
use crate::core::error::{CepError, CepResult};
use crate::core::event::{Event, Timestamp};
use crate::query_api::condition::Condition;
use crate::query_api::pattern::{Pattern, PrimitiveLeaf};

/// Online statistics source for the adaptive loop.
pub trait StatisticsCollector: Send + Debug {
    fn record_event(&mut self, event: &Arc<Event>) -> CepResult<()>;

    /// Current statistics; `StatisticsUnavailable` until something was recorded.
    fn snapshot(&self) -> CepResult<StatisticsSnapshot>;
}

#[derive(Debug, Default, Clone, Copy)]
struct Ratio {
    trials: u64,
    hits: u64,
}

impl Ratio {
    fn value(&self) -> f64 {
        if self.trials == 0 {
            1.0
        } else {
            self.hits as f64 / self.trials as f64
        }
    }
}

/// Arrival rates over a sliding event-time horizon and selectivities sampled
/// against the most recent events of every leaf.
#[derive(Debug)]
pub struct PatternStatisticsCollector {
    leaves: Vec<PrimitiveLeaf>,
    leaves_by_type: HashMap<String, Vec<usize>>,
    /// Pairwise (and, on the diagonal, unary) conditions; `None` if trivial.
    conditions: Vec<Vec<Option<Condition>>>,
    horizon: Timestamp,
    sample_size: usize,
    arrivals: Vec<VecDeque<Timestamp>>,
    samples: Vec<VecDeque<Arc<Event>>>,
    ratios: Vec<Vec<Ratio>>,
    latest: Option<Timestamp>,
}

impl PatternStatisticsCollector {
    /// `horizon` is the event-time span (ms) arrival rates are measured over;
    /// `sample_size` bounds the events kept per leaf for selectivity trials.
    pub fn new(pattern: &Pattern, horizon: Timestamp, sample_size: usize) -> Self {
        let leaves = pattern.positive_leaves();
        let n = leaves.len();
        let mut leaves_by_type: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, leaf) in leaves.iter().enumerate() {
            leaves_by_type
                .entry(leaf.event_type.clone())
                .or_default()
                .push(i);
        }
        let conditions = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        let names =
                            BTreeSet::from([leaves[i].name.clone(), leaves[j].name.clone()]);
                        let condition = pattern.condition.condition_of(&names);
                        (!condition.is_true()).then_some(condition)
                    })
                    .collect()
            })
            .collect();
        Self {
            leaves,
            leaves_by_type,
            conditions,
            horizon: horizon.max(1),
            sample_size: sample_size.max(1),
            arrivals: vec![VecDeque::new(); n],
            samples: vec![VecDeque::new(); n],
            ratios: vec![vec![Ratio::default(); n]; n],
            latest: None,
        }
    }

    fn trial(&mut self, i: usize, j: usize, event: &Arc<Event>) -> CepResult<()> {
        let Some(condition) = &self.conditions[i][j] else {
            return Ok(());
        };
        let name_i = self.leaves[i].name.as_str();
        if i == j {
            let bindings = HashMap::from([(name_i, &event.payload)]);
            let hit = condition.eval(&bindings)?;
            record(&mut self.ratios[i][i], hit);
            return Ok(());
        }
        let name_j = self.leaves[j].name.as_str();
        let mut outcomes = Vec::with_capacity(self.samples[j].len());
        for other in &self.samples[j] {
            if other.seq == event.seq {
                continue;
            }
            let bindings = HashMap::from([(name_i, &event.payload), (name_j, &other.payload)]);
            outcomes.push(condition.eval(&bindings)?);
        }
        for hit in outcomes {
            record(&mut self.ratios[i][j], hit);
            record(&mut self.ratios[j][i], hit);
        }
        Ok(())
    }
}

fn record(ratio: &mut Ratio, hit: bool) {
    ratio.trials += 1;
    if hit {
        ratio.hits += 1;
    }
}

impl StatisticsCollector for PatternStatisticsCollector {
    fn record_event(&mut self, event: &Arc<Event>) -> CepResult<()> {
        let now = event.timestamp;
        self.latest = Some(self.latest.map_or(now, |l| l.max(now)));
        for arrivals in &mut self.arrivals {
            while arrivals.front().is_some_and(|ts| now - ts > self.horizon) {
                arrivals.pop_front();
            }
        }
        let Some(indices) = self.leaves_by_type.get(&event.event_type).cloned() else {
            return Ok(());
        };
        for &i in &indices {
            for j in 0..self.leaves.len() {
                self.trial(i, j, event)?;
            }
        }
        for &i in &indices {
            self.arrivals[i].push_back(now);
            self.samples[i].push_back(Arc::clone(event));
            if self.samples[i].len() > self.sample_size {
                self.samples[i].pop_front();
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> CepResult<StatisticsSnapshot> {
        if self.latest.is_none() {
            return Err(CepError::statistics_unavailable(
                "no event recorded since the collector was created",
            ));
        }
        let seconds = self.horizon as f64 / 1000.0;
        let arrival_rates = self
            .arrivals
            .iter()
            .map(|a| a.len() as f64 / seconds)
            .collect();
        let selectivity = self
            .ratios
            .iter()
            .map(|row| row.iter().map(Ratio::value).collect())
            .collect();
        Ok(StatisticsSnapshot::new(arrival_rates, selectivity))
    }
}
