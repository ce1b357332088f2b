// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pattern statistics
//!
//! Arrival rates per positive leaf and the pairwise selectivity matrix, either
//! collected online by a [`StatisticsCollector`] or computed offline over a
//! finite slice with the helpers in [`selectivity`].

pub mod collector;
pub mod selectivity;

pub use collector::{PatternStatisticsCollector, StatisticsCollector};
pub use selectivity::{arrival_rates, condition_selectivity, selectivity_matrix};

use serde::{Deserialize, Serialize};

/// Point-in-time statistics for one pattern, indexed by positive leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Events per second
    pub arrival_rates: Vec<f64>,
    pub selectivity: Vec<Vec<f64>>,
}

impl StatisticsSnapshot {
    pub fn new(arrival_rates: Vec<f64>, selectivity: Vec<Vec<f64>>) -> Self {
        Self {
            arrival_rates,
            selectivity,
        }
    }

    /// Largest relative change of any value against `previous`. Shape
    /// mismatches count as a full change.
    pub fn deviation_from(&self, previous: &StatisticsSnapshot) -> f64 {
        if self.arrival_rates.len() != previous.arrival_rates.len()
            || self.selectivity.len() != previous.selectivity.len()
        {
            return f64::INFINITY;
        }
        let rates = self
            .arrival_rates
            .iter()
            .zip(&previous.arrival_rates)
            .map(|(now, before)| relative_change(*now, *before));
        let selectivities = self
            .selectivity
            .iter()
            .zip(&previous.selectivity)
            .flat_map(|(row, prev)| row.iter().zip(prev).map(|(a, b)| relative_change(*a, *b)));
        rates.chain(selectivities).fold(0.0, f64::max)
    }
}

fn relative_change(now: f64, before: f64) -> f64 {
    if before == 0.0 {
        if now == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((now - before) / before).abs()
    }
}
