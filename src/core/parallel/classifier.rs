// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event classification for data-parallel evaluation
//!
//! The dispatcher hands every parsed event to an [`EventClassifier`], which
//! answers with unit messages: open a slot, play an event in a slot, close a
//! slot. A slot is one evaluation mechanism inside a unit; key-hash and
//! grouping use a single slot per unit, interval partitioning one slot per
//! time interval.

use std::fmt::Debug;
use std::sync::Arc;

use super::grouping::GroupingGrid;
use super::interval::IntervalScope;
use crate::core::error::CepResult;
use crate::core::event::{AttributeValue, Event};
use crate::core::tree::PatternMatch;

pub type SlotId = u64;

/// Verdict of a slot on one of its matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Reject,
    Accept { may_duplicate: bool },
}

/// Which matches a slot reports.
#[derive(Debug, Clone)]
pub enum SlotScope {
    /// Every match.
    Unrestricted,
    /// Matches ending in the slot's authoritative interval.
    Interval(IntervalScope),
    /// Matches whose canonical grid cell is owned by `unit`.
    Grouping { grid: Arc<GroupingGrid>, unit: usize },
}

impl SlotScope {
    pub fn admit(&self, m: &PatternMatch) -> CepResult<Admission> {
        match self {
            SlotScope::Unrestricted => Ok(Admission::Accept {
                may_duplicate: false,
            }),
            SlotScope::Interval(scope) => Ok(scope.admit(m)),
            SlotScope::Grouping { grid, unit } => {
                if grid.owner(m)? == *unit {
                    Ok(Admission::Accept {
                        may_duplicate: false,
                    })
                } else {
                    Ok(Admission::Reject)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum UnitMessage {
    Open { slot: SlotId, scope: SlotScope },
    Event { slot: SlotId, event: Arc<Event> },
    /// Flush and drop the slot. `release` returns the unit to the free pool.
    Close { slot: SlotId, release: bool },
}

/// Receives the messages of one classification, in order.
pub type Deliver<'a> = dyn FnMut(usize, UnitMessage) -> CepResult<()> + 'a;

pub trait EventClassifier: Send + Debug {
    /// Route one event. Messages are delivered as they are produced, so a
    /// close reaches its unit before the classifier waits for a free one.
    fn classify(&mut self, event: &Arc<Event>, deliver: &mut Deliver<'_>) -> CepResult<()>;

    fn units(&self) -> usize;
}

/// `value mod modulus` with Euclidean semantics for numeric values; `None`
/// for non-numeric or non-finite values.
pub(crate) fn numeric_bucket(value: &AttributeValue, modulus: u64) -> Option<u64> {
    match value {
        AttributeValue::Long(v) => Some(v.rem_euclid(modulus as i64) as u64),
        AttributeValue::Double(v) if v.is_finite() => {
            Some(v.rem_euclid(modulus as f64).floor() as u64 % modulus)
        }
        _ => None,
    }
}

/// Tracks which units already got their single slot opened.
#[derive(Debug)]
pub(crate) struct SingleSlotTracker {
    opened: Vec<bool>,
}

impl SingleSlotTracker {
    pub(crate) fn new(units: usize) -> Self {
        Self {
            opened: vec![false; units],
        }
    }

    pub(crate) fn deliver_event(
        &mut self,
        unit: usize,
        event: &Arc<Event>,
        scope: impl FnOnce() -> SlotScope,
        deliver: &mut Deliver<'_>,
    ) -> CepResult<()> {
        if !self.opened[unit] {
            self.opened[unit] = true;
            deliver(
                unit,
                UnitMessage::Open {
                    slot: 0,
                    scope: scope(),
                },
            )?;
        }
        deliver(
            unit,
            UnitMessage::Event {
                slot: 0,
                event: Arc::clone(event),
            },
        )
    }
}
