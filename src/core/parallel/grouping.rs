// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-attribute grouping
//!
//! Every grouped event type is one dimension of a grid with `g` groups per
//! dimension, `g` being the smallest integer with `g^D >= N`. A cell is a
//! number whose base-`g` digits are its coordinates. An event of dimension
//! `k` whose attribute value is `v` belongs to every cell with digit
//! `k = v mod g`; cells fold onto units by `cell mod N`.
//!
//! Events that agree on their group meet in at least one cell. The match is
//! reported only by the unit owning its canonical cell, built from the group
//! of the earliest event of each dimension (0 for dimensions the match does
//! not use).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::classifier::{numeric_bucket, Deliver, EventClassifier, SingleSlotTracker, SlotScope};
use crate::core::config::GroupingAttribute;
use crate::core::error::{CepError, CepResult};
use crate::core::event::Event;
use crate::core::tree::PatternMatch;

#[derive(Debug)]
pub struct GroupingGrid {
    dimensions: Vec<GroupingAttribute>,
    by_type: HashMap<String, usize>,
    groups: u64,
    units: usize,
}

impl GroupingGrid {
    pub fn new(dimensions: Vec<GroupingAttribute>, units: usize) -> CepResult<Self> {
        if units == 0 {
            return Err(CepError::configuration_with_key(
                "at least one execution unit is required",
                "parallel.units",
            ));
        }
        if dimensions.is_empty() {
            return Err(CepError::configuration_with_key(
                "grouping needs at least one attribute",
                "parallel.strategy.attributes",
            ));
        }
        let mut by_type = HashMap::new();
        for (k, dimension) in dimensions.iter().enumerate() {
            if by_type.insert(dimension.event_type.clone(), k).is_some() {
                return Err(CepError::configuration_with_key(
                    format!("event type '{}' is grouped twice", dimension.event_type),
                    "parallel.strategy.attributes",
                ));
            }
        }
        let groups = groups_per_dimension(units, dimensions.len());
        log::debug!(
            "Grouping grid: {} dimensions, {} groups each, {} units",
            dimensions.len(),
            groups,
            units
        );
        Ok(Self {
            dimensions,
            by_type,
            groups,
            units,
        })
    }

    #[inline]
    pub fn groups(&self) -> u64 {
        self.groups
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Dimension and group of an event.
    pub fn coordinate(&self, event: &Event) -> CepResult<(usize, u64)> {
        let k = *self.by_type.get(&event.event_type).ok_or_else(|| {
            CepError::partition(format!(
                "event type '{}' has no grouping attribute",
                event.event_type
            ))
        })?;
        let attribute = &self.dimensions[k].attribute;
        let value = event.attribute(attribute).ok_or_else(|| {
            CepError::partition(format!(
                "event #{} of type '{}' has no attribute '{}'",
                event.seq, event.event_type, attribute
            ))
        })?;
        let group = numeric_bucket(value, self.groups).ok_or_else(|| {
            CepError::partition(format!(
                "grouping attribute '{}' of event #{} is not numeric: {}",
                attribute, event.seq, value
            ))
        })?;
        Ok((k, group))
    }

    /// Units hosting at least one cell of the event, ascending.
    pub fn units_for(&self, event: &Event) -> CepResult<Vec<usize>> {
        let (k, group) = self.coordinate(event)?;
        let low_span = self.groups.pow(k as u32);
        let high_span = self.groups.pow((self.dimensions.len() - k - 1) as u32);
        let mut units = BTreeSet::new();
        'cells: for high in 0..high_span {
            for low in 0..low_span {
                let cell = low + group * low_span + high * low_span * self.groups;
                units.insert((cell % self.units as u64) as usize);
                if units.len() == self.units {
                    break 'cells;
                }
            }
        }
        Ok(units.into_iter().collect())
    }

    pub fn canonical_cell(&self, m: &PatternMatch) -> CepResult<u64> {
        let mut earliest: Vec<Option<&Arc<Event>>> = vec![None; self.dimensions.len()];
        for event in m.events() {
            if let Some(&k) = self.by_type.get(&event.event_type) {
                if earliest[k].map_or(true, |current| event.precedes(current)) {
                    earliest[k] = Some(event);
                }
            }
        }
        let mut cell = 0;
        let mut place = 1;
        for event in earliest {
            if let Some(event) = event {
                cell += self.coordinate(event)?.1 * place;
            }
            place *= self.groups;
        }
        Ok(cell)
    }

    /// Unit that reports the match.
    pub fn owner(&self, m: &PatternMatch) -> CepResult<usize> {
        Ok((self.canonical_cell(m)? % self.units as u64) as usize)
    }
}

// Smallest g with g^d >= units.
fn groups_per_dimension(units: usize, dimensions: usize) -> u64 {
    let mut g: u64 = 1;
    while g
        .checked_pow(dimensions as u32)
        .is_some_and(|cells| cells < units as u64)
    {
        g += 1;
    }
    g
}

#[derive(Debug)]
pub struct GroupingClassifier {
    grid: Arc<GroupingGrid>,
    slots: SingleSlotTracker,
}

impl GroupingClassifier {
    pub fn new(attributes: Vec<GroupingAttribute>, units: usize) -> CepResult<Self> {
        Ok(Self {
            grid: Arc::new(GroupingGrid::new(attributes, units)?),
            slots: SingleSlotTracker::new(units),
        })
    }

    pub fn grid(&self) -> &Arc<GroupingGrid> {
        &self.grid
    }
}

impl EventClassifier for GroupingClassifier {
    fn classify(&mut self, event: &Arc<Event>, deliver: &mut Deliver<'_>) -> CepResult<()> {
        for unit in self.grid.units_for(event)? {
            let grid = &self.grid;
            self.slots.deliver_event(
                unit,
                event,
                || SlotScope::Grouping {
                    grid: Arc::clone(grid),
                    unit,
                },
                deliver,
            )?;
        }
        Ok(())
    }

    fn units(&self) -> usize {
        self.grid.units
    }
}
