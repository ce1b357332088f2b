// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use super::classifier::{numeric_bucket, Deliver, EventClassifier, SingleSlotTracker, SlotScope};
use crate::core::error::{CepError, CepResult};
use crate::core::event::Event;

/// Routes every event to unit `key mod N`.
///
/// The key must be numeric. A first event without a usable key is a setup
/// error; a later one aborts the run with a partition error.
#[derive(Debug)]
pub struct KeyHashClassifier {
    key: String,
    units: usize,
    slots: SingleSlotTracker,
}

impl KeyHashClassifier {
    pub fn new(key: impl Into<String>, units: usize, first: &Event) -> CepResult<Self> {
        let key = key.into();
        if units == 0 {
            return Err(CepError::configuration_with_key(
                "at least one execution unit is required",
                "parallel.units",
            ));
        }
        let usable = first
            .attribute(&key)
            .and_then(|v| numeric_bucket(v, units as u64))
            .is_some();
        if !usable {
            return Err(CepError::configuration_with_key(
                format!(
                    "partition key '{}' has no numeric value in the first event ({})",
                    key, first
                ),
                "parallel.strategy.key",
            ));
        }
        Ok(Self {
            key,
            units,
            slots: SingleSlotTracker::new(units),
        })
    }

    pub fn destination(&self, event: &Event) -> CepResult<usize> {
        let value = event
            .attribute(&self.key)
            .ok_or_else(|| CepError::attribute_not_found(event.event_type.clone(), &self.key))?;
        numeric_bucket(value, self.units as u64)
            .map(|bucket| bucket as usize)
            .ok_or_else(|| {
                CepError::partition(format!(
                    "partition key '{}' of event #{} is not numeric: {}",
                    self.key, event.seq, value
                ))
            })
    }
}

impl EventClassifier for KeyHashClassifier {
    fn classify(&mut self, event: &Arc<Event>, deliver: &mut Deliver<'_>) -> CepResult<()> {
        let unit = self.destination(event)?;
        self.slots
            .deliver_event(unit, event, || SlotScope::Unrestricted, deliver)
    }

    fn units(&self) -> usize {
        self.units
    }
}
