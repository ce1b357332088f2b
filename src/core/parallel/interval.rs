// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interval partitioning with overlap
//!
//! Event time is cut into slots of `interval` milliseconds that advance by a
//! stride of `interval - W`, `W` being the largest pattern window. Starting
//! from the first timestamp `T0`, slot `j` owns the matches whose latest event
//! falls in `[T0 + jS, T0 + (j+1)S)` and receives every event of
//! `[T0 + jS - W, T0 + (j+1)S)`, so it sees the full window behind each match
//! it owns. Patterns with a trailing negation need one more window of events
//! after the owned range before a match can be confirmed.
//!
//! Events must arrive in non-decreasing timestamp order: a slot is closed as
//! soon as event time passes its range.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::classifier::{Admission, Deliver, EventClassifier, SlotId, SlotScope, UnitMessage};
use crate::core::config::SlotAssignment;
use crate::core::error::{CepError, CepResult};
use crate::core::event::{Event, Timestamp};
use crate::core::tree::PatternMatch;

/// Report filter of one interval slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalScope {
    /// Matches are kept when their latest event lies in `[owned.0, owned.1)`.
    pub owned: (Timestamp, Timestamp),
    /// Start of the range owned by the previous slot.
    pub previous_owned_start: Timestamp,
    /// Event ranges shared with the previous and the next slot.
    pub leading_overlap: (Timestamp, Timestamp),
    pub trailing_overlap: (Timestamp, Timestamp),
    /// Matches lying inside an overlap are reported by both slots holding
    /// it, tagged, and collapsed by the merge.
    pub shared: bool,
}

impl IntervalScope {
    pub fn admit(&self, m: &PatternMatch) -> Admission {
        let first = m.first_timestamp();
        let last = m.last_timestamp();
        let inside = |(start, end): (Timestamp, Timestamp)| start <= first && last < end;
        if self.owned.0 <= last && last < self.owned.1 {
            return Admission::Accept {
                may_duplicate: self.shared && inside(self.trailing_overlap),
            };
        }
        // Owned by the previous slot, whose trailing overlap is this
        // slot's leading one: the second sighting.
        if self.shared && inside(self.leading_overlap) && last >= self.previous_owned_start {
            return Admission::Accept {
                may_duplicate: true,
            };
        }
        Admission::Reject
    }
}

#[derive(Debug)]
enum Assigner {
    Modulo,
    FreePool {
        claim: Receiver<usize>,
        release: Sender<usize>,
    },
}

#[derive(Debug)]
pub struct IntervalClassifier {
    origin: Timestamp,
    window: Timestamp,
    interval: Timestamp,
    stride: Timestamp,
    lookahead: Timestamp,
    units: usize,
    assigner: Assigner,
    /// Open slot to hosting unit.
    open: BTreeMap<SlotId, usize>,
    watermark: Timestamp,
    slots_opened: u64,
    shared: bool,
}

impl IntervalClassifier {
    /// `window` is the largest pattern window; `lookahead` extends every
    /// slot past its owned range (a window for trailing negations, else 0).
    pub fn new(
        interval: Timestamp,
        assignment: SlotAssignment,
        units: usize,
        window: Timestamp,
        lookahead: Timestamp,
        origin: Timestamp,
    ) -> CepResult<Self> {
        if units == 0 {
            return Err(CepError::configuration_with_key(
                "at least one execution unit is required",
                "parallel.units",
            ));
        }
        if interval <= window {
            return Err(CepError::configuration_with_key(
                format!("interval ({interval}ms) must exceed the largest pattern window ({window}ms)"),
                "parallel.strategy.interval_ms",
            ));
        }
        let stride = interval - window;
        let assigner = match assignment {
            SlotAssignment::Modulo => Assigner::Modulo,
            SlotAssignment::FreePool => {
                let max_open = max_open_slots(window, lookahead, stride);
                if units < max_open {
                    return Err(CepError::configuration_with_key(
                        format!(
                            "free pool needs at least {max_open} units for interval {interval}ms and window {window}ms, got {units}"
                        ),
                        "parallel.units",
                    ));
                }
                let (release, claim) = bounded(units);
                for unit in 0..units {
                    release
                        .send(unit)
                        .map_err(|_| CepError::runtime("free unit pool closed during setup"))?;
                }
                Assigner::FreePool { claim, release }
            }
        };
        log::debug!(
            "Interval partitioning from {origin}: interval {interval}ms, stride {stride}ms, lookahead {lookahead}ms, {assignment:?} over {units} units"
        );
        Ok(Self {
            origin,
            window,
            interval,
            stride,
            lookahead,
            units,
            assigner,
            open: BTreeMap::new(),
            watermark: origin,
            slots_opened: 0,
            shared: false,
        })
    }

    /// Report overlap matches from both slots holding them. Only sound when
    /// a slot finds exactly what the owner finds for such a match: no
    /// negation reaching before the first positive event and no freeze
    /// policy.
    pub fn with_shared_overlaps(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Handle units use to return themselves to the free pool.
    pub fn release_handle(&self) -> Option<Sender<usize>> {
        match &self.assigner {
            Assigner::Modulo => None,
            Assigner::FreePool { release, .. } => Some(release.clone()),
        }
    }

    pub fn slots_opened(&self) -> u64 {
        self.slots_opened
    }

    fn slot_start(&self, slot: SlotId) -> Timestamp {
        self.origin + slot as Timestamp * self.stride - self.window
    }

    /// First timestamp the slot no longer receives.
    fn slot_end(&self, slot: SlotId) -> Timestamp {
        self.slot_start(slot) + self.interval + self.lookahead
    }

    /// Slots that receive an event at `timestamp`.
    pub fn slots_for(&self, timestamp: Timestamp) -> std::ops::RangeInclusive<SlotId> {
        let offset = timestamp - self.origin;
        let first = (offset - self.lookahead).div_euclid(self.stride).max(0) as SlotId;
        let last = (offset + self.window).div_euclid(self.stride).max(0) as SlotId;
        first..=last
    }

    pub fn scope(&self, slot: SlotId) -> IntervalScope {
        let start = self.slot_start(slot);
        let end = start + self.interval;
        IntervalScope {
            owned: (start + self.window, end),
            previous_owned_start: start + self.window - self.stride,
            leading_overlap: (start, start + self.window),
            trailing_overlap: (end - self.window, end),
            shared: self.shared,
        }
    }

    fn assign(&mut self, slot: SlotId) -> CepResult<usize> {
        match &self.assigner {
            Assigner::Modulo => Ok((slot % self.units as u64) as usize),
            Assigner::FreePool { claim, .. } => claim
                .recv()
                .map_err(|_| CepError::runtime("free unit pool closed")),
        }
    }
}

impl EventClassifier for IntervalClassifier {
    fn classify(&mut self, event: &Arc<Event>, deliver: &mut Deliver<'_>) -> CepResult<()> {
        let now = event.timestamp;
        if now < self.watermark {
            return Err(CepError::precondition(format!(
                "interval partitioning needs ordered timestamps: event #{} at {} after {}",
                event.seq, now, self.watermark
            )));
        }
        self.watermark = now;

        let release = matches!(self.assigner, Assigner::FreePool { .. });
        while let Some((&slot, &unit)) = self.open.first_key_value() {
            if self.slot_end(slot) > now {
                break;
            }
            self.open.remove(&slot);
            deliver(unit, UnitMessage::Close { slot, release })?;
        }

        for slot in self.slots_for(now) {
            let unit = match self.open.get(&slot) {
                Some(&unit) => unit,
                None => {
                    let unit = self.assign(slot)?;
                    self.open.insert(slot, unit);
                    self.slots_opened += 1;
                    log::trace!("Slot {slot} opened on unit {unit}");
                    deliver(
                        unit,
                        UnitMessage::Open {
                            slot,
                            scope: SlotScope::Interval(self.scope(slot)),
                        },
                    )?;
                    unit
                }
            };
            deliver(
                unit,
                UnitMessage::Event {
                    slot,
                    event: Arc::clone(event),
                },
            )?;
        }
        Ok(())
    }

    fn units(&self) -> usize {
        self.units
    }
}

// Slots open at once: those whose receive range contains the current time.
fn max_open_slots(window: Timestamp, lookahead: Timestamp, stride: Timestamp) -> usize {
    ((window + lookahead + stride - 1) / stride + 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Payload;

    fn event(ts: Timestamp, seq: u64) -> Arc<Event> {
        Arc::new(Event::new("A", ts, Payload::new(), seq))
    }

    fn collect(
        classifier: &mut IntervalClassifier,
        event: &Arc<Event>,
    ) -> Vec<(usize, UnitMessage)> {
        let mut sent = Vec::new();
        classifier
            .classify(event, &mut |unit, message| {
                sent.push((unit, message));
                Ok(())
            })
            .unwrap();
        sent
    }

    #[test]
    fn test_slot_ranges() {
        // interval 30, window 10: stride 20
        let classifier =
            IntervalClassifier::new(30, SlotAssignment::Modulo, 2, 10, 0, 100).unwrap();
        assert_eq!(classifier.slots_for(100), 0..=0);
        assert_eq!(classifier.slots_for(109), 0..=0);
        assert_eq!(classifier.slots_for(110), 0..=1);
        assert_eq!(classifier.slots_for(119), 0..=1);
        assert_eq!(classifier.slots_for(120), 1..=1);

        let scope = classifier.scope(1);
        assert_eq!(scope.owned, (120, 140));
        assert_eq!(scope.previous_owned_start, 100);
        assert_eq!(scope.leading_overlap, (110, 120));
        assert_eq!(scope.trailing_overlap, (130, 140));
    }

    fn match_between(first: Timestamp, last: Timestamp) -> PatternMatch {
        PatternMatch::new(
            0,
            vec![("a".to_string(), event(first, 0)), ("b".to_string(), event(last, 1))],
        )
    }

    #[test]
    fn test_scope_admission() {
        let classifier =
            IntervalClassifier::new(30, SlotAssignment::Modulo, 2, 10, 0, 100).unwrap();
        let scope = classifier.scope(1);
        assert!(!scope.shared);
        let accept = Admission::Accept {
            may_duplicate: false,
        };
        assert_eq!(scope.admit(&match_between(112, 119)), Admission::Reject);
        assert_eq!(scope.admit(&match_between(115, 125)), accept);
        assert_eq!(scope.admit(&match_between(131, 135)), accept);
        assert_eq!(scope.admit(&match_between(131, 140)), Admission::Reject);
    }

    #[test]
    fn test_overlap_matches_are_reported_by_both_slots() {
        let classifier = IntervalClassifier::new(30, SlotAssignment::Modulo, 2, 10, 0, 100)
            .unwrap()
            .with_shared_overlaps(true);
        let (previous, current, next) =
            (classifier.scope(0), classifier.scope(1), classifier.scope(2));
        let tagged = Admission::Accept {
            may_duplicate: true,
        };
        let untagged = Admission::Accept {
            may_duplicate: false,
        };

        // Inside [110, 120): owned by slot 0, also held by slot 1.
        let shared = match_between(112, 119);
        assert_eq!(previous.admit(&shared), tagged);
        assert_eq!(current.admit(&shared), tagged);
        assert_eq!(next.admit(&shared), Admission::Reject);

        // Starts before the overlap: slot 1 never held its first event.
        let straddling = match_between(105, 119);
        assert_eq!(previous.admit(&straddling), untagged);
        assert_eq!(current.admit(&straddling), Admission::Reject);

        assert_eq!(current.admit(&match_between(115, 125)), untagged);
        assert_eq!(current.admit(&match_between(131, 135)), tagged);
        assert_eq!(next.admit(&match_between(131, 135)), tagged);
    }

    #[test]
    fn test_every_tagged_match_is_seen_twice() {
        // With interval 15 the stride is 5, so three slots can hold one event.
        for interval in [15, 30, 45] {
            let classifier =
                IntervalClassifier::new(interval, SlotAssignment::Modulo, 4, 10, 0, 0)
                    .unwrap()
                    .with_shared_overlaps(true);
            let scopes: Vec<IntervalScope> =
                (0..60).map(|slot| classifier.scope(slot)).collect();
            for first in 0..200 {
                for last in first..=first + 10 {
                    let m = match_between(first, last);
                    // Slots whose receive range holds both events
                    let holders: Vec<&IntervalScope> = classifier
                        .slots_for(first)
                        .filter(|slot| classifier.slots_for(last).contains(slot))
                        .map(|slot| &scopes[slot as usize])
                        .collect();
                    let verdicts: Vec<Admission> =
                        holders.iter().map(|s| s.admit(&m)).collect();
                    let count = |may_duplicate: bool| {
                        verdicts
                            .iter()
                            .filter(|v| **v == Admission::Accept { may_duplicate })
                            .count()
                    };
                    let (owners, tagged) = (count(false), count(true));
                    assert!(
                        (owners == 1 && tagged == 0) || (owners == 0 && tagged == 2),
                        "interval {interval}, match [{first}, {last}]: {verdicts:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_modulo_opens_and_closes_slots() {
        let mut classifier =
            IntervalClassifier::new(30, SlotAssignment::Modulo, 2, 10, 0, 0).unwrap();
        let sent = collect(&mut classifier, &event(0, 0));
        assert!(matches!(sent[0], (0, UnitMessage::Open { slot: 0, .. })));
        assert!(matches!(sent[1], (0, UnitMessage::Event { slot: 0, .. })));

        let sent = collect(&mut classifier, &event(15, 1));
        assert!(matches!(sent[0], (0, UnitMessage::Event { slot: 0, .. })));
        assert!(matches!(sent[1], (1, UnitMessage::Open { slot: 1, .. })));
        assert!(matches!(sent[2], (1, UnitMessage::Event { slot: 1, .. })));

        let sent = collect(&mut classifier, &event(20, 2));
        assert!(matches!(
            sent[0],
            (
                0,
                UnitMessage::Close {
                    slot: 0,
                    release: false
                }
            )
        ));
        assert_eq!(classifier.slots_opened(), 2);
    }

    #[test]
    fn test_free_pool_reuses_released_units() {
        let mut classifier =
            IntervalClassifier::new(30, SlotAssignment::FreePool, 2, 10, 0, 0).unwrap();
        let release = classifier.release_handle().unwrap();
        collect(&mut classifier, &event(0, 0));
        collect(&mut classifier, &event(15, 1));
        let sent = collect(&mut classifier, &event(20, 2));
        let closed = match sent[0] {
            (unit, UnitMessage::Close { slot: 0, release: true }) => unit,
            ref other => panic!("unexpected message {other:?}"),
        };
        release.send(closed).unwrap();
        // Slot 2 starts at 30
        let sent = collect(&mut classifier, &event(35, 3));
        assert!(sent
            .iter()
            .any(|(unit, m)| *unit == closed && matches!(m, UnitMessage::Open { slot: 2, .. })));
    }

    #[test]
    fn test_invalid_setups() {
        assert!(IntervalClassifier::new(10, SlotAssignment::Modulo, 2, 10, 0, 0).is_err());
        // Stride 5 with window 10 keeps 3 slots open
        assert!(IntervalClassifier::new(15, SlotAssignment::FreePool, 2, 10, 0, 0).is_err());
        assert!(IntervalClassifier::new(15, SlotAssignment::FreePool, 3, 10, 0, 0).is_ok());
    }

    #[test]
    fn test_out_of_order_event_is_rejected() {
        let mut classifier =
            IntervalClassifier::new(30, SlotAssignment::Modulo, 2, 10, 0, 0).unwrap();
        collect(&mut classifier, &event(25, 0));
        let result = classifier.classify(&event(5, 1), &mut |_, _| Ok(()));
        assert!(matches!(result, Err(CepError::PreconditionViolation { .. })));
    }
}
