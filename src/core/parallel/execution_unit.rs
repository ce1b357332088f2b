// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution units
//!
//! A unit consumes its private inbox on its own thread and hosts one
//! evaluation mechanism per open slot. Matches pass the slot's scope filter
//! and go to the shared match stream, tagged with the unit id.
//!
//! Once the run is aborted (by this unit or anyone else) a unit stops
//! evaluating but keeps reading its inbox until it is closed, so the
//! dispatcher never blocks on a full inbox. Free-pool releases are honored
//! even then.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam::utils::CachePadded;
use crossbeam_channel::Sender;

use super::classifier::{Admission, SlotId, SlotScope, UnitMessage};
use super::dedup::TaggedMatch;
use crate::core::error::{CepError, CepResult};
use crate::core::evaluation::{MechanismFactory, TreeBasedEvaluationMechanism};
use crate::core::stream::Stream;
use crate::core::tree::PatternMatch;

/// Counters of one unit, updated by its worker only.
#[derive(Debug, Default)]
pub struct UnitMetrics {
    events_processed: CachePadded<AtomicU64>,
    matches_emitted: CachePadded<AtomicU64>,
    slots_completed: CachePadded<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitMetricsSnapshot {
    pub unit: usize,
    pub events_processed: u64,
    pub matches_emitted: u64,
    pub slots_completed: u64,
}

impl UnitMetrics {
    pub fn snapshot(&self, unit: usize) -> UnitMetricsSnapshot {
        UnitMetricsSnapshot {
            unit,
            events_processed: self.events_processed.load(Ordering::Relaxed),
            matches_emitted: self.matches_emitted.load(Ordering::Relaxed),
            slots_completed: self.slots_completed.load(Ordering::Relaxed),
        }
    }
}

/// First error of a run, shared by the dispatcher, the units and the merge.
#[derive(Debug, Default)]
pub(crate) struct AbortSignal {
    aborted: AtomicBool,
    first: Mutex<Option<CepError>>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, error: CepError) {
        let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        if first.is_none() {
            log::error!("Aborting data-parallel evaluation: {error}");
            *first = Some(error);
        } else {
            log::debug!("Further error after abort: {error}");
        }
        self.aborted.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub(crate) fn take(&self) -> Option<CepError> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug)]
struct Slot {
    mechanism: TreeBasedEvaluationMechanism,
    scope: SlotScope,
}

#[derive(Debug)]
pub(crate) struct ExecutionUnit {
    id: usize,
    factory: Arc<MechanismFactory>,
    matches: Stream<TaggedMatch>,
    metrics: Arc<UnitMetrics>,
    release: Option<Sender<usize>>,
    slots: BTreeMap<SlotId, Slot>,
    summary: Option<String>,
}

impl ExecutionUnit {
    pub(crate) fn new(
        id: usize,
        factory: Arc<MechanismFactory>,
        matches: Stream<TaggedMatch>,
        metrics: Arc<UnitMetrics>,
        release: Option<Sender<usize>>,
    ) -> Self {
        Self {
            id,
            factory,
            matches,
            metrics,
            release,
            slots: BTreeMap::new(),
            summary: None,
        }
    }

    /// Consume the inbox until it is closed. Returns the structure summary of
    /// the last slot this unit completed.
    pub(crate) fn run(mut self, inbox: &Stream<UnitMessage>, abort: &AbortSignal) -> Option<String> {
        log::debug!("Unit {} started", self.id);
        let mut failed = false;
        for message in inbox {
            let release = matches!(message, UnitMessage::Close { release: true, .. });
            if !failed && !abort.is_aborted() {
                if let Err(e) = self.guarded(|unit| unit.handle(message)) {
                    abort.record(e);
                    failed = true;
                }
            }
            if release {
                self.release();
            }
        }
        if !failed && !abort.is_aborted() {
            if let Err(e) = self.guarded(ExecutionUnit::close_all) {
                abort.record(e);
            }
        }
        let metrics = self.metrics.snapshot(self.id);
        log::debug!(
            "Unit {} finished: {} events, {} matches, {} slots",
            self.id,
            metrics.events_processed,
            metrics.matches_emitted,
            metrics.slots_completed
        );
        self.summary
    }

    fn guarded<F>(&mut self, f: F) -> CepResult<()>
    where
        F: FnOnce(&mut Self) -> CepResult<()>,
    {
        let id = self.id;
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(result) => result,
            Err(payload) => Err(CepError::runtime(format!(
                "unit {} panicked: {}",
                id,
                panic_message(payload)
            ))),
        }
    }

    fn handle(&mut self, message: UnitMessage) -> CepResult<()> {
        match message {
            UnitMessage::Open { slot, scope } => {
                let mechanism = self.factory.build()?;
                self.slots.insert(slot, Slot { mechanism, scope });
                Ok(())
            }
            UnitMessage::Event { slot, event } => {
                let id = self.id;
                let state = self.slots.get_mut(&slot).ok_or_else(|| {
                    CepError::precondition(format!("unit {id} got an event for unopened slot {slot}"))
                })?;
                let matches = state.mechanism.process_event(&event)?;
                self.metrics.events_processed.fetch_add(1, Ordering::Relaxed);
                emit(id, &state.scope, matches, &self.matches, &self.metrics)
            }
            UnitMessage::Close { slot, .. } => self.close(slot),
        }
    }

    fn close(&mut self, slot: SlotId) -> CepResult<()> {
        let Some(mut state) = self.slots.remove(&slot) else {
            return Ok(());
        };
        let matches = state.mechanism.finish();
        emit(self.id, &state.scope, matches, &self.matches, &self.metrics)?;
        self.summary = Some(state.mechanism.structure_summary());
        self.metrics.slots_completed.fetch_add(1, Ordering::Relaxed);
        log::trace!("Unit {} closed slot {}", self.id, slot);
        Ok(())
    }

    fn close_all(&mut self) -> CepResult<()> {
        let open: Vec<SlotId> = self.slots.keys().copied().collect();
        for slot in open {
            self.close(slot)?;
        }
        Ok(())
    }

    fn release(&self) {
        if let Some(pool) = &self.release {
            // The dispatcher holds the receiver until the run ends.
            let _ = pool.send(self.id);
        }
    }
}

fn emit(
    unit: usize,
    scope: &SlotScope,
    matches: Vec<PatternMatch>,
    out: &Stream<TaggedMatch>,
    metrics: &UnitMetrics,
) -> CepResult<()> {
    for pattern_match in matches {
        if let Admission::Accept { may_duplicate } = scope.admit(&pattern_match)? {
            out.add_item(TaggedMatch {
                unit,
                pattern_match,
                may_duplicate,
            })?;
            metrics.matches_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EvaluationConfig;
    use crate::core::event::{Event, Payload};
    use crate::query_api::condition::Condition;
    use crate::query_api::pattern::{Pattern, PatternStructure as S};

    fn factory() -> Arc<MechanismFactory> {
        let pattern = Pattern::with_window_millis(
            S::seq(vec![S::primitive("A", "a"), S::primitive("B", "b")]),
            Condition::True,
            10,
        );
        Arc::new(MechanismFactory::single(pattern, EvaluationConfig::default()).unwrap())
    }

    fn event(event_type: &str, ts: i64, seq: u64) -> Arc<Event> {
        Arc::new(Event::new(event_type, ts, Payload::new(), seq))
    }

    #[test]
    fn test_unit_reports_slot_matches() {
        let matches = Stream::new("matches");
        let metrics = Arc::new(UnitMetrics::default());
        let unit = ExecutionUnit::new(3, factory(), matches.clone(), Arc::clone(&metrics), None);
        let inbox = Stream::from_items(
            "inbox",
            vec![
                UnitMessage::Open {
                    slot: 0,
                    scope: SlotScope::Unrestricted,
                },
                UnitMessage::Event {
                    slot: 0,
                    event: event("A", 1, 0),
                },
                UnitMessage::Event {
                    slot: 0,
                    event: event("B", 2, 1),
                },
            ],
        );
        let abort = AbortSignal::new();
        let summary = unit.run(&inbox, &abort);
        matches.close();

        assert!(!abort.is_aborted());
        assert_eq!(summary.as_deref(), Some("Seq(a, b)"));
        let reported: Vec<TaggedMatch> = matches.iter().collect();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].unit, 3);
        assert!(!reported[0].may_duplicate);
        assert_eq!(
            metrics.snapshot(3),
            UnitMetricsSnapshot {
                unit: 3,
                events_processed: 2,
                matches_emitted: 1,
                slots_completed: 1,
            }
        );
    }

    #[test]
    fn test_failed_unit_keeps_draining_and_releasing() {
        let (release, claim) = crossbeam_channel::unbounded();
        let matches = Stream::new("matches");
        let unit = ExecutionUnit::new(
            1,
            factory(),
            matches,
            Arc::new(UnitMetrics::default()),
            Some(release),
        );
        let inbox = Stream::from_items(
            "inbox",
            vec![
                UnitMessage::Event {
                    slot: 9,
                    event: event("A", 1, 0),
                },
                UnitMessage::Close {
                    slot: 9,
                    release: true,
                },
            ],
        );
        let abort = AbortSignal::new();
        unit.run(&inbox, &abort);
        assert!(abort.is_aborted());
        assert!(matches!(
            abort.take(),
            Some(CepError::PreconditionViolation { .. })
        ));
        assert_eq!(claim.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_abort_signal_survives_a_panicking_holder() {
        let abort = Arc::new(AbortSignal::new());
        let holder = {
            let abort = Arc::clone(&abort);
            std::thread::spawn(move || {
                let _guard = abort.first.lock().unwrap();
                panic!("unit died while recording");
            })
        };
        assert!(holder.join().is_err());
        assert!(abort.first.is_poisoned());

        abort.record(CepError::runtime("first"));
        abort.record(CepError::runtime("second"));
        assert!(abort.is_aborted());
        assert!(matches!(
            abort.take(),
            Some(CepError::Runtime { ref message, .. }) if message == "first"
        ));
        assert!(abort.take().is_none());
    }
}
