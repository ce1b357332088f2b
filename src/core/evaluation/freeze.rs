// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consumption policy: freezing
//!
//! A freezer is a binding name whose event, once seen, blocks the start of
//! new sequences until it is consumed by a match or falls out of the window.
//! The names it blocks are the ones preceding it, itself included, in every
//! flattened sequence of the pattern that contains it.

use std::collections::{HashMap, HashSet};

use crate::core::event::{Event, Timestamp};
use crate::core::tree::PatternMatch;
use crate::query_api::pattern::Pattern;

/// Freezer name to the names it suppresses.
pub type FreezeMap = HashMap<String, HashSet<String>>;

pub fn build_freeze_map(pattern: &Pattern) -> FreezeMap {
    let sequences = pattern.structure.flat_sequences();
    let mut map = FreezeMap::new();
    for freezer in pattern.freeze_names() {
        let mut blocked = HashSet::new();
        for sequence in &sequences {
            if let Some(position) = sequence.iter().position(|n| n == freezer) {
                blocked.extend(sequence[..=position].iter().cloned());
            }
        }
        if !blocked.is_empty() {
            map.insert(freezer.clone(), blocked);
        }
    }
    map
}

#[derive(Debug, Clone)]
struct ActiveFreezer {
    name: String,
    seq: u64,
    timestamp: Timestamp,
}

/// Runtime state of the freeze policy for one tree.
#[derive(Debug, Clone)]
pub struct FreezeGuard {
    map: FreezeMap,
    window: Timestamp,
    active: Vec<ActiveFreezer>,
}

impl FreezeGuard {
    pub fn new(pattern: &Pattern) -> Self {
        Self {
            map: build_freeze_map(pattern),
            window: pattern.window,
            active: Vec::new(),
        }
    }

    /// A guard that never suppresses anything.
    pub fn disabled() -> Self {
        Self {
            map: FreezeMap::new(),
            window: 0,
            active: Vec::new(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !self.map.is_empty()
    }

    pub fn freeze_map(&self) -> &FreezeMap {
        &self.map
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drop freezers older than the window.
    pub fn expire(&mut self, now: Timestamp) {
        let window = self.window;
        self.active.retain(|f| now - f.timestamp <= window);
    }

    pub fn is_suppressed(&self, name: &str) -> bool {
        self.active
            .iter()
            .any(|f| self.map.get(&f.name).is_some_and(|blocked| blocked.contains(name)))
    }

    /// Register `event` if it was bound to a freezer name.
    pub fn register(&mut self, name: &str, event: &Event) {
        if self.map.contains_key(name) {
            log::trace!("Freezer '{}' activated by event #{}", name, event.seq);
            self.active.push(ActiveFreezer {
                name: name.to_string(),
                seq: event.seq,
                timestamp: event.timestamp,
            });
        }
    }

    /// Release freezers consumed by any of `matches`.
    pub fn on_matches(&mut self, matches: &[PatternMatch]) {
        if self.active.is_empty() || matches.is_empty() {
            return;
        }
        self.active
            .retain(|f| !matches.iter().any(|m| m.contains_seq(f.seq)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Payload;
    use crate::query_api::condition::Condition;
    use crate::query_api::pattern::{ConsumptionPolicy, PatternStructure as S};
    use std::sync::Arc;

    fn pattern(freeze: &[&str]) -> Pattern {
        Pattern::with_window_millis(
            S::seq(vec![
                S::primitive("A", "a"),
                S::or(vec![S::primitive("B", "b"), S::primitive("C", "c")]),
                S::primitive("D", "d"),
            ]),
            Condition::True,
            10,
        )
        .with_consumption_policy(ConsumptionPolicy::freeze(freeze))
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_freeze_map_from_flat_sequences() {
        let map = build_freeze_map(&pattern(&["b", "d"]));
        assert_eq!(map["b"], set(&["a", "b"]));
        assert_eq!(map["d"], set(&["a", "b", "c", "d"]));
    }

    #[test]
    fn test_guard_lifecycle() {
        let mut guard = FreezeGuard::new(&pattern(&["b"]));
        assert!(guard.is_enabled());
        let b = Arc::new(Event::new("B", 5, Payload::new(), 3));
        guard.register("a", &b);
        assert_eq!(guard.active_count(), 0);
        guard.register("b", &b);
        assert!(guard.is_suppressed("a"));
        assert!(!guard.is_suppressed("d"));

        let consumed = PatternMatch::new(0, vec![("b".to_string(), Arc::clone(&b))]);
        guard.on_matches(&[consumed]);
        assert!(!guard.is_suppressed("a"));

        guard.register("b", &b);
        guard.expire(15);
        assert!(guard.is_suppressed("a"));
        guard.expire(16);
        assert!(!guard.is_suppressed("a"));
    }

    #[test]
    fn test_disabled_guard() {
        let guard = FreezeGuard::new(&pattern(&[]));
        assert!(!guard.is_enabled());
        assert!(!FreezeGuard::disabled().is_suppressed("a"));
    }
}
