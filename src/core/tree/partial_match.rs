// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::event::{Event, Payload, Timestamp};
use crate::query_api::condition::Bindings;

/// In-progress match held by a tree node: the events bound so far, keyed by
/// positive leaf index and kept sorted by it.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialMatch {
    events: Vec<(usize, Arc<Event>)>,
    first_timestamp: Timestamp,
    last_timestamp: Timestamp,
}

impl PartialMatch {
    pub fn single(leaf: usize, event: Arc<Event>) -> Self {
        let ts = event.timestamp;
        Self {
            events: vec![(leaf, event)],
            first_timestamp: ts,
            last_timestamp: ts,
        }
    }

    /// Union of the bindings of two matches over disjoint leaves.
    pub fn merge(&self, other: &PartialMatch) -> PartialMatch {
        let mut events = Vec::with_capacity(self.events.len() + other.events.len());
        events.extend(self.events.iter().cloned());
        events.extend(other.events.iter().cloned());
        events.sort_by_key(|(leaf, _)| *leaf);
        PartialMatch {
            events,
            first_timestamp: self.first_timestamp.min(other.first_timestamp),
            last_timestamp: self.last_timestamp.max(other.last_timestamp),
        }
    }

    #[inline]
    pub fn events(&self) -> &[(usize, Arc<Event>)] {
        &self.events
    }

    #[inline]
    pub fn first_timestamp(&self) -> Timestamp {
        self.first_timestamp
    }

    #[inline]
    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    /// Span the match would have if merged with `other`.
    #[inline]
    pub fn span_with(&self, other: &PartialMatch) -> Timestamp {
        self.last_timestamp.max(other.last_timestamp)
            - self.first_timestamp.min(other.first_timestamp)
    }

    pub fn event_for(&self, leaf: usize) -> Option<&Arc<Event>> {
        self.events
            .binary_search_by_key(&leaf, |(l, _)| *l)
            .ok()
            .map(|i| &self.events[i].1)
    }

    pub fn contains_seq(&self, seq: u64) -> bool {
        self.events.iter().any(|(_, e)| e.seq == seq)
    }

    /// True when both matches bind the same input event.
    pub fn shares_event(&self, other: &PartialMatch) -> bool {
        self.events
            .iter()
            .any(|(_, e)| other.contains_seq(e.seq))
    }
}

/// Condition view over a partial match, optionally with one extra binding
/// (the candidate event of a negated primitive).
pub(crate) struct MatchBindings<'a> {
    pub(crate) names: &'a HashMap<String, usize>,
    pub(crate) partial: &'a PartialMatch,
    pub(crate) extra: Option<(&'a str, &'a Event)>,
}

impl Bindings for MatchBindings<'_> {
    fn payload(&self, name: &str) -> Option<&Payload> {
        if let Some((extra_name, event)) = self.extra {
            if extra_name == name {
                return Some(&event.payload);
            }
        }
        let leaf = *self.names.get(name)?;
        self.partial.event_for(leaf).map(|e| &e.payload)
    }
}

/// Canonical identity of a match: pattern index plus the sorted
/// `(binding name, event seq)` pairs. Identical across execution units.
pub type MatchIdentity = (usize, Vec<(String, u64)>);

/// A completed match emitted by a tree.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern_index: usize,
    /// Bindings in leaf order.
    pub bindings: Vec<(String, Arc<Event>)>,
}

impl PatternMatch {
    pub fn new(pattern_index: usize, bindings: Vec<(String, Arc<Event>)>) -> Self {
        Self {
            pattern_index,
            bindings,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.bindings.iter().map(|(_, e)| e)
    }

    pub fn event(&self, name: &str) -> Option<&Arc<Event>> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.events().map(|e| e.timestamp).min().unwrap_or_default()
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.events().map(|e| e.timestamp).max().unwrap_or_default()
    }

    pub fn contains_seq(&self, seq: u64) -> bool {
        self.events().any(|e| e.seq == seq)
    }

    pub fn identity(&self) -> MatchIdentity {
        let mut ids: Vec<(String, u64)> = self
            .bindings
            .iter()
            .map(|(name, e)| (name.clone(), e.seq))
            .collect();
        ids.sort();
        (self.pattern_index, ids)
    }
}

impl PartialEq for PatternMatch {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for PatternMatch {}

impl Bindings for PatternMatch {
    fn payload(&self, name: &str) -> Option<&Payload> {
        self.event(name).map(|e| &e.payload)
    }
}

impl fmt::Display for PatternMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.pattern_index)?;
        for (i, (name, event)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={event}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ts: Timestamp, seq: u64) -> Arc<Event> {
        Arc::new(Event::new("T", ts, Payload::new(), seq))
    }

    #[test]
    fn test_merge_orders_by_leaf_and_tracks_span() {
        let a = PartialMatch::single(2, ev(30, 3));
        let b = PartialMatch::single(0, ev(10, 1));
        let merged = a.merge(&b);
        let leaves: Vec<usize> = merged.events().iter().map(|(l, _)| *l).collect();
        assert_eq!(leaves, vec![0, 2]);
        assert_eq!(merged.first_timestamp(), 10);
        assert_eq!(merged.last_timestamp(), 30);
        assert_eq!(a.span_with(&b), 20);
        assert_eq!(merged.event_for(2).unwrap().seq, 3);
        assert!(merged.event_for(1).is_none());
    }

    #[test]
    fn test_shares_event() {
        let a = PartialMatch::single(0, ev(1, 7));
        let b = PartialMatch::single(1, ev(1, 7));
        let c = PartialMatch::single(1, ev(1, 8));
        assert!(a.shares_event(&b));
        assert!(!a.shares_event(&c));
    }

    #[test]
    fn test_identity_is_order_independent() {
        let m1 = PatternMatch::new(0, vec![("b".into(), ev(2, 2)), ("a".into(), ev(1, 1))]);
        let m2 = PatternMatch::new(0, vec![("a".into(), ev(1, 1)), ("b".into(), ev(2, 2))]);
        assert_eq!(m1.identity(), m2.identity());
        assert_eq!(m1, m2);
        assert_eq!(m1.first_timestamp(), 1);
        assert_eq!(m1.last_timestamp(), 2);
    }
}
