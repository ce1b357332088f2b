// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;

use crate::core::tree::{MatchIdentity, PatternMatch};

/// A match as reported by a unit.
#[derive(Debug, Clone)]
pub struct TaggedMatch {
    pub unit: usize,
    pub pattern_match: PatternMatch,
    /// The match lies entirely in a region two slots share, so another unit
    /// may report it as well.
    pub may_duplicate: bool,
}

/// Toggle deduplication.
///
/// The first sighting of a tagged identity is forwarded and remembered, the
/// second is dropped and forgotten. Untagged matches always pass. Only one
/// thread may feed it.
#[derive(Debug, Default)]
pub struct ToggleDeduplicator {
    pending: HashSet<MatchIdentity>,
    forwarded: u64,
    suppressed: u64,
}

impl ToggleDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, tagged: TaggedMatch) -> Option<PatternMatch> {
        if tagged.may_duplicate {
            let identity = tagged.pattern_match.identity();
            if self.pending.remove(&identity) {
                self.suppressed += 1;
                return None;
            }
            self.pending.insert(identity);
        }
        self.forwarded += 1;
        Some(tagged.pattern_match)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Tagged identities seen once so far.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn summary(&self) -> MergeSummary {
        MergeSummary {
            forwarded: self.forwarded,
            suppressed: self.suppressed,
            unpaired: self.pending.len(),
        }
    }
}

/// Counters of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub forwarded: u64,
    pub suppressed: u64,
    /// Tagged matches whose second sighting never came.
    pub unpaired: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{Event, Payload};
    use std::sync::Arc;

    fn tagged(seq: u64, unit: usize, may_duplicate: bool) -> TaggedMatch {
        let event = Arc::new(Event::new("A", 0, Payload::new(), seq));
        TaggedMatch {
            unit,
            pattern_match: PatternMatch::new(0, vec![("a".to_string(), event)]),
            may_duplicate,
        }
    }

    #[test]
    fn test_toggle_collapses_pairs() {
        let mut dedup = ToggleDeduplicator::new();
        assert!(dedup.offer(tagged(1, 0, true)).is_some());
        assert_eq!(dedup.pending(), 1);
        assert!(dedup.offer(tagged(1, 1, true)).is_none());
        assert_eq!(dedup.pending(), 0);
        // A third sighting starts a new pair
        assert!(dedup.offer(tagged(1, 0, true)).is_some());
        assert_eq!((dedup.forwarded(), dedup.suppressed()), (2, 1));
    }

    #[test]
    fn test_untagged_matches_always_pass() {
        let mut dedup = ToggleDeduplicator::new();
        assert!(dedup.offer(tagged(7, 0, false)).is_some());
        assert!(dedup.offer(tagged(7, 1, false)).is_some());
        assert_eq!(dedup.pending(), 0);
    }
}
