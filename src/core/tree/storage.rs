// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::partial_match::PartialMatch;
use crate::core::event::Timestamp;

/// Partial match storage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageParams {
    /// Keep stored matches ordered instead of in arrival order.
    pub sort_storage: bool,
    /// When sorting, order by earliest timestamp (expired matches are popped
    /// from the front); otherwise order by latest timestamp.
    pub prioritize_sorting_by_timestamp: bool,
}

impl Default for StorageParams {
    fn default() -> Self {
        Self {
            sort_storage: false,
            prioritize_sorting_by_timestamp: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ordering {
    Arrival,
    FirstTimestamp,
    LastTimestamp,
}

/// Per-node container of partial matches.
#[derive(Debug, Clone)]
pub struct PartialMatchStorage {
    matches: VecDeque<PartialMatch>,
    ordering: Ordering,
}

impl PartialMatchStorage {
    pub fn new(params: &StorageParams) -> Self {
        let ordering = match (params.sort_storage, params.prioritize_sorting_by_timestamp) {
            (false, _) => Ordering::Arrival,
            (true, true) => Ordering::FirstTimestamp,
            (true, false) => Ordering::LastTimestamp,
        };
        Self {
            matches: VecDeque::new(),
            ordering,
        }
    }

    pub fn add(&mut self, pm: PartialMatch) {
        let key: fn(&PartialMatch) -> Timestamp = match self.ordering {
            Ordering::Arrival => {
                self.matches.push_back(pm);
                return;
            }
            Ordering::FirstTimestamp => PartialMatch::first_timestamp,
            Ordering::LastTimestamp => PartialMatch::last_timestamp,
        };
        let new_key = key(&pm);
        let at = self.matches.partition_point(|m| key(m) <= new_key);
        self.matches.insert(at, pm);
    }

    /// Drop every match whose earliest event is more than `window` before
    /// `now`. Returns the number removed.
    pub fn prune(&mut self, now: Timestamp, window: Timestamp) -> usize {
        let before = self.matches.len();
        if self.ordering == Ordering::FirstTimestamp {
            while self
                .matches
                .front()
                .is_some_and(|m| now - m.first_timestamp() > window)
            {
                self.matches.pop_front();
            }
        } else {
            self.matches.retain(|m| now - m.first_timestamp() <= window);
        }
        before - self.matches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartialMatch> {
        self.matches.iter()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn clear(&mut self) {
        self.matches.clear();
    }
}
