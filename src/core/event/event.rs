// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::formatter::DataFormatter;
use super::value::AttributeValue;
use crate::core::error::CepResult;

/// Event time in milliseconds.
pub type Timestamp = i64;

pub type EventTypeId = String;

/// Attribute name to value mapping of a single event.
pub type Payload = HashMap<String, AttributeValue>;

/// A primitive event. Immutable once constructed and shared between tree
/// nodes, partial matches and units as `Arc<Event>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventTypeId,
    pub timestamp: Timestamp,
    pub payload: Payload,
    /// Arrival index in the logical input stream. Identifies the event across
    /// units and breaks timestamp ties.
    pub seq: u64,
}

impl Event {
    pub fn new(
        event_type: impl Into<EventTypeId>,
        timestamp: Timestamp,
        payload: Payload,
        seq: u64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            payload,
            seq,
        }
    }

    /// Parse a raw record through the formatter.
    pub fn from_raw(raw: &str, formatter: &dyn DataFormatter, seq: u64) -> CepResult<Arc<Event>> {
        let structured = formatter.parse_event(raw)?;
        let event_type = formatter.get_event_type(&structured)?;
        let timestamp = formatter.get_event_timestamp(&structured)?;
        let payload = formatter.get_payload(structured);
        Ok(Arc::new(Event::new(event_type, timestamp, payload, seq)))
    }

    #[inline]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.payload.get(name)
    }

    /// `(timestamp, seq)` order used for sequence precedence.
    #[inline]
    pub fn precedes(&self, other: &Event) -> bool {
        (self.timestamp, self.seq) < (other.timestamp, other.seq)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.payload.keys().collect();
        keys.sort();
        write!(f, "{}@{}#{}{{", self.event_type, self.timestamp, self.seq)?;
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, self.payload[*key])?;
        }
        write!(f, "}}")
    }
}
