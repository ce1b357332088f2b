// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod event;
pub mod formatter;
pub mod value;

pub use self::event::{Event, EventTypeId, Payload, Timestamp};
pub use self::formatter::{CsvDataFormatter, DataFormatter, JsonDataFormatter, TimestampFormat};
pub use self::value::AttributeValue;
