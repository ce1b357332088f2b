// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data Formatters
//!
//! A [`DataFormatter`] turns one raw record of the input stream into the
//! structured payload the engine works on, and tells the engine which event
//! type and timestamp the record carries.
//!
//! Two formatters are provided:
//! - [`JsonDataFormatter`]: one JSON object per record, all top-level fields mapped
//! - [`CsvDataFormatter`]: positional fields with a fixed column list, e.g. stock
//!   ticks `AAPL,200802010900,195.45,...`

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value as JsonValue;

use super::event::{EventTypeId, Payload, Timestamp};
use super::value::AttributeValue;
use crate::core::error::{CepError, CepResult};

/// Parses raw records into structured payloads.
pub trait DataFormatter: Send + Sync {
    fn parse_event(&self, raw: &str) -> CepResult<Payload>;

    fn get_event_type(&self, structured: &Payload) -> CepResult<EventTypeId>;

    fn get_event_timestamp(&self, structured: &Payload) -> CepResult<Timestamp>;

    fn get_payload(&self, structured: Payload) -> Payload {
        structured
    }
}

/// How a timestamp attribute is encoded in the raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Integer milliseconds
    EpochMillis,
    /// chrono format string, interpreted as UTC, e.g. `%Y%m%d%H%M`
    Pattern(String),
    /// RFC 3339 / ISO 8601 string
    Rfc3339,
}

impl TimestampFormat {
    fn to_millis(&self, value: &AttributeValue) -> CepResult<Timestamp> {
        match self {
            TimestampFormat::EpochMillis => match value {
                AttributeValue::Long(v) => Ok(*v),
                AttributeValue::Double(v) => Ok(*v as i64),
                other => Err(CepError::format(format!(
                    "expected epoch milliseconds, found '{other}'"
                ))),
            },
            TimestampFormat::Pattern(pattern) => {
                // Numeric-looking dates such as 200802010900 are parsed as Long by the
                // lenient value parser, so go through the textual form.
                let text = value.to_string();
                let parsed = NaiveDateTime::parse_from_str(&text, pattern).map_err(|e| {
                    CepError::format_with_source(
                        format!("timestamp '{text}' does not match '{pattern}'"),
                        Box::new(e),
                    )
                })?;
                Ok(parsed.and_utc().timestamp_millis())
            }
            TimestampFormat::Rfc3339 => {
                let text = value.as_str().ok_or_else(|| {
                    CepError::format(format!("expected RFC 3339 string, found '{value}'"))
                })?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                    CepError::format_with_source(
                        format!("invalid RFC 3339 timestamp '{text}'"),
                        Box::new(e),
                    )
                })?;
                Ok(parsed.timestamp_millis())
            }
        }
    }
}

fn required<'a>(structured: &'a Payload, field: &str) -> CepResult<&'a AttributeValue> {
    structured
        .get(field)
        .ok_or_else(|| CepError::format(format!("record has no '{field}' field")))
}

/// Formatter for JSON object records.
#[derive(Debug, Clone)]
pub struct JsonDataFormatter {
    type_field: String,
    timestamp_field: String,
    timestamp_format: TimestampFormat,
}

impl JsonDataFormatter {
    pub fn new(type_field: impl Into<String>, timestamp_field: impl Into<String>) -> Self {
        Self {
            type_field: type_field.into(),
            timestamp_field: timestamp_field.into(),
            timestamp_format: TimestampFormat::EpochMillis,
        }
    }

    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    fn convert(value: JsonValue) -> AttributeValue {
        match value {
            JsonValue::Null => AttributeValue::Null,
            JsonValue::Bool(b) => AttributeValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => AttributeValue::Long(v),
                None => AttributeValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => AttributeValue::String(s),
            // Nested structures are kept in their serialized form
            other => AttributeValue::String(other.to_string()),
        }
    }
}

impl Default for JsonDataFormatter {
    fn default() -> Self {
        Self::new("type", "timestamp")
    }
}

impl DataFormatter for JsonDataFormatter {
    fn parse_event(&self, raw: &str) -> CepResult<Payload> {
        let value: JsonValue = serde_json::from_str(raw)
            .map_err(|e| CepError::format_with_source("invalid JSON record", Box::new(e)))?;
        match value {
            JsonValue::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| (key, Self::convert(value)))
                .collect()),
            other => Err(CepError::format(format!(
                "expected a JSON object, found '{other}'"
            ))),
        }
    }

    fn get_event_type(&self, structured: &Payload) -> CepResult<EventTypeId> {
        Ok(required(structured, &self.type_field)?.to_string())
    }

    fn get_event_timestamp(&self, structured: &Payload) -> CepResult<Timestamp> {
        self.timestamp_format
            .to_millis(required(structured, &self.timestamp_field)?)
    }
}

/// Formatter for delimiter-separated records with a fixed column list.
#[derive(Debug, Clone)]
pub struct CsvDataFormatter {
    columns: Vec<String>,
    delimiter: char,
    type_column: String,
    timestamp_column: String,
    timestamp_format: TimestampFormat,
}

impl CsvDataFormatter {
    pub fn new(
        columns: Vec<String>,
        type_column: impl Into<String>,
        timestamp_column: impl Into<String>,
    ) -> Self {
        Self {
            columns,
            delimiter: ',',
            type_column: type_column.into(),
            timestamp_column: timestamp_column.into(),
            timestamp_format: TimestampFormat::EpochMillis,
        }
    }

    /// Metastock 7-column stock ticks:
    /// `Stock Ticker, Date (yyyyMMddHHmm), Open, Peak, Lowest, Close, Volume`.
    pub fn metastock() -> Self {
        let columns = [
            "StockTicker",
            "Date",
            "OpeningPrice",
            "PeakPrice",
            "LowestPrice",
            "ClosePrice",
            "Volume",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        Self::new(columns, "StockTicker", "Date")
            .with_timestamp_format(TimestampFormat::Pattern("%Y%m%d%H%M".to_string()))
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }
}

impl DataFormatter for CsvDataFormatter {
    fn parse_event(&self, raw: &str) -> CepResult<Payload> {
        let fields: Vec<&str> = raw.trim_end().split(self.delimiter).collect();
        if fields.len() != self.columns.len() {
            return Err(CepError::format(format!(
                "expected {} fields, found {} in '{}'",
                self.columns.len(),
                fields.len(),
                raw.trim_end()
            )));
        }
        Ok(self
            .columns
            .iter()
            .zip(fields)
            .map(|(column, field)| (column.clone(), AttributeValue::parse_lenient(field)))
            .collect())
    }

    fn get_event_type(&self, structured: &Payload) -> CepResult<EventTypeId> {
        Ok(required(structured, &self.type_column)?.to_string())
    }

    fn get_event_timestamp(&self, structured: &Payload) -> CepResult<Timestamp> {
        self.timestamp_format
            .to_millis(required(structured, &self.timestamp_column)?)
    }
}
