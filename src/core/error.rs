// SPDX-License-Identifier: MIT OR Apache-2.0

//! PatternFlux Core Error Types
//!
//! Error handling shared by the matching tree, the evaluation mechanisms and the
//! data-parallel execution layer.

use thiserror::Error;

/// Result type for PatternFlux operations
pub type CepResult<T> = Result<T, CepError>;

/// PatternFlux error types
#[derive(Error, Debug)]
pub enum CepError {
    /// Fatal setup problem: bad unit count, non-numeric partition key, missing window...
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        config_key: Option<String>,
    },

    /// An operation was invoked before the state it depends on was initialized
    #[error("Precondition violated: {message}")]
    PreconditionViolation { message: String },

    /// No statistics have been collected yet; callers fall back to neutral defaults
    #[error("Statistics unavailable: {message}")]
    StatisticsUnavailable { message: String },

    #[error("Input stream '{stream}' has no data")]
    EmptyStream { stream: String },

    #[error("Stream '{stream}' is closed")]
    StreamClosed { stream: String },

    #[error("Unsupported pattern structure: {message}")]
    UnsupportedPattern { message: String },

    #[error("Attribute '{attribute}' not found for '{name}'")]
    AttributeNotFound { name: String, attribute: String },

    #[error("Event format error: {message}")]
    Format {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The dispatcher could not route an event to any unit
    #[error("Partition error: {message}")]
    Partition { message: String },

    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// Custom error creation helpers
impl CepError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            config_key: None,
        }
    }

    /// Create a configuration error with a specific key
    pub fn configuration_with_key(
        message: impl Into<String>,
        config_key: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            config_key: Some(config_key.into()),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            message: message.into(),
        }
    }

    pub fn statistics_unavailable(message: impl Into<String>) -> Self {
        Self::StatisticsUnavailable {
            message: message.into(),
        }
    }

    pub fn empty_stream(stream: impl Into<String>) -> Self {
        Self::EmptyStream {
            stream: stream.into(),
        }
    }

    pub fn stream_closed(stream: impl Into<String>) -> Self {
        Self::StreamClosed {
            stream: stream.into(),
        }
    }

    pub fn unsupported_pattern(message: impl Into<String>) -> Self {
        Self::UnsupportedPattern {
            message: message.into(),
        }
    }

    pub fn attribute_not_found(name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::AttributeNotFound {
            name: name.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
            source: None,
        }
    }

    /// Create a format error wrapping the parser error
    pub fn format_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Format {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn partition(message: impl Into<String>) -> Self {
        Self::Partition {
            message: message.into(),
        }
    }

    /// Create a runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }

    /// True for errors that are detected before any worker starts
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            CepError::Configuration { .. }
                | CepError::EmptyStream { .. }
                | CepError::UnsupportedPattern { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let error = CepError::configuration("units must be positive");
        assert!(matches!(error, CepError::Configuration { .. }));
        assert!(error.is_setup_error());
    }

    #[test]
    fn test_configuration_error_with_key() {
        let error = CepError::configuration_with_key("not numeric", "parallel.key");
        match error {
            CepError::Configuration { config_key, .. } => {
                assert_eq!(config_key.as_deref(), Some("parallel.key"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_statistics_unavailable_error() {
        let error = CepError::statistics_unavailable("no events recorded");
        assert!(matches!(error, CepError::StatisticsUnavailable { .. }));
        assert!(!error.is_setup_error());
    }

    #[test]
    fn test_attribute_not_found_message() {
        let error = CepError::attribute_not_found("a", "PeakPrice");
        assert_eq!(
            error.to_string(),
            "Attribute 'PeakPrice' not found for 'a'"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: CepError = io.into();
        assert!(matches!(error, CepError::IoError(_)));
    }
}
