//! Error types for Glucose Flux

use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors that can occur during analysis
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Readings out of order at index {index}: {current} does not follow {previous}")]
    DataOrderingError {
        index: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("Insufficient data: {0}")]
    DataError(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),
}

impl AnalysisError {
    /// Whether the error only affects a single item and the batch may continue
    pub fn is_local(&self) -> bool {
        matches!(self, AnalysisError::DataError(_))
    }
}
