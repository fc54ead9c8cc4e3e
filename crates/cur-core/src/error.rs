use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the CUR report engine.
///
/// Every variant except [`CostError::MalformedRecord`] is fatal for a run.
/// `MalformedRecord` is produced per row and swallowed by the aggregator
/// after it has been counted.
#[derive(Error, Debug)]
pub enum CostError {
    /// A report file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input could not be tokenised as CSV rows at all.
    #[error("Malformed report stream: {0}")]
    MalformedStream(String),

    /// A required numeric field of a single row failed to parse.
    #[error("Malformed record on line {line}: {field} = {value:?}")]
    MalformedRecord {
        line: u64,
        field: &'static str,
        value: Option<String>,
    },

    /// The requested top-K size is zero.
    #[error("Invalid top-k value: {0} (must be at least 1)")]
    InvalidTopK(usize),

    /// A date-range filter whose start is not strictly before its end.
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// A timestamp string did not match any recognised format.
    #[error("Invalid timestamp format: {0}")]
    TimestampParse(String),

    /// A report could not be serialised to JSON.
    #[error("Failed to serialise JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CostError {
    /// `true` for errors that only invalidate a single row.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CostError::MalformedRecord { .. })
    }
}

/// Convenience alias used throughout the cur crates.
pub type Result<T> = std::result::Result<T, CostError>;
