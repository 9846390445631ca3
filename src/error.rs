//! Error taxonomy.
//!
//! Recoverable conditions (`MissingTag`, `UnsupportedAggregation`) are never
//! returned as `Err`; they are logged as warnings and the affected cells stay
//! null. The remaining variants abort the current run.

use std::path::PathBuf;

/// Errors and diagnostics raised while loading and aggregating metrics.
#[derive(Debug, thiserror::Error)]
pub enum StatError {
    #[error("'{tag}' not found in {file}")]
    MissingTag { tag: String, file: String },

    #[error("Unsupported aggregation function '{func}' for column '{column}'")]
    UnsupportedAggregation { column: String, func: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed event record in {} at byte {offset}: {reason}", path.display())]
    Decode {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Invalid metric '{spec}': {reason}")]
    InvalidMetric { spec: String, reason: String },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}

pub type StatResult<T> = std::result::Result<T, StatError>;
