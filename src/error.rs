//! Error types for steplog
//!
//! Every variant names the file, key or series it concerns so a failed report
//! tells the user where to look.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// steplog error types
#[derive(Error, Debug)]
pub enum Error {
    /// A log line is not a structured JSON object
    #[error("Malformed log record at {path}:{line}: {reason}")]
    MalformedLog {
        /// File the line came from (`<reader>` for in-memory input)
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Parser diagnostic
        reason: String,
    },

    /// An operation needed at least one record or value and found none
    #[error("Empty series: {0}")]
    EmptySeries(String),

    /// A required metric key is absent from every record
    #[error("Metric key '{key}' not found in {source_name}")]
    KeyNotFound {
        /// Missing metric key
        key: String,
        /// Log file or run the lookup was made against
        source_name: String,
    },

    /// An intersection join found no common steps
    #[error("No overlapping steps between '{left}' and '{right}'")]
    NoOverlap {
        /// Left series key
        left: String,
        /// Right series key
        right: String,
    },

    /// Run paths and run names disagree in count (checked before any I/O)
    #[error("Got {paths} run paths but {names} names; they must match")]
    RunCountMismatch {
        /// Number of paths supplied
        paths: usize,
        /// Number of names supplied
        names: usize,
    },

    /// Paths that must come in loss/results pairs had an odd count
    #[error("Paths must come in loss/results pairs, got {0} paths")]
    UnpairedPaths(usize),

    /// Invalid argument or value shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A file could not be opened or read
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error outside of log-line parsing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Read`] for `path`.
    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Build a [`Error::KeyNotFound`] for `key` looked up in `source_name`.
    #[must_use]
    pub fn key_not_found(key: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self::KeyNotFound {
            key: key.into(),
            source_name: source_name.into(),
        }
    }

    /// True for the "a metric is simply not there" family of failures.
    ///
    /// Reports use this to downgrade optional sub-outputs to warnings.
    #[must_use]
    pub const fn is_missing_data(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. } | Self::EmptySeries(_) | Self::NoOverlap { .. }
        )
    }
}
