//! Fatal errors raised by the core.
//!
//! Recoverable conditions are [`Warning`](crate::Warning)s, not errors.

use std::path::PathBuf;

use thiserror::Error;

/// Problems with a file format definition, detected before streaming starts.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid {which} pattern for line definition {line}: {source}")]
    InvalidPattern {
        line: String,
        which: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error(
        "line definition {line} declares {declared} captures but its pattern has {groups} groups"
    )]
    CaptureCountMismatch {
        line: String,
        declared: usize,
        groups: usize,
    },
    #[error("invalid unit {unit:?} for capture {capture}")]
    InvalidUnit { capture: String, unit: String },
    #[error("duplicate line definition: {0}")]
    DuplicateLineType(String),
    #[error("unknown line type: {0}")]
    UnknownLineType(String),
    #[error("unknown tracker kind: {0}")]
    UnknownTrackerKind(String),
    #[error("invalid parse strategy: {0} (expected \"cautious\" or \"assume-correct\")")]
    InvalidParseStrategy(String),
    #[error("tracker {tracker} is missing required option `{option}`")]
    MissingTrackerOption {
        tracker: String,
        option: &'static str,
    },
    #[error("invalid histogram for tracker {tracker}: {source}")]
    InvalidHistogram {
        tracker: String,
        #[source]
        source: HistogramError,
    },
    #[error("unknown sort key: {0} (expected sum, mean, hits, stddev or max)")]
    UnknownSortKey(String),
    #[error("unknown warning kind: {0}")]
    UnknownWarningKind(String),
    #[error("failed to read file format {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid file format: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for FormatError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

/// Histogram settings that cannot form a bucket layout.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum HistogramError {
    #[error("at least one bucket is required")]
    NoBuckets,
    #[error("bucket range must satisfy 0 < min < max, got [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },
}

/// A malformed `FIELD=REGEX` filter argument.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("expected FIELD=REGEX, got {0:?}")]
    MissingSeparator(String),
    #[error("missing field name in {0:?}")]
    MissingField(String),
    #[error("invalid regex in {spec:?}: {source}")]
    InvalidRegex {
        spec: String,
        #[source]
        source: regex::Error,
    },
}

/// Failures while reading an input source.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
}
