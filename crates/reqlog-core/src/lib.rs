//! Core logic for the request log analyzer.
//!
//! This crate contains the fundamental types and logic for:
//! - Line matching: teaser prefilters, full patterns and typed captures
//! - Request reconstruction: stitching header/body/footer lines into requests
//! - Trackers: streaming aggregation with constant memory per category
//! - Reporting: plain-text tables and JSON export

pub mod anonymize;
pub mod convert;
mod error;
pub mod file_format;
pub mod filter;
pub mod line_definition;
pub mod parser;
pub mod pipeline;
pub mod reconstruct;
pub mod report;
pub mod request;
pub mod summarizer;
pub mod tracker;
pub mod value;
pub mod warning;

pub use anonymize::AnonymizeRule;
pub use convert::CaptureType;
pub use error::{FilterError, FormatError, HistogramError, ParseError};
pub use file_format::{FileFormat, FileFormatSpec};
pub use filter::{FieldFilter, Filter, FilterMode, TimespanFilter};
pub use line_definition::{CaptureSpec, LineDefinition, LineMatch, LineSpec};
pub use parser::{LogParser, ParseStats};
pub use pipeline::{Pipeline, RecordSink, SinkError};
pub use reconstruct::{ParseCounters, ParseStrategy, Reconstructor, RequestHandler, RequestMode};
pub use report::ReportOptions;
pub use request::{ParsedLine, Request};
pub use summarizer::Summarizer;
pub use tracker::{Tracker, TrackerConfig, TrackerRegistry};
pub use value::{FieldMap, Value};
pub use warning::{Warning, WarningKind, WarningSink};
