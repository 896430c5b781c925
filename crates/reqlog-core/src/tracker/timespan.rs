use std::fmt;

use serde_json::json;

use super::{Tracker, TrackerConfig, TrackerOptions};
use crate::convert::timestamp_to_datetime;
use crate::error::FormatError;
use crate::report::{self, ReportOptions};
use crate::request::Request;

/// First and last timestamp seen.
#[derive(Debug, Clone)]
pub struct TimespanTracker {
    options: TrackerOptions,
    field: String,
    first: Option<i64>,
    last: Option<i64>,
}

impl TimespanTracker {
    pub fn new(options: TrackerOptions, field: impl Into<String>) -> Self {
        Self {
            options,
            field: field.into(),
            first: None,
            last: None,
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn from_config(config: &TrackerConfig) -> Result<Box<dyn Tracker>, FormatError> {
        let field = config.field.clone().unwrap_or_else(|| "timestamp".to_string());
        Ok(Box::new(Self::new(TrackerOptions::from_config(config), field)))
    }

    pub const fn first(&self) -> Option<i64> {
        self.first
    }

    pub const fn last(&self) -> Option<i64> {
        self.last
    }
}

fn display_timestamp(timestamp: i64) -> String {
    timestamp_to_datetime(timestamp)
        .map_or_else(|| timestamp.to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

impl Tracker for TimespanTracker {
    fn title(&self) -> &str {
        &self.options.title
    }

    fn kind(&self) -> &'static str {
        "timespan"
    }

    fn options(&self) -> &TrackerOptions {
        &self.options
    }

    fn update(&mut self, request: &Request) {
        if let Some(timestamp) = request.first(&self.field).and_then(|v| v.as_i64()) {
            self.first = Some(self.first.map_or(timestamp, |t| t.min(timestamp)));
            self.last = Some(self.last.map_or(timestamp, |t| t.max(timestamp)));
        }
    }

    fn report(&self, out: &mut dyn fmt::Write, options: &ReportOptions) -> fmt::Result {
        report::section(out, &self.options.title, options)?;
        let (Some(first), Some(last)) = (self.first, self.last) else {
            writeln!(out, "(no timestamps)")?;
            return writeln!(out);
        };
        writeln!(out, "First request:  {}", display_timestamp(first))?;
        writeln!(out, "Last request:   {}", display_timestamp(last))?;
        if let (Some(a), Some(b)) = (timestamp_to_datetime(first), timestamp_to_datetime(last)) {
            #[allow(clippy::cast_precision_loss)]
            let seconds = (b - a).num_seconds() as f64;
            writeln!(out, "Total time:     {}", report::format_duration(seconds))?;
        }
        writeln!(out)
    }

    fn export_snapshot(&self) -> serde_json::Value {
        json!({
            "first": self.first,
            "last": self.last,
        })
    }
}
