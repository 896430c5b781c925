use std::fmt;

use serde_json::json;

use super::{Tracker, TrackerConfig, TrackerOptions};
use crate::convert::timestamp_to_datetime;
use crate::error::FormatError;
use crate::report::{self, ReportOptions};
use crate::request::Request;

const BAR_WIDTH: usize = 40;

/// Requests per hour of the day.
#[derive(Debug, Clone)]
pub struct HourlySpreadTracker {
    options: TrackerOptions,
    field: String,
    hours: [u64; 24],
    first: Option<i64>,
    last: Option<i64>,
}

impl HourlySpreadTracker {
    pub fn new(options: TrackerOptions, field: impl Into<String>) -> Self {
        Self {
            options,
            field: field.into(),
            hours: [0; 24],
            first: None,
            last: None,
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn from_config(config: &TrackerConfig) -> Result<Box<dyn Tracker>, FormatError> {
        let field = config.field.clone().unwrap_or_else(|| "timestamp".to_string());
        Ok(Box::new(Self::new(TrackerOptions::from_config(config), field)))
    }

    pub const fn hours(&self) -> &[u64; 24] {
        &self.hours
    }

    /// Calendar days covered by the observed timestamps, at least one.
    pub fn days(&self) -> u64 {
        let (Some(first), Some(last)) = (
            self.first.and_then(timestamp_to_datetime),
            self.last.and_then(timestamp_to_datetime),
        ) else {
            return 1;
        };
        let span = (last.date() - first.date()).num_days() + 1;
        u64::try_from(span).unwrap_or(1).max(1)
    }
}

impl Tracker for HourlySpreadTracker {
    fn title(&self) -> &str {
        &self.options.title
    }

    fn kind(&self) -> &'static str {
        "hourly_spread"
    }

    fn options(&self) -> &TrackerOptions {
        &self.options
    }

    fn update(&mut self, request: &Request) {
        let Some(timestamp) = request.first(&self.field).and_then(|v| v.as_i64()) else {
            return;
        };
        let Ok(hour) = usize::try_from((timestamp / 10_000) % 100) else {
            return;
        };
        if hour >= 24 {
            return;
        }
        self.hours[hour] += 1;
        self.first = Some(self.first.map_or(timestamp, |t| t.min(timestamp)));
        self.last = Some(self.last.map_or(timestamp, |t| t.max(timestamp)));
    }

    #[allow(clippy::cast_precision_loss)]
    fn report(&self, out: &mut dyn fmt::Write, options: &ReportOptions) -> fmt::Result {
        report::section(out, &self.options.title, options)?;
        let max = self.hours.iter().copied().max().unwrap_or(0);
        if max == 0 {
            writeln!(out, "(no requests)")?;
            return writeln!(out);
        }
        let days = self.days() as f64;
        let width = BAR_WIDTH.min(options.width.saturating_sub(28));
        for (hour, count) in self.hours.iter().enumerate() {
            writeln!(
                out,
                "{hour:02}:00 - {hour:02}:59  {:>8.1}/day  {}",
                *count as f64 / days,
                report::bar(*count, max, width)
            )?;
        }
        writeln!(out)
    }

    fn export_snapshot(&self) -> serde_json::Value {
        json!({
            "days": self.days(),
            "hours": self.hours,
        })
    }
}
