//! Shared utilities for CLI commands.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use reqlog_core::{FileFormat, TrackerRegistry};

use crate::Config;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").unwrap());

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Calendar layouts accepted besides RFC 3339.
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a time bound into a sortable `YYYYMMDDHHMMSS` timestamp.
///
/// Supports:
/// - RFC 3339: "2026-01-15T10:30:00Z" (the written wall-clock time is kept)
/// - Calendar: "2026-01-15 10:30:00", "2026-01-15 10:30", "2026-01-15"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_time_bound(s: &str) -> anyhow::Result<i64> {
    let s = s.trim();
    let datetime = parse_datetime(s)?;
    datetime
        .format("%Y%m%d%H%M%S")
        .to_string()
        .parse()
        .with_context(|| format!("timestamp out of range: {s}"))
}

fn parse_datetime(s: &str) -> anyhow::Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        anyhow::bail!(
            "Invalid time: {s}. Use a date (e.g., 2026-01-15 10:30:00), RFC 3339 or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match &caps[2] {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    // Log timestamps are wall-clock times, so compare against local time.
    let duration = Duration::minutes(n * minutes_per_unit);
    Ok(Local::now().naive_local() - duration)
}

/// Loads the format named by `--format` or by `default_format`.
pub fn load_format(
    config: &Config,
    flag: Option<&Path>,
    registry: &TrackerRegistry,
) -> anyhow::Result<FileFormat> {
    let Some(path) = config.format_path(flag) else {
        anyhow::bail!("no file format given: pass --format or set default_format in the config");
    };
    let format = FileFormat::load(path, registry)
        .with_context(|| format!("failed to load file format {}", path.display()))?;
    tracing::debug!(format = format.name(), path = %path.display(), "loaded file format");
    Ok(format)
}
