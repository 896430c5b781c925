use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use super::numeric::{BucketLayout, NumericStats};
use super::{Tracker, TrackerConfig, TrackerOptions};
use crate::error::FormatError;
use crate::report::{self, Align, ReportOptions, Table};
use crate::request::Request;

/// Width of the percentile interval shown in reports and exports.
pub const REPORT_INTERVAL: f64 = 95.0;

/// What a numeric tracker measures; decides defaults and display units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    /// Seconds, read from `duration` by default.
    Duration,
    /// Bytes, read from `traffic` by default.
    Traffic,
    /// Number of non-null occurrences of a field within the request.
    Count,
    Plain,
}

impl NumericKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duration => "duration",
            Self::Traffic => "traffic",
            Self::Count => "count",
            Self::Plain => "numeric_value",
        }
    }

    const fn default_field(self) -> Option<&'static str> {
        match self {
            Self::Duration => Some("duration"),
            Self::Traffic => Some("traffic"),
            Self::Count | Self::Plain => None,
        }
    }

    fn format(self, value: f64) -> String {
        match self {
            Self::Duration => report::format_duration(value),
            Self::Traffic => report::format_traffic(value),
            Self::Count | Self::Plain => report::format_number(value),
        }
    }
}

/// Ordering of categories in the text report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Sum,
    Mean,
    Hits,
    Stddev,
    Max,
}

impl SortKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Hits => "hits",
            Self::Stddev => "stddev",
            Self::Max => "max",
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn key(self, stats: &NumericStats) -> f64 {
        match self {
            Self::Sum => stats.sum(),
            Self::Mean => stats.mean(),
            Self::Hits => stats.hits() as f64,
            Self::Stddev => stats.stddev(),
            Self::Max => stats.max(),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "hits" => Ok(Self::Hits),
            "stddev" => Ok(Self::Stddev),
            "max" => Ok(Self::Max),
            other => Err(FormatError::UnknownSortKey(other.to_string())),
        }
    }
}

impl Serialize for SortKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SortKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Running statistics of a numeric field per category.
#[derive(Debug, Clone)]
pub struct NumericTracker {
    options: TrackerOptions,
    kind: NumericKind,
    field: String,
    sort: SortKey,
    layout: BucketLayout,
    categories: BTreeMap<String, NumericStats>,
}

impl NumericTracker {
    pub fn new(
        options: TrackerOptions,
        kind: NumericKind,
        field: impl Into<String>,
    ) -> Result<Self, FormatError> {
        options.require_category(kind.as_str())?;
        Ok(Self {
            options,
            kind,
            field: field.into(),
            sort: SortKey::default(),
            layout: BucketLayout::default(),
            categories: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: BucketLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn from_config(
        config: &TrackerConfig,
        kind: NumericKind,
    ) -> Result<Box<dyn Tracker>, FormatError> {
        let options = TrackerOptions::from_config(config);
        let field = config
            .value
            .as_deref()
            .or_else(|| kind.default_field())
            .ok_or_else(|| FormatError::MissingTrackerOption {
                tracker: options.title.clone(),
                option: "value",
            })?
            .to_string();
        let layout = BucketLayout::new(config.histogram.unwrap_or_default()).map_err(|source| {
            FormatError::InvalidHistogram {
                tracker: options.title.clone(),
                source,
            }
        })?;
        let tracker = Self::new(options, kind, field)?
            .with_sort(config.sort.unwrap_or_default())
            .with_layout(layout);
        Ok(Box::new(tracker))
    }

    pub fn stats(&self, category: &str) -> Option<&NumericStats> {
        self.categories.get(category)
    }

    pub const fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    /// Statistics over every category.
    pub fn overall(&self) -> NumericStats {
        let mut total = NumericStats::new(&self.layout);
        for stats in self.categories.values() {
            total.merge(stats);
        }
        total
    }

    #[allow(clippy::cast_precision_loss)]
    fn observe(&self, request: &Request) -> Option<f64> {
        match self.kind {
            NumericKind::Count => Some(request.every(&self.field).len() as f64),
            _ => request.first(&self.field).and_then(|v| v.as_f64()),
        }
    }

    fn sorted(&self) -> Vec<(&str, &NumericStats)> {
        let mut sorted: Vec<_> = self
            .categories
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        sorted.sort_by(|a, b| {
            self.sort
                .key(b.1)
                .total_cmp(&self.sort.key(a.1))
                .then_with(|| a.0.cmp(b.0))
        });
        sorted
    }
}

impl Tracker for NumericTracker {
    fn title(&self) -> &str {
        &self.options.title
    }

    fn kind(&self) -> &'static str {
        self.kind.as_str()
    }

    fn options(&self) -> &TrackerOptions {
        &self.options
    }

    fn update(&mut self, request: &Request) {
        let Some(category) = self.options.categorize(request) else {
            return;
        };
        let Some(value) = self.observe(request) else {
            return;
        };
        let layout = self.layout;
        self.categories
            .entry(category)
            .or_insert_with(|| NumericStats::new(&layout))
            .update(value, &layout);
    }

    fn report(&self, out: &mut dyn fmt::Write, options: &ReportOptions) -> fmt::Result {
        report::section(out, &self.options.title, options)?;
        if self.categories.is_empty() {
            writeln!(out, "(no requests)")?;
            return writeln!(out);
        }
        let mut table = Table::new([
            ("Category", Align::Left),
            ("Hits", Align::Right),
            ("Sum", Align::Right),
            ("Mean", Align::Right),
            ("StdDev", Align::Right),
            ("Min", Align::Right),
            ("Max", Align::Right),
            ("95%", Align::Right),
        ]);
        let sorted = self.sorted();
        let shown = self.options.amount.unwrap_or(usize::MAX);
        let display = |v: f64| self.kind.format(v);
        for (category, stats) in sorted.iter().take(shown) {
            let (low, high) = stats.percentile_interval(REPORT_INTERVAL, &self.layout);
            table.row(vec![
                (*category).to_string(),
                stats.hits().to_string(),
                display(stats.sum()),
                display(stats.mean()),
                display(stats.stddev()),
                display(stats.min()),
                display(stats.max()),
                format!("{}-{}", display(low), display(high)),
            ]);
        }
        table.render(out, options)?;
        if sorted.len() > shown {
            writeln!(out, "... and {} more", sorted.len() - shown)?;
        }
        writeln!(out)
    }

    fn export_snapshot(&self) -> serde_json::Value {
        let categories: serde_json::Map<String, serde_json::Value> = self
            .categories
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot(REPORT_INTERVAL, &self.layout)))
            .collect();
        json!({
            "field": self.field,
            "overall": self.overall().snapshot(REPORT_INTERVAL, &self.layout),
            "categories": categories,
        })
    }
}
