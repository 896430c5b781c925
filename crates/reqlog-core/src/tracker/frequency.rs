use std::collections::BTreeMap;
use std::fmt;

use serde_json::json;

use super::{Tracker, TrackerConfig, TrackerOptions};
use crate::error::FormatError;
use crate::report::{self, Align, ReportOptions, Table};
use crate::request::Request;

const BAR_WIDTH: usize = 20;

/// Counts requests per category.
#[derive(Debug, Clone)]
pub struct FrequencyTracker {
    options: TrackerOptions,
    counts: BTreeMap<String, u64>,
}

impl FrequencyTracker {
    pub fn new(options: TrackerOptions) -> Result<Self, FormatError> {
        options.require_category("frequency")?;
        Ok(Self {
            options,
            counts: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Box<dyn Tracker>, FormatError> {
        Ok(Box::new(Self::new(TrackerOptions::from_config(config))?))
    }

    pub fn frequency(&self, category: &str) -> u64 {
        self.counts.get(category).copied().unwrap_or(0)
    }

    pub fn overall_frequency(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Categories by descending count, ties broken by name.
    pub fn sorted_categories(&self) -> Vec<(&str, u64)> {
        let mut sorted: Vec<_> = self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        sorted
    }
}

impl Tracker for FrequencyTracker {
    fn title(&self) -> &str {
        &self.options.title
    }

    fn kind(&self) -> &'static str {
        "frequency"
    }

    fn options(&self) -> &TrackerOptions {
        &self.options
    }

    fn update(&mut self, request: &Request) {
        if let Some(category) = self.options.categorize(request) {
            *self.counts.entry(category).or_insert(0) += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn report(&self, out: &mut dyn fmt::Write, options: &ReportOptions) -> fmt::Result {
        report::section(out, &self.options.title, options)?;
        let total = self.overall_frequency();
        if total == 0 {
            writeln!(out, "(no requests)")?;
            return writeln!(out);
        }
        let sorted = self.sorted_categories();
        let max = sorted.first().map_or(0, |(_, count)| *count);
        let mut table = Table::new([
            ("Category", Align::Left),
            ("Hits", Align::Right),
            ("Share", Align::Right),
            ("", Align::Left),
        ]);
        let shown = self.options.amount.unwrap_or(usize::MAX);
        for (category, count) in sorted.iter().take(shown) {
            table.row(vec![
                (*category).to_string(),
                count.to_string(),
                format!("{:.1}%", *count as f64 * 100.0 / total as f64),
                report::bar(*count, max, BAR_WIDTH),
            ]);
        }
        table.render(out, options)?;
        if sorted.len() > shown {
            writeln!(out, "... and {} more", sorted.len() - shown)?;
        }
        writeln!(out)
    }

    fn export_snapshot(&self) -> serde_json::Value {
        json!({
            "total": self.overall_frequency(),
            "categories": self.counts,
        })
    }
}
