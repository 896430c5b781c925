//! Drives the trackers over every delivered request and renders the final
//! report, including a parse-health section built from the warnings.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use serde_json::json;

use crate::error::FormatError;
use crate::file_format::FileFormat;
use crate::parser::ParseStats;
use crate::report::{self, Align, ReportOptions, Table};
use crate::request::Request;
use crate::tracker::{Tracker, TrackerRegistry};
use crate::warning::{Warning, WarningKind, WarningSink};

/// Number of individual warnings kept for the report.
const SAMPLE_WARNINGS: usize = 5;

/// Owns the trackers of one run.
pub struct Summarizer {
    trackers: Vec<Box<dyn Tracker>>,
    requests: u64,
    warning_counts: BTreeMap<WarningKind, u64>,
    samples: Vec<Warning>,
    finalized: bool,
}

impl fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summarizer")
            .field(
                "trackers",
                &self.trackers.iter().map(|t| t.title()).collect::<Vec<_>>(),
            )
            .field("requests", &self.requests)
            .field("warning_counts", &self.warning_counts)
            .finish_non_exhaustive()
    }
}

impl Summarizer {
    /// Takes ownership of the trackers and prepares them.
    pub fn new(mut trackers: Vec<Box<dyn Tracker>>) -> Self {
        for tracker in &mut trackers {
            tracker.prepare();
        }
        Self {
            trackers,
            requests: 0,
            warning_counts: BTreeMap::new(),
            samples: Vec::new(),
            finalized: false,
        }
    }

    /// Builds the trackers listed in a format's report section.
    pub fn from_format(format: &FileFormat, registry: &TrackerRegistry) -> Result<Self, FormatError> {
        let trackers = format
            .report()
            .iter()
            .map(|config| registry.build(config))
            .collect::<Result<Vec<_>, FormatError>>()?;
        Ok(Self::new(trackers))
    }

    pub fn trackers(&self) -> &[Box<dyn Tracker>] {
        &self.trackers
    }

    /// Requests that reached the trackers.
    pub const fn requests(&self) -> u64 {
        self.requests
    }

    pub fn warning_count(&self, kind: WarningKind) -> u64 {
        self.warning_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_warnings(&self) -> u64 {
        self.warning_counts.values().sum()
    }

    /// Offers a request to every tracker whose gate accepts it.
    pub fn aggregate(&mut self, request: &Request) {
        self.requests += 1;
        for tracker in &mut self.trackers {
            if tracker.should_update(request) {
                tracker.update(request);
            }
        }
    }

    /// Finalizes every tracker. Later calls do nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        for tracker in &mut self.trackers {
            tracker.finalize();
        }
        self.finalized = true;
    }

    /// Renders the summary, every tracker, then parse health.
    pub fn report(
        &self,
        out: &mut dyn Write,
        stats: &ParseStats,
        options: &ReportOptions,
    ) -> fmt::Result {
        report::section(out, "Summary", options)?;
        let counters = &stats.counters;
        let rows = [
            ("Sources", stats.sources),
            ("Lines read", stats.lines_read),
            ("Lines parsed", counters.parsed_lines),
            ("Requests parsed", counters.parsed_requests),
            ("Requests analyzed", self.requests),
            ("Skipped lines", counters.skipped_lines),
            ("Skipped requests", counters.skipped_requests),
        ];
        for (label, value) in rows {
            writeln!(out, "{label:<20}{value:>10}")?;
        }
        writeln!(out)?;

        for tracker in &self.trackers {
            tracker.report(out, options)?;
        }

        self.report_health(out, options)
    }

    fn report_health(&self, out: &mut dyn Write, options: &ReportOptions) -> fmt::Result {
        report::section(out, "Parse warnings", options)?;
        if self.warning_counts.is_empty() {
            return writeln!(out, "No warnings.");
        }
        let mut table = Table::new([("Warning", Align::Left), ("Count", Align::Right)]);
        for (kind, count) in &self.warning_counts {
            table.row(vec![kind.to_string(), count.to_string()]);
        }
        table.render(out, options)?;
        writeln!(out)?;
        for warning in &self.samples {
            writeln!(out, "  {warning}")?;
        }
        let shown = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        if self.total_warnings() > shown {
            writeln!(out, "  ... and {} more", self.total_warnings() - shown)?;
        }
        Ok(())
    }

    /// The report as a string.
    pub fn render(&self, stats: &ParseStats, options: &ReportOptions) -> String {
        let mut output = String::new();
        // Writing to a String never fails.
        let _ = self.report(&mut output, stats, options);
        output
    }

    /// Structured export: `{summary, warnings, trackers}`.
    pub fn export(&self, stats: &ParseStats) -> serde_json::Value {
        let warnings: BTreeMap<&str, u64> = self
            .warning_counts
            .iter()
            .map(|(kind, count)| (kind.as_str(), *count))
            .collect();
        let trackers: Vec<serde_json::Value> = self
            .trackers
            .iter()
            .map(|t| {
                json!({
                    "title": t.title(),
                    "kind": t.kind(),
                    "data": t.export_snapshot(),
                })
            })
            .collect();
        json!({
            "summary": {
                "sources": stats.sources,
                "lines_read": stats.lines_read,
                "parsed_lines": stats.counters.parsed_lines,
                "parsed_requests": stats.counters.parsed_requests,
                "analyzed_requests": self.requests,
                "skipped_lines": stats.counters.skipped_lines,
                "skipped_requests": stats.counters.skipped_requests,
            },
            "warnings": warnings,
            "trackers": trackers,
        })
    }
}

impl WarningSink for Summarizer {
    fn warn(&mut self, warning: Warning) {
        tracing::trace!(%warning, "parse warning");
        *self.warning_counts.entry(warning.kind).or_insert(0) += 1;
        if self.samples.len() < SAMPLE_WARNINGS {
            self.samples.push(warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_format::fixtures::RAILS;
    use crate::parser::LogParser;
    use crate::reconstruct::{ParseStrategy, RequestHandler};

    struct Direct<'a>(&'a mut Summarizer);

    impl RequestHandler for Direct<'_> {
        fn handle_request(&mut self, request: Request) -> bool {
            self.0.aggregate(&request);
            true
        }
    }

    impl WarningSink for Direct<'_> {
        fn warn(&mut self, warning: Warning) {
            self.0.warn(warning);
        }
    }

    const LOG: &str = "\
Processing UsersController#show (for 10.0.0.1 at 2024-03-01 10:15:00) [GET]
  SQL (0.5ms)   SELECT * FROM users WHERE id = 1
  SQL (0.7ms)   SELECT * FROM posts WHERE user_id = 1
Completed in 100ms | 200 OK [http://shop.test/users/1]
Processing UsersController#show (for 10.0.0.1 at 2024-03-01 10:15:02) [GET]
Completed in 300ms | 200 OK [http://shop.test/users/2]
Completed in 1ms | 200 OK [/stray]
Processing OrdersController#index (for 10.0.0.2 at 2024-03-01 10:16:00) [GET]
Completed in 50ms | 200 OK [http://shop.test/orders]
";

    fn run() -> (Summarizer, ParseStats) {
        let registry = TrackerRegistry::default();
        let format = FileFormat::from_toml_str(RAILS, &registry).unwrap();
        let mut summarizer = Summarizer::from_format(&format, &registry).unwrap();
        let mut parser = LogParser::new(format, ParseStrategy::AssumeCorrect);
        parser
            .parse_reader(LOG.as_bytes(), "test.log", &mut Direct(&mut summarizer))
            .unwrap();
        summarizer.finalize();
        (summarizer, parser.stats())
    }

    #[test]
    fn aggregates_into_every_tracker() {
        let (summarizer, stats) = run();
        assert_eq!(summarizer.requests(), 3);
        assert_eq!(summarizer.trackers().len(), 3);
        assert_eq!(summarizer.warning_count(WarningKind::NoCurrentRequest), 1);
        assert_eq!(summarizer.total_warnings(), 1);
        assert_eq!(stats.counters.parsed_requests, 3);
        assert_eq!(stats.counters.skipped_lines, 1);
    }

    #[test]
    fn export_has_summary_warnings_and_trackers() {
        let (summarizer, stats) = run();
        let export = summarizer.export(&stats);
        assert_eq!(export["summary"]["analyzed_requests"], 3);
        assert_eq!(export["summary"]["lines_read"], 9);
        assert_eq!(export["warnings"]["no_current_request"], 1);

        let frequency = &export["trackers"][0];
        assert_eq!(frequency["kind"], "frequency");
        assert_eq!(frequency["data"]["categories"]["UsersController#show"], 2);
        assert_eq!(frequency["data"]["categories"]["OrdersController#index"], 1);

        let duration = &export["trackers"][1]["data"]["categories"]["UsersController#show"];
        assert_eq!(duration["hits"], 2);
        assert!((duration["mean"].as_f64().unwrap() - 0.2).abs() < 1e-12);

        let queries = &export["trackers"][2]["data"]["categories"];
        assert_eq!(queries["UsersController#show"]["sum"], 2.0);
        assert_eq!(queries["OrdersController#index"]["max"], 0.0);
    }

    #[test]
    fn report_renders_summary_trackers_and_health() {
        let (summarizer, stats) = run();
        let out = summarizer.render(&stats, &ReportOptions::default());
        let sections: Vec<&str> = out
            .lines()
            .filter(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_uppercase() || c == ' '))
            .collect();
        assert_eq!(
            sections,
            vec![
                "SUMMARY",
                "REQUESTS BY ACTION",
                "REQUEST DURATION",
                "QUERIES PER REQUEST",
                "PARSE WARNINGS"
            ]
        );
        assert!(out.contains("Requests analyzed            3"));
        assert!(out.contains("no_current_request"));
        assert!(out.contains("line 7: no_current_request"));
    }

    #[test]
    fn finalize_is_idempotent_and_empty_run_reports_no_warnings() {
        let mut summarizer = Summarizer::new(Vec::new());
        summarizer.finalize();
        summarizer.finalize();
        let out = summarizer.render(&ParseStats::default(), &ReportOptions::default());
        assert!(out.ends_with("No warnings.\n"));
    }
}
