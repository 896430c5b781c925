//! Analyze command: parse logs, aggregate and report.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqlog_core::{
    FieldFilter, FilterMode, LogParser, ParseStats, ParseStrategy, Pipeline, ReportOptions,
    Summarizer, TimespanFilter, TrackerRegistry,
};
use reqlog_db::{RecordWriter, RequestDatabase};

use super::util::{load_format, parse_time_bound};
use crate::Config;

/// Path that reads standard input instead of a file.
const STDIN_PATH: &str = "-";

/// Flags of `reqlog analyze`.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub format: Option<PathBuf>,
    pub strategy: Option<String>,
    pub json: bool,
    pub database: Option<PathBuf>,
    pub select: Vec<String>,
    pub reject: Vec<String>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub width: Option<usize>,
    pub no_color: bool,
    pub logs: Vec<PathBuf>,
}

/// Runs the analysis and prints the result to stdout.
pub fn run(config: &Config, options: &AnalyzeOptions) -> Result<()> {
    let output = analyze(config, options)?;
    print!("{output}");
    Ok(())
}

/// Runs the analysis and returns the rendered report or JSON export.
pub fn analyze(config: &Config, options: &AnalyzeOptions) -> Result<String> {
    let registry = TrackerRegistry::default();
    let format = load_format(config, options.format.as_deref(), &registry)?;

    let strategy: ParseStrategy = options
        .strategy
        .as_deref()
        .unwrap_or(&config.parse_strategy)
        .parse()
        .context("invalid parse strategy")?;

    let summarizer =
        Summarizer::from_format(&format, &registry).context("failed to build trackers")?;
    let mut pipeline = build_pipeline(summarizer, options)?;

    let mut parser = LogParser::new(format, strategy);
    for path in &options.logs {
        if path.as_os_str() == STDIN_PATH {
            parser
                .parse_reader(io::stdin().lock(), "<stdin>", &mut pipeline)
                .context("failed to read standard input")?;
        } else {
            parser
                .parse_file(path, &mut pipeline)
                .with_context(|| format!("failed to parse {}", path.display()))?;
        }
    }

    let stats = parser.stats();
    let filtered = pipeline.filtered();
    let summarizer = pipeline
        .finish()
        .map_err(|err| anyhow::anyhow!(err))
        .context("failed to write requests to the database")?;
    tracing::debug!(
        sources = stats.sources,
        requests = stats.counters.parsed_requests,
        filtered,
        warnings = summarizer.total_warnings(),
        "analysis finished"
    );

    render(&summarizer, &stats, config, options)
}

fn build_pipeline(summarizer: Summarizer, options: &AnalyzeOptions) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new(summarizer);

    for spec in &options.select {
        let filter = FieldFilter::parse(spec, FilterMode::Select).context("invalid --select")?;
        pipeline = pipeline.with_filter(filter);
    }
    for spec in &options.reject {
        let filter = FieldFilter::parse(spec, FilterMode::Reject).context("invalid --reject")?;
        pipeline = pipeline.with_filter(filter);
    }

    let after = options
        .after
        .as_deref()
        .map(parse_time_bound)
        .transpose()
        .context("invalid --after")?;
    let before = options
        .before
        .as_deref()
        .map(parse_time_bound)
        .transpose()
        .context("invalid --before")?;
    let timespan = TimespanFilter::new(after, before);
    if !timespan.is_unbounded() {
        pipeline = pipeline.with_filter(timespan);
    }

    if let Some(path) = &options.database {
        pipeline = pipeline.with_sink(RecordWriter::new(open_database(path)?));
    }
    Ok(pipeline)
}

/// Opens the database, ensuring the parent directory exists.
fn open_database(path: &Path) -> Result<RequestDatabase> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    RequestDatabase::open(path)
        .with_context(|| format!("failed to open database {}", path.display()))
}

fn render(
    summarizer: &Summarizer,
    stats: &ParseStats,
    config: &Config,
    options: &AnalyzeOptions,
) -> Result<String> {
    if options.json {
        let mut output = serde_json::to_string_pretty(&summarizer.export(stats))
            .context("failed to serialize report")?;
        output.push('\n');
        return Ok(output);
    }
    let report_options = ReportOptions {
        width: options.width.unwrap_or(config.report_width),
        color: config.color && !options.no_color && io::stdout().is_terminal(),
    };
    Ok(summarizer.render(stats, &report_options))
}
