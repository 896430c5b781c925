//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Request log analyzer.
#[derive(Debug, Parser)]
#[command(name = "reqlog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse log files and print a report.
    Analyze {
        /// File format definition (TOML). Falls back to `default_format` from the config.
        #[arg(short, long)]
        format: Option<PathBuf>,

        /// Parse strategy: `assume-correct` or `cautious`.
        #[arg(short, long)]
        strategy: Option<String>,

        /// Print the JSON export instead of the text report.
        #[arg(long)]
        json: bool,

        /// Also store every analyzed request in this `SQLite` database.
        #[arg(long)]
        database: Option<PathBuf>,

        /// Only analyze requests where FIELD matches REGEX.
        #[arg(long, value_name = "FIELD=REGEX")]
        select: Vec<String>,

        /// Skip requests where FIELD matches REGEX.
        #[arg(long, value_name = "FIELD=REGEX")]
        reject: Vec<String>,

        /// Only analyze requests at or after this time.
        #[arg(long)]
        after: Option<String>,

        /// Only analyze requests before this time.
        #[arg(long)]
        before: Option<String>,

        /// Report width in columns.
        #[arg(long)]
        width: Option<usize>,

        /// Disable colored output.
        #[arg(long)]
        no_color: bool,

        /// Log files to read (`.gz` is decompressed, `-` reads stdin).
        #[arg(required = true)]
        logs: Vec<PathBuf>,
    },

    /// Rewrite a log with sensitive captures replaced.
    Anonymize {
        /// File format definition (TOML). Falls back to `default_format` from the config.
        #[arg(short, long)]
        format: Option<PathBuf>,

        /// Drop lines that only match a teaser.
        #[arg(long)]
        discard_teaser_lines: bool,

        /// Log file to anonymize.
        log: PathBuf,
    },
}
