use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use reqlog_cli::commands::analyze::{self, AnalyzeOptions};
use reqlog_cli::commands::anonymize;
use reqlog_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so stdout stays a clean report or JSON document
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    match command {
        Commands::Analyze {
            format,
            strategy,
            json,
            database,
            select,
            reject,
            after,
            before,
            width,
            no_color,
            logs,
        } => {
            let options = AnalyzeOptions {
                format: format.clone(),
                strategy: strategy.clone(),
                json: *json,
                database: database.clone(),
                select: select.clone(),
                reject: reject.clone(),
                after: after.clone(),
                before: before.clone(),
                width: *width,
                no_color: *no_color,
                logs: logs.clone(),
            };
            analyze::run(&config, &options)?;
        }
        Commands::Anonymize {
            format,
            discard_teaser_lines,
            log,
        } => {
            anonymize::run(&config, format.as_deref(), *discard_teaser_lines, log)?;
        }
    }

    Ok(())
}
