//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use reqlog_core::report::DEFAULT_WIDTH;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `assume-correct` or `cautious`.
    pub parse_strategy: String,
    /// Report width in columns.
    pub report_width: usize,
    /// Color section titles when writing to a terminal.
    pub color: bool,
    /// Drop teaser-only lines when anonymizing.
    pub discard_teaser_lines: bool,
    /// Format definition used when `--format` is not given.
    pub default_format: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parse_strategy: "assume-correct".to_string(),
            report_width: DEFAULT_WIDTH,
            color: true,
            discard_teaser_lines: false,
            default_format: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // REQLOG_PARSE_STRATEGY, REQLOG_REPORT_WIDTH, ...
        figment = figment.merge(Env::prefixed("REQLOG_"));

        figment.extract()
    }

    /// Picks the format file: the explicit flag wins over `default_format`.
    pub fn format_path<'a>(&'a self, flag: Option<&'a Path>) -> Option<&'a Path> {
        flag.or(self.default_format.as_deref())
    }
}

/// Returns the platform-specific config directory for reqlog.
///
/// On Linux: `~/.config/reqlog`
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("reqlog"))
}
