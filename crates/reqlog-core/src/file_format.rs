//! File formats: the catalog of line definitions for one kind of log, plus
//! the trackers its report is built from.
//!
//! Formats are written in TOML and loaded through `figment`:
//!
//! ```toml
//! name = "rails"
//! mode = "combined"
//!
//! [[lines]]
//! name = "processing"
//! header = true
//! teaser = 'Processing '
//! pattern = 'Processing (\w+)#(\w+)'
//! captures = [{ name = "controller" }, { name = "action" }]
//!
//! [[report]]
//! kind = "frequency"
//! category = "{controller}#{action}"
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use figment::Figment;
use figment::providers::{Format, Toml};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::line_definition::{LineDefinition, LineMatch, LineSpec};
use crate::reconstruct::RequestMode;
use crate::tracker::{TrackerConfig, TrackerRegistry};
use crate::value::FieldMap;
use crate::warning::{Warning, WarningKind, WarningSink};

/// A format file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFormatSpec {
    pub name: String,
    #[serde(default)]
    pub mode: RequestMode,
    pub lines: Vec<LineSpec>,
    #[serde(default)]
    pub report: Vec<TrackerConfig>,
}

/// A validated, compiled file format.
#[derive(Debug, Clone)]
pub struct FileFormat {
    name: String,
    mode: RequestMode,
    definitions: Vec<LineDefinition>,
    report: Vec<TrackerConfig>,
}

impl FileFormat {
    /// Compiles every line definition and checks tracker references.
    pub fn new(spec: FileFormatSpec, registry: &TrackerRegistry) -> Result<Self, FormatError> {
        let mut seen = BTreeSet::new();
        let mut definitions = Vec::with_capacity(spec.lines.len());
        for line in spec.lines {
            if !seen.insert(line.name.clone()) {
                return Err(FormatError::DuplicateLineType(line.name));
            }
            definitions.push(LineDefinition::new(line)?);
        }
        for tracker in &spec.report {
            if !registry.contains(&tracker.kind) {
                return Err(FormatError::UnknownTrackerKind(tracker.kind.clone()));
            }
            if let Some(line_type) = &tracker.line_type {
                if !seen.contains(line_type) {
                    return Err(FormatError::UnknownLineType(line_type.clone()));
                }
            }
        }
        tracing::debug!(
            format = %spec.name,
            lines = definitions.len(),
            trackers = spec.report.len(),
            "compiled file format"
        );
        Ok(Self {
            name: spec.name,
            mode: spec.mode,
            definitions,
            report: spec.report,
        })
    }

    pub fn from_toml_str(toml: &str, registry: &TrackerRegistry) -> Result<Self, FormatError> {
        let spec: FileFormatSpec = Figment::from(Toml::string(toml)).extract()?;
        Self::new(spec, registry)
    }

    pub fn load(path: &Path, registry: &TrackerRegistry) -> Result<Self, FormatError> {
        let toml = std::fs::read_to_string(path).map_err(|source| FormatError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&toml, registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn report(&self) -> &[TrackerConfig] {
        &self.report
    }

    pub fn line_definitions(&self) -> &[LineDefinition] {
        &self.definitions
    }

    pub fn line_definition(&self, name: &str) -> Result<&LineDefinition, FormatError> {
        self.definitions
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| FormatError::UnknownLineType(name.to_string()))
    }

    /// Matches a line against each definition in declaration order.
    ///
    /// A teaser hit without a full match is warned and the search continues.
    pub fn parse_line(
        &self,
        line: &str,
        lineno: u64,
        warnings: &mut dyn WarningSink,
    ) -> Option<(&LineDefinition, FieldMap)> {
        for definition in &self.definitions {
            match definition.match_line(line) {
                LineMatch::Matched(fields) => return Some((definition, fields)),
                LineMatch::TeaserOnly => warnings.warn(Warning::new(
                    WarningKind::TeaserCheckFailed,
                    format!(
                        "line matched the teaser of {:?} but not its full pattern",
                        definition.name()
                    ),
                    lineno,
                )),
                LineMatch::NoMatch => {}
            }
        }
        None
    }

    /// Anonymizes one line. `None` drops the line from the output.
    ///
    /// Unrecognized lines pass through unchanged; lines that only match a
    /// teaser are dropped when `discard_teaser_lines` is set.
    pub fn anonymize_line<R: Rng + ?Sized>(
        &self,
        line: &str,
        discard_teaser_lines: bool,
        rng: &mut R,
    ) -> Option<String> {
        let mut teaser_only = false;
        for definition in &self.definitions {
            if !definition.teaser_matches(line) {
                continue;
            }
            if let Some(anonymized) = definition.anonymize(line, rng) {
                return Some(anonymized);
            }
            teaser_only = true;
        }
        if teaser_only && discard_teaser_lines {
            None
        } else {
            Some(line.to_string())
        }
    }
}
