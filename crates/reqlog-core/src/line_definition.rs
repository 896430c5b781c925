//! Line definitions: teaser prefilter, full pattern and typed captures.

use std::collections::BTreeMap;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::anonymize::AnonymizeRule;
use crate::convert::{CaptureType, Conversion};
use crate::error::FormatError;
use crate::value::{FieldMap, Value};

/// Declarative description of one capture group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub capture_type: CaptureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// chrono format for `timestamp` captures with month names etc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Value used when the group did not participate in the match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub anonymize: AnonymizeRule,
    /// Keys lifted out of a `nested` capture into top-level fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provides: BTreeMap<String, CaptureType>,
}

impl CaptureSpec {
    pub fn new(name: impl Into<String>, capture_type: CaptureType) -> Self {
        Self {
            name: name.into(),
            capture_type,
            unit: None,
            format: None,
            default: None,
            anonymize: AnonymizeRule::Keep,
            provides: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_anonymize(mut self, rule: AnonymizeRule) -> Self {
        self.anonymize = rule;
        self
    }
}

/// Declarative description of one line type, as written in a format file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teaser: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub captures: Vec<CaptureSpec>,
    #[serde(default)]
    pub header: bool,
    #[serde(default)]
    pub footer: bool,
}

#[derive(Debug, Clone)]
struct Capture {
    name: String,
    conversion: Conversion,
    default: Option<Value>,
    anonymize: AnonymizeRule,
    provides: Vec<(String, Conversion)>,
}

/// Result of testing one line against one definition.
#[derive(Debug, Clone, PartialEq)]
pub enum LineMatch {
    /// The teaser rejected the line.
    NoMatch,
    /// The teaser matched but the full pattern did not.
    TeaserOnly,
    Matched(FieldMap),
}

/// A compiled line definition. Immutable once built.
#[derive(Debug, Clone)]
pub struct LineDefinition {
    name: String,
    teaser: Option<Regex>,
    pattern: Regex,
    captures: Vec<Capture>,
    header: bool,
    footer: bool,
}

impl LineDefinition {
    /// Compiles a line spec, checking that every capture group is declared.
    pub fn new(spec: LineSpec) -> Result<Self, FormatError> {
        let compile = |which: &'static str, pattern: &str| {
            Regex::new(pattern).map_err(|source| FormatError::InvalidPattern {
                line: spec.name.clone(),
                which,
                source,
            })
        };
        let teaser = spec
            .teaser
            .as_deref()
            .map(|t| compile("teaser", t))
            .transpose()?;
        let pattern = compile("full", &spec.pattern)?;

        let groups = pattern.captures_len() - 1;
        if groups != spec.captures.len() {
            return Err(FormatError::CaptureCountMismatch {
                line: spec.name,
                declared: spec.captures.len(),
                groups,
            });
        }

        let captures = spec
            .captures
            .into_iter()
            .map(|c| -> Result<Capture, FormatError> {
                let conversion = Conversion::resolve(
                    &c.name,
                    &c.capture_type,
                    c.unit.as_deref(),
                    c.format.as_deref(),
                )?;
                let provides = c
                    .provides
                    .iter()
                    .map(|(key, t)| -> Result<_, FormatError> {
                        Ok((key.clone(), Conversion::resolve(key, t, None, None)?))
                    })
                    .collect::<Result<Vec<_>, FormatError>>()?;
                Ok(Capture {
                    name: c.name,
                    conversion,
                    default: c.default,
                    anonymize: c.anonymize,
                    provides,
                })
            })
            .collect::<Result<Vec<_>, FormatError>>()?;

        Ok(Self {
            name: spec.name,
            teaser,
            pattern,
            captures,
            header: spec.header,
            footer: spec.footer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn is_header(&self) -> bool {
        self.header
    }

    pub const fn is_footer(&self) -> bool {
        self.footer
    }

    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().map(|c| c.name.as_str())
    }

    /// Whether the cheap prefilter accepts the line. Absent teasers accept all.
    pub fn teaser_matches(&self, line: &str) -> bool {
        self.teaser.as_ref().is_none_or(|t| t.is_match(line))
    }

    /// Whether the full pattern matches, ignoring the teaser.
    pub fn pattern_matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    /// Tests the teaser, then the full pattern, and converts the captures.
    pub fn match_line(&self, line: &str) -> LineMatch {
        if !self.teaser_matches(line) {
            return LineMatch::NoMatch;
        }
        let Some(caps) = self.pattern.captures(line) else {
            return if self.teaser.is_some() {
                LineMatch::TeaserOnly
            } else {
                LineMatch::NoMatch
            };
        };

        let mut fields = FieldMap::new();
        for (i, capture) in self.captures.iter().enumerate() {
            let value = match caps.get(i + 1) {
                Some(m) => capture.conversion.apply(m.as_str()),
                None => capture.default.clone().unwrap_or(Value::Null),
            };
            if let Value::Map(nested) = &value {
                for (key, conversion) in &capture.provides {
                    let provided = match nested.get(key) {
                        Some(Value::String(s)) => conversion.apply(s),
                        Some(Value::Null) | None => Value::Null,
                        Some(other) => conversion.apply(&other.to_string()),
                    };
                    fields.insert(key.clone(), provided);
                }
            }
            fields.insert(capture.name.clone(), value);
        }
        LineMatch::Matched(fields)
    }

    /// Rewrites the captured spans of a matching line per their anonymize rules.
    ///
    /// Text outside the captures is kept byte-for-byte. Returns `None` when
    /// the full pattern does not match.
    pub fn anonymize<R: Rng + ?Sized>(&self, line: &str, rng: &mut R) -> Option<String> {
        let caps = self.pattern.captures(line)?;
        let mut out = String::with_capacity(line.len());
        let mut cursor = 0;
        for (i, capture) in self.captures.iter().enumerate() {
            if capture.anonymize == AnonymizeRule::Keep {
                continue;
            }
            let Some(m) = caps.get(i + 1) else {
                continue;
            };
            // Nested groups inside an already rewritten span are skipped.
            if m.start() < cursor {
                continue;
            }
            out.push_str(&line[cursor..m.start()]);
            out.push_str(&capture.anonymize.apply(m.as_str(), rng));
            cursor = m.end();
        }
        out.push_str(&line[cursor..]);
        Some(out)
    }
}
