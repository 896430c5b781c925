//! Trackers: pluggable aggregators fed one completed request at a time.
//!
//! Every tracker goes through the same lifecycle: `prepare` once, then
//! `should_update`/`update` per request, `finalize` once, and finally
//! `report` and `export_snapshot`. Gating (required line type, `if` and
//! `unless` conditions) is shared through [`TrackerOptions`].

mod frequency;
mod hourly_spread;
pub mod numeric;
mod numeric_value;
mod timespan;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::report::ReportOptions;
use crate::request::Request;

pub use frequency::FrequencyTracker;
pub use hourly_spread::HourlySpreadTracker;
pub use numeric::{BucketLayout, Edge, HistogramConfig, NumericStats};
pub use numeric_value::{NumericKind, NumericTracker, SortKey};
pub use timespan::TimespanTracker;

/// An aggregator over completed requests.
pub trait Tracker {
    fn title(&self) -> &str;

    /// Registry kind this tracker was built as, used as a JSON discriminator.
    fn kind(&self) -> &'static str;

    fn options(&self) -> &TrackerOptions;

    fn prepare(&mut self) {}

    fn should_update(&self, request: &Request) -> bool {
        self.options().accepts(request)
    }

    fn update(&mut self, request: &Request);

    fn finalize(&mut self) {}

    fn report(&self, out: &mut dyn fmt::Write, options: &ReportOptions) -> fmt::Result;

    fn export_snapshot(&self) -> serde_json::Value;
}

type Predicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
type Classifier = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// A gating condition for `if`/`unless`.
#[derive(Clone)]
pub enum Condition {
    /// Holds when the request's first value for the field is truthy.
    Field(String),
    Predicate(Predicate),
}

impl Condition {
    pub fn predicate(f: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    pub fn holds(&self, request: &Request) -> bool {
        match self {
            Self::Field(field) => request.first(field).is_some_and(|v| v.is_truthy()),
            Self::Predicate(f) => f(request),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(field) => f.debug_tuple("Field").field(field).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// How a request is mapped to a category key.
#[derive(Clone)]
pub enum Category {
    /// The first non-null value of a field.
    Field(String),
    /// Field values interpolated into text, e.g. `{controller}#{action}`.
    Template(Vec<Segment>),
    Function(Classifier),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Field(String),
}

impl Category {
    /// Parses a category from format-file text. Text containing `{field}`
    /// placeholders becomes a template; anything else names a field.
    pub fn parse(text: &str) -> Self {
        if !text.contains('{') {
            return Self::Field(text.to_string());
        }
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            segments.push(Segment::Field(rest[open + 1..close].trim().to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Self::Template(segments)
    }

    pub fn function(f: impl Fn(&Request) -> Option<String> + Send + Sync + 'static) -> Self {
        Self::Function(Arc::new(f))
    }

    /// The category of a request. `None` when the category is absent; a
    /// template is absent only when none of its fields are present.
    pub fn resolve(&self, request: &Request) -> Option<String> {
        match self {
            Self::Field(field) => request.first(field).and_then(|v| v.category_key()),
            Self::Template(segments) => {
                let mut any_present = false;
                let mut key = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => key.push_str(text),
                        Segment::Field(field) => {
                            if let Some(value) =
                                request.first(field).and_then(|v| v.category_key())
                            {
                                any_present = true;
                                key.push_str(&value);
                            }
                        }
                    }
                }
                any_present.then_some(key)
            }
            Self::Function(f) => f(request),
        }
    }
}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(field) => f.debug_tuple("Field").field(field).finish(),
            Self::Template(segments) => f.debug_tuple("Template").field(segments).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Key used for requests whose category is absent, when `count_nil` is set.
pub const NIL_CATEGORY: &str = "(none)";

/// Options shared by all tracker kinds.
#[derive(Debug, Clone, Default)]
pub struct TrackerOptions {
    pub title: String,
    pub line_type: Option<String>,
    pub if_condition: Option<Condition>,
    pub unless_condition: Option<Condition>,
    pub category: Option<Category>,
    pub count_nil: bool,
    /// Maximum number of categories shown in the text report.
    pub amount: Option<usize>,
}

impl TrackerOptions {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_line_type(mut self, line_type: impl Into<String>) -> Self {
        self.line_type = Some(line_type.into());
        self
    }

    #[must_use]
    pub fn with_if(mut self, condition: Condition) -> Self {
        self.if_condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_unless(mut self, condition: Condition) -> Self {
        self.unless_condition = Some(condition);
        self
    }

    #[must_use]
    pub fn counting_nil(mut self) -> Self {
        self.count_nil = true;
        self
    }

    /// Builds options from a format-file entry, titling it after its kind
    /// when no title is given.
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            title: config.title.clone().unwrap_or_else(|| default_title(config)),
            line_type: config.line_type.clone(),
            if_condition: config.if_field.clone().map(Condition::Field),
            unless_condition: config.unless.clone().map(Condition::Field),
            category: config.category.as_deref().map(Category::parse),
            count_nil: config.count_nil,
            amount: config.amount,
        }
    }

    /// The gate applied before `update`.
    pub fn accepts(&self, request: &Request) -> bool {
        if let Some(line_type) = &self.line_type {
            if !request.has_line_type(line_type) {
                return false;
            }
        }
        if let Some(condition) = &self.if_condition {
            if !condition.holds(request) {
                return false;
            }
        }
        if let Some(condition) = &self.unless_condition {
            if condition.holds(request) {
                return false;
            }
        }
        true
    }

    /// The category key for a request, applying `count_nil`.
    pub fn categorize(&self, request: &Request) -> Option<String> {
        let category = self.category.as_ref()?;
        match category.resolve(request) {
            Some(key) => Some(key),
            None if self.count_nil => Some(NIL_CATEGORY.to_string()),
            None => None,
        }
    }

    fn require_category(&self, kind: &str) -> Result<(), FormatError> {
        if self.category.is_none() {
            return Err(FormatError::MissingTrackerOption {
                tracker: format!("{} ({kind})", self.title),
                option: "category",
            });
        }
        Ok(())
    }
}

fn default_title(config: &TrackerConfig) -> String {
    match (&config.category, &config.value) {
        (Some(category), Some(value)) => format!("{value} by {category}"),
        (Some(category), None) => format!("{} by {category}", config.kind),
        _ => config.kind.replace('_', " "),
    }
}

/// One `[[report]]` entry of a format file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Field holding the measured value for numeric kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Field holding the timestamp for time-based kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_type: Option<String>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<String>,
    #[serde(default)]
    pub count_nil: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histogram: Option<HistogramConfig>,
}

impl TrackerConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }
}

/// Builds a tracker from its format-file entry.
pub type TrackerConstructor = fn(&TrackerConfig) -> Result<Box<dyn Tracker>, FormatError>;

/// Maps tracker kinds to constructors.
#[derive(Debug, Clone)]
pub struct TrackerRegistry {
    constructors: BTreeMap<String, TrackerConstructor>,
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("frequency", FrequencyTracker::from_config);
        registry.register("duration", |c| {
            NumericTracker::from_config(c, NumericKind::Duration)
        });
        registry.register("traffic", |c| NumericTracker::from_config(c, NumericKind::Traffic));
        registry.register("count", |c| NumericTracker::from_config(c, NumericKind::Count));
        registry.register("numeric_value", |c| {
            NumericTracker::from_config(c, NumericKind::Plain)
        });
        registry.register("hourly_spread", HourlySpreadTracker::from_config);
        registry.register("timespan", TimespanTracker::from_config);
        registry
    }
}

impl TrackerRegistry {
    /// A registry without the built-in kinds.
    pub const fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, constructor: TrackerConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(&self, config: &TrackerConfig) -> Result<Box<dyn Tracker>, FormatError> {
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| FormatError::UnknownTrackerKind(config.kind.clone()))?;
        constructor(config)
    }
}
