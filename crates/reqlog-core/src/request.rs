//! Logical requests stitched together from one or more parsed lines.

use std::sync::Arc;

use crate::value::{FieldMap, Value};

/// One matched log line with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub line_type: Arc<str>,
    pub lineno: u64,
    /// Identity of the input the line came from (usually a file path).
    pub source: Option<Arc<str>>,
    pub header: bool,
    pub footer: bool,
    pub fields: FieldMap,
}

impl ParsedLine {
    pub fn new(line_type: impl Into<Arc<str>>, lineno: u64, fields: FieldMap) -> Self {
        Self {
            line_type: line_type.into(),
            lineno,
            source: None,
            header: false,
            footer: false,
            fields,
        }
    }

    #[must_use]
    pub fn header(mut self) -> Self {
        self.header = true;
        self
    }

    #[must_use]
    pub fn footer(mut self) -> Self {
        self.footer = true;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<str>) -> Self {
        self.source = Some(source);
        self
    }
}

/// An ordered collection of parsed lines forming one logical request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    lines: Vec<ParsedLine>,
}

impl Request {
    pub fn new(first: ParsedLine) -> Self {
        Self { lines: vec![first] }
    }

    pub fn push(&mut self, line: ParsedLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[ParsedLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<ParsedLine> {
        self.lines
    }

    pub const fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub const fn len(&self) -> usize {
        self.lines.len()
    }

    pub const fn is_single_line(&self) -> bool {
        self.lines.len() == 1
    }

    /// A header line and a footer line (possibly the same one) were seen.
    pub fn is_completed(&self) -> bool {
        self.lines.iter().any(|l| l.header) && self.lines.iter().any(|l| l.footer)
    }

    pub fn has_line_type(&self, line_type: &str) -> bool {
        self.lines.iter().any(|l| &*l.line_type == line_type)
    }

    /// The first non-null value of `field`, in line order.
    pub fn first(&self, field: &str) -> Option<&Value> {
        self.lines
            .iter()
            .filter_map(|l| l.fields.get(field))
            .find(|v| !v.is_null())
    }

    /// Every non-null value of `field`, in line order.
    pub fn every(&self, field: &str) -> Vec<&Value> {
        self.lines
            .iter()
            .filter_map(|l| l.fields.get(field))
            .filter(|v| !v.is_null())
            .collect()
    }

    /// The sortable timestamp of the request, from its first `timestamp` field.
    pub fn timestamp(&self) -> Option<i64> {
        self.first("timestamp").and_then(Value::as_i64)
    }

    pub fn first_lineno(&self) -> Option<u64> {
        self.lines.first().map(|l| l.lineno)
    }

    pub fn last_lineno(&self) -> Option<u64> {
        self.lines.last().map(|l| l.lineno)
    }

    pub fn source(&self) -> Option<&str> {
        self.lines.first().and_then(|l| l.source.as_deref())
    }
}
