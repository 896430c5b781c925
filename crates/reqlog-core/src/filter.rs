//! Request filters applied before aggregation.

use regex::Regex;

use crate::error::FilterError;
use crate::request::Request;

/// Passes a request through, possibly altered, or drops it.
pub trait Filter {
    fn filter(&self, request: Request) -> Option<Request>;
}

/// Whether matching requests are kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Select,
    Reject,
}

/// Keeps or drops requests by matching a regex against a field.
///
/// A request matches when any of its values for the field matches.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    field: String,
    pattern: Regex,
    mode: FilterMode,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, pattern: Regex, mode: FilterMode) -> Self {
        Self {
            field: field.into(),
            pattern,
            mode,
        }
    }

    /// Parses `FIELD=REGEX`.
    pub fn parse(spec: &str, mode: FilterMode) -> Result<Self, FilterError> {
        let (field, pattern) = spec
            .split_once('=')
            .ok_or_else(|| FilterError::MissingSeparator(spec.to_string()))?;
        if field.is_empty() {
            return Err(FilterError::MissingField(spec.to_string()));
        }
        let pattern = Regex::new(pattern).map_err(|source| FilterError::InvalidRegex {
            spec: spec.to_string(),
            source,
        })?;
        Ok(Self::new(field, pattern, mode))
    }

    fn matches(&self, request: &Request) -> bool {
        request
            .every(&self.field)
            .iter()
            .any(|value| self.pattern.is_match(&value.to_string()))
    }
}

impl Filter for FieldFilter {
    fn filter(&self, request: Request) -> Option<Request> {
        let keep = match self.mode {
            FilterMode::Select => self.matches(&request),
            FilterMode::Reject => !self.matches(&request),
        };
        keep.then_some(request)
    }
}

/// Keeps requests whose timestamp lies in `[after, before)`.
///
/// Bounds are sortable timestamps. Requests without a timestamp are dropped
/// once any bound is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimespanFilter {
    pub after: Option<i64>,
    pub before: Option<i64>,
}

impl TimespanFilter {
    pub const fn new(after: Option<i64>, before: Option<i64>) -> Self {
        Self { after, before }
    }

    pub const fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }
}

impl Filter for TimespanFilter {
    fn filter(&self, request: Request) -> Option<Request> {
        if self.is_unbounded() {
            return Some(request);
        }
        let timestamp = request.timestamp()?;
        let after_ok = self.after.is_none_or(|after| timestamp >= after);
        let before_ok = self.before.is_none_or(|before| timestamp < before);
        (after_ok && before_ok).then_some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::fixtures::request;
    use crate::value::Value;

    #[test]
    fn field_filter_selects_and_rejects() {
        let get = request(&[("method", "GET".into())]);
        let post = request(&[("method", "POST".into())]);

        let select = FieldFilter::parse("method=^GET$", FilterMode::Select).unwrap();
        assert!(select.filter(get.clone()).is_some());
        assert!(select.filter(post.clone()).is_none());

        let reject = FieldFilter::parse("method=^GET$", FilterMode::Reject).unwrap();
        assert!(reject.filter(get).is_none());
        assert!(reject.filter(post).is_some());
    }

    #[test]
    fn field_filter_matches_non_string_values() {
        let filter = FieldFilter::parse("status=^5", FilterMode::Select).unwrap();
        assert!(filter.filter(request(&[("status", Value::Integer(503))])).is_some());
        assert!(filter.filter(request(&[("status", Value::Integer(200))])).is_none());
        assert!(filter.filter(request(&[])).is_none());
    }

    #[test]
    fn field_filter_parse_errors() {
        assert!(matches!(
            FieldFilter::parse("method", FilterMode::Select),
            Err(FilterError::MissingSeparator(spec)) if spec == "method"
        ));
        assert!(matches!(
            FieldFilter::parse("=GET", FilterMode::Select),
            Err(FilterError::MissingField(_))
        ));
        let err = FieldFilter::parse("method=(", FilterMode::Select).unwrap_err();
        assert!(matches!(err, FilterError::InvalidRegex { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn timespan_filter_is_half_open() {
        let filter = TimespanFilter::new(Some(20_240_101_000_000), Some(20_240_102_000_000));
        let at = |ts: i64| request(&[("timestamp", Value::Integer(ts))]);
        assert!(filter.filter(at(20_240_101_000_000)).is_some());
        assert!(filter.filter(at(20_240_101_235_959)).is_some());
        assert!(filter.filter(at(20_240_102_000_000)).is_none());
        assert!(filter.filter(at(20_231_231_235_959)).is_none());
        assert!(filter.filter(request(&[])).is_none());
        assert!(TimespanFilter::default().filter(request(&[])).is_some());
    }
}
