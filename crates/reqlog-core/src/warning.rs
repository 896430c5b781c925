//! Recoverable parse warnings and the sinks that collect them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Kinds of recoverable problems found while parsing.
///
/// None of these interrupt the stream; they are counted and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A teaser matched but the full line pattern did not.
    TeaserCheckFailed,
    /// A non-header line arrived while no request was open.
    NoCurrentRequest,
    /// A header arrived while a request was still open (cautious strategy).
    UnclosedRequest,
    /// The input ended while a request was still open.
    UnfinishedRequestOnEof,
}

impl WarningKind {
    pub const ALL: [Self; 4] = [
        Self::TeaserCheckFailed,
        Self::NoCurrentRequest,
        Self::UnclosedRequest,
        Self::UnfinishedRequestOnEof,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TeaserCheckFailed => "teaser_check_failed",
            Self::NoCurrentRequest => "no_current_request",
            Self::UnclosedRequest => "unclosed_request",
            Self::UnfinishedRequestOnEof => "unfinished_request_on_eof",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarningKind {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FormatError::UnknownWarningKind(s.to_string()))
    }
}

/// One warning event, tagged with the line that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub lineno: u64,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>, lineno: u64) -> Self {
        Self {
            kind,
            message: message.into(),
            lineno,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.lineno, self.kind, self.message)
    }
}

/// Receiver of warnings, in the order they occur.
pub trait WarningSink {
    fn warn(&mut self, warning: Warning);
}

impl WarningSink for Vec<Warning> {
    fn warn(&mut self, warning: Warning) {
        self.push(warning);
    }
}

/// Discards every warning.
impl WarningSink for () {
    fn warn(&mut self, _warning: Warning) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_str() {
        for kind in WarningKind::ALL {
            assert_eq!(kind.as_str().parse::<WarningKind>().unwrap(), kind);
        }
        assert!("nope".parse::<WarningKind>().is_err());
    }

    #[test]
    fn vec_sink_keeps_order() {
        let mut sink: Vec<Warning> = Vec::new();
        sink.warn(Warning::new(WarningKind::NoCurrentRequest, "x", 3));
        sink.warn(Warning::new(WarningKind::UnclosedRequest, "y", 4));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].lineno, 3);
        assert_eq!(sink[1].to_string(), "line 4: unclosed_request: y");
    }
}
