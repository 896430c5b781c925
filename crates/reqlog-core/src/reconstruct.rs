//! Request reconstruction: stitching matched lines into logical requests.
//!
//! # State Machine
//!
//! The reconstructor is either IDLE (no open request) or OPEN (one request
//! accumulating lines). In combined mode:
//!
//! | state | line is header | line is footer | action |
//! |-------|----------------|----------------|--------|
//! | IDLE  | yes            | -              | open a request (deliver at once if also a footer) |
//! | IDLE  | no             | -              | discard, warn `no_current_request` |
//! | OPEN  | yes            | -              | conflict, resolved by [`ParseStrategy`] |
//! | OPEN  | no             | yes            | append, deliver, back to IDLE |
//! | OPEN  | no             | no             | append |
//!
//! In single-line mode every matched line is delivered as its own request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::request::{ParsedLine, Request};
use crate::warning::{Warning, WarningKind, WarningSink};

/// How a header arriving while a request is still open is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseStrategy {
    /// Treat the header as an implicit close of the open request.
    #[default]
    AssumeCorrect,
    /// Drop the open request and skip lines until the next clean header.
    Cautious,
}

impl ParseStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AssumeCorrect => "assume-correct",
            Self::Cautious => "cautious",
        }
    }
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseStrategy {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assume-correct" => Ok(Self::AssumeCorrect),
            "cautious" => Ok(Self::Cautious),
            _ => Err(FormatError::InvalidParseStrategy(s.to_string())),
        }
    }
}

/// Whether lines are stitched into multi-line requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    SingleLine,
    #[default]
    Combined,
}

/// Downstream consumer of completed requests.
///
/// Returning `false` marks the request as rejected (e.g. by a filter); the
/// reconstructor only counts it.
pub trait RequestHandler {
    fn handle_request(&mut self, request: Request) -> bool;
}

impl<F: FnMut(Request) -> bool> RequestHandler for F {
    fn handle_request(&mut self, request: Request) -> bool {
        self(request)
    }
}

/// Running counters kept for the health report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseCounters {
    /// Lines matched by some line definition.
    pub parsed_lines: u64,
    /// Requests closed by the reconstructor, delivered or not.
    pub parsed_requests: u64,
    /// Matched lines discarded because no request could hold them.
    pub skipped_lines: u64,
    /// Closed requests that were incomplete or rejected downstream.
    pub skipped_requests: u64,
}

/// The request reconstruction state machine.
#[derive(Debug)]
pub struct Reconstructor {
    mode: RequestMode,
    strategy: ParseStrategy,
    current: Option<Request>,
    counters: ParseCounters,
}

impl Reconstructor {
    pub const fn new(mode: RequestMode, strategy: ParseStrategy) -> Self {
        Self {
            mode,
            strategy,
            current: None,
            counters: ParseCounters {
                parsed_lines: 0,
                parsed_requests: 0,
                skipped_lines: 0,
                skipped_requests: 0,
            },
        }
    }

    pub const fn mode(&self) -> RequestMode {
        self.mode
    }

    pub const fn strategy(&self) -> ParseStrategy {
        self.strategy
    }

    pub const fn counters(&self) -> &ParseCounters {
        &self.counters
    }

    /// Whether a request is currently accumulating lines.
    pub const fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Feeds one matched line.
    pub fn push(
        &mut self,
        line: ParsedLine,
        handler: &mut dyn RequestHandler,
        warnings: &mut dyn WarningSink,
    ) {
        self.counters.parsed_lines += 1;
        match self.mode {
            RequestMode::SingleLine => self.deliver(Request::new(line), handler),
            RequestMode::Combined => self.stitch(line, handler, warnings),
        }
    }

    /// Ends the current input. An open request is dropped with a warning.
    pub fn finish(&mut self, last_lineno: u64, warnings: &mut dyn WarningSink) {
        if let Some(open) = self.current.take() {
            tracing::debug!(
                lines = open.len(),
                first_lineno = open.first_lineno(),
                "dropping unfinished request at end of input"
            );
            warnings.warn(Warning::new(
                WarningKind::UnfinishedRequestOnEof,
                "end of input reached, but the last request was not completed",
                last_lineno,
            ));
        }
    }

    fn stitch(
        &mut self,
        line: ParsedLine,
        handler: &mut dyn RequestHandler,
        warnings: &mut dyn WarningSink,
    ) {
        if line.header {
            if let Some(open) = self.current.take() {
                match self.strategy {
                    ParseStrategy::AssumeCorrect => self.deliver(open, handler),
                    ParseStrategy::Cautious => {
                        tracing::debug!(
                            first_lineno = open.first_lineno(),
                            lineno = line.lineno,
                            "dropping unclosed request and the header that interrupted it"
                        );
                        self.counters.parsed_requests += 1;
                        self.counters.skipped_requests += 1;
                        self.counters.skipped_lines += 1;
                        warnings.warn(Warning::new(
                            WarningKind::UnclosedRequest,
                            format!(
                                "header line {:?} found, but the previous request was not closed",
                                line.line_type
                            ),
                            line.lineno,
                        ));
                        return;
                    }
                }
            }
            let closes = line.footer;
            let request = Request::new(line);
            if closes {
                self.deliver(request, handler);
            } else {
                self.current = Some(request);
            }
        } else if let Some(mut open) = self.current.take() {
            let closes = line.footer;
            open.push(line);
            if closes {
                self.deliver(open, handler);
            } else {
                self.current = Some(open);
            }
        } else {
            self.counters.skipped_lines += 1;
            warnings.warn(Warning::new(
                WarningKind::NoCurrentRequest,
                format!(
                    "parseable line {:?} found outside of a request",
                    line.line_type
                ),
                line.lineno,
            ));
        }
    }

    fn deliver(&mut self, request: Request, handler: &mut dyn RequestHandler) {
        self.counters.parsed_requests += 1;
        if self.mode == RequestMode::Combined && !request.is_completed() {
            tracing::debug!(
                first_lineno = request.first_lineno(),
                "flushed request without footer is not delivered"
            );
            self.counters.skipped_requests += 1;
            return;
        }
        if !handler.handle_request(request) {
            self.counters.skipped_requests += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::fixtures::line;
    use crate::value::Value;

    fn header(n: u64) -> ParsedLine {
        line("header", n, &[("id", Value::Integer(i64::try_from(n).unwrap()))]).header()
    }

    fn body(n: u64) -> ParsedLine {
        line("body", n, &[])
    }

    fn footer(n: u64) -> ParsedLine {
        line("footer", n, &[]).footer()
    }

    struct Run {
        requests: Vec<Request>,
        warnings: Vec<Warning>,
        counters: ParseCounters,
    }

    fn run(mode: RequestMode, strategy: ParseStrategy, lines: Vec<ParsedLine>) -> Run {
        let mut reconstructor = Reconstructor::new(mode, strategy);
        let mut requests = Vec::new();
        let mut warnings = Vec::new();
        let last = lines.last().map_or(0, |l| l.lineno);
        {
            let mut handler = |r: Request| {
                requests.push(r);
                true
            };
            for l in lines {
                reconstructor.push(l, &mut handler, &mut warnings);
            }
        }
        reconstructor.finish(last, &mut warnings);
        Run {
            requests,
            warnings,
            counters: *reconstructor.counters(),
        }
    }

    fn line_types(request: &Request) -> Vec<&str> {
        request.lines().iter().map(|l| &*l.line_type).collect()
    }

    #[test]
    fn header_body_footer_makes_one_request() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::AssumeCorrect,
            vec![header(1), body(2), footer(3)],
        );
        assert_eq!(out.requests.len(), 1);
        assert_eq!(line_types(&out.requests[0]), ["header", "body", "footer"]);
        assert!(out.warnings.is_empty());
        assert_eq!(out.counters.parsed_lines, 3);
        assert_eq!(out.counters.parsed_requests, 1);
    }

    #[test]
    fn assume_correct_flushes_and_reopens() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::AssumeCorrect,
            vec![header(1), header(2), footer(3)],
        );
        assert_eq!(out.requests.len(), 1);
        assert_eq!(line_types(&out.requests[0]), ["header", "footer"]);
        assert_eq!(out.requests[0].first("id"), Some(&Value::Integer(2)));
        assert!(out.warnings.is_empty());
        assert_eq!(out.counters.parsed_requests, 2);
        assert_eq!(out.counters.skipped_requests, 1);
    }

    #[test]
    fn cautious_drops_both_requests() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::Cautious,
            vec![header(1), header(2), footer(3)],
        );
        assert!(out.requests.is_empty());
        let kinds: Vec<_> = out.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            [WarningKind::UnclosedRequest, WarningKind::NoCurrentRequest]
        );
        assert_eq!(out.warnings[0].lineno, 2);
        assert_eq!(out.counters.skipped_lines, 2);
        assert_eq!(out.counters.parsed_requests, 1);
        assert_eq!(out.counters.skipped_requests, 1);
    }

    #[test]
    fn cautious_recovers_at_next_clean_header() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::Cautious,
            vec![header(1), header(2), body(3), footer(4), header(5), footer(6)],
        );
        assert_eq!(out.requests.len(), 1);
        assert_eq!(out.requests[0].first("id"), Some(&Value::Integer(5)));
    }

    #[test]
    fn line_outside_request_is_discarded() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::AssumeCorrect,
            vec![body(1), footer(2), header(3), footer(4)],
        );
        assert_eq!(out.requests.len(), 1);
        assert_eq!(out.warnings.len(), 2);
        assert!(
            out.warnings
                .iter()
                .all(|w| w.kind == WarningKind::NoCurrentRequest)
        );
        assert_eq!(out.counters.skipped_lines, 2);
    }

    #[test]
    fn header_that_is_also_footer_closes_immediately() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::AssumeCorrect,
            vec![
                line("access", 1, &[]).header().footer(),
                line("access", 2, &[]).header().footer(),
            ],
        );
        assert_eq!(out.requests.len(), 2);
        assert!(out.requests.iter().all(Request::is_single_line));
    }

    #[test]
    fn open_request_at_eof_is_warned_not_delivered() {
        let out = run(
            RequestMode::Combined,
            ParseStrategy::AssumeCorrect,
            vec![header(1), body(2)],
        );
        assert!(out.requests.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, WarningKind::UnfinishedRequestOnEof);
        assert_eq!(out.warnings[0].lineno, 2);
    }

    #[test]
    fn single_line_mode_delivers_every_line() {
        let out = run(
            RequestMode::SingleLine,
            ParseStrategy::AssumeCorrect,
            vec![body(1), body(2), header(3)],
        );
        assert_eq!(out.requests.len(), 3);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn rejected_requests_are_counted() {
        let mut reconstructor =
            Reconstructor::new(RequestMode::SingleLine, ParseStrategy::AssumeCorrect);
        let mut reject_even = |r: Request| r.first_lineno().is_some_and(|n| n % 2 == 1);
        for n in 1..=4 {
            reconstructor.push(body(n), &mut reject_even, &mut ());
        }
        assert_eq!(reconstructor.counters().parsed_requests, 4);
        assert_eq!(reconstructor.counters().skipped_requests, 2);
    }

    #[test]
    fn parse_strategy_from_str() {
        assert_eq!(
            "cautious".parse::<ParseStrategy>().unwrap(),
            ParseStrategy::Cautious
        );
        assert_eq!(
            "assume-correct".parse::<ParseStrategy>().unwrap(),
            ParseStrategy::AssumeCorrect
        );
        let err = "optimistic".parse::<ParseStrategy>().unwrap_err();
        assert!(matches!(err, FormatError::InvalidParseStrategy(s) if s == "optimistic"));
    }
}
