//! The streaming driver: reads sources line by line, matches each line
//! against the file format and feeds the request reconstructor.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::file_format::FileFormat;
use crate::reconstruct::{ParseCounters, ParseStrategy, Reconstructor, RequestHandler};
use crate::request::ParsedLine;
use crate::warning::{Warning, WarningSink};

/// Buffer size for `BufReader` (64KB for large log files)
const BUFFER_SIZE: usize = 64 * 1024;

/// Totals over every source read so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub sources: u64,
    pub lines_read: u64,
    #[serde(flatten)]
    pub counters: ParseCounters,
}

/// Parses log sources with one file format.
///
/// Sources are read strictly one after another; only one request is ever
/// held open.
#[derive(Debug)]
pub struct LogParser {
    format: FileFormat,
    reconstructor: Reconstructor,
    sources: u64,
    lines_read: u64,
}

impl LogParser {
    pub fn new(format: FileFormat, strategy: ParseStrategy) -> Self {
        let reconstructor = Reconstructor::new(format.mode(), strategy);
        Self {
            format,
            reconstructor,
            sources: 0,
            lines_read: 0,
        }
    }

    pub const fn format(&self) -> &FileFormat {
        &self.format
    }

    pub const fn stats(&self) -> ParseStats {
        ParseStats {
            sources: self.sources,
            lines_read: self.lines_read,
            counters: *self.reconstructor.counters(),
        }
    }

    /// Reads one source to its end. Completed requests and warnings both go
    /// to `sink`.
    pub fn parse_reader<R, S>(
        &mut self,
        mut reader: R,
        source_name: &str,
        sink: &mut S,
    ) -> Result<(), ParseError>
    where
        R: BufRead,
        S: RequestHandler + WarningSink,
    {
        let source: Arc<str> = Arc::from(source_name);
        let mut buffer = Vec::with_capacity(512);
        let mut pending: Vec<Warning> = Vec::new();
        let mut lineno = 0u64;

        loop {
            buffer.clear();
            let read = reader
                .read_until(b'\n', &mut buffer)
                .map_err(|err| ParseError::Read {
                    source_name: source_name.to_string(),
                    source: err,
                })?;
            if read == 0 {
                break;
            }
            lineno += 1;
            self.lines_read += 1;

            let text = String::from_utf8_lossy(&buffer);
            let line = text.trim_end_matches(['\n', '\r']);
            if let Some((definition, fields)) = self.format.parse_line(line, lineno, &mut pending)
            {
                let mut parsed = ParsedLine::new(definition.name(), lineno, fields)
                    .with_source(Arc::clone(&source));
                parsed.header = definition.is_header();
                parsed.footer = definition.is_footer();
                self.reconstructor.push(parsed, &mut *sink, &mut pending);
            }
            for warning in pending.drain(..) {
                sink.warn(warning);
            }
        }

        self.reconstructor.finish(lineno, &mut pending);
        for warning in pending.drain(..) {
            sink.warn(warning);
        }
        self.sources += 1;
        tracing::debug!(source = source_name, lines = lineno, "finished source");
        Ok(())
    }

    /// Reads a file, gunzipping it when its name ends in `.gz`.
    pub fn parse_file<S>(&mut self, path: &Path, sink: &mut S) -> Result<(), ParseError>
    where
        S: RequestHandler + WarningSink,
    {
        let file = File::open(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path.display().to_string();
        tracing::debug!(path = %name, "parsing log file");
        if is_gzip(path) {
            let reader = BufReader::with_capacity(BUFFER_SIZE, MultiGzDecoder::new(file));
            self.parse_reader(reader, &name, sink)
        } else {
            let reader = BufReader::with_capacity(BUFFER_SIZE, file);
            self.parse_reader(reader, &name, sink)
        }
    }

    /// Reads files in order. The first file that cannot be opened stops the run.
    pub fn parse_files<P, S>(&mut self, paths: &[P], sink: &mut S) -> Result<(), ParseError>
    where
        P: AsRef<Path>,
        S: RequestHandler + WarningSink,
    {
        for path in paths {
            self.parse_file(path.as_ref(), sink)?;
        }
        Ok(())
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;
    use crate::file_format::fixtures::RAILS;
    use crate::request::Request;
    use crate::tracker::TrackerRegistry;
    use crate::value::Value;
    use crate::warning::WarningKind;

    const LOG: &str = "\
Processing UsersController#show (for 10.0.0.1 at 2024-03-01 10:15:00) [GET]
  SQL (0.5ms)   SELECT * FROM users WHERE id = 1
  Rendering users/show
Completed in 120ms | 200 OK [http://shop.test/users/1]

Processing OrdersController#index (for 10.0.0.2 at 2024-03-01 10:16:00) [GET]
Completed in lots of time
Completed in 80ms | 200 OK [http://shop.test/orders]
";

    #[derive(Default)]
    struct Collector {
        requests: Vec<Request>,
        warnings: Vec<Warning>,
    }

    impl RequestHandler for Collector {
        fn handle_request(&mut self, request: Request) -> bool {
            self.requests.push(request);
            true
        }
    }

    impl WarningSink for Collector {
        fn warn(&mut self, warning: Warning) {
            self.warnings.push(warning);
        }
    }

    fn parser(strategy: ParseStrategy) -> LogParser {
        let format = FileFormat::from_toml_str(RAILS, &TrackerRegistry::default()).unwrap();
        LogParser::new(format, strategy)
    }

    #[test]
    fn parses_requests_from_a_reader() {
        let mut parser = parser(ParseStrategy::AssumeCorrect);
        let mut sink = Collector::default();
        parser.parse_reader(LOG.as_bytes(), "test.log", &mut sink).unwrap();

        assert_eq!(sink.requests.len(), 2);
        let first = &sink.requests[0];
        assert_eq!(first.len(), 3);
        assert_eq!(first.first("controller"), Some(&Value::from("UsersController")));
        assert_eq!(first.first("duration"), Some(&Value::Float(0.12)));
        assert_eq!(first.source(), Some("test.log"));
        assert_eq!(first.first_lineno(), Some(1));
        assert_eq!(first.last_lineno(), Some(4));

        assert_eq!(sink.warnings.len(), 1);
        assert_eq!(sink.warnings[0].kind, WarningKind::TeaserCheckFailed);
        assert_eq!(sink.warnings[0].lineno, 7);

        let stats = parser.stats();
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.lines_read, 8);
        assert_eq!(stats.counters.parsed_lines, 5);
        assert_eq!(stats.counters.parsed_requests, 2);
    }

    #[test]
    fn unfinished_request_is_reset_per_source() {
        let mut parser = parser(ParseStrategy::AssumeCorrect);
        let mut sink = Collector::default();
        parser
            .parse_reader(
                "Processing A#b (for 1.1.1.1 at 2024-03-01 10:15:00) [GET]\n".as_bytes(),
                "one.log",
                &mut sink,
            )
            .unwrap();
        parser
            .parse_reader("Completed in 5ms | 200 OK [/x]\n".as_bytes(), "two.log", &mut sink)
            .unwrap();

        assert!(sink.requests.is_empty());
        let kinds: Vec<_> = sink.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![WarningKind::UnfinishedRequestOnEof, WarningKind::NoCurrentRequest]
        );
        assert_eq!(parser.stats().sources, 2);
    }

    #[test]
    fn crlf_and_invalid_utf8_are_tolerated() {
        let mut parser = parser(ParseStrategy::Cautious);
        let mut input = b"Processing A#b (for 1.1.1.1 at 2024-03-01 10:15:00) [GET]\r\n".to_vec();
        input.extend_from_slice(b"noise \xff\xfe\r\n");
        input.extend_from_slice(b"Completed in 5ms | 200 OK [/x]\r\n");
        let mut sink = Collector::default();
        parser.parse_reader(input.as_slice(), "crlf.log", &mut sink).unwrap();
        assert_eq!(sink.requests.len(), 1);
        assert_eq!(sink.requests[0].first("method"), Some(&Value::from("GET")));
        assert_eq!(parser.stats().lines_read, 3);
    }

    #[test]
    fn reads_plain_and_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("production.log");
        std::fs::write(&plain, LOG).unwrap();

        let gz = dir.path().join("production.log.1.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(LOG.as_bytes()).unwrap();
        std::fs::write(&gz, encoder.finish().unwrap()).unwrap();

        let mut parser = parser(ParseStrategy::AssumeCorrect);
        let mut sink = Collector::default();
        parser.parse_files(&[&plain, &gz], &mut sink).unwrap();
        assert_eq!(sink.requests.len(), 4);
        assert_eq!(parser.stats().lines_read, 16);
        assert!(sink.requests[3].source().unwrap().ends_with(".gz"));
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = parser(ParseStrategy::AssumeCorrect);
        let mut sink = Collector::default();
        let err = parser
            .parse_file(&dir.path().join("missing.log"), &mut sink)
            .unwrap_err();
        assert!(matches!(err, ParseError::Open { .. }));
    }
}
