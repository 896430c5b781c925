//! The downstream chain: filters, then the summarizer, then an optional
//! record sink.

use crate::filter::Filter;
use crate::reconstruct::RequestHandler;
use crate::request::Request;
use crate::summarizer::Summarizer;
use crate::warning::{Warning, WarningSink};

/// Error type returned by record sinks.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Persists requests and warnings, e.g. into a database.
pub trait RecordSink {
    fn insert(&mut self, request: &Request) -> Result<(), SinkError>;

    fn warning(&mut self, _warning: &Warning) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flushes anything buffered. Called once after the last source.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Filters, aggregates and records requests handed over by the parser.
///
/// A sink failure is remembered and stops further sink calls; parsing
/// and aggregation go on. [`Pipeline::finish`] reports the failure.
pub struct Pipeline {
    filters: Vec<Box<dyn Filter>>,
    summarizer: Summarizer,
    sink: Option<Box<dyn RecordSink>>,
    sink_error: Option<SinkError>,
    filtered: u64,
}

impl Pipeline {
    pub fn new(summarizer: Summarizer) -> Self {
        Self {
            filters: Vec::new(),
            summarizer,
            sink: None,
            sink_error: None,
            filtered: 0,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub const fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    /// Requests dropped by a filter.
    pub const fn filtered(&self) -> u64 {
        self.filtered
    }

    fn record(&mut self, write: impl FnOnce(&mut dyn RecordSink) -> Result<(), SinkError>) {
        if self.sink_error.is_some() {
            return;
        }
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(err) = write(sink) {
                tracing::warn!(error = %err, "record sink failed; no further records are written");
                self.sink_error = Some(err);
            }
        }
    }

    /// Finalizes the trackers and flushes the sink.
    pub fn finish(mut self) -> Result<Summarizer, SinkError> {
        self.summarizer.finalize();
        self.record(|sink| sink.finish());
        match self.sink_error {
            Some(err) => Err(err),
            None => Ok(self.summarizer),
        }
    }
}

impl RequestHandler for Pipeline {
    fn handle_request(&mut self, request: Request) -> bool {
        let mut request = request;
        for filter in &self.filters {
            match filter.filter(request) {
                Some(kept) => request = kept,
                None => {
                    self.filtered += 1;
                    return false;
                }
            }
        }
        self.summarizer.aggregate(&request);
        self.record(|sink| sink.insert(&request));
        true
    }
}

impl WarningSink for Pipeline {
    fn warn(&mut self, warning: Warning) {
        self.record(|sink| sink.warning(&warning));
        self.summarizer.warn(warning);
    }
}
