//! # Trace spans
//!
//! A [`Span`] is a handle to a pooled [`SpanRecord`]. The record is filled
//! while the span is open and handed to the trace export manager exactly once,
//! when the span ends (explicitly with [`Span::end`] or on drop).
//!
//! ```ignore
//! let mut root = pipeline.span("checkout");
//! root.set_attr("cart.items", 3);
//! {
//!     let mut db = root.child("db.query");
//!     db.info("select took 4ms");
//! } // db ends here
//! root.end();
//! ```
//!
//! Span logs are filtered by the pipeline level. When `trace_sync_log` is on
//! they are also emitted as log lines carrying the span's [`TraceLink`].

use crate::attr::{AttrValue, Attrs};
use crate::level::Level;
use crate::pipeline::Shared;
use crate::pool::{Pooled, Reset};
use crate::trace::{SpanId, TraceId, TraceLink};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Propagation header carrying the trace id.
pub const HEADER_TRACE_ID: &str = "X-B3-Traceid";
/// Propagation header carrying the span id.
pub const HEADER_SPAN_ID: &str = "X-B3-Spanid";
/// Propagation header carrying the sampling decision.
pub const HEADER_SAMPLED: &str = "X-B3-Sampled";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

/// A timestamped log recorded on a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLog {
    pub time: DateTime<Local>,
    pub level: Level,
    pub text: String,
    pub attrs: Attrs,
}

/// The pooled payload of the trace pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub attrs: Attrs,
    pub status: SpanStatus,
    pub logs: Vec<SpanLog>,
}

/// A finished span owned by the trace pipeline.
pub type SpanEntry = Pooled<SpanRecord>;

impl Default for SpanRecord {
    fn default() -> Self {
        Self {
            trace_id: TraceId::from_u128(0),
            span_id: SpanId::from_u64(0),
            parent_span_id: None,
            name: String::new(),
            kind: SpanKind::Internal,
            start: DateTime::from(UNIX_EPOCH),
            end: DateTime::from(UNIX_EPOCH),
            attrs: Attrs::new(),
            status: SpanStatus::Unset,
            logs: Vec::new(),
        }
    }
}

impl Reset for SpanRecord {
    fn reset(&mut self) {
        self.trace_id = TraceId::from_u128(0);
        self.span_id = SpanId::from_u64(0);
        self.parent_span_id = None;
        self.name.clear();
        self.kind = SpanKind::Internal;
        self.start = DateTime::from(UNIX_EPOCH);
        self.end = DateTime::from(UNIX_EPOCH);
        self.attrs.clear();
        self.status = SpanStatus::Unset;
        self.logs.clear();
    }
}

impl SpanRecord {
    pub fn link(&self) -> TraceLink {
        TraceLink {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
        }
    }

    pub fn duration_micros(&self) -> i64 {
        (self.end - self.start).num_microseconds().unwrap_or(i64::MAX)
    }
}

/// An open span. Ends on drop.
pub struct Span {
    record: Option<SpanEntry>,
    shared: Arc<Shared>,
}

impl Span {
    pub(crate) fn open(
        shared: Arc<Shared>,
        trace_id: TraceId,
        parent_span_id: Option<SpanId>,
        name: &str,
    ) -> Self {
        let mut record = shared.spans.acquire();
        record.trace_id = trace_id;
        record.span_id = SpanId::random();
        record.parent_span_id = parent_span_id;
        record.name.push_str(name);
        record.start = Local::now();
        Self {
            record: Some(record),
            shared,
        }
    }

    fn record(&self) -> &SpanRecord {
        // Only `finish` takes the record, and it consumes or drops `self`.
        self.record.as_deref().unwrap_or_else(|| unreachable!())
    }

    fn record_mut(&mut self) -> &mut SpanRecord {
        self.record.as_deref_mut().unwrap_or_else(|| unreachable!())
    }

    /// Opens a child span in the same trace.
    pub fn child(&self, name: &str) -> Span {
        let parent = self.record();
        Span::open(
            Arc::clone(&self.shared),
            parent.trace_id,
            Some(parent.span_id),
            name,
        )
    }

    pub fn trace_id(&self) -> TraceId {
        self.record().trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.record().span_id
    }

    pub fn name(&self) -> &str {
        &self.record().name
    }

    /// Correlation for log lines emitted inside this span.
    pub fn link(&self) -> TraceLink {
        self.record().link()
    }

    /// Headers that continue this trace in a downstream service.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        let record = self.record();
        [
            (HEADER_TRACE_ID, record.trace_id.to_string()),
            (HEADER_SPAN_ID, record.span_id.to_string()),
            (HEADER_SAMPLED, "1".to_string()),
        ]
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> &mut Self {
        self.record_mut().attrs.set(key, value);
        self
    }

    pub fn set_kind(&mut self, kind: SpanKind) -> &mut Self {
        self.record_mut().kind = kind;
        self
    }

    pub fn set_status(&mut self, status: SpanStatus) -> &mut Self {
        self.record_mut().status = status;
        self
    }

    /// Records a log on the span, subject to the pipeline level.
    pub fn log(&mut self, level: Level, text: &str) {
        self.log_with(level, text, Attrs::new());
    }

    pub fn log_with(&mut self, level: Level, text: &str, attrs: Attrs) {
        if !level.enabled(self.shared.level) {
            return;
        }

        if self.shared.trace_sync_log {
            let link = self.link();
            self.shared.emit(level, text, &attrs, Some(link));
        }

        self.record_mut().logs.push(SpanLog {
            time: Local::now(),
            level,
            text: text.to_string(),
            attrs,
        });
    }

    pub fn debug(&mut self, text: &str) {
        self.log(Level::Debug, text);
    }

    pub fn info(&mut self, text: &str) {
        self.log(Level::Info, text);
    }

    pub fn warn(&mut self, text: &str) {
        self.log(Level::Warn, text);
    }

    pub fn error(&mut self, text: &str) {
        self.log(Level::Error, text);
    }

    pub fn fatal(&mut self, text: &str) {
        self.log(Level::Fatal, text);
    }

    /// Stamps the end time and hands the record to the trace pipeline.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.end = Local::now();
            self.shared.submit_span(record);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record {
            Some(record) => f
                .debug_struct("Span")
                .field("name", &record.name)
                .field("trace_id", &record.trace_id)
                .field("span_id", &record.span_id)
                .finish(),
            None => f.write_str("Span(ended)"),
        }
    }
}
