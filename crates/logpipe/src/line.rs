//! Log lines: the pooled entry type of the log pipeline.

use crate::attr::Attrs;
use crate::level::Level;
use crate::pool::{Pool, Pooled, Reset};
use crate::trace::TraceLink;
use chrono::{DateTime, Local};
use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::time::UNIX_EPOCH;

/// One log line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub level: Level,
    pub text: String,
    pub time: DateTime<Local>,
    pub attrs: Attrs,
    /// Present when the line was emitted inside a span.
    pub trace: Option<TraceLink>,
}

/// A pooled line owned by whoever holds it; dropping it releases it.
pub type LogEntry = Pooled<Line>;

impl Default for Line {
    fn default() -> Self {
        Self {
            level: Level::Off,
            text: String::new(),
            time: DateTime::from(UNIX_EPOCH),
            attrs: Attrs::new(),
            trace: None,
        }
    }
}

impl Reset for Line {
    fn reset(&mut self) {
        self.level = Level::Off;
        self.text.clear();
        self.time = DateTime::from(UNIX_EPOCH);
        self.attrs.clear();
        self.trace = None;
    }
}

impl Line {
    /// Stamps the line with the current time and fills its payload.
    ///
    /// Fatal lines get the captured call stack appended.
    pub fn fill(&mut self, level: Level, text: &str, trace: Option<TraceLink>) {
        self.level = level;
        self.time = Local::now();
        self.text.push_str(text);
        self.trace = trace;

        if level == Level::Fatal {
            let _ = write!(self.text, "\n{}", Backtrace::force_capture());
        }
    }

    pub fn span_id(&self) -> Option<String> {
        self.trace.map(|t| t.span_id.to_string())
    }
}

impl Pool<Line> {
    /// Acquires a line and fills it.
    pub fn line(&self, level: Level, text: &str, trace: Option<TraceLink>) -> LogEntry {
        let mut line = self.acquire();
        line.fill(level, text, trace);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanId, TraceId};

    #[test]
    fn test_line_fill() {
        let pool = Pool::<Line>::new();
        let link = TraceLink {
            trace_id: TraceId::from_u128(1),
            span_id: SpanId::from_u64(2),
            parent_span_id: None,
        };
        let line = pool.line(Level::Info, "hello", Some(link));
        assert_eq!(line.level, Level::Info);
        assert_eq!(line.text, "hello");
        assert_eq!(line.span_id().as_deref(), Some("0000000000000002"));
        assert!(line.time > DateTime::<Local>::from(UNIX_EPOCH));
    }

    #[test]
    fn test_fatal_appends_backtrace() {
        let pool = Pool::<Line>::new();
        let line = pool.line(Level::Fatal, "boom", None);
        assert!(line.text.starts_with("boom\n"));
        assert!(line.text.len() > "boom\n".len());
    }

    #[test]
    fn test_reused_line_carries_nothing_over() {
        let pool = Pool::<Line>::new();
        {
            let mut line = pool.line(Level::Error, "first", None);
            line.attrs.set("user", 7);
        }
        let line = pool.acquire();
        assert_eq!(*line, Line::default());
        assert_eq!(pool.metrics().reused(), 1);
    }
}
