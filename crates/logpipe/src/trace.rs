//! Trace correlation identifiers.

use crate::error::PipelineError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 128-bit trace identifier, rendered as 32 lower-case hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

/// 64-bit span identifier, rendered as 16 lower-case hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl TraceId {
    /// Generates a random, non-zero id.
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u128>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_u128(id: u128) -> Self {
        Self(id)
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl SpanId {
    /// Generates a random, non-zero id.
    pub fn random() -> Self {
        loop {
            let id = rand::random::<u64>();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = PipelineError;

    /// Accepts exactly 32 hex chars.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(PipelineError::InvalidTraceId(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| PipelineError::InvalidTraceId(s.to_string()))
    }
}

impl FromStr for SpanId {
    type Err = PipelineError;

    /// Accepts exactly 16 hex chars.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(PipelineError::InvalidTraceId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| PipelineError::InvalidTraceId(s.to_string()))
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Correlation carried by a log line emitted inside a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
}

impl TraceLink {
    /// Parses a link from propagated header values (e.g. `X-B3-Traceid` and
    /// `X-B3-Spanid`).
    ///
    /// The incoming span becomes the parent of whatever span continues the
    /// trace, so it is also returned as `span_id` for log correlation.
    pub fn from_headers(trace_id: &str, span_id: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            trace_id: trace_id.parse()?,
            span_id: span_id.parse()?,
            parent_span_id: None,
        })
    }
}
