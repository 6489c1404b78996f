//! Embeddable log and trace pipeline
//!
//! Application code emits log lines and spans without waiting on I/O. Entries
//! are buffered per destination and exported in batches by supervised
//! background managers, either when a batch fills up or on a fixed interval.
//! Stopping the pipeline drains every buffer before the managers exit.
//!
//! # Features
//!
//! - **Pooled entries**: lines and spans are recycled through [`Pool`]s, reset on return
//! - **Batched export**: threshold and periodic flushes, bounded concurrency per destination
//! - **Supervised lifecycle**: managers run under a [`keeper::Keeper`] tree with ordered shutdown
//! - **Pluggable destinations**: terminal, dated files, a message broker, a span collector,
//!   or any [`Writer`]
//! - **Trace correlation**: B3 header propagation, span logs mirrored into the log stream
//!
//! # Example
//!
//! ```ignore
//! use logpipe::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(Config::discover()?)?;
//!     pipeline.start()?;
//!
//!     pipeline.info("listening");
//!     let mut span = pipeline.span("handle-request");
//!     span.set_attr("http.route", "/orders");
//!     span.end();
//!
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```

mod attr;
mod bucket;
mod config;
mod error;
mod export;
mod format;
mod invariants;
mod level;
mod line;
mod pipeline;
mod pool;
pub mod resource;
mod span;
mod trace;
mod writer;
pub mod writers;

pub use attr::{AttrValue, Attrs};
pub use bucket::BatchBuffer;
pub use config::{
    Config, FileConfig, JaegerConfig, KafkaConfig, LogAdapter, TermConfig, TraceAdapter,
    CONFIG_SEARCH_PATHS,
};
pub use error::{ConfigError, PipelineError, WriteError};
pub use export::{ExportConfig, ExportManager, ExportMetrics};
pub use format::{TextFormatter, TextStyle};
pub use level::Level;
pub use line::{Line, LogEntry};
pub use pipeline::{AdapterMetrics, Pipeline, PipelineBuilder, ROOT_KEEPER};
pub use pool::{Pool, PoolMetrics, Pooled, Reset};
pub use span::{
    Span, SpanEntry, SpanKind, SpanLog, SpanRecord, SpanStatus, HEADER_SAMPLED, HEADER_SPAN_ID,
    HEADER_TRACE_ID,
};
pub use trace::{SpanId, TraceId, TraceLink};
pub use writer::{NullWriter, Writer, WriterBoxed};

pub use keeper;
