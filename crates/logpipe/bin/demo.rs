//! # Pipeline Demo
//!
//! Runs a pipeline from `config/log.yaml` (or defaults), emits lines from a
//! few concurrent tasks, opens a small trace continued from B3 headers and
//! shuts down gracefully, printing the export counters at the end.
//!
//! With `log_adapter: kafka` the demo publishes into an in-process channel
//! and prints the number of records received. With `trace_adapter: jaeger`
//! and no `path`, spans are appended to `./logs/spans.jsonl`.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p logpipe --bin demo
//!
//! # Internal diagnostics of the managers
//! RUST_LOG=logpipe=debug,keeper=debug cargo run -p logpipe --bin demo
//!
//! # More lines per task
//! cargo run -p logpipe --bin demo -- --lines 1000
//! ```

use anyhow::Context;
use logpipe::writers::{ChannelProducer, JsonFileTransport};
use logpipe::{Attrs, Config, Level, LogAdapter, Pipeline, TraceAdapter, TraceLink};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const TASKS: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let lines = parse_lines(std::env::args().skip(1))?;
    let config = Config::discover().context("loading pipeline config")?;

    let mut builder = Pipeline::builder(config.clone());
    let mut broker_rx = None;
    if config.log_adapter == LogAdapter::Kafka {
        let (producer, rx) = ChannelProducer::new();
        builder = builder.broker_producer(producer);
        broker_rx = Some(rx);
    }
    if config.trace_adapter == TraceAdapter::Jaeger && config.jaeger.path.is_none() {
        builder = builder.collector_transport(JsonFileTransport::new("./logs/spans.jsonl"));
    }

    let pipeline = Arc::new(builder.build()?);
    pipeline.start()?;
    let started = Instant::now();

    // =========================================================================
    // Concurrent producers
    // =========================================================================

    let mut producers = Vec::with_capacity(TASKS);
    for task in 0..TASKS {
        let pipeline = Arc::clone(&pipeline);
        producers.push(tokio::spawn(async move {
            for i in 0..lines {
                let attrs = Attrs::new().with("task", task).with("seq", i);
                let level = if i % 50 == 49 { Level::Warn } else { Level::Info };
                pipeline.log_with(level, "processed item", &attrs, None);
                if i % 100 == 99 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await?;
    }

    // =========================================================================
    // A trace continued from an upstream service
    // =========================================================================

    let upstream = TraceLink::from_headers("463ac35c9f6413ad48485a3953bb6124", "a2fb4a1d1a96d312")?;
    let mut request = pipeline.span_from(upstream, "GET /orders");
    request.set_attr("http.method", "GET");
    request.info("request received");
    {
        let mut query = request.child("db.query");
        query.set_attr("db.rows", 42);
        query.debug("select from orders");
        query.end();
    }
    for (name, value) in request.headers() {
        pipeline.log_with(
            Level::Debug,
            "propagating header",
            &Attrs::new().with("header", name).with("value", value),
            Some(request.link()),
        );
    }
    request.end();

    pipeline.stop().await;
    let elapsed = started.elapsed();

    // =========================================================================
    // Summary
    // =========================================================================

    eprintln!();
    eprintln!("pipeline '{}' stopped after {:.2?}", pipeline.config().name, elapsed);
    for adapter in pipeline.export_metrics() {
        let m = &adapter.metrics;
        eprintln!(
            "  {:<22} entries={:<8} batches={:<6} errors={} panics={}",
            adapter.name,
            m.entries_written(),
            m.batches_written(),
            m.write_errors(),
            m.writer_panics(),
        );
    }
    let pool = pipeline.line_pool_metrics();
    eprintln!(
        "  line pool             allocated={} reused={} discarded={}",
        pool.allocated(),
        pool.reused(),
        pool.discarded()
    );

    if let Some(mut rx) = broker_rx {
        let mut records = 0;
        while let Ok(message) = rx.try_recv() {
            records += 1;
            if records == 1 {
                eprintln!("  first record: {}", String::from_utf8_lossy(&message.payload));
            }
        }
        eprintln!("  broker records received: {records}");
    }

    Ok(())
}

fn parse_lines(mut args: impl Iterator<Item = String>) -> anyhow::Result<usize> {
    let mut lines = 250;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--lines" => {
                let value = args.next().context("--lines needs a value")?;
                lines = value.parse().context("--lines must be a number")?;
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(lines)
}
