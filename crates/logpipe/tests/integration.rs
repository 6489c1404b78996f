//! End-to-end tests: pipeline, spans, adapters and shutdown.

use logpipe::writers::{ChannelProducer, FileLayout, FileWriter, RetryPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use logpipe::{
    Attrs, Config, Level, LogAdapter, LogEntry, Pipeline, PipelineError, SpanEntry, SpanId,
    SpanStatus, TraceAdapter, TraceId, TraceLink, WriteError, Writer, HEADER_SAMPLED,
    HEADER_SPAN_ID, HEADER_TRACE_ID,
};
use std::sync::{Arc, Mutex};

// =============================================================================
// Capturing writers
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct CapturedLine {
    level: Level,
    text: String,
    span_id: Option<SpanId>,
    attrs: Attrs,
}

#[derive(Clone, Default)]
struct LineSink {
    lines: Arc<Mutex<Vec<CapturedLine>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

impl LineSink {
    fn texts(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().map(|l| l.text.clone()).collect()
    }
}

impl Writer<LogEntry> for LineSink {
    async fn write(&self, batch: &[LogEntry]) -> Result<(), WriteError> {
        self.batches.lock().unwrap().push(batch.len());
        self.lines.lock().unwrap().extend(batch.iter().map(|line| CapturedLine {
            level: line.level,
            text: line.text.clone(),
            span_id: line.trace.map(|t| t.span_id),
            attrs: line.attrs.clone(),
        }));
        Ok(())
    }

    fn name(&self) -> &str {
        "line-sink"
    }
}

#[derive(Debug, Clone)]
struct CapturedSpan {
    name: String,
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    status: SpanStatus,
    logs: Vec<String>,
    attrs: Attrs,
}

#[derive(Clone, Default)]
struct SpanSink {
    spans: Arc<Mutex<Vec<CapturedSpan>>>,
}

impl Writer<SpanEntry> for SpanSink {
    async fn write(&self, batch: &[SpanEntry]) -> Result<(), WriteError> {
        self.spans.lock().unwrap().extend(batch.iter().map(|span| CapturedSpan {
            name: span.name.clone(),
            trace_id: span.trace_id,
            span_id: span.span_id,
            parent_span_id: span.parent_span_id,
            status: span.status.clone(),
            logs: span.logs.iter().map(|l| l.text.clone()).collect(),
            attrs: span.attrs.clone(),
        }));
        Ok(())
    }

    fn name(&self) -> &str {
        "span-sink"
    }
}

fn config() -> Config {
    let mut config = Config {
        name: "orders".into(),
        version: "2.0".into(),
        level: Level::Debug,
        ..Config::default()
    };
    config.term.batch = 1000;
    config
}

// =============================================================================
// Logging
// =============================================================================

#[tokio::test]
async fn test_stop_delivers_every_line_in_order() {
    let sink = LineSink::default();
    let pipeline = Pipeline::builder(config()).log_writer(sink.clone()).build().unwrap();
    pipeline.start().unwrap();

    for i in 0..250 {
        pipeline.info(&format!("line {i}"));
    }
    pipeline.stop().await;

    let expected: Vec<String> = (0..250).map(|i| format!("line {i}")).collect();
    assert_eq!(sink.texts(), expected);
    assert_eq!(pipeline.export_metrics()[0].metrics.entries_written(), 250);
}

#[tokio::test]
async fn test_lines_carry_attrs_and_link() {
    let sink = LineSink::default();
    let pipeline = Pipeline::builder(config()).log_writer(sink.clone()).build().unwrap();
    pipeline.start().unwrap();

    let link = TraceLink::from_headers("0af7651916cd43dd8448eb211c80319c", "b7ad6b7169203331")
        .unwrap();
    pipeline.log_with(
        Level::Error,
        "payment declined",
        &Attrs::new().with("order", 17).with("retry", false),
        Some(link),
    );
    pipeline.stop().await;

    let lines = sink.lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].level, Level::Error);
    assert_eq!(lines[0].span_id, Some(link.span_id));
    assert_eq!(lines[0].attrs, Attrs::new().with("order", 17).with("retry", false));
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let sink = LineSink::default();
    let pipeline = Pipeline::builder(config()).log_writer(sink.clone()).build().unwrap();
    pipeline.start().unwrap();

    pipeline.info("before restart");
    pipeline.keeper().restart();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(pipeline.is_running());
    pipeline.info("after restart");

    pipeline.stop().await;
    assert_eq!(sink.texts(), vec!["before restart", "after restart"]);
}

#[tokio::test]
async fn test_pipelines_are_independent() {
    let first = LineSink::default();
    let second = LineSink::default();
    let a = Pipeline::builder(config()).log_writer(first.clone()).build().unwrap();
    let b = Pipeline::builder(config()).log_writer(second.clone()).build().unwrap();
    a.start().unwrap();
    b.start().unwrap();

    a.info("for a");
    b.info("for b");
    a.stop().await;
    assert!(b.is_running());
    b.stop().await;

    assert_eq!(first.texts(), vec!["for a"]);
    assert_eq!(second.texts(), vec!["for b"]);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let sink = LineSink::default();
    let pipeline = Pipeline::builder(config()).log_writer(sink.clone()).build().unwrap();

    pipeline.start().unwrap();
    pipeline.info("first run");
    pipeline.stop().await;

    pipeline.start().unwrap();
    pipeline.info("second run");
    pipeline.stop().await;

    assert_eq!(sink.texts(), vec!["first run", "second run"]);
}

// =============================================================================
// Spans
// =============================================================================

#[tokio::test]
async fn test_span_tree_and_log_mirroring() {
    let lines = LineSink::default();
    let spans = SpanSink::default();
    let pipeline = Pipeline::builder(config())
        .log_writer(lines.clone())
        .trace_writer(spans.clone())
        .build()
        .unwrap();
    pipeline.start().unwrap();

    let mut root = pipeline.span("checkout");
    root.set_attr("cart.items", 3);
    root.info("cart loaded");
    let mut child = root.child("charge");
    child.warn("slow gateway");
    child.set_status(SpanStatus::Error("declined".into()));
    let (root_id, child_id, trace_id) = (root.span_id(), child.span_id(), root.trace_id());
    child.end();
    root.end();
    pipeline.stop().await;

    let spans = spans.spans.lock().unwrap();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].name, "charge");
    assert_eq!(spans[0].span_id, child_id);
    assert_eq!(spans[0].parent_span_id, Some(root_id));
    assert_eq!(spans[0].trace_id, trace_id);
    assert_eq!(spans[0].status, SpanStatus::Error("declined".into()));
    assert_eq!(spans[0].logs, vec!["slow gateway"]);
    assert_eq!(spans[1].name, "checkout");
    assert_eq!(spans[1].parent_span_id, None);
    assert_eq!(spans[1].attrs, Attrs::new().with("cart.items", 3));

    let lines = lines.lines.lock().unwrap();
    let mirrored: Vec<_> = lines.iter().map(|l| (l.text.as_str(), l.span_id)).collect();
    assert_eq!(
        mirrored,
        vec![("cart loaded", Some(root_id)), ("slow gateway", Some(child_id))]
    );
}

#[tokio::test]
async fn test_span_logs_not_mirrored_when_disabled() {
    let lines = LineSink::default();
    let spans = SpanSink::default();
    let pipeline = Pipeline::builder(Config {
        trace_sync_log: false,
        ..config()
    })
    .log_writer(lines.clone())
    .trace_writer(spans.clone())
    .build()
    .unwrap();
    pipeline.start().unwrap();

    let mut span = pipeline.span("quiet");
    span.info("kept on the span only");
    drop(span);
    pipeline.stop().await;

    assert!(lines.texts().is_empty());
    assert_eq!(spans.spans.lock().unwrap()[0].logs, vec!["kept on the span only"]);
}

#[tokio::test]
async fn test_span_logs_respect_level() {
    let spans = SpanSink::default();
    let pipeline = Pipeline::builder(Config {
        level: Level::Warn,
        ..config()
    })
    .log_writer(LineSink::default())
    .trace_writer(spans.clone())
    .build()
    .unwrap();
    pipeline.start().unwrap();

    let mut span = pipeline.span("filtered");
    span.debug("dropped");
    span.error("kept");
    span.end();
    pipeline.stop().await;

    assert_eq!(spans.spans.lock().unwrap()[0].logs, vec!["kept"]);
}

#[tokio::test]
async fn test_span_from_headers_continues_trace() {
    let spans = SpanSink::default();
    let pipeline = Pipeline::builder(config())
        .log_writer(LineSink::default())
        .trace_writer(spans.clone())
        .build()
        .unwrap();
    pipeline.start().unwrap();

    let remote = TraceLink::from_headers("463ac35c9f6413ad48485a3953bb6124", "a2fb4a1d1a96d312")
        .unwrap();
    let span = pipeline.span_from(remote, "GET /orders");
    let headers = span.headers();
    assert_eq!(headers[0], (HEADER_TRACE_ID, "463ac35c9f6413ad48485a3953bb6124".to_string()));
    assert_eq!(headers[1], (HEADER_SPAN_ID, span.span_id().to_string()));
    assert_eq!(headers[2], (HEADER_SAMPLED, "1".to_string()));
    span.end();
    pipeline.stop().await;

    let spans = spans.spans.lock().unwrap();
    assert_eq!(spans[0].trace_id, remote.trace_id);
    assert_eq!(spans[0].parent_span_id, Some(remote.span_id));
}

#[tokio::test]
async fn test_spans_released_without_trace_adapter() {
    let pipeline = Pipeline::builder(config()).log_writer(LineSink::default()).build().unwrap();
    pipeline.start().unwrap();

    for _ in 0..3 {
        pipeline.span("discarded").end();
    }
    pipeline.stop().await;

    let pool = pipeline.span_pool_metrics();
    assert_eq!(pool.allocated(), 1);
    assert_eq!(pool.reused(), 2);
}

// =============================================================================
// Built-in adapters
// =============================================================================

#[tokio::test]
async fn test_file_adapter_writes_dated_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config();
    config.log_adapter = LogAdapter::File;
    config.time_format = "%H".into();
    config.file.path = tmp.path().to_path_buf();

    let pipeline = Pipeline::new(config.clone()).unwrap();
    pipeline.start().unwrap();
    pipeline.info("to disk");
    pipeline.log_with(Level::Warn, "with attrs", &Attrs::new().with("k", "v"), None);
    pipeline.stop().await;

    let (_, path) = config.file.layout().paths(&chrono::Local::now());
    let body = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[INFO] to disk"));
    assert!(lines[1].ends_with(r#"[WARN] {"k":"v"} - with attrs"#));
}

#[tokio::test]
async fn test_kafka_adapter_publishes_records() {
    let mut config = config();
    config.log_adapter = LogAdapter::Kafka;
    config.kafka.topic = "app-logs".into();

    let (producer, mut rx) = ChannelProducer::new();
    let pipeline = Pipeline::builder(config)
        .broker_producer(producer)
        .service_addr(vec!["10.0.0.5".into()])
        .build()
        .unwrap();
    pipeline.start().unwrap();
    pipeline.warn("disk almost full");
    pipeline.stop().await;

    let message = rx.try_recv().unwrap();
    assert_eq!(message.topic, "app-logs");
    let record: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(record["content"], "disk almost full");
    assert_eq!(record["level"], "WARN");
    assert_eq!(record["service_name"], "orders");
    assert_eq!(record["service_version"], "2.0");
    assert_eq!(record["service_addr"][0], "10.0.0.5");
    assert_eq!(record["pid"], std::process::id());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_jaeger_adapter_with_file_transport() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("traces/spans.jsonl");
    let mut config = config();
    config.trace_adapter = TraceAdapter::Jaeger;
    config.jaeger.topic = "orders-svc".into();
    config.jaeger.path = Some(path.clone());

    let pipeline = Pipeline::builder(config)
        .log_writer(LineSink::default())
        .resource_attr("deploy.zone", "eu-1")
        .build()
        .unwrap();
    pipeline.start().unwrap();
    pipeline.span("reserve").end();
    pipeline.stop().await;

    let body = std::fs::read_to_string(path).unwrap();
    let batch: serde_json::Value = serde_json::from_str(body.trim_end()).unwrap();
    assert_eq!(batch["process"]["serviceName"], "orders-svc");
    let zone = batch["process"]["tags"]
        .as_array()
        .unwrap()
        .iter()
        .find(|tag| tag["key"] == "deploy.zone")
        .unwrap();
    assert_eq!(zone["value"], "eu-1");
    assert_eq!(batch["spans"][0]["operationName"], "reserve");
}

#[tokio::test]
async fn test_custom_writer_overrides_adapter() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = FileLayout {
        root: tmp.path().to_path_buf(),
        ..FileLayout::default()
    };
    let mut config = config();
    config.log_adapter = LogAdapter::Kafka;

    let pipeline = Pipeline::builder(config)
        .log_writer(FileWriter::new(layout, "%H"))
        .build()
        .unwrap();
    assert_eq!(pipeline.export_metrics()[0].name, "log-kafka-manager");
}

/// Rejects the first `failures` batches with a transport error.
#[derive(Clone)]
struct Unsteady {
    sink: LineSink,
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl Writer<LogEntry> for Unsteady {
    async fn write(&self, batch: &[LogEntry]) -> Result<(), WriteError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(WriteError::Transport("broker unavailable".into()));
        }
        self.sink.write(batch).await
    }

    fn name(&self) -> &str {
        "unsteady"
    }
}

#[tokio::test]
async fn test_kafka_retry_section_redelivers_failed_batches() {
    let mut config = config();
    config.log_adapter = LogAdapter::Kafka;
    config.kafka.retry = Some(RetryPolicy {
        attempts: 3,
        backoff_ms: 1,
        backoff_max_ms: 2,
    });

    let writer = Unsteady {
        sink: LineSink::default(),
        failures: 2,
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let pipeline = Pipeline::builder(config).log_writer(writer.clone()).build().unwrap();
    pipeline.start().unwrap();
    pipeline.error("payment declined");
    pipeline.stop().await;

    assert_eq!(writer.sink.texts(), vec!["payment declined"]);
    assert_eq!(writer.calls.load(Ordering::SeqCst), 3);
    let metrics = &pipeline.export_metrics()[0].metrics;
    assert_eq!(metrics.write_errors(), 0);
    assert_eq!(metrics.entries_written(), 1);
}

#[tokio::test]
async fn test_without_retry_section_failed_batch_is_dropped() {
    let mut config = config();
    config.log_adapter = LogAdapter::Kafka;

    let writer = Unsteady {
        sink: LineSink::default(),
        failures: 1,
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let pipeline = Pipeline::builder(config).log_writer(writer.clone()).build().unwrap();
    pipeline.start().unwrap();
    pipeline.error("payment declined");
    pipeline.stop().await;

    assert!(writer.sink.texts().is_empty());
    assert_eq!(writer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.export_metrics()[0].metrics.write_errors(), 1);
}

#[test]
fn test_missing_collaborators_fail_build() {
    let mut kafka = config();
    kafka.log_adapter = LogAdapter::Kafka;
    assert!(matches!(Pipeline::new(kafka), Err(PipelineError::MissingProducer)));

    let mut jaeger = config();
    jaeger.trace_adapter = TraceAdapter::Jaeger;
    assert!(matches!(Pipeline::new(jaeger), Err(PipelineError::MissingTransport)));
}
