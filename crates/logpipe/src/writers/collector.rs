use crate::attr::{AttrValue, Attrs};
use crate::error::WriteError;
use crate::span::{SpanEntry, SpanLog, SpanRecord, SpanStatus};
use crate::writer::Writer;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Where and as whom span batches are delivered.
#[derive(Debug, Clone, Default)]
pub struct CollectorTarget {
    pub endpoint: String,
    /// Service name reported in the batch's process section.
    pub service: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One encoded span batch, ready for delivery.
#[derive(Debug, Clone)]
pub struct CollectorRequest {
    pub endpoint: String,
    pub content_type: &'static str,
    pub username: Option<String>,
    pub password: Option<String>,
    pub body: Vec<u8>,
}

/// Collector client boundary (HTTP, UDP agent, file, ...).
pub trait CollectorTransport: Send + Sync {
    fn send(&self, request: CollectorRequest) -> impl Future<Output = Result<(), WriteError>> + Send;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct Batch<'a> {
    process: Process<'a>,
    spans: Vec<EncodedSpan<'a>>,
}

#[derive(Serialize)]
struct Process<'a> {
    #[serde(rename = "serviceName")]
    service_name: &'a str,
    tags: Vec<Tag<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncodedSpan<'a> {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    operation_name: &'a str,
    kind: &'static str,
    start_time: i64,
    duration: i64,
    flags: u8,
    status: Status<'a>,
    tags: Vec<Tag<'a>>,
    logs: Vec<Log<'a>>,
}

#[derive(Serialize)]
struct Status<'a> {
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Serialize)]
struct Tag<'a> {
    key: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a AttrValue,
}

#[derive(Serialize)]
struct Log<'a> {
    timestamp: i64,
    level: &'static str,
    message: &'a str,
    fields: Vec<Tag<'a>>,
}

fn tags(attrs: &Attrs) -> Vec<Tag<'_>> {
    attrs
        .iter()
        .map(|(key, value)| Tag {
            key,
            kind: match value {
                AttrValue::String(_) => "string",
                AttrValue::Int(_) => "long",
                AttrValue::Float(_) => "double",
                AttrValue::Bool(_) => "bool",
            },
            value,
        })
        .collect()
}

fn encode_log(log: &SpanLog) -> Log<'_> {
    Log {
        timestamp: log.time.timestamp_micros(),
        level: log.level.as_str(),
        message: &log.text,
        fields: tags(&log.attrs),
    }
}

fn encode_span(span: &SpanRecord) -> EncodedSpan<'_> {
    let status = match &span.status {
        SpanStatus::Unset => Status {
            code: "unset",
            message: None,
        },
        SpanStatus::Ok => Status {
            code: "ok",
            message: None,
        },
        SpanStatus::Error(message) => Status {
            code: "error",
            message: Some(message),
        },
    };

    EncodedSpan {
        trace_id: span.trace_id.to_string(),
        span_id: span.span_id.to_string(),
        parent_span_id: span.parent_span_id.map(|id| id.to_string()),
        operation_name: &span.name,
        kind: span.kind.as_str(),
        start_time: span.start.timestamp_micros(),
        duration: span.duration_micros(),
        flags: 1,
        status,
        tags: tags(&span.attrs),
        logs: span.logs.iter().map(encode_log).collect(),
    }
}

/// Encodes span batches as one JSON document and delivers them through a
/// [`CollectorTransport`].
///
/// ```text
/// {"process":{"serviceName":..,"tags":[..]},
///  "spans":[{"traceId":..,"spanId":..,"operationName":..,"startTime":µs,
///            "duration":µs,"tags":[..],"logs":[..]}]}
/// ```
#[derive(Debug)]
pub struct CollectorWriter<C> {
    transport: C,
    target: CollectorTarget,
    process_tags: Attrs,
}

impl<C: CollectorTransport> CollectorWriter<C> {
    /// `process_tags` is the pipeline resource, reported once per batch.
    pub fn new(transport: C, target: CollectorTarget, process_tags: Attrs) -> Self {
        Self {
            transport,
            target,
            process_tags,
        }
    }

    pub fn encode(&self, batch: &[SpanEntry]) -> Result<Vec<u8>, WriteError> {
        let doc = Batch {
            process: Process {
                service_name: &self.target.service,
                tags: tags(&self.process_tags),
            },
            spans: batch.iter().map(|span| encode_span(span)).collect(),
        };
        Ok(serde_json::to_vec(&doc)?)
    }
}

impl<C: CollectorTransport> Writer<SpanEntry> for CollectorWriter<C> {
    async fn write(&self, batch: &[SpanEntry]) -> Result<(), WriteError> {
        let body = self.encode(batch)?;
        let request = CollectorRequest {
            endpoint: self.target.endpoint.clone(),
            content_type: "application/json",
            username: self.target.username.clone(),
            password: self.target.password.clone(),
            body,
        };
        self.transport.send(request).await
    }

    fn name(&self) -> &str {
        self.transport.name()
    }
}

/// Appends each batch document as one line of a local file.
#[derive(Debug, Clone)]
pub struct JsonFileTransport {
    path: PathBuf,
}

impl JsonFileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CollectorTransport for JsonFileTransport {
    async fn send(&self, request: CollectorRequest) -> Result<(), WriteError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut body = request.body;
        body.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&body).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "json_file"
    }
}
