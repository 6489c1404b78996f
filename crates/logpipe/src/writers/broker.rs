use crate::attr::Attrs;
use crate::error::WriteError;
use crate::line::{Line, LogEntry};
use crate::writer::Writer;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::future::Future;
use tokio::sync::mpsc;

/// Message-broker client boundary.
///
/// The network client is external; the writer hands it one encoded record
/// per line for a single topic.
pub trait BrokerProducer: Send + Sync {
    /// Publishes `messages` to `topic`, in order.
    fn publish(
        &self,
        topic: &str,
        messages: Vec<Vec<u8>>,
    ) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// Service identity stamped on every broker record.
#[derive(Debug, Clone, Default)]
pub struct BrokerIdentity {
    pub pid: u32,
    pub service_addr: Vec<String>,
    pub service_name: String,
    pub service_version: String,
}

/// JSON record published per line.
#[derive(Debug, Serialize)]
struct Record<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "no_fields")]
    fields: &'a Attrs,
    level: &'static str,
    time: String,
    timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    pid: u32,
    #[serde(skip_serializing_if = "no_addr")]
    service_addr: &'a [String],
    service_name: &'a str,
    service_version: &'a str,
}

fn no_fields(attrs: &&Attrs) -> bool {
    attrs.is_empty()
}

fn no_addr(addr: &&[String]) -> bool {
    addr.is_empty()
}

/// Publishes lines as JSON records through a [`BrokerProducer`].
#[derive(Debug)]
pub struct BrokerWriter<P> {
    producer: P,
    topic: String,
    identity: BrokerIdentity,
}

impl<P: BrokerProducer> BrokerWriter<P> {
    pub fn new(producer: P, topic: impl Into<String>, identity: BrokerIdentity) -> Self {
        Self {
            producer,
            topic: topic.into(),
            identity,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encodes one line as its broker record.
    pub fn encode(&self, line: &Line) -> Result<Vec<u8>, WriteError> {
        let trace = line.trace.as_ref();
        let record = Record {
            content: &line.text,
            fields: &line.attrs,
            level: line.level.as_str(),
            time: line
                .time
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            timestamp_ms: line.time.timestamp_millis(),
            parent_span_id: trace
                .and_then(|t| t.parent_span_id)
                .map(|id| id.to_string()),
            span_id: trace.map(|t| t.span_id.to_string()),
            trace_id: trace.map(|t| t.trace_id.to_string()),
            pid: self.identity.pid,
            service_addr: &self.identity.service_addr,
            service_name: &self.identity.service_name,
            service_version: &self.identity.service_version,
        };
        Ok(serde_json::to_vec(&record)?)
    }
}

impl<P: BrokerProducer> Writer<LogEntry> for BrokerWriter<P> {
    async fn write(&self, batch: &[LogEntry]) -> Result<(), WriteError> {
        let messages = batch
            .iter()
            .map(|line| self.encode(line))
            .collect::<Result<Vec<_>, _>>()?;
        self.producer.publish(&self.topic, messages).await
    }

    fn name(&self) -> &str {
        "broker"
    }
}

/// One published message, as seen by a [`ChannelProducer`] receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// In-process producer that forwards messages to a tokio channel.
///
/// Useful to bridge into an application-owned broker client task.
#[derive(Debug, Clone)]
pub struct ChannelProducer {
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

impl ChannelProducer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BrokerProducer for ChannelProducer {
    async fn publish(&self, topic: &str, messages: Vec<Vec<u8>>) -> Result<(), WriteError> {
        for payload in messages {
            self.tx
                .send(BrokerMessage {
                    topic: topic.to_string(),
                    payload,
                })
                .map_err(|_| WriteError::Transport("broker channel closed".into()))?;
        }
        Ok(())
    }
}
