//! # Pipeline context
//!
//! A [`Pipeline`] owns everything one telemetry pipeline needs: the entry
//! pools, exactly one log export manager, zero or one trace export manager,
//! the resource attributes and the root keeper that supervises the managers.
//! Nothing is process-global, so independent pipelines can coexist (tests
//! build one each).
//!
//! ```text
//! log-manager (root keeper)
//! ├── log-{term|file|kafka}-manager   ExportManager<LogEntry>
//! └── trace-jaeger-manager            ExportManager<SpanEntry>   (optional)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let pipeline = Pipeline::builder(Config::discover()?).build()?;
//! pipeline.start()?;
//!
//! pipeline.info("service started");
//! let mut span = pipeline.span("checkout");
//! span.info("cart loaded");
//! span.end();
//!
//! pipeline.stop().await;
//! ```

use crate::attr::{AttrValue, Attrs};
use crate::config::{Config, LogAdapter, TraceAdapter};
use crate::error::PipelineError;
use crate::export::{ExportConfig, ExportManager, ExportMetrics};
use crate::level::Level;
use crate::line::{Line, LogEntry};
use crate::pool::{Pool, PoolMetrics};
use crate::resource;
use crate::span::{Span, SpanEntry, SpanRecord};
use crate::trace::{TraceId, TraceLink};
use crate::writer::{Writer, WriterBoxed};
use crate::writers::{
    BrokerIdentity, BrokerProducer, BrokerWriter, CollectorTarget, CollectorTransport,
    CollectorWriter, FileWriter, JsonFileTransport, TermWriter, with_policy,
};
use keeper::{CancellationToken, Keeper};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Name of the root keeper.
pub const ROOT_KEEPER: &str = "log-manager";

/// State shared by the pipeline and every open span.
pub(crate) struct Shared {
    pub(crate) level: Level,
    pub(crate) trace_sync_log: bool,
    pub(crate) lines: Pool<Line>,
    pub(crate) spans: Pool<SpanRecord>,
    log: ExportManager<LogEntry>,
    trace: Option<ExportManager<SpanEntry>>,
}

impl Shared {
    /// Builds a line and hands it to the log manager.
    pub(crate) fn emit(&self, level: Level, text: &str, attrs: &Attrs, link: Option<TraceLink>) {
        let mut line = self.lines.line(level, text, link);
        line.attrs.extend_from(attrs);
        self.log.send(line);
    }

    /// Hands a finished span to the trace manager, or releases it.
    pub(crate) fn submit_span(&self, record: SpanEntry) {
        if let Some(trace) = &self.trace {
            trace.send(record);
        }
    }
}

/// Counters of one adapter's export manager.
#[derive(Debug, Clone)]
pub struct AdapterMetrics {
    /// Keeper name of the manager, e.g. `log-file-manager`.
    pub name: String,
    pub metrics: Arc<ExportMetrics>,
}

impl AdapterMetrics {
    fn of<T: Send + Sync + 'static>(manager: &ExportManager<T>) -> Self {
        Self {
            name: manager.name().to_string(),
            metrics: Arc::clone(manager.metrics()),
        }
    }
}

struct Running {
    handle: JoinHandle<()>,
}

/// An embeddable log and trace pipeline.
pub struct Pipeline {
    config: Config,
    resource: Attrs,
    shared: Arc<Shared>,
    root: Arc<Keeper>,
    running: Mutex<Option<Running>>,
}

impl Pipeline {
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Builds a pipeline with the built-in writers for `config`.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        Self::builder(config).build()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the keeper tree on the current tokio runtime.
    ///
    /// Fails with [`KeeperError::AlreadyStarted`](keeper::KeeperError) while
    /// the pipeline is running.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = self.root.spawn(&CancellationToken::new())?;
        *running = Some(Running { handle });
        debug!(pipeline = %self.config.name, "pipeline started");
        Ok(())
    }

    /// Stops the tree and waits until every manager has drained and stopped.
    ///
    /// Producers should stop logging before calling this; lines sent during
    /// the drain may stay buffered.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.root.stop();

        if let Some(running) = running {
            if let Err(e) = running.handle.await {
                error!(pipeline = %self.config.name, error = %e, "pipeline task failed");
            }
        }
        debug!(pipeline = %self.config.name, "pipeline stopped");
    }

    /// `true` between a successful [`start`](Self::start) and the end of the
    /// corresponding [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        !self.root.stopped()
    }

    /// The root keeper, for embedding the pipeline in a larger tree.
    pub fn keeper(&self) -> &Arc<Keeper> {
        &self.root
    }

    // =========================================================================
    // Logging
    // =========================================================================

    /// Returns `true` if lines at `level` are emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level.enabled(self.shared.level)
    }

    pub fn log(&self, level: Level, text: &str) {
        if self.enabled(level) {
            self.shared.emit(level, text, &Attrs::new(), None);
        }
    }

    /// Logs with attributes and, optionally, trace correlation.
    pub fn log_with(&self, level: Level, text: &str, attrs: &Attrs, link: Option<TraceLink>) {
        if self.enabled(level) {
            self.shared.emit(level, text, attrs, link);
        }
    }

    pub fn debug(&self, text: &str) {
        self.log(Level::Debug, text);
    }

    pub fn info(&self, text: &str) {
        self.log(Level::Info, text);
    }

    pub fn warn(&self, text: &str) {
        self.log(Level::Warn, text);
    }

    pub fn error(&self, text: &str) {
        self.log(Level::Error, text);
    }

    pub fn fatal(&self, text: &str) {
        self.log(Level::Fatal, text);
    }

    /// Acquires a pooled line filled with `text`, without level filtering.
    pub fn new_entry(&self, link: Option<TraceLink>, level: Level, text: &str) -> LogEntry {
        self.shared.lines.line(level, text, link)
    }

    /// Hands a line built with [`new_entry`](Self::new_entry) to the log manager.
    pub fn send(&self, entry: LogEntry) {
        self.shared.log.send(entry);
    }

    // =========================================================================
    // Tracing
    // =========================================================================

    /// Opens the root span of a new trace.
    pub fn span(&self, name: &str) -> Span {
        Span::open(Arc::clone(&self.shared), TraceId::random(), None, name)
    }

    /// Opens a span continuing a remote trace; the remote span is its parent.
    pub fn span_from(&self, link: TraceLink, name: &str) -> Span {
        Span::open(
            Arc::clone(&self.shared),
            link.trace_id,
            Some(link.span_id),
            name,
        )
    }

    /// `true` if finished spans are exported.
    pub fn tracing_enabled(&self) -> bool {
        self.shared.trace.is_some()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resource(&self) -> &Attrs {
        &self.resource
    }

    /// Counters of every adapter, log manager first.
    pub fn export_metrics(&self) -> Vec<AdapterMetrics> {
        let mut adapters = vec![AdapterMetrics::of(&self.shared.log)];
        if let Some(trace) = &self.shared.trace {
            adapters.push(AdapterMetrics::of(trace));
        }
        adapters
    }

    pub fn line_pool_metrics(&self) -> &PoolMetrics {
        self.shared.lines.metrics()
    }

    pub fn span_pool_metrics(&self) -> &PoolMetrics {
        self.shared.spans.metrics()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.root.stop();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.config.name)
            .field("log", &self.shared.log)
            .field("trace", &self.shared.trace)
            .field("root", &self.root)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

type BrokerFactory = Box<dyn FnOnce(BrokerIdentity) -> Arc<dyn WriterBoxed<LogEntry>> + Send>;
type CollectorFactory =
    Box<dyn FnOnce(CollectorTarget, Attrs) -> Arc<dyn WriterBoxed<SpanEntry>> + Send>;

/// Assembles a [`Pipeline`] from a [`Config`] and injected collaborators.
pub struct PipelineBuilder {
    config: Config,
    log_writer: Option<Arc<dyn WriterBoxed<LogEntry>>>,
    trace_writer: Option<Arc<dyn WriterBoxed<SpanEntry>>>,
    broker: Option<BrokerFactory>,
    collector: Option<CollectorFactory>,
    resource: Attrs,
    service_addr: Vec<String>,
    pool_max_idle: usize,
}

impl PipelineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            log_writer: None,
            trace_writer: None,
            broker: None,
            collector: None,
            resource: Attrs::new(),
            service_addr: Vec::new(),
            pool_max_idle: Pool::<Line>::DEFAULT_MAX_IDLE,
        }
    }

    /// Replaces the configured log adapter's writer. The adapter's batch and
    /// retry settings still apply.
    pub fn log_writer<W: Writer<LogEntry> + 'static>(mut self, writer: W) -> Self {
        self.log_writer = Some(Arc::new(writer));
        self
    }

    /// Exports spans through `writer`, whatever the configured trace adapter.
    /// The `jaeger` batch and retry settings apply.
    pub fn trace_writer<W: Writer<SpanEntry> + 'static>(mut self, writer: W) -> Self {
        self.trace_writer = Some(Arc::new(writer));
        self
    }

    /// Producer used by the `kafka` log adapter.
    pub fn broker_producer<P: BrokerProducer + 'static>(mut self, producer: P) -> Self {
        let topic = self.config.kafka.topic.clone();
        self.broker = Some(Box::new(move |identity| {
            Arc::new(BrokerWriter::new(producer, topic, identity)) as Arc<dyn WriterBoxed<LogEntry>>
        }));
        self
    }

    /// Transport used by the `jaeger` trace adapter.
    pub fn collector_transport<C: CollectorTransport + 'static>(mut self, transport: C) -> Self {
        self.collector = Some(Box::new(move |target, process_tags| {
            Arc::new(CollectorWriter::new(transport, target, process_tags))
                as Arc<dyn WriterBoxed<SpanEntry>>
        }));
        self
    }

    /// Adds (or overrides) a resource attribute.
    pub fn resource_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.resource.set(key, value);
        self
    }

    /// Service addresses stamped on broker records.
    pub fn service_addr(mut self, addr: Vec<String>) -> Self {
        self.service_addr = addr;
        self
    }

    /// Caps the idle entries kept by each pool.
    pub fn pool_max_idle(mut self, max_idle: usize) -> Self {
        self.pool_max_idle = max_idle;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let Self {
            config,
            log_writer,
            trace_writer,
            broker,
            collector,
            resource: extra,
            service_addr,
            pool_max_idle,
        } = self;

        let mut resource = resource::detect(&config.name, &config.version);
        resource.extend_from(&extra);

        let log = {
            let (name, export): (&str, ExportConfig) = match config.log_adapter {
                LogAdapter::Term => ("log-term-manager", config.term.export_config()),
                LogAdapter::File => ("log-file-manager", config.file.export_config()),
                LogAdapter::Kafka => ("log-kafka-manager", config.kafka.export_config()),
            };
            let writer: Arc<dyn WriterBoxed<LogEntry>> = match (log_writer, config.log_adapter) {
                (Some(writer), _) => writer,
                (None, LogAdapter::Term) => {
                    Arc::new(TermWriter::new(&config.time_format, config.term.color))
                }
                (None, LogAdapter::File) => {
                    Arc::new(FileWriter::new(config.file.layout(), &config.time_format))
                }
                (None, LogAdapter::Kafka) => {
                    let factory = broker.ok_or(PipelineError::MissingProducer)?;
                    factory(BrokerIdentity {
                        pid: std::process::id(),
                        service_addr,
                        service_name: config.name.clone(),
                        service_version: config.version.clone(),
                    })
                }
            };
            let retry = match config.log_adapter {
                LogAdapter::Kafka => config.kafka.retry.as_ref(),
                LogAdapter::Term | LogAdapter::File => None,
            };
            ExportManager::with_boxed(name, export, with_policy(writer, retry))
        };

        let trace_writer: Option<Arc<dyn WriterBoxed<SpanEntry>>> = match (trace_writer, config.trace_adapter) {
            (Some(writer), _) => Some(writer),
            (None, TraceAdapter::None) => None,
            (None, TraceAdapter::Jaeger) => {
                let target = config.jaeger.target();
                match (collector, &config.jaeger.path) {
                    (Some(factory), _) => Some(factory(target, resource.clone())),
                    (None, Some(path)) => Some(Arc::new(CollectorWriter::new(
                        JsonFileTransport::new(path.clone()),
                        target,
                        resource.clone(),
                    )) as Arc<dyn WriterBoxed<SpanEntry>>),
                    (None, None) => return Err(PipelineError::MissingTransport),
                }
            }
        };
        let trace = trace_writer.map(|writer| {
            ExportManager::with_boxed(
                "trace-jaeger-manager",
                config.jaeger.export_config(),
                with_policy(writer, config.jaeger.retry.as_ref()),
            )
        });

        let root = Keeper::new(ROOT_KEEPER);
        root.listen(|token| async move {
            token.cancelled().await;
            false
        });
        root.add(log.keeper());
        if let Some(trace) = &trace {
            root.add(trace.keeper());
        }

        let shared = Arc::new(Shared {
            level: config.level,
            trace_sync_log: config.trace_sync_log,
            lines: Pool::with_max_idle(pool_max_idle),
            spans: Pool::with_max_idle(pool_max_idle),
            log,
            trace,
        });

        Ok(Pipeline {
            config,
            resource,
            shared,
            root,
            running: Mutex::new(None),
        })
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("log_writer", &self.log_writer.as_ref().map(|w| w.name().to_string()))
            .field("trace_writer", &self.trace_writer.as_ref().map(|w| w.name().to_string()))
            .field("broker", &self.broker.is_some())
            .field("collector", &self.collector.is_some())
            .finish()
    }
}
