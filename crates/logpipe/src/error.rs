//! Error types for the pipeline, its writers and its configuration.

use keeper::KeeperError;
use thiserror::Error;

/// Errors a [`Writer`](crate::Writer) reports for one batch.
///
/// The export manager logs these and counts them; the batch is considered
/// consumed either way.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Local I/O failed (file open, write, terminal).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The batch could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Transport-layer error (broker, collector).
    #[error("transport error: {0}")]
    Transport(String),
    /// A retryable failure persisted through every allowed delivery.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<WriteError>,
    },
}

impl WriteError {
    /// Returns `true` if retrying the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport(_))
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid YAML for [`Config`](crate::Config).
    #[error("parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Unknown level name.
    #[error("invalid level: {0}")]
    InvalidLevel(String),
    /// Unknown adapter name.
    #[error("invalid adapter: {0}")]
    InvalidAdapter(String),
}

/// Errors raised by [`Pipeline`](crate::Pipeline) construction and lifecycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Keeper(#[from] KeeperError),
    /// The kafka log adapter was selected without a broker producer.
    #[error("log adapter kafka requires a broker producer")]
    MissingProducer,
    /// The jaeger trace adapter was selected without a transport or file path.
    #[error("trace adapter jaeger requires a collector transport")]
    MissingTransport,
    /// A trace or span id string could not be parsed.
    #[error("invalid trace id: {0}")]
    InvalidTraceId(String),
}
