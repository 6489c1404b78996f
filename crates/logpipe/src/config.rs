//! Pipeline configuration, loaded from YAML.
//!
//! Every field has a default, so an empty document (or no file at all) gives
//! a working terminal pipeline:
//!
//! ```yaml
//! name: orders
//! level: debug
//! log_adapter: file
//! file:
//!   path: /var/log/orders
//! trace_adapter: jaeger
//! jaeger:
//!   path: /var/log/orders/spans.jsonl
//!   retry:
//!     attempts: 3
//! ```

use crate::error::ConfigError;
use crate::export::ExportConfig;
use crate::level::Level;
use crate::writers::{CollectorTarget, FileLayout, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Files tried by [`Config::discover`], in order.
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["config/log.yaml", "../config/log.yaml"];

/// Destination of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogAdapter {
    #[default]
    Term,
    File,
    Kafka,
}

impl LogAdapter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "term",
            Self::File => "file",
            Self::Kafka => "kafka",
        }
    }
}

impl FromStr for LogAdapter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "term" => Ok(Self::Term),
            "file" => Ok(Self::File),
            "kafka" => Ok(Self::Kafka),
            _ => Err(ConfigError::InvalidAdapter(s.to_string())),
        }
    }
}

/// Destination of finished spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TraceAdapter {
    #[default]
    None,
    Jaeger,
}

impl TraceAdapter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Jaeger => "jaeger",
        }
    }
}

impl FromStr for TraceAdapter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "jaeger" => Ok(Self::Jaeger),
            _ => Err(ConfigError::InvalidAdapter(s.to_string())),
        }
    }
}

macro_rules! adapter_string_conversions {
    ($($t:ty),*) => {
        $(
            impl TryFrom<String> for $t {
                type Error = ConfigError;

                fn try_from(s: String) -> Result<Self, Self::Error> {
                    s.parse()
                }
            }

            impl From<$t> for String {
                fn from(adapter: $t) -> Self {
                    adapter.as_str().to_string()
                }
            }

            impl fmt::Display for $t {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

adapter_string_conversions!(LogAdapter, TraceAdapter);

/// Terminal adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermConfig {
    pub color: bool,
    pub batch: usize,
    pub milliseconds: u64,
}

impl Default for TermConfig {
    fn default() -> Self {
        Self {
            color: true,
            batch: 100,
            milliseconds: 100,
        }
    }
}

impl TermConfig {
    /// One flush at a time so terminal output keeps arrival order.
    pub fn export_config(&self) -> ExportConfig {
        export_config(self.batch, self.milliseconds).with_max_concurrent_flushes(1)
    }
}

/// File adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub batch: usize,
    pub milliseconds: u64,
    pub path: PathBuf,
    /// `chrono` format for the per-period folder.
    pub folder: String,
    /// `chrono` format for the file name.
    pub name: String,
    pub ext: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        let layout = FileLayout::default();
        Self {
            batch: 100,
            milliseconds: 350,
            path: layout.root,
            folder: layout.folder,
            name: layout.name,
            ext: layout.ext,
        }
    }
}

impl FileConfig {
    pub fn export_config(&self) -> ExportConfig {
        export_config(self.batch, self.milliseconds)
    }

    pub fn layout(&self) -> FileLayout {
        FileLayout {
            root: self.path.clone(),
            folder: self.folder.clone(),
            name: self.name.clone(),
            ext: self.ext.clone(),
        }
    }
}

/// Broker adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub batch: usize,
    pub milliseconds: u64,
    /// Broker address, for the injected producer.
    pub host: String,
    pub topic: String,
    /// Redelivery of failed batches; none when absent.
    pub retry: Option<RetryPolicy>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            batch: 100,
            milliseconds: 350,
            host: "127.0.0.1:9092".to_string(),
            topic: "logs".to_string(),
            retry: None,
        }
    }
}

impl KafkaConfig {
    pub fn export_config(&self) -> ExportConfig {
        export_config(self.batch, self.milliseconds)
    }
}

/// Trace collector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JaegerConfig {
    pub batch: usize,
    pub milliseconds: u64,
    pub endpoint: String,
    /// Service name reported to the collector.
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// When set and no transport is injected, batches are appended to this
    /// file as JSON lines.
    pub path: Option<PathBuf>,
    /// Redelivery of failed batches; none when absent.
    pub retry: Option<RetryPolicy>,
}

impl Default for JaegerConfig {
    fn default() -> Self {
        Self {
            batch: 100,
            milliseconds: 350,
            endpoint: "http://127.0.0.1:14268/api/traces".to_string(),
            topic: "logs".to_string(),
            username: None,
            password: None,
            path: None,
            retry: None,
        }
    }
}

impl JaegerConfig {
    pub fn export_config(&self) -> ExportConfig {
        export_config(self.batch, self.milliseconds)
    }

    pub fn target(&self) -> CollectorTarget {
        CollectorTarget {
            endpoint: self.endpoint.clone(),
            service: self.topic.clone(),
            username: self.username.clone().filter(|u| !u.is_empty()),
            password: self.password.clone(),
        }
    }
}

fn export_config(batch: usize, milliseconds: u64) -> ExportConfig {
    ExportConfig::default()
        .with_batch_size(batch)
        .with_interval(Duration::from_millis(milliseconds.max(1)))
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name.
    pub name: String,
    /// Service version.
    pub version: String,
    /// Lines above this level are dropped before allocation.
    pub level: Level,
    /// `chrono` format for rendered timestamps.
    pub time_format: String,

    pub log_adapter: LogAdapter,
    pub term: TermConfig,
    pub file: FileConfig,
    pub kafka: KafkaConfig,

    pub trace_adapter: TraceAdapter,
    /// Mirror span logs into the log pipeline.
    pub trace_sync_log: bool,
    pub jaeger: JaegerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "logpipe".to_string(),
            version: "1.0".to_string(),
            level: Level::Info,
            time_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            log_adapter: LogAdapter::Term,
            term: TermConfig::default(),
            file: FileConfig::default(),
            kafka: KafkaConfig::default(),
            trace_adapter: TraceAdapter::None,
            trace_sync_log: true,
            jaeger: JaegerConfig::default(),
        }
    }
}

impl Config {
    /// Parses a YAML document; missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Loads the first file of [`CONFIG_SEARCH_PATHS`] that exists, or the
    /// defaults when none does.
    pub fn discover() -> Result<Self, ConfigError> {
        Self::discover_in(Path::new("."))
    }

    /// [`discover`](Self::discover) relative to `base`.
    pub fn discover_in(base: &Path) -> Result<Self, ConfigError> {
        for candidate in CONFIG_SEARCH_PATHS {
            let path = base.join(candidate);
            if path.is_file() {
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.name, "logpipe");
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.log_adapter, LogAdapter::Term);
        assert_eq!(config.trace_adapter, TraceAdapter::None);
        assert!(config.trace_sync_log);
        assert!(config.term.color);
        assert_eq!(config.file.path, PathBuf::from("./logs"));
        assert_eq!(config.kafka.host, "127.0.0.1:9092");
        assert_eq!(config.jaeger.batch, 100);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            "name: orders\nlevel: debug\nlog_adapter: FILE\nfile:\n  path: /tmp/orders\n",
        )
        .unwrap();
        assert_eq!(config.name, "orders");
        assert_eq!(config.version, "1.0");
        assert_eq!(config.level, Level::Debug);
        assert_eq!(config.log_adapter, LogAdapter::File);
        assert_eq!(config.file.path, PathBuf::from("/tmp/orders"));
        assert_eq!(config.file.batch, 100);
        assert_eq!(config.file.ext, "log");
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::from_yaml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_yaml_str("log_adapter: syslog"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            "syslog".parse::<LogAdapter>(),
            Err(ConfigError::InvalidAdapter(_))
        ));
        assert!(Config::from_yaml_str("level: loud").is_err());
    }

    #[test]
    fn test_export_configs() {
        let config = Config::default();
        let term = config.term.export_config();
        assert_eq!(term.batch_size, 100);
        assert_eq!(term.interval, Duration::from_millis(100));
        assert_eq!(term.max_concurrent_flushes, 1);

        let file = config.file.export_config();
        assert_eq!(file.interval, Duration::from_millis(350));
        assert_eq!(file.max_concurrent_flushes, 4);
    }

    #[test]
    fn test_discover_prefers_local_then_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(tmp.path().join("config")).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(tmp.path().join("config/log.yaml"), "name: parent\n").unwrap();

        assert_eq!(Config::discover_in(&work).unwrap().name, "parent");

        std::fs::create_dir_all(work.join("config")).unwrap();
        std::fs::write(work.join("config/log.yaml"), "name: local\n").unwrap();
        assert_eq!(Config::discover_in(&work).unwrap().name, "local");

        let empty = tempfile::tempdir().unwrap();
        assert_eq!(Config::discover_in(empty.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_retry_section_is_opt_in() {
        assert_eq!(Config::default().kafka.retry, None);

        let config = Config::from_yaml_str(
            "kafka:\n  retry:\n    attempts: 5\njaeger:\n  retry: {}\n",
        )
        .unwrap();
        let kafka = config.kafka.retry.unwrap();
        assert_eq!(kafka.attempts, 5);
        assert_eq!(kafka.backoff_ms, RetryPolicy::default().backoff_ms);
        assert_eq!(config.jaeger.retry, Some(RetryPolicy::default()));
    }

    #[test]
    fn test_round_trips_through_yaml() {
        let mut config = Config::default();
        config.trace_adapter = TraceAdapter::Jaeger;
        config.jaeger.username = Some("svc".into());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert_eq!(Config::from_yaml_str(&yaml).unwrap(), config);
    }
}
