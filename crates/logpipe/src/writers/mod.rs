//! Destination strategies.
//!
//! | Writer | Entries | Destination |
//! |--------|---------|-------------|
//! | [`TermWriter`] | log lines | stdout, optionally colored |
//! | [`FileWriter`] | log lines | date-partitioned files |
//! | [`BrokerWriter`] | log lines | a [`BrokerProducer`] topic, one JSON record per line |
//! | [`CollectorWriter`] | spans | a [`CollectorTransport`], one JSON document per batch |
//! | [`RetryingWriter`] | any | decorator, redelivers per a [`RetryPolicy`] |

mod broker;
mod collector;
mod file;
mod retry;
mod term;

pub use broker::{BrokerIdentity, BrokerMessage, BrokerProducer, BrokerWriter, ChannelProducer};
pub use collector::{
    CollectorRequest, CollectorTarget, CollectorTransport, CollectorWriter, JsonFileTransport,
};
pub use file::{FileLayout, FileWriter};
pub(crate) use retry::with_policy;
pub use retry::{RetryPolicy, RetryingWriter};
pub use term::TermWriter;
