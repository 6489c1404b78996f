//! Error types for keeper lifecycle operations.

use thiserror::Error;

/// Errors returned synchronously by [`Keeper::start`](crate::Keeper::start)
/// and [`Keeper::spawn`](crate::Keeper::spawn).
///
/// Both are fatal to the call that produced them and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeeperError {
    /// The keeper is already running.
    #[error("{name} started already")]
    AlreadyStarted { name: String },

    /// The token handed to start was already cancelled.
    #[error("{name} context is cancelled")]
    Cancelled { name: String },
}

impl KeeperError {
    /// Returns the name of the keeper that rejected the start.
    pub fn keeper_name(&self) -> &str {
        match self {
            Self::AlreadyStarted { name } | Self::Cancelled { name } => name,
        }
    }

    /// Returns a short stable label for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::AlreadyStarted { .. } => "keeper_already_started",
            Self::Cancelled { .. } => "keeper_cancelled",
        }
    }
}
