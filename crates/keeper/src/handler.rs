//! Handler types registered on a keeper.

use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A lifecycle handler.
///
/// Receives the token bound to the phase it runs in and resolves to
/// `ignored`: `true` short-circuits the remaining handlers of the phase
/// (and, in the before phase, vetoes the start).
pub type Handler = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, bool> + Send + Sync>;

/// Receives the panic payload of a handler that unwound.
pub type PanicHandler = Arc<dyn Fn(&CancellationToken, &PanicPayload) + Send + Sync>;

/// Payload of a caught handler panic.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Extracts the message from a payload caught by `catch_unwind`.
    pub fn from_any(any: &(dyn Any + Send)) -> Self {
        let message = if let Some(msg) = any.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = any.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }

    /// Returns the panic message, or `"unknown panic"` for non-string payloads.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Boxes an async closure into a [`Handler`].
pub(crate) fn boxed<F, Fut>(f: F) -> Handler
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |token| Box::pin(f(token)))
}

/// Which handler list is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Before,
    Listen,
    After,
}

impl Phase {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Listen => "listen",
            Self::After => "after",
        }
    }
}
