//! Redelivery of failed batches.
//!
//! The export manager never re-queues a batch. Network adapters opt into
//! redelivery with a `retry:` section, which wraps the adapter's writer in a
//! [`RetryingWriter`]:
//!
//! ```yaml
//! kafka:
//!   retry:
//!     attempts: 4        # deliveries per batch, the first included
//!     backoff_ms: 200    # pause after the first failure, doubled after each
//!     backoff_max_ms: 5000
//! ```
//!
//! Only [retryable](WriteError::is_retryable) failures (local I/O and
//! transport) are redelivered. An encoding failure would fail the same way
//! again, so it is returned at once.

use crate::error::WriteError;
use crate::invariants::debug_assert_delay_capped;
use crate::writer::{Writer, WriterBoxed};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How often, and how patiently, a failed batch is redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Deliveries per batch, the first included. `0` and `1` both mean a
    /// single delivery.
    pub attempts: u32,
    /// Pause after the first failure.
    pub backoff_ms: u64,
    /// Ceiling for the doubled pause.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff_ms: 200,
            backoff_max_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Pause after the `failures`-th consecutive failure (1-based):
    /// `backoff_ms * 2^(failures - 1)`, capped at `backoff_max_ms`.
    pub fn pause_after(&self, failures: u32) -> Duration {
        let factor = 1u64
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let ms = self.backoff_ms.saturating_mul(factor).min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Decorator that redelivers a batch to the wrapped writer per a
/// [`RetryPolicy`].
///
/// The batch stays borrowed for the whole sequence, so the export manager
/// releases its entries only after the last attempt.
pub struct RetryingWriter<T> {
    inner: Arc<dyn WriterBoxed<T>>,
    policy: RetryPolicy,
    redeliveries: AtomicU64,
    recovered: AtomicU64,
    abandoned: AtomicU64,
}

impl<T> RetryingWriter<T> {
    pub fn new<W: Writer<T> + 'static>(inner: W, policy: RetryPolicy) -> Self {
        Self::from_boxed(Arc::new(inner), policy)
    }

    /// Wraps an already type-erased writer.
    pub fn from_boxed(inner: Arc<dyn WriterBoxed<T>>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            redeliveries: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliveries beyond the first, over all batches.
    pub fn redeliveries(&self) -> u64 {
        self.redeliveries.load(Ordering::Relaxed)
    }

    /// Batches that failed at least once and were then accepted.
    pub fn recovered(&self) -> u64 {
        self.recovered.load(Ordering::Relaxed)
    }

    /// Batches still failing when the attempts ran out.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }
}

impl<T: Sync> Writer<T> for RetryingWriter<T> {
    async fn write(&self, batch: &[T]) -> Result<(), WriteError> {
        let max = self.policy.max_attempts();
        let mut failures = 0;

        loop {
            let err = match self.inner.write_boxed(batch).await {
                Ok(()) => {
                    if failures > 0 {
                        self.recovered.fetch_add(1, Ordering::Relaxed);
                        debug!(writer = self.inner.name(), failures, "batch delivered after retry");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            failures += 1;
            if failures >= max {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(writer = self.inner.name(), attempts = failures, error = %err, "giving up on batch");
                return Err(WriteError::RetriesExhausted {
                    attempts: failures,
                    last: Box::new(err),
                });
            }

            let pause = self.policy.pause_after(failures);
            debug_assert_delay_capped!(pause, Duration::from_millis(self.policy.backoff_max_ms));
            debug!(writer = self.inner.name(), failures, pause = ?pause, error = %err, "redelivering batch");
            self.redeliveries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(pause).await;
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Wraps `writer` when `policy` is set.
pub(crate) fn with_policy<T: Sync + 'static>(
    writer: Arc<dyn WriterBoxed<T>>,
    policy: Option<&RetryPolicy>,
) -> Arc<dyn WriterBoxed<T>> {
    match policy {
        Some(policy) => Arc::new(RetryingWriter::from_boxed(writer, policy.clone())),
        None => writer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Rejects the first `failures` deliveries with a transport error.
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl Flaky {
        fn new(failures: u32) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    failures,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Writer<u32> for Flaky {
        async fn write(&self, _batch: &[u32]) -> Result<(), WriteError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(WriteError::Transport("broker unavailable".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct Unencodable;

    impl Writer<u32> for Unencodable {
        async fn write(&self, _batch: &[u32]) -> Result<(), WriteError> {
            let err = serde_json::from_str::<u32>("nope").unwrap_err();
            Err(WriteError::Serialization(err))
        }

        fn name(&self) -> &str {
            "unencodable"
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff_ms: 100,
            backoff_max_ms: 300,
        }
    }

    #[test]
    fn test_pause_doubles_up_to_ceiling() {
        let policy = policy(10);
        let pauses: Vec<u64> = (1..=5)
            .map(|n| policy.pause_after(n).as_millis() as u64)
            .collect();
        assert_eq!(pauses, vec![100, 200, 300, 300, 300]);
        assert_eq!(policy.pause_after(200), Duration::from_millis(300));
    }

    #[test]
    fn test_policy_from_partial_yaml() {
        let policy: RetryPolicy = serde_yaml::from_str("attempts: 6\n").unwrap();
        assert_eq!(policy.attempts, 6);
        assert_eq!(policy.backoff_ms, RetryPolicy::default().backoff_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_redelivered() {
        let (flaky, calls) = Flaky::new(2);
        let writer = RetryingWriter::new(flaky, policy(3));

        let started = tokio::time::Instant::now();
        writer.write(&[1, 2]).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(writer.redeliveries(), 2);
        assert_eq!(writer.recovered(), 1);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_keep_last_error() {
        let (flaky, calls) = Flaky::new(u32::MAX);
        let writer = RetryingWriter::new(flaky, policy(2));

        let err = writer.write(&[1]).await.unwrap_err();
        match err {
            WriteError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, WriteError::Transport(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(writer.abandoned(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_redelivers() {
        let (flaky, calls) = Flaky::new(1);
        let writer = RetryingWriter::new(flaky, policy(0));

        assert!(writer.write(&[1]).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(writer.redeliveries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoding_failure_is_not_redelivered() {
        let writer = RetryingWriter::new(Unencodable, policy(5));
        let err = writer.write(&[1]).await.unwrap_err();
        assert!(matches!(err, WriteError::Serialization(_)));
        assert_eq!(writer.redeliveries(), 0);
        assert_eq!(writer.abandoned(), 0);
    }

    #[tokio::test]
    async fn test_with_policy_wraps_only_when_set() {
        let (flaky, calls) = Flaky::new(1);
        let plain: Arc<dyn WriterBoxed<u32>> = Arc::new(flaky);
        assert!(with_policy(Arc::clone(&plain), None).write_boxed(&[1]).await.is_err());

        let quick = RetryPolicy {
            attempts: 2,
            backoff_ms: 1,
            backoff_max_ms: 1,
        };
        let wrapped = with_policy(plain, Some(&quick));
        assert!(wrapped.write_boxed(&[1]).await.is_ok());
        assert_eq!(wrapped.name(), "flaky");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
