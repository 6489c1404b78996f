//! # Export manager: when to flush.
//!
//! An [`ExportManager`] couples one [`BatchBuffer`], one [`Keeper`] leaf and
//! one [`Writer`](crate::Writer). It decides *when* a batch leaves the buffer;
//! the writer decides *how* it is delivered.
//!
//! ```text
//! send(entry) ──► buffer.push ──(size ≥ batch_size)──► spawn flush if a permit is free
//!
//! keeper listen:  every `interval` ──► spawn flush if a permit is free
//! keeper after:   flush until empty (bounded), then wait for in-flight flushes
//!
//! flush: acquire permit ─► pop_up_to(batch_size) ─► writer.write(batch)
//!        ─► release every entry (success or not)
//! ```
//!
//! Flushes are plain tokio tasks bounded by a [`Semaphore`]. A flush task is
//! only spawned once it holds a permit, so a stalled writer never piles up
//! waiting tasks; the running flush keeps popping while the buffer is at or
//! above the threshold. Each flush pops only while it holds a permit, so with
//! `max_concurrent_flushes == 1` batches reach the writer in arrival order.
//!
//! ## Shutdown precondition
//!
//! Producers must stop sending before the manager's keeper is stopped. The
//! drain loop is bounded by [`ExportConfig::drain_max_rounds`]; entries still
//! buffered after that are reported and stay in the buffer.

use crate::bucket::BatchBuffer;
use crate::invariants::debug_assert_drain_bounded;
use crate::writer::{Writer, WriterBoxed};
use futures::FutureExt;
use keeper::{CancellationToken, Keeper};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Configuration for one export manager.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Buffer size that triggers an immediate flush, and the maximum batch size.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub interval: Duration,
    /// Maximum flushes writing at the same time.
    pub max_concurrent_flushes: usize,
    /// Upper bound on flush rounds during shutdown drain.
    pub drain_max_rounds: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_millis(350),
            max_concurrent_flushes: 4,
            drain_max_rounds: 10_000,
        }
    }
}

impl ExportConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_concurrent_flushes(mut self, max: usize) -> Self {
        self.max_concurrent_flushes = max.max(1);
        self
    }

    pub fn with_drain_max_rounds(mut self, rounds: usize) -> Self {
        self.drain_max_rounds = rounds.max(1);
        self
    }
}

/// Thread-safe counters for one export manager.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Entries handed to the writer in batches that succeeded
    pub entries_written: AtomicU64,
    /// Batches the writer accepted
    pub batches_written: AtomicU64,
    /// Batches the writer rejected with an error
    pub write_errors: AtomicU64,
    /// Flushes currently inside the writer
    pub inflight_flushes: AtomicU64,
    /// Writer calls that panicked
    pub writer_panics: AtomicU64,
}

impl ExportMetrics {
    pub fn entries_written(&self) -> u64 {
        self.entries_written.load(Ordering::Relaxed)
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn inflight_flushes(&self) -> u64 {
        self.inflight_flushes.load(Ordering::Relaxed)
    }

    pub fn writer_panics(&self) -> u64 {
        self.writer_panics.load(Ordering::Relaxed)
    }

    fn record_success(&self, entries: u64) {
        self.entries_written.fetch_add(entries, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_panic(&self) {
        self.writer_panics.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_inflight(&self) {
        self.inflight_flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_inflight(&self) {
        self.inflight_flushes.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared flush state, owned jointly by the manager and its keeper handlers.
struct Flusher<T> {
    name: String,
    config: ExportConfig,
    buffer: BatchBuffer<T>,
    writer: Arc<dyn WriterBoxed<T>>,
    permits: Arc<Semaphore>,
    permit_count: u32,
    metrics: Arc<ExportMetrics>,
    /// Runtime captured when the keeper starts, for sends from plain threads.
    runtime: Mutex<Option<Handle>>,
}

impl<T: Send + Sync + 'static> Flusher<T> {
    fn schedule(self: &Arc<Self>) {
        let handle = Handle::try_current().ok().or_else(|| {
            self.runtime
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        });
        let Some(handle) = handle else {
            // Picked up by the next tick or the shutdown drain.
            debug!(manager = %self.name, "no runtime for threshold flush");
            return;
        };
        // Every permit busy: a running flush or the next tick takes the backlog.
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return;
        };
        handle.spawn(Arc::clone(self).flush(permit));
    }

    /// Writes batches while the buffer stays at or above the threshold.
    async fn flush(self: Arc<Self>, _permit: OwnedSemaphorePermit) {
        while self.write_batch().await > 0 && self.buffer.count() >= self.config.batch_size {}
    }

    /// Pops and writes one batch. Returns the number of entries popped.
    async fn flush_once(&self) -> usize {
        let Ok(_permit) = self.permits.acquire().await else {
            return 0;
        };
        self.write_batch().await
    }

    /// Caller holds a permit.
    async fn write_batch(&self) -> usize {
        let batch = self.buffer.pop_up_to(self.config.batch_size);
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        self.write(&batch).await;
        // Entries go back to their pool here, whatever the outcome.
        drop(batch);
        count
    }

    async fn write(&self, batch: &[T]) {
        self.metrics.inc_inflight();
        let result = AssertUnwindSafe(self.writer.write_boxed(batch))
            .catch_unwind()
            .await;
        self.metrics.dec_inflight();

        match result {
            Ok(Ok(())) => self.metrics.record_success(batch.len() as u64),
            Ok(Err(e)) => {
                self.metrics.record_error();
                warn!(
                    manager = %self.name,
                    writer = self.writer.name(),
                    entries = batch.len(),
                    error = %e,
                    "write batch failed"
                );
            }
            Err(panic) => {
                self.metrics.record_panic();
                let payload = keeper::PanicPayload::from_any(&*panic);
                error!(
                    manager = %self.name,
                    writer = self.writer.name(),
                    entries = batch.len(),
                    panic = %payload,
                    "writer panicked"
                );
            }
        }
    }

    async fn tick_until(self: Arc<Self>, token: CancellationToken) {
        *self.runtime.lock().unwrap_or_else(PoisonError::into_inner) = Some(Handle::current());

        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.schedule(),
            }
        }
    }

    async fn drain(&self) {
        let max = self.config.drain_max_rounds;
        let mut drained = 0;
        let mut round = 0;
        while round < max && !self.buffer.is_empty() {
            debug_assert_drain_bounded!(round, max);
            drained += self.flush_once().await;
            round += 1;
        }

        // Wait for flushes spawned before the drain to leave the writer.
        drop(self.permits.acquire_many(self.permit_count).await);

        let left = self.buffer.count();
        if left > 0 {
            warn!(
                manager = %self.name,
                rounds = round,
                entries = left,
                "drain budget exhausted, entries left buffered"
            );
        } else {
            debug!(manager = %self.name, entries = drained, "drained");
        }
    }
}

/// Batched, supervised export of entries of type `T` to one writer.
pub struct ExportManager<T> {
    flusher: Arc<Flusher<T>>,
    keeper: Arc<Keeper>,
}

impl<T: Send + Sync + 'static> ExportManager<T> {
    /// Creates a manager whose keeper is named `name`.
    pub fn new<W>(name: impl Into<String>, config: ExportConfig, writer: W) -> Self
    where
        W: Writer<T> + 'static,
    {
        Self::with_boxed(name, config, Arc::new(writer))
    }

    /// Creates a manager around an already type-erased writer.
    pub fn with_boxed(
        name: impl Into<String>,
        config: ExportConfig,
        writer: Arc<dyn WriterBoxed<T>>,
    ) -> Self {
        let name = name.into();
        let permit_count = u32::try_from(config.max_concurrent_flushes.max(1)).unwrap_or(u32::MAX);
        let flusher = Arc::new(Flusher {
            name: name.clone(),
            buffer: BatchBuffer::with_capacity(config.batch_size),
            config,
            writer,
            permits: Arc::new(Semaphore::new(permit_count as usize)),
            permit_count,
            metrics: Arc::new(ExportMetrics::default()),
            runtime: Mutex::new(None),
        });

        let keeper = Keeper::new(name);
        {
            let listen = Arc::clone(&flusher);
            let after = Arc::clone(&flusher);
            keeper
                .listen(move |token| {
                    let flusher = Arc::clone(&listen);
                    async move {
                        flusher.tick_until(token).await;
                        false
                    }
                })
                .after(move |_| {
                    let flusher = Arc::clone(&after);
                    async move {
                        flusher.drain().await;
                        false
                    }
                });
        }

        Self { flusher, keeper }
    }

    /// Buffers `entry`; schedules an asynchronous flush once the buffer
    /// reaches the batch size. Never blocks on I/O.
    pub fn send(&self, entry: T) {
        let size = self.flusher.buffer.push(entry);
        if size >= self.flusher.config.batch_size {
            self.flusher.schedule();
        }
    }

    /// Flushes one batch now. Returns the number of entries written.
    pub async fn flush(&self) -> usize {
        self.flusher.flush_once().await
    }

    /// Number of buffered entries.
    pub fn pending(&self) -> usize {
        self.flusher.buffer.count()
    }

    pub fn name(&self) -> &str {
        &self.flusher.name
    }

    pub fn config(&self) -> &ExportConfig {
        &self.flusher.config
    }

    pub fn metrics(&self) -> &Arc<ExportMetrics> {
        &self.flusher.metrics
    }

    /// The keeper to register under a parent, or to run directly.
    pub fn keeper(&self) -> &Arc<Keeper> {
        &self.keeper
    }
}

impl<T> fmt::Debug for ExportManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportManager")
            .field("name", &self.flusher.name)
            .field("pending", &self.flusher.buffer.count())
            .field("writer", &self.flusher.writer.name())
            .finish()
    }
}
