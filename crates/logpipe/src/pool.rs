//! Entry pooling.
//!
//! Entries are recycled through a free list with **move-on-acquire,
//! clear-on-release** discipline:
//!
//! - [`Pool::acquire`] moves an instance out of the free list (or allocates a
//!   fresh one) and wraps it in a [`Pooled`] handle that owns it exclusively.
//! - Dropping the [`Pooled`] handle resets the instance and moves it back.
//!
//! Because `Pooled<T>` is not `Clone` and release happens in `Drop`, an entry
//! can be enqueued in at most one place and can never be read after release.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Clears an instance before it goes back to the pool.
///
/// After `reset`, the instance must be indistinguishable from
/// `T::default()` to its next user (capacity may be retained).
pub trait Reset {
    fn reset(&mut self);
}

/// Counters for pool behavior.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    allocated: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl PoolMetrics {
    /// Instances created because the free list was empty.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Acquisitions served from the free list.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Released instances dropped because the free list was full.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

struct PoolInner<T> {
    free: Mutex<Vec<Box<T>>>,
    max_idle: usize,
    metrics: PoolMetrics,
}

impl<T> PoolInner<T> {
    fn put(&self, value: Box<T>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(value);
        } else {
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A shared free list of `T`.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Reset + Default> Pool<T> {
    /// Default free-list cap.
    pub const DEFAULT_MAX_IDLE: usize = 4096;

    pub fn new() -> Self {
        Self::with_max_idle(Self::DEFAULT_MAX_IDLE)
    }

    /// Creates a pool that keeps at most `max_idle` released instances.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                max_idle,
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Takes an instance out of the pool, allocating if the pool is empty.
    pub fn acquire(&self) -> Pooled<T> {
        let reused = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let value = match reused {
            Some(value) => {
                self.inner.metrics.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.inner.metrics.allocated.fetch_add(1, Ordering::Relaxed);
                Box::default()
            }
        };

        Pooled {
            value: Some(value),
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Number of idle instances.
    pub fn idle(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }
}

impl<T: Reset + Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle to a pooled instance; returns it to the pool on drop.
pub struct Pooled<T: Reset> {
    value: Option<Box<T>>,
    pool: Weak<PoolInner<T>>,
}

impl<T: Reset> Pooled<T> {
    /// Wraps a value that does not belong to any pool.
    ///
    /// Dropping it simply frees it.
    pub fn detached(value: T) -> Self {
        Self {
            value: Some(Box::new(value)),
            pool: Weak::new(),
        }
    }

    /// Releases the instance back to its pool.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(self) {}
}

impl<T: Reset> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `value` is only taken in `drop`.
        self.value.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reset> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut value) = self.value.take() {
            value.reset();
            if let Some(pool) = self.pool.upgrade() {
                pool.put(value);
            }
        }
    }
}

impl<T: Reset + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
