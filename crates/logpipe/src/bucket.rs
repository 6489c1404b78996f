//! Thread-safe FIFO-drain buffer of entries awaiting flush.
//!
//! Producers [`add`](BatchBuffer::add) under a short-held lock; the flush
//! path removes the oldest entries with [`pop_up_to`](BatchBuffer::pop_up_to).
//! Removal is atomic with respect to concurrent adds: a caller never sees a
//! partially removed batch.
//!
//! The buffer has no flush policy of its own. `add` returns the new size and
//! the caller decides whether to flush.

use crate::invariants::{debug_assert_pop_bounded, debug_assert_pop_conserves};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct BatchBuffer<T> {
    items: Mutex<Vec<T>>,
}

impl<T> BatchBuffer<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Creates a buffer with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `entries` in order and returns the new size.
    pub fn add<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut items = self.lock();
        items.extend(entries);
        items.len()
    }

    /// Appends one entry and returns the new size.
    pub fn push(&self, entry: T) -> usize {
        let mut items = self.lock();
        items.push(entry);
        items.len()
    }

    /// Removes the oldest `min(n, len)` entries in arrival order.
    ///
    /// When `n` covers the whole buffer the backing storage is handed out
    /// wholesale and replaced with an empty one. An empty result means there
    /// was nothing to do.
    pub fn pop_up_to(&self, n: usize) -> Vec<T> {
        if n == 0 {
            return Vec::new();
        }

        let mut items = self.lock();
        let before = items.len();
        let popped = if n >= before {
            std::mem::take(&mut *items)
        } else {
            let rest = items.split_off(n);
            std::mem::replace(&mut *items, rest)
        };

        debug_assert_pop_bounded!(popped.len(), n, before);
        debug_assert_pop_conserves!(before, popped.len(), items.len());
        popped
    }

    /// Current number of buffered entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for BatchBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BatchBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchBuffer")
            .field("count", &self.count())
            .finish()
    }
}
