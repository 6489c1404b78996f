//! Debug assertion macros for buffer and export invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`); release builds
//! compile them away.

// =============================================================================
// Buffer conservation
// =============================================================================

/// Assert that a pop neither lost nor duplicated entries.
///
/// **Invariant**: `len_before == popped + len_after`
///
/// Used in: `BatchBuffer::pop_up_to()`
macro_rules! debug_assert_pop_conserves {
    ($before:expr, $popped:expr, $after:expr) => {
        debug_assert!(
            $before == $popped + $after,
            "buffer conservation violated: {} before, {} popped, {} left",
            $before,
            $popped,
            $after
        )
    };
}

// =============================================================================
// Pop bound
// =============================================================================

/// Assert that a pop removed exactly `min(n, len)` entries.
///
/// **Invariant**: `popped == min(requested, len_before)`
///
/// Used in: `BatchBuffer::pop_up_to()`
macro_rules! debug_assert_pop_bounded {
    ($popped:expr, $requested:expr, $before:expr) => {
        debug_assert!(
            $popped == ::std::cmp::min($requested, $before),
            "pop bound violated: popped {} with n={} and {} buffered",
            $popped,
            $requested,
            $before
        )
    };
}

// =============================================================================
// Drain bound
// =============================================================================

/// Assert that the shutdown drain stays within its round budget.
///
/// **Invariant**: `round < drain_max_rounds`
///
/// Used in: `ExportManager` after handler
macro_rules! debug_assert_drain_bounded {
    ($round:expr, $max:expr) => {
        debug_assert!(
            $round < $max,
            "drain bound violated: round {} with budget {}",
            $round,
            $max
        )
    };
}

// =============================================================================
// Backoff cap
// =============================================================================

/// Assert that a retry delay never exceeds the configured cap.
///
/// Used in: `RetryingWriter::write()`
macro_rules! debug_assert_delay_capped {
    ($delay:expr, $max:expr) => {
        debug_assert!(
            $delay <= $max,
            "retry pause {:?} exceeds backoff cap {:?}",
            $delay,
            $max
        )
    };
}

pub(crate) use debug_assert_delay_capped;
pub(crate) use debug_assert_drain_bounded;
pub(crate) use debug_assert_pop_bounded;
pub(crate) use debug_assert_pop_conserves;
