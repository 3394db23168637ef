//! Debug assertion macros for the defer queue and registry invariants.
//!
//! These macros provide runtime checks for the invariants documented in
//! `SPEC_FULL.md` §8. They are only active in debug builds
//! (`#[cfg(debug_assertions)]`), so there is zero overhead in release builds.

// =============================================================================
// INV-BOUND-01: Bounded Count
// =============================================================================

/// Assert that pending count does not exceed capacity.
///
/// **Invariant**: `0 ≤ (head - tail) ≤ capacity`
///
/// Used in: `DeferQueue::push()` before writing the new head.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "INV-BOUND-01 violated: pending count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// INV-MONO-02: Monotonic Progress
// =============================================================================

/// Assert that a sequence number only increases.
///
/// **Invariant**: `new_value ≥ old_value`
///
/// Used in: `DeferQueue::push()` for head, `DeferQueue::drain()` for tail.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-MONO-02 violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-DRAIN-03: Drained Range Is Read Exactly Once
// =============================================================================

/// Assert that a drain walk stays within `[tail, head)`.
///
/// **Invariant**: a slot at sequence `pos` is only read when `tail ≤ pos < head`.
///
/// Used in: `DeferQueue::drain()` before reading a slot.
macro_rules! debug_assert_in_drain_range {
    ($pos:expr, $tail:expr, $head:expr) => {
        debug_assert!(
            $pos >= $tail && $pos < $head,
            "INV-DRAIN-03 violated: reading slot at seq {} outside drain range [{}, {})",
            $pos,
            $tail,
            $head
        )
    };
}

// =============================================================================
// INV-REG-05: Registry Membership Is Unique
// =============================================================================

/// Assert that a thread id appears in the registry at most once.
///
/// **Invariant**: no two entries share a `ThreadId`.
///
/// Used in: `Registry::add()`, right after the caller's own duplicate check.
macro_rules! debug_assert_unique_member {
    ($count_matching:expr) => {
        debug_assert!($count_matching <= 1, "INV-REG-05 violated: duplicate registry entry for one thread")
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_in_drain_range;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_unique_member;
