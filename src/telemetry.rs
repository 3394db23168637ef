//! Feature-gated structured logging.
//!
//! The teacher crate this is built from carries no logging dependency at
//! all; adjacent examples in the same retrieval pack that solve similarly
//! low-level concurrency problems uniformly reach for `tracing`, gated
//! behind an optional feature so the hot enqueue path pays nothing when
//! logging is compiled out. These two macros are the only place that
//! distinction lives — call sites elsewhere just write `debug_event!`/
//! `trace_event!` and don't care whether the feature is on.

#[cfg(feature = "tracing")]
macro_rules! debug_event {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! debug_event {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! trace_event {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) };
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_event {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_event;
pub(crate) use trace_event;
