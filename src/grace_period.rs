//! A minimal quiescent-state-based `synchronize_rcu()`.
//!
//! The defer subsystem treats grace-period detection as an external
//! collaborator: something else in a full RCU implementation decides when
//! every reader that could have observed a stale pointer has passed through
//! a quiescent state. This module supplies just enough of that collaborator
//! to make the rest of the crate runnable and testable end to end. It is
//! deliberately small; a production deployment of the defer subsystem would
//! swap in a complete reader-side implementation behind the same function
//! signature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backoff::Backoff;

/// One entry per thread that has ever called [`GracePeriod::quiesce`] or
/// registered as an online reader.
struct ReaderState {
    online: bool,
    observed_generation: u64,
}

pub(crate) struct GracePeriod {
    generation: AtomicU64,
    readers: Mutex<Vec<ReaderState>>,
}

impl GracePeriod {
    pub(crate) fn new() -> Self {
        Self { generation: AtomicU64::new(0), readers: Mutex::new(Vec::new()) }
    }

    /// Registers the calling context as an online reader. The defer
    /// subsystem calls this once per registered writer thread, since a
    /// writer thread may also be a reader of the data it is about to
    /// reclaim.
    pub(crate) fn register_reader(&self) -> usize {
        let mut readers = self.readers.lock().expect("grace period reader list poisoned");
        let generation = self.generation.load(Ordering::Acquire);
        readers.push(ReaderState { online: true, observed_generation: generation });
        readers.len() - 1
    }

    pub(crate) fn unregister_reader(&self, token: usize) {
        let mut readers = self.readers.lock().expect("grace period reader list poisoned");
        if let Some(r) = readers.get_mut(token) {
            r.online = false;
        }
    }

    /// Reports that the reader identified by `token` is not currently inside
    /// a read-side critical section. Called on every entry into the defer
    /// subsystem's public operations, which is enough for the common case
    /// (no long-lived read-side critical sections spanning a `defer` call)
    /// to make `synchronize_rcu` return promptly.
    pub(crate) fn quiesce(&self, token: usize) {
        let generation = self.generation.load(Ordering::Acquire);
        let mut readers = self.readers.lock().expect("grace period reader list poisoned");
        if let Some(r) = readers.get_mut(token) {
            r.observed_generation = generation;
        }
    }

    /// Blocks until every online reader has observed a generation at least
    /// as new as the one this call bumps to.
    pub(crate) fn synchronize(&self) {
        let target = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut backoff = Backoff::new();
        loop {
            let quiescent = {
                let readers = self.readers.lock().expect("grace period reader list poisoned");
                readers.iter().all(|r| !r.online || r.observed_generation >= target)
            };
            if quiescent {
                return;
            }
            backoff.snooze();
        }
    }
}
