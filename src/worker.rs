//! The background reclamation worker.
//!
//! A single thread that parks when there is nothing to do, wakes when an
//! enqueue observes it parked, waits briefly to let more callbacks batch up,
//! then runs a global [`crate::global::barrier`] pass.
//!
//! The spec this crate implements describes the wake signal as a futex
//! word: a writer decrements it to a sentinel before sleeping, rechecks
//! total pending work under a full fence to close the lost-wakeup gap, and
//! any enqueue that observes the sentinel resets it and wakes the worker.
//! `std::thread::park`/`Thread::unpark` already provide that exact
//! guarantee (a wake that arrives before the matching park is never lost)
//! via their own internal token, so this implementation uses them as the
//! actual blocking primitive instead of a raw platform futex syscall,
//! keeping the crate portable. The explicit `AtomicI8` wait word is kept
//! alongside them anyway because it lets `barrier()` and tests observe
//! "is the worker currently idle" without reaching into parking internals.

use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};

use crate::global::Shared;
use crate::telemetry::trace_event;

pub(crate) const PARKED: i8 = -1;
pub(crate) const AWAKE: i8 = 0;

pub(crate) struct Worker {
    handle: JoinHandle<()>,
    thread: Thread,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn spawn_for(shared: &'static Shared) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("rcu-defer-worker".to_string())
            .spawn(move || run(shared, &shutdown_for_thread))
            .expect("failed to spawn reclamation worker thread");
        let thread = handle.thread().clone();
        Self { handle, thread, shutdown }
    }

    pub(crate) fn thread_handle(&self) -> Thread {
        self.thread.clone()
    }

    pub(crate) fn join(self) {
        self.shutdown.store(true, Ordering::Release);
        self.thread.unpark();
        let _ = self.handle.join();
    }
}

/// Resets the wait word and wakes `thread` if it had parked. Called by
/// `defer()` after publishing a new `head`. Harmless to call when the
/// worker is already awake.
pub(crate) fn wake_if_parked_thread(wait_word: &AtomicI8, thread: &Thread) {
    if wait_word.swap(AWAKE, Ordering::SeqCst) == PARKED {
        thread.unpark();
    }
}

fn run(shared: &Shared, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        shared.wait_word.store(PARKED, Ordering::SeqCst);
        std::sync::atomic::fence(Ordering::SeqCst);

        let pending = {
            let registry = shared.drain.lock().expect("drain lock poisoned");
            registry.total_pending()
        };
        if pending == 0 && !shutdown.load(Ordering::Acquire) {
            thread::park();
        }
        shared.wait_word.store(AWAKE, Ordering::SeqCst);

        if shutdown.load(Ordering::Acquire) {
            return;
        }

        trace_event!("worker woke, batching before drain");
        thread::sleep(shared.config.worker_batch_delay());
        crate::global::barrier(shared);
    }
}
