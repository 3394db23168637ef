//! Process-wide singleton tying the registry, the two locks, the wait word,
//! the grace-period primitive and the reclamation worker together.
//!
//! # Lock nesting
//! `lifecycle` is always acquired *outside* `drain`, never the reverse.
//! `lifecycle` serializes worker start/stop and registry mutation; `drain`
//! serializes all drains (the worker's and any backpressure self-drain) and
//! all registry reads.

use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, Thread};

use crate::config::Config;
use crate::error::DeferError;
use crate::grace_period::GracePeriod;
use crate::queue::DeferQueue;
use crate::registry::Registry;
use crate::telemetry::debug_event;
use crate::worker::{self, Worker, AWAKE};

struct LifecycleState {
    worker: Option<Worker>,
}

pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) wait_word: AtomicI8,
    /// Handle used to wake the worker from the enqueue fast path. Kept
    /// separate from `lifecycle` so a wake-up never has to contend with
    /// registry mutation.
    worker_thread: Mutex<Option<Thread>>,
    lifecycle: Mutex<LifecycleState>,
    pub(crate) drain: Mutex<Registry>,
    grace_period: GracePeriod,
}

static GLOBAL: OnceLock<Shared> = OnceLock::new();
static CONFIG_OVERRIDE: Mutex<Option<Config>> = Mutex::new(None);

/// Opts the process into a non-default [`Config`] before the first
/// registered thread triggers lazy initialization.
pub(crate) fn init(config: Config) -> Result<(), DeferError> {
    if GLOBAL.get().is_some() {
        return Err(DeferError::AlreadyInitialized);
    }
    let mut slot = CONFIG_OVERRIDE.lock().expect("config override lock poisoned");
    if slot.is_some() {
        return Err(DeferError::AlreadyInitialized);
    }
    *slot = Some(config);
    drop(slot);
    // Force initialization now so a racing register_thread() on another
    // thread cannot beat us to the default.
    let _ = shared();
    Ok(())
}

pub(crate) fn shared() -> &'static Shared {
    GLOBAL.get_or_init(|| {
        let config = CONFIG_OVERRIDE.lock().expect("config override lock poisoned").take().unwrap_or_default();
        Shared {
            wait_word: AtomicI8::new(AWAKE),
            worker_thread: Mutex::new(None),
            lifecycle: Mutex::new(LifecycleState { worker: None }),
            drain: Mutex::new(Registry::with_capacity(config.initial_registry_capacity())),
            grace_period: GracePeriod::new(),
            config,
        }
    })
}

pub(crate) struct Registration {
    pub(crate) queue: std::sync::Arc<DeferQueue>,
    pub(crate) reader_token: usize,
}

pub(crate) fn register_thread() -> Result<Registration, DeferError> {
    let shared = shared();
    let thread_id = thread::current().id();
    let queue = std::sync::Arc::new(DeferQueue::try_new(shared.config.queue_capacity())?);
    let reader_token = shared.grace_period.register_reader();

    let mut lifecycle = shared.lifecycle.lock().expect("lifecycle lock poisoned");
    let added_len = {
        let mut registry = shared.drain.lock().expect("drain lock poisoned");
        // Double-registration by the same OS thread is API misuse (SPEC_FULL.md
        // §7), not a recoverable condition; the thread-local guard in
        // `lib.rs::register_thread` is the primary enforcement, this is a
        // second, debug-only line of defense against the registry's own
        // bookkeeping drifting out of sync with it.
        debug_assert!(
            !registry.iter().any(|e| e.thread_id == thread_id),
            "register_thread called twice by the same thread"
        );
        registry.add(thread_id, std::sync::Arc::clone(&queue), reader_token).map(|()| registry.len())
    };
    let len = match added_len {
        Ok(len) => len,
        Err(err) => {
            drop(lifecycle);
            shared.grace_period.unregister_reader(reader_token);
            return Err(err);
        }
    };
    if len == 1 {
        let worker = Worker::spawn_for(shared);
        *shared.worker_thread.lock().expect("worker thread handle lock poisoned") = Some(worker.thread_handle());
        lifecycle.worker = Some(worker);
    }
    drop(lifecycle);

    debug_event!(?thread_id, "writer thread registered");
    Ok(Registration { queue, reader_token })
}

pub(crate) fn unregister_thread(registration: &Registration) {
    let shared = shared();
    let thread_id = thread::current().id();

    // Drain this writer's own backlog under a grace period before removing
    // it, so no callback is lost.
    barrier_thread(shared, &registration.queue);

    let mut lifecycle = shared.lifecycle.lock().expect("lifecycle lock poisoned");
    let stopped_worker = {
        let mut registry = shared.drain.lock().expect("drain lock poisoned");
        let removed = registry.remove(thread_id);
        debug_assert!(removed.is_some(), "unregister_thread called by a thread that never registered");
        if registry.is_empty() {
            *shared.worker_thread.lock().expect("worker thread handle lock poisoned") = None;
            lifecycle.worker.take()
        } else {
            None
        }
    };
    drop(lifecycle);

    shared.grace_period.unregister_reader(registration.reader_token);

    if let Some(worker) = stopped_worker {
        worker.join();
    }

    debug_event!(?thread_id, "writer thread unregistered");
}

/// Enqueues `fct(arg)` on the calling thread's queue. Caller must already be
/// registered (`registration` is the `Registration` stashed in thread-local
/// storage by `register_thread`).
///
/// # Safety
/// See [`crate::DeferFn`]; `fct` will be invoked with `arg` on another
/// thread at an unspecified later time.
pub(crate) unsafe fn defer(shared: &Shared, registration: &Registration, fct: crate::queue::DeferFn, arg: *mut ()) {
    shared.grace_period.quiesce(registration.reader_token);

    if registration.queue.needs_backpressure_drain() {
        barrier_thread(shared, &registration.queue);
    }

    // SAFETY: `defer`'s own contract requires the caller to be the queue's
    // registered owner thread.
    unsafe {
        registration.queue.push(fct, arg);
    }
    std::sync::atomic::fence(Ordering::SeqCst);
    let worker_thread = shared.worker_thread.lock().expect("worker thread handle lock poisoned");
    if let Some(thread) = worker_thread.as_ref() {
        worker::wake_if_parked_thread(&shared.wait_word, thread);
    }
}

/// Drains every registered queue up to its current head, after at most one
/// grace period. No-op (and skips the grace period entirely) when nothing
/// is pending.
pub(crate) fn barrier(shared: &Shared) {
    let mut registry = shared.drain.lock().expect("drain lock poisoned");

    let mut total = 0u64;
    for entry in registry.iter_mut() {
        entry.last_head = entry.queue.head();
        total += entry.last_head.wrapping_sub(entry.queue.tail());
    }
    if total == 0 {
        return;
    }

    debug_event!(pending = total, "barrier: waiting for a grace period");
    shared.grace_period.synchronize();

    for entry in registry.iter_mut() {
        // SAFETY: we hold `drain`, and `last_head` was snapshotted above,
        // strictly before the `synchronize()` call just completed.
        unsafe {
            entry.queue.drain(entry.last_head);
        }
    }
}

/// Drains exactly one writer's own queue. Used on the backpressure path and
/// at unregistration.
pub(crate) fn barrier_thread(shared: &Shared, queue: &DeferQueue) {
    let _registry_guard = shared.drain.lock().expect("drain lock poisoned");
    let snapshot = queue.head();
    if snapshot == queue.tail() {
        return;
    }
    shared.grace_period.synchronize();
    // SAFETY: `_registry_guard` holds the drain lock for the duration.
    unsafe {
        queue.drain(snapshot);
    }
}
