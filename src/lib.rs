//! Deferred reclamation subsystem for a userspace RCU library.
//!
//! Writer threads [`register_thread`], then [`defer`] callbacks (typically
//! frees of objects that may still be visible to concurrent readers).
//! Deferred callbacks run only after a grace period has elapsed, either on
//! a dedicated background reclamation worker or, under backpressure, on the
//! enqueuing thread itself. [`barrier`] and [`barrier_thread`] force a
//! synchronous drain when a caller needs flush semantics rather than
//! eventual execution.
//!
//! ```no_run
//! # unsafe fn free_i32(p: *mut ()) { drop(unsafe { Box::from_raw(p.cast::<i32>()) }); }
//! rcu_defer::register_thread().unwrap();
//!
//! let boxed = Box::into_raw(Box::new(42i32));
//! unsafe { rcu_defer::defer(free_i32, boxed.cast::<()>()) };
//!
//! rcu_defer::barrier_thread();
//! rcu_defer::unregister_thread();
//! ```

mod backoff;
mod config;
mod error;
mod global;
mod grace_period;
mod invariants;
mod queue;
mod registry;
mod telemetry;
mod worker;

pub use config::Config;
pub use error::DeferError;
pub use queue::DeferFn;

use std::cell::RefCell;

thread_local! {
    static LOCAL: RefCell<Option<global::Registration>> = const { RefCell::new(None) };
}

/// Opts the process into a non-default [`Config`].
///
/// Must be called before the first [`register_thread`] call on any thread;
/// if the subsystem has already lazily initialized itself with
/// [`Config::default`], this returns [`DeferError::AlreadyInitialized`].
pub fn init(config: Config) -> Result<(), DeferError> {
    global::init(config)
}

/// Registers the calling thread as a writer.
///
/// Must be called at most once per thread before that thread calls
/// [`defer`], [`barrier_thread`], or [`unregister_thread`]. Starts the
/// background reclamation worker if this is the first registered thread in
/// the process.
///
/// # Panics
/// Panics if the calling thread is already registered. Double-registration
/// is API misuse, not a recoverable condition (SPEC_FULL.md §7), so unlike
/// [`DeferError::RegistryExhausted`] it is asserted rather than returned.
pub fn register_thread() -> Result<(), DeferError> {
    assert!(
        LOCAL.with(|cell| cell.borrow().is_none()),
        "register_thread called twice by the same thread"
    );
    let registration = global::register_thread()?;
    LOCAL.with(|cell| *cell.borrow_mut() = Some(registration));
    Ok(())
}

/// Unregisters the calling thread.
///
/// Drains every callback still queued for this thread (after one grace
/// period) before removing its registry entry. Stops the background worker
/// if this was the last registered thread.
///
/// # Panics
/// Panics if the calling thread never called [`register_thread`].
pub fn unregister_thread() {
    let registration = LOCAL
        .with(|cell| cell.borrow_mut().take())
        .expect("unregister_thread called by a thread that never registered");
    global::unregister_thread(&registration);
}

/// Schedules `fct(arg)` to run once the current grace period has elapsed.
///
/// # Safety
/// `fct` will be invoked with `arg` at an unspecified later time, typically
/// on the reclamation worker thread rather than the caller. The caller must
/// ensure `arg` remains valid and that invoking `fct(arg)` at that later
/// time is sound.
///
/// # Panics
/// Panics if the calling thread never called [`register_thread`].
pub unsafe fn defer(fct: DeferFn, arg: *mut ()) {
    LOCAL.with(|cell| {
        let slot = cell.borrow();
        let registration = slot.as_ref().expect("defer called by a thread that never registered");
        // SAFETY: forwarding the caller's own safety obligation.
        unsafe { global::defer(global::shared(), registration, fct, arg) };
    });
}

/// Drains every registered writer's queue up to its current head, after at
/// most one grace period. Skips the grace period entirely if nothing is
/// pending. Safe to call from any thread, registered or not.
pub fn barrier() {
    global::barrier(global::shared());
}

/// Drains the calling thread's own queue, after at most one grace period.
///
/// # Panics
/// Panics if the calling thread never called [`register_thread`].
pub fn barrier_thread() {
    LOCAL.with(|cell| {
        let slot = cell.borrow();
        let registration = slot.as_ref().expect("barrier_thread called by a thread that never registered");
        global::barrier_thread(global::shared(), &registration.queue);
    });
}

/// Schedules `value`'s `Drop` glue to run after the current grace period.
///
/// This is the overwhelmingly common use of [`defer`] in practice (freeing
/// an object once no reader can still see it), wrapped so callers don't
/// have to hand-write an `unsafe extern "C" fn` shim for every type they
/// defer.
///
/// # Panics
/// Panics if the calling thread never called [`register_thread`].
pub fn defer_drop<T>(value: Box<T>) {
    unsafe fn run_drop<T>(ptr: *mut ()) {
        // SAFETY: `ptr` was produced by `Box::into_raw` on a `Box<T>` just
        // below, and `defer` guarantees this runs at most once.
        drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
    }

    let raw = Box::into_raw(value).cast::<()>();
    // SAFETY: `run_drop::<T>` reconstructs exactly the box we just leaked.
    unsafe { defer(run_drop::<T>, raw) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn register_defer_barrier_unregister_round_trip() {
        register_thread().unwrap();

        static COUNT: AtomicUsize = AtomicUsize::new(0);
        unsafe fn bump(_: *mut ()) {
            COUNT.fetch_add(1, Ordering::SeqCst);
        }

        COUNT.store(0, Ordering::SeqCst);
        for _ in 0..10 {
            unsafe { defer(bump, std::ptr::null_mut()) };
        }
        barrier_thread();
        assert_eq!(COUNT.load(Ordering::SeqCst), 10);

        unregister_thread();
    }

    #[test]
    fn defer_drop_runs_the_destructor() {
        register_thread().unwrap();

        let flag = Arc::new(AtomicUsize::new(0));
        struct MarkOnDrop(Arc<AtomicUsize>);
        impl Drop for MarkOnDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        defer_drop(Box::new(MarkOnDrop(Arc::clone(&flag))));
        barrier_thread();
        assert_eq!(flag.load(Ordering::SeqCst), 1);

        unregister_thread();
    }

    #[test]
    #[should_panic(expected = "register_thread called twice")]
    fn double_register_panics() {
        register_thread().unwrap();
        let _ = register_thread();
    }

    #[test]
    fn barrier_with_no_registered_threads_is_a_no_op() {
        barrier();
    }
}
