//! Miri-targeted tests for the unsafe code in the defer queue's slot
//! encoding, the `UnsafeCell` bookkeeping in `DeferQueue`/`GracePeriod`, and
//! the `Box::into_raw`/`Box::from_raw` round-trip in `defer_drop`.
//!
//! Run with: `cargo +nightly miri test --test miri_tests`
//!
//! Miri is an interpreter for Rust's MIR that catches undefined behavior —
//! out-of-bounds slot access, use of uninitialized memory, a `transmute`d
//! function pointer that doesn't actually round-trip, a `Drop` glue pointer
//! reconstructed incorrectly — that a normal test run would not surface on
//! most targets even when present.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The defer subsystem keeps one process-wide registry; serialize every
/// test in this binary so their register/unregister pairs never overlap.
static SERIAL: Mutex<()> = Mutex::new(());

unsafe fn noop(_: *mut ()) {}

#[test]
fn miri_single_callback_round_trip() {
    let _guard = SERIAL.lock().unwrap();
    rcu_defer::register_thread().unwrap();

    static SEEN: AtomicUsize = AtomicUsize::new(0);
    unsafe fn record(arg: *mut ()) {
        SEEN.fetch_add(arg as usize, Ordering::SeqCst);
    }
    SEEN.store(0, Ordering::SeqCst);

    unsafe { rcu_defer::defer(record, 7 as *mut ()) };
    rcu_defer::barrier_thread();
    assert_eq!(SEEN.load(Ordering::SeqCst), 7);

    rcu_defer::unregister_thread();
}

/// Exercises the slot-encoding escape path: an argument whose bit pattern
/// equals the reserved sentinel, which must still decode to exactly that
/// value rather than being mistaken for a function-pointer escape marker.
#[test]
fn miri_sentinel_valued_argument_escapes() {
    let _guard = SERIAL.lock().unwrap();
    rcu_defer::register_thread().unwrap();

    static SEEN: AtomicUsize = AtomicUsize::new(0);
    unsafe fn record(arg: *mut ()) {
        SEEN.store(arg as usize, Ordering::SeqCst);
    }
    SEEN.store(0, Ordering::SeqCst);

    unsafe { rcu_defer::defer(record, usize::MAX as *mut ()) };
    rcu_defer::barrier_thread();
    assert_eq!(SEEN.load(Ordering::SeqCst), usize::MAX);

    rcu_defer::unregister_thread();
}

/// Alternating callbacks force the encoder to re-tag the function pointer
/// on every other push rather than eliding it, exercising both halves of
/// the `last_fct_in`/`last_fct_out` elision logic under Miri's pointer
/// provenance checks.
#[test]
fn miri_alternating_callbacks() {
    let _guard = SERIAL.lock().unwrap();
    rcu_defer::register_thread().unwrap();

    static SEEN: AtomicUsize = AtomicUsize::new(0);
    unsafe fn add(arg: *mut ()) {
        SEEN.fetch_add(arg as usize, Ordering::SeqCst);
    }
    unsafe fn sub(arg: *mut ()) {
        SEEN.fetch_sub(arg as usize, Ordering::SeqCst);
    }
    SEEN.store(100, Ordering::SeqCst);

    for i in 1..=6usize {
        if i % 2 == 0 {
            unsafe { rcu_defer::defer(add, i as *mut ()) };
        } else {
            unsafe { rcu_defer::defer(sub, i as *mut ()) };
        }
    }
    rcu_defer::barrier_thread();
    // +2+4+6 -1-3-5 = 12 - 9 = 3
    assert_eq!(SEEN.load(Ordering::SeqCst), 103);

    rcu_defer::unregister_thread();
}

/// `defer_drop` reconstructs a `Box<T>` from a raw pointer produced by
/// `Box::into_raw`; Miri's stacked-borrows checker would flag a
/// mismatched type, a double free, or a leaked allocation here.
#[test]
fn miri_defer_drop_reconstructs_the_box_exactly_once() {
    let _guard = SERIAL.lock().unwrap();
    rcu_defer::register_thread().unwrap();

    let drops = Arc::new(AtomicUsize::new(0));
    struct CountsDrops(Arc<AtomicUsize>, Vec<u8>);
    impl Drop for CountsDrops {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    rcu_defer::defer_drop(Box::new(CountsDrops(Arc::clone(&drops), vec![1, 2, 3, 4])));
    rcu_defer::barrier_thread();
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    rcu_defer::unregister_thread();
}

/// A thread that registers, defers nothing, and unregisters immediately
/// must not touch any slot it never wrote.
#[test]
fn miri_empty_queue_unregister_touches_nothing() {
    let _guard = SERIAL.lock().unwrap();
    rcu_defer::register_thread().unwrap();
    rcu_defer::unregister_thread();
}

/// Two writers interleaving defers and a third thread calling the
/// process-wide `barrier()` exercises cross-thread access to both queues'
/// slot buffers under Miri's data-race detector.
#[test]
fn miri_two_writers_one_barrier_caller() {
    let _guard = SERIAL.lock().unwrap();

    let t1 = std::thread::spawn(|| {
        rcu_defer::register_thread().unwrap();
        for _ in 0..4 {
            unsafe { rcu_defer::defer(noop, std::ptr::null_mut()) };
        }
        rcu_defer::unregister_thread();
    });
    let t2 = std::thread::spawn(|| {
        rcu_defer::register_thread().unwrap();
        for _ in 0..4 {
            unsafe { rcu_defer::defer(noop, std::ptr::null_mut()) };
        }
        rcu_defer::unregister_thread();
    });

    t1.join().unwrap();
    t2.join().unwrap();
    rcu_defer::barrier();
}
