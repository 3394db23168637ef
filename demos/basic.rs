use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[cfg(feature = "tracing")]
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}
#[cfg(not(feature = "tracing"))]
fn init_tracing() {}

fn main() {
    init_tracing();

    println!("rcu-defer Basic Example");
    println!("=======================\n");

    const N_WRITERS: usize = 4;
    const DEFERS_PER_WRITER: usize = 1_000_000;

    println!("Configuration:");
    println!("  Writers: {}", N_WRITERS);
    println!("  Defers per writer: {}", DEFERS_PER_WRITER);
    println!("  Total deferred calls: {}\n", N_WRITERS * DEFERS_PER_WRITER);

    static RECLAIMED: AtomicU64 = AtomicU64::new(0);
    unsafe fn reclaim_one(_: *mut ()) {
        RECLAIMED.fetch_add(1, Ordering::Relaxed);
    }

    let start = Instant::now();

    let mut handles = Vec::new();
    for id in 0..N_WRITERS {
        let handle = thread::spawn(move || {
            rcu_defer::register_thread().expect("registration should not fail for a fresh thread");
            for _ in 0..DEFERS_PER_WRITER {
                // SAFETY: `reclaim_one` only ever touches the static counter
                // above; `arg` is never dereferenced.
                unsafe { rcu_defer::defer(reclaim_one, std::ptr::null_mut()) };
            }
            rcu_defer::unregister_thread();
            println!("Writer {} finished", id);
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Every writer's unregister_thread() already drained its own backlog,
    // but a process-wide barrier shows the idiom for callers who just want
    // "everything deferred so far has run" without tracking threads.
    rcu_defer::barrier();

    let duration = start.elapsed();
    let total = RECLAIMED.load(Ordering::SeqCst);

    println!("\nResults:");
    println!("  Callbacks reclaimed: {}", total);
    println!("  Duration: {:.2?}", duration);
    println!(
        "  Throughput: {:.2} million defers/sec",
        total as f64 / duration.as_secs_f64() / 1_000_000.0
    );

    // A typed struct deferred via defer_drop, the path almost every real
    // caller uses instead of hand-writing an extern "C" shim.
    rcu_defer::register_thread().unwrap();
    let freed = Arc::new(AtomicU64::new(0));
    struct Payload(Arc<AtomicU64>);
    impl Drop for Payload {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    rcu_defer::defer_drop(Box::new(Payload(Arc::clone(&freed))));
    rcu_defer::barrier_thread();
    println!("  defer_drop ran destructor: {}", freed.load(Ordering::SeqCst) == 1);
    rcu_defer::unregister_thread();
}
