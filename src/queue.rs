//! Per-writer deferred-call queue.
//!
//! Each registered thread owns exactly one [`DeferQueue`]. The owning thread
//! is the only writer (`push`); a thread holding the global drain lock (the
//! reclamation worker, or the owner itself under backpressure) is the only
//! reader (`drain`). The two sides communicate through `head`/`tail` with
//! acquire/release pairing; the slot buffer itself carries no per-slot
//! synchronization because the single `head` release store already
//! publishes every slot written before it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::DeferError;
use crate::invariants::{debug_assert_bounded_count, debug_assert_in_drain_range, debug_assert_monotonic};

/// A deferred callback: a function pointer plus the one pointer-sized
/// argument it will be invoked with once a grace period has elapsed.
///
/// # Safety
/// `fct` is invoked as `fct(arg)` on a thread other than the one that
/// enqueued it (ordinarily the reclamation worker). Callers are responsible
/// for ensuring `arg` remains valid until then.
pub type DeferFn = unsafe fn(*mut ());

/// Low bit of a slot, set when the slot holds a tagged function pointer.
/// Relies on function-pointer alignment guaranteeing the low bit is
/// otherwise always zero, which holds on every mainstream target.
const FCT_TAG_BIT: usize = 1;

/// Reserved value meaning "the next slot is a raw, untagged function
/// pointer" (used when a function pointer's low bit is already set, which
/// cannot happen for `fn` pointers but is kept as a defensive escape, or
/// when an argument collides with this sentinel or with the tag bit).
///
/// `usize::MAX` is never a legal function pointer or a legal argument in
/// any realistic use of this crate, so it is safe to reserve.
pub(crate) const SENTINEL: usize = usize::MAX;

/// Worst case slots a single `push` can consume: sentinel + raw fct (for a
/// tag-colliding function pointer) followed by sentinel + fct + arg (for a
/// tag-colliding argument). Queues reserve this many slots of headroom so a
/// single `push` can never overrun the buffer.
pub(crate) const MAX_SLOTS_PER_PUSH: u64 = 5;

pub(crate) struct DeferQueue {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    buffer: Box<[UnsafeCell<usize>]>,
    mask: u64,
    /// Last function pointer written by the owner. Owner-thread-confined:
    /// only `push` (called exclusively by the owning thread) touches it.
    last_fct_in: UnsafeCell<usize>,
    /// Last function pointer decoded by a drainer. Confined to the
    /// critical section protected by the process-wide drain lock.
    last_fct_out: UnsafeCell<usize>,
}

// SAFETY: `last_fct_in` is written only by the owning thread (the contract
// of `push`); `last_fct_out` and the slot buffer are written only by a
// thread holding the drain lock, and read back only after the `head`
// release store / acquire load pair has established happens-before for
// everything up to the observed head. The registry hands out `&DeferQueue`
// across threads under exactly this discipline.
unsafe impl Sync for DeferQueue {}
unsafe impl Send for DeferQueue {}

impl DeferQueue {
    /// Fallible constructor used by `register_thread`: reports allocation
    /// exhaustion as a typed error rather than aborting the process.
    pub(crate) fn try_new(capacity: usize) -> Result<Self, DeferError> {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        assert!(capacity as u64 > MAX_SLOTS_PER_PUSH, "queue capacity too small");
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| DeferError::QueueAllocationFailed { requested: capacity })?;
        buffer.resize_with(capacity, || UnsafeCell::new(0usize));
        Ok(Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            buffer: buffer.into_boxed_slice(),
            mask: (capacity - 1) as u64,
            last_fct_in: UnsafeCell::new(0),
            last_fct_out: UnsafeCell::new(0),
        })
    }

    #[cfg(test)]
    fn new(capacity: usize) -> Self {
        Self::try_new(capacity).expect("test allocation should not fail")
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.mask + 1
    }

    /// Snapshot of `head`. Safe to call from any thread; used by drainers to
    /// fix the upper bound of a drain pass before the grace period.
    pub(crate) fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    pub(crate) fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    pub(crate) fn pending(&self) -> u64 {
        self.head().wrapping_sub(self.tail())
    }

    /// Whether the next `push` could overrun the reserved headroom.
    ///
    /// Meant to be called by the owning thread only (it reads `head` with a
    /// plain load, relying on that thread being the sole writer); calling it
    /// from elsewhere is not unsound, just potentially stale.
    pub(crate) fn needs_backpressure_drain(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) >= self.capacity() - MAX_SLOTS_PER_PUSH
    }

    #[inline]
    unsafe fn slot(&self, idx: u64) -> *mut usize {
        self.buffer[(idx & self.mask) as usize].get()
    }

    /// Encode and publish one deferred call. Step 5 (the release store of
    /// `head`) is the only synchronizing action; callers are responsible for
    /// the full fence and worker wake-up that follow it (§4.1 step 6),
    /// since the wake protocol is a process-wide concern, not a per-queue
    /// one.
    ///
    /// # Safety
    /// Must only be called by the queue's owning thread, and only when
    /// `needs_backpressure_drain` has already been handled (the caller must
    /// not let more than `capacity() - MAX_SLOTS_PER_PUSH` pending items
    /// accumulate before calling this).
    pub(crate) unsafe fn push(&self, fct: DeferFn, arg: *mut ()) {
        let fct_addr = fct as usize;
        let arg_addr = arg as usize;
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        debug_assert_bounded_count!(head.wrapping_sub(tail), self.capacity());

        // SAFETY: this whole block runs on the queue's owning thread (the
        // caller's contract), which is the only thread ever allowed to
        // write `last_fct_in` or slots ahead of `head`.
        let new_head = unsafe {
            let last_in = &mut *self.last_fct_in.get();
            encode_call(&self.buffer, self.mask, head, last_in, fct_addr, arg_addr)
        };

        debug_assert_monotonic!("head", self.head.load(Ordering::Relaxed), new_head);
        debug_assert_bounded_count!(new_head.wrapping_sub(tail), self.capacity());
        self.head.store(new_head, Ordering::Release);
    }

    /// Drain `[tail, snapshot_head)`, invoking every decoded callback, and
    /// publish the new `tail`. Returns the number of callbacks invoked.
    ///
    /// # Safety
    /// Caller must hold the process-wide drain lock, and `snapshot_head`
    /// must have been observed no later than the moment the caller's grace
    /// period began (so every slot in range is guaranteed fully written).
    pub(crate) unsafe fn drain(&self, snapshot_head: u64) -> usize {
        let mut i = self.tail.load(Ordering::Acquire);
        let start = i;
        let mut count = 0usize;

        // SAFETY: caller holds the drain lock (function contract), and
        // every slot up to `snapshot_head` was published by a `head`
        // release store that happened-before the acquire load that produced
        // `snapshot_head`.
        unsafe {
            let last_out = &mut *self.last_fct_out.get();
            while i < snapshot_head {
                debug_assert_in_drain_range!(i, start, snapshot_head);
                let (fct_addr, arg_addr, next_i) = decode_call(&self.buffer, self.mask, i, last_out);
                i = next_i;

                // `fct_addr` was produced by `push` from a real `DeferFn`
                // cast to `usize`; transmuting it back recovers that
                // function pointer exactly (round-trip guaranteed by the
                // encoding law this queue implements).
                let fct: DeferFn = std::mem::transmute(fct_addr);
                fct(arg_addr as *mut ());
                count += 1;
            }
        }

        debug_assert_monotonic!("tail", start, i);
        self.tail.store(i, Ordering::Release);
        count
    }
}

/// Pure encoding step: writes the slots for one `(fct_addr, arg_addr)` call
/// starting at `head`, updating `last_fct_in` and returning the new head.
///
/// Operates on raw encoded `usize` addresses, with no notion of a real
/// callable `DeferFn` — this is what lets the tag-bit/sentinel-collision
/// edge cases in SPEC_FULL.md §8 be exercised directly with bit patterns
/// that could never be produced by an actual `fn` pointer (a real function
/// pointer's low bit is always zero), something `push`/`drain`'s fused
/// encode-and-invoke loop cannot do.
///
/// # Safety
/// Caller must hold exclusive write access to `buffer` for the slots this
/// call will touch (the owning thread's contract on `push`).
unsafe fn encode_call(
    buffer: &[UnsafeCell<usize>],
    mask: u64,
    mut head: u64,
    last_fct_in: &mut usize,
    fct_addr: usize,
    arg_addr: usize,
) -> u64 {
    let slot = |idx: u64| buffer[(idx & mask) as usize].get();

    // SAFETY: forwarded from this function's own safety contract.
    unsafe {
        if fct_addr != *last_fct_in {
            *last_fct_in = fct_addr;
            if fct_addr & FCT_TAG_BIT == 0 && fct_addr != SENTINEL {
                *slot(head) = fct_addr | FCT_TAG_BIT;
                head += 1;
            } else {
                *slot(head) = SENTINEL;
                head += 1;
                *slot(head) = fct_addr;
                head += 1;
            }
        }

        if arg_addr & FCT_TAG_BIT != 0 || arg_addr == SENTINEL {
            // Escape: re-declare the function so the decoder's state stays
            // consistent even though we may have just elided it above.
            *slot(head) = SENTINEL;
            head += 1;
            *slot(head) = fct_addr;
            head += 1;
            *slot(head) = arg_addr;
            head += 1;
        } else {
            *slot(head) = arg_addr;
            head += 1;
        }
    }
    head
}

/// Pure decoding step: the inverse of [`encode_call`]. Reads one decoded
/// `(fct_addr, arg_addr)` pair starting at `i`, updating `last_fct_out` and
/// returning `(fct_addr, arg_addr, new_i)`. Never invokes anything.
///
/// # Safety
/// Caller must hold read access to every slot in `[i, i + 3)` that this call
/// ends up reading (the drain lock holder's contract on `drain`).
unsafe fn decode_call(buffer: &[UnsafeCell<usize>], mask: u64, mut i: u64, last_fct_out: &mut usize) -> (usize, usize, u64) {
    let slot = |idx: u64| buffer[(idx & mask) as usize].get();

    // SAFETY: forwarded from this function's own safety contract.
    unsafe {
        let first = *slot(i);
        i += 1;

        let arg_addr = if first & FCT_TAG_BIT != 0 {
            *last_fct_out = first & !FCT_TAG_BIT;
            let arg = *slot(i);
            i += 1;
            arg
        } else if first == SENTINEL {
            let fct = *slot(i);
            i += 1;
            *last_fct_out = fct;
            let arg = *slot(i);
            i += 1;
            arg
        } else {
            first
        };

        (*last_fct_out, arg_addr, i)
    }
}
