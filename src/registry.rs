//! The process-wide writer registry.
//!
//! A growth-only-by-doubling array of per-writer bookkeeping, protected by
//! the drain lock (see `global.rs` for the two-lock nesting rule). `Vec`'s
//! own growth strategy already doubles on reallocation and `swap_remove`
//! already implements "remove by swapping with the last entry", so the
//! registry itself is a thin wrapper rather than a hand-rolled array.

use std::sync::Arc;
use std::thread::ThreadId;

use crate::error::DeferError;
use crate::invariants::debug_assert_unique_member;
use crate::queue::DeferQueue;

pub(crate) struct WriterEntry {
    pub(crate) thread_id: ThreadId,
    pub(crate) queue: Arc<DeferQueue>,
    pub(crate) reader_token: usize,
    /// Scratch space holding the `head` snapshot taken at the start of a
    /// drain pass. Confined to the drain lock's critical section.
    pub(crate) last_head: u64,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<WriterEntry>,
}

impl Registry {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    /// Appends an entry, growing the backing array by doubling if it is
    /// already full. Growth is fallible: an allocation failure here leaves
    /// the registry untouched and is surfaced to the caller rather than
    /// aborting the process (SPEC_FULL.md §7, the second resource-exhaustion
    /// case).
    pub(crate) fn add(
        &mut self,
        thread_id: ThreadId,
        queue: Arc<DeferQueue>,
        reader_token: usize,
    ) -> Result<(), DeferError> {
        if self.entries.len() == self.entries.capacity() {
            let additional = self.entries.capacity().max(1);
            self.entries
                .try_reserve(additional)
                .map_err(|_| DeferError::RegistryExhausted { current: self.entries.len() })?;
        }
        self.entries.push(WriterEntry { thread_id, queue, reader_token, last_head: 0 });
        debug_assert_unique_member!(self.entries.iter().filter(|e| e.thread_id == thread_id).count());
        Ok(())
    }

    /// Removes the entry for `thread_id` by swapping it with the last entry.
    pub(crate) fn remove(&mut self, thread_id: ThreadId) -> Option<WriterEntry> {
        let idx = self.entries.iter().position(|e| e.thread_id == thread_id)?;
        Some(self.entries.swap_remove(idx))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &WriterEntry> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut WriterEntry> {
        self.entries.iter_mut()
    }

    pub(crate) fn total_pending(&self) -> u64 {
        self.entries.iter().map(|e| e.queue.pending()).sum()
    }
}
