//! Tunable constants for the deferred-reclamation subsystem.

use std::time::Duration;

/// Configuration for the process-wide defer subsystem.
///
/// Supplied once via [`crate::init`], or defaulted lazily on first use of
/// [`crate::register_thread`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    queue_bits: u8,
    worker_batch_delay: Duration,
    initial_registry_capacity: usize,
}

impl Config {
    /// Smallest queue allowed: large enough that `MAX_SLOTS_PER_PUSH` never
    /// dominates the usable capacity.
    const MIN_QUEUE_BITS: u8 = 4;
    const MAX_QUEUE_BITS: u8 = 24;

    #[must_use]
    pub fn new(queue_bits: u8, worker_batch_delay: Duration, initial_registry_capacity: usize) -> Self {
        assert!(
            (Self::MIN_QUEUE_BITS..=Self::MAX_QUEUE_BITS).contains(&queue_bits),
            "queue_bits must be in {}..={}",
            Self::MIN_QUEUE_BITS,
            Self::MAX_QUEUE_BITS
        );
        assert!(initial_registry_capacity >= 1, "initial_registry_capacity must be at least 1");
        Self { queue_bits, worker_batch_delay, initial_registry_capacity }
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        1usize << self.queue_bits
    }

    #[must_use]
    pub fn worker_batch_delay(&self) -> Duration {
        self.worker_batch_delay
    }

    #[must_use]
    pub fn initial_registry_capacity(&self) -> usize {
        self.initial_registry_capacity
    }
}

impl Default for Config {
    /// 64K-slot queues, a 100ms post-wake batching delay, and room for 4
    /// writers before the registry's first growth — chosen to match the
    /// reference defer-reclamation implementation this crate is modeled on.
    fn default() -> Self {
        Self::new(16, Duration::from_millis(100), 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let c = Config::default();
        assert_eq!(c.queue_capacity(), 65536);
        assert_eq!(c.worker_batch_delay(), Duration::from_millis(100));
        assert_eq!(c.initial_registry_capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "queue_bits")]
    fn rejects_queue_bits_out_of_range() {
        Config::new(100, Duration::from_millis(1), 1);
    }
}
