//! Typed errors for the fallible parts of the defer subsystem.
//!
//! API misuse (enqueuing from an unregistered thread, double-registering,
//! unregistering a thread that never registered) is treated as a programmer
//! error and asserted rather than returned here, matching the split the
//! teacher crate draws between `ChannelError` and its debug assertions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeferError {
    #[error("failed to allocate a queue of {requested} slots")]
    QueueAllocationFailed { requested: usize },

    #[error("failed to grow the writer registry past {current} entries")]
    RegistryExhausted { current: usize },

    #[error("the defer subsystem was already initialized with a different configuration")]
    AlreadyInitialized,
}
