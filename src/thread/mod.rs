//! Thread identity and the dispatcher seam.
//!
//! The scheduler core never switches contexts on its own. It decides who
//! holds what and who runs next, and relies on a [`Dispatcher`] to actually
//! park and resume execution contexts. On the host, [`Machine`] is such a
//! dispatcher, running every simulated thread on its own OS thread with a
//! single baton deciding which one may execute.

use crate::arch::Arch;
use crate::kernel::{CriticalSection, Kernel};
use crate::sched::Policy;

#[cfg(any(test, feature = "std-shim"))]
pub mod builder;
#[cfg(any(test, feature = "std-shim"))]
pub mod handle;
#[cfg(any(test, feature = "std-shim"))]
pub mod machine;

#[cfg(any(test, feature = "std-shim"))]
pub use builder::ThreadBuilder;
#[cfg(any(test, feature = "std-shim"))]
pub use handle::JoinHandle;
#[cfg(any(test, feature = "std-shim"))]
pub use machine::Machine;

/// Unique identifier of a thread known to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(core::num::NonZeroUsize);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Create a thread ID from a raw non-zero value.
    ///
    /// # Panics
    ///
    /// Panics if `id` is zero.
    pub const fn new(id: usize) -> Self {
        match core::num::NonZeroUsize::new(id) {
            Some(id) => Self(id),
            None => panic!("thread IDs start at 1"),
        }
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Lifecycle state of a thread as seen by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Finished = 3,
}

/// The thread-switching half of the system.
///
/// Synchronization primitives talk to the scheduler core through this
/// trait. Every method that takes a [`CriticalSection`] must be called
/// inside it.
pub trait Dispatcher: Send + Sync {
    /// Interrupt control of the machine.
    type Arch: Arch;

    /// Scheduling policy of the kernel.
    type Policy: Policy;

    /// The kernel owning the donation graph.
    fn kernel(&self) -> &Kernel<Self::Arch, Self::Policy>;

    /// The calling thread.
    fn current(&self) -> ThreadId;

    /// Make `thread` runnable.
    ///
    /// Readying the running thread before it blocks is allowed; its next
    /// [`block`](Dispatcher::block) then returns immediately, so a wake-up
    /// that races ahead of the sleep is not lost.
    fn ready(&self, cs: &mut CriticalSection<'_, Self::Arch, Self::Policy>, thread: ThreadId);

    /// Suspend the calling thread until someone readies it.
    ///
    /// The critical section is given up only once the caller can no longer
    /// miss a wake-up, and is not held on return.
    fn block(&self, cs: CriticalSection<'_, Self::Arch, Self::Policy>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::format;

    #[test]
    fn test_thread_id_display() {
        let id = ThreadId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(format!("{}", id), "42");
    }

    #[test]
    #[should_panic(expected = "thread IDs start at 1")]
    fn test_thread_id_zero_panics() {
        let _ = ThreadId::new(0);
    }
}
