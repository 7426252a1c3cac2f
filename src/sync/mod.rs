//! Blocking synchronization primitives built on the scheduler core.
//!
//! Both primitives are generic over a [`Dispatcher`](crate::thread::Dispatcher)
//! and keep all of their state in the kernel's donation graph: a lock is a
//! transferring queue whose holder is the owner, a condition variable is a
//! non-transferring queue of sleepers.

pub mod condition;
pub mod lock;

pub use condition::Condition;
pub use lock::Lock;
