#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! Scheduler core with priority donation and lottery scheduling.
//!
//! This library decides which thread holds which resource and which thread
//! runs next, for a single CPU. Every thread has a base priority (or ticket
//! count) and an effective one that includes whatever the threads waiting on
//! its resources donate to it, so a low-priority lock holder never starves
//! a high-priority thread blocked behind it.
//!
//! # Schedulers
//!
//! - [`PriorityPolicy`]: priorities 0 to 7, highest effective priority runs,
//!   ties go to the earliest arrival, donation takes the maximum
//! - [`LotteryPolicy`]: ticket counts, the winner is drawn with probability
//!   proportional to tickets, donation adds
//!
//! # Features
//!
//! - `std-shim`: build the host [`Machine`] (simulated uniprocessor) outside
//!   of tests
//!
//! # Quick Start
//!
//! ```ignore
//! use donation_threads::{Condition, Lock, Machine, PriorityPolicy};
//! use std::sync::Arc;
//!
//! let machine = Machine::new(PriorityPolicy::new());
//! let lock = Arc::new(Lock::new(Arc::clone(&machine)));
//! let ready = Arc::new(Condition::new(Arc::clone(&lock)));
//!
//! let worker = machine.builder().name("worker").priority(5).spawn({
//!     let (lock, ready) = (Arc::clone(&lock), Arc::clone(&ready));
//!     move || {
//!         lock.acquire();
//!         ready.wake();
//!         lock.release();
//!     }
//! })?;
//!
//! lock.acquire();
//! ready.sleep();
//! lock.release();
//! worker.join();
//! ```
//!
//! # Architecture
//!
//! - [`DonationGraph`]: holders, waiters and effective values of one kernel
//! - [`Kernel`]: the graph behind the critical section (interrupts off plus
//!   a spin lock)
//! - [`Dispatcher`]: the seam to whatever actually switches threads
//! - [`Lock`] and [`Condition`]: blocking primitives over any dispatcher

// Core modules
pub mod arch;
pub mod errors;
pub mod kernel;
pub mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
mod tests;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

extern crate alloc;

// Panic handler for bare-metal
#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim"), target_os = "none"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    // On panic, disable interrupts and halt
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("msr daifset, #0xf", options(nomem, nostack));
    }
    loop {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            core::arch::asm!("wfe", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "aarch64"))]
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Architecture abstraction
pub use arch::{Arch, DefaultArch, InterruptGuard, NoOpArch};

// Kernel
pub use kernel::{CriticalSection, Kernel};

// Scheduler
pub use sched::{Candidate, DonationGraph, LotteryPolicy, Policy, PriorityPolicy, QueueId};

// Threads
pub use thread::{Dispatcher, ThreadId, ThreadState};

#[cfg(any(test, feature = "std-shim"))]
pub use thread::{JoinHandle, Machine, ThreadBuilder};

// Synchronization
pub use sync::{Condition, Lock};

// Errors
pub use errors::{ConsistencyError, PreconditionError, SchedError, SchedResult};
