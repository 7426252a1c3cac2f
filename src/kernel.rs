//! Kernel abstraction for the scheduler core.
//!
//! This module provides the `Kernel` struct that owns the donation graph and
//! the critical section protecting it. Every scheduling decision and every
//! donation update happens while a [`CriticalSection`] is alive.

use crate::arch::{Arch, InterruptGuard};
use crate::sched::{DonationGraph, Policy, QueueId};
use crate::thread::ThreadId;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use log::debug;
use portable_atomic::{AtomicUsize, Ordering};

/// Main kernel handle that manages the scheduler state.
///
/// # Type Parameters
///
/// * `A` - Architecture implementation
/// * `P` - Scheduling policy
pub struct Kernel<A: Arch, P: Policy> {
    /// Ownership and donation graph
    graph: spin::Mutex<DonationGraph<P>>,
    /// Next thread ID to assign
    next_thread_id: AtomicUsize,
    /// Architecture marker (zero-sized)
    _arch: PhantomData<fn() -> A>,
}

/// Exclusive access to the scheduler state.
///
/// Holds interrupts off and the graph locked. Dropping it exits the critical
/// section; nesting is not supported.
pub struct CriticalSection<'a, A: Arch, P: Policy> {
    // Field order matters: the graph lock is released before interrupts
    // come back on.
    graph: spin::MutexGuard<'a, DonationGraph<P>>,
    _irq: InterruptGuard<A>,
}

impl<A: Arch, P: Policy> Deref for CriticalSection<'_, A, P> {
    type Target = DonationGraph<P>;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl<A: Arch, P: Policy> DerefMut for CriticalSection<'_, A, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

impl<A: Arch, P: Policy> Kernel<A, P> {
    /// Create a new kernel instance governed by `policy`.
    pub fn new(policy: P) -> Self {
        debug!("kernel: new {} scheduler", P::NAME);
        Self {
            graph: spin::Mutex::new(DonationGraph::new(policy)),
            next_thread_id: AtomicUsize::new(1), // Start from 1, never use 0
            _arch: PhantomData,
        }
    }

    /// Enter the scheduler's critical section.
    ///
    /// Interrupts are disabled before the graph lock is taken, so an
    /// interrupt handler on this CPU can never spin on a lock its own CPU
    /// holds.
    pub fn atomic(&self) -> CriticalSection<'_, A, P> {
        let irq = InterruptGuard::new();
        CriticalSection {
            graph: self.graph.lock(),
            _irq: irq,
        }
    }

    /// Generate a new unique thread ID.
    ///
    /// Thread IDs are never reused and are guaranteed to be unique
    /// for the lifetime of the kernel instance.
    pub fn next_thread_id(&self) -> ThreadId {
        let id = self.next_thread_id.fetch_add(1, Ordering::AcqRel);
        ThreadId::new(id)
    }

    /// Create a resource queue.
    pub fn new_queue(&self, transfers: bool) -> QueueId {
        self.atomic().new_queue(transfers)
    }

    /// Destroy a resource queue.
    pub fn retire_queue(&self, queue: QueueId) {
        self.atomic().retire_queue(queue)
    }

    /// Set a thread's base priority or ticket count.
    pub fn set_priority(&self, thread: ThreadId, value: u64) {
        self.atomic().set_priority(thread, value)
    }

    /// Base value of a thread.
    pub fn priority(&self, thread: ThreadId) -> u64 {
        self.atomic().priority(thread)
    }

    /// Effective value of a thread.
    pub fn effective_priority(&self, thread: ThreadId) -> u64 {
        self.atomic().effective_priority(thread)
    }

    /// Raise a thread's base value by one step.
    pub fn increase_priority(&self, thread: ThreadId) -> bool {
        self.atomic().increase_priority(thread)
    }

    /// Lower a thread's base value by one step.
    pub fn decrease_priority(&self, thread: ThreadId) -> bool {
        self.atomic().decrease_priority(thread)
    }
}
