//! The donation graph: who holds which resource queue and who waits in it.
//!
//! Every thread the scheduler has seen gets a node with its base value, its
//! cached effective value, the queues it holds and the queues it waits in.
//! Every resource queue gets a node with its holder, its waiters in arrival
//! order and the running sum of their effective values.
//!
//! Effective values are never patched in place. After any structural change
//! the affected thread is recomputed from scratch out of its base value and
//! the waiters of the transferring queues it holds; if the result differs,
//! the change is pushed to the holders of every queue that thread waits in,
//! and so on down the chain. Donation therefore reaches the ultimate holder
//! however deep the chain of locks and joins goes.
//!
//! The holds/waits relation must stay acyclic. Any operation that would make
//! a thread donate to itself is rejected before the graph is touched.

use super::trait_def::{Candidate, Policy};
use crate::errors::{fatal, ConsistencyError, PreconditionError, SchedResult};
use crate::thread::ThreadId;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::num::NonZeroUsize;
use log::trace;

/// Identifier of a resource queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(NonZeroUsize);

impl core::fmt::Display for QueueId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl QueueId {
    /// Create a queue ID from a raw non-zero value.
    ///
    /// # Panics
    ///
    /// Panics if `id` is zero.
    pub const fn new(id: usize) -> Self {
        match NonZeroUsize::new(id) {
            Some(id) => Self(id),
            None => panic!("queue IDs start at 1"),
        }
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// Scheduling state of one thread.
#[derive(Debug, Clone)]
struct ThreadNode {
    base: u64,
    effective: u64,
    holds: Vec<QueueId>,
    waits_in: Vec<QueueId>,
}

impl ThreadNode {
    fn new(base: u64) -> Self {
        Self {
            base,
            effective: base,
            holds: Vec::new(),
            waits_in: Vec::new(),
        }
    }
}

/// State of one resource queue.
#[derive(Debug, Clone)]
struct QueueNode {
    transfers: bool,
    holder: Option<ThreadId>,
    waiting: Vec<ThreadId>,
    total: u64,
}

impl QueueNode {
    fn new(transfers: bool) -> Self {
        Self {
            transfers,
            holder: None,
            waiting: Vec::new(),
            total: 0,
        }
    }
}

/// Ownership and donation graph of one scheduler instance.
///
/// The graph itself is not synchronized; the kernel keeps it behind its
/// critical section and every mutation happens through a
/// [`CriticalSection`](crate::kernel::CriticalSection).
pub struct DonationGraph<P: Policy> {
    policy: P,
    threads: BTreeMap<ThreadId, ThreadNode>,
    queues: BTreeMap<QueueId, QueueNode>,
    next_queue: usize,
}

impl<P: Policy> DonationGraph<P> {
    /// Create an empty graph governed by `policy`.
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            threads: BTreeMap::new(),
            queues: BTreeMap::new(),
            next_queue: 1,
        }
    }

    /// The installed policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable access to the installed policy (e.g. to reseed a lottery).
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Create a resource queue.
    ///
    /// If `transfers` is false the queue never donates to its holder; that
    /// is how condition variables and ready queues opt out of inversion
    /// protection.
    pub fn new_queue(&mut self, transfers: bool) -> QueueId {
        let id = QueueId::new(self.next_queue);
        self.next_queue += 1;
        self.queues.insert(id, QueueNode::new(transfers));
        trace!("{}: new queue {} (transfers={})", P::NAME, id, transfers);
        id
    }

    /// Destroy a queue together with every edge touching it.
    pub fn retire_queue(&mut self, queue: QueueId) {
        fatal(self.try_retire_queue(queue))
    }

    /// Fallible form of [`retire_queue`](Self::retire_queue).
    pub fn try_retire_queue(&mut self, queue: QueueId) -> SchedResult<()> {
        let node = self
            .queues
            .remove(&queue)
            .ok_or(PreconditionError::UnknownQueue(queue))?;
        for waiter in &node.waiting {
            if let Some(thread) = self.threads.get_mut(waiter) {
                thread.waits_in.retain(|q| *q != queue);
            }
        }
        if let Some(holder) = node.holder {
            if let Some(thread) = self.threads.get_mut(&holder) {
                thread.holds.retain(|q| *q != queue);
            }
            self.refresh(holder);
        }
        trace!("{}: retired queue {}", P::NAME, queue);
        Ok(())
    }

    /// Register that `thread` is waiting for `queue`.
    ///
    /// A thread that currently holds the queue gives it up first. Waiting
    /// again in a queue the thread already waits in changes nothing.
    ///
    /// # Panics
    ///
    /// Panics if the queue is unknown or the wait would close a donation
    /// cycle.
    pub fn wait_for_access(&mut self, queue: QueueId, thread: ThreadId) {
        fatal(self.try_wait_for_access(queue, thread))
    }

    /// Fallible form of [`wait_for_access`](Self::wait_for_access).
    pub fn try_wait_for_access(&mut self, queue: QueueId, thread: ThreadId) -> SchedResult<()> {
        let node = self.queue(queue)?;
        if node.waiting.contains(&thread) {
            return Ok(());
        }
        let transfers = node.transfers;
        let held_by_self = node.holder == Some(thread);
        let holder = node.holder.filter(|h| *h != thread);

        if transfers {
            if let Some(holder) = holder {
                if self.donates_to(holder, thread) {
                    return Err(PreconditionError::DonationCycle { queue, thread }.into());
                }
            }
        }

        self.ensure_thread(thread);
        if held_by_self {
            self.detach_holder(queue);
            self.refresh(thread);
        }

        if let Some(node) = self.queues.get_mut(&queue) {
            node.waiting.push(thread);
        }
        if let Some(node) = self.threads.get_mut(&thread) {
            node.waits_in.push(queue);
        }
        trace!("{}: thread {} waits in {}", P::NAME, thread, queue);

        self.refresh_aggregate(queue);
        if transfers {
            if let Some(holder) = holder {
                self.refresh(holder);
            }
        }
        Ok(())
    }

    /// Make `thread` the holder of `queue`.
    ///
    /// Any previous holder loses the queue, and `thread` stops waiting in it
    /// if it was.
    ///
    /// # Panics
    ///
    /// Panics if the queue is unknown or the hand-over would close a
    /// donation cycle.
    pub fn acquire(&mut self, queue: QueueId, thread: ThreadId) {
        fatal(self.try_acquire(queue, thread))
    }

    /// Fallible form of [`acquire`](Self::acquire).
    pub fn try_acquire(&mut self, queue: QueueId, thread: ThreadId) -> SchedResult<()> {
        let node = self.queue(queue)?;
        let waiting_before = node.waiting.contains(&thread);
        if node.holder == Some(thread) && !waiting_before {
            return Ok(());
        }

        if node.transfers {
            for waiter in node.waiting.iter().filter(|w| **w != thread) {
                if self.donates_to(thread, *waiter) {
                    return Err(PreconditionError::DonationCycle { queue, thread: *waiter }.into());
                }
            }
        }

        self.ensure_thread(thread);
        let previous = match self.queues.get(&queue).and_then(|n| n.holder) {
            Some(holder) if holder != thread => self.detach_holder(queue),
            _ => None,
        };

        if waiting_before {
            if let Some(node) = self.queues.get_mut(&queue) {
                node.waiting.retain(|t| *t != thread);
            }
            if let Some(node) = self.threads.get_mut(&thread) {
                node.waits_in.retain(|q| *q != queue);
            }
        }
        if let Some(node) = self.queues.get_mut(&queue) {
            node.holder = Some(thread);
        }
        if let Some(node) = self.threads.get_mut(&thread) {
            if !node.holds.contains(&queue) {
                node.holds.push(queue);
            }
        }
        trace!("{}: thread {} acquires {}", P::NAME, thread, queue);

        self.refresh_aggregate(queue);
        if let Some(previous) = previous {
            self.refresh(previous);
        }
        self.refresh(thread);
        Ok(())
    }

    /// Hand `queue` to the waiter the policy selects.
    ///
    /// The winner leaves the wait set and becomes the holder in one step.
    ///
    /// # Returns
    ///
    /// The new holder, or `None` if nobody is waiting.
    pub fn next_thread(&mut self, queue: QueueId) -> Option<ThreadId> {
        fatal(self.try_next_thread(queue))
    }

    /// Fallible form of [`next_thread`](Self::next_thread).
    pub fn try_next_thread(&mut self, queue: QueueId) -> SchedResult<Option<ThreadId>> {
        let node = self.queue(queue)?;
        if node.waiting.is_empty() {
            return Ok(None);
        }
        let total = node.total;
        let candidates: Vec<Candidate> = node
            .waiting
            .iter()
            .map(|&thread| Candidate {
                thread,
                effective: self.effective_priority(thread),
            })
            .collect();

        let index = self
            .policy
            .pick(&candidates, total)
            .ok_or(ConsistencyError::NoWinner(queue))?;
        let winner = candidates
            .get(index)
            .map(|c| c.thread)
            .ok_or(ConsistencyError::NoWinner(queue))?;

        self.try_acquire(queue, winner)?;
        trace!("{}: {} handed to thread {}", P::NAME, queue, winner);
        Ok(Some(winner))
    }

    /// End `thread`'s ownership of `queue` without handing it on.
    ///
    /// # Panics
    ///
    /// Panics if `thread` is not the holder.
    pub fn release(&mut self, queue: QueueId, thread: ThreadId) {
        fatal(self.try_release(queue, thread))
    }

    /// Fallible form of [`release`](Self::release).
    pub fn try_release(&mut self, queue: QueueId, thread: ThreadId) -> SchedResult<()> {
        if self.queue(queue)?.holder != Some(thread) {
            return Err(PreconditionError::NotHolder { queue, thread }.into());
        }
        self.detach_holder(queue);
        trace!("{}: thread {} releases {}", P::NAME, thread, queue);
        self.refresh(thread);
        Ok(())
    }

    /// Set a thread's base priority (or tickets).
    ///
    /// # Panics
    ///
    /// Panics if `value` is outside the policy's range.
    pub fn set_priority(&mut self, thread: ThreadId, value: u64) {
        fatal(self.try_set_priority(thread, value))
    }

    /// Fallible form of [`set_priority`](Self::set_priority).
    pub fn try_set_priority(&mut self, thread: ThreadId, value: u64) -> SchedResult<()> {
        if !(P::MIN..=P::MAX).contains(&value) {
            return Err(PreconditionError::PriorityOutOfRange {
                value,
                min: P::MIN,
                max: P::MAX,
            }
            .into());
        }
        let node = self.ensure_thread(thread);
        if node.base == value {
            return Ok(());
        }
        node.base = value;
        trace!("{}: thread {} base -> {}", P::NAME, thread, value);
        self.refresh(thread);
        Ok(())
    }

    /// Raise a thread's base value by one.
    ///
    /// Returns `false` and leaves the thread alone if it is already at the
    /// policy maximum.
    pub fn increase_priority(&mut self, thread: ThreadId) -> bool {
        let current = self.priority(thread);
        if current >= P::MAX {
            return false;
        }
        self.set_priority(thread, current + 1);
        true
    }

    /// Lower a thread's base value by one.
    ///
    /// Returns `false` and leaves the thread alone if it is already at the
    /// policy minimum.
    pub fn decrease_priority(&mut self, thread: ThreadId) -> bool {
        let current = self.priority(thread);
        if current <= P::MIN {
            return false;
        }
        self.set_priority(thread, current - 1);
        true
    }

    /// Base value of a thread.
    pub fn priority(&self, thread: ThreadId) -> u64 {
        self.threads.get(&thread).map_or(P::DEFAULT, |n| n.base)
    }

    /// Effective value of a thread, donations included.
    pub fn effective_priority(&self, thread: ThreadId) -> u64 {
        self.threads.get(&thread).map_or(P::DEFAULT, |n| n.effective)
    }

    /// Forget a thread that is exiting.
    ///
    /// Queues it still holds become free.
    ///
    /// # Panics
    ///
    /// Panics if the thread is still waiting in some queue.
    pub fn retire_thread(&mut self, thread: ThreadId) {
        fatal(self.try_retire_thread(thread))
    }

    /// Fallible form of [`retire_thread`](Self::retire_thread).
    pub fn try_retire_thread(&mut self, thread: ThreadId) -> SchedResult<()> {
        let Some(node) = self.threads.get(&thread) else {
            return Ok(());
        };
        if let Some(&queue) = node.waits_in.first() {
            return Err(PreconditionError::StillWaiting { thread, queue }.into());
        }
        for queue in node.holds.clone() {
            self.detach_holder(queue);
        }
        self.threads.remove(&thread);
        trace!("{}: retired thread {}", P::NAME, thread);
        Ok(())
    }

    /// Current holder of a queue.
    pub fn holder(&self, queue: QueueId) -> Option<ThreadId> {
        self.queues.get(&queue).and_then(|n| n.holder)
    }

    /// Waiters of a queue in arrival order.
    pub fn waiting(&self, queue: QueueId) -> &[ThreadId] {
        self.queues.get(&queue).map_or(&[], |n| n.waiting.as_slice())
    }

    /// Number of threads waiting in a queue.
    pub fn waiting_len(&self, queue: QueueId) -> usize {
        self.waiting(queue).len()
    }

    /// Whether `thread` is waiting in `queue`.
    pub fn is_waiting(&self, queue: QueueId, thread: ThreadId) -> bool {
        self.waiting(queue).contains(&thread)
    }

    /// Whether a queue donates to its holder.
    pub fn transfers_priority(&self, queue: QueueId) -> bool {
        self.queues.get(&queue).map_or(false, |n| n.transfers)
    }

    /// Running sum of the effective values of a queue's waiters.
    pub fn aggregate(&self, queue: QueueId) -> u64 {
        self.queues.get(&queue).map_or(0, |n| n.total)
    }

    /// Queues a thread holds.
    pub fn holds(&self, thread: ThreadId) -> &[QueueId] {
        self.threads.get(&thread).map_or(&[], |n| n.holds.as_slice())
    }

    /// Queues a thread waits in.
    pub fn waits_in(&self, thread: ThreadId) -> &[QueueId] {
        self.threads.get(&thread).map_or(&[], |n| n.waits_in.as_slice())
    }

    /// Number of threads with scheduling state.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Number of live queues.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Check every invariant of the graph against a recomputation from
    /// scratch.
    pub fn audit(&self) -> SchedResult<()> {
        for (&id, node) in &self.threads {
            let expected = self.compute_effective(id);
            if node.effective != expected {
                return Err(ConsistencyError::StaleEffective {
                    thread: id,
                    stored: node.effective,
                    expected,
                }
                .into());
            }
            for queue in &node.holds {
                if self.holder(*queue) != Some(id) || node.waits_in.contains(queue) {
                    return Err(ConsistencyError::BrokenEdge { queue: *queue, thread: id }.into());
                }
            }
            for queue in &node.waits_in {
                if !self.is_waiting(*queue, id) {
                    return Err(ConsistencyError::BrokenEdge { queue: *queue, thread: id }.into());
                }
            }
        }
        for (&id, node) in &self.queues {
            let expected = self.sum_waiting(&node.waiting);
            if node.total != expected {
                return Err(ConsistencyError::StaleAggregate {
                    queue: id,
                    stored: node.total,
                    expected,
                }
                .into());
            }
            if let Some(holder) = node.holder {
                if !self.holds(holder).contains(&id) {
                    return Err(ConsistencyError::BrokenEdge { queue: id, thread: holder }.into());
                }
            }
            for waiter in &node.waiting {
                if !self.waits_in(*waiter).contains(&id) {
                    return Err(ConsistencyError::BrokenEdge { queue: id, thread: *waiter }.into());
                }
            }
        }
        Ok(())
    }

    fn queue(&self, queue: QueueId) -> SchedResult<&QueueNode> {
        self.queues
            .get(&queue)
            .ok_or_else(|| PreconditionError::UnknownQueue(queue).into())
    }

    fn ensure_thread(&mut self, thread: ThreadId) -> &mut ThreadNode {
        self.threads
            .entry(thread)
            .or_insert_with(|| ThreadNode::new(P::DEFAULT))
    }

    /// Clear a queue's holder and drop the queue from the holder's set.
    fn detach_holder(&mut self, queue: QueueId) -> Option<ThreadId> {
        let holder = self.queues.get_mut(&queue)?.holder.take()?;
        if let Some(node) = self.threads.get_mut(&holder) {
            node.holds.retain(|q| *q != queue);
        }
        Some(holder)
    }

    /// Whether `from` already donates to `to`, directly or through a chain.
    fn donates_to(&self, from: ThreadId, to: ThreadId) -> bool {
        let mut pending = alloc::vec![from];
        let mut seen = BTreeSet::new();
        while let Some(thread) = pending.pop() {
            if thread == to {
                return true;
            }
            if !seen.insert(thread) {
                continue;
            }
            for queue in self.waits_in(thread) {
                if let Some(node) = self.queues.get(queue) {
                    if let (true, Some(holder)) = (node.transfers, node.holder) {
                        pending.push(holder);
                    }
                }
            }
        }
        false
    }

    fn compute_effective(&self, thread: ThreadId) -> u64 {
        let Some(node) = self.threads.get(&thread) else {
            return P::DEFAULT;
        };
        let donations = node
            .holds
            .iter()
            .filter_map(|q| self.queues.get(q))
            .filter(|q| q.transfers)
            .flat_map(|q| q.waiting.iter())
            .map(|w| self.effective_priority(*w));
        P::donate(node.base, donations)
    }

    fn sum_waiting(&self, waiting: &[ThreadId]) -> u64 {
        waiting
            .iter()
            .map(|t| self.effective_priority(*t))
            .fold(0, u64::saturating_add)
    }

    fn refresh_aggregate(&mut self, queue: QueueId) {
        let Some(node) = self.queues.get(&queue) else {
            return;
        };
        let total = self.sum_waiting(&node.waiting);
        if let Some(node) = self.queues.get_mut(&queue) {
            node.total = total;
        }
    }

    /// Recompute `thread` and push any change down the donation chain.
    fn refresh(&mut self, thread: ThreadId) {
        let mut path = Vec::new();
        self.propagate(thread, &mut path);
    }

    fn propagate(&mut self, thread: ThreadId, path: &mut Vec<ThreadId>) {
        assert!(
            !path.contains(&thread),
            "donation cycle through thread {}",
            thread
        );
        let expected = self.compute_effective(thread);
        let Some(node) = self.threads.get_mut(&thread) else {
            return;
        };
        if node.effective == expected {
            return;
        }
        trace!("{}: thread {} effective {} -> {}", P::NAME, thread, node.effective, expected);
        node.effective = expected;
        let waits_in = node.waits_in.clone();

        path.push(thread);
        for queue in waits_in {
            self.refresh_aggregate(queue);
            let next = self
                .queues
                .get(&queue)
                .filter(|n| n.transfers)
                .and_then(|n| n.holder);
            if let Some(holder) = next {
                self.propagate(holder, path);
            }
        }
        path.pop();
    }
}
