//! Scheduling policy trait shared by the priority and lottery schedulers.

use crate::thread::ThreadId;

/// A waiting thread as seen by a policy at the moment of selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// The waiting thread
    pub thread: ThreadId,
    /// Its effective priority or ticket count, donations included
    pub effective: u64,
}

/// Selection and donation rules of a scheduler.
///
/// The donation graph is policy-agnostic: it tracks who holds and who waits
/// for which queue and asks the policy two questions. How do a thread's base
/// value and the values donated to it combine, and which waiter gets a queue
/// next.
pub trait Policy: Send {
    /// Smallest base value `set_priority` accepts.
    const MIN: u64;

    /// Largest base value `set_priority` accepts.
    const MAX: u64;

    /// Base value of a thread on its first contact with the scheduler.
    const DEFAULT: u64;

    /// Short name used in log output.
    const NAME: &'static str;

    /// Combine a thread's base value with the effective values of every
    /// thread waiting in a transferring queue it holds.
    fn donate<I>(base: u64, donations: I) -> u64
    where
        I: Iterator<Item = u64>;

    /// Select the next holder among `waiting`.
    ///
    /// `waiting` is in arrival order. `total` is the queue's running sum of
    /// the candidates' effective values.
    ///
    /// # Returns
    ///
    /// Index into `waiting` of the winner, or `None` if the policy cannot
    /// pick one (which the graph reports as an internal inconsistency).
    fn pick(&mut self, waiting: &[Candidate], total: u64) -> Option<usize>;
}

/// Priority levels of the priority scheduler.
pub mod priority {
    /// Lowest priority a thread can have
    pub const MIN: u64 = 0;

    /// Priority of a thread that never had one assigned
    pub const DEFAULT: u64 = 1;

    /// Highest priority a thread can have
    pub const MAX: u64 = 7;
}

/// Ticket bounds of the lottery scheduler.
pub mod tickets {
    /// Every thread holds at least one ticket
    pub const MIN: u64 = 1;

    /// Tickets of a thread that never had any assigned
    pub const DEFAULT: u64 = 1;

    /// Upper bound; donated sums saturate here
    pub const MAX: u64 = u64::MAX;
}
