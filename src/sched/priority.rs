//! Classic priority scheduling with priority donation.

use super::trait_def::{priority, Candidate, Policy};

pub use super::trait_def::priority::{DEFAULT, MAX, MIN};

/// Highest effective priority wins; among equals the earliest arrival wins.
///
/// A thread's effective priority is the maximum of its own priority and the
/// effective priorities of everyone waiting for a resource it holds, which
/// is the priority-inheritance rule that keeps a low-priority lock holder
/// from being starved by medium-priority threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityPolicy;

impl PriorityPolicy {
    /// Create a new priority policy.
    pub const fn new() -> Self {
        Self
    }
}

impl Policy for PriorityPolicy {
    const MIN: u64 = priority::MIN;
    const MAX: u64 = priority::MAX;
    const DEFAULT: u64 = priority::DEFAULT;
    const NAME: &'static str = "priority";

    fn donate<I>(base: u64, donations: I) -> u64
    where
        I: Iterator<Item = u64>,
    {
        donations.fold(base, u64::max)
    }

    fn pick(&mut self, waiting: &[Candidate], _total: u64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, candidate) in waiting.iter().enumerate() {
            // Strictly greater, so the first arrival keeps ties
            match best {
                Some(b) if waiting[b].effective >= candidate.effective => {}
                _ => best = Some(index),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadId;

    fn candidate(id: usize, effective: u64) -> Candidate {
        Candidate {
            thread: ThreadId::new(id),
            effective,
        }
    }

    #[test]
    fn test_donate_takes_maximum() {
        assert_eq!(PriorityPolicy::donate(1, [3, 6, 2].into_iter()), 6);
        assert_eq!(PriorityPolicy::donate(5, [3, 2].into_iter()), 5);
        assert_eq!(PriorityPolicy::donate(4, core::iter::empty()), 4);
    }

    #[test]
    fn test_pick_highest_then_earliest() {
        let mut policy = PriorityPolicy::new();
        let waiting = [candidate(1, 2), candidate(2, 5), candidate(3, 5), candidate(4, 1)];
        assert_eq!(policy.pick(&waiting, 13), Some(1));
    }

    #[test]
    fn test_pick_empty() {
        let mut policy = PriorityPolicy::new();
        assert_eq!(policy.pick(&[], 0), None);
    }
}
