//! Lottery scheduling with ticket donation.
//!
//! Each thread owns a number of tickets. Choosing the next holder of a queue
//! draws one ticket uniformly among all tickets of all waiters, so a waiter's
//! chance of winning is proportional to its share. Ticket counts can be
//! astronomically large, so no per-ticket state is ever materialized: the
//! winner is found by walking the waiters and subtracting their ticket
//! counts from the drawn number.
//!
//! Donation adds instead of taking the maximum. A holder runs with its own
//! tickets plus those of everyone waiting on it, transitively.

use super::trait_def::{tickets, Candidate, Policy};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Weighted random selection among waiters.
#[derive(Debug, Clone)]
pub struct LotteryPolicy {
    rng: SmallRng,
}

impl LotteryPolicy {
    /// Seed used by [`LotteryPolicy::new`].
    pub const DEFAULT_SEED: u64 = 0x6c6f_7474_6572_7921;

    /// Create a lottery policy with the default seed.
    ///
    /// There is no entropy source in the core, so two kernels built this way
    /// draw the same sequence of winners.
    pub fn new() -> Self {
        Self::with_seed(Self::DEFAULT_SEED)
    }

    /// Create a lottery policy whose draws are reproducible from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Draw a winning ticket number in `[1, total]`.
    pub fn draw(&mut self, total: u64) -> u64 {
        self.rng.gen_range(1..=total)
    }
}

impl Default for LotteryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate the owner of ticket number `ticket` among `waiting`.
///
/// Waiters are walked in slice order; each one's tickets are subtracted from
/// the remainder and the first to bring it to zero or below wins. With
/// tickets 10, 20 and 70 the ticket ranges are 1..=10, 11..=30 and 31..=100.
///
/// Returns `None` if `ticket` exceeds the tickets in play.
pub fn ticket_winner(waiting: &[Candidate], ticket: u64) -> Option<usize> {
    let mut remainder = ticket;
    for (index, candidate) in waiting.iter().enumerate() {
        if remainder <= candidate.effective {
            return Some(index);
        }
        remainder -= candidate.effective;
    }
    None
}

impl Policy for LotteryPolicy {
    const MIN: u64 = tickets::MIN;
    const MAX: u64 = tickets::MAX;
    const DEFAULT: u64 = tickets::DEFAULT;
    const NAME: &'static str = "lottery";

    fn donate<I>(base: u64, donations: I) -> u64
    where
        I: Iterator<Item = u64>,
    {
        donations.fold(base, u64::saturating_add)
    }

    fn pick(&mut self, waiting: &[Candidate], total: u64) -> Option<usize> {
        if waiting.is_empty() || total == 0 {
            return None;
        }
        let ticket = self.draw(total);
        ticket_winner(waiting, ticket)
    }
}
