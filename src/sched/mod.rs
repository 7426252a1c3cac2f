//! Scheduler core: the donation graph and the policies that drive it.
//!
//! Provides the priority and lottery schedulers, both running on the same
//! ownership graph and differing only in how donations combine and how the
//! next holder of a queue is chosen.

pub mod graph;
pub mod lottery;
pub mod priority;
pub mod trait_def;

pub use graph::{DonationGraph, QueueId};
pub use lottery::{ticket_winner, LotteryPolicy};
pub use priority::PriorityPolicy;
pub use trait_def::{tickets, Candidate, Policy};

/// Default scheduling policy.
pub type DefaultPolicy = PriorityPolicy;
