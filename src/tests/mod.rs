//! Crate-level test suites: scheduling scenarios on the simulated machine
//! and randomized invariant checks on the donation graph.

mod helpers;
mod integration;
