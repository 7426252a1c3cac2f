//! Test helper utilities and common functionality.

use crate::thread::ThreadId;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

pub(crate) fn tid(id: usize) -> ThreadId {
    ThreadId::new(id)
}

/// Ordered record of what simulated threads did.
///
/// Only one simulated thread runs at a time, so the order of entries is the
/// scheduling order.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<spin::Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: &str) {
        self.0.lock().push(event.to_string());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Simple linear congruential generator for property testing.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        // High bits of an LCG are the well-mixed ones
        self.state >> 33
    }

    /// Uniform-ish value in `[min, max)`.
    pub(crate) fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        min + (self.next_u64() % (max - min))
    }

    pub(crate) fn gen_bool(&mut self) -> bool {
        self.next_u64() & 1 == 0
    }

    /// Pick an element of a non-empty slice.
    pub(crate) fn choose<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.gen_range(0, items.len() as u64) as usize]
    }
}

#[test]
fn test_event_log_keeps_order() {
    let log = EventLog::new();
    let other = log.clone();
    log.record("a");
    other.record("b");
    assert_eq!(log.events(), ["a", "b"]);
}

#[test]
fn test_simple_rng_range() {
    let mut rng = SimpleRng::new(7);
    for _ in 0..1000 {
        let value = rng.gen_range(3, 9);
        assert!((3..9).contains(&value));
    }
}
