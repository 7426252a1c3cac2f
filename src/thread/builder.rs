use super::{JoinHandle, Machine};
use crate::sched::Policy;
use alloc::string::String;
use alloc::sync::Arc;
use std::io;

/// Configuration for a simulated thread.
pub struct ThreadBuilder<P: Policy> {
    machine: Arc<Machine<P>>,
    priority: Option<u64>,
    name: Option<String>,
}

impl<P: Policy + 'static> ThreadBuilder<P> {
    pub fn new(machine: Arc<Machine<P>>) -> Self {
        Self {
            machine,
            priority: None,
            name: None,
        }
    }

    /// Base priority, or tickets under the lottery policy.
    ///
    /// Out-of-range values are fatal at spawn time.
    pub fn priority(mut self, priority: u64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Create the thread and make it ready.
    ///
    /// Fails only if the host refuses to start another OS thread.
    pub fn spawn<F>(self, f: F) -> io::Result<JoinHandle<P>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.machine.spawn_named(self.name, self.priority, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{LotteryPolicy, PriorityPolicy};

    #[test]
    fn test_builder_sets_name_and_priority() {
        let machine = Machine::new(PriorityPolicy::new());
        let handle = machine
            .builder()
            .name("worker")
            .priority(6)
            .spawn(|| {})
            .unwrap();

        let id = handle.thread_id();
        assert_eq!(machine.name(id).as_deref(), Some("worker"));
        assert_eq!(machine.kernel().priority(id), 6);
        handle.join();
    }

    #[test]
    fn test_builder_defaults() {
        let machine = Machine::new(LotteryPolicy::with_seed(5));
        let handle = machine.builder().spawn(|| {}).unwrap();
        let id = handle.thread_id();
        assert_eq!(machine.kernel().priority(id), 1);
        assert!(machine.name(id).unwrap().starts_with("thread-"));
        handle.join();
    }

    #[test]
    #[should_panic(expected = "priority 9 outside [0, 7]")]
    fn test_out_of_range_priority_is_fatal() {
        let machine = Machine::new(PriorityPolicy::new());
        let _ = machine.builder().priority(9).spawn(|| {});
    }
}
