//! Mutual-exclusion lock with priority donation.

use crate::errors::{fatal, PreconditionError};
use crate::kernel::CriticalSection;
use crate::sched::QueueId;
use crate::thread::{Dispatcher, ThreadId};
use alloc::sync::Arc;
use log::debug;

/// A lock whose waiters donate to its owner.
///
/// Releasing hands the lock directly to the waiter the policy picks, so a
/// woken waiter never has to compete for it again.
pub struct Lock<D: Dispatcher> {
    dispatcher: Arc<D>,
    queue: QueueId,
}

impl<D: Dispatcher> Lock<D> {
    pub fn new(dispatcher: Arc<D>) -> Self {
        let queue = dispatcher.kernel().new_queue(true);
        Self { dispatcher, queue }
    }

    /// Take the lock, blocking while another thread owns it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already owns the lock.
    pub fn acquire(&self) {
        let me = self.dispatcher.current();
        let mut cs = self.dispatcher.kernel().atomic();
        if cs.holder(self.queue) == Some(me) {
            fatal::<()>(Err(PreconditionError::AlreadyHolder {
                queue: self.queue,
                thread: me,
            }
            .into()));
        }
        loop {
            match cs.holder(self.queue) {
                Some(holder) if holder == me => return,
                None => {
                    cs.acquire(self.queue, me);
                    return;
                }
                Some(_) => {
                    cs.wait_for_access(self.queue, me);
                    self.dispatcher.block(cs);
                    cs = self.dispatcher.kernel().atomic();
                }
            }
        }
    }

    /// Give the lock up.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not own the lock.
    pub fn release(&self) {
        let me = self.dispatcher.current();
        let mut cs = self.dispatcher.kernel().atomic();
        self.release_in(&mut cs, me);
    }

    /// Release on behalf of `me` inside an existing critical section.
    pub(crate) fn release_in(&self, cs: &mut CriticalSection<'_, D::Arch, D::Policy>, me: ThreadId) {
        if cs.holder(self.queue) != Some(me) {
            fatal::<()>(Err(PreconditionError::NotHolder {
                queue: self.queue,
                thread: me,
            }
            .into()));
        }
        match cs.next_thread(self.queue) {
            Some(next) => {
                debug!("lock {}: {} hands over to {}", self.queue, me, next);
                self.dispatcher.ready(cs, next);
            }
            None => cs.release(self.queue, me),
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let me = self.dispatcher.current();
        self.holder() == Some(me)
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.dispatcher.kernel().atomic().holder(self.queue)
    }

    /// Number of threads blocked on the lock.
    pub fn waiting_count(&self) -> usize {
        self.dispatcher.kernel().atomic().waiting_len(self.queue)
    }

    pub fn dispatcher(&self) -> &Arc<D> {
        &self.dispatcher
    }

    /// The transferring queue backing this lock.
    pub fn queue(&self) -> QueueId {
        self.queue
    }
}

impl<D: Dispatcher> Drop for Lock<D> {
    fn drop(&mut self) {
        self.dispatcher.kernel().retire_queue(self.queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::PriorityPolicy;
    use crate::thread::Machine;

    #[test]
    fn test_uncontended_acquire_and_release() {
        let machine = Machine::new(PriorityPolicy::new());
        let lock = Lock::new(Arc::clone(&machine));
        assert_eq!(lock.holder(), None);

        lock.acquire();
        assert!(lock.is_held_by_current_thread());
        assert_eq!(lock.waiting_count(), 0);

        lock.release();
        assert_eq!(lock.holder(), None);
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    #[should_panic(expected = "already holds queue")]
    fn test_recursive_acquire_is_fatal() {
        let machine = Machine::new(PriorityPolicy::new());
        let lock = Lock::new(machine);
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "does not hold queue")]
    fn test_release_by_non_holder_is_fatal() {
        let machine = Machine::new(PriorityPolicy::new());
        let lock = Lock::new(machine);
        lock.release();
    }

    #[test]
    fn test_drop_retires_queue() {
        let machine = Machine::new(PriorityPolicy::new());
        let before = machine.kernel().atomic().queue_count();
        {
            let _lock = Lock::new(Arc::clone(&machine));
            assert_eq!(machine.kernel().atomic().queue_count(), before + 1);
        }
        assert_eq!(machine.kernel().atomic().queue_count(), before);
    }
}
