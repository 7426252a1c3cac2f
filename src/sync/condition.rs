//! Condition variable over a [`Lock`].
//!
//! Sleepers wait in a non-transferring queue, so a thread sleeping on a
//! condition never donates to whoever happens to be woken first. Going to
//! sleep releases the lock, enters the queue and blocks inside one critical
//! section, which is what makes a `wake` issued right after the lock is
//! released impossible to miss.

use super::lock::Lock;
use crate::errors::{fatal, PreconditionError};
use crate::kernel::CriticalSection;
use crate::sched::QueueId;
use crate::thread::Dispatcher;
use alloc::sync::Arc;
use log::debug;

pub struct Condition<D: Dispatcher> {
    lock: Arc<Lock<D>>,
    queue: QueueId,
}

impl<D: Dispatcher> Condition<D> {
    /// Create a condition variable bound to `lock`.
    pub fn new(lock: Arc<Lock<D>>) -> Self {
        let queue = lock.dispatcher().kernel().new_queue(false);
        Self { lock, queue }
    }

    /// Release the lock, sleep until woken, then take the lock back.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not own the lock.
    pub fn sleep(&self) {
        let dispatcher = self.lock.dispatcher();
        let me = dispatcher.current();
        let mut cs = dispatcher.kernel().atomic();
        self.lock.release_in(&mut cs, me);
        cs.wait_for_access(self.queue, me);
        debug!("condition {}: {} sleeps", self.queue, me);
        dispatcher.block(cs);
        self.lock.acquire();
    }

    /// Wake one sleeper, if any.
    ///
    /// The woken thread becomes ready but runs only once the caller yields
    /// or blocks, and must then reacquire the lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not own the lock.
    pub fn wake(&self) -> bool {
        let mut cs = self.enter_holding_lock();
        self.wake_in(&mut cs)
    }

    /// Wake every sleeper; returns how many were woken.
    pub fn wake_all(&self) -> usize {
        let mut cs = self.enter_holding_lock();
        let mut woken = 0;
        while self.wake_in(&mut cs) {
            woken += 1;
        }
        woken
    }

    /// Number of threads asleep on this condition.
    pub fn waiting_count(&self) -> usize {
        self.lock.dispatcher().kernel().atomic().waiting_len(self.queue)
    }

    pub fn lock(&self) -> &Arc<Lock<D>> {
        &self.lock
    }

    fn enter_holding_lock(&self) -> CriticalSection<'_, D::Arch, D::Policy> {
        let dispatcher = self.lock.dispatcher();
        let me = dispatcher.current();
        let cs = dispatcher.kernel().atomic();
        if cs.holder(self.lock.queue()) != Some(me) {
            fatal::<()>(Err(PreconditionError::NotHolder {
                queue: self.lock.queue(),
                thread: me,
            }
            .into()));
        }
        cs
    }

    fn wake_in(&self, cs: &mut CriticalSection<'_, D::Arch, D::Policy>) -> bool {
        match cs.next_thread(self.queue) {
            Some(thread) => {
                // A sleeper never owns the condition queue
                cs.release(self.queue, thread);
                debug!("condition {}: wakes {}", self.queue, thread);
                self.lock.dispatcher().ready(cs, thread);
                true
            }
            None => false,
        }
    }
}

impl<D: Dispatcher> Drop for Condition<D> {
    fn drop(&mut self) {
        self.lock.dispatcher().kernel().retire_queue(self.queue);
    }
}
