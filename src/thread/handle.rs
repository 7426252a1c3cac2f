use super::{Dispatcher, Machine, ThreadId, ThreadState};
use crate::sched::{Policy, QueueId};
use alloc::sync::Arc;

/// Handle for waiting on a simulated thread.
pub struct JoinHandle<P: Policy + 'static> {
    machine: Arc<Machine<P>>,
    thread: ThreadId,
    join_queue: QueueId,
}

impl<P: Policy + 'static> JoinHandle<P> {
    pub(super) fn new(machine: Arc<Machine<P>>, thread: ThreadId, join_queue: QueueId) -> Self {
        Self {
            machine,
            thread,
            join_queue,
        }
    }

    /// Block until the thread has finished.
    ///
    /// While waiting, the caller donates its priority (or tickets) to the
    /// thread being joined.
    pub fn join(self) {
        loop {
            let mut cs = self.machine.kernel().atomic();
            if self.machine.state(self.thread) == Some(ThreadState::Finished) {
                return;
            }
            let me = self.machine.current();
            cs.wait_for_access(self.join_queue, me);
            self.machine.block(cs);
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn is_finished(&self) -> bool {
        self.machine.state(self.thread) == Some(ThreadState::Finished)
    }
}
