//! Host simulation of a uniprocessor.
//!
//! Every simulated thread runs on its own OS thread, but only the holder of
//! the baton executes. A thread gives the baton away only at the scheduler's
//! suspension points (block, yield, finish), and the next holder is always
//! chosen by the kernel's policy from the ready queue. The observable
//! interleaving is therefore exactly the one a single CPU running this
//! scheduler would produce.
//!
//! Lock order is always the kernel's critical section first, then the baton.

use super::{Dispatcher, JoinHandle, ThreadBuilder, ThreadId, ThreadState};
use crate::arch::NoOpArch;
use crate::errors::{fatal, PreconditionError};
use crate::kernel::{CriticalSection, Kernel};
use crate::sched::{Policy, QueueId};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use log::{debug, warn};
use std::format;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Per-thread bookkeeping of the simulated machine.
struct SimThread {
    name: String,
    state: ThreadState,
    /// A wake-up arrived while the thread was still running
    wake_pending: bool,
    /// Queue joiners wait in; held by the thread until it finishes
    join_queue: QueueId,
}

/// Who may run, plus everything the switch logic needs to decide it.
struct Baton {
    running: Option<ThreadId>,
    threads: BTreeMap<ThreadId, SimThread>,
    halted: Option<String>,
    switches: u64,
}

impl Baton {
    fn thread(&self, id: ThreadId) -> &SimThread {
        match self.threads.get(&id) {
            Some(thread) => thread,
            None => fatal(Err(PreconditionError::UnknownThread(id).into())),
        }
    }

    fn thread_mut(&mut self, id: ThreadId) -> &mut SimThread {
        match self.threads.get_mut(&id) {
            Some(thread) => thread,
            None => fatal(Err(PreconditionError::UnknownThread(id).into())),
        }
    }
}

/// A simulated uniprocessor driven by a donation-aware scheduler.
///
/// The thread that creates the machine becomes its `main` thread and is
/// running when [`Machine::new`] returns.
pub struct Machine<P: Policy> {
    kernel: Kernel<NoOpArch, P>,
    ready_queue: QueueId,
    baton: Mutex<Baton>,
    turn: Condvar,
}

impl<P: Policy + 'static> Machine<P> {
    /// Create a machine whose calling thread becomes `main`.
    pub fn new(policy: P) -> Arc<Self> {
        let kernel = Kernel::new(policy);
        let ready_queue = kernel.new_queue(false);
        let main = kernel.next_thread_id();
        let join_queue = kernel.new_queue(true);
        kernel.atomic().acquire(join_queue, main);

        let mut threads = BTreeMap::new();
        threads.insert(
            main,
            SimThread {
                name: "main".to_string(),
                state: ThreadState::Running,
                wake_pending: false,
                join_queue,
            },
        );
        debug!("machine: {} started as main", main);

        Arc::new(Self {
            kernel,
            ready_queue,
            baton: Mutex::new(Baton {
                running: Some(main),
                threads,
                halted: None,
                switches: 0,
            }),
            turn: Condvar::new(),
        })
    }

    /// Start configuring a new simulated thread.
    pub fn builder(self: &Arc<Self>) -> ThreadBuilder<P> {
        ThreadBuilder::new(Arc::clone(self))
    }

    /// Spawn an unnamed thread with the default priority.
    ///
    /// The thread is made ready but does not run until the caller yields or
    /// blocks.
    pub fn spawn<F>(self: &Arc<Self>, f: F) -> io::Result<JoinHandle<P>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.builder().spawn(f)
    }

    pub(crate) fn spawn_named<F>(
        self: &Arc<Self>,
        name: Option<String>,
        priority: Option<u64>,
        f: F,
    ) -> io::Result<JoinHandle<P>>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.kernel.next_thread_id();
        let name = name.unwrap_or_else(|| format!("thread-{}", id));

        let join_queue = {
            let mut cs = self.kernel.atomic();
            if let Some(priority) = priority {
                cs.set_priority(id, priority);
            }
            let join_queue = cs.new_queue(true);
            cs.acquire(join_queue, id);
            self.lock_baton().threads.insert(
                id,
                SimThread {
                    name: name.clone(),
                    state: ThreadState::Blocked,
                    wake_pending: false,
                    join_queue,
                },
            );
            join_queue
        };

        let machine = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || machine.run_thread(id, f));
        if let Err(err) = spawned {
            let mut cs = self.kernel.atomic();
            cs.retire_queue(join_queue);
            cs.retire_thread(id);
            self.lock_baton().threads.remove(&id);
            return Err(err);
        }

        let mut cs = self.kernel.atomic();
        let mut baton = self.lock_baton();
        self.ready_locked(&mut cs, &mut baton, id);
        debug!("machine: spawned {} ({})", id, name);

        Ok(JoinHandle::new(Arc::clone(self), id, join_queue))
    }

    /// The kernel driving this machine.
    pub fn kernel(&self) -> &Kernel<NoOpArch, P> {
        &self.kernel
    }

    /// The ready queue all runnable threads wait in.
    pub fn ready_queue(&self) -> QueueId {
        self.ready_queue
    }

    /// The thread holding the baton.
    pub fn current(&self) -> ThreadId {
        match self.lock_baton().running {
            Some(id) => id,
            None => panic!("no simulated thread is running"),
        }
    }

    /// Lifecycle state of `thread`, if the machine knows it.
    pub fn state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.lock_baton().threads.get(&thread).map(|t| t.state)
    }

    /// Name given to `thread` at spawn time.
    pub fn name(&self, thread: ThreadId) -> Option<String> {
        self.lock_baton().threads.get(&thread).map(|t| t.name.clone())
    }

    /// Number of baton hand-overs so far.
    pub fn switches(&self) -> u64 {
        self.lock_baton().switches
    }

    /// Set a thread's base priority (or tickets).
    pub fn set_priority(&self, thread: ThreadId, value: u64) {
        self.kernel.set_priority(thread, value)
    }

    /// Give up the CPU.
    ///
    /// The caller goes back into the ready queue and the policy picks the
    /// next runner, which may be the caller itself.
    pub fn yield_now(&self) {
        let mut cs = self.kernel.atomic();
        let mut baton = self.lock_baton();
        let me = match baton.running {
            Some(id) => id,
            None => panic!("yield outside of a simulated thread"),
        };
        baton.thread_mut(me).state = ThreadState::Ready;
        cs.wait_for_access(self.ready_queue, me);
        self.switch(cs, baton, me);
    }

    fn lock_baton(&self) -> MutexGuard<'_, Baton> {
        self.baton.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `me` holds the baton.
    fn wait_for_turn<'a>(&self, me: ThreadId, mut baton: MutexGuard<'a, Baton>) -> MutexGuard<'a, Baton> {
        loop {
            if let Some(reason) = baton.halted.clone() {
                drop(baton);
                panic!("machine halted: {}", reason);
            }
            if baton.running == Some(me) {
                return baton;
            }
            baton = self.turn.wait(baton).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn ready_locked(&self, cs: &mut CriticalSection<'_, NoOpArch, P>, baton: &mut Baton, thread: ThreadId) {
        let entry = baton.thread_mut(thread);
        match entry.state {
            ThreadState::Blocked => {
                entry.state = ThreadState::Ready;
                cs.wait_for_access(self.ready_queue, thread);
            }
            ThreadState::Running => entry.wake_pending = true,
            ThreadState::Ready => {}
            ThreadState::Finished => {
                warn!("machine: ready on finished thread {}", thread);
                panic!("thread {} readied after it finished", thread);
            }
        }
    }

    /// Hand the baton to the next ready thread, then wait for it to come
    /// back unless `me` has finished.
    fn switch(&self, mut cs: CriticalSection<'_, NoOpArch, P>, mut baton: MutexGuard<'_, Baton>, me: ThreadId) {
        match cs.next_thread(self.ready_queue) {
            Some(next) => {
                baton.thread_mut(next).state = ThreadState::Running;
                baton.running = Some(next);
                baton.switches += 1;
                debug!("machine: switch {} -> {}", me, next);
            }
            None => {
                baton.running = None;
                let blocked: Vec<String> = baton
                    .threads
                    .iter()
                    .filter(|(_, t)| t.state == ThreadState::Blocked)
                    .map(|(id, t)| format!("{} ({})", id, t.name))
                    .collect();
                if !blocked.is_empty() {
                    let reason = format!("deadlock, blocked: {}", blocked.join(", "));
                    warn!("machine: {}", reason);
                    baton.halted = Some(reason);
                } else {
                    debug!("machine: idle");
                }
            }
        }
        drop(cs);
        self.turn.notify_all();

        if baton.thread(me).state != ThreadState::Finished {
            drop(self.wait_for_turn(me, baton));
        }
    }

    fn run_thread<F>(self: Arc<Self>, me: ThreadId, f: F)
    where
        F: FnOnce(),
    {
        drop(self.wait_for_turn(me, self.lock_baton()));
        debug!("machine: {} running", me);
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => self.finish(me),
            Err(payload) => self.halt(me, payload),
        }
    }

    /// Wake every joiner and retire the thread's scheduling state.
    fn finish(&self, me: ThreadId) {
        let mut cs = self.kernel.atomic();
        let mut baton = self.lock_baton();
        let join_queue = baton.thread(me).join_queue;
        baton.thread_mut(me).state = ThreadState::Finished;

        while let Some(joiner) = cs.next_thread(join_queue) {
            self.ready_locked(&mut cs, &mut baton, joiner);
        }
        cs.retire_queue(join_queue);
        cs.retire_thread(me);
        debug!("machine: {} finished", me);

        self.switch(cs, baton, me);
    }

    fn halt(&self, me: ThreadId, payload: Box<dyn Any + Send>) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());

        let mut baton = self.lock_baton();
        let reason = format!("thread {} ({}) panicked: {}", me, baton.thread(me).name, message);
        warn!("machine: {}", reason);
        baton.thread_mut(me).state = ThreadState::Finished;
        baton.running = None;
        baton.halted = Some(reason);
        drop(baton);
        self.turn.notify_all();
    }
}

impl<P: Policy + 'static> Dispatcher for Machine<P> {
    type Arch = NoOpArch;
    type Policy = P;

    fn kernel(&self) -> &Kernel<NoOpArch, P> {
        &self.kernel
    }

    fn current(&self) -> ThreadId {
        Machine::current(self)
    }

    fn ready(&self, cs: &mut CriticalSection<'_, NoOpArch, P>, thread: ThreadId) {
        let mut baton = self.lock_baton();
        self.ready_locked(cs, &mut baton, thread);
    }

    fn block(&self, cs: CriticalSection<'_, NoOpArch, P>) {
        let mut baton = self.lock_baton();
        let me = match baton.running {
            Some(id) => id,
            None => panic!("block outside of a simulated thread"),
        };
        let entry = baton.thread_mut(me);
        if entry.wake_pending {
            entry.wake_pending = false;
            return;
        }
        entry.state = ThreadState::Blocked;
        self.switch(cs, baton, me);
    }
}
