//! Scheduling scenarios across the kernel, the sync primitives and the
//! simulated machine.

use super::helpers::{tid, EventLog};
use crate::arch::NoOpArch;
use crate::kernel::Kernel;
use crate::sched::{LotteryPolicy, PriorityPolicy};
use crate::sync::{Condition, Lock};
use crate::thread::{JoinHandle, Machine, ThreadState};
use alloc::sync::Arc;
use alloc::vec::Vec;
use portable_atomic::{AtomicU64, Ordering};

type PriorityMachine = Machine<PriorityPolicy>;

#[test]
fn test_transitive_donation_and_reversion() {
    let kernel = Kernel::<NoOpArch, _>::new(PriorityPolicy::new());
    let (low, mid, high) = (tid(1), tid(2), tid(3));
    let q1 = kernel.new_queue(true);
    let q2 = kernel.new_queue(true);
    kernel.set_priority(high, 7);
    kernel.set_priority(mid, 3);

    let mut cs = kernel.atomic();
    cs.acquire(q1, low);
    cs.acquire(q2, mid);
    cs.wait_for_access(q1, mid);
    cs.wait_for_access(q2, high);
    assert_eq!(cs.effective_priority(mid), 7);
    assert_eq!(cs.effective_priority(low), 7);

    // High gives up waiting: both donations unwind
    cs.acquire(q2, high);
    assert_eq!(cs.effective_priority(mid), 3);
    assert_eq!(cs.effective_priority(low), 3);

    // Low hands q1 to mid and is back to its own priority
    assert_eq!(cs.next_thread(q1), Some(mid));
    assert_eq!(cs.effective_priority(low), 1);
    cs.audit().unwrap();
}

#[test]
fn test_priority_ties_go_to_earliest_arrival() {
    let kernel = Kernel::<NoOpArch, _>::new(PriorityPolicy::new());
    let q = kernel.new_queue(true);
    let mut cs = kernel.atomic();
    for id in [4, 2, 3] {
        cs.set_priority(tid(id), 5);
        cs.wait_for_access(q, tid(id));
    }
    cs.set_priority(tid(9), 4);
    cs.wait_for_access(q, tid(9));

    assert_eq!(cs.next_thread(q), Some(tid(4)));
    assert_eq!(cs.next_thread(q), Some(tid(2)));
    assert_eq!(cs.next_thread(q), Some(tid(3)));
    assert_eq!(cs.next_thread(q), Some(tid(9)));
    assert_eq!(cs.next_thread(q), None);
}

#[test]
fn test_lottery_fairness_over_many_draws() {
    let kernel = Kernel::<NoOpArch, _>::new(LotteryPolicy::with_seed(2024));
    let q = kernel.new_queue(false);
    let threads = [(tid(1), 10), (tid(2), 20), (tid(3), 70)];

    let mut cs = kernel.atomic();
    for (thread, tickets) in threads {
        cs.set_priority(thread, tickets);
        cs.wait_for_access(q, thread);
    }

    let trials = 10_000;
    let mut wins = [0u32; 3];
    for _ in 0..trials {
        assert_eq!(cs.aggregate(q), 100);
        let winner = cs.next_thread(q).unwrap();
        wins[winner.get() - 1] += 1;
        cs.wait_for_access(q, winner);
    }

    for (count, (_, tickets)) in wins.iter().zip(threads) {
        let share = f64::from(*count) / f64::from(trials);
        let expected = tickets as f64 / 100.0;
        assert!(
            (share - expected).abs() < 0.02,
            "share {} too far from {}",
            share,
            expected
        );
    }
}

#[test]
fn test_lock_donation_inverts_medium_and_low() {
    let machine = Machine::new(PriorityPolicy::new());
    let main = machine.current();
    machine.set_priority(main, 0);

    let lock = Arc::new(Lock::new(Arc::clone(&machine)));
    let log = EventLog::new();
    let spawned: Arc<spin::Mutex<Vec<JoinHandle<PriorityPolicy>>>> = Arc::default();

    let low = machine
        .builder()
        .name("low")
        .priority(1)
        .spawn({
            let (machine, lock, log, spawned) =
                (Arc::clone(&machine), Arc::clone(&lock), log.clone(), Arc::clone(&spawned));
            move || {
                let me = machine.current();
                lock.acquire();
                log.record("low:acquired");

                let high = machine
                    .builder()
                    .name("high")
                    .priority(7)
                    .spawn({
                        let (lock, log) = (Arc::clone(&lock), log.clone());
                        move || {
                            log.record("high:start");
                            lock.acquire();
                            log.record("high:acquired");
                            lock.release();
                        }
                    })
                    .unwrap();
                let medium = machine
                    .builder()
                    .name("medium")
                    .priority(4)
                    .spawn({
                        let log = log.clone();
                        move || log.record("medium:run")
                    })
                    .unwrap();
                spawned.lock().extend([high, medium]);

                // High runs, blocks on the lock and lends us priority 7
                machine.yield_now();
                assert_eq!(machine.kernel().effective_priority(me), 7);
                assert_eq!(lock.waiting_count(), 1);

                log.record("low:releasing");
                lock.release();
                assert_eq!(machine.kernel().effective_priority(me), 1);
                log.record("low:done");
            }
        })
        .unwrap();

    // Everything above priority 0 runs before main gets the CPU back
    machine.yield_now();
    low.join();
    let rest: Vec<_> = spawned.lock().drain(..).collect();
    for handle in rest {
        handle.join();
    }

    assert_eq!(
        log.events(),
        ["low:acquired", "high:start", "low:releasing", "low:done", "high:acquired", "medium:run"]
    );
    machine.kernel().atomic().audit().unwrap();
}

fn sleeper_and_waker(machine: &Arc<PriorityMachine>, log: &EventLog, waker_yields: bool) {
    let lock = Arc::new(Lock::new(Arc::clone(machine)));
    let cond = Arc::new(Condition::new(Arc::clone(&lock)));

    let sleeper = machine
        .builder()
        .name("x")
        .priority(5)
        .spawn({
            let (lock, cond, log) = (Arc::clone(&lock), Arc::clone(&cond), log.clone());
            move || {
                lock.acquire();
                log.record("x:sleep");
                cond.sleep();
                assert!(lock.is_held_by_current_thread());
                log.record("x:woke");
                lock.release();
            }
        })
        .unwrap();

    let waker = machine
        .builder()
        .name("y")
        .priority(3)
        .spawn({
            let (machine, lock, cond, log) =
                (Arc::clone(machine), Arc::clone(&lock), Arc::clone(&cond), log.clone());
            move || {
                let me = machine.current();
                lock.acquire();
                log.record("y:wake");
                assert!(cond.wake());
                if waker_yields {
                    // The sleeper runs, finds the lock taken and donates
                    machine.yield_now();
                    assert_eq!(machine.kernel().effective_priority(me), 5);
                    assert_eq!(lock.waiting_count(), 1);
                    log.record("y:holding");
                }
                lock.release();
                log.record("y:done");
            }
        })
        .unwrap();

    sleeper.join();
    waker.join();
}

#[test]
fn test_condition_wake_is_not_lost() {
    let machine = Machine::new(PriorityPolicy::new());
    let log = EventLog::new();
    sleeper_and_waker(&machine, &log, false);
    assert_eq!(log.events(), ["x:sleep", "y:wake", "y:done", "x:woke"]);
}

#[test]
fn test_woken_sleeper_reacquires_lock_from_waker() {
    let machine = Machine::new(PriorityPolicy::new());
    let log = EventLog::new();
    sleeper_and_waker(&machine, &log, true);
    assert_eq!(log.events(), ["x:sleep", "y:wake", "y:holding", "y:done", "x:woke"]);
}

#[test]
fn test_wake_all_drains_every_sleeper() {
    let machine = Machine::new(PriorityPolicy::new());
    let lock = Arc::new(Lock::new(Arc::clone(&machine)));
    let cond = Arc::new(Condition::new(Arc::clone(&lock)));
    let woken = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (lock, cond, woken) = (Arc::clone(&lock), Arc::clone(&cond), Arc::clone(&woken));
            machine
                .builder()
                .priority(2)
                .spawn(move || {
                    lock.acquire();
                    cond.sleep();
                    woken.fetch_add(1, Ordering::SeqCst);
                    lock.release();
                })
                .unwrap()
        })
        .collect();

    // All four run and fall asleep before main is picked again
    machine.yield_now();
    lock.acquire();
    assert_eq!(cond.waiting_count(), 4);
    assert_eq!(cond.wake_all(), 4);
    assert_eq!(cond.waiting_count(), 0);
    for handle in &handles {
        assert_eq!(machine.state(handle.thread_id()), Some(ThreadState::Ready));
    }
    // Readied, not run
    assert_eq!(woken.load(Ordering::SeqCst), 0);
    lock.release();

    for handle in handles {
        handle.join();
    }
    assert_eq!(woken.load(Ordering::SeqCst), 4);
}

#[test]
fn test_join_donates_to_joined_thread() {
    let machine = Machine::new(PriorityPolicy::new());
    let main = machine.current();
    machine.set_priority(main, 5);
    let log = EventLog::new();
    let seen = Arc::new(AtomicU64::new(0));

    let low = machine
        .builder()
        .name("low")
        .priority(2)
        .spawn({
            let (machine, log, seen) = (Arc::clone(&machine), log.clone(), Arc::clone(&seen));
            move || {
                let me = machine.current();
                seen.store(machine.kernel().effective_priority(me), Ordering::SeqCst);
                log.record("low");
            }
        })
        .unwrap();
    let medium = machine
        .builder()
        .name("medium")
        .priority(3)
        .spawn({
            let log = log.clone();
            move || log.record("medium")
        })
        .unwrap();

    low.join();
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    medium.join();
    assert_eq!(log.events(), ["low", "medium"]);
}

#[test]
fn test_lottery_lock_holder_collects_waiter_tickets() {
    let machine = Machine::new(LotteryPolicy::with_seed(17));
    let main = machine.current();
    let lock = Arc::new(Lock::new(Arc::clone(&machine)));
    lock.acquire();

    let handles: Vec<_> = [10, 20]
        .into_iter()
        .map(|tickets| {
            let lock = Arc::clone(&lock);
            machine
                .builder()
                .priority(tickets)
                .spawn(move || {
                    lock.acquire();
                    lock.release();
                })
                .unwrap()
        })
        .collect();

    while lock.waiting_count() < 2 {
        machine.yield_now();
    }
    assert_eq!(machine.kernel().effective_priority(main), 31);
    assert_eq!(machine.kernel().priority(main), 1);

    lock.release();
    assert_eq!(machine.kernel().effective_priority(main), 1);
    for handle in handles {
        handle.join();
    }
    machine.kernel().atomic().audit().unwrap();
}
