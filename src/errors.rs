//! Error types for scheduler and synchronization operations.
//!
//! Every violation the core can detect is described by [`SchedError`]. The
//! `try_*` operations on the donation graph hand these back to the caller;
//! the plain operations treat them as fatal and panic with the message, since
//! each one indicates a bug in the caller or in the scheduler itself rather
//! than a runtime condition worth recovering from.

#![allow(clippy::uninlined_format_args)]

use crate::sched::QueueId;
use crate::thread::ThreadId;
use core::fmt;
use log::warn;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Error type for all scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Precondition violations made by the caller
    Precondition(PreconditionError),
    /// Bookkeeping defects inside the donation graph
    Consistency(ConsistencyError),
}

/// Caller bugs: the operation was invoked in a state where it is not allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// Priority or ticket value outside the policy's range
    PriorityOutOfRange { value: u64, min: u64, max: u64 },
    /// Holder-only operation invoked by another thread
    NotHolder { queue: QueueId, thread: ThreadId },
    /// Thread tried to take a lock it already owns
    AlreadyHolder { queue: QueueId, thread: ThreadId },
    /// Queue id was never created or has been retired
    UnknownQueue(QueueId),
    /// Thread id is not known to the dispatcher
    UnknownThread(ThreadId),
    /// Thread was retired while still waiting for a resource
    StillWaiting { thread: ThreadId, queue: QueueId },
    /// The new edge would make a thread donate to itself
    DonationCycle { queue: QueueId, thread: ThreadId },
}

/// Internal consistency violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// Stored effective value does not match a fresh recomputation
    StaleEffective { thread: ThreadId, stored: u64, expected: u64 },
    /// Queue aggregate does not match the live sum of its waiters
    StaleAggregate { queue: QueueId, stored: u64, expected: u64 },
    /// Queue has waiters but the policy selected none of them
    NoWinner(QueueId),
    /// Thread and queue disagree about a wait or hold relation
    BrokenEdge { queue: QueueId, thread: ThreadId },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Precondition(e) => write!(f, "Precondition violated: {}", e),
            SchedError::Consistency(e) => write!(f, "Scheduler inconsistency: {}", e),
        }
    }
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionError::PriorityOutOfRange { value, min, max } => {
                write!(f, "priority {} outside [{}, {}]", value, min, max)
            }
            PreconditionError::NotHolder { queue, thread } => {
                write!(f, "thread {} does not hold queue {}", thread, queue)
            }
            PreconditionError::AlreadyHolder { queue, thread } => {
                write!(f, "thread {} already holds queue {}", thread, queue)
            }
            PreconditionError::UnknownQueue(queue) => write!(f, "unknown queue {}", queue),
            PreconditionError::UnknownThread(thread) => write!(f, "unknown thread {}", thread),
            PreconditionError::StillWaiting { thread, queue } => {
                write!(f, "thread {} retired while waiting in queue {}", thread, queue)
            }
            PreconditionError::DonationCycle { queue, thread } => {
                write!(f, "thread {} waiting on queue {} would close a donation cycle", thread, queue)
            }
        }
    }
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::StaleEffective { thread, stored, expected } => write!(
                f,
                "thread {} has effective value {} but donations give {}",
                thread, stored, expected
            ),
            ConsistencyError::StaleAggregate { queue, stored, expected } => write!(
                f,
                "queue {} aggregate is {} but waiters sum to {}",
                queue, stored, expected
            ),
            ConsistencyError::NoWinner(queue) => {
                write!(f, "queue {} has waiters but no winner was drawn", queue)
            }
            ConsistencyError::BrokenEdge { queue, thread } => {
                write!(f, "queue {} and thread {} disagree about their relation", queue, thread)
            }
        }
    }
}

impl From<PreconditionError> for SchedError {
    fn from(error: PreconditionError) -> Self {
        SchedError::Precondition(error)
    }
}

impl From<ConsistencyError> for SchedError {
    fn from(error: ConsistencyError) -> Self {
        SchedError::Consistency(error)
    }
}

impl SchedError {
    /// Whether this error blames the caller rather than the scheduler.
    pub fn is_precondition(&self) -> bool {
        matches!(self, SchedError::Precondition(_))
    }
}

/// Unwrap a scheduler result, treating any error as fatal.
#[track_caller]
pub(crate) fn fatal<T>(result: SchedResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!("fatal scheduler error: {}", err);
            panic!("{}", err)
        }
    }
}

#[cfg(any(test, feature = "std-shim"))]
impl std::error::Error for SchedError {}
