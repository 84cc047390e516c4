//! Cooperative synchronization primitives for a single-threaded,
//! event-driven scheduler.
//!
//! Every blocking operation here returns a [`std::future::Future`] that
//! suspends cooperatively: there is no OS thread to block, and no
//! callback parameter to pass, the way an equivalent library built for a
//! callback-style runtime would require. A relative timeout is always an
//! `Option<Duration>`; a timed-out wait resolves to a dedicated
//! `TimedOut`-flavored variant of the operation's result rather than an
//! ambiguous sentinel value.
//!
//! None of the types in this crate implement `Send`/`Sync`: they assume
//! every entry point runs on the one thread that owns the scheduler (see
//! [`scheduler`]), and pay nothing for synchronization that single thread
//! does not need.
//!
//! # Module map
//!
//! - [`scheduler`]: the `Scheduler` trait every primitive suspends
//!   against, plus the bundled `LocalScheduler` reference implementation.
//! - [`error`]: the small error/result types returned by non-blocking
//!   (`try_*`) operations.
//! - [`Condition`] / [`Event`] / [`AsyncResult`]: the foundational
//!   waiter-broadcast primitives.
//! - [`Queue`] / [`PriorityQueue`] / [`LifoQueue`] / [`JoinableQueue`]:
//!   bounded producer/consumer queues with pluggable storage discipline.
//! - [`Semaphore`] / [`BoundedSemaphore`] / [`Lock`]: counting and
//!   mutual-exclusion primitives built on a waiter queue of their own.

mod condition;
mod event;
mod async_result;
mod queue;
mod joinable_queue;
mod semaphore;
mod lock;
mod waiter;

pub mod error;
pub mod scheduler;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use condition::{Condition, Wait};
pub use event::{Event, EventWait};
pub use async_result::{AsyncResult, Get as AsyncResultGet, GetResult as AsyncResultGetResult};
pub use queue::{
    Get as QueueGet, GetResult as QueueGetResult, LifoQueue, PriorityQueue, Put as QueuePut,
    PutResult, PutTimedOut, Queue,
};
pub use joinable_queue::JoinableQueue;
pub use semaphore::{Acquire, AcquireResult, BoundedSemaphore, Semaphore, SemaphorePermit};
pub use lock::{Lock, LockAcquire, LockAcquireResult, LockGuard};

/// Outcome of any plain (valueless) wait: [`Condition::wait`],
/// [`Event::wait`], [`JoinableQueue::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Woken by a matching `notify`/`set`/counter-reaching-zero.
    Notified,
    /// The relative deadline elapsed before a wake-up arrived.
    TimedOut,
}

impl WaitResult {
    pub fn is_notified(self) -> bool {
        matches!(self, WaitResult::Notified)
    }

    pub fn is_timed_out(self) -> bool {
        matches!(self, WaitResult::TimedOut)
    }
}
