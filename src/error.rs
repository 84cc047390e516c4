//! Error and result types shared across primitives.
//!
//! Mirrors `tokio`'s own convention for its `sync` errors
//! (`tokio::sync::AcquireError`, `TryAcquireError`, `oneshot::RecvError`):
//! small unit-like structs/enums with hand-written `Display`/`Error` impls,
//! no `anyhow`/`thiserror` dependency.

use std::fmt;

/// A relative-time wait did not resolve before its deadline.
///
/// Not an [`std::error::Error`] in most APIs here: it is one arm of a
/// result enum the caller is expected to match on, not a failure mode to
/// propagate with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait timed out")
    }
}

impl std::error::Error for TimedOut {}

/// Returned by [`crate::AsyncResult::try_get`] when the cell has not been
/// [`set`](crate::AsyncResult::set) yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotReadyError;

impl fmt::Display for NotReadyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncResult is not ready")
    }
}

impl std::error::Error for NotReadyError {}

/// Returned by [`crate::AsyncResult::set`] when the cell was already ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadySetError;

impl fmt::Display for AlreadySetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncResult is already set")
    }
}

impl std::error::Error for AlreadySetError {}

/// Returned by a queue's non-blocking `try_put` when there is no room and
/// no getter is waiting to rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

impl fmt::Display for Full {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl std::error::Error for Full {}

/// Returned by a queue's non-blocking `try_get` when there is nothing
/// buffered and no putter is waiting to rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Empty;

impl fmt::Display for Empty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is empty")
    }
}

impl std::error::Error for Empty {}

/// Returned by [`crate::JoinableQueue::task_done`] when called more times
/// than there are outstanding tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDoneError;

impl fmt::Display for TaskDoneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_done() called more times than there were pending tasks")
    }
}

impl std::error::Error for TaskDoneError {}

/// Returned by [`crate::BoundedSemaphore::release`] when releasing would
/// push the permit count above its configured initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOverflowError;

impl fmt::Display for ReleaseOverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "semaphore released more permits than its initial value allows")
    }
}

impl std::error::Error for ReleaseOverflowError {}

/// Returned by a semaphore's or lock's non-blocking `try_acquire` when no
/// permit is currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryAcquireError;

impl fmt::Display for TryAcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no permits available")
    }
}

impl std::error::Error for TryAcquireError {}
