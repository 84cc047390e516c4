//! [`Lock`]: mutual exclusion around a protected value, built from a
//! [`Semaphore`] of one permit the same way `tokio::sync::Mutex` wraps its
//! own internal semaphore around an `UnsafeCell<T>`.

use std::cell::UnsafeCell;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::TryAcquireError;
use crate::scheduler::Scheduler;
use crate::semaphore::{Acquire, AcquireResult, Semaphore, SemaphorePermit};

/// A mutual-exclusion cell. Unlike [`Semaphore`], which only ever hands out
/// an empty permit token, `Lock<T>` gives the single current holder `&T`/
/// `&mut T` access to a payload, an ambient-stack addition over a bare
/// semaphore-of-one, grounded in how `tokio::sync::Mutex` itself is just
/// `Semaphore` plus an `UnsafeCell<T>`.
pub struct Lock<T> {
    semaphore: Semaphore,
    value: UnsafeCell<T>,
}

impl<T> Lock<T> {
    pub fn new(value: T) -> Self {
        Self {
            semaphore: Semaphore::new(1),
            value: UnsafeCell::new(value),
        }
    }

    pub fn with_scheduler(value: T, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            semaphore: Semaphore::with_scheduler(1, scheduler),
            value: UnsafeCell::new(value),
        }
    }

    /// `true` while some `LockGuard` is outstanding.
    pub fn is_locked(&self) -> bool {
        self.semaphore.is_locked()
    }

    pub fn try_acquire(&self) -> Result<LockGuard<'_, T>, TryAcquireError> {
        let permit = self.semaphore.try_acquire()?;
        Ok(LockGuard { permit, lock: self })
    }

    pub fn acquire(&self, timeout: Option<Duration>) -> LockAcquire<'_, T> {
        LockAcquire {
            lock: self,
            inner: self.semaphore.acquire(timeout),
        }
    }
}

/// Outcome of [`Lock::acquire`].
pub enum LockAcquireResult<'a, T> {
    Acquired(LockGuard<'a, T>),
    TimedOut,
}

/// Future returned by [`Lock::acquire`].
pub struct LockAcquire<'a, T> {
    lock: &'a Lock<T>,
    inner: Acquire<'a>,
}

impl<'a, T> Future for LockAcquire<'a, T> {
    type Output = LockAcquireResult<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(AcquireResult::TimedOut) => Poll::Ready(LockAcquireResult::TimedOut),
            Poll::Ready(AcquireResult::Acquired(permit)) => {
                Poll::Ready(LockAcquireResult::Acquired(LockGuard {
                    permit,
                    lock: this.lock,
                }))
            }
        }
    }
}

/// RAII access to the value behind a [`Lock`]. Releases the underlying
/// permit on drop, exactly like [`SemaphorePermit`].
pub struct LockGuard<'a, T> {
    permit: SemaphorePermit<'a>,
    lock: &'a Lock<T>,
}

impl<'a, T> Deref for LockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: only one `LockGuard` can exist at a time, enforced by the
        // one-permit semaphore `self.permit` holds a token from.
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> DerefMut for LockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: see `Deref` above.
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;

    #[test]
    fn try_acquire_then_mutate_then_release() {
        let lock = Lock::new(0);
        {
            let mut guard = lock.try_acquire().unwrap();
            *guard += 1;
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.try_acquire().unwrap(), 1);
    }

    #[test]
    fn second_try_acquire_fails_while_held() {
        let lock = Lock::new(());
        let _guard = lock.try_acquire().unwrap();
        assert_eq!(lock.try_acquire().err(), Some(TryAcquireError));
    }

    #[test]
    fn acquire_parks_until_the_holder_drops_its_guard() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let lock = Lock::new(10);

        let first = lock.try_acquire().unwrap();
        let mut second = Box::pin(lock.acquire(None));
        assert!(crate::testing::poll_once(second.as_mut()).is_none());

        drop(first);
        sched.turn();
        match crate::testing::poll_once(second.as_mut()) {
            Some(LockAcquireResult::Acquired(mut g)) => {
                *g += 1;
                assert_eq!(*g, 11);
            }
            _ => panic!("expected Acquired"),
        }
    }
}
