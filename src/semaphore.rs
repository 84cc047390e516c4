//! [`Semaphore`] and [`BoundedSemaphore`]: a counting token pool with its
//! own FIFO waiter queue, structurally identical to [`crate::Condition`]'s
//! but counting rather than broadcasting.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{ReleaseOverflowError, TryAcquireError};
use crate::scheduler::Scheduler;
use crate::waiter::{resolve_scheduler, Waiter, WaiterQueue};

/// A counting token pool. `acquire` suspends until a permit is available;
/// `release` returns one, waking the longest-waiting acquirer if any.
///
/// Like [`crate::Condition`], `try_acquire` does not check whether other
/// tasks are already parked waiting for a permit: a `try_acquire` racing
/// a queued `acquire` can win the permit first. This crate's Non-goals
/// exclude fairness beyond FIFO *within* a single waiter queue; this is
/// the same trade-off `asyncio.Semaphore` and `threading.Semaphore` make.
pub struct Semaphore {
    permits: Cell<usize>,
    waiters: WaiterQueue,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            permits: Cell::new(initial),
            waiters: WaiterQueue::new(),
            scheduler: None,
        }
    }

    pub fn with_scheduler(initial: usize, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            permits: Cell::new(initial),
            waiters: WaiterQueue::new(),
            scheduler: Some(scheduler),
        }
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        resolve_scheduler(&self.scheduler)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.get()
    }

    /// Derived strictly from `available_permits() > 0` at observation
    /// time, never cached: a `Semaphore` that has since been drained by a
    /// concurrent acquire reports `false` immediately, not on some later
    /// tick.
    pub fn is_locked(&self) -> bool {
        self.permits.get() == 0
    }

    fn try_claim(&self) -> bool {
        let current = self.permits.get();
        if current > 0 {
            self.permits.set(current - 1);
            true
        } else {
            false
        }
    }

    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        if self.try_claim() {
            Ok(SemaphorePermit { semaphore: self })
        } else {
            Err(TryAcquireError)
        }
    }

    pub fn acquire(&self, timeout: Option<Duration>) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            timeout,
            state: AcquireState::Unstarted,
        }
    }

    /// Return one permit to the pool, waking the longest-waiting acquirer
    /// (if any). The increment always happens; whether the wake actually
    /// lands on this permit or a racing `try_acquire` gets it first is the
    /// same best-effort fairness `acquire` itself already documents.
    pub fn release(&self) {
        self.permits.set(self.permits.get() + 1);
        self.waiters.notify(&self.scheduler(), 1);
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

enum AcquireState {
    Unstarted,
    Waiting(Rc<Waiter>),
}

/// Outcome of [`Semaphore::acquire`].
pub enum AcquireResult<'a> {
    Acquired(SemaphorePermit<'a>),
    TimedOut,
}

/// Future returned by [`Semaphore::acquire`].
pub struct Acquire<'a> {
    semaphore: &'a Semaphore,
    timeout: Option<Duration>,
    state: AcquireState,
}

impl<'a> Future for Acquire<'a> {
    type Output = AcquireResult<'a>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match &self.state {
                AcquireState::Unstarted => {
                    if self.semaphore.try_claim() {
                        return Poll::Ready(AcquireResult::Acquired(SemaphorePermit {
                            semaphore: self.semaphore,
                        }));
                    }
                    let scheduler = self.semaphore.scheduler();
                    let waiter = self.semaphore.waiters.push(&scheduler, self.timeout);
                    waiter.set_waker(cx.waker());
                    self.state = AcquireState::Waiting(waiter);
                }
                AcquireState::Waiting(waiter) => {
                    if waiter.is_expired() {
                        if waiter.is_timed_out() {
                            return Poll::Ready(AcquireResult::TimedOut);
                        }
                        if self.semaphore.try_claim() {
                            return Poll::Ready(AcquireResult::Acquired(SemaphorePermit {
                                semaphore: self.semaphore,
                            }));
                        }
                        // Woken, but another caller claimed the permit
                        // first; rejoin the back of the queue.
                        self.state = AcquireState::Unstarted;
                        continue;
                    }
                    waiter.set_waker(cx.waker());
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<'a> Drop for Acquire<'a> {
    fn drop(&mut self) {
        if let AcquireState::Waiting(waiter) = &self.state {
            if !waiter.is_expired() {
                self.semaphore
                    .waiters
                    .remove(&self.semaphore.scheduler(), waiter);
            }
        }
    }
}

/// RAII permit: returns its token to the semaphore it came from on drop.
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl<'a> Drop for SemaphorePermit<'a> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// A [`Semaphore`] with an immutable ceiling: `release` beyond the
/// starting value is a programmer error, not a silently absorbed no-op.
pub struct BoundedSemaphore {
    inner: Semaphore,
    initial_value: usize,
}

impl BoundedSemaphore {
    pub fn new(initial_value: usize) -> Self {
        Self {
            inner: Semaphore::new(initial_value),
            initial_value,
        }
    }

    pub fn with_scheduler(initial_value: usize, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Semaphore::with_scheduler(initial_value, scheduler),
            initial_value,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        self.inner.try_acquire()
    }

    pub fn acquire(&self, timeout: Option<Duration>) -> Acquire<'_> {
        self.inner.acquire(timeout)
    }

    /// Like [`Semaphore::release`], but refuses to push `available_permits`
    /// above `initial_value`.
    pub fn release(&self) -> Result<(), ReleaseOverflowError> {
        if self.inner.available_permits() >= self.initial_value {
            tracing::warn!(
                initial_value = self.initial_value,
                "BoundedSemaphore::release called past its initial value"
            );
            return Err(ReleaseOverflowError);
        }
        self.inner.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;

    #[test]
    fn try_acquire_respects_permit_count() {
        let s = Semaphore::new(2);
        let a = s.try_acquire().unwrap();
        let b = s.try_acquire().unwrap();
        assert!(s.try_acquire().is_err());

        drop(a);
        assert_eq!(s.available_permits(), 1);
        let c = s.try_acquire().unwrap();
        drop(b);
        drop(c);
        assert_eq!(s.available_permits(), 2);
    }

    #[test]
    fn acquire_on_zero_permits_parks_until_release() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let s = Semaphore::new(0);

        let mut f = Box::pin(s.acquire(None));
        assert!(matches!(
            crate::testing::poll_once(f.as_mut()),
            None
        ));

        s.release();
        sched.turn();
        match crate::testing::poll_once(f.as_mut()) {
            Some(AcquireResult::Acquired(_permit)) => {}
            other => panic!("expected Acquired, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn acquire_times_out_without_a_release() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let s = Semaphore::new(0);

        let mut f = Box::pin(s.acquire(Some(Duration::from_millis(5))));
        assert!(crate::testing::poll_once(f.as_mut()).is_none());

        sched.advance(Duration::from_millis(5));
        sched.turn();
        assert!(matches!(
            crate::testing::poll_once(f.as_mut()),
            Some(AcquireResult::TimedOut)
        ));
    }

    #[test]
    fn bounded_semaphore_rejects_release_past_initial_value() {
        let bs = BoundedSemaphore::new(1);
        let permit = bs.try_acquire().unwrap();
        drop(permit);
        assert_eq!(bs.release(), Err(ReleaseOverflowError));
    }
}
