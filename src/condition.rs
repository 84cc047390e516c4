//! [`Condition`]: an ordered queue of waiters with `notify`/`notify_all`,
//! the building block `Event` and `Semaphore` both layer on top of.

use std::rc::Rc;
use std::time::Duration;

use crate::scheduler::Scheduler;
use crate::waiter::{resolve_scheduler, Waiter, WaiterQueue};
use crate::WaitResult;

/// A FIFO queue of tasks waiting to be notified, independent of any
/// particular boolean condition. Unlike `std::sync::Condvar`, there is no
/// associated mutex: this crate has no concurrent mutation to guard
/// against, since everything runs on one scheduler thread.
pub struct Condition {
    waiters: WaiterQueue,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl Condition {
    /// Create a `Condition` that resolves its scheduler from the
    /// thread-local current one (see [`crate::scheduler::set_current`])
    /// the first time it needs one.
    pub fn new() -> Self {
        Self {
            waiters: WaiterQueue::new(),
            scheduler: None,
        }
    }

    /// Create a `Condition` bound to an explicitly injected scheduler,
    /// bypassing the thread-local lookup entirely.
    pub fn with_scheduler(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            waiters: WaiterQueue::new(),
            scheduler: Some(scheduler),
        }
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        resolve_scheduler(&self.scheduler)
    }

    /// Exposes the resolved scheduler to sibling modules (`Event`) that
    /// need to defer a wake-up by one turn without going through
    /// `notify`'s waiter-queue bookkeeping.
    pub(crate) fn scheduler_for_defer(&self) -> Rc<dyn Scheduler> {
        self.scheduler()
    }

    /// Number of tasks currently parked in `wait`, after pruning any that
    /// have already expired.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Suspend until `notify`/`notify_all` wakes this waiter, or `timeout`
    /// elapses first.
    pub fn wait(&self, timeout: Option<Duration>) -> Wait<'_> {
        Wait {
            condition: self,
            waiter: None,
            timeout,
        }
    }

    /// Prune expired waiters, then wake up to `n` of the remaining ones in
    /// FIFO order, synchronously, in order. Returns the number actually
    /// woken (which may be less than `n` if fewer were queued).
    pub fn notify(&self, n: usize) -> usize {
        self.waiters.notify(&self.scheduler(), n)
    }

    /// Wake every currently queued waiter.
    pub fn notify_all(&self) -> usize {
        self.waiters.notify_all(&self.scheduler())
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`Condition::wait`].
pub struct Wait<'a> {
    condition: &'a Condition,
    waiter: Option<Rc<Waiter>>,
    timeout: Option<Duration>,
}

impl<'a> std::future::Future for Wait<'a> {
    type Output = WaitResult;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        use std::task::Poll;

        if let Some(waiter) = &self.waiter {
            if waiter.is_expired() {
                return Poll::Ready(if waiter.is_timed_out() {
                    WaitResult::TimedOut
                } else {
                    WaitResult::Notified
                });
            }
            waiter.set_waker(cx.waker());
            return Poll::Pending;
        }

        let scheduler = self.condition.scheduler();
        let waiter = self.condition.waiters.push(&scheduler, self.timeout);
        waiter.set_waker(cx.waker());
        self.waiter = Some(waiter);
        Poll::Pending
    }
}

impl<'a> Drop for Wait<'a> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if !waiter.is_expired() {
                self.condition
                    .waiters
                    .remove(&self.condition.scheduler(), &waiter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;

    #[test]
    fn notify_wakes_in_fifo_order() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let cond = Rc::new(Condition::new());

        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut futs: Vec<_> = (0..3)
            .map(|i| {
                let cond = cond.clone();
                let order = order.clone();
                Box::pin(async move {
                    cond.wait(None).await;
                    order.borrow_mut().push(i);
                })
            })
            .collect();

        for f in &mut futs {
            crate::testing::poll_once(f.as_mut());
        }
        assert_eq!(cond.waiter_count(), 3);

        cond.notify_all();
        sched.turn();
        for f in &mut futs {
            crate::testing::poll_once(f.as_mut());
        }

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn notify_n_greater_than_waiters_wakes_all_without_error() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let cond = Condition::new();

        let mut f = Box::pin(cond.wait(None));
        crate::testing::poll_once(f.as_mut());

        let woken = cond.notify(100);
        assert_eq!(woken, 1);
        assert_eq!(cond.waiter_count(), 0);
    }

    #[test]
    fn timeout_and_notify_race_are_indistinguishable_but_consistent() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let cond = Condition::new();

        let mut f = Box::pin(cond.wait(Some(Duration::from_millis(10))));
        crate::testing::poll_once(f.as_mut());

        sched.advance(Duration::from_millis(10));
        cond.notify_all(); // races the timer; only one should win
        sched.turn();

        let result = crate::testing::poll_once(f.as_mut());
        assert!(result.is_some());
    }
}
