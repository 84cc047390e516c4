//! [`AsyncResult`]: a one-shot value cell with waiter broadcast, the
//! single-threaded cooperative analogue of `tokio::sync::oneshot` (many
//! receivers rather than one, since nothing here needs to be consumed
//! exactly once).

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{AlreadySetError, NotReadyError};
use crate::scheduler::Scheduler;
use crate::waiter::{resolve_scheduler, Waiter, WaiterQueue};

/// Outcome of [`AsyncResult::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetResult<V> {
    /// The cell was (or became) ready; carries the value.
    Ready(V),
    /// The relative deadline elapsed before `set` was ever called.
    TimedOut,
}

/// A cell that starts empty and can be set exactly once; every past and
/// future caller of `get` then observes the same value.
///
/// `V: Clone` because, unlike a single-consumer oneshot channel, any
/// number of callers may be waiting, so the value is handed to each by
/// cloning out of the cell rather than moved to only the first.
pub struct AsyncResult<V: Clone> {
    ready: Cell<bool>,
    value: RefCell<Option<V>>,
    waiters: WaiterQueue,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl<V: Clone> AsyncResult<V> {
    pub fn new() -> Self {
        Self {
            ready: Cell::new(false),
            value: RefCell::new(None),
            waiters: WaiterQueue::new(),
            scheduler: None,
        }
    }

    pub fn with_scheduler(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            ready: Cell::new(false),
            value: RefCell::new(None),
            waiters: WaiterQueue::new(),
            scheduler: Some(scheduler),
        }
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        resolve_scheduler(&self.scheduler)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// Store `value` and wake every waiter registered so far, in FIFO
    /// order, synchronously. Fails if the cell was already set.
    pub fn set(&self, value: V) -> Result<(), AlreadySetError> {
        if self.ready.replace(true) {
            return Err(AlreadySetError);
        }
        *self.value.borrow_mut() = Some(value);
        self.waiters.notify_all(&self.scheduler());
        Ok(())
    }

    /// Non-blocking read: the value if ready, `NotReadyError` otherwise.
    pub fn try_get(&self) -> Result<V, NotReadyError> {
        match self.value.borrow().as_ref() {
            Some(v) => Ok(v.clone()),
            None => Err(NotReadyError),
        }
    }

    pub fn get(&self, timeout: Option<Duration>) -> Get<'_, V> {
        Get {
            result: self,
            waiter: None,
            timeout,
        }
    }
}

impl<V: Clone> Default for AsyncResult<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`AsyncResult::get`].
pub struct Get<'a, V: Clone> {
    result: &'a AsyncResult<V>,
    waiter: Option<Rc<Waiter>>,
    timeout: Option<Duration>,
}

impl<'a, V: Clone> Future for Get<'a, V> {
    type Output = GetResult<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Ok(value) = self.result.try_get() {
            return Poll::Ready(GetResult::Ready(value));
        }

        if let Some(waiter) = &self.waiter {
            if waiter.is_expired() {
                return match self.result.try_get() {
                    Ok(value) => Poll::Ready(GetResult::Ready(value)),
                    Err(_) => Poll::Ready(GetResult::TimedOut),
                };
            }
            waiter.set_waker(cx.waker());
            return Poll::Pending;
        }

        let scheduler = self.result.scheduler();
        let waiter = self.result.waiters.push(&scheduler, self.timeout);
        waiter.set_waker(cx.waker());
        self.waiter = Some(waiter);
        Poll::Pending
    }
}

impl<'a, V: Clone> Drop for Get<'a, V> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if !waiter.is_expired() {
                self.result
                    .waiters
                    .remove(&self.result.scheduler(), &waiter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;

    #[test]
    fn set_before_get_resolves_immediately() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let result = AsyncResult::new();
        result.set(42).unwrap();

        let mut f = Box::pin(result.get(None));
        assert_eq!(
            crate::testing::poll_once(f.as_mut()),
            Some(GetResult::Ready(42))
        );
    }

    #[test]
    fn set_is_legal_exactly_once() {
        let result = AsyncResult::new();
        result.set(1).unwrap();
        assert_eq!(result.set(2), Err(AlreadySetError));
        assert_eq!(result.try_get(), Ok(1));
    }

    #[test]
    fn three_waiters_all_resolve_in_registration_order_on_set() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let result = Rc::new(AsyncResult::new());

        let order = Rc::new(RefCell::new(Vec::new()));
        let mut futs: Vec<_> = (0..3)
            .map(|i| {
                let result = result.clone();
                let order = order.clone();
                Box::pin(async move {
                    let v = result.get(None).await;
                    order.borrow_mut().push((i, v));
                })
            })
            .collect();

        for f in &mut futs {
            crate::testing::poll_once(f.as_mut());
        }

        result.set(42).unwrap();
        for f in &mut futs {
            crate::testing::poll_once(f.as_mut());
        }

        let order = order.borrow();
        assert_eq!(order.len(), 3);
        for (i, (idx, v)) in order.iter().enumerate() {
            assert_eq!(*idx, i);
            assert_eq!(*v, GetResult::Ready(42));
        }
    }

    #[test]
    fn timeout_before_set_resolves_timed_out() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let result: AsyncResult<i32> = AsyncResult::new();

        let mut f = Box::pin(result.get(Some(Duration::from_millis(10))));
        assert!(crate::testing::poll_once(f.as_mut()).is_none());

        sched.advance(Duration::from_millis(10));
        sched.turn();
        assert_eq!(
            crate::testing::poll_once(f.as_mut()),
            Some(GetResult::TimedOut)
        );
    }
}
