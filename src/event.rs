//! [`Event`]: a boolean flag with broadcast wake-up, layered over a
//! [`Condition`].

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::condition::{Condition, Wait};
use crate::scheduler::Scheduler;
use crate::WaitResult;

/// A latch: once [`Event::set`], every past and future `wait` (until the
/// next [`Event::clear`]) observes it set. Waiters parked before `set`
/// wake on the same turn, in FIFO order; a `wait` that arrives after the
/// flag is already set still defers its resolution to the next scheduler
/// turn, so callers can rely on their own continuation never running
/// synchronously out of `wait`'s first poll.
pub struct Event {
    flag: Cell<bool>,
    condition: Condition,
}

impl Event {
    pub fn new() -> Self {
        Self {
            flag: Cell::new(false),
            condition: Condition::new(),
        }
    }

    pub fn with_scheduler(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            flag: Cell::new(false),
            condition: Condition::with_scheduler(scheduler),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.get()
    }

    /// Set the flag and wake every waiter currently parked, in order.
    /// A no-op (besides waking, which is then a no-op too) if already set.
    pub fn set(&self) {
        self.flag.set(true);
        self.condition.notify_all();
    }

    /// Reset the flag. Does not itself wake or disturb anyone; by the time
    /// `set` last ran, the queue it drained was already empty, so there is
    /// nothing left parked to reconsider.
    pub fn clear(&self) {
        self.flag.set(false);
    }

    pub fn wait(&self, timeout: Option<Duration>) -> EventWait<'_> {
        EventWait {
            event: self,
            timeout,
            state: State::Unstarted,
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

enum State<'a> {
    Unstarted,
    Deferred,
    Delegated(Wait<'a>),
}

/// Future returned by [`Event::wait`].
pub struct EventWait<'a> {
    event: &'a Event,
    timeout: Option<Duration>,
    state: State<'a>,
}

impl<'a> Future for EventWait<'a> {
    type Output = WaitResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match &mut self.state {
                State::Unstarted => {
                    if self.event.is_set() {
                        self.event
                            .condition
                            .scheduler_for_defer()
                            .schedule(cx.waker().clone());
                        self.state = State::Deferred;
                    } else {
                        self.state = State::Delegated(self.event.condition.wait(self.timeout));
                    }
                }
                State::Deferred => return Poll::Ready(WaitResult::Notified),
                State::Delegated(wait) => return Pin::new(wait).poll(cx),
            }
        }
    }
}
