//! Bounded producer/consumer queues: the central algorithm this crate
//! exists to provide.
//!
//! [`Queue`], [`PriorityQueue`] and [`LifoQueue`] are thin facades over a
//! shared [`QueueCore`] state machine that differ only in which
//! [`storage::QueueStorage`] they pop from. [`crate::JoinableQueue`] is
//! the same core again, with outstanding-task bookkeeping layered on top
//! of the points where an item is actually accepted into the queue.

pub(crate) mod storage;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{Empty, Full};
use crate::event::Event;
use crate::scheduler::Scheduler;
use crate::waiter::{resolve_scheduler, Waiter};
use storage::{Fifo, Heap, QueueStorage, Stack};

/// Outcome of [`Queue::put`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// The item was accepted (handed to a waiting getter, buffered in
    /// storage, or queued behind a putter ahead of it and since drained).
    Sent,
}

impl PutResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, PutResult::Sent)
    }
}

/// Outcome of a timed-out [`Queue::put`]; the item is handed back since it
/// was never accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutTimedOut<T>(pub T);

/// Outcome of [`Queue::get`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetResult<T> {
    Ready(T),
    TimedOut,
}

struct GetterSlot<T> {
    waiter: Rc<Waiter>,
    slot: RefCell<Option<T>>,
}

struct PutterSlot<T> {
    waiter: Rc<Waiter>,
    item: RefCell<Option<T>>,
}

/// Bookkeeping layered on top of a [`QueueCore`] by [`crate::JoinableQueue`]:
/// an outstanding-task counter plus an [`Event`] mirroring "counter is
/// zero". Kept as a plain optional field on the core rather than as a
/// virtual `_put` override (the original design's vocabulary), since Rust
/// has no cheap equivalent of that override without boxing every storage
/// access.
struct JoinTracking {
    unfinished: Cell<usize>,
    finished: Event,
}

impl JoinTracking {
    fn new(scheduler: Option<Rc<dyn Scheduler>>) -> Self {
        let finished = match &scheduler {
            Some(s) => Event::with_scheduler(s.clone()),
            None => Event::new(),
        };
        finished.set();
        Self {
            unfinished: Cell::new(0),
            finished,
        }
    }

    fn on_accept(&self) {
        self.unfinished.set(self.unfinished.get() + 1);
        self.finished.clear();
    }
}

pub(crate) struct QueueCore<T, S: QueueStorage<T>> {
    storage: RefCell<S>,
    maxsize: Option<usize>,
    getters: RefCell<VecDeque<Rc<GetterSlot<T>>>>,
    putters: RefCell<VecDeque<Rc<PutterSlot<T>>>>,
    scheduler: Option<Rc<dyn Scheduler>>,
    join: Option<JoinTracking>,
}

impl<T, S: QueueStorage<T> + Default> QueueCore<T, S> {
    pub(crate) fn new(
        maxsize: Option<usize>,
        scheduler: Option<Rc<dyn Scheduler>>,
        joinable: bool,
    ) -> Self {
        let join = if joinable {
            Some(JoinTracking::new(scheduler.clone()))
        } else {
            None
        };
        Self {
            storage: RefCell::new(S::default()),
            maxsize,
            getters: RefCell::new(VecDeque::new()),
            putters: RefCell::new(VecDeque::new()),
            scheduler,
            join,
        }
    }
}

impl<T, S: QueueStorage<T>> QueueCore<T, S> {
    fn scheduler(&self) -> Rc<dyn Scheduler> {
        resolve_scheduler(&self.scheduler)
    }

    pub fn qsize(&self) -> usize {
        self.storage.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.borrow().is_empty()
    }

    pub fn is_full(&self) -> bool {
        match self.maxsize {
            None => false,
            Some(0) => true,
            Some(m) => self.storage.borrow().len() >= m,
        }
    }

    pub fn maxsize(&self) -> Option<usize> {
        self.maxsize
    }

    fn prune_getters(&self) {
        let mut getters = self.getters.borrow_mut();
        while matches!(getters.front(), Some(g) if g.waiter.is_expired()) {
            getters.pop_front();
        }
    }

    fn prune_putters(&self) {
        let mut putters = self.putters.borrow_mut();
        while matches!(putters.front(), Some(p) if p.waiter.is_expired()) {
            putters.pop_front();
        }
    }

    fn pop_live_getter(&self, scheduler: &Rc<dyn Scheduler>) -> Option<Rc<GetterSlot<T>>> {
        self.prune_getters();
        let getter = self.getters.borrow_mut().pop_front()?;
        getter.waiter.cancel_timer(scheduler);
        Some(getter)
    }

    fn pop_live_putter(&self, scheduler: &Rc<dyn Scheduler>) -> Option<Rc<PutterSlot<T>>> {
        self.prune_putters();
        let putter = self.putters.borrow_mut().pop_front()?;
        putter.waiter.cancel_timer(scheduler);
        Some(putter)
    }

    /// Record that `count` additional items have just been accepted into
    /// the queue (storage push or direct getter hand-off).
    fn note_accepted(&self) {
        if let Some(join) = &self.join {
            join.on_accept();
        }
    }

    /// Non-blocking put: `Err(Full)` if there is no room and no getter to
    /// rendezvous with.
    pub fn try_put(&self, item: T) -> Result<(), Full> {
        let scheduler = self.scheduler();
        if let Some(getter) = self.pop_live_getter(&scheduler) {
            debug_assert!(self.storage.borrow().is_empty());
            *getter.slot.borrow_mut() = Some(item);
            getter.waiter.fire();
            self.note_accepted();
            return Ok(());
        }
        if self.is_full() {
            return Err(Full);
        }
        self.storage.borrow_mut().push(item);
        self.note_accepted();
        Ok(())
    }

    /// Non-blocking get: `Err(Empty)` if nothing is buffered and no putter
    /// is waiting to rendezvous.
    pub fn try_get(&self) -> Result<T, Empty> {
        let scheduler = self.scheduler();
        if let Some(putter) = self.pop_live_putter(&scheduler) {
            let item = putter
                .item
                .borrow_mut()
                .take()
                .expect("putter fired without an item");
            self.storage.borrow_mut().push(item);
            self.note_accepted();
            putter.waiter.fire_deferred(&scheduler);
            return self.storage.borrow_mut().pop().ok_or(Empty);
        }
        self.storage.borrow_mut().pop().ok_or(Empty)
    }

    pub fn unfinished_tasks(&self) -> usize {
        self.join
            .as_ref()
            .map(|j| j.unfinished.get())
            .unwrap_or(0)
    }

    fn finished_event(&self) -> &Event {
        self.join
            .as_ref()
            .map(|j| &j.finished)
            .expect("task_done/join called on a non-joinable queue")
    }

    pub(crate) fn put_future(&self, item: T, timeout: Option<Duration>) -> Put<'_, T, S> {
        Put {
            core: self,
            timeout,
            state: PutState::Unstarted(Some(item)),
        }
    }

    pub(crate) fn get_future(&self, timeout: Option<Duration>) -> Get<'_, T, S> {
        Get {
            core: self,
            timeout,
            state: GetState::Unstarted,
        }
    }

    /// Resolves once `unfinished_tasks` reaches zero. Delegates entirely to
    /// the backing `finished` event, which already implements "resolve on
    /// the next turn if already set, otherwise park".
    pub fn join(&self, timeout: Option<Duration>) -> crate::event::EventWait<'_> {
        self.finished_event().wait(timeout)
    }

    pub fn task_done(&self) -> Result<(), crate::error::TaskDoneError> {
        let join = self
            .join
            .as_ref()
            .expect("task_done called on a non-joinable queue");
        let remaining = join.unfinished.get();
        if remaining == 0 {
            return Err(crate::error::TaskDoneError);
        }
        join.unfinished.set(remaining - 1);
        if remaining - 1 == 0 {
            join.finished.set();
        }
        Ok(())
    }
}

enum PutState<T> {
    Unstarted(Option<T>),
    DeferredSent,
    Waiting(Rc<PutterSlot<T>>),
}

/// Future returned by a queue's `put`.
pub struct Put<'a, T, S: QueueStorage<T>> {
    core: &'a QueueCore<T, S>,
    timeout: Option<Duration>,
    state: PutState<T>,
}

impl<'a, T, S: QueueStorage<T>> Future for Put<'a, T, S> {
    type Output = Result<PutResult, PutTimedOut<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match &mut self.state {
                PutState::Unstarted(item_slot) => {
                    let scheduler = self.core.scheduler();
                    if let Some(getter) = self.core.pop_live_getter(&scheduler) {
                        let item = item_slot.take().expect("put polled after completion");
                        debug_assert!(self.core.storage.borrow().is_empty());
                        *getter.slot.borrow_mut() = Some(item);
                        getter.waiter.fire();
                        self.core.note_accepted();
                        scheduler.schedule(cx.waker().clone());
                        self.state = PutState::DeferredSent;
                    } else if self.core.is_full() {
                        let item = item_slot.take().expect("put polled after completion");
                        let waiter = Waiter::new();
                        if let Some(after) = self.timeout {
                            waiter.arm_timeout(&scheduler, after);
                        }
                        waiter.set_waker(cx.waker());
                        let entry = Rc::new(PutterSlot {
                            waiter,
                            item: RefCell::new(Some(item)),
                        });
                        self.core.putters.borrow_mut().push_back(entry.clone());
                        self.state = PutState::Waiting(entry);
                    } else {
                        let item = item_slot.take().expect("put polled after completion");
                        self.core.storage.borrow_mut().push(item);
                        self.core.note_accepted();
                        scheduler.schedule(cx.waker().clone());
                        self.state = PutState::DeferredSent;
                    }
                }
                PutState::DeferredSent => return Poll::Ready(Ok(PutResult::Sent)),
                PutState::Waiting(entry) => {
                    if entry.waiter.is_expired() {
                        if entry.waiter.is_timed_out() {
                            let item = entry
                                .item
                                .borrow_mut()
                                .take()
                                .expect("timed-out putter missing its item");
                            return Poll::Ready(Err(PutTimedOut(item)));
                        }
                        return Poll::Ready(Ok(PutResult::Sent));
                    }
                    entry.waiter.set_waker(cx.waker());
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<'a, T, S: QueueStorage<T>> Drop for Put<'a, T, S> {
    fn drop(&mut self) {
        if let PutState::Waiting(entry) = &self.state {
            if !entry.waiter.is_expired() {
                let scheduler = self.core.scheduler();
                entry.waiter.cancel_timer(&scheduler);
                let mut putters = self.core.putters.borrow_mut();
                if let Some(pos) = putters.iter().position(|p| Rc::ptr_eq(p, entry)) {
                    putters.remove(pos);
                }
            }
        }
    }
}

enum GetState<T> {
    Unstarted,
    Waiting(Rc<GetterSlot<T>>),
}

/// Future returned by a queue's `get`.
pub struct Get<'a, T, S: QueueStorage<T>> {
    core: &'a QueueCore<T, S>,
    timeout: Option<Duration>,
    state: GetState<T>,
}

impl<'a, T, S: QueueStorage<T>> Future for Get<'a, T, S> {
    type Output = GetResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            match &mut self.state {
                GetState::Unstarted => {
                    let scheduler = self.core.scheduler();
                    if let Some(putter) = self.core.pop_live_putter(&scheduler) {
                        let item = putter
                            .item
                            .borrow_mut()
                            .take()
                            .expect("putter fired without an item");
                        self.core.storage.borrow_mut().push(item);
                        self.core.note_accepted();
                        putter.waiter.fire_deferred(&scheduler);
                        let value = self
                            .core
                            .storage
                            .borrow_mut()
                            .pop()
                            .expect("storage empty right after a push");
                        return Poll::Ready(GetResult::Ready(value));
                    }
                    if let Some(value) = self.core.storage.borrow_mut().pop() {
                        return Poll::Ready(GetResult::Ready(value));
                    }
                    let waiter = Waiter::new();
                    if let Some(after) = self.timeout {
                        waiter.arm_timeout(&scheduler, after);
                    }
                    waiter.set_waker(cx.waker());
                    let entry = Rc::new(GetterSlot {
                        waiter,
                        slot: RefCell::new(None),
                    });
                    self.core.getters.borrow_mut().push_back(entry.clone());
                    self.state = GetState::Waiting(entry);
                }
                GetState::Waiting(entry) => {
                    if entry.waiter.is_expired() {
                        if entry.waiter.is_timed_out() {
                            return Poll::Ready(GetResult::TimedOut);
                        }
                        let value = entry
                            .slot
                            .borrow_mut()
                            .take()
                            .expect("notified getter missing its value");
                        return Poll::Ready(GetResult::Ready(value));
                    }
                    entry.waiter.set_waker(cx.waker());
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<'a, T, S: QueueStorage<T>> Drop for Get<'a, T, S> {
    fn drop(&mut self) {
        if let GetState::Waiting(entry) = &self.state {
            if !entry.waiter.is_expired() {
                let scheduler = self.core.scheduler();
                entry.waiter.cancel_timer(&scheduler);
                let mut getters = self.core.getters.borrow_mut();
                if let Some(pos) = getters.iter().position(|g| Rc::ptr_eq(g, entry)) {
                    getters.remove(pos);
                }
            }
        }
    }
}

macro_rules! queue_facade {
    ($name:ident, $storage:ty, $bound:path) => {
        /// See the module docs for the shared put/get algorithm.
        pub struct $name<T: $bound> {
            core: QueueCore<T, $storage>,
        }

        impl<T: $bound> $name<T> {
            pub fn new(maxsize: Option<usize>) -> Self {
                Self {
                    core: QueueCore::new(maxsize, None, false),
                }
            }

            pub fn with_scheduler(maxsize: Option<usize>, scheduler: Rc<dyn Scheduler>) -> Self {
                Self {
                    core: QueueCore::new(maxsize, Some(scheduler), false),
                }
            }

            pub fn maxsize(&self) -> Option<usize> {
                self.core.maxsize()
            }

            pub fn qsize(&self) -> usize {
                self.core.qsize()
            }

            pub fn is_empty(&self) -> bool {
                self.core.is_empty()
            }

            pub fn is_full(&self) -> bool {
                self.core.is_full()
            }

            pub fn try_put(&self, item: T) -> Result<(), Full> {
                self.core.try_put(item)
            }

            pub fn try_get(&self) -> Result<T, Empty> {
                self.core.try_get()
            }

            pub fn put(&self, item: T, timeout: Option<Duration>) -> Put<'_, T, $storage> {
                self.core.put_future(item, timeout)
            }

            pub fn get(&self, timeout: Option<Duration>) -> Get<'_, T, $storage> {
                self.core.get_future(timeout)
            }
        }
    };
}

queue_facade!(Queue, Fifo<T>, Sized);
queue_facade!(PriorityQueue, Heap<T>, Ord);
queue_facade!(LifoQueue, Stack<T>, Sized);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;

    #[test]
    fn rendezvous_only_queue_hands_item_directly_to_blocked_getter() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let q: Queue<i32> = Queue::new(Some(0));

        let mut getter = Box::pin(q.get(None));
        assert!(crate::testing::poll_once(getter.as_mut()).is_none());

        // Polling the put is what actually performs the rendezvous: it
        // pops the parked getter and fires it synchronously, then defers
        // its own `Sent` resolution to the next turn.
        let mut putter = Box::pin(q.put(7, None));
        assert!(crate::testing::poll_once(putter.as_mut()).is_none());
        assert_eq!(
            crate::testing::poll_once(getter.as_mut()),
            Some(GetResult::Ready(7))
        );

        sched.turn();
        assert_eq!(
            crate::testing::poll_once(putter.as_mut()),
            Some(Ok(PutResult::Sent))
        );
    }

    #[test]
    fn full_queue_alternates_getter_then_putter_across_turns() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let q: Queue<i32> = Queue::new(Some(1));
        q.try_put(1).unwrap();

        let mut getter = Box::pin(q.get(None));
        let mut putter = Box::pin(q.put(2, None));
        // Parking the putter first registers it, so the getter's rendezvous
        // check below actually finds it.
        assert!(crate::testing::poll_once(putter.as_mut()).is_none());

        assert_eq!(
            crate::testing::poll_once(getter.as_mut()),
            Some(GetResult::Ready(1))
        );
        assert!(crate::testing::poll_once(putter.as_mut()).is_none());

        sched.turn();
        assert_eq!(
            crate::testing::poll_once(putter.as_mut()),
            Some(Ok(PutResult::Sent))
        );
        assert_eq!(q.try_get(), Ok(2));
    }

    #[test]
    fn unbounded_queue_delivers_in_fifo_order() {
        let q: Queue<i32> = Queue::new(None);
        q.try_put(1).unwrap();
        q.try_put(2).unwrap();
        q.try_put(3).unwrap();
        assert_eq!(q.try_get(), Ok(1));
        assert_eq!(q.try_get(), Ok(2));
        assert_eq!(q.try_get(), Ok(3));
        assert_eq!(q.try_get(), Err(Empty));
    }

    #[test]
    fn priority_queue_delivers_ascending_regardless_of_put_order() {
        let q: PriorityQueue<i32> = PriorityQueue::new(None);
        q.try_put(5).unwrap();
        q.try_put(1).unwrap();
        q.try_put(3).unwrap();
        assert_eq!(q.try_get(), Ok(1));
        assert_eq!(q.try_get(), Ok(3));
        assert_eq!(q.try_get(), Ok(5));
    }

    #[test]
    fn lifo_queue_delivers_reverse_enqueue_order() {
        let q: LifoQueue<i32> = LifoQueue::new(None);
        q.try_put(1).unwrap();
        q.try_put(2).unwrap();
        q.try_put(3).unwrap();
        assert_eq!(q.try_get(), Ok(3));
        assert_eq!(q.try_get(), Ok(2));
        assert_eq!(q.try_get(), Ok(1));
    }

    #[test]
    fn try_put_fails_full_try_get_fails_empty() {
        let q: Queue<i32> = Queue::new(Some(1));
        assert_eq!(q.try_get(), Err(Empty));
        q.try_put(1).unwrap();
        assert_eq!(q.try_put(2), Err(Full));
    }

    #[test]
    fn unbounded_queue_is_never_full() {
        let q: Queue<i32> = Queue::new(None);
        assert!(!q.is_full());
        for i in 0..100 {
            q.try_put(i).unwrap();
        }
        assert!(!q.is_full());
    }

    #[test]
    fn put_timeout_returns_the_item() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let q: Queue<i32> = Queue::new(Some(1));
        q.try_put(1).unwrap();

        let mut putter = Box::pin(q.put(2, Some(Duration::from_millis(5))));
        assert!(crate::testing::poll_once(putter.as_mut()).is_none());

        sched.advance(Duration::from_millis(5));
        sched.turn();
        assert_eq!(
            crate::testing::poll_once(putter.as_mut()),
            Some(Err(PutTimedOut(2)))
        );
    }

    #[test]
    fn get_timeout_on_empty_queue() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let q: Queue<i32> = Queue::new(None);

        let mut getter = Box::pin(q.get(Some(Duration::from_millis(5))));
        assert!(crate::testing::poll_once(getter.as_mut()).is_none());

        sched.advance(Duration::from_millis(5));
        sched.turn();
        assert_eq!(
            crate::testing::poll_once(getter.as_mut()),
            Some(GetResult::TimedOut)
        );
    }
}
