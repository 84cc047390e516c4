//! [`JoinableQueue`]: a FIFO [`crate::Queue`] plus outstanding-task
//! bookkeeping and a `join` that resolves once every put item has been
//! matched by a [`JoinableQueue::task_done`].

use std::rc::Rc;
use std::time::Duration;

use crate::error::{Empty, Full, TaskDoneError};
use crate::event::EventWait;
use crate::queue::storage::Fifo;
use crate::queue::{Get, Put, QueueCore};
use crate::scheduler::Scheduler;

/// A bounded FIFO queue that additionally tracks how many `put` items have
/// not yet been marked done, the way `queue.Queue` plus `task_done`/`join`
/// works in producer/consumer pipelines that need a "drain everything"
/// barrier rather than just handing items off one at a time.
pub struct JoinableQueue<T> {
    core: QueueCore<T, Fifo<T>>,
}

impl<T> JoinableQueue<T> {
    pub fn new(maxsize: Option<usize>) -> Self {
        Self {
            core: QueueCore::new(maxsize, None, true),
        }
    }

    pub fn with_scheduler(maxsize: Option<usize>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            core: QueueCore::new(maxsize, Some(scheduler), true),
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

    pub fn unfinished_tasks(&self) -> usize {
        self.core.unfinished_tasks()
    }

    pub fn try_put(&self, item: T) -> Result<(), Full> {
        self.core.try_put(item)
    }

    pub fn try_get(&self) -> Result<T, Empty> {
        self.core.try_get()
    }

    pub fn put(&self, item: T, timeout: Option<Duration>) -> Put<'_, T, Fifo<T>> {
        self.core.put_future(item, timeout)
    }

    pub fn get(&self, timeout: Option<Duration>) -> Get<'_, T, Fifo<T>> {
        self.core.get_future(timeout)
    }

    /// Decrement the outstanding-task counter, setting `finished` once it
    /// reaches zero. Fails if called more times than there are outstanding
    /// tasks.
    pub fn task_done(&self) -> Result<(), TaskDoneError> {
        let result = self.core.task_done();
        if result.is_err() {
            tracing::warn!("task_done() called with no outstanding tasks");
        }
        result
    }

    /// Resolve once `unfinished_tasks()` reaches zero.
    pub fn join(&self, timeout: Option<Duration>) -> EventWait<'_> {
        self.core.join(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::LocalScheduler;
    use crate::WaitResult;

    #[test]
    fn finished_iff_unfinished_tasks_is_zero() {
        let q: JoinableQueue<i32> = JoinableQueue::new(None);
        assert_eq!(q.unfinished_tasks(), 0);

        q.try_put(1).unwrap();
        q.try_put(2).unwrap();
        assert_eq!(q.unfinished_tasks(), 2);

        q.task_done().unwrap();
        assert_eq!(q.unfinished_tasks(), 1);
        q.task_done().unwrap();
        assert_eq!(q.unfinished_tasks(), 0);
    }

    #[test]
    fn task_done_beyond_count_is_an_error() {
        let q: JoinableQueue<i32> = JoinableQueue::new(None);
        q.try_put(1).unwrap();
        q.task_done().unwrap();
        assert_eq!(q.task_done(), Err(TaskDoneError));
    }

    #[test]
    fn join_resolves_once_after_all_tasks_done() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let q: JoinableQueue<i32> = JoinableQueue::new(None);
        q.try_put(1).unwrap();
        q.try_put(2).unwrap();
        q.try_put(3).unwrap();

        let mut join = Box::pin(q.join(None));
        assert!(crate::testing::poll_once(join.as_mut()).is_none());

        q.task_done().unwrap();
        q.task_done().unwrap();
        assert!(crate::testing::poll_once(join.as_mut()).is_none());

        q.task_done().unwrap();
        sched.turn();
        assert_eq!(
            crate::testing::poll_once(join.as_mut()),
            Some(WaitResult::Notified)
        );
    }

    #[test]
    fn join_on_already_idle_queue_defers_to_next_turn() {
        let sched = LocalScheduler::new();
        let _guard = sched.enter();
        let q: JoinableQueue<i32> = JoinableQueue::new(None);

        let mut join = Box::pin(q.join(None));
        assert!(crate::testing::poll_once(join.as_mut()).is_none());
        sched.turn();
        assert_eq!(
            crate::testing::poll_once(join.as_mut()),
            Some(WaitResult::Notified)
        );
    }
}
