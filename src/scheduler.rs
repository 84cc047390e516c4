//! The external collaborator every primitive in this crate suspends into:
//! something that can re-poll a parked [`Waker`] on the "next turn" and
//! something that can fire a [`Waker`] after a relative delay.
//!
//! Primitives never assume a *particular* scheduler. They reach the current
//! one through [`with_current`], the same way `tokio::time::sleep` reaches
//! the ambient runtime without a parameter at the call site. Tests (and
//! small standalone programs) drive the bundled [`LocalScheduler`]
//! reference implementation directly.

use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};
use std::task::Waker;

/// Opaque handle to an armed timer, returned by [`Scheduler::arm_timer`].
///
/// Used only to cancel the timer once the waiter it was guarding fired for
/// another reason first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// The scheduler contract every primitive in this crate consumes.
///
/// Implementations are not required to be thread-safe: this crate's
/// primitives are themselves `!Send`/`!Sync`, so a `Scheduler` only ever
/// needs to serve callers on the one thread that owns it.
pub trait Scheduler {
    /// Enqueue `waker` to be woken on the next scheduler turn. Schedulings
    /// made within the same turn fire in FIFO order.
    fn schedule(&self, waker: Waker);

    /// Arm a timer that wakes `waker` no sooner than `after` from now.
    /// Returns a handle that can be passed to [`Scheduler::cancel_timer`].
    fn arm_timer(&self, after: Duration, waker: Waker) -> TimerId;

    /// Cancel a previously armed timer. A no-op if it already fired or was
    /// already cancelled.
    fn cancel_timer(&self, id: TimerId);
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<dyn Scheduler>>> = RefCell::new(None);
}

/// RAII guard returned by [`set_current`]; restores the previous current
/// scheduler (if any) on drop.
pub struct CurrentGuard {
    previous: Option<Rc<dyn Scheduler>>,
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

/// Install `scheduler` as the thread-local "current" scheduler for the
/// lifetime of the returned guard. Primitives constructed with
/// `Primitive::new()` (as opposed to `Primitive::with_scheduler`) resolve
/// their scheduler through this slot the first time they need one.
pub fn set_current(scheduler: Rc<dyn Scheduler>) -> CurrentGuard {
    let previous = CURRENT.with(|cell| cell.borrow_mut().replace(scheduler));
    CurrentGuard { previous }
}

/// Run `f` with a reference to the current thread-local scheduler.
///
/// # Panics
///
/// Panics if no scheduler has been installed via [`set_current`] on this
/// thread. Primitives that want to avoid this panic should be built with
/// `Primitive::with_scheduler(..)` instead of relying on the ambient
/// default.
pub fn with_current<R>(f: impl FnOnce(&Rc<dyn Scheduler>) -> R) -> R {
    CURRENT.with(|cell| {
        let borrow = cell.borrow();
        let scheduler = borrow
            .as_ref()
            .expect("no loopsync scheduler installed on this thread; call loopsync::scheduler::set_current first");
        f(scheduler)
    })
}

/// Returns `true` if a scheduler is currently installed on this thread.
pub fn has_current() -> bool {
    CURRENT.with(|cell| cell.borrow().is_some())
}

struct TimerEntry {
    id: TimerId,
    deadline: Instant,
    waker: Option<Waker>,
}

/// A minimal single-threaded reference [`Scheduler`]: a FIFO ready queue
/// plus a timer min-heap driven by an explicit [`LocalScheduler::turn`] /
/// [`LocalScheduler::advance`] pair rather than a real clock thread.
///
/// This is the scheduler this crate's own test suite runs against. It is
/// deliberately not a general-purpose executor: it has no notion of a
/// "task", only of wakers to invoke, because every primitive in this crate
/// already carries its own `Future` impl that re-polls itself when woken.
pub struct LocalScheduler {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    ready: VecDeque<Waker>,
    timers: BinaryHeap<Reverse<TimerKey>>,
    entries: std::collections::HashMap<u64, TimerEntry>,
    next_timer: u64,
    now: Instant,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    deadline: Instant,
    id: u64,
}

impl LocalScheduler {
    /// Create a new scheduler whose virtual clock starts at `Instant::now()`.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                ready: VecDeque::new(),
                timers: BinaryHeap::new(),
                entries: std::collections::HashMap::new(),
                next_timer: 0,
                now: Instant::now(),
            })),
        }
    }

    /// Wrap this scheduler in an `Rc<dyn Scheduler>` and install it as the
    /// thread-local current scheduler for the lifetime of the guard.
    pub fn enter(&self) -> CurrentGuard {
        set_current(self.as_rc())
    }

    /// A clone of the `Rc<dyn Scheduler>` handle backing this scheduler,
    /// suitable for `Primitive::with_scheduler(local.as_rc())`.
    pub fn as_rc(&self) -> Rc<dyn Scheduler> {
        Rc::new(Handle {
            inner: self.inner.clone(),
        })
    }

    /// Run exactly one scheduler turn: drain every waker currently ready
    /// (both those scheduled via [`Scheduler::schedule`] and those whose
    /// timer has already elapsed), without firing wakers newly scheduled
    /// as a side effect of this turn's wakes. Returns the number of wakers
    /// invoked.
    pub fn turn(&self) -> usize {
        let ready: Vec<Waker> = {
            let mut inner = self.inner.borrow_mut();
            inner.drain_due_timers();
            inner.ready.drain(..).collect()
        };
        let n = ready.len();
        for waker in ready {
            waker.wake();
        }
        n
    }

    /// Run turns until none produce any wakes, bounded by `max_turns` to
    /// guard against a runaway wake-each-other loop.
    pub fn run_until_stalled(&self, max_turns: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_turns {
            let n = self.turn();
            total += n;
            if n == 0 {
                break;
            }
        }
        total
    }

    /// Advance the virtual clock by `delta`, firing (enqueuing, not yet
    /// running) any timers whose deadline has now elapsed. Call
    /// [`LocalScheduler::turn`] afterwards to actually invoke them.
    pub fn advance(&self, delta: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.now += delta;
    }

    /// The scheduler's current virtual time.
    pub fn now(&self) -> Instant {
        self.inner.borrow().now
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn drain_due_timers(&mut self) {
        loop {
            let due = match self.timers.peek() {
                Some(Reverse(key)) => match self.entries.get(&key.id) {
                    Some(entry) => entry.deadline <= self.now,
                    None => true, // cancelled; pop and discard
                },
                None => false,
            };
            if !due {
                break;
            }
            let Reverse(key) = self.timers.pop().unwrap();
            if let Some(mut entry) = self.entries.remove(&key.id) {
                if let Some(waker) = entry.waker.take() {
                    self.ready.push_back(waker);
                }
            }
        }
    }
}

/// Cheap `Rc`-backed handle implementing [`Scheduler`] by delegating to a
/// shared [`LocalScheduler`] inner state. This is the type actually handed
/// out by [`LocalScheduler::as_rc`]; kept separate from `LocalScheduler`
/// itself so the latter can expose `&self` test-only methods
/// (`turn`/`advance`) without those leaking into the trait object surface.
struct Handle {
    inner: Rc<RefCell<Inner>>,
}

impl Scheduler for Handle {
    fn schedule(&self, waker: Waker) {
        self.inner.borrow_mut().ready.push_back(waker);
    }

    fn arm_timer(&self, after: Duration, waker: Waker) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_timer;
        inner.next_timer += 1;
        let deadline = inner.now + after;
        inner.entries.insert(
            id,
            TimerEntry {
                id: TimerId(id),
                deadline,
                waker: Some(waker),
            },
        );
        inner.timers.push(Reverse(TimerKey { deadline, id }));
        TimerId(id)
    }

    fn cancel_timer(&self, id: TimerId) {
        self.inner.borrow_mut().entries.remove(&id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    struct Flag(std::cell::Cell<bool>);
    // Single-threaded test helper only; never sent across threads.
    unsafe impl Send for Flag {}
    unsafe impl Sync for Flag {}
    impl Wake for Flag {
        fn wake(self: Arc<Self>) {
            self.0.set(true);
        }
    }

    fn flag_waker() -> (Arc<Flag>, Waker) {
        let flag = Arc::new(Flag(std::cell::Cell::new(false)));
        let waker = Waker::from(flag.clone());
        (flag, waker)
    }

    #[test]
    fn schedule_fires_on_next_turn() {
        let sched = LocalScheduler::new();
        let handle = sched.as_rc();
        let (flag, waker) = flag_waker();

        handle.schedule(waker);
        assert!(!flag.0.get());
        assert_eq!(sched.turn(), 1);
        assert!(flag.0.get());
    }

    #[test]
    fn timer_fires_only_after_advance_and_turn() {
        let sched = LocalScheduler::new();
        let handle = sched.as_rc();
        let (flag, waker) = flag_waker();

        handle.arm_timer(Duration::from_millis(10), waker);
        assert_eq!(sched.turn(), 0);
        assert!(!flag.0.get());

        sched.advance(Duration::from_millis(10));
        assert_eq!(sched.turn(), 1);
        assert!(flag.0.get());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let sched = LocalScheduler::new();
        let handle = sched.as_rc();
        let (flag, waker) = flag_waker();

        let id = handle.arm_timer(Duration::from_millis(10), waker);
        handle.cancel_timer(id);
        sched.advance(Duration::from_millis(50));
        assert_eq!(sched.turn(), 0);
        assert!(!flag.0.get());
    }

    #[test]
    fn fifo_order_across_schedulings() {
        let sched = LocalScheduler::new();
        let handle = sched.as_rc();

        let order = Rc::new(RefCell::new(Vec::new()));
        struct Recorder(Rc<RefCell<Vec<u32>>>, u32);
        unsafe impl Send for Recorder {}
        unsafe impl Sync for Recorder {}
        impl Wake for Recorder {
            fn wake(self: Arc<Self>) {
                self.0.borrow_mut().push(self.1);
            }
        }

        for i in 0..3 {
            let waker = Waker::from(Arc::new(Recorder(order.clone(), i)));
            handle.schedule(waker);
        }
        sched.turn();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }
}
