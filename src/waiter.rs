//! The waiter-queuing and expiry discipline shared by every primitive in
//! this crate.
//!
//! A [`Waiter`] wraps the one thing every suspended `Future` in this crate
//! needs: somewhere to stash its [`Waker`] once polled, and a timer
//! registration to race against a normal wake-up. A [`WaiterQueue`] is the
//! ordered sequence of these that `Condition`, `Semaphore`, and `Queue`'s
//! getter/putter lists all build on.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Waker;
use std::time::Duration;

use crate::scheduler::{self, Scheduler, TimerId};

/// A single pending continuation. Runs at most once, whether woken
/// normally or by its timer firing first.
pub struct Waiter {
    waker: RefCell<Option<Waker>>,
    expired: Cell<bool>,
    timed_out: Cell<bool>,
    timer: Cell<Option<TimerId>>,
}

impl Waiter {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            waker: RefCell::new(None),
            expired: Cell::new(false),
            timed_out: Cell::new(false),
            timer: Cell::new(None),
        })
    }

    /// Record the waker for the task currently polling this waiter's
    /// future, replacing any previously stored one.
    pub fn set_waker(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        let needs_update = match slot.as_ref() {
            Some(current) => !current.will_wake(waker),
            None => true,
        };
        if needs_update {
            *slot = Some(waker.clone());
        }
    }

    /// `true` once this waiter's continuation has already run, by either
    /// path.
    pub fn is_expired(&self) -> bool {
        self.expired.get()
    }

    /// `true` if this waiter's continuation ran because its timer fired
    /// first, rather than a normal wake. Only meaningful once
    /// [`Waiter::is_expired`] is `true`.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.get()
    }

    /// Arm (or re-arm) a timer against `scheduler` that will mark this
    /// waiter expired and wake it after `after` elapses, unless cancelled
    /// first by a normal wake.
    pub(crate) fn arm_timeout(self: &Rc<Self>, scheduler: &Rc<dyn Scheduler>, after: Duration) {
        let this = self.clone();
        let timeout_waker = make_timeout_waker(this);
        let id = scheduler.arm_timer(after, timeout_waker);
        self.timer.set(Some(id));
    }

    /// Idempotently mark this waiter expired and wake its continuation.
    /// A no-op if it already fired.
    pub(crate) fn fire(&self) {
        if !self.expired.replace(true) {
            if let Some(waker) = self.waker.borrow_mut().take() {
                waker.wake();
            }
        }
    }

    /// Like [`Waiter::fire`], but defers the entire effect, marking
    /// expired and waking the continuation, to the scheduler's next
    /// turn, rather than performing it now. Used by `Queue`'s "extra
    /// deferral" discipline (see `queue` module docs) so a blocked
    /// putter's continuation genuinely does not run until one turn after
    /// the getter that freed its slot, rather than merely queuing the same
    /// effect this instant.
    pub(crate) fn fire_deferred(self: &Rc<Self>, scheduler: &Rc<dyn Scheduler>) {
        scheduler.schedule(deferred_fire_waker(self.clone()));
    }

    /// Like [`Waiter::fire`], but additionally records that the timeout
    /// path won the race, so callers can resolve their `TimedOut` variant
    /// instead of the normal one. Called only from the timer waker.
    fn fire_timeout(&self) {
        if !self.expired.replace(true) {
            self.timed_out.set(true);
            if let Some(waker) = self.waker.borrow_mut().take() {
                waker.wake();
            }
        }
    }

    pub(crate) fn cancel_timer(&self, scheduler: &Rc<dyn Scheduler>) {
        if let Some(id) = self.timer.take() {
            scheduler.cancel_timer(id);
        }
    }
}

/// A `Waker` that, when woken (by the scheduler's timer firing), marks the
/// given waiter expired via [`Waiter::fire_timeout`] rather than
/// [`Waiter::fire`], so a primitive racing a normal wake against this one
/// can tell which path actually won.
///
/// Built from a hand-written `RawWaker` rather than `std::task::Wake`
/// because the latter requires `Arc<Self>`; every other allocation in this
/// crate is an `Rc`, and there is only ever one thread to share it with.
fn make_timeout_waker(waiter: Rc<Waiter>) -> Waker {
    waiter_raw_waker(waiter, Waiter::fire_timeout)
}

/// A `Waker` that, when woken (by a scheduler turn draining it), fires the
/// given waiter normally via [`Waiter::fire`]. Handed to
/// [`crate::scheduler::Scheduler::schedule`] by [`Waiter::fire_deferred`]
/// so that neither the expiry flip nor the continuation's re-poll happens
/// before the scheduler actually gets to it.
fn deferred_fire_waker(waiter: Rc<Waiter>) -> Waker {
    waiter_raw_waker(waiter, Waiter::fire)
}

/// Shared `RawWaker` plumbing for the two waiter-owned wakers above; only
/// the action invoked on wake differs.
fn waiter_raw_waker(waiter: Rc<Waiter>, action: fn(&Waiter)) -> Waker {
    use std::task::{RawWaker, RawWakerVTable};

    struct Payload {
        waiter: Rc<Waiter>,
        action: fn(&Waiter),
    }

    unsafe fn clone(data: *const ()) -> RawWaker {
        let payload = Rc::from_raw(data as *const Payload);
        std::mem::forget(payload.clone());
        RawWaker::new(Rc::into_raw(payload) as *const (), &VTABLE)
    }
    unsafe fn wake(data: *const ()) {
        let payload = Rc::from_raw(data as *const Payload);
        (payload.action)(&payload.waiter);
    }
    unsafe fn wake_by_ref(data: *const ()) {
        let payload = Rc::from_raw(data as *const Payload);
        (payload.action)(&payload.waiter);
        std::mem::forget(payload);
    }
    unsafe fn drop_(data: *const ()) {
        drop(Rc::from_raw(data as *const Payload));
    }

    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_);

    let payload = Rc::new(Payload { waiter, action });
    let raw = RawWaker::new(Rc::into_raw(payload) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

/// An ordered, FIFO sequence of [`Waiter`]s, pruned of already-expired
/// entries at the head before every inspecting operation.
pub struct WaiterQueue {
    entries: RefCell<VecDeque<Rc<Waiter>>>,
}

impl WaiterQueue {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(VecDeque::new()),
        }
    }

    /// Number of waiters currently queued, after pruning expired ones.
    pub fn len(&self) -> usize {
        self.prune();
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self) {
        let mut entries = self.entries.borrow_mut();
        while matches!(entries.front(), Some(w) if w.is_expired()) {
            entries.pop_front();
        }
    }

    /// Register a new waiter at the tail, arming a timeout against
    /// `scheduler` if `timeout` is `Some`. Returns the waiter so the
    /// caller's future can poll it and deregister it on drop via
    /// [`WaiterQueue::remove`].
    pub fn push(
        &self,
        scheduler: &Rc<dyn Scheduler>,
        timeout: Option<Duration>,
    ) -> Rc<Waiter> {
        let waiter = Waiter::new();
        if let Some(after) = timeout {
            waiter.arm_timeout(scheduler, after);
        }
        self.entries.borrow_mut().push_back(waiter.clone());
        waiter
    }

    /// Remove `waiter` from the queue if still present (used when a
    /// pending future is dropped before resolving, i.e. cancelled) and
    /// cancel its timer.
    pub fn remove(&self, scheduler: &Rc<dyn Scheduler>, waiter: &Rc<Waiter>) {
        waiter.cancel_timer(scheduler);
        let mut entries = self.entries.borrow_mut();
        if let Some(pos) = entries.iter().position(|w| Rc::ptr_eq(w, waiter)) {
            entries.remove(pos);
        }
    }

    /// Prune expired waiters, then wake up to `n` live ones in FIFO order,
    /// cancelling each one's timer as it is woken. Pruning happens again
    /// between pops since waking a waiter can age out its neighbor (e.g.
    /// both were about to expire on the same turn).
    pub fn notify(&self, scheduler: &Rc<dyn Scheduler>, n: usize) -> usize {
        let mut woken = 0;
        for _ in 0..n {
            self.prune();
            let next = self.entries.borrow_mut().pop_front();
            match next {
                Some(waiter) => {
                    waiter.cancel_timer(scheduler);
                    waiter.fire();
                    woken += 1;
                }
                None => break,
            }
        }
        woken
    }

    /// Wake every currently-queued live waiter.
    pub fn notify_all(&self, scheduler: &Rc<dyn Scheduler>) -> usize {
        let n = self.len();
        self.notify(scheduler, n)
    }

    /// Pop the single head waiter without requiring `notify`'s
    /// scheduler-timer bookkeeping semantics, used by callers (like
    /// `Queue`'s rendezvous path) that want to hand a value directly to
    /// the woken waiter's continuation rather than going through a plain
    /// `notify`. The returned waiter has already had its timer cancelled;
    /// the caller must still call [`Waiter::fire`]-equivalent wake by
    /// dropping the returned value's waker via [`WaiterQueue::wake_popped`].
    pub fn pop_front(&self, scheduler: &Rc<dyn Scheduler>) -> Option<Rc<Waiter>> {
        self.prune();
        let waiter = self.entries.borrow_mut().pop_front()?;
        waiter.cancel_timer(scheduler);
        Some(waiter)
    }

    /// Wake a waiter previously removed with [`WaiterQueue::pop_front`].
    pub fn wake_popped(waiter: &Rc<Waiter>) {
        waiter.fire();
    }
}

impl Default for WaiterQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience: resolve the scheduler a primitive should use, preferring
/// an explicitly injected one and falling back to the thread-local
/// current scheduler installed via [`scheduler::set_current`].
pub fn resolve_scheduler(explicit: &Option<Rc<dyn Scheduler>>) -> Rc<dyn Scheduler> {
    match explicit {
        Some(s) => s.clone(),
        None => scheduler::with_current(|s| s.clone()),
    }
}
