//! Minimal poll-once harness for driving this crate's own futures in
//! tests, without depending on a full async runtime.
//!
//! Exposed only under the `test-util` feature (this crate's own tests and
//! its `tests/` integration suite enable it via the dev-dependency-on-self
//! trick in `Cargo.toml`), the same way `tokio` gates `tokio::time::pause`/
//! `advance` behind its own non-default `test-util` feature.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

fn noop_clone(_: *const ()) -> RawWaker {
    RawWaker::new(std::ptr::null(), &NOOP_VTABLE)
}
fn noop(_: *const ()) {}

static NOOP_VTABLE: RawWakerVTable = RawWakerVTable::new(noop_clone, noop, noop, noop);

/// A waker whose `wake()` does nothing. Suitable for tests that drive
/// progress explicitly via `notify`/`set`/a [`crate::scheduler::LocalScheduler`]
/// turn rather than relying on the waker to trigger a re-poll.
pub fn noop_waker() -> Waker {
    let raw = RawWaker::new(std::ptr::null(), &NOOP_VTABLE);
    unsafe { Waker::from_raw(raw) }
}

/// Poll `future` exactly once with a no-op waker, returning `Some(output)`
/// if it resolved, `None` if it is still pending.
pub fn poll_once<F: Future + ?Sized>(future: Pin<&mut F>) -> Option<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match future.poll(&mut cx) {
        Poll::Ready(v) => Some(v),
        Poll::Pending => None,
    }
}
