//! The suspended-caller continuation type and its FIFO queue.
//!
//! This is the facade the specification calls out as a thin contract over "the host's async
//! primitive": enqueue, wake one/all with a status, terminate one, set a timeout. The subsystem
//! itself never blocks — every entry point either completes synchronously or registers an
//! [`Async`] and returns [`Status::Pending`](crate::status::Status::Pending).

use crate::iosb::Iosb;
use crate::status::Status;
use crate::timer::{HostClock, TimerHandle};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Delivers the final outcome of an [`Async`] to whoever registered it.
///
/// A boxed `FnOnce` is enough here: the host's real completion channel (an RPC reply, a woken
/// future) is an external collaborator (§1 of the spec), so this crate only needs to call it
/// exactly once.
pub type CompletionSink = Box<dyn FnOnce(Status, Rc<RefCell<Iosb>>)>;

/// A suspended caller: an I/O status block plus a one-shot completion callback.
pub struct Async {
    iosb: Rc<RefCell<Iosb>>,
    sink: RefCell<Option<CompletionSink>>,
    timeout: RefCell<Option<TimerHandle>>,
}

impl std::fmt::Debug for Async {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Async").field("status", &self.status()).finish()
    }
}

impl Async {
    /// Registers a new suspended caller over `iosb`, to be completed exactly once via `sink`.
    pub fn new(iosb: Rc<RefCell<Iosb>>, sink: CompletionSink) -> Rc<Self> {
        Rc::new(Self { iosb, sink: RefCell::new(Some(sink)), timeout: RefCell::new(None) })
    }

    /// The shared I/O status block this async is suspended on.
    pub fn iosb(&self) -> &Rc<RefCell<Iosb>> {
        &self.iosb
    }

    /// The IOSB's current status; `Pending` until [`terminate`](Self::terminate) is called.
    pub fn status(&self) -> Status {
        self.iosb.borrow().status
    }

    /// Whether this async is still awaiting completion.
    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Arms a timeout; if still pending when `clock` fires it, the async completes with
    /// `on_timeout`.
    pub fn set_timeout(self: &Rc<Self>, clock: &dyn HostClock, delay: std::time::Duration, on_timeout: Status) {
        let weak = Rc::downgrade(self);
        let handle = clock.schedule(delay, move || {
            if let Some(a) = weak.upgrade() {
                if a.is_pending() {
                    a.terminate(on_timeout);
                }
            }
        });
        *self.timeout.borrow_mut() = Some(handle);
    }

    /// Completes the async with `status`, invoking its sink exactly once. Idempotent: a second
    /// call is a no-op, matching the host async layer's "terminate is safe to call once the
    /// result is already settled" contract.
    pub fn terminate(self: &Rc<Self>, status: Status) {
        let Some(sink) = self.sink.borrow_mut().take() else { return };
        if self.iosb.borrow().status == Status::Pending {
            self.iosb.borrow_mut().status = status;
        }
        if let Some(h) = self.timeout.borrow_mut().take() {
            h.cancel();
        }
        sink(status, Rc::clone(&self.iosb));
    }
}

/// A FIFO queue of suspended callers, created lazily per endpoint (`read_q`/`write_q`) or per
/// [`NamedPipe`](crate::named_pipe::NamedPipe) (`waiters`).
#[derive(Default)]
pub struct AsyncQueue {
    entries: RefCell<VecDeque<Rc<Async>>>,
}

impl AsyncQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `async_` to the back of the queue, preserving FIFO completion order.
    pub fn push(&self, async_: Rc<Async>) {
        self.entries.borrow_mut().push_back(async_);
    }

    /// Returns the async at the front of the queue that is still pending, without removing it.
    /// Mirrors `find_pending_async`: asyncs that have already completed (e.g. cancelled by the
    /// host) are dropped from the front as they're encountered.
    pub fn peek_pending(&self) -> Option<Rc<Async>> {
        loop {
            let front = self.entries.borrow().front().cloned();
            match front {
                Some(a) if a.is_pending() => return Some(a),
                Some(_) => {
                    self.entries.borrow_mut().pop_front();
                }
                None => return None,
            }
        }
    }

    /// Removes and returns the front pending async, if any.
    pub fn pop_pending(&self) -> Option<Rc<Async>> {
        let a = self.peek_pending()?;
        self.entries.borrow_mut().pop_front();
        Some(a)
    }

    /// Terminates every entry with `status`, draining the queue.
    pub fn wake_all(&self, status: Status) {
        let drained: Vec<_> = self.entries.borrow_mut().drain(..).collect();
        for a in drained {
            a.terminate(status);
        }
    }

    /// Terminates exactly the front entry with `status`, if any is pending.
    pub fn wake_one(&self, status: Status) -> bool {
        match self.pop_pending() {
            Some(a) => {
                a.terminate(status);
                true
            }
            None => false,
        }
    }

    /// Whether the queue currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(feature = "tokio")]
pub mod tokio_support {
    //! An optional `Future`-based wrapper over the synchronous [`Async`]/[`CompletionSink`]
    //! core, mirroring the teacher's split between a sync stream type and its `tokio` sibling.
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Awaits the completion of an [`Async`] registered with a [`tokio::sync::oneshot`] sink.
    pub struct AsyncFuture {
        rx: tokio::sync::oneshot::Receiver<(Status, Rc<RefCell<Iosb>>)>,
    }

    /// Builds an [`Async`] whose completion resolves a [`AsyncFuture`].
    pub fn async_with_future(iosb: Rc<RefCell<Iosb>>) -> (Rc<Async>, AsyncFuture) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let sink: CompletionSink = Box::new(move |status, iosb| {
            let _ = tx.send((status, iosb));
        });
        (Async::new(iosb, sink), AsyncFuture { rx })
    }

    impl Future for AsyncFuture {
        type Output = (Status, Rc<RefCell<Iosb>>);
        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            match Pin::new(&mut self.rx).poll(cx) {
                Poll::Ready(Ok(v)) => Poll::Ready(v),
                Poll::Ready(Err(_)) => Poll::Pending,
                Poll::Pending => Poll::Pending,
            }
        }
    }
}
