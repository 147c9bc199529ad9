//! Cooperative timers: flush polling and wait timeouts without a background thread.
//!
//! The subsystem never spawns its own thread (§1 of the specification: it is a single-threaded,
//! cooperatively scheduled object manager). Instead it exposes a [`HostClock`] trait the embedder
//! drives by calling [`HostClock::fire_due`] from its own event loop; [`CooperativeClock`] is the
//! default implementation, a deadline-ordered heap good enough for flush polling and
//! `FSCTL_PIPE_WAIT` timeouts alike.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A handle to a scheduled timer callback; dropping it does not cancel the timer, call
/// [`cancel`](Self::cancel) explicitly.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    clock: Rc<ClockInner>,
}

impl TimerHandle {
    /// Cancels the timer; a no-op if it has already fired or was already cancelled.
    pub fn cancel(&self) {
        self.clock.cancelled.borrow_mut().insert(self.id);
    }
}

/// Something that can schedule one-shot callbacks and later fire the due ones.
///
/// Grounded on `original_source`'s `add_timeout_user`/`remove_timeout_user` pair (used by
/// `pipe_server_flush`'s polling loop and by `FSCTL_PIPE_WAIT`'s deadline).
pub trait HostClock {
    /// Schedules `callback` to run once, no sooner than `delay` from now.
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle;

    /// Runs every callback whose deadline is now due, in deadline order.
    fn fire_due(&self, now: Instant);
}

struct Entry {
    deadline: Instant,
    id: u64,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Entry {}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts first.
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct ClockInner {
    heap: RefCell<BinaryHeap<Entry>>,
    cancelled: RefCell<std::collections::HashSet<u64>>,
    next_id: RefCell<u64>,
}

/// The default [`HostClock`]: a deadline-ordered heap with no thread or syscall of its own.
///
/// The embedder is expected to call [`fire_due`](HostClock::fire_due) periodically (e.g. once per
/// iteration of its own reactor loop) with the current time.
#[derive(Clone)]
pub struct CooperativeClock(Rc<ClockInner>);

impl Default for CooperativeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl CooperativeClock {
    /// Creates an empty clock.
    pub fn new() -> Self {
        Self(Rc::new(ClockInner {
            heap: RefCell::new(BinaryHeap::new()),
            cancelled: RefCell::new(std::collections::HashSet::new()),
            next_id: RefCell::new(0),
        }))
    }

    /// Whether any timer is currently armed (ignoring already-cancelled ones).
    pub fn is_empty(&self) -> bool {
        let cancelled = self.0.cancelled.borrow();
        self.0.heap.borrow().iter().all(|e| cancelled.contains(&e.id))
    }
}

impl HostClock for CooperativeClock {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let mut next_id = self.0.next_id.borrow_mut();
        let id = *next_id;
        *next_id += 1;
        drop(next_id);
        let deadline = Instant::now() + delay;
        self.0.heap.borrow_mut().push(Entry { deadline, id, callback: RefCell::new(Some(callback)) });
        TimerHandle { id, clock: Rc::clone(&self.0) }
    }

    fn fire_due(&self, now: Instant) {
        loop {
            let due = {
                let heap = self.0.heap.borrow();
                matches!(heap.peek(), Some(e) if e.deadline <= now)
            };
            if !due {
                break;
            }
            let entry = self.0.heap.borrow_mut().pop().expect("peeked Some above");
            if self.0.cancelled.borrow_mut().remove(&entry.id) {
                continue;
            }
            if let Some(cb) = entry.callback.borrow_mut().take() {
                cb();
            }
        }
    }
}
