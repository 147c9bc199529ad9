//! One in-flight message-mode write, queued until a reader drains it.

use crate::async_queue::Async;
use crate::iosb::Iosb;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A single write sitting in a message-mode endpoint's queue.
///
/// Grounded on `original_source`'s `struct pipe_message`: `entry` becomes the queue's own
/// position (an intrusive list there, a `VecDeque` slot here), `read_pos` and `iosb` are kept
/// verbatim, and `async` is the write's own [`Async`] — present while the write is still pending
/// completion, cleared once [`wake`](Self::wake) has run.
pub struct PipeMessage {
    /// The writer's I/O status block; shared so a partial read can update `result`/`status` in
    /// place while the message is still queued.
    pub iosb: Rc<RefCell<Iosb>>,
    /// Bytes of `iosb.data` already delivered to readers.
    pub read_pos: Cell<usize>,
    /// The write call's suspended caller, if it hasn't completed yet.
    pub writer: RefCell<Option<Rc<Async>>>,
}

impl PipeMessage {
    /// Queues a new message backed by `iosb`, with `writer` suspended until it fully drains.
    pub fn new(iosb: Rc<RefCell<Iosb>>, writer: Option<Rc<Async>>) -> Self {
        Self { iosb, read_pos: Cell::new(0), writer: RefCell::new(writer) }
    }

    /// Total size of the original write.
    pub fn in_size(&self) -> usize {
        self.iosb.borrow().in_size()
    }

    /// Bytes of this message not yet delivered to any reader.
    pub fn remaining(&self) -> usize {
        self.in_size() - self.read_pos.get()
    }

    /// Whether every byte of this message has been delivered.
    pub fn is_drained(&self) -> bool {
        self.remaining() == 0
    }

    /// Completes the writer's async once this message is fully drained.
    ///
    /// Mirrors `wake_message`: the writer's IOSB reports full success (the write itself always
    /// succeeds once queued — only a *reader* can observe a partial transfer), and the writer's
    /// async is terminated with `Alerted` rather than `Success` when any byte was ever written,
    /// distinguishing "progress was made" from a zero-length write.
    pub fn wake(&self) {
        let in_size = self.in_size();
        self.iosb.borrow_mut().complete(crate::status::Status::Success, in_size);
        if let Some(writer) = self.writer.borrow_mut().take() {
            let status =
                if in_size > 0 { crate::status::Status::Alerted } else { crate::status::Status::Success };
            writer.terminate(status);
        }
    }
}
