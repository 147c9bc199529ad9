//! The fields and control flow shared by both ends of a pipe connection.
//!
//! Grounded on `original_source`'s `struct pipe_end` and the free functions that operate on it
//! (`pipe_end_disconnect`, `message_queue_read`, `reselect_read_queue`, `reselect_write_queue`).
//! The specification's Design Notes call for a tagged variant instead of a trait object here
//! (§9 "Polymorphism over pipe ends"): [`PipeEndKind`] wraps the owning `Rc` to whichever of
//! [`PipeServer`](crate::server::PipeServer) / [`PipeClient`](crate::client::PipeClient) this end
//! belongs to, and every function below dispatches on it directly rather than through a trait.

use crate::async_queue::AsyncQueue;
use crate::client::PipeClient;
use crate::host_fd::HostFd;
use crate::message::PipeMessage;
use crate::server::PipeServer;
use crate::status::Status;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Pipe-wide mode/type flags, taken verbatim from the `NAMED_PIPE_*` bit values the original
/// source tests with `pipe_end->flags & ...`.
pub mod flags {
    /// Writes on this end preserve message boundaries (vs. byte-stream writes).
    pub const MESSAGE_STREAM_WRITE: u32 = 0x1;
    /// Reads on this end preserve message boundaries (vs. byte-stream reads).
    pub const MESSAGE_STREAM_READ: u32 = 0x2;
    /// The pipe end was opened for overlapped (non-blocking-wait) I/O.
    pub const NONBLOCKING_MODE: u32 = 0x4;
}

/// Data common to a [`PipeServer`] and [`PipeClient`] end.
///
/// Embedded by value in both, mirroring the C layout where `struct pipe_server`/`struct
/// pipe_client` start with a `struct pipe_end pipe_end` header rather than pointing to one.
pub struct PipeEnd {
    pub flags: Cell<u32>,
    /// Size of buffered data that doesn't block the writer (`buffer_size` in the spec/GLOSSARY).
    pub buffer_size: Cell<usize>,
    pub message_queue: RefCell<VecDeque<Rc<PipeMessage>>>,
    pub read_q: AsyncQueue,
    pub write_q: AsyncQueue,
    /// Callers parked on a flush of this end, woken once everything this end wrote has been read
    /// by its peer. Mirrors `fd_async_wake_up(pipe_end->fd, ASYNC_TYPE_WAIT, ...)`.
    pub flush_q: AsyncQueue,
    pub host: RefCell<HostFd>,
}

impl PipeEnd {
    pub fn new(flags: u32, buffer_size: usize, host: HostFd) -> Self {
        Self {
            flags: Cell::new(flags),
            buffer_size: Cell::new(buffer_size),
            message_queue: RefCell::new(VecDeque::new()),
            read_q: AsyncQueue::new(),
            write_q: AsyncQueue::new(),
            flush_q: AsyncQueue::new(),
            host: RefCell::new(host),
        }
    }
}

/// Either half of a pipe connection, addressed uniformly for disconnect/reselect plumbing.
#[derive(Clone)]
pub enum PipeEndKind {
    Server(Rc<PipeServer>),
    Client(Rc<PipeClient>),
}

impl PipeEndKind {
    /// The common fields of this end.
    pub fn end(&self) -> &PipeEnd {
        match self {
            Self::Server(s) => &s.end,
            Self::Client(c) => &c.end,
        }
    }

    /// The other end of the connection, if still connected.
    pub fn connection(&self) -> Option<PipeEndKind> {
        match self {
            Self::Server(s) => s.client.borrow().clone().map(PipeEndKind::Client),
            Self::Client(c) => c.server.borrow().upgrade().map(PipeEndKind::Server),
        }
    }

    /// Severs this end's half of the connection edge (the other end must be cleared separately).
    pub fn clear_connection(&self) {
        match self {
            Self::Server(s) => *s.client.borrow_mut() = None,
            Self::Client(c) => *c.server.borrow_mut() = Weak::new(),
        }
    }

    /// Whether I/O for this end is routed through the in-process message queue rather than a
    /// real host socket (`use_server_io` in the original source).
    pub fn use_server_io(&self) -> bool {
        self.end().flags.get() & flags::MESSAGE_STREAM_WRITE != 0
    }
}

thread_local! {
    /// Set while a reselect call is itself terminating an async, to suppress the recursive
    /// reselect that `Async::terminate` would otherwise trigger. Grounded on the original
    /// source's file-scope `static int ignore_reselect` — a single flag is sufficient because
    /// this subsystem never reselects concurrently on more than one thread.
    static IGNORE_RESELECT: Cell<bool> = const { Cell::new(false) };
}

fn reselect_guarded(f: impl FnOnce()) {
    if IGNORE_RESELECT.with(Cell::get) {
        return;
    }
    IGNORE_RESELECT.with(|c| c.set(true));
    f();
    IGNORE_RESELECT.with(|c| c.set(false));
}

/// Drains as much of `pipe_end`'s message queue as pending readers can take, in the style of
/// `message_queue_read`. Returns the number of reads completed.
fn message_queue_read(pipe_end: &PipeEndKind) -> usize {
    let end = pipe_end.end();
    let stream_read = end.flags.get() & flags::MESSAGE_STREAM_READ != 0;
    let mut completed = 0;
    loop {
        let Some(async_) = end.read_q.peek_pending() else { break };
        let Some(message) = end.message_queue.borrow().front().cloned() else { break };

        let requested = async_.iosb().borrow().requested_size;
        let available = if stream_read {
            message.remaining()
        } else {
            end.message_queue.borrow().iter().map(|m| m.remaining()).sum()
        };
        let out_size = requested.min(available);
        let status = if stream_read && message.read_pos.get() + out_size < message.in_size() {
            Status::BufferOverflow
        } else {
            Status::Success
        };

        let mut out = Vec::with_capacity(out_size);
        let mut remaining = out_size;
        while remaining > 0 {
            let Some(front) = end.message_queue.borrow().front().cloned() else { break };
            let take = remaining.min(front.remaining());
            if take > 0 {
                let data = front.iosb.borrow();
                let start = front.read_pos.get();
                if let Some(bytes) = data.data.as_ref() {
                    out.extend_from_slice(&bytes[start..start + take]);
                }
                drop(data);
                front.read_pos.set(start + take);
            }
            remaining -= take;
            if front.is_drained() {
                front.wake();
                end.message_queue.borrow_mut().pop_front();
            } else if take == 0 {
                break;
            }
        }

        async_.iosb().borrow_mut().data = Some(out);
        async_.iosb().borrow_mut().result = out_size;
        if async_.iosb().borrow().status == Status::Pending {
            async_.iosb().borrow_mut().status = status;
        }
        let exposed = if out_size > 0 { Status::Alerted } else { status };
        end.read_q.pop_pending();
        async_.terminate(exposed);
        completed += 1;
    }
    completed
}

/// Wakes as many pending writers on `pipe_end`'s connection as current buffering allows,
/// mirroring `reselect_write_queue`.
pub fn reselect_write_queue(pipe_end: &PipeEndKind) {
    reselect_guarded(|| {
        let Some(reader) = pipe_end.connection() else { return };
        let reader_end = reader.end();
        let mut avail: usize = 0;
        let capacity = reader_end.buffer_size.get();

        let pending: Vec<Rc<PipeMessage>> =
            reader_end.message_queue.borrow().iter().cloned().collect();
        for message in pending {
            if message.writer.borrow().is_none() {
                if message.is_drained() {
                    remove_message(reader_end, &message);
                }
                continue;
            }
            avail += message.remaining();
            let still_pending = message.iosb.borrow().status == Status::Pending;
            if still_pending && (avail <= capacity || message.in_size() == 0) {
                message.wake();
            }
        }
    });
}

fn remove_message(end: &PipeEnd, target: &Rc<PipeMessage>) {
    end.message_queue.borrow_mut().retain(|m| !Rc::ptr_eq(m, target));
}

/// Wakes as many pending readers on `pipe_end` as queued messages allow, mirroring
/// `reselect_read_queue`, and cascades into the connected writer's queue afterward.
pub fn reselect_read_queue(pipe_end: &PipeEndKind) {
    let mut read_done = false;
    reselect_guarded(|| {
        read_done = message_queue_read(pipe_end) > 0;
    });

    if let Some(connection) = pipe_end.connection() {
        if pipe_end.end().message_queue.borrow().is_empty() {
            // Everything the peer wrote into this end has now been read: wake any flush parked
            // on the peer's own end, mirroring `fd_async_wake_up(pipe_end->connection->fd, ...)`.
            connection.end().flush_q.wake_all(Status::Success);
        } else if read_done {
            reselect_write_queue(&connection);
        }
    }
}

/// Tears down one end of a connection, terminating its queues and messages with `status`, and
/// cascades the same teardown onto the other end. Mirrors `pipe_end_disconnect`.
pub fn pipe_end_disconnect(pipe_end: &PipeEndKind, status: Status) {
    let connection = pipe_end.connection();
    pipe_end.clear_connection();
    pipe_end.end().flush_q.wake_all(status);

    if pipe_end.use_server_io() {
        let end = pipe_end.end();
        end.read_q.wake_all(status);
        let messages: Vec<Rc<PipeMessage>> = end.message_queue.borrow_mut().drain(..).collect();
        for message in messages {
            if let Some(writer) = message.writer.borrow_mut().take() {
                writer.terminate(status);
            }
        }
    }

    if let Some(connection) = connection {
        connection.clear_connection();
        pipe_end_disconnect(&connection, status);
    }
}

/// Releases queues and any still-queued (never-picked-up) messages for `pipe_end`. Mirrors
/// `pipe_end_destroy`; unlike the C version this does not assert the queue is already empty,
/// since `Drop` order in Rust can't guarantee `pipe_end_disconnect` always ran first.
pub fn pipe_end_destroy(pipe_end: &PipeEnd) {
    pipe_end.message_queue.borrow_mut().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_fd::HostFd;
    use crate::iosb::Iosb;
    use crate::named_pipe::NamedPipe;
    use crate::server::PipeState;
    use std::rc::Rc;

    fn fresh_pair(buffer_size: usize) -> (Rc<PipeServer>, Rc<PipeClient>) {
        let pipe = NamedPipe::new_for_test();
        let server = PipeServer::new_for_test(
            Rc::downgrade(&pipe),
            flags::MESSAGE_STREAM_WRITE | flags::MESSAGE_STREAM_READ,
            buffer_size,
        );
        let client = PipeClient::new_for_test(
            Rc::downgrade(&server),
            flags::MESSAGE_STREAM_WRITE | flags::MESSAGE_STREAM_READ,
            buffer_size,
        );
        *server.client.borrow_mut() = Some(Rc::clone(&client));
        server.state.set(PipeState::ConnectedServer);
        (server, client)
    }

    #[test]
    fn message_mode_read_delivers_whole_message_and_wakes_writer() {
        let (server, client) = fresh_pair(4096);
        let server_kind = PipeEndKind::Server(Rc::clone(&server));
        let client_kind = PipeEndKind::Client(Rc::clone(&client));

        let iosb = Rc::new(RefCell::new(Iosb::for_write(b"hello".to_vec())));
        let writer_seen = Rc::new(RefCell::new(None));
        let seen2 = Rc::clone(&writer_seen);
        let writer_async =
            crate::async_queue::Async::new(Rc::clone(&iosb), Box::new(move |s, _| *seen2.borrow_mut() = Some(s)));
        let message = Rc::new(PipeMessage::new(iosb, Some(writer_async)));
        client.end.message_queue.borrow_mut().push_back(message);

        let read_iosb = Rc::new(RefCell::new(Iosb::for_read(16)));
        let reader_seen = Rc::new(RefCell::new(None));
        let rseen2 = Rc::clone(&reader_seen);
        let reader_async =
            crate::async_queue::Async::new(Rc::clone(&read_iosb), Box::new(move |s, _| *rseen2.borrow_mut() = Some(s)));
        client.end.read_q.push(reader_async);

        reselect_read_queue(&client_kind);

        assert_eq!(*reader_seen.borrow(), Some(Status::Alerted));
        assert_eq!(*writer_seen.borrow(), Some(Status::Alerted));
        assert_eq!(read_iosb.borrow().data.as_deref(), Some(b"hello".as_slice()));
        let _ = server_kind;
    }

    #[test]
    fn disconnect_cascades_to_both_ends() {
        let (server, client) = fresh_pair(4096);
        let server_kind = PipeEndKind::Server(Rc::clone(&server));
        let client_kind = PipeEndKind::Client(Rc::clone(&client));
        assert!(server_kind.connection().is_some());
        pipe_end_disconnect(&server_kind, Status::PipeBroken);
        assert!(server_kind.connection().is_none());
        assert!(client_kind.connection().is_none());
    }
}
