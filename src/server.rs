//! The listening/connected/disconnected state machine of a server-side pipe instance.

use crate::async_queue::AsyncQueue;
use crate::client::PipeClient;
use crate::host_fd::HostFd;
use crate::iosb::Iosb;
use crate::named_pipe::NamedPipe;
use crate::pipe_end::{pipe_end_disconnect, pipe_end_destroy, PipeEnd, PipeEndKind};
use crate::status::Status;
use crate::timer::{CooperativeClock, HostClock, TimerHandle};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Mirrors `enum pipe_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    IdleServer,
    WaitOpen,
    ConnectedServer,
    WaitDisconnect,
    WaitConnect,
}

/// One server-side instance of a named pipe (one `CreateNamedPipe` handle).
pub struct PipeServer {
    pub end: PipeEnd,
    pub state: Cell<PipeState>,
    /// Owning edge to the connected client, mirroring the server-owns-client graph direction.
    pub client: RefCell<Option<Rc<PipeClient>>>,
    pub pipe: Weak<NamedPipe>,
    pub flush_poll: RefCell<Option<TimerHandle>>,
    pub options: Cell<u32>,
    /// Whether a `FSCTL_PIPE_LISTEN` call is currently suspended awaiting a connection.
    pub listen_waiter: AsyncQueue,
}

impl PipeServer {
    pub fn new(pipe: Weak<NamedPipe>, options: u32, pipe_flags: u32, buffer_size: usize) -> Rc<Self> {
        let server = Rc::new(Self {
            end: PipeEnd::new(pipe_flags, buffer_size, HostFd::ServerManaged),
            state: Cell::new(PipeState::IdleServer),
            client: RefCell::new(None),
            pipe,
            flush_poll: RefCell::new(None),
            options: Cell::new(options),
            listen_waiter: AsyncQueue::new(),
        });
        set_server_state(&server, PipeState::IdleServer);
        server
    }

    #[cfg(test)]
    pub fn new_for_test(pipe: Weak<NamedPipe>, pipe_flags: u32, buffer_size: usize) -> Rc<Self> {
        Self::new(pipe, 0, pipe_flags, buffer_size)
    }

    fn kind(self: &Rc<Self>) -> PipeEndKind {
        PipeEndKind::Server(Rc::clone(self))
    }
}

/// Mirrors `set_server_state`: transitions are one-way data mutations plus the invariant that a
/// disconnected server has no live host transport.
pub fn set_server_state(server: &Rc<PipeServer>, state: PipeState) {
    server.state.set(state);
    match state {
        PipeState::ConnectedServer | PipeState::WaitDisconnect => {
            debug_assert!(server.end.host.borrow().is_socket() || matches!(*server.end.host.borrow(), HostFd::ServerManaged));
        }
        PipeState::WaitOpen | PipeState::IdleServer | PipeState::WaitConnect => {}
    }
}

/// Issues `FSCTL_PIPE_LISTEN`: suspends the caller until a client connects, or reports the
/// current state if listening doesn't make sense right now.
pub fn listen(server: &Rc<PipeServer>, iosb: Rc<RefCell<Iosb>>, sink: crate::async_queue::CompletionSink) -> Status {
    match server.state.get() {
        PipeState::IdleServer | PipeState::WaitConnect => {
            let async_ = crate::async_queue::Async::new(iosb, sink);
            server.listen_waiter.push(Rc::clone(&async_));
            set_server_state(server, PipeState::WaitOpen);
            if let Some(pipe) = server.pipe.upgrade() {
                pipe.waiters.wake_all(Status::Success);
            }
            Status::Pending
        }
        PipeState::ConnectedServer => Status::PipeConnected,
        PipeState::WaitDisconnect => Status::NoDataDetected,
        PipeState::WaitOpen => Status::InvalidHandle,
    }
}

/// Issues `FSCTL_PIPE_DISCONNECT`: tears down the active connection (if any) and parks the
/// server back in `WaitConnect`.
pub fn disconnect(server: &Rc<PipeServer>) -> Status {
    match server.state.get() {
        PipeState::ConnectedServer => {
            let client = server.client.borrow_mut().take();
            debug_assert!(client.is_some());
            notify_empty(server);
            pipe_end_disconnect(&PipeEndKind::Server(Rc::clone(server)), Status::PipeDisconnected);
            if let Some(client) = client {
                *client.server.borrow_mut() = Weak::new();
            }
            set_server_state(server, PipeState::WaitConnect);
            Status::Success
        }
        PipeState::WaitDisconnect => {
            pipe_end_disconnect(&PipeEndKind::Server(Rc::clone(server)), Status::PipeDisconnected);
            set_server_state(server, PipeState::WaitConnect);
            Status::Success
        }
        PipeState::IdleServer | PipeState::WaitOpen => Status::PipeListening,
        PipeState::WaitConnect => Status::PipeDisconnected,
    }
}

/// Whether data this server wrote is still unread by the client, used to decide whether a flush
/// can complete immediately. Mirrors `pipe_data_remaining`: message mode checks the client's
/// queue of not-yet-read messages; byte mode polls the client's fd for unread bytes.
fn data_remaining(server: &Rc<PipeServer>) -> bool {
    let Some(client) = server.client.borrow().clone() else { return false };
    if PipeEndKind::Server(Rc::clone(server)).use_server_io() {
        !client.end.message_queue.borrow().is_empty()
    } else {
        client.end.host.borrow().has_unread_data().unwrap_or(false)
    }
}

fn notify_empty(server: &Rc<PipeServer>) {
    if let Some(h) = server.flush_poll.borrow_mut().take() {
        h.cancel();
    }
}

/// Issues a flush: completes immediately if no data remains unread by the peer, otherwise
/// parks on the server's `flush_q` (woken as soon as a read drains the client's queue) while
/// also polling on a cooperative timer as a fallback for byte-mode pipes, whose reads bypass the
/// reselect machinery entirely. Mirrors `pipe_server_flush`/`check_flushed`.
pub fn flush(server: &Rc<PipeServer>, clock: &CooperativeClock, iosb: Rc<RefCell<Iosb>>, sink: crate::async_queue::CompletionSink) -> Status {
    if server.state.get() != PipeState::ConnectedServer || !data_remaining(server) {
        return Status::Success;
    }
    let async_ = crate::async_queue::Async::new(iosb, sink);
    server.end.flush_q.push(Rc::clone(&async_));
    poll_flush(Rc::clone(server), clock.clone(), async_);
    Status::Pending
}

fn poll_flush(server: Rc<PipeServer>, clock: CooperativeClock, async_: Rc<crate::async_queue::Async>) {
    if !async_.is_pending() {
        return;
    }
    if data_remaining(&server) {
        let server2 = Rc::clone(&server);
        let handle = clock.schedule(
            Duration::from_millis(100),
            Box::new(move || poll_flush(server2, clock.clone(), async_)),
        );
        *server.flush_poll.borrow_mut() = Some(handle);
    } else {
        async_.terminate(Status::Success);
    }
}

/// Finalizes destruction of a server instance: breaks any live connection, releases queues, and
/// decrements the owning pipe's instance count. Mirrors `pipe_server_destroy`.
pub fn destroy(server: &Rc<PipeServer>) {
    pipe_end_disconnect(&PipeEndKind::Server(Rc::clone(server)), Status::PipeBroken);
    notify_empty(server);
    pipe_end_destroy(&server.end);
    if let Some(client) = server.client.borrow_mut().take() {
        *client.server.borrow_mut() = Weak::new();
    }
    if let Some(pipe) = server.pipe.upgrade() {
        debug_assert!(pipe.instances.get() > 0, "destroying more server instances than were ever created");
        pipe.instances.set(pipe.instances.get().saturating_sub(1));
    }
}
