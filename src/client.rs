//! The client side of a pipe connection.

use crate::pipe_end::{pipe_end_disconnect, pipe_end_destroy, PipeEnd, PipeEndKind};
use crate::server::{set_server_state, PipeServer, PipeState};
use crate::status::Status;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One client-side handle, created by opening a named pipe that has a listening server.
pub struct PipeClient {
    pub end: PipeEnd,
    /// Weak edge back to the server; the server owns the client strongly.
    pub server: RefCell<Weak<PipeServer>>,
    pub flags: u32,
}

impl PipeClient {
    pub fn new(server: Weak<PipeServer>, flags: u32, pipe_flags: u32, buffer_size: usize, host: crate::host_fd::HostFd) -> Rc<Self> {
        Rc::new(Self { end: PipeEnd::new(pipe_flags, buffer_size, host), server: RefCell::new(server), flags })
    }

    #[cfg(test)]
    pub fn new_for_test(server: Weak<PipeServer>, pipe_flags: u32, buffer_size: usize) -> Rc<Self> {
        Self::new(server, 0, pipe_flags, buffer_size, crate::host_fd::HostFd::ServerManaged)
    }

    /// Whether the client's connection is still signaled readable, i.e. it has a live host
    /// transport. Mirrors `pipe_client_signaled`.
    pub fn is_signaled(&self) -> bool {
        !matches!(*self.end.host.borrow(), crate::host_fd::HostFd::ServerManaged) || self.server.borrow().upgrade().is_some()
    }
}

/// Finalizes destruction of a client handle: disconnects, then flips a still-connected server
/// into `WaitDisconnect` so a later flush can still drain it. Mirrors `pipe_client_destroy`.
pub fn destroy(client: &Rc<PipeClient>) {
    pipe_end_disconnect(&PipeEndKind::Client(Rc::clone(client)), Status::PipeBroken);

    if let Some(server) = client.server.borrow().upgrade() {
        if server.state.get() == PipeState::ConnectedServer {
            set_server_state(&server, PipeState::WaitDisconnect);
        } else {
            debug_assert!(false, "server in unexpected state during client teardown");
        }
        *server.client.borrow_mut() = None;
    }
    *client.server.borrow_mut() = Weak::new();

    pipe_end_destroy(&client.end);
}
