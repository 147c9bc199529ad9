//! An instance family: the shared configuration every server instance of one pipe name agrees
//! on, plus the waiter queue for callers blocked on a name that has no listening server yet.

use crate::async_queue::AsyncQueue;
use crate::client::PipeClient;
use crate::host_fd::{HostFd, SocketPairFactory, UnixSocketPairFactory};
use crate::pipe_end::flags;
use crate::server::{set_server_state, PipeServer, PipeState};
use crate::status::Status;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Sharing-mode bits, mirroring `FILE_SHARE_READ`/`FILE_SHARE_WRITE`.
pub mod sharing {
    pub const READ: u32 = 0x1;
    pub const WRITE: u32 = 0x2;
}

/// Access-intent bits tested against a pipe's sharing mode when a client opens it.
pub mod access {
    pub const GENERIC_READ: u32 = 0x1;
    pub const GENERIC_WRITE: u32 = 0x2;
}

/// The configuration shared by every server instance created under one pipe name.
/// Grounded on `struct named_pipe`.
pub struct NamedPipe {
    /// Write-mode bit only, mirroring `named_pipe->flags`'s mask at creation time; governs
    /// pipe-wide checks like `set_named_pipe_info`'s "read-mode requires write-mode" rule.
    pub flags: u32,
    /// The full bit set requested at creation (including the read-mode bit), handed to each new
    /// server/client end's own `flags` — mirrors `create_pipe_server`/`create_pipe_client`
    /// receiving `req->flags` unmasked even though `named_pipe->flags` itself is masked.
    pub instance_flags: u32,
    pub sharing: u32,
    pub maxinstances: u32,
    pub outsize: usize,
    pub insize: usize,
    pub instances: Cell<u32>,
    pub timeout: Duration,
    pub servers: RefCell<Vec<Weak<PipeServer>>>,
    /// Callers parked on `FSCTL_PIPE_WAIT` for this name.
    pub waiters: AsyncQueue,
}

impl NamedPipe {
    #[cfg(test)]
    pub fn new_for_test() -> Rc<Self> {
        CreateNamedPipeOptions::new().build()
    }

    /// Adds a new server instance, enforcing `maxinstances`. Mirrors the `create_named_pipe`
    /// handler's reuse-vs-create-fresh branch.
    pub fn create_server(self: &Rc<Self>, options: u32) -> Result<Rc<PipeServer>, Status> {
        if self.instances.get() >= self.maxinstances {
            return Err(Status::InstanceNotAvailable);
        }
        let server = PipeServer::new(Rc::downgrade(self), options, self.instance_flags, self.insize);
        self.servers.borrow_mut().push(Rc::downgrade(&server));
        self.instances.set(self.instances.get() + 1);
        Ok(server)
    }

    /// Finds a server to connect a new client to: a `WaitOpen` listener first, an `IdleServer`
    /// as fallback. Mirrors `find_available_server`.
    pub fn find_available_server(&self) -> Option<Rc<PipeServer>> {
        let servers: Vec<Rc<PipeServer>> =
            self.servers.borrow().iter().filter_map(Weak::upgrade).collect();
        servers
            .iter()
            .find(|s| s.state.get() == PipeState::WaitOpen)
            .or_else(|| servers.iter().find(|s| s.state.get() == PipeState::IdleServer))
            .cloned()
    }

    /// Connects a new client to an available server, wiring up the transport appropriate to the
    /// pipe's mode (a real socket pair for byte mode, server-managed queues for message mode).
    /// Mirrors `named_pipe_open_file`.
    pub fn open_file(
        self: &Rc<Self>,
        access: u32,
        socket_factory: &dyn SocketPairFactory,
    ) -> Result<Rc<PipeClient>, Status> {
        let server = self.find_available_server().ok_or(Status::PipeNotAvailable)?;

        if (access & access::GENERIC_READ != 0 && self.sharing & sharing::READ == 0)
            || (access & access::GENERIC_WRITE != 0 && self.sharing & sharing::WRITE == 0)
        {
            return Err(Status::AccessDenied);
        }

        let message_mode = self.flags & flags::MESSAGE_STREAM_WRITE != 0;
        let client = if message_mode {
            *server.end.host.borrow_mut() = HostFd::ServerManaged;
            PipeClient::new(Rc::downgrade(&server), 0, self.instance_flags, self.outsize, HostFd::ServerManaged)
        } else {
            let (server_fd, client_fd) = socket_factory.make_pair(self.insize.max(self.outsize) as u32)?;
            *server.end.host.borrow_mut() = server_fd;
            PipeClient::new(Rc::downgrade(&server), 0, self.instance_flags, self.outsize, client_fd)
        };

        if server.state.get() == PipeState::WaitOpen {
            server.listen_waiter.wake_all(Status::Success);
        }
        set_server_state(&server, PipeState::ConnectedServer);
        *server.client.borrow_mut() = Some(Rc::clone(&client));
        Ok(client)
    }
}

/// Builder for a [`NamedPipe`]'s instance family, mirroring `create_named_pipe`'s request
/// fields. Shaped after the teacher's `ListenerOptions`/`StreamOptions` builders.
pub struct CreateNamedPipeOptions {
    flags: u32,
    sharing: u32,
    maxinstances: u32,
    outsize: usize,
    insize: usize,
    timeout: Duration,
}

impl Default for CreateNamedPipeOptions {
    fn default() -> Self {
        Self {
            flags: 0,
            sharing: sharing::READ | sharing::WRITE,
            maxinstances: u32::MAX,
            outsize: 0,
            insize: 0,
            timeout: Duration::from_millis(50),
        }
    }
}

impl CreateNamedPipeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables message-mode writes (and, transitively, allows message-mode reads to be enabled).
    pub fn message_stream_write(mut self, enabled: bool) -> Self {
        self.flags = if enabled {
            self.flags | flags::MESSAGE_STREAM_WRITE
        } else {
            self.flags & !flags::MESSAGE_STREAM_WRITE & !flags::MESSAGE_STREAM_READ
        };
        self
    }

    /// Enables message-mode reads; only meaningful once `message_stream_write` is set, mirroring
    /// the `create_named_pipe` handler's validation that read-mode implies write-mode.
    pub fn message_stream_read(mut self, enabled: bool) -> Self {
        if enabled {
            self.flags |= flags::MESSAGE_STREAM_READ;
        } else {
            self.flags &= !flags::MESSAGE_STREAM_READ;
        }
        self
    }

    pub fn sharing(mut self, sharing: u32) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn max_instances(mut self, max: u32) -> Self {
        self.maxinstances = max;
        self
    }

    pub fn out_buffer_size(mut self, size: usize) -> Self {
        self.outsize = size;
        self
    }

    pub fn in_buffer_size(mut self, size: usize) -> Self {
        self.insize = size;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates the combination, mirroring the `create_named_pipe` handler's parameter checks.
    pub fn validate(&self) -> Result<(), Status> {
        if self.sharing == 0 || self.sharing & !(sharing::READ | sharing::WRITE) != 0 {
            return Err(Status::InvalidParameter);
        }
        if self.flags & flags::MESSAGE_STREAM_WRITE == 0 && self.flags & flags::MESSAGE_STREAM_READ != 0 {
            return Err(Status::InvalidParameter);
        }
        Ok(())
    }

    pub fn build(self) -> Rc<NamedPipe> {
        Rc::new(NamedPipe {
            flags: self.flags & flags::MESSAGE_STREAM_WRITE,
            instance_flags: self.flags,
            sharing: self.sharing,
            maxinstances: self.maxinstances,
            outsize: self.outsize,
            insize: self.insize,
            instances: Cell::new(0),
            timeout: self.timeout,
            servers: RefCell::new(Vec::new()),
            waiters: AsyncQueue::new(),
        })
    }
}
