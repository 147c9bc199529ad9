//! The namespace root a pipe name is created and opened under.
//!
//! Grounded on `struct named_pipe_device` and `named_pipe_device_ioctl`'s `FSCTL_PIPE_WAIT`
//! handling. The real object manager's hierarchical namespace is out of scope (spec Non-goals);
//! a flat `HashMap` keyed by name stands in for it, which is enough to host this subsystem in
//! isolation.

use crate::async_queue::{Async, CompletionSink};
use crate::iosb::Iosb;
use crate::named_pipe::NamedPipe;
use crate::status::Status;
use crate::timer::{CooperativeClock, HostClock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

/// A namespace of named pipes, analogous to the `\Device\NamedPipe` object the original source
/// creates once per server instance.
#[derive(Default)]
pub struct PipeDevice {
    pipes: RefCell<HashMap<String, Rc<NamedPipe>>>,
    clock: CooperativeClock,
}

impl PipeDevice {
    pub fn new() -> Self {
        Self { pipes: RefCell::new(HashMap::new()), clock: CooperativeClock::new() }
    }

    /// Looks up `name`, creating it via `make` if it doesn't exist yet (mirrors
    /// `create_named_object` with `OBJ_OPENIF`).
    pub fn find_or_create(&self, name: &str, make: impl FnOnce() -> Rc<NamedPipe>) -> Rc<NamedPipe> {
        Rc::clone(self.pipes.borrow_mut().entry(name.to_owned()).or_insert_with(make))
    }

    /// Looks up an existing pipe by name without creating one.
    pub fn lookup(&self, name: &str) -> Option<Rc<NamedPipe>> {
        self.pipes.borrow().get(name).cloned()
    }

    /// Removes a name from the namespace once its last instance is destroyed.
    pub fn forget(&self, name: &str) {
        self.pipes.borrow_mut().remove(name);
    }

    /// The cooperative clock driving this device's `FSCTL_PIPE_WAIT` timeouts and any server
    /// flush polling; the embedder is expected to pump it from its own event loop.
    pub fn clock(&self) -> &CooperativeClock {
        &self.clock
    }

    /// Issues `FSCTL_PIPE_WAIT`: waits up to `timeout` (or the pipe's own default if `None`) for
    /// a server instance of `name` to become available to connect to.
    pub fn wait(&self, name: &str, timeout: Option<Duration>, sink: CompletionSink) -> Status {
        let Some(pipe) = self.lookup(name) else { return Status::ObjectNameInvalid };

        if pipe.find_available_server().is_some() {
            return Status::Success;
        }

        let iosb = Rc::new(RefCell::new(Iosb::for_read(0)));
        let async_ = Async::new(iosb, sink);
        pipe.waiters.push(Rc::clone(&async_));
        async_.set_timeout(&self.clock, timeout.unwrap_or(pipe.timeout), Status::IoTimeout);
        Status::Pending
    }
}
