//! The request surface: the entry points an embedder calls to drive this subsystem, one per
//! `DECL_HANDLER`/ioctl case in the original source. Every handler logs a `tracing` span so the
//! embedder's own log stream shows pipe activity the way request handling shows up in the
//! original server's trace output.

use crate::async_queue::{Async, CompletionSink};
use crate::client::{self, PipeClient};
use crate::device::PipeDevice;
use crate::host_fd::{HostFd, SocketPairFactory};
use crate::iosb::Iosb;
use crate::message::PipeMessage;
use crate::named_pipe::{CreateNamedPipeOptions, NamedPipe};
use crate::pipe_end::{reselect_read_queue, reselect_write_queue, PipeEndKind};
use crate::server::{self, PipeServer};
use crate::status::Status;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use tracing::instrument;

/// Creates (or reuses, per `OBJ_OPENIF` semantics) the named pipe `name` and adds a new server
/// instance to it. Mirrors `DECL_HANDLER(create_named_pipe)`.
#[instrument(skip(device, options), fields(pipe = name))]
pub fn create_named_pipe(
    device: &PipeDevice,
    name: &str,
    options: CreateNamedPipeOptions,
    ioctl_options: u32,
) -> Result<Rc<PipeServer>, Status> {
    options.validate()?;
    let pipe = device.find_or_create(name, || options.build());
    let server = pipe.create_server(ioctl_options)?;
    tracing::debug!(instances = pipe.instances.get(), "server instance created");
    Ok(server)
}

/// Opens a client handle on an existing named pipe. Mirrors `named_pipe_open_file`.
#[instrument(skip(device, socket_factory), fields(pipe = name))]
pub fn open_file(
    device: &PipeDevice,
    name: &str,
    access: u32,
    socket_factory: &dyn SocketPairFactory,
) -> Result<Rc<PipeClient>, Status> {
    let pipe = device.lookup(name).ok_or(Status::ObjectNameInvalid)?;
    pipe.open_file(access, socket_factory)
}

/// The read-only snapshot returned by `get_named_pipe_info`.
#[derive(Debug, Clone, Copy)]
pub struct NamedPipeInfo {
    pub flags: u32,
    pub sharing: u32,
    pub maxinstances: u32,
    pub instances: u32,
    pub insize: usize,
    pub outsize: usize,
    /// Set when the handle queried is the server end, mirroring `NAMED_PIPE_SERVER_END`.
    pub is_server_end: bool,
}

/// Mirrors `DECL_HANDLER(get_named_pipe_info)`.
#[instrument(skip_all)]
pub fn get_named_pipe_info(pipe_end: &PipeEndKind, pipe: &NamedPipe) -> NamedPipeInfo {
    let is_server_end = matches!(pipe_end, PipeEndKind::Server(_));
    NamedPipeInfo {
        flags: pipe_end.end().flags.get(),
        sharing: pipe.sharing,
        maxinstances: pipe.maxinstances,
        instances: pipe.instances.get(),
        insize: pipe.insize,
        outsize: pipe.outsize,
        is_server_end,
    }
}

/// Mirrors `DECL_HANDLER(set_named_pipe_info)`: only the read-mode and nonblocking-mode bits are
/// settable after creation, and read-mode requires the pipe to already be write-mode message
/// streamed.
#[instrument(skip_all)]
pub fn set_named_pipe_info(pipe_end: &PipeEndKind, pipe: &NamedPipe, requested_flags: u32) -> Status {
    use crate::pipe_end::flags;
    let settable = flags::MESSAGE_STREAM_READ | flags::NONBLOCKING_MODE;
    if requested_flags & !settable != 0
        || (requested_flags & flags::MESSAGE_STREAM_READ != 0 && pipe.flags & flags::MESSAGE_STREAM_WRITE == 0)
    {
        return Status::InvalidParameter;
    }
    pipe_end.end().flags.set(pipe.flags | requested_flags);
    Status::Success
}

/// Issues `FSCTL_PIPE_LISTEN` against a server instance.
#[instrument(skip_all)]
pub fn listen(server: &Rc<PipeServer>, sink: CompletionSink) -> Status {
    let iosb = Rc::new(RefCell::new(Iosb::for_read(0)));
    server::listen(server, iosb, sink)
}

/// Issues `FSCTL_PIPE_DISCONNECT` against a server instance.
#[instrument(skip_all)]
pub fn disconnect(server: &Rc<PipeServer>) -> Status {
    server::disconnect(server)
}

/// Issues `FSCTL_PIPE_PEEK` against either end. Mirrors `pipe_end_peek`.
#[derive(Debug, Clone)]
pub struct PeekResult {
    pub bytes_available: usize,
    pub message_length: usize,
    pub data: Vec<u8>,
}

#[instrument(skip(pipe_end))]
pub fn peek(pipe_end: &PipeEndKind, max_len: usize) -> Result<PeekResult, Status> {
    if !pipe_end.use_server_io() {
        return Err(Status::NotSupported);
    }
    let end = pipe_end.end();
    let queue = end.message_queue.borrow();
    let bytes_available: usize = queue.iter().map(|m| m.remaining()).sum();
    let (message_length, reply_size) = match queue.front() {
        Some(first) if bytes_available > 0 => {
            let len = first.remaining();
            (len, max_len.min(len))
        }
        _ => (0, 0),
    };
    let mut data = Vec::with_capacity(reply_size);
    if reply_size > 0 {
        let first = queue.front().expect("reply_size > 0 implies a queued message");
        let iosb = first.iosb.borrow();
        let start = first.read_pos.get();
        if let Some(bytes) = iosb.data.as_ref() {
            data.extend_from_slice(&bytes[start..start + reply_size]);
        }
    }
    Ok(PeekResult { bytes_available, message_length, data })
}

/// Issues a read on `pipe_end`. Message-mode reads are served from the in-process queue
/// (mirrors `pipe_end_read`); byte-mode reads go straight to the host socket.
#[instrument(skip(pipe_end, sink))]
pub fn read(pipe_end: &PipeEndKind, buf_len: usize, sink: CompletionSink) -> Status {
    if !pipe_end.use_server_io() {
        return read_byte_mode(pipe_end, buf_len, sink);
    }
    let end = pipe_end.end();
    if pipe_end.connection().is_none() && end.message_queue.borrow().is_empty() {
        return Status::PipeBroken;
    }
    let iosb = Rc::new(RefCell::new(Iosb::for_read(buf_len)));
    let async_ = Async::new(iosb, sink);
    end.read_q.push(Rc::clone(&async_));
    reselect_read_queue(pipe_end);
    async_.status()
}

/// Issues a write on `pipe_end`. Message-mode writes are queued on the connected peer's message
/// queue (mirrors `pipe_end_write`); byte-mode writes go straight to the host socket.
#[instrument(skip(pipe_end, data, sink))]
pub fn write(pipe_end: &PipeEndKind, data: Vec<u8>, sink: CompletionSink) -> Status {
    if !pipe_end.use_server_io() {
        return write_byte_mode(pipe_end, data, sink);
    }
    let Some(read_end) = pipe_end.connection() else { return Status::PipeDisconnected };

    let iosb = Rc::new(RefCell::new(Iosb::for_write(data)));
    let async_ = Async::new(Rc::clone(&iosb), sink);
    let message = Rc::new(PipeMessage::new(iosb, Some(Rc::clone(&async_))));
    read_end.end().message_queue.borrow_mut().push_back(message);

    pipe_end.end().write_q.push(async_);
    reselect_write_queue(pipe_end);
    Status::Pending
}

/// Issues a flush on a server instance. Mirrors `pipe_server_flush`.
#[instrument(skip(server, device, sink))]
pub fn flush(server: &Rc<PipeServer>, device: &PipeDevice, sink: CompletionSink) -> Status {
    let iosb = Rc::new(RefCell::new(Iosb::for_read(0)));
    server::flush(server, device.clock(), iosb, sink)
}

/// Destroys a server instance, releasing its connection and its name's instance count.
#[instrument(skip_all)]
pub fn destroy_server(server: &Rc<PipeServer>) {
    server::destroy(server);
}

/// Destroys a client handle.
#[instrument(skip_all)]
pub fn destroy_client(client: &Rc<PipeClient>) {
    client::destroy(client);
}

fn read_byte_mode(pipe_end: &PipeEndKind, buf_len: usize, sink: CompletionSink) -> Status {
    let end = pipe_end.end();
    let mut host = end.host.borrow_mut();
    let HostFd::Socket(sock) = &mut *host else { return Status::PipeBroken };
    let mut buf = vec![0u8; buf_len];
    match sock.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            let iosb = Rc::new(RefCell::new(Iosb::for_read(buf_len)));
            iosb.borrow_mut().complete(Status::Success, n);
            iosb.borrow_mut().data = Some(buf);
            sink(Status::Success, iosb);
            Status::Success
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Status::Pending,
        Err(e) => Status::from(e),
    }
}

fn write_byte_mode(pipe_end: &PipeEndKind, data: Vec<u8>, sink: CompletionSink) -> Status {
    let end = pipe_end.end();
    let mut host = end.host.borrow_mut();
    let HostFd::Socket(sock) = &mut *host else { return Status::PipeBroken };
    match sock.write(&data) {
        Ok(n) => {
            let iosb = Rc::new(RefCell::new(Iosb::for_write(data)));
            iosb.borrow_mut().complete(Status::Success, n);
            sink(Status::Success, iosb);
            Status::Success
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Status::Pending,
        Err(e) => Status::from(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_fd::UnixSocketPairFactory;

    #[test]
    fn create_then_open_then_disconnect_round_trip() {
        let device = PipeDevice::new();
        let opts = CreateNamedPipeOptions::new().message_stream_write(true).message_stream_read(true);
        let server = create_named_pipe(&device, "\\pipe\\test", opts, 0).unwrap();
        assert_eq!(listen(&server, Box::new(|_, _| {})), Status::Pending);

        let factory = UnixSocketPairFactory;
        let client = open_file(&device, "\\pipe\\test", 0, &factory).unwrap();

        assert_eq!(disconnect(&server), Status::Success);
        destroy_client(&client);
        destroy_server(&server);
    }

    #[test]
    fn write_then_read_delivers_message() {
        let device = PipeDevice::new();
        let opts = CreateNamedPipeOptions::new().message_stream_write(true).message_stream_read(true);
        let server = create_named_pipe(&device, "\\pipe\\msg", opts, 0).unwrap();
        listen(&server, Box::new(|_, _| {}));
        let factory = UnixSocketPairFactory;
        let client = open_file(&device, "\\pipe\\msg", 0, &factory).unwrap();

        let server_kind = PipeEndKind::Server(Rc::clone(&server));
        let client_kind = PipeEndKind::Client(Rc::clone(&client));

        let write_status = write(&client_kind, b"hi".to_vec(), Box::new(|_, _| {}));
        assert_eq!(write_status, Status::Pending);

        let received = Rc::new(RefCell::new(None));
        let received2 = Rc::clone(&received);
        // The return value reflects the IOSB's own status (Success: the whole message arrived
        // untruncated); the sink separately sees the completion-notification status (Alerted),
        // which flags "progress was made" the way the original source's `async_terminate`
        // override does.
        let read_status = read(
            &server_kind,
            16,
            Box::new(move |status, iosb| *received2.borrow_mut() = Some((status, iosb.borrow().data.clone()))),
        );
        assert_eq!(read_status, Status::Success);
        let (sink_status, data) = received.borrow().clone().unwrap();
        assert_eq!(sink_status, Status::Alerted);
        assert_eq!(data.as_deref(), Some(b"hi".as_slice()));
    }
}
