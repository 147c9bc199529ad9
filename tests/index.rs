//! Integration scenarios exercising request flows across module boundaries, embedded into the
//! crate as a unit-test module the way the teacher embeds its own `tests/index.rs`.

use crate::device::PipeDevice;
use crate::host_fd::UnixSocketPairFactory;
use crate::named_pipe::CreateNamedPipeOptions;
use crate::pipe_end::PipeEndKind;
use crate::requests::{self, PeekResult};
use crate::status::Status;
use crate::timer::HostClock;
use std::cell::RefCell;
use std::rc::Rc;

fn setup_connected_pipe(name: &str, message_mode: bool) -> (PipeDevice, Rc<crate::server::PipeServer>, Rc<crate::client::PipeClient>) {
    let device = PipeDevice::new();
    let opts = CreateNamedPipeOptions::new().message_stream_write(message_mode).message_stream_read(message_mode);
    let server = requests::create_named_pipe(&device, name, opts, 0).unwrap();
    requests::listen(&server, Box::new(|_, _| {}));
    let factory = UnixSocketPairFactory;
    let client = requests::open_file(&device, name, 0, &factory).unwrap();
    (device, server, client)
}

/// S1-style scenario: a client connects to a listening server, exchanges one message, then
/// disconnects cleanly.
#[test]
fn connect_write_read_disconnect() {
    let (_device, server, client) = setup_connected_pipe("\\pipe\\s1", true);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));
    let client_kind = PipeEndKind::Client(Rc::clone(&client));

    let write_status = requests::write(&client_kind, b"ping".to_vec(), Box::new(|_, _| {}));
    assert_eq!(write_status, Status::Pending);

    let got = Rc::new(RefCell::new(None));
    let got2 = Rc::clone(&got);
    requests::read(&server_kind, 16, Box::new(move |status, iosb| *got2.borrow_mut() = Some((status, iosb.borrow().data.clone()))));
    assert_eq!(got.borrow().as_ref().unwrap().1.as_deref(), Some(b"ping".as_slice()));

    assert_eq!(requests::disconnect(&server), Status::Success);
    requests::destroy_client(&client);
    requests::destroy_server(&server);
}

/// A short message-mode stream read followed by a longer one, where the second is truncated: the
/// first read's buffer exactly fits its message (status success, exposed alerted), the second is
/// too small for its message (status buffer_overflow internally, still alerted to the caller's
/// completion sink since bytes did transfer).
#[test]
fn message_stream_read_reports_buffer_overflow_on_truncation() {
    let (_device, server, client) = setup_connected_pipe("\\pipe\\s2", true);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));
    let client_kind = PipeEndKind::Client(Rc::clone(&client));

    requests::write(&client_kind, b"ABC".to_vec(), Box::new(|_, _| {}));
    requests::write(&client_kind, b"DEFGH".to_vec(), Box::new(|_, _| {}));

    let first = Rc::new(RefCell::new(None));
    let first2 = Rc::clone(&first);
    requests::read(&server_kind, 4, Box::new(move |s, iosb| *first2.borrow_mut() = Some((s, iosb.borrow().data.clone()))));
    let (first_status, first_data) = first.borrow().clone().unwrap();
    assert_eq!(first_status, Status::Success);
    assert_eq!(first_data.as_deref(), Some(b"ABC".as_slice()));

    let second = Rc::new(RefCell::new(None));
    let second2 = Rc::clone(&second);
    let read_status = requests::read(
        &server_kind,
        4,
        Box::new(move |status, iosb| *second2.borrow_mut() = Some((status, iosb.borrow().data.clone(), iosb.borrow().status))),
    );
    // the IOSB's own status is buffer_overflow (truncated); the return value mirrors it directly
    // since the read completed synchronously.
    assert_eq!(read_status, Status::BufferOverflow);
    let (sink_status, data, iosb_status) = second.borrow().clone().unwrap();
    assert_eq!(sink_status, Status::Alerted);
    assert_eq!(iosb_status, Status::BufferOverflow);
    assert_eq!(data.as_deref(), Some(b"DEFG".as_slice()));
}

/// `FSCTL_PIPE_PEEK` reports availability and the first message's length without consuming it.
#[test]
fn peek_reports_without_consuming() {
    let (_device, server, client) = setup_connected_pipe("\\pipe\\s_peek", true);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));
    let client_kind = PipeEndKind::Client(Rc::clone(&client));

    requests::write(&client_kind, b"hello".to_vec(), Box::new(|_, _| {}));

    let PeekResult { bytes_available, message_length, data } = requests::peek(&server_kind, 2).unwrap();
    assert_eq!(bytes_available, 5);
    assert_eq!(message_length, 5);
    assert_eq!(data, b"he");

    // still fully available for an actual read afterward.
    let got = Rc::new(RefCell::new(None));
    let got2 = Rc::clone(&got);
    requests::read(&server_kind, 16, Box::new(move |_, iosb| *got2.borrow_mut() = iosb.borrow().data.clone()));
    assert_eq!(got.borrow().as_deref(), Some(b"hello".as_slice()));
}

/// `FSCTL_PIPE_LISTEN` on an already-connected server reports `pipe_connected`; on a server
/// mid-teardown it reports `no_data_detected`; disconnecting twice in a row correctly cascades
/// through `wait_connect`.
#[test]
fn listen_state_machine_reports_expected_statuses() {
    let device = PipeDevice::new();
    let opts = CreateNamedPipeOptions::new();
    let server = requests::create_named_pipe(&device, "\\pipe\\s_fsm", opts, 0).unwrap();

    assert_eq!(requests::listen(&server, Box::new(|_, _| {})), Status::Pending);

    let factory = UnixSocketPairFactory;
    let client = requests::open_file(&device, "\\pipe\\s_fsm", 0, &factory).unwrap();
    assert_eq!(requests::listen(&server, Box::new(|_, _| {})), Status::PipeConnected);

    assert_eq!(requests::disconnect(&server), Status::Success);
    assert_eq!(requests::listen(&server, Box::new(|_, _| {})), Status::Pending);

    requests::destroy_client(&client);
}

/// `FSCTL_PIPE_WAIT` against a pipe with no available server times out via the cooperative clock
/// rather than hanging forever.
#[test]
fn wait_times_out_when_no_server_available() {
    use crate::named_pipe::CreateNamedPipeOptions as Opts;
    use std::time::Duration;

    let device = PipeDevice::new();
    let opts = Opts::new().max_instances(1);
    let server = requests::create_named_pipe(&device, "\\pipe\\s_wait", opts, 0).unwrap();
    // connect and disconnect so no server is left in wait_open/idle.
    requests::listen(&server, Box::new(|_, _| {}));
    let factory = UnixSocketPairFactory;
    let client = requests::open_file(&device, "\\pipe\\s_wait", 0, &factory).unwrap();
    requests::disconnect(&server);
    // server is now wait_connect, not available.

    let fired = Rc::new(RefCell::new(None));
    let fired2 = Rc::clone(&fired);
    let status = device.wait("\\pipe\\s_wait", Some(Duration::from_millis(5)), Box::new(move |s, _| *fired2.borrow_mut() = Some(s)));
    assert_eq!(status, Status::Pending);

    device.clock().fire_due(std::time::Instant::now() + Duration::from_millis(10));
    assert_eq!(*fired.borrow(), Some(Status::IoTimeout));

    requests::destroy_client(&client);
}

/// Byte-mode writes land on the real host socket pair and concatenate across multiple sends the
/// way a stream socket would, independent of the message boundaries the writer used.
#[test]
fn byte_mode_reads_concatenate_across_writes() {
    let (_device, server, client) = setup_connected_pipe("\\pipe\\s_bytes", false);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));
    let client_kind = PipeEndKind::Client(Rc::clone(&client));

    assert_eq!(requests::write(&client_kind, b"AB".to_vec(), Box::new(|_, _| {})), Status::Success);
    assert_eq!(requests::write(&client_kind, b"CD".to_vec(), Box::new(|_, _| {})), Status::Success);
    assert_eq!(requests::write(&client_kind, b"EF".to_vec(), Box::new(|_, _| {})), Status::Success);

    let got = Rc::new(RefCell::new(Vec::new()));
    let got2 = Rc::clone(&got);
    requests::read(&server_kind, 5, Box::new(move |_, iosb| got2.borrow_mut().extend(iosb.borrow().data.clone().unwrap())));
    assert_eq!(&*got.borrow(), b"ABCDE");

    let rest = Rc::new(RefCell::new(Vec::new()));
    let rest2 = Rc::clone(&rest);
    requests::read(&server_kind, 5, Box::new(move |_, iosb| rest2.borrow_mut().extend(iosb.borrow().data.clone().unwrap())));
    assert_eq!(&*rest.borrow(), b"F");
}

/// When the client handle is destroyed while the server has a pending read, the read completes
/// `pipe_broken`, the server moves to `wait_disconnect` so a later flush can still drain it, and
/// an explicit disconnect afterward parks it in `wait_connect` and releases the transport.
#[test]
fn client_destruction_breaks_pending_server_read() {
    use crate::server::PipeState;

    let (_device, server, client) = setup_connected_pipe("\\pipe\\s_peer_death", true);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));

    let seen = Rc::new(RefCell::new(None));
    let seen2 = Rc::clone(&seen);
    requests::read(&server_kind, 16, Box::new(move |status, _| *seen2.borrow_mut() = Some(status)));
    assert_eq!(*seen.borrow(), None); // no message queued yet: read is pending

    requests::destroy_client(&client);
    assert_eq!(*seen.borrow(), Some(Status::PipeBroken));
    assert_eq!(server.state.get(), PipeState::WaitDisconnect);

    assert_eq!(requests::disconnect(&server), Status::Success);
    assert_eq!(server.state.get(), PipeState::WaitConnect);
}

/// S6-style scenario: the server writes byte-mode data the client hasn't read yet, flush stays
/// pending, and once the client drains it the poll loop notices within its cadence and
/// completes the flush with success.
#[test]
fn byte_mode_flush_completes_once_peer_drains_via_poll() {
    use std::time::Duration;

    let (device, server, client) = setup_connected_pipe("\\pipe\\s_flush", false);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));
    let client_kind = PipeEndKind::Client(Rc::clone(&client));

    assert_eq!(requests::write(&server_kind, b"unread".to_vec(), Box::new(|_, _| {})), Status::Success);

    let flushed = Rc::new(RefCell::new(None));
    let flushed2 = Rc::clone(&flushed);
    let flush_status = requests::flush(&server, &device, Box::new(move |status, _| *flushed2.borrow_mut() = Some(status)));
    assert_eq!(flush_status, Status::Pending);
    assert_eq!(*flushed.borrow(), None);

    // the client hasn't read anything yet: an early poll tick must not complete the flush.
    device.clock().fire_due(std::time::Instant::now() + Duration::from_millis(50));
    assert_eq!(*flushed.borrow(), None);

    let got = Rc::new(RefCell::new(Vec::new()));
    let got2 = Rc::clone(&got);
    requests::read(&client_kind, 16, Box::new(move |_, iosb| got2.borrow_mut().extend(iosb.borrow().data.clone().unwrap())));
    assert_eq!(&*got.borrow(), b"unread");

    device.clock().fire_due(std::time::Instant::now() + Duration::from_millis(150));
    assert_eq!(*flushed.borrow(), Some(Status::Success));
}

/// Message-mode flush completes as soon as the peer's read drains the queue, via the reselect
/// wake path, without needing the poll timer to fire at all.
#[test]
fn message_mode_flush_completes_immediately_on_drain() {
    let (device, server, client) = setup_connected_pipe("\\pipe\\s_flush_msg", true);
    let server_kind = PipeEndKind::Server(Rc::clone(&server));
    let client_kind = PipeEndKind::Client(Rc::clone(&client));

    requests::write(&server_kind, b"unread".to_vec(), Box::new(|_, _| {}));

    let flushed = Rc::new(RefCell::new(None));
    let flushed2 = Rc::clone(&flushed);
    let flush_status = requests::flush(&server, &device, Box::new(move |status, _| *flushed2.borrow_mut() = Some(status)));
    assert_eq!(flush_status, Status::Pending);

    requests::read(&client_kind, 16, Box::new(|_, _| {}));
    assert_eq!(*flushed.borrow(), Some(Status::Success));
}
