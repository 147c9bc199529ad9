//! The boundary between pipe transport modes and actual host file descriptors.
//!
//! Byte-mode pipes hand their data to a real kernel socket pair and let the host do the
//! buffering; message-mode pipes keep their data in the in-process [`PipeMessage`](crate::message::PipeMessage)
//! queue and never touch a host fd at all, aliasing what Windows calls the "ioctl pseudo-FD"
//! (§4.2, §9 "Host-FD bypass" of the specification). [`HostFd`] is the tagged union of the two;
//! [`SocketPairFactory`] isolates the one spot that actually calls into the OS so tests can swap
//! it out.

use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

/// Which transport backs one end of a pipe.
pub enum HostFd {
    /// Message-mode (or not-yet-connected) end: all data lives in the server's own queues.
    ServerManaged,
    /// Byte-mode end: a real, already-connected unix domain socket.
    Socket(UnixStream),
}

impl HostFd {
    /// Whether this end has a real host transport backing it.
    pub fn is_socket(&self) -> bool {
        matches!(self, Self::Socket(_))
    }

    /// The underlying socket, if this is a byte-mode end.
    pub fn as_socket(&self) -> Option<&UnixStream> {
        match self {
            Self::Socket(s) => Some(s),
            Self::ServerManaged => None,
        }
    }

    pub fn as_socket_mut(&mut self) -> Option<&mut UnixStream> {
        match self {
            Self::Socket(s) => Some(s),
            Self::ServerManaged => None,
        }
    }

    /// Whether this end's socket currently has bytes buffered and ready to read, checked with a
    /// zero-timeout `poll` so it never blocks the caller. `ServerManaged` ends never have a host
    /// buffer, so they report `false`. Grounded on `original_source`'s `pipe_data_remaining`,
    /// which polls the peer's fd for `POLLIN` rather than trying to read it.
    pub fn has_unread_data(&self) -> io::Result<bool> {
        let Self::Socket(sock) = self else { return Ok(false) };
        let mut pfd = libc::pollfd { fd: sock.as_raw_fd(), events: libc::POLLIN, revents: 0 };
        let ret = unsafe { libc::poll(std::ptr::addr_of_mut!(pfd), 1, 0) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(pfd.revents & libc::POLLIN != 0)
    }
}

impl std::fmt::Debug for HostFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerManaged => f.write_str("HostFd::ServerManaged"),
            Self::Socket(s) => write!(f, "HostFd::Socket({})", s.as_raw_fd()),
        }
    }
}

/// Creates the pair of connected transports for one byte-mode connection.
///
/// Grounded on `original_source`'s `socketpair` + `fcntl(O_NONBLOCK)` + `setsockopt(SO_RCVBUF /
/// SO_SNDBUF)` sequence in `named_pipe_open_file`; the real equivalent here is
/// [`UnixStream::pair`] plus a buffer-size hint via `libc::setsockopt`.
pub trait SocketPairFactory {
    /// Builds a connected pair of sockets sized to hold roughly `buffer_size` bytes each way, or
    /// the OS default if `buffer_size` is zero.
    fn make_pair(&self, buffer_size: u32) -> io::Result<(HostFd, HostFd)>;
}

/// The default [`SocketPairFactory`]: a real `AF_UNIX` socket pair via [`UnixStream::pair`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSocketPairFactory;

impl SocketPairFactory for UnixSocketPairFactory {
    fn make_pair(&self, buffer_size: u32) -> io::Result<(HostFd, HostFd)> {
        let (a, b) = UnixStream::pair()?;
        a.set_nonblocking(true)?;
        b.set_nonblocking(true)?;
        if buffer_size > 0 {
            set_buffer_size_hint(&a, buffer_size)?;
            set_buffer_size_hint(&b, buffer_size)?;
        }
        Ok((HostFd::Socket(a), HostFd::Socket(b)))
    }
}

fn set_buffer_size_hint(sock: &UnixStream, size: u32) -> io::Result<()> {
    let fd = sock.as_raw_fd();
    let size = size as libc::c_int;
    for opt in [libc::SO_RCVBUF, libc::SO_SNDBUF] {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                std::ptr::addr_of!(size).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
