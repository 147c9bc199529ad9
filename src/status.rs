//! The status/error taxonomy observable at the boundary of the named-pipe subsystem.
//!
//! Every request handler and every async completion in this crate resolves to a [`Status`]
//! rather than a bare [`std::io::Error`]: the protocol has a closed set of outcomes (§6 of the
//! specification this crate implements), and callers should be able to `match` on them
//! exhaustively instead of poking at an [`io::ErrorKind`](std::io::ErrorKind) or a message
//! string. Host I/O failures that have no protocol meaning of their own (a failed `socketpair`,
//! a failed `setsockopt`) are still surfaced as [`Status::Io`] wrapping the underlying error.

use std::io;
use thiserror::Error;

/// All observable outcomes of an operation on the named-pipe subsystem.
///
/// `Success` and `Pending` are ordinary values of this enum, not a side channel: a request
/// handler's `Result<T, Status>` uses `Err` for everything that isn't plain success, so
/// `Pending` only ever appears where the API explicitly models asynchronous completion (e.g.
/// the result of registering an [`Async`](crate::async_queue::Async)), never as a smuggled `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// The operation completed synchronously.
    #[error("success")]
    Success,
    /// The operation will complete asynchronously; an async has been registered.
    #[error("pending")]
    Pending,
    /// The server is listening for a connection (`FSCTL_PIPE_LISTEN` already issued).
    #[error("pipe is listening")]
    PipeListening,
    /// The server is already connected to a client.
    #[error("pipe is connected")]
    PipeConnected,
    /// The connection was explicitly disconnected.
    #[error("pipe is disconnected")]
    PipeDisconnected,
    /// The peer went away unexpectedly.
    #[error("pipe is broken")]
    PipeBroken,
    /// No data is available where some was expected (e.g. disconnect with no prior connect).
    #[error("no data detected")]
    NoDataDetected,
    /// No server instance is available to accept a connection.
    #[error("pipe not available")]
    PipeNotAvailable,
    /// `max_instances` would be exceeded by creating another server instance.
    #[error("instance not available")]
    InstanceNotAvailable,
    /// The requested access is not compatible with the pipe's sharing mode.
    #[error("access denied")]
    AccessDenied,
    /// A request parameter was malformed.
    #[error("invalid parameter")]
    InvalidParameter,
    /// The operation is not valid for the handle's current state.
    #[error("invalid handle")]
    InvalidHandle,
    /// The handle does not refer to the expected object type.
    #[error("object type mismatch")]
    ObjectTypeMismatch,
    /// The object name was malformed.
    #[error("object name invalid")]
    ObjectNameInvalid,
    /// The operation is not supported for this pipe (byte-mode peek).
    #[error("not supported")]
    NotSupported,
    /// A read or queue drain was truncated because the caller's buffer was too small.
    #[error("buffer overflow")]
    BufferOverflow,
    /// A read or write completed with partial progress.
    #[error("alerted")]
    Alerted,
    /// A wait (`FSCTL_PIPE_WAIT`) expired before a server became available.
    #[error("I/O timeout")]
    IoTimeout,
    /// Allocation failed.
    #[error("no memory")]
    NoMemory,
    /// The caller's info buffer did not match the expected size.
    #[error("info length mismatch")]
    InfoLengthMismatch,
    /// A host I/O operation failed; the protocol has no more specific status for it.
    #[error("host I/O error: {0}")]
    Io(IoErrorWrapper),
}

impl Status {
    /// Whether this status represents a terminal failure for the calling request (as opposed to
    /// `Success` or `Pending`, which are not errors from the caller's point of view).
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Success | Self::Pending)
    }
}

impl From<io::Error> for Status {
    fn from(e: io::Error) -> Self {
        Self::Io(IoErrorWrapper::new(e))
    }
}

impl From<Status> for io::Error {
    fn from(s: Status) -> Self {
        match s {
            Status::Io(e) => e.to_io_error(),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Wraps an [`io::Error`] so that [`Status`] can derive `Clone`, `Copy`, `PartialEq`, `Eq`.
///
/// `io::Error` itself implements none of those, which is exactly why this wrapper exists: a
/// `Status` is copied around freely (it is completion-callback payload), so the rare `Io` variant
/// carries only enough information to describe itself, not the original error's full identity.
#[derive(Debug, Clone, Copy)]
pub struct IoErrorWrapper(IoErrorSnapshot);

impl IoErrorWrapper {
    fn new(e: io::Error) -> Self {
        Self(IoErrorSnapshot { kind: e.kind(), raw_os_error: e.raw_os_error() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IoErrorSnapshot {
    kind: io::ErrorKind,
    raw_os_error: Option<i32>,
}

impl PartialEq for IoErrorWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for IoErrorWrapper {}

impl std::fmt::Display for IoErrorWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.raw_os_error {
            Some(errno) => write!(f, "{} (os error {errno})", self.0.kind),
            None => write!(f, "{}", self.0.kind),
        }
    }
}

impl From<io::Error> for IoErrorWrapper {
    fn from(e: io::Error) -> Self {
        Self::new(e)
    }
}

impl IoErrorWrapper {
    /// Reconstructs a fresh [`io::Error`] carrying the same kind and OS error code.
    pub fn to_io_error(self) -> io::Error {
        match self.0.raw_os_error {
            Some(errno) => io::Error::from_raw_os_error(errno),
            None => io::Error::from(self.0.kind),
        }
    }
}

impl From<Status> for u32 {
    /// A stable small ordinal, useful for logging and tests; not an NTSTATUS value.
    fn from(s: Status) -> Self {
        s as u32
    }
}
