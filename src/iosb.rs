//! The I/O status block shared between a caller and the subsystem for one operation.

use crate::status::Status;

/// Mirrors the NT I/O status block: the caller's input buffer, the subsystem's output buffer,
/// and the two-part completion result `{status, result}`.
///
/// An [`Iosb`] is shared between a [`PipeMessage`](crate::message::PipeMessage) and the
/// [`Async`](crate::async_queue::Async) of the write that created it — reselect mutates it in
/// place as data is consumed, and the writer's async is only terminated once `status` leaves
/// [`Status::Pending`].
#[derive(Debug)]
pub struct Iosb {
    /// Data supplied by the caller for a write, or produced by the subsystem for a read.
    pub data: Option<Vec<u8>>,
    /// Size of the caller's input (write source) or requested output (read destination).
    pub requested_size: usize,
    /// Number of bytes actually transferred.
    pub result: usize,
    /// Current completion status; `Pending` until the operation is settled.
    pub status: Status,
}

impl Iosb {
    /// Creates an IOSB for a write of `data`, not yet completed.
    pub fn for_write(data: Vec<u8>) -> Self {
        let requested_size = data.len();
        Self { data: Some(data), requested_size, result: 0, status: Status::Pending }
    }

    /// Creates an IOSB for a read requesting up to `buf_len` bytes, not yet completed.
    pub fn for_read(buf_len: usize) -> Self {
        Self { data: None, requested_size: buf_len, status: Status::Pending, result: 0 }
    }

    /// The size of the writer's original payload (`in_size` in the specification's terms).
    pub fn in_size(&self) -> usize {
        self.requested_size
    }

    /// Marks the block complete with `status` and `result` bytes transferred.
    pub fn complete(&mut self, status: Status, result: usize) {
        self.status = status;
        self.result = result;
    }

    /// Takes ownership of the output buffer, leaving `None` behind (the read fast path's "steal").
    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }
}
