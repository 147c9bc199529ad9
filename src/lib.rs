//! An in-process object manager implementing NT named-pipe semantics on top of host OS
//! primitives: listen, connect, read, write, peek, flush, disconnect and wait, a byte-mode and a
//! message-mode I/O path, and the async/reselect machinery that drives both without blocking a
//! caller's thread.
//!
//! The crate is organized the way the subsystem it emulates is organized: [`device`] is the
//! namespace root a pipe name lives under, [`named_pipe`] is one pipe name's shared
//! configuration, [`server`]/[`client`] are the two ends of a connection, [`pipe_end`] is what
//! they have in common (including the reselect logic that drives both byte-mode buffering and
//! message-mode queuing), and [`requests`] is the entry-point surface an embedder calls into.
//!
//! Nothing here spawns a thread. [`timer::CooperativeClock`] and the [`async_queue`] module are
//! the whole of this crate's concurrency story: a caller registers an [`async_queue::Async`] and
//! gets a [`status::Status::Pending`], and something else — another request, a timer firing —
//! eventually completes it.
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]
#![warn(
    clippy::panic_in_result_fn,
    clippy::missing_assert_message,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

pub mod async_queue;
pub mod client;
pub mod device;
pub mod host_fd;
pub mod iosb;
pub mod message;
pub mod named_pipe;
pub mod pipe_end;
pub mod requests;
pub mod server;
pub mod status;
pub mod timer;

#[cfg(test)]
#[path = "../tests/index.rs"]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]
mod tests;
