//! Platform-specific readiness poller.
//!
//! The poller is the only blocking point of a hub: the reactor asks it to
//! wait for fd readiness, a wake-up, or a timeout. Linux uses `epoll` with
//! an `eventfd` wake source, other unix targets use `poll(2)` with a
//! self-pipe.
//!
//! The concrete implementation is selected at compile time.

pub(crate) mod common;
pub(crate) mod unix;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(all(unix, not(target_os = "linux")))]
mod poll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) type Poller = poll::PollPoller;

pub(crate) use common::{Interest, notify};
