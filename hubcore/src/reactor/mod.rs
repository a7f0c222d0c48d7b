//! The event loop under a hub.
//!
//! The reactor is responsible for:
//! - the FIFO queue of loop callbacks,
//! - timers (referenced or not),
//! - file descriptor readiness,
//! - idle watchers,
//! - routing OS signals to the hubs that watch them,
//! - receiving commands from other threads.
//!
//! It never runs tasks itself: the hub drives it one iteration at a time and
//! dispatches the callbacks it hands back.

mod core;
mod event;
mod timer;

pub(crate) mod command;
pub(crate) mod io;
pub(crate) mod poller;
pub(crate) mod signal;

pub(crate) use command::{Command, Remote};
pub(crate) use self::core::{Callback, Reactor, ReactorStats};
pub(crate) use timer::TimerAction;
