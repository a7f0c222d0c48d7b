//! # hubcore
//!
//! **hubcore** is a single-threaded cooperative scheduler. Each OS thread
//! owns at most one [`Hub`]: an event loop that multiplexes many
//! lightweight tasks, resuming each one when the timer, descriptor, signal
//! or waiter it suspended on becomes ready.
//!
//! A task runs until it awaits, so code between two suspension points is
//! never interleaved with another task of the same hub. Blocking work goes
//! to the hub's thread pool instead, and a watchdog thread can report a
//! loop that stays stuck in a single callback.
//!
//! The crate provides:
//!
//! - the **hub**: run loop, `block_on`, `join`, `destroy`, fork `reinit`,
//! - **tasks**: `spawn`, `spawn_later`, `kill`, `joinall`, `killall`,
//! - **waiters**: one-shot rendezvous between a task and a callback,
//! - **timers**: `sleep`, `idle` and `with_timeout`,
//! - **signals** delivered to handler tasks,
//! - a **thread pool** and a **DNS resolver** for blocking calls,
//! - a **watchdog** thread reporting blocked loops and memory usage.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! #[hubcore::main]
//! async fn main() -> hubcore::Result<()> {
//!     let handle = hubcore::spawn(async {
//!         hubcore::sleep(Duration::from_millis(100)).await?;
//!         Ok("done")
//!     })?;
//!
//!     println!("{}", handle.await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Every fallible operation returns [`Result`]. An error escaping a task is
//! stored in its [`TaskHandle`]; errors escaping callbacks and signal
//! handlers go through [`Hub::handle_error`], which prints them and stops
//! the loop for the system errors ([`Error::SystemExit`],
//! [`Error::Interrupted`]).

mod reactor;
mod utils;

pub mod config;
pub mod error;
pub mod hub;
pub mod io;
pub mod monitor;
pub mod os;
pub mod resolver;
pub mod signal;
pub mod sync;
pub mod task;
pub mod threadpool;
pub mod time;

pub use config::{Config, ConfigBuilder, ResolverKind};
pub use error::{Error, Result};
pub use hub::{
    Hub, HubBuilder, HubStats, RemoteHandle, current_task, get_hub, get_hub_if_exists, reinit,
    set_hub,
};
pub use io::{wait_readable, wait_writable};
pub use monitor::{BlockedReport, MonitorEvent};
pub use signal::{SignalHandle, signal};
pub use sync::{MultipleWaiter, Waiter};
pub use task::{TaskHandle, TaskId, TreeLocals, joinall, kill, killall, spawn, spawn_later};
pub use time::{idle, sleep, sleep_with, with_timeout};

pub use hubcore_macros::{main, test};
