//! Synchronization primitives of the hub.
//!
//! - [`Waiter`]: a one-shot rendezvous between a task and a callback,
//!   another task or a signal handler.
//! - [`MultipleWaiter`]: the same, queuing every delivered value.
//!
//! Both are single-threaded and never resume a task synchronously.

mod waiter;

pub use waiter::{MultipleWaiter, Next, Wait, Waiter};
