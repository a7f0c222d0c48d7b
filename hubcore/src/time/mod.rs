//! Time utilities of the hub.
//!
//! This module provides the timer-based suspension points:
//! - [`sleep`] and [`sleep_with`] for timers,
//! - [`idle`] for waiting until the loop has nothing else to run,
//! - [`with_timeout`] for bounding another future.

mod idle;
mod sleep;
mod timeout;

#[doc(inline)]
pub use idle::{Idle, idle};

#[doc(inline)]
pub use sleep::{Sleep, sleep, sleep_with};

#[doc(inline)]
pub use timeout::{Timeout, with_timeout};
