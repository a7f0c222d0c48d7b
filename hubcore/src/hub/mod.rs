//! The per-thread scheduler.
//!
//! This module contains:
//! - [`Hub`], its loop driver and lifecycle operations,
//! - the thread-local context (current hub, current task, pending kills),
//! - [`HubBuilder`] and the cross-thread [`RemoteHandle`].

pub(crate) mod context;

mod builder;
mod core;
mod errors;
mod lifecycle;
mod remote;
mod run;

pub use self::builder::HubBuilder;
pub use self::context::{current_task, get_hub, get_hub_if_exists, set_hub};
pub use self::core::{Hub, HubStats};
pub use self::lifecycle::reinit;
pub use self::remote::RemoteHandle;

pub(crate) use self::core::HubInner;
