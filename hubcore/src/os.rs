//! Process-level operations aware of the current hub.

use crate::error::{Error, Result};
use crate::hub::reinit;

use std::io;

/// Which side of a [`fork`] the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// In the parent; carries the pid of the child.
    Parent(i32),
    Child,
}

impl ForkResult {
    pub fn is_child(&self) -> bool {
        matches!(self, ForkResult::Child)
    }
}

/// Forks the process and reinitializes the current thread's hub in the
/// child.
///
/// # Safety
///
/// Only the calling thread survives in the child. Any lock held by another
/// thread at the time of the fork stays locked forever there, so the child
/// must not touch state other threads may have been mutating. The hub's own
/// thread pool and watchdog are restarted by the reinitialization.
///
/// # Errors
///
/// Returns the OS error of `fork(2)`, or the error of reinitializing the
/// hub in the child.
///
/// # Examples
///
/// ```rust,ignore
/// match unsafe { hubcore::os::fork()? } {
///     ForkResult::Child => { /* the hub is usable here */ }
///     ForkResult::Parent(pid) => println!("child {pid}"),
/// }
/// ```
pub unsafe fn fork() -> Result<ForkResult> {
    let pid = unsafe { libc::fork() };

    match pid {
        -1 => Err(Error::from(io::Error::last_os_error())),
        0 => {
            reinit(None)?;
            Ok(ForkResult::Child)
        }
        pid => Ok(ForkResult::Parent(pid)),
    }
}
