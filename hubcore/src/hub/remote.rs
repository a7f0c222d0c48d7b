use super::Hub;
use crate::reactor::{Command, Remote};

use std::fmt;
use std::sync::Arc;

/// A `Send + Sync` handle to a hub, usable from any thread.
///
/// Everything sent through it is executed on the hub's thread the next
/// time its loop runs.
#[derive(Clone)]
pub struct RemoteHandle {
    ident: u64,
    remote: Arc<Remote>,
}

impl RemoteHandle {
    /// Runs `f` on the hub's thread as a loop callback.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let remote = hub.remote();
    /// std::thread::spawn(move || {
    ///     remote.run_callback_threadsafe(|| println!("on the hub thread"));
    /// });
    /// ```
    pub fn run_callback_threadsafe<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.remote.send(Command::Call(Box::new(f)));
    }

    /// Asks the hub to destroy itself at its next loop iteration.
    ///
    /// This is best effort: a hub whose loop never runs again is never
    /// destroyed this way.
    pub fn request_destroy(&self) {
        self.remote.send(Command::Destroy { hub: self.ident });
    }

    pub fn hub_ident(&self) -> u64 {
        self.ident
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("hub", &self.ident)
            .finish()
    }
}

impl Hub {
    /// Returns a handle for reaching this hub from other threads.
    pub fn remote(&self) -> RemoteHandle {
        RemoteHandle {
            ident: self.inner.ident,
            remote: self.inner.remote.clone(),
        }
    }
}
