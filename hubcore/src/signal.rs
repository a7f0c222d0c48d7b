//! OS signal handlers running as tasks.
//!
//! [`Hub::signal`] routes a signal to a handler. Each delivery spawns a
//! new task running the handler, so a slow or failing handler never
//! stalls the loop. Signal watchers do not keep the loop alive.

use crate::error::Result;
use crate::hub::{Hub, HubInner, get_hub};
use crate::utils::slab::Key;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};

type Handler = Rc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>>>>>;

struct SignalState {
    signum: i32,
    key: Cell<Option<Key>>,
    hub: RefCell<Option<Weak<HubInner>>>,
    handler: RefCell<Option<Handler>>,
}

impl SignalState {
    fn hub(&self) -> Option<Hub> {
        self.hub
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Hub::from_inner)
    }

    /// Spawns a task running the handler.
    fn deliver(&self) {
        let Some(hub) = self.hub() else {
            return;
        };
        let Some(handler) = self.handler.borrow().clone() else {
            return;
        };

        tracing::debug!(hub = hub.minimal_ident(), signum = self.signum, "signal delivered");

        let reporter = hub.clone();
        let spawned = hub.spawn(async move {
            if let Err(err) = handler().await {
                let _ = reporter.handle_error(Some("signal handler"), err);
            }
            Ok(())
        });

        if let Err(err) = spawned {
            tracing::debug!(signum = self.signum, %err, "signal handler not started");
        }
    }
}

/// A registered signal handler.
///
/// Dropping the handle keeps the handler installed; call
/// [`cancel`](SignalHandle::cancel) to remove it.
pub struct SignalHandle {
    state: Rc<SignalState>,
}

impl SignalHandle {
    pub fn signum(&self) -> i32 {
        self.state.signum
    }

    /// Whether the handler is still installed.
    pub fn is_active(&self) -> bool {
        self.state.key.get().is_some() && self.state.hub().is_some_and(|hub| !hub.is_destroyed())
    }

    /// Removes the handler.
    ///
    /// The watcher is released immediately and the handler and hub
    /// references are dropped. When it was the last handler of the signal
    /// in the process, the previous disposition is restored. Idempotent.
    pub fn cancel(&self) {
        if let Some(key) = self.state.key.take() {
            if let Some(Ok(reactor)) = self.state.hub().map(|hub| hub.reactor()) {
                reactor.remove_signal(key);
            }
        }

        let hub = self.state.hub.borrow_mut().take();
        let handler = self.state.handler.borrow_mut().take();
        drop(hub);
        drop(handler);
    }
}

impl fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandle")
            .field("signum", &self.state.signum)
            .field("active", &self.state.key.get().is_some())
            .finish()
    }
}

impl Hub {
    /// Runs `handler` in a new task every time `signum` is delivered.
    ///
    /// An error returned by the handler is reported through
    /// [`handle_error`](Hub::handle_error) with the context
    /// `"signal handler"`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSignal`](crate::Error::InvalidSignal) for a number
    ///   outside `1..=64`, `SIGKILL` or `SIGSTOP`, before anything is
    ///   installed,
    /// - [`Error::HubDestroyed`](crate::Error::HubDestroyed) if the hub was
    ///   destroyed.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let handle = hub.signal(libc::SIGUSR1, || async {
    ///     println!("SIGUSR1");
    ///     Ok(())
    /// })?;
    /// // ...
    /// handle.cancel();
    /// ```
    pub fn signal<H, Fut>(&self, signum: i32, handler: H) -> Result<SignalHandle>
    where
        H: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        crate::reactor::signal::validate(signum)?;
        let reactor = self.reactor()?;

        let handler: Handler = Rc::new(move || Box::pin(handler()));
        let state = Rc::new(SignalState {
            signum,
            key: Cell::new(None),
            hub: RefCell::new(Some(Rc::downgrade(&self.inner))),
            handler: RefCell::new(Some(handler)),
        });

        let watcher = state.clone();
        let key = reactor.add_signal(signum, Rc::new(move || watcher.deliver()))?;
        state.key.set(Some(key));

        Ok(SignalHandle { state })
    }
}

/// Installs `handler` for `signum` on the current thread's hub. See
/// [`Hub::signal`].
pub fn signal<H, Fut>(signum: i32, handler: H) -> Result<SignalHandle>
where
    H: Fn() -> Fut + 'static,
    Fut: Future<Output = Result<()>> + 'static,
{
    get_hub()?.signal(signum, handler)
}
