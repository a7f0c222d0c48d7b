use super::core::HubInner;
use super::{Hub, context};
use crate::error::{Error, Result};
use crate::reactor::TimerAction;

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

impl Hub {
    /// Runs `future` as a task and drives the loop until it finishes.
    ///
    /// Other tasks of the hub run concurrently; those still pending when
    /// `future` finishes stay suspended until the loop is driven again.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or the error that stopped the loop:
    /// [`Error::HubIdle`] if the future waits on something that can never
    /// happen, [`Error::HubDestroyed`], or an escalated system error.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let handle = self.spawn(future)?;
        let cell = handle.cell.clone();

        match self.run_until(&|| cell.is_finished()) {
            Ok(()) => cell.take_result().unwrap_or(Err(Error::ResultTaken)),
            Err(err) => {
                self.discard_task(handle.id(), err.clone());
                Err(err)
            }
        }
    }

    /// Drives the loop until nothing is left to run.
    ///
    /// Returns `Ok(true)` once the hub is idle, or `Ok(false)` if `timeout`
    /// elapsed first. The timeout timer does not keep the loop alive and is
    /// released on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockingSwitchOut`] when called from a task,
    /// [`Error::HubDestroyed`] or an escalated system error.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// hubcore::spawn(async { hubcore::sleep(Duration::from_millis(10)).await })?;
    /// assert!(hub.join(None)?);
    /// ```
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        let reactor = self.reactor()?;
        let expired = Rc::new(Cell::new(false));

        let timer = timeout.map(|timeout| {
            let flag = expired.clone();
            reactor.update_now();
            reactor.add_timer(
                timeout,
                false,
                TimerAction::Call(Box::new(move || flag.set(true))),
            )
        });

        let outcome = self.run_until(&|| expired.get());

        if let Some(timer) = timer {
            reactor.cancel_timer(timer);
        }

        match outcome {
            Err(Error::HubIdle) => Ok(true),
            Ok(()) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Destroys the hub.
    ///
    /// Stops the watchdog, closes the resolver, kills the thread pool and
    /// drops every task; their handles observe [`Error::HubDestroyed`].
    /// The event loop is then destroyed, or with `destroy_loop ==
    /// Some(false)` detached so the next hub created on this thread reuses
    /// it. `None` destroys the loop unless it is the main thread's.
    ///
    /// Called while the loop runs (from a task or a callback), the teardown
    /// happens as soon as the current callback returns and the run ends
    /// with [`Error::HubDestroyed`]. Destroying twice does nothing.
    pub fn destroy(&self, destroy_loop: Option<bool>) {
        if self.is_destroyed() {
            return;
        }

        if self.is_running() {
            self.inner.shutdown.set(Some(destroy_loop));
            return;
        }

        self.inner.teardown(destroy_loop);
    }

    /// Prepares the hub for use in a forked child.
    ///
    /// Rebuilds the event loop's OS resources if the process id changed,
    /// then runs the fork hooks of the thread pool, resolver and watchdog.
    /// Calling it again, or without a fork, does nothing harmful.
    ///
    /// # Errors
    ///
    /// Returns the OS error of rebuilding the poller.
    pub fn reinit(&self) -> Result<()> {
        let reactor = self.reactor()?;
        let rebuilt = reactor.reinit()?;

        let threadpool = self.inner.threadpool.borrow().clone();
        if let Some(pool) = threadpool {
            pool.on_fork();
        }

        let resolver = self.inner.resolver.borrow().clone();
        if let Some(resolver) = resolver {
            resolver.on_fork();
        }

        if let Some(monitor) = self.inner.monitor.borrow_mut().as_mut() {
            monitor.on_fork()?;
        }

        tracing::debug!(hub = self.inner.ident, rebuilt, "hub reinitialized");
        Ok(())
    }
}

impl HubInner {
    /// Releases everything the hub owns. Runs once.
    pub(crate) fn teardown(&self, destroy_loop: Option<bool>) {
        if self.destroyed.replace(true) {
            return;
        }

        let monitor = self.monitor.borrow_mut().take();
        if let Some(mut monitor) = monitor {
            monitor.kill();
        }

        let resolver = self.resolver.borrow_mut().take();
        if let Some(resolver) = resolver {
            resolver.close();
        }

        let threadpool = self.threadpool.borrow_mut().take();
        if let Some(pool) = threadpool {
            pool.kill();
        }

        let slots = self.tasks.borrow_mut().drain();
        let dropped = slots.len();
        for mut slot in slots {
            let future = slot.future.take();
            drop(future);
            slot.control.fail(Error::HubDestroyed);
        }

        let reactor = self.reactor.borrow_mut().take();
        if let Some(reactor) = reactor {
            reactor.reset();

            let destroy = destroy_loop.unwrap_or(!reactor.is_default());
            if !destroy {
                context::detach_reactor(reactor);
            }
        }

        context::clear_current(self.ident);

        tracing::debug!(hub = self.ident, tasks = dropped, "hub destroyed");
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.teardown(None);
    }
}

/// Reinitializes `hub`, or the current thread's hub with `None`, after a
/// fork. Does nothing if the thread has no hub.
///
/// # Errors
///
/// Returns the OS error of rebuilding the event loop.
pub fn reinit(hub: Option<&Hub>) -> Result<()> {
    match hub {
        Some(hub) => hub.reinit(),
        None => match context::get_hub_if_exists() {
            Some(hub) => hub.reinit(),
            None => Ok(()),
        },
    }
}
