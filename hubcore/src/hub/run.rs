//! The loop driver.
//!
//! [`Hub::run_until`] is the only place the reactor is driven. Each
//! iteration:
//! 1. drains the commands sent from other threads,
//! 2. dispatches delivered signals,
//! 3. runs the callbacks queued before the iteration started,
//! 4. ends the run if it is done or nothing keeps the loop alive,
//! 5. polls the OS, then fires expired timers and idle watchers.

use super::{Hub, context};
use crate::error::{Error, Result, panic_message};
use crate::reactor::{Callback, Command, Reactor};
use crate::task::TaskId;
use crate::utils::slab::Key;

use std::panic::{self, AssertUnwindSafe};
use std::task::{Context, Poll};

impl Hub {
    /// Drives the loop until `done` returns `true`.
    ///
    /// # Errors
    ///
    /// - [`Error::BlockingSwitchOut`] if the loop is already running or the
    ///   caller is a task,
    /// - [`Error::HubIdle`] when nothing is left to wait on,
    /// - [`Error::HubDestroyed`] when the hub was destroyed during the run,
    /// - the system error that stopped the run.
    pub(crate) fn run_until(&self, done: &dyn Fn() -> bool) -> Result<()> {
        if self.inner.running.get() || context::current_task().is_some() {
            return Err(Error::BlockingSwitchOut(
                "the hub loop can only be driven from the root context",
            ));
        }

        let reactor = self.reactor()?;
        self.start_monitor()?;

        let guard = context::enter(self.clone());
        self.inner.running.set(true);
        self.inner.probe.set_running(true);

        let outcome = loop {
            if let Some(err) = self.inner.system_error.borrow_mut().take() {
                break Err(err);
            }
            if self.inner.shutdown.get().is_some() {
                break Err(Error::HubDestroyed);
            }
            if done() {
                break Ok(());
            }
            if !self.run_once(&reactor, done) {
                break if done() { Ok(()) } else { Err(Error::HubIdle) };
            }
        };

        self.inner.probe.set_running(false);
        self.inner.running.set(false);
        drop(guard);
        drop(reactor);

        if let Some(destroy_loop) = self.inner.shutdown.take() {
            self.inner.teardown(destroy_loop);
        }

        outcome
    }

    /// Runs one loop iteration. Returns `false` if the loop ran dry.
    ///
    /// The iteration never blocks in the poller once the run is finished or
    /// must stop.
    fn run_once(&self, reactor: &Reactor, done: &dyn Fn() -> bool) -> bool {
        reactor.update_now();
        self.drain_commands(reactor);
        if self.must_stop() {
            return true;
        }
        reactor.dispatch_signals();

        let mut batch = reactor.take_callbacks();
        while let Some(callback) = batch.pop_front() {
            self.dispatch(callback);
            if self.must_stop() {
                reactor.requeue_front(batch);
                return true;
            }
        }

        if done() {
            return true;
        }
        if !reactor.is_alive() {
            return false;
        }

        let timeout = reactor.poll_timeout();
        self.inner.probe.enter_poll();
        let polled = reactor.poll(timeout);
        self.inner.probe.leave_poll();

        if let Err(err) = polled {
            let _ = self.handle_error(None, err.into());
            return true;
        }

        reactor.fire_timers();
        if !reactor.has_callbacks() {
            reactor.fire_idles();
        }

        true
    }

    fn must_stop(&self) -> bool {
        self.inner.shutdown.get().is_some() || self.inner.system_error.borrow().is_some()
    }

    fn drain_commands(&self, reactor: &Reactor) {
        for command in reactor.remote().take() {
            match command {
                Command::Wake { hub, key } if hub == self.inner.ident => {
                    reactor.run_callback(Callback::Poll(key));
                }
                Command::Wake { .. } => {}
                Command::Call(f) => reactor.run_callback(Callback::Call(Box::new(move || {
                    f();
                    Ok(())
                }))),
                Command::Destroy { hub } if hub == self.inner.ident => {
                    if self.inner.shutdown.get().is_none() {
                        self.inner.shutdown.set(Some(None));
                    }
                }
                Command::Destroy { .. } => {}
            }
        }
    }

    fn dispatch(&self, callback: Callback) {
        self.inner.probe.tick();

        match callback {
            Callback::Poll(key) => self.poll_task(key),
            Callback::Call(f) => {
                let failure = match panic::catch_unwind(AssertUnwindSafe(f)) {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(Error::Panicked(panic_message(&*payload))),
                };
                if let Some(err) = failure {
                    let _ = self.handle_error(Some("callback"), err);
                }
            }
        }
    }

    /// Polls task `key` once.
    ///
    /// The future is taken out of the arena while it runs, so the task may
    /// spawn, kill or wake anything, itself included.
    fn poll_task(&self, key: Key) {
        let (mut future, control, waker, thrown) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(key) else {
                return;
            };
            let Some(future) = slot.future.take() else {
                return;
            };
            slot.started = true;
            (future, slot.control.clone(), slot.waker.clone(), slot.thrown.take())
        };

        control.mark_running();

        let scope = context::enter_task(self.inner.ident, TaskId(key), thrown);
        let mut cx = Context::from_waker(&waker);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
        let unconsumed = scope.exit();

        let failure = match outcome {
            Ok(Poll::Ready(())) => None,
            Ok(Poll::Pending) => match unconsumed {
                None => {
                    let mut tasks = self.inner.tasks.borrow_mut();
                    if let Some(slot) = tasks.get_mut(key) {
                        slot.future = Some(future);
                        return;
                    }
                    None
                }
                Some(err) => Some(err),
            },
            Err(payload) => Some(Error::Panicked(panic_message(&*payload))),
        };

        let slot = self.inner.tasks.borrow_mut().remove(key);
        drop(future);
        drop(slot);

        if let Some(err) = failure {
            control.fail(err);
        }
    }
}
