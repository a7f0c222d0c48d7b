//! Offloading blocking work to OS threads.
//!
//! Each hub owns a [`ThreadPool`], created on first use unless one was
//! provided through [`HubBuilder::threadpool`](crate::HubBuilder::threadpool)
//! or [`Hub::set_threadpool`]. [`Hub::apply`] runs a closure on the pool and
//! returns a future resolving on the hub once the closure returned. While
//! such a job is in flight it keeps the hub's loop alive.

mod pool;

pub use pool::OsThreadPool;

use crate::error::{Error, Result, panic_message};
use crate::hub::{Hub, context, get_hub};
use crate::reactor::Remote;

use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// A unit of work handed to a thread pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of OS threads running blocking jobs for a hub.
///
/// Implementations must run every submitted job at most once, and drop
/// the jobs they will never run: dropping a job releases the hub operation
/// waiting for it.
pub trait ThreadPool {
    /// Queues `job`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadPool`] if the job cannot be accepted.
    fn submit(&self, job: Job) -> Result<()>;

    /// Maximum number of threads.
    fn size(&self) -> usize;

    /// Stops accepting jobs and lets the workers exit.
    fn kill(&self);

    /// Called in the child after a fork.
    fn on_fork(&self);
}

struct Slot<T> {
    value: Option<Result<T>>,
    waker: Option<Waker>,
}

/// Completion side of an [`Apply`], moved into the job.
///
/// Dropping it without a value (the pool dropped the job) completes the
/// operation with an error. Either way the hub's outstanding-operation
/// count is released after the value was published.
struct Completion<T> {
    slot: Arc<Mutex<Slot<T>>>,
    remote: Arc<Remote>,
    done: bool,
}

impl<T> Completion<T> {
    fn new(slot: Arc<Mutex<Slot<T>>>, remote: Arc<Remote>) -> Self {
        remote.hold();
        Self {
            slot,
            remote,
            done: false,
        }
    }

    fn finish(&mut self, value: Result<T>) {
        let waker = {
            let mut slot = self.slot.lock();
            slot.value = Some(value);
            slot.waker.take()
        };
        self.done = true;

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(Err(Error::thread_pool("job dropped before it ran")));
        }
        self.remote.release();
    }
}

/// Future returned by [`Hub::apply`].
pub struct Apply<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Future for Apply<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        if let Some(err) = context::take_throw() {
            return Poll::Ready(Err(err));
        }

        let mut slot = self.slot.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Hub {
    /// The hub's thread pool, created on first use with
    /// `threadpool_size` threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubDestroyed`] if the hub was destroyed.
    pub fn threadpool(&self) -> Result<Rc<dyn ThreadPool>> {
        if self.is_destroyed() {
            return Err(Error::HubDestroyed);
        }

        if let Some(pool) = self.inner.threadpool.borrow().clone() {
            return Ok(pool);
        }

        let size = self.inner.config.threadpool_size;
        let pool: Rc<dyn ThreadPool> = Rc::new(OsThreadPool::new(
            size,
            format!("hubcore-pool-{}", self.inner.ident),
        ));
        tracing::debug!(hub = self.inner.ident, size, "thread pool created");

        *self.inner.threadpool.borrow_mut() = Some(pool.clone());
        Ok(pool)
    }

    /// Replaces the thread pool, returning the previous one untouched.
    pub fn set_threadpool(&self, pool: Rc<dyn ThreadPool>) -> Option<Rc<dyn ThreadPool>> {
        self.inner.threadpool.replace(Some(pool))
    }

    /// Kills and forgets the thread pool; the next use creates a new one.
    pub fn clear_threadpool(&self) {
        let pool = self.inner.threadpool.borrow_mut().take();
        if let Some(pool) = pool {
            pool.kill();
        }
    }

    /// Runs `f` on the thread pool.
    ///
    /// The returned future resolves on the hub with `f`'s return value, or
    /// [`Error::Panicked`] if it panicked. The job keeps the loop alive
    /// until it completes.
    ///
    /// # Errors
    ///
    /// Fails if the hub was destroyed or the pool refused the job.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let len = hub.apply(|| std::fs::read("/etc/hosts").map(|b| b.len()))?.await??;
    /// ```
    pub fn apply<F, T>(&self, f: F) -> Result<Apply<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.threadpool()?;

        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            waker: None,
        }));
        let mut completion = Completion::new(slot.clone(), self.inner.remote.clone());

        pool.submit(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| Error::Panicked(panic_message(&*payload)));
            completion.finish(outcome);
        }))?;

        Ok(Apply { slot })
    }
}

/// Runs `f` on the current hub's thread pool. See [`Hub::apply`].
pub fn apply<F, T>(f: F) -> Result<Apply<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    get_hub()?.apply(f)
}
