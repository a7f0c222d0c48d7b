use crate::error::{Error, Result};
use crate::hub::context;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct WaiterState<T> {
    value: Option<Result<T>>,
    switched: bool,
    waker: Option<Waker>,
    /// Bumped whenever a new [`Wait`] takes over the waker slot.
    registration: u64,
}

/// A one-shot rendezvous between a waiting task and whoever delivers its
/// value.
///
/// The first [`switch`] or [`throw`] wins; later deliveries fail with
/// [`Error::AlreadySwitched`]. Delivering never runs the waiting task
/// synchronously: it is woken through the loop, which makes delivery safe
/// from loop callbacks and signal handlers.
///
/// Only one task may wait at a time; a second one fails with
/// [`Error::ConcurrentObjectUse`].
///
/// # Examples
///
/// ```rust,ignore
/// let waiter = Waiter::new();
/// let result = waiter.clone();
/// hub.run_callback(move || result.switch("done"))?;
/// assert_eq!(waiter.get().await?, "done");
/// ```
///
/// [`switch`]: Waiter::switch
/// [`throw`]: Waiter::throw
pub struct Waiter<T> {
    state: Rc<RefCell<WaiterState<T>>>,
}

impl<T> Waiter<T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(WaiterState {
                value: None,
                switched: false,
                waker: None,
                registration: 0,
            })),
        }
    }

    /// Delivers `value` to the waiting task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySwitched`] if a value or an error was
    /// already delivered.
    pub fn switch(&self, value: T) -> Result<()> {
        self.deliver(Ok(value))
    }

    /// Delivers `error`; the waiting task's `get` or `take` fails with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadySwitched`] if a value or an error was
    /// already delivered.
    pub fn throw(&self, error: Error) -> Result<()> {
        self.deliver(Err(error))
    }

    fn deliver(&self, value: Result<T>) -> Result<()> {
        let waker = {
            let mut state = self.state.borrow_mut();
            if state.switched {
                return Err(Error::AlreadySwitched);
            }
            state.switched = true;
            state.value = Some(value);
            state.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Whether a value or an error was delivered.
    pub fn ready(&self) -> bool {
        self.state.borrow().switched
    }

    /// Waits for the delivery and returns a clone of it. Repeated calls
    /// return the same outcome.
    pub fn get(&self) -> Wait<T>
    where
        T: Clone,
    {
        Wait::new(self, |state| state.value.clone())
    }

    /// Waits for the delivery and moves it out. A later `take` fails with
    /// [`Error::ResultTaken`].
    pub fn take(&self) -> Wait<T> {
        Wait::new(self, |state| state.value.take())
    }
}

impl<T> Clone for Waiter<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Waiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Waiter")
            .field("switched", &state.switched)
            .field("waiting", &state.waker.is_some())
            .finish()
    }
}

/// Future returned by [`Waiter::get`] and [`Waiter::take`].
pub struct Wait<T> {
    state: Rc<RefCell<WaiterState<T>>>,
    extract: fn(&mut WaiterState<T>) -> Option<Result<T>>,
    registered: Option<u64>,
}

impl<T> Wait<T> {
    fn new(waiter: &Waiter<T>, extract: fn(&mut WaiterState<T>) -> Option<Result<T>>) -> Self {
        Self {
            state: waiter.state.clone(),
            extract,
            registered: None,
        }
    }
}

impl<T> Future for Wait<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let this = self.get_mut();

        if let Some(err) = context::take_throw() {
            return Poll::Ready(Err(err));
        }

        let mut state = this.state.borrow_mut();

        if state.switched {
            this.registered = None;
            let value = (this.extract)(&mut state);
            return Poll::Ready(value.unwrap_or(Err(Error::ResultTaken)));
        }

        let owner = this.registered == Some(state.registration);
        if let Some(waker) = &state.waker {
            if !owner && !waker.will_wake(cx.waker()) {
                return Poll::Ready(Err(Error::ConcurrentObjectUse("waiter".into())));
            }
        }

        if !owner {
            state.registration += 1;
            this.registered = Some(state.registration);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.registered {
            if let Ok(mut state) = self.state.try_borrow_mut() {
                if state.registration == registration {
                    state.waker = None;
                }
            }
        }
    }
}

struct MultipleState<T> {
    values: VecDeque<Result<T>>,
    waker: Option<Waker>,
}

/// A waiter that queues every delivery.
///
/// Several sources can notify the same task without losing values: each
/// [`get`](MultipleWaiter::get) returns the oldest undelivered value.
pub struct MultipleWaiter<T> {
    state: Rc<RefCell<MultipleState<T>>>,
}

impl<T> MultipleWaiter<T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MultipleState {
                values: VecDeque::new(),
                waker: None,
            })),
        }
    }

    pub fn switch(&self, value: T) {
        self.push(Ok(value));
    }

    pub fn throw(&self, error: Error) {
        self.push(Err(error));
    }

    fn push(&self, value: Result<T>) {
        let waker = {
            let mut state = self.state.borrow_mut();
            state.values.push_back(value);
            state.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Number of values delivered and not yet consumed.
    pub fn len(&self) -> usize {
        self.state.borrow().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the next value.
    pub fn get(&self) -> Next<T> {
        Next {
            state: self.state.clone(),
        }
    }
}

impl<T> Clone for MultipleWaiter<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for MultipleWaiter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`MultipleWaiter::get`].
pub struct Next<T> {
    state: Rc<RefCell<MultipleState<T>>>,
}

impl<T> Future for Next<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        if let Some(err) = context::take_throw() {
            return Poll::Ready(Err(err));
        }

        let mut state = self.state.borrow_mut();
        if let Some(value) = state.values.pop_front() {
            return Poll::Ready(value);
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn test_first_switch_wins() {
        let waiter = Waiter::new();
        assert!(!waiter.ready());

        waiter.switch(1).unwrap();
        assert!(matches!(waiter.switch(2), Err(Error::AlreadySwitched)));
        assert!(matches!(
            waiter.throw(Error::Cancelled),
            Err(Error::AlreadySwitched)
        ));

        assert!(matches!(poll_once(&mut waiter.get()), Poll::Ready(Ok(1))));
        assert!(matches!(poll_once(&mut waiter.get()), Poll::Ready(Ok(1))));
        assert!(matches!(poll_once(&mut waiter.take()), Poll::Ready(Ok(1))));
        assert!(matches!(
            poll_once(&mut waiter.take()),
            Poll::Ready(Err(Error::ResultTaken))
        ));
    }

    #[test]
    fn test_throw_is_returned() {
        let waiter: Waiter<()> = Waiter::new();
        let mut wait = waiter.get();
        assert!(poll_once(&mut wait).is_pending());

        waiter.throw(Error::Timeout).unwrap();
        assert!(matches!(
            poll_once(&mut wait),
            Poll::Ready(Err(Error::Timeout))
        ));
    }

    #[test]
    fn test_dropped_wait_releases_waiter() {
        let waiter: Waiter<u8> = Waiter::new();

        let mut first = waiter.take();
        assert!(poll_once(&mut first).is_pending());
        drop(first);

        let mut second = waiter.take();
        assert!(poll_once(&mut second).is_pending());
        waiter.switch(7).unwrap();
        assert!(matches!(poll_once(&mut second), Poll::Ready(Ok(7))));
    }

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stale_wait_drop_keeps_newer_registration() {
        let counter = Arc::new(CountingWaker::default());
        let waker = Waker::from(counter.clone());
        let mut cx = Context::from_waker(&waker);
        let waiter: Waiter<u8> = Waiter::new();

        let mut stale = waiter.get();
        assert!(Pin::new(&mut stale).poll(&mut cx).is_pending());
        let mut fresh = waiter.get();
        assert!(Pin::new(&mut fresh).poll(&mut cx).is_pending());
        drop(stale);

        waiter.switch(3).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(matches!(
            Pin::new(&mut fresh).poll(&mut cx),
            Poll::Ready(Ok(3))
        ));
    }

    #[test]
    fn test_multiple_waiter_queues() {
        let waiter = MultipleWaiter::new();
        waiter.switch("a");
        waiter.switch("b");
        assert_eq!(waiter.len(), 2);

        assert!(matches!(poll_once(&mut waiter.get()), Poll::Ready(Ok("a"))));
        assert!(matches!(poll_once(&mut waiter.get()), Poll::Ready(Ok("b"))));
        assert!(poll_once(&mut waiter.get()).is_pending());
        assert!(waiter.is_empty());
    }
}
