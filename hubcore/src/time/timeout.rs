use crate::error::{Error, Result};
use crate::time::sleep::{Sleep, sleep};

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Bounds `future` by `duration`.
///
/// Resolves to the future's own result if it completes first, or to
/// [`Error::Timeout`] once the timer fires. The timer is released on every
/// exit path, including when the returned future is dropped.
///
/// # Examples
///
/// ```rust,ignore
/// let waiter: Waiter<()> = Waiter::new();
/// let result = with_timeout(Duration::from_millis(10), waiter.get()).await;
/// assert!(matches!(result, Err(Error::Timeout)));
/// ```
pub fn with_timeout<F, T>(duration: Duration, future: F) -> Timeout<F>
where
    F: Future<Output = Result<T>>,
{
    Timeout {
        future,
        sleep: sleep(duration),
    }
}

/// Future returned by [`with_timeout`].
pub struct Timeout<F> {
    future: F,
    sleep: Sleep,
}

impl<F, T> Future for Timeout<F>
where
    F: Future<Output = Result<T>>,
{
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };

        let future = unsafe { Pin::new_unchecked(&mut this.future) };
        if let Poll::Ready(val) = future.poll(cx) {
            return Poll::Ready(val);
        }

        let sleep = Pin::new(&mut this.sleep);
        match sleep.poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Err(Error::Timeout)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}
