use crate::error::Result;
use crate::hub::context;
use crate::reactor::{Callback, Reactor, TimerAction};
use crate::sync::{Wait, Waiter};
use crate::utils::slab::Key;

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

/// Suspends the current task for `duration`.
///
/// A zero duration yields: the task is resumed after the callbacks and
/// tasks already queued on the loop, including tasks it just spawned.
///
/// # Errors
///
/// The returned future fails with the kill error if the task is killed
/// while sleeping.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// hubcore::sleep(Duration::from_millis(10)).await?;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    sleep_with(duration, true)
}

/// Like [`sleep`]. With `keep_alive` unset the timer does not keep the
/// loop alive: if nothing else is pending, the hub goes idle instead of
/// waiting for it.
pub fn sleep_with(duration: Duration, keep_alive: bool) -> Sleep {
    Sleep {
        duration,
        keep_alive,
        state: State::Init,
    }
}

enum State {
    Init,
    Yield(Wait<()>),
    Armed { reactor: Rc<Reactor>, key: Key },
    Done,
}

/// Future returned by [`sleep`] and [`sleep_with`].
///
/// The timer is armed on first poll and released when the future completes
/// or is dropped.
pub struct Sleep {
    duration: Duration,
    keep_alive: bool,
    state: State,
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Init => {
                    if let Some(err) = context::take_throw() {
                        this.state = State::Done;
                        return Poll::Ready(Err(err));
                    }

                    let reactor = match context::current_reactor() {
                        Ok(reactor) => reactor,
                        Err(err) => {
                            this.state = State::Done;
                            return Poll::Ready(Err(err));
                        }
                    };

                    if this.duration.is_zero() {
                        let waiter = Waiter::new();
                        let wake = waiter.clone();
                        reactor.run_callback(Callback::Call(Box::new(move || wake.switch(()))));
                        this.state = State::Yield(waiter.take());
                        continue;
                    }

                    reactor.update_now();
                    let key = reactor.add_timer(
                        this.duration,
                        this.keep_alive,
                        TimerAction::Wake(cx.waker().clone()),
                    );
                    this.state = State::Armed { reactor, key };
                    return Poll::Pending;
                }
                State::Yield(wait) => {
                    let result = ready!(Pin::new(wait).poll(cx));
                    this.state = State::Done;
                    return Poll::Ready(result);
                }
                State::Armed { reactor, key } => {
                    if let Some(err) = context::take_throw() {
                        reactor.cancel_timer(*key);
                        this.state = State::Done;
                        return Poll::Ready(Err(err));
                    }

                    if !reactor.timer_active(*key) {
                        this.state = State::Done;
                        return Poll::Ready(Ok(()));
                    }

                    reactor.set_timer_waker(*key, cx.waker());
                    return Poll::Pending;
                }
                State::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let State::Armed { reactor, key } = &self.state {
            reactor.cancel_timer(*key);
        }
    }
}
