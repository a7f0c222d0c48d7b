use crate::error::Result;
use crate::hub::context;
use crate::reactor::Reactor;
use crate::utils::slab::Key;

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Suspends the current task until the loop has nothing else to do.
///
/// The task resumes in an iteration whose callback queue is empty. Among
/// the tasks waiting for idle, only those with the highest `priority` are
/// resumed per iteration.
pub fn idle(priority: i32) -> Idle {
    Idle {
        priority,
        state: None,
        done: false,
    }
}

/// Future returned by [`idle`].
pub struct Idle {
    priority: i32,
    state: Option<(Rc<Reactor>, Key)>,
    done: bool,
}

impl Future for Idle {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(Ok(()));
        }

        if let Some(err) = context::take_throw() {
            this.release();
            return Poll::Ready(Err(err));
        }

        match &this.state {
            None => {
                let reactor = match context::current_reactor() {
                    Ok(reactor) => reactor,
                    Err(err) => {
                        this.done = true;
                        return Poll::Ready(Err(err));
                    }
                };
                let key = reactor.add_idle(this.priority, cx.waker().clone());
                this.state = Some((reactor, key));
                Poll::Pending
            }
            Some((reactor, key)) => {
                if reactor.idle_fired(*key) {
                    this.release();
                    return Poll::Ready(Ok(()));
                }
                reactor.set_idle_waker(*key, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl Idle {
    fn release(&mut self) {
        self.done = true;
        if let Some((reactor, key)) = self.state.take() {
            reactor.remove_idle(key);
        }
    }
}

impl Drop for Idle {
    fn drop(&mut self) {
        self.release();
    }
}
