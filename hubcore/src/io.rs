//! Waiting for file descriptor readiness.
//!
//! These are the primitives cooperative sockets and pipes are built on: a
//! task performs non-blocking I/O, and when it would block it awaits
//! [`wait_readable`] or [`wait_writable`] on the descriptor. Only one task
//! may wait for each direction of a descriptor at a time.

use crate::error::Result;
use crate::hub::context;
use crate::reactor::Reactor;
use crate::reactor::io::Direction;
use crate::utils::slab::Key;

use std::future::Future;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Suspends the current task until `fd` is readable.
///
/// # Errors
///
/// - [`Error::ConcurrentObjectUse`](crate::Error::ConcurrentObjectUse) if
///   another task is already waiting to read `fd`,
/// - [`Error::BlockingSwitchOut`](crate::Error::BlockingSwitchOut) outside
///   a hub,
/// - the error the task was killed with.
///
/// # Examples
///
/// ```rust,ignore
/// loop {
///     match stream.read(&mut buf) {
///         Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
///             hubcore::wait_readable(stream.as_raw_fd()).await?;
///         }
///         other => break other,
///     }
/// }
/// ```
pub fn wait_readable(fd: RawFd) -> IoWait {
    IoWait::new(fd, Direction::Read)
}

/// Suspends the current task until `fd` is writable. See [`wait_readable`].
pub fn wait_writable(fd: RawFd) -> IoWait {
    IoWait::new(fd, Direction::Write)
}

/// Future returned by [`wait_readable`] and [`wait_writable`].
pub struct IoWait {
    fd: RawFd,
    dir: Direction,
    state: Option<(Rc<Reactor>, Key)>,
    done: bool,
}

impl IoWait {
    fn new(fd: RawFd, dir: Direction) -> Self {
        Self {
            fd,
            dir,
            state: None,
            done: false,
        }
    }

    fn release(&mut self) {
        self.done = true;
        if let Some((reactor, key)) = self.state.take() {
            reactor.remove_io(key, self.dir);
        }
    }
}

impl Future for IoWait {
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
                let registered = context::current_reactor().and_then(|reactor| {
                    let key = reactor.add_io(this.fd, this.dir, cx.waker().clone())?;
                    Ok((reactor, key))
                });
                match registered {
                    Ok(state) => {
                        this.state = Some(state);
                        Poll::Pending
                    }
                    Err(err) => {
                        this.done = true;
                        Poll::Ready(Err(err))
                    }
                }
            }
            Some((reactor, key)) => {
                if reactor.io_fired(*key, this.dir) {
                    this.release();
                    return Poll::Ready(Ok(()));
                }
                reactor.set_io_waker(*key, this.dir, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl Drop for IoWait {
    fn drop(&mut self) {
        self.release();
    }
}
