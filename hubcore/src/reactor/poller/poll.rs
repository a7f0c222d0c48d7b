//! Portable `poll(2)` poller for unix targets without `epoll`.
//!
//! Registrations live in a plain vector that is turned into a `pollfd`
//! array on every wait. The wake source is a non-blocking self-pipe.

use super::common::{Interest, drain, timeout_millis};
use super::unix::{sys_close, sys_pipe};
use crate::reactor::event::Event;

use libc::{POLLERR, POLLHUP, POLLIN, POLLOUT, nfds_t, pollfd};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

struct Registration {
    fd: RawFd,
    token: u64,
    interest: Interest,
}

pub(crate) struct PollPoller {
    /// Read end of the wake-up pipe.
    wake_read: RawFd,
    /// Write end of the wake-up pipe.
    wake_write: RawFd,
    registrations: Vec<Registration>,
    fds: Vec<pollfd>,
}

impl PollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let (wake_read, wake_write) = sys_pipe()?;

        Ok(Self {
            wake_read,
            wake_write,
            registrations: Vec::new(),
            fds: Vec::with_capacity(16),
        })
    }

    pub(crate) fn wake_fd(&self) -> RawFd {
        self.wake_write
    }

    pub(crate) fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        if self.registrations.iter().any(|r| r.fd == fd) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }

        self.registrations.push(Registration {
            fd,
            token,
            interest,
        });
        Ok(())
    }

    pub(crate) fn reregister(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
    ) -> io::Result<()> {
        match self.registrations.iter_mut().find(|r| r.fd == fd) {
            Some(r) => {
                r.token = token;
                r.interest = interest;
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.fd != fd);

        if self.registrations.len() == before {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        Ok(())
    }

    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();
        self.fds.clear();

        self.fds.push(pollfd {
            fd: self.wake_read,
            events: POLLIN,
            revents: 0,
        });

        for r in &self.registrations {
            let mut flags = 0;
            if r.interest.read {
                flags |= POLLIN;
            }
            if r.interest.write {
                flags |= POLLOUT;
            }
            self.fds.push(pollfd {
                fd: r.fd,
                events: flags,
                revents: 0,
            });
        }

        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
                timeout_millis(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        if self.fds[0].revents != 0 {
            drain(self.wake_read);
        }

        for (pfd, r) in self.fds[1..].iter().zip(&self.registrations) {
            if pfd.revents == 0 {
                continue;
            }

            events.push(Event {
                token: r.token,
                readable: pfd.revents & (POLLIN | POLLERR | POLLHUP) != 0,
                writable: pfd.revents & (POLLOUT | POLLERR) != 0,
            });
        }

        Ok(())
    }
}

impl Drop for PollPoller {
    fn drop(&mut self) {
        sys_close(self.wake_read);
        sys_close(self.wake_write);
    }
}
