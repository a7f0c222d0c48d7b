use crate::error::{Error, Result};
use crate::reactor::event::Event;
use crate::reactor::poller::{Interest, Poller};
use crate::utils::Slab;
use crate::utils::slab::Key;

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::task::Waker;

/// Readiness direction a task waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// A task waiting for one direction of a descriptor.
struct IoWaiter {
    waker: Waker,

    /// Set once readiness was observed; the waiting future consumes it.
    fired: bool,
}

/// Everything watched on one descriptor.
///
/// A descriptor is registered with the poller once, whatever the number of
/// directions watched, so a reader and a writer can share it.
struct IoSlot {
    fd: RawFd,
    reader: Option<IoWaiter>,
    writer: Option<IoWaiter>,
}

impl IoSlot {
    fn side(&self, dir: Direction) -> &Option<IoWaiter> {
        match dir {
            Direction::Read => &self.reader,
            Direction::Write => &self.writer,
        }
    }

    fn side_mut(&mut self, dir: Direction) -> &mut Option<IoWaiter> {
        match dir {
            Direction::Read => &mut self.reader,
            Direction::Write => &mut self.writer,
        }
    }

    /// Interest still worth polling for: watched and not yet fired.
    fn interest(&self) -> Interest {
        Interest {
            read: self.reader.as_ref().is_some_and(|w| !w.fired),
            write: self.writer.as_ref().is_some_and(|w| !w.fired),
        }
    }

    fn is_empty(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}

/// Descriptor watchers of one reactor.
#[derive(Default)]
pub(crate) struct IoWatchers {
    slots: Slab<IoSlot>,
    fds: HashMap<RawFd, Key>,
}

impl IoWatchers {
    /// Starts watching `fd` for `dir` on behalf of the task owning `waker`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrentObjectUse`] if another task already waits
    /// for the same direction of `fd`, or the poller's registration error.
    pub(crate) fn add(
        &mut self,
        poller: &mut Poller,
        fd: RawFd,
        dir: Direction,
        waker: Waker,
    ) -> Result<Key> {
        if let Some(&key) = self.fds.get(&fd) {
            if let Some(slot) = self.slots.get_mut(key) {
                if slot.side(dir).is_some() {
                    return Err(Error::ConcurrentObjectUse(format!("fd {fd} ({dir:?})")));
                }

                *slot.side_mut(dir) = Some(IoWaiter {
                    waker,
                    fired: false,
                });

                if let Err(err) = poller.reregister(fd, key.to_token(), slot.interest()) {
                    *slot.side_mut(dir) = None;
                    return Err(err.into());
                }

                return Ok(key);
            }

            self.fds.remove(&fd);
        }

        let mut slot = IoSlot {
            fd,
            reader: None,
            writer: None,
        };
        *slot.side_mut(dir) = Some(IoWaiter {
            waker,
            fired: false,
        });

        let interest = slot.interest();
        let key = self.slots.insert(slot);

        if let Err(err) = poller.register(fd, key.to_token(), interest) {
            self.slots.remove(key);
            return Err(err.into());
        }

        self.fds.insert(fd, key);
        Ok(key)
    }

    /// Whether readiness was observed for `dir` on the watcher `key`.
    pub(crate) fn fired(&self, key: Key, dir: Direction) -> bool {
        self.slots
            .get(key)
            .and_then(|slot| slot.side(dir).as_ref())
            .is_some_and(|w| w.fired)
    }

    pub(crate) fn set_waker(&mut self, key: Key, dir: Direction, waker: &Waker) {
        if let Some(w) = self.slots.get_mut(key).and_then(|s| s.side_mut(dir).as_mut()) {
            if !w.waker.will_wake(waker) {
                w.waker = waker.clone();
            }
        }
    }

    /// Stops watching `dir`; the descriptor is deregistered once no
    /// direction is left.
    pub(crate) fn remove(&mut self, poller: &mut Poller, key: Key, dir: Direction) {
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };

        *slot.side_mut(dir) = None;
        let fd = slot.fd;

        if slot.is_empty() {
            self.slots.remove(key);
            self.fds.remove(&fd);
            let _ = poller.deregister(fd);
        } else {
            let interest = slot.interest();
            let _ = poller.reregister(fd, key.to_token(), interest);
        }
    }

    /// Marks the directions reported by `events` as fired and returns the
    /// wakers to notify.
    pub(crate) fn dispatch(&mut self, poller: &mut Poller, events: &[Event]) -> Vec<Waker> {
        let mut wakers = Vec::new();

        for event in events {
            let key = Key::from_token(event.token);
            let Some(slot) = self.slots.get_mut(key) else {
                continue;
            };

            for (ready, dir) in [
                (event.readable, Direction::Read),
                (event.writable, Direction::Write),
            ] {
                if !ready {
                    continue;
                }
                if let Some(w) = slot.side_mut(dir).as_mut() {
                    if !w.fired {
                        w.fired = true;
                        wakers.push(w.waker.clone());
                    }
                }
            }

            let interest = slot.interest();
            let _ = poller.reregister(slot.fd, key.to_token(), interest);
        }

        wakers
    }

    /// Registers every watched descriptor with a fresh poller.
    pub(crate) fn register_all(&self, poller: &mut Poller) -> io::Result<()> {
        for (key, slot) in self.slots.iter() {
            poller.register(slot.fd, key.to_token(), slot.interest())?;
        }
        Ok(())
    }

    /// Drops every watcher, deregistering their descriptors.
    pub(crate) fn clear(&mut self, poller: &mut Poller) {
        for slot in self.slots.drain() {
            let _ = poller.deregister(slot.fd);
        }
        self.fds.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
