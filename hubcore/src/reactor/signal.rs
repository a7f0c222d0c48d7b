//! Process-wide signal plumbing.
//!
//! Signal dispositions are process-global while hubs are per thread. Each
//! reactor that watches signals claims one of [`SLOTS`] slots holding its
//! wake descriptor and a bitmask of pending signals. The installed handler
//! only touches atomics and calls `write(2)`, which keeps it
//! async-signal-safe: it sets the signal's bit in every claimed slot and
//! wakes the owning pollers. Each reactor later takes its bitmask and
//! dispatches to its own watchers.

use crate::error::{Error, Result};
use crate::reactor::poller::notify;

use libc::c_int;
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Maximum number of reactors watching signals at the same time.
pub(crate) const SLOTS: usize = 32;

/// Highest signal number that fits in a pending bitmask.
const MAX_SIGNAL: c_int = 64;

static WAKE_FDS: [AtomicI32; SLOTS] = [const { AtomicI32::new(-1) }; SLOTS];
static PENDING: [AtomicU64; SLOTS] = [const { AtomicU64::new(0) }; SLOTS];

/// Dispositions replaced by [`install`], restored by [`uninstall`].
static INSTALLED: Mutex<Vec<Installed>> = parking_lot::const_mutex(Vec::new());

struct Installed {
    signum: c_int,
    watchers: usize,
    previous: libc::sigaction,
}

/// Checks that `signum` can be watched at all.
pub(crate) fn validate(signum: i32) -> Result<()> {
    if !(1..=MAX_SIGNAL).contains(&signum) || signum == libc::SIGKILL || signum == libc::SIGSTOP {
        return Err(Error::InvalidSignal(signum));
    }
    Ok(())
}

fn bit(signum: c_int) -> u64 {
    1u64 << (signum - 1)
}

/// Claims a free slot for a reactor whose wake descriptor is `wake_fd`.
pub(crate) fn claim_slot(wake_fd: i32) -> Option<usize> {
    (0..SLOTS).find(|&slot| {
        WAKE_FDS[slot]
            .compare_exchange(-1, wake_fd, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    })
}

/// Points a claimed slot at a new wake descriptor (after fork).
pub(crate) fn update_slot(slot: usize, wake_fd: i32) {
    WAKE_FDS[slot].store(wake_fd, Ordering::Release);
}

/// Gives a slot back; pending signals for it are discarded.
pub(crate) fn release_slot(slot: usize) {
    WAKE_FDS[slot].store(-1, Ordering::Release);
    PENDING[slot].store(0, Ordering::Release);
}

/// Takes the bitmask of signals delivered to `slot` since the last call.
pub(crate) fn take_pending(slot: usize) -> u64 {
    PENDING[slot].swap(0, Ordering::AcqRel)
}

/// Returns whether `signum` is set in a bitmask from [`take_pending`].
pub(crate) fn is_set(mask: u64, signum: c_int) -> bool {
    mask & bit(signum) != 0
}

/// Routes `signum` to the hubs. Reference counted: the handler is installed
/// by the first watcher only.
pub(crate) fn install(signum: c_int) -> Result<()> {
    validate(signum)?;

    let mut installed = INSTALLED.lock();

    if let Some(entry) = installed.iter_mut().find(|e| e.signum == signum) {
        entry.watchers += 1;
        return Ok(());
    }

    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
    }

    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signum, &action, &mut previous) } < 0 {
        let err = io::Error::last_os_error();
        tracing::debug!(signum, error = %err, "sigaction refused signal");
        return Err(Error::InvalidSignal(signum));
    }

    installed.push(Installed {
        signum,
        watchers: 1,
        previous,
    });

    Ok(())
}

/// Drops one watcher of `signum`; the previous disposition comes back with
/// the last one.
pub(crate) fn uninstall(signum: c_int) {
    let mut installed = INSTALLED.lock();

    let Some(pos) = installed.iter().position(|e| e.signum == signum) else {
        return;
    };

    installed[pos].watchers -= 1;
    if installed[pos].watchers > 0 {
        return;
    }

    let entry = installed.swap_remove(pos);
    unsafe {
        libc::sigaction(signum, &entry.previous, std::ptr::null_mut());
    }
}

extern "C" fn on_signal(signum: c_int) {
    if !(1..=MAX_SIGNAL).contains(&signum) {
        return;
    }

    let saved = errno::get();
    let bit = bit(signum);

    for slot in 0..SLOTS {
        let fd = WAKE_FDS[slot].load(Ordering::Acquire);
        if fd >= 0 {
            PENDING[slot].fetch_or(bit, Ordering::AcqRel);
            notify(fd);
        }
    }

    errno::set(saved);
}

/// `errno` save/restore around the handler's `write(2)`.
mod errno {
    use libc::c_int;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn location() -> Option<*mut c_int> {
        Some(unsafe { libc::__errno_location() })
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    fn location() -> Option<*mut c_int> {
        Some(unsafe { libc::__error() })
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    )))]
    fn location() -> Option<*mut c_int> {
        None
    }

    pub(super) fn get() -> c_int {
        location().map(|p| unsafe { *p }).unwrap_or(0)
    }

    pub(super) fn set(value: c_int) {
        if let Some(p) = location() {
            unsafe { *p = value };
        }
    }
}
