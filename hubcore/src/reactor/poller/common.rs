use std::os::fd::RawFd;

/// Readiness directions a descriptor is watched for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

/// Writes one wake-up to `fd`.
///
/// Only calls `write(2)`, so it is safe to use from a signal handler.
/// A full pipe or eventfd already guarantees a pending wake-up, so the
/// result is ignored.
pub(crate) fn notify(fd: RawFd) {
    let buf: u64 = 1;
    unsafe {
        libc::write(fd, &buf as *const u64 as *const libc::c_void, 8);
    }
}

/// Consumes every pending wake-up on a non-blocking `fd`.
pub(crate) fn drain(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Converts an optional poll timeout into milliseconds, rounding up so a
/// timer is never polled for before its deadline.
pub(crate) fn timeout_millis(timeout: Option<std::time::Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
    }
}
