//! Thin `libc` wrappers shared by the unix pollers.

use libc::{F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, c_int, close, fcntl, pipe};
use std::io;
use std::os::fd::RawFd;

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Returns the id of the calling process.
pub(crate) fn sys_getpid() -> u32 {
    unsafe { libc::getpid() as u32 }
}

/// Sets a file descriptor to non-blocking, close-on-exec mode.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn sys_set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFD, FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking, close-on-exec pipe and returns `(read, write)`.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [-1, -1];

    if unsafe { pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }

    for fd in fds {
        if let Err(err) = sys_set_nonblocking_cloexec(fd) {
            sys_close(fds[0]);
            sys_close(fds[1]);
            return Err(err);
        }
    }

    Ok((fds[0], fds[1]))
}
