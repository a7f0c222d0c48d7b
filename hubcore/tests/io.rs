#![cfg(unix)]

use hubcore::{Error, HubBuilder, sleep, spawn, wait_readable, wait_writable, with_timeout};
use std::os::fd::RawFd;
use std::thread;
use std::time::Duration;

struct Pipe {
    read: RawFd,
    write: RawFd,
}

impl Pipe {
    fn new() -> Self {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");
        for fd in fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        Self {
            read: fds[0],
            write: fds[1],
        }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

fn write_byte(fd: RawFd, byte: u8) {
    let n = unsafe { libc::write(fd, [byte].as_ptr().cast(), 1) };
    assert_eq!(n, 1, "write failed");
}

fn read_byte(fd: RawFd) -> Option<u8> {
    let mut buf = [0u8; 1];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), 1) };
    (n == 1).then_some(buf[0])
}

#[hubcore::test]
async fn test_wait_readable_wakes_on_data() -> hubcore::Result<()> {
    let pipe = Pipe::new();
    let (read, write) = (pipe.read, pipe.write);

    assert_eq!(read_byte(read), None);

    spawn(async move {
        sleep(Duration::from_millis(10)).await?;
        write_byte(write, 42);
        Ok(())
    })?;

    with_timeout(Duration::from_secs(2), wait_readable(read)).await?;
    assert_eq!(read_byte(read), Some(42));

    let hub = hubcore::get_hub()?;
    assert_eq!(hub.stats().io_watchers, 0);
    Ok(())
}

#[hubcore::test]
async fn test_empty_pipe_is_writable() -> hubcore::Result<()> {
    let pipe = Pipe::new();
    with_timeout(Duration::from_secs(2), wait_writable(pipe.write)).await?;
    Ok(())
}

#[hubcore::test]
async fn test_second_reader_is_rejected() -> hubcore::Result<()> {
    let pipe = Pipe::new();
    let read = pipe.read;

    let first = spawn(async move { wait_readable(read).await })?;
    sleep(Duration::ZERO).await?;

    let second = wait_readable(read).await;
    assert!(matches!(second, Err(Error::ConcurrentObjectUse(_))));

    first.cancel();
    assert!(matches!(first.await, Err(Error::Cancelled)));
    Ok(())
}

#[hubcore::test]
async fn test_wait_times_out_and_releases_watcher() -> hubcore::Result<()> {
    let pipe = Pipe::new();
    let hub = hubcore::get_hub()?;

    let result = with_timeout(Duration::from_millis(10), wait_readable(pipe.read)).await;
    assert!(matches!(result, Err(Error::Timeout)));
    assert_eq!(hub.stats().io_watchers, 0);
    Ok(())
}

#[test]
fn test_watcher_keeps_loop_alive_for_other_thread() {
    let pipe = Pipe::new();
    let (read, write) = (pipe.read, pipe.write);
    let hub = HubBuilder::new().build().expect("hub");

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        write_byte(write, 7);
    });

    let byte = hub
        .block_on(async move {
            wait_readable(read).await?;
            Ok(read_byte(read))
        })
        .expect("run");

    writer.join().expect("writer thread");
    assert_eq!(byte, Some(7));
    hub.destroy(Some(true));
}
