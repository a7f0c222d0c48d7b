#![cfg(unix)]

use hubcore::{Error, HubBuilder, MultipleWaiter, Waiter, with_timeout};
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

// Every test watches its own signal: handlers are process-wide and the
// tests run in parallel.

#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn raise(signum: i32) {
    let rc = unsafe { libc::raise(signum) };
    assert_eq!(rc, 0, "raise failed");
}

#[hubcore::test]
async fn test_signal_runs_handler_in_a_task() -> hubcore::Result<()> {
    let waiter = MultipleWaiter::new();
    let delivered = waiter.clone();

    let handle = hubcore::signal(libc::SIGUSR1, move || {
        let delivered = delivered.clone();
        async move {
            delivered.switch(hubcore::current_task());
            Ok(())
        }
    })?;
    assert!(handle.is_active());
    assert_eq!(handle.signum(), libc::SIGUSR1);

    raise(libc::SIGUSR1);
    let task = with_timeout(Duration::from_secs(2), waiter.get()).await?;
    assert!(task.is_some(), "the handler must run as a task");

    raise(libc::SIGUSR1);
    with_timeout(Duration::from_secs(2), waiter.get()).await?;

    handle.cancel();
    assert!(!handle.is_active());
    Ok(())
}

#[test]
fn test_signal_handler_error_is_reported() {
    let sink = Sink::default();
    let hub = HubBuilder::new()
        .exception_stream(Some(Box::new(sink.clone())))
        .build()
        .expect("hub");

    let inner = hub.clone();
    let outcome = hub.block_on(async move {
        let done = Waiter::new();
        let notify = done.clone();

        let handle = inner.signal(libc::SIGUSR2, move || {
            let notify = notify.clone();
            async move {
                let _ = notify.switch(());
                Err(Error::other("handler broke"))
            }
        })?;

        raise(libc::SIGUSR2);
        with_timeout(Duration::from_secs(2), done.get()).await?;

        handle.cancel();
        Ok(())
    });

    assert!(outcome.is_ok());
    let printed = String::from_utf8_lossy(&sink.0.borrow()).into_owned();
    assert!(printed.contains("signal handler failed with handler broke"));
    hub.destroy(Some(true));
}

#[hubcore::test]
async fn test_invalid_signals_are_rejected() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;

    for signum in [0, -1, 65, libc::SIGKILL, libc::SIGSTOP] {
        let result = hub.signal(signum, || async { Ok(()) });
        assert!(
            matches!(result, Err(Error::InvalidSignal(n)) if n == signum),
            "signal {signum} should be rejected"
        );
    }

    assert_eq!(hub.stats().signal_watchers, 0);
    Ok(())
}

#[hubcore::test]
async fn test_cancel_is_idempotent() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;

    let handle = hub.signal(libc::SIGWINCH, || async { Ok(()) })?;
    assert_eq!(hub.stats().signal_watchers, 1);

    handle.cancel();
    handle.cancel();
    assert_eq!(hub.stats().signal_watchers, 0);
    assert!(!handle.is_active());
    Ok(())
}

#[hubcore::test]
async fn test_dropped_handle_keeps_handler() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;

    let waiter = MultipleWaiter::new();
    let delivered = waiter.clone();
    drop(hub.signal(libc::SIGURG, move || {
        let delivered = delivered.clone();
        async move {
            delivered.switch(());
            Ok(())
        }
    })?);
    assert_eq!(hub.stats().signal_watchers, 1);

    raise(libc::SIGURG);
    with_timeout(Duration::from_secs(2), waiter.get()).await?;
    Ok(())
}
