use hubcore::{Error, Hub, HubBuilder, sleep, spawn};
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Exception stream capturing everything the hub prints.
#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Sink {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn hub_with_sink() -> (Hub, Sink) {
    let sink = Sink::default();
    let hub = HubBuilder::new()
        .exception_stream(Some(Box::new(sink.clone())))
        .build()
        .expect("hub");
    (hub, sink)
}

#[test]
fn test_join_returns_true_when_idle() {
    let hub = HubBuilder::new().build().expect("hub");
    let handle = hub
        .spawn(async {
            sleep(Duration::from_millis(10)).await?;
            Ok(())
        })
        .expect("spawn");

    assert!(hub.join(None).expect("join"));
    assert!(handle.is_successful());
    assert!(hub.join(None).expect("join again"));
    hub.destroy(Some(true));
}

#[test]
fn test_block_on_returns_the_value() {
    let hub = HubBuilder::new().build().expect("hub");

    assert_eq!(hub.block_on(async { Ok(1) }).expect("ready value"), 1);

    let value = hub
        .block_on(async {
            let child = spawn(async { Ok("child") })?;
            child.await
        })
        .expect("value after the last iteration");
    assert_eq!(value, "child");
    hub.destroy(Some(true));
}

#[test]
fn test_block_on_does_not_wait_for_other_timers() {
    let hub = HubBuilder::new().build().expect("hub");

    let start = Instant::now();
    let value = hub
        .block_on(async {
            spawn(async {
                sleep(Duration::from_secs(10)).await?;
                Ok(())
            })?;
            sleep(Duration::from_millis(10)).await?;
            Ok(1)
        })
        .expect("run");

    assert_eq!(value, 1);
    assert!(start.elapsed() < Duration::from_secs(1));
    hub.destroy(Some(true));
}

#[test]
fn test_join_timeout_releases_its_timer() {
    let hub = HubBuilder::new().build().expect("hub");
    let handle = hub
        .spawn(async {
            sleep(Duration::from_secs(10)).await?;
            Ok(())
        })
        .expect("spawn");

    let start = Instant::now();
    assert!(!hub.join(Some(Duration::from_millis(20))).expect("join"));
    assert!(start.elapsed() < Duration::from_secs(1));

    let stats = hub.stats();
    assert_eq!(stats.active_timers, 1);
    assert_eq!(stats.referenced_timers, 1);
    assert!(!handle.is_ready());
    hub.destroy(Some(true));
}

#[test]
fn test_join_from_task_is_rejected() {
    let hub = HubBuilder::new().build().expect("hub");
    let inner = hub.clone();

    let result = hub.block_on(async move { Ok(inner.join(None)) }).expect("run");
    assert!(matches!(result, Err(Error::BlockingSwitchOut(_))));
    hub.destroy(Some(true));
}

#[test]
fn test_destroy_fails_pending_tasks() {
    let hub = HubBuilder::new().build().expect("hub");
    let handle = hub
        .spawn(async {
            sleep(Duration::from_secs(10)).await?;
            Ok(())
        })
        .expect("spawn");
    assert!(!hub.join(Some(Duration::from_millis(5))).expect("join"));

    hub.destroy(Some(true));
    assert!(hub.is_destroyed());
    assert!(matches!(handle.exception(), Some(Error::HubDestroyed)));
    assert_eq!(hub.live_tasks(), 0);

    assert!(matches!(hub.spawn(async { Ok(()) }), Err(Error::HubDestroyed)));
    assert!(matches!(hub.join(None), Err(Error::HubDestroyed)));

    hub.destroy(None);
}

#[test]
fn test_destroy_from_task_stops_the_run() {
    let hub = HubBuilder::new().build().expect("hub");
    let inner = hub.clone();

    let result = hub.block_on(async move {
        inner.destroy(Some(true));
        sleep(Duration::from_secs(10)).await
    });

    assert!(matches!(result, Err(Error::HubDestroyed)));
    assert!(hub.is_destroyed());
    assert!(!hub.is_running());
}

#[test]
fn test_destroyed_current_hub_is_replaced() {
    let hub = HubBuilder::new().install().expect("hub");
    let current = hubcore::get_hub().expect("current");
    assert!(current.ptr_eq(&hub));

    hub.destroy(None);
    assert!(hubcore::get_hub_if_exists().is_none());

    let fresh = hubcore::get_hub().expect("fresh");
    assert!(!fresh.ptr_eq(&hub));
    assert!(fresh.minimal_ident() > hub.minimal_ident());

    hubcore::set_hub(None);
    fresh.destroy(Some(true));
}

#[test]
fn test_reinit_twice_keeps_hub_usable() {
    let hub = HubBuilder::new().build().expect("hub");

    hub.reinit().expect("first reinit");
    hub.reinit().expect("second reinit");
    hubcore::reinit(Some(&hub)).expect("third reinit");

    let value = hub
        .block_on(async {
            sleep(Duration::from_millis(1)).await?;
            Ok(5)
        })
        .expect("run");
    assert_eq!(value, 5);
    hub.destroy(Some(true));
}

#[test]
fn test_reinit_without_hub_is_noop() {
    assert!(hubcore::get_hub_if_exists().is_none());
    assert!(hubcore::reinit(None).is_ok());
    assert!(hubcore::get_hub_if_exists().is_none());
}

#[test]
fn test_callbacks_run_in_order() {
    let hub = HubBuilder::new().build().expect("hub");
    let order = Rc::new(RefCell::new(Vec::new()));

    for i in 0..5 {
        let order = order.clone();
        hub.run_callback(move || {
            order.borrow_mut().push(i);
            Ok(())
        })
        .expect("callback");
    }

    assert!(hub.join(None).expect("join"));
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    hub.destroy(Some(true));
}

#[test]
fn test_callback_error_is_printed() {
    let (hub, sink) = hub_with_sink();

    hub.run_callback(|| Err(Error::other("bad input")))
        .expect("callback");
    hub.run_callback(|| {
        if true {
            panic!("callback exploded");
        }
        Ok(())
    })
    .expect("callback");

    assert!(hub.join(None).expect("join"));

    let printed = sink.contents();
    assert!(printed.contains("callback failed with bad input"));
    assert!(printed.contains("callback exploded"));
    hub.destroy(Some(true));
}

#[test]
fn test_system_exit_stops_the_loop_silently() {
    let (hub, sink) = hub_with_sink();
    let handle = hub
        .spawn(async {
            sleep(Duration::from_secs(10)).await?;
            Ok(())
        })
        .expect("spawn");

    hub.run_callback(|| Err(Error::SystemExit(3)))
        .expect("callback");

    let start = Instant::now();
    assert!(matches!(hub.join(None), Err(Error::SystemExit(3))));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(sink.contents().is_empty());

    assert!(!handle.is_ready());
    hub.destroy(Some(true));
}

#[test]
fn test_task_system_error_reaches_root() {
    let (hub, sink) = hub_with_sink();

    let result = hub.block_on(async {
        spawn(async { Err::<(), _>(Error::Interrupted) })?;
        sleep(Duration::from_secs(10)).await
    });

    assert!(matches!(result, Err(Error::Interrupted)));
    assert!(sink.contents().is_empty());
    hub.destroy(Some(true));
}

#[test]
fn test_handle_error_outside_run() {
    let (hub, sink) = hub_with_sink();

    assert!(hub.handle_error(Some("cleanup"), Error::Cancelled).is_ok());
    assert!(sink.contents().is_empty());

    assert!(hub.handle_error(Some("cleanup"), Error::other("disk full")).is_ok());
    assert!(sink.contents().contains("cleanup failed with disk full"));

    let escalated = hub.handle_error(None, Error::other("fatal"));
    assert!(matches!(escalated, Err(Error::Other(msg)) if msg == "fatal"));

    let escalated = hub.handle_error(Some("worker"), Error::Interrupted);
    assert!(matches!(escalated, Err(Error::Interrupted)));
    hub.destroy(Some(true));
}

#[test]
fn test_remote_callback_runs_on_hub_thread() {
    let hub = HubBuilder::new().build().expect("hub");
    let remote = hub.remote();
    let hub_thread = thread::current().id();

    let ran_on = Arc::new(parking_lot::Mutex::new(None));
    let seen = ran_on.clone();

    thread::spawn(move || {
        remote.run_callback_threadsafe(move || {
            *seen.lock() = Some(thread::current().id());
        });
    })
    .join()
    .expect("sender thread");

    assert!(hub.join(None).expect("join"));
    assert_eq!(*ran_on.lock(), Some(hub_thread));
    hub.destroy(Some(true));
}

#[test]
fn test_remote_wakes_sleeping_loop() {
    let hub = HubBuilder::new().build().expect("hub");
    let remote = hub.remote();
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();

    let handle = hub
        .spawn(async {
            sleep(Duration::from_secs(10)).await?;
            Ok(())
        })
        .expect("spawn");

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote.run_callback_threadsafe(move || flag.store(true, Ordering::SeqCst));
        thread::sleep(Duration::from_millis(20));
        remote.request_destroy();
    });

    let start = Instant::now();
    assert!(matches!(hub.join(None), Err(Error::HubDestroyed)));
    assert!(start.elapsed() < Duration::from_secs(1));
    sender.join().expect("sender thread");

    assert!(called.load(Ordering::SeqCst));
    assert!(hub.is_destroyed());
    assert!(matches!(handle.exception(), Some(Error::HubDestroyed)));
}

#[test]
fn test_format_run_info_describes_hub() {
    let hub = HubBuilder::new().build().expect("hub");
    hub.spawn(async { Ok(()) }).expect("spawn");

    let info = hub.format_run_info();
    assert!(!info.is_empty());
    assert!(info[0].contains(&hub.minimal_ident().to_string()));
    assert_eq!(hub.stats().live_tasks, 1);
    hub.destroy(Some(true));
}
