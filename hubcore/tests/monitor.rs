use hubcore::{HubBuilder, MonitorEvent, sleep};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn observed_hub(max_blocking_time: Duration) -> (hubcore::Hub, Arc<Mutex<Vec<MonitorEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let hub = HubBuilder::new()
        .monitor_thread(true)
        .max_blocking_time(max_blocking_time)
        .monitor_observer(move |event| sink.lock().push(event.clone()))
        .build()
        .expect("hub");

    (hub, events)
}

#[test]
fn test_blocked_loop_is_reported() {
    let (hub, events) = observed_hub(Duration::from_millis(50));

    hub.block_on(async {
        thread::sleep(Duration::from_millis(400));
        Ok(())
    })
    .expect("run");
    hub.destroy(Some(true));

    let events = events.lock();
    let report = events
        .iter()
        .find_map(|event| match event {
            MonitorEvent::LoopBlocked(report) => Some(report.clone()),
            _ => None,
        })
        .expect("a blocked loop report");

    assert_eq!(report.hub, hub.minimal_ident());
    assert_eq!(report.max_blocking_time, Duration::from_millis(50));
    assert!(report.blocked_for >= Duration::from_millis(50));
}

#[test]
fn test_waiting_loop_is_not_reported() {
    let (hub, events) = observed_hub(Duration::from_millis(30));

    hub.block_on(async {
        for _ in 0..10 {
            sleep(Duration::from_millis(20)).await?;
        }
        Ok(())
    })
    .expect("run");
    hub.destroy(Some(true));

    assert!(
        !events
            .lock()
            .iter()
            .any(|event| matches!(event, MonitorEvent::LoopBlocked(_)))
    );
}
