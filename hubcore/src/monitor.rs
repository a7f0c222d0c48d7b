//! The watchdog.
//!
//! When [`Config::monitor_thread`] is set, a hub starts a
//! [`PeriodicMonitor`] thread on its first run. The loop publishes its
//! progress through a shared [`Probe`]; the monitor wakes up every
//! `max_blocking_time` and reports a loop that stayed busy on a single
//! callback for longer than that. The hub of the main thread can also
//! sample the process's memory usage against `max_memory_usage`.
//!
//! Reports are logged with `tracing` and handed to the observer installed
//! with [`HubBuilder::monitor_observer`](crate::HubBuilder::monitor_observer).

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reactor::poller::unix::sys_getpid;

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Callback receiving watchdog reports, on the watchdog thread.
pub type MonitorObserver = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

/// A watchdog report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The loop did not make progress for longer than `max_blocking_time`.
    LoopBlocked(BlockedReport),
    /// Memory usage crossed `max_memory_usage` upwards.
    MemoryThresholdExceeded { usage: u64, max: u64 },
    /// Memory usage went back under `max_memory_usage`.
    MemoryUnderThreshold { usage: u64, max: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedReport {
    /// Ident of the blocked hub.
    pub hub: u64,
    /// How long the loop had been stuck when the report was made.
    pub blocked_for: Duration,
    pub max_blocking_time: Duration,
}

/// Progress counters shared between a hub's loop and its watchdog.
#[derive(Debug, Default)]
pub(crate) struct Probe {
    /// Bumped for every dispatched callback and every poll.
    ticks: AtomicU64,
    in_poll: AtomicBool,
    running: AtomicBool,
}

impl Probe {
    pub(crate) fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_poll(&self) {
        self.in_poll.store(true, Ordering::Release);
    }

    pub(crate) fn leave_poll(&self) {
        self.in_poll.store(false, Ordering::Release);
        self.tick();
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
        self.tick();
    }

    /// Current tick count, and whether the loop is executing callbacks
    /// (running and not waiting in the poller).
    fn snapshot(&self) -> (u64, bool) {
        let busy =
            self.running.load(Ordering::Acquire) && !self.in_poll.load(Ordering::Acquire);
        (self.ticks.load(Ordering::Relaxed), busy)
    }
}

#[derive(Clone)]
struct Settings {
    hub: u64,
    max_blocking_time: Duration,
    memory_period: Duration,
    max_memory_usage: Option<u64>,
    probe: Arc<Probe>,
    observer: Option<MonitorObserver>,
}

struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// The watchdog thread of one hub.
pub(crate) struct PeriodicMonitor {
    settings: Settings,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    pid: u32,
}

impl PeriodicMonitor {
    /// Starts the watchdog of hub `hub`. Memory is only sampled for the
    /// main thread's hub.
    pub(crate) fn start(
        hub: u64,
        config: &Config,
        probe: Arc<Probe>,
        observer: Option<MonitorObserver>,
        main_thread: bool,
    ) -> Result<Self> {
        let settings = Settings {
            hub,
            max_blocking_time: config.max_blocking_time,
            memory_period: config.memory_monitor_period,
            max_memory_usage: config.max_memory_usage.filter(|_| main_thread),
            probe,
            observer,
        };

        let mut monitor = Self {
            settings,
            shared: Arc::new(Shared {
                stopped: Mutex::new(false),
                wake: Condvar::new(),
            }),
            handle: None,
            pid: sys_getpid(),
        };
        monitor.spawn()?;

        Ok(monitor)
    }

    fn spawn(&mut self) -> Result<()> {
        let settings = self.settings.clone();
        let shared = self.shared.clone();

        let handle = thread::Builder::new()
            .name(format!("hubcore-monitor-{}", settings.hub))
            .spawn(move || run(settings, shared))
            .map_err(|err| Error::other(format!("cannot start the monitor thread: {err}")))?;

        tracing::debug!(hub = self.settings.hub, "monitor thread started");
        self.handle = Some(handle);
        Ok(())
    }

    /// Stops the thread and waits for it.
    pub(crate) fn kill(&mut self) {
        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Restarts the thread in a forked child, where it does not exist.
    pub(crate) fn on_fork(&mut self) -> Result<()> {
        let pid = sys_getpid();
        if pid == self.pid {
            return Ok(());
        }

        self.pid = pid;
        self.handle = None;
        self.shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        self.spawn()
    }
}

impl Drop for PeriodicMonitor {
    fn drop(&mut self) {
        self.kill();
    }
}

fn run(settings: Settings, shared: Arc<Shared>) {
    let interval = settings.max_blocking_time;

    let (mut last_ticks, _) = settings.probe.snapshot();
    let mut since = Instant::now();
    let mut reported = None;

    let mut next_memory_check = Instant::now();
    let mut over_memory = false;

    loop {
        {
            let mut stopped = shared.stopped.lock();
            if *stopped {
                break;
            }
            shared.wake.wait_for(&mut stopped, interval);
            if *stopped {
                break;
            }
        }

        let now = Instant::now();
        let (ticks, busy) = settings.probe.snapshot();

        if ticks != last_ticks || !busy {
            last_ticks = ticks;
            since = now;
        } else if now.duration_since(since) >= settings.max_blocking_time
            && reported != Some(ticks)
        {
            reported = Some(ticks);
            let report = BlockedReport {
                hub: settings.hub,
                blocked_for: now.duration_since(since),
                max_blocking_time: settings.max_blocking_time,
            };
            tracing::warn!(
                hub = report.hub,
                blocked_for = ?report.blocked_for,
                max_blocking_time = ?report.max_blocking_time,
                "hub loop blocked"
            );
            notify(&settings, MonitorEvent::LoopBlocked(report));
        }

        if let Some(max) = settings.max_memory_usage {
            if now >= next_memory_check {
                next_memory_check = now + settings.memory_period;
                if let Some(usage) = memory_usage() {
                    check_memory(&settings, usage, max, &mut over_memory);
                }
            }
        }
    }

    tracing::debug!(hub = settings.hub, "monitor thread stopped");
}

fn check_memory(settings: &Settings, usage: u64, max: u64, over: &mut bool) {
    if usage > max && !*over {
        *over = true;
        tracing::warn!(usage, max, "memory usage above threshold");
        notify(settings, MonitorEvent::MemoryThresholdExceeded { usage, max });
    } else if usage <= max && *over {
        *over = false;
        tracing::info!(usage, max, "memory usage back under threshold");
        notify(settings, MonitorEvent::MemoryUnderThreshold { usage, max });
    }
}

fn notify(settings: &Settings, event: MonitorEvent) {
    if let Some(observer) = &settings.observer {
        observer(&event);
    }
}

/// Resident memory of the process, in bytes.
#[cfg(target_os = "linux")]
fn memory_usage() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 {
        return None;
    }
    Some(resident * page as u64)
}

/// Peak resident memory of the process, in bytes.
#[cfg(not(target_os = "linux"))]
fn memory_usage() -> Option<u64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } != 0 {
        return None;
    }
    // bytes on macOS, kilobytes elsewhere
    let maxrss = usage.ru_maxrss as u64;
    if cfg!(target_os = "macos") {
        Some(maxrss)
    } else {
        Some(maxrss * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_busy_only_outside_poll() {
        let probe = Probe::default();
        assert!(!probe.snapshot().1);

        probe.set_running(true);
        assert!(probe.snapshot().1);

        probe.enter_poll();
        assert!(!probe.snapshot().1);

        let (before, _) = probe.snapshot();
        probe.leave_poll();
        assert!(probe.snapshot().0 > before);
    }

    #[test]
    fn test_memory_threshold_reported_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let settings = Settings {
            hub: 1,
            max_blocking_time: Duration::from_millis(100),
            memory_period: Duration::from_secs(1),
            max_memory_usage: Some(100),
            probe: Arc::new(Probe::default()),
            observer: Some(Arc::new(move |e: &MonitorEvent| sink.lock().push(e.clone()))),
        };

        let mut over = false;
        check_memory(&settings, 150, 100, &mut over);
        check_memory(&settings, 200, 100, &mut over);
        check_memory(&settings, 50, 100, &mut over);

        assert_eq!(
            *events.lock(),
            vec![
                MonitorEvent::MemoryThresholdExceeded { usage: 150, max: 100 },
                MonitorEvent::MemoryUnderThreshold { usage: 50, max: 100 },
            ]
        );
    }

    #[test]
    fn test_memory_usage_is_sampled() {
        assert!(memory_usage().is_some_and(|usage| usage > 0));
    }
}
