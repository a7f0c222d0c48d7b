use super::{Job, ThreadPool};
use crate::error::{Error, Result};
use crate::reactor::poller::unix::sys_getpid;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// The default thread pool: up to `size` OS threads fed by one channel.
///
/// Workers are spawned on demand, one per submitted job while every
/// existing worker is busy, until `size` is reached. They are named
/// `{prefix}-{n}`.
pub struct OsThreadPool {
    size: usize,
    prefix: String,
    state: Mutex<PoolState>,

    /// Workers waiting for a job.
    idle: Arc<AtomicUsize>,

    /// Set by [`kill`](ThreadPool::kill); queued jobs are dropped unrun.
    killed: Arc<AtomicBool>,
}

struct PoolState {
    sender: Option<Sender<Job>>,
    receiver: Option<Receiver<Job>>,
    workers: Vec<JoinHandle<()>>,
    /// Process the workers belong to.
    pid: u32,
}

impl OsThreadPool {
    /// Creates a pool of at most `size` threads. No thread is started
    /// before the first job.
    pub fn new(size: usize, prefix: impl Into<String>) -> Self {
        Self {
            size: size.max(1),
            prefix: prefix.into(),
            state: Mutex::new(PoolState {
                sender: None,
                receiver: None,
                workers: Vec::new(),
                pid: sys_getpid(),
            }),
            idle: Arc::new(AtomicUsize::new(0)),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of worker threads started so far.
    pub fn started(&self) -> usize {
        self.state.lock().workers.len()
    }

    fn spawn_worker(&self, state: &mut PoolState, receiver: Receiver<Job>) -> Result<()> {
        let idle = self.idle.clone();
        let killed = self.killed.clone();
        let name = format!("{}-{}", self.prefix, state.workers.len());

        idle.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(job) = receiver.recv() {
                if killed.load(Ordering::Acquire) {
                    drop(job);
                    continue;
                }
                idle.fetch_sub(1, Ordering::AcqRel);
                let _ = panic::catch_unwind(AssertUnwindSafe(job));
                idle.fetch_add(1, Ordering::AcqRel);
            }
        });

        match spawned {
            Ok(handle) => {
                tracing::debug!(worker = %name, "thread pool worker started");
                state.workers.push(handle);
                Ok(())
            }
            Err(err) => {
                self.idle.fetch_sub(1, Ordering::AcqRel);
                Err(Error::thread_pool(format!("cannot start {name}: {err}")))
            }
        }
    }
}

impl ThreadPool for OsThreadPool {
    fn submit(&self, job: Job) -> Result<()> {
        if self.killed.load(Ordering::Acquire) {
            return Err(Error::thread_pool("the thread pool was killed"));
        }

        let mut state = self.state.lock();

        if state.sender.is_none() {
            let (sender, receiver) = unbounded();
            state.sender = Some(sender);
            state.receiver = Some(receiver);
        }

        if self.idle.load(Ordering::Acquire) == 0 && state.workers.len() < self.size {
            if let Some(receiver) = state.receiver.clone() {
                self.spawn_worker(&mut state, receiver)?;
            }
        }

        match &state.sender {
            Some(sender) => sender
                .send(job)
                .map_err(|_| Error::thread_pool("the thread pool has no worker left")),
            None => Err(Error::thread_pool("the thread pool is closed")),
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::Release);

        let mut state = self.state.lock();
        state.sender = None;
        state.receiver = None;

        // Workers finish their current job, drain the queue and exit.
        state.workers.clear();
    }

    fn on_fork(&self) {
        let mut state = self.state.lock();

        let pid = sys_getpid();
        if pid == state.pid {
            return;
        }

        // The workers only exist in the parent.
        state.workers.clear();
        state.sender = None;
        state.receiver = None;
        state.pid = pid;
        self.idle.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_named_workers() {
        let pool = OsThreadPool::new(2, "test-pool");
        assert_eq!(pool.started(), 0);

        let (tx, rx) = bounded(4);
        for _ in 0..2 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send(name).unwrap();
            }))
            .unwrap();
        }

        for _ in 0..2 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
            assert!(name.starts_with("test-pool-"));
        }
        assert!(pool.started() <= 2);
    }

    #[test]
    fn test_killed_pool_rejects_jobs() {
        let pool = OsThreadPool::new(1, "killed-pool");
        pool.kill();
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(Error::ThreadPool(_))
        ));
    }

    #[test]
    fn test_on_fork_without_fork_keeps_workers() {
        let pool = OsThreadPool::new(1, "fork-pool");
        let (tx, rx) = bounded(1);
        pool.submit(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.on_fork();
        assert_eq!(pool.started(), 1);
    }
}
