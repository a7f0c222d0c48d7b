use hubcore::config::ResolverKind;
use hubcore::threadpool::{Job, ThreadPool};
use hubcore::{Config, Error, HubBuilder, spawn};
use std::cell::Cell;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// A pool refusing to run anything: it drops every job it receives.
#[derive(Default)]
struct DroppingPool {
    submitted: Cell<usize>,
}

impl ThreadPool for DroppingPool {
    fn submit(&self, job: Job) -> hubcore::Result<()> {
        self.submitted.set(self.submitted.get() + 1);
        drop(job);
        Ok(())
    }

    fn size(&self) -> usize {
        1
    }

    fn kill(&self) {}

    fn on_fork(&self) {}
}

#[hubcore::test]
async fn test_apply_runs_on_a_worker_thread() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;
    let hub_thread = thread::current().id();

    let (worker, name) = hub
        .apply(|| {
            let current = thread::current();
            (current.id(), current.name().map(str::to_owned))
        })?
        .await?;

    assert_ne!(worker, hub_thread);
    assert!(name.is_some_and(|name| name.starts_with("hubcore-pool-")));
    Ok(())
}

#[hubcore::test]
async fn test_apply_keeps_loop_alive() -> hubcore::Result<()> {
    let start = Instant::now();

    let value = hubcore::threadpool::apply(|| {
        thread::sleep(Duration::from_millis(50));
        7
    })?
    .await?;

    assert_eq!(value, 7);
    assert!(start.elapsed() >= Duration::from_millis(50));
    Ok(())
}

#[hubcore::test]
async fn test_apply_does_not_block_other_tasks() -> hubcore::Result<()> {
    let hub = hubcore::get_hub()?;
    let job = hub.apply(|| {
        thread::sleep(Duration::from_millis(100));
        "slow"
    })?;

    let ticker = spawn(async {
        let mut ticks = 0;
        for _ in 0..5 {
            hubcore::sleep(Duration::from_millis(5)).await?;
            ticks += 1;
        }
        Ok(ticks)
    })?;

    assert_eq!(ticker.await?, 5);
    assert_eq!(job.await?, "slow");
    Ok(())
}

#[hubcore::test]
async fn test_apply_panic_becomes_error() -> hubcore::Result<()> {
    let result = hubcore::threadpool::apply(|| {
        if true {
            panic!("worker exploded");
        }
    })?
    .await;

    assert!(matches!(result, Err(Error::Panicked(msg)) if msg.contains("worker exploded")));
    Ok(())
}

#[test]
fn test_dropped_job_fails_the_apply() {
    let pool = Rc::new(DroppingPool::default());
    let hub = HubBuilder::new()
        .threadpool(pool.clone())
        .build()
        .expect("hub");

    let inner = hub.clone();
    let result = hub.block_on(async move { inner.apply(|| 1)?.await });

    assert!(matches!(result, Err(Error::ThreadPool(_))));
    assert_eq!(pool.submitted.get(), 1);
    hub.destroy(Some(true));
}

#[test]
fn test_threadpool_is_created_lazily_and_replaceable() {
    let hub = HubBuilder::new().threadpool_size(3).build().expect("hub");

    let pool = hub.threadpool().expect("pool");
    assert_eq!(pool.size(), 3);
    assert!(Rc::ptr_eq(&pool, &hub.threadpool().expect("same pool")));

    let replacement: Rc<dyn ThreadPool> = Rc::new(DroppingPool::default());
    let previous = hub.set_threadpool(replacement.clone()).expect("previous");
    assert!(Rc::ptr_eq(&previous, &pool));
    assert!(Rc::ptr_eq(&hub.threadpool().expect("replacement"), &replacement));

    hub.clear_threadpool();
    let fresh = hub.threadpool().expect("fresh pool");
    assert!(!Rc::ptr_eq(&fresh, &replacement));
    assert_eq!(fresh.size(), 3);

    hub.destroy(Some(true));
    assert!(matches!(hub.threadpool(), Err(Error::HubDestroyed)));
}

#[hubcore::test]
async fn test_thread_resolver_resolves_numeric_host() -> hubcore::Result<()> {
    let addrs = hubcore::resolver::resolve("127.0.0.1", 8080).await?;

    assert!(
        addrs
            .iter()
            .any(|addr| addr.ip() == IpAddr::V4(Ipv4Addr::LOCALHOST) && addr.port() == 8080)
    );
    Ok(())
}

#[test]
fn test_blocking_resolver_from_config() {
    let config = Config::builder()
        .resolver(ResolverKind::Blocking)
        .build()
        .expect("config");
    let hub = HubBuilder::new().config(config).build().expect("hub");

    let inner = hub.clone();
    let addrs = hub
        .block_on(async move { hubcore::resolver::resolve("127.0.0.1", 53).await })
        .expect("resolve");
    assert_eq!(addrs[0].port(), 53);

    hub.set_resolver(Rc::new(hubcore::resolver::ThreadResolver::new()));
    let addrs = hub
        .block_on(async move {
            let resolver = inner.resolver()?;
            resolver.resolve(&inner, "127.0.0.1", 54).await
        })
        .expect("resolve on pool");
    assert_eq!(addrs[0].port(), 54);
    hub.destroy(Some(true));
}
