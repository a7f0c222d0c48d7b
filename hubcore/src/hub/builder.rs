use super::Hub;
use super::context;
use super::core::HubParts;
use crate::config::Config;
use crate::error::Result;
use crate::monitor::MonitorEvent;
use crate::resolver::Resolver;
use crate::threadpool::ThreadPool;

use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a hub.
///
/// `HubBuilder` layers pluggable backends (thread pool, resolver), a
/// watchdog observer and the exception stream on top of a [`Config`].
///
/// # Examples
///
/// ```rust,ignore
/// let hub = HubBuilder::new()
///     .threadpool_size(4)
///     .monitor_thread(true)
///     .build()?;
/// ```
pub struct HubBuilder {
    config: Config,
    parts: HubParts,
}

impl HubBuilder {
    /// Creates a new `HubBuilder` with the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            parts: HubParts::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Starts the watchdog thread on the first run of the hub.
    pub fn monitor_thread(mut self, enabled: bool) -> Self {
        self.config.monitor_thread = enabled;
        self
    }

    /// How long a callback may hold the loop before the watchdog reports
    /// it.
    pub fn max_blocking_time(mut self, duration: Duration) -> Self {
        self.config.max_blocking_time = duration;
        self
    }

    /// Number of worker threads of the default thread pool.
    ///
    /// Validated by [`build`](HubBuilder::build): zero is rejected.
    pub fn threadpool_size(mut self, n: usize) -> Self {
        self.config.threadpool_size = n;
        self
    }

    pub fn track_task_tree(mut self, enabled: bool) -> Self {
        self.config.track_task_tree = enabled;
        self
    }

    /// Uses `pool` instead of creating the default thread pool lazily.
    pub fn threadpool(mut self, pool: Rc<dyn ThreadPool>) -> Self {
        self.parts.threadpool = Some(pool);
        self
    }

    /// Uses `resolver` instead of creating the configured one lazily.
    pub fn resolver(mut self, resolver: Rc<dyn Resolver>) -> Self {
        self.parts.resolver = Some(resolver);
        self
    }

    /// Receives every watchdog report, on the watchdog thread.
    pub fn monitor_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        self.parts.observer = Some(Arc::new(observer));
        self
    }

    /// Where printed errors go; `None` silences them. Defaults to stderr.
    pub fn exception_stream(mut self, stream: Option<Box<dyn Write>>) -> Self {
        self.parts.exception_stream = stream;
        self
    }

    /// Builds the hub with the configured options.
    ///
    /// The hub is not installed as the current thread's hub.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for an invalid
    /// configuration or the OS error of creating the event loop.
    pub fn build(self) -> Result<Hub> {
        Hub::with_parts(self.config, self.parts)
    }

    /// Builds the hub and installs it as the current thread's hub.
    pub fn install(self) -> Result<Hub> {
        let hub = self.build()?;
        context::set_hub(Some(hub.clone()));
        Ok(hub)
    }
}

impl Default for HubBuilder {
    /// Creates a default `HubBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
