//! Hub configuration.
//!
//! [`Config`] holds the settings a hub reads at construction. Defaults can be
//! overridden programmatically through [`ConfigBuilder`] or from the process
//! environment with [`Config::from_env`].

use crate::error::{Error, Result};

use std::time::Duration;

/// Which resolver implementation a hub creates on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverKind {
    /// Resolve names on the hub's thread pool.
    #[default]
    Thread,
    /// Resolve names inline, blocking the hub.
    Blocking,
}

/// Settings of a single hub.
#[derive(Debug, Clone)]
pub struct Config {
    /// Record the spawning task and share tree locals between a task and the
    /// tasks it spawns.
    pub track_task_tree: bool,
    /// Start the watchdog thread on the first run of the hub.
    pub monitor_thread: bool,
    /// How long a single callback may hold the loop before the watchdog
    /// reports it.
    pub max_blocking_time: Duration,
    /// How often the watchdog samples memory usage.
    pub memory_monitor_period: Duration,
    /// Memory usage, in bytes, above which the watchdog reports. Only the
    /// hub of the main thread samples memory.
    pub max_memory_usage: Option<u64>,
    /// Number of worker threads of the default thread pool.
    pub threadpool_size: usize,
    /// Resolver created on first use.
    pub resolver: ResolverKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            track_task_tree: true,
            monitor_thread: false,
            max_blocking_time: Duration::from_millis(100),
            memory_monitor_period: Duration::from_secs(5),
            max_memory_usage: None,
            threadpool_size: 10,
            resolver: ResolverKind::Thread,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Builds a configuration from the `HUBCORE_*` environment variables,
    /// falling back to the defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is set to an unparsable or
    /// invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("HUBCORE_TRACK_TASK_TREE") {
            config.track_task_tree = parse_bool("HUBCORE_TRACK_TASK_TREE", &v)?;
        }
        if let Some(v) = lookup("HUBCORE_MONITOR_THREAD") {
            config.monitor_thread = parse_bool("HUBCORE_MONITOR_THREAD", &v)?;
        }
        if let Some(v) = lookup("HUBCORE_MAX_BLOCKING_TIME") {
            config.max_blocking_time = parse_seconds("HUBCORE_MAX_BLOCKING_TIME", &v)?;
        }
        if let Some(v) = lookup("HUBCORE_MEMORY_MONITOR_PERIOD") {
            config.memory_monitor_period = parse_seconds("HUBCORE_MEMORY_MONITOR_PERIOD", &v)?;
        }
        if let Some(v) = lookup("HUBCORE_MAX_MEMORY_USAGE") {
            let bytes = v.trim().parse::<u64>().map_err(|_| {
                Error::config(format!("HUBCORE_MAX_MEMORY_USAGE: invalid byte count {v:?}"))
            })?;
            config.max_memory_usage = Some(bytes);
        }
        if let Some(v) = lookup("HUBCORE_THREADPOOL_SIZE") {
            config.threadpool_size = v.trim().parse::<usize>().map_err(|_| {
                Error::config(format!("HUBCORE_THREADPOOL_SIZE: invalid size {v:?}"))
            })?;
        }
        if let Some(v) = lookup("HUBCORE_RESOLVER") {
            config.resolver = match v.trim() {
                "thread" => ResolverKind::Thread,
                "block" | "blocking" => ResolverKind::Blocking,
                other => {
                    return Err(Error::config(format!(
                        "HUBCORE_RESOLVER: unknown resolver {other:?}"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threadpool_size == 0 {
            return Err(Error::config("threadpool_size must be > 0"));
        }
        if self.threadpool_size > 1024 {
            return Err(Error::config("threadpool_size too large (max 1024)"));
        }
        if self.max_blocking_time.is_zero() {
            return Err(Error::config("max_blocking_time must be > 0"));
        }
        if self.memory_monitor_period.is_zero() {
            return Err(Error::config("memory_monitor_period must be > 0"));
        }
        if self.max_memory_usage == Some(0) {
            return Err(Error::config("max_memory_usage must be > 0"));
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::config(format!("{key}: expected a boolean, got {value:?}"))),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    let secs = value
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::config(format!("{key}: expected seconds, got {value:?}")))?;

    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::config(format!("{key}: {secs} is not a valid duration")))
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn track_task_tree(mut self, enable: bool) -> Self {
        self.config.track_task_tree = enable;
        self
    }

    pub fn monitor_thread(mut self, enable: bool) -> Self {
        self.config.monitor_thread = enable;
        self
    }

    pub fn max_blocking_time(mut self, duration: Duration) -> Self {
        self.config.max_blocking_time = duration;
        self
    }

    pub fn memory_monitor_period(mut self, period: Duration) -> Self {
        self.config.memory_monitor_period = period;
        self
    }

    pub fn max_memory_usage(mut self, bytes: u64) -> Self {
        self.config.max_memory_usage = Some(bytes);
        self
    }

    pub fn threadpool_size(mut self, n: usize) -> Self {
        self.config.threadpool_size = n;
        self
    }

    pub fn resolver(mut self, kind: ResolverKind) -> Self {
        self.config.resolver = kind;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.track_task_tree);
        assert!(!config.monitor_thread);
        assert_eq!(config.threadpool_size, 10);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("HUBCORE_MONITOR_THREAD", "true"),
            ("HUBCORE_MAX_BLOCKING_TIME", "0.25"),
            ("HUBCORE_THREADPOOL_SIZE", "3"),
            ("HUBCORE_MAX_MEMORY_USAGE", "1048576"),
            ("HUBCORE_RESOLVER", "block"),
        ]))
        .unwrap();

        assert!(config.monitor_thread);
        assert_eq!(config.max_blocking_time, Duration::from_millis(250));
        assert_eq!(config.threadpool_size, 3);
        assert_eq!(config.max_memory_usage, Some(1_048_576));
        assert_eq!(config.resolver, ResolverKind::Blocking);
    }

    #[test]
    fn test_env_rejects_garbage() {
        assert!(Config::from_lookup(lookup(&[("HUBCORE_MONITOR_THREAD", "maybe")])).is_err());
        assert!(Config::from_lookup(lookup(&[("HUBCORE_THREADPOOL_SIZE", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("HUBCORE_MAX_BLOCKING_TIME", "-1")])).is_err());
        assert!(Config::from_lookup(lookup(&[("HUBCORE_RESOLVER", "ares")])).is_err());
    }

    #[test]
    fn test_builder_validates() {
        assert!(Config::builder().threadpool_size(0).build().is_err());
        assert!(Config::builder().max_blocking_time(Duration::ZERO).build().is_err());

        let config = Config::builder()
            .track_task_tree(false)
            .threadpool_size(2)
            .build()
            .unwrap();
        assert!(!config.track_task_tree);
        assert_eq!(config.threadpool_size, 2);
    }
}
