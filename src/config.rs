use std::{net::SocketAddr, time::Duration};

use crate::error::{Error, Result};

pub const DEFAULT_PROCESSORS: usize = 4;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of processors to run when none is configured.
pub fn default_processors() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_PROCESSORS)
}

/// Policy used to pick the processor that will own a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    /// Cycle through the processors in order.
    #[default]
    RoundRobin,
    /// Pick the processor currently owning the fewest sessions, lowest index first.
    LeastSessions,
}

/// Configuration for an [`EventGroup`](crate::EventGroup).
///
/// Controls the size of the processor pool, per-session buffering limits and
/// the timing of the select loop. Use [`GroupConfig::builder()`] for ergonomic
/// construction.
///
/// ## Buffering
///
/// - read_chunk_size: upper bound of a single read per readiness notification
/// - max_buffer_size: receive buffer limit; a session whose undecoded bytes
///   exceed it is closed with a decode error
///
/// ## Timing
///
/// - poll_interval: how long a processor blocks in the selector before it
///   re-checks idle sessions and shutdown deadlines
/// - shutdown_timeout: drain budget used when the group is dropped while running
/// - idle_timeout: sessions without traffic for this long are closed
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Number of event processors (threads)
    pub processors: usize,
    /// Maximum number of bytes read per readiness notification
    pub read_chunk_size: usize,
    /// Maximum number of undecoded bytes held for one session
    pub max_buffer_size: usize,
    /// Selector events drained per poll
    pub events_capacity: usize,
    /// Upper bound on a single selector wait
    pub poll_interval: Duration,
    /// Drain budget applied when the group is dropped
    pub shutdown_timeout: Duration,
    /// Close sessions idle for longer than this
    pub idle_timeout: Option<Duration>,
    /// How long a blocking `connect` waits for establishment
    pub connect_timeout: Duration,
    /// Cap on live sessions, inbound and outbound. Only accepting is refused
    /// at the cap; outbound `connect` is never limited.
    pub max_sessions: Option<usize>,
    /// Enable TCP_NODELAY
    pub no_delay: bool,
    /// Processor selection policy for new sessions
    pub distribution: Distribution,
    /// Addresses bound when the group starts
    pub bind: Vec<SocketAddr>,
    /// Addresses connected to when the group starts
    pub connect: Vec<SocketAddr>,
}

impl GroupConfig {
    /// Create a new builder for GroupConfig
    pub fn builder() -> GroupConfigBuilder {
        GroupConfigBuilder::new()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.processors == 0 {
            return Err(Error::Configuration(
                "at least one processor is required".into(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::Configuration(
                "read_chunk_size must be greater than zero".into(),
            ));
        }
        if self.max_buffer_size < self.read_chunk_size {
            return Err(Error::Configuration(format!(
                "max_buffer_size ({}) is smaller than read_chunk_size ({})",
                self.max_buffer_size, self.read_chunk_size
            )));
        }
        if self.events_capacity == 0 {
            return Err(Error::Configuration(
                "events_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            processors: default_processors(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            idle_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_sessions: None,
            no_delay: true,
            distribution: Distribution::RoundRobin,
            bind: Vec::new(),
            connect: Vec::new(),
        }
    }
}

/// Builder for GroupConfig.
///
/// All fields are optional and fall back to GroupConfig::default()
/// if not explicitly set.
#[derive(Debug, Default)]
pub struct GroupConfigBuilder {
    processors: Option<usize>,
    read_chunk_size: Option<usize>,
    max_buffer_size: Option<usize>,
    events_capacity: Option<usize>,
    poll_interval: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    idle_timeout: Option<Option<Duration>>,
    connect_timeout: Option<Duration>,
    max_sessions: Option<usize>,
    no_delay: Option<bool>,
    distribution: Option<Distribution>,
    bind: Vec<SocketAddr>,
    connect: Vec<SocketAddr>,
}

impl GroupConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processors(mut self, count: usize) -> Self {
        self.processors = Some(count);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = Some(size);
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = Some(size);
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    /// Add an address to bind when the group starts
    pub fn bind(mut self, address: SocketAddr) -> Self {
        self.bind.push(address);
        self
    }

    /// Add an address to connect to when the group starts
    pub fn connect(mut self, address: SocketAddr) -> Self {
        self.connect.push(address);
        self
    }

    pub fn build(self) -> GroupConfig {
        let default = GroupConfig::default();
        GroupConfig {
            processors: self.processors.unwrap_or(default.processors),
            read_chunk_size: self.read_chunk_size.unwrap_or(default.read_chunk_size),
            max_buffer_size: self.max_buffer_size.unwrap_or(default.max_buffer_size),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            poll_interval: self.poll_interval.unwrap_or(default.poll_interval),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(default.shutdown_timeout),
            idle_timeout: self.idle_timeout.unwrap_or(default.idle_timeout),
            connect_timeout: self.connect_timeout.unwrap_or(default.connect_timeout),
            max_sessions: self.max_sessions.or(default.max_sessions),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            distribution: self.distribution.unwrap_or(default.distribution),
            bind: self.bind,
            connect: self.connect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = GroupConfig::builder().build();
        assert!(config.processors >= 1);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(config.distribution, Distribution::RoundRobin);
        assert!(config.idle_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = GroupConfig::builder()
            .processors(2)
            .read_chunk_size(512)
            .idle_timeout(Some(Duration::from_secs(3)))
            .distribution(Distribution::LeastSessions)
            .bind(addr)
            .build();
        assert_eq!(config.processors, 2);
        assert_eq!(config.read_chunk_size, 512);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.distribution, Distribution::LeastSessions);
        assert_eq!(config.bind, vec![addr]);
    }

    #[test]
    fn test_validation() {
        assert!(GroupConfig::builder().processors(0).build().validate().is_err());
        assert!(GroupConfig::builder()
            .read_chunk_size(1024)
            .max_buffer_size(512)
            .build()
            .validate()
            .is_err());
    }
}
