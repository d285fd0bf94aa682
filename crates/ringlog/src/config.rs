use bytering::RingConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the logging backend.
///
/// Pass to [`init`](crate::init) before the first log statement; a backend
/// started lazily uses `LoggerConfig::default()`.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output file, opened append/create with mode 0666.
    ///
    /// Default: `log.txt`
    pub path: PathBuf,

    /// Per-thread staging ring geometry.
    ///
    /// Default: 1 MiB per ring
    pub ring: RingConfig,

    /// How long the drain sleeps when every ring is empty. A shorter
    /// interval lowers flush latency at the cost of idle wakeups.
    ///
    /// Default: 10 µs
    pub poll_interval: Duration,

    /// Pin the drain thread to this CPU core (Linux only).
    ///
    /// Default: unpinned
    pub consumer_core: Option<usize>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("log.txt"),
            ring: RingConfig::default(),
            poll_interval: Duration::from_micros(10),
            consumer_core: None,
        }
    }
}

impl LoggerConfig {
    /// Sets the output file path.
    pub fn with_log_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the staging ring geometry.
    pub fn with_ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    /// Sets the drain's idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pins the drain thread to a CPU core (Linux only).
    pub fn with_consumer_core(mut self, core: usize) -> Self {
        self.consumer_core = Some(core);
        self
    }
}
