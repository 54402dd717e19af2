//! Configuration types for the task runtime

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Sequential executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Delivery loop settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Sequential executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of jobs waiting to start (0 = unlimited)
    pub max_queued: usize,

    /// How long `shutdown` waits for queued work to drain
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

/// Delivery loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// How long `shutdown` waits for the final drain
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_queued: 0,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    /// Cap the number of jobs waiting to start
    pub fn with_max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl RuntimeConfig {
    /// Create a runtime config from environment variables
    ///
    /// - `OFFLOAD_MAX_QUEUED`
    /// - `OFFLOAD_SHUTDOWN_TIMEOUT_MS`
    /// - `OFFLOAD_DISPATCH_SHUTDOWN_TIMEOUT_MS`
    ///
    /// Missing or unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(max_queued) = env_parse::<usize>("OFFLOAD_MAX_QUEUED") {
            config.executor.max_queued = max_queued;
        }
        if let Some(ms) = env_parse::<u64>("OFFLOAD_SHUTDOWN_TIMEOUT_MS") {
            config.executor.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("OFFLOAD_DISPATCH_SHUTDOWN_TIMEOUT_MS") {
            config.dispatcher.shutdown_timeout = Duration::from_millis(ms);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
