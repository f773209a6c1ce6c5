use std::time::Duration;

use serde::Deserialize;

pub const MIN_PRIORITY: u8 = 0;
pub const MAX_PRIORITY: u8 = 100;

/// Forces any priority into `[MIN_PRIORITY, MAX_PRIORITY]`.
pub fn clamp_priority(priority: i64) -> u8 {
    // The clamp keeps the value within u8 range.
    priority.clamp(MIN_PRIORITY.into(), MAX_PRIORITY.into()) as u8
}

/// Per-queue worker settings, fixed once registered.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Key-space name of the queue.
    pub name: String,
    /// Number of handlers allowed to run at once.
    pub num_workers: usize,
    /// Claims allowed before a failing job is dead-lettered.
    pub max_attempts: u32,
    /// Delay before a failed job becomes claimable again.
    #[serde(with = "seconds")]
    pub retry_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            num_workers: 1,
            max_attempts: 1,
            retry_interval: Duration::ZERO,
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_retry_interval(mut self, d: Duration) -> Self {
        self.retry_interval = d;
        self
    }

    /// Raises zero worker and attempt counts to one.
    pub(crate) fn normalized(mut self) -> Self {
        self.num_workers = self.num_workers.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
