use std::time::Duration;

use courier_config::ClientConfig;

/// Floor for timer periods; tokio intervals reject a zero period.
pub(crate) const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Retry and heartbeat policy for a [`ReconnectController`](crate::ReconnectController).
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    /// Deadline for a single frame write
    pub write_timeout: Duration,
}

impl ReconnectOptions {
    /// Delay before the next attempt, given the number of consecutive
    /// failures so far. Grows linearly until it reaches `max_delay`.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        self.base_delay
            .saturating_mul(failures.saturating_add(1))
            .min(self.max_delay)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

impl From<&ClientConfig> for ReconnectOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
            heartbeat_interval: config.heartbeat_interval().max(MIN_PERIOD),
            connect_timeout: config.connect_timeout().max(MIN_PERIOD),
            write_timeout: config.write_timeout().max(MIN_PERIOD),
        }
    }
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}
