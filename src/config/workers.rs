//! Worker timing configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Join timeouts and poll intervals of the stream and call workers
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// How long `stop()` waits for a board stream consumer before provoking it
    #[serde(default = "default_stream_join_timeout")]
    pub stream_join_timeout_ms: u64,

    /// How long `stop()` waits for the account-event consumer
    #[serde(default = "default_event_join_timeout")]
    pub event_join_timeout_ms: u64,

    /// Grace period after a provoke call
    #[serde(default = "default_provoke_timeout")]
    pub provoke_timeout_ms: u64,

    /// How long `stop()` waits for the call worker
    #[serde(default = "default_call_join_timeout")]
    pub call_join_timeout_ms: u64,

    /// Timed receive of the call queue
    #[serde(default = "default_call_poll_interval")]
    pub call_poll_interval_ms: u64,
}

impl WorkersConfig {
    pub fn stream_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_join_timeout_ms)
    }

    pub fn event_join_timeout(&self) -> Duration {
        Duration::from_millis(self.event_join_timeout_ms)
    }

    pub fn provoke_timeout(&self) -> Duration {
        Duration::from_millis(self.provoke_timeout_ms)
    }

    pub fn call_join_timeout(&self) -> Duration {
        Duration::from_millis(self.call_join_timeout_ms)
    }

    pub fn call_poll_interval(&self) -> Duration {
        Duration::from_millis(self.call_poll_interval_ms)
    }

    /// Validate worker timings
    pub fn validate(&self) -> Result<(), ValidationError> {
        let timeouts = [
            (self.stream_join_timeout_ms, "workers.stream_join_timeout_ms"),
            (self.event_join_timeout_ms, "workers.event_join_timeout_ms"),
            (self.provoke_timeout_ms, "workers.provoke_timeout_ms"),
            (self.call_join_timeout_ms, "workers.call_join_timeout_ms"),
        ];
        for (value, name) in timeouts {
            if value == 0 {
                return Err(ValidationError::InvalidTimeout(name));
            }
        }
        if self.call_poll_interval_ms == 0 {
            return Err(ValidationError::InvalidPollInterval);
        }
        Ok(())
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            stream_join_timeout_ms: default_stream_join_timeout(),
            event_join_timeout_ms: default_event_join_timeout(),
            provoke_timeout_ms: default_provoke_timeout(),
            call_join_timeout_ms: default_call_join_timeout(),
            call_poll_interval_ms: default_call_poll_interval(),
        }
    }
}

fn default_stream_join_timeout() -> u64 {
    1000
}

fn default_event_join_timeout() -> u64 {
    2000
}

fn default_provoke_timeout() -> u64 {
    1000
}

fn default_call_join_timeout() -> u64 {
    1000
}

fn default_call_poll_interval() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workers_config_defaults() {
        let config = WorkersConfig::default();
        assert_eq!(config.stream_join_timeout(), Duration::from_secs(1));
        assert_eq!(config.event_join_timeout(), Duration::from_secs(2));
        assert_eq!(config.call_poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_join_timeout() {
        let config = WorkersConfig {
            event_join_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidTimeout("workers.event_join_timeout_ms"))
        );
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let config = WorkersConfig {
            call_poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidPollInterval));
    }
}
