use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_BUFFER_SIZE: u32 = 65535;
pub const DEFAULT_QUEUE_MAX_LEN: u32 = 10000;
pub const DEFAULT_IDLE_BACKOFF_US: u64 = 100;

/// Settings of one queue handler, loadable from a TOML file.
///
/// ```toml
/// queue_num = 1
/// buffer_size = 65535
/// queue_max_len = 10000
/// fail_open = false
/// recv_uid_gid = false
/// recv_security_context = false
/// recv_gso = false
/// idle_backoff_us = 100
/// stats_interval_secs = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub queue_num: u16,
    /// Largest payload captured per packet, in bytes.
    pub buffer_size: u32,
    pub queue_max_len: u32,
    pub fail_open: bool,
    /// Report the sending socket's UID/GID in packet metadata.
    pub recv_uid_gid: bool,
    /// Report the sender's security context in packet metadata.
    pub recv_security_context: bool,
    pub recv_gso: bool,
    /// Sleep between polls while the queue is empty.
    pub idle_backoff_us: u64,
    /// Traffic report period, 0 disables it.
    pub stats_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_num: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            queue_max_len: DEFAULT_QUEUE_MAX_LEN,
            fail_open: false,
            recv_uid_gid: false,
            recv_security_context: false,
            recv_gso: false,
            idle_backoff_us: DEFAULT_IDLE_BACKOFF_US,
            stats_interval_secs: 0,
        }
    }
}

impl QueueConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.queue_max_len == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_max_len",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_micros(self.idle_backoff_us)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
