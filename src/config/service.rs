use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Above this many slots the queue alone can hold hundreds of megabytes
const LARGE_QUEUE_CAPACITY: usize = 1 << 20;

/// Delivery pipeline configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Slots in the queue between the producer and consumer threads.
    ///
    /// Default: 32768, twice the Linux default `max_queued_events`
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Longest the producer blocks on the raw source before checking for shutdown
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Undelivered background failures kept for `errors()`
    #[serde(default = "default_error_report_capacity")]
    pub error_report_capacity: usize,
}

fn default_queue_capacity() -> usize {
    32768
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_error_report_capacity() -> usize {
    1024
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            error_report_capacity: default_error_report_capacity(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "service.queue_capacity must be greater than 0".into(),
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "service.poll_interval_ms must be greater than 0".into(),
            )));
        }
        if self.error_report_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "service.error_report_capacity must be greater than 0".into(),
            )));
        }

        if self.queue_capacity > LARGE_QUEUE_CAPACITY {
            warn!(
                queue_capacity = self.queue_capacity,
                "delivery queue capacity is unusually large"
            );
        }
        Ok(())
    }
}
