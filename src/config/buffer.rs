//! Delay buffer configuration
//!
//! ```toml
//! [buffer]
//! enabled = true
//! delay_ms = 200
//! suppress_source_events_on_move = true
//! flush_on_stop = true
//! ```

use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Controls the time window in which rename halves are merged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// Put the delay buffer in front of the interpreter.
    ///
    /// Without it a rename is seen as a moved-from followed by an unrelated
    /// moved-to, and a renamed directory gets fresh watches.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How long an event is held waiting for its rename partner.
    ///
    /// Default: 200
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Deliver only the synthesized move, not the two halves it was built from
    #[serde(default = "default_suppress_source_events_on_move")]
    pub suppress_source_events_on_move: bool,

    /// On stop, deliver what is still buffered (`true`) or drop it with a warning
    #[serde(default = "default_flush_on_stop")]
    pub flush_on_stop: bool,
}

fn default_enabled() -> bool {
    true
}
fn default_delay_ms() -> u64 {
    200
}
fn default_suppress_source_events_on_move() -> bool {
    true
}
fn default_flush_on_stop() -> bool {
    true
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            delay_ms: default_delay_ms(),
            suppress_source_events_on_move: default_suppress_source_events_on_move(),
            flush_on_stop: default_flush_on_stop(),
        }
    }
}

impl BufferConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "buffer.delay_ms must be greater than 0 when the buffer is enabled".into(),
            )));
        }
        Ok(())
    }
}
