//! Configuration for the watch engine.
//!
//! Sources are merged in this order, later ones overriding earlier ones:
//! 1. Type defaults
//! 2. The file named by `TREEWATCH_CONFIG_PATH` (if set)
//! 3. Environment variables prefixed `TREEWATCH__`, e.g.
//!    `TREEWATCH__BUFFER__DELAY_MS=50`

mod buffer;
mod service;

pub use buffer::*;
pub use service::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_PATH_ENV;
use crate::constants::ENV_PREFIX;
use crate::Result;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Rename coalescing
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Producer/consumer delivery
    #[serde(default)]
    pub service: ServiceConfig,
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

impl WatcherConfig {
    /// Load defaults, the optional config file and environment overrides.
    ///
    /// Not validated: call [`validate`](Self::validate) once every override
    /// is applied.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder.add_source(environment()).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Layer one more file on top, environment variables still winning.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(self) -> Result<Self> {
        self.buffer.validate()?;
        self.service.validate()?;
        Ok(self)
    }
}
