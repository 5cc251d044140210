/// Environment variable naming an optional TOML config file
pub(crate) const CONFIG_PATH_ENV: &str = "TREEWATCH_CONFIG_PATH";

/// Prefix of configuration overrides taken from the environment
pub(crate) const ENV_PREFIX: &str = "TREEWATCH";

pub(crate) const PRODUCER_THREAD_NAME: &str = "treewatch-producer";
pub(crate) const CONSUMER_THREAD_NAME: &str = "treewatch-consumer";
pub(crate) const DELAY_TIMER_THREAD_NAME: &str = "treewatch-delay";
