use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
/// Period of the active-expiration cron.
pub const DEFAULT_CRON_INTERVAL_MS: u64 = 100;
/// Keys sampled from the expire dict per cron tick.
pub const EXPIRE_CHECK_COUNT: usize = 100;

/// Server settings, read from a JSON file and/or the command line.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cron_interval_ms: u64,
    pub expire_check_count: usize,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cron_interval_ms: DEFAULT_CRON_INTERVAL_MS,
            expire_check_count: EXPIRE_CHECK_COUNT,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reads and deserializes a JSON config. Missing fields take their defaults.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(cfg)
}
