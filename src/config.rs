//! Server configuration
//!
//! Layered with figment: compiled defaults, then an optional TOML file, then
//! `PARTYD_`-prefixed environment variables.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Default config file looked up when none is given
pub const DEFAULT_CONFIG_FILE: &str = "partyd.toml";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite file; `None` keeps everything in memory
    pub db_path: Option<String>,
    pub grace_period_ms: u64,
    pub ping_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub max_consecutive_failures: u32,
    /// Per-connection outbound queue capacity
    pub outbound_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: None,
            grace_period_ms: 300_000,
            ping_interval_ms: 25_000,
            idle_timeout_ms: 60_000,
            max_message_bytes: 64 * 1024,
            max_consecutive_failures: 5,
            outbound_buffer: 256,
        }
    }
}

impl Config {
    /// Merge defaults, the TOML file at `path` (if it exists) and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::figment(path).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PARTYD_"))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
