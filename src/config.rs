use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level runtime configuration.
///
/// Built once at startup from CLI arguments and passed by reference into
/// each component constructor; no component reads ambient global state.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub mikrotik: Option<MikrotikConfig>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database filename, or None for an in-memory database.
    pub filename: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self { filename: None }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Maximum event age. Zero disables the purger entirely.
    pub period: Duration,
    /// Maximum number of events deleted per purge cycle.
    pub purge_limit: u64,
}

impl RetentionConfig {
    pub fn disabled() -> Self {
        Self {
            period: Duration::ZERO,
            purge_limit: DEFAULT_PURGE_LIMIT,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.period.is_zero() && self.purge_limit > 0
    }
}

pub const DEFAULT_PURGE_LIMIT: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub const DEFAULT_PORT: u16 = 5636;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Commit a batch every `batch_size` events.
    pub batch_size: u64,
    /// Input files, processed strictly in order.
    pub inputs: Vec<PathBuf>,
}

pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inputs: Vec::new(),
        }
    }
}

/// RouterOS REST API credentials for the address-list integration.
#[derive(Debug, Clone, Deserialize)]
pub struct MikrotikConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub list: String,
}
