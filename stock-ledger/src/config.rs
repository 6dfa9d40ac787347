//! Configuration for the stock ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Conflict retry configuration
    pub retry: RetryConfig,

    /// Policy for deleting stall records
    pub delete_policy: DeletePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/stock-ledger"),
            service_name: "stock-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDbConfig::default(),
            retry: RetryConfig::default(),
            delete_policy: DeletePolicy::default(),
        }
    }
}

/// RocksDB tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Bounded retry for conflicted or unavailable transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per operation, including the first
    pub max_attempts: u32,

    /// Base backoff between attempts (milliseconds); grows linearly per attempt
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 10,
        }
    }
}

/// What `delete_stall_item` does with remaining quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Return remaining quantity to the linked master, then delete
    #[default]
    ReturnThenDelete,

    /// Refuse to delete records with quantity > 0
    RequireEmpty,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("STOCK_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(attempts) = std::env::var("STOCK_LEDGER_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid retry attempts: {}", attempts)))?;
        }

        if let Ok(policy) = std::env::var("STOCK_LEDGER_DELETE_POLICY") {
            config.delete_policy = match policy.as_str() {
                "return_then_delete" => DeletePolicy::ReturnThenDelete,
                "require_empty" => DeletePolicy::RequireEmpty,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown delete policy: {}",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }
}
