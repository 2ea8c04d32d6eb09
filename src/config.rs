//! Configuration types for transfer operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Backoff schedule the coordinator applies to failed chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure. Zero disables retries.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on every further attempt.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for chunked transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Number of parallel chunk workers per file.
    pub chunk_concurrency: usize,
    /// Number of concurrent file uploads while mirroring a directory.
    pub file_concurrency: usize,
    /// Size of one upload part in bytes.
    pub part_size: u64,
    /// Ceiling for `file_concurrency * chunk_concurrency`.
    pub max_connections: usize,
    /// Files larger than this wait for `large_file_grace_ms` before finalize.
    pub large_file_threshold: u64,
    /// Grace period granted to the remote's post-processing of large files.
    pub large_file_grace_ms: u64,
    /// Retry schedule for failed chunks.
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_concurrency: 8,
            file_concurrency: 4,
            part_size: 5 * MIB,
            max_connections: 64,
            large_file_threshold: 64 * MIB,
            large_file_grace_ms: 3_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of chunk workers per file.
    #[must_use]
    pub const fn with_chunk_concurrency(mut self, chunks: usize) -> Self {
        self.chunk_concurrency = chunks;
        self
    }

    /// Sets the number of concurrent file uploads.
    #[must_use]
    pub const fn with_file_concurrency(mut self, files: usize) -> Self {
        self.file_concurrency = files;
        self
    }

    /// Sets the upload part size in bytes.
    #[must_use]
    pub const fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Sets the total connection ceiling.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the grace period before finalizing large files.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_large_file_grace(mut self, grace: Duration) -> Self {
        self.large_file_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Grace period as a `Duration`.
    #[must_use]
    pub const fn large_file_grace(&self) -> Duration {
        Duration::from_millis(self.large_file_grace_ms)
    }

    /// Sets the size above which finalize waits for the grace period.
    #[must_use]
    pub const fn with_large_file_threshold(mut self, bytes: u64) -> Self {
        self.large_file_threshold = bytes;
        self
    }

    /// Checks the settings that apply to a single file in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate_file(&self) -> Result<()> {
        if self.chunk_concurrency == 0 {
            return Err(Error::Config("chunk_concurrency must be > 0".into()));
        }
        if self.part_size == 0 {
            return Err(Error::Config("part_size must be > 0".into()));
        }
        if self.chunk_concurrency > self.max_connections {
            return Err(Error::Config(format!(
                "chunk_concurrency ({}) exceeds max_connections ({})",
                self.chunk_concurrency, self.max_connections
            )));
        }
        Ok(())
    }

    /// Checks that pool sizes are usable and stay under the connection ceiling
    /// when `file_concurrency` files run at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.validate_file()?;
        if self.file_concurrency == 0 {
            return Err(Error::Config("file_concurrency must be > 0".into()));
        }
        let total = self.file_concurrency.saturating_mul(self.chunk_concurrency);
        if total > self.max_connections {
            return Err(Error::Config(format!(
                "file_concurrency ({}) x chunk_concurrency ({}) = {total} exceeds max_connections ({})",
                self.file_concurrency, self.chunk_concurrency, self.max_connections
            )));
        }
        Ok(())
    }
}

/// Remote endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the drive API.
    pub base_url: String,
    /// Connect and read-stall timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.123pan.com".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transfer tuning.
    pub transfer: TransferConfig,
    /// Remote endpoint settings.
    pub remote: RemoteConfig,
}

impl AppConfig {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pan-transfer")
            .join("config.toml")
    }

    /// Loads configuration from the default path, or defaults if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.transfer.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_transfer_config() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_concurrency, 8);
        assert_eq!(config.file_concurrency, 4);
        assert_eq!(config.part_size, 5 * MIB);
        assert_eq!(config.large_file_threshold, 64 * MIB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = TransferConfig::new()
            .with_chunk_concurrency(16)
            .with_file_concurrency(2)
            .with_part_size(32 * MIB)
            .with_large_file_grace(Duration::from_millis(10))
            .with_retry(RetryPolicy::none());

        assert_eq!(config.chunk_concurrency, 16);
        assert_eq!(config.file_concurrency, 2);
        assert_eq!(config.part_size, 32 * MIB);
        assert_eq!(config.large_file_grace(), Duration::from_millis(10));
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn connection_ceiling_is_enforced() {
        let config = TransferConfig::new()
            .with_chunk_concurrency(16)
            .with_file_concurrency(8)
            .with_max_connections(64);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn single_file_checks_ignore_file_concurrency() {
        let config = TransferConfig::new()
            .with_chunk_concurrency(16)
            .with_file_concurrency(8)
            .with_max_connections(64);
        assert!(config.validate_file().is_ok());
        assert!(config.with_chunk_concurrency(65).validate_file().is_err());
        assert!(TransferConfig::new().with_part_size(0).validate_file().is_err());
    }

    #[test]
    fn zero_pool_sizes_are_rejected() {
        assert!(TransferConfig::new().with_chunk_concurrency(0).validate().is_err());
        assert!(TransferConfig::new().with_file_concurrency(0).validate().is_err());
        assert!(TransferConfig::new().with_part_size(0).validate().is_err());
    }

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(retry.delay_for(10), Duration::from_millis(8_000));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            "[transfer]\nchunk_concurrency = 4\n\n[transfer.retry]\nmax_retries = 0\n",
        )
        .unwrap();
        assert_eq!(config.transfer.chunk_concurrency, 4);
        assert_eq!(config.transfer.file_concurrency, 4);
        assert_eq!(config.transfer.retry.max_retries, 0);
        assert_eq!(config.remote.base_url, "https://www.123pan.com");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote]\ntimeout_secs = 5\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.remote.timeout_secs, 5);
        assert_eq!(config.transfer.part_size, 5 * MIB);
    }

    #[test]
    fn load_from_rejects_invalid_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transfer]\nchunk_concurrency = 0\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(Error::Config(_))));
    }
}
