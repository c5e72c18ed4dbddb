//! Coordinator configuration
//!
//! All options have defaults, so an empty TOML document is a valid config.
//! Durations are stored as milliseconds and exposed as `Duration` accessors.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum number of transactions checkpointed in one batch.
pub const MAX_CHECKPOINT_BATCH_SIZE: usize = 200;

/// Coordinator configuration.
///
/// # Example
///
/// ```toml
/// transaction_id_allocation_batch_size = 50000
/// available_transaction_id_threshold = 20000
/// transaction_record_preservation_ms = 60000
/// log_maintenance_interval_ms = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of ids reserved per start-record update
    pub transaction_id_allocation_batch_size: u64,
    /// Headroom at or below which the allocator replenishes
    pub available_transaction_id_threshold: u64,
    /// How long terminal transactions stay in the table
    pub transaction_record_preservation_ms: u64,
    /// Period of the maintenance pass
    pub log_maintenance_interval_ms: u64,
    /// Delay before the first retry of a failed checkpoint batch
    pub checkpoint_retry_base_backoff_ms: u64,
    /// Upper bound of the checkpoint retry delay
    pub checkpoint_retry_max_backoff_ms: u64,
    /// Consecutive failures after which a checkpoint batch is reported stalled
    pub checkpoint_stall_threshold: u32,
    /// Maximum number of evicted aborts remembered as tombstones
    pub abort_tombstone_capacity: usize,
    /// Period of the metrics reporter
    pub metrics_report_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transaction_id_allocation_batch_size: 50_000,
            available_transaction_id_threshold: 20_000,
            transaction_record_preservation_ms: 60_000,
            log_maintenance_interval_ms: 1_000,
            checkpoint_retry_base_backoff_ms: 10,
            checkpoint_retry_max_backoff_ms: 5_000,
            checkpoint_stall_threshold: 16,
            abort_tombstone_capacity: 100_000,
            metrics_report_interval_ms: 30_000,
        }
    }
}

impl CoordinatorConfig {
    /// Retention of terminal table entries
    pub fn transaction_record_preservation(&self) -> Duration {
        Duration::from_millis(self.transaction_record_preservation_ms)
    }

    /// Period of the maintenance pass
    pub fn log_maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.log_maintenance_interval_ms)
    }

    /// Checkpoint retry delay for the given (1-based) attempt
    pub fn checkpoint_retry_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self
            .checkpoint_retry_base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.checkpoint_retry_max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Period of the metrics reporter
    pub fn metrics_report_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_report_interval_ms)
    }

    /// Check option consistency
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero allocation batch, a threshold that is
    /// not below the batch size, or a zero maintenance interval.
    pub fn validate(&self) -> Result<()> {
        if self.transaction_id_allocation_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "transaction_id_allocation_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.available_transaction_id_threshold >= self.transaction_id_allocation_batch_size {
            return Err(Error::InvalidConfig(format!(
                "available_transaction_id_threshold ({}) must be smaller than transaction_id_allocation_batch_size ({})",
                self.available_transaction_id_threshold, self.transaction_id_allocation_batch_size
            )));
        }
        if self.log_maintenance_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "log_maintenance_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Meridian coordinator configuration

# Ids reserved per durable start-record update.
transaction_id_allocation_batch_size = 50000

# Replenish ids when the reserved headroom drops to this value.
available_transaction_id_threshold = 20000

# Keep aborted/checkpointed transactions in memory this long (ms).
transaction_record_preservation_ms = 60000

# Log truncation, timeouts and table garbage collection period (ms).
log_maintenance_interval_ms = 1000

# Failed checkpoint batches are retried with exponential backoff (ms).
checkpoint_retry_base_backoff_ms = 10
checkpoint_retry_max_backoff_ms = 5000
checkpoint_stall_threshold = 16

# Recently evicted aborts still answer status queries as aborted.
abort_tombstone_capacity = 100000

metrics_report_interval_ms = 30000
"#
    }
}
