//! Store configuration with typed builders.
//!
//! # Example
//!
//! ```rust
//! use linkstore_storage::config::{PipelineConfig, StoreConfig};
//!
//! // In-memory store, default pipeline (4 workers, no timeout)
//! let config = StoreConfig::builder().build();
//!
//! // File-backed store with a bounded tombstone batch time
//! let config = StoreConfig::builder()
//!     .file_storage_path(Some("links.jsonl".into()))
//!     .pipeline(
//!         PipelineConfig::builder()
//!             .workers(8)
//!             .batch_timeout_ms(Some(2_000))
//!             .build(),
//!     )
//!     .build();
//! ```

use linkstore_core::{Result, StorageError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Configuration of the link store and its backend.
///
/// At most one backend is used. When both a DSN and a file path are set,
/// the relational backend wins.
#[derive(Debug, Clone, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the line-delimited JSON file backend.
    #[builder(default)]
    pub file_storage_path: Option<PathBuf>,

    /// MySQL connection string of the relational backend.
    #[builder(default)]
    pub database_dsn: Option<String>,

    /// Upper bound of the relational connection pool.
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Tombstone pipeline settings.
    #[builder(default)]
    pub pipeline: PipelineConfig,
}

/// Settings of the concurrent tombstone pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker tasks consuming sub-batches.
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Per sub-batch time limit in milliseconds. `None` waits forever.
    #[builder(default)]
    pub batch_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] if `workers` is zero or the
    /// timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StorageError::Configuration(
                "tombstone pipeline needs at least 1 worker".to_string(),
            ));
        }

        if self.batch_timeout_ms == Some(0) {
            return Err(StorageError::Configuration(
                "tombstone batch timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl StoreConfig {
    /// Validates the configuration, including the pipeline settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(StorageError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }

        self.pipeline.validate()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
