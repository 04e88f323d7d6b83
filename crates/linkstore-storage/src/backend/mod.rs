//! Durable backends of the link store.
//!
//! Exactly one backend is active per store, chosen once when the store is
//! opened. The file backend treats the whole mapping as one serializable
//! unit and rewrites it on every mutation; the MySQL backend runs real
//! statements and is the only one with a batched soft-delete primitive.

pub mod file;
pub mod mysql;

pub use file::FileBackend;
pub use mysql::MySqlBackend;

use crate::config::StoreConfig;
use linkstore_core::Result;
use std::fmt::{Display, Formatter};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
    MySql,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "in-memory"),
            BackendKind::File => write!(f, "file"),
            BackendKind::MySql => write!(f, "mysql"),
        }
    }
}

/// The active backend of a store.
#[derive(Debug, Clone)]
pub enum Backend {
    /// No durable state; the cache is all there is.
    Memory,
    File(FileBackend),
    MySql(MySqlBackend),
}

impl Backend {
    /// Opens the backend described by the configuration.
    ///
    /// A DSN takes precedence over a file path. With neither, the store
    /// runs purely in memory.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match (&config.database_dsn, &config.file_storage_path) {
            (Some(dsn), file) => {
                if let Some(path) = file {
                    warn!(path = %path.display(), "both database and file storage configured, using database");
                }
                let backend = MySqlBackend::connect(dsn, config.max_connections).await?;
                info!(backend = %BackendKind::MySql, "opened storage backend");
                Ok(Backend::MySql(backend))
            }
            (None, Some(path)) => {
                info!(backend = %BackendKind::File, path = %path.display(), "opened storage backend");
                Ok(Backend::File(FileBackend::new(path)))
            }
            (None, None) => {
                info!(backend = %BackendKind::Memory, "no durable storage configured");
                Ok(Backend::Memory)
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Memory => BackendKind::Memory,
            Backend::File(_) => BackendKind::File,
            Backend::MySql(_) => BackendKind::MySql,
        }
    }
}
