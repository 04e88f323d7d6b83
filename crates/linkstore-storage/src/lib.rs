//! Storage layer of the link store.
//!
//! [`LinkStore`] keeps every record in an in-memory mapping and mirrors
//! writes into exactly one durable backend: nothing, a line-delimited JSON
//! file, or MySQL. Soft deletes go through a concurrent
//! [`TombstonePipeline`].

pub mod backend;
pub mod config;
pub mod store;
pub mod tombstone;

pub use backend::{Backend, BackendKind, FileBackend, MySqlBackend};
pub use config::{PipelineConfig, StoreConfig};
pub use linkstore_core::{
    DeleteOutcome, DeleteRequest, Result, ShortCode, StorageError, StoreStats, UrlRecord,
};
pub use store::LinkStore;
pub use tombstone::{TombstoneExecutor, TombstonePipeline, TombstoneReport};
