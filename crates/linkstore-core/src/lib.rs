//! Core types for the linkstore short-link store.
//!
//! This crate provides the record model and the error taxonomy shared by
//! the storage backends, the link store and the command line tool.

pub mod error;
pub mod record;
pub mod shortcode;

pub use error::{CoreError, Result, StorageError};
pub use record::{DeleteOutcome, DeleteRequest, StoreStats, UrlRecord};
pub use shortcode::ShortCode;
