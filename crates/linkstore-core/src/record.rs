use crate::shortcode::ShortCode;
use serde::{Deserialize, Serialize};

/// A short code to original URL mapping with its ownership and deletion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The identity of the record.
    pub short_code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// The owner of the record, `None` for anonymous links.
    pub owner_id: Option<String>,
    /// Whether the record has been tombstoned.
    pub deleted: bool,
}

impl UrlRecord {
    /// Creates a live record. An empty owner is treated as anonymous.
    pub fn new(
        short_code: ShortCode,
        original_url: impl Into<String>,
        owner_id: Option<impl Into<String>>,
    ) -> Self {
        Self {
            short_code,
            original_url: original_url.into(),
            owner_id: owner_id.map(Into::into).filter(|owner| !owner.is_empty()),
            deleted: false,
        }
    }

    /// Creates a live anonymous record.
    pub fn anonymous(short_code: ShortCode, original_url: impl Into<String>) -> Self {
        Self::new(short_code, original_url, None::<String>)
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id)
    }

    /// Returns the record marked as deleted, keeping URL and owner.
    pub fn tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// A request to tombstone one short code on behalf of its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub owner_id: String,
    pub short_code: ShortCode,
}

impl DeleteRequest {
    pub fn new(owner_id: impl Into<String>, short_code: ShortCode) -> Self {
        Self {
            owner_id: owner_id.into(),
            short_code,
        }
    }
}

/// The per-item result of a tombstone batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub short_code: ShortCode,
    pub succeeded: bool,
}

impl DeleteOutcome {
    pub fn succeeded(short_code: ShortCode) -> Self {
        Self {
            short_code,
            succeeded: true,
        }
    }

    pub fn failed(short_code: ShortCode) -> Self {
        Self {
            short_code,
            succeeded: false,
        }
    }
}

/// Aggregate counters over the live records of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of records that are not tombstoned.
    pub urls: u64,
    /// Number of distinct owners among those records.
    pub users: u64,
}
