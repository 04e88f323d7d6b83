use linkstore_core::{Result, ShortCode, StorageError, UrlRecord};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One line of the storage file.
///
/// `uuid` is renumbered on every save and carries no identity. `user_id`
/// and `is_deleted` are optional so files written without them still load.
#[derive(Debug, Serialize, Deserialize)]
struct FileLine {
    uuid: u64,
    short_url: String,
    original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    is_deleted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FileLine {
    fn into_record(self) -> UrlRecord {
        let mut record = UrlRecord::new(
            ShortCode::new_unchecked(self.short_url),
            self.original_url,
            self.user_id,
        );
        record.deleted = self.is_deleted;
        record
    }
}

/// Append-style file backend: one JSON object per line.
///
/// The file has no update primitive, so every save rewrites it wholesale
/// from the in-memory mapping.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads every parseable line of the file.
    ///
    /// A missing file is an empty store. Lines that fail to parse are skipped.
    pub async fn load_all(&self) -> Result<Vec<UrlRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "storage file absent, starting empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(io_error("failed to read storage file", &self.path, err)),
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FileLine>(line) {
                Ok(parsed) => records.push(parsed.into_record()),
                Err(e) => {
                    warn!(path = %self.path.display(), line = index + 1, error = %e, "skipping unparseable storage line");
                }
            }
        }

        debug!(path = %self.path.display(), count = records.len(), "loaded storage file");
        Ok(records)
    }

    /// Replaces the file content with the given records.
    pub async fn write_all<'a, I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a UrlRecord>,
    {
        let mut buffer = String::new();
        for (index, record) in records.into_iter().enumerate() {
            let line = FileLine {
                uuid: index as u64 + 1,
                short_url: record.short_code.to_string(),
                original_url: record.original_url.clone(),
                user_id: record.owner_id.clone(),
                is_deleted: record.deleted,
            };
            let encoded = serde_json::to_string(&line).map_err(|e| {
                StorageError::InvalidData(format!(
                    "failed to encode record '{}': {e}",
                    record.short_code
                ))
            })?;
            buffer.push_str(&encoded);
            buffer.push('\n');
        }

        tokio::fs::write(&self.path, buffer)
            .await
            .map_err(|err| io_error("failed to write storage file", &self.path, err))?;

        debug!(path = %self.path.display(), "rewrote storage file");
        Ok(())
    }
}

fn io_error(operation: &str, path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Io(format!("{operation} '{}': {err}", path.display()))
}
