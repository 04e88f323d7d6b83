use crate::backend::{Backend, BackendKind};
use crate::config::{PipelineConfig, StoreConfig};
use crate::tombstone::{CachedOwnership, TombstoneExecutor, TombstonePipeline, TombstoneReport};
use linkstore_core::{DeleteRequest, Result, ShortCode, StorageError, StoreStats, UrlRecord};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

/// Concurrency-safe short code to URL store.
///
/// The in-memory mapping is authoritative for [`LinkStore::get`] and is
/// always readable without touching the backend. Writes update the mapping
/// first and then the backend, under one exclusive lock, so mapping
/// mutations are linearizable but not atomic with the durable write: the
/// mapping is "last write wins" while the backend stays the source of
/// truth for uniqueness. A `Conflict` from the backend therefore leaves the
/// new value in the mapping.
///
/// The whole mapping sits behind a single reader/writer lock. Writers
/// serialize with each other and with backend writes, which bounds write
/// throughput.
#[derive(Debug)]
pub struct LinkStore {
    mapping: RwLock<HashMap<ShortCode, UrlRecord>>,
    backend: Backend,
    pipeline: TombstonePipeline,
}

impl LinkStore {
    /// Opens the configured backend and loads every record from it.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = Backend::open(&config).await?;
        Self::with_backend(backend, &config.pipeline).await
    }

    /// Creates a store on top of an already opened backend.
    pub async fn with_backend(backend: Backend, pipeline: &PipelineConfig) -> Result<Self> {
        pipeline.validate()?;

        let records = match &backend {
            Backend::Memory => Vec::new(),
            Backend::File(file) => file.load_all().await?,
            Backend::MySql(db) => db.load_all().await?,
        };

        let mapping: HashMap<ShortCode, UrlRecord> = records
            .into_iter()
            .map(|record| (record.short_code.clone(), record))
            .collect();

        let pipeline = TombstonePipeline::new(pipeline);
        info!(
            backend = %backend.kind(),
            count = mapping.len(),
            workers = pipeline.workers(),
            "link store ready"
        );

        Ok(Self {
            mapping: RwLock::new(mapping),
            backend,
            pipeline,
        })
    }

    /// Creates an empty store without durable state.
    pub fn in_memory(pipeline: &PipelineConfig) -> Self {
        Self {
            mapping: RwLock::new(HashMap::new()),
            backend: Backend::Memory,
            pipeline: TombstonePipeline::new(pipeline),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Stores a live record and persists it.
    ///
    /// The mapping is updated even when the backend rejects the write; the
    /// backend error, including [`StorageError::Conflict`], is returned
    /// unchanged.
    pub async fn set(
        &self,
        code: ShortCode,
        original_url: impl Into<String>,
        owner_id: Option<&str>,
    ) -> Result<()> {
        let record = UrlRecord::new(code, original_url, owner_id);
        trace!(code = %record.short_code, "storing record");

        let mut mapping = self.mapping.write().await;
        mapping.insert(record.short_code.clone(), record.clone());

        match &self.backend {
            Backend::Memory => Ok(()),
            Backend::File(file) => file.write_all(mapping.values()).await,
            Backend::MySql(db) => db.insert_one(&record).await,
        }
    }

    /// Stores anonymous records in bulk.
    ///
    /// All entries land in the mapping under one lock, then the backend
    /// gets one batch write. The first backend error is returned; entries
    /// written before it are not rolled back.
    pub async fn set_batch(&self, batch: HashMap<ShortCode, String>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let records: Vec<UrlRecord> = batch
            .into_iter()
            .map(|(code, url)| UrlRecord::anonymous(code, url))
            .collect();

        let mut mapping = self.mapping.write().await;
        for record in &records {
            mapping.insert(record.short_code.clone(), record.clone());
        }
        debug!(count = records.len(), "merged batch into mapping");

        match &self.backend {
            Backend::Memory => Ok(()),
            Backend::File(file) => file.write_all(mapping.values()).await,
            Backend::MySql(db) => db.insert_batch(&records).await,
        }
    }

    /// Looks up a record in the mapping. Never touches the backend.
    pub async fn get(&self, code: impl AsRef<str>) -> Option<UrlRecord> {
        let mapping = self.mapping.read().await;
        mapping.get(code.as_ref()).cloned()
    }

    /// Returns the records of an owner, tombstoned ones included.
    ///
    /// With a relational backend the database is queried directly and only
    /// committed rows are visible. Otherwise the mapping is filtered.
    pub async fn get_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        match &self.backend {
            Backend::MySql(db) => db.query_by_owner(owner_id).await,
            Backend::Memory | Backend::File(_) => {
                let mapping = self.mapping.read().await;
                let mut records: Vec<UrlRecord> = mapping
                    .values()
                    .filter(|record| record.is_owned_by(owner_id))
                    .cloned()
                    .collect();
                records.sort_by(|a, b| a.short_code.cmp(&b.short_code));
                Ok(records)
            }
        }
    }

    /// Tombstones the given codes on behalf of their owner.
    ///
    /// Always succeeds: codes that are not owned by `owner_id`, unknown, or
    /// part of a failed backend batch are skipped. Use
    /// [`LinkStore::delete_batch_with_report`] to see which ones.
    pub async fn delete_batch(&self, owner_id: &str, codes: Vec<ShortCode>) -> Result<()> {
        self.delete_batch_with_report(owner_id, codes).await?;
        Ok(())
    }

    /// Same as [`LinkStore::delete_batch`], returning per-code results.
    ///
    /// Repeated codes are requested once, so each code appears at most once
    /// in the report.
    pub async fn delete_batch_with_report(
        &self,
        owner_id: &str,
        codes: Vec<ShortCode>,
    ) -> Result<TombstoneReport> {
        let mut seen = HashSet::with_capacity(codes.len());
        let requests: Vec<DeleteRequest> = codes
            .into_iter()
            .filter(|code| seen.insert(code.clone()))
            .map(|code| DeleteRequest::new(owner_id, code))
            .collect();

        if requests.is_empty() {
            return Ok(TombstoneReport::default());
        }

        let executor = self.tombstone_executor(&requests).await;
        let outcomes = self.pipeline.run(executor, requests).await;
        let report = self
            .reconcile(owner_id, TombstoneReport::from_outcomes(&outcomes))
            .await;

        if !report.rejected.is_empty() {
            warn!(
                owner = %owner_id,
                deleted = report.deleted.len(),
                rejected = report.rejected.len(),
                "tombstone requests partially applied"
            );
        } else {
            debug!(owner = %owner_id, deleted = report.deleted.len(), "tombstone requests applied");
        }

        Ok(report)
    }

    /// Applies successful outcomes to the mapping.
    ///
    /// Without a relational backend ownership was checked on a snapshot, so
    /// it is checked again under the write lock: a code reassigned to
    /// another owner in the meantime is rejected instead of tombstoned.
    async fn reconcile(&self, owner_id: &str, mut report: TombstoneReport) -> TombstoneReport {
        let recheck_owner = !matches!(self.backend, Backend::MySql(_));
        let succeeded = std::mem::take(&mut report.deleted);
        let mut mapping = self.mapping.write().await;

        for code in succeeded {
            match mapping.get_mut(&code) {
                Some(record) if recheck_owner && !record.is_owned_by(owner_id) => {
                    trace!(code = %code, owner = %owner_id, "owner changed before tombstoning");
                    report.rejected.push(code);
                }
                Some(record) => {
                    record.deleted = true;
                    report.deleted.push(code);
                }
                None if recheck_owner => report.rejected.push(code),
                None => {
                    // Committed in the backend but never loaded into the mapping.
                    let record =
                        UrlRecord::new(code.clone(), String::new(), Some(owner_id)).tombstone();
                    mapping.insert(code.clone(), record);
                    report.deleted.push(code);
                }
            }
        }

        report
    }

    async fn tombstone_executor(&self, requests: &[DeleteRequest]) -> Arc<dyn TombstoneExecutor> {
        match &self.backend {
            Backend::MySql(db) => Arc::new(db.clone()),
            Backend::Memory | Backend::File(_) => {
                let mapping = self.mapping.read().await;
                let owners = requests
                    .iter()
                    .filter_map(|request| {
                        mapping
                            .get(&request.short_code)
                            .map(|record| (request.short_code.clone(), record.owner_id.clone()))
                    })
                    .collect();
                Arc::new(CachedOwnership::new(owners))
            }
        }
    }

    /// Counts live records and their distinct owners.
    pub async fn stats(&self) -> Result<StoreStats> {
        match &self.backend {
            Backend::MySql(db) => db.stats().await,
            Backend::Memory | Backend::File(_) => {
                let mapping = self.mapping.read().await;
                let live = mapping.values().filter(|record| !record.deleted);
                let mut urls = 0;
                let mut owners = HashSet::new();
                for record in live {
                    urls += 1;
                    if let Some(owner) = record.owner_id.as_deref() {
                        owners.insert(owner);
                    }
                }
                Ok(StoreStats {
                    urls,
                    users: owners.len() as u64,
                })
            }
        }
    }

    /// Checks that the relational backend is reachable.
    ///
    /// Stores without a relational backend report
    /// [`StorageError::Unavailable`].
    pub async fn ping(&self) -> Result<()> {
        match &self.backend {
            Backend::MySql(db) => db.ping().await,
            Backend::Memory | Backend::File(_) => Err(StorageError::Unavailable(format!(
                "no database configured, store is backed by {}",
                self.backend.kind()
            ))),
        }
    }

    pub async fn len(&self) -> usize {
        self.mapping.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mapping.read().await.is_empty()
    }

    /// Returns every cached record ordered by short code.
    pub async fn snapshot(&self) -> Vec<UrlRecord> {
        let mapping = self.mapping.read().await;
        let mut records: Vec<UrlRecord> = mapping.values().cloned().collect();
        records.sort_by(|a, b| a.short_code.cmp(&b.short_code));
        records
    }

    /// Persists and releases the backend.
    ///
    /// The file backend gets one final full rewrite, the MySQL pool is
    /// closed. Nothing happens for an in-memory store.
    pub async fn close(&self) -> Result<()> {
        match &self.backend {
            Backend::Memory => {}
            Backend::File(file) => {
                let mapping = self.mapping.read().await;
                file.write_all(mapping.values()).await?;
            }
            Backend::MySql(db) => db.close().await,
        }
        info!(backend = %self.backend.kind(), "link store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FileBackend;
    use std::path::Path;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn memory_store() -> LinkStore {
        LinkStore::in_memory(&PipelineConfig::default())
    }

    async fn file_store(path: &Path) -> LinkStore {
        let config = StoreConfig::builder()
            .file_storage_path(Some(path.to_path_buf()))
            .build();
        LinkStore::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = memory_store();

        store
            .set(code("abc123"), "https://example.com", Some("u1"))
            .await
            .unwrap();

        let record = store.get("abc123").await.unwrap();
        assert_eq!(record.original_url, "https://example.com");
        assert_eq!(record.owner_id.as_deref(), Some("u1"));
        assert!(!record.deleted);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = memory_store();
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn set_overwrites_in_mapping() {
        let store = memory_store();

        store.set(code("abc"), "https://one.example", None).await.unwrap();
        store.set(code("abc"), "https://two.example", None).await.unwrap();

        assert_eq!(store.get("abc").await.unwrap().original_url, "https://two.example");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn set_batch_makes_every_entry_visible() {
        let store = memory_store();
        let batch = HashMap::from([
            (code("a"), "x".to_string()),
            (code("b"), "y".to_string()),
        ]);

        store.set_batch(batch).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().original_url, "x");
        assert_eq!(store.get("b").await.unwrap().original_url, "y");
        assert_eq!(store.get("a").await.unwrap().owner_id, None);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = memory_store();
        store.set_batch(HashMap::new()).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn get_by_owner_filters_mapping() {
        let store = memory_store();
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();
        store.set(code("s2"), "https://two.example", Some("u2")).await.unwrap();
        store.set(code("s3"), "https://three.example", Some("u1")).await.unwrap();
        store.set(code("s4"), "https://four.example", None).await.unwrap();

        let owned = store.get_by_owner("u1").await.unwrap();
        let codes: Vec<&str> = owned.iter().map(|r| r.short_code.as_str()).collect();
        assert_eq!(codes, vec!["s1", "s3"]);
        assert!(store.get_by_owner("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_batch_only_touches_owned_codes() {
        let store = memory_store();
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();
        store.set(code("s2"), "https://two.example", Some("u2")).await.unwrap();

        store.delete_batch("u1", vec![code("s1")]).await.unwrap();

        assert!(store.get("s1").await.unwrap().deleted);
        assert!(!store.get("s2").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn tombstone_keeps_url_and_owner() {
        let store = memory_store();
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();

        store.delete_batch("u1", vec![code("s1")]).await.unwrap();

        let record = store.get("s1").await.unwrap();
        assert!(record.deleted);
        assert_eq!(record.original_url, "https://one.example");
        assert_eq!(record.owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn delete_batch_succeeds_even_when_everything_is_rejected() {
        let store = memory_store();
        store.set(code("s2"), "https://two.example", Some("u2")).await.unwrap();

        let report = store
            .delete_batch_with_report("u1", vec![code("s2"), code("missing")])
            .await
            .unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert!(!store.get("s2").await.unwrap().deleted);
        assert!(store.get("missing").await.is_none());
        assert!(store.delete_batch("u1", vec![code("s2")]).await.is_ok());
    }

    #[tokio::test]
    async fn repeated_codes_are_reported_once() {
        let store = memory_store();
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();

        let report = store
            .delete_batch_with_report("u1", vec![code("s1"), code("s1"), code("nope"), code("nope")])
            .await
            .unwrap();

        assert_eq!(report.deleted, vec![code("s1")]);
        assert_eq!(report.rejected, vec![code("nope")]);
    }

    #[tokio::test]
    async fn reassigned_code_is_not_tombstoned() {
        let store = memory_store();
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();

        // Ownership snapshot and pipeline run see u1 as the owner.
        let requests = vec![DeleteRequest::new("u1", code("s1"))];
        let executor = store.tombstone_executor(&requests).await;
        let outcomes = store.pipeline.run(executor, requests).await;
        let report = TombstoneReport::from_outcomes(&outcomes);
        assert_eq!(report.deleted, vec![code("s1")]);

        store.set(code("s1"), "https://two.example", Some("u2")).await.unwrap();
        let report = store.reconcile("u1", report).await;

        assert!(report.deleted.is_empty());
        assert_eq!(report.rejected, vec![code("s1")]);
        let record = store.get("s1").await.unwrap();
        assert_eq!(record.owner_id.as_deref(), Some("u2"));
        assert!(!record.deleted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_racing_reassignment_never_tombstones_new_owner() {
        for _ in 0..200 {
            let store = Arc::new(memory_store());
            store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();

            let deleter = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.delete_batch("u1", vec![code("s1")]).await })
            };
            let writer = {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.set(code("s1"), "https://two.example", Some("u2")).await
                })
            };
            deleter.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();

            let record = store.get("s1").await.unwrap();
            assert_eq!(record.owner_id.as_deref(), Some("u2"));
            assert!(!record.deleted, "u1 tombstoned a code now owned by u2");
        }
    }

    #[tokio::test]
    async fn empty_delete_batch_reports_nothing() {
        let store = memory_store();
        let report = store.delete_batch_with_report("u1", Vec::new()).await.unwrap();
        assert_eq!(report, TombstoneReport::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tombstoning_of_many_records() {
        let store = LinkStore::in_memory(&PipelineConfig::builder().workers(4).build());
        let owned: Vec<ShortCode> = (0..50).map(|i| code(&format!("u1-{i:03}"))).collect();
        for c in &owned {
            store
                .set(c.clone(), format!("https://example.com/{c}"), Some("u1"))
                .await
                .unwrap();
        }
        for i in 0..5 {
            store
                .set(code(&format!("u2-{i:03}")), "https://other.example", Some("u2"))
                .await
                .unwrap();
        }

        let report = store
            .delete_batch_with_report("u1", owned.clone())
            .await
            .unwrap();

        assert_eq!(report.deleted.len(), 50);
        assert!(report.is_complete());
        for c in &owned {
            let record = store.get(c).await.unwrap();
            assert!(record.deleted);
            assert_eq!(record.original_url, format!("https://example.com/{c}"));
        }
        for i in 0..5 {
            assert!(!store.get(format!("u2-{i:03}")).await.unwrap().deleted);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_and_readers() {
        let store = Arc::new(memory_store());
        let mut handles = vec![];

        for i in 0..20u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set(code(&format!("code-{i:03}")), format!("https://example{i}.com"), None)
                    .await
                    .unwrap();
            }));
        }
        for i in 0..20u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let _ = store.get(format!("code-{i:03}")).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len().await, 20);
        for i in 0..20u64 {
            let record = store.get(format!("code-{i:03}")).await.unwrap();
            assert_eq!(record.original_url, format!("https://example{i}.com"));
        }
    }

    #[tokio::test]
    async fn stats_count_live_records_and_owners() {
        let store = memory_store();
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();
        store.set(code("s2"), "https://two.example", Some("u1")).await.unwrap();
        store.set(code("s3"), "https://three.example", Some("u2")).await.unwrap();
        store.set(code("s4"), "https://four.example", None).await.unwrap();
        store.delete_batch("u2", vec![code("s3")]).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, StoreStats { urls: 3, users: 1 });
    }

    #[tokio::test]
    async fn ping_without_database_is_unavailable() {
        let store = memory_store();
        assert!(matches!(
            store.ping().await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn invalid_pipeline_config_is_rejected() {
        let config = StoreConfig::builder()
            .pipeline(PipelineConfig::builder().workers(0).build())
            .build();
        assert!(matches!(
            LinkStore::open(config).await,
            Err(StorageError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");

        let store = file_store(&path).await;
        assert!(store.is_empty().await);
        store
            .set(code("ab12cd34"), "https://example.com", None)
            .await
            .unwrap();

        let record = store.get("ab12cd34").await.unwrap();
        assert_eq!(record.original_url, "https://example.com");
        assert!(!record.deleted);
        store.close().await.unwrap();

        let reopened = file_store(&path).await;
        assert_eq!(reopened.get("ab12cd34").await, Some(record));
        assert_eq!(reopened.backend_kind(), BackendKind::File);
    }

    #[tokio::test]
    async fn file_store_persists_each_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");

        let store = file_store(&path).await;
        store.set(code("one"), "https://one.example", Some("u1")).await.unwrap();
        store
            .set_batch(HashMap::from([(code("two"), "https://two.example".to_string())]))
            .await
            .unwrap();

        // Read the file directly, without going through close.
        let on_disk = FileBackend::new(&path).load_all().await.unwrap();
        assert_eq!(on_disk.len(), 2);
    }

    #[tokio::test]
    async fn file_store_load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");

        let store = file_store(&path).await;
        store.set(code("a"), "https://a.example", Some("u1")).await.unwrap();
        store.set(code("b"), "https://b.example", None).await.unwrap();
        store.close().await.unwrap();

        let first = file_store(&path).await.snapshot().await;
        let second = file_store(&path).await.snapshot().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn file_store_tombstones_persist_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");

        let store = file_store(&path).await;
        store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();
        store.delete_batch("u1", vec![code("s1")]).await.unwrap();

        // Deletions are not written until the next full save.
        let before_close = FileBackend::new(&path).load_all().await.unwrap();
        assert!(!before_close[0].deleted);

        store.close().await.unwrap();
        let reopened = file_store(&path).await;
        assert!(reopened.get("s1").await.unwrap().deleted);
        assert_eq!(reopened.get_by_owner("u1").await.unwrap().len(), 1);
    }
}
