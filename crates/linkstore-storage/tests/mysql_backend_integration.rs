use std::collections::HashMap;

use linkstore_storage::{
    Backend, LinkStore, MySqlBackend, PipelineConfig, ShortCode, StorageError, StoreStats,
};
use linkstore_test_infra::mysql::{MySqlServer, MysqlConfig};

struct Fixture {
    _mysql: MySqlServer,
    backend: MySqlBackend,
}

impl Fixture {
    async fn start() -> Self {
        let mysql = MySqlServer::new(MysqlConfig::builder().build())
            .await
            .expect("start mysql");
        let pool = mysql
            .connect_with_schema(5, include_str!("../ddl/mysql/shorten_urls.sql"))
            .await
            .expect("create schema");

        Self {
            _mysql: mysql,
            backend: MySqlBackend::new(pool),
        }
    }

    async fn store(&self) -> LinkStore {
        self.store_with(PipelineConfig::default()).await
    }

    async fn store_with(&self, pipeline: PipelineConfig) -> LinkStore {
        LinkStore::with_backend(Backend::MySql(self.backend.clone()), &pipeline)
            .await
            .expect("open store")
    }
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

#[tokio::test]
async fn duplicate_code_conflicts_but_mapping_keeps_last_write() {
    let fixture = Fixture::start().await;
    let store = fixture.store().await;

    store
        .set(code("abc123"), "https://one.example", Some("u1"))
        .await
        .unwrap();
    let err = store
        .set(code("abc123"), "https://two.example", Some("u1"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Conflict(ref c) if c == "abc123"));
    assert_eq!(
        store.get("abc123").await.unwrap().original_url,
        "https://two.example"
    );

    // The database kept the first write.
    let fresh = fixture.store().await;
    assert_eq!(
        fresh.get("abc123").await.unwrap().original_url,
        "https://one.example"
    );
}

#[tokio::test]
async fn batch_insert_stops_at_first_conflict() {
    let fixture = Fixture::start().await;
    let store = fixture.store().await;

    store
        .set(code("taken"), "https://taken.example", None)
        .await
        .unwrap();
    let err = store
        .set_batch(HashMap::from([(code("taken"), "https://again.example".to_string())]))
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}

#[tokio::test]
async fn load_skips_tombstoned_rows() {
    let fixture = Fixture::start().await;
    let store = fixture.store().await;

    store.set(code("live"), "https://live.example", Some("u1")).await.unwrap();
    store.set(code("gone"), "https://gone.example", Some("u1")).await.unwrap();
    store.delete_batch("u1", vec![code("gone")]).await.unwrap();

    let reloaded = fixture.store().await;
    assert!(reloaded.get("live").await.is_some());
    assert!(reloaded.get("gone").await.is_none());
    assert_eq!(reloaded.len().await, 1);
}

#[tokio::test]
async fn owners_can_only_delete_their_own_codes() {
    let fixture = Fixture::start().await;
    let store = fixture.store().await;

    store.set(code("s1"), "https://one.example", Some("u1")).await.unwrap();
    store.set(code("s2"), "https://two.example", Some("u2")).await.unwrap();

    let report = store
        .delete_batch_with_report("u1", vec![code("s1"), code("s2")])
        .await
        .unwrap();

    assert_eq!(report.deleted, vec![code("s1")]);
    assert_eq!(report.rejected, vec![code("s2")]);
    assert!(store.get("s1").await.unwrap().deleted);
    assert!(!store.get("s2").await.unwrap().deleted);

    let owned = store.get_by_owner("u1").await.unwrap();
    assert_eq!(owned.len(), 1);
    assert!(owned[0].deleted);
    assert_eq!(owned[0].original_url, "https://one.example");
}

#[tokio::test]
async fn pipeline_tombstones_many_rows_concurrently() {
    let fixture = Fixture::start().await;
    let store = fixture
        .store_with(PipelineConfig::builder().workers(4).build())
        .await;

    let codes: Vec<ShortCode> = (0..40).map(|i| code(&format!("bulk-{i:03}"))).collect();
    for c in &codes {
        store
            .set(c.clone(), format!("https://example.com/{c}"), Some("u1"))
            .await
            .unwrap();
    }
    store.set(code("keep"), "https://keep.example", Some("u2")).await.unwrap();

    let report = store
        .delete_batch_with_report("u1", codes.clone())
        .await
        .unwrap();

    assert_eq!(report.deleted.len(), 40);
    assert!(report.is_complete());
    assert!(!store.get("keep").await.unwrap().deleted);
    assert_eq!(store.stats().await.unwrap(), StoreStats { urls: 1, users: 1 });
}

#[tokio::test]
async fn stats_and_ping() {
    let fixture = Fixture::start().await;
    let store = fixture.store().await;

    store.set(code("a"), "https://a.example", Some("u1")).await.unwrap();
    store.set(code("b"), "https://b.example", Some("u2")).await.unwrap();
    store.set(code("c"), "https://c.example", None).await.unwrap();

    assert_eq!(store.stats().await.unwrap(), StoreStats { urls: 3, users: 2 });
    store.ping().await.unwrap();

    store.close().await.unwrap();
    assert!(matches!(
        store.ping().await,
        Err(StorageError::Unavailable(_))
    ));
}
