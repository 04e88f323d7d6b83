use crate::tombstone::TombstoneExecutor;
use async_trait::async_trait;
use linkstore_core::{
    DeleteOutcome, DeleteRequest, Result, ShortCode, StorageError, StoreStats, UrlRecord,
};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};
use tracing::{debug, info, trace};

/// MySQL implementation of the relational backend.
///
/// Soft delete is implemented with `is_deleted`. Loads only return live
/// rows; owner queries return tombstoned rows too, flagged as deleted.
/// `short_url` carries a unique constraint, so a second insert of the
/// same code is reported as [`StorageError::Conflict`].
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// Creates a backend from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a backend by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Loads every live record.
    pub async fn load_all(&self) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT short_url, original_url, user_id, is_deleted
            FROM shorten_urls
            WHERE is_deleted = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;
        info!(count = records.len(), "loaded records from mysql");
        Ok(records)
    }

    pub async fn insert_one(&self, record: &UrlRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO shorten_urls (original_url, short_url, user_id)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&record.original_url)
        .bind(record.short_code.as_str())
        .bind(record.owner_id.as_deref())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(map_insert_error(&record.short_code, err)),
        }
    }

    /// Inserts each record with its own statement on a single connection.
    ///
    /// Stops at the first failing statement and returns its error. Rows
    /// inserted before the failure stay in place.
    pub async fn insert_batch(&self, records: &[UrlRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;

        for record in records {
            trace!(code = %record.short_code, "inserting batch row");
            sqlx::query(
                r#"
                INSERT INTO shorten_urls (original_url, short_url, user_id)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&record.original_url)
            .bind(record.short_code.as_str())
            .bind(record.owner_id.as_deref())
            .execute(&mut *conn)
            .await
            .map_err(|err| map_insert_error(&record.short_code, err))?;
        }

        debug!(count = records.len(), "inserted batch into mysql");
        Ok(())
    }

    /// Returns every record of an owner, including tombstoned ones.
    pub async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT short_url, original_url, user_id, is_deleted
            FROM shorten_urls
            WHERE user_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_record).collect()
    }

    /// Marks the requested rows as deleted inside one transaction.
    ///
    /// An item succeeds when its `UPDATE` touched a row, i.e. the code
    /// exists, belongs to the requesting owner and was still live. Any
    /// statement error aborts the whole transaction.
    pub async fn mark_deleted_batch(&self, requests: &[DeleteRequest]) -> Result<Vec<DeleteOutcome>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut outcomes = Vec::with_capacity(requests.len());

        for request in requests {
            let result = sqlx::query(
                r#"
                UPDATE shorten_urls
                SET is_deleted = TRUE
                WHERE user_id = ? AND short_url = ?
                "#,
            )
            .bind(&request.owner_id)
            .bind(request.short_code.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            outcomes.push(DeleteOutcome {
                short_code: request.short_code.clone(),
                succeeded: result.rows_affected() > 0,
            });
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(outcomes)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS urls, COUNT(DISTINCT user_id) AS users
            FROM shorten_urls
            WHERE is_deleted = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let users: i64 = row.try_get("users").map_err(map_sqlx_error)?;

        Ok(StoreStats {
            urls: urls.max(0) as u64,
            users: users.max(0) as u64,
        })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Closes the pool. Further queries fail with `Unavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TombstoneExecutor for MySqlBackend {
    async fn execute(&self, batch: &[DeleteRequest]) -> Result<Vec<DeleteOutcome>> {
        self.mark_deleted_batch(batch).await
    }
}

fn row_to_record(row: &MySqlRow) -> Result<UrlRecord> {
    let short_url: String = row.try_get("short_url").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let user_id: Option<String> = row.try_get("user_id").map_err(map_sqlx_error)?;
    let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;

    let mut record = UrlRecord::new(ShortCode::new_unchecked(short_url), original_url, user_id);
    record.deleted = is_deleted;
    Ok(record)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_insert_error(code: &ShortCode, err: sqlx::Error) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(code.to_string())
    } else {
        map_sqlx_error(err)
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}
