use crate::error::{is_unique_violation, map_sqlx_error};
use async_trait::async_trait;
use snipurl_core::repository::{BatchOutcome, ReadRepository, Repository, Result, UrlRecord};
use snipurl_core::{ShortCode, StorageError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Row};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Table definition, applied by [`PostgresRepository::connect`].
pub const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL implementation of the repository contract.
///
/// Records live in a single `urls` table with a unique `short_url` column.
/// Soft delete is the `is_deleted` flag; rows are never removed. Batch
/// operations run in one transaction each, which is rolled back on any
/// error path, including when the future is dropped.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    ///
    /// The `urls` table is expected to exist; see [`Self::ensure_schema`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool and creates the `urls` table if it is absent.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        let repository = Self::new(pool);
        repository.ensure_schema().await?;
        info!("connected to postgres and ensured urls table");
        Ok(repository)
    }

    /// Creates the `urls` table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Closes every connection of the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("postgres connection pool closed");
    }
}

fn record_from_row(row: &PgRow) -> Result<UrlRecord> {
    let code: String = row.try_get("short_url").map_err(map_sqlx_error)?;
    Ok(UrlRecord {
        code: ShortCode::new_unchecked(code),
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
    })
}

async fn fetch_record<'e, E>(executor: E, code: &'e str) -> Result<Option<UrlRecord>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT short_url, user_id, original_url, is_deleted
        FROM urls
        WHERE short_url = $1
        "#,
    )
    .bind(code)
    .fetch_optional(executor)
    .await
    .map_err(map_sqlx_error)?;

    row.as_ref().map(record_from_row).transpose()
}

/// Decides whether a unique violation was an idempotent re-submission.
fn check_existing(existing: Option<UrlRecord>, record: &UrlRecord) -> Result<()> {
    match existing {
        Some(stored) if stored.same_binding(record) => Ok(()),
        _ => Err(StorageError::Conflict(record.code.clone())),
    }
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        trace!(code = %code, "looking up short code");
        fetch_record(&self.pool, code.as_str()).await
    }

    async fn owner_records(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT short_url, user_id, original_url, is_deleted
            FROM urls
            WHERE user_id = $1
              AND NOT is_deleted
            ORDER BY id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn save(&self, record: UrlRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO urls (user_id, short_url, original_url)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&record.owner_id)
        .bind(record.code.as_str())
        .bind(&record.original_url)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(code = %record.code, "inserted record");
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                let existing = fetch_record(&self.pool, record.code.as_str()).await?;
                check_existing(existing, &record).inspect_err(|_| {
                    warn!(code = %record.code, "short code already bound to other content");
                })
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn save_batch(&self, records: Vec<UrlRecord>) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut outcome = BatchOutcome::default();

        for record in records {
            let inserted = sqlx::query(
                r#"
                INSERT INTO urls (user_id, short_url, original_url)
                VALUES ($1, $2, $3)
                ON CONFLICT (short_url) DO NOTHING
                "#,
            )
            .bind(&record.owner_id)
            .bind(record.code.as_str())
            .bind(&record.original_url)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

            if inserted > 0 {
                outcome.inserted += 1;
                continue;
            }

            let existing = fetch_record(&mut *tx, record.code.as_str()).await?;
            if check_existing(existing, &record).is_err() {
                warn!(code = %record.code, "skipping conflicting batch record");
                outcome.conflicts.push(record.code);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            inserted = outcome.inserted,
            conflicts = outcome.conflicts.len(),
            "committed batch"
        );
        Ok(outcome)
    }

    async fn delete_owner_records(&self, owner_id: &str, codes: &[ShortCode]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut deleted = 0;

        for code in codes {
            deleted += sqlx::query(
                r#"
                UPDATE urls
                SET is_deleted = TRUE
                WHERE user_id = $1
                  AND short_url = $2
                  AND NOT is_deleted
                "#,
            )
            .bind(owner_id)
            .bind(code.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            owner_id,
            requested = codes.len(),
            deleted,
            "soft-deleted owner records"
        );
        Ok(deleted as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, owner: &str) -> UrlRecord {
        UrlRecord::new(ShortCode::new_unchecked("abc123"), url, owner)
    }

    #[test]
    fn schema_creates_urls_table() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS urls"));
        assert!(SCHEMA.contains("short_url TEXT NOT NULL UNIQUE"));
        assert!(SCHEMA.contains("is_deleted BOOLEAN NOT NULL DEFAULT FALSE"));
    }

    #[test]
    fn identical_existing_record_is_not_a_conflict() {
        let stored = record("https://example.com", "u1");
        assert!(check_existing(Some(stored), &record("https://example.com", "u1")).is_ok());
    }

    #[test]
    fn different_existing_record_is_a_conflict() {
        let stored = record("https://example.com", "u1");
        let err = check_existing(Some(stored), &record("https://example.com", "u2")).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn vanished_existing_record_is_a_conflict() {
        let err = check_existing(None, &record("https://example.com", "u1")).unwrap_err();
        assert!(err.is_conflict());
    }
}
