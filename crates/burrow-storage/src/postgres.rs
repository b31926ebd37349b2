use crate::index::{owner, MAX_GENERATE_ATTEMPTS};
use async_trait::async_trait;
use burrow_core::error::Result;
use burrow_core::{Insertion, Lookup, Repository, ShortCode, StorageError, UrlRecord};
use burrow_generator::{Generator, RandomGenerator};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Schema for the `urls` table and its owner index.
pub const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

/// Fixed deadline for liveness checks, independent of any request deadline.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

const PRIMARY_KEY_CONSTRAINT: &str = "urls_pkey";

/// PostgreSQL implementation of the repository contract.
///
/// The database is the only source of truth; nothing is cached in process.
/// Duplicate URLs are resolved by the `UNIQUE (original_url)` constraint:
/// creates run `INSERT .. ON CONFLICT (original_url) DO NOTHING` and, when no
/// row was inserted, read the winning code back in the same transaction.
/// Concurrent callers racing on one URL therefore all end up with the same code.
///
/// Soft delete is implemented with `is_deleted`; rows are never removed.
#[derive(Debug, Clone)]
pub struct PostgresRepository<G = RandomGenerator> {
    pool: PgPool,
    generator: G,
}

impl PostgresRepository<RandomGenerator> {
    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(PgPoolOptions::new(), database_url, RandomGenerator::new()).await
    }
}

impl<G: Generator> PostgresRepository<G> {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool, generator: G) -> Self {
        Self { pool, generator }
    }

    /// Opens a pool with the given options and checks it is reachable.
    pub async fn connect_with(
        options: PgPoolOptions,
        database_url: &str,
        generator: G,
    ) -> Result<Self> {
        let pool = options
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        info!("connected to postgres");
        Ok(Self::new(pool, generator))
    }

    /// Creates the `urls` table and its index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!("ensured urls schema");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_insert(
        &self,
        candidate: &ShortCode,
        owner_id: &str,
        original_url: &str,
    ) -> std::result::Result<Insertion, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO urls (short_url, id, original_url, user_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (original_url) DO NOTHING
            "#,
        )
        .bind(candidate.as_str())
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(original_url)
        .bind(owner(owner_id))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            tx.commit().await?;
            return Ok(Insertion::Created(candidate.clone()));
        }

        let existing: String = sqlx::query_scalar(
            r#"
            SELECT short_url
            FROM urls
            WHERE original_url = $1
            "#,
        )
        .bind(original_url)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Insertion::Existing(ShortCode::new_unchecked(existing)))
    }
}

fn is_primary_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| {
        db.is_unique_violation() && db.constraint() == Some(PRIMARY_KEY_CONSTRAINT)
    })
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

#[async_trait]
impl<G: Generator> Repository for PostgresRepository<G> {
    async fn create(&self, owner_id: &str, original_url: &str) -> Result<Insertion> {
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let candidate = self.generator.generate();
            match self.try_insert(&candidate, owner_id, original_url).await {
                Ok(insertion) => {
                    debug!(code = %insertion.code(), owner = owner_id, created = matches!(insertion, Insertion::Created(_)), "create resolved");
                    return Ok(insertion);
                }
                // the dropped transaction rolls back
                Err(err) if is_primary_key_violation(&err) => {
                    debug!(code = %candidate, "generated short code collides, retrying");
                }
                Err(err) => return Err(map_sqlx_error(err)),
            }
        }

        Err(StorageError::CodeSpaceExhausted {
            attempts: MAX_GENERATE_ATTEMPTS,
        })
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        trace!(code = %code, "looking up short code");

        let row = sqlx::query(
            r#"
            SELECT original_url, is_deleted
            FROM urls
            WHERE short_url = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(Lookup::NotFound);
        };

        let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;
        if is_deleted {
            return Ok(Lookup::Deleted);
        }

        let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
        Ok(Lookup::Found(original_url))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, short_url, original_url, user_id
            FROM urls
            WHERE user_id = $1
              AND NOT is_deleted
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(UrlRecord {
                    id: row.try_get("id").map_err(map_sqlx_error)?,
                    short_code: ShortCode::new_unchecked(
                        row.try_get::<String, _>("short_url")
                            .map_err(map_sqlx_error)?,
                    ),
                    original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
                    owner_id: row.try_get("user_id").map_err(map_sqlx_error)?,
                    deleted: false,
                })
            })
            .collect()
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let codes: Vec<String> = codes.iter().map(|c| c.as_str().to_owned()).collect();
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET is_deleted = TRUE
            WHERE user_id = $1
              AND short_url = ANY($2)
              AND NOT is_deleted
            "#,
        )
        .bind(owner_id)
        .bind(&codes)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(owner = owner_id, requested = codes.len(), deleted = result.rows_affected(), "soft-deleted batch");
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StorageError::Timeout(format!("ping exceeded {PING_TIMEOUT:?}")))?
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("postgres pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_constraints() {
        assert!(SCHEMA.contains("short_url    TEXT PRIMARY KEY"));
        assert!(SCHEMA.contains("original_url TEXT NOT NULL UNIQUE"));
        assert!(SCHEMA.contains("urls_user_id_idx"));
    }

    #[test]
    fn pool_errors_map_to_unavailable_or_timeout() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StorageError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            StorageError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StorageError::InvalidData(_)
        ));
        assert!(!is_primary_key_violation(&sqlx::Error::RowNotFound));
    }
}
