//! Response cache repository implementation.
//!
//! Enumeration and expiry purge use keyset pagination over the primary key
//! with a bounded page size. A blocking full-keyspace listing on the shared
//! cache previously risked freezing it under load; nothing here issues one.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Pool, Postgres};
use tracing::debug;

use geolens_core::{Error, ResponseCacheRepository, Result};

/// PostgreSQL implementation of ResponseCacheRepository.
pub struct PgResponseCacheRepository {
    pool: Pool<Postgres>,
}

impl PgResponseCacheRepository {
    /// Create a new PgResponseCacheRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResponseCacheRepository for PgResponseCacheRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM response_cache WHERE cache_key = $1 AND expires_at > $2",
        )
        .bind(key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(body)
    }

    async fn put(&self, key: &str, provider: &str, body: &str, ttl_secs: i64) -> Result<()> {
        let expires_at = Utc::now() + Duration::seconds(ttl_secs.max(0));

        sqlx::query(
            "INSERT INTO response_cache (cache_key, provider, body, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (cache_key)
             DO UPDATE SET provider = EXCLUDED.provider, body = EXCLUDED.body,
                           expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(provider)
        .bind(body)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn scan_keys(
        &self,
        cursor: Option<String>,
        limit: i64,
    ) -> Result<(Vec<String>, Option<String>)> {
        let limit = limit.max(1);
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT cache_key FROM response_cache
             WHERE ($1::text IS NULL OR cache_key > $1)
             ORDER BY cache_key ASC
             LIMIT $2",
        )
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let next = if keys.len() as i64 == limit {
            keys.last().cloned()
        } else {
            None
        };
        Ok((keys, next))
    }

    async fn purge_expired(&self, page_size: i64) -> Result<u64> {
        let page_size = page_size.max(1);
        let now = Utc::now();
        let mut removed = 0u64;

        loop {
            let result = sqlx::query(
                "DELETE FROM response_cache
                 WHERE cache_key IN (
                     SELECT cache_key FROM response_cache
                     WHERE expires_at <= $1
                     ORDER BY cache_key ASC
                     LIMIT $2
                 )",
            )
            .bind(now)
            .bind(page_size)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            let batch = result.rows_affected();
            removed += batch;
            if batch < page_size as u64 {
                break;
            }
        }

        if removed > 0 {
            debug!(removed, "Purged expired cache entries");
        }
        Ok(removed)
    }
}
