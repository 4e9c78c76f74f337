//! Response item repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geolens_core::{
    Error, NewResponseItem, QueryCategory, ResponseItem, ResponseItemRepository, Result,
};

/// PostgreSQL implementation of ResponseItemRepository.
pub struct PgResponseItemRepository {
    pool: Pool<Postgres>,
}

impl PgResponseItemRepository {
    /// Create a new PgResponseItemRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_item_row(row: sqlx::postgres::PgRow) -> Result<ResponseItem> {
        let category: String = row.get("category");
        Ok(ResponseItem {
            id: row.get("id"),
            job_id: row.get("job_id"),
            query_id: row.get("query_id"),
            provider: row.get("provider"),
            category: QueryCategory::parse(&category)
                .ok_or_else(|| Error::Internal(format!("unknown item category: {category}")))?,
            seq: row.get("seq"),
            raw_text: row.get("raw_text"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ResponseItemRepository for PgResponseItemRepository {
    async fn insert_many(
        &self,
        job_id: Uuid,
        items: &[NewResponseItem],
    ) -> Result<Vec<ResponseItem>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = Vec::with_capacity(items.len());

        for item in items {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO response_items (id, job_id, query_id, provider, category, seq, raw_text, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(id)
            .bind(job_id)
            .bind(item.query_id)
            .bind(&item.provider)
            .bind(item.category.as_str())
            .bind(item.seq)
            .bind(&item.raw_text)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            inserted.push(ResponseItem {
                id,
                job_id,
                query_id: item.query_id,
                provider: item.provider.clone(),
                category: item.category,
                seq: item.seq,
                raw_text: item.raw_text.clone(),
                created_at: now,
            });
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ResponseItem>> {
        let rows = sqlx::query(
            "SELECT id, job_id, query_id, provider, category, seq, raw_text, created_at
             FROM response_items WHERE job_id = $1
             ORDER BY category ASC, seq ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_item_row).collect()
    }

    async fn count_for_job(&self, job_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM response_items WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}
