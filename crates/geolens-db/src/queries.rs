//! Probe query repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geolens_core::{
    Error, NewProbeQuery, ProbeQuery, ProbeQueryRepository, QueryCategory, Result,
};

/// PostgreSQL implementation of ProbeQueryRepository.
pub struct PgProbeQueryRepository {
    pool: Pool<Postgres>,
}

impl PgProbeQueryRepository {
    /// Create a new PgProbeQueryRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_query_row(row: sqlx::postgres::PgRow) -> Result<ProbeQuery> {
        let category: String = row.get("category");
        Ok(ProbeQuery {
            id: row.get("id"),
            job_id: row.get("job_id"),
            text: row.get("text"),
            category: QueryCategory::parse(&category)
                .ok_or_else(|| Error::Internal(format!("unknown query category: {category}")))?,
            weight: row.get("weight"),
            covered_providers: row.get("covered_providers"),
            failed_providers: row.get("failed_providers"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ProbeQueryRepository for PgProbeQueryRepository {
    async fn insert_many(
        &self,
        job_id: Uuid,
        queries: &[NewProbeQuery],
    ) -> Result<Vec<ProbeQuery>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = Vec::with_capacity(queries.len());

        for query in queries {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO probe_queries (id, job_id, text, category, weight, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(id)
            .bind(job_id)
            .bind(&query.text)
            .bind(query.category.as_str())
            .bind(query.weight)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            inserted.push(ProbeQuery {
                id,
                job_id,
                text: query.text.clone(),
                category: query.category,
                weight: query.weight,
                covered_providers: 0,
                failed_providers: 0,
                created_at: now,
            });
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ProbeQuery>> {
        let rows = sqlx::query(
            "SELECT id, job_id, text, category, weight, covered_providers, failed_providers, created_at
             FROM probe_queries WHERE job_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_query_row).collect()
    }

    async fn record_coverage(&self, query_id: Uuid, covered: i32, failed: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE probe_queries SET covered_providers = $1, failed_providers = $2 WHERE id = $3",
        )
        .bind(covered)
        .bind(failed)
        .bind(query_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "coverage update matched no row for query {query_id}"
            )));
        }
        Ok(())
    }
}
