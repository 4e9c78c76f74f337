//! Insight repository implementation: batch insights, the aggregation
//! layers, and the executive summary.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geolens_core::{
    BatchInsight, CategoryInsight, Error, ExecutiveSummary, InsightRepository, InsightType,
    QueryCategory, RankedItem, Result, StrategicPriority,
};

/// PostgreSQL implementation of InsightRepository.
pub struct PgInsightRepository {
    pool: Pool<Postgres>,
}

impl PgInsightRepository {
    /// Create a new PgInsightRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_category(raw: &str) -> Result<QueryCategory> {
        QueryCategory::parse(raw)
            .ok_or_else(|| Error::Internal(format!("unknown insight category: {raw}")))
    }

    fn parse_insight_type(raw: &str) -> Result<InsightType> {
        InsightType::parse(raw)
            .ok_or_else(|| Error::Internal(format!("unknown insight type: {raw}")))
    }
}

#[async_trait]
impl InsightRepository for PgInsightRepository {
    async fn replace_batch_insights(&self, insights: &[BatchInsight]) -> Result<()> {
        if insights.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for insight in insights {
            sqlx::query(
                "INSERT INTO batch_insights (job_id, category, batch_index, insight_type, items, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (job_id, category, batch_index, insight_type)
                 DO UPDATE SET items = EXCLUDED.items, created_at = EXCLUDED.created_at",
            )
            .bind(insight.job_id)
            .bind(insight.category.as_str())
            .bind(insight.batch_index)
            .bind(insight.insight_type.as_str())
            .bind(serde_json::to_value(&insight.items)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_batch_insights(&self, job_id: Uuid) -> Result<Vec<BatchInsight>> {
        let rows = sqlx::query(
            "SELECT job_id, category, batch_index, insight_type, items
             FROM batch_insights WHERE job_id = $1
             ORDER BY category ASC, batch_index ASC, insight_type ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let category: String = row.get("category");
                let insight_type: String = row.get("insight_type");
                let items: serde_json::Value = row.get("items");
                Ok(BatchInsight {
                    job_id: row.get("job_id"),
                    category: Self::parse_category(&category)?,
                    batch_index: row.get("batch_index"),
                    insight_type: Self::parse_insight_type(&insight_type)?,
                    items: serde_json::from_value(items)
                        .map_err(|e| Error::Serialization(format!("invalid batch items: {e}")))?,
                })
            })
            .collect()
    }

    async fn upsert_category_insights(&self, insights: &[CategoryInsight]) -> Result<()> {
        if insights.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for insight in insights {
            sqlx::query(
                "INSERT INTO category_insights (job_id, category, insight_type, items, created_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (job_id, category, insight_type)
                 DO UPDATE SET items = EXCLUDED.items, created_at = EXCLUDED.created_at",
            )
            .bind(insight.job_id)
            .bind(insight.category.as_str())
            .bind(insight.insight_type.as_str())
            .bind(serde_json::to_value(&insight.items)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_category_insights(&self, job_id: Uuid) -> Result<Vec<CategoryInsight>> {
        let rows = sqlx::query(
            "SELECT job_id, category, insight_type, items
             FROM category_insights WHERE job_id = $1
             ORDER BY category ASC, insight_type ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let category: String = row.get("category");
                let insight_type: String = row.get("insight_type");
                let items: serde_json::Value = row.get("items");
                let items: Vec<RankedItem> = serde_json::from_value(items)
                    .map_err(|e| Error::Serialization(format!("invalid ranked items: {e}")))?;
                Ok(CategoryInsight {
                    job_id: row.get("job_id"),
                    category: Self::parse_category(&category)?,
                    insight_type: Self::parse_insight_type(&insight_type)?,
                    items,
                })
            })
            .collect()
    }

    async fn replace_strategic_priorities(
        &self,
        job_id: Uuid,
        priorities: &[StrategicPriority],
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Keyed per-job delete, then insert the fresh ranking.
        sqlx::query("DELETE FROM strategic_priorities WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for priority in priorities {
            sqlx::query(
                "INSERT INTO strategic_priorities (job_id, insight_type, rank, title, rationale, source_categories, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(job_id)
            .bind(priority.insight_type.as_str())
            .bind(priority.rank)
            .bind(&priority.title)
            .bind(&priority.rationale)
            .bind(serde_json::to_value(&priority.source_categories)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_strategic_priorities(&self, job_id: Uuid) -> Result<Vec<StrategicPriority>> {
        let rows = sqlx::query(
            "SELECT job_id, insight_type, rank, title, rationale, source_categories
             FROM strategic_priorities WHERE job_id = $1
             ORDER BY insight_type ASC, rank ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let insight_type: String = row.get("insight_type");
                let source_categories: serde_json::Value = row.get("source_categories");
                Ok(StrategicPriority {
                    job_id: row.get("job_id"),
                    insight_type: Self::parse_insight_type(&insight_type)?,
                    rank: row.get("rank"),
                    title: row.get("title"),
                    rationale: row.get("rationale"),
                    source_categories: serde_json::from_value(source_categories).map_err(|e| {
                        Error::Serialization(format!("invalid source categories: {e}"))
                    })?,
                })
            })
            .collect()
    }

    async fn upsert_executive_summary(&self, summary: &ExecutiveSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO executive_summaries (job_id, narrative, persona, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (job_id)
             DO UPDATE SET narrative = EXCLUDED.narrative, persona = EXCLUDED.persona,
                           created_at = EXCLUDED.created_at",
        )
        .bind(summary.job_id)
        .bind(&summary.narrative)
        .bind(&summary.persona)
        .bind(summary.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get_executive_summary(&self, job_id: Uuid) -> Result<Option<ExecutiveSummary>> {
        let row = sqlx::query(
            "SELECT job_id, narrative, persona, created_at
             FROM executive_summaries WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| ExecutiveSummary {
            job_id: row.get("job_id"),
            narrative: row.get("narrative"),
            persona: row.get("persona"),
            created_at: row.get("created_at"),
        }))
    }

    async fn has_executive_summary(&self, job_id: Uuid) -> Result<bool> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM executive_summaries WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(exists.is_some())
    }
}
