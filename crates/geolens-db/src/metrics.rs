//! Item metrics repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geolens_core::{
    Error, ItemMetrics, ItemMetricsRepository, QualityTier, Result, Sentiment,
};

/// PostgreSQL implementation of ItemMetricsRepository.
pub struct PgItemMetricsRepository {
    pool: Pool<Postgres>,
}

impl PgItemMetricsRepository {
    /// Create a new PgItemMetricsRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_metrics_row(row: sqlx::postgres::PgRow) -> Result<ItemMetrics> {
        let sentiment: String = row.get("sentiment");
        let quality_tier: String = row.get("quality_tier");
        let features: serde_json::Value = row.get("features");
        let value_props: serde_json::Value = row.get("value_props");
        let competitors: serde_json::Value = row.get("competitors");

        let parse_list = |value: serde_json::Value, field: &str| -> Result<Vec<String>> {
            serde_json::from_value(value)
                .map_err(|e| Error::Serialization(format!("invalid {field} list: {e}")))
        };

        Ok(ItemMetrics {
            response_item_id: row.get("response_item_id"),
            job_id: row.get("job_id"),
            mentioned: row.get("mentioned"),
            mention_position: row.get("mention_position"),
            sentiment: match sentiment.as_str() {
                "positive" => Sentiment::Positive,
                "negative" => Sentiment::Negative,
                "mixed" => Sentiment::Mixed,
                _ => Sentiment::Neutral,
            },
            quality_tier: match quality_tier.as_str() {
                "high" => QualityTier::High,
                "low" => QualityTier::Low,
                _ => QualityTier::Medium,
            },
            features: parse_list(features, "features")?,
            value_props: parse_list(value_props, "value_props")?,
            competitors: parse_list(competitors, "competitors")?,
            relevance_score: row.get("relevance_score"),
            prominence_score: row.get("prominence_score"),
            accuracy_score: row.get("accuracy_score"),
            authority_score: row.get("authority_score"),
            geo_score: row.get("geo_score"),
            mention_count: row.get("mention_count"),
            total_count: row.get("total_count"),
            sov_score: row.get("sov_score"),
            feature_coverage_score: row.get("feature_coverage_score"),
            value_prop_score: row.get("value_prop_score"),
            competitor_context_score: row.get("competitor_context_score"),
            context_score: row.get("context_score"),
            extras: row.get("extras"),
        })
    }
}

#[async_trait]
impl ItemMetricsRepository for PgItemMetricsRepository {
    async fn write_batch(&self, metrics: &[ItemMetrics]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for m in metrics {
            // The FK on response_item_id turns a write against an unknown
            // item into a hard error instead of a silent no-op; the
            // affected-row check catches anything else that slips through.
            let result = sqlx::query(
                "INSERT INTO item_metrics (
                     response_item_id, job_id, mentioned, mention_position, sentiment,
                     quality_tier, features, value_props, competitors,
                     relevance_score, prominence_score, accuracy_score, authority_score,
                     geo_score, mention_count, total_count, sov_score,
                     feature_coverage_score, value_prop_score, competitor_context_score,
                     context_score, extras, updated_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                           $15, $16, $17, $18, $19, $20, $21, $22, $23)
                 ON CONFLICT (response_item_id) DO UPDATE SET
                     mentioned = EXCLUDED.mentioned,
                     mention_position = EXCLUDED.mention_position,
                     sentiment = EXCLUDED.sentiment,
                     quality_tier = EXCLUDED.quality_tier,
                     features = EXCLUDED.features,
                     value_props = EXCLUDED.value_props,
                     competitors = EXCLUDED.competitors,
                     relevance_score = EXCLUDED.relevance_score,
                     prominence_score = EXCLUDED.prominence_score,
                     accuracy_score = EXCLUDED.accuracy_score,
                     authority_score = EXCLUDED.authority_score,
                     geo_score = EXCLUDED.geo_score,
                     mention_count = EXCLUDED.mention_count,
                     total_count = EXCLUDED.total_count,
                     sov_score = EXCLUDED.sov_score,
                     feature_coverage_score = EXCLUDED.feature_coverage_score,
                     value_prop_score = EXCLUDED.value_prop_score,
                     competitor_context_score = EXCLUDED.competitor_context_score,
                     context_score = EXCLUDED.context_score,
                     extras = EXCLUDED.extras,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(m.response_item_id)
            .bind(m.job_id)
            .bind(m.mentioned)
            .bind(m.mention_position)
            .bind(m.sentiment.as_str())
            .bind(m.quality_tier.as_str())
            .bind(serde_json::to_value(&m.features)?)
            .bind(serde_json::to_value(&m.value_props)?)
            .bind(serde_json::to_value(&m.competitors)?)
            .bind(m.relevance_score)
            .bind(m.prominence_score)
            .bind(m.accuracy_score)
            .bind(m.authority_score)
            .bind(m.geo_score)
            .bind(m.mention_count)
            .bind(m.total_count)
            .bind(m.sov_score)
            .bind(m.feature_coverage_score)
            .bind(m.value_prop_score)
            .bind(m.competitor_context_score)
            .bind(m.context_score)
            .bind(&m.extras)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            if result.rows_affected() == 0 {
                return Err(Error::Job(format!(
                    "metrics write matched no row for response item {}",
                    m.response_item_id
                )));
            }
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ItemMetrics>> {
        let rows = sqlx::query(
            "SELECT m.response_item_id, m.job_id, m.mentioned, m.mention_position, m.sentiment,
                    m.quality_tier, m.features, m.value_props, m.competitors,
                    m.relevance_score, m.prominence_score, m.accuracy_score, m.authority_score,
                    m.geo_score, m.mention_count, m.total_count, m.sov_score,
                    m.feature_coverage_score, m.value_prop_score, m.competitor_context_score,
                    m.context_score, m.extras
             FROM item_metrics m
             JOIN response_items r ON r.id = m.response_item_id
             WHERE m.job_id = $1
             ORDER BY r.category ASC, r.seq ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_metrics_row).collect()
    }
}
