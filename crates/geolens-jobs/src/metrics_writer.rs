//! Metrics writer.
//!
//! Validates and persists the per-item metrics array from an extraction
//! round, 1:1 with the batch's input ordering. The hard rule lives here: a
//! returned array whose length differs from the batch size is discarded
//! wholesale, never padded or guessed. Misaligned ordering would silently
//! corrupt which item each record describes, which is strictly worse than
//! no data.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use geolens_core::defaults::PAYLOAD_SAMPLE_LEN;
use geolens_core::validation::{
    clamp_score, coerce_string_list_default, context_score, geo_score, mention_counts,
    payload_sample, sanitize_extras, sanitize_quality_tier, sanitize_sentiment, share_of_voice,
};
use geolens_core::{ItemMetrics, ItemMetricsRepository, ResponseItem, Result, ScoreWeights};

use crate::extraction::RawItemMetrics;

/// Validates and persists per-item metrics batches.
pub struct MetricsWriter {
    metrics: Arc<dyn ItemMetricsRepository>,
    weights: ScoreWeights,
}

impl MetricsWriter {
    /// Create a new writer with the given weighting policy.
    pub fn new(metrics: Arc<dyn ItemMetricsRepository>, weights: ScoreWeights) -> Self {
        Self { metrics, weights }
    }

    /// Validate and persist one batch's metrics.
    ///
    /// Returns the number of rows persisted: the full batch, or zero when
    /// the array was missing or misaligned. Persistence failures (unknown
    /// item id, connection error) propagate as hard errors.
    pub async fn write_batch(
        &self,
        job_id: Uuid,
        batch: &[ResponseItem],
        raw: Option<Vec<RawItemMetrics>>,
    ) -> Result<usize> {
        let Some(raw) = raw else {
            warn!(%job_id, batch_len = batch.len(), "No per-item metrics for batch, skipping");
            return Ok(0);
        };

        if raw.len() != batch.len() {
            let sample = serde_json::to_string(
                &raw.iter()
                    .map(|r| r.mentioned)
                    .collect::<Vec<_>>(),
            )
            .unwrap_or_default();
            warn!(
                %job_id,
                expected = batch.len(),
                got = raw.len(),
                payload_sample = %payload_sample(&sample, PAYLOAD_SAMPLE_LEN),
                "Per-item metrics length mismatch, discarding batch"
            );
            return Ok(0);
        }

        let rows: Vec<ItemMetrics> = batch
            .iter()
            .zip(raw)
            .map(|(item, raw)| self.sanitize_row(job_id, item, raw))
            .collect();

        self.metrics.write_batch(&rows).await?;
        debug!(%job_id, rows = rows.len(), "Persisted per-item metrics batch");
        Ok(rows.len())
    }

    /// Sanitize one raw record into a validated row for `item`.
    fn sanitize_row(&self, job_id: Uuid, item: &ResponseItem, raw: RawItemMetrics) -> ItemMetrics {
        let relevance = clamp_score(raw.relevance_score.unwrap_or(0.0));
        let prominence = clamp_score(raw.prominence_score.unwrap_or(0.0));
        let accuracy = clamp_score(raw.accuracy_score.unwrap_or(0.0));
        let authority = clamp_score(raw.authority_score.unwrap_or(0.0));

        let feature_coverage = clamp_score(raw.feature_coverage_score.unwrap_or(0.0));
        let value_prop = clamp_score(raw.value_prop_score.unwrap_or(0.0));
        let competitor_context = clamp_score(raw.competitor_context_score.unwrap_or(0.0));

        let (mention_count, total_count) =
            mention_counts(raw.mention_count.unwrap_or(0), raw.total_count.unwrap_or(0));

        ItemMetrics {
            response_item_id: item.id,
            job_id,
            mentioned: raw.mentioned.unwrap_or(false),
            mention_position: raw.mention_position.filter(|&p| p >= 1),
            sentiment: sanitize_sentiment(raw.sentiment.as_deref()),
            quality_tier: sanitize_quality_tier(raw.quality_tier.as_deref()),
            features: coerce_string_list_default(&raw.features),
            value_props: coerce_string_list_default(&raw.value_props),
            competitors: coerce_string_list_default(&raw.competitors),
            relevance_score: relevance,
            prominence_score: prominence,
            accuracy_score: accuracy,
            authority_score: authority,
            geo_score: geo_score(relevance, prominence, accuracy, authority, &self.weights),
            mention_count,
            total_count,
            sov_score: share_of_voice(
                raw.mention_count.unwrap_or(0),
                raw.total_count.unwrap_or(0),
            ),
            feature_coverage_score: feature_coverage,
            value_prop_score: value_prop,
            competitor_context_score: competitor_context,
            context_score: context_score(
                feature_coverage,
                value_prop,
                competitor_context,
                &self.weights,
            ),
            extras: sanitize_extras(raw.extras),
        }
    }
}
