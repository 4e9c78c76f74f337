//! Batch extraction engine.
//!
//! Groups a category's response items into fixed-size batches; per batch,
//! issues exactly four concurrent calls against the analysis backend: three
//! aggregate-insight extractions (recommendations, competitive gaps, content
//! opportunities) and one structured per-item-metrics extraction. One call
//! analyzing all N items at once gives per-item granularity without a
//! per-item call, and the sibling insight calls see patterns across the
//! whole batch instead of one item in isolation.
//!
//! A failure of one call type yields an empty result for that type only; it
//! never cancels or blocks the other three.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use geolens_core::defaults::{EXTRACTION_BATCH_SIZE, METRIC_LIST_MAX, PAYLOAD_SAMPLE_LEN};
use geolens_core::validation::{coerce_string_list, payload_sample};
use geolens_core::{
    Error, GenerationBackend, InsightType, QueryCategory, ResponseItem, Result, TargetProfile,
};

use crate::prompts;

/// Configuration for the batch extraction engine.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Response items per batch.
    pub batch_size: usize,
    /// Maximum entries retained per aggregate insight list.
    pub list_max: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: EXTRACTION_BATCH_SIZE,
            list_max: METRIC_LIST_MAX,
        }
    }
}

impl ExtractionConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GEOLENS_BATCH_SIZE` | `8` | Response items per extraction batch |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: std::env::var("GEOLENS_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size)
                .max(1),
            ..defaults
        }
    }
}

/// Raw per-item metrics as returned by the model, before sanitization.
///
/// Every field is optional or lenient; the metrics writer turns this into a
/// validated [`geolens_core::ItemMetrics`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItemMetrics {
    #[serde(default)]
    pub mentioned: Option<bool>,
    #[serde(default)]
    pub mention_position: Option<i32>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub quality_tier: Option<String>,
    #[serde(default)]
    pub features: JsonValue,
    #[serde(default)]
    pub value_props: JsonValue,
    #[serde(default)]
    pub competitors: JsonValue,
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub prominence_score: Option<f64>,
    #[serde(default)]
    pub accuracy_score: Option<f64>,
    #[serde(default)]
    pub authority_score: Option<f64>,
    #[serde(default)]
    pub mention_count: Option<i64>,
    #[serde(default)]
    pub total_count: Option<i64>,
    #[serde(default)]
    pub feature_coverage_score: Option<f64>,
    #[serde(default)]
    pub value_prop_score: Option<f64>,
    #[serde(default)]
    pub competitor_context_score: Option<f64>,
    #[serde(default)]
    pub extras: JsonValue,
}

/// Result of one batch's four extraction calls, reassembled by call-type tag.
#[derive(Debug, Clone, Default)]
pub struct BatchExtraction {
    pub recommendations: Vec<String>,
    pub competitive_gaps: Vec<String>,
    pub content_opportunities: Vec<String>,
    /// None when the structured call failed or returned unusable output.
    pub item_metrics: Option<Vec<RawItemMetrics>>,
}

impl BatchExtraction {
    /// Aggregate insight items for one call type.
    pub fn insight_items(&self, insight_type: InsightType) -> &[String] {
        match insight_type {
            InsightType::Recommendations => &self.recommendations,
            InsightType::CompetitiveGaps => &self.competitive_gaps,
            InsightType::ContentOpportunities => &self.content_opportunities,
        }
    }
}

/// Runs the four-call extraction round for each batch.
pub struct BatchExtractor {
    analyst: Arc<dyn GenerationBackend>,
    config: ExtractionConfig,
}

impl BatchExtractor {
    /// Create a new extractor using the given analysis backend.
    pub fn new(analyst: Arc<dyn GenerationBackend>, config: ExtractionConfig) -> Self {
        Self { analyst, config }
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Run the four extraction calls for one batch concurrently.
    #[instrument(skip_all, fields(category = %category, item_count = batch.len()))]
    pub async fn extract(
        &self,
        profile: &TargetProfile,
        category: QueryCategory,
        batch: &[ResponseItem],
    ) -> BatchExtraction {
        let system = prompts::analysis_system(profile);

        let (recommendations, competitive_gaps, content_opportunities, item_metrics) = tokio::join!(
            self.insight_call(&system, profile, category, InsightType::Recommendations, batch),
            self.insight_call(&system, profile, category, InsightType::CompetitiveGaps, batch),
            self.insight_call(
                &system,
                profile,
                category,
                InsightType::ContentOpportunities,
                batch
            ),
            self.metrics_call(&system, profile, batch),
        );

        debug!(
            recommendations = recommendations.len(),
            competitive_gaps = competitive_gaps.len(),
            content_opportunities = content_opportunities.len(),
            has_metrics = item_metrics.is_some(),
            "Batch extraction complete"
        );

        BatchExtraction {
            recommendations,
            competitive_gaps,
            content_opportunities,
            item_metrics,
        }
    }

    /// One aggregate-insight call. Failure degrades to an empty list.
    async fn insight_call(
        &self,
        system: &str,
        profile: &TargetProfile,
        category: QueryCategory,
        insight_type: InsightType,
        batch: &[ResponseItem],
    ) -> Vec<String> {
        let prompt = prompts::batch_insight_prompt(profile, category, insight_type, batch);

        match self.analyst.generate_with_system(system, &prompt).await {
            Ok(raw) => match parse_string_array(&raw, self.config.list_max) {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        insight_type = %insight_type,
                        error = %e,
                        payload_sample = %payload_sample(&raw, PAYLOAD_SAMPLE_LEN),
                        "Malformed insight extraction output, treating as empty"
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(insight_type = %insight_type, error = %e, "Insight extraction call failed");
                Vec::new()
            }
        }
    }

    /// The structured per-item-metrics call. Failure degrades to None; the
    /// metrics writer enforces the length-exact rule.
    async fn metrics_call(
        &self,
        system: &str,
        profile: &TargetProfile,
        batch: &[ResponseItem],
    ) -> Option<Vec<RawItemMetrics>> {
        let prompt = prompts::item_metrics_prompt(profile, batch);

        match self.analyst.generate_with_system(system, &prompt).await {
            Ok(raw) => match parse_metrics_array(&raw) {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(
                        error = %e,
                        payload_sample = %payload_sample(&raw, PAYLOAD_SAMPLE_LEN),
                        "Malformed per-item metrics output, discarding"
                    );
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Per-item metrics call failed");
                None
            }
        }
    }
}

/// Slice a category's items into fixed-size batches, preserving order.
pub fn slice_batches(items: &[ResponseItem], batch_size: usize) -> Vec<&[ResponseItem]> {
    items.chunks(batch_size.max(1)).collect()
}

/// Strip a surrounding Markdown code fence, if present.
pub(crate) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", …) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a JSON array of strings, coercing scalars and truncating to `max`.
pub(crate) fn parse_string_array(raw: &str, max: usize) -> Result<Vec<String>> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| Error::Serialization(format!("expected JSON array: {e}")))?;
    if !value.is_array() {
        return Err(Error::Serialization(format!(
            "expected JSON array, got {}",
            match value {
                JsonValue::Object(_) => "object",
                JsonValue::String(_) => "string",
                _ => "scalar",
            }
        )));
    }
    Ok(coerce_string_list(&value, max))
}

/// Parse the structured per-item metrics array.
pub(crate) fn parse_metrics_array(raw: &str) -> Result<Vec<RawItemMetrics>> {
    serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| Error::Serialization(format!("expected metrics array: {e}")))
}
