//! Strategic aggregator: three strictly sequential layers.
//!
//! - Layer 1 collapses each category's batch-level insights into a small
//!   ranked list per insight type (call count scales with categories ×
//!   insight types).
//! - Layer 2 selects cross-cutting priorities per insight type across all
//!   Layer-1 output, independent of category count.
//! - Layer 3 combines Layer-2 priorities with aggregate numeric scores into
//!   one executive narrative for a detected decision-maker persona.
//!
//! Layer 2 strictly requires Layer 1's completed output; Layer 3 strictly
//! requires Layer 2's.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use geolens_core::defaults::{PAYLOAD_SAMPLE_LEN, RANKED_LIST_TOP_N};
use geolens_core::validation::payload_sample;
use geolens_core::{
    CategoryInsight, Error, ExecutiveSummary, GenerationBackend, InsightRepository, InsightType,
    ItemMetricsRepository, QueryCategory, RankedItem, Result, StrategicPriority, TargetProfile,
};

use crate::extraction::strip_code_fences;
use crate::prompts::{self, ScoreDigest};

/// Configuration for the strategic aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Entries per ranked list.
    pub top_n: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            top_n: RANKED_LIST_TOP_N,
        }
    }
}

/// Rolls batch insights up into category insights, strategic priorities,
/// and the executive summary.
pub struct StrategicAggregator {
    analyst: Arc<dyn GenerationBackend>,
    insights: Arc<dyn InsightRepository>,
    metrics: Arc<dyn ItemMetricsRepository>,
    config: AggregatorConfig,
}

impl StrategicAggregator {
    /// Create a new aggregator.
    pub fn new(
        analyst: Arc<dyn GenerationBackend>,
        insights: Arc<dyn InsightRepository>,
        metrics: Arc<dyn ItemMetricsRepository>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            analyst,
            insights,
            metrics,
            config,
        }
    }

    /// Run all three layers in order.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn aggregate(&self, job_id: Uuid, profile: &TargetProfile) -> Result<()> {
        self.layer1(job_id, profile).await?;
        self.layer2(job_id, profile).await?;
        self.layer3(job_id, profile).await?;
        Ok(())
    }

    /// Layer 1: per-category rollup.
    pub async fn layer1(&self, job_id: Uuid, profile: &TargetProfile) -> Result<()> {
        let batch_insights = self.insights.list_batch_insights(job_id).await?;

        // Collapse batches: (category, type) -> all extracted items.
        let mut grouped: BTreeMap<(QueryCategory, InsightType), Vec<String>> = BTreeMap::new();
        for insight in batch_insights {
            grouped
                .entry((insight.category, insight.insight_type))
                .or_default()
                .extend(insight.items);
        }

        let system = prompts::analysis_system(profile);
        let mut rollups = Vec::new();

        for ((category, insight_type), items) in grouped {
            if items.is_empty() {
                continue;
            }
            let prompt = prompts::category_rollup_prompt(profile, category, insight_type, &items);
            match self.analyst.generate_with_system(&system, &prompt).await {
                Ok(raw) => match parse_ranked_list(&raw, self.config.top_n) {
                    Ok(ranked) if !ranked.is_empty() => rollups.push(CategoryInsight {
                        job_id,
                        category,
                        insight_type,
                        items: ranked,
                    }),
                    Ok(_) => {}
                    Err(e) => warn!(
                        category = %category,
                        insight_type = %insight_type,
                        error = %e,
                        payload_sample = %payload_sample(&raw, PAYLOAD_SAMPLE_LEN),
                        "Malformed category rollup output, skipping"
                    ),
                },
                Err(e) => warn!(
                    category = %category,
                    insight_type = %insight_type,
                    error = %e,
                    "Category rollup call failed, skipping"
                ),
            }
        }

        debug!(rollups = rollups.len(), "Layer 1 complete");
        self.insights.upsert_category_insights(&rollups).await
    }

    /// Layer 2: cross-category prioritization. A small fixed number of
    /// calls, one per insight type, independent of category count.
    pub async fn layer2(&self, job_id: Uuid, profile: &TargetProfile) -> Result<()> {
        let category_insights = self.insights.list_category_insights(job_id).await?;
        let system = prompts::analysis_system(profile);
        let mut priorities = Vec::new();

        for insight_type in InsightType::ALL {
            let relevant: Vec<CategoryInsight> = category_insights
                .iter()
                .filter(|ci| ci.insight_type == insight_type)
                .cloned()
                .collect();
            if relevant.is_empty() {
                continue;
            }

            let prompt = prompts::cross_category_prompt(profile, insight_type, &relevant);
            match self.analyst.generate_with_system(&system, &prompt).await {
                Ok(raw) => match parse_priorities(&raw, job_id, insight_type, self.config.top_n) {
                    Ok(parsed) => priorities.extend(parsed),
                    Err(e) => warn!(
                        insight_type = %insight_type,
                        error = %e,
                        payload_sample = %payload_sample(&raw, PAYLOAD_SAMPLE_LEN),
                        "Malformed priority output, skipping type"
                    ),
                },
                Err(e) => warn!(
                    insight_type = %insight_type,
                    error = %e,
                    "Cross-category call failed, skipping type"
                ),
            }
        }

        debug!(priorities = priorities.len(), "Layer 2 complete");
        self.insights
            .replace_strategic_priorities(job_id, &priorities)
            .await
    }

    /// Layer 3: executive synthesis.
    pub async fn layer3(&self, job_id: Uuid, profile: &TargetProfile) -> Result<()> {
        let priorities = self.insights.list_strategic_priorities(job_id).await?;
        let digest = self.score_digest(job_id).await?;

        let system = prompts::analysis_system(profile);
        let prompt = prompts::executive_summary_prompt(profile, &priorities, &digest);

        let raw = match self.analyst.generate_with_system(&system, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Executive synthesis call failed, no summary for job");
                return Ok(());
            }
        };

        match parse_summary(&raw, job_id) {
            Ok(summary) => {
                info!(persona = %summary.persona, "Executive summary ready");
                self.insights.upsert_executive_summary(&summary).await
            }
            Err(e) => {
                warn!(
                    error = %e,
                    payload_sample = %payload_sample(&raw, PAYLOAD_SAMPLE_LEN),
                    "Malformed executive summary output, no summary for job"
                );
                Ok(())
            }
        }
    }

    /// Aggregate numeric scores for the synthesis prompt.
    async fn score_digest(&self, job_id: Uuid) -> Result<ScoreDigest> {
        let rows = self.metrics.list_for_job(job_id).await?;
        if rows.is_empty() {
            return Ok(ScoreDigest::default());
        }

        let n = rows.len() as f64;
        Ok(ScoreDigest {
            avg_geo_score: rows.iter().map(|m| m.geo_score).sum::<f64>() / n,
            avg_sov_score: rows.iter().map(|m| m.sov_score).sum::<f64>() / n,
            mention_rate: rows.iter().filter(|m| m.mentioned).count() as f64 / n,
            item_count: rows.len(),
        })
    }
}

/// Parse a ranked list: an array of strings or of {rank, title, rationale}
/// objects. Ranks are normalized to 1..n regardless of what the model sent.
pub(crate) fn parse_ranked_list(raw: &str, top_n: usize) -> Result<Vec<RankedItem>> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| Error::Serialization(format!("expected ranked JSON array: {e}")))?;
    let JsonValue::Array(entries) = value else {
        return Err(Error::Serialization("expected ranked JSON array".into()));
    };

    let mut items = Vec::new();
    for entry in entries {
        let (title, rationale) = match entry {
            JsonValue::String(s) if !s.trim().is_empty() => (s.trim().to_string(), None),
            JsonValue::Object(map) => {
                let Some(title) = map
                    .get("title")
                    .and_then(|t| t.as_str())
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                else {
                    continue;
                };
                let rationale = map
                    .get("rationale")
                    .and_then(|r| r.as_str())
                    .map(|r| r.to_string());
                (title.to_string(), rationale)
            }
            _ => continue,
        };
        items.push(RankedItem {
            rank: items.len() as i32 + 1,
            title,
            rationale,
        });
        if items.len() == top_n {
            break;
        }
    }
    Ok(items)
}

/// Parse Layer-2 priorities for one insight type.
pub(crate) fn parse_priorities(
    raw: &str,
    job_id: Uuid,
    insight_type: InsightType,
    top_n: usize,
) -> Result<Vec<StrategicPriority>> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| Error::Serialization(format!("expected priority JSON array: {e}")))?;
    let JsonValue::Array(entries) = value else {
        return Err(Error::Serialization("expected priority JSON array".into()));
    };

    let mut priorities = Vec::new();
    for entry in entries {
        let JsonValue::Object(map) = entry else {
            continue;
        };
        let Some(title) = map
            .get("title")
            .and_then(|t| t.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            continue;
        };

        let source_categories = map
            .get("source_categories")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(QueryCategory::parse)
                    .collect()
            })
            .unwrap_or_default();

        priorities.push(StrategicPriority {
            job_id,
            insight_type,
            rank: priorities.len() as i32 + 1,
            title: title.to_string(),
            rationale: map
                .get("rationale")
                .and_then(|r| r.as_str())
                .map(|r| r.to_string()),
            source_categories,
        });
        if priorities.len() == top_n {
            break;
        }
    }
    Ok(priorities)
}

/// Parse the Layer-3 summary object.
pub(crate) fn parse_summary(raw: &str, job_id: Uuid) -> Result<ExecutiveSummary> {
    let value: JsonValue = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| Error::Serialization(format!("expected summary JSON object: {e}")))?;
    let JsonValue::Object(map) = value else {
        return Err(Error::Serialization("expected summary JSON object".into()));
    };

    let narrative = map
        .get("narrative")
        .and_then(|n| n.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Serialization("summary has no narrative".into()))?;

    Ok(ExecutiveSummary {
        job_id,
        narrative: narrative.to_string(),
        persona: map
            .get("persona")
            .and_then(|p| p.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("executive")
            .to_string(),
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryStore;
    use chrono::Utc;
    use geolens_inference::{MockBackend, MockFailure};

    fn profile() -> TargetProfile {
        TargetProfile {
            id: Uuid::new_v4(),
            company_name: "Acme".into(),
            domain: "acme.example".into(),
            industry: Some("crm".into()),
            description: None,
            competitors: vec!["Globex".into()],
            created_at: Utc::now(),
        }
    }

    fn aggregator(store: &Arc<InMemoryStore>, analyst: MockBackend) -> StrategicAggregator {
        StrategicAggregator::new(
            Arc::new(analyst),
            store.clone(),
            store.clone(),
            AggregatorConfig::default(),
        )
    }

    fn scripted_analyst() -> MockBackend {
        MockBackend::new()
            .with_response("Merge duplicates", r#"[{"rank": 1, "title": "ranked item"}]"#)
            .with_response(
                "cross-cutting",
                r#"[{"title": "top priority", "rationale": "why", "source_categories": ["comparison"]}]"#,
            )
            .with_response(
                "executive narrative",
                r#"{"persona": "cmo", "narrative": "Acme trails Globex in AI answers."}"#,
            )
    }

    async fn seed_batch_insights(store: &Arc<InMemoryStore>, job_id: Uuid) {
        let mut rows = Vec::new();
        for category in [QueryCategory::Comparison, QueryCategory::Awareness] {
            for insight_type in InsightType::ALL {
                rows.push(geolens_core::BatchInsight {
                    job_id,
                    category,
                    batch_index: 0,
                    insight_type,
                    items: vec![format!("{category} {insight_type} finding")],
                });
            }
        }
        store.replace_batch_insights(&rows).await.unwrap();
    }

    #[tokio::test]
    async fn layer1_call_count_scales_with_categories_times_types() {
        let store = InMemoryStore::new();
        let job_id = store.seed_bare_job().await;
        seed_batch_insights(&store, job_id).await;

        let analyst = scripted_analyst();
        aggregator(&store, analyst.clone())
            .layer1(job_id, &profile())
            .await
            .unwrap();

        // 2 categories x 3 insight types
        assert_eq!(analyst.call_count(), 6);
        assert_eq!(store.list_category_insights(job_id).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn layer2_is_one_call_per_type_regardless_of_categories() {
        let store = InMemoryStore::new();
        let job_id = store.seed_bare_job().await;
        seed_batch_insights(&store, job_id).await;

        let analyst = scripted_analyst();
        let agg = aggregator(&store, analyst.clone());
        agg.layer1(job_id, &profile()).await.unwrap();
        let after_layer1 = analyst.call_count();

        agg.layer2(job_id, &profile()).await.unwrap();
        assert_eq!(analyst.call_count() - after_layer1, InsightType::ALL.len());

        let priorities = store.list_strategic_priorities(job_id).await.unwrap();
        assert_eq!(priorities.len(), 3);
        assert_eq!(priorities[0].rank, 1);
        assert_eq!(
            priorities[0].source_categories,
            vec![QueryCategory::Comparison]
        );
    }

    #[tokio::test]
    async fn layer2_without_layer1_output_makes_no_calls() {
        let store = InMemoryStore::new();
        let job_id = store.seed_bare_job().await;

        let analyst = scripted_analyst();
        aggregator(&store, analyst.clone())
            .layer2(job_id, &profile())
            .await
            .unwrap();

        assert_eq!(analyst.call_count(), 0);
    }

    #[tokio::test]
    async fn layer3_persists_summary_with_detected_persona() {
        let store = InMemoryStore::new();
        let job_id = store.seed_bare_job().await;

        aggregator(&store, scripted_analyst())
            .layer3(job_id, &profile())
            .await
            .unwrap();

        let summary = store.get_executive_summary(job_id).await.unwrap().unwrap();
        assert_eq!(summary.persona, "cmo");
        assert!(summary.narrative.contains("Globex"));
        assert!(store.has_executive_summary(job_id).await.unwrap());
    }

    #[tokio::test]
    async fn layer3_malformed_output_leaves_no_summary() {
        let store = InMemoryStore::new();
        let job_id = store.seed_bare_job().await;

        let analyst = MockBackend::new().with_default_response("no json here");
        aggregator(&store, analyst)
            .layer3(job_id, &profile())
            .await
            .unwrap();

        assert!(!store.has_executive_summary(job_id).await.unwrap());
    }

    #[tokio::test]
    async fn layer1_call_failure_skips_that_group_only() {
        let store = InMemoryStore::new();
        let job_id = store.seed_bare_job().await;
        seed_batch_insights(&store, job_id).await;

        let analyst = scripted_analyst()
            .with_failure("competitive gaps", MockFailure::Inference);
        aggregator(&store, analyst)
            .layer1(job_id, &profile())
            .await
            .unwrap();

        let insights = store.list_category_insights(job_id).await.unwrap();
        // 2 categories x 2 surviving types
        assert_eq!(insights.len(), 4);
        assert!(insights
            .iter()
            .all(|ci| ci.insight_type != InsightType::CompetitiveGaps));
    }

    #[test]
    fn parse_ranked_list_accepts_strings_and_objects() {
        let ranked = parse_ranked_list(
            r#"["first", {"rank": 9, "title": "second", "rationale": "because"}, 42, {"no": "title"}]"#,
            5,
        )
        .unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].title, "first");
        // Model-sent ranks are normalized.
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].rationale.as_deref(), Some("because"));
    }

    #[test]
    fn parse_ranked_list_truncates_to_top_n() {
        let ranked = parse_ranked_list(r#"["a", "b", "c", "d"]"#, 2).unwrap();
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn parse_priorities_drops_unknown_categories() {
        let priorities = parse_priorities(
            r#"[{"title": "p", "source_categories": ["comparison", "bogus"]}]"#,
            Uuid::new_v4(),
            InsightType::Recommendations,
            5,
        )
        .unwrap();
        assert_eq!(priorities[0].source_categories, vec![QueryCategory::Comparison]);
    }

    #[test]
    fn parse_summary_requires_narrative() {
        assert!(parse_summary(r#"{"persona": "cmo"}"#, Uuid::new_v4()).is_err());
        let summary =
            parse_summary(r#"{"narrative": "text"}"#, Uuid::new_v4()).unwrap();
        assert_eq!(summary.persona, "executive");
    }
}
