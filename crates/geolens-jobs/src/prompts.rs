//! Prompt builders for extraction and aggregation calls.
//!
//! Every LLM call the pipeline makes builds its prompt here, so the wording
//! and the expected output shape live in one place. Extraction prompts carry
//! the batch's category and the company context; aggregation prompts carry
//! the layer's inputs.

use geolens_core::{
    CategoryInsight, InsightType, QueryCategory, ResponseItem, StrategicPriority, TargetProfile,
};

/// System context shared by every extraction and aggregation call.
pub fn analysis_system(profile: &TargetProfile) -> String {
    format!(
        "You are an AI-search visibility analyst auditing how text-generation \
         engines describe \"{}\" ({}). Known competitors: {}. \
         Answer with JSON only, no prose around it.",
        profile.company_name,
        profile.domain,
        if profile.competitors.is_empty() {
            "none listed".to_string()
        } else {
            profile.competitors.join(", ")
        }
    )
}

/// Numbered listing of a batch's raw responses.
fn numbered_batch(items: &[ResponseItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("--- Response {} (engine: {}) ---\n{}", i + 1, item.provider, item.raw_text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Human-readable label for an aggregate insight type.
fn insight_label(insight_type: InsightType) -> &'static str {
    match insight_type {
        InsightType::Recommendations => "actionable recommendations to improve the company's visibility",
        InsightType::CompetitiveGaps => "competitive gaps where rivals are presented more favorably",
        InsightType::ContentOpportunities => "content opportunities the company could publish to close coverage holes",
    }
}

/// Batch-level aggregate insight extraction (one of the three sibling calls).
pub fn batch_insight_prompt(
    profile: &TargetProfile,
    category: QueryCategory,
    insight_type: InsightType,
    items: &[ResponseItem],
) -> String {
    format!(
        r#"Below are {count} AI-engine responses to "{category}" stage queries about {company}.

{batch}

Across ALL responses above, extract up to 5 {label}.
Respond with a JSON array of short strings, most important first:
["...", "..."]
"#,
        count = items.len(),
        category = category,
        company = profile.company_name,
        batch = numbered_batch(items),
        label = insight_label(insight_type),
    )
}

/// Structured per-item metrics extraction (the fourth call).
///
/// The response must be an array with exactly one entry per response, in
/// input order; the metrics writer discards the whole batch otherwise.
pub fn item_metrics_prompt(profile: &TargetProfile, items: &[ResponseItem]) -> String {
    format!(
        r#"Below are {count} AI-engine responses to queries about {company}.

{batch}

For EACH response, in order, score how {company} appears in it.
Respond with a JSON array of EXACTLY {count} objects, one per response, in input order:
[
  {{
    "mentioned": true,
    "mention_position": 1,
    "sentiment": "positive|neutral|negative|mixed",
    "quality_tier": "high|medium|low",
    "features": ["..."],
    "value_props": ["..."],
    "competitors": ["..."],
    "relevance_score": 0-100,
    "prominence_score": 0-100,
    "accuracy_score": 0-100,
    "authority_score": 0-100,
    "mention_count": 0,
    "total_count": 0,
    "feature_coverage_score": 0-100,
    "value_prop_score": 0-100,
    "competitor_context_score": 0-100
  }}
]
"mention_count" is how many listed products are {company}; "total_count" is how many products the response lists in total.
"#,
        count = items.len(),
        company = profile.company_name,
        batch = numbered_batch(items),
    )
}

/// Layer 1: collapse one category's batch insights into a ranked list.
pub fn category_rollup_prompt(
    profile: &TargetProfile,
    category: QueryCategory,
    insight_type: InsightType,
    batch_items: &[String],
) -> String {
    let listing = batch_items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"These {label} were extracted from "{category}" stage responses about {company}:

{listing}

Merge duplicates and rank the most impactful for {company}.
Respond with a JSON array of at most 5 objects:
[{{"rank": 1, "title": "...", "rationale": "..."}}]
"#,
        label = insight_label(insight_type),
        category = category,
        company = profile.company_name,
        listing = listing,
    )
}

/// Layer 2: select cross-category priorities for one insight type.
pub fn cross_category_prompt(
    profile: &TargetProfile,
    insight_type: InsightType,
    category_insights: &[CategoryInsight],
) -> String {
    let listing = category_insights
        .iter()
        .flat_map(|insight| {
            insight.items.iter().map(move |item| {
                format!("[{}] {}", insight.category, item.title)
            })
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Ranked {label} per buyer-journey category for {company}:

{listing}

Select the top cross-cutting priorities by business impact across the whole funnel.
Respond with a JSON array of at most 5 objects:
[{{"title": "...", "rationale": "...", "source_categories": ["awareness", "comparison"]}}]
"#,
        label = insight_label(insight_type),
        company = profile.company_name,
        listing = listing,
    )
}

/// Aggregate numeric context handed to the executive synthesis call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreDigest {
    pub avg_geo_score: f64,
    pub avg_sov_score: f64,
    pub mention_rate: f64,
    pub item_count: usize,
}

/// Layer 3: executive synthesis from priorities and aggregate scores.
pub fn executive_summary_prompt(
    profile: &TargetProfile,
    priorities: &[StrategicPriority],
    digest: &ScoreDigest,
) -> String {
    let listing = priorities
        .iter()
        .map(|p| format!("[{} #{}] {}", p.insight_type, p.rank, p.title))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Audit results for {company} ({industry}) across {items} AI-engine responses:
- average visibility score: {geo:.1}/100
- average share of voice: {sov:.1}%
- mention rate: {rate:.0}%

Strategic priorities:
{listing}

Write a concise executive narrative of this audit for the single decision-maker
persona most likely to act on it at this company, and name that persona.
Respond with a JSON object:
{{"persona": "cmo|founder|product_lead|marketing_manager", "narrative": "..."}}
"#,
        company = profile.company_name,
        industry = profile.industry.as_deref().unwrap_or("unknown industry"),
        items = digest.item_count,
        geo = digest.avg_geo_score,
        sov = digest.avg_sov_score,
        rate = digest.mention_rate * 100.0,
        listing = listing,
    )
}
