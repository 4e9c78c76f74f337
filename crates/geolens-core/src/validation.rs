//! Sanitization of semi-structured extraction output.
//!
//! Everything a model returns is validated before persistence: scores are
//! clamped, enums go through an allow-list with synonym aliasing, lists are
//! coerced to lists and truncated, nested objects fall back to empty objects.
//! Sanitization never hard-fails: a cleaned partial value is preferable to
//! blocking the job. Alignment (array length) is enforced upstream by the
//! metrics writer and is the one case where data is discarded instead.

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::config::ScoreWeights;
use crate::defaults::METRIC_LIST_MAX;
use crate::models::{QualityTier, Sentiment};

/// Clamp a raw sub-score into [0, 100]. Non-finite input maps to 0.
pub fn clamp_score(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

/// Weighted composite of the four visibility sub-scores.
///
/// Inputs are clamped first, so the result is always in [0, 100].
pub fn geo_score(
    relevance: f64,
    prominence: f64,
    accuracy: f64,
    authority: f64,
    weights: &ScoreWeights,
) -> f64 {
    clamp_score(relevance) * weights.relevance
        + clamp_score(prominence) * weights.prominence
        + clamp_score(accuracy) * weights.accuracy
        + clamp_score(authority) * weights.authority
}

/// Weighted composite of the three context sub-scores.
pub fn context_score(
    feature_coverage: f64,
    value_prop: f64,
    competitor_context: f64,
    weights: &ScoreWeights,
) -> f64 {
    clamp_score(feature_coverage) * weights.feature_coverage
        + clamp_score(value_prop) * weights.value_prop
        + clamp_score(competitor_context) * weights.competitor_context
}

/// Share-of-voice percentage from a mention/total pair.
///
/// `min(max(mentions, 0), total) / max(total, 1) * 100`, capped at 100.
/// Defends against upstream-reported mention counts exceeding the total.
pub fn share_of_voice(mentions: i64, total: i64) -> f64 {
    let total = total.max(0);
    let mentions = mentions.max(0).min(total);
    let sov = mentions as f64 / total.max(1) as f64 * 100.0;
    sov.min(100.0)
}

/// Sanitize a mention/total pair into storable counts.
pub fn mention_counts(mentions: i64, total: i64) -> (i32, i32) {
    let total = total.clamp(0, i32::MAX as i64);
    let mentions = mentions.clamp(0, total);
    (mentions as i32, total as i32)
}

/// Parse a sentiment label through the allow-list with synonym aliasing.
pub fn parse_sentiment(raw: &str) -> Option<Sentiment> {
    match raw.trim().to_lowercase().as_str() {
        "positive" | "pos" | "favorable" | "favourable" | "good" => Some(Sentiment::Positive),
        "neutral" | "neu" | "objective" | "balanced" => Some(Sentiment::Neutral),
        "negative" | "neg" | "unfavorable" | "unfavourable" | "bad" | "critical" => {
            Some(Sentiment::Negative)
        }
        "mixed" | "ambivalent" => Some(Sentiment::Mixed),
        _ => None,
    }
}

/// Sanitize a sentiment label, defaulting unknowns to neutral with a log.
///
/// Neutral is the documented default: an unrecognized label carries no
/// directional evidence either way.
pub fn sanitize_sentiment(raw: Option<&str>) -> Sentiment {
    match raw {
        Some(s) => parse_sentiment(s).unwrap_or_else(|| {
            warn!(value = %s, "Unrecognized sentiment label, defaulting to neutral");
            Sentiment::Neutral
        }),
        None => Sentiment::Neutral,
    }
}

/// Parse a quality tier label through the allow-list with synonym aliasing.
pub fn parse_quality_tier(raw: &str) -> Option<QualityTier> {
    match raw.trim().to_lowercase().as_str() {
        "high" | "rich" | "detailed" | "comprehensive" => Some(QualityTier::High),
        "medium" | "moderate" | "adequate" | "average" => Some(QualityTier::Medium),
        "low" | "thin" | "shallow" | "sparse" | "poor" => Some(QualityTier::Low),
        _ => None,
    }
}

/// Sanitize a quality tier label, defaulting unknowns to medium with a log.
pub fn sanitize_quality_tier(raw: Option<&str>) -> QualityTier {
    match raw {
        Some(s) => parse_quality_tier(s).unwrap_or_else(|| {
            warn!(value = %s, "Unrecognized quality tier, defaulting to medium");
            QualityTier::Medium
        }),
        None => QualityTier::Medium,
    }
}

/// Coerce a JSON value into a list of strings, truncated to `max` entries.
///
/// Arrays keep their string members (scalars are stringified, nested
/// containers dropped); a bare string becomes a one- or comma-split list;
/// null and anything else become an empty list.
pub fn coerce_string_list(value: &JsonValue, max: usize) -> Vec<String> {
    let mut out: Vec<String> = match value {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) => Some(s.trim().to_string()),
                JsonValue::Number(n) => Some(n.to_string()),
                JsonValue::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        JsonValue::String(s) => {
            if s.contains(',') {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            } else if s.trim().is_empty() {
                Vec::new()
            } else {
                vec![s.trim().to_string()]
            }
        }
        _ => Vec::new(),
    };
    out.truncate(max);
    out
}

/// Coerce with the default list cap.
pub fn coerce_string_list_default(value: &JsonValue) -> Vec<String> {
    coerce_string_list(value, METRIC_LIST_MAX)
}

/// Validate a nested extras payload: must be a JSON object, else `{}`.
pub fn sanitize_extras(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(_) => value,
        JsonValue::Null => JsonValue::Object(Default::default()),
        other => {
            warn!(
                kind = match other {
                    JsonValue::Array(_) => "array",
                    JsonValue::String(_) => "string",
                    JsonValue::Number(_) => "number",
                    JsonValue::Bool(_) => "bool",
                    _ => "unknown",
                },
                "Non-object extras payload, replacing with empty object"
            );
            JsonValue::Object(Default::default())
        }
    }
}

/// Bounded sample of a raw payload for malformed-output logs.
pub fn payload_sample(raw: &str, max_len: usize) -> String {
    if raw.len() <= max_len {
        return raw.to_string();
    }
    let mut end = max_len;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &raw[..end])
}
