//! Core data model for the geolens audit pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::categories::QueryCategory;
use crate::error::{Error, Result};

// =============================================================================
// JOB STATE MACHINE
// =============================================================================

/// Status of an audit job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Stable slug used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse a stored slug back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Phase of an audit job's forward-moving pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Generating,
    Executing,
    Analyzing,
    Aggregating,
    Completed,
    Failed,
}

impl JobPhase {
    /// Stable slug used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Generating => "generating",
            JobPhase::Executing => "executing",
            JobPhase::Analyzing => "analyzing",
            JobPhase::Aggregating => "aggregating",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }

    /// Parse a stored slug back into a phase.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobPhase::Pending),
            "generating" => Some(JobPhase::Generating),
            "executing" => Some(JobPhase::Executing),
            "analyzing" => Some(JobPhase::Analyzing),
            "aggregating" => Some(JobPhase::Aggregating),
            "completed" => Some(JobPhase::Completed),
            "failed" => Some(JobPhase::Failed),
            _ => None,
        }
    }

    /// Whether the phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    /// The next phase in forward pipeline order, if any.
    pub fn next(&self) -> Option<JobPhase> {
        match self {
            JobPhase::Pending => Some(JobPhase::Generating),
            JobPhase::Generating => Some(JobPhase::Executing),
            JobPhase::Executing => Some(JobPhase::Analyzing),
            JobPhase::Analyzing => Some(JobPhase::Aggregating),
            JobPhase::Aggregating => Some(JobPhase::Completed),
            JobPhase::Completed | JobPhase::Failed => None,
        }
    }

    /// Whether a direct transition to `to` is legal for the dispatcher.
    ///
    /// Transitions are strictly forward (one step), plus `Failed` from any
    /// non-terminal phase. The monitor's bounded step back is expressed
    /// through [`JobPhase::is_valid_resume_target`], not here.
    pub fn can_transition_to(&self, to: JobPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == JobPhase::Failed {
            return true;
        }
        self.next() == Some(to)
    }

    /// Whether the monitor may re-enqueue a job stuck at `self` to resume
    /// from `target`.
    ///
    /// Only the bounded step back from `analyzing` to `executing` or
    /// `analyzing` itself is allowed; everything else resumes in place.
    pub fn is_valid_resume_target(&self, target: JobPhase) -> bool {
        if self.is_terminal() || target.is_terminal() {
            return false;
        }
        if target == *self {
            return true;
        }
        *self == JobPhase::Analyzing && target == JobPhase::Executing
    }

    /// Coarse progress mapping surfaced on the status read model.
    pub fn progress_percent(&self) -> i32 {
        match self {
            JobPhase::Pending => 0,
            JobPhase::Generating => 10,
            JobPhase::Executing => 35,
            JobPhase::Analyzing => 70,
            JobPhase::Aggregating => 90,
            JobPhase::Completed => 100,
            JobPhase::Failed => 0,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// AUDIT JOB
// =============================================================================

/// Per-job configuration captured at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSpec {
    /// Provider ids to probe. Must match ids registered at startup.
    pub providers: Vec<String>,
    /// Categories to plan queries for. Empty means all categories.
    #[serde(default)]
    pub categories: Vec<QueryCategory>,
    /// Override for the total query budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_budget: Option<usize>,
}

impl AuditSpec {
    /// Categories to plan for, defaulting to the full closed set.
    pub fn effective_categories(&self) -> Vec<QueryCategory> {
        if self.categories.is_empty() {
            QueryCategory::ALL.to_vec()
        } else {
            self.categories.clone()
        }
    }
}

/// An audit job in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditJob {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub spec: AuditSpec,
    /// Phase to resume from after a monitor re-enqueue. Cleared on claim.
    pub resume_from: Option<JobPhase>,
    pub reprocess_count: i32,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
    pub heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AuditJob {
    /// The phase the dispatcher should start (or resume) from.
    pub fn start_phase(&self) -> JobPhase {
        match self.resume_from {
            Some(phase) if !phase.is_terminal() => phase,
            _ => JobPhase::Generating,
        }
    }
}

// =============================================================================
// TARGET PROFILE
// =============================================================================

/// The company being audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetProfile {
    pub id: Uuid,
    pub company_name: String,
    pub domain: String,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub competitors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TargetProfile {
    /// Fail fast if required fields are missing.
    ///
    /// The planner calls this before generating anything; a profile without
    /// a company name or domain can only produce a corrupted report.
    pub fn validate_required(&self) -> Result<()> {
        if self.company_name.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "profile {} has no company name",
                self.id
            )));
        }
        if self.domain.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "profile {} has no domain",
                self.id
            )));
        }
        Ok(())
    }
}

// =============================================================================
// QUERIES AND RESPONSES
// =============================================================================

/// A planned probe query. Immutable after planning except coverage counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeQuery {
    pub id: Uuid,
    pub job_id: Uuid,
    pub text: String,
    pub category: QueryCategory,
    pub weight: f32,
    /// Providers that returned a usable response for this query.
    pub covered_providers: i32,
    /// Providers that exhausted retries for this query.
    pub failed_providers: i32,
    pub created_at: DateTime<Utc>,
}

impl ProbeQuery {
    /// Whether no provider produced a response for this query.
    pub fn is_uncovered(&self) -> bool {
        self.covered_providers == 0 && self.failed_providers > 0
    }
}

/// Input for planning a probe query.
#[derive(Debug, Clone)]
pub struct NewProbeQuery {
    pub text: String,
    pub category: QueryCategory,
    pub weight: f32,
}

/// One provider's raw answer to one probe query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub query_id: Uuid,
    pub provider: String,
    pub category: QueryCategory,
    /// Insertion order within the category; batch slicing derives
    /// `batch_index = seq / batch_size` and the ordinal within the batch.
    pub seq: i32,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

/// Input for persisting a response item.
#[derive(Debug, Clone)]
pub struct NewResponseItem {
    pub query_id: Uuid,
    pub provider: String,
    pub category: QueryCategory,
    pub seq: i32,
    pub raw_text: String,
}

// =============================================================================
// PER-ITEM METRICS
// =============================================================================

/// Sentiment of a response toward the audited company.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Mixed => "mixed",
        }
    }
}

/// How thoroughly a response describes the company when it mentions it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    #[default]
    Medium,
    Low,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }
}

/// Validated per-item metrics, 1:1 with a response item.
///
/// `geo_score` is the average of the four visibility sub-scores weighted by
/// [`crate::config::ScoreWeights`]; `context_score` averages the three
/// context sub-scores; `sov_score` is the capped share-of-voice percentage.
/// All scores are held in [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetrics {
    pub response_item_id: Uuid,
    pub job_id: Uuid,
    pub mentioned: bool,
    pub mention_position: Option<i32>,
    pub sentiment: Sentiment,
    pub quality_tier: QualityTier,
    pub features: Vec<String>,
    pub value_props: Vec<String>,
    pub competitors: Vec<String>,
    pub relevance_score: f64,
    pub prominence_score: f64,
    pub accuracy_score: f64,
    pub authority_score: f64,
    pub geo_score: f64,
    pub mention_count: i32,
    pub total_count: i32,
    pub sov_score: f64,
    pub feature_coverage_score: f64,
    pub value_prop_score: f64,
    pub competitor_context_score: f64,
    pub context_score: f64,
    /// Provider-specific extras; validated serializable before write.
    pub extras: JsonValue,
}

// =============================================================================
// INSIGHTS
// =============================================================================

/// Kind of aggregate insight extracted per batch and rolled up per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Recommendations,
    CompetitiveGaps,
    ContentOpportunities,
}

impl InsightType {
    /// All insight types in extraction order.
    pub const ALL: [InsightType; 3] = [
        InsightType::Recommendations,
        InsightType::CompetitiveGaps,
        InsightType::ContentOpportunities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Recommendations => "recommendations",
            InsightType::CompetitiveGaps => "competitive_gaps",
            InsightType::ContentOpportunities => "content_opportunities",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recommendations" => Some(InsightType::Recommendations),
            "competitive_gaps" => Some(InsightType::CompetitiveGaps),
            "content_opportunities" => Some(InsightType::ContentOpportunities),
            _ => None,
        }
    }
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch-level aggregate insight from one extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInsight {
    pub job_id: Uuid,
    pub category: QueryCategory,
    pub batch_index: i32,
    pub insight_type: InsightType,
    pub items: Vec<String>,
}

/// One entry in a ranked insight list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedItem {
    pub rank: i32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Layer-1 output: a category's batch insights collapsed to a ranked list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryInsight {
    pub job_id: Uuid,
    pub category: QueryCategory,
    pub insight_type: InsightType,
    pub items: Vec<RankedItem>,
}

/// Layer-2 output: a cross-category priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicPriority {
    pub job_id: Uuid,
    pub insight_type: InsightType,
    pub rank: i32,
    pub title: String,
    pub rationale: Option<String>,
    pub source_categories: Vec<QueryCategory>,
}

/// Layer-3 output: the executive narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub job_id: Uuid,
    pub narrative: String,
    /// Decision-maker persona the narrative is tailored to, as detected
    /// from the profile (e.g. "cmo", "founder", "product_lead").
    pub persona: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// READ MODELS
// =============================================================================

/// Status/phase read model for reporting collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    pub reprocess_count: i32,
    pub error_message: Option<String>,
    pub heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed_last_hour: i64,
    pub failed_last_hour: i64,
    pub total: i64,
}
