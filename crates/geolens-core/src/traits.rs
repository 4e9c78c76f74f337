//! Core traits for geolens abstractions.
//!
//! These traits define the logical read/write contracts the pipeline needs
//! from the durable store, plus the generation-backend seam, enabling
//! pluggable implementations and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// AUDIT JOB REPOSITORY
// =============================================================================

/// Repository owning the audit job state machine rows.
///
/// The dispatcher is the only component that mutates status/phase through
/// this trait (the monitor goes through `requeue_for_resume` and
/// `finalize`); every transition is a single atomic write of
/// status + phase + heartbeat together.
#[async_trait]
pub trait AuditJobRepository: Send + Sync {
    /// Enqueue a new audit job for a target profile.
    async fn enqueue(&self, profile_id: Uuid, spec: &AuditSpec) -> Result<Uuid>;

    /// Atomically claim the next queued job and mark it processing.
    ///
    /// Claiming clears `resume_from` (the claimer receives it on the
    /// returned job) and stamps `started_at` on first claim.
    async fn claim_next(&self) -> Result<Option<AuditJob>>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<AuditJob>>;

    /// Move a job to `phase`, writing status, phase, and heartbeat in one
    /// atomic update. `phase` must be non-terminal; completion goes through
    /// [`AuditJobRepository::finalize`] and failure through
    /// [`AuditJobRepository::mark_failed`].
    async fn transition_phase(&self, job_id: Uuid, phase: JobPhase) -> Result<()>;

    /// Refresh the heartbeat without changing phase (batch boundaries).
    async fn touch_heartbeat(&self, job_id: Uuid) -> Result<()>;

    /// Update progress surfaced on the status read model.
    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()>;

    /// Finalize: one atomic update setting status=completed, phase=completed
    /// and the completion timestamp together, verified by affected-row
    /// count. Returns `true` if this call performed the flip, `false` if the
    /// job was already completed (idempotent no-op).
    async fn finalize(&self, job_id: Uuid) -> Result<bool>;

    /// Terminally fail a job. `completed_at` stays unset: it is reserved
    /// for successful completion.
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Re-enqueue a stalled job to resume from `resume_from`, incrementing
    /// the reprocess counter. Returns the new counter value.
    async fn requeue_for_resume(&self, job_id: Uuid, resume_from: JobPhase) -> Result<i32>;

    /// Increment the reprocess counter without re-enqueueing (the
    /// zero-progress grace marker).
    async fn increment_reprocess(&self, job_id: Uuid) -> Result<i32>;

    /// Cursor-style scan of stall candidates: non-terminal status, phase in
    /// `phases`, heartbeat older than `stale_before`, ordered by id starting
    /// after `cursor`. Never an unbounded listing.
    async fn stalled_candidates(
        &self,
        stale_before: DateTime<Utc>,
        phases: &[JobPhase],
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuditJob>>;

    /// Status/phase read model for reporting collaborators.
    async fn status_view(&self, job_id: Uuid) -> Result<Option<JobStatusView>>;

    /// Queue statistics summary.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// TARGET PROFILE REPOSITORY
// =============================================================================

/// Read access to target profiles.
///
/// A missing profile is surfaced as [`crate::Error::ProfileNotFound`] by
/// callers; it is never silently substituted.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Fetch a profile by id.
    async fn get(&self, profile_id: Uuid) -> Result<Option<TargetProfile>>;

    /// Insert a profile (used by submission collaborators and tests).
    async fn insert(&self, profile: &TargetProfile) -> Result<()>;
}

// =============================================================================
// PROBE QUERY REPOSITORY
// =============================================================================

/// Repository for planned probe queries.
#[async_trait]
pub trait ProbeQueryRepository: Send + Sync {
    /// Persist the planned query set for a job in one shot.
    async fn insert_many(&self, job_id: Uuid, queries: &[NewProbeQuery])
        -> Result<Vec<ProbeQuery>>;

    /// List a job's queries in planning order.
    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ProbeQuery>>;

    /// Record provider coverage for a query after fan-out.
    async fn record_coverage(&self, query_id: Uuid, covered: i32, failed: i32) -> Result<()>;
}

// =============================================================================
// RESPONSE ITEM REPOSITORY
// =============================================================================

/// Repository for raw provider responses.
#[async_trait]
pub trait ResponseItemRepository: Send + Sync {
    /// Persist a set of response items for a job.
    async fn insert_many(
        &self,
        job_id: Uuid,
        items: &[NewResponseItem],
    ) -> Result<Vec<ResponseItem>>;

    /// List a job's response items ordered by (category, seq).
    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ResponseItem>>;

    /// Count of response items for a job (the monitor's progress evidence).
    async fn count_for_job(&self, job_id: Uuid) -> Result<i64>;
}

// =============================================================================
// ITEM METRICS REPOSITORY
// =============================================================================

/// Repository for validated per-item metrics.
#[async_trait]
pub trait ItemMetricsRepository: Send + Sync {
    /// Persist a batch of metrics, 1:1 with response items, overwriting any
    /// prior rows for those items wholesale.
    ///
    /// A write referencing an unknown response item is a hard error, never
    /// a silent no-op.
    async fn write_batch(&self, metrics: &[ItemMetrics]) -> Result<()>;

    /// List a job's metrics.
    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ItemMetrics>>;
}

// =============================================================================
// INSIGHT REPOSITORY
// =============================================================================

/// Repository for batch insights, the aggregation layers, and the summary.
#[async_trait]
pub trait InsightRepository: Send + Sync {
    /// Replace the batch-level insights produced by one extraction round.
    async fn replace_batch_insights(&self, insights: &[BatchInsight]) -> Result<()>;

    /// List a job's batch insights.
    async fn list_batch_insights(&self, job_id: Uuid) -> Result<Vec<BatchInsight>>;

    /// Upsert Layer-1 category insights keyed by (job, category, type).
    async fn upsert_category_insights(&self, insights: &[CategoryInsight]) -> Result<()>;

    /// List a job's category insights.
    async fn list_category_insights(&self, job_id: Uuid) -> Result<Vec<CategoryInsight>>;

    /// Replace Layer-2 strategic priorities keyed by (job, type, rank).
    async fn replace_strategic_priorities(
        &self,
        job_id: Uuid,
        priorities: &[StrategicPriority],
    ) -> Result<()>;

    /// List a job's strategic priorities ordered by (type, rank).
    async fn list_strategic_priorities(&self, job_id: Uuid) -> Result<Vec<StrategicPriority>>;

    /// Upsert the Layer-3 executive summary.
    async fn upsert_executive_summary(&self, summary: &ExecutiveSummary) -> Result<()>;

    /// Fetch the executive summary, if finalization-level aggregation ran.
    async fn get_executive_summary(&self, job_id: Uuid) -> Result<Option<ExecutiveSummary>>;

    /// Whether the terminal downstream artifact exists (monitor auto-repair
    /// evidence).
    async fn has_executive_summary(&self, job_id: Uuid) -> Result<bool>;
}

// =============================================================================
// RESPONSE CACHE REPOSITORY
// =============================================================================

/// Cache of provider responses keyed by (query, provider) digest.
#[async_trait]
pub trait ResponseCacheRepository: Send + Sync {
    /// Look up a cached response body.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a response body with a time-to-live.
    async fn put(&self, key: &str, provider: &str, body: &str, ttl_secs: i64) -> Result<()>;

    /// Cursor-style key enumeration: one bounded page, ordered by key,
    /// starting after `cursor`. Returns the page and the next cursor.
    async fn scan_keys(
        &self,
        cursor: Option<String>,
        limit: i64,
    ) -> Result<(Vec<String>, Option<String>)>;

    /// Delete expired entries in bounded pages. Returns rows removed.
    async fn purge_expired(&self, page_size: i64) -> Result<u64>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// FINALIZATION HOOK
// =============================================================================

/// Invoked exactly once per job on successful completion, for downstream
/// population. Finalizing an already-completed job does not re-trigger it.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completed(&self, job_id: Uuid);
}

/// No-op hook for deployments without a downstream consumer.
pub struct NoOpCompletionHook;

#[async_trait]
impl CompletionHook for NoOpCompletionHook {
    async fn on_completed(&self, _job_id: Uuid) {}
}
