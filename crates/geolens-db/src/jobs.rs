//! Audit job repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use geolens_core::{
    AuditJob, AuditJobRepository, AuditSpec, Error, JobPhase, JobStatus, JobStatusView, QueueStats,
    Result,
};

/// Columns fetched for a full job row.
const JOB_COLUMNS: &str = "id, profile_id, status::text AS status, phase::text AS phase, spec, \
     resume_from::text AS resume_from, reprocess_count, progress_percent, progress_message, \
     error_message, heartbeat_at, created_at, started_at, completed_at";

/// PostgreSQL implementation of AuditJobRepository.
pub struct PgAuditJobRepository {
    pool: Pool<Postgres>,
}

impl PgAuditJobRepository {
    /// Create a new PgAuditJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into an AuditJob struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<AuditJob> {
        let status: String = row.get("status");
        let phase: String = row.get("phase");
        let resume_from: Option<String> = row.get("resume_from");
        let spec: serde_json::Value = row.get("spec");
        let spec: AuditSpec = serde_json::from_value(spec)
            .map_err(|e| Error::Serialization(format!("invalid job spec: {e}")))?;

        Ok(AuditJob {
            id: row.get("id"),
            profile_id: row.get("profile_id"),
            status: JobStatus::parse(&status)
                .ok_or_else(|| Error::Internal(format!("unknown job status: {status}")))?,
            phase: JobPhase::parse(&phase)
                .ok_or_else(|| Error::Internal(format!("unknown job phase: {phase}")))?,
            spec,
            resume_from: resume_from.as_deref().and_then(JobPhase::parse),
            reprocess_count: row.get("reprocess_count"),
            progress_percent: row.get("progress_percent"),
            progress_message: row.get("progress_message"),
            error_message: row.get("error_message"),
            heartbeat_at: row.get("heartbeat_at"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl AuditJobRepository for PgAuditJobRepository {
    async fn enqueue(&self, profile_id: Uuid, spec: &AuditSpec) -> Result<Uuid> {
        let job_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO audit_jobs (id, profile_id, status, phase, spec, heartbeat_at, created_at)
             VALUES ($1, $2, 'queued'::audit_status, 'pending'::audit_phase, $3, $4, $4)",
        )
        .bind(job_id)
        .bind(profile_id)
        .bind(serde_json::to_value(spec)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn claim_next(&self) -> Result<Option<AuditJob>> {
        let now = Utc::now();

        // FOR UPDATE SKIP LOCKED keeps concurrent workers from claiming the
        // same job. The CTE carries the pre-claim resume_from out through
        // RETURNING while the update clears it.
        let row = sqlx::query(
            "WITH candidate AS (
                 SELECT id, resume_from FROM audit_jobs
                 WHERE status = 'queued'::audit_status
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE audit_jobs j
             SET status = 'processing'::audit_status,
                 started_at = COALESCE(j.started_at, $1),
                 heartbeat_at = $1,
                 resume_from = NULL
             FROM candidate c
             WHERE j.id = c.id
             RETURNING j.id, j.profile_id, j.status::text AS status, j.phase::text AS phase,
                       j.spec, c.resume_from::text AS resume_from, j.reprocess_count,
                       j.progress_percent, j.progress_message, j.error_message,
                       j.heartbeat_at, j.created_at, j.started_at, j.completed_at",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AuditJob>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM audit_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn transition_phase(&self, job_id: Uuid, phase: JobPhase) -> Result<()> {
        if phase.is_terminal() {
            return Err(Error::Job(format!(
                "terminal phase {phase} must go through finalize or mark_failed"
            )));
        }
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE audit_jobs
             SET phase = $1::audit_phase, status = 'processing'::audit_status,
                 heartbeat_at = $2, progress_percent = $3
             WHERE id = $4 AND status NOT IN ('completed'::audit_status, 'failed'::audit_status)",
        )
        .bind(phase.as_str())
        .bind(now)
        .bind(phase.progress_percent())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "phase transition to {phase} matched no live row for job {job_id}"
            )));
        }
        Ok(())
    }

    async fn touch_heartbeat(&self, job_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE audit_jobs SET heartbeat_at = $1
             WHERE id = $2 AND status = 'processing'::audit_status",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "heartbeat matched no processing row for job {job_id}"
            )));
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE audit_jobs SET progress_percent = $1, progress_message = $2 WHERE id = $3",
        )
        .bind(percent)
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn finalize(&self, job_id: Uuid) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE audit_jobs
             SET status = 'completed'::audit_status, phase = 'completed'::audit_phase,
                 completed_at = $1, progress_percent = 100, heartbeat_at = $1
             WHERE id = $2 AND status <> 'completed'::audit_status",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            // Either already completed (idempotent no-op) or missing.
            let existing = self.get(job_id).await?.ok_or(Error::JobNotFound(job_id))?;
            return if existing.status == JobStatus::Completed {
                Ok(false)
            } else {
                Err(Error::Job(format!(
                    "finalize matched no row for job {job_id} in status {}",
                    existing.status.as_str()
                )))
            };
        }

        // Verifying read: the incident pattern this guards against was a
        // finalizer that logged success while the status flip never landed.
        let verified = sqlx::query(
            "SELECT 1 FROM audit_jobs
             WHERE id = $1 AND status = 'completed'::audit_status
               AND phase = 'completed'::audit_phase AND completed_at IS NOT NULL",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if verified.is_none() {
            return Err(Error::Internal(format!(
                "finalize verification failed for job {job_id}"
            )));
        }

        Ok(true)
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE audit_jobs
             SET status = 'failed'::audit_status, phase = 'failed'::audit_phase,
                 error_message = $1, heartbeat_at = $2
             WHERE id = $3 AND status <> 'completed'::audit_status",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "mark_failed matched no live row for job {job_id}"
            )));
        }
        Ok(())
    }

    async fn requeue_for_resume(&self, job_id: Uuid, resume_from: JobPhase) -> Result<i32> {
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE audit_jobs
             SET status = 'queued'::audit_status, resume_from = $1::audit_phase,
                 reprocess_count = reprocess_count + 1, heartbeat_at = $2
             WHERE id = $3 AND status NOT IN ('completed'::audit_status, 'failed'::audit_status)
             RETURNING reprocess_count",
        )
        .bind(resume_from.as_str())
        .bind(Utc::now())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        count.ok_or_else(|| Error::Job(format!("requeue matched no live row for job {job_id}")))
    }

    async fn increment_reprocess(&self, job_id: Uuid) -> Result<i32> {
        // Deliberately does not touch the heartbeat: the grace marker must
        // leave the job visibly stale for the next sweep.
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE audit_jobs SET reprocess_count = reprocess_count + 1
             WHERE id = $1 AND status NOT IN ('completed'::audit_status, 'failed'::audit_status)
             RETURNING reprocess_count",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        count.ok_or_else(|| {
            Error::Job(format!("reprocess increment matched no live row for job {job_id}"))
        })
    }

    async fn stalled_candidates(
        &self,
        stale_before: DateTime<Utc>,
        phases: &[JobPhase],
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuditJob>> {
        let phase_strings: Vec<String> =
            phases.iter().map(|p| p.as_str().to_string()).collect();

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM audit_jobs
             WHERE status IN ('queued'::audit_status, 'processing'::audit_status)
               AND (cardinality($1::text[]) = 0 OR phase::text = ANY($1))
               AND heartbeat_at < $2
               AND ($3::uuid IS NULL OR id > $3)
             ORDER BY id ASC
             LIMIT $4"
        ))
        .bind(&phase_strings)
        .bind(stale_before)
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn status_view(&self, job_id: Uuid) -> Result<Option<JobStatusView>> {
        Ok(self.get(job_id).await?.map(|job| JobStatusView {
            id: job.id,
            status: job.status,
            phase: job.phase,
            progress_percent: job.progress_percent,
            progress_message: job.progress_message,
            reprocess_count: job.reprocess_count,
            error_message: job.error_message,
            heartbeat_at: job.heartbeat_at,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }))
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed' AND completed_at > NOW() - INTERVAL '1 hour') AS completed_last_hour,
                COUNT(*) FILTER (WHERE status = 'failed' AND heartbeat_at > NOW() - INTERVAL '1 hour') AS failed_last_hour,
                COUNT(*) AS total
             FROM audit_jobs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.get::<i64, _>("queued"),
            processing: row.get::<i64, _>("processing"),
            completed_last_hour: row.get::<i64, _>("completed_last_hour"),
            failed_last_hour: row.get::<i64, _>("failed_last_hour"),
            total: row.get::<i64, _>("total"),
        })
    }
}
