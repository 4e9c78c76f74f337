//! Heartbeat & stuck-job monitor.
//!
//! An independent periodic sweep, decoupled from any job's task tree, that
//! detects stalled jobs and applies bounded, idempotent recovery:
//!
//! 1. If the terminal downstream artifact (the executive summary) already
//!    exists, auto-repair: atomically flip the job to completed without
//!    reprocessing. This defends against the incident pattern where
//!    finalization logged success but the status flip never persisted.
//! 2. Otherwise re-enqueue the job to resume from its current phase,
//!    incrementing the reprocess counter.
//! 3. Once the counter reaches the configured maximum, mark the job
//!    terminally failed and stop. This bound is the primary defense against
//!    unbounded reprocessing loops.
//!
//! Jobs with a stale heartbeat but zero response items stalled before any
//! work happened: they get one grace sweep, then fail. They are never
//! auto-repaired or reprocessed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use geolens_core::defaults::{
    CACHE_SCAN_PAGE, HEARTBEAT_STALE_SECS, MAX_REPROCESS_ATTEMPTS, MONITOR_INTERVAL_SECS,
    MONITOR_SCAN_PAGE,
};
use geolens_core::{
    AuditJob, AuditJobRepository, CompletionHook, InsightRepository, JobPhase,
    ResponseCacheRepository, ResponseItemRepository, Result,
};

use crate::events::{AuditEvent, EventBus};

/// Configuration for the stuck-job monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sweep interval in seconds.
    pub interval_secs: u64,
    /// Heartbeat age that marks a job stalled, in seconds.
    pub heartbeat_stale_secs: i64,
    /// Reprocess budget before a stuck job is terminally failed.
    pub max_attempts: i32,
    /// Candidate page size for the keyset scan.
    pub scan_page: i64,
    /// Phases eligible for recovery.
    pub stuck_phases: Vec<JobPhase>,
    /// Page size for the cache expiry purge run after each sweep.
    pub cache_purge_page: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: MONITOR_INTERVAL_SECS,
            heartbeat_stale_secs: HEARTBEAT_STALE_SECS,
            max_attempts: MAX_REPROCESS_ATTEMPTS,
            scan_page: MONITOR_SCAN_PAGE,
            stuck_phases: vec![
                JobPhase::Generating,
                JobPhase::Executing,
                JobPhase::Analyzing,
                JobPhase::Aggregating,
            ],
            cache_purge_page: CACHE_SCAN_PAGE,
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GEOLENS_MONITOR_INTERVAL_SECS` | `300` | Sweep interval |
    /// | `GEOLENS_HEARTBEAT_STALE_SECS` | `600` | Stall threshold |
    /// | `GEOLENS_MAX_REPROCESS_ATTEMPTS` | `3` | Reprocess budget |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_secs: std::env::var("GEOLENS_MONITOR_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.interval_secs)
                .max(1),
            heartbeat_stale_secs: std::env::var("GEOLENS_HEARTBEAT_STALE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.heartbeat_stale_secs)
                .max(1),
            max_attempts: std::env::var("GEOLENS_MAX_REPROCESS_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts)
                .max(1),
            ..defaults
        }
    }
}

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs flipped to completed because the artifact already existed.
    pub repaired: usize,
    /// Jobs re-enqueued for resumption.
    pub requeued: usize,
    /// Jobs terminally failed (budget exhausted or zero-progress).
    pub failed: usize,
    /// Zero-progress jobs given their grace sweep.
    pub graced: usize,
}

/// Handle for controlling a running monitor.
pub struct MonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl MonitorHandle {
    /// Signal the monitor to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| geolens_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Periodic stuck-job detector with bounded recovery.
pub struct HeartbeatMonitor {
    jobs: Arc<dyn AuditJobRepository>,
    responses: Arc<dyn ResponseItemRepository>,
    insights: Arc<dyn InsightRepository>,
    cache: Arc<dyn ResponseCacheRepository>,
    hook: Arc<dyn CompletionHook>,
    config: MonitorConfig,
    events: EventBus,
}

impl HeartbeatMonitor {
    /// Create a new monitor.
    pub fn new(
        jobs: Arc<dyn AuditJobRepository>,
        responses: Arc<dyn ResponseItemRepository>,
        insights: Arc<dyn InsightRepository>,
        cache: Arc<dyn ResponseCacheRepository>,
        hook: Arc<dyn CompletionHook>,
        config: MonitorConfig,
        events: EventBus,
    ) -> Self {
        Self {
            jobs,
            responses,
            insights,
            cache,
            hook,
            config,
            events,
        }
    }

    /// Start the monitor as an independently scheduled task with its own
    /// shutdown signal.
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            self.events.emit(AuditEvent::MonitorStarted);
            info!(
                interval_secs = self.config.interval_secs,
                stale_secs = self.config.heartbeat_stale_secs,
                "Stuck-job monitor started"
            );

            let interval = Duration::from_secs(self.config.interval_secs);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Stuck-job monitor received shutdown signal");
                        break;
                    }
                    _ = sleep(interval) => {
                        if let Err(e) = self.sweep().await {
                            error!(error = %e, "Monitor sweep failed");
                        }
                        if let Err(e) = self.cache.purge_expired(self.config.cache_purge_page).await {
                            warn!(error = %e, "Cache purge failed");
                        }
                    }
                }
            }

            self.events.emit(AuditEvent::MonitorStopped);
        });

        MonitorHandle { shutdown_tx }
    }

    /// One sweep over the stall candidates, in bounded keyset pages.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let stale_before =
            Utc::now() - chrono::Duration::seconds(self.config.heartbeat_stale_secs);
        let mut report = SweepReport::default();
        let mut cursor = None;

        loop {
            let page = self
                .jobs
                .stalled_candidates(
                    stale_before,
                    &self.config.stuck_phases,
                    cursor,
                    self.config.scan_page,
                )
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);
            let page_len = page.len();

            for job in page {
                if let Err(e) = self.handle_candidate(&job, &mut report).await {
                    // One broken candidate never aborts the sweep.
                    error!(job_id = %job.id, error = %e, "Failed to recover stalled job");
                }
            }

            if (page_len as i64) < self.config.scan_page {
                break;
            }
        }

        if report != SweepReport::default() {
            info!(
                repaired = report.repaired,
                requeued = report.requeued,
                failed = report.failed,
                graced = report.graced,
                "Monitor sweep complete"
            );
        }
        Ok(report)
    }

    /// Apply the recovery policy to one stalled candidate.
    async fn handle_candidate(&self, job: &AuditJob, report: &mut SweepReport) -> Result<()> {
        let item_count = self.responses.count_for_job(job.id).await?;

        if item_count == 0 {
            // Stalled before any work happened: no evidence to resume from,
            // nothing to repair. One grace sweep, then terminal failure.
            if job.reprocess_count >= 1 {
                self.jobs
                    .mark_failed(job.id, "stalled with no provider responses")
                    .await?;
                self.events.emit(AuditEvent::JobFailed {
                    job_id: job.id,
                    error: "stalled with no provider responses".into(),
                });
                report.failed += 1;
            } else {
                self.jobs.increment_reprocess(job.id).await?;
                debug!(job_id = %job.id, "Zero-progress stall, grace sweep");
                report.graced += 1;
            }
            return Ok(());
        }

        if self.insights.has_executive_summary(job.id).await? {
            // The terminal artifact exists: finalization succeeded except
            // for the status flip. Repair without reprocessing.
            let flipped = self.jobs.finalize(job.id).await?;
            if flipped {
                self.hook.on_completed(job.id).await;
                self.events.emit(AuditEvent::JobRepaired { job_id: job.id });
                info!(job_id = %job.id, "Auto-repaired stalled job with existing artifact");
            }
            report.repaired += 1;
            return Ok(());
        }

        if job.reprocess_count >= self.config.max_attempts {
            self.jobs
                .mark_failed(job.id, "reprocess budget exhausted")
                .await?;
            self.events.emit(AuditEvent::JobFailed {
                job_id: job.id,
                error: "reprocess budget exhausted".into(),
            });
            warn!(
                job_id = %job.id,
                attempts = job.reprocess_count,
                "Reprocess budget exhausted, job failed"
            );
            report.failed += 1;
            return Ok(());
        }

        let resume_from = match job.phase {
            JobPhase::Pending => JobPhase::Generating,
            phase => phase,
        };
        let attempt = self.jobs.requeue_for_resume(job.id, resume_from).await?;
        self.events.emit(AuditEvent::JobRequeued {
            job_id: job.id,
            resume_from,
            attempt,
        });
        info!(
            job_id = %job.id,
            resume_from = %resume_from,
            attempt,
            "Re-enqueued stalled job"
        );
        report.requeued += 1;
        Ok(())
    }
}
