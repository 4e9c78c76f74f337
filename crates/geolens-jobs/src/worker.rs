//! Audit worker: claims queued jobs and drives them through the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use geolens_core::defaults::{JOB_MAX_CONCURRENT, JOB_POLL_INTERVAL_MS};
use geolens_core::{AuditJob, AuditJobRepository};

use crate::dispatcher::AuditDispatcher;
use crate::events::{AuditEvent, EventBus};

/// Configuration for the audit worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs (the global cap).
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GEOLENS_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `GEOLENS_JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `GEOLENS_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("GEOLENS_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("GEOLENS_JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("GEOLENS_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<AuditEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> geolens_core::Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| geolens_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for pipeline events.
    pub fn events(&self) -> broadcast::Receiver<AuditEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that claims audit jobs and processes them concurrently.
pub struct AuditWorker {
    jobs: Arc<dyn AuditJobRepository>,
    dispatcher: Arc<AuditDispatcher>,
    config: WorkerConfig,
    events: EventBus,
}

impl AuditWorker {
    /// Create a new worker.
    pub fn new(
        jobs: Arc<dyn AuditJobRepository>,
        dispatcher: Arc<AuditDispatcher>,
        config: WorkerConfig,
        events: EventBus,
    ) -> Self {
        Self {
            jobs,
            dispatcher,
            config,
            events,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.events.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop with concurrent job processing.
    ///
    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip_all)]
    async fn run(self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Audit worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Audit worker started"
        );
        self.events.emit(AuditEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Audit worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent_jobs {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let jobs = self.jobs.clone();
                        let dispatcher = self.dispatcher.clone();
                        let events = self.events.clone();
                        tasks.spawn(async move {
                            execute_job(jobs, dispatcher, events, job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Audit worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
                // No sleep: immediately try to claim more jobs.
            }
        }

        self.events.emit(AuditEvent::WorkerStopped);
        info!("Audit worker stopped");
    }

    /// Claim the next queued job without processing it.
    async fn claim_job(&self) -> Option<AuditJob> {
        match self.jobs.claim_next().await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                None
            }
        }
    }
}

/// Execute a single claimed job and record the outcome.
async fn execute_job(
    jobs: Arc<dyn AuditJobRepository>,
    dispatcher: Arc<AuditDispatcher>,
    events: EventBus,
    job: AuditJob,
) {
    let start = Instant::now();
    let job_id = job.id;

    info!(%job_id, "Processing audit job");
    events.emit(AuditEvent::JobStarted { job_id });

    match dispatcher.run(job).await {
        Ok(()) => {
            info!(
                %job_id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Audit job completed"
            );
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(mark_err) = jobs.mark_failed(job_id, &message).await {
                error!(%job_id, error = %mark_err, "Failed to mark job as failed");
            }
            warn!(
                %job_id,
                error = %message,
                duration_ms = start.elapsed().as_millis() as u64,
                "Audit job failed"
            );
            events.emit(AuditEvent::JobFailed {
                job_id,
                error: message,
            });
        }
    }
}
