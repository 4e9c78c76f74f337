//! Job dispatcher: the phase state machine.
//!
//! Owns every status/phase transition an audit job makes while processing.
//! Phases run strictly forward from the job's start (or resume) phase; each
//! transition is one atomic write of status+phase+heartbeat through the job
//! repository. Finalization is idempotent and fires the completion hook at
//! most once per job.
//!
//! All collaborators are constructed explicitly and injected here; nothing
//! is lazily initialized on first use.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use geolens_core::{
    AuditJob, AuditJobRepository, BatchInsight, CompletionHook, Error, InsightRepository,
    InsightType, JobPhase, ProbeQueryRepository, ProfileRepository, ResponseItemRepository,
    Result, ScoreWeights, TargetProfile,
};
use geolens_inference::ProviderRegistry;

use crate::aggregator::{AggregatorConfig, StrategicAggregator};
use crate::events::{AuditEvent, EventBus};
use crate::executor::{ExecutorConfig, FanoutExecutor};
use crate::extraction::{slice_batches, BatchExtractor, ExtractionConfig};
use crate::metrics_writer::MetricsWriter;
use crate::planner::{PlannerConfig, QueryPlanner};

/// Repository bundle the pipeline operates on.
#[derive(Clone)]
pub struct PipelineStores {
    pub jobs: Arc<dyn AuditJobRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub queries: Arc<dyn ProbeQueryRepository>,
    pub responses: Arc<dyn ResponseItemRepository>,
    pub metrics: Arc<dyn geolens_core::ItemMetricsRepository>,
    pub insights: Arc<dyn InsightRepository>,
    pub cache: Arc<dyn geolens_core::ResponseCacheRepository>,
}

/// Configuration bundle for the pipeline components.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub planner: PlannerConfig,
    pub executor: ExecutorConfig,
    pub extraction: ExtractionConfig,
    pub aggregator: AggregatorConfig,
    pub weights: ScoreWeights,
}

impl PipelineConfig {
    /// Load every component config from the environment.
    pub fn from_env() -> Self {
        Self {
            planner: PlannerConfig::from_env(),
            executor: ExecutorConfig::from_env(),
            extraction: ExtractionConfig::from_env(),
            aggregator: AggregatorConfig::default(),
            weights: ScoreWeights::from_env(),
        }
    }
}

/// Shared registry of externally requested job stops.
///
/// Checked at phase and batch boundaries; in-flight provider calls are not
/// forcibly aborted.
#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<RwLock<HashSet<Uuid>>>,
}

impl CancelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that a job stop at its next boundary.
    pub async fn request_stop(&self, job_id: Uuid) {
        self.inner.write().await.insert(job_id);
    }

    /// Whether a stop was requested for this job.
    pub async fn is_stopped(&self, job_id: Uuid) -> bool {
        self.inner.read().await.contains(&job_id)
    }

    /// Clear a job's stop flag (after it has been acted on).
    pub async fn clear(&self, job_id: Uuid) {
        self.inner.write().await.remove(&job_id);
    }
}

/// Drives one audit job through its phases.
pub struct AuditDispatcher {
    stores: PipelineStores,
    registry: Arc<ProviderRegistry>,
    planner: QueryPlanner,
    executor: FanoutExecutor,
    extractor: BatchExtractor,
    metrics_writer: MetricsWriter,
    aggregator: StrategicAggregator,
    hook: Arc<dyn CompletionHook>,
    cancellations: CancelRegistry,
    events: EventBus,
}

impl AuditDispatcher {
    /// Construct the dispatcher and its owned components.
    pub fn new(
        stores: PipelineStores,
        registry: Arc<ProviderRegistry>,
        config: PipelineConfig,
        hook: Arc<dyn CompletionHook>,
        events: EventBus,
    ) -> Self {
        let planner = QueryPlanner::new(config.planner);
        let executor = FanoutExecutor::new(
            stores.cache.clone(),
            stores.queries.clone(),
            stores.responses.clone(),
            config.executor,
        );
        let extractor = BatchExtractor::new(registry.analyst(), config.extraction);
        let metrics_writer = MetricsWriter::new(stores.metrics.clone(), config.weights);
        let aggregator = StrategicAggregator::new(
            registry.analyst(),
            stores.insights.clone(),
            stores.metrics.clone(),
            config.aggregator,
        );

        Self {
            stores,
            registry,
            planner,
            executor,
            extractor,
            metrics_writer,
            aggregator,
            hook,
            cancellations: CancelRegistry::new(),
            events,
        }
    }

    /// Cancellation registry for external stop requests.
    pub fn cancellations(&self) -> CancelRegistry {
        self.cancellations.clone()
    }

    /// Run a claimed job from its start (or resume) phase to completion.
    ///
    /// Already-completed phases are skipped on resume. Errors propagate to
    /// the caller (the worker), which marks the job failed.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn run(&self, job: AuditJob) -> Result<()> {
        let start_phase = job.start_phase();
        info!(start_phase = %start_phase, reprocess_count = job.reprocess_count, "Dispatching audit job");

        let profile = self
            .stores
            .profiles
            .get(job.profile_id)
            .await?
            .ok_or(Error::ProfileNotFound(job.profile_id))?;

        if start_phase <= JobPhase::Generating {
            self.check_cancelled(job.id).await?;
            self.run_generating(&job, &profile).await?;
        }
        if start_phase <= JobPhase::Executing {
            self.check_cancelled(job.id).await?;
            self.run_executing(&job).await?;
        }
        if start_phase <= JobPhase::Analyzing {
            self.check_cancelled(job.id).await?;
            self.run_analyzing(&job, &profile).await?;
        }
        self.check_cancelled(job.id).await?;
        self.run_aggregating(&job, &profile).await?;

        self.finalize(job.id).await
    }

    /// Generating: plan the probe query set.
    async fn run_generating(&self, job: &AuditJob, profile: &TargetProfile) -> Result<()> {
        self.transition(job.id, JobPhase::Generating).await?;

        let existing = self.stores.queries.list_for_job(job.id).await?;
        if !existing.is_empty() {
            debug!(count = existing.len(), "Queries already planned, reusing");
            return Ok(());
        }

        let planned = self.planner.plan(profile, &job.spec)?;
        self.stores.queries.insert_many(job.id, &planned).await?;
        Ok(())
    }

    /// Executing: provider fan-out.
    async fn run_executing(&self, job: &AuditJob) -> Result<()> {
        self.transition(job.id, JobPhase::Executing).await?;

        let queries = self.stores.queries.list_for_job(job.id).await?;
        if queries.is_empty() {
            return Err(Error::Job(format!("job {} has no planned queries", job.id)));
        }

        let providers = self.registry.select(&job.spec.providers)?;
        self.executor.execute(job, &queries, &providers).await?;
        Ok(())
    }

    /// Analyzing: batch extraction and metrics persistence per category.
    async fn run_analyzing(&self, job: &AuditJob, profile: &TargetProfile) -> Result<()> {
        self.transition(job.id, JobPhase::Analyzing).await?;

        let items = self.stores.responses.list_for_job(job.id).await?;
        let mut by_category: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for item in items {
            by_category.entry(item.category).or_default().push(item);
        }

        for (category, items) in by_category {
            for (batch_index, batch) in slice_batches(&items, self.extractor.batch_size())
                .into_iter()
                .enumerate()
            {
                self.check_cancelled(job.id).await?;

                let extraction = self.extractor.extract(profile, category, batch).await;

                self.metrics_writer
                    .write_batch(job.id, batch, extraction.item_metrics.clone())
                    .await?;

                let mut batch_rows = Vec::new();
                for insight_type in InsightType::ALL {
                    let found = extraction.insight_items(insight_type);
                    if !found.is_empty() {
                        batch_rows.push(BatchInsight {
                            job_id: job.id,
                            category,
                            batch_index: batch_index as i32,
                            insight_type,
                            items: found.to_vec(),
                        });
                    }
                }
                self.stores.insights.replace_batch_insights(&batch_rows).await?;

                self.stores.jobs.touch_heartbeat(job.id).await?;
            }
        }
        Ok(())
    }

    /// Aggregating: the three rollup layers.
    async fn run_aggregating(&self, job: &AuditJob, profile: &TargetProfile) -> Result<()> {
        self.transition(job.id, JobPhase::Aggregating).await?;
        self.aggregator.aggregate(job.id, profile).await
    }

    /// Finalize exactly once; the hook fires only on the flip.
    async fn finalize(&self, job_id: Uuid) -> Result<()> {
        let flipped = self.stores.jobs.finalize(job_id).await?;
        if flipped {
            self.hook.on_completed(job_id).await;
            self.events.emit(AuditEvent::JobCompleted { job_id });
            info!(%job_id, "Audit job finalized");
        } else {
            debug!(%job_id, "Job already finalized, skipping hook");
        }
        Ok(())
    }

    /// One atomic phase transition plus the matching event.
    async fn transition(&self, job_id: Uuid, phase: JobPhase) -> Result<()> {
        self.stores.jobs.transition_phase(job_id, phase).await?;
        self.events.emit(AuditEvent::PhaseChanged { job_id, phase });
        Ok(())
    }

    /// Boundary cancellation check.
    async fn check_cancelled(&self, job_id: Uuid) -> Result<()> {
        if self.cancellations.is_stopped(job_id).await {
            self.cancellations.clear(job_id).await;
            return Err(Error::Job(format!("job {job_id} stopped by request")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scripted_analyst, TestPipeline};
    use geolens_core::{AuditSpec, JobStatus, QueryCategory};

    #[tokio::test]
    async fn happy_path_runs_queued_job_to_completion() {
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let job = pipeline.enqueue_default_job().await;

        pipeline.dispatcher.run(job.clone()).await.unwrap();

        let done = pipeline.store.job(job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.phase, JobPhase::Completed);
        assert!(done.completed_at.is_some());

        // Every planned query was probed and every item has metrics.
        let queries = pipeline.store.queries_for_job(job.id).await;
        assert!(!queries.is_empty());
        let items = pipeline.store.items_for_job(job.id).await;
        assert_eq!(items.len(), queries.len()); // one provider
        assert_eq!(pipeline.store.metrics_for_job(job.id).await.len(), items.len());

        // Downstream artifacts exist.
        assert!(pipeline.store.summary_exists(job.id).await);
        assert_eq!(pipeline.hook.count(), 1);
    }

    #[tokio::test]
    async fn status_phase_timestamp_stay_consistent_throughout() {
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let job = pipeline.enqueue_default_job().await;

        let before = pipeline.store.job(job.id).await;
        assert_ne!(before.status, JobStatus::Completed);
        assert_ne!(before.phase, JobPhase::Completed);
        assert!(before.completed_at.is_none());

        pipeline.dispatcher.run(job.clone()).await.unwrap();

        let after = pipeline.store.job(job.id).await;
        // status==completed <=> phase==completed <=> completed_at set
        assert_eq!(after.status == JobStatus::Completed, after.phase == JobPhase::Completed);
        assert_eq!(after.status == JobStatus::Completed, after.completed_at.is_some());
        assert_eq!(after.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn four_categories_one_batch_each_is_sixteen_extraction_calls() {
        // Scenario A: 4 categories x 1 batch of 8 items each.
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let categories = [
            QueryCategory::Awareness,
            QueryCategory::Consideration,
            QueryCategory::Comparison,
            QueryCategory::Purchase,
        ];
        let job = pipeline
            .seed_analyzing_job(&categories, 8)
            .await;

        pipeline.dispatcher.run(job.clone()).await.unwrap();

        let analyst = &pipeline.analyst;
        // 4 batches x (3 insight calls + 1 structured metrics call)
        let insight_calls = analyst.calls_matching("Across ALL responses above");
        let metrics_calls = analyst.calls_matching("EXACTLY");
        assert_eq!(insight_calls, 12);
        assert_eq!(metrics_calls, 4);

        // 32 per-item metrics rows, 1:1 with items.
        let items = pipeline.store.items_for_job(job.id).await;
        let metrics = pipeline.store.metrics_for_job(job.id).await;
        assert_eq!(items.len(), 32);
        assert_eq!(metrics.len(), 32);

        // Item 5 of batch 2 (second category, ordinal index 4) maps to the
        // row whose response_item_id matches that exact item.
        let second_category_items: Vec<_> = items
            .iter()
            .filter(|i| i.category == categories[1])
            .collect();
        let item5 = second_category_items[4];
        let row = metrics
            .iter()
            .find(|m| m.response_item_id == item5.id)
            .expect("metrics row for item 5 of batch 2");
        assert_eq!(row.job_id, job.id);
        assert_eq!(
            metrics
                .iter()
                .filter(|m| m.response_item_id == item5.id)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn finalizing_twice_fires_hook_once() {
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let job = pipeline.enqueue_default_job().await;

        pipeline.dispatcher.run(job.clone()).await.unwrap();
        assert_eq!(pipeline.hook.count(), 1);

        // A second finalization is a no-op and must not re-trigger
        // downstream population.
        let flipped = pipeline.store.finalize_job(job.id).await.unwrap();
        assert!(!flipped);
        pipeline.dispatcher.finalize(job.id).await.unwrap();
        assert_eq!(pipeline.hook.count(), 1);
    }

    #[tokio::test]
    async fn missing_profile_is_a_hard_error() {
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let store = pipeline.store.clone();
        let job_id = store.seed_bare_job().await; // bare job's profile is never inserted
        let job = store.job(job_id).await;

        let err = pipeline.dispatcher.run(job).await.unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn stop_request_halts_at_next_boundary() {
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let job = pipeline.enqueue_default_job().await;

        pipeline
            .dispatcher
            .cancellations()
            .request_stop(job.id)
            .await;

        let err = pipeline.dispatcher.run(job.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        // No provider work happened.
        assert_eq!(pipeline.analyst.call_count(), 0);
    }

    #[tokio::test]
    async fn resume_from_analyzing_skips_planning_and_fanout() {
        let pipeline = TestPipeline::new(scripted_analyst()).await;
        let job = pipeline
            .seed_analyzing_job(&[QueryCategory::Comparison], 4)
            .await;

        pipeline.dispatcher.run(job.clone()).await.unwrap();

        // No planning happened: query set is untouched (one per seeded item
        // group), and the only analyst traffic is extraction+aggregation.
        let done = pipeline.store.job(job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        let probes = pipeline.probe_backend.call_count();
        assert_eq!(probes, 0, "resume must not re-probe providers");
    }

    #[tokio::test]
    async fn uncovered_queries_do_not_fail_the_job() {
        // Scenario B end-to-end: the probe provider fails one query's text;
        // the job still completes and coverage is recorded as data.
        let pipeline = TestPipeline::with_failing_probe("vs", scripted_analyst()).await;
        let spec = AuditSpec {
            providers: vec!["probe".into()],
            categories: vec![QueryCategory::Comparison, QueryCategory::Purchase],
            query_budget: Some(4),
        };
        let job = pipeline.enqueue_job(spec).await;

        pipeline.dispatcher.run(job.clone()).await.unwrap();

        let done = pipeline.store.job(job.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        let queries = pipeline.store.queries_for_job(job.id).await;
        let uncovered: Vec<_> = queries.iter().filter(|q| q.is_uncovered()).collect();
        assert!(!uncovered.is_empty(), "comparison queries should be uncovered");
        assert!(uncovered.iter().all(|q| q.category == QueryCategory::Comparison));
    }
}
