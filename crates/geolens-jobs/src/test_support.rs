//! In-memory repository implementations and a scripted pipeline harness
//! for dispatcher, executor, and monitor tests.
//!
//! The in-memory store mirrors the Postgres repositories' observable
//! semantics: atomic claim ordering, the idempotent finalize flip, the
//! hard error on metrics writes referencing unknown items, and keyset
//! candidate paging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use geolens_core::{
    AuditJob, AuditJobRepository, AuditSpec, BatchInsight, CategoryInsight, CompletionHook, Error,
    ExecutiveSummary, InsightRepository, InsightType, ItemMetrics, ItemMetricsRepository,
    JobPhase, JobStatus, JobStatusView, NewProbeQuery, NewResponseItem, ProbeQuery,
    ProbeQueryRepository, ProfileRepository, QueryCategory, QueueStats,
    ResponseCacheRepository, ResponseItem, ResponseItemRepository, Result, StrategicPriority,
    TargetProfile,
};
use geolens_inference::{MockBackend, MockFailure, ProviderRegistry};

use crate::dispatcher::{AuditDispatcher, PipelineConfig, PipelineStores};
use crate::events::EventBus;
use crate::executor::ExecutorConfig;

#[derive(Default)]
struct State {
    profiles: HashMap<Uuid, TargetProfile>,
    jobs: HashMap<Uuid, AuditJob>,
    job_order: Vec<Uuid>,
    queries: HashMap<Uuid, ProbeQuery>,
    query_order: Vec<Uuid>,
    items: HashMap<Uuid, ResponseItem>,
    metrics: HashMap<Uuid, ItemMetrics>,
    batch_insights: HashMap<(Uuid, QueryCategory, i32, InsightType), BatchInsight>,
    category_insights: HashMap<(Uuid, QueryCategory, InsightType), CategoryInsight>,
    priorities: HashMap<Uuid, Vec<StrategicPriority>>,
    summaries: HashMap<Uuid, ExecutiveSummary>,
    cache: HashMap<String, (String, DateTime<Utc>)>,
}

/// In-memory implementation of every pipeline repository trait.
pub(crate) struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
        })
    }

    // ---- seeding helpers ----------------------------------------------

    pub(crate) async fn seed_profile(&self, company_name: &str) -> TargetProfile {
        let profile = TargetProfile {
            id: Uuid::new_v4(),
            company_name: company_name.to_string(),
            domain: format!("{}.example", company_name.to_lowercase()),
            industry: Some("crm".into()),
            description: None,
            competitors: vec!["Globex".into()],
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.id, profile.clone());
        profile
    }

    pub(crate) async fn seed_job(
        &self,
        profile_id: Uuid,
        spec: &AuditSpec,
        status: JobStatus,
        phase: JobPhase,
    ) -> AuditJob {
        let job = AuditJob {
            id: Uuid::new_v4(),
            profile_id,
            status,
            phase,
            spec: spec.clone(),
            resume_from: None,
            reprocess_count: 0,
            progress_percent: phase.progress_percent(),
            progress_message: None,
            error_message: None,
            heartbeat_at: Utc::now(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        state.job_order.push(job.id);
        job
    }

    /// A processing job whose profile was never inserted.
    pub(crate) async fn seed_bare_job(&self) -> Uuid {
        let spec = AuditSpec {
            providers: vec!["probe".into()],
            categories: vec![],
            query_budget: None,
        };
        self.seed_job(Uuid::new_v4(), &spec, JobStatus::Processing, JobPhase::Analyzing)
            .await
            .id
    }

    pub(crate) async fn requeue_bare_job(&self, job_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&job_id).unwrap();
        job.status = JobStatus::Queued;
        job.phase = JobPhase::Pending;
    }

    pub(crate) async fn seed_queries(
        &self,
        job_id: Uuid,
        specs: &[(&str, QueryCategory)],
    ) -> Vec<ProbeQuery> {
        let mut out = Vec::new();
        let mut state = self.state.lock().unwrap();
        for (text, category) in specs {
            let query = ProbeQuery {
                id: Uuid::new_v4(),
                job_id,
                text: text.to_string(),
                category: *category,
                weight: category.weight(),
                covered_providers: 0,
                failed_providers: 0,
                created_at: Utc::now(),
            };
            state.queries.insert(query.id, query.clone());
            state.query_order.push(query.id);
            out.push(query);
        }
        out
    }

    /// Seed one query plus `n` response items for a category.
    pub(crate) async fn seed_items(
        &self,
        job_id: Uuid,
        category: QueryCategory,
        n: usize,
    ) -> Vec<ResponseItem> {
        let queries = self
            .seed_queries(job_id, &[("seeded probe", category)])
            .await;
        let mut out = Vec::new();
        let mut state = self.state.lock().unwrap();
        for i in 0..n {
            let item = ResponseItem {
                id: Uuid::new_v4(),
                job_id,
                query_id: queries[0].id,
                provider: "probe".into(),
                category,
                seq: i as i32,
                raw_text: format!("Engine answer {i} about Acme."),
                created_at: Utc::now(),
            };
            state.items.insert(item.id, item.clone());
            out.push(item);
        }
        out
    }

    // ---- inspection helpers -------------------------------------------

    pub(crate) async fn job(&self, job_id: Uuid) -> AuditJob {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(&job_id)
            .cloned()
            .expect("job not found")
    }

    pub(crate) async fn queries_for_job(&self, job_id: Uuid) -> Vec<ProbeQuery> {
        let state = self.state.lock().unwrap();
        state
            .query_order
            .iter()
            .filter_map(|id| state.queries.get(id))
            .filter(|q| q.job_id == job_id)
            .cloned()
            .collect()
    }

    pub(crate) async fn items_for_job(&self, job_id: Uuid) -> Vec<ResponseItem> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<ResponseItem> = state
            .items
            .values()
            .filter(|item| item.job_id == job_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.category.as_str(), a.seq).cmp(&(b.category.as_str(), b.seq)));
        items
    }

    pub(crate) async fn metrics_for_job(&self, job_id: Uuid) -> Vec<ItemMetrics> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<(String, i32, ItemMetrics)> = state
            .metrics
            .values()
            .filter(|m| m.job_id == job_id)
            .map(|m| {
                let item = &state.items[&m.response_item_id];
                (item.category.as_str().to_string(), item.seq, m.clone())
            })
            .collect();
        rows.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        rows.into_iter().map(|(_, _, m)| m).collect()
    }

    pub(crate) async fn query_coverage(&self, query_id: Uuid) -> (i32, i32) {
        let state = self.state.lock().unwrap();
        let query = state.queries.get(&query_id).expect("query not found");
        (query.covered_providers, query.failed_providers)
    }

    pub(crate) async fn summary_exists(&self, job_id: Uuid) -> bool {
        self.state.lock().unwrap().summaries.contains_key(&job_id)
    }

    pub(crate) async fn finalize_job(&self, job_id: Uuid) -> Result<bool> {
        AuditJobRepository::finalize(self, job_id).await
    }

    pub(crate) async fn backdate_heartbeat(&self, job_id: Uuid, secs: i64) {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&job_id).unwrap();
        job.heartbeat_at = Utc::now() - Duration::seconds(secs);
    }

    pub(crate) async fn set_resume_from(&self, job_id: Uuid, phase: Option<JobPhase>) {
        let mut state = self.state.lock().unwrap();
        state.jobs.get_mut(&job_id).unwrap().resume_from = phase;
    }

}

#[async_trait]
impl AuditJobRepository for InMemoryStore {
    async fn enqueue(&self, profile_id: Uuid, spec: &AuditSpec) -> Result<Uuid> {
        let job = AuditJob {
            id: Uuid::new_v4(),
            profile_id,
            status: JobStatus::Queued,
            phase: JobPhase::Pending,
            spec: spec.clone(),
            resume_from: None,
            reprocess_count: 0,
            progress_percent: 0,
            progress_message: None,
            error_message: None,
            heartbeat_at: Utc::now(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let mut state = self.state.lock().unwrap();
        let id = job.id;
        state.jobs.insert(id, job);
        state.job_order.push(id);
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<AuditJob>> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state
            .job_order
            .iter()
            .copied()
            .find(|id| state.jobs[id].status == JobStatus::Queued)
        else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&id).unwrap();
        job.status = JobStatus::Processing;
        job.started_at.get_or_insert_with(Utc::now);
        job.heartbeat_at = Utc::now();
        let resume_from = job.resume_from.take();
        let mut claimed = job.clone();
        claimed.resume_from = resume_from;
        Ok(Some(claimed))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<AuditJob>> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn transition_phase(&self, job_id: Uuid, phase: JobPhase) -> Result<()> {
        if phase.is_terminal() {
            return Err(Error::Job(format!(
                "terminal phase {phase} must go through finalize or mark_failed"
            )));
        }
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .filter(|job| !job.status.is_terminal())
            .ok_or_else(|| {
                Error::Job(format!(
                    "phase transition to {phase} matched no live row for job {job_id}"
                ))
            })?;
        job.phase = phase;
        job.status = JobStatus::Processing;
        job.heartbeat_at = Utc::now();
        job.progress_percent = phase.progress_percent();
        Ok(())
    }

    async fn touch_heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.status == JobStatus::Processing)
            .ok_or_else(|| {
                Error::Job(format!("heartbeat matched no processing row for job {job_id}"))
            })?;
        job.heartbeat_at = Utc::now();
        Ok(())
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.progress_percent = percent;
            job.progress_message = message.map(String::from);
        }
        Ok(())
    }

    async fn finalize(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status == JobStatus::Completed {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.phase = JobPhase::Completed;
        job.completed_at = Some(Utc::now());
        job.progress_percent = 100;
        job.heartbeat_at = Utc::now();
        Ok(true)
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.status != JobStatus::Completed)
            .ok_or_else(|| Error::Job(format!("mark_failed matched no live row for job {job_id}")))?;
        job.status = JobStatus::Failed;
        job.phase = JobPhase::Failed;
        job.error_message = Some(error.to_string());
        job.heartbeat_at = Utc::now();
        Ok(())
    }

    async fn requeue_for_resume(&self, job_id: Uuid, resume_from: JobPhase) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .filter(|job| !job.status.is_terminal())
            .ok_or_else(|| Error::Job(format!("requeue matched no live row for job {job_id}")))?;
        job.status = JobStatus::Queued;
        job.resume_from = Some(resume_from);
        job.reprocess_count += 1;
        job.heartbeat_at = Utc::now();
        Ok(job.reprocess_count)
    }

    async fn increment_reprocess(&self, job_id: Uuid) -> Result<i32> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&job_id)
            .filter(|job| !job.status.is_terminal())
            .ok_or_else(|| {
                Error::Job(format!("reprocess increment matched no live row for job {job_id}"))
            })?;
        job.reprocess_count += 1;
        Ok(job.reprocess_count)
    }

    async fn stalled_candidates(
        &self,
        stale_before: DateTime<Utc>,
        phases: &[JobPhase],
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuditJob>> {
        let state = self.state.lock().unwrap();
        let mut candidates: Vec<AuditJob> = state
            .jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .filter(|job| phases.is_empty() || phases.contains(&job.phase))
            .filter(|job| job.heartbeat_at < stale_before)
            .filter(|job| cursor.map_or(true, |cursor| job.id > cursor))
            .cloned()
            .collect();
        candidates.sort_by_key(|job| job.id);
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn status_view(&self, job_id: Uuid) -> Result<Option<JobStatusView>> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).map(|job| {
            JobStatusView {
                id: job.id,
                status: job.status,
                phase: job.phase,
                progress_percent: job.progress_percent,
                progress_message: job.progress_message.clone(),
                reprocess_count: job.reprocess_count,
                error_message: job.error_message.clone(),
                heartbeat_at: job.heartbeat_at,
                created_at: job.created_at,
                started_at: job.started_at,
                completed_at: job.completed_at,
            }
        }))
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().unwrap();
        let hour_ago = Utc::now() - Duration::hours(1);
        Ok(QueueStats {
            queued: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued)
                .count() as i64,
            processing: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Processing)
                .count() as i64,
            completed_last_hour: state
                .jobs
                .values()
                .filter(|j| j.completed_at.is_some_and(|t| t > hour_ago))
                .count() as i64,
            failed_last_hour: state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Failed && j.heartbeat_at > hour_ago)
                .count() as i64,
            total: state.jobs.len() as i64,
        })
    }
}

#[async_trait]
impl ProfileRepository for InMemoryStore {
    async fn get(&self, profile_id: Uuid) -> Result<Option<TargetProfile>> {
        Ok(self.state.lock().unwrap().profiles.get(&profile_id).cloned())
    }

    async fn insert(&self, profile: &TargetProfile) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.id, profile.clone());
        Ok(())
    }
}

#[async_trait]
impl ProbeQueryRepository for InMemoryStore {
    async fn insert_many(
        &self,
        job_id: Uuid,
        queries: &[NewProbeQuery],
    ) -> Result<Vec<ProbeQuery>> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(queries.len());
        for query in queries {
            let row = ProbeQuery {
                id: Uuid::new_v4(),
                job_id,
                text: query.text.clone(),
                category: query.category,
                weight: query.weight,
                covered_providers: 0,
                failed_providers: 0,
                created_at: Utc::now(),
            };
            state.queries.insert(row.id, row.clone());
            state.query_order.push(row.id);
            out.push(row);
        }
        Ok(out)
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ProbeQuery>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .query_order
            .iter()
            .filter_map(|id| state.queries.get(id))
            .filter(|q| q.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn record_coverage(&self, query_id: Uuid, covered: i32, failed: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let query = state.queries.get_mut(&query_id).ok_or_else(|| {
            Error::Job(format!("coverage update matched no row for query {query_id}"))
        })?;
        query.covered_providers = covered;
        query.failed_providers = failed;
        Ok(())
    }
}

#[async_trait]
impl ResponseItemRepository for InMemoryStore {
    async fn insert_many(
        &self,
        job_id: Uuid,
        items: &[NewResponseItem],
    ) -> Result<Vec<ResponseItem>> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let row = ResponseItem {
                id: Uuid::new_v4(),
                job_id,
                query_id: item.query_id,
                provider: item.provider.clone(),
                category: item.category,
                seq: item.seq,
                raw_text: item.raw_text.clone(),
                created_at: Utc::now(),
            };
            state.items.insert(row.id, row.clone());
            out.push(row);
        }
        Ok(out)
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ResponseItem>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<ResponseItem> = state
            .items
            .values()
            .filter(|item| item.job_id == job_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.category.as_str(), a.seq).cmp(&(b.category.as_str(), b.seq)));
        Ok(items)
    }

    async fn count_for_job(&self, job_id: Uuid) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .values()
            .filter(|item| item.job_id == job_id)
            .count() as i64)
    }
}

#[async_trait]
impl ItemMetricsRepository for InMemoryStore {
    async fn write_batch(&self, metrics: &[ItemMetrics]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        // Mirror the FK: a write against an unknown item is a hard error.
        for m in metrics {
            if !state.items.contains_key(&m.response_item_id) {
                return Err(Error::Job(format!(
                    "metrics write matched no row for response item {}",
                    m.response_item_id
                )));
            }
        }
        for m in metrics {
            state.metrics.insert(m.response_item_id, m.clone());
        }
        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ItemMetrics>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .metrics
            .values()
            .filter(|m| m.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InsightRepository for InMemoryStore {
    async fn replace_batch_insights(&self, insights: &[BatchInsight]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for insight in insights {
            state.batch_insights.insert(
                (
                    insight.job_id,
                    insight.category,
                    insight.batch_index,
                    insight.insight_type,
                ),
                insight.clone(),
            );
        }
        Ok(())
    }

    async fn list_batch_insights(&self, job_id: Uuid) -> Result<Vec<BatchInsight>> {
        let state = self.state.lock().unwrap();
        let mut insights: Vec<BatchInsight> = state
            .batch_insights
            .values()
            .filter(|insight| insight.job_id == job_id)
            .cloned()
            .collect();
        insights.sort_by_key(|i| (i.category, i.batch_index, i.insight_type));
        Ok(insights)
    }

    async fn upsert_category_insights(&self, insights: &[CategoryInsight]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for insight in insights {
            state.category_insights.insert(
                (insight.job_id, insight.category, insight.insight_type),
                insight.clone(),
            );
        }
        Ok(())
    }

    async fn list_category_insights(&self, job_id: Uuid) -> Result<Vec<CategoryInsight>> {
        let state = self.state.lock().unwrap();
        let mut insights: Vec<CategoryInsight> = state
            .category_insights
            .values()
            .filter(|insight| insight.job_id == job_id)
            .cloned()
            .collect();
        insights.sort_by_key(|i| (i.category, i.insight_type));
        Ok(insights)
    }

    async fn replace_strategic_priorities(
        &self,
        job_id: Uuid,
        priorities: &[StrategicPriority],
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .priorities
            .insert(job_id, priorities.to_vec());
        Ok(())
    }

    async fn list_strategic_priorities(&self, job_id: Uuid) -> Result<Vec<StrategicPriority>> {
        let mut priorities = self
            .state
            .lock()
            .unwrap()
            .priorities
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        priorities.sort_by_key(|p| (p.insight_type, p.rank));
        Ok(priorities)
    }

    async fn upsert_executive_summary(&self, summary: &ExecutiveSummary) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .summaries
            .insert(summary.job_id, summary.clone());
        Ok(())
    }

    async fn get_executive_summary(&self, job_id: Uuid) -> Result<Option<ExecutiveSummary>> {
        Ok(self.state.lock().unwrap().summaries.get(&job_id).cloned())
    }

    async fn has_executive_summary(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.state.lock().unwrap().summaries.contains_key(&job_id))
    }
}

#[async_trait]
impl ResponseCacheRepository for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cache
            .get(key)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(body, _)| body.clone()))
    }

    async fn put(&self, key: &str, _provider: &str, body: &str, ttl_secs: i64) -> Result<()> {
        let expires = Utc::now() + Duration::seconds(ttl_secs.max(0));
        self.state
            .lock()
            .unwrap()
            .cache
            .insert(key.to_string(), (body.to_string(), expires));
        Ok(())
    }

    async fn scan_keys(
        &self,
        cursor: Option<String>,
        limit: i64,
    ) -> Result<(Vec<String>, Option<String>)> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state
            .cache
            .keys()
            .filter(|key| cursor.as_ref().map_or(true, |cursor| *key > cursor))
            .cloned()
            .collect();
        keys.sort();
        keys.truncate(limit.max(1) as usize);
        let next = if keys.len() as i64 == limit {
            keys.last().cloned()
        } else {
            None
        };
        Ok((keys, next))
    }

    async fn purge_expired(&self, _page_size: i64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let before = state.cache.len();
        state.cache.retain(|_, (_, expires)| *expires > now);
        Ok((before - state.cache.len()) as u64)
    }
}

/// Completion hook that counts invocations.
#[derive(Default)]
pub(crate) struct CountingHook {
    count: AtomicUsize,
}

impl CountingHook {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionHook for CountingHook {
    async fn on_completed(&self, _job_id: Uuid) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A per-item metrics payload with exactly `n` well-formed entries.
fn metrics_json(n: usize) -> String {
    let rows: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            json!({
                "mentioned": i % 2 == 0,
                "mention_position": 1,
                "sentiment": "positive",
                "quality_tier": "medium",
                "features": ["pipeline view"],
                "value_props": ["saves time"],
                "competitors": ["Globex"],
                "relevance_score": 60 + i,
                "prominence_score": 50,
                "accuracy_score": 70,
                "authority_score": 40,
                "mention_count": 1,
                "total_count": 5,
                "feature_coverage_score": 50,
                "value_prop_score": 50,
                "competitor_context_score": 50
            })
        })
        .collect();
    serde_json::to_string(&rows).unwrap()
}

/// An analyst mock scripted for every pipeline call type.
///
/// Registration order matters: rollup and cross-category prompts also
/// contain the insight-type labels, so their rules come first.
pub(crate) fn scripted_analyst() -> MockBackend {
    let mut analyst = MockBackend::new()
        .with_response(
            "Merge duplicates",
            r#"[{"rank": 1, "title": "ranked item", "rationale": "repeats across batches"}]"#,
        )
        .with_response(
            "cross-cutting",
            r#"[{"title": "close the comparison gap", "rationale": "largest funnel impact", "source_categories": ["comparison"]}]"#,
        )
        .with_response(
            "executive narrative",
            r#"{"persona": "cmo", "narrative": "Acme trails Globex in AI answers."}"#,
        );
    for n in 1..=8 {
        analyst = analyst.with_response(format!("EXACTLY {n} objects"), metrics_json(n));
    }
    analyst
        .with_response("actionable recommendations", r#"["publish comparison pages"]"#)
        .with_response("competitive gaps", r#"["Globex cited for pricing"]"#)
        .with_response("content opportunities", r#"["write migration guide"]"#)
}

/// Fully wired pipeline over the in-memory store and mock backends.
pub(crate) struct TestPipeline {
    pub store: Arc<InMemoryStore>,
    pub dispatcher: AuditDispatcher,
    pub hook: Arc<CountingHook>,
    pub analyst: MockBackend,
    pub probe_backend: MockBackend,
    pub events: EventBus,
}

impl TestPipeline {
    pub(crate) async fn new(analyst: MockBackend) -> Self {
        let probe = MockBackend::new().with_default_response("The answer mentions Acme first.");
        Self::build(analyst, probe)
    }

    pub(crate) async fn with_failing_probe(substring: &str, analyst: MockBackend) -> Self {
        let probe = MockBackend::new()
            .with_failure(substring, MockFailure::Timeout)
            .with_default_response("The answer mentions Acme first.");
        Self::build(analyst, probe)
    }

    fn build(analyst: MockBackend, probe: MockBackend) -> Self {
        let store = InMemoryStore::new();
        let hook = Arc::new(CountingHook::default());
        let events = EventBus::new();

        let mut registry = ProviderRegistry::new(Arc::new(analyst.clone()));
        registry.register("probe", Arc::new(probe.clone()));

        let stores = PipelineStores {
            jobs: store.clone(),
            profiles: store.clone(),
            queries: store.clone(),
            responses: store.clone(),
            metrics: store.clone(),
            insights: store.clone(),
            cache: store.clone(),
        };
        let config = PipelineConfig {
            executor: ExecutorConfig::default().with_backoff_ms(1, 2),
            ..PipelineConfig::default()
        };

        let dispatcher = AuditDispatcher::new(
            stores,
            Arc::new(registry),
            config,
            hook.clone(),
            events.clone(),
        );

        Self {
            store,
            dispatcher,
            hook,
            analyst,
            probe_backend: probe,
            events,
        }
    }

    pub(crate) async fn enqueue_job(&self, spec: AuditSpec) -> AuditJob {
        let profile = self.store.seed_profile("Acme").await;
        let job_id = AuditJobRepository::enqueue(&*self.store, profile.id, &spec)
            .await
            .unwrap();
        self.store.job(job_id).await
    }

    pub(crate) async fn enqueue_default_job(&self) -> AuditJob {
        self.enqueue_job(AuditSpec {
            providers: vec!["probe".into()],
            categories: vec![],
            query_budget: None,
        })
        .await
    }

    /// A job already past fan-out: profile, queries, and `items_per_category`
    /// response items per category, resuming from the analyzing phase.
    pub(crate) async fn seed_analyzing_job(
        &self,
        categories: &[QueryCategory],
        items_per_category: usize,
    ) -> AuditJob {
        let profile = self.store.seed_profile("Acme").await;
        let spec = AuditSpec {
            providers: vec!["probe".into()],
            categories: categories.to_vec(),
            query_budget: None,
        };
        let job = self
            .store
            .seed_job(profile.id, &spec, JobStatus::Processing, JobPhase::Analyzing)
            .await;
        for category in categories {
            self.store
                .seed_items(job.id, *category, items_per_category)
                .await;
        }
        self.store
            .set_resume_from(job.id, Some(JobPhase::Analyzing))
            .await;
        self.store.job(job.id).await
    }
}
