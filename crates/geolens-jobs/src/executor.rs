//! Provider fan-out executor.
//!
//! Executes every planned query against every provider the job's spec
//! names, concurrently, bounded by a per-job semaphore. Per-provider
//! failures are isolated: one provider exhausting its retries never blocks
//! another provider's result for the same query. Each (query, provider)
//! pair checks the response cache before calling out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use geolens_core::defaults::{
    BACKOFF_BASE_MS, BACKOFF_CAP_MS, CACHE_TTL_SECS, FANOUT_CONCURRENCY, PROVIDER_MAX_RETRIES,
};
use geolens_core::{
    AuditJob, Error, GenerationBackend, NewResponseItem, ProbeQuery, ProbeQueryRepository,
    QueryCategory, ResponseCacheRepository, ResponseItemRepository, Result,
};
use geolens_inference::RegisteredProvider;

/// Configuration for the fan-out executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrent provider calls per job.
    pub concurrency: usize,
    /// Maximum retry attempts for a transient failure.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    pub backoff_cap_ms: u64,
    /// Cache entry time-to-live in seconds.
    pub cache_ttl_secs: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: FANOUT_CONCURRENCY,
            max_retries: PROVIDER_MAX_RETRIES,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_cap_ms: BACKOFF_CAP_MS,
            cache_ttl_secs: CACHE_TTL_SECS,
        }
    }
}

impl ExecutorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GEOLENS_FANOUT_CONCURRENCY` | `4` | Concurrent provider calls per job |
    /// | `GEOLENS_PROVIDER_MAX_RETRIES` | `3` | Retries per transient failure |
    /// | `GEOLENS_CACHE_TTL_SECS` | `86400` | Response cache TTL |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("GEOLENS_FANOUT_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.concurrency)
                .max(1),
            max_retries: std::env::var("GEOLENS_PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            cache_ttl_secs: std::env::var("GEOLENS_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_ttl_secs),
            ..defaults
        }
    }

    /// Set the per-job concurrency limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff window.
    pub fn with_backoff_ms(mut self, base: u64, cap: u64) -> Self {
        self.backoff_base_ms = base;
        self.backoff_cap_ms = cap.max(base);
        self
    }
}

/// Summary of one fan-out round.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Response items persisted this round.
    pub items_inserted: usize,
    /// Queries no provider answered (surfaced as degraded coverage).
    pub uncovered_queries: Vec<Uuid>,
    /// (query, provider) pairs served from the cache.
    pub cache_hits: usize,
}

/// Outcome of one (query, provider) probe.
struct ProbeOutcome {
    query_id: Uuid,
    category: QueryCategory,
    provider: String,
    result: Result<String>,
    from_cache: bool,
}

/// Executes provider fan-out for audit jobs.
pub struct FanoutExecutor {
    cache: Arc<dyn ResponseCacheRepository>,
    queries: Arc<dyn ProbeQueryRepository>,
    responses: Arc<dyn ResponseItemRepository>,
    config: ExecutorConfig,
}

impl FanoutExecutor {
    /// Create a new executor.
    pub fn new(
        cache: Arc<dyn ResponseCacheRepository>,
        queries: Arc<dyn ProbeQueryRepository>,
        responses: Arc<dyn ResponseItemRepository>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            cache,
            queries,
            responses,
            config,
        }
    }

    /// Fan a job's queries out across its providers.
    ///
    /// Queries that already have response items (a monitor resume) are
    /// skipped; everything else probes every provider concurrently.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn execute(
        &self,
        job: &AuditJob,
        queries: &[ProbeQuery],
        providers: &[RegisteredProvider],
    ) -> Result<ExecutionReport> {
        if providers.is_empty() {
            return Err(Error::Config("fan-out needs at least one provider".into()));
        }

        let existing = self.responses.list_for_job(job.id).await?;
        let already_covered: HashSet<Uuid> = existing.iter().map(|item| item.query_id).collect();
        let mut next_seq: HashMap<QueryCategory, i32> = HashMap::new();
        for item in &existing {
            let entry = next_seq.entry(item.category).or_insert(0);
            *entry = (*entry).max(item.seq + 1);
        }

        let pending: Vec<&ProbeQuery> = queries
            .iter()
            .filter(|query| !already_covered.contains(&query.id))
            .collect();

        debug!(
            pending = pending.len(),
            skipped = queries.len() - pending.len(),
            providers = providers.len(),
            "Starting provider fan-out"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for query in &pending {
            for provider in providers {
                tasks.spawn(Self::probe(
                    semaphore.clone(),
                    self.cache.clone(),
                    self.config.clone(),
                    provider.id.clone(),
                    provider.backend.clone(),
                    query.id,
                    query.category,
                    query.text.clone(),
                ));
            }
        }

        let mut outcomes: HashMap<Uuid, Vec<ProbeOutcome>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.entry(outcome.query_id).or_default().push(outcome),
                Err(e) => error!(error = ?e, "Probe task panicked"),
            }
        }

        let mut report = ExecutionReport::default();
        let mut new_items = Vec::new();

        for query in &pending {
            let mut query_outcomes = outcomes.remove(&query.id).unwrap_or_default();
            // JoinSet yields in completion order; reassemble deterministically.
            query_outcomes.sort_by(|a, b| a.provider.cmp(&b.provider));

            let mut covered = 0;
            let mut failed = 0;
            for outcome in query_outcomes {
                match outcome.result {
                    Ok(raw_text) => {
                        covered += 1;
                        if outcome.from_cache {
                            report.cache_hits += 1;
                        }
                        let seq = next_seq.entry(outcome.category).or_insert(0);
                        new_items.push(NewResponseItem {
                            query_id: outcome.query_id,
                            provider: outcome.provider,
                            category: outcome.category,
                            seq: *seq,
                            raw_text,
                        });
                        *seq += 1;
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(
                            query_id = %outcome.query_id,
                            provider = %outcome.provider,
                            error = %e,
                            "Provider failed for query"
                        );
                    }
                }
            }

            self.queries.record_coverage(query.id, covered, failed).await?;
            if covered == 0 {
                warn!(query_id = %query.id, "Query has zero successful providers");
                report.uncovered_queries.push(query.id);
            }
        }

        if !new_items.is_empty() {
            report.items_inserted = self.responses.insert_many(job.id, &new_items).await?.len();
        }

        info!(
            items = report.items_inserted,
            cache_hits = report.cache_hits,
            uncovered = report.uncovered_queries.len(),
            "Fan-out complete"
        );
        Ok(report)
    }

    /// One (query, provider) probe: cache-first, then call with backoff.
    #[allow(clippy::too_many_arguments)]
    async fn probe(
        semaphore: Arc<Semaphore>,
        cache: Arc<dyn ResponseCacheRepository>,
        config: ExecutorConfig,
        provider_id: String,
        backend: Arc<dyn GenerationBackend>,
        query_id: Uuid,
        category: QueryCategory,
        text: String,
    ) -> ProbeOutcome {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return ProbeOutcome {
                query_id,
                category,
                provider: provider_id,
                result: Err(Error::Internal("fan-out semaphore closed".into())),
                from_cache: false,
            };
        };

        let key = cache_key(&provider_id, backend.model_name(), &text);
        match cache.get(&key).await {
            Ok(Some(body)) => {
                return ProbeOutcome {
                    query_id,
                    category,
                    provider: provider_id,
                    result: Ok(body),
                    from_cache: true,
                };
            }
            Ok(None) => {}
            // A cache read failure degrades to a live call.
            Err(e) => warn!(provider = %provider_id, error = %e, "Cache read failed"),
        }

        let result = generate_with_backoff(backend.as_ref(), &text, &config).await;

        if let Ok(ref body) = result {
            if let Err(e) = cache.put(&key, &provider_id, body, config.cache_ttl_secs).await {
                warn!(provider = %provider_id, error = %e, "Cache write failed");
            }
        }

        ProbeOutcome {
            query_id,
            category,
            provider: provider_id,
            result,
            from_cache: false,
        }
    }
}

/// Cache key for a (query, provider) pair.
pub(crate) fn cache_key(provider_id: &str, model: &str, query_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(model.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(query_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Call a backend with bounded exponential backoff on transient failures.
async fn generate_with_backoff(
    backend: &dyn GenerationBackend,
    prompt: &str,
    config: &ExecutorConfig,
) -> Result<String> {
    let mut attempt: u32 = 0;
    loop {
        match backend.generate(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let exp = config
                    .backoff_base_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16))
                    .min(config.backoff_cap_ms);
                let jitter = rand::thread_rng().gen_range(0..=exp / 4 + 1);
                debug!(
                    attempt,
                    delay_ms = exp + jitter,
                    error = %e,
                    "Transient provider failure, backing off"
                );
                sleep(Duration::from_millis(exp + jitter)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryStore;
    use geolens_core::{AuditSpec, JobPhase, JobStatus};
    use geolens_inference::{MockBackend, MockFailure};

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig::default().with_backoff_ms(1, 2)
    }

    fn executor(store: &Arc<InMemoryStore>) -> FanoutExecutor {
        FanoutExecutor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            fast_config(),
        )
    }

    fn registered(id: &str, backend: MockBackend) -> RegisteredProvider {
        RegisteredProvider {
            id: id.to_string(),
            backend: Arc::new(backend),
        }
    }

    async fn seeded_job(store: &Arc<InMemoryStore>) -> (AuditJob, Vec<ProbeQuery>) {
        let profile = store.seed_profile("Acme").await;
        let spec = AuditSpec {
            providers: vec!["p1".into(), "p2".into()],
            categories: vec![QueryCategory::Comparison],
            query_budget: None,
        };
        let job = store.seed_job(profile.id, &spec, JobStatus::Processing, JobPhase::Executing).await;
        let queries = store
            .seed_queries(job.id, &[("acme vs globex", QueryCategory::Comparison)])
            .await;
        (job, queries)
    }

    #[tokio::test]
    async fn provider_failure_is_isolated_per_query() {
        // Scenario B: P1 times out, P2 succeeds -> one item from P2, the
        // query is partially covered, the round succeeds.
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let p1 = MockBackend::new().with_failure("acme", MockFailure::Timeout);
        let p2 = MockBackend::new().with_default_response("Globex wins on price.");

        let report = executor(&store)
            .execute(&job, &queries, &[registered("p1", p1), registered("p2", p2.clone())])
            .await
            .unwrap();

        assert_eq!(report.items_inserted, 1);
        assert!(report.uncovered_queries.is_empty());

        let items = store.items_for_job(job.id).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].provider, "p2");
        assert_eq!(items[0].raw_text, "Globex wins on price.");

        let coverage = store.query_coverage(queries[0].id).await;
        assert_eq!(coverage, (1, 1));
    }

    #[tokio::test]
    async fn zero_successful_providers_marks_query_uncovered() {
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let p1 = MockBackend::new().with_failure("acme", MockFailure::Timeout);
        let p2 = MockBackend::new().with_failure("acme", MockFailure::RateLimited);

        let report = executor(&store)
            .execute(&job, &queries, &[registered("p1", p1), registered("p2", p2)])
            .await
            .unwrap();

        // The job proceeds; degraded coverage is data, not an error.
        assert_eq!(report.items_inserted, 0);
        assert_eq!(report.uncovered_queries, vec![queries[0].id]);
        assert_eq!(store.query_coverage(queries[0].id).await, (0, 2));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_backoff() {
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let flaky = MockBackend::new()
            .with_transient_failures("acme", MockFailure::RateLimited, 2)
            .with_default_response("eventual answer");

        let report = executor(&store)
            .execute(&job, &queries, &[registered("p1", flaky.clone())])
            .await
            .unwrap();

        assert_eq!(report.items_inserted, 1);
        assert_eq!(flaky.call_count(), 3);
    }

    #[tokio::test]
    async fn non_transient_failures_are_not_retried() {
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let broken = MockBackend::new().with_failure("acme", MockFailure::Inference);

        executor(&store)
            .execute(&job, &queries, &[registered("p1", broken.clone())])
            .await
            .unwrap();

        assert_eq!(broken.call_count(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_the_provider_call() {
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let backend = MockBackend::new().with_default_response("live answer");
        let key = cache_key("p1", backend.model_name(), &queries[0].text);
        store.put(&key, "p1", "cached answer", 3600).await.unwrap();

        let report = executor(&store)
            .execute(&job, &queries, &[registered("p1", backend.clone())])
            .await
            .unwrap();

        assert_eq!(report.cache_hits, 1);
        assert_eq!(backend.call_count(), 0);

        let items = store.items_for_job(job.id).await;
        assert_eq!(items[0].raw_text, "cached answer");
    }

    #[tokio::test]
    async fn successful_responses_are_cached() {
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let backend = MockBackend::new().with_default_response("fresh answer");
        executor(&store)
            .execute(&job, &queries, &[registered("p1", backend.clone())])
            .await
            .unwrap();

        let key = cache_key("p1", backend.model_name(), &queries[0].text);
        assert_eq!(store.get(&key).await.unwrap().unwrap(), "fresh answer");
    }

    #[tokio::test]
    async fn resume_skips_already_covered_queries() {
        let store = InMemoryStore::new();
        let (job, queries) = seeded_job(&store).await;

        let backend = MockBackend::new();
        let exec = executor(&store);
        exec.execute(&job, &queries, &[registered("p1", backend.clone())])
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 1);

        // Re-running (monitor resume) does not re-probe covered queries.
        let report = exec
            .execute(&job, &queries, &[registered("p1", backend.clone())])
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(report.items_inserted, 0);
    }

    #[tokio::test]
    async fn seq_is_contiguous_per_category() {
        let store = InMemoryStore::new();
        let profile = store.seed_profile("Acme").await;
        let spec = AuditSpec {
            providers: vec!["p1".into()],
            categories: vec![],
            query_budget: None,
        };
        let job = store
            .seed_job(profile.id, &spec, JobStatus::Processing, JobPhase::Executing)
            .await;
        let queries = store
            .seed_queries(
                job.id,
                &[
                    ("q1", QueryCategory::Awareness),
                    ("q2", QueryCategory::Awareness),
                    ("q3", QueryCategory::Comparison),
                ],
            )
            .await;

        executor(&store)
            .execute(&job, &queries, &[registered("p1", MockBackend::new())])
            .await
            .unwrap();

        let items = store.items_for_job(job.id).await;
        let awareness: Vec<i32> = items
            .iter()
            .filter(|i| i.category == QueryCategory::Awareness)
            .map(|i| i.seq)
            .collect();
        let comparison: Vec<i32> = items
            .iter()
            .filter(|i| i.category == QueryCategory::Comparison)
            .map(|i| i.seq)
            .collect();
        assert_eq!(awareness, vec![0, 1]);
        assert_eq!(comparison, vec![0]);
    }

    #[test]
    fn cache_key_is_stable_and_distinct() {
        let a = cache_key("p1", "m1", "query");
        assert_eq!(a, cache_key("p1", "m1", "query"));
        assert_ne!(a, cache_key("p2", "m1", "query"));
        assert_ne!(a, cache_key("p1", "m2", "query"));
        assert_ne!(a, cache_key("p1", "m1", "other"));
    }
}
