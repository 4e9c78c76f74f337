//! audit-worker - the geolens audit pipeline worker process.
//!
//! Connects to the durable store, builds the provider registry from the
//! environment, and runs the claim-loop worker plus the stuck-job monitor
//! until interrupted.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geolens_core::{NoOpCompletionHook, Result};
use geolens_db::Database;
use geolens_inference::ProviderRegistry;
use geolens_jobs::{
    AuditDispatcher, AuditEvent, AuditWorker, EventBus, HeartbeatMonitor, MonitorConfig,
    PipelineConfig, PipelineStores, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    //
    // Environment variables:
    //   LOG_FORMAT - "json" or "text" (default: "text")
    //   RUST_LOG   - standard env filter (default: "geolens_jobs=debug,geolens_db=info")
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "geolens_jobs=debug,geolens_db=info,geolens_inference=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;

    let db = Database::connect(&database_url).await?;
    db.migrate().await?;
    info!("Database ready");

    let providers = Arc::new(ProviderRegistry::from_env()?);
    info!(providers = ?providers.probe_ids(), "Provider registry ready");

    let stores = pipeline_stores(&db)?;
    let events = EventBus::new();
    let hook = Arc::new(NoOpCompletionHook);

    let dispatcher = Arc::new(AuditDispatcher::new(
        stores.clone(),
        providers,
        PipelineConfig::from_env(),
        hook.clone(),
        events.clone(),
    ));

    let worker = AuditWorker::new(
        stores.jobs.clone(),
        dispatcher,
        WorkerConfig::from_env(),
        events.clone(),
    );
    let worker_handle = worker.start();

    let monitor = HeartbeatMonitor::new(
        stores.jobs.clone(),
        stores.responses.clone(),
        stores.insights.clone(),
        stores.cache.clone(),
        hook,
        MonitorConfig::from_env(),
        events.clone(),
    );
    let monitor_handle = monitor.start();

    // Relay pipeline events into the log stream.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                AuditEvent::JobFailed { job_id, error } => {
                    warn!(%job_id, %error, "audit job failed")
                }
                other => info!(event = ?other, "pipeline event"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    worker_handle.shutdown().await?;
    monitor_handle.shutdown().await?;

    Ok(())
}

/// Assemble the trait-object store bundle from the database context.
fn pipeline_stores(db: &Database) -> Result<PipelineStores> {
    let pool = db.pool().clone();
    Ok(PipelineStores {
        jobs: Arc::new(geolens_db::PgAuditJobRepository::new(pool.clone())),
        profiles: Arc::new(geolens_db::PgProfileRepository::new(pool.clone())),
        queries: Arc::new(geolens_db::PgProbeQueryRepository::new(pool.clone())),
        responses: Arc::new(geolens_db::PgResponseItemRepository::new(pool.clone())),
        metrics: Arc::new(geolens_db::PgItemMetricsRepository::new(pool.clone())),
        insights: Arc::new(geolens_db::PgInsightRepository::new(pool.clone())),
        cache: Arc::new(geolens_db::PgResponseCacheRepository::new(pool)),
    })
}
