//! # geolens-db
//!
//! PostgreSQL database layer for geolens.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for all pipeline entities
//! - Atomic claim and phase-transition writes for the job state machine
//! - Keyset-paginated scans for the monitor and cache maintenance
//!
//! ## Example
//!
//! ```rust,ignore
//! use geolens_db::Database;
//! use geolens_core::{AuditJobRepository, AuditSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/geolens").await?;
//!     db.migrate().await?;
//!
//!     let job_id = db.jobs.enqueue(profile_id, &AuditSpec {
//!         providers: vec!["openai".into(), "perplexity".into()],
//!         categories: vec![],
//!         query_budget: None,
//!     }).await?;
//!
//!     println!("Enqueued audit job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod insights;
pub mod jobs;
pub mod metrics;
pub mod pool;
pub mod profiles;
pub mod queries;
pub mod responses;

// Re-export core types
pub use geolens_core::*;

// Re-export repository implementations
pub use cache::PgResponseCacheRepository;
pub use insights::PgInsightRepository;
pub use jobs::PgAuditJobRepository;
pub use metrics::PgItemMetricsRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use profiles::PgProfileRepository;
pub use queries::PgProbeQueryRepository;
pub use responses::PgResponseItemRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Audit job repository (state machine rows).
    pub jobs: PgAuditJobRepository,
    /// Target profile repository.
    pub profiles: PgProfileRepository,
    /// Probe query repository.
    pub queries: PgProbeQueryRepository,
    /// Response item repository.
    pub responses: PgResponseItemRepository,
    /// Per-item metrics repository.
    pub metrics: PgItemMetricsRepository,
    /// Insight repository (batch insights, aggregation layers, summary).
    pub insights: PgInsightRepository,
    /// Provider response cache.
    pub cache: PgResponseCacheRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgAuditJobRepository::new(pool.clone()),
            profiles: PgProfileRepository::new(pool.clone()),
            queries: PgProbeQueryRepository::new(pool.clone()),
            responses: PgResponseItemRepository::new(pool.clone()),
            metrics: PgItemMetricsRepository::new(pool.clone()),
            insights: PgInsightRepository::new(pool.clone()),
            cache: PgResponseCacheRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
