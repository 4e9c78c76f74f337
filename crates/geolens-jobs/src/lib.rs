//! # geolens-jobs
//!
//! The audit job pipeline for geolens.
//!
//! This crate provides:
//! - The dispatcher owning the job phase state machine
//! - Weighted query planning
//! - Bounded concurrent provider fan-out with cache-first probes
//! - Fixed-size batch extraction (three insight calls + one structured
//!   per-item metrics call per batch)
//! - Validated metrics persistence and the three-layer strategic aggregator
//! - The heartbeat monitor with bounded, idempotent stuck-job recovery
//! - The worker claim loop and the `audit-worker` binary
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use geolens_jobs::{AuditDispatcher, AuditWorker, EventBus, HeartbeatMonitor,
//!                    MonitorConfig, PipelineConfig, PipelineStores, WorkerConfig};
//! use geolens_inference::ProviderRegistry;
//!
//! let registry = Arc::new(ProviderRegistry::from_env()?);
//! let events = EventBus::new();
//! let dispatcher = Arc::new(AuditDispatcher::new(
//!     stores.clone(), registry, PipelineConfig::from_env(), hook, events.clone(),
//! ));
//!
//! let worker = AuditWorker::new(stores.jobs.clone(), dispatcher, WorkerConfig::from_env(), events.clone());
//! let handle = worker.start();
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod aggregator;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod extraction;
pub mod metrics_writer;
pub mod monitor;
pub mod planner;
pub mod prompts;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-export core types
pub use geolens_core::*;

// Re-export pipeline types
pub use aggregator::{AggregatorConfig, StrategicAggregator};
pub use dispatcher::{AuditDispatcher, CancelRegistry, PipelineConfig, PipelineStores};
pub use events::{AuditEvent, EventBus};
pub use executor::{ExecutionReport, ExecutorConfig, FanoutExecutor};
pub use extraction::{BatchExtraction, BatchExtractor, ExtractionConfig, RawItemMetrics};
pub use metrics_writer::MetricsWriter;
pub use monitor::{HeartbeatMonitor, MonitorConfig, MonitorHandle, SweepReport};
pub use planner::{PlannerConfig, QueryPlanner};
pub use worker::{AuditWorker, WorkerConfig, WorkerHandle};
