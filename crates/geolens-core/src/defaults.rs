//! Centralized default constants for the geolens pipeline.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// QUERY PLANNING
// =============================================================================

/// Total probe queries planned per audit job.
///
/// Distributed across categories by the strategic weight table in
/// `categories.rs`; the per-category share is `round(weight * budget)` with
/// a minimum of one query per configured category.
pub const QUERY_BUDGET: usize = 20;

// =============================================================================
// PROVIDER FAN-OUT
// =============================================================================

/// Maximum concurrent provider calls per job.
pub const FANOUT_CONCURRENCY: usize = 4;

/// Maximum retry attempts for a transient provider failure.
pub const PROVIDER_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 500;

/// Upper bound on a single backoff delay in milliseconds.
pub const BACKOFF_CAP_MS: u64 = 8_000;

/// Timeout for a single generation request in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// BATCH EXTRACTION
// =============================================================================

/// Response items per extraction batch.
///
/// One structured call covers the whole batch, so larger batches trade
/// per-item reliability for fewer calls. Eight keeps the per-item metrics
/// array small enough for dependable length-exact output.
pub const EXTRACTION_BATCH_SIZE: usize = 8;

/// Maximum entries retained in any list-typed metric field.
pub const METRIC_LIST_MAX: usize = 10;

/// Maximum entries in a ranked insight list (Layer 1 output).
pub const RANKED_LIST_TOP_N: usize = 5;

/// Characters of raw payload included in malformed-output log samples.
pub const PAYLOAD_SAMPLE_LEN: usize = 240;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum concurrent jobs per worker (global cap).
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default job worker poll interval in milliseconds when the queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// HEARTBEAT MONITOR
// =============================================================================

/// Monitor sweep interval in seconds.
pub const MONITOR_INTERVAL_SECS: u64 = 300;

/// Heartbeat age beyond which a non-terminal job counts as stalled, seconds.
pub const HEARTBEAT_STALE_SECS: i64 = 600;

/// Maximum reprocess attempts before a stuck job is terminally failed.
///
/// This bound is the primary defense against unbounded reprocessing loops.
pub const MAX_REPROCESS_ATTEMPTS: i32 = 3;

/// Stalled-candidate page size for the monitor's keyset scan.
pub const MONITOR_SCAN_PAGE: i64 = 64;

// =============================================================================
// RESPONSE CACHE
// =============================================================================

/// Cache entry time-to-live in seconds (24 hours).
pub const CACHE_TTL_SECS: i64 = 86_400;

/// Page size for cursor-style cache enumeration and expiry purge.
pub const CACHE_SCAN_PAGE: i64 = 256;
