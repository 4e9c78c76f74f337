//! Structured logging schema and field name constants for geolens.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), phase completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (batch items, cache hits) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "planner", "executor", "extraction", "monitor", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "plan", "fan_out", "extract_batch", "finalize", "sweep"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Audit job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Target profile UUID.
pub const PROFILE_ID: &str = "profile_id";

/// Probe query UUID.
pub const QUERY_ID: &str = "query_id";

/// Provider identifier ("openai", "perplexity", ...).
pub const PROVIDER: &str = "provider";

/// Query category slug.
pub const CATEGORY: &str = "category";

/// Job phase at the time of the event.
pub const PHASE: &str = "phase";

/// Zero-based batch index within a category.
pub const BATCH_INDEX: &str = "batch_index";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items in a batch or result set.
pub const ITEM_COUNT: &str = "item_count";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Byte length of a prompt or response.
pub const RESPONSE_LEN: &str = "response_len";

/// Truncated sample of a malformed payload.
pub const PAYLOAD_SAMPLE: &str = "payload_sample";
