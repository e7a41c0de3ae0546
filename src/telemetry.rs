//! Telemetry metric name constants.
//!
//! Centralised metric names for vellum operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `vellum_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `operation`: AI operation name (e.g. "generate-summary", "ats-analysis")
//! - `plan`: billing plan: "free" or "premium"
//! - `reason`: denial reason (e.g. "insufficient_credits")

/// Total cache hits.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "vellum_cache_hits_total";

/// Total cache misses, including expired entries found at lookup.
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "vellum_cache_misses_total";

/// Total entries evicted to make room under the capacity bound.
///
/// Labels: `operation`.
pub const CACHE_EVICTIONS_TOTAL: &str = "vellum_cache_evictions_total";

/// Total cache misses whose producer returned an error.
///
/// Through [`MeteredGateway`](crate::MeteredGateway) this includes quota
/// denials, which surface as producer errors of the wrapped producer.
///
/// Labels: `operation`.
pub const PRODUCER_ERRORS_TOTAL: &str = "vellum_producer_errors_total";

/// Total credits deducted (incremented by the operation's cost).
///
/// Labels: `operation`, `plan`.
pub const CREDITS_DEDUCTED_TOTAL: &str = "vellum_credits_deducted_total";

/// Total credit checks that ended in a denial.
///
/// Labels: `operation`, `reason`.
pub const CREDIT_DENIALS_TOTAL: &str = "vellum_credit_denials_total";

/// Total account-store transaction conflicts that triggered a retry.
pub const LEDGER_CONFLICTS_TOTAL: &str = "vellum_ledger_conflicts_total";

/// Total requests admitted through the credit bypass.
///
/// Labels: `operation`.
pub const CREDIT_BYPASS_TOTAL: &str = "vellum_credit_bypass_total";
