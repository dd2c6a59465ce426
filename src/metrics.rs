// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Mirror lifecycle state
//! - Feed batches and documents applied
//! - Catch-up resynchronization
//! - Transport errors absorbed by the feed loop
//! - Match call latency and malformed rules
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `on_change_mirror_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the mirror state as a labelled gauge (1 for the current state).
pub fn set_mirror_state(mirror: &str, state: &str) {
    for s in ["Idle", "Starting", "Ready", "Stopping"] {
        let value = if s == state { 1.0 } else { 0.0 };
        gauge!("on_change_mirror_state", "mirror" => mirror.to_string(), "state" => s).set(value);
    }
}

/// Record the number of cached rules.
pub fn set_rule_count(mirror: &str, count: usize) {
    gauge!("on_change_mirror_rules", "mirror" => mirror.to_string()).set(count as f64);
}

/// Record one applied feed batch.
pub fn record_batch_applied(
    mirror: &str,
    upserted: usize,
    removed: usize,
    skipped: usize,
    duration: Duration,
) {
    let mirror = mirror.to_string();
    counter!("on_change_mirror_batches_applied_total", "mirror" => mirror.clone()).increment(1);
    counter!("on_change_mirror_docs_upserted_total", "mirror" => mirror.clone())
        .increment(upserted as u64);
    counter!("on_change_mirror_docs_removed_total", "mirror" => mirror.clone())
        .increment(removed as u64);
    if skipped > 0 {
        counter!("on_change_mirror_docs_skipped_total", "mirror" => mirror.clone())
            .increment(skipped as u64);
    }
    histogram!("on_change_mirror_batch_apply_duration_seconds", "mirror" => mirror)
        .record(duration.as_secs_f64());
}

/// Record a catch-up resync.
pub fn record_resync(mirror: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("on_change_mirror_resyncs_total", "mirror" => mirror.to_string(), "status" => status)
        .increment(1);
    histogram!("on_change_mirror_resync_duration_seconds", "mirror" => mirror.to_string())
        .record(duration.as_secs_f64());
}

/// Record a transport error seen on the feed.
pub fn record_transport_error(mirror: &str) {
    counter!("on_change_mirror_transport_errors_total", "mirror" => mirror.to_string()).increment(1);
}

/// Record time from `start()` to the load milestone.
pub fn record_initial_load(mirror: &str, duration: Duration) {
    histogram!("on_change_mirror_initial_load_duration_seconds", "mirror" => mirror.to_string())
        .record(duration.as_secs_f64());
}

/// Record a match call.
pub fn record_match(candidates: usize, matched: usize, duration: Duration) {
    counter!("on_change_mirror_match_calls_total").increment(1);
    histogram!("on_change_mirror_match_candidates").record(candidates as f64);
    histogram!("on_change_mirror_match_matched").record(matched as f64);
    histogram!("on_change_mirror_match_duration_seconds").record(duration.as_secs_f64());
}

/// Record a malformed rule encountered during matching.
///
/// Labelled by policy (`fail` / `skip`) only; the rule id goes to the log.
pub fn record_malformed_rule(policy: &'static str) {
    counter!("on_change_mirror_malformed_rules_total", "policy" => policy).increment(1);
}

/// Record a provisioning call.
pub fn record_provisioning(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "on_change_mirror_provisioning_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}
