// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Feed task: the single writer of the rule cache.
//!
//! One task per running mirror reads [`FeedEvent`]s in order and applies
//! them one at a time:
//! 1. `Batch`: upserts/deletes under one write lock, then a change notice
//! 2. first `CaughtUp`: full resync from the view, then the load milestone
//! 3. `TransportError`: logged, never fatal
//!
//! # Graceful Shutdown
//!
//! The stop signal is polled first (`biased` select) before every event,
//! so once `stop()` has signalled, no further batch starts applying. A batch
//! already applying finishes under its lock; `stop()` waits for the task to
//! exit, so nothing is applied after `stop()` returns.

use super::types::{ChangeNotice, MirrorState};
use super::Shared;
use crate::feed::FeedEvent;
use crate::metrics;
use crate::store::{DocumentStore, ViewSpec};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Everything the feed task needs, moved into the task.
pub(super) struct FeedContext<S: DocumentStore> {
    pub shared: Arc<Shared>,
    pub store: Arc<S>,
    pub collection: String,
    pub view: ViewSpec,
    /// Pause between failed resync attempts.
    pub retry_delay: Duration,
    pub started_at: Instant,
}

/// Run the feed task until stopped or the feed closes.
pub(super) async fn run_feed<S: DocumentStore>(
    ctx: FeedContext<S>,
    mut events: mpsc::Receiver<FeedEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!("Rule feed task started");
    let mut loaded = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = stop_signalled(&mut stop_rx) => {
                debug!("Stop signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    if loaded {
                        error!("Replication feed closed unexpectedly; mirror keeps last known state");
                    } else {
                        warn!("Replication feed closed before the initial load");
                    }
                    break;
                }
            },
        };

        match event {
            FeedEvent::Batch { last_seq, docs } => {
                let state = *ctx.shared.state_tx.borrow();
                if !state.accepts_batches() {
                    debug!(%state, last_seq, "Dropping batch outside a live state");
                    break;
                }
                apply_batch(&ctx, last_seq, docs).await;
            }
            FeedEvent::CaughtUp { last_seq } => {
                if loaded {
                    debug!(last_seq, "Feed caught up again");
                    continue;
                }
                loaded = match resync(&ctx, last_seq, &mut stop_rx).await {
                    Some(()) => true,
                    None => break, // stopped while retrying
                };
            }
            FeedEvent::TransportError(e) => {
                metrics::record_transport_error(&ctx.shared.name);
                warn!(error = %e, "Replication transport error, feed is retrying");
            }
        }
    }

    if !loaded {
        // Wake start(): the feed ended before it could load
        ctx.shared.transition(MirrorState::Starting, MirrorState::Idle);
    }
    info!(
        last_seq = ctx.shared.last_seq.load(Ordering::Acquire),
        "Rule feed task stopped"
    );
}

/// Apply one batch atomically and notify subscribers.
async fn apply_batch<S: DocumentStore>(ctx: &FeedContext<S>, last_seq: u64, docs: Vec<Value>) {
    let started = Instant::now();
    let doc_count = docs.len();

    let (summary, rule_count) = {
        let mut rules = ctx.shared.rules.write().await;
        let summary = rules.apply_batch(docs);
        (summary, rules.len())
    };
    ctx.shared.last_seq.store(last_seq, Ordering::Release);

    metrics::record_batch_applied(
        &ctx.shared.name,
        summary.upserted,
        summary.removed,
        summary.skipped,
        started.elapsed(),
    );
    metrics::set_rule_count(&ctx.shared.name, rule_count);
    debug!(
        last_seq,
        docs = doc_count,
        upserted = summary.upserted,
        removed = summary.removed,
        skipped = summary.skipped,
        rules = rule_count,
        "Applied feed batch"
    );

    ctx.shared.notify(ChangeNotice {
        last_seq,
        upserted: summary.upserted,
        removed: summary.removed,
        resync: false,
        applied_at_ms: chrono::Utc::now().timestamp_millis(),
    });
}

/// Replace the cache with the full view content and latch the load milestone.
///
/// Retries until it succeeds; returns `None` if stopped first.
async fn resync<S: DocumentStore>(
    ctx: &FeedContext<S>,
    last_seq: u64,
    stop_rx: &mut watch::Receiver<bool>,
) -> Option<()> {
    loop {
        let started = Instant::now();
        match ctx.store.read_view(&ctx.collection, &ctx.view).await {
            Ok(docs) => {
                let (summary, rule_count) = {
                    let mut rules = ctx.shared.rules.write().await;
                    let summary = rules.replace_all(docs);
                    (summary, rules.len())
                };
                ctx.shared.last_seq.fetch_max(last_seq, Ordering::AcqRel);

                metrics::record_resync(&ctx.shared.name, true, started.elapsed());
                metrics::set_rule_count(&ctx.shared.name, rule_count);

                ctx.shared.loaded_tx.send_replace(true);
                if ctx.shared.transition(MirrorState::Starting, MirrorState::Ready) {
                    metrics::record_initial_load(&ctx.shared.name, ctx.started_at.elapsed());
                }
                info!(
                    rules = rule_count,
                    upserted = summary.upserted,
                    removed = summary.removed,
                    skipped = summary.skipped,
                    "Initial load complete"
                );

                ctx.shared.notify(ChangeNotice {
                    last_seq: ctx.shared.last_seq.load(Ordering::Acquire),
                    upserted: summary.upserted,
                    removed: summary.removed,
                    resync: true,
                    applied_at_ms: chrono::Utc::now().timestamp_millis(),
                });
                return Some(());
            }
            Err(e) => {
                metrics::record_resync(&ctx.shared.name, false, started.elapsed());
                warn!(
                    error = %e,
                    retry_in_ms = ctx.retry_delay.as_millis() as u64,
                    "Catch-up resync failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = stop_signalled(stop_rx) => return None,
                    _ = tokio::time::sleep(ctx.retry_delay) => {}
                }
            }
        }
    }
}

/// Resolve once stop is signalled (or the mirror side went away).
async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
