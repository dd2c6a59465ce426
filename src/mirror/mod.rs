// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicated rule mirror.
//!
//! The coordinator that ties together:
//! - View provisioning via [`crate::view::ViewProvisioner`]
//! - The live feed via [`crate::store::ReplicationSource`]
//! - The rule cache via [`crate::cache::RuleCache`]
//! - Matching via [`crate::matcher`]
//!
//! # Lifecycle
//!
//! 1. `create()` once at system setup (provisions the view)
//! 2. `start()` subscribes and resolves once the initial snapshot landed
//! 3. `all()` / `match_against()` as often as needed
//! 4. `stop()` cancels the feed and resolves once it has torn down
//! 5. `destroy()` once at teardown
//!
//! Every method takes `&self`; share the mirror in an `Arc` between the
//! lifecycle owner and the query callers.

mod feed_task;
mod types;

pub use types::{ChangeNotice, MirrorState};

use crate::cache::RuleCache;
use crate::config::MirrorConfig;
use crate::document::Rule;
use crate::error::{MirrorError, Result};
use crate::feed::{FeedCanceller, FeedOptions};
use crate::matcher;
use crate::memory::InMemoryStore;
use crate::metrics;
use crate::store::{DocumentStore, ReplicationSource};
use crate::view::ViewProvisioner;
use feed_task::FeedContext;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// State shared between the mirror and its feed task.
pub(crate) struct Shared {
    /// Mirror name for logs and metrics
    name: String,

    /// The mirror itself. Written only by the feed task.
    rules: RwLock<RuleCache>,

    /// Lifecycle state (broadcast to watchers)
    state_tx: watch::Sender<MirrorState>,

    /// Load milestone, latched once per start()
    loaded_tx: watch::Sender<bool>,

    /// Change notifications for downstream caches
    changes_tx: broadcast::Sender<ChangeNotice>,

    /// Feed sequence of the last applied change
    last_seq: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: MirrorState) {
        self.state_tx.send_replace(state);
        metrics::set_mirror_state(&self.name, &state.to_string());
    }

    /// Move `from → to` only if currently in `from`.
    fn transition(&self, from: MirrorState, to: MirrorState) -> bool {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            metrics::set_mirror_state(&self.name, &to.to_string());
        }
        changed
    }

    fn notify(&self, notice: ChangeNotice) {
        // No subscribers is fine
        let _ = self.changes_tx.send(notice);
    }
}

/// The live subscription owned by a running mirror.
struct ActiveFeed {
    canceller: FeedCanceller,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// In-memory mirror of the rule collection, kept current by a replication feed.
pub struct RuleMirror<S: DocumentStore + ReplicationSource = InMemoryStore> {
    /// Configuration
    config: MirrorConfig,

    /// Document store / replication source
    store: Arc<S>,

    /// View provisioning
    provisioner: ViewProvisioner<S>,

    /// Cache, state and milestone shared with the feed task
    shared: Arc<Shared>,

    /// The running feed; also serializes start() and stop()
    active: Mutex<Option<ActiveFeed>>,
}

impl RuleMirror<InMemoryStore> {
    /// Create a mirror over a fresh in-process store (for testing/standalone).
    pub fn new(config: MirrorConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }
}

impl<S: DocumentStore + ReplicationSource> RuleMirror<S> {
    /// Create a mirror over a store.
    ///
    /// The mirror starts `Idle` and empty. Call [`start()`](Self::start)
    /// to subscribe.
    pub fn with_store(config: MirrorConfig, store: Arc<S>) -> Self {
        let (state_tx, _) = watch::channel(MirrorState::Idle);
        let (loaded_tx, _) = watch::channel(false);
        let (changes_tx, _) = broadcast::channel(config.feed.notify_capacity.max(1));

        let provisioner =
            ViewProvisioner::new(Arc::clone(&store), config.collection(), config.view_spec());

        let shared = Arc::new(Shared {
            name: config.mirror_name(),
            rules: RwLock::new(RuleCache::new()),
            state_tx,
            loaded_tx,
            changes_tx,
            last_seq: AtomicU64::new(0),
        });

        Self {
            config,
            store,
            provisioner,
            shared,
            active: Mutex::new(None),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get current state.
    pub fn state(&self) -> MirrorState {
        *self.shared.state_tx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<MirrorState> {
        self.shared.state_tx.subscribe()
    }

    /// Check whether the load milestone has fired for the current run.
    pub fn is_loaded(&self) -> bool {
        *self.shared.loaded_tx.borrow()
    }

    /// Subscribe to change notifications (one per applied batch or resync).
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.shared.changes_tx.subscribe()
    }

    /// Feed sequence of the last applied change.
    pub fn last_seq(&self) -> u64 {
        self.shared.last_seq.load(Ordering::Acquire)
    }

    /// Number of cached rules right now (does not wait for the load).
    pub async fn rule_count(&self) -> usize {
        self.shared.rules.read().await.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Provisioning
    // ═══════════════════════════════════════════════════════════════════════

    /// Create (or update) the server-side rule view.
    pub async fn create(&self) -> Result<()> {
        self.provisioner.create().await
    }

    /// Remove the server-side rule view. Already absent is fine.
    pub async fn destroy(&self) -> Result<()> {
        self.provisioner.destroy().await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Subscribe to the rule feed and wait for the initial snapshot.
    ///
    /// Resolves once the mirror reflects at least the full upstream state
    /// as of the subscription. Fails with `InvalidState` unless `Idle`,
    /// and with `FeedClosed` if the feed ends before catching up.
    pub async fn start(&self) -> Result<()> {
        let started_at = Instant::now();
        {
            let mut active = self.active.lock().await;

            let state = self.state();
            if state != MirrorState::Idle {
                return Err(MirrorError::InvalidState {
                    expected: MirrorState::Idle.to_string(),
                    actual: state.to_string(),
                });
            }

            // A feed that died on its own leaves its handle behind
            if let Some(stale) = active.take() {
                debug!("Reaping finished feed from previous run");
                stale.canceller.cancel();
                stale.task.abort();
                let _ = stale.task.await;
            }

            info!(
                mirror = %self.shared.name,
                collection = %self.config.collection(),
                view = %self.config.view.view_name,
                "Starting rule mirror"
            );

            self.shared.rules.write().await.clear();
            metrics::set_rule_count(&self.shared.name, 0);
            self.shared.last_seq.store(0, Ordering::Release);
            self.shared.loaded_tx.send_replace(false);
            self.shared.set_state(MirrorState::Starting);

            let options = FeedOptions {
                view: self.config.view_spec(),
                continuous: true,
                auto_retry: true,
                batch_limit: self.config.feed.batch_limit,
                retry_delay: self.config.feed.retry_delay_duration(),
            };

            let handle = match self.store.subscribe(self.config.collection(), options).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to rule feed");
                    self.shared.set_state(MirrorState::Idle);
                    return Err(e);
                }
            };
            let (events, canceller) = handle.into_parts();
            let (stop_tx, stop_rx) = watch::channel(false);

            let ctx = FeedContext {
                shared: Arc::clone(&self.shared),
                store: Arc::clone(&self.store),
                collection: self.config.collection().to_string(),
                view: self.config.view_spec(),
                retry_delay: self.config.feed.retry_delay_duration(),
                started_at,
            };
            let span = tracing::info_span!(
                "rule_feed",
                mirror = %self.shared.name,
                collection = %self.config.collection()
            );
            let task = tokio::spawn(feed_task::run_feed(ctx, events, stop_rx).instrument(span));

            *active = Some(ActiveFeed {
                canceller,
                stop_tx,
                task,
            });
        }

        // Lock released: stop() may run while we wait
        let mut state_rx = self.shared.state_tx.subscribe();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                MirrorState::Ready => break,
                MirrorState::Starting => {}
                MirrorState::Idle | MirrorState::Stopping => {
                    if self.is_loaded() {
                        break;
                    }
                    return Err(if state == MirrorState::Idle {
                        MirrorError::FeedClosed
                    } else {
                        MirrorError::Shutdown
                    });
                }
            }
            if state_rx.changed().await.is_err() {
                return Err(MirrorError::Internal("state channel closed".to_string()));
            }
        }

        let rules = self.rule_count().await;
        info!(
            mirror = %self.shared.name,
            rules = rules,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Rule mirror ready"
        );
        Ok(())
    }

    /// Cancel the feed and wait until it has fully torn down.
    ///
    /// A no-op when nothing is running. Once this resolves, no batch will
    /// be applied to the mirror. The cached rules stay readable.
    pub async fn stop(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        let Some(mut feed) = active.take() else {
            debug!(mirror = %self.shared.name, "stop() with no active feed");
            return Ok(());
        };

        info!(mirror = %self.shared.name, "Stopping rule mirror");
        self.shared.set_state(MirrorState::Stopping);

        // Stop applying first, then tear down the subscription
        feed.stop_tx.send_replace(true);
        feed.canceller.cancel();

        let stop_timeout = self.config.feed.stop_timeout_duration();
        if tokio::time::timeout(stop_timeout, feed.canceller.completed())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = stop_timeout.as_millis() as u64,
                "Feed did not confirm teardown in time"
            );
        }

        match tokio::time::timeout(stop_timeout, &mut feed.task).await {
            Ok(Ok(())) => debug!("Feed task completed gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Feed task panicked during stop"),
            Err(_) => {
                warn!("Feed task timed out during stop, aborting");
                feed.task.abort();
                let _ = feed.task.await;
            }
        }

        self.shared.set_state(MirrorState::Idle);
        info!(mirror = %self.shared.name, "Rule mirror stopped");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Wait for the load milestone of the current run.
    pub async fn wait_loaded(&self) {
        let mut loaded_rx = self.shared.loaded_tx.subscribe();
        while !*loaded_rx.borrow_and_update() {
            if loaded_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// All cached rules, keyed by id.
    ///
    /// Waits for the initial load, then returns a copy consistent as of
    /// the call.
    pub async fn all(&self) -> HashMap<String, Rule> {
        self.wait_loaded().await;
        self.shared.rules.read().await.snapshot()
    }

    /// Return the candidate names matched by at least one rule.
    ///
    /// Waits for the initial load. Each matching name appears once. See
    /// [`MalformedPatternPolicy`](crate::config::MalformedPatternPolicy) for
    /// how rules with a bad pattern are handled.
    pub async fn match_against<N: AsRef<str>>(&self, candidates: &[N]) -> Result<BTreeSet<String>> {
        self.wait_loaded().await;

        let started = Instant::now();
        let result = {
            let rules = self.shared.rules.read().await;
            matcher::match_names(
                rules.iter(),
                candidates,
                self.config.matcher.malformed_pattern,
            )
        };

        match &result {
            Ok(matched) => {
                metrics::record_match(candidates.len(), matched.len(), started.elapsed());
            }
            Err(e) => {
                warn!(error = %e, candidates = candidates.len(), "Match failed");
            }
        }
        result
    }
}
