// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication feed events and the handle to a live subscription.
//!
//! A [`ReplicationSource`](crate::store::ReplicationSource) hands back a
//! [`FeedHandle`]: a channel of [`FeedEvent`]s plus a [`FeedCanceller`]
//! that tears the subscription down.
//!
//! # Event Order
//!
//! ```text
//! Batch* ── CaughtUp ── (Batch | TransportError | CaughtUp)* ── channel closed
//!  backlog   first          live streaming                       after cancel
//! ```
//!
//! Batches are delivered in upstream sequence order. The source must not
//! send anything after its completion signal fires.

use crate::error::MirrorError;
use crate::store::ViewSpec;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Options for opening a subscription.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Only stream documents selected by this view.
    pub view: ViewSpec,
    /// Keep streaming after the backlog is drained.
    pub continuous: bool,
    /// Let the source retry transient failures itself.
    pub auto_retry: bool,
    /// Maximum documents per batch.
    pub batch_limit: usize,
    /// Delay between retries when `auto_retry` is set.
    pub retry_delay: Duration,
}

/// An event delivered by a live subscription.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Changed documents, in sequence order. Deleted documents carry
    /// `"_deleted": true`.
    Batch {
        /// Sequence of the last change in this batch.
        last_seq: u64,
        docs: Vec<Value>,
    },

    /// The feed has delivered everything currently known and is now live.
    CaughtUp { last_seq: u64 },

    /// A transient failure. The source keeps retrying.
    TransportError(MirrorError),
}

impl FeedEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Batch { .. } => "batch",
            FeedEvent::CaughtUp { .. } => "caught_up",
            FeedEvent::TransportError(_) => "transport_error",
        }
    }
}

/// Handle to a live subscription.
#[derive(Debug)]
pub struct FeedHandle {
    events: mpsc::Receiver<FeedEvent>,
    canceller: FeedCanceller,
}

impl FeedHandle {
    /// Wire up a handle. Returns the handle for the consumer and the
    /// producer half for the source.
    pub fn channel(capacity: usize) -> (Self, FeedProducer) {
        let (events_tx, events) = mpsc::channel(capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();

        let handle = Self {
            events,
            canceller: FeedCanceller {
                cancel_tx,
                done_rx: Some(done_rx),
            },
        };
        let producer = FeedProducer {
            events: events_tx,
            cancel_rx,
            done_tx,
        };
        (handle, producer)
    }

    /// Split into the event stream and the cancel half.
    pub fn into_parts(self) -> (mpsc::Receiver<FeedEvent>, FeedCanceller) {
        (self.events, self.canceller)
    }

    /// Receive the next event (`None` once the feed has shut down).
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

/// Cancel half of a [`FeedHandle`].
#[derive(Debug)]
pub struct FeedCanceller {
    cancel_tx: watch::Sender<bool>,
    done_rx: Option<oneshot::Receiver<()>>,
}

impl FeedCanceller {
    /// Ask the source to stop. Returns immediately.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Check whether cancel has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Wait until the source reports full teardown.
    ///
    /// A source that drops its producer without signalling also counts as
    /// torn down. Resolves immediately on later calls.
    pub async fn completed(&mut self) {
        if let Some(done_rx) = self.done_rx.take() {
            let _ = done_rx.await;
        }
    }
}

/// Producer half of a subscription, held by the source's feed task.
#[derive(Debug)]
pub struct FeedProducer {
    events: mpsc::Sender<FeedEvent>,
    cancel_rx: watch::Receiver<bool>,
    done_tx: oneshot::Sender<()>,
}

impl FeedProducer {
    /// Send an event. Returns `false` when the feed was cancelled or the
    /// consumer went away, in which case the producer should exit.
    pub async fn send(&mut self, event: FeedEvent) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = cancel_requested(&mut self.cancel_rx) => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    /// Check whether the consumer asked to cancel.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow() || self.events.is_closed()
    }

    /// Resolve once cancel is requested or the consumer is gone.
    pub async fn cancelled(&mut self) {
        let events = self.events.clone();
        tokio::select! {
            _ = cancel_requested(&mut self.cancel_rx) => {}
            _ = events.closed() => {}
        }
    }

    /// Close the event stream and signal completion.
    pub fn complete(self) {
        let FeedProducer { events, done_tx, .. } = self;
        drop(events);
        let _ = done_tx.send(());
    }
}

/// Resolve once the flag is set. A dropped sender counts as cancelled.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
