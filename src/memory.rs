// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process document store with a CouchDB-style changes feed.
//!
//! Implements both [`DocumentStore`] and [`ReplicationSource`], so a mirror
//! can run without a database server (tests, standalone mode).
//!
//! # Changes Feed Semantics
//!
//! Every write gets the next sequence number for its collection. The
//! changes log keeps each document once, at its latest sequence, so a feed
//! that starts late sees the current state rather than the full history.
//! Deletes leave a tombstone that still carries the document `type`, which
//! lets view-filtered feeds deliver them.
//!
//! ```text
//! put(a) seq 1 ─┐
//! put(b) seq 2  ├──► by_seq {2: b, 3: a}      feed since 0 → [b, a(deleted)]
//! del(a) seq 3 ─┘
//! ```
//!
//! # Resumable Feed
//!
//! Each subscription runs a producer task holding a cursor. A failed read
//! leaves the cursor where it was, so after the retry delay the same
//! changes are read again: nothing is lost and nothing is delivered twice.

use crate::error::{MirrorError, Result};
use crate::feed::{FeedEvent, FeedHandle, FeedOptions, FeedProducer};
use crate::store::{BoxFuture, DocumentStore, ReplicationSource, ViewSpec};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, trace, warn, Instrument};

/// Buffered feed events per subscription.
const FEED_CHANNEL_CAPACITY: usize = 16;

/// A stored document at its latest revision.
#[derive(Debug, Clone)]
struct StoredDoc {
    seq: u64,
    body: Value,
    deleted: bool,
}

#[derive(Debug, Default)]
struct CollectionData {
    seq: u64,
    docs: HashMap<String, StoredDoc>,
    by_seq: BTreeMap<u64, String>,
    /// Views registered by design documents, keyed by design doc id.
    views: HashMap<String, Vec<ViewSpec>>,
}

/// One page of the changes feed.
#[derive(Debug)]
struct ChangesPage {
    docs: Vec<Value>,
    /// Highest sequence scanned (including filtered-out entries).
    last_seq: u64,
    /// More changes remain after `last_seq`.
    more: bool,
}

impl CollectionData {
    fn write(&mut self, id: String, body: Value, deleted: bool) -> u64 {
        self.seq += 1;
        let seq = self.seq;
        if let Some(old) = self.docs.get(&id) {
            self.by_seq.remove(&old.seq);
        }
        self.by_seq.insert(seq, id.clone());
        self.docs.insert(id, StoredDoc { seq, body, deleted });
        seq
    }

    fn has_view(&self, view: &ViewSpec) -> bool {
        self.views
            .get(&view.design_doc_id)
            .is_some_and(|views| views.contains(view))
    }

    fn changes_since(&self, since: u64, view: &ViewSpec, limit: usize) -> ChangesPage {
        let mut docs = Vec::new();
        let mut last_seq = since;
        let mut more = false;

        for (&seq, id) in self.by_seq.range(since + 1..) {
            if docs.len() >= limit {
                more = true;
                break;
            }
            last_seq = seq;
            let Some(stored) = self.docs.get(id) else {
                continue;
            };
            if view.selects(&stored.body) {
                docs.push(stored.body.clone());
            }
        }

        ChangesPage {
            docs,
            last_seq,
            more,
        }
    }
}

/// A single named collection.
#[derive(Debug)]
struct Collection {
    name: String,
    data: RwLock<CollectionData>,
    /// Latest committed sequence, watched by feed producers.
    head_tx: watch::Sender<u64>,
    /// Number of upcoming feed reads that fail (fault injection).
    feed_faults: AtomicU32,
}

impl Collection {
    fn new(name: &str) -> Self {
        let (head_tx, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            data: RwLock::new(CollectionData::default()),
            head_tx,
            feed_faults: AtomicU32::new(0),
        }
    }

    fn take_fault(&self) -> bool {
        self.feed_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn read_changes(&self, since: u64, view: &ViewSpec, limit: usize) -> Result<ChangesPage> {
        if self.take_fault() {
            return Err(MirrorError::Transport(format!(
                "injected feed failure on {}",
                self.name
            )));
        }
        let data = self.data.read().await;
        if !data.has_view(view) {
            return Err(MirrorError::not_found(&self.name, &view.design_doc_id));
        }
        Ok(data.changes_since(since, view, limit))
    }
}

/// In-process document store.
///
/// Cheap to share: wrap in an `Arc` and hand the same instance to the
/// mirror and to whatever writes rules.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: DashMap<String, Arc<Collection>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.get(name).map(|c| Arc::clone(c.value()))
    }

    fn collection_or_create(&self, name: &str) -> Arc<Collection> {
        Arc::clone(
            self.collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Collection::new(name)))
                .value(),
        )
    }

    fn require(&self, name: &str) -> Result<Arc<Collection>> {
        self.collection(name)
            .ok_or_else(|| MirrorError::not_found(name, ""))
    }

    /// Insert or replace a document. Returns its new sequence number.
    ///
    /// Design documents (`_design/...`) also register the views they define.
    pub async fn put(&self, collection: &str, doc: Value) -> Result<u64> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MirrorError::Document("missing string _id".to_string()))?
            .to_string();

        let coll = self.collection_or_create(collection);
        let seq = {
            let mut data = coll.data.write().await;
            if id.starts_with("_design/") {
                let views = ViewSpec::from_design_doc(&doc).unwrap_or_default();
                data.views.insert(id.clone(), views);
            }
            data.write(id.clone(), doc, false)
        };

        coll.head_tx.send_replace(seq);
        trace!(collection, id = %id, seq, "Document written");
        Ok(seq)
    }

    /// Delete a document, leaving a tombstone. Returns the tombstone's sequence.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<u64> {
        let coll = self.require(collection)?;
        let seq = {
            let mut data = coll.data.write().await;
            let doc_type = match data.docs.get(id) {
                Some(stored) if !stored.deleted => stored.body.get("type").cloned(),
                _ => return Err(MirrorError::not_found(collection, id)),
            };
            data.views.remove(id);

            let mut tombstone = serde_json::json!({ "_id": id, "_deleted": true });
            if let Some(doc_type) = doc_type {
                tombstone["type"] = doc_type;
            }
            data.write(id.to_string(), tombstone, true)
        };

        coll.head_tx.send_replace(seq);
        trace!(collection, id, seq, "Document deleted");
        Ok(seq)
    }

    /// Fetch a live document.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Value> {
        let coll = self.collection(collection)?;
        let data = coll.data.read().await;
        data.docs
            .get(id)
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.body.clone())
    }

    /// Latest sequence number of a collection (0 if it does not exist).
    pub async fn head_seq(&self, collection: &str) -> u64 {
        match self.collection(collection) {
            Some(coll) => coll.data.read().await.seq,
            None => 0,
        }
    }

    /// Make the next `count` feed reads on `collection` fail transiently.
    pub fn inject_feed_errors(&self, collection: &str, count: u32) {
        let coll = self.collection_or_create(collection);
        coll.feed_faults.fetch_add(count, Ordering::SeqCst);
        debug!(collection, count, "Injected feed errors");
    }
}

impl DocumentStore for InMemoryStore {
    fn create_or_update_doc(&self, collection: &str, doc: Value) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.put(&collection, doc).await?;
            Ok(())
        })
    }

    fn get_and_destroy_doc(&self, collection: &str, id: &str) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.delete(&collection, &id).await?;
            Ok(())
        })
    }

    fn read_view(&self, collection: &str, view: &ViewSpec) -> BoxFuture<'_, Vec<Value>> {
        let collection = collection.to_string();
        let view = view.clone();
        Box::pin(async move {
            let coll = self.require(&collection)?;
            let data = coll.data.read().await;
            if !data.has_view(&view) {
                return Err(MirrorError::not_found(&collection, &view.design_doc_id));
            }

            let mut docs: Vec<&StoredDoc> = data
                .docs
                .values()
                .filter(|stored| !stored.deleted && view.selects(&stored.body))
                .collect();
            // Views are keyed by _id
            docs.sort_by(|a, b| a.body["_id"].as_str().cmp(&b.body["_id"].as_str()));
            Ok(docs.into_iter().map(|stored| stored.body.clone()).collect())
        })
    }
}

impl ReplicationSource for InMemoryStore {
    fn subscribe(&self, collection: &str, options: FeedOptions) -> BoxFuture<'_, FeedHandle> {
        let collection = collection.to_string();
        Box::pin(async move {
            let coll = self.require(&collection)?;
            if !coll.data.read().await.has_view(&options.view) {
                return Err(MirrorError::not_found(&collection, &options.view.design_doc_id));
            }

            let (handle, producer) = FeedHandle::channel(FEED_CHANNEL_CAPACITY);
            let span = tracing::info_span!(
                "memory_feed",
                collection = %collection,
                view = %options.view.filter_path()
            );
            tokio::spawn(run_feed(coll, options, producer).instrument(span));
            Ok(handle)
        })
    }
}

/// Producer loop for one subscription.
async fn run_feed(coll: Arc<Collection>, options: FeedOptions, mut producer: FeedProducer) {
    info!("Feed started");
    let mut head_rx = coll.head_tx.subscribe();
    let mut since = 0u64;
    let mut announce_caught_up = true;

    'feed: loop {
        head_rx.borrow_and_update();

        // Drain everything after the cursor
        loop {
            if producer.is_cancelled() {
                break 'feed;
            }

            match coll.read_changes(since, &options.view, options.batch_limit).await {
                Ok(page) => {
                    if !page.docs.is_empty() {
                        let event = FeedEvent::Batch {
                            last_seq: page.last_seq,
                            docs: page.docs,
                        };
                        if !producer.send(event).await {
                            break 'feed;
                        }
                    }
                    since = page.last_seq;
                    if !page.more {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, since, "Feed read failed");
                    if !producer.send(FeedEvent::TransportError(e)).await {
                        break 'feed;
                    }
                    if !options.auto_retry {
                        break 'feed;
                    }
                    announce_caught_up = true;
                    tokio::select! {
                        _ = producer.cancelled() => break 'feed,
                        _ = tokio::time::sleep(options.retry_delay) => {}
                    }
                }
            }
        }

        if announce_caught_up {
            announce_caught_up = false;
            if !producer.send(FeedEvent::CaughtUp { last_seq: since }).await {
                break;
            }
            debug!(last_seq = since, "Feed caught up");
        }

        if !options.continuous {
            break;
        }

        tokio::select! {
            _ = producer.cancelled() => break,
            changed = head_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    producer.complete();
    info!(last_seq = since, "Feed completed");
}
