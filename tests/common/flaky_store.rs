//! Store wrapper with injectable failures.
//!
//! Delegates to an [`InMemoryStore`] but can fail `read_view()` and
//! `subscribe()` a configured number of times, and records how often each
//! was called.

use on_change_mirror::feed::{FeedHandle, FeedOptions};
use on_change_mirror::store::BoxFuture;
use on_change_mirror::{DocumentStore, InMemoryStore, MirrorError, ReplicationSource, ViewSpec};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An [`InMemoryStore`] that fails on demand.
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    read_view_failures: AtomicUsize,
    subscribe_failures: AtomicUsize,
    read_view_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            read_view_failures: AtomicUsize::new(0),
            subscribe_failures: AtomicUsize::new(0),
            read_view_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` calls to `read_view()`.
    pub fn fail_read_view(&self, n: usize) {
        self.read_view_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `subscribe()`.
    pub fn fail_subscribe(&self, n: usize) {
        self.subscribe_failures.store(n, Ordering::SeqCst);
    }

    pub fn read_view_calls(&self) -> usize {
        self.read_view_calls.load(Ordering::SeqCst)
    }

    #[allow(dead_code)] // Not every test binary checks this
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl DocumentStore for FlakyStore {
    fn create_or_update_doc(&self, collection: &str, doc: Value) -> BoxFuture<'_, ()> {
        self.inner.create_or_update_doc(collection, doc)
    }

    fn get_and_destroy_doc(&self, collection: &str, id: &str) -> BoxFuture<'_, ()> {
        self.inner.get_and_destroy_doc(collection, id)
    }

    fn read_view(&self, collection: &str, view: &ViewSpec) -> BoxFuture<'_, Vec<Value>> {
        self.read_view_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.read_view_failures) {
            return Box::pin(async { Err(MirrorError::Transport("view read refused".into())) });
        }
        self.inner.read_view(collection, view)
    }
}

impl ReplicationSource for FlakyStore {
    fn subscribe(&self, collection: &str, options: FeedOptions) -> BoxFuture<'_, FeedHandle> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.subscribe_failures) {
            return Box::pin(async { Err(MirrorError::Transport("subscribe refused".into())) });
        }
        self.inner.subscribe(collection, options)
    }
}
