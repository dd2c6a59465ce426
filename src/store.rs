// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store integration traits.
//!
//! The mirror never talks to a database directly. It needs two capabilities
//! from the surrounding system:
//!
//! 1. [`DocumentStore`]: administrative document operations (provision the
//!    view, read everything it selects)
//! 2. [`ReplicationSource`]: a live, filtered, auto-retrying change feed
//!
//! [`InMemoryStore`](crate::memory::InMemoryStore) implements both and is
//! what the tests run against. A CouchDB-backed daemon provides its own.
//!
//! # Example
//!
//! ```rust,no_run
//! use on_change_mirror::store::{BoxFuture, DocumentStore, ViewSpec};
//! use serde_json::Value;
//!
//! struct MyStore { /* ... */ }
//!
//! impl DocumentStore for MyStore {
//!     fn create_or_update_doc(&self, _collection: &str, _doc: Value) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn get_and_destroy_doc(&self, _collection: &str, _id: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn read_view(&self, _collection: &str, _view: &ViewSpec) -> BoxFuture<'_, Vec<Value>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//! }
//! ```

use crate::error::Result;
use crate::feed::{FeedHandle, FeedOptions};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A server-side view selecting documents of one kind, keyed by `_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    /// Design document holding the view (e.g. `_design/on_changes`).
    pub design_doc_id: String,
    /// View name inside the design document.
    pub view_name: String,
    /// Documents with `type == doc_type` are selected.
    pub doc_type: String,
}

impl ViewSpec {
    /// The `ddoc/view` path used by `_view` feed filters.
    pub fn filter_path(&self) -> String {
        let ddoc = self
            .design_doc_id
            .strip_prefix("_design/")
            .unwrap_or(&self.design_doc_id);
        format!("{}/{}", ddoc, self.view_name)
    }

    /// Build the CouchDB design document for this view.
    pub fn to_design_doc(&self) -> Value {
        let map = [
            "function(doc) {",
            &format!("if (doc.type === {}) {{", Value::String(self.doc_type.clone())),
            "emit(doc._id, null);",
            "}",
            "}",
        ]
        .join(" ");

        let mut views = serde_json::Map::new();
        views.insert(self.view_name.clone(), serde_json::json!({ "map": map }));

        serde_json::json!({
            "_id": self.design_doc_id,
            "views": views,
        })
    }

    /// Read a view spec back from a design document.
    ///
    /// Only the documents produced by [`to_design_doc`](Self::to_design_doc)
    /// are understood: the selected type is recovered from the map source.
    pub fn from_design_doc(doc: &Value) -> Option<Vec<ViewSpec>> {
        let design_doc_id = doc.get("_id")?.as_str()?.to_string();
        let views = doc.get("views")?.as_object()?;

        let specs = views
            .iter()
            .filter_map(|(name, view)| {
                let map = view.get("map")?.as_str()?;
                let doc_type = parse_type_guard(map)?;
                Some(ViewSpec {
                    design_doc_id: design_doc_id.clone(),
                    view_name: name.clone(),
                    doc_type,
                })
            })
            .collect();
        Some(specs)
    }

    /// Check whether a document is selected by this view.
    pub fn selects(&self, doc: &Value) -> bool {
        doc.get("type").and_then(Value::as_str) == Some(self.doc_type.as_str())
    }
}

/// Extract `X` from `if (doc.type === "X")`.
fn parse_type_guard(map: &str) -> Option<String> {
    let start = map.find("doc.type === ")? + "doc.type === ".len();
    // The literal may contain `)`; let the JSON reader find its end
    serde_json::Deserializer::from_str(&map[start..])
        .into_iter::<String>()
        .next()?
        .ok()
}

/// Administrative document operations needed from the store.
pub trait DocumentStore: Send + Sync + 'static {
    /// Insert or replace a document by its `_id`.
    fn create_or_update_doc(&self, collection: &str, doc: Value) -> BoxFuture<'_, ()>;

    /// Delete a document by id.
    ///
    /// Returns [`MirrorError::NotFound`](crate::MirrorError::NotFound) when it
    /// does not exist.
    fn get_and_destroy_doc(&self, collection: &str, id: &str) -> BoxFuture<'_, ()>;

    /// Read every live document selected by a view.
    fn read_view(&self, collection: &str, view: &ViewSpec) -> BoxFuture<'_, Vec<Value>>;
}

/// A continuous replication feed over a collection.
pub trait ReplicationSource: Send + Sync + 'static {
    /// Open a live, filtered subscription.
    ///
    /// The returned handle delivers the current backlog, then a catch-up
    /// event, then live changes until cancelled. Retrying transient failures
    /// is the source's job when `options.auto_retry` is set.
    fn subscribe(&self, collection: &str, options: FeedOptions) -> BoxFuture<'_, FeedHandle>;
}
