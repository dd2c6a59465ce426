// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! View provisioning.
//!
//! Creates the server-side view that selects rule documents, so the feed
//! can be filtered by the store instead of streaming the whole collection.
//! Called once at system setup and once at teardown.

use crate::error::{MirrorError, Result};
use crate::metrics;
use crate::store::{DocumentStore, ViewSpec};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates and destroys the rule view in the upstream collection.
pub struct ViewProvisioner<S: DocumentStore> {
    store: Arc<S>,
    collection: String,
    view: ViewSpec,
}

impl<S: DocumentStore> ViewProvisioner<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>, view: ViewSpec) -> Self {
        Self {
            store,
            collection: collection.into(),
            view,
        }
    }

    /// The view being provisioned.
    pub fn view(&self) -> &ViewSpec {
        &self.view
    }

    /// Create the view, or update it if it already exists.
    pub async fn create(&self) -> Result<()> {
        let doc = self.view.to_design_doc();
        self.store
            .create_or_update_doc(&self.collection, doc)
            .await
            .map_err(|e| {
                metrics::record_provisioning("create", false);
                MirrorError::provisioning("create_view", e.to_string())
            })?;

        metrics::record_provisioning("create", true);
        info!(
            collection = %self.collection,
            design_doc = %self.view.design_doc_id,
            "Rule view provisioned"
        );
        Ok(())
    }

    /// Remove the view. A view that is already gone is not an error.
    pub async fn destroy(&self) -> Result<()> {
        match self
            .store
            .get_and_destroy_doc(&self.collection, &self.view.design_doc_id)
            .await
        {
            Ok(()) => {
                info!(
                    collection = %self.collection,
                    design_doc = %self.view.design_doc_id,
                    "Rule view destroyed"
                );
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    collection = %self.collection,
                    design_doc = %self.view.design_doc_id,
                    "Rule view already absent"
                );
            }
            Err(e) => {
                metrics::record_provisioning("destroy", false);
                return Err(MirrorError::provisioning("destroy_view", e.to_string()));
            }
        }
        metrics::record_provisioning("destroy", true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::store::BoxFuture;
    use serde_json::Value;

    const DB: &str = "spiegel";

    fn view() -> ViewSpec {
        ViewSpec {
            design_doc_id: "_design/on_changes".to_string(),
            view_name: "on_changes".to_string(),
            doc_type: "on_change".to_string(),
        }
    }

    /// Store whose every call fails with a transport error.
    struct BrokenStore;

    impl DocumentStore for BrokenStore {
        fn create_or_update_doc(&self, _collection: &str, _doc: Value) -> BoxFuture<'_, ()> {
            Box::pin(async { Err(MirrorError::Transport("connection refused".into())) })
        }

        fn get_and_destroy_doc(&self, _collection: &str, _id: &str) -> BoxFuture<'_, ()> {
            Box::pin(async { Err(MirrorError::Transport("connection refused".into())) })
        }

        fn read_view(&self, _collection: &str, _view: &ViewSpec) -> BoxFuture<'_, Vec<Value>> {
            Box::pin(async { Err(MirrorError::Transport("connection refused".into())) })
        }
    }

    #[tokio::test]
    async fn test_create_registers_view() {
        let store = Arc::new(InMemoryStore::new());
        let provisioner = ViewProvisioner::new(Arc::clone(&store), DB, view());

        provisioner.create().await.unwrap();

        let doc = store.get(DB, "_design/on_changes").await.unwrap();
        assert!(doc["views"]["on_changes"]["map"].is_string());
        assert!(store.read_view(DB, &view()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let provisioner = ViewProvisioner::new(Arc::clone(&store), DB, view());

        provisioner.create().await.unwrap();
        provisioner.create().await.unwrap();
        assert!(store.read_view(DB, &view()).await.is_ok());
    }

    #[tokio::test]
    async fn test_destroy_removes_view() {
        let store = Arc::new(InMemoryStore::new());
        let provisioner = ViewProvisioner::new(Arc::clone(&store), DB, view());

        provisioner.create().await.unwrap();
        provisioner.destroy().await.unwrap();
        assert!(store.get(DB, "_design/on_changes").await.is_none());
        assert!(store.read_view(DB, &view()).await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_tolerates_absent_view() {
        let store = Arc::new(InMemoryStore::new());
        let provisioner = ViewProvisioner::new(store, DB, view());

        provisioner.destroy().await.unwrap();
        provisioner.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_surface_as_provisioning_errors() {
        let provisioner = ViewProvisioner::new(Arc::new(BrokenStore), DB, view());

        let err = provisioner.create().await.unwrap_err();
        assert!(matches!(err, MirrorError::Provisioning { ref operation, .. } if operation == "create_view"));
        assert!(err.to_string().contains("connection refused"));

        let err = provisioner.destroy().await.unwrap_err();
        assert!(matches!(err, MirrorError::Provisioning { ref operation, .. } if operation == "destroy_view"));
    }

    #[test]
    fn test_view_accessor() {
        let provisioner = ViewProvisioner::new(Arc::new(InMemoryStore::new()), DB, view());
        assert_eq!(provisioner.view(), &view());
    }
}
