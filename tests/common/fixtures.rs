//! Fixtures: seeded stores, mirrors, and wait helpers.

use on_change_mirror::document::rule_doc;
use on_change_mirror::{
    DocumentStore, InMemoryStore, MirrorConfig, ReplicationSource, RuleMirror,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Collection used by every test.
pub const DB: &str = "spiegel";

/// Rule document type.
pub const RULE_TYPE: &str = "on_change";

/// How long eventual assertions wait before failing.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test config over the shared collection.
pub fn test_config() -> MirrorConfig {
    MirrorConfig::for_testing(DB)
}

/// A store with the rule view provisioned and the given rules written.
pub async fn seeded_store(rules: &[(&str, &str)]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store
        .put(DB, test_config().view_spec().to_design_doc())
        .await
        .unwrap();
    for (id, pattern) in rules {
        put_rule(&store, id, pattern).await;
    }
    store
}

/// Write (or overwrite) a rule.
pub async fn put_rule(store: &InMemoryStore, id: &str, pattern: &str) -> u64 {
    store.put(DB, rule_doc(id, RULE_TYPE, pattern)).await.unwrap()
}

/// Delete a rule.
pub async fn delete_rule(store: &InMemoryStore, id: &str) -> u64 {
    store.delete(DB, id).await.unwrap()
}

/// Build a mirror over `store` and start it.
pub async fn started_mirror<S>(store: Arc<S>) -> RuleMirror<S>
where
    S: DocumentStore + ReplicationSource,
{
    let mirror = RuleMirror::with_store(test_config(), store);
    tokio::time::timeout(WAIT_TIMEOUT, mirror.start())
        .await
        .expect("start() timed out")
        .expect("start() failed");
    mirror
}

/// Wait until the mirror has applied everything up to `seq`.
pub async fn wait_for_seq<S>(mirror: &RuleMirror<S>, seq: u64)
where
    S: DocumentStore + ReplicationSource,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while mirror.last_seq() < seq {
        assert!(
            tokio::time::Instant::now() < deadline,
            "mirror stuck at seq {} waiting for {}",
            mirror.last_seq(),
            seq
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Sorted ids of every cached rule.
pub async fn rule_ids<S>(mirror: &RuleMirror<S>) -> Vec<String>
where
    S: DocumentStore + ReplicationSource,
{
    let mut ids: Vec<String> = mirror.all().await.into_keys().collect();
    ids.sort();
    ids
}

/// Build an expected result set.
pub fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}
