// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory rule cache.
//!
//! Maps rule id to rule, plus the rule's compiled matcher. The matcher is
//! compiled when the rule is inserted and dropped with it, so a cached
//! matcher always belongs to the current version of its rule.
//!
//! # Ownership
//!
//! The cache is written only by the mirror's feed task. Readers go through
//! [`RuleMirror`](crate::RuleMirror), which hands out copies or evaluates
//! matches under a short read lock.

use crate::document::Rule;
use crate::error::{MirrorError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// A live rule with its compiled pattern.
#[derive(Debug, Clone)]
pub struct CachedRule {
    rule: Rule,
    /// The matcher, or why there is none.
    compiled: std::result::Result<Regex, String>,
}

impl CachedRule {
    /// Compile a rule's pattern. Compile failures and unreadable pattern
    /// fields are kept, not raised: they surface when the rule is used for
    /// matching.
    pub fn new(rule: Rule) -> Self {
        let compiled = match &rule.unreadable {
            Some(reason) => Err(reason.clone()),
            None => Regex::new(&rule.pattern).map_err(|e| e.to_string()),
        };
        Self { rule, compiled }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// The compiled matcher, or the error naming this rule.
    pub fn matcher(&self) -> Result<&Regex> {
        self.compiled
            .as_ref()
            .map_err(|e| MirrorError::malformed_rule(&self.rule.id, &self.rule.pattern, e))
    }

    pub fn is_malformed(&self) -> bool {
        self.compiled.is_err()
    }
}

/// Counts from applying a set of documents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    /// Rules inserted or replaced.
    pub upserted: usize,
    /// Rules removed by delete markers.
    pub removed: usize,
    /// Documents without a readable `_id`.
    pub skipped: usize,
}

/// Rule id → rule mapping.
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: BTreeMap<String, CachedRule>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a live rule. Returns `true` if it replaced one.
    pub fn upsert(&mut self, rule: Rule) -> bool {
        let id = rule.id.clone();
        self.rules.insert(id, CachedRule::new(rule)).is_some()
    }

    /// Remove a rule. Returns `true` if it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.rules.remove(id).is_some()
    }

    /// Apply one changed document: delete markers remove, everything else
    /// upserts, including rules whose pattern field is unreadable.
    pub fn apply_doc(&mut self, doc: Value) -> Result<Rule> {
        let rule = Rule::from_doc(doc)?;
        if rule.is_deleted() {
            self.remove(&rule.id);
        } else {
            self.upsert(rule.clone());
        }
        Ok(rule)
    }

    /// Apply a batch of changed documents in order.
    ///
    /// Documents without a readable `_id` are logged and skipped; the rest
    /// of the batch still applies.
    pub fn apply_batch(&mut self, docs: Vec<Value>) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for doc in docs {
            match self.apply_doc(doc) {
                Ok(rule) if rule.is_deleted() => summary.removed += 1,
                Ok(rule) => {
                    if let Some(reason) = &rule.unreadable {
                        warn!(rule_id = %rule.id, reason = %reason, "Cached rule with unreadable pattern");
                    }
                    summary.upserted += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable rule document");
                    summary.skipped += 1;
                }
            }
        }
        summary
    }

    /// Replace the whole cache with a full snapshot.
    ///
    /// `removed` counts rules that were cached but are absent from the snapshot.
    pub fn replace_all(&mut self, docs: Vec<Value>) -> ApplySummary {
        let previous = std::mem::take(&mut self.rules);
        let mut summary = self.apply_batch(docs);
        summary.removed = previous
            .keys()
            .filter(|id| !self.rules.contains_key(*id))
            .count();
        summary
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.get(id).map(CachedRule::rule)
    }

    /// Cached rules in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CachedRule> {
        self.rules.values()
    }

    /// Copy of the current content.
    pub fn snapshot(&self) -> HashMap<String, Rule> {
        self.rules
            .iter()
            .map(|(id, cached)| (id.clone(), cached.rule.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::rule_doc;
    use serde_json::json;

    fn doc(id: &str, pattern: &str) -> Value {
        rule_doc(id, "on_change", pattern)
    }

    fn tombstone(id: &str) -> Value {
        json!({"_id": id, "_deleted": true})
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut cache = RuleCache::new();
        assert!(cache.is_empty());

        cache.apply_doc(doc("r1", "^a")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("r1").unwrap().pattern, "^a");

        cache.apply_doc(doc("r1", "^b")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("r1").unwrap().pattern, "^b");

        cache.apply_doc(tombstone("r1")).unwrap();
        assert!(cache.get("r1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replacing_rule_recompiles_matcher() {
        let mut cache = RuleCache::new();
        cache.apply_doc(doc("r1", "^a")).unwrap();
        assert!(cache.iter().next().unwrap().matcher().unwrap().is_match("apple"));

        cache.apply_doc(doc("r1", "^b")).unwrap();
        let re = cache.iter().next().unwrap().matcher().unwrap();
        assert!(!re.is_match("apple"));
        assert!(re.is_match("banana"));
    }

    #[test]
    fn test_delete_of_unknown_rule_is_harmless() {
        let mut cache = RuleCache::new();
        let summary = cache.apply_batch(vec![tombstone("ghost")]);
        assert_eq!(summary.removed, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_apply_batch_in_order() {
        let mut cache = RuleCache::new();
        let summary = cache.apply_batch(vec![
            doc("r1", "^a"),
            doc("r2", "b$"),
            tombstone("r1"),
            doc("r1", "^c"),
        ]);

        assert_eq!(summary, ApplySummary { upserted: 3, removed: 1, skipped: 0 });
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("r1").unwrap().pattern, "^c");
    }

    #[test]
    fn test_apply_batch_skips_docs_without_id() {
        let mut cache = RuleCache::new();
        let summary = cache.apply_batch(vec![
            json!({"reg_ex": "no id"}),
            doc("r1", "^a"),
            json!({"_id": 9, "reg_ex": "^b"}),
        ]);

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.upserted, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unreadable_update_replaces_previous_version() {
        let mut cache = RuleCache::new();
        cache.apply_doc(doc("r1", "^a")).unwrap();

        let summary = cache.apply_batch(vec![json!({"_id": "r1", "type": "on_change", "reg_ex": 7})]);
        assert_eq!(summary.upserted, 1);
        assert_eq!(summary.skipped, 0);

        let cached = cache.iter().next().unwrap();
        assert_eq!(cached.rule().doc["reg_ex"], 7);
        assert!(cached.is_malformed());
        let err = cached.matcher().unwrap_err();
        assert_eq!(err.rule_id(), Some("r1"));
        assert!(err.to_string().contains("not a string"));
    }

    #[test]
    fn test_unreadable_rule_same_on_batch_and_resync() {
        let update = json!({"_id": "r1", "type": "on_change"});

        let mut live = RuleCache::new();
        live.apply_doc(doc("r1", "^a")).unwrap();
        live.apply_batch(vec![update.clone()]);

        let mut resynced = RuleCache::new();
        resynced.replace_all(vec![update]);

        assert_eq!(live.snapshot(), resynced.snapshot());
        assert!(live.iter().all(CachedRule::is_malformed));
        assert!(resynced.iter().all(CachedRule::is_malformed));
    }

    #[test]
    fn test_malformed_rule_is_cached() {
        let mut cache = RuleCache::new();
        cache.apply_doc(doc("bad", "(unclosed")).unwrap();

        let cached = cache.iter().next().unwrap();
        assert!(cached.is_malformed());
        let err = cached.matcher().unwrap_err();
        assert_eq!(err.rule_id(), Some("bad"));
    }

    #[test]
    fn test_replace_all_overwrites() {
        let mut cache = RuleCache::new();
        cache.apply_batch(vec![doc("r1", "^a"), doc("r2", "^b")]);

        let summary = cache.replace_all(vec![doc("r2", "^bb"), doc("r3", "^c")]);
        assert_eq!(summary.upserted, 2);
        assert_eq!(summary.removed, 1);

        let ids: Vec<_> = cache.iter().map(CachedRule::id).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
        assert_eq!(cache.get("r2").unwrap().pattern, "^bb");
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut cache = RuleCache::new();
        cache.apply_doc(doc("r1", "^a")).unwrap();

        let snapshot = cache.snapshot();
        cache.clear();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["r1"].pattern, "^a");
        assert!(cache.is_empty());
    }
}
