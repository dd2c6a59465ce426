//! Fuzz target for reading rule documents and design documents.
//!
//! Arbitrary JSON from the feed must never panic the rule reader, the
//! cache, or the design-doc parser.

#![no_main]

use libfuzzer_sys::fuzz_target;
use on_change_mirror::document::Rule;
use on_change_mirror::{RuleCache, ViewSpec};

fuzz_target!(|data: &[u8]| {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Should never panic
    if let Ok(rule) = Rule::from_doc(doc.clone()) {
        assert_eq!(doc.get("_id").and_then(|v| v.as_str()), Some(rule.id.as_str()));
    }
    let _ = ViewSpec::from_design_doc(&doc);

    let mut cache = RuleCache::new();
    let summary = cache.apply_batch(vec![doc.clone(), doc]);
    assert_eq!(summary.upserted + summary.removed + summary.skipped, 2);
    assert!(cache.len() <= 1);
});
