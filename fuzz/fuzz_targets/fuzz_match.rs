//! Fuzz target for matching names against arbitrary patterns.
//!
//! Any pattern, valid or not, must either match or report the rule as
//! malformed; never panic. Matched names are always a subset of the input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use on_change_mirror::document::rule_doc;
use on_change_mirror::matcher::match_names;
use on_change_mirror::{MalformedPatternPolicy, RuleCache};

fuzz_target!(|data: (&str, Vec<&str>)| {
    let (pattern, candidates) = data;

    let mut cache = RuleCache::new();
    if cache.apply_doc(rule_doc("fuzz", "on_change", pattern)).is_err() {
        return;
    }

    match match_names(cache.iter(), &candidates, MalformedPatternPolicy::Fail) {
        Ok(matched) => {
            for name in &matched {
                assert!(candidates.contains(&name.as_str()));
            }
        }
        Err(e) => assert_eq!(e.rule_id(), Some("fuzz")),
    }

    // Skip never fails
    assert!(match_names(cache.iter(), &candidates, MalformedPatternPolicy::Skip).is_ok());
});
