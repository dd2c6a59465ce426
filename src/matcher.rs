// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Matching candidate database names against cached rules.
//!
//! Every rule is tested against every candidate that has not matched yet.
//! Patterns were compiled when the rules entered the cache, so a call never
//! compiles anything. Once a candidate matches it leaves the pending list,
//! which also gives deduplication for free.
//!
//! # Malformed Patterns
//!
//! Governed by [`MalformedPatternPolicy`]:
//! - `Fail`: the call returns [`MirrorError::MalformedRule`] for the first
//!   malformed rule in id order, even if every candidate already matched.
//! - `Skip`: the rule is logged and ignored.
//!
//! An empty candidate list returns an empty set before any rule is looked at.

use crate::cache::CachedRule;
use crate::config::MalformedPatternPolicy;
use crate::error::Result;
use crate::metrics;
use std::collections::BTreeSet;
use tracing::warn;

/// Return the candidates matched by at least one rule.
pub fn match_names<'a, I, N>(
    rules: I,
    candidates: &[N],
    policy: MalformedPatternPolicy,
) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = &'a CachedRule>,
    N: AsRef<str>,
{
    let mut matched = BTreeSet::new();
    if candidates.is_empty() {
        return Ok(matched);
    }

    // Distinct names still waiting for a match
    let mut pending: Vec<&str> = candidates
        .iter()
        .map(AsRef::as_ref)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    for cached in rules {
        let re = match cached.matcher() {
            Ok(re) => re,
            Err(e) => match policy {
                MalformedPatternPolicy::Fail => {
                    metrics::record_malformed_rule("fail");
                    return Err(e);
                }
                MalformedPatternPolicy::Skip => {
                    metrics::record_malformed_rule("skip");
                    warn!(rule_id = %cached.id(), error = %e, "Skipping malformed rule");
                    continue;
                }
            },
        };

        if pending.is_empty() {
            // Only Fail still has to look for malformed rules
            if policy == MalformedPatternPolicy::Skip {
                break;
            }
            continue;
        }

        pending.retain(|name| {
            if re.is_match(name) {
                matched.insert((*name).to_string());
                false
            } else {
                true
            }
        });
    }

    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RuleCache;
    use crate::document::rule_doc;
    use crate::error::MirrorError;

    fn cache(rules: &[(&str, &str)]) -> RuleCache {
        let mut cache = RuleCache::new();
        cache.apply_batch(
            rules
                .iter()
                .map(|(id, pattern)| rule_doc(id, "on_change", pattern))
                .collect(),
        );
        cache
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_empty_candidates() {
        let cache = cache(&[("1", "^a")]);
        let empty: [&str; 0] = [];
        let result = match_names(cache.iter(), &empty, MalformedPatternPolicy::Fail).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_empty_candidates_ignores_malformed_rules() {
        let cache = cache(&[("1", "(")]);
        let empty: Vec<String> = vec![];
        assert!(match_names(cache.iter(), &empty, MalformedPatternPolicy::Fail)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_no_rules() {
        let cache = RuleCache::new();
        let result =
            match_names(cache.iter(), &["apple"], MalformedPatternPolicy::Fail).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_prefix_and_suffix_rules() {
        let cache = cache(&[("1", "^a"), ("2", "b$")]);
        let result = match_names(
            cache.iter(),
            &["apple", "crab", "xyz"],
            MalformedPatternPolicy::Fail,
        )
        .unwrap();
        assert_eq!(result, set(&["apple", "crab"]));
    }

    #[test]
    fn test_name_matching_two_rules_appears_once() {
        let cache = cache(&[("1", "^a"), ("2", "e$")]);
        let result =
            match_names(cache.iter(), &["apple", "pear"], MalformedPatternPolicy::Fail).unwrap();
        assert_eq!(result, set(&["apple"]));
        assert_eq!(result.iter().filter(|n| *n == "apple").count(), 1);
    }

    #[test]
    fn test_duplicate_candidates() {
        let cache = cache(&[("1", "^a")]);
        let result = match_names(
            cache.iter(),
            &["apple", "apple", "avocado"],
            MalformedPatternPolicy::Fail,
        )
        .unwrap();
        assert_eq!(result, set(&["apple", "avocado"]));
    }

    #[test]
    fn test_unanchored_pattern_matches_anywhere() {
        let cache = cache(&[("1", "user")]);
        let result = match_names(
            cache.iter(),
            &["db_user_1", "users", "admin"],
            MalformedPatternPolicy::Fail,
        )
        .unwrap();
        assert_eq!(result, set(&["db_user_1", "users"]));
    }

    #[test]
    fn test_malformed_rule_fails_call() {
        let cache = cache(&[("a-good", "^a"), ("b-bad", "(unclosed"), ("c-good", "b$")]);
        let err = match_names(cache.iter(), &["apple"], MalformedPatternPolicy::Fail).unwrap_err();
        assert_eq!(err.rule_id(), Some("b-bad"));
        assert!(matches!(err, MirrorError::MalformedRule { ref pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn test_malformed_rule_fails_even_after_all_matched() {
        // "a-good" matches everything before "z-bad" is reached
        let cache = cache(&[("a-good", "."), ("z-bad", "[")]);
        let err = match_names(cache.iter(), &["x"], MalformedPatternPolicy::Fail).unwrap_err();
        assert_eq!(err.rule_id(), Some("z-bad"));
    }

    #[test]
    fn test_malformed_rule_skipped() {
        let cache = cache(&[("a-good", "^a"), ("b-bad", "(unclosed"), ("c-good", "b$")]);
        let result = match_names(
            cache.iter(),
            &["apple", "crab", "xyz"],
            MalformedPatternPolicy::Skip,
        )
        .unwrap();
        assert_eq!(result, set(&["apple", "crab"]));
    }

    #[test]
    fn test_unreadable_pattern_field_fails_call() {
        let mut cache = cache(&[("a-good", "^a")]);
        cache.apply_doc(serde_json::json!({"_id": "r1", "type": "on_change", "reg_ex": 7})).unwrap();

        let err = match_names(cache.iter(), &["apple"], MalformedPatternPolicy::Fail).unwrap_err();
        assert_eq!(err.rule_id(), Some("r1"));

        let result = match_names(cache.iter(), &["apple"], MalformedPatternPolicy::Skip).unwrap();
        assert_eq!(result, set(&["apple"]));
    }

    #[test]
    fn test_owned_string_candidates() {
        let cache = cache(&[("1", r"^db_\d+$")]);
        let names = vec!["db_1".to_string(), "db_x".to_string()];
        let result = match_names(cache.iter(), &names, MalformedPatternPolicy::Fail).unwrap();
        assert_eq!(result, set(&["db_1"]));
    }
}
