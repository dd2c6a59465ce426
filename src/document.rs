// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Rule documents as they arrive from the replication feed.
//!
//! The document shape belongs to the upstream schema. Only three fields are
//! read here: `_id`, `_deleted`, and the pattern (`reg_ex`, with `pattern`
//! accepted as an alias). Everything else is carried through untouched.

use crate::error::{MirrorError, Result};
use serde_json::Value;

/// Field holding the pattern in the upstream schema.
pub const PATTERN_FIELD: &str = "reg_ex";

/// Alternate pattern field name.
pub const PATTERN_ALIAS: &str = "pattern";

/// A rule document: a regular expression matched against database names.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Store-assigned, stable identifier.
    pub id: String,
    /// Regular expression source. Empty for deleted stubs.
    pub pattern: String,
    /// Delete marker from the feed.
    pub deleted: bool,
    /// Why the pattern field could not be read, for a live rule whose
    /// pattern is missing or not a string. Such a rule is still a rule:
    /// it replaces any earlier version and fails matching as malformed.
    pub unreadable: Option<String>,
    /// The full document as received.
    pub doc: Value,
}

impl Rule {
    /// Parse a rule from a JSON document.
    ///
    /// Only `_id` is required. A live rule without a string pattern parses
    /// with [`unreadable`](Self::unreadable) set; `pattern` then holds the
    /// raw field as JSON text (empty when absent).
    pub fn from_doc(doc: Value) -> Result<Self> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MirrorError::Document("missing string _id".to_string()))?
            .to_string();

        let deleted = doc
            .get("_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let raw = doc.get(PATTERN_FIELD).or_else(|| doc.get(PATTERN_ALIAS));
        let (pattern, unreadable) = match (raw, deleted) {
            (Some(Value::String(p)), _) => (p.clone(), None),
            (_, true) => (String::new(), None),
            (Some(other), false) => (
                other.to_string(),
                Some(format!("{PATTERN_FIELD} is not a string")),
            ),
            (None, false) => (String::new(), Some(format!("no {PATTERN_FIELD} field"))),
        };

        Ok(Self {
            id,
            pattern,
            deleted,
            unreadable,
            doc,
        })
    }

    /// Check whether this is a delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Build a rule document in the upstream shape.
///
/// Handy for seeding stores; the mirror itself never writes documents.
pub fn rule_doc(id: &str, doc_type: &str, pattern: &str) -> Value {
    serde_json::json!({
        "_id": id,
        "type": doc_type,
        PATTERN_FIELD: pattern,
    })
}
