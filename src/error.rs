// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the rule mirror.
//!
//! Errors are categorized by where they surface. Provisioning and
//! malformed-rule errors reach the caller; transport errors are absorbed
//! by the feed loop and only show up in logs and metrics.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Network/store failure on a live subscription |
//! | `Provisioning` | No | View create/delete failed for a real reason |
//! | `NotFound` | No | Document, collection or view does not exist |
//! | `Document` | No | A document does not have the shape of a rule |
//! | `MalformedRule` | No | A cached rule's pattern is unreadable or does not compile |
//! | `InvalidState` | No | Lifecycle misuse (e.g. `start()` twice) |
//! | `FeedClosed` | No | Feed ended before the initial load finished |
//! | `Config` | No | Configuration invalid |
//! | `Shutdown` | No | Mirror was stopped while the call was pending |
//! | `Internal` | No | Unexpected internal error |

use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while provisioning, replicating or matching rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    /// Creating or deleting the server-side view failed.
    ///
    /// "Already exists" and "already absent" never produce this error.
    #[error("Provisioning error ({operation}): {message}")]
    Provisioning { operation: String, message: String },

    /// Transient failure of the document store transport.
    ///
    /// Seen by the feed loop only; the replication source retries on its own.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Document or view missing from a collection.
    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A document could not be read as a rule.
    #[error("Document error: {0}")]
    Document(String),

    /// A rule's pattern failed to compile as a regular expression.
    ///
    /// Carries the id of the offending rule so callers can fix the data.
    #[error("Malformed rule {rule_id}: pattern {pattern:?} does not compile: {reason}")]
    MalformedRule {
        rule_id: String,
        pattern: String,
        reason: String,
    },

    /// Lifecycle method called in the wrong state.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The replication feed ended before the initial snapshot landed.
    #[error("Replication feed closed before the initial load completed")]
    FeedClosed,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The mirror was stopped while the operation was in flight.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Catch-all for errors that shouldn't happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Create a provisioning error for `operation`.
    pub fn provisioning(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a malformed-rule error (compile failure or unreadable pattern field).
    pub fn malformed_rule(rule_id: &str, pattern: &str, reason: impl std::fmt::Display) -> Self {
        Self::MalformedRule {
            rule_id: rule_id.to_string(),
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Provisioning { .. } => false,
            Self::NotFound { .. } => false,
            Self::Document(_) => false,
            Self::MalformedRule { .. } => false, // Data error, fix the rule
            Self::InvalidState { .. } => false,
            Self::FeedClosed => false,
            Self::Config(_) => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The offending rule id, for `MalformedRule` errors.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::MalformedRule { rule_id, .. } => Some(rule_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Document(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_transport() {
        let err = MirrorError::Transport("connection reset".to_string());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_not_retryable_provisioning() {
        let err = MirrorError::provisioning("create_view", "forbidden");
        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("create_view"));
        assert!(msg.contains("forbidden"));
    }

    #[test]
    fn test_malformed_rule_carries_id() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = MirrorError::malformed_rule("rule-7", "(", &source);
        assert!(!err.is_retryable());
        assert_eq!(err.rule_id(), Some("rule-7"));
        assert!(err.to_string().contains("rule-7"));
        assert!(err.to_string().contains("\"(\""));
    }

    #[test]
    fn test_rule_id_absent_for_other_errors() {
        assert_eq!(MirrorError::FeedClosed.rule_id(), None);
        assert_eq!(MirrorError::Shutdown.rule_id(), None);
    }

    #[test]
    fn test_not_found() {
        let err = MirrorError::not_found("spiegel", "_design/on_changes");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Not found: spiegel/_design/on_changes");
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = MirrorError::InvalidState {
            expected: "Idle".to_string(),
            actual: "Ready".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("Ready"));
    }

    #[test]
    fn test_not_retryable_misc() {
        assert!(!MirrorError::FeedClosed.is_retryable());
        assert!(!MirrorError::Config("bad".into()).is_retryable());
        assert!(!MirrorError::Shutdown.is_retryable());
        assert!(!MirrorError::Internal("oops".into()).is_retryable());
        assert!(!MirrorError::Document("no _id".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: MirrorError = json_err.into();
        assert!(matches!(err, MirrorError::Document(_)));
    }
}
