// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the rule mirror.
//!
//! Configuration is passed to [`RuleMirror::new()`](crate::RuleMirror::new)
//! and can be constructed programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use on_change_mirror::config::MirrorConfig;
//!
//! let config = MirrorConfig {
//!     namespace: "test_".into(),
//!     db_name: "spiegel".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.mirror_name(), "test_on_changes");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! MirrorConfig
//! ├── namespace: String          # Prefix for the local mirror name
//! ├── db_name: String            # Upstream control collection
//! ├── view: ViewConfig           # Server-side view selecting rule docs
//! ├── feed: FeedConfig           # Replication feed tuning
//! └── matcher: MatcherConfig     # Malformed pattern policy
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "namespace": "prod_",
//!   "db_name": "spiegel",
//!   "feed": { "batch_limit": 200, "stop_timeout": "5s" },
//!   "matcher": { "malformed_pattern": "skip" }
//! }
//! ```

use crate::error::{MirrorError, Result};
use crate::store::ViewSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to RuleMirror::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `RuleMirror::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Prefix applied to the local mirror name (multi-tenant deployments).
    #[serde(default)]
    pub namespace: String,

    /// Name of the upstream collection holding the rule documents.
    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// Server-side view used to filter the feed.
    #[serde(default)]
    pub view: ViewConfig,

    /// Replication feed settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Matching behavior.
    #[serde(default)]
    pub matcher: MatcherConfig,
}

fn default_db_name() -> String {
    "spiegel".to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            db_name: default_db_name(),
            view: ViewConfig::default(),
            feed: FeedConfig::default(),
            matcher: MatcherConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Create a minimal config for testing (fast retries and timeouts).
    pub fn for_testing(db_name: &str) -> Self {
        Self {
            namespace: "test_".to_string(),
            db_name: db_name.to_string(),
            view: ViewConfig::default(),
            feed: FeedConfig::testing(),
            matcher: MatcherConfig::default(),
        }
    }

    /// Load a config from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| MirrorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config for values the mirror cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.db_name.is_empty() {
            return Err(MirrorError::Config("db_name must not be empty".into()));
        }
        if !self.view.design_doc_id.starts_with("_design/") {
            return Err(MirrorError::Config(format!(
                "view.design_doc_id must start with _design/, got {:?}",
                self.view.design_doc_id
            )));
        }
        if self.view.view_name.is_empty() || self.view.doc_type.is_empty() {
            return Err(MirrorError::Config(
                "view.view_name and view.doc_type must not be empty".into(),
            ));
        }
        if self.feed.batch_limit == 0 {
            return Err(MirrorError::Config("feed.batch_limit must be > 0".into()));
        }
        if self.feed.notify_capacity == 0 {
            return Err(MirrorError::Config("feed.notify_capacity must be > 0".into()));
        }
        for (name, value) in [
            ("feed.retry_delay", &self.feed.retry_delay),
            ("feed.stop_timeout", &self.feed.stop_timeout),
        ] {
            humantime::parse_duration(value)
                .map_err(|e| MirrorError::Config(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    /// The upstream collection name.
    pub fn collection(&self) -> &str {
        &self.db_name
    }

    /// Name of the local mirror (used in log spans and metrics).
    pub fn mirror_name(&self) -> String {
        format!("{}on_changes", self.namespace)
    }

    /// The view spec derived from [`ViewConfig`].
    pub fn view_spec(&self) -> ViewSpec {
        ViewSpec {
            design_doc_id: self.view.design_doc_id.clone(),
            view_name: self.view.view_name.clone(),
            doc_type: self.view.doc_type.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ViewConfig: which documents count as rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Server-side view selecting rule documents from the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Id of the design document holding the view.
    #[serde(default = "default_design_doc_id")]
    pub design_doc_id: String,

    /// Name of the view inside the design document.
    #[serde(default = "default_view_name")]
    pub view_name: String,

    /// Value of the `type` field that marks a rule document.
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

fn default_design_doc_id() -> String {
    "_design/on_changes".to_string()
}

fn default_view_name() -> String {
    "on_changes".to_string()
}

fn default_doc_type() -> String {
    "on_change".to_string()
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            design_doc_id: default_design_doc_id(),
            view_name: default_view_name(),
            doc_type: default_doc_type(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FeedConfig: replication feed tuning
// ═══════════════════════════════════════════════════════════════════════════════

/// Replication feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Maximum documents per delivered batch.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Delay before retrying after a transport error (e.g., "1s").
    /// Passed to the replication source for feed retries, and also the pause
    /// between failed catch-up view reads.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    /// Upper bound on how long `stop()` waits for the feed to tear down.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: String,

    /// Buffered change notifications per subscriber before it lags.
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
}

fn default_batch_limit() -> usize {
    100
}

fn default_retry_delay() -> String {
    "1s".to_string()
}

fn default_stop_timeout() -> String {
    "10s".to_string()
}

fn default_notify_capacity() -> usize {
    64
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            retry_delay: default_retry_delay(),
            stop_timeout: default_stop_timeout(),
            notify_capacity: default_notify_capacity(),
        }
    }
}

impl FeedConfig {
    /// Fast retries and short timeouts for tests.
    pub fn testing() -> Self {
        Self {
            batch_limit: 10,
            retry_delay: "10ms".to_string(),
            stop_timeout: "2s".to_string(),
            notify_capacity: 256,
        }
    }

    /// Parse `retry_delay` to a Duration.
    pub fn retry_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.retry_delay).unwrap_or(Duration::from_secs(1))
    }

    /// Parse `stop_timeout` to a Duration.
    pub fn stop_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.stop_timeout).unwrap_or(Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MatcherConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// What `match_against` does when a cached rule's pattern does not compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPatternPolicy {
    /// Fail the whole call with [`MirrorError::MalformedRule`].
    #[default]
    Fail,
    /// Log the bad rule and keep evaluating the others.
    Skip,
}

/// Matching behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default)]
    pub malformed_pattern: MalformedPatternPolicy,
}
