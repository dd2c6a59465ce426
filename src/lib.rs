// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # On-Change Mirror
//!
//! A live, in-memory mirror of the "on change" rule documents stored in a
//! document database, and a fast query that tells which database names any
//! rule cares about.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           on-change-mirror                           │
//! │                                                                      │
//! │  ┌─────────────────┐   ┌───────────────────┐   ┌──────────────────┐  │
//! │  │ ViewProvisioner │   │ ReplicationSource │──►│ Feed task        │  │
//! │  │ (create/destroy)│   │ (live, filtered)  │   │ (single writer)  │  │
//! │  └─────────────────┘   └───────────────────┘   └──────────────────┘  │
//! │                                                         │            │
//! │                                                         ▼            │
//! │  match_against(names) ◄──── RuleCache (id → rule + compiled regex)   │
//! │  all()                                                               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Load Barrier
//!
//! `start()` resolves only after the feed first catches up and the mirror
//! has been resynchronized from the full view. `all()` and
//! `match_against()` wait for the same milestone, so they never see a
//! partial snapshot.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use on_change_mirror::{MirrorConfig, RuleMirror};
//! use on_change_mirror::document::rule_doc;
//!
//! #[tokio::main]
//! async fn main() -> on_change_mirror::Result<()> {
//!     let mirror = RuleMirror::new(MirrorConfig::default());
//!     mirror.create().await?;
//!     mirror.store().put("spiegel", rule_doc("r1", "on_change", "^user_")).await?;
//!
//!     mirror.start().await?;
//!     let matched = mirror.match_against(&["user_1", "admin"]).await?;
//!     assert!(matched.contains("user_1"));
//!
//!     mirror.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod feed;
pub mod matcher;
pub mod memory;
pub mod metrics;
pub mod mirror;
pub mod store;
pub mod view;

// Re-exports for convenience
pub use cache::{CachedRule, RuleCache};
pub use config::{FeedConfig, MalformedPatternPolicy, MatcherConfig, MirrorConfig, ViewConfig};
pub use document::Rule;
pub use error::{MirrorError, Result};
pub use feed::{FeedEvent, FeedHandle, FeedOptions};
pub use memory::InMemoryStore;
pub use mirror::{ChangeNotice, MirrorState, RuleMirror};
pub use store::{DocumentStore, ReplicationSource, ViewSpec};
pub use view::ViewProvisioner;
