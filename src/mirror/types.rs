// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirror state and change notification types.
//!
//! # State Transitions
//!
//! ```text
//!            start()                first catch-up
//! Idle ───────────────→ Starting ───────────────────→ Ready
//!  ↑                       │                            │
//!  │   (feed closed        │ stop()                     │ stop()
//!  │    before load)       ↓                            ↓
//!  ├──────────────────── Stopping ←─────────────────────┘
//!  │                       │
//!  └───────────────────────┘
//!        feed torn down
//! ```
//!
//! # State Descriptions
//!
//! - **Idle**: No subscription. Initial state, and the state after `stop()`.
//! - **Starting**: Subscription open, backlog streaming in, load milestone not latched.
//! - **Ready**: Initial snapshot landed. Queries run against the live mirror.
//! - **Stopping**: `stop()` called. Waiting for the feed to tear down.

/// Lifecycle state of a [`RuleMirror`](super::RuleMirror).
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// No active subscription.
    Idle,

    /// Subscription open, waiting for the first catch-up.
    ///
    /// Batches are applied, but readers still wait on the load milestone.
    Starting,

    /// Initial snapshot loaded; incremental batches keep it current.
    Ready,

    /// Cancel issued, waiting for the feed to confirm teardown.
    Stopping,
}

impl MirrorState {
    /// Batches may only be applied while the feed is live.
    pub fn accepts_batches(&self) -> bool {
        matches!(self, MirrorState::Starting | MirrorState::Ready)
    }
}

impl std::fmt::Display for MirrorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorState::Idle => write!(f, "Idle"),
            MirrorState::Starting => write!(f, "Starting"),
            MirrorState::Ready => write!(f, "Ready"),
            MirrorState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Sent to change subscribers after each applied batch or resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Feed sequence the mirror now reflects.
    pub last_seq: u64,
    /// Rules inserted or replaced.
    pub upserted: usize,
    /// Rules removed.
    pub removed: usize,
    /// `true` for the catch-up resync, `false` for a feed batch.
    pub resync: bool,
    /// Wall-clock time of the apply, in Unix milliseconds.
    pub applied_at_ms: i64,
}
