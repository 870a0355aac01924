//! Represents an in-progress chunked upload and its lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, path::PathBuf, time::Instant};

/// Lifecycle of an upload session.
///
/// ```text
/// Idle -> Receiving -> Finalizing -> Committed
///           ^    |
///           +----+  (restart on a fresh start chunk)
/// ```
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Receiving,
    Finalizing,
    Committed,
}

impl SessionState {
    /// Whether the session may move from `self` to `next`.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Receiving)
                | (Receiving, Receiving)
                | (Receiving, Finalizing)
                | (Finalizing, Committed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Receiving => "receiving",
            SessionState::Finalizing => "finalizing",
            SessionState::Committed => "committed",
        };
        f.write_str(label)
    }
}

/// Server-side accumulation context for one logical file.
///
/// The scratch file at `scratch_path` belongs to this session alone and is
/// removed when the session is released.
#[derive(Debug)]
pub struct UploadSession {
    pub name: String,
    pub state: SessionState,
    pub scratch_path: PathBuf,

    /// Bytes written to the scratch file so far.
    pub len: u64,

    pub chunks_received: u32,

    /// Ordinal the next chunk is expected to carry.
    pub next_chunk: u32,

    /// Client-supplied chunk count hint; never enforced.
    pub total_chunks: u32,

    pub created_at: DateTime<Utc>,

    /// Last begin or append; the sweeper ages sessions by this.
    pub last_activity: Instant,
}

impl UploadSession {
    pub fn new(name: impl Into<String>, scratch_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            state: SessionState::Idle,
            scratch_path,
            len: 0,
            chunks_received: 0,
            next_chunk: 1,
            total_chunks: 0,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }
}
