//! Types for the frame broadcaster.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// No active broadcast for this run.
    #[error("run {0} is not streaming")]
    NotStreaming(String),

    /// Missing, expired or mismatched capability token.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("transcode failed: {0}")]
    Transcode(String),
}

/// Something that can produce raw screenshots on demand.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> Result<Bytes, StreamError>;
}

/// Why a viewer was removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The viewer's connection went away.
    Closed,
    /// The viewer stopped draining frames for too long.
    Stalled,
    Unsubscribed,
    /// The broadcast ended.
    Stopped,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Closed => "closed",
            DropReason::Stalled => "stalled",
            DropReason::Unsubscribed => "unsubscribed",
            DropReason::Stopped => "stopped",
        }
    }
}

/// Broadcast lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Started {
        run_id: String,
        interval_ms: u64,
    },
    /// Captures suspended after too many failures.
    Paused {
        run_id: String,
        cooldown_ms: u64,
        attempts: u32,
        failures: u32,
    },
    Resumed {
        run_id: String,
    },
    Stopped {
        run_id: String,
    },
    SubscriberDropped {
        run_id: String,
        subscriber_id: u64,
        reason: DropReason,
    },
}

impl StreamEvent {
    pub fn run_id(&self) -> &str {
        match self {
            StreamEvent::Started { run_id, .. }
            | StreamEvent::Paused { run_id, .. }
            | StreamEvent::Resumed { run_id }
            | StreamEvent::Stopped { run_id }
            | StreamEvent::SubscriberDropped { run_id, .. } => run_id,
        }
    }
}

/// Per-run streaming counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamStats {
    pub run_id: String,
    /// Capture attempts (skipped ticks while paused are not attempts).
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Failures covered by re-pushing the cached frame.
    pub cached_fallbacks: u64,
    /// Failures covered by a placeholder.
    pub placeholder_fallbacks: u64,
    /// Ticks skipped while paused.
    pub skipped: u64,
    pub pauses: u64,
    /// Frames handed to viewers.
    pub frames_pushed: u64,
    /// Frames not delivered because a viewer's buffer was full.
    pub frames_dropped: u64,
    pub subscribers: usize,
    pub has_cached_frame: bool,
    /// "closed", "open" or "half_open".
    pub breaker: String,
    pub started_at: Option<DateTime<Utc>>,
}

/// A connected viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerInfo {
    pub subscriber_id: u64,
    pub viewer: String,
    pub connected_at: DateTime<Utc>,
}
