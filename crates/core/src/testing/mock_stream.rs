//! Mock frame source and viewer sink for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::stream::{FrameSink, FrameSource, SinkError, StreamError};

use super::fixtures;

/// Frame source that returns a fixed PNG or fails on demand.
#[derive(Debug, Clone, Default)]
pub struct MockFrameSource {
    failing: Arc<AtomicBool>,
    captures: Arc<AtomicUsize>,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose every capture fails.
    pub fn failing() -> Self {
        let source = Self::new();
        source.set_failing(true);
        source
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Capture attempts so far.
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn capture_frame(&self) -> Result<Bytes, StreamError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StreamError::Capture("mock capture failure".into()));
        }
        Ok(fixtures::png_frame(64, 48, [200, 80, 20]))
    }
}

#[derive(Debug, Default)]
struct SinkState {
    frames: Vec<Bytes>,
    full: bool,
    disconnected: bool,
    closed: bool,
}

/// Viewer sink that records frames. Clones share state, so a test keeps one
/// handle while the broadcaster owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SinkState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.with_state(|s| s.frames.clone())
    }

    pub fn frame_count(&self) -> usize {
        self.with_state(|s| s.frames.len())
    }

    /// Refuse frames with backpressure.
    pub fn set_full(&self, full: bool) {
        self.with_state(|s| s.full = full);
    }

    /// Simulate the viewer's connection going away.
    pub fn disconnect(&self) {
        self.with_state(|s| s.disconnected = true);
    }

    /// Whether the broadcaster ended this viewer.
    pub fn is_closed(&self) -> bool {
        self.with_state(|s| s.closed)
    }
}

impl FrameSink for RecordingSink {
    fn try_push(&mut self, frame: Bytes) -> Result<(), SinkError> {
        self.with_state(|s| {
            if s.disconnected || s.closed {
                Err(SinkError::Closed)
            } else if s.full {
                Err(SinkError::Backpressure)
            } else {
                s.frames.push(frame);
                Ok(())
            }
        })
    }

    fn close(&mut self) {
        self.with_state(|s| s.closed = true);
    }
}
