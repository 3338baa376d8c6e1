//! Viewer connections.
//!
//! The broadcaster owns every sink and is the only writer. Writes never
//! block: a full buffer drops the frame for that viewer, a closed sink gets
//! the viewer removed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("viewer buffer full")]
    Backpressure,
    #[error("viewer disconnected")]
    Closed,
}

/// One viewer's outgoing frame channel.
pub trait FrameSink: Send {
    /// Queue a frame without waiting.
    fn try_push(&mut self, frame: Bytes) -> Result<(), SinkError>;

    /// End the viewer's stream. Idempotent.
    fn close(&mut self);
}

/// Sink backed by a bounded mpsc channel.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink plus the receiving end for a viewer connection.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

impl FrameSink for ChannelSink {
    fn try_push(&mut self, frame: Bytes) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Viewer side of a stream subscription.
///
/// Frames arrive in capture order. The stream ends when the broadcast stops
/// or the viewer is removed; dropping this ends the viewer's subscription.
#[derive(Debug)]
pub struct StreamSubscription {
    pub id: u64,
    pub run_id: String,
    pub viewer: String,
    pub connected_at: DateTime<Utc>,
    frames: mpsc::Receiver<Bytes>,
}

impl StreamSubscription {
    pub(crate) fn new(
        id: u64,
        run_id: String,
        viewer: String,
        connected_at: DateTime<Utc>,
        frames: mpsc::Receiver<Bytes>,
    ) -> Self {
        Self {
            id,
            run_id,
            viewer,
            connected_at,
            frames,
        }
    }

    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    pub fn try_next_frame(&mut self) -> Option<Bytes> {
        self.frames.try_recv().ok()
    }

    /// Stop receiving. The broadcaster drops the viewer on its next push.
    pub fn close(&mut self) {
        self.frames.close();
    }

    pub fn into_receiver(self) -> mpsc::Receiver<Bytes> {
        self.frames
    }
}
