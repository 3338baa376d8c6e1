//! Live frame streaming.
//!
//! The `FrameBroadcaster` captures screenshots from a run's browser session
//! on a timer, transcodes them and fans them out to every viewer of that run.
//! Viewers receive frames as `multipart/x-mixed-replace` parts (see `codec`)
//! after presenting a run-scoped capability token (see `token`).

mod breaker;
mod broadcaster;
pub mod codec;
mod config;
mod sink;
mod token;
mod transcode;
mod types;

pub use breaker::{Admission, BreakerState, BreakerWindow, CircuitBreaker};
pub use broadcaster::FrameBroadcaster;
pub use config::StreamConfig;
pub use sink::{ChannelSink, FrameSink, SinkError, StreamSubscription};
pub use token::{StreamToken, StreamTokenIssuer};
pub use transcode::FrameTranscoder;
pub use types::*;
