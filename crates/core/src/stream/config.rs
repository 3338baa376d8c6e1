//! Frame broadcaster configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for live frame streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Target capture rate (frames per second).
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Minimum spacing between captures (milliseconds).
    /// Wins over `fps` when the two disagree.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Frames larger than this are scaled down, keeping aspect ratio.
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// JPEG quality (1-100).
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,

    /// Failure rate above which the broadcast pauses (0.0-1.0].
    #[serde(default = "default_failure_rate")]
    pub failure_rate_threshold: f64,

    /// Capture attempts required before the failure rate is trusted.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,

    /// How long a tripped broadcast stays paused (milliseconds).
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,

    /// Frames buffered per viewer before frames get dropped for it.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Multipart boundary token.
    #[serde(default = "default_boundary")]
    pub boundary: String,

    /// Secret for stream capability tokens.
    /// Empty means a random per-process secret.
    #[serde(default)]
    pub token_secret: String,

    /// Lifetime of a stream capability token (seconds).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_fps() -> f64 {
    5.0
}

fn default_min_interval() -> u64 {
    200
}

fn default_max_width() -> u32 {
    1280
}

fn default_max_height() -> u32 {
    720
}

fn default_quality() -> u8 {
    70
}

fn default_failure_rate() -> f64 {
    0.9
}

fn default_min_samples() -> u32 {
    20
}

fn default_cooldown() -> u64 {
    10_000
}

fn default_subscriber_buffer() -> usize {
    8
}

fn default_boundary() -> String {
    "frame".to_string()
}

fn default_token_ttl() -> u64 {
    3600
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            min_interval_ms: default_min_interval(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            jpeg_quality: default_quality(),
            failure_rate_threshold: default_failure_rate(),
            min_samples: default_min_samples(),
            cooldown_ms: default_cooldown(),
            subscriber_buffer: default_subscriber_buffer(),
            boundary: default_boundary(),
            token_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl StreamConfig {
    /// Effective time between captures: `max(min_interval_ms, 1000 / fps)`.
    pub fn capture_interval(&self) -> Duration {
        let from_fps = if self.fps > 0.0 {
            (1000.0 / self.fps).round() as u64
        } else {
            0
        };
        Duration::from_millis(self.min_interval_ms.max(from_fps).max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}
