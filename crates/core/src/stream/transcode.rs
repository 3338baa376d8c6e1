//! Frame transcoding and placeholder synthesis.

use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};

use crate::metrics;

use super::{StreamConfig, StreamError};

const PLACEHOLDER_WIDTH: u32 = 640;
const PLACEHOLDER_HEIGHT: u32 = 360;

/// Decodes any supported capture, bounds it and re-encodes it as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct FrameTranscoder {
    max_width: u32,
    max_height: u32,
    quality: u8,
}

impl FrameTranscoder {
    pub fn new(max_width: u32, max_height: u32, quality: u8) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.max_width, config.max_height, config.jpeg_quality)
    }

    pub fn transcode(&self, raw: &[u8]) -> Result<Bytes, StreamError> {
        let started = Instant::now();

        let img = image::load_from_memory(raw)
            .map_err(|e| StreamError::Transcode(format!("decode failed: {}", e)))?;

        let img = if img.width() > self.max_width || img.height() > self.max_height {
            img.resize(self.max_width, self.max_height, FilterType::Triangle)
        } else {
            img
        };

        let encoded = encode_jpeg(&img.to_rgb8(), self.quality)?;

        metrics::FRAME_TRANSCODE_DURATION
            .with_label_values(&[])
            .observe(started.elapsed().as_secs_f64());

        Ok(encoded)
    }

    /// Transcode on the blocking pool.
    pub async fn transcode_blocking(&self, raw: Bytes) -> Result<Bytes, StreamError> {
        let transcoder = *self;
        tokio::task::spawn_blocking(move || transcoder.transcode(&raw))
            .await
            .map_err(|e| StreamError::Transcode(format!("transcode task failed: {}", e)))?
    }

    /// A neutral frame shown when no real capture is available.
    pub fn placeholder(&self) -> Result<Bytes, StreamError> {
        let (w, h) = (PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
        let band_top = h * 2 / 5;
        let band_bottom = h * 3 / 5;

        let img = RgbImage::from_fn(w, h, |x, y| {
            let in_band = y >= band_top && y < band_bottom && x >= w / 4 && x < w * 3 / 4;
            if in_band {
                Rgb([96, 96, 96])
            } else {
                Rgb([48, 48, 48])
            }
        });

        encode_jpeg(&img, self.quality)
    }
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Bytes, StreamError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(img)
        .map_err(|e| StreamError::Transcode(format!("encode failed: {}", e)))?;
    Ok(Bytes::from(out))
}
