//! Synthetic test-pattern decoder.
//!
//! Stands in for the external codec so the engine can run headless and be
//! tested deterministically: fixed frame rate and duration, key frames on a
//! fixed cadence, solid-color frames whose hue tracks the frame index.
//! `seek_before` lands on the preceding key frame like a real container.

use crate::core::geom::XY;
use crate::core::interval::Interval;
use crate::media::decoder::{
    DecoderFactory, ImageBuffer, MediaDecoder, MediaError, MediaFileInfo, MediaFrame,
};
use std::path::Path;
use std::sync::Arc;

/// Shape of the synthetic media.
#[derive(Clone, Copy, Debug)]
pub struct SynthConfig {
    pub frame_rate: f64,
    pub duration: f64,
    pub size: XY<i32>,
    /// Every Nth frame is a key frame.
    pub key_frame_interval: i64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            duration: 60.0,
            size: XY::new(64, 36),
            key_frame_interval: 12,
        }
    }
}

/// Decoder that fabricates frames instead of reading a codec.
pub struct SynthDecoder {
    cfg: SynthConfig,
    info: MediaFileInfo,
    next_index: i64,
}

impl SynthDecoder {
    pub fn new(filename: &str, cfg: SynthConfig) -> Self {
        let info = MediaFileInfo {
            filename: filename.to_string(),
            container_type: "synth".to_string(),
            codec_name: "testpattern".to_string(),
            pixel_format: "RGBA".to_string(),
            size: Some(cfg.size),
            frame_rate: Some(cfg.frame_rate),
            bit_rate: None,
            duration: Some(cfg.duration),
        };
        Self { cfg, info, next_index: 0 }
    }

    fn frame_count(&self) -> i64 {
        (self.cfg.duration * self.cfg.frame_rate).round() as i64
    }
}

impl MediaDecoder for SynthDecoder {
    fn file_info(&self) -> &MediaFileInfo {
        &self.info
    }

    fn seek_before(&mut self, t: f64) -> Result<(), MediaError> {
        let mut index = (t * self.cfg.frame_rate).floor() as i64;
        index = index.clamp(0, self.frame_count());
        // Snap down to the key frame cadence.
        let key = self.cfg.key_frame_interval.max(1);
        self.next_index = index - index.rem_euclid(key);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<MediaFrame>, MediaError> {
        let index = self.next_index;
        if index >= self.frame_count() {
            return Ok(None);
        }
        self.next_index = index + 1;

        let period = 1.0 / self.cfg.frame_rate;
        let time = Interval::new(index as f64 * period, (index + 1) as f64 * period);

        // Solid color cycling with the frame index.
        let rgba = [
            (index * 7 % 256) as u8,
            (index * 13 % 256) as u8,
            (index * 29 % 256) as u8,
            0xff,
        ];
        let pixels = (self.cfg.size.x * self.cfg.size.y) as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }

        let key = self.cfg.key_frame_interval.max(1);
        Ok(Some(MediaFrame {
            image: ImageBuffer {
                size: self.cfg.size,
                pixel_format: "RGBA".to_string(),
                data: Arc::new(data),
            },
            time,
            frame_type: if index % key == 0 { "I" } else { "P" },
            is_key_frame: index % key == 0,
            is_corrupt: false,
        }))
    }
}

/// Factory for the binary: synthesizes media for any path that exists on
/// disk, so bad file names still surface as a typed `NotFound`.
pub fn synth_decoder_factory(cfg: SynthConfig) -> DecoderFactory {
    Arc::new(move |path: &Path| {
        if !path.exists() {
            return Err(MediaError::NotFound(path.to_path_buf()));
        }
        Ok(Box::new(SynthDecoder::new(&path.to_string_lossy(), cfg)) as Box<dyn MediaDecoder>)
    })
}
