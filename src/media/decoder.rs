//! Media decoder capability interface.
//!
//! The engine treats codecs as an opaque source of timestamped frames with
//! a "seek to the key frame before t" operation. Concrete decoders (a real
//! codec binding, or [`crate::media::SynthDecoder`] for tests and dry runs)
//! are injected through a [`DecoderFactory`].

use crate::core::geom::XY;
use crate::core::interval::Interval;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Static metadata about a media file. Unchanged during playback.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MediaFileInfo {
    pub filename: String,
    pub container_type: String,
    pub codec_name: String,
    pub pixel_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<XY<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// An uncompressed image as handed over by a decoder.
///
/// Pixel data is shared so frames stay cheap to pass around; the display
/// driver copies or imports it on upload.
#[derive(Clone, Debug)]
pub struct ImageBuffer {
    pub size: XY<i32>,
    pub pixel_format: String,
    pub data: Arc<Vec<u8>>,
}

/// One uncompressed frame. Still images appear as one-frame videos.
#[derive(Clone, Debug)]
pub struct MediaFrame {
    pub image: ImageBuffer,
    /// Display interval in seconds since the start of the media.
    pub time: Interval,
    /// "I", "P", "B" etc, for debugging.
    pub frame_type: &'static str,
    /// True if the frame can be seeked to.
    pub is_key_frame: bool,
    /// True if the codec had an error producing this frame.
    pub is_corrupt: bool,
}

/// Decoder errors. `NotFound` is distinguished so control surfaces can
/// answer 404 for bad file names.
#[derive(Debug)]
pub enum MediaError {
    NotFound(PathBuf),
    Open(String),
    Seek(String),
    Decode(String),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::NotFound(path) => write!(f, "media file not found: {}", path.display()),
            MediaError::Open(e) => write!(f, "open error: {}", e),
            MediaError::Seek(e) => write!(f, "seek error: {}", e),
            MediaError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for MediaError {}

impl MediaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MediaError::NotFound(_))
    }
}

/// Interface to a media codec. Externally synchronized: used from one
/// thread at a time.
pub trait MediaDecoder: Send {
    /// Static metadata for the media file.
    fn file_info(&self) -> &MediaFileInfo;

    /// Resets position so the next `next_frame` yields a key frame at or
    /// before the given timestamp.
    fn seek_before(&mut self, t: f64) -> Result<(), MediaError>;

    /// The next uncompressed frame, or None at end of file.
    fn next_frame(&mut self) -> Result<Option<MediaFrame>, MediaError>;
}

/// Opens a decoder for a media file. Loaders call this lazily, possibly
/// several times per file (one decoder per loading region).
pub type DecoderFactory =
    Arc<dyn Fn(&Path) -> Result<Box<dyn MediaDecoder>, MediaError> + Send + Sync>;
