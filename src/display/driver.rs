//! Display driver capability interface.
//!
//! The engine treats the graphics device as: enumerate screens and modes,
//! upload an image, atomically present a layer stack at the next vsync.
//! The real KMS-style driver lives outside this crate;
//! [`crate::display::HeadlessDriver`] is the in-tree implementation used by
//! tests and hardware-less runs.

use crate::core::geom::XY;
use crate::media::decoder::ImageBuffer;
use serde::Serialize;
use std::sync::Arc;

/// Video mode: displayable size plus nominal refresh rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DisplayMode {
    pub size: XY<i32>,
    pub nominal_hz: i32,
}

impl DisplayMode {
    pub fn new(size: XY<i32>, nominal_hz: i32) -> Self {
        Self { size, nominal_hz }
    }

    pub fn actual_hz(&self) -> f64 {
        self.nominal_hz as f64
    }

    /// Seconds per refresh; infinite when the rate is unknown.
    pub fn frame_period(&self) -> f64 {
        if self.nominal_hz > 0 {
            1.0 / self.actual_hz()
        } else {
            f64::INFINITY
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}@{}", self.size.x, self.size.y, self.nominal_hz)
    }
}

/// Connector state and usable modes, from `scan_screens`.
#[derive(Clone, Debug, Serialize)]
pub struct ScreenStatus {
    pub id: u32,
    pub connector: String,
    pub display_detected: bool,
    pub active_mode: Option<DisplayMode>,
    /// First mode is the preferred one.
    pub modes: Vec<DisplayMode>,
}

/// Opaque handle to an image uploaded into the display device.
///
/// Shared ownership: the loader cache, timelines and the player all hold
/// references, and the handle must outlive any in-flight presentation.
#[derive(Debug)]
pub struct LoadedImage {
    id: u64,
    size: XY<i32>,
}

impl LoadedImage {
    pub fn new(id: u64, size: XY<i32>) -> Self {
        Self { id, size }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> XY<i32> {
        self.size
    }
}

/// One image (or portion thereof) and its placement on screen.
#[derive(Clone, Debug)]
pub struct DisplayLayer {
    pub image: Arc<LoadedImage>,
    /// Source crop, in media pixels (fractional for smooth scaling).
    pub from_xy: XY<f64>,
    pub from_size: XY<f64>,
    /// Destination rectangle, in screen pixels.
    pub to_xy: XY<f64>,
    pub to_size: XY<f64>,
    pub opacity: f64,
}

/// A full screen update: mode plus layers in Z-order, bottom to top.
/// All layers must be given every time; they are not sticky.
#[derive(Clone, Debug, Default)]
pub struct DisplayFrame {
    pub mode: DisplayMode,
    pub layers: Vec<DisplayLayer>,
}

#[derive(Debug)]
pub enum DisplayError {
    /// The device could not be enumerated or opened.
    Unavailable(String),
    /// No such screen id.
    BadScreen(u32),
    Upload(String),
    Present(String),
}

impl std::fmt::Display for DisplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayError::Unavailable(e) => write!(f, "display unavailable: {}", e),
            DisplayError::BadScreen(id) => write!(f, "no such screen: {}", id),
            DisplayError::Upload(e) => write!(f, "image upload failed: {}", e),
            DisplayError::Present(e) => write!(f, "present failed: {}", e),
        }
    }
}

impl std::error::Error for DisplayError {}

/// Interface to a graphics device, normally one per system.
/// Internally synchronized for multithreaded access.
pub trait DisplayDriver: Send + Sync {
    /// Returns the id, connector name and current status of all screens.
    fn scan_screens(&self) -> Result<Vec<ScreenStatus>, DisplayError>;

    /// Imports an image into the device for use in display layers.
    fn load_image(&self, image: ImageBuffer) -> Result<Arc<LoadedImage>, DisplayError>;

    /// Updates a screen's mode and contents, taking effect at the next
    /// vsync. Blocks until the device accepts the update.
    fn show_frame(&self, screen_id: u32, frame: &DisplayFrame) -> Result<(), DisplayError>;
}
