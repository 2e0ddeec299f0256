//! Headless display driver: accepts uploads and presentations without any
//! hardware. Used by tests and by `marquee` runs on machines without a
//! suitable graphics device; every presentation is recorded and logged.

use crate::core::geom::XY;
use crate::display::driver::{
    DisplayDriver, DisplayError, DisplayFrame, DisplayMode, LoadedImage, ScreenStatus,
};
use crate::media::decoder::ImageBuffer;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cap on the retained presentation history.
const PRESENT_HISTORY: usize = 1024;

/// One screen the headless driver pretends to have.
#[derive(Clone, Debug)]
pub struct HeadlessScreen {
    pub connector: String,
    pub size: XY<i32>,
    pub hz: i32,
}

/// A recorded `show_frame` call.
#[derive(Clone, Debug)]
pub struct PresentRecord {
    pub screen_id: u32,
    pub frame: DisplayFrame,
}

pub struct HeadlessDriver {
    screens: Vec<ScreenStatus>,
    next_image_id: AtomicU64,
    presents: Mutex<VecDeque<PresentRecord>>,
}

impl HeadlessDriver {
    pub fn new(screens: Vec<HeadlessScreen>) -> Self {
        let screens = screens
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let mode = DisplayMode::new(s.size, s.hz);
                ScreenStatus {
                    id: i as u32 + 1,
                    connector: s.connector,
                    display_detected: true,
                    active_mode: None,
                    modes: vec![mode],
                }
            })
            .collect();
        Self {
            screens,
            next_image_id: AtomicU64::new(1),
            presents: Mutex::new(VecDeque::new()),
        }
    }

    /// Single 1920x1080@60 screen on a stand-in connector.
    pub fn with_default_screen() -> Self {
        Self::new(vec![HeadlessScreen {
            connector: "HEADLESS-1".to_string(),
            size: XY::new(1920, 1080),
            hz: 60,
        }])
    }

    /// Snapshot of recorded presentations, oldest first.
    pub fn presented(&self) -> Vec<PresentRecord> {
        self.presents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn present_count(&self) -> usize {
        self.presents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl DisplayDriver for HeadlessDriver {
    fn scan_screens(&self) -> Result<Vec<ScreenStatus>, DisplayError> {
        Ok(self.screens.clone())
    }

    fn load_image(&self, image: ImageBuffer) -> Result<Arc<LoadedImage>, DisplayError> {
        let id = self.next_image_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(LoadedImage::new(id, image.size)))
    }

    fn show_frame(&self, screen_id: u32, frame: &DisplayFrame) -> Result<(), DisplayError> {
        if !self.screens.iter().any(|s| s.id == screen_id) {
            return Err(DisplayError::BadScreen(screen_id));
        }
        debug!(
            "s{} present {}l mode={}",
            screen_id,
            frame.layers.len(),
            frame.mode
        );
        let mut presents = self.presents.lock().unwrap_or_else(|e| e.into_inner());
        if presents.len() >= PRESENT_HISTORY {
            presents.pop_front();
        }
        presents.push_back(PresentRecord { screen_id, frame: frame.clone() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_image() -> ImageBuffer {
        ImageBuffer {
            size: XY::new(8, 8),
            pixel_format: "RGBA".to_string(),
            data: Arc::new(vec![0u8; 8 * 8 * 4]),
        }
    }

    #[test]
    fn test_scan_and_upload() {
        let driver = HeadlessDriver::with_default_screen();
        let screens = driver.scan_screens().unwrap();
        assert_eq!(screens.len(), 1);
        assert_eq!(screens[0].modes[0].size, XY::new(1920, 1080));

        let a = driver.load_image(tiny_image()).unwrap();
        let b = driver.load_image(tiny_image()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.size(), XY::new(8, 8));
    }

    #[test]
    fn test_present_records_and_rejects_bad_screen() {
        let driver = HeadlessDriver::with_default_screen();
        let frame = DisplayFrame::default();
        driver.show_frame(1, &frame).unwrap();
        assert_eq!(driver.present_count(), 1);
        assert!(matches!(
            driver.show_frame(99, &frame),
            Err(DisplayError::BadScreen(99))
        ));
    }
}
