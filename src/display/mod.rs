//! Display output: the driver capability interface, the headless in-tree
//! driver, and the per-screen frame player.

pub mod driver;
pub mod headless;
pub mod player;

pub use driver::{
    DisplayDriver, DisplayError, DisplayFrame, DisplayLayer, DisplayMode, LoadedImage,
    ScreenStatus,
};
pub use headless::{HeadlessDriver, HeadlessScreen, PresentRecord};
pub use player::{FramePlayer, Timeline};
