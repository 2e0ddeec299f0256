//! MARQUEE - Scripted multi-screen video layer playback engine.
//!
//! Plays time-scripted compositions of video layers on directly attached
//! display outputs. Content is described declaratively as Bezier-animated
//! layers over media files; per-file loader threads keep decoded frames
//! covering the near future, and per-screen player threads drive the
//! display driver at vsync-accurate times.
//!
//! Re-exports the main types for use by binary targets.

// Primitives: intervals, splines, clocks, flags
pub mod core;

// Media decoding capability + per-file frame loaders
pub mod media;

// Display driver capability + per-screen frame players
pub mod display;

// Script data model, parsing, and the per-tick runner
pub mod script;

// HTTP control surface
pub mod server;

// App modules
pub mod cli;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    global_clocks, BezierSegment, BezierSpline, Clocks, Flag, Interval, IntervalSet, RealClocks,
    SimClocks, TimeKey, XY,
};
pub use display::{
    DisplayDriver, DisplayFrame, DisplayLayer, DisplayMode, FramePlayer, HeadlessDriver,
    LoadedImage, Timeline,
};
pub use media::{
    DecoderFactory, FrameLoader, FrameRequest, LoadedFrames, MediaDecoder, MediaError,
    MediaFileInfo, SynthDecoder,
};
pub use script::{fix_relative_times, parse_script, Script, ScriptRunner};
