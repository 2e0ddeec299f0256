//! Media access: the decoder capability interface, the synthetic stand-in
//! decoder, and the per-file asynchronous frame loader.

pub mod decoder;
pub mod loader;
pub mod synth;

pub use decoder::{
    DecoderFactory, ImageBuffer, MediaDecoder, MediaError, MediaFileInfo, MediaFrame,
};
pub use loader::{FrameLoader, FrameLoaderContext, FrameRequest, LoadedFrames};
pub use synth::{synth_decoder_factory, SynthConfig, SynthDecoder};
