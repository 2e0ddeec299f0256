use clap::Parser;
use std::path::PathBuf;

// Build version with engine info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Decoder: synthetic test pattern (external codecs plug in via trait)\n",
    "Display: headless (external drivers plug in via trait)\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Scripted multi-screen video layer playback engine
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Play script file (JSON)
    #[arg(short = 's', long = "script", value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Single media file to play full-screen (instead of a script)
    #[arg(short = 'm', long = "media", value_name = "FILE")]
    pub media: Option<PathBuf>,

    /// Screen connector to play on (substring match, "*" = first)
    #[arg(long = "screen", value_name = "NAME", default_value = "*")]
    pub screen: String,

    /// Video mode for --media playback, e.g. 1920x1080
    #[arg(long = "mode", value_name = "WxH")]
    pub mode: Option<String>,

    /// Seconds into the media to start (--media playback)
    #[arg(long = "seek", value_name = "SECONDS", default_value_t = 0.0)]
    pub seek: f64,

    /// List detected screens and modes, then exit
    #[arg(long = "list-screens")]
    pub list_screens: bool,

    /// Serve the control API on this port (0 disables)
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value_t = 0)]
    pub port: u16,

    /// Enable debug logging to file (default: marquee.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}
