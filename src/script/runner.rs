//! Script runner: the per-tick bridge from a declarative script to the
//! loaders and players.
//!
//! Each tick evaluates the script over the near future: per-file wanted
//! interval sets (through the play splines' range bounds) steer the frame
//! loaders, and per-screen timelines assembled from whatever frames are
//! already loaded steer the frame players. Loaders and players whose file
//! or screen left the script are dropped.

use crate::core::clock::Clocks;
use crate::core::flag::Flag;
use crate::core::geom::XY;
use crate::core::interval::{Interval, IntervalSet, TimeKey};
use crate::core::spline::BezierSpline;
use crate::display::driver::{
    DisplayDriver, DisplayError, DisplayFrame, DisplayLayer, DisplayMode, ScreenStatus,
};
use crate::display::player::{FramePlayer, Timeline};
use crate::media::decoder::{DecoderFactory, MediaError, MediaFileInfo};
use crate::media::loader::{FrameLoader, FrameLoaderContext, FrameRequest, LoadedFrames};
use crate::script::data::{Script, ScriptLayer, ScriptMedia, ScriptScreen};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Fallback refresh rate when the script names a mode no screen reports.
const DEFAULT_MODE_HZ: i32 = 60;

/// Smallest lookahead for timeline construction, seconds.
const MIN_HORIZON: f64 = 0.2;

/// Dependencies handed to the runner at construction.
pub struct RunnerContext {
    pub driver: Arc<dyn DisplayDriver>,
    pub clocks: Arc<dyn Clocks>,
    pub decoder_factory: DecoderFactory,
    /// Raised when any loader or player makes progress; lets the owner
    /// tick early instead of polling blind.
    pub notify: Option<Arc<Flag>>,
}

struct ScreenPlayer {
    player: FramePlayer,
    mode: DisplayMode,
    connector: String,
}

/// Per-file wanted set plus tuning folded over every referencing layer.
#[derive(Default)]
struct FileWant {
    wanted: IntervalSet,
    decoder_idle_time: f64,
    seek_scan_time: f64,
}

/// Snapshot of playback state for control surfaces.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunnerStatus {
    pub screens: Vec<ScreenPlaybackStatus>,
    pub media: Vec<MediaPlaybackStatus>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScreenPlaybackStatus {
    pub id: u32,
    pub connector: String,
    pub mode: DisplayMode,
    pub last_shown: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct MediaPlaybackStatus {
    pub file: String,
    pub coverage: Vec<(f64, f64)>,
    pub frames: usize,
    pub eof: Option<f64>,
    pub error: Option<String>,
}

pub struct ScriptRunner {
    cx: RunnerContext,
    screens: Vec<ScreenStatus>,
    loaders: HashMap<String, FrameLoader>,
    players: HashMap<u32, ScreenPlayer>,
    info_cache: HashMap<String, MediaFileInfo>,
    unmatched_warned: HashSet<String>,
}

impl ScriptRunner {
    /// Scans the display device. Enumeration failure is fatal.
    pub fn new(cx: RunnerContext) -> Result<Self, DisplayError> {
        let screens = cx.driver.scan_screens()?;
        info!(
            "Script runner ready: {} screen(s): {}",
            screens.len(),
            screens
                .iter()
                .map(|s| s.connector.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            cx,
            screens,
            loaders: HashMap::new(),
            players: HashMap::new(),
            info_cache: HashMap::new(),
            unmatched_warned: HashSet::new(),
        })
    }

    /// One tick: steer loaders and players from the script at `now`.
    /// Returns true once every scripted layer has played out.
    pub fn update(&mut self, script: &Script) -> bool {
        let now = self.cx.clocks.monotonic();
        trace!("TICK t={:.3}", now);

        self.update_loaders(script, now);
        self.update_players(script, now);
        self.all_layers_done(script, now)
    }

    /// Static metadata by file name, opened lazily and cached.
    pub fn file_info(&mut self, file: &str) -> Result<MediaFileInfo, MediaError> {
        if let Some(info) = self.info_cache.get(file) {
            return Ok(info.clone());
        }
        let info = match self.loaders.get(file) {
            Some(loader) => loader.file_info()?,
            None => (self.cx.decoder_factory)(&PathBuf::from(file))?
                .file_info()
                .clone(),
        };
        self.info_cache.insert(file.to_string(), info.clone());
        Ok(info)
    }

    /// Current playback state, for the HTTP surface and logs.
    pub fn status(&self) -> RunnerStatus {
        let screens = self
            .players
            .iter()
            .map(|(&id, sp)| ScreenPlaybackStatus {
                id,
                connector: sp.connector.clone(),
                mode: sp.mode,
                last_shown: sp.player.last_shown(),
            })
            .collect();
        let media = self
            .loaders
            .iter()
            .map(|(file, loader)| {
                let loaded = loader.loaded();
                MediaPlaybackStatus {
                    file: file.clone(),
                    coverage: loaded.coverage.iter().map(|iv| (iv.begin, iv.end)).collect(),
                    frames: loaded.frames.len(),
                    eof: loaded.eof,
                    error: loaded.error,
                }
            })
            .collect();
        RunnerStatus { screens, media }
    }

    fn update_loaders(&mut self, script: &Script, now: f64) {
        let mut wants: HashMap<String, FileWant> = HashMap::new();

        let mut merge = |media: &ScriptMedia| {
            let want = wants.entry(media.file.clone()).or_default();
            let horizon = Interval::new(now, now + media.buffer);
            want.wanted.insert_all(&media.play.range_over(horizon));
            want.decoder_idle_time = want.decoder_idle_time.max(media.decoder_idle_time);
            want.seek_scan_time = want.seek_scan_time.max(media.seek_scan_time);
        };

        for screen in script.screens.values() {
            for layer in &screen.layers {
                merge(&layer.media);
            }
        }
        for standby in &script.standbys {
            merge(standby);
        }

        for (file, want) in &wants {
            let loader = self.loaders.entry(file.clone()).or_insert_with(|| {
                debug!("Opening loader: {}", file);
                FrameLoader::start(FrameLoaderContext {
                    driver: Arc::clone(&self.cx.driver),
                    clocks: Arc::clone(&self.cx.clocks),
                    decoder_factory: Arc::clone(&self.cx.decoder_factory),
                    filename: PathBuf::from(file),
                })
            });
            loader.set_request(FrameRequest {
                wanted: want.wanted.clone(),
                decoder_idle_time: want.decoder_idle_time,
                seek_scan_time: want.seek_scan_time,
                notify: self.cx.notify.clone(),
            });
        }

        // Loaders for files no longer referenced are dropped; Drop joins
        // their workers once in-flight decoding finishes.
        self.loaders.retain(|file, _| {
            let keep = wants.contains_key(file);
            if !keep {
                debug!("Closing loader: {}", file);
            }
            keep
        });
    }

    fn update_players(&mut self, script: &Script, now: f64) {
        let mut scripted: HashSet<u32> = HashSet::new();

        // One loaded-frames snapshot per file per tick.
        let snapshots: HashMap<&str, LoadedFrames> = self
            .loaders
            .iter()
            .map(|(file, loader)| (file.as_str(), loader.loaded()))
            .collect();

        for (name, screen) in &script.screens {
            let Some(status) = self.match_screen(name) else {
                if self.unmatched_warned.insert(name.clone()) {
                    warn!("No connected screen matches \"{}\"", name);
                }
                continue;
            };
            let mode = choose_mode(&status, screen);
            scripted.insert(status.id);

            let entry = self.players.entry(status.id).or_insert_with(|| {
                info!("s{} ({}) starting playback at {}", status.id, status.connector, mode);
                ScreenPlayer {
                    player: FramePlayer::start(
                        Arc::clone(&self.cx.clocks),
                        Arc::clone(&self.cx.driver),
                        status.id,
                    ),
                    mode,
                    connector: status.connector.clone(),
                }
            });
            if entry.mode != mode {
                info!("s{} mode change {} -> {}", status.id, entry.mode, mode);
                entry.player = FramePlayer::start(
                    Arc::clone(&self.cx.clocks),
                    Arc::clone(&self.cx.driver),
                    status.id,
                );
                entry.mode = mode;
            }

            let timeline = build_timeline(screen, mode, now, &snapshots);
            entry
                .player
                .set_timeline(timeline, self.cx.notify.clone());
        }

        self.players.retain(|id, _| {
            let keep = scripted.contains(id);
            if !keep {
                info!("s{} leaving script, stopping playback", id);
            }
            keep
        });
    }

    /// Done when every layer's remaining play range starts at or past the
    /// end of its media. Only files referenced by layers count; standbys
    /// are kept warm indefinitely and never hold playback open.
    fn all_layers_done(&mut self, script: &Script, now: f64) -> bool {
        for screen in script.screens.values() {
            for layer in &screen.layers {
                let range = layer
                    .media
                    .play
                    .range_over(Interval::new(now, now + 1e12));
                if range.is_empty() {
                    continue; // nothing left scheduled for this layer
                }
                let media_end = match self.file_info(&layer.media.file) {
                    Ok(info) => info.duration,
                    Err(_) => None,
                };
                let media_end = media_end.or_else(|| {
                    // No duration in metadata: fall back on observed EOF.
                    self.loaders
                        .get(&layer.media.file)
                        .and_then(|l| l.loaded().eof)
                });
                match media_end {
                    Some(end) if range.bounds().begin >= end => {}
                    _ => return false,
                }
            }
        }
        true
    }

    fn match_screen(&self, name: &str) -> Option<ScreenStatus> {
        self.screens
            .iter()
            .find(|s| name.is_empty() || name == "*" || s.connector.contains(name))
            .cloned()
    }
}

fn choose_mode(status: &ScreenStatus, screen: &ScriptScreen) -> DisplayMode {
    status
        .modes
        .iter()
        .find(|m| {
            m.size == screen.mode
                && screen.mode_hz.map_or(true, |hz| m.nominal_hz == hz)
        })
        .copied()
        .unwrap_or(DisplayMode {
            size: screen.mode,
            nominal_hz: screen.mode_hz.unwrap_or(DEFAULT_MODE_HZ),
        })
}

/// Presentation times are multiples of the frame period so successive
/// ticks regenerate the same grid and the player's same-keys check holds.
fn build_timeline(
    screen: &ScriptScreen,
    mode: DisplayMode,
    now: f64,
    snapshots: &HashMap<&str, LoadedFrames>,
) -> Timeline {
    let mut timeline = Timeline::new();
    let period = mode.frame_period();
    if !period.is_finite() || period <= 0.0 {
        return timeline;
    }

    let horizon = screen
        .layers
        .iter()
        .map(|l| l.media.buffer)
        .fold(MIN_HORIZON, f64::max);

    // Index-based grid: the same multiple of the period always maps to the
    // bit-identical key, tick after tick.
    let mut index = (now / period).ceil() as i64;
    let end = now + horizon;
    loop {
        let p = index as f64 * period;
        if p > end {
            break;
        }
        let layers: Vec<DisplayLayer> = screen
            .layers
            .iter()
            .filter_map(|layer| resolve_layer(layer, p, mode, snapshots))
            .collect();
        timeline.insert(TimeKey(p), DisplayFrame { mode, layers });
        index += 1;
    }
    timeline
}

/// A layer's contribution at presentation time `p`, or None when the play
/// curve is undefined, the source time is past EOF, or no frame at or
/// before the source time is loaded yet.
fn resolve_layer(
    layer: &ScriptLayer,
    p: f64,
    mode: DisplayMode,
    snapshots: &HashMap<&str, LoadedFrames>,
) -> Option<DisplayLayer> {
    let source_time = layer.media.play.value_at(p)?;
    let loaded = snapshots.get(layer.media.file.as_str())?;
    if let Some(eof) = loaded.eof {
        if source_time > eof {
            return None;
        }
    }
    let (_, image) = loaded.frame_at_or_before(source_time)?;

    let image_size = image.size().as_f64();
    let eval = |spline: &BezierSpline, default: f64| spline.value_at(p).unwrap_or(default);
    let from_xy = XY::new(eval(&layer.from_xy.x, 0.0), eval(&layer.from_xy.y, 0.0));
    let from_size = XY::new(
        eval(&layer.from_size.x, image_size.x),
        eval(&layer.from_size.y, image_size.y),
    );
    let to_xy = XY::new(eval(&layer.to_xy.x, 0.0), eval(&layer.to_xy.y, 0.0));
    let mode_size = mode.size.as_f64();
    let to_size = XY::new(
        eval(&layer.to_size.x, mode_size.x),
        eval(&layer.to_size.y, mode_size.y),
    );
    let opacity = eval(&layer.opacity, 1.0);

    Some(DisplayLayer {
        image,
        from_xy,
        from_size,
        to_xy,
        to_size,
        opacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::RealClocks;
    use crate::core::spline::linear_segment;
    use crate::display::headless::{HeadlessDriver, HeadlessScreen};
    use crate::media::synth::{SynthConfig, SynthDecoder};
    use crate::script::data::parse_script;
    use std::time::Duration;

    fn test_context(driver: Arc<HeadlessDriver>, duration: f64) -> RunnerContext {
        let clocks: Arc<dyn Clocks> = Arc::new(RealClocks);
        let cfg = SynthConfig { duration, ..Default::default() };
        let factory: DecoderFactory = Arc::new(move |path| {
            Ok(Box::new(SynthDecoder::new(&path.to_string_lossy(), cfg))
                as Box<dyn crate::media::decoder::MediaDecoder>)
        });
        RunnerContext {
            driver,
            clocks: Arc::new(RealClocks),
            decoder_factory: factory,
            notify: Some(Arc::new(Flag::new(clocks))),
        }
    }

    fn small_screen_driver() -> Arc<HeadlessDriver> {
        Arc::new(HeadlessDriver::new(vec![HeadlessScreen {
            connector: "HDMI-1".to_string(),
            size: XY::new(640, 360),
            hz: 60,
        }]))
    }

    fn one_layer_script(start: f64, play_span: f64) -> Script {
        let mut script = parse_script(
            r#"{"screens": {"HDMI": {"mode": [640, 360], "layers": [
                {"media": {"file": "clip.synth", "buffer": 0.5}}
            ]}}}"#,
        )
        .unwrap();
        let layer = &mut script.screens.get_mut("HDMI").unwrap().layers[0];
        layer.media.play = BezierSpline {
            segments: vec![linear_segment(
                Interval::new(start, start + play_span),
                Interval::new(0.0, play_span),
            )],
            repeat: 0.0,
        };
        script
    }

    #[test]
    fn test_playback_reaches_the_screen() {
        let driver = small_screen_driver();
        let clocks = RealClocks;
        let mut runner = ScriptRunner::new(test_context(Arc::clone(&driver), 60.0)).unwrap();

        let script = one_layer_script(clocks.monotonic(), 30.0);
        let deadline = clocks.monotonic() + 5.0;
        let mut with_layers = 0;
        while clocks.monotonic() < deadline && with_layers == 0 {
            runner.update(&script);
            std::thread::sleep(Duration::from_millis(33));
            with_layers = driver
                .presented()
                .iter()
                .filter(|p| !p.frame.layers.is_empty())
                .count();
        }

        assert!(driver.present_count() >= 1, "nothing reached the screen");
        assert!(with_layers > 0, "all presented frames were empty");
        assert_eq!(runner.status().screens.len(), 1);
        assert_eq!(runner.status().media.len(), 1);
    }

    #[test]
    fn test_done_when_play_range_passes_duration() {
        let driver = small_screen_driver();
        let clocks = RealClocks;
        let mut runner = ScriptRunner::new(test_context(driver, 0.2)).unwrap();

        // Play curve maps far past the 0.2s media; "done" arrives once the
        // remaining range starts at or past the duration.
        let start = clocks.monotonic() - 1.0;
        let script = one_layer_script(start, 2.0);

        let deadline = clocks.monotonic() + 5.0;
        let mut done = false;
        while clocks.monotonic() < deadline {
            done = runner.update(&script);
            if done {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(done);
    }

    #[test]
    fn test_unreferenced_loaders_are_dropped() {
        let driver = small_screen_driver();
        let clocks = RealClocks;
        let mut runner = ScriptRunner::new(test_context(driver, 60.0)).unwrap();

        let script = one_layer_script(clocks.monotonic(), 30.0);
        runner.update(&script);
        assert_eq!(runner.status().media.len(), 1);

        let empty = Script::default();
        runner.update(&empty);
        assert!(runner.status().media.is_empty());
        assert!(runner.status().screens.is_empty());
    }

    #[test]
    fn test_standby_keeps_file_warm_without_holding_done() {
        let driver = small_screen_driver();
        let clocks = RealClocks;
        let mut runner = ScriptRunner::new(test_context(driver, 60.0)).unwrap();

        let mut script = Script::default();
        script.standbys.push(ScriptMedia {
            file: "warm.synth".to_string(),
            play: BezierSpline {
                segments: vec![linear_segment(
                    Interval::new(clocks.monotonic(), clocks.monotonic() + 60.0),
                    Interval::new(0.0, 60.0),
                )],
                repeat: 0.0,
            },
            buffer: 0.2,
            decoder_idle_time: 1.0,
            seek_scan_time: 1.0,
        });

        let done = runner.update(&script);
        assert!(done, "standby-only script should count as done");
        assert_eq!(runner.status().media.len(), 1, "standby loader missing");
    }

    #[test]
    fn test_screen_matching_and_mode_choice() {
        let driver = Arc::new(HeadlessDriver::new(vec![
            HeadlessScreen {
                connector: "HDMI-1".to_string(),
                size: XY::new(1920, 1080),
                hz: 60,
            },
            HeadlessScreen {
                connector: "DP-2".to_string(),
                size: XY::new(1280, 720),
                hz: 30,
            },
        ]));
        let runner = ScriptRunner::new(test_context(driver, 60.0)).unwrap();

        assert_eq!(runner.match_screen("DP").unwrap().connector, "DP-2");
        assert_eq!(runner.match_screen("*").unwrap().connector, "HDMI-1");
        assert!(runner.match_screen("VGA").is_none());

        let status = runner.match_screen("DP").unwrap();
        let scripted = parse_script(r#"{"screens": {"DP": {"mode": [1280, 720]}}}"#)
            .unwrap();
        let screen = scripted.screens.get("DP").unwrap().clone();
        assert_eq!(choose_mode(&status, &screen), DisplayMode::new(XY::new(1280, 720), 30));

        // Unknown size synthesizes a mode at the fallback rate.
        let odd = parse_script(r#"{"screens": {"DP": {"mode": [800, 600]}}}"#).unwrap();
        let odd_screen = odd.screens.get("DP").unwrap().clone();
        assert_eq!(choose_mode(&status, &odd_screen), DisplayMode::new(XY::new(800, 600), 60));
    }

    #[test]
    fn test_file_info_not_found_is_typed() {
        let driver = small_screen_driver();
        let factory: DecoderFactory = Arc::new(|path| {
            Err(MediaError::NotFound(path.to_path_buf()))
        });
        let clocks: Arc<dyn Clocks> = Arc::new(RealClocks);
        let mut runner = ScriptRunner::new(RunnerContext {
            driver,
            clocks,
            decoder_factory: factory,
            notify: None,
        })
        .unwrap();

        let err = runner.file_info("missing.mp4").unwrap_err();
        assert!(err.is_not_found());
    }
}
