//! Play script data model and JSON parsing.
//!
//! A script describes, per screen, a display mode and an ordered stack of
//! layers, each animated by Bezier splines; plus a standby list of files to
//! keep warm. Spline values accept several JSON shapes:
//!
//! - a plain number: constant from t=0 onward
//! - a segment object: `{"t": [b, e], "x": [x0, p1, p2, x1]}` where `x`
//!   may also be a number (constant) or a pair (linear), and `t` may be a
//!   single number (meaning `[b, inf)`)
//! - an array of segment objects
//! - `{"segments": [...], "repeat": period}` for periodic curves
//!
//! Times with magnitude below 1e7 are treated as relative to the start
//! instant and shifted by [`fix_relative_times`] before playback.

use crate::core::geom::XY;
use crate::core::interval::Interval;
use crate::core::spline::{linear_segment, BezierSegment, BezierSpline};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// Timestamps at or above this magnitude are absolute epoch seconds;
/// anything smaller is relative to the start instant.
pub const RELATIVE_TIME_LIMIT: f64 = 1e7;

fn default_buffer() -> f64 {
    0.2
}

fn default_decoder_idle_time() -> f64 {
    1.0
}

fn default_seek_scan_time() -> f64 {
    1.0
}

fn default_main_loop_hz() -> f64 {
    30.0
}

fn default_opacity() -> BezierSpline {
    BezierSpline::constant(1.0)
}

/// A media file with its play curve (presentation time -> source time) and
/// per-file tuning knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptMedia {
    pub file: String,
    #[serde(default, deserialize_with = "deserialize_spline")]
    pub play: BezierSpline,
    /// How far ahead of now to keep frames decoded, in seconds.
    #[serde(default = "default_buffer")]
    pub buffer: f64,
    #[serde(default = "default_decoder_idle_time")]
    pub decoder_idle_time: f64,
    #[serde(default = "default_seek_scan_time")]
    pub seek_scan_time: f64,
}

/// One item to composite onto a screen, bottom to top in script order.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptLayer {
    pub media: ScriptMedia,
    /// Source crop origin and size, in media pixels.
    #[serde(default, deserialize_with = "deserialize_spline_xy")]
    pub from_xy: XY<BezierSpline>,
    #[serde(default, deserialize_with = "deserialize_spline_xy")]
    pub from_size: XY<BezierSpline>,
    /// Destination origin and size, in screen pixels.
    #[serde(default, deserialize_with = "deserialize_spline_xy")]
    pub to_xy: XY<BezierSpline>,
    #[serde(default, deserialize_with = "deserialize_spline_xy")]
    pub to_size: XY<BezierSpline>,
    #[serde(default = "default_opacity", deserialize_with = "deserialize_spline")]
    pub opacity: BezierSpline,
}

/// What to render on one screen.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptScreen {
    pub mode: XY<i32>,
    #[serde(default)]
    pub mode_hz: Option<i32>,
    #[serde(default)]
    pub layers: Vec<ScriptLayer>,
}

/// A parsed play script: screens by connector name, standby files to keep
/// warm, and the tick rate of the main loop.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub screens: BTreeMap<String, ScriptScreen>,
    #[serde(default)]
    pub standbys: Vec<ScriptMedia>,
    #[serde(default = "default_main_loop_hz")]
    pub main_loop_hz: f64,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            screens: BTreeMap::new(),
            standbys: Vec::new(),
            main_loop_hz: default_main_loop_hz(),
        }
    }
}

impl Script {
    /// All media files the script references, layers and standbys alike.
    pub fn referenced_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self
            .screens
            .values()
            .flat_map(|s| s.layers.iter().map(|l| l.media.file.as_str()))
            .chain(self.standbys.iter().map(|s| s.file.as_str()))
            .collect();
        files.sort_unstable();
        files.dedup();
        files
    }
}

/// Parses a script from JSON text. Times are left as written; call
/// [`fix_relative_times`] before handing the script to the runner.
pub fn parse_script(text: &str) -> Result<Script, serde_json::Error> {
    serde_json::from_str(text)
}

/// Shifts every relative timestamp (magnitude < 1e7) by `start`, anchoring
/// the script to a concrete start instant on the monotonic clock.
pub fn fix_relative_times(script: &mut Script, start: f64) {
    for screen in script.screens.values_mut() {
        for layer in &mut screen.layers {
            fix_spline(&mut layer.media.play, start);
            fix_spline_xy(&mut layer.from_xy, start);
            fix_spline_xy(&mut layer.from_size, start);
            fix_spline_xy(&mut layer.to_xy, start);
            fix_spline_xy(&mut layer.to_size, start);
            fix_spline(&mut layer.opacity, start);
        }
    }
    for standby in &mut script.standbys {
        fix_spline(&mut standby.play, start);
    }
}

fn fix_spline(spline: &mut BezierSpline, start: f64) {
    for seg in &mut spline.segments {
        if seg.t.begin < RELATIVE_TIME_LIMIT {
            seg.t.begin += start;
        }
        if seg.t.end < RELATIVE_TIME_LIMIT {
            seg.t.end += start;
        }
    }
}

fn fix_spline_xy(xy: &mut XY<BezierSpline>, start: f64) {
    fix_spline(&mut xy.x, start);
    fix_spline(&mut xy.y, start);
}

//
// Spline JSON forms
//

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRepr {
    Point(f64),
    Range([f64; 2]),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueRepr {
    Constant(f64),
    Linear([f64; 2]),
    Cubic([f64; 4]),
}

impl Default for ValueRepr {
    fn default() -> Self {
        ValueRepr::Constant(0.0)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SegmentRepr {
    t: TimeRepr,
    #[serde(default)]
    x: ValueRepr,
}

impl SegmentRepr {
    fn into_segment(self) -> BezierSegment {
        let t = match self.t {
            TimeRepr::Point(b) => Interval::new(b, f64::INFINITY),
            TimeRepr::Range([b, e]) => Interval::new(b, e),
        };
        match self.x {
            ValueRepr::Constant(x) => linear_segment(t, Interval::new(x, x)),
            ValueRepr::Linear([x0, x1]) => linear_segment(t, Interval::new(x0, x1)),
            ValueRepr::Cubic([begin_x, p1_x, p2_x, end_x]) => BezierSegment {
                t,
                begin_x,
                p1_x,
                p2_x,
                end_x,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SplineRepr {
    Constant(f64),
    Segment(SegmentRepr),
    Segments(Vec<SegmentRepr>),
    Repeating {
        segments: Vec<SegmentRepr>,
        #[serde(default)]
        repeat: f64,
    },
}

fn build_spline<E: DeError>(repr: SplineRepr) -> Result<BezierSpline, E> {
    let (segment_reprs, repeat) = match repr {
        SplineRepr::Constant(x) => return Ok(BezierSpline::constant(x)),
        SplineRepr::Segment(seg) => (vec![seg], 0.0),
        SplineRepr::Segments(segs) => (segs, 0.0),
        SplineRepr::Repeating { segments, repeat } => (segments, repeat),
    };

    let mut segments: Vec<BezierSegment> = segment_reprs
        .into_iter()
        .map(SegmentRepr::into_segment)
        .collect();
    segments.sort_by(|a, b| a.t.begin.total_cmp(&b.t.begin));

    for seg in &segments {
        if seg.t.begin > seg.t.end {
            return Err(E::custom(format!(
                "spline segment runs backwards: {}..{}",
                seg.t.begin, seg.t.end
            )));
        }
    }
    for pair in segments.windows(2) {
        if pair[1].t.begin < pair[0].t.end {
            return Err(E::custom(format!(
                "spline segments overlap at t={}",
                pair[1].t.begin
            )));
        }
    }
    if repeat < 0.0 {
        return Err(E::custom("spline repeat must be positive"));
    }

    Ok(BezierSpline { segments, repeat })
}

fn deserialize_spline<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BezierSpline, D::Error> {
    build_spline(SplineRepr::deserialize(deserializer)?)
}

fn deserialize_spline_xy<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<XY<BezierSpline>, D::Error> {
    let (x, y) = <(SplineRepr, SplineRepr)>::deserialize(deserializer)?;
    Ok(XY::new(build_spline(x)?, build_spline(y)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_script() {
        let script = parse_script(
            r#"{
                "screens": {
                    "HDMI-1": {
                        "mode": [1920, 1080],
                        "layers": [
                            {"media": {"file": "intro.mp4", "play": {"t": [0, 60], "x": [0, 60]}}}
                        ]
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(script.main_loop_hz, 30.0);
        let screen = &script.screens["HDMI-1"];
        assert_eq!(screen.mode, XY::new(1920, 1080));
        assert_eq!(screen.mode_hz, None);
        let layer = &screen.layers[0];
        assert_eq!(layer.media.file, "intro.mp4");
        assert_eq!(layer.media.buffer, 0.2);
        assert_eq!(layer.media.play.value_at(30.0), Some(30.0));
        // Defaults: opacity 1 everywhere, geometry splines empty.
        assert_eq!(layer.opacity.value_at(10.0), Some(1.0));
        assert!(layer.to_size.x.is_empty());
    }

    #[test]
    fn test_spline_forms() {
        // Plain number.
        let constant: Script = parse_script(
            r#"{"standbys": [{"file": "a.mp4", "play": 5.0}]}"#,
        )
        .unwrap();
        assert_eq!(constant.standbys[0].play.value_at(100.0), Some(5.0));

        // Single segment with point time (open-ended).
        let open: Script = parse_script(
            r#"{"standbys": [{"file": "a.mp4", "play": {"t": 2, "x": 3}}]}"#,
        )
        .unwrap();
        assert_eq!(open.standbys[0].play.value_at(1.0), None);
        assert_eq!(open.standbys[0].play.value_at(1e6), Some(3.0));

        // Array of segments plus repeat wrapper.
        let repeating: Script = parse_script(
            r#"{"standbys": [{"file": "a.mp4", "play": {
                "segments": [{"t": [0, 2], "x": [0, 2]}],
                "repeat": 3
            }}]}"#,
        )
        .unwrap();
        let play = &repeating.standbys[0].play;
        assert_eq!(play.repeat, 3.0);
        assert!((play.value_at(0.5).unwrap() - 0.5).abs() < 1e-9);
        assert!((play.value_at(3.5).unwrap() - 0.5).abs() < 1e-9);

        // Full cubic control values.
        let cubic: Script = parse_script(
            r#"{"standbys": [{"file": "a.mp4", "play": {"t": [1, 4], "x": [10, 20, 30, 40]}}]}"#,
        )
        .unwrap();
        assert_eq!(cubic.standbys[0].play.value_at(2.5), Some(25.0));
    }

    #[test]
    fn test_bad_splines_are_rejected() {
        assert!(parse_script(
            r#"{"standbys": [{"file": "a.mp4", "play": {"t": [4, 1], "x": 0}}]}"#
        )
        .is_err());
        assert!(parse_script(
            r#"{"standbys": [{"file": "a.mp4", "play": [
                {"t": [0, 5], "x": 0}, {"t": [3, 8], "x": 1}
            ]}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_fix_relative_times() {
        let mut script = parse_script(
            r#"{
                "screens": {"*": {"mode": [640, 360], "layers": [
                    {"media": {"file": "a.mp4", "play": {"t": [0, 10], "x": [0, 10]}},
                     "opacity": {"t": [2000000000, 2000000010], "x": 1}}
                ]}}
            }"#,
        )
        .unwrap();

        fix_relative_times(&mut script, 1000.0);
        let layer = &script.screens["*"].layers[0];
        // Relative play times shifted by the start instant.
        assert_eq!(layer.media.play.segments[0].t, Interval::new(1000.0, 1010.0));
        assert!((layer.media.play.value_at(1005.0).unwrap() - 5.0).abs() < 1e-9);
        // Absolute times (epoch-scale) left alone.
        assert_eq!(
            layer.opacity.segments[0].t,
            Interval::new(2_000_000_000.0, 2_000_000_010.0)
        );
    }

    #[test]
    fn test_referenced_files_dedupes() {
        let script = parse_script(
            r#"{
                "screens": {"*": {"mode": [640, 360], "layers": [
                    {"media": {"file": "a.mp4"}},
                    {"media": {"file": "b.mp4"}},
                    {"media": {"file": "a.mp4"}}
                ]}},
                "standbys": [{"file": "c.mp4"}]
            }"#,
        )
        .unwrap();
        assert_eq!(script.referenced_files(), vec!["a.mp4", "b.mp4", "c.mp4"]);
    }
}
