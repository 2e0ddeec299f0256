//! Value types and primitives the playback engine is built on:
//! intervals, splines, clocks, wakeup flags, coordinate pairs.

pub mod clock;
pub mod flag;
pub mod geom;
pub mod interval;
pub mod spline;

pub use clock::{global_clocks, Clocks, RealClocks, SimClocks};
pub use flag::Flag;
pub use geom::XY;
pub use interval::{Interval, IntervalSet, TimeKey};
pub use spline::{linear_segment, BezierSegment, BezierSpline};
