//! Piecewise cubic Bezier curves parameterized on time.
//!
//! Every time-varying quantity in a play script (source position, layer
//! geometry, opacity) is one of these. Splines can be evaluated pointwise
//! and bounded over a time range; the range form feeds the interval-set
//! algebra that decides which source frames are worth decoding.

use crate::core::interval::{Interval, IntervalSet};

/// A 1-D cubic Bezier segment: four control values over a time interval.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BezierSegment {
    pub t: Interval,
    pub begin_x: f64,
    pub p1_x: f64,
    pub p2_x: f64,
    pub end_x: f64,
}

impl BezierSegment {
    /// Evaluates the cubic at `t`, which must lie within the segment.
    fn value_at(&self, t: f64) -> f64 {
        let t_len = self.t.end - self.t.begin;
        assert!(
            t_len >= 0.0,
            "bad Bezier segment: bt={} > et={}",
            self.t.begin,
            self.t.end
        );
        assert!(
            self.t.begin <= t && t <= self.t.end,
            "bad Bezier eval: bt={} t={} et={}",
            self.t.begin,
            t,
            self.t.end
        );

        if t_len <= 0.0 {
            return 0.5 * (self.begin_x + self.end_x);
        }
        let f = (t - self.t.begin) / t_len;
        let nf = 1.0 - f;
        self.begin_x
            + 3.0 * nf * nf * f * (self.p1_x - self.begin_x)
            + 3.0 * nf * f * f * (self.p2_x - self.begin_x)
            + f * f * f * (self.end_x - self.begin_x)
    }
}

/// A segment whose value moves linearly from `x.begin` to `x.end` over `t`.
pub fn linear_segment(t: Interval, x: Interval) -> BezierSegment {
    let third = (x.end - x.begin) / 3.0;
    BezierSegment {
        t,
        begin_x: x.begin,
        p1_x: x.begin + third,
        p2_x: x.end - third,
        end_x: x.end,
    }
}

/// Piecewise-cubic Bezier curve, optionally periodic.
///
/// Segments are distinct and increasing in `t`. A zero `repeat` means
/// non-repeating; a positive `repeat` makes the curve periodic starting at
/// the first segment's begin time. Gaps between segments stay undefined.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BezierSpline {
    pub segments: Vec<BezierSegment>,
    pub repeat: f64,
}

impl BezierSpline {
    /// A spline that holds `x` forever, starting at t=0.
    pub fn constant(x: f64) -> Self {
        BezierSpline {
            segments: vec![linear_segment(
                Interval::new(0.0, f64::INFINITY),
                Interval::new(x, x),
            )],
            repeat: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns f(t), or None below the first segment or inside a gap.
    pub fn value_at(&self, t: f64) -> Option<f64> {
        let first = self.segments.first()?;
        let begin = first.t.begin;
        if t < begin {
            return None;
        }

        let mut t = t;
        if self.repeat > 0.0 {
            t = (t - begin) % self.repeat + begin;
        }

        // Last segment starting at or before t.
        let idx = self.segments.partition_point(|s| s.t.begin <= t);
        if idx == 0 {
            return None;
        }
        let seg = &self.segments[idx - 1];
        debug_assert!(t >= seg.t.begin);
        if t > seg.t.end {
            return None;
        }
        Some(seg.value_at(t))
    }

    /// Min/max of f over `[t.begin, t.end]`, one output interval per
    /// contiguous defined stretch (neighboring value ranges merge).
    pub fn range_over(&self, mut t: Interval) -> IntervalSet {
        let mut out = IntervalSet::new();
        let Some(first) = self.segments.first() else {
            return out;
        };
        let begin = first.t.begin;
        t.begin = t.begin.max(begin);
        let len = t.end - t.begin;
        if len < 0.0 {
            return out;
        }

        if self.repeat <= 0.0 {
            self.add_minmax_nowrap(t.begin, t.end, &mut out);
        } else if len >= self.repeat {
            self.add_minmax_nowrap(begin, begin + self.repeat, &mut out);
        } else {
            let mut r_begin = (t.begin - begin) % self.repeat;
            if r_begin < 0.0 {
                r_begin += self.repeat;
            }
            let r_end = self.repeat.min(r_begin + len);
            self.add_minmax_nowrap(begin + r_begin, begin + r_end, &mut out);

            let wrap_t = r_begin + len - r_end;
            if wrap_t > 0.0 {
                self.add_minmax_nowrap(begin, begin + wrap_t, &mut out);
            }
        }
        out
    }

    fn add_minmax_nowrap(&self, t_begin: f64, t_end: f64, out: &mut IntervalSet) {
        let segs = &self.segments;
        let mut idx = segs.partition_point(|s| s.t.begin <= t_begin);
        if idx > 0 {
            idx -= 1;
        }
        let end_idx = segs.partition_point(|s| s.t.begin <= t_end);

        for s in &segs[idx..end_idx] {
            let seg_t_begin = s.t.begin.max(t_begin);
            let seg_t_end = s.t.end.min(t_end);
            if seg_t_begin > seg_t_end {
                continue;
            }

            let begin_x = s.value_at(seg_t_begin);
            let end_x = s.value_at(seg_t_end);
            let mut min_x = begin_x.min(end_x);
            let mut max_x = begin_x.max(end_x);

            // Interior extrema: roots of the quadratic derivative.
            // See https://pomax.github.io/bezierinfo/#extremities
            let a = 3.0 * (-s.begin_x + 3.0 * (s.p1_x - s.p2_x) + s.end_x);
            let b = 6.0 * (s.begin_x - 2.0 * s.p1_x + s.p2_x);
            let c = 3.0 * (s.p1_x - s.begin_x);
            let d = b * b - 4.0 * a * c;

            if d >= 0.0 {
                let t_len = s.t.end - s.t.begin;
                let sqrt_d = d.sqrt();

                let root_a_t = s.t.begin + t_len * (-b - sqrt_d) / (2.0 * a);
                if root_a_t >= seg_t_begin && root_a_t <= seg_t_end {
                    let root_a_x = s.value_at(root_a_t);
                    min_x = min_x.min(root_a_x);
                    max_x = max_x.max(root_a_x);
                }

                let root_b_t = s.t.begin + t_len * (-b + sqrt_d) / (2.0 * a);
                if root_b_t >= seg_t_begin && root_b_t <= seg_t_end {
                    let root_b_x = s.value_at(root_b_t);
                    min_x = min_x.min(root_b_x);
                    max_x = max_x.max(root_b_x);
                }
            }

            out.insert(Interval::new(min_x, max_x));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * b.abs().max(1.0)
    }

    fn approx_pct(a: f64, b: f64, pct: f64) -> bool {
        (a - b).abs() <= pct * b.abs().max(1.0)
    }

    fn three_segment_spline() -> BezierSpline {
        BezierSpline {
            segments: vec![
                BezierSegment {
                    t: Interval::new(1.0, 4.0),
                    begin_x: 10.0,
                    p1_x: 20.0,
                    p2_x: 30.0,
                    end_x: 40.0,
                },
                BezierSegment {
                    t: Interval::new(5.0, 8.0),
                    begin_x: 10.0,
                    p1_x: 30.0,
                    p2_x: 50.0,
                    end_x: 40.0,
                },
                BezierSegment {
                    t: Interval::new(11.0, f64::INFINITY),
                    begin_x: 50.0,
                    p1_x: 60.0,
                    p2_x: 70.0,
                    end_x: 80.0,
                },
            ],
            repeat: 0.0,
        }
    }

    #[test]
    fn test_value_at_non_repeating() {
        let bz = three_segment_spline();

        assert_eq!(bz.value_at(0.9), None);
        assert!(approx(bz.value_at(1.0).unwrap(), 10.0));
        assert!(approx(bz.value_at(1.1).unwrap(), 11.0));
        assert!(approx(bz.value_at(2.5).unwrap(), 25.0));
        assert!(approx(bz.value_at(3.9).unwrap(), 39.0));
        assert!(approx(bz.value_at(4.0).unwrap(), 40.0));
        assert_eq!(bz.value_at(4.1), None);

        assert_eq!(bz.value_at(4.9), None);
        assert!(approx(bz.value_at(5.0).unwrap(), 10.0));
        assert!(approx_pct(bz.value_at(5.1).unwrap(), 12.0, 0.01));
        assert!(approx(bz.value_at(6.5).unwrap(), 36.25));
        assert!(approx_pct(bz.value_at(7.9).unwrap(), 40.9, 0.01));
        assert!(approx(bz.value_at(8.0).unwrap(), 40.0));
        assert_eq!(bz.value_at(8.1), None);

        assert_eq!(bz.value_at(10.9), None);
        assert!(approx(bz.value_at(11.0).unwrap(), 50.0));
        assert!(approx(bz.value_at(1.1e7).unwrap(), 50.0));
    }

    #[test]
    fn test_value_at_repeating() {
        let mut bz = three_segment_spline();
        bz.segments.truncate(2);
        bz.repeat = 5.0;

        assert!(approx(bz.value_at(1.0).unwrap(), 10.0));
        assert!(approx(bz.value_at(2.5).unwrap(), 25.0));
        assert!(approx(bz.value_at(4.0).unwrap(), 40.0));
        assert_eq!(bz.value_at(4.1), None);

        assert_eq!(bz.value_at(4.9), None);
        assert!(approx(bz.value_at(5.0).unwrap(), 10.0));
        assert!(approx_pct(bz.value_at(5.9).unwrap(), 27.19, 0.001));

        // Periodicity over the repeat window, avoiding hairline boundaries.
        let mut t = 1.0;
        while t < 6.0 {
            if t > 4.0 && t < 5.0 {
                assert_eq!(bz.value_at(t), None, "t={}", t);
                assert_eq!(bz.value_at(t + 5.0), None, "t={}", t);
                assert_eq!(bz.value_at(t + 10.0), None, "t={}", t);
            } else {
                let x = bz.value_at(t).unwrap();
                assert_eq!(bz.value_at(t - 10.0), None, "t={}", t);
                assert_eq!(bz.value_at(t - 5.0), None, "t={}", t);
                assert!(approx(bz.value_at(t + 5.0).unwrap(), x), "t={}", t);
                assert!(approx(bz.value_at(t + 10.0).unwrap(), x), "t={}", t);
            }
            t += 0.0999;
        }
    }

    #[test]
    fn test_segment_endpoints() {
        let bz = three_segment_spline();
        for seg in &bz.segments {
            assert!(approx(bz.value_at(seg.t.begin).unwrap(), seg.begin_x));
            if seg.t.end.is_finite() {
                assert!(approx(bz.value_at(seg.t.end).unwrap(), seg.end_x));
            }
        }
    }

    #[test]
    fn test_degenerate_segment_is_midpoint() {
        let bz = BezierSpline {
            segments: vec![BezierSegment {
                t: Interval::new(2.0, 2.0),
                begin_x: 10.0,
                p1_x: 0.0,
                p2_x: 100.0,
                end_x: 30.0,
            }],
            repeat: 0.0,
        };
        assert!(approx(bz.value_at(2.0).unwrap(), 20.0));
    }

    #[test]
    fn test_range_over_brackets_sampled_values() {
        let bz = BezierSpline {
            segments: vec![
                BezierSegment {
                    t: Interval::new(-2.0, 2.0),
                    begin_x: 10.0,
                    p1_x: -10.0,
                    p2_x: 50.0,
                    end_x: 40.0,
                },
                BezierSegment {
                    t: Interval::new(2.0, 6.0),
                    begin_x: 40.0,
                    p1_x: 30.0,
                    p2_x: 20.0,
                    end_x: 10.0,
                },
            ],
            repeat: 0.0,
        };

        let mut t_begin = -2.5;
        while t_begin < 6.5 {
            let mut t_end = t_begin - 0.5;
            while t_end < 7.0 {
                let minmax = bz.range_over(Interval::new(t_begin, t_end));
                if t_end < -2.0 || t_begin > 6.0 || t_end < t_begin {
                    assert!(minmax.is_empty(), "[{}, {}]", t_begin, t_end);
                } else {
                    assert_eq!(minmax.len(), 1, "[{}, {}]", t_begin, t_end);
                    let mut min = 100.0f64;
                    let mut max = -100.0f64;
                    let mut t = t_begin;
                    while t <= t_end {
                        if let Some(x) = bz.value_at(t) {
                            min = min.min(x);
                            max = max.max(x);
                        }
                        t += 0.00999;
                    }

                    let mm = minmax.iter().next().unwrap();
                    assert!(
                        approx_pct(mm.begin, min, 0.1),
                        "[{}, {}]: {} vs {}",
                        t_begin,
                        t_end,
                        mm.begin,
                        min
                    );
                    assert!(
                        approx_pct(mm.end, max, 0.1),
                        "[{}, {}]: {} vs {}",
                        t_begin,
                        t_end,
                        mm.end,
                        max
                    );
                }
                t_end += 0.1999;
            }
            t_begin += 0.1999;
        }
    }

    #[test]
    fn test_range_over_repeating_covers_period() {
        let mut bz = three_segment_spline();
        bz.segments.truncate(2);
        bz.repeat = 5.0;

        // Longer than a period: the whole period's range.
        let full = bz.range_over(Interval::new(100.0, 120.0));
        assert!(!full.is_empty());
        let b = full.bounds();
        assert!(approx_pct(b.begin, 10.0, 0.01));
        // The second segment overshoots 40 on its way (p2 = 50).
        assert!(b.end >= 40.0);

        // Shorter than a period wraps into at most two windows.
        let wrapped = bz.range_over(Interval::new(9.5, 11.5));
        assert!(!wrapped.is_empty());
        for iv in wrapped.iter() {
            assert!(iv.begin >= 10.0 - 1.0 && iv.end <= 50.0 + 1.0);
        }
    }

    #[test]
    fn test_linear_segment_interpolates() {
        let seg = linear_segment(Interval::new(0.0, 10.0), Interval::new(0.0, 100.0));
        let bz = BezierSpline { segments: vec![seg], repeat: 0.0 };
        for i in 0..=10 {
            let t = i as f64;
            assert!(approx(bz.value_at(t).unwrap(), t * 10.0), "t={}", t);
        }
    }

    #[test]
    fn test_constant_spline() {
        let bz = BezierSpline::constant(7.5);
        assert_eq!(bz.value_at(-1.0), None);
        assert!(approx(bz.value_at(0.0).unwrap(), 7.5));
        assert!(approx(bz.value_at(1e9).unwrap(), 7.5));
    }
}
