use super::{normalize_or, perp_left, Point2d, Pose, Vector2d};
use cgmath::prelude::*;

/// A piecewise-linear curve with an arc-length prefix table.
///
/// Lane centerlines are polylines; all longitudinal coordinates in the
/// simulation are arc lengths along them.
#[derive(Clone, Debug, Default)]
pub struct Polyline {
    points: Vec<Point2d>,
    prefix_len: Vec<f64>,
    total_len: f64,
}

impl Polyline {
    pub fn new(points: Vec<Point2d>) -> Self {
        let mut polyline = Self::default();
        polyline.set_points(points);
        polyline
    }

    pub fn set_points(&mut self, points: Vec<Point2d>) {
        self.points = points;
        self.recompute_lengths();
    }

    pub fn points(&self) -> &[Point2d] {
        &self.points
    }

    /// Total arc length in m. Degenerate polylines (fewer than two points)
    /// have length 0.
    pub fn length(&self) -> f64 {
        self.total_len
    }

    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 2
    }

    fn recompute_lengths(&mut self) {
        self.prefix_len.clear();
        self.total_len = 0.0;
        if self.points.len() < 2 {
            self.prefix_len.push(0.0);
            return;
        }
        self.prefix_len.reserve(self.points.len());
        self.prefix_len.push(0.0);
        for pair in self.points.windows(2) {
            self.total_len += (pair[1] - pair[0]).magnitude();
            self.prefix_len.push(self.total_len);
        }
    }

    /// Samples the position and unit tangent at arc length `s`.
    ///
    /// `s` is clamped to `[0, length]`; ties at segment joins resolve to the
    /// lower-index segment.
    pub fn sample(&self, s: f64) -> (Point2d, Vector2d) {
        if self.points.len() < 2 {
            let p = self.points.first().copied().unwrap_or(Point2d::new(0.0, 0.0));
            return (p, Vector2d::new(1.0, 0.0));
        }
        let s = s.clamp(0.0, self.total_len);

        let seg = self
            .prefix_len
            .partition_point(|&len| len < s)
            .saturating_sub(1)
            .min(self.points.len() - 2);

        let seg_start = self.prefix_len[seg];
        let seg_len = f64::max(1e-9, self.prefix_len[seg + 1] - seg_start);
        let t = (s - seg_start) / seg_len;

        let p0 = self.points[seg];
        let p1 = self.points[seg + 1];
        let pos = p0 + (p1 - p0) * t;
        let tan = normalize_or(p1 - p0, Vector2d::new(1.0, 0.0));
        (pos, tan)
    }

    /// The unit left-perpendicular of the tangent at arc length `s`.
    pub fn normal_at(&self, s: f64) -> Vector2d {
        let (_, tan) = self.sample(s);
        normalize_or(perp_left(tan), Vector2d::new(0.0, 1.0))
    }

    /// The pose at arc length `s`, laterally displaced by `d` along the left
    /// normal, with `heading_offset` added to the tangent heading.
    pub fn pose_at(&self, s: f64, d: f64, heading_offset: f64) -> Pose {
        let (p, tan) = self.sample(s);
        let n = normalize_or(perp_left(tan), Vector2d::new(0.0, 1.0));
        let p = p + n * d;
        Pose::new(p.x, p.y, tan.y.atan2(tan.x) + heading_offset)
    }

    /// The arc-length parameter of the point on the polyline closest to `p`.
    ///
    /// Projection is exact per segment; among equally close segments the
    /// lowest index wins. Degenerate polylines project to 0.
    pub fn project_s(&self, p: Point2d) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        let mut best_s = 0.0;
        let mut best_d2 = f64::INFINITY;
        for (i, pair) in self.points.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            let ab = b - a;
            let len2 = ab.dot(ab);
            if len2 < 1e-12 {
                continue;
            }
            let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
            let proj = a + ab * t;
            let d2 = (p - proj).magnitude2();
            if d2 < best_d2 {
                best_d2 = d2;
                best_s = self.prefix_len[i] + len2.sqrt() * t;
            }
        }
        best_s
    }
}

/// Produces a polyline parallel to `points`, shifted by `offset` along the
/// left normal (positive shifts left, negative right).
///
/// Vertex normals use the incoming tangent at the last point, the outgoing
/// tangent at the first, and the normalised tangent sum at interior points.
/// Degenerate inputs are returned unchanged.
pub fn offset_polyline(points: &[Point2d], offset: f64) -> Vec<Point2d> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let mut out = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        let t_in = if i > 0 {
            normalize_or(points[i] - points[i - 1], Vector2d::new(0.0, 0.0))
        } else {
            Vector2d::new(0.0, 0.0)
        };
        let t_out = if i + 1 < points.len() {
            normalize_or(points[i + 1] - points[i], Vector2d::new(0.0, 0.0))
        } else {
            Vector2d::new(0.0, 0.0)
        };
        let tan = if i == 0 {
            t_out
        } else if i + 1 == points.len() {
            t_in
        } else {
            normalize_or(t_in + t_out, t_in)
        };
        let n = normalize_or(perp_left(tan), Vector2d::new(0.0, 1.0));
        out.push(points[i] + n * offset);
    }
    out
}

/// Evaluates the cubic Bézier with control points `p0..p3` at `t`.
pub fn cubic_bezier(p0: Point2d, p1: Point2d, p2: Point2d, p3: Point2d, t: f64) -> Point2d {
    let u = 1.0 - t;
    Point2d::from_vec(
        p0.to_vec() * (u * u * u)
            + p1.to_vec() * (3.0 * u * u * t)
            + p2.to_vec() * (3.0 * u * t * t)
            + p3.to_vec() * (t * t * t),
    )
}

/// Returns `steps + 1` points of the cubic Bézier joining `p0` to `p3`, with
/// handles `p0 + normalize(dir0) * h0` and `p3 - normalize(dir1) * h1`,
/// evaluated at evenly spaced parameter values.
pub fn bezier_connector(
    p0: Point2d,
    dir0: Vector2d,
    p3: Point2d,
    dir1: Vector2d,
    h0: f64,
    h1: f64,
    steps: usize,
) -> Vec<Point2d> {
    let n0 = normalize_or(dir0, Vector2d::new(1.0, 0.0));
    let n1 = normalize_or(dir1, Vector2d::new(1.0, 0.0));
    let p1 = p0 + n0 * h0;
    let p2 = p3 - n1 * h1;
    (0..=steps)
        .map(|i| cubic_bezier(p0, p1, p2, p3, i as f64 / steps as f64))
        .collect()
}
