//! Mathematical structs and functions.

use cgmath::{Point2, Vector2};
use serde::{Deserialize, Serialize};

pub use polyline::*;

mod polyline;

/// A 2D point
pub type Point2d = Point2<f64>;

/// A 2D vector
pub type Vector2d = Vector2<f64>;

/// A position and heading in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, counter-clockwise from the positive x-axis.
    pub theta: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    /// The position component of the pose.
    pub fn position(&self) -> Point2d {
        Point2d::new(self.x, self.y)
    }
}

/// Rotates a vector 90 degrees counter-clockwise, yielding the left normal.
pub fn perp_left(v: Vector2d) -> Vector2d {
    Vector2d::new(-v.y, v.x)
}

/// Normalises a vector, falling back to `fallback` for near-zero input.
pub fn normalize_or(v: Vector2d, fallback: Vector2d) -> Vector2d {
    let mag = (v.x * v.x + v.y * v.y).sqrt();
    if mag > 1e-9 {
        v / mag
    } else {
        fallback
    }
}

/// The signed difference `b - a` between two angles, normalised to [-pi, pi].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut d = (b - a) % TAU;
    if d < -PI {
        d += TAU;
    } else if d > PI {
        d -= TAU;
    }
    d
}

/// Linear interpolation between `a` and `b`.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// The cubic smoothstep `3t^2 - 2t^3`, clamped to [0, 1].
pub fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    #[test]
    fn angle_diff_wraps() {
        assert_approx_eq!(angle_diff(0.0, 0.5), 0.5);
        assert_approx_eq!(angle_diff(0.5, 0.0), -0.5);
        assert_approx_eq!(angle_diff(-3.0, 3.0), -(2.0 * PI - 6.0));
        assert_approx_eq!(angle_diff(3.0, -3.0), 2.0 * PI - 6.0);
        assert_approx_eq!(angle_diff(0.0, PI).abs(), PI);
    }

    #[test]
    fn perp_left_rotates_ccw() {
        let n = perp_left(Vector2d::new(1.0, 0.0));
        assert_approx_eq!(n.x, 0.0);
        assert_approx_eq!(n.y, 1.0);
    }

    #[test]
    fn smoothstep_endpoints() {
        assert_approx_eq!(smoothstep(0.0), 0.0);
        assert_approx_eq!(smoothstep(0.5), 0.5);
        assert_approx_eq!(smoothstep(1.0), 1.0);
        assert_approx_eq!(smoothstep(1.5), 1.0);
        assert_approx_eq!(smoothstep(-0.5), 0.0);
    }
}
