//! Geometry primitives: vectors, rectangles, line segments and the handful of
//! numeric routines the resolver is built on.
//!
//! Coordinates are in pixels with `y` growing downward, so "up" is `-y`.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::consts::K_ERROR;

/// 2D vector type used throughout linewalk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns the squared length of the vector (faster than `length()`).
    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Unit vector in the same direction, or zero for the zero vector.
    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len == 0.0 {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y
    }

    /// Z component of the 3D cross product.
    pub fn cross(self, rhs: Self) -> f64 {
        self.to_glam().perp_dot(rhs.to_glam())
    }

    pub fn distance(self, rhs: Self) -> f64 {
        (self - rhs).length()
    }

    pub fn lerp(self, rhs: Self, t: f64) -> Self {
        Self::new(self.x + (rhs.x - self.x) * t, self.y + (rhs.y - self.y) * t)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_glam(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }
}

impl From<DVec2> for Vec2 {
    fn from(value: DVec2) -> Self {
        Self::new(value.x, value.y)
    }
}

impl From<(f64, f64)> for Vec2 {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl std::ops::Mul<f64> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::MulAssign<f64> for Vec2 {
    fn mul_assign(&mut self, rhs: f64) {
        self.x *= rhs;
        self.y *= rhs;
    }
}

impl std::ops::Div<f64> for Vec2 {
    type Output = Self;

    fn div(self, rhs: f64) -> Self::Output {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle, `left`/`top` being the minimum corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn top_left(&self) -> Vec2 {
        Vec2::new(self.left, self.top)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.left + self.width * 0.5, self.top + self.height * 0.5)
    }

    /// Strict containment; points on the border are outside.
    pub fn contains(&self, point: Vec2) -> bool {
        point.x > self.left && point.x < self.right() && point.y > self.top && point.y < self.bottom()
    }

    /// Smallest rectangle holding both this one and `point`.
    pub fn expand_to(&self, point: Vec2) -> Self {
        let left = self.left.min(point.x);
        let top = self.top.min(point.y);
        let right = self.right().max(point.x);
        let bottom = self.bottom().max(point.y);
        Self::new(left, top, right - left, bottom - top)
    }

    /// Grows each side until the rectangle is at least `min` wide and tall.
    pub fn with_min_size(&self, min: f64) -> Self {
        let mut rv = *self;
        if rv.width < min {
            rv.left -= (min - rv.width) * 0.5;
            rv.width = min;
        }
        if rv.height < min {
            rv.top -= (min - rv.height) * 0.5;
            rv.height = min;
        }
        rv
    }

    /// Grown by `amount` on every side.
    pub fn expanded(&self, amount: f64) -> Self {
        Self::new(
            self.left - amount,
            self.top - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    pub fn corners(&self) -> [Vec2; 4] {
        let tl = self.top_left();
        [
            tl,
            tl + Vec2::new(self.width, 0.0),
            tl + Vec2::new(self.width, self.height),
            tl + Vec2::new(0.0, self.height),
        ]
    }
}

/// An ordered pair of endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineSegment {
    pub a: Vec2,
    pub b: Vec2,
}

impl LineSegment {
    pub const fn new(a: Vec2, b: Vec2) -> Self {
        Self { a, b }
    }

    pub fn length(&self) -> f64 {
        self.a.distance(self.b)
    }

    /// `b - a`
    pub fn direction(&self) -> Vec2 {
        self.b - self.a
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self::new(self.a + offset, self.b + offset)
    }
}

// ------------------------------- comparisons --------------------------------

pub fn are_very_close(a: Vec2, b: Vec2) -> bool {
    (a - b).length() < K_ERROR
}

pub fn are_very_close_f(a: f64, b: f64) -> bool {
    (a - b).abs() < K_ERROR
}

// ------------------------------ vector algebra ------------------------------

/// Projection of `v` onto the line spanned by `onto`.
pub fn project_onto(v: Vec2, onto: Vec2) -> Vec2 {
    let len_sq = onto.length_squared();
    if len_sq == 0.0 {
        return Vec2::ZERO;
    }
    onto * (v.dot(onto) / len_sq)
}

/// Unsigned angle between two vectors in `[0, π]`.
pub fn angle_between(a: Vec2, b: Vec2) -> f64 {
    a.cross(b).abs().atan2(a.dot(b))
}

pub fn rotate_vector(v: Vec2, angle: f64) -> Vec2 {
    DVec2::from_angle(angle).rotate(v.to_glam()).into()
}

/// Unit normal of `segment`.
///
/// The non-inverted normal is `a -> b` rotated by `-π/2`, which points up for
/// a segment running left to right.
pub fn normal_for(segment: &LineSegment, inverted: bool) -> Vec2 {
    let n = rotate_vector(segment.direction(), -std::f64::consts::FRAC_PI_2).normalized();
    if inverted {
        -n
    } else {
        n
    }
}

/// World location at fraction `position` along `segment`.
pub fn location_along(position: f64, segment: &LineSegment) -> Vec2 {
    segment.a + segment.direction() * position
}

/// World velocity of a body moving `speed` segments per second along `segment`.
pub fn velocity_along(speed: f64, segment: &LineSegment) -> Vec2 {
    segment.direction() * speed
}

/// Mirrors `approach` across the segment's line.
pub fn reflect_approach(segment: &LineSegment, approach: Vec2) -> Vec2 {
    let n = normal_for(segment, false);
    approach - n * (2.0 * approach.dot(n))
}

// ------------------------------ intersections -------------------------------

fn lexically_less(lhs: &LineSegment, rhs: &LineSegment) -> bool {
    let key = |s: &LineSegment| [s.a.x, s.a.y, s.b.x, s.b.y];
    key(lhs)
        .iter()
        .zip(key(rhs).iter())
        .find(|(l, r)| l != r)
        .map(|(l, r)| l < r)
        .unwrap_or(false)
}

/// Intersection point of two segments, `None` when parallel or disjoint.
///
/// The segments are put in a canonical order before solving so the result is
/// bit-for-bit identical regardless of argument order.
pub fn find_intersection(first: &LineSegment, second: &LineSegment) -> Option<Vec2> {
    let (lhs, rhs) = if lexically_less(second, first) {
        (second, first)
    } else {
        (first, second)
    };
    let p = lhs.a;
    let r = lhs.direction();
    let q = rhs.a;
    let s = rhs.direction();

    let r_cross_s = r.cross(s);
    if r_cross_s == 0.0 {
        return None;
    }
    let q_sub_p = q - p;
    let t = q_sub_p.cross(s) / r_cross_s;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let u = q_sub_p.cross(r) / r_cross_s;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let point = p + r * t;
    point.is_finite().then_some(point)
}

/// Does the motion `from -> to` cross `segment`?
pub fn intersects(segment: &LineSegment, from: Vec2, to: Vec2) -> bool {
    find_intersection(segment, &LineSegment::new(from, to)).is_some()
}

/// First intersection of `from -> to` with any edge of `rect`.
pub fn find_rect_intersection(rect: &Rect, from: Vec2, to: Vec2) -> Option<Vec2> {
    let motion = LineSegment::new(from, to);
    let [tl, tr, br, bl] = rect.corners();
    [
        LineSegment::new(tl, tr),
        LineSegment::new(tl, bl),
        LineSegment::new(br, tr),
        LineSegment::new(br, bl),
    ]
    .iter()
    .find_map(|edge| find_intersection(edge, &motion))
}

pub fn line_crosses_rect(rect: &Rect, from: Vec2, to: Vec2) -> bool {
    find_rect_intersection(rect, from, to).is_some()
}

/// Closest point on segment `a -> b` to `point`.
pub fn closest_point_to_line(a: Vec2, b: Vec2, point: Vec2) -> Vec2 {
    if a == b || a == point {
        return a;
    }
    if b == point {
        return b;
    }
    let half_pi = std::f64::consts::FRAC_PI_2;
    if angle_between(a - b, a - point) > half_pi {
        return a;
    }
    if angle_between(b - a, b - point) > half_pi {
        return b;
    }
    a + project_onto(point - a, b - a)
}

// -------------------------------- bisection ---------------------------------

/// Bisects `[0, 1]` for a monotone predicate (false then true).
///
/// Returns `(highest_false, lowest_true)`; the two differ by less than
/// [`K_ERROR`]. A predicate that is never true yields `(1, 1)`, one that is
/// always true yields `(0, 0)`.
pub fn find_smallest_diff(mut pred: impl FnMut(f64) -> bool) -> (f64, f64) {
    if !pred(1.0) {
        return (1.0, 1.0);
    }
    if pred(0.0) {
        return (0.0, 0.0);
    }
    let (mut low, mut high) = (0.0_f64, 1.0_f64);
    while high - low >= K_ERROR {
        let mid = low + (high - low) * 0.5;
        if pred(mid) {
            high = mid;
        } else {
            low = mid;
        }
    }
    (low, high)
}

pub fn find_highest_false(pred: impl FnMut(f64) -> bool) -> f64 {
    find_smallest_diff(pred).0
}

pub fn find_lowest_true(pred: impl FnMut(f64) -> bool) -> f64 {
    find_smallest_diff(pred).1
}

// --------------------------------- curves -----------------------------------

/// Evaluates the Bezier curve of `points` at `t` by repeated blending.
pub fn bezier_point(points: &[Vec2], t: f64) -> Option<Vec2> {
    match points {
        [] => None,
        [only] => Some(*only),
        _ => {
            let blended: Vec<Vec2> = points.windows(2).map(|w| w[0].lerp(w[1], t)).collect();
            bezier_point(&blended, t)
        }
    }
}

// ------------------------------ ballistics ----------------------------------

/// Launch velocities of magnitude `speed` carrying a body from `source` to
/// `target` under constant `acceleration`: `(high_arc, low_arc)`.
///
/// Components are NaN when `speed` is insufficient to reach the target.
pub fn compute_velocities_to_target(
    source: Vec2,
    target: Vec2,
    acceleration: Vec2,
    speed: f64,
) -> (Vec2, Vec2) {
    let acc_is_zero = are_very_close(acceleration, Vec2::ZERO);
    if are_very_close(source, target) {
        if acc_is_zero {
            return (Vec2::ZERO, Vec2::ZERO);
        }
        let straight_up = -acceleration.normalized() * speed;
        return (straight_up, straight_up);
    }
    if acc_is_zero {
        let straight = (target - source).normalized() * speed;
        return (straight, straight);
    }

    let up = -acceleration.normalized();
    let across = rotate_vector(up, std::f64::consts::FRAC_PI_2);
    let diff = target - source;
    let ground = project_onto(diff, across);
    let x = ground.length();
    let y = diff.dot(up);
    if x < K_ERROR {
        let straight = diff.normalized() * speed;
        return (straight, straight);
    }

    let g = acceleration.length();
    let spd_sq = speed * speed;
    let root = (spd_sq * spd_sq - g * (g * x * x + 2.0 * y * spd_sq)).sqrt();
    let high = ((spd_sq + root) / (g * x)).atan();
    let low = ((spd_sq - root) / (g * x)).atan();

    let ground_dir = ground.normalized();
    let launch = |theta: f64| ground_dir * (theta.cos() * speed) + up * (theta.sin() * speed);
    (launch(high), launch(low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn seg(ax: f64, ay: f64, bx: f64, by: f64) -> LineSegment {
        LineSegment::new(Vec2::new(ax, ay), Vec2::new(bx, by))
    }

    #[test]
    fn crossing_segments_intersect() {
        let p = find_intersection(&seg(0.0, 0.0, 10.0, 10.0), &seg(0.0, 10.0, 10.0, 0.0));
        let p = p.expect("segments cross");
        assert!(are_very_close(p, Vec2::new(5.0, 5.0)));
    }

    #[test]
    fn parallel_and_disjoint_segments_do_not_intersect() {
        assert!(find_intersection(&seg(0.0, 0.0, 10.0, 0.0), &seg(0.0, 1.0, 10.0, 1.0)).is_none());
        assert!(find_intersection(&seg(0.0, 0.0, 1.0, 0.0), &seg(5.0, -1.0, 5.0, 1.0)).is_none());
    }

    #[test]
    fn reflection_mirrors_across_the_segment() {
        let r = reflect_approach(&seg(0.0, 0.0, 1.0, 0.0), Vec2::new(0.5, -0.5));
        assert!(are_very_close(r, Vec2::new(0.5, 0.5)));

        let r = reflect_approach(&seg(0.0, 0.0, 2.0, -1.0), Vec2::new(1.0, -2.0));
        assert!(are_very_close(r, Vec2::new(2.2, 0.4)));
    }

    #[test]
    fn normal_of_a_rightward_floor_points_up() {
        let n = normal_for(&seg(0.0, 100.0, 200.0, 100.0), false);
        assert!(are_very_close(n, Vec2::new(0.0, -1.0)));
        assert!(are_very_close(normal_for(&seg(0.0, 100.0, 200.0, 100.0), true), Vec2::new(0.0, 1.0)));
    }

    #[test]
    fn bisection_finds_the_threshold() {
        let (lo, hi) = find_smallest_diff(|x| x > 0.3);
        assert!(lo <= 0.3 && hi > 0.3);
        assert!(hi - lo < K_ERROR);
        assert_eq!(find_highest_false(|_| false), 1.0);
        assert_eq!(find_lowest_true(|_| true), 0.0);
    }

    #[test]
    fn angle_between_is_unsigned() {
        assert!(are_very_close_f(angle_between(Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)), PI * 0.5));
        assert!(are_very_close_f(angle_between(Vec2::new(1.0, 0.0), Vec2::new(0.0, -1.0)), PI * 0.5));
        assert!(are_very_close_f(angle_between(Vec2::new(1.0, 0.0), Vec2::new(-1.0, 0.0)), PI));
    }

    #[test]
    fn rect_crossing() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(line_crosses_rect(&rect, Vec2::new(-5.0, 5.0), Vec2::new(5.0, 5.0)));
        assert!(!line_crosses_rect(&rect, Vec2::new(-5.0, 5.0), Vec2::new(-1.0, 5.0)));
        assert!(rect.contains(Vec2::new(5.0, 5.0)));
        assert!(!rect.contains(Vec2::new(0.0, 5.0)));
    }

    #[test]
    fn closest_point_snaps_to_endpoints() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(10.0, 0.0);
        assert_eq!(closest_point_to_line(a, b, Vec2::new(-5.0, 3.0)), a);
        assert!(are_very_close(closest_point_to_line(a, b, Vec2::new(4.0, 3.0)), Vec2::new(4.0, 0.0)));
    }

    #[test]
    fn bezier_of_a_line_is_linear() {
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0)];
        assert!(are_very_close(bezier_point(&pts, 0.25).unwrap(), Vec2::new(2.5, 2.5)));
        let quad = [Vec2::new(0.0, 0.0), Vec2::new(5.0, 10.0), Vec2::new(10.0, 0.0)];
        assert!(are_very_close(bezier_point(&quad, 0.5).unwrap(), Vec2::new(5.0, 5.0)));
        assert!(bezier_point(&[], 0.5).is_none());
    }

    #[test]
    fn ballistic_launch_reaches_the_target() {
        let source = Vec2::new(0.0, 0.0);
        let target = Vec2::new(200.0, 0.0);
        let gravity = Vec2::new(0.0, 667.0);
        let (high, low) = compute_velocities_to_target(source, target, gravity, 500.0);
        for v in [high, low] {
            assert!(v.is_finite());
            assert!(v.y < 0.0);
            // time to come back to y = 0, then check horizontal distance
            let t = -2.0 * v.y / gravity.y;
            assert!((v.x * t - 200.0).abs() < 1e-6);
        }
        let (too_slow, _) = compute_velocities_to_target(source, Vec2::new(5000.0, 0.0), gravity, 10.0);
        assert!(too_slow.x.is_nan());
    }
}
