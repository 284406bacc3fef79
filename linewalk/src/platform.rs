//! Moving collision surfaces and the waypoint model that moves them.

use std::rc::Rc;

use crate::error::PhysicsError;
use crate::math::{are_very_close, Rect, Vec2};
use crate::surface::Surface;

/// Ordered list of surfaces in platform-local space plus an offset set by
/// platform movement every tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Platform {
    surfaces: Vec<Surface>,
    offset: Vec2,
}

impl Platform {
    pub fn new(surfaces: Vec<Surface>) -> Self {
        Self {
            surfaces,
            offset: Vec2::ZERO,
        }
    }

    pub fn set_surfaces(&mut self, surfaces: Vec<Surface>) {
        self.surfaces = surfaces;
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Vec2) {
        self.offset = offset;
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Surface `index` with the platform offset applied.
    pub fn get_surface(&self, index: usize) -> Result<Surface, PhysicsError> {
        self.surfaces
            .get(index)
            .map(|s| s.translated(self.offset))
            .ok_or(PhysicsError::SegmentOutOfRange {
                index,
                count: self.surfaces.len(),
            })
    }

    /// Does the polyline close on itself?
    pub fn surfaces_cycle(&self) -> bool {
        match (self.surfaces.first(), self.surfaces.last()) {
            (Some(first), Some(last)) if self.surfaces.len() > 1 => are_very_close(first.a, last.b),
            _ => false,
        }
    }

    /// Index of the surface after `index`, wrapping on closed polylines.
    pub fn next_surface(&self, index: usize) -> Option<usize> {
        if index + 1 < self.surfaces.len() {
            Some(index + 1)
        } else if self.surfaces_cycle() {
            Some(0)
        } else {
            None
        }
    }

    /// Index of the surface before `index`, wrapping on closed polylines.
    pub fn previous_surface(&self, index: usize) -> Option<usize> {
        if index > 0 && index < self.surfaces.len() {
            Some(index - 1)
        } else if index == 0 && self.surfaces_cycle() {
            Some(self.surfaces.len() - 1)
        } else {
            None
        }
    }

    /// Bounding box of every surface, offset applied.
    pub fn bounds(&self) -> Option<Rect> {
        let first = self.surfaces.first()?;
        let start = Rect::new(first.a.x, first.a.y, 0.0, 0.0);
        let rect = self
            .surfaces
            .iter()
            .fold(start, |rect, s| rect.expand_to(s.a).expand_to(s.b));
        Some(Rect::new(
            rect.left + self.offset.x,
            rect.top + self.offset.y,
            rect.width,
            rect.height,
        ))
    }
}

/// Shared list of world-space points.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Waypoints {
    points: Rc<Vec<Vec2>>,
}

impl Waypoints {
    pub fn new(points: Vec<Vec2>) -> Self {
        Self {
            points: Rc::new(points),
        }
    }

    pub fn shared(points: Rc<Vec<Vec2>>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn point(&self, index: usize) -> Result<Vec2, PhysicsError> {
        self.points.get(index).copied().ok_or(PhysicsError::WaypointMismatch {
            index,
            count: self.points.len(),
        })
    }

    /// The segment between the two points the position currently spans.
    pub fn segment_for(&self, intpos: &InterpolativePosition) -> Result<(Vec2, Vec2), PhysicsError> {
        let pair = intpos.current_segment();
        Ok((self.point(pair.source)?, self.point(pair.target)?))
    }

    /// Current world location along the waypoint polyline.
    pub fn location_of(&self, intpos: &InterpolativePosition) -> Result<Vec2, PhysicsError> {
        let (a, b) = self.segment_for(intpos)?;
        Ok(a.lerp(b, intpos.position()))
    }
}

/// How an [`InterpolativePosition`] moves along its points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Behavior {
    /// Never moves.
    #[default]
    Idle,
    /// Advances toward the last point and stops there.
    Forward,
    /// Advances and wraps from the last point back to the first.
    Cycles,
    /// Moves toward the given point and stops there.
    TowardDestination(usize),
}

impl Behavior {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "idle" => Behavior::Idle,
            "forward" | "forwards" => Behavior::Forward,
            "cycles" | "cycle" => Behavior::Cycles,
            "toward-destination" => Behavior::TowardDestination(0),
            _ => return None,
        })
    }
}

/// The two point indices bounding the current segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentPair {
    pub source: usize,
    pub target: usize,
}

/// Position along a polyline of points, each pair one unit apart.
///
/// ```text
/// 0           1           2          3
/// *-----------*----|------*----------*
/// ```
///
/// The mark above is a whole position of about 1.4: `position() == 0.4`
/// on the segment `{ source: 1, target: 2 }`.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolativePosition {
    behavior: Behavior,
    current_point: usize,
    point_count: usize,
    /// Pixels per second along the current segment.
    speed: f64,
    position: f64,
}

impl Default for InterpolativePosition {
    fn default() -> Self {
        Self::new(2)
    }
}

impl InterpolativePosition {
    pub fn new(point_count: usize) -> Self {
        Self {
            behavior: Behavior::Idle,
            current_point: 0,
            point_count: point_count.max(1),
            speed: 0.0,
            position: 0.0,
        }
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// Sets the behavior; a destination must name an existing point.
    pub fn set_behavior(&mut self, behavior: Behavior) -> Result<(), PhysicsError> {
        if let Behavior::TowardDestination(dest) = behavior {
            self.check_point(dest)?;
        }
        self.behavior = behavior;
        Ok(())
    }

    /// Starts moving toward point `index`.
    pub fn target_point(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.set_behavior(Behavior::TowardDestination(index))
    }

    pub fn targeted_point(&self) -> Option<usize> {
        match self.behavior {
            Behavior::TowardDestination(dest) => Some(dest),
            _ => None,
        }
    }

    /// Position within the current segment, in `[0, 1]`.
    pub fn set_position(&mut self, x: f64) -> Result<(), PhysicsError> {
        if !(0.0..=1.0).contains(&x) {
            return Err(PhysicsError::WaypointMismatch {
                index: x as usize,
                count: self.point_count,
            });
        }
        self.position = x;
        Ok(())
    }

    /// Position across the whole polyline, in `[0, point_count - 1)`.
    pub fn set_whole_position(&mut self, x: f64) -> Result<(), PhysicsError> {
        let segments = (self.point_count - 1) as f64;
        if !x.is_finite() || x < 0.0 || (segments > 0.0 && x >= segments) {
            return Err(PhysicsError::WaypointMismatch {
                index: x.max(0.0) as usize,
                count: self.point_count,
            });
        }
        self.current_point = x.floor() as usize;
        self.position = x - x.floor();
        if self.position < crate::consts::K_ERROR {
            self.position = 0.0;
        }
        if 1.0 - self.position < crate::consts::K_ERROR {
            self.position = 1.0;
        }
        Ok(())
    }

    /// Sets the number of points, resetting the cursor. A destination that
    /// no longer exists becomes point 0.
    pub fn set_point_count(&mut self, count: usize) {
        self.point_count = count.max(1);
        self.current_point = 0;
        self.position = 0.0;
        if let Behavior::TowardDestination(dest) = self.behavior {
            if dest >= self.point_count {
                self.behavior = Behavior::TowardDestination(0);
            }
        }
    }

    pub fn set_segment_source(&mut self, index: usize) -> Result<(), PhysicsError> {
        self.check_point(index)?;
        self.current_point = index;
        Ok(())
    }

    pub fn current_segment(&self) -> SegmentPair {
        SegmentPair {
            source: self.current_point,
            target: self.next_point().unwrap_or(self.current_point),
        }
    }

    /// Moves the position by `x` segment units. When an end of the segment
    /// is reached the cursor moves on and the unused part of `x` is returned
    /// (same sign as `x`); otherwise returns zero.
    pub fn move_position(&mut self, x: f64) -> f64 {
        if !x.is_finite() || self.behavior == Behavior::Idle {
            return 0.0;
        }
        if self.position + x > 1.0 {
            match self.next_point() {
                None => {
                    let rv = x - (1.0 - self.position);
                    self.position = 1.0;
                    rv
                }
                Some(next) => {
                    let rv = self.position + x - 1.0;
                    self.current_point = next;
                    self.position = 0.0;
                    rv
                }
            }
        } else if self.position + x < 0.0 {
            match self.previous_point() {
                None => {
                    let rv = x + self.position;
                    self.position = 0.0;
                    rv
                }
                Some(previous) => {
                    let rv = self.position + x;
                    self.current_point = previous;
                    self.position = 1.0;
                    rv
                }
            }
        } else {
            self.position += x;
            0.0
        }
    }

    fn last_point(&self) -> usize {
        self.point_count - 1
    }

    fn check_point(&self, index: usize) -> Result<(), PhysicsError> {
        if index < self.point_count {
            Ok(())
        } else {
            Err(PhysicsError::WaypointMismatch {
                index,
                count: self.point_count,
            })
        }
    }

    fn next_point(&self) -> Option<usize> {
        let cur = self.current_point;
        match self.behavior {
            Behavior::Idle => None,
            Behavior::Forward => (cur < self.last_point()).then_some(cur + 1),
            Behavior::Cycles => Some(if cur >= self.last_point() { 0 } else { cur + 1 }),
            Behavior::TowardDestination(dest) => {
                if cur == dest {
                    None
                } else if cur > dest {
                    Some(cur - 1)
                } else {
                    Some(cur + 1)
                }
            }
        }
    }

    fn previous_point(&self) -> Option<usize> {
        let cur = self.current_point;
        match self.behavior {
            Behavior::Idle => None,
            Behavior::Forward => cur.checked_sub(1),
            Behavior::Cycles => Some(if cur == 0 { self.last_point() } else { cur - 1 }),
            Behavior::TowardDestination(dest) => {
                if cur == dest {
                    None
                } else if cur > dest {
                    (cur < self.last_point()).then_some(cur + 1)
                } else {
                    cur.checked_sub(1)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(x0: f64, x1: f64) -> Surface {
        Surface::new(Vec2::new(x0, 0.0), Vec2::new(x1, 0.0))
    }

    #[test]
    fn open_polylines_do_not_wrap() {
        let p = Platform::new(vec![flat(0.0, 10.0), flat(10.0, 20.0)]);
        assert_eq!(p.next_surface(0), Some(1));
        assert_eq!(p.next_surface(1), None);
        assert_eq!(p.previous_surface(0), None);
        assert_eq!(p.previous_surface(1), Some(0));
    }

    #[test]
    fn closed_polylines_wrap() {
        let tri = Platform::new(vec![
            Surface::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)),
            Surface::new(Vec2::new(10.0, 0.0), Vec2::new(5.0, 10.0)),
            Surface::new(Vec2::new(5.0, 10.0), Vec2::new(0.0, 0.0)),
        ]);
        assert!(tri.surfaces_cycle());
        assert_eq!(tri.next_surface(2), Some(0));
        assert_eq!(tri.previous_surface(0), Some(2));
    }

    #[test]
    fn offset_moves_surfaces_and_bounds() {
        let mut p = Platform::new(vec![flat(0.0, 10.0)]);
        p.set_offset(Vec2::new(5.0, 7.0));
        assert_eq!(p.get_surface(0).unwrap().a, Vec2::new(5.0, 7.0));
        assert_eq!(p.bounds(), Some(Rect::new(5.0, 7.0, 10.0, 0.0)));
        assert!(p.get_surface(1).is_err());
    }

    #[test]
    fn idle_never_moves() {
        let mut ip = InterpolativePosition::new(3);
        assert_eq!(ip.move_position(0.5), 0.0);
        assert_eq!(ip.position(), 0.0);
    }

    #[test]
    fn forward_rolls_over_and_clamps_at_the_end() {
        let mut ip = InterpolativePosition::new(3);
        ip.set_behavior(Behavior::Forward).unwrap();
        let rem = ip.move_position(1.25);
        assert!((rem - 0.25).abs() < 1e-12);
        assert_eq!(ip.current_segment(), SegmentPair { source: 1, target: 2 });
        assert_eq!(ip.position(), 0.0);
        ip.move_position(0.5);
        let rem = ip.move_position(0.75);
        assert!((rem - 0.25).abs() < 1e-12);
        // no further points: still on 1 -> 2, maxed out
        assert_eq!(ip.current_segment(), SegmentPair { source: 2, target: 2 });
    }

    #[test]
    fn cycles_wrap_to_the_first_point() {
        let mut ip = InterpolativePosition::new(3);
        ip.set_behavior(Behavior::Cycles).unwrap();
        ip.set_segment_source(2).unwrap();
        assert_eq!(ip.current_segment(), SegmentPair { source: 2, target: 0 });
        ip.move_position(1.5);
        assert_eq!(ip.current_segment(), SegmentPair { source: 0, target: 1 });
    }

    #[test]
    fn toward_destination_stops_at_the_target() {
        let mut ip = InterpolativePosition::new(5);
        ip.target_point(2).unwrap();
        assert_eq!(ip.targeted_point(), Some(2));
        let mut rem = 1.0;
        for _ in 0..4 {
            rem = ip.move_position(1.0);
        }
        assert_eq!(ip.current_segment(), SegmentPair { source: 2, target: 2 });
        assert!(rem > 0.0);
        ip.target_point(0).unwrap();
        assert_eq!(ip.current_segment(), SegmentPair { source: 2, target: 1 });
        assert!(ip.target_point(5).is_err());
    }

    #[test]
    fn waypoint_location_interpolates() {
        let wp = Waypoints::new(vec![Vec2::new(0.0, 0.0), Vec2::new(100.0, 0.0)]);
        let mut ip = InterpolativePosition::new(2);
        ip.set_behavior(Behavior::Forward).unwrap();
        ip.move_position(0.25);
        assert_eq!(wp.location_of(&ip).unwrap(), Vec2::new(25.0, 0.0));
        let short = Waypoints::new(vec![Vec2::ZERO]);
        assert!(short.location_of(&ip).is_err());
    }

    #[test]
    fn whole_position_splits_into_segment_and_fraction() {
        let mut ip = InterpolativePosition::new(4);
        ip.set_behavior(Behavior::Forward).unwrap();
        ip.set_whole_position(1.5).unwrap();
        assert_eq!(ip.current_segment(), SegmentPair { source: 1, target: 2 });
        assert!((ip.position() - 0.5).abs() < 1e-12);
        assert!(ip.set_whole_position(3.0).is_err());
    }
}
