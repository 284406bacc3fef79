//! Moving a tracker from one segment onto the next.

use std::f64::consts::PI;

use crate::consts::{FLY_OFF_TURN_ANGLE, K_ERROR, WALL_TURN_ANGLE};
use crate::error::PhysicsError;
use crate::grid::GridCoord;
use crate::math::{
    angle_between, are_very_close, find_highest_false, find_lowest_true, intersects, location_along, normal_for,
    velocity_along, LineSegment, Vec2,
};
use crate::physics::{FreeBody, LineTracker};
use crate::platform::Platform;
use crate::surface::{Surface, SurfaceRef};

use super::BodyStep;

/// Which end of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentEnd {
    A,
    B,
}

impl SegmentEnd {
    /// End a position outside `[0, 1]` has run off.
    pub fn of_overrun(position: f64) -> Self {
        if position < 0.5 {
            SegmentEnd::A
        } else {
            SegmentEnd::B
        }
    }

    pub fn point_of(self, segment: &LineSegment) -> Vec2 {
        match self {
            SegmentEnd::A => segment.a,
            SegmentEnd::B => segment.b,
        }
    }

    pub fn position(self) -> f64 {
        match self {
            SegmentEnd::A => 0.0,
            SegmentEnd::B => 1.0,
        }
    }
}

/// Interior angle between two connected segments, measured on the side of
/// `old`'s normal. Flat continuation is π; turning up into a wall gives
/// less, running over a convex edge gives more.
pub fn turning_angle(old: &LineSegment, new: &LineSegment, inverted_on_old: bool) -> Result<f64, PhysicsError> {
    let (pivot, extremity, other) = if are_very_close(old.a, new.b) {
        (old.a, old.b, new.a)
    } else if are_very_close(old.b, new.a) {
        (old.b, old.a, new.b)
    } else if are_very_close(old.a, new.a) {
        (old.a, old.b, new.b)
    } else if are_very_close(old.b, new.b) {
        (old.b, old.a, new.a)
    } else {
        return Err(PhysicsError::Disconnected);
    };

    let shortest = angle_between(extremity - pivot, other - pivot);
    if (shortest - PI).abs() < K_ERROR {
        return Ok(PI);
    }
    let normal = normal_for(old, inverted_on_old);
    if normal.dot(other - pivot) >= 0.0 {
        Ok(shortest)
    } else {
        Ok(2.0 * PI - shortest)
    }
}

/// Candidate neighbour at one end of the current segment.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LinkedTransfer {
    pub surface_ref: SurfaceRef,
    pub surface: Surface,
    pub angle: f64,
    /// End of the neighbour that touches the current segment.
    pub end: SegmentEnd,
}

const NEIGHBOR_OFFSETS: [(i32, i32); 9] = [
    (0, 0),
    (-1, 0),
    (1, 0),
    (0, 1),
    (0, -1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

/// Neighbour with the smallest turning angle at `end` of the tracker's
/// segment. Ties keep the first found.
pub(crate) fn find_linked_transfer(
    step: &BodyStep,
    tracker: &LineTracker,
    current: &LineSegment,
    end: SegmentEnd,
) -> Result<Option<LinkedTransfer>, PhysicsError> {
    let exit = end.point_of(current);
    match tracker.surface_ref() {
        SurfaceRef::Entity { entity, index } => {
            let platform = step
                .view
                .world
                .get::<Platform>(entity)
                .ok_or(PhysicsError::MissingPlatform(entity))?;
            let next = match end {
                SegmentEnd::A => platform.previous_surface(index),
                SegmentEnd::B => platform.next_surface(index),
            };
            let Some(next) = next else {
                return Ok(None);
            };
            let surface_ref = SurfaceRef::entity(entity, next);
            let surface = step.surface(&surface_ref)?;
            let segment = surface.segment();
            let end = if are_very_close(segment.a, exit) {
                SegmentEnd::A
            } else if are_very_close(segment.b, exit) {
                SegmentEnd::B
            } else {
                log::debug!("platform {:?} surfaces {} and {} do not meet", entity, index, next);
                return Ok(None);
            };
            let Ok(angle) = turning_angle(current, &segment, tracker.inverted_normal) else {
                return Ok(None);
            };
            Ok(Some(LinkedTransfer {
                surface_ref,
                surface,
                angle,
                end,
            }))
        }
        SurfaceRef::Map { tile, index, layer } => {
            let map = step.map();
            let mut best: Option<LinkedTransfer> = None;
            for (dx, dy) in NEIGHBOR_OFFSETS {
                let here = GridCoord::new(tile.x + dx, tile.y + dy);
                let count = map.segment_count(step.layer, here).unwrap_or(0);
                for i in 0..count {
                    if (dx, dy) == (0, 0) && i == index && step.layer == layer {
                        continue;
                    }
                    let surface = map.segment_at(step.layer, here, i)?;
                    let segment = surface.segment();
                    let end = if are_very_close(segment.a, exit) {
                        SegmentEnd::A
                    } else if are_very_close(segment.b, exit) {
                        SegmentEnd::B
                    } else {
                        continue;
                    };
                    let Ok(angle) = turning_angle(current, &segment, tracker.inverted_normal) else {
                        continue;
                    };
                    if best.map_or(true, |b| angle < b.angle) {
                        best = Some(LinkedTransfer {
                            surface_ref: SurfaceRef::map(step.layer, here, i),
                            surface,
                            angle,
                            end,
                        });
                    }
                }
            }
            Ok(best)
        }
    }
}

/// Applies the fly-off and wall rules to a tracker that has run off its
/// segment. Returns true when no transfer should happen.
pub(crate) fn interrupts_transfer(
    step: &mut BodyStep,
    transfer: Option<&LinkedTransfer>,
    current: &LineSegment,
    overrun: f64,
) -> Result<bool, PhysicsError> {
    match transfer {
        Some(xfer) if xfer.angle <= FLY_OFF_TURN_ANGLE => {
            if xfer.angle <= WALL_TURN_ANGLE {
                let tracker = step.tracker_mut()?;
                tracker.position = if overrun > 1.0 { 1.0 - K_ERROR } else { K_ERROR };
                tracker.speed = 0.0;
                return Ok(true);
            }
            Ok(false)
        }
        _ => {
            let speed = step.tracker()?.speed;
            let body = fly_off(current, speed, overrun);
            log::debug!("{:?} flew off at {:?}", step.entity, body.location);
            step.set_freebody(body);
            Ok(true)
        }
    }
}

/// Free body leaving `current` over the end it overran, keeping its world
/// speed along the segment direction.
pub(crate) fn fly_off(current: &LineSegment, speed: f64, overrun: f64) -> FreeBody {
    let true_speed = speed.abs() * current.length();
    let (point, outward) = if overrun < 0.0 {
        (current.a, (current.a - current.b).normalized())
    } else {
        (current.b, (current.b - current.a).normalized())
    };
    FreeBody::new(point + outward * K_ERROR, outward * true_speed)
}

/// Segments per second on `to` giving the same world speed as `speed` on
/// `from`. Always non-negative.
pub(crate) fn convert_speed(speed: f64, from: &LineSegment, to: &LineSegment) -> f64 {
    let to_len = to.length();
    if to_len < K_ERROR {
        return 0.0;
    }
    speed.abs() * from.length() / to_len
}

/// Tracker after crossing onto a linked neighbour at `old_end`.
///
/// The new position is the touching end. When both segments meet at the
/// same kind of end the direction reverses, so speed and normal flip.
pub(crate) fn transfer_tracker(
    step: &BodyStep,
    xfer: &LinkedTransfer,
    old: &LineTracker,
    old_segment: &LineSegment,
    old_end: SegmentEnd,
) -> LineTracker {
    let mut rv = old.clone();
    rv.position = xfer.end.position();
    let mut sign = if old.speed < 0.0 { -1.0 } else { 1.0 };
    if xfer.end == old_end {
        sign = -sign;
        rv.inverted_normal = !old.inverted_normal;
    }
    rv.speed = sign * convert_speed(old.speed, old_segment, &xfer.surface.segment());
    rv.set_surface_ref(xfer.surface_ref, velocity_along(old.speed, old_segment), step.events);
    rv
}

/// A platform surface cut into by a tracker's motion.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PlatformTransfer {
    pub surface_ref: SurfaceRef,
    pub surface: Surface,
    pub point: Vec2,
    pub angle: f64,
    /// Last moment before the crossing.
    pub et_to_transfer: f64,
    /// First moment after the crossing.
    pub et_after_transfer: f64,
    pub must_invert_normal: bool,
    pub must_flip_speed: bool,
}

/// First surface the tracker's motion over `full_et` cuts into, if any.
///
/// Surfaces touching the current segment's endpoints are left to the
/// linked transfer.
pub(crate) fn check_platform_transfer(
    step: &BodyStep,
    tracker: &LineTracker,
    current: &LineSegment,
    full_et: f64,
) -> Option<PlatformTransfer> {
    let old_loc = location_along(tracker.position, current);
    let new_loc = location_along(tracker.position + tracker.speed * full_et, current);
    if are_very_close(old_loc, new_loc) {
        return None;
    }
    let mut hits = Vec::new();
    step.platform_hits(old_loc, new_loc, &mut hits);
    if tracker.surface_ref().attached_entity().is_some() {
        step.map_hits(old_loc, new_loc, &mut hits);
    }
    hits.retain(|hit| {
        hit.surface_ref != tracker.surface_ref()
            && !are_very_close(hit.point, old_loc)
            && !are_very_close(hit.point, current.a)
            && !are_very_close(hit.point, current.b)
    });
    super::sort_hits(&mut hits, old_loc);
    let hit = hits.first()?;
    let hit_segment = hit.segment();

    let (before, after) = crate::math::find_smallest_diff(|x| {
        let reach = location_along(tracker.position + tracker.speed * full_et * x, current);
        intersects(&hit_segment, old_loc, reach)
    });
    let et_to_transfer = before * full_et;
    let et_after_transfer = after * full_et;

    let mut travelled = *current;
    let crossing_pos = tracker.position + tracker.speed * et_after_transfer;
    if tracker.position < crossing_pos {
        travelled.b = hit.point;
    } else {
        travelled.a = hit.point;
    }
    let toward_b = LineSegment::new(hit.point, hit_segment.b);
    let toward_a = LineSegment::new(hit_segment.a, hit.point);
    let angle_of = |half: &LineSegment| {
        if half.length() < K_ERROR {
            return f64::INFINITY;
        }
        turning_angle(&travelled, half, tracker.inverted_normal).unwrap_or(0.0)
    };
    let angle_b = angle_of(&toward_b);
    let angle_a = angle_of(&toward_a);
    let onto_b = angle_b < angle_a;
    let onto = if onto_b { toward_b } else { toward_a };
    let must_invert_normal = are_very_close(onto.a, travelled.a) || are_very_close(onto.b, travelled.b);

    Some(PlatformTransfer {
        surface_ref: hit.surface_ref,
        surface: hit.surface,
        point: hit.point,
        angle: angle_a.min(angle_b),
        et_to_transfer,
        et_after_transfer,
        must_invert_normal,
        must_flip_speed: !onto_b,
    })
}

/// Tracker moved onto the surface described by `xfer`, placed just past the
/// crossing in its new direction of travel.
pub(crate) fn transfer_to_platform(
    step: &BodyStep,
    xfer: &PlatformTransfer,
    old: &LineTracker,
    old_segment: &LineSegment,
) -> LineTracker {
    let new_segment = xfer.surface.segment();
    let mut speed = convert_speed(old.speed, old_segment, &new_segment);
    if xfer.must_flip_speed {
        speed = -speed;
    }
    let position = if speed < 0.0 {
        find_highest_false(|x| intersects(old_segment, location_along(x, &new_segment), new_segment.a))
    } else if speed > 0.0 {
        find_lowest_true(|x| !intersects(old_segment, location_along(x, &new_segment), new_segment.b))
    } else {
        (xfer.point - new_segment.a).length() / new_segment.length().max(K_ERROR)
    };

    let mut rv = old.clone();
    rv.inverted_normal = old.inverted_normal != xfer.must_invert_normal;
    rv.speed = speed;
    rv.position = position.clamp(0.0, 1.0);
    rv.set_surface_ref(xfer.surface_ref, velocity_along(old.speed, old_segment), step.events);
    rv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(ax: f64, ay: f64, bx: f64, by: f64) -> LineSegment {
        LineSegment::new(Vec2::new(ax, ay), Vec2::new(bx, by))
    }

    #[test]
    fn flat_continuation_is_pi() {
        let angle = turning_angle(&seg(0.0, 0.0, 100.0, 0.0), &seg(100.0, 0.0, 200.0, 0.0), false).unwrap();
        assert_eq!(angle, PI);
    }

    #[test]
    fn walls_turn_by_at_most_a_right_angle() {
        // floor running into a wall that rises (y up is negative)
        let angle = turning_angle(&seg(0.0, 0.0, 100.0, 0.0), &seg(100.0, 0.0, 100.0, -100.0), false).unwrap();
        assert!((angle - PI * 0.5).abs() < 1e-9);
        assert!(angle <= WALL_TURN_ANGLE + 1e-12);
    }

    #[test]
    fn cliffs_turn_past_the_fly_off_angle() {
        let angle = turning_angle(&seg(0.0, 0.0, 100.0, 0.0), &seg(100.0, 0.0, 100.0, 100.0), false).unwrap();
        assert!((angle - PI * 1.5).abs() < 1e-9);
        assert!(angle > FLY_OFF_TURN_ANGLE);
    }

    #[test]
    fn uphill_and_downhill_ramps() {
        let up = turning_angle(&seg(0.0, 0.0, 100.0, 0.0), &seg(100.0, 0.0, 200.0, -50.0), false).unwrap();
        let down = turning_angle(&seg(0.0, 0.0, 100.0, 0.0), &seg(100.0, 0.0, 200.0, 50.0), false).unwrap();
        assert!(up < PI && up > WALL_TURN_ANGLE);
        assert!(down > PI && down < FLY_OFF_TURN_ANGLE);
        assert!(((up - PI) + (down - PI)).abs() < 1e-9);
    }

    #[test]
    fn the_inverted_side_mirrors_the_angle() {
        let old = seg(0.0, 0.0, 100.0, 0.0);
        let new = seg(100.0, 0.0, 200.0, -50.0);
        let normal = turning_angle(&old, &new, false).unwrap();
        let inverted = turning_angle(&old, &new, true).unwrap();
        assert!((normal + inverted - 2.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn disconnected_segments_have_no_angle() {
        assert_eq!(
            turning_angle(&seg(0.0, 0.0, 1.0, 0.0), &seg(5.0, 5.0, 6.0, 5.0), false),
            Err(PhysicsError::Disconnected)
        );
    }

    #[test]
    fn speed_conversion_keeps_world_speed() {
        let from = seg(0.0, 0.0, 100.0, 0.0);
        let to = seg(100.0, 0.0, 200.0, -50.0);
        let converted = convert_speed(-2.0, &from, &to);
        assert!((converted * to.length() - 200.0).abs() < 1e-9);
        assert_eq!(convert_speed(1.0, &from, &seg(1.0, 1.0, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn flying_off_keeps_direction_and_world_speed() {
        let current = seg(0.0, 0.0, 100.0, 0.0);
        let body = fly_off(&current, 2.0, 1.1);
        assert!(body.location.x > 100.0);
        assert_eq!(body.velocity, Vec2::new(200.0, 0.0));
        let back = fly_off(&current, -1.0, -0.1);
        assert!(back.location.x < 0.0);
        assert_eq!(back.velocity, Vec2::new(-100.0, 0.0));
    }

    #[test]
    fn overrun_ends() {
        assert_eq!(SegmentEnd::of_overrun(-0.2), SegmentEnd::A);
        assert_eq!(SegmentEnd::of_overrun(1.2), SegmentEnd::B);
        assert_eq!(SegmentEnd::B.position(), 1.0);
    }
}
