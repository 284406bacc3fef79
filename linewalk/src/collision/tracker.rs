//! One step of motion along a segment.

use crate::consts::{
    CEILING_CLING_ANGLE, CEILING_CLING_MIN_SPEED, FLOOR_FRICTION_ANGLE, K_ERROR, MAX_RESOLVE_DEPTH, WALL_TURN_ANGLE,
};
use crate::error::PhysicsError;
use crate::math::{angle_between, find_smallest_diff, location_along, normal_for, velocity_along, LineSegment};
use crate::physics::{FreeBody, LineTracker, PhysicsState};
use crate::surface::SurfaceDetails;

use super::transfer::{
    check_platform_transfer, find_linked_transfer, interrupts_transfer, transfer_to_platform, transfer_tracker,
    SegmentEnd,
};
use super::BodyStep;

/// Advances the tracker in `step` by `et` seconds, crossing onto linked
/// segments and platforms as needed.
pub(super) fn resolve(step: &mut BodyStep, et: f64, depth: u32) -> Result<(), PhysicsError> {
    if et < K_ERROR {
        return Ok(());
    }
    if depth > MAX_RESOLVE_DEPTH {
        log::debug!("{:?}: tracker step discarded after {} transfers", step.entity, depth);
        return Ok(());
    }

    let tracker = step.tracker()?.clone();
    let surface = step.surface(&tracker.surface_ref())?;
    let segment = surface.segment();
    if segment.length() < K_ERROR {
        log::debug!("{:?} was on a degenerate segment, letting it fall", step.entity);
        step.set_freebody(FreeBody::at(segment.a));
        return Ok(());
    }

    let new_pos = tracker.position + tracker.speed * et;
    let (et_trav, et_after) = if (0.0..=1.0).contains(&new_pos) {
        (et, 0.0)
    } else {
        let (before, after) = find_smallest_diff(|x| {
            let p = tracker.position + tracker.speed * et * x;
            !(0.0..=1.0).contains(&p)
        });
        (before * et, (1.0 - after) * et)
    };

    let interrupted = check_traversal_interruption(step, &tracker, &segment, et_trav)?;

    if !step.acting_will {
        apply_friction(step, &surface.details, &segment, interrupted.map_or(et_trav, |t| t.min(et_trav)))?;
    }

    if let Some(t) = interrupted {
        if t < K_ERROR {
            return Ok(());
        }
        let remaining = et_after + (et_trav - t);
        return continue_with(step, remaining, depth + 1);
    }

    let tracker = step.tracker()?.clone();
    if tracker.speed.abs() < K_ERROR || et_after <= 0.0 {
        return Ok(());
    }

    let end = SegmentEnd::of_overrun(new_pos);
    let linked = find_linked_transfer(step, &tracker, &segment, end)?;
    if interrupts_transfer(step, linked.as_ref(), &segment, new_pos)? {
        return match step.state {
            PhysicsState::FreeBody(_) => continue_with(step, et_after, depth + 1),
            _ => Ok(()),
        };
    }
    let Some(linked) = linked else {
        return Ok(());
    };

    let old_loc = location_along(tracker.position, &segment);
    let moved = transfer_tracker(step, &linked, &tracker, &segment, end);
    let new_loc = location_along(moved.position, &linked.surface.segment());
    log::trace!("{:?} crossed onto {:?}", step.entity, linked.surface_ref);
    step.layer = step.map().layer_after_move(step.layer, old_loc, new_loc);
    step.state = PhysicsState::Tracker(moved);
    resolve(step, et_after, depth + 1)
}

/// Spends the rest of the step in whatever state the body is now in.
fn continue_with(step: &mut BodyStep, et: f64, depth: u32) -> Result<(), PhysicsError> {
    match step.state {
        PhysicsState::Tracker(_) => resolve(step, et, depth),
        PhysicsState::FreeBody(fb) => super::freebody::resolve(step, fb.location + fb.velocity * et, depth),
        PhysicsState::Held(_) | PhysicsState::Rect(_) => Ok(()),
    }
}

/// Moves the tracker along its own segment for `et` seconds unless something
/// cuts the motion short. Returns the time spent before the interruption,
/// or `None` when the whole motion was committed.
fn check_traversal_interruption(
    step: &mut BodyStep,
    tracker: &LineTracker,
    segment: &LineSegment,
    et: f64,
) -> Result<Option<f64>, PhysicsError> {
    if let Some(xfer) = check_platform_transfer(step, tracker, segment, et) {
        if xfer.angle <= WALL_TURN_ANGLE {
            let stopped = step.tracker_mut()?;
            stopped.position = (tracker.position + tracker.speed * xfer.et_to_transfer).clamp(0.0, 1.0);
            stopped.speed = 0.0;
            return Ok(Some(0.0));
        }
        let old_loc = location_along(tracker.position, segment);
        let moved = transfer_to_platform(step, &xfer, tracker, segment);
        let new_loc = location_along(moved.position, &xfer.surface.segment());
        log::trace!("{:?} ran onto {:?}", step.entity, xfer.surface_ref);
        step.layer = step.map().layer_after_move(step.layer, old_loc, new_loc);
        step.state = PhysicsState::Tracker(moved);
        return Ok(Some(xfer.et_after_transfer));
    }

    let normal = normal_for(segment, tracker.inverted_normal);
    let gravity = step.gravity();
    if gravity.length_squared() > 0.0
        && angle_between(gravity, normal) < CEILING_CLING_ANGLE
        && tracker.speed.abs() * segment.length() < CEILING_CLING_MIN_SPEED
    {
        let loc = location_along(tracker.position, segment);
        step.set_freebody(FreeBody::new(loc + normal * K_ERROR, velocity_along(tracker.speed, segment)));
        return Ok(Some(0.0));
    }

    let old_loc = location_along(tracker.position, segment);
    let position = (tracker.position + tracker.speed * et).clamp(0.0, 1.0);
    let new_loc = location_along(position, segment);
    step.layer = step.map().layer_after_move(step.layer, old_loc, new_loc);
    step.tracker_mut()?.position = position;
    Ok(None)
}

/// Slows a coasting tracker on a floor, stopping it outright below the
/// surface's stop speed.
fn apply_friction(
    step: &mut BodyStep,
    details: &SurfaceDetails,
    segment: &LineSegment,
    et: f64,
) -> Result<(), PhysicsError> {
    let gravity = step.gravity();
    let PhysicsState::Tracker(tracker) = &mut step.state else {
        return Ok(());
    };
    let normal = normal_for(segment, tracker.inverted_normal);
    if gravity.length_squared() == 0.0 || angle_between(normal, gravity) <= FLOOR_FRICTION_ANGLE {
        return Ok(());
    }
    let current_len = step.view.surface(&tracker.surface_ref())?.segment().length();
    if tracker.speed.abs() * current_len < details.stop_speed {
        tracker.speed = 0.0;
    } else {
        tracker.speed *= (1.0 - details.friction * et).max(0.0);
    }
    Ok(())
}
