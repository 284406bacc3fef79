//! One step of ballistic motion.

use crate::consts::{CEILING_ANGLE, K_ERROR, MAX_RESOLVE_DEPTH, WALL_ANGLE};
use crate::error::PhysicsError;
use crate::math::{
    angle_between, are_very_close, find_highest_false, find_smallest_diff, intersects, normal_for, project_onto,
    reflect_approach, LineSegment, Vec2,
};
use crate::physics::{FreeBody, LineTracker};

use super::{sort_hits, BodyStep, Hit};

/// How a free body reacts to the first surface it crosses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Contact {
    /// Walls, and hard ceilings: keep going along the surface.
    Slide,
    /// Soft ceilings are passed through from below.
    PassThrough,
    /// Floors and ramps: attach (or bounce when too fast).
    Land,
}

/// Classifies a contact by the angle between the surface normal (facing
/// the body) and gravity.
pub(crate) fn classify(normal_gravity_angle: f64, hard_ceiling: bool) -> Contact {
    if normal_gravity_angle < CEILING_ANGLE {
        if hard_ceiling {
            Contact::Slide
        } else {
            Contact::PassThrough
        }
    } else if normal_gravity_angle < WALL_ANGLE {
        Contact::Slide
    } else {
        Contact::Land
    }
}

/// Does the normal facing a body moving `old -> new` need the inverted side?
pub(crate) fn is_inverted_normal(segment: &LineSegment, old: Vec2, new: Vec2) -> bool {
    normal_for(segment, false).dot(old - new) < 0.0
}

/// Moves the free body in `step` toward `new_pos`, resolving the first
/// surface crossed on the way.
pub(super) fn resolve(step: &mut BodyStep, new_pos: Vec2, depth: u32) -> Result<(), PhysicsError> {
    let body = step.freebody()?;
    if are_very_close(body.location, new_pos) {
        return Ok(());
    }
    if depth > MAX_RESOLVE_DEPTH {
        log::debug!("{:?}: free body step discarded after {} slides", step.entity, depth);
        return Ok(());
    }

    let mut hits: Vec<Hit> = Vec::new();
    let walk_layer = step.map_hits(body.location, new_pos, &mut hits);
    step.platform_hits(body.location, new_pos, &mut hits);
    sort_hits(&mut hits, body.location);

    for hit in &hits {
        if are_very_close(hit.point, body.location) {
            continue;
        }
        let segment = hit.segment();
        if segment.length() < K_ERROR {
            continue;
        }
        let inverted = is_inverted_normal(&segment, body.location, new_pos);
        let gang = angle_between(normal_for(&segment, inverted), step.gravity());

        match classify(gang, hit.surface.details.hard_ceiling) {
            Contact::PassThrough => continue,
            Contact::Slide => {
                let (slid, clipped) = handle_slide(&segment, &body, inverted, new_pos);
                step.set_freebody(slid);
                return resolve(step, clipped, depth + 1);
            }
            Contact::Land if body.velocity.length() < step.bounce_threshold => {
                let position = ((hit.point - segment.a).length() / segment.length()).clamp(0.0, 1.0);
                let speed = landing_speed(&segment, body.velocity);
                let tracker = LineTracker::new(hit.surface_ref, position, speed).inverted(inverted);
                step.layer = hit.layer;
                step.set_landing(tracker, body.velocity);
                return Ok(());
            }
            Contact::Land => {
                step.layer = hit.layer;
                let bounced = handle_bounce(&segment, &body, new_pos, step.gravity());
                log::trace!("{:?} bounced off {:?}", step.entity, hit.surface_ref);
                step.set_freebody(bounced);
                return Ok(());
            }
        }
    }

    step.layer = walk_layer;
    step.set_freebody(FreeBody::new(new_pos, body.velocity));
    Ok(())
}

/// Tracker speed (segments per second) a body gets when landing on
/// `segment` with `velocity`: the tangential part, signed toward `b`.
pub(crate) fn landing_speed(segment: &LineSegment, velocity: Vec2) -> f64 {
    let dir = segment.direction();
    let along = project_onto(velocity, dir);
    let speed = along.length() / dir.length();
    if speed < K_ERROR {
        return 0.0;
    }
    if along.dot(dir) < 0.0 {
        -speed
    } else {
        speed
    }
}

/// Removes the normal part of the motion and clips what is left so the new
/// position stays short of the surface. Returns the body with its normal
/// velocity removed (location unchanged) and the clipped target.
fn handle_slide(segment: &LineSegment, body: &FreeBody, inverted: bool, new_pos: Vec2) -> (FreeBody, Vec2) {
    let old = body.location;
    let diff = new_pos - old;
    let normal = normal_for(segment, inverted);
    let n_comp = project_onto(diff, normal);
    let p_comp = diff - n_comp;
    let clipped_at = |x: f64| old + p_comp + n_comp * x;

    let t = find_highest_false(|x| intersects(segment, old, clipped_at(x)));
    let clipped = if t != 0.0 {
        clipped_at(t)
    } else if !intersects(segment, old, old + p_comp) {
        old + p_comp
    } else {
        old
    };

    let mut rv = *body;
    if !are_very_close(body.velocity, Vec2::ZERO) {
        rv.velocity = body.velocity - project_onto(body.velocity, normal);
    }
    (rv, clipped)
}

/// Stops the body just short of the surface and reflects its velocity. The
/// part of the step that was never travelled is added back as speed
/// according to how far it would have fallen.
fn handle_bounce(segment: &LineSegment, body: &FreeBody, new_pos: Vec2, gravity: Vec2) -> FreeBody {
    let old = body.location;
    let diff = new_pos - old;
    let (t, _) = find_smallest_diff(|x| intersects(segment, old, old + diff * x));
    let location = if t == 0.0 { old } else { old + diff * t };
    let reflected = reflect_approach(segment, diff);
    let culled_potential = project_onto(diff * (1.0 - t), gravity).length();
    FreeBody::new(location, reflected.normalized() * (body.velocity.length() + culled_potential))
}
