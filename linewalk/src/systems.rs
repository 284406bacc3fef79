//! The systems run once per tick besides collision and triggers.
//!
//! Every system is a plain function over the world; [`crate::engine`]
//! decides the order.

use std::collections::BTreeSet;
use std::f64::consts::FRAC_PI_2;

use anyhow::Result;
use crossbeam_channel::Sender;

use crate::collision::events::SurfaceEvent;
use crate::consts::{
    CRATE_SURFACE_HALF_WIDTH, CRATE_SURFACE_HEIGHT, EDGE_PUSH_SPEED, FLAT_GRAVITY_TOLERANCE, GRAB_DISTANCE,
    HEAVY_GRAVITY_MULTIPLIER, JUMP_BOOSTER_MAX_MULTIPLIER, JUMP_BOOSTER_SPEED, K_ERROR, MAP_CEILING_Y,
    MAX_RESOLVE_DEPTH, PLATFORM_BREAKER_MIN_BOX, PLAYER_ACCELERATION, PLAYER_BRAKE_BOOST, PLAYER_JUMP_SPEED,
    PLAYER_JUMP_TIME, PLAYER_MAX_SPEED, RUN_BOOST_ACCELERATION_MULTIPLIER, RUN_BOOST_SPEED_MULTIPLIER, THROW_ANGLE,
    THROW_SPEED,
};
use crate::entities::{Collector, Facing, HoldType, Item, Lifetime, PlayerControl, ReturnPoint, Snake};
use crate::error::PhysicsError;
use crate::line_map::LineMap;
use crate::math::{angle_between, are_very_close, project_onto, rotate_vector, velocity_along, Rect, Vec2};
use crate::physics::{FreeBody, HeldState, PhysicsComponent, PhysicsState, ReleaseAction, WorldView};
use crate::platform::{InterpolativePosition, Platform, Waypoints};
use crate::script::{with_script, ScriptComponent};
use crate::surface::{Surface, SurfaceRef};
use crate::trigger::TriggerBox;
use crate::world::{EntityId, World};

/// Shared inputs of one tick.
pub struct TickContext<'a> {
    pub map: &'a LineMap,
    pub gravity: Vec2,
    pub events: &'a Sender<SurfaceEvent>,
    /// Seconds covered by this tick.
    pub et: f64,
}

impl TickContext<'_> {
    pub fn view<'w>(&'w self, world: &'w World) -> WorldView<'w> {
        WorldView::new(self.map, world, self.gravity)
    }
}

fn held_type(world: &World, holder: EntityId) -> Option<HoldType> {
    let held = world.get::<Collector>(holder)?.held_object()?;
    world.get::<Item>(held).map(|item| item.hold_type)
}

// ------------------------------ player control ------------------------------

/// Steering and jumping for every unlocked player.
pub fn player_control(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<PlayerControl>() {
        let Some(pcon) = world.get::<PlayerControl>(entity).cloned() else {
            continue;
        };
        if pcon.is_locked() {
            continue;
        }
        let run_boost = held_type(world, entity) == Some(HoldType::RunBooster);
        let Some(pcomp) = world.get::<PhysicsComponent>(entity) else {
            continue;
        };
        let dir = pcon.direction();

        let mut jumped = false;
        let new_state: Option<PhysicsState> = match pcomp.state() {
            PhysicsState::FreeBody(fb) => {
                let mut fb = *fb;
                fb.velocity = steer_freebody(fb.velocity, dir, tick.gravity, tick.et);
                Some(fb.into())
            }
            PhysicsState::Tracker(tracker) => {
                let view = tick.view(world);
                let segment = view.surface(&tracker.surface_ref())?.segment();
                let mut tracker = tracker.clone();
                tracker.speed = steer_tracker(&tracker, dir, segment.length(), run_boost, tick.et);
                if pcon.jump_held {
                    let normal = view.normal(pcomp)?;
                    let location = view.location(pcomp)? + normal * K_ERROR;
                    let velocity = velocity_along(tracker.speed, &segment) + normal * PLAYER_JUMP_SPEED;
                    jumped = true;
                    Some(FreeBody::new(location, velocity).into())
                } else {
                    Some(tracker.into())
                }
            }
            PhysicsState::Held(_) | PhysicsState::Rect(_) => None,
        };

        if let (Some(state), Some(pcomp)) = (new_state, world.get_mut::<PhysicsComponent>(entity)) {
            if jumped {
                log::debug!("{:?} jumped", entity);
                pcomp.change_state(state, tick.events);
            } else {
                pcomp.reset_state(state);
            }
        }
        if let Some(pcon) = world.get_mut::<PlayerControl>(entity) {
            pcon.jump_time = if jumped {
                PLAYER_JUMP_TIME
            } else {
                (pcon.jump_time - tick.et).max(0.0)
            };
            pcon.update_facing();
        }
    }
    Ok(())
}

/// Air control: accelerate sideways relative to gravity, braking harder
/// against the current motion, never pushing past the voluntary cap.
fn steer_freebody(velocity: Vec2, dir: f64, gravity: Vec2, et: f64) -> Vec2 {
    let rot_grav = rotate_vector(gravity, -FRAC_PI_2).normalized();
    let mut boost = 1.0;
    if !are_very_close(velocity, Vec2::ZERO) && dir != 0.0 && angle_between(rot_grav * dir, velocity) > K_ERROR {
        boost = PLAYER_BRAKE_BOOST;
    }
    let vdel = rot_grav * (dir * PLAYER_ACCELERATION * et * boost);
    let would_exceed = (velocity + vdel).length() > PLAYER_MAX_SPEED;
    if velocity.length() > PLAYER_MAX_SPEED && would_exceed {
        velocity
    } else if would_exceed {
        velocity.normalized() * PLAYER_MAX_SPEED
    } else {
        velocity + vdel
    }
}

/// Running along a segment. Speeds are in segments per second.
fn steer_tracker(tracker: &crate::physics::LineTracker, direction: f64, seg_len: f64, run_boost: bool, et: f64) -> f64 {
    if seg_len < K_ERROR {
        return tracker.speed;
    }
    let dir = if tracker.inverted_normal { -direction } else { direction };
    let mut vdel = PLAYER_ACCELERATION * et * dir / seg_len;
    let mut max_speed = PLAYER_MAX_SPEED / seg_len;
    if run_boost {
        vdel *= RUN_BOOST_ACCELERATION_MULTIPLIER;
        max_speed *= RUN_BOOST_SPEED_MULTIPLIER;
    }
    let speed = tracker.speed;
    if speed * dir < 0.0 {
        vdel *= PLAYER_BRAKE_BOOST;
    }
    if speed.abs() > max_speed && speed * dir > 0.0 {
        speed
    } else if (speed + vdel).abs() > max_speed {
        let sign = if speed + vdel < 0.0 { -1.0 } else { 1.0 };
        sign * max_speed
    } else {
        speed + vdel
    }
}

// ------------------------------ surface events ------------------------------

/// Hands queued landing/departing events to the platform owners' scripts.
pub fn dispatch_surface_events(tick: &TickContext<'_>, world: &mut World, events: Vec<SurfaceEvent>) -> Result<()> {
    for event in events {
        let platform = event.platform();
        if !world.is_alive(platform) || !world.has::<ScriptComponent>(platform) {
            continue;
        }
        with_script(world, tick.map, tick.gravity, platform, |script, ctx| match event {
            SurfaceEvent::Landing { other, velocity, .. } => script.on_landing(ctx, velocity, other),
            SurfaceEvent::Departing { other, .. } => script.on_departing(ctx, other),
        })?;
    }
    Ok(())
}

// --------------------------------- gravity ----------------------------------

pub fn gravity(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<PhysicsComponent>() {
        let multiplier = if held_type(world, entity) == Some(HoldType::Heavy) {
            HEAVY_GRAVITY_MULTIPLIER
        } else {
            1.0
        };
        let g = tick.gravity * multiplier;
        let Some(pcomp) = world.get::<PhysicsComponent>(entity) else {
            continue;
        };
        if !pcomp.affected_by_gravity {
            continue;
        }
        let tracker_acc = match pcomp.tracker() {
            Some(tracker) => {
                let segment = tick.view(world).surface(&tracker.surface_ref())?.segment();
                Some(tracker_acceleration(segment.a, segment.b, g, tick.et))
            }
            None => None,
        };
        let Some(pcomp) = world.get_mut::<PhysicsComponent>(entity) else {
            continue;
        };
        if let Some(fb) = pcomp.freebody_mut() {
            fb.velocity += g * tick.et;
        } else if let (Some(tracker), Some(acc)) = (pcomp.tracker_mut(), tracker_acc) {
            tracker.speed += acc;
        }
    }
    Ok(())
}

/// Change in segments per second pulling a tracker toward the lower end of
/// `a -> b`. Nearly level segments get none.
fn tracker_acceleration(a: Vec2, b: Vec2, g: Vec2, et: f64) -> f64 {
    let length = a.distance(b);
    if length < K_ERROR {
        return 0.0;
    }
    let mut acc = project_onto(g, a - b).length() * et / length;
    let ab_angle = angle_between(a - b, g);
    let ba_angle = angle_between(b - a, g);
    if ab_angle < ba_angle {
        acc = -acc;
    }
    if (ab_angle - FRAC_PI_2).abs() < FLAT_GRAVITY_TOLERANCE || (ba_angle - FRAC_PI_2).abs() < FLAT_GRAVITY_TOLERANCE {
        acc = 0.0;
    }
    acc
}

// ----------------------------- lifetimes, snakes -----------------------------

pub fn lifetimes(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<Lifetime>() {
        let Some(lifetime) = world.get_mut::<Lifetime>(entity) else {
            continue;
        };
        lifetime.0 -= tick.et;
        if lifetime.0 <= 0.0 {
            world.request_deletion(entity);
        }
    }
    Ok(())
}

pub fn snakes(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<Snake>() {
        let Some(snake) = world.get_mut::<Snake>(entity) else {
            continue;
        };
        if snake.instances_remaining == 0 {
            world.request_deletion(entity);
            continue;
        }
        snake.elapsed += tick.et;
        if snake.elapsed < snake.spawn_interval {
            continue;
        }
        let tint = snake.instance_tint();
        let location = snake.location;
        snake.elapsed = 0.0;
        snake.instances_remaining -= 1;

        let instance = world.spawn();
        world.insert(instance, Lifetime::default());
        world.insert(instance, tint);
        world.insert(instance, PhysicsComponent::with_state(FreeBody::at(location)));
    }
    Ok(())
}

// ----------------------------- extreme positions -----------------------------

/// Keeps free bodies within the map: pushed back at the sides, capped above,
/// returned (or deleted) when they fall out of the bottom.
pub fn extreme_positions(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    let bounds = tick.map.bounds();
    for entity in world.entities_with::<PhysicsComponent>() {
        let Some(location) = world
            .get::<PhysicsComponent>(entity)
            .and_then(PhysicsComponent::freebody)
            .map(|fb| fb.location)
        else {
            continue;
        };
        let fell_to = if location.y > bounds.bottom() {
            Some(return_location(tick, world, entity))
        } else {
            None
        };
        let Some(fb) = world
            .get_mut::<PhysicsComponent>(entity)
            .and_then(PhysicsComponent::freebody_mut)
        else {
            continue;
        };
        if location.x <= bounds.left {
            fb.location.x = bounds.left + K_ERROR;
            fb.velocity.x = EDGE_PUSH_SPEED;
        } else if location.x >= bounds.right() {
            fb.location.x = bounds.right() - K_ERROR;
            fb.velocity.x = -EDGE_PUSH_SPEED;
        } else if location.y < MAP_CEILING_Y {
            fb.location.y = MAP_CEILING_Y;
        } else if let Some(fell_to) = fell_to {
            match fell_to {
                Some(target) => {
                    fb.location = target;
                    fb.velocity = Vec2::ZERO;
                }
                None => world.request_deletion(entity),
            }
        }
    }
    Ok(())
}

/// Where `entity`'s return point sends it, if it has a live one.
fn return_location(tick: &TickContext<'_>, world: &World, entity: EntityId) -> Option<Vec2> {
    let target = world.get::<ReturnPoint>(entity)?.target;
    let pcomp = world.get::<PhysicsComponent>(target)?;
    match pcomp.rect() {
        Some(rect) => Some(rect.center()),
        None => tick.view(world).location(pcomp).ok(),
    }
}

// ------------------------------ waypoints ------------------------------------

/// Advances every interpolative position along its waypoints.
pub fn waypoints(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<InterpolativePosition>() {
        let Some(points) = world.get::<Waypoints>(entity).cloned() else {
            continue;
        };
        let Some(intpos) = world.get_mut::<InterpolativePosition>(entity) else {
            continue;
        };
        advance_waypoint(&points, intpos, tick.et, 0)?;
    }
    Ok(())
}

fn advance_waypoint(
    points: &Waypoints,
    intpos: &mut InterpolativePosition,
    et: f64,
    depth: u32,
) -> Result<(), PhysicsError> {
    if depth > MAX_RESOLVE_DEPTH || et <= 0.0 {
        return Ok(());
    }
    let (a, b) = points.segment_for(intpos)?;
    let seg_len = a.distance(b);
    if seg_len < K_ERROR {
        return Ok(());
    }
    let delta = intpos.speed() / seg_len * et;
    if delta == 0.0 {
        return Ok(());
    }
    let remaining = intpos.move_position(delta);
    // zero means done, the full delta means stuck at an end
    if remaining == 0.0 || remaining == delta {
        return Ok(());
    }
    advance_waypoint(points, intpos, et * remaining / delta, depth + 1)
}

/// Moves platforms to their current waypoint location.
pub fn platform_movement(_tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<Platform>() {
        let (Some(points), Some(intpos)) = (
            world.get::<Waypoints>(entity),
            world.get::<InterpolativePosition>(entity),
        ) else {
            continue;
        };
        let offset = points.location_of(intpos)?;
        if let Some(platform) = world.get_mut::<Platform>(entity) {
            platform.set_offset(offset);
        }
    }
    Ok(())
}

// --------------------------------- holding -----------------------------------

/// Grabbing and releasing of items by players.
pub fn hold_items(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    let holders: Vec<EntityId> = world
        .entities_with::<PlayerControl>()
        .into_iter()
        .filter(|&e| world.has::<Collector>(e) && world.has::<PhysicsComponent>(e))
        .collect();
    let holdables: Vec<EntityId> = world
        .query::<Item>()
        .into_iter()
        .filter(|(e, item)| item.hold_type.is_holdable() && world.has::<PhysicsComponent>(*e))
        .map(|(e, _)| e)
        .collect();

    for &holder in &holders {
        for &holdable in &holdables {
            check_to_hold(tick, world, holder, holdable)?;
        }
    }
    for &held in &holdables {
        check_release(tick, world, held)?;
    }
    for &holder in &holders {
        if let Some(pcon) = world.get_mut::<PlayerControl>(holder) {
            pcon.releasing = false;
        }
    }
    Ok(())
}

fn check_to_hold(tick: &TickContext<'_>, world: &mut World, holder: EntityId, holdable: EntityId) -> Result<()> {
    if holder == holdable {
        return Ok(());
    }
    let (Some(holder_pcomp), Some(pcon), Some(collector)) = (
        world.get::<PhysicsComponent>(holder),
        world.get::<PlayerControl>(holder),
        world.get::<Collector>(holder),
    ) else {
        return Ok(());
    };
    // only from the ground, only when asked, one thing at a time
    if holder_pcomp.tracker().is_none() || !pcon.grabbing || collector.held_object().is_some() {
        return Ok(());
    }
    let Some(item) = world.get::<Item>(holdable) else {
        return Ok(());
    };
    if !item.hold_type.is_holdable() {
        return Ok(());
    }
    let Some(holdable_pcomp) = world.get::<PhysicsComponent>(holdable) else {
        return Ok(());
    };
    if holdable_pcomp.held().is_some() {
        return Ok(());
    }
    let view = tick.view(world);
    let holdable_loc = view.location(holdable_pcomp)?;
    let holder_loc = view.location(holder_pcomp)? + collector.collection_offset;
    if holdable_loc.distance(holder_loc) >= GRAB_DISTANCE {
        return Ok(());
    }

    let mut state = HeldState::new(holder);
    if item.hold_type == HoldType::JumpBooster && holdable_pcomp.bounce_threshold >= 1000.0 {
        state.release = ReleaseAction::JumpBoost;
    }
    if let Some(pcomp) = world.get_mut::<PhysicsComponent>(holdable) {
        pcomp.change_state(state, tick.events);
    }
    if let Some(collector) = world.get_mut::<Collector>(holder) {
        collector.set_held_object(Some(holdable));
    }
    log::debug!("{:?} picked up {:?}", holder, holdable);
    with_script(world, tick.map, tick.gravity, holdable, |script, ctx| script.on_held(ctx, holder))
}

fn check_release(tick: &TickContext<'_>, world: &mut World, held: EntityId) -> Result<()> {
    let Some(state) = world
        .get::<PhysicsComponent>(held)
        .and_then(PhysicsComponent::held)
        .copied()
    else {
        return Ok(());
    };
    let holder = state.holder;
    if !world.is_alive(holder) {
        world.request_deletion(held);
        return Ok(());
    }
    let Some(pcon) = world.get::<PlayerControl>(holder) else {
        return Ok(());
    };
    if !pcon.releasing {
        return Ok(());
    }
    let facing = pcon.last_direction();
    let is_jump_booster = world
        .get::<Item>(held)
        .is_some_and(|item| item.hold_type == HoldType::JumpBooster);

    let hand = tick.view(world).hand_point_of(holder)?;
    let dir_adj = match (is_jump_booster, facing) {
        (true, _) => 0.0,
        (false, Facing::Right) => 1.0,
        (false, Facing::Left) => -1.0,
    };
    let gunit = tick.gravity.normalized();
    let throwv = rotate_vector(-gunit, THROW_ANGLE) * dir_adj;
    let v = if is_jump_booster { gunit } else { -gunit };
    let velocity = (v + throwv).normalized() * THROW_SPEED;

    if let Some(collector) = world.get_mut::<Collector>(holder) {
        collector.set_held_object(None);
    }
    if state.release == ReleaseAction::JumpBoost {
        if let Some(fb) = world
            .get_mut::<PhysicsComponent>(holder)
            .and_then(PhysicsComponent::freebody_mut)
        {
            fb.velocity = jump_boost(fb.velocity, tick.gravity);
        }
    }
    if let Some(pcomp) = world.get_mut::<PhysicsComponent>(held) {
        pcomp.reset_state(FreeBody::new(hand, velocity));
    }
    log::debug!("{:?} released {:?}", holder, held);
    with_script(world, tick.map, tick.gravity, held, |script, ctx| script.on_release(ctx, holder))
}

/// Holder velocity after letting go of a jump booster mid-air: an upward
/// kick with a floor and a ceiling on the result.
fn jump_boost(velocity: Vec2, gravity: Vec2) -> Vec2 {
    let gunit = gravity.normalized();
    let mut fb_g = project_onto(velocity, gravity);
    let fb_a = velocity - fb_g;
    fb_g -= gunit * JUMP_BOOSTER_SPEED;
    if angle_between(fb_g, gravity) < K_ERROR || fb_g.length() < JUMP_BOOSTER_SPEED {
        fb_g = -gunit * JUMP_BOOSTER_SPEED;
    } else if fb_g.length() > JUMP_BOOSTER_SPEED * JUMP_BOOSTER_MAX_MULTIPLIER {
        fb_g = fb_g.normalized() * (JUMP_BOOSTER_SPEED * JUMP_BOOSTER_MAX_MULTIPLIER);
    }
    fb_g + fb_a
}

// ------------------------------ platform items -------------------------------

fn platform_world_bounds(view: &WorldView<'_>, entity: EntityId, platform: &Platform) -> Option<Rect> {
    let mut bounds: Option<Rect> = None;
    for index in 0..platform.surface_count() {
        let Ok(surface) = view.surface(&SurfaceRef::entity(entity, index)) else {
            continue;
        };
        let rect = bounds.unwrap_or(Rect::new(surface.a.x, surface.a.y, 0.0, 0.0));
        bounds = Some(rect.expand_to(surface.a).expand_to(surface.b));
    }
    bounds
}

/// Platform breakers delete any platform whose bounds they enter.
pub fn platform_breaking(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    let view = tick.view(world);
    let breakers: Vec<Vec2> = world
        .query::<Item>()
        .into_iter()
        .filter(|(_, item)| item.hold_type == HoldType::PlatformBreaker)
        .filter_map(|(e, _)| view.location_of(e).ok())
        .collect();
    if breakers.is_empty() {
        return Ok(());
    }
    let mut broken = Vec::new();
    for (entity, platform) in world.query::<Platform>() {
        let Some(bounds) = platform_world_bounds(&view, entity, platform) else {
            continue;
        };
        let bounds = bounds.with_min_size(PLATFORM_BREAKER_MIN_BOX);
        if breakers.iter().any(|&loc| bounds.contains(loc)) {
            broken.push(entity);
        }
    }
    for entity in broken {
        log::debug!("platform {:?} broken", entity);
        world.request_deletion(entity);
    }
    Ok(())
}

/// The surface a crate carries on top while it is not being held.
pub fn crate_surface() -> Surface {
    Surface::new(
        Vec2::new(-CRATE_SURFACE_HALF_WIDTH, -CRATE_SURFACE_HEIGHT),
        Vec2::new(CRATE_SURFACE_HALF_WIDTH, -CRATE_SURFACE_HEIGHT),
    )
}

/// Crates lose their platform while held and get it back when set down.
pub fn crate_surfaces(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    let crates: Vec<EntityId> = world
        .query::<Item>()
        .into_iter()
        .filter(|(_, item)| item.hold_type == HoldType::Crate)
        .map(|(e, _)| e)
        .collect();
    for entity in crates {
        let held = world
            .get::<PhysicsComponent>(entity)
            .is_some_and(|p| p.held().is_some());
        let has_platform = world.has::<Platform>(entity);
        if held && has_platform {
            detach_riders(tick, world, &BTreeSet::from([entity]));
            world.remove::<Platform>(entity);
        } else if !held && !has_platform {
            world.insert(entity, Platform::new(vec![crate_surface()]));
        }
    }
    Ok(())
}

/// Turns every tracker riding one of `platforms` into a free body where it
/// stands.
fn detach_riders(tick: &TickContext<'_>, world: &mut World, platforms: &BTreeSet<EntityId>) {
    let mut detached = Vec::new();
    {
        let view = tick.view(world);
        for (entity, pcomp) in world.query::<PhysicsComponent>() {
            let Some(tracker) = pcomp.tracker() else {
                continue;
            };
            let Some(platform) = tracker.surface_ref().attached_entity() else {
                continue;
            };
            if !platforms.contains(&platform) {
                continue;
            }
            let body = match (view.location(pcomp), view.velocity(pcomp)) {
                (Ok(location), Ok(velocity)) => FreeBody::new(location, velocity),
                _ => FreeBody::default(),
            };
            detached.push((entity, body));
        }
    }
    for (entity, body) in detached {
        if let Some(pcomp) = world.get_mut::<PhysicsComponent>(entity) {
            log::debug!("{:?} lost its platform, now free at {:?}", entity, body.location);
            pcomp.reset_state(body);
        }
    }
}

// ---------------------------------- recall -----------------------------------

/// Counts down bodies outside their recall bounds and sends them home when
/// time is up.
pub fn recall(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<ReturnPoint>() {
        let Some(pcomp) = world.get::<PhysicsComponent>(entity) else {
            continue;
        };
        let held = pcomp.held().is_some();
        let location = match tick.view(world).location(pcomp) {
            Ok(location) => location,
            Err(err) => {
                log::warn!("cannot recall {:?}: {}", entity, err);
                continue;
            }
        };
        let home = return_location(tick, world, entity);
        let Some(rt) = world.get_mut::<ReturnPoint>(entity) else {
            continue;
        };
        let inside = rt.recall_bounds.map_or(true, |bounds| bounds.contains(location));
        if inside || held {
            rt.recall_time = rt.recall_max_time;
            continue;
        }
        rt.recall_time -= tick.et;
        if rt.recall_time > 0.0 {
            continue;
        }
        rt.recall_time = 0.0;
        let Some(home) = home else {
            log::warn!("{:?} has nowhere to return to", entity);
            continue;
        };
        if let Some(pcomp) = world.get_mut::<PhysicsComponent>(entity) {
            log::debug!("recalling {:?} to {:?}", entity, home);
            pcomp.change_state(FreeBody::at(home), tick.events);
        }
    }
    Ok(())
}

// ---------------------------------- scripts ----------------------------------

pub fn script_updates(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    for entity in world.entities_with::<ScriptComponent>() {
        with_script(world, tick.map, tick.gravity, entity, |script, ctx| script.on_update(ctx, tick.et))?;
    }
    Ok(())
}

// ----------------------------- reference cleanup -----------------------------

/// Drops every reference to an entity about to be deleted, so nothing live
/// points at a dead entity after the flush.
pub fn release_doomed_references(tick: &TickContext<'_>, world: &mut World) -> Result<()> {
    let doomed: BTreeSet<EntityId> = world.pending_deletions().into_iter().collect();
    if doomed.is_empty() {
        return Ok(());
    }
    detach_riders(tick, world, &doomed);

    let mut dropped = Vec::new();
    {
        let view = tick.view(world);
        for (entity, pcomp) in world.query::<PhysicsComponent>() {
            if doomed.contains(&entity) {
                continue;
            }
            if let Some(held) = pcomp.held() {
                if doomed.contains(&held.holder) {
                    let at = view.location(pcomp).unwrap_or_default();
                    dropped.push((entity, at));
                }
            }
        }
    }
    for (entity, at) in dropped {
        if let Some(pcomp) = world.get_mut::<PhysicsComponent>(entity) {
            pcomp.reset_state(FreeBody::at(at));
        }
    }

    for entity in world.entities_with::<Collector>() {
        if let Some(collector) = world.get_mut::<Collector>(entity) {
            if collector.held_object().is_some_and(|held| doomed.contains(&held)) {
                collector.set_held_object(None);
            }
        }
    }
    for entity in world.entities_with::<ReturnPoint>() {
        if world.get::<ReturnPoint>(entity).is_some_and(|rt| doomed.contains(&rt.target)) {
            log::warn!("{:?} lost its return point", entity);
            world.remove::<ReturnPoint>(entity);
        }
    }
    for entity in world.entities_with::<TriggerBox>() {
        let stale = matches!(
            world.get::<TriggerBox>(entity),
            Some(TriggerBox::TargetedLauncher { target, .. }) if doomed.contains(target)
        );
        if stale {
            log::warn!("launcher {:?} lost its target", entity);
            world.remove::<TriggerBox>(entity);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::events::SurfaceEvents;
    use crate::collision::test_support::map_from_tiles;
    use crate::grid::GridCoord;
    use crate::line_map::Layer;
    use crate::physics::LineTracker;

    const G: Vec2 = Vec2::new(0.0, 667.0);

    struct Fixture {
        map: LineMap,
        events: SurfaceEvents,
        world: World,
    }

    impl Fixture {
        fn new(map: LineMap) -> Self {
            Self {
                map,
                events: SurfaceEvents::new(),
                world: World::new(),
            }
        }

        fn run(&mut self, system: fn(&TickContext<'_>, &mut World) -> Result<()>, et: f64) {
            let tick = TickContext {
                map: &self.map,
                gravity: G,
                events: self.events.sender(),
                et,
            };
            system(&tick, &mut self.world).unwrap();
        }

        fn freebody(&self, e: EntityId) -> FreeBody {
            *self.world.get::<PhysicsComponent>(e).unwrap().freebody().unwrap()
        }
    }

    fn floor_map() -> LineMap {
        let floor = Surface::new(Vec2::new(0.0, 40.0), Vec2::new(64.0, 40.0));
        map_from_tiles(4, 4, &[(GridCoord::new(0, 2), vec![floor])])
    }

    fn floor_ref() -> SurfaceRef {
        SurfaceRef::map(Layer::Foreground, GridCoord::new(0, 2), 0)
    }

    #[test]
    fn free_bodies_fall() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let e = fx.world.spawn();
        fx.world.insert(e, PhysicsComponent::with_state(FreeBody::at(Vec2::new(8.0, 8.0))));
        let floater = fx.world.spawn();
        fx.world
            .insert(floater, PhysicsComponent::with_state(FreeBody::at(Vec2::new(8.0, 8.0))).without_gravity());
        fx.run(gravity, 0.5);
        assert_eq!(fx.freebody(e).velocity, Vec2::new(0.0, 333.5));
        assert_eq!(fx.freebody(floater).velocity, Vec2::ZERO);
    }

    #[test]
    fn heavy_items_pull_harder() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let rock = fx.world.spawn();
        fx.world.insert(rock, Item::holdable(HoldType::Heavy));
        let e = fx.world.spawn();
        fx.world.insert(e, PhysicsComponent::with_state(FreeBody::at(Vec2::new(8.0, 8.0))));
        let mut collector = Collector::default();
        collector.set_held_object(Some(rock));
        fx.world.insert(e, collector);
        fx.run(gravity, 1.0);
        assert_eq!(fx.freebody(e).velocity, Vec2::new(0.0, 667.0 * 1.5));
    }

    #[test]
    fn slopes_pull_toward_the_lower_end() {
        // b is lower (larger y) than a
        let acc = tracker_acceleration(Vec2::new(0.0, 0.0), Vec2::new(30.0, 30.0), G, 1.0);
        assert!(acc > 0.0);
        let acc = tracker_acceleration(Vec2::new(30.0, 30.0), Vec2::new(0.0, 0.0), G, 1.0);
        assert!(acc < 0.0);
        assert_eq!(tracker_acceleration(Vec2::new(0.0, 0.0), Vec2::new(30.0, 1.0), G, 1.0), 0.0);
    }

    #[test]
    fn running_accelerates_and_caps() {
        let tracker = LineTracker::new(floor_ref(), 0.5, 0.0);
        let speed = steer_tracker(&tracker, 1.0, 100.0, false, 1.0);
        assert!((speed - 1.25).abs() < 1e-12);
        let fast = LineTracker::new(floor_ref(), 0.5, 3.9);
        assert_eq!(steer_tracker(&fast, 1.0, 100.0, false, 1.0), 4.0);
        // braking against the run is three times stronger
        let braking = steer_tracker(&fast, -1.0, 100.0, false, 0.1);
        assert!((braking - (3.9 - 1.25 * 0.1 * 3.0)).abs() < 1e-12);
        // an inverted normal flips which way is "right"
        let inverted = LineTracker::new(floor_ref(), 0.5, 0.0).inverted(true);
        assert!(steer_tracker(&inverted, 1.0, 100.0, false, 1.0) < 0.0);
    }

    #[test]
    fn air_control_respects_the_voluntary_cap() {
        let v = steer_freebody(Vec2::ZERO, 1.0, G, 1.0);
        assert!((v.x - 125.0).abs() < 1e-9 && v.y.abs() < 1e-9);
        let v = steer_freebody(Vec2::new(390.0, 0.0), 1.0, G, 1.0);
        assert!((v.length() - 400.0).abs() < 1e-9);
        let v = steer_freebody(Vec2::new(500.0, 0.0), 1.0, G, 1.0);
        assert_eq!(v, Vec2::new(500.0, 0.0));
    }

    #[test]
    fn jumping_leaves_the_surface() {
        let mut fx = Fixture::new(floor_map());
        let player = fx.world.spawn();
        let tracker = LineTracker::new(floor_ref(), 0.5, 0.0).with_owner(player);
        fx.world.insert(player, PhysicsComponent::with_state(tracker));
        let mut pcon = PlayerControl::default();
        pcon.jump_held = true;
        fx.world.insert(player, pcon);
        fx.run(player_control, 1.0 / 60.0);
        let fb = fx.freebody(player);
        assert!((fb.velocity.y + PLAYER_JUMP_SPEED).abs() < 1e-9);
        assert!(fb.location.y < 40.0);
        assert_eq!(fx.world.get::<PlayerControl>(player).unwrap().jump_time, PLAYER_JUMP_TIME);
    }

    #[test]
    fn locked_players_are_not_steered() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let player = fx.world.spawn();
        fx.world.insert(player, PhysicsComponent::with_state(FreeBody::at(Vec2::new(8.0, 8.0))));
        let mut pcon = PlayerControl::default();
        pcon.press_right();
        pcon.lock_until_landing();
        fx.world.insert(player, pcon);
        fx.run(player_control, 1.0);
        assert_eq!(fx.freebody(player).velocity, Vec2::ZERO);
    }

    #[test]
    fn edges_push_back_and_the_bottom_returns_home() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let home = fx.world.spawn();
        fx.world.insert(home, PhysicsComponent::with_state(Rect::new(40.0, 40.0, 20.0, 20.0)));
        let left = fx.world.spawn();
        fx.world.insert(left, PhysicsComponent::with_state(FreeBody::at(Vec2::new(-3.0, 8.0))));
        let fallen = fx.world.spawn();
        fx.world.insert(fallen, PhysicsComponent::with_state(FreeBody::new(Vec2::new(8.0, 80.0), Vec2::new(0.0, 300.0))));
        fx.world.insert(fallen, ReturnPoint::new(home));
        let lost = fx.world.spawn();
        fx.world.insert(lost, PhysicsComponent::with_state(FreeBody::at(Vec2::new(8.0, 80.0))));

        fx.run(extreme_positions, 0.1);
        assert_eq!(fx.freebody(left).location.x, K_ERROR);
        assert_eq!(fx.freebody(left).velocity.x, EDGE_PUSH_SPEED);
        assert_eq!(fx.freebody(fallen), FreeBody::at(Vec2::new(50.0, 50.0)));
        assert!(fx.world.is_requesting_deletion(lost));
    }

    #[test]
    fn snakes_spawn_then_expire() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let e = fx.world.spawn();
        let mut snake = Snake::new(Vec2::new(10.0, 10.0));
        snake.total_instances = 2;
        snake.instances_remaining = 2;
        fx.world.insert(e, snake);
        for _ in 0..3 {
            fx.run(snakes, 0.03);
        }
        assert_eq!(fx.world.entities_with::<Lifetime>().len(), 2);
        assert!(fx.world.is_requesting_deletion(e));
    }

    #[test]
    fn lifetimes_run_out() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let e = fx.world.spawn();
        fx.world.insert(e, Lifetime(0.15));
        fx.run(lifetimes, 0.1);
        assert!(!fx.world.is_requesting_deletion(e));
        fx.run(lifetimes, 0.1);
        assert!(fx.world.is_requesting_deletion(e));
    }

    #[test]
    fn platforms_follow_their_waypoints() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let e = fx.world.spawn();
        fx.world.insert(e, Platform::new(vec![Surface::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0))]));
        fx.world.insert(e, Waypoints::new(vec![Vec2::new(0.0, 0.0), Vec2::new(100.0, 0.0), Vec2::new(100.0, 100.0)]));
        let mut intpos = InterpolativePosition::new(3).with_speed(50.0);
        intpos.set_behavior(crate::platform::Behavior::Forward).unwrap();
        fx.world.insert(e, intpos);

        fx.run(waypoints, 3.0);
        fx.run(platform_movement, 3.0);
        let platform = fx.world.get::<Platform>(e).unwrap();
        assert!(platform.offset().distance(Vec2::new(100.0, 50.0)) < 1e-9);
    }

    #[test]
    fn grab_and_throw() {
        let mut fx = Fixture::new(floor_map());
        let player = fx.world.spawn();
        let tracker = LineTracker::new(floor_ref(), 0.5, 0.0).with_owner(player);
        fx.world.insert(player, PhysicsComponent::with_state(tracker));
        fx.world.insert(player, Collector::with_offset(Vec2::new(0.0, -16.0)));
        let mut pcon = PlayerControl::default();
        pcon.grabbing = true;
        fx.world.insert(player, pcon);
        let ball = fx.world.spawn();
        fx.world.insert(ball, PhysicsComponent::with_state(FreeBody::at(Vec2::new(40.0, 30.0))));
        fx.world.insert(ball, Item::holdable(HoldType::Simple));

        fx.run(hold_items, 0.1);
        assert!(fx.world.get::<PhysicsComponent>(ball).unwrap().held().is_some());
        assert_eq!(fx.world.get::<Collector>(player).unwrap().held_object(), Some(ball));

        fx.world.get_mut::<PlayerControl>(player).unwrap().releasing = true;
        fx.run(hold_items, 0.1);
        let fb = fx.freebody(ball);
        assert!((fb.velocity.length() - THROW_SPEED).abs() < 1e-9);
        assert!(fb.velocity.x > 0.0 && fb.velocity.y < 0.0);
        assert_eq!(fx.world.get::<Collector>(player).unwrap().held_object(), None);
        assert!(!fx.world.get::<PlayerControl>(player).unwrap().releasing);
    }

    #[test]
    fn jump_boost_has_a_floor_and_a_ceiling() {
        let boosted = jump_boost(Vec2::new(10.0, 100.0), G);
        assert!(boosted.distance(Vec2::new(10.0, -JUMP_BOOSTER_SPEED)) < 1e-9);
        let boosted = jump_boost(Vec2::new(0.0, -300.0), G);
        assert!((boosted.y + JUMP_BOOSTER_SPEED * JUMP_BOOSTER_MAX_MULTIPLIER).abs() < 1e-9);
    }

    #[test]
    fn breakers_delete_platforms() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let platform = fx.world.spawn();
        fx.world.insert(platform, Platform::new(vec![Surface::new(Vec2::new(0.0, 20.0), Vec2::new(40.0, 20.0))]));
        let far = fx.world.spawn();
        fx.world.insert(far, Platform::new(vec![Surface::new(Vec2::new(0.0, 60.0), Vec2::new(40.0, 60.0))]));
        let breaker = fx.world.spawn();
        fx.world.insert(breaker, PhysicsComponent::with_state(FreeBody::at(Vec2::new(20.0, 22.0))));
        fx.world.insert(breaker, Item::holdable(HoldType::PlatformBreaker));
        fx.run(platform_breaking, 0.1);
        assert!(fx.world.is_requesting_deletion(platform));
        assert!(!fx.world.is_requesting_deletion(far));
    }

    #[test]
    fn crates_carry_a_surface_unless_held() {
        let mut fx = Fixture::new(LineMap::empty(4, 4, 16.0, 16.0));
        let holder = fx.world.spawn();
        let crate_e = fx.world.spawn();
        fx.world.insert(crate_e, PhysicsComponent::with_state(FreeBody::at(Vec2::new(30.0, 30.0))));
        fx.world.insert(crate_e, Item::holdable(HoldType::Crate));
        fx.run(crate_surfaces, 0.1);
        let view = WorldView::new(&fx.map, &fx.world, G);
        let top = view.surface(&SurfaceRef::entity(crate_e, 0)).unwrap();
        assert_eq!(top.a, Vec2::new(0.0, -30.0));

        fx.world
            .get_mut::<PhysicsComponent>(crate_e)
            .unwrap()
            .reset_state(HeldState::new(holder));
        fx.run(crate_surfaces, 0.1);
        assert!(!fx.world.has::<Platform>(crate_e));
    }

    #[test]
    fn recall_counts_down_outside_bounds() {
        let mut fx = Fixture::new(LineMap::empty(8, 8, 16.0, 16.0));
        let home = fx.world.spawn();
        fx.world.insert(home, PhysicsComponent::with_state(Rect::new(40.0, 40.0, 20.0, 20.0)));
        let ball = fx.world.spawn();
        fx.world.insert(ball, PhysicsComponent::with_state(FreeBody::new(Vec2::new(100.0, 100.0), Vec2::new(5.0, 0.0))));
        fx.world
            .insert(ball, ReturnPoint::new(home).with_recall(Rect::new(0.0, 0.0, 80.0, 80.0), 1.0));
        fx.run(recall, 0.6);
        assert_eq!(fx.freebody(ball).location, Vec2::new(100.0, 100.0));
        fx.run(recall, 0.6);
        assert_eq!(fx.freebody(ball), FreeBody::at(Vec2::new(50.0, 50.0)));
        fx.run(recall, 0.6);
        assert_eq!(fx.world.get::<ReturnPoint>(ball).unwrap().recall_time, 1.0);
    }

    #[test]
    fn doomed_references_are_released() {
        let mut fx = Fixture::new(LineMap::empty(8, 8, 16.0, 16.0));
        let platform = fx.world.spawn();
        fx.world.insert(platform, Platform::new(vec![Surface::new(Vec2::new(0.0, 50.0), Vec2::new(100.0, 50.0))]));
        let rider = fx.world.spawn();
        let tracker = LineTracker::new(SurfaceRef::entity(platform, 0), 0.5, 0.1).with_owner(rider);
        fx.world.insert(rider, PhysicsComponent::with_state(tracker));
        fx.world.insert(rider, ReturnPoint::new(platform));
        let mut collector = Collector::default();
        collector.set_held_object(Some(platform));
        fx.world.insert(rider, collector);

        fx.world.request_deletion(platform);
        fx.run(release_doomed_references, 0.1);
        fx.world.flush_deletions();

        let fb = fx.freebody(rider);
        assert_eq!(fb.location, Vec2::new(50.0, 50.0));
        assert_eq!(fb.velocity, Vec2::new(10.0, 0.0));
        assert!(!fx.world.has::<ReturnPoint>(rider));
        assert_eq!(fx.world.get::<Collector>(rider).unwrap().held_object(), None);
    }
}
