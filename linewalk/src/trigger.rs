//! Trigger boxes: rectangles that do something when a body crosses into
//! them.
//!
//! A box fires when a subject was outside it on the previous tick and the
//! path from its previous location to its current one crosses the
//! rectangle. Boxes with a script additionally get an occupancy callback
//! every tick a subject sits inside them.

use anyhow::Result;

use crate::consts::{K_ERROR, MAX_BOOST_SPEED};
use crate::entities::{Collector, PlayerControl, ReturnPoint};
use crate::error::PhysicsError;
use crate::line_map::LineMap;
use crate::math::{compute_velocities_to_target, line_crosses_rect, project_onto, rotate_vector, Rect, Vec2};
use crate::physics::{FreeBody, PhysicsComponent, PhysicsState, WorldView};
use crate::script::{with_script, ScriptComponent};
use crate::world::{EntityId, World};

/// How a launcher treats the body it launches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LauncherKind {
    /// Adds the launch vector, keeping the part of the current velocity
    /// perpendicular to it.
    Booster,
    /// Replaces the velocity outright.
    Detacher,
    /// Replaces the velocity and locks player control until the next landing.
    Setter,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TriggerBox {
    Launcher(LauncherKind, Vec2),
    /// Launches toward the center of `target`'s rectangle at `speed`.
    TargetedLauncher { target: EntityId, speed: f64 },
    /// Credits a collector and removes itself.
    ItemCollect { diamond: u32 },
    /// Becomes the return point of a player crossing it.
    Checkpoint,
    /// Only calls the box's script.
    ScriptHook,
}

/// Where a subject was at the end of the last trigger pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TriggerBoxSubjectHistory {
    last_location: Option<Vec2>,
}

impl TriggerBoxSubjectHistory {
    pub fn last_location(&self) -> Option<Vec2> {
        self.last_location
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Check {
    Checkpoint,
    Launcher,
    Item,
    Script,
    TargetedLauncher,
}

impl Check {
    const ORDER: [Check; 5] = [
        Check::Checkpoint,
        Check::Launcher,
        Check::Item,
        Check::Script,
        Check::TargetedLauncher,
    ];

    fn applies_to(self, world: &World, entity: EntityId) -> bool {
        let Some(tbox) = world.get::<TriggerBox>(entity) else {
            return false;
        };
        match self {
            Check::Checkpoint => matches!(tbox, TriggerBox::Checkpoint),
            Check::Launcher => matches!(tbox, TriggerBox::Launcher(..)),
            Check::Item => matches!(tbox, TriggerBox::ItemCollect { .. }),
            Check::Script => world.has::<ScriptComponent>(entity),
            Check::TargetedLauncher => matches!(tbox, TriggerBox::TargetedLauncher { .. }),
        }
    }
}

fn is_subject(pcomp: &PhysicsComponent) -> bool {
    matches!(pcomp.state(), PhysicsState::FreeBody(_) | PhysicsState::Tracker(_))
}

fn box_rect(world: &World, entity: EntityId) -> Option<Rect> {
    if !world.has::<TriggerBox>(entity) || world.is_requesting_deletion(entity) {
        return None;
    }
    world.get::<PhysicsComponent>(entity)?.rect().copied()
}

/// Did the motion `old -> new` enter `bounds`?
pub fn is_entering_box(old: Vec2, new: Vec2, bounds: &Rect) -> bool {
    !bounds.contains(old) && line_crosses_rect(bounds, old, new)
}

/// Runs every trigger box against every subject, then the occupancy
/// callbacks, then records where each subject ended up.
pub fn run_triggers(map: &LineMap, world: &mut World, gravity: Vec2, et: f64) -> Result<()> {
    let mut subjects = Vec::new();
    for (entity, pcomp) in world.query::<PhysicsComponent>() {
        if is_subject(pcomp) {
            subjects.push(entity);
        }
    }
    for &subject in &subjects {
        if !world.has::<TriggerBoxSubjectHistory>(subject) {
            world.insert(subject, TriggerBoxSubjectHistory::default());
        }
    }
    let boxes: Vec<EntityId> = world
        .entities_with::<TriggerBox>()
        .into_iter()
        .filter(|&e| box_rect(world, e).is_some())
        .collect();

    for check in Check::ORDER {
        let checked: Vec<EntityId> = boxes.iter().copied().filter(|&e| check.applies_to(world, e)).collect();
        if checked.is_empty() {
            continue;
        }
        for &subject in &subjects {
            for &tbox in &checked {
                check_box(map, world, gravity, check, tbox, subject)?;
            }
        }
    }

    for &tbox in &boxes {
        if !world.has::<ScriptComponent>(tbox) {
            continue;
        }
        for &subject in &subjects {
            let Some(bounds) = box_rect(world, tbox) else {
                break;
            };
            let Ok(location) = WorldView::new(map, world, gravity).location_of(subject) else {
                continue;
            };
            if bounds.contains(location) {
                with_script(world, map, gravity, tbox, |script, ctx| {
                    script.on_box_occupancy(ctx, subject, et)
                })?;
            }
        }
    }

    for &subject in &subjects {
        let location = match WorldView::new(map, world, gravity).location_of(subject) {
            Ok(location) => Some(location),
            Err(err) => {
                log::warn!("lost track of trigger subject {:?}: {}", subject, err);
                None
            }
        };
        if let Some(history) = world.get_mut::<TriggerBoxSubjectHistory>(subject) {
            history.last_location = location;
        }
    }
    Ok(())
}

fn check_box(
    map: &LineMap,
    world: &mut World,
    gravity: Vec2,
    check: Check,
    tbox: EntityId,
    subject: EntityId,
) -> Result<()> {
    let Some(bounds) = box_rect(world, tbox) else {
        return Ok(());
    };
    let Some(pcomp) = world.get::<PhysicsComponent>(subject) else {
        return Ok(());
    };
    if !is_subject(pcomp) {
        return Ok(());
    }
    let Some(old) = world
        .get::<TriggerBoxSubjectHistory>(subject)
        .and_then(TriggerBoxSubjectHistory::last_location)
    else {
        return Ok(());
    };
    let new = match WorldView::new(map, world, gravity).location(pcomp) {
        Ok(location) => location,
        Err(err) => {
            log::warn!("skipping trigger subject {:?}: {}", subject, err);
            return Ok(());
        }
    };
    let offset = if check == Check::Item {
        world
            .get::<Collector>(subject)
            .map_or(Vec2::ZERO, |c| c.collection_offset)
    } else {
        Vec2::ZERO
    };
    if check == Check::Item && !world.has::<Collector>(subject) {
        return Ok(());
    }
    if !is_entering_box(old + offset, new + offset, &bounds) {
        return Ok(());
    }

    let Some(kind) = world.get::<TriggerBox>(tbox).cloned() else {
        return Ok(());
    };
    match check {
        Check::Checkpoint => set_checkpoint(world, tbox, subject),
        Check::Launcher => {
            if let TriggerBox::Launcher(launcher, velocity) = kind {
                launch(map, world, gravity, subject, launcher, velocity)?;
            }
        }
        Check::Item => {
            if let TriggerBox::ItemCollect { diamond } = kind {
                if let Some(collector) = world.get_mut::<Collector>(subject) {
                    collector.diamond += diamond;
                    log::debug!("{:?} collected {} diamond(s), now {}", subject, diamond, collector.diamond);
                }
                world.request_deletion(tbox);
            }
        }
        Check::Script => {
            with_script(world, map, gravity, tbox, |script, ctx| script.on_enter_box(ctx, subject))?;
        }
        Check::TargetedLauncher => {
            if let TriggerBox::TargetedLauncher { target, speed } = kind {
                let target_bounds = world
                    .get::<PhysicsComponent>(target)
                    .and_then(PhysicsComponent::rect)
                    .copied()
                    .ok_or(PhysicsError::MissingEntity(target))?;
                let source = bounds.center();
                let (_, low) = compute_velocities_to_target(source, target_bounds.center(), gravity, speed);
                if !low.is_finite() {
                    return Err(PhysicsError::UnreachableTarget { speed }.into());
                }
                launch(map, world, gravity, subject, LauncherKind::Setter, low)?;
                if let Some(fb) = world
                    .get_mut::<PhysicsComponent>(subject)
                    .and_then(PhysicsComponent::freebody_mut)
                {
                    fb.location = source;
                }
            }
        }
    }
    Ok(())
}

fn set_checkpoint(world: &mut World, checkpoint: EntityId, subject: EntityId) {
    if !world.has::<PlayerControl>(subject) {
        return;
    }
    let Some(rt) = world.get_mut::<ReturnPoint>(subject) else {
        return;
    };
    if rt.target == checkpoint {
        return;
    }
    rt.target = checkpoint;
    log::info!("{:?} reached checkpoint {:?}", subject, checkpoint);
}

/// Free body just off the surface a tracker is on, carrying the tracker's
/// velocity. Free bodies come back unchanged.
fn detached(view: &WorldView<'_>, pcomp: &PhysicsComponent) -> Result<FreeBody, PhysicsError> {
    match pcomp.state() {
        PhysicsState::FreeBody(fb) => Ok(*fb),
        PhysicsState::Tracker(_) => {
            let location = view.location(pcomp)? + view.normal(pcomp)? * K_ERROR;
            Ok(FreeBody::new(location, view.velocity(pcomp)?))
        }
        _ => Err(PhysicsError::WrongState { expected: "free body or tracker" }),
    }
}

fn launch(
    map: &LineMap,
    world: &mut World,
    gravity: Vec2,
    subject: EntityId,
    kind: LauncherKind,
    launch_velocity: Vec2,
) -> Result<(), PhysicsError> {
    let mut freebody = {
        let view = WorldView::new(map, world, gravity);
        let pcomp = world
            .get::<PhysicsComponent>(subject)
            .ok_or(PhysicsError::MissingEntity(subject))?;
        detached(&view, pcomp)?
    };
    let current = freebody.velocity;
    freebody.velocity = match kind {
        LauncherKind::Booster => {
            let mut velocity = launch_velocity;
            if current != Vec2::ZERO {
                velocity += project_onto(current, rotate_vector(launch_velocity, std::f64::consts::FRAC_PI_2));
            }
            if velocity.length() > MAX_BOOST_SPEED {
                velocity = velocity.normalized() * MAX_BOOST_SPEED;
            }
            velocity
        }
        LauncherKind::Detacher => launch_velocity,
        LauncherKind::Setter => {
            if let Some(pcon) = world.get_mut::<PlayerControl>(subject) {
                pcon.lock_until_landing();
            }
            launch_velocity
        }
    };
    log::debug!("{:?} launched ({:?}) with {:?}", subject, kind, freebody.velocity);
    if let Some(pcomp) = world.get_mut::<PhysicsComponent>(subject) {
        // departing events from launches are not reported; the body leaves
        // the surface outside of collision
        pcomp.reset_state(freebody);
    }
    Ok(())
}
