//! Per-entity scripts.
//!
//! A script is plain Rust behind the [`Script`] trait, stored on its entity
//! as a [`ScriptComponent`]. Systems call into it through [`with_script`],
//! which lends the script out of the world for the duration of the call so
//! the callback gets `&mut World` without aliasing itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::entities::{Collector, HoldType, Item, PlayerControl, ReturnPoint};
use crate::error::PhysicsError;
use crate::input::{ControlEvent, ControlMove};
use crate::line_map::{Layer, LineMap};
use crate::math::{Rect, Vec2};
use crate::physics::{PhysicsComponent, WorldView};
use crate::platform::{InterpolativePosition, SegmentPair};
use crate::trigger::{LauncherKind, TriggerBox};
use crate::world::{EntityId, World};

/// What a script callback may touch.
pub struct ScriptContext<'a> {
    /// Entity the script is attached to.
    pub entity: EntityId,
    pub world: &'a mut World,
    pub map: &'a LineMap,
    pub gravity: Vec2,
}

impl ScriptContext<'_> {
    pub fn view(&self) -> WorldView<'_> {
        WorldView::new(self.map, self.world, self.gravity)
    }

    /// Runs `f` on another entity's script, if it has one.
    pub fn with_script_of<F>(&mut self, entity: EntityId, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Script, &mut ScriptContext<'_>) -> Result<()>,
    {
        with_script(self.world, self.map, self.gravity, entity, f)
    }
}

/// Callbacks a scripted entity can react to. Everything defaults to doing
/// nothing.
///
/// Landing and departing are delivered after the collision pass that caused
/// them, so changing physics state from there never re-enters the resolver.
#[allow(unused_variables)]
pub trait Script {
    fn process_control_event(&mut self, ctx: &mut ScriptContext<'_>, event: ControlEvent) -> Result<()> {
        Ok(())
    }

    /// `other` landed on one of this entity's platform surfaces.
    fn on_landing(&mut self, ctx: &mut ScriptContext<'_>, hit_velocity: Vec2, other: EntityId) -> Result<()> {
        Ok(())
    }

    /// `other` left one of this entity's platform surfaces.
    fn on_departing(&mut self, ctx: &mut ScriptContext<'_>, other: EntityId) -> Result<()> {
        Ok(())
    }

    /// This entity was picked up by `holder`.
    fn on_held(&mut self, ctx: &mut ScriptContext<'_>, holder: EntityId) -> Result<()> {
        Ok(())
    }

    /// This entity was let go by `holder`.
    fn on_release(&mut self, ctx: &mut ScriptContext<'_>, holder: EntityId) -> Result<()> {
        Ok(())
    }

    /// `other` crossed into this entity's trigger box.
    fn on_enter_box(&mut self, ctx: &mut ScriptContext<'_>, other: EntityId) -> Result<()> {
        Ok(())
    }

    /// `other` is inside this entity's trigger box; called every tick.
    fn on_box_occupancy(&mut self, ctx: &mut ScriptContext<'_>, other: EntityId, et: f64) -> Result<()> {
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut ScriptContext<'_>, et: f64) -> Result<()> {
        Ok(())
    }
}

/// The script attached to an entity.
pub struct ScriptComponent(Box<dyn Script>);

impl ScriptComponent {
    pub fn new(script: impl Script + 'static) -> Self {
        Self(Box::new(script))
    }
}

impl fmt::Debug for ScriptComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptComponent(..)")
    }
}

/// Lends `entity`'s script to `f`.
///
/// The script is put back afterwards unless the entity died or the
/// callback installed a replacement. Entities without a script are skipped.
pub fn with_script<F>(world: &mut World, map: &LineMap, gravity: Vec2, entity: EntityId, f: F) -> Result<()>
where
    F: FnOnce(&mut dyn Script, &mut ScriptContext<'_>) -> Result<()>,
{
    let Some(mut component) = world.remove::<ScriptComponent>(entity) else {
        return Ok(());
    };
    let result = {
        let mut ctx = ScriptContext {
            entity,
            world: &mut *world,
            map,
            gravity,
        };
        f(component.0.as_mut(), &mut ctx)
    };
    if world.is_alive(entity) && !world.has::<ScriptComponent>(entity) {
        world.insert(entity, component);
    }
    result.with_context(|| format!("script on {:?}", entity))
}

// ----------------------------------------------------------------------------

/// Feeds control events into the player's [`PlayerControl`].
#[derive(Debug, Default)]
pub struct PlayerScript;

impl Script for PlayerScript {
    fn process_control_event(&mut self, ctx: &mut ScriptContext<'_>, event: ControlEvent) -> Result<()> {
        let holding = ctx
            .world
            .get::<Collector>(ctx.entity)
            .and_then(Collector::held_object)
            .is_some();
        let Some(pcon) = ctx.world.get_mut::<PlayerControl>(ctx.entity) else {
            return Ok(());
        };
        match event {
            ControlEvent::Press(ControlMove::MoveLeft) => pcon.press_left(),
            ControlEvent::Press(ControlMove::MoveRight) => pcon.press_right(),
            ControlEvent::Press(ControlMove::Jump) => pcon.jump_held = true,
            ControlEvent::Press(ControlMove::Use) => {
                pcon.grabbing = true;
                if holding {
                    pcon.will_release = true;
                }
            }
            ControlEvent::Release(ControlMove::MoveLeft) => pcon.release_left(),
            ControlEvent::Release(ControlMove::MoveRight) => pcon.release_right(),
            ControlEvent::Release(ControlMove::Jump) => pcon.jump_held = false,
            ControlEvent::Release(ControlMove::Use) => {
                pcon.grabbing = false;
                if pcon.will_release {
                    pcon.will_release = false;
                    pcon.releasing = true;
                }
            }
        }
        Ok(())
    }
}

fn is_simple_item(world: &World, entity: EntityId) -> bool {
    world
        .get::<Item>(entity)
        .is_some_and(|item| item.hold_type == HoldType::Simple)
}

/// A waypoint platform that sinks one point per simple item resting on it.
/// Reaching the last point removes its wall.
#[derive(Debug, Default)]
pub struct BasketScript {
    wall: Option<EntityId>,
    held_weight: i32,
    last_segment: Option<SegmentPair>,
}

impl BasketScript {
    pub fn new(wall: Option<EntityId>) -> Self {
        Self {
            wall,
            ..Self::default()
        }
    }

    pub fn held_weight(&self) -> i32 {
        self.held_weight
    }

    fn change_weight(&mut self, ctx: &mut ScriptContext<'_>, delta: i32) -> Result<()> {
        self.held_weight += delta;
        let intpos = ctx
            .world
            .get_mut::<InterpolativePosition>(ctx.entity)
            .ok_or(PhysicsError::MissingEntity(ctx.entity))
            .context("basket has no waypoint position")?;
        let last = intpos.point_count() - 1;
        let target = usize::try_from(self.held_weight.max(0)).unwrap_or(0).min(last);
        intpos.target_point(target)?;
        log::debug!("basket weight {} heading to waypoint {}", self.held_weight, target);
        Ok(())
    }
}

impl Script for BasketScript {
    fn on_landing(&mut self, ctx: &mut ScriptContext<'_>, _hit_velocity: Vec2, other: EntityId) -> Result<()> {
        if !is_simple_item(ctx.world, other) || ctx.world.is_requesting_deletion(ctx.entity) {
            return Ok(());
        }
        self.change_weight(ctx, 1)
    }

    fn on_departing(&mut self, ctx: &mut ScriptContext<'_>, other: EntityId) -> Result<()> {
        if !is_simple_item(ctx.world, other) || ctx.world.is_requesting_deletion(ctx.entity) {
            return Ok(());
        }
        self.change_weight(ctx, -1)
    }

    fn on_update(&mut self, ctx: &mut ScriptContext<'_>, _et: f64) -> Result<()> {
        let Some(intpos) = ctx.world.get::<InterpolativePosition>(ctx.entity) else {
            return Ok(());
        };
        let seg = intpos.current_segment();
        let last = intpos.point_count() - 1;
        if seg.source == seg.target && seg.target == last {
            if let Some(wall) = self.wall {
                ctx.world.request_deletion(wall);
            }
        }
        if self.last_segment != Some(seg) {
            log::trace!("basket on segment {} -> {}", seg.source, seg.target);
            self.last_segment = Some(seg);
        }
        Ok(())
    }
}

/// Which pan of a scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleSide {
    Left,
    Right,
}

/// Weights on both pans of a scale, shared by the two pan scripts.
#[derive(Debug, Default)]
pub struct ScalePivot {
    left_weight: i32,
    right_weight: i32,
}

impl ScalePivot {
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn weights(&self) -> (i32, i32) {
        (self.left_weight, self.right_weight)
    }

    /// Positive when the left pan is heavier.
    pub fn balance(&self) -> i32 {
        self.left_weight - self.right_weight
    }

    fn change(&mut self, side: ScaleSide, delta: i32) {
        match side {
            ScaleSide::Left => self.left_weight += delta,
            ScaleSide::Right => self.right_weight += delta,
        }
        log::debug!(
            "scale weights (l:r) ({}:{}) balance {}",
            self.left_weight,
            self.right_weight,
            self.balance()
        );
    }
}

/// One pan of a scale; counts whatever lands on it.
#[derive(Debug)]
pub struct ScalePartScript {
    side: ScaleSide,
    pivot: Rc<RefCell<ScalePivot>>,
}

impl ScalePartScript {
    pub fn new(side: ScaleSide, pivot: Rc<RefCell<ScalePivot>>) -> Self {
        Self { side, pivot }
    }
}

impl Script for ScalePartScript {
    fn on_landing(&mut self, _ctx: &mut ScriptContext<'_>, _hit_velocity: Vec2, _other: EntityId) -> Result<()> {
        self.pivot.borrow_mut().change(self.side, 1);
        Ok(())
    }

    fn on_departing(&mut self, _ctx: &mut ScriptContext<'_>, _other: EntityId) -> Result<()> {
        self.pivot.borrow_mut().change(self.side, -1);
        Ok(())
    }
}

/// Balloon item: once thrown it floats a fixed distance, stops and turns
/// into a launcher. Bouncing off that launcher calls the balloon home.
#[derive(Debug)]
pub struct BalloonScript {
    prepared: bool,
    stopped: bool,
    launch: Vec2,
    float_velocity: Vec2,
    float_distance: f64,
    float_distance_max: f64,
    last_location: Option<Vec2>,
    /// Entity carrying the launcher box while the balloon is stopped.
    bouncable: EntityId,
    radius: f64,
}

impl BalloonScript {
    pub fn new(bouncable: EntityId, radius: f64) -> Self {
        Self {
            prepared: false,
            stopped: false,
            launch: Vec2::ZERO,
            float_velocity: Vec2::ZERO,
            float_distance: 0.0,
            float_distance_max: 0.0,
            last_location: None,
            bouncable,
            radius,
        }
    }

    #[must_use]
    pub fn with_float(mut self, velocity: Vec2, distance: f64) -> Self {
        self.float_velocity = velocity;
        self.float_distance_max = distance;
        self
    }

    #[must_use]
    pub fn with_launch(mut self, launch: Vec2) -> Self {
        self.launch = launch;
        self
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn sync_bouncable(&self, world: &mut World, location: Vec2) {
        let top_left = location - Vec2::new(self.radius, self.radius);
        if let Some(rect) = world
            .get_mut::<PhysicsComponent>(self.bouncable)
            .and_then(PhysicsComponent::rect_mut)
        {
            rect.left = top_left.x;
            rect.top = top_left.y;
        }
    }
}

impl Script for BalloonScript {
    fn on_release(&mut self, ctx: &mut ScriptContext<'_>, holder: EntityId) -> Result<()> {
        self.prepared = true;
        let layer = ctx
            .world
            .get::<PhysicsComponent>(holder)
            .map_or(Layer::Foreground, |p| p.active_layer);
        let pcomp = ctx
            .world
            .get_mut::<PhysicsComponent>(ctx.entity)
            .ok_or(PhysicsError::MissingEntity(ctx.entity))?;
        pcomp.active_layer = layer;
        pcomp.expect_freebody_mut()?.velocity = self.float_velocity;
        if let Some(rt) = ctx.world.get_mut::<ReturnPoint>(ctx.entity) {
            rt.recall_time = f64::INFINITY;
        }
        if let Some(item) = ctx.world.get_mut::<Item>(ctx.entity) {
            item.hold_type = HoldType::NotHoldable;
        }
        self.float_distance = self.float_distance_max;
        self.stopped = false;
        self.last_location = None;
        Ok(())
    }

    fn on_enter_box(&mut self, ctx: &mut ScriptContext<'_>, _other: EntityId) -> Result<()> {
        if !self.prepared || !self.stopped {
            return Ok(());
        }
        if let Some(rt) = ctx.world.get_mut::<ReturnPoint>(ctx.entity) {
            rt.recall_time = 0.0;
        }
        if let Some(item) = ctx.world.get_mut::<Item>(ctx.entity) {
            item.hold_type = HoldType::Simple;
        }
        self.prepared = false;
        self.stopped = false;
        ctx.world.remove::<TriggerBox>(self.bouncable);
        if let Some(pcomp) = ctx.world.get_mut::<PhysicsComponent>(self.bouncable) {
            pcomp.reset_state(Rect::default());
        }
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut ScriptContext<'_>, _et: f64) -> Result<()> {
        if ctx.world.is_requesting_deletion(ctx.entity) || self.stopped || !self.prepared {
            return Ok(());
        }
        let location = ctx.view().location_of(ctx.entity)?;
        self.sync_bouncable(ctx.world, location);

        let Some(last) = self.last_location.replace(location) else {
            return Ok(());
        };
        self.float_distance -= last.distance(location);
        if self.float_distance >= 0.0 {
            return Ok(());
        }

        self.stopped = true;
        if let Some(fb) = ctx
            .world
            .get_mut::<PhysicsComponent>(ctx.entity)
            .and_then(PhysicsComponent::freebody_mut)
        {
            fb.velocity = Vec2::ZERO;
        }
        ctx.world
            .insert(self.bouncable, TriggerBox::Launcher(LauncherKind::Detacher, self.launch));
        let rect = Rect::new(0.0, 0.0, self.radius, self.radius);
        match ctx.world.get_mut::<PhysicsComponent>(self.bouncable) {
            Some(pcomp) => {
                pcomp.reset_state(rect);
            }
            None => ctx.world.insert(self.bouncable, PhysicsComponent::with_state(rect)),
        }
        self.sync_bouncable(ctx.world, location);
        log::debug!("balloon {:?} stopped at {:?}", ctx.entity, location);
        Ok(())
    }
}

/// Passes box crossings on to another entity's script.
#[derive(Debug)]
pub struct ForwardBoxHits {
    target: EntityId,
}

impl ForwardBoxHits {
    pub fn to(target: EntityId) -> Self {
        Self { target }
    }
}

impl Script for ForwardBoxHits {
    fn on_enter_box(&mut self, ctx: &mut ScriptContext<'_>, other: EntityId) -> Result<()> {
        ctx.with_script_of(self.target, |script, ctx| script.on_enter_box(ctx, other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::FreeBody;

    fn map() -> LineMap {
        LineMap::empty(4, 4, 16.0, 16.0)
    }

    #[test]
    fn player_script_drives_control_state() {
        let map = map();
        let mut world = World::new();
        let player = world.spawn();
        world.insert(player, PlayerControl::default());
        world.insert(player, Collector::default());
        world.insert(player, ScriptComponent::new(PlayerScript));

        let send = |world: &mut World, event| {
            with_script(world, &map, Vec2::ZERO, player, |s, ctx| s.process_control_event(ctx, event)).unwrap();
        };
        send(&mut world, ControlEvent::Press(ControlMove::MoveLeft));
        send(&mut world, ControlEvent::Press(ControlMove::Jump));
        let pcon = world.get::<PlayerControl>(player).unwrap();
        assert_eq!(pcon.direction(), -1.0);
        assert!(pcon.jump_held);

        let item = world.spawn();
        world.get_mut::<Collector>(player).unwrap().set_held_object(Some(item));
        send(&mut world, ControlEvent::Press(ControlMove::Use));
        send(&mut world, ControlEvent::Release(ControlMove::Use));
        let pcon = world.get::<PlayerControl>(player).unwrap();
        assert!(pcon.releasing);
        assert!(!pcon.grabbing);
        assert!(world.has::<ScriptComponent>(player));
    }

    #[test]
    fn basket_targets_one_point_per_simple_item() {
        let map = map();
        let mut world = World::new();
        let basket = world.spawn();
        world.insert(basket, InterpolativePosition::new(5));
        world.insert(basket, ScriptComponent::new(BasketScript::default()));
        let ball = world.spawn();
        world.insert(ball, Item::holdable(HoldType::Simple));
        let rock = world.spawn();
        world.insert(rock, Item::holdable(HoldType::Heavy));

        let land = |world: &mut World, other| {
            with_script(world, &map, Vec2::ZERO, basket, |s, ctx| s.on_landing(ctx, Vec2::ZERO, other)).unwrap();
        };
        land(&mut world, rock);
        assert_eq!(world.get::<InterpolativePosition>(basket).unwrap().targeted_point(), None);
        land(&mut world, ball);
        assert_eq!(world.get::<InterpolativePosition>(basket).unwrap().targeted_point(), Some(1));
        with_script(&mut world, &map, Vec2::ZERO, basket, |s, ctx| s.on_departing(ctx, ball)).unwrap();
        assert_eq!(world.get::<InterpolativePosition>(basket).unwrap().targeted_point(), Some(0));
    }

    #[test]
    fn scale_parts_share_weights() {
        let map = map();
        let mut world = World::new();
        let pivot = ScalePivot::shared();
        let left = world.spawn();
        let right = world.spawn();
        world.insert(left, ScriptComponent::new(ScalePartScript::new(ScaleSide::Left, pivot.clone())));
        world.insert(right, ScriptComponent::new(ScalePartScript::new(ScaleSide::Right, pivot.clone())));
        let thing = world.spawn();
        for _ in 0..2 {
            with_script(&mut world, &map, Vec2::ZERO, left, |s, ctx| s.on_landing(ctx, Vec2::ZERO, thing)).unwrap();
        }
        with_script(&mut world, &map, Vec2::ZERO, right, |s, ctx| s.on_landing(ctx, Vec2::ZERO, thing)).unwrap();
        assert_eq!(pivot.borrow().weights(), (2, 1));
        assert_eq!(pivot.borrow().balance(), 1);
    }

    #[test]
    fn balloon_floats_then_becomes_a_launcher() {
        let map = map();
        let mut world = World::new();
        let holder = world.spawn();
        world.insert(holder, PhysicsComponent::with_state(FreeBody::at(Vec2::ZERO)));
        let bouncable = world.spawn();
        let balloon = world.spawn();
        world.insert(balloon, PhysicsComponent::with_state(FreeBody::at(Vec2::new(10.0, 10.0))).without_gravity());
        world.insert(balloon, Item::holdable(HoldType::Simple));
        let script = BalloonScript::new(bouncable, 8.0)
            .with_float(Vec2::new(0.0, -10.0), 5.0)
            .with_launch(Vec2::new(0.0, -300.0));
        world.insert(balloon, ScriptComponent::new(script));
        world.insert(bouncable, ScriptComponent::new(ForwardBoxHits::to(balloon)));

        with_script(&mut world, &map, Vec2::ZERO, balloon, |s, ctx| s.on_release(ctx, holder)).unwrap();
        assert_eq!(world.get::<Item>(balloon).unwrap().hold_type, HoldType::NotHoldable);
        let velocity = world.get::<PhysicsComponent>(balloon).unwrap().freebody().unwrap().velocity;
        assert_eq!(velocity, Vec2::new(0.0, -10.0));

        for y in [10.0, 7.0, 4.0, 1.0] {
            world
                .get_mut::<PhysicsComponent>(balloon)
                .unwrap()
                .freebody_mut()
                .unwrap()
                .location = Vec2::new(10.0, y);
            with_script(&mut world, &map, Vec2::ZERO, balloon, |s, ctx| s.on_update(ctx, 0.1)).unwrap();
        }
        assert!(matches!(
            world.get::<TriggerBox>(bouncable),
            Some(TriggerBox::Launcher(LauncherKind::Detacher, _))
        ));
        let rect = *world.get::<PhysicsComponent>(bouncable).unwrap().rect().unwrap();
        assert_eq!(rect, Rect::new(2.0, -4.0, 8.0, 8.0));

        let player = world.spawn();
        with_script(&mut world, &map, Vec2::ZERO, bouncable, |s, ctx| s.on_enter_box(ctx, player)).unwrap();
        assert!(!world.has::<TriggerBox>(bouncable));
        assert_eq!(world.get::<Item>(balloon).unwrap().hold_type, HoldType::Simple);
    }

    #[test]
    fn script_is_dropped_with_its_entity() {
        let map = map();
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, ScriptComponent::new(PlayerScript));
        with_script(&mut world, &map, Vec2::ZERO, e, |_, ctx| {
            ctx.world.despawn(ctx.entity);
            Ok(())
        })
        .unwrap();
        assert!(!world.is_alive(e));
    }
}
