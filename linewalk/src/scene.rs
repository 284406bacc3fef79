//! Spawning entities from the objects placed on a map.
//!
//! Every object `type` has a loader. Objects that name other objects (a
//! platform naming its waypoints, a launcher naming its target) are loaded
//! after the objects they name.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result};

use crate::assets::AssetCache;
use crate::consts::{
    BALLOON_RADIUS, DEFAULT_PLATFORM_SPEED, DEFAULT_RECALL_TIME, DEFAULT_TARGET_LAUNCH_SPEED, PLAYER_COLLECTION_OFFSET,
    PLAYER_HEAD_OFFSET,
};
use crate::entities::{Collector, HeadOffset, HoldType, Item, PlayerControl, ReturnPoint, Snake, Tint};
use crate::error::{ObjectError, PhysicsError};
use crate::line_map::LineMap;
use crate::map_loader::MapObject;
use crate::math::{compute_velocities_to_target, Rect, Vec2};
use crate::physics::{FreeBody, PhysicsComponent};
use crate::platform::{Behavior, InterpolativePosition, Platform, Waypoints};
use crate::script::{
    BalloonScript, BasketScript, ForwardBoxHits, PlayerScript, ScalePartScript, ScalePivot, ScaleSide, ScriptComponent,
};
use crate::surface::Surface;
use crate::trigger::{LauncherKind, TriggerBox};
use crate::world::{EntityId, World};

type LoadFn = fn(&mut ObjectLoader<'_>, &MapObject) -> Result<Option<EntityId>>;

/// A loadable object type.
struct ObjectKind {
    name: &'static str,
    /// Properties whose values name other objects.
    requires: &'static [&'static str],
    load: LoadFn,
}

const OBJECT_KINDS: &[ObjectKind] = &[
    ObjectKind { name: "player-start", requires: &[], load: load_player_start },
    ObjectKind { name: "snake", requires: &[], load: load_snake },
    ObjectKind { name: "coin", requires: &[], load: load_coin },
    ObjectKind { name: "diamond", requires: &[], load: load_diamond },
    ObjectKind { name: "launcher", requires: &["set-target"], load: load_launcher },
    ObjectKind { name: "platform", requires: &["waypoints"], load: load_platform },
    ObjectKind { name: "waypoints", requires: &[], load: load_waypoints },
    ObjectKind { name: "wall", requires: &[], load: load_wall },
    ObjectKind { name: "ball", requires: &[], load: load_ball },
    ObjectKind { name: "basket", requires: &["waypoints", "wall"], load: load_basket },
    ObjectKind { name: "checkpoint", requires: &[], load: load_checkpoint },
    ObjectKind { name: "scale-pivot", requires: &[], load: load_scale_pivot },
    ObjectKind { name: "scale-left", requires: &["scale-pivot"], load: load_scale_left },
    ObjectKind { name: "scale-right", requires: &["scale-pivot"], load: load_scale_right },
    ObjectKind { name: "rectangle", requires: &[], load: load_rectangle },
    ObjectKind { name: "balloon", requires: &[], load: load_balloon },
];

fn object_kind(name: &str) -> Option<&'static ObjectKind> {
    OBJECT_KINDS.iter().find(|kind| kind.name == name)
}

/// Result of spawning a map's objects.
#[derive(Debug, Default, PartialEq)]
pub struct SceneLoad {
    /// The last `player-start` loaded.
    pub player: Option<EntityId>,
    /// Number of entities created.
    pub spawned: usize,
}

/// Spawn `objects` into `world`, dependencies first.
pub fn load_objects(world: &mut World, map: &LineMap, gravity: Vec2, objects: &[MapObject]) -> Result<SceneLoad> {
    let order = load_order(objects)?;
    let mut loader = ObjectLoader::new(world, gravity);
    let map_bounds = map.bounds();
    for index in order {
        let obj = &objects[index];
        if obj.kind != "waypoints" && !map_bounds.contains(obj.bounds.center()) {
            log::warn!("{} object \"{}\" lies outside the map", obj.kind, obj.name);
        }
        let kind = object_kind(&obj.kind).ok_or_else(|| ObjectError::UnknownType {
            name: obj.name.clone(),
            kind: obj.kind.clone(),
        })?;
        let entity = (kind.load)(&mut loader, obj)
            .with_context(|| format!("failed to load {} object \"{}\"", obj.kind, obj.name))?;
        if let Some(entity) = entity.filter(|_| !obj.name.is_empty()) {
            if loader.named.insert(obj.name.clone(), entity).is_some() {
                log::warn!("more than one object is named \"{}\"; the last one wins", obj.name);
            }
        }
    }
    log::info!(
        "loaded {} map objects into {} entities ({} waypoint sets)",
        objects.len(),
        loader.spawned,
        loader.waypoint_sets.len()
    );
    Ok(SceneLoad {
        player: loader.player,
        spawned: loader.spawned,
    })
}

/// Indices of `objects` in an order where every object comes after the
/// objects it names: sorted by dependency depth, ties kept in file order.
pub fn load_order(objects: &[MapObject]) -> Result<Vec<usize>, ObjectError> {
    let mut by_name = BTreeMap::new();
    for (index, obj) in objects.iter().enumerate() {
        if object_kind(&obj.kind).is_none() {
            return Err(ObjectError::UnknownType {
                name: obj.name.clone(),
                kind: obj.kind.clone(),
            });
        }
        if !obj.name.is_empty() {
            by_name.entry(obj.name.as_str()).or_insert(index);
        }
    }

    let mut dependencies = Vec::with_capacity(objects.len());
    for obj in objects {
        let mut deps = Vec::new();
        let requires = object_kind(&obj.kind).map_or(&[][..], |kind| kind.requires);
        for property in requires {
            let Some(dependency) = obj.property(property) else {
                continue;
            };
            let index = by_name.get(dependency).ok_or_else(|| ObjectError::MissingDependency {
                object: obj.name.clone(),
                dependency: dependency.to_string(),
            })?;
            deps.push(*index);
        }
        dependencies.push(deps);
    }

    let mut depths = vec![None; objects.len()];
    let mut stack = Vec::new();
    for index in 0..objects.len() {
        dependency_depth(index, &dependencies, &mut depths, &mut stack, objects)?;
    }
    let mut order: Vec<usize> = (0..objects.len()).collect();
    order.sort_by_key(|&index| depths[index].unwrap_or(0));
    Ok(order)
}

fn dependency_depth(
    index: usize,
    dependencies: &[Vec<usize>],
    depths: &mut [Option<usize>],
    stack: &mut Vec<usize>,
    objects: &[MapObject],
) -> Result<usize, ObjectError> {
    if let Some(depth) = depths[index] {
        return Ok(depth);
    }
    if let Some(pos) = stack.iter().position(|&i| i == index) {
        let cycle = stack[pos..].iter().map(|&i| objects[i].name.clone()).collect();
        return Err(ObjectError::DependencyCycle(cycle));
    }
    stack.push(index);
    let mut depth = 0;
    for &dep in &dependencies[index] {
        depth = depth.max(dependency_depth(dep, dependencies, depths, stack, objects)? + 1);
    }
    stack.pop();
    depths[index] = Some(depth);
    Ok(depth)
}

/// Parse `"x, y"`.
pub fn parse_vector(text: &str) -> Result<Vec2, ObjectError> {
    let bad = || ObjectError::BadVector(text.to_string());
    let mut parts = text.split(',').map(str::trim);
    let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(bad());
    };
    Ok(Vec2::new(x.parse().map_err(|_| bad())?, y.parse().map_err(|_| bad())?))
}

pub fn parse_number(text: &str) -> Result<f64, ObjectError> {
    text.trim()
        .parse()
        .map_err(|_| ObjectError::BadNumber(text.to_string()))
}

/// Parse `"left, top, width, height"`.
fn parse_rect(text: &str) -> Result<Rect, ObjectError> {
    let numbers = text
        .split(',')
        .map(parse_number)
        .collect::<Result<Vec<_>, _>>()?;
    match numbers[..] {
        [left, top, width, height] => Ok(Rect::new(left, top, width, height)),
        _ => Err(ObjectError::BadNumber(text.to_string())),
    }
}

fn required<'o>(obj: &'o MapObject, property: &str) -> Result<&'o str, ObjectError> {
    obj.property(property).ok_or_else(|| ObjectError::MissingProperty {
        name: obj.name.clone(),
        property: property.to_string(),
    })
}

/// Spawning state shared by all loaders during one load.
struct ObjectLoader<'a> {
    world: &'a mut World,
    gravity: Vec2,
    rng: fastrand::Rng,
    named: BTreeMap<String, EntityId>,
    waypoints: AssetCache<Vec<Vec2>>,
    /// Strong handles keeping waypoint sets alive until their platforms are
    /// loaded.
    waypoint_sets: Vec<Rc<Vec<Vec2>>>,
    pivots: BTreeMap<String, Rc<RefCell<ScalePivot>>>,
    player: Option<EntityId>,
    spawned: usize,
}

impl<'a> ObjectLoader<'a> {
    fn new(world: &'a mut World, gravity: Vec2) -> Self {
        Self {
            world,
            gravity,
            rng: fastrand::Rng::with_seed(0xDEAD_BEEF),
            named: BTreeMap::new(),
            waypoints: AssetCache::new(),
            waypoint_sets: Vec::new(),
            pivots: BTreeMap::new(),
            player: None,
            spawned: 0,
        }
    }

    fn spawn(&mut self) -> EntityId {
        self.spawned += 1;
        self.world.spawn()
    }

    fn random_tint(&mut self) -> Tint {
        Tint::random(&mut self.rng)
    }

    fn named(&self, obj: &MapObject, property: &str) -> Result<Option<EntityId>, ObjectError> {
        let Some(name) = obj.property(property) else {
            return Ok(None);
        };
        self.named
            .get(name)
            .copied()
            .map(Some)
            .ok_or_else(|| ObjectError::MissingDependency {
                object: obj.name.clone(),
                dependency: name.to_string(),
            })
    }

    fn waypoints_for(&self, obj: &MapObject) -> Result<Option<Waypoints>, ObjectError> {
        let Some(name) = obj.property("waypoints") else {
            return Ok(None);
        };
        let points = self.waypoints.get(name).ok_or_else(|| ObjectError::MissingDependency {
            object: obj.name.clone(),
            dependency: name.to_string(),
        })?;
        Ok(Some(Waypoints::shared(points)))
    }

    fn set_player(&mut self, player: EntityId) {
        if let Some(old) = self.player.replace(player) {
            log::warn!("more than one player start; {:?} replaces {:?}", player, old);
            self.world.request_deletion(old);
        }
    }
}

fn rect_entity(loader: &mut ObjectLoader<'_>, bounds: Rect) -> EntityId {
    let e = loader.spawn();
    loader.world.insert(e, PhysicsComponent::with_state(bounds));
    e
}

/// Floor across the middle of `bounds`, in platform-local space around its
/// center.
fn floor_surface(bounds: &Rect) -> Surface {
    let half = bounds.width * 0.5;
    Surface::new(Vec2::new(-half, 0.0), Vec2::new(half, 0.0))
}

fn load_player_start(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let start_point = rect_entity(loader, obj.bounds);
    let e = loader.spawn();
    let tint = loader.random_tint();
    let world = &mut *loader.world;
    world.insert(e, PlayerControl::default());
    world.insert(e, PhysicsComponent::with_state(FreeBody::at(obj.bounds.center())));
    world.insert(e, Collector::with_offset(PLAYER_COLLECTION_OFFSET));
    world.insert(e, HeadOffset(PLAYER_HEAD_OFFSET));
    world.insert(e, tint);
    world.insert(e, ReturnPoint::new(start_point));
    world.insert(e, ScriptComponent::new(PlayerScript));
    loader.set_player(e);
    Ok(Some(e))
}

fn load_snake(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let mut snake = Snake::new(obj.bounds.center());
    snake.begin_tint = loader.random_tint();
    snake.end_tint = loader.random_tint();
    let e = loader.spawn();
    loader.world.insert(e, snake);
    Ok(Some(e))
}

fn load_coin(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let e = loader.spawn();
    let tint = loader.random_tint();
    loader
        .world
        .insert(e, PhysicsComponent::with_state(FreeBody::at(obj.bounds.center())));
    loader.world.insert(e, tint);
    Ok(Some(e))
}

fn load_diamond(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let diamond = match obj.property("diamond") {
        Some(text) => parse_number(text)?.max(0.0) as u32,
        None => 1,
    };
    let e = rect_entity(loader, obj.bounds);
    loader.world.insert(e, TriggerBox::ItemCollect { diamond });
    Ok(Some(e))
}

fn load_launcher(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let tbox = if let Some(text) = obj.property("launch") {
        TriggerBox::Launcher(LauncherKind::Detacher, parse_vector(text)?)
    } else if let Some(text) = obj.property("boost") {
        TriggerBox::Launcher(LauncherKind::Booster, parse_vector(text)?)
    } else if let Some(text) = obj.property("set") {
        TriggerBox::Launcher(LauncherKind::Setter, parse_vector(text)?)
    } else if let Some(target) = loader.named(obj, "set-target")? {
        let speed = match obj.property("speed") {
            Some(text) => parse_number(text)?,
            None => DEFAULT_TARGET_LAUNCH_SPEED,
        };
        let target_bounds = loader
            .world
            .get::<PhysicsComponent>(target)
            .and_then(PhysicsComponent::rect)
            .copied()
            .ok_or(PhysicsError::WrongState { expected: "rectangle" })
            .context("launcher target must be a rectangle")?;
        let (_, low) = compute_velocities_to_target(obj.bounds.center(), target_bounds.center(), loader.gravity, speed);
        if !low.is_finite() {
            return Err(PhysicsError::UnreachableTarget { speed }.into());
        }
        TriggerBox::TargetedLauncher { target, speed }
    } else {
        return Err(ObjectError::MissingProperty {
            name: obj.name.clone(),
            property: "launch".to_string(),
        }
        .into());
    };
    let e = rect_entity(loader, obj.bounds);
    loader.world.insert(e, tbox);
    Ok(Some(e))
}

/// Waypoint position for a platform or basket, starting where `obj` says.
fn waypoint_position(obj: &MapObject, points: &Waypoints, behavior: Behavior) -> Result<InterpolativePosition> {
    let speed = match obj.property("speed") {
        Some(text) => parse_number(text)?,
        None => DEFAULT_PLATFORM_SPEED,
    };
    let mut intpos = InterpolativePosition::new(points.len()).with_speed(speed);
    intpos.set_behavior(behavior)?;
    if let Some(text) = obj.property("position") {
        intpos.set_whole_position(parse_number(text)?)?;
    }
    Ok(intpos)
}

fn load_platform(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let mut platform = Platform::new(vec![floor_surface(&obj.bounds)]);
    let e = loader.spawn();
    match loader.waypoints_for(obj)? {
        Some(points) => {
            let behavior = match obj.property("cycle-behavior") {
                Some(name) => Behavior::from_name(name).ok_or_else(|| ObjectError::BadBehavior(name.to_string()))?,
                None => Behavior::Cycles,
            };
            let intpos = waypoint_position(obj, &points, behavior)?;
            platform.set_offset(points.location_of(&intpos)?);
            loader.world.insert(e, points);
            loader.world.insert(e, intpos);
        }
        None => platform.set_offset(obj.bounds.center()),
    }
    loader.world.insert(e, platform);
    Ok(Some(e))
}

fn load_waypoints(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    if obj.name.is_empty() {
        return Err(ObjectError::MissingProperty {
            name: obj.name.clone(),
            property: "name".to_string(),
        }
        .into());
    }
    if obj.points.len() < 2 {
        log::warn!("waypoints \"{}\" has fewer than two points", obj.name);
    }
    let points = loader.waypoints.insert(&obj.name, obj.points.clone());
    loader.waypoint_sets.push(points);
    Ok(None)
}

fn load_wall(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let half = obj.bounds.height * 0.5;
    let mut platform = Platform::new(vec![Surface::new(Vec2::new(0.0, -half), Vec2::new(0.0, half))]);
    platform.set_offset(obj.bounds.center());
    let e = loader.spawn();
    loader.world.insert(e, platform);
    Ok(Some(e))
}

fn load_ball(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let hold_type = match obj.property("ball-type") {
        Some(name) => HoldType::from_name(name).ok_or_else(|| ObjectError::BadHoldType(name.to_string()))?,
        None => HoldType::Simple,
    };
    let recall_time = match obj.property("recall-time") {
        Some(text) => parse_number(text)?,
        None => DEFAULT_RECALL_TIME,
    };
    let recall_bounds = obj.property("recall-bounds").map(parse_rect).transpose()?;

    let home = rect_entity(loader, obj.bounds);
    let mut return_point = ReturnPoint::new(home);
    if let Some(bounds) = recall_bounds {
        return_point = return_point.with_recall(bounds, recall_time);
    }
    let e = loader.spawn();
    loader
        .world
        .insert(e, PhysicsComponent::with_state(FreeBody::at(obj.bounds.center())));
    loader.world.insert(e, Item::holdable(hold_type));
    loader.world.insert(e, Tint::new(200, 100, 100));
    loader.world.insert(e, return_point);
    Ok(Some(e))
}

fn load_basket(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let points = loader.waypoints_for(obj)?.ok_or_else(|| ObjectError::MissingProperty {
        name: obj.name.clone(),
        property: "waypoints".to_string(),
    })?;
    let wall = loader.named(obj, "wall")?;
    let intpos = waypoint_position(obj, &points, Behavior::TowardDestination(0))?;
    let mut platform = Platform::new(vec![floor_surface(&obj.bounds)]);
    platform.set_offset(points.location_of(&intpos)?);

    let e = loader.spawn();
    loader.world.insert(e, platform);
    loader.world.insert(e, points);
    loader.world.insert(e, intpos);
    loader.world.insert(e, ScriptComponent::new(BasketScript::new(wall)));
    Ok(Some(e))
}

fn load_checkpoint(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let e = rect_entity(loader, obj.bounds);
    loader.world.insert(e, TriggerBox::Checkpoint);
    Ok(Some(e))
}

fn load_scale_pivot(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    if obj.name.is_empty() {
        return Err(ObjectError::MissingProperty {
            name: obj.name.clone(),
            property: "name".to_string(),
        }
        .into());
    }
    loader.pivots.insert(obj.name.clone(), ScalePivot::shared());
    Ok(Some(rect_entity(loader, obj.bounds)))
}

fn load_scale_part(loader: &mut ObjectLoader<'_>, obj: &MapObject, side: ScaleSide) -> Result<Option<EntityId>> {
    let pivot_name = required(obj, "scale-pivot")?;
    let pivot = loader
        .pivots
        .get(pivot_name)
        .cloned()
        .ok_or_else(|| ObjectError::MissingDependency {
            object: obj.name.clone(),
            dependency: pivot_name.to_string(),
        })?;
    let mut platform = Platform::new(vec![floor_surface(&obj.bounds)]);
    platform.set_offset(obj.bounds.center());
    let e = loader.spawn();
    loader.world.insert(e, platform);
    loader
        .world
        .insert(e, ScriptComponent::new(ScalePartScript::new(side, pivot)));
    Ok(Some(e))
}

fn load_scale_left(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    load_scale_part(loader, obj, ScaleSide::Left)
}

fn load_scale_right(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    load_scale_part(loader, obj, ScaleSide::Right)
}

fn load_rectangle(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    Ok(Some(rect_entity(loader, obj.bounds)))
}

/// `float` is `"vx, vy : distance"`.
fn parse_float(text: &str) -> Result<(Vec2, f64), ObjectError> {
    let (velocity, distance) = text
        .split_once(':')
        .ok_or_else(|| ObjectError::BadVector(text.to_string()))?;
    Ok((parse_vector(velocity)?, parse_number(distance)?))
}

fn load_balloon(loader: &mut ObjectLoader<'_>, obj: &MapObject) -> Result<Option<EntityId>> {
    let recall_bounds = obj.bounds.expanded(BALLOON_RADIUS);
    let home = rect_entity(loader, recall_bounds);
    let e = loader.spawn();
    let bouncable = loader.spawn();

    let mut script = BalloonScript::new(bouncable, BALLOON_RADIUS);
    if let Some(text) = obj.property("float") {
        let (velocity, distance) = parse_float(text)?;
        script = script.with_float(velocity, distance);
    }
    if let Some(text) = obj.property("launch") {
        script = script.with_launch(parse_vector(text)?);
    }

    let tint = loader.random_tint();
    let world = &mut *loader.world;
    world.insert(
        e,
        PhysicsComponent::with_state(FreeBody::at(obj.bounds.center())).without_gravity(),
    );
    world.insert(e, ReturnPoint::new(home).with_recall(recall_bounds, f64::INFINITY));
    world.insert(e, Item::holdable(HoldType::Simple));
    world.insert(e, tint);
    world.insert(e, ScriptComponent::new(script));
    world.insert(bouncable, ScriptComponent::new(ForwardBoxHits::to(e)));
    Ok(Some(e))
}
