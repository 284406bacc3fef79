use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use linewalk::collision::run_collision;
use linewalk::entities::{Collector, HoldType, Item, PlayerControl, ReturnPoint};
use linewalk::grid::{Grid, GridCoord};
use linewalk::line_map::{LineMapLayer, TransitionTileType};
use linewalk::script::{BasketScript, Script, ScriptContext};
use linewalk::surface::SurfaceDetails;
use linewalk::trigger::{run_triggers, LauncherKind, TriggerBox};
use linewalk::{
    load_map, Behavior, Engine, EntityId, FreeBody, InterpolativePosition, Layer, LineMap, LineTracker,
    PhysicsComponent, PhysicsState, Platform, Rect, ScriptComponent, Surface, SurfaceEvents, SurfaceRef,
    TileMapDescription, Vec2, Waypoints, World,
};

const G: Vec2 = Vec2::new(0.0, 667.0);
const TILE: f64 = 16.0;

/// 16px-tile map holding `surfaces` (world space) on both layers. Each
/// surface is filed under every tile its bounding box touches.
fn map_with(width: usize, height: usize, surfaces: &[Surface]) -> LineMap {
    let mut arena = Vec::new();
    let mut views = Grid::new(width, height, 0..0);
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let origin = Vec2::new(f64::from(x) * TILE, f64::from(y) * TILE);
            let tile = Rect::new(origin.x, origin.y, TILE, TILE);
            let start = arena.len();
            for s in surfaces {
                let touches = s.a.x.min(s.b.x) <= tile.right()
                    && s.a.x.max(s.b.x) >= tile.left
                    && s.a.y.min(s.b.y) < tile.bottom()
                    && s.a.y.max(s.b.y) >= tile.top;
                if touches {
                    arena.push(s.translated(-origin));
                }
            }
            views.set(GridCoord::new(x, y), start..arena.len());
        }
    }
    LineMap::new(
        TILE,
        TILE,
        arena,
        LineMapLayer::new(views.clone()),
        LineMapLayer::new(views),
        Grid::new(width, height, TransitionTileType::None),
    )
    .unwrap()
}

fn pcomp(world: &World, e: EntityId) -> &PhysicsComponent {
    world.get::<PhysicsComponent>(e).unwrap()
}

#[test]
fn falling_body_lands_in_the_middle_of_the_floor() {
    let map = map_with(16, 16, &[Surface::new(Vec2::new(0.0, 100.0), Vec2::new(200.0, 100.0))]);
    let mut engine = Engine::new(map).with_gravity(G);
    let body = engine.world_mut().spawn();
    engine.world_mut().insert(
        body,
        PhysicsComponent::with_state(FreeBody::new(Vec2::new(100.0, 0.0), Vec2::new(0.0, 200.0)))
            .with_bounce_threshold(f64::INFINITY),
    );

    let mut landed = None;
    for _ in 0..10 {
        engine.tick(0.1).unwrap();
        if let Some(tracker) = pcomp(engine.world(), body).tracker() {
            landed = Some(tracker.clone());
            break;
        }
    }
    let tracker = landed.expect("body never landed");
    assert!((tracker.position - 0.5).abs() < 1e-6);
    assert!(tracker.speed.abs() < 1e-6);
    assert!(!tracker.inverted_normal);
}

#[test]
fn tracker_runs_onto_the_connected_ramp() {
    let slick = SurfaceDetails {
        friction: 0.0,
        stop_speed: 0.0,
        hard_ceiling: false,
    };
    let map = LineMap::empty(16, 16, TILE, TILE);
    let mut world = World::new();
    let ground = world.spawn();
    world.insert(
        ground,
        Platform::new(vec![
            Surface::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 0.0)).with_details(slick),
            Surface::new(Vec2::new(100.0, 0.0), Vec2::new(200.0, -50.0)).with_details(slick),
        ]),
    );
    let body = world.spawn();
    world.insert(
        body,
        PhysicsComponent::with_state(LineTracker::new(SurfaceRef::entity(ground, 0), 0.9, 2.0)),
    );

    let events = SurfaceEvents::new();
    run_collision(&map, &mut world, G, 0.1, events.sender());

    let tracker = pcomp(&world, body).tracker().cloned().expect("still tracking");
    assert_eq!(tracker.surface_ref(), SurfaceRef::entity(ground, 1));
    let ramp_length = Vec2::new(100.0, -50.0).length();
    assert!((tracker.speed * ramp_length - 200.0).abs() < 1e-6);
    // the leftover twentieth of a second is spent on the ramp
    assert!((tracker.position - 0.05 * 200.0 / ramp_length).abs() < 1e-3);
    assert!(events.is_empty());
}

#[test]
fn resting_tracker_stays_put() {
    let map = LineMap::empty(16, 16, TILE, TILE);
    let mut engine = Engine::new(map).with_gravity(G);
    let world = engine.world_mut();
    let floor = world.spawn();
    world.insert(floor, Platform::new(vec![Surface::new(Vec2::new(0.0, 100.0), Vec2::new(200.0, 100.0))]));
    let body = world.spawn();
    world.insert(
        body,
        PhysicsComponent::with_state(LineTracker::new(SurfaceRef::entity(floor, 0), 0.3, 0.0)),
    );

    engine.tick(1.0).unwrap();
    let tracker = pcomp(engine.world(), body).tracker().cloned().unwrap();
    assert_eq!(tracker.speed, 0.0);
    assert_eq!(tracker.position, 0.3);
}

#[test]
fn booster_launches_a_running_player() {
    let map = map_with(16, 16, &[Surface::new(Vec2::new(0.0, 100.0), Vec2::new(200.0, 100.0))]);
    let floor = SurfaceRef::map(Layer::Foreground, GridCoord::new(0, 6), 0);
    let mut world = World::new();
    let launcher = world.spawn();
    world.insert(launcher, PhysicsComponent::with_state(Rect::new(100.0, 80.0, 10.0, 40.0)));
    world.insert(launcher, TriggerBox::Launcher(LauncherKind::Booster, Vec2::new(0.0, -467.0)));
    let player = world.spawn();
    world.insert(player, PlayerControl::default());
    world.insert(
        player,
        PhysicsComponent::with_state(LineTracker::new(floor, 0.45, 0.5)),
    );

    // first pass records where the player was
    run_triggers(&map, &mut world, G, 0.1).unwrap();
    world
        .get_mut::<PhysicsComponent>(player)
        .unwrap()
        .tracker_mut()
        .unwrap()
        .position = 0.52;
    run_triggers(&map, &mut world, G, 0.1).unwrap();

    let fb = pcomp(&world, player).freebody().copied().expect("launched");
    assert!((fb.velocity.y + 467.0).abs() < 1e-9);
    // half a segment per second along a 200px floor
    assert!((fb.velocity.x - 100.0).abs() < 1e-9);
    assert!((fb.location.x - 104.0).abs() < 1e-3);
    assert!(fb.location.y < 100.0);
}

#[test]
fn body_below_the_map_returns_to_its_recall_point() {
    let map = LineMap::empty(8, 8, TILE, TILE);
    let mut engine = Engine::new(map).with_gravity(G);
    let world = engine.world_mut();
    let home = world.spawn();
    world.insert(home, PhysicsComponent::with_state(Rect::new(40.0, 40.0, 20.0, 20.0)));
    let body = world.spawn();
    world.insert(
        body,
        PhysicsComponent::with_state(FreeBody::new(Vec2::new(64.0, 127.0), Vec2::new(30.0, 300.0))),
    );
    world.insert(body, ReturnPoint::new(home));

    engine.tick(0.1).unwrap();
    let fb = pcomp(engine.world(), body).freebody().copied().unwrap();
    assert_eq!(fb.location, Vec2::new(50.0, 50.0));
    assert_eq!(fb.velocity, Vec2::ZERO);
    assert!(engine.world().is_alive(body));
}

#[test]
fn straying_body_is_recalled_when_its_timer_runs_out() {
    let map = LineMap::empty(16, 16, TILE, TILE);
    let mut engine = Engine::new(map).with_gravity(Vec2::ZERO);
    let world = engine.world_mut();
    let home = world.spawn();
    world.insert(home, PhysicsComponent::with_state(Rect::new(40.0, 40.0, 20.0, 20.0)));
    let body = world.spawn();
    world.insert(
        body,
        PhysicsComponent::with_state(FreeBody::new(Vec2::new(150.0, 150.0), Vec2::new(10.0, 0.0))),
    );
    world.insert(body, ReturnPoint::new(home).with_recall(Rect::new(0.0, 0.0, 100.0, 100.0), 0.5));

    engine.tick(0.25).unwrap();
    assert_ne!(pcomp(engine.world(), body).freebody().unwrap().location, Vec2::new(50.0, 50.0));
    engine.tick(0.25).unwrap();
    let fb = pcomp(engine.world(), body).freebody().copied().unwrap();
    assert_eq!(fb.location, Vec2::new(50.0, 50.0));
    assert_eq!(fb.velocity, Vec2::ZERO);
}

/// Throws whatever lands on it straight back up.
struct Springboard {
    landings: Rc<Cell<u32>>,
    departures: Rc<Cell<u32>>,
}

impl Script for Springboard {
    fn on_landing(&mut self, ctx: &mut ScriptContext<'_>, _hit_velocity: Vec2, other: EntityId) -> anyhow::Result<()> {
        self.landings.set(self.landings.get() + 1);
        let at = ctx.view().location_of(other)?;
        if let Some(pcomp) = ctx.world.get_mut::<PhysicsComponent>(other) {
            pcomp.reset_state(FreeBody::new(at, Vec2::new(0.0, -300.0)));
        }
        Ok(())
    }

    fn on_departing(&mut self, _ctx: &mut ScriptContext<'_>, _other: EntityId) -> anyhow::Result<()> {
        self.departures.set(self.departures.get() + 1);
        Ok(())
    }
}

#[test]
fn landing_callback_changes_take_effect_next_tick() {
    let map = LineMap::empty(16, 16, TILE, TILE);
    let mut engine = Engine::new(map).with_gravity(G);
    let landings = Rc::new(Cell::new(0));
    let departures = Rc::new(Cell::new(0));
    let world = engine.world_mut();
    let board = world.spawn();
    world.insert(board, Platform::new(vec![Surface::new(Vec2::new(0.0, 100.0), Vec2::new(200.0, 100.0))]));
    world.insert(
        board,
        ScriptComponent::new(Springboard {
            landings: landings.clone(),
            departures: departures.clone(),
        }),
    );
    let body = world.spawn();
    world.insert(
        body,
        PhysicsComponent::with_state(FreeBody::new(Vec2::new(100.0, 90.0), Vec2::new(0.0, 200.0))),
    );

    engine.tick(0.1).unwrap();
    assert_eq!(landings.get(), 1);
    assert_eq!(departures.get(), 0);
    // thrown from where it landed, but not moved by the throw yet
    let fb = pcomp(engine.world(), body).freebody().copied().expect("thrown");
    assert!(fb.location.distance(Vec2::new(100.0, 100.0)) < 1e-9);
    assert!((fb.velocity.y - (-300.0 + 66.7)).abs() < 1e-9);

    engine.tick(0.1).unwrap();
    let fb = pcomp(engine.world(), body).freebody().copied().unwrap();
    assert!(fb.location.y < 100.0);
    assert_eq!(landings.get(), 1);
}

fn spawn_simple_item(engine: &mut Engine, at: Vec2) -> EntityId {
    let world = engine.world_mut();
    let e = world.spawn();
    world.insert(e, PhysicsComponent::with_state(FreeBody::at(at)));
    world.insert(e, Item::holdable(HoldType::Simple));
    e
}

fn tick_until_landed(engine: &mut Engine, body: EntityId) {
    for _ in 0..60 {
        engine.tick(1.0 / 60.0).unwrap();
        if matches!(pcomp(engine.world(), body).state(), PhysicsState::Tracker(_)) {
            return;
        }
    }
    panic!("{:?} never landed", body);
}

#[test]
fn basket_steps_one_waypoint_per_landed_item() {
    let map = LineMap::empty(16, 16, TILE, TILE);
    let mut engine = Engine::new(map).with_gravity(G);
    let points: Vec<Vec2> = (0..5).map(|i| Vec2::new(100.0, 100.0 + f64::from(i) * 20.0)).collect();
    let world = engine.world_mut();
    let basket = world.spawn();
    let mut platform = Platform::new(vec![Surface::new(Vec2::new(-30.0, 0.0), Vec2::new(30.0, 0.0))]);
    platform.set_offset(points[0]);
    world.insert(basket, platform);
    let mut intpos = InterpolativePosition::new(points.len());
    intpos.set_behavior(Behavior::TowardDestination(0)).unwrap();
    world.insert(basket, intpos);
    world.insert(basket, Waypoints::new(points));
    world.insert(basket, ScriptComponent::new(BasketScript::new(None)));

    let first = spawn_simple_item(&mut engine, Vec2::new(90.0, 90.0));
    tick_until_landed(&mut engine, first);
    let targeted = |engine: &Engine| engine.world().get::<InterpolativePosition>(basket).unwrap().targeted_point();
    assert_eq!(targeted(&engine), Some(1));

    let second = spawn_simple_item(&mut engine, Vec2::new(110.0, 80.0));
    tick_until_landed(&mut engine, second);
    assert_eq!(targeted(&engine), Some(2));
}

#[test]
fn sample_map_loads_and_runs() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/maps/sample.json");
    let desc = TileMapDescription::from_file(&path).unwrap();
    let loaded = load_map(&desc).unwrap();
    assert_eq!(loaded.objects.len(), 9);
    assert_eq!(loaded.links.links.len(), 1);

    let mut engine = Engine::from_loaded_map(loaded).unwrap();
    let player = engine.player().expect("map has a player start");
    assert!(engine.world().has::<Collector>(player));
    assert_eq!(engine.world().entities_with::<Platform>().len(), 1);

    for _ in 0..120 {
        engine.advance(std::time::Duration::from_secs_f64(1.0 / 60.0)).unwrap();
    }
    assert!(engine.ticks() >= 100);
    // the player drops onto the ground row
    let tracker = pcomp(engine.world(), player).tracker().cloned().expect("player is standing");
    assert!(matches!(tracker.surface_ref(), SurfaceRef::Map { .. }));
}
