use std::time::Duration;

use anyhow::{Context, Result};

use crate::collision::events::SurfaceEvents;
use crate::collision::run_collision;
use crate::consts::DEFAULT_GRAVITY;
use crate::input::{InputState, Key};
use crate::line_map::LineMap;
use crate::map_loader::LoadedMap;
use crate::math::Vec2;
use crate::scene::{load_objects, SceneLoad};
use crate::script::with_script;
use crate::systems::{self, TickContext};
use crate::trigger::run_triggers;
use crate::world::{EntityId, World};

/// Configuration values for the tick driver.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Length of one tick when driven through [`Engine::advance`].
    pub fixed_delta: Duration,
    /// Most ticks a single `advance` call may run; time beyond that is
    /// dropped.
    pub max_steps_per_advance: u32,
    pub gravity: Vec2,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_delta: Duration::from_secs_f64(1.0 / 60.0), // 60 ticks per second
            max_steps_per_advance: 8,
            gravity: DEFAULT_GRAVITY,
        }
    }
}

/// Owns a map and its entities and runs the systems over them in a fixed
/// order.
pub struct Engine {
    config: EngineConfig,
    map: LineMap,
    world: World,
    events: SurfaceEvents,
    input: InputState,
    player: Option<EntityId>,
    fixed_time_accumulator: Duration,
    ticks: u64,
}

impl Engine {
    /// Create an engine over an empty world with default configuration.
    pub fn new(map: LineMap) -> Self {
        Self {
            config: EngineConfig::default(),
            map,
            world: World::new(),
            events: SurfaceEvents::new(),
            input: InputState::default(),
            player: None,
            fixed_time_accumulator: Duration::ZERO,
            ticks: 0,
        }
    }

    /// Build an engine from a loaded map, spawning its objects.
    pub fn from_loaded_map(loaded: LoadedMap) -> Result<Self> {
        Self::from_loaded_map_with_config(loaded, EngineConfig::default())
    }

    /// Like [`Engine::from_loaded_map`]; objects are spawned under
    /// `config.gravity`.
    pub fn from_loaded_map_with_config(loaded: LoadedMap, config: EngineConfig) -> Result<Self> {
        let LoadedMap { map, objects, .. } = loaded;
        let mut engine = Self::new(map).with_config(config);
        let gravity = engine.config.gravity;
        let SceneLoad { player, spawned } = load_objects(&mut engine.world, &engine.map, gravity, &objects)
            .context("failed to spawn map objects")?;
        log::info!("spawned {} entities from {} map objects", spawned, objects.len());
        engine.player = player;
        Ok(engine)
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_gravity(mut self, gravity: Vec2) -> Self {
        self.config.gravity = gravity;
        self
    }

    #[must_use]
    pub fn with_fixed_delta(mut self, fixed_delta: Duration) -> Self {
        self.config.fixed_delta = fixed_delta;
        self
    }

    #[must_use]
    pub fn with_max_steps_per_advance(mut self, steps: u32) -> Self {
        self.config.max_steps_per_advance = steps;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn map(&self) -> &LineMap {
        &self.map
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The entity receiving control events.
    pub fn player(&self) -> Option<EntityId> {
        self.player.filter(|&p| self.world.is_alive(p))
    }

    /// Replace the player; the previous one is deleted at the end of the
    /// next tick.
    pub fn set_player(&mut self, player: EntityId) {
        if let Some(old) = self.player.replace(player) {
            if old != player {
                self.world.request_deletion(old);
            }
        }
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    /// Queue a key transition; it reaches the player at the next tick.
    pub fn handle_key(&mut self, key: Key, pressed: bool) {
        self.input.handle_key(key, pressed);
    }

    /// Number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick of `et` seconds.
    ///
    /// Control input and steering go first, then every body is moved with the
    /// velocity it carried into the tick and resolved against the map and the
    /// platforms where they stood. Landing callbacks and triggers see the
    /// resolved positions. Gravity, waypoints and platform motion then prepare
    /// the next tick. Deletions are flushed last, after every reference to a
    /// doomed entity has been released.
    pub fn tick(&mut self, et: f64) -> Result<()> {
        let gravity = self.config.gravity;
        let Self { map, world, events, input, player, .. } = &mut *self;

        let control_events = input.drain_events();
        if let Some(player) = player.filter(|&p| world.is_alive(p)) {
            for event in control_events {
                with_script(world, map, gravity, player, |script, ctx| {
                    script.process_control_event(ctx, event)
                })?;
            }
        }

        let tick = TickContext {
            map,
            gravity,
            events: events.sender(),
            et,
        };
        systems::player_control(&tick, world)?;

        run_collision(map, world, gravity, et, events.sender());
        systems::dispatch_surface_events(&tick, world, events.drain())?;

        run_triggers(map, world, gravity, et)?;
        systems::gravity(&tick, world)?;
        systems::extreme_positions(&tick, world)?;
        systems::lifetimes(&tick, world)?;
        systems::snakes(&tick, world)?;
        systems::waypoints(&tick, world)?;
        systems::platform_movement(&tick, world)?;
        systems::hold_items(&tick, world)?;
        systems::platform_breaking(&tick, world)?;
        systems::crate_surfaces(&tick, world)?;
        systems::recall(&tick, world)?;
        systems::script_updates(&tick, world)?;
        // departures from state changes made after collision
        systems::dispatch_surface_events(&tick, world, events.drain())?;

        systems::release_doomed_references(&tick, world)?;
        let deleted = world.flush_deletions();
        if !deleted.is_empty() {
            log::trace!("deleted {:?}", deleted);
        }
        self.ticks += 1;
        Ok(())
    }

    /// Accumulate `delta` and run as many fixed ticks as it covers.
    ///
    /// Returns the number of ticks run.
    pub fn advance(&mut self, delta: Duration) -> Result<u32> {
        self.fixed_time_accumulator += delta;
        let fixed_delta = self.config.fixed_delta;
        if fixed_delta.is_zero() {
            self.fixed_time_accumulator = Duration::ZERO;
            return Ok(0);
        }
        let mut steps = 0;
        while self.fixed_time_accumulator >= fixed_delta {
            if steps >= self.config.max_steps_per_advance {
                log::warn!(
                    "falling behind: dropping {:?} after {} ticks",
                    self.fixed_time_accumulator,
                    steps
                );
                self.fixed_time_accumulator = Duration::ZERO;
                break;
            }
            self.fixed_time_accumulator -= fixed_delta;
            self.tick(fixed_delta.as_secs_f64())?;
            steps += 1;
        }
        Ok(steps)
    }

    /// How far through the next fixed tick the accumulated time is, in
    /// `[0, 1]`. Useful for interpolating between ticks when drawing.
    pub fn fixed_update_alpha(&self) -> f64 {
        let fixed = self.config.fixed_delta.as_secs_f64();
        if fixed > 0.0 {
            (self.fixed_time_accumulator.as_secs_f64() / fixed).min(1.0)
        } else {
            0.0
        }
    }
}
