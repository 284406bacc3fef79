//! Tuning constants shared by the resolver and the auxiliary systems.
//!
//! Angles are in radians, distances in pixels, speeds in pixels per second
//! unless a constant says otherwise.

use std::f64::consts::PI;

use crate::math::Vec2;

/// The single epsilon used for every "very close" comparison.
pub const K_ERROR: f64 = 0.000_05;

pub const DEFAULT_GRAVITY: Vec2 = Vec2::new(0.0, 667.0);

/// Maximum recursion depth of one resolver step before the remaining time
/// is discarded.
pub const MAX_RESOLVE_DEPTH: u32 = 32;

// ------------------------- free body classification -------------------------

/// Normal to gravity angles below this are ceilings.
pub const CEILING_ANGLE: f64 = PI * 0.2;

/// Normal to gravity angles below this (and above [`CEILING_ANGLE`]) are walls.
pub const WALL_ANGLE: f64 = PI * 0.65;

/// Surfaces whose normal to gravity angle exceeds this receive friction.
pub const FLOOR_FRICTION_ANGLE: f64 = PI * 0.8;

// ------------------------------ tracker transfer -----------------------------

/// Turning angles at or below this stop the tracker.
pub const WALL_TURN_ANGLE: f64 = PI * 0.5;

/// Turning angles above this make the tracker fly off.
pub const FLY_OFF_TURN_ANGLE: f64 = PI * 1.25;

/// Normal to gravity angle below which a tracker is clinging to a ceiling.
pub const CEILING_CLING_ANGLE: f64 = PI * 0.25;

pub const CEILING_CLING_MIN_SPEED: f64 = 50.0;

/// Trackers on segments within this angle of perpendicular to gravity get no
/// tangential gravity.
pub const FLAT_GRAVITY_TOLERANCE: f64 = PI * 0.1;

// ---------------------------------- surfaces ---------------------------------

pub const DEFAULT_FRICTION: f64 = 0.145;
pub const DEFAULT_STOP_SPEED: f64 = 20.0;

// ----------------------------------- player ----------------------------------

pub const PLAYER_ACCELERATION: f64 = 125.0;
pub const PLAYER_BRAKE_BOOST: f64 = 3.0;
pub const PLAYER_MAX_SPEED: f64 = 400.0;
pub const RUN_BOOST_SPEED_MULTIPLIER: f64 = 1.5;
pub const RUN_BOOST_ACCELERATION_MULTIPLIER: f64 = 2.5;
pub const PLAYER_JUMP_SPEED: f64 = 333.0;
pub const PLAYER_JUMP_TIME: f64 = 0.4;

// ---------------------------------- holding ----------------------------------

pub const GRAB_DISTANCE: f64 = 30.0;
pub const THROW_SPEED: f64 = 275.0;
pub const THROW_ANGLE: f64 = PI * 0.15;
pub const JUMP_BOOSTER_SPEED: f64 = 333.0;
pub const JUMP_BOOSTER_MAX_MULTIPLIER: f64 = 1.25;
pub const HEAVY_GRAVITY_MULTIPLIER: f64 = 1.5;

// ------------------------------ map boundaries -------------------------------

pub const EDGE_PUSH_SPEED: f64 = 10.0;
pub const MAP_CEILING_Y: f64 = -100.0;

// ---------------------------------- launchers --------------------------------

/// Speed cap for boost launchers acting along a surface.
pub const MAX_BOOST_SPEED: f64 = 800.0;
/// Launch speed of a targeted launcher without a `speed` property.
pub const DEFAULT_TARGET_LAUNCH_SPEED: f64 = 400.0;

// ---------------------------------- objects ----------------------------------

pub const PLAYER_COLLECTION_OFFSET: Vec2 = Vec2::new(0.0, -16.0);
pub const PLAYER_HEAD_OFFSET: Vec2 = Vec2::new(0.0, -32.0);
/// Waypoint speed of platforms and baskets without a `speed` property.
pub const DEFAULT_PLATFORM_SPEED: f64 = 50.0;
pub const BALLOON_RADIUS: f64 = 8.0;

// ---------------------------------- misc ------------------------------------

pub const PLATFORM_BREAKER_MIN_BOX: f64 = 10.0;
pub const CRATE_SURFACE_HALF_WIDTH: f64 = 30.0;
pub const CRATE_SURFACE_HEIGHT: f64 = 60.0;
pub const DEFAULT_RECALL_TIME: f64 = 3.0;
pub const DEFAULT_LIFETIME: f64 = 60.0;
pub const SNAKE_INSTANCE_COUNT: u32 = 25;
pub const SNAKE_SPAWN_INTERVAL: f64 = 0.025;
