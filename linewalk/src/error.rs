//! Error types for map loading, object loading and physics contract violations.

use thiserror::Error;

use crate::grid::GridCoord;
use crate::world::EntityId;

/// Errors raised while turning a tile-map description into a [`LineMap`](crate::line_map::LineMap).
#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("map has no ground layer")]
    MissingGroundLayer,

    #[error("layer \"{name}\" is {found_width}x{found_height}, expected {width}x{height}")]
    LayerSizeMismatch {
        name: String,
        width: usize,
        height: usize,
        found_width: usize,
        found_height: usize,
    },

    #[error("tile size mismatch: layer data has {found_width}x{found_height}, map declares {width}x{height}")]
    TileSizeMismatch {
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error("ground tiles do not match their layer tiles at: {}", format_tiles(.0))]
    MismatchedTiles(Vec<GridCoord>),

    #[error("tile {0:?} has a tile id with no tile information")]
    MissingTileInfo(GridCoord),

    #[error("line \"{line}\" has {count} points, expected 2")]
    WrongPointCount { line: String, count: usize },

    #[error("point \"{point}\" has {count} numbers, expected 2")]
    WrongNumberCount { point: String, count: usize },

    #[error("\"{0}\" is not a number")]
    NotANumber(String),

    #[error("unknown transition kind \"{0}\"")]
    UnknownTransition(String),

    #[error("malformed map link \"{0}\"")]
    BadMapLink(String),

    #[error("failed to parse map description: {0}")]
    Json(String),
}

fn format_tiles(tiles: &[GridCoord]) -> String {
    tiles
        .iter()
        .map(|c| format!("({}, {})", c.x, c.y))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Contract violations raised by the physics layer.
///
/// Geometric degeneracies are never reported through this type; the resolver
/// recovers from those locally.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("the \"neither\" layer cannot be used here")]
    NeitherLayer,

    #[error("segment index {index} is out of range (count {count})")]
    SegmentOutOfRange { index: usize, count: usize },

    #[error("surface reference does not point at the map")]
    NotAMapReference,

    #[error("entity {0:?} has no platform")]
    MissingPlatform(EntityId),

    #[error("entity {0:?} does not exist")]
    MissingEntity(EntityId),

    #[error("entity has no physics state of kind \"{expected}\"")]
    WrongState { expected: &'static str },

    #[error("segments do not share an endpoint")]
    Disconnected,

    #[error("point index {index} is outside the {count} waypoints")]
    WaypointMismatch { index: usize, count: usize },

    #[error("physics references loop back on themselves")]
    ReferenceCycle,

    #[error("a launch speed of {speed} cannot reach the target")]
    UnreachableTarget { speed: f64 },
}

/// Errors raised while spawning map objects.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObjectError {
    #[error("object \"{name}\": unknown type \"{kind}\"")]
    UnknownType { name: String, kind: String },

    #[error("object \"{name}\": missing required property \"{property}\"")]
    MissingProperty { name: String, property: String },

    #[error("\"{0}\" is not a vector (expected \"x, y\")")]
    BadVector(String),

    #[error("\"{0}\" is not a number")]
    BadNumber(String),

    #[error("\"{0}\" is not a waypoint behavior")]
    BadBehavior(String),

    #[error("\"{0}\" is not a hold type")]
    BadHoldType(String),

    #[error("object \"{object}\" names \"{dependency}\", which does not exist")]
    MissingDependency { object: String, dependency: String },

    #[error("objects depend on each other in a cycle: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}
