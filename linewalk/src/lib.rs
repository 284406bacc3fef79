//! Linewalk - the simulation core of a 2D platformer whose terrain is made
//! of line segments.
//!
//! A [`LineMap`] holds the terrain in two layers. Entities live in a
//! [`World`] and move either freely ([`FreeBody`]) or by tracking a surface
//! ([`LineTracker`]). The [`Engine`] runs every system once per tick in a
//! fixed order.

pub mod assets;
pub mod collision;
pub mod consts;
pub mod engine;
pub mod entities;
pub mod error;
pub mod grid;
pub mod input;
pub mod line_map;
pub mod map_loader;
pub mod math;
pub mod physics;
pub mod platform;
pub mod scene;
pub mod script;
pub mod surface;
pub mod systems;
pub mod trigger;
pub mod world;

pub use crate::collision::events::{SurfaceEvent, SurfaceEvents};
pub use crate::engine::{Engine, EngineConfig};
pub use crate::error::{MapError, ObjectError, PhysicsError};
pub use crate::input::{ControlEvent, InputState, Key};
pub use crate::line_map::{Layer, LineMap};
pub use crate::map_loader::{load_map, LoadedMap, MapObject, TileMapDescription};
pub use crate::math::{LineSegment, Rect, Vec2};
pub use crate::physics::{FreeBody, HeldState, LineTracker, PhysicsComponent, PhysicsState, WorldView};
pub use crate::platform::{Behavior, InterpolativePosition, Platform, Waypoints};
pub use crate::script::{Script, ScriptComponent};
pub use crate::surface::{Surface, SurfaceRef};
pub use crate::world::{EntityId, World};
