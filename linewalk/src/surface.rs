//! Collidable surfaces and stable references to them.

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_FRICTION, DEFAULT_STOP_SPEED};
use crate::error::PhysicsError;
use crate::grid::GridCoord;
use crate::line_map::{Layer, LineMap};
use crate::math::{LineSegment, Vec2};
use crate::physics::WorldView;
use crate::platform::Platform;
use crate::world::{EntityId, World};

/// Per-surface material attributes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceDetails {
    /// Fraction of speed lost per second while coasting.
    pub friction: f64,
    /// World speed below which a coasting body stops.
    pub stop_speed: f64,
    /// Ceilings are passed through from below unless this is set.
    pub hard_ceiling: bool,
}

impl Default for SurfaceDetails {
    fn default() -> Self {
        Self {
            friction: DEFAULT_FRICTION,
            stop_speed: DEFAULT_STOP_SPEED,
            hard_ceiling: false,
        }
    }
}

/// A line segment plus its material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub a: Vec2,
    pub b: Vec2,
    #[serde(default)]
    pub details: SurfaceDetails,
}

impl Surface {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            a,
            b,
            details: SurfaceDetails::default(),
        }
    }

    pub fn with_details(mut self, details: SurfaceDetails) -> Self {
        self.details = details;
        self
    }

    pub fn segment(&self) -> LineSegment {
        LineSegment::new(self.a, self.b)
    }

    pub fn translated(&self, offset: Vec2) -> Self {
        Self {
            a: self.a + offset,
            b: self.b + offset,
            details: self.details,
        }
    }
}

impl From<Surface> for LineSegment {
    fn from(surface: Surface) -> Self {
        surface.segment()
    }
}

/// Stable handle to one segment, either on the map or on a platform entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceRef {
    Map {
        layer: Layer,
        tile: GridCoord,
        index: usize,
    },
    Entity {
        entity: EntityId,
        index: usize,
    },
}

impl SurfaceRef {
    pub fn map(layer: Layer, tile: GridCoord, index: usize) -> Self {
        Self::Map { layer, tile, index }
    }

    pub fn entity(entity: EntityId, index: usize) -> Self {
        Self::Entity { entity, index }
    }

    pub fn index(&self) -> usize {
        match *self {
            Self::Map { index, .. } | Self::Entity { index, .. } => index,
        }
    }

    /// The entity owning the surface, if it is a platform surface.
    pub fn attached_entity(&self) -> Option<EntityId> {
        match *self {
            Self::Entity { entity, .. } => Some(entity),
            Self::Map { .. } => None,
        }
    }

    /// Same owner, different segment. Fails if `index` does not exist.
    pub fn move_to_segment(&self, index: usize, map: &LineMap, world: &World) -> Result<Self, PhysicsError> {
        let count = match *self {
            Self::Map { layer, tile, .. } => map.segment_count(layer, tile)?,
            Self::Entity { entity, .. } => world
                .get::<Platform>(entity)
                .ok_or(PhysicsError::MissingPlatform(entity))?
                .surface_count(),
        };
        if index >= count {
            return Err(PhysicsError::SegmentOutOfRange { index, count });
        }
        let mut rv = *self;
        match &mut rv {
            Self::Map { index: i, .. } | Self::Entity { index: i, .. } => *i = index,
        }
        Ok(rv)
    }

    /// World-space surface this reference names.
    ///
    /// Platform surfaces are offset by the platform's own offset and by the
    /// owning entity's physics location, when it has one.
    pub fn resolve(&self, view: &WorldView) -> Result<Surface, PhysicsError> {
        view.surface(self)
    }
}
