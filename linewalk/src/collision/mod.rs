//! Environment collision: advances each body by one tick against the map and
//! every platform.
//!
//! Free bodies fly until they hit a surface, then land, bounce or slide.
//! Trackers slide along their segment and transfer onto neighbouring
//! segments at the ends, or onto platform surfaces they run into.

pub mod events;
mod freebody;
mod tracker;
mod transfer;

use crossbeam_channel::Sender;

use crate::entities::PlayerControl;
use crate::error::PhysicsError;
use crate::line_map::{Layer, LineMap};
use crate::math::{find_intersection, LineSegment, Vec2};
use crate::physics::{FreeBody, LineTracker, PhysicsComponent, PhysicsState, WorldView};
use crate::platform::Platform;
use crate::surface::{Surface, SurfaceRef};
use crate::world::{EntityId, World};

use self::events::SurfaceEvent;

pub use self::transfer::{turning_angle, SegmentEnd};

/// One surface crossed by a motion.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Hit {
    pub surface_ref: SurfaceRef,
    pub surface: Surface,
    pub point: Vec2,
    /// Layer the body is on when it reaches this surface.
    pub layer: Layer,
}

impl Hit {
    pub fn segment(&self) -> LineSegment {
        self.surface.segment()
    }
}

/// Nearest first; ties keep gathering order.
pub(crate) fn sort_hits(hits: &mut [Hit], origin: Vec2) {
    hits.sort_by(|lhs, rhs| {
        let l = lhs.point.distance(origin);
        let r = rhs.point.distance(origin);
        l.total_cmp(&r)
    });
}

/// Everything the resolver reads and writes while advancing one body.
pub(crate) struct BodyStep<'a> {
    pub view: WorldView<'a>,
    platforms: &'a [EntityId],
    pub entity: EntityId,
    pub events: &'a Sender<SurfaceEvent>,
    /// Is the body being steered (suppresses friction)?
    pub acting_will: bool,
    pub bounce_threshold: f64,
    pub layer: Layer,
    pub state: PhysicsState,
    landed: bool,
}

impl<'a> BodyStep<'a> {
    pub fn new(
        view: WorldView<'a>,
        platforms: &'a [EntityId],
        entity: EntityId,
        pcomp: &PhysicsComponent,
        events: &'a Sender<SurfaceEvent>,
    ) -> Self {
        Self {
            view,
            platforms,
            entity,
            events,
            acting_will: false,
            bounce_threshold: pcomp.bounce_threshold,
            layer: pcomp.active_layer,
            state: pcomp.state().clone(),
            landed: false,
        }
    }

    #[must_use]
    pub fn acting(mut self, acting_will: bool) -> Self {
        self.acting_will = acting_will;
        self
    }

    pub fn map(&self) -> &'a LineMap {
        self.view.map
    }

    pub fn gravity(&self) -> Vec2 {
        self.view.gravity
    }

    pub fn surface(&self, surface_ref: &SurfaceRef) -> Result<Surface, PhysicsError> {
        self.view.surface(surface_ref)
    }

    pub fn tracker(&self) -> Result<&LineTracker, PhysicsError> {
        match &self.state {
            PhysicsState::Tracker(t) => Ok(t),
            _ => Err(PhysicsError::WrongState { expected: "tracker" }),
        }
    }

    pub fn tracker_mut(&mut self) -> Result<&mut LineTracker, PhysicsError> {
        match &mut self.state {
            PhysicsState::Tracker(t) => Ok(t),
            _ => Err(PhysicsError::WrongState { expected: "tracker" }),
        }
    }

    pub fn freebody(&self) -> Result<FreeBody, PhysicsError> {
        match &self.state {
            PhysicsState::FreeBody(fb) => Ok(*fb),
            _ => Err(PhysicsError::WrongState { expected: "free body" }),
        }
    }

    pub fn set_freebody(&mut self, freebody: FreeBody) {
        if let PhysicsState::Tracker(old) = &self.state {
            old.depart(self.events);
            log::debug!("{:?} left its surface at {:?}", self.entity, freebody.location);
        }
        self.state = PhysicsState::FreeBody(freebody);
    }

    /// Attaches the body to `tracker`'s surface, reporting the landing.
    pub fn set_landing(&mut self, tracker: LineTracker, impact: Vec2) {
        let tracker = tracker.with_owner(self.entity);
        tracker.announce_landing(impact, self.events);
        log::debug!("{:?} landed on {:?}", self.entity, tracker.surface_ref());
        self.landed = true;
        self.state = PhysicsState::Tracker(tracker);
    }

    /// Walks the map along `from -> to` collecting crossed segments.
    /// Returns the layer the walk ends on.
    pub fn map_hits(&self, from: Vec2, to: Vec2, out: &mut Vec<Hit>) -> Layer {
        let motion = LineSegment::new(from, to);
        let mut walk = self.map().walk(self.layer, from, to);
        for surface_ref in walk.by_ref() {
            let SurfaceRef::Map { layer, tile, index } = surface_ref else {
                continue;
            };
            let Ok(surface) = self.map().segment_at(layer, tile, index) else {
                continue;
            };
            if let Some(point) = find_intersection(&surface.segment(), &motion) {
                out.push(Hit {
                    surface_ref,
                    surface,
                    point,
                    layer,
                });
            }
        }
        walk.layer()
    }

    /// Platform surfaces crossed by `from -> to`. Platforms on another layer
    /// and the body's own platform are skipped.
    pub fn platform_hits(&self, from: Vec2, to: Vec2, out: &mut Vec<Hit>) {
        let motion = LineSegment::new(from, to);
        for &platform in self.platforms {
            if platform == self.entity {
                continue;
            }
            let platform_layer = self
                .view
                .world
                .get::<PhysicsComponent>(platform)
                .map_or(Layer::Neither, |p| p.active_layer);
            if !self.layer.collides_with(platform_layer) {
                continue;
            }
            let count = self
                .view
                .world
                .get::<Platform>(platform)
                .map_or(0, Platform::surface_count);
            for index in 0..count {
                let surface_ref = SurfaceRef::entity(platform, index);
                let surface = match self.surface(&surface_ref) {
                    Ok(surface) => surface,
                    Err(err) => {
                        log::warn!("skipping platform surface {:?}: {}", surface_ref, err);
                        continue;
                    }
                };
                if let Some(point) = find_intersection(&surface.segment(), &motion) {
                    out.push(Hit {
                        surface_ref,
                        surface,
                        point,
                        layer: self.layer,
                    });
                }
            }
        }
    }

    /// Advances the body by `et` seconds.
    pub fn run(&mut self, et: f64) -> Result<(), PhysicsError> {
        match &self.state {
            PhysicsState::FreeBody(fb) => {
                let target = fb.location + fb.velocity * et;
                freebody::resolve(self, target, 0)
            }
            PhysicsState::Tracker(_) => tracker::resolve(self, et, 0),
            PhysicsState::Held(_) | PhysicsState::Rect(_) => Ok(()),
        }
    }

    /// `(state, layer, landed)`
    pub fn finish(self) -> (PhysicsState, Layer, bool) {
        (self.state, self.layer, self.landed)
    }
}

/// Advances every free body and tracker in `world` by `et` seconds.
///
/// Entities are processed in ascending order. A body whose step fails on a
/// broken reference is left as it was.
pub fn run_collision(map: &LineMap, world: &mut World, gravity: Vec2, et: f64, events: &Sender<SurfaceEvent>) {
    let platforms = world.entities_with::<Platform>();
    for entity in world.entities_with::<PhysicsComponent>() {
        let outcome = {
            let Some(pcomp) = world.get::<PhysicsComponent>(entity) else {
                continue;
            };
            if !matches!(pcomp.state(), PhysicsState::FreeBody(_) | PhysicsState::Tracker(_)) {
                continue;
            }
            let acting_will = world
                .get::<PlayerControl>(entity)
                .is_some_and(|control| control.direction() != 0.0);
            let view = WorldView::new(map, world, gravity);
            let mut step = BodyStep::new(view, &platforms, entity, pcomp, events).acting(acting_will);
            let result = step.run(et);
            result.map(|()| step.finish())
        };
        match outcome {
            Ok((state, layer, landed)) => {
                if let Some(pcomp) = world.get_mut::<PhysicsComponent>(entity) {
                    pcomp.reset_state(state);
                    pcomp.active_layer = layer;
                }
                if landed {
                    if let Some(control) = world.get_mut::<PlayerControl>(entity) {
                        control.unlock_on_landing();
                    }
                }
            }
            Err(err) => log::warn!("collision step for {:?} failed: {}", entity, err),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::grid::{Grid, GridCoord};
    use crate::line_map::{LineMap, LineMapLayer, TransitionTileType};
    use crate::math::Vec2;
    use crate::surface::Surface;

    /// Builds a map of 16px tiles from world-space surfaces grouped by tile.
    /// Both layers get the same geometry.
    pub fn map_from_tiles(width: usize, height: usize, tiles: &[(GridCoord, Vec<Surface>)]) -> LineMap {
        let mut arena = Vec::new();
        let mut views = Grid::new(width, height, 0..0);
        for (coord, surfaces) in tiles {
            let origin = Vec2::new(coord.x as f64 * 16.0, coord.y as f64 * 16.0);
            let start = arena.len();
            arena.extend(surfaces.iter().map(|s| s.translated(-origin)));
            views.set(*coord, start..arena.len());
        }
        LineMap::new(
            16.0,
            16.0,
            arena,
            LineMapLayer::new(views.clone()),
            LineMapLayer::new(views),
            Grid::new(width, height, TransitionTileType::None),
        )
        .unwrap()
    }
}
