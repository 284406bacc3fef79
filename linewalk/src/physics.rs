// linewalk/src/physics.rs
//! Physics state of a body: flying freely, tracking a segment, held by
//! another entity, or a fixed rectangle.

use crossbeam_channel::Sender;

use crate::collision::events::SurfaceEvent;
use crate::consts::{DEFAULT_GRAVITY, MAX_RESOLVE_DEPTH};
use crate::entities::HeadOffset;
use crate::error::PhysicsError;
use crate::line_map::{Layer, LineMap};
use crate::math::{location_along, normal_for, velocity_along, Rect, Vec2};
use crate::platform::Platform;
use crate::surface::{Surface, SurfaceRef};
use crate::world::{EntityId, World};

/// Ballistic body.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FreeBody {
    pub location: Vec2,
    pub velocity: Vec2,
}

impl FreeBody {
    pub fn new(location: Vec2, velocity: Vec2) -> Self {
        Self { location, velocity }
    }

    pub fn at(location: Vec2) -> Self {
        Self::new(location, Vec2::ZERO)
    }
}

/// Body attached to one segment.
#[derive(Clone, Debug, PartialEq)]
pub struct LineTracker {
    surface_ref: SurfaceRef,
    /// Fraction along the segment, `a` at 0 and `b` at 1.
    pub position: f64,
    /// Segments per second; positive runs from `a` toward `b`.
    pub speed: f64,
    /// Chooses which side of the segment is "outside".
    pub inverted_normal: bool,
    owner: Option<EntityId>,
}

impl LineTracker {
    pub fn new(surface_ref: SurfaceRef, position: f64, speed: f64) -> Self {
        Self {
            surface_ref,
            position,
            speed,
            inverted_normal: false,
            owner: None,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn inverted(mut self, inverted_normal: bool) -> Self {
        self.inverted_normal = inverted_normal;
        self
    }

    pub fn surface_ref(&self) -> SurfaceRef {
        self.surface_ref
    }

    pub fn owner(&self) -> Option<EntityId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: EntityId) {
        self.owner = Some(owner);
    }

    /// Moves the tracker onto `surface_ref`.
    ///
    /// When the tracker has an owner and the reference actually changes, the
    /// platform left behind gets a departing event and the platform landed on
    /// gets a landing event carrying `impact`.
    pub fn set_surface_ref(&mut self, surface_ref: SurfaceRef, impact: Vec2, events: &Sender<SurfaceEvent>) {
        if let Some(owner) = self.owner {
            if surface_ref != self.surface_ref {
                if let Some(platform) = self.surface_ref.attached_entity() {
                    send(events, SurfaceEvent::Departing { platform, other: owner });
                }
                if let Some(platform) = surface_ref.attached_entity() {
                    send(
                        events,
                        SurfaceEvent::Landing {
                            platform,
                            other: owner,
                            velocity: impact,
                        },
                    );
                }
            }
        }
        self.surface_ref = surface_ref;
    }

    /// Landing event for a tracker that has just been created on its surface.
    pub fn announce_landing(&self, impact: Vec2, events: &Sender<SurfaceEvent>) {
        if let (Some(owner), Some(platform)) = (self.owner, self.surface_ref.attached_entity()) {
            send(
                events,
                SurfaceEvent::Landing {
                    platform,
                    other: owner,
                    velocity: impact,
                },
            );
        }
    }

    /// Departing event for a tracker that is about to stop existing.
    pub fn depart(&self, events: &Sender<SurfaceEvent>) {
        if let (Some(owner), Some(platform)) = (self.owner, self.surface_ref.attached_entity()) {
            send(events, SurfaceEvent::Departing { platform, other: owner });
        }
    }
}

fn send(events: &Sender<SurfaceEvent>, event: SurfaceEvent) {
    if events.send(event).is_err() {
        log::warn!("surface event dropped, nobody is listening: {:?}", event);
    }
}

/// What happens to the holder when a held item is let go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReleaseAction {
    #[default]
    None,
    /// Kick the holder upward (jump booster items).
    JumpBoost,
}

/// Body carried by `holder`; its location is the holder's hand point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeldState {
    pub holder: EntityId,
    pub release: ReleaseAction,
}

impl HeldState {
    pub fn new(holder: EntityId) -> Self {
        Self {
            holder,
            release: ReleaseAction::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PhysicsState {
    FreeBody(FreeBody),
    Tracker(LineTracker),
    Held(HeldState),
    Rect(Rect),
}

impl PhysicsState {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PhysicsState::FreeBody(_) => "free body",
            PhysicsState::Tracker(_) => "tracker",
            PhysicsState::Held(_) => "held",
            PhysicsState::Rect(_) => "rectangle",
        }
    }
}

impl Default for PhysicsState {
    fn default() -> Self {
        PhysicsState::FreeBody(FreeBody::default())
    }
}

impl From<FreeBody> for PhysicsState {
    fn from(state: FreeBody) -> Self {
        PhysicsState::FreeBody(state)
    }
}

impl From<LineTracker> for PhysicsState {
    fn from(state: LineTracker) -> Self {
        PhysicsState::Tracker(state)
    }
}

impl From<HeldState> for PhysicsState {
    fn from(state: HeldState) -> Self {
        PhysicsState::Held(state)
    }
}

impl From<Rect> for PhysicsState {
    fn from(state: Rect) -> Self {
        PhysicsState::Rect(state)
    }
}

/// Physics component attached to every moving entity.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicsComponent {
    state: PhysicsState,
    pub active_layer: Layer,
    /// Speeds at or above this bounce off floors instead of landing.
    pub bounce_threshold: f64,
    pub affected_by_gravity: bool,
}

impl Default for PhysicsComponent {
    fn default() -> Self {
        Self::with_state(FreeBody::default())
    }
}

impl PhysicsComponent {
    pub fn with_state(state: impl Into<PhysicsState>) -> Self {
        Self {
            state: state.into(),
            active_layer: Layer::Foreground,
            bounce_threshold: f64::INFINITY,
            affected_by_gravity: true,
        }
    }

    #[must_use]
    pub fn on_layer(mut self, layer: Layer) -> Self {
        self.active_layer = layer;
        self
    }

    #[must_use]
    pub fn with_bounce_threshold(mut self, threshold: f64) -> Self {
        self.bounce_threshold = threshold;
        self
    }

    #[must_use]
    pub fn without_gravity(mut self) -> Self {
        self.affected_by_gravity = false;
        self
    }

    pub fn state(&self) -> &PhysicsState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PhysicsState {
        &mut self.state
    }

    /// Replaces the state without emitting any surface event.
    pub fn reset_state(&mut self, state: impl Into<PhysicsState>) -> PhysicsState {
        std::mem::replace(&mut self.state, state.into())
    }

    /// Replaces the state; a tracker being replaced reports its departure.
    pub fn change_state(&mut self, state: impl Into<PhysicsState>, events: &Sender<SurfaceEvent>) -> PhysicsState {
        let state = state.into();
        if let PhysicsState::Tracker(old) = &self.state {
            let same_surface = matches!(&state, PhysicsState::Tracker(new) if new.surface_ref() == old.surface_ref());
            if !same_surface {
                old.depart(events);
            }
        }
        std::mem::replace(&mut self.state, state)
    }

    pub fn freebody(&self) -> Option<&FreeBody> {
        match &self.state {
            PhysicsState::FreeBody(s) => Some(s),
            _ => None,
        }
    }

    pub fn freebody_mut(&mut self) -> Option<&mut FreeBody> {
        match &mut self.state {
            PhysicsState::FreeBody(s) => Some(s),
            _ => None,
        }
    }

    pub fn tracker(&self) -> Option<&LineTracker> {
        match &self.state {
            PhysicsState::Tracker(s) => Some(s),
            _ => None,
        }
    }

    pub fn tracker_mut(&mut self) -> Option<&mut LineTracker> {
        match &mut self.state {
            PhysicsState::Tracker(s) => Some(s),
            _ => None,
        }
    }

    pub fn held(&self) -> Option<&HeldState> {
        match &self.state {
            PhysicsState::Held(s) => Some(s),
            _ => None,
        }
    }

    pub fn held_mut(&mut self) -> Option<&mut HeldState> {
        match &mut self.state {
            PhysicsState::Held(s) => Some(s),
            _ => None,
        }
    }

    pub fn rect(&self) -> Option<&Rect> {
        match &self.state {
            PhysicsState::Rect(s) => Some(s),
            _ => None,
        }
    }

    pub fn rect_mut(&mut self) -> Option<&mut Rect> {
        match &mut self.state {
            PhysicsState::Rect(s) => Some(s),
            _ => None,
        }
    }

    /// Tracker state or a [`PhysicsError::WrongState`].
    pub fn expect_tracker(&self) -> Result<&LineTracker, PhysicsError> {
        self.tracker().ok_or(PhysicsError::WrongState { expected: "tracker" })
    }

    pub fn expect_freebody_mut(&mut self) -> Result<&mut FreeBody, PhysicsError> {
        self.freebody_mut().ok_or(PhysicsError::WrongState { expected: "free body" })
    }
}

/// Read-only view of everything needed to place a body in the world.
///
/// Locations of trackers and held bodies depend on other entities (the
/// platform they ride, the holder carrying them), so every query goes
/// through here. Chains of such references are followed at most
/// [`MAX_RESOLVE_DEPTH`] deep.
#[derive(Clone, Copy)]
pub struct WorldView<'a> {
    pub map: &'a LineMap,
    pub world: &'a World,
    pub gravity: Vec2,
}

impl<'a> WorldView<'a> {
    pub fn new(map: &'a LineMap, world: &'a World, gravity: Vec2) -> Self {
        Self { map, world, gravity }
    }

    pub fn with_default_gravity(map: &'a LineMap, world: &'a World) -> Self {
        Self::new(map, world, DEFAULT_GRAVITY)
    }

    /// Unit vector pointing away from gravity; straight up when there is none.
    pub fn up(&self) -> Vec2 {
        let up = -self.gravity.normalized();
        if up == Vec2::ZERO {
            Vec2::new(0.0, -1.0)
        } else {
            up
        }
    }

    pub fn surface(&self, surface_ref: &SurfaceRef) -> Result<Surface, PhysicsError> {
        self.surface_at(surface_ref, 0)
    }

    pub fn location(&self, pcomp: &PhysicsComponent) -> Result<Vec2, PhysicsError> {
        self.location_at(pcomp, 0)
    }

    pub fn velocity(&self, pcomp: &PhysicsComponent) -> Result<Vec2, PhysicsError> {
        match pcomp.state() {
            PhysicsState::FreeBody(body) => Ok(body.velocity),
            PhysicsState::Tracker(tracker) => {
                let surface = self.surface(&tracker.surface_ref())?;
                Ok(velocity_along(tracker.speed, &surface.segment()))
            }
            PhysicsState::Held(_) | PhysicsState::Rect(_) => Ok(Vec2::ZERO),
        }
    }

    pub fn normal(&self, pcomp: &PhysicsComponent) -> Result<Vec2, PhysicsError> {
        self.normal_at(pcomp, 0)
    }

    /// Location of `entity`'s physics body.
    pub fn location_of(&self, entity: EntityId) -> Result<Vec2, PhysicsError> {
        self.location_at(self.physics_of(entity)?, 0)
    }

    pub fn velocity_of(&self, entity: EntityId) -> Result<Vec2, PhysicsError> {
        self.velocity(self.physics_of(entity)?)
    }

    pub fn normal_of(&self, entity: EntityId) -> Result<Vec2, PhysicsError> {
        self.normal(self.physics_of(entity)?)
    }

    /// Point at which `entity` carries things: half its head offset out
    /// along its normal.
    pub fn hand_point_of(&self, entity: EntityId) -> Result<Vec2, PhysicsError> {
        self.hand_point_at(entity, 0)
    }

    fn physics_of(&self, entity: EntityId) -> Result<&'a PhysicsComponent, PhysicsError> {
        self.world
            .get::<PhysicsComponent>(entity)
            .ok_or(PhysicsError::MissingEntity(entity))
    }

    fn surface_at(&self, surface_ref: &SurfaceRef, depth: u32) -> Result<Surface, PhysicsError> {
        match *surface_ref {
            SurfaceRef::Map { layer, tile, index } => self.map.segment_at(layer, tile, index),
            SurfaceRef::Entity { entity, index } => {
                let platform = self
                    .world
                    .get::<Platform>(entity)
                    .ok_or(PhysicsError::MissingPlatform(entity))?;
                let surface = platform.get_surface(index)?;
                let offset = match self.world.get::<PhysicsComponent>(entity) {
                    Some(pcomp) => self.location_at(pcomp, depth + 1)?,
                    None => Vec2::ZERO,
                };
                Ok(surface.translated(offset))
            }
        }
    }

    fn location_at(&self, pcomp: &PhysicsComponent, depth: u32) -> Result<Vec2, PhysicsError> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(PhysicsError::ReferenceCycle);
        }
        match pcomp.state() {
            PhysicsState::FreeBody(body) => Ok(body.location),
            PhysicsState::Tracker(tracker) => {
                let surface = self.surface_at(&tracker.surface_ref(), depth + 1)?;
                Ok(location_along(tracker.position, &surface.segment()))
            }
            PhysicsState::Held(held) => self.hand_point_at(held.holder, depth + 1),
            PhysicsState::Rect(rect) => Ok(rect.center()),
        }
    }

    fn normal_at(&self, pcomp: &PhysicsComponent, depth: u32) -> Result<Vec2, PhysicsError> {
        match pcomp.tracker() {
            Some(tracker) => {
                let surface = self.surface_at(&tracker.surface_ref(), depth + 1)?;
                Ok(normal_for(&surface.segment(), tracker.inverted_normal))
            }
            None => Ok(self.up()),
        }
    }

    fn hand_point_at(&self, entity: EntityId, depth: u32) -> Result<Vec2, PhysicsError> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(PhysicsError::ReferenceCycle);
        }
        let pcomp = self.physics_of(entity)?;
        let location = self.location_at(pcomp, depth + 1)?;
        match self.world.get::<HeadOffset>(entity) {
            Some(head) => Ok(location + self.normal_at(pcomp, depth + 1)? * (head.0.length() * 0.5)),
            None => Ok(location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::events::SurfaceEvents;

    fn floor_platform(world: &mut World) -> EntityId {
        let e = world.spawn();
        world.insert(
            e,
            Platform::new(vec![Surface::new(Vec2::new(0.0, 100.0), Vec2::new(200.0, 100.0))]),
        );
        e
    }

    #[test]
    fn tracker_location_follows_its_surface() {
        let map = LineMap::empty(4, 4, 16.0, 16.0);
        let mut world = World::new();
        let floor = floor_platform(&mut world);
        let pcomp = PhysicsComponent::with_state(LineTracker::new(SurfaceRef::entity(floor, 0), 0.25, 1.0));
        let view = WorldView::with_default_gravity(&map, &world);
        assert_eq!(view.location(&pcomp).unwrap(), Vec2::new(50.0, 100.0));
        assert_eq!(view.velocity(&pcomp).unwrap(), Vec2::new(200.0, 0.0));
        assert_eq!(view.normal(&pcomp).unwrap(), Vec2::new(0.0, -1.0));
    }

    #[test]
    fn held_bodies_sit_at_the_hand_point() {
        let map = LineMap::empty(4, 4, 16.0, 16.0);
        let mut world = World::new();
        let holder = world.spawn();
        world.insert(holder, PhysicsComponent::with_state(FreeBody::at(Vec2::new(10.0, 10.0))));
        world.insert(holder, HeadOffset(Vec2::new(0.0, -20.0)));
        let item = PhysicsComponent::with_state(HeldState::new(holder));
        let view = WorldView::with_default_gravity(&map, &world);
        assert_eq!(view.location(&item).unwrap(), Vec2::new(10.0, 0.0));
        assert_eq!(view.velocity(&item).unwrap(), Vec2::ZERO);
    }

    #[test]
    fn self_holding_is_reported_as_a_cycle() {
        let map = LineMap::empty(4, 4, 16.0, 16.0);
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, PhysicsComponent::with_state(HeldState::new(e)));
        let view = WorldView::with_default_gravity(&map, &world);
        assert_eq!(view.location_of(e), Err(PhysicsError::ReferenceCycle));
    }

    #[test]
    fn changing_surfaces_reports_landing_and_departing() {
        let mut world = World::new();
        let first = floor_platform(&mut world);
        let second = floor_platform(&mut world);
        let rider = world.spawn();
        let events = SurfaceEvents::new();

        let mut tracker = LineTracker::new(SurfaceRef::entity(first, 0), 0.5, 0.0).with_owner(rider);
        tracker.set_surface_ref(SurfaceRef::entity(first, 0), Vec2::ZERO, events.sender());
        assert!(events.drain().is_empty());

        tracker.set_surface_ref(SurfaceRef::entity(second, 0), Vec2::new(0.0, 5.0), events.sender());
        assert_eq!(
            events.drain(),
            vec![
                SurfaceEvent::Departing {
                    platform: first,
                    other: rider
                },
                SurfaceEvent::Landing {
                    platform: second,
                    other: rider,
                    velocity: Vec2::new(0.0, 5.0)
                },
            ]
        );

        let mut pcomp = PhysicsComponent::with_state(tracker);
        pcomp.change_state(FreeBody::at(Vec2::ZERO), events.sender());
        assert_eq!(
            events.drain(),
            vec![SurfaceEvent::Departing {
                platform: second,
                other: rider
            }]
        );
    }

    #[test]
    fn typed_accessors_match_the_state() {
        let mut pcomp = PhysicsComponent::default();
        assert!(pcomp.freebody().is_some());
        assert!(pcomp.tracker().is_none());
        assert_eq!(
            pcomp.expect_tracker().unwrap_err(),
            PhysicsError::WrongState { expected: "tracker" }
        );
        let old = pcomp.reset_state(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(old.kind_name(), "free body");
        assert_eq!(pcomp.rect().map(|r| r.center()), Some(Vec2::new(5.0, 5.0)));
    }
}
