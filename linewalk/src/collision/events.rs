//! Landing/departing notifications produced while bodies move.
//!
//! Events are queued during collision and dispatched to scripts afterwards,
//! so a callback never alters the physics state that caused it.

use crossbeam_channel::{Receiver, Sender};

use crate::math::Vec2;
use crate::world::EntityId;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SurfaceEvent {
    /// `other` landed on one of `platform`'s surfaces with `velocity`.
    Landing {
        platform: EntityId,
        other: EntityId,
        velocity: Vec2,
    },
    /// `other` left one of `platform`'s surfaces.
    Departing { platform: EntityId, other: EntityId },
}

impl SurfaceEvent {
    pub fn platform(&self) -> EntityId {
        match *self {
            SurfaceEvent::Landing { platform, .. } | SurfaceEvent::Departing { platform, .. } => platform,
        }
    }
}

/// Unbounded queue of [`SurfaceEvent`]s.
pub struct SurfaceEvents {
    sender: Sender<SurfaceEvent>,
    receiver: Receiver<SurfaceEvent>,
}

impl Default for SurfaceEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceEvents {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> &Sender<SurfaceEvent> {
        &self.sender
    }

    /// Everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<SurfaceEvent> {
        self.receiver.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
