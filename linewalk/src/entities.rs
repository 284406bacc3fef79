//! Plain data components for the objects that populate a map.
//!
//! Behaviour lives in [`crate::systems`] and [`crate::script`]; these types
//! only carry state.

use crate::consts::{DEFAULT_LIFETIME, DEFAULT_RECALL_TIME, SNAKE_INSTANCE_COUNT, SNAKE_SPAWN_INTERVAL};
use crate::math::{Rect, Vec2};
use crate::world::EntityId;

/// How an item behaves while it is being carried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HoldType {
    Simple,
    /// Releasing it mid-air gives the holder an upward boost.
    JumpBooster,
    /// Makes the holder fall faster.
    Heavy,
    Bouncy,
    /// Deletes platforms whose bounds it enters.
    PlatformBreaker,
    /// Raises the holder's running acceleration and top speed.
    RunBooster,
    /// Carries a small platform on top of itself when set down.
    Crate,
    #[default]
    NotHoldable,
}

impl HoldType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "simple" => Some(HoldType::Simple),
            "jump-booster" => Some(HoldType::JumpBooster),
            "heavy" => Some(HoldType::Heavy),
            "bouncy" => Some(HoldType::Bouncy),
            "platform-breaker" => Some(HoldType::PlatformBreaker),
            "run-booster" => Some(HoldType::RunBooster),
            "crate" => Some(HoldType::Crate),
            "not-holdable" => Some(HoldType::NotHoldable),
            _ => None,
        }
    }

    pub fn is_holdable(self) -> bool {
        self != HoldType::NotHoldable
    }
}

/// Something a collector can pick up or be credited with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Item {
    pub diamond: u32,
    pub hold_type: HoldType,
}

impl Item {
    pub fn holdable(hold_type: HoldType) -> Self {
        Self { diamond: 0, hold_type }
    }
}

/// An entity able to collect items and carry one of them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Collector {
    /// Added to the collector's location when checking pickups.
    pub collection_offset: Vec2,
    pub diamond: u32,
    held_object: Option<EntityId>,
}

impl Collector {
    pub fn with_offset(collection_offset: Vec2) -> Self {
        Self {
            collection_offset,
            ..Self::default()
        }
    }

    pub fn held_object(&self) -> Option<EntityId> {
        self.held_object
    }

    pub(crate) fn set_held_object(&mut self, held: Option<EntityId>) {
        self.held_object = held;
    }
}

/// Seconds left before the entity asks to be deleted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lifetime(pub f64);

impl Default for Lifetime {
    fn default() -> Self {
        Self(DEFAULT_LIFETIME)
    }
}

/// RGB colour hint for whatever draws the entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tint {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Tint {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn random(rng: &mut fastrand::Rng) -> Self {
        Self::new(rng.u8(..), rng.u8(..), rng.u8(..))
    }

    /// Linear blend, `t` in `[0, 1]`.
    pub fn blend(self, other: Tint, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
        Self::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

/// Spawner of a short trail of free bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct Snake {
    pub location: Vec2,
    pub total_instances: u32,
    pub instances_remaining: u32,
    /// Seconds between spawns.
    pub spawn_interval: f64,
    pub elapsed: f64,
    pub begin_tint: Tint,
    pub end_tint: Tint,
}

impl Snake {
    pub fn new(location: Vec2) -> Self {
        Self {
            location,
            total_instances: SNAKE_INSTANCE_COUNT,
            instances_remaining: SNAKE_INSTANCE_COUNT,
            spawn_interval: SNAKE_SPAWN_INTERVAL,
            elapsed: 0.0,
            begin_tint: Tint::default(),
            end_tint: Tint::default(),
        }
    }

    /// Colour of the next instance to spawn.
    pub fn instance_tint(&self) -> Tint {
        if self.total_instances == 0 {
            return self.begin_tint;
        }
        let spawned = self.total_instances - self.instances_remaining;
        self.begin_tint
            .blend(self.end_tint, f64::from(spawned) / f64::from(self.total_instances))
    }
}

/// Where an entity goes back to when it falls off the map or strays too far.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnPoint {
    /// Entity whose rectangle is the return location.
    pub target: EntityId,
    /// Leaving this rectangle starts the recall countdown. `None` never
    /// counts down.
    pub recall_bounds: Option<Rect>,
    pub recall_time: f64,
    pub recall_max_time: f64,
}

impl ReturnPoint {
    /// Return point with no recall bounds; only falling off the map sends
    /// the entity back.
    pub fn new(target: EntityId) -> Self {
        Self {
            target,
            recall_bounds: None,
            recall_time: DEFAULT_RECALL_TIME,
            recall_max_time: DEFAULT_RECALL_TIME,
        }
    }

    #[must_use]
    pub fn with_recall(mut self, bounds: Rect, max_time: f64) -> Self {
        self.recall_bounds = Some(bounds);
        self.recall_time = max_time;
        self.recall_max_time = max_time;
        self
    }
}

/// Offset from an entity's feet to its head.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeadOffset(pub Vec2);

/// Which way the player faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Facing {
    Left,
    #[default]
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum HeldDirection {
    #[default]
    Neither,
    LeftOnly,
    RightOnly,
    /// Both held, left pressed last.
    LeftLast,
    /// Both held, right pressed last.
    RightLast,
}

/// Whether the control system may steer the player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControlLock {
    #[default]
    Unlocked,
    /// Set by launchers; lifted when the player next lands on a surface.
    UntilLanding,
}

/// Player control state, fed by control events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerControl {
    pub jump_held: bool,
    pub grabbing: bool,
    pub will_release: bool,
    pub releasing: bool,
    /// Remaining time the jump may still be extended.
    pub jump_time: f64,
    direction: HeldDirection,
    last_direction: Facing,
    lock: ControlLock,
}

impl PlayerControl {
    /// `-1` for left, `1` for right, `0` when neither is held. When both
    /// are held the last one pressed wins.
    pub fn direction(&self) -> f64 {
        match self.direction {
            HeldDirection::Neither => 0.0,
            HeldDirection::LeftOnly | HeldDirection::LeftLast => -1.0,
            HeldDirection::RightOnly | HeldDirection::RightLast => 1.0,
        }
    }

    pub fn last_direction(&self) -> Facing {
        self.last_direction
    }

    /// Remembers the current direction as the facing, if one is held.
    pub fn update_facing(&mut self) {
        let dir = self.direction();
        if dir < 0.0 {
            self.last_direction = Facing::Left;
        } else if dir > 0.0 {
            self.last_direction = Facing::Right;
        }
    }

    pub fn press_left(&mut self) {
        self.direction = match self.direction {
            HeldDirection::Neither => HeldDirection::LeftOnly,
            HeldDirection::RightOnly | HeldDirection::RightLast => HeldDirection::LeftLast,
            held => held,
        };
    }

    pub fn press_right(&mut self) {
        self.direction = match self.direction {
            HeldDirection::Neither => HeldDirection::RightOnly,
            HeldDirection::LeftOnly | HeldDirection::LeftLast => HeldDirection::RightLast,
            held => held,
        };
    }

    pub fn release_left(&mut self) {
        self.direction = match self.direction {
            HeldDirection::LeftOnly => HeldDirection::Neither,
            HeldDirection::LeftLast | HeldDirection::RightLast => HeldDirection::RightOnly,
            held => held,
        };
    }

    pub fn release_right(&mut self) {
        self.direction = match self.direction {
            HeldDirection::RightOnly => HeldDirection::Neither,
            HeldDirection::LeftLast | HeldDirection::RightLast => HeldDirection::LeftOnly,
            held => held,
        };
    }

    pub fn is_locked(&self) -> bool {
        self.lock != ControlLock::Unlocked
    }

    pub fn lock_until_landing(&mut self) {
        self.lock = ControlLock::UntilLanding;
    }

    pub fn unlock_on_landing(&mut self) {
        if self.lock == ControlLock::UntilLanding {
            self.lock = ControlLock::Unlocked;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_pressed_direction_wins() {
        let mut pc = PlayerControl::default();
        assert_eq!(pc.direction(), 0.0);
        pc.press_left();
        assert_eq!(pc.direction(), -1.0);
        pc.press_right();
        assert_eq!(pc.direction(), 1.0);
        pc.release_right();
        assert_eq!(pc.direction(), -1.0);
        pc.release_left();
        assert_eq!(pc.direction(), 0.0);
    }

    #[test]
    fn releasing_the_other_key_keeps_the_first() {
        let mut pc = PlayerControl::default();
        pc.press_right();
        pc.press_left();
        pc.release_right();
        assert_eq!(pc.direction(), -1.0);
        pc.update_facing();
        assert_eq!(pc.last_direction(), Facing::Left);
    }

    #[test]
    fn landing_lifts_a_launch_lock() {
        let mut pc = PlayerControl::default();
        pc.lock_until_landing();
        assert!(pc.is_locked());
        pc.unlock_on_landing();
        assert!(!pc.is_locked());
    }

    #[test]
    fn snake_tints_run_from_begin_to_end() {
        let mut snake = Snake::new(Vec2::ZERO);
        snake.begin_tint = Tint::new(0, 0, 0);
        snake.end_tint = Tint::new(250, 100, 50);
        assert_eq!(snake.instance_tint(), Tint::new(0, 0, 0));
        snake.instances_remaining = 0;
        assert_eq!(snake.instance_tint(), Tint::new(250, 100, 50));
    }

    #[test]
    fn hold_type_names() {
        assert_eq!(HoldType::from_name("jump-booster"), Some(HoldType::JumpBooster));
        assert_eq!(HoldType::from_name("anvil"), None);
        assert!(!HoldType::default().is_holdable());
    }
}
