use std::collections::{HashMap, HashSet};

/// A physical key, independent of any windowing backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Space,
    Char(char),
}

/// A logical control the player can press and release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlMove {
    Jump,
    MoveLeft,
    MoveRight,
    Use,
}

/// Press/release of a [`ControlMove`], delivered to the player's script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Press(ControlMove),
    Release(ControlMove),
}

/// Maps physical keys to control moves.
#[derive(Clone, Debug)]
pub struct InputMap {
    bindings: HashMap<Key, ControlMove>,
}

impl Default for InputMap {
    /// Arrow keys to move, up or space to jump, `z` to use.
    fn default() -> Self {
        let mut map = Self::new();
        map.bind(Key::Left, ControlMove::MoveLeft);
        map.bind(Key::Right, ControlMove::MoveRight);
        map.bind(Key::Up, ControlMove::Jump);
        map.bind(Key::Space, ControlMove::Jump);
        map.bind(Key::Char('z'), ControlMove::Use);
        map
    }
}

impl InputMap {
    /// Create an empty input map.
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind a key to a control, replacing any earlier binding of that key.
    pub fn bind(&mut self, key: Key, control: ControlMove) {
        self.bindings.insert(key, control);
    }

    pub fn control_for(&self, key: Key) -> Option<ControlMove> {
        self.bindings.get(&key).copied()
    }
}

/// Tracks held keys and turns raw key transitions into control events.
///
/// Key repeat is filtered: a key already down produces no second press.
#[derive(Clone, Debug)]
pub struct InputState {
    map: InputMap,
    keys_down: HashSet<Key>,
    pending: Vec<ControlEvent>,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new(InputMap::default())
    }
}

impl InputState {
    pub fn new(map: InputMap) -> Self {
        Self {
            map,
            keys_down: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Handle a key transition from the host.
    pub fn handle_key(&mut self, key: Key, pressed: bool) {
        let Some(control) = self.map.control_for(key) else {
            return;
        };
        if pressed {
            if self.keys_down.insert(key) {
                self.pending.push(ControlEvent::Press(control));
            }
        } else if self.keys_down.remove(&key) {
            self.pending.push(ControlEvent::Release(control));
        }
    }

    /// Returns true if the key is currently held down.
    pub fn is_key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }

    /// Control events since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<ControlEvent> {
        std::mem::take(&mut self.pending)
    }
}
