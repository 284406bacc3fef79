//! The two-layer line-segment map and the tile walk used by ballistic motion.
//!
//! Every tile of a layer holds a view over a run of segments in the map's
//! segment arena. Segments are stored in tile-local pixels and moved into
//! world space when read.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{MapError, PhysicsError};
use crate::grid::{Grid, GridCoord};
use crate::math::{Rect, Vec2};
use crate::surface::{Surface, SurfaceRef};

/// Collision layer of a body or a piece of geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    Background,
    #[default]
    Foreground,
    /// Collides with no map geometry; platforms on this layer collide with
    /// bodies on any layer.
    Neither,
}

impl Layer {
    /// The other concrete layer. `Neither` stays `Neither`.
    pub fn switched(self) -> Self {
        match self {
            Layer::Background => Layer::Foreground,
            Layer::Foreground => Layer::Background,
            Layer::Neither => Layer::Neither,
        }
    }

    /// Can a body on `self` touch geometry on `other`?
    pub fn collides_with(self, other: Layer) -> bool {
        other == Layer::Neither || self == other
    }
}

/// Marks a tile as a layer transition region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionTileType {
    #[default]
    None,
    Toggle,
    ToBackground,
    ToForeground,
}

impl TransitionTileType {
    pub fn is_transition(self) -> bool {
        self != TransitionTileType::None
    }

    /// Layer after entering a tile of this type.
    pub fn apply(self, layer: Layer) -> Layer {
        match self {
            TransitionTileType::None => layer,
            TransitionTileType::Toggle => layer.switched(),
            TransitionTileType::ToBackground => Layer::Background,
            TransitionTileType::ToForeground => Layer::Foreground,
        }
    }
}

/// One layer: a view range into the segment arena per tile.
#[derive(Clone, Debug, PartialEq)]
pub struct LineMapLayer {
    views: Grid<Range<usize>>,
}

impl LineMapLayer {
    pub fn new(views: Grid<Range<usize>>) -> Self {
        Self { views }
    }

    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            views: Grid::new(width, height, 0..0),
        }
    }

    pub fn width(&self) -> usize {
        self.views.width()
    }

    pub fn height(&self) -> usize {
        self.views.height()
    }

    /// Segment range of `tile`; empty outside the layer.
    pub fn view(&self, tile: GridCoord) -> Range<usize> {
        self.views.get(tile).cloned().unwrap_or(0..0)
    }
}

/// The whole collidable map.
#[derive(Clone, Debug, PartialEq)]
pub struct LineMap {
    tile_width: f64,
    tile_height: f64,
    segments: Vec<Surface>,
    foreground: LineMapLayer,
    background: LineMapLayer,
    transitions: Grid<TransitionTileType>,
}

impl LineMap {
    /// Assembles a map from an arena of tile-local surfaces, both layers and
    /// the transition grid. All grids must have the same dimensions and every
    /// view must lie inside the arena.
    pub fn new(
        tile_width: f64,
        tile_height: f64,
        segments: Vec<Surface>,
        foreground: LineMapLayer,
        background: LineMapLayer,
        transitions: Grid<TransitionTileType>,
    ) -> Result<Self, MapError> {
        let (width, height) = (foreground.width(), foreground.height());
        let check = |name: &str, w: usize, h: usize| {
            if w == width && h == height {
                Ok(())
            } else {
                Err(MapError::LayerSizeMismatch {
                    name: name.to_string(),
                    width,
                    height,
                    found_width: w,
                    found_height: h,
                })
            }
        };
        check("background", background.width(), background.height())?;
        check("transitions", transitions.width(), transitions.height())?;

        let arena = segments.len();
        for layer in [&foreground, &background] {
            if let Some((coord, _)) = layer.views.iter().find(|(_, v)| v.end > arena || v.start > v.end) {
                return Err(MapError::MissingTileInfo(coord));
            }
        }

        Ok(Self {
            tile_width,
            tile_height,
            segments,
            foreground,
            background,
            transitions,
        })
    }

    /// A map of the given size with no segments and no transitions.
    pub fn empty(width: usize, height: usize, tile_width: f64, tile_height: f64) -> Self {
        Self {
            tile_width,
            tile_height,
            segments: Vec::new(),
            foreground: LineMapLayer::empty(width, height),
            background: LineMapLayer::empty(width, height),
            transitions: Grid::new(width, height, TransitionTileType::None),
        }
    }

    pub fn width(&self) -> usize {
        self.foreground.width()
    }

    pub fn height(&self) -> usize {
        self.foreground.height()
    }

    pub fn tile_width(&self) -> f64 {
        self.tile_width
    }

    pub fn tile_height(&self) -> f64 {
        self.tile_height
    }

    /// The map's extent in pixels.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            0.0,
            0.0,
            self.width() as f64 * self.tile_width,
            self.height() as f64 * self.tile_height,
        )
    }

    pub fn layer(&self, layer: Layer) -> Result<&LineMapLayer, PhysicsError> {
        match layer {
            Layer::Foreground => Ok(&self.foreground),
            Layer::Background => Ok(&self.background),
            Layer::Neither => Err(PhysicsError::NeitherLayer),
        }
    }

    pub fn tile_of(&self, point: Vec2) -> GridCoord {
        GridCoord::new(
            (point.x / self.tile_width).floor() as i32,
            (point.y / self.tile_height).floor() as i32,
        )
    }

    /// World position of the tile's top-left corner.
    pub fn tile_origin(&self, tile: GridCoord) -> Vec2 {
        Vec2::new(tile.x as f64 * self.tile_width, tile.y as f64 * self.tile_height)
    }

    pub fn segment_count(&self, layer: Layer, tile: GridCoord) -> Result<usize, PhysicsError> {
        Ok(self.layer(layer)?.view(tile).len())
    }

    /// World-space surface `index` of `tile` on `layer`.
    pub fn segment_at(&self, layer: Layer, tile: GridCoord, index: usize) -> Result<Surface, PhysicsError> {
        let view = self.layer(layer)?.view(tile);
        let count = view.len();
        self.segments
            .get(view)
            .and_then(|run| run.get(index))
            .map(|s| s.translated(self.tile_origin(tile)))
            .ok_or(PhysicsError::SegmentOutOfRange { index, count })
    }

    pub fn transition_at(&self, tile: GridCoord) -> TransitionTileType {
        self.transitions.get(tile).copied().unwrap_or_default()
    }

    pub fn in_transition(&self, point: Vec2) -> bool {
        self.transition_at(self.tile_of(point)).is_transition()
    }

    /// Layer after a tracker moves from `old` to `new`.
    ///
    /// Only entering a transition tile from outside changes the layer.
    pub fn layer_after_move(&self, layer: Layer, old: Vec2, new: Vec2) -> Layer {
        if self.in_transition(old) {
            return layer;
        }
        self.transition_at(self.tile_of(new)).apply(layer)
    }

    /// Walks the tiles crossed by `from -> to`, starting on `layer`.
    pub fn walk(&self, layer: Layer, from: Vec2, to: Vec2) -> TileWalk<'_> {
        TileWalk::new(self, layer, from, to)
    }
}

/// Iterator over the map segments a straight motion may touch.
///
/// Tiles are visited in crossing order from the source tile to the
/// destination tile. Entering a transition tile from a non-transition tile
/// applies its layer change before the tile's segments are yielded, so each
/// item carries the layer that was active in that tile.
pub struct TileWalk<'a> {
    map: &'a LineMap,
    layer: Layer,
    current: GridCoord,
    dest: GridCoord,
    previous_was_transition: bool,
    step: (i32, i32),
    t_max: (f64, f64),
    t_delta: (f64, f64),
    steps_left: i32,
    next_index: usize,
    finished: bool,
}

impl<'a> TileWalk<'a> {
    fn new(map: &'a LineMap, layer: Layer, from: Vec2, to: Vec2) -> Self {
        let current = map.tile_of(from);
        let dest = map.tile_of(to);
        let diff = to - from;

        let axis = |d: f64, origin: f64, cell: i32, size: f64| -> (i32, f64, f64) {
            if d > 0.0 {
                let boundary = (cell + 1) as f64 * size;
                (1, (boundary - origin) / d, size / d)
            } else if d < 0.0 {
                let boundary = cell as f64 * size;
                (-1, (boundary - origin) / d, -size / d)
            } else {
                (0, f64::INFINITY, f64::INFINITY)
            }
        };
        let (sx, tx, dx) = axis(diff.x, from.x, current.x, map.tile_width);
        let (sy, ty, dy) = axis(diff.y, from.y, current.y, map.tile_height);

        Self {
            map,
            layer,
            current,
            dest,
            previous_was_transition: map.transition_at(current).is_transition(),
            step: (sx, sy),
            t_max: (tx, ty),
            t_delta: (dx, dy),
            steps_left: current.manhattan_distance(&dest),
            next_index: 0,
            finished: false,
        }
    }

    /// The layer active in the tile currently being visited.
    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Moves to the next tile; `false` when the walk is over.
    fn advance(&mut self) -> bool {
        if self.current == self.dest {
            return false;
        }
        if self.steps_left <= 0 {
            log::debug!(
                "tile walk missed destination {:?}, stopping at {:?}",
                self.dest,
                self.current
            );
            return false;
        }
        self.steps_left -= 1;

        if self.t_max.0 <= self.t_max.1 {
            self.current.x += self.step.0;
            self.t_max.0 += self.t_delta.0;
        } else {
            self.current.y += self.step.1;
            self.t_max.1 += self.t_delta.1;
        }

        let transition = self.map.transition_at(self.current);
        if transition.is_transition() && !self.previous_was_transition {
            self.layer = transition.apply(self.layer);
        }
        self.previous_was_transition = transition.is_transition();
        self.next_index = 0;
        true
    }

    fn count_here(&self) -> usize {
        self.map.segment_count(self.layer, self.current).unwrap_or(0)
    }
}

impl Iterator for TileWalk<'_> {
    type Item = SurfaceRef;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.next_index < self.count_here() {
                let index = self.next_index;
                self.next_index += 1;
                return Some(SurfaceRef::map(self.layer, self.current, index));
            }
            if !self.advance() {
                self.finished = true;
            }
        }
        None
    }
}
