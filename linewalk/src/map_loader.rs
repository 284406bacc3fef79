//! Builds a [`LineMap`] from a JSON tile-map description.
//!
//! The description is a simplified export of a tile editor map: tile sets
//! with per-tile properties, up to three named tile layers and a list of
//! rectangular map objects.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::MapError;
use crate::grid::{Grid, GridCoord};
use crate::line_map::{LineMap, LineMapLayer, TransitionTileType};
use crate::math::{Rect, Vec2};
use crate::surface::{Surface, SurfaceDetails};

pub const GROUND_LAYER: &str = "ground";
pub const FOREGROUND_LAYER: &str = "foreground";
pub const BACKGROUND_LAYER: &str = "background";
pub const TRANSITION_OBJECT: &str = "transition";

/// Gid of the universally empty tile.
const EMPTY_TILE: u32 = 0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileSetDescription {
    pub first_gid: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Properties keyed by the tile's id inside the set.
    #[serde(default)]
    pub tiles: BTreeMap<u32, BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileLayerDescription {
    pub name: String,
    pub width: usize,
    pub height: usize,
    /// Row-major gids, `0` for empty.
    pub data: Vec<u32>,
}

/// A rectangular object placed on the map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapObject {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub bounds: Rect,
    #[serde(default)]
    pub points: Vec<Vec2>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl MapObject {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileMapDescription {
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default)]
    pub tilesets: Vec<TileSetDescription>,
    #[serde(default)]
    pub layers: Vec<TileLayerDescription>,
    #[serde(default)]
    pub objects: Vec<MapObject>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TileMapDescription {
    pub fn from_json(text: &str) -> Result<Self, MapError> {
        serde_json::from_str(text).map_err(|e| MapError::Json(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read map file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("failed to parse map file {}", path.display()))
    }

    fn layer(&self, name: &str) -> Option<&TileLayerDescription> {
        self.layers.iter().find(|l| l.name == name)
    }
}

/// Which side of this map a linked map is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapEdge {
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl MapEdge {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "left" => MapEdge::Left,
            "right" => MapEdge::Right,
            "top" => MapEdge::Top,
            "bottom" => MapEdge::Bottom,
            "top-left" | "left-top" => MapEdge::TopLeft,
            "top-right" | "right-top" => MapEdge::TopRight,
            "bottom-left" | "left-bottom" => MapEdge::BottomLeft,
            "bottom-right" | "right-bottom" => MapEdge::BottomRight,
            _ => return None,
        })
    }

    pub fn is_corner(self) -> bool {
        matches!(
            self,
            MapEdge::TopLeft | MapEdge::TopRight | MapEdge::BottomLeft | MapEdge::BottomRight
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapLink {
    pub name: String,
    pub edge: MapEdge,
    /// Tile offset along the edge; corners have none.
    pub offset: i32,
    pub filename: String,
}

/// Map-level link settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapLinks {
    pub links: Vec<MapLink>,
    pub max_link_depth: u32,
    pub persists: bool,
}

impl Default for MapLinks {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            max_link_depth: 1,
            persists: false,
        }
    }
}

/// Everything produced from one map description.
#[derive(Clone, Debug)]
pub struct LoadedMap {
    pub map: LineMap,
    pub links: MapLinks,
    /// Objects left for the scene loader (transition regions are consumed here).
    pub objects: Vec<MapObject>,
}

/// Segments and material of one tile type.
#[derive(Clone, Debug, Default, PartialEq)]
struct TileInfo {
    segments: Vec<Surface>,
}

pub fn load_map(desc: &TileMapDescription) -> Result<LoadedMap, MapError> {
    let tile_width = f64::from(desc.tile_width);
    let tile_height = f64::from(desc.tile_height);
    check_tile_sizes(desc)?;

    let tile_info = load_tile_infos(desc, tile_width, tile_height)?;

    let ground = desc.layer(GROUND_LAYER).ok_or(MapError::MissingGroundLayer)?;
    let (width, height) = (ground.width, ground.height);
    let ground_gids = layer_gids(ground, width, height, &tile_info)?;

    let mut fore_gids = match desc.layer(FOREGROUND_LAYER) {
        Some(layer) => layer_gids(layer, width, height, &tile_info)?,
        None => Grid::new(width, height, EMPTY_TILE),
    };
    let mut back_gids = match desc.layer(BACKGROUND_LAYER) {
        Some(layer) => layer_gids(layer, width, height, &tile_info)?,
        None => Grid::new(width, height, EMPTY_TILE),
    };
    overwrite_layer(&mut fore_gids, &ground_gids)?;
    overwrite_layer(&mut back_gids, &ground_gids)?;

    // one run per tile type, shared by every tile of that type
    let mut arena = Vec::new();
    let mut runs: BTreeMap<u32, Range<usize>> = BTreeMap::new();
    for (gid, info) in &tile_info {
        let start = arena.len();
        arena.extend(info.segments.iter().copied());
        runs.insert(*gid, start..arena.len());
    }
    let to_views = |gids: &Grid<u32>| {
        let cells = gids
            .iter()
            .map(|(_, gid)| runs.get(gid).cloned().unwrap_or(0..0))
            .collect();
        Grid::from_cells(width, height, cells).map(LineMapLayer::new)
    };
    let (foreground, background) = match (to_views(&fore_gids), to_views(&back_gids)) {
        (Some(f), Some(b)) => (f, b),
        _ => {
            return Err(MapError::LayerSizeMismatch {
                name: GROUND_LAYER.to_string(),
                width,
                height,
                found_width: width,
                found_height: height,
            })
        }
    };

    let mut transitions = Grid::new(width, height, TransitionTileType::None);
    let mut objects = Vec::new();
    for obj in &desc.objects {
        if obj.kind == TRANSITION_OBJECT {
            mark_transition(&mut transitions, obj, tile_width, tile_height)?;
        } else {
            objects.push(obj.clone());
        }
    }

    let links = load_links(&desc.properties)?;
    let map = LineMap::new(tile_width, tile_height, arena, foreground, background, transitions)?;
    log::info!(
        "loaded {}x{} map: {} tile types, {} objects, {} links",
        width,
        height,
        tile_info.len(),
        objects.len(),
        links.links.len()
    );
    Ok(LoadedMap { map, links, objects })
}

fn check_tile_sizes(desc: &TileMapDescription) -> Result<(), MapError> {
    for set in &desc.tilesets {
        if set.tile_width != desc.tile_width || set.tile_height != desc.tile_height {
            return Err(MapError::TileSizeMismatch {
                width: desc.tile_width,
                height: desc.tile_height,
                found_width: set.tile_width,
                found_height: set.tile_height,
            });
        }
    }
    Ok(())
}

/// Tile types that carry segments, keyed by gid. Tiles with no `lines` are
/// left out and treated as empty.
fn load_tile_infos(
    desc: &TileMapDescription,
    tile_width: f64,
    tile_height: f64,
) -> Result<BTreeMap<u32, TileInfo>, MapError> {
    let mut rv = BTreeMap::new();
    for set in &desc.tilesets {
        for (id, properties) in &set.tiles {
            let Some(lines) = properties.get("lines") else {
                continue;
            };
            let details = SurfaceDetails {
                hard_ceiling: properties.get("hard-ceiling").map(|v| v == "true").unwrap_or(false),
                ..SurfaceDetails::default()
            };
            let segments: Vec<Surface> = parse_lines(lines)?
                .into_iter()
                .map(|(a, b)| {
                    Surface::new(
                        Vec2::new(a.x * tile_width, a.y * tile_height),
                        Vec2::new(b.x * tile_width, b.y * tile_height),
                    )
                    .with_details(details)
                })
                .collect();
            if !segments.is_empty() {
                rv.insert(set.first_gid + id, TileInfo { segments });
            }
        }
    }
    Ok(rv)
}

/// Gids of a layer with segment-less tiles replaced by the empty tile.
fn layer_gids(
    layer: &TileLayerDescription,
    width: usize,
    height: usize,
    tile_info: &BTreeMap<u32, TileInfo>,
) -> Result<Grid<u32>, MapError> {
    let mismatch = || MapError::LayerSizeMismatch {
        name: layer.name.clone(),
        width,
        height,
        found_width: layer.width,
        found_height: layer.height,
    };
    if layer.width != width || layer.height != height {
        return Err(mismatch());
    }
    let cells = layer
        .data
        .iter()
        .map(|gid| if tile_info.contains_key(gid) { *gid } else { EMPTY_TILE })
        .collect();
    Grid::from_cells(width, height, cells).ok_or_else(mismatch)
}

/// Fills empty cells of `layer` from `ground`; both defining different
/// non-empty tiles is an error listing every such cell.
fn overwrite_layer(layer: &mut Grid<u32>, ground: &Grid<u32>) -> Result<(), MapError> {
    let mut mismatched = Vec::new();
    for (coord, ground_gid) in ground.iter() {
        let Some(cell) = layer.get_mut(coord) else {
            continue;
        };
        if *cell == EMPTY_TILE {
            *cell = *ground_gid;
        } else if *ground_gid != EMPTY_TILE && *cell != *ground_gid {
            mismatched.push(coord);
        }
    }
    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(MapError::MismatchedTiles(mismatched))
    }
}

fn mark_transition(
    grid: &mut Grid<TransitionTileType>,
    obj: &MapObject,
    tile_width: f64,
    tile_height: f64,
) -> Result<(), MapError> {
    let kind = match obj.property("transition") {
        None | Some("toggle") => TransitionTileType::Toggle,
        Some("to-background") => TransitionTileType::ToBackground,
        Some("to-foreground") => TransitionTileType::ToForeground,
        Some(other) => return Err(MapError::UnknownTransition(other.to_string())),
    };
    if grid.width() == 0 || grid.height() == 0 {
        return Ok(());
    }
    let clamp = |v: f64, size: f64, max: usize| ((v / size) as i32).clamp(0, max as i32 - 1);
    let b = &obj.bounds;
    let (x0, x1) = (
        clamp(b.left, tile_width, grid.width()),
        clamp(b.right(), tile_width, grid.width()),
    );
    let (y0, y1) = (
        clamp(b.top, tile_height, grid.height()),
        clamp(b.bottom(), tile_height, grid.height()),
    );
    for y in y0..=y1 {
        for x in x0..=x1 {
            grid.set(GridCoord::new(x, y), kind);
        }
    }
    Ok(())
}

/// Parses `"x1,y1 : x2,y2 ; ..."` into pairs of tile-normalised points.
pub fn parse_lines(text: &str) -> Result<Vec<(Vec2, Vec2)>, MapError> {
    text.split(';')
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let points: Vec<&str> = line.split(':').collect();
            if points.len() != 2 {
                return Err(MapError::WrongPointCount {
                    line: line.trim().to_string(),
                    count: points.len(),
                });
            }
            Ok((parse_point(points[0])?, parse_point(points[1])?))
        })
        .collect()
}

fn parse_point(text: &str) -> Result<Vec2, MapError> {
    let numbers: Vec<&str> = text.split(',').map(str::trim).collect();
    if numbers.len() != 2 {
        return Err(MapError::WrongNumberCount {
            point: text.trim().to_string(),
            count: numbers.len(),
        });
    }
    let parse = |s: &str| s.parse::<f64>().map_err(|_| MapError::NotANumber(s.to_string()));
    Ok(Vec2::new(parse(numbers[0])?, parse(numbers[1])?))
}

fn load_links(properties: &BTreeMap<String, String>) -> Result<MapLinks, MapError> {
    let mut rv = MapLinks::default();
    if let Some(depth) = properties.get("map-link-depth") {
        match depth.trim().parse() {
            Ok(d) => rv.max_link_depth = d,
            Err(_) => log::warn!("ignoring map-link-depth \"{}\"", depth),
        }
    }
    match properties.get("map-persists").map(String::as_str) {
        Some("true") => rv.persists = true,
        Some("false") | None => {}
        Some(other) => log::warn!("ignoring map-persists \"{}\"", other),
    }
    let Some(names) = properties.get("map-link-names") else {
        return Ok(rv);
    };
    for name in names.split(';').map(str::trim).filter(|n| !n.is_empty()) {
        match properties.get(name) {
            Some(text) => rv.links.push(parse_link(name, text)?),
            None => log::warn!("map link \"{}\" is named but not defined", name),
        }
    }
    Ok(rv)
}

/// `<edge>; [<offset>]; <filename>`, corners take no offset.
fn parse_link(name: &str, text: &str) -> Result<MapLink, MapError> {
    let bad = || MapError::BadMapLink(text.to_string());
    let parts: Vec<&str> = text.split(';').map(str::trim).collect();
    let edge = parts.first().and_then(|e| MapEdge::parse(e)).ok_or_else(bad)?;
    let (offset, filename) = match (edge.is_corner(), parts.as_slice()) {
        (_, [_, file]) => (0, *file),
        (false, [_, offset, file]) => (offset.parse().map_err(|_| bad())?, *file),
        _ => return Err(bad()),
    };
    if filename.is_empty() {
        return Err(bad());
    }
    Ok(MapLink {
        name: name.to_string(),
        edge,
        offset,
        filename: filename.to_string(),
    })
}
