//! Row-major grid storage used by the line map's layers and transition tiles.

use serde::{Deserialize, Serialize};

/// A cell position in the grid (tile coordinates).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another coordinate.
    pub fn manhattan_distance(&self, other: &GridCoord) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

/// General-purpose grid that can store arbitrary data per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>, // Row-major: [y * width + x]
}

impl<T: Clone> Grid<T> {
    /// Create a new grid with every cell set to `default`.
    pub fn new(width: usize, height: usize, default: T) -> Self {
        Self {
            width,
            height,
            cells: vec![default; width * height],
        }
    }
}

impl<T> Grid<T> {
    /// Builds a grid from row-major cells; `None` if the count is wrong.
    pub fn from_cells(width: usize, height: usize, cells: Vec<T>) -> Option<Self> {
        (cells.len() == width * height).then_some(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Check if a grid coordinate is valid (within bounds).
    pub fn is_valid(&self, coord: &GridCoord) -> bool {
        coord.x >= 0 && coord.x < self.width as i32 && coord.y >= 0 && coord.y < self.height as i32
    }

    fn index_of(&self, coord: GridCoord) -> Option<usize> {
        self.is_valid(&coord)
            .then(|| (coord.y as usize) * self.width + (coord.x as usize))
    }

    /// Returns `None` if the coordinate is out of bounds.
    pub fn get(&self, coord: GridCoord) -> Option<&T> {
        self.index_of(coord).and_then(|i| self.cells.get(i))
    }

    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut T> {
        self.index_of(coord).and_then(move |i| self.cells.get_mut(i))
    }

    /// Set the cell data at the given coordinate.
    /// Returns `false` if the coordinate is out of bounds.
    pub fn set(&mut self, coord: GridCoord, value: T) -> bool {
        if let Some(cell) = self.get_mut(coord) {
            *cell = value;
            true
        } else {
            false
        }
    }

    /// Iterate over all coordinates in the grid, row by row.
    pub fn iter_coords(&self) -> impl Iterator<Item = GridCoord> {
        let width = self.width as i32;
        let height = self.height as i32;
        (0..height).flat_map(move |y| (0..width).map(move |x| GridCoord::new(x, y)))
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (GridCoord, &T)> {
        self.iter_coords().zip(self.cells.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_reads_are_none() {
        let mut grid = Grid::new(3, 2, 0u8);
        assert!(grid.set(GridCoord::new(2, 1), 7));
        assert_eq!(grid.get(GridCoord::new(2, 1)), Some(&7));
        assert_eq!(grid.get(GridCoord::new(3, 0)), None);
        assert_eq!(grid.get(GridCoord::new(-1, 0)), None);
        assert!(!grid.set(GridCoord::new(0, 2), 1));
    }

    #[test]
    fn iteration_is_row_major() {
        let grid = Grid::from_cells(2, 2, vec![1, 2, 3, 4]).unwrap();
        let cells: Vec<_> = grid.iter().map(|(c, v)| (c.x, c.y, *v)).collect();
        assert_eq!(cells, vec![(0, 0, 1), (1, 0, 2), (0, 1, 3), (1, 1, 4)]);
        assert!(Grid::from_cells(2, 2, vec![1]).is_none());
    }

    #[test]
    fn manhattan_distance_counts_both_axes() {
        assert_eq!(GridCoord::new(0, 0).manhattan_distance(&GridCoord::new(3, -5)), 8);
    }
}
