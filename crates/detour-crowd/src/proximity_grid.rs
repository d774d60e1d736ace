//! Uniform grid for agent neighbour queries
//!
//! Items are registered with their xz bounds every crowd tick and the grid
//! is cleared before the next one. Cells are keyed by integer coordinates,
//! so the grid has no fixed extent.

use std::collections::HashMap;

/// Grid cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridCoord {
    x: i32,
    z: i32,
}

impl GridCoord {
    fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// Proximity grid over the xz-plane
#[derive(Debug, Clone)]
pub struct ProximityGrid {
    cell_size: f32,
    inv_cell_size: f32,
    cells: HashMap<GridCoord, Vec<u16>>,
    /// Covered cell range, `[minx, minz, maxx, maxz]`
    bounds: [i32; 4],
}

impl ProximityGrid {
    /// Creates a grid with square cells of `cell_size` world units
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 1.0 };
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
            bounds: [i32::MAX, i32::MAX, i32::MIN, i32::MIN],
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.bounds = [i32::MAX, i32::MAX, i32::MIN, i32::MIN];
    }

    fn cell_range(&self, minx: f32, minz: f32, maxx: f32, maxz: f32) -> (GridCoord, GridCoord) {
        (
            GridCoord::new(
                (minx * self.inv_cell_size).floor() as i32,
                (minz * self.inv_cell_size).floor() as i32,
            ),
            GridCoord::new(
                (maxx * self.inv_cell_size).floor() as i32,
                (maxz * self.inv_cell_size).floor() as i32,
            ),
        )
    }

    /// Registers `id` in every cell its bounds overlap
    pub fn add_item(&mut self, id: u16, minx: f32, minz: f32, maxx: f32, maxz: f32) {
        let (lo, hi) = self.cell_range(minx, minz, maxx, maxz);
        self.bounds[0] = self.bounds[0].min(lo.x);
        self.bounds[1] = self.bounds[1].min(lo.z);
        self.bounds[2] = self.bounds[2].max(hi.x);
        self.bounds[3] = self.bounds[3].max(hi.z);

        for z in lo.z..=hi.z {
            for x in lo.x..=hi.x {
                self.cells.entry(GridCoord::new(x, z)).or_default().push(id);
            }
        }
    }

    /// Distinct items registered in the cells the bounds overlap, at most
    /// `max_items`
    pub fn query_items(&self, minx: f32, minz: f32, maxx: f32, maxz: f32, max_items: usize) -> Vec<u16> {
        let (lo, hi) = self.cell_range(minx, minz, maxx, maxz);
        let mut result: Vec<u16> = Vec::new();

        for z in lo.z..=hi.z {
            for x in lo.x..=hi.x {
                let Some(cell) = self.cells.get(&GridCoord::new(x, z)) else {
                    continue;
                };
                for &id in cell {
                    if result.contains(&id) {
                        continue;
                    }
                    if result.len() >= max_items {
                        return result;
                    }
                    result.push(id);
                }
            }
        }
        result
    }

    pub fn get_item_count_at(&self, x: i32, z: i32) -> usize {
        self.cells.get(&GridCoord::new(x, z)).map_or(0, Vec::len)
    }

    /// Covered cell range `[minx, minz, maxx, maxz]`, inverted when empty
    pub fn get_bounds(&self) -> [i32; 4] {
        self.bounds
    }

    pub fn get_cell_size(&self) -> f32 {
        self.cell_size
    }
}
