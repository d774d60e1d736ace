//! Generator configurations
//!
//! Agent dimensions and region sizes are given in voxels, the same way a
//! [`RecastConfig`] takes them. Region areas are side lengths here and get
//! squared when the Recast configuration is derived; the detail sampling
//! values are scaled by the cell size and height.

use detour::OffMeshConnectionParams;
use glam::Vec3;
use recast::RecastConfig;

use crate::error::{BuildStage, GeneratorError};

/// Recast parameters shared by every generator
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct BuildSettings {
    pub cs: f32,
    pub ch: f32,
    /// Degrees
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    /// Side length of the smallest island region kept
    pub min_region_area: i32,
    /// Side length below which regions are merged into neighbours
    pub merge_region_area: i32,
    pub max_verts_per_poly: i32,
    /// In cells, values below 0.9 disable detail sampling
    pub detail_sample_dist: f32,
    /// In cell heights
    pub detail_sample_max_error: f32,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            cs: 0.2,
            ch: 0.2,
            walkable_slope_angle: 60.0,
            walkable_height: 2,
            walkable_climb: 2,
            walkable_radius: 1,
            max_edge_len: 12,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
        }
    }
}

impl BuildSettings {
    /// Recast configuration covering `bmin..bmax` without tiling
    pub fn to_recast_config(&self, bmin: Vec3, bmax: Vec3) -> RecastConfig {
        let mut cfg = RecastConfig {
            cs: self.cs,
            ch: self.ch,
            walkable_slope_angle: self.walkable_slope_angle,
            walkable_height: self.walkable_height,
            walkable_climb: self.walkable_climb,
            walkable_radius: self.walkable_radius,
            max_edge_len: self.max_edge_len,
            max_simplification_error: self.max_simplification_error,
            min_region_area: self.min_region_area * self.min_region_area,
            merge_region_area: self.merge_region_area * self.merge_region_area,
            max_vertices_per_polygon: self.max_verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cs * self.detail_sample_dist
            },
            detail_sample_max_error: self.ch * self.detail_sample_max_error,
            ..Default::default()
        };
        cfg.calculate_grid_size(bmin, bmax);
        cfg
    }

    /// Agent height in world units
    pub fn walkable_height_world(&self) -> f32 {
        self.walkable_height as f32 * self.ch
    }

    /// Agent radius in world units
    pub fn walkable_radius_world(&self) -> f32 {
        self.walkable_radius as f32 * self.cs
    }

    /// Max climb in world units
    pub fn walkable_climb_world(&self) -> f32 {
        self.walkable_climb as f32 * self.ch
    }

    /// Padding in cells around each tile so erosion sees the neighbours
    pub(crate) fn tile_border_size(&self) -> i32 {
        self.walkable_radius + 3
    }
}

/// Single tile navmesh over the whole input
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct SoloNavMeshConfig {
    #[cfg_attr(feature = "serialization", serde(flatten))]
    pub settings: BuildSettings,
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,
}

/// Default tile width and depth in cells
pub const DEFAULT_TILE_SIZE: i32 = 32;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct TiledNavMeshConfig {
    #[cfg_attr(feature = "serialization", serde(flatten))]
    pub settings: BuildSettings,
    /// Width and depth of a tile in cells
    pub tile_size: i32,
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,
}

impl Default for TiledNavMeshConfig {
    fn default() -> Self {
        Self {
            settings: BuildSettings::default(),
            tile_size: DEFAULT_TILE_SIZE,
            off_mesh_connections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(default))]
pub struct TileCacheGeneratorConfig {
    #[cfg_attr(feature = "serialization", serde(flatten))]
    pub settings: BuildSettings,
    pub tile_size: i32,
    /// Layers reserved per tile column in the cache and the navmesh
    pub expected_layers_per_tile: i32,
    pub max_obstacles: i32,
    /// World bounds to cover instead of the input's bounding box
    pub bounds: Option<([f32; 3], [f32; 3])>,
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,
}

impl Default for TileCacheGeneratorConfig {
    fn default() -> Self {
        Self {
            settings: BuildSettings::default(),
            tile_size: DEFAULT_TILE_SIZE,
            expected_layers_per_tile: 4,
            max_obstacles: 128,
            bounds: None,
            off_mesh_connections: Vec::new(),
        }
    }
}

pub(crate) fn check_tile_size(tile_size: i32) -> Result<(), GeneratorError> {
    if tile_size <= 0 {
        return Err(GeneratorError::new(
            BuildStage::Config,
            format!("tile size must be positive, got {}", tile_size),
        ));
    }
    Ok(())
}

/// Tile grid layout shared by the tiled and tile cache generators
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TileGrid {
    pub tiles_x: i32,
    pub tiles_y: i32,
    /// World size of a tile
    pub tile_world_size: f32,
}

impl TileGrid {
    pub fn new(cfg: &RecastConfig, tile_size: i32) -> Self {
        Self {
            tiles_x: (cfg.width + tile_size - 1) / tile_size,
            tiles_y: (cfg.height + tile_size - 1) / tile_size,
            tile_world_size: tile_size as f32 * cfg.cs,
        }
    }

    /// Bits of a poly ref spent on the tile index and on the poly index
    /// for `tile_count` tiles
    pub fn ref_bits(tile_count: i32) -> (u32, u32) {
        let tile_bits = recast_common::ilog2(recast_common::next_pow2(tile_count.max(1) as u32)).min(14);
        (tile_bits, 22 - tile_bits)
    }

    /// Recast configuration of tile `(tx, ty)` including its border
    pub fn tile_config(&self, base: &RecastConfig, tile_size: i32, border: i32, tx: i32, ty: i32) -> RecastConfig {
        let mut cfg = base.clone();
        cfg.tile_size = tile_size;
        cfg.border_size = border;
        cfg.width = tile_size + border * 2;
        cfg.height = tile_size + border * 2;

        let pad = border as f32 * cfg.cs;
        cfg.bmin = Vec3::new(
            base.bmin.x + tx as f32 * self.tile_world_size - pad,
            base.bmin.y,
            base.bmin.z + ty as f32 * self.tile_world_size - pad,
        );
        cfg.bmax = Vec3::new(
            base.bmin.x + (tx + 1) as f32 * self.tile_world_size + pad,
            base.bmax.y,
            base.bmin.z + (ty + 1) as f32 * self.tile_world_size + pad,
        );
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recast_config_conversion() {
        let settings = BuildSettings::default();
        let cfg = settings.to_recast_config(Vec3::ZERO, Vec3::new(10.0, 1.0, 4.0));
        assert_eq!((cfg.width, cfg.height), (50, 20));
        assert_eq!(cfg.min_region_area, 64);
        assert_eq!(cfg.merge_region_area, 400);
        assert_relative_eq!(cfg.detail_sample_dist, 1.2, epsilon = 1e-6);
        assert_relative_eq!(cfg.detail_sample_max_error, 0.2, epsilon = 1e-6);
        assert_eq!(cfg.tile_size, 0);

        let coarse = BuildSettings {
            detail_sample_dist: 0.5,
            ..settings
        };
        assert_eq!(coarse.to_recast_config(Vec3::ZERO, Vec3::ONE).detail_sample_dist, 0.0);
    }

    #[test]
    fn test_world_unit_agent_values() {
        let settings = BuildSettings {
            cs: 0.3,
            ch: 0.2,
            walkable_height: 10,
            walkable_radius: 2,
            walkable_climb: 4,
            ..Default::default()
        };
        assert_relative_eq!(settings.walkable_height_world(), 2.0, epsilon = 1e-6);
        assert_relative_eq!(settings.walkable_radius_world(), 0.6, epsilon = 1e-6);
        assert_relative_eq!(settings.walkable_climb_world(), 0.8, epsilon = 1e-6);
        assert_eq!(settings.tile_border_size(), 5);
    }

    #[test]
    fn test_tile_grid_and_ref_bits() {
        let base = BuildSettings::default().to_recast_config(Vec3::ZERO, Vec3::new(20.0, 1.0, 10.0));
        let grid = TileGrid::new(&base, 32);
        assert_eq!((grid.tiles_x, grid.tiles_y), (4, 2));
        assert_relative_eq!(grid.tile_world_size, 6.4, epsilon = 1e-5);

        assert_eq!(TileGrid::ref_bits(8), (3, 19));
        assert_eq!(TileGrid::ref_bits(9), (4, 18));
        assert_eq!(TileGrid::ref_bits(1), (0, 22));
        assert_eq!(TileGrid::ref_bits(1 << 20), (14, 8));

        let cfg = grid.tile_config(&base, 32, 4, 1, 0);
        assert_eq!((cfg.width, cfg.height, cfg.border_size), (40, 40, 4));
        assert_relative_eq!(cfg.bmin.x, 6.4 - 0.8, epsilon = 1e-5);
        assert_relative_eq!(cfg.bmax.x, 12.8 + 0.8, epsilon = 1e-5);
        assert_relative_eq!(cfg.bmin.z, -0.8, epsilon = 1e-5);
        assert_eq!(cfg.bmax.y, 1.0);
    }

    #[test]
    fn test_tile_size_check() {
        assert!(check_tile_size(32).is_ok());
        let err = check_tile_size(0).unwrap_err();
        assert_eq!(err.stage, BuildStage::Config);
    }
}
