//! Configuration for the Recast navigation mesh generation process

use glam::Vec3;

use recast_common::{Error, Result};

use crate::RC_VERTS_PER_POLYGON_MAX;

/// Voxel space configuration of one build
///
/// Agent dimensions and region areas are given in voxels, world space values
/// are converted by the caller.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct RecastConfig {
    /// The width of the field along the x-axis
    pub width: i32,
    /// The height of the field along the z-axis
    pub height: i32,

    /// The width/depth resolution of the field (cell size)
    pub cs: f32,
    /// The height resolution of the field (cell height)
    pub ch: f32,

    /// The minimum bounds of the field's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to 'ceiling' height that will still allow the floor area to be considered walkable
    pub walkable_height: i32,
    /// The maximum height between walkable layers
    pub walkable_climb: i32,
    /// The distance to erode/shrink the walkable area from obstacles
    pub walkable_radius: i32,

    /// The maximum allowed length for contour edges along the border of the mesh
    pub max_edge_len: i32,
    /// The maximum distance a simplified contour's border edges should deviate from the original raw contour
    pub max_simplification_error: f32,
    /// The minimum number of cells allowed to form isolated island areas
    pub min_region_area: i32,
    /// Any regions with an area smaller than this value will be merged with larger regions if possible
    pub merge_region_area: i32,

    /// The maximum number of vertices allowed for polygons generated during the contour to polygon conversion process
    pub max_vertices_per_polygon: i32,

    /// Sets the sampling distance to use when generating the detail mesh
    pub detail_sample_dist: f32,
    /// The maximum distance the detail mesh surface should deviate from the heightfield data
    pub detail_sample_max_error: f32,

    /// The size of the border to add around the heightfield
    pub border_size: i32,
    /// Width and depth of a tile in cells, 0 for solo meshes
    pub tile_size: i32,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            cs: 0.2,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 60.0,
            walkable_height: 2,
            walkable_climb: 2,
            walkable_radius: 1,
            max_edge_len: 12,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_vertices_per_polygon: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            border_size: 0,
            tile_size: 0,
        }
    }
}

/// Grid dimensions covering `bmin..bmax` with cells of size `cs`
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cs: f32) -> (i32, i32) {
    let width = ((bmax.x - bmin.x) / cs + 0.5) as i32;
    let height = ((bmax.z - bmin.z) / cs + 0.5) as i32;
    (width, height)
}

impl RecastConfig {
    /// Creates a new RecastConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounds and derives the grid size from them
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        (self.width, self.height) = calc_grid_size(bmin, bmax, self.cs);
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidMesh(format!(
                "invalid grid size {}x{}",
                self.width, self.height
            )));
        }

        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::InvalidMesh(format!(
                "invalid cell size {} or height {}",
                self.cs, self.ch
            )));
        }

        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidMesh(format!(
                "invalid walkable slope angle {}",
                self.walkable_slope_angle
            )));
        }

        if self.walkable_height < 1 {
            return Err(Error::InvalidMesh("walkable height must be at least 1".to_string()));
        }

        if self.walkable_climb < 0 || self.walkable_radius < 0 || self.border_size < 0 {
            return Err(Error::InvalidMesh(
                "walkable climb, walkable radius and border size must not be negative".to_string(),
            ));
        }

        if self.max_vertices_per_polygon < 3
            || self.max_vertices_per_polygon as usize > RC_VERTS_PER_POLYGON_MAX
        {
            return Err(Error::InvalidMesh(format!(
                "vertices per polygon must be within 3..={}, got {}",
                RC_VERTS_PER_POLYGON_MAX, self.max_vertices_per_polygon
            )));
        }

        if self.tile_size < 0 {
            return Err(Error::InvalidMesh(format!("invalid tile size {}", self.tile_size)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size_rounds_to_nearest() {
        assert_eq!(calc_grid_size(Vec3::ZERO, Vec3::new(10.0, 1.0, 4.0), 0.5), (20, 8));
        assert_eq!(calc_grid_size(Vec3::ZERO, Vec3::new(1.26, 1.0, 1.24), 0.5), (3, 2));
    }

    #[test]
    fn test_default_config_is_valid_once_sized() {
        let mut cfg = RecastConfig::default();
        assert!(cfg.validate().is_err());
        cfg.calculate_grid_size(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 1.0, 5.0));
        assert_eq!((cfg.width, cfg.height), (50, 50));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_polygon_size() {
        let mut cfg = RecastConfig {
            width: 10,
            height: 10,
            ..Default::default()
        };
        cfg.max_vertices_per_polygon = 7;
        assert!(cfg.validate().is_err());
        cfg.max_vertices_per_polygon = 2;
        assert!(cfg.validate().is_err());
    }
}
