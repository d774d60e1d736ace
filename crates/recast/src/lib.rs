//! Recast component for navigation mesh generation
//!
//! Recast is a navigation mesh generator. It takes input triangle meshes and creates navigation
//! meshes suitable for pathfinding in games and simulations.
//!
//! The pipeline runs in voxel space: triangles are rasterized into a
//! [`Heightfield`], filtered, compacted into a [`CompactHeightfield`],
//! partitioned into regions, traced into a [`ContourSet`] and finally
//! turned into a [`PolyMesh`] with a [`PolyMeshDetail`].

mod area;
mod chunky_tri_mesh;
mod compact_heightfield;
mod config;
mod context;
mod contour;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod heightfield_layers;
mod polymesh;
mod rasterization;
mod triangle_utils;
mod watershed;

pub use area::{
    erode_walkable_area, mark_box_area, mark_convex_poly_area, mark_cylinder_area,
    median_filter_walkable_area,
};
pub use chunky_tri_mesh::{ChunkyTriMesh, ChunkyTriMeshNode, DEFAULT_TRIS_PER_CHUNK};
pub use compact_heightfield::{
    get_con, get_dir_for_offset, get_dir_offset_x, get_dir_offset_y, set_con, CompactCell,
    CompactHeightfield, CompactSpan,
};
pub use config::{calc_grid_size, RecastConfig};
pub use context::{LogEntry, LogLevel, ProgressInfo, RecastContext, TimerCategory, TimerEntry};
pub use contour::{BuildContoursFlags, Contour, ContourSet, ContourVertex};
pub use detail_mesh::{PolyMeshDetail, DETAIL_EDGE_BOUNDARY};
pub use distance_field::build_distance_field;
pub use heightfield::{Heightfield, Span};
pub use heightfield_layers::{build_heightfield_layers, HeightfieldLayer, HeightfieldLayerSet};
pub use polymesh::{PolyMesh, RC_PORTAL_FLAG};
pub use rasterization::{rasterize_triangle, rasterize_triangle_soup, rasterize_triangles};
pub use triangle_utils::{
    calc_bounds, clear_unwalkable_triangles, get_bounding_box, mark_walkable_triangles,
    merge_positions_and_indices,
};
pub use watershed::{build_layer_regions, build_regions, build_regions_monotone};

use recast_common::{Error, Result};

/// Area id of unwalkable spans
pub const RC_NULL_AREA: u8 = 0;
/// Default area id of walkable spans
pub const RC_WALKABLE_AREA: u8 = 63;

/// Largest span height representable in a heightfield
pub const RC_SPAN_MAX_HEIGHT: u16 = 8191;

/// Marker of a missing neighbour in the compact span connection field
pub const RC_NOT_CONNECTED: u32 = 0x3f;
/// Region id bit marking border regions
pub const RC_BORDER_REG: u16 = 0x8000;

/// Unused index in polygon vertex and neighbour lists
pub const RC_MESH_NULL_IDX: u16 = 0xffff;
/// Region id of polygons merged from several regions
pub const RC_MULTIPLE_REGS: u16 = 0;

/// Contour vertex flag: the vertex lies on a tile border
pub const RC_BORDER_VERTEX: i32 = 0x10000;
/// Contour vertex flag: the vertex is where the area changes
pub const RC_AREA_BORDER: i32 = 0x20000;
/// Mask of the neighbour region id stored in contour vertex flags
pub const RC_CONTOUR_REG_MASK: i32 = 0xffff;

/// Max vertices per polygon supported by the mesher
pub const RC_VERTS_PER_POLYGON_MAX: usize = 6;

/// Runs the Recast pipeline with a fixed configuration
///
/// Each stage is exposed separately so callers can keep intermediates or
/// insert their own area marking between stages.
#[derive(Debug)]
pub struct RecastBuilder {
    config: RecastConfig,
}

impl RecastBuilder {
    pub fn new(config: RecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Rasterizes the input triangles and applies the span filters.
    pub fn build_heightfield(
        &self,
        ctx: &mut RecastContext,
        vertices: &[f32],
        indices: &[i32],
    ) -> Result<Heightfield> {
        let cfg = &self.config;
        cfg.validate()?;
        if vertices.is_empty() || indices.is_empty() {
            return Err(Error::InvalidMesh("input geometry is empty".to_string()));
        }

        let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch);

        ctx.timed(TimerCategory::Rasterization, |_| -> Result<()> {
            let mut areas = vec![RC_NULL_AREA; indices.len() / 3];
            mark_walkable_triangles(cfg.walkable_slope_angle, vertices, indices, &mut areas)?;
            rasterize_triangles(&mut hf, vertices, indices, &areas, cfg.walkable_climb)
        })?;

        ctx.timed(TimerCategory::Filtering, |_| -> Result<()> {
            hf.filter_low_hanging_walkable_obstacles(cfg.walkable_climb)?;
            hf.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb)?;
            hf.filter_walkable_low_height_spans(cfg.walkable_height)
        })?;

        ctx.log_debug(format!(
            "heightfield {}x{} with {} spans",
            hf.width,
            hf.height,
            hf.span_count()
        ));
        Ok(hf)
    }

    /// Compacts the heightfield and erodes the walkable area by the agent radius.
    pub fn build_compact_heightfield(
        &self,
        ctx: &mut RecastContext,
        hf: &Heightfield,
    ) -> Result<CompactHeightfield> {
        let cfg = &self.config;
        let mut chf = ctx.timed(TimerCategory::CompactHeightfield, |_| {
            CompactHeightfield::build_from_heightfield(hf, cfg.walkable_height, cfg.walkable_climb)
        })?;
        ctx.timed(TimerCategory::ErodeArea, |_| {
            erode_walkable_area(&mut chf, cfg.walkable_radius)
        })?;
        Ok(chf)
    }

    /// Builds the distance field and watershed regions.
    pub fn build_regions(&self, ctx: &mut RecastContext, chf: &mut CompactHeightfield) -> Result<()> {
        let cfg = &self.config;
        ctx.timed(TimerCategory::DistanceField, |_| build_distance_field(chf))?;
        ctx.timed(TimerCategory::Regions, |_| {
            build_regions(chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)
        })
    }

    pub fn build_contours(&self, ctx: &mut RecastContext, chf: &CompactHeightfield) -> Result<ContourSet> {
        let cfg = &self.config;
        ctx.timed(TimerCategory::Contours, |_| {
            ContourSet::build(
                chf,
                cfg.max_simplification_error,
                cfg.max_edge_len,
                BuildContoursFlags::default(),
            )
        })
    }

    pub fn build_poly_mesh(&self, ctx: &mut RecastContext, cset: &ContourSet) -> Result<PolyMesh> {
        let nvp = self.config.max_vertices_per_polygon as usize;
        ctx.timed(TimerCategory::PolyMesh, |_| PolyMesh::build_from_contour_set(cset, nvp))
    }

    pub fn build_detail_mesh(
        &self,
        ctx: &mut RecastContext,
        pmesh: &PolyMesh,
        chf: &CompactHeightfield,
    ) -> Result<PolyMeshDetail> {
        let cfg = &self.config;
        ctx.timed(TimerCategory::DetailMesh, |_| {
            PolyMeshDetail::build_from_poly_mesh(
                pmesh,
                chf,
                cfg.detail_sample_dist,
                cfg.detail_sample_max_error,
            )
        })
    }

    /// Splits the compact heightfield into tile cache layers.
    pub fn build_layers(&self, ctx: &mut RecastContext, chf: &CompactHeightfield) -> Result<HeightfieldLayerSet> {
        let cfg = &self.config;
        ctx.timed(TimerCategory::Layers, |_| {
            build_heightfield_layers(chf, cfg.border_size, cfg.walkable_height)
        })
    }

    /// Runs the whole pipeline from triangles to polygon and detail mesh
    pub fn build_mesh(&self, vertices: &[f32], indices: &[i32]) -> Result<(PolyMesh, PolyMeshDetail)> {
        let mut ctx = RecastContext::new();
        self.build_mesh_with_context(&mut ctx, vertices, indices)
    }

    pub fn build_mesh_with_context(
        &self,
        ctx: &mut RecastContext,
        vertices: &[f32],
        indices: &[i32],
    ) -> Result<(PolyMesh, PolyMeshDetail)> {
        ctx.start_timer(TimerCategory::Total);
        let hf = self.build_heightfield(ctx, vertices, indices)?;
        let mut chf = self.build_compact_heightfield(ctx, &hf)?;
        drop(hf);
        self.build_regions(ctx, &mut chf)?;
        let cset = self.build_contours(ctx, &chf)?;
        let pmesh = self.build_poly_mesh(ctx, &cset)?;
        let dmesh = self.build_detail_mesh(ctx, &pmesh, &chf)?;
        ctx.stop_timer(TimerCategory::Total);

        ctx.log_info(format!(
            "built {} polygons, {} detail triangles",
            pmesh.npolys,
            dmesh.tri_count()
        ));
        Ok((pmesh, dmesh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn plane(size: f32) -> (Vec<f32>, Vec<i32>) {
        let verts = vec![
            0.0, 0.0, 0.0, //
            0.0, 0.0, size, //
            size, 0.0, size, //
            size, 0.0, 0.0,
        ];
        (verts, vec![0, 1, 2, 0, 2, 3])
    }

    fn builder_for(verts: &[f32], indices: &[i32]) -> RecastBuilder {
        let (bmin, bmax) = get_bounding_box(verts, indices).unwrap();
        let mut cfg = RecastConfig {
            cs: 0.2,
            ch: 0.2,
            min_region_area: 8,
            ..Default::default()
        };
        cfg.calculate_grid_size(bmin, bmax);
        RecastBuilder::new(cfg)
    }

    #[test]
    fn test_flat_plane_pipeline() {
        let (verts, indices) = plane(10.0);
        let builder = builder_for(&verts, &indices);
        let mut ctx = RecastContext::new();
        let (pmesh, dmesh) = builder.build_mesh_with_context(&mut ctx, &verts, &indices).unwrap();

        assert!(pmesh.npolys >= 1);
        assert_eq!(dmesh.meshes.len(), pmesh.npolys);
        assert!(pmesh.areas.iter().all(|&a| a == RC_WALKABLE_AREA));

        // Eroded by one cell, the mesh stays within the plane.
        let bmax = pmesh.bmin + Vec3::new(10.0, 0.0, 10.0);
        for i in 0..pmesh.nverts {
            let v = pmesh.vertex(i);
            let x = pmesh.bmin.x + v[0] as f32 * pmesh.cs;
            let z = pmesh.bmin.z + v[2] as f32 * pmesh.cs;
            assert!(x >= 0.19 && x <= bmax.x - 0.19, "x = {}", x);
            assert!(z >= 0.19 && z <= bmax.z - 0.19, "z = {}", z);
        }
        assert!(ctx.accumulated_time(TimerCategory::Total).is_some());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let (verts, indices) = plane(10.0);
        let builder = builder_for(&verts, &indices);
        assert!(builder.build_mesh(&verts, &[]).is_err());
        assert!(builder.build_mesh(&[], &[]).is_err());
    }

    #[test]
    fn test_steep_geometry_yields_no_polygons() {
        // A vertical wall only.
        let verts = vec![0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 5.0, 5.0, 0.0, 5.0, 0.0, 0.0];
        let indices = vec![0, 1, 2, 0, 2, 3];
        let mut builder = builder_for(&verts, &indices);
        builder.config.bmax.z += 1.0;
        builder.config.height = 5;
        let (pmesh, _) = builder.build_mesh(&verts, &indices).unwrap();
        assert_eq!(pmesh.npolys, 0);
    }
}
