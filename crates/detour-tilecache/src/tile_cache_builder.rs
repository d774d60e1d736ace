//! Rebuilds navigation mesh tile data from tile cache layers
//!
//! Obstacles are carved into a decompressed layer by clearing the area of
//! the cells they cover. The carved layer is turned back into a compact
//! heightfield with one span per cell and runs through the Recast region,
//! contour and polygon stages.

use glam::Vec3;

use detour::{
    create_nav_mesh_data, NavMeshCreateParams, OffMeshConnectionParams, PolyFlags, MAX_VERTS_PER_POLY,
};
use recast::{
    build_layer_regions, set_con, BuildContoursFlags, CompactCell, CompactHeightfield, CompactSpan,
    ContourSet, PolyMesh, RC_NOT_CONNECTED,
};
use recast_common::{Error, Result};

use crate::tile_cache::{ObstacleShape, TileCacheParams};
use crate::tile_cache_data::{
    TileCacheLayer, DT_TILECACHE_NULL_AREA, DT_TILECACHE_NULL_HEIGHT, DT_TILECACHE_WALKABLE_AREA,
};

/// Adjusts polygon areas and flags of a rebuilt tile before it is packed
///
/// Any `FnMut(&mut NavMeshCreateParams)` closure is a mesh process.
pub trait TileCacheMeshProcess {
    fn process(&mut self, params: &mut NavMeshCreateParams);
}

impl<F> TileCacheMeshProcess for F
where
    F: FnMut(&mut NavMeshCreateParams),
{
    fn process(&mut self, params: &mut NavMeshCreateParams) {
        self(params)
    }
}

/// Maps the walkable area to area 0 with the walk flag and bakes the
/// off-mesh connections that start inside the tile.
#[derive(Debug, Clone, Default)]
pub struct DefaultMeshProcess {
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,
}

impl DefaultMeshProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_off_mesh_connections(off_mesh_connections: Vec<OffMeshConnectionParams>) -> Self {
        Self { off_mesh_connections }
    }
}

impl TileCacheMeshProcess for DefaultMeshProcess {
    fn process(&mut self, params: &mut NavMeshCreateParams) {
        for (area, flags) in params.poly_areas.iter_mut().zip(params.poly_flags.iter_mut()) {
            if *area == DT_TILECACHE_WALKABLE_AREA {
                *area = 0;
            }
            if *area == 0 {
                *flags = PolyFlags::WALK.bits();
            }
        }

        let (bmin, bmax) = (params.bmin, params.bmax);
        let inside = |p: &[f32; 3]| p[0] >= bmin[0] && p[0] < bmax[0] && p[2] >= bmin[2] && p[2] < bmax[2];
        for con in &self.off_mesh_connections {
            if inside(&con.start) {
                params.add_off_mesh_connection(con);
            }
        }
    }
}

/// Sets `area` on the walkable cells whose center lies in `bmin`..`bmax`
/// and passes `inside`. Returns the number of cells changed.
fn mark_cells(
    layer: &mut TileCacheLayer,
    cs: f32,
    ch: f32,
    bmin: [f32; 3],
    bmax: [f32; 3],
    area: u8,
    inside: impl Fn(f32, f32) -> bool,
) -> usize {
    let orig = layer.header.bmin;
    let w = layer.header.width as i32;
    let h = layer.header.height as i32;

    let minx = ((bmin[0] - orig[0]) / cs).floor() as i32;
    let maxx = ((bmax[0] - orig[0]) / cs).floor() as i32;
    let minz = ((bmin[2] - orig[2]) / cs).floor() as i32;
    let maxz = ((bmax[2] - orig[2]) / cs).floor() as i32;
    let miny = ((bmin[1] - orig[1]) / ch).floor() as i32;
    let maxy = ((bmax[1] - orig[1]) / ch).floor() as i32;

    if maxx < 0 || minx >= w || maxz < 0 || minz >= h {
        return 0;
    }

    let mut count = 0;
    for z in minz.max(0)..=maxz.min(h - 1) {
        for x in minx.max(0)..=maxx.min(w - 1) {
            let idx = layer.index(x, z);
            let y = layer.heights[idx];
            if y == DT_TILECACHE_NULL_HEIGHT {
                continue;
            }
            let y = y as i32;
            if y < miny || y > maxy {
                continue;
            }
            let px = orig[0] + (x as f32 + 0.5) * cs;
            let pz = orig[2] + (z as f32 + 0.5) * cs;
            if !inside(px, pz) {
                continue;
            }
            if layer.areas[idx] != area {
                layer.areas[idx] = area;
                count += 1;
            }
        }
    }
    count
}

/// Marks the cells inside an upright cylinder standing on `pos`
pub fn mark_cylinder_area(
    layer: &mut TileCacheLayer,
    cs: f32,
    ch: f32,
    pos: &[f32; 3],
    radius: f32,
    height: f32,
    area: u8,
) -> usize {
    let bmin = [pos[0] - radius, pos[1], pos[2] - radius];
    let bmax = [pos[0] + radius, pos[1] + height, pos[2] + radius];
    let r2 = radius * radius;
    mark_cells(layer, cs, ch, bmin, bmax, area, |x, z| {
        let dx = x - pos[0];
        let dz = z - pos[2];
        dx * dx + dz * dz <= r2
    })
}

/// Marks the cells overlapping an axis aligned box
pub fn mark_box_area(layer: &mut TileCacheLayer, cs: f32, ch: f32, bmin: &[f32; 3], bmax: &[f32; 3], area: u8) -> usize {
    mark_cells(layer, cs, ch, *bmin, *bmax, area, |_, _| true)
}

/// Marks the cells inside a box rotated by `y_radians` around its center
pub fn mark_oriented_box_area(
    layer: &mut TileCacheLayer,
    cs: f32,
    ch: f32,
    center: &[f32; 3],
    half_extents: &[f32; 3],
    y_radians: f32,
    area: u8,
) -> usize {
    let max_r = 1.41 * half_extents[0].max(half_extents[2]);
    let bmin = [center[0] - max_r, center[1] - half_extents[1], center[2] - max_r];
    let bmax = [center[0] + max_r, center[1] + half_extents[1], center[2] + max_r];
    let (sin, cos) = y_radians.sin_cos();
    mark_cells(layer, cs, ch, bmin, bmax, area, |x, z| {
        let dx = x - center[0];
        let dz = z - center[2];
        // Rotate into the box frame.
        let xrot = cos * dx - sin * dz;
        let zrot = sin * dx + cos * dz;
        xrot.abs() <= half_extents[0] && zrot.abs() <= half_extents[2]
    })
}

/// Clears the area of every cell covered by `shape`
pub fn mark_obstacle(layer: &mut TileCacheLayer, cs: f32, ch: f32, shape: &ObstacleShape) -> usize {
    match *shape {
        ObstacleShape::Cylinder { pos, radius, height } => {
            mark_cylinder_area(layer, cs, ch, &pos, radius, height, DT_TILECACHE_NULL_AREA)
        }
        ObstacleShape::Box { bmin, bmax } => mark_box_area(layer, cs, ch, &bmin, &bmax, DT_TILECACHE_NULL_AREA),
        ObstacleShape::OrientedBox {
            center,
            half_extents,
            y_radians,
        } => mark_oriented_box_area(layer, cs, ch, &center, &half_extents, y_radians, DT_TILECACHE_NULL_AREA),
    }
}

/// Compact heightfield with one span per walkable layer cell
///
/// Spans link along the layer connections. Cells cleared by obstacles get
/// no span, so their neighbours see a wall.
pub fn layer_to_compact_heightfield(layer: &TileCacheLayer, params: &TileCacheParams) -> Result<CompactHeightfield> {
    let header = &layer.header;
    let w = header.width as i32;
    let h = header.height as i32;
    let n = header.cell_count();
    if layer.heights.len() != n || layer.areas.len() != n || layer.cons.len() != n {
        return Err(Error::Recast(format!(
            "layer ({}, {}, {}) grids do not match its {}x{} size",
            header.tx, header.ty, header.tlayer, w, h
        )));
    }

    let walkable_height = (params.walkable_height / params.ch).ceil() as i32;
    let walkable_climb = (params.walkable_climb / params.ch).floor() as i32;

    let mut cells = vec![CompactCell::default(); n];
    let mut spans = Vec::new();
    let mut areas = Vec::new();
    for (idx, cell) in cells.iter_mut().enumerate() {
        cell.index = spans.len() as u32;
        if !layer.is_walkable(idx) {
            continue;
        }
        spans.push(CompactSpan {
            y: layer.heights[idx] as u16,
            reg: 0,
            con: 0,
            h: 0xff,
        });
        areas.push(layer.areas[idx]);
        cell.count = 1;
    }

    for y in 0..h {
        for x in 0..w {
            let idx = layer.index(x, y);
            let cell = cells[idx];
            if cell.count == 0 {
                continue;
            }
            let mut span = spans[cell.index as usize];
            let con = layer.cons[idx] & 0x0f;
            for dir in 0..4 {
                set_con(&mut span, dir, RC_NOT_CONNECTED);
                if con & (1 << dir) == 0 {
                    continue;
                }
                let nx = x + recast::get_dir_offset_x(dir);
                let ny = y + recast::get_dir_offset_y(dir);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                if cells[layer.index(nx, ny)].count > 0 {
                    set_con(&mut span, dir, 0);
                }
            }
            spans[cell.index as usize] = span;
        }
    }

    let bmin = Vec3::from_array(header.bmin);
    let mut bmax = Vec3::from_array(header.bmax);
    bmax.y += walkable_height as f32 * params.ch;

    Ok(CompactHeightfield {
        width: w,
        height: h,
        span_count: spans.len(),
        walkable_height,
        walkable_climb,
        border_size: 0,
        max_distance: 0,
        max_regions: 0,
        bmin,
        bmax,
        cs: params.cs,
        ch: params.ch,
        cells,
        spans,
        dist: Vec::new(),
        areas,
    })
}

/// Runs the region, contour and polygon stages over a carved layer.
///
/// Unconnected edges on the layer boundary become tile portals.
pub fn build_tile_poly_mesh(layer: &TileCacheLayer, params: &TileCacheParams) -> Result<PolyMesh> {
    let mut chf = layer_to_compact_heightfield(layer, params)?;
    if chf.span_count == 0 {
        return Ok(PolyMesh::default());
    }

    build_layer_regions(&mut chf, 0, 0)?;
    let cset = ContourSet::build(&chf, params.max_simplification_error, 0, BuildContoursFlags::default())?;
    let mut pmesh = PolyMesh::build_from_contour_set(&cset, MAX_VERTS_PER_POLY)?;
    pmesh.mark_portal_edges(chf.width, chf.height);
    Ok(pmesh)
}

/// Navigation mesh tile data for a carved layer, or `None` when nothing
/// walkable is left
pub fn build_nav_mesh_tile_data(
    layer: &TileCacheLayer,
    params: &TileCacheParams,
    mesh_process: &mut dyn TileCacheMeshProcess,
) -> Result<Option<Vec<u8>>> {
    let pmesh = build_tile_poly_mesh(layer, params)?;
    if pmesh.npolys == 0 {
        return Ok(None);
    }

    let header = &layer.header;
    let mut create = NavMeshCreateParams::from_poly_mesh(&pmesh, None);
    create.walkable_height = params.walkable_height;
    create.walkable_radius = params.walkable_radius;
    create.walkable_climb = params.walkable_climb;
    create.tile_x = header.tx;
    create.tile_y = header.ty;
    create.tile_layer = header.tlayer;
    create.build_bv_tree = true;

    mesh_process.process(&mut create);

    create_nav_mesh_data(&create).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::{cache_params, flat_layer, TILE_CELLS};
    use recast::get_con;

    #[test]
    fn test_cylinder_marks_cells_within_radius() {
        let mut layer = flat_layer(TILE_CELLS, 0, 0, 0);
        // Cell centers sit on a 0.5 grid offset by 0.25.
        let n = mark_cylinder_area(&mut layer, 0.5, 0.2, &[4.0, 0.0, 4.0], 0.5, 1.0, DT_TILECACHE_NULL_AREA);
        assert_eq!(n, 4);
        for (x, z) in [(7, 7), (8, 7), (7, 8), (8, 8)] {
            assert_eq!(layer.areas[layer.index(x, z)], DT_TILECACHE_NULL_AREA);
        }
        assert_eq!(layer.areas[layer.index(6, 7)], DT_TILECACHE_WALKABLE_AREA);

        // Marking again changes nothing.
        let n = mark_cylinder_area(&mut layer, 0.5, 0.2, &[4.0, 0.0, 4.0], 0.5, 1.0, DT_TILECACHE_NULL_AREA);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_obstacle_above_the_floor_is_ignored() {
        let mut layer = flat_layer(TILE_CELLS, 0, 0, 0);
        let n = mark_cylinder_area(&mut layer, 0.5, 0.2, &[4.0, 3.0, 4.0], 1.0, 1.0, DT_TILECACHE_NULL_AREA);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_box_marks_overlapped_cells() {
        let mut layer = flat_layer(TILE_CELLS, 0, 0, 0);
        // Covers cells 2..=3 along x and 4..=5 along z.
        let n = mark_box_area(&mut layer, 0.5, 0.2, &[1.0, -1.0, 2.0], &[1.9, 1.0, 2.9], 5);
        assert_eq!(n, 4);
        assert_eq!(layer.areas[layer.index(2, 4)], 5);
        assert_eq!(layer.areas[layer.index(3, 5)], 5);
        assert_eq!(layer.areas[layer.index(4, 5)], DT_TILECACHE_WALKABLE_AREA);

        // Boxes outside the layer are clipped away.
        assert_eq!(mark_box_area(&mut layer, 0.5, 0.2, &[20.0, 0.0, 0.0], &[21.0, 1.0, 1.0], 5), 0);
    }

    #[test]
    fn test_oriented_box_rotation() {
        // A thin bar along x, then the same bar turned a quarter around y.
        let mut layer = flat_layer(TILE_CELLS, 0, 0, 0);
        let center = [4.0, 0.0, 4.0];
        let half = [2.0, 1.0, 0.3];
        mark_oriented_box_area(&mut layer, 0.5, 0.2, &center, &half, 0.0, DT_TILECACHE_NULL_AREA);
        assert_eq!(layer.areas[layer.index(4, 7)], DT_TILECACHE_NULL_AREA);
        assert_eq!(layer.areas[layer.index(7, 4)], DT_TILECACHE_WALKABLE_AREA);

        let mut layer = flat_layer(TILE_CELLS, 0, 0, 0);
        mark_oriented_box_area(
            &mut layer,
            0.5,
            0.2,
            &center,
            &half,
            std::f32::consts::FRAC_PI_2,
            DT_TILECACHE_NULL_AREA,
        );
        assert_eq!(layer.areas[layer.index(4, 7)], DT_TILECACHE_WALKABLE_AREA);
        assert_eq!(layer.areas[layer.index(7, 4)], DT_TILECACHE_NULL_AREA);
    }

    #[test]
    fn test_layer_to_compact_heightfield() {
        let mut layer = flat_layer(4, 0, 0, 0);
        let params = cache_params(4);
        let blocked = layer.index(1, 1);
        layer.areas[blocked] = DT_TILECACHE_NULL_AREA;

        let chf = layer_to_compact_heightfield(&layer, &params).unwrap();
        assert_eq!(chf.span_count, 15);
        assert_eq!(chf.cell(1, 1).count, 0);
        assert_eq!(chf.walkable_height, 10);
        assert_eq!(chf.walkable_climb, 2);

        // (0, 1) is walled off towards the blocked cell but linked along z.
        let span = chf.spans[chf.cell(0, 1).index as usize];
        assert_eq!(get_con(&span, 2), RC_NOT_CONNECTED);
        assert_eq!(get_con(&span, 1), 0);
        assert_eq!(get_con(&span, 0), RC_NOT_CONNECTED);
    }

    #[test]
    fn test_flat_layer_builds_tile_data() {
        let layer = flat_layer(TILE_CELLS, 0, 0, 0);
        let params = cache_params(4);
        let pmesh = build_tile_poly_mesh(&layer, &params).unwrap();
        assert!(pmesh.npolys >= 1);

        let mut process = DefaultMeshProcess::new();
        let data = build_nav_mesh_tile_data(&layer, &params, &mut process).unwrap().unwrap();
        let header = detour::binary_format::read_tile_header(&data).unwrap();
        assert_eq!(header.poly_count as usize, pmesh.npolys);
        assert_eq!((header.x, header.y, header.layer), (0, 0, 0));
    }

    #[test]
    fn test_fully_blocked_layer_has_no_tile() {
        let mut layer = flat_layer(4, 0, 0, 0);
        layer.areas.fill(DT_TILECACHE_NULL_AREA);
        let mut process = DefaultMeshProcess::new();
        let data = build_nav_mesh_tile_data(&layer, &cache_params(4), &mut process).unwrap();
        assert!(data.is_none());
    }

    #[test]
    fn test_default_mesh_process() {
        let mut params = NavMeshCreateParams {
            poly_areas: vec![DT_TILECACHE_WALKABLE_AREA, 0, 5],
            poly_flags: vec![0, 0, 0],
            bmin: [0.0; 3],
            bmax: [8.0, 1.0, 8.0],
            ..Default::default()
        };
        let con = OffMeshConnectionParams {
            start: [1.0, 0.0, 1.0],
            end: [9.0, 0.0, 1.0],
            radius: 0.5,
            bidirectional: true,
            area: 0,
            flags: 1,
            user_id: 7,
        };
        let outside = OffMeshConnectionParams {
            start: [9.0, 0.0, 1.0],
            ..con
        };
        let mut process = DefaultMeshProcess::with_off_mesh_connections(vec![con, outside]);
        process.process(&mut params);

        assert_eq!(params.poly_areas, vec![0, 0, 5]);
        assert_eq!(params.poly_flags, vec![1, 1, 0]);
        assert_eq!(params.off_mesh_con_count(), 1);
        assert_eq!(params.off_mesh_con_user_id, vec![7]);
    }

    #[test]
    fn test_closure_mesh_process() {
        let mut calls = 0;
        let mut process = |p: &mut NavMeshCreateParams| {
            calls += 1;
            p.poly_flags.iter_mut().for_each(|f| *f = 4);
        };
        let layer = flat_layer(TILE_CELLS, 0, 0, 0);
        let data = build_nav_mesh_tile_data(&layer, &cache_params(4), &mut process).unwrap();
        assert!(data.is_some());
        assert_eq!(calls, 1);
    }
}
