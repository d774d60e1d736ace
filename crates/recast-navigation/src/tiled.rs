//! Tiled navmesh generation
//!
//! The input is split into square tiles of `tile_size` cells. Each tile is
//! voxelized with a border of `walkable_radius + 3` cells so erosion and
//! region building see the neighbouring geometry, then packed and added to
//! a tiled [`NavMesh`]. A tile that fails to build is skipped with a
//! warning.

use detour::{NavMesh, NavMeshParams, PolyRef};
use recast::{
    get_bounding_box, ChunkyTriMesh, CompactHeightfield, ContourSet, Heightfield, PolyMesh, PolyMeshDetail,
    RecastBuilder, RecastContext, TimerCategory, DEFAULT_TRIS_PER_CHUNK,
};

use crate::config::{check_tile_size, TileGrid, TiledNavMeshConfig};
use crate::error::{report, BuildStage, Generated, GeneratorError};
use crate::solo::{assign_poly_flags, pack_tile};

/// Pipeline products of one tile
#[derive(Debug, Default)]
pub struct TileIntermediates {
    pub tile_x: i32,
    pub tile_y: i32,
    pub heightfield: Option<Heightfield>,
    pub compact_heightfield: Option<CompactHeightfield>,
    pub contour_set: Option<ContourSet>,
    pub poly_mesh: Option<PolyMesh>,
    pub poly_mesh_detail: Option<PolyMeshDetail>,
}

#[derive(Debug, Default)]
pub struct TiledNavMeshIntermediates {
    pub context: RecastContext,
    /// One entry per tile that had input triangles, kept or not
    pub tiles: Vec<TileIntermediates>,
}

pub type TiledNavMeshResult = Generated<NavMesh, TiledNavMeshIntermediates>;

pub fn generate_tiled_nav_mesh(
    positions: &[f32],
    indices: &[i32],
    config: &TiledNavMeshConfig,
    keep_intermediates: bool,
) -> TiledNavMeshResult {
    let mut intermediates = TiledNavMeshIntermediates::default();
    let result = build(positions, indices, config, keep_intermediates, &mut intermediates);
    report(&mut intermediates.context, &result);
    Generated { result, intermediates }
}

fn build(
    positions: &[f32],
    indices: &[i32],
    config: &TiledNavMeshConfig,
    keep: bool,
    out: &mut TiledNavMeshIntermediates,
) -> Result<NavMesh, GeneratorError> {
    check_tile_size(config.tile_size)?;
    let (bmin, bmax) = get_bounding_box(positions, indices).map_err(GeneratorError::at(BuildStage::Bounds))?;
    let base = config.settings.to_recast_config(bmin, bmax);
    let grid = TileGrid::new(&base, config.tile_size);

    let (tile_bits, poly_bits) = TileGrid::ref_bits(grid.tiles_x * grid.tiles_y);
    let mut nav = NavMesh::init_tiled(&NavMeshParams {
        origin: bmin.to_array(),
        tile_width: grid.tile_world_size,
        tile_height: grid.tile_world_size,
        max_tiles: 1 << tile_bits,
        max_polys_per_tile: 1 << poly_bits,
    })
    .map_err(GeneratorError::at(BuildStage::NavMeshInit))?;

    let chunky = ChunkyTriMesh::new(positions, indices, DEFAULT_TRIS_PER_CHUNK)
        .map_err(GeneratorError::at(BuildStage::Config))?;

    let ctx = &mut out.context;
    ctx.log_info(format!(
        "building {}x{} tiles of {} cells, {} tile bits",
        grid.tiles_x, grid.tiles_y, config.tile_size, tile_bits
    ));
    ctx.start_timer(TimerCategory::Total);

    let border = config.settings.tile_border_size();
    let mut tile_tris = Vec::new();
    for ty in 0..grid.tiles_y {
        for tx in 0..grid.tiles_x {
            let cfg = grid.tile_config(&base, config.tile_size, border, tx, ty);
            collect_tile_tris(&chunky, &cfg, &mut tile_tris);
            if tile_tris.is_empty() {
                continue;
            }

            let builder = RecastBuilder::new(cfg);
            let mut tile = TileIntermediates {
                tile_x: tx,
                tile_y: ty,
                ..Default::default()
            };
            let built = build_tile(&builder, ctx, positions, &tile_tris, config, keep, &mut tile);
            out.tiles.push(tile);

            let data = match built {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("tile ({}, {}) skipped: {}", tx, ty, e);
                    ctx.log_warning(format!("tile ({}, {}) skipped: {}", tx, ty, e));
                    continue;
                }
            };

            if let Some(old) = nav.get_tile_ref_at(tx, ty, 0) {
                if let Err(status) = nav.remove_tile(old) {
                    log::warn!("replacing tile ({}, {}) failed: {}", tx, ty, status);
                }
            }
            if let Err(status) = nav.add_tile(data, PolyRef::NULL) {
                log::warn!("adding tile ({}, {}) failed: {}", tx, ty, status);
                ctx.log_warning(format!("adding tile ({}, {}) failed: {}", tx, ty, status));
            }
        }
    }

    ctx.stop_timer(TimerCategory::Total);
    ctx.log_info(format!("tiled navmesh with {} tiles", nav.tile_count()));
    Ok(nav)
}

/// Triangles of the chunks overlapping the tile bounds in xz
pub(crate) fn collect_tile_tris(chunky: &ChunkyTriMesh, cfg: &recast::RecastConfig, out: &mut Vec<i32>) {
    out.clear();
    for node in chunky.chunks_overlapping_rect([cfg.bmin.x, cfg.bmin.z], [cfg.bmax.x, cfg.bmax.z]) {
        out.extend_from_slice(chunky.node_tris(node));
    }
}

/// Runs the Recast pipeline for one tile. `Ok(None)` means the tile has
/// nothing walkable.
fn build_tile(
    builder: &RecastBuilder,
    ctx: &mut RecastContext,
    positions: &[f32],
    tris: &[i32],
    config: &TiledNavMeshConfig,
    keep: bool,
    tile: &mut TileIntermediates,
) -> Result<Option<Vec<u8>>, GeneratorError> {
    let hf = builder
        .build_heightfield(ctx, positions, tris)
        .map_err(GeneratorError::at(BuildStage::Heightfield))?;
    let mut chf = builder
        .build_compact_heightfield(ctx, &hf)
        .map_err(GeneratorError::at(BuildStage::CompactHeightfield))?;
    if keep {
        tile.heightfield = Some(hf);
    }

    builder
        .build_regions(ctx, &mut chf)
        .map_err(GeneratorError::at(BuildStage::Regions))?;
    let cset = builder
        .build_contours(ctx, &chf)
        .map_err(GeneratorError::at(BuildStage::Contours))?;
    let mut pmesh = builder
        .build_poly_mesh(ctx, &cset)
        .map_err(GeneratorError::at(BuildStage::PolyMesh))?;
    let dmesh = builder
        .build_detail_mesh(ctx, &pmesh, &chf)
        .map_err(GeneratorError::at(BuildStage::DetailMesh))?;
    if keep {
        tile.compact_heightfield = Some(chf);
        tile.contour_set = Some(cset);
    }

    assign_poly_flags(&mut pmesh);
    let data = if pmesh.npolys == 0 {
        None
    } else {
        ctx.log_debug(format!(
            "tile ({}, {}): {} vertices, {} polygons",
            tile.tile_x, tile.tile_y, pmesh.nverts, pmesh.npolys
        ));
        Some(pack_tile(
            &pmesh,
            &dmesh,
            &config.settings,
            &config.off_mesh_connections,
            tile.tile_x,
            tile.tile_y,
        )?)
    };
    if keep {
        tile.poly_mesh = Some(pmesh);
        tile.poly_mesh_detail = Some(dmesh);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildSettings;
    use crate::test_geometry::{flat_plane, l_corridor};
    use detour::{load_nav_mesh_set, save_nav_mesh_set, NavMeshQuery, QueryFilter};

    #[test]
    fn test_plane_is_split_into_tiles() {
        // 64x64 cells, 2x2 tiles of 32.
        let (positions, indices) = flat_plane(12.8);
        let generated = generate_tiled_nav_mesh(&positions, &indices, &TiledNavMeshConfig::default(), true);
        assert!(generated.success(), "{:?}", generated.error());
        assert_eq!(generated.intermediates.tiles.len(), 4);
        assert!(generated.intermediates.tiles.iter().all(|t| t.poly_mesh.is_some()));

        let nav = generated.into_result().unwrap();
        assert_eq!(nav.tile_count(), 4);
        assert_eq!(nav.params().max_tiles, 4);
        assert_eq!(nav.params().max_polys_per_tile, 1 << 20);
        assert!(nav.get_tile_at(1, 1, 0).is_some());
        assert!(nav.get_tile_at(2, 0, 0).is_none());
    }

    #[test]
    fn test_path_crosses_tile_borders() {
        let (positions, indices) = flat_plane(20.0);
        let nav = generate_tiled_nav_mesh(&positions, &indices, &TiledNavMeshConfig::default(), false)
            .into_result()
            .unwrap();

        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let path = query.compute_path(&[1.0, 0.0, 1.0], &[19.0, 0.0, 19.0], &filter).unwrap();
        let end = path[path.len() - 1];
        assert!((end[0] - 19.0).abs() < 0.1 && (end[2] - 19.0).abs() < 0.1);
    }

    #[test]
    fn test_tiles_without_geometry_are_skipped() {
        // The far corner of the L bounding box has no floor.
        let (positions, indices) = l_corridor(20.0, 4.0);
        let config = TiledNavMeshConfig {
            tile_size: 20,
            ..Default::default()
        };
        let nav = generate_tiled_nav_mesh(&positions, &indices, &config, false)
            .into_result()
            .unwrap();
        assert!(nav.tile_count() < 25);
        assert!(nav.get_tile_at(0, 0, 0).is_some());
        assert!(nav.get_tile_at(0, 4, 0).is_none());

        let mut query = NavMeshQuery::new(&nav);
        let path = query
            .compute_path(&[1.0, 0.0, 2.0], &[18.0, 0.0, 19.0], &QueryFilter::default())
            .unwrap();
        assert!(path.len() >= 3);
    }

    #[test]
    fn test_export_import_round_trip() {
        let (positions, indices) = flat_plane(20.0);
        let nav = generate_tiled_nav_mesh(&positions, &indices, &TiledNavMeshConfig::default(), false)
            .into_result()
            .unwrap();

        let data = save_nav_mesh_set(&nav).unwrap();
        let loaded = load_nav_mesh_set(&data).unwrap();
        assert_eq!(loaded.tile_count(), nav.tile_count());
        assert_eq!(loaded.params(), nav.params());

        let filter = QueryFilter::default();
        let (start, end) = ([1.0, 0.0, 1.0], [19.0, 0.0, 12.0]);
        let original = NavMeshQuery::new(&nav).compute_path(&start, &end, &filter).unwrap();
        let reloaded = NavMeshQuery::new(&loaded).compute_path(&start, &end, &filter).unwrap();
        assert_eq!(original, reloaded);
    }

    #[test]
    fn test_invalid_tile_size() {
        let (positions, indices) = flat_plane(10.0);
        let config = TiledNavMeshConfig {
            settings: BuildSettings::default(),
            tile_size: 0,
            off_mesh_connections: Vec::new(),
        };
        let generated = generate_tiled_nav_mesh(&positions, &indices, &config, false);
        assert_eq!(generated.error().unwrap().stage, BuildStage::Config);
    }
}
