//! Tile cache generation
//!
//! Each tile column is voxelized and split into heightfield layers, one
//! compressed [`TileCache`] tile per layer. The navmesh tiles are then
//! built from the cached layers, so obstacles can later be carved without
//! touching the input geometry again.

use detour::{NavMesh, NavMeshCreateParams, NavMeshParams};
use detour_tilecache::{
    build_tile_cache_layer, DefaultMeshProcess, Lz4Compressor, TileCache, TileCacheLayer, TileCacheMeshProcess,
    TileCacheParams,
};
use glam::Vec3;
use recast::{
    get_bounding_box, ChunkyTriMesh, CompactHeightfield, Heightfield, HeightfieldLayerSet, RecastBuilder,
    RecastContext, TimerCategory, DEFAULT_TRIS_PER_CHUNK,
};

use crate::config::{check_tile_size, TileCacheGeneratorConfig, TileGrid};
use crate::error::{report, BuildStage, Generated, GeneratorError};
use crate::tiled::collect_tile_tris;

/// Pipeline products of one tile column
#[derive(Debug, Default)]
pub struct TileCacheTileIntermediates {
    pub tile_x: i32,
    pub tile_y: i32,
    pub heightfield: Option<Heightfield>,
    pub compact_heightfield: Option<CompactHeightfield>,
    pub layers: Option<HeightfieldLayerSet>,
}

#[derive(Debug, Default)]
pub struct TileCacheIntermediates {
    pub context: RecastContext,
    pub tiles: Vec<TileCacheTileIntermediates>,
}

/// A tile cache together with the navmesh it maintains
#[derive(Debug)]
pub struct TileCacheNavMesh {
    pub tile_cache: TileCache,
    pub nav_mesh: NavMesh,
}

impl TileCacheNavMesh {
    /// Runs [`TileCache::update`] until every queued obstacle change is in
    /// the navmesh, at most `max_iterations` times. Returns whether the
    /// cache is up to date.
    pub fn update_until_done(&mut self, max_iterations: usize) -> detour::Result<bool> {
        for _ in 0..max_iterations {
            if self.tile_cache.update(&mut self.nav_mesh)? {
                return Ok(true);
            }
        }
        Ok(self.tile_cache.is_up_to_date())
    }
}

pub type TileCacheResult = Generated<TileCacheNavMesh, TileCacheIntermediates>;

/// Builds a tile cache and its navmesh with the default mesh process,
/// which bakes the configured off-mesh connections
pub fn generate_tile_cache(
    positions: &[f32],
    indices: &[i32],
    config: &TileCacheGeneratorConfig,
    keep_intermediates: bool,
) -> TileCacheResult {
    let process = DefaultMeshProcess::with_off_mesh_connections(config.off_mesh_connections.clone());
    generate_tile_cache_with(positions, indices, config, Box::new(process), keep_intermediates)
}

/// Same as [`generate_tile_cache`] with a custom hook assigning polygon
/// areas and flags of every built tile
pub fn generate_tile_cache_with(
    positions: &[f32],
    indices: &[i32],
    config: &TileCacheGeneratorConfig,
    mesh_process: Box<dyn TileCacheMeshProcess>,
    keep_intermediates: bool,
) -> TileCacheResult {
    let mut intermediates = TileCacheIntermediates::default();
    let result = build(
        positions,
        indices,
        config,
        mesh_process,
        keep_intermediates,
        &mut intermediates,
    );
    report(&mut intermediates.context, &result);
    Generated { result, intermediates }
}

fn build(
    positions: &[f32],
    indices: &[i32],
    config: &TileCacheGeneratorConfig,
    mesh_process: Box<dyn TileCacheMeshProcess>,
    keep: bool,
    out: &mut TileCacheIntermediates,
) -> Result<TileCacheNavMesh, GeneratorError> {
    check_tile_size(config.tile_size)?;
    if config.expected_layers_per_tile <= 0 {
        return Err(GeneratorError::new(
            BuildStage::Config,
            "expected layers per tile must be positive",
        ));
    }

    let (bmin, bmax) = match config.bounds {
        Some((bmin, bmax)) => (Vec3::from(bmin), Vec3::from(bmax)),
        None => get_bounding_box(positions, indices).map_err(GeneratorError::at(BuildStage::Bounds))?,
    };
    let settings = &config.settings;
    let base = settings.to_recast_config(bmin, bmax);
    let grid = TileGrid::new(&base, config.tile_size);
    let layer_slots = grid.tiles_x * grid.tiles_y * config.expected_layers_per_tile;

    let params = TileCacheParams {
        origin: bmin.to_array(),
        cs: settings.cs,
        ch: settings.ch,
        width: config.tile_size,
        height: config.tile_size,
        walkable_height: settings.walkable_height_world(),
        walkable_radius: settings.walkable_radius_world(),
        walkable_climb: settings.walkable_climb_world(),
        max_simplification_error: settings.max_simplification_error,
        max_tiles: layer_slots,
        max_obstacles: config.max_obstacles,
    };
    let mut tile_cache = TileCache::with_parts(params, Box::new(Lz4Compressor), mesh_process)
        .map_err(GeneratorError::at(BuildStage::TileCache))?;

    let (tile_bits, poly_bits) = TileGrid::ref_bits(layer_slots);
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
        "building tile cache: {}x{} tiles of {} cells, {} layer slots",
        grid.tiles_x, grid.tiles_y, config.tile_size, layer_slots
    ));
    ctx.start_timer(TimerCategory::Total);

    let border = settings.tile_border_size();
    let mut tile_tris = Vec::new();
    for ty in 0..grid.tiles_y {
        for tx in 0..grid.tiles_x {
            let cfg = grid.tile_config(&base, config.tile_size, border, tx, ty);
            collect_tile_tris(&chunky, &cfg, &mut tile_tris);
            if tile_tris.is_empty() {
                continue;
            }

            let builder = RecastBuilder::new(cfg);
            let mut tile = TileCacheTileIntermediates {
                tile_x: tx,
                tile_y: ty,
                ..Default::default()
            };
            let layers = rasterize_tile_layers(&builder, ctx, positions, &tile_tris, tx, ty, keep, &mut tile);
            out.tiles.push(tile);

            let layers = match layers {
                Ok(layers) => layers,
                Err(e) => {
                    log::warn!("tile ({}, {}) skipped: {}", tx, ty, e);
                    ctx.log_warning(format!("tile ({}, {}) skipped: {}", tx, ty, e));
                    continue;
                }
            };

            ctx.start_timer(TimerCategory::TileCache);
            for layer in &layers {
                let added = build_tile_cache_layer(tile_cache.compressor(), layer)
                    .and_then(|data| tile_cache.add_tile(data));
                if let Err(status) = added {
                    log::warn!("adding layer {} of tile ({}, {}) failed: {}", layer.header.tlayer, tx, ty, status);
                    ctx.log_warning(format!("failed to add tile to tile cache: tx {}, ty {}", tx, ty));
                }
            }
            ctx.stop_timer(TimerCategory::TileCache);
        }
    }

    ctx.start_timer(TimerCategory::NavMeshData);
    for ty in 0..grid.tiles_y {
        for tx in 0..grid.tiles_x {
            tile_cache
                .build_nav_mesh_tiles_at(tx, ty, &mut nav)
                .map_err(|status| {
                    GeneratorError::new(
                        BuildStage::TileCache,
                        format!("failed to build navmesh tiles at {}, {}: {}", tx, ty, status),
                    )
                })?;
        }
    }
    ctx.stop_timer(TimerCategory::NavMeshData);
    ctx.stop_timer(TimerCategory::Total);

    ctx.log_info(format!(
        "tile cache with {} layers, navmesh with {} tiles",
        tile_cache.tiles().count(),
        nav.tile_count()
    ));
    Ok(TileCacheNavMesh {
        tile_cache,
        nav_mesh: nav,
    })
}

/// Voxelizes one tile column and converts its heightfield layers into
/// tile cache layers
#[allow(clippy::too_many_arguments)]
fn rasterize_tile_layers(
    builder: &RecastBuilder,
    ctx: &mut RecastContext,
    positions: &[f32],
    tris: &[i32],
    tx: i32,
    ty: i32,
    keep: bool,
    tile: &mut TileCacheTileIntermediates,
) -> Result<Vec<TileCacheLayer>, GeneratorError> {
    let hf = builder
        .build_heightfield(ctx, positions, tris)
        .map_err(GeneratorError::at(BuildStage::Heightfield))?;
    let chf = builder
        .build_compact_heightfield(ctx, &hf)
        .map_err(GeneratorError::at(BuildStage::CompactHeightfield))?;
    if keep {
        tile.heightfield = Some(hf);
    }

    let lset = builder
        .build_layers(ctx, &chf)
        .map_err(GeneratorError::at(BuildStage::Layers))?;
    if keep {
        tile.compact_heightfield = Some(chf);
    }

    let layers = lset
        .layers
        .iter()
        .enumerate()
        .map(|(i, layer)| TileCacheLayer::from_heightfield_layer(layer, tx, ty, i as i32))
        .collect::<detour::Result<Vec<_>>>()
        .map_err(GeneratorError::at(BuildStage::Layers));
    ctx.log_debug(format!("tile ({}, {}): {} layers", tx, ty, lset.layers.len()));
    if keep {
        tile.layers = Some(lset);
    }
    layers
}

/// Mesh process applying the default area mapping, then `f`
pub fn mesh_process_fn<F>(mut f: F) -> Box<dyn TileCacheMeshProcess>
where
    F: FnMut(&mut NavMeshCreateParams) + 'static,
{
    let mut default = DefaultMeshProcess::new();
    Box::new(move |params: &mut NavMeshCreateParams| {
        default.process(params);
        f(params);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_geometry::{corridor, flat_plane, two_floors};
    use detour::{NavMeshQuery, PolyFlags, PolyRef, QueryFilter, Status};
    use detour_tilecache::{load_tile_cache_set, save_tile_cache_set};

    fn nearest(nav: &NavMesh, pos: &[f32; 3]) -> PolyRef {
        NavMeshQuery::new(nav)
            .find_nearest_poly(pos, &[0.5, 1.0, 0.5], &QueryFilter::default())
            .unwrap()
            .unwrap()
            .reference
    }

    /// Whether a polygon path from `start` reaches the polygon under `end`
    fn reaches(nav: &NavMesh, start: [f32; 3], end: [f32; 3]) -> bool {
        let mut query = NavMeshQuery::new(nav);
        let filter = QueryFilter::default();
        let extents = [0.5, 1.0, 0.5];
        let Some(s) = query.find_nearest_poly(&start, &extents, &filter).unwrap() else {
            return false;
        };
        let Some(e) = query.find_nearest_poly(&end, &extents, &filter).unwrap() else {
            return false;
        };
        let (path, status) = query
            .find_path(s.reference, e.reference, &s.point, &e.point, &filter, 256)
            .unwrap();
        !status.contains(Status::PARTIAL_RESULT) && path.last() == Some(&e.reference)
    }

    #[test]
    fn test_flat_plane_tile_cache() {
        let (positions, indices) = flat_plane(12.8);
        let generated = generate_tile_cache(&positions, &indices, &TileCacheGeneratorConfig::default(), true);
        assert!(generated.success(), "{:?}", generated.error());
        assert_eq!(generated.intermediates.tiles.len(), 4);
        assert!(generated.intermediates.tiles.iter().all(|t| t.layers.is_some()));

        let built = generated.into_result().unwrap();
        assert_eq!(built.tile_cache.tiles().count(), 4);
        assert_eq!(built.tile_cache.params().max_tiles, 16);
        assert_eq!(built.nav_mesh.tile_count(), 4);
        assert_eq!(built.nav_mesh.params().max_tiles, 16);

        // Walkable area maps to area 0 with the walk flag.
        for tile in built.nav_mesh.tiles() {
            assert!(tile.polys.iter().all(|p| p.area == 0 && p.flags == PolyFlags::WALK));
        }
        assert!(reaches(&built.nav_mesh, [1.0, 0.0, 1.0], [11.0, 0.0, 11.0]));
    }

    #[test]
    fn test_box_obstacle_blocks_corridor() {
        let (positions, indices) = corridor(20.0, 4.0);
        let mut built = generate_tile_cache(&positions, &indices, &TileCacheGeneratorConfig::default(), false)
            .into_result()
            .unwrap();
        let (start, end) = ([1.0, 0.0, 2.0], [19.0, 0.0, 2.0]);
        assert!(reaches(&built.nav_mesh, start, end));

        let ob = built
            .tile_cache
            .add_box_obstacle(&[9.0, -1.0, -1.0], &[11.0, 2.0, 5.0])
            .unwrap();
        assert!(built.update_until_done(32).unwrap());
        assert!(!reaches(&built.nav_mesh, start, end));

        built.tile_cache.remove_obstacle(ob).unwrap();
        assert!(built.update_until_done(32).unwrap());
        assert!(reaches(&built.nav_mesh, start, end));
    }

    #[test]
    fn test_cylinder_obstacle_leaves_a_detour() {
        let (positions, indices) = flat_plane(12.8);
        let mut built = generate_tile_cache(&positions, &indices, &TileCacheGeneratorConfig::default(), false)
            .into_result()
            .unwrap();
        let center = [6.4, 0.0, 6.4];
        assert!(!nearest(&built.nav_mesh, &center).is_null());

        built.tile_cache.add_obstacle(&[6.4, -0.5, 6.4], 1.0, 2.0).unwrap();
        assert!(built.update_until_done(32).unwrap());

        // Polygons around the hole may still overlap the query box by bounds.
        let query = NavMeshQuery::new(&built.nav_mesh);
        for point in [center, [5.9, 0.0, 6.4], [6.9, 0.0, 6.4], [6.4, 0.0, 5.9], [6.4, 0.0, 6.9]] {
            let hit = query
                .find_nearest_poly(&point, &[0.1, 1.0, 0.1], &QueryFilter::default())
                .unwrap();
            if let Some(hit) = hit {
                assert!(!hit.over_poly, "{:?} is still on the mesh", point);
            }
        }
        let hit = query
            .find_nearest_poly(&center, &[2.0, 1.0, 2.0], &QueryFilter::default())
            .unwrap()
            .unwrap();
        let (dx, dz) = (hit.point[0] - center[0], hit.point[2] - center[2]);
        assert!((dx * dx + dz * dz).sqrt() > 0.5);
        assert!(reaches(&built.nav_mesh, [1.0, 0.0, 6.4], [11.8, 0.0, 6.4]));
    }

    #[test]
    fn test_two_floors_produce_two_layers() {
        let (positions, indices) = two_floors(6.4, 4.0);
        let built = generate_tile_cache(&positions, &indices, &TileCacheGeneratorConfig::default(), false)
            .into_result()
            .unwrap();
        assert_eq!(built.tile_cache.tiles().count(), 2);
        assert_eq!(built.nav_mesh.tile_count(), 2);

        let ground = nearest(&built.nav_mesh, &[3.2, 0.0, 3.2]);
        let upper = nearest(&built.nav_mesh, &[3.2, 4.0, 3.2]);
        assert_ne!(ground, upper);
    }

    #[test]
    fn test_custom_mesh_process() {
        let (positions, indices) = flat_plane(6.4);
        let process = mesh_process_fn(|params: &mut NavMeshCreateParams| {
            for flags in params.poly_flags.iter_mut() {
                *flags |= PolyFlags::SWIM.bits();
            }
        });
        let built = generate_tile_cache_with(&positions, &indices, &TileCacheGeneratorConfig::default(), process, false)
            .into_result()
            .unwrap();
        for tile in built.nav_mesh.tiles() {
            assert!(tile.polys.iter().all(|p| p.flags == PolyFlags::WALK | PolyFlags::SWIM));
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let (positions, indices) = corridor(20.0, 4.0);
        let built = generate_tile_cache(&positions, &indices, &TileCacheGeneratorConfig::default(), false)
            .into_result()
            .unwrap();

        let data = save_tile_cache_set(&built.tile_cache, &built.nav_mesh).unwrap();
        let (tile_cache, nav_mesh) = load_tile_cache_set(&data).unwrap();
        assert_eq!(tile_cache.tiles().count(), built.tile_cache.tiles().count());
        assert_eq!(nav_mesh.tile_count(), built.nav_mesh.tile_count());
        assert!(reaches(&nav_mesh, [1.0, 0.0, 2.0], [19.0, 0.0, 2.0]));
    }

    #[test]
    fn test_explicit_bounds_and_bad_config() {
        let (positions, indices) = flat_plane(6.4);
        let config = TileCacheGeneratorConfig {
            bounds: Some(([0.0, 0.0, 0.0], [12.8, 1.0, 6.4])),
            ..Default::default()
        };
        let built = generate_tile_cache(&positions, &indices, &config, false)
            .into_result()
            .unwrap();
        // The second column has no geometry.
        assert_eq!(built.tile_cache.params().max_tiles, 2 * 4);
        assert!(built.nav_mesh.get_tile_at(0, 0, 0).is_some());
        assert!(built.nav_mesh.get_tile_at(1, 0, 0).is_none());

        let bad = TileCacheGeneratorConfig {
            expected_layers_per_tile: 0,
            ..Default::default()
        };
        let generated = generate_tile_cache(&positions, &indices, &bad, false);
        assert_eq!(generated.error().unwrap().stage, BuildStage::Config);
    }
}
