//! Layers and parameters for unit tests

use detour::{NavMesh, NavMeshParams};

use crate::tile_cache_data::{TileCacheLayer, TileCacheLayerHeader, DT_TILECACHE_WALKABLE_AREA};
use crate::TileCacheParams;

pub(crate) const CS: f32 = 0.5;
pub(crate) const CH: f32 = 0.2;
/// Cells per side of the tiles used by the tests
pub(crate) const TILE_CELLS: u8 = 16;

/// Flat, fully walkable `size` x `size` layer of tile (tx, ty, tlayer) at
/// height 0
pub(crate) fn flat_layer(size: u8, tx: i32, ty: i32, tlayer: i32) -> TileCacheLayer {
    let w = size as i32;
    let extent = size as f32 * CS;
    let header = TileCacheLayerHeader {
        tx,
        ty,
        tlayer,
        bmin: [tx as f32 * extent, 0.0, ty as f32 * extent],
        bmax: [(tx + 1) as f32 * extent, 0.0, (ty + 1) as f32 * extent],
        hmin: 0,
        hmax: 0,
        width: size,
        height: size,
        minx: 0,
        maxx: size - 1,
        miny: 0,
        maxy: size - 1,
    };

    let n = (w * w) as usize;
    let mut cons = vec![0u8; n];
    for y in 0..w {
        for x in 0..w {
            let mut con = 0u8;
            if x > 0 {
                con |= 1 << 0;
            }
            if y + 1 < w {
                con |= 1 << 1;
            }
            if x + 1 < w {
                con |= 1 << 2;
            }
            if y > 0 {
                con |= 1 << 3;
            }
            cons[(x + y * w) as usize] = con;
        }
    }

    TileCacheLayer {
        header,
        heights: vec![0; n],
        areas: vec![DT_TILECACHE_WALKABLE_AREA; n],
        cons,
    }
}

pub(crate) fn cache_params(max_tiles: i32) -> TileCacheParams {
    TileCacheParams {
        origin: [0.0; 3],
        cs: CS,
        ch: CH,
        width: TILE_CELLS as i32,
        height: TILE_CELLS as i32,
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.4,
        max_simplification_error: 1.3,
        max_tiles,
        max_obstacles: 8,
    }
}

pub(crate) fn tiled_nav_mesh() -> NavMesh {
    NavMesh::init_tiled(&NavMeshParams {
        origin: [0.0; 3],
        tile_width: TILE_CELLS as f32 * CS,
        tile_height: TILE_CELLS as f32 * CS,
        max_tiles: 16,
        max_polys_per_tile: 256,
    })
    .unwrap()
}
