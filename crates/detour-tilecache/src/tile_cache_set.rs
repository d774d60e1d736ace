//! Tile cache set files
//!
//! A set stores the navmesh and tile cache parameters followed by every
//! compressed layer. Obstacles are not saved. Loading rebuilds the
//! navigation mesh from the layers.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use detour::{NavMesh, NavMeshParams, Result, Status};

use crate::tile_cache::{TileCache, TileCacheParams};
use crate::tile_cache_builder::{DefaultMeshProcess, TileCacheMeshProcess};
use crate::tile_cache_data::{Lz4Compressor, TileCacheCompressor};

const fn four_cc(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | tag[3] as u32
}

/// Tile cache set magic, 'TSET'
pub const DT_TILECACHE_SET_MAGIC: u32 = four_cc(b"TSET");
pub const DT_TILECACHE_SET_VERSION: i32 = 1;

fn write_vec3<W: Write>(w: &mut W, v: &[f32; 3]) -> std::io::Result<()> {
    for &c in v {
        w.write_f32::<LittleEndian>(c)?;
    }
    Ok(())
}

fn read_vec3<R: Read>(r: &mut R) -> std::io::Result<[f32; 3]> {
    Ok([
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ])
}

fn write_cache_params<W: Write>(w: &mut W, p: &TileCacheParams) -> std::io::Result<()> {
    write_vec3(w, &p.origin)?;
    w.write_f32::<LittleEndian>(p.cs)?;
    w.write_f32::<LittleEndian>(p.ch)?;
    w.write_i32::<LittleEndian>(p.width)?;
    w.write_i32::<LittleEndian>(p.height)?;
    w.write_f32::<LittleEndian>(p.walkable_height)?;
    w.write_f32::<LittleEndian>(p.walkable_radius)?;
    w.write_f32::<LittleEndian>(p.walkable_climb)?;
    w.write_f32::<LittleEndian>(p.max_simplification_error)?;
    w.write_i32::<LittleEndian>(p.max_tiles)?;
    w.write_i32::<LittleEndian>(p.max_obstacles)
}

fn read_cache_params<R: Read>(r: &mut R) -> std::io::Result<TileCacheParams> {
    Ok(TileCacheParams {
        origin: read_vec3(r)?,
        cs: r.read_f32::<LittleEndian>()?,
        ch: r.read_f32::<LittleEndian>()?,
        width: r.read_i32::<LittleEndian>()?,
        height: r.read_i32::<LittleEndian>()?,
        walkable_height: r.read_f32::<LittleEndian>()?,
        walkable_radius: r.read_f32::<LittleEndian>()?,
        walkable_climb: r.read_f32::<LittleEndian>()?,
        max_simplification_error: r.read_f32::<LittleEndian>()?,
        max_tiles: r.read_i32::<LittleEndian>()?,
        max_obstacles: r.read_i32::<LittleEndian>()?,
    })
}

/// Serializes the layers of a tile cache together with the parameters of
/// the navmesh it feeds
pub fn save_tile_cache_set(tc: &TileCache, nav: &NavMesh) -> Result<Vec<u8>> {
    let tiles: Vec<_> = tc.tiles().filter(|t| !t.data.is_empty()).collect();
    let nav_params = nav.params();

    let mut w = Cursor::new(Vec::new());
    w.write_u32::<LittleEndian>(DT_TILECACHE_SET_MAGIC)?;
    w.write_i32::<LittleEndian>(DT_TILECACHE_SET_VERSION)?;
    w.write_i32::<LittleEndian>(tiles.len() as i32)?;
    write_vec3(&mut w, &nav_params.origin)?;
    w.write_f32::<LittleEndian>(nav_params.tile_width)?;
    w.write_f32::<LittleEndian>(nav_params.tile_height)?;
    w.write_i32::<LittleEndian>(nav_params.max_tiles)?;
    w.write_i32::<LittleEndian>(nav_params.max_polys_per_tile)?;
    write_cache_params(&mut w, tc.params())?;

    for tile in &tiles {
        w.write_u32::<LittleEndian>(tc.get_tile_ref(tile).id())?;
        w.write_i32::<LittleEndian>(tile.data.len() as i32)?;
        w.write_all(&tile.data)?;
    }

    log::debug!("saved tile cache set of {} layers", tiles.len());
    Ok(w.into_inner())
}

/// Loads a set with LZ4 compression and the [`DefaultMeshProcess`]
pub fn load_tile_cache_set(data: &[u8]) -> Result<(TileCache, NavMesh)> {
    load_tile_cache_set_with(data, Box::new(Lz4Compressor), Box::new(DefaultMeshProcess::new()))
}

/// Rebuilds a tile cache and its navigation mesh from
/// [`save_tile_cache_set`] output
pub fn load_tile_cache_set_with(
    data: &[u8],
    compressor: Box<dyn TileCacheCompressor>,
    mesh_process: Box<dyn TileCacheMeshProcess>,
) -> Result<(TileCache, NavMesh)> {
    let mut r = Cursor::new(data);
    if r.read_u32::<LittleEndian>()? != DT_TILECACHE_SET_MAGIC {
        return Err(Status::FAILURE | Status::WRONG_MAGIC);
    }
    if r.read_i32::<LittleEndian>()? != DT_TILECACHE_SET_VERSION {
        return Err(Status::FAILURE | Status::WRONG_VERSION);
    }
    let num_tiles = r.read_i32::<LittleEndian>()?;

    let nav_params = NavMeshParams {
        origin: read_vec3(&mut r)?,
        tile_width: r.read_f32::<LittleEndian>()?,
        tile_height: r.read_f32::<LittleEndian>()?,
        max_tiles: r.read_i32::<LittleEndian>()?,
        max_polys_per_tile: r.read_i32::<LittleEndian>()?,
    };
    let cache_params = read_cache_params(&mut r)?;

    let mut nav = NavMesh::init_tiled(&nav_params)?;
    let mut tc = TileCache::with_parts(cache_params, compressor, mesh_process)?;

    let mut refs = Vec::new();
    for _ in 0..num_tiles.max(0) {
        let tile_ref = r.read_u32::<LittleEndian>()?;
        let size = r.read_i32::<LittleEndian>()?;
        if tile_ref == 0 || size <= 0 {
            break;
        }
        let mut tile_data = vec![0u8; size as usize];
        r.read_exact(&mut tile_data)?;
        refs.push(tc.add_tile(tile_data)?);
    }

    for tile_ref in refs {
        tc.build_nav_mesh_tile(tile_ref, &mut nav)?;
    }

    log::debug!(
        "loaded tile cache set of {} layers into {} navmesh tiles",
        tc.tiles().count(),
        nav.tile_count()
    );
    Ok((tc, nav))
}

/// Writes a tile cache set to `path`
pub fn save_tile_cache_set_to_file<P: AsRef<Path>>(tc: &TileCache, nav: &NavMesh, path: P) -> recast_common::Result<()> {
    let data = save_tile_cache_set(tc, nav)?;
    fs::write(path, data)?;
    Ok(())
}

/// Reads a tile cache set from `path`
pub fn load_tile_cache_set_from_file<P: AsRef<Path>>(path: P) -> recast_common::Result<(TileCache, NavMesh)> {
    let data = fs::read(path)?;
    Ok(load_tile_cache_set(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_layer_helpers::{cache_params, flat_layer, tiled_nav_mesh, TILE_CELLS};
    use crate::tile_cache_data::build_tile_cache_layer;

    fn built_cache() -> (TileCache, NavMesh) {
        let mut tc = TileCache::new(cache_params(16)).unwrap();
        let mut nav = tiled_nav_mesh();
        for (tx, ty) in [(0, 0), (1, 0), (0, 1)] {
            let data = build_tile_cache_layer(&Lz4Compressor, &flat_layer(TILE_CELLS, tx, ty, 0)).unwrap();
            tc.add_tile(data).unwrap();
            tc.build_nav_mesh_tiles_at(tx, ty, &mut nav).unwrap();
        }
        (tc, nav)
    }

    #[test]
    fn test_set_rebuilds_navmesh() {
        let (tc, nav) = built_cache();
        let data = save_tile_cache_set(&tc, &nav).unwrap();

        let (tc2, nav2) = load_tile_cache_set(&data).unwrap();
        assert_eq!(tc2.params(), tc.params());
        assert_eq!(nav2.params(), nav.params());
        assert_eq!(tc2.tiles().count(), 3);
        assert_eq!(nav2.tile_count(), 3);
        for (tx, ty) in [(0, 0), (1, 0), (0, 1)] {
            let a = tc.get_tile_at(tx, ty, 0).unwrap();
            let b = tc2.get_tile_at(tx, ty, 0).unwrap();
            assert_eq!(tc.get_tile_by_ref(a).unwrap().data, tc2.get_tile_by_ref(b).unwrap().data);
            assert!(nav2.get_tile_ref_at(tx, ty, 0).is_some());
        }
    }

    #[test]
    fn test_set_rejects_wrong_magic() {
        let (tc, nav) = built_cache();
        let mut data = save_tile_cache_set(&tc, &nav).unwrap();
        data[0] = b'X';
        let err = load_tile_cache_set(&data).unwrap_err();
        assert!(err.has_detail(Status::WRONG_MAGIC));
    }

    #[test]
    fn test_set_file_round_trip() {
        let (tc, nav) = built_cache();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.tset");
        save_tile_cache_set_to_file(&tc, &nav, &path).unwrap();
        let (tc2, nav2) = load_tile_cache_set_from_file(&path).unwrap();
        assert_eq!(tc2.tiles().count(), 3);
        assert_eq!(nav2.tile_count(), 3);
        assert!(load_tile_cache_set_from_file(dir.path().join("missing.tset")).is_err());
    }
}
