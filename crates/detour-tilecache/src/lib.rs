//! Tile cache for Detour navigation meshes
//!
//! A [`TileCache`] keeps the walkable layers of every tile in compressed
//! form. Temporary obstacles (cylinders, boxes and rotated boxes) are
//! carved into the layers when a tile is rebuilt, so only the tiles an
//! obstacle touches are regenerated.
//!
//! ```rust,ignore
//! use detour_tilecache::{TileCache, TileCacheParams};
//!
//! let mut tc = TileCache::new(TileCacheParams::default())?;
//! for data in layers {
//!     tc.add_tile(data)?;
//! }
//! for (tx, ty) in columns {
//!     tc.build_nav_mesh_tiles_at(tx, ty, &mut nav)?;
//! }
//!
//! let ob = tc.add_obstacle(&[10.0, 0.0, 10.0], 1.0, 2.0)?;
//! while !tc.update(&mut nav)? {}
//!
//! tc.remove_obstacle(ob)?;
//! while !tc.update(&mut nav)? {}
//! ```

pub mod tile_cache;
pub mod tile_cache_builder;
pub mod tile_cache_data;
pub mod tile_cache_set;

#[cfg(test)]
pub(crate) mod test_layer_helpers;

pub use tile_cache::{
    CompressedTile, CompressedTileRef, Obstacle, ObstacleRef, ObstacleShape, ObstacleState, TileCache,
    TileCacheParams,
};
pub use tile_cache_builder::{
    build_nav_mesh_tile_data, build_tile_poly_mesh, layer_to_compact_heightfield, mark_box_area,
    mark_cylinder_area, mark_obstacle, mark_oriented_box_area, DefaultMeshProcess, TileCacheMeshProcess,
};
pub use tile_cache_data::{
    build_tile_cache_layer, decompress_tile_cache_layer, read_layer_header, Lz4Compressor, TileCacheCompressor,
    TileCacheLayer, TileCacheLayerHeader, DT_TILECACHE_MAGIC, DT_TILECACHE_NULL_AREA, DT_TILECACHE_NULL_HEIGHT,
    DT_TILECACHE_VERSION, DT_TILECACHE_WALKABLE_AREA,
};
pub use tile_cache_set::{
    load_tile_cache_set, load_tile_cache_set_from_file, load_tile_cache_set_with, save_tile_cache_set,
    save_tile_cache_set_to_file, DT_TILECACHE_SET_MAGIC, DT_TILECACHE_SET_VERSION,
};
