//! High level navmesh generators
//!
//! Builds ready to query navigation meshes from indexed triangle soups:
//!
//! - [`generate_solo_nav_mesh`]: one tile over the whole input
//! - [`generate_tiled_nav_mesh`]: a grid of independently built tiles
//! - [`generate_tile_cache`]: compressed heightfield layers plus the navmesh
//!   built from them, ready for temporary obstacles
//!
//! Every generator returns a [`Generated`] holding the result and the build
//! intermediates. The build context log is always kept; the voxel data is
//! kept when `keep_intermediates` is set.
//!
//! ```rust,ignore
//! use recast_navigation::{generate_solo_nav_mesh, SoloNavMeshConfig};
//!
//! let generated = generate_solo_nav_mesh(&positions, &indices, &SoloNavMeshConfig::default(), false);
//! let nav_mesh = generated.into_result()?;
//! ```
//!
//! [`CrowdSimulation`] drives a [`detour_crowd::Crowd`] from frame times.

mod config;
mod crowd_simulation;
mod error;
mod solo;
mod tile_cache;
mod tiled;

#[cfg(test)]
pub(crate) mod test_geometry;

pub use config::{BuildSettings, SoloNavMeshConfig, TileCacheGeneratorConfig, TiledNavMeshConfig, DEFAULT_TILE_SIZE};
pub use crowd_simulation::CrowdSimulation;
pub use error::{BuildStage, Generated, GeneratorError};
pub use solo::{generate_solo_nav_mesh, SoloNavMeshIntermediates, SoloNavMeshResult};
pub use tile_cache::{
    generate_tile_cache, generate_tile_cache_with, mesh_process_fn, TileCacheIntermediates, TileCacheNavMesh,
    TileCacheResult, TileCacheTileIntermediates,
};
pub use tiled::{generate_tiled_nav_mesh, TileIntermediates, TiledNavMeshIntermediates, TiledNavMeshResult};

pub use detour::{NavMesh, NavMeshQuery, OffMeshConnectionParams, QueryFilter};
pub use detour_crowd::{CrowdAgentParams, StepSettings};
pub use detour_tilecache::TileCache;
pub use recast::merge_positions_and_indices;
