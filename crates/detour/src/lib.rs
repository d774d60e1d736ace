//! Detour: runtime navigation mesh and path queries
//!
//! A [`NavMesh`] is a registry of tiles built with
//! [`create_nav_mesh_data`]. Polygons are addressed by salted [`PolyRef`]s,
//! so references into removed tiles are detected instead of trusted.
//! [`NavMeshQuery`] runs searches over a navmesh: nearest polygon, A* path,
//! string pulling, raycasts, surface movement and random sampling.

pub mod binary_format;
pub mod debug_draw;
pub mod nav_mesh;
pub mod nav_mesh_builder;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod status;

#[cfg(test)]
pub(crate) mod test_mesh_helpers;

pub use binary_format::{
    load_nav_mesh_set, load_nav_mesh_set_from_file, save_nav_mesh_set, save_nav_mesh_set_to_file,
    DT_NAVMESH_MAGIC, DT_NAVMESH_SET_MAGIC, DT_NAVMESH_VERSION,
};
pub use nav_mesh::{
    flood_fill_prune_nav_mesh, BVNode, Link, MeshTile, NavMesh, OffMeshConnection, Poly,
    PolyDetail, TileHeader,
};
pub use nav_mesh_builder::{create_nav_mesh_data, NavMeshCreateParams, OffMeshConnectionParams};
pub use debug_draw::{draw_nav_mesh, draw_nav_mesh_poly, draw_nav_mesh_with_closed_list, DrawNavMeshFlags};
pub use nav_mesh_query::{
    ComputePathError, FastRand, NavMeshQuery, NearestPoly, PolyVisit, RaycastHit, StraightPath,
    WallSegment, DT_DEFAULT_MAX_NODES,
};
pub use status::{Result, Status};

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Number of area ids a [`QueryFilter`] can price
pub const DT_MAX_AREAS: usize = 64;

/// Neighbour entry flag marking an edge that links to another tile
pub const DT_EXT_LINK: u16 = 0x8000;

/// End of a link list
pub const DT_NULL_LINK: u32 = 0xffff_ffff;

/// Off-mesh connection flag: traversable in both directions
pub const DT_OFFMESH_CON_BIDIR: u8 = 1;

/// Detail triangle edge flag: the edge lies on the polygon boundary
pub const DT_DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// Reference to a polygon or a tile
///
/// A reference packs `(salt, tile index, polygon index)`. The null
/// reference never addresses anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(u32);

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for PolyRef {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

bitflags::bitflags! {
    /// User flags of a polygon, matched against [`QueryFilter`] include and
    /// exclude masks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        const WALK = 0x01;
        const SWIM = 0x02;
        const DOOR = 0x04;
        const JUMP = 0x08;
        const DISABLED = 0x10;
        const ALL = 0xffff;
    }
}

/// Kind of a navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PolyType {
    /// Polygon on the walkable surface
    #[default]
    Ground = 0,
    /// Two vertex polygon standing for an off-mesh connection
    OffMeshConnection = 1,
}

bitflags::bitflags! {
    /// Vertex flags returned by [`NavMeshQuery::find_straight_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
        /// The vertex is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags::bitflags! {
    /// Options of [`NavMeshQuery::find_straight_path`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u8 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

bitflags::bitflags! {
    /// Options of [`NavMeshQuery::raycast`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RaycastOptions: u8 {
        /// Accumulate the traversal cost along the ray
        const USE_COSTS = 0x01;
    }
}

/// Configuration of a tiled navigation mesh
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// World space origin of the tile grid
    pub origin: [f32; 3],
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys_per_tile: i32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            tile_width: 0.0,
            tile_height: 0.0,
            max_tiles: 0,
            max_polys_per_tile: 0,
        }
    }
}

/// Polygon filter and traversal cost model for queries
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryFilter {
    /// Cost multiplier per area id
    #[cfg_attr(feature = "serialization", serde(with = "area_cost_serde"))]
    pub area_cost: [f32; DT_MAX_AREAS],
    /// A polygon must have at least one of these flags
    pub include_flags: PolyFlags,
    /// A polygon must have none of these flags
    pub exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; DT_MAX_AREAS],
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the polygon can be visited
    pub fn pass_filter(&self, _poly_ref: PolyRef, poly: &Poly) -> bool {
        poly.flags.intersects(self.include_flags) && !poly.flags.intersects(self.exclude_flags)
    }

    /// Cost of moving from `pa` to `pb` across `cur_poly`
    pub fn get_cost(&self, pa: &[f32; 3], pb: &[f32; 3], cur_poly: &Poly) -> f32 {
        recast_common::vdist(pa, pb) * self.area_cost[cur_poly.area as usize % DT_MAX_AREAS]
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area as usize) {
            *c = cost;
        }
    }
}

#[cfg(feature = "serialization")]
mod area_cost_serde {
    use super::DT_MAX_AREAS;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(costs: &[f32; DT_MAX_AREAS], s: S) -> Result<S::Ok, S::Error> {
        costs.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[f32; DT_MAX_AREAS], D::Error> {
        let v = Vec::<f32>::deserialize(d)?;
        let mut costs = [1.0; DT_MAX_AREAS];
        for (c, x) in costs.iter_mut().zip(v) {
            *c = x;
        }
        Ok(costs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_flags() {
        let mut poly = Poly::default();
        let mut filter = QueryFilter::default();

        poly.flags = PolyFlags::WALK;
        assert!(filter.pass_filter(PolyRef::new(1), &poly));

        filter.exclude_flags = PolyFlags::WALK;
        assert!(!filter.pass_filter(PolyRef::new(1), &poly));

        filter.exclude_flags = PolyFlags::empty();
        filter.include_flags = PolyFlags::SWIM;
        assert!(!filter.pass_filter(PolyRef::new(1), &poly));

        // Polygons without flags never pass.
        poly.flags = PolyFlags::empty();
        assert!(!QueryFilter::default().pass_filter(PolyRef::new(1), &poly));
    }

    #[test]
    fn test_filter_cost_uses_area() {
        let mut filter = QueryFilter::default();
        filter.set_area_cost(3, 10.0);
        let poly = Poly {
            area: 3,
            ..Default::default()
        };
        let cost = filter.get_cost(&[0.0; 3], &[2.0, 0.0, 0.0], &poly);
        assert!((cost - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_poly_ref() {
        assert!(PolyRef::NULL.is_null());
        assert!(!PolyRef::new(5).is_null());
        assert_eq!(PolyRef::from(5u32).id(), 5);
    }
}
