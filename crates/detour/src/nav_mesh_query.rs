//! Queries over a navigation mesh
//!
//! [`NavMeshQuery`] borrows a [`NavMesh`] and owns the node pools used by
//! the graph searches. A query object is cheap to keep around and is reused
//! between searches; it is not meant to be shared between threads.

use std::collections::VecDeque;

use recast_common::{
    dist_pt_seg_sqr_2d, distance_pt_poly_edges_sqr, intersect_seg_seg_2d,
    intersect_segment_poly_2d, next_pow2, overlap_poly_poly_2d, point_in_polygon,
    random_point_in_convex_poly, sqr, tri_area_2d, vdist, vequal, vget, visfinite, vlen_sqr,
    vlerp, vnormalize, vsub,
};

use crate::nav_mesh::{MeshTile, NavMesh, Poly};
use crate::node_pool::{NodeFlags, NodePool, NodeQueue};
use crate::{
    PolyRef, PolyType, QueryFilter, RaycastOptions, Result, Status, StraightPathFlags,
    StraightPathOptions, DT_EXT_LINK, MAX_VERTS_PER_POLY,
};

/// Node pool size of a query created with [`NavMeshQuery::new`]
pub const DT_DEFAULT_MAX_NODES: usize = 2048;

/// Search heuristic scale, slightly below one so the heuristic never
/// overestimates.
const H_SCALE: f32 = 0.999;

/// Size of the small pool used by local searches
const TINY_NODE_POOL_SIZE: usize = 64;

/// Polygons a local search keeps pending at once
const MAX_LOCAL_STACK: usize = 48;

/// Neighbours considered per polygon edge by local searches
const MAX_EDGE_NEIGHBOURS: usize = 8;

/// Path buffer used by the high level helpers
const MAX_HELPER_PATH: usize = 256;

/// Small linear congruential generator used by the random point queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastRand {
    seed: u32,
}

impl Default for FastRand {
    fn default() -> Self {
        Self::new(1337)
    }
}

impl FastRand {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Next value in `[0, 1]`
    pub fn next_f32(&mut self) -> f32 {
        self.seed = self.seed.wrapping_mul(214013).wrapping_add(2531011);
        ((self.seed >> 16) & 0x7fff) as f32 / 32767.0
    }
}

/// Output of [`NavMeshQuery::find_straight_path`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StraightPath {
    pub points: Vec<[f32; 3]>,
    pub flags: Vec<StraightPathFlags>,
    /// Polygon entered at each point
    pub refs: Vec<PolyRef>,
}

impl StraightPath {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn push(&mut self, pos: [f32; 3], flags: StraightPathFlags, r: PolyRef) {
        self.points.push(pos);
        self.flags.push(flags);
        self.refs.push(r);
    }
}

/// Result of [`NavMeshQuery::raycast`]
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the segment, `f32::MAX` when the end was reached
    pub t: f32,
    /// Normal of the wall that was hit
    pub hit_normal: [f32; 3],
    /// Edge of the last visited polygon the ray left through
    pub hit_edge_index: Option<usize>,
    /// Polygons visited by the ray
    pub path: Vec<PolyRef>,
    /// Cost of the traversed path, with [`RaycastOptions::USE_COSTS`]
    pub path_cost: f32,
}

impl RaycastHit {
    /// True when the ray reached its end point without hitting a wall
    pub fn reached_end(&self) -> bool {
        self.t == f32::MAX
    }
}

/// Polygon found by a graph search around a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyVisit {
    pub reference: PolyRef,
    /// Polygon the search came from, null for the start polygon
    pub parent: PolyRef,
    /// Search cost to reach the polygon
    pub cost: f32,
}

/// Edge segment of a polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    pub start: [f32; 3],
    pub end: [f32; 3],
    /// Polygon across the segment, null for walls
    pub neighbour: PolyRef,
}

/// Nearest polygon to a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    pub reference: PolyRef,
    /// Closest point on the polygon
    pub point: [f32; 3],
    /// True when the query point lies over the polygon
    pub over_poly: bool,
}

/// Failure of [`NavMeshQuery::compute_path`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputePathError {
    StartNearestPolyFailed(Status),
    NoStartNearestPoly,
    EndNearestPolyFailed(Status),
    NoEndNearestPoly,
    FindPathFailed(Status),
    NoPolygonPathFound,
    FindStraightPathFailed(Status),
    NoPointPathFound,
}

impl std::fmt::Display for ComputePathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartNearestPolyFailed(s) => write!(f, "finding the start polygon failed: {s}"),
            Self::NoStartNearestPoly => write!(f, "no polygon near the start position"),
            Self::EndNearestPolyFailed(s) => write!(f, "finding the end polygon failed: {s}"),
            Self::NoEndNearestPoly => write!(f, "no polygon near the end position"),
            Self::FindPathFailed(s) => write!(f, "polygon path search failed: {s}"),
            Self::NoPolygonPathFound => write!(f, "no polygon path found"),
            Self::FindStraightPathFailed(s) => write!(f, "straight path failed: {s}"),
            Self::NoPointPathFound => write!(f, "no point path found"),
        }
    }
}

impl std::error::Error for ComputePathError {}

/// State of a sliced path search
#[derive(Debug, Clone)]
struct SlicedQuery {
    status: Status,
    last_best: Option<usize>,
    last_best_cost: f32,
    start_ref: PolyRef,
    end_ref: PolyRef,
    end_pos: [f32; 3],
    filter: QueryFilter,
}

/// Search and sampling queries over a [`NavMesh`]
pub struct NavMeshQuery<'a> {
    nav: &'a NavMesh,
    node_pool: NodePool,
    tiny_node_pool: NodePool,
    open_list: NodeQueue,
    query: Option<SlicedQuery>,
    rand: FastRand,
    query_extent: [f32; 3],
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query with [`DT_DEFAULT_MAX_NODES`] search nodes
    pub fn new(nav: &'a NavMesh) -> Self {
        Self::with_max_nodes(nav, DT_DEFAULT_MAX_NODES)
    }

    pub fn with_max_nodes(nav: &'a NavMesh, max_nodes: usize) -> Self {
        let max_nodes = max_nodes.clamp(1, u16::MAX as usize - 1);
        let hash_size = next_pow2((max_nodes / 4).max(1) as u32) as usize;
        Self {
            nav,
            node_pool: NodePool::new(max_nodes, hash_size),
            tiny_node_pool: NodePool::new(TINY_NODE_POOL_SIZE, 32),
            open_list: NodeQueue::new(max_nodes),
            query: None,
            rand: FastRand::default(),
            query_extent: [1.0; 3],
        }
    }

    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav
    }

    /// Half extents used by the high level helpers
    pub fn query_extent(&self) -> [f32; 3] {
        self.query_extent
    }

    pub fn set_query_extent(&mut self, extent: [f32; 3]) {
        self.query_extent = extent;
    }

    pub fn set_random_seed(&mut self, seed: u32) {
        self.rand = FastRand::new(seed);
    }

    fn poly_index(&self, r: PolyRef) -> usize {
        self.nav.decode_poly_id(r).2 as usize
    }

    // ---------------------------------------------------------------------
    // Polygon lookups

    /// True if `r` addresses a polygon that passes `filter`
    pub fn is_valid_poly_ref(&self, r: PolyRef, filter: &QueryFilter) -> bool {
        match self.nav.get_tile_and_poly_by_ref(r) {
            Ok((_, poly)) => filter.pass_filter(r, poly),
            Err(_) => false,
        }
    }

    /// True if the last search closed a node of `r`
    pub fn is_in_closed_list(&self, r: PolyRef) -> bool {
        self.node_pool
            .find_nodes(r)
            .into_iter()
            .any(|i| self.node_pool.node(i).flags.contains(NodeFlags::CLOSED))
    }

    /// Closest point on polygon `r` and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        self.nav.closest_point_on_poly(r, pos)
    }

    /// Closest point to `pos` on the outline of polygon `r`; `pos` itself
    /// when it lies inside. Ignores the detail mesh.
    pub fn closest_point_on_poly_boundary(&self, r: PolyRef, pos: &[f32; 3]) -> Result<[f32; 3]> {
        let (tile, poly) = self.nav.get_tile_and_poly_by_ref(r)?;
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        let (verts, nv) = tile.poly_verts(poly);
        if nv < 2 {
            return Err(Status::invalid_param());
        }

        let mut edged = [0.0f32; MAX_VERTS_PER_POLY];
        let mut edget = [0.0f32; MAX_VERTS_PER_POLY];
        if distance_pt_poly_edges_sqr(pos, &verts, nv, &mut edged, &mut edget) {
            return Ok(*pos);
        }

        let mut imin = 0;
        for i in 1..nv {
            if edged[i] < edged[imin] {
                imin = i;
            }
        }
        let va = vget(&verts, imin);
        let vb = vget(&verts, (imin + 1) % nv);
        Ok(vlerp(&va, &vb, edget[imin]))
    }

    /// Height of polygon `r` at the xz location of `pos`
    pub fn get_poly_height(&self, r: PolyRef, pos: &[f32; 3]) -> Result<f32> {
        let (tile, poly) = self.nav.get_tile_and_poly_by_ref(r)?;
        if !recast_common::visfinite_2d(pos) {
            return Err(Status::invalid_param());
        }
        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = tile.poly_vertex(poly, 0);
            let v1 = tile.poly_vertex(poly, 1);
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return Ok(v0[1] + (v1[1] - v0[1]) * t);
        }
        tile.poly_height(self.poly_index(r), pos)
            .ok_or(Status::invalid_param())
    }

    /// Polygons overlapping the box `center ± half_extents` that pass
    /// `filter`
    pub fn query_polygons(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Vec<PolyRef>> {
        if !visfinite(center) || !visfinite(half_extents) || half_extents.iter().any(|&v| v < 0.0) {
            return Err(Status::invalid_param());
        }
        let bmin = vsub(center, half_extents);
        let bmax = recast_common::vadd(center, half_extents);
        let (minx, miny) = self.nav.calc_tile_loc(&bmin);
        let (maxx, maxy) = self.nav.calc_tile_loc(&bmax);

        let mut out = Vec::new();
        for y in miny..=maxy {
            for x in minx..=maxx {
                for tile in self.nav.get_tiles_at(x, y) {
                    for r in self.nav.query_polygons_in_tile(tile, &bmin, &bmax) {
                        let poly = &tile.polys[self.poly_index(r)];
                        if filter.pass_filter(r, poly) {
                            out.push(r);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Nearest polygon to `center` within `half_extents`.
    ///
    /// A point over a polygon and within its tile's climb height counts as
    /// being on it.
    pub fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Option<NearestPoly>> {
        let mut nearest: Option<NearestPoly> = None;
        let mut nearest_dist = f32::MAX;

        for r in self.query_polygons(center, half_extents, filter)? {
            let (tile, _) = self.nav.get_tile_and_poly_by_ref(r)?;
            let climb = tile.header.as_ref().map_or(0.0, |h| h.walkable_climb);
            let (closest, over_poly) = tile.closest_point_on_poly(self.poly_index(r), center);

            let diff = vsub(center, &closest);
            let d = if over_poly {
                sqr((diff[1].abs() - climb).max(0.0))
            } else {
                vlen_sqr(&diff)
            };

            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some(NearestPoly {
                    reference: r,
                    point: closest,
                    over_poly,
                });
            }
        }
        Ok(nearest)
    }

    /// Nearest polygon and the closest point on it, failing when nothing is
    /// within `half_extents`
    pub fn find_closest_point(
        &self,
        position: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<NearestPoly> {
        let nearest = self
            .find_nearest_poly(position, half_extents, filter)?
            .ok_or(Status::FAILURE)?;
        let (point, over_poly) = self.closest_point_on_poly(nearest.reference, position)?;
        Ok(NearestPoly {
            reference: nearest.reference,
            point,
            over_poly,
        })
    }

    // ---------------------------------------------------------------------
    // Portals

    /// Portal between two adjacent polygons plus both polygon types
    pub fn get_portal_points(
        &self,
        from: PolyRef,
        to: PolyRef,
    ) -> Result<([f32; 3], [f32; 3], PolyType, PolyType)> {
        let (from_tile, from_poly) = self.nav.get_tile_and_poly_by_ref(from)?;
        let (to_tile, to_poly) = self.nav.get_tile_and_poly_by_ref(to)?;
        let (left, right) =
            portal_points(from, from_tile, from_poly, to, to_tile, to_poly).ok_or(Status::invalid_param())?;
        Ok((left, right, from_poly.poly_type, to_poly.poly_type))
    }

    /// Middle of the portal between two adjacent polygons
    pub fn get_edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<[f32; 3]> {
        let (left, right, _, _) = self.get_portal_points(from, to)?;
        Ok(vlerp(&left, &right, 0.5))
    }

    // ---------------------------------------------------------------------
    // Path finding

    fn path_to_node(&self, end_node: usize, max_path: usize) -> (Vec<PolyRef>, Status) {
        let mut path = Vec::new();
        let mut cur = Some(end_node);
        while let Some(i) = cur {
            let node = self.node_pool.node(i);
            path.push(node.id);
            cur = node.parent;
        }
        path.reverse();

        // Keep the start of the path when it does not fit.
        let mut status = Status::SUCCESS;
        if path.len() > max_path {
            path.truncate(max_path);
            status |= Status::BUFFER_TOO_SMALL;
        }
        (path, status)
    }

    /// Starts a new search from `start_ref`, returning its node
    fn start_search(&mut self, start_ref: PolyRef, pos: &[f32; 3], total: f32) -> Result<usize> {
        self.node_pool.clear();
        self.open_list.clear();
        let start = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::FAILURE | Status::OUT_OF_MEMORY)?;
        let node = self.node_pool.node_mut(start);
        node.pos = *pos;
        node.parent = None;
        node.cost = 0.0;
        node.total = total;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(&self.node_pool, start);
        Ok(start)
    }

    /// Expands `best` during an A* search towards `end_ref`.
    ///
    /// Returns true when the node pool ran out. Updates `last_best` with the
    /// node closest to the goal.
    #[allow(clippy::too_many_arguments)]
    fn expand_astar(
        &mut self,
        best: usize,
        end_ref: PolyRef,
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        last_best: &mut usize,
        last_best_cost: &mut f32,
    ) -> Result<bool> {
        let nav = self.nav;
        let best_ref = self.node_pool.node(best).id;
        let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref(best_ref)?;
        let parent_ref = self
            .node_pool
            .node(best)
            .parent
            .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

        let mut out_of_nodes = false;
        for link in best_tile.links_of(best_poly) {
            let neighbour_ref = link.reference;
            if neighbour_ref.is_null() || neighbour_ref == parent_ref {
                continue;
            }
            let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(neighbour_ref) else {
                continue;
            };
            if !filter.pass_filter(neighbour_ref, nei_poly) {
                continue;
            }

            // Nodes crossing a tile border are kept per side, so that an
            // edge split over several tiles keeps distinct entry points.
            let cross_side = if link.side != 0xff { link.side >> 1 } else { 0 };
            let Some(nei) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                out_of_nodes = true;
                continue;
            };

            if self.node_pool.node(nei).flags.is_empty() {
                if let Some(mid) =
                    edge_mid_point(best_ref, best_tile, best_poly, neighbour_ref, nei_tile, nei_poly)
                {
                    self.node_pool.node_mut(nei).pos = mid;
                }
            }

            let best_node = *self.node_pool.node(best);
            let nei_pos = self.node_pool.node(nei).pos;
            let (cost, heuristic) = if neighbour_ref == end_ref {
                let cur_cost = filter.get_cost(&best_node.pos, &nei_pos, best_poly);
                let end_cost = filter.get_cost(&nei_pos, end_pos, nei_poly);
                (best_node.cost + cur_cost + end_cost, 0.0)
            } else {
                let cur_cost = filter.get_cost(&best_node.pos, &nei_pos, best_poly);
                (best_node.cost + cur_cost, vdist(&nei_pos, end_pos) * H_SCALE)
            };
            let total = cost + heuristic;

            let nei_node = self.node_pool.node(nei);
            let was_open = nei_node.flags.contains(NodeFlags::OPEN);
            if (was_open || nei_node.flags.contains(NodeFlags::CLOSED)) && total >= nei_node.total {
                continue;
            }

            let node = self.node_pool.node_mut(nei);
            node.parent = Some(best);
            node.flags.remove(NodeFlags::CLOSED);
            node.cost = cost;
            node.total = total;

            if was_open {
                self.open_list.modify(&self.node_pool, nei);
            } else {
                self.node_pool.node_mut(nei).flags.insert(NodeFlags::OPEN);
                self.open_list.push(&self.node_pool, nei);
            }

            if heuristic < *last_best_cost {
                *last_best_cost = heuristic;
                *last_best = nei;
            }
        }
        Ok(out_of_nodes)
    }

    /// A* search for a polygon corridor from `start_ref` to `end_ref`.
    ///
    /// When the goal cannot be reached the path leads to the polygon closest
    /// to it and the status carries [`Status::PARTIAL_RESULT`].
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<(Vec<PolyRef>, Status)> {
        if !self.nav.is_valid_poly_ref(start_ref)
            || !self.nav.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
            || max_path == 0
        {
            return Err(Status::invalid_param());
        }

        if start_ref == end_ref {
            return Ok((vec![start_ref], Status::SUCCESS));
        }

        let start_total = vdist(start_pos, end_pos) * H_SCALE;
        let start = self.start_search(start_ref, start_pos, start_total)?;
        let mut last_best = start;
        let mut last_best_cost = start_total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let node = self.node_pool.node_mut(best);
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);

            if node.id == end_ref {
                last_best = best;
                break;
            }

            out_of_nodes |= self.expand_astar(
                best,
                end_ref,
                end_pos,
                filter,
                &mut last_best,
                &mut last_best_cost,
            )?;
        }

        let (path, mut status) = self.path_to_node(last_best, max_path);
        if self.node_pool.node(last_best).id != end_ref {
            status |= Status::PARTIAL_RESULT;
        }
        if out_of_nodes {
            status |= Status::OUT_OF_NODES;
        }
        if status.has_detail(Status::PARTIAL_RESULT | Status::OUT_OF_NODES) {
            log::debug!("find_path {} -> {} ended with {}", start_ref, end_ref, status);
        }
        Ok((path, status))
    }

    // ---------------------------------------------------------------------
    // Sliced path finding

    /// Starts a path search that is advanced with
    /// [`NavMeshQuery::update_sliced_find_path`]
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
    ) -> Result<Status> {
        let mut query = SlicedQuery {
            status: Status::FAILURE,
            last_best: None,
            last_best_cost: 0.0,
            start_ref,
            end_ref,
            end_pos: *end_pos,
            filter: filter.clone(),
        };

        if !self.nav.is_valid_poly_ref(start_ref)
            || !self.nav.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
        {
            self.query = Some(query);
            return Err(Status::invalid_param());
        }

        if start_ref == end_ref {
            query.status = Status::SUCCESS;
            self.query = Some(query);
            return Ok(Status::SUCCESS);
        }

        let start_total = vdist(start_pos, end_pos) * H_SCALE;
        let start = match self.start_search(start_ref, start_pos, start_total) {
            Ok(start) => start,
            Err(status) => {
                self.query = Some(query);
                return Err(status);
            }
        };
        query.last_best = Some(start);
        query.last_best_cost = start_total;
        query.status = Status::IN_PROGRESS;
        self.query = Some(query);
        Ok(Status::IN_PROGRESS)
    }

    /// Runs up to `max_iter` iterations of the sliced search. Returns the
    /// search status and the number of iterations done.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> Result<(Status, usize)> {
        let Some(mut query) = self.query.take() else {
            return Err(Status::FAILURE);
        };
        let result = self.run_sliced(&mut query, max_iter);
        if let Err(status) = result {
            query.status = status;
        }
        self.query = Some(query);
        result
    }

    fn run_sliced(&mut self, query: &mut SlicedQuery, max_iter: usize) -> Result<(Status, usize)> {
        if !query.status.is_in_progress() {
            return query.status.to_result((query.status, 0));
        }

        // The mesh may have changed between updates.
        if !self.nav.is_valid_poly_ref(query.start_ref) || !self.nav.is_valid_poly_ref(query.end_ref) {
            return Err(Status::FAILURE);
        }

        let mut last_best = query.last_best.ok_or(Status::FAILURE)?;
        let mut iter = 0;
        while iter < max_iter {
            let Some(best) = self.open_list.pop(&self.node_pool) else {
                break;
            };
            iter += 1;

            let node = self.node_pool.node_mut(best);
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);

            if node.id == query.end_ref {
                query.last_best = Some(best);
                query.status = Status::SUCCESS | query.status.detail();
                return Ok((query.status, iter));
            }

            // A polygon removed during the search fails the query.
            let out_of_nodes = self.expand_astar(
                best,
                query.end_ref,
                &query.end_pos,
                &query.filter,
                &mut last_best,
                &mut query.last_best_cost,
            )?;
            if out_of_nodes {
                query.status |= Status::OUT_OF_NODES;
            }
            query.last_best = Some(last_best);
        }

        if self.open_list.is_empty() {
            query.status = Status::SUCCESS | query.status.detail();
        }
        Ok((query.status, iter))
    }

    /// Status of the current sliced search, if one was started
    pub fn sliced_status(&self) -> Option<Status> {
        self.query.as_ref().map(|q| q.status)
    }

    /// Ends the sliced search and returns the path it found
    pub fn finalize_sliced_find_path(&mut self, max_path: usize) -> Result<(Vec<PolyRef>, Status)> {
        let query = self.query.take().ok_or(Status::FAILURE)?;
        if query.status.is_failure() || max_path == 0 {
            return Err(Status::FAILURE);
        }

        if query.start_ref == query.end_ref {
            return Ok((vec![query.start_ref], Status::SUCCESS));
        }

        let last_best = query.last_best.ok_or(Status::FAILURE)?;
        let mut details = query.status.detail();
        if self.node_pool.node(last_best).id != query.end_ref {
            details |= Status::PARTIAL_RESULT;
        }
        let (path, status) = self.path_to_node(last_best, max_path);
        Ok((path, status | details))
    }

    /// Ends the sliced search, returning a path to the furthest polygon of
    /// `existing` that the search visited
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyRef],
        max_path: usize,
    ) -> Result<(Vec<PolyRef>, Status)> {
        if existing.is_empty() || max_path == 0 {
            return Err(Status::invalid_param());
        }
        let query = self.query.take().ok_or(Status::FAILURE)?;
        if query.status.is_failure() {
            return Err(Status::FAILURE);
        }

        if query.start_ref == query.end_ref {
            return Ok((vec![query.start_ref], Status::SUCCESS));
        }

        let mut details = query.status.detail();
        let visited = existing
            .iter()
            .rev()
            .find_map(|&r| self.node_pool.find_nodes(r).first().copied());
        let node = match visited {
            Some(node) => node,
            None => {
                details |= Status::PARTIAL_RESULT;
                query.last_best.ok_or(Status::FAILURE)?
            }
        };

        let (path, status) = self.path_to_node(node, max_path);
        Ok((path, status | details))
    }

    // ---------------------------------------------------------------------
    // String pulling

    fn append_vertex(
        out: &mut StraightPath,
        pos: [f32; 3],
        flags: StraightPathFlags,
        r: PolyRef,
        max: usize,
    ) -> Status {
        if let Some(last) = out.points.last() {
            if vequal(last, &pos) {
                // Same point as the previous one, only update flags and ref.
                let n = out.len() - 1;
                out.flags[n] = flags;
                out.refs[n] = r;
                return Status::IN_PROGRESS;
            }
        }

        out.push(pos, flags, r);
        if flags == StraightPathFlags::END || out.len() >= max {
            let mut status = Status::SUCCESS;
            if out.len() >= max {
                status |= Status::BUFFER_TOO_SMALL;
            }
            return status;
        }
        Status::IN_PROGRESS
    }

    #[allow(clippy::too_many_arguments)]
    fn append_portals(
        &self,
        start_idx: usize,
        end_idx: usize,
        end_pos: &[f32; 3],
        path: &[PolyRef],
        out: &mut StraightPath,
        max: usize,
        options: StraightPathOptions,
    ) -> Status {
        let Some(&start_pos) = out.points.last() else {
            return Status::IN_PROGRESS;
        };

        for i in start_idx..end_idx {
            let from = path[i];
            let to = path[i + 1];
            let Ok((from_tile, from_poly)) = self.nav.get_tile_and_poly_by_ref(from) else {
                return Status::invalid_param();
            };
            let Ok((to_tile, to_poly)) = self.nav.get_tile_and_poly_by_ref(to) else {
                return Status::invalid_param();
            };
            let Some((left, right)) = portal_points(from, from_tile, from_poly, to, to_tile, to_poly) else {
                break;
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from_poly.area == to_poly.area {
                continue;
            }

            if let Some((_, t)) = intersect_seg_seg_2d(&start_pos, end_pos, &left, &right) {
                let pt = vlerp(&left, &right, t);
                let status = Self::append_vertex(out, pt, StraightPathFlags::empty(), to, max);
                if status != Status::IN_PROGRESS {
                    return status;
                }
            }
        }
        Status::IN_PROGRESS
    }

    /// Pulls the polygon corridor `path` taut into a list of corner points.
    ///
    /// Corner flags mark the start, the end and the entry of off-mesh
    /// connections.
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_straight_path: usize,
        options: StraightPathOptions,
    ) -> Result<(StraightPath, Status)> {
        if !visfinite(start_pos)
            || !visfinite(end_pos)
            || path.is_empty()
            || path[0].is_null()
            || max_straight_path == 0
        {
            return Err(Status::invalid_param());
        }

        let mut out = StraightPath::default();
        let max = max_straight_path;
        let with_crossings = !options.is_empty();

        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos)?;
        let mut closest_end = self.closest_point_on_poly_boundary(path[path.len() - 1], end_pos)?;

        let status = Self::append_vertex(&mut out, closest_start, StraightPathFlags::START, path[0], max);
        if status != Status::IN_PROGRESS {
            return Ok((out, status));
        }

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0usize;
            let mut left_index = 0usize;
            let mut right_index = 0usize;

            let mut left_poly_type = PolyType::Ground;
            let mut right_poly_type = PolyType::Ground;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match self.get_portal_points(path[i], path[i + 1]) {
                        Ok((left, right, _, to_type)) => {
                            // Skip the first portal when the start already
                            // sits on it.
                            if i == 0 {
                                let (d, _) = dist_pt_seg_sqr_2d(&portal_apex, &left, &right);
                                if d < sqr(0.001) {
                                    i += 1;
                                    continue;
                                }
                            }
                            (left, right, to_type)
                        }
                        Err(_) => {
                            // The corridor is broken: end at the last
                            // reachable polygon.
                            closest_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            if with_crossings {
                                let status = self.append_portals(
                                    apex_index,
                                    i,
                                    &closest_end,
                                    path,
                                    &mut out,
                                    max,
                                    options,
                                );
                                if status != Status::IN_PROGRESS {
                                    return Ok((out, status));
                                }
                            }
                            Self::append_vertex(&mut out, closest_end, StraightPathFlags::empty(), path[i], max);
                            let mut status = Status::SUCCESS | Status::PARTIAL_RESULT;
                            if out.len() >= max {
                                status |= Status::BUFFER_TOO_SMALL;
                            }
                            return Ok((out, status));
                        }
                    }
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };
                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                // Right side of the funnel
                if tri_area_2d(&portal_apex, &portal_right, &right) <= 0.0 {
                    if vequal(&portal_apex, &portal_right) || tri_area_2d(&portal_apex, &portal_left, &right) > 0.0 {
                        portal_right = right;
                        right_poly_ref = next_ref;
                        right_poly_type = to_type;
                        right_index = i;
                    } else {
                        // Right crossed over left: the left point becomes a corner.
                        if with_crossings {
                            let status = self.append_portals(
                                apex_index,
                                left_index,
                                &portal_left,
                                path,
                                &mut out,
                                max,
                                options,
                            );
                            if status != Status::IN_PROGRESS {
                                return Ok((out, status));
                            }
                        }

                        portal_apex = portal_left;
                        apex_index = left_index;

                        let flags = corner_flags(left_poly_ref, left_poly_type);
                        let status = Self::append_vertex(&mut out, portal_apex, flags, left_poly_ref, max);
                        if status != Status::IN_PROGRESS {
                            return Ok((out, status));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side of the funnel
                if tri_area_2d(&portal_apex, &portal_left, &left) >= 0.0 {
                    if vequal(&portal_apex, &portal_left) || tri_area_2d(&portal_apex, &portal_right, &left) < 0.0 {
                        portal_left = left;
                        left_poly_ref = next_ref;
                        left_poly_type = to_type;
                        left_index = i;
                    } else {
                        // Left crossed over right: the right point becomes a corner.
                        if with_crossings {
                            let status = self.append_portals(
                                apex_index,
                                right_index,
                                &portal_right,
                                path,
                                &mut out,
                                max,
                                options,
                            );
                            if status != Status::IN_PROGRESS {
                                return Ok((out, status));
                            }
                        }

                        portal_apex = portal_right;
                        apex_index = right_index;

                        let flags = corner_flags(right_poly_ref, right_poly_type);
                        let status = Self::append_vertex(&mut out, portal_apex, flags, right_poly_ref, max);
                        if status != Status::IN_PROGRESS {
                            return Ok((out, status));
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if with_crossings {
                let status = self.append_portals(
                    apex_index,
                    path.len() - 1,
                    &closest_end,
                    path,
                    &mut out,
                    max,
                    options,
                );
                if status != Status::IN_PROGRESS {
                    return Ok((out, status));
                }
            }
        }

        Self::append_vertex(&mut out, closest_end, StraightPathFlags::END, PolyRef::NULL, max);
        let mut status = Status::SUCCESS;
        if out.len() >= max {
            status |= Status::BUFFER_TOO_SMALL;
        }
        Ok((out, status))
    }

    // ---------------------------------------------------------------------
    // Local movement

    /// Moves from `start_pos` towards `end_pos` along the surface, sliding
    /// along walls.
    ///
    /// The search is limited to a circle around the segment, so the result
    /// is only meaningful for short moves. Returns the reached position and
    /// the polygons visited, starting with `start_ref`.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<([f32; 3], Vec<PolyRef>)> {
        if !self.nav.is_valid_poly_ref(start_ref) || !visfinite(start_pos) || !visfinite(end_pos) || max_visited == 0 {
            return Err(Status::invalid_param());
        }

        let nav = self.nav;
        let pool = &mut self.tiny_node_pool;
        pool.clear();

        let start = pool.get_node(start_ref, 0).ok_or(Status::FAILURE)?;
        let node = pool.node_mut(start);
        node.parent = None;
        node.flags = NodeFlags::CLOSED;

        let mut stack = VecDeque::with_capacity(MAX_LOCAL_STACK);
        stack.push_back(start);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = start;

        // Search constraints
        let search_pos = vlerp(start_pos, end_pos, 0.5);
        let search_rad_sqr = sqr(vdist(start_pos, end_pos) / 2.0 + 0.001);

        while let Some(cur) = stack.pop_front() {
            let cur_ref = pool.node(cur).id;
            let (cur_tile, cur_poly) = nav.get_tile_and_poly_by_ref(cur_ref)?;
            let (verts, nv) = cur_tile.poly_verts(cur_poly);

            if point_in_polygon(end_pos, &verts, nv) {
                best_node = cur;
                best_pos = *end_pos;
                break;
            }

            let base = nav.get_poly_ref_base(cur_tile).id();
            let mut j = nv - 1;
            for i in 0..nv {
                let mut neis: Vec<PolyRef> = Vec::with_capacity(MAX_EDGE_NEIGHBOURS);
                let nei_flag = cur_poly.neis[j];

                if nei_flag & DT_EXT_LINK != 0 {
                    for link in cur_tile.links_of(cur_poly) {
                        if link.edge as usize != j || link.reference.is_null() {
                            continue;
                        }
                        if let Ok((_, nei_poly)) = nav.get_tile_and_poly_by_ref(link.reference) {
                            if filter.pass_filter(link.reference, nei_poly) && neis.len() < MAX_EDGE_NEIGHBOURS {
                                neis.push(link.reference);
                            }
                        }
                    }
                } else if nei_flag != 0 {
                    let idx = (nei_flag - 1) as usize;
                    let r = PolyRef::new(base | idx as u32);
                    if let Some(nei_poly) = cur_tile.polys.get(idx) {
                        if filter.pass_filter(r, nei_poly) {
                            neis.push(r);
                        }
                    }
                }

                let vj = vget(&verts, j);
                let vi = vget(&verts, i);
                if neis.is_empty() {
                    // Wall edge, track the closest point to the target.
                    let (dist, tseg) = dist_pt_seg_sqr_2d(end_pos, &vj, &vi);
                    if dist < best_dist {
                        best_pos = vlerp(&vj, &vi, tseg);
                        best_dist = dist;
                        best_node = cur;
                    }
                } else {
                    for nei_ref in neis {
                        let Some(nei) = pool.get_node(nei_ref, 0) else {
                            continue;
                        };
                        if pool.node(nei).flags.contains(NodeFlags::CLOSED) {
                            continue;
                        }

                        // Skip edges outside the search circle.
                        let (d, _) = dist_pt_seg_sqr_2d(&search_pos, &vj, &vi);
                        if d > search_rad_sqr {
                            continue;
                        }

                        if stack.len() < MAX_LOCAL_STACK {
                            let node = pool.node_mut(nei);
                            node.parent = Some(cur);
                            node.flags.insert(NodeFlags::CLOSED);
                            stack.push_back(nei);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = Vec::new();
        let mut cur = Some(best_node);
        while let Some(i) = cur {
            visited.push(pool.node(i).id);
            cur = pool.node(i).parent;
        }
        visited.reverse();
        visited.truncate(max_visited);

        Ok((best_pos, visited))
    }

    /// Casts a ray along the surface from `start_pos` towards `end_pos`.
    ///
    /// `prev_ref` is the polygon the caller came from, used for costs only.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &QueryFilter,
        options: RaycastOptions,
        prev_ref: PolyRef,
    ) -> Result<RaycastHit> {
        if !self.nav.is_valid_poly_ref(start_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
            || (!prev_ref.is_null() && !self.nav.is_valid_poly_ref(prev_ref))
        {
            return Err(Status::invalid_param());
        }

        let mut hit = RaycastHit {
            t: 0.0,
            hit_normal: [0.0; 3],
            hit_edge_index: None,
            path: Vec::new(),
            path_cost: 0.0,
        };

        let dir = vsub(end_pos, start_pos);
        let mut cur_pos = *start_pos;
        let mut cur_ref = start_ref;

        while !cur_ref.is_null() {
            let (tile, poly) = self.nav.get_tile_and_poly_by_ref(cur_ref)?;
            let (verts, nv) = tile.poly_verts(poly);

            let Some(isect) = intersect_segment_poly_2d(start_pos, end_pos, &verts, nv) else {
                // Could not hit the polygon, keep the old t and report hit.
                return Ok(hit);
            };

            hit.hit_edge_index = isect.seg_max;
            if isect.tmax > hit.t {
                hit.t = isect.tmax;
            }
            hit.path.push(cur_ref);

            let Some(seg_max) = isect.seg_max else {
                // The ray ends inside this polygon.
                hit.t = f32::MAX;
                if options.contains(RaycastOptions::USE_COSTS) {
                    hit.path_cost += filter.get_cost(&cur_pos, end_pos, poly);
                }
                return Ok(hit);
            };

            let mut next_ref = PolyRef::NULL;
            for link in tile.links_of(poly) {
                if link.edge as usize != seg_max {
                    continue;
                }
                let Ok((_, next_poly)) = self.nav.get_tile_and_poly_by_ref(link.reference) else {
                    continue;
                };
                if next_poly.poly_type == PolyType::OffMeshConnection {
                    continue;
                }
                if !filter.pass_filter(link.reference, next_poly) {
                    continue;
                }

                // Internal edges and full tile border edges always connect.
                if link.side == 0xff || (link.bmin == 0 && link.bmax == 255) {
                    next_ref = link.reference;
                    break;
                }

                // Partial border edge: check the hit point against the link.
                let left = tile.poly_vertex(poly, link.edge as usize);
                let right = tile.poly_vertex(poly, (link.edge as usize + 1) % nv);
                let s = 1.0 / 255.0;
                let axis = match link.side {
                    0 | 4 => 2,
                    2 | 6 => 0,
                    _ => continue,
                };
                let mut lmin = left[axis] + (right[axis] - left[axis]) * (link.bmin as f32 * s);
                let mut lmax = left[axis] + (right[axis] - left[axis]) * (link.bmax as f32 * s);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                let v = start_pos[axis] + (end_pos[axis] - start_pos[axis]) * isect.tmax;
                if v >= lmin && v <= lmax {
                    next_ref = link.reference;
                    break;
                }
            }

            if options.contains(RaycastOptions::USE_COSTS) {
                let last_pos = cur_pos;
                cur_pos = recast_common::vmad(start_pos, &dir, hit.t);
                let e1 = vget(&verts, seg_max);
                let e2 = vget(&verts, (seg_max + 1) % nv);
                let e_dir = vsub(&e2, &e1);
                let diff = vsub(&cur_pos, &e1);
                let s = if sqr(e_dir[0]) > sqr(e_dir[2]) {
                    diff[0] / e_dir[0]
                } else {
                    diff[2] / e_dir[2]
                };
                cur_pos[1] = e1[1] + e_dir[1] * s;
                hit.path_cost += filter.get_cost(&last_pos, &cur_pos, poly);
            }

            if next_ref.is_null() {
                // Hit a wall.
                let va = vget(&verts, seg_max);
                let vb = vget(&verts, (seg_max + 1) % nv);
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                hit.hit_normal = vnormalize(&[dz, 0.0, -dx]);
                return Ok(hit);
            }

            cur_ref = next_ref;
        }

        Ok(hit)
    }

    // ---------------------------------------------------------------------
    // Searches around a point

    /// Polygons whose portals touch the circle around `center`, in
    /// Dijkstra order from `start_ref`
    pub fn find_polys_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
    ) -> Result<Vec<PolyVisit>> {
        if !self.nav.is_valid_poly_ref(start_ref) || !visfinite(center) || !(radius >= 0.0) || !radius.is_finite() {
            return Err(Status::invalid_param());
        }

        let nav = self.nav;
        self.start_search(start_ref, center, 0.0)?;
        let radius_sqr = sqr(radius);
        let mut out = Vec::new();

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let node = self.node_pool.node_mut(best);
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);
            let best_node = *node;

            let best_ref = best_node.id;
            let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref(best_ref)?;
            let parent_ref = best_node
                .parent
                .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            out.push(PolyVisit {
                reference: best_ref,
                parent: parent_ref,
                cost: best_node.total,
            });

            for link in best_tile.links_of(best_poly) {
                let nei_ref = link.reference;
                if nei_ref.is_null() || nei_ref == parent_ref {
                    continue;
                }
                let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(nei_ref) else {
                    continue;
                };
                if !filter.pass_filter(nei_ref, nei_poly) {
                    continue;
                }
                let Some((va, vb)) = portal_points(best_ref, best_tile, best_poly, nei_ref, nei_tile, nei_poly)
                else {
                    continue;
                };

                // Skip portals outside the circle.
                let (dist, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                if dist > radius_sqr {
                    continue;
                }

                let Some(nei) = self.node_pool.get_node(nei_ref, 0) else {
                    continue;
                };
                if self.node_pool.node(nei).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.node_pool.node(nei).flags.is_empty() {
                    self.node_pool.node_mut(nei).pos = vlerp(&va, &vb, 0.5);
                }

                let nei_node = *self.node_pool.node(nei);
                let total = best_node.total + filter.get_cost(&best_node.pos, &nei_node.pos, best_poly);
                let was_open = nei_node.flags.contains(NodeFlags::OPEN);
                if was_open && total >= nei_node.total {
                    continue;
                }

                let node = self.node_pool.node_mut(nei);
                node.parent = Some(best);
                node.total = total;
                if was_open {
                    self.open_list.modify(&self.node_pool, nei);
                } else {
                    node.flags = NodeFlags::OPEN;
                    self.open_list.push(&self.node_pool, nei);
                }
            }
        }
        Ok(out)
    }

    /// Non-overlapping polygons around `center`, as `(polygon, parent)`
    /// pairs. Only the immediate neighbourhood is searched.
    pub fn find_local_neighbourhood(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<(Vec<(PolyRef, PolyRef)>, Status)> {
        if !self.nav.is_valid_poly_ref(start_ref) || !visfinite(center) || !(radius >= 0.0) || max_result == 0 {
            return Err(Status::invalid_param());
        }

        let nav = self.nav;
        let pool = &mut self.tiny_node_pool;
        pool.clear();

        let start = pool.get_node(start_ref, 0).ok_or(Status::FAILURE)?;
        let node = pool.node_mut(start);
        node.parent = None;
        node.flags = NodeFlags::CLOSED;

        let mut stack = VecDeque::with_capacity(MAX_LOCAL_STACK);
        stack.push_back(start);

        let mut result = vec![(start_ref, PolyRef::NULL)];
        let mut status = Status::SUCCESS;
        let radius_sqr = sqr(radius);

        while let Some(cur) = stack.pop_front() {
            let cur_ref = pool.node(cur).id;
            let (cur_tile, cur_poly) = nav.get_tile_and_poly_by_ref(cur_ref)?;

            for link in cur_tile.links_of(cur_poly) {
                let nei_ref = link.reference;
                if nei_ref.is_null() {
                    continue;
                }
                let Some(nei) = pool.get_node(nei_ref, 0) else {
                    continue;
                };
                if pool.node(nei).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }

                let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(nei_ref) else {
                    continue;
                };
                if nei_poly.poly_type == PolyType::OffMeshConnection || !filter.pass_filter(nei_ref, nei_poly) {
                    continue;
                }

                let Some((va, vb)) = portal_points(cur_ref, cur_tile, cur_poly, nei_ref, nei_tile, nei_poly)
                else {
                    continue;
                };
                let (dist, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                if dist > radius_sqr {
                    continue;
                }

                let node = pool.node_mut(nei);
                node.flags.insert(NodeFlags::CLOSED);
                node.parent = Some(cur);

                // Skip polygons overlapping an already accepted one, except
                // polygons connected to the current one.
                let (nei_verts, nei_nv) = nei_tile.poly_verts(nei_poly);
                let mut overlap = false;
                for &(past_ref, _) in &result {
                    if cur_tile.links_of(cur_poly).any(|l| l.reference == past_ref) {
                        continue;
                    }
                    let Ok((past_tile, past_poly)) = nav.get_tile_and_poly_by_ref(past_ref) else {
                        continue;
                    };
                    let (past_verts, past_nv) = past_tile.poly_verts(past_poly);
                    if overlap_poly_poly_2d(&nei_verts, nei_nv, &past_verts, past_nv) {
                        overlap = true;
                        break;
                    }
                }
                if overlap {
                    continue;
                }

                if result.len() < max_result {
                    result.push((nei_ref, cur_ref));
                } else {
                    status |= Status::BUFFER_TOO_SMALL;
                }

                if stack.len() < MAX_LOCAL_STACK {
                    stack.push_back(nei);
                }
            }
        }
        Ok((result, status))
    }

    /// Wall segments of polygon `r`, and with `store_portals` also the
    /// portal segments to its neighbours
    pub fn get_poly_wall_segments(
        &self,
        r: PolyRef,
        filter: &QueryFilter,
        store_portals: bool,
    ) -> Result<Vec<WallSegment>> {
        let (tile, poly) = self.nav.get_tile_and_poly_by_ref(r)?;
        let base = self.nav.get_poly_ref_base(tile).id();
        let nv = poly.vert_count as usize;
        let mut out = Vec::new();

        let mut j = nv.wrapping_sub(1);
        for i in 0..nv {
            let vj = tile.poly_vertex(poly, j);
            let vi = tile.poly_vertex(poly, i);

            if poly.neis[j] & DT_EXT_LINK != 0 {
                // Tile border edges may be split into several links.
                let mut ints: Vec<SegInterval> = Vec::with_capacity(16);
                for link in tile.links_of(poly) {
                    if link.edge as usize != j || link.reference.is_null() {
                        continue;
                    }
                    if let Ok((_, nei_poly)) = self.nav.get_tile_and_poly_by_ref(link.reference) {
                        if filter.pass_filter(link.reference, nei_poly) {
                            insert_interval(&mut ints, link.bmin as i32, link.bmax as i32, link.reference);
                        }
                    }
                }

                // Sentinels
                insert_interval(&mut ints, -1, 0, PolyRef::NULL);
                insert_interval(&mut ints, 255, 256, PolyRef::NULL);

                for k in 1..ints.len() {
                    if store_portals && !ints[k].reference.is_null() {
                        let tmin = ints[k].tmin as f32 / 255.0;
                        let tmax = ints[k].tmax as f32 / 255.0;
                        out.push(WallSegment {
                            start: vlerp(&vj, &vi, tmin),
                            end: vlerp(&vj, &vi, tmax),
                            neighbour: ints[k].reference,
                        });
                    }

                    let imin = ints[k - 1].tmax;
                    let imax = ints[k].tmin;
                    if imin != imax {
                        out.push(WallSegment {
                            start: vlerp(&vj, &vi, imin as f32 / 255.0),
                            end: vlerp(&vj, &vi, imax as f32 / 255.0),
                            neighbour: PolyRef::NULL,
                        });
                    }
                }
            } else {
                let mut nei_ref = PolyRef::NULL;
                if poly.neis[j] != 0 {
                    let idx = (poly.neis[j] - 1) as usize;
                    let candidate = PolyRef::new(base | idx as u32);
                    if tile.polys.get(idx).is_some_and(|p| filter.pass_filter(candidate, p)) {
                        nei_ref = candidate;
                    }
                }

                if nei_ref.is_null() || store_portals {
                    out.push(WallSegment {
                        start: vj,
                        end: vi,
                        neighbour: nei_ref,
                    });
                }
            }
            j = i;
        }
        Ok(out)
    }

    /// Distance from `center` to the nearest wall within `max_radius`.
    ///
    /// Returns the distance, the hit point and the wall normal. When no wall
    /// is in range the distance is `max_radius` and the hit point is
    /// `center`.
    pub fn find_distance_to_wall(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &QueryFilter,
    ) -> Result<(f32, [f32; 3], [f32; 3])> {
        if !self.nav.is_valid_poly_ref(start_ref)
            || !visfinite(center)
            || !(max_radius >= 0.0)
            || !max_radius.is_finite()
        {
            return Err(Status::invalid_param());
        }

        let nav = self.nav;
        self.start_search(start_ref, center, 0.0)?;
        let mut radius_sqr = sqr(max_radius);
        let mut hit_pos = *center;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let node = self.node_pool.node_mut(best);
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);
            let best_node = *node;

            let best_ref = best_node.id;
            let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref(best_ref)?;
            let parent_ref = best_node
                .parent
                .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);
            let base = nav.get_poly_ref_base(best_tile).id();
            let nv = best_poly.vert_count as usize;

            // Hit test the walls of the polygon.
            let mut j = nv.wrapping_sub(1);
            for i in 0..nv {
                let nei_flag = best_poly.neis[j];
                let solid = if nei_flag & DT_EXT_LINK != 0 {
                    match best_tile.links_of(best_poly).find(|l| l.edge as usize == j) {
                        Some(link) if !link.reference.is_null() => !nav
                            .get_tile_and_poly_by_ref(link.reference)
                            .is_ok_and(|(_, p)| filter.pass_filter(link.reference, p)),
                        _ => true,
                    }
                } else if nei_flag != 0 {
                    let idx = (nei_flag - 1) as usize;
                    let r = PolyRef::new(base | idx as u32);
                    !best_tile.polys.get(idx).is_some_and(|p| filter.pass_filter(r, p))
                } else {
                    true
                };

                if solid {
                    let vj = best_tile.poly_vertex(best_poly, j);
                    let vi = best_tile.poly_vertex(best_poly, i);
                    let (dist, tseg) = dist_pt_seg_sqr_2d(center, &vj, &vi);
                    if dist <= radius_sqr {
                        radius_sqr = dist;
                        hit_pos = vlerp(&vj, &vi, tseg);
                    }
                }
                j = i;
            }

            for link in best_tile.links_of(best_poly) {
                let nei_ref = link.reference;
                if nei_ref.is_null() || nei_ref == parent_ref {
                    continue;
                }
                let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(nei_ref) else {
                    continue;
                };
                if nei_poly.poly_type == PolyType::OffMeshConnection {
                    continue;
                }

                // Skip neighbours whose shared edge is out of range.
                let va = best_tile.poly_vertex(best_poly, link.edge as usize);
                let vb = best_tile.poly_vertex(best_poly, (link.edge as usize + 1) % nv);
                let (dist, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                if dist > radius_sqr {
                    continue;
                }
                if !filter.pass_filter(nei_ref, nei_poly) {
                    continue;
                }

                let Some(nei) = self.node_pool.get_node(nei_ref, 0) else {
                    continue;
                };
                if self.node_pool.node(nei).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.node_pool.node(nei).flags.is_empty() {
                    if let Some(mid) = edge_mid_point(best_ref, best_tile, best_poly, nei_ref, nei_tile, nei_poly) {
                        self.node_pool.node_mut(nei).pos = mid;
                    }
                }

                let nei_node = *self.node_pool.node(nei);
                let total = best_node.total + vdist(&best_node.pos, &nei_node.pos);
                let was_open = nei_node.flags.contains(NodeFlags::OPEN);
                if was_open && total >= nei_node.total {
                    continue;
                }

                let node = self.node_pool.node_mut(nei);
                node.parent = Some(best);
                node.total = total;
                if was_open {
                    self.open_list.modify(&self.node_pool, nei);
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(&self.node_pool, nei);
                }
            }
        }

        let diff = vsub(center, &hit_pos);
        let hit_normal = if vlen_sqr(&diff) > 0.0 {
            vnormalize(&diff)
        } else {
            [0.0; 3]
        };
        Ok((radius_sqr.sqrt(), hit_pos, hit_normal))
    }

    // ---------------------------------------------------------------------
    // Random sampling

    /// Random point on the mesh, uniform over polygon area within a tile
    pub fn find_random_point(&mut self, filter: &QueryFilter) -> Result<(PolyRef, [f32; 3])> {
        let mut rand = self.rand;
        let result = self.find_random_point_with(filter, &mut || rand.next_f32());
        self.rand = rand;
        result
    }

    /// [`NavMeshQuery::find_random_point`] with a caller provided random
    /// source returning values in `[0, 1]`
    pub fn find_random_point_with(
        &self,
        filter: &QueryFilter,
        frand: &mut dyn FnMut() -> f32,
    ) -> Result<(PolyRef, [f32; 3])> {
        // Pick a tile, every tile is equally likely.
        let mut tile: Option<&MeshTile> = None;
        let mut tsum = 0.0f32;
        for t in self.nav.tiles() {
            let area = 1.0;
            tsum += area;
            if frand() * tsum <= area {
                tile = Some(t);
            }
        }
        let tile = tile.ok_or(Status::FAILURE)?;

        // Pick a polygon weighted by area.
        let base = self.nav.get_poly_ref_base(tile).id();
        let mut picked: Option<(PolyRef, &Poly)> = None;
        let mut area_sum = 0.0f32;
        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.poly_type != PolyType::Ground {
                continue;
            }
            let r = PolyRef::new(base | i as u32);
            if !filter.pass_filter(r, poly) {
                continue;
            }
            let poly_area = poly_area_2d(tile, poly);
            area_sum += poly_area;
            if frand() * area_sum <= poly_area {
                picked = Some((r, poly));
            }
        }
        let (r, poly) = picked.ok_or(Status::FAILURE)?;

        Ok((r, self.random_point_in_poly(r, tile, poly, frand)))
    }

    /// Random point on the polygons reachable from `start_ref` within
    /// `max_radius` of `center`.
    ///
    /// Polygons are picked by area; the point may lie outside the circle
    /// when a polygon only partly overlaps it.
    pub fn find_random_point_around_circle(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &QueryFilter,
    ) -> Result<(PolyRef, [f32; 3])> {
        let mut rand = self.rand;
        let result = self.find_random_point_around_circle_with(start_ref, center, max_radius, filter, &mut || {
            rand.next_f32()
        });
        self.rand = rand;
        result
    }

    pub fn find_random_point_around_circle_with(
        &mut self,
        start_ref: PolyRef,
        center: &[f32; 3],
        max_radius: f32,
        filter: &QueryFilter,
        frand: &mut dyn FnMut() -> f32,
    ) -> Result<(PolyRef, [f32; 3])> {
        if !visfinite(center) || !(max_radius >= 0.0) || !max_radius.is_finite() {
            return Err(Status::invalid_param());
        }
        let nav = self.nav;
        let (_, start_poly) = nav.get_tile_and_poly_by_ref(start_ref)?;
        if !filter.pass_filter(start_ref, start_poly) {
            return Err(Status::invalid_param());
        }

        self.start_search(start_ref, center, 0.0)?;
        let radius_sqr = sqr(max_radius);
        let mut area_sum = 0.0f32;
        let mut picked: Option<(PolyRef, &MeshTile, &Poly)> = None;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let node = self.node_pool.node_mut(best);
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);
            let best_node = *node;

            let best_ref = best_node.id;
            let (best_tile, best_poly) = nav.get_tile_and_poly_by_ref(best_ref)?;

            if best_poly.poly_type == PolyType::Ground {
                let poly_area = poly_area_2d(best_tile, best_poly);
                area_sum += poly_area;
                if frand() * area_sum <= poly_area {
                    picked = Some((best_ref, best_tile, best_poly));
                }
            }

            let parent_ref = best_node
                .parent
                .map_or(PolyRef::NULL, |p| self.node_pool.node(p).id);

            for link in best_tile.links_of(best_poly) {
                let nei_ref = link.reference;
                if nei_ref.is_null() || nei_ref == parent_ref {
                    continue;
                }
                let Ok((nei_tile, nei_poly)) = nav.get_tile_and_poly_by_ref(nei_ref) else {
                    continue;
                };
                if !filter.pass_filter(nei_ref, nei_poly) {
                    continue;
                }
                let Some((va, vb)) = portal_points(best_ref, best_tile, best_poly, nei_ref, nei_tile, nei_poly)
                else {
                    continue;
                };
                let (dist, _) = dist_pt_seg_sqr_2d(center, &va, &vb);
                if dist > radius_sqr {
                    continue;
                }

                let Some(nei) = self.node_pool.get_node(nei_ref, 0) else {
                    continue;
                };
                if self.node_pool.node(nei).flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if self.node_pool.node(nei).flags.is_empty() {
                    self.node_pool.node_mut(nei).pos = vlerp(&va, &vb, 0.5);
                }

                let nei_node = *self.node_pool.node(nei);
                let total = best_node.total + vdist(&best_node.pos, &nei_node.pos);
                let was_open = nei_node.flags.contains(NodeFlags::OPEN);
                if was_open && total >= nei_node.total {
                    continue;
                }

                let node = self.node_pool.node_mut(nei);
                node.parent = Some(best);
                node.total = total;
                if was_open {
                    self.open_list.modify(&self.node_pool, nei);
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(&self.node_pool, nei);
                }
            }
        }

        let (r, tile, poly) = picked.ok_or(Status::FAILURE)?;
        Ok((r, self.random_point_in_poly(r, tile, poly, frand)))
    }

    /// Random point on polygon `r`, snapped onto its detail surface
    fn random_point_in_poly(
        &self,
        r: PolyRef,
        tile: &MeshTile,
        poly: &Poly,
        frand: &mut dyn FnMut() -> f32,
    ) -> [f32; 3] {
        let (verts, nv) = tile.poly_verts(poly);
        let s = frand();
        let t = frand();
        let pt = random_point_in_convex_poly(&verts, nv, s, t);
        tile.closest_point_on_poly(self.poly_index(r), &pt).0
    }

    // ---------------------------------------------------------------------
    // High level helpers using the query extent

    fn nearest_with_extent(&self, position: &[f32; 3], filter: &QueryFilter) -> Result<Option<NearestPoly>> {
        self.find_nearest_poly(position, &self.query_extent, filter)
    }

    /// Closest point on the mesh to `position`
    pub fn get_closest_point(&self, position: &[f32; 3], filter: &QueryFilter) -> Result<[f32; 3]> {
        Ok(self.find_closest_point(position, &self.query_extent, filter)?.point)
    }

    /// Random point within `radius` of the mesh point closest to `position`
    pub fn get_random_point_around(
        &mut self,
        position: &[f32; 3],
        radius: f32,
        filter: &QueryFilter,
    ) -> Result<[f32; 3]> {
        let nearest = self
            .nearest_with_extent(position, filter)?
            .ok_or(Status::FAILURE)?;
        let (_, pt) = self.find_random_point_around_circle(nearest.reference, &nearest.point, radius, filter)?;
        Ok(pt)
    }

    /// Slides from `position` towards `target` and returns the reached
    /// point
    pub fn move_along(&mut self, position: &[f32; 3], target: &[f32; 3], filter: &QueryFilter) -> Result<[f32; 3]> {
        let nearest = self
            .nearest_with_extent(position, filter)?
            .ok_or(Status::FAILURE)?;
        let (pos, _) = self.move_along_surface(nearest.reference, &nearest.point, target, filter, 16)?;
        Ok(pos)
    }

    /// Straight path between the mesh points closest to `start` and `end`
    pub fn compute_path(
        &mut self,
        start: &[f32; 3],
        end: &[f32; 3],
        filter: &QueryFilter,
    ) -> std::result::Result<Vec<[f32; 3]>, ComputePathError> {
        let start_poly = self
            .nearest_with_extent(start, filter)
            .map_err(ComputePathError::StartNearestPolyFailed)?
            .ok_or(ComputePathError::NoStartNearestPoly)?;
        let end_poly = self
            .nearest_with_extent(end, filter)
            .map_err(ComputePathError::EndNearestPolyFailed)?
            .ok_or(ComputePathError::NoEndNearestPoly)?;

        let (path, _) = self
            .find_path(
                start_poly.reference,
                end_poly.reference,
                &start_poly.point,
                &end_poly.point,
                filter,
                MAX_HELPER_PATH,
            )
            .map_err(ComputePathError::FindPathFailed)?;
        if path.is_empty() {
            return Err(ComputePathError::NoPolygonPathFound);
        }

        let (straight, _) = self
            .find_straight_path(
                &start_poly.point,
                &end_poly.point,
                &path,
                MAX_HELPER_PATH,
                StraightPathOptions::empty(),
            )
            .map_err(ComputePathError::FindStraightPathFailed)?;
        if straight.is_empty() {
            return Err(ComputePathError::NoPointPathFound);
        }
        Ok(straight.points)
    }
}

fn corner_flags(r: PolyRef, poly_type: PolyType) -> StraightPathFlags {
    if r.is_null() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}

/// Area of a polygon on the xz-plane
fn poly_area_2d(tile: &MeshTile, poly: &Poly) -> f32 {
    let va = tile.poly_vertex(poly, 0);
    (2..poly.vert_count as usize)
        .map(|j| {
            let vb = tile.poly_vertex(poly, j - 1);
            let vc = tile.poly_vertex(poly, j);
            tri_area_2d(&va, &vb, &vc).abs()
        })
        .sum()
}

/// Left and right end points of the portal from `from` to `to`, seen
/// when moving across it
fn portal_points(
    from: PolyRef,
    from_tile: &MeshTile,
    from_poly: &Poly,
    to: PolyRef,
    to_tile: &MeshTile,
    to_poly: &Poly,
) -> Option<([f32; 3], [f32; 3])> {
    let link = from_tile.links_of(from_poly).find(|l| l.reference == to)?;

    // Off-mesh connections collapse to the connection end point.
    if from_poly.poly_type == PolyType::OffMeshConnection {
        let v = from_tile.poly_vertex(from_poly, link.edge as usize);
        return Some((v, v));
    }
    if to_poly.poly_type == PolyType::OffMeshConnection {
        let back = to_tile.links_of(to_poly).find(|l| l.reference == from)?;
        let v = to_tile.poly_vertex(to_poly, back.edge as usize);
        return Some((v, v));
    }
    let v0 = link.edge as usize;
    let v1 = (v0 + 1) % from_poly.vert_count as usize;
    let left = from_tile.poly_vertex(from_poly, v0);
    let right = from_tile.poly_vertex(from_poly, v1);

    // A link across a tile border may cover only part of the edge.
    if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        return Some((
            vlerp(&left, &right, link.bmin as f32 * s),
            vlerp(&left, &right, link.bmax as f32 * s),
        ));
    }
    Some((left, right))
}

fn edge_mid_point(
    from: PolyRef,
    from_tile: &MeshTile,
    from_poly: &Poly,
    to: PolyRef,
    to_tile: &MeshTile,
    to_poly: &Poly,
) -> Option<[f32; 3]> {
    let (left, right) = portal_points(from, from_tile, from_poly, to, to_tile, to_poly)?;
    Some(vlerp(&left, &right, 0.5))
}

#[derive(Debug, Clone, Copy)]
struct SegInterval {
    reference: PolyRef,
    tmin: i32,
    tmax: i32,
}

/// Inserts an interval keeping the list sorted by start
fn insert_interval(ints: &mut Vec<SegInterval>, tmin: i32, tmax: i32, reference: PolyRef) {
    let idx = ints.iter().position(|int| tmax <= int.tmin).unwrap_or(ints.len());
    ints.insert(idx, SegInterval { reference, tmin, tmax });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{poly_ref, solo_cells_mesh, solo_grid_mesh, tiled_grid_mesh};
    use approx::assert_relative_eq;

    const EXT: [f32; 3] = [1.0, 1.0, 1.0];

    fn nearest(query: &NavMeshQuery, pos: [f32; 3]) -> PolyRef {
        query
            .find_nearest_poly(&pos, &EXT, &QueryFilter::default())
            .unwrap()
            .unwrap()
            .reference
    }

    #[test]
    fn test_fast_rand_sequence() {
        let mut a = FastRand::default();
        let mut b = FastRand::new(1337);
        for _ in 0..10 {
            let v = a.next_f32();
            assert!((0.0..=1.0).contains(&v));
            assert_eq!(v, b.next_f32());
        }
    }

    #[test]
    fn test_find_nearest_poly() {
        let nav = solo_grid_mesh(3, 3);
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();

        let found = query
            .find_nearest_poly(&[1.3, 0.5, 1.6], &EXT, &filter)
            .unwrap()
            .unwrap();
        assert_eq!(found.reference, poly_ref(&nav, 4));
        assert!(found.over_poly);
        assert_relative_eq!(found.point[0], 1.3);
        assert_relative_eq!(found.point[1], 0.0);
        assert_relative_eq!(found.point[2], 1.6);

        // Far away from every polygon.
        let none = query
            .find_nearest_poly(&[20.0, 0.0, 20.0], &EXT, &filter)
            .unwrap();
        assert!(none.is_none());

        assert!(query
            .find_nearest_poly(&[f32::NAN, 0.0, 0.0], &EXT, &filter)
            .is_err());
    }

    #[test]
    fn test_closest_point_on_poly_boundary() {
        let nav = solo_grid_mesh(1, 1);
        let query = NavMeshQuery::new(&nav);
        let r = poly_ref(&nav, 0);

        let inside = query.closest_point_on_poly_boundary(r, &[0.5, 0.0, 0.5]).unwrap();
        assert_eq!(inside, [0.5, 0.0, 0.5]);

        let outside = query.closest_point_on_poly_boundary(r, &[2.0, 0.0, 0.5]).unwrap();
        assert_relative_eq!(outside[0], 1.0);
        assert_relative_eq!(outside[2], 0.5);
    }

    #[test]
    fn test_find_path_around_hole() {
        let cells = [(0, 0), (2, 0), (0, 1), (2, 1), (0, 2), (1, 2), (2, 2)];
        let nav = solo_cells_mesh(&cells, 3, 3);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();

        let start_pos = [0.5, 0.0, 0.5];
        let end_pos = [2.5, 0.0, 0.5];
        let start = nearest(&query, start_pos);
        let end = nearest(&query, end_pos);

        let (path, status) = query
            .find_path(start, end, &start_pos, &end_pos, &filter, 64)
            .unwrap();
        assert!(status.is_success());
        assert!(!status.has_detail(Status::PARTIAL_RESULT));
        assert_eq!(path.len(), 7);
        assert_eq!(path[0], start);
        assert_eq!(path[6], end);
        assert!(query.is_in_closed_list(start));

        let (straight, status) = query
            .find_straight_path(&start_pos, &end_pos, &path, 16, StraightPathOptions::empty())
            .unwrap();
        assert!(status.is_success());
        assert_eq!(straight.len(), 4);
        assert_eq!(straight.flags[0], StraightPathFlags::START);
        assert_eq!(straight.flags[3], StraightPathFlags::END);
        assert_relative_eq!(straight.points[1][0], 1.0);
        assert_relative_eq!(straight.points[1][2], 2.0);
        assert_relative_eq!(straight.points[2][0], 2.0);
        assert_relative_eq!(straight.points[2][2], 2.0);
    }

    #[test]
    fn test_find_path_same_poly() {
        let nav = solo_grid_mesh(2, 2);
        let mut query = NavMeshQuery::new(&nav);
        let r = poly_ref(&nav, 0);
        let (path, status) = query
            .find_path(r, r, &[0.2, 0.0, 0.2], &[0.8, 0.0, 0.8], &QueryFilter::default(), 8)
            .unwrap();
        assert_eq!(path, vec![r]);
        assert_eq!(status, Status::SUCCESS);
    }

    #[test]
    fn test_find_path_partial_when_unreachable() {
        let nav = solo_cells_mesh(&[(0, 0), (2, 0)], 3, 1);
        let mut query = NavMeshQuery::new(&nav);
        let start = poly_ref(&nav, 0);
        let end = poly_ref(&nav, 1);

        let (path, status) = query
            .find_path(start, end, &[0.5, 0.0, 0.5], &[2.5, 0.0, 0.5], &QueryFilter::default(), 8)
            .unwrap();
        assert_eq!(path, vec![start]);
        assert!(status.is_success());
        assert!(status.has_detail(Status::PARTIAL_RESULT));
    }

    #[test]
    fn test_find_path_rejects_stale_ref() {
        let nav = solo_grid_mesh(2, 1);
        let mut query = NavMeshQuery::new(&nav);
        let start = poly_ref(&nav, 0);
        let err = query
            .find_path(
                start,
                PolyRef::new(start.id() + 50),
                &[0.5, 0.0, 0.5],
                &[1.5, 0.0, 0.5],
                &QueryFilter::default(),
                8,
            )
            .unwrap_err();
        assert!(err.is_failure());
        assert!(err.has_detail(Status::INVALID_PARAM));
    }

    #[test]
    fn test_find_path_truncates_to_buffer() {
        let nav = solo_grid_mesh(4, 1);
        let mut query = NavMeshQuery::new(&nav);
        let start = poly_ref(&nav, 0);
        let end = poly_ref(&nav, 3);
        let (path, status) = query
            .find_path(start, end, &[0.5, 0.0, 0.5], &[3.5, 0.0, 0.5], &QueryFilter::default(), 2)
            .unwrap();
        assert_eq!(path, vec![start, poly_ref(&nav, 1)]);
        assert!(status.has_detail(Status::BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_straight_path_crossings() {
        let nav = solo_grid_mesh(3, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start_pos = [0.5, 0.0, 0.5];
        let end_pos = [2.5, 0.0, 0.5];
        let (path, _) = query
            .find_path(poly_ref(&nav, 0), poly_ref(&nav, 2), &start_pos, &end_pos, &filter, 8)
            .unwrap();

        let (direct, _) = query
            .find_straight_path(&start_pos, &end_pos, &path, 8, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(direct.len(), 2);

        let (crossings, _) = query
            .find_straight_path(&start_pos, &end_pos, &path, 8, StraightPathOptions::ALL_CROSSINGS)
            .unwrap();
        assert_eq!(crossings.len(), 4);
        assert_relative_eq!(crossings.points[1][0], 1.0);
        assert_relative_eq!(crossings.points[2][0], 2.0);
        assert_eq!(crossings.refs[1], poly_ref(&nav, 1));

        // Every polygon has the same area, so no area crossing is added.
        let (areas, _) = query
            .find_straight_path(&start_pos, &end_pos, &path, 8, StraightPathOptions::AREA_CROSSINGS)
            .unwrap();
        assert_eq!(areas.len(), 2);

        let (short, status) = query
            .find_straight_path(&start_pos, &end_pos, &path, 1, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(short.len(), 1);
        assert!(status.has_detail(Status::BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_raycast() {
        let nav = solo_grid_mesh(3, 1);
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start = poly_ref(&nav, 0);

        let hit = query
            .raycast(start, &[0.5, 0.0, 0.5], &[5.0, 0.0, 0.5], &filter, RaycastOptions::empty(), PolyRef::NULL)
            .unwrap();
        assert!(!hit.reached_end());
        assert_relative_eq!(hit.t, 2.5 / 4.5, epsilon = 1e-5);
        assert_eq!(hit.path.len(), 3);
        assert_relative_eq!(hit.hit_normal[0], -1.0);
        assert_relative_eq!(hit.hit_normal[2], 0.0);

        let clear = query
            .raycast(start, &[0.5, 0.0, 0.5], &[2.5, 0.0, 0.5], &filter, RaycastOptions::USE_COSTS, PolyRef::NULL)
            .unwrap();
        assert!(clear.reached_end());
        assert_eq!(clear.path, vec![start, poly_ref(&nav, 1), poly_ref(&nav, 2)]);
        assert_relative_eq!(clear.path_cost, 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_move_along_surface_slides_on_wall() {
        let nav = solo_grid_mesh(3, 1);
        let mut query = NavMeshQuery::new(&nav);
        let (pos, visited) = query
            .move_along_surface(poly_ref(&nav, 0), &[0.5, 0.0, 0.5], &[5.0, 0.0, 0.5], &QueryFilter::default(), 8)
            .unwrap();
        assert_relative_eq!(pos[0], 3.0);
        assert_relative_eq!(pos[2], 0.5);
        assert_eq!(visited, vec![poly_ref(&nav, 0), poly_ref(&nav, 1), poly_ref(&nav, 2)]);

        let (pos, visited) = query
            .move_along_surface(poly_ref(&nav, 0), &[0.5, 0.0, 0.5], &[1.5, 0.0, 0.7], &QueryFilter::default(), 8)
            .unwrap();
        assert_eq!(pos, [1.5, 0.0, 0.7]);
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_find_distance_to_wall() {
        let nav = solo_grid_mesh(3, 3);
        let mut query = NavMeshQuery::new(&nav);
        let center = [1.5, 0.0, 1.2];
        let (dist, hit_pos, normal) = query
            .find_distance_to_wall(poly_ref(&nav, 4), &center, 5.0, &QueryFilter::default())
            .unwrap();
        assert_relative_eq!(dist, 1.2, epsilon = 1e-5);
        assert_relative_eq!(hit_pos[0], 1.5);
        assert_relative_eq!(hit_pos[2], 0.0);
        assert_relative_eq!(normal[2], 1.0);

        // Nothing within reach.
        let (dist, hit_pos, _) = query
            .find_distance_to_wall(poly_ref(&nav, 4), &center, 0.5, &QueryFilter::default())
            .unwrap();
        assert_relative_eq!(dist, 0.5);
        assert_eq!(hit_pos, center);
    }

    #[test]
    fn test_find_polys_around_circle() {
        let nav = solo_grid_mesh(3, 3);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let center = [1.5, 0.0, 1.5];
        let start = poly_ref(&nav, 4);

        let small = query.find_polys_around_circle(start, &center, 0.4, &filter).unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].reference, start);
        assert!(small[0].parent.is_null());

        let larger = query.find_polys_around_circle(start, &center, 0.6, &filter).unwrap();
        assert_eq!(larger.len(), 5);
        assert!(larger[1..].iter().all(|v| v.parent == start && v.cost > 0.0));
    }

    #[test]
    fn test_find_local_neighbourhood() {
        let nav = solo_grid_mesh(3, 3);
        let mut query = NavMeshQuery::new(&nav);
        let start = poly_ref(&nav, 4);
        let (polys, status) = query
            .find_local_neighbourhood(start, &[1.5, 0.0, 1.5], 0.6, &QueryFilter::default(), 16)
            .unwrap();
        assert!(status.is_success());
        assert_eq!(polys.len(), 5);
        assert_eq!(polys[0], (start, PolyRef::NULL));
    }

    #[test]
    fn test_wall_segments() {
        let nav = solo_grid_mesh(2, 1);
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let r = poly_ref(&nav, 0);

        let walls = query.get_poly_wall_segments(r, &filter, false).unwrap();
        assert_eq!(walls.len(), 3);
        assert!(walls.iter().all(|s| s.neighbour.is_null()));

        let all = query.get_poly_wall_segments(r, &filter, true).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.iter().filter(|s| s.neighbour == poly_ref(&nav, 1)).count(), 1);
    }

    #[test]
    fn test_wall_segments_across_tiles() {
        let nav = tiled_grid_mesh(2, 1);
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        // Cell (3, 0) of the first tile borders the second tile on +x.
        let r = poly_ref(&nav, 3);

        let walls = query.get_poly_wall_segments(r, &filter, false).unwrap();
        assert_eq!(walls.len(), 1);
        assert_relative_eq!(walls[0].start[2], 0.0);
        assert_relative_eq!(walls[0].end[2], 0.0);

        let all = query.get_poly_wall_segments(r, &filter, true).unwrap();
        let external = all
            .iter()
            .filter(|s| !s.neighbour.is_null() && nav.decode_poly_id(s.neighbour).1 != nav.decode_poly_id(r).1)
            .count();
        assert_eq!(external, 1);
    }

    #[test]
    fn test_path_across_tiles() {
        let nav = tiled_grid_mesh(2, 1);
        let mut query = NavMeshQuery::new(&nav);
        let start_pos = [0.5, 0.0, 0.5];
        let end_pos = [7.5, 0.0, 0.5];
        let points = query
            .compute_path(&start_pos, &end_pos, &QueryFilter::default())
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_relative_eq!(points[1][0], 7.5);
        assert_relative_eq!(points[1][2], 0.5);
    }

    #[test]
    fn test_compute_path_errors() {
        let nav = solo_grid_mesh(2, 2);
        let mut query = NavMeshQuery::new(&nav);
        let err = query
            .compute_path(&[50.0, 0.0, 50.0], &[1.0, 0.0, 1.0], &QueryFilter::default())
            .unwrap_err();
        assert_eq!(err, ComputePathError::NoStartNearestPoly);
        assert_eq!(err.to_string(), "no polygon near the start position");
    }

    #[test]
    fn test_random_points_are_on_mesh() {
        let nav = solo_grid_mesh(3, 3);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();

        for _ in 0..20 {
            let (r, pt) = query.find_random_point(&filter).unwrap();
            assert!(nav.is_valid_poly_ref(r));
            assert!((0.0..=3.0).contains(&pt[0]));
            assert!((0.0..=3.0).contains(&pt[2]));
            assert_relative_eq!(pt[1], 0.0);
        }

        let start = poly_ref(&nav, 4);
        for _ in 0..20 {
            let (r, pt) = query
                .find_random_point_around_circle(start, &[1.5, 0.0, 1.5], 0.4, &filter)
                .unwrap();
            // Only the start polygon is reachable inside the circle.
            assert_eq!(r, start);
            assert!((1.0..=2.0).contains(&pt[0]));
            assert!((1.0..=2.0).contains(&pt[2]));
        }
    }

    #[test]
    fn test_random_point_with_custom_source() {
        let nav = solo_grid_mesh(2, 1);
        let query = NavMeshQuery::new(&nav);
        // Constant draws let the last candidate win every pick.
        let (r, pt) = query
            .find_random_point_with(&QueryFilter::default(), &mut || 0.5)
            .unwrap();
        assert_eq!(r, poly_ref(&nav, 1));
        assert!((1.0..=2.0).contains(&pt[0]));
    }

    #[test]
    fn test_sliced_find_path_matches_find_path() {
        let cells = [(0, 0), (2, 0), (0, 1), (2, 1), (0, 2), (1, 2), (2, 2)];
        let nav = solo_cells_mesh(&cells, 3, 3);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start_pos = [0.5, 0.0, 0.5];
        let end_pos = [2.5, 0.0, 0.5];
        let start = nearest(&query, start_pos);
        let end = nearest(&query, end_pos);

        let (expected, _) = query
            .find_path(start, end, &start_pos, &end_pos, &filter, 64)
            .unwrap();

        let status = query
            .init_sliced_find_path(start, end, &start_pos, &end_pos, &filter)
            .unwrap();
        assert!(status.is_in_progress());

        let mut updates = 0;
        loop {
            let (status, iters) = query.update_sliced_find_path(1).unwrap();
            updates += 1;
            assert!(iters <= 1);
            if !status.is_in_progress() {
                break;
            }
            assert!(updates < 100);
        }
        assert!(updates > 1);

        let (path, status) = query.finalize_sliced_find_path(64).unwrap();
        assert!(status.is_success());
        assert_eq!(path, expected);
        assert!(query.sliced_status().is_none());
    }

    #[test]
    fn test_finalize_partial_uses_existing_path() {
        let nav = solo_grid_mesh(4, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let refs: Vec<PolyRef> = (0..4).map(|i| poly_ref(&nav, i)).collect();

        query
            .init_sliced_find_path(refs[0], refs[3], &[0.5, 0.0, 0.5], &[3.5, 0.0, 0.5], &filter)
            .unwrap();
        query.update_sliced_find_path(1).unwrap();

        // The search has only expanded the start, which is in `existing`.
        let (path, _) = query
            .finalize_sliced_find_path_partial(&[refs[0], refs[2]], 8)
            .unwrap();
        assert_eq!(path, vec![refs[0]]);
    }

    #[test]
    fn test_poly_height_and_validity() {
        let nav = solo_grid_mesh(2, 2);
        let query = NavMeshQuery::new(&nav);
        let r = poly_ref(&nav, 0);
        assert_relative_eq!(query.get_poly_height(r, &[0.5, 3.0, 0.5]).unwrap(), 0.0);
        assert!(query.get_poly_height(r, &[1.5, 0.0, 1.5]).is_err());

        let mut filter = QueryFilter::default();
        assert!(query.is_valid_poly_ref(r, &filter));
        filter.exclude_flags = crate::PolyFlags::WALK;
        assert!(!query.is_valid_poly_ref(r, &filter));
        assert!(!query.is_valid_poly_ref(PolyRef::NULL, &QueryFilter::default()));
    }

    #[test]
    fn test_helpers_use_query_extent() {
        let nav = solo_grid_mesh(3, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();

        let p = query.get_closest_point(&[3.5, 0.0, 0.5], &filter).unwrap();
        assert_relative_eq!(p[0], 3.0);
        assert_relative_eq!(p[2], 0.5);

        let moved = query.move_along(&[0.5, 0.0, 0.5], &[9.0, 0.0, 0.5], &filter).unwrap();
        assert_relative_eq!(moved[0], 3.0);

        // The smaller box no longer reaches the mesh.
        query.set_query_extent([0.1, 0.1, 0.1]);
        assert!(query.get_closest_point(&[3.5, 0.0, 0.5], &filter).is_err());
    }
}
