//! Dynamic polygon corridor for path following
//!
//! A corridor is the polygon path from the agent's current position to its
//! target. The ends of the corridor are adjusted locally as the agent or
//! the target moves, so a full replan is only needed when the corridor is
//! invalidated by navmesh changes.

use detour::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, StraightPath, StraightPathFlags, StraightPathOptions};
use recast_common::{sqr, vdist_2d, vdist_2d_sqr, vmad, vsub};

const MIN_TARGET_DIST: f32 = 0.01;
const MAX_VISITED: usize = 16;
const MAX_RES: usize = 32;
const MAX_ITER: usize = 32;

/// Steering corner returned by [`PathCorridor::find_corners`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub pos: [f32; 3],
    pub flags: StraightPathFlags,
    /// Polygon entered at the corner
    pub poly: PolyRef,
}

/// Replaces the start of `path` with the polygons visited while moving,
/// keeping everything past the furthest polygon both share.
pub fn merge_corridor_start_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((fp, fv)) = furthest_common_from_end(path, visited) else {
        return;
    };

    let mut merged: Vec<PolyRef> = visited[fv..].iter().rev().copied().collect();
    merged.extend_from_slice(&path[fp + 1..]);
    merged.truncate(max_path);
    *path = merged;
}

/// Replaces the end of `path` with the polygons visited while moving the
/// target.
pub fn merge_corridor_end_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let found = path
        .iter()
        .enumerate()
        .find_map(|(i, r)| visited.iter().position(|v| v == r).map(|j| (i, j)));
    let Some((fp, fv)) = found else {
        return;
    };

    path.truncate(fp + 1);
    let count = (visited.len() - (fv + 1)).min(max_path.saturating_sub(fp + 1));
    path.extend_from_slice(&visited[fv + 1..fv + 1 + count]);
}

/// Replaces the start of `path` with a shortcut `visited` that rejoins it.
pub fn merge_corridor_start_shortcut(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((fp, fv)) = furthest_common_from_end(path, visited) else {
        return;
    };
    if fv == 0 {
        return;
    }

    let mut merged = visited[..fv].to_vec();
    merged.extend_from_slice(&path[fp..]);
    merged.truncate(max_path);
    *path = merged;
}

/// Last polygon of `path` that also appears in `visited`, paired with its
/// first index in `visited`
fn furthest_common_from_end(path: &[PolyRef], visited: &[PolyRef]) -> Option<(usize, usize)> {
    path.iter()
        .enumerate()
        .rev()
        .find_map(|(i, r)| visited.iter().position(|v| v == r).map(|j| (i, j)))
}

#[derive(Debug, Clone)]
pub struct PathCorridor {
    pos: [f32; 3],
    target: [f32; 3],
    path: Vec<PolyRef>,
    max_path: usize,
}

impl PathCorridor {
    pub fn new(max_path: usize) -> Self {
        Self {
            pos: [0.0; 3],
            target: [0.0; 3],
            path: Vec::with_capacity(max_path),
            max_path: max_path.max(1),
        }
    }

    /// Collapses the corridor to the single polygon `r` at `pos`
    pub fn reset(&mut self, r: PolyRef, pos: &[f32; 3]) {
        self.pos = *pos;
        self.target = *pos;
        self.path.clear();
        self.path.push(r);
    }

    /// Loads a new path. The first polygon must contain the current position.
    pub fn set_corridor(&mut self, target: &[f32; 3], path: &[PolyRef]) {
        self.target = *target;
        self.path.clear();
        self.path.extend_from_slice(&path[..path.len().min(self.max_path)]);
    }

    /// Up to `max_corners` steering corners from the current position.
    ///
    /// Corners closer than a small threshold are skipped and the list stops
    /// at the first off-mesh connection.
    pub fn find_corners(&self, max_corners: usize, navquery: &NavMeshQuery) -> Vec<Corner> {
        if self.path.is_empty() {
            return Vec::new();
        }

        let straight = match navquery.find_straight_path(
            &self.pos,
            &self.target,
            &self.path,
            max_corners,
            StraightPathOptions::empty(),
        ) {
            Ok((straight, _)) => straight,
            Err(_) => StraightPath::default(),
        };

        let mut corners: Vec<Corner> = straight
            .points
            .iter()
            .zip(&straight.flags)
            .zip(&straight.refs)
            .map(|((&pos, &flags), &poly)| Corner { pos, flags, poly })
            .collect();

        let skip = corners
            .iter()
            .take_while(|c| {
                !c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
                    && vdist_2d_sqr(&c.pos, &self.pos) <= sqr(MIN_TARGET_DIST)
            })
            .count();
        corners.drain(..skip);

        if let Some(i) = corners
            .iter()
            .position(|c| c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION))
        {
            corners.truncate(i + 1);
        }
        corners
    }

    /// Shortcuts the start of the corridor when `next` is visible from the
    /// current position.
    ///
    /// The ray is cast at most `path_optimization_range` ahead.
    pub fn optimize_path_visibility(
        &mut self,
        next: &[f32; 3],
        path_optimization_range: f32,
        navquery: &NavMeshQuery,
        filter: &QueryFilter,
    ) {
        let Some(&first) = self.path.first() else {
            return;
        };

        let dist = vdist_2d(&self.pos, next);
        if dist < 0.01 {
            return;
        }

        // Overshoot a little, helps on open fields of tiled meshes.
        let dist = (dist + 0.01).min(path_optimization_range);
        let delta = vsub(next, &self.pos);
        let goal = vmad(&self.pos, &delta, path_optimization_range / dist);

        let Ok(hit) = navquery.raycast(first, &self.pos, &goal, filter, Default::default(), PolyRef::NULL) else {
            return;
        };
        if hit.path.len() > 1 && hit.t > 0.99 {
            let res = &hit.path[..hit.path.len().min(MAX_RES)];
            merge_corridor_start_shortcut(&mut self.path, self.max_path, res);
        }
    }

    /// Replans the start of the corridor with a short, iteration limited
    /// search. Returns true when the corridor changed.
    pub fn optimize_path_topology(&mut self, navquery: &mut NavMeshQuery, filter: &QueryFilter) -> bool {
        if self.path.len() < 3 {
            return false;
        }
        let (Some(&first), Some(&last)) = (self.path.first(), self.path.last()) else {
            return false;
        };

        if navquery
            .init_sliced_find_path(first, last, &self.pos, &self.target, filter)
            .is_err()
        {
            return false;
        }
        // A search that runs out of iterations still yields a partial path.
        let _ = navquery.update_sliced_find_path(MAX_ITER);

        match navquery.finalize_sliced_find_path_partial(&self.path, MAX_RES) {
            Ok((res, status)) if status.is_success() && !res.is_empty() => {
                merge_corridor_start_shortcut(&mut self.path, self.max_path, &res);
                true
            }
            _ => false,
        }
    }

    /// Advances the corridor past the off-mesh connection `off_mesh_ref`.
    ///
    /// Returns the polygon before the connection, the connection and its
    /// travel endpoints. The position is moved to the far endpoint.
    pub fn move_over_off_mesh_connection(
        &mut self,
        off_mesh_ref: PolyRef,
        nav: &NavMesh,
    ) -> Option<([PolyRef; 2], [f32; 3], [f32; 3])> {
        let i = self.path.iter().position(|&r| r == off_mesh_ref)?;
        let prev_ref = if i > 0 { self.path[i - 1] } else { PolyRef::NULL };

        self.path.drain(..=i);

        let (start, end) = nav
            .get_off_mesh_connection_poly_end_points(prev_ref, off_mesh_ref)
            .ok()?;
        self.pos = end;
        Some(([prev_ref, off_mesh_ref], start, end))
    }

    /// Resets the start of the corridor to a known good polygon
    pub fn fix_path_start(&mut self, safe_ref: PolyRef, safe_pos: &[f32; 3]) {
        self.pos = *safe_pos;
        match self.path.len() {
            0 => self.path.push(safe_ref),
            1 | 2 => {
                let last = self.path[self.path.len() - 1];
                self.path.clear();
                self.path.extend_from_slice(&[safe_ref, PolyRef::NULL, last]);
            }
            _ => {
                self.path[0] = safe_ref;
                self.path[1] = PolyRef::NULL;
            }
        }
    }

    /// Cuts the corridor at the first polygon that no longer passes the
    /// filter and clamps the target to the remaining path
    pub fn trim_invalid_path(
        &mut self,
        safe_ref: PolyRef,
        safe_pos: &[f32; 3],
        navquery: &NavMeshQuery,
        filter: &QueryFilter,
    ) {
        let n = self
            .path
            .iter()
            .take_while(|&&r| navquery.is_valid_poly_ref(r, filter))
            .count();

        if n == self.path.len() {
            return;
        }
        if n == 0 {
            self.pos = *safe_pos;
            self.path.clear();
            self.path.push(safe_ref);
        } else {
            self.path.truncate(n);
        }

        if let Ok(target) = navquery.closest_point_on_poly_boundary(self.last_poly(), &self.target) {
            self.target = target;
        }
    }

    /// True when the first `max_look_ahead` polygons still pass the filter
    pub fn is_valid(&self, max_look_ahead: usize, navquery: &NavMeshQuery, filter: &QueryFilter) -> bool {
        self.path
            .iter()
            .take(max_look_ahead)
            .all(|&r| navquery.is_valid_poly_ref(r, filter))
    }

    /// Moves the position along the surface towards `npos`, collapsing
    /// the corridor start onto the polygons crossed
    pub fn move_position(&mut self, npos: &[f32; 3], navquery: &mut NavMeshQuery, filter: &QueryFilter) -> bool {
        let Some(&first) = self.path.first() else {
            return false;
        };
        let Ok((mut result, visited)) = navquery.move_along_surface(first, &self.pos, npos, filter, MAX_VISITED)
        else {
            return false;
        };

        merge_corridor_start_moved(&mut self.path, self.max_path, &visited);

        // Stay on top of the navmesh.
        result[1] = navquery.get_poly_height(self.first_poly(), &result).unwrap_or(self.pos[1]);
        self.pos = result;
        true
    }

    /// Moves the target along the surface towards `npos`, extending or
    /// shrinking the corridor end
    pub fn move_target_position(&mut self, npos: &[f32; 3], navquery: &mut NavMeshQuery, filter: &QueryFilter) -> bool {
        let Some(&last) = self.path.last() else {
            return false;
        };
        let Ok((result, visited)) = navquery.move_along_surface(last, &self.target, npos, filter, MAX_VISITED) else {
            return false;
        };

        merge_corridor_end_moved(&mut self.path, self.max_path, &visited);
        self.target = result;
        true
    }

    pub fn pos(&self) -> &[f32; 3] {
        &self.pos
    }

    pub fn target(&self) -> &[f32; 3] {
        &self.target
    }

    pub fn first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn path(&self) -> &[PolyRef] {
        &self.path
    }

    pub fn path_count(&self) -> usize {
        self.path.len()
    }

    pub fn max_path(&self) -> usize {
        self.max_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_nav_helpers::{l_corridor_mesh, open_mesh};
    use approx::assert_relative_eq;
    use detour::PolyFlags;

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&i| PolyRef::new(i)).collect()
    }

    fn nearest(query: &NavMeshQuery, pos: &[f32; 3]) -> PolyRef {
        query
            .find_nearest_poly(pos, &[0.5, 1.0, 0.5], &QueryFilter::default())
            .unwrap()
            .unwrap()
            .reference
    }

    fn corridor_to(query: &mut NavMeshQuery, start: &[f32; 3], end: &[f32; 3]) -> PathCorridor {
        let filter = QueryFilter::default();
        let s = nearest(query, start);
        let e = nearest(query, end);
        let (path, _) = query.find_path(s, e, start, end, &filter, 256).unwrap();

        let mut corridor = PathCorridor::new(256);
        corridor.reset(s, start);
        corridor.set_corridor(end, &path);
        corridor
    }

    #[test]
    fn test_merge_start_moved() {
        let mut path = refs(&[1, 2, 3, 4, 5]);
        // Moved from 1 through 6 into 3.
        merge_corridor_start_moved(&mut path, 256, &refs(&[1, 6, 3]));
        assert_eq!(path, refs(&[3, 4, 5]));

        // Stepping off the corridor keeps the polygons walked through.
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[1, 8]));
        assert_eq!(path, refs(&[8, 1, 2, 3]));
        let mut path = refs(&[2, 3]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[2, 1]));
        assert_eq!(path, refs(&[1, 2, 3]));

        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[7, 8]));
        assert_eq!(path, refs(&[1, 2, 3]));
    }

    #[test]
    fn test_merge_end_moved() {
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 256, &refs(&[3, 4, 5]));
        assert_eq!(path, refs(&[1, 2, 3, 4, 5]));

        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 4, &refs(&[2, 8, 9]));
        assert_eq!(path, refs(&[1, 2, 8, 9]));

        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 3, &refs(&[3, 4, 5]));
        assert_eq!(path, refs(&[1, 2, 3]));
    }

    #[test]
    fn test_merge_start_shortcut() {
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_start_shortcut(&mut path, 256, &refs(&[1, 9, 4]));
        assert_eq!(path, refs(&[1, 9, 4, 5]));

        // A shortcut starting at the rejoin point changes nothing.
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_shortcut(&mut path, 256, &refs(&[3, 7]));
        assert_eq!(path, refs(&[1, 2, 3]));
    }

    #[test]
    fn test_reset_and_set_corridor() {
        let mut corridor = PathCorridor::new(3);
        corridor.reset(PolyRef::new(5), &[1.0, 2.0, 3.0]);
        assert_eq!(corridor.path(), &refs(&[5])[..]);
        assert_eq!(corridor.pos(), corridor.target());

        corridor.set_corridor(&[4.0, 0.0, 4.0], &refs(&[5, 6, 7, 8]));
        assert_eq!(corridor.path_count(), 3);
        assert_eq!(corridor.first_poly(), PolyRef::new(5));
        assert_eq!(corridor.last_poly(), PolyRef::new(7));
        assert_eq!(corridor.target(), &[4.0, 0.0, 4.0]);
    }

    #[test]
    fn test_corners_turn_at_inner_corner() {
        let nav = l_corridor_mesh(8, 1);
        let mut query = NavMeshQuery::new(&nav);
        let start = [0.5, 0.0, 6.5];
        let end = [6.5, 0.0, 0.5];
        let corridor = corridor_to(&mut query, &start, &end);

        let corners = corridor.find_corners(4, &query);
        assert_eq!(corners.len(), 2);
        assert_relative_eq!(corners[0].pos[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(corners[0].pos[2], 1.0, epsilon = 1e-3);
        assert!(corners[1].flags.contains(StraightPathFlags::END));
        assert_relative_eq!(corners[1].pos[0], end[0], epsilon = 1e-3);

        // The start corner is pruned, the first corner is never the position.
        assert!(vdist_2d(&corners[0].pos, &start) > MIN_TARGET_DIST);
    }

    #[test]
    fn test_move_position_follows_surface() {
        let nav = l_corridor_mesh(8, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start = [0.5, 0.0, 6.5];
        let end = [6.5, 0.0, 0.5];
        let mut corridor = corridor_to(&mut query, &start, &end);
        let before = corridor.path_count();

        // Two cells down the column.
        assert!(corridor.move_position(&[0.5, 0.0, 4.5], &mut query, &filter));
        assert_relative_eq!(corridor.pos()[2], 4.5, epsilon = 1e-4);
        assert_eq!(corridor.path_count(), before - 2);
        assert_eq!(corridor.first_poly(), nearest(&query, &[0.5, 0.0, 4.5]));

        // Moving into the wall slides along it and stays in the corridor.
        assert!(corridor.move_position(&[3.0, 0.0, 4.5], &mut query, &filter));
        assert!(corridor.pos()[0] <= 1.0 + 1e-4);
    }

    #[test]
    fn test_move_target_position_extends_corridor() {
        let nav = open_mesh(6, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start = [0.5, 0.0, 0.5];
        let mut corridor = corridor_to(&mut query, &start, &[2.5, 0.0, 0.5]);
        assert_eq!(corridor.path_count(), 3);

        assert!(corridor.move_target_position(&[4.5, 0.0, 0.5], &mut query, &filter));
        assert_eq!(corridor.path_count(), 5);
        assert_relative_eq!(corridor.target()[0], 4.5, epsilon = 1e-4);
        assert_eq!(corridor.last_poly(), nearest(&query, &[4.5, 0.0, 0.5]));
    }

    #[test]
    fn test_visibility_shortcut() {
        let nav = open_mesh(6, 6);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start = [0.5, 0.0, 0.5];
        let end = [2.5, 0.0, 5.5];
        let mut corridor = corridor_to(&mut query, &start, &end);

        // Replace the search path with a detour along the border.
        let cell = |x: usize, z: usize| nearest(&query, &[x as f32 + 0.5, 0.0, z as f32 + 0.5]);
        let mut detour: Vec<PolyRef> = (0..6).map(|x| cell(x, 0)).collect();
        detour.extend((1..6).map(|z| cell(5, z)));
        detour.extend((2..5).rev().map(|x| cell(x, 5)));
        corridor.set_corridor(&end, &detour);
        assert_eq!(corridor.path_count(), 14);

        corridor.optimize_path_visibility(&end, 5.0, &query, &filter);
        assert_eq!(corridor.path_count(), 8);
        assert_eq!(corridor.first_poly(), detour[0]);
        assert_eq!(corridor.last_poly(), *detour.last().unwrap());
    }

    #[test]
    fn test_topology_optimization_needs_three_polys() {
        let nav = open_mesh(4, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let mut corridor = corridor_to(&mut query, &[0.5, 0.0, 0.5], &[1.5, 0.0, 0.5]);
        assert!(!corridor.optimize_path_topology(&mut query, &filter));

        let mut corridor = corridor_to(&mut query, &[0.5, 0.0, 0.5], &[3.5, 0.0, 0.5]);
        assert!(corridor.optimize_path_topology(&mut query, &filter));
        assert_eq!(corridor.path_count(), 4);
    }

    #[test]
    fn test_trim_invalid_path_and_validity() {
        let mut nav = open_mesh(5, 1);
        let (start, end) = ([0.5, 0.0, 0.5], [4.5, 0.0, 0.5]);
        let (mut corridor, blocked) = {
            let mut query = NavMeshQuery::new(&nav);
            let corridor = corridor_to(&mut query, &start, &end);
            let blocked = nearest(&query, &[2.5, 0.0, 0.5]);
            (corridor, blocked)
        };
        nav.set_poly_flags(blocked, PolyFlags::empty()).unwrap();

        let filter = QueryFilter::default();
        let query = NavMeshQuery::new(&nav);
        assert!(corridor.is_valid(2, &query, &filter));
        assert!(!corridor.is_valid(5, &query, &filter));

        let safe = corridor.first_poly();
        corridor.trim_invalid_path(safe, &start, &query, &filter);
        assert_eq!(corridor.path_count(), 2);
        assert!(corridor.is_valid(5, &query, &filter));
        // The target is pulled back onto the remaining corridor.
        assert_relative_eq!(corridor.target()[0], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_fix_path_start() {
        let mut corridor = PathCorridor::new(16);
        corridor.set_corridor(&[0.0; 3], &refs(&[4, 5]));
        corridor.fix_path_start(PolyRef::new(9), &[1.0, 0.0, 1.0]);
        assert_eq!(corridor.path(), &refs(&[9, 0, 5])[..]);
        assert_eq!(corridor.pos(), &[1.0, 0.0, 1.0]);

        corridor.set_corridor(&[0.0; 3], &refs(&[4, 5, 6, 7]));
        corridor.fix_path_start(PolyRef::new(9), &[1.0, 0.0, 1.0]);
        assert_eq!(corridor.path(), &refs(&[9, 0, 6, 7])[..]);
    }

    #[test]
    fn test_move_over_missing_connection() {
        let nav = open_mesh(2, 1);
        let mut corridor = PathCorridor::new(16);
        corridor.set_corridor(&[0.0; 3], &refs(&[4, 5]));
        assert!(corridor.move_over_off_mesh_connection(PolyRef::new(77), &nav).is_none());
        assert_eq!(corridor.path_count(), 2);
    }
}
