//! Wall segments around an agent
//!
//! The boundary caches the closest navmesh walls within the collision
//! query range so obstacle avoidance does not have to search the mesh every
//! tick. It is refreshed when the agent has moved far enough from the
//! position it was collected at, or when its polygons became invalid.

use detour::{NavMeshQuery, PolyRef, QueryFilter, Result};
use recast_common::{dist_pt_seg_sqr_2d, sqr};

const MAX_LOCAL_SEGS: usize = 8;
const MAX_LOCAL_POLYS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: [f32; 3],
    end: [f32; 3],
    /// Squared distance to the center, for sorting
    d: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LocalBoundary {
    center: [f32; 3],
    segs: Vec<Segment>,
    polys: Vec<PolyRef>,
}

impl LocalBoundary {
    pub fn new() -> Self {
        Self {
            center: [f32::MAX; 3],
            segs: Vec::with_capacity(MAX_LOCAL_SEGS),
            polys: Vec::with_capacity(MAX_LOCAL_POLYS),
        }
    }

    pub fn reset(&mut self) {
        self.center = [f32::MAX; 3];
        self.segs.clear();
        self.polys.clear();
    }

    /// Inserts a segment keeping the list sorted by distance and capped
    fn add_segment(&mut self, d: f32, start: [f32; 3], end: [f32; 3]) {
        let at = self.segs.iter().position(|s| d <= s.d).unwrap_or(self.segs.len());
        if at >= MAX_LOCAL_SEGS {
            return;
        }
        self.segs.insert(at, Segment { start, end, d });
        self.segs.truncate(MAX_LOCAL_SEGS);
    }

    /// Collects the walls within `collision_query_range` of `pos`
    pub fn update(
        &mut self,
        reference: PolyRef,
        pos: &[f32; 3],
        collision_query_range: f32,
        navquery: &mut NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        if reference.is_null() {
            self.reset();
            return Ok(());
        }

        self.center = *pos;
        self.segs.clear();

        let (neighbourhood, _) =
            navquery.find_local_neighbourhood(reference, pos, collision_query_range, filter, MAX_LOCAL_POLYS)?;
        let polys: Vec<PolyRef> = neighbourhood.into_iter().map(|(r, _)| r).collect();

        let range_sqr = sqr(collision_query_range);
        for &r in &polys {
            for seg in navquery.get_poly_wall_segments(r, filter, false)? {
                let (d, _) = dist_pt_seg_sqr_2d(pos, &seg.start, &seg.end);
                if d > range_sqr {
                    continue;
                }
                self.add_segment(d, seg.start, seg.end);
            }
        }
        self.polys = polys;
        Ok(())
    }

    /// True while every polygon the walls came from still exists and passes
    /// the filter
    pub fn is_valid(&self, navquery: &NavMeshQuery, filter: &QueryFilter) -> bool {
        !self.polys.is_empty() && self.polys.iter().all(|&r| navquery.is_valid_poly_ref(r, filter))
    }

    pub fn get_center(&self) -> &[f32; 3] {
        &self.center
    }

    pub fn get_segment_count(&self) -> usize {
        self.segs.len()
    }

    /// Segment `i` as `(start, end)`, closest first
    pub fn get_segment(&self, i: usize) -> Option<([f32; 3], [f32; 3])> {
        self.segs.get(i).map(|s| (s.start, s.end))
    }

    pub fn segments(&self) -> impl Iterator<Item = ([f32; 3], [f32; 3])> + '_ {
        self.segs.iter().map(|s| (s.start, s.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_nav_helpers::{l_corridor_mesh, open_mesh};

    fn nearest(query: &NavMeshQuery, pos: &[f32; 3]) -> PolyRef {
        query
            .find_nearest_poly(pos, &[0.5, 1.0, 0.5], &QueryFilter::default())
            .unwrap()
            .unwrap()
            .reference
    }

    #[test]
    fn test_collects_close_walls_sorted() {
        let nav = open_mesh(6, 6);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let pos = [0.6, 0.0, 3.0];
        let r = nearest(&query, &pos);

        let mut boundary = LocalBoundary::new();
        boundary.update(r, &pos, 1.5, &mut query, &filter).unwrap();
        assert_eq!(boundary.get_center(), &pos);
        assert!(boundary.get_segment_count() > 0);

        // The -x border wall is closest.
        let (start, end) = boundary.get_segment(0).unwrap();
        assert_eq!(start[0], 0.0);
        assert_eq!(end[0], 0.0);

        let dists: Vec<f32> = boundary
            .segments()
            .map(|(s, e)| dist_pt_seg_sqr_2d(&pos, &s, &e).0)
            .collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
        assert!(dists.iter().all(|&d| d <= 1.5 * 1.5));
        assert!(boundary.is_valid(&query, &filter));
    }

    #[test]
    fn test_no_walls_in_open_space() {
        let nav = open_mesh(10, 10);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let pos = [5.0, 0.0, 5.0];
        let r = nearest(&query, &pos);

        let mut boundary = LocalBoundary::new();
        boundary.update(r, &pos, 1.0, &mut query, &filter).unwrap();
        assert_eq!(boundary.get_segment_count(), 0);
    }

    #[test]
    fn test_segment_cap_and_reset() {
        let nav = l_corridor_mesh(8, 1);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let pos = [0.5, 0.0, 0.5];
        let r = nearest(&query, &pos);

        let mut boundary = LocalBoundary::new();
        boundary.update(r, &pos, 6.0, &mut query, &filter).unwrap();
        assert_eq!(boundary.get_segment_count(), MAX_LOCAL_SEGS);

        boundary.reset();
        assert_eq!(boundary.get_segment_count(), 0);
        assert!(!boundary.is_valid(&query, &filter));

        boundary.update(PolyRef::NULL, &pos, 6.0, &mut query, &filter).unwrap();
        assert_eq!(boundary.get_segment_count(), 0);
    }
}
