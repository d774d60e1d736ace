//! Spatial subdivision of input triangles
//!
//! Triangles are sorted into an AABB tree on the xz-plane whose leaves hold
//! at most `tris_per_chunk` triangles. Tiled builds use it to fetch only the
//! triangles touching one tile.

use recast_common::{Error, Result};

/// Default leaf size
pub const DEFAULT_TRIS_PER_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkyTriMeshNode {
    pub bmin: [f32; 2],
    pub bmax: [f32; 2],
    /// First triangle for leaves, negative escape offset for inner nodes
    pub i: i32,
    /// Triangle count of a leaf
    pub n: i32,
}

impl ChunkyTriMeshNode {
    pub fn is_leaf(&self) -> bool {
        self.i >= 0
    }
}

#[derive(Debug, Clone, Copy)]
struct BoundsItem {
    bmin: [f32; 2],
    bmax: [f32; 2],
    i: usize,
}

fn calc_extends(items: &[BoundsItem]) -> ([f32; 2], [f32; 2]) {
    let mut bmin = [f32::MAX; 2];
    let mut bmax = [f32::MIN; 2];
    for it in items {
        for k in 0..2 {
            bmin[k] = bmin[k].min(it.bmin[k]);
            bmax[k] = bmax[k].max(it.bmax[k]);
        }
    }
    (bmin, bmax)
}

#[inline]
fn longest_axis(x: f32, y: f32) -> usize {
    if y > x {
        1
    } else {
        0
    }
}

#[inline]
fn check_overlap_rect(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2]) -> bool {
    !(amin[0] > bmax[0] || amax[0] < bmin[0] || amin[1] > bmax[1] || amax[1] < bmin[1])
}

/// Slab test of segment p-q against a 2D box
fn check_overlap_segment(p: &[f32; 2], q: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2]) -> bool {
    const EPSILON: f32 = 1e-6;

    let mut tmin = 0.0f32;
    let mut tmax = 1.0f32;
    let d = [q[0] - p[0], q[1] - p[1]];

    for k in 0..2 {
        if d[k].abs() < EPSILON {
            // Ray is parallel to slab. No hit if origin not within slab
            if p[k] < bmin[k] || p[k] > bmax[k] {
                return false;
            }
        } else {
            // Compute intersection t value of ray with near and far plane of slab
            let ood = 1.0 / d[k];
            let mut t1 = (bmin[k] - p[k]) * ood;
            let mut t2 = (bmax[k] - p[k]) * ood;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            tmin = tmin.max(t1);
            tmax = tmax.min(t2);
            if tmin > tmax {
                return false;
            }
        }
    }
    true
}

/// AABB tree over triangle chunks
#[derive(Debug, Clone, Default)]
pub struct ChunkyTriMesh {
    pub nodes: Vec<ChunkyTriMeshNode>,
    /// Triangle indices reordered by leaf
    pub tris: Vec<i32>,
    pub max_tris_per_chunk: usize,
}

impl ChunkyTriMesh {
    /// Builds the tree over the triangles `tris` indexing `verts`.
    pub fn new(verts: &[f32], tris: &[i32], tris_per_chunk: usize) -> Result<Self> {
        if tris_per_chunk == 0 {
            return Err(Error::InvalidMesh("tris_per_chunk must be positive".to_string()));
        }
        let ntris = tris.len() / 3;
        let nverts = verts.len() / 3;

        let mut items = Vec::with_capacity(ntris);
        for (i, t) in tris.chunks_exact(3).enumerate() {
            let mut it = BoundsItem {
                bmin: [f32::MAX; 2],
                bmax: [f32::MIN; 2],
                i,
            };
            for &vi in t {
                let vi = usize::try_from(vi)
                    .ok()
                    .filter(|&v| v < nverts)
                    .ok_or_else(|| Error::InvalidMesh(format!("vertex index {} out of range", vi)))?;
                let (x, z) = (verts[vi * 3], verts[vi * 3 + 2]);
                it.bmin[0] = it.bmin[0].min(x);
                it.bmin[1] = it.bmin[1].min(z);
                it.bmax[0] = it.bmax[0].max(x);
                it.bmax[1] = it.bmax[1].max(z);
            }
            items.push(it);
        }

        let mut mesh = Self {
            nodes: Vec::with_capacity(ntris.div_ceil(tris_per_chunk) * 4),
            tris: Vec::with_capacity(ntris * 3),
            max_tris_per_chunk: 0,
        };
        if ntris > 0 {
            mesh.subdivide(&mut items, tris_per_chunk, tris);
        }

        mesh.max_tris_per_chunk = mesh
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.n as usize)
            .max()
            .unwrap_or(0);

        log::debug!(
            "chunky tri mesh: {} triangles in {} nodes",
            ntris,
            mesh.nodes.len()
        );
        Ok(mesh)
    }

    fn subdivide(&mut self, items: &mut [BoundsItem], tris_per_chunk: usize, in_tris: &[i32]) {
        let icur = self.nodes.len();
        let (bmin, bmax) = calc_extends(items);
        self.nodes.push(ChunkyTriMeshNode {
            bmin,
            bmax,
            i: 0,
            n: 0,
        });

        if items.len() <= tris_per_chunk {
            // Leaf
            let node = &mut self.nodes[icur];
            node.i = (self.tris.len() / 3) as i32;
            node.n = items.len() as i32;
            for it in items.iter() {
                self.tris.extend_from_slice(&in_tris[it.i * 3..it.i * 3 + 3]);
            }
        } else {
            // Split
            let axis = longest_axis(bmax[0] - bmin[0], bmax[1] - bmin[1]);
            items.sort_by(|a, b| a.bmin[axis].total_cmp(&b.bmin[axis]));

            let isplit = items.len() / 2;
            let (left, right) = items.split_at_mut(isplit);
            self.subdivide(left, tris_per_chunk, in_tris);
            self.subdivide(right, tris_per_chunk, in_tris);

            let iescape = (self.nodes.len() - icur) as i32;
            // Negative index means escape.
            self.nodes[icur].i = -iescape;
        }
    }

    /// Walks the tree, collecting the leaves accepted by `overlaps`
    fn collect_leaves(&self, overlaps: impl Fn(&ChunkyTriMeshNode) -> bool) -> Vec<usize> {
        let mut ids = Vec::new();
        let mut i = 0;
        while i < self.nodes.len() {
            let node = &self.nodes[i];
            let overlap = overlaps(node);
            let is_leaf = node.is_leaf();

            if is_leaf && overlap {
                ids.push(i);
            }

            if overlap || is_leaf {
                i += 1;
            } else {
                i += (-node.i) as usize;
            }
        }
        ids
    }

    /// Leaf nodes whose bounds overlap the xz rectangle `bmin..bmax`
    pub fn chunks_overlapping_rect(&self, bmin: [f32; 2], bmax: [f32; 2]) -> Vec<usize> {
        self.collect_leaves(|n| check_overlap_rect(&bmin, &bmax, &n.bmin, &n.bmax))
    }

    /// Leaf nodes whose bounds are crossed by the xz segment p-q
    pub fn chunks_overlapping_segment(&self, p: [f32; 2], q: [f32; 2]) -> Vec<usize> {
        self.collect_leaves(|n| check_overlap_segment(&p, &q, &n.bmin, &n.bmax))
    }

    /// Triangle indices of leaf `node`, three per triangle
    pub fn node_tris(&self, node: usize) -> &[i32] {
        let n = &self.nodes[node];
        if !n.is_leaf() {
            return &[];
        }
        let start = n.i as usize * 3;
        &self.tris[start..start + n.n as usize * 3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A strip of `n` unit quads along x, two triangles each
    fn strip(n: usize) -> (Vec<f32>, Vec<i32>) {
        let mut verts = Vec::new();
        for i in 0..=n {
            verts.extend_from_slice(&[i as f32, 0.0, 0.0, i as f32, 0.0, 1.0]);
        }
        let mut tris = Vec::new();
        for i in 0..n as i32 {
            let a = i * 2;
            tris.extend_from_slice(&[a, a + 1, a + 3, a, a + 3, a + 2]);
        }
        (verts, tris)
    }

    #[test]
    fn test_every_triangle_lands_in_one_leaf() {
        let (verts, tris) = strip(100);
        let mesh = ChunkyTriMesh::new(&verts, &tris, 16).unwrap();

        assert!(mesh.max_tris_per_chunk <= 16);
        let total: i32 = mesh.nodes.iter().filter(|n| n.is_leaf()).map(|n| n.n).sum();
        assert_eq!(total, 200);
        assert_eq!(mesh.tris.len(), tris.len());
    }

    #[test]
    fn test_rect_query_returns_local_chunks() {
        let (verts, tris) = strip(100);
        let mesh = ChunkyTriMesh::new(&verts, &tris, 16).unwrap();

        let all = mesh.chunks_overlapping_rect([-1.0, -1.0], [101.0, 2.0]);
        let local = mesh.chunks_overlapping_rect([10.2, 0.0], [10.8, 1.0]);
        assert!(!local.is_empty());
        assert!(local.len() < all.len());

        // The triangles of quad 10 are in the returned chunks.
        let found = local.iter().flat_map(|&id| mesh.node_tris(id).chunks(3)).any(|t| {
            t.iter().all(|&v| {
                let x = verts[v as usize * 3];
                (10.0..=11.0).contains(&x)
            })
        });
        assert!(found);

        assert!(mesh.chunks_overlapping_rect([200.0, 0.0], [201.0, 1.0]).is_empty());
    }

    #[test]
    fn test_segment_query() {
        let (verts, tris) = strip(64);
        let mesh = ChunkyTriMesh::new(&verts, &tris, 8).unwrap();
        assert!(!mesh.chunks_overlapping_segment([5.5, -1.0], [5.5, 2.0]).is_empty());
        assert!(mesh.chunks_overlapping_segment([-5.0, 5.0], [70.0, 5.0]).is_empty());
    }

    #[test]
    fn test_invalid_input() {
        assert!(ChunkyTriMesh::new(&[0.0; 9], &[0, 1, 5], 4).is_err());
        assert!(ChunkyTriMesh::new(&[0.0; 9], &[0, 1, 2], 0).is_err());
        let empty = ChunkyTriMesh::new(&[], &[], 4).unwrap();
        assert!(empty.nodes.is_empty());
    }
}
