//! Polygon mesh generation for Recast
//!
//! Contours are triangulated, the triangles greedily merged into convex
//! polygons and the shared vertices welded. Tile border vertices are removed
//! again and the mesh gets per edge adjacency.

use glam::Vec3;

use recast_common::{Error, Result};

use crate::contour::{intersect, intersect_prop, left, left_on, vequal, ContourSet, ContourVertex};
use crate::{RC_MESH_NULL_IDX, RC_MULTIPLE_REGS};

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Edge marker bit used by the triangulator for removable vertices
const CAN_REMOVE: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// Flag marking an adjacency entry as a tile border portal
pub const RC_PORTAL_FLAG: u16 = 0x8000;

/// Convex polygon mesh with per edge adjacency
///
/// `polys` stores `nvp` vertex indices followed by `nvp` neighbour entries
/// per polygon. Unused slots hold [`RC_MESH_NULL_IDX`]. Neighbour entries
/// with [`RC_PORTAL_FLAG`] set mark an edge on the tile border, the low bits
/// hold the side (0: -x, 1: +z, 2: +x, 3: -z).
#[derive(Debug, Clone, Default)]
pub struct PolyMesh {
    /// Voxel quantized vertices, `[x, y, z]` per vertex
    pub verts: Vec<u16>,
    pub polys: Vec<u16>,
    /// Region id per polygon
    pub regs: Vec<u16>,
    /// User flags per polygon
    pub flags: Vec<u16>,
    /// Area id per polygon
    pub areas: Vec<u8>,
    pub nverts: usize,
    pub npolys: usize,
    /// Max vertices per polygon
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Builds a polygon mesh from a contour set
    pub fn build_from_contour_set(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if !(3..=crate::RC_VERTS_PER_POLYGON_MAX).contains(&nvp) {
            return Err(Error::NavMeshGeneration(format!(
                "invalid vertices per polygon {}",
                nvp
            )));
        }

        let mut mesh = Self {
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
            ..Default::default()
        };

        let mut max_vertices = 0usize;
        let mut max_tris = 0usize;
        let mut max_verts_per_cont = 0usize;
        for cont in &cset.contours {
            // Skip null contours.
            if cont.vertices.len() < 3 {
                continue;
            }
            max_vertices += cont.vertices.len();
            max_tris += cont.vertices.len() - 2;
            max_verts_per_cont = max_verts_per_cont.max(cont.vertices.len());
        }

        if max_vertices >= 0xfffe {
            return Err(Error::NavMeshGeneration(format!(
                "too many vertices {}",
                max_vertices
            )));
        }

        let mut vflags = vec![false; max_vertices];
        mesh.verts.reserve(max_vertices * 3);

        let mut first_vert = vec![None; VERTEX_BUCKET_COUNT];
        let mut next_vert: Vec<Option<usize>> = vec![None; max_vertices];

        let mut indices: Vec<u32> = Vec::with_capacity(max_verts_per_cont);
        let mut tris: Vec<u32> = Vec::with_capacity(max_verts_per_cont * 3);
        let mut polys: Vec<u16> = Vec::with_capacity(max_verts_per_cont * nvp);

        for (ci, cont) in cset.contours.iter().enumerate() {
            if cont.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            indices.clear();
            indices.extend(0..cont.vertices.len() as u32);
            tris.clear();
            if !triangulate(&cont.vertices, &mut indices, &mut tris) {
                // Bad triangulation, should not happen.
                log::warn!("bad triangulation of contour {}", ci);
            }

            // Add and merge vertices.
            let mut vert_ids = Vec::with_capacity(cont.vertices.len());
            for v in &cont.vertices {
                let id = mesh.add_vertex(
                    v.x as u16,
                    v.y as u16,
                    v.z as u16,
                    &mut first_vert,
                    &mut next_vert,
                );
                if v.is_border_vertex() {
                    // This vertex should be removed.
                    vflags[id as usize] = true;
                }
                vert_ids.push(id);
            }

            // Build initial polygons.
            polys.clear();
            for t in tris.chunks_exact(3) {
                if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                    let start = polys.len();
                    polys.resize(start + nvp, RC_MESH_NULL_IDX);
                    polys[start] = vert_ids[t[0] as usize];
                    polys[start + 1] = vert_ids[t[1] as usize];
                    polys[start + 2] = vert_ids[t[2] as usize];
                }
            }
            if polys.is_empty() {
                continue;
            }

            // Merge polygons.
            let mut regs = vec![cont.region; polys.len() / nvp];
            merge_polygons(&mut polys, &mut regs, None, &mesh.verts, nvp);

            // Store polygons.
            for q in polys.chunks_exact(nvp) {
                mesh.polys.extend_from_slice(q);
                mesh.polys.extend(std::iter::repeat(RC_MESH_NULL_IDX).take(nvp));
                mesh.regs.push(cont.region);
                mesh.areas.push(cont.area);
                mesh.npolys += 1;
                if mesh.npolys > max_tris {
                    return Err(Error::NavMeshGeneration(format!(
                        "too many polygons {} (max: {})",
                        mesh.npolys, max_tris
                    )));
                }
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.nverts {
            if vflags[i] {
                if !mesh.can_remove_vertex(i as u16) {
                    i += 1;
                    continue;
                }
                mesh.remove_vertex(i as u16, max_tris)?;
                // The vertex count has already been decremented.
                vflags.remove(i);
                continue;
            }
            i += 1;
        }

        // Calculate adjacency.
        mesh.build_adjacency();

        // Find portal edges
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(cset.width, cset.height);
        }

        // The user is responsible for filling the flags.
        mesh.flags = vec![0; mesh.npolys];

        if mesh.nverts > 0xffff {
            return Err(Error::NavMeshGeneration(format!(
                "too many vertices {} (max: {})",
                mesh.nverts, 0xffff
            )));
        }
        if mesh.npolys > 0xffff {
            return Err(Error::NavMeshGeneration(format!(
                "too many polygons {} (max: {})",
                mesh.npolys, 0xffff
            )));
        }

        log::debug!(
            "poly mesh built: {} vertices, {} polygons",
            mesh.nverts,
            mesh.npolys
        );
        Ok(mesh)
    }

    /// Vertex indices of polygon `i`, followed by its neighbour entries
    pub fn poly(&self, i: usize) -> &[u16] {
        let stride = self.nvp * 2;
        &self.polys[i * stride..(i + 1) * stride]
    }

    /// Number of used vertex slots in polygon `i`
    pub fn poly_vert_count(&self, i: usize) -> usize {
        count_poly_verts(&self.poly(i)[..self.nvp])
    }

    pub fn vertex(&self, i: usize) -> [u16; 3] {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    /// Marks unconnected edges lying on the boundary of a `width` x `height`
    /// grid as portals to the neighbouring tile.
    pub fn mark_portal_edges(&mut self, width: i32, height: i32) {
        let nvp = self.nvp;
        for i in 0..self.npolys {
            let base = i * nvp * 2;
            for j in 0..nvp {
                let pj = self.polys[base + j];
                if pj == RC_MESH_NULL_IDX {
                    break;
                }
                // Skip connected edges.
                if self.polys[base + nvp + j] != RC_MESH_NULL_IDX {
                    continue;
                }
                let mut nj = j + 1;
                if nj >= nvp || self.polys[base + nj] == RC_MESH_NULL_IDX {
                    nj = 0;
                }
                let va = self.vertex(pj as usize);
                let vb = self.vertex(self.polys[base + nj] as usize);
                let (ax, az, bx, bz) = (va[0] as i32, va[2] as i32, vb[0] as i32, vb[2] as i32);

                let side = if ax == 0 && bx == 0 {
                    Some(0)
                } else if az == height && bz == height {
                    Some(1)
                } else if ax == width && bx == width {
                    Some(2)
                } else if az == 0 && bz == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polys[base + nvp + j] = RC_PORTAL_FLAG | side;
                }
            }
        }
    }

    fn add_vertex(
        &mut self,
        x: u16,
        y: u16,
        z: u16,
        first_vert: &mut [Option<usize>],
        next_vert: &mut Vec<Option<usize>>,
    ) -> u16 {
        let bucket = compute_vertex_hash(x as i32, 0, z as i32);
        let mut i = first_vert[bucket];

        while let Some(vi) = i {
            let v = self.vertex(vi);
            if v[0] == x && (v[1] as i32 - y as i32).abs() <= 2 && v[2] == z {
                return vi as u16;
            }
            i = next_vert[vi];
        }

        // Could not find, create new.
        let vi = self.nverts;
        self.nverts += 1;
        self.verts.extend_from_slice(&[x, y, z]);
        if vi >= next_vert.len() {
            next_vert.resize(vi + 1, None);
        }
        next_vert[vi] = first_vert[bucket];
        first_vert[bucket] = Some(vi);
        vi as u16
    }

    fn can_remove_vertex(&self, rem: u16) -> bool {
        let nvp = self.nvp;

        // Count number of polygons to remove.
        let mut num_touched_verts = 0;
        let mut num_remaining_edges = 0;
        for i in 0..self.npolys {
            let p = &self.poly(i)[..nvp];
            let nv = count_poly_verts(p);
            let num_removed = p[..nv].iter().filter(|&&v| v == rem).count();
            if num_removed > 0 {
                num_touched_verts += num_removed;
                num_remaining_edges += nv - (num_removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if num_remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        let mut edges: Vec<(u16, u16, i32)> = Vec::with_capacity(num_touched_verts * 2);
        for i in 0..self.npolys {
            let p = &self.poly(i)[..nvp];
            let nv = count_poly_verts(p);

            // Collect edges which touches the removed vertex.
            let mut k = nv - 1;
            for j in 0..nv {
                if p[j] == rem || p[k] == rem {
                    // Arrange edge so that a=rem.
                    let (mut a, mut b) = (p[j], p[k]);
                    if b == rem {
                        std::mem::swap(&mut a, &mut b);
                    }

                    // Check if the edge exists
                    let mut exists = false;
                    for e in edges.iter_mut() {
                        if e.1 == b {
                            // Exists, increment vertex share count.
                            e.2 += 1;
                            exists = true;
                        }
                    }
                    if !exists {
                        edges.push((a, b, 1));
                    }
                }
                k = j;
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let num_open_edges = edges.iter().filter(|e| e.2 < 2).count();
        num_open_edges <= 2
    }

    fn remove_vertex(&mut self, rem: u16, max_tris: usize) -> Result<()> {
        let nvp = self.nvp;

        // Edges of removed polygons which do not touch the removed vertex:
        // (a, b, region, area)
        let mut edges: Vec<(u16, u16, u16, u8)> = Vec::new();

        let mut i = 0;
        while i < self.npolys {
            let base = i * nvp * 2;
            let nv = count_poly_verts(&self.polys[base..base + nvp]);
            let has_rem = self.polys[base..base + nv].contains(&rem);
            if !has_rem {
                i += 1;
                continue;
            }

            // Collect edges which does not touch the removed vertex.
            let mut k = nv - 1;
            for j in 0..nv {
                let (pj, pk) = (self.polys[base + j], self.polys[base + k]);
                if pj != rem && pk != rem {
                    edges.push((pk, pj, self.regs[i], self.areas[i]));
                }
                k = j;
            }

            // Remove the polygon.
            self.swap_remove_poly(i);
        }

        // Remove vertex.
        let r = rem as usize;
        self.verts.drain(r * 3..r * 3 + 3);
        self.nverts -= 1;

        // Adjust indices to match the removed vertex layout.
        for i in 0..self.npolys {
            let base = i * nvp * 2;
            let nv = count_poly_verts(&self.polys[base..base + nvp]);
            for v in &mut self.polys[base..base + nv] {
                if *v > rem {
                    *v -= 1;
                }
            }
        }
        for e in edges.iter_mut() {
            if e.0 > rem {
                e.0 -= 1;
            }
            if e.1 > rem {
                e.1 -= 1;
            }
        }

        if edges.is_empty() {
            return Ok(());
        }

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole: std::collections::VecDeque<u16> = std::collections::VecDeque::new();
        let mut hreg: std::collections::VecDeque<u16> = std::collections::VecDeque::new();
        let mut harea: std::collections::VecDeque<u8> = std::collections::VecDeque::new();
        hole.push_back(edges[0].0);
        hreg.push_back(edges[0].2);
        harea.push_back(edges[0].3);

        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let (ea, eb, r, a) = edges[i];
                let mut add = false;
                if hole.front() == Some(&eb) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front(ea);
                    hreg.push_front(r);
                    harea.push_front(a);
                    add = true;
                } else if hole.back() == Some(&ea) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back(eb);
                    hreg.push_back(r);
                    harea.push_back(a);
                    add = true;
                }
                if add {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        let hole: Vec<u16> = hole.into();
        let hreg: Vec<u16> = hreg.into();
        let harea: Vec<u8> = harea.into();

        // Generate temp vertex array for triangulation.
        let tverts: Vec<ContourVertex> = hole
            .iter()
            .map(|&pi| {
                let v = self.vertex(pi as usize);
                ContourVertex::new(v[0] as i32, v[1] as i32, v[2] as i32, 0)
            })
            .collect();
        let mut thole: Vec<u32> = (0..hole.len() as u32).collect();

        // Triangulate the hole.
        let mut tris = Vec::with_capacity(hole.len() * 3);
        if !triangulate(&tverts, &mut thole, &mut tris) {
            log::warn!("remove_vertex: triangulation returned bad results");
        }

        // Merge the hole triangles back to polygons.
        let mut polys: Vec<u16> = Vec::new();
        let mut pregs: Vec<u16> = Vec::new();
        let mut pareas: Vec<u8> = Vec::new();

        // Build initial polygons.
        for t in tris.chunks_exact(3) {
            let (t0, t1, t2) = (t[0] as usize, t[1] as usize, t[2] as usize);
            if t0 != t1 && t0 != t2 && t1 != t2 {
                let start = polys.len();
                polys.resize(start + nvp, RC_MESH_NULL_IDX);
                polys[start] = hole[t0];
                polys[start + 1] = hole[t1];
                polys[start + 2] = hole[t2];

                // If this polygon covers multiple region types then mark it as such
                if hreg[t0] != hreg[t1] || hreg[t1] != hreg[t2] {
                    pregs.push(RC_MULTIPLE_REGS);
                } else {
                    pregs.push(hreg[t0]);
                }
                pareas.push(harea[t0]);
            }
        }
        if polys.is_empty() {
            return Ok(());
        }

        // Merge polygons.
        merge_polygons(&mut polys, &mut pregs, Some(&mut pareas), &self.verts, nvp);

        // Store polygons.
        for (i, q) in polys.chunks_exact(nvp).enumerate() {
            if self.npolys >= max_tris {
                break;
            }
            self.polys.extend_from_slice(q);
            self.polys.extend(std::iter::repeat(RC_MESH_NULL_IDX).take(nvp));
            self.regs.push(pregs[i]);
            self.areas.push(pareas[i]);
            self.npolys += 1;
            if self.npolys > max_tris {
                return Err(Error::NavMeshGeneration(format!(
                    "too many polygons {} (max: {})",
                    self.npolys, max_tris
                )));
            }
        }

        Ok(())
    }

    fn swap_remove_poly(&mut self, i: usize) {
        let stride = self.nvp * 2;
        let last = self.npolys - 1;
        if i != last {
            let (head, tail) = self.polys.split_at_mut(last * stride);
            head[i * stride..(i + 1) * stride].copy_from_slice(&tail[..stride]);
        }
        self.polys.truncate(last * stride);
        self.regs.swap_remove(i);
        self.areas.swap_remove(i);
        self.npolys -= 1;
    }

    /// Fills the neighbour half of `polys` with the shared edge adjacency
    fn build_adjacency(&mut self) {
        struct Edge {
            vert: [u16; 2],
            poly_edge: [usize; 2],
            poly: [usize; 2],
        }

        let nvp = self.nvp;
        let max_edge_count = self.npolys * nvp;
        let mut first_edge: Vec<Option<usize>> = vec![None; self.nverts];
        let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(max_edge_count);
        let mut edges: Vec<Edge> = Vec::with_capacity(max_edge_count);

        let next_vertex = |t: &[u16], j: usize| -> u16 {
            if j + 1 >= nvp || t[j + 1] == RC_MESH_NULL_IDX {
                t[0]
            } else {
                t[j + 1]
            }
        };

        for i in 0..self.npolys {
            let t = &self.polys[i * nvp * 2..i * nvp * 2 + nvp];
            for j in 0..nvp {
                if t[j] == RC_MESH_NULL_IDX {
                    break;
                }
                let v0 = t[j];
                let v1 = next_vertex(t, j);
                if v0 < v1 {
                    edges.push(Edge {
                        vert: [v0, v1],
                        poly: [i, i],
                        poly_edge: [j, 0],
                    });
                    // Insert edge
                    next_edge.push(first_edge[v0 as usize]);
                    first_edge[v0 as usize] = Some(edges.len() - 1);
                }
            }
        }

        for i in 0..self.npolys {
            let t = &self.polys[i * nvp * 2..i * nvp * 2 + nvp];
            for j in 0..nvp {
                if t[j] == RC_MESH_NULL_IDX {
                    break;
                }
                let v0 = t[j];
                let v1 = next_vertex(t, j);
                if v0 > v1 {
                    let mut e = first_edge[v1 as usize];
                    while let Some(ei) = e {
                        let edge = &mut edges[ei];
                        if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                            edge.poly[1] = i;
                            edge.poly_edge[1] = j;
                            break;
                        }
                        e = next_edge[ei];
                    }
                }
            }
        }

        // Store adjacency
        for e in &edges {
            if e.poly[0] != e.poly[1] {
                self.polys[e.poly[0] * nvp * 2 + nvp + e.poly_edge[0]] = e.poly[1] as u16;
                self.polys[e.poly[1] * nvp * 2 + nvp + e.poly_edge[1]] = e.poly[0] as u16;
            }
        }
    }
}

fn compute_vertex_hash(x: i32, y: i32, z: i32) -> usize {
    const H1: u32 = 0x8da6_b343; // Large multiplicative constants;
    const H2: u32 = 0xd816_3841; // here arbitrarily chosen primes
    const H3: u32 = 0xcb1a_b31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H2.wrapping_mul(y as u32))
        .wrapping_add(H3.wrapping_mul(z as u32));
    (n as usize) & (VERTEX_BUCKET_COUNT - 1)
}

pub(crate) fn count_poly_verts(p: &[u16]) -> usize {
    p.iter().position(|&v| v == RC_MESH_NULL_IDX).unwrap_or(p.len())
}

#[inline]
fn uleft(verts: &[u16], a: u16, b: u16, c: u16) -> bool {
    let v = |i: u16, k: usize| verts[i as usize * 3 + k] as i32;
    (v(b, 0) - v(a, 0)) * (v(c, 2) - v(a, 2)) - (v(c, 0) - v(a, 0)) * (v(b, 2) - v(a, 2)) < 0
}

/// Returns the squared length of the shared edge when `pa` and `pb` can be
/// merged into a convex polygon, along with the shared edge indices.
fn get_poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let mut shared = None;
    for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break;
            }
        }
    }

    // No common edge, cannot merge.
    let (ea, eb) = shared?;

    // Check to see if the merged polygon would be convex.
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !uleft(verts, va, vb, vc) {
        return None;
    }

    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !uleft(verts, va, vb, vc) {
        return None;
    }

    let va = pa[ea] as usize;
    let vb = pa[(ea + 1) % na] as usize;
    let dx = verts[va * 3] as i32 - verts[vb * 3] as i32;
    let dy = verts[va * 3 + 2] as i32 - verts[vb * 3 + 2] as i32;
    Some((dx * dx + dy * dy, ea, eb))
}

fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize, nvp: usize) -> Vec<u16> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);

    let mut tmp = Vec::with_capacity(nvp);
    // Add pa
    for i in 0..na - 1 {
        tmp.push(pa[(ea + 1 + i) % na]);
    }
    // Add pb
    for i in 0..nb - 1 {
        tmp.push(pb[(eb + 1 + i) % nb]);
    }
    tmp.resize(nvp, RC_MESH_NULL_IDX);
    tmp
}

/// Greedily merges the polygons in `polys` (stride `nvp`) while the result
/// stays convex, always merging along the longest shared edge first.
fn merge_polygons(
    polys: &mut Vec<u16>,
    regs: &mut Vec<u16>,
    mut areas: Option<&mut Vec<u8>>,
    verts: &[u16],
    nvp: usize,
) {
    if nvp <= 3 {
        return;
    }
    loop {
        let npolys = polys.len() / nvp;

        // Find best polygons to merge.
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..npolys.saturating_sub(1) {
            let pj = &polys[j * nvp..(j + 1) * nvp];
            for k in j + 1..npolys {
                let pk = &polys[k * nvp..(k + 1) * nvp];
                if let Some((v, ea, eb)) = get_poly_merge_value(pj, pk, verts, nvp) {
                    if best.map_or(v > 0, |b| v > b.0) {
                        best = Some((v, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };

        // Found best, merge.
        let merged = merge_poly_verts(
            &polys[pa * nvp..(pa + 1) * nvp],
            &polys[pb * nvp..(pb + 1) * nvp],
            ea,
            eb,
            nvp,
        );
        polys[pa * nvp..(pa + 1) * nvp].copy_from_slice(&merged);
        if regs[pa] != regs[pb] {
            regs[pa] = RC_MULTIPLE_REGS;
        }

        // Move the last polygon into the freed slot.
        let last = npolys - 1;
        if pb != last {
            let (head, tail) = polys.split_at_mut(last * nvp);
            head[pb * nvp..(pb + 1) * nvp].copy_from_slice(&tail[..nvp]);
        }
        polys.truncate(last * nvp);
        regs.swap_remove(pb);
        if let Some(areas) = areas.as_deref_mut() {
            areas.swap_remove(pb);
        }
    }
}

#[inline]
fn tv<'a>(verts: &'a [ContourVertex], indices: &[u32], i: usize) -> &'a ContourVertex {
    &verts[(indices[i] & INDEX_MASK) as usize]
}

/// True if the diagonal (i, j) is strictly internal to the polygon in the
/// neighbourhood of the i endpoint.
fn in_cone(i: usize, j: usize, n: usize, verts: &[ContourVertex], indices: &[u32]) -> bool {
    let pi = tv(verts, indices, i);
    let pj = tv(verts, indices, j);
    let pi1 = tv(verts, indices, (i + 1) % n);
    let pin1 = tv(verts, indices, (i + n - 1) % n);

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, n: usize, verts: &[ContourVertex], indices: &[u32]) -> bool {
    let pi = tv(verts, indices, i);
    let pj = tv(verts, indices, j);
    let pi1 = tv(verts, indices, (i + 1) % n);
    let pin1 = tv(verts, indices, (i + n - 1) % n);

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// True if (v_i, v_j) is a proper internal or external diagonal of P,
/// ignoring edges incident to v_i and v_j.
fn diagonalie(
    i: usize,
    j: usize,
    n: usize,
    verts: &[ContourVertex],
    indices: &[u32],
    proper_only: bool,
) -> bool {
    let d0 = tv(verts, indices, i);
    let d1 = tv(verts, indices, j);

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = (k + 1) % n;
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = tv(verts, indices, k);
        let p1 = tv(verts, indices, k1);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        let hit = if proper_only {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if hit {
            return false;
        }
    }
    true
}

fn diagonal(i: usize, j: usize, n: usize, verts: &[ContourVertex], indices: &[u32]) -> bool {
    in_cone(i, j, n, verts, indices) && diagonalie(i, j, n, verts, indices, false)
}

fn diagonal_loose(i: usize, j: usize, n: usize, verts: &[ContourVertex], indices: &[u32]) -> bool {
    in_cone_loose(i, j, n, verts, indices) && diagonalie(i, j, n, verts, indices, true)
}

/// Ear clipping triangulation of a simple polygon.
///
/// Writes vertex indices to `tris`. Returns false when the polygon could not
/// be fully triangulated; the triangles found so far are kept.
fn triangulate(verts: &[ContourVertex], indices: &mut Vec<u32>, tris: &mut Vec<u32>) -> bool {
    let mut n = indices.len();
    if n < 3 {
        return false;
    }

    // The last bit of the index is used to indicate if the vertex can be removed.
    for i in 0..n {
        let i1 = (i + 1) % n;
        let i2 = (i1 + 1) % n;
        if diagonal(i, i2, n, verts, indices) {
            indices[i1] |= CAN_REMOVE;
        }
    }

    let edge_len = |indices: &[u32], a: usize, b: usize| {
        let p0 = tv(verts, indices, a);
        let p2 = tv(verts, indices, b);
        let dx = p2.x - p0.x;
        let dy = p2.z - p0.z;
        dx * dx + dy * dy
    };

    while n > 3 {
        let mut min_len = -1;
        let mut mini = None;
        for i in 0..n {
            let i1 = (i + 1) % n;
            if (indices[i1] & CAN_REMOVE) != 0 {
                let len = edge_len(indices, i, (i1 + 1) % n);
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        if mini.is_none() {
            // We might get here because the contour has overlapping segments.
            // Try to recover by loosening up the in-cone test a bit.
            min_len = -1;
            for i in 0..n {
                let i1 = (i + 1) % n;
                let i2 = (i1 + 1) % n;
                if diagonal_loose(i, i2, n, verts, indices) {
                    let len = edge_len(indices, i, (i2 + 1) % n);
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
        }

        let Some(i) = mini else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };

        let mut i1 = (i + 1) % n;
        let i2 = (i1 + 1) % n;

        tris.push(indices[i] & INDEX_MASK);
        tris.push(indices[i1] & INDEX_MASK);
        tris.push(indices[i2] & INDEX_MASK);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        n -= 1;
        indices.remove(i1);

        if i1 >= n {
            i1 = 0;
        }
        let i = (i1 + n - 1) % n;
        // Update diagonal flags.
        if diagonal((i + n - 1) % n, i1, n, verts, indices) {
            indices[i] |= CAN_REMOVE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, (i1 + 1) % n, n, verts, indices) {
            indices[i1] |= CAN_REMOVE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    // Append the remaining triangle.
    tris.push(indices[0] & INDEX_MASK);
    tris.push(indices[1] & INDEX_MASK);
    tris.push(indices[2] & INDEX_MASK);

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, Contour};
    use crate::heightfield::Heightfield;
    use crate::{build_distance_field, build_regions, CompactHeightfield, RC_WALKABLE_AREA};

    fn cv(x: i32, z: i32) -> ContourVertex {
        ContourVertex::new(x, 0, z, 0)
    }

    fn contour_set(contours: Vec<Vec<ContourVertex>>) -> ContourSet {
        ContourSet {
            contours: contours
                .into_iter()
                .enumerate()
                .map(|(i, vertices)| Contour {
                    raw_vertices: vertices.clone(),
                    vertices,
                    region: i as u16 + 1,
                    area: RC_WALKABLE_AREA,
                })
                .collect(),
            width: 10,
            height: 10,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(10.0, 1.0, 10.0),
            cs: 1.0,
            ch: 1.0,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn test_triangulate_square() {
        let verts = vec![cv(0, 0), cv(0, 4), cv(4, 4), cv(4, 0)];
        let mut indices: Vec<u32> = (0..4).collect();
        let mut tris = Vec::new();
        assert!(triangulate(&verts, &mut indices, &mut tris));
        assert_eq!(tris.len(), 6);
    }

    #[test]
    fn test_triangulate_concave() {
        // L shape
        let verts = vec![cv(0, 0), cv(0, 4), cv(2, 4), cv(2, 2), cv(4, 2), cv(4, 0)];
        let mut indices: Vec<u32> = (0..6).collect();
        let mut tris = Vec::new();
        assert!(triangulate(&verts, &mut indices, &mut tris));
        assert_eq!(tris.len(), 12);
    }

    #[test]
    fn test_square_becomes_one_polygon() {
        let cset = contour_set(vec![vec![cv(0, 0), cv(0, 4), cv(4, 4), cv(4, 0)]]);
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        assert_eq!(mesh.nverts, 4);
        assert_eq!(mesh.npolys, 1);
        assert_eq!(mesh.poly_vert_count(0), 4);
        assert_eq!(mesh.flags.len(), 1);
        assert_eq!(mesh.regs[0], 1);
    }

    #[test]
    fn test_triangles_only_with_nvp_three() {
        let cset = contour_set(vec![vec![cv(0, 0), cv(0, 4), cv(4, 4), cv(4, 0)]]);
        let mesh = PolyMesh::build_from_contour_set(&cset, 3).unwrap();
        assert_eq!(mesh.npolys, 2);
        // The two triangles share the diagonal.
        let p0 = mesh.poly(0);
        assert!(p0[3..6].iter().any(|&n| n == 1));
    }

    #[test]
    fn test_adjacent_contours_share_vertices_and_link() {
        let cset = contour_set(vec![
            vec![cv(0, 0), cv(0, 4), cv(4, 4), cv(4, 0)],
            vec![cv(4, 0), cv(4, 4), cv(8, 4), cv(8, 0)],
        ]);
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        assert_eq!(mesh.nverts, 6);
        assert_eq!(mesh.npolys, 2);

        let links0: Vec<u16> = mesh.poly(0)[6..]
            .iter()
            .copied()
            .filter(|&n| n != RC_MESH_NULL_IDX)
            .collect();
        assert_eq!(links0, vec![1]);
    }

    #[test]
    fn test_portal_edges() {
        let cset = contour_set(vec![vec![cv(0, 0), cv(0, 10), cv(10, 10), cv(10, 0)]]);
        let mut mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        mesh.mark_portal_edges(10, 10);
        let p = mesh.poly(0);
        let mut sides: Vec<u16> = p[6..10].iter().map(|&n| n & 0xf).collect();
        assert!(p[6..10].iter().all(|&n| n & RC_PORTAL_FLAG != 0));
        sides.sort();
        assert_eq!(sides, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_mesh_from_plane_pipeline() {
        let mut hf = Heightfield::new(10, 10, Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0), 1.0, 0.5);
        for z in 0..10 {
            for x in 0..10 {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 0, 20).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::default()).unwrap();
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();

        assert!(mesh.npolys >= 1);
        for i in 0..mesh.npolys {
            let nv = mesh.poly_vert_count(i);
            assert!((3..=6).contains(&nv));
            for &v in &mesh.poly(i)[..nv] {
                assert!((v as usize) < mesh.nverts);
            }
        }
        // Every internal edge links back.
        for i in 0..mesh.npolys {
            let p = mesh.poly(i);
            for &n in &p[6..] {
                if n != RC_MESH_NULL_IDX && n & RC_PORTAL_FLAG == 0 {
                    assert!(mesh.poly(n as usize)[6..].contains(&(i as u16)));
                }
            }
        }
    }
}
