//! Detail mesh generation for Recast
//!
//! Each polygon of the [`PolyMesh`] gets a small triangle mesh that follows
//! the real surface height. Edges are sampled first so neighbouring polygons
//! share the same height profile, then interior samples are added where the
//! surface deviates too much from the current triangulation.

use std::collections::VecDeque;

use recast_common::{Error, Result};

use crate::compact_heightfield::{get_con, get_dir_for_offset, get_dir_offset_x, get_dir_offset_y, CompactHeightfield};
use crate::polymesh::{count_poly_verts, PolyMesh};
use crate::{RC_MULTIPLE_REGS, RC_NOT_CONNECTED};

const RC_UNSET_HEIGHT: u16 = 0xffff;

const MAX_VERTS: usize = 127;
/// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

/// Triangle edge lies on the polygon boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    ymin: i32,
    width: i32,
    height: i32,
}

/// Per polygon height detail
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// Per polygon `[vert_base, vert_count, tri_base, tri_count]`
    pub meshes: Vec<[u32; 4]>,
    /// World space vertices, `[x, y, z]` per vertex
    pub vertices: Vec<f32>,
    /// Local vertex indices plus edge flags, 2 bits per edge
    pub triangles: Vec<[u8; 4]>,
}

impl PolyMeshDetail {
    pub fn vert_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn tri_count(&self) -> usize {
        self.triangles.len()
    }

    /// Builds the detail mesh of `mesh`, sampling heights from `chf`.
    ///
    /// A `sample_dist` of zero disables edge and interior sampling; every
    /// polygon is then triangulated from its own vertices.
    pub fn build_from_poly_mesh(
        mesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        let mut dmesh = Self::default();
        if mesh.nverts == 0 || mesh.npolys == 0 {
            return Ok(dmesh);
        }

        let nvp = mesh.nvp;
        let cs = mesh.cs;
        let ch = mesh.ch;
        let orig = mesh.bmin;
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        // Find max size for a polygon area.
        let mut bounds = vec![[0i32; 4]; mesh.npolys];
        let mut maxhw = 0;
        let mut maxhh = 0;
        for (i, b) in bounds.iter_mut().enumerate() {
            let p = &mesh.poly(i)[..nvp];
            let (mut xmin, mut xmax, mut ymin, mut ymax) = (chf.width, 0, chf.height, 0);
            for &vi in &p[..count_poly_verts(p)] {
                let v = mesh.vertex(vi as usize);
                xmin = xmin.min(v[0] as i32);
                xmax = xmax.max(v[0] as i32);
                ymin = ymin.min(v[2] as i32);
                ymax = ymax.max(v[2] as i32);
            }
            xmin = 0.max(xmin - 1);
            xmax = chf.width.min(xmax + 1);
            ymin = 0.max(ymin - 1);
            ymax = chf.height.min(ymax + 1);
            *b = [xmin, xmax, ymin, ymax];
            if xmin >= xmax || ymin >= ymax {
                continue;
            }
            maxhw = maxhw.max(xmax - xmin);
            maxhh = maxhh.max(ymax - ymin);
        }

        let mut hp = HeightPatch {
            data: vec![0; (maxhw * maxhh) as usize],
            xmin: 0,
            ymin: 0,
            width: 0,
            height: 0,
        };

        dmesh.meshes.reserve(mesh.npolys);
        let mut verts: Vec<[f32; 3]> = Vec::with_capacity(MAX_VERTS);
        let mut tris: Vec<[i32; 4]> = Vec::with_capacity(MAX_TRIS);

        for i in 0..mesh.npolys {
            let p = &mesh.poly(i)[..nvp];
            let npoly = count_poly_verts(p);

            // Store polygon vertices for processing.
            let mut poly: Vec<[f32; 3]> = p[..npoly]
                .iter()
                .map(|&vi| {
                    let v = mesh.vertex(vi as usize);
                    [v[0] as f32 * cs, v[1] as f32 * ch, v[2] as f32 * cs]
                })
                .collect();

            // Get the height data from the area of the polygon.
            let [xmin, xmax, ymin, ymax] = bounds[i];
            hp.xmin = xmin;
            hp.ymin = ymin;
            hp.width = (xmax - xmin).max(0);
            hp.height = (ymax - ymin).max(0);
            get_height_data(chf, &p[..npoly], &mesh.verts, border_size, &mut hp, mesh.regs[i])?;

            // Build detail mesh.
            build_poly_detail(
                &poly,
                sample_dist,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
                &mut verts,
                &mut tris,
            );

            // Move detail verts to world space.
            for v in verts.iter_mut() {
                v[0] += orig.x;
                v[1] += orig.y + chf.ch;
                v[2] += orig.z;
            }
            // Offset poly too, will be used to flag checking.
            for v in poly.iter_mut() {
                v[0] += orig.x;
                v[1] += orig.y;
                v[2] += orig.z;
            }

            // Store detail submesh.
            dmesh.meshes.push([
                dmesh.vert_count() as u32,
                verts.len() as u32,
                dmesh.tri_count() as u32,
                tris.len() as u32,
            ]);
            for v in &verts {
                dmesh.vertices.extend_from_slice(v);
            }
            for t in &tris {
                dmesh.triangles.push([t[0] as u8, t[1] as u8, t[2] as u8, t[3] as u8]);
            }
        }

        log::debug!(
            "detail mesh built: {} vertices, {} triangles",
            dmesh.vert_count(),
            dmesh.tri_count()
        );
        Ok(dmesh)
    }

    /// Concatenates several detail meshes into one
    pub fn merge(meshes: &[&PolyMeshDetail]) -> Self {
        let mut out = Self::default();
        for dm in meshes {
            for m in &dm.meshes {
                out.meshes.push([
                    out.vert_count() as u32,
                    m[1],
                    out.tri_count() as u32,
                    m[3],
                ]);
                let vb = m[0] as usize * 3;
                out.vertices
                    .extend_from_slice(&dm.vertices[vb..vb + m[1] as usize * 3]);
                let tb = m[2] as usize;
                out.triangles
                    .extend_from_slice(&dm.triangles[tb..tb + m[3] as usize]);
            }
        }
        out
    }
}

#[inline]
fn vdot2(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[2] * b[2]
}

#[inline]
fn vdist_sq2(p: &[f32; 3], q: &[f32; 3]) -> f32 {
    let dx = q[0] - p[0];
    let dy = q[2] - p[2];
    dx * dx + dy * dy
}

#[inline]
fn vdist2(p: &[f32; 3], q: &[f32; 3]) -> f32 {
    vdist_sq2(p, q).sqrt()
}

#[inline]
fn vcross2(p1: &[f32; 3], p2: &[f32; 3], p3: &[f32; 3]) -> f32 {
    let u1 = p2[0] - p1[0];
    let v1 = p2[2] - p1[2];
    let u2 = p3[0] - p1[0];
    let v2 = p3[2] - p1[2];
    u1 * v2 - v1 * u2
}

fn circum_circle(p1: &[f32; 3], p2: &[f32; 3], p3: &[f32; 3]) -> ([f32; 3], f32) {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v1 = [0.0f32; 3];
    let v2 = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
    let v3 = [p3[0] - p1[0], p3[1] - p1[1], p3[2] - p1[2]];

    let cp = vcross2(&v1, &v2, &v3);
    if cp.abs() > EPS {
        let v1_sq = vdot2(&v1, &v1);
        let v2_sq = vdot2(&v2, &v2);
        let v3_sq = vdot2(&v3, &v3);
        let mut c = [
            (v1_sq * (v2[2] - v3[2]) + v2_sq * (v3[2] - v1[2]) + v3_sq * (v1[2] - v2[2])) / (2.0 * cp),
            0.0,
            (v1_sq * (v3[0] - v2[0]) + v2_sq * (v1[0] - v3[0]) + v3_sq * (v2[0] - v1[0])) / (2.0 * cp),
        ];
        let r = vdist2(&c, &v1);
        c[0] += p1[0];
        c[1] += p1[1];
        c[2] += p1[2];
        return (c, r);
    }
    (*p1, 0.0)
}

/// Vertical distance from `p` to triangle abc, or `None` when `p` is
/// outside the triangle on the xz-plane
fn dist_pt_tri(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> Option<f32> {
    let v0 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];

    let dot00 = vdot2(&v0, &v0);
    let dot01 = vdot2(&v0, &v1);
    let dot02 = vdot2(&v0, &v2);
    let dot11 = vdot2(&v1, &v1);
    let dot12 = vdot2(&v1, &v2);

    // Compute barycentric coordinates
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a[1] + v0[1] * u + v1[1] * v;
        return Some((y - p[1]).abs());
    }
    None
}

fn distance_pt_seg(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> f32 {
    let pqx = q[0] - p[0];
    let pqy = q[1] - p[1];
    let pqz = q[2] - p[2];
    let mut dx = pt[0] - p[0];
    let mut dy = pt[1] - p[1];
    let mut dz = pt[2] - p[2];
    let d = pqx * pqx + pqy * pqy + pqz * pqz;
    let mut t = pqx * dx + pqy * dy + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    dx = p[0] + t * pqx - pt[0];
    dy = p[1] + t * pqy - pt[1];
    dz = p[2] + t * pqz - pt[2];
    dx * dx + dy * dy + dz * dz
}

fn distance_pt_seg_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> f32 {
    recast_common::dist_pt_seg_sqr_2d(pt, p, q).0
}

fn dist_to_tri_mesh(p: &[f32; 3], verts: &[[f32; 3]], tris: &[[i32; 4]]) -> Option<f32> {
    tris.iter()
        .filter_map(|t| {
            dist_pt_tri(
                p,
                &verts[t[0] as usize],
                &verts[t[1] as usize],
                &verts[t[2] as usize],
            )
        })
        .reduce(f32::min)
}

/// Squared distance to the polygon boundary, negative inside
fn dist_to_poly(verts: &[[f32; 3]], p: &[f32; 3]) -> f32 {
    let n = verts.len();
    let mut dmin = f32::MAX;
    let mut c = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        if ((vi[2] > p[2]) != (vj[2] > p[2]))
            && (p[0] < (vj[0] - vi[0]) * (p[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            c = !c;
        }
        dmin = dmin.min(distance_pt_seg_2d(p, vj, vi));
        j = i;
    }
    if c {
        -dmin
    } else {
        dmin
    }
}

fn get_height(fx: f32, fy: f32, fz: f32, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let ix = ((fx * ics + 0.01).floor() as i32 - hp.xmin).clamp(0, (hp.width - 1).max(0));
    let iz = ((fz * ics + 0.01).floor() as i32 - hp.ymin).clamp(0, (hp.height - 1).max(0));
    let mut h = hp.data[(ix + iz * hp.width) as usize];
    if h != RC_UNSET_HEIGHT {
        return h;
    }

    // Special case when data might be bad.
    // Walk adjacent cells in a spiral up to 'radius', and look
    // for a pixel which has a valid height. The search stops at the first
    // ring around the center that has any valid height, keeping the best
    // height of that ring.
    let (mut x, mut z, mut dx, mut dz) = (1i32, 0i32, 1i32, 0i32);
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;

    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;

    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;

        if nx >= 0 && nz >= 0 && nx < hp.width && nz < hp.height {
            let nh = hp.data[(nx + nz * hp.width) as usize];
            if nh != RC_UNSET_HEIGHT {
                let d = (nh as f32 * ch - fy).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }

        if i + 1 == next_ring_iter_start {
            if h != RC_UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            let tmp = dx;
            dx = -dz;
            dz = tmp;
        }
        x += dx;
        z += dz;
    }
    h
}

fn find_edge(edges: &[[i32; 4]], s: i32, t: i32) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
}

fn add_edge(edges: &mut Vec<[i32; 4]>, max_edges: usize, s: i32, t: i32, l: i32, r: i32) {
    if edges.len() >= max_edges {
        log::error!("add_edge: too many edges ({}/{})", edges.len(), max_edges);
        return;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_none() {
        edges.push([s, t, l, r]);
    }
}

fn update_left_face(e: &mut [i32; 4], s: i32, t: i32, f: i32) {
    if e[0] == s && e[1] == t && e[2] == EV_UNDEF {
        e[2] = f;
    } else if e[1] == s && e[0] == t && e[3] == EV_UNDEF {
        e[3] = f;
    }
}

fn overlap_seg_seg_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3], d: &[f32; 3]) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[[f32; 3]], edges: &[[i32; 4]], s1: i32, t1: i32) -> bool {
    for e in edges {
        let (s0, t0) = (e[0], e[1]);
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            continue;
        }
        if overlap_seg_seg_2d(
            &pts[s0 as usize],
            &pts[t0 as usize],
            &pts[s1 as usize],
            &pts[t1 as usize],
        ) {
            return true;
        }
    }
    false
}

fn complete_facet(pts: &[[f32; 3]], edges: &mut Vec<[i32; 4]>, max_edges: usize, nfaces: &mut i32, e: usize) {
    const EPS: f32 = 1e-5;

    let edge = edges[e];

    // Cache s and t.
    let (s, t) = if edge[2] == EV_UNDEF {
        (edge[0], edge[1])
    } else if edge[3] == EV_UNDEF {
        (edge[1], edge[0])
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let npts = pts.len();
    let mut pt = npts;
    let mut c = [0.0f32; 3];
    let mut r = -1.0f32;
    let ps = &pts[s as usize];
    let pt_t = &pts[t as usize];
    for u in 0..npts {
        if u as i32 == s || u as i32 == t {
            continue;
        }
        if vcross2(ps, pt_t, &pts[u]) > EPS {
            if r < 0.0 {
                // The circle is not updated yet, do it now.
                pt = u;
                (c, r) = circum_circle(ps, pt_t, &pts[u]);
                continue;
            }
            let d = vdist2(&c, &pts[u]);
            let tol = 0.001;
            if d > r * (1.0 + tol) {
                // Outside current circumcircle, skip.
                continue;
            } else if d < r * (1.0 - tol) {
                // Inside safe circumcircle, update circle.
                pt = u;
                (c, r) = circum_circle(ps, pt_t, &pts[u]);
            } else {
                // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
                // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
                if overlap_edges(pts, edges, s, u as i32) {
                    continue;
                }
                if overlap_edges(pts, edges, t, u as i32) {
                    continue;
                }
                // Edge is valid.
                pt = u;
                (c, r) = circum_circle(ps, pt_t, &pts[u]);
            }
        }
    }

    // Add new triangle or update edge info if s-t is on hull.
    if pt < npts {
        let pt = pt as i32;
        // Update face information of edge being completed.
        update_left_face(&mut edges[e], s, t, *nfaces);

        // Add new edge or update face info of old edge.
        match find_edge(edges, pt, s) {
            None => add_edge(edges, max_edges, pt, s, *nfaces, EV_UNDEF),
            Some(ei) => update_left_face(&mut edges[ei], pt, s, *nfaces),
        }

        // Add new edge or update face info of old edge.
        match find_edge(edges, t, pt) {
            None => add_edge(edges, max_edges, t, pt, *nfaces, EV_UNDEF),
            Some(ei) => update_left_face(&mut edges[ei], t, pt, *nfaces),
        }

        *nfaces += 1;
    } else {
        update_left_face(&mut edges[e], s, t, EV_HULL);
    }
}

fn delaunay_hull(pts: &[[f32; 3]], hull: &[usize], tris: &mut Vec<[i32; 4]>, edges: &mut Vec<[i32; 4]>) {
    let mut nfaces = 0i32;
    let max_edges = pts.len() * 10;
    edges.clear();

    let nhull = hull.len();
    let mut j = nhull - 1;
    for i in 0..nhull {
        add_edge(edges, max_edges, hull[j] as i32, hull[i] as i32, EV_HULL, EV_UNDEF);
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge][2] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current_edge);
        }
        if edges[current_edge][3] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    tris.clear();
    tris.resize(nfaces as usize, [-1; 4]);
    for e in edges.iter() {
        if e[3] >= 0 {
            // Left face
            let t = &mut tris[e[3] as usize];
            if t[0] == -1 {
                t[0] = e[0];
                t[1] = e[1];
            } else if t[0] == e[1] {
                t[2] = e[0];
            } else if t[1] == e[0] {
                t[2] = e[1];
            }
        }
        if e[2] >= 0 {
            // Right
            let t = &mut tris[e[2] as usize];
            if t[0] == -1 {
                t[0] = e[1];
                t[1] = e[0];
            } else if t[0] == e[0] {
                t[2] = e[1];
            } else if t[1] == e[1] {
                t[2] = e[0];
            }
        }
    }

    let before = tris.len();
    tris.retain(|t| t[0] != -1 && t[1] != -1 && t[2] != -1);
    if tris.len() != before {
        log::warn!("delaunay_hull: removed {} dangling faces", before - tris.len());
    }
    for t in tris.iter_mut() {
        t[3] = 0;
    }
}

/// Calculate minimum extent of the polygon.
fn poly_min_extent(verts: &[[f32; 3]]) -> f32 {
    let nverts = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..nverts {
        let ni = (i + 1) % nverts;
        let p1 = &verts[i];
        let p2 = &verts[ni];
        let mut max_edge_dist = 0.0f32;
        for (j, v) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            max_edge_dist = max_edge_dist.max(distance_pt_seg_2d(v, p1, p2));
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

fn triangulate_hull(verts: &[[f32; 3]], hull: &[usize], nin: usize, tris: &mut Vec<[i32; 4]>) {
    let nhull = hull.len();
    if nhull < 3 {
        return;
    }
    let next = |i: usize| (i + 1) % nhull;
    let prev = |i: usize| (i + nhull - 1) % nhull;

    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i);
        let ni = next(i);
        let pv = &verts[hull[pi]];
        let cv = &verts[hull[i]];
        let nv = &verts[hull[ni]];
        let d = vdist2(pv, cv) + vdist2(cv, nv) + vdist2(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    // Add first triangle
    tris.push([hull[start] as i32, hull[left] as i32, hull[right] as i32, 0]);

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    while next(left) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left);
        let nright = prev(right);

        let cvleft = &verts[hull[left]];
        let nvleft = &verts[hull[nleft]];
        let cvright = &verts[hull[right]];
        let nvright = &verts[hull[nright]];
        let dleft = vdist2(cvleft, nvleft) + vdist2(nvleft, cvright);
        let dright = vdist2(cvright, nvright) + vdist2(cvleft, nvright);

        if dleft < dright {
            tris.push([hull[left] as i32, hull[nleft] as i32, hull[right] as i32, 0]);
            left = nleft;
        } else {
            tris.push([hull[left] as i32, hull[nright] as i32, hull[right] as i32, 0]);
            right = nright;
        }
    }
}

#[inline]
fn get_jitter_x(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

#[inline]
fn get_jitter_y(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn on_hull(a: i32, b: i32, hull: &[usize]) -> bool {
    // All triangle vertices are in hull
    let nhull = hull.len();
    if nhull < 3 {
        return false;
    }
    let mut j = nhull - 1;
    for i in 0..nhull {
        if a == hull[j] as i32 && b == hull[i] as i32 {
            return true;
        }
        j = i;
    }
    false
}

/// Marks the triangle edges lying on the hull
fn set_tri_flags(tris: &mut [[i32; 4]], hull: &[usize]) {
    for t in tris.iter_mut() {
        let (a, b, c) = (t[0], t[1], t[2]);
        let mut flags = 0i32;
        if on_hull(a, b, hull) {
            flags |= DETAIL_EDGE_BOUNDARY as i32;
        }
        if on_hull(b, c, hull) {
            flags |= (DETAIL_EDGE_BOUNDARY as i32) << 2;
        }
        if on_hull(c, a, hull) {
            flags |= (DETAIL_EDGE_BOUNDARY as i32) << 4;
        }
        t[3] = flags;
    }
}

#[allow(clippy::too_many_arguments)]
fn build_poly_detail(
    input: &[[f32; 3]],
    sample_dist: f32,
    sample_max_error: f32,
    height_search_radius: i32,
    chf: &CompactHeightfield,
    hp: &HeightPatch,
    verts: &mut Vec<[f32; 3]>,
    tris: &mut Vec<[i32; 4]>,
) {
    let nin = input.len();
    let mut hull: Vec<usize> = Vec::with_capacity(MAX_VERTS);

    verts.clear();
    verts.extend_from_slice(input);
    tris.clear();

    let cs = chf.cs;
    let ics = 1.0 / cs;

    // Calculate minimum extents of the polygon based on input data.
    let min_extent = poly_min_extent(verts);

    // Tessellate outlines.
    // This is done in separate pass in order to ensure
    // seamless height values across the ply boundaries.
    if sample_dist > 0.0 {
        let mut edge = [[0.0f32; 3]; MAX_VERTS_PER_EDGE + 1];
        let mut j = nin - 1;
        for i in 0..nin {
            let mut vj = &input[j];
            let mut vi = &input[i];
            let mut swapped = false;
            // Make sure the segments are always handled in same order
            // using lexological sort or else there will be seams.
            if (vj[0] - vi[0]).abs() < 1e-6 {
                if vj[2] > vi[2] {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj[0] > vi[0] {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }

            // Create samples along the edge.
            let dx = vi[0] - vj[0];
            let dy = vi[1] - vj[1];
            let dz = vi[2] - vj[2];
            let d = (dx * dx + dz * dz).sqrt();
            let mut nn = 1 + (d / sample_dist).floor() as usize;
            if nn >= MAX_VERTS_PER_EDGE {
                nn = MAX_VERTS_PER_EDGE - 1;
            }
            if verts.len() + nn >= MAX_VERTS {
                nn = (MAX_VERTS - 1).saturating_sub(verts.len()).max(1);
            }

            for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                let u = k as f32 / nn as f32;
                pos[0] = vj[0] + dx * u;
                pos[1] = vj[1] + dy * u;
                pos[2] = vj[2] + dz * u;
                pos[1] = get_height(pos[0], pos[1], pos[2], ics, chf.ch, height_search_radius, hp) as f32
                    * chf.ch;
            }

            // Simplify samples.
            let mut idx: Vec<usize> = vec![0, nn];
            let mut k = 0;
            while k + 1 < idx.len() {
                let a = idx[k];
                let b = idx[k + 1];
                let va = &edge[a];
                let vb = &edge[b];
                // Find maximum deviation along the segment.
                let mut maxd = 0.0;
                let mut maxi = None;
                for (m, em) in edge.iter().enumerate().take(b).skip(a + 1) {
                    let dev = distance_pt_seg(em, va, vb);
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                // If the max deviation is larger than accepted error,
                // add new point, else continue to next segment.
                match maxi {
                    Some(m) if maxd > sample_max_error * sample_max_error => idx.insert(k + 1, m),
                    _ => k += 1,
                }
            }

            hull.push(j);
            // Add new vertices.
            let inner = &idx[1..idx.len() - 1];
            if swapped {
                for &k in inner.iter().rev() {
                    hull.push(verts.len());
                    verts.push(edge[k]);
                }
            } else {
                for &k in inner {
                    hull.push(verts.len());
                    verts.push(edge[k]);
                }
            }
            j = i;
        }
    } else {
        hull.extend(0..nin);
    }

    // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
    if min_extent < sample_dist * 2.0 || sample_dist <= 0.0 {
        triangulate_hull(verts, &hull, nin, tris);
        set_tri_flags(tris, &hull);
        return;
    }

    // Tessellate the base mesh.
    // The hull triangulation gives a better result for long thin
    // triangles when there are no internal points.
    triangulate_hull(verts, &hull, nin, tris);

    if tris.is_empty() {
        // Could not triangulate the poly, make sure there is some valid data there.
        log::warn!("could not triangulate detail polygon ({} verts)", verts.len());
        return;
    }

    // Create sample locations in a grid.
    let mut bmin = input[0];
    let mut bmax = input[0];
    for v in &input[1..] {
        for k in 0..3 {
            bmin[k] = bmin[k].min(v[k]);
            bmax[k] = bmax[k].max(v[k]);
        }
    }
    let x0 = (bmin[0] / sample_dist).floor() as i32;
    let x1 = (bmax[0] / sample_dist).ceil() as i32;
    let z0 = (bmin[2] / sample_dist).floor() as i32;
    let z1 = (bmax[2] / sample_dist).ceil() as i32;

    // (x, height, z, added)
    let mut samples: Vec<(i32, u16, i32, bool)> = Vec::new();
    for z in z0..z1 {
        for x in x0..x1 {
            let pt = [
                x as f32 * sample_dist,
                (bmax[1] + bmin[1]) * 0.5,
                z as f32 * sample_dist,
            ];
            // Make sure the samples are not too close to the edges.
            if dist_to_poly(input, &pt) > -sample_dist / 2.0 {
                continue;
            }
            let h = get_height(pt[0], pt[1], pt[2], ics, chf.ch, height_search_radius, hp);
            samples.push((x, h, z, false));
        }
    }

    // Add the samples starting from the one that has the most
    // error. The procedure stops when all samples are added
    // or when the max error is within treshold.
    let mut edges: Vec<[i32; 4]> = Vec::new();
    for _ in 0..samples.len() {
        if verts.len() >= MAX_VERTS {
            break;
        }

        // Find sample with most error.
        let mut bestpt = [0.0f32; 3];
        let mut bestd = 0.0;
        let mut besti = None;
        for (i, s) in samples.iter().enumerate() {
            if s.3 {
                continue;
            }
            // The sample location is jittered to get rid of some bad triangulations
            // which are cause by symmetrical data from the grid structure.
            let pt = [
                s.0 as f32 * sample_dist + get_jitter_x(i) * cs * 0.1,
                s.1 as f32 * chf.ch,
                s.2 as f32 * sample_dist + get_jitter_y(i) * cs * 0.1,
            ];
            let Some(d) = dist_to_tri_mesh(&pt, verts, tris) else {
                // did not hit the mesh.
                continue;
            };
            if d > bestd {
                bestd = d;
                besti = Some(i);
                bestpt = pt;
            }
        }

        // If the max error is within accepted threshold, stop tesselating.
        let Some(besti) = besti else {
            break;
        };
        if bestd <= sample_max_error {
            break;
        }

        // Mark sample as added.
        samples[besti].3 = true;
        // Add the new sample point.
        verts.push(bestpt);

        // Create new triangulation.
        // TODO: add the new point incrementally instead of rebuilding the triangulation.
        delaunay_hull(verts, &hull, tris, &mut edges);
    }

    if tris.len() > MAX_TRIS {
        log::error!(
            "shrinking detail triangle count from {} to max {}",
            tris.len(),
            MAX_TRIS
        );
        tris.truncate(MAX_TRIS);
    }

    set_tri_flags(tris, &hull);
}

/// Finds a seed span close to the polygon center by walking from the
/// closest polygon vertex.
fn seed_array_with_poly_center(
    chf: &CompactHeightfield,
    poly: &[u16],
    verts: &[u16],
    bs: i32,
    hp: &mut HeightPatch,
    queue: &mut VecDeque<(i32, i32, usize)>,
) -> Result<()> {
    const OFFSET: [(i32, i32); 9] = [
        (0, 0),
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    // Find cell closest to a poly vertex
    let mut start: Option<(i32, i32, usize)> = None;
    let mut dmin = RC_UNSET_HEIGHT as i32;
    'search: for &pv in poly {
        let v = &verts[pv as usize * 3..pv as usize * 3 + 3];
        for &(ox, oz) in &OFFSET {
            if dmin == 0 {
                break 'search;
            }
            let ax = v[0] as i32 + ox;
            let ay = v[1] as i32;
            let az = v[2] as i32 + oz;
            if ax < hp.xmin || ax >= hp.xmin + hp.width || az < hp.ymin || az >= hp.ymin + hp.height {
                continue;
            }
            let c = chf.cell(ax + bs, az + bs);
            for i in c.index as usize..(c.index + c.count) as usize {
                let d = (ay - chf.spans[i].y as i32).abs();
                if d < dmin {
                    start = Some((ax, az, i));
                    dmin = d;
                }
            }
        }
    }

    let Some((start_x, start_y, start_span)) = start else {
        return Err(Error::NavMeshGeneration(
            "detail mesh: no span found near polygon".to_string(),
        ));
    };

    // Find center of the polygon
    let n = poly.len() as i32;
    let pcx = poly.iter().map(|&p| verts[p as usize * 3] as i32).sum::<i32>() / n;
    let pcy = poly.iter().map(|&p| verts[p as usize * 3 + 2] as i32).sum::<i32>() / n;

    let mut stack = vec![(start_x, start_y, start_span)];
    let mut dirs = [0usize, 1, 2, 3];
    hp.data.fill(0);

    // A DFS (rather than a straight walk) is needed, contour simplification
    // can leave pockets where a direct walk gets stuck.
    let mut current = (start_x, start_y, start_span);
    while let Some(top) = stack.pop() {
        current = top;
        let (cx, cy, ci) = current;

        if cx == pcx && cy == pcy {
            break;
        }

        // If we are already at the correct X-position, prefer direction
        // directly towards the center in the Y-axis; otherwise prefer
        // direction in the X-axis
        let direct_dir = if cx == pcx {
            get_dir_for_offset(0, if pcy > cy { 1 } else { -1 })
        } else {
            get_dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
        }
        .unwrap_or(0);

        // Push the direct dir last so we start with this on next iteration
        dirs.swap(direct_dir, 3);

        let cs = chf.spans[ci];
        for &dir in &dirs {
            if get_con(&cs, dir) == RC_NOT_CONNECTED {
                continue;
            }
            let new_x = cx + get_dir_offset_x(dir);
            let new_y = cy + get_dir_offset_y(dir);

            let hpx = new_x - hp.xmin;
            let hpy = new_y - hp.ymin;
            if hpx < 0 || hpx >= hp.width || hpy < 0 || hpy >= hp.height {
                continue;
            }
            let idx = (hpx + hpy * hp.width) as usize;
            if hp.data[idx] != 0 {
                continue;
            }
            hp.data[idx] = 1;
            let ni = chf.cell(new_x + bs, new_y + bs).index as usize + get_con(&cs, dir) as usize;
            stack.push((new_x, new_y, ni));
        }

        dirs.swap(direct_dir, 3);
    }

    let (cx, cy, ci) = current;
    if cx != pcx || cy != pcy {
        log::warn!("walk towards polygon center failed to reach center");
    }

    // Height data seeds are given in coordinates with borders
    queue.clear();
    queue.push_back((cx + bs, cy + bs, ci));

    hp.data.fill(RC_UNSET_HEIGHT);
    hp.data[((cx - hp.xmin) + (cy - hp.ymin) * hp.width) as usize] = chf.spans[ci].y;
    Ok(())
}

fn get_height_data(
    chf: &CompactHeightfield,
    poly: &[u16],
    verts: &[u16],
    bs: i32,
    hp: &mut HeightPatch,
    region: u16,
) -> Result<()> {
    // Reads to the compact heightfield are offset by border size (bs)
    // since border size offset is already removed from the polymesh vertices.
    let len = (hp.width * hp.height) as usize;
    if hp.data.len() < len {
        hp.data.resize(len, RC_UNSET_HEIGHT);
    }
    hp.data.truncate(len);
    hp.data.fill(RC_UNSET_HEIGHT);

    let mut queue: VecDeque<(i32, i32, usize)> = VecDeque::new();
    let mut empty = true;

    // We cannot sample from this poly if it was created from polys
    // of different regions. If it was then it could potentially be overlapping
    // with polys of that region and the heights sampled here could be wrong.
    if region != RC_MULTIPLE_REGS {
        // Copy the height from the same region, and mark region borders
        // as seed points to fill the rest.
        for hy in 0..hp.height {
            let y = hp.ymin + hy + bs;
            for hx in 0..hp.width {
                let x = hp.xmin + hx + bs;
                let c = chf.cell(x, y);
                for i in c.index as usize..(c.index + c.count) as usize {
                    let s = &chf.spans[i];
                    if s.reg != region {
                        continue;
                    }
                    // Store height
                    hp.data[(hx + hy * hp.width) as usize] = s.y;
                    empty = false;

                    // If any of the neighbours is not in same region,
                    // add the current location as flood fill start
                    let border = (0..4).any(|dir| {
                        get_con(s, dir) != RC_NOT_CONNECTED
                            && chf.spans[chf.neighbour_index(x, y, i, dir)].reg != region
                    });
                    if border {
                        queue.push_back((x, y, i));
                    }
                    break;
                }
            }
        }
    }

    // if the polygon does not contain any points from the current region (rare, but happens)
    // or if it could potentially be overlapping polygons of the same region,
    // then use the center as the seed point.
    if empty {
        seed_array_with_poly_center(chf, poly, verts, bs, hp, &mut queue)?;
    }

    // The seed is centered in the polygon, so a BFS to collect
    // height data will not move onto overlapping polygons.
    while let Some((cx, cy, ci)) = queue.pop_front() {
        let cs = chf.spans[ci];
        for dir in 0..4 {
            if get_con(&cs, dir) == RC_NOT_CONNECTED {
                continue;
            }
            let ax = cx + get_dir_offset_x(dir);
            let ay = cy + get_dir_offset_y(dir);
            let hx = ax - hp.xmin - bs;
            let hy = ay - hp.ymin - bs;

            if hx < 0 || hx >= hp.width || hy < 0 || hy >= hp.height {
                continue;
            }
            let idx = (hx + hy * hp.width) as usize;
            if hp.data[idx] != RC_UNSET_HEIGHT {
                continue;
            }

            let ai = chf.neighbour_index(cx, cy, ci, dir);
            hp.data[idx] = chf.spans[ai].y;
            queue.push_back((ax, ay, ai));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, ContourSet};
    use crate::heightfield::Heightfield;
    use crate::{build_distance_field, build_regions, RC_WALKABLE_AREA};
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn plane_pipeline(size: i32) -> (CompactHeightfield, PolyMesh) {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 10.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 0, 20).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::default()).unwrap();
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        (chf, mesh)
    }

    #[test]
    fn test_circum_circle() {
        let (c, r) = circum_circle(&[0.0, 0.0, 0.0], &[2.0, 0.0, 0.0], &[0.0, 0.0, 2.0]);
        assert_relative_eq!(c[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(c[2], 1.0, epsilon = 1e-5);
        assert_relative_eq!(r, 2.0f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_triangulate_hull_square() {
        let verts = [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        let mut tris = Vec::new();
        triangulate_hull(&verts, &[0, 1, 2, 3], 4, &mut tris);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_detail_mesh_on_flat_plane() {
        let (chf, mesh) = plane_pipeline(10);
        let dmesh = PolyMeshDetail::build_from_poly_mesh(&mesh, &chf, 6.0, 1.0).unwrap();

        assert_eq!(dmesh.meshes.len(), mesh.npolys);
        for m in &dmesh.meshes {
            assert!(m[1] >= 3);
            assert!(m[3] >= 1);
            for t in &dmesh.triangles[m[2] as usize..(m[2] + m[3]) as usize] {
                assert!((t[0] as u32) < m[1]);
                assert!((t[1] as u32) < m[1]);
                assert!((t[2] as u32) < m[1]);
            }
        }
        // The plane surface is at y = 2 * ch, detail heights sit one cell above it.
        for v in dmesh.vertices.chunks_exact(3) {
            assert_relative_eq!(v[1], 1.5, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_detail_mesh_without_sampling() {
        let (chf, mesh) = plane_pipeline(8);
        let dmesh = PolyMeshDetail::build_from_poly_mesh(&mesh, &chf, 0.0, 1.0).unwrap();
        for (i, m) in dmesh.meshes.iter().enumerate() {
            assert_eq!(m[1] as usize, mesh.poly_vert_count(i));
            assert_eq!(m[3] as usize, mesh.poly_vert_count(i) - 2);
            // Every hull edge is flagged as boundary.
            let flagged: u32 = dmesh.triangles[m[2] as usize..(m[2] + m[3]) as usize]
                .iter()
                .map(|t| (0..3).filter(|k| (t[3] >> (k * 2)) & 0x3 != 0).count() as u32)
                .sum();
            assert_eq!(flagged, m[1]);
        }
    }

    #[test]
    fn test_merge_detail_meshes() {
        let (chf, mesh) = plane_pipeline(8);
        let a = PolyMeshDetail::build_from_poly_mesh(&mesh, &chf, 0.0, 1.0).unwrap();
        let merged = PolyMeshDetail::merge(&[&a, &a]);
        assert_eq!(merged.meshes.len(), a.meshes.len() * 2);
        assert_eq!(merged.vert_count(), a.vert_count() * 2);
        assert_eq!(merged.meshes[a.meshes.len()][0] as usize, a.vert_count());
    }
}
