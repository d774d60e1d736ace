//! Geometric primitives shared by the mesh builders and the runtime queries
//!
//! Unless stated otherwise, "2D" functions operate on the xz-plane and ignore
//! the y component of their inputs.

use crate::math::{vdot_2d, vget, vperp_2d, vsub};

/// Signed area of the triangle (a, b, c) on the xz-plane, times two.
///
/// Positive when the points are ordered counter-clockwise when viewed from
/// above (+y).
#[inline]
pub fn tri_area_2d(a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Determines if two axis-aligned bounding boxes overlap
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Determines if two quantized bounding boxes overlap
#[inline]
pub fn overlap_quant_bounds(
    amin: &[u16; 3],
    amax: &[u16; 3],
    bmin: &[u16; 3],
    bmax: &[u16; 3],
) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Finds the closest point on the triangle (a, b, c) to `p`
pub fn closest_pt_point_triangle(p: &[f32; 3], a: &[f32; 3], b: &[f32; 3], c: &[f32; 3]) -> [f32; 3] {
    let ab = vsub(b, a);
    let ac = vsub(c, a);
    let ap = vsub(p, a);
    let d1 = crate::vdot(&ab, &ap);
    let d2 = crate::vdot(&ac, &ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = vsub(p, b);
    let d3 = crate::vdot(&ab, &bp);
    let d4 = crate::vdot(&ac, &bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return crate::vmad(a, &ab, v);
    }

    let cp = vsub(p, c);
    let d5 = crate::vdot(&ab, &cp);
    let d6 = crate::vdot(&ac, &cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return crate::vmad(a, &ac, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let bc = vsub(c, b);
        return crate::vmad(b, &bc, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    [
        a[0] + ab[0] * v + ac[0] * w,
        a[1] + ab[1] * v + ac[1] * w,
        a[2] + ab[2] * v + ac[2] * w,
    ]
}

/// Returns the height of the triangle at the xz location of `p`, if `p` lies
/// over the triangle.
pub fn closest_height_point_triangle(
    p: &[f32; 3],
    a: &[f32; 3],
    b: &[f32; 3],
    c: &[f32; 3],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = vsub(c, a);
    let v1 = vsub(b, a);
    let v2 = vsub(p, a);

    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];

    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Result of clipping a segment against a convex polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyIntersection {
    /// Parametric entry point on the segment
    pub tmin: f32,
    /// Parametric exit point on the segment
    pub tmax: f32,
    /// Polygon edge the segment enters through, if it starts outside
    pub seg_min: Option<usize>,
    /// Polygon edge the segment exits through, if it ends outside
    pub seg_max: Option<usize>,
}

/// Clips the segment p0-p1 against a convex polygon on the xz-plane.
///
/// `verts` is a flat `[x, y, z, ...]` array of `nverts` points.
pub fn intersect_segment_poly_2d(
    p0: &[f32; 3],
    p1: &[f32; 3],
    verts: &[f32],
    nverts: usize,
) -> Option<SegmentPolyIntersection> {
    const EPS: f32 = 0.000_000_01;

    let mut tmin = 0.0f32;
    let mut tmax = 1.0f32;
    let mut seg_min = None;
    let mut seg_max = None;

    let dir = vsub(p1, p0);

    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = vget(verts, i);
        let vj = vget(verts, j);
        let edge = vsub(&vi, &vj);
        let diff = vsub(p0, &vj);
        let n = vperp_2d(&edge, &diff);
        let d = vperp_2d(&dir, &edge);
        if d.abs() < EPS {
            // Parallel to the edge: either fully outside or irrelevant.
            if n < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = n / d;
        if d < 0.0 {
            if t > tmin {
                tmin = t;
                seg_min = Some(j);
                if tmin > tmax {
                    return None;
                }
            }
        } else if t < tmax {
            tmax = t;
            seg_max = Some(j);
            if tmax < tmin {
                return None;
            }
        }
        j = i;
    }

    Some(SegmentPolyIntersection {
        tmin,
        tmax,
        seg_min,
        seg_max,
    })
}

/// Squared distance from `pt` to the segment p-q on the xz-plane, together
/// with the parametric position of the closest point.
pub fn dist_pt_seg_sqr_2d(pt: &[f32; 3], p: &[f32; 3], q: &[f32; 3]) -> (f32, f32) {
    let pqx = q[0] - p[0];
    let pqz = q[2] - p[2];
    let dx = pt[0] - p[0];
    let dz = pt[2] - p[2];
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pqx - pt[0];
    let dz = p[2] + t * pqz - pt[2];
    (dx * dx + dz * dz, t)
}

/// Intersects two segments on the xz-plane, returning the parametric
/// positions along each segment.
pub fn intersect_seg_seg_2d(
    ap: &[f32; 3],
    aq: &[f32; 3],
    bp: &[f32; 3],
    bq: &[f32; 3],
) -> Option<(f32, f32)> {
    let u = vsub(aq, ap);
    let v = vsub(bq, bp);
    let w = vsub(ap, bp);
    let d = perp_xz(&u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    let s = perp_xz(&v, &w) / d;
    let t = perp_xz(&u, &w) / d;
    Some((s, t))
}

#[inline]
fn perp_xz(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[2] - a[2] * b[0]
}

/// Even-odd point in polygon test on the xz-plane
pub fn point_in_polygon(pt: &[f32; 3], verts: &[f32], nverts: usize) -> bool {
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = vget(verts, i);
        let vj = vget(verts, j);
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point in polygon test that also reports the squared distance and the
/// parametric position of the closest point on every edge.
///
/// Edge `j` runs from vertex `j` to vertex `j + 1`.
pub fn distance_pt_poly_edges_sqr(
    pt: &[f32; 3],
    verts: &[f32],
    nverts: usize,
    ed: &mut [f32],
    et: &mut [f32],
) -> bool {
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = vget(verts, i);
        let vj = vget(verts, j);
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        let (d, t) = dist_pt_seg_sqr_2d(pt, &vj, &vi);
        ed[j] = d;
        et[j] = t;
        j = i;
    }
    inside
}

/// Centroid of the polygon vertices referenced by `idx`
pub fn calc_poly_center(idx: &[u16], verts: &[f32]) -> [f32; 3] {
    let mut c = [0.0f32; 3];
    for &i in idx {
        let v = vget(verts, i as usize);
        c[0] += v[0];
        c[1] += v[1];
        c[2] += v[2];
    }
    let s = 1.0 / idx.len().max(1) as f32;
    [c[0] * s, c[1] * s, c[2] * s]
}

/// Picks a point inside a convex polygon from two uniform random numbers
/// in `[0, 1)`.
pub fn random_point_in_convex_poly(pts: &[f32], npts: usize, s: f32, t: f32) -> [f32; 3] {
    let mut areas = vec![0.0f32; npts];
    let mut areasum = 0.0f32;
    let p0 = vget(pts, 0);
    for i in 2..npts {
        areas[i] = tri_area_2d(&p0, &vget(pts, i - 1), &vget(pts, i));
        areasum += areas[i].max(0.001);
    }

    let thr = s * areasum;
    let mut acc = 0.0f32;
    let mut u = 1.0f32;
    let mut tri = npts - 1;
    for (i, &dacc) in areas.iter().enumerate().skip(2) {
        if thr >= acc && thr < acc + dacc {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    let pa = p0;
    let pb = vget(pts, tri - 1);
    let pc = vget(pts, tri);
    [
        a * pa[0] + b * pb[0] + c * pc[0],
        a * pa[1] + b * pb[1] + c * pc[1],
        a * pa[2] + b * pb[2] + c * pc[2],
    ]
}

fn project_poly(axis: &[f32; 3], poly: &[f32], npoly: usize) -> (f32, f32) {
    let first = vdot_2d(axis, &vget(poly, 0));
    let mut rmin = first;
    let mut rmax = first;
    for i in 1..npoly {
        let d = vdot_2d(axis, &vget(poly, i));
        rmin = rmin.min(d);
        rmax = rmax.max(d);
    }
    (rmin, rmax)
}

#[inline]
fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32, eps: f32) -> bool {
    !((amin + eps) > bmax || (amax - eps) < bmin)
}

/// Separating axis overlap test of two convex polygons on the xz-plane
pub fn overlap_poly_poly_2d(polya: &[f32], npolya: usize, polyb: &[f32], npolyb: usize) -> bool {
    const EPS: f32 = 1e-4;

    for (poly, npoly) in [(polya, npolya), (polyb, npolyb)] {
        let mut j = npoly - 1;
        for i in 0..npoly {
            let va = vget(poly, j);
            let vb = vget(poly, i);
            let n = [vb[2] - va[2], 0.0, -(vb[0] - va[0])];
            let (amin, amax) = project_poly(&n, polya, npolya);
            let (bmin, bmax) = project_poly(&n, polyb, npolyb);
            if !overlap_range(amin, amax, bmin, bmax, EPS) {
                return false;
            }
            j = i;
        }
    }
    true
}

/// Returns the (min, max) extent of a flat `[x, y, z, ...]` point list.
pub fn calc_bounds(verts: &[f32]) -> ([f32; 3], [f32; 3]) {
    let mut bmin = [f32::MAX; 3];
    let mut bmax = [f32::MIN; 3];
    for v in verts.chunks_exact(3) {
        for k in 0..3 {
            bmin[k] = bmin[k].min(v[k]);
            bmax[k] = bmax[k].max(v[k]);
        }
    }
    (bmin, bmax)
}
