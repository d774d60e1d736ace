//! Scalar and `[f32; 3]` vector helpers
//!
//! Detour works on plain float triples, so the helpers here take and return
//! arrays instead of `glam` vectors.

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Clamps a value between min and max
#[inline]
pub fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

/// Linear interpolation between two values
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Get the next power of 2 greater than or equal to x
#[inline]
pub fn next_pow2(x: u32) -> u32 {
    if x == 0 {
        return 1;
    }
    let mut n = x - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n + 1
}

/// Integer log base 2 (floor)
#[inline]
pub fn ilog2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    31 - x.leading_zeros()
}

/// Align value to 4-byte boundary
#[inline]
pub fn align4(x: usize) -> usize {
    (x + 3) & !3
}

/// a + b
#[inline]
pub fn vadd(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// a - b
#[inline]
pub fn vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// v * s
#[inline]
pub fn vscale(v: &[f32; 3], s: f32) -> [f32; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// v1 + v2 * s
#[inline]
pub fn vmad(v1: &[f32; 3], v2: &[f32; 3], s: f32) -> [f32; 3] {
    [v1[0] + v2[0] * s, v1[1] + v2[1] * s, v1[2] + v2[2] * s]
}

/// Linear interpolation between two points
#[inline]
pub fn vlerp(v1: &[f32; 3], v2: &[f32; 3], t: f32) -> [f32; 3] {
    [
        v1[0] + (v2[0] - v1[0]) * t,
        v1[1] + (v2[1] - v1[1]) * t,
        v1[2] + (v2[2] - v1[2]) * t,
    ]
}

/// Component-wise minimum
#[inline]
pub fn vmin(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

/// Component-wise maximum
#[inline]
pub fn vmax(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

#[inline]
pub fn vdot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Dot product on the xz-plane
#[inline]
pub fn vdot_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[2] * b[2]
}

/// Perp dot product on the xz-plane
#[inline]
pub fn vperp_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[2] * b[0] - a[0] * b[2]
}

#[inline]
pub fn vcross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn vlen(v: &[f32; 3]) -> f32 {
    vdot(v, v).sqrt()
}

#[inline]
pub fn vlen_sqr(v: &[f32; 3]) -> f32 {
    vdot(v, v)
}

#[inline]
pub fn vdist(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vlen(&vsub(b, a))
}

#[inline]
pub fn vdist_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vlen_sqr(&vsub(b, a))
}

/// Distance on the xz-plane
#[inline]
pub fn vdist_2d(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    vdist_2d_sqr(a, b).sqrt()
}

/// Squared distance on the xz-plane
#[inline]
pub fn vdist_2d_sqr(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    dx * dx + dz * dz
}

/// Returns the normalized vector, or the input when its length is zero
#[inline]
pub fn vnormalize(v: &[f32; 3]) -> [f32; 3] {
    let len = vlen(v);
    if len > 0.0 {
        vscale(v, 1.0 / len)
    } else {
        *v
    }
}

/// Checks two points for equality within a small squared tolerance
#[inline]
pub fn vequal(a: &[f32; 3], b: &[f32; 3]) -> bool {
    const THR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);
    vdist_sqr(a, b) < THR
}

#[inline]
pub fn visfinite(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[1].is_finite() && v[2].is_finite()
}

#[inline]
pub fn visfinite_2d(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[2].is_finite()
}

/// Reads the `index`-th point of a flat `[x, y, z, ...]` array
#[inline]
pub fn vget(verts: &[f32], index: usize) -> [f32; 3] {
    [verts[index * 3], verts[index * 3 + 1], verts[index * 3 + 2]]
}
