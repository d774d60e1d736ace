//! Triangle rasterization for Recast
//!
//! Triangles are clipped against each row and then each cell of the
//! heightfield grid; the vertical extent of each clipped piece becomes a span.

use recast_common::{overlap_bounds, Error, Result};

use crate::heightfield::Heightfield;
use crate::RC_SPAN_MAX_HEIGHT;

/// Splits a convex polygon along the plane `axis = x`.
///
/// Returns the part at or below `x` and the part above it.
fn divide_poly(input: &[[f32; 3]], x: f32, axis: usize) -> (Vec<[f32; 3]>, Vec<[f32; 3]>) {
    let mut below = Vec::with_capacity(input.len() + 2);
    let mut above = Vec::with_capacity(input.len() + 2);
    if input.is_empty() {
        return (below, above);
    }

    let delta: Vec<f32> = input.iter().map(|v| x - v[axis]).collect();
    let n = input.len();
    let mut b = n - 1;
    for a in 0..n {
        let same_side = (delta[a] >= 0.0) == (delta[b] >= 0.0);
        if !same_side {
            let s = delta[b] / (delta[b] - delta[a]);
            let va = input[a];
            let vb = input[b];
            let p = [
                vb[0] + (va[0] - vb[0]) * s,
                vb[1] + (va[1] - vb[1]) * s,
                vb[2] + (va[2] - vb[2]) * s,
            ];
            below.push(p);
            above.push(p);
            if delta[a] > 0.0 {
                below.push(va);
            } else if delta[a] < 0.0 {
                above.push(va);
            }
        } else {
            if delta[a] >= 0.0 {
                below.push(input[a]);
                if delta[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(input[a]);
        }
        b = a;
    }
    (below, above)
}

/// Rasterizes a single triangle into the heightfield.
///
/// Triangles completely outside the heightfield bounds are ignored.
pub fn rasterize_triangle(
    v0: &[f32; 3],
    v1: &[f32; 3],
    v2: &[f32; 3],
    area: u8,
    heightfield: &mut Heightfield,
    flag_merge_threshold: i32,
) -> Result<()> {
    let hf_bmin = heightfield.bmin.to_array();
    let hf_bmax = heightfield.bmax.to_array();
    let cs = heightfield.cs;
    let ics = 1.0 / heightfield.cs;
    let ich = 1.0 / heightfield.ch;
    let w = heightfield.width;
    let h = heightfield.height;
    let by = hf_bmax[1] - hf_bmin[1];

    let tmin = [
        v0[0].min(v1[0]).min(v2[0]),
        v0[1].min(v1[1]).min(v2[1]),
        v0[2].min(v1[2]).min(v2[2]),
    ];
    let tmax = [
        v0[0].max(v1[0]).max(v2[0]),
        v0[1].max(v1[1]).max(v2[1]),
        v0[2].max(v1[2]).max(v2[2]),
    ];
    if !overlap_bounds(&hf_bmin, &hf_bmax, &tmin, &tmax) {
        return Ok(());
    }

    let z0 = (((tmin[2] - hf_bmin[2]) * ics) as i32).clamp(-1, h - 1);
    let z1 = (((tmax[2] - hf_bmin[2]) * ics) as i32).clamp(0, h - 1);

    let mut remaining = vec![*v0, *v1, *v2];
    for z in z0..=z1 {
        let cell_z = hf_bmin[2] + z as f32 * cs;
        let (row, rest) = divide_poly(&remaining, cell_z + cs, 2);
        remaining = rest;
        if row.len() < 3 || z < 0 {
            continue;
        }

        let mut min_x = row[0][0];
        let mut max_x = row[0][0];
        for v in &row[1..] {
            min_x = min_x.min(v[0]);
            max_x = max_x.max(v[0]);
        }
        let x0 = ((min_x - hf_bmin[0]) * ics) as i32;
        let x1 = ((max_x - hf_bmin[0]) * ics) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        let mut row_rest = row;
        for x in x0..=x1 {
            let cx = hf_bmin[0] + x as f32 * cs;
            let (cell, rest) = divide_poly(&row_rest, cx + cs, 0);
            row_rest = rest;
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let mut span_min = cell[0][1];
            let mut span_max = cell[0][1];
            for v in &cell[1..] {
                span_min = span_min.min(v[1]);
                span_max = span_max.max(v[1]);
            }
            span_min -= hf_bmin[1];
            span_max -= hf_bmin[1];
            if span_max < 0.0 || span_min > by {
                continue;
            }
            let span_min = span_min.max(0.0);
            let span_max = span_max.min(by);

            let ismin = ((span_min * ich).floor() as i32).clamp(0, RC_SPAN_MAX_HEIGHT as i32);
            let ismax =
                ((span_max * ich).ceil() as i32).clamp(ismin + 1, RC_SPAN_MAX_HEIGHT as i32);

            heightfield.add_span(
                x,
                z,
                ismin as u16,
                ismax as u16,
                area,
                flag_merge_threshold,
            )?;
        }
    }

    Ok(())
}

/// Rasterizes indexed triangles with one area id per triangle
pub fn rasterize_triangles(
    heightfield: &mut Heightfield,
    verts: &[f32],
    indices: &[i32],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    if indices.len() % 3 != 0 {
        return Err(Error::InvalidMesh(
            "index array length must be a multiple of 3".to_string(),
        ));
    }
    let nverts = (verts.len() / 3) as i32;
    let ntris = indices.len() / 3;
    if areas.len() < ntris {
        return Err(Error::InvalidMesh(format!(
            "expected {} triangle areas, got {}",
            ntris,
            areas.len()
        )));
    }

    for (i, tri) in indices.chunks_exact(3).enumerate() {
        if tri.iter().any(|&v| v < 0 || v >= nverts) {
            return Err(Error::InvalidMesh(format!(
                "triangle {} references a vertex out of range",
                i
            )));
        }
        let v0 = recast_common::vget(verts, tri[0] as usize);
        let v1 = recast_common::vget(verts, tri[1] as usize);
        let v2 = recast_common::vget(verts, tri[2] as usize);
        rasterize_triangle(&v0, &v1, &v2, areas[i], heightfield, flag_merge_threshold)?;
    }
    Ok(())
}

/// Rasterizes an unindexed triangle list (9 floats per triangle)
pub fn rasterize_triangle_soup(
    heightfield: &mut Heightfield,
    verts: &[f32],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    for (i, tri) in verts.chunks_exact(9).enumerate() {
        let area = areas.get(i).copied().unwrap_or(crate::RC_NULL_AREA);
        let v0 = [tri[0], tri[1], tri[2]];
        let v1 = [tri[3], tri[4], tri[5]];
        let v2 = [tri[6], tri[7], tri[8]];
        rasterize_triangle(&v0, &v1, &v2, area, heightfield, flag_merge_threshold)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RC_WALKABLE_AREA;
    use glam::Vec3;

    #[test]
    fn test_divide_poly() {
        let tri = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 2.0]];
        let (below, above) = divide_poly(&tri, 1.0, 0);
        assert!(below.len() >= 3);
        assert!(above.len() >= 3);
        assert!(below.iter().all(|v| v[0] <= 1.0 + 1e-6));
        assert!(above.iter().all(|v| v[0] >= 1.0 - 1e-6));

        let (below, above) = divide_poly(&[], 1.0, 0);
        assert!(below.is_empty() && above.is_empty());
    }

    #[test]
    fn test_rasterize_plane_with_fine_cells() {
        // Row and column splits use up the clipped polygon before the last cell.
        let mut hf = Heightfield::new(50, 50, Vec3::ZERO, Vec3::new(10.0, 1.0, 10.0), 0.2, 0.2);
        let verts = [0.0, 0.0, 0.0, 0.0, 0.0, 10.0, 10.0, 0.0, 10.0, 10.0, 0.0, 0.0];
        let indices = [0, 1, 2, 0, 2, 3];
        let areas = [RC_WALKABLE_AREA; 2];
        rasterize_triangles(&mut hf, &verts, &indices, &areas, 1).unwrap();

        for z in 0..50 {
            for x in 0..50 {
                assert!(hf.column(x, z).next().is_some(), "cell ({}, {})", x, z);
            }
        }
    }

    #[test]
    fn test_rasterize_quad_covers_grid() {
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 4.0), 1.0, 0.5);
        let verts = [
            0.0, 1.0, 0.0, 4.0, 1.0, 0.0, 4.0, 1.0, 4.0, 0.0, 1.0, 4.0,
        ];
        let indices = [0, 3, 2, 0, 2, 1];
        let areas = [RC_WALKABLE_AREA; 2];
        rasterize_triangles(&mut hf, &verts, &indices, &areas, 1).unwrap();

        for z in 0..4 {
            for x in 0..4 {
                let spans: Vec<_> = hf.column(x, z).collect();
                assert_eq!(spans.len(), 1, "cell ({}, {})", x, z);
                assert_eq!(spans[0].smax, 3);
                assert_eq!(spans[0].area, RC_WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_rasterize_outside_bounds_is_ignored() {
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 4.0), 1.0, 0.5);
        rasterize_triangle(
            &[10.0, 0.0, 10.0],
            &[11.0, 0.0, 10.0],
            &[10.0, 0.0, 11.0],
            RC_WALKABLE_AREA,
            &mut hf,
            1,
        )
        .unwrap();
        assert_eq!(hf.span_count(), 0);
    }

    #[test]
    fn test_bad_indices_are_rejected() {
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 4.0), 1.0, 0.5);
        let verts = [0.0; 9];
        assert!(rasterize_triangles(&mut hf, &verts, &[0, 1, 5], &[1], 1).is_err());
        assert!(rasterize_triangles(&mut hf, &verts, &[0, 1], &[1], 1).is_err());
    }
}
