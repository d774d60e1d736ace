//! Input triangle helpers
//!
//! Slope based area marking, bounds of indexed geometry and merging of
//! several indexed meshes into one.

use std::collections::HashMap;

use glam::Vec3;

use recast_common::{Error, Result};

use crate::{RC_NULL_AREA, RC_WALKABLE_AREA};

fn calc_tri_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

fn vertex(verts: &[f32], i: i32) -> Result<Vec3> {
    let idx = usize::try_from(i)
        .map_err(|_| Error::InvalidMesh(format!("negative vertex index {}", i)))?;
    verts
        .get(idx * 3..idx * 3 + 3)
        .map(|v| Vec3::new(v[0], v[1], v[2]))
        .ok_or_else(|| Error::InvalidMesh(format!("vertex index {} out of range", i)))
}

fn triangle(verts: &[f32], tri: &[i32]) -> Result<[Vec3; 3]> {
    Ok([vertex(verts, tri[0])?, vertex(verts, tri[1])?, vertex(verts, tri[2])?])
}

fn walkable_threshold(walkable_slope_angle: f32) -> f32 {
    walkable_slope_angle.to_radians().cos()
}

/// Sets the area of every triangle whose slope is below
/// `walkable_slope_angle` degrees to [`RC_WALKABLE_AREA`].
///
/// Other triangles keep their area.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    verts: &[f32],
    tris: &[i32],
    areas: &mut [u8],
) -> Result<()> {
    let thr = walkable_threshold(walkable_slope_angle);
    for (tri, area) in tris.chunks_exact(3).zip(areas.iter_mut()) {
        let [v0, v1, v2] = triangle(verts, tri)?;
        if calc_tri_normal(v0, v1, v2).y > thr {
            *area = RC_WALKABLE_AREA;
        }
    }
    Ok(())
}

/// Sets the area of every triangle steeper than `walkable_slope_angle`
/// degrees to [`RC_NULL_AREA`].
pub fn clear_unwalkable_triangles(
    walkable_slope_angle: f32,
    verts: &[f32],
    tris: &[i32],
    areas: &mut [u8],
) -> Result<()> {
    let thr = walkable_threshold(walkable_slope_angle);
    for (tri, area) in tris.chunks_exact(3).zip(areas.iter_mut()) {
        let [v0, v1, v2] = triangle(verts, tri)?;
        if calc_tri_normal(v0, v1, v2).y <= thr {
            *area = RC_NULL_AREA;
        }
    }
    Ok(())
}

/// Bounds of all vertices in `verts`
pub fn calc_bounds(verts: &[f32]) -> (Vec3, Vec3) {
    verts.chunks_exact(3).fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(bmin, bmax), v| {
            let v = Vec3::new(v[0], v[1], v[2]);
            (bmin.min(v), bmax.max(v))
        },
    )
}

/// Bounds of the vertices referenced by `indices`.
///
/// Unreferenced vertices do not contribute.
pub fn get_bounding_box(positions: &[f32], indices: &[i32]) -> Result<(Vec3, Vec3)> {
    if indices.is_empty() {
        return Err(Error::InvalidMesh("no indices".to_string()));
    }
    let mut bmin = Vec3::splat(f32::INFINITY);
    let mut bmax = Vec3::splat(f32::NEG_INFINITY);
    for &i in indices {
        let v = vertex(positions, i)?;
        bmin = bmin.min(v);
        bmax = bmax.max(v);
    }
    Ok((bmin, bmax))
}

/// Merges indexed meshes into one, welding bitwise identical positions.
pub fn merge_positions_and_indices(meshes: &[(&[f32], &[i32])]) -> Result<(Vec<f32>, Vec<i32>)> {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    let mut lookup: HashMap<[u32; 3], i32> = HashMap::new();

    for (mesh_positions, mesh_indices) in meshes {
        for &i in mesh_indices.iter() {
            let v = vertex(mesh_positions, i)?;
            let key = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
            let idx = *lookup.entry(key).or_insert_with(|| {
                positions.extend_from_slice(&[v.x, v.y, v.z]);
                (positions.len() / 3 - 1) as i32
            });
            indices.push(idx);
        }
    }

    Ok((positions, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_calc_tri_normal_points_up() {
        let n = calc_tri_normal(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(n.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mark_and_clear_by_slope() {
        let verts = [
            0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
        ];
        // A flat and a vertical triangle.
        let tris = [0, 1, 2, 0, 3, 1];

        let mut areas = [0u8; 2];
        mark_walkable_triangles(45.0, &verts, &tris, &mut areas).unwrap();
        assert_eq!(areas, [RC_WALKABLE_AREA, RC_NULL_AREA]);

        let mut areas = [RC_WALKABLE_AREA; 2];
        clear_unwalkable_triangles(45.0, &verts, &tris, &mut areas).unwrap();
        assert_eq!(areas, [RC_WALKABLE_AREA, RC_NULL_AREA]);
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let mut areas = [0u8; 1];
        assert!(mark_walkable_triangles(45.0, &[0.0; 6], &[0, 1, 2], &mut areas).is_err());
    }

    #[test]
    fn test_bounding_box_ignores_unreferenced_vertices() {
        let positions = [
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, //
            100.0, 100.0, 100.0,
        ];
        let (bmin, bmax) = get_bounding_box(&positions, &[0, 1, 2]).unwrap();
        assert_eq!(bmin, Vec3::ZERO);
        assert_eq!(bmax, Vec3::new(1.0, 0.0, 1.0));

        let (_, all_max) = calc_bounds(&positions);
        assert_eq!(all_max, Vec3::splat(100.0));
    }

    #[test]
    fn test_merge_welds_shared_positions() {
        let a_pos = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let b_pos = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let (positions, indices) =
            merge_positions_and_indices(&[(&a_pos[..], &[0, 1, 2][..]), (&b_pos[..], &[0, 2, 1][..])])
                .unwrap();

        assert_eq!(positions.len(), 4 * 3);
        assert_eq!(indices, vec![0, 1, 2, 1, 3, 2]);
    }
}
