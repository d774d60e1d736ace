//! Area modification for compact heightfields
//!
//! Erosion, median filtering and the shape based area markers used to tag
//! parts of the walkable surface with custom area ids.

use glam::Vec3;
use recast_common::{point_in_polygon, Result};

use crate::compact_heightfield::{get_con, get_dir_offset_x, get_dir_offset_y, CompactHeightfield};
use crate::{RC_NOT_CONNECTED, RC_NULL_AREA};

fn insert_sort(data: &mut [u8]) {
    for i in 1..data.len() {
        let value = data[i];
        let mut j = i;
        while j > 0 && data[j - 1] > value {
            data[j] = data[j - 1];
            j -= 1;
        }
        data[j] = value;
    }
}

/// Shrinks the walkable area by `radius` cells away from obstacles and
/// unwalkable spans.
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xffu8; chf.span_count];

    // Mark boundary cells.
    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let s = &chf.spans[i];
                let mut neighbours = 0;
                for dir in 0..4 {
                    if get_con(s, dir) != RC_NOT_CONNECTED {
                        let ai = chf.neighbour_index(x, y, i, dir);
                        if chf.areas[ai] != RC_NULL_AREA {
                            neighbours += 1;
                        }
                    }
                }
                if neighbours != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut [u8], i: usize, ai: usize, cost: u16| {
        let nd = (dist[ai] as u16 + cost).min(255) as u8;
        if nd < dist[i] {
            dist[i] = nd;
        }
    };

    // Pass 1
    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let s = chf.spans[i];
                if get_con(&s, 0) != RC_NOT_CONNECTED {
                    // (-1,0)
                    let ax = x + get_dir_offset_x(0);
                    let ay = y + get_dir_offset_y(0);
                    let ai = chf.neighbour_index(x, y, i, 0);
                    relax(&mut dist, i, ai, 2);
                    // (-1,-1)
                    if get_con(&chf.spans[ai], 3) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 3);
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if get_con(&s, 3) != RC_NOT_CONNECTED {
                    // (0,-1)
                    let ax = x + get_dir_offset_x(3);
                    let ay = y + get_dir_offset_y(3);
                    let ai = chf.neighbour_index(x, y, i, 3);
                    relax(&mut dist, i, ai, 2);
                    // (1,-1)
                    if get_con(&chf.spans[ai], 2) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 2);
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    // Pass 2
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let s = chf.spans[i];
                if get_con(&s, 2) != RC_NOT_CONNECTED {
                    // (1,0)
                    let ax = x + get_dir_offset_x(2);
                    let ay = y + get_dir_offset_y(2);
                    let ai = chf.neighbour_index(x, y, i, 2);
                    relax(&mut dist, i, ai, 2);
                    // (1,1)
                    if get_con(&chf.spans[ai], 1) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 1);
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if get_con(&s, 1) != RC_NOT_CONNECTED {
                    // (0,1)
                    let ax = x + get_dir_offset_x(1);
                    let ay = y + get_dir_offset_y(1);
                    let ai = chf.neighbour_index(x, y, i, 1);
                    relax(&mut dist, i, ai, 2);
                    // (-1,1)
                    if get_con(&chf.spans[ai], 0) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 0);
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    let threshold = (radius * 2).clamp(0, 255) as u8;
    for (area, &d) in chf.areas.iter_mut().zip(dist.iter()) {
        if d < threshold {
            *area = RC_NULL_AREA;
        }
    }

    log::debug!(
        "eroded walkable area by {} cells, {} walkable spans left",
        radius,
        chf.walkable_span_count()
    );
    Ok(())
}

/// Replaces each walkable area id by the median of its 3x3 neighbourhood.
///
/// Useful to remove noise from area marking done before compaction.
pub fn median_filter_walkable_area(chf: &mut CompactHeightfield) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut areas = vec![0xffu8; chf.span_count];

    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA {
                    areas[i] = chf.areas[i];
                    continue;
                }
                let s = chf.spans[i];
                let mut nei = [chf.areas[i]; 9];
                for dir in 0..4 {
                    if get_con(&s, dir) == RC_NOT_CONNECTED {
                        continue;
                    }
                    let ax = x + get_dir_offset_x(dir);
                    let ay = y + get_dir_offset_y(dir);
                    let ai = chf.neighbour_index(x, y, i, dir);
                    if chf.areas[ai] != RC_NULL_AREA {
                        nei[dir * 2] = chf.areas[ai];
                    }
                    let dir2 = (dir + 1) & 3;
                    if get_con(&chf.spans[ai], dir2) != RC_NOT_CONNECTED {
                        let ai2 = chf.neighbour_index(ax, ay, ai, dir2);
                        if chf.areas[ai2] != RC_NULL_AREA {
                            nei[dir * 2 + 1] = chf.areas[ai2];
                        }
                    }
                }
                insert_sort(&mut nei);
                areas[i] = nei[4];
            }
        }
    }

    chf.areas = areas;
    Ok(())
}

/// Cell range `[min, max]` covered by a world space box, or `None` when the
/// box misses the heightfield.
fn cell_range(chf: &CompactHeightfield, bmin: Vec3, bmax: Vec3) -> Option<(i32, i32, i32, i32, i32, i32)> {
    let minx = ((bmin.x - chf.bmin.x) / chf.cs) as i32;
    let miny = ((bmin.y - chf.bmin.y) / chf.ch) as i32;
    let minz = ((bmin.z - chf.bmin.z) / chf.cs) as i32;
    let maxx = ((bmax.x - chf.bmin.x) / chf.cs) as i32;
    let maxy = ((bmax.y - chf.bmin.y) / chf.ch) as i32;
    let maxz = ((bmax.z - chf.bmin.z) / chf.cs) as i32;

    if maxx < 0 || minx >= chf.width || maxz < 0 || minz >= chf.height {
        return None;
    }
    Some((
        minx.max(0),
        miny,
        minz.max(0),
        maxx.min(chf.width - 1),
        maxy,
        maxz.min(chf.height - 1),
    ))
}

/// Applies `area_id` to all walkable spans whose floor lies inside the box
pub fn mark_box_area(chf: &mut CompactHeightfield, bmin: Vec3, bmax: Vec3, area_id: u8) -> Result<()> {
    let Some((minx, miny, minz, maxx, maxy, maxz)) = cell_range(chf, bmin, bmax) else {
        return Ok(());
    };
    for z in minz..=maxz {
        for x in minx..=maxx {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let y = chf.spans[i].y as i32;
                if y >= miny && y <= maxy && chf.areas[i] != RC_NULL_AREA {
                    chf.areas[i] = area_id;
                }
            }
        }
    }
    Ok(())
}

/// Applies `area_id` to walkable spans inside a vertical cylinder whose
/// base is at `pos`.
pub fn mark_cylinder_area(
    chf: &mut CompactHeightfield,
    pos: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
) -> Result<()> {
    let bmin = Vec3::new(pos.x - radius, pos.y, pos.z - radius);
    let bmax = Vec3::new(pos.x + radius, pos.y + height, pos.z + radius);
    let Some((minx, miny, minz, maxx, maxy, maxz)) = cell_range(chf, bmin, bmax) else {
        return Ok(());
    };
    let r2 = radius * radius;

    for z in minz..=maxz {
        for x in minx..=maxx {
            let sx = chf.bmin.x + (x as f32 + 0.5) * chf.cs;
            let sz = chf.bmin.z + (z as f32 + 0.5) * chf.cs;
            let dx = sx - pos.x;
            let dz = sz - pos.z;
            if dx * dx + dz * dz >= r2 {
                continue;
            }
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let y = chf.spans[i].y as i32;
                if y >= miny && y <= maxy && chf.areas[i] != RC_NULL_AREA {
                    chf.areas[i] = area_id;
                }
            }
        }
    }
    Ok(())
}

/// Applies `area_id` to walkable spans inside a convex polygon extruded
/// between `hmin` and `hmax`.
///
/// `verts` is a flat `[x, y, z, ...]` list; only x and z are used.
pub fn mark_convex_poly_area(
    chf: &mut CompactHeightfield,
    verts: &[f32],
    hmin: f32,
    hmax: f32,
    area_id: u8,
) -> Result<()> {
    let nverts = verts.len() / 3;
    if nverts < 3 {
        return Ok(());
    }
    let (mut bmin, mut bmax) = recast_common::calc_bounds(verts);
    bmin[1] = hmin;
    bmax[1] = hmax;
    let Some((minx, miny, minz, maxx, maxy, maxz)) =
        cell_range(chf, Vec3::from_array(bmin), Vec3::from_array(bmax))
    else {
        return Ok(());
    };

    for z in minz..=maxz {
        for x in minx..=maxx {
            let p = [
                chf.bmin.x + (x as f32 + 0.5) * chf.cs,
                0.0,
                chf.bmin.z + (z as f32 + 0.5) * chf.cs,
            ];
            if !point_in_polygon(&p, verts, nverts) {
                continue;
            }
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let y = chf.spans[i].y as i32;
                if y >= miny && y <= maxy && chf.areas[i] != RC_NULL_AREA {
                    chf.areas[i] = area_id;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;

    fn flat_chf(w: i32, h: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 10.0, h as f32), 1.0, 0.5);
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap()
    }

    #[test]
    fn test_insert_sort() {
        let mut data = [5, 3, 9, 1, 1, 0];
        insert_sort(&mut data);
        assert_eq!(data, [0, 1, 1, 3, 5, 9]);
    }

    #[test]
    fn test_erode_keeps_radius_from_edges() {
        let mut chf = flat_chf(20, 20);
        erode_walkable_area(&mut chf, 2).unwrap();

        for z in 0..20 {
            for x in 0..20 {
                let c = chf.cell(x, z);
                let walkable = chf.areas[c.index as usize] != RC_NULL_AREA;
                let inside = (2..=17).contains(&x) && (2..=17).contains(&z);
                assert_eq!(walkable, inside, "cell ({}, {})", x, z);
            }
        }
    }

    #[test]
    fn test_erode_zero_radius_only_keeps_everything() {
        let mut chf = flat_chf(5, 5);
        erode_walkable_area(&mut chf, 0).unwrap();
        assert_eq!(chf.walkable_span_count(), 25);
    }

    #[test]
    fn test_mark_box_area() {
        let mut chf = flat_chf(10, 10);
        mark_box_area(&mut chf, Vec3::new(2.0, 0.0, 2.0), Vec3::new(4.5, 5.0, 4.5), 7).unwrap();
        let marked = chf.areas.iter().filter(|&&a| a == 7).count();
        assert_eq!(marked, 9);
        assert_eq!(chf.areas[chf.cell(0, 0).index as usize], RC_WALKABLE_AREA);
    }

    #[test]
    fn test_mark_cylinder_area() {
        let mut chf = flat_chf(10, 10);
        mark_cylinder_area(&mut chf, Vec3::new(5.0, 0.0, 5.0), 1.0, 5.0, 9).unwrap();
        let marked = chf.areas.iter().filter(|&&a| a == 9).count();
        assert_eq!(marked, 4);
    }

    #[test]
    fn test_mark_convex_poly_area() {
        let mut chf = flat_chf(10, 10);
        let verts = [1.0, 0.0, 1.0, 1.0, 0.0, 4.0, 4.0, 0.0, 4.0, 4.0, 0.0, 1.0];
        mark_convex_poly_area(&mut chf, &verts, 0.0, 5.0, 3).unwrap();
        let marked = chf.areas.iter().filter(|&&a| a == 3).count();
        assert_eq!(marked, 9);
    }

    #[test]
    fn test_median_filter_removes_single_cell_noise() {
        let mut chf = flat_chf(5, 5);
        let center = chf.cell(2, 2).index as usize;
        chf.areas[center] = 5;
        median_filter_walkable_area(&mut chf).unwrap();
        assert_eq!(chf.areas[center], RC_WALKABLE_AREA);
    }
}
