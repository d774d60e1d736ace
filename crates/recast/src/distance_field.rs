//! Distance field for watershed partitioning
//!
//! Each span gets its (approximate, chamfer based) distance to the nearest
//! area boundary. The result is box blurred to smooth out the small local
//! maxima that would otherwise seed tiny regions.

use recast_common::Result;

use crate::compact_heightfield::{get_con, get_dir_offset_x, get_dir_offset_y, CompactHeightfield};
use crate::RC_NOT_CONNECTED;

fn calculate_distance_field(chf: &CompactHeightfield, src: &mut [u16]) -> u16 {
    let w = chf.width;
    let h = chf.height;

    src.fill(0xffff);

    // Mark boundary cells.
    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let s = &chf.spans[i];
                let area = chf.areas[i];
                let mut neighbours = 0;
                for dir in 0..4 {
                    if get_con(s, dir) != RC_NOT_CONNECTED {
                        let ai = chf.neighbour_index(x, y, i, dir);
                        if area == chf.areas[ai] {
                            neighbours += 1;
                        }
                    }
                }
                if neighbours != 4 {
                    src[i] = 0;
                }
            }
        }
    }

    let relax = |src: &mut [u16], i: usize, ai: usize, cost: u32| {
        let nd = src[ai] as u32 + cost;
        if nd < src[i] as u32 {
            src[i] = nd as u16;
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
                    relax(src, i, ai, 2);
                    // (-1,-1)
                    if get_con(&chf.spans[ai], 3) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 3);
                        relax(src, i, aai, 3);
                    }
                }
                if get_con(&s, 3) != RC_NOT_CONNECTED {
                    // (0,-1)
                    let ax = x + get_dir_offset_x(3);
                    let ay = y + get_dir_offset_y(3);
                    let ai = chf.neighbour_index(x, y, i, 3);
                    relax(src, i, ai, 2);
                    // (1,-1)
                    if get_con(&chf.spans[ai], 2) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 2);
                        relax(src, i, aai, 3);
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
                    relax(src, i, ai, 2);
                    // (1,1)
                    if get_con(&chf.spans[ai], 1) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 1);
                        relax(src, i, aai, 3);
                    }
                }
                if get_con(&s, 1) != RC_NOT_CONNECTED {
                    // (0,1)
                    let ax = x + get_dir_offset_x(1);
                    let ay = y + get_dir_offset_y(1);
                    let ai = chf.neighbour_index(x, y, i, 1);
                    relax(src, i, ai, 2);
                    // (-1,1)
                    if get_con(&chf.spans[ai], 0) != RC_NOT_CONNECTED {
                        let aai = chf.neighbour_index(ax, ay, ai, 0);
                        relax(src, i, aai, 3);
                    }
                }
            }
        }
    }

    src.iter().copied().max().unwrap_or(0)
}

fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16], dst: &mut [u16]) {
    let w = chf.width;
    let h = chf.height;
    let threshold = threshold as u32 * 2;

    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let s = chf.spans[i];
                let cd = src[i] as u32;
                if cd <= threshold {
                    dst[i] = cd as u16;
                    continue;
                }

                let mut d = cd;
                for dir in 0..4 {
                    if get_con(&s, dir) != RC_NOT_CONNECTED {
                        let ax = x + get_dir_offset_x(dir);
                        let ay = y + get_dir_offset_y(dir);
                        let ai = chf.neighbour_index(x, y, i, dir);
                        d += src[ai] as u32;

                        let dir2 = (dir + 1) & 3;
                        if get_con(&chf.spans[ai], dir2) != RC_NOT_CONNECTED {
                            let ai2 = chf.neighbour_index(ax, ay, ai, dir2);
                            d += src[ai2] as u32;
                        } else {
                            d += cd;
                        }
                    } else {
                        d += cd * 2;
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
}

/// Builds the distance field used by watershed region partitioning.
///
/// Fills `chf.dist` and `chf.max_distance`.
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let mut src = vec![0u16; chf.span_count];
    let max_distance = calculate_distance_field(chf, &mut src);

    let mut dst = vec![0u16; chf.span_count];
    box_blur(chf, 1, &src, &mut dst);

    chf.max_distance = max_distance;
    chf.dist = dst;
    log::debug!("distance field built, max distance {}", max_distance);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;
    use glam::Vec3;

    #[test]
    fn test_distance_grows_towards_center() {
        let mut hf = Heightfield::new(11, 11, Vec3::ZERO, Vec3::new(11.0, 10.0, 11.0), 1.0, 0.5);
        for z in 0..11 {
            for x in 0..11 {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        build_distance_field(&mut chf).unwrap();

        let at = |x: i32, z: i32| chf.dist[chf.cell(x, z).index as usize];
        assert_eq!(at(0, 5), 0);
        assert!(at(5, 5) > at(2, 5));
        assert!(at(2, 5) > at(1, 5));
        assert_eq!(chf.max_distance, 10);
    }
}
