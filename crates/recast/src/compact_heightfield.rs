//! Compact heightfield for Recast
//!
//! The compact heightfield stores only the open space above walkable spans,
//! in one contiguous array, with each span linked to its neighbours in the
//! four cardinal directions.

use glam::Vec3;

use recast_common::{Error, Result};

use crate::heightfield::Heightfield;
use crate::{RC_NOT_CONNECTED, RC_NULL_AREA};

/// Index range of the spans in one grid cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactCell {
    pub index: u32,
    pub count: u32,
}

/// Open space above a walkable span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactSpan {
    /// Floor height of the span
    pub y: u16,
    /// Region id, 0 when unassigned
    pub reg: u16,
    /// Packed neighbour layer indices, 6 bits per direction
    pub con: u32,
    /// Clearance above the floor
    pub h: u8,
}

/// X offset of direction `dir` (0: -x, 1: +z, 2: +x, 3: -z)
#[inline]
pub fn get_dir_offset_x(dir: usize) -> i32 {
    const OFFSET: [i32; 4] = [-1, 0, 1, 0];
    OFFSET[dir & 3]
}

/// Z offset of direction `dir`
#[inline]
pub fn get_dir_offset_y(dir: usize) -> i32 {
    const OFFSET: [i32; 4] = [0, 1, 0, -1];
    OFFSET[dir & 3]
}

/// Direction for a unit offset, or `None` for the zero and diagonal offsets
#[inline]
pub fn get_dir_for_offset(x: i32, y: i32) -> Option<usize> {
    match (x, y) {
        (-1, 0) => Some(0),
        (0, 1) => Some(1),
        (1, 0) => Some(2),
        (0, -1) => Some(3),
        _ => None,
    }
}

/// Neighbour layer index of `span` in direction `dir`
#[inline]
pub fn get_con(span: &CompactSpan, dir: usize) -> u32 {
    (span.con >> (dir * 6)) & 0x3f
}

#[inline]
pub fn set_con(span: &mut CompactSpan, dir: usize, i: u32) {
    let shift = dir * 6;
    span.con = (span.con & !(0x3f << shift)) | ((i & 0x3f) << shift);
}

/// Neighbour-linked open space built from a [`Heightfield`]
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub span_count: usize,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub border_size: i32,
    pub max_distance: u16,
    pub max_regions: u16,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Distance to the region boundary, filled by the distance field build
    pub dist: Vec<u16>,
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds the compact representation of the walkable spans of `hf`.
    ///
    /// Neighbours are linked when the shared clearance is at least
    /// `walkable_height` and the step between floors is at most
    /// `walkable_climb`.
    pub fn build_from_heightfield(
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        const MAX_HEIGHT: i32 = 0xffff;

        let w = hf.width;
        let h = hf.height;
        let span_count = hf.walkable_span_count();

        let mut bmax = hf.bmax;
        bmax.y += walkable_height as f32 * hf.ch;

        let mut chf = Self {
            width: w,
            height: h,
            span_count,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax,
            cs: hf.cs,
            ch: hf.ch,
            cells: vec![CompactCell::default(); (w * h) as usize],
            spans: vec![CompactSpan::default(); span_count],
            dist: Vec::new(),
            areas: vec![RC_NULL_AREA; span_count],
        };

        let mut idx = 0usize;
        for z in 0..h {
            for x in 0..w {
                let Some(first) = hf.first_span(x, z) else {
                    continue;
                };
                let cell = &mut chf.cells[(x + z * w) as usize];
                cell.index = idx as u32;
                cell.count = 0;

                let mut cur = Some(first);
                while let Some(si) = cur {
                    let s = *hf.span(si);
                    cur = s.next;
                    if s.area == RC_NULL_AREA {
                        continue;
                    }
                    let bot = s.smax as i32;
                    let top = s.next.map_or(MAX_HEIGHT, |n| hf.span(n).smin as i32);
                    chf.spans[idx].y = bot.clamp(0, 0xffff) as u16;
                    chf.spans[idx].h = (top - bot).clamp(0, 0xff) as u8;
                    chf.areas[idx] = s.area;
                    idx += 1;
                    cell.count += 1;
                }
            }
        }

        // Find neighbour connections.
        let max_layers = RC_NOT_CONNECTED - 1;
        let mut too_high_neighbour = 0u32;
        for z in 0..h {
            for x in 0..w {
                let c = chf.cells[(x + z * w) as usize];
                for i in c.index..c.index + c.count {
                    let mut s = chf.spans[i as usize];
                    for dir in 0..4 {
                        set_con(&mut s, dir, RC_NOT_CONNECTED);
                        let nx = x + get_dir_offset_x(dir);
                        let nz = z + get_dir_offset_y(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let nc = chf.cells[(nx + nz * w) as usize];
                        for k in nc.index..nc.index + nc.count {
                            let ns = &chf.spans[k as usize];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);

                            if top - bot >= walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= walkable_climb
                            {
                                let lidx = k - nc.index;
                                if lidx > max_layers {
                                    too_high_neighbour = too_high_neighbour.max(lidx);
                                    continue;
                                }
                                set_con(&mut s, dir, lidx);
                                break;
                            }
                        }
                    }
                    chf.spans[i as usize] = s;
                }
            }
        }

        if too_high_neighbour > max_layers {
            log::warn!(
                "heightfield has too many layers {} (max: {})",
                too_high_neighbour,
                max_layers
            );
        }

        Ok(chf)
    }

    /// Span index of the neighbour of span `i` at cell (x, y) in `dir`.
    ///
    /// The caller must have checked that the connection exists.
    #[inline]
    pub fn neighbour_index(&self, x: i32, y: i32, i: usize, dir: usize) -> usize {
        let nx = x + get_dir_offset_x(dir);
        let ny = y + get_dir_offset_y(dir);
        self.cells[(nx + ny * self.width) as usize].index as usize
            + get_con(&self.spans[i], dir) as usize
    }

    #[inline]
    pub fn cell(&self, x: i32, y: i32) -> CompactCell {
        self.cells[(x + y * self.width) as usize]
    }

    /// Number of spans that still carry a walkable area
    pub fn walkable_span_count(&self) -> usize {
        self.areas.iter().filter(|&&a| a != RC_NULL_AREA).count()
    }

    pub(crate) fn check_distance_field(&self) -> Result<()> {
        if self.dist.len() != self.span_count {
            return Err(Error::Recast(
                "distance field has not been built".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RC_WALKABLE_AREA;

    fn flat_field(w: i32, h: i32) -> Heightfield {
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 10.0, h as f32), 1.0, 0.5);
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn test_con_packing() {
        let mut s = CompactSpan::default();
        for dir in 0..4 {
            set_con(&mut s, dir, RC_NOT_CONNECTED);
        }
        set_con(&mut s, 2, 5);
        assert_eq!(get_con(&s, 2), 5);
        assert_eq!(get_con(&s, 1), RC_NOT_CONNECTED);
    }

    #[test]
    fn test_dir_offsets() {
        for dir in 0..4 {
            let dx = get_dir_offset_x(dir);
            let dy = get_dir_offset_y(dir);
            assert_eq!(get_dir_for_offset(dx, dy), Some(dir));
        }
        assert_eq!(get_dir_for_offset(1, 1), None);
    }

    #[test]
    fn test_build_links_flat_plane() {
        let hf = flat_field(4, 3);
        let chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        assert_eq!(chf.span_count, 12);

        // Interior cell is linked on all four sides.
        let c = chf.cell(1, 1);
        let s = chf.spans[c.index as usize];
        assert!((0..4).all(|d| get_con(&s, d) != RC_NOT_CONNECTED));

        // Corner cell only links inwards.
        let c = chf.cell(0, 0);
        let s = chf.spans[c.index as usize];
        assert_eq!(get_con(&s, 0), RC_NOT_CONNECTED);
        assert_eq!(get_con(&s, 3), RC_NOT_CONNECTED);
        assert_ne!(get_con(&s, 1), RC_NOT_CONNECTED);
        assert_ne!(get_con(&s, 2), RC_NOT_CONNECTED);
    }

    #[test]
    fn test_step_too_high_is_not_linked() {
        let mut hf = flat_field(2, 1);
        hf.add_span(1, 0, 2, 8, RC_WALKABLE_AREA, 1).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 2, 2).unwrap();
        let s = chf.spans[chf.cell(0, 0).index as usize];
        assert_eq!(get_con(&s, 2), RC_NOT_CONNECTED);
    }
}
