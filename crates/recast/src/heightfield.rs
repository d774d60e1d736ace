//! Heightfield representation for Recast
//!
//! The heightfield is the first data structure in the Recast pipeline.
//! It's a 2D grid of columns, each holding a height-ordered list of solid
//! spans. Spans live in a single pool and are linked by index, so freeing
//! and reusing them never touches the allocator.

use glam::Vec3;

use recast_common::{Error, Result};

use crate::compact_heightfield::{get_dir_offset_x, get_dir_offset_y};
use crate::{RC_NULL_AREA, RC_SPAN_MAX_HEIGHT};

/// A solid span in a heightfield column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Lower limit of the span, in cell heights
    pub smin: u16,
    /// Upper limit of the span, in cell heights
    pub smax: u16,
    /// Area id of the span top surface
    pub area: u8,
    /// Pool index of the next span above this one
    pub next: Option<u32>,
}

/// Heightfield structure holding a grid of span columns
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis, in cells
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis, in cells
    pub height: i32,
    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    columns: Vec<Option<u32>>,
    pool: Vec<Span>,
    free: Option<u32>,
}

/// Iterator over the spans of one column, bottom to top
pub struct ColumnIter<'a> {
    pool: &'a [Span],
    cur: Option<u32>,
}

impl<'a> Iterator for ColumnIter<'a> {
    type Item = &'a Span;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let span = &self.pool[idx as usize];
        self.cur = span.next;
        Some(span)
    }
}

impl Heightfield {
    /// Creates a new empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![None; cells],
            pool: Vec::new(),
            free: None,
        }
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    /// Pool index of the lowest span in a column
    #[inline]
    pub fn first_span(&self, x: i32, z: i32) -> Option<u32> {
        self.columns[self.column_index(x, z)]
    }

    #[inline]
    pub fn span(&self, index: u32) -> &Span {
        &self.pool[index as usize]
    }

    #[inline]
    pub fn span_mut(&mut self, index: u32) -> &mut Span {
        &mut self.pool[index as usize]
    }

    /// Iterates the spans of column (x, z) from bottom to top
    pub fn column(&self, x: i32, z: i32) -> ColumnIter<'_> {
        ColumnIter {
            pool: &self.pool,
            cur: self.first_span(x, z),
        }
    }

    fn alloc_span(&mut self, span: Span) -> u32 {
        match self.free {
            Some(idx) => {
                self.free = self.pool[idx as usize].next;
                self.pool[idx as usize] = span;
                idx
            }
            None => {
                self.pool.push(span);
                (self.pool.len() - 1) as u32
            }
        }
    }

    fn free_span(&mut self, idx: u32) {
        self.pool[idx as usize].next = self.free;
        self.free = Some(idx);
    }

    /// Adds a span to column (x, z), merging it with any span it overlaps.
    ///
    /// When the tops of two merged spans are within `flag_merge_threshold`
    /// of each other the higher area id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || x >= self.width || z < 0 || z >= self.height {
            return Err(Error::Recast(format!(
                "span position out of bounds: ({}, {})",
                x, z
            )));
        }
        if smin > smax {
            return Err(Error::Recast(format!(
                "invalid span height: min ({}) > max ({})",
                smin, smax
            )));
        }

        let column = self.column_index(x, z);
        let mut new_span = Span {
            smin,
            smax,
            area,
            next: None,
        };

        let mut prev: Option<u32> = None;
        let mut cur = self.columns[column];

        while let Some(ci) = cur {
            let c = self.pool[ci as usize];
            if c.smin > new_span.smax {
                // Current span is further than the new span, break.
                break;
            }
            if c.smax < new_span.smin {
                prev = cur;
                cur = c.next;
                continue;
            }

            // Merge spans.
            new_span.smin = new_span.smin.min(c.smin);
            new_span.smax = new_span.smax.max(c.smax);
            if (new_span.smax as i32 - c.smax as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(c.area);
            }

            let next = c.next;
            self.free_span(ci);
            match prev {
                Some(p) => self.pool[p as usize].next = next,
                None => self.columns[column] = next,
            }
            cur = next;
        }

        new_span.next = cur;
        let idx = self.alloc_span(new_span);
        match prev {
            Some(p) => self.pool[p as usize].next = Some(idx),
            None => self.columns[column] = Some(idx),
        }
        Ok(())
    }

    /// Total number of spans in the heightfield
    pub fn span_count(&self) -> usize {
        let mut count = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                count += self.column(x, z).count();
            }
        }
        count
    }

    /// Number of spans with a walkable area
    pub fn walkable_span_count(&self) -> usize {
        let mut count = 0;
        for z in 0..self.height {
            for x in 0..self.width {
                count += self
                    .column(x, z)
                    .filter(|s| s.area != RC_NULL_AREA)
                    .count();
            }
        }
        count
    }

    /// Marks non-walkable spans as walkable if their maximum is within
    /// `walkable_climb` of a walkable span directly below them.
    ///
    /// This lets agents step over curbs and stair edges.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) -> Result<()> {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_walkable = false;
                let mut previous_area = RC_NULL_AREA;
                let mut previous_smax = 0i32;
                let mut cur = self.first_span(x, z);
                while let Some(ci) = cur {
                    let s = self.pool[ci as usize];
                    let walkable = s.area != RC_NULL_AREA;
                    if !walkable
                        && previous_walkable
                        && (s.smax as i32 - previous_smax).abs() <= walkable_climb
                    {
                        self.pool[ci as usize].area = previous_area;
                    }
                    // The original walkability is carried so marking does not cascade upwards.
                    previous_walkable = walkable;
                    previous_area = self.pool[ci as usize].area;
                    previous_smax = s.smax as i32;
                    cur = s.next;
                }
            }
        }
        Ok(())
    }

    /// Removes walkable spans that are next to a drop larger than
    /// `walkable_climb`, or whose accessible neighbours span too large a
    /// height range.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) -> Result<()> {
        const MAX_HEIGHT: i32 = 0xffff;

        for z in 0..self.height {
            for x in 0..self.width {
                let mut cur = self.first_span(x, z);
                while let Some(ci) = cur {
                    let s = self.pool[ci as usize];
                    cur = s.next;
                    if s.area == RC_NULL_AREA {
                        continue;
                    }

                    let bot = s.smax as i32;
                    let top = s.next.map_or(MAX_HEIGHT, |n| self.pool[n as usize].smin as i32);

                    let mut lowest_neighbour = MAX_HEIGHT;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let dx = x + get_dir_offset_x(dir);
                        let dz = z + get_dir_offset_y(dir);
                        if dx < 0 || dz < 0 || dx >= self.width || dz >= self.height {
                            lowest_neighbour = -walkable_climb - 1;
                            break;
                        }

                        let mut ns = self.first_span(dx, dz);

                        // The space below the first neighbour span.
                        let nbot = -walkable_climb;
                        let ntop = ns.map_or(MAX_HEIGHT, |n| self.pool[n as usize].smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            lowest_neighbour = lowest_neighbour.min(nbot - bot);
                        }

                        while let Some(ni) = ns {
                            let n = self.pool[ni as usize];
                            let nbot = n.smax as i32;
                            let ntop = n.next.map_or(MAX_HEIGHT, |nn| self.pool[nn as usize].smin as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                lowest_neighbour = lowest_neighbour.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                            ns = n.next;
                        }

                        if lowest_neighbour < -walkable_climb {
                            break;
                        }
                    }

                    if lowest_neighbour < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        self.pool[ci as usize].area = RC_NULL_AREA;
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes walkable spans without enough clearance above them
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) -> Result<()> {
        const MAX_HEIGHT: i32 = 0xffff;

        for z in 0..self.height {
            for x in 0..self.width {
                let mut cur = self.first_span(x, z);
                while let Some(ci) = cur {
                    let s = self.pool[ci as usize];
                    let bot = s.smax as i32;
                    let top = s.next.map_or(MAX_HEIGHT, |n| self.pool[n as usize].smin as i32);
                    if top - bot < walkable_height {
                        self.pool[ci as usize].area = RC_NULL_AREA;
                    }
                    cur = s.next;
                }
            }
        }
        Ok(())
    }

    /// Clamps a world height to the span range
    pub(crate) fn clamp_span_height(v: i32) -> u16 {
        v.clamp(0, RC_SPAN_MAX_HEIGHT as i32) as u16
    }
}
