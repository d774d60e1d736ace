//! Region partitioning of the compact heightfield
//!
//! Three partitioning strategies share the same region bookkeeping:
//! watershed (best shaped regions, needs the distance field), monotone
//! (fast sweep, long thin regions) and layers (non-overlapping sweeps used
//! for tiled layers).

use recast_common::{Error, Result};

use crate::compact_heightfield::{get_con, get_dir_offset_x, get_dir_offset_y, CompactHeightfield};
use crate::{RC_BORDER_REG, RC_NOT_CONNECTED, RC_NULL_AREA};

const NULL_NEI: u16 = 0xffff;
const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;
const EXPAND_ITERS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    y: i32,
    /// Span index, `None` once the span has been assigned a region
    index: Option<usize>,
}

#[derive(Debug, Clone)]
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    ymin: u16,
    ymax: u16,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            ymin: 0xffff,
            ymax: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in self.connections.iter_mut() {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in self.floors.iter_mut() {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn add_unique_floor_region(&mut self, n: u16) {
        if !self.floors.contains(&n) {
            self.floors.push(n);
        }
    }

    fn add_unique_connection(&mut self, n: u16) {
        if !self.connections.contains(&n) {
            self.connections.push(n);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        // A connection to region 0 means the region touches the outside.
        self.connections.contains(&0)
    }
}

fn can_merge_with_region(rega: &Region, regb: &Region) -> bool {
    if rega.area_type != regb.area_type {
        return false;
    }
    let n = rega.connections.iter().filter(|&&c| c == regb.id).count();
    if n > 1 {
        return false;
    }
    !rega.floors.contains(&regb.id)
}

/// Merges region `b` into region `a`
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;

    let acon = regions[a].connections.clone();
    let bcon = regions[b].connections.clone();

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        return false;
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for i in 0..acon.len() - 1 {
        merged.push(acon[(insa + 1 + i) % acon.len()]);
    }
    for i in 0..bcon.len() - 1 {
        merged.push(bcon[(insb + 1 + i) % bcon.len()]);
    }
    regions[a].connections = merged;
    regions[a].remove_adjacent_neighbours();

    let bfloors = regions[b].floors.clone();
    for f in bfloors {
        regions[a].add_unique_floor_region(f);
    }
    regions[a].span_count += regions[b].span_count;
    regions[b].span_count = 0;
    regions[b].connections.clear();
    true
}

fn is_solid_edge(chf: &CompactHeightfield, src_reg: &[u16], x: i32, y: i32, i: usize, dir: usize) -> bool {
    let s = &chf.spans[i];
    let mut r = 0;
    if get_con(s, dir) != RC_NOT_CONNECTED {
        let ai = chf.neighbour_index(x, y, i, dir);
        r = src_reg[ai];
    }
    r != src_reg[i]
}

/// Walks the boundary of the region containing span `i` and records the
/// ordered list of neighbouring region ids.
fn walk_contour(
    mut x: i32,
    mut y: i32,
    mut i: usize,
    mut dir: usize,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    cont: &mut Vec<u16>,
) {
    let start_dir = dir;
    let starti = i;

    let ss = &chf.spans[i];
    let mut cur_reg = 0;
    if get_con(ss, dir) != RC_NOT_CONNECTED {
        let ai = chf.neighbour_index(x, y, i, dir);
        cur_reg = src_reg[ai];
    }
    cont.push(cur_reg);

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }
        let s = &chf.spans[i];

        if is_solid_edge(chf, src_reg, x, y, i, dir) {
            // Choose the edge corner.
            let mut r = 0;
            if get_con(s, dir) != RC_NOT_CONNECTED {
                let ai = chf.neighbour_index(x, y, i, dir);
                r = src_reg[ai];
            }
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg);
            }
            dir = (dir + 1) & 0x3; // Rotate CW
        } else {
            if get_con(s, dir) == RC_NOT_CONNECTED {
                // Should not happen.
                return;
            }
            let ni = chf.neighbour_index(x, y, i, dir);
            x += get_dir_offset_x(dir);
            y += get_dir_offset_y(dir);
            i = ni;
            dir = (dir + 3) & 0x3; // Rotate CCW
        }

        if starti == i && start_dir == dir {
            break;
        }
    }

    // Remove adjacent duplicates.
    let mut j = 0;
    while cont.len() > 1 && j < cont.len() {
        let nj = (j + 1) % cont.len();
        if cont[j] == cont[nj] {
            cont.remove(j);
        } else {
            j += 1;
        }
    }
}

fn compress_region_ids(regions: &mut [Region]) -> u16 {
    for reg in regions.iter_mut() {
        reg.remap = reg.id != 0 && (reg.id & RC_BORDER_REG) == 0;
    }

    let mut reg_id_gen = 0u16;
    for i in 0..regions.len() {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        reg_id_gen += 1;
        let new_id = reg_id_gen;
        for reg in regions[i..].iter_mut() {
            if reg.id == old_id {
                reg.id = new_id;
                reg.remap = false;
            }
        }
    }
    reg_id_gen
}

fn merge_and_filter_regions(
    min_region_area: i32,
    merge_region_size: i32,
    max_region_id: &mut u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    overlaps: &mut Vec<u16>,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let nreg = *max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Find edge of a region and find connections around the contour.
    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let r = src_reg[i];
                if r == 0 || r as usize >= nreg {
                    continue;
                }

                regions[r as usize].span_count += 1;

                // Update floors.
                for j in c.index as usize..(c.index + c.count) as usize {
                    if i == j {
                        continue;
                    }
                    let floor_id = src_reg[j];
                    if floor_id == 0 || floor_id as usize >= nreg {
                        continue;
                    }
                    if floor_id == r {
                        regions[r as usize].overlap = true;
                    }
                    regions[r as usize].add_unique_floor_region(floor_id);
                }

                // Have found contour.
                if !regions[r as usize].connections.is_empty() {
                    continue;
                }

                regions[r as usize].area_type = chf.areas[i];

                // Check if this cell is next to a border.
                let ndir = (0..4).find(|&dir| is_solid_edge(chf, src_reg, x, y, i, dir));
                if let Some(dir) = ndir {
                    // The cell is at border. Walk around the contour to find all the neighbours.
                    let mut connections = Vec::new();
                    walk_contour(x, y, i, dir, chf, src_reg, &mut connections);
                    regions[r as usize].connections = connections;
                }
            }
        }
    }

    // Remove too small regions.
    let mut stack: Vec<usize> = Vec::with_capacity(32);
    let mut trace: Vec<usize> = Vec::with_capacity(32);
    for i in 0..nreg {
        let reg = &regions[i];
        if reg.id == 0 || (reg.id & RC_BORDER_REG) != 0 {
            continue;
        }
        if reg.span_count == 0 || reg.visited {
            continue;
        }

        // Count the total size of all the connected regions.
        // Also keep track of the regions connects to a tile border.
        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();

        regions[i].visited = true;
        stack.push(i);

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);

            for j in 0..regions[ri].connections.len() {
                let con = regions[ri].connections[j];
                if (con & RC_BORDER_REG) != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[con as usize];
                if nei.visited || nei.id == 0 || (nei.id & RC_BORDER_REG) != 0 {
                    continue;
                }
                stack.push(nei.id as usize);
                nei.visited = true;
            }
        }

        // Regions touching the tile border are kept, their real size is unknown.
        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    // Merge too small regions to neighbour regions.
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let reg = &regions[i];
            if reg.id == 0 || (reg.id & RC_BORDER_REG) != 0 {
                continue;
            }
            if reg.overlap || reg.span_count == 0 {
                continue;
            }

            // Check to see if the region should be merged.
            if reg.span_count > merge_region_size && reg.is_connected_to_border() {
                continue;
            }

            // Small region with more than 1 connection, or region which is not
            // connected to a border at all: find the smallest neighbour that
            // connects to this one.
            let mut smallest = i32::MAX;
            let mut merge_id = reg.id;
            for &con in &reg.connections {
                if (con & RC_BORDER_REG) != 0 {
                    continue;
                }
                let mreg = &regions[con as usize];
                if mreg.id == 0 || (mreg.id & RC_BORDER_REG) != 0 || mreg.overlap {
                    continue;
                }
                if mreg.span_count < smallest
                    && can_merge_with_region(reg, mreg)
                    && can_merge_with_region(mreg, reg)
                {
                    smallest = mreg.span_count;
                    merge_id = mreg.id;
                }
            }

            if merge_id != reg.id {
                let old_id = reg.id;
                if merge_regions(&mut regions, merge_id as usize, i) {
                    // Fixup regions pointing to current region.
                    for other in regions.iter_mut() {
                        if other.id == 0 || (other.id & RC_BORDER_REG) != 0 {
                            continue;
                        }
                        // If another region was already merged into current region
                        // change the nid of the previous region too.
                        if other.id == old_id {
                            other.id = merge_id;
                        }
                        other.replace_neighbour(old_id, merge_id);
                    }
                    merge_count += 1;
                }
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    *max_region_id = compress_region_ids(&mut regions);

    // Remap regions.
    for r in src_reg.iter_mut() {
        if (*r & RC_BORDER_REG) == 0 {
            *r = regions[*r as usize].id;
        }
    }

    // Return regions that we found to be overlapping.
    for reg in &regions {
        if reg.overlap {
            overlaps.push(reg.id);
        }
    }

    Ok(())
}

fn paint_rect_region(
    minx: i32,
    maxx: i32,
    miny: i32,
    maxy: i32,
    reg_id: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) {
    for y in miny..maxy {
        for x in minx..maxx {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] != RC_NULL_AREA {
                    src_reg[i] = reg_id;
                }
            }
        }
    }
}

/// Paints the four border strips with their own border-flagged regions.
/// Returns the next free region id.
fn paint_border_regions(chf: &CompactHeightfield, border_size: i32, src_reg: &mut [u16]) -> u16 {
    let mut region_id = 1u16;
    if border_size > 0 {
        let w = chf.width;
        let h = chf.height;
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        paint_rect_region(0, bw, 0, h, region_id | RC_BORDER_REG, chf, src_reg);
        region_id += 1;
        paint_rect_region(w - bw, w, 0, h, region_id | RC_BORDER_REG, chf, src_reg);
        region_id += 1;
        paint_rect_region(0, w, 0, bh, region_id | RC_BORDER_REG, chf, src_reg);
        region_id += 1;
        paint_rect_region(0, w, h - bh, h, region_id | RC_BORDER_REG, chf, src_reg);
        region_id += 1;
    }
    region_id
}

fn sort_cells_by_level(
    start_level: u16,
    chf: &CompactHeightfield,
    src_reg: &[u16],
    stacks: &mut [Vec<LevelStackEntry>],
    log_levels_per_stack: u32,
) {
    let start_level = (start_level >> log_levels_per_stack) as i32;
    for stack in stacks.iter_mut() {
        stack.clear();
    }

    // Put all cells in the level range into the appropriate stacks.
    for y in 0..chf.height {
        for x in 0..chf.width {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA || src_reg[i] != 0 {
                    continue;
                }
                let level = (chf.dist[i] >> log_levels_per_stack) as i32;
                let s_id = (start_level - level).max(0) as usize;
                if s_id >= stacks.len() {
                    continue;
                }
                stacks[s_id].push(LevelStackEntry {
                    x,
                    y,
                    index: Some(i),
                });
            }
        }
    }
}

fn append_stacks(src: &[LevelStackEntry], dst: &mut Vec<LevelStackEntry>, src_reg: &[u16]) {
    for entry in src {
        match entry.index {
            Some(i) if src_reg[i] == 0 => dst.push(*entry),
            _ => {}
        }
    }
}

fn expand_regions(
    max_iter: usize,
    level: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    fill_stack: bool,
) {
    if fill_stack {
        // Find cells revealed by the raised level.
        stack.clear();
        for y in 0..chf.height {
            for x in 0..chf.width {
                let c = chf.cell(x, y);
                for i in c.index as usize..(c.index + c.count) as usize {
                    if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != RC_NULL_AREA {
                        stack.push(LevelStackEntry {
                            x,
                            y,
                            index: Some(i),
                        });
                    }
                }
            }
        }
    } else {
        // Mark all cells which already have a region.
        for entry in stack.iter_mut() {
            if let Some(i) = entry.index {
                if src_reg[i] != 0 {
                    entry.index = None;
                }
            }
        }
    }

    let mut dirty: Vec<(usize, u16, u16)> = Vec::new();
    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            let Some(i) = entry.index else {
                failed += 1;
                continue;
            };
            let (x, y) = (entry.x, entry.y);

            let mut r = src_reg[i];
            let mut d2 = 0xffffu16;
            let area = chf.areas[i];
            let s = &chf.spans[i];
            for dir in 0..4 {
                if get_con(s, dir) == RC_NOT_CONNECTED {
                    continue;
                }
                let ai = chf.neighbour_index(x, y, i, dir);
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                if nr > 0 && (nr & RC_BORDER_REG) == 0 {
                    let nd = src_dist[ai].saturating_add(2);
                    // Ties go to the lowest region id.
                    if nd < d2 || (nd == d2 && nr < r) {
                        r = nr;
                        d2 = nd;
                    }
                }
            }
            if r != 0 {
                entry.index = None;
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        // Copy entries that differ between src and dst to keep them in sync.
        for &(i, r, d) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }

        if failed == stack.len() {
            break;
        }

        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn flood_region(
    x: i32,
    y: i32,
    i: usize,
    level: u16,
    r: u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
) -> bool {
    let area = chf.areas[i];

    // Flood fill mark region.
    stack.clear();
    stack.push(LevelStackEntry { x, y, index: Some(i) });
    src_reg[i] = r;
    src_dist[i] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some(back) = stack.pop() {
        let (cx, cy) = (back.x, back.y);
        let Some(ci) = back.index else {
            continue;
        };
        let cs = chf.spans[ci];

        // Check if any of the neighbours already have a valid region set.
        let mut ar = 0u16;
        for dir in 0..4 {
            // 8 connected
            if get_con(&cs, dir) == RC_NOT_CONNECTED {
                continue;
            }
            let ax = cx + get_dir_offset_x(dir);
            let ay = cy + get_dir_offset_y(dir);
            let ai = chf.neighbour_index(cx, cy, ci, dir);
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if (nr & RC_BORDER_REG) != 0 {
                // Do not take borders into account.
                continue;
            }
            if nr != 0 && nr != r {
                ar = nr;
                break;
            }

            let dir2 = (dir + 1) & 0x3;
            if get_con(&chf.spans[ai], dir2) != RC_NOT_CONNECTED {
                let ai2 = chf.neighbour_index(ax, ay, ai, dir2);
                if chf.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != 0 && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != 0 {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        // Expand neighbours.
        for dir in 0..4 {
            if get_con(&cs, dir) == RC_NOT_CONNECTED {
                continue;
            }
            let ax = cx + get_dir_offset_x(dir);
            let ay = cy + get_dir_offset_y(dir);
            let ai = chf.neighbour_index(cx, cy, ci, dir);
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push(LevelStackEntry {
                    x: ax,
                    y: ay,
                    index: Some(ai),
                });
            }
        }
    }

    count > 0
}

/// Partitions the walkable surface using watershed flooding of the
/// distance field.
///
/// Requires [`crate::build_distance_field`] to have been run. Regions
/// smaller than `min_region_area` cells that do not touch the tile border
/// are removed, and regions smaller than `merge_region_area` are merged into
/// neighbours where possible.
pub fn build_regions(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    chf.check_distance_field()?;

    let mut src_reg = vec![0u16; chf.span_count];
    let mut src_dist = vec![0u16; chf.span_count];

    let mut lvl_stacks: Vec<Vec<LevelStackEntry>> = (0..NB_STACKS).map(|_| Vec::with_capacity(256)).collect();
    let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

    let mut region_id = paint_border_regions(chf, border_size, &mut src_reg);
    chf.border_size = border_size;

    let mut level = (chf.max_distance + 1) & !1u16;
    let mut s_id: isize = -1;

    while level > 0 {
        level = level.saturating_sub(2);
        s_id = (s_id + 1) & (NB_STACKS as isize - 1);

        let sid = s_id as usize;
        if sid == 0 {
            sort_cells_by_level(level, chf, &src_reg, &mut lvl_stacks, 1);
        } else {
            let (before, after) = lvl_stacks.split_at_mut(sid);
            append_stacks(&before[sid - 1], &mut after[0], &src_reg);
        }

        expand_regions(
            EXPAND_ITERS,
            level,
            chf,
            &mut src_reg,
            &mut src_dist,
            &mut lvl_stacks[sid],
            false,
        );

        // Mark new regions with IDs.
        let entries = lvl_stacks[sid].clone();
        for entry in entries {
            let Some(i) = entry.index else {
                continue;
            };
            if src_reg[i] == 0
                && flood_region(
                    entry.x,
                    entry.y,
                    i,
                    level,
                    region_id,
                    chf,
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                )
            {
                if region_id == 0xffff {
                    return Err(Error::Recast("region id overflow".to_string()));
                }
                region_id += 1;
            }
        }
    }

    // Expand current regions until no empty connected cells found.
    expand_regions(
        EXPAND_ITERS * 8,
        0,
        chf,
        &mut src_reg,
        &mut src_dist,
        &mut stack,
        true,
    );

    // Merge regions and filter out small regions.
    let mut overlaps = Vec::new();
    let mut max_regions = region_id;
    merge_and_filter_regions(
        min_region_area,
        merge_region_area,
        &mut max_regions,
        chf,
        &mut src_reg,
        &mut overlaps,
    )?;
    chf.max_regions = max_regions;

    // If overlapping regions were found during merging, split those regions.
    if !overlaps.is_empty() {
        log::warn!("{} overlapping regions after watershed", overlaps.len());
    }

    for (span, &reg) in chf.spans.iter_mut().zip(src_reg.iter()) {
        span.reg = reg;
    }
    log::debug!("watershed built {} regions", chf.max_regions);
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Row id
    rid: u16,
    /// Region id
    id: u16,
    /// Number of samples
    ns: u16,
    /// Neighbour id
    nei: u16,
}

/// Runs the row sweep shared by the monotone and layer partitioners.
/// Returns the next free region id.
fn sweep_regions(chf: &CompactHeightfield, border_size: i32, src_reg: &mut [u16]) -> Result<u16> {
    let w = chf.width;
    let h = chf.height;
    let mut id = paint_border_regions(chf, border_size, src_reg);

    let mut sweeps = vec![SweepSpan::default(); (w.max(h) + 1) as usize];
    let mut prev: Vec<u16> = Vec::new();

    for y in border_size..h - border_size {
        // Collect spans from this row.
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid = 1u16;

        for x in border_size..w - border_size {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let s = &chf.spans[i];
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }

                // -x
                let mut previd = 0u16;
                if get_con(s, 0) != RC_NOT_CONNECTED {
                    let ai = chf.neighbour_index(x, y, i, 0);
                    if (src_reg[ai] & RC_BORDER_REG) == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = src_reg[ai];
                    }
                }

                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    if previd as usize >= sweeps.len() {
                        sweeps.resize(previd as usize + 1, SweepSpan::default());
                    }
                    sweeps[previd as usize] = SweepSpan {
                        rid: previd,
                        id: 0,
                        ns: 0,
                        nei: 0,
                    };
                }

                // -y
                if get_con(s, 3) != RC_NOT_CONNECTED {
                    let ai = chf.neighbour_index(x, y, i, 3);
                    let nr = src_reg[ai];
                    if nr != 0 && (nr & RC_BORDER_REG) == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // Create unique ID.
        for sweep in sweeps.iter_mut().take(rid as usize).skip(1) {
            if sweep.nei != NULL_NEI && sweep.nei != 0 && prev[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if id == 0xffff {
                    return Err(Error::Recast("region id overflow".to_string()));
                }
                sweep.id = id;
                id += 1;
            }
        }

        // Remap IDs
        for x in border_size..w - border_size {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if src_reg[i] > 0 && src_reg[i] < rid {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    Ok(id)
}

/// Partitions the walkable surface into monotone regions with a row sweep.
///
/// Faster than [`build_regions`] and does not need the distance field, at
/// the cost of long thin polygons.
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let mut src_reg = vec![0u16; chf.span_count];
    let id = sweep_regions(chf, border_size, &mut src_reg)?;
    chf.border_size = border_size;

    let mut overlaps = Vec::new();
    let mut max_regions = id;
    merge_and_filter_regions(
        min_region_area,
        merge_region_area,
        &mut max_regions,
        chf,
        &mut src_reg,
        &mut overlaps,
    )?;
    chf.max_regions = max_regions;

    for (span, &reg) in chf.spans.iter_mut().zip(src_reg.iter()) {
        span.reg = reg;
    }
    Ok(())
}

fn merge_and_filter_layer_regions(
    min_region_area: i32,
    max_region_id: &mut u16,
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let nreg = *max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    // Find region neighbours and overlapping regions.
    let mut lregs: Vec<u16> = Vec::with_capacity(32);
    for y in 0..h {
        for x in 0..w {
            let c = chf.cell(x, y);
            lregs.clear();

            for i in c.index as usize..(c.index + c.count) as usize {
                let s = chf.spans[i];
                let area = chf.areas[i];
                let ri = src_reg[i];
                if ri == 0 || ri as usize >= nreg {
                    continue;
                }
                let reg = &mut regions[ri as usize];
                reg.span_count += 1;
                reg.area_type = area;
                reg.ymin = reg.ymin.min(s.y);
                reg.ymax = reg.ymax.max(s.y);

                // Collect all region layers.
                lregs.push(ri);

                // Update neighbours
                for dir in 0..4 {
                    if get_con(&s, dir) != RC_NOT_CONNECTED {
                        let ai = chf.neighbour_index(x, y, i, dir);
                        let rai = src_reg[ai];
                        if rai > 0 && (rai as usize) < nreg && rai != ri {
                            regions[ri as usize].add_unique_connection(rai);
                        }
                        if (rai & RC_BORDER_REG) != 0 {
                            regions[ri as usize].connects_to_border = true;
                        }
                    }
                }
            }

            // Update overlapping regions.
            for i in 0..lregs.len().saturating_sub(1) {
                for j in i + 1..lregs.len() {
                    if lregs[i] != lregs[j] {
                        let (a, b) = (lregs[i], lregs[j]);
                        regions[a as usize].add_unique_floor_region(b);
                        regions[b as usize].add_unique_floor_region(a);
                    }
                }
            }
        }
    }

    // Create 2D layers from regions.
    let mut layer_id = 1u16;
    for reg in regions.iter_mut() {
        reg.id = 0;
    }

    // Merge monotone regions to create non-overlapping areas.
    let mut stack: std::collections::VecDeque<usize> = std::collections::VecDeque::new();
    for i in 1..nreg {
        // Skip already visited.
        if regions[i].id != 0 {
            continue;
        }

        // Start search.
        regions[i].id = layer_id;
        stack.clear();
        stack.push_back(i);

        while let Some(ri) = stack.pop_front() {
            let connections = regions[ri].connections.clone();
            let area_type = regions[ri].area_type;
            for nei in connections {
                let nei = nei as usize;
                // Skip already visited.
                if regions[nei].id != 0 {
                    continue;
                }
                // Skip if different area type, do not connect regions with different area type.
                if area_type != regions[nei].area_type {
                    continue;
                }
                // Skip if the neighbour is overlapping root region.
                if regions[i].floors.contains(&(nei as u16)) {
                    continue;
                }

                // Deepen
                stack.push_back(nei);
                regions[nei].id = layer_id;

                // Merge current layers to root.
                let floors = regions[nei].floors.clone();
                for f in floors {
                    regions[i].add_unique_floor_region(f);
                }
                regions[i].ymin = regions[i].ymin.min(regions[nei].ymin);
                regions[i].ymax = regions[i].ymax.max(regions[nei].ymax);
                regions[i].span_count += regions[nei].span_count;
                regions[nei].span_count = 0;
                regions[i].connects_to_border =
                    regions[i].connects_to_border || regions[nei].connects_to_border;
            }
        }

        layer_id += 1;
    }

    // Remove small regions
    for i in 0..nreg {
        if regions[i].span_count > 0
            && regions[i].span_count < min_region_area
            && !regions[i].connects_to_border
        {
            let reg = regions[i].id;
            for r in regions.iter_mut() {
                if r.id == reg {
                    r.id = 0;
                }
            }
        }
    }

    *max_region_id = compress_region_ids(&mut regions);

    // Remap regions.
    for r in src_reg.iter_mut() {
        if (*r & RC_BORDER_REG) == 0 {
            *r = regions[*r as usize].id;
        }
    }
    Ok(())
}

/// Partitions the walkable surface into non-overlapping layers.
///
/// Like [`build_regions_monotone`], but the row sweeps are merged into
/// regions that never overlap vertically.
pub fn build_layer_regions(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
) -> Result<()> {
    let mut src_reg = vec![0u16; chf.span_count];
    let id = sweep_regions(chf, border_size, &mut src_reg)?;
    chf.border_size = border_size;

    let mut max_regions = id;
    merge_and_filter_layer_regions(min_region_area, &mut max_regions, chf, &mut src_reg)?;
    chf.max_regions = max_regions;

    for (span, &reg) in chf.spans.iter_mut().zip(src_reg.iter()) {
        span.reg = reg;
    }
    Ok(())
}
