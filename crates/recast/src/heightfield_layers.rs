//! Heightfield layers for tile caches
//!
//! A compact heightfield is split into 2D layers in which every cell holds at
//! most one walkable span. Overlapping floors (bridges, stories) end up in
//! different layers; each layer can later be rebuilt into a navmesh tile on
//! its own.

use glam::Vec3;

use recast_common::{Error, Result};

use crate::compact_heightfield::{get_con, get_dir_offset_x, get_dir_offset_y, CompactHeightfield};
use crate::{RC_NOT_CONNECTED, RC_NULL_AREA};

/// Max overlapping regions tracked per region
const RC_MAX_LAYERS: usize = 63;
/// Max neighbour regions tracked per region
const RC_MAX_NEIS: usize = 16;

const UNSET: u8 = 0xff;

#[derive(Debug, Clone)]
struct LayerRegion {
    layers: Vec<u8>,
    neis: Vec<u8>,
    ymin: u16,
    ymax: u16,
    layer_id: u8,
    base: bool,
}

impl Default for LayerRegion {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            neis: Vec::new(),
            ymin: 0xffff,
            ymax: 0,
            layer_id: UNSET,
            base: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerSweepSpan {
    /// Number of samples connected to `nei`
    ns: u16,
    id: u8,
    nei: u8,
}

/// Adds `v` unless already present. Returns false when `a` is full.
fn add_unique(a: &mut Vec<u8>, max_size: usize, v: u8) -> bool {
    if a.contains(&v) {
        return true;
    }
    if a.len() >= max_size {
        return false;
    }
    a.push(v);
    true
}

#[inline]
fn overlap_range(amin: u16, amax: u16, bmin: u16, bmax: u16) -> bool {
    !(amin > bmax || amax < bmin)
}

/// One 2D layer of a tile
///
/// `heights` are relative to `hmin`, `0xff` marks an empty cell. `cons`
/// packs the walkable connection mask in the low nibble and the portal mask
/// (edges leading into another layer) in the high nibble.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightfieldLayer {
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    /// Usable sub-region of the grid
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
    /// Height range of the layer, in voxels
    pub hmin: i32,
    pub hmax: i32,
    pub heights: Vec<u8>,
    pub areas: Vec<u8>,
    pub cons: Vec<u8>,
}

impl HeightfieldLayer {
    /// Height and area at `(x, y)`, or `None` for an empty cell
    pub fn cell(&self, x: i32, y: i32) -> Option<(u8, u8)> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let idx = (x + y * self.width) as usize;
        match self.heights[idx] {
            UNSET => None,
            h => Some((h, self.areas[idx])),
        }
    }

    pub fn walkable_cell_count(&self) -> usize {
        self.heights.iter().filter(|&&h| h != UNSET).count()
    }
}

/// All layers of one tile
#[derive(Debug, Clone, Default)]
pub struct HeightfieldLayerSet {
    pub layers: Vec<HeightfieldLayer>,
}

impl HeightfieldLayerSet {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Partitions the walkable spans into monotone regions, one sweep per row.
///
/// Returns the region id of every span (0xff when unassigned) and the
/// region count.
fn sweep_layer_regions(chf: &CompactHeightfield, border_size: i32) -> Result<(Vec<u8>, usize)> {
    let w = chf.width;
    let h = chf.height;

    let mut src_reg = vec![UNSET; chf.span_count];
    let mut sweeps = vec![LayerSweepSpan::default(); w.max(0) as usize];
    let mut prev_count = [0u16; 256];
    let mut reg_id: usize = 0;

    for y in border_size..h - border_size {
        prev_count[..reg_id].fill(0);
        let mut sweep_id: usize = 0;

        for x in border_size..w - border_size {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }
                let s = chf.spans[i];
                let mut sid = UNSET;

                // -x
                if get_con(&s, 0) != RC_NOT_CONNECTED {
                    let ai = chf.neighbour_index(x, y, i, 0);
                    if chf.areas[ai] != RC_NULL_AREA && src_reg[ai] != UNSET {
                        sid = src_reg[ai];
                    }
                }

                if sid == UNSET {
                    if sweep_id >= UNSET as usize {
                        return Err(Error::NavMeshGeneration(
                            "heightfield layers: sweep id overflow".to_string(),
                        ));
                    }
                    sid = sweep_id as u8;
                    sweep_id += 1;
                    sweeps[sid as usize].nei = UNSET;
                    sweeps[sid as usize].ns = 0;
                }

                // -y
                if get_con(&s, 3) != RC_NOT_CONNECTED {
                    let ai = chf.neighbour_index(x, y, i, 3);
                    let nr = src_reg[ai];
                    if nr != UNSET {
                        let sweep = &mut sweeps[sid as usize];
                        // Set neighbour when first valid neighbour is encountered.
                        if sweep.ns == 0 {
                            sweep.nei = nr;
                        }
                        if sweep.nei == nr {
                            sweep.ns += 1;
                            prev_count[nr as usize] += 1;
                        } else {
                            // More than one neighbour.
                            sweep.nei = UNSET;
                        }
                    }
                }

                src_reg[i] = sid;
            }
        }

        // Create unique ids.
        for sweep in sweeps.iter_mut().take(sweep_id) {
            if sweep.nei != UNSET && prev_count[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if reg_id >= UNSET as usize {
                    return Err(Error::NavMeshGeneration(
                        "heightfield layers: region id overflow".to_string(),
                    ));
                }
                sweep.id = reg_id as u8;
                reg_id += 1;
            }
        }

        // Remap local sweep ids to region ids.
        for x in border_size..w - border_size {
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                if src_reg[i] != UNSET {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    Ok((src_reg, reg_id))
}

fn layer_overflow() -> Error {
    Error::NavMeshGeneration(
        "heightfield layers: too many overlapping walkable platforms".to_string(),
    )
}

/// Collects the neighbours, overlaps and height range of every region.
fn collect_region_info(chf: &CompactHeightfield, src_reg: &[u8], regs: &mut [LayerRegion]) -> Result<()> {
    let mut lregs: Vec<u8> = Vec::with_capacity(RC_MAX_LAYERS);
    for y in 0..chf.height {
        for x in 0..chf.width {
            lregs.clear();
            let c = chf.cell(x, y);
            for i in c.index as usize..(c.index + c.count) as usize {
                let ri = src_reg[i];
                if ri == UNSET {
                    continue;
                }
                let s = chf.spans[i];
                let reg = &mut regs[ri as usize];
                reg.ymin = reg.ymin.min(s.y);
                reg.ymax = reg.ymax.max(s.y);

                if lregs.len() < RC_MAX_LAYERS {
                    lregs.push(ri);
                }

                for dir in 0..4 {
                    if get_con(&s, dir) == RC_NOT_CONNECTED {
                        continue;
                    }
                    let rai = src_reg[chf.neighbour_index(x, y, i, dir)];
                    if rai != UNSET && rai != ri {
                        // A full list only costs a few extra layers.
                        add_unique(&mut regs[ri as usize].neis, RC_MAX_NEIS, rai);
                    }
                }
            }

            // Regions stacked in the same column overlap.
            for (a, &ra) in lregs.iter().enumerate() {
                for &rb in &lregs[a + 1..] {
                    if ra == rb {
                        continue;
                    }
                    if !add_unique(&mut regs[ra as usize].layers, RC_MAX_LAYERS, rb)
                        || !add_unique(&mut regs[rb as usize].layers, RC_MAX_LAYERS, ra)
                    {
                        return Err(layer_overflow());
                    }
                }
            }
        }
    }
    Ok(())
}

/// Absorbs the overlap list and height range of region `from` into `into`.
fn absorb_region(regs: &mut [LayerRegion], into: usize, from: usize) -> Result<()> {
    let layers = regs[from].layers.clone();
    let (ymin, ymax) = (regs[from].ymin, regs[from].ymax);
    let root = &mut regs[into];
    for l in layers {
        if !add_unique(&mut root.layers, RC_MAX_LAYERS, l) {
            return Err(layer_overflow());
        }
    }
    root.ymin = root.ymin.min(ymin);
    root.ymax = root.ymax.max(ymax);
    Ok(())
}

/// Flood fills connected, non-overlapping regions into 2D layers.
fn assign_layer_ids(regs: &mut [LayerRegion]) -> Result<()> {
    let mut layer_id: usize = 0;
    let mut stack: std::collections::VecDeque<usize> = std::collections::VecDeque::new();

    for i in 0..regs.len() {
        if regs[i].layer_id != UNSET {
            continue;
        }
        if layer_id >= UNSET as usize {
            return Err(layer_overflow());
        }
        regs[i].layer_id = layer_id as u8;
        regs[i].base = true;

        stack.clear();
        stack.push_back(i);
        while let Some(ri) = stack.pop_front() {
            let neis = regs[ri].neis.clone();
            for nei in neis {
                let n = nei as usize;
                if regs[n].layer_id != UNSET {
                    continue;
                }
                // Skip if the neighbour is overlapping the root region.
                if regs[i].layers.contains(&nei) {
                    continue;
                }
                // Skip if the height range would become too large.
                let ymin = regs[i].ymin.min(regs[n].ymin);
                let ymax = regs[i].ymax.max(regs[n].ymax);
                if ymax - ymin >= 255 {
                    continue;
                }

                stack.push_back(n);
                regs[n].layer_id = layer_id as u8;
                absorb_region(regs, i, n)?;
            }
        }

        layer_id += 1;
    }
    Ok(())
}

/// Merges base layers that do not overlap and are close in height.
fn merge_close_layers(regs: &mut [LayerRegion], merge_height: u16) -> Result<()> {
    let nregs = regs.len();
    for i in 0..nregs {
        if !regs[i].base {
            continue;
        }
        let new_id = regs[i].layer_id;

        loop {
            let mut old_id = None;
            for j in 0..nregs {
                if i == j || !regs[j].base {
                    continue;
                }
                let (ri, rj) = (&regs[i], &regs[j]);

                // Skip if the regions are not close to each other.
                if !overlap_range(ri.ymin, ri.ymax + merge_height, rj.ymin, rj.ymax + merge_height) {
                    continue;
                }
                // Skip if the height range would become too large.
                let ymin = ri.ymin.min(rj.ymin);
                let ymax = ri.ymax.max(rj.ymax);
                if ymax - ymin >= 255 {
                    continue;
                }

                // Make sure that there is no overlap when merging 'i' and 'j'.
                let overlap = (0..nregs)
                    .any(|k| regs[k].layer_id == rj.layer_id && ri.layers.contains(&(k as u8)));
                if overlap {
                    continue;
                }

                old_id = Some(rj.layer_id);
                break;
            }

            let Some(old_id) = old_id else {
                break;
            };

            for j in 0..nregs {
                if regs[j].layer_id != old_id {
                    continue;
                }
                regs[j].base = false;
                regs[j].layer_id = new_id;
                absorb_region(regs, i, j)?;
            }
        }
    }
    Ok(())
}

/// Renumbers layer ids densely. Returns the layer count.
fn compact_layer_ids(regs: &mut [LayerRegion]) -> usize {
    let mut remap = [UNSET; 256];
    let mut used = [false; 256];
    for r in regs.iter() {
        used[r.layer_id as usize] = true;
    }
    let mut count = 0usize;
    for (id, &u) in used.iter().enumerate() {
        if u {
            remap[id] = count as u8;
            count += 1;
        }
    }
    for r in regs.iter_mut() {
        r.layer_id = remap[r.layer_id as usize];
    }
    count
}

/// Splits `chf` into layers of non-overlapping walkable cells.
///
/// `border_size` cells are excluded from every side of the layers.
/// Regions closer than `walkable_height * 4` voxels vertically are merged
/// into one layer when they do not overlap.
pub fn build_heightfield_layers(
    chf: &CompactHeightfield,
    border_size: i32,
    walkable_height: i32,
) -> Result<HeightfieldLayerSet> {
    let w = chf.width;
    let h = chf.height;

    let (src_reg, nregs) = sweep_layer_regions(chf, border_size)?;

    let mut regs = vec![LayerRegion::default(); nregs];
    collect_region_info(chf, &src_reg, &mut regs)?;
    assign_layer_ids(&mut regs)?;
    merge_close_layers(&mut regs, (walkable_height * 4).clamp(0, 0xffff) as u16)?;
    let nlayers = compact_layer_ids(&mut regs);

    let mut lset = HeightfieldLayerSet::default();
    if nlayers == 0 {
        log::debug!("heightfield layers: no walkable layers");
        return Ok(lset);
    }

    let lw = w - border_size * 2;
    let lh = h - border_size * 2;

    // Contracted bbox for layers.
    let pad = border_size as f32 * chf.cs;
    let mut bmin = chf.bmin;
    let mut bmax = chf.bmax;
    bmin.x += pad;
    bmin.z += pad;
    bmax.x -= pad;
    bmax.z -= pad;

    let grid_size = (lw * lh) as usize;
    for cur_id in 0..nlayers as u8 {
        // Find layer height bounds.
        let (hmin, hmax) = regs
            .iter()
            .filter(|r| r.base && r.layer_id == cur_id)
            .last()
            .map(|r| (r.ymin as i32, r.ymax as i32))
            .unwrap_or((0, 0));

        let mut layer = HeightfieldLayer {
            bmin: Vec3::new(bmin.x, bmin.y + hmin as f32 * chf.ch, bmin.z),
            bmax: Vec3::new(bmax.x, bmin.y + hmax as f32 * chf.ch, bmax.z),
            cs: chf.cs,
            ch: chf.ch,
            width: lw,
            height: lh,
            minx: lw,
            maxx: 0,
            miny: lh,
            maxy: 0,
            hmin,
            hmax,
            heights: vec![UNSET; grid_size],
            areas: vec![RC_NULL_AREA; grid_size],
            cons: vec![0; grid_size],
        };

        for y in 0..lh {
            for x in 0..lw {
                let cx = border_size + x;
                let cy = border_size + y;
                let c = chf.cell(cx, cy);
                for j in c.index as usize..(c.index + c.count) as usize {
                    if src_reg[j] == UNSET {
                        continue;
                    }
                    let lid = regs[src_reg[j] as usize].layer_id;
                    if lid != cur_id {
                        continue;
                    }

                    layer.minx = layer.minx.min(x);
                    layer.maxx = layer.maxx.max(x);
                    layer.miny = layer.miny.min(y);
                    layer.maxy = layer.maxy.max(y);

                    let s = chf.spans[j];
                    let idx = (x + y * lw) as usize;
                    layer.heights[idx] = (s.y as i32 - hmin).clamp(0, 0xfe) as u8;
                    layer.areas[idx] = chf.areas[j];

                    let mut portal = 0u8;
                    let mut con = 0u8;
                    for dir in 0..4 {
                        if get_con(&s, dir) == RC_NOT_CONNECTED {
                            continue;
                        }
                        let ax = cx + get_dir_offset_x(dir);
                        let ay = cy + get_dir_offset_y(dir);
                        let ai = chf.neighbour_index(cx, cy, j, dir);
                        if chf.areas[ai] == RC_NULL_AREA {
                            continue;
                        }
                        let alid = match src_reg[ai] {
                            UNSET => UNSET,
                            r => regs[r as usize].layer_id,
                        };
                        if lid != alid {
                            portal |= 1 << dir;
                            // Match the height on both sides of the portal.
                            let ay_h = chf.spans[ai].y as i32;
                            if ay_h > hmin {
                                let ph = (ay_h - hmin).clamp(0, 0xfe) as u8;
                                layer.heights[idx] = layer.heights[idx].max(ph);
                            }
                        } else {
                            let nx = ax - border_size;
                            let ny = ay - border_size;
                            if nx >= 0 && ny >= 0 && nx < lw && ny < lh {
                                con |= 1 << dir;
                            }
                        }
                    }
                    layer.cons[idx] = (portal << 4) | con;
                }
            }
        }

        if layer.minx > layer.maxx {
            layer.minx = 0;
            layer.maxx = 0;
        }
        if layer.miny > layer.maxy {
            layer.miny = 0;
            layer.maxy = 0;
        }

        lset.layers.push(layer);
    }

    log::debug!("heightfield layers built: {} layers", lset.len());
    Ok(lset)
}
