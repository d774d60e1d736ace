//! Contour generation for Recast
//!
//! Region boundaries of the compact heightfield are traced into raw vertex
//! chains and simplified. Holes are stitched into the outline of their
//! region so every contour is a simple polygon ready for triangulation.

use glam::Vec3;
use recast_common::Result;

use crate::compact_heightfield::{get_con, get_dir_offset_x, get_dir_offset_y, CompactHeightfield};
use crate::{RC_AREA_BORDER, RC_BORDER_REG, RC_BORDER_VERTEX, RC_CONTOUR_REG_MASK, RC_NOT_CONNECTED};

/// A vertex in a contour
///
/// `flags` holds the neighbour region id in the low 16 bits together with
/// the [`RC_BORDER_VERTEX`] and [`RC_AREA_BORDER`] markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContourVertex {
    /// X-coordinate (cell units)
    pub x: i32,
    /// Y-coordinate (height units)
    pub y: i32,
    /// Z-coordinate (cell units)
    pub z: i32,
    pub flags: i32,
}

impl ContourVertex {
    pub fn new(x: i32, y: i32, z: i32, flags: i32) -> Self {
        Self { x, y, z, flags }
    }

    /// Region on the other side of the edge starting at this vertex
    pub fn neighbour_region(&self) -> u16 {
        (self.flags & RC_CONTOUR_REG_MASK) as u16
    }

    pub fn is_border_vertex(&self) -> bool {
        (self.flags & RC_BORDER_VERTEX) != 0
    }
}

/// Simplified outline of one region
#[derive(Debug, Clone, Default)]
pub struct Contour {
    /// Simplified vertices
    pub vertices: Vec<ContourVertex>,
    /// Raw vertices as traced from the heightfield
    pub raw_vertices: Vec<ContourVertex>,
    /// Region id of the contour
    pub region: u16,
    /// Area id of the contour
    pub area: u8,
}

/// Build flags for contour generation
#[derive(Debug, Clone, Copy)]
pub struct BuildContoursFlags {
    /// Tessellate solid (impassable) edges longer than the max edge length
    pub tess_wall_edges: bool,
    /// Tessellate edges between areas longer than the max edge length
    pub tess_area_edges: bool,
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self {
            tess_wall_edges: true,
            tess_area_edges: false,
        }
    }
}

impl BuildContoursFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn any(self) -> bool {
        self.tess_wall_edges || self.tess_area_edges
    }
}

/// A set of contours
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// Width of the usable area of the heightfield (border excluded)
    pub width: i32,
    /// Height of the usable area of the heightfield (border excluded)
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Border size used during generation
    pub border_size: i32,
    /// Maximum edge error during simplification
    pub max_error: f32,
}

impl ContourSet {
    /// Traces and simplifies the region contours of `chf`.
    ///
    /// Regions must have been built. Vertices are expressed relative to the
    /// inner (border-free) grid.
    pub fn build(
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
        build_flags: BuildContoursFlags,
    ) -> Result<Self> {
        let w = chf.width;
        let h = chf.height;
        let border_size = chf.border_size;

        let mut bmin = chf.bmin;
        let mut bmax = chf.bmax;
        if border_size > 0 {
            // Remove the border from the bounds.
            let pad = border_size as f32 * chf.cs;
            bmin.x += pad;
            bmin.z += pad;
            bmax.x -= pad;
            bmax.z -= pad;
        }

        let mut cset = Self {
            contours: Vec::new(),
            width: w - border_size * 2,
            height: h - border_size * 2,
            bmin,
            bmax,
            cs: chf.cs,
            ch: chf.ch,
            border_size,
            max_error,
        };

        let mut flags = vec![0u8; chf.span_count];

        // Mark boundaries.
        for y in 0..h {
            for x in 0..w {
                let c = chf.cell(x, y);
                for i in c.index as usize..(c.index + c.count) as usize {
                    let s = &chf.spans[i];
                    if s.reg == 0 || (s.reg & RC_BORDER_REG) != 0 {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0u8;
                    for dir in 0..4 {
                        let mut r = 0;
                        if get_con(s, dir) != RC_NOT_CONNECTED {
                            let ai = chf.neighbour_index(x, y, i, dir);
                            r = chf.spans[ai].reg;
                        }
                        if r == s.reg {
                            res |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut verts: Vec<ContourVertex> = Vec::with_capacity(256);
        let mut simplified: Vec<ContourVertex> = Vec::with_capacity(64);

        for y in 0..h {
            for x in 0..w {
                let c = chf.cell(x, y);
                for i in c.index as usize..(c.index + c.count) as usize {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let reg = chf.spans[i].reg;
                    if reg == 0 || (reg & RC_BORDER_REG) != 0 {
                        continue;
                    }
                    let area = chf.areas[i];

                    verts.clear();
                    simplified.clear();

                    walk_contour(x, y, i, chf, &mut flags, &mut verts);
                    simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    // Create contour.
                    if simplified.len() >= 3 {
                        let offset = |v: &ContourVertex| {
                            ContourVertex::new(v.x - border_size, v.y, v.z - border_size, v.flags)
                        };
                        cset.contours.push(Contour {
                            vertices: simplified.iter().map(offset).collect(),
                            raw_vertices: verts.iter().map(offset).collect(),
                            region: reg,
                            area,
                        });
                    }
                }
            }
        }

        cset.merge_holes(chf.max_regions);

        log::debug!("built {} contours", cset.contours.len());
        Ok(cset)
    }

    /// Merges hole contours into the outline of their region
    fn merge_holes(&mut self, max_regions: u16) {
        if self.contours.is_empty() {
            return;
        }

        // Calculate winding of all polygons. Backwards wound contours are holes.
        let winding: Vec<bool> = self
            .contours
            .iter()
            .map(|c| calc_area_of_polygon_2d(&c.vertices) < 0)
            .collect();
        if !winding.iter().any(|&hole| hole) {
            return;
        }

        // Collect outline contour and holes contours per region.
        // There is one outline and multiple holes.
        let nregions = max_regions as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; nregions];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); nregions];
        for (i, cont) in self.contours.iter().enumerate() {
            let reg = cont.region as usize;
            if reg >= nregions {
                continue;
            }
            if winding[i] {
                holes[reg].push(i);
            } else {
                if outlines[reg].is_some() {
                    log::error!("multiple outlines for region {}", reg);
                }
                outlines[reg] = Some(i);
            }
        }

        for reg in 0..nregions {
            if holes[reg].is_empty() {
                continue;
            }
            match outlines[reg] {
                Some(outline) => {
                    self.merge_region_holes(outline, &holes[reg]);
                }
                None => {
                    // The region does not have an outline.
                    // This can happen if the contour becomes self-overlapping
                    // because of too aggressive simplification settings.
                    log::error!(
                        "missing outline for region {}, all holes ignored",
                        reg
                    );
                }
            }
        }

        // Merged holes are emptied; drop them.
        self.contours.retain(|c| !c.vertices.is_empty());
    }

    fn merge_region_holes(&mut self, outline: usize, hole_ids: &[usize]) {
        struct Hole {
            contour: usize,
            minx: i32,
            minz: i32,
            leftmost: usize,
        }

        // Sort holes from left to right.
        let mut holes: Vec<Hole> = hole_ids
            .iter()
            .map(|&h| {
                let (minx, minz, leftmost) = find_left_most_vertex(&self.contours[h].vertices);
                Hole {
                    contour: h,
                    minx,
                    minz,
                    leftmost,
                }
            })
            .collect();
        holes.sort_by(|a, b| a.minx.cmp(&b.minx).then(a.minz.cmp(&b.minz)));

        for i in 0..holes.len() {
            let hole_verts = self.contours[holes[i].contour].vertices.clone();
            let mut index = None;
            let mut best_vertex = holes[i].leftmost;

            for _ in 0..hole_verts.len() {
                // Find potential diagonals.
                // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
                let corner = hole_verts[best_vertex];
                let outline_verts = &self.contours[outline].vertices;
                let mut diags: Vec<(usize, i32)> = Vec::new();
                for j in 0..outline_verts.len() {
                    if in_cone_contour(j, outline_verts, &corner) {
                        let dx = outline_verts[j].x - corner.x;
                        let dz = outline_verts[j].z - corner.z;
                        diags.push((j, dx * dx + dz * dz));
                    }
                }
                // Prefer the shortest connection.
                diags.sort_by_key(|&(_, d)| d);

                // Find a diagonal that is not intersecting the outline nor the remaining holes.
                for &(vert, _) in &diags {
                    let pt = outline_verts[vert];
                    let mut intersect = intersect_seg_contour(&pt, &corner, Some(vert), outline_verts);
                    for later in &holes[i..] {
                        if intersect {
                            break;
                        }
                        intersect |= intersect_seg_contour(
                            &pt,
                            &corner,
                            None,
                            &self.contours[later.contour].vertices,
                        );
                    }
                    if !intersect {
                        index = Some(vert);
                        break;
                    }
                }
                if index.is_some() {
                    break;
                }
                // All the potential diagonals for the current vertex were intersecting, try next vertex.
                best_vertex = (best_vertex + 1) % hole_verts.len();
            }

            let Some(index) = index else {
                log::warn!(
                    "failed to find merge points for contour {} and hole {}",
                    outline,
                    holes[i].contour
                );
                continue;
            };

            let outline_verts = &self.contours[outline].vertices;
            let merged = merge_contour_vertices(outline_verts, &hole_verts, index, best_vertex);
            self.contours[outline].vertices = merged;
            self.contours[holes[i].contour].vertices.clear();
        }
    }
}

fn get_corner_height(
    x: i32,
    y: i32,
    i: usize,
    dir: usize,
    chf: &CompactHeightfield,
) -> (i32, bool) {
    let s = &chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 0x3;

    // Combine region and area codes in order to prevent
    // border vertices which are in between two areas to be removed.
    let code = |idx: usize| chf.spans[idx].reg as u32 | ((chf.areas[idx] as u32) << 16);
    let mut regs = [0u32; 4];
    regs[0] = code(i);

    if get_con(s, dir) != RC_NOT_CONNECTED {
        let ax = x + get_dir_offset_x(dir);
        let ay = y + get_dir_offset_y(dir);
        let ai = chf.neighbour_index(x, y, i, dir);
        let as_ = &chf.spans[ai];
        ch = ch.max(as_.y as i32);
        regs[1] = code(ai);
        if get_con(as_, dirp) != RC_NOT_CONNECTED {
            let ai2 = chf.neighbour_index(ax, ay, ai, dirp);
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = code(ai2);
        }
    }
    if get_con(s, dirp) != RC_NOT_CONNECTED {
        let ax = x + get_dir_offset_x(dirp);
        let ay = y + get_dir_offset_y(dirp);
        let ai = chf.neighbour_index(x, y, i, dirp);
        let as_ = &chf.spans[ai];
        ch = ch.max(as_.y as i32);
        regs[3] = code(ai);
        if get_con(as_, dir) != RC_NOT_CONNECTED {
            let ai2 = chf.neighbour_index(ax, ay, ai, dir);
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = code(ai2);
        }
    }

    // Check if the vertex is special edge vertex, these vertices will be removed later.
    let border_reg = RC_BORDER_REG as u32;
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 0x3;
        let c = (j + 2) & 0x3;
        let d = (j + 3) & 0x3;

        // The vertex is a border vertex there are two same exterior cells in a row,
        // followed by two interior cells and none of the regions are out of bounds.
        let two_same_exts = (regs[a] & regs[b] & border_reg) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border_reg) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }

    (ch, is_border_vertex)
}

fn walk_contour(
    mut x: i32,
    mut y: i32,
    mut i: usize,
    chf: &CompactHeightfield,
    flags: &mut [u8],
    points: &mut Vec<ContourVertex>,
) {
    // Choose the first non-connected edge
    let mut dir = 0usize;
    while (flags[i] & (1 << dir)) == 0 {
        dir += 1;
    }

    let start_dir = dir;
    let starti = i;
    let area = chf.areas[i];

    let mut iter = 0;
    while iter < 40000 {
        iter += 1;
        if (flags[i] & (1 << dir)) != 0 {
            // Choose the edge corner
            let (py, is_border_vertex) = get_corner_height(x, y, i, dir, chf);
            let mut px = x;
            let mut pz = y;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = 0i32;
            let mut is_area_border = false;
            let s = &chf.spans[i];
            if get_con(s, dir) != RC_NOT_CONNECTED {
                let ai = chf.neighbour_index(x, y, i, dir);
                r = chf.spans[ai].reg as i32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                r |= RC_BORDER_VERTEX;
            }
            if is_area_border {
                r |= RC_AREA_BORDER;
            }
            points.push(ContourVertex::new(px, py, pz, r));

            flags[i] &= !(1 << dir); // Remove visited edges
            dir = (dir + 1) & 0x3; // Rotate CW
        } else {
            let s = &chf.spans[i];
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
}

/// Squared 2D distance from (x, z) to segment p-q
fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Simplified vertices temporarily keep the raw index in `flags`.
fn simplify_contour(
    points: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: i32,
    build_flags: BuildContoursFlags,
) {
    let pn = points.len();
    if pn == 0 {
        return;
    }

    // Add initial points.
    let has_connections = points.iter().any(|p| (p.flags & RC_CONTOUR_REG_MASK) != 0);
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs =
                (points[i].flags & RC_CONTOUR_REG_MASK) != (points[ii].flags & RC_CONTOUR_REG_MASK);
            let area_borders =
                (points[i].flags & RC_AREA_BORDER) != (points[ii].flags & RC_AREA_BORDER);
            if different_regs || area_borders {
                simplified.push(ContourVertex::new(points[i].x, points[i].y, points[i].z, i as i32));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut ll = 0usize;
        let mut ur = 0usize;
        for (i, p) in points.iter().enumerate() {
            let (l, u) = (&points[ll], &points[ur]);
            if p.x < l.x || (p.x == l.x && p.z < l.z) {
                ll = i;
            }
            if p.x > u.x || (p.x == u.x && p.z > u.z) {
                ur = i;
            }
        }
        simplified.push(ContourVertex::new(points[ll].x, points[ll].y, points[ll].z, ll as i32));
        simplified.push(ContourVertex::new(points[ur].x, points[ur].y, points[ur].z, ur as i32));
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let mut ax = simplified[i].x;
        let mut az = simplified[i].z;
        let ai = simplified[i].flags as usize;

        let mut bx = simplified[ii].x;
        let mut bz = simplified[ii].z;
        let bi = simplified[ii].flags as usize;

        // Find maximum deviation from the segment.
        let mut maxd = 0.0f32;
        let mut maxi: Option<usize> = None;

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (cinc, mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            (1, (ai + 1) % pn, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            (pn - 1, (bi + pn - 1) % pn, ai)
        };

        // Tessellate only outer edges or edges between areas.
        if (points[ci].flags & RC_CONTOUR_REG_MASK) == 0 || (points[ci].flags & RC_AREA_BORDER) != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci].x, points[ci].z, ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match maxi {
            Some(m) if maxd > max_error_sqr => {
                simplified.insert(
                    i + 1,
                    ContourVertex::new(points[m].x, points[m].y, points[m].z, m as i32),
                );
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    if max_edge_len > 0 && build_flags.any() {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();

            let ax = simplified[i].x;
            let az = simplified[i].z;
            let ai = simplified[i].flags as usize;

            let bx = simplified[ii].x;
            let bz = simplified[ii].z;
            let bi = simplified[ii].flags as usize;

            let mut maxi: Option<usize> = None;
            let ci = (ai + 1) % pn;

            // Tessellate only outer edges or edges between areas.
            let tess = (build_flags.tess_wall_edges && (points[ci].flags & RC_CONTOUR_REG_MASK) == 0)
                || (build_flags.tess_area_edges && (points[ci].flags & RC_AREA_BORDER) != 0);

            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        if bx > ax || (bx == ax && bz > az) {
                            maxi = Some((ai + n / 2) % pn);
                        } else {
                            maxi = Some((ai + (n + 1) / 2) % pn);
                        }
                    }
                }
            }

            match maxi {
                Some(m) => {
                    simplified.insert(
                        i + 1,
                        ContourVertex::new(points[m].x, points[m].y, points[m].z, m as i32),
                    );
                }
                None => i += 1,
            }
        }
    }

    for v in simplified.iter_mut() {
        // The edge vertex flag is take from the current raw point,
        // and the neighbour region is take from the next raw point.
        let bi = v.flags as usize;
        let ai = (bi + 1) % pn;
        v.flags = (points[ai].flags & (RC_CONTOUR_REG_MASK | RC_AREA_BORDER))
            | (points[bi].flags & RC_BORDER_VERTEX);
    }
}

/// Removes adjacent vertices which are equal on the xz-plane
fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = (i + 1) % simplified.len();
        if simplified.len() > 1 && vequal(&simplified[i], &simplified[ni]) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

fn calc_area_of_polygon_2d(verts: &[ContourVertex]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i];
        let vj = &verts[j];
        area += vi.x * vj.z - vj.x * vi.z;
        j = i;
    }
    (area + 1) / 2
}

fn find_left_most_vertex(verts: &[ContourVertex]) -> (i32, i32, usize) {
    let mut minx = verts[0].x;
    let mut minz = verts[0].z;
    let mut leftmost = 0;
    for (i, v) in verts.iter().enumerate().skip(1) {
        if v.x < minx || (v.x == minx && v.z < minz) {
            minx = v.x;
            minz = v.z;
            leftmost = i;
        }
    }
    (minx, minz, leftmost)
}

#[inline]
pub(crate) fn area2(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> i32 {
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

/// True if c is strictly to the left of the directed line a-b
#[inline]
pub(crate) fn left(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
fn collinear(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) == 0
}

/// True if ab and cd intersect properly, sharing a point interior to both
/// segments.
pub(crate) fn intersect_prop(
    a: &ContourVertex,
    b: &ContourVertex,
    c: &ContourVertex,
    d: &ContourVertex,
) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// True if a, b, c are collinear and c lies on the closed segment ab
fn between(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

/// True if segments ab and cd intersect, properly or improperly
pub(crate) fn intersect(
    a: &ContourVertex,
    b: &ContourVertex,
    c: &ContourVertex,
    d: &ContourVertex,
) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

#[inline]
pub(crate) fn vequal(a: &ContourVertex, b: &ContourVertex) -> bool {
    a.x == b.x && a.z == b.z
}

fn intersect_seg_contour(
    d0: &ContourVertex,
    d1: &ContourVertex,
    skip: Option<usize>,
    verts: &[ContourVertex],
) -> bool {
    let n = verts.len();
    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = (k + 1) % n;
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = &verts[k];
        let p1 = &verts[k1];
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn in_cone_contour(i: usize, verts: &[ContourVertex], pj: &ContourVertex) -> bool {
    let n = verts.len();
    let pi = &verts[i];
    let pi1 = &verts[(i + 1) % n];
    let pin1 = &verts[(i + n - 1) % n];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn merge_contour_vertices(
    ca: &[ContourVertex],
    cb: &[ContourVertex],
    ia: usize,
    ib: usize,
) -> Vec<ContourVertex> {
    let mut verts = Vec::with_capacity(ca.len() + cb.len() + 2);
    // Copy contour A.
    for i in 0..=ca.len() {
        verts.push(ca[(ia + i) % ca.len()]);
    }
    // Copy contour B
    for i in 0..=cb.len() {
        verts.push(cb[(ib + i) % cb.len()]);
    }
    verts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::{build_distance_field, build_regions, RC_WALKABLE_AREA};

    fn regions_from_cells(w: i32, h: i32, walkable: impl Fn(i32, i32) -> bool) -> CompactHeightfield {
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 10.0, h as f32), 1.0, 0.5);
        for z in 0..h {
            for x in 0..w {
                if walkable(x, z) {
                    hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
                }
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 0, 0).unwrap();
        chf
    }

    #[test]
    fn test_distance_pt_seg() {
        assert_eq!(distance_pt_seg(0, 2, 0, 0, 4, 0), 4.0);
        assert_eq!(distance_pt_seg(6, 0, 0, 0, 4, 0), 4.0);
    }

    #[test]
    fn test_area_sign() {
        let square = [
            ContourVertex::new(0, 0, 0, 0),
            ContourVertex::new(0, 0, 4, 0),
            ContourVertex::new(4, 0, 4, 0),
            ContourVertex::new(4, 0, 0, 0),
        ];
        let mut reversed = square;
        reversed.reverse();
        assert!(calc_area_of_polygon_2d(&square) * calc_area_of_polygon_2d(&reversed) < 0);
    }

    fn region_count(chf: &CompactHeightfield) -> usize {
        let ids: std::collections::HashSet<u16> = chf.spans.iter().map(|s| s.reg).filter(|&r| r != 0).collect();
        ids.len()
    }

    #[test]
    fn test_square_contour() {
        let chf = regions_from_cells(8, 8, |_, _| true);
        let cset = ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::default()).unwrap();

        assert!(region_count(&chf) as u16 <= chf.max_regions);
        assert_eq!(cset.contours.len(), region_count(&chf));
        let total_raw: usize = cset.contours.iter().map(|c| c.raw_vertices.len()).sum();
        assert!(total_raw >= 32);

        for cont in &cset.contours {
            assert!(cont.vertices.len() >= 3);
            for v in &cont.vertices {
                assert!((0..=8).contains(&v.x));
                assert!((0..=8).contains(&v.z));
            }
        }
    }

    #[test]
    fn test_single_region_square_simplifies_to_corners() {
        let chf = regions_from_cells(4, 4, |_, _| true);
        assert_eq!(region_count(&chf), 1);
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        assert_eq!(cset.contours.len(), 1);
        let cont = &cset.contours[0];
        assert_eq!(cont.vertices.len(), 4);
        assert_eq!(cont.raw_vertices.len(), 16);
    }

    #[test]
    fn test_hole_is_merged_into_outline() {
        // A ring: 9x9 with a 3x3 hole in the middle.
        let chf = regions_from_cells(9, 9, |x, z| !((3..6).contains(&x) && (3..6).contains(&z)));
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        for cont in &cset.contours {
            assert!(calc_area_of_polygon_2d(&cont.vertices) >= 0);
        }
    }

    #[test]
    fn test_border_offsets_vertices() {
        let mut hf = Heightfield::new(10, 10, Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0), 1.0, 0.5);
        for z in 0..10 {
            for x in 0..10 {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 2, 0, 0).unwrap();

        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        assert_eq!(cset.width, 6);
        assert_eq!(cset.bmin.x, 2.0);
        for cont in &cset.contours {
            for v in &cont.vertices {
                assert!((0..=6).contains(&v.x), "x {}", v.x);
                assert!((0..=6).contains(&v.z), "z {}", v.z);
            }
        }
    }
}
