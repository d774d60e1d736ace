//! Navigation mesh tile registry
//!
//! A [`NavMesh`] owns a fixed number of tile slots laid out on a 2D grid.
//! Adding a tile parses its binary data, stitches its polygons to the
//! neighbouring tiles and hands out salted [`PolyRef`]s. Removing a tile
//! bumps the slot salt so that references into the old tile stop resolving.

use std::collections::{HashMap, HashSet};

use recast_common::{
    closest_height_point_triangle, dist_pt_seg_sqr_2d, ilog2, next_pow2, overlap_bounds,
    overlap_quant_bounds, point_in_polygon, sqr, vget, vlerp,
};

use crate::binary_format;
use crate::{
    NavMeshParams, PolyFlags, PolyRef, PolyType, Result, Status, DT_EXT_LINK, DT_NULL_LINK,
    DT_OFFMESH_CON_BIDIR, MAX_VERTS_PER_POLY,
};

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Neighbour reference
    pub reference: PolyRef,
    /// Next link of the same polygon, or [`DT_NULL_LINK`]
    pub next: u32,
    /// Edge of the owning polygon
    pub edge: u8,
    /// Tile side for external links, 0xff for internal ones
    pub side: u8,
    /// Portal start along the edge, 0..255
    pub bmin: u8,
    /// Portal end along the edge, 0..255
    pub bmax: u8,
}

/// Navigation polygon
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    /// Head of the link list, or [`DT_NULL_LINK`]
    pub first_link: u32,
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per edge: 0 for a wall, `index + 1` for an internal neighbour,
    /// [`DT_EXT_LINK`] `| side` for a portal to another tile
    pub neis: [u16; MAX_VERTS_PER_POLY],
    pub flags: PolyFlags,
    pub vert_count: u8,
    pub area: u8,
    pub poly_type: PolyType,
}

impl Default for Poly {
    fn default() -> Self {
        Self {
            first_link: DT_NULL_LINK,
            verts: [0; MAX_VERTS_PER_POLY],
            neis: [0; MAX_VERTS_PER_POLY],
            flags: PolyFlags::empty(),
            vert_count: 0,
            area: 0,
            poly_type: PolyType::Ground,
        }
    }
}

impl Poly {
    pub fn vertex_indices(&self) -> &[u16] {
        &self.verts[..self.vert_count as usize]
    }
}

/// Detail sub-mesh of a polygon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolyDetail {
    /// First unique detail vertex
    pub vert_base: u32,
    /// First detail triangle
    pub tri_base: u32,
    /// Unique detail vertices, the polygon's own vertices excluded
    pub vert_count: u8,
    pub tri_count: u8,
}

/// Bounding volume node with bounds quantized to the tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BVNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    /// Polygon index for leaves, negative escape offset otherwise
    pub i: i32,
}

/// Off-mesh connection stored in a tile
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OffMeshConnection {
    /// Start and end point
    pub pos: [f32; 6],
    pub rad: f32,
    /// Index of the connection polygon in the tile
    pub poly: u16,
    pub flags: u8,
    /// Tile side the end point lies on, 0xff when inside the tile
    pub side: u8,
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn start(&self) -> [f32; 3] {
        [self.pos[0], self.pos[1], self.pos[2]]
    }

    pub fn end(&self) -> [f32; 3] {
        [self.pos[3], self.pos[4], self.pos[5]]
    }

    pub fn is_bidirectional(&self) -> bool {
        self.flags & DT_OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header as stored in the tile data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileHeader {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    pub poly_count: i32,
    pub vert_count: i32,
    pub max_link_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub bv_node_count: i32,
    pub off_mesh_con_count: i32,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub bv_quant_factor: f32,
}

/// Iterator over the links of one polygon
pub struct LinkIter<'a> {
    links: &'a [Link],
    next: u32,
}

impl<'a> Iterator for LinkIter<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<&'a Link> {
        if self.next == DT_NULL_LINK {
            return None;
        }
        let link = self.links.get(self.next as usize)?;
        self.next = link.next;
        Some(link)
    }
}

/// Tile slot of a navigation mesh
#[derive(Debug, Clone)]
pub struct MeshTile {
    /// Slot index in the mesh
    pub index: usize,
    /// Counter distinguishing successive tiles in this slot
    pub salt: u32,
    /// `None` while the slot is free
    pub header: Option<TileHeader>,
    pub polys: Vec<Poly>,
    pub verts: Vec<f32>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<f32>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    /// Tile data the tile was added from
    pub data: Vec<u8>,
    pub(crate) links_free_list: u32,
    pub(crate) next: Option<usize>,
}

impl Default for MeshTile {
    fn default() -> Self {
        Self {
            index: 0,
            salt: 0,
            header: None,
            polys: Vec::new(),
            verts: Vec::new(),
            links: Vec::new(),
            detail_meshes: Vec::new(),
            detail_verts: Vec::new(),
            detail_tris: Vec::new(),
            bv_tree: Vec::new(),
            off_mesh_cons: Vec::new(),
            data: Vec::new(),
            links_free_list: DT_NULL_LINK,
            next: None,
        }
    }
}

impl MeshTile {
    pub fn is_loaded(&self) -> bool {
        self.header.is_some()
    }

    pub fn links_of(&self, poly: &Poly) -> LinkIter<'_> {
        LinkIter {
            links: &self.links,
            next: poly.first_link,
        }
    }

    pub fn poly_vertex(&self, poly: &Poly, k: usize) -> [f32; 3] {
        vget(&self.verts, poly.verts[k] as usize)
    }

    /// Polygon vertices as a flat array plus the vertex count
    pub fn poly_verts(&self, poly: &Poly) -> ([f32; MAX_VERTS_PER_POLY * 3], usize) {
        let mut out = [0.0; MAX_VERTS_PER_POLY * 3];
        let nv = poly.vert_count as usize;
        for k in 0..nv {
            out[k * 3..k * 3 + 3].copy_from_slice(&self.poly_vertex(poly, k));
        }
        (out, nv)
    }

    pub(crate) fn detail_tri_verts(&self, poly: &Poly, pd: &PolyDetail, t: &[u8; 4]) -> [[f32; 3]; 3] {
        let nv = poly.vert_count as usize;
        let mut v = [[0.0; 3]; 3];
        for k in 0..3 {
            let idx = t[k] as usize;
            v[k] = if idx < nv {
                self.poly_vertex(poly, idx)
            } else {
                vget(&self.detail_verts, pd.vert_base as usize + (idx - nv))
            };
        }
        v
    }

    /// Height of the detail surface at the xz location of `pos`, if the
    /// location is over polygon `ip`.
    pub fn poly_height(&self, ip: usize, pos: &[f32; 3]) -> Option<f32> {
        let poly = self.polys.get(ip)?;
        if poly.poly_type == PolyType::OffMeshConnection {
            return None;
        }
        let (verts, nv) = self.poly_verts(poly);
        if nv < 3 || !point_in_polygon(pos, &verts, nv) {
            return None;
        }

        if let Some(pd) = self.detail_meshes.get(ip) {
            for j in 0..pd.tri_count as usize {
                let Some(t) = self.detail_tris.get(pd.tri_base as usize + j) else {
                    break;
                };
                let v = self.detail_tri_verts(poly, pd, t);
                if let Some(h) = closest_height_point_triangle(pos, &v[0], &v[1], &v[2]) {
                    return Some(h);
                }
            }
        }

        // Inside the polygon but off every detail triangle: snap to the
        // nearest detail edge.
        Some(self.closest_point_on_detail_edges(ip, pos, false)[1])
    }

    /// Closest point to `pos` on the detail edges of polygon `ip`.
    ///
    /// With `only_boundary` set, only edges on the polygon outline are
    /// considered.
    pub fn closest_point_on_detail_edges(&self, ip: usize, pos: &[f32; 3], only_boundary: bool) -> [f32; 3] {
        let (Some(poly), Some(pd)) = (self.polys.get(ip), self.detail_meshes.get(ip)) else {
            return *pos;
        };

        let mut dmin = f32::MAX;
        let mut tmin = 0.0;
        let mut pmin = *pos;
        let mut pmax = *pos;

        for i in 0..pd.tri_count as usize {
            let Some(tris) = self.detail_tris.get(pd.tri_base as usize + i) else {
                break;
            };
            if only_boundary && (tris[3] & 0x15) == 0 {
                continue;
            }
            let v = self.detail_tri_verts(poly, pd, tris);
            let mut k = 0;
            let mut j = 2;
            while k < 3 {
                let edge_flags = (tris[3] >> (j * 2)) & 0x3;
                if (edge_flags & crate::DT_DETAIL_EDGE_BOUNDARY) != 0 || !only_boundary {
                    let (d, t) = dist_pt_seg_sqr_2d(pos, &v[j], &v[k]);
                    if d < dmin {
                        dmin = d;
                        tmin = t;
                        pmin = v[j];
                        pmax = v[k];
                    }
                }
                j = k;
                k += 1;
            }
        }

        vlerp(&pmin, &pmax, tmin)
    }

    /// Closest point on polygon `ip` and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, ip: usize, pos: &[f32; 3]) -> ([f32; 3], bool) {
        if let Some(h) = self.poly_height(ip, pos) {
            return ([pos[0], h, pos[2]], true);
        }
        let Some(poly) = self.polys.get(ip) else {
            return (*pos, false);
        };

        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = self.poly_vertex(poly, 0);
            let v1 = self.poly_vertex(poly, 1);
            let (_, t) = dist_pt_seg_sqr_2d(pos, &v0, &v1);
            return (vlerp(&v0, &v1, t), false);
        }

        (self.closest_point_on_detail_edges(ip, pos, true), false)
    }

    fn alloc_link(&mut self, link: Link) -> u32 {
        if self.links_free_list != DT_NULL_LINK {
            let idx = self.links_free_list;
            self.links_free_list = self.links[idx as usize].next;
            self.links[idx as usize] = link;
            idx
        } else {
            self.links.push(link);
            (self.links.len() - 1) as u32
        }
    }

    fn free_link(&mut self, idx: u32) {
        self.links[idx as usize].next = self.links_free_list;
        self.links_free_list = idx;
    }

    /// Pushes `link` to the front of the link list of polygon `ip`
    fn prepend_link(&mut self, ip: usize, mut link: Link) {
        link.next = self.polys[ip].first_link;
        let idx = self.alloc_link(link);
        self.polys[ip].first_link = idx;
    }
}

/// Opposite tile side of `side`
pub(crate) fn opposite_tile(side: i32) -> i32 {
    (side + 4) & 0x7
}

fn slab_coord(va: &[f32; 3], side: i32) -> f32 {
    match side {
        0 | 4 => va[0],
        2 | 6 => va[2],
        _ => 0.0,
    }
}

/// End points of a tile edge on the (edge axis, y) plane
fn slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: i32) -> ([f32; 2], [f32; 2]) {
    let axis = match side {
        0 | 4 => 2,
        2 | 6 => 0,
        _ => return ([0.0; 2], [0.0; 2]),
    };
    if va[axis] < vb[axis] {
        ([va[axis], va[1]], [vb[axis], vb[1]])
    } else {
        ([vb[axis], vb[1]], [va[axis], va[1]])
    }
}

fn overlap_slabs(amin: &[f32; 2], amax: &[f32; 2], bmin: &[f32; 2], bmax: &[f32; 2], px: f32, py: f32) -> bool {
    // Shrink the slabs a bit so that touching end points are not treated
    // as overlapping.
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    // Compare the y slopes over the overlapping span.
    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing segments always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }

    let thr = sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Polygons of `tile` whose portal edges on `side` touch the segment va-vb
fn find_connecting_polys(
    va: &[f32; 3],
    vb: &[f32; 3],
    tile: &MeshTile,
    base: PolyRef,
    side: i32,
) -> Vec<(PolyRef, f32, f32)> {
    const MAX_CONNECTIONS: usize = 4;

    let Some(header) = tile.header.as_ref() else {
        return Vec::new();
    };
    let (amin, amax) = slab_end_points(va, vb, side);
    let apos = slab_coord(va, side);
    let m = DT_EXT_LINK | side as u16;

    let mut out = Vec::new();
    for (i, poly) in tile.polys.iter().enumerate() {
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            if poly.neis[j] != m {
                continue;
            }
            let vc = tile.poly_vertex(poly, j);
            let vd = tile.poly_vertex(poly, (j + 1) % nv);
            if (apos - slab_coord(&vc, side)).abs() > 0.01 {
                continue;
            }
            let (bmin, bmax) = slab_end_points(&vc, &vd, side);
            if !overlap_slabs(&amin, &amax, &bmin, &bmax, 0.01, header.walkable_climb) {
                continue;
            }
            if out.len() < MAX_CONNECTIONS {
                out.push((
                    PolyRef::new(base.id() | i as u32),
                    amin[0].max(bmin[0]),
                    amax[0].min(bmax[0]),
                ));
            }
            break;
        }
    }
    out
}

/// Portal limits compressed to bytes along the edge va-vb
fn portal_limits(dir: i32, va: &[f32; 3], vb: &[f32; 3], lmin: f32, lmax: f32) -> (u8, u8) {
    let axis = match dir {
        0 | 4 => 2,
        2 | 6 => 0,
        _ => return (0, 255),
    };
    let mut tmin = (lmin - va[axis]) / (vb[axis] - va[axis]);
    let mut tmax = (lmax - va[axis]) / (vb[axis] - va[axis]);
    if tmin > tmax {
        std::mem::swap(&mut tmin, &mut tmax);
    }
    (
        (tmin.clamp(0.0, 1.0) * 255.0).round() as u8,
        (tmax.clamp(0.0, 1.0) * 255.0).round() as u8,
    )
}

/// Tiled navigation mesh
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
    pos_lookup: HashMap<(i32, i32), Vec<usize>>,
    next_free: Option<usize>,
    tile_bits: u32,
    poly_bits: u32,
    salt_bits: u32,
}

impl NavMesh {
    /// Creates an empty tiled navigation mesh
    pub fn init_tiled(params: &NavMeshParams) -> Result<Self> {
        if !params.origin.iter().all(|v| v.is_finite())
            || !(params.tile_width > 0.0)
            || !(params.tile_height > 0.0)
            || params.max_tiles <= 0
            || params.max_polys_per_tile <= 0
        {
            return Err(Status::invalid_param());
        }

        let tile_bits = ilog2(next_pow2(params.max_tiles as u32));
        let poly_bits = ilog2(next_pow2(params.max_polys_per_tile as u32));
        // Only allow 31 salt bits, the salt mask would overflow otherwise.
        let salt_bits = 32u32.saturating_sub(tile_bits + poly_bits).min(31);
        if salt_bits < 10 {
            log::warn!(
                "navmesh needs {} tile bits and {} poly bits, leaving {} salt bits",
                tile_bits,
                poly_bits,
                salt_bits
            );
            return Err(Status::invalid_param());
        }

        let max_tiles = params.max_tiles as usize;
        let tiles = (0..max_tiles)
            .map(|i| MeshTile {
                index: i,
                salt: 1,
                next: (i + 1 < max_tiles).then_some(i + 1),
                ..Default::default()
            })
            .collect();

        log::debug!(
            "navmesh with {} tiles: {} tile bits, {} poly bits, {} salt bits",
            max_tiles,
            tile_bits,
            poly_bits,
            salt_bits
        );

        Ok(Self {
            params: *params,
            tiles,
            pos_lookup: HashMap::new(),
            next_free: Some(0),
            tile_bits,
            poly_bits,
            salt_bits,
        })
    }

    /// Creates a single tile navigation mesh from tile data
    pub fn init_solo(data: Vec<u8>) -> Result<Self> {
        let header = binary_format::read_tile_header(&data)?;
        let params = NavMeshParams {
            origin: header.bmin,
            tile_width: header.bmax[0] - header.bmin[0],
            tile_height: header.bmax[2] - header.bmin[2],
            max_tiles: 1,
            max_polys_per_tile: header.poly_count,
        };
        let mut nav = Self::init_tiled(&params)?;
        nav.add_tile(data, PolyRef::NULL)?;
        Ok(nav)
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn get_max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Tile slot `i`, loaded or not
    pub fn get_tile(&self, i: usize) -> Option<&MeshTile> {
        self.tiles.get(i)
    }

    /// Loaded tiles
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().filter(|t| t.is_loaded())
    }

    pub fn tile_count(&self) -> usize {
        self.tiles().count()
    }

    pub fn encode_poly_id(&self, salt: u32, it: u32, ip: u32) -> PolyRef {
        PolyRef::new((salt << (self.poly_bits + self.tile_bits)) | (it << self.poly_bits) | ip)
    }

    /// Splits a reference into `(salt, tile index, poly index)`
    pub fn decode_poly_id(&self, r: PolyRef) -> (u32, u32, u32) {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        let id = r.id();
        (
            (id >> (self.poly_bits + self.tile_bits)) & salt_mask,
            (id >> self.poly_bits) & tile_mask,
            id & poly_mask,
        )
    }

    fn decode_poly_index(&self, r: PolyRef) -> usize {
        (r.id() & ((1u32 << self.poly_bits) - 1)) as usize
    }

    /// Grid cell containing `pos`
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        (
            ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32,
            ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32,
        )
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> Vec<usize> {
        self.pos_lookup.get(&(x, y)).cloned().unwrap_or_default()
    }

    fn neighbour_tile_indices(&self, x: i32, y: i32, side: i32) -> Vec<usize> {
        let (nx, ny) = match side {
            0 => (x + 1, y),
            1 => (x + 1, y + 1),
            2 => (x, y + 1),
            3 => (x - 1, y + 1),
            4 => (x - 1, y),
            5 => (x - 1, y - 1),
            6 => (x, y - 1),
            _ => (x + 1, y - 1),
        };
        self.tile_indices_at(nx, ny)
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.pos_lookup.get(&(x, y))?.iter().map(|&i| &self.tiles[i]).find(|t| {
            t.header
                .as_ref()
                .is_some_and(|h| h.layer == layer)
        })
    }

    /// All layers at grid cell (x, y)
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.pos_lookup
            .get(&(x, y))
            .map(|v| v.iter().map(|&i| &self.tiles[i]).collect())
            .unwrap_or_default()
    }

    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<PolyRef> {
        self.get_tile_at(x, y, layer).map(|t| self.get_tile_ref(t))
    }

    /// Reference of a tile; the null reference for a free slot
    pub fn get_tile_ref(&self, tile: &MeshTile) -> PolyRef {
        if !tile.is_loaded() {
            return PolyRef::NULL;
        }
        self.encode_poly_id(tile.salt, tile.index as u32, 0)
    }

    /// Reference of polygon 0 of `tile`
    pub fn get_poly_ref_base(&self, tile: &MeshTile) -> PolyRef {
        self.encode_poly_id(tile.salt, tile.index as u32, 0)
    }

    pub fn get_tile_by_ref(&self, tile_ref: PolyRef) -> Option<&MeshTile> {
        if tile_ref.is_null() {
            return None;
        }
        let (salt, it, _) = self.decode_poly_id(tile_ref);
        let tile = self.tiles.get(it as usize)?;
        (tile.is_loaded() && tile.salt == salt).then_some(tile)
    }

    pub fn get_tile_and_poly_by_ref(&self, r: PolyRef) -> Result<(&MeshTile, &Poly)> {
        if r.is_null() {
            return Err(Status::invalid_param());
        }
        let (salt, it, ip) = self.decode_poly_id(r);
        let tile = self.tiles.get(it as usize).ok_or(Status::invalid_param())?;
        if tile.salt != salt || !tile.is_loaded() {
            return Err(Status::invalid_param());
        }
        let poly = tile.polys.get(ip as usize).ok_or(Status::invalid_param())?;
        Ok((tile, poly))
    }

    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.get_tile_and_poly_by_ref(r).is_ok()
    }

    /// References of all polygons in `tile`
    pub fn tile_poly_refs<'s>(&'s self, tile: &'s MeshTile) -> impl Iterator<Item = PolyRef> + 's {
        let base = self.get_poly_ref_base(tile).id();
        (0..tile.polys.len() as u32).map(move |i| PolyRef::new(base | i))
    }

    /// Adds a tile. A non-null `last_ref` restores the tile into the slot
    /// and salt it was saved from.
    pub fn add_tile(&mut self, data: Vec<u8>, last_ref: PolyRef) -> Result<PolyRef> {
        let mut tile = binary_format::read_tile(&data)?;
        let Some(header) = tile.header.clone() else {
            return Err(Status::invalid_param());
        };

        if header.poly_count as u64 > (1u64 << self.poly_bits) {
            return Err(Status::invalid_param());
        }
        if self.get_tile_at(header.x, header.y, header.layer).is_some() {
            return Err(Status::FAILURE | Status::ALREADY_OCCUPIED);
        }

        let idx = if last_ref.is_null() {
            let idx = self
                .next_free
                .ok_or(Status::FAILURE | Status::OUT_OF_MEMORY)?;
            self.next_free = self.tiles[idx].next;
            idx
        } else {
            let (salt, it, _) = self.decode_poly_id(last_ref);
            let idx = it as usize;
            if idx >= self.tiles.len() {
                return Err(Status::FAILURE | Status::OUT_OF_MEMORY);
            }

            // Unlink the requested slot from the free list.
            let mut prev = None;
            let mut cur = self.next_free;
            while let Some(c) = cur {
                if c == idx {
                    break;
                }
                prev = Some(c);
                cur = self.tiles[c].next;
            }
            if cur != Some(idx) {
                return Err(Status::FAILURE | Status::OUT_OF_MEMORY);
            }
            match prev {
                None => self.next_free = self.tiles[idx].next,
                Some(p) => self.tiles[p].next = self.tiles[idx].next,
            }
            self.tiles[idx].salt = salt;
            idx
        };

        tile.index = idx;
        tile.salt = self.tiles[idx].salt;
        tile.next = None;
        tile.data = data;
        self.tiles[idx] = tile;
        self.pos_lookup
            .entry((header.x, header.y))
            .or_default()
            .push(idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        self.connect_ext_off_mesh_links(idx, idx, -1);

        // Other layers in the same cell.
        for nei in self.tile_indices_at(header.x, header.y) {
            if nei == idx {
                continue;
            }
            self.connect_ext_links(idx, nei, -1);
            self.connect_ext_links(nei, idx, -1);
            self.connect_ext_off_mesh_links(idx, nei, -1);
            self.connect_ext_off_mesh_links(nei, idx, -1);
        }

        for side in 0..8 {
            for nei in self.neighbour_tile_indices(header.x, header.y, side) {
                self.connect_ext_links(idx, nei, side);
                self.connect_ext_links(nei, idx, opposite_tile(side));
                self.connect_ext_off_mesh_links(idx, nei, side);
                self.connect_ext_off_mesh_links(nei, idx, opposite_tile(side));
            }
        }

        let tile_ref = self.get_tile_ref(&self.tiles[idx]);
        log::debug!(
            "added tile ({}, {}, {}) with {} polygons as {}",
            header.x,
            header.y,
            header.layer,
            header.poly_count,
            tile_ref
        );
        Ok(tile_ref)
    }

    /// Removes a tile, returning the data it was added from
    pub fn remove_tile(&mut self, tile_ref: PolyRef) -> Result<Vec<u8>> {
        if tile_ref.is_null() {
            return Err(Status::invalid_param());
        }
        let (salt, it, _) = self.decode_poly_id(tile_ref);
        let idx = it as usize;
        let Some(tile) = self.tiles.get(idx) else {
            return Err(Status::invalid_param());
        };
        let Some(header) = tile.header.as_ref() else {
            return Err(Status::invalid_param());
        };
        if tile.salt != salt {
            return Err(Status::invalid_param());
        }
        let (x, y) = (header.x, header.y);

        if let Some(cell) = self.pos_lookup.get_mut(&(x, y)) {
            cell.retain(|&i| i != idx);
            if cell.is_empty() {
                self.pos_lookup.remove(&(x, y));
            }
        }

        for nei in self.tile_indices_at(x, y) {
            self.unconnect_links(nei, idx);
        }
        for side in 0..8 {
            for nei in self.neighbour_tile_indices(x, y, side) {
                self.unconnect_links(nei, idx);
            }
        }

        let salt_mask = (1u32 << self.salt_bits) - 1;
        let mut next_salt = (salt + 1) & salt_mask;
        if next_salt == 0 {
            next_salt += 1;
        }

        let data = std::mem::take(&mut self.tiles[idx].data);
        self.tiles[idx] = MeshTile {
            index: idx,
            salt: next_salt,
            next: self.next_free,
            ..Default::default()
        };
        self.next_free = Some(idx);

        log::debug!("removed tile ({}, {}) {}", x, y, tile_ref);
        Ok(data)
    }

    /// Links polygons inside one tile
    fn connect_int_links(&mut self, idx: usize) {
        let base = self.get_poly_ref_base(&self.tiles[idx]).id();
        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            tile.polys[i].first_link = DT_NULL_LINK;
            if tile.polys[i].poly_type == PolyType::OffMeshConnection {
                continue;
            }

            // Build edge links backwards so that the links are ordered
            // by edge in the list.
            for j in (0..tile.polys[i].vert_count as usize).rev() {
                let nei = tile.polys[i].neis[j];
                // Skip hard and non-internal edges.
                if nei == 0 || (nei & DT_EXT_LINK) != 0 {
                    continue;
                }
                tile.prepend_link(
                    i,
                    Link {
                        reference: PolyRef::new(base | (nei as u32 - 1)),
                        next: DT_NULL_LINK,
                        edge: j as u8,
                        side: 0xff,
                        bmin: 0,
                        bmax: 0,
                    },
                );
            }
        }
    }

    /// Attaches the start of each off-mesh connection to the tile surface
    fn base_off_mesh_links(&mut self, idx: usize) {
        let (base, updates) = {
            let tile = &self.tiles[idx];
            let Some(header) = tile.header.as_ref() else {
                return;
            };
            let mut updates = Vec::new();
            for con in &tile.off_mesh_cons {
                let half = [con.rad, header.walkable_climb, con.rad];
                let p = con.start();
                let Some((reference, nearest)) = self.find_nearest_poly_in_tile(tile, &p, &half) else {
                    continue;
                };
                // The start point must be within the connection radius.
                if sqr(nearest[0] - p[0]) + sqr(nearest[2] - p[2]) > sqr(con.rad) {
                    continue;
                }
                updates.push((con.poly as usize, self.decode_poly_index(reference), nearest));
            }
            (self.get_poly_ref_base(tile).id(), updates)
        };

        let tile = &mut self.tiles[idx];
        for (con_poly, land_poly, nearest) in updates {
            let v = tile.polys[con_poly].verts[0] as usize;
            tile.verts[v * 3..v * 3 + 3].copy_from_slice(&nearest);

            // Connection polygon to the landing polygon.
            tile.prepend_link(
                con_poly,
                Link {
                    reference: PolyRef::new(base | land_poly as u32),
                    next: DT_NULL_LINK,
                    edge: 0,
                    side: 0xff,
                    bmin: 0,
                    bmax: 0,
                },
            );
            // And back.
            tile.prepend_link(
                land_poly,
                Link {
                    reference: PolyRef::new(base | con_poly as u32),
                    next: DT_NULL_LINK,
                    edge: 0xff,
                    side: 0xff,
                    bmin: 0,
                    bmax: 0,
                },
            );
        }
    }

    /// Links portal edges of tile `idx` on `side` to polygons of `target`
    fn connect_ext_links(&mut self, idx: usize, target: usize, side: i32) {
        let new_links = {
            let tile = &self.tiles[idx];
            let target_tile = &self.tiles[target];
            if !tile.is_loaded() || !target_tile.is_loaded() {
                return;
            }
            let target_base = self.get_poly_ref_base(target_tile);

            let mut out = Vec::new();
            for (i, poly) in tile.polys.iter().enumerate() {
                let nv = poly.vert_count as usize;
                for j in 0..nv {
                    if (poly.neis[j] & DT_EXT_LINK) == 0 {
                        continue;
                    }
                    let dir = (poly.neis[j] & 0xff) as i32;
                    if side != -1 && dir != side {
                        continue;
                    }

                    let va = tile.poly_vertex(poly, j);
                    let vb = tile.poly_vertex(poly, (j + 1) % nv);
                    for (reference, lmin, lmax) in
                        find_connecting_polys(&va, &vb, target_tile, target_base, opposite_tile(dir))
                    {
                        let (bmin, bmax) = portal_limits(dir, &va, &vb, lmin, lmax);
                        out.push((
                            i,
                            Link {
                                reference,
                                next: DT_NULL_LINK,
                                edge: j as u8,
                                side: dir as u8,
                                bmin,
                                bmax,
                            },
                        ));
                    }
                }
            }
            out
        };

        let tile = &mut self.tiles[idx];
        for (ip, link) in new_links {
            tile.prepend_link(ip, link);
        }
    }

    /// Lands off-mesh connections of `target` that end in tile `idx`
    fn connect_ext_off_mesh_links(&mut self, idx: usize, target: usize, side: i32) {
        let opposite_side = if side == -1 {
            0xff
        } else {
            opposite_tile(side) as u8
        };

        let (tile_base, target_base, updates) = {
            let tile = &self.tiles[idx];
            let target_tile = &self.tiles[target];
            let Some(target_header) = target_tile.header.as_ref() else {
                return;
            };
            if !tile.is_loaded() {
                return;
            }

            let mut updates = Vec::new();
            for con in &target_tile.off_mesh_cons {
                if con.side != opposite_side {
                    continue;
                }
                // Skip connections whose start was not attached.
                if target_tile.polys[con.poly as usize].first_link == DT_NULL_LINK {
                    continue;
                }

                let half = [con.rad, target_header.walkable_climb, con.rad];
                let p = con.end();
                let Some((reference, nearest)) = self.find_nearest_poly_in_tile(tile, &p, &half) else {
                    continue;
                };
                if sqr(nearest[0] - p[0]) + sqr(nearest[2] - p[2]) > sqr(con.rad) {
                    continue;
                }
                updates.push((
                    con.poly as usize,
                    self.decode_poly_index(reference),
                    nearest,
                    con.is_bidirectional(),
                ));
            }
            (
                self.get_poly_ref_base(tile).id(),
                self.get_poly_ref_base(target_tile).id(),
                updates,
            )
        };

        {
            let target_tile = &mut self.tiles[target];
            for &(con_poly, land_poly, nearest, _) in &updates {
                let v = target_tile.polys[con_poly].verts[1] as usize;
                target_tile.verts[v * 3..v * 3 + 3].copy_from_slice(&nearest);
                target_tile.prepend_link(
                    con_poly,
                    Link {
                        reference: PolyRef::new(tile_base | land_poly as u32),
                        next: DT_NULL_LINK,
                        edge: 1,
                        side: opposite_side,
                        bmin: 0,
                        bmax: 0,
                    },
                );
            }
        }

        let tile = &mut self.tiles[idx];
        for &(con_poly, land_poly, _, bidir) in &updates {
            if !bidir {
                continue;
            }
            tile.prepend_link(
                land_poly,
                Link {
                    reference: PolyRef::new(target_base | con_poly as u32),
                    next: DT_NULL_LINK,
                    edge: 0xff,
                    side: if side == -1 { 0xff } else { side as u8 },
                    bmin: 0,
                    bmax: 0,
                },
            );
        }
    }

    /// Drops every link of tile `idx` into tile slot `target`
    fn unconnect_links(&mut self, idx: usize, target: usize) {
        let poly_bits = self.poly_bits;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let tile = &mut self.tiles[idx];
        for ip in 0..tile.polys.len() {
            let mut j = tile.polys[ip].first_link;
            let mut prev = DT_NULL_LINK;
            while j != DT_NULL_LINK {
                let link = tile.links[j as usize];
                if ((link.reference.id() >> poly_bits) & tile_mask) as usize == target {
                    let next = link.next;
                    if prev == DT_NULL_LINK {
                        tile.polys[ip].first_link = next;
                    } else {
                        tile.links[prev as usize].next = next;
                    }
                    tile.free_link(j);
                    j = next;
                } else {
                    prev = j;
                    j = link.next;
                }
            }
        }
    }

    /// Polygons of `tile` whose bounds overlap `qmin..qmax`
    pub fn query_polygons_in_tile(&self, tile: &MeshTile, qmin: &[f32; 3], qmax: &[f32; 3]) -> Vec<PolyRef> {
        let Some(header) = tile.header.as_ref() else {
            return Vec::new();
        };
        let base = self.get_poly_ref_base(tile).id();
        let mut out = Vec::new();

        if !tile.bv_tree.is_empty() {
            let tbmin = header.bmin;
            let tbmax = header.bmax;
            let qfac = header.bv_quant_factor;

            let clamped = |v: f32, k: usize| recast_common::clamp(v, tbmin[k], tbmax[k]) - tbmin[k];
            let mut bmin = [0u16; 3];
            let mut bmax = [0u16; 3];
            for k in 0..3 {
                bmin[k] = ((qfac * clamped(qmin[k], k)) as u16) & 0xfffe;
                bmax[k] = ((qfac * clamped(qmax[k], k) + 1.0) as u16) | 1;
            }

            let end = tile.bv_tree.len();
            let mut i = 0;
            while i < end {
                let node = &tile.bv_tree[i];
                let overlap = overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;

                if is_leaf && overlap {
                    out.push(PolyRef::new(base | node.i as u32));
                }

                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
            return out;
        }

        for (i, poly) in tile.polys.iter().enumerate() {
            // Off-mesh connections are not returned.
            if poly.poly_type == PolyType::OffMeshConnection {
                continue;
            }
            let mut bmin = tile.poly_vertex(poly, 0);
            let mut bmax = bmin;
            for k in 1..poly.vert_count as usize {
                let v = tile.poly_vertex(poly, k);
                bmin = recast_common::vmin(&bmin, &v);
                bmax = recast_common::vmax(&bmax, &v);
            }
            if overlap_bounds(qmin, qmax, &bmin, &bmax) {
                out.push(PolyRef::new(base | i as u32));
            }
        }
        out
    }

    /// Nearest polygon of `tile` to `center` within `half_extents`
    pub fn find_nearest_poly_in_tile(
        &self,
        tile: &MeshTile,
        center: &[f32; 3],
        half_extents: &[f32; 3],
    ) -> Option<(PolyRef, [f32; 3])> {
        let header = tile.header.as_ref()?;
        let bmin = recast_common::vsub(center, half_extents);
        let bmax = recast_common::vadd(center, half_extents);

        let mut nearest = None;
        let mut nearest_dist = f32::MAX;
        for r in self.query_polygons_in_tile(tile, &bmin, &bmax) {
            let ip = self.decode_poly_index(r);
            let (closest, over_poly) = tile.closest_point_on_poly(ip, center);

            // A point directly over the polygon within climb height is as
            // good as on it.
            let diff = recast_common::vsub(center, &closest);
            let d = if over_poly {
                let dy = diff[1].abs() - header.walkable_climb;
                if dy > 0.0 {
                    dy * dy
                } else {
                    0.0
                }
            } else {
                recast_common::vlen_sqr(&diff)
            };

            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((r, closest));
            }
        }
        nearest
    }

    /// Closest point on polygon `r` and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        let (tile, _) = self.get_tile_and_poly_by_ref(r)?;
        Ok(tile.closest_point_on_poly(self.decode_poly_index(r), pos))
    }

    /// End points of an off-mesh connection, ordered for travel coming from
    /// `prev_ref`
    pub fn get_off_mesh_connection_poly_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<([f32; 3], [f32; 3])> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if poly.poly_type != PolyType::OffMeshConnection {
            return Err(Status::FAILURE);
        }

        // The link on edge 0 points to the polygon at the first vertex.
        let mut idx0 = 0;
        let mut idx1 = 1;
        if let Some(link) = tile.links_of(poly).find(|l| l.edge == 0) {
            if link.reference != prev_ref {
                idx0 = 1;
                idx1 = 0;
            }
        }

        Ok((tile.poly_vertex(poly, idx0), tile.poly_vertex(poly, idx1)))
    }

    pub fn get_off_mesh_connection_by_ref(&self, r: PolyRef) -> Option<&OffMeshConnection> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(r).ok()?;
        if poly.poly_type != PolyType::OffMeshConnection {
            return None;
        }
        let header = tile.header.as_ref()?;
        let idx = self.decode_poly_index(r).checked_sub(header.off_mesh_base as usize)?;
        tile.off_mesh_cons.get(idx)
    }

    fn poly_mut(&mut self, r: PolyRef) -> Result<&mut Poly> {
        self.get_tile_and_poly_by_ref(r)?;
        let (_, it, ip) = self.decode_poly_id(r);
        Ok(&mut self.tiles[it as usize].polys[ip as usize])
    }

    pub fn set_poly_flags(&mut self, r: PolyRef, flags: PolyFlags) -> Result<()> {
        self.poly_mut(r)?.flags = flags;
        Ok(())
    }

    pub fn get_poly_flags(&self, r: PolyRef) -> Result<PolyFlags> {
        Ok(self.get_tile_and_poly_by_ref(r)?.1.flags)
    }

    pub fn set_poly_area(&mut self, r: PolyRef, area: u8) -> Result<()> {
        self.poly_mut(r)?.area = area & 0x3f;
        Ok(())
    }

    pub fn get_poly_area(&self, r: PolyRef) -> Result<u8> {
        Ok(self.get_tile_and_poly_by_ref(r)?.1.area)
    }

    /// Size in bytes of the saved state of `tile`
    pub fn get_tile_state_size(&self, tile: &MeshTile) -> usize {
        binary_format::tile_state_size(tile)
    }

    /// Saves the polygon flags and areas of a tile
    pub fn store_tile_state(&self, tile_ref: PolyRef) -> Result<Vec<u8>> {
        let tile = self.get_tile_by_ref(tile_ref).ok_or(Status::invalid_param())?;
        binary_format::write_tile_state(tile_ref, tile)
    }

    /// Restores polygon flags and areas saved by [`NavMesh::store_tile_state`]
    pub fn restore_tile_state(&mut self, tile_ref: PolyRef, data: &[u8]) -> Result<()> {
        self.get_tile_by_ref(tile_ref).ok_or(Status::invalid_param())?;
        let (_, it, _) = self.decode_poly_id(tile_ref);
        binary_format::read_tile_state(tile_ref, &mut self.tiles[it as usize], data)
    }
}

/// Clears the flags of every polygon not reachable from `seeds` through
/// links. Returns the number of polygons cleared.
pub fn flood_fill_prune_nav_mesh(nav: &mut NavMesh, seeds: &[PolyRef]) -> usize {
    let mut visited: HashSet<PolyRef> = HashSet::new();
    let mut stack: Vec<PolyRef> = Vec::new();
    for &seed in seeds {
        if nav.is_valid_poly_ref(seed) && visited.insert(seed) {
            stack.push(seed);
        }
    }

    while let Some(r) = stack.pop() {
        let Ok((tile, poly)) = nav.get_tile_and_poly_by_ref(r) else {
            continue;
        };
        for link in tile.links_of(poly) {
            if !link.reference.is_null() && visited.insert(link.reference) {
                stack.push(link.reference);
            }
        }
    }

    let unreached: Vec<PolyRef> = nav
        .tiles()
        .flat_map(|t| nav.tile_poly_refs(t))
        .filter(|r| !visited.contains(r))
        .collect();
    let cleared = unreached
        .iter()
        .filter(|&&r| nav.set_poly_flags(r, PolyFlags::empty()).is_ok())
        .count();

    log::debug!("flood fill reached {} polygons, disabled {}", visited.len(), cleared);
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{cells_params, grid_params, grid_tile_data, tiled_grid_mesh};
    use crate::{create_nav_mesh_data, QueryFilter};

    #[test]
    fn test_poly_id_round_trip() {
        let nav = NavMesh::init_tiled(&NavMeshParams {
            origin: [0.0; 3],
            tile_width: 10.0,
            tile_height: 10.0,
            max_tiles: 64,
            max_polys_per_tile: 1024,
        })
        .unwrap();
        let r = nav.encode_poly_id(5, 17, 300);
        assert_eq!(nav.decode_poly_id(r), (5, 17, 300));
    }

    #[test]
    fn test_too_few_salt_bits_rejected() {
        let params = NavMeshParams {
            origin: [0.0; 3],
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles: 1 << 12,
            max_polys_per_tile: 1 << 12,
        };
        assert!(NavMesh::init_tiled(&params).is_err());
        let bad = NavMeshParams {
            tile_width: 0.0,
            ..params
        };
        assert!(NavMesh::init_tiled(&bad).is_err());
    }

    #[test]
    fn test_solo_mesh_internal_links() {
        let data = create_nav_mesh_data(&grid_params(3, 1, 0, 0)).unwrap();
        let nav = NavMesh::init_solo(data).unwrap();
        let tile = nav.tiles().next().unwrap();
        assert_eq!(tile.polys.len(), 3);

        // The middle quad links to both sides, the ends to one neighbour.
        let counts: Vec<usize> = tile.polys.iter().map(|p| tile.links_of(p).count()).collect();
        assert_eq!(counts, vec![1, 2, 1]);

        let r = PolyRef::new(nav.get_poly_ref_base(tile).id() | 1);
        let (closest, over) = nav.closest_point_on_poly(r, &[1.5, 3.0, 0.5]).unwrap();
        assert!(over);
        assert!(closest[1].abs() < 1e-4);
    }

    #[test]
    fn test_stale_refs_after_remove_and_add() {
        let mut nav = tiled_grid_mesh(2, 1);
        let tile_ref = nav.get_tile_ref_at(1, 0, 0).unwrap();
        let tile = nav.get_tile_by_ref(tile_ref).unwrap();
        let poly_ref = nav.get_poly_ref_base(tile);
        assert!(nav.is_valid_poly_ref(poly_ref));

        let data = nav.remove_tile(tile_ref).unwrap();
        assert!(!nav.is_valid_poly_ref(poly_ref));
        assert!(nav.get_tile_by_ref(tile_ref).is_none());

        // Removing twice fails.
        assert!(nav.remove_tile(tile_ref).is_err());

        let new_ref = nav.add_tile(data, PolyRef::NULL).unwrap();
        assert_ne!(new_ref, tile_ref);
        assert!(!nav.is_valid_poly_ref(poly_ref));
    }

    #[test]
    fn test_neighbour_tiles_are_linked() {
        let mut nav = tiled_grid_mesh(2, 1);
        let left = nav.get_tile_at(0, 0, 0).unwrap();
        let right_ref = nav.get_tile_ref_at(1, 0, 0).unwrap();

        let external = |nav: &NavMesh| -> usize {
            let left = nav.get_tile_at(0, 0, 0).unwrap();
            left.polys
                .iter()
                .flat_map(|p| left.links_of(p))
                .filter(|l| l.side != 0xff)
                .count()
        };
        assert!(left.polys.iter().flat_map(|p| left.links_of(p)).any(|l| l.side == 0));
        let linked = external(&nav);
        assert!(linked > 0);

        // Removing the right tile drops the portal links of the left one.
        nav.remove_tile(right_ref).unwrap();
        assert_eq!(external(&nav), 0);
    }

    #[test]
    fn test_restore_ref_keeps_salt() {
        let mut nav = tiled_grid_mesh(1, 1);
        let tile_ref = nav.get_tile_ref_at(0, 0, 0).unwrap();
        let data = nav.remove_tile(tile_ref).unwrap();
        let restored = nav.add_tile(data, tile_ref).unwrap();
        assert_eq!(restored, tile_ref);
    }

    #[test]
    fn test_occupied_cell_rejected() {
        let mut nav = tiled_grid_mesh(1, 1);
        let data = grid_tile_data(0, 0);
        let err = nav.add_tile(data, PolyRef::NULL).unwrap_err();
        assert!(err.contains(Status::ALREADY_OCCUPIED));
    }

    #[test]
    fn test_tile_state_round_trip() {
        let mut nav = tiled_grid_mesh(1, 1);
        let tile_ref = nav.get_tile_ref_at(0, 0, 0).unwrap();
        let tile = nav.get_tile_by_ref(tile_ref).unwrap();
        let poly = nav.get_poly_ref_base(tile);
        assert_eq!(nav.get_tile_state_size(tile), 12 + 4 * tile.polys.len());

        let state = nav.store_tile_state(tile_ref).unwrap();
        nav.set_poly_flags(poly, PolyFlags::DISABLED).unwrap();
        nav.set_poly_area(poly, 7).unwrap();
        assert_eq!(nav.get_poly_area(poly).unwrap(), 7);

        nav.restore_tile_state(tile_ref, &state).unwrap();
        assert_eq!(nav.get_poly_flags(poly).unwrap(), PolyFlags::WALK);
        assert_eq!(nav.get_poly_area(poly).unwrap(), 0);

        // State saved for another tile is rejected.
        let other = nav.encode_poly_id(9, 0, 0);
        assert!(nav.restore_tile_state(other, &state).is_err());
    }

    #[test]
    fn test_query_polygons_in_tile() {
        let data = create_nav_mesh_data(&grid_params(4, 4, 0, 0)).unwrap();
        let nav = NavMesh::init_solo(data).unwrap();
        let tile = nav.tiles().next().unwrap();

        let all = nav.query_polygons_in_tile(tile, &[-1.0, -1.0, -1.0], &[5.0, 1.0, 5.0]);
        assert_eq!(all.len(), 16);
        let some = nav.query_polygons_in_tile(tile, &[0.2, -1.0, 0.2], &[0.8, 1.0, 0.8]);
        assert!(!some.is_empty() && some.len() < 16);

        let (r, pt) = nav
            .find_nearest_poly_in_tile(tile, &[2.5, 0.5, 2.5], &[0.5, 1.0, 0.5])
            .unwrap();
        assert!(nav.is_valid_poly_ref(r));
        assert!((pt[0] - 2.5).abs() < 1e-4 && (pt[2] - 2.5).abs() < 1e-4);
    }

    #[test]
    fn test_flood_fill_prune_disables_islands() {
        // Two strips with a gap between them.
        let params = cells_params(&[(0, 0), (1, 0), (0, 2), (1, 2)], 2, 3, 0, 0);
        let mut nav = NavMesh::init_solo(create_nav_mesh_data(&params).unwrap()).unwrap();
        let tile = nav.tiles().next().unwrap();
        let seed = nav.get_poly_ref_base(tile);

        assert_eq!(flood_fill_prune_nav_mesh(&mut nav, &[seed]), 2);
        let filter = QueryFilter::default();
        let tile = nav.tiles().next().unwrap();
        let passing = nav
            .tile_poly_refs(tile)
            .filter(|&r| filter.pass_filter(r, nav.get_tile_and_poly_by_ref(r).unwrap().1))
            .count();
        assert_eq!(passing, 2);

        // Every unreached polygon is cleared again on a second pass.
        assert_eq!(flood_fill_prune_nav_mesh(&mut nav, &[seed]), 2);
    }
}
