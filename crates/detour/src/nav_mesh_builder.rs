//! Packs a polygon mesh into navigation mesh tile data

use recast::{PolyMesh, PolyMeshDetail, RC_MESH_NULL_IDX};
use recast_common::{Error, Result};

use crate::binary_format;
use crate::nav_mesh::{BVNode, MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use crate::{PolyFlags, PolyType, DT_EXT_LINK, DT_OFFMESH_CON_BIDIR, MAX_VERTS_PER_POLY};

/// Off-mesh connection to bake into a tile
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnectionParams {
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub radius: f32,
    pub bidirectional: bool,
    pub area: u8,
    pub flags: u16,
    pub user_id: u32,
}

/// Input of [`create_nav_mesh_data`]
#[derive(Debug, Clone, Default)]
pub struct NavMeshCreateParams {
    /// Voxel quantized polygon mesh vertices
    pub verts: Vec<u16>,
    /// `nvp` vertex indices followed by `nvp` neighbour entries per polygon
    pub polys: Vec<u16>,
    pub poly_flags: Vec<u16>,
    pub poly_areas: Vec<u8>,
    pub nvp: usize,

    /// Per polygon `[vert_base, vert_count, tri_base, tri_count]`; when
    /// empty, polygons are fan triangulated
    pub detail_meshes: Vec<[u32; 4]>,
    pub detail_verts: Vec<f32>,
    pub detail_tris: Vec<[u8; 4]>,

    /// Start and end point per connection
    pub off_mesh_con_verts: Vec<f32>,
    pub off_mesh_con_rad: Vec<f32>,
    pub off_mesh_con_flags: Vec<u16>,
    pub off_mesh_con_areas: Vec<u8>,
    /// Non-zero for bidirectional connections
    pub off_mesh_con_dir: Vec<u8>,
    pub off_mesh_con_user_id: Vec<u32>,

    pub user_id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],

    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub cs: f32,
    pub ch: f32,

    pub build_bv_tree: bool,
}

impl NavMeshCreateParams {
    /// Fills the polygon and detail data from Recast meshes. Agent
    /// dimensions and tile coordinates are left for the caller.
    pub fn from_poly_mesh(pmesh: &PolyMesh, dmesh: Option<&PolyMeshDetail>) -> Self {
        let mut params = Self {
            verts: pmesh.verts[..pmesh.nverts * 3].to_vec(),
            polys: pmesh.polys[..pmesh.npolys * pmesh.nvp * 2].to_vec(),
            poly_flags: pmesh.flags.clone(),
            poly_areas: pmesh.areas.clone(),
            nvp: pmesh.nvp,
            bmin: pmesh.bmin.to_array(),
            bmax: pmesh.bmax.to_array(),
            cs: pmesh.cs,
            ch: pmesh.ch,
            build_bv_tree: true,
            ..Default::default()
        };
        if let Some(dmesh) = dmesh {
            params.detail_meshes = dmesh.meshes.clone();
            params.detail_verts = dmesh.vertices.clone();
            params.detail_tris = dmesh.triangles.clone();
        }
        params
    }

    pub fn add_off_mesh_connection(&mut self, con: &OffMeshConnectionParams) {
        self.off_mesh_con_verts.extend_from_slice(&con.start);
        self.off_mesh_con_verts.extend_from_slice(&con.end);
        self.off_mesh_con_rad.push(con.radius);
        self.off_mesh_con_flags.push(con.flags);
        self.off_mesh_con_areas.push(con.area);
        self.off_mesh_con_dir.push(u8::from(con.bidirectional));
        self.off_mesh_con_user_id.push(con.user_id);
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn poly_count(&self) -> usize {
        if self.nvp == 0 {
            0
        } else {
            self.polys.len() / (self.nvp * 2)
        }
    }

    pub fn off_mesh_con_count(&self) -> usize {
        self.off_mesh_con_rad.len()
    }

    fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * self.nvp * 2..(i + 1) * self.nvp * 2]
    }

    fn poly_vert_count(&self, i: usize) -> usize {
        self.poly(i)[..self.nvp]
            .iter()
            .take_while(|&&v| v != RC_MESH_NULL_IDX)
            .count()
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::NavMeshGeneration(msg.to_string()));

        if self.nvp < 3 || self.nvp > MAX_VERTS_PER_POLY {
            return fail("vertices per polygon must be between 3 and 6");
        }
        let nverts = self.vert_count();
        if nverts == 0 {
            return fail("no vertices");
        }
        if nverts >= 0xffff {
            return fail("too many vertices");
        }
        let npolys = self.poly_count();
        if npolys == 0 {
            return fail("no polygons");
        }
        if self.poly_flags.len() < npolys || self.poly_areas.len() < npolys {
            return fail("missing polygon flags or areas");
        }
        for i in 0..npolys {
            let nv = self.poly_vert_count(i);
            if nv < 3 || self.poly(i)[..nv].iter().any(|&v| v as usize >= nverts) {
                return fail("polygon references an invalid vertex");
            }
        }
        if !self.detail_meshes.is_empty() {
            if self.detail_meshes.len() < npolys {
                return fail("detail mesh count does not match polygon count");
            }
            let ndverts = self.detail_verts.len() / 3;
            for (i, dm) in self.detail_meshes.iter().take(npolys).enumerate() {
                let [vb, ndv, tb, ntris] = dm.map(|x| x as usize);
                let nv = self.poly_vert_count(i);
                if ndv < nv || vb + ndv > ndverts || tb + ntris > self.detail_tris.len() {
                    return fail("detail mesh out of range");
                }
                if ndv - nv > u8::MAX as usize || ntris > u8::MAX as usize {
                    return fail("detail mesh too large");
                }
            }
        }

        let ncons = self.off_mesh_con_count();
        if self.off_mesh_con_verts.len() < ncons * 6
            || self.off_mesh_con_flags.len() < ncons
            || self.off_mesh_con_areas.len() < ncons
            || self.off_mesh_con_dir.len() < ncons
        {
            return fail("off-mesh connection arrays are inconsistent");
        }
        Ok(())
    }
}

/// Side of the tile bounds `pt` lies beyond, 0xff when inside
fn classify_off_mesh_point(pt: &[f32], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if pt[0] >= bmax[0] {
        outcode |= XP;
    }
    if pt[2] >= bmax[2] {
        outcode |= ZP;
    }
    if pt[0] < bmin[0] {
        outcode |= XM;
    }
    if pt[2] < bmin[2] {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => 0xff,
    }
}

#[derive(Debug, Clone, Copy)]
struct BVItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

fn longest_axis(x: u16, y: u16, z: u16) -> usize {
    let mut axis = 0;
    let mut max_val = x;
    if y > max_val {
        axis = 1;
        max_val = y;
    }
    if z > max_val {
        axis = 2;
    }
    axis
}

fn subdivide(items: &mut [BVItem], nodes: &mut Vec<BVNode>) {
    let icur = nodes.len();
    if let [item] = items {
        nodes.push(BVNode {
            bmin: item.bmin,
            bmax: item.bmax,
            i: item.i,
        });
        return;
    }

    let mut node = BVNode {
        bmin: [u16::MAX; 3],
        bmax: [0; 3],
        i: 0,
    };
    for it in items.iter() {
        for k in 0..3 {
            node.bmin[k] = node.bmin[k].min(it.bmin[k]);
            node.bmax[k] = node.bmax[k].max(it.bmax[k]);
        }
    }
    nodes.push(node);

    let axis = longest_axis(
        node.bmax[0] - node.bmin[0],
        node.bmax[1] - node.bmin[1],
        node.bmax[2] - node.bmin[2],
    );
    items.sort_by_key(|it| it.bmin[axis]);

    let isplit = items.len() / 2;
    let (left, right) = items.split_at_mut(isplit);
    subdivide(left, nodes);
    subdivide(right, nodes);

    let iescape = (nodes.len() - icur) as i32;
    nodes[icur].i = -iescape;
}

fn create_bv_tree(params: &NavMeshCreateParams) -> Vec<BVNode> {
    let npolys = params.poly_count();
    let quant_factor = 1.0 / params.cs;
    let quantize = |v: f32, k: usize| -> u16 {
        (((v - params.bmin[k]) * quant_factor) as i32).clamp(0, 0xffff) as u16
    };

    let mut items = Vec::with_capacity(npolys);
    for i in 0..npolys {
        let mut it = BVItem {
            bmin: [0; 3],
            bmax: [0; 3],
            i: i as i32,
        };
        if let Some(dm) = params.detail_meshes.get(i) {
            let vb = dm[0] as usize;
            let ndv = dm[1] as usize;
            let mut bmin = recast_common::vget(&params.detail_verts, vb);
            let mut bmax = bmin;
            for j in 1..ndv {
                let v = recast_common::vget(&params.detail_verts, vb + j);
                bmin = recast_common::vmin(&bmin, &v);
                bmax = recast_common::vmax(&bmax, &v);
            }
            // The tree uses cs for every axis.
            for k in 0..3 {
                it.bmin[k] = quantize(bmin[k], k);
                it.bmax[k] = quantize(bmax[k], k);
            }
        } else {
            let p = params.poly(i);
            let nv = params.poly_vert_count(i);
            let first = p[0] as usize * 3;
            it.bmin.copy_from_slice(&params.verts[first..first + 3]);
            it.bmax = it.bmin;
            for &v in &p[1..nv] {
                let v = v as usize * 3;
                for k in 0..3 {
                    it.bmin[k] = it.bmin[k].min(params.verts[v + k]);
                    it.bmax[k] = it.bmax[k].max(params.verts[v + k]);
                }
            }
            // Remap y from ch to cs units.
            it.bmin[1] = (it.bmin[1] as f32 * params.ch / params.cs).floor() as u16;
            it.bmax[1] = (it.bmax[1] as f32 * params.ch / params.cs).ceil() as u16;
        }
        items.push(it);
    }

    let mut nodes = Vec::with_capacity(npolys * 2);
    if !items.is_empty() {
        subdivide(&mut items, &mut nodes);
    }
    nodes
}

/// Builds tile data from a polygon mesh.
///
/// Off-mesh connections are stored in the tile holding their start point;
/// the end point may land in a neighbouring tile.
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<Vec<u8>> {
    params.validate()?;

    let nvp = params.nvp;
    let nverts = params.vert_count();
    let npolys = params.poly_count();
    let ncons = params.off_mesh_con_count();

    // Classify off-mesh connection end points against the tile bounds,
    // with the height range tightened to the mesh.
    let mut con_class = vec![[0u8; 2]; ncons];
    let mut stored_con_count = 0usize;
    let mut con_link_count = 0usize;
    if ncons > 0 {
        let (mut hmin, mut hmax) = (f32::MAX, f32::MIN);
        if !params.detail_verts.is_empty() {
            for v in params.detail_verts.chunks_exact(3) {
                hmin = hmin.min(v[1]);
                hmax = hmax.max(v[1]);
            }
        } else {
            for v in params.verts.chunks_exact(3) {
                let h = params.bmin[1] + v[1] as f32 * params.ch;
                hmin = hmin.min(h);
                hmax = hmax.max(h);
            }
        }
        let mut bmin = params.bmin;
        let mut bmax = params.bmax;
        bmin[1] = hmin - params.walkable_climb;
        bmax[1] = hmax + params.walkable_climb;

        for (i, class) in con_class.iter_mut().enumerate() {
            let p0 = &params.off_mesh_con_verts[i * 6..i * 6 + 3];
            let p1 = &params.off_mesh_con_verts[i * 6 + 3..i * 6 + 6];
            class[0] = classify_off_mesh_point(p0, &bmin, &bmax);
            class[1] = classify_off_mesh_point(p1, &bmin, &bmax);

            // Drop starts that cannot touch the mesh vertically.
            if class[0] == 0xff && (p0[1] < bmin[1] || p0[1] > bmax[1]) {
                class[0] = 0;
            }
            if class[0] == 0xff {
                con_link_count += 1;
                stored_con_count += 1;
            }
            if class[1] == 0xff {
                con_link_count += 1;
            }
        }
    }

    let tot_poly_count = npolys + stored_con_count;
    let tot_vert_count = nverts + stored_con_count * 2;
    if tot_poly_count >= 0xffff || tot_vert_count >= 0xffff {
        return Err(Error::NavMeshGeneration(format!(
            "tile too large: {} polygons, {} vertices",
            tot_poly_count, tot_vert_count
        )));
    }

    let mut edge_count = 0;
    let mut portal_count = 0;
    for i in 0..npolys {
        let p = params.poly(i);
        for j in 0..params.poly_vert_count(i) {
            edge_count += 1;
            let nei = p[nvp + j];
            if nei & 0x8000 != 0 && nei & 0xf != 0xf {
                portal_count += 1;
            }
        }
    }
    let max_link_count = edge_count + portal_count * 2 + con_link_count * 2;

    let mut tile = MeshTile::default();

    // Mesh vertices, then two per stored off-mesh connection.
    for v in params.verts.chunks_exact(3) {
        tile.verts.push(params.bmin[0] + v[0] as f32 * params.cs);
        tile.verts.push(params.bmin[1] + v[1] as f32 * params.ch);
        tile.verts.push(params.bmin[2] + v[2] as f32 * params.cs);
    }
    for (i, class) in con_class.iter().enumerate() {
        if class[0] == 0xff {
            tile.verts
                .extend_from_slice(&params.off_mesh_con_verts[i * 6..i * 6 + 6]);
        }
    }

    for i in 0..npolys {
        let src = params.poly(i);
        let mut poly = Poly {
            flags: PolyFlags::from_bits_retain(params.poly_flags[i]),
            area: params.poly_areas[i] & 0x3f,
            poly_type: PolyType::Ground,
            ..Default::default()
        };
        for j in 0..params.poly_vert_count(i) {
            poly.verts[j] = src[j];
            let nei = src[nvp + j];
            poly.neis[j] = if nei & 0x8000 != 0 {
                // Border or portal edge.
                match nei & 0xf {
                    0 => DT_EXT_LINK | 4,
                    1 => DT_EXT_LINK | 2,
                    2 => DT_EXT_LINK,
                    3 => DT_EXT_LINK | 6,
                    _ => 0,
                }
            } else {
                nei.wrapping_add(1)
            };
            poly.vert_count += 1;
        }
        tile.polys.push(poly);
    }

    let mut n = 0u16;
    for (i, class) in con_class.iter().enumerate() {
        if class[0] != 0xff {
            continue;
        }
        let vbase = (nverts + n as usize * 2) as u16;
        let mut poly = Poly {
            vert_count: 2,
            flags: PolyFlags::from_bits_retain(params.off_mesh_con_flags[i]),
            area: params.off_mesh_con_areas[i] & 0x3f,
            poly_type: PolyType::OffMeshConnection,
            ..Default::default()
        };
        poly.verts[0] = vbase;
        poly.verts[1] = vbase + 1;
        tile.polys.push(poly);

        let mut pos = [0.0; 6];
        pos.copy_from_slice(&params.off_mesh_con_verts[i * 6..i * 6 + 6]);
        tile.off_mesh_cons.push(OffMeshConnection {
            pos,
            rad: params.off_mesh_con_rad[i],
            poly: npolys as u16 + n,
            flags: if params.off_mesh_con_dir[i] != 0 {
                DT_OFFMESH_CON_BIDIR
            } else {
                0
            },
            side: class[1],
            user_id: params.off_mesh_con_user_id.get(i).copied().unwrap_or(0),
        });
        n += 1;
    }

    if !params.detail_meshes.is_empty() {
        // The polygon vertices lead each detail mesh; only the extra
        // vertices are stored.
        let mut vbase = 0u32;
        for i in 0..npolys {
            let [vb, ndv, tri_base, tri_count] = params.detail_meshes[i];
            let nv = tile.polys[i].vert_count as u32;
            let extra = ndv - nv;
            tile.detail_meshes.push(PolyDetail {
                vert_base: vbase,
                tri_base,
                vert_count: extra as u8,
                tri_count: tri_count as u8,
            });
            let from = (vb + nv) as usize * 3;
            tile.detail_verts
                .extend_from_slice(&params.detail_verts[from..from + extra as usize * 3]);
            vbase += extra;
        }
        tile.detail_tris = params.detail_tris.clone();
    } else {
        // Fan triangulation of every polygon.
        let mut tbase = 0u32;
        for poly in tile.polys.iter().take(npolys) {
            let nv = poly.vert_count as usize;
            tile.detail_meshes.push(PolyDetail {
                vert_base: 0,
                tri_base: tbase,
                vert_count: 0,
                tri_count: (nv - 2) as u8,
            });
            for j in 2..nv {
                let mut flags = 1 << 2;
                if j == 2 {
                    flags |= 1 << 0;
                }
                if j == nv - 1 {
                    flags |= 1 << 4;
                }
                tile.detail_tris.push([0, (j - 1) as u8, j as u8, flags]);
                tbase += 1;
            }
        }
    }

    if params.build_bv_tree {
        tile.bv_tree = create_bv_tree(params);
    }

    tile.header = Some(TileHeader {
        x: params.tile_x,
        y: params.tile_y,
        layer: params.tile_layer,
        user_id: params.user_id,
        poly_count: tot_poly_count as i32,
        vert_count: tot_vert_count as i32,
        max_link_count: max_link_count as i32,
        detail_mesh_count: npolys as i32,
        detail_vert_count: (tile.detail_verts.len() / 3) as i32,
        detail_tri_count: tile.detail_tris.len() as i32,
        bv_node_count: tile.bv_tree.len() as i32,
        off_mesh_con_count: stored_con_count as i32,
        off_mesh_base: npolys as i32,
        walkable_height: params.walkable_height,
        walkable_radius: params.walkable_radius,
        walkable_climb: params.walkable_climb,
        bmin: params.bmin,
        bmax: params.bmax,
        bv_quant_factor: 1.0 / params.cs,
    });

    log::debug!(
        "tile ({}, {}) data: {} polygons, {} off-mesh connections, {} bv nodes",
        params.tile_x,
        params.tile_y,
        tot_poly_count,
        stored_con_count,
        tile.bv_tree.len()
    );

    Ok(binary_format::write_tile(&tile)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{grid_params, poly_ref};
    use crate::NavMesh;

    #[test]
    fn test_classify_off_mesh_point() {
        let bmin = [0.0, 0.0, 0.0];
        let bmax = [10.0, 1.0, 10.0];
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, 5.0], &bmin, &bmax), 0xff);
        assert_eq!(classify_off_mesh_point(&[11.0, 0.0, 5.0], &bmin, &bmax), 0);
        assert_eq!(classify_off_mesh_point(&[11.0, 0.0, 11.0], &bmin, &bmax), 1);
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, 11.0], &bmin, &bmax), 2);
        assert_eq!(classify_off_mesh_point(&[-1.0, 0.0, 5.0], &bmin, &bmax), 4);
        assert_eq!(classify_off_mesh_point(&[5.0, 0.0, -1.0], &bmin, &bmax), 6);
    }

    #[test]
    fn test_fan_triangulation_without_detail() {
        let params = grid_params(2, 2, 0, 0);
        let tile = crate::binary_format::read_tile(&create_nav_mesh_data(&params).unwrap()).unwrap();
        assert_eq!(tile.detail_meshes.len(), 4);
        assert_eq!(tile.detail_tris.len(), 8);
        assert_eq!(tile.detail_tris[0], [0, 1, 2, 0b0101]);
        assert_eq!(tile.detail_tris[1], [0, 2, 3, 0b10100]);
        // Complete tree over four leaves.
        assert_eq!(tile.bv_tree.len(), 7);
        assert_eq!(tile.bv_tree[0].i, -7);
    }

    #[test]
    fn test_portal_edges_are_remapped() {
        let params = grid_params(1, 1, 0, 0);
        let tile = crate::binary_format::read_tile(&create_nav_mesh_data(&params).unwrap()).unwrap();
        // Quad edges run -x, +z, +x, -z.
        assert_eq!(
            tile.polys[0].neis[..4],
            [DT_EXT_LINK | 4, DT_EXT_LINK | 2, DT_EXT_LINK, DT_EXT_LINK | 6]
        );
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert!(create_nav_mesh_data(&NavMeshCreateParams::default()).is_err());
        let mut params = grid_params(1, 1, 0, 0);
        params.nvp = 7;
        assert!(create_nav_mesh_data(&params).is_err());
        let mut params = grid_params(1, 1, 0, 0);
        params.poly_flags.clear();
        assert!(create_nav_mesh_data(&params).is_err());
    }

    #[test]
    fn test_off_mesh_connection_stored_when_start_inside() {
        let mut params = grid_params(4, 1, 0, 0);
        params.add_off_mesh_connection(&OffMeshConnectionParams {
            start: [0.5, 0.0, 0.5],
            end: [3.5, 0.0, 0.5],
            radius: 0.4,
            bidirectional: true,
            area: 2,
            flags: PolyFlags::JUMP.bits(),
            user_id: 42,
        });
        // Starts outside the tile, dropped.
        params.add_off_mesh_connection(&OffMeshConnectionParams {
            start: [-5.0, 0.0, 0.5],
            end: [0.5, 0.0, 0.5],
            radius: 0.4,
            bidirectional: false,
            area: 2,
            flags: PolyFlags::JUMP.bits(),
            user_id: 43,
        });

        let nav = NavMesh::init_solo(create_nav_mesh_data(&params).unwrap()).unwrap();
        let tile = nav.tiles().next().unwrap();
        assert_eq!(tile.polys.len(), 5);
        assert_eq!(tile.off_mesh_cons.len(), 1);
        assert_eq!(tile.polys[4].poly_type, PolyType::OffMeshConnection);

        let con_ref = poly_ref(&nav, 4);
        let con = nav.get_off_mesh_connection_by_ref(con_ref).unwrap();
        assert_eq!(con.user_id, 42);
        assert!(con.is_bidirectional());

        // Both ends attached, and both landing polygons link back.
        assert_eq!(tile.links_of(&tile.polys[4]).count(), 2);
        let (start, end) = nav
            .get_off_mesh_connection_poly_end_points(poly_ref(&nav, 0), con_ref)
            .unwrap();
        assert!((start[0] - 0.5).abs() < 1e-4);
        assert!((end[0] - 3.5).abs() < 1e-4);
    }
}
