//! Binary layouts of navigation mesh data
//!
//! Tile data ('DNAV', version 7) is what [`crate::create_nav_mesh_data`]
//! produces and [`NavMesh::add_tile`] consumes. A navmesh set ('MSET')
//! stores the mesh parameters plus every tile with its reference, and tile
//! state ('DNMS') stores the mutable polygon flags and areas of a tile.
//! All values are little-endian.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::nav_mesh::{BVNode, MeshTile, OffMeshConnection, Poly, PolyDetail, TileHeader};
use crate::{
    NavMesh, NavMeshParams, PolyFlags, PolyRef, PolyType, Result, Status, DT_NULL_LINK,
    MAX_VERTS_PER_POLY,
};

const fn four_cc(tag: &[u8; 4]) -> u32 {
    ((tag[0] as u32) << 24) | ((tag[1] as u32) << 16) | ((tag[2] as u32) << 8) | tag[3] as u32
}

/// Tile data magic, 'DNAV'
pub const DT_NAVMESH_MAGIC: u32 = four_cc(b"DNAV");
pub const DT_NAVMESH_VERSION: i32 = 7;

/// Tile state magic, 'DNMS'
pub const DT_NAVMESH_STATE_MAGIC: u32 = four_cc(b"DNMS");
pub const DT_NAVMESH_STATE_VERSION: i32 = 1;

/// Navmesh set magic, 'MSET'
pub const DT_NAVMESH_SET_MAGIC: u32 = four_cc(b"MSET");
pub const DT_NAVMESH_SET_VERSION: i32 = 1;

const HEADER_SIZE: usize = 100;
const POLY_SIZE: usize = 32;
const LINK_SIZE: usize = 12;
const TILE_STATE_HEADER_SIZE: usize = 12;
const POLY_STATE_SIZE: usize = 4;

type Writer = Cursor<Vec<u8>>;

fn read_vec3<R: Read>(r: &mut R) -> std::io::Result<[f32; 3]> {
    Ok([
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ])
}

fn write_vec3(w: &mut Writer, v: &[f32; 3]) -> std::io::Result<()> {
    for &x in v {
        w.write_f32::<LittleEndian>(x)?;
    }
    Ok(())
}

fn read_header_fields<R: Read>(r: &mut R) -> Result<TileHeader> {
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != DT_NAVMESH_MAGIC {
        return Err(Status::FAILURE | Status::WRONG_MAGIC);
    }
    let version = r.read_i32::<LittleEndian>()?;
    if version != DT_NAVMESH_VERSION {
        return Err(Status::FAILURE | Status::WRONG_VERSION);
    }

    Ok(TileHeader {
        x: r.read_i32::<LittleEndian>()?,
        y: r.read_i32::<LittleEndian>()?,
        layer: r.read_i32::<LittleEndian>()?,
        user_id: r.read_u32::<LittleEndian>()?,
        poly_count: r.read_i32::<LittleEndian>()?,
        vert_count: r.read_i32::<LittleEndian>()?,
        max_link_count: r.read_i32::<LittleEndian>()?,
        detail_mesh_count: r.read_i32::<LittleEndian>()?,
        detail_vert_count: r.read_i32::<LittleEndian>()?,
        detail_tri_count: r.read_i32::<LittleEndian>()?,
        bv_node_count: r.read_i32::<LittleEndian>()?,
        off_mesh_con_count: r.read_i32::<LittleEndian>()?,
        off_mesh_base: r.read_i32::<LittleEndian>()?,
        walkable_height: r.read_f32::<LittleEndian>()?,
        walkable_radius: r.read_f32::<LittleEndian>()?,
        walkable_climb: r.read_f32::<LittleEndian>()?,
        bmin: read_vec3(r)?,
        bmax: read_vec3(r)?,
        bv_quant_factor: r.read_f32::<LittleEndian>()?,
    })
}

/// Reads and validates the header of tile data
pub fn read_tile_header(data: &[u8]) -> Result<TileHeader> {
    let header = read_header_fields(&mut Cursor::new(data))?;
    let counts = [
        header.poly_count,
        header.vert_count,
        header.max_link_count,
        header.detail_mesh_count,
        header.detail_vert_count,
        header.detail_tri_count,
        header.bv_node_count,
        header.off_mesh_con_count,
        header.off_mesh_base,
    ];
    if counts.iter().any(|&c| c < 0) {
        return Err(Status::invalid_param());
    }
    Ok(header)
}

fn count(c: i32) -> usize {
    c.max(0) as usize
}

/// Parses tile data into an unlinked tile
pub(crate) fn read_tile(data: &[u8]) -> Result<MeshTile> {
    let header = read_tile_header(data)?;
    let mut r = Cursor::new(data);
    r.set_position(HEADER_SIZE as u64);

    let mut tile = MeshTile::default();

    for _ in 0..count(header.vert_count) * 3 {
        tile.verts.push(r.read_f32::<LittleEndian>()?);
    }

    for _ in 0..count(header.poly_count) {
        let _first_link = r.read_u32::<LittleEndian>()?;
        let mut poly = Poly::default();
        for v in poly.verts.iter_mut() {
            *v = r.read_u16::<LittleEndian>()?;
        }
        for n in poly.neis.iter_mut() {
            *n = r.read_u16::<LittleEndian>()?;
        }
        poly.flags = PolyFlags::from_bits_retain(r.read_u16::<LittleEndian>()?);
        poly.vert_count = r.read_u8()?;
        let area_and_type = r.read_u8()?;
        poly.area = area_and_type & 0x3f;
        poly.poly_type = if area_and_type >> 6 == PolyType::OffMeshConnection as u8 {
            PolyType::OffMeshConnection
        } else {
            PolyType::Ground
        };
        tile.polys.push(poly);
    }

    // Link storage is rebuilt at runtime.
    let link_bytes = count(header.max_link_count) * LINK_SIZE;
    r.set_position(r.position() + link_bytes as u64);

    for _ in 0..count(header.detail_mesh_count) {
        let vert_base = r.read_u32::<LittleEndian>()?;
        let tri_base = r.read_u32::<LittleEndian>()?;
        let vert_count = r.read_u8()?;
        let tri_count = r.read_u8()?;
        let _pad = r.read_u16::<LittleEndian>()?;
        tile.detail_meshes.push(PolyDetail {
            vert_base,
            tri_base,
            vert_count,
            tri_count,
        });
    }

    for _ in 0..count(header.detail_vert_count) * 3 {
        tile.detail_verts.push(r.read_f32::<LittleEndian>()?);
    }

    for _ in 0..count(header.detail_tri_count) {
        let mut t = [0u8; 4];
        r.read_exact(&mut t)?;
        tile.detail_tris.push(t);
    }

    for _ in 0..count(header.bv_node_count) {
        let mut node = BVNode::default();
        for b in node.bmin.iter_mut() {
            *b = r.read_u16::<LittleEndian>()?;
        }
        for b in node.bmax.iter_mut() {
            *b = r.read_u16::<LittleEndian>()?;
        }
        node.i = r.read_i32::<LittleEndian>()?;
        tile.bv_tree.push(node);
    }

    for _ in 0..count(header.off_mesh_con_count) {
        let mut con = OffMeshConnection::default();
        for p in con.pos.iter_mut() {
            *p = r.read_f32::<LittleEndian>()?;
        }
        con.rad = r.read_f32::<LittleEndian>()?;
        con.poly = r.read_u16::<LittleEndian>()?;
        con.flags = r.read_u8()?;
        con.side = r.read_u8()?;
        con.user_id = r.read_u32::<LittleEndian>()?;
        tile.off_mesh_cons.push(con);
    }

    tile.header = Some(header);
    validate_tile(&tile)?;
    Ok(tile)
}

/// Index sanity checks so that queries never index out of bounds
fn validate_tile(tile: &MeshTile) -> Result<()> {
    let nverts = tile.verts.len() / 3;
    let npolys = tile.polys.len();

    for poly in &tile.polys {
        let nv = poly.vert_count as usize;
        if nv > MAX_VERTS_PER_POLY || nv < 2 {
            return Err(Status::invalid_param());
        }
        if poly.vertex_indices().iter().any(|&v| v as usize >= nverts) {
            return Err(Status::invalid_param());
        }
        let bad_nei = poly.neis[..nv]
            .iter()
            .any(|&n| n != 0 && (n & crate::DT_EXT_LINK) == 0 && n as usize > npolys);
        if bad_nei {
            return Err(Status::invalid_param());
        }
    }

    let ndverts = tile.detail_verts.len() / 3;
    for pd in &tile.detail_meshes {
        if pd.vert_base as usize + pd.vert_count as usize > ndverts
            || pd.tri_base as usize + pd.tri_count as usize > tile.detail_tris.len()
        {
            return Err(Status::invalid_param());
        }
    }

    if tile.bv_tree.iter().any(|n| n.i >= 0 && n.i as usize >= npolys) {
        return Err(Status::invalid_param());
    }
    if tile.off_mesh_cons.iter().any(|c| c.poly as usize >= npolys) {
        return Err(Status::invalid_param());
    }
    Ok(())
}

/// Serializes a tile to tile data
pub(crate) fn write_tile(tile: &MeshTile) -> Result<Vec<u8>> {
    let header = tile.header.as_ref().ok_or(Status::invalid_param())?;
    let mut w = Cursor::new(Vec::new());

    w.write_u32::<LittleEndian>(DT_NAVMESH_MAGIC)?;
    w.write_i32::<LittleEndian>(DT_NAVMESH_VERSION)?;
    w.write_i32::<LittleEndian>(header.x)?;
    w.write_i32::<LittleEndian>(header.y)?;
    w.write_i32::<LittleEndian>(header.layer)?;
    w.write_u32::<LittleEndian>(header.user_id)?;
    w.write_i32::<LittleEndian>(header.poly_count)?;
    w.write_i32::<LittleEndian>(header.vert_count)?;
    w.write_i32::<LittleEndian>(header.max_link_count)?;
    w.write_i32::<LittleEndian>(header.detail_mesh_count)?;
    w.write_i32::<LittleEndian>(header.detail_vert_count)?;
    w.write_i32::<LittleEndian>(header.detail_tri_count)?;
    w.write_i32::<LittleEndian>(header.bv_node_count)?;
    w.write_i32::<LittleEndian>(header.off_mesh_con_count)?;
    w.write_i32::<LittleEndian>(header.off_mesh_base)?;
    w.write_f32::<LittleEndian>(header.walkable_height)?;
    w.write_f32::<LittleEndian>(header.walkable_radius)?;
    w.write_f32::<LittleEndian>(header.walkable_climb)?;
    write_vec3(&mut w, &header.bmin)?;
    write_vec3(&mut w, &header.bmax)?;
    w.write_f32::<LittleEndian>(header.bv_quant_factor)?;

    for &v in &tile.verts {
        w.write_f32::<LittleEndian>(v)?;
    }

    for poly in &tile.polys {
        w.write_u32::<LittleEndian>(DT_NULL_LINK)?;
        for &v in &poly.verts {
            w.write_u16::<LittleEndian>(v)?;
        }
        for &n in &poly.neis {
            w.write_u16::<LittleEndian>(n)?;
        }
        w.write_u16::<LittleEndian>(poly.flags.bits())?;
        w.write_u8(poly.vert_count)?;
        w.write_u8((poly.area & 0x3f) | ((poly.poly_type as u8) << 6))?;
    }

    w.write_all(&vec![0u8; count(header.max_link_count) * LINK_SIZE])?;

    for pd in &tile.detail_meshes {
        w.write_u32::<LittleEndian>(pd.vert_base)?;
        w.write_u32::<LittleEndian>(pd.tri_base)?;
        w.write_u8(pd.vert_count)?;
        w.write_u8(pd.tri_count)?;
        w.write_u16::<LittleEndian>(0)?;
    }

    for &v in &tile.detail_verts {
        w.write_f32::<LittleEndian>(v)?;
    }

    for t in &tile.detail_tris {
        w.write_all(t)?;
    }

    for node in &tile.bv_tree {
        for &b in node.bmin.iter().chain(node.bmax.iter()) {
            w.write_u16::<LittleEndian>(b)?;
        }
        w.write_i32::<LittleEndian>(node.i)?;
    }

    for con in &tile.off_mesh_cons {
        for &p in &con.pos {
            w.write_f32::<LittleEndian>(p)?;
        }
        w.write_f32::<LittleEndian>(con.rad)?;
        w.write_u16::<LittleEndian>(con.poly)?;
        w.write_u8(con.flags)?;
        w.write_u8(con.side)?;
        w.write_u32::<LittleEndian>(con.user_id)?;
    }

    Ok(w.into_inner())
}

pub(crate) fn tile_state_size(tile: &MeshTile) -> usize {
    TILE_STATE_HEADER_SIZE + POLY_STATE_SIZE * tile.polys.len()
}

pub(crate) fn write_tile_state(tile_ref: PolyRef, tile: &MeshTile) -> Result<Vec<u8>> {
    let mut w = Cursor::new(Vec::with_capacity(tile_state_size(tile)));
    w.write_u32::<LittleEndian>(DT_NAVMESH_STATE_MAGIC)?;
    w.write_i32::<LittleEndian>(DT_NAVMESH_STATE_VERSION)?;
    w.write_u32::<LittleEndian>(tile_ref.id())?;
    for poly in &tile.polys {
        w.write_u16::<LittleEndian>(poly.flags.bits())?;
        w.write_u8(poly.area)?;
        w.write_u8(0)?;
    }
    Ok(w.into_inner())
}

pub(crate) fn read_tile_state(tile_ref: PolyRef, tile: &mut MeshTile, data: &[u8]) -> Result<()> {
    if data.len() < tile_state_size(tile) {
        return Err(Status::FAILURE | Status::OUT_OF_MEMORY);
    }
    let mut r = Cursor::new(data);
    if r.read_u32::<LittleEndian>()? != DT_NAVMESH_STATE_MAGIC {
        return Err(Status::FAILURE | Status::WRONG_MAGIC);
    }
    if r.read_i32::<LittleEndian>()? != DT_NAVMESH_STATE_VERSION {
        return Err(Status::FAILURE | Status::WRONG_VERSION);
    }
    if r.read_u32::<LittleEndian>()? != tile_ref.id() {
        return Err(Status::invalid_param());
    }

    for poly in tile.polys.iter_mut() {
        poly.flags = PolyFlags::from_bits_retain(r.read_u16::<LittleEndian>()?);
        poly.area = r.read_u8()? & 0x3f;
        let _pad = r.read_u8()?;
    }
    Ok(())
}

/// Serializes every loaded tile of `nav` together with the mesh parameters
pub fn save_nav_mesh_set(nav: &NavMesh) -> Result<Vec<u8>> {
    let tiles: Vec<&MeshTile> = nav.tiles().filter(|t| !t.data.is_empty()).collect();
    let params = nav.params();

    let mut w = Cursor::new(Vec::new());
    w.write_u32::<LittleEndian>(DT_NAVMESH_SET_MAGIC)?;
    w.write_i32::<LittleEndian>(DT_NAVMESH_SET_VERSION)?;
    w.write_i32::<LittleEndian>(tiles.len() as i32)?;
    write_vec3(&mut w, &params.origin)?;
    w.write_f32::<LittleEndian>(params.tile_width)?;
    w.write_f32::<LittleEndian>(params.tile_height)?;
    w.write_i32::<LittleEndian>(params.max_tiles)?;
    w.write_i32::<LittleEndian>(params.max_polys_per_tile)?;

    for tile in tiles {
        w.write_u32::<LittleEndian>(nav.get_tile_ref(tile).id())?;
        w.write_i32::<LittleEndian>(tile.data.len() as i32)?;
        w.write_all(&tile.data)?;
    }

    log::debug!("saved navmesh set of {} tiles", nav.tile_count());
    Ok(w.into_inner())
}

/// Rebuilds a navigation mesh from [`save_nav_mesh_set`] output. Tiles get
/// back the references they were saved with.
pub fn load_nav_mesh_set(data: &[u8]) -> Result<NavMesh> {
    let mut r = Cursor::new(data);
    if r.read_u32::<LittleEndian>()? != DT_NAVMESH_SET_MAGIC {
        return Err(Status::FAILURE | Status::WRONG_MAGIC);
    }
    if r.read_i32::<LittleEndian>()? != DT_NAVMESH_SET_VERSION {
        return Err(Status::FAILURE | Status::WRONG_VERSION);
    }
    let num_tiles = r.read_i32::<LittleEndian>()?;

    let params = NavMeshParams {
        origin: read_vec3(&mut r)?,
        tile_width: r.read_f32::<LittleEndian>()?,
        tile_height: r.read_f32::<LittleEndian>()?,
        max_tiles: r.read_i32::<LittleEndian>()?,
        max_polys_per_tile: r.read_i32::<LittleEndian>()?,
    };
    let mut nav = NavMesh::init_tiled(&params)?;

    for _ in 0..num_tiles.max(0) {
        let tile_ref = PolyRef::new(r.read_u32::<LittleEndian>()?);
        let size = r.read_i32::<LittleEndian>()?;
        if tile_ref.is_null() || size <= 0 {
            break;
        }
        let mut tile_data = vec![0u8; size as usize];
        r.read_exact(&mut tile_data)?;
        nav.add_tile(tile_data, tile_ref)?;
    }

    log::debug!("loaded navmesh set of {} tiles", nav.tile_count());
    Ok(nav)
}

/// Writes a navmesh set to `path`
pub fn save_nav_mesh_set_to_file<P: AsRef<Path>>(nav: &NavMesh, path: P) -> recast_common::Result<()> {
    let data = save_nav_mesh_set(nav)?;
    fs::write(path, data)?;
    Ok(())
}

/// Reads a navmesh set from `path`
pub fn load_nav_mesh_set_from_file<P: AsRef<Path>>(path: P) -> recast_common::Result<NavMesh> {
    let data = fs::read(path)?;
    Ok(load_nav_mesh_set(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{grid_tile_data, tiled_grid_mesh};

    #[test]
    fn test_magic_values() {
        assert_eq!(DT_NAVMESH_MAGIC, 0x444E_4156);
        assert_eq!(DT_NAVMESH_SET_MAGIC, 0x4D53_4554);
        // Little-endian on disk.
        let data = grid_tile_data(0, 0);
        assert_eq!(&data[0..4], b"VAND");
    }

    #[test]
    fn test_tile_data_reparses_identically() {
        let data = grid_tile_data(2, 3);
        let tile = read_tile(&data).unwrap();
        let header = tile.header.as_ref().unwrap();
        assert_eq!((header.x, header.y), (2, 3));
        assert_eq!(tile.polys.len() as i32, header.poly_count);
        assert_eq!(write_tile(&tile).unwrap(), data);
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut data = grid_tile_data(0, 0);
        data[4] = 6;
        assert_eq!(
            read_tile_header(&data).unwrap_err(),
            Status::FAILURE | Status::WRONG_VERSION
        );
        data[0] = 0;
        assert_eq!(
            read_tile_header(&data).unwrap_err(),
            Status::FAILURE | Status::WRONG_MAGIC
        );
        assert!(read_tile(&grid_tile_data(0, 0)[..HEADER_SIZE + 8]).is_err());
    }

    #[test]
    fn test_set_round_trip_keeps_refs() {
        let mut nav = tiled_grid_mesh(2, 2);
        // Bump the salt of one slot.
        let r = nav.get_tile_ref_at(1, 1, 0).unwrap();
        let data = nav.remove_tile(r).unwrap();
        nav.add_tile(data, PolyRef::NULL).unwrap();

        let bytes = save_nav_mesh_set(&nav).unwrap();
        let loaded = load_nav_mesh_set(&bytes).unwrap();
        assert_eq!(loaded.tile_count(), 4);
        for tile in nav.tiles() {
            let h = tile.header.as_ref().unwrap();
            assert_eq!(
                loaded.get_tile_ref_at(h.x, h.y, h.layer),
                Some(nav.get_tile_ref(tile))
            );
        }

        let mut bad = bytes.clone();
        bad[0] ^= 0xff;
        assert!(load_nav_mesh_set(&bad).is_err());
    }

    #[test]
    fn test_set_file_round_trip() {
        let nav = tiled_grid_mesh(2, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.bin");
        save_nav_mesh_set_to_file(&nav, &path).unwrap();
        let loaded = load_nav_mesh_set_from_file(&path).unwrap();
        assert_eq!(loaded.tile_count(), 2);
        assert!(load_nav_mesh_set_from_file(dir.path().join("missing.bin")).is_err());
    }
}
