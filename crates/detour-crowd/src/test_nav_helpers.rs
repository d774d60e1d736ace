//! Navigation meshes for unit tests
//!
//! Meshes are single tiles of unit quads on the y = 0 plane, one quad per
//! listed grid cell.

use std::collections::HashMap;

use detour::{create_nav_mesh_data, NavMesh, NavMeshCreateParams, OffMeshConnectionParams, PolyFlags};

const NVP: usize = 6;
const NULL_IDX: u16 = 0xffff;

/// Single tile mesh over the given cells of an `nx` x `nz` grid
pub(crate) fn cells_mesh(cells: &[(u16, u16)], nx: u16, nz: u16) -> NavMesh {
    NavMesh::init_solo(create_nav_mesh_data(&cells_params(cells, nx, nz)).unwrap()).unwrap()
}

fn cells_params(cells: &[(u16, u16)], nx: u16, nz: u16) -> NavMeshCreateParams {
    let mut verts = Vec::new();
    let mut lookup: HashMap<(u16, u16), u16> = HashMap::new();
    let mut vertex = |x: u16, z: u16| -> u16 {
        *lookup.entry((x, z)).or_insert_with(|| {
            verts.extend_from_slice(&[x, 0, z]);
            (verts.len() / 3 - 1) as u16
        })
    };

    let index_of: HashMap<(u16, u16), u16> = cells.iter().enumerate().map(|(i, &c)| (c, i as u16)).collect();
    let nei = |cell: Option<(u16, u16)>| cell.and_then(|c| index_of.get(&c).copied()).unwrap_or(NULL_IDX);

    let mut polys = Vec::new();
    for &(x, z) in cells {
        polys.push(vertex(x, z));
        polys.push(vertex(x, z + 1));
        polys.push(vertex(x + 1, z + 1));
        polys.push(vertex(x + 1, z));
        polys.extend_from_slice(&[NULL_IDX; NVP - 4]);

        // Edges face -x, +z, +x and -z.
        polys.push(nei(x.checked_sub(1).map(|px| (px, z))));
        polys.push(nei(Some((x, z + 1))));
        polys.push(nei(Some((x + 1, z))));
        polys.push(nei(z.checked_sub(1).map(|pz| (x, pz))));
        polys.extend_from_slice(&[NULL_IDX; NVP - 4]);
    }

    NavMeshCreateParams {
        verts,
        polys,
        poly_flags: vec![PolyFlags::WALK.bits(); cells.len()],
        poly_areas: vec![0; cells.len()],
        nvp: NVP,
        bmin: [0.0; 3],
        bmax: [nx as f32, 1.0, nz as f32],
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.9,
        cs: 1.0,
        ch: 0.5,
        build_bv_tree: true,
        ..Default::default()
    }
}

/// Full `nx` x `nz` grid
pub(crate) fn open_mesh(nx: u16, nz: u16) -> NavMesh {
    let cells: Vec<(u16, u16)> = (0..nz).flat_map(|z| (0..nx).map(move |x| (x, z))).collect();
    cells_mesh(&cells, nx, nz)
}

/// L-shaped corridor of width `w` in an `n` x `n` grid: the bottom rows
/// `z < w` and the left columns `x < w`
pub(crate) fn l_corridor_mesh(n: u16, w: u16) -> NavMesh {
    let cells: Vec<(u16, u16)> = (0..n)
        .flat_map(|z| (0..n).map(move |x| (x, z)))
        .filter(|&(x, z)| x < w || z < w)
        .collect();
    cells_mesh(&cells, n, n)
}

/// Two 3 x 3 islands at `x < 3` and `x >= 5` joined by a bidirectional
/// off-mesh connection from (2.5, 1.5) to (5.5, 1.5)
pub(crate) fn linked_islands_mesh() -> NavMesh {
    let cells: Vec<(u16, u16)> = (0..3u16)
        .flat_map(|z| (0..8u16).map(move |x| (x, z)))
        .filter(|&(x, _)| !(3..5).contains(&x))
        .collect();
    let mut params = cells_params(&cells, 8, 3);
    params.add_off_mesh_connection(&OffMeshConnectionParams {
        start: [2.5, 0.0, 1.5],
        end: [5.5, 0.0, 1.5],
        radius: 0.5,
        bidirectional: true,
        area: 0,
        flags: PolyFlags::JUMP.bits(),
        user_id: 1,
    });
    NavMesh::init_solo(create_nav_mesh_data(&params).unwrap()).unwrap()
}
