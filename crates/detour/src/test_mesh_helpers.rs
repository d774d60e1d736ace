//! Small meshes for unit tests
//!
//! Grid meshes are made of unit quads on the y = 0 plane, one quad per
//! cell. Quads in a tile link to the quads they share an edge with and
//! mark their tile border edges as portals.

use std::collections::HashMap;

use recast::RC_MESH_NULL_IDX;

use crate::{create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshParams, PolyFlags, PolyRef};

/// Cells per side of a tile built by [`grid_tile_data`]
pub(crate) const TILE_CELLS: u16 = 4;

/// Quads at `cells` of an `nx` x `nz` tile at grid position (tile_x, tile_y)
pub(crate) fn cells_params(
    cells: &[(u16, u16)],
    nx: u16,
    nz: u16,
    tile_x: i32,
    tile_y: i32,
) -> NavMeshCreateParams {
    const NVP: usize = 6;

    let mut verts = Vec::new();
    let mut lookup: HashMap<(u16, u16), u16> = HashMap::new();
    let mut vertex = |x: u16, z: u16| -> u16 {
        *lookup.entry((x, z)).or_insert_with(|| {
            verts.extend_from_slice(&[x, 0, z]);
            (verts.len() / 3 - 1) as u16
        })
    };

    let index_of: HashMap<(u16, u16), u16> = cells
        .iter()
        .enumerate()
        .map(|(i, &c)| (c, i as u16))
        .collect();

    let mut polys = Vec::new();
    for &(x, z) in cells {
        polys.push(vertex(x, z));
        polys.push(vertex(x, z + 1));
        polys.push(vertex(x + 1, z + 1));
        polys.push(vertex(x + 1, z));
        polys.extend_from_slice(&[RC_MESH_NULL_IDX; NVP - 4]);

        // Edges face -x, +z, +x and -z in that order.
        let neighbours = [
            (x.checked_sub(1).map(|px| (px, z)), x == 0, 0),
            (Some((x, z + 1)), z + 1 == nz, 1),
            (Some((x + 1, z)), x + 1 == nx, 2),
            (z.checked_sub(1).map(|pz| (x, pz)), z == 0, 3),
        ];
        for (cell, on_border, side) in neighbours {
            let nei = match cell.and_then(|c| index_of.get(&c)) {
                Some(&i) => i,
                None if on_border => 0x8000 | side,
                None => RC_MESH_NULL_IDX,
            };
            polys.push(nei);
        }
        polys.extend_from_slice(&[RC_MESH_NULL_IDX; NVP - 4]);
    }

    let bmin = [
        tile_x as f32 * nx as f32,
        0.0,
        tile_y as f32 * nz as f32,
    ];
    NavMeshCreateParams {
        verts,
        polys,
        poly_flags: vec![PolyFlags::WALK.bits(); cells.len()],
        poly_areas: vec![0; cells.len()],
        nvp: NVP,
        tile_x,
        tile_y,
        bmin,
        bmax: [bmin[0] + nx as f32, 1.0, bmin[2] + nz as f32],
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.9,
        cs: 1.0,
        ch: 0.5,
        build_bv_tree: true,
        ..Default::default()
    }
}

/// A full `nx` x `nz` grid of quads
pub(crate) fn grid_params(nx: u16, nz: u16, tile_x: i32, tile_y: i32) -> NavMeshCreateParams {
    let cells: Vec<(u16, u16)> = (0..nz).flat_map(|z| (0..nx).map(move |x| (x, z))).collect();
    cells_params(&cells, nx, nz, tile_x, tile_y)
}

pub(crate) fn grid_tile_data(tile_x: i32, tile_y: i32) -> Vec<u8> {
    create_nav_mesh_data(&grid_params(TILE_CELLS, TILE_CELLS, tile_x, tile_y)).unwrap()
}

/// Single tile mesh over an `nx` x `nz` grid
pub(crate) fn solo_grid_mesh(nx: u16, nz: u16) -> NavMesh {
    NavMesh::init_solo(create_nav_mesh_data(&grid_params(nx, nz, 0, 0)).unwrap()).unwrap()
}

/// Single tile mesh over the given cells of an `nx` x `nz` grid
pub(crate) fn solo_cells_mesh(cells: &[(u16, u16)], nx: u16, nz: u16) -> NavMesh {
    NavMesh::init_solo(create_nav_mesh_data(&cells_params(cells, nx, nz, 0, 0)).unwrap()).unwrap()
}

/// `tiles_x` x `tiles_y` tiles of [`TILE_CELLS`] squared quads each
pub(crate) fn tiled_grid_mesh(tiles_x: i32, tiles_y: i32) -> NavMesh {
    let mut nav = NavMesh::init_tiled(&NavMeshParams {
        origin: [0.0; 3],
        tile_width: TILE_CELLS as f32,
        tile_height: TILE_CELLS as f32,
        max_tiles: 16,
        max_polys_per_tile: 64,
    })
    .unwrap();
    for y in 0..tiles_y {
        for x in 0..tiles_x {
            nav.add_tile(grid_tile_data(x, y), PolyRef::NULL).unwrap();
        }
    }
    nav
}

/// Reference of polygon `ip` in the first loaded tile
pub(crate) fn poly_ref(nav: &NavMesh, ip: u32) -> PolyRef {
    let tile = nav.tiles().next().unwrap();
    PolyRef::new(nav.get_poly_ref_base(tile).id() | ip)
}
