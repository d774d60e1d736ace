//! Debug drawing of navigation meshes

use recast_common::debug::{append_box_wire, append_circle, Color, DebugDraw, DebugDrawPrimitive};

use crate::nav_mesh::{MeshTile, NavMesh, Poly};
use crate::{NavMeshQuery, PolyRef, PolyType, DT_EXT_LINK};

bitflags::bitflags! {
    /// What [`draw_nav_mesh`] draws besides the polygons
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DrawNavMeshFlags: u8 {
        const OFFMESH_CONS = 0x01;
        const CLOSED_LIST = 0x02;
        const COLOR_TILES = 0x04;
        const BV_TREE = 0x08;
    }
}

const INNER_EDGE: Color = Color::new(0.0, 0.2, 0.25, 0.2);
const OUTER_EDGE: Color = Color::new(0.0, 0.19, 0.25, 0.86);
const OPEN_PORTAL: Color = Color::new(0.0, 0.0, 0.0, 0.19);
const CLOSED_POLY: Color = Color::new(1.0, 0.77, 0.0, 0.5);
const OFFMESH_LINE: Color = Color::new(1.0, 1.0, 1.0, 0.75);

fn area_color(area: u8) -> Color {
    if area == 0 {
        Color::new(0.0, 0.75, 1.0, 0.25)
    } else {
        Color::from_id(area as u32, 0.25)
    }
}

/// Draws every loaded tile of `nav`
pub fn draw_nav_mesh(dd: &mut dyn DebugDraw, nav: &NavMesh, flags: DrawNavMeshFlags) {
    for tile in nav.tiles() {
        draw_mesh_tile(dd, nav, None, tile, flags);
    }
}

/// Draws every loaded tile and highlights the polygons closed by the last
/// search of `query`
pub fn draw_nav_mesh_with_closed_list(
    dd: &mut dyn DebugDraw,
    nav: &NavMesh,
    query: &NavMeshQuery,
    flags: DrawNavMeshFlags,
) {
    let flags = flags | DrawNavMeshFlags::CLOSED_LIST;
    for tile in nav.tiles() {
        draw_mesh_tile(dd, nav, Some(query), tile, flags);
    }
}

fn draw_mesh_tile(
    dd: &mut dyn DebugDraw,
    nav: &NavMesh,
    query: Option<&NavMeshQuery>,
    tile: &MeshTile,
    flags: DrawNavMeshFlags,
) {
    let base = nav.get_poly_ref_base(tile).id();

    dd.depth_mask(false);
    dd.begin(DebugDrawPrimitive::Tris, 1.0);
    for (i, poly) in tile.polys.iter().enumerate() {
        if poly.poly_type == PolyType::OffMeshConnection {
            continue;
        }
        let r = PolyRef::new(base | i as u32);
        let closed = flags.contains(DrawNavMeshFlags::CLOSED_LIST)
            && query.is_some_and(|q| q.is_in_closed_list(r));
        let color = if closed {
            CLOSED_POLY
        } else if flags.contains(DrawNavMeshFlags::COLOR_TILES) {
            Color::from_id(tile.index as u32, 0.25)
        } else {
            area_color(poly.area)
        };
        append_detail_tris(dd, tile, i, poly, color);
    }
    dd.end();

    draw_poly_boundaries(dd, tile, INNER_EDGE, 1.5, true);
    draw_poly_boundaries(dd, tile, OUTER_EDGE, 2.5, false);

    if flags.contains(DrawNavMeshFlags::OFFMESH_CONS) {
        draw_off_mesh_connections(dd, tile);
    }
    if flags.contains(DrawNavMeshFlags::BV_TREE) {
        draw_bv_tree(dd, tile);
    }

    dd.begin(DebugDrawPrimitive::Points, 3.0);
    for v in tile.verts.chunks_exact(3) {
        dd.vertex([v[0], v[1], v[2]], Color::new(0.0, 0.0, 0.0, 0.86));
    }
    dd.end();
    dd.depth_mask(true);
}

fn append_detail_tris(dd: &mut dyn DebugDraw, tile: &MeshTile, ip: usize, poly: &Poly, color: Color) {
    let Some(pd) = tile.detail_meshes.get(ip) else {
        return;
    };
    for j in 0..pd.tri_count as usize {
        let Some(t) = tile.detail_tris.get(pd.tri_base as usize + j) else {
            break;
        };
        for v in tile.detail_tri_verts(poly, pd, t) {
            dd.vertex(v, color);
        }
    }
}

/// Draws polygon edges. With `inner` set, only edges shared with another
/// polygon are drawn, otherwise only walls.
fn draw_poly_boundaries(dd: &mut dyn DebugDraw, tile: &MeshTile, color: Color, width: f32, inner: bool) {
    dd.begin(DebugDrawPrimitive::Lines, width);
    for poly in &tile.polys {
        if poly.poly_type == PolyType::OffMeshConnection {
            continue;
        }
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            let nei = poly.neis[j];
            let c = if inner {
                if nei == 0 {
                    continue;
                }
                if nei & DT_EXT_LINK != 0 {
                    let connected = tile.links_of(poly).any(|l| l.edge as usize == j);
                    if connected {
                        color
                    } else {
                        OPEN_PORTAL
                    }
                } else {
                    color
                }
            } else {
                if nei != 0 {
                    continue;
                }
                color
            };

            dd.vertex(tile.poly_vertex(poly, j), c);
            dd.vertex(tile.poly_vertex(poly, (j + 1) % nv), c);
        }
    }
    dd.end();
}

fn draw_off_mesh_connections(dd: &mut dyn DebugDraw, tile: &MeshTile) {
    let Some(header) = tile.header.as_ref() else {
        return;
    };
    dd.begin(DebugDrawPrimitive::Lines, 2.0);
    for (i, poly) in tile.polys.iter().enumerate() {
        if poly.poly_type != PolyType::OffMeshConnection {
            continue;
        }
        let Some(con) = i
            .checked_sub(header.off_mesh_base as usize)
            .and_then(|k| tile.off_mesh_cons.get(k))
        else {
            continue;
        };
        let va = tile.poly_vertex(poly, 0);
        let vb = tile.poly_vertex(poly, 1);

        // Dim the ends that did not land on a polygon.
        let start_linked = tile.links_of(poly).any(|l| l.edge == 0);
        let end_linked = tile.links_of(poly).any(|l| l.edge == 1);
        let start_color = if start_linked { OFFMESH_LINE } else { OPEN_PORTAL };
        let end_color = if end_linked { OFFMESH_LINE } else { OPEN_PORTAL };

        // Connection end point to the polygon end point
        let start = con.start();
        let end = con.end();
        dd.vertex(start, start_color);
        dd.vertex(va, start_color);
        dd.vertex(end, end_color);
        dd.vertex(vb, end_color);

        append_circle(dd, start, con.rad, start_color);
        append_circle(dd, end, con.rad, end_color);

        // Arc lifted by a quarter of the length
        let len = recast_common::vdist(&va, &vb);
        let lift = len * 0.25;
        const SEGMENTS: usize = 8;
        let mut prev = va;
        for s in 1..=SEGMENTS {
            let t = s as f32 / SEGMENTS as f32;
            let mut p = recast_common::vlerp(&va, &vb, t);
            p[1] += lift * 4.0 * t * (1.0 - t);
            dd.vertex(prev, OFFMESH_LINE);
            dd.vertex(p, OFFMESH_LINE);
            prev = p;
        }
    }
    dd.end();
}

fn draw_bv_tree(dd: &mut dyn DebugDraw, tile: &MeshTile) {
    let Some(header) = tile.header.as_ref() else {
        return;
    };
    if header.bv_quant_factor <= 0.0 {
        return;
    }
    let cs = 1.0 / header.bv_quant_factor;
    dd.begin(DebugDrawPrimitive::Lines, 1.0);
    for node in tile.bv_tree.iter().filter(|n| n.i >= 0) {
        let bmin = [
            header.bmin[0] + node.bmin[0] as f32 * cs,
            header.bmin[1] + node.bmin[1] as f32 * cs,
            header.bmin[2] + node.bmin[2] as f32 * cs,
        ];
        let bmax = [
            header.bmin[0] + node.bmax[0] as f32 * cs,
            header.bmin[1] + node.bmax[1] as f32 * cs,
            header.bmin[2] + node.bmax[2] as f32 * cs,
        ];
        append_box_wire(dd, bmin, bmax, Color::new(1.0, 1.0, 1.0, 0.5));
    }
    dd.end();
}

/// Draws a single polygon, or the arc of an off-mesh connection
pub fn draw_nav_mesh_poly(dd: &mut dyn DebugDraw, nav: &NavMesh, r: PolyRef, color: Color) {
    let Ok((tile, poly)) = nav.get_tile_and_poly_by_ref(r) else {
        return;
    };
    let ip = nav.decode_poly_id(r).2 as usize;

    dd.depth_mask(false);
    if poly.poly_type == PolyType::OffMeshConnection {
        dd.begin(DebugDrawPrimitive::Lines, 2.0);
        dd.vertex(tile.poly_vertex(poly, 0), color);
        dd.vertex(tile.poly_vertex(poly, 1), color);
        dd.end();
    } else {
        dd.begin(DebugDrawPrimitive::Tris, 1.0);
        append_detail_tris(dd, tile, ip, poly, color.with_alpha(0.25));
        dd.end();
    }
    dd.depth_mask(true);
}
