//! Single tile navmesh generation

use detour::{create_nav_mesh_data, NavMesh, NavMeshCreateParams, OffMeshConnectionParams, PolyFlags};
use recast::{
    get_bounding_box, CompactHeightfield, ContourSet, Heightfield, PolyMesh, PolyMeshDetail, RecastBuilder,
    RecastContext, TimerCategory, RC_WALKABLE_AREA,
};

use crate::config::{BuildSettings, SoloNavMeshConfig};
use crate::error::{report, BuildStage, Generated, GeneratorError};

/// Pipeline products of a solo build, filled in when intermediates are kept
#[derive(Debug, Default)]
pub struct SoloNavMeshIntermediates {
    pub context: RecastContext,
    pub heightfield: Option<Heightfield>,
    pub compact_heightfield: Option<CompactHeightfield>,
    pub contour_set: Option<ContourSet>,
    pub poly_mesh: Option<PolyMesh>,
    pub poly_mesh_detail: Option<PolyMeshDetail>,
}

pub type SoloNavMeshResult = Generated<NavMesh, SoloNavMeshIntermediates>;

/// Builds a single tile navmesh over the triangles `indices` of
/// `positions`.
///
/// Only vertices referenced by `indices` contribute to the bounds.
pub fn generate_solo_nav_mesh(
    positions: &[f32],
    indices: &[i32],
    config: &SoloNavMeshConfig,
    keep_intermediates: bool,
) -> SoloNavMeshResult {
    let mut intermediates = SoloNavMeshIntermediates::default();
    let result = build(positions, indices, config, keep_intermediates, &mut intermediates);
    report(&mut intermediates.context, &result);
    Generated { result, intermediates }
}

fn build(
    positions: &[f32],
    indices: &[i32],
    config: &SoloNavMeshConfig,
    keep: bool,
    out: &mut SoloNavMeshIntermediates,
) -> Result<NavMesh, GeneratorError> {
    let settings = &config.settings;
    let (bmin, bmax) = get_bounding_box(positions, indices).map_err(GeneratorError::at(BuildStage::Bounds))?;
    let builder = RecastBuilder::new(settings.to_recast_config(bmin, bmax));

    let ctx = &mut out.context;
    ctx.log_info(format!(
        "building solo navmesh: {} triangles, {}x{} cells",
        indices.len() / 3,
        builder.config().width,
        builder.config().height
    ));
    ctx.start_timer(TimerCategory::Total);

    let hf = builder
        .build_heightfield(ctx, positions, indices)
        .map_err(GeneratorError::at(BuildStage::Heightfield))?;
    let mut chf = builder
        .build_compact_heightfield(ctx, &hf)
        .map_err(GeneratorError::at(BuildStage::CompactHeightfield))?;
    if keep {
        out.heightfield = Some(hf);
    }

    builder
        .build_regions(ctx, &mut chf)
        .map_err(GeneratorError::at(BuildStage::Regions))?;
    let cset = builder
        .build_contours(ctx, &chf)
        .map_err(GeneratorError::at(BuildStage::Contours))?;
    let mut pmesh = builder
        .build_poly_mesh(ctx, &cset)
        .map_err(GeneratorError::at(BuildStage::PolyMesh))?;
    let dmesh = builder
        .build_detail_mesh(ctx, &pmesh, &chf)
        .map_err(GeneratorError::at(BuildStage::DetailMesh))?;
    if keep {
        out.compact_heightfield = Some(chf);
        out.contour_set = Some(cset);
    }
    ctx.stop_timer(TimerCategory::Total);

    assign_poly_flags(&mut pmesh);
    let result = pack_tile(&pmesh, &dmesh, settings, &config.off_mesh_connections, 0, 0)
        .and_then(|data| NavMesh::init_solo(data).map_err(GeneratorError::at(BuildStage::NavMeshInit)));
    if result.is_ok() {
        ctx.log_info(format!(
            "solo navmesh: {} vertices, {} polygons",
            pmesh.nverts, pmesh.npolys
        ));
    }
    if keep {
        out.poly_mesh = Some(pmesh);
        out.poly_mesh_detail = Some(dmesh);
    }
    result
}

/// Maps the Recast walkable area to area 0 and gives area 0 the walk flag
pub(crate) fn assign_poly_flags(pmesh: &mut PolyMesh) {
    for (area, flags) in pmesh.areas.iter_mut().zip(pmesh.flags.iter_mut()) {
        if *area == RC_WALKABLE_AREA {
            *area = 0;
        }
        if *area == 0 {
            *flags = PolyFlags::WALK.bits();
        }
    }
}

/// Packs a poly mesh into navmesh tile data for tile `(tx, ty)`
pub(crate) fn pack_tile(
    pmesh: &PolyMesh,
    dmesh: &PolyMeshDetail,
    settings: &BuildSettings,
    off_mesh_connections: &[OffMeshConnectionParams],
    tx: i32,
    ty: i32,
) -> Result<Vec<u8>, GeneratorError> {
    if pmesh.npolys == 0 {
        return Err(GeneratorError::new(BuildStage::PolyMesh, "no walkable polygons"));
    }

    let mut params = NavMeshCreateParams::from_poly_mesh(pmesh, Some(dmesh));
    params.walkable_height = settings.walkable_height_world();
    params.walkable_radius = settings.walkable_radius_world();
    params.walkable_climb = settings.walkable_climb_world();
    params.tile_x = tx;
    params.tile_y = ty;
    for con in off_mesh_connections {
        params.add_off_mesh_connection(con);
    }

    create_nav_mesh_data(&params).map_err(GeneratorError::at(BuildStage::NavMeshData))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_geometry::{flat_plane, two_floors};
    use approx::assert_relative_eq;
    use detour::{NavMeshQuery, QueryFilter};

    #[test]
    fn test_flat_plane() {
        let (positions, indices) = flat_plane(10.0);
        let generated = generate_solo_nav_mesh(&positions, &indices, &SoloNavMeshConfig::default(), true);
        assert!(generated.success(), "{:?}", generated.error());

        let pmesh = generated.intermediates.poly_mesh.as_ref().unwrap();
        assert!(pmesh.npolys >= 1);
        assert!(pmesh.areas.iter().all(|&a| a == 0));
        assert!(pmesh.flags.iter().all(|&f| f == PolyFlags::WALK.bits()));
        assert!(generated.intermediates.heightfield.is_some());
        assert!(generated.intermediates.contour_set.is_some());

        let nav = generated.into_result().unwrap();
        assert_eq!(nav.tile_count(), 1);

        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let path = query.compute_path(&[1.0, 0.0, 1.0], &[9.0, 0.0, 9.0], &filter).unwrap();
        assert!(path.len() >= 2);
        let end = path[path.len() - 1];
        assert_relative_eq!(end[0], 9.0, epsilon = 1e-3);
        assert_relative_eq!(end[2], 9.0, epsilon = 1e-3);
    }

    #[test]
    fn test_agent_values_in_world_units() {
        let (positions, indices) = flat_plane(10.0);
        let config = SoloNavMeshConfig::default();
        let nav = generate_solo_nav_mesh(&positions, &indices, &config, false)
            .into_result()
            .unwrap();
        let header = nav.tiles().next().unwrap().header.clone().unwrap();
        assert_relative_eq!(header.walkable_height, 0.4, epsilon = 1e-6);
        assert_relative_eq!(header.walkable_radius, 0.2, epsilon = 1e-6);
        assert_relative_eq!(header.walkable_climb, 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_intermediates_dropped_unless_kept() {
        let (positions, indices) = flat_plane(10.0);
        let generated = generate_solo_nav_mesh(&positions, &indices, &SoloNavMeshConfig::default(), false);
        assert!(generated.success());

        let intermediates = &generated.intermediates;
        assert!(intermediates.heightfield.is_none());
        assert!(intermediates.compact_heightfield.is_none());
        assert!(intermediates.poly_mesh.is_none());
        assert!(intermediates.context.accumulated_time(TimerCategory::Total).is_some());
    }

    #[test]
    fn test_empty_input_fails() {
        let generated = generate_solo_nav_mesh(&[], &[], &SoloNavMeshConfig::default(), true);
        assert!(!generated.success());
        assert_eq!(generated.error().unwrap().stage, BuildStage::Bounds);
        assert!(generated.intermediates.context.logs().iter().any(|l| l.message.contains("bounds")));
    }

    #[test]
    fn test_off_mesh_connection_is_baked() {
        let (positions, indices) = flat_plane(10.0);
        let config = SoloNavMeshConfig {
            off_mesh_connections: vec![OffMeshConnectionParams {
                start: [2.0, 0.0, 2.0],
                end: [8.0, 0.0, 8.0],
                radius: 0.5,
                bidirectional: true,
                area: 0,
                flags: PolyFlags::JUMP.bits(),
                user_id: 7,
            }],
            ..Default::default()
        };
        let nav = generate_solo_nav_mesh(&positions, &indices, &config, false)
            .into_result()
            .unwrap();
        let tile = nav.tiles().next().unwrap();
        assert_eq!(tile.header.as_ref().unwrap().off_mesh_con_count, 1);
        assert_eq!(tile.off_mesh_cons.len(), 1);
    }

    #[test]
    fn test_two_floors_are_both_walkable() {
        let (positions, indices) = two_floors(10.0, 4.0);
        let nav = generate_solo_nav_mesh(&positions, &indices, &SoloNavMeshConfig::default(), false)
            .into_result()
            .unwrap();
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let extents = [0.5, 0.5, 0.5];

        let ground = query.find_nearest_poly(&[5.0, 0.0, 5.0], &extents, &filter).unwrap().unwrap();
        let upper = query.find_nearest_poly(&[5.0, 4.0, 5.0], &extents, &filter).unwrap().unwrap();
        assert_ne!(ground.reference, upper.reference);
        assert!(ground.point[1].abs() < 0.3);
        assert!((upper.point[1] - 4.0).abs() < 0.3);
    }
}
