//! Multi-agent crowd simulation on detour navigation meshes
//!
//! Agents follow polygon corridors toward their targets while steering
//! around each other and the navmesh walls.
//!
//! - [`Crowd`]: agent slots and the per-tick update pipeline
//! - [`PathCorridor`]: the polygon path an agent follows
//! - [`LocalBoundary`]: cached walls around an agent
//! - [`ObstacleAvoidanceQuery`]: sampled velocity selection
//! - [`ProximityGrid`]: neighbour lookup
//!
//! The crowd does not own the navmesh. Pass it to each call:
//!
//! ```rust,ignore
//! use detour_crowd::{Crowd, CrowdAgentParams};
//!
//! let mut crowd = Crowd::new(32, 0.6)?;
//! let agent = crowd.add_agent(&nav_mesh, &[1.0, 0.0, 1.0], &CrowdAgentParams::default())?;
//! crowd.request_move_to(&nav_mesh, agent, &[8.0, 0.0, 6.0])?;
//! crowd.update(&nav_mesh, 1.0 / 60.0);
//! ```

pub mod crowd;
pub mod local_boundary;
pub mod obstacle_avoidance;
pub mod path_corridor;
pub mod proximity_grid;

#[cfg(test)]
pub(crate) mod test_nav_helpers;

pub use crowd::{
    AgentState, Crowd, CrowdAgent, CrowdAgentParams, CrowdNeighbour, MoveRequestState, MoveStatus,
    OffMeshAnimation, StepSettings, UpdateFlags, DT_CROWDAGENT_MAX_CORNERS, DT_CROWDAGENT_MAX_NEIGHBOURS,
    DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS, DT_CROWD_MAX_QUERY_FILTER_TYPE,
};
pub use local_boundary::LocalBoundary;
pub use obstacle_avoidance::{
    AvoidanceSample, ObstacleAvoidanceDebugData, ObstacleAvoidanceParams, ObstacleAvoidanceQuery,
    ObstacleCircle, ObstacleSegment,
};
pub use path_corridor::{
    merge_corridor_end_moved, merge_corridor_start_moved, merge_corridor_start_shortcut, Corner, PathCorridor,
};
pub use proximity_grid::ProximityGrid;
