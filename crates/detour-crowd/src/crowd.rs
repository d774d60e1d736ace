//! Crowd of agents steering over a shared navigation mesh
//!
//! Each tick the crowd validates corridors, services move requests, finds
//! neighbours and walls, steers toward the next corners, samples an
//! avoidance velocity, integrates, resolves agent overlaps and finally
//! constrains every agent to the navmesh surface.
//!
//! The crowd never owns the navmesh: every call that touches the mesh takes
//! it by reference, so tiles and polygon flags may change between ticks.

use bitflags::bitflags;
use detour::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, Status, StraightPathFlags};
use recast_common::{
    sqr, tri_area_2d, vadd, vdist_2d, vdist_2d_sqr, vlen, vlen_sqr, vlerp, vmad, vnormalize, vscale, vsub,
    Result,
};

use crate::local_boundary::LocalBoundary;
use crate::obstacle_avoidance::{ObstacleAvoidanceDebugData, ObstacleAvoidanceParams, ObstacleAvoidanceQuery};
use crate::path_corridor::{Corner, PathCorridor};
use crate::proximity_grid::ProximityGrid;

/// The maximum number of neighbours an agent takes into account for steering
pub const DT_CROWDAGENT_MAX_NEIGHBOURS: usize = 6;

/// The maximum number of corners an agent looks ahead along its corridor
pub const DT_CROWDAGENT_MAX_CORNERS: usize = 4;

/// The number of obstacle avoidance configurations a crowd holds
pub const DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS: usize = 8;

/// The number of query filters a crowd holds
pub const DT_CROWD_MAX_QUERY_FILTER_TYPE: usize = 16;

const MAX_PATH_RESULT: usize = 256;
const MAX_QUERY_NODES: usize = 512;
const MAX_NEIGHBOUR_QUERY: usize = 32;
const PATH_MAX_AGENTS: usize = 256;
const CHECK_LOOKAHEAD: usize = 10;
const TARGET_REPLAN_DELAY: f32 = 1.0;
const OPT_TIME_THR: f32 = 0.5;
const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
const COLLISION_ITERATIONS: usize = 4;
const MIN_FRAME_TIME: f32 = 0.001;

bitflags! {
    /// Steering behaviours applied to an agent
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct UpdateFlags: u8 {
        const ANTICIPATE_TURNS = 1;
        const OBSTACLE_AVOIDANCE = 2;
        const SEPARATION = 4;
        /// Shortcut the corridor toward visible corners
        const OPTIMIZE_VIS = 8;
        /// Periodically replan the start of the corridor locally
        const OPTIMIZE_TOPO = 16;
    }
}

impl Default for UpdateFlags {
    fn default() -> Self {
        Self::ANTICIPATE_TURNS | Self::OBSTACLE_AVOIDANCE | Self::SEPARATION
    }
}

/// Configuration of a single agent
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CrowdAgentParams {
    pub radius: f32,
    pub height: f32,
    pub max_acceleration: f32,
    pub max_speed: f32,
    /// Range used for neighbours and walls
    pub collision_query_range: f32,
    /// Lookahead of visibility shortcuts
    pub path_optimization_range: f32,
    pub separation_weight: f32,
    pub update_flags: UpdateFlags,
    /// Index into the crowd's avoidance configurations
    pub obstacle_avoidance_type: u8,
    /// Index into the crowd's query filters
    pub query_filter_type: u8,
    pub user_data: u64,
}

impl Default for CrowdAgentParams {
    fn default() -> Self {
        Self {
            radius: 0.5,
            height: 1.0,
            max_acceleration: 20.0,
            max_speed: 6.0,
            collision_query_range: 2.5,
            path_optimization_range: 0.0,
            separation_weight: 0.0,
            update_flags: UpdateFlags::default(),
            obstacle_avoidance_type: 0,
            query_filter_type: 0,
            user_data: 0,
        }
    }
}

/// Kind of surface the agent is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    /// Not on the navmesh
    #[default]
    Invalid,
    Walking,
    /// Traversing an off-mesh connection
    OffMesh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveRequestState {
    #[default]
    None,
    Failed,
    Valid,
    Requesting,
    /// Driven by a desired velocity instead of a target
    Velocity,
}

/// Coarse progress of an agent toward its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    Idle,
    Moving,
    Arrived,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrowdNeighbour {
    /// Index of the neighbouring agent
    pub idx: usize,
    /// Squared 2D distance between the agents
    pub dist: f32,
}

/// Scripted traversal of an off-mesh connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshAnimation {
    pub init_pos: [f32; 3],
    pub start_pos: [f32; 3],
    pub end_pos: [f32; 3],
    pub poly_ref: PolyRef,
    pub t: f32,
    pub tmax: f32,
}

#[derive(Debug, Clone)]
pub struct CrowdAgent {
    active: bool,
    state: AgentState,
    partial: bool,
    corridor: PathCorridor,
    boundary: LocalBoundary,
    topology_opt_time: f32,
    neis: Vec<CrowdNeighbour>,
    desired_speed: f32,
    npos: [f32; 3],
    disp: [f32; 3],
    dvel: [f32; 3],
    nvel: [f32; 3],
    vel: [f32; 3],
    params: CrowdAgentParams,
    corners: Vec<Corner>,
    target_state: MoveRequestState,
    target_ref: PolyRef,
    target_pos: [f32; 3],
    target_replan: bool,
    target_replan_time: f32,
    anim: Option<OffMeshAnimation>,
}

impl CrowdAgent {
    fn new() -> Self {
        Self {
            active: false,
            state: AgentState::Invalid,
            partial: false,
            corridor: PathCorridor::new(PATH_MAX_AGENTS),
            boundary: LocalBoundary::new(),
            topology_opt_time: 0.0,
            neis: Vec::with_capacity(DT_CROWDAGENT_MAX_NEIGHBOURS),
            desired_speed: 0.0,
            npos: [0.0; 3],
            disp: [0.0; 3],
            dvel: [0.0; 3],
            nvel: [0.0; 3],
            vel: [0.0; 3],
            params: CrowdAgentParams::default(),
            corners: Vec::with_capacity(DT_CROWDAGENT_MAX_CORNERS),
            target_state: MoveRequestState::None,
            target_ref: PolyRef::NULL,
            target_pos: [0.0; 3],
            target_replan: false,
            target_replan_time: 0.0,
            anim: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// True when the current corridor does not reach the requested target
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn corridor(&self) -> &PathCorridor {
        &self.corridor
    }

    pub fn boundary(&self) -> &LocalBoundary {
        &self.boundary
    }

    pub fn neighbours(&self) -> &[CrowdNeighbour] {
        &self.neis
    }

    pub fn desired_speed(&self) -> f32 {
        self.desired_speed
    }

    pub fn position(&self) -> &[f32; 3] {
        &self.npos
    }

    pub fn velocity(&self) -> &[f32; 3] {
        &self.vel
    }

    pub fn desired_velocity(&self) -> &[f32; 3] {
        &self.dvel
    }

    /// Velocity chosen by obstacle avoidance in the last tick
    pub fn new_velocity(&self) -> &[f32; 3] {
        &self.nvel
    }

    pub fn params(&self) -> &CrowdAgentParams {
        &self.params
    }

    pub fn corners(&self) -> &[Corner] {
        &self.corners
    }

    pub fn target_state(&self) -> MoveRequestState {
        self.target_state
    }

    pub fn target_ref(&self) -> PolyRef {
        self.target_ref
    }

    /// Requested target position, or the desired velocity for velocity
    /// requests
    pub fn target_position(&self) -> &[f32; 3] {
        &self.target_pos
    }

    /// Position the agent is currently steering toward
    pub fn next_target_in_path(&self) -> &[f32; 3] {
        &self.target_pos
    }

    /// True when the pending request was raised by a replan rather than
    /// the caller
    pub fn is_replanning(&self) -> bool {
        self.target_replan
    }

    pub fn animation(&self) -> Option<&OffMeshAnimation> {
        self.anim.as_ref()
    }

    pub fn move_status(&self) -> MoveStatus {
        match self.target_state {
            MoveRequestState::None | MoveRequestState::Failed => MoveStatus::Idle,
            MoveRequestState::Velocity => {
                if vlen_sqr(&self.target_pos) > 0.0 {
                    MoveStatus::Moving
                } else {
                    MoveStatus::Idle
                }
            }
            MoveRequestState::Valid
                if self.state == AgentState::Walking
                    && vdist_2d(&self.npos, &self.target_pos) < self.params.radius * 0.25 =>
            {
                MoveStatus::Arrived
            }
            _ => MoveStatus::Moving,
        }
    }

    /// True when the next corner is an off-mesh connection within
    /// `radius` of the agent
    pub fn over_off_mesh_connection(&self, radius: f32) -> bool {
        let Some(last) = self.corners.last() else {
            return false;
        };
        if !last.flags.contains(StraightPathFlags::OFFMESH_CONNECTION) {
            return false;
        }
        vdist_2d_sqr(&last.pos, &self.npos) < sqr(radius)
    }

    /// Distance left to the goal, capped at `range`
    fn distance_to_goal(&self, range: f32) -> f32 {
        match self.corners.last() {
            Some(last) if last.flags.contains(StraightPathFlags::END) => vdist_2d(&self.npos, &last.pos).min(range),
            _ => range,
        }
    }

    /// Heading that blends the first two corners so the agent starts turning
    /// before reaching a corner
    fn calc_smooth_steer_direction(&self) -> [f32; 3] {
        let Some(first) = self.corners.first() else {
            return [0.0; 3];
        };
        let second = &self.corners[(self.corners.len() - 1).min(1)];

        let mut dir0 = vsub(&first.pos, &self.npos);
        let mut dir1 = vsub(&second.pos, &self.npos);
        dir0[1] = 0.0;
        dir1[1] = 0.0;

        let len0 = vlen(&dir0);
        let len1 = vlen(&dir1);
        if len1 > 0.001 {
            dir1 = vscale(&dir1, 1.0 / len1);
        }

        let dir = [
            dir0[0] - dir1[0] * len0 * 0.5,
            0.0,
            dir0[2] - dir1[2] * len0 * 0.5,
        ];
        vnormalize(&dir)
    }

    fn calc_straight_steer_direction(&self) -> [f32; 3] {
        let Some(first) = self.corners.first() else {
            return [0.0; 3];
        };
        let mut dir = vsub(&first.pos, &self.npos);
        dir[1] = 0.0;
        vnormalize(&dir)
    }

    fn request_target(&mut self, r: PolyRef, pos: &[f32; 3], replan: bool) {
        self.target_ref = r;
        self.target_pos = *pos;
        self.target_replan = replan;
        self.target_state = if r.is_null() {
            MoveRequestState::Failed
        } else {
            MoveRequestState::Requesting
        };
    }

    fn follows_target(&self) -> bool {
        !matches!(self.target_state, MoveRequestState::None | MoveRequestState::Velocity)
    }
}

/// Fixed step sub-division of variable frame times
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct StepSettings {
    /// Length of one simulation step; non-positive runs each frame as a
    /// single step
    pub time_step: f32,
    /// Upper bound of steps per frame, 0 for no bound
    pub max_sub_steps: u32,
    /// Scales frame time, 0 pauses the simulation
    pub time_factor: f32,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            time_step: 1.0 / 60.0,
            max_sub_steps: 10,
            time_factor: 1.0,
        }
    }
}

impl StepSettings {
    /// Number of steps and the length of each for a frame of `dt` seconds
    pub fn sub_steps(&self, dt: f32) -> (u32, f32) {
        let dt = dt * self.time_factor.max(0.0);
        if dt <= MIN_FRAME_TIME {
            return (0, 0.0);
        }
        if self.time_step <= 0.0 {
            return (1, dt);
        }
        let mut iterations = (dt / self.time_step).ceil() as u32;
        if self.max_sub_steps > 0 {
            iterations = iterations.min(self.max_sub_steps);
        }
        let iterations = iterations.max(1);
        (iterations, dt / iterations as f32)
    }
}

/// Snapshot of the agent state read by other agents during a tick
#[derive(Clone, Copy)]
struct AgentSnapshot {
    npos: [f32; 3],
    vel: [f32; 3],
    dvel: [f32; 3],
    radius: f32,
}

pub struct Crowd {
    agents: Vec<CrowdAgent>,
    max_agent_radius: f32,
    obstacle_query: ObstacleAvoidanceQuery,
    obstacle_params: [ObstacleAvoidanceParams; DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS],
    filters: Vec<QueryFilter>,
    grid: ProximityGrid,
    agent_placement_half_extents: [f32; 3],
    velocity_sample_count: usize,
}

impl std::fmt::Debug for Crowd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crowd")
            .field("agents", &self.agents.len())
            .field("active", &self.get_active_agent_count())
            .field("max_agent_radius", &self.max_agent_radius)
            .finish()
    }
}

impl Crowd {
    /// Creates a crowd of `max_agents` slots for agents no larger than
    /// `max_agent_radius`
    pub fn new(max_agents: usize, max_agent_radius: f32) -> Result<Self> {
        if max_agents == 0 || max_agents > u16::MAX as usize || !(max_agent_radius > 0.0) {
            return Err(Status::invalid_param().into());
        }

        Ok(Self {
            agents: (0..max_agents).map(|_| CrowdAgent::new()).collect(),
            max_agent_radius,
            obstacle_query: ObstacleAvoidanceQuery::new(6, 8),
            obstacle_params: [ObstacleAvoidanceParams::default(); DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS],
            filters: vec![QueryFilter::default(); DT_CROWD_MAX_QUERY_FILTER_TYPE],
            grid: ProximityGrid::new(max_agent_radius * 3.0),
            agent_placement_half_extents: [
                max_agent_radius * 2.0,
                max_agent_radius * 1.5,
                max_agent_radius * 2.0,
            ],
            velocity_sample_count: 0,
        })
    }

    pub fn get_agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn get_active_agent_count(&self) -> usize {
        self.agents.iter().filter(|a| a.active).count()
    }

    pub fn get_max_agent_radius(&self) -> f32 {
        self.max_agent_radius
    }

    pub fn get_agent(&self, idx: usize) -> Option<&CrowdAgent> {
        self.agents.get(idx)
    }

    pub fn get_editable_agent(&mut self, idx: usize) -> Option<&mut CrowdAgent> {
        self.agents.get_mut(idx)
    }

    pub fn active_agents(&self) -> impl Iterator<Item = (usize, &CrowdAgent)> + '_ {
        self.agents.iter().enumerate().filter(|(_, a)| a.active)
    }

    pub fn get_filter(&self, i: usize) -> Option<&QueryFilter> {
        self.filters.get(i)
    }

    pub fn get_editable_filter(&mut self, i: usize) -> Option<&mut QueryFilter> {
        self.filters.get_mut(i)
    }

    pub fn set_obstacle_avoidance_params(&mut self, idx: usize, params: &ObstacleAvoidanceParams) {
        if let Some(slot) = self.obstacle_params.get_mut(idx) {
            *slot = *params;
        }
    }

    pub fn get_obstacle_avoidance_params(&self, idx: usize) -> Option<&ObstacleAvoidanceParams> {
        self.obstacle_params.get(idx)
    }

    /// Search extents used to place agents and targets on the navmesh
    pub fn get_query_half_extents(&self) -> &[f32; 3] {
        &self.agent_placement_half_extents
    }

    pub fn get_grid(&self) -> &ProximityGrid {
        &self.grid
    }

    /// Velocity samples taken by obstacle avoidance in the last tick
    pub fn get_velocity_sample_count(&self) -> usize {
        self.velocity_sample_count
    }

    fn active_agent(&self, idx: usize) -> Result<&CrowdAgent> {
        match self.agents.get(idx) {
            Some(ag) if ag.active => Ok(ag),
            _ => Err(Status::invalid_param().into()),
        }
    }

    fn active_agent_mut(&mut self, idx: usize) -> Result<&mut CrowdAgent> {
        match self.agents.get_mut(idx) {
            Some(ag) if ag.active => Ok(ag),
            _ => Err(Status::invalid_param().into()),
        }
    }

    fn filter_for(&self, params: &CrowdAgentParams) -> &QueryFilter {
        &self.filters[params.query_filter_type as usize]
    }

    fn clamp_params(params: &CrowdAgentParams) -> CrowdAgentParams {
        let mut params = params.clone();
        params.obstacle_avoidance_type = params
            .obstacle_avoidance_type
            .min(DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS as u8 - 1);
        params.query_filter_type = params.query_filter_type.min(DT_CROWD_MAX_QUERY_FILTER_TYPE as u8 - 1);
        params
    }

    pub fn update_agent_parameters(&mut self, idx: usize, params: &CrowdAgentParams) -> Result<()> {
        let params = Self::clamp_params(params);
        self.active_agent_mut(idx)?.params = params;
        Ok(())
    }

    /// Adds an agent at `pos` and returns its index.
    ///
    /// An agent placed away from the navmesh is still added, in the
    /// [`AgentState::Invalid`] state.
    pub fn add_agent(&mut self, nav: &NavMesh, pos: &[f32; 3], params: &CrowdAgentParams) -> Result<usize> {
        let Some(idx) = self.agents.iter().position(|a| !a.active) else {
            return Err((Status::FAILURE | Status::OUT_OF_MEMORY).into());
        };

        let params = Self::clamp_params(params);
        let query = NavMeshQuery::new(nav);
        let nearest = query
            .find_nearest_poly(pos, &self.agent_placement_half_extents, self.filter_for(&params))
            .ok()
            .flatten();
        let (r, npos) = match nearest {
            Some(n) => (n.reference, n.point),
            None => (PolyRef::NULL, *pos),
        };

        let ag = &mut self.agents[idx];
        *ag = CrowdAgent::new();
        ag.params = params;
        ag.corridor.reset(r, &npos);
        ag.npos = npos;
        ag.state = if r.is_null() {
            AgentState::Invalid
        } else {
            AgentState::Walking
        };
        ag.active = true;

        log::debug!("Added crowd agent {} at {:?} on {:?}", idx, npos, r);
        Ok(idx)
    }

    pub fn remove_agent(&mut self, idx: usize) {
        if let Some(ag) = self.agents.get_mut(idx) {
            ag.active = false;
            ag.anim = None;
        }
    }

    /// Sends the agent toward `pos` on polygon `r`
    pub fn request_move_target(&mut self, idx: usize, r: PolyRef, pos: &[f32; 3]) -> Result<()> {
        if r.is_null() {
            return Err(Status::invalid_param().into());
        }
        self.active_agent_mut(idx)?.request_target(r, pos, false);
        Ok(())
    }

    /// Sends the agent toward the navmesh point closest to `pos`
    pub fn request_move_to(&mut self, nav: &NavMesh, idx: usize, pos: &[f32; 3]) -> Result<()> {
        let ag = self.active_agent(idx)?;
        let query = NavMeshQuery::new(nav);
        let nearest = query.find_nearest_poly(pos, &self.agent_placement_half_extents, self.filter_for(&ag.params))?;
        let Some(nearest) = nearest else {
            log::debug!("No navmesh polygon near move target {:?}", pos);
            return Err(Status::FAILURE.into());
        };
        self.request_move_target(idx, nearest.reference, &nearest.point)
    }

    /// Drives the agent with a desired velocity instead of a target
    pub fn request_move_velocity(&mut self, idx: usize, vel: &[f32; 3]) -> Result<()> {
        let ag = self.active_agent_mut(idx)?;
        ag.target_ref = PolyRef::NULL;
        ag.target_pos = *vel;
        ag.target_replan = false;
        ag.target_state = MoveRequestState::Velocity;
        Ok(())
    }

    pub fn reset_move_target(&mut self, idx: usize) -> Result<()> {
        let ag = self.active_agent_mut(idx)?;
        ag.target_ref = PolyRef::NULL;
        ag.target_pos = [0.0; 3];
        ag.dvel = [0.0; 3];
        ag.target_replan = false;
        ag.target_state = MoveRequestState::None;
        Ok(())
    }

    /// Moves the agent to the navmesh point nearest `pos`, dropping its
    /// target and velocity
    pub fn teleport(&mut self, nav: &NavMesh, idx: usize, pos: &[f32; 3]) -> Result<()> {
        let half = self.agent_placement_half_extents;
        let filter = self.filter_for(&self.active_agent(idx)?.params).clone();
        let query = NavMeshQuery::new(nav);
        let nearest = query.find_nearest_poly(pos, &half, &filter).ok().flatten();
        let (r, npos) = match nearest {
            Some(n) => (n.reference, n.point),
            None => (PolyRef::NULL, *pos),
        };

        let ag = self.active_agent_mut(idx)?;
        ag.corridor.reset(r, &npos);
        ag.boundary.reset();
        ag.partial = false;
        ag.topology_opt_time = 0.0;
        ag.target_replan_time = 0.0;
        ag.neis.clear();
        ag.corners.clear();
        ag.anim = None;
        ag.dvel = [0.0; 3];
        ag.nvel = [0.0; 3];
        ag.vel = [0.0; 3];
        ag.npos = npos;
        ag.desired_speed = 0.0;
        ag.state = if r.is_null() {
            AgentState::Invalid
        } else {
            AgentState::Walking
        };
        ag.target_ref = PolyRef::NULL;
        ag.target_state = MoveRequestState::None;
        Ok(())
    }

    /// True when the agent is about to enter an off-mesh connection
    pub fn over_off_mesh_connection(&self, idx: usize) -> bool {
        self.agents
            .get(idx)
            .is_some_and(|ag| ag.active && ag.over_off_mesh_connection(ag.params.radius * 2.25))
    }

    /// Advances the simulation by `dt` seconds
    pub fn update(&mut self, nav: &NavMesh, dt: f32) {
        self.update_impl(nav, dt, None);
    }

    /// Like [`Crowd::update`], recording the avoidance samples of agent
    /// `debug_idx`
    pub fn update_with_debug(
        &mut self,
        nav: &NavMesh,
        dt: f32,
        debug_idx: usize,
        debug: &mut ObstacleAvoidanceDebugData,
    ) {
        self.update_impl(nav, dt, Some((debug_idx, debug)));
    }

    /// Advances the simulation by a frame of `dt` seconds split into fixed
    /// steps. Returns the number of steps taken.
    pub fn step(&mut self, nav: &NavMesh, dt: f32, settings: &StepSettings) -> u32 {
        let (iterations, step) = settings.sub_steps(dt);
        for _ in 0..iterations {
            self.update(nav, step);
        }
        iterations
    }

    fn update_impl(&mut self, nav: &NavMesh, dt: f32, mut debug: Option<(usize, &mut ObstacleAvoidanceDebugData)>) {
        self.velocity_sample_count = 0;
        let mut navquery = NavMeshQuery::with_max_nodes(nav, MAX_QUERY_NODES);
        let active: Vec<usize> = self.active_agents().map(|(i, _)| i).collect();

        self.check_path_validity(&navquery, &active, dt);
        self.update_move_requests(&mut navquery, &active);
        self.update_topology_optimization(&mut navquery, &active, dt);

        self.grid.clear();
        for &idx in &active {
            let ag = &self.agents[idx];
            let (p, r) = (ag.npos, ag.params.radius);
            self.grid.add_item(idx as u16, p[0] - r, p[2] - r, p[0] + r, p[2] + r);
        }

        self.update_neighbourhood(&mut navquery, &active);
        self.update_corners(&navquery, &active);
        self.trigger_off_mesh_connections(nav, &active);
        self.calculate_steering(&active);
        self.plan_velocities(&active, &mut debug);

        for &idx in &active {
            let ag = &mut self.agents[idx];
            if ag.state == AgentState::Walking {
                integrate(ag, dt);
            }
        }

        self.handle_collisions(&active);
        self.move_agents(&mut navquery, &active);
        self.update_off_mesh_animations(&active, dt);
    }

    /// Repairs corridors whose polygons disappeared and flags agents whose
    /// path needs replanning
    fn check_path_validity(&mut self, navquery: &NavMeshQuery, active: &[usize], dt: f32) {
        let half = self.agent_placement_half_extents;
        for &idx in active {
            let filter = &self.filters[self.agents[idx].params.query_filter_type as usize];
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking {
                continue;
            }
            ag.target_replan_time += dt;

            let mut replan = false;
            let mut agent_ref = ag.corridor.first_poly();
            let mut agent_pos = ag.npos;
            if !navquery.is_valid_poly_ref(agent_ref, filter) {
                match navquery.find_nearest_poly(&agent_pos, &half, filter) {
                    Ok(Some(nearest)) => {
                        agent_ref = nearest.reference;
                        agent_pos = nearest.point;
                    }
                    _ => {
                        log::debug!("Crowd agent {} lost the navmesh", idx);
                        ag.corridor.reset(PolyRef::NULL, &agent_pos);
                        ag.partial = false;
                        ag.boundary.reset();
                        ag.state = AgentState::Invalid;
                        continue;
                    }
                }
                ag.corridor.fix_path_start(agent_ref, &agent_pos);
                ag.boundary.reset();
                ag.npos = agent_pos;
                replan = true;
            }

            if !ag.follows_target() {
                continue;
            }

            if ag.target_state != MoveRequestState::Failed {
                if !navquery.is_valid_poly_ref(ag.target_ref, filter) {
                    match navquery.find_nearest_poly(&ag.target_pos, &half, filter) {
                        Ok(Some(nearest)) => {
                            ag.target_ref = nearest.reference;
                            ag.target_pos = nearest.point;
                        }
                        _ => ag.target_ref = PolyRef::NULL,
                    }
                    replan = true;
                }
                if ag.target_ref.is_null() {
                    ag.corridor.reset(agent_ref, &agent_pos);
                    ag.partial = false;
                    ag.target_state = MoveRequestState::None;
                }
            }

            if !ag.corridor.is_valid(CHECK_LOOKAHEAD, navquery, filter) {
                replan = true;
            }

            // The corridor end is near and does not reach the target yet.
            if ag.target_state == MoveRequestState::Valid
                && ag.target_replan_time > TARGET_REPLAN_DELAY
                && ag.corridor.path_count() < CHECK_LOOKAHEAD
                && ag.corridor.last_poly() != ag.target_ref
            {
                replan = true;
            }

            if replan && ag.target_state != MoveRequestState::None {
                let (r, pos) = (ag.target_ref, ag.target_pos);
                ag.request_target(r, &pos, true);
            }
        }
    }

    fn update_move_requests(&mut self, navquery: &mut NavMeshQuery, active: &[usize]) {
        for &idx in active {
            let filter = &self.filters[self.agents[idx].params.query_filter_type as usize];
            let ag = &mut self.agents[idx];
            if ag.state == AgentState::Invalid || ag.target_state != MoveRequestState::Requesting {
                continue;
            }

            let start = ag.corridor.first_poly();
            ag.target_replan_time = 0.0;
            ag.boundary.reset();

            let found = navquery
                .find_path(start, ag.target_ref, &ag.npos, &ag.target_pos, filter, MAX_PATH_RESULT)
                .ok()
                .filter(|(path, _)| !path.is_empty());
            let Some((path, status)) = found else {
                log::debug!("Crowd agent {} failed to plan toward {:?}", idx, ag.target_ref);
                let npos = ag.npos;
                ag.corridor.set_corridor(&npos, &[start]);
                ag.partial = false;
                ag.target_state = MoveRequestState::Failed;
                continue;
            };

            let last = path[path.len() - 1];
            let reached = last == ag.target_ref;
            let mut target = ag.target_pos;
            if !reached {
                // Clamp the goal to the furthest polygon reached.
                match navquery.closest_point_on_poly(last, &ag.target_pos) {
                    Ok((p, _)) => target = p,
                    Err(_) => {
                        let npos = ag.npos;
                        ag.corridor.set_corridor(&npos, &[start]);
                        ag.partial = false;
                        ag.target_state = MoveRequestState::Failed;
                        continue;
                    }
                }
            }

            ag.corridor.set_corridor(&target, &path);
            ag.partial = !reached || status.has_detail(Status::PARTIAL_RESULT);
            ag.target_state = MoveRequestState::Valid;
        }
    }

    /// Runs a local replan for the agent that waited longest, at most one
    /// per tick
    fn update_topology_optimization(&mut self, navquery: &mut NavMeshQuery, active: &[usize], dt: f32) {
        let mut best: Option<(usize, f32)> = None;
        for &idx in active {
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking
                || !ag.follows_target()
                || !ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_TOPO)
            {
                continue;
            }
            ag.topology_opt_time += dt;
            if ag.topology_opt_time >= OPT_TIME_THR && best.map_or(true, |(_, t)| ag.topology_opt_time > t) {
                best = Some((idx, ag.topology_opt_time));
            }
        }

        if let Some((idx, _)) = best {
            let filter = &self.filters[self.agents[idx].params.query_filter_type as usize];
            let ag = &mut self.agents[idx];
            ag.corridor.optimize_path_topology(navquery, filter);
            ag.topology_opt_time = 0.0;
        }
    }

    fn update_neighbourhood(&mut self, navquery: &mut NavMeshQuery, active: &[usize]) {
        for &idx in active {
            if self.agents[idx].state != AgentState::Walking {
                continue;
            }

            let filter = &self.filters[self.agents[idx].params.query_filter_type as usize];
            let ag = &mut self.agents[idx];
            let update_thr = ag.params.collision_query_range * 0.25;
            if vdist_2d_sqr(&ag.npos, ag.boundary.get_center()) > sqr(update_thr)
                || !ag.boundary.is_valid(navquery, filter)
            {
                let r = ag.corridor.first_poly();
                if let Err(status) =
                    ag.boundary
                        .update(r, &ag.npos, ag.params.collision_query_range, navquery, filter)
                {
                    log::debug!("Crowd agent {} boundary update failed: {}", idx, status);
                    ag.boundary.reset();
                }
            }

            let neis = self.find_neighbours(idx);
            self.agents[idx].neis = neis;
        }
    }

    /// Closest agents within the collision query range, nearest first
    fn find_neighbours(&self, idx: usize) -> Vec<CrowdNeighbour> {
        let ag = &self.agents[idx];
        let pos = ag.npos;
        let range = ag.params.collision_query_range;
        let ids = self.grid.query_items(
            pos[0] - range,
            pos[2] - range,
            pos[0] + range,
            pos[2] + range,
            MAX_NEIGHBOUR_QUERY,
        );

        let mut result: Vec<CrowdNeighbour> = Vec::with_capacity(DT_CROWDAGENT_MAX_NEIGHBOURS);
        for id in ids {
            let j = id as usize;
            if j == idx {
                continue;
            }
            let nei = &self.agents[j];
            let mut diff = vsub(&pos, &nei.npos);
            if diff[1].abs() >= (ag.params.height + nei.params.height) / 2.0 {
                continue;
            }
            diff[1] = 0.0;
            let dist = vlen_sqr(&diff);
            if dist > sqr(range) {
                continue;
            }

            let at = result.iter().position(|n| dist <= n.dist).unwrap_or(result.len());
            if at < DT_CROWDAGENT_MAX_NEIGHBOURS {
                result.insert(at, CrowdNeighbour { idx: j, dist });
                result.truncate(DT_CROWDAGENT_MAX_NEIGHBOURS);
            }
        }
        result
    }

    fn update_corners(&mut self, navquery: &NavMeshQuery, active: &[usize]) {
        for &idx in active {
            let filter = &self.filters[self.agents[idx].params.query_filter_type as usize];
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking {
                continue;
            }
            if !ag.follows_target() {
                ag.corners.clear();
                continue;
            }

            ag.corners = ag.corridor.find_corners(DT_CROWDAGENT_MAX_CORNERS, navquery);

            if ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_VIS) && !ag.corners.is_empty() {
                let target = ag.corners[(ag.corners.len() - 1).min(1)].pos;
                ag.corridor
                    .optimize_path_visibility(&target, ag.params.path_optimization_range, navquery, filter);
            }
        }
    }

    /// Starts the traversal animation of agents standing at an off-mesh
    /// connection
    fn trigger_off_mesh_connections(&mut self, nav: &NavMesh, active: &[usize]) {
        for &idx in active {
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking || !ag.follows_target() {
                continue;
            }
            if !ag.over_off_mesh_connection(ag.params.radius * 2.25) {
                continue;
            }
            let Some(off_mesh_ref) = ag.corners.last().map(|c| c.poly) else {
                continue;
            };

            match ag.corridor.move_over_off_mesh_connection(off_mesh_ref, nav) {
                Some((refs, start_pos, end_pos)) => {
                    ag.anim = Some(OffMeshAnimation {
                        init_pos: ag.npos,
                        start_pos,
                        end_pos,
                        poly_ref: refs[1],
                        t: 0.0,
                        tmax: vdist_2d(&start_pos, &end_pos) / ag.params.max_speed * 0.5,
                    });
                    ag.state = AgentState::OffMesh;
                    ag.corners.clear();
                    ag.neis.clear();
                    log::trace!("Crowd agent {} entered off-mesh connection {:?}", idx, refs[1]);
                }
                None => {
                    log::debug!("Crowd agent {} could not enter off-mesh connection {:?}", idx, off_mesh_ref);
                }
            }
        }
    }

    fn calculate_steering(&mut self, active: &[usize]) {
        let positions: Vec<[f32; 3]> = self.agents.iter().map(|a| a.npos).collect();

        for &idx in active {
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking || ag.target_state == MoveRequestState::None {
                continue;
            }

            let mut dvel = if ag.target_state == MoveRequestState::Velocity {
                ag.desired_speed = vlen(&ag.target_pos);
                ag.target_pos
            } else {
                let dir = if ag.params.update_flags.contains(UpdateFlags::ANTICIPATE_TURNS) {
                    ag.calc_smooth_steer_direction()
                } else {
                    ag.calc_straight_steer_direction()
                };

                // Slow down near the goal.
                let slow_down_radius = ag.params.radius * 2.0;
                let speed_scale = ag.distance_to_goal(slow_down_radius) / slow_down_radius;
                ag.desired_speed = ag.params.max_speed;
                vscale(&dir, ag.desired_speed * speed_scale)
            };

            if ag.params.update_flags.contains(UpdateFlags::SEPARATION) {
                let sep_dist = ag.params.collision_query_range;
                let inv_sep_dist = 1.0 / sep_dist;
                let sep_weight = ag.params.separation_weight;

                let mut w = 0.0f32;
                let mut disp = [0.0f32; 3];
                for nei in &ag.neis {
                    let mut diff = vsub(&ag.npos, &positions[nei.idx]);
                    diff[1] = 0.0;
                    let dist_sqr = vlen_sqr(&diff);
                    if dist_sqr < 0.00001 || dist_sqr > sqr(sep_dist) {
                        continue;
                    }
                    let dist = dist_sqr.sqrt();
                    let weight = sep_weight * (1.0 - sqr(dist * inv_sep_dist));
                    disp = vmad(&disp, &diff, weight / dist);
                    w += 1.0;
                }

                if w > 0.0001 {
                    dvel = vmad(&dvel, &disp, 1.0 / w);
                    let speed_sqr = vlen_sqr(&dvel);
                    let desired_sqr = sqr(ag.desired_speed);
                    if speed_sqr > desired_sqr {
                        dvel = vscale(&dvel, desired_sqr / speed_sqr);
                    }
                }
            }

            ag.dvel = dvel;
        }
    }

    fn plan_velocities(&mut self, active: &[usize], debug: &mut Option<(usize, &mut ObstacleAvoidanceDebugData)>) {
        let snapshots: Vec<AgentSnapshot> = self
            .agents
            .iter()
            .map(|a| AgentSnapshot {
                npos: a.npos,
                vel: a.vel,
                dvel: a.dvel,
                radius: a.params.radius,
            })
            .collect();

        for &idx in active {
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking {
                continue;
            }

            if !ag.params.update_flags.contains(UpdateFlags::OBSTACLE_AVOIDANCE) {
                ag.nvel = ag.dvel;
                continue;
            }

            self.obstacle_query.reset();
            for nei in &ag.neis {
                let s = &snapshots[nei.idx];
                self.obstacle_query.add_circle(&s.npos, s.radius, &s.vel, &s.dvel);
            }
            for (start, end) in ag.boundary.segments() {
                // Walls facing away from the agent.
                if tri_area_2d(&ag.npos, &start, &end) < 0.0 {
                    continue;
                }
                self.obstacle_query.add_segment(&start, &end);
            }

            let vod = match debug.as_mut() {
                Some((i, data)) if *i == idx => Some(&mut **data),
                _ => None,
            };
            let params = &self.obstacle_params[ag.params.obstacle_avoidance_type as usize];
            let (samples, nvel) = self.obstacle_query.sample_velocity_adaptive(
                &ag.npos,
                ag.params.radius,
                ag.desired_speed,
                &ag.vel,
                &ag.dvel,
                params,
                vod,
            );
            self.velocity_sample_count += samples;
            ag.nvel = nvel;
        }
    }

    /// Pushes overlapping agents apart
    fn handle_collisions(&mut self, active: &[usize]) {
        for _ in 0..COLLISION_ITERATIONS {
            let snapshots: Vec<AgentSnapshot> = self
                .agents
                .iter()
                .map(|a| AgentSnapshot {
                    npos: a.npos,
                    vel: a.vel,
                    dvel: a.dvel,
                    radius: a.params.radius,
                })
                .collect();

            for &idx in active {
                let ag = &mut self.agents[idx];
                ag.disp = [0.0; 3];
                if ag.state != AgentState::Walking {
                    continue;
                }

                let mut w = 0.0f32;
                let mut disp = [0.0f32; 3];
                for nei in &ag.neis {
                    let other = &snapshots[nei.idx];
                    let mut diff = vsub(&ag.npos, &other.npos);
                    diff[1] = 0.0;

                    let dist_sqr = vlen_sqr(&diff);
                    if dist_sqr > sqr(ag.params.radius + other.radius) {
                        continue;
                    }
                    let dist = dist_sqr.sqrt();
                    let mut pen = (ag.params.radius + other.radius) - dist;
                    if dist < 0.0001 {
                        // Agents on top of each other separate sideways.
                        diff = if idx > nei.idx {
                            [-ag.dvel[2], 0.0, ag.dvel[0]]
                        } else {
                            [ag.dvel[2], 0.0, -ag.dvel[0]]
                        };
                        pen = 0.01;
                    } else {
                        pen = (1.0 / dist) * (pen * 0.5) * COLLISION_RESOLVE_FACTOR;
                    }
                    disp = vmad(&disp, &diff, pen);
                    w += 1.0;
                }

                if w > 0.0001 {
                    ag.disp = vscale(&disp, 1.0 / w);
                }
            }

            for &idx in active {
                let ag = &mut self.agents[idx];
                if ag.state == AgentState::Walking {
                    ag.npos = vadd(&ag.npos, &ag.disp);
                }
            }
        }
    }

    /// Constrains agents to the navmesh surface along their corridors
    fn move_agents(&mut self, navquery: &mut NavMeshQuery, active: &[usize]) {
        for &idx in active {
            let filter = &self.filters[self.agents[idx].params.query_filter_type as usize];
            let ag = &mut self.agents[idx];
            if ag.state != AgentState::Walking {
                continue;
            }

            ag.corridor.move_position(&ag.npos, navquery, filter);
            ag.npos = *ag.corridor.pos();

            if !ag.follows_target() {
                let first = ag.corridor.first_poly();
                let npos = ag.npos;
                ag.corridor.reset(first, &npos);
                ag.partial = false;
            }
        }
    }

    fn update_off_mesh_animations(&mut self, active: &[usize], dt: f32) {
        for &idx in active {
            let ag = &mut self.agents[idx];
            let Some(anim) = ag.anim.as_mut() else {
                continue;
            };

            anim.t += dt;
            if anim.t > anim.tmax {
                ag.anim = None;
                ag.state = AgentState::Walking;
                continue;
            }

            let ta = anim.tmax * 0.15;
            let tb = anim.tmax;
            ag.npos = if anim.t < ta {
                vlerp(&anim.init_pos, &anim.start_pos, tween(anim.t, 0.0, ta))
            } else {
                vlerp(&anim.start_pos, &anim.end_pos, tween(anim.t, ta, tb))
            };
            ag.vel = [0.0; 3];
            ag.dvel = [0.0; 3];
        }
    }
}

/// Applies the planned velocity, bounded by acceleration and top speed
fn integrate(ag: &mut CrowdAgent, dt: f32) {
    let max_delta = ag.params.max_acceleration * dt;
    let mut dv = vsub(&ag.nvel, &ag.vel);
    let ds = vlen(&dv);
    if ds > max_delta {
        dv = vscale(&dv, max_delta / ds);
    }
    ag.vel = vadd(&ag.vel, &dv);

    let speed = vlen(&ag.vel);
    if speed > ag.params.max_speed {
        ag.vel = vscale(&ag.vel, ag.params.max_speed / speed);
    }

    if vlen(&ag.vel) > 0.0001 {
        ag.npos = vmad(&ag.npos, &ag.vel, dt);
    } else {
        ag.vel = [0.0; 3];
    }
}

fn tween(t: f32, t0: f32, t1: f32) -> f32 {
    if t1 <= t0 {
        return 1.0;
    }
    ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_nav_helpers::{l_corridor_mesh, linked_islands_mesh, open_mesh};

    fn run(crowd: &mut Crowd, nav: &NavMesh, steps: usize) {
        for _ in 0..steps {
            crowd.update(nav, 1.0 / 30.0);
        }
    }

    #[test]
    fn test_new_rejects_bad_parameters() {
        assert!(Crowd::new(0, 0.5).is_err());
        assert!(Crowd::new(4, 0.0).is_err());
        assert!(Crowd::new(4, f32::NAN).is_err());

        let crowd = Crowd::new(4, 0.6).unwrap();
        assert_eq!(crowd.get_agent_count(), 4);
        assert_eq!(crowd.get_active_agent_count(), 0);
        assert_eq!(crowd.get_query_half_extents(), &[0.6 * 2.0, 0.6 * 1.5, 0.6 * 2.0]);
        assert_eq!(crowd.get_grid().get_cell_size(), 0.6 * 3.0);
    }

    #[test]
    fn test_agent_defaults() {
        let params = CrowdAgentParams::default();
        assert_eq!(params.radius, 0.5);
        assert_eq!(params.height, 1.0);
        assert_eq!(params.max_acceleration, 20.0);
        assert_eq!(params.max_speed, 6.0);
        assert_eq!(params.collision_query_range, 2.5);
        assert_eq!(params.update_flags.bits(), 7);
        assert_eq!(params.obstacle_avoidance_type, 0);
    }

    #[test]
    fn test_add_and_remove_agents() {
        let nav = open_mesh(6, 6);
        let mut crowd = Crowd::new(2, 0.5).unwrap();
        let params = CrowdAgentParams::default();

        let a = crowd.add_agent(&nav, &[1.5, 0.3, 1.5], &params).unwrap();
        let b = crowd.add_agent(&nav, &[4.5, 0.0, 4.5], &params).unwrap();
        assert_ne!(a, b);
        assert!(crowd.add_agent(&nav, &[2.5, 0.0, 2.5], &params).is_err());
        assert_eq!(crowd.get_active_agent_count(), 2);

        let agent = crowd.get_agent(a).unwrap();
        assert_eq!(agent.state(), AgentState::Walking);
        // Snapped onto the surface.
        assert_eq!(agent.position()[1], 0.0);
        assert_eq!(agent.target_state(), MoveRequestState::None);
        assert_eq!(agent.move_status(), MoveStatus::Idle);

        crowd.remove_agent(a);
        assert_eq!(crowd.get_active_agent_count(), 1);
        assert!(crowd.request_move_velocity(a, &[1.0, 0.0, 0.0]).is_err());
        assert_eq!(crowd.add_agent(&nav, &[2.5, 0.0, 2.5], &params).unwrap(), a);
    }

    #[test]
    fn test_agent_off_mesh_is_invalid() {
        let nav = open_mesh(4, 4);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[50.0, 0.0, 50.0], &CrowdAgentParams::default())
            .unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().state(), AgentState::Invalid);

        crowd.update(&nav, 0.1);
        assert_eq!(crowd.get_agent(idx).unwrap().position(), &[50.0, 0.0, 50.0]);
    }

    #[test]
    fn test_params_are_clamped() {
        let nav = open_mesh(4, 4);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let params = CrowdAgentParams {
            obstacle_avoidance_type: 200,
            query_filter_type: 200,
            ..Default::default()
        };
        let idx = crowd.add_agent(&nav, &[1.5, 0.0, 1.5], &params).unwrap();
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.params().obstacle_avoidance_type, 7);
        assert_eq!(agent.params().query_filter_type, 15);
    }

    #[test]
    fn test_agent_arrives_without_avoidance() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let params = CrowdAgentParams {
            update_flags: UpdateFlags::ANTICIPATE_TURNS,
            ..Default::default()
        };
        let idx = crowd.add_agent(&nav, &[1.5, 0.0, 1.5], &params).unwrap();
        crowd.request_move_to(&nav, idx, &[8.5, 0.0, 7.5]).unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().target_state(), MoveRequestState::Requesting);

        crowd.update(&nav, 1.0 / 30.0);
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.target_state(), MoveRequestState::Valid);
        assert_eq!(agent.move_status(), MoveStatus::Moving);
        assert!(!agent.is_partial());
        assert!(vlen(agent.velocity()) > 0.0);

        run(&mut crowd, &nav, 200);
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.move_status(), MoveStatus::Arrived);
        assert!(vdist_2d(agent.position(), &[8.5, 0.0, 7.5]) < 0.125);
        assert_eq!(agent.next_target_in_path(), &[8.5, 0.0, 7.5]);
    }

    #[test]
    fn test_agent_reaches_target_with_default_steering() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[1.5, 0.0, 1.5], &CrowdAgentParams::default())
            .unwrap();
        crowd.request_move_to(&nav, idx, &[8.5, 0.0, 8.5]).unwrap();

        run(&mut crowd, &nav, 300);
        let agent = crowd.get_agent(idx).unwrap();
        assert!(vdist_2d(agent.position(), &[8.5, 0.0, 8.5]) < 0.3);
        assert!(crowd.get_velocity_sample_count() > 0);
    }

    #[test]
    fn test_agent_rounds_concave_corner() {
        let nav = l_corridor_mesh(10, 2);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[1.0, 0.0, 9.0], &CrowdAgentParams::default())
            .unwrap();
        let goal = [9.0, 0.0, 1.0];
        crowd.request_move_to(&nav, idx, &goal).unwrap();

        let mut closest = f32::MAX;
        for _ in 0..600 {
            crowd.update(&nav, 1.0 / 30.0);
            let pos = *crowd.get_agent(idx).unwrap().position();
            // Never inside the blocked quadrant.
            assert!(pos[0] <= 2.0 + 1e-3 || pos[2] <= 2.0 + 1e-3, "agent left the corridor at {:?}", pos);
            closest = closest.min(vdist_2d(&pos, &goal));
        }
        assert!(closest < 0.5);
        assert!(crowd.get_agent(idx).unwrap().position()[0] > 7.0);
    }

    #[test]
    fn test_velocity_request_moves_agent() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[3.0, 0.0, 5.0], &CrowdAgentParams::default())
            .unwrap();
        crowd.request_move_velocity(idx, &[2.0, 0.0, 0.0]).unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().move_status(), MoveStatus::Moving);

        run(&mut crowd, &nav, 30);
        let agent = crowd.get_agent(idx).unwrap();
        assert!(agent.position()[0] > 4.0);
        assert!((agent.position()[2] - 5.0).abs() < 0.5);
        assert_eq!(agent.corridor().path_count(), 1);

        crowd.reset_move_target(idx).unwrap();
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.target_state(), MoveRequestState::None);
        assert_eq!(agent.desired_velocity(), &[0.0; 3]);
    }

    #[test]
    fn test_teleport_resets_motion() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[1.5, 0.0, 1.5], &CrowdAgentParams::default())
            .unwrap();
        crowd.request_move_to(&nav, idx, &[8.5, 0.0, 8.5]).unwrap();
        run(&mut crowd, &nav, 5);

        crowd.teleport(&nav, idx, &[6.5, 0.4, 2.5]).unwrap();
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.position(), &[6.5, 0.0, 2.5]);
        assert_eq!(agent.velocity(), &[0.0; 3]);
        assert_eq!(agent.target_state(), MoveRequestState::None);
        assert_eq!(agent.state(), AgentState::Walking);
        assert_eq!(agent.corridor().path_count(), 1);

        crowd.teleport(&nav, idx, &[40.0, 0.0, 40.0]).unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().state(), AgentState::Invalid);
    }

    #[test]
    fn test_overlapping_agents_are_pushed_apart() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(2, 0.5).unwrap();
        let params = CrowdAgentParams::default();
        let a = crowd.add_agent(&nav, &[4.9, 0.0, 5.0], &params).unwrap();
        let b = crowd.add_agent(&nav, &[5.1, 0.0, 5.0], &params).unwrap();

        crowd.update(&nav, 1.0 / 30.0);
        let pa = *crowd.get_agent(a).unwrap().position();
        let pb = *crowd.get_agent(b).unwrap().position();
        assert!(vdist_2d(&pa, &pb) > 0.95);
        assert!(pa[0] < 4.9 && pb[0] > 5.1);
        assert_eq!(crowd.get_agent(a).unwrap().neighbours().len(), 1);
    }

    #[test]
    fn test_blocked_corridor_is_replanned() {
        let mut nav = open_mesh(5, 3);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let params = CrowdAgentParams {
            update_flags: UpdateFlags::ANTICIPATE_TURNS,
            ..Default::default()
        };
        let idx = crowd.add_agent(&nav, &[0.5, 0.0, 1.5], &params).unwrap();
        crowd.request_move_to(&nav, idx, &[4.5, 0.0, 1.5]).unwrap();
        crowd.update(&nav, 1.0 / 30.0);
        assert_eq!(crowd.get_agent(idx).unwrap().corridor().path_count(), 5);

        let blocked = {
            let query = NavMeshQuery::new(&nav);
            query
                .find_nearest_poly(&[2.5, 0.0, 1.5], &[0.1, 1.0, 0.1], &QueryFilter::default())
                .unwrap()
                .unwrap()
                .reference
        };
        assert!(crowd.get_agent(idx).unwrap().corridor().path().contains(&blocked));
        nav.set_poly_flags(blocked, detour::PolyFlags::empty()).unwrap();

        crowd.update(&nav, 1.0 / 30.0);
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.target_state(), MoveRequestState::Valid);
        assert!(!agent.corridor().path().contains(&blocked));
        assert_eq!(agent.corridor().last_poly(), agent.target_ref());
    }

    #[test]
    fn test_agent_crosses_off_mesh_connection() {
        let nav = linked_islands_mesh();
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let params = CrowdAgentParams {
            update_flags: UpdateFlags::ANTICIPATE_TURNS,
            ..Default::default()
        };
        let idx = crowd.add_agent(&nav, &[0.5, 0.0, 1.5], &params).unwrap();
        crowd.request_move_to(&nav, idx, &[7.5, 0.0, 1.5]).unwrap();

        let mut saw_off_mesh = false;
        for _ in 0..300 {
            crowd.update(&nav, 1.0 / 30.0);
            let agent = crowd.get_agent(idx).unwrap();
            if agent.state() == AgentState::OffMesh {
                saw_off_mesh = true;
                assert!(agent.animation().is_some());
                assert_eq!(agent.velocity(), &[0.0; 3]);
            }
        }
        assert!(saw_off_mesh);
        let agent = crowd.get_agent(idx).unwrap();
        assert_eq!(agent.state(), AgentState::Walking);
        assert_eq!(agent.move_status(), MoveStatus::Arrived);
    }

    #[test]
    fn test_sub_step_counts() {
        let settings = StepSettings::default();
        assert_eq!(settings.sub_steps(0.0005), (0, 0.0));
        assert_eq!(settings.sub_steps(1.0 / 60.0).0, 1);

        let settings = StepSettings {
            time_step: 0.02,
            max_sub_steps: 10,
            time_factor: 1.0,
        };
        let (n, step) = settings.sub_steps(0.05);
        assert_eq!(n, 3);
        assert!((step - 0.05 / 3.0).abs() < 1e-6);

        // Capped.
        assert_eq!(settings.sub_steps(1.0).0, 10);
        let uncapped = StepSettings {
            max_sub_steps: 0,
            ..settings
        };
        assert_eq!(uncapped.sub_steps(1.0).0, 50);

        let single = StepSettings {
            time_step: 0.0,
            ..settings
        };
        assert_eq!(single.sub_steps(0.25), (1, 0.25));

        let paused = StepSettings {
            time_factor: 0.0,
            ..settings
        };
        assert_eq!(paused.sub_steps(0.25).0, 0);
    }

    #[test]
    fn test_step_runs_sub_steps() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[3.0, 0.0, 5.0], &CrowdAgentParams::default())
            .unwrap();
        crowd.request_move_velocity(idx, &[1.0, 0.0, 0.0]).unwrap();

        let settings = StepSettings {
            time_step: 0.02,
            max_sub_steps: 10,
            time_factor: 1.0,
        };
        assert_eq!(crowd.step(&nav, 0.05, &settings), 3);
        assert!(crowd.get_agent(idx).unwrap().position()[0] > 3.0);

        let paused = StepSettings {
            time_factor: 0.0,
            ..settings
        };
        let before = *crowd.get_agent(idx).unwrap().position();
        assert_eq!(crowd.step(&nav, 0.05, &paused), 0);
        assert_eq!(crowd.get_agent(idx).unwrap().position(), &before);
    }

    #[test]
    fn test_debug_data_records_samples() {
        let nav = open_mesh(10, 10);
        let mut crowd = Crowd::new(1, 0.5).unwrap();
        let idx = crowd
            .add_agent(&nav, &[2.0, 0.0, 5.0], &CrowdAgentParams::default())
            .unwrap();
        crowd.request_move_velocity(idx, &[1.0, 0.0, 0.0]).unwrap();

        let mut debug = ObstacleAvoidanceDebugData::new(512);
        crowd.update_with_debug(&nav, 1.0 / 30.0, idx, &mut debug);
        assert!(debug.get_sample_count() > 0);
        // Pruned candidates are scored without being recorded
        assert!(debug.get_sample_count() <= crowd.get_velocity_sample_count());
    }
}
