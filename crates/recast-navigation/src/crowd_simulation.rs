//! Frame driven crowd loop

use detour::NavMesh;
use detour_crowd::{Crowd, CrowdAgent, CrowdAgentParams, MoveStatus, StepSettings};
use recast_common::Result;

/// A [`Crowd`] advanced in fixed steps from variable frame times
#[derive(Debug)]
pub struct CrowdSimulation {
    crowd: Crowd,
    settings: StepSettings,
    /// Simulated seconds
    elapsed: f32,
}

impl CrowdSimulation {
    pub fn new(max_agents: usize, max_agent_radius: f32) -> Result<Self> {
        Ok(Self {
            crowd: Crowd::new(max_agents, max_agent_radius)?,
            settings: StepSettings::default(),
            elapsed: 0.0,
        })
    }

    pub fn with_settings(mut self, settings: StepSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &StepSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: StepSettings) {
        self.settings = settings;
    }

    pub fn crowd(&self) -> &Crowd {
        &self.crowd
    }

    pub fn crowd_mut(&mut self) -> &mut Crowd {
        &mut self.crowd
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn add_agent(&mut self, nav: &NavMesh, pos: &[f32; 3], params: &CrowdAgentParams) -> Result<usize> {
        self.crowd.add_agent(nav, pos, params)
    }

    pub fn remove_agent(&mut self, idx: usize) {
        self.crowd.remove_agent(idx);
    }

    pub fn agent(&self, idx: usize) -> Option<&CrowdAgent> {
        self.crowd.get_agent(idx).filter(|ag| ag.is_active())
    }

    /// Sends agent `idx` toward the navmesh point closest to `target`
    pub fn goto(&mut self, nav: &NavMesh, idx: usize, target: &[f32; 3]) -> Result<()> {
        self.crowd.request_move_to(nav, idx, target)
    }

    /// Advances by a frame of `dt` seconds. Returns the number of fixed
    /// steps taken.
    pub fn update(&mut self, nav: &NavMesh, dt: f32) -> u32 {
        let (_, step) = self.settings.sub_steps(dt);
        let steps = self.crowd.step(nav, dt, &self.settings);
        self.elapsed += steps as f32 * step;
        steps
    }

    /// No active agent is still heading somewhere
    pub fn is_settled(&self) -> bool {
        self.crowd
            .active_agents()
            .all(|(_, ag)| ag.move_status() != MoveStatus::Moving)
    }

    /// Runs frames of `frame_time` until every agent settled, at most
    /// `max_frames`. Returns whether the crowd settled.
    pub fn run_until_settled(&mut self, nav: &NavMesh, frame_time: f32, max_frames: usize) -> bool {
        for _ in 0..max_frames {
            if self.is_settled() {
                return true;
            }
            self.update(nav, frame_time);
        }
        let settled = self.is_settled();
        if !settled {
            log::debug!("crowd still moving after {} frames", max_frames);
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoloNavMeshConfig;
    use crate::solo::generate_solo_nav_mesh;
    use crate::test_geometry::flat_plane;
    use approx::assert_relative_eq;
    use detour_crowd::UpdateFlags;
    use recast_common::vdist_2d;

    fn plane_mesh() -> NavMesh {
        let (positions, indices) = flat_plane(10.0);
        generate_solo_nav_mesh(&positions, &indices, &SoloNavMeshConfig::default(), false)
            .into_result()
            .unwrap()
    }

    #[test]
    fn test_agent_walks_to_target() {
        let nav = plane_mesh();
        let mut sim = CrowdSimulation::new(4, 0.5).unwrap();
        let params = CrowdAgentParams {
            update_flags: UpdateFlags::ANTICIPATE_TURNS,
            ..Default::default()
        };
        let idx = sim.add_agent(&nav, &[1.0, 0.0, 1.0], &params).unwrap();
        assert!(sim.is_settled());

        sim.goto(&nav, idx, &[8.0, 0.0, 7.0]).unwrap();
        assert!(!sim.is_settled());
        assert!(sim.run_until_settled(&nav, 1.0 / 30.0, 600));

        let agent = sim.agent(idx).unwrap();
        assert_eq!(agent.move_status(), MoveStatus::Arrived);
        assert!(vdist_2d(agent.position(), &[8.0, 0.0, 7.0]) < 0.2);
        assert!(sim.elapsed() > 1.0);
    }

    #[test]
    fn test_frames_are_split_into_fixed_steps() {
        let nav = plane_mesh();
        let mut sim = CrowdSimulation::new(1, 0.5).unwrap().with_settings(StepSettings {
            time_step: 0.02,
            max_sub_steps: 10,
            time_factor: 1.0,
        });
        let idx = sim.add_agent(&nav, &[5.0, 0.0, 5.0], &CrowdAgentParams::default()).unwrap();
        sim.crowd_mut().request_move_velocity(idx, &[1.0, 0.0, 0.0]).unwrap();

        assert_eq!(sim.update(&nav, 0.05), 3);
        assert_relative_eq!(sim.elapsed(), 0.05, epsilon = 1e-5);
        assert!(sim.agent(idx).unwrap().position()[0] > 5.0);
    }

    #[test]
    fn test_zero_time_factor_pauses() {
        let nav = plane_mesh();
        let mut sim = CrowdSimulation::new(1, 0.5).unwrap().with_settings(StepSettings {
            time_factor: 0.0,
            ..Default::default()
        });
        let idx = sim.add_agent(&nav, &[5.0, 0.0, 5.0], &CrowdAgentParams::default()).unwrap();
        sim.crowd_mut().request_move_velocity(idx, &[1.0, 0.0, 0.0]).unwrap();
        let before = *sim.agent(idx).unwrap().position();

        assert_eq!(sim.update(&nav, 0.1), 0);
        assert_eq!(sim.agent(idx).unwrap().position(), &before);
        assert_eq!(sim.elapsed(), 0.0);

        sim.remove_agent(idx);
        assert!(sim.agent(idx).is_none());
    }
}
