//! Velocity obstacle sampling for local avoidance
//!
//! Candidate velocities are scored against nearby agents (circles) and walls
//! (segments). The penalty of a candidate combines how far it strays from
//! the desired and current velocities, which side of the obstacles it
//! passes on and how soon it would hit something within the time horizon.

use recast_common::{dist_pt_seg_sqr_2d, sqr, tri_area_2d, vdist_2d, vdot_2d, vperp_2d, vsub};

pub const MAX_PATTERN_DIVS: usize = 32;
pub const MAX_PATTERN_RINGS: usize = 4;

/// Other agent as seen by the avoidance query
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObstacleCircle {
    pub p: [f32; 3],
    pub vel: [f32; 3],
    pub dvel: [f32; 3],
    pub rad: f32,
    /// Direction to the obstacle, for side selection
    pub dp: [f32; 3],
    /// Preferred passing side
    pub np: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ObstacleSegment {
    pub p: [f32; 3],
    pub q: [f32; 3],
    /// The agent stands on the segment
    pub touch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleAvoidanceParams {
    pub vel_bias: f32,
    pub weight_des_vel: f32,
    pub weight_cur_vel: f32,
    pub weight_side: f32,
    pub weight_toi: f32,
    pub horiz_time: f32,
    pub grid_size: u8,
    pub adaptive_divs: u8,
    pub adaptive_rings: u8,
    pub adaptive_depth: u8,
}

impl Default for ObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            grid_size: 33,
            adaptive_divs: 7,
            adaptive_rings: 2,
            adaptive_depth: 5,
        }
    }
}

/// One scored candidate velocity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AvoidanceSample {
    pub vel: [f32; 3],
    pub ssize: f32,
    pub pen: f32,
    pub vpen: f32,
    pub vcpen: f32,
    pub spen: f32,
    pub tpen: f32,
}

/// Records the samples of one avoidance query for inspection
#[derive(Debug, Clone, Default)]
pub struct ObstacleAvoidanceDebugData {
    samples: Vec<AvoidanceSample>,
    max_samples: usize,
}

impl ObstacleAvoidanceDebugData {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn add_sample(&mut self, sample: AvoidanceSample) {
        if self.samples.len() >= self.max_samples {
            return;
        }
        self.samples.push(sample);
    }

    /// Rescales each penalty component to `[0, 1]` over the recorded samples
    pub fn normalize_samples(&mut self) {
        normalize(&mut self.samples, |s| &mut s.pen);
        normalize(&mut self.samples, |s| &mut s.vpen);
        normalize(&mut self.samples, |s| &mut s.vcpen);
        normalize(&mut self.samples, |s| &mut s.spen);
        normalize(&mut self.samples, |s| &mut s.tpen);
    }

    pub fn get_sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn get_sample(&self, i: usize) -> Option<&AvoidanceSample> {
        self.samples.get(i)
    }

    pub fn samples(&self) -> &[AvoidanceSample] {
        &self.samples
    }
}

fn normalize(samples: &mut [AvoidanceSample], field: impl Fn(&mut AvoidanceSample) -> &mut f32) {
    let mut min_pen = f32::MAX;
    let mut max_pen = -f32::MAX;
    for s in samples.iter_mut() {
        let v = *field(s);
        min_pen = min_pen.min(v);
        max_pen = max_pen.max(v);
    }
    let range = max_pen - min_pen;
    let scale = if range > 0.001 { 1.0 / range } else { 1.0 };
    for s in samples.iter_mut() {
        let v = field(s);
        *v = ((*v - min_pen) * scale).clamp(0.0, 1.0);
    }
}

/// Sweeps circle `c0` moving with `v` against static circle `c1`, returning
/// the entry and exit times
fn sweep_circle_circle(c0: &[f32; 3], r0: f32, v: &[f32; 3], c1: &[f32; 3], r1: f32) -> Option<(f32, f32)> {
    const EPS: f32 = 0.0001;
    let s = vsub(c1, c0);
    let r = r0 + r1;
    let c = vdot_2d(&s, &s) - r * r;
    let a = vdot_2d(v, v);
    if a < EPS {
        return None;
    }
    let b = vdot_2d(v, &s);
    let d = b * b - a * c;
    if d < 0.0 {
        return None;
    }
    let a = 1.0 / a;
    let rd = d.sqrt();
    Some(((b - rd) * a, (b + rd) * a))
}

/// Time along ray `ap + u * t` where it crosses segment `bp`-`bq`
fn isect_ray_seg(ap: &[f32; 3], u: &[f32; 3], bp: &[f32; 3], bq: &[f32; 3]) -> Option<f32> {
    let v = vsub(bq, bp);
    let w = vsub(ap, bp);
    let d = vperp_2d(u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    let d = 1.0 / d;
    let t = vperp_2d(&v, &w) * d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = vperp_2d(u, &w) * d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}

fn normalize_2d(v: &mut [f32; 3]) {
    let d = (sqr(v[0]) + sqr(v[2])).sqrt();
    if d == 0.0 {
        return;
    }
    let d = 1.0 / d;
    v[0] *= d;
    v[2] *= d;
}

fn rotate_2d(v: &[f32; 3], ang: f32) -> [f32; 3] {
    let (s, c) = ang.sin_cos();
    [v[0] * c - v[2] * s, v[1], v[0] * s + v[2] * c]
}

#[derive(Debug, Clone)]
pub struct ObstacleAvoidanceQuery {
    params: ObstacleAvoidanceParams,
    inv_horiz_time: f32,
    inv_vmax: f32,
    max_circles: usize,
    circles: Vec<ObstacleCircle>,
    max_segments: usize,
    segments: Vec<ObstacleSegment>,
}

impl ObstacleAvoidanceQuery {
    pub fn new(max_circles: usize, max_segments: usize) -> Self {
        Self {
            params: ObstacleAvoidanceParams::default(),
            inv_horiz_time: 0.0,
            inv_vmax: 0.0,
            max_circles,
            circles: Vec::with_capacity(max_circles),
            max_segments,
            segments: Vec::with_capacity(max_segments),
        }
    }

    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    pub fn add_circle(&mut self, pos: &[f32; 3], rad: f32, vel: &[f32; 3], dvel: &[f32; 3]) {
        if self.circles.len() >= self.max_circles {
            return;
        }
        self.circles.push(ObstacleCircle {
            p: *pos,
            vel: *vel,
            dvel: *dvel,
            rad,
            ..Default::default()
        });
    }

    pub fn add_segment(&mut self, p: &[f32; 3], q: &[f32; 3]) {
        if self.segments.len() >= self.max_segments {
            return;
        }
        self.segments.push(ObstacleSegment {
            p: *p,
            q: *q,
            touch: false,
        });
    }

    pub fn get_obstacle_circle_count(&self) -> usize {
        self.circles.len()
    }

    pub fn get_obstacle_circle(&self, i: usize) -> Option<&ObstacleCircle> {
        self.circles.get(i)
    }

    pub fn get_obstacle_segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn get_obstacle_segment(&self, i: usize) -> Option<&ObstacleSegment> {
        self.segments.get(i)
    }

    fn prepare(&mut self, pos: &[f32; 3], dvel: &[f32; 3]) {
        let orig = [0.0; 3];
        for cir in &mut self.circles {
            let mut dp = vsub(&cir.p, pos);
            normalize_2d(&mut dp);
            dp[1] = 0.0;
            cir.dp = dp;
            let dv = vsub(&cir.dvel, dvel);

            // Pass on the side the relative desired velocity already favours.
            cir.np = if tri_area_2d(&orig, &dp, &dv) < 0.01 {
                [-dp[2], 0.0, dp[0]]
            } else {
                [dp[2], 0.0, -dp[0]]
            };
        }

        for seg in &mut self.segments {
            let (d, _) = dist_pt_seg_sqr_2d(pos, &seg.p, &seg.q);
            seg.touch = d < sqr(0.01);
        }
    }

    fn begin(&mut self, pos: &[f32; 3], vmax: f32, dvel: &[f32; 3], params: &ObstacleAvoidanceParams) {
        self.prepare(pos, dvel);
        self.params = *params;
        self.inv_horiz_time = 1.0 / params.horiz_time;
        self.inv_vmax = if vmax > 0.0 { 1.0 / vmax } else { 0.0 };
    }

    #[allow(clippy::too_many_arguments)]
    fn process_sample(
        &self,
        vcand: &[f32; 3],
        cs: f32,
        pos: &[f32; 3],
        rad: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        min_penalty: f32,
        debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> f32 {
        let params = &self.params;
        let vpen = params.weight_des_vel * (vdist_2d(vcand, dvel) * self.inv_vmax);
        let vcpen = params.weight_cur_vel * (vdist_2d(vcand, vel) * self.inv_vmax);

        // Hit time below which the candidate cannot beat the best one so far.
        let min_pen = min_penalty - vpen - vcpen;
        let t_threshold = (params.weight_toi / min_pen - 0.1) * params.horiz_time;
        if t_threshold - params.horiz_time > -f32::EPSILON {
            return min_penalty;
        }

        let mut tmin = params.horiz_time;
        let mut side = 0.0;
        let mut nside = 0;

        for cir in &self.circles {
            // Reciprocal velocity obstacle.
            let vab = [
                vcand[0] * 2.0 - vel[0] - cir.vel[0],
                0.0,
                vcand[2] * 2.0 - vel[2] - cir.vel[2],
            ];

            side += (vdot_2d(&cir.dp, &vab) * 0.5 + 0.5)
                .min(vdot_2d(&cir.np, &vab) * 2.0)
                .clamp(0.0, 1.0);
            nside += 1;

            let Some((mut htmin, htmax)) = sweep_circle_circle(pos, rad, &vab, &cir.p, cir.rad) else {
                continue;
            };

            // Overlapping, avoid harder.
            if htmin < 0.0 && htmax > 0.0 {
                htmin = -htmin * 0.5;
            }

            if htmin >= 0.0 && htmin < tmin {
                tmin = htmin;
                if tmin < t_threshold {
                    return min_penalty;
                }
            }
        }

        for seg in &self.segments {
            let mut htmin = if seg.touch {
                let sdir = vsub(&seg.q, &seg.p);
                let snorm = [-sdir[2], 0.0, sdir[0]];
                if vdot_2d(&snorm, vcand) < 0.0 {
                    continue;
                }
                0.0
            } else {
                match isect_ray_seg(pos, vcand, &seg.p, &seg.q) {
                    Some(t) => t,
                    None => continue,
                }
            };

            // Walls weigh less than agents.
            htmin *= 2.0;

            if htmin < tmin {
                tmin = htmin;
                if tmin < t_threshold {
                    return min_penalty;
                }
            }
        }

        if nside > 0 {
            side /= nside as f32;
        }

        let spen = params.weight_side * side;
        let tpen = params.weight_toi * (1.0 / (0.1 + tmin * self.inv_horiz_time));
        let penalty = vpen + vcpen + spen + tpen;

        if let Some(debug) = debug {
            debug.add_sample(AvoidanceSample {
                vel: *vcand,
                ssize: cs,
                pen: penalty,
                vpen,
                vcpen,
                spen,
                tpen,
            });
        }

        penalty
    }

    /// Scores a regular grid of candidates around the biased desired
    /// velocity. Returns the number of samples taken and the best velocity.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_velocity_grid(
        &mut self,
        pos: &[f32; 3],
        rad: f32,
        vmax: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> (usize, [f32; 3]) {
        self.begin(pos, vmax, dvel, params);
        if let Some(debug) = debug.as_deref_mut() {
            debug.reset();
        }

        let mut nvel = [0.0; 3];
        let grid_size = params.grid_size.max(2) as usize;
        let cvx = dvel[0] * params.vel_bias;
        let cvz = dvel[2] * params.vel_bias;
        let cs = vmax * 2.0 * (1.0 - params.vel_bias) / (grid_size - 1) as f32;
        let half = (grid_size - 1) as f32 * cs * 0.5;

        let mut min_penalty = f32::MAX;
        let mut ns = 0;

        for y in 0..grid_size {
            for x in 0..grid_size {
                let vcand = [cvx + x as f32 * cs - half, 0.0, cvz + y as f32 * cs - half];
                if sqr(vcand[0]) + sqr(vcand[2]) > sqr(vmax + cs / 2.0) {
                    continue;
                }

                let penalty = self.process_sample(&vcand, cs, pos, rad, vel, dvel, min_penalty, debug.as_deref_mut());
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    nvel = vcand;
                }
            }
        }

        if let Some(debug) = debug {
            debug.normalize_samples();
        }
        (ns, nvel)
    }

    /// Scores rings of candidates aligned to the desired velocity, refining
    /// around the best one `adaptive_depth` times with a halving radius.
    /// Returns the number of samples taken and the best velocity.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_velocity_adaptive(
        &mut self,
        pos: &[f32; 3],
        rad: f32,
        vmax: f32,
        vel: &[f32; 3],
        dvel: &[f32; 3],
        params: &ObstacleAvoidanceParams,
        mut debug: Option<&mut ObstacleAvoidanceDebugData>,
    ) -> (usize, [f32; 3]) {
        self.begin(pos, vmax, dvel, params);
        if let Some(debug) = debug.as_deref_mut() {
            debug.reset();
        }

        let pattern = sample_pattern(dvel, params);

        let mut cr = vmax * (1.0 - params.vel_bias);
        let mut res = [dvel[0] * params.vel_bias, 0.0, dvel[2] * params.vel_bias];
        let mut ns = 0;

        for _ in 0..params.adaptive_depth {
            let mut min_penalty = f32::MAX;
            let mut bvel = [0.0; 3];

            for pat in &pattern {
                let vcand = [res[0] + pat[0] * cr, 0.0, res[2] + pat[1] * cr];
                if sqr(vcand[0]) + sqr(vcand[2]) > sqr(vmax + 0.001) {
                    continue;
                }

                let penalty =
                    self.process_sample(&vcand, cr / 10.0, pos, rad, vel, dvel, min_penalty, debug.as_deref_mut());
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    bvel = vcand;
                }
            }

            res = bvel;
            cr *= 0.5;
        }

        if let Some(debug) = debug {
            debug.normalize_samples();
        }
        (ns, res)
    }
}

/// Unit-radius sampling pattern: the origin plus `adaptive_rings` rings of
/// `adaptive_divs` points, alternate rings rotated by half a division
fn sample_pattern(dvel: &[f32; 3], params: &ObstacleAvoidanceParams) -> Vec<[f32; 2]> {
    let nd = (params.adaptive_divs as usize).clamp(1, MAX_PATTERN_DIVS);
    let nr = (params.adaptive_rings as usize).clamp(1, MAX_PATTERN_RINGS);
    let da = (1.0 / nd as f32) * std::f32::consts::PI * 2.0;
    let (sa, ca) = da.sin_cos();

    let mut ddir0 = *dvel;
    normalize_2d(&mut ddir0);
    let ddir1 = rotate_2d(&ddir0, da * 0.5);
    let ddirs = [ddir0, ddir1];

    let mut pat: Vec<[f32; 2]> = Vec::with_capacity(nd * nr + 1);
    pat.push([0.0, 0.0]);

    for j in 0..nr {
        let r = (nr - j) as f32 / nr as f32;
        let ddir = &ddirs[j % 2];
        pat.push([ddir[0] * r, ddir[2] * r]);
        let mut last1 = pat.len() - 1;
        let mut last2 = last1;

        let mut i = 1;
        while i + 1 < nd {
            let [x1, z1] = pat[last1];
            let [x2, z2] = pat[last2];
            // Clockwise on one side, counter-clockwise on the other.
            pat.push([x1 * ca + z1 * sa, -x1 * sa + z1 * ca]);
            pat.push([x2 * ca - z2 * sa, x2 * sa + z2 * ca]);
            last1 = pat.len() - 2;
            last2 = pat.len() - 1;
            i += 2;
        }

        if nd % 2 == 0 {
            let [x2, z2] = pat[last2];
            pat.push([x2 * ca - z2 * sa, x2 * sa + z2 * ca]);
        }
    }
    pat
}
