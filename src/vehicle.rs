use crate::math::Pose;
use crate::network::RoadNetwork;
use crate::route::RouteTracker;
use crate::signal::CarSignal;
use crate::world::WorldContext;
use crate::{LaneId, VehicleId};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};

pub use lane_change::{LaneChangeState, YieldRequest};
use lane_change::LaneChangeRequest;

mod lane_change;
mod longitudinal;
mod perception;

/// Seed-mixing multiplier spreading consecutive vehicle ids across the seed
/// space.
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Physical and car-following parameters of a vehicle.
#[derive(Clone, Copy, Debug)]
pub struct VehicleParams {
    /// Vehicle length in m.
    pub length: f64,
    /// Vehicle width in m.
    pub width: f64,
    /// Maximum acceleration in m/s^2.
    pub max_accel: f64,
    /// Comfortable deceleration in m/s^2.
    pub comfy_decel: f64,
    /// Desired cruise speed in m/s.
    pub desired_speed: f64,
    /// Desired time headway to the leader in s.
    pub time_headway: f64,
    /// Minimum gap at standstill in m.
    pub min_gap: f64,
    /// Perception range in m.
    pub view_distance: f64,
    /// Forward field of view in radians.
    pub fov_rad: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            length: 4.4,
            width: 1.8,
            max_accel: 1.5,
            comfy_decel: 1.2,
            desired_speed: 14.0,
            time_headway: 1.5,
            min_gap: 3.0,
            view_distance: 80.0,
            fov_rad: 0.7,
        }
    }
}

/// Behavioral parameters of the driver.
#[derive(Clone, Copy, Debug)]
pub struct DriverProfile {
    /// Mean reaction time to a signal change in s.
    pub reaction_mean: f64,
    /// Uniform jitter added to the reaction time, in s.
    pub reaction_jitter: f64,
    /// Base probability of granting a yield request.
    pub politeness: f64,
    /// Probability of missing a scheduled signal re-sample.
    pub miss_prob: f64,
    /// Seconds for a full lateral transition.
    pub lane_change_duration: f64,
}

impl Default for DriverProfile {
    fn default() -> Self {
        Self {
            reaction_mean: 0.6,
            reaction_jitter: 0.3,
            politeness: 0.5,
            miss_prob: 0.05,
            lane_change_duration: 2.0,
        }
    }
}

/// Coarse classification of what the vehicle is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleMode {
    Driving,
    Braking,
    Stopped,
    LaneChanging,
}

/// A simulated vehicle.
///
/// A vehicle reads the world through [`WorldContext`] and writes only its own
/// state; influence on other vehicles flows exclusively through yield
/// requests queued on the recipient.
pub struct Vehicle {
    id: VehicleId,
    params: VehicleParams,
    driver: DriverProfile,
    rng: SmallRng,

    lane: LaneId,
    /// Arc length along the lane, in m.
    s: f64,
    /// Signed left-of-centerline offset, in m.
    d: f64,
    v: f64,
    a: f64,
    mode: VehicleMode,

    perceived_signal: Option<CarSignal>,
    next_signal_update: f64,
    time_stopped: f64,
    time_since_spawn: f64,

    route: RouteTracker,

    lc_state: LaneChangeState,
    lc_request: Option<LaneChangeRequest>,
    planning_started: Option<f64>,
    lateral_progress: f64,

    yielding_to: BTreeSet<VehicleId>,
    received_requests: BTreeMap<VehicleId, f64>,
    inbox: Vec<YieldRequest>,
}

impl Vehicle {
    pub(crate) fn new(
        id: VehicleId,
        params: VehicleParams,
        driver: DriverProfile,
        global_seed: u64,
        lane: LaneId,
        s0: f64,
        v0: f64,
        route: RouteTracker,
    ) -> Self {
        let seed = global_seed ^ id.get().wrapping_mul(SEED_MIX);
        Self {
            id,
            params,
            driver,
            rng: SmallRng::seed_from_u64(seed),
            lane,
            s: s0,
            d: 0.0,
            v: v0,
            a: 0.0,
            mode: VehicleMode::Driving,
            perceived_signal: None,
            next_signal_update: 0.0,
            time_stopped: 0.0,
            time_since_spawn: 0.0,
            route,
            lc_state: LaneChangeState::None,
            lc_request: None,
            planning_started: None,
            lateral_progress: 0.0,
            yielding_to: BTreeSet::new(),
            received_requests: BTreeMap::new(),
            inbox: Vec::new(),
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    pub fn driver(&self) -> &DriverProfile {
        &self.driver
    }

    pub fn lane_id(&self) -> LaneId {
        self.lane
    }

    pub fn s(&self) -> f64 {
        self.s
    }

    pub fn d(&self) -> f64 {
        self.d
    }

    pub fn v(&self) -> f64 {
        self.v
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn mode(&self) -> VehicleMode {
        self.mode
    }

    pub fn lc_state(&self) -> LaneChangeState {
        self.lc_state
    }

    pub fn time_stopped(&self) -> f64 {
        self.time_stopped
    }

    pub fn route(&self) -> &RouteTracker {
        &self.route
    }

    pub fn perceived_signal(&self) -> Option<CarSignal> {
        self.perceived_signal
    }

    /// The first connector lane ahead on the route, if any.
    pub fn next_connector(&self) -> Option<LaneId> {
        self.route.next_connector()
    }

    /// The vehicle's pose in world space.
    pub fn pose(&self, net: &RoadNetwork) -> Pose {
        net.lane(self.lane)
            .map_or_else(Pose::default, |lane| lane.pose_at(self.s, self.d))
    }

    /// Queues an incoming yield request; it is considered at the start of
    /// this vehicle's next update.
    pub(crate) fn push_yield_request(&mut self, request: YieldRequest) {
        self.inbox.push(request);
    }

    /// Whether this vehicle has granted a yield to `other`.
    pub fn is_yielding_to(&self, other: VehicleId) -> bool {
        self.yielding_to.contains(&other)
    }

    /// Advances the vehicle by `dt` seconds. Outgoing yield requests are
    /// appended to `outbox` for the harness to deliver.
    pub(crate) fn update(
        &mut self,
        dt: f64,
        world: &WorldContext,
        outbox: &mut Vec<YieldRequest>,
    ) {
        self.process_inbox(world);
        self.update_lane_change(dt, world, outbox);

        let lane = world.net().lane(self.lane);
        if self.is_immobilized(world) {
            self.v = 0.0;
            self.a = 0.0;
            self.mode = VehicleMode::Stopped;
        } else if let Some(lane) = lane {
            self.a = self.target_acceleration(world, lane);
            self.integrate(dt);
            if matches!(
                self.lc_state,
                LaneChangeState::Executing | LaneChangeState::Aborting
            ) {
                self.mode = VehicleMode::LaneChanging;
            }
        }

        if self.lc_state == LaneChangeState::None {
            self.advance_along_route(world.net());
        }
    }

    /// A vehicle negotiating a lane change (outside the lateral motion
    /// itself), sitting on a pending request near a stop line, or granting a
    /// yield holds still for the tick.
    fn is_immobilized(&self, world: &WorldContext) -> bool {
        if !self.yielding_to.is_empty() {
            return true;
        }
        if self.lc_request.is_none() {
            return false;
        }
        let mid_change = matches!(
            self.lc_state,
            LaneChangeState::Executing | LaneChangeState::Aborting
        );
        let near_stop_line = world
            .net()
            .lane(self.lane)
            .and_then(|lane| lane.stop_line_s())
            .is_some_and(|stop_s| stop_s - self.s < 5.0);
        !mid_change || near_stop_line
    }

    fn integrate(&mut self, dt: f64) {
        self.v = f64::max(0.0, self.v + self.a * dt);
        self.s += self.v * dt;

        if self.v < 0.2 {
            self.time_stopped += dt;
        } else {
            self.time_stopped = 0.0;
        }

        self.mode = if self.v < 0.01 {
            VehicleMode::Stopped
        } else if self.a < -0.2 {
            VehicleMode::Braking
        } else {
            VehicleMode::Driving
        };
    }

    /// Carries overshoot past the end of the lane onto the next route step.
    /// On the final step the vehicle parks at the lane end and becomes
    /// eligible for removal.
    fn advance_along_route(&mut self, net: &RoadNetwork) {
        let Some(lane) = net.lane(self.lane) else {
            return;
        };
        let mut len = lane.length();

        while self.s >= len {
            let leftover = self.s - len;
            let steps = self.route.plan().steps();
            let from = self.route.plan().start_index();
            let next_idx = steps[from.min(steps.len())..]
                .iter()
                .position(|step| step.lane == self.lane)
                .map(|offset| from + offset + 1);

            match next_idx {
                Some(next) if next < steps.len() => {
                    self.lane = steps[next].lane;
                    self.route.advance_if_entered(self.lane);
                    self.s = leftover;
                    match net.lane(self.lane) {
                        Some(lane) => len = lane.length(),
                        None => return,
                    }
                }
                _ => {
                    self.s = len;
                    self.v = 0.0;
                    self.a = 0.0;
                    return;
                }
            }
        }
    }

    /// Whether the vehicle has parked at the end of the final step of its
    /// plan; such vehicles are removed by the harness.
    pub(crate) fn is_finished(&self, net: &RoadNetwork) -> bool {
        let steps = self.route.plan().steps();
        let Some(last) = steps.last() else {
            return false;
        };
        last.lane == self.lane
            && net
                .lane(self.lane)
                .is_some_and(|lane| self.s >= lane.length())
    }
}
