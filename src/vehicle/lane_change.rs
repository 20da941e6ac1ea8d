//! The cooperative lane-change protocol: a five-state FSM with merge-safety
//! checks and inter-vehicle yield negotiation.

use super::perception::VisibleVehicle;
use super::Vehicle;
use crate::math::smoothstep;
use crate::world::WorldContext;
use crate::{LaneId, VehicleId};

/// Vehicles do not plan lane changes during their first second of life.
const SPAWN_SETTLE_TIME: f64 = 1.0;

/// Remaining-distance window on the current lane that triggers a change.
const CHANGE_WINDOW: (f64, f64) = (2.0, 30.0);

/// Below this remaining distance the change becomes urgent.
const URGENT_DISTANCE: f64 = 10.0;

/// A change still unplanned after this long is forced through.
const MAX_PLANNING_TIME: f64 = 5.0;

/// How long to wait for somebody to yield.
const REQUEST_TIMEOUT: f64 = 8.0;

/// Received requests older than this are purged.
const REQUEST_RETENTION: f64 = 10.0;

/// Safety margin on the merge time-to-intercept check.
const MERGE_TIME_MARGIN: f64 = 1.2;

/// State of the lane-change protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneChangeState {
    None,
    Planning,
    Requesting,
    Executing,
    Aborting,
}

/// An intent to move onto a neighboring lane.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LaneChangeRequest {
    pub target: LaneId,
    pub requested_at: f64,
    pub urgent: bool,
}

/// A message asking another vehicle to open a merge gap. Delivered by the
/// harness into the recipient's inbox and consumed on its next update.
#[derive(Clone, Copy, Debug)]
pub struct YieldRequest {
    pub to: VehicleId,
    pub from: VehicleId,
    pub urgent: bool,
}

impl Vehicle {
    /// Runs one tick of the lane-change FSM, then yield-grant maintenance.
    pub(super) fn update_lane_change(
        &mut self,
        dt: f64,
        world: &WorldContext,
        outbox: &mut Vec<YieldRequest>,
    ) {
        self.time_since_spawn += dt;

        match self.lc_state {
            LaneChangeState::None => self.check_lane_change_requirement(world),
            LaneChangeState::Planning => self.handle_planning(world, outbox),
            LaneChangeState::Requesting => self.handle_requesting(world),
            LaneChangeState::Executing => self.execute_lane_change(dt, world),
            LaneChangeState::Aborting => self.abort_lane_change(dt),
        }

        self.update_yielding(world);
    }

    /// Enters `Planning` when the next route step is a neighbor lane and the
    /// end of the current lane is close enough to matter.
    fn check_lane_change_requirement(&mut self, world: &WorldContext) {
        if self.time_since_spawn < SPAWN_SETTLE_TIME {
            return;
        }

        let steps = self.route.plan().steps();
        let from = self.route.plan().start_index().min(steps.len());
        let Some(here) = steps[from..]
            .iter()
            .position(|step| step.lane == self.lane)
            .map(|offset| from + offset)
        else {
            return;
        };
        let Some(next) = steps.get(here + 1) else {
            return;
        };

        let Some(lane) = world.net().lane(self.lane) else {
            return;
        };
        if lane.left() != Some(next.lane) && lane.right() != Some(next.lane) {
            return;
        }

        let remaining = lane.length() - self.s;
        if remaining > CHANGE_WINDOW.0 && remaining < CHANGE_WINDOW.1 {
            self.lc_request = Some(LaneChangeRequest {
                target: next.lane,
                requested_at: world.now(),
                urgent: remaining < URGENT_DISTANCE,
            });
            self.planning_started = Some(world.now());
            self.lc_state = LaneChangeState::Planning;
        }
    }

    /// Evaluates merge safety; either begins the change or asks the target
    /// lane's occupants to yield.
    fn handle_planning(&mut self, world: &WorldContext, outbox: &mut Vec<YieldRequest>) {
        let Some(request) = self.lc_request else {
            self.lc_state = LaneChangeState::None;
            return;
        };

        let started = *self.planning_started.get_or_insert(world.now());
        if world.now() - started > MAX_PLANNING_TIME {
            self.start_execution();
            return;
        }

        let visible = self.visible_vehicles_in_lane(world, request.target);
        if visible.is_empty() || self.can_merge_safely(&visible) {
            self.start_execution();
        } else {
            outbox.extend(visible.iter().map(|v| YieldRequest {
                to: v.id,
                from: self.id,
                urgent: request.urgent,
            }));
            self.lc_state = LaneChangeState::Requesting;
        }
    }

    /// Waits for a yield grant; urgent changes proceed regardless, stale
    /// non-urgent ones give up.
    fn handle_requesting(&mut self, world: &WorldContext) {
        let Some(request) = self.lc_request else {
            self.lc_state = LaneChangeState::None;
            return;
        };

        if request.urgent || self.count_yielding(world, request.target) > 0 {
            self.start_execution();
        } else if world.now() - request.requested_at > REQUEST_TIMEOUT {
            self.lc_state = LaneChangeState::Aborting;
        }
    }

    fn start_execution(&mut self) {
        self.lc_state = LaneChangeState::Executing;
        self.lateral_progress = 0.0;
        self.planning_started = None;
    }

    /// Slides laterally toward the target lane; commits at full progress,
    /// bails out if the target lane got crowded.
    fn execute_lane_change(&mut self, dt: f64, world: &WorldContext) {
        self.lateral_progress += dt / self.driver.lane_change_duration;

        if self.lateral_progress >= 1.0 {
            self.complete_lane_change();
            return;
        }

        let t = smoothstep(self.lateral_progress);
        self.apply_lateral_offset(t);
        self.v *= 1.0 - 0.1 * t;

        if !self.lane_change_still_safe(world) {
            self.lc_state = LaneChangeState::Aborting;
        }
    }

    /// Runs the lateral motion backwards until the vehicle is centered
    /// again.
    fn abort_lane_change(&mut self, dt: f64) {
        self.lateral_progress -= dt / self.driver.lane_change_duration;

        if self.lateral_progress <= 0.0 {
            self.lateral_progress = 0.0;
            self.d = 0.0;
            self.lc_state = LaneChangeState::None;
            self.lc_request = None;
            self.planning_started = None;
        } else {
            let t = smoothstep(self.lateral_progress);
            self.apply_lateral_offset(t);
        }
    }

    fn complete_lane_change(&mut self) {
        if let Some(request) = self.lc_request.take() {
            self.lane = request.target;
        }
        self.d = 0.0;
        self.lateral_progress = 0.0;
        self.lc_state = LaneChangeState::None;
        self.planning_started = None;
        self.yielding_to.clear();
    }

    fn apply_lateral_offset(&mut self, t: f64) {
        let Some(request) = &self.lc_request else {
            return;
        };
        let target_d = if request.target > self.lane {
            -self.params.width
        } else {
            self.params.width
        };
        self.d = target_d * t;
    }

    /// A merge is safe iff every visible vehicle in the target lane is
    /// diverging, or far enough that the time to intercept comfortably
    /// exceeds the change duration.
    fn can_merge_safely(&self, visible: &[VisibleVehicle]) -> bool {
        visible.iter().all(|other| {
            let closing = if other.s >= self.s {
                self.v - other.v
            } else {
                other.v - self.v
            } + 0.1;
            if closing <= 0.0 {
                return true;
            }
            other.distance / closing > MERGE_TIME_MARGIN * self.driver.lane_change_duration
        })
    }

    /// Re-checked every executing tick: nobody in the target lane may be
    /// closer than twice the minimum gap.
    fn lane_change_still_safe(&self, world: &WorldContext) -> bool {
        let Some(request) = &self.lc_request else {
            return false;
        };
        self.visible_vehicles_in_lane(world, request.target)
            .iter()
            .all(|other| other.distance >= 2.0 * self.params.min_gap)
    }

    fn count_yielding(&self, world: &WorldContext, target_lane: LaneId) -> usize {
        self.visible_vehicles_in_lane(world, target_lane)
            .iter()
            .filter(|other| {
                world
                    .vehicle(other.id)
                    .is_some_and(|v| v.is_yielding_to(self.id))
            })
            .count()
    }

    /// Consumes queued yield requests: requests from behind (or from nearly
    /// alongside) are ignored, the rest are granted with a probability built
    /// from politeness, urgency and own speed.
    pub(super) fn process_inbox(&mut self, world: &WorldContext) {
        use rand::Rng;

        let inbox: Vec<YieldRequest> = self.inbox.drain(..).collect();
        for msg in inbox {
            let Some(requester) = world.vehicle(msg.from) else {
                continue;
            };
            if requester.s() < self.s || (requester.s() - self.s).abs() < 2.0 {
                continue;
            }

            self.received_requests.insert(msg.from, world.now());

            let mut yield_prob = self.driver.politeness;
            if msg.urgent {
                yield_prob += 0.3;
            }
            if self.v < 5.0 {
                yield_prob += 0.2;
            }

            if self.rng.gen::<f64>() < yield_prob {
                self.yielding_to.insert(msg.from);
                if self.distance_to(requester, world.net()) < 3.0 * self.params.min_gap {
                    self.a = f64::min(self.a, -self.params.comfy_decel);
                }
            }
        }
    }

    /// Drops grants whose requester has moved on (or come alongside), brakes
    /// for the rest, and purges stale received requests.
    fn update_yielding(&mut self, world: &WorldContext) {
        let grants: Vec<VehicleId> = self.yielding_to.iter().copied().collect();
        for id in grants {
            let Some(other) = world.vehicle(id) else {
                self.yielding_to.remove(&id);
                continue;
            };
            if other.s() > self.s + 10.0 || (other.s() - self.s).abs() < 3.0 {
                self.yielding_to.remove(&id);
                continue;
            }
            if self.distance_to(other, world.net()) < 2.0 * self.params.min_gap && self.v > 0.1 {
                self.a = f64::min(self.a, -0.7 * self.params.comfy_decel);
            }
        }

        let now = world.now();
        self.received_requests
            .retain(|_, received_at| now - *received_at <= REQUEST_RETENTION);
    }
}
