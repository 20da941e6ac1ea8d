//! Longitudinal control: the Intelligent Driver Model and stop-line /
//! traffic-light handling with delayed signal perception.

use super::Vehicle;
use crate::network::Lane;
use crate::signal::CarSignal;
use crate::world::WorldContext;
use rand::Rng;

/// IDM free-road exponent.
const IDM_DELTA: i32 = 4;

/// Beyond this gap the road counts as empty and the speed limit governs.
const OPEN_ROAD_GAP: f64 = 200.0;

/// Distance from the stop line within which crossing traffic is scanned.
const STOP_SCAN_RANGE: f64 = 5.0;

/// A red light further than this from the stop line is not yet braked for.
const RED_BRAKE_RANGE: f64 = 5.0;

impl Vehicle {
    /// Computes the target acceleration for this tick.
    pub(super) fn target_acceleration(&mut self, world: &WorldContext, lane: &Lane) -> f64 {
        let mut v_front = self.params.desired_speed;
        let mut gap = f64::INFINITY;

        if let Some((leader, leader_gap)) = world.find_leader_in_lane(self.lane, self.s) {
            v_front = leader.v();
            gap = leader_gap;
        }

        // Crossing an intersection, or close to the stop line, widen the scan
        // to everything in view: conflicting connectors are not "in lane".
        let near_stop_line = lane
            .stop_line_s()
            .is_some_and(|stop_s| (self.s - stop_s).abs() < STOP_SCAN_RANGE);
        if lane.is_connector() || near_stop_line {
            if let Some((distance, speed)) = self.nearest_visible_vehicle(world) {
                v_front = f64::min(v_front, speed);
                gap = f64::min(gap, distance - 10.0);
            }
        }

        let v_limit = f64::min(self.params.desired_speed, lane.speed_limit());

        self.perceive_traffic_light(world, lane);
        if let (Some(stop_s), Some(signal)) = (lane.stop_line_s(), self.perceived_signal) {
            let stop_gap = stop_s - self.s - 0.5 * self.params.length;
            match signal {
                CarSignal::Red => {
                    if stop_gap < gap && stop_gap > 0.0 && stop_gap < RED_BRAKE_RANGE {
                        gap = f64::max(self.params.min_gap, stop_gap);
                        v_front = 0.0;
                    }
                }
                CarSignal::Yellow => {
                    if stop_gap < gap && stop_gap > 0.0 {
                        gap = f64::max(self.params.min_gap, stop_gap);
                        v_front = 0.5 * self.params.desired_speed;
                    }
                }
                _ => {}
            }
        }

        let mut accel = self.idm_accel(self.v, v_front, gap);

        if gap > OPEN_ROAD_GAP {
            if self.v < v_limit {
                accel = f64::max(accel, 0.2 * self.params.max_accel);
            } else if self.v > v_limit {
                accel = f64::min(accel, -0.5 * self.params.comfy_decel);
            }
        }

        accel
    }

    /// The Intelligent Driver Model acceleration toward a front object with
    /// speed `v_front` at distance `gap`.
    pub(crate) fn idm_accel(&self, v: f64, v_front: f64, gap: f64) -> f64 {
        let a = self.params.max_accel;
        let b = self.params.comfy_decel;
        let t = self.params.time_headway;
        let s0 = self.params.min_gap;
        let v0 = self.params.desired_speed;

        let gap = f64::max(0.1, gap);
        let dv = v - v_front;
        let s_star = s0 + f64::max(0.0, v * t + v * dv / (2.0 * (a * b).sqrt()));

        let term_free = 1.0 - (f64::max(0.0, v) / v0).powi(IDM_DELTA);
        let term_interact = -(s_star / gap).powi(2);
        a * (term_free + term_interact)
    }

    /// Re-samples the perceived signal with a randomized reaction delay.
    ///
    /// The first observation is adopted immediately; afterwards the driver
    /// re-samples at scheduled times, occasionally missing one entirely.
    fn perceive_traffic_light(&mut self, world: &WorldContext, lane: &Lane) {
        let real = world.car_signal_for_lane(lane.id());
        let now = world.now();

        if self.perceived_signal.is_none() {
            self.perceived_signal = Some(real);
            self.next_signal_update = now + self.reaction_delay();
            return;
        }

        if now >= self.next_signal_update {
            if self.rng.gen::<f64>() >= self.driver.miss_prob {
                self.perceived_signal = Some(real);
            }
            self.next_signal_update = now + self.reaction_delay();
        }
    }

    fn reaction_delay(&mut self) -> f64 {
        self.driver.reaction_mean + self.rng.gen_range(0.0..self.driver.reaction_jitter)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::route::RouteTracker;
    use crate::{LaneId, VehicleId};
    use assert_approx_eq::assert_approx_eq;

    fn test_vehicle() -> Vehicle {
        Vehicle::new(
            VehicleId::new(1),
            Default::default(),
            Default::default(),
            0,
            LaneId::new(1),
            0.0,
            0.0,
            RouteTracker::new(),
        )
    }

    #[test]
    fn idm_rests_at_min_gap() {
        // Standing still at exactly the minimum gap behind a standing
        // leader, the model neither accelerates nor brakes.
        let veh = test_vehicle();
        let s0 = veh.params().min_gap;
        assert_approx_eq!(veh.idm_accel(0.0, 0.0, s0), 0.0, 1e-12);
    }

    #[test]
    fn idm_free_road_approaches_desired_speed() {
        let veh = test_vehicle();
        let v0 = veh.params().desired_speed;
        // Well below the desired speed the free term dominates.
        assert!(veh.idm_accel(0.0, v0, f64::INFINITY) > 1.0);
        // At the desired speed acceleration vanishes.
        assert_approx_eq!(veh.idm_accel(v0, v0, f64::INFINITY), 0.0, 1e-9);
        // Above it, the model brakes.
        assert!(veh.idm_accel(v0 + 2.0, v0, f64::INFINITY) < 0.0);
    }

    #[test]
    fn idm_brakes_hard_when_closing() {
        let veh = test_vehicle();
        let closing = veh.idm_accel(13.0, 0.0, 4.0);
        assert!(closing < -veh.params().comfy_decel);
    }

    #[test]
    fn idm_floors_tiny_gaps() {
        let veh = test_vehicle();
        // The gap denominator is floored, so a zero gap stays finite.
        let a = veh.idm_accel(5.0, 0.0, 0.0);
        assert!(a.is_finite());
        assert!(a < 0.0);
    }

    #[test]
    fn equilibrium_gap_matches_headway() {
        // At steady following speed the IDM zero crossing sits near
        // s* / sqrt(1 - (v/v0)^4).
        let veh = test_vehicle();
        let p = veh.params();
        let v = 10.0;
        let s_star = p.min_gap + v * p.time_headway;
        let expected = s_star / (1.0 - (v / p.desired_speed).powi(4)).sqrt();

        // Find the gap where acceleration crosses zero at equal speeds.
        let mut lo = 1.0;
        let mut hi = 100.0;
        for _ in 0..64 {
            let mid = 0.5 * (lo + hi);
            if veh.idm_accel(v, v, mid) < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        assert_approx_eq!(lo, expected, 0.05);
    }
}
