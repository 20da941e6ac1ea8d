use crate::network::RoadNetwork;
use crate::route::{Goal, Pathfinder, RouteTracker};
use crate::signal::{SignalController, SignalPhase, TrafficLightGroup};
use crate::vehicle::{DriverProfile, Vehicle, VehicleParams, YieldRequest};
use crate::world::{Clock, WorldContext};
use crate::{LaneId, SignalGroupId, VehicleId};
use log::debug;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Entry lanes occupied this close to their start are not spawned into.
const SPAWN_CLEARANCE: f64 = 5.0;

/// Std deviation of the desired-speed factor of random vehicles.
const SPEED_FACTOR_STDDEV: f64 = 0.05;

/// A compass approach direction, used for spawn weighting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|d| *d == self).expect("listed")
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "n" | "north" => Ok(Direction::North),
            "s" | "south" => Ok(Direction::South),
            "e" | "east" => Ok(Direction::East),
            "w" | "west" => Ok(Direction::West),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// A lane vehicles may spawn on.
#[derive(Clone, Copy, Debug)]
struct SpawnLane {
    lane: LaneId,
    direction: Direction,
    road: usize,
}

/// A lane vehicles may be routed toward.
#[derive(Clone, Copy, Debug)]
struct ExitLane {
    lane: LaneId,
    road: usize,
}

/// A vehicle lifecycle notification, drained by the protocol driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimEvent {
    Spawned(VehicleId),
    Removed(VehicleId),
}

/// The simulation harness: exclusive owner of the network, the signal
/// controller, the clock and the vehicle population.
///
/// `update` runs one tick to completion; there is no mid-tick observation.
/// Vehicles are updated in insertion order, each seeing already-updated
/// peers' new state and not-yet-updated peers' start-of-tick state.
pub struct Simulation {
    network: RoadNetwork,
    controller: SignalController,
    clock: Clock,
    vehicles: Vec<Vehicle>,
    pathfinder: Pathfinder,

    global_seed: u64,
    rng: SmallRng,
    next_vehicle_id: u64,
    events: Vec<SimEvent>,

    adaptive: bool,
    adaptive_pair: Option<(SignalGroupId, SignalGroupId)>,
    initial_programs: Vec<(SignalGroupId, Vec<SignalPhase>)>,

    spawn_lanes: Vec<SpawnLane>,
    exit_lanes: Vec<ExitLane>,
    signal_probes: Vec<LaneId>,
    direction_weights: [f64; 4],
}

impl Simulation {
    pub fn new(seed: u64) -> Self {
        Self {
            network: RoadNetwork::new(),
            controller: SignalController::new(),
            clock: Clock::default(),
            vehicles: Vec::new(),
            pathfinder: Pathfinder::new(),
            global_seed: seed,
            rng: SmallRng::seed_from_u64(seed),
            next_vehicle_id: 1,
            events: Vec::new(),
            adaptive: false,
            adaptive_pair: None,
            initial_programs: Vec::new(),
            spawn_lanes: Vec::new(),
            exit_lanes: Vec::new(),
            signal_probes: Vec::new(),
            direction_weights: [1.0; 4],
        }
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut RoadNetwork {
        &mut self.network
    }

    pub fn controller(&self) -> &SignalController {
        &self.controller
    }

    pub fn pathfinder(&self) -> &Pathfinder {
        &self.pathfinder
    }

    pub fn time(&self) -> f64 {
        self.clock.now
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id() == id)
    }

    /// A read view of the whole world between ticks.
    pub fn world(&self) -> WorldContext<'_> {
        WorldContext::new(
            &self.network,
            &self.controller,
            &self.clock,
            &self.vehicles,
            &[],
        )
    }

    /// Registers a signal group, remembering its program so `reset` can
    /// restore it.
    pub fn add_car_group(&mut self, group: TrafficLightGroup) {
        self.initial_programs
            .push((group.id(), group.program().to_vec()));
        self.controller.add_car_group(group);
    }

    pub fn controller_mut(&mut self) -> &mut SignalController {
        &mut self.controller
    }

    /// Marks two opposing signal groups as the adaptive pair.
    pub fn set_adaptive_pair(&mut self, g1: SignalGroupId, g2: SignalGroupId) {
        self.adaptive_pair = Some((g1, g2));
    }

    pub fn set_adaptive(&mut self, on: bool) {
        self.adaptive = on;
    }

    pub fn adaptive(&self) -> bool {
        self.adaptive
    }

    /// Registers an entry lane for random spawning.
    pub fn add_spawn_lane(&mut self, lane: LaneId, direction: Direction, road: usize) {
        self.spawn_lanes.push(SpawnLane {
            lane,
            direction,
            road,
        });
    }

    /// Registers a lane random routes may end on. Exits sharing a road with
    /// the chosen entry are never used (U-turn elimination).
    pub fn add_exit_lane(&mut self, lane: LaneId, road: usize) {
        self.exit_lanes.push(ExitLane { lane, road });
    }

    /// Lanes whose signal state the protocol driver reports, one per group.
    pub fn set_signal_probes(&mut self, lanes: Vec<LaneId>) {
        self.signal_probes = lanes;
    }

    pub fn signal_probes(&self) -> &[LaneId] {
        &self.signal_probes
    }

    pub fn set_direction_weight(&mut self, direction: Direction, weight: f64) {
        self.direction_weights[direction.index()] = f64::max(0.0, weight);
    }

    /// Drains queued lifecycle events.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advances the simulation by `dt` seconds. Always runs to completion;
    /// clamping `dt` to a stable step is the caller's job.
    pub fn update(&mut self, dt: f64) {
        self.clock.now += dt;

        if self.adaptive {
            self.apply_adaptive();
        }
        self.controller.update(dt);

        let mut outbox: Vec<YieldRequest> = Vec::new();
        for i in 0..self.vehicles.len() {
            let (before, rest) = self.vehicles.split_at_mut(i);
            let (veh, after) = rest.split_first_mut().expect("index in range");
            {
                let world =
                    WorldContext::new(&self.network, &self.controller, &self.clock, before, after);
                veh.update(dt, &world, &mut outbox);
            }
            for msg in outbox.drain(..) {
                if let Some(recipient) = self.vehicles.iter_mut().find(|v| v.id() == msg.to) {
                    recipient.push_yield_request(msg);
                }
            }
        }

        self.remove_finished();
    }

    /// Adds a vehicle with an explicit goal. The route is planned once; an
    /// unreachable goal leaves the vehicle with an empty plan, parked at its
    /// lane end forever.
    pub fn add_vehicle(
        &mut self,
        params: VehicleParams,
        driver: DriverProfile,
        lane: LaneId,
        goal: Goal,
        s0: f64,
        v0: f64,
    ) -> VehicleId {
        let mut route = RouteTracker::new();
        route.set_goal_and_plan(&self.network, lane, goal, &self.pathfinder);
        self.spawn(params, driver, lane, s0, v0, route)
    }

    /// Spawns a vehicle on a weighted random free entry lane, routed to a
    /// random exit off its own road. Returns `None` when all entries are
    /// occupied or no route exists (the spawn is simply skipped).
    pub fn add_random_vehicle(&mut self) -> Option<VehicleId> {
        let free: Vec<SpawnLane> = self
            .spawn_lanes
            .iter()
            .filter(|sl| {
                !self
                    .vehicles
                    .iter()
                    .any(|v| v.lane_id() == sl.lane && v.s() < SPAWN_CLEARANCE)
            })
            .copied()
            .collect();
        if free.is_empty() {
            return None;
        }

        let weights: Vec<f64> = free
            .iter()
            .map(|sl| self.direction_weights[sl.direction.index()])
            .collect();
        let picker = WeightedIndex::new(&weights).ok()?;
        let entry = free[picker.sample(&mut self.rng)];

        let exits: Vec<LaneId> = self
            .exit_lanes
            .iter()
            .filter(|exit| exit.road != entry.road)
            .map(|exit| exit.lane)
            .collect();
        if exits.is_empty() {
            return None;
        }
        let goal_lane = exits[self.rng.gen_range(0..exits.len())];

        let mut route = RouteTracker::new();
        if !route.set_goal_and_plan(
            &self.network,
            entry.lane,
            Goal::to_lane(goal_lane),
            &self.pathfinder,
        ) {
            debug!(
                "spawn skipped: no route from lane {} to lane {}",
                entry.lane, goal_lane
            );
            return None;
        }

        let mut params = VehicleParams::default();
        let factor = rand_distr::Normal::new(1.0, SPEED_FACTOR_STDDEV)
            .expect("valid distribution")
            .sample(&mut self.rng)
            .clamp(0.85, 1.15);
        params.desired_speed *= factor;

        Some(self.spawn(params, DriverProfile::default(), entry.lane, 0.0, 0.0, route))
    }

    /// Clears all vehicles, rewinds the clock and restores the signal
    /// programs.
    pub fn reset(&mut self) {
        for v in self.vehicles.drain(..) {
            self.events.push(SimEvent::Removed(v.id()));
        }
        self.clock.now = 0.0;
        for (id, program) in &self.initial_programs {
            if let Some(group) = self.controller.car_group_mut(*id) {
                group.set_program(program.clone());
            }
        }
    }

    fn spawn(
        &mut self,
        params: VehicleParams,
        driver: DriverProfile,
        lane: LaneId,
        s0: f64,
        v0: f64,
        route: RouteTracker,
    ) -> VehicleId {
        let id = VehicleId::new(self.next_vehicle_id);
        self.next_vehicle_id += 1;
        self.vehicles.push(Vehicle::new(
            id,
            params,
            driver,
            self.global_seed,
            lane,
            s0,
            v0,
            route,
        ));
        self.events.push(SimEvent::Spawned(id));
        id
    }

    /// Re-tunes the adaptive pair's green phases from their queue estimates.
    fn apply_adaptive(&mut self) {
        let Some((g1, g2)) = self.adaptive_pair else {
            return;
        };
        let q1 = self.queue_estimate(g1);
        let q2 = self.queue_estimate(g2);
        self.controller.retune_pair(g1, q1, g2, q2);
    }

    /// The number of controlled lanes with any vehicle reachable as a leader
    /// from the lane start.
    fn queue_estimate(&self, group: SignalGroupId) -> usize {
        let Some(group) = self.controller.car_group(group) else {
            return 0;
        };
        let world = self.world();
        group
            .controlled_lanes()
            .iter()
            .filter(|&&lane| world.find_leader_in_lane(lane, 0.0).is_some())
            .count()
    }

    fn remove_finished(&mut self) {
        let net = &self.network;
        let events = &mut self.events;
        self.vehicles.retain(|v| {
            if v.is_finished(net) {
                events.push(SimEvent::Removed(v.id()));
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Point2d;

    fn single_lane_sim() -> (Simulation, LaneId) {
        let mut sim = Simulation::new(1);
        let net = sim.network_mut();
        let a = net.add_node(Point2d::new(0.0, 0.0), "a");
        let b = net.add_node(Point2d::new(100.0, 0.0), "b");
        let lane = net.add_lane(
            vec![Point2d::new(0.0, 0.0), Point2d::new(100.0, 0.0)],
            a,
            b,
            3.5,
            13.9,
            false,
        );
        (sim, lane)
    }

    #[test]
    fn finished_vehicles_are_removed() {
        let (mut sim, lane) = single_lane_sim();
        let id = sim.add_vehicle(
            VehicleParams::default(),
            DriverProfile::default(),
            lane,
            Goal::to_lane(lane),
            95.0,
            13.0,
        );
        for _ in 0..120 {
            sim.update(0.1);
        }
        assert!(sim.vehicle(id).is_none());
        let events = sim.drain_events();
        assert!(events.contains(&SimEvent::Spawned(id)));
        assert!(events.contains(&SimEvent::Removed(id)));
    }

    #[test]
    fn clock_advances_by_dt() {
        let (mut sim, _) = single_lane_sim();
        sim.update(0.25);
        sim.update(0.25);
        assert!((sim.time() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn occupied_entry_lane_is_skipped() {
        let (mut sim, lane) = single_lane_sim();
        sim.add_spawn_lane(lane, Direction::North, 0);
        // No exits registered at all: spawning must fail cleanly.
        assert!(sim.add_random_vehicle().is_none());

        let mut sim2 = Simulation::new(2);
        let net = sim2.network_mut();
        let r1 = net.add_straight_road(
            Point2d::new(0.0, 0.0),
            Point2d::new(80.0, 0.0),
            1,
            3.5,
            13.9,
        );
        let r2 = net.add_straight_road(
            Point2d::new(90.0, 5.0),
            Point2d::new(90.0, 85.0),
            1,
            3.5,
            13.9,
        );
        net.add_connector(r1.forward[0], r2.forward[0], 5.0, 5.0, 16);
        sim2.add_spawn_lane(r1.forward[0], Direction::West, 0);
        sim2.add_exit_lane(r2.forward[0], 1);

        let first = sim2.add_random_vehicle();
        assert!(first.is_some());
        // The fresh vehicle sits at s = 0, blocking its entry lane.
        assert!(sim2.add_random_vehicle().is_none());
    }

    #[test]
    fn exits_on_the_entry_road_are_forbidden() {
        let mut sim = Simulation::new(3);
        let net = sim.network_mut();
        let r1 = net.add_straight_road(
            Point2d::new(0.0, 0.0),
            Point2d::new(80.0, 0.0),
            1,
            3.5,
            13.9,
        );
        sim.add_spawn_lane(r1.forward[0], Direction::North, 0);
        // The only exit shares the entry road.
        sim.add_exit_lane(r1.forward[0], 0);
        assert!(sim.add_random_vehicle().is_none());
    }

    #[test]
    fn reset_clears_vehicles_and_clock() {
        let (mut sim, lane) = single_lane_sim();
        sim.add_vehicle(
            VehicleParams::default(),
            DriverProfile::default(),
            lane,
            Goal::to_lane(lane),
            0.0,
            0.0,
        );
        sim.update(1.0);
        sim.reset();
        assert_eq!(sim.vehicles().count(), 0);
        assert_eq!(sim.time(), 0.0);
    }
}
