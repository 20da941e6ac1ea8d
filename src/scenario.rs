//! The canonical four-way signalized crossing.
//!
//! Four two-lane roads meet at (50, 50); inbound lanes reach the junction
//! through a table of Bézier connectors covering every permitted turn. Two
//! anti-phased signal groups gate the approaches: group 1 holds the north
//! and east inbound lanes, group 2 the south ones.

use crate::math::Point2d;
use crate::signal::{CarSignal, SignalPhase, TrafficLightGroup};
use crate::simulation::{Direction, Simulation};
use crate::{LaneId, SignalGroupId};

/// Signal group gating the north and east approaches.
pub const GROUP_NORTH_EAST: SignalGroupId = SignalGroupId::new(1);

/// Signal group gating the south approach.
pub const GROUP_SOUTH: SignalGroupId = SignalGroupId::new(2);

/// Green duration both groups start with, in s.
const INITIAL_GREEN: f64 = 20.0;

const RED_YELLOW_TIME: f64 = 2.0;
const YELLOW_TIME: f64 = 3.0;

/// The program `[Red, RedYellow, Green, Yellow]` with the red phase sized to
/// cover the opposing group's green.
pub fn crossing_program(green: f64, opposing_green: f64) -> Vec<SignalPhase> {
    vec![
        SignalPhase {
            duration: opposing_green + RED_YELLOW_TIME + YELLOW_TIME,
            state: CarSignal::Red,
        },
        SignalPhase {
            duration: RED_YELLOW_TIME,
            state: CarSignal::RedYellow,
        },
        SignalPhase {
            duration: green,
            state: CarSignal::Green,
        },
        SignalPhase {
            duration: YELLOW_TIME,
            state: CarSignal::Yellow,
        },
    ]
}

/// The rotated complement of [`crossing_program`], green first, so the two
/// groups oppose each other from t = 0.
pub fn crossing_program_rotated(green: f64, opposing_green: f64) -> Vec<SignalPhase> {
    vec![
        SignalPhase {
            duration: green,
            state: CarSignal::Green,
        },
        SignalPhase {
            duration: YELLOW_TIME,
            state: CarSignal::Yellow,
        },
        SignalPhase {
            duration: opposing_green + RED_YELLOW_TIME + YELLOW_TIME,
            state: CarSignal::Red,
        },
        SignalPhase {
            duration: RED_YELLOW_TIME,
            state: CarSignal::RedYellow,
        },
    ]
}

/// Builds the crossing simulation.
pub fn four_way_crossing(seed: u64) -> Simulation {
    let mut sim = Simulation::new(seed);

    let (north, south, east, west);
    {
        let net = sim.network_mut();
        north = net.add_straight_road(Point2d::new(42.75, 50.0), Point2d::new(0.0, 50.0), 2, 3.5, 50.0);
        south = net.add_straight_road(Point2d::new(50.0, 57.14), Point2d::new(50.0, 100.0), 2, 3.5, 50.0);
        east = net.add_straight_road(Point2d::new(57.0, 50.0), Point2d::new(99.82, 50.0), 2, 3.5, 50.0);
        west = net.add_straight_road(Point2d::new(50.0, 42.92), Point2d::new(50.0, 0.0), 2, 3.5, 50.0);

        // Turning movements: (inbound, outbound, handle in, handle out).
        let turns: [(LaneId, LaneId, f64, f64); 17] = [
            (north.backward[0], south.forward[1], 6.0, 6.0),
            (north.backward[0], south.forward[0], 5.0, 5.0),
            (north.backward[0], east.forward[0], 7.0, 7.0),
            (north.backward[1], east.forward[1], 8.0, 8.0),
            (north.backward[1], west.forward[0], 6.0, 0.1),
            (east.backward[0], west.forward[1], 6.0, 6.0),
            (east.backward[0], west.forward[0], 5.0, 5.0),
            (east.backward[1], south.forward[1], 0.5, 0.5),
            (east.backward[1], south.forward[0], 6.0, 0.1),
            (east.backward[1], north.forward[1], 8.0, 8.0),
            (east.backward[0], north.forward[0], 7.0, 7.0),
            (south.backward[0], east.forward[1], 6.0, 6.0),
            (south.backward[0], east.forward[0], 5.0, 5.0),
            (south.backward[0], west.forward[0], 5.0, 5.0),
            (south.backward[1], north.forward[0], 5.0, 1.0),
            (south.backward[1], north.forward[1], 0.5, 0.5),
            (south.backward[1], west.forward[1], 5.0, 5.0),
        ];
        for (inbound, outbound, h_in, h_out) in turns {
            net.add_connector(inbound, outbound, h_in, h_out, 30);
        }
    }

    let group1_lanes = [
        north.backward[0],
        north.backward[1],
        east.backward[1],
        east.backward[0],
    ];
    let group2_lanes = [south.backward[0], south.backward[1]];

    let mut group1 = TrafficLightGroup::new(GROUP_NORTH_EAST, "north-east");
    group1.set_program(crossing_program(INITIAL_GREEN, INITIAL_GREEN));
    let mut group2 = TrafficLightGroup::new(GROUP_SOUTH, "south");
    group2.set_program(crossing_program_rotated(INITIAL_GREEN, INITIAL_GREEN));

    for lane in group1_lanes {
        sim.network_mut().set_signal_group(lane, GROUP_NORTH_EAST);
        group1.add_controlled_lane(lane);
    }
    for lane in group2_lanes {
        sim.network_mut().set_signal_group(lane, GROUP_SOUTH);
        group2.add_controlled_lane(lane);
    }
    sim.add_car_group(group1);
    sim.add_car_group(group2);
    sim.set_adaptive_pair(GROUP_NORTH_EAST, GROUP_SOUTH);
    sim.set_signal_probes(vec![north.backward[0], south.backward[0]]);

    for (road, build, direction) in [
        (0, &north, Direction::North),
        (1, &south, Direction::South),
        (2, &east, Direction::East),
    ] {
        for lane in &build.backward {
            sim.add_spawn_lane(*lane, direction, road);
        }
    }
    for (road, build) in [(0, &north), (1, &south), (2, &east), (3, &west)] {
        for lane in &build.forward {
            sim.add_exit_lane(*lane, road);
        }
    }

    sim
}
