//! End-to-end driving scenarios on small purpose-built networks.

use crossway::math::Point2d;
use crossway::scenario::{self, GROUP_NORTH_EAST, GROUP_SOUTH};
use crossway::simulation::Direction;
use crossway::{
    CarSignal, DriverProfile, Goal, LaneChangeState, LaneId, SignalGroupId, SignalPhase,
    Simulation, TrafficLightGroup, VehicleParams,
};

const DT: f64 = 1.0 / 60.0;

fn run_for(sim: &mut Simulation, seconds: f64) {
    let steps = (seconds / DT).round() as usize;
    for _ in 0..steps {
        sim.update(DT);
    }
}

/// A single straight lane with no stop line and no signals.
fn open_lane_sim(length: f64, speed_limit: f64) -> (Simulation, LaneId) {
    let mut sim = Simulation::new(17);
    let net = sim.network_mut();
    let a = net.add_node(Point2d::new(0.0, 0.0), "a");
    let b = net.add_node(Point2d::new(length, 0.0), "b");
    let lane = net.add_lane(
        vec![Point2d::new(0.0, 0.0), Point2d::new(length, 0.0)],
        a,
        b,
        3.5,
        speed_limit,
        false,
    );
    (sim, lane)
}

/// A two-lane one-way road; returns (sim, outer lane, inner lane).
fn two_lane_sim(length: f64) -> (Simulation, LaneId, LaneId) {
    let mut sim = Simulation::new(23);
    let net = sim.network_mut();
    let road = net.add_straight_road(
        Point2d::new(0.0, 0.0),
        Point2d::new(length, 0.0),
        2,
        3.5,
        13.9,
    );
    (sim, road.forward[0], road.forward[1])
}

#[test]
fn free_flow_reaches_cruise_speed() {
    let (mut sim, lane) = open_lane_sim(400.0, 13.9);
    let params = VehicleParams {
        desired_speed: 14.0,
        max_accel: 1.5,
        ..Default::default()
    };
    let id = sim.add_vehicle(
        params,
        DriverProfile::default(),
        lane,
        Goal::to_lane(lane),
        0.0,
        14.0,
    );

    run_for(&mut sim, 20.0);

    let veh = sim.vehicle(id).expect("vehicle still driving");
    assert!(
        veh.v() >= 13.7 && veh.v() <= 14.0,
        "cruise speed out of band: {}",
        veh.v()
    );
    assert!(veh.s() >= 240.0, "displacement too small: {}", veh.s());
}

#[test]
fn red_light_brings_vehicle_to_rest() {
    let (mut sim, lane) = open_lane_sim(200.0, 13.9);
    let group_id = SignalGroupId::new(1);
    let stop_s = 150.0;
    sim.network_mut().set_stop_line(lane, stop_s, Some(group_id));

    let mut group = TrafficLightGroup::new(group_id, "always-red");
    group.set_program(vec![SignalPhase {
        duration: 3600.0,
        state: CarSignal::Red,
    }]);
    group.add_controlled_lane(lane);
    sim.add_car_group(group);

    let id = sim.add_vehicle(
        VehicleParams::default(),
        DriverProfile::default(),
        lane,
        Goal::to_lane(lane),
        stop_s - 60.0,
        0.0,
    );

    run_for(&mut sim, 30.0);

    let veh = sim.vehicle(id).expect("vehicle held at the line");
    assert!(veh.v() < 0.05, "still moving: {}", veh.v());
    assert!(
        veh.s() >= stop_s - 6.0 && veh.s() <= stop_s,
        "stopped outside the window: {}",
        veh.s()
    );
}

#[test]
fn follower_settles_behind_leader() {
    let (mut sim, lane) = open_lane_sim(900.0, 13.9);

    let leader_params = VehicleParams {
        desired_speed: 10.0,
        ..Default::default()
    };
    let leader = sim.add_vehicle(
        leader_params,
        DriverProfile::default(),
        lane,
        Goal::to_lane(lane),
        40.0,
        10.0,
    );

    let follower_params = VehicleParams {
        desired_speed: 15.0,
        time_headway: 1.0,
        min_gap: 3.0,
        ..Default::default()
    };
    let follower = sim.add_vehicle(
        follower_params,
        DriverProfile::default(),
        lane,
        Goal::to_lane(lane),
        0.0,
        0.0,
    );

    run_for(&mut sim, 50.0);

    let f = sim.vehicle(follower).expect("follower alive");
    assert!(sim.vehicle(leader).is_some());
    assert!(
        (f.v() - 10.0).abs() <= 0.5,
        "follower speed off leader's: {}",
        f.v()
    );

    let world = sim.world();
    let (_, gap) = world
        .find_leader_in_lane(lane, f.s())
        .expect("leader visible");
    let target = 3.0 + 10.0 * 1.0;
    assert!(
        (gap - target).abs() <= 2.0,
        "settled gap {} not near {}",
        gap,
        target
    );
}

#[test]
fn lane_change_completes_when_target_is_clear_enough() {
    let (mut sim, outer, inner) = two_lane_sim(60.0);

    // Ego needs the outer lane; a slow vehicle trails 15 m behind there.
    let ego = sim.add_vehicle(
        VehicleParams::default(),
        DriverProfile::default(),
        inner,
        Goal::to_lane(outer),
        40.0,
        0.0,
    );
    let trailing_params = VehicleParams {
        desired_speed: 5.0,
        max_accel: 0.5,
        ..Default::default()
    };
    let trailing_driver = DriverProfile {
        politeness: 1.0,
        ..Default::default()
    };
    sim.add_vehicle(
        trailing_params,
        trailing_driver,
        outer,
        Goal::to_lane(outer),
        25.0,
        0.0,
    );

    let change_started_by = 1.0 + DT;
    let deadline = change_started_by + 2.0 + 1.0;
    let mut completed_at = None;
    let mut t = 0.0;
    while t < deadline + 0.5 {
        sim.update(DT);
        t += DT;
        let veh = sim.vehicle(ego).expect("ego alive");
        if veh.lane_id() == outer && veh.lc_state() == LaneChangeState::None {
            completed_at = Some(t);
            break;
        }
    }

    let completed_at = completed_at.expect("lane change never completed");
    assert!(
        completed_at <= deadline,
        "change took too long: {completed_at}"
    );
    let veh = sim.vehicle(ego).unwrap();
    assert!(veh.d().abs() < 1e-9, "lateral offset not cleared");
}

#[test]
fn lane_change_aborts_when_target_is_blocked() {
    let (mut sim, outer, inner) = two_lane_sim(60.0);

    let ego = sim.add_vehicle(
        VehicleParams::default(),
        DriverProfile::default(),
        inner,
        Goal::to_lane(outer),
        40.0,
        0.0,
    );
    // Blocker just ahead in the target lane.
    sim.add_vehicle(
        VehicleParams::default(),
        DriverProfile::default(),
        outer,
        Goal::to_lane(outer),
        41.0,
        0.0,
    );

    let mut saw_executing = false;
    let mut saw_aborting = false;
    let mut t = 0.0;
    while t < 4.0 {
        sim.update(DT);
        t += DT;
        let veh = sim.vehicle(ego).expect("ego alive");
        match veh.lc_state() {
            LaneChangeState::Executing => saw_executing = true,
            LaneChangeState::Aborting => {
                assert!(saw_executing, "aborted without executing first");
                saw_aborting = true;
            }
            LaneChangeState::None if saw_aborting => {
                assert_eq!(veh.lane_id(), inner, "abort must not switch lanes");
                return;
            }
            _ => {}
        }
    }
    panic!("abort sequence never observed (executing: {saw_executing}, aborting: {saw_aborting})");
}

#[test]
fn yield_request_is_granted_and_freezes_the_granter() {
    let (mut sim, outer, inner) = two_lane_sim(200.0);

    let ego = sim.add_vehicle(
        VehicleParams::default(),
        DriverProfile::default(),
        inner,
        Goal::to_lane(outer),
        40.0,
        0.0,
    );
    // Approaching from behind in the target lane, fast enough to make the
    // merge unsafe, polite enough to always grant.
    let granter = sim.add_vehicle(
        VehicleParams::default(),
        DriverProfile {
            politeness: 1.0,
            ..Default::default()
        },
        outer,
        Goal::to_lane(outer),
        30.0,
        2.0,
    );

    let mut saw_requesting = false;
    let mut saw_executing_after_grant = false;
    let mut t = 0.0;
    while t < 2.0 {
        sim.update(DT);
        t += DT;
        let ego_veh = sim.vehicle(ego).expect("ego alive");
        match ego_veh.lc_state() {
            LaneChangeState::Requesting => saw_requesting = true,
            LaneChangeState::Executing if saw_requesting => {
                saw_executing_after_grant = true;
                break;
            }
            _ => {}
        }
    }

    assert!(saw_requesting, "merge was never negotiated");
    assert!(saw_executing_after_grant, "grant never unlocked the change");
    let granter_veh = sim.vehicle(granter).expect("granter alive");
    assert!(granter_veh.is_yielding_to(ego));
    assert_eq!(granter_veh.v(), 0.0, "granter should hold still");
}

#[test]
fn adaptive_mode_shifts_green_toward_the_loaded_approach() {
    let mut sim = scenario::four_way_crossing(42);
    sim.set_adaptive(true);
    sim.set_direction_weight(Direction::South, 0.0);

    let green_of = |sim: &Simulation, id| {
        sim.controller()
            .car_group(id)
            .and_then(|g| g.green_duration())
            .expect("group has a green phase")
    };

    let mut g1_max = f64::NEG_INFINITY;
    let mut g2_min = f64::INFINITY;
    let mut last_spawn = 0.0;
    let mut t = 0.0;
    while t < 120.0 {
        sim.update(DT);
        t += DT;
        if t - last_spawn >= 2.0 {
            sim.add_random_vehicle();
            last_spawn = t;
        }
        let (g1, g2) = (green_of(&sim, GROUP_NORTH_EAST), green_of(&sim, GROUP_SOUTH));
        g1_max = g1_max.max(g1);
        g2_min = g2_min.min(g2);
        assert!((10.0..=40.0).contains(&g1));
        assert!((10.0..=40.0).contains(&g2));
    }

    assert!(g1_max > 20.0, "loaded approach green never grew: {g1_max}");
    assert!(g2_min < 20.0, "empty approach green never shrank: {g2_min}");
}

#[test]
fn crossing_runs_and_recycles_vehicles() {
    let mut sim = scenario::four_way_crossing(5);

    let mut spawned = 0;
    let mut removed = 0;
    let mut last_spawn = 0.0;
    let mut t = 0.0;
    while t < 90.0 {
        sim.update(DT);
        t += DT;
        if t - last_spawn >= 2.0 {
            sim.add_random_vehicle();
            last_spawn = t;
        }
        for event in sim.drain_events() {
            match event {
                crossway::SimEvent::Spawned(_) => spawned += 1,
                crossway::SimEvent::Removed(_) => removed += 1,
            }
        }
        // Core invariants hold on every tick. A lateral transition may
        // briefly overrun the lane end, so the position bound applies only
        // outside lane changes.
        for veh in sim.vehicles() {
            let lane = sim.network().lane(veh.lane_id()).expect("lane exists");
            assert!(veh.s() >= 0.0);
            assert!(veh.v() >= 0.0);
            if veh.lc_state() == LaneChangeState::None {
                assert!(veh.s() <= lane.length() + 1e-9);
            }
        }
    }

    assert!(spawned >= 10, "only {spawned} spawns in 90 s");
    assert!(removed >= 1, "no vehicle ever finished its route");
}

#[test]
fn same_seed_same_world() {
    let run = || {
        let mut sim = scenario::four_way_crossing(99);
        let mut last_spawn = 0.0;
        let mut t = 0.0;
        while t < 30.0 {
            sim.update(DT);
            t += DT;
            if t - last_spawn >= 2.0 {
                sim.add_random_vehicle();
                last_spawn = t;
            }
        }
        sim.vehicles()
            .map(|v| (v.id(), v.lane_id(), v.s(), v.v()))
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}
