use crate::{LaneId, SignalGroupId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Green duration assigned to a balanced approach, in s.
const ADAPTIVE_BASE_GREEN: f64 = 20.0;

/// Seconds of green added per unit of queue imbalance.
const ADAPTIVE_GAIN: f64 = 2.0;

/// Bounds on an adaptively tuned green duration, in s.
const ADAPTIVE_GREEN_RANGE: (f64, f64) = (10.0, 40.0);

/// The state of a car signal. The integer encoding is part of the external
/// pose-stream protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarSignal {
    Red = 0,
    RedYellow = 1,
    Green = 2,
    Yellow = 3,
    /// Switched off; downstream lookups treat this as `Green`.
    Off = 4,
}

impl CarSignal {
    /// The wire encoding of the state.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// The state of a pedestrian signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PedSignal {
    DontWalk,
    Walk,
    FlashingDontWalk,
    Off,
}

/// One phase of a car signal program.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SignalPhase {
    /// Phase duration in s.
    pub duration: f64,
    pub state: CarSignal,
}

/// One phase of a pedestrian signal program.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PedPhase {
    pub duration: f64,
    pub state: PedSignal,
}

/// A set of lanes sharing a cyclic signal program.
#[derive(Clone, Debug)]
pub struct TrafficLightGroup {
    id: SignalGroupId,
    name: String,
    controlled_lanes: Vec<LaneId>,
    program: Vec<SignalPhase>,
    phase_idx: usize,
    t_in_phase: f64,
    current: CarSignal,
}

impl TrafficLightGroup {
    pub fn new(id: SignalGroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            controlled_lanes: Vec::new(),
            program: Vec::new(),
            phase_idx: 0,
            t_in_phase: 0.0,
            current: CarSignal::Red,
        }
    }

    pub fn id(&self) -> SignalGroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controlled_lanes(&self) -> &[LaneId] {
        &self.controlled_lanes
    }

    pub fn add_controlled_lane(&mut self, lane: LaneId) {
        self.controlled_lanes.push(lane);
    }

    /// Installs a program, resetting the phase index and timer.
    pub fn set_program(&mut self, phases: Vec<SignalPhase>) {
        debug_assert!(phases.iter().all(|p| p.duration > 0.0));
        self.program = phases;
        self.phase_idx = 0;
        self.t_in_phase = 0.0;
        self.current = self
            .program
            .first()
            .map_or(CarSignal::Off, |phase| phase.state);
    }

    pub fn program(&self) -> &[SignalPhase] {
        &self.program
    }

    pub fn state(&self) -> CarSignal {
        self.current
    }

    pub fn phase_index(&self) -> usize {
        self.phase_idx
    }

    pub fn time_in_phase(&self) -> f64 {
        self.t_in_phase
    }

    /// The duration of the green phase of the program, if it has one.
    /// In the canonical `[Red, RedYellow, Green, Yellow]` layout this is the
    /// phase at index 2; rotated complements are searched by state.
    pub fn green_duration(&self) -> Option<f64> {
        self.green_phase_index().map(|i| self.program[i].duration)
    }

    fn green_phase_index(&self) -> Option<usize> {
        if self.program.get(2).is_some_and(|p| p.state == CarSignal::Green) {
            return Some(2);
        }
        self.program.iter().position(|p| p.state == CarSignal::Green)
    }

    /// Rewrites the green phase duration, resetting the phase index and
    /// timer. No-op when the program has no green phase.
    pub fn retune_green(&mut self, duration: f64) {
        let Some(idx) = self.green_phase_index() else {
            return;
        };
        self.program[idx].duration = duration;
        self.phase_idx = 0;
        self.t_in_phase = 0.0;
        self.current = self.program[0].state;
    }

    /// Advances the phase timer by `dt`. An empty program forces `Red`.
    pub fn update(&mut self, dt: f64) {
        if self.program.is_empty() {
            self.current = CarSignal::Red;
            return;
        }
        self.t_in_phase += dt;
        while self.t_in_phase >= self.program[self.phase_idx].duration {
            self.t_in_phase = 0.0;
            self.phase_idx = (self.phase_idx + 1) % self.program.len();
            self.current = self.program[self.phase_idx].state;
        }
    }
}

/// A pedestrian light with its own cyclic program. Purely informational
/// markup for visualizers; it does not influence the driver model.
#[derive(Clone, Debug)]
pub struct PedestrianLight {
    id: SignalGroupId,
    name: String,
    program: Vec<PedPhase>,
    phase_idx: usize,
    t_in_phase: f64,
    current: PedSignal,
}

impl PedestrianLight {
    pub fn new(id: SignalGroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            program: Vec::new(),
            phase_idx: 0,
            t_in_phase: 0.0,
            current: PedSignal::DontWalk,
        }
    }

    pub fn id(&self) -> SignalGroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_program(&mut self, phases: Vec<PedPhase>) {
        self.program = phases;
        self.phase_idx = 0;
        self.t_in_phase = 0.0;
        self.current = self
            .program
            .first()
            .map_or(PedSignal::Off, |phase| phase.state);
    }

    pub fn state(&self) -> PedSignal {
        self.current
    }

    /// Advances the phase timer. An empty program leaves the state as is.
    pub fn update(&mut self, dt: f64) {
        if self.program.is_empty() {
            return;
        }
        self.t_in_phase += dt;
        while self.t_in_phase >= self.program[self.phase_idx].duration {
            self.t_in_phase = 0.0;
            self.phase_idx = (self.phase_idx + 1) % self.program.len();
            self.current = self.program[self.phase_idx].state;
        }
    }
}

/// Registry of all signal groups and pedestrian lights.
#[derive(Default)]
pub struct SignalController {
    car_groups: BTreeMap<SignalGroupId, TrafficLightGroup>,
    ped_lights: BTreeMap<SignalGroupId, PedestrianLight>,
}

impl SignalController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_car_group(&mut self, group: TrafficLightGroup) {
        self.car_groups.insert(group.id(), group);
    }

    pub fn add_ped_light(&mut self, light: PedestrianLight) {
        self.ped_lights.insert(light.id(), light);
    }

    pub fn car_group(&self, id: SignalGroupId) -> Option<&TrafficLightGroup> {
        self.car_groups.get(&id)
    }

    pub fn car_group_mut(&mut self, id: SignalGroupId) -> Option<&mut TrafficLightGroup> {
        self.car_groups.get_mut(&id)
    }

    pub fn ped_light(&self, id: SignalGroupId) -> Option<&PedestrianLight> {
        self.ped_lights.get(&id)
    }

    pub fn car_groups(&self) -> impl Iterator<Item = &TrafficLightGroup> {
        self.car_groups.values()
    }

    pub fn update(&mut self, dt: f64) {
        for group in self.car_groups.values_mut() {
            group.update(dt);
        }
        for light in self.ped_lights.values_mut() {
            light.update(dt);
        }
    }

    /// The green duration warranted by a queue imbalance.
    pub fn adaptive_green(my_queue: usize, other_queue: usize) -> f64 {
        let delta = my_queue as f64 - other_queue as f64;
        (ADAPTIVE_BASE_GREEN + ADAPTIVE_GAIN * delta)
            .clamp(ADAPTIVE_GREEN_RANGE.0, ADAPTIVE_GREEN_RANGE.1)
    }

    /// Re-tunes the green phases of two opposing groups from their observed
    /// queue lengths. Programs are only reassigned when a clamped duration
    /// actually changes; reassignment resets both groups so their cycles
    /// restart in opposition.
    pub fn retune_pair(
        &mut self,
        g1: SignalGroupId,
        q1: usize,
        g2: SignalGroupId,
        q2: usize,
    ) {
        let green1 = Self::adaptive_green(q1, q2);
        let green2 = Self::adaptive_green(q2, q1);

        let unchanged = |id: SignalGroupId, green: f64| {
            self.car_group(id)
                .and_then(|g| g.green_duration())
                .is_some_and(|d| (d - green).abs() < f64::EPSILON)
        };
        if unchanged(g1, green1) && unchanged(g2, green2) {
            return;
        }

        if let Some(group) = self.car_group_mut(g1) {
            group.retune_green(green1);
        }
        if let Some(group) = self.car_group_mut(g2) {
            group.retune_green(green2);
        }
    }
}
