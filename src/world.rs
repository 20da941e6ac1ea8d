use crate::network::RoadNetwork;
use crate::signal::{CarSignal, SignalController};
use crate::vehicle::Vehicle;
use crate::{LaneId, VehicleId};

/// Monotonically non-decreasing simulated time, advanced only by the
/// harness.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    pub now: f64,
}

/// A read-only view of the world handed to each vehicle while it updates.
///
/// The vehicle slices exclude the vehicle being updated: `before` holds
/// vehicles already updated this tick, `after` holds vehicles still carrying
/// their state from the start of the tick (readers-update-writers order).
pub struct WorldContext<'a> {
    net: &'a RoadNetwork,
    signals: &'a SignalController,
    clock: &'a Clock,
    before: &'a [Vehicle],
    after: &'a [Vehicle],
}

impl<'a> WorldContext<'a> {
    pub fn new(
        net: &'a RoadNetwork,
        signals: &'a SignalController,
        clock: &'a Clock,
        before: &'a [Vehicle],
        after: &'a [Vehicle],
    ) -> Self {
        Self {
            net,
            signals,
            clock,
            before,
            after,
        }
    }

    pub fn net(&self) -> &RoadNetwork {
        self.net
    }

    pub fn signals(&self) -> &SignalController {
        self.signals
    }

    pub fn now(&self) -> f64 {
        self.clock.now
    }

    /// All other vehicles, in insertion order.
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.before.iter().chain(self.after.iter())
    }

    /// The nearest vehicle ahead of `my_s` on the lane, with the gap to its
    /// rear. The gap is `other.s - my_s - other.bounding_radius`; only
    /// positive gaps count.
    pub fn find_leader_in_lane(&self, lane: LaneId, my_s: f64) -> Option<(&Vehicle, f64)> {
        let mut best: Option<(&Vehicle, f64)> = None;
        for other in self.vehicles() {
            if other.lane_id() != lane {
                continue;
            }
            let gap = other.s() - my_s - other.bounding_radius();
            if gap > 0.0 && best.map_or(true, |(_, g)| gap < g) {
                best = Some((other, gap));
            }
        }
        best
    }

    /// The signal state governing a lane. Lanes without a binding, and
    /// bindings to missing groups, read as `Green`; `Off` also reads as
    /// `Green`.
    pub fn car_signal_for_lane(&self, lane: LaneId) -> CarSignal {
        let state = self
            .net
            .lane(lane)
            .and_then(|l| l.signal_group())
            .and_then(|g| self.signals.car_group(g))
            .map_or(CarSignal::Green, |g| g.state());
        match state {
            CarSignal::Off => CarSignal::Green,
            other => other,
        }
    }

    /// Linear lookup of a vehicle by id.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles().find(|v| v.id() == id)
    }
}
