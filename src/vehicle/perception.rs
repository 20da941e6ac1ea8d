//! Visibility and distance queries between vehicles.

use super::Vehicle;
use crate::math::angle_diff;
use crate::network::RoadNetwork;
use crate::world::WorldContext;
use crate::{LaneId, VehicleId};
use std::f64::consts::{PI, TAU};

/// Another vehicle as seen by an observer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct VisibleVehicle {
    pub id: VehicleId,
    /// The other vehicle's arc-length position.
    pub s: f64,
    /// The other vehicle's speed.
    pub v: f64,
    /// Clearance between bounding circles, in m.
    pub distance: f64,
}

impl Vehicle {
    /// Radius of the circle bounding the vehicle footprint.
    pub fn bounding_radius(&self) -> f64 {
        0.5 * self.params.length.hypot(self.params.width)
    }

    /// Whether `other` is within `view_dist` (grown by both bounding radii)
    /// and inside the field of view. A fov of pi or more is omnidirectional.
    pub fn can_see(
        &self,
        other: &Vehicle,
        net: &RoadNetwork,
        view_dist: f64,
        fov_rad: f64,
    ) -> bool {
        let a = self.pose(net);
        let b = other.pose(net);
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let dist = dx.hypot(dy);

        if dist > view_dist + self.bounding_radius() + other.bounding_radius() {
            return false;
        }
        if fov_rad >= PI {
            return true;
        }
        angle_diff(a.theta, dy.atan2(dx)).abs() <= 0.5 * fov_rad
    }

    /// The clearance between this vehicle's and `other`'s bounding circles;
    /// zero when they touch or overlap.
    pub fn distance_to(&self, other: &Vehicle, net: &RoadNetwork) -> f64 {
        let a = self.pose(net);
        let b = other.pose(net);
        let dist = (b.x - a.x).hypot(b.y - a.y);
        f64::max(0.0, dist - self.bounding_radius() - other.bounding_radius())
    }

    /// All vehicles on `target_lane` within view, nearest first. Lane-change
    /// perception is omnidirectional within the view distance.
    pub(crate) fn visible_vehicles_in_lane(
        &self,
        world: &WorldContext,
        target_lane: LaneId,
    ) -> Vec<VisibleVehicle> {
        let mut visible: Vec<VisibleVehicle> = world
            .vehicles()
            .filter(|other| other.id != self.id)
            .filter(|other| other.lane_id() == target_lane)
            .filter(|other| self.can_see(other, world.net(), self.params.view_distance, TAU))
            .map(|other| VisibleVehicle {
                id: other.id(),
                s: other.s(),
                v: other.v(),
                distance: self.distance_to(other, world.net()),
            })
            .collect();
        visible.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        visible
    }

    /// The nearest vehicle within the forward field of view, as
    /// `(distance, speed)`.
    pub(crate) fn nearest_visible_vehicle(&self, world: &WorldContext) -> Option<(f64, f64)> {
        world
            .vehicles()
            .filter(|other| other.id != self.id)
            .filter(|other| {
                self.can_see(other, world.net(), self.params.view_distance, self.params.fov_rad)
            })
            .map(|other| (self.distance_to(other, world.net()), other.v()))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}
