//! Deterministic fixed-step microscopic traffic simulation core.
//!
//! The crate advances a population of vehicles along a lane graph past
//! signalized intersections, resolving car-following (IDM), cooperative
//! lane changes and A* route planning. External collaborators feed
//! commands and consume per-tick pose streams; see the `crossway` binary
//! for the line protocol.

use serde::{Deserialize, Serialize};

pub use network::{Lane, LaneRender, Node, RoadBuildResult, RoadNetwork};
pub use route::{Goal, Pathfinder, RoutePlan, RouteStep, RouteTracker};
pub use signal::{
    CarSignal, PedPhase, PedSignal, PedestrianLight, SignalController, SignalPhase,
    TrafficLightGroup,
};
pub use simulation::{SimEvent, Simulation};
pub use vehicle::{DriverProfile, LaneChangeState, Vehicle, VehicleMode, VehicleParams};
pub use world::{Clock, WorldContext};

pub mod math;
pub mod network;
pub mod route;
pub mod scenario;
pub mod signal;
pub mod simulation;
pub mod vehicle;
pub mod world;

macro_rules! id_type {
    ($(#[$doc:meta] $name:ident($inner:ty);)*) => {
        $(
            #[$doc]
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
            pub struct $name($inner);

            impl $name {
                pub const fn new(raw: $inner) -> Self {
                    Self(raw)
                }

                /// The raw id value. Ids are minted monotonically from 1.
                pub const fn get(self) -> $inner {
                    self.0
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

id_type! {
    /// Identifies a node of the road network.
    NodeId(u32);
    /// Identifies a lane of the road network.
    LaneId(u32);
    /// Identifies a signal group or pedestrian light.
    SignalGroupId(u32);
    /// Identifies a simulated vehicle.
    VehicleId(u64);
}
