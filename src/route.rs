use crate::math::Point2d;
use crate::network::RoadNetwork;
use crate::{LaneId, NodeId};
use cgmath::MetricSpace;
use ordered_float::OrderedFloat;
use pathfinding::directed::astar::astar;
use std::collections::BTreeSet;

/// Default speed used by the A* heuristic, in m/s.
const DEFAULT_VMAX: f64 = 20.0;

/// Cost multiplier discouraging connector hops.
const CONNECTOR_PENALTY: f64 = 1.1;

/// A routing destination.
#[derive(Clone, Debug)]
pub enum Goal {
    /// Reach one specific lane.
    LaneSingle(LaneId),
    /// Reach any lane in the set.
    LaneSet(BTreeSet<LaneId>),
    /// Reach any lane ending at the node.
    NodeReach(NodeId),
}

impl Goal {
    pub fn to_lane(lane: LaneId) -> Self {
        Goal::LaneSingle(lane)
    }

    pub fn to_lane_set(lanes: impl IntoIterator<Item = LaneId>) -> Self {
        Goal::LaneSet(lanes.into_iter().collect())
    }

    pub fn to_node(node: NodeId) -> Self {
        Goal::NodeReach(node)
    }

    /// Whether standing on `at_lane` satisfies the goal.
    pub fn is_satisfied(&self, at_lane: LaneId, net: &RoadNetwork) -> bool {
        match self {
            Goal::LaneSingle(target) => at_lane == *target,
            Goal::LaneSet(set) => set.contains(&at_lane),
            Goal::NodeReach(node) => net
                .lane(at_lane)
                .is_some_and(|lane| lane.end_node() == *node),
        }
    }
}

/// One lane of a route, with connector annotations when the lane crosses an
/// intersection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteStep {
    pub lane: LaneId,
    pub connector_from: Option<LaneId>,
    pub connector_to: Option<LaneId>,
}

/// An ordered sequence of route steps with a progress cursor.
#[derive(Clone, Debug, Default)]
pub struct RoutePlan {
    steps: Vec<RouteStep>,
    start_index: usize,
}

impl RoutePlan {
    pub fn is_valid(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// The first lane at or after the cursor that is a connector.
    pub fn next_connector(&self) -> Option<LaneId> {
        self.steps[self.start_index.min(self.steps.len())..]
            .iter()
            .find(|step| step.connector_from.is_some())
            .map(|step| step.lane)
    }

    /// Bumps the cursor past consecutive steps on the given lane.
    pub fn advance_if_entered(&mut self, lane: LaneId) {
        while self
            .steps
            .get(self.start_index)
            .is_some_and(|step| step.lane == lane)
        {
            self.start_index += 1;
        }
    }
}

/// A*-based shortest path search over the lane graph.
///
/// Graph nodes are lanes; edges lead to each successor lane plus the left and
/// right neighbors (a lane change).
pub struct Pathfinder {
    vmax: f64,
}

impl Default for Pathfinder {
    fn default() -> Self {
        Self { vmax: DEFAULT_VMAX }
    }
}

impl Pathfinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the speed assumed by the heuristic.
    pub fn set_max_speed_for_heuristic(&mut self, vmax: f64) {
        self.vmax = vmax;
    }

    /// Plans a route from `start` to `goal`. Failure yields an empty,
    /// invalid plan; this is the only hot-path failure mode.
    pub fn plan(&self, net: &RoadNetwork, start: LaneId, goal: &Goal) -> RoutePlan {
        self.plan_with_cost(net, start, goal).0
    }

    /// Like [`Self::plan`], also returning the accumulated cost at the goal.
    pub fn plan_with_cost(&self, net: &RoadNetwork, start: LaneId, goal: &Goal) -> (RoutePlan, f64) {
        let result = astar(
            &start,
            |&lane| self.successors(net, lane),
            |&lane| OrderedFloat(self.heuristic(net, lane, goal)),
            |&lane| goal.is_satisfied(lane, net),
        );

        match result {
            Some((lanes, cost)) => {
                let steps = lanes
                    .into_iter()
                    .map(|id| {
                        let lane = net.lane(id);
                        RouteStep {
                            lane: id,
                            connector_from: lane.and_then(|l| l.connector_from()),
                            connector_to: lane.and_then(|l| l.connector_to()),
                        }
                    })
                    .collect();
                (
                    RoutePlan {
                        steps,
                        start_index: 0,
                    },
                    cost.into_inner(),
                )
            }
            None => (RoutePlan::default(), 0.0),
        }
    }

    fn successors(
        &self,
        net: &RoadNetwork,
        from: LaneId,
    ) -> Vec<(LaneId, OrderedFloat<f64>)> {
        let Some(lane) = net.lane(from) else {
            return vec![];
        };
        lane.next()
            .iter()
            .copied()
            .chain(lane.left())
            .chain(lane.right())
            .filter_map(|to| {
                self.edge_cost(net, from, to)
                    .map(|cost| (to, OrderedFloat(cost)))
            })
            .collect()
    }

    /// The cost of moving from `from` onto `to`: a flat width-derived cost
    /// for lane-change edges, travel time otherwise (penalised on
    /// connectors).
    pub fn edge_cost(&self, net: &RoadNetwork, from: LaneId, to: LaneId) -> Option<f64> {
        let l_from = net.lane(from)?;
        let l_to = net.lane(to)?;
        if l_from.left() == Some(to) || l_from.right() == Some(to) {
            return Some(l_to.width() / 3.0);
        }
        let mut cost = f64::max(1e-6, l_to.length() / f64::max(1.0, l_to.speed_limit()));
        if l_to.is_connector() {
            cost *= CONNECTOR_PENALTY;
        }
        Some(cost)
    }

    /// Euclidean distance from the end of `lane` to the goal's end node,
    /// scaled by the heuristic speed. Zero for unsatisfiable goal kinds.
    fn heuristic(&self, net: &RoadNetwork, lane: LaneId, goal: &Goal) -> f64 {
        let Some(p) = net
            .lane(lane)
            .and_then(|l| net.node(l.end_node()))
            .map(|n| n.pos())
        else {
            return 0.0;
        };
        let vmax = f64::max(1.0, self.vmax);

        match goal {
            Goal::LaneSingle(target) => self.lane_end_distance(net, *target, p) / vmax,
            Goal::LaneSet(set) => set
                .iter()
                .map(|&id| self.lane_end_distance(net, id, p))
                .min_by(f64::total_cmp)
                .unwrap_or(0.0)
                / vmax,
            Goal::NodeReach(node) => {
                net.node(*node).map_or(0.0, |n| n.pos().distance(p)) / vmax
            }
        }
    }

    fn lane_end_distance(&self, net: &RoadNetwork, lane: LaneId, from: Point2d) -> f64 {
        net.lane(lane)
            .and_then(|l| net.node(l.end_node()))
            .map_or(0.0, |n| n.pos().distance(from))
    }
}

/// Per-vehicle tracking of a goal and the plan toward it.
#[derive(Clone, Debug, Default)]
pub struct RouteTracker {
    goal: Option<Goal>,
    plan: RoutePlan,
}

impl RouteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the goal and plans from `start`. Returns plan validity.
    pub fn set_goal_and_plan(
        &mut self,
        net: &RoadNetwork,
        start: LaneId,
        goal: Goal,
        pf: &Pathfinder,
    ) -> bool {
        self.plan = pf.plan(net, start, &goal);
        self.goal = Some(goal);
        self.plan.is_valid()
    }

    /// Re-plans from `current_lane` with the retained goal.
    pub fn replan_from(&mut self, net: &RoadNetwork, current_lane: LaneId, pf: &Pathfinder) -> bool {
        if let Some(goal) = &self.goal {
            self.plan = pf.plan(net, current_lane, goal);
        }
        self.plan.is_valid()
    }

    pub fn plan(&self) -> &RoutePlan {
        &self.plan
    }

    pub fn goal(&self) -> Option<&Goal> {
        self.goal.as_ref()
    }

    pub fn next_connector(&self) -> Option<LaneId> {
        self.plan.next_connector()
    }

    pub fn advance_if_entered(&mut self, lane: LaneId) {
        self.plan.advance_if_entered(lane);
    }
}
