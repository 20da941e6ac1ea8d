use crate::math::{
    bezier_connector, normalize_or, offset_polyline, Point2d, Polyline, Pose, Vector2d,
};
use crate::{LaneId, NodeId, SignalGroupId};
use serde::Serialize;
use smallvec::SmallVec;

/// Stop lines sit this far back from the end of a lane, in m.
const STOP_LINE_SETBACK: f64 = 2.89;

/// An endpoint of one or more lanes.
#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    pos: Point2d,
    name: String,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn pos(&self) -> Point2d {
        self.pos
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A directed channel of travel; the unit of planning and placement.
///
/// Lanes are created during network construction and immutable thereafter.
/// Connectors are lanes internal to an intersection joining an incoming lane
/// to an outgoing lane.
#[derive(Clone, Debug)]
pub struct Lane {
    id: LaneId,
    start: NodeId,
    end: NodeId,
    width: f64,
    speed_limit: f64,
    is_connector: bool,
    connector_from: Option<LaneId>,
    connector_to: Option<LaneId>,
    stop_line_s: Option<f64>,
    signal_group: Option<SignalGroupId>,
    center: Polyline,
    left: Option<LaneId>,
    right: Option<LaneId>,
    next: SmallVec<[LaneId; 4]>,
}

impl Lane {
    pub fn id(&self) -> LaneId {
        self.id
    }

    pub fn start_node(&self) -> NodeId {
        self.start
    }

    pub fn end_node(&self) -> NodeId {
        self.end
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn speed_limit(&self) -> f64 {
        self.speed_limit
    }

    pub fn is_connector(&self) -> bool {
        self.is_connector
    }

    pub fn connector_from(&self) -> Option<LaneId> {
        self.connector_from
    }

    pub fn connector_to(&self) -> Option<LaneId> {
        self.connector_to
    }

    /// Arc length of the stop line, if the lane has one.
    pub fn stop_line_s(&self) -> Option<f64> {
        self.stop_line_s
    }

    pub fn signal_group(&self) -> Option<SignalGroupId> {
        self.signal_group
    }

    pub fn center(&self) -> &Polyline {
        &self.center
    }

    pub fn length(&self) -> f64 {
        self.center.length()
    }

    /// The same-direction neighbor on the left, if any.
    pub fn left(&self) -> Option<LaneId> {
        self.left
    }

    /// The same-direction neighbor on the right, if any.
    pub fn right(&self) -> Option<LaneId> {
        self.right
    }

    /// Lanes reachable from the end of this lane.
    pub fn next(&self) -> &[LaneId] {
        &self.next
    }

    /// The pose at arc length `s` with lateral offset `d`.
    pub fn pose_at(&self, s: f64, d: f64) -> Pose {
        self.center.pose_at(s, d, 0.0)
    }
}

/// The lanes created by [`RoadNetwork::add_straight_road`], per direction.
#[derive(Clone, Debug, Default)]
pub struct RoadBuildResult {
    /// Lanes running A to B, innermost first.
    pub forward: Vec<LaneId>,
    /// Lanes running B to A, innermost first.
    pub backward: Vec<LaneId>,
    pub node_a: Option<NodeId>,
    pub node_b: Option<NodeId>,
}

/// A read-only projection of a lane for external visualizers.
#[derive(Clone, Debug, Serialize)]
pub struct LaneRender {
    pub id: LaneId,
    pub width: f64,
    pub is_connector: bool,
    pub points: Vec<Point2d>,
    pub stop_line_s: Option<f64>,
    pub signal_group: Option<SignalGroupId>,
}

/// Owns all nodes and lanes. Ids are minted monotonically from 1 and nothing
/// is ever removed during a run.
#[derive(Default)]
pub struct RoadNetwork {
    nodes: Vec<Node>,
    lanes: Vec<Lane>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, pos: Point2d, name: impl Into<String>) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32 + 1);
        self.nodes.push(Node {
            id,
            pos,
            name: name.into(),
        });
        id
    }

    /// Adds a lane with the given centerline between two existing nodes.
    ///
    /// # Panics
    /// Panics if either endpoint node does not exist; missing endpoints are a
    /// construction bug, not a runtime condition.
    pub fn add_lane(
        &mut self,
        centerline: Vec<Point2d>,
        start: NodeId,
        end: NodeId,
        width: f64,
        speed_limit: f64,
        is_connector: bool,
    ) -> LaneId {
        assert!(
            self.node(start).is_some() && self.node(end).is_some(),
            "lane endpoints must refer to existing nodes"
        );
        let id = LaneId::new(self.lanes.len() as u32 + 1);
        self.lanes.push(Lane {
            id,
            start,
            end,
            width,
            speed_limit,
            is_connector,
            connector_from: None,
            connector_to: None,
            stop_line_s: None,
            signal_group: None,
            center: Polyline::new(centerline),
            left: None,
            right: None,
            next: SmallVec::new(),
        });
        id
    }

    /// Builds a straight multi-lane road between `a` and `b`.
    ///
    /// For each index `i` a forward lane (A to B) is laid at left-offset
    /// `-(0.5 + i) * lane_width` and a backward lane (B to A) at
    /// `+(0.5 + i) * lane_width`, reversed. `left`/`right` point to the
    /// more-interior / more-exterior same-direction sibling. Every lane gets
    /// a stop line set back from its end.
    pub fn add_straight_road(
        &mut self,
        a: Point2d,
        b: Point2d,
        lanes_each_dir: usize,
        lane_width: f64,
        speed_limit: f64,
    ) -> RoadBuildResult {
        let node_a = self.add_node(a, "");
        let node_b = self.add_node(b, "");
        let axis = [a, b];

        let mut res = RoadBuildResult {
            node_a: Some(node_a),
            node_b: Some(node_b),
            ..Default::default()
        };

        for i in 0..lanes_each_dir {
            let off = (0.5 + i as f64) * lane_width;

            let pts_f = offset_polyline(&axis, -off);
            let lf = self.add_lane(pts_f, node_a, node_b, lane_width, speed_limit, false);
            res.forward.push(lf);

            let pts_b = offset_polyline(&axis, off);
            let lb = self.add_lane(
                vec![pts_b[1], pts_b[0]],
                node_b,
                node_a,
                lane_width,
                speed_limit,
                false,
            );
            res.backward.push(lb);
        }

        for i in 0..lanes_each_dir {
            let left = res.forward.get(i + 1).copied();
            let right = (i > 0).then(|| res.forward[i - 1]);
            self.set_neighbors(res.forward[i], left, right);

            let left = res.backward.get(i + 1).copied();
            let right = (i > 0).then(|| res.backward[i - 1]);
            self.set_neighbors(res.backward[i], left, right);
        }

        for id in res.forward.iter().chain(&res.backward).copied() {
            let stop_s = f64::max(0.0, self.lanes[lane_index(id)].length() - STOP_LINE_SETBACK);
            self.lanes[lane_index(id)].stop_line_s = Some(stop_s);
        }

        res
    }

    /// Joins the end of `in_lane` to the start of `out_lane` with a Bézier
    /// connector lane. Tangents are estimated with back-differences near the
    /// join; width is inherited from `in_lane` and the speed limit is the
    /// minimum of the two.
    pub fn add_connector(
        &mut self,
        in_lane: LaneId,
        out_lane: LaneId,
        handle_in: f64,
        handle_out: f64,
        steps: usize,
    ) -> LaneId {
        let l_in = self.lane(in_lane).expect("connector in-lane must exist");
        let l_out = self.lane(out_lane).expect("connector out-lane must exist");

        let s_in = l_in.length();
        let (p_in, _) = l_in.center.sample(s_in);
        let (p_in_prev, _) = l_in.center.sample(f64::max(0.0, s_in - 0.5));
        let t_in = normalize_or(p_in - p_in_prev, Vector2d::new(1.0, 0.0));

        let (p_out, _) = l_out.center.sample(0.0);
        let (_, t_out) = l_out.center.sample(f64::min(0.5, l_out.length()));

        let pts = bezier_connector(p_in, t_in, p_out, t_out, handle_in, handle_out, steps);
        let width = l_in.width;
        let speed_limit = f64::min(l_in.speed_limit, l_out.speed_limit);
        let (start, end) = (l_in.end, l_out.start);

        let conn = self.add_lane(pts, start, end, width, speed_limit, true);
        self.lanes[lane_index(in_lane)].next.push(conn);
        let lane = &mut self.lanes[lane_index(conn)];
        lane.next.push(out_lane);
        lane.connector_from = Some(in_lane);
        lane.connector_to = Some(out_lane);
        conn
    }

    /// Sets the same-direction neighbors of a lane.
    pub fn set_neighbors(&mut self, lane: LaneId, left: Option<LaneId>, right: Option<LaneId>) {
        let lane = &mut self.lanes[lane_index(lane)];
        lane.left = left;
        lane.right = right;
    }

    /// Places a stop line at arc length `s` and optionally binds the lane to
    /// a car signal group.
    pub fn set_stop_line(&mut self, lane: LaneId, s: f64, signal_group: Option<SignalGroupId>) {
        let lane = &mut self.lanes[lane_index(lane)];
        debug_assert!((0.0..=lane.length()).contains(&s));
        lane.stop_line_s = Some(s);
        if signal_group.is_some() {
            lane.signal_group = signal_group;
        }
    }

    /// Binds a lane to a car signal group.
    pub fn set_signal_group(&mut self, lane: LaneId, group: SignalGroupId) {
        self.lanes[lane_index(lane)].signal_group = Some(group);
    }

    pub fn lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(lane_index(id))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.get() as usize - 1)
    }

    pub fn lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// One render record per lane, in id order.
    pub fn export_lanes_for_render(&self) -> Vec<LaneRender> {
        self.lanes
            .iter()
            .map(|l| LaneRender {
                id: l.id,
                width: l.width,
                is_connector: l.is_connector,
                points: l.center.points().to_vec(),
                stop_line_s: l.stop_line_s,
                signal_group: l.signal_group,
            })
            .collect()
    }
}

fn lane_index(id: LaneId) -> usize {
    id.get() as usize - 1
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn straight_road_layout() {
        let mut net = RoadNetwork::new();
        let res = net.add_straight_road(
            Point2d::new(0.0, 0.0),
            Point2d::new(100.0, 0.0),
            2,
            3.5,
            13.9,
        );

        assert_eq!(res.forward.len(), 2);
        assert_eq!(res.backward.len(), 2);

        // Forward lanes sit right of the axis (negative y), backward left.
        let f0 = net.lane(res.forward[0]).unwrap();
        let b0 = net.lane(res.backward[0]).unwrap();
        assert_approx_eq!(f0.center().points()[0].y, -1.75);
        assert_approx_eq!(b0.center().points()[0].y, 1.75);

        // Backward lanes run B to A.
        assert_approx_eq!(b0.center().points()[0].x, 100.0);
        assert_approx_eq!(b0.center().points()[1].x, 0.0);

        // Interior lane is `left` of the outer one, and vice versa.
        let f1 = net.lane(res.forward[1]).unwrap();
        assert_eq!(f0.left(), Some(f1.id()));
        assert_eq!(f0.right(), None);
        assert_eq!(f1.right(), Some(f0.id()));
        assert_eq!(f1.left(), None);

        // Stop lines are set back from the end on every lane.
        for id in res.forward.iter().chain(&res.backward) {
            let lane = net.lane(*id).unwrap();
            assert_approx_eq!(lane.stop_line_s().unwrap(), lane.length() - 2.89);
        }
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let mut net = RoadNetwork::new();
        let res = net.add_straight_road(
            Point2d::new(0.0, 0.0),
            Point2d::new(50.0, 0.0),
            1,
            3.5,
            13.9,
        );
        assert_eq!(res.forward[0].get(), 1);
        assert_eq!(res.backward[0].get(), 2);
        assert_eq!(res.node_a.unwrap().get(), 1);
        assert_eq!(res.node_b.unwrap().get(), 2);
    }

    #[test]
    fn connector_wiring() {
        let mut net = RoadNetwork::new();
        let r1 = net.add_straight_road(
            Point2d::new(0.0, 0.0),
            Point2d::new(50.0, 0.0),
            1,
            3.5,
            13.9,
        );
        let r2 = net.add_straight_road(
            Point2d::new(60.0, 5.0),
            Point2d::new(60.0, 60.0),
            1,
            3.5,
            11.0,
        );

        let conn = net.add_connector(r1.forward[0], r2.forward[0], 6.0, 6.0, 16);
        let lane = net.lane(conn).unwrap();

        assert!(lane.is_connector());
        assert_eq!(lane.connector_from(), Some(r1.forward[0]));
        assert_eq!(lane.connector_to(), Some(r2.forward[0]));
        assert_eq!(lane.next(), &[r2.forward[0]][..]);
        assert_eq!(net.lane(r1.forward[0]).unwrap().next(), &[conn][..]);

        // Width from the in-lane, speed limit from the slower of the two.
        assert_approx_eq!(lane.width(), 3.5);
        assert_approx_eq!(lane.speed_limit(), 11.0);

        // The connector starts where the in-lane ends and ends where the
        // out-lane starts.
        let in_end = net.lane(r1.forward[0]).unwrap().center().sample(50.0).0;
        let out_start = net.lane(r2.forward[0]).unwrap().center().sample(0.0).0;
        let pts = lane.center().points();
        assert_approx_eq!(pts[0].x, in_end.x, 1e-6);
        assert_approx_eq!(pts[0].y, in_end.y, 1e-6);
        assert_approx_eq!(pts.last().unwrap().x, out_start.x, 1e-6);
        assert_approx_eq!(pts.last().unwrap().y, out_start.y, 1e-6);
    }

    #[test]
    fn render_export_projects_every_lane() {
        let mut net = RoadNetwork::new();
        let res = net.add_straight_road(
            Point2d::new(0.0, 0.0),
            Point2d::new(50.0, 0.0),
            2,
            3.5,
            13.9,
        );
        net.set_signal_group(res.forward[0], SignalGroupId::new(1));

        let export = net.export_lanes_for_render();
        assert_eq!(export.len(), 4);
        let first = &export[0];
        assert_eq!(first.id, res.forward[0]);
        assert!(!first.is_connector);
        assert_eq!(first.signal_group, Some(SignalGroupId::new(1)));
        assert!(first.stop_line_s.is_some());
    }

    #[test]
    #[should_panic(expected = "existing nodes")]
    fn add_lane_requires_nodes() {
        let mut net = RoadNetwork::new();
        net.add_lane(
            vec![Point2d::new(0.0, 0.0), Point2d::new(1.0, 0.0)],
            NodeId::new(1),
            NodeId::new(2),
            3.5,
            13.9,
            false,
        );
    }
}
