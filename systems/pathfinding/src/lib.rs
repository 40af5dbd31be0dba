#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Shortest-path search for the Quayside harbor bot.
//!
//! Two searches share one scratch workspace: A* over plain cells for robots
//! and A* over oriented poses for ships. Paths come back reversed, with the
//! goal at index 0 and the next step at the back, so agents advance by
//! popping. Ties break on f-cost, then g-cost, then state index, making
//! every search deterministic for a given map snapshot.

pub mod queue;

use quayside_core::{Orientation, Point, ShipPose, SimError};
use quayside_world::Map;
use tracing::debug;

pub use queue::IndexedHeap;

const NO_PREDECESSOR: u32 = u32::MAX;

/// Typed failure of a single pathfinding call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathfindingFailure {
    /// Start and goal are not connected under the current overlay.
    NoPath,
    /// The node-expansion budget ran out before the goal was reached.
    OutOfBudget,
    /// The start cell is outside the grid or on impassable terrain.
    InvalidStart,
    /// The goal cell is outside the grid, impassable, or equals the start.
    InvalidGoal,
}

impl PathfindingFailure {
    /// Lifts the failure into the shared error vocabulary for logging.
    #[must_use]
    pub fn to_sim_error(self, start: Point, goal: Point) -> SimError {
        match self {
            PathfindingFailure::OutOfBudget => SimError::PathfinderBudgetExceeded { start },
            _ => SimError::PathNotFound { start, goal },
        }
    }
}

/// Priority of a frontier entry: f-cost, then g-cost, then state index.
type Cost = (u32, u32, u32);

/// Reusable A* searcher over one map's dimensions.
#[derive(Debug)]
pub struct Pathfinder {
    node_budget: usize,
    frontier: IndexedHeap<u32, Cost>,
    cells: SearchWorkspace,
    poses: SearchWorkspace,
}

impl Pathfinder {
    /// Creates a pathfinder capping every call at `node_budget` expansions.
    #[must_use]
    pub fn new(node_budget: usize) -> Self {
        Self {
            node_budget,
            frontier: IndexedHeap::new(),
            cells: SearchWorkspace::default(),
            poses: SearchWorkspace::default(),
        }
    }

    /// Finds a cost-optimal robot path from `start` to `goal`.
    ///
    /// Transient blocks are impassable, except on the goal itself: a
    /// reserved destination may still be pathed to, and the conflict
    /// resolver arbitrates the final step.
    pub fn find_path(
        &mut self,
        start: Point,
        goal: Point,
        map: &Map,
    ) -> Result<Vec<Point>, PathfindingFailure> {
        if !map.in_bounds(start) || !map.static_passable(start) {
            return Err(PathfindingFailure::InvalidStart);
        }
        if !map.in_bounds(goal) || !map.static_passable(goal) || goal == start {
            return Err(PathfindingFailure::InvalidGoal);
        }

        let cols = map.cols();
        let cell_count = (map.rows() * cols) as usize;
        self.cells.begin(cell_count);
        self.frontier.clear();

        let start_index = cell_index(start, cols);
        let goal_index = cell_index(goal, cols);
        let _ = self.cells.open(start_index, 0, NO_PREDECESSOR);
        self.frontier
            .insert(start_index, (start.manhattan(goal), 0, start_index));

        let mut expansions = 0;
        while let Some((current_index, _)) = self.frontier.pop() {
            if current_index == goal_index {
                return Ok(self.reconstruct_cells(start_index, goal_index, cols));
            }
            expansions += 1;
            if expansions > self.node_budget {
                debug!(%start, %goal, expansions, "cell search out of budget");
                return Err(PathfindingFailure::OutOfBudget);
            }

            let current = point_at(current_index, cols);
            let tentative = self.cells.g(current_index) + 1;
            for next in map.neighbors(current) {
                self.relax_cell(next, tentative, current_index, goal, cols);
            }
            // A reserved goal cell is still enterable as the final step.
            if current.manhattan(goal) == 1 && !map.passable(goal) {
                self.relax_cell(goal, tentative, current_index, goal, cols);
            }
        }

        Err(PathfindingFailure::NoPath)
    }

    /// Finds a cost-optimal ship route from `start` to the goal point.
    ///
    /// The search space is (point, heading); transitions are one cell
    /// forward or a quarter turn in place, each at unit cost. The goal is
    /// satisfied by reaching its point in any heading.
    pub fn find_ship_path(
        &mut self,
        start: ShipPose,
        goal: ShipPose,
        map: &Map,
    ) -> Result<Vec<ShipPose>, PathfindingFailure> {
        self.find_ship_path_avoiding(start, goal, map, &[])
    }

    /// Like [`Pathfinder::find_ship_path`], but keeps the route's footprint
    /// clear of the given cells; the ship controller threads a conflicting
    /// ship's footprint through here when planning a detour.
    pub fn find_ship_path_avoiding(
        &mut self,
        start: ShipPose,
        goal: ShipPose,
        map: &Map,
        blocked: &[Point],
    ) -> Result<Vec<ShipPose>, PathfindingFailure> {
        if !map.ship_passable(start) {
            return Err(PathfindingFailure::InvalidStart);
        }
        if !map.in_bounds(goal.pos()) || !map.sea_passable(goal.pos()) || goal.pos() == start.pos()
        {
            return Err(PathfindingFailure::InvalidGoal);
        }

        let cols = map.cols();
        let pose_count = (map.rows() * cols * 4) as usize;
        self.poses.begin(pose_count);
        self.frontier.clear();

        let start_index = pose_index(start, cols);
        let _ = self.poses.open(start_index, 0, NO_PREDECESSOR);
        self.frontier
            .insert(start_index, (start.pos().manhattan(goal.pos()), 0, start_index));

        let mut expansions = 0;
        while let Some((current_index, _)) = self.frontier.pop() {
            let current = pose_at(current_index, cols);
            if current.pos() == goal.pos() {
                return Ok(self.reconstruct_poses(start_index, current_index, cols));
            }
            expansions += 1;
            if expansions > self.node_budget {
                debug!(%start, %goal, expansions, "pose search out of budget");
                return Err(PathfindingFailure::OutOfBudget);
            }

            let tentative = self.poses.g(current_index) + 1;
            for next in [
                current.forward(),
                current.rotated_clockwise(),
                current.rotated_counter_clockwise(),
            ] {
                if !map.ship_passable(next)
                    || next.footprint().iter().any(|cell| blocked.contains(cell))
                {
                    continue;
                }
                let next_index = pose_index(next, cols);
                if self.poses.open(next_index, tentative, current_index) {
                    let priority = (
                        tentative + next.pos().manhattan(goal.pos()),
                        tentative,
                        next_index,
                    );
                    self.frontier.decrease_priority(next_index, priority);
                }
            }
        }

        Err(PathfindingFailure::NoPath)
    }

    fn relax_cell(&mut self, next: Point, tentative: u32, from: u32, goal: Point, cols: i32) {
        let next_index = cell_index(next, cols);
        if self.cells.open(next_index, tentative, from) {
            let priority = (tentative + next.manhattan(goal), tentative, next_index);
            self.frontier.decrease_priority(next_index, priority);
        }
    }

    fn reconstruct_cells(&self, start: u32, goal: u32, cols: i32) -> Vec<Point> {
        let mut path = Vec::new();
        let mut current = goal;
        while current != start {
            path.push(point_at(current, cols));
            current = self.cells.predecessor(current);
        }
        path
    }

    fn reconstruct_poses(&self, start: u32, goal: u32, cols: i32) -> Vec<ShipPose> {
        let mut path = Vec::new();
        let mut current = goal;
        while current != start {
            path.push(pose_at(current, cols));
            current = self.poses.predecessor(current);
        }
        path
    }
}

/// Generation-stamped scratch arrays shared across calls, so a new search
/// costs no allocation and no clearing of the previous one.
#[derive(Debug, Default)]
struct SearchWorkspace {
    g: Vec<u32>,
    came_from: Vec<u32>,
    stamp: Vec<u32>,
    generation: u32,
}

impl SearchWorkspace {
    fn begin(&mut self, len: usize) {
        if self.g.len() < len {
            self.g.resize(len, u32::MAX);
            self.came_from.resize(len, NO_PREDECESSOR);
            self.stamp.resize(len, 0);
        }
        if self.generation == u32::MAX {
            self.generation = 1;
            self.stamp.fill(0);
        } else {
            self.generation += 1;
        }
    }

    /// Records a tentative cost when it improves the node; returns whether
    /// the node should (re-)enter the frontier.
    fn open(&mut self, index: u32, g: u32, from: u32) -> bool {
        let slot = index as usize;
        if self.stamp[slot] != self.generation {
            self.stamp[slot] = self.generation;
            self.g[slot] = u32::MAX;
            self.came_from[slot] = NO_PREDECESSOR;
        }
        if g >= self.g[slot] {
            return false;
        }
        self.g[slot] = g;
        self.came_from[slot] = from;
        true
    }

    fn g(&self, index: u32) -> u32 {
        self.g[index as usize]
    }

    fn predecessor(&self, index: u32) -> u32 {
        self.came_from[index as usize]
    }
}

fn cell_index(p: Point, cols: i32) -> u32 {
    (p.row() * cols + p.col()) as u32
}

fn point_at(index: u32, cols: i32) -> Point {
    let cols = cols as u32;
    Point::new((index / cols) as i32, (index % cols) as i32)
}

fn pose_index(pose: ShipPose, cols: i32) -> u32 {
    cell_index(pose.pos(), cols) * 4 + u32::from(pose.orientation().wire_code())
}

fn pose_at(index: u32, cols: i32) -> ShipPose {
    let orientation = Orientation::ALL[(index % 4) as usize];
    ShipPose::new(point_at(index / 4, cols), orientation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_map(rows: usize, cols: usize) -> Map {
        let line = ".".repeat(cols);
        let lines: Vec<String> = (0..rows).map(|_| line.clone()).collect();
        Map::from_lines(&lines).expect("open map parses")
    }

    #[test]
    fn straight_line_path_comes_back_reversed() {
        let map = open_map(5, 5);
        let mut pathfinder = Pathfinder::new(1_000);
        let path = pathfinder
            .find_path(Point::new(2, 0), Point::new(2, 3), &map)
            .expect("open path exists");

        assert_eq!(path.first(), Some(&Point::new(2, 3)));
        assert_eq!(path.last(), Some(&Point::new(2, 1)));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn search_routes_around_walls() {
        let map = Map::from_lines(&[".#.", ".#.", "..."]).expect("map parses");
        let mut pathfinder = Pathfinder::new(1_000);
        let path = pathfinder
            .find_path(Point::new(0, 0), Point::new(0, 2), &map)
            .expect("detour exists");
        assert_eq!(path.len(), 6);
        assert!(!path.contains(&Point::new(0, 1)));
    }

    #[test]
    fn disconnected_cells_report_no_path() {
        let map = Map::from_lines(&[".#.", ".#.", ".#."]).expect("map parses");
        let mut pathfinder = Pathfinder::new(1_000);
        assert_eq!(
            pathfinder.find_path(Point::new(0, 0), Point::new(0, 2), &map),
            Err(PathfindingFailure::NoPath)
        );
    }

    #[test]
    fn budget_exhaustion_is_typed() {
        let map = open_map(20, 20);
        let mut pathfinder = Pathfinder::new(3);
        assert_eq!(
            pathfinder.find_path(Point::new(0, 0), Point::new(19, 19), &map),
            Err(PathfindingFailure::OutOfBudget)
        );
    }

    #[test]
    fn malformed_endpoints_are_rejected() {
        let map = Map::from_lines(&["..", ".*"]).expect("map parses");
        let mut pathfinder = Pathfinder::new(1_000);
        assert_eq!(
            pathfinder.find_path(Point::new(5, 5), Point::new(0, 0), &map),
            Err(PathfindingFailure::InvalidStart)
        );
        assert_eq!(
            pathfinder.find_path(Point::new(0, 0), Point::new(1, 1), &map),
            Err(PathfindingFailure::InvalidGoal)
        );
        assert_eq!(
            pathfinder.find_path(Point::new(0, 0), Point::new(0, 0), &map),
            Err(PathfindingFailure::InvalidGoal)
        );
    }

    #[test]
    fn overlay_blocks_transit_but_not_the_goal() {
        let mut map = open_map(3, 3);
        assert!(map.add_transient_block(Point::new(0, 1)));
        assert!(map.add_transient_block(Point::new(2, 2)));

        let mut pathfinder = Pathfinder::new(1_000);
        let around = pathfinder
            .find_path(Point::new(0, 0), Point::new(0, 2), &map)
            .expect("route around the reserved cell");
        assert!(!around.contains(&Point::new(0, 1)));

        let into_goal = pathfinder
            .find_path(Point::new(0, 0), Point::new(2, 2), &map)
            .expect("a reserved goal is still reachable");
        assert_eq!(into_goal.first(), Some(&Point::new(2, 2)));
    }

    #[test]
    fn repeated_searches_reuse_the_workspace_consistently() {
        let map = open_map(6, 6);
        let mut pathfinder = Pathfinder::new(1_000);
        let first = pathfinder
            .find_path(Point::new(0, 0), Point::new(5, 5), &map)
            .expect("path exists");
        let second = pathfinder
            .find_path(Point::new(0, 0), Point::new(5, 5), &map)
            .expect("path exists");
        assert_eq!(first, second);
    }

    #[test]
    fn berth_connected_cells_are_mutually_reachable() {
        use quayside_core::BerthId;

        let mut map = Map::from_lines(&[
            ".....#...",
            ".###.#.*.",
            ".#...#...",
            ".#.###.#.",
            ".........",
        ])
        .expect("map parses");
        map.compute_berth_distances(BerthId::new(0), &[Point::new(0, 0)]);

        let mut pathfinder = Pathfinder::new(10_000);
        let samples: Vec<Point> = (0..5)
            .flat_map(|row| (0..9).map(move |col| Point::new(row, col)))
            .filter(|p| map.berth_reachable(BerthId::new(0), *p))
            .collect();
        assert!(samples.len() > 10, "map should have a connected region");

        for &from in &samples {
            for &to in &samples {
                if from == to {
                    continue;
                }
                assert!(
                    pathfinder.find_path(from, to, &map).is_ok(),
                    "no path {from} -> {to} despite shared berth reachability"
                );
            }
        }
    }

    #[test]
    fn ship_route_reaches_the_goal_point_in_any_heading() {
        let lines = ["****", "****", "****"];
        let map = Map::from_lines(&lines).expect("sea parses");
        let mut pathfinder = Pathfinder::new(10_000);

        let start = ShipPose::new(Point::new(0, 0), Orientation::East);
        let goal = ShipPose::new(Point::new(2, 2), Orientation::East);
        let path = pathfinder
            .find_ship_path(start, goal, &map)
            .expect("sea route exists");

        assert_eq!(path.first().map(|pose| pose.pos()), Some(Point::new(2, 2)));
        // Replaying the route from the start only uses legal transitions.
        let mut current = start;
        for pose in path.iter().rev() {
            assert!(
                *pose == current.forward()
                    || *pose == current.rotated_clockwise()
                    || *pose == current.rotated_counter_clockwise(),
                "illegal transition {current} -> {pose}"
            );
            current = *pose;
        }
        assert_eq!(current.pos(), Point::new(2, 2));
    }

    #[test]
    fn ship_route_respects_land() {
        let map = Map::from_lines(&["***#**", "***#**", "******"]).expect("map parses");
        let mut pathfinder = Pathfinder::new(10_000);
        let start = ShipPose::new(Point::new(0, 0), Orientation::East);
        let goal = ShipPose::new(Point::new(1, 4), Orientation::East);
        let path = pathfinder
            .find_ship_path(start, goal, &map)
            .expect("route around the island");
        for pose in &path {
            assert!(map.ship_passable(*pose), "pose {pose} is grounded");
        }
    }
}
