#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-frame ship control: docking, loading, departure, route planning,
//! and conflict resolution over oriented two-cell footprints.
//!
//! Ships collide on rectangle overlap of their proposed footprints. The
//! lower-priority ship yields with a bounded detour: the farthest pose on
//! its route still clear of the blocker becomes a waypoint and the stretch
//! up to it is re-planned around the blocker's cells. Successful routes are
//! cached per (start pose, goal point) so recurring berth runs skip the
//! search.

use std::collections::HashMap;

use quayside_core::{Command, FrameBudget, Orientation, Point, ShipPose};
use quayside_world::{Map, Ship, ShipMission, World};
use quayside_system_pathfinding::{Pathfinder, PathfindingFailure};
use tracing::{debug, info, warn};

/// Bound on detect-resolve iterations within one frame.
const MAX_RESOLUTION_ITERATIONS: usize = 2;
/// Frames of no progress after which a moving ship discards its route.
const STALL_REPLAN_AFTER: u32 = 3;

/// Fleet-wide ship controller.
#[derive(Debug)]
pub struct ShipController {
    pathfinder: Pathfinder,
    routes: HashMap<(ShipPose, Point), Vec<ShipPose>>,
}

impl ShipController {
    /// Creates a controller whose route searches are capped at
    /// `node_budget` expansions.
    #[must_use]
    pub fn new(node_budget: usize) -> Self {
        Self {
            pathfinder: Pathfinder::new(node_budget),
            routes: HashMap::new(),
        }
    }

    /// Runs the per-frame ship stage: departures, arrivals, loading, route
    /// planning, conflict resolution, and command emission.
    pub fn run(&mut self, world: &mut World, budget: &FrameBudget, out: &mut Vec<Command>) {
        let mut departed = vec![false; world.ships.len()];
        for (index, ship) in world.ships.iter_mut().enumerate() {
            if ship.take_departure_request() {
                out.push(Command::Dept { ship: ship.id() });
                departed[index] = true;
            }
        }

        self.handle_arrivals(world, out);
        load_docked_ships(world);

        let map = &world.map;
        for (index, ship) in world.ships.iter_mut().enumerate() {
            if departed[index] {
                // The judge relocates a departing ship onto the main
                // channel; hold one frame before sailing.
                ship.hold_position();
                continue;
            }
            self.plan_route(ship, map, budget);
            ship.update_next_pose();
        }

        for _ in 0..MAX_RESOLUTION_ITERATIONS {
            let overlaps = detect_overlaps(&world.ships);
            if overlaps.is_empty() {
                break;
            }
            for (first, second) in overlaps {
                self.resolve_overlap(world, budget, first, second);
            }
        }
        if !detect_overlaps(&world.ships).is_empty() {
            warn!("ship overlaps unresolved after bounded iterations");
        }

        for ship in &world.ships {
            if let Some(command) = ship.posture_command() {
                out.push(command);
            }
        }
    }

    fn handle_arrivals(&mut self, world: &mut World, out: &mut Vec<Command>) {
        for ship in &mut world.ships {
            if !ship.reached_destination() {
                continue;
            }
            match ship.mission() {
                ShipMission::MovingToBerth => {
                    out.push(Command::Berth { ship: ship.id() });
                    ship.begin_loading();
                    debug!(ship = %ship.id(), berth = ?ship.berth(), "docked");
                }
                ShipMission::MovingToDelivery => {
                    let banked = ship.unload();
                    ship.reset_departure();
                    info!(ship = %ship.id(), banked, "cargo delivered");
                }
                _ => {}
            }
        }
    }

    fn plan_route(&mut self, ship: &mut Ship, map: &Map, budget: &FrameBudget) {
        let stalled = ship.stillness() >= STALL_REPLAN_AFTER && !ship.path().is_empty();
        if stalled {
            debug!(ship = %ship.id(), "stalled; discarding the current route");
            ship.set_path(Vec::new());
        }
        if !ship.needs_path() {
            return;
        }
        let Some(goal) = ship.destination() else {
            return;
        };
        let start = ship.pose();

        if !stalled {
            if let Some(route) = self.routes.get(&(start, goal.pos())) {
                ship.set_path(route.clone());
                return;
            }
        }
        if budget.exhausted() {
            debug!(ship = %ship.id(), "frame budget spent; ship holds");
            return;
        }

        match self.pathfinder.find_ship_path(start, goal, map) {
            Ok(route) => {
                let _ = self.routes.insert((start, goal.pos()), route.clone());
                ship.set_path(route);
            }
            Err(PathfindingFailure::OutOfBudget) => {
                debug!(ship = %ship.id(), "route search out of budget; retrying next frame");
            }
            Err(failure) => {
                warn!(ship = %ship.id(), ?failure, "no sea route; mission dropped");
                ship.reset_departure();
            }
        }
    }

    fn resolve_overlap(
        &mut self,
        world: &mut World,
        budget: &FrameBudget,
        first: usize,
        second: usize,
    ) {
        let first_wins = world.ships[first].has_priority_over(&world.ships[second]);
        let (winner, loser) = if first_wins {
            (first, second)
        } else {
            (second, first)
        };

        let loser_moving = world.ships[loser].next_pose() != world.ships[loser].pose();
        let (yielder, blocker) = if loser_moving {
            (loser, winner)
        } else {
            // The loser is pinned; the winner has to route around it.
            (winner, loser)
        };

        let blocked = blocked_cells(&world.ships[blocker]);
        let map = &world.map;
        let yielding_ship = &mut world.ships[yielder];
        if budget.exhausted() || !self.plan_detour(yielding_ship, map, &blocked) {
            // No detour: swing the hull out of the way in place, or hold.
            let swung = [
                yielding_ship.pose().rotated_clockwise(),
                yielding_ship.pose().rotated_counter_clockwise(),
            ]
            .into_iter()
            .find(|pose| {
                map.ship_passable(*pose) && !blocked.iter().any(|cell| pose.covers(*cell))
            });
            match swung {
                Some(pose) => yielding_ship.move_to_temporary_pose(pose),
                None => yielding_ship.hold_position(),
            }
        }
    }

    /// Bounded detour: pick the farthest route pose clear of the blocker,
    /// re-plan from the current pose to it around the blocked cells, and
    /// splice the stretch back onto the route. When the destination itself
    /// is covered, alternative goal orientations are tried first.
    fn plan_detour(&mut self, ship: &mut Ship, map: &Map, blocked: &[Point]) -> bool {
        let clear = |pose: &ShipPose| !blocked.iter().any(|cell| pose.covers(*cell));

        let mut waypoint = None;
        for (index, pose) in ship.path().iter().enumerate() {
            if *pose != ship.pose() && clear(pose) {
                waypoint = Some((index, *pose));
                break;
            }
        }
        if waypoint.is_none() {
            if let Some(goal) = ship.destination() {
                // Try docking the same point from another heading.
                waypoint = Orientation::ALL
                    .iter()
                    .map(|orientation| ShipPose::new(goal.pos(), *orientation))
                    .find(|pose| map.ship_passable(*pose) && clear(pose))
                    .map(|pose| (0, pose));
            }
        }
        let Some((keep, waypoint)) = waypoint else {
            return false;
        };

        match self
            .pathfinder
            .find_ship_path_avoiding(ship.pose(), waypoint, map, blocked)
        {
            Ok(detour) => {
                ship.splice_detour(keep, detour);
                ship.update_next_pose();
                true
            }
            Err(failure) => {
                debug!(ship = %ship.id(), ?failure, "detour search failed; holding");
                false
            }
        }
    }
}

fn load_docked_ships(world: &mut World) {
    for index in 0..world.ships.len() {
        let ship = &world.ships[index];
        if ship.mission() != ShipMission::Loading {
            continue;
        }
        let Some(berth) = ship.berth() else {
            continue;
        };
        let velocity = world.berths[berth.index()].loading_velocity() as usize;
        let room = world.ships[index].remaining_capacity() as usize;
        let taken = world.berths[berth.index()].take_stored(velocity.min(room));

        let fed = !taken.is_empty();
        for goods in taken {
            let value = world.goods.get(goods).map_or(0, |good| good.value());
            if world.ships[index].load_one(value) {
                world.goods.mark_shipped(goods);
            }
        }
        world.ships[index].tick_dwell(fed);
    }
}

/// Index pairs of ships whose proposed footprints overlap next frame.
fn detect_overlaps(ships: &[Ship]) -> Vec<(usize, usize)> {
    let mut overlaps = Vec::new();
    for first in 0..ships.len() {
        for second in first + 1..ships.len() {
            if ships[first]
                .next_pose()
                .overlaps(&ships[second].next_pose())
            {
                overlaps.push((first, second));
            }
        }
    }
    overlaps
}

/// Cells a conflicting ship will cover: its current and proposed
/// footprints.
fn blocked_cells(ship: &Ship) -> Vec<Point> {
    let mut cells = ship.pose().footprint().to_vec();
    for cell in ship.next_pose().footprint() {
        if !cells.contains(&cell) {
            cells.push(cell);
        }
    }
    cells
}
