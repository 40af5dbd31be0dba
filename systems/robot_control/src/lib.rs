#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-frame robot control: cargo pickup and drop-off, path planning, and
//! the iterative next-frame conflict resolution across the whole fleet.
//!
//! The controller runs after the scheduler. It plans a path for every robot
//! whose task lacks one, proposes each robot's next cell, then detects and
//! resolves conflicts pairwise until the proposal set is consistent (two
//! bounded iterations). Transient blocks laid during resolution persist
//! between iterations and are released when the frame's overlay scope
//! closes.

use std::collections::BTreeSet;

use quayside_core::{Command, FrameBudget, GoodsId, Orientation, Point, RobotId, SimError};
use quayside_world::{GoodsStatus, GoodsStore, OverlayScope, Robot, RobotState, World};
use quayside_system_pathfinding::Pathfinder;
use quayside_system_single_lane::{SingleLaneIndex, OPEN_GROUND};
use tracing::{debug, error, warn};

/// Bound on detect-resolve iterations within one frame.
const MAX_RESOLUTION_ITERATIONS: usize = 2;

/// Kinds of next-frame motion conflicts between robots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum ConflictKind {
    /// Both robots propose the same next cell.
    TargetOverlap,
    /// Each robot proposes the other's current cell.
    SwapPositions,
    /// Both step into opposing entries of the same free corridor.
    HeadOnAttempt,
    /// One steps into a corridor locked in the opposing direction.
    EntryWhileOccupied,
}

/// One detected conflict; ordered so resolution is deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Conflict {
    first: RobotId,
    second: RobotId,
    kind: ConflictKind,
}

/// Fleet-wide robot controller.
#[derive(Debug)]
pub struct RobotController {
    pathfinder: Pathfinder,
    wait_flags: Vec<bool>,
    replan_flags: Vec<bool>,
}

impl RobotController {
    /// Creates a controller whose pathfinding calls are capped at
    /// `node_budget` expansions.
    #[must_use]
    pub fn new(node_budget: usize) -> Self {
        Self {
            pathfinder: Pathfinder::new(node_budget),
            wait_flags: Vec::new(),
            replan_flags: Vec::new(),
        }
    }

    /// The cargo lifecycle stage: robots standing on their target good pick
    /// it up (`get`), robots standing on their target berth drop off
    /// (`pull`). Runs before the scheduler so a robot freed here is
    /// re-assigned within the same frame.
    pub fn update_cargo(&mut self, world: &mut World, out: &mut Vec<Command>) {
        for index in 0..world.robots.len() {
            let robot = &world.robots[index];
            if !robot.is_live() || robot.destination() != Some(robot.pos()) {
                continue;
            }

            match robot.state() {
                RobotState::MovingToGoods => {
                    let Some(goods) = robot.target_goods() else {
                        continue;
                    };
                    if can_pick_up(&world.goods, goods) {
                        out.push(Command::Get { robot: robot.id() });
                        world.goods.mark_carried(goods);
                        world.robots[index].complete_pickup(goods);
                    } else {
                        debug!(robot = %robot.id(), %goods, "pickup target gone; dropping task");
                        world.goods.release(goods);
                        world.robots[index].abort_task();
                    }
                }
                RobotState::MovingToBerth => {
                    let Some(berth) = robot.target_berth() else {
                        continue;
                    };
                    let Some(goods) = robot.cargo() else {
                        world.robots[index].abort_task();
                        continue;
                    };
                    if world.berth_at(robot.pos()) != Some(berth) {
                        debug!(robot = %robot.id(), %berth, "drop cell is off the berth");
                        world.robots[index].abort_task();
                        continue;
                    }
                    if world.berths[berth.index()].store(goods) {
                        out.push(Command::Pull { robot: robot.id() });
                        world.goods.mark_stored(goods, berth);
                        let _ = world.robots[index].complete_dropoff();
                    } else {
                        debug!(robot = %robot.id(), %berth, "berth full; rescheduling drop-off");
                        world.robots[index].abort_task();
                    }
                }
                _ => {}
            }
        }
    }

    /// The motion stage: plan missing paths, propose next cells, resolve
    /// conflicts, and emit `move` commands.
    pub fn run(
        &mut self,
        world: &mut World,
        lanes: &mut SingleLaneIndex,
        budget: &FrameBudget,
        out: &mut Vec<Command>,
    ) {
        let positions: Vec<(RobotId, Point)> = world
            .robots
            .iter()
            .filter(|robot| robot.is_live())
            .map(|robot| (robot.id(), robot.pos()))
            .collect();
        lanes.update_locks(&positions);

        self.wait_flags.clear();
        self.wait_flags.resize(world.robots.len(), false);
        self.replan_flags.clear();
        self.replan_flags.resize(world.robots.len(), false);

        let mut scope = OverlayScope::new(&mut world.map);
        let robots = &mut world.robots;
        let goods = &mut world.goods;

        for robot in robots.iter_mut() {
            if robot.is_live() && robot.needs_path() {
                plan_path(&mut self.pathfinder, robot, goods, &scope, budget);
            }
            robot.update_next_pos();
        }

        for _ in 0..MAX_RESOLUTION_ITERATIONS {
            let conflicts = detect_conflicts(robots, lanes);
            if conflicts.is_empty() {
                break;
            }
            self.wait_flags.iter_mut().for_each(|flag| *flag = false);
            self.replan_flags.iter_mut().for_each(|flag| *flag = false);

            for conflict in &conflicts {
                self.resolve(robots, &mut scope, lanes, *conflict);
            }

            for index in 0..robots.len() {
                if self.replan_flags[index] {
                    let robot = &mut robots[index];
                    robot.clear_path();
                    debug!(
                        robot = %robot.id(),
                        nearby = ?scope.map().nearby_transient_blocks(robot.pos(), 2),
                        "replanning around local reservations"
                    );
                    plan_path(&mut self.pathfinder, robot, goods, &scope, budget);
                    robot.update_next_pos();
                }
            }
            for index in 0..robots.len() {
                if self.wait_flags[index] {
                    robots[index].wait_in_place();
                }
            }
        }

        let leftover = detect_conflicts(robots, lanes);
        if !leftover.is_empty() {
            warn!(
                conflicts = leftover.len(),
                "conflicts unresolved after bounded iterations"
            );
        }
        drop(scope);

        for robot in world.robots.iter() {
            if !robot.is_live() || robot.next_pos() == robot.pos() {
                continue;
            }
            match Orientation::between(robot.pos(), robot.next_pos()) {
                Some(direction) => out.push(Command::Move {
                    robot: robot.id(),
                    direction,
                }),
                None => error!(
                    error = %SimError::InvalidCommand(format!(
                        "robot {} step {} -> {} is not adjacent",
                        robot.id(),
                        robot.pos(),
                        robot.next_pos()
                    )),
                    "dropping malformed move"
                ),
            }
        }
    }

    fn resolve(
        &mut self,
        robots: &mut [Robot],
        scope: &mut OverlayScope<'_>,
        lanes: &SingleLaneIndex,
        conflict: Conflict,
    ) {
        match conflict.kind {
            ConflictKind::TargetOverlap => {
                self.resolve_target_overlap(robots, scope, conflict.first, conflict.second);
            }
            ConflictKind::SwapPositions => {
                self.resolve_swap(robots, scope, lanes, conflict.first, conflict.second);
            }
            ConflictKind::HeadOnAttempt => {
                // The lower-priority robot yields at the corridor mouth.
                let loser = if robots[conflict.first.index()]
                    .has_priority_over(&robots[conflict.second.index()])
                {
                    conflict.second
                } else {
                    conflict.first
                };
                self.wait_flags[loser.index()] = true;
            }
            ConflictKind::EntryWhileOccupied => {
                // An earlier resolution may already have redirected the
                // robot; only hold it if it still charges the locked lane.
                let robot = &robots[conflict.first.index()];
                let lane = lanes.lane_id(robot.next_pos());
                if lane != OPEN_GROUND
                    && lanes.lane_id(robot.pos()) == OPEN_GROUND
                    && lanes.is_locked(lane, robot.next_pos())
                {
                    self.wait_flags[conflict.first.index()] = true;
                }
            }
        }
    }

    fn resolve_target_overlap(
        &mut self,
        robots: &mut [Robot],
        scope: &mut OverlayScope<'_>,
        first: RobotId,
        second: RobotId,
    ) {
        let (a, b) = (first.index(), second.index());
        let first_dizzy = robots[a].state() == RobotState::Dizzy;
        let second_dizzy = robots[b].state() == RobotState::Dizzy;

        if first_dizzy || second_dizzy {
            if first_dizzy && second_dizzy {
                error!(
                    error = %SimError::InternalInvariantViolated(format!(
                        "robots {first} and {second} are both stunned yet collide"
                    )),
                    "impossible overlap"
                );
            } else if first_dizzy {
                let _ = scope.block(robots[a].pos());
                self.replan_flags[b] = true;
            } else {
                let _ = scope.block(robots[b].pos());
                self.replan_flags[a] = true;
            }
            return;
        }

        let first_waits = robots[a].next_pos() == robots[a].pos();
        let second_waits = robots[b].next_pos() == robots[b].pos();
        if first_waits || second_waits {
            if first_waits && robots[a].next_pos() == destination_of(&robots[b]) {
                self.wait_flags[b] = true;
            } else if second_waits && robots[b].next_pos() == destination_of(&robots[a]) {
                self.wait_flags[a] = true;
            } else if first_waits {
                let _ = scope.block(robots[a].pos());
                self.replan_flags[b] = true;
            } else {
                let _ = scope.block(robots[b].pos());
                self.replan_flags[a] = true;
            }
            return;
        }

        let first_dest = destination_of(&robots[a]);
        let second_dest = destination_of(&robots[b]);
        let into_second_dest = robots[a].next_pos() == second_dest;
        let into_first_dest = robots[b].next_pos() == first_dest;

        if !into_second_dest && !into_first_dest {
            self.yield_and_replan(robots, scope, first, second);
        } else if into_second_dest && into_first_dest {
            let loser = if robots[a].has_priority_over(&robots[b]) {
                second
            } else {
                first
            };
            self.wait_flags[loser.index()] = true;
        } else if into_first_dest {
            // The overlap cell is the first robot's destination.
            self.wait_flags[b] = true;
        } else {
            self.wait_flags[a] = true;
        }
    }

    /// Both robots are just passing through the contested cell: the one
    /// whose own destination is still open replans; the other waits.
    fn yield_and_replan(
        &mut self,
        robots: &mut [Robot],
        scope: &mut OverlayScope<'_>,
        first: RobotId,
        second: RobotId,
    ) {
        let (a, b) = (first.index(), second.index());
        let first_dest_open = matches!(
            robots[a].destination(),
            Some(dest) if dest != robots[b].pos() && scope.map().passable(dest)
        );
        let second_dest_open = matches!(
            robots[b].destination(),
            Some(dest) if dest != robots[a].pos() && scope.map().passable(dest)
        );

        match (first_dest_open, second_dest_open) {
            (false, false) => {
                self.wait_flags[a] = true;
                self.wait_flags[b] = true;
            }
            (false, true) => {
                self.wait_flags[a] = true;
                let _ = scope.block(robots[a].pos());
                self.replan_flags[b] = true;
            }
            (true, false) => {
                self.wait_flags[b] = true;
                let _ = scope.block(robots[b].pos());
                self.replan_flags[a] = true;
            }
            (true, true) => {
                let (winner, loser) = if robots[a].has_priority_over(&robots[b]) {
                    (a, b)
                } else {
                    (b, a)
                };
                self.wait_flags[loser] = true;
                let _ = scope.block(robots[loser].pos());
                self.replan_flags[winner] = true;
            }
        }
    }

    fn resolve_swap(
        &mut self,
        robots: &mut [Robot],
        scope: &mut OverlayScope<'_>,
        lanes: &SingleLaneIndex,
        first: RobotId,
        second: RobotId,
    ) {
        let (a, b) = (first.index(), second.index());
        if robots[a].state() == RobotState::Dizzy || robots[b].state() == RobotState::Dizzy {
            error!(
                error = %SimError::InternalInvariantViolated(format!(
                    "swap between {first} and {second} involves a stunned robot"
                )),
                "impossible swap"
            );
            return;
        }

        let first_dest = destination_of(&robots[a]);
        let second_dest = destination_of(&robots[b]);
        let mutual = first_dest == robots[b].pos() && second_dest == robots[a].pos();

        if mutual {
            resolve_deadlock(robots, scope, first, second, &mut self.wait_flags);
        } else if first_dest == robots[b].pos() && robots[b].path_len() > 0 {
            // The second robot is just passing through; it goes around.
            self.wait_flags[a] = true;
            let _ = scope.block(robots[a].pos());
            self.replan_flags[b] = true;
        } else if second_dest == robots[a].pos() && robots[a].path_len() > 0 {
            self.wait_flags[b] = true;
            let _ = scope.block(robots[b].pos());
            self.replan_flags[a] = true;
        } else {
            let (winner, loser) = if robots[a].has_priority_over(&robots[b]) {
                (a, b)
            } else {
                (b, a)
            };
            // A sidestep onto open ground beats blocking the aisle; this is
            // how two robots meeting at a corridor mouth slide past each
            // other.
            if let Some(aside) = open_side_step(&robots[loser], &robots[winner], scope, lanes) {
                robots[loser].move_to_temporary_position(aside);
            } else if let Some(aside) =
                open_side_step(&robots[winner], &robots[loser], scope, lanes)
            {
                robots[winner].move_to_temporary_position(aside);
            } else {
                self.wait_flags[loser] = true;
                let _ = scope.block(robots[loser].pos());
                self.replan_flags[winner] = true;
            }
        }
    }
}

/// A free neighbor of `robot` on open ground that stays out of `other`'s
/// way: not its cell, not its proposed cell, not its destination.
fn open_side_step(
    robot: &Robot,
    other: &Robot,
    scope: &OverlayScope<'_>,
    lanes: &SingleLaneIndex,
) -> Option<Point> {
    scope.map().neighbors(robot.pos()).find(|candidate| {
        lanes.lane_id(*candidate) == OPEN_GROUND
            && *candidate != other.pos()
            && *candidate != other.next_pos()
            && *candidate != destination_of(other)
    })
}

/// Head-to-head in a dead end: nudge either robot into any free neighbor;
/// when neither can move, both wait and the stall is logged.
fn resolve_deadlock(
    robots: &mut [Robot],
    scope: &mut OverlayScope<'_>,
    first: RobotId,
    second: RobotId,
    wait_flags: &mut [bool],
) {
    let (a, b) = (first.index(), second.index());
    let second_pos = robots[b].pos();
    let nudge = scope
        .map()
        .neighbors(robots[a].pos())
        .find(|candidate| *candidate != second_pos);
    if let Some(step_aside) = nudge {
        robots[a].move_to_temporary_position(step_aside);
        return;
    }

    let first_pos = robots[a].pos();
    let nudge = scope
        .map()
        .neighbors(robots[b].pos())
        .find(|candidate| *candidate != first_pos);
    if let Some(step_aside) = nudge {
        robots[b].move_to_temporary_position(step_aside);
        return;
    }

    wait_flags[a] = true;
    wait_flags[b] = true;
    warn!(%first, %second, "deadlock with no free neighbor; both robots wait");
}

fn plan_path(
    pathfinder: &mut Pathfinder,
    robot: &mut Robot,
    goods: &mut GoodsStore,
    scope: &OverlayScope<'_>,
    budget: &FrameBudget,
) {
    let Some(goal) = robot.destination() else {
        return;
    };
    let start = robot.pos();

    if budget.exhausted() {
        debug!(
            robot = %robot.id(),
            error = %SimError::PathfinderBudgetExceeded { start },
            "frame budget spent; task dropped"
        );
        drop_task(robot, goods);
        return;
    }

    match pathfinder.find_path(start, goal, scope.map()) {
        Ok(path) => robot.set_path(path),
        Err(failure) => {
            debug!(
                robot = %robot.id(),
                error = %failure.to_sim_error(start, goal),
                "pathfinding failed; task dropped"
            );
            drop_task(robot, goods);
        }
    }
}

/// Reverts the robot to idle and reopens its goods claim, so the scheduler
/// can retry next frame.
fn drop_task(robot: &mut Robot, goods: &mut GoodsStore) {
    if let Some(claimed) = robot.target_goods() {
        goods.release(claimed);
    }
    robot.abort_task();
}

fn can_pick_up(goods: &GoodsStore, id: GoodsId) -> bool {
    goods
        .get(id)
        .is_some_and(|good| good.status() == GoodsStatus::Assigned && good.ttl() > 0)
}

/// A robot with no task reports its own cell as destination, so "blocking
/// someone's destination" never matches idle wanderers.
fn destination_of(robot: &Robot) -> Point {
    robot.destination().unwrap_or(robot.pos())
}

fn detect_conflicts(robots: &[Robot], lanes: &SingleLaneIndex) -> BTreeSet<Conflict> {
    let mut conflicts = BTreeSet::new();
    let live: Vec<&Robot> = robots.iter().filter(|robot| robot.is_live()).collect();

    for (slot, first) in live.iter().enumerate() {
        for second in live.iter().skip(slot + 1) {
            let kind = if first.next_pos() == second.next_pos() {
                Some(ConflictKind::TargetOverlap)
            } else if first.next_pos() == second.pos() && second.next_pos() == first.pos() {
                Some(ConflictKind::SwapPositions)
            } else {
                head_on_kind(first, second, lanes)
            };
            if let Some(kind) = kind {
                let _ = conflicts.insert(Conflict {
                    first: first.id(),
                    second: second.id(),
                    kind,
                });
            }
        }

        // A lone robot can still run against a locked corridor.
        let next_lane = lanes.lane_id(first.next_pos());
        if next_lane != OPEN_GROUND
            && lanes.lane_id(first.pos()) == OPEN_GROUND
            && lanes.is_locked(next_lane, first.next_pos())
        {
            let _ = conflicts.insert(Conflict {
                first: first.id(),
                second: first.id(),
                kind: ConflictKind::EntryWhileOccupied,
            });
        }
    }
    conflicts
}

fn head_on_kind(first: &Robot, second: &Robot, lanes: &SingleLaneIndex) -> Option<ConflictKind> {
    let first_next_lane = lanes.lane_id(first.next_pos());
    let second_next_lane = lanes.lane_id(second.next_pos());
    if first_next_lane == OPEN_GROUND || first_next_lane != second_next_lane {
        return None;
    }
    if lanes.lane_id(first.pos()) != OPEN_GROUND || lanes.lane_id(second.pos()) != OPEN_GROUND {
        return None;
    }
    // Same-cell entries were already classified as overlaps, so two distinct
    // entries here mean the robots are charging opposite corridor mouths.
    if lanes.is_entry(first_next_lane, first.next_pos())
        && lanes.is_entry(second_next_lane, second.next_pos())
    {
        Some(ConflictKind::HeadOnAttempt)
    } else {
        None
    }
}
