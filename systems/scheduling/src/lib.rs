#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Target assignment for the Quayside harbor bot.
//!
//! The scheduler decides *where* every agent should be heading; it never
//! moves anything. Robot assignment scores claimable goods by value against
//! estimated round-trip cost, optionally partitioned by berth cluster; ship
//! assignment balances berth throughput against travel and decides when a
//! docked ship should push off for a delivery point. Decisions come back as
//! actions and are applied separately, keeping the scheduling itself pure.

use std::collections::HashMap;

use quayside_core::{BerthId, GoodsId, Orientation, Point, RobotId, ShipId, ShipPose, SimError, Tuning, FINAL_FRAME};
use quayside_world::{map, Berth, Goods, GoodsStore, Map, Robot, RobotState, Ship, ShipMission, World};
use tracing::{debug, info};

/// Safety margin, in frames, added to the travel estimate when deciding
/// whether a loaded ship can still reach a delivery point before the match
/// ends.
const ENDGAME_MARGIN: u32 = 10;

/// Decision for a single robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RobotAction {
    /// Nothing assignable this frame; the robot stays idle.
    Fail,
    /// Route to a good and collect it.
    MoveToGoods {
        /// Good being claimed.
        goods: GoodsId,
        /// Ground cell of the good.
        target: Point,
    },
    /// Route the carried good to a berth.
    MoveToBerth {
        /// Chosen berth.
        berth: BerthId,
        /// Footprint cell to path to.
        target: Point,
    },
    /// Keep the current task.
    Continue,
}

/// Decision for a single ship.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShipAction {
    /// Nothing useful to do this frame.
    Fail,
    /// Keep the current mission.
    Continue,
    /// Push off the berth; the cargo run follows next frame.
    DepartBerth,
    /// Sail to a berth and dock there.
    MoveToBerth(BerthId),
    /// Sail to the delivery point with the given index.
    MoveToDelivery(usize),
}

/// The target-assignment policy and its cluster state.
#[derive(Debug)]
pub struct Scheduler {
    tuning: Tuning,
    clusters: Vec<u32>,
    robot_clusters: HashMap<RobotId, u32>,
    next_rebalance: u32,
}

impl Scheduler {
    /// Creates a scheduler with the given tuning.
    #[must_use]
    pub fn new(tuning: Tuning) -> Self {
        let next_rebalance = tuning.dynamic_scheduling_interval;
        Self {
            tuning,
            clusters: Vec::new(),
            robot_clusters: HashMap::new(),
            next_rebalance,
        }
    }

    /// Per-frame upkeep: clusters berths on first use, binds new robots to
    /// clusters, and runs the dynamic rebalancing pass on its interval.
    pub fn prepare(&mut self, world: &World) {
        if self.clusters.is_empty() && !world.berths.is_empty() {
            self.build_clusters(world);
        }
        if !self.tuning.partition_scheduling {
            return;
        }

        for robot in &world.robots {
            if robot.is_live() && !self.robot_clusters.contains_key(&robot.id()) {
                let cluster = self.emptiest_cluster();
                let _ = self.robot_clusters.insert(robot.id(), cluster);
                debug!(robot = %robot.id(), cluster, "robot bound to berth cluster");
            }
        }

        if self.tuning.dynamic_partition_scheduling && world.frame >= self.next_rebalance {
            self.next_rebalance = world.frame + self.tuning.dynamic_scheduling_interval;
            self.rebalance(world);
        }
    }

    /// Cluster a berth belongs to.
    #[must_use]
    pub fn berth_cluster(&self, berth: BerthId) -> u32 {
        self.clusters.get(berth.index()).copied().unwrap_or(0)
    }

    /// Cluster a robot is bound to, when partition scheduling is on.
    #[must_use]
    pub fn robot_cluster(&self, robot: RobotId) -> Option<u32> {
        if self.tuning.partition_scheduling {
            self.robot_clusters.get(&robot).copied()
        } else {
            None
        }
    }

    /// Picks the next target for one robot.
    ///
    /// Idle empty robots claim the highest-scoring reachable good; idle
    /// carrying robots head for the closest berth with a free storage slot.
    /// Robots already on a task, stunned, or dead are left alone.
    #[must_use]
    pub fn schedule_robot(&self, robot: &Robot, world: &World) -> RobotAction {
        if !robot.is_live() {
            return RobotAction::Fail;
        }
        if robot.state() != RobotState::Idle {
            return RobotAction::Continue;
        }
        let cluster = self.robot_cluster(robot.id());

        if robot.carrying() {
            let Some((berth, _)) =
                self.nearest_berth(&world.map, &world.berths, robot.pos(), cluster, true)
            else {
                return RobotAction::Fail;
            };
            let target = drop_cell_for(&world.berths[berth.index()], robot, &world.robots);
            return RobotAction::MoveToBerth { berth, target };
        }

        let mut best: Option<(f64, GoodsId, Point)> = None;
        for good in world.goods.iter() {
            if !good.claimable() || good.ttl() == 0 {
                continue;
            }
            let Some((berth, to_berth)) =
                self.nearest_berth(&world.map, &world.berths, good.pos(), cluster, true)
            else {
                continue;
            };
            if !world.map.berth_reachable(berth, robot.pos()) {
                continue;
            }
            let to_good = robot.pos().manhattan(good.pos());
            let round_trip = to_good + u32::from(to_berth);
            if round_trip >= good.ttl() {
                continue;
            }
            let score = f64::from(good.value()) * self.tuning.ttl_profit_weight
                / f64::from(round_trip.max(1));
            if best.is_none_or(|(best_score, _, _)| score > best_score) {
                best = Some((score, good.id(), good.pos()));
            }
        }

        match best {
            Some((_, goods, target)) => RobotAction::MoveToGoods { goods, target },
            None => RobotAction::Fail,
        }
    }

    /// Picks actions for the whole fleet of ships.
    #[must_use]
    pub fn schedule_ships(&self, world: &World) -> Vec<(ShipId, ShipAction)> {
        let frames_left = FINAL_FRAME.saturating_sub(world.frame);
        let mut actions = Vec::with_capacity(world.ships.len());

        for ship in &world.ships {
            let action = match ship.mission() {
                ShipMission::Loading => self.schedule_docked_ship(ship, world, frames_left),
                ShipMission::Idle => self.schedule_idle_ship(ship, world),
                ShipMission::MovingToBerth | ShipMission::MovingToDelivery => ShipAction::Continue,
            };
            actions.push((ship.id(), action));
        }
        actions
    }

    fn schedule_docked_ship(&self, ship: &Ship, world: &World, frames_left: u32) -> ShipAction {
        if world.delivery_points.is_empty() {
            return ShipAction::Continue;
        }
        let berth_empty = ship
            .berth()
            .and_then(|berth| world.berths.get(berth.index()))
            .is_none_or(|berth| berth.stored_count() == 0);

        let full = ship.remaining_capacity() == 0;
        let loaded_enough =
            ship.loaded_ratio() >= self.tuning.able_depart_scale && berth_empty;
        let endgame = ship.goods_count() > 0
            && frames_left
                <= nearest_delivery(&world.delivery_points, ship.pose().pos())
                    .map_or(0, |(_, travel)| travel + ENDGAME_MARGIN);

        if full || loaded_enough || endgame {
            return ShipAction::DepartBerth;
        }

        if ship.goods_count() == 0 && ship.dwell() >= self.tuning.ship_wait_time_limit {
            // Starved: give up on this berth and try the best other one.
            if let Some(berth) = self.best_berth_for_ship(ship, world, ship.berth()) {
                return ShipAction::MoveToBerth(berth);
            }
        }
        ShipAction::Continue
    }

    fn schedule_idle_ship(&self, ship: &Ship, world: &World) -> ShipAction {
        if ship.goods_count() > 0 {
            return match nearest_delivery(&world.delivery_points, ship.pose().pos()) {
                Some((delivery, _)) => ShipAction::MoveToDelivery(delivery),
                None => ShipAction::Fail,
            };
        }
        match self.best_berth_for_ship(ship, world, None) {
            Some(berth) => ShipAction::MoveToBerth(berth),
            None => ShipAction::Fail,
        }
    }

    /// The berth maximizing expected loaded value minus travel cost, under
    /// the per-berth ship cap.
    fn best_berth_for_ship(
        &self,
        ship: &Ship,
        world: &World,
        exclude: Option<BerthId>,
    ) -> Option<BerthId> {
        let mut best: Option<(f64, BerthId)> = None;
        for berth in &world.berths {
            if Some(berth.id()) == exclude {
                continue;
            }
            if world.ships_bound_for(berth.id()) >= self.tuning.max_ships_per_berth {
                continue;
            }
            let expected = expected_loaded_value(berth, &world.goods);
            let travel = f64::from(ship.pose().pos().manhattan(berth.anchor()))
                + f64::from(berth.docking_delay());
            let score = f64::from(expected) - travel;
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, berth.id()));
            }
        }
        best.map(|(_, berth)| berth)
    }

    /// Closest berth to `p` by BFS distance, optionally restricted to a
    /// cluster and to berths with a free storage slot.
    fn nearest_berth(
        &self,
        map: &Map,
        berths: &[Berth],
        p: Point,
        cluster: Option<u32>,
        require_free_slot: bool,
    ) -> Option<(BerthId, u16)> {
        let mut best: Option<(BerthId, u16)> = None;
        for berth in berths {
            if require_free_slot && berth.free_slots() == 0 {
                continue;
            }
            if matches!(cluster, Some(c) if self.berth_cluster(berth.id()) != c) {
                continue;
            }
            let Some(distance) = map.berth_distance(berth.id(), p) else {
                continue;
            };
            if distance == map::UNREACHABLE {
                continue;
            }
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((berth.id(), distance));
            }
        }
        best
    }

    /// Deterministic farthest-point clustering over BFS berth-to-berth
    /// distances.
    fn build_clusters(&mut self, world: &World) {
        let berth_count = world.berths.len();
        let k = self.tuning.cluster_count.clamp(1, berth_count);
        let distance = |from: usize, to: usize| -> u32 {
            match world
                .map
                .berth_distance(BerthId::new(from as u32), world.berths[to].anchor())
            {
                Some(d) if d != map::UNREACHABLE => u32::from(d),
                _ => u32::MAX / 2,
            }
        };

        let mut seeds = vec![0usize];
        while seeds.len() < k {
            let mut farthest: Option<(u32, usize)> = None;
            for candidate in 0..berth_count {
                if seeds.contains(&candidate) {
                    continue;
                }
                let nearest_seed = seeds
                    .iter()
                    .map(|&seed| distance(seed, candidate))
                    .min()
                    .unwrap_or(0);
                if farthest.is_none_or(|(best, _)| nearest_seed > best) {
                    farthest = Some((nearest_seed, candidate));
                }
            }
            match farthest {
                Some((_, candidate)) => seeds.push(candidate),
                None => break,
            }
        }

        self.clusters = (0..berth_count)
            .map(|berth| {
                let mut assigned = 0;
                let mut best = u32::MAX;
                for (slot, &seed) in seeds.iter().enumerate() {
                    let d = distance(seed, berth);
                    if d < best {
                        best = d;
                        assigned = slot as u32;
                    }
                }
                assigned
            })
            .collect();
        info!(berths = berth_count, clusters = seeds.len(), "berths clustered");
    }

    fn emptiest_cluster(&self) -> u32 {
        let cluster_count = self
            .clusters
            .iter()
            .copied()
            .max()
            .map_or(1, |max| max + 1);
        let mut sizes = vec![0u32; cluster_count as usize];
        for &cluster in self.robot_clusters.values() {
            if let Some(size) = sizes.get_mut(cluster as usize) {
                *size += 1;
            }
        }
        sizes
            .iter()
            .enumerate()
            .min_by_key(|&(cluster, size)| (*size, cluster))
            .map_or(0, |(cluster, _)| cluster as u32)
    }

    /// Moves one robot out of a starved cluster toward the cluster with the
    /// most value per robot.
    fn rebalance(&mut self, world: &World) {
        let cluster_count = self
            .clusters
            .iter()
            .copied()
            .max()
            .map_or(0, |max| max as usize + 1);
        if cluster_count < 2 {
            return;
        }

        let mut values = vec![0f64; cluster_count];
        for good in world.goods.iter() {
            if !good.claimable() || good.ttl() == 0 {
                continue;
            }
            if let Some((berth, _)) =
                self.nearest_berth(&world.map, &world.berths, good.pos(), None, false)
            {
                values[self.berth_cluster(berth) as usize] += f64::from(good.value());
            }
        }
        let mut robots = vec![0u32; cluster_count];
        for &cluster in self.robot_clusters.values() {
            robots[cluster as usize] += 1;
        }

        let total_robots: u32 = robots.iter().sum();
        let total_value: f64 = values.iter().sum();
        if total_robots == 0 || total_value <= 0.0 {
            return;
        }
        let mean_per_robot = total_value / f64::from(total_robots);
        let per_robot = |cluster: usize| -> f64 {
            if robots[cluster] == 0 {
                f64::INFINITY
            } else {
                values[cluster] / f64::from(robots[cluster])
            }
        };

        let mut donor: Option<(f64, usize)> = None;
        for cluster in 0..cluster_count {
            if robots[cluster] == 0 {
                continue;
            }
            let value = per_robot(cluster);
            if value < self.tuning.robot_release_bound * mean_per_robot
                && donor.is_none_or(|(best, _)| value < best)
            {
                donor = Some((value, cluster));
            }
        }
        let Some((_, donor)) = donor else {
            return;
        };
        let receiver = (0..cluster_count)
            .filter(|&cluster| cluster != donor && robots[cluster] < total_robots)
            .max_by(|&a, &b| {
                per_robot(a)
                    .partial_cmp(&per_robot(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.cmp(&a))
            });
        let Some(receiver) = receiver else {
            return;
        };

        // The least busy robot of the donor cluster changes allegiance.
        let moved = world
            .robots
            .iter()
            .filter(|robot| {
                robot.is_live()
                    && robot.state() == RobotState::Idle
                    && !robot.carrying()
                    && self.robot_clusters.get(&robot.id()) == Some(&(donor as u32))
            })
            .map(Robot::id)
            .min();
        if let Some(robot) = moved {
            let _ = self.robot_clusters.insert(robot, receiver as u32);
            info!(%robot, from = donor, to = receiver, "robot rebalanced between clusters");
        }
    }
}

/// Executes a robot decision against the world.
pub fn apply_robot_action(world: &mut World, robot: RobotId, action: RobotAction) {
    match action {
        RobotAction::MoveToGoods { goods, target } => {
            world.goods.assign(goods, robot);
            world.robots[robot.index()].assign_goods(goods, target);
        }
        RobotAction::MoveToBerth { berth, target } => {
            world.robots[robot.index()].assign_berth(berth, target);
        }
        RobotAction::Fail => {
            debug!(error = %SimError::NoAssignableGood { robot }, "robot stays idle");
        }
        RobotAction::Continue => {}
    }
}

/// Executes a ship decision against the world.
pub fn apply_ship_action(world: &mut World, ship: ShipId, action: ShipAction) {
    match action {
        ShipAction::MoveToBerth(berth) => {
            let dock = world.berths[berth.index()].dock_pose();
            let ship = &mut world.ships[ship.index()];
            if ship.mission() == ShipMission::Loading {
                ship.request_departure();
            }
            ship.set_course_to_berth(berth, dock);
        }
        ShipAction::MoveToDelivery(delivery) => {
            let Some(&target) = world.delivery_points.get(delivery) else {
                debug!(%ship, delivery, "delivery point out of range");
                return;
            };
            world.ships[ship.index()]
                .set_course_to_delivery(delivery, ShipPose::new(target, Orientation::East));
        }
        ShipAction::DepartBerth => {
            let ship = &mut world.ships[ship.index()];
            ship.request_departure();
            ship.reset_departure();
        }
        ShipAction::Fail | ShipAction::Continue => {}
    }
}

/// Value a ship can expect to load at a berth: goods already stored plus
/// goods on their way.
fn expected_loaded_value(berth: &Berth, goods: &GoodsStore) -> u32 {
    let stored: u32 = berth
        .reached()
        .iter()
        .filter_map(|id| goods.get(*id))
        .map(Goods::value)
        .sum();
    let incoming: u32 = berth
        .unreached()
        .iter()
        .filter_map(|id| goods.get(*id))
        .map(Goods::value)
        .sum();
    stored + incoming
}

/// Nearest delivery point by Manhattan distance; ties go to the earlier
/// point in the map's row-major scan.
fn nearest_delivery(delivery_points: &[Point], from: Point) -> Option<(usize, u32)> {
    let mut best: Option<(usize, u32)> = None;
    for (index, point) in delivery_points.iter().enumerate() {
        let distance = from.manhattan(*point);
        if best.is_none_or(|(_, best_distance)| distance < best_distance) {
            best = Some((index, distance));
        }
    }
    best
}

/// Drop cell for a carrying robot: the closest footprint cell that no other
/// robot stands on or is already routed to, so carriers spread across the
/// berth instead of queueing for one cell. Falls back to the closest cell
/// outright when the footprint is crowded.
fn drop_cell_for(berth: &Berth, robot: &Robot, robots: &[Robot]) -> Point {
    let taken = |cell: Point| {
        robots.iter().any(|other| {
            other.id() != robot.id()
                && other.is_live()
                && (other.pos() == cell || other.destination() == Some(cell))
        })
    };

    let mut best: Option<Point> = None;
    let mut fallback: Option<Point> = None;
    for cell in berth.footprint() {
        let distance = robot.pos().manhattan(cell);
        if fallback.is_none_or(|b| distance < robot.pos().manhattan(b)) {
            fallback = Some(cell);
        }
        if taken(cell) {
            continue;
        }
        if best.is_none_or(|b| distance < robot.pos().manhattan(b)) {
            best = Some(cell);
        }
    }
    best.or(fallback)
        .expect("berth footprint is never empty")
}
