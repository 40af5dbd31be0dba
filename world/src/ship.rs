//! Ship state: oriented pose, cargo accounting, and posture stepping.

use quayside_core::{BerthId, Command, Rotation, ShipId, ShipPose};
use tracing::warn;

/// Judge-reported motion state of a ship.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShipCondition {
    /// Sailing normally.
    Normal,
    /// Recovering after a collision or a docking maneuver; immobile.
    Recovering,
    /// Docked and taking goods aboard.
    Loading,
}

impl ShipCondition {
    /// Decodes the judge's numeric ship state.
    #[must_use]
    pub const fn from_wire(value: u8) -> Self {
        match value {
            1 => ShipCondition::Recovering,
            2 => ShipCondition::Loading,
            _ => ShipCondition::Normal,
        }
    }
}

/// Mission the scheduler has the ship on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShipMission {
    /// Awaiting dispatch.
    Idle,
    /// Sailing toward an assigned berth.
    MovingToBerth,
    /// Sailing toward a delivery point.
    MovingToDelivery,
    /// Docked at a berth, loading stored goods.
    Loading,
}

/// A cargo ship shuttling between berths and delivery points.
///
/// The pose path is a reversed stack like the robot path: next pose at the
/// back. Ship positions are dead-reckoned from our own commands; the judge
/// reports only condition and berth id.
#[derive(Clone, Debug)]
pub struct Ship {
    id: ShipId,
    pose: ShipPose,
    condition: ShipCondition,
    capacity: u32,
    goods_count: u32,
    loaded_value: u32,
    mission: ShipMission,
    berth: Option<BerthId>,
    delivery: Option<usize>,
    destination: Option<ShipPose>,
    path: Vec<ShipPose>,
    next_pose: ShipPose,
    stillness: u32,
    dwell: u32,
    pending_depart: bool,
}

impl Ship {
    /// Creates an idle ship at its spawn pose.
    #[must_use]
    pub fn new(id: ShipId, pose: ShipPose, capacity: u32) -> Self {
        Self {
            id,
            pose,
            condition: ShipCondition::Normal,
            capacity,
            goods_count: 0,
            loaded_value: 0,
            mission: ShipMission::Idle,
            berth: None,
            delivery: None,
            destination: None,
            path: Vec::new(),
            next_pose: pose,
            stillness: 0,
            dwell: 0,
            pending_depart: false,
        }
    }

    /// Identifier of the ship.
    #[must_use]
    pub const fn id(&self) -> ShipId {
        self.id
    }

    /// Current pose.
    #[must_use]
    pub const fn pose(&self) -> ShipPose {
        self.pose
    }

    /// Pose planned for next frame.
    #[must_use]
    pub const fn next_pose(&self) -> ShipPose {
        self.next_pose
    }

    /// Judge-reported condition.
    #[must_use]
    pub const fn condition(&self) -> ShipCondition {
        self.condition
    }

    /// Mission the scheduler has the ship on.
    #[must_use]
    pub const fn mission(&self) -> ShipMission {
        self.mission
    }

    /// Berth the ship is bound for or docked at.
    #[must_use]
    pub const fn berth(&self) -> Option<BerthId> {
        self.berth
    }

    /// Delivery point index the ship is bound for.
    #[must_use]
    pub const fn delivery(&self) -> Option<usize> {
        self.delivery
    }

    /// Pose the ship is routed toward.
    #[must_use]
    pub const fn destination(&self) -> Option<ShipPose> {
        self.destination
    }

    /// Maximum goods the ship can hold.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Goods currently aboard.
    #[must_use]
    pub const fn goods_count(&self) -> u32 {
        self.goods_count
    }

    /// Total value of the goods aboard.
    #[must_use]
    pub const fn loaded_value(&self) -> u32 {
        self.loaded_value
    }

    /// Free space left aboard.
    #[must_use]
    pub const fn remaining_capacity(&self) -> u32 {
        self.capacity - self.goods_count
    }

    /// Fraction of the capacity in use, in `[0, 1]`.
    #[must_use]
    pub fn loaded_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        f64::from(self.goods_count) / f64::from(self.capacity)
    }

    /// Remaining planned poses.
    #[must_use]
    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// Frames spent docked without cargo arriving.
    #[must_use]
    pub const fn dwell(&self) -> u32 {
        self.dwell
    }

    /// Frames the ship has failed to advance along its path.
    #[must_use]
    pub const fn stillness(&self) -> u32 {
        self.stillness
    }

    /// True when the ship's mission needs a fresh pose path.
    #[must_use]
    pub fn needs_path(&self) -> bool {
        matches!(
            self.mission,
            ShipMission::MovingToBerth | ShipMission::MovingToDelivery
        ) && self.destination.is_some()
            && self.path.is_empty()
            && !self.reached_destination()
    }

    /// True when the ship's anchor sits on the destination point; heading is
    /// not compared.
    #[must_use]
    pub fn reached_destination(&self) -> bool {
        matches!(self.destination, Some(d) if d.pos() == self.pose.pos())
    }

    /// Installs a freshly computed reversed pose path.
    pub fn set_path(&mut self, path: Vec<ShipPose>) {
        self.path = path;
    }

    /// Read access to the planned route (goal first, next pose last).
    #[must_use]
    pub fn path(&self) -> &[ShipPose] {
        &self.path
    }

    /// Truncates the route to its first `keep` poses (goal side) and splices
    /// a detour onto the cut.
    pub fn splice_detour(&mut self, keep: usize, detour: Vec<ShipPose>) {
        self.path.truncate(keep);
        self.path.extend(detour);
    }

    /// Dispatches the ship toward a berth.
    pub fn set_course_to_berth(&mut self, berth: BerthId, destination: ShipPose) {
        self.mission = ShipMission::MovingToBerth;
        self.berth = Some(berth);
        self.delivery = None;
        self.destination = Some(destination);
        self.path.clear();
        self.stillness = 0;
    }

    /// Dispatches the ship toward a delivery point.
    pub fn set_course_to_delivery(&mut self, delivery: usize, destination: ShipPose) {
        self.mission = ShipMission::MovingToDelivery;
        self.delivery = Some(delivery);
        self.destination = Some(destination);
        self.path.clear();
        self.stillness = 0;
    }

    /// Switches to loading at the berth the ship reached.
    pub fn begin_loading(&mut self) {
        self.mission = ShipMission::Loading;
        self.destination = None;
        self.path.clear();
        self.dwell = 0;
    }

    /// Records one frame docked; `fed` resets the starvation clock.
    pub fn tick_dwell(&mut self, fed: bool) {
        if fed {
            self.dwell = 0;
        } else {
            self.dwell = self.dwell.saturating_add(1);
        }
    }

    /// Takes one good aboard; `false` when the hold is full.
    pub fn load_one(&mut self, value: u32) -> bool {
        if self.remaining_capacity() == 0 {
            return false;
        }
        self.goods_count += 1;
        self.loaded_value += value;
        true
    }

    /// Empties the hold at a delivery point and returns the banked value.
    pub fn unload(&mut self) -> u32 {
        let banked = self.loaded_value;
        self.goods_count = 0;
        self.loaded_value = 0;
        banked
    }

    /// Flags that a `dept` command must precede the next motion; set when a
    /// docked ship is sent back to sea.
    pub fn request_departure(&mut self) {
        self.pending_depart = true;
    }

    /// Consumes the pending departure flag.
    pub fn take_departure_request(&mut self) -> bool {
        let pending = self.pending_depart;
        self.pending_depart = false;
        pending
    }

    /// Resets transit bookkeeping when the ship pushes off a berth.
    pub fn reset_departure(&mut self) {
        self.mission = ShipMission::Idle;
        self.path.clear();
        self.stillness = 0;
        self.dwell = 0;
    }

    /// Plans the next pose: the top of the path while sailing normally.
    pub fn update_next_pose(&mut self) {
        self.next_pose = if self.condition == ShipCondition::Recovering {
            self.pose
        } else {
            self.path.last().copied().unwrap_or(self.pose)
        };
    }

    /// Cancels this frame's motion.
    pub fn hold_position(&mut self) {
        self.next_pose = self.pose;
    }

    /// Sidesteps to `pose` next frame, waits a frame there, then returns to
    /// the current pose before resuming the planned route.
    pub fn move_to_temporary_pose(&mut self, pose: ShipPose) {
        self.path.push(self.pose);
        self.path.push(pose);
        self.path.push(pose);
        self.next_pose = pose;
    }

    /// The wire command that realizes `next_pose`, or `None` when holding
    /// still. An unreachable posture is logged and dropped.
    #[must_use]
    pub fn posture_command(&self) -> Option<Command> {
        if self.next_pose == self.pose {
            return None;
        }
        if self.next_pose == self.pose.forward() {
            return Some(Command::Ship { ship: self.id });
        }
        if self.next_pose == self.pose.rotated_clockwise() {
            return Some(Command::Rot {
                ship: self.id,
                rotation: Rotation::Clockwise,
            });
        }
        if self.next_pose == self.pose.rotated_counter_clockwise() {
            return Some(Command::Rot {
                ship: self.id,
                rotation: Rotation::CounterClockwise,
            });
        }
        warn!(ship = %self.id, from = %self.pose, to = %self.next_pose, "unreachable posture");
        None
    }

    /// Applies the judge's per-frame report and settles dead reckoning: a
    /// normal-condition ship is assumed to have executed the commanded step.
    pub fn ingest_report(&mut self, condition: ShipCondition, berth: Option<BerthId>) {
        self.condition = condition;
        if condition != ShipCondition::Recovering && self.next_pose != self.pose {
            if self.path.last() == Some(&self.next_pose) {
                let _ = self.path.pop();
            }
            self.pose = self.next_pose;
            self.stillness = 0;
        } else if matches!(
            self.mission,
            ShipMission::MovingToBerth | ShipMission::MovingToDelivery
        ) {
            self.stillness = self.stillness.saturating_add(1);
        }
        if let Some(berth) = berth {
            self.berth = Some(berth);
        }
    }

    /// True when this ship outranks `other`: not-recovering first, then the
    /// ship whose next footprint blocks the other's destination, then the
    /// longer route, then the lower id.
    #[must_use]
    pub fn has_priority_over(&self, other: &Ship) -> bool {
        let self_recovering = self.condition == ShipCondition::Recovering;
        let other_recovering = other.condition == ShipCondition::Recovering;
        if self_recovering != other_recovering {
            return other_recovering;
        }
        let blocks_other = matches!(other.destination, Some(d) if self.next_pose.overlaps(&d));
        let other_blocks_self = matches!(self.destination, Some(d) if other.next_pose.overlaps(&d));
        if blocks_other != other_blocks_self {
            return blocks_other;
        }
        if self.path.len() != other.path.len() {
            return self.path.len() > other.path.len();
        }
        self.id < other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayside_core::{Orientation, Point};

    fn ship_at(id: u32, row: i32, col: i32) -> Ship {
        Ship::new(
            ShipId::new(id),
            ShipPose::new(Point::new(row, col), Orientation::East),
            10,
        )
    }

    #[test]
    fn posture_command_matches_the_planned_transition() {
        let mut ship = ship_at(0, 3, 3);
        ship.set_course_to_berth(
            BerthId::new(0),
            ShipPose::new(Point::new(3, 6), Orientation::East),
        );
        ship.set_path(vec![
            ShipPose::new(Point::new(3, 6), Orientation::East),
            ShipPose::new(Point::new(3, 5), Orientation::East),
            ShipPose::new(Point::new(3, 4), Orientation::East),
        ]);
        ship.update_next_pose();
        assert_eq!(
            ship.posture_command(),
            Some(Command::Ship { ship: ShipId::new(0) })
        );

        ship.set_path(vec![ShipPose::new(Point::new(3, 3), Orientation::South)]);
        ship.update_next_pose();
        assert_eq!(
            ship.posture_command(),
            Some(Command::Rot {
                ship: ShipId::new(0),
                rotation: Rotation::Clockwise,
            })
        );

        ship.hold_position();
        assert_eq!(ship.posture_command(), None);
    }

    #[test]
    fn dead_reckoning_advances_on_normal_condition() {
        let mut ship = ship_at(0, 2, 2);
        ship.set_course_to_delivery(0, ShipPose::new(Point::new(2, 4), Orientation::East));
        ship.set_path(vec![
            ShipPose::new(Point::new(2, 4), Orientation::East),
            ShipPose::new(Point::new(2, 3), Orientation::East),
        ]);
        ship.update_next_pose();

        ship.ingest_report(ShipCondition::Normal, None);
        assert_eq!(ship.pose().pos(), Point::new(2, 3));
        assert_eq!(ship.path_len(), 1);

        // A recovering ship holds its pose and keeps the step queued.
        ship.update_next_pose();
        ship.ingest_report(ShipCondition::Recovering, None);
        assert_eq!(ship.pose().pos(), Point::new(2, 3));
        assert_eq!(ship.path_len(), 1);
    }

    #[test]
    fn loading_clamps_to_capacity() {
        let mut ship = ship_at(0, 0, 0);
        for _ in 0..10 {
            assert!(ship.load_one(7));
        }
        assert!(!ship.load_one(7));
        assert_eq!(ship.goods_count(), 10);
        assert_eq!(ship.remaining_capacity(), 0);
        assert!((ship.loaded_ratio() - 1.0).abs() < f64::EPSILON);

        assert_eq!(ship.unload(), 70);
        assert_eq!(ship.goods_count(), 0);
    }

    #[test]
    fn priority_orders_recovery_blocking_route_id() {
        let mut recovering = ship_at(0, 0, 0);
        recovering.ingest_report(ShipCondition::Recovering, None);
        let normal = ship_at(1, 5, 5);
        assert!(normal.has_priority_over(&recovering));

        let mut blocker = ship_at(2, 1, 1);
        let mut victim = ship_at(3, 4, 4);
        victim.set_course_to_berth(
            BerthId::new(0),
            ShipPose::new(Point::new(1, 2), Orientation::East),
        );
        blocker.hold_position();
        victim.hold_position();
        assert!(blocker.has_priority_over(&victim));

        let a = ship_at(4, 0, 0);
        let b = ship_at(5, 9, 9);
        assert!(a.has_priority_over(&b));
    }

    #[test]
    fn temporary_pose_waits_an_extra_frame() {
        let mut ship = ship_at(0, 2, 2);
        let side = ShipPose::new(Point::new(2, 2), Orientation::South);
        ship.move_to_temporary_pose(side);
        assert_eq!(ship.next_pose(), side);
        assert_eq!(ship.path_len(), 3);
    }
}
