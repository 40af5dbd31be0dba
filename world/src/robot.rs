//! Land robot state and its finite-state lifecycle.

use quayside_core::{BerthId, GoodsId, Point, RobotId};
use tracing::warn;

/// Lifecycle state of a robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RobotState {
    /// Awaiting an assignment from the scheduler.
    Idle,
    /// Routed toward an assigned good.
    MovingToGoods,
    /// Carrying a good toward an assigned berth.
    MovingToBerth,
    /// Stunned by the judge (motion state 0); cannot move this frame.
    Dizzy,
    /// Permanently out of the match; never becomes idle again.
    Dead,
}

/// A land robot ferrying goods to berths.
///
/// The path is a reversed stack: the next step sits at the back so stepping
/// is a pop.
#[derive(Clone, Debug)]
pub struct Robot {
    id: RobotId,
    pos: Point,
    carrying: bool,
    cargo: Option<GoodsId>,
    state: RobotState,
    destination: Option<Point>,
    target_goods: Option<GoodsId>,
    target_berth: Option<BerthId>,
    path: Vec<Point>,
    next_pos: Point,
}

impl Robot {
    /// Creates an idle robot; its true position arrives with the next frame
    /// ingest, which is authoritative.
    #[must_use]
    pub fn new(id: RobotId, pos: Point) -> Self {
        Self {
            id,
            pos,
            carrying: false,
            cargo: None,
            state: RobotState::Idle,
            destination: None,
            target_goods: None,
            target_berth: None,
            path: Vec::new(),
            next_pos: pos,
        }
    }

    /// Identifier of the robot.
    #[must_use]
    pub const fn id(&self) -> RobotId {
        self.id
    }

    /// Cell the robot currently stands on.
    #[must_use]
    pub const fn pos(&self) -> Point {
        self.pos
    }

    /// Cell the robot will occupy next frame, as planned by the controller.
    #[must_use]
    pub const fn next_pos(&self) -> Point {
        self.next_pos
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RobotState {
        self.state
    }

    /// True when the robot holds a good.
    #[must_use]
    pub const fn carrying(&self) -> bool {
        self.carrying
    }

    /// The good the robot holds, if any.
    #[must_use]
    pub const fn cargo(&self) -> Option<GoodsId> {
        self.cargo
    }

    /// Final cell of the planned route, if a task is active.
    #[must_use]
    pub const fn destination(&self) -> Option<Point> {
        self.destination
    }

    /// Good the robot is routed toward, if any.
    #[must_use]
    pub const fn target_goods(&self) -> Option<GoodsId> {
        self.target_goods
    }

    /// Berth the robot is routed toward, if any.
    #[must_use]
    pub const fn target_berth(&self) -> Option<BerthId> {
        self.target_berth
    }

    /// Remaining planned steps.
    #[must_use]
    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    /// True when the robot's task needs a fresh path: it is moving toward a
    /// destination but the stack ran dry.
    #[must_use]
    pub fn needs_path(&self) -> bool {
        matches!(
            self.state,
            RobotState::MovingToGoods | RobotState::MovingToBerth
        ) && self.destination.is_some()
            && self.path.is_empty()
            && self.destination != Some(self.pos)
    }

    /// True when the robot participates in planning this frame.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self.state, RobotState::Dead)
    }

    /// Installs a freshly computed reversed path.
    pub fn set_path(&mut self, path: Vec<Point>) {
        self.path = path;
    }

    /// Drops the planned path, forcing a replan.
    pub fn clear_path(&mut self) {
        self.path.clear();
    }

    /// Routes the robot toward a good.
    pub fn assign_goods(&mut self, goods: GoodsId, at: Point) {
        self.state = RobotState::MovingToGoods;
        self.target_goods = Some(goods);
        self.target_berth = None;
        self.destination = Some(at);
        self.path.clear();
    }

    /// Routes the robot toward a berth cell.
    pub fn assign_berth(&mut self, berth: BerthId, at: Point) {
        self.state = RobotState::MovingToBerth;
        self.target_berth = Some(berth);
        self.target_goods = None;
        self.destination = Some(at);
        self.path.clear();
    }

    /// Marks the pickup: cargo on board, task cleared, back to idle so the
    /// scheduler can route the berth leg this same frame.
    pub fn complete_pickup(&mut self, goods: GoodsId) {
        self.carrying = true;
        self.cargo = Some(goods);
        self.finish_task();
    }

    /// Marks the drop-off and returns the delivered good.
    pub fn complete_dropoff(&mut self) -> Option<GoodsId> {
        let delivered = self.cargo.take();
        self.carrying = false;
        self.finish_task();
        delivered
    }

    /// Abandons the current task without touching the cargo.
    pub fn abort_task(&mut self) {
        self.finish_task();
    }

    fn finish_task(&mut self) {
        if self.state != RobotState::Dizzy {
            self.state = RobotState::Idle;
        }
        self.destination = None;
        self.target_goods = None;
        self.target_berth = None;
        self.path.clear();
    }

    /// Plans the next cell: the top of the path stack, or the current cell
    /// when stunned or out of path.
    pub fn update_next_pos(&mut self) {
        self.next_pos = match self.state {
            RobotState::Dizzy | RobotState::Dead => self.pos,
            _ => self.path.last().copied().unwrap_or(self.pos),
        };
    }

    /// Cancels this frame's step.
    pub fn wait_in_place(&mut self) {
        self.next_pos = self.pos;
    }

    /// Detours one cell: step to `p` next, then return to the current cell
    /// before resuming the planned path.
    pub fn move_to_temporary_position(&mut self, p: Point) {
        self.path.push(self.pos);
        self.path.push(p);
        self.next_pos = p;
    }

    /// Applies the judge's authoritative per-frame report.
    ///
    /// The reported position consumes the path step it matches; a mismatch
    /// drops the stale path. The carrying flag is authoritative: when it
    /// disappears, the local cargo reference is cleared.
    pub fn ingest_report(&mut self, pos: Point, carrying: bool, recovering: bool) {
        if self.path.last() == Some(&pos) {
            let _ = self.path.pop();
        } else if pos != self.pos && !self.path.is_empty() {
            warn!(robot = %self.id, at = %pos, "robot strayed from its path");
            self.path.clear();
        }
        self.pos = pos;

        if self.carrying && !carrying {
            self.cargo = None;
        }
        self.carrying = carrying;

        if self.state == RobotState::Dead {
            return;
        }
        if recovering {
            self.state = RobotState::Dizzy;
        } else if self.state == RobotState::Dizzy || !self.is_tasked() {
            self.state = match (self.target_goods, self.target_berth) {
                (Some(_), _) => RobotState::MovingToGoods,
                (_, Some(_)) => RobotState::MovingToBerth,
                _ => RobotState::Idle,
            };
        }
    }

    /// Retires the robot permanently; a dead robot never becomes idle.
    pub fn mark_dead(&mut self) {
        self.state = RobotState::Dead;
        self.destination = None;
        self.target_goods = None;
        self.target_berth = None;
        self.path.clear();
        self.next_pos = self.pos;
    }

    /// True when a routing task is active.
    #[must_use]
    pub const fn is_tasked(&self) -> bool {
        matches!(
            self.state,
            RobotState::MovingToGoods | RobotState::MovingToBerth
        )
    }

    /// True when this robot outranks `other` in conflict resolution:
    /// not-stunned first, then the longer remaining path, then the lower id.
    #[must_use]
    pub fn has_priority_over(&self, other: &Robot) -> bool {
        let self_dizzy = self.state == RobotState::Dizzy;
        let other_dizzy = other.state == RobotState::Dizzy;
        if self_dizzy != other_dizzy {
            return other_dizzy;
        }
        if self.path.len() != other.path.len() {
            return self.path.len() > other.path.len();
        }
        self.id < other.id
    }
}
