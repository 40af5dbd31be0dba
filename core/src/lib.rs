#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Quayside harbor bot.
//!
//! This crate defines the vocabulary that connects the judge adapter, the
//! authoritative world, and the pure systems: grid coordinates and ship
//! poses, the id newtypes that stand in for owning references, the wire
//! command surface emitted back to the judge, the typed error kinds, and the
//! tuning knobs every policy reads from.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;

/// Price of a single land robot, in judge currency.
pub const ROBOT_PRICE: u32 = 2_000;
/// Price of a single ship, in judge currency.
pub const SHIP_PRICE: u32 = 8_000;
/// Funds available when the match starts.
pub const INITIAL_FUNDS: u32 = 25_000;
/// Frames a freshly spawned good survives before expiring.
pub const GOODS_TTL: u32 = 1_000;
/// Last frame of a match.
pub const FINAL_FRAME: u32 = 15_000;
/// Side length of the square berth footprint, in cells.
pub const BERTH_SIDE: i32 = 4;
/// Number of storage slots a berth offers (its full footprint).
pub const BERTH_STORAGE_SLOTS: usize = 16;

/// Location of a single grid cell expressed as row and column coordinates.
///
/// Ordered lexicographically (row first) so collections of points iterate
/// deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    row: i32,
    col: i32,
}

impl Point {
    /// Creates a new grid point.
    #[must_use]
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Zero-based row index of the point.
    #[must_use]
    pub const fn row(&self) -> i32 {
        self.row
    }

    /// Zero-based column index of the point.
    #[must_use]
    pub const fn col(&self) -> i32 {
        self.col
    }

    /// Manhattan distance to another point.
    #[must_use]
    pub const fn manhattan(&self, other: Point) -> u32 {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }

    /// The adjacent point one step along the given orientation.
    #[must_use]
    pub const fn step(&self, orientation: Orientation) -> Self {
        let (dr, dc) = orientation.offset();
        Self {
            row: self.row + dr,
            col: self.col + dc,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Cardinal orientation on the grid, matching the judge's direction codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Orientation {
    /// Toward increasing column indices (judge code 0).
    East,
    /// Toward decreasing column indices (judge code 1).
    West,
    /// Toward decreasing row indices (judge code 2).
    North,
    /// Toward increasing row indices (judge code 3).
    South,
}

impl Orientation {
    /// All four orientations in judge-code order.
    pub const ALL: [Orientation; 4] = [
        Orientation::East,
        Orientation::West,
        Orientation::North,
        Orientation::South,
    ];

    /// The `(row, col)` delta of one step along this orientation.
    #[must_use]
    pub const fn offset(&self) -> (i32, i32) {
        match self {
            Orientation::East => (0, 1),
            Orientation::West => (0, -1),
            Orientation::North => (-1, 0),
            Orientation::South => (1, 0),
        }
    }

    /// The judge wire code for a `move` in this direction.
    #[must_use]
    pub const fn wire_code(&self) -> u8 {
        match self {
            Orientation::East => 0,
            Orientation::West => 1,
            Orientation::North => 2,
            Orientation::South => 3,
        }
    }

    /// Orientation after a quarter turn clockwise.
    #[must_use]
    pub const fn clockwise(&self) -> Self {
        match self {
            Orientation::East => Orientation::South,
            Orientation::South => Orientation::West,
            Orientation::West => Orientation::North,
            Orientation::North => Orientation::East,
        }
    }

    /// Orientation after a quarter turn counter-clockwise.
    #[must_use]
    pub const fn counter_clockwise(&self) -> Self {
        match self {
            Orientation::East => Orientation::North,
            Orientation::North => Orientation::West,
            Orientation::West => Orientation::South,
            Orientation::South => Orientation::East,
        }
    }

    /// Orientation of the unit step from `from` to an adjacent point `to`.
    #[must_use]
    pub fn between(from: Point, to: Point) -> Option<Self> {
        let dr = to.row() - from.row();
        let dc = to.col() - from.col();
        match (dr, dc) {
            (0, 1) => Some(Orientation::East),
            (0, -1) => Some(Orientation::West),
            (-1, 0) => Some(Orientation::North),
            (1, 0) => Some(Orientation::South),
            _ => None,
        }
    }
}

/// Rotation sense for the judge's `rot` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rotation {
    /// Quarter turn clockwise (judge code 0).
    Clockwise,
    /// Quarter turn counter-clockwise (judge code 1).
    CounterClockwise,
}

impl Rotation {
    /// The judge wire code for this rotation sense.
    #[must_use]
    pub const fn wire_code(&self) -> u8 {
        match self {
            Rotation::Clockwise => 0,
            Rotation::CounterClockwise => 1,
        }
    }
}

/// Position plus heading of a ship; the unit of the ship search space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShipPose {
    pos: Point,
    orientation: Orientation,
}

impl ShipPose {
    /// Creates a new pose from an anchor point and a heading.
    #[must_use]
    pub const fn new(pos: Point, orientation: Orientation) -> Self {
        Self { pos, orientation }
    }

    /// Anchor point of the pose.
    #[must_use]
    pub const fn pos(&self) -> Point {
        self.pos
    }

    /// Heading of the pose.
    #[must_use]
    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// The two cells occupied by a ship in this pose: the anchor and the
    /// cell one step along the heading (a 1×2 or 2×1 rectangle).
    #[must_use]
    pub const fn footprint(&self) -> [Point; 2] {
        [self.pos, self.pos.step(self.orientation)]
    }

    /// Pose after moving forward one cell.
    #[must_use]
    pub const fn forward(&self) -> Self {
        Self {
            pos: self.pos.step(self.orientation),
            orientation: self.orientation,
        }
    }

    /// Pose after rotating a quarter turn clockwise in place.
    #[must_use]
    pub const fn rotated_clockwise(&self) -> Self {
        Self {
            pos: self.pos,
            orientation: self.orientation.clockwise(),
        }
    }

    /// Pose after rotating a quarter turn counter-clockwise in place.
    #[must_use]
    pub const fn rotated_counter_clockwise(&self) -> Self {
        Self {
            pos: self.pos,
            orientation: self.orientation.counter_clockwise(),
        }
    }

    /// True when the two poses' footprints share at least one cell.
    #[must_use]
    pub fn overlaps(&self, other: &ShipPose) -> bool {
        let mine = self.footprint();
        other.footprint().iter().any(|cell| mine.contains(cell))
    }

    /// True when the pose's footprint covers the given point.
    #[must_use]
    pub fn covers(&self, point: Point) -> bool {
        self.footprint().contains(&point)
    }
}

impl fmt::Display for ShipPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:?}", self.pos, self.orientation)
    }
}

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new identifier with the provided numeric value.
            #[must_use]
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            /// Retrieves the numeric representation of the identifier.
            #[must_use]
            pub const fn get(&self) -> u32 {
                self.0
            }

            /// The identifier as a dense vector index.
            #[must_use]
            pub const fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// Unique identifier assigned to a land robot.
    RobotId
);
id_newtype!(
    /// Unique identifier assigned to a ship.
    ShipId
);
id_newtype!(
    /// Unique identifier assigned to a berth.
    BerthId
);
id_newtype!(
    /// Unique identifier assigned to a good; monotonic over a match.
    GoodsId
);

/// A command emitted back to the judge; `Display` renders the wire text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Step a robot one cell in the given direction.
    Move {
        /// Robot being moved.
        robot: RobotId,
        /// Direction of the step.
        direction: Orientation,
    },
    /// Pick up the good underneath a robot.
    Get {
        /// Robot collecting the good.
        robot: RobotId,
    },
    /// Drop the carried good onto the berth cell underneath a robot.
    Pull {
        /// Robot releasing the good.
        robot: RobotId,
    },
    /// Advance a ship one cell along its heading.
    Ship {
        /// Ship being advanced.
        ship: ShipId,
    },
    /// Rotate a ship a quarter turn.
    Rot {
        /// Ship being rotated.
        ship: ShipId,
        /// Sense of the rotation.
        rotation: Rotation,
    },
    /// Dock a ship onto the berth it is standing on.
    Berth {
        /// Ship docking.
        ship: ShipId,
    },
    /// Push a ship off its berth back onto open water.
    Dept {
        /// Ship departing.
        ship: ShipId,
    },
    /// Buy a robot at the given shop cell.
    BuyRobot {
        /// Shop cell the robot spawns on.
        at: Point,
    },
    /// Buy a ship at the given shop cell.
    BuyShip {
        /// Shop cell the ship spawns on.
        at: Point,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { robot, direction } => {
                write!(f, "move {robot} {}", direction.wire_code())
            }
            Command::Get { robot } => write!(f, "get {robot}"),
            Command::Pull { robot } => write!(f, "pull {robot}"),
            Command::Ship { ship } => write!(f, "ship {ship}"),
            Command::Rot { ship, rotation } => {
                write!(f, "rot {ship} {}", rotation.wire_code())
            }
            Command::Berth { ship } => write!(f, "berth {ship}"),
            Command::Dept { ship } => write!(f, "dept {ship}"),
            Command::BuyRobot { at } => write!(f, "lbot {} {}", at.row(), at.col()),
            Command::BuyShip { at } => write!(f, "lboat {} {}", at.row(), at.col()),
        }
    }
}

/// Error kinds surfaced by the simulation core.
///
/// The first four are recoverable: the affected agent reverts to idle and
/// the scheduler retries next frame. The last two are logged; the frame
/// still terminates normally to keep the judge in sync.
#[derive(Debug, Error)]
pub enum SimError {
    /// No path exists between the two cells under the current overlay.
    #[error("no path from {start} to {goal}")]
    PathNotFound {
        /// Requested start cell.
        start: Point,
        /// Requested goal cell.
        goal: Point,
    },
    /// The pathfinder exhausted its node-expansion budget.
    #[error("pathfinder budget exceeded searching from {start}")]
    PathfinderBudgetExceeded {
        /// Requested start cell.
        start: Point,
    },
    /// Funds or fleet caps forbid every candidate purchase.
    #[error("no purchase affordable with {funds} funds")]
    NoPurchaseAffordable {
        /// Funds available when the decision was made.
        funds: u32,
    },
    /// No unassigned good is reachable and profitable for the robot.
    #[error("no assignable good for robot {robot}")]
    NoAssignableGood {
        /// Robot left without an assignment.
        robot: RobotId,
    },
    /// A command could not be encoded or was rejected before emission.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    /// An internal invariant did not hold; the frame continues degraded.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolated(String),
}

/// Wall-clock budget of a single frame.
///
/// Planning stages consult it before expensive work; once exhausted,
/// remaining replans are skipped and reported as budget failures rather
/// than blowing the judge's deadline.
#[derive(Clone, Copy, Debug)]
pub struct FrameBudget {
    started: Instant,
    limit: Duration,
}

impl FrameBudget {
    /// Starts the clock for the current frame.
    #[must_use]
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// True when the frame has spent its allotted wall-clock time.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// Time spent in the frame so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Policy knobs read by the scheduler, controllers, and asset manager.
///
/// Defaults reproduce the tuning the bot ships with; a JSON file supplied to
/// the judge adapter overrides individual fields.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Number of berth clusters used by partition scheduling.
    pub cluster_count: usize,
    /// Weight applied to a good's value when scoring it against path cost.
    pub ttl_profit_weight: f64,
    /// Restrict each robot to goods routed to its berth cluster.
    pub partition_scheduling: bool,
    /// Rebalance robots between clusters while partition scheduling is on.
    pub dynamic_partition_scheduling: bool,
    /// Frames between dynamic rebalancing passes.
    pub dynamic_scheduling_interval: u32,
    /// Fraction of the mean cluster value below which a robot is released.
    pub robot_release_bound: f64,
    /// Most robots the asset manager may own.
    pub max_robots: usize,
    /// Most ships the asset manager may own.
    pub max_ships: usize,
    /// Earliest frame at which a second ship may be bought.
    pub time_to_buy_ship: u32,
    /// Weight of land-distance coverage when valuing a berth for purchase.
    pub land_distance_weight: f64,
    /// Weight of delivery-distance when valuing a berth for purchase.
    pub delivery_distance_weight: f64,
    /// Loaded-capacity ratio at which a ship may depart for delivery.
    pub able_depart_scale: f64,
    /// Most ships allowed to target one berth at a time.
    pub max_ships_per_berth: usize,
    /// Frames a docked ship waits for cargo before giving up.
    pub ship_wait_time_limit: u32,
    /// Node-expansion cap for a single pathfinding call.
    pub pathfinder_node_budget: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            cluster_count: 4,
            ttl_profit_weight: 1.5,
            partition_scheduling: true,
            dynamic_partition_scheduling: true,
            dynamic_scheduling_interval: 200,
            robot_release_bound: 0.5,
            max_robots: 12,
            max_ships: 3,
            time_to_buy_ship: 50,
            land_distance_weight: 10.0,
            delivery_distance_weight: 10.0,
            able_depart_scale: 0.15,
            max_ships_per_berth: 1,
            ship_wait_time_limit: 5,
            pathfinder_node_budget: 20_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_distance_is_symmetric() {
        let a = Point::new(2, 3);
        let b = Point::new(5, 1);
        assert_eq!(a.manhattan(b), 5);
        assert_eq!(b.manhattan(a), 5);
    }

    #[test]
    fn points_order_lexicographically() {
        let mut points = vec![Point::new(1, 5), Point::new(0, 9), Point::new(1, 2)];
        points.sort();
        assert_eq!(
            points,
            vec![Point::new(0, 9), Point::new(1, 2), Point::new(1, 5)]
        );
    }

    #[test]
    fn orientation_between_adjacent_points() {
        let origin = Point::new(3, 3);
        assert_eq!(
            Orientation::between(origin, Point::new(3, 4)),
            Some(Orientation::East)
        );
        assert_eq!(
            Orientation::between(origin, Point::new(2, 3)),
            Some(Orientation::North)
        );
        assert_eq!(Orientation::between(origin, Point::new(4, 4)), None);
        assert_eq!(Orientation::between(origin, origin), None);
    }

    #[test]
    fn rotations_cycle_through_all_headings() {
        let mut orientation = Orientation::East;
        for _ in 0..4 {
            orientation = orientation.clockwise();
        }
        assert_eq!(orientation, Orientation::East);
        assert_eq!(
            Orientation::North.clockwise().counter_clockwise(),
            Orientation::North
        );
    }

    #[test]
    fn ship_footprint_spans_two_cells() {
        let pose = ShipPose::new(Point::new(4, 4), Orientation::South);
        assert_eq!(pose.footprint(), [Point::new(4, 4), Point::new(5, 4)]);

        let east = ShipPose::new(Point::new(4, 4), Orientation::East);
        assert!(pose.overlaps(&east));
        let far = ShipPose::new(Point::new(9, 9), Orientation::East);
        assert!(!pose.overlaps(&far));
    }

    #[test]
    fn commands_render_wire_text() {
        let samples = [
            (
                Command::Move {
                    robot: RobotId::new(3),
                    direction: Orientation::North,
                },
                "move 3 2",
            ),
            (
                Command::Get {
                    robot: RobotId::new(0),
                },
                "get 0",
            ),
            (
                Command::Pull {
                    robot: RobotId::new(7),
                },
                "pull 7",
            ),
            (
                Command::Ship {
                    ship: ShipId::new(1),
                },
                "ship 1",
            ),
            (
                Command::Rot {
                    ship: ShipId::new(2),
                    rotation: Rotation::CounterClockwise,
                },
                "rot 2 1",
            ),
            (
                Command::Berth {
                    ship: ShipId::new(0),
                },
                "berth 0",
            ),
            (
                Command::Dept {
                    ship: ShipId::new(4),
                },
                "dept 4",
            ),
            (
                Command::BuyRobot {
                    at: Point::new(12, 34),
                },
                "lbot 12 34",
            ),
            (
                Command::BuyShip {
                    at: Point::new(0, 199),
                },
                "lboat 0 199",
            ),
        ];
        for (command, wire) in samples {
            assert_eq!(command.to_string(), wire);
        }
    }

    #[test]
    fn tuning_defaults_match_shipped_policy() {
        let tuning = Tuning::default();
        assert_eq!(tuning.cluster_count, 4);
        assert!(tuning.partition_scheduling);
        assert_eq!(tuning.max_ships_per_berth, 1);
        assert!((tuning.able_depart_scale - 0.15).abs() < f64::EPSILON);
    }
}
