#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative world state for the Quayside harbor bot.
//!
//! The world owns the map, the central goods store, and the berth, robot,
//! and ship fleets; every other component refers to entities by id. Each
//! frame begins with [`World::ingest`], which applies the judge's
//! authoritative report before any scheduling or planning runs.

pub mod berth;
pub mod goods;
pub mod map;
pub mod robot;
pub mod ship;

use quayside_core::{BerthId, GoodsId, Orientation, Point, RobotId, ShipId, ShipPose};
use tracing::warn;

pub use berth::Berth;
pub use goods::{Goods, GoodsStatus, GoodsStore};
pub use map::{Cell, ComponentLabels, Map, MapParseError, Neighbors, OverlayScope};
pub use robot::{Robot, RobotState};
pub use ship::{Ship, ShipCondition, ShipMission};

/// One robot line of a judge frame.
#[derive(Clone, Copy, Debug)]
pub struct RobotReport {
    /// True when the judge sees the robot holding a good.
    pub carrying: bool,
    /// Authoritative robot position.
    pub pos: Point,
    /// Judge motion state; `0` means stunned.
    pub motion_state: u8,
}

/// One ship line of a judge frame.
#[derive(Clone, Copy, Debug)]
pub struct ShipReport {
    /// Judge ship state: 0 normal, 1 recovering, 2 loading.
    pub state: u8,
    /// Berth the ship is at, or negative when at sea.
    pub berth: i32,
}

/// Everything the judge reports for one tick.
#[derive(Clone, Debug, Default)]
pub struct FrameInput {
    /// Frame number.
    pub frame: u32,
    /// Current funds.
    pub funds: u32,
    /// Goods that appeared this frame: position and value.
    pub new_goods: Vec<(Point, u32)>,
    /// Per-robot reports, in robot id order.
    pub robots: Vec<RobotReport>,
    /// Per-ship reports, in ship id order.
    pub ships: Vec<ShipReport>,
}

/// The authoritative world the frame pipeline mutates in place.
#[derive(Clone, Debug)]
pub struct World {
    /// Shared grid with distance fields and the transient overlay.
    pub map: Map,
    /// Central goods store.
    pub goods: GoodsStore,
    /// Berths in id order.
    pub berths: Vec<Berth>,
    /// Robot fleet in id order.
    pub robots: Vec<Robot>,
    /// Ship fleet in id order.
    pub ships: Vec<Ship>,
    /// Delivery points scanned from the map, row-major.
    pub delivery_points: Vec<Point>,
    /// Robot shop cells scanned from the map, row-major.
    pub robot_shops: Vec<Point>,
    /// Ship shop cells scanned from the map, row-major.
    pub ship_shops: Vec<Point>,
    /// Capacity shared by every ship, from the init block.
    pub ship_capacity: u32,
    /// Current frame number.
    pub frame: u32,
    /// Current funds.
    pub funds: u32,
}

impl World {
    /// Assembles the world after the init block: scans the map for shops and
    /// delivery points and precomputes every berth distance field.
    #[must_use]
    pub fn new(mut map: Map, berths: Vec<Berth>, ship_capacity: u32) -> Self {
        let mut delivery_points = Vec::new();
        let mut robot_shops = Vec::new();
        let mut ship_shops = Vec::new();
        for row in 0..map.rows() {
            for col in 0..map.cols() {
                let p = Point::new(row, col);
                match map.cell(p) {
                    Cell::Delivery => delivery_points.push(p),
                    Cell::RobotShop => robot_shops.push(p),
                    Cell::ShipShop => ship_shops.push(p),
                    _ => {}
                }
            }
        }

        for berth in &berths {
            map.compute_berth_distances(berth.id(), &berth.footprint());
        }

        Self {
            map,
            goods: GoodsStore::new(),
            berths,
            robots: Vec::new(),
            ships: Vec::new(),
            delivery_points,
            robot_shops,
            ship_shops,
            ship_capacity,
            frame: 0,
            funds: quayside_core::INITIAL_FUNDS,
        }
    }

    /// Adds a robot to the fleet and returns its id. The judge confirms the
    /// spawn position on the next frame.
    pub fn add_robot(&mut self, pos: Point) -> RobotId {
        let id = RobotId::new(self.robots.len() as u32);
        self.robots.push(Robot::new(id, pos));
        id
    }

    /// Adds a ship to the fleet and returns its id.
    pub fn add_ship(&mut self, pos: Point) -> ShipId {
        let id = ShipId::new(self.ships.len() as u32);
        self.ships.push(Ship::new(
            id,
            ShipPose::new(pos, Orientation::East),
            self.ship_capacity,
        ));
        id
    }

    /// Looks up the berth covering `p`, if any.
    #[must_use]
    pub fn berth_at(&self, p: Point) -> Option<BerthId> {
        self.berths
            .iter()
            .find(|berth| berth.contains(p))
            .map(Berth::id)
    }

    /// Applies one judge frame: authoritative agent state, new goods, TTL
    /// expiry, overlay reset, and the per-berth routing lists.
    ///
    /// The previous frame must have released every transient block; a
    /// leaked reservation is logged and swept before anything else runs.
    pub fn ingest(&mut self, input: &FrameInput) {
        if !self.map.overlay_is_clear() {
            warn!(frame = input.frame, "transient overlay leaked across frames");
            self.map.clear_transient_blocks();
        }

        self.frame = input.frame;
        self.funds = input.funds;

        for &(pos, value) in &input.new_goods {
            let _ = self.goods.spawn(pos, value, input.frame);
        }

        if input.robots.len() != self.robots.len() {
            warn!(
                reported = input.robots.len(),
                tracked = self.robots.len(),
                "robot fleet size mismatch"
            );
        }
        for (robot, report) in self.robots.iter_mut().zip(&input.robots) {
            let had_cargo = robot.cargo();
            robot.ingest_report(report.pos, report.carrying, report.motion_state == 0);
            if let (Some(goods), None) = (had_cargo, robot.cargo()) {
                // The judge dropped the carrying flag; its view wins.
                self.goods.release(goods);
            }
        }

        if input.ships.len() != self.ships.len() {
            warn!(
                reported = input.ships.len(),
                tracked = self.ships.len(),
                "ship fleet size mismatch"
            );
        }
        for (ship, report) in self.ships.iter_mut().zip(&input.ships) {
            let berth = (report.berth >= 0).then(|| BerthId::new(report.berth as u32));
            ship.ingest_report(ShipCondition::from_wire(report.state), berth);
        }

        let expired = self.goods.tick_expiry();
        for id in &expired {
            for robot in &mut self.robots {
                if robot.target_goods() == Some(*id) {
                    robot.abort_task();
                }
            }
        }

        self.rebuild_berth_routing();
    }

    /// Rebuilds each berth's `reached`/`unreached` lists from the stores.
    fn rebuild_berth_routing(&mut self) {
        let mut reached: Vec<Vec<GoodsId>> = vec![Vec::new(); self.berths.len()];
        let mut unreached: Vec<Vec<GoodsId>> = vec![Vec::new(); self.berths.len()];

        for good in self.goods.iter() {
            if let Some(berth) = good.stored_at() {
                if let Some(list) = reached.get_mut(berth.index()) {
                    list.push(good.id());
                }
            }
        }
        for robot in &self.robots {
            if let (Some(berth), Some(cargo)) = (robot.target_berth(), robot.cargo()) {
                if let Some(list) = unreached.get_mut(berth.index()) {
                    list.push(cargo);
                }
            }
        }

        for ((berth, reached), unreached) in self
            .berths
            .iter_mut()
            .zip(reached.into_iter())
            .zip(unreached.into_iter())
        {
            berth.set_routing(reached, unreached);
        }
    }

    /// Sum of the values of the goods stored at a berth.
    #[must_use]
    pub fn berth_stored_value(&self, berth: BerthId) -> u32 {
        let Some(berth) = self.berths.get(berth.index()) else {
            return 0;
        };
        berth
            .stored_goods()
            .filter_map(|id| self.goods.get(id))
            .map(Goods::value)
            .sum()
    }

    /// Number of ships currently docked at or routed to a berth.
    #[must_use]
    pub fn ships_bound_for(&self, berth: BerthId) -> usize {
        self.ships
            .iter()
            .filter(|ship| {
                ship.berth() == Some(berth)
                    && matches!(
                        ship.mission(),
                        ShipMission::MovingToBerth | ShipMission::Loading
                    )
            })
            .count()
    }
}
