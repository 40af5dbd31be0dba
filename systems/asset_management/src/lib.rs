#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Purchase decisions: when and where to buy robots and ships.
//!
//! The map is carved into land/sea connected blocks at startup; each block
//! aggregates its berths, shops, and delivery points. Per frame the policy
//! returns a list of purchase requests and mutates nothing else, so the
//! frame driver stays in charge of funds and fleet bookkeeping.

use quayside_core::{BerthId, Point, SimError, Tuning, ROBOT_PRICE, SHIP_PRICE};
use quayside_world::{map, Berth, Cell, Map, World};
use tracing::{debug, info};

/// What to buy and where.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Purchase {
    /// Asset class being bought.
    pub kind: AssetKind,
    /// Shop cell the asset spawns on.
    pub at: Point,
}

/// Asset classes the judge sells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    /// A land robot (`lbot`).
    Robot,
    /// A cargo ship (`lboat`).
    Ship,
}

/// One land region together with the sea infrastructure its berths touch.
#[derive(Clone, Debug)]
struct LandSeaBlock {
    berths: Vec<BerthId>,
    robot_shops: Vec<Point>,
    ship_shops: Vec<Point>,
    delivery_points: Vec<Point>,
}

/// Available purchase policies; the frame driver dispatches through
/// [`make_purchase_decision`] and never sees the variants' internals.
#[derive(Debug)]
pub enum PurchasePolicy {
    /// Long-horizon policy tuned for the opening of a match.
    EarlyGame(EarlyGameAssetManager),
}

/// Dispatches a purchase decision to the active policy.
#[must_use]
pub fn make_purchase_decision(policy: &mut PurchasePolicy, world: &World) -> Vec<Purchase> {
    match policy {
        PurchasePolicy::EarlyGame(manager) => manager.make_purchase_decision(world),
    }
}

/// The early-game policy: spend the opening funds on robots in the most
/// valuable land block, then add ships once goods start accumulating.
#[derive(Debug)]
pub struct EarlyGameAssetManager {
    tuning: Tuning,
    blocks: Vec<LandSeaBlock>,
}

impl EarlyGameAssetManager {
    /// Creates the policy and runs the one-off block analysis.
    #[must_use]
    pub fn new(tuning: Tuning, map: &Map, berths: &[Berth]) -> Self {
        let land = map.land_components();
        let sea = map.sea_components();

        let mut blocks: Vec<(u32, LandSeaBlock)> = Vec::new();
        let mut block_for_label = |label: u32, blocks: &mut Vec<(u32, LandSeaBlock)>| -> usize {
            if let Some(index) = blocks.iter().position(|(l, _)| *l == label) {
                return index;
            }
            blocks.push((
                label,
                LandSeaBlock {
                    berths: Vec::new(),
                    robot_shops: Vec::new(),
                    ship_shops: Vec::new(),
                    delivery_points: Vec::new(),
                },
            ));
            blocks.len() - 1
        };

        for berth in berths {
            if let Some(label) = land.label(berth.anchor()) {
                let index = block_for_label(label, &mut blocks);
                blocks[index].1.berths.push(berth.id());
            }
        }
        for row in 0..map.rows() {
            for col in 0..map.cols() {
                let p = Point::new(row, col);
                if matches!(map.cell(p), Cell::RobotShop) {
                    if let Some(label) = land.label(p) {
                        let index = block_for_label(label, &mut blocks);
                        blocks[index].1.robot_shops.push(p);
                    }
                }
            }
        }

        // Sea infrastructure attaches to the land block whose berths share
        // its sea component; berth cells are amphibious, so their sea label
        // bridges the two.
        for (_, block) in &mut blocks {
            let sea_labels: Vec<u32> = block
                .berths
                .iter()
                .filter_map(|berth| {
                    let anchor = berths[berth.index()].anchor();
                    sea.label(anchor)
                })
                .collect();
            for row in 0..map.rows() {
                for col in 0..map.cols() {
                    let p = Point::new(row, col);
                    let Some(label) = sea.label(p) else {
                        continue;
                    };
                    if !sea_labels.contains(&label) {
                        continue;
                    }
                    match map.cell(p) {
                        Cell::ShipShop => block.ship_shops.push(p),
                        Cell::Delivery => block.delivery_points.push(p),
                        _ => {}
                    }
                }
            }
        }

        let blocks: Vec<LandSeaBlock> = blocks.into_iter().map(|(_, block)| block).collect();
        info!(blocks = blocks.len(), "land/sea block analysis complete");
        Self { tuning, blocks }
    }

    /// Decides this frame's purchases without mutating anything.
    #[must_use]
    pub fn make_purchase_decision(&mut self, world: &World) -> Vec<Purchase> {
        let mut purchases = Vec::new();
        let mut funds = world.funds;
        let mut robots = world.robots.iter().filter(|robot| robot.is_live()).count();
        let mut ships = world.ships.len();

        while robots < self.tuning.max_robots
            && funds >= ROBOT_PRICE
            && self.goods_outnumber_robots(world, robots)
        {
            let Some(at) = self.best_robot_shop(world) else {
                break;
            };
            purchases.push(Purchase {
                kind: AssetKind::Robot,
                at,
            });
            funds -= ROBOT_PRICE;
            robots += 1;
        }

        let ship_allowed = ships == 0 || world.frame >= self.tuning.time_to_buy_ship;
        if ships < self.tuning.max_ships && ship_allowed && funds >= SHIP_PRICE {
            if let Some(at) = self.best_ship_shop(world) {
                purchases.push(Purchase {
                    kind: AssetKind::Ship,
                    at,
                });
                funds -= SHIP_PRICE;
                ships += 1;
            }
        }

        if purchases.is_empty() && (robots < self.tuning.max_robots || ships < self.tuning.max_ships)
        {
            debug!(
                error = %SimError::NoPurchaseAffordable { funds },
                "fleet below caps but nothing bought"
            );
        }
        purchases
    }

    /// Buying a robot only pays off while there is more ground cargo than
    /// hands to carry it.
    fn goods_outnumber_robots(&self, world: &World, robots: usize) -> bool {
        let claimable = world
            .goods
            .iter()
            .filter(|good| good.claimable() && good.ttl() > 0)
            .count();
        claimable > robots
    }

    /// The robot shop of the block with the highest aggregate berth value
    /// per robot already working it; within the block, the shop best placed
    /// relative to the block's berths.
    fn best_robot_shop(&self, world: &World) -> Option<Point> {
        let mut best: Option<(f64, Point)> = None;
        for block in &self.blocks {
            if block.robot_shops.is_empty() || block.berths.is_empty() {
                continue;
            }
            let value = block_value(block, world);
            let crews = world
                .robots
                .iter()
                .filter(|robot| {
                    robot.is_live()
                        && block
                            .berths
                            .iter()
                            .any(|berth| world.map.berth_reachable(*berth, robot.pos()))
                })
                .count();
            let score = value / (crews as f64 + 1.0);

            let shop = block
                .robot_shops
                .iter()
                .copied()
                .min_by_key(|shop| {
                    let total: u32 = block
                        .berths
                        .iter()
                        .map(|berth| match world.map.berth_distance(*berth, *shop) {
                            Some(d) if d != map::UNREACHABLE => u32::from(d),
                            _ => 10_000,
                        })
                        .sum();
                    (
                        (f64::from(total) * self.tuning.land_distance_weight) as u64,
                        *shop,
                    )
                })?;

            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, shop));
            }
        }
        best.map(|(_, shop)| shop)
    }

    /// The ship shop with the shortest expected run between the block's
    /// best berth and its delivery points.
    fn best_ship_shop(&self, world: &World) -> Option<Point> {
        let mut best: Option<(f64, Point)> = None;
        for block in &self.blocks {
            if block.ship_shops.is_empty() || block.berths.is_empty() {
                continue;
            }
            let value = block_value(block, world);
            for &shop in &block.ship_shops {
                let to_berth = block
                    .berths
                    .iter()
                    .map(|berth| shop.manhattan(world.berths[berth.index()].anchor()))
                    .min()
                    .unwrap_or(u32::MAX);
                let to_delivery = block
                    .delivery_points
                    .iter()
                    .map(|delivery| shop.manhattan(*delivery))
                    .min()
                    .unwrap_or(u32::MAX / 2);
                let cost = f64::from(to_berth)
                    + f64::from(to_delivery) * self.tuning.delivery_distance_weight;
                let score = value - cost;
                if best.is_none_or(|(best_score, _)| score > best_score) {
                    best = Some((score, shop));
                }
            }
        }
        best.map(|(_, shop)| shop)
    }
}

/// Claimable ground value plus stored value attributable to a block's
/// berths.
fn block_value(block: &LandSeaBlock, world: &World) -> f64 {
    let mut value = 0.0;
    for berth in &block.berths {
        value += f64::from(world.berth_stored_value(*berth));
    }
    for good in world.goods.iter() {
        if !good.claimable() || good.ttl() == 0 {
            continue;
        }
        if block
            .berths
            .iter()
            .any(|berth| world.map.berth_reachable(*berth, good.pos()))
        {
            value += f64::from(good.value());
        }
    }
    value
}
