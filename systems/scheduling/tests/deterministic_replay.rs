//! Deterministic replay of the scheduler: scripted goods flow through two
//! robots, two berths, and one ship, with every decision fingerprinted.
//!
//! Motion is a one-cell-per-frame Manhattan walk stand-in, so the replay
//! exercises only the assignment policies, not the controllers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use quayside_core::{BerthId, Point, ShipPose, Tuning};
use quayside_system_scheduling::{apply_robot_action, apply_ship_action, Scheduler};
use quayside_world::{
    Berth, FrameInput, Map, RobotReport, RobotState, ShipMission, ShipReport, World,
};

const FRAMES: u32 = 80;

/// `(spawn frame, (row, col), value)` of every scripted good.
const GOODS_SCRIPT: &[(u32, (i32, i32), u32)] = &[
    (2, (5, 5), 80),
    (4, (2, 9), 60),
    (8, (9, 2), 40),
    (12, (6, 1), 70),
    (20, (3, 3), 30),
    (28, (10, 10), 90),
];

#[derive(Debug, Default)]
struct ReplayStats {
    ship_ever_loaded: bool,
    berth_ever_stocked: bool,
}

fn harbor_world() -> World {
    let lines: Vec<String> = (0..12).map(|_| ".".repeat(12)).collect();
    let map = Map::from_lines(&lines).expect("map parses");
    let berths = vec![
        Berth::new(BerthId::new(0), Point::new(8, 0), 2, 3),
        Berth::new(BerthId::new(1), Point::new(0, 8), 2, 3),
    ];
    let mut world = World::new(map, berths, 10);
    world.delivery_points.push(Point::new(11, 11));

    let _ = world.add_robot(Point::new(0, 0));
    let _ = world.add_robot(Point::new(11, 11));
    let _ = world.add_ship(Point::new(8, 0));
    world
}

fn step_toward(from: Point, to: Point) -> Point {
    if from.row() != to.row() {
        Point::new(from.row() + (to.row() - from.row()).signum(), from.col())
    } else if from.col() != to.col() {
        Point::new(from.row(), from.col() + (to.col() - from.col()).signum())
    } else {
        from
    }
}

/// Runs the scheduling mill for [`FRAMES`] frames, folding every action and
/// every observable state change into one fingerprint.
fn replay() -> (u64, ReplayStats) {
    let mut world = harbor_world();
    let mut scheduler = Scheduler::new(Tuning {
        dynamic_scheduling_interval: 25,
        ..Tuning::default()
    });
    let mut hasher = DefaultHasher::new();
    let mut stats = ReplayStats::default();

    for frame in 1..=FRAMES {
        let new_goods: Vec<(Point, u32)> = GOODS_SCRIPT
            .iter()
            .filter(|(spawn, _, _)| *spawn == frame)
            .map(|(_, (row, col), value)| (Point::new(*row, *col), *value))
            .collect();
        let robots = world
            .robots
            .iter()
            .map(|robot| {
                let pos = match robot.destination() {
                    Some(dest) => step_toward(robot.pos(), dest),
                    None => robot.pos(),
                };
                RobotReport {
                    carrying: robot.carrying(),
                    pos,
                    motion_state: 1,
                }
            })
            .collect();
        let ships = world
            .ships
            .iter()
            .map(|_| ShipReport { state: 0, berth: -1 })
            .collect();
        world.ingest(&FrameInput {
            frame,
            funds: world.funds,
            new_goods,
            robots,
            ships,
        });

        resolve_arrivals(&mut world);

        scheduler.prepare(&world);
        for index in 0..world.robots.len() {
            let robot = world.robots[index].id();
            let action = scheduler.schedule_robot(&world.robots[index], &world);
            format!("{action:?}").hash(&mut hasher);
            apply_robot_action(&mut world, robot, action);
        }
        for (ship, action) in scheduler.schedule_ships(&world) {
            format!("{action:?}").hash(&mut hasher);
            apply_ship_action(&mut world, ship, action);
        }
        for ship in &mut world.ships {
            ship.take_departure_request().hash(&mut hasher);
        }

        sail_one_step(&mut world);

        for robot in &world.robots {
            robot.pos().hash(&mut hasher);
            robot.carrying().hash(&mut hasher);
        }
        for ship in &world.ships {
            ship.pose().hash(&mut hasher);
            ship.goods_count().hash(&mut hasher);
            stats.ship_ever_loaded |= ship.goods_count() > 0;
        }
        for berth in &world.berths {
            berth.stored_count().hash(&mut hasher);
            stats.berth_ever_stocked |= berth.stored_count() > 0;
        }
    }
    (hasher.finish(), stats)
}

/// Pickup, drop-off, docking, and loading stand-ins for the controllers.
fn resolve_arrivals(world: &mut World) {
    for index in 0..world.robots.len() {
        let robot = &world.robots[index];
        if robot.destination() != Some(robot.pos()) {
            continue;
        }
        match robot.state() {
            RobotState::MovingToGoods => {
                if let Some(goods) = robot.target_goods() {
                    world.goods.mark_carried(goods);
                    world.robots[index].complete_pickup(goods);
                }
            }
            RobotState::MovingToBerth => {
                if let (Some(berth), Some(goods)) = (robot.target_berth(), robot.cargo()) {
                    if world.berths[berth.index()].store(goods) {
                        world.goods.mark_stored(goods, berth);
                        let _ = world.robots[index].complete_dropoff();
                    }
                }
            }
            _ => {}
        }
    }

    for index in 0..world.ships.len() {
        if world.ships[index].reached_destination() {
            match world.ships[index].mission() {
                ShipMission::MovingToBerth => world.ships[index].begin_loading(),
                ShipMission::MovingToDelivery => {
                    let _ = world.ships[index].unload();
                    world.ships[index].reset_departure();
                }
                _ => {}
            }
        }
        if world.ships[index].mission() != ShipMission::Loading {
            continue;
        }
        let Some(berth) = world.ships[index].berth() else {
            continue;
        };
        let velocity = world.berths[berth.index()].loading_velocity() as usize;
        let room = world.ships[index].remaining_capacity() as usize;
        let taken = world.berths[berth.index()].take_stored(velocity.min(room));
        let fed = !taken.is_empty();
        for goods in taken {
            let value = world.goods.get(goods).map_or(0, |good| good.value());
            let _ = world.ships[index].load_one(value);
            world.goods.mark_shipped(goods);
        }
        world.ships[index].tick_dwell(fed);
    }
}

/// Walks every routed ship one Manhattan step toward its destination.
fn sail_one_step(world: &mut World) {
    for ship in &mut world.ships {
        let pose = ship.pose();
        let Some(dest) = ship.destination() else {
            continue;
        };
        if pose.pos() == dest.pos() {
            continue;
        }
        let next = ShipPose::new(step_toward(pose.pos(), dest.pos()), pose.orientation());
        ship.set_path(vec![next]);
        ship.update_next_pose();
    }
}

#[test]
fn replay_is_deterministic() {
    let (first, _) = replay();
    let (second, _) = replay();
    assert_eq!(first, second, "replay diverged between runs");
}

#[test]
fn goods_flow_from_ground_to_berth_to_ship() {
    let (_, stats) = replay();
    assert!(stats.berth_ever_stocked, "no good ever reached a berth");
    assert!(stats.ship_ever_loaded, "the ship never took cargo aboard");
}
