//! End-to-end scenarios driven through the full frame pipeline, with a
//! local stand-in for the judge: reported positions are the cells the
//! controllers proposed on the previous frame.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use quayside_core::{BerthId, Command, FrameBudget, Point, Tuning};
use quayside_system_robot_control::RobotController;
use quayside_system_scheduling::{apply_robot_action, apply_ship_action, Scheduler};
use quayside_system_ship_control::ShipController;
use quayside_system_single_lane::SingleLaneIndex;
use quayside_world::{
    Berth, FrameInput, GoodsStatus, Map, Robot, RobotReport, ShipReport, World,
};

struct Harness {
    world: World,
    scheduler: Scheduler,
    robots: RobotController,
    ships: ShipController,
    lanes: SingleLaneIndex,
    frame: u32,
}

impl Harness {
    fn new(world: World, tuning: Tuning) -> Self {
        let lanes = SingleLaneIndex::build(&world.map);
        Self {
            scheduler: Scheduler::new(tuning),
            robots: RobotController::new(20_000),
            ships: ShipController::new(20_000),
            lanes,
            world,
            frame: 0,
        }
    }

    /// Emulates the judge's view: every agent ends up where the previous
    /// frame's resolution put it.
    fn judge_view(&self) -> FrameInput {
        FrameInput {
            frame: self.frame + 1,
            funds: self.world.funds,
            new_goods: Vec::new(),
            robots: self
                .world
                .robots
                .iter()
                .map(|robot| RobotReport {
                    carrying: robot.carrying(),
                    pos: robot.next_pos(),
                    motion_state: 1,
                })
                .collect(),
            ships: self
                .world
                .ships
                .iter()
                .map(|_| ShipReport { state: 0, berth: -1 })
                .collect(),
        }
    }

    fn tick(&mut self) -> Vec<Command> {
        self.frame += 1;
        let input = self.judge_view();
        let budget = FrameBudget::start(Duration::from_secs(5));
        let mut commands = Vec::new();

        self.world.ingest(&input);
        self.robots.update_cargo(&mut self.world, &mut commands);

        self.scheduler.prepare(&self.world);
        for index in 0..self.world.robots.len() {
            let robot = self.world.robots[index].id();
            let action = self
                .scheduler
                .schedule_robot(&self.world.robots[index], &self.world);
            apply_robot_action(&mut self.world, robot, action);
        }
        for (ship, action) in self.scheduler.schedule_ships(&self.world) {
            apply_ship_action(&mut self.world, ship, action);
        }

        self.robots
            .run(&mut self.world, &mut self.lanes, &budget, &mut commands);
        self.ships.run(&mut self.world, &budget, &mut commands);

        assert!(
            self.world.map.overlay_is_clear(),
            "transient overlay must balance at frame end"
        );
        commands
    }
}

fn open_world_with_berth() -> World {
    let lines: Vec<String> = (0..12).map(|_| ".".repeat(12)).collect();
    let map = Map::from_lines(&lines).expect("map parses");
    let berths = vec![Berth::new(BerthId::new(0), Point::new(8, 0), 2, 3)];
    World::new(map, berths, 10)
}

#[test]
fn single_robot_collects_and_delivers_a_single_good() {
    let mut world = open_world_with_berth();
    let _ = world.add_robot(Point::new(0, 0));
    let goods = world.goods.spawn(Point::new(5, 5), 100, 0);

    let mut harness = Harness::new(world, Tuning::default());
    let mut got_frame = None;
    let mut pulled_frame = None;

    for _ in 0..40 {
        let commands = harness.tick();
        if commands.iter().any(|c| matches!(c, Command::Get { .. })) {
            got_frame = Some(harness.frame);
        }
        if commands.iter().any(|c| matches!(c, Command::Pull { .. })) {
            pulled_frame = Some(harness.frame);
            break;
        }
    }

    // Ten steps to the good, pickup on arrival, five more to the nearest
    // berth cell, then the drop.
    assert_eq!(got_frame, Some(11));
    assert_eq!(pulled_frame, Some(16));
    assert_eq!(
        harness.world.goods.get(goods).unwrap().status(),
        GoodsStatus::Stored
    );
    assert_eq!(harness.world.berth_stored_value(BerthId::new(0)), 100);
    assert_eq!(harness.world.berths[0].stored_count(), 1);
}

#[test]
fn replay_is_deterministic() {
    let run = || -> u64 {
        let mut world = open_world_with_berth();
        let _ = world.add_robot(Point::new(0, 0));
        let _ = world.add_robot(Point::new(11, 11));
        let _ = world.goods.spawn(Point::new(5, 5), 100, 0);
        let _ = world.goods.spawn(Point::new(2, 9), 60, 0);
        let _ = world.goods.spawn(Point::new(9, 6), 30, 0);

        let mut harness = Harness::new(world, Tuning::default());
        let mut hasher = DefaultHasher::new();
        for _ in 0..60 {
            for command in harness.tick() {
                command.to_string().hash(&mut hasher);
            }
            for robot in &harness.world.robots {
                robot.pos().hash(&mut hasher);
            }
        }
        hasher.finish()
    };

    assert_eq!(run(), run(), "replay diverged between runs");
}

#[test]
fn fleet_pipeline_preserves_separation_and_delivers_everything() {
    let mut world = open_world_with_berth();
    let _ = world.add_robot(Point::new(0, 0));
    let _ = world.add_robot(Point::new(0, 11));
    let _ = world.add_robot(Point::new(11, 0));
    let _ = world.add_robot(Point::new(11, 11));
    let spawned: Vec<_> = [
        (Point::new(5, 5), 40),
        (Point::new(6, 6), 40),
        (Point::new(2, 2), 25),
        (Point::new(9, 9), 25),
    ]
    .into_iter()
    .map(|(pos, value)| world.goods.spawn(pos, value, 0))
    .collect();

    let mut harness = Harness::new(
        world,
        Tuning {
            partition_scheduling: false,
            ..Tuning::default()
        },
    );

    for _ in 0..120 {
        let _ = harness.tick();
        let cells: Vec<Point> = harness.world.robots.iter().map(Robot::pos).collect();
        for (i, a) in cells.iter().enumerate() {
            for b in cells.iter().skip(i + 1) {
                assert_ne!(a, b, "two robots share a cell");
            }
        }
    }

    for goods in spawned {
        assert_eq!(
            harness.world.goods.get(goods).unwrap().status(),
            GoodsStatus::Stored,
            "good {goods} should have been delivered"
        );
    }
    assert_eq!(harness.world.berth_stored_value(BerthId::new(0)), 130);
}
