#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Stdio adapter driving the Quayside bot against the judge.
//!
//! stdout belongs to the judge protocol; logging goes to stderr or to a
//! file. Each tick runs the fixed pipeline: ingest, cargo lifecycle,
//! scheduling, robot control, ship control, purchases, emit.

mod protocol;

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use quayside_core::{BerthId, Command, FrameBudget, Point, Tuning};
use quayside_system_asset_management::{
    make_purchase_decision, AssetKind, EarlyGameAssetManager, PurchasePolicy,
};
use quayside_system_robot_control::RobotController;
use quayside_system_scheduling::{apply_robot_action, apply_ship_action, Scheduler};
use quayside_system_ship_control::ShipController;
use quayside_system_single_lane::SingleLaneIndex;
use quayside_world::{Berth, Map, World};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments of the judge adapter.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Number of map rows announced by the judge.
    #[arg(long, default_value_t = 200)]
    rows: usize,
    /// Number of map columns announced by the judge.
    #[arg(long, default_value_t = 200)]
    cols: usize,
    /// Number of berths announced by the judge.
    #[arg(long = "berth-count", default_value_t = 10)]
    berth_count: usize,
    /// Robots already on the map when the match starts.
    #[arg(long = "initial-robots", default_value_t = 0)]
    initial_robots: usize,
    /// Ships already afloat when the match starts.
    #[arg(long = "initial-ships", default_value_t = 0)]
    initial_ships: usize,
    /// Wall-clock budget per frame, in milliseconds.
    #[arg(long = "frame-budget-ms", default_value_t = 14)]
    frame_budget_ms: u64,
    /// JSON file overriding individual tuning knobs.
    #[arg(long)]
    tuning: Option<PathBuf>,
    /// Log to this file instead of stderr.
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_file.as_deref())?;

    let tuning = load_tuning(args.tuning.as_deref())?;
    info!(?tuning, "quayside starting");

    let stdin = io::stdin();
    let mut reader = protocol::TokenReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());

    let Some(setup) = protocol::read_setup(&mut reader, args.rows, args.berth_count)? else {
        info!("judge closed the stream during setup");
        return Ok(());
    };
    let map = Map::from_lines(&setup.map_lines).context("parsing the judge map")?;
    if map.cols() != args.cols as i32 {
        warn!(
            expected = args.cols,
            got = map.cols(),
            "map width differs from the announced column count"
        );
    }
    let berths: Vec<Berth> = setup
        .berths
        .iter()
        .map(|&(id, anchor, docking_delay, loading_velocity)| {
            Berth::new(BerthId::new(id), anchor, docking_delay, loading_velocity)
        })
        .collect();
    let mut world = World::new(map, berths, setup.ship_capacity);

    for _ in 0..args.initial_robots {
        let spawn = world.robot_shops.first().copied().unwrap_or(Point::new(0, 0));
        let _ = world.add_robot(spawn);
    }
    for _ in 0..args.initial_ships {
        let spawn = initial_ship_spawn(&world);
        let _ = world.add_ship(spawn);
    }

    let mut lanes = SingleLaneIndex::build(&world.map);
    let mut scheduler = Scheduler::new(tuning.clone());
    let mut robot_controller = RobotController::new(tuning.pathfinder_node_budget);
    let mut ship_controller = ShipController::new(tuning.pathfinder_node_budget);
    let mut policy = PurchasePolicy::EarlyGame(EarlyGameAssetManager::new(
        tuning.clone(),
        &world.map,
        &world.berths,
    ));

    protocol::write_commands(&mut writer, &[])?;
    info!(
        rows = world.map.rows(),
        cols = world.map.cols(),
        berths = world.berths.len(),
        "setup complete"
    );

    let frame_budget = Duration::from_millis(args.frame_budget_ms);
    let mut commands: Vec<Command> = Vec::new();

    loop {
        let Some(frame) =
            protocol::read_frame(&mut reader, world.robots.len(), world.ships.len())?
        else {
            info!("judge closed the stream; shutting down");
            return Ok(());
        };
        let budget = FrameBudget::start(frame_budget);
        commands.clear();

        world.ingest(&frame);
        robot_controller.update_cargo(&mut world, &mut commands);

        scheduler.prepare(&world);
        for index in 0..world.robots.len() {
            let robot = world.robots[index].id();
            let action = scheduler.schedule_robot(&world.robots[index], &world);
            apply_robot_action(&mut world, robot, action);
        }
        for (ship, action) in scheduler.schedule_ships(&world) {
            apply_ship_action(&mut world, ship, action);
        }

        robot_controller.run(&mut world, &mut lanes, &budget, &mut commands);
        ship_controller.run(&mut world, &budget, &mut commands);

        for purchase in make_purchase_decision(&mut policy, &world) {
            match purchase.kind {
                AssetKind::Robot => {
                    let _ = world.add_robot(purchase.at);
                    commands.push(Command::BuyRobot { at: purchase.at });
                }
                AssetKind::Ship => {
                    let _ = world.add_ship(purchase.at);
                    commands.push(Command::BuyShip { at: purchase.at });
                }
            }
        }

        protocol::write_commands(&mut writer, &commands)?;
        if budget.exhausted() {
            warn!(
                frame = frame.frame,
                elapsed_ms = budget.elapsed().as_millis() as u64,
                "frame ran over budget"
            );
        }
    }
}

fn init_logging(log_file: Option<&std::path::Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

fn load_tuning(path: Option<&std::path::Path>) -> Result<Tuning> {
    let Some(path) = path else {
        return Ok(Tuning::default());
    };
    let file = File::open(path).with_context(|| format!("opening tuning {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing tuning {}", path.display()))
}

/// Ships with no shop to spawn at appear beside the first berth.
fn initial_ship_spawn(world: &World) -> Point {
    world
        .ship_shops
        .first()
        .copied()
        .or_else(|| world.berths.first().map(Berth::anchor))
        .unwrap_or(Point::new(0, 0))
}
