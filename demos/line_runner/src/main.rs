//! Headless runner: loads a map, spawns its objects and steps the engine.
//!
//! Usage:
//!   line_runner -m demos/maps/sample.json --ticks 600 --run

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use linewalk::{load_map, Engine, Key, PhysicsComponent, PhysicsState, TileMapDescription};

#[derive(Parser)]
#[command(name = "line_runner")]
#[command(about = "Run a line map headless and log what the player does")]
struct Cli {
    /// JSON map description to load
    #[arg(short = 'm', long = "test-map")]
    test_map: PathBuf,

    /// Number of fixed ticks to run
    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// Hold the right key for the whole run
    #[arg(long)]
    run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let desc = TileMapDescription::from_file(&cli.test_map)?;
    let loaded = load_map(&desc).with_context(|| format!("failed to build {}", cli.test_map.display()))?;
    let mut engine = Engine::from_loaded_map(loaded)?;
    if engine.player().is_none() {
        log::warn!("{} has no player start", cli.test_map.display());
    }
    if cli.run {
        engine.handle_key(Key::Right, true);
    }

    let step = engine.config().fixed_delta.as_secs_f64();
    for tick in 0..cli.ticks {
        engine.tick(step)?;
        if tick % 60 == 59 {
            log_player(&engine);
        }
    }
    log::info!(
        "ran {} ticks; {} entities alive",
        engine.ticks(),
        engine.world().len()
    );
    Ok(())
}

fn log_player(engine: &Engine) {
    let Some(player) = engine.player() else {
        log::info!("tick {}: no player", engine.ticks());
        return;
    };
    let Some(pcomp) = engine.world().get::<PhysicsComponent>(player) else {
        return;
    };
    let state = match pcomp.state() {
        PhysicsState::FreeBody(fb) => format!("airborne at {:?} moving {:?}", fb.location, fb.velocity),
        PhysicsState::Tracker(t) => format!("on {:?} at {:.3}, speed {:.3}", t.surface_ref(), t.position, t.speed),
        other => other.kind_name().to_string(),
    };
    log::info!("tick {}: player {}", engine.ticks(), state);
}
