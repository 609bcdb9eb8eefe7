use std::path::PathBuf;

use clap::Parser;
use fluxgrid::config::load_ron;

use crate::init::RunSettings;
use crate::scene::SceneDescription;

mod init;
mod scene;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// RON scene file to simulate.
    #[arg(short, long, default_value = "runner/scenes/demo.ron")]
    scene: PathBuf,

    /// Number of ticks to run before exiting.
    #[arg(short, long, default_value_t = 600)]
    ticks: u64,

    /// Ticks per second.
    #[arg(short = 'r', long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Overrides the seed of every splat source.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    let args = Args::parse();

    if !(args.tick_rate > 0.0 && args.tick_rate <= 1000.0) {
        eprintln!("Error: tick_rate must be above 0 and at most 1000.");
        eprintln!("Got: {}", args.tick_rate);
        std::process::exit(1);
    }

    let scene: SceneDescription = match load_ron(&args.scene) {
        Ok(scene) => scene,
        Err(err) => {
            eprintln!("Failed to load scene {}: {err}", args.scene.display());
            std::process::exit(1);
        }
    };

    init::init(
        scene,
        RunSettings {
            ticks: args.ticks,
            tick_rate: args.tick_rate,
            seed: args.seed,
        },
    );
}
