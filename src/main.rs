#[path = "experiments/env_grid.rs"]
mod env_grid;

use std::fs;
use std::path::{Path, PathBuf};

use diamondnet::network::{Network, NetworkConfig};
use tracing::{error, info, warn};

use env_grid::{run_grid_demo, GridConfig};

struct Args {
    episodes: Option<usize>,
    seed: Option<u64>,
    config: Option<PathBuf>,
    load: Option<PathBuf>,
    save: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_help();
            return;
        }
        Err(msg) => {
            eprintln!("{msg}");
            print_help();
            std::process::exit(2);
        }
    };

    let mut cfg = match &args.config {
        Some(path) => match load_config(path) {
            Ok(cfg) => cfg,
            Err(msg) => {
                error!(path = %path.display(), "{msg}");
                std::process::exit(1);
            }
        },
        None => NetworkConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg = cfg.with_seed(seed);
    }
    if let Err(msg) = cfg.validate() {
        error!("invalid config: {msg}");
        std::process::exit(1);
    }

    let mut net = match &args.load {
        Some(path) => match load_network(path) {
            Ok(net) => net,
            Err(msg) => {
                warn!(path = %path.display(), "{msg}; starting fresh");
                Network::new(cfg.clone())
            }
        },
        None => Network::new(cfg.clone()),
    };

    let mut grid = GridConfig::default();
    if let Some(n) = args.episodes {
        grid.episodes = n;
    }
    if let Some(seed) = cfg.seed {
        grid.seed = seed;
    }

    let summary = run_grid_demo(&mut net, grid);
    info!(
        episodes = summary.episodes,
        food = summary.food_eaten,
        best = summary.best_episode,
        walls = summary.wall_hits,
        timeouts = summary.timeouts,
        "run finished"
    );

    if let Some(path) = &args.save {
        match save_network(&net, path) {
            Ok(bytes) => info!(path = %path.display(), bytes, "network saved"),
            Err(msg) => error!(path = %path.display(), "{msg}"),
        }
    }
}

fn parse_args<I: Iterator<Item = String>>(mut it: I) -> Result<Option<Args>, String> {
    let mut args = Args {
        episodes: None,
        seed: None,
        config: None,
        load: None,
        save: None,
    };
    while let Some(flag) = it.next() {
        let mut value = || it.next().ok_or_else(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "-h" | "--help" | "help" => return Ok(None),
            "--episodes" => {
                args.episodes = Some(value()?.parse().map_err(|_| "--episodes expects a number")?)
            }
            "--seed" => args.seed = Some(value()?.parse().map_err(|_| "--seed expects a number")?),
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--load" => args.load = Some(PathBuf::from(value()?)),
            "--save" => args.save = Some(PathBuf::from(value()?)),
            other => return Err(format!("Unknown argument: {other}")),
        }
    }
    Ok(Some(args))
}

fn load_config(path: &Path) -> Result<NetworkConfig, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("cannot read config: {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("cannot parse config: {e}"))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
}

fn load_network(path: &Path) -> Result<Network, String> {
    let loaded = if is_json(path) {
        let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
        Network::from_json(&text)
    } else {
        let bytes = fs::read(path).map_err(|e| e.to_string())?;
        Network::load_image_bytes(&bytes)
    };
    loaded.map_err(|e| e.to_string())
}

fn save_network(net: &Network, path: &Path) -> Result<usize, String> {
    let bytes = if is_json(path) {
        net.to_json().map_err(|e| e.to_string())?.into_bytes()
    } else {
        net.save_image_bytes().map_err(|e| e.to_string())?
    };
    fs::write(path, &bytes).map_err(|e| e.to_string())?;
    Ok(bytes.len())
}

fn print_help() {
    println!("diamondnet: diamond-topology online learner, grid-chase demo");
    println!();
    println!(
        "Usage: diamondnet [--episodes N] [--seed S] [--config FILE] [--load FILE] [--save FILE]"
    );
    println!();
    println!("  --episodes N   number of episodes to run (default 50)");
    println!("  --seed S       seed network init and the environment");
    println!("  --config FILE  JSON NetworkConfig (sizes, seed, learning params)");
    println!("  --load FILE    restore a saved network (.json snapshot or binary image)");
    println!("  --save FILE    save the network after the run (.json or binary image)");
}
