//! furnisher: score rooms, build dataset archives, inspect checkpoints.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use furnisher_surrogate::dataset::{load_room_records, precompute_dataset, RoomRecord};
use furnisher_surrogate::{Checkpoint, InferenceService, Room, ServiceConfig};

#[derive(Parser)]
#[command(name = "furnisher")]
#[command(about = "Furniture-placement score surrogate")]
#[command(version)]
struct Cli {
    /// Service configuration (TOML). Defaults to ./furnisher.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every room of a fixture file.
    Score {
        /// JSON list of rooms.
        #[arg(long)]
        rooms: PathBuf,

        /// Checkpoint to use instead of the resolved default.
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Rasterize rooms into a compressed .npz archive.
    Rasterize {
        #[arg(long)]
        rooms: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },

    /// Write one room's raster as an RGB png (mask, edges, door).
    Preview {
        #[arg(long)]
        rooms: PathBuf,

        #[arg(long, default_value = "0")]
        index: usize,

        #[arg(long)]
        out: PathBuf,
    },

    /// Print a checkpoint's architecture and normalization statistics.
    Inspect {
        #[arg(long)]
        model: Option<PathBuf>,
    },
}

fn to_rooms(records: &[RoomRecord]) -> anyhow::Result<Vec<Room>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| r.to_room().with_context(|| format!("invalid {}", r.display_name(i))))
        .collect()
}

fn score(service: &InferenceService, rooms: &Path, model: Option<&Path>) -> anyhow::Result<()> {
    let records = load_room_records(rooms)?;
    let mut worst: f64 = 0.0;
    for (i, record) in records.iter().enumerate() {
        let mut request = record.request();
        request.checkpoint = model;
        let name = record.display_name(i);
        let score = service
            .predict(&request)
            .with_context(|| format!("failed to score {name}"))?;
        match record.score {
            Some(expected) => {
                let delta = score - expected;
                worst = worst.max(delta.abs());
                println!("{name:<32} {score:7.2}  (expected {expected:7.2}, delta {delta:+.3})");
            }
            None => println!("{name:<32} {score:7.2}"),
        }
    }
    if records.iter().any(|r| r.score.is_some()) {
        println!("max |delta| = {worst:.3}");
    }
    Ok(())
}

fn inspect(service: &InferenceService, model: Option<&Path>) -> anyhow::Result<()> {
    let path = service.resolver().resolve(model)?;
    let checkpoint = Checkpoint::load(&path)?;
    let config = checkpoint.config();
    println!("checkpoint : {}", path.display());
    println!("variant    : {}", checkpoint.variant().describe());
    println!("channels   : {:?}", config.channels);
    println!("n_tabular  : {}", config.n_tabular);
    println!("fc_hidden  : {}", config.fc_hidden);
    let stats = checkpoint.stats();
    println!("area       : mean {:.4}, std {:.4}", stats.area.mean, stats.area.std);
    if let Some(s) = stats.aspect_ratio {
        println!("aspect     : mean {:.4}, std {:.4}", s.mean, s.std);
    }
    if let Some(s) = stats.n_vertices {
        println!("n_vertices : mean {:.4}, std {:.4}", s.mean, s.std);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::discover(),
    };
    let service = InferenceService::new(config);

    match cli.command {
        Commands::Score { rooms, model } => score(&service, &rooms, model.as_deref())?,
        Commands::Rasterize { rooms, out } => {
            let rooms = to_rooms(&load_room_records(&rooms)?)?;
            let arrays = precompute_dataset(&rooms)?;
            arrays.write_npz(&out)?;
        }
        Commands::Preview { rooms, index, out } => {
            let records = load_room_records(&rooms)?;
            let Some(record) = records.get(index) else {
                bail!("{} has {} rooms, no index {index}", rooms.display(), records.len());
            };
            let room = record.to_room()?;
            let image = furnisher_surrogate::rasterize_room(&room)?;
            image
                .to_rgb_image()
                .save(&out)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            log::info!("wrote {} ({image:?})", out.display());
        }
        Commands::Inspect { model } => inspect(&service, model.as_deref())?,
    }
    Ok(())
}
