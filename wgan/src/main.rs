use std::{io, path::PathBuf};

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;

use wgan::{WganConfig, WganErr, checkpoint, sampling, training};

/// Wasserstein GAN with weight clipping for handwritten digits
#[derive(Parser)]
#[command(name = "wgan", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train the generator and the critic
    Train {
        /// JSON configuration, the defaults are used without one
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Continue from the latest checkpoint in the checkpoint directory
        #[arg(long)]
        resume: bool,

        /// Override the amount of epochs
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// Generate a grid of images from a checkpoint and print their critic scores
    Sample {
        /// Checkpoint directory to sample from
        #[arg(long, conflicts_with = "dir")]
        checkpoint: Option<PathBuf>,

        /// Sample from the latest checkpoint in this directory
        #[arg(short, long, default_value = "checkpoints")]
        dir: PathBuf,

        /// Images to generate
        #[arg(short = 'n', long, default_value_t = 25)]
        count: usize,

        /// Columns of the grid
        #[arg(long, default_value_t = 5)]
        cols: usize,

        /// Where to write the grid
        #[arg(short, long, default_value = "samples.png")]
        output: PathBuf,

        /// Seed of the noise
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
    },

    /// Write the default configuration
    InitConfig {
        /// Where to write it
        #[arg(default_value = "wgan.json")]
        path: PathBuf,
    },
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Train {
            config,
            resume,
            epochs,
        } => {
            let mut config = match config {
                Some(path) => WganConfig::load(path)?,
                None => WganConfig::default(),
            };
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }

            let metrics = training::run(&config, resume)?;
            if let Some(last) = metrics.last() {
                info!(
                    "finished after epoch {}, wasserstein estimate {:.6}",
                    last.epoch, last.wasserstein
                );
            }
        }
        Command::Sample {
            checkpoint,
            dir,
            count,
            cols,
            output,
            seed,
        } => {
            let path = match checkpoint {
                Some(path) => path,
                None => checkpoint::find_latest_checkpoint(&dir)?.ok_or_else(|| {
                    WganErr::Checkpoint(format!("no checkpoint in {}", dir.display()))
                })?,
            };

            let scores = sampling::sample_from_checkpoint(path, count, cols, output, seed)?;
            for (i, score) in scores.iter().enumerate() {
                println!("{i}\t{score:.6}");
            }
        }
        Command::InitConfig { path } => {
            WganConfig::default().save(&path)?;
            info!("wrote the default configuration to {}", path.display());
        }
    }

    Ok(())
}
