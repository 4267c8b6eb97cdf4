use std::{num::NonZeroUsize, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use log::info;
use rand::{SeedableRng, rngs::StdRng};
use solver::{
    config::GanConfig,
    data,
    gan::GanSolver,
    tracking::{FileTracker, NullTracker, Tracker},
};

/// Conditional GAN trainer
#[derive(Parser, Debug)]
#[command(name = "train_gan")]
#[command(about = "Train a conditional image to image GAN")]
struct Args {
    /// A JSON run configuration
    #[arg(long)]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = GanConfig::from_file(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;

    let run_dir = config.run_dir(&chrono::Local::now());
    let tracker: Box<dyn Tracker> = if config.log_run {
        Box::new(FileTracker::new(&run_dir, config.mirror_dir.clone())?)
    } else {
        Box::new(NullTracker)
    };

    let batch_size = NonZeroUsize::new(config.batch_size).context("batch_size must be positive")?;
    // Offset by one so the split doesn't replay the initialization draws.
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let mut loaders = data::load_loaders(
        &config.data_path,
        config.validation_split,
        batch_size,
        &mut rng,
    )?;

    info!("saving run to {}", run_dir.display());
    let mut solver = GanSolver::new(config, run_dir, tracker)?;
    solver.train_model(&mut loaders)?;

    Ok(())
}
