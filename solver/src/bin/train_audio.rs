use clap::Parser;
use log::info;
use rand::{SeedableRng, rngs::StdRng};
use solver::{
    audio::AudioSolver,
    config::{AudioArgs, AudioConfig, RunMode},
    data,
    tracking::{FileTracker, NullTracker, Tracker},
    video::Ffmpeg,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AudioConfig::from_args(AudioArgs::parse(), &chrono::Local::now())?;
    info!("saving run to {}", config.save_dir.display());

    let tracker: Box<dyn Tracker> = if config.log_run() {
        Box::new(FileTracker::new(&config.save_dir, None)?)
    } else {
        Box::new(NullTracker)
    };

    if let RunMode::Test { latent, sentence, .. } = config.mode.clone() {
        let mut solver = AudioSolver::new(config, tracker)?;
        let out = solver.test_model(&latent, &sentence, &Ffmpeg::default())?;
        info!("wrote {}", out.display());
        return Ok(());
    }

    // Offset by one so the split doesn't replay the decoder's draws.
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let mut loaders = data::load_loaders(
        &config.data_path,
        config.validation_split,
        config.batch_size,
        &mut rng,
    )?;

    let mut solver = AudioSolver::new(config, tracker)?;
    solver.train(&mut loaders)?;
    info!("finished training");

    Ok(())
}
