use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use clap::{Parser, ValueEnum};

use super::{ActivationConfig, NetConfig};
use crate::{Result, SolverErr, cadence::Cadence, decoder::DecoderSpec};

/// Which loader the periodic validation loss draws its batch from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ValidationSource {
    #[default]
    Train,
    Val,
}

/// Command line of the audio encoder trainer.
#[derive(Parser, Debug, Clone)]
#[command(name = "train_audio")]
#[command(about = "Train an audio encoder into the latent space of a frozen face decoder")]
pub struct AudioArgs {
    /// Run without tracking, checkpointing at the end or writing anything but images
    #[arg(long)]
    pub debug: bool,

    /// Render a video for --test_sentence out of the model at --model_path
    #[arg(long)]
    pub test: bool,

    /// Continue training the model at --model_path
    #[arg(long)]
    pub cont: bool,

    #[arg(long = "model_path")]
    pub model_path: Option<PathBuf>,

    #[arg(long = "batch_size", default_value = "4")]
    pub batch_size: NonZeroUsize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(long = "n_iters", default_value = "100000")]
    pub n_iters: NonZeroUsize,

    #[arg(long = "log_train_every", default_value = "1")]
    pub log_train_every: NonZeroUsize,

    #[arg(long = "log_val_every", default_value = "10")]
    pub log_val_every: NonZeroUsize,

    #[arg(long = "save_every", default_value = "10000")]
    pub save_every: NonZeroUsize,

    #[arg(long = "eval_every", default_value = "10000")]
    pub eval_every: NonZeroUsize,

    #[arg(long = "save_dir", default_value = "saves/audio_encoder/")]
    pub save_dir: PathBuf,

    /// A safetensors file holding the `latent` every test frame is offset from
    #[arg(long = "test_latent")]
    pub test_latent: Option<PathBuf>,

    /// A directory of per-frame `*.safetensors` files holding an `audio` tensor
    #[arg(long = "test_sentence")]
    pub test_sentence: Option<PathBuf>,

    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// A safetensors file with the `audio`, `img` and optionally `mean` channels
    #[arg(long = "data_path", default_value = "data/audio.safetensors")]
    pub data_path: PathBuf,

    /// A directory with the decoder's `mapping.safetensors` and `synthesis.safetensors`
    #[arg(long = "decoder_weights")]
    pub decoder_weights: Option<PathBuf>,

    /// A safetensors file with pretrained weights of the perceptual feature network
    #[arg(long = "perceptual_weights")]
    pub perceptual_weights: Option<PathBuf>,

    #[arg(long = "validation_source", value_enum, default_value_t = ValidationSource::Train)]
    pub validation_source: ValidationSource,

    /// Fraction of the dataset held out for the `val` loader
    #[arg(long = "validation_split", default_value = "0.2")]
    pub validation_split: f32,

    #[arg(long = "audio_dim", default_value = "464")]
    pub audio_dim: usize,

    #[arg(long = "latent_dim", default_value = "64")]
    pub latent_dim: usize,

    #[arg(long = "noise_dim", default_value = "16")]
    pub noise_dim: usize,

    /// Side of the images the loss is measured at
    #[arg(long = "image_size", default_value = "16")]
    pub image_size: usize,

    /// Side of the images the decoder renders
    #[arg(long = "decoder_size", default_value = "32")]
    pub decoder_size: usize,

    #[arg(long = "encoder_hidden", value_delimiter = ',', default_value = "256")]
    pub encoder_hidden: Vec<usize>,

    #[arg(long = "decoder_hidden", value_delimiter = ',', default_value = "128")]
    pub decoder_hidden: Vec<usize>,

    /// Width of the perceptual feature space
    #[arg(long = "feature_dim", default_value = "128")]
    pub feature_dim: usize,
}

/// What a run of the audio trainer does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Resume {
        model_path: PathBuf,
    },
    Test {
        model_path: PathBuf,
        latent: PathBuf,
        sentence: PathBuf,
    },
}

/// A validated audio trainer setup.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub mode: RunMode,
    pub debug: bool,
    pub seed: u64,
    pub data_path: PathBuf,
    pub decoder_weights: Option<PathBuf>,
    pub perceptual_weights: Option<PathBuf>,
    pub validation_source: ValidationSource,
    pub validation_split: f32,
    pub batch_size: NonZeroUsize,
    pub lr: f64,
    pub n_iters: usize,
    pub log_train: Cadence,
    pub log_val: Cadence,
    pub save: Cadence,
    pub eval: Cadence,
    pub save_dir: PathBuf,
    pub audio_dim: usize,
    pub latent_dim: usize,
    pub noise_dim: usize,
    pub image_size: usize,
    pub decoder_size: usize,
    pub encoder: NetConfig,
    pub decoder_hidden: Vec<usize>,
    pub feature_dim: usize,
}

impl AudioConfig {
    /// Validates the command line and derives the run's settings from it.
    ///
    /// # Arguments
    /// * `args` - The parsed command line.
    /// * `now` - The run's start time, names the save directory of fresh runs.
    ///
    /// # Errors
    /// `SolverErr::Config` on any missing flag combination or inconsistent size.
    pub fn from_args(args: AudioArgs, now: &DateTime<Local>) -> Result<Self> {
        let invalid = |msg: &str| SolverErr::Config(msg.to_string());

        let mode = match (args.test, args.cont, args.model_path) {
            (true, _, Some(model_path)) => RunMode::Test {
                model_path,
                latent: args
                    .test_latent
                    .ok_or_else(|| invalid("--test requires --test_latent"))?,
                sentence: args
                    .test_sentence
                    .ok_or_else(|| invalid("--test requires --test_sentence"))?,
            },
            (false, true, Some(model_path)) => RunMode::Resume { model_path },
            (false, false, _) => RunMode::Train,
            (..) => return Err(invalid("--cont and --test require --model_path")),
        };

        let save_dir = match &mode {
            RunMode::Train => args
                .save_dir
                .join(now.format("%Y-%m-%d_%H-%M-%S").to_string()),
            RunMode::Resume { model_path } | RunMode::Test { model_path, .. } => {
                model_root(model_path)?
            }
        };

        if !(args.lr.is_finite() && args.lr > 0.0) {
            return Err(SolverErr::Config(format!("lr ({}) must be positive", args.lr)));
        }
        if !(args.validation_split > 0.0 && args.validation_split < 1.0) {
            return Err(SolverErr::Config(format!(
                "validation_split ({}) must lie in (0, 1)",
                args.validation_split
            )));
        }

        for (name, size) in [
            ("audio_dim", args.audio_dim),
            ("latent_dim", args.latent_dim),
            ("image_size", args.image_size),
            ("decoder_size", args.decoder_size),
            ("feature_dim", args.feature_dim),
        ] {
            if size == 0 {
                return Err(SolverErr::Config(format!("{name} must be greater than 0")));
            }
        }
        if args.decoder_size % args.image_size != 0 {
            return Err(SolverErr::Config(format!(
                "decoder_size ({}) must be a multiple of image_size ({})",
                args.decoder_size, args.image_size
            )));
        }

        let encoder = NetConfig::new(
            args.encoder_hidden,
            ActivationConfig::LeakyRelu { slope: 0.2 },
            0.02,
        );
        encoder.validate("audio encoder")?;
        NetConfig::new(args.decoder_hidden.clone(), ActivationConfig::default(), 1.0)
            .validate("decoder")?;

        Ok(Self {
            mode,
            debug: args.debug,
            seed: args.seed,
            data_path: args.data_path,
            decoder_weights: args.decoder_weights,
            perceptual_weights: args.perceptual_weights,
            validation_source: args.validation_source,
            validation_split: args.validation_split,
            batch_size: args.batch_size,
            lr: args.lr,
            n_iters: args.n_iters.get(),
            log_train: Cadence::every(args.log_train_every),
            log_val: Cadence::every(args.log_val_every),
            save: Cadence::every(args.save_every),
            eval: Cadence::every(args.eval_every),
            save_dir,
            audio_dim: args.audio_dim,
            latent_dim: args.latent_dim,
            noise_dim: args.noise_dim,
            image_size: args.image_size,
            decoder_size: args.decoder_size,
            encoder,
            decoder_hidden: args.decoder_hidden,
            feature_dim: args.feature_dim,
        })
    }

    /// Whether the run reports to a tracker.
    pub fn log_run(&self) -> bool {
        !self.debug && !matches!(self.mode, RunMode::Test { .. })
    }

    /// The model a resumed or test run starts from.
    pub fn model_path(&self) -> Option<&Path> {
        match &self.mode {
            RunMode::Train => None,
            RunMode::Resume { model_path } | RunMode::Test { model_path, .. } => Some(model_path),
        }
    }

    pub fn decoder_spec(&self) -> DecoderSpec {
        DecoderSpec {
            latent_dim: self.latent_dim,
            noise_dim: self.noise_dim,
            hidden: self.decoder_hidden.clone(),
            channels: 3,
            size: self.decoder_size,
        }
    }

    /// The length of a flattened image at the loss resolution.
    pub fn image_len(&self) -> usize {
        3 * self.image_size * self.image_size
    }

    pub fn models_dir(&self) -> PathBuf {
        self.save_dir.join("models")
    }

    /// Where the checkpoint of `step` is written.
    pub fn checkpoint_path(&self, step: usize) -> PathBuf {
        self.models_dir().join(format!("model{step}.safetensors"))
    }
}

/// `<save_dir>/models/model<step>.safetensors` belongs to `<save_dir>`.
fn model_root(model_path: &Path) -> Result<PathBuf> {
    model_path
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .ok_or_else(|| SolverErr::CheckpointName(model_path.to_path_buf()))
}
