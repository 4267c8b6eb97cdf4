use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::{NetConfig, OptimizerConfig};
use crate::{
    Result, SolverErr,
    cadence::Cadence,
    gan_loss::{GanMode, LabelRange},
};

/// The frozen emotion classifier whose embeddings the emotion loss compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    #[serde(flatten)]
    pub net: NetConfig,
    pub embedding_dim: usize,
    /// Pretrained weights, the classifier keeps its random initialization without them.
    pub weights: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            embedding_dim: 8,
            weights: None,
        }
    }
}

/// Everything a conditional GAN run is set up from, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanConfig {
    pub seed: u64,

    // Dataset
    /// A safetensors file with the `A` (conditioning) and `B` (target) channels.
    pub data_path: PathBuf,
    pub validation_split: f32,
    pub batch_size: usize,
    /// `C x H x W` of both `A` and `B` samples.
    pub image_shape: [usize; 3],
    pub normalize: bool,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,

    // Training
    pub num_epochs: usize,
    pub gan_mode: String,
    pub flip_prob: f32,
    pub noisy_labels: bool,
    pub label_range_real: (f32, f32),
    pub label_range_fake: (f32, f32),
    pub lambda_gan: f32,
    pub lambda_pixel: f32,
    pub lambda_emotion: f32,

    // Models
    pub generator: NetConfig,
    pub discriminator: NetConfig,
    pub classifier: ClassifierConfig,
    pub optimizer_g: OptimizerConfig,
    pub optimizer_d: OptimizerConfig,

    // Logging
    pub log_run: bool,
    pub save_root: PathBuf,
    /// Where saved weights are mirrored to, standing in for a remote run directory.
    pub mirror_dir: Option<PathBuf>,
    /// Epochs between two sample images and checkpoints.
    pub sample_every: usize,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            data_path: PathBuf::from("data/pix2pix.safetensors"),
            validation_split: 0.2,
            batch_size: 32,
            image_shape: [3, 16, 16],
            normalize: true,
            mean: vec![0.5; 3],
            std: vec![0.5; 3],
            num_epochs: 30,
            gan_mode: "vanilla".into(),
            flip_prob: 0.0,
            noisy_labels: false,
            label_range_real: (1.0, 1.0),
            label_range_fake: (0.0, 0.0),
            lambda_gan: 1.0,
            lambda_pixel: 0.0,
            lambda_emotion: 0.0,
            generator: NetConfig::default(),
            discriminator: NetConfig::default(),
            classifier: ClassifierConfig::default(),
            optimizer_g: OptimizerConfig::adam(2e-4),
            optimizer_d: OptimizerConfig::adam(2e-4),
            log_run: true,
            save_root: PathBuf::from("saves/pix2pix"),
            mirror_dir: None,
            sample_every: 1,
        }
    }
}

impl GanConfig {
    /// Reads and validates a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field and the relations between them.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SolverErr::Config(msg));

        if self.num_epochs == 0 {
            return invalid("num_epochs must be greater than 0".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be greater than 0".into());
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return invalid(format!(
                "validation_split ({}) must lie in (0, 1)",
                self.validation_split
            ));
        }
        if self.image_shape.contains(&0) {
            return invalid(format!("image_shape {:?} has an empty axis", self.image_shape));
        }

        let channels = self.image_shape[0];
        if self.mean.len() != channels || self.std.len() != channels {
            return invalid(format!(
                "mean and std need one value per channel ({channels})"
            ));
        }
        if self.std.contains(&0.0) {
            return invalid("std can't contain zeros".into());
        }

        self.gan_mode()?;
        self.label_ranges()?;
        if !(0.0..=1.0).contains(&self.flip_prob) {
            return invalid(format!("flip_prob ({}) must lie in [0, 1]", self.flip_prob));
        }

        for (name, lambda) in [
            ("lambda_gan", self.lambda_gan),
            ("lambda_pixel", self.lambda_pixel),
            ("lambda_emotion", self.lambda_emotion),
        ] {
            if !lambda.is_finite() || lambda < 0.0 {
                return invalid(format!("{name} ({lambda}) must be finite and non negative"));
            }
        }

        self.generator.validate("generator")?;
        self.discriminator.validate("discriminator")?;
        self.classifier.net.validate("classifier")?;
        if self.classifier.embedding_dim == 0 {
            return invalid("classifier embedding_dim must be greater than 0".into());
        }

        self.optimizer_g.validate()?;
        self.optimizer_d.validate()?;
        self.sample_cadence()?;

        Ok(())
    }

    pub fn gan_mode(&self) -> Result<GanMode> {
        self.gan_mode.parse()
    }

    /// The real and fake label ranges.
    pub fn label_ranges(&self) -> Result<(LabelRange, LabelRange)> {
        let (rl, rh) = self.label_range_real;
        let (fl, fh) = self.label_range_fake;
        Ok((LabelRange::new(rl, rh)?, LabelRange::new(fl, fh)?))
    }

    pub fn sample_cadence(&self) -> Result<Cadence> {
        NonZeroUsize::new(self.sample_every)
            .map(Cadence::every)
            .ok_or_else(|| SolverErr::Config("sample_every must be greater than 0".into()))
    }

    /// The length of a flattened sample.
    pub fn image_len(&self) -> usize {
        self.image_shape.iter().product()
    }

    /// The directory a run started at `now` saves into.
    pub fn run_dir(&self, now: &DateTime<Local>) -> PathBuf {
        self.save_root
            .join(now.format("%Y%m%d-%H%M%S").to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        GanConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: GanConfig = serde_json::from_str(
            r#"{
                "num_epochs": 2,
                "gan_mode": "lsgan",
                "image_shape": [1, 4, 4],
                "mean": [0.5],
                "std": [0.5],
                "classifier": { "hidden": [4], "embedding_dim": 3 },
                "optimizer_d": { "gradient_descent": { "lr": 0.1 } }
            }"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.gan_mode().unwrap(), GanMode::Lsgan);
        assert_eq!(config.image_len(), 16);
        assert_eq!(config.classifier.net.hidden, [4]);
        assert_eq!(config.optimizer_d, OptimizerConfig::GradientDescent { lr: 0.1 });
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn unsupported_mode_fails_validation() {
        let config = GanConfig {
            gan_mode: "hinge".into(),
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(SolverErr::Config(_))));
    }

    #[test]
    fn channel_statistics_must_match() {
        let config = GanConfig {
            mean: vec![0.5],
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_label_ranges_fail_validation() {
        let config = GanConfig {
            label_range_real: (1.0, 0.7),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn run_dir_is_timestamped() {
        let config = GanConfig::default();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(
            config.run_dir(&now),
            PathBuf::from("saves/pix2pix/20240309-140507")
        );
    }
}
