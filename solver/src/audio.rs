use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use machine_learning::{
    MlErr,
    arch::{AvgPool2d, Network},
    checkpoint,
    dataset::{Batch, DataLoaders},
    optimization::Optimizer,
};
use ndarray::{Array2, s};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result, SolverErr,
    config::{AudioConfig, OptimizerConfig, ValidationSource},
    decoder::ImageDecoder,
    imaging::{self, Image},
    lr_schedule::RampSchedule,
    models,
    perceptual::PerceptualLoss,
    tracking::Tracker,
    video::{self, VideoMuxer},
};

/// Samples shown by the training evaluation image.
const EVAL_SAMPLES: usize = 4;

/// Parses the step out of a checkpoint named `model<step>.safetensors`.
///
/// # Errors
/// `SolverErr::CheckpointName` for any other file name.
pub fn parse_checkpoint_step(path: &Path) -> Result<usize> {
    let invalid = || SolverErr::CheckpointName(path.to_path_buf());

    if path.extension() != Some(OsStr::new("safetensors")) {
        return Err(invalid());
    }

    let digits = path
        .file_stem()
        .and_then(OsStr::to_str)
        .and_then(|stem| stem.strip_prefix("model"))
        .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(invalid)?;

    digits.parse().map_err(|_| invalid())
}

/// The tensors an iteration works on.
#[derive(Debug, Clone)]
pub struct AudioInputs {
    pub audio: Array2<f32>,
    /// The target images at the loss resolution.
    pub img: Array2<f32>,
    /// The latent every encoded offset is added to.
    pub mean: Array2<f32>,
}

impl AudioInputs {
    pub fn len(&self) -> usize {
        self.audio.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps the first `n` samples.
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.len());

        Self {
            audio: self.audio.slice(s![..n, ..]).to_owned(),
            img: self.img.slice(s![..n, ..]).to_owned(),
            mean: self.mean.slice(s![..n, ..]).to_owned(),
        }
    }
}

/// Trains an audio encoder whose output, offset from a mean latent, is rendered by a frozen
/// decoder and compared against the target frame with a perceptual loss.
pub struct AudioSolver {
    config: AudioConfig,
    encoder: Network,
    decoder: ImageDecoder,
    downsample: AvgPool2d,
    criterion: PerceptualLoss,
    optimizer: Box<dyn Optimizer>,
    schedule: RampSchedule,
    tracker: Box<dyn Tracker>,
    global_step: usize,
    step_start: usize,
    lr: f64,
}

impl AudioSolver {
    /// Creates a new `AudioSolver`. Resumed and test runs load the encoder from the
    /// configured model path and continue counting steps from its name.
    pub fn new(config: AudioConfig, tracker: Box<dyn Tracker>) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let decoder = ImageDecoder::new(
            config.decoder_spec(),
            config.decoder_weights.as_deref(),
            &mut rng,
        )?;
        let mut encoder = models::mlp(
            "audio_encoder",
            config.audio_dim,
            config.latent_dim,
            &config.encoder,
            None,
            &mut rng,
        )?;

        let mut global_step = 0;
        if let Some(path) = config.model_path() {
            encoder.load(path)?;
            global_step = parse_checkpoint_step(path)?;
            info!("resuming {} at step {global_step}", path.display());
        }

        models::log_param_counts([&encoder]);

        let (input_len, feature_dim) = (config.image_len(), config.feature_dim);
        let criterion = match &config.perceptual_weights {
            Some(path) => PerceptualLoss::pretrained(path, input_len, feature_dim, &mut rng)?,
            None => PerceptualLoss::random(input_len, feature_dim, &mut rng)?,
        };
        let downsample = AvgPool2d::resize(3, config.decoder_size, config.image_size)?;

        let optimizer = OptimizerConfig::Adam {
            lr: config.lr as f32,
            b1: 0.9,
            b2: 0.999,
            eps: 1e-8,
        }
        .build(encoder.size());

        if config.log_run() {
            fs::create_dir_all(config.models_dir())?;
            info!("logging run to {}", config.save_dir.display());
        }

        Ok(Self {
            schedule: RampSchedule::new(config.lr),
            lr: config.lr,
            config,
            encoder,
            decoder,
            downsample,
            criterion,
            optimizer,
            tracker,
            global_step,
            step_start: global_step,
        })
    }

    /// Replaces the encoder's optimizer.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Network {
        &self.encoder
    }

    pub fn decoder(&self) -> &ImageDecoder {
        &self.decoder
    }

    pub fn criterion(&self) -> &PerceptualLoss {
        &self.criterion
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// The step the run started from, zero unless resumed.
    pub fn step_start(&self) -> usize {
        self.step_start
    }

    /// The learning rate of the last update.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Sets the learning rate for training progress `t` in `[0, 1)`.
    pub fn update_lr(&mut self, t: f64) -> f64 {
        self.lr = self.schedule.lr_at(t);
        self.optimizer.set_learning_rate(self.lr as f32);
        self.lr
    }

    /// Unpacks the `audio`, `img` and `mean` channels of a batch. Without a `mean` channel
    /// every sample is offset from the decoder's mean latent.
    pub fn unpack(&self, batch: &Batch) -> Result<AudioInputs> {
        let audio = batch.flat("audio")?;
        let img = batch.flat("img")?;
        let n = audio.nrows();

        let mean = if batch.names().any(|name| name == "mean") {
            batch.flat("mean")?
        } else {
            let mean_latent = self.decoder.mean_latent();
            Array2::from_shape_fn((n, mean_latent.len()), |(_, j)| mean_latent[j])
        };

        for (what, got, expected) in [
            ("audio features", audio.ncols(), self.config.audio_dim),
            ("target image", img.ncols(), self.config.image_len()),
            ("mean latent", mean.ncols(), self.config.latent_dim),
            ("batch samples", img.nrows(), n),
            ("batch samples", mean.nrows(), n),
        ] {
            if got != expected {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected,
                }
                .into());
            }
        }

        Ok(AudioInputs { audio, img, mean })
    }

    /// Encodes, decodes and downsamples without recording anything for a backward pass.
    fn render(&self, inputs: &AudioInputs) -> Result<Array2<f32>> {
        let latent = self.encoder.forward(inputs.audio.view())? + &inputs.mean;
        let img = self.decoder.synthesize(latent.view())?;
        Ok(self.downsample.forward(img.view())?)
    }

    /// Makes one optimization step on `inputs` and returns its loss.
    pub fn train_step(&mut self, inputs: &AudioInputs) -> Result<f32> {
        let (offset, encoder_trace) = self.encoder.forward_traced(inputs.audio.view())?;
        let latent = offset + &inputs.mean;

        let (img, decoder_trace) = self.decoder.synthesize_traced(latent.view())?;
        let img = self.downsample.forward(img.view())?;

        let (loss, d_img) = self.criterion.loss_and_grad(img.view(), inputs.img.view())?;

        let d_img = self.downsample.backward(d_img.view())?;
        let d_latent = self.decoder.backward(&decoder_trace, d_img)?;

        self.encoder.zero_grad();
        self.encoder.backward(&encoder_trace, d_latent)?;
        self.encoder.step(self.optimizer.as_mut())?;

        Ok(loss)
    }

    /// Trains for `n_iters` iterations, cycling over the training loader as often as needed.
    pub fn train(&mut self, loaders: &mut DataLoaders) -> Result<()> {
        if loaders.train.is_empty() {
            return Err(SolverErr::EmptyLoader { name: "train" });
        }

        let n_iters = self.config.n_iters;
        let mut i_iter = 0;
        let mut val_loss = 0.0;
        let (mut window_loss, mut window_len) = (0.0, 0);

        info!("start training");

        while i_iter < n_iters {
            for batch in loaders.train.batches() {
                self.update_lr(i_iter as f64 / n_iters as f64);

                let inputs = self.unpack(&batch)?;
                let loss = self.train_step(&inputs)?;

                self.global_step += 1;
                i_iter += 1;
                window_loss += loss;
                window_len += 1;

                debug!(
                    "step [{}/{n_iters}] - train loss {loss:.4} - val loss {val_loss:.4} - lr {:.4}",
                    self.global_step, self.lr
                );

                if !self.config.debug {
                    let step = self.global_step;

                    if self.config.log_train.fires(step) {
                        self.tracker.add_scalar("loss/train", loss, step)?;
                        info!(
                            "step [{step}/{n_iters}] - train loss {:.4} - val loss {val_loss:.4} - lr {:.4}",
                            window_loss / window_len as f32,
                            self.lr
                        );
                        (window_loss, window_len) = (0.0, 0);
                    }

                    if self.config.log_val.fires(step) {
                        val_loss = self.validate(loaders)?;
                        self.tracker.add_scalar("loss/val", val_loss, step)?;
                    }

                    if self.config.save.fires(step) {
                        self.save()?;
                    }

                    if self.config.eval.fires(step) {
                        self.eval(loaders)?;
                    }
                }

                if i_iter == n_iters {
                    break;
                }
            }
        }

        if !self.config.debug {
            self.save()?;
        }

        info!("done");
        Ok(())
    }

    /// Estimates the loss on a single batch of the configured validation source.
    pub fn validate(&mut self, loaders: &mut DataLoaders) -> Result<f32> {
        let (loader, name) = match self.config.validation_source {
            ValidationSource::Train => (&mut loaders.train, "train"),
            ValidationSource::Val => (&mut loaders.val, "val"),
        };

        let batch = loader.first().ok_or(SolverErr::EmptyLoader { name })?;
        let inputs = self.unpack(&batch)?;
        let img = self.render(&inputs)?;

        self.criterion.loss(img.view(), inputs.img.view())
    }

    /// Writes the encoder's renders, the targets and the mean latent renders of a few
    /// training samples to `<save_dir>/train_gen_<step>.png`.
    pub fn eval(&mut self, loaders: &mut DataLoaders) -> Result<()> {
        let batch = loaders
            .train
            .first()
            .ok_or(SolverErr::EmptyLoader { name: "train" })?;
        let inputs = self.unpack(&batch)?.head(EVAL_SAMPLES);

        let img = self.render(&inputs)?;
        let mean_img = self.decoder.synthesize(inputs.mean.view())?;
        let mean_img = self.downsample.forward(mean_img.view())?;

        let shape = [3, self.config.image_size, self.config.image_size];
        let images = [&img, &inputs.img, &mean_img]
            .into_iter()
            .flat_map(|rows| rows.outer_iter())
            .map(|row| -> Result<Image> {
                Ok(imaging::rescale(&imaging::unflatten(row, shape)?, -1.0, 1.0))
            })
            .collect::<Result<Vec<Image>>>()?;

        let nrow = self.config.batch_size.get().min(8);
        let grid = imaging::make_grid(&images, nrow, 2)?;

        let step = self.global_step;
        imaging::save_png(
            &grid,
            &self.config.save_dir.join(format!("train_gen_{step}.png")),
        )?;
        self.tracker.add_image("train_gen", &grid, step)
    }

    /// Writes the encoder to `<save_dir>/models/model<step>.safetensors`.
    pub fn save(&mut self) -> Result<PathBuf> {
        let path = self.config.checkpoint_path(self.global_step);
        info!("saving: {}", path.display());

        self.encoder.save(&path)?;
        self.tracker.mirror(&path)?;
        Ok(path)
    }

    /// Renders a video of the face at `latent_path` speaking the sentence whose per-frame
    /// audio features are in `sentence_dir`.
    ///
    /// # Arguments
    /// * `latent_path` - A safetensors file with a `latent` tensor.
    /// * `sentence_dir` - A directory of `*.safetensors` files with an `audio` tensor each,
    ///   rendered in file name order.
    /// * `muxer` - Assembles the rendered frames into the video.
    ///
    /// # Returns
    /// The path of the video, `<save_dir>/out.mp4`.
    pub fn test_model(
        &mut self,
        latent_path: &Path,
        sentence_dir: &Path,
        muxer: &dyn VideoMuxer,
    ) -> Result<PathBuf> {
        let latent = checkpoint::load_tensor(latent_path, "latent")?
            .into_shape_with_order((1, self.config.latent_dim))?;

        let mut frames: Vec<PathBuf> = fs::read_dir(sentence_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        frames.retain(|path| path.extension() == Some(OsStr::new("safetensors")));
        frames.sort();

        if frames.is_empty() {
            return Err(SolverErr::EmptyLoader { name: "test sentence" });
        }

        fs::create_dir_all(&self.config.save_dir)?;
        let tmp = tempfile::Builder::new()
            .prefix(".temp")
            .tempdir_in(&self.config.save_dir)?;

        let encoder = self.encoder.eval_scope();
        let shape = self.decoder.image_shape();

        for (i, path) in frames.iter().enumerate() {
            let audio = checkpoint::load_tensor(path, "audio")?;
            let audio = audio.into_shape_with_order((1, self.config.audio_dim))?;

            let frame_latent = encoder.forward(audio.view())? + &latent;
            let rendered = self.decoder.synthesize(frame_latent.view())?;
            let frame = imaging::rescale(&imaging::unflatten(rendered.row(0), shape)?, -1.0, 1.0);

            imaging::save_png(&frame, &tmp.path().join(video::frame_name(i)))?;
        }
        info!("rendered {} frames", frames.len());
        drop(encoder);

        let out = self.config.save_dir.join("out.mp4");
        muxer.mux(tmp.path(), &out)?;
        tmp.close()?;

        Ok(out)
    }
}
