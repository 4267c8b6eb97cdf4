use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{info, warn};
use machine_learning::{
    arch::{
        Network, Trace,
        activations::ActFn,
        loss::{L1, LossFn, Mse},
    },
    dataset::{Batch, DataLoader, DataLoaders},
    optimization::Optimizer,
};
use ndarray::{Array2, ArrayView1, ArrayView2, s};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result, SolverErr,
    cadence::Cadence,
    config::GanConfig,
    gan_loss::{GanLoss, GanMode},
    imaging::{self, Image},
    metrics::{MetricAccumulator, MetricKey, Reduction},
    models,
    tracking::Tracker,
};

/// Samples shown by the end of run evaluation.
const EVAL_SAMPLES: usize = 64;
const EVAL_NROW: usize = 8;
const EVAL_PADDING: usize = 5;
/// Black gap between the two halves of a comparison image.
const GUTTER: usize = 30;

/// The epoch metrics of the GAN solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GanMetric {
    LossDTotal,
    LossDFake,
    LossDReal,
    LossGEmotion,
    LossGPixel,
    LossGGan,
    AccG,
    AccDReal,
    AccDFake,
    MaxNormD,
    MaxNormG,
}

impl MetricKey for GanMetric {
    const ALL: &'static [Self] = &[
        Self::LossDTotal,
        Self::LossDFake,
        Self::LossDReal,
        Self::LossGEmotion,
        Self::LossGPixel,
        Self::LossGGan,
        Self::AccG,
        Self::AccDReal,
        Self::AccDFake,
        Self::MaxNormD,
        Self::MaxNormG,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::LossDTotal => "epoch_loss_D_total",
            Self::LossDFake => "epoch_loss_D_fake",
            Self::LossDReal => "epoch_loss_D_real",
            Self::LossGEmotion => "epoch_loss_G_emotion",
            Self::LossGPixel => "epoch_loss_G_pixel",
            Self::LossGGan => "epoch_loss_G_GAN",
            Self::AccG => "epoch_acc_G",
            Self::AccDReal => "epoch_acc_D_real",
            Self::AccDFake => "epoch_acc_D_fake",
            Self::MaxNormD => "epoch_maxNorm_D",
            Self::MaxNormG => "epoch_maxNorm_G",
        }
    }

    fn reduction(self) -> Reduction {
        match self {
            Self::MaxNormD | Self::MaxNormG => Reduction::Max,
            _ => Reduction::Mean,
        }
    }
}

/// The tensors an iteration works on, unpacked from a batch.
#[derive(Debug, Clone)]
pub struct GanInputs {
    /// The conditioning images.
    pub real_a: Array2<f32>,
    /// The target images.
    pub real_b: Array2<f32>,
    /// An optional condition, such as an emotion label.
    pub cond: Option<Array2<f32>>,
}

impl GanInputs {
    /// Unpacks the `A`, `B` and, if present, `y` channels of a batch.
    pub fn from_batch(batch: &Batch) -> Result<Self> {
        let cond = if batch.names().any(|name| name == "y") {
            Some(batch.flat("y")?)
        } else {
            None
        };

        Ok(Self {
            real_a: batch.flat("A")?,
            real_b: batch.flat("B")?,
            cond,
        })
    }
}

/// The generator's output for the current inputs, kept for both phases of an iteration.
#[derive(Debug)]
pub struct Forward {
    pub fake_b: Array2<f32>,
    trace: Trace,
}

/// The discriminator phase's scalars.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiscriminatorLosses {
    pub real: f32,
    pub fake: f32,
    pub total: f32,
    pub acc_real: f32,
    pub acc_fake: f32,
}

/// The generator phase's scalars, disabled terms stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeneratorLosses {
    pub gan: f32,
    pub pixel: f32,
    pub emotion: f32,
    pub total: f32,
    pub acc: f32,
}

/// Everything a single call to `optimize_parameters` measured.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub d: DiscriminatorLosses,
    pub g: GeneratorLosses,
}

/// Trains a conditional image to image GAN: a generator, a discriminator and a frozen emotion
/// classifier feeding an optional embedding loss.
pub struct GanSolver {
    config: GanConfig,
    generator: Network,
    discriminator: Network,
    classifier: Network,
    optimizer_g: Box<dyn Optimizer>,
    optimizer_d: Box<dyn Optimizer>,
    criterion_gan: GanLoss,
    tracker: Box<dyn Tracker>,
    run_dir: PathBuf,
    sample_cadence: Cadence,
    metrics: MetricAccumulator<GanMetric>,
    global_step: usize,
}

impl GanSolver {
    /// Creates a new `GanSolver`, every random choice is derived from `config.seed`.
    ///
    /// # Arguments
    /// * `config` - The run's configuration, validated again here.
    /// * `run_dir` - Where checkpoints and images are written.
    /// * `tracker` - Where scalars and images are reported.
    pub fn new(config: GanConfig, run_dir: PathBuf, tracker: Box<dyn Tracker>) -> Result<Self> {
        config.validate()?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let image_len = config.image_len();

        let generator = models::mlp(
            "generator",
            image_len,
            image_len,
            &config.generator,
            Some(ActFn::tanh()),
            &mut rng,
        )?;
        let discriminator = models::mlp(
            "discriminator",
            image_len,
            1,
            &config.discriminator,
            None,
            &mut rng,
        )?;

        let mut classifier = models::mlp(
            "classifier",
            image_len,
            config.classifier.embedding_dim,
            &config.classifier.net,
            None,
            &mut rng,
        )?;
        if let Some(path) = &config.classifier.weights {
            classifier.load(path)?;
        }
        let classifier = classifier.frozen();

        models::log_param_counts([&generator, &discriminator, &classifier]);

        let (real, fake) = config.label_ranges()?;
        let criterion_gan = GanLoss::new(
            config.gan_mode()?,
            config.flip_prob,
            config.noisy_labels,
            real,
            fake,
            StdRng::from_rng(&mut rng),
        )?;

        Ok(Self {
            optimizer_g: config.optimizer_g.build(generator.size()),
            optimizer_d: config.optimizer_d.build(discriminator.size()),
            sample_cadence: config.sample_cadence()?,
            config,
            generator,
            discriminator,
            classifier,
            criterion_gan,
            tracker,
            run_dir,
            metrics: MetricAccumulator::new(),
            global_step: 0,
        })
    }

    /// Replaces the generator and discriminator optimizers.
    pub fn with_optimizers(
        mut self,
        optimizer_g: Box<dyn Optimizer>,
        optimizer_d: Box<dyn Optimizer>,
    ) -> Self {
        self.optimizer_g = optimizer_g;
        self.optimizer_d = optimizer_d;
        self
    }

    pub fn config(&self) -> &GanConfig {
        &self.config
    }

    pub fn generator(&self) -> &Network {
        &self.generator
    }

    pub fn discriminator(&self) -> &Network {
        &self.discriminator
    }

    pub fn classifier(&self) -> &Network {
        &self.classifier
    }

    pub fn metrics(&self) -> &MetricAccumulator<GanMetric> {
        &self.metrics
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Runs the generator on the conditioning images.
    pub fn forward(&self, inputs: &GanInputs) -> Result<Forward> {
        let (fake_b, trace) = self.generator.forward_traced(inputs.real_a.view())?;
        Ok(Forward { fake_b, trace })
    }

    /// Accumulates the discriminator's gradient for the real targets and the generated
    /// images. The generated images are treated as constants, nothing flows back into the
    /// generator.
    pub fn backward_d(&mut self, inputs: &GanInputs, fwd: &Forward) -> Result<DiscriminatorLosses> {
        let threshold = decision_threshold(self.criterion_gan.mode());

        let (pred_real, trace_real) = self.discriminator.forward_traced(inputs.real_b.view())?;
        let real = self.criterion_gan.compute(pred_real.view(), true, true);

        let (pred_fake, trace_fake) = self.discriminator.forward_traced(fwd.fake_b.view())?;
        let fake = self.criterion_gan.compute(pred_fake.view(), false, true);

        let losses = DiscriminatorLosses {
            real: real.loss,
            fake: fake.loss,
            total: real.loss + fake.loss,
            acc_real: accuracy(pred_real.view(), true, threshold),
            acc_fake: accuracy(pred_fake.view(), false, threshold),
        };

        // One backward per term, the input deltas are dropped.
        self.discriminator.backward(&trace_real, real.grad)?;
        self.discriminator.backward(&trace_fake, fake.grad)?;

        if !losses.total.is_finite() {
            warn!("non finite discriminator loss at step {}", self.global_step);
        }

        Ok(losses)
    }

    /// Accumulates the generator's gradient. The discriminator is frozen meanwhile so it only
    /// relays deltas back to the generated images.
    pub fn backward_g(&mut self, inputs: &GanInputs, fwd: &Forward) -> Result<GeneratorLosses> {
        self.discriminator.set_requires_grad(false);
        let losses = self.generator_losses(inputs, fwd);
        self.discriminator.set_requires_grad(true);
        losses
    }

    fn generator_losses(&mut self, inputs: &GanInputs, fwd: &Forward) -> Result<GeneratorLosses> {
        let (lambda_gan, lambda_pixel, lambda_emotion) = (
            self.config.lambda_gan,
            self.config.lambda_pixel,
            self.config.lambda_emotion,
        );
        let threshold = decision_threshold(self.criterion_gan.mode());
        let mut losses = GeneratorLosses::default();

        let (pred_fake, trace) = self.discriminator.forward_traced(fwd.fake_b.view())?;
        let gan = self.criterion_gan.compute(pred_fake.view(), true, false);
        losses.gan = gan.loss;
        losses.acc = accuracy(pred_fake.view(), true, threshold);
        let mut d_fake = self.discriminator.backward(&trace, gan.grad * lambda_gan)?;

        let (fake_b, real_b) = (fwd.fake_b.view(), inputs.real_b.view());

        if lambda_pixel > 0.0 {
            losses.pixel = L1.loss(fake_b, real_b);
            d_fake.scaled_add(lambda_pixel, &L1.loss_prime(fake_b, real_b));
        }

        if lambda_emotion > 0.0 {
            let (embedding_fake, trace) = self.classifier.forward_traced(fake_b)?;
            let embedding_real = self.classifier.forward(real_b)?;
            losses.emotion = Mse.loss(embedding_fake.view(), embedding_real.view());

            let d = Mse.loss_prime(embedding_fake.view(), embedding_real.view()) * lambda_emotion;
            d_fake += &self.classifier.backward(&trace, d)?;
        }

        losses.total =
            lambda_gan * losses.gan + lambda_pixel * losses.pixel + lambda_emotion * losses.emotion;
        self.generator.backward(&fwd.trace, d_fake)?;

        if !losses.total.is_finite() {
            warn!("non finite generator loss at step {}", self.global_step);
        }

        Ok(losses)
    }

    /// Makes a full iteration: a generator forward pass, a discriminator update and a
    /// generator update, in that order.
    pub fn optimize_parameters(&mut self, inputs: &GanInputs) -> Result<StepLosses> {
        let fwd = self.forward(inputs)?;

        self.discriminator.zero_grad();
        let d = self.backward_d(inputs, &fwd)?;
        let max_d = self
            .discriminator
            .max_grad_norm(self.metrics.get(GanMetric::MaxNormD));
        self.metrics.record(GanMetric::MaxNormD, max_d);
        self.discriminator.step(self.optimizer_d.as_mut())?;

        self.generator.zero_grad();
        let g = self.backward_g(inputs, &fwd)?;
        let max_g = self
            .generator
            .max_grad_norm(self.metrics.get(GanMetric::MaxNormG));
        self.metrics.record(GanMetric::MaxNormG, max_g);
        self.generator.step(self.optimizer_g.as_mut())?;

        for (key, value) in [
            (GanMetric::LossDReal, d.real),
            (GanMetric::LossDFake, d.fake),
            (GanMetric::LossDTotal, d.total),
            (GanMetric::AccDReal, d.acc_real),
            (GanMetric::AccDFake, d.acc_fake),
            (GanMetric::LossGGan, g.gan),
            (GanMetric::LossGPixel, g.pixel),
            (GanMetric::LossGEmotion, g.emotion),
            (GanMetric::AccG, g.acc),
        ] {
            self.metrics.record(key, value);
        }

        Ok(StepLosses { d, g })
    }

    /// Trains for `num_epochs` epochs over `loaders.train`.
    pub fn train_model(&mut self, loaders: &mut DataLoaders) -> Result<()> {
        let num_epochs = self.config.num_epochs;
        let t_start = Instant::now();
        info!("starting training");

        for epoch in 1..=num_epochs {
            info!("epoch {epoch}/{num_epochs}");
            self.metrics.reset();

            let mut iterations = 0;
            for batch in loaders.train.batches() {
                self.global_step += 1;
                iterations += 1;

                let inputs = GanInputs::from_batch(&batch)?;
                let losses = self.optimize_parameters(&inputs)?;
                self.log_iteration(&losses)?;
            }

            self.metrics.finish(iterations);
            self.log_console(epoch, t_start.elapsed());

            if self.config.log_run && self.sample_cadence.fires(epoch) {
                if let Err(e) = self.write_sample(loaders, epoch) {
                    warn!("couldn't sample images for epoch {epoch}: {e}");
                }
                self.save()?;
            }
        }

        let elapsed = t_start.elapsed().as_secs();
        info!("training complete in {}m {}s", elapsed / 60, elapsed % 60);

        if self.config.log_run {
            self.save()?;
            self.eval_model(&mut loaders.val)?;
        }

        Ok(())
    }

    fn log_iteration(&mut self, losses: &StepLosses) -> Result<()> {
        for (tag, value) in [
            ("G/loss/GAN", losses.g.gan),
            ("G/loss/pixel", losses.g.pixel),
            ("G/loss/emotion", losses.g.emotion),
            ("D/loss/total", losses.d.total),
        ] {
            self.tracker.add_scalar(tag, value, self.global_step)?;
        }

        Ok(())
    }

    fn log_console(&self, epoch: usize, elapsed: Duration) {
        let m = |key| self.metrics.get(key);

        info!(
            "G loss GAN: {:.3}\tG loss Pix: {:.3}\tG loss Emo: {:.3}",
            m(GanMetric::LossGGan),
            m(GanMetric::LossGPixel),
            m(GanMetric::LossGEmotion)
        );
        info!(
            "D loss real: {:.3}\tD loss fake: {:.3}\tD loss total: {:.3}",
            m(GanMetric::LossDReal),
            m(GanMetric::LossDFake),
            m(GanMetric::LossDTotal)
        );
        info!(
            "D acc real: {:.3}\tD acc fake: {:.3}\tG acc: {:.3}",
            m(GanMetric::AccDReal),
            m(GanMetric::AccDFake),
            m(GanMetric::AccG)
        );
        info!(
            "Max gradient norm D: {:.3} | Max gradient norm G: {:.3}",
            m(GanMetric::MaxNormD),
            m(GanMetric::MaxNormG)
        );
        info!(
            "Time elapsed {} | Time left: {}",
            format_duration(elapsed),
            format_duration(time_left(elapsed, epoch, self.config.num_epochs))
        );
    }

    fn write_sample(&mut self, loaders: &mut DataLoaders, epoch: usize) -> Result<()> {
        let sample = self.sample_images(loaders)?;
        self.tracker.add_image("sample", &sample, epoch)?;
        imaging::save_png(
            &sample,
            &self.run_dir.join("images").join(format!("sample_{epoch}.png")),
        )
    }

    /// Renders the first training and validation samples as `A / G(A) / B` columns, side by
    /// side.
    pub fn sample_images(&self, loaders: &mut DataLoaders) -> Result<Image> {
        let train = loaders
            .train
            .first()
            .ok_or(SolverErr::EmptyLoader { name: "train" })?;
        let val = loaders
            .val
            .first()
            .ok_or(SolverErr::EmptyLoader { name: "val" })?;

        let train = self.comparison(&GanInputs::from_batch(&train)?)?;
        let val = self.comparison(&GanInputs::from_batch(&val)?)?;

        let sample = imaging::hstack(&[imaging::pad_right(&train, GUTTER), val])?;
        imaging::make_grid(&[sample], 1, 2)
    }

    fn comparison(&self, inputs: &GanInputs) -> Result<Image> {
        let real_a = inputs.real_a.slice(s![..1, ..]);
        let fake_b = self.generator.forward(real_a)?;

        imaging::vstack(&[
            self.to_image(real_a.row(0))?,
            self.to_image(fake_b.row(0))?,
            self.to_image(inputs.real_b.row(0))?,
        ])
    }

    /// Writes grids of up to 64 real and generated validation images next to each other.
    pub fn eval_model(&mut self, val: &mut DataLoader) -> Result<()> {
        let batch = val.first().ok_or(SolverErr::EmptyLoader { name: "val" })?;
        let inputs = GanInputs::from_batch(&batch)?;

        let n = inputs.real_a.nrows().min(EVAL_SAMPLES);
        let fake_b = self.generator.forward(inputs.real_a.slice(s![..n, ..]))?;

        let grid = |rows: ArrayView2<f32>| -> Result<Image> {
            let images = rows
                .outer_iter()
                .map(|row| self.to_image(row))
                .collect::<Result<Vec<_>>>()?;
            imaging::make_grid(&images, EVAL_NROW, EVAL_PADDING)
        };

        let real = grid(inputs.real_b.slice(s![..n, ..]))?;
        let fake = grid(fake_b.view())?;
        let imgs = imaging::hstack(&[imaging::pad_right(&real, GUTTER), fake])?;
        let imgs = imaging::make_grid(&[imgs], 1, 2)?;

        self.tracker
            .add_image("random_samples", &imgs, self.global_step)?;
        imaging::save_png(
            &imgs,
            &self.run_dir.join("images").join("random_samples.png"),
        )
    }

    fn to_image(&self, row: ArrayView1<f32>) -> Result<Image> {
        let mut image = imaging::unflatten(row, self.config.image_shape)?;

        if self.config.normalize {
            imaging::denormalize(&mut image, &self.config.mean, &self.config.std)?;
        }

        Ok(image)
    }

    /// Writes the trainable models to `<run_dir>/<name>.safetensors` and mirrors them to the
    /// tracker.
    pub fn save(&mut self) -> Result<()> {
        for net in [&self.generator, &self.discriminator] {
            let path = self.run_dir.join(format!("{}.safetensors", net.name()));
            info!("saving {} to {}", net.name(), path.display());

            net.save(&path)?;
            self.tracker.mirror(&path)?;
        }

        Ok(())
    }
}

/// The score above which a prediction counts as real.
fn decision_threshold(mode: GanMode) -> f32 {
    match mode {
        GanMode::Vanilla => 0.0,
        GanMode::Lsgan => 0.5,
    }
}

/// The fraction of predictions on the side of `threshold` matching the nominal target.
fn accuracy(pred: ArrayView2<f32>, target_is_real: bool, threshold: f32) -> f32 {
    if pred.is_empty() {
        return 0.0;
    }

    let hits = pred
        .iter()
        .filter(|&&p| (p > threshold) == target_is_real)
        .count();
    hits as f32 / pred.len() as f32
}

fn time_left(elapsed: Duration, epochs_done: usize, num_epochs: usize) -> Duration {
    if epochs_done == 0 {
        return Duration::ZERO;
    }

    let remaining = num_epochs.saturating_sub(epochs_done);
    elapsed.div_f64(epochs_done as f64).mul_f64(remaining as f64)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, secs / 60 % 60, secs % 60)
}
