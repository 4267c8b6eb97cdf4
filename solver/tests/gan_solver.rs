use std::{cell::Cell, collections::BTreeMap, num::NonZeroUsize, path::PathBuf, rc::Rc};

use machine_learning::{
    Result as MlResult,
    arch::activations::ActFn,
    dataset::{DataLoader, DataLoaders, InMemoryDataset},
    optimization::{GradientDescent, Optimizer},
};
use ndarray::{Array2, ArrayD, IxDyn};
use rand::{SeedableRng, rngs::StdRng};
use solver::{
    config::{GanConfig, NetConfig},
    gan::{GanInputs, GanMetric, GanSolver},
    models,
    tracking::{MemoryTracker, NullTracker},
};

const SHAPE: [usize; 3] = [1, 2, 2];
const LEN: usize = 4;

/// Plain gradient descent that counts its updates.
struct Counting {
    inner: GradientDescent,
    calls: Rc<Cell<usize>>,
}

impl Counting {
    fn new() -> (Box<dyn Optimizer>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let opt = Self {
            inner: GradientDescent::new(0.01),
            calls: calls.clone(),
        };
        (Box::new(opt), calls)
    }
}

impl Optimizer for Counting {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> MlResult<()> {
        self.calls.set(self.calls.get() + 1);
        self.inner.update_params(grad, params)
    }

    fn learning_rate(&self) -> f32 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.inner.set_learning_rate(learning_rate);
    }
}

fn config(log_run: bool) -> GanConfig {
    GanConfig {
        image_shape: SHAPE,
        mean: vec![0.5],
        std: vec![0.5],
        num_epochs: 1,
        lambda_pixel: 10.0,
        generator: NetConfig {
            hidden: vec![8],
            ..NetConfig::default()
        },
        discriminator: NetConfig {
            hidden: vec![8],
            init_std: 0.5,
            ..NetConfig::default()
        },
        log_run,
        ..GanConfig::default()
    }
}

fn dataset(n: usize) -> InMemoryDataset {
    let a = ArrayD::from_shape_fn(IxDyn(&[n, 1, 2, 2]), |idx| {
        (idx[0] as f32 * 0.3 + idx[2] as f32 - idx[3] as f32 * 0.5).sin()
    });
    let b = a.mapv(|x| -x);
    InMemoryDataset::new(BTreeMap::from([("A".to_string(), a), ("B".to_string(), b)])).unwrap()
}

fn loaders(n: usize, batch_size: usize) -> DataLoaders {
    let batch_size = NonZeroUsize::new(batch_size).unwrap();
    DataLoaders {
        train: DataLoader::new(dataset(n), batch_size, None),
        val: DataLoader::new(dataset(n), batch_size, None),
    }
}

fn inputs() -> GanInputs {
    let real_a = Array2::from_shape_fn((2, LEN), |(i, j)| (i + j) as f32 / 4.0 - 0.5);
    GanInputs {
        real_b: real_a.mapv(|x| x * 0.5),
        real_a,
        cond: None,
    }
}

#[test]
fn discriminator_update_leaves_the_generator_untouched() {
    let mut solver = GanSolver::new(config(false), PathBuf::new(), Box::new(NullTracker)).unwrap();
    let inputs = inputs();

    let fwd = solver.forward(&inputs).unwrap();
    let losses = solver.backward_d(&inputs, &fwd).unwrap();

    assert!((losses.total - (losses.real + losses.fake)).abs() < 1e-6);
    assert!(solver.generator().grad().iter().all(|&g| g == 0.0));
    assert!(solver.discriminator().grad().iter().any(|&g| g != 0.0));
}

#[test]
fn generator_update_leaves_the_discriminator_untouched() {
    let mut solver = GanSolver::new(config(false), PathBuf::new(), Box::new(NullTracker)).unwrap();
    let inputs = inputs();

    let fwd = solver.forward(&inputs).unwrap();
    let losses = solver.backward_g(&inputs, &fwd).unwrap();

    assert!(losses.pixel > 0.0);
    assert!((losses.total - (losses.gan + 10.0 * losses.pixel)).abs() < 1e-5);
    assert!(solver.discriminator().grad().iter().all(|&g| g == 0.0));
    assert!(solver.discriminator().requires_grad());
    assert!(solver.generator().grad().iter().any(|&g| g != 0.0));
}

#[test]
fn every_iteration_steps_both_networks_once() {
    let (opt_g, calls_g) = Counting::new();
    let (opt_d, calls_d) = Counting::new();
    let tracker = MemoryTracker::new();

    let mut solver = GanSolver::new(config(false), PathBuf::new(), Box::new(tracker.clone()))
        .unwrap()
        .with_optimizers(opt_g, opt_d);

    let mut loaders = loaders(4, 2);
    solver.train_model(&mut loaders).unwrap();

    assert_eq!(solver.global_step(), 2);
    assert_eq!(calls_d.get(), 2);
    assert_eq!(calls_g.get(), 2);

    let totals = tracker.scalars("D/loss/total");
    assert_eq!(totals.iter().map(|&(step, _)| step).collect::<Vec<_>>(), [1, 2]);
    assert_eq!(tracker.scalars("G/loss/GAN").len(), 2);

    let mean = totals.iter().map(|&(_, v)| v).sum::<f32>() / 2.0;
    let epoch = solver.metrics().get(GanMetric::LossDTotal);
    assert!((epoch - mean).abs() < 1e-5, "{epoch} != {mean}");

    // Nothing is written when the run isn't logged.
    let record = tracker.record();
    assert!(record.images.is_empty());
    assert!(record.mirrored.is_empty());
}

#[test]
fn max_norm_keeps_the_largest_value_of_the_epoch() {
    let mut solver = GanSolver::new(config(false), PathBuf::new(), Box::new(NullTracker)).unwrap();
    let inputs = inputs();

    solver.optimize_parameters(&inputs).unwrap();
    let first = solver.metrics().get(GanMetric::MaxNormD);
    assert!(first > 0.0);

    solver.optimize_parameters(&inputs).unwrap();
    assert!(solver.metrics().get(GanMetric::MaxNormD) >= first);
}

#[test]
fn logged_run_writes_checkpoints_and_images() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let tracker = MemoryTracker::new();

    let config = config(true);
    let mut solver =
        GanSolver::new(config.clone(), run_dir.clone(), Box::new(tracker.clone())).unwrap();
    solver.train_model(&mut loaders(6, 4)).unwrap();

    assert!(run_dir.join("images/sample_1.png").is_file());
    assert!(run_dir.join("images/random_samples.png").is_file());

    let record = tracker.record();
    let tags: Vec<&str> = record.images.iter().map(|(tag, ..)| tag.as_str()).collect();
    assert_eq!(tags, ["sample", "random_samples"]);
    assert!(record.mirrored.contains(&run_dir.join("generator.safetensors")));

    // The generator reloads into a freshly initialized network of the same shape.
    let mut rng = StdRng::seed_from_u64(99);
    let mut generator = models::mlp(
        "generator",
        LEN,
        LEN,
        &config.generator,
        Some(ActFn::tanh()),
        &mut rng,
    )
    .unwrap();
    assert_ne!(generator.params(), solver.generator().params());

    generator.load(&run_dir.join("generator.safetensors")).unwrap();
    assert_eq!(generator.params(), solver.generator().params());
    assert!(run_dir.join("discriminator.safetensors").is_file());
}
