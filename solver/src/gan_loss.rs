use std::{fmt, str::FromStr};

use machine_learning::arch::loss::{BceWithLogits, LossFn, Mse};
use ndarray::{Array2, ArrayView2};
use rand::{Rng, rngs::StdRng};

use crate::{Result, SolverErr};

/// The loss the adversarial objective is measured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GanMode {
    /// Binary cross entropy on the discriminator's logits.
    Vanilla,
    /// Least squares on the discriminator's raw scores.
    Lsgan,
}

impl FromStr for GanMode {
    type Err = SolverErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vanilla" => Ok(Self::Vanilla),
            "lsgan" => Ok(Self::Lsgan),
            other => Err(SolverErr::Config(format!("unsupported GAN mode '{other}'"))),
        }
    }
}

impl fmt::Display for GanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vanilla => write!(f, "vanilla"),
            Self::Lsgan => write!(f, "lsgan"),
        }
    }
}

/// An inclusive interval the target labels are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRange {
    pub low: f32,
    pub high: f32,
}

impl LabelRange {
    pub fn new(low: f32, high: f32) -> Result<Self> {
        if !(low.is_finite() && high.is_finite()) || low > high {
            return Err(SolverErr::Config(format!("invalid label range [{low}, {high}]")));
        }

        Ok(Self { low, high })
    }

    pub fn contains(&self, label: f32) -> bool {
        (self.low..=self.high).contains(&label)
    }
}

/// What a single evaluation of the adversarial loss produced.
#[derive(Debug, Clone)]
pub struct GanLossOutput {
    pub loss: f32,
    /// The derivative of `loss` with respect to the prediction.
    pub grad: Array2<f32>,
    /// The target after label flipping.
    pub target_is_real: bool,
    /// The label every element of the prediction was compared against.
    pub label: f32,
}

/// The adversarial loss, with one-sided label smoothing and discriminator label flipping.
#[derive(Debug)]
pub struct GanLoss {
    mode: GanMode,
    flip_prob: f64,
    noisy_labels: bool,
    label_range_real: LabelRange,
    label_range_fake: LabelRange,
    rng: StdRng,
}

impl GanLoss {
    /// Creates a new `GanLoss`.
    ///
    /// # Arguments
    /// * `mode` - The underlying loss, fixed for the lifetime of the instance.
    /// * `flip_prob` - The probability of flipping a discriminator-side target.
    /// * `noisy_labels` - Whether discriminator-side targets may be flipped at all.
    /// * `label_range_real`, `label_range_fake` - Where the real and fake labels are drawn from.
    /// * `rng` - The source for label sampling and flipping.
    ///
    /// # Errors
    /// `SolverErr::Config` if `flip_prob` is outside `[0, 1]`.
    pub fn new(
        mode: GanMode,
        flip_prob: f32,
        noisy_labels: bool,
        label_range_real: LabelRange,
        label_range_fake: LabelRange,
        rng: StdRng,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&flip_prob) {
            return Err(SolverErr::Config(format!(
                "flip_prob ({flip_prob}) must lie in [0, 1]"
            )));
        }

        Ok(Self {
            mode,
            flip_prob: flip_prob as f64,
            noisy_labels,
            label_range_real,
            label_range_fake,
            rng,
        })
    }

    pub fn mode(&self) -> GanMode {
        self.mode
    }

    /// Computes the mean loss of `prediction` against a freshly drawn label.
    ///
    /// # Arguments
    /// * `prediction` - The discriminator's scores.
    /// * `target_is_real` - Whether the scored samples should be judged real.
    /// * `discriminator` - Whether the call is part of a discriminator update, only those calls
    ///   may flip the target.
    pub fn compute(
        &mut self,
        prediction: ArrayView2<f32>,
        target_is_real: bool,
        discriminator: bool,
    ) -> GanLossOutput {
        let flip = discriminator && self.noisy_labels && self.rng.random_bool(self.flip_prob);
        let target_is_real = target_is_real ^ flip;

        let range = if target_is_real {
            self.label_range_real
        } else {
            self.label_range_fake
        };
        let label = self.rng.random_range(range.low..=range.high);
        let target = Array2::from_elem(prediction.dim(), label);

        let (loss, grad) = match self.mode {
            GanMode::Vanilla => (
                BceWithLogits.loss(prediction, target.view()),
                BceWithLogits.loss_prime(prediction, target.view()),
            ),
            GanMode::Lsgan => (
                Mse.loss(prediction, target.view()),
                Mse.loss_prime(prediction, target.view()),
            ),
        };

        GanLossOutput {
            loss,
            grad,
            target_is_real,
            label,
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::SeedableRng;

    use super::*;

    fn criterion(mode: GanMode, flip_prob: f32, noisy_labels: bool) -> GanLoss {
        GanLoss::new(
            mode,
            flip_prob,
            noisy_labels,
            LabelRange::new(0.7, 1.2).unwrap(),
            LabelRange::new(0.0, 0.3).unwrap(),
            StdRng::seed_from_u64(5),
        )
        .unwrap()
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        assert!(matches!("wgan".parse::<GanMode>(), Err(SolverErr::Config(_))));
        assert_eq!("lsgan".parse::<GanMode>().unwrap(), GanMode::Lsgan);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(LabelRange::new(1.0, 0.5).is_err());

        let range = LabelRange::new(0.0, 0.0).unwrap();
        let rng = StdRng::seed_from_u64(0);
        assert!(GanLoss::new(GanMode::Vanilla, 1.5, true, range, range, rng).is_err());
    }

    #[test]
    fn labels_stay_within_their_ranges() {
        let mut criterion = criterion(GanMode::Vanilla, 0.0, false);
        let pred = array![[0.2, -0.4]];

        for _ in 0..200 {
            let real = criterion.compute(pred.view(), true, true);
            assert!(real.target_is_real);
            assert!((0.7..=1.2).contains(&real.label));

            let fake = criterion.compute(pred.view(), false, true);
            assert!(!fake.target_is_real);
            assert!((0.0..=0.3).contains(&fake.label));
        }
    }

    #[test]
    fn generator_side_never_flips() {
        let mut criterion = criterion(GanMode::Lsgan, 1.0, true);
        let pred = array![[0.0]];

        for _ in 0..100 {
            let out = criterion.compute(pred.view(), true, false);
            assert!(out.target_is_real);
            assert!((0.7..=1.2).contains(&out.label));
        }
    }

    #[test]
    fn discriminator_side_flips_when_enabled() {
        let mut always = criterion(GanMode::Lsgan, 1.0, true);
        let mut disabled = criterion(GanMode::Lsgan, 1.0, false);
        let pred = array![[0.0]];

        for _ in 0..50 {
            let flipped = always.compute(pred.view(), true, true);
            assert!(!flipped.target_is_real);
            assert!((0.0..=0.3).contains(&flipped.label));

            assert!(disabled.compute(pred.view(), true, true).target_is_real);
        }
    }

    #[test]
    fn lsgan_is_mse_against_the_label() {
        let range = LabelRange::new(1.0, 1.0).unwrap();
        let rng = StdRng::seed_from_u64(0);
        let mut criterion = GanLoss::new(GanMode::Lsgan, 0.0, false, range, range, rng).unwrap();

        let out = criterion.compute(array![[3.0, 1.0]].view(), true, true);
        assert_eq!(out.loss, 2.0);
        assert_eq!(out.grad, array![[2.0, 0.0]]);
    }
}
