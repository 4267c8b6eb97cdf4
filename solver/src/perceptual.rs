use std::path::Path;

use log::info;
use machine_learning::{
    MlErr,
    arch::{
        Network,
        activations::ActFn,
        loss::{LossFn, Mse},
    },
};
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::{
    Result,
    config::{ActivationConfig, NetConfig},
    models,
};

/// Distance between two images measured in the feature space of a frozen network.
#[derive(Debug)]
pub struct PerceptualLoss {
    features: Network,
}

impl PerceptualLoss {
    /// Wraps a feature network, freezing it.
    pub fn new(features: Network) -> Self {
        Self {
            features: features.frozen(),
        }
    }

    /// Builds a randomly initialized feature network for images of `input_len` values.
    pub fn random<R: Rng>(input_len: usize, feature_dim: usize, rng: &mut R) -> Result<Self> {
        Ok(Self::new(feature_net(input_len, feature_dim, rng)?))
    }

    /// Loads a pretrained feature network of the same shape `random` builds.
    pub fn pretrained<R: Rng>(
        path: &Path,
        input_len: usize,
        feature_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let mut features = feature_net(input_len, feature_dim, rng)?;
        features.load(path)?;
        info!("loaded perceptual features from {}", path.display());

        Ok(Self::new(features))
    }

    pub fn features(&self) -> &Network {
        &self.features
    }

    /// Returns the mean squared difference between the features of `img` and `target`.
    pub fn loss(&self, img: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<f32> {
        check_dims(img, target)?;
        let fa = self.features.forward(img)?;
        let fb = self.features.forward(target)?;
        Ok(Mse.loss(fa.view(), fb.view()))
    }

    /// Same as `loss`, also returning the derivative of the loss with respect to `img`.
    pub fn loss_and_grad(
        &mut self,
        img: ArrayView2<f32>,
        target: ArrayView2<f32>,
    ) -> Result<(f32, Array2<f32>)> {
        check_dims(img, target)?;
        let (fa, trace) = self.features.forward_traced(img)?;
        let fb = self.features.forward(target)?;

        let loss = Mse.loss(fa.view(), fb.view());
        let d = Mse.loss_prime(fa.view(), fb.view());
        let d_img = self.features.backward(&trace, d)?;

        Ok((loss, d_img))
    }
}

fn feature_net<R: Rng>(input_len: usize, feature_dim: usize, rng: &mut R) -> Result<Network> {
    let std = (input_len as f32).sqrt().recip();
    let net = NetConfig::new(vec![feature_dim], ActivationConfig::default(), std);
    models::mlp(
        "perceptual",
        input_len,
        feature_dim,
        &net,
        Some(ActFn::leaky_relu(0.2)),
        rng,
    )
}

fn check_dims(img: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<()> {
    if img.dim() != target.dim() {
        return Err(MlErr::SizeMismatch {
            what: "perceptual loss target",
            got: target.len(),
            expected: img.len(),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn criterion() -> PerceptualLoss {
        let mut rng = StdRng::seed_from_u64(3);
        PerceptualLoss::random(12, 6, &mut rng).unwrap()
    }

    #[test]
    fn identical_images_are_at_zero_distance() {
        let criterion = criterion();
        let img = Array2::from_shape_fn((2, 12), |(i, j)| (i + j) as f32 / 10.0);

        assert_eq!(criterion.loss(img.view(), img.view()).unwrap(), 0.0);
        assert!(!criterion.features().requires_grad());
    }

    #[test]
    fn gradient_points_towards_the_target() {
        let mut criterion = criterion();
        let target = Array2::from_shape_fn((1, 12), |(_, j)| j as f32 / 12.0);
        let mut img = Array2::zeros((1, 12));

        let (before, d_img) = criterion.loss_and_grad(img.view(), target.view()).unwrap();
        assert!(before > 0.0);
        assert_eq!(d_img.dim(), (1, 12));

        img.scaled_add(-0.5, &d_img);
        let after = criterion.loss(img.view(), target.view()).unwrap();
        assert!(after < before);
        assert!(criterion.features().grad().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn loads_pretrained_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perceptual.safetensors");
        let trained = criterion();
        trained.features().save(&path).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let loaded = PerceptualLoss::pretrained(&path, 12, 6, &mut rng).unwrap();

        assert_eq!(loaded.features().params(), trained.features().params());
        assert!(!loaded.features().requires_grad());

        let mut rng = StdRng::seed_from_u64(42);
        assert!(PerceptualLoss::pretrained(&path, 12, 5, &mut rng).is_err());
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let criterion = criterion();
        let a = Array2::zeros((1, 12));
        let b = Array2::zeros((2, 12));

        assert!(criterion.loss(a.view(), b.view()).is_err());
    }
}
