use std::path::Path;

use log::info;
use machine_learning::{
    MlErr,
    arch::{Network, Trace, activations::ActFn},
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    Result, SolverErr,
    config::{ActivationConfig, NetConfig},
    models,
};

/// Amount of mapped samples averaged into the mean latent.
const MEAN_LATENT_SAMPLES: usize = 4096;

/// The shape of an `ImageDecoder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSpec {
    pub latent_dim: usize,
    pub noise_dim: usize,
    pub hidden: Vec<usize>,
    pub channels: usize,
    /// Side of the square images the decoder renders.
    pub size: usize,
}

impl DecoderSpec {
    pub fn image_len(&self) -> usize {
        self.channels * self.size * self.size
    }
}

/// A pretrained face generator kept frozen: a mapping network taking `z` into the latent
/// space and a synthesis network rendering a latent, together with a fixed noise input,
/// into an image in `[-1, 1]`.
#[derive(Debug)]
pub struct ImageDecoder {
    spec: DecoderSpec,
    mapping: Network,
    synthesis: Network,
    noise: Array1<f32>,
    mean_latent: Array1<f32>,
}

impl ImageDecoder {
    /// Creates a new `ImageDecoder`.
    ///
    /// # Arguments
    /// * `spec` - The decoder's shape.
    /// * `weights` - A directory holding `mapping.safetensors` and `synthesis.safetensors`,
    ///   without it the decoder keeps its random initialization.
    /// * `rng` - Draws the initial weights, the fixed noise and the samples behind the mean
    ///   latent.
    pub fn new<R: Rng>(spec: DecoderSpec, weights: Option<&Path>, rng: &mut R) -> Result<Self> {
        if spec.latent_dim == 0 || spec.image_len() == 0 {
            return Err(SolverErr::Config(format!(
                "decoder {spec:?} has an empty latent or image"
            )));
        }

        let net = NetConfig::new(spec.hidden.clone(), ActivationConfig::default(), 0.1);
        let mut mapping = models::mlp(
            "mapping",
            spec.latent_dim,
            spec.latent_dim,
            &net,
            None,
            rng,
        )?;
        let mut synthesis = models::mlp(
            "synthesis",
            spec.latent_dim + spec.noise_dim,
            spec.image_len(),
            &net,
            Some(ActFn::tanh()),
            rng,
        )?;

        if let Some(dir) = weights {
            mapping.load(&dir.join("mapping.safetensors"))?;
            synthesis.load(&dir.join("synthesis.safetensors"))?;
            info!("loaded decoder weights from {}", dir.display());
        }

        let mapping = mapping.frozen();
        let synthesis = synthesis.frozen();

        let noise = Array1::from_shape_simple_fn(spec.noise_dim, || rng.sample(StandardNormal));
        let z = Array2::from_shape_simple_fn((MEAN_LATENT_SAMPLES, spec.latent_dim), || {
            rng.sample(StandardNormal)
        });
        let mean_latent = mapping
            .forward(z.view())?
            .mean_axis(Axis(0))
            .ok_or_else(|| SolverErr::Config("can't average an empty latent sample".into()))?;

        Ok(Self {
            spec,
            mapping,
            synthesis,
            noise,
            mean_latent,
        })
    }

    pub fn spec(&self) -> &DecoderSpec {
        &self.spec
    }

    /// Returns `[C, H, W]` of the rendered images.
    pub fn image_shape(&self) -> [usize; 3] {
        [self.spec.channels, self.spec.size, self.spec.size]
    }

    pub fn mean_latent(&self) -> ArrayView1<'_, f32> {
        self.mean_latent.view()
    }

    pub fn mapping(&self) -> &Network {
        &self.mapping
    }

    pub fn synthesis(&self) -> &Network {
        &self.synthesis
    }

    /// Renders latents given directly, skipping the mapping network.
    pub fn synthesize(&self, latent: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.synthesis.forward(self.with_noise(latent)?.view())?)
    }

    /// Renders latents and keeps the trace `backward` needs.
    pub fn synthesize_traced(&self, latent: ArrayView2<f32>) -> Result<(Array2<f32>, Trace)> {
        Ok(self.synthesis.forward_traced(self.with_noise(latent)?.view())?)
    }

    /// Backpropagates `d` through the synthesis network.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the latents, the decoder's own weights are
    /// left untouched.
    pub fn backward(&mut self, trace: &Trace, d: Array2<f32>) -> Result<Array2<f32>> {
        let dx = self.synthesis.backward(trace, d)?;
        Ok(dx.slice(s![.., ..self.spec.latent_dim]).to_owned())
    }

    fn with_noise(&self, latent: ArrayView2<f32>) -> Result<Array2<f32>> {
        let l = self.spec.latent_dim;

        if latent.ncols() != l {
            return Err(MlErr::SizeMismatch {
                what: "decoder latent",
                got: latent.ncols(),
                expected: l,
            }
            .into());
        }

        let mut x = Array2::zeros((latent.nrows(), l + self.spec.noise_dim));
        x.slice_mut(s![.., ..l]).assign(&latent);
        x.slice_mut(s![.., l..]).assign(&self.noise);
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn spec() -> DecoderSpec {
        DecoderSpec {
            latent_dim: 4,
            noise_dim: 2,
            hidden: vec![8],
            channels: 3,
            size: 4,
        }
    }

    #[test]
    fn renders_frozen_and_bounded() {
        let mut rng = StdRng::seed_from_u64(1);
        let decoder = ImageDecoder::new(spec(), None, &mut rng).unwrap();

        assert!(!decoder.mapping().requires_grad());
        assert!(!decoder.synthesis().requires_grad());
        assert_eq!(decoder.mean_latent().len(), 4);

        let img = decoder.synthesize(Array2::ones((2, 4)).view()).unwrap();
        assert_eq!(img.dim(), (2, 48));
        assert!(img.iter().all(|x| (-1.0..=1.0).contains(x)));
    }

    #[test]
    fn noise_is_fixed() {
        let mut rng = StdRng::seed_from_u64(1);
        let decoder = ImageDecoder::new(spec(), None, &mut rng).unwrap();
        let latent = Array2::zeros((1, 4));

        assert_eq!(
            decoder.synthesize(latent.view()).unwrap(),
            decoder.synthesize(latent.view()).unwrap()
        );
    }

    #[test]
    fn backward_reaches_the_latent_only() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut decoder = ImageDecoder::new(spec(), None, &mut rng).unwrap();

        let (img, trace) = decoder.synthesize_traced(Array2::zeros((3, 4)).view()).unwrap();
        let d_latent = decoder.backward(&trace, Array2::ones(img.dim())).unwrap();

        assert_eq!(d_latent.dim(), (3, 4));
        assert!(decoder.synthesis().grad().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn rejects_wrong_latent_size() {
        let mut rng = StdRng::seed_from_u64(3);
        let decoder = ImageDecoder::new(spec(), None, &mut rng).unwrap();

        assert!(decoder.synthesize(Array2::zeros((1, 5)).view()).is_err());
    }

    #[test]
    fn loads_pretrained_weights() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let trained = ImageDecoder::new(spec(), None, &mut rng).unwrap();
        trained.mapping().save(&dir.path().join("mapping.safetensors")).unwrap();
        trained.synthesis().save(&dir.path().join("synthesis.safetensors")).unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        let loaded = ImageDecoder::new(spec(), Some(dir.path()), &mut rng).unwrap();

        assert_eq!(loaded.synthesis().params(), trained.synthesis().params());
        assert_eq!(loaded.mapping().params(), trained.mapping().params());
    }
}
