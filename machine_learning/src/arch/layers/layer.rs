use ndarray::{Array2, ArrayView2};

use super::{Dense, LayerTrace};
use crate::{Result, arch::activations::ActFn};

#[derive(Clone, Debug)]
pub enum Layer {
    Dense(Dense),
}

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Layer::Dense(l) => l.size(),
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            Layer::Dense(l) => l.dim().0,
        }
    }

    pub fn output_size(&self) -> usize {
        match self {
            Layer::Dense(l) => l.dim().1,
        }
    }

    /// The named parameter tensors of this layer and their shapes, in the order they are laid
    /// out in the layer's parameter slice.
    pub fn param_blocks(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            Layer::Dense(l) => {
                let (n, m) = l.dim();
                vec![("weight", vec![n, m]), ("bias", vec![m])]
            }
        }
    }

    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<(Array2<f32>, LayerTrace)> {
        match self {
            Layer::Dense(l) => l.forward(params, x),
        }
    }

    pub fn backward(
        &self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        trace: &LayerTrace,
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Layer::Dense(l) => l.backward(params, grad, trace, d),
        }
    }
}
