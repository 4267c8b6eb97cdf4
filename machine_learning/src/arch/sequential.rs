use ndarray::{Array2, ArrayView2};

use super::layers::{Layer, LayerTrace};
use crate::{
    MlErr, Result,
    initialization::{ConstParamGen, ParamGen},
};

/// The activations a traced forward pass leaves behind, one entry per layer.
#[derive(Clone, Debug)]
pub struct Trace {
    layers: Vec<LayerTrace>,
}

/// A named parameter tensor of a model: where it lives in the flat parameter slice and how
/// it's shaped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamBlock {
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
    pub len: usize,
}

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_size())
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_size())
    }

    /// Lists every parameter tensor of the model, named `<layer index>.<tensor>`.
    pub fn param_blocks(&self) -> Vec<ParamBlock> {
        let mut offset = 0;
        let mut blocks = Vec::new();

        for (i, layer) in self.layers.iter().enumerate() {
            for (name, shape) in layer.param_blocks() {
                let len = shape.iter().product();
                blocks.push(ParamBlock {
                    name: format!("{i}.{name}"),
                    shape,
                    offset,
                    len,
                });
                offset += len;
            }
        }

        blocks
    }

    /// Generates a full parameter vector for this model, the weights of every layer are drawn
    /// from `weights` and the biases from `biases`.
    ///
    /// # Returns
    /// The parameters, or an error if any of the generators got exhausted.
    pub fn init_params<W, B>(&self, weights: &mut W, biases: &mut B) -> Result<Vec<f32>>
    where
        W: ParamGen,
        B: ParamGen,
    {
        let mut params = Vec::with_capacity(self.size());

        for block in self.param_blocks() {
            let param_gen: &mut dyn ParamGen = if block.name.ends_with("bias") {
                &mut *biases
            } else {
                &mut *weights
            };

            let values = param_gen
                .sample(block.len)
                .filter(|values| values.len() == block.len)
                .ok_or(MlErr::SizeMismatch {
                    what: "initial parameters",
                    got: params.len(),
                    expected: self.size(),
                })?;

            params.extend(values);
        }

        Ok(params)
    }

    /// Same as `init_params` with every bias set to zero.
    pub fn init_weights<W: ParamGen>(&self, weights: &mut W) -> Result<Vec<f32>> {
        let mut biases = ConstParamGen::new(0.0, self.size());
        self.init_params(weights, &mut biases)
    }

    /// Makes a forward pass through the network without keeping any trace.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.forward_traced(params, x).map(|(y, _)| y)
    }

    /// Makes a forward pass through the network, recording what the backward pass needs.
    pub fn forward_traced(
        &self,
        params: &[f32],
        x: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Trace)> {
        self.check_size(params.len())?;

        let mut traces = Vec::with_capacity(self.layers.len());
        let mut rest = params;
        let mut y = x.to_owned();

        for layer in &self.layers {
            let (layer_params, tail) = rest.split_at(layer.size());
            rest = tail;

            let (a, trace) = layer.forward(layer_params, y.view())?;
            traces.push(trace);
            y = a;
        }

        Ok((y, Trace { layers: traces }))
    }

    /// Backpropagates `d` through every layer in reverse order.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - The model's gradient buffer, `None` when the parameters are frozen.
    /// * `trace` - The trace of the forward pass being differentiated.
    /// * `d` - The derivative of the loss with respect to the model's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the model's input.
    pub fn backward(
        &self,
        params: &[f32],
        mut grad: Option<&mut [f32]>,
        trace: &Trace,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_size(params.len())?;

        if trace.layers.len() != self.layers.len() {
            return Err(MlErr::SizeMismatch {
                what: "trace layers",
                got: trace.layers.len(),
                expected: self.layers.len(),
            });
        }

        let mut end = params.len();

        for (layer, layer_trace) in self.layers.iter().zip(&trace.layers).rev() {
            let start = end - layer.size();
            let layer_grad = match grad.as_deref_mut() {
                Some(grad) => Some(&mut grad[start..end]),
                None => None,
            };

            d = layer.backward(&params[start..end], layer_grad, layer_trace, d)?;
            end = start;
        }

        Ok(d)
    }

    fn check_size(&self, got: usize) -> Result<()> {
        let expected = self.size();

        if got != expected {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got,
                expected,
            });
        }

        Ok(())
    }
}
