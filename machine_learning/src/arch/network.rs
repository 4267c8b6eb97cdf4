use std::ops::{Deref, DerefMut};

use ndarray::{Array2, ArrayView2};

use super::{Sequential, Trace};
use crate::{MlErr, Result, optimization::Optimizer};

/// Whether a network is being trained or used for inference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// A model handle: an architecture, the parameters it runs with and the gradient buffer
/// those parameters accumulate into.
///
/// A frozen network (`requires_grad == false`) still runs forward and still propagates deltas
/// back to its input, but never touches its own gradient and can't be optimized.
#[derive(Clone, Debug)]
pub struct Network {
    name: String,
    arch: Sequential,
    params: Vec<f32>,
    grad: Vec<f32>,
    mode: Mode,
    requires_grad: bool,
}

impl Network {
    /// Creates a new trainable `Network`.
    ///
    /// # Arguments
    /// * `name` - The name used for logging and checkpoint files.
    /// * `arch` - The network's architecture.
    /// * `params` - The initial parameters, must match the architecture's size.
    pub fn new(name: impl Into<String>, arch: Sequential, params: Vec<f32>) -> Result<Self> {
        let size = arch.size();

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(Self {
            name: name.into(),
            arch,
            params,
            grad: vec![0.0; size],
            mode: Mode::Train,
            requires_grad: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> &Sequential {
        &self.arch
    }

    /// Returns the amount of parameters in the network.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    /// Returns the amount of parameters the optimizer is allowed to update.
    pub fn trainable_size(&self) -> usize {
        if self.requires_grad { self.size() } else { 0 }
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    /// Replaces every parameter of the network.
    pub fn set_params(&mut self, params: Vec<f32>) -> Result<()> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        self.params = params;
        Ok(())
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn train(&mut self) {
        self.mode = Mode::Train;
    }

    pub fn eval(&mut self) {
        self.mode = Mode::Eval;
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Freezes or unfreezes the network's parameters. Freezing also clears the gradient.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;

        if !requires_grad {
            self.zero_grad();
        }
    }

    /// Consumes the network and returns it frozen.
    pub fn frozen(mut self) -> Self {
        self.set_requires_grad(false);
        self
    }

    /// Makes a forward pass without recording anything for a backward pass.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.arch.forward(&self.params, x)
    }

    /// Makes a forward pass and returns the trace its backward pass needs.
    pub fn forward_traced(&self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Trace)> {
        self.arch.forward_traced(&self.params, x)
    }

    /// Backpropagates `d` through the network.
    ///
    /// The parameter gradient is accumulated onto the network's gradient buffer only when the
    /// network requires gradients.
    ///
    /// # Arguments
    /// * `trace` - The trace returned by `forward_traced`.
    /// * `d` - The derivative of the loss with respect to the network's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the network's input.
    pub fn backward(&mut self, trace: &Trace, d: Array2<f32>) -> Result<Array2<f32>> {
        let grad = self.requires_grad.then_some(self.grad.as_mut_slice());
        self.arch.backward(&self.params, grad, trace, d)
    }

    /// Zeros out the gradient buffer.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Applies the accumulated gradient onto the parameters.
    ///
    /// # Errors
    /// Fails when the network is frozen or the optimizer rejects the gradient.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        if !self.requires_grad {
            return Err(MlErr::FrozenNetwork {
                name: self.name.clone(),
            });
        }

        optimizer.update_params(&self.grad, &mut self.params)
    }

    /// Returns the largest L2 norm among the gradients of this network's parameter tensors,
    /// or `current_max` if none of them exceeds it.
    pub fn max_grad_norm(&self, current_max: f32) -> f32 {
        if !self.requires_grad {
            return current_max;
        }

        self.arch
            .param_blocks()
            .iter()
            .map(|block| {
                let grad = &self.grad[block.offset..block.offset + block.len];
                grad.iter().map(|g| g * g).sum::<f32>().sqrt()
            })
            .fold(current_max, f32::max)
    }

    /// Switches the network into evaluation mode until the returned guard is dropped, at which
    /// point the previous mode is restored.
    pub fn eval_scope(&mut self) -> EvalGuard<'_> {
        let prev = self.mode;
        self.eval();
        EvalGuard { network: self, prev }
    }
}

/// Keeps a network in evaluation mode while alive.
pub struct EvalGuard<'n> {
    network: &'n mut Network,
    prev: Mode,
}

impl Deref for EvalGuard<'_> {
    type Target = Network;

    fn deref(&self) -> &Network {
        self.network
    }
}

impl DerefMut for EvalGuard<'_> {
    fn deref_mut(&mut self) -> &mut Network {
        self.network
    }
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        self.network.set_mode(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{arch::layers::Layer, optimization::GradientDescent};

    fn network() -> Network {
        let arch = Sequential::new([Layer::dense((2, 1), None)]);
        Network::new("net", arch, vec![1.0, 1.0, 0.0]).unwrap()
    }

    #[test]
    fn frozen_network_propagates_but_keeps_no_grad() {
        let mut net = network().frozen();
        let (_, trace) = net.forward_traced(array![[1.0, 2.0]].view()).unwrap();

        let d_in = net.backward(&trace, array![[1.0]]).unwrap();
        assert_eq!(d_in, array![[1.0, 1.0]]);
        assert!(net.grad().iter().all(|&g| g == 0.0));
        assert_eq!(net.trainable_size(), 0);
    }

    #[test]
    fn frozen_network_cannot_step() {
        let mut net = network().frozen();
        let mut optimizer = GradientDescent::new(0.1);

        assert!(matches!(
            net.step(&mut optimizer),
            Err(MlErr::FrozenNetwork { .. })
        ));
    }

    #[test]
    fn step_applies_accumulated_grad() {
        let mut net = network();
        let mut optimizer = GradientDescent::new(0.5);
        let (_, trace) = net.forward_traced(array![[1.0, 2.0]].view()).unwrap();

        net.backward(&trace, array![[1.0]]).unwrap();
        net.backward(&trace, array![[1.0]]).unwrap();
        net.step(&mut optimizer).unwrap();

        assert_eq!(net.params(), &[0.0, -1.0, -1.0]);
    }

    #[test]
    fn max_grad_norm_is_per_tensor() {
        let mut net = network();
        let (_, trace) = net.forward_traced(array![[3.0, 4.0]].view()).unwrap();
        net.backward(&trace, array![[1.0]]).unwrap();

        assert_eq!(net.max_grad_norm(0.0), 5.0);
        assert_eq!(net.max_grad_norm(7.0), 7.0);
    }

    #[test]
    fn eval_scope_restores_mode() {
        let mut net = network();

        {
            let guard = net.eval_scope();
            assert_eq!(guard.mode(), Mode::Eval);
        }

        assert!(net.is_training());
    }
}
