use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// What a forward pass through a `Dense` layer leaves behind for its backward pass.
#[derive(Clone, Debug)]
pub struct LayerTrace {
    x: Array2<f32>,
    z: Option<Array2<f32>>,
}

/// A fully connected layer. Its parameter slice holds the `n x m` weights in row-major order
/// followed by the `m` biases.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output sizes of the layer.
    /// * `act_fn` - An optional activation function applied to the affine output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Makes a forward pass through the layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The layer's output and the trace needed to backpropagate through it.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<(Array2<f32>, LayerTrace)> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        let (a, z) = match &self.act_fn {
            Some(act_fn) => (z.mapv(|z| act_fn.f(z)), Some(z)),
            None => (z, None),
        };

        let trace = LayerTrace { x: x.to_owned(), z };
        Ok((a, trace))
    }

    /// Backpropagates `d` through the layer.
    ///
    /// The parameter gradient is **added** onto `grad`, so consecutive backward passes
    /// accumulate until the buffer is zeroed. Passing `None` skips the parameter gradient
    /// entirely while still propagating the delta to the input.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient buffer, if its parameters are being trained.
    /// * `trace` - The trace left by the matching forward pass.
    /// * `d` - The derivative of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: Option<&mut [f32]>,
        trace: &LayerTrace,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != (trace.x.nrows(), self.dim.1) {
            return Err(MlErr::SizeMismatch {
                what: "dense delta",
                got: d.len(),
                expected: trace.x.nrows() * self.dim.1,
            });
        }

        if let (Some(act_fn), Some(z)) = (&self.act_fn, &trace.z) {
            d.zip_mut_with(z, |d, &z| *d *= act_fn.df(z));
        }

        if let Some(grad) = grad {
            let (mut dw, mut db) = self.view_grad(grad)?;
            linalg::general_mat_mul(1.0, &trace.x.t(), &d, 1.0, &mut dw);
            db += &d.sum_axis(Axis(0));
        }

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    ///
    /// # Arguments
    /// * `grad` - A gradient slice.
    ///
    /// # Returns
    /// A tuple containing the delta weights and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("gradient", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - A slice of parameters.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("parameters", params.len())?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])?;
        Ok((weights, biases))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}
