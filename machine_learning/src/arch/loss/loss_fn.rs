use ndarray::{Array2, ArrayView2};

/// A loss function averaged over every element of the prediction.
pub trait LossFn {
    /// Computes the mean loss between `y_pred` and `y`.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Computes the derivative of `loss` with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
