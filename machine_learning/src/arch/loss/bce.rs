use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

/// Binary cross entropy computed straight from logits.
///
/// Uses `max(x, 0) - x * y + ln(1 + e^-|x|)`, which never overflows.
#[derive(Debug, Default, Clone, Copy)]
pub struct BceWithLogits;

impl LossFn for BceWithLogits {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let n = y_pred.len().max(1) as f32;

        Zip::from(&y_pred)
            .and(&y)
            .fold(0.0, |acc, &x, &y| {
                acc + x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
            })
            / n
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.len().max(1) as f32;

        Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&x, &y| (sigmoid(x) - y) / n)
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn zero_logit_costs_ln_2() {
        let y_pred = array![[0.0, 0.0]];
        let y = array![[1.0, 0.0]];

        let loss = BceWithLogits.loss(y_pred.view(), y.view());
        assert!((loss - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn stable_for_large_logits() {
        let y_pred = array![[1000.0, -1000.0]];
        let y = array![[1.0, 0.0]];

        let loss = BceWithLogits.loss(y_pred.view(), y.view());
        assert!(loss.is_finite());
        assert!(loss < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        const H: f32 = 1e-3;

        let y_pred = array![[0.3, -1.2, 2.0]];
        let y = array![[0.9, 0.1, 0.0]];
        let grad = BceWithLogits.loss_prime(y_pred.view(), y.view());

        for i in 0..3 {
            let mut plus = y_pred.clone();
            let mut minus = y_pred.clone();
            plus[[0, i]] += H;
            minus[[0, i]] -= H;

            let numeric = (BceWithLogits.loss(plus.view(), y.view())
                - BceWithLogits.loss(minus.view(), y.view()))
                / (2.0 * H);
            assert!((grad[[0, i]] - numeric).abs() < 1e-3);
        }
    }
}
