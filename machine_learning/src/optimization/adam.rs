use super::{Optimizer, optimizer::check_lens};
use crate::Result;

/// Adam with bias corrected moment estimates.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// Updates applied so far.
    t: i32,
    first_moment: Box<[f32]>,
    second_moment: Box<[f32]>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters updated.
    /// * `learning_rate` - The step size of every update.
    /// * `beta1`, `beta2` - The decay rates of the first and second moment estimates.
    /// * `epsilon` - Keeps the update finite where the second moment vanishes.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            first_moment: vec![0.; len].into_boxed_slice(),
            second_moment: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_lens(grad, params)?;
        check_lens(&self.first_moment, params)?;

        self.t = self.t.saturating_add(1);
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let correction1 = 1. - b1.powi(self.t);
        let correction2 = 1. - b2.powi(self.t);
        let step_size = self.learning_rate * correction2.sqrt() / correction1;

        let moments = self.first_moment.iter_mut().zip(self.second_moment.iter_mut());
        for ((p, &g), (m, v)) in params.iter_mut().zip(grad).zip(moments) {
            *m += (1. - b1) * (g - *m);
            *v += (1. - b2) * (g * g - *v);
            *p -= step_size * *m / (v.sqrt() + eps);
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}
